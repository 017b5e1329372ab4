//! The surface AST (spec §3.1).
//!
//! This tree is what the external parser is assumed to hand the
//! resolver/analyzer; this crate never constructs it from text. Types
//! here are still surface-level references (`TypeExpr`), not yet
//! resolved to `TypeId` — that resolution is the analyzer's job
//! (`sema::typeck`).

use crate::span::Span;

/// A surface-level type reference, as written in source. Resolved to a
/// `types::TypeId` during semantic analysis.
#[derive(Clone, Debug)]
pub enum TypeExpr {
    Named(String),
    Pointer { mutable: bool, pointee: Box<TypeExpr> },
    Array { element: Box<TypeExpr>, len: Box<Expr> },
    Function { params: Vec<TypeExpr>, ret: Box<TypeExpr> },
    ErrorUnion(Box<TypeExpr>),
}

/// A recognized declaration-level attribute, as named in spec §6.2.
#[derive(Clone, Debug)]
pub enum Attribute {
    Abi { convention: String, mapping: Option<String> },
    Extern,
    Interrupt,
    Port(u16),
    Inline,
    NoSmc,
    Naked,
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: TypeExpr,
    pub body: Option<Block>,
    pub attributes: Vec<Attribute>,
    pub is_public: bool,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<Param>,
    pub is_public: bool,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct EnumVariantDecl {
    pub name: String,
    pub discriminant: Option<Expr>,
    pub payload: Option<TypeExpr>,
}

#[derive(Clone, Debug)]
pub struct EnumDecl {
    pub name: String,
    pub variants: Vec<EnumVariantDecl>,
    pub is_public: bool,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct InterfaceMethodSig {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: TypeExpr,
}

#[derive(Clone, Debug)]
pub struct InterfaceDecl {
    pub name: String,
    pub methods: Vec<InterfaceMethodSig>,
    pub is_public: bool,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct ImplDecl {
    pub interface: Option<String>,
    pub target_type: TypeExpr,
    pub methods: Vec<FunctionDecl>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct ImportDecl {
    pub path: String,
    pub alias: Option<String>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct ConstDecl {
    pub name: String,
    pub ty: Option<TypeExpr>,
    pub value: Expr,
    pub is_public: bool,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct GlobalDecl {
    pub name: String,
    pub ty: TypeExpr,
    pub init: Option<Expr>,
    pub is_public: bool,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct TypeAliasDecl {
    pub name: String,
    pub target: TypeExpr,
    pub is_public: bool,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum Decl {
    Function(FunctionDecl),
    Struct(StructDecl),
    Enum(EnumDecl),
    Interface(InterfaceDecl),
    Impl(ImplDecl),
    Import(ImportDecl),
    Const(ConstDecl),
    Global(GlobalDecl),
    TypeAlias(TypeAliasDecl),
}

impl Decl {
    pub fn span(&self) -> Span {
        match self {
            Decl::Function(d) => d.span,
            Decl::Struct(d) => d.span,
            Decl::Enum(d) => d.span,
            Decl::Interface(d) => d.span,
            Decl::Impl(d) => d.span,
            Decl::Import(d) => d.span,
            Decl::Const(d) => d.span,
            Decl::Global(d) => d.span,
            Decl::TypeAlias(d) => d.span,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Decl::Function(d) => Some(&d.name),
            Decl::Struct(d) => Some(&d.name),
            Decl::Enum(d) => Some(&d.name),
            Decl::Interface(d) => Some(&d.name),
            Decl::Impl(_) => None,
            Decl::Import(_) => None,
            Decl::Const(d) => Some(&d.name),
            Decl::Global(d) => Some(&d.name),
            Decl::TypeAlias(d) => Some(&d.name),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Clone, Debug)]
pub struct MatchArm {
    pub pattern: Expr,
    pub body: Block,
}

#[derive(Clone, Debug)]
pub enum Stmt {
    Let {
        name: String,
        ty: Option<TypeExpr>,
        mutable: bool,
        init: Option<Expr>,
        span: Span,
    },
    Assign {
        target: Expr,
        value: Expr,
        span: Span,
    },
    If {
        cond: Expr,
        then_block: Block,
        else_block: Option<Block>,
        span: Span,
    },
    While {
        cond: Expr,
        body: Block,
        span: Span,
    },
    ForRange {
        var: String,
        lo: Expr,
        hi: Expr,
        body: Block,
        span: Span,
    },
    /// `loop arr into x { .. }` / `loop arr ref to x { .. }` (spec §4.2.6).
    LoopOverArray {
        array: Expr,
        binding: String,
        by_ref: bool,
        body: Block,
        span: Span,
    },
    Loop {
        body: Block,
        span: Span,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
    Defer {
        body: Block,
        span: Span,
    },
    Match {
        scrutinee: Expr,
        arms: Vec<MatchArm>,
        span: Span,
    },
    InlineAsm {
        text: String,
        span: Span,
    },
    Expr {
        expr: Expr,
        span: Span,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UnOp {
    Neg,
    Not,
    AddressOf,
    Deref,
}

#[derive(Clone, Debug)]
pub struct StringSegment {
    pub literal: String,
    pub interpolation: Option<Expr>,
}

#[derive(Clone, Debug)]
pub struct LambdaExpr {
    pub params: Vec<Param>,
    pub body: Block,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub enum Expr {
    IntLiteral { value: i64, suffix: Option<String>, span: Span },
    BoolLiteral { value: bool, span: Span },
    StringLiteral { segments: Vec<StringSegment>, span: Span },
    Identifier { name: String, span: Span },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr>, span: Span },
    Unary { op: UnOp, operand: Box<Expr>, span: Span },
    Call { callee: Box<Expr>, args: Vec<Expr>, span: Span },
    MethodCall { receiver: Box<Expr>, method: String, args: Vec<Expr>, span: Span },
    Field { base: Box<Expr>, name: String, span: Span },
    Index { base: Box<Expr>, index: Box<Expr>, span: Span },
    Cast { value: Box<Expr>, ty: TypeExpr, span: Span },
    Lambda(LambdaExpr),
    Range { lo: Box<Expr>, hi: Box<Expr>, span: Span },
    StructLiteral { ty: String, fields: Vec<(String, Expr)>, span: Span },
    ArrayLiteral { elements: Vec<Expr>, span: Span },
    /// Postfix `?` — error propagation (spec §4.2.5).
    Try { expr: Box<Expr>, span: Span },
    /// Postfix `??` with a user-supplied default.
    TryOrDefault { expr: Box<Expr>, default: Box<Expr>, span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::IntLiteral { span, .. }
            | Expr::BoolLiteral { span, .. }
            | Expr::StringLiteral { span, .. }
            | Expr::Identifier { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Call { span, .. }
            | Expr::MethodCall { span, .. }
            | Expr::Field { span, .. }
            | Expr::Index { span, .. }
            | Expr::Cast { span, .. }
            | Expr::Range { span, .. }
            | Expr::StructLiteral { span, .. }
            | Expr::ArrayLiteral { span, .. }
            | Expr::Try { span, .. }
            | Expr::TryOrDefault { span, .. } => *span,
            Expr::Lambda(l) => l.span,
        }
    }
}

/// A module is an ordered sequence of declarations (spec §3.2).
#[derive(Clone, Debug, Default)]
pub struct SourceFile {
    pub decls: Vec<Decl>,
}
