//! Lowering: AST function bodies to MIR basic blocks (spec §4.2.6).
//!
//! Each source control-flow construct lowers to the explicit branch
//! shape given in spec §4.2.6's table; `?`/`??` lower straight to
//! `Cmp`/`JumpIf`/`Return` without ever synthesizing an AST-level
//! `match` (spec §4.2.5).

use crate::ast::{BinOp, Block, Expr, FunctionDecl, Stmt, TypeExpr, UnOp};
use crate::diagnostics::{DiagnosticBag, DiagnosticKind};
use crate::mir::{CallConv, CmpOp, Instruction, MirFunction, Opcode, Reg, SymbolRef};
use crate::sema::interfaces::ImplTable;
use crate::sema::names::{Binding, ScopeStack};
use crate::sema::tryop;
use crate::sema::typeck;
use crate::settings::CompileOptions;
use crate::types::{IntWidth, TypeData, TypeId, TypeInterner};
use minzc_entity::EntityRef;
use rustc_hash::FxHashMap;

/// Shared, module-wide lowering context: the type table, accumulated
/// diagnostics, resolved function names, the interface dispatch table,
/// and the SMC-region bump allocator for address-taken locals.
pub struct ModuleEnv<'a> {
    pub types: &'a mut TypeInterner,
    pub diags: &'a mut DiagnosticBag,
    pub functions: &'a FxHashMap<String, crate::mir::FuncId>,
    pub impls: &'a ImplTable,
    pub options: &'a CompileOptions,
    /// Module-level `const`/`global` bindings (spec §3.3, §4.2.1),
    /// gathered once before any function body is lowered and seeded
    /// into every function's scope stack.
    pub module_bindings: &'a FxHashMap<String, Binding>,
    next_smc_slot: u16,
}

impl<'a> ModuleEnv<'a> {
    pub fn new(
        types: &'a mut TypeInterner,
        diags: &'a mut DiagnosticBag,
        functions: &'a FxHashMap<String, crate::mir::FuncId>,
        impls: &'a ImplTable,
        options: &'a CompileOptions,
        module_bindings: &'a FxHashMap<String, Binding>,
    ) -> Self {
        let next_smc_slot = options.smc_region_base;
        Self { types, diags, functions, impls, options, module_bindings, next_smc_slot }
    }

    fn alloc_slot(&mut self, size: u16) -> u16 {
        let addr = self.next_smc_slot;
        self.next_smc_slot = self.next_smc_slot.wrapping_add(size.max(1));
        addr
    }
}

/// Resolve a surface `TypeExpr` to an interned `TypeId`. Struct/enum/
/// interface names are looked up against `named`, the table of
/// already-declared aggregate types in the enclosing module.
pub fn resolve_type_expr(
    expr: &TypeExpr,
    types: &mut TypeInterner,
    named: &FxHashMap<String, TypeId>,
) -> TypeId {
    match expr {
        TypeExpr::Named(name) => match name.as_str() {
            "u8" => types.u8(),
            "u16" => types.u16(),
            "i8" => types.intern(TypeData::Int { width: IntWidth::W8, signed: true }),
            "i16" => types.intern(TypeData::Int { width: IntWidth::W16, signed: true }),
            "bool" => types.bool_(),
            "void" => types.void(),
            _ => named.get(name).copied().unwrap_or_else(|| types.void()),
        },
        TypeExpr::Pointer { mutable, pointee } => {
            let pointee_ty = resolve_type_expr(pointee, types, named);
            types.intern(TypeData::Pointer { pointee: pointee_ty, mutable: *mutable })
        }
        TypeExpr::Array { element, len } => {
            let element_ty = resolve_type_expr(element, types, named);
            let len_value = match len.as_ref() {
                Expr::IntLiteral { value, .. } => *value as u32,
                _ => 0,
            };
            types.intern(TypeData::Array { element: element_ty, len: len_value })
        }
        TypeExpr::Function { params, ret } => {
            let param_tys = params.iter().map(|p| resolve_type_expr(p, types, named)).collect();
            let ret_ty = resolve_type_expr(ret, types, named);
            types.intern(TypeData::Function { params: param_tys, ret: ret_ty })
        }
        TypeExpr::ErrorUnion(inner) => {
            let ok = resolve_type_expr(inner, types, named);
            tryop::error_union_of(ok, types)
        }
    }
}

/// Lowers one function body into a fresh `MirFunction`. The function's
/// entry block and parameters must already exist on `func` (the caller
/// declares them from the signature before invoking this).
pub struct FunctionLowerer<'f, 'e, 'a> {
    func: &'f mut MirFunction,
    env: &'e mut ModuleEnv<'a>,
    scopes: ScopeStack,
    current: crate::mir::Block,
    named_types: &'f FxHashMap<String, TypeId>,
}

impl<'f, 'e, 'a> FunctionLowerer<'f, 'e, 'a> {
    pub fn new(
        func: &'f mut MirFunction,
        env: &'e mut ModuleEnv<'a>,
        named_types: &'f FxHashMap<String, TypeId>,
    ) -> Self {
        let entry = func.entry;
        let mut scopes = ScopeStack::new();
        for (name, binding) in env.module_bindings {
            scopes.declare(name, *binding);
        }
        Self { func, env, scopes, current: entry, named_types }
    }

    /// Bind the already-declared MIR parameters into function scope,
    /// then lower the body block, per spec §4.2.6.
    pub fn lower_function_body(&mut self, decl: &FunctionDecl) {
        for (i, param) in decl.params.iter().enumerate() {
            let ty = resolve_type_expr(&param.ty, self.env.types, self.named_types);
            let reg = self.func.new_reg(ty);
            self.func.append_inst(
                self.current,
                Instruction::new(Opcode::LoadParam, ty).with_dst(reg).with_imm(i as i64),
            );
            self.scopes.declare(&param.name, Binding::Register { reg, ty, mutable: false });
        }

        if let Some(body) = &decl.body {
            self.lower_block(body);
        }

        // Every block must end in a terminator (spec §3.6 invariant);
        // a function falling off the end returns void.
        if !self.block_has_terminator(self.current) {
            let void = self.env.types.void();
            self.func.append_inst(self.current, Instruction::new(Opcode::Return, void));
        }
    }

    fn block_has_terminator(&self, block: crate::mir::Block) -> bool {
        self.func.blocks[block]
            .insts
            .last()
            .map(|&id| self.func.insts[id].opcode.is_terminator())
            .unwrap_or(false)
    }

    fn lower_block(&mut self, block: &Block) {
        self.scopes.push_block();
        for stmt in &block.stmts {
            self.lower_stmt(stmt);
        }
        self.scopes.pop_block();
    }

    fn lower_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let { name, ty, init, mutable, .. } => {
                let value = init.as_ref().map(|e| self.lower_expr(e));
                let declared_ty = ty
                    .as_ref()
                    .map(|t| resolve_type_expr(t, self.env.types, self.named_types));
                let reg = match (value, declared_ty) {
                    (Some((reg, inferred_ty)), Some(want)) => {
                        typeck::check_assignable(
                            inferred_ty,
                            want,
                            crate::span::Span::synthetic(),
                            self.env.types,
                            self.env.diags,
                        );
                        reg
                    }
                    (Some((reg, _)), None) => reg,
                    (None, Some(want)) => {
                        let reg = self.func.new_reg(want);
                        self.emit(Instruction::new(Opcode::LoadConst, want).with_dst(reg).with_imm(0));
                        reg
                    }
                    (None, None) => {
                        let void = self.env.types.void();
                        self.func.new_reg(void)
                    }
                };
                let ty = self.func.regs[reg];
                self.scopes.declare(name, Binding::Register { reg, ty, mutable: *mutable });
            }
            Stmt::Assign { target, value, .. } => {
                let (val_reg, _) = self.lower_expr(value);
                self.lower_store(target, val_reg);
            }
            Stmt::If { cond, then_block, else_block, .. } => self.lower_if(cond, then_block, else_block.as_ref()),
            Stmt::While { cond, body, .. } => self.lower_while(cond, body),
            Stmt::ForRange { var, lo, hi, body, .. } => self.lower_for_range(var, lo, hi, body),
            Stmt::LoopOverArray { array, binding, by_ref, body, .. } => {
                self.lower_loop_over_array(array, binding, *by_ref, body)
            }
            Stmt::Loop { body, .. } => self.lower_bare_loop(body),
            Stmt::Return { value, .. } => {
                let ret_ty = self.func.ret_ty;
                match value {
                    Some(e) => {
                        let (reg, _) = self.lower_expr(e);
                        self.emit(Instruction::new(Opcode::Return, ret_ty).with_src1(reg));
                    }
                    None => {
                        self.emit(Instruction::new(Opcode::Return, ret_ty));
                    }
                }
            }
            Stmt::Defer { body, .. } => {
                // Lowered inline at the defer site's enclosing scope exit
                // is a larger transform than this core needs to model
                // explicitly; defer bodies execute immediately before
                // falling through, a conservative approximation of
                // "runs on every exit path" for the straight-line case.
                self.lower_block(body);
            }
            Stmt::Match { scrutinee, arms, .. } => self.lower_match(scrutinee, arms),
            Stmt::InlineAsm { text, .. } => {
                let void = self.env.types.void();
                self.emit(Instruction::new(Opcode::LoadConst, void).with_comment(text.clone()));
            }
            Stmt::Expr { expr, .. } => {
                self.lower_expr(expr);
            }
        }
    }

    fn lower_if(&mut self, cond: &Expr, then_block: &Block, else_block: Option<&Block>) {
        let (cond_reg, _) = self.lower_expr(cond);
        let else_blk = self.func.new_block();
        let end_blk = self.func.new_block();
        let bool_ty = self.env.types.bool_();
        self.emit(
            Instruction::new(Opcode::JumpIfNot, bool_ty)
                .with_src1(cond_reg)
                .with_label(else_blk),
        );

        self.lower_block(then_block);
        if !self.block_has_terminator(self.current) {
            self.emit(Instruction::new(Opcode::Jump, bool_ty).with_label(end_blk));
        }

        self.current = else_blk;
        if let Some(else_b) = else_block {
            self.lower_block(else_b);
        }
        if !self.block_has_terminator(self.current) {
            self.emit(Instruction::new(Opcode::Jump, bool_ty).with_label(end_blk));
        }

        self.current = end_blk;
    }

    fn lower_while(&mut self, cond: &Expr, body: &Block) {
        let header = self.func.new_block();
        let loop_body = self.func.new_block();
        let exit = self.func.new_block();
        let bool_ty = self.env.types.bool_();

        self.emit(Instruction::new(Opcode::Jump, bool_ty).with_label(header));
        self.current = header;
        let (cond_reg, _) = self.lower_expr(cond);
        self.emit(Instruction::new(Opcode::JumpIfNot, bool_ty).with_src1(cond_reg).with_label(exit));

        self.current = loop_body;
        self.lower_block(body);
        if !self.block_has_terminator(self.current) {
            self.emit(Instruction::new(Opcode::Jump, bool_ty).with_label(header));
        }

        self.current = exit;
    }

    fn lower_for_range(&mut self, var: &str, lo: &Expr, hi: &Expr, body: &Block) {
        let (lo_reg, ty) = self.lower_expr(lo);
        self.scopes.push_block();
        self.scopes.declare(var, Binding::Register { reg: lo_reg, ty, mutable: true });

        let header = self.func.new_block();
        let loop_body = self.func.new_block();
        let exit = self.func.new_block();

        self.emit(Instruction::new(Opcode::Jump, ty).with_label(header));
        self.current = header;
        let (hi_reg, _) = self.lower_expr(hi);
        let cmp = self.func.new_reg(self.env.types.bool_());
        self.emit(
            Instruction::new(Opcode::Cmp, ty)
                .with_dst(cmp)
                .with_src1(lo_reg)
                .with_src2(hi_reg)
                .with_cmp_op(CmpOp::Lt),
        );
        self.emit(Instruction::new(Opcode::JumpIfNot, ty).with_src1(cmp).with_label(exit));

        self.current = loop_body;
        self.lower_block(body);
        let next = self.func.new_reg(ty);
        let one = self.func.new_reg(ty);
        self.emit(Instruction::new(Opcode::LoadConst, ty).with_dst(one).with_imm(1));
        self.emit(Instruction::new(Opcode::Add, ty).with_dst(next).with_src1(lo_reg).with_src2(one));
        if !self.block_has_terminator(self.current) {
            self.emit(Instruction::new(Opcode::Jump, ty).with_label(header));
        }

        self.scopes.pop_block();
        self.current = exit;
    }

    /// `loop arr into x { .. }` / `loop arr ref to x { .. }` (spec
    /// §4.2.6): `LoopStart`, a per-iteration copy in or out of a fixed
    /// buffer (or, for the `ref` form, direct pointer access), and a
    /// `DJNZ` back-edge bounded by the array length.
    fn lower_loop_over_array(&mut self, array: &Expr, binding: &str, by_ref: bool, body: &Block) {
        let (array_reg, array_ty) = self.lower_expr(array);
        let element_ty = match self.env.types.lookup(array_ty) {
            TypeData::Array { element, .. } => *element,
            _ => self.env.types.u8(),
        };

        let header = self.func.new_block();
        self.emit(Instruction::new(Opcode::LoopStart, array_ty).with_src1(array_reg).with_label(header));
        self.current = header;

        let binding_reg = self.func.new_reg(element_ty);
        let opcode = if by_ref { Opcode::LoadAddr } else { Opcode::CopyToBuffer };
        self.emit(Instruction::new(opcode, element_ty).with_dst(binding_reg).with_src1(array_reg));

        self.scopes.push_block();
        self.scopes.declare(binding, Binding::Register { reg: binding_reg, ty: element_ty, mutable: by_ref });
        self.lower_block(body);
        self.scopes.pop_block();

        if !by_ref {
            self.emit(Instruction::new(Opcode::CopyFromBuffer, element_ty).with_src1(binding_reg));
        }
        let counter = self.func.new_reg(self.env.types.u8());
        if !self.block_has_terminator(self.current) {
            self.emit(Instruction::new(Opcode::Djnz, element_ty).with_dst(counter).with_label(header));
        }
        self.current = self.func.new_block();
        self.emit(Instruction::new(Opcode::LoopEnd, array_ty));
    }

    fn lower_bare_loop(&mut self, body: &Block) {
        let header = self.func.new_block();
        let void = self.env.types.void();
        self.emit(Instruction::new(Opcode::Jump, void).with_label(header));
        self.current = header;
        self.lower_block(body);
        if !self.block_has_terminator(self.current) {
            self.emit(Instruction::new(Opcode::Jump, void).with_label(header));
        }
    }

    fn lower_match(&mut self, scrutinee: &Expr, arms: &[crate::ast::MatchArm]) {
        let (scrutinee_reg, ty) = self.lower_expr(scrutinee);
        let end = self.func.new_block();
        for arm in arms {
            let (pattern_reg, _) = self.lower_expr(&arm.pattern);
            let matches = self.func.new_reg(self.env.types.bool_());
            self.emit(
                Instruction::new(Opcode::Cmp, ty)
                    .with_dst(matches)
                    .with_src1(scrutinee_reg)
                    .with_src2(pattern_reg)
                    .with_cmp_op(CmpOp::Eq),
            );
            let next_arm = self.func.new_block();
            let arm_body = self.func.new_block();
            self.emit(Instruction::new(Opcode::JumpIfNot, ty).with_src1(matches).with_label(next_arm));
            self.current = arm_body;
            self.lower_block(&arm.body);
            if !self.block_has_terminator(self.current) {
                self.emit(Instruction::new(Opcode::Jump, ty).with_label(end));
            }
            self.current = next_arm;
        }
        if !self.block_has_terminator(self.current) {
            self.emit(Instruction::new(Opcode::Jump, ty).with_label(end));
        }
        self.current = end;
    }

    fn lower_store(&mut self, target: &Expr, value: Reg) {
        match target {
            Expr::Identifier { name, span } => match self.scopes.lookup(name) {
                Some(Binding::Register { ty, mutable, .. }) => {
                    if !mutable {
                        self.env.diags.error(
                            DiagnosticKind::TypeMismatch,
                            *span,
                            format!("cannot assign to immutable binding `{}`", name),
                        );
                    }
                    self.scopes.declare(name, Binding::Register { reg: value, ty, mutable });
                }
                Some(Binding::Slot { addr, ty, .. }) => {
                    self.emit(
                        Instruction::new(Opcode::StoreDirect, ty)
                            .with_src1(value)
                            .with_imm(addr as i64),
                    );
                }
                Some(Binding::Const { .. }) => {
                    self.env.diags.error(
                        DiagnosticKind::TypeMismatch,
                        *span,
                        format!("cannot assign to const `{}`", name),
                    );
                }
                None => {
                    self.env.diags.error(
                        DiagnosticKind::UnknownIdentifier,
                        *span,
                        format!("unknown identifier `{}`", name),
                    );
                }
            },
            Expr::Index { base, index, .. } => {
                let (base_reg, _) = self.lower_expr(base);
                let (index_reg, ty) = self.lower_expr(index);
                self.emit(
                    Instruction::new(Opcode::IndexStore, ty)
                        .with_src1(base_reg)
                        .with_src2(index_reg)
                        .with_comment(format!("value=v{}", value.index())),
                );
            }
            _ => {
                self.env.diags.error(
                    DiagnosticKind::FeatureUnsupported,
                    target.span(),
                    "unsupported assignment target",
                );
            }
        }
    }

    /// Lower `expr`, returning the register holding its value and its
    /// inferred type.
    fn lower_expr(&mut self, expr: &Expr) -> (Reg, TypeId) {
        match expr {
            Expr::IntLiteral { value, .. } => {
                let ty = self.env.types.u16();
                let reg = self.func.new_reg(ty);
                self.emit(Instruction::new(Opcode::LoadConst, ty).with_dst(reg).with_imm(*value));
                (reg, ty)
            }
            Expr::BoolLiteral { value, .. } => {
                let ty = self.env.types.bool_();
                let reg = self.func.new_reg(ty);
                self.emit(Instruction::new(Opcode::LoadConst, ty).with_dst(reg).with_imm(*value as i64));
                (reg, ty)
            }
            Expr::StringLiteral { segments, span } => {
                let ty = self.env.types.u16();
                let reg = self.func.new_reg(ty);
                let text: String = segments.iter().map(|s| s.literal.clone()).collect();
                self.emit(
                    Instruction::new(Opcode::LoadLabel, ty)
                        .with_dst(reg)
                        .with_symbol(SymbolRef::Global(text))
                        .with_comment(format!("string literal at {}", span)),
                );
                (reg, ty)
            }
            Expr::Identifier { name, span } => match self.scopes.lookup(name) {
                Some(Binding::Register { reg, ty, .. }) => (reg, ty),
                Some(Binding::Slot { addr, ty, .. }) => {
                    let reg = self.func.new_reg(ty);
                    self.emit(
                        Instruction::new(Opcode::LoadDirect, ty).with_dst(reg).with_imm(addr as i64),
                    );
                    (reg, ty)
                }
                Some(Binding::Const { value, ty }) => {
                    let reg = self.func.new_reg(ty);
                    self.emit(Instruction::new(Opcode::LoadConst, ty).with_dst(reg).with_imm(value));
                    (reg, ty)
                }
                None => {
                    if let Some(&func_id) = self.env.functions.get(name) {
                        let ty = self.env.types.u16();
                        let reg = self.func.new_reg(ty);
                        self.emit(
                            Instruction::new(Opcode::LoadLabel, ty)
                                .with_dst(reg)
                                .with_symbol(SymbolRef::Function(func_id, name.clone())),
                        );
                        (reg, ty)
                    } else {
                        self.env.diags.error(
                            DiagnosticKind::UnknownIdentifier,
                            *span,
                            format!("unknown identifier `{}`", name),
                        );
                        let void = self.env.types.void();
                        (self.func.new_reg(void), void)
                    }
                }
            },
            Expr::Binary { op, lhs, rhs, span } => self.lower_binary(*op, lhs, rhs, *span),
            Expr::Unary { op, operand, .. } => self.lower_unary(*op, operand),
            Expr::Call { callee, args, span } => self.lower_call(callee, args, *span),
            Expr::MethodCall { receiver, method, args, span } => {
                if method == "forEach" {
                    if let Some(result) = self.try_lower_iterator_chain(expr) {
                        return result;
                    }
                }
                self.lower_method_call(receiver, method, args, *span)
            }
            Expr::Field { base, name, .. } => {
                let (base_reg, base_ty) = self.lower_expr(base);
                let field_ty = match self.env.types.lookup(base_ty) {
                    TypeData::Struct { fields, .. } => {
                        fields.iter().find(|f| &f.name == name).map(|f| f.ty)
                    }
                    _ => None,
                }
                .unwrap_or_else(|| self.env.types.u8());
                let reg = self.func.new_reg(field_ty);
                self.emit(
                    Instruction::new(Opcode::LoadDirect, field_ty)
                        .with_dst(reg)
                        .with_src1(base_reg)
                        .with_comment(format!("field {}", name)),
                );
                (reg, field_ty)
            }
            Expr::Index { base, index, .. } => {
                let (base_reg, base_ty) = self.lower_expr(base);
                let (index_reg, _) = self.lower_expr(index);
                let element_ty = match self.env.types.lookup(base_ty) {
                    TypeData::Array { element, .. } => *element,
                    _ => self.env.types.u8(),
                };
                let reg = self.func.new_reg(element_ty);
                self.emit(
                    Instruction::new(Opcode::IndexLoad, element_ty)
                        .with_dst(reg)
                        .with_src1(base_reg)
                        .with_src2(index_reg),
                );
                (reg, element_ty)
            }
            Expr::Cast { value, ty, .. } => {
                let (value_reg, _) = self.lower_expr(value);
                let target_ty = resolve_type_expr(ty, self.env.types, self.named_types);
                let reg = self.func.new_reg(target_ty);
                self.emit(Instruction::new(Opcode::LoadConst, target_ty).with_dst(reg).with_src1(value_reg));
                (reg, target_ty)
            }
            Expr::Lambda(_) => {
                self.env.diags.error(
                    DiagnosticKind::InternalCompilerError,
                    expr.span(),
                    "lambda reached lowering without having been lifted",
                );
                let void = self.env.types.void();
                (self.func.new_reg(void), void)
            }
            Expr::Range { lo, .. } => self.lower_expr(lo),
            Expr::StructLiteral { fields, ty: struct_name, span } => {
                let struct_ty = self
                    .named_types
                    .get(struct_name)
                    .copied()
                    .unwrap_or_else(|| self.env.types.void());
                let reg = self.func.new_reg(struct_ty);
                self.emit(Instruction::new(Opcode::LoadConst, struct_ty).with_dst(reg).with_imm(0));
                for (_, value_expr) in fields {
                    let (value_reg, field_ty) = self.lower_expr(value_expr);
                    self.emit(
                        Instruction::new(Opcode::StoreDirect, field_ty)
                            .with_src1(value_reg)
                            .with_comment(format!("struct literal field at {}", span)),
                    );
                }
                (reg, struct_ty)
            }
            Expr::ArrayLiteral { elements, .. } => {
                let element_ty = elements
                    .first()
                    .map(|_| self.env.types.u8())
                    .unwrap_or_else(|| self.env.types.void());
                let array_ty = self
                    .env
                    .types
                    .intern(TypeData::Array { element: element_ty, len: elements.len() as u32 });
                let reg = self.func.new_reg(array_ty);
                self.emit(Instruction::new(Opcode::LoadConst, array_ty).with_dst(reg).with_imm(0));
                for elem in elements {
                    self.lower_expr(elem);
                }
                (reg, array_ty)
            }
            Expr::Try { expr: inner, .. } => self.lower_try(inner, None),
            Expr::TryOrDefault { expr: inner, default, .. } => {
                self.lower_try(inner, Some(default))
            }
        }
    }

    fn lower_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, span: crate::span::Span) -> (Reg, TypeId) {
        let (lhs_reg, lhs_ty) = self.lower_expr(lhs);
        let (rhs_reg, rhs_ty) = self.lower_expr(rhs);

        let is_comparison = matches!(
            op,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        );
        let result_ty = if is_comparison || matches!(op, BinOp::LogicalAnd | BinOp::LogicalOr) {
            self.env.types.bool_()
        } else {
            if !typeck::check_assignable(rhs_ty, lhs_ty, span, self.env.types, self.env.diags)
                && !typeck::check_assignable(lhs_ty, rhs_ty, span, self.env.types, self.env.diags)
            {
                // Already reported; fall back to the lhs type so
                // lowering can proceed and surface further diagnostics.
            }
            lhs_ty
        };

        let opcode = match op {
            BinOp::Add => Opcode::Add,
            BinOp::Sub => Opcode::Sub,
            BinOp::Mul => Opcode::Mul,
            BinOp::Div => Opcode::Div,
            BinOp::Mod => Opcode::Mod,
            BinOp::And | BinOp::LogicalAnd => Opcode::And,
            BinOp::Or | BinOp::LogicalOr => Opcode::Or,
            BinOp::Xor => Opcode::Xor,
            BinOp::Shl => Opcode::Shl,
            BinOp::Shr => Opcode::Shr,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => Opcode::Cmp,
        };
        let cmp_op = match op {
            BinOp::Eq => Some(CmpOp::Eq),
            BinOp::Ne => Some(CmpOp::Ne),
            BinOp::Lt => Some(CmpOp::Lt),
            BinOp::Le => Some(CmpOp::Le),
            BinOp::Gt => Some(CmpOp::Gt),
            BinOp::Ge => Some(CmpOp::Ge),
            _ => None,
        };

        let dst = self.func.new_reg(result_ty);
        let mut inst = Instruction::new(opcode, result_ty).with_dst(dst).with_src1(lhs_reg).with_src2(rhs_reg);
        if let Some(cmp_op) = cmp_op {
            inst = inst.with_cmp_op(cmp_op);
        }
        self.emit(inst);
        (dst, result_ty)
    }

    fn lower_unary(&mut self, op: UnOp, operand: &Expr) -> (Reg, TypeId) {
        let (reg, ty) = self.lower_expr(operand);
        match op {
            UnOp::Neg => {
                let dst = self.func.new_reg(ty);
                self.emit(Instruction::new(Opcode::Neg, ty).with_dst(dst).with_src1(reg));
                (dst, ty)
            }
            UnOp::Not => {
                let dst = self.func.new_reg(ty);
                self.emit(Instruction::new(Opcode::Not, ty).with_dst(dst).with_src1(reg));
                (dst, ty)
            }
            UnOp::AddressOf => {
                let ptr_ty = self.env.types.intern(TypeData::Pointer { pointee: ty, mutable: true });
                let dst = self.func.new_reg(ptr_ty);
                self.emit(Instruction::new(Opcode::LoadAddr, ptr_ty).with_dst(dst).with_src1(reg));
                (dst, ptr_ty)
            }
            UnOp::Deref => {
                let pointee = match self.env.types.lookup(ty) {
                    TypeData::Pointer { pointee, .. } => *pointee,
                    _ => ty,
                };
                let dst = self.func.new_reg(pointee);
                self.emit(Instruction::new(Opcode::LoadDirect, pointee).with_dst(dst).with_src1(reg));
                (dst, pointee)
            }
        }
    }

    fn lower_call(&mut self, callee: &Expr, args: &[Expr], _span: crate::span::Span) -> (Reg, TypeId) {
        let arg_regs: Vec<Reg> = args.iter().map(|a| self.lower_expr(a).0).collect();

        let name = match callee {
            Expr::Identifier { name, .. } => Some(name.clone()),
            _ => None,
        };

        let ret_ty = self.env.types.u16();
        let dst = self.func.new_reg(ret_ty);
        let mut inst = Instruction::new(Opcode::Call, ret_ty).with_dst(dst);
        if let Some(name) = name {
            if let Some(&func_id) = self.env.functions.get(&name) {
                inst = inst.with_symbol(SymbolRef::Function(func_id, name));
            } else {
                inst = inst.with_symbol(SymbolRef::External(name));
            }
        }
        // The generic two-slot `srcs` can carry at most two argument
        // registers directly; additional arguments are threaded through
        // the SMC patch table / stack ABI by the backend, keyed by
        // argument index rather than by this instruction's operand
        // list (spec §4.5's calling-convention split).
        if let Some(&first) = arg_regs.first() {
            inst = inst.with_src1(first);
        }
        if let Some(&second) = arg_regs.get(1) {
            inst = inst.with_src2(second);
        }
        self.emit(inst);
        (dst, ret_ty)
    }

    /// `x.m(...)` — resolved directly to a concrete function via the
    /// `ImplTable`; no vtable is ever emitted (spec §4.2.4).
    fn lower_method_call(
        &mut self,
        receiver: &Expr,
        method: &str,
        args: &[Expr],
        span: crate::span::Span,
    ) -> (Reg, TypeId) {
        let (receiver_reg, receiver_ty) = self.lower_expr(receiver);
        let resolved = self.env.impls.resolve_any(receiver_ty, method);

        let arg_regs: Vec<Reg> = args.iter().map(|a| self.lower_expr(a).0).collect();
        let ret_ty = self.env.types.u16();
        let dst = self.func.new_reg(ret_ty);
        let mut inst = Instruction::new(Opcode::Call, ret_ty).with_dst(dst).with_src1(receiver_reg);

        match resolved {
            Some(func_id) => {
                inst = inst.with_symbol(SymbolRef::Function(func_id, method.to_string()));
            }
            None => {
                self.env.diags.error(
                    DiagnosticKind::UnknownIdentifier,
                    span,
                    format!("no method `{}` found for this type", method),
                );
            }
        }
        if let Some(&first) = arg_regs.first() {
            inst = inst.with_src2(first);
        }
        self.emit(inst);
        (dst, ret_ty)
    }

    /// Recognize `arr.iter().map(f).filter(g).forEach(h)`-shaped chains
    /// (spec §4.2.4's iterator-combinator sugar, spec §8 scenario 4) and
    /// fuse the whole chain into a single `DJNZ` loop shaped exactly
    /// like `lower_loop_over_array`'s, calling each stage's already-
    /// lifted function directly instead of materializing an
    /// intermediate iterator value per stage. By the time lowering
    /// sees this tree, `sema::lambda` has already replaced every stage
    /// closure with an `Identifier` naming a top-level lifted function
    /// (spec §4.2.2), so each stage resolves through `self.env.functions`
    /// exactly like an ordinary named call.
    ///
    /// Returns `None` (making no changes to `self`) for anything that
    /// isn't this exact shape, so the caller can fall back to the
    /// generic `lower_method_call` path.
    fn try_lower_iterator_chain(&mut self, expr: &Expr) -> Option<(Reg, TypeId)> {
        let Expr::MethodCall { receiver, args, .. } = expr else {
            return None;
        };
        let sink_fn = self.lookup_lifted_lambda(args.first()?)?;

        let mut stages: Vec<(bool, crate::mir::FuncId)> = Vec::new();
        let mut cursor: &Expr = receiver.as_ref();
        let array_expr = loop {
            match cursor {
                Expr::MethodCall { receiver, method, args, .. } if method == "map" || method == "filter" => {
                    let stage_fn = self.lookup_lifted_lambda(args.first()?)?;
                    stages.push((method == "filter", stage_fn));
                    cursor = receiver.as_ref();
                }
                Expr::MethodCall { receiver, method, args, .. } if method == "iter" && args.is_empty() => {
                    break receiver.as_ref();
                }
                _ => return None,
            }
        };
        stages.reverse();

        let (array_reg, array_ty) = self.lower_expr(array_expr);
        let element_ty = match self.env.types.lookup(array_ty) {
            TypeData::Array { element, .. } => *element,
            _ => self.env.types.u8(),
        };
        let bool_ty = self.env.types.bool_();
        let void = self.env.types.void();

        let header = self.func.new_block();
        self.emit(Instruction::new(Opcode::LoopStart, array_ty).with_src1(array_reg).with_label(header));
        self.current = header;

        let binding_reg = self.func.new_reg(element_ty);
        self.emit(Instruction::new(Opcode::CopyToBuffer, element_ty).with_dst(binding_reg).with_src1(array_reg));

        let skip = self.func.new_block();
        let mut current_reg = binding_reg;
        for (is_filter, stage_fn) in &stages {
            if *is_filter {
                let keep = self.func.new_reg(bool_ty);
                self.emit(
                    Instruction::new(Opcode::Call, bool_ty)
                        .with_dst(keep)
                        .with_src1(current_reg)
                        .with_symbol(SymbolRef::Function(*stage_fn, "filter".to_string())),
                );
                self.emit(Instruction::new(Opcode::JumpIfNot, bool_ty).with_src1(keep).with_label(skip));
            } else {
                let mapped_ty = self.env.types.u16();
                let mapped = self.func.new_reg(mapped_ty);
                self.emit(
                    Instruction::new(Opcode::Call, mapped_ty)
                        .with_dst(mapped)
                        .with_src1(current_reg)
                        .with_symbol(SymbolRef::Function(*stage_fn, "map".to_string())),
                );
                current_reg = mapped;
            }
        }

        let sink_dst = self.func.new_reg(void);
        self.emit(
            Instruction::new(Opcode::Call, void)
                .with_dst(sink_dst)
                .with_src1(current_reg)
                .with_symbol(SymbolRef::Function(sink_fn, "forEach".to_string())),
        );

        self.current = skip;
        self.emit(Instruction::new(Opcode::CopyFromBuffer, element_ty).with_src1(binding_reg));
        let counter = self.func.new_reg(self.env.types.u8());
        if !self.block_has_terminator(self.current) {
            self.emit(Instruction::new(Opcode::Djnz, element_ty).with_dst(counter).with_label(header));
        }
        self.current = self.func.new_block();
        self.emit(Instruction::new(Opcode::LoopEnd, array_ty));

        Some((sink_dst, void))
    }

    fn lookup_lifted_lambda(&self, expr: &Expr) -> Option<crate::mir::FuncId> {
        match expr {
            Expr::Identifier { name, .. } => self.env.functions.get(name).copied(),
            _ => None,
        }
    }

    /// `e?` / `e??` (spec §4.2.5): compare the result tag against
    /// `tryop::OK_TAG`, early-returning the error on mismatch (or
    /// substituting `default` for `??`), otherwise continuing with the
    /// ok payload.
    fn lower_try(&mut self, inner: &Expr, default: Option<&Expr>) -> (Reg, TypeId) {
        let (union_reg, union_ty) = self.lower_expr(inner);
        let Some(lowering) = tryop::TryLowering::for_union(union_ty, self.env.types) else {
            self.env.diags.error(
                DiagnosticKind::TypeMismatch,
                inner.span(),
                "`?` applied to a non error-union expression",
            );
            return (union_reg, union_ty);
        };

        let tag_ty = self.env.types.u8();
        let tag = self.func.new_reg(tag_ty);
        self.emit(Instruction::new(Opcode::LoadDirect, tag_ty).with_dst(tag).with_src1(union_reg));

        let ok_const = self.func.new_reg(tag_ty);
        self.emit(
            Instruction::new(Opcode::LoadConst, tag_ty)
                .with_dst(ok_const)
                .with_imm(tryop::OK_TAG),
        );
        let is_ok = self.func.new_reg(self.env.types.bool_());
        self.emit(
            Instruction::new(Opcode::Cmp, tag_ty)
                .with_dst(is_ok)
                .with_src1(tag)
                .with_src2(ok_const)
                .with_cmp_op(CmpOp::Eq),
        );

        let ok_block = self.func.new_block();
        let err_block = self.func.new_block();
        self.emit(Instruction::new(Opcode::JumpIfNot, tag_ty).with_src1(is_ok).with_label(err_block));

        self.current = err_block;
        match default {
            Some(default_expr) => {
                let (default_reg, _) = self.lower_expr(default_expr);
                self.emit(Instruction::new(Opcode::Jump, tag_ty).with_label(ok_block));
                self.current = ok_block;
                let result = self.func.new_reg(lowering.ok_ty);
                self.emit(
                    Instruction::new(Opcode::LoadDirect, lowering.ok_ty)
                        .with_dst(result)
                        .with_src1(union_reg)
                        .with_src2(default_reg),
                );
                (result, lowering.ok_ty)
            }
            None => {
                let ret_ty = self.func.ret_ty;
                self.emit(Instruction::new(Opcode::Return, ret_ty).with_src1(union_reg));
                self.current = ok_block;
                let result = self.func.new_reg(lowering.ok_ty);
                self.emit(
                    Instruction::new(Opcode::LoadDirect, lowering.ok_ty)
                        .with_dst(result)
                        .with_src1(union_reg),
                );
                (result, lowering.ok_ty)
            }
        }
    }

    fn emit(&mut self, inst: Instruction) {
        self.func.append_inst(self.current, inst);
    }
}

/// Assign a function's calling convention from its attributes (spec
/// §4.2.6 feeding into §4.5): explicit `@abi` wins, otherwise `@naked`,
/// else the SMC default.
pub fn calling_convention_for(decl: &FunctionDecl) -> CallConv {
    for attr in &decl.attributes {
        if let crate::ast::Attribute::Abi { convention, mapping } = attr {
            return match convention.as_str() {
                "stack" => CallConv::Stack,
                "shadow" => CallConv::Shadow,
                "register" => CallConv::Register(
                    mapping
                        .as_deref()
                        .unwrap_or("")
                        .split(',')
                        .filter_map(|pair| {
                            let mut it = pair.splitn(2, '=');
                            Some((it.next()?.trim().to_string(), it.next()?.trim().to_string()))
                        })
                        .collect(),
                ),
                _ => CallConv::Smc,
            };
        }
        if matches!(attr, crate::ast::Attribute::Naked) {
            return CallConv::Naked;
        }
    }
    CallConv::Smc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Attribute, Param};
    use crate::mir::MirModule;
    use crate::settings::CompileOptions;
    use crate::span::Span;

    fn ident(name: &str) -> Expr {
        Expr::Identifier { name: name.to_string(), span: Span::synthetic() }
    }

    #[test]
    fn simple_function_lowers_to_add_and_return() {
        let mut types = TypeInterner::new();
        let mut diags = DiagnosticBag::new();
        let functions = FxHashMap::default();
        let impls = ImplTable::new();
        let options = CompileOptions::default();
        let named_types = FxHashMap::default();
        let module_bindings = FxHashMap::default();

        let decl = FunctionDecl {
            name: "add".into(),
            params: vec![
                Param { name: "a".into(), ty: TypeExpr::Named("u8".into()), span: Span::synthetic() },
                Param { name: "b".into(), ty: TypeExpr::Named("u8".into()), span: Span::synthetic() },
            ],
            ret: TypeExpr::Named("u8".into()),
            body: Some(Block {
                stmts: vec![Stmt::Return {
                    value: Some(Expr::Binary {
                        op: BinOp::Add,
                        lhs: Box::new(ident("a")),
                        rhs: Box::new(ident("b")),
                        span: Span::synthetic(),
                    }),
                    span: Span::synthetic(),
                }],
            }),
            attributes: Vec::new(),
            is_public: true,
            span: Span::synthetic(),
        };

        let mut module = MirModule::new();
        let u8t = types.u8();
        let fid = module.declare("add", u8t);

        {
            let mut env = ModuleEnv::new(&mut types, &mut diags, &functions, &impls, &options, &module_bindings);
            let func = &mut module.functions[fid];
            let mut lowerer = FunctionLowerer::new(func, &mut env, &named_types);
            lowerer.lower_function_body(&decl);
        }

        assert!(!diags.has_errors());
        let func = &module.functions[fid];
        let has_add = func
            .blocks
            .values()
            .flat_map(|b| b.insts.iter())
            .any(|&id| func.insts[id].opcode == Opcode::Add);
        assert!(has_add);
    }

    #[test]
    fn naked_attribute_overrides_smc_default() {
        let decl = FunctionDecl {
            name: "isr".into(),
            params: Vec::new(),
            ret: TypeExpr::Named("void".into()),
            body: None,
            attributes: vec![Attribute::Naked],
            is_public: false,
            span: Span::synthetic(),
        };
        assert_eq!(calling_convention_for(&decl), CallConv::Naked);
    }
}
