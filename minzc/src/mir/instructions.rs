//! MIR opcodes and the instruction shape that carries them (spec §3.6).

use crate::mir::entities::{Block, FuncId, Reg};
use crate::types::TypeId;
use std::fmt;

/// A reference to something outside the current function: a global
/// variable, an external symbol, or another function by name. Kept as
/// a qualified name rather than a resolved `SymbolId` so MIR stays
/// meaningful to print/inspect independent of a live symbol table.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum SymbolRef {
    Global(String),
    Function(FuncId, String),
    External(String),
}

impl fmt::Display for SymbolRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SymbolRef::Global(name) => write!(f, "{}", name),
            SymbolRef::Function(_, name) => write!(f, "{}", name),
            SymbolRef::External(name) => write!(f, "{}", name),
        }
    }
}

/// Which of spec §4.2.2's six relational operators a `Cmp` instruction
/// evaluates. Carried on the instruction itself (rather than inferred
/// from context) so every later consumer — constant folding, CTIE,
/// instruction selection — can act on a comparison without having to
/// recover the source-level operator from the surrounding control flow.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn eval(self, a: i64, b: i64) -> bool {
        match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

/// Identifies one jump table's target list, stored on the owning
/// `MirFunction` rather than inline in the instruction (an
/// implementation supplement over the spec's single generic "label
/// reference" field, needed because `JumpTable` has more than one
/// target — see `MirFunction::jump_tables`).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JumpTableId(pub u32);

/// The opcode families named in spec §3.6.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Opcode {
    // --- Value motion ---
    LoadConst,
    LoadVar,
    StoreVar,
    LoadParam,
    LoadLabel,
    LoadAddr,

    // --- Arithmetic/logical ---
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,

    // --- Comparison/branch ---
    Cmp,
    JumpIf,
    JumpIfNot,
    Jump,
    JumpTable,

    // --- Memory ---
    LoadDirect,
    StoreDirect,
    IndexLoad,
    IndexStore,

    // --- Calls ---
    Call,
    CallIndirect,
    Return,
    TailCall,

    // --- Structured iteration ---
    LoopStart,
    CopyToBuffer,
    CopyFromBuffer,
    Djnz,
    LoopEnd,

    // --- Bit fields & I/O ---
    BitExtract,
    BitInsert,
    PortIn,
    PortOut,

    // --- SMC primitives ---
    SmcAnchor,
    SmcPatch,
    SmcLoad,
}

impl Opcode {
    /// True for opcodes whose block is a terminator: every basic block
    /// must end with exactly one of these (spec §3.6 invariant).
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Jump
                | Opcode::JumpIf
                | Opcode::JumpIfNot
                | Opcode::JumpTable
                | Opcode::Return
                | Opcode::TailCall
                | Opcode::Djnz
        )
    }

    /// True for opcodes that perform observable I/O or write memory
    /// outside the function's own locals — used by purity analysis
    /// (spec §4.3 step 1).
    pub fn is_side_effecting(self) -> bool {
        matches!(
            self,
            Opcode::StoreDirect
                | Opcode::IndexStore
                | Opcode::PortIn
                | Opcode::PortOut
                | Opcode::Call
                | Opcode::CallIndirect
                | Opcode::TailCall
                | Opcode::SmcPatch
                | Opcode::CopyToBuffer
                | Opcode::CopyFromBuffer
        )
    }
}

/// One MIR instruction. Every opcode interprets the generic fields
/// differently; see the per-opcode notes in `opt`/`isa::z80::emit`.
#[derive(Clone, Debug)]
pub struct Instruction {
    pub opcode: Opcode,
    pub dst: Option<Reg>,
    pub srcs: [Option<Reg>; 2],
    pub imm: Option<i64>,
    pub symbol: Option<SymbolRef>,
    pub label: Option<Block>,
    pub jump_table: Option<JumpTableId>,
    pub ty: TypeId,
    /// Set by the SMC rewrite pass on the anchor instruction itself.
    pub smc_anchor: Option<String>,
    /// Set on `SmcPatch` instructions: the target function's anchor
    /// immediate-label being written.
    pub smc_target: Option<String>,
    pub comment: Option<String>,
    /// Set on `Cmp` instructions only: which relational operator it
    /// evaluates (spec §4.2.2).
    pub cmp_op: Option<CmpOp>,
}

impl Instruction {
    pub fn new(opcode: Opcode, ty: TypeId) -> Self {
        Self {
            opcode,
            dst: None,
            srcs: [None, None],
            imm: None,
            symbol: None,
            label: None,
            jump_table: None,
            ty,
            smc_anchor: None,
            smc_target: None,
            comment: None,
            cmp_op: None,
        }
    }

    pub fn with_dst(mut self, dst: Reg) -> Self {
        self.dst = Some(dst);
        self
    }

    pub fn with_src1(mut self, src: Reg) -> Self {
        self.srcs[0] = Some(src);
        self
    }

    pub fn with_src2(mut self, src: Reg) -> Self {
        self.srcs[1] = Some(src);
        self
    }

    pub fn with_imm(mut self, imm: i64) -> Self {
        self.imm = Some(imm);
        self
    }

    pub fn with_symbol(mut self, symbol: SymbolRef) -> Self {
        self.symbol = Some(symbol);
        self
    }

    pub fn with_label(mut self, label: Block) -> Self {
        self.label = Some(label);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_cmp_op(mut self, op: CmpOp) -> Self {
        self.cmp_op = Some(op);
        self
    }

    /// Registers read by this instruction (used by liveness and DCE).
    pub fn reads(&self) -> impl Iterator<Item = Reg> + '_ {
        self.srcs.iter().filter_map(|r| *r)
    }
}
