//! The MIR function (spec §3.5): basic blocks, a register table, and
//! the attributes that drive calling-convention and SMC decisions.

use crate::mir::entities::{Block, FuncId, Inst, Reg};
use crate::mir::instructions::{Instruction, JumpTableId};
use crate::mir::smc::PatchTable;
use crate::regalloc::register_set::RegisterSet;
use crate::types::TypeId;
use minzc_entity::PrimaryMap;
use smallvec::SmallVec;

/// One function parameter, with the SMC-eligibility spec §3.5 tracks
/// per parameter (a captured lambda value, for instance, is not
/// eligible — it has already been embedded as an immediate).
#[derive(Clone, Debug)]
pub struct MirParam {
    pub name: String,
    pub ty: TypeId,
    pub is_smc_eligible: bool,
}

/// The calling convention tag (spec §4.5, §6.2's `@abi` attribute).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallConv {
    /// Parameters embedded as SMC immediates (the default, spec §4.5).
    Smc,
    /// Explicit register mapping from `@abi("register: A=x, HL=y")`.
    Register(Vec<(String, String)>),
    /// Parameters pushed right-to-left, accessed via IX/IY.
    Stack,
    /// Parameters exchanged to the shadow register bank.
    Shadow,
    /// No convention — the function author owns the ABI.
    Naked,
}

impl Default for CallConv {
    fn default() -> Self {
        CallConv::Smc
    }
}

/// The subset of spec §6.2's attribute vocabulary that affects codegen
/// directly (parsed `@abi`/`@extern`/etc. attributes are reduced to
/// this during lowering).
#[derive(Clone, Debug, Default)]
pub struct FunctionAttributes {
    pub is_extern: bool,
    pub is_interrupt: bool,
    pub interrupt_port: Option<u16>,
    pub is_inline_hint: bool,
    pub no_smc: bool,
    pub is_naked: bool,
}

/// Purity state for the function's body, computed by the optimizer's
/// purity-analysis pass (spec §4.3 step 1) via least-fixed-point over
/// the call graph.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Purity {
    /// Not yet analyzed — optimistic default while the fixed point is
    /// still converging.
    Unknown,
    Pure,
    Impure,
}

impl Default for Purity {
    fn default() -> Self {
        Purity::Unknown
    }
}

/// One basic block: its instruction list in layout order, plus the
/// explicit block parameters that model phi nodes at merge points
/// (spec §3.6's SSA-adjacent invariant).
#[derive(Clone, Debug, Default)]
pub struct BasicBlockData {
    /// Block parameters are a handful of phi-fed registers at most (the
    /// tail-call rewrite that's the only producer of non-entry block
    /// params caps itself at two, spec §4.3 step 4) — a `SmallVec`
    /// avoids a heap allocation per block for the common empty/small
    /// case.
    pub params: SmallVec<[Reg; 2]>,
    pub insts: Vec<Inst>,
}

/// A MIR function: the unit the optimizer, register allocator, and
/// backend each process in turn.
#[derive(Clone, Debug)]
pub struct MirFunction {
    pub id: FuncId,
    pub name: String,
    pub params: Vec<MirParam>,
    pub ret_ty: TypeId,
    pub blocks: PrimaryMap<Block, BasicBlockData>,
    /// Declaration/layout order of blocks, preserved through splitting
    /// and merging by the optimizer (spec §3.8).
    pub block_order: Vec<Block>,
    pub insts: PrimaryMap<Inst, Instruction>,
    pub jump_tables: PrimaryMap<JumpTableId, Vec<Block>>,
    /// The type of every virtual register minted in this function
    /// (spec §3.5's register table).
    pub regs: PrimaryMap<Reg, TypeId>,
    pub entry: Block,
    pub calling_convention: CallConv,
    pub attributes: FunctionAttributes,
    pub purity: Purity,
    pub is_direct_recursive: bool,
    pub is_tail_recursive: bool,
    pub smc_enabled: bool,
    pub patch_table: PatchTable,
    /// Registers this function (or, transitively, its callees) may
    /// clobber — populated by register-usage analysis (spec §4.3 step
    /// 5) and consulted by lean prologue/epilogue emission (spec §4.5
    /// step 2).
    pub modified_registers: RegisterSet,
}

impl MirFunction {
    pub fn new(id: FuncId, name: impl Into<String>, ret_ty: TypeId) -> Self {
        let mut blocks = PrimaryMap::new();
        let entry = blocks.push(BasicBlockData::default());
        Self {
            id,
            name: name.into(),
            params: Vec::new(),
            ret_ty,
            blocks,
            block_order: vec![entry],
            insts: PrimaryMap::new(),
            jump_tables: PrimaryMap::new(),
            regs: PrimaryMap::new(),
            entry,
            calling_convention: CallConv::default(),
            attributes: FunctionAttributes::default(),
            purity: Purity::default(),
            is_direct_recursive: false,
            is_tail_recursive: false,
            smc_enabled: true,
            patch_table: PatchTable::default(),
            modified_registers: RegisterSet::empty(),
        }
    }

    /// Allocate a fresh virtual register of type `ty`.
    pub fn new_reg(&mut self, ty: TypeId) -> Reg {
        self.regs.push(ty)
    }

    /// Create a new empty block, appending it to layout order.
    pub fn new_block(&mut self) -> Block {
        let b = self.blocks.push(BasicBlockData::default());
        self.block_order.push(b);
        b
    }

    /// Append `inst` to the end of `block`'s instruction list.
    pub fn append_inst(&mut self, block: Block, inst: Instruction) -> Inst {
        let id = self.insts.push(inst);
        self.blocks[block].insts.push(id);
        id
    }

    /// Whether this function is eligible for the SMC rewrite pass at
    /// all (spec §4.3 step 6): not `@no-smc`, not an interrupt handler,
    /// and not `@naked`, with at least one SMC-eligible parameter.
    pub fn smc_eligible(&self) -> bool {
        self.smc_enabled
            && !self.attributes.no_smc
            && !self.attributes.is_interrupt
            && !self.attributes.is_naked
            && self.params.iter().any(|p| p.is_smc_eligible)
    }

    pub fn is_pure(&self) -> bool {
        self.purity == Purity::Pure
    }
}
