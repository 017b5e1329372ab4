//! The MIR (spec §3.5–§3.8): a low-level, register-based IR sitting
//! between the semantic analyzer and the optimizer/backend.

pub mod entities;
pub mod function;
pub mod instructions;
pub mod smc;

pub use entities::{Block, FuncId, Inst, Reg};
pub use function::{BasicBlockData, CallConv, FunctionAttributes, MirFunction, MirParam, Purity};
pub use instructions::{CmpOp, Instruction, JumpTableId, Opcode, SymbolRef};
pub use smc::{AnchorWidth, PatchTable, PatchTableEntry, SmcAnchor};

use crate::types::TypeId;
use minzc_entity::PrimaryMap;

/// One module-level `global` binding (spec §9): a fixed address in the
/// data region, its type, and its compile-time-evaluated initial value.
/// Emitted by the backend after all function code, in declaration order
/// (spec §6.3).
#[derive(Clone, Debug)]
pub struct GlobalDef {
    pub name: String,
    pub ty: TypeId,
    pub addr: u16,
    pub init_value: i64,
}

/// A MIR module: every function produced by lowering one source
/// module, in source declaration order (spec §6.3's emission-order
/// guarantee).
#[derive(Clone, Debug, Default)]
pub struct MirModule {
    pub functions: PrimaryMap<FuncId, MirFunction>,
    /// `FuncId`s in source declaration order, independent of
    /// `functions`'s insertion order (lambda lifting and
    /// monomorphization append synthesized functions after all
    /// original declarations).
    pub declaration_order: Vec<FuncId>,
    /// `global` declarations, in source declaration order (spec §9).
    pub globals: Vec<GlobalDef>,
}

impl MirModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: impl Into<String>, ret_ty: crate::types::TypeId) -> FuncId {
        let id = self.functions.next_key();
        let func = MirFunction::new(id, name, ret_ty);
        let pushed = self.functions.push(func);
        debug_assert_eq!(id, pushed);
        self.declaration_order.push(id);
        id
    }

    pub fn by_name(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .find(|(_, f)| f.name == name)
            .map(|(id, _)| id)
    }
}
