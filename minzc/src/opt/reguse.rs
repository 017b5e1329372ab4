//! Register-usage analysis (spec §4.3 step 5): for every function,
//! compute the set of main-bank registers its body (and everything it
//! calls) can touch, so the code generator's lean prologue/epilogue
//! (spec §4.5 step 2) only saves what actually needs saving instead of
//! the whole callee-saved file.
//!
//! This is a whole-module least-fixed-point for the same reason purity
//! analysis is: a function's clobber set depends on its callees', so a
//! single function-at-a-time pass would see stale information for
//! anything but a pure leaf. The set only ever grows round over round
//! (clobbers are discovered, never retracted), so it converges in at
//! most `functions.len() + 1` rounds just like purity.

use crate::mir::{FuncId, MirModule, Opcode, SymbolRef};
use crate::regalloc::context::pin_for;
use crate::regalloc::register_set::RegisterSet;
use rustc_hash::FxHashMap;

pub fn run_module(module: &mut MirModule) {
    let ids: Vec<FuncId> = module.functions.keys().collect();

    for func in module.functions.values_mut() {
        func.modified_registers = local_clobbers(func);
    }

    for _round in 0..=ids.len() {
        let snapshot: FxHashMap<FuncId, RegisterSet> = module
            .functions
            .iter()
            .map(|(id, f)| (id, f.modified_registers))
            .collect();

        let mut changed = false;
        for &id in &ids {
            let mut set = snapshot[&id];
            let before = set;
            for &block in &module.functions[id].block_order {
                for &inst_id in &module.functions[id].blocks[block].insts {
                    let inst = &module.functions[id].insts[inst_id];
                    match inst.opcode {
                        Opcode::CallIndirect | Opcode::TailCall => {
                            set = RegisterSet::new();
                        }
                        Opcode::Call => match &inst.symbol {
                            Some(SymbolRef::Function(callee, _)) => {
                                if let Some(&callee_set) = snapshot.get(callee) {
                                    set.union(&callee_set);
                                } else {
                                    set = RegisterSet::new();
                                }
                            }
                            _ => set = RegisterSet::new(),
                        },
                        _ => {}
                    }
                }
            }
            if set != before {
                module.functions[id].modified_registers = set;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

/// Registers pinned by this function's own instructions (DJNZ's `B`,
/// the block-copy helpers' `HL`/`DE`, `LoopStart`'s `BC`), independent
/// of anything it calls.
fn local_clobbers(func: &crate::mir::MirFunction) -> RegisterSet {
    let mut set = RegisterSet::empty();
    for &block in &func.block_order {
        for &inst_id in &func.blocks[block].insts {
            let inst = &func.insts[inst_id];
            for operand_index in 0..2 {
                if let Some(reg) = pin_for(inst.opcode, operand_index) {
                    set.mark_used(reg);
                }
            }
        }
    }
    set
}
