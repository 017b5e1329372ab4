//! Purity analysis (spec §4.3 step 1): a least-fixed-point over the
//! call graph, starting optimistic (every function assumed `Pure`) and
//! refuting on evidence — a side-effecting opcode in the body, or a
//! call to something not (yet) known pure. Converges in at most
//! `functions.len()` rounds since each round can only flip `Pure` to
//! `Impure`, never back.

use crate::mir::{FuncId, MirModule, Opcode, Purity, SymbolRef};
use rustc_hash::FxHashMap;

pub fn analyze(module: &mut MirModule) {
    for func in module.functions.values_mut() {
        func.purity = Purity::Pure;
    }

    let ids: Vec<FuncId> = module.functions.keys().collect();
    for _round in 0..=ids.len() {
        let snapshot: FxHashMap<FuncId, bool> = module
            .functions
            .iter()
            .map(|(id, f)| (id, f.purity == Purity::Pure))
            .collect();

        let mut changed = false;
        for &id in &ids {
            let new_pure = is_pure(&module.functions[id], &snapshot);
            let func = &mut module.functions[id];
            let new_purity = if new_pure { Purity::Pure } else { Purity::Impure };
            if func.purity != new_purity {
                func.purity = new_purity;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

fn is_pure(func: &crate::mir::MirFunction, snapshot: &FxHashMap<FuncId, bool>) -> bool {
    for &block in &func.block_order {
        for &inst_id in &func.blocks[block].insts {
            let inst = &func.insts[inst_id];
            match inst.opcode {
                Opcode::Call | Opcode::TailCall => match &inst.symbol {
                    Some(SymbolRef::Function(callee, _)) => {
                        if !snapshot.get(callee).copied().unwrap_or(false) {
                            return false;
                        }
                    }
                    _ => return false,
                },
                other if other.is_side_effecting() => return false,
                _ => {}
            }
        }
    }
    true
}
