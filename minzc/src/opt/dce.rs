//! Dead-code elimination (spec §4.3 step 8, final pass): removes
//! instructions whose result is never read and has no side effect,
//! prunes basic blocks no longer reachable from `entry`, and drops the
//! now-stale patch-table entries whose anchor instruction DCE itself
//! just removed.
//!
//! Runs last in the fixed pass order so it gets the benefit of every
//! earlier pass's simplifications — constant folding and the peephole
//! pass both routinely leave behind a `LoadConst` or arithmetic result
//! with no remaining reader.

use crate::mir::{Block, Inst, MirFunction};
use crate::opt::PassResult;
use std::collections::HashSet;

pub fn run(func: &mut MirFunction) -> PassResult {
    let mut changed = false;
    changed |= remove_dead_instructions(func);
    changed |= prune_unreachable_blocks(func);
    changed |= prune_stale_patch_entries(func);
    PassResult::changed(changed)
}

fn remove_dead_instructions(func: &mut MirFunction) -> bool {
    let mut any_changed = false;
    loop {
        let mut read: HashSet<crate::mir::Reg> = HashSet::new();
        for &block in &func.block_order {
            for &reg in &func.blocks[block].params {
                read.insert(reg);
            }
            for &inst_id in &func.blocks[block].insts {
                for r in func.insts[inst_id].reads() {
                    read.insert(r);
                }
            }
        }
        let mut dead: HashSet<Inst> = HashSet::new();
        for &block in &func.block_order {
            for &inst_id in &func.blocks[block].insts {
                let inst = &func.insts[inst_id];
                if inst.opcode.is_terminator() || inst.opcode.is_side_effecting() {
                    continue;
                }
                if let Some(dst) = inst.dst {
                    if !read.contains(&dst) {
                        dead.insert(inst_id);
                    }
                }
            }
        }

        if dead.is_empty() {
            break;
        }
        any_changed = true;
        for &block in &func.block_order.clone() {
            func.blocks[block].insts.retain(|id| !dead.contains(id));
        }
    }
    any_changed
}

fn prune_unreachable_blocks(func: &mut MirFunction) -> bool {
    let mut reachable: HashSet<Block> = HashSet::new();
    let mut stack = vec![func.entry];
    while let Some(block) = stack.pop() {
        if !reachable.insert(block) {
            continue;
        }
        for &inst_id in &func.blocks[block].insts {
            let inst = &func.insts[inst_id];
            if let Some(target) = inst.label {
                stack.push(target);
            }
            if let Some(jt) = inst.jump_table {
                for &target in &func.jump_tables[jt] {
                    stack.push(target);
                }
            }
        }
    }

    let before = func.block_order.len();
    func.block_order.retain(|b| reachable.contains(b));
    func.block_order.len() != before
}

fn prune_stale_patch_entries(func: &mut MirFunction) -> bool {
    let mut live_anchors: HashSet<String> = HashSet::new();
    for &block in &func.block_order {
        for &inst_id in &func.blocks[block].insts {
            if let Some(anchor) = &func.insts[inst_id].smc_anchor {
                live_anchors.insert(anchor.clone());
            }
        }
    }

    let before = func.patch_table.entries.len();
    func.patch_table
        .entries
        .retain(|e| live_anchors.contains(&anchor_instruction_label(e)));
    func.patch_table.entries.len() != before
}

/// `PatchTableEntry::anchor_label` holds the immediate label
/// (`..._param_x`); the instruction's own `smc_anchor` field holds the
/// operand label (`..._param_x.op`) set by the SMC rewrite pass — these
/// are the two halves of one `SmcAnchor`, derivable from each other by
/// the `.op` suffix convention `SmcAnchor::new` establishes.
fn anchor_instruction_label(entry: &crate::mir::PatchTableEntry) -> String {
    format!("{}.op", entry.anchor_label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{Instruction, MirModule, Opcode};
    use crate::types::TypeInterner;

    #[test]
    fn unused_constant_is_removed() {
        let mut types = TypeInterner::new();
        let u8t = types.u8();
        let mut module = MirModule::new();
        let fid = module.declare("f", u8t);
        let func = &mut module.functions[fid];
        let unused = func.new_reg(u8t);
        let entry = func.entry;
        func.append_inst(entry, Instruction::new(Opcode::LoadConst, u8t).with_dst(unused).with_imm(42));
        func.append_inst(entry, Instruction::new(Opcode::Return, u8t));

        let result = run(func);
        assert!(result.is_changed());
        assert!(func.blocks[entry].insts.len() == 1);
    }

    #[test]
    fn unreachable_block_is_pruned() {
        let mut types = TypeInterner::new();
        let u8t = types.u8();
        let mut module = MirModule::new();
        let fid = module.declare("f", u8t);
        let func = &mut module.functions[fid];
        let entry = func.entry;
        let dead_block = func.new_block();
        func.append_inst(entry, Instruction::new(Opcode::Return, u8t));
        func.append_inst(dead_block, Instruction::new(Opcode::Return, u8t));

        let result = run(func);
        assert!(result.is_changed());
        assert!(!func.block_order.contains(&dead_block));
    }
}
