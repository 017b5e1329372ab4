//! Tail-call rewrite (spec §4.3 step 4): a self-recursive call in tail
//! position — `Call self(...)` immediately followed by `Return` of its
//! result, with no other work left in the block — is rewritten into a
//! jump back to a loop header, turning unbounded stack growth into a
//! fixed-size loop (spec §8 scenario 2: "a loop with no recursive
//! CALL").
//!
//! The block-argument mechanism this relies on (a `Jump`'s `srcs`
//! feeding a target block's `params`, the same shape liveness already
//! treats as ordinary reads via `Instruction::reads`) only has two
//! slots, so this pass — like the `Call` instruction it rewrites —
//! is limited to functions of at most two parameters.

use crate::mir::{Block, CallConv, Inst, MirFunction, Opcode, Reg, SymbolRef};
use crate::opt::{substitute_regs_except, PassResult};
use rustc_hash::FxHashMap;

pub fn run(func: &mut MirFunction) -> PassResult {
    if func.params.is_empty() || func.params.len() > 2 {
        return PassResult::Unchanged;
    }
    if func.calling_convention == CallConv::Naked || func.attributes.is_naked {
        return PassResult::Unchanged;
    }

    let tail_sites = find_tail_sites(func);
    if tail_sites.is_empty() {
        return PassResult::Unchanged;
    }

    let entry = func.entry;
    let orig_param_regs = entry_param_regs(func, entry);
    if orig_param_regs.len() != func.params.len() {
        return PassResult::Unchanged;
    }

    // Split the entry block: the `LoadParam`s stay there, everything
    // else moves into a fresh loop header with its own block params.
    let header = func.new_block();
    let prologue_len = orig_param_regs.len();
    let body_insts: Vec<Inst> = func.blocks[entry].insts.split_off(prologue_len);
    func.blocks[header].insts = body_insts;

    let param_types: Vec<_> = func.params.iter().map(|p| p.ty).collect();
    let new_param_regs: smallvec::SmallVec<[Reg; 2]> =
        param_types.into_iter().map(|ty| func.new_reg(ty)).collect();
    func.blocks[header].params = new_param_regs.clone();

    let subst: FxHashMap<Reg, Reg> = orig_param_regs
        .iter()
        .copied()
        .zip(new_param_regs.iter().copied())
        .collect();
    substitute_regs_except(func, &subst, &[entry]);

    let void = func.ret_ty;
    let mut jump_to_header = crate::mir::Instruction::new(Opcode::Jump, void).with_label(header);
    for (i, &reg) in orig_param_regs.iter().enumerate() {
        if i == 0 {
            jump_to_header = jump_to_header.with_src1(reg);
        } else {
            jump_to_header = jump_to_header.with_src2(reg);
        }
    }
    func.append_inst(entry, jump_to_header);
    func.block_order = {
        let mut order = func.block_order.clone();
        // Put the header right after entry for readable layout; any
        // order is semantically fine since `block_order` only governs
        // presentation and liveness linearization, not control flow.
        order.retain(|&b| b != header);
        let entry_pos = order.iter().position(|&b| b == entry).unwrap_or(0);
        order.insert(entry_pos + 1, header);
        order
    };

    // Rewrite the tail-call sites (now inside substituted blocks) into
    // jumps back to `header`, carrying the call's argument registers.
    for (block, call_inst, return_inst) in tail_sites {
        let call = func.insts[call_inst].clone();
        let mut jump = crate::mir::Instruction::new(Opcode::Jump, void).with_label(header);
        if let Some(a) = call.srcs[0] {
            jump = jump.with_src1(a);
        }
        if let Some(b) = call.srcs[1] {
            jump = jump.with_src2(b);
        }
        func.insts[call_inst] = jump;
        func.blocks[block].insts.retain(|&i| i != return_inst);
    }

    func.is_tail_recursive = true;
    PassResult::Changed
}

fn entry_param_regs(func: &MirFunction, entry: Block) -> Vec<Reg> {
    let mut pairs: Vec<(i64, Reg)> = func.blocks[entry]
        .insts
        .iter()
        .filter_map(|&id| {
            let inst = &func.insts[id];
            if inst.opcode == Opcode::LoadParam {
                Some((inst.imm.unwrap_or(0), inst.dst?))
            } else {
                None
            }
        })
        .collect();
    pairs.sort_by_key(|&(idx, _)| idx);
    pairs.into_iter().map(|(_, r)| r).collect()
}

/// Find every block whose last two instructions are `Call(self) ; Return(call.dst)`.
fn find_tail_sites(func: &MirFunction) -> Vec<(Block, Inst, Inst)> {
    let mut sites = Vec::new();
    for &block in &func.block_order {
        let insts = &func.blocks[block].insts;
        if insts.len() < 2 {
            continue;
        }
        let return_inst = insts[insts.len() - 1];
        let call_inst = insts[insts.len() - 2];
        let ret = &func.insts[return_inst];
        let call = &func.insts[call_inst];
        if ret.opcode != Opcode::Return || call.opcode != Opcode::Call {
            continue;
        }
        if ret.srcs[0].is_some() && ret.srcs[0] != call.dst {
            continue;
        }
        match &call.symbol {
            Some(SymbolRef::Function(callee, _)) if *callee == func.id => {
                sites.push((block, call_inst, return_inst));
            }
            _ => {}
        }
    }
    sites
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{Instruction, MirModule};
    use crate::types::TypeInterner;

    #[test]
    fn self_recursive_tail_call_becomes_a_jump() {
        let mut types = TypeInterner::new();
        let u16t = types.u16();
        let mut module = MirModule::new();
        let fid = module.declare("sum_tail", u16t);
        let func = &mut module.functions[fid];
        func.params.push(crate::mir::MirParam {
            name: "n".into(),
            ty: u16t,
            is_smc_eligible: true,
        });
        func.params.push(crate::mir::MirParam {
            name: "acc".into(),
            ty: u16t,
            is_smc_eligible: true,
        });

        let n = func.new_reg(u16t);
        let acc = func.new_reg(u16t);
        let entry = func.entry;
        func.append_inst(entry, Instruction::new(Opcode::LoadParam, u16t).with_dst(n).with_imm(0));
        func.append_inst(entry, Instruction::new(Opcode::LoadParam, u16t).with_dst(acc).with_imm(1));

        let one = func.new_reg(u16t);
        func.append_inst(entry, Instruction::new(Opcode::LoadConst, u16t).with_dst(one).with_imm(1));
        let next_n = func.new_reg(u16t);
        func.append_inst(
            entry,
            Instruction::new(Opcode::Sub, u16t).with_dst(next_n).with_src1(n).with_src2(one),
        );
        let next_acc = func.new_reg(u16t);
        func.append_inst(
            entry,
            Instruction::new(Opcode::Add, u16t).with_dst(next_acc).with_src1(acc).with_src2(n),
        );
        let result = func.new_reg(u16t);
        func.append_inst(
            entry,
            Instruction::new(Opcode::Call, u16t)
                .with_dst(result)
                .with_src1(next_n)
                .with_src2(next_acc)
                .with_symbol(SymbolRef::Function(fid, "sum_tail".into())),
        );
        func.append_inst(entry, Instruction::new(Opcode::Return, u16t).with_src1(result));

        let result = run(func);
        assert!(result.is_changed());
        assert!(func.is_tail_recursive);

        // No Call opcode should remain anywhere in the function.
        for &block in &func.block_order {
            for &inst_id in &func.blocks[block].insts {
                assert_ne!(func.insts[inst_id].opcode, Opcode::Call);
            }
        }
    }
}
