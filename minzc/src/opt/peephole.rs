//! Peephole optimization (spec §4.3 step 7): local algebraic
//! simplifications — `x + 0`, `x - 0`, `x | 0`, `x << 0`, `x >> 0`, and
//! `x * 1` all reduce to `x` — applied to a bounded fixed point so one
//! round's simplification can feed the next (e.g. folding `x + 0` may
//! expose a now-redundant `LoadConst` for a register nothing else
//! reads, which DCE cleans up afterward).
//!
//! Bounded rather than run-to-convergence: a pathological input could
//! in principle keep finding new (vanishingly small) simplifications
//! forever, and `options.peephole_max_rounds` is the backstop, the same
//! way the CTIE interpreter is bounded by a step budget rather than
//! trusted to terminate on its own.

use crate::mir::{MirFunction, Opcode, Reg};
use crate::opt::{substitute_regs_except, PassResult};
use rustc_hash::FxHashMap;
use std::collections::HashSet;

pub fn run(func: &mut MirFunction, max_rounds: u32) -> PassResult {
    let mut any_changed = false;
    for _ in 0..max_rounds.max(1) {
        if !run_one_round(func) {
            break;
        }
        any_changed = true;
    }
    PassResult::changed(any_changed)
}

fn run_one_round(func: &mut MirFunction) -> bool {
    let mut consts: FxHashMap<Reg, i64> = FxHashMap::default();
    let mut subst: FxHashMap<Reg, Reg> = FxHashMap::default();
    let mut dead: HashSet<crate::mir::Inst> = HashSet::new();

    for &block in &func.block_order.clone() {
        for &inst_id in &func.blocks[block].insts.clone() {
            let inst = func.insts[inst_id].clone();
            if inst.opcode == Opcode::LoadConst {
                if let (Some(dst), Some(imm)) = (inst.dst, inst.imm) {
                    consts.insert(dst, imm);
                }
                continue;
            }

            let identity_operand = match inst.opcode {
                Opcode::Add | Opcode::Sub | Opcode::Or | Opcode::Shl | Opcode::Shr => {
                    identity_of(&inst, &consts, 0)
                }
                Opcode::Mul => identity_of(&inst, &consts, 1),
                _ => None,
            };

            if let (Some(dst), Some(kept)) = (inst.dst, identity_operand) {
                subst.insert(dst, kept);
                dead.insert(inst_id);
            }
        }
    }

    if dead.is_empty() {
        return false;
    }

    substitute_regs_except(func, &subst, &[]);

    for &block in &func.block_order.clone() {
        func.blocks[block].insts.retain(|id| !dead.contains(id));
    }

    true
}

/// If `inst` is a binary op with one operand a known constant equal to
/// `identity`, return the *other* (surviving) operand register.
fn identity_of(
    inst: &crate::mir::Instruction,
    consts: &FxHashMap<Reg, i64>,
    identity: i64,
) -> Option<Reg> {
    let a = inst.srcs[0]?;
    let b = inst.srcs[1]?;
    let a_const = consts.get(&a).copied();
    let b_const = consts.get(&b).copied();

    // `x - 0` keeps `a`; `0 + x`/`x + 0` and the commutative ops can
    // drop whichever side is the identity, but `Sub` and `Shl`/`Shr`
    // are not commutative, so only the right-hand identity applies to
    // those.
    match inst.opcode {
        Opcode::Sub | Opcode::Shl | Opcode::Shr => {
            if b_const == Some(identity) {
                Some(a)
            } else {
                None
            }
        }
        _ => {
            if b_const == Some(identity) {
                Some(a)
            } else if a_const == Some(identity) {
                Some(b)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{Instruction, MirModule, Opcode};
    use crate::types::TypeInterner;

    #[test]
    fn adding_zero_is_eliminated() {
        let mut types = TypeInterner::new();
        let u8t = types.u8();
        let mut module = MirModule::new();
        let fid = module.declare("f", u8t);
        let func = &mut module.functions[fid];
        let x = func.new_reg(u8t);
        let zero = func.new_reg(u8t);
        let y = func.new_reg(u8t);
        let entry = func.entry;
        func.append_inst(entry, Instruction::new(Opcode::LoadParam, u8t).with_dst(x));
        func.append_inst(entry, Instruction::new(Opcode::LoadConst, u8t).with_dst(zero).with_imm(0));
        func.append_inst(
            entry,
            Instruction::new(Opcode::Add, u8t).with_dst(y).with_src1(x).with_src2(zero),
        );
        func.append_inst(entry, Instruction::new(Opcode::Return, u8t).with_src1(y));

        let result = run(func, 4);
        assert!(result.is_changed());
        let insts: Vec<_> = func.blocks[entry]
            .insts
            .iter()
            .map(|&id| func.insts[id].opcode)
            .collect();
        assert!(!insts.contains(&Opcode::Add));

        let ret_id = *func.blocks[entry].insts.last().unwrap();
        assert_eq!(func.insts[ret_id].srcs[0], Some(x));
    }

    #[test]
    fn subtracting_zero_keeps_left_operand_only() {
        let mut types = TypeInterner::new();
        let u8t = types.u8();
        let mut module = MirModule::new();
        let fid = module.declare("f", u8t);
        let func = &mut module.functions[fid];
        let x = func.new_reg(u8t);
        let zero = func.new_reg(u8t);
        let y = func.new_reg(u8t);
        let entry = func.entry;
        func.append_inst(entry, Instruction::new(Opcode::LoadParam, u8t).with_dst(x));
        func.append_inst(entry, Instruction::new(Opcode::LoadConst, u8t).with_dst(zero).with_imm(0));
        func.append_inst(
            entry,
            Instruction::new(Opcode::Sub, u8t).with_dst(y).with_src1(x).with_src2(zero),
        );
        func.append_inst(entry, Instruction::new(Opcode::Return, u8t).with_src1(y));

        run(func, 4);
        let ret_id = *func.blocks[entry].insts.last().unwrap();
        assert_eq!(func.insts[ret_id].srcs[0], Some(x));
    }
}
