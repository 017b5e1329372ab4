//! Compile-Time Interface Execution (spec §4.3 step 3): calls to pure
//! functions with constant-folded arguments are evaluated at compile
//! time by a small MIR interpreter and replaced with the result,
//! folding `add(5, 3)` straight down to `LD A, 8` (spec §8 scenario 1).
//!
//! The interpreter is bounded by a step budget (`CompileOptions::ctie_step_budget`,
//! spec §5): a call that would blow the budget is left as an ordinary
//! `Call` and a `CtieBudgetExceeded` warning is recorded. The
//! interpreter understands branches (`Cmp`, `Jump`, `JumpIf`/
//! `JumpIfNot`) so a pure recursive function with a base-case
//! comparison folds too, not only straight-line arithmetic. A callee
//! touching memory, indirect control flow, or anything else this
//! interpreter doesn't model is left alone, silently: that's a
//! capability gap, not a budget problem, so it gets no diagnostic.

use crate::diagnostics::{DiagnosticBag, DiagnosticKind};
use crate::mir::{FuncId, Instruction, MirFunction, MirModule, Opcode, Reg, SymbolRef};
use crate::settings::CompileOptions;
use crate::span::Span;
use rustc_hash::FxHashMap;

enum InterpOutcome {
    Value(i64),
    BudgetExceeded,
    Unsupported,
}

struct Interpreter<'a> {
    module: &'a MirModule,
    budget: u32,
}

impl<'a> Interpreter<'a> {
    fn run(&mut self, func: &MirFunction, args: &[i64]) -> InterpOutcome {
        let mut regs: FxHashMap<Reg, i64> = FxHashMap::default();
        let mut block = func.entry;
        let mut param_index = 0usize;

        loop {
            let insts = func.blocks[block].insts.clone();
            let mut next_block: Option<crate::mir::Block> = None;
            let mut returned: Option<i64> = None;

            for inst_id in insts {
                if self.budget == 0 {
                    return InterpOutcome::BudgetExceeded;
                }
                self.budget -= 1;

                let inst = &func.insts[inst_id];
                match self.step(inst, &mut regs, args, &mut param_index) {
                    StepOutcome::Continue => {}
                    StepOutcome::Jump(b) => {
                        next_block = Some(b);
                        break;
                    }
                    StepOutcome::Return(v) => {
                        returned = Some(v);
                        break;
                    }
                    StepOutcome::Unsupported => return InterpOutcome::Unsupported,
                    StepOutcome::BudgetExceeded => return InterpOutcome::BudgetExceeded,
                }
            }

            if let Some(v) = returned {
                return InterpOutcome::Value(v);
            }
            match next_block {
                Some(b) => block = b,
                None => return InterpOutcome::Unsupported,
            }
        }
    }

    fn step(
        &mut self,
        inst: &Instruction,
        regs: &mut FxHashMap<Reg, i64>,
        args: &[i64],
        param_index: &mut usize,
    ) -> StepOutcome {
        let read = |regs: &FxHashMap<Reg, i64>, r: Option<Reg>| r.and_then(|r| regs.get(&r).copied());

        match inst.opcode {
            Opcode::LoadConst => {
                if let (Some(dst), Some(imm)) = (inst.dst, inst.imm) {
                    regs.insert(dst, imm);
                }
            }
            Opcode::LoadParam => {
                if let Some(dst) = inst.dst {
                    let v = args.get(*param_index).copied().unwrap_or(0);
                    *param_index += 1;
                    regs.insert(dst, v);
                }
            }
            Opcode::Add => return self.binary(inst, regs, |a, b| a.wrapping_add(b)),
            Opcode::Sub => return self.binary(inst, regs, |a, b| a.wrapping_sub(b)),
            Opcode::Mul => return self.binary(inst, regs, |a, b| a.wrapping_mul(b)),
            Opcode::And => return self.binary(inst, regs, |a, b| a & b),
            Opcode::Or => return self.binary(inst, regs, |a, b| a | b),
            Opcode::Xor => return self.binary(inst, regs, |a, b| a ^ b),
            Opcode::Shl => return self.binary(inst, regs, |a, b| a.wrapping_shl(b as u32)),
            Opcode::Shr => return self.binary(inst, regs, |a, b| a.wrapping_shr(b as u32)),
            Opcode::Div => {
                if read(regs, inst.srcs[1]) == Some(0) {
                    return StepOutcome::Unsupported;
                }
                return self.binary(inst, regs, |a, b| a.wrapping_div(b));
            }
            Opcode::Mod => {
                if read(regs, inst.srcs[1]) == Some(0) {
                    return StepOutcome::Unsupported;
                }
                return self.binary(inst, regs, |a, b| a.wrapping_rem(b));
            }
            Opcode::Cmp => {
                let Some(op) = inst.cmp_op else {
                    return StepOutcome::Unsupported;
                };
                if let (Some(dst), Some(a), Some(b)) = (inst.dst, read(regs, inst.srcs[0]), read(regs, inst.srcs[1])) {
                    regs.insert(dst, op.eval(a, b) as i64);
                } else {
                    return StepOutcome::Unsupported;
                }
            }
            Opcode::JumpIf => {
                let Some(cond) = read(regs, inst.srcs[0]) else {
                    return StepOutcome::Unsupported;
                };
                let Some(label) = inst.label else {
                    return StepOutcome::Unsupported;
                };
                if cond != 0 {
                    return StepOutcome::Jump(label);
                }
            }
            Opcode::JumpIfNot => {
                let Some(cond) = read(regs, inst.srcs[0]) else {
                    return StepOutcome::Unsupported;
                };
                let Some(label) = inst.label else {
                    return StepOutcome::Unsupported;
                };
                if cond == 0 {
                    return StepOutcome::Jump(label);
                }
            }
            Opcode::Neg => {
                if let (Some(dst), Some(a)) = (inst.dst, read(regs, inst.srcs[0])) {
                    regs.insert(dst, a.wrapping_neg());
                } else {
                    return StepOutcome::Unsupported;
                }
            }
            Opcode::Not => {
                if let (Some(dst), Some(a)) = (inst.dst, read(regs, inst.srcs[0])) {
                    regs.insert(dst, !a);
                } else {
                    return StepOutcome::Unsupported;
                }
            }
            Opcode::Jump => {
                if let Some(label) = inst.label {
                    return StepOutcome::Jump(label);
                }
                return StepOutcome::Unsupported;
            }
            Opcode::Return => {
                let v = inst.srcs[0].and_then(|r| regs.get(&r).copied()).unwrap_or(0);
                return StepOutcome::Return(v);
            }
            Opcode::Call => {
                let (callee_id, callee_args) = match (&inst.symbol, inst.dst) {
                    (Some(SymbolRef::Function(id, _)), _) => (*id, inst.srcs),
                    _ => return StepOutcome::Unsupported,
                };
                let Some(callee) = self.module.functions.get(callee_id) else {
                    return StepOutcome::Unsupported;
                };
                if !callee.is_pure() {
                    return StepOutcome::Unsupported;
                }
                let mut arg_values = Vec::new();
                for a in callee_args.iter().flatten() {
                    match read(regs, Some(*a)) {
                        Some(v) => arg_values.push(v),
                        None => return StepOutcome::Unsupported,
                    }
                }
                if self.budget == 0 {
                    return StepOutcome::BudgetExceeded;
                }
                match self.run(callee, &arg_values) {
                    InterpOutcome::Value(v) => {
                        if let Some(dst) = inst.dst {
                            regs.insert(dst, v);
                        }
                    }
                    InterpOutcome::BudgetExceeded => return StepOutcome::BudgetExceeded,
                    InterpOutcome::Unsupported => return StepOutcome::Unsupported,
                }
            }
            _ => return StepOutcome::Unsupported,
        }
        StepOutcome::Continue
    }

    fn binary(
        &self,
        inst: &Instruction,
        regs: &mut FxHashMap<Reg, i64>,
        op: fn(i64, i64) -> i64,
    ) -> StepOutcome {
        let a = inst.srcs[0].and_then(|r| regs.get(&r).copied());
        let b = inst.srcs[1].and_then(|r| regs.get(&r).copied());
        match (inst.dst, a, b) {
            (Some(dst), Some(a), Some(b)) => {
                regs.insert(dst, op(a, b));
                StepOutcome::Continue
            }
            _ => StepOutcome::Unsupported,
        }
    }
}

enum StepOutcome {
    Continue,
    Jump(crate::mir::Block),
    Return(i64),
    Unsupported,
    BudgetExceeded,
}

fn find_const(func: &MirFunction, reg: Reg) -> Option<i64> {
    for &block in &func.block_order {
        for &inst_id in &func.blocks[block].insts {
            let inst = &func.insts[inst_id];
            if inst.opcode == Opcode::LoadConst && inst.dst == Some(reg) {
                return inst.imm;
            }
        }
    }
    None
}

pub fn run_module(module: &mut MirModule, options: &CompileOptions, diags: &mut DiagnosticBag) {
    let snapshot = module.clone();
    let ids: Vec<FuncId> = module.functions.keys().collect();

    for id in ids {
        let candidates: Vec<(crate::mir::Block, crate::mir::Inst)> = {
            let func = &module.functions[id];
            let mut v = Vec::new();
            for &block in &func.block_order {
                for &inst_id in &func.blocks[block].insts {
                    let inst = &func.insts[inst_id];
                    if inst.opcode == Opcode::Call {
                        v.push((block, inst_id));
                    }
                }
            }
            v
        };

        for (_, inst_id) in candidates {
            let func = &module.functions[id];
            let inst = func.insts[inst_id].clone();
            let Some(SymbolRef::Function(callee_id, callee_name)) = inst.symbol.clone() else {
                continue;
            };
            let Some(callee) = snapshot.functions.get(callee_id) else {
                continue;
            };
            if !callee.is_pure() {
                continue;
            }
            let mut args = Vec::new();
            let mut all_const = true;
            for src in inst.srcs.iter().flatten() {
                match find_const(func, *src) {
                    Some(v) => args.push(v),
                    None => {
                        all_const = false;
                        break;
                    }
                }
            }
            if !all_const {
                continue;
            }

            let mut interp = Interpreter {
                module: &snapshot,
                budget: options.ctie_step_budget,
            };
            match interp.run(callee, &args) {
                InterpOutcome::Value(result) => {
                    let func = &mut module.functions[id];
                    let ty = func.insts[inst_id].ty;
                    let mut new_inst = Instruction::new(Opcode::LoadConst, ty);
                    new_inst.dst = func.insts[inst_id].dst;
                    new_inst.imm = Some(result);
                    new_inst.comment = Some(format!("CTIE folded call to `{}`", callee_name));
                    func.insts[inst_id] = new_inst;
                }
                InterpOutcome::BudgetExceeded => {
                    diags.warning(
                        DiagnosticKind::CtieBudgetExceeded,
                        Span::synthetic(),
                        format!(
                            "compile-time execution of `{}` exceeded the {}-step budget; left as a runtime call",
                            callee_name, options.ctie_step_budget
                        ),
                    );
                }
                InterpOutcome::Unsupported => {}
            }
        }
    }
}
