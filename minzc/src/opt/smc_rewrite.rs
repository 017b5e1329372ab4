//! Self-modifying-code rewrite (spec §4.3 step 6, §3.7): turn each
//! SMC-eligible parameter of a function into an anchored immediate
//! load, and at every call site of that function, patch the immediate
//! in place before the jump/call instead of pushing an argument.
//!
//! Two phases, because the second needs to see every function's patch
//! table at once: first every function gets its own anchors (entirely
//! local, one function at a time); then a module-wide sweep inserts
//! `SmcPatch` instructions at call sites, using a snapshot of patch
//! tables taken before any call site is touched so a call to a
//! not-yet-processed callee still sees its final table.

use crate::mir::{Instruction, MirModule, Opcode, SmcAnchor, SymbolRef};
use crate::types::TypeInterner;
use rustc_hash::FxHashMap;

pub fn run_module(module: &mut MirModule, types: &TypeInterner) {
    for func in module.functions.values_mut() {
        rewrite_function(func, types);
    }

    let patch_tables: FxHashMap<_, _> = module
        .functions
        .iter()
        .map(|(id, f)| (id, f.patch_table.clone()))
        .collect();

    for func in module.functions.values_mut() {
        for &block in &func.block_order.clone() {
            let mut rewritten = Vec::with_capacity(func.blocks[block].insts.len());
            for &inst_id in &func.blocks[block].insts.clone() {
                let inst = func.insts[inst_id].clone();
                if inst.opcode == Opcode::Call {
                    if let Some(SymbolRef::Function(callee, _)) = &inst.symbol {
                        if let Some(table) = patch_tables.get(callee) {
                            for entry in &table.entries {
                                let src = inst.srcs[entry.parameter_index as usize];
                                let mut patch = Instruction::new(Opcode::SmcPatch, inst.ty);
                                patch.smc_target = Some(entry.anchor_label.clone());
                                if let Some(src) = src {
                                    patch.srcs[0] = Some(src);
                                }
                                patch.comment =
                                    Some(format!("patch {}", entry.anchor_label));
                                let patch_id = func.insts.push(patch);
                                rewritten.push(patch_id);
                            }
                        }
                    }
                }
                rewritten.push(inst_id);
            }
            func.blocks[block].insts = rewritten;
        }
    }
}

fn rewrite_function(func: &mut crate::mir::MirFunction, types: &TypeInterner) {
    if !func.smc_eligible() {
        return;
    }

    let entry = func.entry;
    let func_name = func.name.clone();
    let param_widths: Vec<(usize, u8, u32)> = func
        .params
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_smc_eligible)
        .map(|(idx, p)| (idx, types.width_of(p.ty), idx as u32))
        .collect();

    for &inst_id in &func.blocks[entry].insts.clone() {
        let inst = &mut func.insts[inst_id];
        if inst.opcode != Opcode::LoadParam {
            continue;
        }
        let Some(param_index) = inst.imm else { continue };
        let Some(&(idx, width, _)) = param_widths.iter().find(|(idx, _, _)| *idx as i64 == param_index) else {
            continue;
        };
        let param = &func.params[idx];
        let anchor = SmcAnchor::new(
            &func_name,
            &param.name,
            param_index as u32,
            crate::mir::AnchorWidth::for_type_width(width),
        );
        func.patch_table.push(&anchor);
        func.insts[inst_id].smc_anchor = Some(anchor.label.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{Instruction, MirFunction, MirModule, MirParam, Opcode, SymbolRef};
    use crate::types::TypeInterner;

    #[test]
    fn smc_eligible_param_gets_an_anchor() {
        let mut types = TypeInterner::new();
        let u8t = types.u8();
        let mut module = MirModule::new();
        let fid = module.declare("inc", u8t);
        {
            let func = &mut module.functions[fid];
            func.params.push(MirParam { name: "x".into(), ty: u8t, is_smc_eligible: true });
            let x = func.new_reg(u8t);
            let entry = func.entry;
            func.append_inst(entry, Instruction::new(Opcode::LoadParam, u8t).with_dst(x).with_imm(0));
            func.append_inst(entry, Instruction::new(Opcode::Return, u8t).with_src1(x));
        }

        run_module(&mut module, &types);
        assert!(!module.functions[fid].patch_table.is_empty());
        let entry = module.functions[fid].entry;
        let load_param_id = module.functions[fid].blocks[entry].insts[0];
        assert!(module.functions[fid].insts[load_param_id].smc_anchor.is_some());
    }

    #[test]
    fn call_site_gets_patch_instructions_before_the_call() {
        let mut types = TypeInterner::new();
        let u8t = types.u8();
        let mut module = MirModule::new();

        let callee_id = module.declare("inc", u8t);
        {
            let func = &mut module.functions[callee_id];
            func.params.push(MirParam { name: "x".into(), ty: u8t, is_smc_eligible: true });
            let x = func.new_reg(u8t);
            let entry = func.entry;
            func.append_inst(entry, Instruction::new(Opcode::LoadParam, u8t).with_dst(x).with_imm(0));
            func.append_inst(entry, Instruction::new(Opcode::Return, u8t).with_src1(x));
        }

        let caller_id = module.declare("caller", u8t);
        {
            let func = &mut module.functions[caller_id];
            let entry = func.entry;
            let arg = func.new_reg(u8t);
            let dst = func.new_reg(u8t);
            func.append_inst(entry, Instruction::new(Opcode::LoadConst, u8t).with_dst(arg).with_imm(1));
            func.append_inst(
                entry,
                Instruction::new(Opcode::Call, u8t)
                    .with_dst(dst)
                    .with_src1(arg)
                    .with_symbol(SymbolRef::Function(callee_id, "inc".into())),
            );
            func.append_inst(entry, Instruction::new(Opcode::Return, u8t).with_src1(dst));
        }

        run_module(&mut module, &types);
        let entry = module.functions[caller_id].entry;
        let insts: Vec<_> = module.functions[caller_id].blocks[entry]
            .insts
            .iter()
            .map(|&id| module.functions[caller_id].insts[id].opcode)
            .collect();
        let call_pos = insts.iter().position(|&op| op == Opcode::Call).unwrap();
        assert_eq!(insts[call_pos - 1], Opcode::SmcPatch);
    }
}
