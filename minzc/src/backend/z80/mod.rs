//! The Z80 code generator (spec §4.5): register allocation followed by
//! instruction selection, lean prologue/epilogue emission, and an
//! assembly-level peephole pass, one function at a time.

mod asm_peephole;
pub mod isel;

use crate::backend::{Backend, Feature};
use crate::diagnostics::DiagnosticBag;
use crate::mir::{MirFunction, MirModule, Opcode};
use crate::regalloc::Context as RegallocContext;
use crate::settings::CompileOptions;
use crate::types::TypeInterner;
use isel::AsmLine;

#[derive(Default)]
pub struct Z80Backend;

impl Backend for Z80Backend {
    fn name(&self) -> &'static str {
        "z80"
    }

    fn file_extension(&self) -> &'static str {
        "a80"
    }

    fn supports(&self, feature: Feature) -> bool {
        matches!(
            feature,
            Feature::SelfModifyingCode
                | Feature::ShadowRegisters
                | Feature::TailCalls
                | Feature::InterruptHandlers
        )
    }

    fn emit(
        &self,
        module: &MirModule,
        types: &TypeInterner,
        options: &CompileOptions,
        diags: &mut DiagnosticBag,
    ) -> String {
        let mut regalloc = RegallocContext::new();
        let mut text = String::new();
        text.push_str(&format!("    ORG {:#06X}\n", options.org));

        let mut order = module.declaration_order.clone();
        order.sort_by(|&a, &b| module.functions[a].name.cmp(&module.functions[b].name));

        for id in order {
            let func = &module.functions[id];
            let lines = emit_function(func, types, &mut regalloc, options.smc_region_base);
            for line in lines {
                text.push_str(&line.to_string());
                text.push('\n');
            }
        }

        for line in emit_globals(module, types) {
            text.push_str(&line.to_string());
            text.push('\n');
        }

        text
    }
}

/// Emit `module`'s `global` declarations into the dedicated data region
/// (spec §6.3): one labeled `DEFB`/`DEFW` per global, named after the
/// source declaration. Function bodies address globals by their fixed
/// numeric slot (`Opcode::LoadDirect`/`StoreDirect`), so the label here
/// is documentation for the reader, not something codegen resolves.
fn emit_globals(module: &MirModule, types: &TypeInterner) -> Vec<AsmLine> {
    module
        .globals
        .iter()
        .map(|g| {
            if types.width_of(g.ty) <= 1 {
                AsmLine::DefineByte { label: g.name.clone(), value: g.init_value }
            } else {
                AsmLine::DefineWord { label: g.name.clone(), value: g.init_value }
            }
        })
        .collect()
}

fn emit_function(
    func: &MirFunction,
    types: &TypeInterner,
    regalloc: &mut RegallocContext,
    smc_base: u16,
) -> Vec<AsmLine> {
    let assignments = regalloc.run(func, types, smc_base);

    let mut lines = Vec::new();
    lines.push(AsmLine::Label(func.name.clone()));
    lines.extend(prologue(func));

    for &block in &func.block_order {
        if block != func.entry {
            lines.push(AsmLine::Label(isel::block_label(func, block)));
        }
        for &inst_id in &func.blocks[block].insts {
            let inst = &func.insts[inst_id];
            lines.extend(isel::select(func, inst, &assignments, types));
            if inst.opcode == Opcode::Return {
                lines.extend(epilogue(func));
            }
        }
    }

    asm_peephole::run(lines)
}

/// Lean prologue: only `PUSH` the callee-saved registers register-usage
/// analysis (spec §4.3 step 5) actually found modified, in the fixed
/// order `iter_used_callee_saved` walks — and emit nothing at all for a
/// leaf function that modifies none of them.
///
/// `@naked` functions get no prologue at all (the author owns the
/// ABI); `@interrupt` functions swap the push/pop sequence for the
/// shadow-register exchange, four T-states for the pair against at
/// least forty for a full push (spec §4.5 step 2).
fn prologue(func: &MirFunction) -> Vec<AsmLine> {
    if func.attributes.is_naked {
        return Vec::new();
    }
    if func.attributes.is_interrupt {
        return vec![
            AsmLine::op("EX", vec!["AF".to_string(), "AF'".to_string()]),
            AsmLine::op("EXX", vec![]),
        ];
    }
    func.modified_registers
        .iter_used_callee_saved()
        .map(|reg| AsmLine::op("PUSH", vec![reg.mnemonic().to_string()]))
        .collect()
}

/// The mirror-image `POP`s, in reverse order, immediately before each
/// `RET` — `Opcode::Return` itself is selected separately by `isel`
/// (which also picks `RETI` over `RET` for `@interrupt` functions).
fn epilogue(func: &MirFunction) -> Vec<AsmLine> {
    if func.attributes.is_naked {
        return Vec::new();
    }
    if func.attributes.is_interrupt {
        return vec![AsmLine::op("EXX", vec![]), AsmLine::op("EX", vec!["AF".to_string(), "AF'".to_string()])];
    }
    let mut regs: Vec<_> = func.modified_registers.iter_used_callee_saved().collect();
    regs.reverse();
    regs.into_iter()
        .map(|reg| AsmLine::op("POP", vec![reg.mnemonic().to_string()]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::Instruction;

    #[test]
    fn leaf_function_gets_no_prologue() {
        let mut types = TypeInterner::new();
        let u8t = types.u8();
        let mut module = MirModule::new();
        let fid = module.declare("identity", u8t);
        let func = &mut module.functions[fid];
        let x = func.new_reg(u8t);
        let entry = func.entry;
        func.append_inst(entry, Instruction::new(Opcode::LoadParam, u8t).with_dst(x));
        func.append_inst(entry, Instruction::new(Opcode::Return, u8t).with_src1(x));

        let backend = Z80Backend;
        let mut diags = DiagnosticBag::new();
        let options = CompileOptions::new();
        let text = backend.emit(&module, &types, &options, &mut diags);
        assert!(text.contains("identity:"));
        assert!(!text.contains("PUSH"));
    }

    #[test]
    fn interrupt_handler_exchanges_shadow_registers_and_exits_with_reti() {
        let mut types = TypeInterner::new();
        let void = types.void();
        let mut module = MirModule::new();
        let fid = module.declare("tick", void);
        let func = &mut module.functions[fid];
        func.attributes.is_interrupt = true;
        func.attributes.interrupt_port = Some(0x38);
        let entry = func.entry;
        func.append_inst(entry, Instruction::new(Opcode::Return, void));

        let backend = Z80Backend;
        let mut diags = DiagnosticBag::new();
        let options = CompileOptions::new();
        let text = backend.emit(&module, &types, &options, &mut diags);
        assert!(diags.into_vec().is_empty());
        assert!(text.contains("EX AF, AF'"));
        assert!(text.contains("EXX"));
        assert!(text.contains("RETI"));
    }
}
