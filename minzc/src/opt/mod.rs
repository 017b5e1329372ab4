//! The optimizer (spec §4.3): a fixed, ordered sequence of MIR-to-MIR
//! passes, modeled on `cranelift_codegen::Context`'s own fixed-order
//! `compile()` driver — no pass-scheduling DSL, just a straight-line
//! function calling each pass in turn and logging entry/exit at trace
//! level.
//!
//! Most passes are genuinely local (one `MirFunction` in, one out) and
//! implement the `MirPass` trait below. Three are not: purity analysis
//! and register-usage analysis are least-fixed-point computations over
//! the whole call graph, and the SMC rewrite needs to read a callee's
//! patch table from the caller's side. Those are plain functions over
//! `&mut MirModule` rather than `MirPass` impls — forcing them through
//! a single-function trait would just mean smuggling the rest of the
//! module in through a side channel.

pub mod constprop;
pub mod ctie;
pub mod dce;
pub mod peephole;
pub mod purity;
pub mod reguse;
pub mod smc_rewrite;
pub mod tailcall;

use crate::diagnostics::DiagnosticBag;
use crate::mir::{MirFunction, MirModule};
use crate::settings::{CompileOptions, OptLevel};
use crate::types::TypeInterner;

/// Whether a pass changed anything, so fixed-point drivers (peephole,
/// the purity/reguse dataflow loops) know when to stop.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PassResult {
    Changed,
    Unchanged,
}

impl PassResult {
    pub fn changed(was_changed: bool) -> Self {
        if was_changed {
            PassResult::Changed
        } else {
            PassResult::Unchanged
        }
    }

    pub fn is_changed(self) -> bool {
        matches!(self, PassResult::Changed)
    }

    pub fn or(self, other: PassResult) -> PassResult {
        PassResult::changed(self.is_changed() || other.is_changed())
    }
}

/// One MIR-to-MIR transformation that only needs its own function's
/// body plus the read-only module context to run.
pub trait MirPass {
    fn name(&self) -> &'static str;
    fn run(&mut self, func: &mut MirFunction, types: &TypeInterner) -> PassResult;
}

/// Run the fixed §4.3 pass order across every function of `module`.
/// Functions are visited in name order within each per-function pass,
/// a cheap determinism guarantee independent of declaration or
/// call-graph order (spec §5).
pub fn run_module(
    module: &mut MirModule,
    types: &TypeInterner,
    options: &CompileOptions,
    diags: &mut DiagnosticBag,
) {
    log::debug!(
        "optimizer: {} function(s), opt_level={:?}",
        module.functions.len(),
        options.opt_level
    );

    let mut order: Vec<_> = module.declaration_order.clone();
    order.sort_by(|&a, &b| module.functions[a].name.cmp(&module.functions[b].name));

    let full = options.opt_level == OptLevel::Full;

    if full {
        log::trace!("pass: purity-analysis");
        purity::analyze(module);

        log::trace!("pass: const-propagation");
        for &id in &order {
            constprop::run(&mut module.functions[id], types);
        }

        log::trace!("pass: ctie");
        ctie::run_module(module, options, diags);

        log::trace!("pass: tail-call-rewrite");
        for &id in &order {
            tailcall::run(&mut module.functions[id]);
        }
    }

    log::trace!("pass: register-usage-analysis");
    reguse::run_module(module);

    log::trace!("pass: smc-rewrite");
    smc_rewrite::run_module(module, types);

    if full {
        log::trace!("pass: peephole");
        for &id in &order {
            peephole::run(&mut module.functions[id], options.peephole_max_rounds);
        }
    }

    log::trace!("pass: dead-code-elimination");
    for &id in &order {
        dce::run(&mut module.functions[id]);
    }
}

/// Rewrite every register reference in `func` according to `subst`,
/// skipping `exclude`d blocks entirely. Shared by the tail-call rewrite
/// (retargeting a recursive parameter onto a loop header's block
/// params) and usable by any future pass that needs the same plumbing.
pub(crate) fn substitute_regs_except(
    func: &mut MirFunction,
    subst: &rustc_hash::FxHashMap<crate::mir::Reg, crate::mir::Reg>,
    exclude: &[crate::mir::Block],
) {
    for &block in &func.block_order.clone() {
        if exclude.contains(&block) {
            continue;
        }
        let new_params: smallvec::SmallVec<[crate::mir::Reg; 2]> = func.blocks[block]
            .params
            .iter()
            .map(|r| subst.get(r).copied().unwrap_or(*r))
            .collect();
        func.blocks[block].params = new_params;

        for &inst_id in func.blocks[block].insts.clone().iter() {
            let inst = &mut func.insts[inst_id];
            if let Some(d) = inst.dst {
                if let Some(&r) = subst.get(&d) {
                    inst.dst = Some(r);
                }
            }
            for s in inst.srcs.iter_mut() {
                if let Some(r) = s {
                    if let Some(&rep) = subst.get(r) {
                        *r = rep;
                    }
                }
            }
        }
    }
}
