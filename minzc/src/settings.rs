//! Compile-time configuration.
//!
//! A single `CompileOptions` value threads through the whole pipeline,
//! the way `cranelift_codegen::settings::Flags` threads through a
//! `Context`. There is no global/ambient configuration: every stage
//! that needs a setting takes `&CompileOptions` explicitly.

use std::path::PathBuf;

/// Optimization level, coarsest knob over which optimizer passes run.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum OptLevel {
    /// Only passes required for correctness (dead-code elimination of
    /// genuinely unreachable code, SMC rewrite). No CTIE, no tail-call
    /// rewrite.
    None,
    /// The full fixed pass order from spec §4.3.
    Full,
}

impl Default for OptLevel {
    fn default() -> Self {
        OptLevel::Full
    }
}

/// Compiler-wide configuration, built once per invocation and passed
/// down by reference.
#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// Search roots consulted by the module resolver, in order:
    /// project root, `src/`, stdlib root, ...
    pub search_roots: Vec<PathBuf>,

    pub opt_level: OptLevel,

    /// Enable the TRUE SMC parameter-embedding pass (spec §4.3 step 6).
    /// Disabled automatically is not implemented (see DESIGN.md's
    /// resolution of the ROM-target open question) — callers targeting
    /// ROM must set this to `false` themselves.
    pub smc_enabled: bool,

    /// Step budget for the CTIE interpreter (spec §4.3 step 3, §5).
    pub ctie_step_budget: u32,

    /// Upper bound on peephole fixed-point iterations (spec §4.3 step 7).
    pub peephole_max_rounds: u32,

    /// Base address of the fixed SMC/spill memory region (spec §4.4
    /// tier 3, §4.2.6).
    pub smc_region_base: u16,

    /// Base address of the fixed data region `global` declarations are
    /// bump-allocated into (spec §9, §6.3). Kept below
    /// `smc_region_base` so the two fixed bands never overlap.
    pub global_data_base: u16,

    /// Origin address for emitted assembly (spec §6.3).
    pub org: u16,

    /// Run module resolution and semantic analysis for independent
    /// modules in parallel. Requires the `parallel-modules` feature;
    /// ignored otherwise.
    pub parallel_modules: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            search_roots: Vec::new(),
            opt_level: OptLevel::default(),
            smc_enabled: true,
            ctie_step_budget: 10_000,
            peephole_max_rounds: 16,
            smc_region_base: 0xF000,
            global_data_base: 0xC000,
            org: 0x8000,
            parallel_modules: false,
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.search_roots.push(root.into());
        self
    }

    pub fn with_opt_level(mut self, level: OptLevel) -> Self {
        self.opt_level = level;
        self
    }

    pub fn without_smc(mut self) -> Self {
        self.smc_enabled = false;
        self
    }
}
