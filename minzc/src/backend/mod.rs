//! Code generation backends (spec §4.5).
//!
//! The `Backend` trait is deliberately thin — `emit` takes a whole
//! `MirModule` and hands back the finished assembly text, the same
//! shape `cranelift_codegen::Context::compile` presents to a caller
//! that doesn't want to know about the ISel/regalloc machinery inside.
//! The signature here threads `&TypeInterner` (operand widths are
//! meaningless without it) and `&mut DiagnosticBag` (so a target that
//! can't lower some construct reports `FeatureUnsupported` instead of
//! panicking) alongside the module and options — a small, deliberate
//! widening of the minimal two-argument shape, recorded in DESIGN.md.

pub mod z80;

use crate::diagnostics::{Diagnostic, DiagnosticBag, DiagnosticKind};
use crate::mir::MirModule;
use crate::settings::CompileOptions;
use crate::span::Span;
use crate::types::TypeInterner;

/// A capability a backend may or may not provide. Queried by the
/// driver before it relies on the capability (e.g. before enabling the
/// SMC rewrite pass for a target).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Feature {
    SelfModifyingCode,
    ShadowRegisters,
    TailCalls,
    InterruptHandlers,
}

/// A target that turns optimized MIR into final machine text.
pub trait Backend {
    fn name(&self) -> &'static str;

    /// Conventional file extension for this target's emitted text
    /// (without the leading dot), e.g. `"a80"` for Z80 assembly.
    fn file_extension(&self) -> &'static str;

    fn supports(&self, feature: Feature) -> bool;

    /// Lower every function in `module` to target text, appending any
    /// `FeatureUnsupported`/`RegisterPressure` diagnostics encountered
    /// along the way rather than failing the whole emission.
    fn emit(
        &self,
        module: &MirModule,
        types: &TypeInterner,
        options: &CompileOptions,
        diags: &mut DiagnosticBag,
    ) -> String;
}

/// Push a `FeatureUnsupported` diagnostic for `feature_name`, used by a
/// backend's emit loop when it hits a construct it doesn't implement.
pub fn feature_unsupported(diags: &mut DiagnosticBag, feature_name: &str, context: &str) {
    diags.push(
        Diagnostic::new(
            DiagnosticKind::FeatureUnsupported,
            Span::synthetic(),
            format!("{} is not supported by this backend ({})", feature_name, context),
        ),
    );
}

/// A backend that supports nothing, used by driver-level tests that
/// only need to exercise the `Backend` trait boundary itself.
#[cfg(test)]
pub struct StubBackend;

#[cfg(test)]
impl Backend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn file_extension(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, _feature: Feature) -> bool {
        false
    }

    fn emit(
        &self,
        module: &MirModule,
        _types: &TypeInterner,
        _options: &CompileOptions,
        diags: &mut DiagnosticBag,
    ) -> String {
        for (_, func) in module.functions.iter() {
            feature_unsupported(diags, "function emission", &func.name);
        }
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backend_reports_every_function_as_unsupported() {
        let mut types = TypeInterner::new();
        let u8t = types.u8();
        let mut module = MirModule::new();
        module.declare("f", u8t);
        module.declare("g", u8t);

        let mut diags = DiagnosticBag::new();
        let backend = StubBackend;
        let options = CompileOptions::new();
        backend.emit(&module, &types, &options, &mut diags);
        assert_eq!(diags.into_vec().len(), 2);
    }
}
