//! Diagnostics produced anywhere in the pipeline.
//!
//! Modeled on the reader's `ParseError`/`ParseResult` pair: a single
//! concrete type carries a location and a message, and every fallible
//! operation in the core returns one through `Result`. Unlike the
//! reader, diagnostics here are collected rather than returned eagerly
//! — §7 requires the analyzer to keep going after a single-declaration
//! error so the user sees a batch.

use crate::span::Span;
use std::fmt;

/// Diagnostic severity.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// The enumerated diagnostic kinds named in spec §6.4.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DiagnosticKind {
    ImportNotFound,
    ImportCycle,
    TypeMismatch,
    UnknownIdentifier,
    ArityMismatch,
    UnsupportedCapture,
    FeatureUnsupported,
    RegisterPressure,
    CtieBudgetExceeded,
    InvalidAttribute,
    InternalCompilerError,
}

impl DiagnosticKind {
    /// The default severity for this kind when no override is given.
    /// CTIE budget exhaustion and similar soft failures are warnings by
    /// construction (spec §7 class 3); everything else defaults to an
    /// error.
    pub fn default_severity(self) -> Severity {
        match self {
            DiagnosticKind::CtieBudgetExceeded => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

/// A secondary span attached to a diagnostic, with its own explanatory
/// note (e.g. "cycle re-enters here", "first declared here").
#[derive(Clone, Debug)]
pub struct SecondarySpan {
    pub span: Span,
    pub note: String,
}

/// A single diagnostic: severity, kind, message, primary span, and any
/// number of secondary spans.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub primary: Span,
    pub secondary: Vec<SecondarySpan>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, primary: Span, message: impl Into<String>) -> Self {
        Self {
            severity: kind.default_severity(),
            kind,
            message: message.into(),
            primary,
            secondary: Vec::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_note(mut self, span: Span, note: impl Into<String>) -> Self {
        self.secondary.push(SecondarySpan {
            span,
            note: note.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {} ({:?})", self.primary, self.message, self.kind)?;
        for s in &self.secondary {
            write!(f, "\n  {}: {}", s.span, s.note)?;
        }
        Ok(())
    }
}

/// Accumulates diagnostics across an entire compilation. Owned by the
/// `CompileSession` (see `driver.rs`); every pipeline stage appends to
/// it rather than failing fast, matching the three-tier error
/// classification in spec §7.
#[derive(Default, Debug)]
pub struct DiagnosticBag {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        log::debug!("{} {}", diag.severity, diag.message);
        self.diagnostics.push(diag);
    }

    pub fn error(&mut self, kind: DiagnosticKind, span: Span, message: impl Into<String>) {
        self.push(Diagnostic::new(kind, span, message));
    }

    pub fn warning(&mut self, kind: DiagnosticKind, span: Span, message: impl Into<String>) {
        self.push(Diagnostic::new(kind, span, message).with_severity(Severity::Warning));
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

/// Errors internal to the compiler itself (pass-manager assertions,
/// exhausted invariants) rather than problems with the user's program.
/// Per spec §7 these never unwind the process mid-write; the driver
/// catches them at the pipeline boundary and reports `InternalCompilerError`.
#[derive(thiserror::Error, Debug)]
pub enum InternalError {
    #[error("internal compiler error in pass `{pass}`: {message}")]
    PassInvariant { pass: &'static str, message: String },

    #[error("internal compiler error: register allocator produced an inconsistent assignment for {0}")]
    InconsistentAllocation(String),
}
