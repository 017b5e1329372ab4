//! The compiler driver: wires the module resolver, semantic analyzer,
//! optimizer, and a chosen backend into one end-to-end pipeline.
//!
//! Modeled on `cranelift_codegen::Context` (spec §4.3's note): a single
//! long-lived value holds the state that would otherwise need
//! threading through every call (the type interner, the accumulated
//! diagnostics) so a caller compiling many modules doesn't pay to
//! rebuild it each time.

use crate::ast::SourceFile;
use crate::backend::Backend;
use crate::diagnostics::DiagnosticBag;
use crate::mir::MirModule;
use crate::module::ModuleId;
use crate::opt;
use crate::resolver::{ModuleParser, Resolver};
use crate::sema;
use crate::settings::CompileOptions;
use crate::types::TypeInterner;
use std::path::Path;

/// Owns everything that persists across an entire compilation: the
/// configuration, the shared type interner (types are interned across
/// every module in the invocation, not per-module), and the
/// diagnostic bag every stage appends to rather than failing fast
/// (spec §7's batched-error discipline).
pub struct CompileSession {
    pub options: CompileOptions,
    pub types: TypeInterner,
    pub diags: DiagnosticBag,
}

impl CompileSession {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            types: TypeInterner::new(),
            diags: DiagnosticBag::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.diags.has_errors()
    }

    /// Resolve the module graph rooted at `root_path`, then lower and
    /// optimize every reachable module (spec §6.3's declaration-order
    /// guarantee: modules are visited in the order the resolver
    /// finished loading them, i.e. post-order of first import).
    ///
    /// Returns `None` if the root module itself could not be loaded;
    /// otherwise returns the per-module MIR even if some *other*
    /// module in the graph failed (spec §4.1's "failure is local to
    /// the importing module" semantics) — callers should still check
    /// [`Self::has_errors`] before proceeding to emission.
    pub fn compile<P: ModuleParser>(
        &mut self,
        parser: &P,
        root_path: &Path,
        root_fqn: &str,
    ) -> Option<Vec<(ModuleId, MirModule)>> {
        let mut resolver = Resolver::new(parser, &self.options);
        resolver.load_root(root_path, root_fqn, &mut self.diags)?;

        let modules = resolver.into_modules();
        let mut results = Vec::with_capacity(modules.len());
        for (id, module) in modules.iter() {
            log::debug!("analyzing module `{}`", module.fqn);
            let mir = sema::analyze_module(
                &module.fqn,
                module.ast.clone(),
                &mut self.types,
                &self.options,
                &mut self.diags,
            );
            results.push((id, mir));
        }

        for (_, mir) in results.iter_mut() {
            opt::run_module(mir, &self.types, &self.options, &mut self.diags);
        }

        Some(results)
    }

    /// Analyze and optimize one already-resolved module's AST directly,
    /// skipping the resolver. Used by embedders that already did module
    /// loading themselves, and by tests that hand-build a single
    /// module's tree (the external parser is out of this crate's
    /// scope, spec §1).
    pub fn compile_single_module(&mut self, module_name: &str, file: SourceFile) -> MirModule {
        let mut mir = sema::analyze_module(
            module_name,
            file,
            &mut self.types,
            &self.options,
            &mut self.diags,
        );
        opt::run_module(&mut mir, &self.types, &self.options, &mut self.diags);
        mir
    }

    /// Hand optimized MIR to `backend` and get back target text,
    /// appending any `FeatureUnsupported`/`RegisterPressure`
    /// diagnostics the backend records along the way.
    pub fn emit<B: Backend>(&mut self, backend: &B, mir: &MirModule) -> String {
        backend.emit(mir, &self.types, &self.options, &mut self.diags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Decl, FunctionDecl, Param, Stmt, TypeExpr};
    use crate::backend::z80::Z80Backend;
    use crate::span::Span;

    fn add_function() -> SourceFile {
        SourceFile {
            decls: vec![Decl::Function(FunctionDecl {
                name: "add".to_string(),
                params: vec![
                    Param { name: "a".to_string(), ty: TypeExpr::Named("u8".to_string()), span: Span::synthetic() },
                    Param { name: "b".to_string(), ty: TypeExpr::Named("u8".to_string()), span: Span::synthetic() },
                ],
                ret: TypeExpr::Named("u8".to_string()),
                body: Some(crate::ast::Block {
                    stmts: vec![Stmt::Return {
                        value: Some(crate::ast::Expr::Binary {
                            op: crate::ast::BinOp::Add,
                            lhs: Box::new(crate::ast::Expr::Identifier {
                                name: "a".to_string(),
                                span: Span::synthetic(),
                            }),
                            rhs: Box::new(crate::ast::Expr::Identifier {
                                name: "b".to_string(),
                                span: Span::synthetic(),
                            }),
                            span: Span::synthetic(),
                        }),
                        span: Span::synthetic(),
                    }],
                }),
                attributes: Vec::new(),
                is_public: true,
                span: Span::synthetic(),
            })],
        }
    }

    #[test]
    fn single_module_path_emits_assembly_without_errors() {
        let mut session = CompileSession::new(CompileOptions::new());
        let mir = session.compile_single_module("main", add_function());
        assert!(!session.has_errors());
        let backend = Z80Backend;
        let text = session.emit(&backend, &mir);
        assert!(text.contains("add:"));
    }
}
