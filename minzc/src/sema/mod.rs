//! Semantic analysis (spec §4.2): name resolution, type checking,
//! lambda lifting, interface monomorphization, error-propagation
//! desugaring, and lowering to MIR. `analyze_module` is the entry point
//! the driver calls once per resolved module, after lambda lifting has
//! run over every function body and the module's own declarations have
//! been gathered into an initial top-level scope (spec §4.2.1's
//! forward-reference guarantee).

pub mod interfaces;
pub mod lambda;
pub mod lower;
pub mod names;
pub mod tryop;
pub mod typeck;

use crate::ast::{Attribute, Decl, FunctionDecl, SourceFile, TypeExpr};
use crate::diagnostics::{DiagnosticBag, DiagnosticKind};
use crate::mir::{FuncId, MirModule};
use crate::sema::interfaces::{ImplTable, MethodKey};
use crate::sema::lambda::LambdaLifter;
use crate::sema::lower::{calling_convention_for, resolve_type_expr, FunctionLowerer, ModuleEnv};
use crate::sema::names::Binding;
use crate::sema::typeck::{fold_const, ConstValue};
use crate::settings::CompileOptions;
use crate::types::TypeInterner;
use rustc_hash::FxHashMap;
use std::collections::HashSet;

/// A hook invoked over a module's AST before any other analysis begins
/// (spec §1's "compile-time metaprogramming" collaborator): the real
/// scripting engine is out of this crate's scope, but lambda lifting
/// and lowering both assume any macro-style rewriting has already
/// happened by the time they see the tree.
pub trait MetaprogrammingHook {
    fn rewrite(&self, file: &mut SourceFile);
}

/// Applies function attributes (spec §6.2) onto a `MirFunction`'s
/// attribute set and calling convention, reporting `InvalidAttribute`
/// for combinations that cannot coexist (e.g. `@interrupt` with an
/// explicit non-naked `@abi`).
fn apply_attributes(
    func: &mut crate::mir::MirFunction,
    decl: &FunctionDecl,
    diags: &mut DiagnosticBag,
) {
    func.calling_convention = calling_convention_for(decl);
    for attr in &decl.attributes {
        match attr {
            Attribute::Extern => func.attributes.is_extern = true,
            Attribute::Interrupt => func.attributes.is_interrupt = true,
            Attribute::Port(p) => func.attributes.interrupt_port = Some(*p),
            Attribute::Inline => func.attributes.is_inline_hint = true,
            Attribute::NoSmc => func.attributes.no_smc = true,
            Attribute::Naked => func.attributes.is_naked = true,
            Attribute::Abi { .. } => {}
        }
    }
    if func.attributes.is_interrupt && func.attributes.interrupt_port.is_none() {
        diags.warning(
            DiagnosticKind::InvalidAttribute,
            decl.span,
            format!(
                "`@interrupt` function `{}` has no `@port` wiring it to a vector",
                decl.name
            ),
        );
    }
    if func.attributes.is_naked && func.smc_enabled {
        func.smc_enabled = false;
    }
}

/// Lower one already-resolved module's AST into a `MirModule`.
///
/// Three sub-passes run over the module's functions, in order:
/// 1. Lambda lifting (spec §4.2.3) — every function body is rewritten
///    in place, appending synthesized lambda functions to the
///    declaration list.
/// 2. Signature declaration — every function (original and lifted) gets
///    a `MirFunction` shell and a name -> `FuncId` entry, so forward
///    calls and mutual recursion resolve during body lowering.
/// 3. Body lowering (spec §4.2.6) and `impl` registration (spec
///    §4.2.4), interleaved in declaration order per §6.3's
///    emission-order guarantee.
pub fn analyze_module(
    module_name: &str,
    mut file: SourceFile,
    types: &mut TypeInterner,
    options: &CompileOptions,
    diags: &mut DiagnosticBag,
) -> MirModule {
    let mut lifted_functions: Vec<FunctionDecl> = Vec::new();
    for decl in &mut file.decls {
        match decl {
            Decl::Function(f) => lift_function(module_name, f, &mut lifted_functions),
            Decl::Impl(impl_decl) => {
                for method in &mut impl_decl.methods {
                    lift_function(module_name, method, &mut lifted_functions);
                }
            }
            _ => {}
        }
    }

    let mut named_types: FxHashMap<String, crate::types::TypeId> = FxHashMap::default();
    for decl in &file.decls {
        match decl {
            Decl::Struct(s) => {
                let fields = s
                    .fields
                    .iter()
                    .map(|p| crate::types::FieldDef {
                        name: p.name.clone(),
                        ty: resolve_type_expr(&p.ty, types, &named_types),
                    })
                    .collect();
                let ty = types.intern(crate::types::TypeData::Struct {
                    name: s.name.clone(),
                    fields,
                });
                named_types.insert(s.name.clone(), ty);
            }
            Decl::Enum(e) => {
                let mut next_discriminant = 0i64;
                let variants = e
                    .variants
                    .iter()
                    .map(|v| {
                        let discriminant = match &v.discriminant {
                            Some(expr) => crate::sema::typeck::fold_const(expr, types, &|_| None)
                                .and_then(|c| c.as_i64())
                                .unwrap_or(next_discriminant),
                            None => next_discriminant,
                        };
                        next_discriminant = discriminant + 1;
                        crate::types::EnumVariant {
                            name: v.name.clone(),
                            discriminant,
                            payload: v
                                .payload
                                .as_ref()
                                .map(|t| resolve_type_expr(t, types, &named_types)),
                        }
                    })
                    .collect();
                let ty = types.intern(crate::types::TypeData::Enum {
                    name: e.name.clone(),
                    variants,
                });
                named_types.insert(e.name.clone(), ty);
            }
            Decl::TypeAlias(a) => {
                let target = resolve_type_expr(&a.target, types, &named_types);
                let ty = types.intern(crate::types::TypeData::Alias {
                    name: a.name.clone(),
                    target,
                });
                named_types.insert(a.name.clone(), ty);
            }
            _ => {}
        }
    }

    // Gather `const`/`global` declarations into module scope, parallel to
    // the `named_types` pass above, so a function body referencing one
    // resolves instead of falling through to `UnknownIdentifier` (spec
    // §3.3, §4.2.1, §9). Declaration order matters here: a later
    // `const`/`global` initializer may reference an earlier one.
    let mut consts: FxHashMap<String, ConstValue> = FxHashMap::default();
    let mut module_bindings: FxHashMap<String, Binding> = FxHashMap::default();
    let mut global_defs: Vec<crate::mir::GlobalDef> = Vec::new();
    let mut next_global_addr = options.global_data_base;
    for decl in &file.decls {
        match decl {
            Decl::Const(c) => {
                let lookup = |name: &str| consts.get(name).copied();
                match fold_const(&c.value, types, &lookup) {
                    Some(value) => {
                        consts.insert(c.name.clone(), value);
                        let ty = value.ty(types);
                        let as_int = match value {
                            ConstValue::Int(v, _) => v,
                            ConstValue::Bool(b) => b as i64,
                        };
                        module_bindings.insert(c.name.clone(), Binding::Const { value: as_int, ty });
                    }
                    None => diags.error(
                        DiagnosticKind::TypeMismatch,
                        c.span,
                        format!("`const {}` initializer is not a compile-time constant", c.name),
                    ),
                }
            }
            Decl::Global(g) => {
                let ty = resolve_type_expr(&g.ty, types, &named_types);
                let lookup = |name: &str| consts.get(name).copied();
                let init_value = g
                    .init
                    .as_ref()
                    .and_then(|expr| fold_const(expr, types, &lookup))
                    .and_then(ConstValue::as_i64)
                    .unwrap_or(0);
                let addr = next_global_addr;
                next_global_addr = next_global_addr.wrapping_add(types.width_of(ty).max(1) as u16);
                global_defs.push(crate::mir::GlobalDef {
                    name: g.name.clone(),
                    ty,
                    addr,
                    init_value,
                });
                module_bindings.insert(g.name.clone(), Binding::Slot { addr, ty, mutable: true });
            }
            _ => {}
        }
    }

    let mut module = MirModule::new();
    module.globals = global_defs;
    let mut functions: FxHashMap<String, FuncId> = FxHashMap::default();

    let mut all_function_decls: Vec<(Option<String>, &FunctionDecl)> = Vec::new();
    for decl in &file.decls {
        match decl {
            Decl::Function(f) => all_function_decls.push((None, f)),
            Decl::Impl(impl_decl) => {
                let interface = impl_decl.interface.clone();
                for method in &impl_decl.methods {
                    all_function_decls.push((interface.clone(), method));
                }
            }
            _ => {}
        }
    }
    for f in &lifted_functions {
        all_function_decls.push((None, f));
    }

    for (_, decl) in &all_function_decls {
        let ret_ty = resolve_type_expr(&decl.ret, types, &named_types);
        let id = module.declare(&decl.name, ret_ty);
        functions.insert(decl.name.clone(), id);
    }

    let mut impls = ImplTable::new();
    for decl in &file.decls {
        if let Decl::Impl(impl_decl) = decl {
            let target_ty = resolve_type_expr(&impl_decl.target_type, types, &named_types);
            for method in &impl_decl.methods {
                if let Some(&func_id) = functions.get(&method.name) {
                    impls.register(
                        MethodKey {
                            ty: target_ty,
                            interface: impl_decl.interface.clone(),
                            method: method.name.clone(),
                        },
                        func_id,
                    );
                }
            }
        }
    }

    for (_, decl) in &all_function_decls {
        let Some(&func_id) = functions.get(&decl.name) else {
            continue;
        };
        let func = &mut module.functions[func_id];
        for param in &decl.params {
            let ty = resolve_type_expr(&param.ty, types, &named_types);
            func.params.push(crate::mir::MirParam {
                name: param.name.clone(),
                ty,
                is_smc_eligible: true,
            });
        }
        apply_attributes(func, decl, diags);

        let mut env = ModuleEnv::new(types, diags, &functions, &impls, options, &module_bindings);
        let func = &mut module.functions[func_id];
        let mut lowerer = FunctionLowerer::new(func, &mut env, &named_types);
        lowerer.lower_function_body(decl);
    }

    module
}

/// Run lambda lifting over one function body, appending synthesized
/// functions to `out` (spec §4.2.3). Nested lambdas inside the lifted
/// bodies are lifted transitively by the recursive `lift_block` walk
/// before this function returns, so `out` never needs a worklist.
fn lift_function(module_name: &str, decl: &mut FunctionDecl, out: &mut Vec<FunctionDecl>) {
    let Some(body) = &mut decl.body else {
        return;
    };
    let mut lifter = LambdaLifter::new(module_name, &decl.name);
    let mut bound: HashSet<String> = decl.params.iter().map(|p| p.name.clone()).collect();
    lifter.lift_block(body, &mut bound);
    for mut lifted in lifter.lifted {
        if lifted.ret.is_auto() {
            lifted.ret = infer_lambda_return_type(lifted.body.as_ref());
        }
        out.push(lifted);
    }
}

impl TypeExpr {
    fn is_auto(&self) -> bool {
        matches!(self, TypeExpr::Named(n) if n == "auto")
    }
}

/// Scan a lifted lambda's body for its `return` expressions and pick the
/// narrowest surface type that covers them, since lambdas carry no
/// surface return-type annotation of their own (spec §4.2.3). Falls back
/// to `u16`, matching the lowerer's own default for untyped int
/// literals, when the body returns nothing or something this shallow
/// scan can't classify.
fn infer_lambda_return_type(body: Option<&crate::ast::Block>) -> TypeExpr {
    fn scan(block: &crate::ast::Block) -> Option<TypeExpr> {
        for stmt in &block.stmts {
            match stmt {
                crate::ast::Stmt::Return { value: Some(expr), .. } => {
                    return Some(match expr {
                        crate::ast::Expr::BoolLiteral { .. } => TypeExpr::Named("bool".to_string()),
                        _ => TypeExpr::Named("u16".to_string()),
                    });
                }
                crate::ast::Stmt::If { then_block, else_block, .. } => {
                    if let Some(ty) = scan(then_block) {
                        return Some(ty);
                    }
                    if let Some(else_b) = else_block {
                        if let Some(ty) = scan(else_b) {
                            return Some(ty);
                        }
                    }
                }
                _ => {}
            }
        }
        None
    }
    body.and_then(scan).unwrap_or(TypeExpr::Named("u16".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ConstDecl, Expr, GlobalDecl, Stmt};
    use crate::span::Span;

    fn span() -> Span {
        Span::synthetic()
    }

    fn ident(name: &str) -> Expr {
        Expr::Identifier { name: name.to_string(), span: span() }
    }

    fn int(value: i64) -> Expr {
        Expr::IntLiteral { value, suffix: None, span: span() }
    }

    /// `const LIMIT = 10;` followed by a function returning `LIMIT`
    /// should lower to a bare `LoadConst 10` — no `UnknownIdentifier`,
    /// no memory load.
    #[test]
    fn const_declaration_binds_and_folds_into_function_bodies() {
        let limit = ConstDecl {
            name: "LIMIT".to_string(),
            ty: None,
            value: int(10),
            is_public: false,
            span: span(),
        };
        let get_limit = FunctionDecl {
            name: "get_limit".to_string(),
            params: Vec::new(),
            ret: TypeExpr::Named("u8".to_string()),
            body: Some(crate::ast::Block {
                stmts: vec![Stmt::Return { value: Some(ident("LIMIT")), span: span() }],
            }),
            attributes: Vec::new(),
            is_public: true,
            span: span(),
        };
        let file = SourceFile { decls: vec![Decl::Const(limit), Decl::Function(get_limit)] };

        let mut types = TypeInterner::new();
        let options = CompileOptions::new();
        let mut diags = DiagnosticBag::new();
        let module = analyze_module("main", file, &mut types, &options, &mut diags);

        assert!(!diags.has_errors(), "{:?}", diags.into_vec());
        let fid = module.by_name("get_limit").unwrap();
        let func = &module.functions[fid];
        let has_const_load = func
            .blocks
            .values()
            .flat_map(|b| b.insts.iter())
            .any(|&id| func.insts[id].opcode == crate::mir::Opcode::LoadConst && func.insts[id].imm == Some(10));
        assert!(has_const_load, "expected `LIMIT` to fold to a LoadConst 10");
    }

    /// `global counter: u8 = 5;` should bind as a mutable memory slot,
    /// readable and writable from a function body via the same
    /// `LoadDirect`/`StoreDirect` path address-taken locals use, and
    /// should be carried forward to `MirModule::globals` for emission.
    #[test]
    fn global_declaration_binds_as_a_slot_and_is_emitted() {
        let counter = GlobalDecl {
            name: "counter".to_string(),
            ty: TypeExpr::Named("u8".to_string()),
            init: Some(int(5)),
            is_public: false,
            span: span(),
        };
        let bump = FunctionDecl {
            name: "bump".to_string(),
            params: Vec::new(),
            ret: TypeExpr::Named("u8".to_string()),
            body: Some(crate::ast::Block {
                stmts: vec![
                    Stmt::Assign {
                        target: ident("counter"),
                        value: Expr::Binary {
                            op: crate::ast::BinOp::Add,
                            lhs: Box::new(ident("counter")),
                            rhs: Box::new(int(1)),
                            span: span(),
                        },
                        span: span(),
                    },
                    Stmt::Return { value: Some(ident("counter")), span: span() },
                ],
            }),
            attributes: Vec::new(),
            is_public: true,
            span: span(),
        };
        let file = SourceFile { decls: vec![Decl::Global(counter), Decl::Function(bump)] };

        let mut types = TypeInterner::new();
        let options = CompileOptions::new();
        let mut diags = DiagnosticBag::new();
        let module = analyze_module("main", file, &mut types, &options, &mut diags);

        assert!(!diags.has_errors(), "{:?}", diags.into_vec());
        assert_eq!(module.globals.len(), 1);
        assert_eq!(module.globals[0].name, "counter");
        assert_eq!(module.globals[0].init_value, 5);

        let fid = module.by_name("bump").unwrap();
        let func = &module.functions[fid];
        let mut loads = 0;
        let mut stores = 0;
        for &inst_id in func.blocks.values().flat_map(|b| b.insts.iter()) {
            match func.insts[inst_id].opcode {
                crate::mir::Opcode::LoadDirect => loads += 1,
                crate::mir::Opcode::StoreDirect => stores += 1,
                _ => {}
            }
        }
        assert!(loads >= 2, "expected at least two loads of `counter`, found {loads}");
        assert_eq!(stores, 1, "expected exactly one store to `counter`");
    }
}
