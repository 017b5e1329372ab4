//! End-to-end pipeline tests, one per scenario: a hand-built AST goes
//! in through [`CompileSession`], optimized MIR (and, where relevant,
//! Z80 assembly text) comes out the other side. Each test exercises
//! the same machinery a real parser's output would drive; only the
//! AST construction is test-only.

#![cfg(feature = "test-support")]

use minzc::ast::{
    Attribute, Decl, Expr, FunctionDecl, ImplDecl, ImportDecl, InterfaceDecl, InterfaceMethodSig,
    LambdaExpr, Param, SourceFile, Stmt, StructDecl, TypeExpr,
};
use minzc::backend::z80::Z80Backend;
use minzc::driver::CompileSession;
use minzc::mir::Opcode;
use minzc::resolver::FixedModuleParser;
use minzc::settings::CompileOptions;
use minzc::span::Span;
use pretty_assertions::assert_eq;
use rustc_hash::FxHashMap;
use std::path::PathBuf;

/// `try_init` rather than `init`: several scenario tests run in the
/// same process and a second call would otherwise panic.
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn span() -> Span {
    Span::synthetic()
}

fn ident(name: &str) -> Expr {
    Expr::Identifier { name: name.to_string(), span: span() }
}

fn int(value: i64) -> Expr {
    Expr::IntLiteral { value, suffix: None, span: span() }
}

fn param(name: &str, ty: &str) -> Param {
    Param { name: name.to_string(), ty: TypeExpr::Named(ty.to_string()), span: span() }
}

fn ret(value: Option<Expr>) -> Stmt {
    Stmt::Return { value, span: span() }
}

/// Scenario 1 (spec §8): `add(a, b) { return a + b; }` called as
/// `add(5, 3)` from a pure context folds, via CTIE, straight down to a
/// single constant load — no `CALL` survives in the caller.
#[test]
fn scenario_1_smc_function_folds_under_ctie() {
    init_logging();
    let add = FunctionDecl {
        name: "add".to_string(),
        params: vec![param("a", "u8"), param("b", "u8")],
        ret: TypeExpr::Named("u8".to_string()),
        body: Some(minzc::ast::Block {
            stmts: vec![ret(Some(Expr::Binary {
                op: minzc::ast::BinOp::Add,
                lhs: Box::new(ident("a")),
                rhs: Box::new(ident("b")),
                span: span(),
            }))],
        }),
        attributes: Vec::new(),
        is_public: true,
        span: span(),
    };
    let main = FunctionDecl {
        name: "main".to_string(),
        params: Vec::new(),
        ret: TypeExpr::Named("u8".to_string()),
        body: Some(minzc::ast::Block {
            stmts: vec![ret(Some(Expr::Call {
                callee: Box::new(ident("add")),
                args: vec![int(5), int(3)],
                span: span(),
            }))],
        }),
        attributes: Vec::new(),
        is_public: true,
        span: span(),
    };
    let file = SourceFile { decls: vec![Decl::Function(add), Decl::Function(main)] };

    let mut session = CompileSession::new(CompileOptions::new());
    let mir = session.compile_single_module("main", file);
    assert!(!session.has_errors());

    let main_id = mir.by_name("main").unwrap();
    let main_func = &mir.functions[main_id];
    let mut folded = false;
    for &block in &main_func.block_order {
        for &inst_id in &main_func.blocks[block].insts {
            let inst = &main_func.insts[inst_id];
            assert_ne!(inst.opcode, Opcode::Call, "call to `add` should have been folded by CTIE");
            if inst.opcode == Opcode::LoadConst && inst.imm == Some(8) {
                folded = true;
            }
        }
    }
    assert!(folded, "expected a LoadConst 8 left behind by CTIE folding add(5, 3)");

    let backend = Z80Backend;
    let text = session.emit(&backend, &mir);
    assert!(text.contains("main:"));
}

/// Scenario 2 (spec §8): a self-recursive tail call is rewritten into a
/// back-edge jump, so the compiled function contains no recursive
/// `CALL` and therefore no per-call stack growth.
#[test]
fn scenario_2_tail_recursive_sum_has_no_recursive_call() {
    init_logging();
    let sum_tail = FunctionDecl {
        name: "sum_tail".to_string(),
        params: vec![param("n", "u16"), param("acc", "u16")],
        ret: TypeExpr::Named("u16".to_string()),
        body: Some(minzc::ast::Block {
            stmts: vec![ret(Some(Expr::Call {
                callee: Box::new(ident("sum_tail")),
                args: vec![
                    Expr::Binary {
                        op: minzc::ast::BinOp::Sub,
                        lhs: Box::new(ident("n")),
                        rhs: Box::new(int(1)),
                        span: span(),
                    },
                    Expr::Binary {
                        op: minzc::ast::BinOp::Add,
                        lhs: Box::new(ident("acc")),
                        rhs: Box::new(ident("n")),
                        span: span(),
                    },
                ],
                span: span(),
            }))],
        }),
        attributes: Vec::new(),
        is_public: true,
        span: span(),
    };
    let file = SourceFile { decls: vec![Decl::Function(sum_tail)] };

    let mut session = CompileSession::new(CompileOptions::new());
    let mir = session.compile_single_module("main", file);
    assert!(!session.has_errors());

    let fid = mir.by_name("sum_tail").unwrap();
    let func = &mir.functions[fid];
    assert!(func.is_tail_recursive);
    for &block in &func.block_order {
        for &inst_id in &func.blocks[block].insts {
            assert_ne!(func.insts[inst_id].opcode, Opcode::Call);
        }
    }
}

/// Scenario 3 (spec §8): two structs implementing the same interface
/// each resolve `x.draw()` straight to their own concrete function —
/// no vtable, no indirect call.
#[test]
fn scenario_3_interface_calls_monomorphize_without_a_vtable() {
    init_logging();
    let drawable = InterfaceDecl {
        name: "Drawable".to_string(),
        methods: vec![InterfaceMethodSig {
            name: "draw".to_string(),
            params: vec![param("self", "Circle")],
            ret: TypeExpr::Named("u8".to_string()),
        }],
        is_public: true,
        span: span(),
    };
    let circle = StructDecl {
        name: "Circle".to_string(),
        fields: vec![param("radius", "u8")],
        is_public: true,
        span: span(),
    };
    let square = StructDecl {
        name: "Square".to_string(),
        fields: vec![param("side", "u8")],
        is_public: true,
        span: span(),
    };
    let draw_method = |receiver_ty: &str, field: &str| FunctionDecl {
        name: format!("draw_{}", receiver_ty.to_lowercase()),
        params: vec![param("self", receiver_ty)],
        ret: TypeExpr::Named("u8".to_string()),
        body: Some(minzc::ast::Block {
            stmts: vec![ret(Some(Expr::Field {
                base: Box::new(ident("self")),
                name: field.to_string(),
                span: span(),
            }))],
        }),
        attributes: Vec::new(),
        is_public: true,
        span: span(),
    };
    let impl_circle = ImplDecl {
        interface: Some("Drawable".to_string()),
        target_type: TypeExpr::Named("Circle".to_string()),
        methods: vec![FunctionDecl { name: "draw".to_string(), ..draw_method("Circle", "radius") }],
        span: span(),
    };
    let impl_square = ImplDecl {
        interface: Some("Drawable".to_string()),
        target_type: TypeExpr::Named("Square".to_string()),
        methods: vec![FunctionDecl { name: "draw".to_string(), ..draw_method("Square", "side") }],
        span: span(),
    };
    let main = FunctionDecl {
        name: "main".to_string(),
        params: Vec::new(),
        ret: TypeExpr::Named("u8".to_string()),
        body: Some(minzc::ast::Block {
            stmts: vec![
                Stmt::Let {
                    name: "c".to_string(),
                    ty: None,
                    mutable: false,
                    init: Some(Expr::StructLiteral {
                        ty: "Circle".to_string(),
                        fields: vec![("radius".to_string(), int(5))],
                        span: span(),
                    }),
                    span: span(),
                },
                Stmt::Let {
                    name: "s".to_string(),
                    ty: None,
                    mutable: false,
                    init: Some(Expr::StructLiteral {
                        ty: "Square".to_string(),
                        fields: vec![("side".to_string(), int(3))],
                        span: span(),
                    }),
                    span: span(),
                },
                ret(Some(Expr::Binary {
                    op: minzc::ast::BinOp::Add,
                    lhs: Box::new(Expr::MethodCall {
                        receiver: Box::new(ident("c")),
                        method: "draw".to_string(),
                        args: Vec::new(),
                        span: span(),
                    }),
                    rhs: Box::new(Expr::MethodCall {
                        receiver: Box::new(ident("s")),
                        method: "draw".to_string(),
                        args: Vec::new(),
                        span: span(),
                    }),
                    span: span(),
                })),
            ],
        }),
        attributes: Vec::new(),
        is_public: true,
        span: span(),
    };
    let file = SourceFile {
        decls: vec![
            Decl::Interface(drawable),
            Decl::Struct(circle),
            Decl::Struct(square),
            Decl::Impl(impl_circle),
            Decl::Impl(impl_square),
            Decl::Function(main),
        ],
    };

    let mut session = CompileSession::new(CompileOptions::new());
    let mir = session.compile_single_module("main", file);
    assert!(!session.has_errors());

    let main_id = mir.by_name("main").unwrap();
    let draw_circle_id = mir.by_name("draw_circle").unwrap();
    let draw_square_id = mir.by_name("draw_square").unwrap();
    let main_func = &mir.functions[main_id];

    let mut targets = Vec::new();
    for &block in &main_func.block_order {
        for &inst_id in &main_func.blocks[block].insts {
            let inst = &main_func.insts[inst_id];
            if inst.opcode == Opcode::Call {
                if let Some(minzc::mir::SymbolRef::Function(callee, _)) = &inst.symbol {
                    targets.push(*callee);
                }
            }
            assert_ne!(inst.opcode, Opcode::CallIndirect, "no vtable dispatch expected");
        }
    }
    assert!(targets.contains(&draw_circle_id));
    assert!(targets.contains(&draw_square_id));
}

/// Scenario 4 (spec §8): `arr.iter().map(f).filter(g).forEach(h)`
/// fuses into a single `DJNZ` loop that calls each lifted stage
/// function directly, rather than materializing per-stage iterators.
#[test]
fn scenario_4_iterator_chain_fuses_into_a_single_djnz_loop() {
    init_logging();
    let map_lambda = Expr::Lambda(LambdaExpr {
        params: vec![param("x", "u8")],
        body: minzc::ast::Block {
            stmts: vec![ret(Some(Expr::Binary {
                op: minzc::ast::BinOp::Add,
                lhs: Box::new(ident("x")),
                rhs: Box::new(int(1)),
                span: span(),
            }))],
        },
        span: span(),
    });
    let filter_lambda = Expr::Lambda(LambdaExpr {
        params: vec![param("x", "u8")],
        body: minzc::ast::Block {
            stmts: vec![ret(Some(Expr::BoolLiteral { value: true, span: span() }))],
        },
        span: span(),
    });
    let foreach_lambda = Expr::Lambda(LambdaExpr {
        params: vec![param("x", "u8")],
        body: minzc::ast::Block { stmts: Vec::new() },
        span: span(),
    });

    let chain = Expr::MethodCall {
        receiver: Box::new(Expr::MethodCall {
            receiver: Box::new(Expr::MethodCall {
                receiver: Box::new(Expr::ArrayLiteral {
                    elements: vec![int(1), int(2), int(3)],
                    span: span(),
                }),
                method: "iter".to_string(),
                args: Vec::new(),
                span: span(),
            }),
            method: "map".to_string(),
            args: vec![map_lambda],
            span: span(),
        }),
        method: "filter".to_string(),
        args: vec![filter_lambda],
        span: span(),
    };
    let chain = Expr::MethodCall {
        receiver: Box::new(chain),
        method: "forEach".to_string(),
        args: vec![foreach_lambda],
        span: span(),
    };

    let main = FunctionDecl {
        name: "main".to_string(),
        params: Vec::new(),
        ret: TypeExpr::Named("void".to_string()),
        body: Some(minzc::ast::Block { stmts: vec![Stmt::Expr { expr: chain, span: span() }] }),
        attributes: Vec::new(),
        is_public: true,
        span: span(),
    };
    let file = SourceFile { decls: vec![Decl::Function(main)] };

    let mut session = CompileSession::new(CompileOptions::new());
    let mir = session.compile_single_module("main", file);
    assert!(!session.has_errors(), "iterator chain should have fused, not fallen back to unknown methods");

    let main_id = mir.by_name("main").unwrap();
    let map_id = mir.by_name("main::main::lambda$0").expect("map stage lifted");
    let filter_id = mir.by_name("main::main::lambda$1").expect("filter stage lifted");
    let foreach_id = mir.by_name("main::main::lambda$2").expect("forEach stage lifted");

    let main_func = &mir.functions[main_id];
    let mut saw_djnz = false;
    let mut call_targets = Vec::new();
    for &block in &main_func.block_order {
        for &inst_id in &main_func.blocks[block].insts {
            let inst = &main_func.insts[inst_id];
            if inst.opcode == Opcode::Djnz {
                saw_djnz = true;
            }
            if inst.opcode == Opcode::Call {
                if let Some(minzc::mir::SymbolRef::Function(callee, _)) = &inst.symbol {
                    call_targets.push(*callee);
                }
            }
        }
    }
    assert!(saw_djnz, "fused chain should lower to a DJNZ loop");
    assert_eq!(call_targets, vec![map_id, filter_id, foreach_id]);
}

/// Scenario 5 (spec §8): module resolution succeeds across a real
/// import and reports `ImportNotFound` (without aborting the rest of
/// the graph) when a module's import cannot be located.
#[test]
fn scenario_5_module_resolution_succeeds_and_reports_missing_imports() {
    init_logging();
    let mut files: FxHashMap<PathBuf, SourceFile> = FxHashMap::default();
    files.insert(
        PathBuf::from("main.minz"),
        SourceFile {
            decls: vec![Decl::Import(ImportDecl {
                path: "mathlib".to_string(),
                alias: Some("m".to_string()),
                span: span(),
            })],
        },
    );
    files.insert(PathBuf::from("mathlib.minz"), SourceFile { decls: Vec::new() });
    let parser = FixedModuleParser { files };
    let options = CompileOptions::new();
    let mut session = CompileSession::new(options);

    let results = session
        .compile(&parser, &PathBuf::from("main.minz"), "main")
        .expect("root module should load");
    assert_eq!(results.len(), 2);
    assert!(!session.has_errors());

    // A second session whose root imports a module that was never
    // registered with the parser: the root still loads, but the
    // missing import is reported rather than silently dropped.
    let mut broken_files: FxHashMap<PathBuf, SourceFile> = FxHashMap::default();
    broken_files.insert(
        PathBuf::from("main.minz"),
        SourceFile {
            decls: vec![Decl::Import(ImportDecl {
                path: "missing".to_string(),
                alias: None,
                span: span(),
            })],
        },
    );
    let broken_parser = FixedModuleParser { files: broken_files };
    let mut broken_session = CompileSession::new(CompileOptions::new());
    let broken_results = broken_session.compile(&broken_parser, &PathBuf::from("main.minz"), "main");
    assert!(broken_results.is_some());
    assert!(broken_session.has_errors());
    assert!(broken_session
        .diags
        .iter()
        .any(|d| d.kind == minzc::DiagnosticKind::ImportNotFound));
}

/// Scenario 6 (spec §8): an `@interrupt @port(...)` handler is emitted
/// with the shadow-register exchange in place of a push/pop prologue
/// and exits with `RETI` instead of `RET`.
#[test]
fn scenario_6_interrupt_handler_uses_shadow_registers_and_reti() {
    init_logging();
    let tick = FunctionDecl {
        name: "tick".to_string(),
        params: Vec::new(),
        ret: TypeExpr::Named("void".to_string()),
        body: Some(minzc::ast::Block {
            stmts: vec![
                Stmt::Let {
                    name: "counter".to_string(),
                    ty: Some(TypeExpr::Named("u8".to_string())),
                    mutable: true,
                    init: Some(int(0)),
                    span: span(),
                },
                Stmt::Assign {
                    target: ident("counter"),
                    value: Expr::Binary {
                        op: minzc::ast::BinOp::Add,
                        lhs: Box::new(ident("counter")),
                        rhs: Box::new(int(1)),
                        span: span(),
                    },
                    span: span(),
                },
            ],
        }),
        attributes: vec![Attribute::Interrupt, Attribute::Port(0x38)],
        is_public: false,
        span: span(),
    };
    let file = SourceFile { decls: vec![Decl::Function(tick)] };

    let mut session = CompileSession::new(CompileOptions::new());
    let mir = session.compile_single_module("main", file);
    assert!(!session.has_errors());

    let fid = mir.by_name("tick").unwrap();
    assert!(mir.functions[fid].attributes.is_interrupt);
    assert_eq!(mir.functions[fid].attributes.interrupt_port, Some(0x38));

    let backend = Z80Backend;
    let text = session.emit(&backend, &mir);
    assert!(text.contains("tick:"));
    assert!(text.contains("EX AF, AF'"));
    assert!(text.contains("EXX"));
    assert!(text.contains("RETI"));
}
