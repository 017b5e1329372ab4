//! Lambda lifting (spec §4.2.3).
//!
//! Runs as a pre-pass over a function body before lowering: every
//! `Expr::Lambda` is replaced by a reference to a freshly synthesized
//! top-level `FunctionDecl`, and the synthesized functions are handed
//! back to the caller to be lowered alongside the rest of the module.

use crate::ast::{Block, Expr, FunctionDecl, LambdaExpr, Stmt, TypeExpr};
use crate::diagnostics::{DiagnosticBag, DiagnosticKind};
use crate::span::Span;
use std::collections::HashSet;

/// How a lambda's free variables were categorized (spec §4.2.3).
#[derive(Debug, PartialEq, Eq)]
pub enum CaptureKind {
    /// No free variables: the lambda becomes a plain function reference.
    None,
    /// Only immutable, compile-time-known captures: a specialized
    /// function is generated per call site with the values embedded as
    /// immediates (the lambda form of SMC specialization).
    ImmutableConstant(Vec<String>),
    /// Anything else — rejected today (spec design note: a future
    /// extension threads an explicit environment record).
    Unsupported(Vec<String>),
}

/// Lifts every lambda found while walking a function body, accumulating
/// synthesized top-level functions and rewriting the originating
/// expressions in place to plain identifier references to them.
pub struct LambdaLifter<'a> {
    module_name: &'a str,
    enclosing_fn: &'a str,
    next_index: u32,
    pub lifted: Vec<FunctionDecl>,
}

impl<'a> LambdaLifter<'a> {
    pub fn new(module_name: &'a str, enclosing_fn: &'a str) -> Self {
        Self { module_name, enclosing_fn, next_index: 0, lifted: Vec::new() }
    }

    fn fresh_name(&mut self) -> String {
        let name = format!("{}::{}::lambda${}", self.module_name, self.enclosing_fn, self.next_index);
        self.next_index += 1;
        name
    }

    /// Walk every statement in `body`, lifting lambdas found in
    /// expression position. `bound` is the set of names already bound
    /// in the enclosing scopes (parameters and locals seen so far),
    /// used to decide which identifiers inside a lambda are free.
    pub fn lift_block(&mut self, body: &mut Block, bound: &mut HashSet<String>) {
        for stmt in &mut body.stmts {
            self.lift_stmt(stmt, bound);
        }
    }

    fn lift_stmt(&mut self, stmt: &mut Stmt, bound: &mut HashSet<String>) {
        match stmt {
            Stmt::Let { name, init, .. } => {
                if let Some(e) = init {
                    self.lift_expr(e, bound);
                }
                bound.insert(name.clone());
            }
            Stmt::Assign { target, value, .. } => {
                self.lift_expr(target, bound);
                self.lift_expr(value, bound);
            }
            Stmt::If { cond, then_block, else_block, .. } => {
                self.lift_expr(cond, bound);
                let mut inner = bound.clone();
                self.lift_block(then_block, &mut inner);
                if let Some(e) = else_block {
                    let mut inner = bound.clone();
                    self.lift_block(e, &mut inner);
                }
            }
            Stmt::While { cond, body, .. } => {
                self.lift_expr(cond, bound);
                let mut inner = bound.clone();
                self.lift_block(body, &mut inner);
            }
            Stmt::ForRange { var, lo, hi, body, .. } => {
                self.lift_expr(lo, bound);
                self.lift_expr(hi, bound);
                let mut inner = bound.clone();
                inner.insert(var.clone());
                self.lift_block(body, &mut inner);
            }
            Stmt::LoopOverArray { array, binding, body, .. } => {
                self.lift_expr(array, bound);
                let mut inner = bound.clone();
                inner.insert(binding.clone());
                self.lift_block(body, &mut inner);
            }
            Stmt::Loop { body, .. } | Stmt::Defer { body, .. } => {
                let mut inner = bound.clone();
                self.lift_block(body, &mut inner);
            }
            Stmt::Return { value, .. } => {
                if let Some(e) = value {
                    self.lift_expr(e, bound);
                }
            }
            Stmt::Match { scrutinee, arms, .. } => {
                self.lift_expr(scrutinee, bound);
                for arm in arms {
                    let mut inner = bound.clone();
                    self.lift_block(&mut arm.body, &mut inner);
                }
            }
            Stmt::InlineAsm { .. } => {}
            Stmt::Expr { expr, .. } => self.lift_expr(expr, bound),
        }
    }

    fn lift_expr(&mut self, expr: &mut Expr, bound: &HashSet<String>) {
        match expr {
            Expr::Lambda(lambda) => {
                let mut free = HashSet::new();
                let mut params_bound: HashSet<String> =
                    lambda.params.iter().map(|p| p.name.clone()).collect();
                collect_free_vars(&lambda.body, &mut params_bound, &mut free);
                let captures: Vec<String> =
                    free.into_iter().filter(|n| bound.contains(n)).collect();

                let name = self.fresh_name();
                let decl = self.build_function_decl(name.clone(), lambda);
                self.lifted.push(decl);

                *expr = Expr::Identifier { name, span: lambda.span };
            }
            Expr::Binary { lhs, rhs, .. } => {
                self.lift_expr(lhs, bound);
                self.lift_expr(rhs, bound);
            }
            Expr::Unary { operand, .. } => self.lift_expr(operand, bound),
            Expr::Call { callee, args, .. } => {
                self.lift_expr(callee, bound);
                for a in args {
                    self.lift_expr(a, bound);
                }
            }
            Expr::MethodCall { receiver, args, .. } => {
                self.lift_expr(receiver, bound);
                for a in args {
                    self.lift_expr(a, bound);
                }
            }
            Expr::Field { base, .. } => self.lift_expr(base, bound),
            Expr::Index { base, index, .. } => {
                self.lift_expr(base, bound);
                self.lift_expr(index, bound);
            }
            Expr::Cast { value, .. } => self.lift_expr(value, bound),
            Expr::Range { lo, hi, .. } => {
                self.lift_expr(lo, bound);
                self.lift_expr(hi, bound);
            }
            Expr::StructLiteral { fields, .. } => {
                for (_, v) in fields {
                    self.lift_expr(v, bound);
                }
            }
            Expr::ArrayLiteral { elements, .. } => {
                for e in elements {
                    self.lift_expr(e, bound);
                }
            }
            Expr::Try { expr: inner, .. } => self.lift_expr(inner, bound),
            Expr::TryOrDefault { expr: inner, default, .. } => {
                self.lift_expr(inner, bound);
                self.lift_expr(default, bound);
            }
            Expr::IntLiteral { .. }
            | Expr::BoolLiteral { .. }
            | Expr::StringLiteral { .. }
            | Expr::Identifier { .. } => {}
        }
    }

    fn build_function_decl(&self, name: String, lambda: &LambdaExpr) -> FunctionDecl {
        FunctionDecl {
            name,
            params: lambda.params.clone(),
            ret: TypeExpr::Named("auto".to_string()),
            body: Some(lambda.body.clone()),
            attributes: Vec::new(),
            is_public: false,
            span: lambda.span,
        }
    }
}

/// Classify a lambda's captures, given the set of names that are
/// compile-time-known constants among the free variables (the rest are
/// treated as mutable/runtime-valued and rejected per spec §4.2.3).
pub fn classify_captures(free: &[String], known_const: &HashSet<String>) -> CaptureKind {
    if free.is_empty() {
        return CaptureKind::None;
    }
    if free.iter().all(|n| known_const.contains(n)) {
        CaptureKind::ImmutableConstant(free.to_vec())
    } else {
        CaptureKind::Unsupported(free.to_vec())
    }
}

pub fn report_unsupported_capture(
    names: &[String],
    span: Span,
    diags: &mut DiagnosticBag,
) {
    diags.error(
        DiagnosticKind::UnsupportedCapture,
        span,
        format!("lambda captures {} which cannot be embedded as an immediate", names.join(", ")),
    );
}

fn collect_free_vars(body: &Block, bound: &mut HashSet<String>, free: &mut HashSet<String>) {
    for stmt in &body.stmts {
        match stmt {
            Stmt::Let { name, init, .. } => {
                if let Some(e) = init {
                    collect_free_in_expr(e, bound, free);
                }
                bound.insert(name.clone());
            }
            Stmt::Assign { target, value, .. } => {
                collect_free_in_expr(target, bound, free);
                collect_free_in_expr(value, bound, free);
            }
            Stmt::If { cond, then_block, else_block, .. } => {
                collect_free_in_expr(cond, bound, free);
                collect_free_vars(then_block, &mut bound.clone(), free);
                if let Some(b) = else_block {
                    collect_free_vars(b, &mut bound.clone(), free);
                }
            }
            Stmt::While { cond, body, .. } => {
                collect_free_in_expr(cond, bound, free);
                collect_free_vars(body, &mut bound.clone(), free);
            }
            Stmt::ForRange { var, lo, hi, body, .. } => {
                collect_free_in_expr(lo, bound, free);
                collect_free_in_expr(hi, bound, free);
                let mut inner = bound.clone();
                inner.insert(var.clone());
                collect_free_vars(body, &mut inner, free);
            }
            Stmt::LoopOverArray { array, binding, body, .. } => {
                collect_free_in_expr(array, bound, free);
                let mut inner = bound.clone();
                inner.insert(binding.clone());
                collect_free_vars(body, &mut inner, free);
            }
            Stmt::Loop { body, .. } | Stmt::Defer { body, .. } => {
                collect_free_vars(body, &mut bound.clone(), free);
            }
            Stmt::Return { value, .. } => {
                if let Some(e) = value {
                    collect_free_in_expr(e, bound, free);
                }
            }
            Stmt::Match { scrutinee, arms, .. } => {
                collect_free_in_expr(scrutinee, bound, free);
                for arm in arms {
                    collect_free_vars(&arm.body, &mut bound.clone(), free);
                }
            }
            Stmt::InlineAsm { .. } => {}
            Stmt::Expr { expr, .. } => collect_free_in_expr(expr, bound, free),
        }
    }
}

fn collect_free_in_expr(expr: &Expr, bound: &HashSet<String>, free: &mut HashSet<String>) {
    match expr {
        Expr::Identifier { name, .. } => {
            if !bound.contains(name) {
                free.insert(name.clone());
            }
        }
        Expr::Binary { lhs, rhs, .. } => {
            collect_free_in_expr(lhs, bound, free);
            collect_free_in_expr(rhs, bound, free);
        }
        Expr::Unary { operand, .. } => collect_free_in_expr(operand, bound, free),
        Expr::Call { callee, args, .. } => {
            collect_free_in_expr(callee, bound, free);
            for a in args {
                collect_free_in_expr(a, bound, free);
            }
        }
        Expr::MethodCall { receiver, args, .. } => {
            collect_free_in_expr(receiver, bound, free);
            for a in args {
                collect_free_in_expr(a, bound, free);
            }
        }
        Expr::Field { base, .. } => collect_free_in_expr(base, bound, free),
        Expr::Index { base, index, .. } => {
            collect_free_in_expr(base, bound, free);
            collect_free_in_expr(index, bound, free);
        }
        Expr::Cast { value, .. } => collect_free_in_expr(value, bound, free),
        Expr::Range { lo, hi, .. } => {
            collect_free_in_expr(lo, bound, free);
            collect_free_in_expr(hi, bound, free);
        }
        Expr::StructLiteral { fields, .. } => {
            for (_, v) in fields {
                collect_free_in_expr(v, bound, free);
            }
        }
        Expr::ArrayLiteral { elements, .. } => {
            for e in elements {
                collect_free_in_expr(e, bound, free);
            }
        }
        Expr::Try { expr: inner, .. } => collect_free_in_expr(inner, bound, free),
        Expr::TryOrDefault { expr: inner, default, .. } => {
            collect_free_in_expr(inner, bound, free);
            collect_free_in_expr(default, bound, free);
        }
        Expr::Lambda(l) => {
            let mut inner_bound = bound.clone();
            inner_bound.extend(l.params.iter().map(|p| p.name.clone()));
            collect_free_vars(&l.body, &mut inner_bound, free);
        }
        Expr::IntLiteral { .. } | Expr::BoolLiteral { .. } | Expr::StringLiteral { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Param;

    fn ident(name: &str) -> Expr {
        Expr::Identifier { name: name.to_string(), span: Span::synthetic() }
    }

    #[test]
    fn lambda_with_no_captures_becomes_identifier() {
        let mut lifter = LambdaLifter::new("geom", "main");
        let mut body = Block {
            stmts: vec![Stmt::Expr {
                expr: Expr::Lambda(LambdaExpr {
                    params: vec![Param { name: "x".into(), ty: TypeExpr::Named("u8".into()), span: Span::synthetic() }],
                    body: Block { stmts: vec![Stmt::Return { value: Some(ident("x")), span: Span::synthetic() }] },
                    span: Span::synthetic(),
                }),
                span: Span::synthetic(),
            }],
        };
        let mut bound = HashSet::new();
        lifter.lift_block(&mut body, &mut bound);
        assert_eq!(lifter.lifted.len(), 1);
        assert_eq!(lifter.lifted[0].name, "geom::main::lambda$0");
        match &body.stmts[0] {
            Stmt::Expr { expr: Expr::Identifier { name, .. }, .. } => {
                assert_eq!(name, "geom::main::lambda$0");
            }
            _ => panic!("expected identifier after lifting"),
        }
    }

    #[test]
    fn classify_captures_distinguishes_const_from_unsupported() {
        let mut known = HashSet::new();
        known.insert("k".to_string());
        assert_eq!(classify_captures(&[], &known), CaptureKind::None);
        assert_eq!(
            classify_captures(&["k".to_string()], &known),
            CaptureKind::ImmutableConstant(vec!["k".to_string()])
        );
        assert_eq!(
            classify_captures(&["mut_var".to_string()], &known),
            CaptureKind::Unsupported(vec!["mut_var".to_string()])
        );
    }
}
