//! Type checking, inference, and constant folding (spec §4.2.2).

use crate::ast::{BinOp, Expr, UnOp};
use crate::diagnostics::{DiagnosticBag, DiagnosticKind};
use crate::span::Span;
use crate::types::{IntWidth, TypeData, TypeId, TypeInterner};

/// A compile-time-known value, produced by `fold_const` and consumed by
/// array-size and global-initializer evaluation (spec §4.2.2).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConstValue {
    Int(i64, TypeId),
    Bool(bool),
}

impl ConstValue {
    pub fn as_i64(self) -> Option<i64> {
        match self {
            ConstValue::Int(v, _) => Some(v),
            ConstValue::Bool(_) => None,
        }
    }

    pub fn ty(self, types: &mut TypeInterner) -> TypeId {
        match self {
            ConstValue::Int(_, ty) => ty,
            ConstValue::Bool(_) => types.bool_(),
        }
    }
}

/// Wrap `value` to the modulus of `width`, per spec §8's boundary
/// behavior (8-bit mod 256, 16-bit mod 65536; 24-bit is left
/// unwrapped, matching `IntWidth::wrap_modulus`'s `None` case).
fn wrap_to_width(value: i64, width: IntWidth) -> i64 {
    match width.wrap_modulus() {
        Some(modulus) => {
            let m = modulus as i64;
            ((value % m) + m) % m
        }
        None => value,
    }
}

fn int_width_of(ty: TypeId, types: &TypeInterner) -> Option<(IntWidth, bool)> {
    match types.lookup(ty) {
        TypeData::Int { width, signed } => Some((*width, *signed)),
        _ => None,
    }
}

/// Recursively fold `expr` into a `ConstValue` if every operand is
/// itself a literal or a previously-folded constant (spec §4.2.2); a
/// lookup function resolves identifiers that refer to already-folded
/// `const` declarations.
pub fn fold_const(
    expr: &Expr,
    types: &mut TypeInterner,
    lookup_const: &impl Fn(&str) -> Option<ConstValue>,
) -> Option<ConstValue> {
    match expr {
        Expr::IntLiteral { value, .. } => Some(ConstValue::Int(*value, types.u16())),
        Expr::BoolLiteral { value, .. } => Some(ConstValue::Bool(*value)),
        Expr::Identifier { name, .. } => lookup_const(name),
        Expr::Unary { op, operand, .. } => {
            let v = fold_const(operand, types, lookup_const)?;
            match (op, v) {
                (UnOp::Neg, ConstValue::Int(i, ty)) => {
                    let width = int_width_of(ty, types).map(|(w, _)| w).unwrap_or(IntWidth::W16);
                    Some(ConstValue::Int(wrap_to_width(-i, width), ty))
                }
                (UnOp::Not, ConstValue::Bool(b)) => Some(ConstValue::Bool(!b)),
                (UnOp::Not, ConstValue::Int(i, ty)) => {
                    let width = int_width_of(ty, types).map(|(w, _)| w).unwrap_or(IntWidth::W16);
                    Some(ConstValue::Int(wrap_to_width(!i, width), ty))
                }
                _ => None,
            }
        }
        Expr::Binary { op, lhs, rhs, .. } => {
            let l = fold_const(lhs, types, lookup_const)?;
            let r = fold_const(rhs, types, lookup_const)?;
            fold_binop(*op, l, r, types)
        }
        _ => None,
    }
}

fn fold_binop(op: BinOp, l: ConstValue, r: ConstValue, types: &mut TypeInterner) -> Option<ConstValue> {
    use ConstValue::*;
    match (l, r) {
        (Int(a, ta), Int(b, _)) => {
            let width = int_width_of(ta, types).map(|(w, _)| w).unwrap_or(IntWidth::W16);
            let raw = match op {
                BinOp::Add => a.checked_add(b)?,
                BinOp::Sub => a.checked_sub(b)?,
                BinOp::Mul => a.checked_mul(b)?,
                BinOp::Div => a.checked_div(b)?,
                BinOp::Mod => a.checked_rem(b)?,
                BinOp::And => a & b,
                BinOp::Or => a | b,
                BinOp::Xor => a ^ b,
                BinOp::Shl => a << b,
                BinOp::Shr => a >> b,
                BinOp::Eq => return Some(Bool(a == b)),
                BinOp::Ne => return Some(Bool(a != b)),
                BinOp::Lt => return Some(Bool(a < b)),
                BinOp::Le => return Some(Bool(a <= b)),
                BinOp::Gt => return Some(Bool(a > b)),
                BinOp::Ge => return Some(Bool(a >= b)),
                BinOp::LogicalAnd | BinOp::LogicalOr => return None,
            };
            Some(Int(wrap_to_width(raw, width), ta))
        }
        (Bool(a), Bool(b)) => match op {
            BinOp::LogicalAnd => Some(Bool(a && b)),
            BinOp::LogicalOr => Some(Bool(a || b)),
            BinOp::Eq => Some(Bool(a == b)),
            BinOp::Ne => Some(Bool(a != b)),
            _ => None,
        },
        _ => None,
    }
}

/// The one implicit-promotion rule named in spec §4.2.2: narrower
/// unsigned widens to a wider unsigned. Every other mismatch is
/// reported as `TypeMismatch` and requires an explicit `as` cast.
pub fn check_assignable(
    from: TypeId,
    to: TypeId,
    span: Span,
    types: &TypeInterner,
    diags: &mut DiagnosticBag,
) -> bool {
    if from == to || types.can_implicitly_promote(from, to) {
        return true;
    }
    diags.error(
        DiagnosticKind::TypeMismatch,
        span,
        format!("expected `{}`, found `{}`", types.lookup(to), types.lookup(from)),
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    fn no_consts(_: &str) -> Option<ConstValue> {
        None
    }

    #[test]
    fn folds_arithmetic_over_literals() {
        let mut types = TypeInterner::new();
        let expr = Expr::Binary {
            op: BinOp::Add,
            lhs: Box::new(Expr::IntLiteral { value: 2, suffix: None, span: Span::synthetic() }),
            rhs: Box::new(Expr::IntLiteral { value: 3, suffix: None, span: Span::synthetic() }),
            span: Span::synthetic(),
        };
        let folded = fold_const(&expr, &mut types, &no_consts).unwrap();
        assert_eq!(folded.as_i64(), Some(5));
    }

    #[test]
    fn u8_addition_wraps_at_256() {
        let mut types = TypeInterner::new();
        let u8t = types.u8();
        let expr = Expr::Binary {
            op: BinOp::Add,
            lhs: Box::new(Expr::IntLiteral { value: 250, suffix: None, span: Span::synthetic() }),
            rhs: Box::new(Expr::IntLiteral { value: 10, suffix: None, span: Span::synthetic() }),
            span: Span::synthetic(),
        };
        // Force the literal type to u8 the way the analyzer would after
        // inferring it from a typed context.
        let folded = match fold_const(&expr, &mut types, &no_consts).unwrap() {
            ConstValue::Int(v, _) => ConstValue::Int(wrap_to_width(v, IntWidth::W8), u8t),
            other => other,
        };
        assert_eq!(folded.as_i64(), Some(4));
    }

    #[test]
    fn widening_promotion_is_allowed_narrowing_is_not() {
        let mut types = TypeInterner::new();
        let mut diags = DiagnosticBag::new();
        let u8t = types.u8();
        let u16t = types.u16();
        assert!(check_assignable(u8t, u16t, Span::synthetic(), &types, &mut diags));
        assert!(!diags.has_errors());
        assert!(!check_assignable(u16t, u8t, Span::synthetic(), &types, &mut diags));
        assert!(diags.has_errors());
    }
}
