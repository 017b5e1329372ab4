//! Error propagation desugaring (spec §4.2.5).
//!
//! `T ?` is sugar for a built-in two-variant enum `Result<T, ErrorCode>`
//! (tag 0 = ok, tag 1 = error). `e?` and `e??` never synthesize an
//! AST-level `match` — lowering goes straight to MIR branches, mirroring
//! `4.2.6`'s direct-to-branches treatment of every other control form.

use crate::types::{TypeData, TypeId, TypeInterner};

pub const OK_TAG: i64 = 0;
pub const ERROR_TAG: i64 = 1;

/// Build (or fetch, via the interner's dedup) the `T ?` error-union
/// type for `ok`, with `error` as the fixed error-code payload type.
pub fn error_union_of(ok: TypeId, types: &mut TypeInterner) -> TypeId {
    let error = types.u8();
    types.intern(TypeData::ErrorUnion { ok, error })
}

/// Whether `ty` is an error-union shape, and if so, its ok/error
/// payload types.
pub fn as_error_union(ty: TypeId, types: &TypeInterner) -> Option<(TypeId, TypeId)> {
    match types.lookup(ty) {
        TypeData::ErrorUnion { ok, error } => Some((*ok, *error)),
        _ => None,
    }
}

/// Describes the MIR shape `?`/`??` lower to, for the lowerer to emit
/// directly rather than building an intermediate `match`:
///
/// ```text
/// Cmp  tag, OK_TAG
/// JumpIfNot ok_block      ; branches to the error path when tag != OK_TAG
/// ok_block:   <continue with the ok payload>
/// err_block:  <Return tag>  (bare `?`)
///           | <use `default` instead of the ok payload>  (`??`)
/// ```
pub struct TryLowering {
    pub ok_ty: TypeId,
    pub error_ty: TypeId,
}

impl TryLowering {
    pub fn for_union(union_ty: TypeId, types: &TypeInterner) -> Option<Self> {
        as_error_union(union_ty, types).map(|(ok_ty, error_ty)| Self { ok_ty, error_ty })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_union_round_trips_through_the_interner() {
        let mut types = TypeInterner::new();
        let u8t = types.u8();
        let union_ty = error_union_of(u8t, &mut types);
        let (ok, _err) = as_error_union(union_ty, &types).unwrap();
        assert_eq!(ok, u8t);
    }

    #[test]
    fn non_union_type_is_not_a_try_target() {
        let mut types = TypeInterner::new();
        let u8t = types.u8();
        assert!(as_error_union(u8t, &types).is_none());
    }
}
