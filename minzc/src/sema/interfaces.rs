//! Interface monomorphization (spec §4.2.4).
//!
//! An `impl I for T` block registers concrete methods in an
//! `ImplTable`; every `x.m(...)` call site where `x`'s type is known
//! concretely is resolved directly against this table during lowering.
//! No vtable is ever built or emitted.

use crate::mir::FuncId;
use crate::types::TypeId;
use rustc_hash::FxHashMap;

/// Key: `(concrete type, interface name, method name)`. `interface`
/// is `None` for inherent methods (an `impl T` block with no `for`
/// interface), consulted before any implemented interface per spec
/// §4.2.1's method-call resolution order.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct MethodKey {
    pub ty: TypeId,
    pub interface: Option<String>,
    pub method: String,
}

#[derive(Default)]
pub struct ImplTable {
    table: FxHashMap<MethodKey, FuncId>,
}

impl ImplTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: MethodKey, func: FuncId) {
        self.table.insert(key, func);
    }

    /// Resolve `ty.method(..)`: first as an inherent method, then
    /// against every interface `ty` implements (spec §4.2.1).
    pub fn resolve_inherent(&self, ty: TypeId, method: &str) -> Option<FuncId> {
        self.table
            .get(&MethodKey { ty, interface: None, method: method.to_string() })
            .copied()
    }

    pub fn resolve_interface(&self, ty: TypeId, interface: &str, method: &str) -> Option<FuncId> {
        self.table
            .get(&MethodKey {
                ty,
                interface: Some(interface.to_string()),
                method: method.to_string(),
            })
            .copied()
    }

    /// Walk every interface name known to implement `method` for `ty`,
    /// returning the first match — used when the call site doesn't name
    /// the interface explicitly (`x.draw()` rather than
    /// `Drawable::draw(x)`).
    pub fn resolve_any(&self, ty: TypeId, method: &str) -> Option<FuncId> {
        if let Some(f) = self.resolve_inherent(ty, method) {
            return Some(f);
        }
        self.table
            .iter()
            .find(|(k, _)| k.ty == ty && k.interface.is_some() && k.method == method)
            .map(|(_, f)| *f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minzc_entity::EntityRef;

    #[test]
    fn call_site_resolves_to_concrete_function_no_vtable() {
        let mut table = ImplTable::new();
        let circle = TypeId::new(1);
        let square = TypeId::new(2);
        let draw_circle = FuncId::new(10);
        let draw_square = FuncId::new(11);
        table.register(
            MethodKey { ty: circle, interface: Some("Drawable".into()), method: "draw".into() },
            draw_circle,
        );
        table.register(
            MethodKey { ty: square, interface: Some("Drawable".into()), method: "draw".into() },
            draw_square,
        );

        assert_eq!(table.resolve_any(circle, "draw"), Some(draw_circle));
        assert_eq!(table.resolve_any(square, "draw"), Some(draw_square));
    }

    #[test]
    fn inherent_method_takes_priority_over_interface() {
        let mut table = ImplTable::new();
        let ty = TypeId::new(0);
        let inherent = FuncId::new(1);
        let via_interface = FuncId::new(2);
        table.register(MethodKey { ty, interface: None, method: "m".into() }, inherent);
        table.register(
            MethodKey { ty, interface: Some("I".into()), method: "m".into() },
            via_interface,
        );
        assert_eq!(table.resolve_any(ty, "m"), Some(inherent));
    }
}
