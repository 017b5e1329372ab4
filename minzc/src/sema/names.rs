//! Name resolution scope chain (spec §4.2.1).
//!
//! Three nested tiers — module, function, block — implemented as a
//! plain stack of hash maps; lookups walk innermost-first and stop at
//! the first hit.

use crate::mir::Reg;
use crate::types::TypeId;
use rustc_hash::FxHashMap;

/// What a name in scope refers to once lowering has started: either a
/// live virtual register (the common case for locals whose address is
/// never taken) or a stable slot in the SMC-friendly memory region
/// (spec §4.2.6).
#[derive(Copy, Clone, Debug)]
pub enum Binding {
    Register { reg: Reg, ty: TypeId, mutable: bool },
    Slot { addr: u16, ty: TypeId, mutable: bool },
    /// A module-level `const` (spec §3.3, §4.2.1): its value was
    /// already folded to an integer by the gathering pass, so every
    /// reference lowers straight to a `LoadConst`, never a load from
    /// memory.
    Const { value: i64, ty: TypeId },
}

impl Binding {
    pub fn ty(&self) -> TypeId {
        match self {
            Binding::Register { ty, .. } => *ty,
            Binding::Slot { ty, .. } => *ty,
            Binding::Const { ty, .. } => *ty,
        }
    }

    pub fn is_mutable(&self) -> bool {
        match self {
            Binding::Register { mutable, .. } => *mutable,
            Binding::Slot { mutable, .. } => *mutable,
            Binding::Const { .. } => false,
        }
    }
}

#[derive(Default)]
struct Scope {
    bindings: FxHashMap<String, Binding>,
}

/// The live scope stack for one function body being lowered. Module
/// scope is pushed once by the caller and never popped during that
/// module's lowering; `push_block`/`pop_block` bracket every nested
/// block, including the function's own top-level block.
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self { scopes: vec![Scope::default()] }
    }

    pub fn push_block(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_block(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot pop the module scope");
        self.scopes.pop();
    }

    pub fn declare(&mut self, name: impl Into<String>, binding: Binding) {
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .bindings
            .insert(name.into(), binding);
    }

    /// Innermost-first lookup across every open scope.
    pub fn lookup(&self, name: &str) -> Option<Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.bindings.get(name).copied())
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}
