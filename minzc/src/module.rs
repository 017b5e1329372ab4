//! Modules and symbols (spec §3.2, §3.3).

use crate::ast::SourceFile;
use crate::types::TypeId;
use minzc_entity::{entity_impl, PrimaryMap};
use rustc_hash::FxHashMap;
use std::path::PathBuf;

/// Identifies one resolved module within a compilation's module graph.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u32);
entity_impl!(ModuleId, "mod");

/// Identifies one symbol within its declaring module's symbol table.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);
entity_impl!(SymbolId, "sym");

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Mutability {
    Mutable,
    Immutable,
}

/// What kind of symbol a `Symbol` describes (spec §3.3).
#[derive(Clone, Debug)]
pub enum SymbolKind {
    Function,
    Type,
    Variable,
    Parameter,
    Constant,
}

/// A named entity visible somewhere in the program: a function, type,
/// variable, parameter, or constant.
#[derive(Clone, Debug)]
pub struct Symbol {
    pub name: String,
    pub fqn: String,
    pub module: ModuleId,
    pub kind: SymbolKind,
    pub ty: Option<TypeId>,
    pub mutability: Mutability,
    pub visibility: Visibility,
}

/// A resolved import: the local alias under which `target` is visible
/// in the importing module's scope, per spec §3.2's aliasing rule.
#[derive(Clone, Debug)]
pub struct Import {
    pub local_alias: String,
    pub target: ModuleId,
}

/// One resolved module: its fully-qualified dotted name, the file it
/// was parsed from, its AST, its own symbol table, and the imports it
/// has bound.
pub struct Module {
    pub fqn: String,
    pub file_path: PathBuf,
    pub ast: SourceFile,
    pub symbols: PrimaryMap<SymbolId, Symbol>,
    /// Unqualified name -> symbol, for this module's own top-level
    /// declarations (spec §3.2's "local scope" lookup tier).
    pub exports: FxHashMap<String, SymbolId>,
    /// Local alias -> imported module, consulted for `alias.symbol`
    /// lookups (spec §3.2's "imported aliases" tier).
    pub imports: Vec<Import>,
}

impl Module {
    pub fn new(fqn: impl Into<String>, file_path: PathBuf, ast: SourceFile) -> Self {
        Self {
            fqn: fqn.into(),
            file_path,
            ast,
            symbols: PrimaryMap::new(),
            exports: FxHashMap::default(),
            imports: Vec::new(),
        }
    }

    /// Declare `symbol`, exposing it under its own name if public.
    pub fn declare(&mut self, symbol: Symbol) -> SymbolId {
        let name = symbol.name.clone();
        let is_public = matches!(symbol.visibility, Visibility::Public);
        let id = self.symbols.push(symbol);
        if is_public {
            self.exports.insert(name, id);
        }
        id
    }

    /// Resolve `alias` to the module it was bound to via `import .. as
    /// alias`.
    pub fn resolve_alias(&self, alias: &str) -> Option<ModuleId> {
        self.imports
            .iter()
            .find(|i| i.local_alias == alias)
            .map(|i| i.target)
    }
}
