//! The MinZ type system (spec §3.4): primitives, fixed-point variants,
//! and aggregates, interned so that structurally identical types share
//! one `TypeId`.

use minzc_entity::{entity_impl, PrimaryMap};
use rustc_hash::FxHashMap;
use std::fmt;

/// An interned, structurally-deduplicated reference to a `TypeData`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);
entity_impl!(TypeId, "ty");

/// Integer/fixed-point signedness and width, shared by `Int` and `Fixed`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum IntWidth {
    W8,
    W16,
    W24,
}

impl IntWidth {
    /// Width in bytes, the figure that governs 8-bit vs 16-bit (vs
    /// 24-bit pointer) emission per spec §3.4's invariant.
    pub fn bytes(self) -> u8 {
        match self {
            IntWidth::W8 => 1,
            IntWidth::W16 => 2,
            IntWidth::W24 => 3,
        }
    }

    /// The modulus arithmetic on this width wraps at (spec §8 boundary
    /// behaviors): `None` for 24-bit, which the spec does not give an
    /// explicit wraparound rule for beyond "backend-defined."
    pub fn wrap_modulus(self) -> Option<u32> {
        match self {
            IntWidth::W8 => Some(1 << 8),
            IntWidth::W16 => Some(1 << 16),
            IntWidth::W24 => None,
        }
    }
}

/// Fixed-point fractional/integer bit split, e.g. `f8.8` is
/// `FixedShape { int_bits: 8, frac_bits: 8 }`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct FixedShape {
    pub int_bits: u8,
    pub frac_bits: u8,
}

/// One ordered, named field of a struct.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeId,
}

/// One enum discriminant, with an optional payload type.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct EnumVariant {
    pub name: String,
    pub discriminant: i64,
    pub payload: Option<TypeId>,
}

/// One bit-struct sub-field: a named range of bits with its own type.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct BitField {
    pub name: String,
    pub bit_offset: u8,
    pub bit_width: u8,
    pub ty: TypeId,
}

/// The structural shape of a type, keyed by `TypeId` in `TypeInterner`.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TypeData {
    Int {
        width: IntWidth,
        signed: bool,
    },
    Fixed {
        shape: FixedShape,
        signed: bool,
    },
    Bool,
    Void,
    Pointer {
        pointee: TypeId,
        mutable: bool,
    },
    Array {
        element: TypeId,
        len: u32,
    },
    Struct {
        name: String,
        fields: Vec<FieldDef>,
    },
    Enum {
        name: String,
        variants: Vec<EnumVariant>,
    },
    Function {
        params: Vec<TypeId>,
        ret: TypeId,
    },
    Interface {
        name: String,
        methods: Vec<(String, TypeId)>,
    },
    BitStruct {
        name: String,
        underlying_bytes: u8,
        fields: Vec<BitField>,
    },
    /// `T ?` — the built-in error-union shape the `?`/`??` operators
    /// desugar against (spec §4.2.5).
    ErrorUnion {
        ok: TypeId,
        error: TypeId,
    },
    Alias {
        name: String,
        target: TypeId,
    },
}

impl fmt::Display for TypeData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypeData::Int { width, signed } => {
                write!(f, "{}{}", if *signed { "i" } else { "u" }, width.bytes() * 8)
            }
            TypeData::Fixed { shape, signed } => write!(
                f,
                "{}f{}.{}",
                if *signed { "" } else { "u" },
                shape.int_bits,
                shape.frac_bits
            ),
            TypeData::Bool => write!(f, "bool"),
            TypeData::Void => write!(f, "void"),
            TypeData::Pointer { mutable, .. } => {
                write!(f, "*{}T", if *mutable { "mut " } else { "" })
            }
            TypeData::Array { len, .. } => write!(f, "[T; {}]", len),
            TypeData::Struct { name, .. } => write!(f, "{}", name),
            TypeData::Enum { name, .. } => write!(f, "{}", name),
            TypeData::Function { .. } => write!(f, "fn(..)"),
            TypeData::Interface { name, .. } => write!(f, "{}", name),
            TypeData::BitStruct { name, .. } => write!(f, "{}", name),
            TypeData::ErrorUnion { .. } => write!(f, "T?"),
            TypeData::Alias { name, .. } => write!(f, "{}", name),
        }
    }
}

/// Interns `TypeData` so equal structural shapes share a `TypeId`,
/// letting the analyzer and optimizer compare types by id equality
/// rather than deep structural comparison on every check.
#[derive(Default)]
pub struct TypeInterner {
    table: PrimaryMap<TypeId, TypeData>,
    by_shape: FxHashMap<TypeData, TypeId>,
}

impl TypeInterner {
    pub fn new() -> Self {
        let mut interner = Self {
            table: PrimaryMap::new(),
            by_shape: FxHashMap::default(),
        };
        interner.seed_primitives();
        interner
    }

    fn seed_primitives(&mut self) {
        for width in [IntWidth::W8, IntWidth::W16, IntWidth::W24] {
            self.intern(TypeData::Int {
                width,
                signed: false,
            });
            self.intern(TypeData::Int {
                width,
                signed: true,
            });
        }
        self.intern(TypeData::Bool);
        self.intern(TypeData::Void);
    }

    /// Return the `TypeId` for `data`, minting a fresh one if this
    /// exact shape hasn't been seen before.
    pub fn intern(&mut self, data: TypeData) -> TypeId {
        if let Some(&id) = self.by_shape.get(&data) {
            return id;
        }
        let id = self.table.push(data.clone());
        self.by_shape.insert(data, id);
        id
    }

    pub fn lookup(&self, id: TypeId) -> &TypeData {
        &self.table[id]
    }

    pub fn u8(&mut self) -> TypeId {
        self.intern(TypeData::Int {
            width: IntWidth::W8,
            signed: false,
        })
    }

    pub fn u16(&mut self) -> TypeId {
        self.intern(TypeData::Int {
            width: IntWidth::W16,
            signed: false,
        })
    }

    pub fn bool_(&mut self) -> TypeId {
        self.intern(TypeData::Bool)
    }

    pub fn void(&mut self) -> TypeId {
        self.intern(TypeData::Void)
    }

    /// Width in bytes of a resolved type, used throughout the backend
    /// to pick 8-bit vs 16-bit instruction forms (spec §3.4 invariant).
    pub fn width_of(&self, id: TypeId) -> u8 {
        match self.lookup(id) {
            TypeData::Int { width, .. } => width.bytes(),
            TypeData::Fixed { shape, .. } => ((shape.int_bits + shape.frac_bits) / 8).max(1),
            TypeData::Bool => 1,
            TypeData::Void => 0,
            TypeData::Pointer { .. } => 2,
            TypeData::Array { element, len } => self.width_of(*element).saturating_mul(*len as u8),
            TypeData::Struct { fields, .. } => {
                fields.iter().map(|f| self.width_of(f.ty) as u32).sum::<u32>() as u8
            }
            TypeData::Enum { .. } => 1,
            TypeData::Function { .. } => 2,
            TypeData::Interface { .. } => 0,
            TypeData::BitStruct {
                underlying_bytes, ..
            } => *underlying_bytes,
            TypeData::ErrorUnion { ok, .. } => self.width_of(*ok).max(1),
            TypeData::Alias { target, .. } => self.width_of(*target),
        }
    }

    /// Implicit-promotion rule from spec §4.2.2: narrower-unsigned to
    /// wider-unsigned only; signed types are never implicitly promoted.
    pub fn can_implicitly_promote(&self, from: TypeId, to: TypeId) -> bool {
        if from == to {
            return true;
        }
        match (self.lookup(from), self.lookup(to)) {
            (
                TypeData::Int {
                    width: fw,
                    signed: false,
                },
                TypeData::Int {
                    width: tw,
                    signed: false,
                },
            ) => fw.bytes() < tw.bytes(),
            _ => false,
        }
    }
}
