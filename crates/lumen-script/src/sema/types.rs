//! The symbol type graph.
//!
//! Every type used by a compilation unit lives in one [`TypeTable`] and is
//! referred to by a [`TypeId`]. Structural types (primitives, arrays,
//! function signatures) are deduplicated by hash and structural equality, so
//! two `array<i32>` annotations always resolve to the same id. Aggregates and
//! enums are nominal: their identity is the declared name plus the ordered
//! generic arguments.

use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};

use crate::runtime::Tag;

/// Handle to a type inside a [`TypeTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl Default for TypeId {
    fn default() -> Self {
        TypeTable::UNKNOWN
    }
}

/// The built-in scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// `i8`
    I8,
    /// `i16`
    I16,
    /// `i32`
    I32,
    /// `i64`
    I64,
    /// `u8`
    U8,
    /// `u16`
    U16,
    /// `u32`
    U32,
    /// `u64`
    U64,
    /// `f32`
    F32,
    /// `f64`
    F64,
    /// `bool`
    Bool,
    /// `string`
    Str,
    /// `void`
    Void,
    /// `any`
    Any,
}

impl Primitive {
    /// All primitives in the order they are pre-registered in a table.
    pub const ALL: [Primitive; 14] = [
        Primitive::I8,
        Primitive::I16,
        Primitive::I32,
        Primitive::I64,
        Primitive::U8,
        Primitive::U16,
        Primitive::U32,
        Primitive::U64,
        Primitive::F32,
        Primitive::F64,
        Primitive::Bool,
        Primitive::Str,
        Primitive::Void,
        Primitive::Any,
    ];

    /// Looks up a primitive by its source name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "i8" => Primitive::I8,
            "i16" => Primitive::I16,
            "i32" => Primitive::I32,
            "i64" => Primitive::I64,
            "u8" => Primitive::U8,
            "u16" => Primitive::U16,
            "u32" => Primitive::U32,
            "u64" => Primitive::U64,
            "f32" => Primitive::F32,
            "f64" => Primitive::F64,
            "bool" => Primitive::Bool,
            "string" => Primitive::Str,
            "void" => Primitive::Void,
            "any" => Primitive::Any,
            _ => return None,
        })
    }

    /// The source name.
    pub fn name(self) -> &'static str {
        match self {
            Primitive::I8 => "i8",
            Primitive::I16 => "i16",
            Primitive::I32 => "i32",
            Primitive::I64 => "i64",
            Primitive::U8 => "u8",
            Primitive::U16 => "u16",
            Primitive::U32 => "u32",
            Primitive::U64 => "u64",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
            Primitive::Bool => "bool",
            Primitive::Str => "string",
            Primitive::Void => "void",
            Primitive::Any => "any",
        }
    }

    /// The runtime value tag for scalar primitives.
    pub fn tag(self) -> Option<Tag> {
        Some(match self {
            Primitive::I8 => Tag::I8,
            Primitive::I16 => Tag::I16,
            Primitive::I32 => Tag::I32,
            Primitive::I64 => Tag::I64,
            Primitive::U8 => Tag::U8,
            Primitive::U16 => Tag::U16,
            Primitive::U32 => Tag::U32,
            Primitive::U64 => Tag::U64,
            Primitive::F32 => Tag::F32,
            Primitive::F64 => Tag::F64,
            Primitive::Bool => Tag::Bool,
            Primitive::Str | Primitive::Void | Primitive::Any => return None,
        })
    }

    /// Returns true for integer primitives.
    pub fn is_integer(self) -> bool {
        self.tag().is_some_and(Tag::is_integer)
    }

    /// Returns true for float primitives.
    pub fn is_float(self) -> bool {
        matches!(self, Primitive::F32 | Primitive::F64)
    }

    /// Returns true for integer and float primitives.
    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Inclusive value range of an integer primitive.
    pub fn int_range(self) -> Option<(i128, i128)> {
        Some(match self {
            Primitive::I8 => (i8::MIN as i128, i8::MAX as i128),
            Primitive::I16 => (i16::MIN as i128, i16::MAX as i128),
            Primitive::I32 => (i32::MIN as i128, i32::MAX as i128),
            Primitive::I64 => (i64::MIN as i128, i64::MAX as i128),
            Primitive::U8 => (0, u8::MAX as i128),
            Primitive::U16 => (0, u16::MAX as i128),
            Primitive::U32 => (0, u32::MAX as i128),
            Primitive::U64 => (0, u64::MAX as i128),
            _ => return None,
        })
    }
}

/// A field of an aggregate type.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Field type
    pub ty: TypeId,
}

/// A user-declared struct, possibly a generic instantiation.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateType {
    /// Declared name without arguments
    pub name: String,
    /// Ordered generic arguments (empty for non-generic structs)
    pub args: Vec<TypeId>,
    /// Declared base type
    pub base: Option<TypeId>,
    /// Fields in layout order, base fields first
    pub fields: Vec<Field>,
}

impl AggregateType {
    /// Returns the layout index of the field named `name`.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// A user-declared enum.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    /// Declared name
    pub name: String,
    /// Members with their resolved values
    pub members: Vec<(String, i64)>,
}

/// A node in the type graph.
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolType {
    /// Built-in scalar
    Primitive(Primitive),
    /// The built-in generic `array<T>`
    Array(TypeId),
    /// Struct type
    Aggregate(AggregateType),
    /// Enum type, represented as `i32` at runtime
    Enum(EnumType),
    /// Function signature
    Function {
        /// Parameter types
        params: Vec<TypeId>,
        /// Return type
        ret: TypeId,
    },
    /// Placeholder after a reported error; compatible with everything
    Unknown,
}

/// Per-unit arena of symbol types with hash deduplication.
#[derive(Debug, Clone)]
pub struct TypeTable {
    types: Vec<SymbolType>,
    by_hash: FxHashMap<u64, Vec<TypeId>>,
}

impl TypeTable {
    /// Id of the unknown (error) type.
    pub const UNKNOWN: TypeId = TypeId(Primitive::ALL.len() as u32);

    /// Creates a table with every primitive pre-registered.
    pub fn new() -> Self {
        let mut table = Self {
            types: Vec::new(),
            by_hash: FxHashMap::default(),
        };
        for prim in Primitive::ALL {
            table.intern(SymbolType::Primitive(prim));
        }
        table.intern(SymbolType::Unknown);
        table
    }

    /// Returns the id of a primitive type.
    pub fn primitive(&self, prim: Primitive) -> TypeId {
        TypeId(Primitive::ALL.iter().position(|p| *p == prim).unwrap_or(0) as u32)
    }

    /// Returns the type behind `id`.
    pub fn get(&self, id: TypeId) -> &SymbolType {
        self.types.get(id.0 as usize).unwrap_or(&SymbolType::Unknown)
    }

    /// Number of distinct types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Always false; primitives are pre-registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Interns a type, returning the existing id for a structurally equal one.
    pub fn intern(&mut self, ty: SymbolType) -> TypeId {
        let hash = hash_key(&ty);
        if let Some(existing) = self.by_hash.get(&hash).and_then(|candidates| {
            candidates
                .iter()
                .copied()
                .find(|id| same_identity(&self.types[id.0 as usize], &ty))
        }) {
            return existing;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty);
        self.by_hash.entry(hash).or_default().push(id);
        id
    }

    /// Interns `array<element>`.
    pub fn array_of(&mut self, element: TypeId) -> TypeId {
        self.intern(SymbolType::Array(element))
    }

    /// Interns a function signature.
    pub fn function(&mut self, params: Vec<TypeId>, ret: TypeId) -> TypeId {
        self.intern(SymbolType::Function { params, ret })
    }

    /// Finds an already declared aggregate by name and arguments.
    pub fn find_aggregate(&self, name: &str, args: &[TypeId]) -> Option<TypeId> {
        let probe = SymbolType::Aggregate(AggregateType {
            name: name.to_string(),
            args: args.to_vec(),
            base: None,
            fields: Vec::new(),
        });
        let candidates = self.by_hash.get(&hash_key(&probe))?;
        candidates
            .iter()
            .copied()
            .find(|id| same_identity(&self.types[id.0 as usize], &probe))
    }

    /// Replaces the definition of an aggregate in place. Identity is kept.
    pub fn define_aggregate(&mut self, id: TypeId, base: Option<TypeId>, fields: Vec<Field>) {
        if let Some(SymbolType::Aggregate(agg)) = self.types.get_mut(id.0 as usize) {
            agg.base = base;
            agg.fields = fields;
        }
    }

    /// Returns the primitive behind `id`, if any.
    pub fn as_primitive(&self, id: TypeId) -> Option<Primitive> {
        match self.get(id) {
            SymbolType::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    /// Returns the aggregate behind `id`, if any.
    pub fn as_aggregate(&self, id: TypeId) -> Option<&AggregateType> {
        match self.get(id) {
            SymbolType::Aggregate(agg) => Some(agg),
            _ => None,
        }
    }

    /// Returns the element type of an array type.
    pub fn element(&self, id: TypeId) -> Option<TypeId> {
        match self.get(id) {
            SymbolType::Array(element) => Some(*element),
            _ => None,
        }
    }

    /// Returns true if `id` is the given primitive.
    pub fn is(&self, id: TypeId, prim: Primitive) -> bool {
        self.as_primitive(id) == Some(prim)
    }

    /// Returns true for integer primitives and enums.
    pub fn is_integral(&self, id: TypeId) -> bool {
        match self.get(id) {
            SymbolType::Primitive(p) => p.is_integer(),
            SymbolType::Enum(_) => true,
            _ => false,
        }
    }

    /// Returns true for numeric primitives.
    pub fn is_numeric(&self, id: TypeId) -> bool {
        self.as_primitive(id).is_some_and(Primitive::is_numeric)
    }

    /// Returns true if values of this type live on the heap.
    pub fn is_reference(&self, id: TypeId) -> bool {
        match self.get(id) {
            SymbolType::Primitive(Primitive::Str) => true,
            SymbolType::Array(_) | SymbolType::Aggregate(_) | SymbolType::Function { .. } => true,
            _ => false,
        }
    }

    /// The runtime tag a value of this type carries, if fixed.
    pub fn tag(&self, id: TypeId) -> Option<Tag> {
        match self.get(id) {
            SymbolType::Primitive(p) => p.tag(),
            SymbolType::Enum(_) => Some(Tag::I32),
            _ => None,
        }
    }

    /// Returns true if `derived` is `base` or reaches it through base links.
    pub fn extends(&self, derived: TypeId, base: TypeId) -> bool {
        let mut current = Some(derived);
        let mut guard = 0;
        while let Some(id) = current {
            if id == base {
                return true;
            }
            guard += 1;
            if guard > self.types.len() {
                return false;
            }
            current = self.as_aggregate(id).and_then(|agg| agg.base);
        }
        false
    }

    /// Returns true if a value of type `from` may be stored where `to` is
    /// expected.
    pub fn is_assignable(&self, from: TypeId, to: TypeId) -> bool {
        if from == to || from == Self::UNKNOWN || to == Self::UNKNOWN {
            return true;
        }
        if self.is(to, Primitive::Any) {
            return !self.is(from, Primitive::Void);
        }
        if self.is(from, Primitive::Any) {
            // `none` and values of unknown shape fit any reference slot.
            return self.is_reference(to);
        }
        self.extends(from, to)
    }

    /// Human-readable type name.
    pub fn display(&self, id: TypeId) -> String {
        match self.get(id) {
            SymbolType::Primitive(p) => p.name().to_string(),
            SymbolType::Array(element) => format!("array<{}>", self.display(*element)),
            SymbolType::Aggregate(agg) => {
                if agg.args.is_empty() {
                    agg.name.clone()
                } else {
                    let args: Vec<_> = agg.args.iter().map(|a| self.display(*a)).collect();
                    format!("{}<{}>", agg.name, args.join(", "))
                }
            }
            SymbolType::Enum(e) => e.name.clone(),
            SymbolType::Function { params, ret } => {
                let params: Vec<_> = params.iter().map(|p| self.display(*p)).collect();
                format!("fn({}) -> {}", params.join(", "), self.display(*ret))
            }
            SymbolType::Unknown => "<unknown>".to_string(),
        }
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Hashes the identity-relevant part of a type.
fn hash_key(ty: &SymbolType) -> u64 {
    let mut hasher = FxHasher::default();
    std::mem::discriminant(ty).hash(&mut hasher);
    match ty {
        SymbolType::Primitive(p) => p.hash(&mut hasher),
        SymbolType::Array(element) => element.hash(&mut hasher),
        SymbolType::Aggregate(agg) => {
            agg.name.hash(&mut hasher);
            agg.args.hash(&mut hasher);
        }
        SymbolType::Enum(e) => e.name.hash(&mut hasher),
        SymbolType::Function { params, ret } => {
            params.hash(&mut hasher);
            ret.hash(&mut hasher);
        }
        SymbolType::Unknown => {}
    }
    hasher.finish()
}

fn same_identity(a: &SymbolType, b: &SymbolType) -> bool {
    match (a, b) {
        (SymbolType::Aggregate(x), SymbolType::Aggregate(y)) => x.name == y.name && x.args == y.args,
        (SymbolType::Enum(x), SymbolType::Enum(y)) => x.name == y.name,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_are_preregistered() {
        let table = TypeTable::new();
        let i32_id = table.primitive(Primitive::I32);
        assert_eq!(table.display(i32_id), "i32");
        assert_eq!(table.display(TypeTable::UNKNOWN), "<unknown>");
    }

    #[test]
    fn test_structural_dedup() {
        let mut table = TypeTable::new();
        let i32_id = table.primitive(Primitive::I32);
        let a = table.array_of(i32_id);
        let b = table.array_of(i32_id);
        assert_eq!(a, b);
        let f1 = table.function(vec![i32_id, a], i32_id);
        let f2 = table.function(vec![i32_id, a], i32_id);
        assert_eq!(f1, f2);
        assert_eq!(table.display(f1), "fn(i32, array<i32>) -> i32");
    }

    #[test]
    fn test_aggregate_identity_is_nominal() {
        let mut table = TypeTable::new();
        let i32_id = table.primitive(Primitive::I32);
        let boxed = table.intern(SymbolType::Aggregate(AggregateType {
            name: "Box".into(),
            args: vec![i32_id],
            base: None,
            fields: Vec::new(),
        }));
        table.define_aggregate(
            boxed,
            None,
            vec![Field {
                name: "value".into(),
                ty: i32_id,
            }],
        );
        assert_eq!(table.find_aggregate("Box", &[i32_id]), Some(boxed));
        assert_eq!(table.display(boxed), "Box<i32>");
        assert_eq!(table.as_aggregate(boxed).unwrap().field_index("value"), Some(0));
    }

    #[test]
    fn test_extends_and_assignability() {
        let mut table = TypeTable::new();
        let base = table.intern(SymbolType::Aggregate(AggregateType {
            name: "Shape".into(),
            args: vec![],
            base: None,
            fields: vec![],
        }));
        let derived = table.intern(SymbolType::Aggregate(AggregateType {
            name: "Circle".into(),
            args: vec![],
            base: Some(base),
            fields: vec![],
        }));
        assert!(table.extends(derived, base));
        assert!(!table.extends(base, derived));
        assert!(table.is_assignable(derived, base));
        assert!(!table.is_assignable(base, derived));

        let any = table.primitive(Primitive::Any);
        let i32_id = table.primitive(Primitive::I32);
        assert!(table.is_assignable(i32_id, any));
        assert!(table.is_assignable(any, derived));
        assert!(!table.is_assignable(any, i32_id));
    }
}
