//! Hash-consed compile-time constants.
//!
//! Mirrors the type registry: one arena owns every constant, constructors
//! intern on `(type, payload)`, and handle equality is value equality. Float
//! payloads key on their bit pattern so `-0.0` and `0.0` stay distinct.

use std::collections::HashMap;

use super::types::TypeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstantId(u32);

impl ConstantId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstantKind {
    Int(u64),
    Float(f64),
    String(String),
    Array(Vec<ConstantId>),
    Struct(Vec<ConstantId>),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub type_id: TypeId,
    pub kind: ConstantKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    Int(u64),
    Float(u64),
    String(String),
    Array(Vec<ConstantId>),
    Struct(Vec<ConstantId>),
    Null,
}

impl ConstantKey {
    fn from_kind(kind: &ConstantKind) -> Self {
        match kind {
            ConstantKind::Int(value) => ConstantKey::Int(*value),
            ConstantKind::Float(value) => ConstantKey::Float(value.to_bits()),
            ConstantKind::String(value) => ConstantKey::String(value.clone()),
            ConstantKind::Array(elements) => ConstantKey::Array(elements.clone()),
            ConstantKind::Struct(elements) => ConstantKey::Struct(elements.clone()),
            ConstantKind::Null => ConstantKey::Null,
        }
    }
}

#[derive(Default)]
pub struct ConstantPool {
    constants: Vec<Constant>,
    interned: HashMap<(TypeId, ConstantKey), ConstantId>,
}

impl ConstantPool {
    pub fn new() -> Self {
        ConstantPool::default()
    }

    pub fn get(&self, id: ConstantId) -> &Constant {
        &self.constants[id.index()]
    }

    fn intern(&mut self, type_id: TypeId, kind: ConstantKind) -> ConstantId {
        let key = (type_id, ConstantKey::from_kind(&kind));
        if let Some(&id) = self.interned.get(&key) {
            return id;
        }

        let id = ConstantId(self.constants.len() as u32);
        self.constants.push(Constant { type_id, kind });
        self.interned.insert(key, id);
        id
    }

    pub fn int(&mut self, type_id: TypeId, value: u64) -> ConstantId {
        self.intern(type_id, ConstantKind::Int(value))
    }

    pub fn float(&mut self, type_id: TypeId, value: f64) -> ConstantId {
        self.intern(type_id, ConstantKind::Float(value))
    }

    pub fn string(&mut self, type_id: TypeId, value: impl Into<String>) -> ConstantId {
        self.intern(type_id, ConstantKind::String(value.into()))
    }

    pub fn array(&mut self, type_id: TypeId, elements: Vec<ConstantId>) -> ConstantId {
        self.intern(type_id, ConstantKind::Array(elements))
    }

    pub fn structure(&mut self, type_id: TypeId, elements: Vec<ConstantId>) -> ConstantId {
        self.intern(type_id, ConstantKind::Struct(elements))
    }

    pub fn null(&mut self, type_id: TypeId) -> ConstantId {
        self.intern(type_id, ConstantKind::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::type_registry::TypeRegistry;

    #[test]
    fn test_interning() {
        let mut types = TypeRegistry::new(8);
        let mut pool = ConstantPool::new();

        let i32 = types.i32();
        let i64 = types.i64();

        assert_eq!(pool.int(i32, 42), pool.int(i32, 42));
        assert_ne!(pool.int(i32, 42), pool.int(i32, 43));
        // Same payload, different type: different constant.
        assert_ne!(pool.int(i32, 42), pool.int(i64, 42));

        let cstr = types.cstr();
        assert_eq!(pool.string(cstr, "hi"), pool.string(cstr, "hi"));

        let array_type = types.array_of(i32, 2);
        let elements = vec![pool.int(i32, 1), pool.int(i32, 2)];
        assert_eq!(
            pool.array(array_type, elements.clone()),
            pool.array(array_type, elements)
        );
    }

    #[test]
    fn test_null_is_per_type() {
        let mut types = TypeRegistry::new(8);
        let mut pool = ConstantPool::new();

        let i8 = types.i8();
        let p1 = types.pointer_to(i8, false);
        let p2 = types.pointer_to(i8, true);

        assert_eq!(pool.null(p1), pool.null(p1));
        assert_ne!(pool.null(p1), pool.null(p2));
    }

    #[test]
    fn test_float_keys_by_bits() {
        let mut types = TypeRegistry::new(8);
        let mut pool = ConstantPool::new();
        let f64 = types.f64();

        assert_eq!(pool.float(f64, 1.5), pool.float(f64, 1.5));
        assert_ne!(pool.float(f64, 0.0), pool.float(f64, -0.0));
    }
}
