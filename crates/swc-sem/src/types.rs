//! Type manager with interning semantics.

use parking_lot::RwLock;
use swc_util::{define_idx, FxHashMap};

define_idx!(TypeRef);

/// A resolved type as the backend sees it
///
/// The backend only needs sizes and int/float classification; richer
/// structure stays in the semantic analyzer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Void,
    Bool,
    S8,
    S16,
    S32,
    S64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Ptr(TypeRef),
    Struct { size: u32, align: u32 },
}

impl TypeKind {
    pub fn size(&self) -> u32 {
        match self {
            TypeKind::Void => 0,
            TypeKind::Bool | TypeKind::S8 | TypeKind::U8 => 1,
            TypeKind::S16 | TypeKind::U16 => 2,
            TypeKind::S32 | TypeKind::U32 | TypeKind::F32 => 4,
            TypeKind::S64 | TypeKind::U64 | TypeKind::F64 | TypeKind::Ptr(_) => 8,
            TypeKind::Struct { size, .. } => *size,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, TypeKind::F32 | TypeKind::F64)
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            TypeKind::S8 | TypeKind::S16 | TypeKind::S32 | TypeKind::S64
        )
    }
}

#[derive(Default)]
struct Tables {
    types: Vec<TypeKind>,
    map: FxHashMap<TypeKind, TypeRef>,
}

/// Interning type table
///
/// `add_type` double-checks under the exclusive lock; `get` copies the small
/// record out so callers never hold the lock.
#[derive(Default)]
pub struct TypeManager {
    inner: RwLock<Tables>,
}

impl TypeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_type(&self, kind: TypeKind) -> TypeRef {
        if let Some(&r) = self.inner.read().map.get(&kind) {
            return r;
        }
        let mut tables = self.inner.write();
        // Another writer may have interned it between the locks.
        if let Some(&r) = tables.map.get(&kind) {
            return r;
        }
        let r = TypeRef(tables.types.len() as u32);
        tables.types.push(kind);
        tables.map.insert(kind, r);
        r
    }

    pub fn get(&self, r: TypeRef) -> TypeKind {
        self.inner.read().types[r.0 as usize]
    }

    pub fn size_of(&self, r: TypeRef) -> u32 {
        self.get(r).size()
    }

    pub fn is_float(&self, r: TypeRef) -> bool {
        self.get(r).is_float()
    }

    pub fn is_signed(&self, r: TypeRef) -> bool {
        self.get(r).is_signed()
    }

    pub fn count(&self) -> usize {
        self.inner.read().types.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedups() {
        let mgr = TypeManager::new();
        let a = mgr.add_type(TypeKind::S64);
        let b = mgr.add_type(TypeKind::S64);
        let c = mgr.add_type(TypeKind::F64);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(mgr.count(), 2);
    }

    #[test]
    fn sizes_match_abi() {
        let mgr = TypeManager::new();
        let p = mgr.add_type(TypeKind::S32);
        let ptr = mgr.add_type(TypeKind::Ptr(p));
        assert_eq!(mgr.size_of(p), 4);
        assert_eq!(mgr.size_of(ptr), 8);
        assert!(!mgr.is_float(ptr));
    }
}
