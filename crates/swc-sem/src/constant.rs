//! Constant manager with interning semantics.

use parking_lot::RwLock;
use swc_util::{define_idx, FxHashMap, Symbol};

define_idx!(ConstantRef);

/// A constant value known to the semantic analyzer
///
/// Floats are stored as raw bits so the value can be hashed and interned;
/// `as_f64` reconstructs the number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstantValue {
    Int(u64),
    /// f64 bits
    Float(u64),
    Str(Symbol),
}

impl ConstantValue {
    pub fn from_f64(value: f64) -> Self {
        ConstantValue::Float(value.to_bits())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConstantValue::Float(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<u64> {
        match self {
            ConstantValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Tables {
    constants: Vec<ConstantValue>,
    map: FxHashMap<ConstantValue, ConstantRef>,
}

/// Interning constant table, same locking discipline as the type manager
#[derive(Default)]
pub struct ConstantManager {
    inner: RwLock<Tables>,
}

impl ConstantManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_constant(&self, value: ConstantValue) -> ConstantRef {
        if let Some(&r) = self.inner.read().map.get(&value) {
            return r;
        }
        let mut tables = self.inner.write();
        if let Some(&r) = tables.map.get(&value) {
            return r;
        }
        let r = ConstantRef(tables.constants.len() as u32);
        tables.constants.push(value);
        tables.map.insert(value, r);
        r
    }

    pub fn get(&self, r: ConstantRef) -> ConstantValue {
        self.inner.read().constants[r.0 as usize]
    }

    pub fn count(&self) -> usize {
        self.inner.read().constants.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_bits_intern_stably() {
        let mgr = ConstantManager::new();
        let a = mgr.add_constant(ConstantValue::from_f64(1.5));
        let b = mgr.add_constant(ConstantValue::from_f64(1.5));
        assert_eq!(a, b);
        assert_eq!(mgr.get(a).as_f64(), Some(1.5));
    }

    #[test]
    fn ints_and_floats_do_not_collide() {
        let mgr = ConstantManager::new();
        let i = mgr.add_constant(ConstantValue::Int(0x3FF8000000000000));
        let f = mgr.add_constant(ConstantValue::from_f64(1.5));
        assert_ne!(i, f);
    }
}
