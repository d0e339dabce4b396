//! Function symbol table with declaration waiters.
//!
//! Besides name resolution, the table backs the job sleep/wake protocol: a
//! backend job that needs a symbol not yet declared registers itself as a
//! waiter and goes to sleep; when the declaration commits, the committer
//! receives the waiting client ids and forwards them to the job manager.

use parking_lot::RwLock;
use swc_util::{define_idx, FxHashMap, Symbol};

define_idx!(SymbolRef);

/// Calling convention recorded on a function symbol
///
/// Mapped onto the backend's convention tables at call-lowering time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CallConvention {
    #[default]
    C,
    WindowsX64,
    Host,
}

/// A function symbol as the backend sees it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FuncSymbol {
    pub name: Symbol,
    pub is_extern: bool,
    pub conv: CallConvention,
}

#[derive(Default)]
struct Tables {
    symbols: Vec<FuncSymbol>,
    by_name: FxHashMap<Symbol, SymbolRef>,
    waiters: FxHashMap<Symbol, Vec<u64>>,
}

/// Thread-safe symbol table
#[derive(Default)]
pub struct SymbolTable {
    inner: RwLock<Tables>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a declaration. Returns the symbol and the client ids of jobs
    /// sleeping on it (the caller wakes them through the job manager).
    pub fn declare(
        &self,
        name: Symbol,
        is_extern: bool,
        conv: CallConvention,
    ) -> (SymbolRef, Vec<u64>) {
        let mut tables = self.inner.write();
        let r = match tables.by_name.get(&name) {
            Some(&r) => r,
            None => {
                let r = SymbolRef(tables.symbols.len() as u32);
                tables.symbols.push(FuncSymbol {
                    name,
                    is_extern,
                    conv,
                });
                tables.by_name.insert(name, r);
                r
            }
        };
        let waiters = tables.waiters.remove(&name).unwrap_or_default();
        (r, waiters)
    }

    pub fn lookup(&self, name: Symbol) -> Option<SymbolRef> {
        self.inner.read().by_name.get(&name).copied()
    }

    pub fn get(&self, r: SymbolRef) -> FuncSymbol {
        self.inner.read().symbols[r.0 as usize]
    }

    /// Record that `client`'s job sleeps until `name` is declared
    pub fn add_waiter(&self, name: Symbol, client: u64) {
        self.inner
            .write()
            .waiters
            .entry(name)
            .or_default()
            .push(client);
    }

    pub fn count(&self) -> usize {
        self.inner.read().symbols.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_then_lookup() {
        let table = SymbolTable::new();
        let name = Symbol::intern("memcpy");
        let (r, _) = table.declare(name, true, CallConvention::C);
        assert_eq!(table.lookup(name), Some(r));
        assert!(table.get(r).is_extern);
    }

    #[test]
    fn waiters_are_drained_on_declare() {
        let table = SymbolTable::new();
        let name = Symbol::intern("late_fn");
        table.add_waiter(name, 7);
        table.add_waiter(name, 9);
        let (_, waiters) = table.declare(name, false, CallConvention::Host);
        assert_eq!(waiters, vec![7, 9]);
        // A second declare has nobody left to wake.
        let (_, waiters) = table.declare(name, false, CallConvention::Host);
        assert!(waiters.is_empty());
    }
}
