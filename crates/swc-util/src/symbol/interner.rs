//! String interner implementation using DashMap for concurrent access.
//!
//! Interning (hit) and (miss) are both O(1) hash operations. Symbol
//! comparison is an integer compare, and string retrieval goes through a
//! reverse index map.
//!
//! Interned string storage lives in an arena that is never dropped: the
//! table is a process-wide singleton, so handing out `'static` references
//! is sound.

use ahash::RandomState;
use bumpalo::Bump;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use super::Symbol;

static STRING_TABLE: OnceLock<StringTable> = OnceLock::new();

pub(crate) fn string_table() -> &'static StringTable {
    STRING_TABLE.get_or_init(StringTable::new)
}

/// Thread-safe string table
///
/// Lookups are lock-free through DashMap; only the arena allocation on a
/// miss takes a short mutex.
pub struct StringTable {
    /// string -> symbol index
    map: DashMap<&'static str, u32, RandomState>,

    /// symbol index -> string (for `Symbol::as_str`)
    by_index: DashMap<u32, &'static str, RandomState>,

    /// Counter for the next index
    next_index: AtomicU32,

    /// Arena backing the interned string bytes. Entries are never removed.
    arena: Mutex<Bump>,
}

impl StringTable {
    fn new() -> Self {
        Self {
            map: DashMap::with_capacity_and_hasher(256, RandomState::new()),
            by_index: DashMap::with_capacity_and_hasher(256, RandomState::new()),
            next_index: AtomicU32::new(0),
            arena: Mutex::new(Bump::new()),
        }
    }

    /// Intern a string
    pub fn intern(&self, string: &str) -> Symbol {
        if let Some(entry) = self.map.get(string) {
            return Symbol::from_index(*entry.value());
        }

        let stored: &'static str = {
            let arena = self.arena.lock();
            let s = arena.alloc_str(string);
            // The arena lives in a process-wide singleton and is never
            // reset, so extending the lifetime is sound.
            unsafe { std::mem::transmute::<&str, &'static str>(s) }
        };

        // Two threads can race past the lookup; the entry API keeps a single
        // winner and the loser's arena copy stays allocated but unused.
        let index = *self.map.entry(stored).or_insert_with(|| {
            let index = self.next_index.fetch_add(1, Ordering::Relaxed);
            self.by_index.insert(index, stored);
            index
        });

        Symbol::from_index(index)
    }

    /// Get the string for a raw symbol index
    pub fn resolve(&self, index: u32) -> Option<&'static str> {
        self.by_index.get(&index).map(|e| *e.value())
    }

    /// Number of distinct interned strings
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true when nothing has been interned yet
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
