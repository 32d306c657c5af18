use rustc_hash::FxHashMap;

use crate::value::SymbolId;

/// Interned symbol table. Each unique symbol name maps to a unique SymbolId,
/// so `(eq? 'foo 'foo)` holds.
pub struct SymbolTable {
    name_to_id: FxHashMap<String, SymbolId>,
    id_to_name: Vec<String>,
}

/// Well-known symbol IDs, pre-interned at startup.
/// These must match the order of interning in SymbolTable::new().
pub mod sym {
    use crate::value::SymbolId;

    pub const QUOTE: SymbolId = SymbolId(0);
    pub const QUASIQUOTE: SymbolId = SymbolId(1);
    pub const UNQUOTE: SymbolId = SymbolId(2);
    pub const UNQUOTE_SPLICING: SymbolId = SymbolId(3);
    pub const BEGIN: SymbolId = SymbolId(4);
    pub const AMPERSAND: SymbolId = SymbolId(5);
    // Type names reported by `type`
    pub const EMPTY: SymbolId = SymbolId(6);
    pub const TRUE: SymbolId = SymbolId(7);
    pub const PAIR: SymbolId = SymbolId(8);
    pub const SYMBOL: SymbolId = SymbolId(9);
    pub const INTEGER: SymbolId = SymbolId(10);
    pub const FLOAT: SymbolId = SymbolId(11);
    pub const STRING: SymbolId = SymbolId(12);
    pub const LAMBDA: SymbolId = SymbolId(13);
    pub const CONTINUATION: SymbolId = SymbolId(14);
    pub const PRIMITIVE: SymbolId = SymbolId(15);
    pub const OPAQUE: SymbolId = SymbolId(16);
}

impl SymbolTable {
    /// Create a new symbol table with all well-known symbols pre-interned.
    /// The order MUST match the constants in the `sym` module above.
    pub fn new() -> Self {
        let names = [
            "quote", "quasiquote", "unquote", "unquote-splicing", "begin", "&",
            "()", "#t", "pair", "symbol", "integer", "float", "string",
            "lambda", "continuation", "primitive", "opaque",
        ];

        let mut table = SymbolTable {
            name_to_id: FxHashMap::default(),
            id_to_name: Vec::with_capacity(names.len()),
        };
        for name in names {
            table.intern(name);
        }
        table
    }

    /// Intern a symbol name. Returns the existing ID if already interned,
    /// or creates a new one.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.name_to_id.get(name) {
            return id;
        }
        let id = SymbolId(self.id_to_name.len() as u32);
        self.name_to_id.insert(name.to_string(), id);
        self.id_to_name.push(name.to_string());
        id
    }

    /// Look up a symbol name by its ID.
    pub fn name(&self, id: SymbolId) -> &str {
        &self.id_to_name[id.0 as usize]
    }

    /// Look up a symbol ID by name, without interning.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.name_to_id.get(name).copied()
    }

    /// Total number of interned symbols.
    pub fn count(&self) -> usize {
        self.id_to_name.len()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_symbols_line_up() {
        let table = SymbolTable::new();
        assert_eq!(table.name(sym::QUOTE), "quote");
        assert_eq!(table.name(sym::UNQUOTE_SPLICING), "unquote-splicing");
        assert_eq!(table.name(sym::EMPTY), "()");
        assert_eq!(table.name(sym::OPAQUE), "opaque");
        assert_eq!(table.lookup("&"), Some(sym::AMPERSAND));
    }

    #[test]
    fn interning_is_idempotent() {
        let mut table = SymbolTable::new();
        let before = table.count();
        let a = table.intern("frobnicate");
        let b = table.intern("frobnicate");
        assert_eq!(a, b);
        assert_eq!(table.count(), before + 1);
        assert_eq!(table.lookup("missing"), None);
    }
}
