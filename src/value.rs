use std::fmt;

/// Unique identifier for an interned symbol.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

/// Index into the cons-cell arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairId(pub u32);

/// Index into the string slab.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrId(pub u32);

/// Index into the environment-frame slab.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvId(pub u32);

/// Index into the closure slab.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClosureId(pub u32);

/// Index into the continuation slab.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContId(pub u32);

/// Index into the foreign-handle slab.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpaqueId(pub u32);

/// Index into the primitive table (forms and ordinary primitives).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimId(pub u32);

/// A Lisp value. Copy semantics: anything with identity lives in the heap
/// and is referred to by handle.
///
/// `PartialEq` is identity for heap objects and value equality for numbers,
/// which is what `eq?` compares.
#[derive(Clone, Copy, PartialEq)]
pub enum Value {
    /// The empty list, which is also false.
    Nil,
    /// The true marker, `#t`.
    True,
    Int(i64),
    Float(f64),
    Str(StrId),
    Symbol(SymbolId),
    Pair(PairId),
    Prim(PrimId),
    Closure(ClosureId),
    Cont(ContId),
    Opaque(OpaqueId),
}

impl Value {
    pub fn is_nil(self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_pair(self) -> bool {
        matches!(self, Value::Pair(_))
    }

    /// Returns true if this value is an atom (not a pair).
    pub fn is_atom(self) -> bool {
        !self.is_pair()
    }

    /// Nil or a pair: something a list walk may start from.
    pub fn is_list_like(self) -> bool {
        matches!(self, Value::Nil | Value::Pair(_))
    }

    pub fn is_procedure(self) -> bool {
        matches!(self, Value::Prim(_) | Value::Closure(_) | Value::Cont(_))
    }

    pub fn as_pair(self) -> Option<PairId> {
        match self {
            Value::Pair(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_symbol(self) -> Option<SymbolId> {
        match self {
            Value::Symbol(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_int(self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(n),
            _ => None,
        }
    }

    /// Numeric view for float arithmetic.
    pub fn as_f64(self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(n as f64),
            Value::Float(x) => Some(x),
            _ => None,
        }
    }

    pub fn truth(b: bool) -> Value {
        if b {
            Value::True
        } else {
            Value::Nil
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::True => write!(f, "True"),
            Value::Int(n) => write!(f, "Int({})", n),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Str(id) => write!(f, "Str({})", id.0),
            Value::Symbol(id) => write!(f, "Sym({})", id.0),
            Value::Pair(id) => write!(f, "Pair({})", id.0),
            Value::Prim(id) => write!(f, "Prim({})", id.0),
            Value::Closure(id) => write!(f, "Closure({})", id.0),
            Value::Cont(id) => write!(f, "Cont({})", id.0),
            Value::Opaque(id) => write!(f, "Opaque({})", id.0),
        }
    }
}

macro_rules! debug_handle {
    ($($name:ident),*) => {
        $(
            impl fmt::Debug for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, concat!(stringify!($name), "({})"), self.0)
                }
            }
        )*
    };
}

debug_handle!(SymbolId, PairId, StrId, EnvId, ClosureId, ContId, OpaqueId, PrimId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_equality_on_handles() {
        assert_eq!(Value::Pair(PairId(3)), Value::Pair(PairId(3)));
        assert_ne!(Value::Pair(PairId(3)), Value::Pair(PairId(4)));
        assert_eq!(Value::Int(7), Value::Int(7));
        assert_ne!(Value::Int(7), Value::Float(7.0));
    }

    #[test]
    fn predicates() {
        assert!(Value::Nil.is_list_like());
        assert!(Value::Nil.is_atom());
        assert!(Value::Cont(ContId(0)).is_procedure());
        assert!(!Value::Symbol(SymbolId(1)).is_procedure());
        assert_eq!(Value::Int(2).as_f64(), Some(2.0));
        assert_eq!(Value::truth(false), Value::Nil);
    }
}
