use rustc_hash::FxHashMap;

use crate::error::{EvalError, EvalResult};
use crate::heap::Heap;
use crate::symbol::SymbolTable;
use crate::value::{EnvId, SymbolId, Value};

/// One lexical scope: bindings plus a link to the enclosing scope
/// (`None` for the global frame).
#[derive(Debug, Clone)]
pub struct Frame {
    vars: FxHashMap<SymbolId, Value>,
    parent: Option<EnvId>,
}

impl Frame {
    pub fn new(parent: Option<EnvId>) -> Self {
        Frame {
            vars: FxHashMap::default(),
            parent,
        }
    }

    pub fn parent(&self) -> Option<EnvId> {
        self.parent
    }

    pub fn get(&self, name: SymbolId) -> Option<Value> {
        self.vars.get(&name).copied()
    }

    pub fn define(&mut self, name: SymbolId, val: Value) {
        self.vars.insert(name, val);
    }

    /// Overwrite an existing binding. Returns false if `name` is not bound here.
    pub fn assign(&mut self, name: SymbolId, val: Value) -> bool {
        match self.vars.get_mut(&name) {
            Some(slot) => {
                *slot = val;
                true
            }
            None => false,
        }
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.vars.values().copied()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Look up a binding, walking from `env` outwards.
pub fn env_lookup(heap: &Heap, env: EnvId, name: SymbolId) -> EvalResult<Option<Value>> {
    let mut current = Some(env);
    while let Some(id) = current {
        let frame = heap.frame(id)?;
        if let Some(val) = frame.get(name) {
            return Ok(Some(val));
        }
        current = frame.parent();
    }
    Ok(None)
}

/// Bind `name` in `env` itself, shadowing any outer binding.
pub fn env_define(heap: &mut Heap, env: EnvId, name: SymbolId, val: Value) -> EvalResult<()> {
    heap.frame_mut(env)?.define(name, val);
    Ok(())
}

/// Mutate the nearest frame that already binds `name`.
pub fn env_set(
    heap: &mut Heap,
    env: EnvId,
    name: SymbolId,
    val: Value,
    symbols: &SymbolTable,
) -> EvalResult<()> {
    let mut current = Some(env);
    while let Some(id) = current {
        let frame = heap.frame_mut(id)?;
        if frame.assign(name, val) {
            return Ok(());
        }
        current = frame.parent();
    }
    Err(EvalError::Unbound(symbols.name(name).to_string()))
}

/// Walk `n` parent links up from `env`.
pub fn env_ancestor(heap: &Heap, env: EnvId, n: usize) -> EvalResult<EnvId> {
    let mut current = env;
    for _ in 0..n {
        current = heap
            .frame(current)?
            .parent()
            .ok_or_else(|| EvalError::Unbound("no frame available".into()))?;
    }
    Ok(current)
}
