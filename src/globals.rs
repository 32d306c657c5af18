use rustc_hash::FxHashMap;

use crate::context::{GroupId, Step};
use crate::env::env_define;
use crate::error::{EvalError, EvalResult};
use crate::eval::Machine;
use crate::ffi::{self, ForeignGroup};
use crate::forms;
use crate::heap::Heap;
use crate::primitives;
use crate::symbol::SymbolTable;
use crate::value::{EnvId, PrimId, SymbolId, Value};

/// Native procedure: reads `ctx.argl` (and for forms, the caller's
/// environment), returns the next step.
pub type PrimFn = fn(&mut Machine) -> EvalResult<Step>;

/// How the host passes operands to a primitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimKind {
    /// Special form: raw operand list, caller's environment and continuation.
    Form,
    /// Ordinary primitive: fully evaluated argument list.
    Ordinary,
}

pub struct Primitive {
    pub name: &'static str,
    pub kind: PrimKind,
    pub func: PrimFn,
}

/// The special-forms, primitives and foreign-dispatch tables. Built once by
/// [`Registry::build`] and never modified afterwards.
pub struct Registry {
    prims: Vec<Primitive>,
    groups: Vec<Box<dyn ForeignGroup>>,
    group_names: FxHashMap<SymbolId, GroupId>,
}

impl Registry {
    pub fn build(symbols: &mut SymbolTable, seed: Option<u64>) -> Registry {
        let forms = forms::FORMS.iter().map(|&(name, func)| Primitive {
            name,
            kind: PrimKind::Form,
            func,
        });
        let ordinary = primitives::PRIMITIVES.iter().map(|&(name, func)| Primitive {
            name,
            kind: PrimKind::Ordinary,
            func,
        });
        let prims = forms.chain(ordinary).collect();

        let groups = ffi::default_groups(seed);
        let group_names = groups
            .iter()
            .enumerate()
            .map(|(i, g)| (symbols.intern(g.name()), GroupId(i as u32)))
            .collect();

        Registry {
            prims,
            groups,
            group_names,
        }
    }

    pub fn prim(&self, id: PrimId) -> EvalResult<&Primitive> {
        self.prims
            .get(id.0 as usize)
            .ok_or_else(|| EvalError::Internal(format!("unknown primitive id {}", id.0)))
    }

    /// The registered primitive called `name`.
    pub fn prim_named(&self, name: &str) -> Option<Value> {
        self.prims
            .iter()
            .position(|p| p.name == name)
            .map(|i| Value::Prim(PrimId(i as u32)))
    }

    pub fn prim_count(&self) -> usize {
        self.prims.len()
    }

    pub fn group_id(&self, name: SymbolId) -> Option<GroupId> {
        self.group_names.get(&name).copied()
    }

    pub fn group(&self, id: GroupId) -> EvalResult<&dyn ForeignGroup> {
        self.groups
            .get(id.0 as usize)
            .map(|g| g.as_ref())
            .ok_or_else(|| EvalError::Internal(format!("unknown foreign group id {}", id.0)))
    }

    /// Bind every form and primitive under its name in `env`.
    pub fn install(&self, heap: &mut Heap, symbols: &mut SymbolTable, env: EnvId) -> EvalResult<()> {
        for (i, prim) in self.prims.iter().enumerate() {
            let name = symbols.intern(prim.name);
            env_define(heap, env, name, Value::Prim(PrimId(i as u32)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forms_and_primitives_are_registered_with_their_kind() {
        let mut symbols = SymbolTable::new();
        let registry = Registry::build(&mut symbols, Some(1));
        let kind_of = |name: &str| {
            registry
                .prims
                .iter()
                .find(|p| p.name == name)
                .map(|p| p.kind)
        };
        assert_eq!(kind_of("if"), Some(PrimKind::Form));
        assert_eq!(kind_of("quasiquote"), Some(PrimKind::Form));
        assert_eq!(kind_of("trap"), Some(PrimKind::Form));
        assert_eq!(kind_of("call/cc"), Some(PrimKind::Ordinary));
        assert_eq!(kind_of("nand"), Some(PrimKind::Ordinary));
        assert_eq!(kind_of("no-such-thing"), None);
    }

    #[test]
    fn foreign_groups_are_looked_up_by_symbol() {
        let mut symbols = SymbolTable::new();
        let registry = Registry::build(&mut symbols, Some(1));
        for name in ["math", "random", "time"] {
            let id = registry.group_id(symbols.intern(name)).unwrap();
            assert_eq!(registry.group(id).unwrap().name(), name);
        }
        assert_eq!(registry.group_id(symbols.intern("numpy")), None);
    }

    #[test]
    fn install_binds_every_name() {
        let mut symbols = SymbolTable::new();
        let registry = Registry::build(&mut symbols, None);
        let mut heap = Heap::new(100, 1000);
        let global = heap.alloc_frame(None);
        registry.install(&mut heap, &mut symbols, global).unwrap();
        assert_eq!(heap.frame(global).unwrap().len(), registry.prim_count());
    }
}
