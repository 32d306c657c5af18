use im_rc::Vector;

use crate::error::{EvalError, EvalResult};
use crate::symbol::SymbolTable;
use crate::value::{EnvId, SymbolId, Value};

/// A unit of work over the [`Context`]. The run loop executes the current
/// step, which returns the next one; nothing ever recurses natively.
///
/// A step that needs state across a nested evaluation pushes it on the
/// auxiliary stack, points `cont` at its follow-up step and returns
/// [`Step::Eval`]. The follow-up pops that state once the sub-evaluation's
/// result is in `val`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Step {
    /// End of a top-level evaluation; `val` holds the result.
    Halt,
    /// Evaluate `exp` in `env`, deliver to `cont`.
    Eval,
    /// Apply the procedure to `argl`.
    Apply(Value),
    // host: operator and operand evaluation
    EvalOperator,
    EvalOperand,
    // special forms
    BeginNext,
    IfBranch,
    CondNext,
    DefineBind,
    SetBind,
    SpecialBind,
    // quasiquote expander
    Quasi,
    QuasiRewrap,
    QuasiNext,
    QuasiSpliced,
    QuasiFinish,
    // trap
    TrapDone,
}

impl Step {
    /// The value a step carries, for the collector.
    pub fn value(self) -> Option<Value> {
        match self {
            Step::Apply(v) => Some(v),
            _ => None,
        }
    }
}

/// Identifies a registered foreign group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GroupId(pub u32);

/// What an evaluated operand list is delivered to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Callee {
    Proc(Value),
    Foreign { group: GroupId, func: SymbolId },
}

/// Saved environment and continuation of an active `trap`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Checkpoint {
    pub env: EnvId,
    pub cont: Step,
}

/// One entry on the auxiliary stack.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Slot {
    Value(Value),
    Env(EnvId),
    Step(Step),
    Callee(Callee),
    /// Marks the base of an accumulator (operand values, quasiquote output).
    Sentinel,
    Trap(Checkpoint),
}

/// The auxiliary stack. Persistent, so a continuation snapshot is a cheap
/// structure-sharing clone that later pushes and pops cannot disturb.
pub type Stack = Vector<Slot>;

/// The registers of the single live evaluation.
pub struct Context {
    /// Expression to evaluate.
    pub exp: Value,
    /// Current environment.
    pub env: EnvId,
    /// Where the next result goes.
    pub cont: Step,
    /// Result register.
    pub val: Value,
    /// Argument list for `Apply`.
    pub argl: Value,
    stack: Stack,
    high_water: usize,
}

impl Context {
    pub fn new(env: EnvId) -> Self {
        Context {
            exp: Value::Nil,
            env,
            cont: Step::Halt,
            val: Value::Nil,
            argl: Value::Nil,
            stack: Vector::new(),
            high_water: 0,
        }
    }

    /// Prepare for a new top-level evaluation of `exp` in `env`.
    pub fn reset(&mut self, exp: Value, env: EnvId) {
        self.exp = exp;
        self.env = env;
        self.cont = Step::Halt;
        self.val = Value::Nil;
        self.argl = Value::Nil;
        self.stack = Vector::new();
        self.high_water = 0;
    }

    pub fn push(&mut self, slot: Slot) {
        self.stack.push_back(slot);
        if self.stack.len() > self.high_water {
            self.high_water = self.stack.len();
        }
    }

    pub fn push_value(&mut self, val: Value) {
        self.push(Slot::Value(val));
    }

    /// Save the continuation and environment.
    pub fn push_ce(&mut self) {
        self.push(Slot::Step(self.cont));
        self.push(Slot::Env(self.env));
    }

    /// Restore what `push_ce` saved.
    pub fn pop_ce(&mut self) -> EvalResult<()> {
        self.env = self.pop_env()?;
        self.cont = self.pop_step()?;
        Ok(())
    }

    pub fn pop(&mut self) -> EvalResult<Slot> {
        self.stack
            .pop_back()
            .ok_or_else(|| EvalError::Internal("auxiliary stack underflow".into()))
    }

    pub fn pop_value(&mut self) -> EvalResult<Value> {
        match self.pop()? {
            Slot::Value(v) => Ok(v),
            other => Err(mismatch("value", other)),
        }
    }

    pub fn pop_env(&mut self) -> EvalResult<EnvId> {
        match self.pop()? {
            Slot::Env(e) => Ok(e),
            other => Err(mismatch("environment", other)),
        }
    }

    pub fn pop_step(&mut self) -> EvalResult<Step> {
        match self.pop()? {
            Slot::Step(s) => Ok(s),
            other => Err(mismatch("step", other)),
        }
    }

    pub fn pop_callee(&mut self) -> EvalResult<Callee> {
        match self.pop()? {
            Slot::Callee(c) => Ok(c),
            other => Err(mismatch("callee", other)),
        }
    }

    pub fn pop_checkpoint(&mut self) -> EvalResult<Checkpoint> {
        match self.pop()? {
            Slot::Trap(c) => Ok(c),
            other => Err(mismatch("trap checkpoint", other)),
        }
    }

    /// The environment on top of the stack, left in place.
    pub fn peek_env(&self) -> EvalResult<EnvId> {
        match self.stack.back() {
            Some(Slot::Env(e)) => Ok(*e),
            Some(other) => Err(mismatch("environment", *other)),
            None => Err(EvalError::Internal("auxiliary stack underflow".into())),
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Deepest the stack has been since the last reset.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// A structure-sharing copy of the stack.
    pub fn snapshot(&self) -> Stack {
        self.stack.clone()
    }

    /// Replace the live stack wholesale (continuation invocation).
    pub fn restore(&mut self, stack: Stack) {
        self.stack = stack;
        if self.stack.len() > self.high_water {
            self.high_water = self.stack.len();
        }
    }

    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.stack.iter()
    }

    /// Drop everything above (and including) the innermost trap checkpoint
    /// and return it. `None` when no trap is active.
    pub fn unwind_to_trap(&mut self) -> Option<Checkpoint> {
        let mut i = self.stack.len();
        while i > 0 {
            i -= 1;
            if let Some(Slot::Trap(checkpoint)) = self.stack.get(i) {
                let checkpoint = *checkpoint;
                let _discarded = self.stack.split_off(i);
                return Some(checkpoint);
            }
        }
        None
    }

    /// One line per slot, top of stack first. Debugging aid.
    pub fn describe_stack(&self, symbols: &SymbolTable) -> Vec<String> {
        self.stack
            .iter()
            .rev()
            .map(|slot| match slot {
                Slot::Value(Value::Symbol(id)) => format!("value {}", symbols.name(*id)),
                Slot::Callee(Callee::Foreign { func, .. }) => {
                    format!("foreign {}", symbols.name(*func))
                }
                other => format!("{:?}", other),
            })
            .collect()
    }
}

fn mismatch(expected: &str, found: Slot) -> EvalError {
    EvalError::Internal(format!(
        "auxiliary stack: expected {}, found {:?}",
        expected, found
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_ce_round_trips() {
        let mut ctx = Context::new(EnvId(0));
        ctx.cont = Step::BeginNext;
        ctx.env = EnvId(5);
        ctx.push_ce();
        ctx.cont = Step::Halt;
        ctx.env = EnvId(9);
        ctx.pop_ce().unwrap();
        assert_eq!(ctx.cont, Step::BeginNext);
        assert_eq!(ctx.env, EnvId(5));
        assert_eq!(ctx.depth(), 0);
        assert_eq!(ctx.high_water(), 2);
    }

    #[test]
    fn typed_pop_rejects_wrong_slot() {
        let mut ctx = Context::new(EnvId(0));
        ctx.push(Slot::Sentinel);
        assert!(matches!(ctx.pop_value(), Err(EvalError::Internal(_))));
        assert!(matches!(ctx.pop(), Err(EvalError::Internal(_))));
    }

    #[test]
    fn snapshot_is_unaffected_by_later_mutation() {
        let mut ctx = Context::new(EnvId(0));
        ctx.push_value(Value::Int(1));
        ctx.push_value(Value::Int(2));
        let snap = ctx.snapshot();
        ctx.pop_value().unwrap();
        ctx.push_value(Value::Int(99));
        ctx.push_value(Value::Int(100));
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.back(), Some(&Slot::Value(Value::Int(2))));

        ctx.restore(snap);
        assert_eq!(ctx.pop_value().unwrap(), Value::Int(2));
        assert_eq!(ctx.pop_value().unwrap(), Value::Int(1));
    }

    #[test]
    fn unwind_stops_at_innermost_trap() {
        let mut ctx = Context::new(EnvId(0));
        let outer = Checkpoint { env: EnvId(1), cont: Step::Halt };
        let inner = Checkpoint { env: EnvId(2), cont: Step::BeginNext };
        ctx.push(Slot::Trap(outer));
        ctx.push_value(Value::Int(1));
        ctx.push(Slot::Trap(inner));
        ctx.push(Slot::Sentinel);
        ctx.push_value(Value::Int(2));

        assert_eq!(ctx.unwind_to_trap(), Some(inner));
        assert_eq!(ctx.depth(), 2);
        assert_eq!(ctx.unwind_to_trap(), Some(outer));
        assert_eq!(ctx.depth(), 0);
        assert_eq!(ctx.unwind_to_trap(), None);
    }
}
