use tracing::debug;

use crate::context::{Checkpoint, Slot, Step};
use crate::error::{EvalError, EvalResult};
use crate::eval::Machine;
use crate::forms::single;
use crate::value::Value;

/// `(trap exp)`: `(#t . value)` on success, `(() . "kind: message")` when
/// evaluating `exp` fails.
pub(crate) fn op_trap(m: &mut Machine) -> EvalResult<Step> {
    let exp = single(m, m.ctx.argl)?;
    m.ctx.push(Slot::Trap(Checkpoint {
        env: m.ctx.env,
        cont: m.ctx.cont,
    }));
    m.ctx.exp = exp;
    m.ctx.cont = Step::TrapDone;
    Ok(Step::Eval)
}

pub(crate) fn trap_done(m: &mut Machine) -> EvalResult<Step> {
    let checkpoint = m.ctx.pop_checkpoint()?;
    m.ctx.env = checkpoint.env;
    m.ctx.cont = checkpoint.cont;
    m.ctx.val = m.heap.cons(Value::True, m.ctx.val)?;
    Ok(m.ctx.cont)
}

/// Route a failed step to the innermost active trap. Errors that are not
/// catchable, or raised with no trap active, propagate.
pub(crate) fn recover(m: &mut Machine, err: EvalError) -> EvalResult<Step> {
    if !err.is_catchable() {
        return Err(err);
    }
    let checkpoint = match m.ctx.unwind_to_trap() {
        Some(checkpoint) => checkpoint,
        None => return Err(err),
    };
    debug!(error = %err, depth = m.ctx.depth(), "trap caught");
    m.ctx.env = checkpoint.env;
    m.ctx.cont = checkpoint.cont;
    let description = m.heap.alloc_string(err.to_string());
    m.ctx.val = m.heap.cons(Value::Nil, description)?;
    Ok(m.ctx.cont)
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::error::EvalError;
    use crate::eval::Machine;

    fn machine() -> Machine {
        Machine::new(Config::default()).unwrap()
    }

    #[test]
    fn success_and_failure_shapes() {
        let mut m = machine();
        assert_eq!(m.eval_to_string("(trap 42)").unwrap(), "(#t . 42)");
        assert_eq!(
            m.eval_to_string("(trap (error \"boom\"))").unwrap(),
            "(() . \"user-error: boom\")"
        );
        assert_eq!(
            m.eval_to_string("(trap undefined-thing)").unwrap(),
            "(() . \"unbound-variable: undefined-thing\")"
        );
    }

    #[test]
    fn trap_never_leaks_stack_depth() {
        let mut m = machine();
        let src = "(define (spin n) (if (< n 1) 'done (begin (trap (car 5)) (spin (- n 1)))))
                   (spin 50)";
        assert_eq!(m.eval_to_string(src).unwrap(), "done");
        let shallow = m.ctx.high_water();
        m.eval_str("(spin 500)").unwrap();
        assert_eq!(m.ctx.high_water(), shallow);
    }

    #[test]
    fn environment_is_restored_after_failure() {
        let mut m = machine();
        let src = "(define (f x) (list (trap ((lambda (x) (error x)) 'inner)) x))
                   (f 'outer)";
        assert_eq!(
            m.eval_to_string(src).unwrap(),
            "((() . \"user-error: inner\") outer)"
        );
    }

    #[test]
    fn nested_traps_catch_innermost_first() {
        let mut m = machine();
        assert_eq!(
            m.eval_to_string("(trap (cdr (trap (nand 1 2.0))))").unwrap(),
            "(#t . \"type-mismatch: expected integers, got 1 and 2.0\")"
        );
    }

    #[test]
    fn exit_is_not_caught() {
        let mut m = machine();
        assert!(matches!(
            m.eval_str("(trap (exit 3))"),
            Err(EvalError::Exit { status: 3, .. })
        ));
    }

    #[test]
    fn uncaught_errors_propagate() {
        let mut m = machine();
        assert_eq!(
            m.eval_str("(error \"loose\")"),
            Err(EvalError::User("loose".into()))
        );
    }
}
