use tracing::debug;

use crate::context::Step;
use crate::error::{EvalError, EvalResult};
use crate::eval::Machine;
use crate::heap::Continuation;
use crate::value::{ContId, Value};

/// Snapshot the caller's pending step, auxiliary stack and environment.
fn capture(m: &mut Machine) -> Value {
    m.heap.alloc_continuation(Continuation {
        step: m.ctx.cont,
        stack: m.ctx.snapshot(),
        env: m.ctx.env,
        special: false,
    })
}

/// `(call/cc)` returns the current continuation; `(call/cc f)` calls `f`
/// with it.
pub(crate) fn op_callcc(m: &mut Machine) -> EvalResult<Step> {
    let args = m.ctx.argl;
    if args.is_nil() {
        m.ctx.val = capture(m);
        return Ok(m.ctx.cont);
    }
    let proc = match m.heap.uncons(args) {
        Some((proc, Value::Nil)) => proc,
        _ => return Err(EvalError::malformed("call/cc expects at most one argument")),
    };
    if !proc.is_procedure() {
        return Err(EvalError::malformed(format!(
            "call/cc: expected procedure, got {}",
            m.render(proc)
        )));
    }
    let k = capture(m);
    m.ctx.argl = m.heap.cons(k, Value::Nil)?;
    Ok(Step::Apply(proc))
}

/// Invoke a continuation with `argl` (zero or one value): the snapshot
/// replaces the live step, stack and environment.
pub(crate) fn resume(m: &mut Machine, id: ContId) -> EvalResult<Step> {
    let val = match m.heap.uncons(m.ctx.argl) {
        None => Value::Nil,
        Some((val, Value::Nil)) => val,
        Some(_) => {
            return Err(EvalError::malformed(
                "continuation expects at most one argument",
            ))
        }
    };
    let k = m.heap.continuation(id)?;
    let (step, stack, env) = (k.step, k.stack.clone(), k.env);
    debug!(continuation = id.0, from_depth = m.ctx.depth(), to_depth = stack.len(), "resume");
    m.ctx.restore(stack);
    m.ctx.env = env;
    m.ctx.cont = step;
    m.ctx.val = val;
    Ok(step)
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::error::EvalError;
    use crate::eval::Machine;

    fn run(src: &str) -> String {
        Machine::new(Config::default())
            .unwrap()
            .eval_to_string(src)
            .unwrap()
    }

    #[test]
    fn escape_from_nested_computation() {
        assert_eq!(run("(+ 1 (call/cc (lambda (k) (+ 10 (k 2)))))"), "3");
    }

    #[test]
    fn unused_continuation_returns_normally() {
        assert_eq!(run("(+ 1 (call/cc (lambda (k) 5)))"), "6");
    }

    #[test]
    fn zero_argument_capture_returns_the_continuation() {
        assert_eq!(run("(type (call/cc))"), "continuation");
        assert_eq!(run("(type (call-with-current-continuation))"), "continuation");
    }

    #[test]
    fn reentry_loops_through_a_body() {
        let src = "(define (count-to limit)
                     (define n 0)
                     (define k (call/cc))
                     (set! n (+ n 1))
                     (if (< n limit) (k k) n))
                   (count-to 5)";
        assert_eq!(run(src), "5");
    }

    #[test]
    fn reentry_after_top_level_form_returned() {
        // each top-level form is its own evaluation, so re-entering `k`
        // only re-runs the rest of the `define r` form
        let src = "(define k ())
                   (define r (list 'a (call/cc (lambda (c) (set! k c) 0))))
                   (k 1)
                   r";
        assert_eq!(run(src), "(a 1)");
    }

    #[test]
    fn continuation_with_no_value_delivers_nil() {
        assert_eq!(run("(list 1 (call/cc (lambda (k) (k))))"), "(1 ())");
    }

    #[test]
    fn bad_arguments() {
        let mut m = Machine::new(Config::default()).unwrap();
        assert!(matches!(m.eval_str("(call/cc 5)"), Err(EvalError::Malformed(_))));
        assert!(matches!(
            m.eval_str("(call/cc car cdr)"),
            Err(EvalError::Malformed(_))
        ));
        assert!(matches!(
            m.eval_str("((call/cc) 1 2)"),
            Err(EvalError::Malformed(_))
        ));
    }
}
