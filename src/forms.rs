//! Special forms. Each receives its raw operand list in `argl` and runs in
//! the caller's environment with the caller's continuation, so whatever it
//! evaluates last is a tail call: it sets `exp` and returns [`Step::Eval`]
//! without saving anything.

use crate::context::{Callee, Step};
use crate::env::{env_define, env_set};
use crate::error::{EvalError, EvalResult};
use crate::eval::Machine;
use crate::globals::PrimFn;
use crate::heap::Closure;
use crate::quasi;
use crate::symbol::sym;
use crate::trap;
use crate::value::{SymbolId, Value};

pub const FORMS: &[(&str, PrimFn)] = &[
    ("begin", op_begin),
    ("do", op_begin),
    ("if", op_if),
    ("cond", op_cond),
    ("define", op_define),
    ("set!", op_set),
    ("lambda", op_lambda),
    ("special", op_special),
    ("quote", op_quote),
    ("quasiquote", quasi::op_quasiquote),
    ("trap", trap::op_trap),
    ("ffi", op_ffi),
];

// ============================================================================
// begin / do
// ============================================================================

fn op_begin(m: &mut Machine) -> EvalResult<Step> {
    let body = m.ctx.argl;
    match m.heap.uncons(body) {
        None if body.is_nil() => {
            m.ctx.val = Value::Nil;
            Ok(m.ctx.cont)
        }
        None => Err(EvalError::malformed("begin: improper body")),
        Some((last, Value::Nil)) => {
            m.ctx.exp = last;
            Ok(Step::Eval)
        }
        Some((first, rest)) => {
            m.ctx.push_ce();
            m.ctx.push_value(rest);
            m.ctx.exp = first;
            m.ctx.cont = Step::BeginNext;
            Ok(Step::Eval)
        }
    }
}

/// Stack: [.. cont env rest]. The previous value is discarded.
pub(crate) fn begin_next(m: &mut Machine) -> EvalResult<Step> {
    let rest = m.ctx.pop_value()?;
    m.ctx.env = m.ctx.peek_env()?;
    match m.heap.uncons(rest) {
        Some((last, Value::Nil)) => {
            m.ctx.pop_ce()?;
            m.ctx.exp = last;
            Ok(Step::Eval)
        }
        Some((next, more)) => {
            m.ctx.push_value(more);
            m.ctx.exp = next;
            m.ctx.cont = Step::BeginNext;
            Ok(Step::Eval)
        }
        None => Err(EvalError::malformed("begin: improper body")),
    }
}

// ============================================================================
// if / cond
// ============================================================================

fn op_if(m: &mut Machine) -> EvalResult<Step> {
    let (test, consequent, alternate) = match m.heap.list_to_vec(m.ctx.argl).as_deref() {
        Some(&[t, c]) => (t, c, Value::Nil),
        Some(&[t, c, a]) => (t, c, a),
        _ => return Err(EvalError::malformed("if expects 2 or 3 operands")),
    };
    m.ctx.push_ce();
    m.ctx.push_value(consequent);
    m.ctx.push_value(alternate);
    m.ctx.exp = test;
    m.ctx.cont = Step::IfBranch;
    Ok(Step::Eval)
}

/// Stack: [.. cont env consequent alternate].
pub(crate) fn if_branch(m: &mut Machine) -> EvalResult<Step> {
    let alternate = m.ctx.pop_value()?;
    let consequent = m.ctx.pop_value()?;
    m.ctx.pop_ce()?;
    m.ctx.exp = if m.ctx.val.is_nil() {
        alternate
    } else {
        consequent
    };
    Ok(Step::Eval)
}

fn op_cond(m: &mut Machine) -> EvalResult<Step> {
    let clauses = m.ctx.argl;
    m.ctx.push_ce();
    cond_setup(m, clauses)
}

/// Start the next clause's test, or yield nil when none are left.
/// Stack on entry: [.. cont env].
fn cond_setup(m: &mut Machine, clauses: Value) -> EvalResult<Step> {
    let (clause, rest) = match m.heap.uncons(clauses) {
        Some(split) => split,
        None if clauses.is_nil() => {
            m.ctx.pop_ce()?;
            m.ctx.val = Value::Nil;
            return Ok(m.ctx.cont);
        }
        None => return Err(EvalError::malformed("cond: improper clause list")),
    };
    let (test, body) = m.heap.uncons(clause).ok_or_else(|| {
        EvalError::malformed(format!("cond: expected a clause, got {}", m.render(clause)))
    })?;
    m.ctx.env = m.ctx.peek_env()?;
    m.ctx.push_value(rest);
    m.ctx.push_value(body);
    m.ctx.exp = test;
    m.ctx.cont = Step::CondNext;
    Ok(Step::Eval)
}

/// Stack: [.. cont env rest body].
pub(crate) fn cond_next(m: &mut Machine) -> EvalResult<Step> {
    let body = m.ctx.pop_value()?;
    let rest = m.ctx.pop_value()?;
    if m.ctx.val.is_nil() {
        return cond_setup(m, rest);
    }
    m.ctx.pop_ce()?;
    match m.heap.uncons(body) {
        None if body.is_nil() => Ok(m.ctx.cont),
        Some((only, Value::Nil)) => {
            m.ctx.exp = only;
            Ok(Step::Eval)
        }
        Some(_) => {
            m.ctx.exp = m.heap.cons(Value::Symbol(sym::BEGIN), body)?;
            Ok(Step::Eval)
        }
        None => Err(EvalError::malformed("cond: improper clause body")),
    }
}

// ============================================================================
// define / set!
// ============================================================================

fn op_define(m: &mut Machine) -> EvalResult<Step> {
    let (target, body) = at_least_two(m, m.ctx.argl, "define")?;

    if let Some((name, params)) = m.heap.uncons(target) {
        let name = symbol_operand(m, name)?;
        let closure = make_closure(m, params, body, false)?;
        env_define(&mut m.heap, m.ctx.env, name, closure)?;
        m.ctx.val = Value::Nil;
        return Ok(m.ctx.cont);
    }

    let exp = single(m, body)?;
    let name = symbol_operand(m, target)?;
    m.ctx.push_ce();
    m.ctx.push_value(Value::Symbol(name));
    m.ctx.exp = exp;
    m.ctx.cont = Step::DefineBind;
    Ok(Step::Eval)
}

/// Stack: [.. cont env name].
pub(crate) fn define_bind(m: &mut Machine) -> EvalResult<Step> {
    let name = pop_symbol(m)?;
    m.ctx.pop_ce()?;
    env_define(&mut m.heap, m.ctx.env, name, m.ctx.val)?;
    m.ctx.val = Value::Nil;
    Ok(m.ctx.cont)
}

fn op_set(m: &mut Machine) -> EvalResult<Step> {
    let (target, body) = at_least_two(m, m.ctx.argl, "set!")?;
    let exp = single(m, body)?;
    let name = symbol_operand(m, target)?;
    m.ctx.push_ce();
    m.ctx.push_value(Value::Symbol(name));
    m.ctx.exp = exp;
    m.ctx.cont = Step::SetBind;
    Ok(Step::Eval)
}

/// Stack: [.. cont env name].
pub(crate) fn set_bind(m: &mut Machine) -> EvalResult<Step> {
    let name = pop_symbol(m)?;
    m.ctx.pop_ce()?;
    env_set(&mut m.heap, m.ctx.env, name, m.ctx.val, &m.symbols)?;
    m.ctx.val = Value::Nil;
    Ok(m.ctx.cont)
}

// ============================================================================
// lambda / special
// ============================================================================

fn op_lambda(m: &mut Machine) -> EvalResult<Step> {
    let (params, body) = at_least_two(m, m.ctx.argl, "lambda")?;
    m.ctx.val = make_closure(m, params, body, false)?;
    Ok(m.ctx.cont)
}

fn op_special(m: &mut Machine) -> EvalResult<Step> {
    let (target, body) = at_least_two(m, m.ctx.argl, "special")?;

    if let Some((name, params)) = m.heap.uncons(target) {
        let name = symbol_operand(m, name)?;
        let closure = make_closure(m, params, body, true)?;
        env_define(&mut m.heap, m.ctx.env, name, closure)?;
        m.ctx.val = Value::Nil;
        return Ok(m.ctx.cont);
    }

    let exp = single(m, body)?;
    let name = symbol_operand(m, target)?;
    m.ctx.push_ce();
    m.ctx.push_value(Value::Symbol(name));
    m.ctx.exp = exp;
    m.ctx.cont = Step::SpecialBind;
    Ok(Step::Eval)
}

/// Stack: [.. cont env name]. Marks the evaluated procedure special and
/// binds it. Closures and continuations are marked in place; a primitive
/// is shared by every binding of its name, so it gets a special wrapper.
pub(crate) fn special_bind(m: &mut Machine) -> EvalResult<Step> {
    let name = pop_symbol(m)?;
    m.ctx.pop_ce()?;
    let proc = m.ctx.val;
    match proc {
        Value::Closure(id) => m.heap.closure_mut(id)?.special = true,
        Value::Cont(id) => m.heap.continuation_mut(id)?.special = true,
        Value::Prim(_) => {}
        other => {
            return Err(EvalError::malformed(format!(
                "special: expected a procedure, got {}",
                m.render(other)
            )))
        }
    }
    let bound = match proc {
        Value::Prim(_) if !m.is_special(proc)? => raw_operand_wrapper(m, proc)?,
        _ => proc,
    };
    env_define(&mut m.heap, m.ctx.env, name, bound)?;
    m.ctx.val = Value::Nil;
    Ok(m.ctx.cont)
}

/// A special closure `(lambda operands (apply prim operands))` with
/// `apply` and `prim` embedded as values, so rebinding either name cannot
/// change it.
fn raw_operand_wrapper(m: &mut Machine, prim: Value) -> EvalResult<Value> {
    let apply = m
        .registry
        .prim_named("apply")
        .ok_or_else(|| EvalError::Internal("apply is not registered".into()))?;
    let operands = Value::Symbol(m.symbols.intern("operands"));
    let body = m.heap.list(&[apply, prim, operands])?;
    Ok(m.heap.alloc_closure(Closure {
        params: operands,
        body,
        env: m.ctx.env,
        special: true,
    }))
}

/// Build a closure over the current environment; a multi-expression body
/// is wrapped in `begin`.
fn make_closure(m: &mut Machine, params: Value, body: Value, special: bool) -> EvalResult<Value> {
    check_params(m, params)?;
    let body = match m.heap.uncons(body) {
        Some((only, Value::Nil)) => only,
        Some(_) => m.heap.cons(Value::Symbol(sym::BEGIN), body)?,
        None => return Err(EvalError::malformed("empty body")),
    };
    Ok(m.heap.alloc_closure(Closure {
        params,
        body,
        env: m.ctx.env,
        special,
    }))
}

/// Every name in a parameter template must be a symbol.
fn check_params(m: &Machine, params: Value) -> EvalResult<()> {
    let mut current = params;
    let mut seen = 0usize;
    loop {
        match current {
            Value::Nil | Value::Symbol(_) => return Ok(()),
            Value::Pair(id) if seen <= m.heap.total_cells() => {
                if !matches!(m.heap.car(id), Value::Symbol(_)) {
                    return Err(EvalError::malformed(format!(
                        "parameter must be a symbol, got {}",
                        m.render(m.heap.car(id))
                    )));
                }
                current = m.heap.cdr(id);
                seen += 1;
            }
            other => {
                return Err(EvalError::malformed(format!(
                    "bad parameter template {}",
                    m.render(other)
                )))
            }
        }
    }
}

// ============================================================================
// quote / ffi
// ============================================================================

fn op_quote(m: &mut Machine) -> EvalResult<Step> {
    m.ctx.val = single(m, m.ctx.argl)?;
    Ok(m.ctx.cont)
}

/// `(ffi group function arg ...)`: evaluate the arguments like any call,
/// then dispatch to the named foreign group.
fn op_ffi(m: &mut Machine) -> EvalResult<Step> {
    let (group, rest) = at_least_two(m, m.ctx.argl, "ffi")?;
    let (func, args) = m
        .heap
        .uncons(rest)
        .ok_or_else(|| EvalError::malformed("ffi expects a group and a function name"))?;
    let group_name = symbol_operand(m, group)?;
    let func = symbol_operand(m, func)?;
    let group = m.registry.group_id(group_name).ok_or_else(|| {
        EvalError::NameLookup(format!("no ffi group {}", m.symbols.name(group_name)))
    })?;
    m.ctx.push_ce();
    m.begin_operands(Callee::Foreign { group, func }, args)
}

// ============================================================================
// Operand helpers
// ============================================================================

/// Split `(first . rest)` where `rest` is non-empty.
fn at_least_two(m: &Machine, args: Value, form: &str) -> EvalResult<(Value, Value)> {
    match m.heap.uncons(args) {
        Some((first, rest)) if rest.is_pair() => Ok((first, rest)),
        _ => Err(EvalError::malformed(format!(
            "{} takes at least 2 operands",
            form
        ))),
    }
}

/// The only element of a one-element list.
pub(crate) fn single(m: &Machine, list: Value) -> EvalResult<Value> {
    match m.heap.uncons(list) {
        Some((only, Value::Nil)) => Ok(only),
        _ => Err(EvalError::malformed(format!(
            "expected a single operand, got {}",
            m.render(list)
        ))),
    }
}

fn symbol_operand(m: &Machine, val: Value) -> EvalResult<SymbolId> {
    val.as_symbol().ok_or_else(|| {
        EvalError::malformed(format!("expected symbol, got {}", m.render(val)))
    })
}

fn pop_symbol(m: &mut Machine) -> EvalResult<SymbolId> {
    m.ctx
        .pop_value()?
        .as_symbol()
        .ok_or_else(|| EvalError::Internal("expected a saved symbol".into()))
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::error::EvalError;
    use crate::eval::Machine;

    fn machine() -> Machine {
        Machine::new(Config::default().with_seed(3)).unwrap()
    }

    fn run(src: &str) -> String {
        machine().eval_to_string(src).unwrap()
    }

    fn fails(src: &str) -> EvalError {
        machine().eval_str(src).unwrap_err()
    }

    #[test]
    fn begin_sequences_and_returns_last() {
        assert_eq!(run("(begin 1 2 3)"), "3");
        assert_eq!(run("(do 1 2)"), "2");
        assert_eq!(run("(begin)"), "()");
        assert_eq!(run("(define x 1) (begin (set! x 5) (+ x 1))"), "6");
    }

    #[test]
    fn if_selects_on_nil() {
        assert_eq!(run("(if () 1 2)"), "2");
        assert_eq!(run("(if 0 1 2)"), "1");
        assert_eq!(run("(if () 1)"), "()");
        assert!(matches!(fails("(if 1)"), EvalError::Malformed(_)));
        assert!(matches!(fails("(if 1 2 3 4)"), EvalError::Malformed(_)));
    }

    #[test]
    fn cond_clauses() {
        assert_eq!(run("(cond (() 1) (#t 2) (#t 3))"), "2");
        assert_eq!(run("(cond (() 1))"), "()");
        assert_eq!(run("(cond ((+ 1 2)))"), "3");
        assert_eq!(run("(define n 0) (cond (#t (set! n 4) (+ n 1)))"), "5");
        assert!(matches!(fails("(cond 5)"), EvalError::Malformed(_)));
    }

    #[test]
    fn cond_restores_environment_between_tests() {
        let src = "(define (f x) (cond ((< x 0) 'neg) ((< 0 x) 'pos) (#t 'zero)))
                   (list (f -1) (f 1) (f 0))";
        assert_eq!(run(src), "(neg pos zero)");
    }

    #[test]
    fn define_shapes() {
        assert_eq!(run("(define x 10) x"), "10");
        assert_eq!(run("(define (sq x) (* x x)) (sq 7)"), "49");
        assert_eq!(run("(define x 1)"), "()");
        assert!(matches!(fails("(define x)"), EvalError::Malformed(_)));
        assert!(matches!(fails("(define 5 1)"), EvalError::Malformed(_)));
        assert!(matches!(fails("(define (5 x) 1)"), EvalError::Malformed(_)));
        assert!(matches!(fails("(define x 1 2)"), EvalError::Malformed(_)));
    }

    #[test]
    fn define_binds_in_current_frame_only() {
        let src = "(define x 1)
                   (define (shadow) (define x 2) x)
                   (list (shadow) x)";
        assert_eq!(run(src), "(2 1)");
    }

    #[test]
    fn set_requires_existing_binding() {
        assert_eq!(fails("(set! ghost 1)"), EvalError::Unbound("ghost".into()));
        assert_eq!(run("(define x 1) (set! x 2) x"), "2");
        let src = "(define x 1) (define (bump) (set! x (+ x 1))) (bump) (bump) x";
        assert_eq!(run(src), "3");
    }

    #[test]
    fn lambda_validation() {
        assert!(matches!(fails("(lambda (x))"), EvalError::Malformed(_)));
        assert!(matches!(fails("(lambda (1) 1)"), EvalError::Malformed(_)));
        assert_eq!(run("((lambda (x) (define y 2) (+ x y)) 1)"), "3");
    }

    #[test]
    fn special_closures_see_raw_operands_and_caller_env() {
        let src = "(special (quote-it x) x)
                   (quote-it (+ 1 2))";
        assert_eq!(run(src), "(+ 1 2)");

        let src = "(special (my-when c & body) (if (eval c 1) (eval (cons 'begin body) 1)))
                   (define (f y) (my-when (< 0 y) 'positive))
                   (list (f 1) (f -1))";
        assert_eq!(run(src), "(positive ())");
    }

    #[test]
    fn special_from_expression_marks_the_closure() {
        let src = "(define id (lambda (x) x))
                   (special raw id)
                   (list (raw (+ 1 1)) (id (+ 1 1)))";
        assert_eq!(run(src), "((+ 1 1) (+ 1 1))");
        assert!(matches!(fails("(special bad 5)"), EvalError::Malformed(_)));
    }

    #[test]
    fn special_from_a_primitive_leaves_the_primitive_alone() {
        let src = "(special raw-car car)
                   (list (raw-car (1 2)) (car '(3 4)))";
        assert_eq!(run(src), "(1 3)");
        assert_eq!(run("(special my-quote quote) (my-quote (a b))"), "(a b)");
    }

    #[test]
    fn special_from_a_continuation_receives_raw_operands() {
        let src = "(list 'got (call/cc (lambda (k) (special raw-k k) (raw-k (+ 1 2)))))";
        assert_eq!(run(src), "(got (+ 1 2))");
    }

    #[test]
    fn quote_takes_one_operand() {
        assert_eq!(run("(quote (a b))"), "(a b)");
        assert_eq!(run("'x"), "x");
        assert!(matches!(fails("(quote a b)"), EvalError::Malformed(_)));
    }

    #[test]
    fn ffi_unknown_group_is_a_name_lookup_error() {
        assert!(matches!(fails("(ffi numpy sqrt 4)"), EvalError::NameLookup(_)));
        assert_eq!(run("(ffi math sqrt 16)"), "4.0");
    }
}
