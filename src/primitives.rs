use std::io::Write;

use rustc_hash::FxHashSet;

use crate::context::Step;
use crate::continuation::op_callcc;
use crate::env::env_ancestor;
use crate::error::{EvalError, EvalResult};
use crate::eval::Machine;
use crate::globals::PrimFn;
use crate::reader;
use crate::symbol::sym;
use crate::value::{PairId, Value};

pub const PRIMITIVES: &[(&str, PrimFn)] = &[
    // pairs
    ("cons", prim_cons),
    ("car", prim_car),
    ("cdr", prim_cdr),
    ("set-car!", prim_set_car),
    ("set-cdr!", prim_set_cdr),
    // predicates
    ("null?", prim_null),
    ("atom?", prim_atom),
    ("eq?", prim_eq),
    ("equal?", prim_equal),
    // arithmetic
    ("+", prim_add),
    ("-", prim_sub),
    ("*", prim_mul),
    ("/", prim_div),
    ("<", prim_lt),
    ("nand", prim_nand),
    // control
    ("apply", prim_apply),
    ("call/cc", op_callcc),
    ("call-with-current-continuation", op_callcc),
    ("eval", prim_eval),
    ("error", prim_error),
    ("exit", prim_exit),
    // misc
    ("print", prim_print),
    ("obj>string", prim_stringify),
    ("range", prim_range),
    ("type", prim_type),
];

// ============================================================================
// Argument helpers
// ============================================================================

/// Exactly `N` evaluated arguments.
fn args<const N: usize>(m: &Machine, name: &str) -> EvalResult<[Value; N]> {
    let vals = m
        .heap
        .list_to_vec(m.ctx.argl)
        .ok_or_else(|| EvalError::malformed(format!("{}: improper argument list", name)))?;
    <[Value; N]>::try_from(vals).map_err(|vals| {
        EvalError::malformed(format!(
            "{} expects {} argument{}, got {}",
            name,
            N,
            if N == 1 { "" } else { "s" },
            vals.len()
        ))
    })
}

fn ret(m: &mut Machine, val: Value) -> EvalResult<Step> {
    m.ctx.val = val;
    Ok(m.ctx.cont)
}

// ============================================================================
// Pairs and predicates
// ============================================================================

fn prim_cons(m: &mut Machine) -> EvalResult<Step> {
    let [a, b] = args::<2>(m, "cons")?;
    let pair = m.heap.cons(a, b)?;
    ret(m, pair)
}

/// (car x): car of a pair, nil of nil.
fn prim_car(m: &mut Machine) -> EvalResult<Step> {
    let [x] = args::<1>(m, "car")?;
    let val = m.heap.car_val(x)?;
    ret(m, val)
}

/// (cdr x): cdr of a pair, nil of nil.
fn prim_cdr(m: &mut Machine) -> EvalResult<Step> {
    let [x] = args::<1>(m, "cdr")?;
    let val = m.heap.cdr_val(x)?;
    ret(m, val)
}

fn prim_set_car(m: &mut Machine) -> EvalResult<Step> {
    let [pair, val] = args::<2>(m, "set-car!")?;
    let id = pair_arg(m, "set-car!", pair)?;
    m.heap.set_car(id, val);
    ret(m, Value::Nil)
}

fn prim_set_cdr(m: &mut Machine) -> EvalResult<Step> {
    let [pair, val] = args::<2>(m, "set-cdr!")?;
    let id = pair_arg(m, "set-cdr!", pair)?;
    m.heap.set_cdr(id, val);
    ret(m, Value::Nil)
}

fn pair_arg(m: &Machine, name: &str, val: Value) -> EvalResult<PairId> {
    val.as_pair().ok_or_else(|| {
        EvalError::mistype(format!("{}: expected pair, got {}", name, m.render(val)))
    })
}

fn prim_null(m: &mut Machine) -> EvalResult<Step> {
    let [x] = args::<1>(m, "null?")?;
    ret(m, Value::truth(x.is_nil()))
}

fn prim_atom(m: &mut Machine) -> EvalResult<Step> {
    let [x] = args::<1>(m, "atom?")?;
    ret(m, Value::truth(x.is_atom()))
}

/// (eq? a b): identity. Pairs, strings and procedures compare by handle.
fn prim_eq(m: &mut Machine) -> EvalResult<Step> {
    let [a, b] = args::<2>(m, "eq?")?;
    ret(m, Value::truth(a == b))
}

fn prim_equal(m: &mut Machine) -> EvalResult<Step> {
    let [a, b] = args::<2>(m, "equal?")?;
    let same = equal(m, a, b)?;
    ret(m, Value::truth(same))
}

/// Structural equality without native recursion. A pair of cells already
/// under comparison is assumed equal, so cyclic structures terminate.
pub fn equal(m: &Machine, a: Value, b: Value) -> EvalResult<bool> {
    let mut work = vec![(a, b)];
    let mut seen: FxHashSet<(PairId, PairId)> = FxHashSet::default();
    while let Some((x, y)) = work.pop() {
        match (x, y) {
            (Value::Pair(p), Value::Pair(q)) => {
                if p == q || !seen.insert((p, q)) {
                    continue;
                }
                work.push((m.heap.cdr(p), m.heap.cdr(q)));
                work.push((m.heap.car(p), m.heap.car(q)));
            }
            (Value::Str(s), Value::Str(t)) => {
                if m.heap.string(s)? != m.heap.string(t)? {
                    return Ok(false);
                }
            }
            (Value::Int(i), Value::Float(f)) | (Value::Float(f), Value::Int(i)) => {
                if i as f64 != f {
                    return Ok(false);
                }
            }
            _ => {
                if x != y {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

// ============================================================================
// Arithmetic
// ============================================================================

/// Integer op when both operands are integers, float op otherwise.
fn numeric(
    m: &Machine,
    name: &str,
    a: Value,
    b: Value,
    int_op: fn(i64, i64) -> EvalResult<i64>,
    float_op: fn(f64, f64) -> EvalResult<f64>,
) -> EvalResult<Value> {
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        return int_op(x, y).map(Value::Int);
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => float_op(x, y).map(Value::Float),
        _ => Err(EvalError::mistype(format!(
            "{} expects numbers, got {} and {}",
            name,
            m.render(a),
            m.render(b)
        ))),
    }
}

fn overflow(name: &str) -> EvalError {
    EvalError::Arithmetic(format!("integer overflow in {}", name))
}

fn binary_numeric(
    m: &mut Machine,
    name: &str,
    int_op: fn(i64, i64) -> EvalResult<i64>,
    float_op: fn(f64, f64) -> EvalResult<f64>,
) -> EvalResult<Step> {
    let [a, b] = args::<2>(m, name)?;
    let val = numeric(m, name, a, b, int_op, float_op)?;
    ret(m, val)
}

fn prim_add(m: &mut Machine) -> EvalResult<Step> {
    binary_numeric(
        m,
        "+",
        |x, y| x.checked_add(y).ok_or_else(|| overflow("+")),
        |x, y| Ok(x + y),
    )
}

fn prim_mul(m: &mut Machine) -> EvalResult<Step> {
    binary_numeric(
        m,
        "*",
        |x, y| x.checked_mul(y).ok_or_else(|| overflow("*")),
        |x, y| Ok(x * y),
    )
}

/// (- x) negates; (- x y) subtracts.
fn prim_sub(m: &mut Machine) -> EvalResult<Step> {
    let vals = m.heap.list_to_vec(m.ctx.argl).unwrap_or_default();
    let (a, b) = match vals.as_slice() {
        &[x] => (Value::Int(0), x),
        &[x, y] => (x, y),
        _ => return Err(EvalError::malformed("- expects one or two arguments")),
    };
    if let (Value::Int(0), Value::Float(f)) = (a, b) {
        if vals.len() == 1 {
            return ret(m, Value::Float(-f));
        }
    }
    let val = numeric(
        m,
        "-",
        a,
        b,
        |x, y| x.checked_sub(y).ok_or_else(|| overflow("-")),
        |x, y| Ok(x - y),
    )?;
    ret(m, val)
}

/// (/ x y): floor division for two integers, float division otherwise.
fn prim_div(m: &mut Machine) -> EvalResult<Step> {
    binary_numeric(m, "/", floor_div, |x, y| {
        if y == 0.0 {
            Err(EvalError::Arithmetic("division by zero".into()))
        } else {
            Ok(x / y)
        }
    })
}

fn floor_div(x: i64, y: i64) -> EvalResult<i64> {
    if y == 0 {
        return Err(EvalError::Arithmetic("division by zero".into()));
    }
    let q = x.checked_div(y).ok_or_else(|| overflow("/"))?;
    if x % y != 0 && ((x < 0) != (y < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

/// (< a b): numbers, or two strings lexicographically.
fn prim_lt(m: &mut Machine) -> EvalResult<Step> {
    let [a, b] = args::<2>(m, "<")?;
    let less = match (a, b) {
        (Value::Int(x), Value::Int(y)) => x < y,
        (Value::Str(s), Value::Str(t)) => m.heap.string(s)? < m.heap.string(t)?,
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x < y,
            _ => {
                return Err(EvalError::mistype(format!(
                    "cannot compare {} and {}",
                    m.render(a),
                    m.render(b)
                )))
            }
        },
    };
    ret(m, Value::truth(less))
}

fn prim_nand(m: &mut Machine) -> EvalResult<Step> {
    let [a, b] = args::<2>(m, "nand")?;
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => ret(m, Value::Int(!(x & y))),
        _ => Err(EvalError::mistype(format!(
            "expected integers, got {} and {}",
            m.render(a),
            m.render(b)
        ))),
    }
}

// ============================================================================
// Control
// ============================================================================

/// (apply f args): call `f` with an explicit argument list.
fn prim_apply(m: &mut Machine) -> EvalResult<Step> {
    let [proc, list] = args::<2>(m, "apply")?;
    if !proc.is_procedure() {
        return Err(EvalError::malformed(format!(
            "expected procedure, got {}",
            m.render(proc)
        )));
    }
    if !list.is_list_like() {
        return Err(EvalError::mistype(format!(
            "apply: expected list, got {}",
            m.render(list)
        )));
    }
    m.ctx.argl = list;
    Ok(Step::Apply(proc))
}

/// (eval x [n]): evaluate `x` (parsing it first if it is a string) in the
/// environment `n` parent links above the caller's.
fn prim_eval(m: &mut Machine) -> EvalResult<Step> {
    let vals = m.heap.list_to_vec(m.ctx.argl).unwrap_or_default();
    let (x, up) = match vals.as_slice() {
        &[x] => (x, 0),
        &[x, Value::Int(n)] if n >= 0 => (x, n as usize),
        &[_, n] => {
            return Err(EvalError::mistype(format!(
                "eval: expected a frame count, got {}",
                m.render(n)
            )))
        }
        _ => return Err(EvalError::malformed("eval expects one or two arguments")),
    };
    let exp = match x {
        Value::Str(id) => {
            let src = m.heap.string(id)?.to_string();
            reader::read_all(&src, &mut m.heap, &mut m.symbols)?
                .pop()
                .unwrap_or(Value::Nil)
        }
        other => other,
    };
    m.ctx.env = env_ancestor(&m.heap, m.ctx.env, up)?;
    m.ctx.exp = exp;
    Ok(Step::Eval)
}

fn prim_error(m: &mut Machine) -> EvalResult<Step> {
    let [x] = args::<1>(m, "error")?;
    Err(EvalError::User(m.display(x)))
}

/// (exit n) ends the run with status `n`; any other operand is reported
/// and ends it with status 1. A status that does not fit the platform's
/// exit code is a type mismatch.
fn prim_exit(m: &mut Machine) -> EvalResult<Step> {
    let [x] = args::<1>(m, "exit")?;
    match x {
        Value::Int(n) => {
            let status = i32::try_from(n).map_err(|_| {
                EvalError::mistype(format!("exit status {} is out of range", n))
            })?;
            Err(EvalError::Exit {
                status,
                message: None,
            })
        }
        other => Err(EvalError::Exit {
            status: 1,
            message: Some(m.display(other)),
        }),
    }
}

// ============================================================================
// Misc
// ============================================================================

/// (print x ...): displayed, space separated, newline terminated.
fn prim_print(m: &mut Machine) -> EvalResult<Step> {
    let vals = m
        .heap
        .list_to_vec(m.ctx.argl)
        .ok_or_else(|| EvalError::malformed("print: improper argument list"))?;
    let line = vals
        .iter()
        .map(|&v| m.display(v))
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(m.out, "{}", line).map_err(|e| EvalError::Internal(format!("print: {}", e)))?;
    ret(m, Value::Nil)
}

fn prim_stringify(m: &mut Machine) -> EvalResult<Step> {
    let [x] = args::<1>(m, "obj>string")?;
    let text = m.render(x);
    let s = m.heap.alloc_string(text);
    ret(m, s)
}

/// (range start stop step): integers from `start` towards `stop`, exclusive.
fn prim_range(m: &mut Machine) -> EvalResult<Step> {
    let [start, stop, step] = args::<3>(m, "range")?;
    let (start, stop, step) = match (start, stop, step) {
        (Value::Int(a), Value::Int(b), Value::Int(c)) => (a, b, c),
        _ => return Err(EvalError::mistype("range expects three integers")),
    };
    if step == 0 {
        return Err(EvalError::mistype("range step must not be zero"));
    }

    let mut head = Value::Nil;
    let mut tail: Option<PairId> = None;
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        let cell = m.heap.alloc(Value::Int(i), Value::Nil)?;
        match tail {
            Some(t) => m.heap.set_cdr(t, Value::Pair(cell)),
            None => head = Value::Pair(cell),
        }
        tail = Some(cell);
        i = match i.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    ret(m, head)
}

fn prim_type(m: &mut Machine) -> EvalResult<Step> {
    let [x] = args::<1>(m, "type")?;
    let name = match x {
        Value::Nil => sym::EMPTY,
        Value::True => sym::TRUE,
        Value::Pair(_) => sym::PAIR,
        Value::Symbol(_) => sym::SYMBOL,
        Value::Int(_) => sym::INTEGER,
        Value::Float(_) => sym::FLOAT,
        Value::Str(_) => sym::STRING,
        Value::Closure(_) => sym::LAMBDA,
        Value::Cont(_) => sym::CONTINUATION,
        Value::Prim(_) => sym::PRIMITIVE,
        Value::Opaque(_) => sym::OPAQUE,
    };
    ret(m, Value::Symbol(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::printer::SharedBuffer;
    use pretty_assertions::assert_eq;

    fn machine() -> Machine {
        Machine::new(Config::default()).unwrap()
    }

    fn run(src: &str) -> String {
        machine().eval_to_string(src).unwrap()
    }

    fn fails(src: &str) -> EvalError {
        machine().eval_str(src).unwrap_err()
    }

    #[test]
    fn pair_operations() {
        assert_eq!(run("(cons 1 2)"), "(1 . 2)");
        assert_eq!(run("(car '(1 2))"), "1");
        assert_eq!(run("(cdr '(1 2))"), "(2)");
        assert_eq!(run("(car ())"), "()");
        assert_eq!(run("(define p (list 1 2)) (set-car! p 9) (set-cdr! (cdr p) '(3)) p"), "(9 2 3)");
        assert!(matches!(fails("(car 5)"), EvalError::Type(_)));
        assert!(matches!(fails("(set-car! () 1)"), EvalError::Type(_)));
        assert!(matches!(fails("(cons 1)"), EvalError::Malformed(_)));
    }

    #[test]
    fn predicates() {
        assert_eq!(run("(list (null? ()) (null? '(1)) (atom? 1) (atom? '(1)))"), "(#t () #t ())");
        assert_eq!(run("(list (eq? 'a 'a) (eq? '(1) '(1)) (equal? '(1 (2)) '(1 (2))))"), "(#t () #t)");
        assert_eq!(run("(define s \"x\") (list (eq? s s) (equal? \"ab\" \"ab\"))"), "(#t #t)");
    }

    #[test]
    fn equal_terminates_on_cycles() {
        let src = "(define a (list 1 2)) (set-cdr! (cdr a) a)
                   (define b (list 1 2)) (set-cdr! (cdr b) b)
                   (define c (list 1 3)) (set-cdr! (cdr c) c)
                   (list (equal? a b) (equal? a c))";
        assert_eq!(run(src), "(#t ())");
    }

    #[test]
    fn arithmetic() {
        assert_eq!(run("(/ 7 2)"), "3");
        assert_eq!(run("(/ 7.0 2)"), "3.5");
        assert_eq!(run("(/ -7 2)"), "-4");
        assert_eq!(run("(- 5)"), "-5");
        assert_eq!(run("(- 2.5)"), "-2.5");
        assert_eq!(run("(- 10 4)"), "6");
        assert_eq!(run("(+ 1 2.5)"), "3.5");
        assert_eq!(run("(* 6 7)"), "42");
        assert_eq!(run("(list (< 1 2) (< 2 1.5) (< \"a\" \"b\"))"), "(#t () #t)");
        assert!(matches!(fails("(/ 1 0)"), EvalError::Arithmetic(_)));
        assert!(matches!(fails("(* 9223372036854775807 2)"), EvalError::Arithmetic(_)));
        assert!(matches!(fails("(+ 1 'a)"), EvalError::Type(_)));
        assert!(matches!(fails("(- 1 2 3)"), EvalError::Malformed(_)));
    }

    #[test]
    fn nand_requires_integers() {
        assert_eq!(run("(nand 12 10)"), "-9");
        assert_eq!(
            fails("(nand 1 'x)"),
            EvalError::Type("expected integers, got 1 and x".into())
        );
    }

    #[test]
    fn apply_and_eval() {
        assert_eq!(run("(apply + '(1 2))"), "3");
        assert_eq!(run("(apply (lambda args args) ())"), "()");
        assert!(matches!(fails("(apply 5 '(1))"), EvalError::Malformed(_)));
        assert_eq!(run("(eval '(+ 1 2))"), "3");
        assert_eq!(run("(eval \"(+ 1 2) (* 2 5)\")"), "10");
        assert_eq!(run("(eval \"\")"), "()");
        assert_eq!(run("(define x 'global) (define (f x) (eval 'x 1)) (f 'local)"), "global");
        assert_eq!(
            fails("(eval 'x 5)"),
            EvalError::Unbound("no frame available".into())
        );
    }

    #[test]
    fn range_and_type() {
        assert_eq!(run("(range 0 5 1)"), "(0 1 2 3 4)");
        assert_eq!(run("(range 5 0 -2)"), "(5 3 1)");
        assert_eq!(run("(range 0 0 1)"), "()");
        assert!(matches!(fails("(range 0 5 0)"), EvalError::Type(_)));
        assert_eq!(
            run("(map type (list () #t '(1) 'a 1 1.5 \"s\" car (lambda (x) x) (call/cc)))"),
            "(() #t pair symbol integer float string primitive lambda continuation)"
        );
        assert_eq!(run("(type (ffi time instant))"), "opaque");
    }

    #[test]
    fn stringify_and_error() {
        assert_eq!(run("(obj>string '(1 \"a\"))"), "\"(1 \\\"a\\\")\"");
        assert_eq!(fails("(error 'oops)"), EvalError::User("oops".into()));
    }

    #[test]
    fn exit_carries_status() {
        assert_eq!(
            fails("(exit 4)"),
            EvalError::Exit {
                status: 4,
                message: None
            }
        );
        assert_eq!(
            fails("(exit \"bye\")"),
            EvalError::Exit {
                status: 1,
                message: Some("bye".into())
            }
        );
        assert_eq!(
            fails("(exit 4294967296)"),
            EvalError::Type("exit status 4294967296 is out of range".into())
        );
        assert_eq!(
            run("(trap (exit -4294967297))"),
            "(() . \"type-mismatch: exit status -4294967297 is out of range\")"
        );
    }

    #[test]
    fn print_writes_displayed_values() {
        let buf = SharedBuffer::default();
        let mut m = Machine::with_output(Config::default(), Box::new(buf.clone())).unwrap();
        m.eval_str("(print \"a\" 1 '(b \"c\")) (print)").unwrap();
        assert_eq!(buf.contents(), "a 1 (b c)\n\n");
    }
}
