use expect_test::{expect, Expect};
use lysp::{Config, EvalError, Machine, SharedBuffer};

/// Run a program; render printed output followed by the final value (or
/// the error that ended the run).
fn check(src: &str, expect: Expect) {
    let out = SharedBuffer::default();
    let mut m = Machine::with_output(Config::default().with_seed(11), Box::new(out.clone())).unwrap();
    let result = match m.eval_str(src) {
        Ok(val) => m.render(val),
        Err(err) => format!("error: {}", err),
    };
    expect.assert_eq(&format!("{}=> {}", out.contents(), result));
}

#[test]
fn quasiquote_interpolation() {
    check(
        "(quasiquote (1 (unquote (+ 1 1)) (unquote-splicing (list 3 4)) 5))",
        expect!["=> (1 2 3 4 5)"],
    );
}

#[test]
fn quasiquote_top_level_splice() {
    check(
        "(quasiquote (unquote-splicing (list 1 2)))",
        expect!["=> error: malformed-form: cannot use unquote-splicing here"],
    );
}

#[test]
fn quasiquote_builds_code() {
    check(
        "(define (make-adder n) (eval `(lambda (x) (+ x ,n))))
         ((make-adder 5) 10)",
        expect!["=> 15"],
    );
}

#[test]
fn trap_shapes() {
    check("(trap 42)", expect!["=> (#t . 42)"]);
    check("(trap (error \"boom\"))", expect![[r#"=> (() . "user-error: boom")"#]]);
    check(
        "(trap (set! nowhere 1))",
        expect![[r#"=> (() . "unbound-variable: nowhere")"#]],
    );
    check(
        "(trap (if))",
        expect![[r#"=> (() . "malformed-form: if expects 2 or 3 operands")"#]],
    );
    check(
        "(trap (eval \"(1 2\"))",
        expect![[r#"=> (() . "read-error: unterminated list")"#]],
    );
}

#[test]
fn set_and_define() {
    check("(set! zz 1)", expect!["=> error: unbound-variable: zz"]);
    check("(define zz 1) (set! zz 2) zz", expect!["=> 2"]);
}

#[test]
fn division_and_negation() {
    check("(list (/ 7 2) (/ 7.0 2) (- 5))", expect!["=> (3 3.5 -5)"]);
}

#[test]
fn print_output() {
    check(
        "(for-each (lambda (x) (print \"item\" x)) '(1 2.0 \"three\"))",
        expect![[r#"
            item 1
            item 2.0
            item three
            => ()"#]],
    );
}

#[test]
fn let_binds_in_caller_scope() {
    check(
        "(define (f y) (let ((a 1) (b (+ y 1))) (list a b y)))
         (f 10)",
        expect!["=> (1 11 10)"],
    );
}

#[test]
fn prelude_list_library() {
    check(
        "(list (length '(a b c))
               (reverse '(1 2 3))
               (append '(1 2) '(3))
               (map (lambda (x) (* x x)) '(1 2 3))
               (filter (lambda (x) (< 1 x)) '(1 2 3))
               (foldl + 0 '(1 2 3 4))
               (abs -4)
               (list (= 2 2) (> 1 2) (<= 2 2) (>= 1 2) (not ())))",
        expect!["=> (3 (3 2 1) (1 2 3) (1 4 9) (2 3) 10 4 (#t () #t () #t))"],
    );
}

#[test]
fn eval_in_ancestor_frame() {
    check(
        "(define x 'outer)
         (define (g) (define x 'inner) (list (eval 'x) (eval 'x 1)))
         (g)",
        expect!["=> (inner outer)"],
    );
    check("(eval 'x 3)", expect!["=> error: unbound-variable: no frame available"]);
}

#[test]
fn nand_type_mismatch() {
    check(
        "(nand 1.5 2)",
        expect!["=> error: type-mismatch: expected integers, got 1.5 and 2"],
    );
}

#[test]
fn ffi_groups() {
    check("(ffi math hypot 3 4)", expect!["=> 5.0"]);
    check(
        "(ffi math nope 1)",
        expect!["=> error: name-lookup: function nope does not exist in math"],
    );
    check(
        "(ffi gpu launch)",
        expect!["=> error: name-lookup: no ffi group gpu"],
    );
    check(
        "(define xs (range 0 10 1)) (ffi random shuffle xs) (foldl + 0 xs)",
        expect!["=> 45"],
    );
    check(
        "(ffi time timegm (ffi time gmtime 1000000000))",
        expect!["=> 1000000000"],
    );
}

#[test]
fn foreign_failures_are_trappable() {
    check(
        "(trap (ffi time sleep 1e300))",
        expect![[r#"=> (() . "arithmetic-error: sleep length is out of range")"#]],
    );
    check(
        "(trap (ffi math sqrt -1))",
        expect![[r#"=> (() . "arithmetic-error: math domain error")"#]],
    );
}

#[test]
fn special_over_builtins() {
    check(
        "(special raw-car car) (list (raw-car (1 2)) (car '(3 4)) raw-car)",
        expect!["=> (1 3 <special>)"],
    );
}

#[test]
fn exit_ends_the_run() {
    let mut m = Machine::new(Config::default()).unwrap();
    assert_eq!(
        m.eval_str("(trap (exit 7)) 'unreached"),
        Err(EvalError::Exit {
            status: 7,
            message: None
        })
    );
}
