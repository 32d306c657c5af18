use lysp::{Config, Machine};
use pretty_assertions::assert_eq;

fn machine() -> Machine {
    Machine::new(Config::default()).unwrap()
}

/// Deepest auxiliary stack seen while evaluating `call`.
fn high_water(m: &mut Machine, call: &str) -> usize {
    m.eval_str(call).unwrap();
    m.ctx.high_water()
}

#[test]
fn if_recursion_runs_in_constant_stack() {
    let mut m = machine();
    m.eval_str("(define (down n) (if (< n 1) 'done (down (- n 1))))")
        .unwrap();
    let shallow = high_water(&mut m, "(down 10)");
    let deep = high_water(&mut m, "(down 20000)");
    assert_eq!(deep, shallow);
}

#[test]
fn cond_and_begin_recursion_run_in_constant_stack() {
    let mut m = machine();
    m.eval_str(
        "(define (down n)
           (cond ((< n 1) 'done)
                 (#t (begin 'ignored (down (- n 1))))))",
    )
    .unwrap();
    let shallow = high_water(&mut m, "(down 10)");
    let deep = high_water(&mut m, "(down 20000)");
    assert_eq!(deep, shallow);
}

#[test]
fn mutual_recursion_runs_in_constant_stack() {
    let mut m = machine();
    m.eval_str(
        "(define (even? n) (if (< n 1) #t (odd? (- n 1))))
         (define (odd? n) (if (< n 1) () (even? (- n 1))))",
    )
    .unwrap();
    let shallow = high_water(&mut m, "(even? 10)");
    let deep = high_water(&mut m, "(even? 20001)");
    assert_eq!(deep, shallow);
    assert_eq!(m.eval_to_string("(list (even? 10) (even? 7))").unwrap(), "(#t ())");
}

#[test]
fn special_closure_bodies_are_tail_calls() {
    let mut m = machine();
    m.eval_str(
        "(define (down n) (let ((m (- n 1))) (if (< m 0) 'done (down m))))",
    )
    .unwrap();
    let shallow = high_water(&mut m, "(down 10)");
    let deep = high_water(&mut m, "(down 5000)");
    assert_eq!(deep, shallow);
}

#[test]
fn million_iterations_in_bounded_memory() {
    let mut m = machine();
    let src = "(define (count n acc)
                 (cond ((< n 1) acc)
                       (#t (count (- n 1) (+ acc 1)))))
               (count 1000000 0)";
    assert_eq!(m.eval_to_string(src).unwrap(), "1000000");
    assert!(m.ctx.high_water() < 64);
    assert!(m.heap.live_frames() < 200_000);
}

#[test]
fn million_deep_if_and_begin_chain() {
    let mut m = machine();
    m.eval_str("(define (down n) (if (< n 1) 'done (begin 'tick (down (- n 1)))))")
        .unwrap();
    let shallow = high_water(&mut m, "(down 10)");
    assert_eq!(m.eval_to_string("(down 1000000)").unwrap(), "done");
    assert_eq!(m.ctx.high_water(), shallow);
}

#[test]
fn deep_non_tail_recursion_uses_the_auxiliary_stack() {
    let mut m = machine();
    let src = "(define (sum n) (if (< n 1) 0 (+ n (sum (- n 1)))))
               (sum 100000)";
    assert_eq!(m.eval_to_string(src).unwrap(), "5000050000");
    assert!(m.ctx.high_water() > 100_000);
}
