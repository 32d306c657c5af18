//! Quasiquote template expansion as a step machine.
//!
//! Expanding a list pushes a sentinel, then for each element saves the
//! remaining template plus the current environment and continuation before
//! expanding that element. Each finished element is pushed on top; when the
//! template runs out, everything above the sentinel is popped into a fresh
//! list. Nested templates each get their own sentinel.

use crate::context::{Slot, Step};
use crate::error::{EvalError, EvalResult};
use crate::eval::Machine;
use crate::forms::single;
use crate::symbol::sym;
use crate::value::Value;

pub(crate) fn op_quasiquote(m: &mut Machine) -> EvalResult<Step> {
    m.ctx.exp = single(m, m.ctx.argl)?;
    Ok(Step::Quasi)
}

/// Expand the template in `exp`, delivering the result to `cont`.
pub(crate) fn expand(m: &mut Machine) -> EvalResult<Step> {
    let form = m.ctx.exp;
    let (head, operands) = match m.heap.uncons(form) {
        Some(split) => split,
        None => {
            m.ctx.val = form;
            return Ok(m.ctx.cont);
        }
    };

    match head {
        Value::Symbol(sym::QUASIQUOTE) => {
            m.ctx.push_ce();
            m.ctx.exp = single(m, operands)?;
            m.ctx.cont = Step::QuasiRewrap;
            Ok(Step::Quasi)
        }
        Value::Symbol(sym::UNQUOTE) => {
            m.ctx.exp = single(m, operands)?;
            Ok(Step::Eval)
        }
        Value::Symbol(sym::UNQUOTE_SPLICING) => {
            single(m, operands)?;
            Err(EvalError::malformed("cannot use unquote-splicing here"))
        }
        _ => {
            m.ctx.push_ce();
            m.ctx.push(Slot::Sentinel);
            setup(m, form)
        }
    }
}

/// A nested template has been expanded; keep its marker.
pub(crate) fn rewrap(m: &mut Machine) -> EvalResult<Step> {
    m.ctx.pop_ce()?;
    let inner = m.heap.cons(m.ctx.val, Value::Nil)?;
    m.ctx.val = m.heap.cons(Value::Symbol(sym::QUASIQUOTE), inner)?;
    Ok(m.ctx.cont)
}

/// Start on the first element of the (non-empty) template `form`.
fn setup(m: &mut Machine, form: Value) -> EvalResult<Step> {
    let (elt, rest) = m
        .heap
        .uncons(form)
        .ok_or_else(|| EvalError::Internal("quasiquote setup on a non-pair".into()))?;
    if !rest.is_list_like() {
        return Err(EvalError::mistype(format!(
            "expected list, got {}",
            m.render(rest)
        )));
    }
    m.ctx.push_value(rest);
    m.ctx.push_ce();

    if let Some((Value::Symbol(sym::UNQUOTE_SPLICING), operands)) = m.heap.uncons(elt) {
        m.ctx.exp = single(m, operands)?;
        m.ctx.cont = Step::QuasiSpliced;
        return Ok(Step::Eval);
    }
    m.ctx.exp = elt;
    m.ctx.cont = Step::QuasiNext;
    Ok(Step::Quasi)
}

/// One element is expanded. Stack: [.. sentinel outputs rest cont env].
pub(crate) fn next(m: &mut Machine) -> EvalResult<Step> {
    m.ctx.pop_ce()?;
    let rest = m.ctx.pop_value()?;
    m.ctx.push_value(m.ctx.val);
    continue_with(m, rest)
}

/// A spliced operand is evaluated; push each of its items.
pub(crate) fn spliced(m: &mut Machine) -> EvalResult<Step> {
    m.ctx.pop_ce()?;
    let rest = m.ctx.pop_value()?;
    let items = m.heap.list_to_vec(m.ctx.val).ok_or_else(|| {
        EvalError::mistype(format!("expected list, got {}", m.render(m.ctx.val)))
    })?;
    for item in items {
        m.ctx.push_value(item);
    }
    continue_with(m, rest)
}

fn continue_with(m: &mut Machine, rest: Value) -> EvalResult<Step> {
    if rest.is_nil() {
        Ok(Step::QuasiFinish)
    } else {
        setup(m, rest)
    }
}

/// Pop outputs down to the sentinel into a list, in order.
pub(crate) fn finish(m: &mut Machine) -> EvalResult<Step> {
    let mut list = Value::Nil;
    loop {
        match m.ctx.pop()? {
            Slot::Value(v) => list = m.heap.cons(v, list)?,
            Slot::Sentinel => break,
            other => {
                return Err(EvalError::Internal(format!(
                    "quasiquote accumulator: unexpected {:?}",
                    other
                )))
            }
        }
    }
    m.ctx.pop_ce()?;
    m.ctx.val = list;
    Ok(m.ctx.cont)
}
