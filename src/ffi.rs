//! Foreign function groups reached through `(ffi group function arg ...)`.
//!
//! Each group maps a function name to host library code. Arguments arrive
//! evaluated; the only coercions are numbers to `f64` and lists to fixed
//! size tuples where a function requires one.

use std::cell::RefCell;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::context::GroupId;
use crate::error::{EvalError, EvalResult};
use crate::eval::Machine;
use crate::heap::{Foreign, Heap};
use crate::value::{SymbolId, Value};

/// A named table of host functions.
pub trait ForeignGroup {
    fn name(&self) -> &'static str;

    /// Call `func`. Unknown names fail with [`EvalError::NameLookup`].
    fn call(&self, func: &str, args: &[Value], heap: &mut Heap) -> EvalResult<Value>;
}

pub fn default_groups(seed: Option<u64>) -> Vec<Box<dyn ForeignGroup>> {
    vec![
        Box::new(MathGroup),
        Box::new(RandomGroup::new(seed)),
        Box::new(TimeGroup::new()),
    ]
}

/// Deliver an evaluated argument list to a foreign function.
pub(crate) fn call(m: &mut Machine, group: GroupId, func: SymbolId, argl: Value) -> EvalResult<Value> {
    let args = m
        .heap
        .list_to_vec(argl)
        .ok_or_else(|| EvalError::malformed("ffi: improper argument list"))?;
    let group = m.registry.group(group)?;
    let name = m.symbols.name(func);
    trace!(group = group.name(), func = name, nargs = args.len(), "ffi");
    group.call(name, &args, &mut m.heap)
}

fn unknown(group: &str, func: &str) -> EvalError {
    EvalError::NameLookup(format!("function {} does not exist in {}", func, group))
}

fn arity(func: &str, expected: usize, args: &[Value]) -> EvalResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(EvalError::mistype(format!(
            "{} takes {} argument(s), got {}",
            func,
            expected,
            args.len()
        )))
    }
}

fn float_arg(func: &str, val: Value) -> EvalResult<f64> {
    val.as_f64()
        .ok_or_else(|| EvalError::mistype(format!("{}: expected a number", func)))
}

fn int_arg(func: &str, val: Value) -> EvalResult<i64> {
    val.as_int()
        .ok_or_else(|| EvalError::mistype(format!("{}: expected an integer", func)))
}

// ============================================================================
// math
// ============================================================================

struct MathGroup;

impl MathGroup {
    fn unary(func: &str) -> Option<fn(f64) -> f64> {
        Some(match func {
            "sqrt" => f64::sqrt,
            "sin" => f64::sin,
            "cos" => f64::cos,
            "tan" => f64::tan,
            "asin" => f64::asin,
            "acos" => f64::acos,
            "atan" => f64::atan,
            "exp" => f64::exp,
            "log10" => f64::log10,
            "fabs" => f64::abs,
            _ => return None,
        })
    }

    fn binary(func: &str) -> Option<fn(f64, f64) -> f64> {
        Some(match func {
            "atan2" => f64::atan2,
            "pow" => f64::powf,
            "hypot" => f64::hypot,
            _ => return None,
        })
    }
}

/// NaN out of non-NaN input means the argument was outside the domain.
fn checked(inputs: &[f64], out: f64) -> EvalResult<Value> {
    if out.is_nan() && !inputs.iter().any(|x| x.is_nan()) {
        return Err(EvalError::Arithmetic("math domain error".into()));
    }
    Ok(Value::Float(out))
}

impl ForeignGroup for MathGroup {
    fn name(&self) -> &'static str {
        "math"
    }

    fn call(&self, func: &str, args: &[Value], _heap: &mut Heap) -> EvalResult<Value> {
        if let Some(f) = MathGroup::unary(func) {
            arity(func, 1, args)?;
            let x = float_arg(func, args[0])?;
            if func == "log10" && x <= 0.0 {
                return Err(EvalError::Arithmetic("math domain error".into()));
            }
            return checked(&[x], f(x));
        }
        if let Some(f) = MathGroup::binary(func) {
            arity(func, 2, args)?;
            let x = float_arg(func, args[0])?;
            let y = float_arg(func, args[1])?;
            return checked(&[x, y], f(x, y));
        }
        match func {
            // log(x) or log(x, base)
            "log" => {
                let (x, base) = match args {
                    [x] => (float_arg(func, *x)?, None),
                    [x, b] => (float_arg(func, *x)?, Some(float_arg(func, *b)?)),
                    _ => return Err(EvalError::mistype("log takes 1 or 2 arguments")),
                };
                if x <= 0.0 || base.map_or(false, |b| b <= 0.0 || b == 1.0) {
                    return Err(EvalError::Arithmetic("math domain error".into()));
                }
                Ok(Value::Float(match base {
                    Some(b) => x.ln() / b.ln(),
                    None => x.ln(),
                }))
            }
            "floor" | "ceil" | "trunc" => {
                arity(func, 1, args)?;
                if let Value::Int(n) = args[0] {
                    return Ok(Value::Int(n));
                }
                let x = float_arg(func, args[0])?;
                let r = match func {
                    "floor" => x.floor(),
                    "ceil" => x.ceil(),
                    _ => x.trunc(),
                };
                if !r.is_finite() || r < i64::MIN as f64 || r >= i64::MAX as f64 {
                    return Err(EvalError::Arithmetic(format!(
                        "cannot convert {} to integer",
                        r
                    )));
                }
                Ok(Value::Int(r as i64))
            }
            _ => Err(unknown(self.name(), func)),
        }
    }
}

// ============================================================================
// random
// ============================================================================

struct RandomGroup {
    rng: RefCell<StdRng>,
}

impl RandomGroup {
    fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        RandomGroup {
            rng: RefCell::new(rng),
        }
    }
}

impl ForeignGroup for RandomGroup {
    fn name(&self) -> &'static str {
        "random"
    }

    fn call(&self, func: &str, args: &[Value], heap: &mut Heap) -> EvalResult<Value> {
        let mut rng = self.rng.borrow_mut();
        match func {
            "random" => {
                arity(func, 0, args)?;
                Ok(Value::Float(rng.gen::<f64>()))
            }
            "randint" => {
                arity(func, 2, args)?;
                let lo = int_arg(func, args[0])?;
                let hi = int_arg(func, args[1])?;
                if lo > hi {
                    return Err(EvalError::mistype(format!(
                        "empty range for randint ({}, {})",
                        lo, hi
                    )));
                }
                Ok(Value::Int(rng.gen_range(lo..=hi)))
            }
            "uniform" => {
                arity(func, 2, args)?;
                let a = float_arg(func, args[0])?;
                let b = float_arg(func, args[1])?;
                Ok(Value::Float(a + (b - a) * rng.gen::<f64>()))
            }
            "choice" => {
                arity(func, 1, args)?;
                let items = heap
                    .list_to_vec(args[0])
                    .ok_or_else(|| EvalError::mistype("choice: expected a list"))?;
                items
                    .choose(&mut *rng)
                    .copied()
                    .ok_or_else(|| EvalError::mistype("cannot choose from an empty list"))
            }
            "seed" => {
                arity(func, 1, args)?;
                let seed = int_arg(func, args[0])?;
                *rng = StdRng::seed_from_u64(seed as u64);
                Ok(Value::Nil)
            }
            // permutes the cars of the list cells in place
            "shuffle" => {
                arity(func, 1, args)?;
                let list = args[0];
                let mut items = heap
                    .list_to_vec(list)
                    .ok_or_else(|| EvalError::mistype("shuffle: expected a list"))?;
                items.shuffle(&mut *rng);
                let mut current = list;
                for item in items {
                    if let Some(id) = current.as_pair() {
                        heap.set_car(id, item);
                        current = heap.cdr(id);
                    }
                }
                Ok(list)
            }
            _ => Err(unknown(self.name(), func)),
        }
    }
}

// ============================================================================
// time
// ============================================================================

struct TimeGroup {
    started: Instant,
}

impl TimeGroup {
    fn new() -> Self {
        TimeGroup {
            started: Instant::now(),
        }
    }
}

/// UTC broken-down time as nine integers: year, month, day, hour, minute,
/// second, weekday (Monday = 0), day of year, dst flag.
fn broken_down(t: DateTime<Utc>, heap: &mut Heap) -> EvalResult<Value> {
    let fields = [
        t.year() as i64,
        t.month() as i64,
        t.day() as i64,
        t.hour() as i64,
        t.minute() as i64,
        t.second() as i64,
        t.weekday().num_days_from_monday() as i64,
        t.ordinal() as i64,
        0,
    ];
    let vals: Vec<Value> = fields.iter().map(|&n| Value::Int(n)).collect();
    heap.list(&vals)
}

impl ForeignGroup for TimeGroup {
    fn name(&self) -> &'static str {
        "time"
    }

    fn call(&self, func: &str, args: &[Value], heap: &mut Heap) -> EvalResult<Value> {
        match func {
            "time" => {
                arity(func, 0, args)?;
                let now = Utc::now();
                Ok(Value::Float(
                    now.timestamp() as f64 + now.timestamp_subsec_nanos() as f64 * 1e-9,
                ))
            }
            "monotonic" => {
                arity(func, 0, args)?;
                Ok(Value::Float(self.started.elapsed().as_secs_f64()))
            }
            "sleep" => {
                arity(func, 1, args)?;
                let secs = float_arg(func, args[0])?;
                if secs < 0.0 {
                    return Err(EvalError::Arithmetic(
                        "sleep length must be non-negative".into(),
                    ));
                }
                let length = Duration::try_from_secs_f64(secs)
                    .map_err(|_| EvalError::Arithmetic("sleep length is out of range".into()))?;
                thread::sleep(length);
                Ok(Value::Nil)
            }
            "instant" => {
                arity(func, 0, args)?;
                Ok(heap.alloc_opaque(Foreign::Instant(Instant::now())))
            }
            "elapsed" => {
                arity(func, 1, args)?;
                match args[0] {
                    Value::Opaque(id) => match heap.opaque(id)? {
                        Foreign::Instant(start) => Ok(Value::Float(start.elapsed().as_secs_f64())),
                    },
                    _ => Err(EvalError::mistype("elapsed: expected an instant")),
                }
            }
            "gmtime" => {
                let t = match args {
                    [] => Utc::now(),
                    [secs] => {
                        let secs = float_arg(func, *secs)?.floor() as i64;
                        DateTime::<Utc>::from_timestamp(secs, 0).ok_or_else(|| {
                            EvalError::Arithmetic("timestamp out of range".into())
                        })?
                    }
                    _ => return Err(EvalError::mistype("gmtime takes 0 or 1 arguments")),
                };
                broken_down(t, heap)
            }
            "timegm" => {
                arity(func, 1, args)?;
                let fields = heap
                    .list_to_vec(args[0])
                    .ok_or_else(|| EvalError::mistype("timegm: expected a list"))?;
                let fields = <[Value; 9]>::try_from(fields).map_err(|f| {
                    EvalError::mistype(format!(
                        "timegm: expected a 9-element list, got {} elements",
                        f.len()
                    ))
                })?;
                let mut nums = [0i64; 6];
                for (n, v) in nums.iter_mut().zip(fields.iter()) {
                    *n = int_arg(func, *v)?;
                }
                let [year, month, day, hour, minute, second] = nums;
                let stamp = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .and_then(|d| d.and_hms_opt(hour as u32, minute as u32, second as u32))
                    .ok_or_else(|| EvalError::Arithmetic("timegm: invalid date".into()))?
                    .and_utc()
                    .timestamp();
                Ok(Value::Int(stamp))
            }
            _ => Err(unknown(self.name(), func)),
        }
    }
}
