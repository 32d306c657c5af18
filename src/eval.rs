use std::io::{self, Write};

use tracing::trace;

use crate::config::Config;
use crate::context::{Callee, Context, Slot, Step};
use crate::continuation;
use crate::env::{env_define, env_lookup};
use crate::error::{EvalError, EvalResult};
use crate::ffi;
use crate::forms;
use crate::globals::{PrimKind, Registry};
use crate::heap::{self, Heap};
use crate::printer::Printer;
use crate::quasi;
use crate::reader;
use crate::symbol::{sym, SymbolTable};
use crate::trap;
use crate::value::{ClosureId, EnvId, SymbolId, Value};

const PRELUDE: &str = include_str!("prelude.lisp");

/// The evaluation machine.
/// All interpreter state lives here so the collector can find roots.
pub struct Machine {
    pub heap: Heap,
    pub symbols: SymbolTable,
    pub registry: Registry,
    pub ctx: Context,
    /// The outermost frame; forms, primitives and the prelude live here.
    pub global: EnvId,
    pub config: Config,
    /// Where `print` writes.
    pub out: Box<dyn Write>,
    /// Steps taken by the current top-level evaluation.
    steps: u64,
}

impl Machine {
    pub fn new(config: Config) -> EvalResult<Self> {
        Self::with_output(config, Box::new(io::stdout()))
    }

    pub fn with_output(config: Config, out: Box<dyn Write>) -> EvalResult<Self> {
        let mut heap = Heap::new(config.heap_cells, config.gc_threshold);
        let mut symbols = SymbolTable::new();
        let registry = Registry::build(&mut symbols, config.seed);
        let global = heap.alloc_frame(None);
        registry.install(&mut heap, &mut symbols, global)?;

        let mut m = Machine {
            heap,
            symbols,
            registry,
            ctx: Context::new(global),
            global,
            config,
            out,
            steps: 0,
        };
        m.eval_str(PRELUDE)?;
        Ok(m)
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Read and evaluate every top-level form of `src` in the global
    /// environment, one at a time. Returns the last value.
    pub fn eval_str(&mut self, src: &str) -> EvalResult<Value> {
        let mut result = Value::Nil;
        let mut pos = 0;
        while let Some((form, next)) =
            reader::read_one_at(src, pos, &mut self.heap, &mut self.symbols)?
        {
            pos = next;
            result = self.execute(form, self.global)?;
        }
        Ok(result)
    }

    /// Evaluate `src` and render the last value in written form.
    pub fn eval_to_string(&mut self, src: &str) -> EvalResult<String> {
        let val = self.eval_str(src)?;
        Ok(self.render(val))
    }

    /// Parse a single form.
    pub fn read(&mut self, src: &str) -> EvalResult<Value> {
        reader::read_str(src, &mut self.heap, &mut self.symbols)
    }

    /// Run the step loop until `exp` has been fully evaluated in `env`.
    pub fn execute(&mut self, exp: Value, env: EnvId) -> EvalResult<Value> {
        self.ctx.reset(exp, env);
        self.steps = 0;
        let mut step = Step::Eval;

        loop {
            if let Step::Halt = step {
                return Ok(self.ctx.val);
            }

            self.steps += 1;
            if self.steps > self.config.max_steps {
                return Err(EvalError::StepLimit(self.config.max_steps));
            }

            if self.heap.should_gc() {
                self.collect_garbage(step);
            }

            step = match self.step(step) {
                Ok(next) => next,
                Err(err) => trap::recover(self, err)?,
            };
        }
    }

    /// Run one step.
    fn step(&mut self, step: Step) -> EvalResult<Step> {
        match step {
            Step::Halt => Ok(Step::Halt),
            Step::Eval => self.eval_step(),
            Step::Apply(proc) => self.apply(proc),
            Step::EvalOperator => self.eval_operator(),
            Step::EvalOperand => self.eval_operand(),
            Step::BeginNext => forms::begin_next(self),
            Step::IfBranch => forms::if_branch(self),
            Step::CondNext => forms::cond_next(self),
            Step::DefineBind => forms::define_bind(self),
            Step::SetBind => forms::set_bind(self),
            Step::SpecialBind => forms::special_bind(self),
            Step::Quasi => quasi::expand(self),
            Step::QuasiRewrap => quasi::rewrap(self),
            Step::QuasiNext => quasi::next(self),
            Step::QuasiSpliced => quasi::spliced(self),
            Step::QuasiFinish => quasi::finish(self),
            Step::TrapDone => trap::trap_done(self),
        }
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Evaluate `ctx.exp` in `ctx.env`.
    fn eval_step(&mut self) -> EvalResult<Step> {
        match self.ctx.exp {
            Value::Symbol(name) => {
                self.ctx.val = self.lookup(name)?;
                Ok(self.ctx.cont)
            }
            Value::Pair(id) => {
                let op = self.heap.car(id);
                let args = self.heap.cdr(id);
                self.ctx.push_ce();
                self.ctx.push_value(args);
                if let Value::Symbol(name) = op {
                    self.ctx.val = self.lookup(name)?;
                    return self.eval_operator();
                }
                self.ctx.exp = op;
                self.ctx.cont = Step::EvalOperator;
                Ok(Step::Eval)
            }
            other => {
                self.ctx.val = other;
                Ok(self.ctx.cont)
            }
        }
    }

    /// The operator's value is in `val`. Stack: [.. cont env args].
    fn eval_operator(&mut self) -> EvalResult<Step> {
        let proc = self.ctx.val;
        let args = self.ctx.pop_value()?;
        self.ctx.env = self.ctx.peek_env()?;

        if self.is_special(proc)? {
            self.ctx.pop_ce()?;
            self.ctx.argl = args;
            return Ok(Step::Apply(proc));
        }
        self.begin_operands(Callee::Proc(proc), args)
    }

    /// Evaluate `args` left to right in the current environment, then
    /// deliver the argument list to `callee`.
    /// Stack on entry: [.. cont env]; both are restored before delivery.
    pub(crate) fn begin_operands(&mut self, callee: Callee, args: Value) -> EvalResult<Step> {
        self.ctx.push(Slot::Callee(callee));
        self.ctx.push(Slot::Sentinel);
        self.next_operand(args)
    }

    fn next_operand(&mut self, mut args: Value) -> EvalResult<Step> {
        loop {
            match args {
                Value::Nil => return self.finish_operands(),
                Value::Pair(id) => {
                    let arg = self.heap.car(id);
                    let rest = self.heap.cdr(id);
                    match arg {
                        Value::Pair(_) => {
                            self.ctx.push_value(rest);
                            self.ctx.push(Slot::Env(self.ctx.env));
                            self.ctx.exp = arg;
                            self.ctx.cont = Step::EvalOperand;
                            return Ok(Step::Eval);
                        }
                        Value::Symbol(name) => {
                            let val = self.lookup(name)?;
                            self.ctx.push_value(val);
                        }
                        atom => self.ctx.push_value(atom),
                    }
                    args = rest;
                }
                _ => return Err(EvalError::malformed("improper argument list")),
            }
        }
    }

    /// An operand's value is in `val`. Stack: [.. values rest env].
    fn eval_operand(&mut self) -> EvalResult<Step> {
        self.ctx.env = self.ctx.pop_env()?;
        let rest = self.ctx.pop_value()?;
        self.ctx.push_value(self.ctx.val);
        self.next_operand(rest)
    }

    fn finish_operands(&mut self) -> EvalResult<Step> {
        let mut argl = Value::Nil;
        loop {
            match self.ctx.pop()? {
                Slot::Value(v) => argl = self.heap.cons(v, argl)?,
                Slot::Sentinel => break,
                other => {
                    return Err(EvalError::Internal(format!(
                        "operand accumulator: unexpected {:?}",
                        other
                    )))
                }
            }
        }
        let callee = self.ctx.pop_callee()?;
        self.ctx.pop_ce()?;
        self.ctx.argl = argl;
        match callee {
            Callee::Proc(proc) => Ok(Step::Apply(proc)),
            Callee::Foreign { group, func } => {
                self.ctx.val = ffi::call(self, group, func, argl)?;
                Ok(self.ctx.cont)
            }
        }
    }

    // ========================================================================
    // Application
    // ========================================================================

    /// Apply a procedure to `ctx.argl`.
    fn apply(&mut self, proc: Value) -> EvalResult<Step> {
        match proc {
            Value::Prim(id) => {
                let prim = self.registry.prim(id)?;
                let func = prim.func;
                trace!(primitive = prim.name, depth = self.ctx.depth(), "apply");
                func(self)
            }
            Value::Closure(id) => self.apply_closure(id),
            Value::Cont(id) => continuation::resume(self, id),
            other => Err(EvalError::malformed(format!(
                "expected procedure, got {}",
                self.render(other)
            ))),
        }
    }

    /// Bind the parameters in a fresh frame and evaluate the body in tail
    /// position: `cont` is left untouched.
    fn apply_closure(&mut self, id: ClosureId) -> EvalResult<Step> {
        let closure = self.heap.closure(id)?.clone();
        trace!(closure = id.0, special = closure.special, depth = self.ctx.depth(), "apply");
        let parent = if closure.special {
            self.ctx.env
        } else {
            closure.env
        };
        let frame = self.heap.alloc_frame(Some(parent));
        self.bind_params(frame, closure.params, self.ctx.argl)?;
        self.ctx.env = frame;
        self.ctx.exp = closure.body;
        Ok(Step::Eval)
    }

    /// Match a parameter template against an argument list.
    fn bind_params(&mut self, frame: EnvId, params: Value, args: Value) -> EvalResult<()> {
        let mut params = params;
        let mut args = args;
        loop {
            match params {
                Value::Nil => {
                    return if args.is_nil() {
                        Ok(())
                    } else {
                        Err(EvalError::malformed(format!(
                            "too many args: {}",
                            self.render(args)
                        )))
                    };
                }
                Value::Symbol(rest) => return env_define(&mut self.heap, frame, rest, args),
                Value::Pair(id) => {
                    let param = self.heap.car(id);
                    let more = self.heap.cdr(id);
                    if param == Value::Symbol(sym::AMPERSAND) {
                        return match self.heap.uncons(more) {
                            Some((Value::Symbol(rest), Value::Nil)) => {
                                env_define(&mut self.heap, frame, rest, args)
                            }
                            _ => Err(EvalError::malformed("expected one symbol after &")),
                        };
                    }
                    let name = param
                        .as_symbol()
                        .ok_or_else(|| EvalError::malformed("parameter must be a symbol"))?;
                    let (arg, rest_args) = self
                        .heap
                        .uncons(args)
                        .ok_or_else(|| EvalError::malformed("too few args"))?;
                    env_define(&mut self.heap, frame, name, arg)?;
                    params = more;
                    args = rest_args;
                }
                _ => return Err(EvalError::malformed("bad parameter template")),
            }
        }
    }

    /// Whether `proc` takes its operands unevaluated.
    pub fn is_special(&self, proc: Value) -> EvalResult<bool> {
        Ok(match proc {
            Value::Prim(id) => self.registry.prim(id)?.kind == PrimKind::Form,
            Value::Closure(id) => self.heap.closure(id)?.special,
            Value::Cont(id) => self.heap.continuation(id)?.special,
            _ => false,
        })
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    pub fn lookup(&self, name: SymbolId) -> EvalResult<Value> {
        env_lookup(&self.heap, self.ctx.env, name)?
            .ok_or_else(|| EvalError::Unbound(self.symbols.name(name).to_string()))
    }

    pub fn define_global(&mut self, name: &str, val: Value) -> EvalResult<()> {
        let id = self.symbols.intern(name);
        env_define(&mut self.heap, self.global, id, val)
    }

    pub fn global_value(&self, name: &str) -> Option<Value> {
        let id = self.symbols.lookup(name)?;
        env_lookup(&self.heap, self.global, id).ok().flatten()
    }

    pub fn intern(&mut self, name: &str) -> Value {
        Value::Symbol(self.symbols.intern(name))
    }

    pub fn printer(&self) -> Printer<'_> {
        Printer::new(&self.heap, &self.symbols, &self.registry)
    }

    /// Written form: strings quoted.
    pub fn render(&self, val: Value) -> String {
        self.printer().write(val)
    }

    /// Display form: strings raw.
    pub fn display(&self, val: Value) -> String {
        self.printer().display(val)
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Mark from every register, the pending step and every stack slot.
    fn collect_garbage(&mut self, step: Step) {
        let mut values = vec![self.ctx.exp, self.ctx.val, self.ctx.argl];
        values.extend(step.value());
        values.extend(self.ctx.cont.value());
        let mut envs = vec![self.global, self.ctx.env];
        for slot in self.ctx.slots() {
            heap::slot_refs(slot, &mut values, &mut envs);
        }
        self.heap.collect(values, envs);
    }
}
