use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use rustc_hash::FxHashSet;

use crate::globals::Registry;
use crate::heap::{Foreign, Heap};
use crate::symbol::{sym, SymbolTable};
use crate::value::{PairId, Value};

/// Car-nesting deeper than this prints as `...`.
const MAX_DEPTH: usize = 1000;

/// Renders values as text.
pub struct Printer<'a> {
    heap: &'a Heap,
    symbols: &'a SymbolTable,
    registry: &'a Registry,
}

impl<'a> Printer<'a> {
    pub fn new(heap: &'a Heap, symbols: &'a SymbolTable, registry: &'a Registry) -> Self {
        Printer {
            heap,
            symbols,
            registry,
        }
    }

    /// Written form: strings quoted and escaped.
    pub fn write(&self, val: Value) -> String {
        self.print(val, false)
    }

    /// Display form: strings raw.
    pub fn display(&self, val: Value) -> String {
        self.print(val, true)
    }

    fn print(&self, val: Value, display: bool) -> String {
        let mut out = String::new();
        let mut path = FxHashSet::default();
        self.print_inner(val, display, &mut out, 0, &mut path);
        out
    }

    /// `path` holds the pairs on the way from the root to `val`; meeting one
    /// again means the structure is cyclic.
    fn print_inner(
        &self,
        val: Value,
        display: bool,
        out: &mut String,
        depth: usize,
        path: &mut FxHashSet<PairId>,
    ) {
        if depth > MAX_DEPTH {
            out.push_str("...");
            return;
        }

        match val {
            Value::Nil => out.push_str("()"),
            Value::True => out.push_str("#t"),
            Value::Int(n) => out.push_str(&n.to_string()),
            Value::Float(x) => out.push_str(&format_float(x)),
            Value::Str(id) => match self.heap.string(id) {
                Ok(s) if display => out.push_str(s),
                Ok(s) => write_escaped(s, out),
                Err(_) => out.push_str("<dangling string>"),
            },
            Value::Symbol(id) => out.push_str(self.symbols.name(id)),
            Value::Prim(id) => match self.registry.prim(id) {
                Ok(prim) => {
                    out.push_str("<primitive ");
                    out.push_str(prim.name);
                    out.push('>');
                }
                Err(_) => out.push_str("<primitive>"),
            },
            Value::Closure(id) => match self.heap.closure(id) {
                Ok(c) if c.special => out.push_str("<special>"),
                _ => out.push_str("<lambda>"),
            },
            Value::Cont(_) => out.push_str("<continuation>"),
            Value::Opaque(id) => match self.heap.opaque(id) {
                Ok(Foreign::Instant(_)) => out.push_str("<opaque instant>"),
                Err(_) => out.push_str("<opaque>"),
            },
            Value::Pair(id) => {
                if path.contains(&id) {
                    out.push_str("...");
                    return;
                }

                // (quote x) -> 'x
                if let Some((Value::Symbol(sym::QUOTE), Value::Pair(rest))) = self.heap.uncons(val) {
                    if self.heap.cdr(rest).is_nil() {
                        path.insert(id);
                        out.push('\'');
                        self.print_inner(self.heap.car(rest), display, out, depth + 1, path);
                        path.remove(&id);
                        return;
                    }
                }

                let mut added = Vec::new();
                out.push('(');
                let mut current = val;
                loop {
                    match current {
                        Value::Nil => break,
                        Value::Pair(pid) => {
                            if path.contains(&pid) {
                                out.push_str(" ...");
                                break;
                            }
                            if !added.is_empty() {
                                out.push(' ');
                            }
                            path.insert(pid);
                            added.push(pid);
                            self.print_inner(self.heap.car(pid), display, out, depth + 1, path);
                            current = self.heap.cdr(pid);
                        }
                        atom => {
                            out.push_str(" . ");
                            self.print_inner(atom, display, out, depth + 1, path);
                            break;
                        }
                    }
                }
                out.push(')');
                for pid in added {
                    path.remove(&pid);
                }
            }
        }
    }
}

/// Floats always carry a decimal point or an exponent.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".into();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let s = x.to_string();
    if s.contains('.') || s.contains('e') {
        s
    } else {
        format!("{}.0", s)
    }
}

fn write_escaped(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// An output sink that can be handed to a [`Machine`](crate::Machine) and
/// read back afterwards.
#[derive(Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
