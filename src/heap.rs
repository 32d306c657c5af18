use std::time::Instant;

use tracing::debug;

use crate::context::{Callee, Slot, Stack, Step};
use crate::env::Frame;
use crate::error::{EvalError, EvalResult};
use crate::value::{ClosureId, ContId, EnvId, OpaqueId, PairId, StrId, Value};

/// A single cons cell on the heap.
pub struct ConsCell {
    pub car: Value,
    pub cdr: Value,
    pub mark: bool,
}

/// A user procedure: parameter template, body, defining environment.
#[derive(Clone, Debug)]
pub struct Closure {
    pub params: Value,
    pub body: Value,
    pub env: EnvId,
    /// Receives its operands unevaluated, in a frame whose parent is the
    /// caller's environment.
    pub special: bool,
}

/// A captured point of future execution.
#[derive(Clone, Debug)]
pub struct Continuation {
    pub step: Step,
    pub stack: Stack,
    pub env: EnvId,
    /// Invoked with its raw operand list.
    pub special: bool,
}

/// Host objects that only cross the foreign-function boundary.
#[derive(Clone, Debug)]
pub enum Foreign {
    Instant(Instant),
}

/// Growable table of collectable objects addressed by index.
struct Slab<T> {
    entries: Vec<Option<T>>,
    marks: Vec<bool>,
    free: Vec<u32>,
}

impl<T> Slab<T> {
    fn new() -> Self {
        Slab {
            entries: Vec::new(),
            marks: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, item: T) -> u32 {
        if let Some(id) = self.free.pop() {
            self.entries[id as usize] = Some(item);
            self.marks[id as usize] = false;
            return id;
        }
        self.entries.push(Some(item));
        self.marks.push(false);
        (self.entries.len() - 1) as u32
    }

    fn get(&self, id: u32) -> Option<&T> {
        self.entries.get(id as usize).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.entries.get_mut(id as usize).and_then(Option::as_mut)
    }

    /// Mark an entry. Returns true the first time it is marked this cycle.
    fn mark(&mut self, id: u32) -> bool {
        match self.marks.get_mut(id as usize) {
            Some(m) if !*m => {
                *m = true;
                true
            }
            _ => false,
        }
    }

    fn clear_marks(&mut self) {
        self.marks.iter_mut().for_each(|m| *m = false);
    }

    /// Free every unmarked live entry. Returns how many were freed.
    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for (i, entry) in self.entries.iter_mut().enumerate() {
            if entry.is_some() && !self.marks[i] {
                *entry = None;
                self.free.push(i as u32);
                freed += 1;
            }
        }
        freed
    }

    fn live(&self) -> usize {
        self.entries.len() - self.free.len()
    }
}

/// Counts reported by one collection cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub cells_freed: usize,
    pub objects_freed: usize,
    pub cells_live: usize,
}

/// The object heap. All pairs live in `cells`; `PairId` is an index into
/// it. Strings, frames, closures, continuations and foreign handles live in
/// their own slabs.
pub struct Heap {
    cells: Vec<ConsCell>,
    free_list: Vec<PairId>,
    strings: Slab<String>,
    frames: Slab<Frame>,
    closures: Slab<Closure>,
    conts: Slab<Continuation>,
    opaques: Slab<Foreign>,
    capacity: usize,
    /// Number of allocations since last GC (for triggering).
    allocs_since_gc: usize,
    /// GC threshold: trigger GC when allocs_since_gc reaches this.
    gc_threshold: usize,
}

impl Heap {
    pub fn new(capacity: usize, gc_threshold: usize) -> Self {
        Heap {
            cells: Vec::with_capacity(1024),
            free_list: Vec::new(),
            strings: Slab::new(),
            frames: Slab::new(),
            closures: Slab::new(),
            conts: Slab::new(),
            opaques: Slab::new(),
            capacity,
            allocs_since_gc: 0,
            gc_threshold: gc_threshold.max(1),
        }
    }

    // === Pairs ===

    /// Allocate a new cons cell.
    /// Returns Err(HeapExhausted) if capacity is exceeded.
    pub fn alloc(&mut self, car: Value, cdr: Value) -> EvalResult<PairId> {
        self.allocs_since_gc += 1;

        if let Some(id) = self.free_list.pop() {
            let cell = &mut self.cells[id.0 as usize];
            cell.car = car;
            cell.cdr = cdr;
            cell.mark = false;
            return Ok(id);
        }

        if self.cells.len() >= self.capacity {
            return Err(EvalError::HeapExhausted(self.cells.len()));
        }

        let id = PairId(self.cells.len() as u32);
        self.cells.push(ConsCell {
            car,
            cdr,
            mark: false,
        });
        Ok(id)
    }

    pub fn cons(&mut self, car: Value, cdr: Value) -> EvalResult<Value> {
        Ok(Value::Pair(self.alloc(car, cdr)?))
    }

    #[inline]
    pub fn car(&self, id: PairId) -> Value {
        self.cells[id.0 as usize].car
    }

    #[inline]
    pub fn cdr(&self, id: PairId) -> Value {
        self.cells[id.0 as usize].cdr
    }

    #[inline]
    pub fn set_car(&mut self, id: PairId, val: Value) {
        self.cells[id.0 as usize].car = val;
    }

    #[inline]
    pub fn set_cdr(&mut self, id: PairId, val: Value) {
        self.cells[id.0 as usize].cdr = val;
    }

    /// Car of a pair, or nil of nil.
    pub fn car_val(&self, val: Value) -> EvalResult<Value> {
        match val {
            Value::Nil => Ok(Value::Nil),
            Value::Pair(id) => Ok(self.car(id)),
            _ => Err(EvalError::mistype("car of non-pair")),
        }
    }

    /// Cdr of a pair, or nil of nil.
    pub fn cdr_val(&self, val: Value) -> EvalResult<Value> {
        match val {
            Value::Nil => Ok(Value::Nil),
            Value::Pair(id) => Ok(self.cdr(id)),
            _ => Err(EvalError::mistype("cdr of non-pair")),
        }
    }

    /// Split a pair into (car, cdr). Anything else is `None`.
    pub fn uncons(&self, val: Value) -> Option<(Value, Value)> {
        val.as_pair().map(|id| (self.car(id), self.cdr(id)))
    }

    /// Build a proper list from a slice of values.
    pub fn list(&mut self, values: &[Value]) -> EvalResult<Value> {
        let mut result = Value::Nil;
        for &val in values.iter().rev() {
            result = self.cons(val, result)?;
        }
        Ok(result)
    }

    /// Collect a proper list into a Vec. Returns None if not a proper list
    /// (including cyclic ones).
    pub fn list_to_vec(&self, val: Value) -> Option<Vec<Value>> {
        let mut result = Vec::new();
        let mut current = val;
        loop {
            match current {
                Value::Nil => return Some(result),
                Value::Pair(id) => {
                    if result.len() > self.cells.len() {
                        return None;
                    }
                    result.push(self.car(id));
                    current = self.cdr(id);
                }
                _ => return None,
            }
        }
    }

    // === Other objects ===

    pub fn alloc_string(&mut self, s: impl Into<String>) -> Value {
        self.allocs_since_gc += 1;
        Value::Str(StrId(self.strings.insert(s.into())))
    }

    pub fn string(&self, id: StrId) -> EvalResult<&str> {
        self.strings
            .get(id.0)
            .map(String::as_str)
            .ok_or_else(|| dangling("string", id.0))
    }

    pub fn alloc_frame(&mut self, parent: Option<EnvId>) -> EnvId {
        self.allocs_since_gc += 1;
        EnvId(self.frames.insert(Frame::new(parent)))
    }

    pub fn frame(&self, id: EnvId) -> EvalResult<&Frame> {
        self.frames.get(id.0).ok_or_else(|| dangling("frame", id.0))
    }

    pub fn frame_mut(&mut self, id: EnvId) -> EvalResult<&mut Frame> {
        self.frames.get_mut(id.0).ok_or_else(|| dangling("frame", id.0))
    }

    pub fn alloc_closure(&mut self, closure: Closure) -> Value {
        self.allocs_since_gc += 1;
        Value::Closure(ClosureId(self.closures.insert(closure)))
    }

    pub fn closure(&self, id: ClosureId) -> EvalResult<&Closure> {
        self.closures.get(id.0).ok_or_else(|| dangling("closure", id.0))
    }

    pub fn closure_mut(&mut self, id: ClosureId) -> EvalResult<&mut Closure> {
        self.closures.get_mut(id.0).ok_or_else(|| dangling("closure", id.0))
    }

    pub fn alloc_continuation(&mut self, cont: Continuation) -> Value {
        self.allocs_since_gc += 1;
        Value::Cont(ContId(self.conts.insert(cont)))
    }

    pub fn continuation(&self, id: ContId) -> EvalResult<&Continuation> {
        self.conts.get(id.0).ok_or_else(|| dangling("continuation", id.0))
    }

    pub fn continuation_mut(&mut self, id: ContId) -> EvalResult<&mut Continuation> {
        self.conts.get_mut(id.0).ok_or_else(|| dangling("continuation", id.0))
    }

    pub fn alloc_opaque(&mut self, obj: Foreign) -> Value {
        self.allocs_since_gc += 1;
        Value::Opaque(OpaqueId(self.opaques.insert(obj)))
    }

    pub fn opaque(&self, id: OpaqueId) -> EvalResult<&Foreign> {
        self.opaques.get(id.0).ok_or_else(|| dangling("opaque", id.0))
    }

    // === Accounting ===

    /// Returns the number of allocated cells (including free-listed ones).
    pub fn total_cells(&self) -> usize {
        self.cells.len()
    }

    /// Returns the number of live cells (accurate after GC).
    pub fn live_cells(&self) -> usize {
        self.cells.len() - self.free_list.len()
    }

    pub fn live_frames(&self) -> usize {
        self.frames.live()
    }

    /// Returns true if we should trigger a GC cycle.
    pub fn should_gc(&self) -> bool {
        self.allocs_since_gc >= self.gc_threshold
    }

    /// Adjust GC threshold based on occupancy.
    fn adjust_gc_threshold(&mut self) {
        let live = self.live_cells();
        let total = self.total_cells();
        if total > 0 {
            let occupancy = live as f64 / total as f64;
            if occupancy > 0.75 {
                // High occupancy: double the threshold to avoid thrashing
                self.gc_threshold = (self.gc_threshold * 2).min(self.capacity.max(1));
            }
        }
    }

    // === GC ===

    /// Mark everything reachable from the roots, then sweep the rest.
    pub fn collect(&mut self, mut values: Vec<Value>, mut envs: Vec<EnvId>) -> GcStats {
        self.clear_marks();
        loop {
            if let Some(v) = values.pop() {
                self.mark_value(v, &mut values, &mut envs);
            } else if let Some(e) = envs.pop() {
                self.mark_env(e, &mut values, &mut envs);
            } else {
                break;
            }
        }
        let stats = self.sweep();
        self.allocs_since_gc = 0;
        self.adjust_gc_threshold();
        debug!(
            cells_freed = stats.cells_freed,
            objects_freed = stats.objects_freed,
            cells_live = stats.cells_live,
            "gc cycle"
        );
        stats
    }

    fn clear_marks(&mut self) {
        for cell in &mut self.cells {
            cell.mark = false;
        }
        self.strings.clear_marks();
        self.frames.clear_marks();
        self.closures.clear_marks();
        self.conts.clear_marks();
        self.opaques.clear_marks();
    }

    fn mark_value(&mut self, val: Value, values: &mut Vec<Value>, envs: &mut Vec<EnvId>) {
        match val {
            Value::Pair(id) => {
                let cell = &mut self.cells[id.0 as usize];
                if !cell.mark {
                    cell.mark = true;
                    values.push(cell.car);
                    values.push(cell.cdr);
                }
            }
            Value::Str(id) => {
                self.strings.mark(id.0);
            }
            Value::Closure(id) => {
                if self.closures.mark(id.0) {
                    if let Some(c) = self.closures.get(id.0) {
                        values.push(c.params);
                        values.push(c.body);
                        envs.push(c.env);
                    }
                }
            }
            Value::Cont(id) => {
                if self.conts.mark(id.0) {
                    if let Some(k) = self.conts.get(id.0) {
                        for slot in k.stack.iter() {
                            slot_refs(slot, values, envs);
                        }
                        values.extend(k.step.value());
                        envs.push(k.env);
                    }
                }
            }
            Value::Opaque(id) => {
                self.opaques.mark(id.0);
            }
            Value::Nil
            | Value::True
            | Value::Int(_)
            | Value::Float(_)
            | Value::Symbol(_)
            | Value::Prim(_) => {}
        }
    }

    fn mark_env(&mut self, env: EnvId, values: &mut Vec<Value>, envs: &mut Vec<EnvId>) {
        if self.frames.mark(env.0) {
            if let Some(frame) = self.frames.get(env.0) {
                values.extend(frame.values());
                envs.extend(frame.parent());
            }
        }
    }

    /// Sweep: collect unmarked cells to the free list, drop unmarked objects.
    fn sweep(&mut self) -> GcStats {
        self.free_list.clear();
        for i in 0..self.cells.len() {
            if !self.cells[i].mark {
                self.free_list.push(PairId(i as u32));
                self.cells[i].car = Value::Nil;
                self.cells[i].cdr = Value::Nil;
            }
        }
        let objects_freed = self.strings.sweep()
            + self.frames.sweep()
            + self.closures.sweep()
            + self.conts.sweep()
            + self.opaques.sweep();
        GcStats {
            cells_freed: self.free_list.len(),
            objects_freed,
            cells_live: self.live_cells(),
        }
    }
}

/// Push the values and environments an auxiliary-stack slot refers to.
pub fn slot_refs(slot: &Slot, values: &mut Vec<Value>, envs: &mut Vec<EnvId>) {
    match slot {
        Slot::Value(v) => values.push(*v),
        Slot::Env(e) => envs.push(*e),
        Slot::Step(s) => values.extend(s.value()),
        Slot::Callee(Callee::Proc(v)) => values.push(*v),
        Slot::Callee(Callee::Foreign { .. }) | Slot::Sentinel => {}
        Slot::Trap(checkpoint) => {
            envs.push(checkpoint.env);
            values.extend(checkpoint.cont.value());
        }
    }
}

fn dangling(kind: &str, id: u32) -> EvalError {
    EvalError::Internal(format!("dangling {} handle {}", kind, id))
}
