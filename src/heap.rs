// File: src/heap.rs
//
// Allocator and mark-and-sweep garbage collector. The heap owns
// the intrusive allocation list (every live object threaded via `Obj::next`,
// invariant 1) and the byte-accounting that decides when a collection runs.
// Root discovery lives in `vm.rs` (the VM owns the stack, frames, globals,
// and every other live reference) — the heap only knows how to mark from a
// starting set and sweep what's left unmarked.

use crate::object::{Obj, ObjFunction, ObjKind, ObjRef, ObjString, UpvalueState};
use crate::table::{fnv1a, StringTable};
use crate::value::Value;
use std::cell::Cell;
use std::ptr::NonNull;

/// Default `min_threshold`: 20 MiB.
pub const DEFAULT_MIN_THRESHOLD: usize = 20 * 1024 * 1024;
/// Default `heap_grow_rate`.
pub const DEFAULT_HEAP_GROW_RATE: f64 = 2.0;

pub struct Heap {
    head: Option<ObjRef>,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    pub min_threshold: usize,
    pub heap_grow_rate: f64,
    /// Weak registry of every interned string ("the interning
    /// registry itself"); values are unused sentinels.
    interner: StringTable,
    gray_stack: Vec<ObjRef>,
    pub collections_run: usize,
}

fn approx_size(obj: &Obj) -> usize {
    let base = std::mem::size_of::<Obj>();
    let extra = match &obj.kind {
        ObjKind::String(s) => s.bytes.len(),
        ObjKind::List(l) => l.borrow().capacity() * std::mem::size_of::<Value>(),
        ObjKind::Tuple(t) => t.len() * std::mem::size_of::<Value>(),
        ObjKind::Table(t) => t.borrow().len() * std::mem::size_of::<Value>() * 2,
        ObjKind::Function(f) => {
            f.chunk.code.len() + f.chunk.constants.len() * std::mem::size_of::<Value>()
        }
        ObjKind::Closure(c) => c.upvalues.len() * std::mem::size_of::<ObjRef>(),
        ObjKind::Class(c) => c.methods.borrow().len() * std::mem::size_of::<Value>() * 2,
        ObjKind::Instance(i) => i.fields.borrow().len() * std::mem::size_of::<Value>() * 2,
        ObjKind::Module(m) => m.globals.borrow().len() * std::mem::size_of::<Value>() * 2,
        _ => 0,
    };
    base + extra
}

impl Heap {
    pub fn new() -> Self {
        Self {
            head: None,
            bytes_allocated: 0,
            next_gc: DEFAULT_MIN_THRESHOLD,
            min_threshold: DEFAULT_MIN_THRESHOLD,
            heap_grow_rate: DEFAULT_HEAP_GROW_RATE,
            interner: StringTable::new(),
            gray_stack: Vec::new(),
            collections_run: 0,
        }
    }

    pub fn should_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc
    }

    fn push_obj(&mut self, kind: ObjKind) -> ObjRef {
        let boxed = Box::new(Obj { marked: Cell::new(false), next: Cell::new(self.head), kind });
        let size = approx_size(&boxed);
        let ptr = NonNull::new(Box::into_raw(boxed)).expect("Box::into_raw is never null");
        let obj_ref = ObjRef(ptr);
        self.head = Some(obj_ref);
        self.bytes_allocated += size;
        obj_ref
    }

    /// Interns `s`: returns the existing String object if an equal byte
    /// sequence was already interned, otherwise allocates a new one and
    /// registers it.
    pub fn intern(&mut self, s: &str) -> ObjRef {
        let hash = fnv1a(s.as_bytes());
        if let Some(existing) = self.interner.find_interned(s, hash) {
            return existing;
        }
        let obj = self.push_obj(ObjKind::String(ObjString { bytes: s.into(), hash }));
        // The new string is reachable only through the registry until the
        // caller pushes it somewhere rooted; mark it so a collection
        // triggered by a *later* allocation in the same native/compiler
        // call cannot free it out from under the registry entry: interning
        // during marking must not insert new entries without first marking
        // the new string.
        obj.mark();
        self.interner.intern_insert(obj);
        obj
    }

    pub fn alloc_list(&mut self, items: Vec<Value>) -> ObjRef {
        self.push_obj(ObjKind::List(std::cell::RefCell::new(items)))
    }

    pub fn alloc_tuple(&mut self, items: Box<[Value]>) -> ObjRef {
        self.push_obj(ObjKind::Tuple(items))
    }

    pub fn alloc_table(&mut self) -> ObjRef {
        self.push_obj(ObjKind::Table(std::cell::RefCell::new(crate::table::ValueTable::new())))
    }

    pub fn alloc_function(&mut self, function: ObjFunction) -> ObjRef {
        self.push_obj(ObjKind::Function(function))
    }

    pub fn alloc_closure(&mut self, closure: crate::object::ObjClosure) -> ObjRef {
        self.push_obj(ObjKind::Closure(closure))
    }

    pub fn alloc_upvalue(&mut self, state: UpvalueState) -> ObjRef {
        self.push_obj(ObjKind::Upvalue(std::cell::RefCell::new(state)))
    }

    pub fn alloc_native(&mut self, native: crate::object::ObjNative) -> ObjRef {
        self.push_obj(ObjKind::Native(native))
    }

    pub fn alloc_class(&mut self, name: ObjRef) -> ObjRef {
        self.push_obj(ObjKind::Class(crate::object::ObjClass {
            name,
            superclass: Cell::new(None),
            methods: std::cell::RefCell::new(StringTable::new()),
        }))
    }

    pub fn alloc_instance(&mut self, class: ObjRef) -> ObjRef {
        self.push_obj(ObjKind::Instance(crate::object::ObjInstance {
            class,
            fields: std::cell::RefCell::new(StringTable::new()),
        }))
    }

    pub fn alloc_module(&mut self, name: ObjRef, path: Option<String>) -> ObjRef {
        self.push_obj(ObjKind::Module(crate::object::ObjModule {
            name,
            globals: std::cell::RefCell::new(StringTable::new()),
            path,
        }))
    }

    pub fn alloc_bound_method(&mut self, receiver: Value, method: Value) -> ObjRef {
        self.push_obj(ObjKind::BoundMethod(crate::object::ObjBoundMethod { receiver, method }))
    }

    pub fn alloc_stacktrace(&mut self, entries: Vec<crate::object::TraceEntry>) -> ObjRef {
        self.push_obj(ObjKind::StackTrace(entries))
    }

    pub fn alloc_userdata(&mut self, userdata: crate::object::ObjUserdata) -> ObjRef {
        self.push_obj(ObjKind::Userdata(userdata))
    }

    // ---- mark phase ----

    pub fn mark_value(&mut self, v: &Value) {
        if let Value::Obj(o) = v {
            self.mark_object(*o);
        }
    }

    pub fn mark_object(&mut self, obj: ObjRef) {
        if !obj.marked() {
            obj.mark();
            self.gray_stack.push(obj);
        }
    }

    /// Drains the gray stack, blackening each object by marking everything
    /// it references ("Mark phase").
    pub fn trace_references(&mut self) {
        while let Some(obj) = self.gray_stack.pop() {
            self.blacken(obj);
        }
    }

    fn blacken(&mut self, obj: ObjRef) {
        // Collect the values/objects to mark first so we never hold a
        // RefCell borrow while recursing into `self.mark_*` (which may
        // itself need to borrow the same cell for a cyclic structure).
        match &obj.get().kind {
            ObjKind::String(_) | ObjKind::Userdata(_) | ObjKind::StackTrace(_) => {}
            ObjKind::List(l) => {
                let items = l.borrow().clone();
                for v in &items {
                    self.mark_value(v);
                }
            }
            ObjKind::Tuple(t) => {
                let items = t.to_vec();
                for v in &items {
                    self.mark_value(v);
                }
            }
            ObjKind::Table(t) => {
                let pairs: Vec<(Value, Value)> = t.borrow().iter().map(|(k, v)| (*k, *v)).collect();
                for (k, v) in &pairs {
                    self.mark_value(k);
                    self.mark_value(v);
                }
            }
            ObjKind::Function(f) => {
                let name = f.name;
                let module = f.module;
                let defaults = f.defaults.clone();
                let constants = f.chunk.constants.clone();
                if let Some(n) = name {
                    self.mark_object(n);
                }
                if let Some(m) = module {
                    self.mark_object(m);
                }
                for d in &defaults {
                    self.mark_value(d);
                }
                for c in &constants {
                    self.mark_value(c);
                }
            }
            ObjKind::Closure(c) => {
                let function = c.function;
                let upvalues = c.upvalues.clone();
                self.mark_object(function);
                for u in &upvalues {
                    self.mark_object(*u);
                }
            }
            ObjKind::Upvalue(u) => {
                let closed = match &*u.borrow() {
                    UpvalueState::Open(_) => None,
                    UpvalueState::Closed(v) => Some(*v),
                };
                if let Some(v) = closed {
                    self.mark_value(&v);
                }
            }
            ObjKind::Native(n) => {
                let name = n.name;
                self.mark_object(name);
            }
            ObjKind::Class(c) => {
                let name = c.name;
                let superclass = c.superclass.get();
                let methods: Vec<(ObjRef, Value)> = c.methods.borrow().iter().collect();
                self.mark_object(name);
                if let Some(s) = superclass {
                    self.mark_object(s);
                }
                for (k, v) in &methods {
                    self.mark_object(*k);
                    self.mark_value(v);
                }
            }
            ObjKind::Instance(i) => {
                let class = i.class;
                let fields: Vec<(ObjRef, Value)> = i.fields.borrow().iter().collect();
                self.mark_object(class);
                for (k, v) in &fields {
                    self.mark_object(*k);
                    self.mark_value(v);
                }
            }
            ObjKind::Module(m) => {
                let name = m.name;
                let globals: Vec<(ObjRef, Value)> = m.globals.borrow().iter().collect();
                self.mark_object(name);
                for (k, v) in &globals {
                    self.mark_object(*k);
                    self.mark_value(v);
                }
            }
            ObjKind::BoundMethod(b) => {
                let receiver = b.receiver;
                let method = b.method;
                self.mark_value(&receiver);
                self.mark_value(&method);
            }
        }
    }

    /// Before sweep: drop interner entries whose key is unmarked so the
    /// registry doesn't root every string ever created.
    pub fn weaken_interner(&mut self) {
        self.interner.retain_marked_keys();
    }

    /// Walks the allocation list, freeing every unmarked object and
    /// clearing the mark bit on survivors ("Sweep phase").
    pub fn sweep(&mut self) {
        let mut prev: Option<ObjRef> = None;
        let mut current = self.head;
        while let Some(obj) = current {
            let next = obj.get().next.get();
            if obj.marked() {
                obj.unmark();
                prev = Some(obj);
                current = next;
            } else {
                match prev {
                    Some(p) => p.get().next.set(next),
                    None => self.head = next,
                }
                self.bytes_allocated = self.bytes_allocated.saturating_sub(approx_size(obj.get()));
                // SAFETY: `obj` was unlinked from the allocation list above
                // and is unmarked, so nothing else can reference it; this
                // is the only place an object is ever freed.
                unsafe {
                    drop(Box::from_raw(obj.0.as_ptr()));
                }
                current = next;
            }
        }
        self.collections_run += 1;
    }

    /// Runs threshold update after sweep ("Threshold update").
    pub fn update_threshold(&mut self) {
        self.next_gc = std::cmp::max(
            self.min_threshold,
            (self.bytes_allocated as f64 * self.heap_grow_rate) as usize,
        );
    }

    pub fn live_object_count(&self) -> usize {
        let mut count = 0;
        let mut current = self.head;
        while let Some(obj) = current {
            count += 1;
            current = obj.get().next.get();
        }
        count
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let mut current = self.head.take();
        while let Some(obj) = current {
            let next = obj.get().next.get();
            unsafe {
                drop(Box::from_raw(obj.0.as_ptr()));
            }
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedupes_equal_strings() {
        let mut heap = Heap::new();
        let a = heap.intern("abc");
        let b = heap.intern("abc");
        assert_eq!(a, b);
        let c = heap.intern("abd");
        assert_ne!(a, c);
    }

    #[test]
    fn unreachable_object_is_swept() {
        let mut heap = Heap::new();
        let obj = heap.alloc_list(vec![Value::Number(1.0)]);
        let _ = obj;
        assert_eq!(heap.live_object_count(), 1);
        heap.sweep();
        assert_eq!(heap.live_object_count(), 0);
    }

    #[test]
    fn marked_object_survives_sweep_and_is_unmarked_after() {
        let mut heap = Heap::new();
        let obj = heap.alloc_list(vec![]);
        heap.mark_object(obj);
        heap.trace_references();
        heap.sweep();
        assert_eq!(heap.live_object_count(), 1);
        assert!(!obj.marked());
    }
}
