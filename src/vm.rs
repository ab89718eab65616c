// File: src/vm.rs
//
// Stack-based bytecode interpreter. Owns the value stack, the
// call-frame stack, the exception-handler stack, the heap/GC, the module
// registry, and the inline method cache. `run` is the single dispatch loop;
// everything else is support machinery for individual opcodes.

use crate::bytecode::Op;
use crate::errors::{Diagnostic, RaisedException};
use crate::heap::Heap;
use crate::module::ModuleImporter;
use crate::object::{
    NativeFn, ObjClosure, ObjFunction, ObjNative, TraceEntry, UpvalueState,
};
use crate::object::ObjRef;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Runtime-tunable limits and GC parameters ("Configuration").
#[derive(Clone)]
pub struct VmConfig {
    pub min_threshold: usize,
    pub heap_grow_rate: f64,
    pub max_frames: usize,
    /// Maximum host↔VM boundary crossings (nested `call_function` calls),
    /// separate from `max_frames`. A native function that reenters the VM
    /// recursively is bounded by this rather than the bytecode frame count.
    pub max_reentrant_calls: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            min_threshold: crate::heap::DEFAULT_MIN_THRESHOLD,
            heap_grow_rate: crate::heap::DEFAULT_HEAP_GROW_RATE,
            max_frames: 1024,
            max_reentrant_calls: 256,
        }
    }
}

/// Failure modes distinguished so the caller can raise the right exception
/// class rather than a generic `Exception`.
enum CallFailure {
    Overflow,
    Arity(String),
}

struct CallFrame {
    closure: ObjRef,
    ip: usize,
    base: usize,
    /// Set for a frame running a class's `new` method invoked via
    /// construction: on `Return` the instance is pushed instead of
    /// whatever `new` itself returned.
    constructed_instance: Option<Value>,
}

struct Handler {
    frame_depth: usize,
    stack_base: usize,
    target: usize,
}

pub enum RunError {
    /// An exception propagated past every handler.
    Exception(Value, Vec<TraceEntry>),
    /// Heap exhaustion or an internal invariant violation.
    Fatal(String),
}

pub enum InterpretResult {
    Ok(Value),
    CompileError(Vec<Diagnostic>),
    RuntimeError(RunError),
}

pub struct Vm {
    pub heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    handlers: Vec<Handler>,
    open_upvalues: Vec<ObjRef>,
    pub main_module: ObjRef,
    modules: HashMap<String, ObjRef>,
    loading_stack: Vec<String>,
    /// Per-(class, method-name) inline cache (§4.4 "inline cache"). Keyed
    /// by object identity rather than address bits so a collection can
    /// safely evict entries whose class/name didn't survive mark phase
    /// before their memory can be reused by a later allocation.
    method_cache: HashMap<(ObjRef, ObjRef), Value>,
    pub config: VmConfig,
    pub importer: Box<dyn ModuleImporter>,
    current_exception: Option<Value>,
    reentrant_depth: usize,
    /// Set by the host (e.g. from a signal handler or timer thread) to
    /// request cooperative cancellation; the only legal cross-thread write
    /// ("Cancellation"). Checked on backward jumps and calls.
    eval_break: Arc<AtomicBool>,
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        let mut heap = Heap::new();
        heap.min_threshold = config.min_threshold;
        heap.next_gc = config.min_threshold;
        heap.heap_grow_rate = config.heap_grow_rate;
        let main_name = heap.intern("__main__");
        let main_module = heap.alloc_module(main_name, None);
        Self {
            heap,
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
            handlers: Vec::new(),
            open_upvalues: Vec::new(),
            main_module,
            modules: HashMap::new(),
            loading_stack: Vec::new(),
            method_cache: HashMap::new(),
            config,
            importer: Box::new(crate::module::FsImporter::new(".")),
            current_exception: None,
            reentrant_depth: 0,
            eval_break: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn bootstrap(&mut self) {
        crate::builtins::install(self);
    }

    /// Returns a handle the host can hand to a signal handler or timer
    /// thread to request cancellation of the running program.
    pub fn eval_break_handle(&self) -> Arc<AtomicBool> {
        self.eval_break.clone()
    }

    pub fn define_global(&mut self, module: ObjRef, name: &str, value: Value) {
        let key = self.heap.intern(name);
        module.as_module().expect("define_global target must be a Module").globals.borrow_mut().put(key, value);
    }

    pub fn define_native(&mut self, module: ObjRef, name: &str, arity: u8, func: NativeFn) {
        let name_obj = self.heap.intern(name);
        let native = self.heap.alloc_native(ObjNative { name: name_obj, arity, func });
        self.define_global(module, name, Value::Obj(native));
    }

    pub fn intern(&mut self, s: &str) -> ObjRef {
        self.heap.intern(s)
    }

    // ---- top-level interpretation ----

    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        let tokens = match crate::lexer::tokenize(source) {
            Ok(t) => t,
            Err(e) => return InterpretResult::CompileError(vec![e]),
        };
        let program = match crate::parser::Parser::new(tokens).parse_program() {
            Ok(p) => p,
            Err(es) => return InterpretResult::CompileError(es),
        };
        let compiler = crate::compiler::Compiler::new(&mut self.heap, "__main__");
        let mut function = match compiler.compile_program(&program) {
            Ok(f) => f,
            Err(es) => return InterpretResult::CompileError(es),
        };
        function.module = Some(self.main_module);
        let closure = self.wrap_script(function);
        match self.call_function(closure, &[]) {
            Ok(v) => InterpretResult::Ok(v),
            Err(e) => InterpretResult::RuntimeError(e),
        }
    }

    fn wrap_script(&mut self, function: ObjFunction) -> ObjRef {
        let func_obj = self.heap.alloc_function(function);
        self.heap.alloc_closure(ObjClosure { function: func_obj, upvalues: Vec::new() })
    }

    /// Embedding entry point: calls a closure with `args` and
    /// runs it to completion, reentrantly if already inside `run`. Each call
    /// is a host↔VM boundary crossing counted against `max_reentrant_calls`,
    /// separate from the bytecode frame limit ("Recursion
    /// limits").
    pub fn call_function(&mut self, closure: ObjRef, args: &[Value]) -> Result<Value, RunError> {
        if self.reentrant_depth >= self.config.max_reentrant_calls {
            let trace = self.capture_trace();
            let value = self.make_exception_value("StackOverflowException", "maximum reentrant call depth exceeded");
            return Err(RunError::Exception(value, trace));
        }
        self.reentrant_depth += 1;
        let result = self.call_function_inner(closure, args);
        self.reentrant_depth -= 1;
        result
    }

    fn call_function_inner(&mut self, closure: ObjRef, args: &[Value]) -> Result<Value, RunError> {
        let base = self.stack.len();
        self.stack.push(Value::Obj(closure));
        for a in args {
            self.stack.push(*a);
        }
        let target_depth = self.frames.len();
        if let Err(failure) = self.push_call_frame(closure, base, args.len(), None) {
            self.stack.truncate(base);
            let trace = self.capture_trace();
            let value = match failure {
                CallFailure::Overflow => self.make_exception_value("StackOverflowException", "stack overflow"),
                CallFailure::Arity(msg) => self.make_exception_value("Exception", &msg),
            };
            return Err(RunError::Exception(value, trace));
        }
        self.run(target_depth)
    }

    /// Imports `name`, returning the cached module if already loaded,
    /// detecting circular imports via `loading_stack`.
    pub fn import_module(&mut self, name: &str) -> Result<ObjRef, String> {
        if let Some(m) = self.modules.get(name) {
            return Ok(*m);
        }
        if self.loading_stack.contains(&name.to_string()) {
            return Err(format!("circular import detected: {}", name));
        }
        let source = self.importer.import(name)?;
        self.loading_stack.push(name.to_string());
        let tokens = crate::lexer::tokenize(&source).map_err(|e| e.message)?;
        let program = crate::parser::Parser::new(tokens)
            .parse_program()
            .map_err(|es| es.into_iter().map(|e| e.message).collect::<Vec<_>>().join("; "))?;
        let module_name_obj = self.heap.intern(name);
        let module = self.heap.alloc_module(module_name_obj, Some(name.to_string()));
        let compiler = crate::compiler::Compiler::new(&mut self.heap, name);
        let mut function = compiler
            .compile_program(&program)
            .map_err(|es| es.into_iter().map(|e| e.message).collect::<Vec<_>>().join("; "))?;
        function.module = Some(module);
        let closure = self.wrap_script(function);
        let result = self.call_function(closure, &[]);
        self.loading_stack.pop();
        result.map_err(|e| match e {
            RunError::Exception(v, _) => crate::object::display_value(&v),
            RunError::Fatal(m) => m,
        })?;
        self.modules.insert(name.to_string(), module);
        Ok(module)
    }

    // ---- embedding surface (used by api.rs's slot facade) ----

    /// General callable dispatch: equivalent to evaluating a `Call`
    /// instruction against an arbitrary Value, so natives, bound methods,
    /// and classes (construction) are callable from host code, not only
    /// plain closures (`call_function`'s narrower signature).
    pub fn call_dynamic(&mut self, callee: Value, args: &[Value]) -> Result<Value, RunError> {
        if self.reentrant_depth >= self.config.max_reentrant_calls {
            let trace = self.capture_trace();
            let value = self.make_exception_value("StackOverflowException", "maximum reentrant call depth exceeded");
            return Err(RunError::Exception(value, trace));
        }
        self.reentrant_depth += 1;
        let result = self.call_dynamic_inner(callee, args);
        self.reentrant_depth -= 1;
        result
    }

    fn call_dynamic_inner(&mut self, callee: Value, args: &[Value]) -> Result<Value, RunError> {
        let base = self.stack.len();
        self.stack.push(callee);
        for a in args {
            self.stack.push(*a);
        }
        let target_depth = self.frames.len();
        if let Err(e) = self.call_value(base, args.len()) {
            self.stack.truncate(base);
            return Err(e);
        }
        if self.frames.len() == target_depth {
            Ok(self.stack.pop().unwrap())
        } else {
            self.run(target_depth)
        }
    }

    /// Looks up `name` on `receiver` (instance field/method, or module
    /// member) and calls it with `args`, mirroring the `Invoke` opcode's
    /// resolution order but callable from outside the bytecode loop.
    pub fn call_method(&mut self, receiver: Value, name: &str, args: &[Value]) -> Result<Value, RunError> {
        if self.reentrant_depth >= self.config.max_reentrant_calls {
            let trace = self.capture_trace();
            let value = self.make_exception_value("StackOverflowException", "maximum reentrant call depth exceeded");
            return Err(RunError::Exception(value, trace));
        }
        self.reentrant_depth += 1;
        let result = self.call_method_inner(receiver, name, args);
        self.reentrant_depth -= 1;
        result
    }

    fn call_method_inner(&mut self, receiver: Value, name: &str, args: &[Value]) -> Result<Value, RunError> {
        let base = self.stack.len();
        self.stack.push(receiver);
        for a in args {
            self.stack.push(*a);
        }
        let name_obj = self.heap.intern(name);
        let target_depth = self.frames.len();
        if let Err(e) = self.invoke(Value::Obj(name_obj), args.len()) {
            self.stack.truncate(base);
            return Err(e);
        }
        if self.frames.len() == target_depth {
            Ok(self.stack.pop().unwrap())
        } else {
            self.run(target_depth)
        }
    }

    /// Reads `name` off `target`: an instance field, a bound method if no
    /// field matches, or a module member.
    pub fn get_field(&mut self, target: Value, name: &str) -> Result<Value, RunError> {
        let name_obj = self.heap.intern(name);
        if let Some(o) = target.as_obj().filter(|o| o.as_instance().is_some()) {
            if let Some(v) = o.as_instance().unwrap().fields.borrow().get(name_obj) {
                return Ok(v);
            }
            let class = o.as_instance().unwrap().class;
            return match self.resolve_method(class, name_obj) {
                Some(m) => {
                    self.maybe_collect();
                    Ok(Value::Obj(self.heap.alloc_bound_method(target, m)))
                }
                None => self.fail(&format!("undefined field '{}'", name)),
            };
        }
        if let Some(o) = target.as_obj().filter(|o| o.as_module().is_some()) {
            return match o.as_module().unwrap().globals.borrow().get(name_obj) {
                Some(v) => Ok(v),
                None => self.fail(&format!("module has no member '{}'", name)),
            };
        }
        self.fail(&format!("'{}' has no fields", target.type_name()))
    }

    pub fn set_field(&mut self, target: Value, name: &str, value: Value) -> Result<(), RunError> {
        let name_obj = self.heap.intern(name);
        if let Some(o) = target.as_obj().filter(|o| o.as_instance().is_some()) {
            o.as_instance().unwrap().fields.borrow_mut().put(name_obj, value);
            return Ok(());
        }
        self.fail(&format!("'{}' has no fields", target.type_name()))
    }

    pub fn get_global(&mut self, module: ObjRef, name: &str) -> Option<Value> {
        let name_obj = self.heap.intern(name);
        module.as_module().and_then(|m| m.globals.borrow().get(name_obj))
    }

    /// Advances an iteration over `iterable` (list, tuple, or string) from
    /// `index`, mirroring `ForIter`'s element lookup without the jump logic.
    pub fn iterate_value(&mut self, iterable: Value, index: usize) -> Option<Value> {
        self.iterate_next(iterable, index)
    }

    /// Builds a named exception and the error that carries it, for host
    /// code outside any native function's `raise_native` call. Unlike
    /// `raise_typed` this never consults the handler stack: a host-side
    /// raise has no enclosing bytecode frame to unwind into, so it always
    /// produces a terminal `RunError`.
    pub fn raise(&mut self, class_name: &str, message: String) -> RunError {
        let value = self.make_exception_value(class_name, &message);
        let trace = self.capture_trace();
        RunError::Exception(value, trace)
    }

    pub fn stacktrace(&self) -> Vec<TraceEntry> {
        self.capture_trace()
    }

    // ---- GC ----

    fn maybe_collect(&mut self) {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    pub fn collect_garbage(&mut self) {
        for v in &self.stack {
            self.heap.mark_value(v);
        }
        for frame in &self.frames {
            self.heap.mark_object(frame.closure);
            if let Some(v) = &frame.constructed_instance {
                self.heap.mark_value(v);
            }
        }
        for u in &self.open_upvalues {
            self.heap.mark_object(*u);
        }
        self.heap.mark_object(self.main_module);
        for m in self.modules.values() {
            self.heap.mark_object(*m);
        }
        if let Some(exc) = &self.current_exception {
            self.heap.mark_value(exc);
        }
        self.heap.trace_references();
        // Evict cache entries whose class or method-name key didn't survive
        // mark phase: their memory is about to be freed by sweep and could
        // be reused by a later allocation, which would otherwise resurface
        // as a stale cache hit for an unrelated class.
        self.method_cache.retain(|(class, name), _| class.marked() && name.marked());
        self.heap.weaken_interner();
        self.heap.sweep();
        self.heap.update_threshold();
    }

    // ---- bytecode reading ----

    fn current_function(&self) -> &ObjFunction {
        self.frames.last().unwrap().closure.as_closure().unwrap().function.as_function().unwrap()
    }

    fn read_u8(&mut self) -> u8 {
        let frame_ip = self.frames.last().unwrap().ip;
        let byte = self.current_function().chunk.code[frame_ip];
        self.frames.last_mut().unwrap().ip += 1;
        byte
    }

    fn read_op(&mut self) -> Op {
        let byte = self.read_u8();
        Op::from_u8(byte).expect("invalid opcode byte")
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_u8();
        let lo = self.read_u8();
        ((hi as u16) << 8) | (lo as u16)
    }

    fn read_constant(&mut self, wide: bool) -> Value {
        let idx = if wide { self.read_u16() as usize } else { self.read_u8() as usize };
        self.current_function().chunk.constants[idx]
    }

    fn line_at_current(&self) -> usize {
        let frame = self.frames.last().unwrap();
        self.current_function().chunk.line_of(frame.ip.saturating_sub(1))
    }

    // ---- globals ----

    fn current_module(&self) -> ObjRef {
        self.current_function().module.unwrap_or(self.main_module)
    }

    // ---- upvalues ----

    fn capture_upvalue(&mut self, stack_index: usize) -> ObjRef {
        for u in &self.open_upvalues {
            if let UpvalueState::Open(i) = &*u.as_upvalue().unwrap().borrow() {
                if *i == stack_index {
                    return *u;
                }
            }
        }
        self.maybe_collect();
        let obj = self.heap.alloc_upvalue(UpvalueState::Open(stack_index));
        self.open_upvalues.push(obj);
        obj
    }

    fn close_upvalues(&mut self, from: usize) {
        let mut i = 0;
        while i < self.open_upvalues.len() {
            let u = self.open_upvalues[i];
            let idx = match &*u.as_upvalue().unwrap().borrow() {
                UpvalueState::Open(si) => Some(*si),
                UpvalueState::Closed(_) => None,
            };
            match idx {
                Some(si) if si >= from => {
                    let val = self.stack[si];
                    *u.as_upvalue().unwrap().borrow_mut() = UpvalueState::Closed(val);
                    self.open_upvalues.remove(i);
                }
                _ => i += 1,
            }
        }
    }

    // ---- calling convention ----

    fn prepare_call(&mut self, function: &ObjFunction, arg_count: usize) -> Result<(), String> {
        let required = function.arity as usize;
        let optional = function.defaults.len();
        let total_named = required + optional;
        if arg_count < required {
            return Err(format!("expected at least {} argument(s) but got {}", required, arg_count));
        }
        if !function.variadic && arg_count > total_named {
            return Err(format!("expected at most {} argument(s) but got {}", total_named, arg_count));
        }
        let mut count = arg_count;
        if count < total_named {
            for i in count..total_named {
                self.stack.push(function.defaults[i - required]);
            }
            count = total_named;
        }
        if function.variadic {
            let rest: Vec<Value> = if count > total_named { self.stack.split_off(self.stack.len() - (count - total_named)) } else { Vec::new() };
            self.maybe_collect();
            let rest_tuple = self.heap.alloc_tuple(rest.into_boxed_slice());
            self.stack.push(Value::Obj(rest_tuple));
        }
        Ok(())
    }

    fn push_call_frame(
        &mut self,
        closure_ref: ObjRef,
        base: usize,
        arg_count: usize,
        constructed_instance: Option<Value>,
    ) -> Result<(), CallFailure> {
        if self.frames.len() >= self.config.max_frames {
            return Err(CallFailure::Overflow);
        }
        let function = closure_ref.as_closure().expect("callee must be a Closure").function.as_function().unwrap();
        self.prepare_call(function, arg_count).map_err(CallFailure::Arity)?;
        self.frames.push(CallFrame { closure: closure_ref, ip: 0, base, constructed_instance });
        Ok(())
    }

    /// Dispatches a `Call`-site value at `base` (slot0 position) with
    /// `arg_count` arguments already above it on the stack.
    fn call_value(&mut self, base: usize, arg_count: usize) -> Result<(), RunError> {
        let callee = self.stack[base];
        match callee {
            Value::Obj(o) if o.as_closure().is_some() => self.push_call_frame_or_raise(o, base, arg_count, None),
            Value::Obj(o) if o.as_native().is_some() => self.call_native_at(o, base, arg_count, false),
            Value::Obj(o) if o.as_bound_method().is_some() => {
                let bound = o.as_bound_method().unwrap();
                let receiver = bound.receiver;
                let method = bound.method;
                self.stack[base] = receiver;
                match method {
                    Value::Obj(m) if m.as_closure().is_some() => {
                        self.push_call_frame_or_raise(m, base, arg_count, None)
                    }
                    Value::Obj(m) if m.as_native().is_some() => self.call_native_at(m, base, arg_count, true),
                    _ => self.fail("bound method value is not callable"),
                }
            }
            Value::Obj(o) if o.as_class().is_some() => self.construct_instance(o, base, arg_count),
            _ => self.fail_typed("TypeException", &format!("'{}' is not callable", callee.type_name())),
        }
    }

    fn construct_instance(&mut self, class: ObjRef, base: usize, arg_count: usize) -> Result<(), RunError> {
        self.maybe_collect();
        let instance = self.heap.alloc_instance(class);
        let init_name = self.heap.intern("new");
        match self.resolve_method(class, init_name) {
            Some(Value::Obj(m)) if m.as_closure().is_some() => {
                self.stack[base] = Value::Obj(instance);
                self.push_call_frame_or_raise(m, base, arg_count, Some(Value::Obj(instance)))
            }
            // Builtin classes (the Exception hierarchy) give `new` a native
            // implementation; run it for its side effect on `instance` and
            // leave the instance, not the native's return value, on the
            // stack, matching the closure path above.
            Some(Value::Obj(m)) if m.as_native().is_some() => {
                self.stack[base] = Value::Obj(instance);
                self.call_native_at(m, base, arg_count, true)?;
                self.stack.truncate(base);
                self.stack.push(Value::Obj(instance));
                Ok(())
            }
            Some(_) | None => {
                if arg_count != 0 {
                    return self.fail("class has no initializer accepting arguments");
                }
                self.stack.truncate(base);
                self.stack.push(Value::Obj(instance));
                Ok(())
            }
        }
    }

    /// `include_receiver` passes `stack[base]` as `args[0]` (self) ahead of
    /// the explicit arguments — used for method/construction dispatch where
    /// `base` holds the receiver rather than the native itself.
    fn call_native_at(&mut self, native_ref: ObjRef, base: usize, arg_count: usize, include_receiver: bool) -> Result<(), RunError> {
        let native = native_ref.as_native().unwrap();
        let func = native.func;
        let args: Vec<Value> = if include_receiver {
            self.stack[base..base + 1 + arg_count].to_vec()
        } else {
            self.stack[base + 1..base + 1 + arg_count].to_vec()
        };
        let result = func(self, &args);
        self.stack.truncate(base);
        match result {
            Ok(v) => {
                self.stack.push(v);
                Ok(())
            }
            Err(RaisedException) => {
                let exc = self.current_exception.take().unwrap_or(Value::Null);
                self.raise_value(exc)
            }
        }
    }

    fn resolve_method(&mut self, class: ObjRef, name_obj: ObjRef) -> Option<Value> {
        let key = (class, name_obj);
        if let Some(v) = self.method_cache.get(&key) {
            return Some(*v);
        }
        let mut cur = Some(class);
        while let Some(c) = cur {
            let found = c.as_class().unwrap().methods.borrow().get(name_obj);
            if let Some(v) = found {
                self.method_cache.insert(key, v);
                return Some(v);
            }
            cur = c.as_class().unwrap().superclass.get();
        }
        None
    }

    fn invoke(&mut self, name: Value, arg_count: usize) -> Result<(), RunError> {
        let name_obj = name.as_obj().unwrap();
        let receiver_pos = self.stack.len() - 1 - arg_count;
        let receiver = self.stack[receiver_pos];
        match receiver {
            Value::Obj(o) if o.as_instance().is_some() => {
                let field = o.as_instance().unwrap().fields.borrow().get(name_obj);
                if let Some(field_val) = field {
                    self.stack[receiver_pos] = field_val;
                    return self.call_value(receiver_pos, arg_count);
                }
                let class = o.as_instance().unwrap().class;
                match self.resolve_method(class, name_obj) {
                    Some(Value::Obj(m)) if m.as_closure().is_some() => {
                        self.push_call_frame_or_raise(m, receiver_pos, arg_count, None)
                    }
                    Some(Value::Obj(m)) if m.as_native().is_some() => self.call_native_at(m, receiver_pos, arg_count, true),
                    _ => self.fail(&format!("undefined method '{}'", name_obj.as_string().unwrap().bytes)),
                }
            }
            Value::Obj(o) if o.as_module().is_some() => {
                let value = o.as_module().unwrap().globals.borrow().get(name_obj);
                match value {
                    Some(v) => {
                        self.stack[receiver_pos] = v;
                        self.call_value(receiver_pos, arg_count)
                    }
                    None => self.fail(&format!("module has no member '{}'", name_obj.as_string().unwrap().bytes)),
                }
            }
            _ => self.fail(&format!("type '{}' has no methods", receiver.type_name())),
        }
    }

    fn super_invoke(&mut self, name: Value, arg_count: usize) -> Result<(), RunError> {
        let superclass = self.stack.pop().unwrap().as_obj().expect("super must resolve to a Class");
        let name_obj = name.as_obj().unwrap();
        let receiver_pos = self.stack.len() - 1 - arg_count;
        match self.resolve_method(superclass, name_obj) {
            Some(Value::Obj(m)) if m.as_closure().is_some() => {
                self.push_call_frame_or_raise(m, receiver_pos, arg_count, None)
            }
            Some(Value::Obj(m)) if m.as_native().is_some() => self.call_native_at(m, receiver_pos, arg_count, true),
            _ => self.fail(&format!("undefined superclass method '{}'", name_obj.as_string().unwrap().bytes)),
        }
    }

    // ---- exceptions ----

    fn fail<T>(&mut self, message: &str) -> Result<T, RunError>
    where
        T: Default,
    {
        match self.raise_runtime_error(message.to_string()) {
            Ok(()) => Ok(T::default()),
            Err(e) => Err(e),
        }
    }

    fn fail_typed<T>(&mut self, class_name: &str, message: &str) -> Result<T, RunError>
    where
        T: Default,
    {
        match self.raise_typed(class_name, message.to_string()) {
            Ok(()) => Ok(T::default()),
            Err(e) => Err(e),
        }
    }

    /// Pushes a call frame, or, if the call is malformed (arity mismatch,
    /// stack overflow), raises it as a catchable exception instead of
    /// aborting the run loop outright.
    fn push_call_frame_or_raise(
        &mut self,
        closure_ref: ObjRef,
        base: usize,
        arg_count: usize,
        constructed_instance: Option<Value>,
    ) -> Result<(), RunError> {
        match self.push_call_frame(closure_ref, base, arg_count, constructed_instance) {
            Ok(()) => Ok(()),
            Err(CallFailure::Overflow) => self.raise_typed("StackOverflowException", "stack overflow".to_string()),
            Err(CallFailure::Arity(msg)) => self.raise_runtime_error(msg),
        }
    }

    fn make_exception_value(&mut self, class_name: &str, message: &str) -> Value {
        let class = self.lookup_exception_class(class_name);
        self.maybe_collect();
        let instance = self.heap.alloc_instance(class);
        let key = self.heap.intern("message");
        let msg = Value::Obj(self.heap.intern(message));
        instance.as_instance().unwrap().fields.borrow_mut().put(key, msg);
        Value::Obj(instance)
    }

    fn lookup_exception_class(&mut self, class_name: &str) -> ObjRef {
        let key = self.heap.intern(class_name);
        let found = self.main_module.as_module().unwrap().globals.borrow().get(key);
        match found {
            Some(Value::Obj(c)) if c.as_class().is_some() => c,
            _ => {
                // Bootstrap hasn't run yet (or was skipped): synthesize a
                // bare class so error paths still work in isolation/tests.
                self.maybe_collect();
                let class = self.heap.alloc_class(key);
                self.main_module.as_module().unwrap().globals.borrow_mut().put(key, Value::Obj(class));
                class
            }
        }
    }

    fn raise_runtime_error(&mut self, message: String) -> Result<(), RunError> {
        let value = self.make_exception_value("Exception", &message);
        self.raise_value(value)
    }

    fn raise_typed(&mut self, class_name: &str, message: String) -> Result<(), RunError> {
        let value = self.make_exception_value(class_name, &message);
        self.raise_value(value)
    }

    /// Called by native functions to signal failure ("Native
    /// functions signal failure by raising"): stages an exception of the
    /// named class for `call_native_at` to carry into the handler-stack
    /// walk once the native returns `Err(RaisedException)`.
    pub fn raise_native(&mut self, class_name: &str, message: &str) -> RaisedException {
        let value = self.make_exception_value(class_name, message);
        self.current_exception = Some(value);
        RaisedException
    }

    /// Consumes a pending `eval_break` request, raising `ProgramInterrupt`
    /// at the next instruction boundary ("Cancellation").
    fn check_eval_break(&mut self) -> Result<(), RunError> {
        if self.eval_break.swap(false, Ordering::SeqCst) {
            self.raise_typed("ProgramInterrupt", "evaluation interrupted".to_string())?;
        }
        Ok(())
    }

    fn capture_trace(&self) -> Vec<TraceEntry> {
        self.frames
            .iter()
            .map(|f| {
                let function = f.closure.as_closure().unwrap().function.as_function().unwrap();
                let name = function
                    .name
                    .map(|n| n.as_string().unwrap().bytes.to_string())
                    .unwrap_or_else(|| "<script>".to_string());
                TraceEntry { function_name: name, offset: f.ip, line: function.chunk.line_of(f.ip.saturating_sub(1)) }
            })
            .collect()
    }

    /// Unwinds to the nearest handler, or returns `Err` if none remains
    /// ("exception handler stack walk").
    fn raise_value(&mut self, value: Value) -> Result<(), RunError> {
        loop {
            match self.handlers.pop() {
                None => {
                    let trace = self.capture_trace();
                    return Err(RunError::Exception(value, trace));
                }
                Some(h) => {
                    while self.frames.len() - 1 > h.frame_depth {
                        let f = self.frames.pop().unwrap();
                        self.close_upvalues(f.base);
                    }
                    if self.frames.len() - 1 != h.frame_depth {
                        continue;
                    }
                    self.close_upvalues(h.stack_base);
                    self.stack.truncate(h.stack_base);
                    self.stack.push(value);
                    self.frames.last_mut().unwrap().ip = h.target;
                    return Ok(());
                }
            }
        }
    }

    // ---- arithmetic/comparison helpers ----

    fn binary_numeric(&mut self, a: Value, b: Value, f: impl Fn(f64, f64) -> f64) -> Result<Value, String> {
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => Ok(Value::Number(f(x, y))),
            _ => Err(format!("unsupported operand types for operator: '{}' and '{}'", a.type_name(), b.type_name())),
        }
    }

    fn binary_compare(&mut self, a: Value, b: Value, f: impl Fn(f64, f64) -> bool) -> Result<Value, String> {
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => Ok(Value::Bool(f(x, y))),
            _ => Err(format!("unsupported operand types for comparison: '{}' and '{}'", a.type_name(), b.type_name())),
        }
    }

    /// Numeric/comparison ops "fall through to a method lookup (`__add__`,
    /// etc.) when operands are not both numbers" (§4.2): if `a` is an
    /// Instance whose class defines `dunder`, call it with `b` as the sole
    /// argument instead of raising a type error.
    fn try_dunder_binop(&mut self, a: Value, dunder: &str, b: Value) -> Option<Result<Value, RunError>> {
        let o = a.as_obj()?;
        let instance = o.as_instance()?;
        let name_obj = self.heap.intern(dunder);
        self.resolve_method(instance.class, name_obj)?;
        Some(self.call_method(a, dunder, &[b]))
    }

    // ---- main loop ----

    pub fn run(&mut self, target_depth: usize) -> Result<Value, RunError> {
        loop {
            self.maybe_collect();
            let op = self.read_op();
            match op {
                Op::PushConst => {
                    let v = self.read_constant(false);
                    self.stack.push(v);
                }
                Op::PushConstWide => {
                    let v = self.read_constant(true);
                    self.stack.push(v);
                }
                Op::PushNull => self.stack.push(Value::Null),
                Op::PushTrue => self.stack.push(Value::Bool(true)),
                Op::PushFalse => self.stack.push(Value::Bool(false)),
                Op::Pop => {
                    self.stack.pop();
                }
                Op::Dup => {
                    let v = *self.stack.last().unwrap();
                    self.stack.push(v);
                }
                Op::Add => {
                    let b = self.stack.pop().unwrap();
                    let a = self.stack.pop().unwrap();
                    match (a, b) {
                        (Value::Number(x), Value::Number(y)) => self.stack.push(Value::Number(x + y)),
                        (Value::Obj(x), Value::Obj(y)) if x.as_string().is_some() && y.as_string().is_some() => {
                            let mut s = x.as_string().unwrap().bytes.to_string();
                            s.push_str(&y.as_string().unwrap().bytes);
                            self.maybe_collect();
                            let obj = self.heap.intern(&s);
                            self.stack.push(Value::Obj(obj));
                        }
                        (x, y) => {
                            if let Some(r) = self.try_dunder_binop(x, "__add__", y) {
                                self.stack.push(r?);
                            } else {
                                self.raise_runtime_error(format!(
                                    "unsupported operand types for '+': '{}' and '{}'",
                                    x.type_name(),
                                    y.type_name()
                                ))?;
                            }
                        }
                    }
                }
                Op::Sub | Op::Mul | Op::Div | Op::Mod => {
                    let b = self.stack.pop().unwrap();
                    let a = self.stack.pop().unwrap();
                    let dunder = match op {
                        Op::Sub => "__sub__",
                        Op::Mul => "__mul__",
                        Op::Div => "__div__",
                        Op::Mod => "__mod__",
                        _ => unreachable!(),
                    };
                    if a.as_number().is_none() || b.as_number().is_none() {
                        if let Some(r) = self.try_dunder_binop(a, dunder, b) {
                            self.stack.push(r?);
                            continue;
                        }
                    }
                    let result = self.binary_numeric(a, b, |x, y| match op {
                        Op::Sub => x - y,
                        Op::Mul => x * y,
                        Op::Div => x / y,
                        Op::Mod => x % y,
                        _ => unreachable!(),
                    });
                    match result {
                        Ok(v) => self.stack.push(v),
                        Err(m) => self.raise_runtime_error(m)?,
                    }
                }
                Op::Neg => {
                    let a = self.stack.pop().unwrap();
                    match a.as_number() {
                        Some(n) => self.stack.push(Value::Number(-n)),
                        None => self.raise_runtime_error(format!("cannot negate '{}'", a.type_name()))?,
                    }
                }
                Op::Not => {
                    let a = self.stack.pop().unwrap();
                    self.stack.push(Value::Bool(!a.is_truthy()));
                }
                Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                    let b = self.stack.pop().unwrap();
                    let a = self.stack.pop().unwrap();
                    let dunder = match op {
                        Op::Lt => "__lt__",
                        Op::Le => "__le__",
                        Op::Gt => "__gt__",
                        Op::Ge => "__ge__",
                        _ => unreachable!(),
                    };
                    if a.as_number().is_none() || b.as_number().is_none() {
                        if let Some(r) = self.try_dunder_binop(a, dunder, b) {
                            self.stack.push(r?);
                            continue;
                        }
                    }
                    let result = self.binary_compare(a, b, |x, y| match op {
                        Op::Lt => x < y,
                        Op::Le => x <= y,
                        Op::Gt => x > y,
                        Op::Ge => x >= y,
                        _ => unreachable!(),
                    });
                    match result {
                        Ok(v) => self.stack.push(v),
                        Err(m) => self.raise_runtime_error(m)?,
                    }
                }
                Op::Eq => {
                    let b = self.stack.pop().unwrap();
                    let a = self.stack.pop().unwrap();
                    if let Some(r) = self.try_dunder_binop(a, "__eq__", b) {
                        self.stack.push(r?);
                    } else {
                        self.stack.push(Value::Bool(a == b));
                    }
                }
                Op::Neq => {
                    let b = self.stack.pop().unwrap();
                    let a = self.stack.pop().unwrap();
                    if let Some(r) = self.try_dunder_binop(a, "__eq__", b) {
                        self.stack.push(Value::Bool(!r?.is_truthy()));
                    } else {
                        self.stack.push(Value::Bool(a != b));
                    }
                }
                Op::GetLocal => {
                    let slot = self.read_u8() as usize;
                    let base = self.frames.last().unwrap().base;
                    self.stack.push(self.stack[base + slot]);
                }
                Op::SetLocal => {
                    let slot = self.read_u8() as usize;
                    let base = self.frames.last().unwrap().base;
                    let v = *self.stack.last().unwrap();
                    self.stack[base + slot] = v;
                }
                Op::GetGlobal => {
                    let name = self.read_constant(false);
                    let name_obj = name.as_obj().unwrap();
                    let module = self.current_module();
                    let found = module
                        .as_module()
                        .unwrap()
                        .globals
                        .borrow()
                        .get(name_obj)
                        .or_else(|| self.main_module.as_module().unwrap().globals.borrow().get(name_obj));
                    match found {
                        Some(v) => self.stack.push(v),
                        None => {
                            let msg = format!("undefined name '{}'", name_obj.as_string().unwrap().bytes);
                            self.raise_runtime_error(msg)?;
                        }
                    }
                }
                Op::SetGlobal => {
                    let name = self.read_constant(false);
                    let name_obj = name.as_obj().unwrap();
                    let module = self.current_module();
                    let v = *self.stack.last().unwrap();
                    let existed = module.as_module().unwrap().globals.borrow().get(name_obj).is_some();
                    if existed {
                        module.as_module().unwrap().globals.borrow_mut().put(name_obj, v);
                    } else {
                        let msg = format!("undefined name '{}'", name_obj.as_string().unwrap().bytes);
                        self.raise_runtime_error(msg)?;
                    }
                }
                Op::DefineGlobal => {
                    let name = self.read_constant(false);
                    let name_obj = name.as_obj().unwrap();
                    let module = self.current_module();
                    let v = self.stack.pop().unwrap();
                    module.as_module().unwrap().globals.borrow_mut().put(name_obj, v);
                }
                Op::GetUpvalue => {
                    let idx = self.read_u8() as usize;
                    let up = self.frames.last().unwrap().closure.as_closure().unwrap().upvalues[idx];
                    let val = match &*up.as_upvalue().unwrap().borrow() {
                        UpvalueState::Open(si) => self.stack[*si],
                        UpvalueState::Closed(v) => *v,
                    };
                    self.stack.push(val);
                }
                Op::SetUpvalue => {
                    let idx = self.read_u8() as usize;
                    let up = self.frames.last().unwrap().closure.as_closure().unwrap().upvalues[idx];
                    let v = *self.stack.last().unwrap();
                    match &mut *up.as_upvalue().unwrap().borrow_mut() {
                        UpvalueState::Open(si) => self.stack[*si] = v,
                        UpvalueState::Closed(c) => *c = v,
                    }
                }
                Op::CloseUpvalue => {
                    let idx = self.stack.len() - 1;
                    self.close_upvalues(idx);
                    self.stack.pop();
                }
                Op::Jump => {
                    let target = self.read_u16() as usize;
                    self.frames.last_mut().unwrap().ip = target;
                }
                Op::JumpIfFalse => {
                    let target = self.read_u16() as usize;
                    if !self.stack.last().unwrap().is_truthy() {
                        self.frames.last_mut().unwrap().ip = target;
                    }
                }
                Op::JumpIfTrue => {
                    let target = self.read_u16() as usize;
                    if self.stack.last().unwrap().is_truthy() {
                        self.frames.last_mut().unwrap().ip = target;
                    }
                }
                Op::Loop => {
                    let target = self.read_u16() as usize;
                    self.frames.last_mut().unwrap().ip = target;
                    self.check_eval_break()?;
                }
                Op::ForIter => {
                    let target = self.read_u16() as usize;
                    let index_val = self.stack.pop().unwrap();
                    let iterable_val = self.stack.pop().unwrap();
                    let index = index_val.as_number().unwrap() as usize;
                    let next = self.iterate_next(iterable_val, index);
                    match next {
                        Some(elem) => {
                            self.stack.push(iterable_val);
                            self.stack.push(Value::Number((index + 1) as f64));
                            self.stack.push(elem);
                        }
                        None => {
                            self.frames.last_mut().unwrap().ip = target;
                        }
                    }
                }
                Op::Call => {
                    self.check_eval_break()?;
                    let arg_count = self.read_u8() as usize;
                    let base = self.stack.len() - 1 - arg_count;
                    self.call_value(base, arg_count)?;
                }
                Op::Invoke => {
                    self.check_eval_break()?;
                    let name = self.read_constant(false);
                    let arg_count = self.read_u8() as usize;
                    self.invoke(name, arg_count)?;
                }
                Op::SuperInvoke => {
                    self.check_eval_break()?;
                    let name = self.read_constant(false);
                    let arg_count = self.read_u8() as usize;
                    self.super_invoke(name, arg_count)?;
                }
                Op::Return => {
                    let result = self.stack.pop().unwrap();
                    let frame = self.frames.pop().unwrap();
                    self.close_upvalues(frame.base);
                    self.stack.truncate(frame.base);
                    self.handlers.retain(|h| h.frame_depth < self.frames.len());
                    let value = frame.constructed_instance.unwrap_or(result);
                    self.stack.push(value);
                    if self.frames.len() == target_depth {
                        return Ok(self.stack.pop().unwrap());
                    }
                }
                Op::Closure => {
                    let wide = false;
                    let func_val = self.read_constant(wide);
                    let function_obj = func_val.as_obj().unwrap();
                    let upvalue_count = function_obj.as_function().unwrap().upvalues.len();
                    let base = self.frames.last().unwrap().base;
                    let mut upvalues = Vec::with_capacity(upvalue_count);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_u8() != 0;
                        let index = self.read_u8() as usize;
                        if is_local {
                            upvalues.push(self.capture_upvalue(base + index));
                        } else {
                            upvalues.push(self.frames.last().unwrap().closure.as_closure().unwrap().upvalues[index]);
                        }
                    }
                    self.maybe_collect();
                    let closure = self.heap.alloc_closure(ObjClosure { function: function_obj, upvalues });
                    self.stack.push(Value::Obj(closure));
                }
                Op::NewClass => {
                    let name = self.read_constant(false);
                    self.maybe_collect();
                    let class = self.heap.alloc_class(name.as_obj().unwrap());
                    self.stack.push(Value::Obj(class));
                }
                Op::Inherit => {
                    let subclass = self.stack.pop().unwrap().as_obj().unwrap();
                    let superclass = *self.stack.last().unwrap();
                    match superclass.as_obj().filter(|o| o.as_class().is_some()) {
                        Some(sc) => {
                            let methods: Vec<(ObjRef, Value)> = sc.as_class().unwrap().methods.borrow().iter().collect();
                            for (k, v) in methods {
                                subclass.as_class().unwrap().methods.borrow_mut().put(k, v);
                            }
                            subclass.as_class().unwrap().superclass.set(Some(sc));
                        }
                        None => self.raise_runtime_error("superclass must be a class".to_string())?,
                    }
                }
                Op::Method => {
                    let name = self.read_constant(false);
                    let method = self.stack.pop().unwrap();
                    let class = self.stack.last().unwrap().as_obj().unwrap();
                    class.as_class().unwrap().methods.borrow_mut().put(name.as_obj().unwrap(), method);
                }
                Op::GetField => {
                    let name = self.read_constant(false);
                    let target = self.stack.pop().unwrap();
                    match target.as_obj().filter(|o| o.as_instance().is_some()) {
                        Some(o) => {
                            let name_obj = name.as_obj().unwrap();
                            let field = o.as_instance().unwrap().fields.borrow().get(name_obj);
                            match field {
                                Some(v) => self.stack.push(v),
                                None => {
                                    let class = o.as_instance().unwrap().class;
                                    match self.resolve_method(class, name_obj) {
                                        Some(m) => {
                                            self.maybe_collect();
                                            let bound = self.heap.alloc_bound_method(target, m);
                                            self.stack.push(Value::Obj(bound));
                                        }
                                        None => {
                                            let msg = format!("undefined field '{}'", name_obj.as_string().unwrap().bytes);
                                            self.raise_runtime_error(msg)?;
                                        }
                                    }
                                }
                            }
                        }
                        None => match target.as_obj().filter(|o| o.as_module().is_some()) {
                            Some(o) => {
                                let v = o.as_module().unwrap().globals.borrow().get(name.as_obj().unwrap());
                                match v {
                                    Some(v) => self.stack.push(v),
                                    None => self.raise_runtime_error("undefined module member".to_string())?,
                                }
                            }
                            None => self.raise_runtime_error(format!("'{}' has no fields", target.type_name()))?,
                        },
                    }
                }
                Op::SetField => {
                    let name = self.read_constant(false);
                    let value = self.stack.pop().unwrap();
                    let target = self.stack.pop().unwrap();
                    match target.as_obj().filter(|o| o.as_instance().is_some()) {
                        Some(o) => {
                            o.as_instance().unwrap().fields.borrow_mut().put(name.as_obj().unwrap(), value);
                            self.stack.push(value);
                        }
                        None => self.raise_runtime_error(format!("'{}' has no fields", target.type_name()))?,
                    }
                }
                Op::NewList => {
                    let _count_operand = self.read_u16();
                    self.maybe_collect();
                    let list = self.heap.alloc_list(Vec::new());
                    self.stack.push(Value::Obj(list));
                }
                Op::ListAppend => {
                    let elem = self.stack.pop().unwrap();
                    let list = self.stack.last().unwrap().as_obj().unwrap();
                    list.as_list().unwrap().borrow_mut().push(elem);
                }
                Op::NewTuple => {
                    let count = self.read_u16() as usize;
                    let items = self.stack.split_off(self.stack.len() - count);
                    self.maybe_collect();
                    let tuple = self.heap.alloc_tuple(items.into_boxed_slice());
                    self.stack.push(Value::Obj(tuple));
                }
                Op::NewTable => {
                    self.maybe_collect();
                    let table = self.heap.alloc_table();
                    self.stack.push(Value::Obj(table));
                }
                Op::SubscriptGet => {
                    let index = self.stack.pop().unwrap();
                    let target = self.stack.pop().unwrap();
                    match self.subscript_get(target, index) {
                        Ok(v) => self.stack.push(v),
                        Err(m) => self.raise_runtime_error(m)?,
                    }
                }
                Op::SubscriptSet => {
                    let value = self.stack.pop().unwrap();
                    let index = self.stack.pop().unwrap();
                    let target = self.stack.pop().unwrap();
                    match self.subscript_set(target, index, value) {
                        Ok(()) => self.stack.push(value),
                        Err(m) => self.raise_runtime_error(m)?,
                    }
                }
                Op::SetupTry => {
                    let target = self.read_u16() as usize;
                    self.handlers.push(Handler {
                        frame_depth: self.frames.len() - 1,
                        stack_base: self.stack.len(),
                        target,
                    });
                }
                Op::PopHandler => {
                    self.handlers.pop();
                }
                Op::Raise => {
                    let value = self.stack.pop().unwrap();
                    self.raise_value(value)?;
                }
                Op::Reraise => {
                    let value = self.stack.pop().unwrap();
                    self.raise_value(value)?;
                }
                Op::Halt => return Ok(Value::Null),
            }
        }
    }

    fn iterate_next(&mut self, iterable: Value, index: usize) -> Option<Value> {
        match iterable {
            Value::Obj(o) if o.as_list().is_some() => o.as_list().unwrap().borrow().get(index).copied(),
            Value::Obj(o) if o.as_tuple().is_some() => o.as_tuple().unwrap().get(index).copied(),
            Value::Obj(o) if o.as_string().is_some() => {
                let ch = o.as_string().unwrap().bytes.chars().nth(index)?;
                self.maybe_collect();
                Some(Value::Obj(self.heap.intern(&ch.to_string())))
            }
            _ => None,
        }
    }

    fn subscript_get(&mut self, target: Value, index: Value) -> Result<Value, String> {
        match target {
            Value::Obj(o) if o.as_list().is_some() => {
                let i = index.as_number().ok_or("list index must be a number")? as usize;
                o.as_list().unwrap().borrow().get(i).copied().ok_or_else(|| "list index out of range".to_string())
            }
            Value::Obj(o) if o.as_tuple().is_some() => {
                let i = index.as_number().ok_or("tuple index must be a number")? as usize;
                o.as_tuple().unwrap().get(i).copied().ok_or_else(|| "tuple index out of range".to_string())
            }
            Value::Obj(o) if o.as_table().is_some() => {
                Ok(o.as_table().unwrap().borrow().get(&index).unwrap_or(Value::Null))
            }
            Value::Obj(o) if o.as_string().is_some() => {
                let i = index.as_number().ok_or("string index must be a number")? as usize;
                let s = &o.as_string().unwrap().bytes;
                s.chars().nth(i).map(|c| c.to_string()).ok_or_else(|| "string index out of range".to_string())
                    .map(|s| Value::Obj(self.heap.intern(&s)))
            }
            _ => Err(format!("'{}' is not subscriptable", target.type_name())),
        }
    }

    fn subscript_set(&mut self, target: Value, index: Value, value: Value) -> Result<(), String> {
        match target {
            Value::Obj(o) if o.as_list().is_some() => {
                let i = index.as_number().ok_or("list index must be a number")? as usize;
                let mut list = o.as_list().unwrap().borrow_mut();
                if i >= list.len() {
                    return Err("list index out of range".to_string());
                }
                list[i] = value;
                Ok(())
            }
            Value::Obj(o) if o.as_table().is_some() => {
                o.as_table().unwrap().borrow_mut().put(index, value);
                Ok(())
            }
            Value::Obj(o) if o.as_tuple().is_some() => Err("tuple does not support item assignment".to_string()),
            _ => Err(format!("'{}' does not support item assignment", target.type_name())),
        }
    }
}
