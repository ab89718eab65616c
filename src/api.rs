// File: src/api.rs
//
// Embedding slot facade. The VM already exposes `call_function`,
// `get_field`/`set_field`, `get_global`/`define_global`, `raise`, and
// `stacktrace` as plain Rust methods; this module wraps them in the
// positive/negative-indexed "slot" surface a host written against the
// VM's value model expects, the way a Lua embedder pushes arguments onto
// a stack rather than building a `Vec<Value>` by hand. There is no teacher
// file to ground this shape on directly, so it is built as a thin layer
// over `Vm`'s own public calling convention rather than a second stack
// representation.

use crate::errors::RaisedException;
use crate::object::{display_value, ObjRef, TraceEntry};
use crate::value::Value;
use crate::vm::{RunError, Vm};

/// A host-owned scratch area of slots, independent of the VM's own value
/// stack. Natives receive their arguments as a plain `&[Value]`; `Slots`
/// is for host code building up arguments before a `call`, or reading a
/// native's `args` with the same indexed accessors.
pub struct Slots<'vm> {
    vm: &'vm mut Vm,
    values: Vec<Value>,
}

impl<'vm> Slots<'vm> {
    pub fn new(vm: &'vm mut Vm) -> Self {
        Self { vm, values: Vec::new() }
    }

    /// Wraps an existing window (e.g. a native function's `args` slice) so
    /// it can be read with the same slot accessors.
    pub fn from_values(vm: &'vm mut Vm, values: &[Value]) -> Self {
        Self { vm, values: values.to_vec() }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Resolves a slot index: non-negative counts from the bottom of the
    /// window, negative counts from the top (`-1` is the last pushed slot),
    /// matching the positive/negative indexing the host API promises.
    fn resolve(&self, index: isize) -> Option<usize> {
        if index >= 0 {
            let i = index as usize;
            if i < self.values.len() {
                Some(i)
            } else {
                None
            }
        } else {
            let back = (-index) as usize;
            self.values.len().checked_sub(back)
        }
    }

    pub fn peek(&self, index: isize) -> Value {
        self.resolve(index).map(|i| self.values[i]).unwrap_or(Value::Null)
    }

    pub fn pop(&mut self) -> Value {
        self.values.pop().unwrap_or(Value::Null)
    }

    pub fn push_null(&mut self) {
        self.values.push(Value::Null);
    }

    pub fn push_bool(&mut self, b: bool) {
        self.values.push(Value::Bool(b));
    }

    pub fn push_number(&mut self, n: f64) {
        self.values.push(Value::Number(n));
    }

    pub fn push_string(&mut self, s: &str) {
        let obj = self.vm.intern(s);
        self.values.push(Value::Obj(obj));
    }

    pub fn push_value(&mut self, v: Value) {
        self.values.push(v);
    }

    pub fn get_number(&mut self, index: isize) -> Result<f64, RunError> {
        match self.peek(index).as_number() {
            Some(n) => Ok(n),
            None => self.type_error(index, "number"),
        }
    }

    pub fn get_string(&mut self, index: isize) -> Result<String, RunError> {
        match self.peek(index).as_obj().and_then(|o| o.as_string().map(|s| s.bytes.to_string())) {
            Some(s) => Ok(s),
            None => self.type_error(index, "string"),
        }
    }

    pub fn get_bool(&mut self, index: isize) -> Result<bool, RunError> {
        match self.peek(index) {
            Value::Bool(b) => Ok(b),
            _ => self.type_error(index, "bool"),
        }
    }

    fn type_error<T>(&mut self, index: isize, expected: &str) -> Result<T, RunError> {
        let got = self.peek(index).type_name();
        let msg = format!("expected {} at slot {}, got {}", expected, index, got);
        Err(self.vm.raise("TypeException", msg))
    }

    /// Calls the value at slot 0 of the window with every other slot as an
    /// argument, draining the window.
    pub fn call(&mut self) -> Result<Value, RunError> {
        if self.values.is_empty() {
            return Err(self.vm.raise("TypeException", "call on an empty slot window".to_string()));
        }
        let callee = self.values.remove(0);
        let args = std::mem::take(&mut self.values);
        self.vm.call_dynamic(callee, &args)
    }

    pub fn call_method(&mut self, receiver: Value, name: &str) -> Result<Value, RunError> {
        let args = std::mem::take(&mut self.values);
        self.vm.call_method(receiver, name, &args)
    }

    pub fn into_vec(self) -> Vec<Value> {
        self.values
    }
}

/// Higher-level embedding operations that don't need a slot window:
/// fields, globals, iteration, raising, and stack traces. Thin wrappers
/// over `Vm`'s own public methods, kept here so a host only has to import
/// one module for the whole embedding surface.
pub struct Api<'vm> {
    vm: &'vm mut Vm,
}

impl<'vm> Api<'vm> {
    pub fn new(vm: &'vm mut Vm) -> Self {
        Self { vm }
    }

    pub fn slots(&mut self) -> Slots<'_> {
        Slots::new(self.vm)
    }

    pub fn get_field(&mut self, target: Value, name: &str) -> Result<Value, RunError> {
        self.vm.get_field(target, name)
    }

    pub fn set_field(&mut self, target: Value, name: &str, value: Value) -> Result<(), RunError> {
        self.vm.set_field(target, name, value)
    }

    pub fn get_global(&mut self, module: ObjRef, name: &str) -> Option<Value> {
        self.vm.get_global(module, name)
    }

    pub fn set_global(&mut self, module: ObjRef, name: &str, value: Value) {
        self.vm.define_global(module, name, value);
    }

    /// Iterates `iterable`, yielding `(index, element)` pairs the way a
    /// `for .. in` loop does, without needing bytecode to drive it.
    pub fn iterate(&mut self, iterable: Value) -> Iter<'_, 'vm> {
        Iter { api: self, iterable, index: 0 }
    }

    pub fn raise(&mut self, class_name: &str, message: impl Into<String>) -> RunError {
        self.vm.raise(class_name, message.into())
    }

    pub fn stacktrace(&self) -> Vec<TraceEntry> {
        self.vm.stacktrace()
    }

    pub fn display(&self, value: &Value) -> String {
        display_value(value)
    }
}

pub struct Iter<'a, 'vm> {
    api: &'a mut Api<'vm>,
    iterable: Value,
    index: usize,
}

impl<'a, 'vm> Iterator for Iter<'a, 'vm> {
    type Item = (usize, Value);

    fn next(&mut self) -> Option<Self::Item> {
        let elem = self.api.vm.iterate_value(self.iterable, self.index)?;
        let at = self.index;
        self.index += 1;
        Some((at, elem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::VmConfig;

    fn new_vm() -> Vm {
        let mut vm = Vm::new(VmConfig::default());
        vm.bootstrap();
        vm
    }

    #[test]
    fn slots_push_and_call_a_closure() {
        let mut vm = new_vm();
        let result = vm.interpret("fun add(a, b) { return a + b }");
        assert!(matches!(result, crate::vm::InterpretResult::Ok(_)));
        let name = vm.intern("add");
        let callee = vm.get_global(vm.main_module, "add").unwrap_or_else(|| {
            let _ = name;
            panic!("add should be defined")
        });
        let mut slots = Slots::new(&mut vm);
        slots.push_value(callee);
        slots.push_number(2.0);
        slots.push_number(3.0);
        let result = slots.call();
        match result {
            Ok(v) => assert_eq!(v.as_number(), Some(5.0)),
            Err(_) => panic!("call should succeed"),
        }
    }

    #[test]
    fn get_field_resolves_methods_as_bound_methods() {
        let mut vm = new_vm();
        let result = vm.interpret("class Greeter { fun hello() { return \"hi\" } } var g = Greeter()");
        assert!(matches!(result, crate::vm::InterpretResult::Ok(_)));
        let g = vm.get_global(vm.main_module, "g").expect("g should be defined");
        let mut api = Api::new(&mut vm);
        let bound = api.get_field(g, "hello").expect("hello should resolve");
        assert_eq!(bound.type_name(), "BoundMethod");
    }

    #[test]
    fn type_error_raises_type_exception() {
        let mut vm = new_vm();
        let mut slots = Slots::new(&mut vm);
        slots.push_bool(true);
        let err = slots.get_number(0).unwrap_err();
        match err {
            RunError::Exception(v, _) => {
                assert_eq!(v.type_name(), "Instance");
            }
            RunError::Fatal(_) => panic!("expected a catchable exception"),
        }
    }
}
