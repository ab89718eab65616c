// File: src/builtins.rs
//
// Bootstrap for the minimal native surface and the Exception class
// hierarchy: enough natives to exercise the Native object kind and calling
// convention, not a full standard library. `install` is called once by
// `Vm::bootstrap` before any user source is interpreted.

use crate::errors::RaisedException;
use crate::object::{display_value, ObjNative};
use crate::value::Value;
use crate::vm::Vm;

pub fn install(vm: &mut Vm) {
    install_exception_hierarchy(vm);
    install_import_and_isinstance(vm);
    install_core_natives(vm);
}

/// `Exception` is the root; the interpreter itself raises instances of the
/// three named subclasses (`TypeException`, `StackOverflowException`,
/// `ProgramInterrupt`) for stack overflow, bad-callee, and cooperative
/// interrupt conditions. `new` is a native method rather than compiled
/// Lumen since it only needs to stash a message field.
fn install_exception_hierarchy(vm: &mut Vm) {
    let module = vm.main_module;
    let base = alloc_exception_class(vm, "Exception", None);
    vm.define_global(module, "Exception", Value::Obj(base));
    for name in ["TypeException", "StackOverflowException", "ProgramInterrupt"] {
        let class = alloc_exception_class(vm, name, Some(base));
        vm.define_global(module, name, Value::Obj(class));
    }
}

fn alloc_exception_class(vm: &mut Vm, name: &str, superclass: Option<crate::object::ObjRef>) -> crate::object::ObjRef {
    let name_obj = vm.heap.intern(name);
    let class = vm.heap.alloc_class(name_obj);
    let init_name = vm.heap.intern("new");
    let init_native = vm.heap.alloc_native(ObjNative { name: init_name, arity: 1, func: exception_init });
    class.as_class().unwrap().methods.borrow_mut().put(init_name, Value::Obj(init_native));
    if let Some(sc) = superclass {
        class.as_class().unwrap().superclass.set(Some(sc));
    }
    class
}

/// `args[0]` is the receiver (construction always passes `self` first, see
/// `Vm::construct_instance`); `args[1]`, if present, becomes the `message`
/// field, stringified if it isn't already a string.
fn exception_init(vm: &mut Vm, args: &[Value]) -> Result<Value, RaisedException> {
    let instance = *args.first().ok_or(RaisedException)?;
    let message = match args.get(1) {
        Some(Value::Obj(o)) if o.as_string().is_some() => Value::Obj(*o),
        Some(other) => Value::Obj(vm.heap.intern(&display_value(other))),
        None => Value::Obj(vm.heap.intern("")),
    };
    if let Value::Obj(o) = instance {
        if let Some(inst) = o.as_instance() {
            let key = vm.heap.intern("message");
            inst.fields.borrow_mut().put(key, message);
        }
    }
    Ok(instance)
}

/// `__import__`/`__isinstance__` are compiler-emitted calls (the `import`
/// statement and the `try/except: Class` isinstance test), not
/// language-visible builtins; they're installed as ordinary globals rather
/// than opcodes to keep the instruction set small.
fn install_import_and_isinstance(vm: &mut Vm) {
    let module = vm.main_module;
    vm.define_native(module, "__import__", 1, native_import);
    vm.define_native(module, "__isinstance__", 2, native_isinstance);
}

fn native_import(vm: &mut Vm, args: &[Value]) -> Result<Value, RaisedException> {
    let name_obj = match args.first() {
        Some(Value::Obj(o)) if o.as_string().is_some() => *o,
        _ => return Err(vm.raise_native("TypeException", "import name must be a string")),
    };
    let name = name_obj.as_string().unwrap().bytes.to_string();
    match vm.import_module(&name) {
        Ok(module) => Ok(Value::Obj(module)),
        Err(msg) => Err(vm.raise_native("Exception", &format!("failed to import '{}': {}", name, msg))),
    }
}

fn native_isinstance(vm: &mut Vm, args: &[Value]) -> Result<Value, RaisedException> {
    let value = *args.first().ok_or(RaisedException)?;
    let class = match args.get(1) {
        Some(Value::Obj(o)) if o.as_class().is_some() => *o,
        _ => return Err(vm.raise_native("TypeException", "isinstance target must be a class")),
    };
    let instance_class = match value {
        Value::Obj(o) if o.as_instance().is_some() => o.as_instance().unwrap().class,
        _ => return Ok(Value::Bool(false)),
    };
    let mut cur = Some(instance_class);
    while let Some(c) = cur {
        if c == class {
            return Ok(Value::Bool(true));
        }
        cur = c.as_class().unwrap().superclass.get();
    }
    Ok(Value::Bool(false))
}

fn install_core_natives(vm: &mut Vm) {
    let module = vm.main_module;
    vm.define_native(module, "print", 0, native_print);
    vm.define_native(module, "type", 1, native_type);
    vm.define_native(module, "len", 1, native_len);
    vm.define_native(module, "assert", 1, native_assert);
    vm.define_native(module, "clock", 0, native_clock);
}

fn native_print(_vm: &mut Vm, args: &[Value]) -> Result<Value, RaisedException> {
    let rendered: Vec<String> = args.iter().map(display_value).collect();
    println!("{}", rendered.join(" "));
    Ok(Value::Null)
}

fn native_type(vm: &mut Vm, args: &[Value]) -> Result<Value, RaisedException> {
    let name = args.first().map(|v| v.type_name()).unwrap_or("null");
    Ok(Value::Obj(vm.heap.intern(name)))
}

fn native_len(vm: &mut Vm, args: &[Value]) -> Result<Value, RaisedException> {
    match args.first() {
        Some(Value::Obj(o)) if o.as_string().is_some() => {
            Ok(Value::Number(o.as_string().unwrap().bytes.chars().count() as f64))
        }
        Some(Value::Obj(o)) if o.as_list().is_some() => Ok(Value::Number(o.as_list().unwrap().borrow().len() as f64)),
        Some(Value::Obj(o)) if o.as_tuple().is_some() => Ok(Value::Number(o.as_tuple().unwrap().len() as f64)),
        Some(Value::Obj(o)) if o.as_table().is_some() => Ok(Value::Number(o.as_table().unwrap().borrow().len() as f64)),
        Some(v) => Err(vm.raise_native("TypeException", &format!("object of type '{}' has no len()", v.type_name()))),
        None => Err(vm.raise_native("TypeException", "len() takes exactly one argument")),
    }
}

fn native_assert(vm: &mut Vm, args: &[Value]) -> Result<Value, RaisedException> {
    let condition = args.first().copied().unwrap_or(Value::Null);
    if condition.is_truthy() {
        return Ok(Value::Null);
    }
    let message = match args.get(1) {
        Some(v) => display_value(v),
        None => "assertion failed".to_string(),
    };
    Err(vm.raise_native("Exception", &message))
}

fn native_clock(_vm: &mut Vm, _args: &[Value]) -> Result<Value, RaisedException> {
    let elapsed = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    Ok(Value::Number(elapsed.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{InterpretResult, VmConfig};

    fn new_vm() -> Vm {
        let mut vm = Vm::new(VmConfig::default());
        vm.bootstrap();
        vm
    }

    #[test]
    fn exception_hierarchy_supports_isinstance() {
        let mut vm = new_vm();
        let result = vm.interpret("var e = TypeException(\"bad\"); print(__isinstance__(e, Exception))");
        assert!(matches!(result, InterpretResult::Ok(_)), "expected Ok, compiler/runtime errors indicate a regression");
    }

    #[test]
    fn len_reports_string_and_list_length() {
        let mut vm = new_vm();
        let result = vm.interpret("var l = [1, 2, 3]; assert(len(l) == 3); assert(len(\"abcd\") == 4)");
        assert!(matches!(result, InterpretResult::Ok(_)));
    }

    #[test]
    fn assert_failure_raises_a_catchable_exception() {
        let mut vm = new_vm();
        let result = vm.interpret("try { assert(false, \"nope\") } except e { print(e) }");
        assert!(matches!(result, InterpretResult::Ok(_)));
    }
}
