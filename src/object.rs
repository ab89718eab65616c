// File: src/object.rs
//
// Heap object model ("Object"). Every object kind is a variant of
// a single `Obj` enum rather than separate structs behind a common header,
// so the GC's mark/sweep code and the allocation list live in one place
// without unsafe downcasting between kinds — only the object *reference*
// (a raw, non-owning pointer into the heap) needs unsafe to dereference.

use crate::bytecode::Chunk;
use crate::table::StringTable;
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::hash::{Hash, Hasher};
use std::ptr::NonNull;

#[derive(Clone, Copy)]
pub struct UpvalueDesc {
    pub is_local: bool,
    pub index: u8,
}

pub struct ObjString {
    pub bytes: Box<str>,
    pub hash: u32,
}

pub struct ObjFunction {
    pub name: Option<ObjRef>,
    pub arity: u8,
    pub defaults: Vec<Value>,
    pub variadic: bool,
    pub chunk: Chunk,
    pub module: Option<ObjRef>,
    pub upvalues: Vec<UpvalueDesc>,
}

pub struct ObjClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

pub enum UpvalueState {
    Open(usize),
    Closed(Value),
}

pub type NativeFn = fn(&mut crate::vm::Vm, &[Value]) -> Result<Value, crate::errors::RaisedException>;

pub struct ObjNative {
    pub name: ObjRef,
    pub arity: u8,
    pub func: NativeFn,
}

pub struct ObjClass {
    pub name: ObjRef,
    pub superclass: Cell<Option<ObjRef>>,
    pub methods: RefCell<StringTable>,
}

pub struct ObjInstance {
    pub class: ObjRef,
    pub fields: RefCell<StringTable>,
}

pub struct ObjModule {
    pub name: ObjRef,
    pub globals: RefCell<StringTable>,
    pub path: Option<String>,
}

pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: Value,
}

#[derive(Clone)]
pub struct TraceEntry {
    pub function_name: String,
    pub offset: usize,
    pub line: usize,
}

pub struct ObjUserdata {
    pub tag: &'static str,
    pub data: RefCell<Box<dyn std::any::Any>>,
    pub finalizer: Option<fn(&mut dyn std::any::Any)>,
}

pub enum ObjKind {
    String(ObjString),
    List(RefCell<Vec<Value>>),
    Tuple(Box<[Value]>),
    Table(RefCell<crate::table::ValueTable>),
    Function(ObjFunction),
    Closure(ObjClosure),
    Upvalue(RefCell<UpvalueState>),
    Native(ObjNative),
    Class(ObjClass),
    Instance(ObjInstance),
    Module(ObjModule),
    BoundMethod(ObjBoundMethod),
    StackTrace(Vec<TraceEntry>),
    Userdata(ObjUserdata),
}

/// An object header plus payload: the mark bit and intrusive
/// next-pointer live here; `next` threads every live object into the
/// heap's single allocation list (invariant 1).
pub struct Obj {
    pub marked: Cell<bool>,
    pub next: Cell<Option<ObjRef>>,
    pub kind: ObjKind,
}

/// A non-owning reference to a heap object. Copy, so Values carrying an
/// `Obj` are cheap to duplicate the way numbers are; the Heap is the sole
/// owner and frees the pointee during sweep.
#[derive(Clone, Copy)]
pub struct ObjRef(pub NonNull<Obj>);

impl ObjRef {
    pub fn get(&self) -> &Obj {
        // SAFETY: every ObjRef handed out by the heap stays valid until the
        // object is swept; a live ObjRef is by definition reachable and so
        // not yet freed. Callers must not retain an ObjRef across a sweep
        // without having made the object reachable again first.
        unsafe { self.0.as_ref() }
    }

    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }

    pub fn marked(&self) -> bool {
        self.get().marked.get()
    }

    pub fn mark(&self) {
        self.get().marked.set(true);
    }

    pub fn unmark(&self) {
        self.get().marked.set(false);
    }

    pub fn kind_name(&self) -> &'static str {
        match &self.get().kind {
            ObjKind::String(_) => "String",
            ObjKind::List(_) => "List",
            ObjKind::Tuple(_) => "Tuple",
            ObjKind::Table(_) => "Table",
            ObjKind::Function(_) => "Function",
            ObjKind::Closure(_) => "Closure",
            ObjKind::Upvalue(_) => "Upvalue",
            ObjKind::Native(_) => "Native",
            ObjKind::Class(_) => "Class",
            ObjKind::Instance(_) => "Instance",
            ObjKind::Module(_) => "Module",
            ObjKind::BoundMethod(_) => "BoundMethod",
            ObjKind::StackTrace(_) => "StackTrace",
            ObjKind::Userdata(_) => "Userdata",
        }
    }

    pub fn as_string(&self) -> Option<&ObjString> {
        match &self.get().kind {
            ObjKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&RefCell<Vec<Value>>> {
        match &self.get().kind {
            ObjKind::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Value]> {
        match &self.get().kind {
            ObjKind::Tuple(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&RefCell<crate::table::ValueTable>> {
        match &self.get().kind {
            ObjKind::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&ObjFunction> {
        match &self.get().kind {
            ObjKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&ObjClosure> {
        match &self.get().kind {
            ObjKind::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_upvalue(&self) -> Option<&RefCell<UpvalueState>> {
        match &self.get().kind {
            ObjKind::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_native(&self) -> Option<&ObjNative> {
        match &self.get().kind {
            ObjKind::Native(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ObjClass> {
        match &self.get().kind {
            ObjKind::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&ObjInstance> {
        match &self.get().kind {
            ObjKind::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_module(&self) -> Option<&ObjModule> {
        match &self.get().kind {
            ObjKind::Module(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_bound_method(&self) -> Option<&ObjBoundMethod> {
        match &self.get().kind {
            ObjKind::BoundMethod(b) => Some(b),
            _ => None,
        }
    }
}

impl PartialEq for ObjRef {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for ObjRef {}

impl Hash for ObjRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

/// Renders a Value the way the REPL/`print` native does. Does not allocate
/// on the heap or intern anything, so it is safe to call mid-collection.
pub fn display_value(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Value::Handle(h) => format!("<handle {}>", h),
        Value::Obj(o) => match &o.get().kind {
            ObjKind::String(s) => s.bytes.to_string(),
            ObjKind::List(l) => {
                let items: Vec<String> = l.borrow().iter().map(display_value).collect();
                format!("[{}]", items.join(", "))
            }
            ObjKind::Tuple(t) => {
                let items: Vec<String> = t.iter().map(display_value).collect();
                if items.len() == 1 {
                    format!("({},)", items[0])
                } else {
                    format!("({})", items.join(", "))
                }
            }
            ObjKind::Table(t) => {
                let items: Vec<String> =
                    t.borrow().iter().map(|(k, v)| format!("{}: {}", display_value(k), display_value(v))).collect();
                format!("{{{}}}", items.join(", "))
            }
            ObjKind::Function(f) => match &f.name {
                Some(n) => format!("<fn {}>", n.as_string().unwrap().bytes),
                None => "<script>".to_string(),
            },
            ObjKind::Closure(c) => display_value(&Value::Obj(c.function)),
            ObjKind::Upvalue(_) => "<upvalue>".to_string(),
            ObjKind::Native(n) => format!("<native {}>", n.name.as_string().unwrap().bytes),
            ObjKind::Class(c) => format!("<class {}>", c.name.as_string().unwrap().bytes),
            ObjKind::Instance(i) => {
                format!("<{} instance>", i.class.as_class().unwrap().name.as_string().unwrap().bytes)
            }
            ObjKind::Module(m) => format!("<module {}>", m.name.as_string().unwrap().bytes),
            ObjKind::BoundMethod(b) => display_value(&b.method),
            ObjKind::StackTrace(_) => "<stacktrace>".to_string(),
            ObjKind::Userdata(u) => format!("<userdata {}>", u.tag),
        },
    }
}
