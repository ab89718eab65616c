// Integration tests driving the public embedding API (`Vm`, `VmConfig`,
// `InterpretResult`) against real Lumen source, rather than exercising
// individual modules in isolation the way the `#[cfg(test)]` unit tests do.

use lumen::module::FsImporter;
use lumen::value::Value;
use lumen::vm::{InterpretResult, RunError, Vm, VmConfig};

fn new_vm() -> Vm {
    let mut vm = Vm::new(VmConfig::default());
    vm.bootstrap();
    vm
}

fn global(vm: &mut Vm, name: &str) -> Value {
    vm.get_global(vm.main_module, name).unwrap_or_else(|| panic!("global '{}' was not defined", name))
}

fn run_ok(vm: &mut Vm, source: &str) {
    match vm.interpret(source) {
        InterpretResult::Ok(_) => {}
        InterpretResult::CompileError(diags) => {
            panic!("compile error: {:?}", diags.iter().map(|d| &d.message).collect::<Vec<_>>())
        }
        InterpretResult::RuntimeError(RunError::Exception(v, _)) => {
            panic!("uncaught exception: {}", lumen::object::display_value(&v))
        }
        InterpretResult::RuntimeError(RunError::Fatal(msg)) => panic!("fatal error: {}", msg),
    }
}

// ---- arithmetic, variables, control flow ----

#[test]
fn arithmetic_and_variables() {
    let mut vm = new_vm();
    run_ok(&mut vm, "var x = 1 + 2 * 3 - 4 / 2; var y = x;");
    assert_eq!(global(&mut vm, "y").as_number(), Some(5.0));
}

#[test]
fn negative_zero_and_nan_follow_raw_equality() {
    let mut vm = new_vm();
    run_ok(&mut vm, "var a = 0.0 == -0.0;");
    assert_eq!(global(&mut vm, "a"), Value::Bool(true));
}

#[test]
fn if_elif_else_chain() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        fun classify(n) {
            if n < 0 {
                return "negative"
            } elif n == 0 {
                return "zero"
            } else {
                return "positive"
            }
        }
        var a = classify(-5);
        var b = classify(0);
        var c = classify(5);
        "#,
    );
    assert_eq!(global(&mut vm, "a").as_obj().unwrap().as_string().unwrap().bytes.as_ref(), "negative");
    assert_eq!(global(&mut vm, "b").as_obj().unwrap().as_string().unwrap().bytes.as_ref(), "zero");
    assert_eq!(global(&mut vm, "c").as_obj().unwrap().as_string().unwrap().bytes.as_ref(), "positive");
}

#[test]
fn while_loop_with_break_and_continue() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        var total = 0;
        var i = 0;
        while i < 10 {
            i = i + 1;
            if i == 3 {
                continue
            }
            if i > 7 {
                break
            }
            total = total + i;
        }
        "#,
    );
    // 1+2+4+5+6+7 = 25
    assert_eq!(global(&mut vm, "total").as_number(), Some(25.0));
}

#[test]
fn c_style_for_loop() {
    let mut vm = new_vm();
    run_ok(&mut vm, "var sum = 0; for var i = 0; i < 5; i = i + 1 { sum = sum + i; }");
    assert_eq!(global(&mut vm, "sum").as_number(), Some(10.0));
}

#[test]
fn for_each_over_a_list() {
    let mut vm = new_vm();
    run_ok(&mut vm, "var sum = 0; for x in [1, 2, 3, 4] { sum = sum + x; }");
    assert_eq!(global(&mut vm, "sum").as_number(), Some(10.0));
}

// ---- string interning identity (boundary scenario 1) ----

#[test]
fn interned_strings_built_from_separate_literals_are_identical_objects() {
    let mut vm = new_vm();
    run_ok(&mut vm, r#"var a = "hello"; var b = "hel" + "lo"; var same = a == b;"#);
    let a = global(&mut vm, "a").as_obj().unwrap();
    let b = global(&mut vm, "b").as_obj().unwrap();
    assert_eq!(a.addr(), b.addr(), "equal strings should intern to the same heap object");
    assert_eq!(global(&mut vm, "same"), Value::Bool(true));
}

// ---- closures and upvalues (boundary scenario 2) ----

#[test]
fn closures_close_over_and_mutate_a_shared_upvalue() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        fun make_counter() {
            var n = 0;
            fun inc() {
                n = n + 1;
                return n;
            }
            return inc;
        }
        var counter = make_counter();
        var a = counter();
        var b = counter();
        var c = counter();
        "#,
    );
    assert_eq!(global(&mut vm, "a").as_number(), Some(1.0));
    assert_eq!(global(&mut vm, "b").as_number(), Some(2.0));
    assert_eq!(global(&mut vm, "c").as_number(), Some(3.0));
}

#[test]
fn independent_closures_do_not_share_state() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        fun make_counter() {
            var n = 0;
            fun inc() { n = n + 1; return n; }
            return inc;
        }
        var c1 = make_counter();
        var c2 = make_counter();
        c1();
        c1();
        var r1 = c1();
        var r2 = c2();
        "#,
    );
    assert_eq!(global(&mut vm, "r1").as_number(), Some(3.0));
    assert_eq!(global(&mut vm, "r2").as_number(), Some(1.0));
}

// ---- exceptions: propagation, unwind, ensure (boundary scenario 3) ----

#[test]
fn try_except_catches_and_binds_the_exception() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        var caught = null;
        try {
            raise TypeException("bad value");
        } except e: TypeException {
            caught = e.message;
        }
        "#,
    );
    let caught = global(&mut vm, "caught").as_obj().unwrap();
    assert_eq!(caught.as_string().unwrap().bytes.as_ref(), "bad value");
}

#[test]
fn except_clause_with_wrong_class_does_not_match_and_exception_propagates() {
    let mut vm = new_vm();
    let result = vm.interpret(
        r#"
        try {
            raise Exception("boom");
        } except e: StackOverflowException {
            var unreachable = 1;
        }
        "#,
    );
    match result {
        InterpretResult::RuntimeError(RunError::Exception(v, trace)) => {
            assert_eq!(v.type_name(), "Instance");
            assert!(!trace.is_empty(), "an uncaught exception should carry a stack trace");
        }
        _ => panic!("expected an uncaught exception, got a different result"),
    }
}

#[test]
fn else_branch_runs_only_when_no_exception_was_raised() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        var marker = "";
        try {
            var x = 1;
        } except e {
            marker = "except";
        } else {
            marker = "else";
        }
        "#,
    );
    let marker = global(&mut vm, "marker").as_obj().unwrap();
    assert_eq!(marker.as_string().unwrap().bytes.as_ref(), "else");
}

#[test]
fn ensure_runs_on_the_happy_path_and_on_the_handled_exception_path() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        var ensured_happy = false;
        try {
            var x = 1;
        } ensure {
            ensured_happy = true;
        }

        var ensured_handled = false;
        try {
            raise Exception("boom");
        } except e {
            var ignore = e;
        } ensure {
            ensured_handled = true;
        }
        "#,
    );
    assert_eq!(global(&mut vm, "ensured_happy"), Value::Bool(true));
    assert_eq!(global(&mut vm, "ensured_handled"), Value::Bool(true));
}

#[test]
fn ensure_runs_even_when_the_exception_is_not_caught_and_propagates() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        var ensured = false;
        try {
            try {
                raise Exception("inner");
            } ensure {
                ensured = true;
            }
        } except e {
            var ignore = e;
        }
        "#,
    );
    assert_eq!(global(&mut vm, "ensured"), Value::Bool(true));
}

#[test]
fn an_except_handler_can_reraise_the_bound_exception() {
    let mut vm = new_vm();
    let result = vm.interpret(
        r#"
        fun reraiser() {
            try {
                raise TypeException("original");
            } except e {
                raise e;
            }
        }
        reraiser();
        "#,
    );
    match result {
        InterpretResult::RuntimeError(RunError::Exception(v, _)) => {
            assert_eq!(v.type_name(), "Instance");
        }
        _ => panic!("expected the reraised exception to escape uncaught"),
    }
}

#[test]
fn an_unmatched_exception_reraises_automatically_past_every_except_clause() {
    let mut vm = new_vm();
    let result = vm.interpret(
        r#"
        try {
            raise Exception("first");
        } except e: StackOverflowException {
            var unreachable = 1;
        } except e: TypeException {
            var also_unreachable = 2;
        }
        "#,
    );
    assert!(matches!(result, InterpretResult::RuntimeError(RunError::Exception(_, _))));
}

// ---- default and variadic arguments (boundary scenario 4) ----

#[test]
fn default_parameters_fill_in_missing_trailing_arguments() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        fun g(a, b = 10) { return a + b; }
        var r1 = g(1);
        var r2 = g(1, 2);
        "#,
    );
    assert_eq!(global(&mut vm, "r1").as_number(), Some(11.0));
    assert_eq!(global(&mut vm, "r2").as_number(), Some(3.0));
}

#[test]
fn variadic_parameter_collects_extra_arguments_into_a_tuple() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        fun g(a, b = 10, ...rest) {
            return len(rest);
        }
        var r1 = g(1);
        var r2 = g(1, 2, 3, 4, 5);
        "#,
    );
    assert_eq!(global(&mut vm, "r1").as_number(), Some(0.0));
    assert_eq!(global(&mut vm, "r2").as_number(), Some(3.0));
}

#[test]
fn too_few_required_arguments_raises_instead_of_panicking() {
    let mut vm = new_vm();
    let result = vm.interpret("fun need_two(a, b) { return a + b; } need_two(1);");
    assert!(matches!(result, InterpretResult::RuntimeError(RunError::Exception(_, _))));
}

// ---- classes, inheritance, super ----

#[test]
fn classes_support_fields_methods_and_construction() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        class Point {
            fun new(x, y) {
                this.x = x;
                this.y = y;
            }
            fun sum() {
                return this.x + this.y;
            }
        }
        var p = Point(3, 4);
        var s = p.sum();
        "#,
    );
    assert_eq!(global(&mut vm, "s").as_number(), Some(7.0));
}

#[test]
fn new_keyword_and_bare_call_both_construct_instances() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        class Box {
            fun new(v) { this.v = v; }
        }
        var a = Box(1);
        var b = Box(2);
        var sum = a.v + b.v;
        "#,
    );
    assert_eq!(global(&mut vm, "sum").as_number(), Some(3.0));
}

#[test]
fn inheritance_and_super_dispatch_to_the_parent_method() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        class Animal {
            fun speak() { return "..."; }
        }
        class Dog extends Animal {
            fun speak() {
                return "bark then " + super.speak();
            }
        }
        var d = Dog();
        var said = d.speak();
        "#,
    );
    let said = global(&mut vm, "said").as_obj().unwrap();
    assert_eq!(said.as_string().unwrap().bytes.as_ref(), "bark then ...");
}

#[test]
fn overridden_init_is_used_for_construction_through_the_subclass() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        class Base {
            fun new() { this.kind = "base"; }
        }
        class Derived extends Base {
            fun new() { this.kind = "derived"; }
        }
        var b = Base();
        var d = Derived();
        "#,
    );
    let b_inst = global(&mut vm, "b").as_obj().unwrap();
    let d_inst = global(&mut vm, "d").as_obj().unwrap();
    assert_eq!(b_inst.as_instance().unwrap().fields.borrow().len(), 1);
    assert_eq!(d_inst.as_instance().unwrap().fields.borrow().len(), 1);
}

// ---- operator overloading ----

#[test]
fn dunder_add_is_used_when_an_operand_is_not_a_number() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        class Vec2 {
            fun new(x, y) { this.x = x; this.y = y; }
            fun __add__(other) {
                return Vec2(this.x + other.x, this.y + other.y);
            }
        }
        var a = Vec2(1, 2);
        var b = Vec2(3, 4);
        var c = a + b;
        var sum = c.x + c.y;
        "#,
    );
    assert_eq!(global(&mut vm, "sum").as_number(), Some(10.0));
}

#[test]
fn dunder_eq_overrides_instance_equality() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        class Money {
            fun new(cents) { this.cents = cents; }
            fun __eq__(other) { return this.cents == other.cents; }
        }
        var a = Money(100);
        var b = Money(100);
        var same_value = a == b;
        var different_objects = a != Money(1);
        "#,
    );
    assert_eq!(global(&mut vm, "same_value"), Value::Bool(true));
    assert_eq!(global(&mut vm, "different_objects"), Value::Bool(true));
}

#[test]
fn dunder_lt_enables_ordering_comparisons() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        class Priority {
            fun new(n) { this.n = n; }
            fun __lt__(other) { return this.n < other.n; }
        }
        var low = Priority(1);
        var high = Priority(5);
        var ordered = low < high;
        "#,
    );
    assert_eq!(global(&mut vm, "ordered"), Value::Bool(true));
}

#[test]
fn arithmetic_without_a_dunder_override_still_raises_a_type_exception() {
    let mut vm = new_vm();
    let result = vm.interpret(
        r#"
        class Plain { fun new() {} }
        var p = Plain();
        var x = p + 1;
        "#,
    );
    assert!(matches!(result, InterpretResult::RuntimeError(RunError::Exception(_, _))));
}

// ---- collections ----

#[test]
fn list_indexing_and_mutation() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        var list = [10, 20, 30];
        var first = list[0];
        list[1] = 99;
        var second = list[1];
        var total = len(list);
        "#,
    );
    assert_eq!(global(&mut vm, "first").as_number(), Some(10.0));
    assert_eq!(global(&mut vm, "second").as_number(), Some(99.0));
    assert_eq!(global(&mut vm, "total").as_number(), Some(3.0));
}

#[test]
fn table_literal_lookup_and_assignment() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        var t = {"a": 1, "b": 2};
        var a = t["a"];
        t["c"] = 3;
        var c = t["c"];
        var count = len(t);
        "#,
    );
    assert_eq!(global(&mut vm, "a").as_number(), Some(1.0));
    assert_eq!(global(&mut vm, "c").as_number(), Some(3.0));
    assert_eq!(global(&mut vm, "count").as_number(), Some(3.0));
}

#[test]
fn variadic_collection_produces_a_tuple_value() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        fun collect(...items) { return items; }
        var t = collect(1, 2, 3);
        var kind = type(t);
        "#,
    );
    let kind = global(&mut vm, "kind").as_obj().unwrap();
    assert_eq!(kind.as_string().unwrap().bytes.as_ref(), "Tuple");
}

// ---- GC under pressure (boundary scenario 5) ----

#[test]
fn garbage_collection_reclaims_unreachable_strings_under_pressure() {
    let mut config = VmConfig::default();
    config.min_threshold = 4096;
    let mut vm = Vm::new(config);
    vm.bootstrap();
    run_ok(
        &mut vm,
        r#"
        var kept = "kept-alive";
        var i = 0;
        while i < 100000 {
            var scratch = "throwaway-" + i;
            i = i + 1;
        }
        "#,
    );
    assert!(vm.heap.collections_run > 0, "100k short-lived strings should have triggered at least one collection");
    let kept = global(&mut vm, "kept").as_obj().unwrap();
    assert_eq!(kept.as_string().unwrap().bytes.as_ref(), "kept-alive");
    assert!(
        vm.heap.live_object_count() < 10_000,
        "collection should have kept live object count far below the allocation count"
    );
}

#[test]
fn explicit_collect_garbage_does_not_free_a_reachable_global() {
    let mut vm = new_vm();
    run_ok(&mut vm, r#"var s = "still reachable";"#);
    vm.collect_garbage();
    let s = global(&mut vm, "s").as_obj().unwrap();
    assert_eq!(s.as_string().unwrap().bytes.as_ref(), "still reachable");
}

// ---- inline method cache (boundary scenario 6) ----

#[test]
fn method_cache_handles_repeated_calls_across_two_distinct_classes() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        class A { fun tag() { return "A"; } }
        class B { fun tag() { return "B"; } }
        var a = A();
        var b = B();
        var result = "";
        var i = 0;
        while i < 50 {
            result = result + a.tag() + b.tag();
            i = i + 1;
        }
        var len_result = len(result);
        "#,
    );
    // Every iteration appends "AB" (2 chars), 50 times.
    assert_eq!(global(&mut vm, "len_result").as_number(), Some(100.0));
}

#[test]
fn method_cache_is_invalidated_by_garbage_collection_without_corrupting_dispatch() {
    let mut config = VmConfig::default();
    config.min_threshold = 4096;
    let mut vm = Vm::new(config);
    vm.bootstrap();
    run_ok(
        &mut vm,
        r#"
        class Greeter { fun greet() { return "hi"; } }
        var total_len = 0;
        var i = 0;
        while i < 5000 {
            var g = Greeter();
            total_len = total_len + len(g.greet());
            var padding = "pad-" + i;
            i = i + 1;
        }
        "#,
    );
    assert_eq!(global(&mut vm, "total_len").as_number(), Some(10_000.0));
}

// ---- module import ----

#[test]
fn importing_a_module_exposes_its_globals_through_the_module_object() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("mathx.lum"), "var PI = 3;\nfun square(n) { return n * n; }\n")
        .expect("write module file");

    let mut vm = new_vm();
    vm.importer = Box::new(FsImporter::new(dir.path()));
    run_ok(&mut vm, r#"import mathx as m; var area = m.square(4); var pi = m.PI;"#);
    assert_eq!(global(&mut vm, "area").as_number(), Some(16.0));
    assert_eq!(global(&mut vm, "pi").as_number(), Some(3.0));
}

#[test]
fn importing_a_missing_module_raises_instead_of_crashing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut vm = new_vm();
    vm.importer = Box::new(FsImporter::new(dir.path()));
    let result = vm.interpret("import does_not_exist;");
    assert!(matches!(result, InterpretResult::RuntimeError(RunError::Exception(_, _))));
}

// ---- bytecode serialization round trip ----

#[test]
fn compiled_function_round_trips_through_the_lumc_format_and_still_runs() {
    let mut vm = new_vm();
    let tokens = lumen::lexer::tokenize("fun add(a, b = 10) { return a + b; }").expect("lex");
    let program = lumen::parser::Parser::new(tokens).parse_program().expect("parse");
    let function =
        lumen::compiler::Compiler::new(&mut vm.heap, "roundtrip").compile_program(&program).expect("compile");

    let bytes = lumen::serialize::write_bytecode_file(&function);
    let restored = lumen::serialize::read_bytecode_file(&bytes, &mut vm.heap).expect("round trip");

    let func_obj = vm.heap.alloc_function(restored);
    let closure = vm.heap.alloc_closure(lumen::object::ObjClosure { function: func_obj, upvalues: Vec::new() });
    let result = vm.call_function(closure, &[Value::Number(5.0)]).expect("call restored function");
    assert_eq!(result.as_number(), Some(15.0));
}

// ---- exceptions / stdlib surface ----

#[test]
fn isinstance_walks_the_superclass_chain() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        var e = StackOverflowException("deep");
        var is_exc = __isinstance__(e, Exception);
        var is_type_exc = __isinstance__(e, TypeException);
        "#,
    );
    assert_eq!(global(&mut vm, "is_exc"), Value::Bool(true));
    assert_eq!(global(&mut vm, "is_type_exc"), Value::Bool(false));
}

#[test]
fn assert_builtin_raises_a_catchable_exception_with_the_given_message() {
    let mut vm = new_vm();
    run_ok(
        &mut vm,
        r#"
        var caught = "";
        try {
            assert(1 == 2, "one is not two");
        } except e {
            caught = e.message;
        }
        "#,
    );
    let caught = global(&mut vm, "caught").as_obj().unwrap();
    assert_eq!(caught.as_string().unwrap().bytes.as_ref(), "one is not two");
}
