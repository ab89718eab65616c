// File: src/compiler.rs
//
// Single-pass bytecode compiler. Walks the AST exactly once,
// emitting bytecode directly into a `Chunk` as it goes — no separate IR,
// no optimization pass. A stack of `Frame`s tracks one compiler frame per
// nested function/method; each frame owns its own locals array and upvalue
// descriptor list, mirroring the call frame the VM will later push for it.

use crate::ast::{BinaryOp, ExceptClause, Expr, FunctionExpr, Literal, Lvalue, Stmt, UnaryOp};
use crate::bytecode::{Chunk, Op};
use crate::errors::{Diagnostic, SourceLocation};
use crate::heap::Heap;
use crate::object::{ObjFunction, UpvalueDesc};
use crate::value::Value;

const MAX_LOCALS: usize = 256;

#[derive(Clone)]
struct Local {
    name: String,
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Script,
    Function,
    Method,
}

struct LoopCtx {
    start: usize,
    local_count_at_entry: usize,
    break_jumps: Vec<usize>,
}

struct Frame {
    chunk: Chunk,
    name: Option<String>,
    arity: u8,
    defaults: Vec<Value>,
    variadic: bool,
    function_type: FunctionType,
    locals: Vec<Local>,
    scope_depth: i32,
    upvalues: Vec<UpvalueDesc>,
    loops: Vec<LoopCtx>,
}

impl Frame {
    fn new(name: Option<String>, function_type: FunctionType) -> Self {
        // Slot 0 is reserved: "this" in methods, unused (but still present)
        // elsewhere, matching the VM's uniform calling convention.
        let reserved_name = if function_type == FunctionType::Method { "this" } else { "" };
        Self {
            chunk: Chunk::new(),
            name,
            arity: 0,
            defaults: Vec::new(),
            variadic: false,
            function_type,
            locals: vec![Local { name: reserved_name.to_string(), depth: 0, is_captured: false }],
            scope_depth: 0,
            upvalues: Vec::new(),
            loops: Vec::new(),
        }
    }
}

/// A class currently being compiled; tracked so `this`/`super` resolve and
/// so self-inheritance is rejected.
struct ClassCtx {
    has_superclass: bool,
}

pub struct Compiler<'h> {
    heap: &'h mut Heap,
    frames: Vec<Frame>,
    classes: Vec<ClassCtx>,
    errors: Vec<Diagnostic>,
    #[allow(dead_code)]
    module_name: String,
}

type CResult = Result<(), ()>;

impl<'h> Compiler<'h> {
    pub fn new(heap: &'h mut Heap, module_name: impl Into<String>) -> Self {
        Self {
            heap,
            frames: vec![Frame::new(None, FunctionType::Script)],
            classes: Vec::new(),
            errors: Vec::new(),
            module_name: module_name.into(),
        }
    }

    /// Compiles a full program into the implicit top-level script function.
    pub fn compile_program(mut self, stmts: &[Stmt]) -> Result<ObjFunction, Vec<Diagnostic>> {
        for stmt in stmts {
            let _ = self.compile_stmt(stmt);
        }
        self.emit_op(Op::PushNull, 0);
        self.emit_op(Op::Return, 0);
        if !self.errors.is_empty() {
            return Err(self.errors);
        }
        let frame = self.frames.pop().expect("script frame always present");
        Ok(ObjFunction {
            name: None,
            arity: frame.arity,
            defaults: frame.defaults,
            variadic: frame.variadic,
            chunk: frame.chunk,
            module: None,
            upvalues: frame.upvalues,
        })
    }

    fn frame(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("at least one frame")
    }

    fn error(&mut self, message: impl Into<String>, line: usize) {
        self.errors.push(Diagnostic::compile(message, SourceLocation::new(line, 0)));
    }

    // ---- emission helpers ----

    fn emit_op(&mut self, op: Op, line: usize) -> usize {
        self.frame().chunk.emit_op(op, line)
    }

    fn emit_u8(&mut self, byte: u8, line: usize) {
        self.frame().chunk.emit_u8(byte, line);
    }

    fn emit_u16(&mut self, value: u16, line: usize) {
        self.frame().chunk.emit_u16(value, line);
    }

    fn emit_jump(&mut self, op: Op, line: usize) -> usize {
        self.emit_op(op, line);
        let operand = self.frame().chunk.current_offset();
        self.emit_u16(0xffff, line);
        operand
    }

    fn patch_jump(&mut self, operand_offset: usize) {
        self.frame().chunk.patch_jump(operand_offset);
    }

    fn emit_loop(&mut self, start: usize, line: usize) {
        self.emit_op(Op::Loop, line);
        self.emit_u16(start as u16, line);
    }

    fn make_constant(&mut self, value: Value) -> usize {
        self.frame().chunk.add_constant(value)
    }

    fn emit_constant(&mut self, value: Value, line: usize) {
        let index = self.make_constant(value);
        if self.frame().chunk.is_wide(index) {
            self.emit_op(Op::PushConstWide, line);
            self.emit_u16(index as u16, line);
        } else {
            self.emit_op(Op::PushConst, line);
            self.emit_u8(index as u8, line);
        }
    }

    fn intern_name(&mut self, name: &str) -> usize {
        let obj = self.heap.intern(name);
        self.make_constant(Value::Obj(obj))
    }

    /// Emits a one-byte constant-pool operand for an opcode with no wide
    /// form (`GET/SET/DEFINE_GLOBAL`, `GET/SET_FIELD`, `INVOKE`,
    /// `SUPER_INVOKE`, `METHOD`, `NEW_CLASS`, `CLOSURE`'s function operand).
    /// Unlike `PushConst`, these opcodes only ever carry a `u8` index
    /// (§4.2); a function whose pool exceeds 256 entries could otherwise
    /// silently truncate a late index and read the wrong constant. Reported
    /// as a compile error instead.
    fn emit_const_operand(&mut self, index: usize, line: usize) {
        if index > u8::MAX as usize {
            self.error(
                format!(
                    "constant pool overflow: index {} exceeds 255, the largest operand this opcode can encode",
                    index
                ),
                line,
            );
            return;
        }
        self.emit_u8(index as u8, line);
    }

    // ---- scopes ----

    fn begin_scope(&mut self) {
        self.frame().scope_depth += 1;
    }

    fn end_scope(&mut self, line: usize) {
        self.frame().scope_depth -= 1;
        let depth = self.frame().scope_depth;
        loop {
            let should_pop = match self.frame().locals.last() {
                Some(local) => local.depth > depth,
                None => false,
            };
            if !should_pop {
                break;
            }
            let captured = self.frame().locals.last().unwrap().is_captured;
            if captured {
                self.emit_op(Op::CloseUpvalue, line);
            } else {
                self.emit_op(Op::Pop, line);
            }
            self.frame().locals.pop();
        }
    }

    fn declare_local(&mut self, name: &str, line: usize) -> Option<u8> {
        let frame = self.frame();
        if frame.scope_depth == 0 {
            return None;
        }
        let depth = frame.scope_depth;
        for local in frame.locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if local.name == name {
                self.error(format!("'{}' is already declared in this scope", name), line);
                return None;
            }
        }
        if self.frame().locals.len() >= MAX_LOCALS {
            self.error("too many local variables in one function", line);
            return None;
        }
        self.frame().locals.push(Local { name: name.to_string(), depth: -1, is_captured: false });
        Some((self.frame().locals.len() - 1) as u8)
    }

    fn mark_initialized(&mut self) {
        let frame = self.frame();
        if frame.scope_depth == 0 {
            return;
        }
        let depth = frame.scope_depth;
        if let Some(local) = frame.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn resolve_local(&self, frame_idx: usize, name: &str) -> Option<u8> {
        let frame = &self.frames[frame_idx];
        for (i, local) in frame.locals.iter().enumerate().rev() {
            if local.name == name && local.depth != -1 {
                return Some(i as u8);
            }
        }
        None
    }

    fn resolve_upvalue(&mut self, frame_idx: usize, name: &str) -> Option<u8> {
        if frame_idx == 0 {
            return None;
        }
        let enclosing = frame_idx - 1;
        if let Some(local_slot) = self.resolve_local(enclosing, name) {
            self.frames[enclosing].locals[local_slot as usize].is_captured = true;
            return Some(self.add_upvalue(frame_idx, local_slot, true));
        }
        if let Some(up_slot) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(frame_idx, up_slot, false));
        }
        None
    }

    fn add_upvalue(&mut self, frame_idx: usize, index: u8, is_local: bool) -> u8 {
        let upvalues = &mut self.frames[frame_idx].upvalues;
        for (i, u) in upvalues.iter().enumerate() {
            if u.index == index && u.is_local == is_local {
                return i as u8;
            }
        }
        upvalues.push(UpvalueDesc { is_local, index });
        (upvalues.len() - 1) as u8
    }

    // ---- variable get/set ----

    fn named_variable_get(&mut self, name: &str, line: usize) {
        let frame_idx = self.frames.len() - 1;
        if let Some(slot) = self.resolve_local(frame_idx, name) {
            self.emit_op(Op::GetLocal, line);
            self.emit_u8(slot, line);
        } else if let Some(slot) = self.resolve_upvalue(frame_idx, name) {
            self.emit_op(Op::GetUpvalue, line);
            self.emit_u8(slot, line);
        } else {
            let name_const = self.intern_name(name);
            self.emit_op(Op::GetGlobal, line);
            self.emit_const_operand(name_const, line);
        }
    }

    fn named_variable_set(&mut self, name: &str, line: usize) {
        let frame_idx = self.frames.len() - 1;
        if let Some(slot) = self.resolve_local(frame_idx, name) {
            self.emit_op(Op::SetLocal, line);
            self.emit_u8(slot, line);
        } else if let Some(slot) = self.resolve_upvalue(frame_idx, name) {
            self.emit_op(Op::SetUpvalue, line);
            self.emit_u8(slot, line);
        } else {
            let name_const = self.intern_name(name);
            self.emit_op(Op::SetGlobal, line);
            self.emit_const_operand(name_const, line);
        }
    }

    // ---- statements ----

    fn compile_stmt(&mut self, stmt: &Stmt) -> CResult {
        match stmt {
            Stmt::VarDecl { name, init, line } => self.compile_var_decl(name, init, *line),
            Stmt::Expression(expr) => {
                self.compile_expr(expr)?;
                self.emit_op(Op::Pop, expr.line());
                Ok(())
            }
            Stmt::Block(body) => {
                self.begin_scope();
                for s in body {
                    let _ = self.compile_stmt(s);
                }
                self.end_scope(0);
                Ok(())
            }
            Stmt::If { cond, then_branch, elifs, else_branch } => {
                self.compile_if(cond, then_branch, elifs, else_branch)
            }
            Stmt::While { cond, body } => self.compile_while(cond, body),
            Stmt::ForC { init, cond, post, body } => self.compile_for_c(init, cond, post, body),
            Stmt::ForEach { var, iterable, body, line } => self.compile_for_each(var, iterable, body, *line),
            Stmt::Return(expr, line) => {
                match expr {
                    Some(e) => self.compile_expr(e)?,
                    None => {
                        self.emit_op(Op::PushNull, *line);
                    }
                }
                self.emit_op(Op::Return, *line);
                Ok(())
            }
            Stmt::FunctionDecl(func) => self.compile_function_decl(func),
            Stmt::ClassDecl { name, superclass, methods, line } => {
                self.compile_class_decl(name, superclass.as_deref(), methods, *line)
            }
            Stmt::Try { body, excepts, else_branch, ensure } => {
                self.compile_try(body, excepts, else_branch, ensure)
            }
            Stmt::Raise(expr, line) => {
                self.compile_expr(expr)?;
                self.emit_op(Op::Raise, *line);
                Ok(())
            }
            Stmt::Import { name, alias, line } => self.compile_import(name, alias.as_deref(), *line),
            Stmt::Break(line) => self.compile_break(*line),
            Stmt::Continue(line) => self.compile_continue(*line),
        }
    }

    fn compile_var_decl(&mut self, name: &str, init: &Option<Expr>, line: usize) -> CResult {
        match init {
            Some(e) => self.compile_expr(e)?,
            None => {
                self.emit_op(Op::PushNull, line);
            }
        }
        if self.frame().scope_depth > 0 {
            self.declare_local(name, line);
            self.mark_initialized();
        } else {
            let name_const = self.intern_name(name);
            self.emit_op(Op::DefineGlobal, line);
            self.emit_const_operand(name_const, line);
        }
        Ok(())
    }

    fn compile_block(&mut self, body: &[Stmt]) {
        self.begin_scope();
        for s in body {
            let _ = self.compile_stmt(s);
        }
        self.end_scope(0);
    }

    fn compile_if(
        &mut self,
        cond: &Expr,
        then_branch: &[Stmt],
        elifs: &[(Expr, Vec<Stmt>)],
        else_branch: &Option<Vec<Stmt>>,
    ) -> CResult {
        self.compile_expr(cond)?;
        let then_jump = self.emit_jump(Op::JumpIfFalse, cond.line());
        self.emit_op(Op::Pop, cond.line());
        self.compile_block(then_branch);
        let mut end_jumps = vec![self.emit_jump(Op::Jump, cond.line())];
        self.patch_jump(then_jump);
        self.emit_op(Op::Pop, cond.line());

        for (elif_cond, elif_body) in elifs {
            self.compile_expr(elif_cond)?;
            let elif_jump = self.emit_jump(Op::JumpIfFalse, elif_cond.line());
            self.emit_op(Op::Pop, elif_cond.line());
            self.compile_block(elif_body);
            end_jumps.push(self.emit_jump(Op::Jump, elif_cond.line()));
            self.patch_jump(elif_jump);
            self.emit_op(Op::Pop, elif_cond.line());
        }

        if let Some(else_body) = else_branch {
            self.compile_block(else_body);
        }
        for j in end_jumps {
            self.patch_jump(j);
        }
        Ok(())
    }

    fn compile_while(&mut self, cond: &Expr, body: &[Stmt]) -> CResult {
        let start = self.frame().chunk.current_offset();
        let local_count = self.frame().locals.len();
        self.frame().loops.push(LoopCtx { start, local_count_at_entry: local_count, break_jumps: Vec::new() });
        self.compile_expr(cond)?;
        let exit_jump = self.emit_jump(Op::JumpIfFalse, cond.line());
        self.emit_op(Op::Pop, cond.line());
        self.compile_block(body);
        self.emit_loop(start, cond.line());
        self.patch_jump(exit_jump);
        self.emit_op(Op::Pop, cond.line());
        let ctx = self.frame().loops.pop().expect("loop ctx pushed above");
        for j in ctx.break_jumps {
            self.patch_jump(j);
        }
        Ok(())
    }

    fn compile_for_c(
        &mut self,
        init: &Option<Box<Stmt>>,
        cond: &Option<Expr>,
        post: &Option<Box<Stmt>>,
        body: &[Stmt],
    ) -> CResult {
        self.begin_scope();
        if let Some(init_stmt) = init {
            let _ = self.compile_stmt(init_stmt);
        }
        let start = self.frame().chunk.current_offset();
        let local_count = self.frame().locals.len();
        self.frame().loops.push(LoopCtx { start, local_count_at_entry: local_count, break_jumps: Vec::new() });
        let mut exit_jump = None;
        if let Some(c) = cond {
            self.compile_expr(c)?;
            exit_jump = Some(self.emit_jump(Op::JumpIfFalse, c.line()));
            self.emit_op(Op::Pop, c.line());
        }
        self.compile_block(body);
        if let Some(post_stmt) = post {
            if let Stmt::Expression(e) = post_stmt.as_ref() {
                self.compile_expr(e)?;
                self.emit_op(Op::Pop, e.line());
            } else {
                let _ = self.compile_stmt(post_stmt);
            }
        }
        self.emit_loop(start, 0);
        if let Some(j) = exit_jump {
            self.patch_jump(j);
            self.emit_op(Op::Pop, 0);
        }
        let ctx = self.frame().loops.pop().expect("loop ctx pushed above");
        for j in ctx.break_jumps {
            self.patch_jump(j);
        }
        self.end_scope(0);
        Ok(())
    }

    /// Desugars `for x in iterable { ... }` into index-driven iteration
    /// over two hidden locals, using `ForIter` to test exhaustion, fetch
    /// the next element, and advance the index in one step.
    fn compile_for_each(&mut self, var: &str, iterable: &Expr, body: &[Stmt], line: usize) -> CResult {
        self.begin_scope();
        self.compile_expr(iterable)?;
        self.declare_local("@iter", line);
        self.mark_initialized();
        self.emit_constant(Value::Number(0.0), line);
        self.declare_local("@idx", line);
        self.mark_initialized();
        self.emit_op(Op::PushNull, line);
        let loop_var_slot = self.declare_local(var, line);
        self.mark_initialized();

        let start = self.frame().chunk.current_offset();
        let local_count = self.frame().locals.len();
        self.frame().loops.push(LoopCtx { start, local_count_at_entry: local_count, break_jumps: Vec::new() });

        let frame_idx = self.frames.len() - 1;
        let iter_slot = self.resolve_local(frame_idx, "@iter").unwrap();
        let idx_slot = self.resolve_local(frame_idx, "@idx").unwrap();
        self.emit_op(Op::GetLocal, line);
        self.emit_u8(iter_slot, line);
        self.emit_op(Op::GetLocal, line);
        self.emit_u8(idx_slot, line);
        let exit_jump = self.emit_jump(Op::ForIter, line);
        if let Some(slot) = loop_var_slot {
            self.emit_op(Op::SetLocal, line);
            self.emit_u8(slot, line);
        }
        self.emit_op(Op::Pop, line);
        self.emit_op(Op::SetLocal, line);
        self.emit_u8(idx_slot, line);
        self.emit_op(Op::Pop, line);
        self.emit_op(Op::Pop, line);

        self.compile_block(body);
        self.emit_loop(start, line);
        self.patch_jump(exit_jump);

        let ctx = self.frame().loops.pop().expect("loop ctx pushed above");
        for j in ctx.break_jumps {
            self.patch_jump(j);
        }
        self.end_scope(line);
        Ok(())
    }

    fn compile_break(&mut self, line: usize) -> CResult {
        if self.frame().loops.is_empty() {
            self.error("'break' outside a loop", line);
            return Err(());
        }
        let entry = self.frame().loops.last().unwrap().local_count_at_entry;
        let current = self.frame().locals.len();
        for _ in entry..current {
            self.emit_op(Op::Pop, line);
        }
        let jump = self.emit_jump(Op::Jump, line);
        self.frame().loops.last_mut().unwrap().break_jumps.push(jump);
        Ok(())
    }

    fn compile_continue(&mut self, line: usize) -> CResult {
        if self.frame().loops.is_empty() {
            self.error("'continue' outside a loop", line);
            return Err(());
        }
        let entry = self.frame().loops.last().unwrap().local_count_at_entry;
        let current = self.frame().locals.len();
        for _ in entry..current {
            self.emit_op(Op::Pop, line);
        }
        let start = self.frame().loops.last().unwrap().start;
        self.emit_loop(start, line);
        Ok(())
    }

    fn compile_import(&mut self, name: &str, alias: Option<&str>, line: usize) -> CResult {
        self.named_variable_get("__import__", line);
        let module_obj = self.heap.intern(name);
        self.emit_constant(Value::Obj(module_obj), line);
        self.emit_op(Op::Call, line);
        self.emit_u8(1, line);
        let bind_name = alias.unwrap_or(name);
        if self.frame().scope_depth > 0 {
            self.declare_local(bind_name, line);
            self.mark_initialized();
        } else {
            let const_idx = self.intern_name(bind_name);
            self.emit_op(Op::DefineGlobal, line);
            self.emit_const_operand(const_idx, line);
        }
        Ok(())
    }

    fn compile_function_decl(&mut self, func: &FunctionExpr) -> CResult {
        let name = func.name.clone().expect("function declarations are named");
        if self.frame().scope_depth > 0 {
            self.declare_local(&name, func.line);
        }
        self.compile_function(func, FunctionType::Function);
        if self.frame().scope_depth > 0 {
            self.mark_initialized();
        } else {
            let const_idx = self.intern_name(&name);
            self.emit_op(Op::DefineGlobal, func.line);
            self.emit_const_operand(const_idx, func.line);
        }
        Ok(())
    }

    /// Compiles `func` as a nested frame and emits `Closure` with the
    /// resulting function's upvalue descriptor pairs inline.
    fn compile_function(&mut self, func: &FunctionExpr, kind: FunctionType) {
        self.frames.push(Frame::new(func.name.clone(), kind));
        self.begin_scope();

        let mut defaults = Vec::new();
        let mut required = 0u8;
        for param in &func.params {
            self.declare_local(&param.name, func.line);
            self.mark_initialized();
            match &param.default {
                None => required += 1,
                Some(expr) => match literal_value(expr) {
                    Some(v) => defaults.push(v),
                    None => self.error("default parameter values must be constant literals", func.line),
                },
            }
        }
        if let Some(rest_name) = &func.variadic {
            self.declare_local(rest_name, func.line);
            self.mark_initialized();
        }
        self.frame().arity = required;
        self.frame().defaults = defaults;
        self.frame().variadic = func.variadic.is_some();

        for stmt in &func.body {
            let _ = self.compile_stmt(stmt);
        }
        self.emit_op(Op::PushNull, func.line);
        self.emit_op(Op::Return, func.line);

        let finished = self.frames.pop().expect("frame pushed above");
        let name_obj = finished.name.as_ref().map(|n| self.heap.intern(n));
        let upvalues = finished.upvalues.clone();
        let function = ObjFunction {
            name: name_obj,
            arity: finished.arity,
            defaults: finished.defaults,
            variadic: finished.variadic,
            chunk: finished.chunk,
            module: None,
            upvalues: finished.upvalues,
        };
        let function_obj = self.heap.alloc_function(function);
        let const_idx = self.make_constant(Value::Obj(function_obj));
        self.emit_op(Op::Closure, func.line);
        self.emit_const_operand(const_idx, func.line);
        for upvalue in &upvalues {
            self.emit_u8(if upvalue.is_local { 1 } else { 0 }, func.line);
            self.emit_u8(upvalue.index, func.line);
        }
    }

    fn compile_class_decl(
        &mut self,
        name: &str,
        superclass: Option<&str>,
        methods: &[FunctionExpr],
        line: usize,
    ) -> CResult {
        if self.frame().scope_depth > 0 {
            self.declare_local(name, line);
        }
        let name_const = self.intern_name(name);
        self.emit_op(Op::NewClass, line);
        self.emit_const_operand(name_const, line);
        if self.frame().scope_depth > 0 {
            self.mark_initialized();
        } else {
            self.emit_op(Op::DefineGlobal, line);
            self.emit_const_operand(name_const, line);
        }

        let mut has_superclass = false;
        if let Some(super_name) = superclass {
            if super_name == name {
                self.error("a class cannot inherit from itself", line);
            }
            self.named_variable_get(super_name, line);
            self.begin_scope();
            self.declare_local("super", line);
            self.mark_initialized();
            self.named_variable_get(name, line);
            self.emit_op(Op::Inherit, line);
            has_superclass = true;
        }
        self.classes.push(ClassCtx { has_superclass });

        self.named_variable_get(name, line);
        for method in methods {
            let method_name = method.name.clone().unwrap_or_default();
            self.compile_function(method, FunctionType::Method);
            let method_const = self.intern_name(&method_name);
            self.emit_op(Op::Method, line);
            self.emit_const_operand(method_const, line);
        }
        self.emit_op(Op::Pop, line);

        self.classes.pop();
        if has_superclass {
            self.end_scope(line);
        }
        Ok(())
    }

    fn compile_try(
        &mut self,
        body: &[Stmt],
        excepts: &[ExceptClause],
        else_branch: &Option<Vec<Stmt>>,
        ensure: &Option<Vec<Stmt>>,
    ) -> CResult {
        let setup = self.emit_jump(Op::SetupTry, 0);
        self.compile_block(body);
        self.emit_op(Op::PopHandler, 0);
        if let Some(else_body) = else_branch {
            self.compile_block(else_body);
        }
        let end_jump = self.emit_jump(Op::Jump, 0);
        self.patch_jump(setup);

        self.begin_scope();
        self.declare_local("@exc", 0);
        self.mark_initialized();
        let frame_idx = self.frames.len() - 1;
        let exc_slot = self.resolve_local(frame_idx, "@exc").unwrap();

        let mut to_end = Vec::new();
        for except in excepts {
            let mut skip_jump = None;
            if let Some(class_name) = &except.class {
                self.named_variable_get("__isinstance__", 0);
                self.emit_op(Op::GetLocal, 0);
                self.emit_u8(exc_slot, 0);
                self.named_variable_get(class_name, 0);
                self.emit_op(Op::Call, 0);
                self.emit_u8(2, 0);
                skip_jump = Some(self.emit_jump(Op::JumpIfFalse, 0));
                self.emit_op(Op::Pop, 0);
            }
            self.begin_scope();
            if !except.binding.is_empty() {
                self.emit_op(Op::GetLocal, 0);
                self.emit_u8(exc_slot, 0);
                self.declare_local(&except.binding, 0);
                self.mark_initialized();
            }
            for s in &except.body {
                let _ = self.compile_stmt(s);
            }
            self.end_scope(0);
            to_end.push(self.emit_jump(Op::Jump, 0));
            if let Some(j) = skip_jump {
                self.patch_jump(j);
                self.emit_op(Op::Pop, 0);
            }
        }
        // No clause matched: an `ensure` block still must run before the
        // exception keeps propagating, the same as it runs on the handled
        // and the no-exception paths below.
        if let Some(ensure_body) = ensure {
            self.compile_block(ensure_body);
        }
        self.emit_op(Op::GetLocal, 0);
        self.emit_u8(exc_slot, 0);
        self.emit_op(Op::Reraise, 0);
        for j in to_end {
            self.patch_jump(j);
        }
        self.end_scope(0);
        self.patch_jump(end_jump);

        if let Some(ensure_body) = ensure {
            self.compile_block(ensure_body);
        }
        Ok(())
    }

    // ---- expressions ----

    fn compile_expr(&mut self, expr: &Expr) -> CResult {
        match expr {
            Expr::Literal(lit, line) => {
                self.compile_literal(lit, *line);
                Ok(())
            }
            Expr::Variable(name, line) => {
                self.named_variable_get(name, *line);
                Ok(())
            }
            Expr::This(line) => {
                if self.classes.is_empty() {
                    self.error("'this' outside a method", *line);
                    return Err(());
                }
                self.named_variable_get("this", *line);
                Ok(())
            }
            Expr::Super { method, line } => {
                self.error(
                    format!("'super.{}' must be called directly, e.g. super.{}(...)", method, method),
                    *line,
                );
                Err(())
            }
            Expr::Binary { op, left, right, line } => self.compile_binary(op, left, right, *line),
            Expr::Unary { op, operand, line } => {
                self.compile_expr(operand)?;
                match op {
                    UnaryOp::Neg => self.emit_op(Op::Neg, *line),
                    UnaryOp::Not => self.emit_op(Op::Not, *line),
                };
                Ok(())
            }
            Expr::Assign { target, value, line } => self.compile_assign(target, value, *line),
            Expr::Ternary { cond, then_expr, else_expr, line } => {
                self.compile_expr(cond)?;
                let then_jump = self.emit_jump(Op::JumpIfFalse, *line);
                self.emit_op(Op::Pop, *line);
                self.compile_expr(then_expr)?;
                let end_jump = self.emit_jump(Op::Jump, *line);
                self.patch_jump(then_jump);
                self.emit_op(Op::Pop, *line);
                self.compile_expr(else_expr)?;
                self.patch_jump(end_jump);
                Ok(())
            }
            Expr::Call { callee, args, line } => {
                if let Expr::Super { method, .. } = callee.as_ref() {
                    return self.compile_super_invoke(method, args, *line);
                }
                if let Expr::Field { target, name, .. } = callee.as_ref() {
                    self.compile_expr(target)?;
                    for a in args {
                        self.compile_expr(a)?;
                    }
                    let name_const = self.intern_name(name);
                    self.emit_op(Op::Invoke, *line);
                    self.emit_const_operand(name_const, *line);
                    self.emit_u8(args.len() as u8, *line);
                    return Ok(());
                }
                self.compile_expr(callee)?;
                for a in args {
                    self.compile_expr(a)?;
                }
                self.emit_op(Op::Call, *line);
                self.emit_u8(args.len() as u8, *line);
                Ok(())
            }
            Expr::Invoke { receiver, method, args, line } => {
                self.compile_expr(receiver)?;
                for a in args {
                    self.compile_expr(a)?;
                }
                let name_const = self.intern_name(method);
                self.emit_op(Op::Invoke, *line);
                self.emit_const_operand(name_const, *line);
                self.emit_u8(args.len() as u8, *line);
                Ok(())
            }
            Expr::Field { target, name, line } => {
                self.compile_expr(target)?;
                let name_const = self.intern_name(name);
                self.emit_op(Op::GetField, *line);
                self.emit_const_operand(name_const, *line);
                Ok(())
            }
            Expr::Subscript { target, index, line } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.emit_op(Op::SubscriptGet, *line);
                Ok(())
            }
            Expr::ListLiteral(items, line) => {
                self.emit_op(Op::NewList, *line);
                self.emit_u16(0, *line);
                for item in items {
                    self.compile_expr(item)?;
                    self.emit_op(Op::ListAppend, *line);
                }
                Ok(())
            }
            Expr::TupleLiteral(items, line) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                self.emit_op(Op::NewTuple, *line);
                self.emit_u16(items.len() as u16, *line);
                Ok(())
            }
            Expr::TableLiteral(pairs, line) => {
                self.emit_op(Op::NewTable, *line);
                for (k, v) in pairs {
                    self.emit_op(Op::Dup, *line);
                    self.compile_expr(k)?;
                    self.compile_expr(v)?;
                    self.emit_op(Op::SubscriptSet, *line);
                    self.emit_op(Op::Pop, *line);
                }
                Ok(())
            }
            Expr::Function(func) => {
                self.compile_function(func, FunctionType::Function);
                Ok(())
            }
        }
    }

    fn compile_super_invoke(&mut self, method: &str, args: &[Expr], line: usize) -> CResult {
        if self.classes.is_empty() || !self.classes.last().unwrap().has_superclass {
            self.error("'super' used outside a method of a subclass", line);
            return Err(());
        }
        self.named_variable_get("this", line);
        for a in args {
            self.compile_expr(a)?;
        }
        self.named_variable_get("super", line);
        let name_const = self.intern_name(method);
        self.emit_op(Op::SuperInvoke, line);
        self.emit_const_operand(name_const, line);
        self.emit_u8(args.len() as u8, line);
        Ok(())
    }

    fn compile_literal(&mut self, lit: &Literal, line: usize) {
        match lit {
            Literal::Null => {
                self.emit_op(Op::PushNull, line);
            }
            Literal::Bool(true) => {
                self.emit_op(Op::PushTrue, line);
            }
            Literal::Bool(false) => {
                self.emit_op(Op::PushFalse, line);
            }
            Literal::Number(n) => self.emit_constant(Value::Number(*n), line),
            Literal::String(s) => {
                let obj = self.heap.intern(s);
                self.emit_constant(Value::Obj(obj), line);
            }
        }
    }

    fn compile_binary(&mut self, op: &BinaryOp, left: &Expr, right: &Expr, line: usize) -> CResult {
        match op {
            BinaryOp::And => {
                self.compile_expr(left)?;
                let end_jump = self.emit_jump(Op::JumpIfFalse, line);
                self.emit_op(Op::Pop, line);
                self.compile_expr(right)?;
                self.patch_jump(end_jump);
                return Ok(());
            }
            BinaryOp::Or => {
                self.compile_expr(left)?;
                let end_jump = self.emit_jump(Op::JumpIfTrue, line);
                self.emit_op(Op::Pop, line);
                self.compile_expr(right)?;
                self.patch_jump(end_jump);
                return Ok(());
            }
            _ => {}
        }
        self.compile_expr(left)?;
        self.compile_expr(right)?;
        let op_code = match op {
            BinaryOp::Add => Op::Add,
            BinaryOp::Sub => Op::Sub,
            BinaryOp::Mul => Op::Mul,
            BinaryOp::Div => Op::Div,
            BinaryOp::Mod => Op::Mod,
            BinaryOp::Eq => Op::Eq,
            BinaryOp::NotEq => Op::Neq,
            BinaryOp::Lt => Op::Lt,
            BinaryOp::Le => Op::Le,
            BinaryOp::Gt => Op::Gt,
            BinaryOp::Ge => Op::Ge,
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        };
        self.emit_op(op_code, line);
        Ok(())
    }

    fn compile_assign(&mut self, target: &Lvalue, value: &Expr, line: usize) -> CResult {
        match target {
            Lvalue::Variable(name) => {
                self.compile_expr(value)?;
                self.named_variable_set(name, line);
                Ok(())
            }
            Lvalue::Field { target, name } => {
                self.compile_expr(target)?;
                self.compile_expr(value)?;
                let name_const = self.intern_name(name);
                self.emit_op(Op::SetField, line);
                self.emit_const_operand(name_const, line);
                Ok(())
            }
            Lvalue::Subscript { target, index } => {
                self.compile_expr(target)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                self.emit_op(Op::SubscriptSet, line);
                Ok(())
            }
        }
    }
}

/// Default parameter values must be compile-time constants (an Open
/// Question decided in DESIGN.md): an `ObjFunction`'s `defaults` field
/// holds plain `Value`s, so anything beyond a literal is rejected here
/// rather than deferred to a runtime default-expression evaluation.
fn literal_value(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Literal(Literal::Null, _) => Some(Value::Null),
        Expr::Literal(Literal::Bool(b), _) => Some(Value::Bool(*b)),
        Expr::Literal(Literal::Number(n), _) => Some(Value::Number(*n)),
        Expr::Unary { op: UnaryOp::Neg, operand, .. } => match operand.as_ref() {
            Expr::Literal(Literal::Number(n), _) => Some(Value::Number(-*n)),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::Parser;

    fn compile_source(src: &str) -> Result<(ObjFunction, Heap), Vec<Diagnostic>> {
        let tokens = tokenize(src).expect("lex ok");
        let program = Parser::new(tokens).parse_program().map_err(|errs| errs)?;
        let mut heap = Heap::new();
        let compiler = Compiler::new(&mut heap, "test");
        let function = compiler.compile_program(&program)?;
        Ok((function, heap))
    }

    #[test]
    fn compiles_simple_arithmetic() {
        let (f, _heap) = compile_source("var x = 1 + 2 * 3;").unwrap();
        assert!(f.chunk.code.contains(&(Op::Mul as u8)));
        assert!(f.chunk.code.contains(&(Op::Add as u8)));
    }

    #[test]
    fn compiles_function_with_closure() {
        let (f, _heap) =
            compile_source("fun counter() { var n = 0; fun inc() { n = n + 1; return n; } return inc; }").unwrap();
        assert!(f.chunk.code.contains(&(Op::Closure as u8)));
    }

    #[test]
    fn rejects_break_outside_loop() {
        let err = compile_source("break;").unwrap_err();
        assert!(!err.is_empty());
    }

    #[test]
    fn compiles_class_with_inheritance() {
        let (f, _heap) = compile_source(
            "class Animal { speak() { return 0; } } class Dog extends Animal { speak() { return super.speak(); } }",
        )
        .unwrap();
        assert!(f.chunk.code.contains(&(Op::Inherit as u8)));
        assert!(f.chunk.code.contains(&(Op::SuperInvoke as u8)));
    }

    #[test]
    fn global_name_past_constant_pool_limit_is_a_compile_error_not_a_miscompile() {
        let mut src = String::new();
        for i in 0..300 {
            src.push_str(&format!("var g{} = 0;\n", i));
        }
        let errs = compile_source(&src).unwrap_err();
        assert!(errs.iter().any(|d| d.message.contains("constant pool overflow")));
    }
}
