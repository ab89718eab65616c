// File: src/repl.rs
//
// Interactive REPL (Read-Eval-Print Loop) for Lumen. Provides an
// interactive shell for executing Lumen code with features like:
// - Multi-line input support for functions, loops, and control structures
// - Command history with up/down arrow navigation
// - Special commands (:help, :clear, :quit, :reset)
// - Persistent VM state (globals, classes) across inputs
// - Proper error handling and display

use crate::ast::Stmt;
use crate::compiler::Compiler;
use crate::errors::Diagnostic;
use crate::lexer;
use crate::object::display_value;
use crate::parser::Parser;
use crate::vm::{InterpretResult, RunError, Vm, VmConfig};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// REPL session that maintains VM state and handles user interaction.
pub struct Repl {
    vm: Vm,
    editor: DefaultEditor,
}

impl Repl {
    /// Creates a new REPL session with a fresh, bootstrapped VM.
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let editor = DefaultEditor::new()?;
        let mut vm = Vm::new(VmConfig::default());
        vm.bootstrap();
        Ok(Repl { vm, editor })
    }

    fn show_banner(&self) {
        println!("{}", "╔══════════════════════════════════════════════════════╗".bright_cyan());
        println!("{}", "║          Lumen REPL - Interactive Shell             ║".bright_cyan());
        println!("{}", "╚══════════════════════════════════════════════════════╝".bright_cyan());
        println!();
        println!(
            "  {} Use {}{}{}{}",
            "Welcome!".bright_green(),
            ":".bright_blue(),
            "help".bright_yellow(),
            " for commands or ".bright_blue(),
            ":quit".bright_yellow()
        );
        println!("  {} Multi-line input: End with unclosed braces", "Tip:".bright_magenta());
        println!();
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.show_banner();

        let mut buffer = String::new();

        loop {
            let prompt = if buffer.is_empty() { "lumen> ".bright_green().to_string() } else { "....> ".bright_blue().to_string() };

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let _ = self.editor.add_history_entry(line.as_str());

                    if buffer.is_empty() && line.trim().starts_with(':') {
                        if self.handle_command(line.trim()) {
                            continue;
                        } else {
                            break;
                        }
                    }

                    buffer.push_str(&line);
                    buffer.push('\n');

                    if is_input_complete(&buffer) {
                        self.eval_input(&buffer);
                        buffer.clear();
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "^C (Ctrl+C to interrupt, :quit to exit)".bright_yellow());
                    buffer.clear();
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "\nGoodbye!".bright_cyan());
                    break;
                }
                Err(err) => {
                    eprintln!("{} {}", "Error:".bright_red(), err);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Returns true to continue the REPL, false to quit.
    fn handle_command(&mut self, cmd: &str) -> bool {
        match cmd {
            ":help" | ":h" => {
                self.show_help();
                true
            }
            ":quit" | ":q" | ":exit" => {
                println!("{}", "Goodbye!".bright_cyan());
                false
            }
            ":clear" | ":c" => {
                print!("\x1B[2J\x1B[1;1H");
                self.show_banner();
                true
            }
            ":reset" | ":r" => {
                self.vm = Vm::new(VmConfig::default());
                self.vm.bootstrap();
                println!("{}", "Environment reset".bright_green());
                true
            }
            _ => {
                println!(
                    "{} Unknown command: {}. Type {}{}{}",
                    "Error:".bright_red(),
                    cmd.bright_yellow(),
                    ":".bright_blue(),
                    "help".bright_yellow(),
                    " for available commands.".bright_blue()
                );
                true
            }
        }
    }

    fn show_help(&self) {
        println!();
        println!("{}", "REPL Commands:".bright_cyan().bold());
        println!();
        println!("  {}{}  Display this help message", ":help".bright_yellow(), " or :h     ".dimmed());
        println!("  {}{}  Exit the REPL", ":quit".bright_yellow(), " or :q     ".dimmed());
        println!("  {}{}  Clear the screen", ":clear".bright_yellow(), " or :c    ".dimmed());
        println!("  {}{}  Reset the VM (drop all globals/classes)", ":reset".bright_yellow(), " or :r   ".dimmed());
        println!();
        println!("{}", "Navigation:".bright_cyan().bold());
        println!();
        println!("  {}  Navigate command history", "↑/↓ arrows".bright_blue());
        println!("  {}  Interrupt current input", "Ctrl+C    ".bright_blue());
        println!("  {}  Exit REPL", "Ctrl+D    ".bright_blue());
        println!();
        println!("{}", "Multi-line Input:".bright_cyan().bold());
        println!();
        println!("  Leave braces, brackets, or parentheses unclosed to continue");
        println!("  on the next line. Close them to execute the statement.");
        println!();
    }

    /// Lexes, parses, and compiles `input`, then runs it against the
    /// session's persistent VM. A trailing bare expression statement is
    /// rewritten as a `return` so its value can be echoed, the way the
    /// teacher's tree-walking REPL special-cased `ExprStmt`.
    fn eval_input(&mut self, input: &str) {
        if input.trim().is_empty() {
            return;
        }

        let tokens = match lexer::tokenize(input) {
            Ok(t) => t,
            Err(e) => {
                print_diagnostics(std::slice::from_ref(&e));
                return;
            }
        };
        let mut program = match Parser::new(tokens).parse_program() {
            Ok(p) => p,
            Err(es) => {
                print_diagnostics(&es);
                return;
            }
        };

        let echoes_value = rewrite_trailing_expression_as_return(&mut program);

        let compiler = Compiler::new(&mut self.vm.heap, "__repl__");
        let mut function = match compiler.compile_program(&program) {
            Ok(f) => f,
            Err(es) => {
                print_diagnostics(&es);
                return;
            }
        };
        function.module = Some(self.vm.main_module);

        let func_obj = self.vm.heap.alloc_function(function);
        let closure = self.vm.heap.alloc_closure(crate::object::ObjClosure { function: func_obj, upvalues: Vec::new() });

        match self.vm.call_function(closure, &[]) {
            Ok(value) => {
                if echoes_value {
                    println!("{} {}", "=>".bright_blue(), display_value(&value).bright_white());
                }
            }
            Err(e) => print_runtime_error(e),
        }
    }
}

fn rewrite_trailing_expression_as_return(program: &mut [Stmt]) -> bool {
    if let Some(last) = program.last_mut() {
        if let Stmt::Expression(expr) = last {
            let line = expr.line();
            let expr = std::mem::replace(expr, crate::ast::Expr::Literal(crate::ast::Literal::Null, line));
            *last = Stmt::Return(Some(expr), line);
            return true;
        }
    }
    false
}

/// Balances braces/brackets/parens (ignoring string contents and `#`
/// comments) to decide whether a multi-line buffer is ready to run.
fn is_input_complete(input: &str) -> bool {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return true;
    }

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;
    let mut in_comment = false;

    for ch in trimmed.chars() {
        if in_comment {
            if ch == '\n' {
                in_comment = false;
            }
            continue;
        }
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '#' if !in_string => in_comment = true,
            '{' | '[' | '(' if !in_string => depth += 1,
            '}' | ']' | ')' if !in_string => depth -= 1,
            _ => {}
        }
    }

    !in_string && depth <= 0
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for d in diagnostics {
        eprintln!("{}", d);
    }
}

fn print_runtime_error(err: RunError) {
    match err {
        RunError::Exception(value, trace) => {
            eprintln!("{} {}", "Uncaught exception:".bright_red().bold(), display_value(&value));
            for entry in &trace {
                eprintln!("  at {} (line {})", entry.function_name, entry.line);
            }
        }
        RunError::Fatal(msg) => eprintln!("{} {}", "fatal:".bright_red().bold(), msg),
    }
}

impl Default for Repl {
    fn default() -> Self {
        Self::new().expect("Failed to create REPL")
    }
}

#[allow(dead_code)]
fn _unused_interpret_result_marker(_: InterpretResult) {}
