// File: src/main.rs
//
// Entry point for the Lumen interpreter. Handles command-line argument
// parsing and dispatches to the appropriate subcommand (run or repl).

use clap::{Parser as ClapParser, Subcommand};
use colored::Colorize;
use lumen::errors::Diagnostic;
use lumen::object::display_value;
use lumen::vm::{InterpretResult, RunError, Vm, VmConfig};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(ClapParser)]
#[command(
    name = "lumen",
    about = "Lumen: a class-based scripting language",
    version = env!("CARGO_PKG_VERSION"),
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(arg_required_else_help = true)]
enum Commands {
    /// Run a Lumen script file
    Run {
        /// Path to the .lum file
        file: PathBuf,

        /// Maximum call-frame recursion depth
        #[arg(long)]
        max_frames: Option<usize>,

        /// Directory to resolve `import` statements against (default: the
        /// script's own directory)
        #[arg(long)]
        import_path: Option<PathBuf>,
    },

    /// Launch the interactive Lumen REPL
    Repl,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { file, max_frames, import_path } => run_file(&file, max_frames, import_path),
        Commands::Repl => match lumen::repl::Repl::new() {
            Ok(mut repl) => {
                if let Err(e) = repl.run() {
                    eprintln!("{} {}", "REPL error:".red().bold(), e);
                    return ExitCode::FAILURE;
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{} {}", "Failed to start REPL:".red().bold(), e);
                ExitCode::FAILURE
            }
        },
    }
}

fn run_file(path: &PathBuf, max_frames: Option<usize>, import_path: Option<PathBuf>) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{} could not read '{}': {}", "Error:".red().bold(), path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let mut config = VmConfig::default();
    if let Some(n) = max_frames {
        config.max_frames = n;
    }
    let mut vm = Vm::new(config);
    vm.bootstrap();

    let search_dir = import_path.unwrap_or_else(|| {
        path.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| PathBuf::from("."))
    });
    vm.importer = Box::new(lumen::module::FsImporter::new(search_dir.to_string_lossy().into_owned()));

    match vm.interpret(&source) {
        InterpretResult::Ok(_) => ExitCode::SUCCESS,
        InterpretResult::CompileError(diagnostics) => {
            print_diagnostics(&diagnostics, path);
            ExitCode::FAILURE
        }
        InterpretResult::RuntimeError(err) => {
            print_runtime_error(err);
            ExitCode::FAILURE
        }
    }
}

fn print_diagnostics(diagnostics: &[Diagnostic], path: &PathBuf) {
    for d in diagnostics {
        eprintln!("{}", d);
    }
    eprintln!("{} {} error(s) in {}", "error:".red().bold(), diagnostics.len(), path.display());
}

fn print_runtime_error(err: RunError) {
    match err {
        RunError::Exception(value, trace) => {
            eprintln!("{} {}", "Uncaught exception:".red().bold(), display_value(&value));
            for entry in &trace {
                eprintln!("  at {} (line {})", entry.function_name, entry.line);
            }
        }
        RunError::Fatal(msg) => {
            eprintln!("{} {}", "fatal:".red().bold(), msg);
        }
    }
}
