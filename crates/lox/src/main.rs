use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use lox_core::InterpretError;
use lox_vm::{compile, disassemble, interpret, Vm};

#[derive(Parser)]
#[command(name = "lox", about = "Lox: a bytecode compiler and stack VM", version)]
struct Cli {
    /// Script to execute
    file: Option<String>,

    /// Evaluate a source string and exit
    #[arg(short, long, conflicts_with = "file")]
    eval: Option<String>,

    /// Dump the stack and each instruction to stderr while executing
    #[arg(short, long)]
    trace: bool,

    /// Print the compiled chunk instead of executing it
    #[arg(short, long)]
    disassemble: bool,

    /// Suppress the REPL banner
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    if let Some(expr) = &cli.eval {
        std::process::exit(run_source(expr, "<eval>", &cli));
    }

    if let Some(file) = &cli.file {
        match std::fs::read_to_string(file) {
            Ok(source) => std::process::exit(run_source(&source, file, &cli)),
            Err(e) => {
                eprintln!("Error reading {file}: {e}");
                std::process::exit(1);
            }
        }
    }

    repl(&cli);
}

/// Compile and run one source unit, returning the process exit code:
/// 0 on success, 65 for compile errors, 70 for a runtime error.
fn run_source(source: &str, name: &str, cli: &Cli) -> i32 {
    if cli.disassemble {
        return match compile(source) {
            Ok(chunk) => {
                print!("{}", disassemble(&chunk, name));
                0
            }
            Err(errors) => {
                let failure = InterpretError::Compile(errors);
                print_error(&failure);
                failure.exit_code()
            }
        };
    }

    match interpret(source, cli.trace) {
        Ok(()) => 0,
        Err(err) => {
            print_error(&err);
            err.exit_code()
        }
    }
}

fn print_error(err: &InterpretError) {
    match err {
        InterpretError::Compile(errors) => {
            for error in errors {
                eprintln!("{error}");
            }
        }
        InterpretError::Runtime(error) => eprintln!("{error}"),
    }
}

fn repl(cli: &Cli) {
    let mut rl = DefaultEditor::new().expect("failed to create editor");

    if !cli.quiet {
        println!("Lox v{} — bytecode VM", env!("CARGO_PKG_VERSION"));
        println!("Type Ctrl-D to exit\n");
    }

    // One VM for the whole session: each line compiles to its own chunk,
    // but globals carry over.
    let mut vm = Vm::new();
    vm.set_trace(cli.trace);

    loop {
        match rl.readline("lox> ") {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input);

                match compile(input) {
                    Ok(chunk) => {
                        if cli.disassemble {
                            print!("{}", disassemble(&chunk, "<repl>"));
                        }
                        if let Err(error) = vm.run(&chunk) {
                            eprintln!("{error}");
                        }
                    }
                    Err(errors) => {
                        for error in errors {
                            eprintln!("{error}");
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Error: {e}");
                break;
            }
        }
    }

    println!("Goodbye!");
}
