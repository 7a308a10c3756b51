//! Assemble lapis source into bytecode.
//!
//! Usage: `lapisasm <file.lasm> -o <file.lbc> [--debug] [--vm PATH [--run]]`

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::{self, Command, ExitStatus};

use clap::Parser;

use lapis::assembler::{self, Event};
use lapis::diagnostic::Diagnostic;
use lapis::diagnostic::ansi::AnsiRenderer;
use lapis::program::codec;

#[derive(Parser, Debug)]
#[command(name = "lapisasm", version)]
#[command(about = "Assemble lapis source into bytecode")]
struct Args {
    /// Assembly source file
    input: PathBuf,

    /// Where to write the bytecode
    #[arg(short, long)]
    output: PathBuf,

    /// Echo tokens and emitted instructions while assembling
    #[arg(short, long)]
    debug: bool,

    /// Interpreter for a `#!` line; makes the output directly executable
    #[arg(long = "vm", value_name = "PATH")]
    vm: Option<String>,

    /// Run the output with the interpreter and report its exit status
    #[arg(short, long, requires = "vm")]
    run: bool,
}

fn main() {
    lapis::logging::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            process::exit(if err.use_stderr() { 1 } else { 0 });
        }
    };

    let source = match std::fs::read_to_string(&args.input) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: could not read {}: {err}", args.input.display());
            process::exit(1);
        }
    };

    let assembled = assembler::assemble_with(&source, |event| {
        if args.debug {
            echo(event);
        }
    });
    let program = match assembled {
        Ok(program) => program,
        Err(err) => {
            let diagnostic = Diagnostic::from(&err).with_source(args.input.display().to_string(), source);
            let renderer = AnsiRenderer { use_color: std::io::stderr().is_terminal() };
            eprint!("{}", renderer.render(&diagnostic));
            process::exit(1);
        }
    };

    if let Err(err) = codec::write_file(&args.output, &program, args.vm.as_deref()) {
        eprintln!("error: {err}");
        process::exit(1);
    }
    println!("Compiled {} -> {} successfully.", args.input.display(), args.output.display());

    if let (true, Some(vm)) = (args.run, &args.vm) {
        println!("[CMD] {vm} {}", args.output.display());
        match Command::new(vm).arg(&args.output).status() {
            Ok(status) => println!("{}", describe(status)),
            Err(err) => {
                eprintln!("error: could not run {vm}: {err}");
                process::exit(1);
            }
        }
    }
}

fn echo(event: Event<'_>) {
    match event {
        Event::Token(token) => println!("[token] {:<16} {}", token.text, token.kind.describe()),
        Event::Instruction { address, instruction } => println!("[emit]  {address}: {instruction}"),
    }
}

fn describe(status: ExitStatus) -> String {
    if status.success() {
        return "Process exited normally.".to_string();
    }
    match (status.code(), signal(&status)) {
        (Some(code), _) => format!("Process exited abnormally with code {code}."),
        (None, Some(sig)) => format!("Process terminated by signal {sig}."),
        (None, None) => "Process terminated abnormally.".to_string(),
    }
}

#[cfg(unix)]
fn signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal(_status: &ExitStatus) -> Option<i32> {
    None
}
