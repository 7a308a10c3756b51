//! Run a lapis bytecode file.
//!
//! Usage: `lapis <file.lbc> [--debug] [--stack-size N] [--return-stack-size N]
//! [--max-chunks N] [--max-heap-bytes N]`
//!
//! Exits with 0 on `hlt`, otherwise with the fault's code.

use std::path::PathBuf;
use std::process;

use clap::Parser;

use lapis::program::codec::{self, CodecError};
use lapis::vm::{Vm, VmConfig, VmError};

#[derive(Parser, Debug)]
#[command(name = "lapis", version)]
#[command(about = "Execute a lapis bytecode file")]
struct Args {
    /// Bytecode file produced by lapisasm
    input: PathBuf,

    /// Print each instruction and the stack before executing it
    #[arg(short, long)]
    debug: bool,

    /// Data stack capacity, in values
    #[arg(long = "stack-size", default_value_t = VmConfig::default().data_stack_capacity)]
    stack_size: usize,

    /// Return stack capacity, in addresses
    #[arg(long = "return-stack-size", default_value_t = VmConfig::default().return_stack_capacity)]
    return_stack_size: usize,

    /// Maximum number of live heap chunks
    #[arg(long = "max-chunks", default_value_t = VmConfig::default().max_chunks)]
    max_chunks: usize,

    /// Maximum live heap size, in bytes
    #[arg(long = "max-heap-bytes", default_value_t = VmConfig::default().max_heap_bytes)]
    max_heap_bytes: usize,
}

impl Args {
    fn config(&self) -> VmConfig {
        VmConfig {
            data_stack_capacity: self.stack_size,
            return_stack_capacity: self.return_stack_size,
            max_chunks: self.max_chunks,
            max_heap_bytes: self.max_heap_bytes,
        }
    }
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

    let program = match codec::read_file(&args.input) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("ERROR: {err}");
            let code = match err {
                CodecError::IllegalInstruction { .. } => VmError::IllegalInstruction.exit_code(),
                _ => 1,
            };
            process::exit(code);
        }
    };

    let mut vm = Vm::with_config(program, args.config());
    vm.set_debug(args.debug);

    if let Err(err) = vm.run() {
        eprintln!("ERROR: {err} at address {}", vm.ip());
        drop(vm);
        process::exit(err.exit_code());
    }
}
