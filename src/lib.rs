//! A stack-based bytecode virtual machine and its assembler.
//!
//! Assembly text goes through [`lexer`], [`parser`] and [`assembler`] into a
//! [`program::Program`], which [`program::codec`] stores as bytecode and
//! [`vm`] executes.

pub mod assembler;
pub mod diagnostic;
pub mod isa;
pub mod lexer;
pub mod logging;
pub mod parser;
pub mod program;
pub mod source;
pub mod value;
pub mod vm;
