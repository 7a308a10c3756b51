//! The execution engine.
//!
//! A [`Vm`] owns one session: the data stack, the return stack, the loaded
//! [`Program`], the instruction pointer and the guest heap. [`Vm::step`]
//! executes exactly one instruction; any fault is terminal for the session.

pub mod heap;
pub mod natives;

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

use tracing::debug;

use crate::isa::Opcode;
use crate::program::{Instruction, Program};
use crate::value::Value;
use heap::ChunkRegistry;
pub use natives::Native;

/// Run-time faults. Each kind has a stable process exit code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    #[error("data stack underflow")]
    DataStackUnderflow,
    #[error("data stack overflow")]
    DataStackOverflow,
    #[error("return stack underflow")]
    ReturnStackUnderflow,
    #[error("return stack overflow")]
    ReturnStackOverflow,
    #[error("illegal instruction")]
    IllegalInstruction,
    #[error("bad instruction pointer")]
    BadInstructionPointer,
    #[error("bad memory pointer")]
    BadMemoryPointer,
    #[error("out of memory")]
    OutOfMemory,
    #[error("already halted")]
    AlreadyHalted,
    #[error("invalid operand")]
    InvalidOperand,
    #[error("invalid type")]
    InvalidType,
    #[error("division by zero")]
    DivisionByZero,
    #[error("native error: {0}")]
    Native(String),
}

impl VmError {
    /// Process exit code for this fault. Zero is a clean halt.
    pub const fn exit_code(&self) -> i32 {
        match self {
            VmError::DataStackUnderflow => 1,
            VmError::DataStackOverflow => 2,
            VmError::ReturnStackUnderflow => 3,
            VmError::ReturnStackOverflow => 4,
            VmError::IllegalInstruction => 5,
            VmError::BadInstructionPointer => 6,
            VmError::BadMemoryPointer => 7,
            VmError::OutOfMemory => 8,
            VmError::AlreadyHalted => 9,
            VmError::InvalidOperand => 10,
            VmError::InvalidType => 11,
            VmError::DivisionByZero => 12,
            VmError::Native(_) => 13,
        }
    }
}

impl From<io::Error> for VmError {
    fn from(err: io::Error) -> Self {
        VmError::Native(err.to_string())
    }
}

pub type VmResult<T> = Result<T, VmError>;

/// Engine limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    pub data_stack_capacity: usize,
    pub return_stack_capacity: usize,
    pub max_chunks: usize,
    pub max_heap_bytes: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            data_stack_capacity: 1024,
            return_stack_capacity: 256,
            max_chunks: 1024,
            max_heap_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Session lifecycle. `Halted` and `Faulted` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ready,
    Running,
    Halted,
    Faulted,
}

/// Where the instruction pointer goes after an instruction.
enum Flow {
    Next,
    Jump(usize),
    Halt,
}

pub struct Vm {
    config: VmConfig,
    data: Vec<Value>,
    returns: Vec<usize>,
    program: Program,
    ip: usize,
    heap: ChunkRegistry,
    state: State,
    debug: bool,
    input: Box<dyn BufRead>,
    /// Words read by `read_int` but not yet handed out.
    pending_input: VecDeque<String>,
    output: Box<dyn Write>,
}

impl Vm {
    /// A session over stdin/stdout with default limits.
    pub fn new(program: Program) -> Self {
        Vm::with_config(program, VmConfig::default())
    }

    pub fn with_config(program: Program, config: VmConfig) -> Self {
        Vm {
            data: Vec::with_capacity(config.data_stack_capacity.min(4096)),
            returns: Vec::new(),
            heap: ChunkRegistry::new(config.max_chunks, config.max_heap_bytes),
            program,
            ip: 0,
            state: State::Ready,
            debug: false,
            input: Box::new(io::stdin().lock()),
            pending_input: VecDeque::new(),
            output: Box::new(io::BufWriter::new(io::stdout())),
            config,
        }
    }

    /// Replaces the console used by natives and the debug trace.
    pub fn with_io(mut self, input: Box<dyn BufRead>, output: Box<dyn Write>) -> Self {
        self.input = input;
        self.pending_input.clear();
        self.output = output;
        self
    }

    /// Prints each instruction and the stack before executing it.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == State::Running
    }

    /// Data stack, bottom first.
    pub fn stack(&self) -> &[Value] {
        &self.data
    }

    pub fn return_stack(&self) -> &[usize] {
        &self.returns
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn heap(&self) -> &ChunkRegistry {
        &self.heap
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn start(&mut self) -> VmResult<()> {
        match self.state {
            State::Ready => {
                debug!(instructions = self.program.len(), "session started");
                self.state = State::Running;
                Ok(())
            }
            State::Running => Ok(()),
            State::Halted | State::Faulted => Err(VmError::AlreadyHalted),
        }
    }

    /// Executes one instruction. A fault moves the session to `Faulted`
    /// and leaves `ip` at the failing instruction.
    pub fn step(&mut self) -> VmResult<()> {
        if self.state != State::Running {
            return Err(VmError::AlreadyHalted);
        }
        match self.execute() {
            Ok(Flow::Next) => self.ip += 1,
            Ok(Flow::Jump(target)) => self.ip = target,
            Ok(Flow::Halt) => {
                debug!(ip = self.ip, "halted");
                self.state = State::Halted;
            }
            Err(err) => {
                debug!(ip = self.ip, error = %err, "fault");
                self.state = State::Faulted;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Starts the session and steps until it halts or faults. Console
    /// output is flushed either way.
    pub fn run(&mut self) -> VmResult<()> {
        self.start()?;
        let mut result = Ok(());
        while self.is_running() {
            if let Err(err) = self.step() {
                result = Err(err);
                break;
            }
        }
        let flushed = self.output.flush();
        result?;
        Ok(flushed?)
    }

    fn execute(&mut self) -> VmResult<Flow> {
        let inst = *self.program.get(self.ip).ok_or(VmError::BadInstructionPointer)?;
        if self.debug {
            self.dump(&inst)?;
        }
        let operand = inst.operand;

        match inst.opcode {
            Opcode::Nop => {}
            Opcode::Hlt => return Ok(Flow::Halt),

            Opcode::Push => self.push(operand)?,
            Opcode::Drop => {
                let n = usize::try_from(operand.as_i64()).map_err(|_| VmError::InvalidOperand)?;
                let len = self.data.len().checked_sub(n).ok_or(VmError::DataStackUnderflow)?;
                self.data.truncate(len);
            }
            Opcode::Dup => {
                let n = self.count(operand)?;
                let len = self.data.len();
                let from = len.checked_sub(n).ok_or(VmError::DataStackUnderflow)?;
                if n > self.config.data_stack_capacity.saturating_sub(len) {
                    return Err(VmError::DataStackOverflow);
                }
                self.data.extend_from_within(from..);
            }
            Opcode::Swap => {
                let n = self.count(operand)?;
                let len = self.data.len();
                let lower = n
                    .checked_mul(2)
                    .and_then(|block| len.checked_sub(block))
                    .ok_or(VmError::DataStackUnderflow)?;
                let upper = len - n;
                let tmp = self.data[lower..upper].to_vec();
                self.data.copy_within(upper..len, lower);
                self.data[upper..].copy_from_slice(&tmp);
            }

            Opcode::Add => self.binary(|a, b| Value::from_i64(a.as_i64().wrapping_add(b.as_i64())))?,
            Opcode::Sub => self.binary(|a, b| Value::from_i64(a.as_i64().wrapping_sub(b.as_i64())))?,
            Opcode::Mul => self.binary(|a, b| Value::from_i64(a.as_i64().wrapping_mul(b.as_i64())))?,
            Opcode::Div => self.binary_fallible(|a, b| match b.as_i64() {
                0 => Err(VmError::DivisionByZero),
                b => Ok(Value::from_i64(a.as_i64().wrapping_div(b))),
            })?,
            Opcode::Mod => self.binary_fallible(|a, b| match b.as_i64() {
                0 => Err(VmError::DivisionByZero),
                b => Ok(Value::from_i64(a.as_i64().wrapping_rem(b))),
            })?,

            Opcode::FAdd => self.binary(|a, b| Value::from_f64(a.as_f64() + b.as_f64()))?,
            Opcode::FSub => self.binary(|a, b| Value::from_f64(a.as_f64() - b.as_f64()))?,
            Opcode::FMul => self.binary(|a, b| Value::from_f64(a.as_f64() * b.as_f64()))?,
            Opcode::FDiv => self.binary(|a, b| Value::from_f64(a.as_f64() / b.as_f64()))?,

            Opcode::And => self.binary(|a, b| Value::from_bits(a.bits() & b.bits()))?,
            Opcode::Or => self.binary(|a, b| Value::from_bits(a.bits() | b.bits()))?,
            Opcode::Xor => self.binary(|a, b| Value::from_bits(a.bits() ^ b.bits()))?,
            Opcode::Not => self.unary(|a| Ok(Value::from_bits(!a.bits())))?,
            // Shift counts are taken modulo 64.
            Opcode::Shl => self.binary(|a, b| Value::from_bits(a.bits().wrapping_shl(b.bits() as u32)))?,
            Opcode::Shr => self.binary(|a, b| Value::from_i64(a.as_i64().wrapping_shr(b.bits() as u32)))?,

            Opcode::LAnd => self.binary(|a, b| Value::from_bool(a.as_bool() && b.as_bool()))?,
            Opcode::LOr => self.binary(|a, b| Value::from_bool(a.as_bool() || b.as_bool()))?,
            Opcode::LNot => self.unary(|a| Ok(Value::from_bool(!a.as_bool())))?,

            Opcode::Eq => self.binary(|a, b| Value::from_bool(a == b))?,
            Opcode::Neq => self.binary(|a, b| Value::from_bool(a != b))?,
            Opcode::Gt => self.binary(|a, b| Value::from_bool(a.as_i64() > b.as_i64()))?,
            Opcode::Lt => self.binary(|a, b| Value::from_bool(a.as_i64() < b.as_i64()))?,
            Opcode::Gte => self.binary(|a, b| Value::from_bool(a.as_i64() >= b.as_i64()))?,
            Opcode::Lte => self.binary(|a, b| Value::from_bool(a.as_i64() <= b.as_i64()))?,
            Opcode::FGt => self.binary(|a, b| Value::from_bool(a.as_f64() > b.as_f64()))?,
            Opcode::FLt => self.binary(|a, b| Value::from_bool(a.as_f64() < b.as_f64()))?,
            Opcode::FGte => self.binary(|a, b| Value::from_bool(a.as_f64() >= b.as_f64()))?,
            Opcode::FLte => self.binary(|a, b| Value::from_bool(a.as_f64() <= b.as_f64()))?,

            Opcode::IToF => self.unary(|a| Ok(Value::from_f64(a.as_i64() as f64)))?,
            Opcode::FToI => self.unary(|a| {
                let f = a.as_f64();
                if f.is_finite() { Ok(Value::from_i64(f as i64)) } else { Err(VmError::InvalidType) }
            })?,

            Opcode::Jmp => return Ok(Flow::Jump(absolute(operand)?)),
            Opcode::CJmp => {
                let taken = self.peek(0)?.as_bool();
                let flow = if taken { Flow::Jump(absolute(operand)?) } else { Flow::Next };
                self.data.pop();
                return Ok(flow);
            }
            Opcode::RJmp => return Ok(Flow::Jump(self.relative(operand)?)),
            Opcode::CRJmp => {
                let taken = self.peek(0)?.as_bool();
                let flow = if taken { Flow::Jump(self.relative(operand)?) } else { Flow::Next };
                self.data.pop();
                return Ok(flow);
            }
            Opcode::Call => {
                if self.returns.len() >= self.config.return_stack_capacity {
                    return Err(VmError::ReturnStackOverflow);
                }
                let target = absolute(operand)?;
                self.returns.push(self.ip + 1);
                return Ok(Flow::Jump(target));
            }
            Opcode::Ret => {
                let target = self.returns.pop().ok_or(VmError::ReturnStackUnderflow)?;
                return Ok(Flow::Jump(target));
            }

            Opcode::NCall => {
                let native = Native::from_index(operand.as_i64()).ok_or(VmError::InvalidOperand)?;
                native.invoke(self)?;
            }

            Opcode::Read8 | Opcode::Read16 | Opcode::Read32 | Opcode::Read64 => {
                let width = inst.opcode.memory_width().ok_or(VmError::IllegalInstruction)?;
                let ptr = self.peek(0)?.as_ptr();
                let value = self.heap.load(ptr, width)?;
                self.replace_top(Value::from_bits(value));
            }
            Opcode::Write8 | Opcode::Write16 | Opcode::Write32 | Opcode::Write64 => {
                let width = inst.opcode.memory_width().ok_or(VmError::IllegalInstruction)?;
                let value = self.peek(0)?;
                let ptr = self.peek(1)?.as_ptr();
                self.heap.store(ptr, width, value.bits())?;
                self.data.truncate(self.data.len() - 2);
            }
        }
        Ok(Flow::Next)
    }

    fn dump(&mut self, inst: &Instruction) -> VmResult<()> {
        let out = &mut self.output;
        writeln!(out, "Current instruction: {} {}", inst.opcode, inst.operand)?;
        writeln!(out, "Stack pointer: {}", self.data.len())?;
        writeln!(out, "Inst pointer: {}", self.ip)?;
        writeln!(out, "Stack:")?;
        for value in &self.data {
            writeln!(out, "\t{value}")?;
        }
        Ok(())
    }

    // ── stack helpers ────────────────────────────────────────────────

    fn push(&mut self, value: Value) -> VmResult<()> {
        if self.data.len() >= self.config.data_stack_capacity {
            return Err(VmError::DataStackOverflow);
        }
        self.data.push(value);
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.data.pop().ok_or(VmError::DataStackUnderflow)
    }

    /// Value `depth` slots below the top.
    fn peek(&self, depth: usize) -> VmResult<Value> {
        self.data
            .len()
            .checked_sub(depth + 1)
            .map(|index| self.data[index])
            .ok_or(VmError::DataStackUnderflow)
    }

    fn replace_top(&mut self, value: Value) {
        if let Some(top) = self.data.last_mut() {
            *top = value;
        }
    }

    /// Strictly positive block count for `dup` and `swap`.
    fn count(&self, operand: Value) -> VmResult<usize> {
        match usize::try_from(operand.as_i64()) {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(VmError::InvalidOperand),
        }
    }

    fn unary(&mut self, f: impl FnOnce(Value) -> VmResult<Value>) -> VmResult<()> {
        let result = f(self.peek(0)?)?;
        self.replace_top(result);
        Ok(())
    }

    fn binary(&mut self, f: impl FnOnce(Value, Value) -> Value) -> VmResult<()> {
        self.binary_fallible(|a, b| Ok(f(a, b)))
    }

    /// Applies `f(left, right)` where `right` is the top of the stack. The
    /// stack is only touched once `f` has succeeded.
    fn binary_fallible(&mut self, f: impl FnOnce(Value, Value) -> VmResult<Value>) -> VmResult<()> {
        let right = self.peek(0)?;
        let left = self.peek(1)?;
        let result = f(left, right)?;
        self.pop()?;
        self.replace_top(result);
        Ok(())
    }

    fn relative(&self, offset: Value) -> VmResult<usize> {
        i64::try_from(self.ip)
            .ok()
            .and_then(|ip| ip.checked_add(offset.as_i64()))
            .and_then(|target| usize::try_from(target).ok())
            .ok_or(VmError::BadInstructionPointer)
    }
}

/// Absolute jump target. Negative addresses fault at once; addresses past
/// the end fail on the next fetch.
fn absolute(target: Value) -> VmResult<usize> {
    usize::try_from(target.as_i64()).map_err(|_| VmError::BadInstructionPointer)
}
