//! Host procedures reachable through `ncall <index>`.
//!
//! | Index | Native       | Stack effect          |
//! |-------|--------------|-----------------------|
//! | 0     | `dump_int`   | `[.. i] -> [..]`      |
//! | 1     | `dump_float` | `[.. f] -> [..]`      |
//! | 2     | `putc`       | `[.. c] -> [..]`      |
//! | 3     | `read_int`   | `[..] -> [.. i]`      |
//! | 4     | `malloc`     | `[.. n] -> [.. ptr]`  |
//! | 5     | `free`       | `[.. ptr] -> [..]`    |
//! | 6     | `time`       | `[..] -> [.. secs]`   |
//!
//! Arguments are read before anything is popped, so a failing native
//! leaves the stack as it found it.

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{Vm, VmError, VmResult};
use crate::value::Value;

macro_rules! define_natives {
    ($( $name:ident = $index:literal, $label:literal; )*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Native {
            $( $name = $index, )*
        }

        impl Native {
            /// The table, in index order.
            pub const ALL: &'static [Native] = &[$(Native::$name,)*];

            pub const fn from_index(index: i64) -> Option<Native> {
                match index {
                    $( $index => Some(Native::$name), )*
                    _ => None,
                }
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $( Native::$name => $label, )*
                }
            }
        }
    };
}

define_natives! {
    DumpInt = 0, "dump_int";
    DumpFloat = 1, "dump_float";
    Putc = 2, "putc";
    ReadInt = 3, "read_int";
    Malloc = 4, "malloc";
    Free = 5, "free";
    Time = 6, "time";
}

impl Native {
    pub const fn index(self) -> usize {
        self as usize
    }

    pub(super) fn invoke(self, vm: &mut Vm) -> VmResult<()> {
        match self {
            Native::DumpInt => {
                let n = vm.peek(0)?.as_i64();
                writeln!(vm.output, "{n}")?;
                vm.pop()?;
            }
            Native::DumpFloat => {
                let f = vm.peek(0)?.as_f64();
                writeln!(vm.output, "{f:?}")?;
                vm.pop()?;
            }
            Native::Putc => {
                let c = vm.peek(0)?.bits() as u8;
                vm.output.write_all(&[c])?;
                vm.pop()?;
            }
            Native::ReadInt => {
                let n = read_int(vm)?;
                vm.push(Value::from_i64(n))?;
            }
            Native::Malloc => {
                let len = usize::try_from(vm.peek(0)?.as_i64()).map_err(|_| VmError::InvalidOperand)?;
                let ptr = vm.heap.allocate(len)?;
                vm.replace_top(Value::from_ptr(ptr));
            }
            Native::Free => {
                let ptr = vm.peek(0)?.as_ptr();
                vm.heap.release(ptr)?;
                vm.pop()?;
            }
            Native::Time => {
                let secs = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_err(|err| VmError::Native(format!("time: {err}")))?
                    .as_secs();
                vm.push(Value::from_i64(secs as i64))?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Native {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Takes the next whitespace-delimited word from input as an integer,
/// reading more lines as needed. Pending output is flushed before a read
/// blocks so prompts appear first.
fn read_int(vm: &mut Vm) -> VmResult<i64> {
    if vm.data.len() >= vm.config.data_stack_capacity {
        return Err(VmError::DataStackOverflow);
    }
    let word = loop {
        if let Some(word) = vm.pending_input.pop_front() {
            break word;
        }
        vm.output.flush()?;
        let mut line = String::new();
        if vm.input.read_line(&mut line)? == 0 {
            return Err(VmError::Native("read_int: end of input".into()));
        }
        vm.pending_input.extend(line.split_whitespace().map(str::to_owned));
    };
    word.parse()
        .map_err(|_| VmError::Native(format!("read_int: not an integer: {word:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::tests::{run_source, session};

    #[test]
    fn table_indices_are_dense() {
        for (i, native) in Native::ALL.iter().enumerate() {
            assert_eq!(native.index(), i);
            assert_eq!(Native::from_index(i as i64), Some(*native));
        }
        assert_eq!(Native::from_index(Native::ALL.len() as i64), None);
        assert_eq!(Native::Time.to_string(), "time");
    }

    #[test]
    fn table_lists_every_native_in_order() {
        let names: Vec<&str> = Native::ALL.iter().map(|n| n.name()).collect();
        assert_eq!(names, ["dump_int", "dump_float", "putc", "read_int", "malloc", "free", "time"]);
        assert_eq!(Native::from_index(-1), None);
    }

    #[test]
    fn printing_natives() {
        let (vm, result, out) = run_source("push -42 ncall 0 push 5 itof push 2 itof fdiv ncall 1 push 'h' ncall 2 push '\\n' ncall 2 hlt");
        assert_eq!(result, Ok(()));
        assert_eq!(out, "-42\n2.5\nh\n");
        assert!(vm.stack().is_empty());
    }

    #[test]
    fn putc_writes_the_low_byte() {
        let (_, _, out) = run_source("push 0x141 ncall 2 hlt");
        assert_eq!(out, "A");
    }

    #[test]
    fn read_int_skips_blank_lines() {
        let (mut vm, _) = session("ncall 3 ncall 3 add hlt", "\n  12\n\n-5\n");
        assert_eq!(vm.run(), Ok(()));
        assert_eq!(vm.stack(), [Value::from_i64(7)]);
    }

    #[test]
    fn read_int_takes_one_word_per_call() {
        let (mut vm, _) = session("ncall 3 ncall 3 add ncall 3 hlt", "6 7\n\t-2\n");
        assert_eq!(vm.run(), Ok(()));
        assert_eq!(vm.stack(), [Value::from_i64(13), Value::from_i64(-2)]);
    }

    #[test]
    fn read_int_checks_capacity_before_reading() {
        use std::io::BufRead;

        let program = crate::assembler::assemble("push 1 ncall 3 hlt").unwrap();
        let config = crate::vm::VmConfig { data_stack_capacity: 1, ..crate::vm::VmConfig::default() };
        let mut vm = Vm::with_config(program, config)
            .with_io(Box::new(std::io::Cursor::new("5\n")), Box::new(std::io::sink()));
        assert_eq!(vm.run(), Err(VmError::DataStackOverflow));
        assert_eq!(vm.stack(), [Value::from_i64(1)]);
        assert!(vm.pending_input.is_empty());
        assert_eq!(vm.input.fill_buf().unwrap(), b"5\n");
    }

    #[test]
    fn read_int_failures_are_native_errors() {
        let (mut vm, _) = session("ncall 3 hlt", "");
        assert!(matches!(vm.run(), Err(VmError::Native(msg)) if msg.contains("end of input")));

        let (mut vm, _) = session("ncall 3 hlt", "twelve\n");
        assert!(matches!(vm.run(), Err(VmError::Native(msg)) if msg.contains("twelve")));
    }

    #[test]
    fn malloc_rejects_negative_sizes() {
        let (vm, result, _) = run_source("push -1 ncall 4 hlt");
        assert_eq!(result, Err(VmError::InvalidOperand));
        assert_eq!(vm.stack(), [Value::from_i64(-1)]);
    }

    #[test]
    fn malloc_reports_exhaustion() {
        let (_, result, _) = run_source("push 0x7fffffffffffffff ncall 4 hlt");
        assert_eq!(result, Err(VmError::OutOfMemory));
    }

    #[test]
    fn free_needs_a_live_base() {
        let (_, result, _) = run_source("push 8 ncall 4 push 1 add ncall 5 hlt");
        assert_eq!(result, Err(VmError::BadMemoryPointer));

        let (_, result, _) = run_source("push 8 ncall 4 dup 1 ncall 5 ncall 5 hlt");
        assert_eq!(result, Err(VmError::BadMemoryPointer));
    }

    #[test]
    fn live_chunks_are_tracked() {
        let (vm, result, _) = run_source("push 8 ncall 4 push 24 ncall 4 hlt");
        assert_eq!(result, Ok(()));
        assert_eq!(vm.heap().chunks().len(), 2);
        assert_eq!(vm.heap().live_bytes(), 32);
    }

    #[test]
    fn time_is_after_2020() {
        let (vm, result, _) = run_source("ncall 6 hlt");
        assert_eq!(result, Ok(()));
        assert!(vm.stack()[0].as_i64() > 1_577_836_800);
    }
}
