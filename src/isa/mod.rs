//! Instruction set definition.
//!
//! `define_opcodes!` holds the one canonical list of opcodes and expands it
//! into the [`Opcode`] enum together with its mnemonic table, wire tags and
//! operand flags. Every lookup is an exhaustive `match`, so adding an opcode
//! without a mnemonic or a tag does not compile.
//!
//! # Operand discipline
//!
//! Opcodes marked `operand` read the instruction's [`Value`](crate::value::Value)
//! operand. For all others the operand is ignored and encoded as zero.

macro_rules! define_opcodes {
    (@arity operand) => { true };
    (@arity none) => { false };

    (
        $(
            $(#[$doc:meta])*
            $name:ident = $tag:literal, $mnemonic:literal, $arity:ident;
        )*
    ) => {
        #[repr(u32)]
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $(
                $(#[$doc])*
                $name = $tag,
            )*
        }

        impl Opcode {
            /// Every opcode, in wire-tag order.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name,)*];

            /// Assembly mnemonic.
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Whether the instruction reads its operand.
            pub const fn takes_operand(self) -> bool {
                match self {
                    $( Opcode::$name => define_opcodes!(@arity $arity), )*
                }
            }

            pub const fn tag(self) -> u32 {
                self as u32
            }

            pub const fn from_tag(tag: u32) -> Option<Opcode> {
                match tag {
                    $( $tag => Some(Opcode::$name), )*
                    _ => None,
                }
            }

            pub fn from_mnemonic(text: &str) -> Option<Opcode> {
                match text {
                    $( $mnemonic => Some(Opcode::$name), )*
                    _ => None,
                }
            }
        }
    };
}

define_opcodes! {
    // ---- misc ----
    /// nop ; ip += 1
    Nop = 0, "nop", none;
    /// hlt ; stop the session cleanly
    Hlt = 1, "hlt", none;

    // ---- stack shape ----
    /// push v ; [..] -> [.. v]
    Push = 2, "push", operand;
    /// drop n ; pop n values (n = 0 is a no-op)
    Drop = 3, "drop", operand;
    /// dup n ; copy the top n values, preserving order
    Dup = 4, "dup", operand;
    /// swap n ; exchange the two top blocks of n values
    Swap = 5, "swap", operand;

    // ---- integer arithmetic (wrapping) ----
    Add = 6, "add", none;
    Sub = 7, "sub", none;
    Mul = 8, "mul", none;
    /// div ; faults on a zero divisor before touching the stack
    Div = 9, "div", none;
    /// mod ; faults on a zero divisor before touching the stack
    Mod = 10, "mod", none;

    // ---- float arithmetic ----
    FAdd = 11, "fadd", none;
    FSub = 12, "fsub", none;
    FMul = 13, "fmul", none;
    FDiv = 14, "fdiv", none;

    // ---- bitwise ----
    And = 15, "and", none;
    Or = 16, "or", none;
    Xor = 17, "xor", none;
    Not = 18, "not", none;
    Shl = 19, "shl", none;
    /// shr ; arithmetic shift
    Shr = 20, "shr", none;

    // ---- logical ----
    LAnd = 21, "land", none;
    LOr = 22, "lor", none;
    LNot = 23, "lnot", none;

    // ---- comparison ----
    /// eq ; bitwise equality, defined for every reading
    Eq = 24, "eq", none;
    Neq = 25, "neq", none;
    Gt = 26, "gt", none;
    Lt = 27, "lt", none;
    Gte = 28, "gte", none;
    Lte = 29, "lte", none;
    FGt = 30, "fgt", none;
    FLt = 31, "flt", none;
    FGte = 32, "fgte", none;
    FLte = 33, "flte", none;

    // ---- conversion ----
    IToF = 34, "itof", none;
    /// ftoi ; NaN and infinities are an invalid-type fault
    FToI = 35, "ftoi", none;

    // ---- control flow ----
    /// jmp addr ; ip = addr
    Jmp = 36, "jmp", operand;
    /// cjmp addr ; pop cond, ip = addr if cond
    CJmp = 37, "cjmp", operand;
    /// rjmp off ; ip += off
    RJmp = 38, "rjmp", operand;
    /// crjmp off ; pop cond, ip += off if cond
    CRJmp = 39, "crjmp", operand;
    /// call addr ; push ip + 1 on the return stack, ip = addr
    Call = 40, "call", operand;
    /// ret ; ip = pop return stack
    Ret = 41, "ret", none;

    // ---- natives ----
    /// ncall idx ; invoke native `idx`
    NCall = 42, "ncall", operand;

    // ---- memory ----
    /// read8 ; [.. ptr] -> [.. byte]
    Read8 = 43, "read8", none;
    Read16 = 44, "read16", none;
    Read32 = 45, "read32", none;
    Read64 = 46, "read64", none;
    /// write8 ; [.. ptr value] -> [..]
    Write8 = 47, "write8", none;
    Write16 = 48, "write16", none;
    Write32 = 49, "write32", none;
    Write64 = 50, "write64", none;
}

impl Opcode {
    /// Access width in bytes for memory opcodes.
    pub const fn memory_width(self) -> Option<usize> {
        match self {
            Opcode::Read8 | Opcode::Write8 => Some(1),
            Opcode::Read16 | Opcode::Write16 => Some(2),
            Opcode::Read32 | Opcode::Write32 => Some(4),
            Opcode::Read64 | Opcode::Write64 => Some(8),
            _ => None,
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}
