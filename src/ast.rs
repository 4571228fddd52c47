//! Components relating to the abstract syntax trees (ASTs)
//! used in representing SIC/XE instructions.
//!
//! These components together are used to construct...
//! - [`asm::SyntaxNode`] (a data structure holding one tokenized line of assembly source),
//! - and [`sim::SimInstr`] (a data structure holding a decoded machine instruction).
//!
//! This module itself holds the pieces shared between both:
//! the register set ([`Reg`]) and the static opcode table ([`Opcode`]).

pub mod asm;
pub mod sim;

/// Errors from converting a register id into a [`Reg`].
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, thiserror::Error)]
pub enum RegErr {
    /// The id does not name a register.
    #[error("invalid register id {0}")]
    InvalidRegister(u8),
}
impl crate::err::Error for RegErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        Some("register ids are 0-6 (A, X, L, B, S, T, F), 8 (PC), and 9 (SW)".into())
    }
}

/// A register.
///
/// Each register has a small integer id (its discriminant),
/// which is how format 2 instructions refer to it.
/// Id 7 is unassigned.
///
/// ```
/// use sicxe_ensemble::ast::{Reg, RegErr};
///
/// assert_eq!(Reg::try_from(3), Ok(Reg::B));
/// assert_eq!(Reg::try_from(7), Err(RegErr::InvalidRegister(7)));
/// assert_eq!(Reg::B.id(), 3);
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
#[repr(u8)]
pub enum Reg {
    /// Accumulator.
    A = 0,
    /// Index register.
    X = 1,
    /// Linkage register (holds the return address of `JSUB`).
    L = 2,
    /// Base register.
    B = 3,
    #[allow(missing_docs)]
    S = 4,
    #[allow(missing_docs)]
    T = 5,
    /// Floating-point accumulator (48 bits wide).
    F = 6,
    /// Program counter.
    PC = 8,
    /// Status word (holds the condition code).
    SW = 9,
}
impl Reg {
    /// Every register, in id order.
    pub const ALL: [Reg; 9] = [Reg::A, Reg::X, Reg::L, Reg::B, Reg::S, Reg::T, Reg::F, Reg::PC, Reg::SW];

    /// The id of this register.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Looks up a register by its (case-insensitive) name.
    pub fn from_name(name: &str) -> Option<Self> {
        Reg::ALL.into_iter()
            .find(|r| r.name().eq_ignore_ascii_case(name))
    }

    /// The name of this register (e.g., `"A"`).
    pub fn name(self) -> &'static str {
        match self {
            Reg::A  => "A",
            Reg::X  => "X",
            Reg::L  => "L",
            Reg::B  => "B",
            Reg::S  => "S",
            Reg::T  => "T",
            Reg::F  => "F",
            Reg::PC => "PC",
            Reg::SW => "SW",
        }
    }
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
impl TryFrom<u8> for Reg {
    type Error = RegErr;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Reg::A),
            1 => Ok(Reg::X),
            2 => Ok(Reg::L),
            3 => Ok(Reg::B),
            4 => Ok(Reg::S),
            5 => Ok(Reg::T),
            6 => Ok(Reg::F),
            8 => Ok(Reg::PC),
            9 => Ok(Reg::SW),
            _ => Err(RegErr::InvalidRegister(value)),
        }
    }
}

/// The instruction format class an opcode belongs to.
///
/// Format 3/4 opcodes can also appear in the legacy SIC format,
/// which is decided by the encoded bytes rather than the opcode.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum OpClass {
    /// One byte: the opcode alone.
    F1,
    /// Two bytes: the opcode, then two 4-bit register ids.
    F2,
    /// Three or four bytes, with addressing-mode bits.
    F34,
}

macro_rules! opcodes {
    ($($name:ident = $byte:literal: $class:ident),+ $(,)?) => {
        /// A SIC/XE opcode.
        ///
        /// The discriminant is the opcode's byte value (whose lowest two bits are always 0).
        #[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
        #[repr(u8)]
        #[allow(missing_docs)]
        pub enum Opcode {
            $($name = $byte),+
        }

        impl Opcode {
            /// Every opcode, in mnemonic order.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name),+];

            /// Looks up the opcode of an instruction's first byte.
            ///
            /// The lowest two bits (which hold `n` and `i` in format 3/4) are ignored.
            pub fn from_byte(byte: u8) -> Option<Self> {
                match byte & 0xFC {
                    $($byte => Some(Opcode::$name)),+,
                    _ => None
                }
            }

            /// The format class of this opcode.
            pub fn class(self) -> OpClass {
                match self {
                    $(Opcode::$name => OpClass::$class),+
                }
            }

            /// The mnemonic of this opcode (e.g., `"LDA"`).
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => stringify!($name)),+
                }
            }
        }

        impl std::str::FromStr for Opcode {
            type Err = ();

            /// Parses a mnemonic (case-insensitively).
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match &*s.to_uppercase() {
                    $(stringify!($name) => Ok(Opcode::$name)),+,
                    _ => Err(())
                }
            }
        }
    };
}
opcodes! {
    ADD    = 0x18: F34, ADDF   = 0x58: F34, ADDR   = 0x90: F2,
    AND    = 0x40: F34, CLEAR  = 0xB4: F2,  COMP   = 0x28: F34,
    COMPF  = 0x88: F34, COMPR  = 0xA0: F2,  DIV    = 0x24: F34,
    DIVF   = 0x64: F34, DIVR   = 0x9C: F2,  FIX    = 0xC4: F1,
    FLOAT  = 0xC0: F1,  HIO    = 0xF4: F1,  J      = 0x3C: F34,
    JEQ    = 0x30: F34, JGT    = 0x34: F34, JLT    = 0x38: F34,
    JSUB   = 0x48: F34, LDA    = 0x00: F34, LDB    = 0x68: F34,
    LDCH   = 0x50: F34, LDF    = 0x70: F34, LDL    = 0x08: F34,
    LDS    = 0x6C: F34, LDT    = 0x74: F34, LDX    = 0x04: F34,
    LPS    = 0xD0: F34, MUL    = 0x20: F34, MULF   = 0x60: F34,
    MULR   = 0x98: F2,  NORM   = 0xC8: F1,  OR     = 0x44: F34,
    RD     = 0xD8: F34, RMO    = 0xAC: F2,  RSUB   = 0x4C: F34,
    SHIFTL = 0xA4: F2,  SHIFTR = 0xA8: F2,  SIO    = 0xF0: F1,
    SSK    = 0xEC: F34, STA    = 0x0C: F34, STB    = 0x78: F34,
    STCH   = 0x54: F34, STF    = 0x80: F34, STI    = 0xD4: F34,
    STL    = 0x14: F34, STS    = 0x7C: F34, STSW   = 0xE8: F34,
    STT    = 0x84: F34, STX    = 0x10: F34, SUB    = 0x1C: F34,
    SUBF   = 0x5C: F34, SUBR   = 0x94: F2,  SVC    = 0xB0: F2,
    TD     = 0xE0: F34, TIO    = 0xF8: F1,  TIX    = 0x2C: F34,
    TIXR   = 0xB8: F2,  WD     = 0xDC: F34,
}

impl Opcode {
    /// The byte value of this opcode.
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Whether this opcode is in the jump family (`J`, `JEQ`, `JGT`, `JLT`, `JSUB`).
    ///
    /// Jumps use their effective address as the branch target
    /// and never fetch an operand from memory.
    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::J | Opcode::JEQ | Opcode::JGT | Opcode::JLT | Opcode::JSUB)
    }

    /// Whether this opcode stores to its effective address
    /// (rather than reading an operand from it).
    pub fn is_store(self) -> bool {
        matches!(self,
            Opcode::STA | Opcode::STB | Opcode::STCH | Opcode::STF | Opcode::STI
            | Opcode::STL | Opcode::STS | Opcode::STSW | Opcode::STT | Opcode::STX
        )
    }
}
impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}
