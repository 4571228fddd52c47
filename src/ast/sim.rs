//! This module is used for holding simulation instructions ([`SimInstr`]),
//! which are instructions that directly map to bytes in memory.
//!
//! It also holds the codec between bytes and instructions:
//! - [`Format::classify`]: determine the format (and thus length) of the instruction at some bytes,
//! - [`SimInstr::decode`]: decode one instruction,
//! - [`decode_stream`]: tolerantly decode a whole run of bytes,
//! - [`SimInstr::encode`]: produce the exact bytes of an instruction.
//!
//! For instance, the bytes `03 20 0C` decode to:
//! ```
//! use sicxe_ensemble::ast::Opcode;
//! use sicxe_ensemble::ast::sim::{AbsMode, AddrModes, RelMode, SimInstr};
//!
//! let instr = SimInstr::decode(&[0x03, 0x20, 0x0C]).unwrap();
//! assert_eq!(instr, SimInstr::F3 {
//!     op: Opcode::LDA,
//!     modes: AddrModes { rel: RelMode::Pc, abs: AbsMode::Direct, indexed: false },
//!     disp: 0x00C
//! });
//! assert_eq!(instr.encode(), vec![0x03, 0x20, 0x0C]);
//! ```

use crate::addressing::{decode_modes, encode_modes};
use crate::ast::{OpClass, Opcode, Reg};

/// Errors that can occur when decoding instruction bytes.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, thiserror::Error)]
pub enum DecodeErr {
    /// The byte does not start any known instruction.
    #[error("invalid opcode {0:02X}")]
    InvalidOpcode(u8),
    /// The `b` and `p` bits were both set.
    #[error("invalid addressing mode: b and p both set")]
    InvalidAddressing,
    /// There were fewer bytes than the instruction's format requires.
    #[error("instruction needs {needed} bytes, but only {available} were available")]
    Truncated {
        /// The length of the instruction.
        needed: usize,
        /// The number of bytes that were available.
        available: usize,
    },
}
impl crate::err::Error for DecodeErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            DecodeErr::InvalidOpcode(_) => None,
            DecodeErr::InvalidAddressing => Some("an instruction can be PC-relative or base-relative, but not both".into()),
            DecodeErr::Truncated { .. } => None,
        }
    }
}

/// The format of an instruction, which decides its length.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Format {
    /// Legacy 3-byte format without addressing-mode bits.
    Sic,
    /// 1 byte.
    F1,
    /// 2 bytes.
    F2,
    /// 3 bytes.
    F3,
    /// 4 bytes.
    F4,
    /// A single byte that is not an instruction.
    Data,
}
impl Format {
    /// The length (in bytes) of an instruction of this format.
    pub fn len(self) -> usize {
        match self {
            Format::F1 | Format::Data => 1,
            Format::F2 => 2,
            Format::Sic | Format::F3 => 3,
            Format::F4 => 4,
        }
    }

    /// Classifies the instruction that starts at the beginning of `bytes`.
    ///
    /// Classification needs at most the first two bytes.
    /// If a format 3/4 instruction's second byte is not available yet,
    /// this reports [`Format::F3`] (the shorter of the two).
    ///
    /// # Errors
    /// - [`DecodeErr::InvalidOpcode`] if the first byte is not a known opcode
    ///   (format 1/2 opcodes have no `n i` bits, so their low two bits must be clear)
    /// - [`DecodeErr::Truncated`] if `bytes` is empty
    pub fn classify(bytes: &[u8]) -> Result<Format, DecodeErr> {
        let &b0 = bytes.first().ok_or(DecodeErr::Truncated { needed: 1, available: 0 })?;
        let op = Opcode::from_byte(b0).ok_or(DecodeErr::InvalidOpcode(b0))?;

        let fmt = match op.class() {
            OpClass::F1 | OpClass::F2 if b0 & 0b11 != 0 => return Err(DecodeErr::InvalidOpcode(b0)),
            OpClass::F1 => Format::F1,
            OpClass::F2 => Format::F2,
            OpClass::F34 if b0 & 0b11 == 0 => Format::Sic,
            OpClass::F34 => match bytes.get(1) {
                Some(b1) if b1 & 0x10 != 0 => Format::F4,
                _ => Format::F3,
            },
        };
        Ok(fmt)
    }
}

/// Relative addressing mode (decided by the `b` and `p` bits).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum RelMode {
    /// The address field is used as is.
    Direct,
    /// The address field is a displacement from PC.
    Pc,
    /// The address field is a displacement from register B.
    Base,
    /// Both `b` and `p` are set, which does not designate any mode.
    Invalid,
}

/// Absolute addressing mode (decided by the `n` and `i` bits).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AbsMode {
    /// Legacy SIC addressing: the operand is the word at the address.
    Sic,
    /// The operand is the address itself.
    Immediate,
    /// The address holds the address of the operand.
    Indirect,
    /// The operand is the word at the address.
    Direct,
}

/// The addressing modes of a format SIC/3/4 instruction.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct AddrModes {
    /// How the address field is offset.
    pub rel: RelMode,
    /// How the operand is found from the address.
    pub abs: AbsMode,
    /// Whether register X is added to the address.
    pub indexed: bool,
}
impl AddrModes {
    /// The modes of a legacy SIC instruction.
    pub fn sic(indexed: bool) -> Self {
        AddrModes { rel: RelMode::Direct, abs: AbsMode::Sic, indexed }
    }
}

/// A decoded machine instruction.
///
/// Each variant maps to exactly one byte encoding (see [`SimInstr::encode`]).
///
/// Format 3/4 instructions never use [`AbsMode::Sic`],
/// since `n = i = 0` selects the [`SimInstr::Sic`] format instead.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum SimInstr {
    /// A format 1 instruction.
    F1(Opcode),
    /// A format 2 instruction with its two 4-bit operand nibbles.
    ///
    /// For most opcodes both nibbles are register ids,
    /// but `SHIFTL`/`SHIFTR` hold a count (minus one) in `r2`, and `SVC` holds a number in `r1`.
    F2 {
        #[allow(missing_docs)]
        op: Opcode,
        #[allow(missing_docs)]
        r1: u8,
        #[allow(missing_docs)]
        r2: u8,
    },
    /// A legacy SIC instruction with a 15-bit address.
    Sic {
        #[allow(missing_docs)]
        op: Opcode,
        #[allow(missing_docs)]
        indexed: bool,
        /// The 15-bit address field.
        addr: u16,
    },
    /// A format 3 instruction with a 12-bit displacement field.
    F3 {
        #[allow(missing_docs)]
        op: Opcode,
        #[allow(missing_docs)]
        modes: AddrModes,
        /// The raw 12-bit displacement field (see [`SimInstr::disp`] for its signed value).
        disp: u16,
    },
    /// A format 4 instruction with a 20-bit address field.
    F4 {
        #[allow(missing_docs)]
        op: Opcode,
        #[allow(missing_docs)]
        modes: AddrModes,
        /// The 20-bit address field.
        addr: u32,
    },
    /// A byte that is not an instruction.
    Data(u8),
}

impl SimInstr {
    /// Decodes the instruction at the start of `bytes`.
    ///
    /// Bytes after the instruction are ignored.
    ///
    /// # Errors
    /// - [`DecodeErr::InvalidOpcode`] if the first byte is not a known opcode
    /// - [`DecodeErr::Truncated`] if `bytes` is shorter than the instruction
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeErr> {
        let fmt = Format::classify(bytes)?;
        let needed = fmt.len();
        let Some(bytes) = bytes.get(..needed) else {
            return Err(DecodeErr::Truncated { needed, available: bytes.len() });
        };

        let b0 = bytes[0];
        let op = Opcode::from_byte(b0).ok_or(DecodeErr::InvalidOpcode(b0))?;
        let instr = match fmt {
            Format::F1 => SimInstr::F1(op),
            Format::F2 => SimInstr::F2 { op, r1: bytes[1] >> 4, r2: bytes[1] & 0xF },
            Format::Sic => SimInstr::Sic {
                op,
                indexed: bytes[1] & 0x80 != 0,
                addr: u16::from_be_bytes([bytes[1], bytes[2]]) & 0x7FFF,
            },
            Format::F3 => SimInstr::F3 {
                op,
                modes: decode_modes(b0, bytes[1]),
                disp: u16::from_be_bytes([bytes[1], bytes[2]]) & 0xFFF,
            },
            Format::F4 => SimInstr::F4 {
                op,
                modes: decode_modes(b0, bytes[1]),
                addr: u32::from_be_bytes([0, bytes[1], bytes[2], bytes[3]]) & 0xF_FFFF,
            },
            Format::Data => unreachable!("classify never reports data"),
        };
        Ok(instr)
    }

    /// Encodes this instruction into its exact byte sequence.
    ///
    /// Fields wider than their encoding are truncated.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            SimInstr::F1(op) => vec![op.byte()],
            SimInstr::F2 { op, r1, r2 } => vec![op.byte(), (r1 << 4) | (r2 & 0xF)],
            SimInstr::Sic { op, indexed, addr } => {
                let [hi, lo] = (addr & 0x7FFF).to_be_bytes();
                vec![op.byte(), (u8::from(indexed) << 7) | hi, lo]
            },
            SimInstr::F3 { op, modes, disp } => {
                let (ni, xbpe) = encode_modes(modes, false);
                let [hi, lo] = (disp & 0xFFF).to_be_bytes();
                vec![op.byte() | ni, (xbpe << 4) | hi, lo]
            },
            SimInstr::F4 { op, modes, addr } => {
                let (ni, xbpe) = encode_modes(modes, true);
                let [_, hi, mid, lo] = (addr & 0xF_FFFF).to_be_bytes();
                vec![op.byte() | ni, (xbpe << 4) | hi, mid, lo]
            },
            SimInstr::Data(b) => vec![b],
        }
    }

    /// The format of this instruction.
    pub fn format(&self) -> Format {
        match self {
            SimInstr::F1(_)      => Format::F1,
            SimInstr::F2 { .. }  => Format::F2,
            SimInstr::Sic { .. } => Format::Sic,
            SimInstr::F3 { .. }  => Format::F3,
            SimInstr::F4 { .. }  => Format::F4,
            SimInstr::Data(_)    => Format::Data,
        }
    }

    /// The length of this instruction in bytes.
    pub fn len(&self) -> usize {
        self.format().len()
    }

    /// The opcode of this instruction (or `None` for data).
    pub fn opcode(&self) -> Option<Opcode> {
        match *self {
            SimInstr::F1(op) => Some(op),
            SimInstr::F2 { op, .. }
            | SimInstr::Sic { op, .. }
            | SimInstr::F3 { op, .. }
            | SimInstr::F4 { op, .. } => Some(op),
            SimInstr::Data(_) => None,
        }
    }

    /// The addressing modes of this instruction (for formats SIC/3/4).
    pub fn modes(&self) -> Option<AddrModes> {
        match *self {
            SimInstr::Sic { indexed, .. } => Some(AddrModes::sic(indexed)),
            SimInstr::F3 { modes, .. } | SimInstr::F4 { modes, .. } => Some(modes),
            _ => None,
        }
    }

    /// The signed value of the address field (for formats SIC/3/4).
    ///
    /// The SIC field is 15-bit unsigned, the format 3 field is sign-extended from 12 bits,
    /// and the format 4 field is 20-bit unsigned.
    pub fn disp(&self) -> Option<i32> {
        match *self {
            SimInstr::Sic { addr, .. } => Some(i32::from(addr & 0x7FFF)),
            SimInstr::F3 { disp, .. } => Some((i32::from(disp & 0xFFF) << 20) >> 20),
            SimInstr::F4 { addr, .. } => Some((addr & 0xF_FFFF) as i32),
            _ => None,
        }
    }
}

impl std::fmt::Display for SimInstr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn reg(id: u8) -> String {
            Reg::try_from(id).map_or_else(|_| id.to_string(), |r| r.to_string())
        }
        fn operand(f: &mut std::fmt::Formatter<'_>, modes: AddrModes, field: String) -> std::fmt::Result {
            match modes.abs {
                AbsMode::Immediate => f.write_str("#")?,
                AbsMode::Indirect  => f.write_str("@")?,
                AbsMode::Sic | AbsMode::Direct => {},
            }
            f.write_str(&field)?;
            if modes.indexed { f.write_str(",X")?; }
            match modes.rel {
                RelMode::Direct  => Ok(()),
                RelMode::Pc      => f.write_str(" (pc)"),
                RelMode::Base    => f.write_str(" (base)"),
                RelMode::Invalid => f.write_str(" (invalid)"),
            }
        }

        match *self {
            SimInstr::F1(op) => write!(f, "{op}"),
            SimInstr::F2 { op: op @ (Opcode::CLEAR | Opcode::TIXR), r1, .. } => write!(f, "{op} {}", reg(r1)),
            SimInstr::F2 { op: op @ (Opcode::SHIFTL | Opcode::SHIFTR), r1, r2 } => write!(f, "{op} {}, {}", reg(r1), u32::from(r2) + 1),
            SimInstr::F2 { op: Opcode::SVC, r1, .. } => write!(f, "SVC {r1}"),
            SimInstr::F2 { op, r1, r2 } => write!(f, "{op} {}, {}", reg(r1), reg(r2)),
            SimInstr::Sic { op: Opcode::RSUB, .. }
            | SimInstr::F3 { op: Opcode::RSUB, .. } => f.write_str("RSUB"),
            SimInstr::F4 { op: Opcode::RSUB, .. } => f.write_str("+RSUB"),
            SimInstr::Sic { op, indexed, addr } => {
                write!(f, "{op} ")?;
                operand(f, AddrModes::sic(indexed), format!("{addr:04X}"))
            },
            SimInstr::F3 { op, modes, .. } => {
                write!(f, "{op} ")?;
                operand(f, modes, self.disp().unwrap_or(0).to_string())
            },
            SimInstr::F4 { op, modes, addr } => {
                write!(f, "+{op} ")?;
                operand(f, modes, format!("{addr:05X}"))
            },
            SimInstr::Data(b) => write!(f, "BYTE X'{b:02X}'"),
        }
    }
}

/// A machine instruction located at some address.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Instruction {
    /// The address of the first byte of this instruction.
    pub addr: u32,
    /// The instruction.
    pub instr: SimInstr,
}
impl Instruction {
    /// The byte length of this instruction.
    pub fn len(&self) -> usize {
        self.instr.len()
    }
    /// The address after the last byte of this instruction.
    pub fn end(&self) -> u32 {
        self.addr + self.len() as u32
    }
    /// Whether `addr` falls within this instruction's bytes.
    pub fn covers(&self, addr: u32) -> bool {
        (self.addr..self.end()).contains(&addr)
    }
    /// The raw bytes of this instruction.
    pub fn bytes(&self) -> Vec<u8> {
        self.instr.encode()
    }
}

/// The result of [`decode_stream`].
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct DecodedStream {
    /// Every instruction fully contained within the stream, in address order.
    pub instrs: Vec<Instruction>,
    /// Bytes at the end of the stream that begin an instruction but do not complete it.
    ///
    /// These should be prepended to the next chunk of bytes before decoding continues.
    pub leftover: Vec<u8>,
}

/// Decodes a run of bytes starting at address `start`.
///
/// This never fails:
/// - A byte that does not start a known instruction is decoded as a 1-byte [`SimInstr::Data`].
/// - If the stream ends partway through an instruction, those bytes are returned as
///   [`DecodedStream::leftover`].
///
/// ```
/// use sicxe_ensemble::ast::Opcode;
/// use sicxe_ensemble::ast::sim::{decode_stream, SimInstr};
///
/// let out = decode_stream(0, &[0xC4, 0xFF, 0xC4, 0x03]);
/// let instrs: Vec<_> = out.instrs.iter().map(|i| i.instr).collect();
/// assert_eq!(instrs, [SimInstr::F1(Opcode::FIX), SimInstr::Data(0xFF), SimInstr::F1(Opcode::FIX)]);
/// assert_eq!(out.leftover, [0x03]);
/// ```
pub fn decode_stream(start: u32, bytes: &[u8]) -> DecodedStream {
    let mut instrs = vec![];
    let mut i = 0;

    while i < bytes.len() {
        let addr = start + i as u32;
        let rest = &bytes[i..];
        let instr = match SimInstr::decode(rest) {
            Ok(instr) => instr,
            Err(DecodeErr::Truncated { .. }) => {
                return DecodedStream { instrs, leftover: rest.to_vec() };
            },
            Err(_) => SimInstr::Data(rest[0]),
        };

        i += instr.len();
        instrs.push(Instruction { addr, instr });
    }

    DecodedStream { instrs, leftover: vec![] }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn decoded(bytes: &[u8]) -> Vec<SimInstr> {
        decode_stream(0, bytes).instrs.into_iter().map(|i| i.instr).collect()
    }

    #[test]
    fn test_classify() {
        assert_eq!(Format::classify(&[0xC4]), Ok(Format::F1));
        assert_eq!(Format::classify(&[0x90, 0x04]), Ok(Format::F2));
        assert_eq!(Format::classify(&[0x18, 0x10, 0x00]), Ok(Format::Sic));
        assert_eq!(Format::classify(&[0x1B, 0x20, 0x00]), Ok(Format::F3));
        assert_eq!(Format::classify(&[0x4B, 0x10, 0x10, 0x36]), Ok(Format::F4));
        assert_eq!(Format::classify(&[0x4B]), Ok(Format::F3));
        assert_eq!(Format::classify(&[0xFF]), Err(DecodeErr::InvalidOpcode(0xFF)));
        assert_eq!(Format::classify(&[0xF1]), Err(DecodeErr::InvalidOpcode(0xF1)));
        assert_eq!(Format::classify(&[0x91, 0x04]), Err(DecodeErr::InvalidOpcode(0x91)));
        assert_eq!(Format::classify(&[]), Err(DecodeErr::Truncated { needed: 1, available: 0 }));
    }

    #[test]
    fn test_decode_fields() {
        assert_eq!(SimInstr::decode(&[0x90, 0x04]), Ok(SimInstr::F2 { op: Opcode::ADDR, r1: 0, r2: 4 }));
        assert_eq!(
            SimInstr::decode(&[0x18, 0x90, 0x00]),
            Ok(SimInstr::Sic { op: Opcode::ADD, indexed: true, addr: 0x1000 })
        );
        assert_eq!(
            SimInstr::decode(&[0x4B, 0x10, 0x10, 0x36]),
            Ok(SimInstr::F4 {
                op: Opcode::JSUB,
                modes: AddrModes { rel: RelMode::Direct, abs: AbsMode::Direct, indexed: false },
                addr: 0x01036
            })
        );

        let neg = SimInstr::decode(&[0x3F, 0x2F, 0xFD]).unwrap();
        assert_eq!(neg.disp(), Some(-3));
        assert_eq!(neg.to_string(), "J -3 (pc)");

        let invalid = SimInstr::decode(&[0x03, 0x60, 0x00]).unwrap();
        assert_eq!(invalid.modes().map(|m| m.rel), Some(RelMode::Invalid));

        assert_eq!(SimInstr::decode(&[0x03, 0x20]), Err(DecodeErr::Truncated { needed: 3, available: 2 }));
    }

    #[test]
    fn test_unknown_byte_resilience() {
        assert_eq!(
            decoded(&[0xC4, 0xFF, 0xC4]),
            [SimInstr::F1(Opcode::FIX), SimInstr::Data(0xFF), SimInstr::F1(Opcode::FIX)]
        );

        let out = decode_stream(0x100, &[0xC4, 0xFF, 0xC4]);
        let addrs: Vec<_> = out.instrs.iter().map(|i| i.addr).collect();
        assert_eq!(addrs, [0x100, 0x101, 0x102]);
        assert!(out.leftover.is_empty());
    }

    #[test]
    fn test_stream_leftover() {
        // LDA #0, then the first two bytes of +JSUB
        let out = decode_stream(0, &[0x01, 0x00, 0x00, 0x4B, 0x10]);
        assert_eq!(out.instrs.len(), 1);
        assert_eq!(out.leftover, [0x4B, 0x10]);

        // resuming with the remaining bytes decodes the full instruction
        let mut resumed = out.leftover.clone();
        resumed.extend([0x10, 0x36]);
        let out = decode_stream(3, &resumed);
        assert_eq!(out.instrs.len(), 1);
        assert_eq!(out.instrs[0].addr, 3);
        assert_eq!(out.instrs[0].instr.opcode(), Some(Opcode::JSUB));
        assert!(out.leftover.is_empty());
    }

    fn random_instr(rng: &mut StdRng) -> SimInstr {
        let op = Opcode::ALL[rng.gen_range(0..Opcode::ALL.len())];
        let rel = [RelMode::Direct, RelMode::Pc, RelMode::Base, RelMode::Invalid][rng.gen_range(0..4)];
        let abs = [AbsMode::Immediate, AbsMode::Indirect, AbsMode::Direct][rng.gen_range(0..3)];
        let modes = AddrModes { rel, abs, indexed: rng.gen() };

        match op.class() {
            OpClass::F1 => SimInstr::F1(op),
            OpClass::F2 => SimInstr::F2 { op, r1: rng.gen_range(0..16), r2: rng.gen_range(0..16) },
            OpClass::F34 => match rng.gen_range(0..3) {
                0 => SimInstr::Sic { op, indexed: rng.gen(), addr: rng.gen_range(0..0x8000) },
                1 => SimInstr::F3 { op, modes, disp: rng.gen_range(0..0x1000) },
                _ => SimInstr::F4 { op, modes, addr: rng.gen_range(0..0x10_0000) },
            },
        }
    }

    #[test]
    fn test_codec_round_trip() {
        let mut rng = StdRng::seed_from_u64(0xC0DEC);
        for _ in 0..2000 {
            let instr = random_instr(&mut rng);
            let bytes = instr.encode();
            assert_eq!(bytes.len(), instr.len(), "{instr:?} encoded to the wrong length");
            assert_eq!(SimInstr::decode(&bytes), Ok(instr), "{instr:?} did not round trip via {bytes:02X?}");
        }
    }

    #[test]
    fn test_bytes_round_trip() {
        let mut rng = StdRng::seed_from_u64(0xB17E5);
        for b0 in 0..=u8::MAX {
            for _ in 0..16 {
                let mut bytes = [b0, 0, 0, 0];
                rng.fill(&mut bytes[1..]);

                match SimInstr::decode(&bytes) {
                    Ok(instr) => assert_eq!(instr.encode(), bytes[..instr.len()], "{bytes:02X?} did not round trip via {instr:?}"),
                    Err(e) => assert_eq!(e, DecodeErr::InvalidOpcode(b0)),
                }

                // every byte of a stream survives decoding
                let out = decode_stream(0, &bytes);
                let mut reencoded: Vec<u8> = out.instrs.iter().flat_map(|i| i.bytes()).collect();
                reencoded.extend(&out.leftover);
                assert_eq!(reencoded, bytes, "stream {bytes:02X?} changed when decoded");
            }
        }
    }

    #[test]
    fn test_display() {
        let instr = |b: &[u8]| SimInstr::decode(b).unwrap().to_string();
        assert_eq!(instr(&[0x01, 0x00, 0x03]), "LDA #3");
        assert_eq!(instr(&[0x4F, 0x00, 0x00]), "RSUB");
        assert_eq!(instr(&[0xB4, 0x10]), "CLEAR X");
        assert_eq!(instr(&[0xA4, 0x03]), "SHIFTL A, 4");
        assert_eq!(instr(&[0x90, 0x47]), "ADDR S, 7");
        assert_eq!(instr(&[0x03, 0xC0, 0x10]), "LDA 16,X (base)");
        assert_eq!(SimInstr::Data(0xAB).to_string(), "BYTE X'AB'");
    }
}
