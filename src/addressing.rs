//! Addressing-mode resolution.
//!
//! Both directions of SIC/XE addressing live here, so that the assembler,
//! the disassembler, and the simulator agree on what each mode means.
//!
//! # Decoding
//!
//! When an instruction is executed (or displayed), its address field is turned into
//! an effective address and an operand:
//! 1. The `n i` and `x b p e` bits select the modes ([`decode_modes`]).
//! 2. The address field is offset by the relative mode (PC or B) and by X if indexed ([`effective_addr`]).
//! 3. Unless the opcode is a jump, the operand is read according to the absolute mode ([`resolve`]).
//!
//! PC here is the address *after* the instruction.
//!
//! # Encoding
//!
//! When the assembler encodes an operand like `#LENGTH`, `@RETADR` or `BUFFER,X`,
//! [`encode_operand`] picks the modes and computes the address field.
//! For format 3, the relative mode is picked in this order:
//! 1. Base-relative, if `BASE` is active (the raw address is encoded).
//! 2. Direct, if the operand is immediate and fits in 12 signed bits.
//! 3. PC-relative, if the displacement from PC fits in 12 signed bits.
//! 4. Base-relative otherwise.
//!
//! ```
//! use sicxe_ensemble::addressing::choose_rel_mode;
//! use sicxe_ensemble::ast::sim::{AbsMode, RelMode};
//!
//! assert_eq!(choose_rel_mode(AbsMode::Direct, 0x1030, false, 0x1003), (RelMode::Pc, 0x02D));
//! assert_eq!(choose_rel_mode(AbsMode::Immediate, 3, false, 0x1003), (RelMode::Direct, 0x003));
//! assert_eq!(choose_rel_mode(AbsMode::Direct, 0x1030, true, 0x1003), (RelMode::Base, 0x030));
//! ```

use crate::asm::{AsmErrKind, SymbolTable};
use crate::ast::sim::{AbsMode, AddrModes, DecodeErr, RelMode, SimInstr};
use crate::ast::Reg;
use crate::parse::lex::{lex_single, Token};
use crate::sim::mem::{Mem, RegFile, MAX_ADDR};
use crate::sim::SimErr;
use crate::word::Word24;

/// Decodes the addressing modes of a format 3/4 instruction from its first two bytes.
pub fn decode_modes(b0: u8, b1: u8) -> AddrModes {
    let n = b0 & 0b10 != 0;
    let i = b0 & 0b01 != 0;
    let x = b1 & 0x80 != 0;
    let b = b1 & 0x40 != 0;
    let p = b1 & 0x20 != 0;

    let rel = match (b, p) {
        (false, false) => RelMode::Direct,
        (false, true)  => RelMode::Pc,
        (true,  false) => RelMode::Base,
        (true,  true)  => RelMode::Invalid,
    };
    let abs = match (n, i) {
        (false, false) => AbsMode::Sic,
        (false, true)  => AbsMode::Immediate,
        (true,  false) => AbsMode::Indirect,
        (true,  true)  => AbsMode::Direct,
    };

    AddrModes { rel, abs, indexed: x }
}

/// Encodes addressing modes into the `n i` bits (low 2 bits of the first byte)
/// and the `x b p e` bits (high nibble of the second byte, returned in the low nibble).
pub fn encode_modes(modes: AddrModes, extended: bool) -> (u8, u8) {
    let ni = match modes.abs {
        AbsMode::Sic       => 0b00,
        AbsMode::Immediate => 0b01,
        AbsMode::Indirect  => 0b10,
        AbsMode::Direct    => 0b11,
    };
    let bp = match modes.rel {
        RelMode::Direct  => 0b00,
        RelMode::Pc      => 0b01,
        RelMode::Base    => 0b10,
        RelMode::Invalid => 0b11,
    };
    let xbpe = (u8::from(modes.indexed) << 3) | (bp << 1) | u8::from(extended);

    (ni, xbpe)
}

/// The register values address resolution depends on.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct ResolveCtx {
    /// The address of the next instruction.
    pub pc: u32,
    /// The value of register B.
    pub b: Word24,
    /// The value of register X.
    pub x: Word24,
}
impl ResolveCtx {
    /// Creates the context from a register file whose PC has already advanced past the instruction.
    pub fn from_regs(regs: &RegFile) -> Self {
        ResolveCtx {
            pc: regs.pc(),
            b: regs.get(Reg::B),
            x: regs.get(Reg::X),
        }
    }
}

/// Computes the effective address of a format SIC/3/4 instruction
/// (the address field offset by its relative mode and by X if indexed).
///
/// Address arithmetic wraps at 24 bits; range checking happens when memory is accessed.
///
/// This returns `None` for instructions without an address field.
///
/// # Errors
/// [`DecodeErr::InvalidAddressing`] if both `b` and `p` are set.
pub fn effective_addr(instr: &SimInstr, ctx: &ResolveCtx) -> Result<Option<u32>, DecodeErr> {
    let (Some(modes), Some(disp)) = (instr.modes(), instr.disp()) else {
        return Ok(None);
    };

    let mut addr = Word24::from_i32(disp);
    match modes.rel {
        RelMode::Direct  => {},
        RelMode::Pc      => addr += Word24::from_u32(ctx.pc),
        RelMode::Base    => addr += ctx.b,
        RelMode::Invalid => return Err(DecodeErr::InvalidAddressing),
    }
    if modes.indexed {
        addr += ctx.x;
    }

    Ok(Some(addr.get()))
}

/// Finds the address the operand is stored at, given the effective address.
///
/// Immediate operands are not stored in memory, so this returns `None` for them.
/// Indirect operands are stored at the address held by the word at `eff`.
pub fn data_addr(eff: u32, abs: AbsMode, mem: &Mem) -> Result<Option<u32>, SimErr> {
    match abs {
        AbsMode::Sic | AbsMode::Direct => Ok(Some(eff)),
        AbsMode::Immediate => Ok(None),
        AbsMode::Indirect => Ok(Some(mem.word(eff)?.get())),
    }
}

/// A resolved effective address and operand.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Resolved {
    /// The effective address (or the branch target of a jump).
    pub addr: u32,
    /// The operand (`None` for jumps, which do not read an operand).
    pub operand: Option<Word24>,
}

/// Resolves the effective address and operand of a format SIC/3/4 instruction.
///
/// This returns `None` for instructions without an address field.
///
/// ```
/// use sicxe_ensemble::addressing::{resolve, ResolveCtx};
/// use sicxe_ensemble::ast::sim::SimInstr;
/// use sicxe_ensemble::sim::mem::Mem;
/// use sicxe_ensemble::word::Word24;
///
/// let mut mem = Mem::new(&mut 0u8);
/// mem.set_word(0x1000, Word24::from_u32(5)).unwrap();
///
/// // ADD 0x1000 (SIC format)
/// let instr = SimInstr::decode(&[0x18, 0x10, 0x00]).unwrap();
/// let res = resolve(&instr, &ResolveCtx::default(), &mem).unwrap().unwrap();
/// assert_eq!(res.addr, 0x1000);
/// assert_eq!(res.operand, Some(Word24::from_u32(5)));
/// ```
pub fn resolve(instr: &SimInstr, ctx: &ResolveCtx, mem: &Mem) -> Result<Option<Resolved>, SimErr> {
    let (Some(eff), Some(op), Some(modes)) = (effective_addr(instr, ctx)?, instr.opcode(), instr.modes()) else {
        return Ok(None);
    };

    if op.is_jump() {
        return Ok(Some(Resolved { addr: eff, operand: None }));
    }

    let operand = match data_addr(eff, modes.abs, mem)? {
        Some(addr) => mem.word(addr)?,
        None => Word24::from_u32(eff),
    };
    Ok(Some(Resolved { addr: eff, operand: Some(operand) }))
}

/// Picks the relative mode for a format 3 operand and computes its 12-bit address field.
///
/// `target` is the resolved operand value, and `pc` is the address of the next instruction.
pub fn choose_rel_mode(abs: AbsMode, target: i64, base_enabled: bool, pc: u32) -> (RelMode, u16) {
    const DISP_RANGE: std::ops::RangeInclusive<i64> = -2048..=2047;
    let field = |n: i64| (n & 0xFFF) as u16;

    if base_enabled {
        return (RelMode::Base, field(target));
    }
    if abs == AbsMode::Immediate && DISP_RANGE.contains(&target) {
        return (RelMode::Direct, field(target));
    }
    let disp = target - i64::from(pc);
    if DISP_RANGE.contains(&disp) {
        return (RelMode::Pc, field(disp));
    }
    (RelMode::Base, field(target))
}

/// The split parts of an operand: its prefix, its indexing suffix, and what remains.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct OperandParts<'a> {
    /// The absolute mode selected by the prefix (`#`, `@`, or none).
    pub abs: AbsMode,
    /// Whether the operand ends with `,X`.
    pub indexed: bool,
    /// The operand with its prefix and suffix removed.
    pub target: &'a str,
}

/// Splits an operand into its prefix, its indexing suffix, and its target.
///
/// ```
/// use sicxe_ensemble::addressing::split_operand;
/// use sicxe_ensemble::ast::sim::AbsMode;
///
/// let parts = split_operand("BUFFER,X");
/// assert_eq!((parts.abs, parts.indexed, parts.target), (AbsMode::Direct, true, "BUFFER"));
///
/// let parts = split_operand("#LENGTH");
/// assert_eq!((parts.abs, parts.indexed, parts.target), (AbsMode::Immediate, false, "LENGTH"));
/// ```
pub fn split_operand(operand: &str) -> OperandParts<'_> {
    let operand = operand.trim();
    let (abs, rest) = if let Some(rest) = operand.strip_prefix('#') {
        (AbsMode::Immediate, rest)
    } else if let Some(rest) = operand.strip_prefix('@') {
        (AbsMode::Indirect, rest)
    } else {
        (AbsMode::Direct, operand)
    };

    let (indexed, target) = match rest.rsplit_once(',') {
        Some((target, x)) if x.trim().eq_ignore_ascii_case("X") => (true, target.trim()),
        _ => (false, rest.trim()),
    };

    OperandParts { abs, indexed, target }
}

/// A value an operand resolved to.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct OperandValue {
    /// The value.
    pub value: i64,
    /// Whether the value is an address that moves if the program is relocated.
    pub relocatable: bool,
}

/// Resolves an operand target (a symbol, a numeric literal, or `*`) to a value.
///
/// Symbols are looked up first, so a symbol can shadow a literal-looking name.
/// `lc` is the location counter `*` refers to.
pub fn resolve_target(target: &str, symbols: &SymbolTable, lc: u32) -> Result<OperandValue, AsmErrKind> {
    if let Some(sym) = symbols.lookup_label(target) {
        return Ok(OperandValue { value: i64::from(sym.addr), relocatable: sym.relocatable });
    }

    match lex_single(target)? {
        Token::Num(n) => Ok(OperandValue { value: n, relocatable: false }),
        Token::Star   => Ok(OperandValue { value: i64::from(lc), relocatable: true }),
        Token::Ident(name) => Err(AsmErrKind::UnresolvedSymbol(name)),
        _ => Err(AsmErrKind::InvalidOperand(target.to_string())),
    }
}

/// Everything a format 3/4 operand encodes into.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct EncodedOperand {
    /// The chosen addressing modes.
    pub modes: AddrModes,
    /// The address field (12 bits for format 3, 20 bits for format 4).
    pub field: u32,
    /// Whether the address field needs relocating when the program moves.
    pub relocatable: bool,
}

/// The assembler state an operand is encoded against.
#[derive(Debug, Clone, Copy)]
pub struct EncodeCtx<'a> {
    /// The symbol table from the first pass.
    pub symbols: &'a SymbolTable,
    /// Whether a `BASE` directive is active.
    pub base_enabled: bool,
    /// The address of the instruction being encoded.
    pub lc: u32,
    /// The address of the next instruction.
    pub pc: u32,
}

/// Encodes a format 3 (or format 4, if `extended`) operand.
///
/// Format 4 always uses direct relative addressing with a 20-bit address field.
///
/// # Errors
/// - [`AsmErrKind::UnresolvedSymbol`] if the target is a symbol that was never defined
/// - [`AsmErrKind::OperandOutOfRange`] if the target cannot be addressed
/// - [`AsmErrKind::InvalidOperand`] if the target is not a symbol, literal, or `*`
pub fn encode_operand(operand: &str, extended: bool, ctx: &EncodeCtx) -> Result<EncodedOperand, AsmErrKind> {
    let parts = split_operand(operand);
    if parts.target.is_empty() {
        return Err(AsmErrKind::MissingOperand);
    }
    let OperandValue { value, relocatable } = resolve_target(parts.target, ctx.symbols, ctx.lc)?;

    let addr_range = match parts.abs {
        AbsMode::Immediate if extended => -0x8_0000..=i64::from(MAX_ADDR),
        AbsMode::Immediate => -0x80_0000..=0xFF_FFFF,
        _ => 0..=i64::from(MAX_ADDR),
    };
    if !addr_range.contains(&value) {
        return Err(AsmErrKind::OperandOutOfRange(value));
    }

    let (rel, field) = match extended {
        true  => (RelMode::Direct, (value & 0xF_FFFF) as u32),
        false => {
            let (rel, field) = choose_rel_mode(parts.abs, value, ctx.base_enabled, ctx.pc);
            (rel, u32::from(field))
        }
    };

    Ok(EncodedOperand {
        modes: AddrModes { rel, abs: parts.abs, indexed: parts.indexed },
        field,
        relocatable: relocatable && extended && rel == RelMode::Direct,
    })
}
