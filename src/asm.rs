//! Assembling syntax nodes into program images.
//!
//! This module is used to convert parsed source lines (`[`[`SyntaxNode`]`]`) into
//! a program image that can be loaded into the simulator.
//!
//! The assembler module notably consists of:
//! - [`assemble`]: The main function which runs both assembler passes over the syntax nodes.
//! - [`SymbolTable`]: a struct holding the symbol table, which stores the address of every label
//!   and every source line after the first assembler pass
//! - [`ProgramImage`]: a struct holding the address-ordered instructions and data of a program,
//!   which can be loaded into the simulator and executed
//!
//! Program images can also be read from and written to object files (see [`encoding`]),
//! and assembled programs can be rendered as listings (see [`listing`]).

pub mod encoding;
pub mod listing;

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;

use crate::addressing::{encode_operand, resolve_target, EncodeCtx};
use crate::ast::asm::{Directive, Mnemonic, SyntaxNode};
use crate::ast::sim::{decode_stream, AbsMode, AddrModes, DecodedStream, Instruction, RelMode, SimInstr};
use crate::ast::{OpClass, Opcode, Reg};
use crate::parse::lex::{lex_single, LexErr, Token};
use crate::sim::mem::{Mem, MAX_ADDR, MEM_SIZE};
use crate::sim::SimErr;
use crate::word::Word24;

/// Assembles syntax nodes into a program image.
///
/// This runs both assembler passes:
/// the first computes the address of every line and label ([`SymbolTable::new`]),
/// and the second encodes every instruction and data directive.
///
/// # Example
/// ```
/// use sicxe_ensemble::parse::parse_ast;
/// use sicxe_ensemble::asm::assemble;
///
/// let src = "
/// PROG    START   0x1000
/// FIRST   LDA     #3
/// HALT    J       HALT
///         END     FIRST
/// ";
/// let nodes = parse_ast(src).unwrap();
///
/// let (image, sym) = assemble(&nodes).unwrap();
/// assert_eq!(image.name(), "PROG");
/// assert_eq!(image.entry(), 0x1000);
/// assert_eq!(sym.lookup_label("halt").map(|s| s.addr), Some(0x1003));
/// assert_eq!(image.instr_at(0x1003).unwrap().bytes(), [0x3F, 0x2F, 0xFD]);
/// ```
pub fn assemble(nodes: &[SyntaxNode]) -> Result<(ProgramImage, SymbolTable), AsmErr> {
    let sym = SymbolTable::new(nodes)?;
    let image = ProgramImage::new(nodes, &sym)?;
    Ok((image, sym))
}

/// Kinds of errors that can occur from assembling given assembly code.
///
/// See [`AsmErr`] for this error type with line information included.
#[derive(Debug, PartialEq, Eq, Hash, Clone, thiserror::Error)]
pub enum AsmErrKind {
    /// A line had a label but no mnemonic (pass 1).
    #[error("label has no mnemonic")]
    LabelWithoutMnemonic,
    /// A mnemonic is not an instruction or directive (pass 1).
    #[error("unknown mnemonic {0:?}")]
    UnknownMnemonic(String),
    /// There were multiple labels of the same name (pass 1).
    #[error("label {0} was defined multiple times")]
    DuplicateLabel(String),
    /// An `EQU` directive had no label to define (pass 1).
    #[error("EQU has no label")]
    EquWithoutLabel,
    /// `START` appeared after other statements (pass 1).
    #[error("START must be the first statement")]
    MisplacedStart,
    /// The program extends past the end of memory (pass 1).
    #[error("program extends past the end of memory")]
    AddressOverflow,
    /// A `+` prefix was used on an instruction without a format 4 form (pass 1).
    #[error("{0} has no format 4 form")]
    NotExtendable(Opcode),
    /// A symbol was used that was never defined.
    #[error("symbol {0} is not defined")]
    UnresolvedSymbol(String),
    /// An operand could not be interpreted.
    #[error("invalid operand {0:?}")]
    InvalidOperand(String),
    /// A register operand does not name a register (pass 2).
    #[error("invalid register {0:?}")]
    InvalidRegister(String),
    /// An instruction or directive is missing an operand.
    #[error("missing operand")]
    MissingOperand,
    /// An instruction or directive has more operands than it accepts.
    #[error("too many operands")]
    TooManyOperands,
    /// An operand's value does not fit in any addressing mode or field.
    #[error("operand value {0} is out of range")]
    OperandOutOfRange(i64),
    /// Code was assembled over previously assembled code (pass 2).
    #[error("code overlaps previously assembled code at {0:05X}")]
    OverlappingCode(u32),
    /// An operand literal could not be read.
    #[error(transparent)]
    Lex(#[from] LexErr),
}

/// Error from assembling given assembly code.
#[derive(Debug, PartialEq, Eq, Hash, Clone, thiserror::Error)]
#[error("{kind}")]
pub struct AsmErr {
    /// The kind of error.
    pub kind: AsmErrKind,
    /// The (1-indexed) source line associated with this error.
    pub line: usize,
}
impl AsmErr {
    /// Creates a new [`AsmErr`].
    pub fn new(kind: AsmErrKind, line: usize) -> Self {
        AsmErr { kind, line }
    }
}
impl crate::err::Error for AsmErr {
    fn pos(&self) -> Option<crate::err::ErrPos> {
        Some(crate::err::ErrPos::Line(self.line))
    }

    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match &self.kind {
            AsmErrKind::LabelWithoutMnemonic => Some("labels must be followed by an instruction or directive on the same line".into()),
            AsmErrKind::UnknownMnemonic(_)   => Some("check the spelling of this instruction or directive".into()),
            AsmErrKind::DuplicateLabel(_)    => Some("labels must be unique within a file, try renaming one of the labels".into()),
            AsmErrKind::EquWithoutLabel      => Some("EQU defines the label on its line, like `MAXLEN EQU 4096`".into()),
            AsmErrKind::MisplacedStart       => Some("move the START directive to the top of the file".into()),
            AsmErrKind::AddressOverflow      => Some(format!("memory ends at address {MAX_ADDR:05X}").into()),
            AsmErrKind::NotExtendable(_)     => Some("only format 3 instructions have a `+` (format 4) form".into()),
            AsmErrKind::UnresolvedSymbol(_)  => Some("try adding this label before an instruction or directive".into()),
            AsmErrKind::InvalidOperand(_)    => Some("an operand is a symbol, a numeric literal, or '*', optionally with '#', '@', or ',X'".into()),
            AsmErrKind::InvalidRegister(_)   => Some("registers are A, X, L, B, S, T, F, PC, and SW".into()),
            AsmErrKind::MissingOperand       => None,
            AsmErrKind::TooManyOperands      => None,
            AsmErrKind::OperandOutOfRange(_) => Some("try a format 4 instruction, or enable base-relative addressing with BASE".into()),
            AsmErrKind::OverlappingCode(_)   => Some("check that ORG does not move back over assembled code".into()),
            AsmErrKind::Lex(e)               => crate::err::Error::help(e),
        }
    }
}

/// A label in the symbol table.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Symbol {
    /// The label's value (typically its address).
    pub addr: u32,
    /// Whether the label names data (`BYTE`, `WORD`, `RESB`, `RESW`, `EQU`) rather than code.
    pub is_data: bool,
    /// The size of one unit of the label's data (1 for bytes, 3 for words, 0 for code).
    pub len: u32,
    /// Whether the value is an address that moves if the program is relocated
    /// (as opposed to an absolute constant from `EQU`).
    pub relocatable: bool,
}

/// The symbol table created in the first assembler pass,
/// which holds the address of every label and every source line.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct SymbolTable {
    /// A mapping from (uppercased) label to its symbol.
    label_map: HashMap<String, Symbol>,

    /// A mapping from source line to its address and byte length.
    line_map: BTreeMap<usize, (u32, u32)>,
}

impl SymbolTable {
    /// Creates a new symbol table.
    ///
    /// This performs the first assembler pass, calculating the memory address of
    /// labels and lines at each provided syntax node.
    /// Lines after `END` are not assembled.
    ///
    /// ## Example
    /// ```
    /// use sicxe_ensemble::parse::parse_ast;
    /// use sicxe_ensemble::asm::SymbolTable;
    ///
    /// let src = "
    /// COPY    START   100
    /// FIRST   LDA     BUF
    ///        +JSUB    FIRST
    /// BUF     RESW    2
    /// EOF     BYTE    C'EOF'
    /// ";
    /// let nodes = parse_ast(src).unwrap();
    ///
    /// let sym = SymbolTable::new(&nodes).unwrap();
    /// assert_eq!(sym.lookup_label("FIRST").map(|s| s.addr), Some(100));
    /// assert_eq!(sym.lookup_label("BUF").map(|s| s.addr), Some(107));
    /// assert_eq!(sym.lookup_label("EOF").map(|s| s.addr), Some(113));
    /// assert_eq!(sym.lookup_line(6), Some((113, 3)));
    /// ```
    pub fn new(nodes: &[SyntaxNode]) -> Result<Self, AsmErr> {
        struct Cursor {
            // The current location counter.
            lc: u32,
            // Whether any statement has been seen (START must come first).
            started: bool,
        }
        impl Cursor {
            /// Shifts the LC forward by n bytes,
            /// failing if that would pass the end of memory.
            fn shift(&mut self, n: u32) -> Result<(), AsmErrKind> {
                match self.lc.checked_add(n) {
                    Some(lc) if lc as usize <= MEM_SIZE => {
                        self.lc = lc;
                        Ok(())
                    },
                    _ => Err(AsmErrKind::AddressOverflow),
                }
            }
        }

        fn add_label(label_map: &mut HashMap<String, Symbol>, label: &str, sym: Symbol) -> Result<(), AsmErrKind> {
            match label_map.entry(label.to_uppercase()) {
                Entry::Occupied(e) => Err(AsmErrKind::DuplicateLabel(e.key().clone())),
                Entry::Vacant(e) => {
                    e.insert(sym);
                    Ok(())
                },
            }
        }

        /// Visits one node, returning whether it ended the program.
        fn visit(table: &mut SymbolTable, node: &SyntaxNode, cur: &mut Cursor) -> Result<bool, AsmErrKind> {
            let mnemonic = node_mnemonic(node)?;
            let lc = cur.lc;
            let code = Symbol { addr: lc, is_data: false, len: 0, relocatable: true };
            let data = |len| Symbol { addr: lc, is_data: true, len, relocatable: true };

            if mnemonic == Mnemonic::Directive(Directive::Start) {
                if cur.started {
                    return Err(AsmErrKind::MisplacedStart);
                }
                // The START label names the program, so it isn't a symbol.
                cur.lc = optional_operand(node)?
                    .map(|op| address_value(op, table, lc))
                    .transpose()?
                    .unwrap_or(0);
                cur.started = true;
                table.line_map.insert(node.line, (cur.lc, 0));
                return Ok(false);
            }
            cur.started = true;

            let (size, label) = match mnemonic {
                Mnemonic::Instr { op, extended } => (instr_len(op, extended), Some(code)),
                Mnemonic::Directive(Directive::Start) => unreachable!("START was handled above"),
                Mnemonic::Directive(Directive::End) => {
                    optional_operand(node)?;
                    (0, Some(code))
                },
                Mnemonic::Directive(Directive::Org) => {
                    let addr = address_value(single_operand(node)?, table, lc)?;
                    if let Some(label) = &node.label {
                        add_label(&mut table.label_map, label, code)?;
                    }
                    table.line_map.insert(node.line, (lc, 0));
                    cur.lc = addr;
                    return Ok(false);
                },
                Mnemonic::Directive(Directive::Equ) => {
                    let label = node.label.as_deref().ok_or(AsmErrKind::EquWithoutLabel)?;
                    let value = resolve_target(single_operand(node)?, table, lc)?;
                    let addr = u32::try_from(value.value)
                        .ok()
                        .filter(|&v| v <= 0xFF_FFFF)
                        .ok_or(AsmErrKind::OperandOutOfRange(value.value))?;

                    let sym = Symbol { addr, is_data: true, len: 3, relocatable: value.relocatable };
                    add_label(&mut table.label_map, label, sym)?;
                    table.line_map.insert(node.line, (lc, 0));
                    return Ok(false);
                },
                Mnemonic::Directive(Directive::Base | Directive::NoBase) => (0, Some(code)),
                Mnemonic::Directive(Directive::Byte) => {
                    let bytes = byte_operand(single_operand(node)?)?;
                    (bytes.len() as u32, Some(data(1)))
                },
                Mnemonic::Directive(Directive::Word) => {
                    single_operand(node)?;
                    (3, Some(data(3)))
                },
                Mnemonic::Directive(Directive::Resb) => {
                    let n = count_value(single_operand(node)?, table, lc)?;
                    (n, Some(data(1)))
                },
                Mnemonic::Directive(Directive::Resw) => {
                    let n = count_value(single_operand(node)?, table, lc)?;
                    let size = n.checked_mul(3).ok_or(AsmErrKind::AddressOverflow)?;
                    (size, Some(data(3)))
                },
            };

            if let (Some(label), Some(sym)) = (&node.label, label) {
                add_label(&mut table.label_map, label, sym)?;
            }
            table.line_map.insert(node.line, (lc, size));
            cur.shift(size)?;

            Ok(mnemonic == Mnemonic::Directive(Directive::End))
        }

        let mut table = SymbolTable::default();
        let mut cursor = Cursor { lc: 0, started: false };

        for node in nodes {
            if node.is_blank() {
                continue;
            }
            let ended = visit(&mut table, node, &mut cursor)
                .map_err(|kind| AsmErr::new(kind, node.line))?;
            if ended {
                break;
            }
        }

        tracing::debug!(labels = table.label_map.len(), lines = table.line_map.len(), "assembler pass 1 complete");
        Ok(table)
    }

    /// Gets the symbol of a given label (if it exists).
    ///
    /// Labels are case-insensitive.
    pub fn lookup_label(&self, label: &str) -> Option<&Symbol> {
        self.label_map.get(&label.to_uppercase())
    }

    /// Gets the label at a given address (if there is one).
    ///
    /// Code labels are preferred over data labels,
    /// and ties are broken alphabetically.
    pub fn rev_lookup_label(&self, addr: u32) -> Option<&str> {
        self.label_map.iter()
            .filter(|(_, s)| s.addr == addr && s.relocatable)
            .min_by_key(|&(name, s)| (s.is_data, name))
            .map(|(name, _)| name.as_str())
    }

    /// Gets the address and byte length of a given source line
    /// (if that line was assembled).
    pub fn lookup_line(&self, line: usize) -> Option<(u32, u32)> {
        self.line_map.get(&line).copied()
    }

    /// Gets the source line that assembled into the byte at a given address.
    pub fn rev_lookup_line(&self, addr: u32) -> Option<usize> {
        self.line_map.iter()
            .find(|(_, &(start, len))| (start..start + len).contains(&addr))
            .map(|(&line, _)| line)
    }

    /// Gets an iterable of the labels and their symbols, ordered by address.
    pub fn label_iter(&self) -> impl Iterator<Item=(&str, &Symbol)> + '_ {
        let mut labels: Vec<_> = self.label_map.iter()
            .map(|(name, sym)| (name.as_str(), sym))
            .collect();
        labels.sort_by_key(|&(name, sym)| (sym.addr, name));
        labels.into_iter()
    }

    /// Gets an iterable of the assembled lines with their addresses and byte lengths.
    pub fn line_iter(&self) -> impl Iterator<Item=(usize, u32, u32)> + '_ {
        self.line_map.iter()
            .map(|(&line, &(addr, len))| (line, addr, len))
    }
}

fn node_mnemonic(node: &SyntaxNode) -> Result<Mnemonic, AsmErrKind> {
    let Some(name) = node.mnemonic.as_deref() else {
        return Err(AsmErrKind::LabelWithoutMnemonic);
    };
    match name.parse() {
        Ok(Mnemonic::Instr { op, extended: true }) if op.class() != OpClass::F34 => Err(AsmErrKind::NotExtendable(op)),
        Ok(m) => Ok(m),
        Err(()) => Err(AsmErrKind::UnknownMnemonic(name.to_string())),
    }
}
fn instr_len(op: Opcode, extended: bool) -> u32 {
    match (op.class(), extended) {
        (OpClass::F1, _) => 1,
        (OpClass::F2, _) => 2,
        (OpClass::F34, false) => 3,
        (OpClass::F34, true) => 4,
    }
}
fn optional_operand(node: &SyntaxNode) -> Result<Option<&str>, AsmErrKind> {
    match &node.operands[..] {
        [] => Ok(None),
        [op] => Ok(Some(op)),
        _ => Err(AsmErrKind::TooManyOperands),
    }
}
fn single_operand(node: &SyntaxNode) -> Result<&str, AsmErrKind> {
    optional_operand(node)?.ok_or(AsmErrKind::MissingOperand)
}
fn address_value(target: &str, sym: &SymbolTable, lc: u32) -> Result<u32, AsmErrKind> {
    let value = resolve_target(target, sym, lc)?.value;
    u32::try_from(value)
        .ok()
        .filter(|&a| a <= MAX_ADDR)
        .ok_or(AsmErrKind::OperandOutOfRange(value))
}
fn count_value(target: &str, sym: &SymbolTable, lc: u32) -> Result<u32, AsmErrKind> {
    let value = resolve_target(target, sym, lc)?.value;
    u32::try_from(value)
        .ok()
        .filter(|&n| n as usize <= MEM_SIZE)
        .ok_or(AsmErrKind::OperandOutOfRange(value))
}
fn byte_operand(operand: &str) -> Result<Vec<u8>, AsmErrKind> {
    match lex_single(operand)? {
        Token::Chars(bytes) | Token::Bytes(bytes) => Ok(bytes),
        Token::Num(n) if (-0x80..=0xFF).contains(&n) => Ok(vec![n as u8]),
        Token::Num(n) => Err(AsmErrKind::OperandOutOfRange(n)),
        _ => Err(AsmErrKind::InvalidOperand(operand.to_string())),
    }
}

fn f2_register(operand: &str) -> Result<u8, AsmErrKind> {
    Reg::from_name(operand)
        .map(Reg::id)
        .ok_or_else(|| AsmErrKind::InvalidRegister(operand.to_string()))
}
fn f2_number(operand: &str, range: RangeInclusive<i64>) -> Result<u8, AsmErrKind> {
    match lex_single(operand)? {
        Token::Num(n) if range.contains(&n) => Ok(n as u8),
        Token::Num(n) => Err(AsmErrKind::OperandOutOfRange(n)),
        _ => Err(AsmErrKind::InvalidOperand(operand.to_string())),
    }
}
/// Computes the two operand nibbles of a format 2 instruction.
///
/// Register pairs can be written as one operand (`"A,S"`) or two.
fn encode_f2(op: Opcode, operands: &[String]) -> Result<(u8, u8), AsmErrKind> {
    let parts: Vec<&str> = operands.iter()
        .flat_map(|o| o.split(','))
        .map(str::trim)
        .collect();

    match (op, &parts[..]) {
        (Opcode::CLEAR | Opcode::TIXR, [r]) => Ok((f2_register(r)?, 0)),
        (Opcode::SVC, [n]) => Ok((f2_number(n, 0..=15)?, 0)),
        (Opcode::SHIFTL | Opcode::SHIFTR, [r, n]) => Ok((f2_register(r)?, f2_number(n, 1..=16)? - 1)),
        (Opcode::CLEAR | Opcode::TIXR | Opcode::SVC, [_, ..]) => Err(AsmErrKind::TooManyOperands),
        (_, [] | [_]) => Err(AsmErrKind::MissingOperand),
        (Opcode::SHIFTL | Opcode::SHIFTR, _) => Err(AsmErrKind::TooManyOperands),
        (_, [r1, r2]) => Ok((f2_register(r1)?, f2_register(r2)?)),
        _ => Err(AsmErrKind::TooManyOperands),
    }
}

/// Encodes an instruction, also returning whether its address field needs relocation.
fn encode_instr(op: Opcode, extended: bool, operands: &[String], ctx: &EncodeCtx) -> Result<(SimInstr, bool), AsmErrKind> {
    match op.class() {
        OpClass::F1 => match operands {
            [] => Ok((SimInstr::F1(op), false)),
            _  => Err(AsmErrKind::TooManyOperands),
        },
        OpClass::F2 => {
            let (r1, r2) = encode_f2(op, operands)?;
            Ok((SimInstr::F2 { op, r1, r2 }, false))
        },
        OpClass::F34 if op == Opcode::RSUB => {
            if !operands.is_empty() {
                return Err(AsmErrKind::TooManyOperands);
            }
            let modes = AddrModes { rel: RelMode::Direct, abs: AbsMode::Direct, indexed: false };
            let instr = match extended {
                true  => SimInstr::F4 { op, modes, addr: 0 },
                false => SimInstr::F3 { op, modes, disp: 0 },
            };
            Ok((instr, false))
        },
        OpClass::F34 => {
            // The tokenizer splits `BUF,X` into two operands.
            let operand = match operands {
                [] => return Err(AsmErrKind::MissingOperand),
                [o] => o.clone(),
                [o, x] => format!("{o},{x}"),
                _ => return Err(AsmErrKind::TooManyOperands),
            };

            let enc = encode_operand(&operand, extended, ctx)?;
            let instr = match extended {
                true  => SimInstr::F4 { op, modes: enc.modes, addr: enc.field },
                false => SimInstr::F3 { op, modes: enc.modes, disp: enc.field as u16 },
            };
            Ok((instr, enc.relocatable))
        },
    }
}

/// A modification (relocation) record: a field whose value is an address
/// that has to be adjusted if the program is loaded elsewhere.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Modification {
    /// The address of the first byte holding the field.
    pub addr: u32,
    /// The length of the field in half-bytes (starting from the low half of the first byte for odd lengths).
    pub half_bytes: u8,
}

/// A program image.
///
/// This is the final product after assembly source code is fully assembled
/// (or after an object file is read, see [`encoding`]).
/// This can be loaded in the simulator to run the program.
///
/// The image maps addresses to [`Instruction`]s.
/// Data (and any byte that does not decode as an instruction) is held as
/// one-byte [`SimInstr::Data`] entries, so every loaded byte is covered by exactly one entry.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct ProgramImage {
    /// The program's name (from the `START` label or the header record).
    name: String,
    /// The program's start address.
    start: u32,
    /// The program's length in bytes (including reserved space).
    length: u32,
    /// The address execution begins at.
    entry: u32,
    /// Every instruction and data byte, by address.
    ///
    /// Invariant: entries never overlap.
    instrs: BTreeMap<u32, Instruction>,
    /// The address of the last loaded byte.
    last_byte: Option<u32>,
    /// Modification records.
    mods: Vec<Modification>,
}
impl ProgramImage {
    /// Creates an empty program image.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a new program image from syntax nodes and a symbol table
    /// (the second assembler pass).
    fn new(nodes: &[SyntaxNode], sym: &SymbolTable) -> Result<Self, AsmErr> {
        /// Writes one node into the image, tracking BASE and the entry point.
        fn write_node(
            image: &mut ProgramImage,
            node: &SyntaxNode,
            (lc, len): (u32, u32),
            sym: &SymbolTable,
            base_enabled: &mut bool,
        ) -> Result<(), AsmErrKind> {
            match node_mnemonic(node)? {
                Mnemonic::Instr { op, extended } => {
                    let ctx = EncodeCtx { symbols: sym, base_enabled: *base_enabled, lc, pc: lc + len };
                    let (instr, relocatable) = encode_instr(op, extended, &node.operands, &ctx)?;
                    image.insert(Instruction { addr: lc, instr }).map_err(AsmErrKind::OverlappingCode)?;
                    if relocatable {
                        image.mods.push(Modification { addr: lc + 1, half_bytes: 5 });
                    }
                },
                Mnemonic::Directive(Directive::Start) => {
                    image.name = node.label.clone().unwrap_or_default();
                    image.start = lc;
                    image.entry = lc;
                },
                Mnemonic::Directive(Directive::End) => {
                    if let Some(target) = optional_operand(node)? {
                        image.entry = address_value(target, sym, lc)?;
                    }
                },
                Mnemonic::Directive(Directive::Base) => {
                    if let Some(target) = optional_operand(node)? {
                        resolve_target(target, sym, lc)?;
                    }
                    *base_enabled = true;
                },
                Mnemonic::Directive(Directive::NoBase) => *base_enabled = false,
                Mnemonic::Directive(Directive::Byte) => {
                    image.insert_data(lc, &byte_operand(single_operand(node)?)?)
                        .map_err(AsmErrKind::OverlappingCode)?;
                },
                Mnemonic::Directive(Directive::Word) => {
                    let value = resolve_target(single_operand(node)?, sym, lc)?.value;
                    image.insert_data(lc, &Word24::from_i32(value as i32).bytes())
                        .map_err(AsmErrKind::OverlappingCode)?;
                },
                Mnemonic::Directive(Directive::Org | Directive::Equ | Directive::Resb | Directive::Resw) => {},
            }
            Ok(())
        }

        let mut image = ProgramImage::empty();
        let mut base_enabled = false;

        for node in nodes {
            // Lines past END have no address.
            let Some(line_info) = sym.lookup_line(node.line) else { continue };
            write_node(&mut image, node, line_info, sym, &mut base_enabled)
                .map_err(|kind| AsmErr::new(kind, node.line))?;
        }

        let end = sym.line_iter()
            .map(|(_, addr, len)| addr + len)
            .max()
            .unwrap_or(image.start);
        image.length = end.saturating_sub(image.start);
        image.last_byte = image.instrs.values().next_back().map(|i| i.end() - 1);

        tracing::debug!(
            name = %image.name,
            entry = image.entry,
            entries = image.instrs.len(),
            mods = image.mods.len(),
            "assembler pass 2 complete"
        );
        Ok(image)
    }

    /// Inserts an instruction.
    ///
    /// If it overlaps an existing entry, this fails with the first overlapped address.
    fn insert(&mut self, instr: Instruction) -> Result<(), u32> {
        if let Some((_, prev)) = self.instrs.range(..instr.end()).next_back() {
            if prev.end() > instr.addr {
                return Err(instr.addr.max(prev.addr));
            }
        }
        self.instrs.insert(instr.addr, instr);
        Ok(())
    }
    /// Inserts data bytes, failing if they overlap an existing entry.
    fn insert_data(&mut self, addr: u32, bytes: &[u8]) -> Result<(), u32> {
        (addr..).zip(bytes)
            .try_for_each(|(addr, &b)| self.insert(Instruction { addr, instr: SimInstr::Data(b) }))
    }

    /// The program's name.
    pub fn name(&self) -> &str {
        &self.name
    }
    /// The program's start address.
    pub fn start(&self) -> u32 {
        self.start
    }
    /// The program's length in bytes.
    pub fn length(&self) -> u32 {
        self.length
    }
    /// The address execution begins at.
    pub fn entry(&self) -> u32 {
        self.entry
    }
    /// The address of the last loaded byte (if any byte was loaded).
    pub fn last_byte(&self) -> Option<u32> {
        self.last_byte
    }
    /// The modification records of this program.
    pub fn modifications(&self) -> &[Modification] {
        &self.mods
    }
    /// The number of entries (instructions and data bytes) in this image.
    pub fn len(&self) -> usize {
        self.instrs.len()
    }
    /// Whether this image has no entries.
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Gets the instruction that starts at the given address.
    pub fn instr_at(&self, addr: u32) -> Option<&Instruction> {
        self.instrs.get(&addr)
    }
    /// Gets the instruction whose bytes cover the given address.
    pub fn instr_covering(&self, addr: u32) -> Option<&Instruction> {
        self.instrs.range(..=addr)
            .next_back()
            .map(|(_, i)| i)
            .filter(|i| i.covers(addr))
    }
    /// Gets an iterator over all entries, in address order.
    pub fn iter(&self) -> impl Iterator<Item=&Instruction> + '_ {
        self.instrs.values()
    }
    /// Gets an iterator over the entries that start within the given address range.
    pub fn range(&self, addrs: std::ops::Range<u32>) -> impl Iterator<Item=&Instruction> + '_ {
        self.instrs.range(addrs).map(|(_, i)| i)
    }
    /// Gets an iterator over every loaded byte and its address.
    pub fn byte_iter(&self) -> impl Iterator<Item=(u32, u8)> + '_ {
        self.iter().flat_map(|i| (i.addr..).zip(i.bytes()))
    }
    /// Gets the contiguous runs of loaded bytes, in address order.
    pub fn blocks(&self) -> Vec<(u32, Vec<u8>)> {
        let mut blocks: Vec<(u32, Vec<u8>)> = vec![];
        for instr in self.iter() {
            match blocks.last_mut() {
                Some((start, bytes)) if *start + bytes.len() as u32 == instr.addr => bytes.extend(instr.bytes()),
                _ => blocks.push((instr.addr, instr.bytes())),
            }
        }
        blocks
    }

    /// Re-disassembles memory starting at `pc`.
    ///
    /// This is used when execution reaches an address no entry starts at:
    /// - every entry at or above `pc` is dropped,
    /// - an entry covering `pc` is split into data bytes up to `pc`,
    /// - memory from `pc` through the last loaded byte is decoded
    ///   (or only the instruction at `pc`, if `pc` is past the last loaded byte).
    pub fn resync(&mut self, pc: u32, mem: &Mem) -> Result<(), SimErr> {
        let first = mem.byte(pc)?;

        drop(self.instrs.split_off(&pc));
        if let Some((&addr, &prev)) = self.instrs.range(..pc).next_back() {
            if prev.covers(pc) {
                self.instrs.remove(&addr);
                for (addr, b) in (addr..pc).zip(prev.bytes()) {
                    self.instrs.insert(addr, Instruction { addr, instr: SimInstr::Data(b) });
                }
            }
        }

        let DecodedStream { instrs, leftover } = match self.last_byte {
            Some(last) if last >= pc => decode_stream(pc, mem.slice(pc, (last - pc) as usize + 1)?),
            _ => {
                let bytes = mem.slice(pc, (MEM_SIZE - pc as usize).min(4))?;
                let instr = SimInstr::decode(bytes).unwrap_or(SimInstr::Data(first));
                DecodedStream { instrs: vec![Instruction { addr: pc, instr }], leftover: vec![] }
            },
        };

        let leftover_start = instrs.last().map_or(pc, Instruction::end);
        self.instrs.extend(instrs.into_iter().map(|i| (i.addr, i)));
        for (addr, b) in (leftover_start..).zip(leftover) {
            self.instrs.insert(addr, Instruction { addr, instr: SimInstr::Data(b) });
        }
        Ok(())
    }
}
