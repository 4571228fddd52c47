//! Formatters which can read and write program images as object files.
//!
//! The [`ObjFileFormat`] trait describes an implementation of reading/writing object files.
//! This module provides an implementation of the trait:
//! - [`RecordFormat`]: the H/T/M/E text record format

use super::{Modification, ProgramImage};
use crate::ast::sim::decode_stream;
use crate::sim::mem::MEM_SIZE;

/// A trait defining object file formats.
pub trait ObjFileFormat {
    /// Representation of the serialized format.
    ///
    /// For binary formats, `[u8]` should be used.
    /// For text-based formats, `str` should be used.
    type Stream: ToOwned + ?Sized;
    /// Serializes into the stream format.
    fn serialize(o: &ProgramImage) -> <Self::Stream as ToOwned>::Owned;
    /// Deserializes from the stream format.
    fn deserialize(i: &Self::Stream) -> Result<ProgramImage, FormatErr>;
}

/// Kinds of errors that can occur from reading an object file.
///
/// See [`FormatErr`] for this error type with line information included.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, thiserror::Error)]
pub enum FormatErrKind {
    /// A line started with a character that is not a record type.
    #[error("unknown record type {0:?}")]
    UnknownRecord(char),
    /// A record was too short or too long for its fields.
    #[error("record has the wrong length")]
    WrongLength,
    /// A numeric field had non-hex characters.
    #[error("invalid hex digits")]
    InvalidHex,
    /// A record appeared before the header record (or there was no header record).
    #[error("missing header record")]
    MissingHeader,
    /// There was more than one header record.
    #[error("duplicate header record")]
    DuplicateHeader,
    /// A text record did not continue an instruction split by the previous text record.
    #[error("text record starts at {found:06X}, but the split instruction before it continues at {expected:06X}")]
    NonContiguous {
        /// The address the text record should have started at.
        expected: u32,
        /// The address the text record started at.
        found: u32,
    },
    /// A record addressed memory past its end.
    #[error("record addresses past the end of memory")]
    AddressOutOfRange,
    /// A text record overwrote bytes loaded by an earlier text record.
    #[error("text record overlaps earlier text at {0:06X}")]
    OverlappingText(u32),
}

/// Error from reading an object file.
#[derive(Debug, PartialEq, Eq, Hash, Clone, thiserror::Error)]
#[error("{kind}")]
pub struct FormatErr {
    /// The kind of error.
    pub kind: FormatErrKind,
    /// The (1-indexed) line of the record the error occurred at.
    pub line: usize,
}
impl crate::err::Error for FormatErr {
    fn pos(&self) -> Option<crate::err::ErrPos> {
        Some(crate::err::ErrPos::Line(self.line))
    }

    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self.kind {
            FormatErrKind::UnknownRecord(_)    => Some("records start with H, T, M, or E".into()),
            FormatErrKind::WrongLength         => Some("fields are fixed-width hex, like `T00100003032003`".into()),
            FormatErrKind::InvalidHex          => None,
            FormatErrKind::MissingHeader       => Some("the first record must be a header record (`H`)".into()),
            FormatErrKind::DuplicateHeader     => None,
            FormatErrKind::NonContiguous { .. } => Some("an instruction split across text records must continue in the next text record".into()),
            FormatErrKind::AddressOutOfRange   => Some(format!("memory holds {MEM_SIZE:#X} bytes").into()),
            FormatErrKind::OverlappingText(_)  => None,
        }
    }
}

/// The H/T/M/E text record format.
///
/// ```text
/// HCOPY  00100000000A           header: name (6 chars), start, length
/// T0010000A0100034B1010003F2FFD text: start, byte count, bytes
/// M00100405                     modification: address, length in half-bytes
/// E001000                       end: first instruction to execute
/// ```
///
/// Every numeric field is fixed-width uppercase hex.
/// Text records hold at most 30 bytes and carry absolute addresses.
///
/// When reading, a text record may end partway through an instruction.
/// The rest of that instruction has to start the next text record
/// (at exactly the address after the split record), or the file is rejected.
pub struct RecordFormat;

const MAX_TEXT_LEN: usize = 30;
const NAME_LEN: usize = 6;

/// Fits a program name to the header's name field,
/// which is exactly 6 bytes (not characters) wide.
fn name_field(name: &str) -> String {
    let mut end = name.len().min(NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &name[..end], " ".repeat(NAME_LEN - end))
}

impl ObjFileFormat for RecordFormat {
    type Stream = str;

    fn serialize(o: &ProgramImage) -> <Self::Stream as ToOwned>::Owned {
        let mut records = vec![format!("H{}{:06X}{:06X}", name_field(&o.name), o.start, o.length)];

        for (start, bytes) in o.blocks() {
            for (addr, chunk) in (start..).step_by(MAX_TEXT_LEN).zip(bytes.chunks(MAX_TEXT_LEN)) {
                let hex: String = chunk.iter().map(|b| format!("{b:02X}")).collect();
                records.push(format!("T{addr:06X}{:02X}{hex}", chunk.len()));
            }
        }
        for m in &o.mods {
            records.push(format!("M{:06X}{:02X}", m.addr, m.half_bytes));
        }
        records.push(format!("E{:06X}", o.entry));

        let mut out = records.join("\n");
        out.push('\n');
        out
    }

    fn deserialize(i: &Self::Stream) -> Result<ProgramImage, FormatErr> {
        /// Bytes at the end of a text record which begin an instruction but do not complete it.
        struct Leftover {
            /// Where the split record started.
            record_start: u32,
            /// The payload length of the split record.
            record_len: u32,
            /// The address of the first leftover byte.
            addr: u32,
            bytes: Vec<u8>,
        }
        impl Leftover {
            /// Inserts the leftover bytes as data.
            fn flush(self, image: &mut ProgramImage) -> Result<(), FormatErrKind> {
                image.insert_data(self.addr, &self.bytes)
                    .map_err(FormatErrKind::OverlappingText)
            }
        }

        fn hex(field: Option<&str>) -> Result<u32, FormatErrKind> {
            let field = field.ok_or(FormatErrKind::WrongLength)?;
            if field.is_empty() || !field.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(FormatErrKind::InvalidHex);
            }
            u32::from_str_radix(field, 16).map_err(|_| FormatErrKind::InvalidHex)
        }
        fn check_range(addr: u32, len: u32) -> Result<(), FormatErrKind> {
            match (addr as usize).checked_add(len as usize) {
                Some(end) if end <= MEM_SIZE => Ok(()),
                _ => Err(FormatErrKind::AddressOutOfRange),
            }
        }

        let mut image = ProgramImage::empty();
        let mut header = false;
        let mut entry = None;
        let mut leftover: Option<Leftover> = None;
        let mut text_records = 0;

        for (index, line) in i.lines().enumerate() {
            let line_no = index + 1;
            let err = |kind| FormatErr { kind, line: line_no };

            let line = line.trim_end();
            let mut chars = line.chars();
            let Some(record) = chars.next() else { continue };
            let fields = chars.as_str();

            if !header && matches!(record, 'T' | 'M' | 'E') {
                return Err(err(FormatErrKind::MissingHeader));
            }
            match record {
                'H' => {
                    if header {
                        return Err(err(FormatErrKind::DuplicateHeader));
                    }
                    if fields.len() != 18 {
                        return Err(err(FormatErrKind::WrongLength));
                    }
                    let name = fields.get(..NAME_LEN).ok_or(err(FormatErrKind::WrongLength))?;
                    let start = hex(fields.get(6..12)).map_err(err)?;
                    let length = hex(fields.get(12..18)).map_err(err)?;
                    check_range(start, length).map_err(err)?;

                    image.name = name.trim_end().to_string();
                    image.start = start;
                    image.length = length;
                    header = true;
                },
                'T' => {
                    let addr = hex(fields.get(..6)).map_err(err)?;
                    let count = hex(fields.get(6..8)).map_err(err)?;
                    let payload = fields.get(8..).unwrap_or("");
                    if payload.len() != 2 * count as usize {
                        return Err(err(FormatErrKind::WrongLength));
                    }
                    check_range(addr, count).map_err(err)?;
                    let bytes = (0..payload.len())
                        .step_by(2)
                        .map(|j| hex(payload.get(j..j + 2)).map(|b| b as u8))
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(err)?;

                    let (start, mut data) = match leftover.take() {
                        Some(lo) => {
                            let expected = lo.record_start + lo.record_len;
                            if addr != expected {
                                return Err(err(FormatErrKind::NonContiguous { expected, found: addr }));
                            }
                            (lo.addr, lo.bytes)
                        },
                        None => (addr, vec![]),
                    };
                    data.extend(bytes);

                    let stream = decode_stream(start, &data);
                    for instr in stream.instrs {
                        image.insert(instr)
                            .map_err(|a| err(FormatErrKind::OverlappingText(a)))?;
                    }
                    if !stream.leftover.is_empty() {
                        let lo_addr = start + (data.len() - stream.leftover.len()) as u32;
                        leftover = Some(Leftover { record_start: addr, record_len: count, addr: lo_addr, bytes: stream.leftover });
                    }
                    if count > 0 {
                        let last = addr + count - 1;
                        image.last_byte = Some(image.last_byte.map_or(last, |l| l.max(last)));
                    }
                    text_records += 1;
                },
                'M' => {
                    if fields.len() != 8 {
                        return Err(err(FormatErrKind::WrongLength));
                    }
                    let addr = hex(fields.get(..6)).map_err(err)?;
                    let half_bytes = hex(fields.get(6..8)).map_err(err)? as u8;
                    check_range(addr, u32::from(half_bytes).div_ceil(2)).map_err(err)?;
                    image.mods.push(Modification { addr, half_bytes });
                },
                'E' => {
                    if let Some(lo) = leftover.take() {
                        lo.flush(&mut image).map_err(err)?;
                    }
                    if !fields.is_empty() {
                        let addr = hex(Some(fields)).map_err(err)?;
                        if fields.len() != 6 {
                            return Err(err(FormatErrKind::WrongLength));
                        }
                        check_range(addr, 1).map_err(err)?;
                        entry = Some(addr);
                    }
                },
                c => return Err(err(FormatErrKind::UnknownRecord(c))),
            }
        }

        let last_line = i.lines().count();
        if !header {
            return Err(FormatErr { kind: FormatErrKind::MissingHeader, line: last_line.max(1) });
        }
        if let Some(lo) = leftover.take() {
            lo.flush(&mut image)
                .map_err(|kind| FormatErr { kind, line: last_line })?;
        }
        image.entry = entry.unwrap_or(image.start);

        tracing::debug!(
            name = %image.name,
            text_records,
            mods = image.mods.len(),
            entry = image.entry,
            last_byte = ?image.last_byte,
            "read object file"
        );
        Ok(image)
    }
}

impl ProgramImage {
    /// Reads a program image from H/T/M/E object records.
    ///
    /// ```
    /// use sicxe_ensemble::asm::ProgramImage;
    ///
    /// let image = ProgramImage::from_records("HHALT  000000000006\nT000000060100003F2FFD\nE000000\n").unwrap();
    /// assert_eq!(image.name(), "HALT");
    /// assert_eq!(image.len(), 2);
    /// ```
    pub fn from_records(records: &str) -> Result<Self, FormatErr> {
        RecordFormat::deserialize(records)
    }

    /// Writes this program image as H/T/M/E object records.
    pub fn to_records(&self) -> String {
        RecordFormat::serialize(self)
    }
}

#[cfg(test)]
mod tests {
    use crate::asm::assemble;
    use crate::ast::sim::{AbsMode, AddrModes, RelMode, SimInstr};
    use crate::ast::Opcode;
    use crate::parse::parse_ast;

    use super::*;

    const SRC: &str = "
    COPY    START   0x1000
    FIRST   LDA     #3
           +JSUB    FIRST
    LOOP    J       LOOP
            END     FIRST
    ";

    fn instr(image: &ProgramImage, addr: u32) -> Option<SimInstr> {
        image.instr_at(addr).map(|i| i.instr)
    }
    fn read(src: &str) -> Result<ProgramImage, FormatErr> {
        RecordFormat::deserialize(src)
    }
    fn assert_read_fail(src: &str, kind: FormatErrKind, line: usize) {
        assert_eq!(read(src), Err(FormatErr { kind, line }));
    }

    #[test]
    fn test_serialize() {
        let (image, _) = assemble(&parse_ast(SRC).unwrap()).unwrap();
        assert_eq!(RecordFormat::serialize(&image), "\
            HCOPY  00100000000A\n\
            T0010000A0100034B1010003F2FFD\n\
            M00100405\n\
            E001000\n\
        ");
    }

    #[test]
    fn test_header_name_width() {
        let mut image = read("HHALT  000000000006\nT000000060100003F2FFD\nE000000\n").unwrap();

        // 7 bytes: cut before the character that does not fit
        image.name = "ÉCOLE1".to_string();
        let records = image.to_records();
        let header = records.lines().next().unwrap();
        assert_eq!(header, "HÉCOLE000000000006");
        assert_eq!(header.len(), 19);
        assert_eq!(read(&records).unwrap().name(), "ÉCOLE");

        // 3 bytes: padded to 6 bytes
        image.name = "né".to_string();
        let records = image.to_records();
        assert_eq!(records.lines().next().unwrap(), "Hné   000000000006");
        assert_eq!(read(&records).unwrap().name(), "né");
    }

    #[test]
    fn test_serialize_splits_text() {
        let src = "
        LONG    START   0
                BYTE    X'000102030405060708090A0B0C0D0E0F101112131415161718191A1B1C1D1E1F2021222324252627'
                RESB    2
                BYTE    C'A'
        ";
        let (image, _) = assemble(&parse_ast(src).unwrap()).unwrap();
        let records = RecordFormat::serialize(&image);
        let text: Vec<_> = records.lines().filter(|r| r.starts_with('T')).collect();
        assert_eq!(text.len(), 3);
        assert!(text[0].starts_with("T0000001E000102"));
        assert_eq!(text[1], "T00001E0A1E1F2021222324252627");
        assert_eq!(text[2], "T00002A0141");
    }

    #[test]
    fn test_round_trip() {
        let (image, _) = assemble(&parse_ast(SRC).unwrap()).unwrap();
        let read = read(&RecordFormat::serialize(&image)).unwrap();

        assert_eq!(read.name(), "COPY");
        assert_eq!(read.start(), 0x1000);
        assert_eq!(read.length(), 0x0A);
        assert_eq!(read.entry(), 0x1000);
        assert_eq!(read.last_byte(), Some(0x1009));
        assert_eq!(read.modifications(), image.modifications());
        assert!(read.byte_iter().eq(image.byte_iter()));
    }

    #[test]
    fn test_split_instruction() {
        // LDA #3 split across two records
        let image = read("HSPLIT 000000000006\nT000000020100\nT00000204033F2FFD\nE000000").unwrap();
        let modes = AddrModes { rel: RelMode::Direct, abs: AbsMode::Immediate, indexed: false };
        assert_eq!(instr(&image, 0), Some(SimInstr::F3 { op: Opcode::LDA, modes, disp: 3 }));
        assert_eq!(instr(&image, 3).and_then(|i| i.opcode()), Some(Opcode::J));
        assert_eq!(image.last_byte(), Some(5));
    }

    #[test]
    fn test_non_contiguous() {
        assert_read_fail(
            "HSPLIT 000000000006\nT000000020100\nT00000504033F2FFD\nE000000",
            FormatErrKind::NonContiguous { expected: 2, found: 5 },
            3,
        );
    }

    #[test]
    fn test_end_resets_leftover() {
        let image = read("HSPLIT 000000000006\nT000000020100\nE000000\nT000010013F").unwrap();
        assert_eq!(instr(&image, 0), Some(SimInstr::Data(0x01)));
        assert_eq!(instr(&image, 1), Some(SimInstr::Data(0x00)));
        // a leftover at the end of the file is also kept as data
        assert_eq!(instr(&image, 0x10), Some(SimInstr::Data(0x3F)));
        assert_eq!(image.entry(), 0);
    }

    #[test]
    fn test_unknown_opcode_resilience() {
        let image = read("HDATA  000000000003\nT00000003C4FFC4").unwrap();
        let instrs: Vec<_> = image.iter().map(|i| i.instr).collect();
        assert_eq!(instrs, [SimInstr::F1(Opcode::FIX), SimInstr::Data(0xFF), SimInstr::F1(Opcode::FIX)]);
    }

    #[test]
    fn test_read_errors() {
        assert_read_fail("", FormatErrKind::MissingHeader, 1);
        assert_read_fail("T00000001C4", FormatErrKind::MissingHeader, 1);
        assert_read_fail("HA     000000000001\nHB     000000000001", FormatErrKind::DuplicateHeader, 2);
        assert_read_fail("HA     00000000000", FormatErrKind::WrongLength, 1);
        assert_read_fail("HA     000000000001\nT00000002C4", FormatErrKind::WrongLength, 2);
        assert_read_fail("HA     000000000001\nT00000001G4", FormatErrKind::InvalidHex, 2);
        assert_read_fail("HA     000000000001\nT0FFFFF02C4C4", FormatErrKind::AddressOutOfRange, 2);
        assert_read_fail("HA     000000000001\nT00000001C4\nT00000001C4", FormatErrKind::OverlappingText(0), 3);
        assert_read_fail("HA     000000000001\nX", FormatErrKind::UnknownRecord('X'), 2);
        assert_read_fail("HA     000000000001\nE12", FormatErrKind::WrongLength, 2);
    }
}
