//! Machine state for the SIC/XE simulator.
//!
//! This module consists of:
//! - [`Mem`]: The memory (1 MiB of bytes).
//! - [`RegFile`]: The register file.
//! - [`ConditionCode`]: The encoding of comparison results held in `SW`.
//! - [`MachineInitStrategy`]: How memory is filled on creation and reset.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::Rng;

use crate::ast::{Reg, RegErr};
use crate::word::{Word24, Word48};

use super::SimErr;

/// The number of addressable bytes.
pub const MEM_SIZE: usize = 0x10_0000;
/// The highest valid address.
pub const MAX_ADDR: u32 = (MEM_SIZE - 1) as u32;

/// Trait that describes types that can be used to fill memory.
pub trait ByteFiller {
    /// Generate the next byte.
    fn generate(&mut self) -> u8;
}
impl ByteFiller for () {
    /// This creates unseeded, non-deterministic values.
    fn generate(&mut self) -> u8 {
        rand::random()
    }
}
impl ByteFiller for u8 {
    /// Sets each byte to the given value.
    fn generate(&mut self) -> u8 {
        *self
    }
}
impl ByteFiller for StdRng {
    /// This creates values from the standard random number generator.
    ///
    /// This can be used to create deterministic, seeded values.
    fn generate(&mut self) -> u8 {
        self.gen()
    }
}

/// Strategy used to fill the `mem` of the [`Simulator`] when it is created or reset.
///
/// By default, memory is zeroed.
///
/// [`Simulator`]: super::Simulator
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MachineInitStrategy {
    /// Fills each byte randomly and non-deterministically.
    Unseeded,

    /// Fills each byte randomly and deterministically.
    Seeded {
        /// The seed the RNG was initialized with.
        seed: u64
    },

    /// Fills each byte with a known value.
    Known {
        /// The value to fill each byte with.
        value: u8
    }
}
impl Default for MachineInitStrategy {
    fn default() -> Self {
        MachineInitStrategy::Known { value: 0 }
    }
}
impl MachineInitStrategy {
    pub(super) fn generator(&self) -> impl ByteFiller {
        use rand::SeedableRng;

        match self {
            MachineInitStrategy::Unseeded => MIGenerator::Unseeded,
            MachineInitStrategy::Seeded { seed } => MIGenerator::Seeded(Box::new(StdRng::seed_from_u64(*seed))),
            MachineInitStrategy::Known { value } => MIGenerator::Known(*value),
        }
    }
}

enum MIGenerator {
    Unseeded,
    Seeded(Box<StdRng>),
    Known(u8)
}
impl ByteFiller for MIGenerator {
    fn generate(&mut self) -> u8 {
        match self {
            MIGenerator::Unseeded  => ().generate(),
            MIGenerator::Seeded(r) => r.generate(),
            MIGenerator::Known(k)  => k.generate(),
        }
    }
}

/// Memory.
///
/// This is addressed with any address in `0..=0xFFFFF`.
/// Any access which touches a byte outside that range fails with [`SimErr::AddressOutOfRange`]
/// (addresses never wrap around).
///
/// Words are stored big-endian:
/// ```
/// use sicxe_ensemble::sim::mem::Mem;
/// use sicxe_ensemble::word::Word24;
///
/// let mut mem = Mem::new(&mut 0u8);
/// mem.set_word(0x1000, Word24::from_u32(0x123456)).unwrap();
/// assert_eq!(mem.byte(0x1000).unwrap(), 0x12);
/// assert_eq!(mem.byte(0x1002).unwrap(), 0x56);
///
/// assert!(mem.word(0xFFFFD).is_ok());
/// assert!(mem.word(0xFFFFE).is_err());
/// ```
pub struct Mem {
    data: Box<[u8]>,
}
impl Mem {
    /// Creates a new memory, filled by the given filler.
    pub fn new(filler: &mut impl ByteFiller) -> Self {
        Self {
            data: std::iter::repeat_with(|| filler.generate())
                .take(MEM_SIZE)
                .collect()
        }
    }

    /// Refills all of memory.
    pub fn fill(&mut self, filler: &mut impl ByteFiller) {
        self.data.iter_mut().for_each(|b| *b = filler.generate());
    }

    fn range(&self, addr: u32, len: usize) -> Result<std::ops::Range<usize>, SimErr> {
        let start = addr as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(start..end),
            _ => Err(SimErr::AddressOutOfRange(addr)),
        }
    }

    /// Reads a range of bytes.
    pub fn slice(&self, addr: u32, len: usize) -> Result<&[u8], SimErr> {
        let range = self.range(addr, len)?;
        Ok(&self.data[range])
    }
    /// Writes a range of bytes.
    pub fn write_slice(&mut self, addr: u32, bytes: &[u8]) -> Result<(), SimErr> {
        let range = self.range(addr, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Reads a byte.
    pub fn byte(&self, addr: u32) -> Result<u8, SimErr> {
        self.slice(addr, 1).map(|s| s[0])
    }
    /// Writes a byte.
    pub fn set_byte(&mut self, addr: u32, byte: u8) -> Result<(), SimErr> {
        self.write_slice(addr, &[byte])
    }

    /// Reads a 3-byte word.
    pub fn word(&self, addr: u32) -> Result<Word24, SimErr> {
        let s = self.slice(addr, 3)?;
        Ok(Word24::new([s[0], s[1], s[2]]))
    }
    /// Writes a 3-byte word.
    pub fn set_word(&mut self, addr: u32, word: Word24) -> Result<(), SimErr> {
        self.write_slice(addr, &word.bytes())
    }

    /// Reads a 6-byte wide word.
    pub fn wide(&self, addr: u32) -> Result<Word48, SimErr> {
        let mut bytes = [0; 6];
        bytes.copy_from_slice(self.slice(addr, 6)?);
        Ok(Word48::new(bytes))
    }
    /// Writes a 6-byte wide word.
    pub fn set_wide(&mut self, addr: u32, word: Word48) -> Result<(), SimErr> {
        self.write_slice(addr, &word.bytes())
    }
}
impl std::fmt::Debug for Mem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mem")
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}

/// The register file.
///
/// Every register but `F` is a [`Word24`].
/// `F` is a [`Word48`]; accessing it through the 24-bit accessors
/// reads its first 3 bytes and writes its first 3 bytes (zeroing the rest).
///
/// ```
/// use sicxe_ensemble::ast::Reg;
/// use sicxe_ensemble::sim::mem::RegFile;
/// use sicxe_ensemble::word::Word24;
///
/// let mut reg = RegFile::new();
/// reg.set(Reg::A, Word24::from_u32(11));
/// assert_eq!(reg.get(Reg::A).get(), 11);
///
/// // by id:
/// reg.set_by_id(4, Word24::from_u32(12)).unwrap();
/// assert_eq!(reg.get(Reg::S).get(), 12);
/// assert!(reg.get_by_id(7).is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RegFile {
    gp: [Word24; 6],
    f: Word48,
    pc: Word24,
    sw: Word24,
}
impl RegFile {
    /// Creates a zeroed register file.
    pub fn new() -> Self {
        Default::default()
    }

    /// Reads a register.
    pub fn get(&self, reg: Reg) -> Word24 {
        match reg {
            Reg::F  => self.f.high(),
            Reg::PC => self.pc,
            Reg::SW => self.sw,
            r => self.gp[usize::from(r.id())],
        }
    }
    /// Writes a register.
    pub fn set(&mut self, reg: Reg, value: Word24) {
        match reg {
            Reg::F  => self.f = Word48::from_high(value),
            Reg::PC => self.pc = value,
            Reg::SW => self.sw = value,
            r => self.gp[usize::from(r.id())] = value,
        }
    }

    /// Reads a register by its id.
    pub fn get_by_id(&self, id: u8) -> Result<Word24, RegErr> {
        Reg::try_from(id).map(|r| self.get(r))
    }
    /// Writes a register by its id.
    pub fn set_by_id(&mut self, id: u8, value: Word24) -> Result<(), RegErr> {
        Reg::try_from(id).map(|r| self.set(r, value))
    }

    /// Reads all 6 bytes of `F`.
    pub fn f(&self) -> Word48 {
        self.f
    }
    /// Writes all 6 bytes of `F`.
    pub fn set_f(&mut self, value: Word48) {
        self.f = value;
    }

    /// The program counter as an address.
    pub fn pc(&self) -> u32 {
        self.pc.get()
    }
    /// Sets the program counter.
    pub fn set_pc(&mut self, addr: u32) {
        self.pc = Word24::from_u32(addr);
    }

    /// The condition code held in `SW`.
    pub fn cc(&self) -> ConditionCode {
        ConditionCode::from_word(self.sw)
    }
    /// Sets the condition code held in `SW`.
    pub fn set_cc(&mut self, cc: ConditionCode) {
        self.sw = cc.word();
    }
}

/// The outcome of the last comparison, as held in `SW`.
///
/// The code is encoded in the top two bits of `SW`:
///
/// | code      | `SW`     |
/// |-----------|----------|
/// | less      | `000000` |
/// | equal     | `400000` |
/// | greater   | `800000` |
///
/// A zeroed `SW` reads as less, so before any comparison has run
/// (e.g., right after a reset) `JLT` branches and `JEQ`/`JGT` do not.
///
/// ```
/// use sicxe_ensemble::sim::mem::{ConditionCode, RegFile};
///
/// assert_eq!(RegFile::new().cc(), ConditionCode::Less);
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ConditionCode {
    #[allow(missing_docs)]
    Less,
    #[allow(missing_docs)]
    Equal,
    #[allow(missing_docs)]
    Greater,
}
impl ConditionCode {
    /// The `SW` value encoding this condition code.
    pub fn word(self) -> Word24 {
        match self {
            ConditionCode::Less    => Word24::new([0x00, 0, 0]),
            ConditionCode::Equal   => Word24::new([0x40, 0, 0]),
            ConditionCode::Greater => Word24::new([0x80, 0, 0]),
        }
    }
    /// Decodes the condition code from an `SW` value.
    pub fn from_word(sw: Word24) -> Self {
        match sw.bytes()[0] >> 6 {
            0 => ConditionCode::Less,
            1 => ConditionCode::Equal,
            _ => ConditionCode::Greater,
        }
    }
}
impl From<Ordering> for ConditionCode {
    fn from(value: Ordering) -> Self {
        match value {
            Ordering::Less    => ConditionCode::Less,
            Ordering::Equal   => ConditionCode::Equal,
            Ordering::Greater => ConditionCode::Greater,
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn test_mem_bounds() {
        let mut mem = Mem::new(&mut 0u8);
        assert_eq!(mem.byte(MAX_ADDR), Ok(0));
        assert_eq!(mem.byte(MAX_ADDR + 1), Err(SimErr::AddressOutOfRange(MAX_ADDR + 1)));
        assert_eq!(mem.set_word(MAX_ADDR - 1, Word24::ONE), Err(SimErr::AddressOutOfRange(MAX_ADDR - 1)));
        assert_eq!(mem.wide(MAX_ADDR - 5).map(|w| w.bytes()), Ok([0; 6]));
        assert!(mem.wide(MAX_ADDR - 4).is_err());
        assert!(mem.slice(u32::MAX, 1).is_err());

        // failed writes don't write partially
        assert_eq!(mem.byte(MAX_ADDR - 1), Ok(0));
    }

    #[test]
    fn test_mem_access() {
        let mut mem = Mem::new(&mut 0u8);
        mem.write_slice(0x200, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(mem.word(0x201), Ok(Word24::from_u32(0x020304)));
        assert_eq!(mem.wide(0x200), Ok(Word48::new([1, 2, 3, 4, 5, 6])));

        mem.set_byte(0x201, 0xFF).unwrap();
        assert_eq!(mem.slice(0x200, 3), Ok(&[1, 0xFF, 3][..]));
    }

    #[test]
    fn test_fill_strategies() {
        let mut a = MachineInitStrategy::Seeded { seed: 7 }.generator();
        let mut b = StdRng::seed_from_u64(7);
        let mem_a = Mem::new(&mut a);
        let mem_b = Mem::new(&mut b);
        assert_eq!(mem_a.slice(0, 64), mem_b.slice(0, 64));

        let mut mem = Mem::new(&mut MachineInitStrategy::Known { value: 0xAA }.generator());
        assert_eq!(mem.byte(0x12345), Ok(0xAA));
        mem.fill(&mut 0u8);
        assert_eq!(mem.byte(0x12345), Ok(0));
    }

    #[test]
    fn test_reg_file() {
        let mut reg = RegFile::new();
        for r in Reg::ALL {
            assert_eq!(reg.get(r), Word24::ZERO);
        }

        reg.set_f(Word48::new([1, 2, 3, 4, 5, 6]));
        reg.set_by_id(6, Word24::from_u32(0xABCDEF)).unwrap();
        assert_eq!(reg.f().bytes(), [0xAB, 0xCD, 0xEF, 0, 0, 0]);
        assert_eq!(reg.get_by_id(6), Ok(Word24::from_u32(0xABCDEF)));

        assert_eq!(reg.set_by_id(7, Word24::ONE), Err(RegErr::InvalidRegister(7)));
        assert_eq!(reg.get_by_id(12), Err(RegErr::InvalidRegister(12)));

        reg.set_pc(0x1234);
        assert_eq!(reg.get_by_id(8), Ok(Word24::from_u32(0x1234)));
    }

    #[test]
    fn test_condition_codes() {
        let mut reg = RegFile::new();
        for cc in [ConditionCode::Less, ConditionCode::Equal, ConditionCode::Greater] {
            reg.set_cc(cc);
            assert_eq!(reg.cc(), cc);
        }
        assert_eq!(ConditionCode::from(Word24::from_u32(2).compare(Word24::from_u32(7))), ConditionCode::Less);
    }
}
