//! Fixed-width machine words.
//!
//! This module consists of:
//! - [`Word24`]: The 24-bit word used by every register (except `F`) and by memory accesses.
//! - [`Word48`]: The 48-bit wide word held by the floating-point register `F`.
//!
//! All [`Word24`] arithmetic is wrapping (masked to 24 bits). There is no overflow flag.

use std::cmp::Ordering;
use std::fmt::Write as _;

/// Errors that can occur from word arithmetic.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, thiserror::Error)]
pub enum ArithErr {
    /// The divisor of a division was zero.
    #[error("division by zero")]
    DivisionByZero,
    /// An arithmetic operation was applied to a 48-bit word.
    ///
    /// Wide (floating-point) arithmetic is not supported.
    #[error("48-bit arithmetic is not implemented")]
    WideUnimplemented,
}

const MASK24: u32 = 0xFF_FFFF;

/// A signed 24-bit two's-complement word, stored as 3 big-endian bytes.
///
/// # Ordering
///
/// Words are ordered **unsigned**, from the most significant byte down
/// (i.e., as stored, not by signed magnitude). This is what `COMP` and the
/// conditional jumps observe:
///
/// ```
/// use sicxe_ensemble::word::Word24;
///
/// let minus_one = Word24::from_i32(-1);
/// assert!(minus_one > Word24::from_u32(1));
/// ```
///
/// # Arithmetic
///
/// Addition, subtraction, and multiplication wrap around at 24 bits.
/// Division is truncating and can fail (see [`Word24::checked_div`]).
///
/// ```
/// use sicxe_ensemble::word::Word24;
///
/// let a = Word24::new([0x00, 0xFF, 0xFF]);
/// let b = Word24::new([0x00, 0x00, 0x01]);
/// assert_eq!(a + b, Word24::new([0x01, 0x00, 0x00]));
/// assert_eq!(Word24::MAX + b, Word24::ZERO);
/// ```
#[derive(PartialEq, Eq, Hash, Clone, Copy, Default, PartialOrd, Ord)]
pub struct Word24([u8; 3]);

impl Word24 {
    /// The zero word.
    pub const ZERO: Word24 = Word24([0x00; 3]);
    /// The word `1`.
    pub const ONE: Word24 = Word24([0x00, 0x00, 0x01]);
    /// The all-ones word (`-1` when read as signed).
    pub const MAX: Word24 = Word24([0xFF; 3]);

    /// Creates a word from its big-endian bytes.
    pub const fn new(bytes: [u8; 3]) -> Self {
        Word24(bytes)
    }
    /// Creates a word from the low 24 bits of an unsigned integer.
    pub const fn from_u32(value: u32) -> Self {
        let [_, b0, b1, b2] = (value & MASK24).to_be_bytes();
        Word24([b0, b1, b2])
    }
    /// Creates a word from the low 24 bits of a signed integer (two's complement).
    pub const fn from_i32(value: i32) -> Self {
        Self::from_u32(value as u32)
    }

    /// The big-endian bytes of this word.
    pub const fn bytes(self) -> [u8; 3] {
        self.0
    }
    /// The least significant byte of this word.
    pub const fn low_byte(self) -> u8 {
        self.0[2]
    }
    /// The unsigned value of this word (between `0` and `0xFFFFFF`).
    pub const fn get(self) -> u32 {
        let [b0, b1, b2] = self.0;
        u32::from_be_bytes([0, b0, b1, b2])
    }
    /// The signed value of this word (sign-extended from bit 23).
    pub const fn get_signed(self) -> i32 {
        ((self.get() << 8) as i32) >> 8
    }

    /// Wrapping multiplication.
    ///
    /// Both operands are sign-extended, multiplied, and truncated to the low 24 bits.
    pub fn wrapping_mul(self, rhs: Word24) -> Word24 {
        let product = i64::from(self.get_signed()) * i64::from(rhs.get_signed());
        Word24::from_u32(product as u32)
    }
    /// Truncating signed division.
    ///
    /// Both operands are sign-extended, divided (rounding toward zero),
    /// and truncated to the low 24 bits.
    ///
    /// # Errors
    /// Dividing by zero results in [`ArithErr::DivisionByZero`].
    pub fn checked_div(self, rhs: Word24) -> Result<Word24, ArithErr> {
        match rhs.get_signed() {
            0 => Err(ArithErr::DivisionByZero),
            d => Ok(Word24::from_i32(self.get_signed() / d)),
        }
    }

    /// Three-way comparison as the machine performs it (unsigned, most significant byte first).
    pub fn compare(self, rhs: Word24) -> Ordering {
        self.cmp(&rhs)
    }

    /// Formats the word as three space-separated hex bytes (e.g., `"01 0A FF"`).
    pub fn to_hex(self) -> String {
        let [b0, b1, b2] = self.0;
        format!("{b0:02X} {b1:02X} {b2:02X}")
    }
    /// Parses a word from exactly 6 hex digits.
    ///
    /// Whitespace between digits is ignored,
    /// so the output of [`Word24::to_hex`] can be read back.
    ///
    /// ```
    /// use sicxe_ensemble::word::Word24;
    ///
    /// assert_eq!(Word24::from_hex("00102A"), Some(Word24::from_u32(0x102A)));
    /// assert_eq!(Word24::from_hex("00 10 2A"), Some(Word24::from_u32(0x102A)));
    /// assert_eq!(Word24::from_hex("102A"), None);
    /// ```
    pub fn from_hex(s: &str) -> Option<Self> {
        let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        match digits.len() == 6 && digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            true  => u32::from_str_radix(&digits, 16).ok().map(Self::from_u32),
            false => None,
        }
    }
    /// Formats the word as three space-separated binary bytes.
    pub fn to_bin(self) -> String {
        let mut out = String::with_capacity(26);
        for (i, b) in self.0.iter().enumerate() {
            if i != 0 { out.push(' '); }
            // Writing to a String can't fail.
            let _ = write!(out, "{b:08b}");
        }
        out
    }
    /// Formats the word as a signed decimal.
    pub fn to_dec(self) -> String {
        self.get_signed().to_string()
    }
    /// Formats the word as an unsigned decimal.
    pub fn to_udec(self) -> String {
        self.get().to_string()
    }
}
impl std::fmt::Debug for Word24 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Word24({:06X})", self.get())
    }
}
impl std::fmt::Display for Word24 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06X}", self.get())
    }
}
impl std::fmt::UpperHex for Word24 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::UpperHex::fmt(&self.get(), f)
    }
}
impl std::fmt::Binary for Word24 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Binary::fmt(&self.get(), f)
    }
}
impl From<u8> for Word24 {
    fn from(value: u8) -> Self {
        Word24([0, 0, value])
    }
}
impl From<Word24> for u32 {
    fn from(value: Word24) -> Self {
        value.get()
    }
}

impl std::ops::Add for Word24 {
    type Output = Word24;

    /// Byte-wise ripple-carry addition, with the carry out of the top byte discarded.
    fn add(self, rhs: Self) -> Self::Output {
        let [a0, a1, a2] = self.0;
        let [b0, b1, b2] = rhs.0;

        let (r2, c2) = a2.overflowing_add(b2);
        let (r1, c1a) = a1.overflowing_add(b1);
        let (r1, c1b) = r1.overflowing_add(u8::from(c2));
        let r0 = a0.wrapping_add(b0).wrapping_add(u8::from(c1a || c1b));

        Word24([r0, r1, r2])
    }
}
impl std::ops::AddAssign for Word24 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
impl std::ops::Sub for Word24 {
    type Output = Word24;

    /// Byte-wise ripple-borrow subtraction, with the borrow out of the top byte discarded.
    fn sub(self, rhs: Self) -> Self::Output {
        let [a0, a1, a2] = self.0;
        let [b0, b1, b2] = rhs.0;

        let (r2, c2) = a2.overflowing_sub(b2);
        let (r1, c1a) = a1.overflowing_sub(b1);
        let (r1, c1b) = r1.overflowing_sub(u8::from(c2));
        let r0 = a0.wrapping_sub(b0).wrapping_sub(u8::from(c1a || c1b));

        Word24([r0, r1, r2])
    }
}
impl std::ops::SubAssign for Word24 {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}
impl std::ops::Neg for Word24 {
    type Output = Word24;

    fn neg(self) -> Self::Output {
        Word24::ZERO - self
    }
}
impl std::ops::Not for Word24 {
    type Output = Word24;

    fn not(self) -> Self::Output {
        let [a0, a1, a2] = self.0;
        Word24([!a0, !a1, !a2])
    }
}
macro_rules! bytewise_op {
    ($Trait:ident, $fn:ident, $op:tt) => {
        impl std::ops::$Trait for Word24 {
            type Output = Word24;

            fn $fn(self, rhs: Self) -> Self::Output {
                let [a0, a1, a2] = self.0;
                let [b0, b1, b2] = rhs.0;
                Word24([a0 $op b0, a1 $op b1, a2 $op b2])
            }
        }
    };
}
bytewise_op!(BitAnd, bitand, &);
bytewise_op!(BitOr, bitor, |);
bytewise_op!(BitXor, bitxor, ^);

/// A 48-bit wide word, stored as 6 big-endian bytes.
///
/// This is the storage format of the floating-point register `F`.
/// It is only a container: every arithmetic operation reports
/// [`ArithErr::WideUnimplemented`].
#[derive(PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct Word48([u8; 6]);

impl Word48 {
    /// The zero wide word.
    pub const ZERO: Word48 = Word48([0; 6]);

    /// Creates a wide word from its big-endian bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        Word48(bytes)
    }
    /// The big-endian bytes of this wide word.
    pub const fn bytes(self) -> [u8; 6] {
        self.0
    }
    /// Creates a wide word whose first 3 bytes are `high` and whose last 3 bytes are zero.
    pub const fn from_high(high: Word24) -> Self {
        let [b0, b1, b2] = high.bytes();
        Word48([b0, b1, b2, 0, 0, 0])
    }
    /// The first 3 bytes of this wide word.
    pub const fn high(self) -> Word24 {
        let [b0, b1, b2, ..] = self.0;
        Word24([b0, b1, b2])
    }

    /// Formats the wide word as six space-separated hex bytes.
    pub fn to_hex(self) -> String {
        self.0.iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Wide addition (unsupported).
    pub fn add(self, _rhs: Word48) -> Result<Word48, ArithErr> {
        Err(ArithErr::WideUnimplemented)
    }
    /// Wide subtraction (unsupported).
    pub fn sub(self, _rhs: Word48) -> Result<Word48, ArithErr> {
        Err(ArithErr::WideUnimplemented)
    }
    /// Wide multiplication (unsupported).
    pub fn mul(self, _rhs: Word48) -> Result<Word48, ArithErr> {
        Err(ArithErr::WideUnimplemented)
    }
    /// Wide division (unsupported).
    pub fn div(self, _rhs: Word48) -> Result<Word48, ArithErr> {
        Err(ArithErr::WideUnimplemented)
    }
}
impl std::fmt::Debug for Word48 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Word48({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn random_words(seed: u64, n: usize) -> Vec<Word24> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| Word24::from_u32(rng.gen())).collect()
    }

    #[test]
    fn test_add_carry() {
        let a = Word24::new([0x00, 0xFF, 0xFF]);
        assert_eq!(a + Word24::ONE, Word24::new([0x01, 0x00, 0x00]));
        assert_eq!(Word24::MAX + Word24::ONE, Word24::ZERO);
        assert_eq!(Word24::from_i32(-5) + Word24::from_u32(7), Word24::from_u32(2));
    }

    #[test]
    fn test_sub_borrow() {
        assert_eq!(Word24::new([0x01, 0x00, 0x00]) - Word24::ONE, Word24::new([0x00, 0xFF, 0xFF]));
        assert_eq!(Word24::ZERO - Word24::ONE, Word24::MAX);
        assert_eq!(-Word24::from_u32(3), Word24::from_i32(-3));
    }

    #[test]
    fn test_add_properties() {
        let words = random_words(0x5EED, 200);
        for pair in words.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert_eq!(a + b, b + a, "{a:?} + {b:?} should commute");
            assert_eq!((a + b) - b, a, "({a:?} + {b:?}) - {b:?} should be {a:?}");
            assert_eq!((a + b).get(), (a.get() + b.get()) & 0xFF_FFFF);
        }
    }

    #[test]
    fn test_hex_round_trip() {
        for w in random_words(0x2110, 500).into_iter().chain([Word24::ZERO, Word24::MAX]) {
            assert_eq!(Word24::from_hex(&w.to_hex()), Some(w));
            assert_eq!(Word24::from_hex(&w.to_string()), Some(w));
        }
        assert_eq!(Word24::from_hex("GGGGGG"), None);
        assert_eq!(Word24::from_hex("1234567"), None);
    }

    #[test]
    fn test_mul_div() {
        let six = Word24::from_u32(6);
        let minus_four = Word24::from_i32(-4);
        assert_eq!(six.wrapping_mul(minus_four), Word24::from_i32(-24));
        assert_eq!(Word24::from_u32(0x10_0000).wrapping_mul(Word24::from_u32(0x10)), Word24::ZERO);

        assert_eq!(Word24::from_i32(-7).checked_div(Word24::from_u32(2)), Ok(Word24::from_i32(-3)));
        assert_eq!(Word24::from_u32(7).checked_div(Word24::from_i32(-2)), Ok(Word24::from_i32(-3)));
        assert_eq!(six.checked_div(Word24::ZERO), Err(ArithErr::DivisionByZero));
    }

    #[test]
    fn test_compare_unsigned() {
        assert_eq!(Word24::from_u32(5).compare(Word24::from_u32(5)), Ordering::Equal);
        assert_eq!(Word24::from_u32(4).compare(Word24::from_u32(5)), Ordering::Less);
        assert_eq!(Word24::new([0x01, 0x00, 0x00]).compare(Word24::new([0x00, 0xFF, 0xFF])), Ordering::Greater);
        // negative numbers compare above positives
        assert_eq!(Word24::from_i32(-1).compare(Word24::from_u32(1)), Ordering::Greater);
    }

    #[test]
    fn test_bitwise_and_text() {
        let a = Word24::from_u32(0xF0F0F0);
        let b = Word24::from_u32(0x0FF00F);
        assert_eq!(a & b, Word24::from_u32(0x00F000));
        assert_eq!(a | b, Word24::from_u32(0xFFF0FF));
        assert_eq!(a ^ b, Word24::from_u32(0xFF00FF));
        assert_eq!(!a, Word24::from_u32(0x0F0F0F));

        assert_eq!(Word24::from_u32(0x01020A).to_hex(), "01 02 0A");
        assert_eq!(Word24::from_u32(0x800001).to_bin(), "10000000 00000000 00000001");
        assert_eq!(Word24::from_i32(-2).to_dec(), "-2");
        assert_eq!(Word24::from_i32(-2).to_udec(), "16777214");
    }

    #[test]
    fn test_wide_stub() {
        let w = Word48::from_high(Word24::from_u32(0xABCDEF));
        assert_eq!(w.bytes(), [0xAB, 0xCD, 0xEF, 0, 0, 0]);
        assert_eq!(w.high(), Word24::from_u32(0xABCDEF));
        assert_eq!(w.add(w), Err(ArithErr::WideUnimplemented));
        assert_eq!(w.div(Word48::ZERO), Err(ArithErr::WideUnimplemented));
    }
}
