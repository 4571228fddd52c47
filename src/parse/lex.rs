//! Tokenizing SIC/XE assembly.
//!
//! This module holds the tokens that characterize a line of SIC/XE assembly ([`Token`]).
//! The tokens are used both by the line parser (to find the label, mnemonic, and operands of a line)
//! and by the assembler (to read operand literals).
//!
//! Numeric literals can be decimal (`12`, `-12`), hexadecimal (`0x1F`), or binary (`0b101`).
//! `BYTE` operands additionally accept character (`C'EOF'`) and hex byte (`X'F1'`) literals.

use std::num::IntErrorKind;

use logos::{Lexer, Logos};

/// A unit of information in SIC/XE source code.
#[derive(Debug, Logos, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t\r]+", error = LexErr)]
pub enum Token {
    // Like the identifiers, this regex spans some invalid numbers (e.g., `12AB`)
    // so that they are reported as one bad literal rather than two tokens.

    /// A numeric literal (e.g., `9`, `-14`, `0x7F`, `0b101`).
    #[regex(r"-?\d\w*", lex_num)]
    Num(i64),

    /// An identifier.
    ///
    /// This can refer to a label, a mnemonic, a directive, or a register.
    #[regex(r"[A-Za-z_]\w*", |lx| lx.slice().to_string())]
    Ident(String),

    /// A character literal (e.g., `C'EOF'`), as its bytes.
    #[regex(r"[Cc]'[^'\n]*'", lex_chars)]
    Chars(Vec<u8>),

    /// A hex byte literal (e.g., `X'F1'`), as its bytes.
    #[regex(r"[Xx]'[^'\n]*'", lex_hex_bytes)]
    Bytes(Vec<u8>),

    /// A pound sign, which marks immediate addressing.
    #[token("#")]
    Hash,

    /// An at sign, which marks indirect addressing.
    #[token("@")]
    At,

    /// A plus sign, which marks format 4 when it prefixes a mnemonic.
    #[token("+")]
    Plus,

    /// A comma, which delineate operands of an instruction.
    #[token(",")]
    Comma,

    /// An asterisk, which refers to the current location counter.
    #[token("*")]
    Star,

    /// A comment, which starts with a period and spans the remaining part of the line.
    #[regex(r"\.[^\n]*")]
    Comment,
}

/// Any errors raised in attempting to tokenize an input stream.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default, thiserror::Error)]
pub enum LexErr {
    /// Numeric literal does not fit in a 24-bit word.
    #[error("numeric literal does not fit in 24 bits")]
    DoesNotFit24,
    /// Decimal literal has invalid digits.
    #[error("invalid decimal literal")]
    InvalidNumeric,
    /// Hex literal (starting with 0x) has invalid digits.
    #[error("invalid hex literal")]
    InvalidHex,
    /// Binary literal (starting with 0b) has invalid digits.
    #[error("invalid binary literal")]
    InvalidBin,
    /// Hex byte literal (`X'..'`) is empty, has an odd number of digits, or has invalid digits.
    #[error("invalid hex byte literal")]
    InvalidHexBytes,
    /// Character literal (`C'..'`) is empty.
    #[error("empty character literal")]
    EmptyChars,
    /// Exactly one token was expected.
    #[error("expected a single value")]
    ExpectedSingle,
    /// A symbol was used which is not allowed in SIC/XE assembly files.
    #[default]
    #[error("unrecognized symbol")]
    InvalidSymbol,
}
impl crate::err::Error for LexErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            LexErr::DoesNotFit24    => Some(format!("the range for a 24-bit word is [{}, {}]", -0x80_0000, 0xFF_FFFF).into()),
            LexErr::InvalidNumeric  => Some("a decimal literal only consists of digits 0-9".into()),
            LexErr::InvalidHex      => Some("a hex literal starts with '0x' and consists of 0-9, A-F".into()),
            LexErr::InvalidBin      => Some("a binary literal starts with '0b' and consists of 0 and 1".into()),
            LexErr::InvalidHexBytes => Some("a hex byte literal has an even number of hex digits, like X'F1'".into()),
            LexErr::EmptyChars      => Some("add at least one character between the quotes".into()),
            LexErr::ExpectedSingle  => Some("this operand should be a symbol, a literal, or '*'".into()),
            LexErr::InvalidSymbol   => Some("this char does not occur in any token in SIC/XE assembly".into()),
        }
    }
}

fn lex_num(lx: &Lexer<'_, Token>) -> Result<i64, LexErr> {
    let slice = lx.slice();
    let (negative, digits) = match slice.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, slice),
    };

    let (radix, digits, invalid) = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        (16, hex, LexErr::InvalidHex)
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        (2, bin, LexErr::InvalidBin)
    } else {
        (10, digits, LexErr::InvalidNumeric)
    };

    let magnitude = i64::from_str_radix(digits, radix)
        .map_err(|e| match e.kind() {
            IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => LexErr::DoesNotFit24,
            _ => invalid,
        })?;
    let value = if negative { -magnitude } else { magnitude };

    match (-0x80_0000..=0xFF_FFFF).contains(&value) {
        true  => Ok(value),
        false => Err(LexErr::DoesNotFit24),
    }
}
fn lex_chars(lx: &Lexer<'_, Token>) -> Result<Vec<u8>, LexErr> {
    let slice = lx.slice();
    let inner = &slice[2..slice.len() - 1];
    match inner.is_empty() {
        true  => Err(LexErr::EmptyChars),
        false => Ok(inner.as_bytes().to_vec()),
    }
}
fn lex_hex_bytes(lx: &Lexer<'_, Token>) -> Result<Vec<u8>, LexErr> {
    let slice = lx.slice();
    let inner = &slice[2..slice.len() - 1];
    if inner.is_empty() || inner.len() % 2 != 0 || !inner.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(LexErr::InvalidHexBytes);
    }

    (0..inner.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&inner[i..i + 2], 16).map_err(|_| LexErr::InvalidHexBytes))
        .collect()
}

/// Lexes a string which should consist of exactly one token.
///
/// ```
/// use sicxe_ensemble::parse::lex::{lex_single, LexErr, Token};
///
/// assert_eq!(lex_single("0x1F"), Ok(Token::Num(0x1F)));
/// assert_eq!(lex_single(" LENGTH "), Ok(Token::Ident("LENGTH".to_string())));
/// assert_eq!(lex_single("A B"), Err(LexErr::ExpectedSingle));
/// ```
pub fn lex_single(s: &str) -> Result<Token, LexErr> {
    let mut tokens = Token::lexer(s);
    match (tokens.next(), tokens.next()) {
        (Some(tok), None) => tok,
        _ => Err(LexErr::ExpectedSingle),
    }
}

#[cfg(test)]
mod tests {
    use logos::Logos;

    use super::{lex_single, LexErr, Token};

    fn ident(s: &str) -> Token {
        Token::Ident(s.to_string())
    }

    #[test]
    fn test_numeric_success() {
        let mut tokens = Token::lexer("0 123 -45 0x7F 0XFF 0b101");
        assert_eq!(tokens.next(), Some(Ok(Token::Num(0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Num(123))));
        assert_eq!(tokens.next(), Some(Ok(Token::Num(-45))));
        assert_eq!(tokens.next(), Some(Ok(Token::Num(0x7F))));
        assert_eq!(tokens.next(), Some(Ok(Token::Num(0xFF))));
        assert_eq!(tokens.next(), Some(Ok(Token::Num(0b101))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_numeric_invalid() {
        assert_eq!(lex_single("12AB"), Err(LexErr::InvalidNumeric));
        assert_eq!(lex_single("0xZZ"), Err(LexErr::InvalidHex));
        assert_eq!(lex_single("0x"), Err(LexErr::InvalidHex));
        assert_eq!(lex_single("0b102"), Err(LexErr::InvalidBin));
        assert_eq!(lex_single("16777216"), Err(LexErr::DoesNotFit24));
        assert_eq!(lex_single("-8388609"), Err(LexErr::DoesNotFit24));
        assert_eq!(lex_single("99999999999999999999999"), Err(LexErr::DoesNotFit24));
        assert_eq!(lex_single("16777215"), Ok(Token::Num(0xFF_FFFF)));
    }

    #[test]
    fn test_byte_literals() {
        assert_eq!(lex_single("C'EOF'"), Ok(Token::Chars(b"EOF".to_vec())));
        assert_eq!(lex_single("c'A B'"), Ok(Token::Chars(b"A B".to_vec())));
        assert_eq!(lex_single("X'F1'"), Ok(Token::Bytes(vec![0xF1])));
        assert_eq!(lex_single("x'05ab'"), Ok(Token::Bytes(vec![0x05, 0xAB])));
        assert_eq!(lex_single("X'F'"), Err(LexErr::InvalidHexBytes));
        assert_eq!(lex_single("X''"), Err(LexErr::InvalidHexBytes));
        assert_eq!(lex_single("C''"), Err(LexErr::EmptyChars));
    }

    #[test]
    fn test_line_tokens() {
        let tokens: Vec<_> = Token::lexer("FIRST +JSUB @RETADR, BUF,X . a comment, really")
            .collect();
        assert_eq!(tokens, [
            Ok(ident("FIRST")),
            Ok(Token::Plus),
            Ok(ident("JSUB")),
            Ok(Token::At),
            Ok(ident("RETADR")),
            Ok(Token::Comma),
            Ok(ident("BUF")),
            Ok(Token::Comma),
            Ok(ident("X")),
            Ok(Token::Comment),
        ]);

        let tokens: Vec<_> = Token::lexer("LDA #3 *").collect();
        assert_eq!(tokens, [Ok(ident("LDA")), Ok(Token::Hash), Ok(Token::Num(3)), Ok(Token::Star)]);
    }

    #[test]
    fn test_comment_in_literal() {
        let tokens: Vec<_> = Token::lexer("BYTE C'A.B' .real").collect();
        assert_eq!(tokens, [Ok(ident("BYTE")), Ok(Token::Chars(b"A.B".to_vec())), Ok(Token::Comment)]);
    }

    #[test]
    fn test_invalid_symbol() {
        let mut tokens = Token::lexer("LDA ?");
        assert_eq!(tokens.next(), Some(Ok(ident("LDA"))));
        assert_eq!(tokens.next(), Some(Err(LexErr::InvalidSymbol)));
    }
}
