//! Parsing assembly source code into syntax nodes.
//!
//! This module is used to convert strings (which represent assembly source code)
//! into [`SyntaxNode`]s, which the assembler consumes.
//!
//! The main function is [`parse_ast`], which splits every source line into
//! its label, mnemonic, operands, and comment:
//!
//! ```
//! use sicxe_ensemble::parse::parse_ast;
//!
//! let src = "
//! COPY    START   1000    . copy file
//! FIRST   STL     RETADR
//!         LDA     BUF,X
//! ";
//! let nodes = parse_ast(src).unwrap();
//! assert_eq!(nodes[0].label.as_deref(), Some("COPY"));
//! assert_eq!(nodes[0].comment, " copy file");
//! assert_eq!(nodes[2].mnemonic.as_deref(), Some("LDA"));
//! assert_eq!(nodes[2].operands, ["BUF", "X"]);
//! ```
//!
//! The line rules are:
//! - A period starts a comment, which spans the rest of the line.
//! - The first word is a label, unless it is a known mnemonic or directive.
//! - The mnemonic comes next, optionally prefixed by `+`.
//! - Everything after the mnemonic is the operand list, split on commas
//!   (commas inside `C'..'` literals do not split).
//!
//! Blank lines produce no node.

pub mod lex;

use std::ops::Range;

use logos::Logos;

use crate::ast::asm::{Mnemonic, SyntaxNode};
use lex::{LexErr, Token};

/// Kinds of errors that can occur from parsing a line.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, thiserror::Error)]
pub enum ParseErrKind {
    /// The line could not be tokenized.
    #[error(transparent)]
    Lex(#[from] LexErr),
    /// Something other than a mnemonic appeared where a mnemonic was expected.
    #[error("expected a mnemonic")]
    ExpectedMnemonic,
    /// Two commas appeared with no operand between them.
    #[error("empty operand")]
    EmptyOperand,
}

/// Error from parsing a line of assembly source.
#[derive(Debug, PartialEq, Eq, Hash, Clone, thiserror::Error)]
#[error("{kind}")]
pub struct ParseErr {
    /// The (1-indexed) line the error occurred on.
    pub line: usize,
    /// The byte span within the line the error occurred at.
    pub span: Range<usize>,
    /// The kind of error.
    pub kind: ParseErrKind,
}
impl crate::err::Error for ParseErr {
    fn pos(&self) -> Option<crate::err::ErrPos> {
        Some(crate::err::ErrPos::Line(self.line))
    }

    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match &self.kind {
            ParseErrKind::Lex(e) => crate::err::Error::help(e),
            ParseErrKind::ExpectedMnemonic => Some("a line is written as [label] mnemonic [operands]".into()),
            ParseErrKind::EmptyOperand => Some("remove the extra comma".into()),
        }
    }
}

/// Parses every line of assembly source code into syntax nodes.
///
/// This returns the first error encountered, if any.
pub fn parse_ast(src: &str) -> Result<Vec<SyntaxNode>, ParseErr> {
    src.lines()
        .enumerate()
        .filter_map(|(i, line)| parse_line(line, i + 1).transpose())
        .collect()
}

/// Parses one line of assembly source code.
///
/// This returns `None` for a blank line.
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<SyntaxNode>, ParseErr> {
    let err = |span: Range<usize>, kind: ParseErrKind| ParseErr { line: line_no, span, kind };

    let mut tokens = vec![];
    let mut comment = None;
    for (tok, span) in Token::lexer(line).spanned() {
        match tok.map_err(|e| err(span.clone(), e.into()))? {
            Token::Comment => comment = Some(line[span.start + 1..].to_string()),
            tok => tokens.push((tok, span)),
        }
    }

    let mut node = SyntaxNode {
        line: line_no,
        comment: comment.clone().unwrap_or_default(),
        ..Default::default()
    };
    if tokens.is_empty() {
        return Ok(comment.map(|_| SyntaxNode { is_comment: true, ..node }));
    }

    let is_mnemonic = |name: &str| name.parse::<Mnemonic>().is_ok();
    let mut rest = &tokens[..];

    if let [(Token::Ident(name), _), tail @ ..] = rest {
        if !is_mnemonic(name) {
            node.label = Some(name.clone());
            rest = tail;
        }
    }

    let mnemonic_end = match rest {
        [] => return Ok(Some(node)),
        [(Token::Plus, _), (Token::Ident(name), span), tail @ ..] => {
            node.mnemonic = Some(format!("+{name}"));
            rest = tail;
            span.end
        },
        [(Token::Ident(name), span), tail @ ..] => {
            node.mnemonic = Some(name.clone());
            rest = tail;
            span.end
        },
        [(_, span), ..] => return Err(err(span.clone(), ParseErrKind::ExpectedMnemonic)),
    };

    // split operands on top-level commas
    let mut start = mnemonic_end;
    let mut ends: Vec<_> = rest.iter()
        .filter(|(t, _)| *t == Token::Comma)
        .map(|(_, s)| s.clone())
        .collect();
    let operands_end = rest.last().map_or(mnemonic_end, |(_, s)| s.end);
    if !rest.is_empty() {
        ends.push(operands_end..operands_end);
    }
    for comma in ends {
        let operand = line[start..comma.start].trim();
        if operand.is_empty() {
            return Err(err(comma, ParseErrKind::EmptyOperand));
        }
        node.operands.push(operand.to_string());
        start = comma.end;
    }

    Ok(Some(node))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(line: &str) -> SyntaxNode {
        parse_line(line, 1).unwrap().unwrap()
    }

    #[test]
    fn test_label_detection() {
        let node = parse_one("FIRST STL RETADR");
        assert_eq!(node.label.as_deref(), Some("FIRST"));
        assert_eq!(node.mnemonic.as_deref(), Some("STL"));
        assert_eq!(node.operands, ["RETADR"]);

        let node = parse_one("    STL RETADR");
        assert_eq!(node.label, None);
        assert_eq!(node.mnemonic.as_deref(), Some("STL"));

        let node = parse_one("LOOP");
        assert_eq!(node.label.as_deref(), Some("LOOP"));
        assert_eq!(node.mnemonic, None);
    }

    #[test]
    fn test_extended_and_prefixes() {
        let node = parse_one("CLOOP +JSUB RDREC");
        assert_eq!(node.mnemonic.as_deref(), Some("+JSUB"));
        assert_eq!(node.operands, ["RDREC"]);

        let node = parse_one("  LDA #LENGTH");
        assert_eq!(node.operands, ["#LENGTH"]);

        let node = parse_one("  J @RETADR");
        assert_eq!(node.operands, ["@RETADR"]);

        let node = parse_one("  RSUB");
        assert!(node.operands.is_empty());
    }

    #[test]
    fn test_operand_split() {
        assert_eq!(parse_one("  COMPR A , S").operands, ["A", "S"]);
        assert_eq!(parse_one("  STCH BUFFER,X").operands, ["BUFFER", "X"]);
        assert_eq!(parse_one("EOF BYTE C'E,O F'").operands, ["C'E,O F'"]);
        assert_eq!(parse_one("  LDX #0x10").operands, ["#0x10"]);
    }

    #[test]
    fn test_comments() {
        let node = parse_one(". whole line");
        assert!(node.is_comment);
        assert_eq!(node.comment, " whole line");

        let node = parse_one("  LDA ZERO . clear A");
        assert!(!node.is_comment);
        assert_eq!(node.operands, ["ZERO"]);
        assert_eq!(node.comment, " clear A");

        assert_eq!(parse_line("   ", 1), Ok(None));
    }

    #[test]
    fn test_parse_errors() {
        let e = parse_line("  LDA A,,X", 4).unwrap_err();
        assert_eq!(e.line, 4);
        assert_eq!(e.kind, ParseErrKind::EmptyOperand);

        let e = parse_line("LOOP #3", 2).unwrap_err();
        assert_eq!(e.kind, ParseErrKind::ExpectedMnemonic);

        let e = parse_line("LDA ?", 9).unwrap_err();
        assert_eq!(e.kind, ParseErrKind::Lex(LexErr::InvalidSymbol));
        assert_eq!(e.span, 4..5);
    }

    #[test]
    fn test_line_numbers() {
        let nodes = parse_ast("A START 0\n\n. hi\n  RSUB\n").unwrap();
        let lines: Vec<_> = nodes.iter().map(|n| n.line).collect();
        assert_eq!(lines, [1, 3, 4]);
    }
}
