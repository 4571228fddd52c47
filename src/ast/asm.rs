//! This module holds the structures the assembler consumes.
//!
//! A program is a list of [`SyntaxNode`]s, one per source line.
//! Each node holds the already-split pieces of the line (label, mnemonic, operands, comment),
//! and [`SyntaxNode::mnemonic`] can be parsed into a [`Mnemonic`] (an instruction or a [`Directive`]).

use std::str::FromStr;

use crate::ast::Opcode;

/// One tokenized line of assembly source.
///
/// ```text
/// COPY   START  1000    . copy file
/// ~~~~   ~~~~~  ~~~~    ~~~~~~~~~~~
/// label  mnem.  operand comment
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Default)]
pub struct SyntaxNode {
    /// The label defined on this line.
    pub label: Option<String>,
    /// The mnemonic of this line (including a `+` prefix, if present).
    pub mnemonic: Option<String>,
    /// The operands of this line, split on commas.
    pub operands: Vec<String>,
    /// The (1-indexed) source line.
    pub line: usize,
    /// Whether this line holds nothing but a comment.
    pub is_comment: bool,
    /// The text of the comment on this line (without the leading period).
    pub comment: String,
}
impl SyntaxNode {
    /// Creates a node for a line with an instruction or directive.
    pub fn new(line: usize, label: Option<&str>, mnemonic: &str, operands: &[&str]) -> Self {
        SyntaxNode {
            label: label.map(str::to_string),
            mnemonic: Some(mnemonic.to_string()),
            operands: operands.iter().map(|s| s.to_string()).collect(),
            line,
            ..Default::default()
        }
    }

    /// Creates a node for a line that is only a comment.
    pub fn comment(line: usize, comment: &str) -> Self {
        SyntaxNode {
            line,
            is_comment: true,
            comment: comment.to_string(),
            ..Default::default()
        }
    }

    /// Whether this line has nothing for the assembler to do.
    pub fn is_blank(&self) -> bool {
        self.is_comment || (self.label.is_none() && self.mnemonic.is_none())
    }
}
impl std::fmt::Display for SyntaxNode {
    /// Renders the node back into a source line.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_comment {
            return write!(f, ".{}", self.comment);
        }

        let label = self.label.as_deref().unwrap_or("");
        let mnemonic = self.mnemonic.as_deref().unwrap_or("");
        let line = format!("{label:<8} {mnemonic:<8} {}", self.operands.join(","));
        f.write_str(line.trim_end())?;

        if !self.comment.is_empty() {
            write!(f, " .{}", self.comment)?;
        }
        Ok(())
    }
}

/// An assembler directive.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Directive {
    /// Names the program and sets its starting address.
    Start,
    /// Ends the program, optionally naming the first instruction to execute.
    End,
    /// Moves the location counter.
    Org,
    /// Defines a symbol's value.
    Equ,
    /// Enables base-relative addressing, assuming B holds the operand's address.
    Base,
    /// Disables base-relative addressing.
    NoBase,
    /// Emits bytes.
    Byte,
    /// Emits a word.
    Word,
    /// Reserves bytes.
    Resb,
    /// Reserves words.
    Resw,
}
impl Directive {
    /// The name of this directive, as written in source.
    pub fn name(self) -> &'static str {
        match self {
            Directive::Start  => "START",
            Directive::End    => "END",
            Directive::Org    => "ORG",
            Directive::Equ    => "EQU",
            Directive::Base   => "BASE",
            Directive::NoBase => "NOBASE",
            Directive::Byte   => "BYTE",
            Directive::Word   => "WORD",
            Directive::Resb   => "RESB",
            Directive::Resw   => "RESW",
        }
    }
}
impl FromStr for Directive {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match &*s.to_uppercase() {
            "START"  => Ok(Directive::Start),
            "END"    => Ok(Directive::End),
            "ORG"    => Ok(Directive::Org),
            "EQU"    => Ok(Directive::Equ),
            "BASE"   => Ok(Directive::Base),
            "NOBASE" => Ok(Directive::NoBase),
            "BYTE"   => Ok(Directive::Byte),
            "WORD"   => Ok(Directive::Word),
            "RESB"   => Ok(Directive::Resb),
            "RESW"   => Ok(Directive::Resw),
            _ => Err(()),
        }
    }
}
impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed mnemonic.
///
/// ```
/// use sicxe_ensemble::ast::Opcode;
/// use sicxe_ensemble::ast::asm::{Directive, Mnemonic};
///
/// assert_eq!("+jsub".parse(), Ok(Mnemonic::Instr { op: Opcode::JSUB, extended: true }));
/// assert_eq!("RESW".parse(), Ok(Mnemonic::Directive(Directive::Resw)));
/// assert_eq!("+RESW".parse::<Mnemonic>(), Err(()));
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Mnemonic {
    /// A machine instruction.
    Instr {
        #[allow(missing_docs)]
        op: Opcode,
        /// Whether the mnemonic had a `+` prefix (format 4).
        extended: bool,
    },
    /// An assembler directive.
    Directive(Directive),
}
impl FromStr for Mnemonic {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix('+') {
            Some(rest) => rest.parse().map(|op| Mnemonic::Instr { op, extended: true }),
            None => s.parse().map(|op| Mnemonic::Instr { op, extended: false })
                .or_else(|_| s.parse().map(Mnemonic::Directive)),
        }
    }
}
impl std::fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mnemonic::Instr { op, extended: true } => write!(f, "+{op}"),
            Mnemonic::Instr { op, extended: false } => write!(f, "{op}"),
            Mnemonic::Directive(d) => write!(f, "{d}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_display() {
        let node = SyntaxNode::new(3, Some("FIRST"), "STL", &["RETADR"]);
        assert_eq!(node.to_string(), "FIRST    STL      RETADR");

        let node = SyntaxNode::new(4, None, "LDA", &["BUF", "X"]);
        assert_eq!(node.to_string(), "         LDA      BUF,X");

        let mut node = SyntaxNode::new(5, None, "RSUB", &[]);
        node.comment = " return".to_string();
        assert_eq!(node.to_string(), format!("{:9}RSUB . return", ""));

        assert_eq!(SyntaxNode::comment(1, " header").to_string(), ". header");
    }

    #[test]
    fn test_mnemonic_parse() {
        assert_eq!("lda".parse(), Ok(Mnemonic::Instr { op: Opcode::LDA, extended: false }));
        assert_eq!("nobase".parse(), Ok(Mnemonic::Directive(Directive::NoBase)));
        assert_eq!("LOOP".parse::<Mnemonic>(), Err(()));
        assert_eq!(Mnemonic::Instr { op: Opcode::J, extended: true }.to_string(), "+J");
    }
}
