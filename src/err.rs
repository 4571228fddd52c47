//! Error interface for this crate.
//!
//! Every error type that can be surfaced to a front-end implements [`Error`],
//! which exposes (optionally) where the error came from and a hint on how to fix it.
//!
//! This module also holds [`LoadErr`], which is what a failed program load produces
//! (whether the program came from an object file or from assembly).

use std::borrow::Cow;

pub use crate::asm::encoding::{FormatErr, FormatErrKind};
pub use crate::asm::{AsmErr, AsmErrKind};
pub use crate::parse::lex::LexErr;
use crate::sim::SimErr;

/// Where an error occurred.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ErrPos {
    /// A (1-indexed) line of an assembly source or object file.
    Line(usize),
    /// A memory address.
    Addr(u32),
}
impl std::fmt::Display for ErrPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrPos::Line(n) => write!(f, "line {n}"),
            ErrPos::Addr(a) => write!(f, "address {a:05X}"),
        }
    }
}

/// Unified error interface for all errors in this crate.
pub trait Error: std::error::Error {
    /// The position the error occurred at, if one is known.
    fn pos(&self) -> Option<ErrPos> {
        None
    }

    /// A help message describing how to fix this error, if one exists.
    fn help(&self) -> Option<Cow<str>> {
        None
    }
}

/// Errors from loading a program into the simulator.
///
/// A failed load never modifies the machine.
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum LoadErr {
    /// The object file could not be read.
    #[error(transparent)]
    Format(#[from] FormatErr),
    /// The assembly program could not be assembled.
    #[error(transparent)]
    Asm(#[from] AsmErr),
    /// The program does not fit in memory.
    #[error(transparent)]
    Sim(#[from] SimErr),
}
impl Error for LoadErr {
    fn pos(&self) -> Option<ErrPos> {
        match self {
            LoadErr::Format(e) => e.pos(),
            LoadErr::Asm(e)    => e.pos(),
            LoadErr::Sim(e)    => e.pos(),
        }
    }

    fn help(&self) -> Option<Cow<str>> {
        match self {
            LoadErr::Format(e) => e.help(),
            LoadErr::Asm(e)    => e.help(),
            LoadErr::Sim(e)    => e.help(),
        }
    }
}
