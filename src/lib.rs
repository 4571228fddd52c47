//! A SIC/XE parser, assembler, object-file loader, and simulator.
//!
//! This is meant to be a general suite to use SIC/XE programs,
//! whether they come from assembly source or from object files
//! (and it is meant as a backend for simulator front-ends).
//!
//! # Usage
//!
//! To convert SIC/XE source code to a program image, it must be parsed and assembled:
//! ```
//! use sicxe_ensemble::parse::parse_ast;
//! use sicxe_ensemble::asm::assemble;
//!
//! let code = "
//! PROG    START   0x1000
//!         LDA     #7
//!         ADD     FIVE
//! HALT    J       HALT
//! FIVE    WORD    5
//!         END     PROG
//! ";
//! let ast = parse_ast(code).unwrap();
//! let (image, sym) = assemble(&ast).unwrap();
//!
//! // Program images can be written as object files:
//! let obj = image.to_records();
//! assert!(obj.starts_with("HPROG  001000"));
//! ```
//!
//! Once a program has been assembled (or read from an object file), it can be executed with the simulator:
//! ```
//! # use sicxe_ensemble::parse::parse_ast;
//! # let code = "PROG START 0x1000\n LDA #7\n ADD FIVE\nHALT J HALT\nFIVE WORD 5\n END PROG";
//! # let ast = parse_ast(code).unwrap();
//! use sicxe_ensemble::sim::Simulator;
//! use sicxe_ensemble::ast::Reg;
//!
//! let mut simulator = Simulator::new(Default::default());
//! simulator.load_assembly(&ast).unwrap();
//! simulator.run().unwrap(); // <-- Result can be handled accordingly
//!
//! assert!(simulator.hit_halt());
//! assert_eq!(simulator.reg_file.get(Reg::A).get(), 12);
//! ```
//!
//! If more granularity is needed for simulation, there are also step-in functions
//! and a thread-owned session. See the [`sim`] module for more details.
#![warn(missing_docs)]

pub mod word;
pub mod parse;
pub mod ast;
pub mod addressing;
pub mod asm;
pub mod sim;
pub mod err;
