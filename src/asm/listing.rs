//! Rendering assembled programs as listings.
//!
//! A listing shows every source line next to the address it was assembled at
//! and the object code it produced, followed by the symbol table:
//!
//! ```text
//!    1  01000            COPY     START    0x1000
//!    2  01000  010003    FIRST    LDA      #3
//!    3  01003  3F2FFD    LOOP     J        LOOP
//!    4  01006                     END      FIRST
//!
//! SYMBOL    VALUE   TYPE
//! FIRST     001000  code
//! LOOP      001003  code
//! ```

use std::fmt::Write as _;

use crate::ast::asm::SyntaxNode;

use super::{ProgramImage, SymbolTable};

/// Object code longer than this many bytes is cut off with `..`.
const MAX_CODE_BYTES: usize = 8;

/// Renders a listing of an assembled program.
///
/// `image` and `sym` should be the result of assembling `nodes`
/// (see [`assemble`](super::assemble)).
///
/// ```
/// use sicxe_ensemble::parse::parse_ast;
/// use sicxe_ensemble::asm::assemble;
/// use sicxe_ensemble::asm::listing::emit_listing;
///
/// let nodes = parse_ast("PROG START 0\nHALT J HALT\n END HALT").unwrap();
/// let (image, sym) = assemble(&nodes).unwrap();
///
/// let listing = emit_listing(&nodes, &image, &sym);
/// assert!(listing.lines().nth(1).unwrap().contains("3F2FFD"));
/// ```
pub fn emit_listing(nodes: &[SyntaxNode], image: &ProgramImage, sym: &SymbolTable) -> String {
    let mut out = String::new();

    for node in nodes {
        let (addr, code) = match sym.lookup_line(node.line) {
            Some((addr, len)) if !node.is_blank() => {
                let mut code: String = image.range(addr..addr + len)
                    .flat_map(|i| i.bytes())
                    .take(MAX_CODE_BYTES + 1)
                    .map(|b| format!("{b:02X}"))
                    .collect();
                if code.len() > 2 * MAX_CODE_BYTES {
                    code.truncate(2 * MAX_CODE_BYTES);
                    code.push_str("..");
                }
                (format!("{addr:05X}"), code)
            },
            _ => (String::new(), String::new()),
        };

        let line = format!("{:>4}  {addr:5}  {code:<8}  {node}", node.line);
        // writing to a String cannot fail
        let _ = writeln!(out, "{}", line.trim_end());
    }

    let mut labels = sym.label_iter().peekable();
    if labels.peek().is_some() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{:<8}  {:<6}  TYPE", "SYMBOL", "VALUE");
        for (name, s) in labels {
            let kind = match (s.relocatable, s.is_data) {
                (false, _)    => "abs",
                (true, false) => "code",
                (true, true)  => "data",
            };
            let _ = writeln!(out, "{name:<8}  {:06X}  {kind}", s.addr);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use crate::asm::assemble;
    use crate::parse::parse_ast;

    use super::*;

    fn listing(src: &str) -> String {
        let nodes = parse_ast(src).unwrap();
        let (image, sym) = assemble(&nodes).unwrap();
        emit_listing(&nodes, &image, &sym)
    }

    #[test]
    fn test_code_lines() {
        let out = listing("COPY START 0x1000\nFIRST LDA #3\nLOOP J LOOP\n END FIRST\n");
        let lines: Vec<_> = out.lines().collect();

        assert_eq!(lines[0], "   1  01000            COPY     START    0x1000");
        assert_eq!(lines[1], "   2  01000  010003    FIRST    LDA      #3");
        assert_eq!(lines[2], "   3  01003  3F2FFD    LOOP     J        LOOP");
        assert_eq!(lines[3], "   4  01006                     END      FIRST");
    }

    #[test]
    fn test_data_and_comments() {
        let out = listing("\
            P START 0\n\
            . buffers\n\
            BUF RESB 4\n\
            EOF BYTE C'EOF'\n\
            LONG BYTE X'0102030405060708090A'\n\
            K EQU 7\n\
            \x20END\n\
        ");
        let lines: Vec<_> = out.lines().collect();

        assert!(lines[1].starts_with("   2"));
        assert!(lines[1].ends_with(". buffers"));
        assert!(lines[2].starts_with("   3  00000"));
        assert!(!lines[2].contains("00000  0"));
        assert!(lines[3].contains("00004  454F46"));
        assert!(lines[4].contains("0102030405060708..  LONG"));

        assert!(out.contains("SYMBOL    VALUE   TYPE"));
        assert!(out.contains("BUF       000000  data"));
        assert!(out.contains("EOF       000004  data"));
        assert!(out.contains("K         000007  abs"));
    }
}
