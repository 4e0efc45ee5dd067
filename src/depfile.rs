//! Parsing of Makefile syntax as found in `.d` files emitted by C compilers.
//!
//! A depfile declares a single target followed by its discovered
//! dependencies, possibly continued across lines with backslash-newlines.

use crate::scanner::{ParseResult, Scanner};

/// The single rule of a depfile: `target: dep1 dep2 ...`.
#[derive(Debug, PartialEq)]
pub struct Depfile<'a> {
    pub target: &'a str,
    pub deps: Vec<&'a str>,
}

/// Skip spaces, carriage returns, and backslashed newlines.
fn skip_spaces(scanner: &mut Scanner) -> ParseResult<()> {
    loop {
        match scanner.read() {
            ' ' | '\r' => {}
            '\\' => match scanner.read() {
                '\n' => {}
                '\r' => {
                    if !scanner.skip('\n') {
                        return scanner.parse_error("invalid backslash escape");
                    }
                }
                _ => return scanner.parse_error("invalid backslash escape"),
            },
            _ => {
                scanner.back();
                break;
            }
        }
    }
    Ok(())
}

/// Read one path from the input scanner.
/// Note: treats colon as a valid character in a path because of Windows-style
/// paths, but this means that the initial `output: ...` path will include the
/// trailing colon.
fn read_path<'a>(scanner: &mut Scanner<'a>) -> ParseResult<Option<&'a str>> {
    skip_spaces(scanner)?;
    let start = scanner.ofs;
    loop {
        match scanner.read() {
            '\0' | ' ' | '\n' | '\r' => {
                scanner.back();
                break;
            }
            '\\' => {
                if matches!(scanner.peek(), '\n' | '\r') {
                    scanner.back();
                    break;
                }
            }
            _ => {}
        }
    }
    let end = scanner.ofs;
    if end == start {
        return Ok(None);
    }
    Ok(Some(scanner.slice(start, end)))
}

/// Parse a `.d` file into a `Depfile`.
pub fn parse<'a>(scanner: &mut Scanner<'a>) -> ParseResult<Depfile<'a>> {
    while matches!(scanner.peek(), ' ' | '\n' | '\r') {
        scanner.next();
    }
    let target = match read_path(scanner)? {
        None => return scanner.parse_error("expected a target path"),
        Some(o) => o,
    };
    scanner.skip_spaces();
    let target = match target.strip_suffix(':') {
        None => {
            scanner.expect(':')?;
            target
        }
        Some(target) => target,
    };
    let mut deps = Vec::new();
    while let Some(p) = read_path(scanner)? {
        deps.push(p);
    }
    while matches!(scanner.peek(), ' ' | '\n' | '\r') {
        scanner.next();
    }
    if scanner.peek() != '\0' {
        return scanner.parse_error("depfile has multiple output paths");
    }
    Ok(Depfile { target, deps })
}
