//! Parsing of MSVC `cl.exe` output with `/showIncludes`, which reports each
//! opened header on its own line behind a localizable prefix.  Matched lines
//! are removed from the captured output; everything else passes through.

/// Default prefix for the English cl.exe; edges may override it with a
/// `msvc_deps_prefix` binding for localized toolchains.
pub const DEFAULT_DEPS_PREFIX: &str = "Note: including file: ";

/// Headers under the toolchain/SDK install trees are not interesting as
/// dependencies; a change there implies a full rebuild anyway.
fn is_system_include(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.contains("program files") || lower.contains("microsoft visual studio")
}

/// cl.exe echoes the name of the input file; filter that line too.
fn is_input_filename(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.ends_with(".c")
        || lower.ends_with(".cc")
        || lower.ends_with(".cxx")
        || lower.ends_with(".cpp")
        || lower.ends_with(".c++")
}

/// Parse captured cl.exe output: returns the output with dependency lines
/// filtered out, plus the list of discovered include paths (deduplicated,
/// in first-seen order).
pub fn parse(output: &[u8], deps_prefix: &str) -> (Vec<u8>, Vec<String>) {
    let prefix = if deps_prefix.is_empty() {
        DEFAULT_DEPS_PREFIX
    } else {
        deps_prefix
    };
    let text = String::from_utf8_lossy(output);
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    let mut filtered = Vec::new();
    let mut includes: Vec<String> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for line in lines {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(path) = line.strip_prefix(prefix) {
            let path = path.trim_start_matches(' ');
            if !is_system_include(path) && seen.insert(path.to_string()) {
                includes.push(path.to_string());
            }
            continue;
        }
        if is_input_filename(line) {
            continue;
        }
        filtered.extend_from_slice(line.as_bytes());
        filtered.push(b'\n');
    }
    (filtered, includes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_filters() {
        let output = b"foo.cpp\n\
Note: including file: foo.h\n\
Note: including file:   bar/baz.h\n\
some diagnostic\n";
        let (filtered, includes) = parse(output, "");
        assert_eq!(includes, vec!["foo.h", "bar/baz.h"]);
        assert_eq!(filtered, b"some diagnostic\n");
    }

    #[test]
    fn dedupes_includes() {
        let output = b"Note: including file: a.h\nNote: including file: a.h\n";
        let (_, includes) = parse(output, "");
        assert_eq!(includes, vec!["a.h"]);
    }

    #[test]
    fn filters_system_includes() {
        let output =
            b"Note: including file: C:\\Program Files\\include\\stdio.h\nNote: including file: a.h\n";
        let (_, includes) = parse(output, "");
        assert_eq!(includes, vec!["a.h"]);
    }

    #[test]
    fn custom_prefix() {
        let output = "Hinweis: Einlesen der Datei: x.h\n".as_bytes();
        let (filtered, includes) = parse(output, "Hinweis: Einlesen der Datei: ");
        assert_eq!(includes, vec!["x.h"]);
        assert!(filtered.is_empty());
    }

    #[test]
    fn crlf_lines() {
        let output = b"Note: including file: a.h\r\nkeep me\r\n";
        let (filtered, includes) = parse(output, "");
        assert_eq!(includes, vec!["a.h"]);
        assert_eq!(filtered, b"keep me\n");
    }
}
