// The shared string-rewriting pass applied to every stack line before it is
// stored or used as a grouping key.  Three rewrites, in this order:
//
//   1. a trailing frame offset `+0x<hex>` is removed;
//   2. `created by <symbol> in task <N>` loses its `in task <N>` tail, so the
//      line no longer depends on which task spawned this one;
//   3. any remaining `0x<hex>` pointer value (optionally followed by `?`)
//      becomes `...`.
//
// The pass is deterministic and idempotent: normalizing a normalized line is
// a no-op.  Symbol extraction below operates on normalized lines, so the
// extraction used at parse time and the re-extraction over stored stacks
// agree by construction.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref OFFSET_RE: Regex = Regex::new(r"\s*\+0x[0-9a-fA-F]+\s*$").unwrap();
    static ref CREATED_BY_RE: Regex = Regex::new(r"(created by .+) in task \d+").unwrap();
    static ref HEX_PTR_RE: Regex = Regex::new(r"0x[0-9a-fA-F]+\??").unwrap();
}

/// Normalize one stack line.

pub fn normalize_line(line: &str) -> String {
    let line = OFFSET_RE.replace(line, "");
    let line = CREATED_BY_RE.replace(&line, "${1}");
    HEX_PTR_RE.replace_all(&line, "...").into_owned()
}

/// Extract the function symbol from one stack line, if the line carries one.
///
/// Location lines (anything containing `.go:` or starting with `/` once
/// leading whitespace is dropped) and `created by` lines yield no symbol.
/// For symbol lines, the package path up to the last `/` in the leading token
/// is dropped, and the argument list is truncated at its opening `(`.  A `(`
/// preceded by `.` or `*` is a method receiver such as `(*Server)` and is
/// kept.

pub fn extract_symbol(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty()
        || line.contains(".go:")
        || line.starts_with('/')
        || line.starts_with("created by")
    {
        return None;
    }

    let mut sym = line;

    let token_end = sym.find('(').unwrap_or(sym.len());
    if let Some(slash) = sym[..token_end].rfind('/') {
        sym = &sym[slash + 1..];
    }

    if let Some(paren) = sym.rfind('(') {
        if paren > 0 {
            let before = sym.as_bytes()[paren - 1];
            if before != b'.' && before != b'*' {
                sym = &sym[..paren];
            }
        }
    }

    if sym.is_empty() {
        None
    } else {
        Some(sym.to_string())
    }
}

/// Extract all symbols of a (normalized) stack, in order of appearance: most
/// recent call first, the spawn point last.

pub fn extract_symbols(stack: &str) -> Vec<String> {
    stack.lines().filter_map(extract_symbol).collect()
}

/// The entry-point label of a stack: its last two symbols joined by " -> ".
/// In root-first display convention these are the two outermost frames, i.e.
/// the code location where the task was spawned.  A stack with one symbol
/// yields that symbol alone; a stack with none yields "".

pub fn entry_point_label(stack: &str) -> String {
    let syms = extract_symbols(stack);
    match syms.len() {
        0 => String::new(),
        1 => syms[0].clone(),
        n => format!("{} -> {}", syms[n - 2], syms[n - 1]),
    }
}

#[test]
fn test_normalize_offsets() {
    assert!(normalize_line("\t/src/app/main.go:27 +0x1f") == "\t/src/app/main.go:27");
    assert!(normalize_line("\t/src/app/main.go:27 +0x1f  ") == "\t/src/app/main.go:27");
    // An offset not at the end of the line is a pointer value, not an offset.
    assert!(normalize_line("pkg.f(+0x12, 1)") == "pkg.f(+..., 1)");
}

#[test]
fn test_normalize_pointers() {
    assert!(normalize_line("pkg.Do(0xc0001234)") == "pkg.Do(...)");
    assert!(normalize_line("pkg.Do(0xc0001234)") == normalize_line("pkg.Do(0xc0009999)"));
    assert!(normalize_line("pkg.Do(0xc0001234?, 0x1)") == "pkg.Do(..., ...)");
}

#[test]
fn test_normalize_created_by() {
    assert!(normalize_line("created by pkg.outer in task 12") == "created by pkg.outer");
    assert!(
        normalize_line("created by pkg.outer in task 12")
            == normalize_line("created by pkg.outer in task 99")
    );
}

#[test]
fn test_normalize_idempotent() {
    let lines = vec![
        "pkg.Do(0xc0001234?, 0x1)",
        "created by pkg.outer in task 12",
        "\t/src/app/main.go:27 +0x1f",
        "net/http.(*conn).serve(0xc000123400)",
        "",
    ];
    for line in lines {
        let once = normalize_line(line);
        assert!(normalize_line(&once) == once);
    }
}

#[test]
fn test_extract_symbol() {
    assert!(extract_symbol("main.main()") == Some("main.main".to_string()));
    assert!(extract_symbol("github.com/foo/bar.Do(...)") == Some("bar.Do".to_string()));
    assert!(
        extract_symbol("net/http.(*conn).serve(...)") == Some("http.(*conn).serve".to_string())
    );
    // No argument list at all.
    assert!(extract_symbol("runtime.goexit") == Some("runtime.goexit".to_string()));
    // Location lines and created-by lines carry no symbol.
    assert!(extract_symbol("\t/src/app/main.go:27") == None);
    assert!(extract_symbol("/usr/lib/thing.s:40") == None);
    assert!(extract_symbol("created by pkg.outer") == None);
    assert!(extract_symbol("") == None);
}

#[test]
fn test_entry_point_label() {
    let stack = "pkg.inner(...)\n\t/src/a.go:10\npkg.middle()\n\t/src/b.go:20\npkg.outer()\n\t/src/c.go:30\ncreated by pkg.outer";
    assert!(entry_point_label(stack) == "pkg.middle -> pkg.outer");

    assert!(entry_point_label("main.main()\n\t/src/main.go:5") == "main.main");
    assert!(entry_point_label("\t/src/main.go:5") == "");
}
