//! Parsing of the symbol dumper's output.

use std::collections::BTreeMap;

use weld_state::{ExportedSymbol, SymbolKind, Visibility};

/// Parses `llvm-nm --defined-only --extern-only` output into exported
/// symbols, deduplicated and sorted by name.
///
/// Understands the default BSD format (`[address] <type> <name>`). Archive
/// member headers, blank lines, undefined and local symbols are skipped.
pub fn parse_symbol_table(output: &str) -> Vec<ExportedSymbol> {
    let mut symbols = BTreeMap::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (code, name) = match fields.as_slice() {
            [addr, code, name] if is_hex(addr) => (*code, *name),
            [code, name] if code.len() == 1 => (*code, *name),
            _ => continue,
        };
        let Some(symbol) = classify(code, name) else {
            continue;
        };
        symbols.entry(symbol.name.clone()).or_insert(symbol);
    }
    symbols.into_values().collect()
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn classify(code: &str, name: &str) -> Option<ExportedSymbol> {
    let mut chars = code.chars();
    let c = chars.next()?;
    if chars.next().is_some() || c == 'U' || (c.is_ascii_lowercase() && !matches!(c, 'w' | 'v')) {
        return None;
    }
    let (kind, visibility) = match c {
        'T' => (SymbolKind::Function, Visibility::Global),
        'D' => (SymbolKind::Data, Visibility::Global),
        'B' => (SymbolKind::Bss, Visibility::Global),
        'R' => (SymbolKind::Readonly, Visibility::Global),
        'W' | 'w' => (SymbolKind::Function, Visibility::Weak),
        'V' | 'v' => (SymbolKind::Data, Visibility::Weak),
        _ => (SymbolKind::Other, Visibility::Global),
    };
    Some(ExportedSymbol {
        name: name.to_string(),
        kind,
        visibility,
    })
}
