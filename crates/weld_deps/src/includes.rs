//! Include-directive extraction and resolution against the search path.

use std::path::{Component, Path, PathBuf};

/// An include directive as written in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncludeToken {
    /// `#include "name"`: searched next to the includer first.
    Quoted(String),
    /// `#include <name>`: searched on the include path only.
    Angled(String),
}

impl IncludeToken {
    /// The included name.
    pub fn name(&self) -> &str {
        match self {
            IncludeToken::Quoted(n) | IncludeToken::Angled(n) => n,
        }
    }
}

/// Extracts `#include` directives from source text.
///
/// Handles whitespace between `#` and `include`, trailing comments, and
/// skips directives inside block comments. Macro-expanded includes are not
/// recognized; the preprocessor path covers those.
pub fn parse_include_directives(text: &str) -> Vec<IncludeToken> {
    let mut tokens = Vec::new();
    let mut in_block_comment = false;
    for raw in text.lines() {
        let line = strip_block_comments(raw, &mut in_block_comment);
        let line = line.trim_start();
        let Some(rest) = line.strip_prefix('#') else {
            continue;
        };
        let Some(rest) = rest.trim_start().strip_prefix("include") else {
            continue;
        };
        let rest = rest.trim_start();
        let token = if let Some(body) = rest.strip_prefix('"') {
            body.find('"')
                .map(|end| IncludeToken::Quoted(body[..end].to_string()))
        } else if let Some(body) = rest.strip_prefix('<') {
            body.find('>')
                .map(|end| IncludeToken::Angled(body[..end].to_string()))
        } else {
            None
        };
        if let Some(token) = token.filter(|t| !t.name().is_empty()) {
            tokens.push(token);
        }
    }
    tokens
}

/// Removes `/* */` comment text from a line, tracking comments that span lines.
fn strip_block_comments(line: &str, in_comment: &mut bool) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    loop {
        if *in_comment {
            match rest.find("*/") {
                Some(end) => {
                    rest = &rest[end + 2..];
                    *in_comment = false;
                }
                None => return out,
            }
        } else {
            let line_comment = rest.find("//");
            let block = rest.find("/*");
            match (block, line_comment) {
                (Some(b), Some(l)) if l < b => {
                    out.push_str(&rest[..l]);
                    return out;
                }
                (Some(b), _) => {
                    out.push_str(&rest[..b]);
                    rest = &rest[b + 2..];
                    *in_comment = true;
                }
                (None, Some(l)) => {
                    out.push_str(&rest[..l]);
                    return out;
                }
                (None, None) => {
                    out.push_str(rest);
                    return out;
                }
            }
        }
    }
}

/// Parses the make-rule output of `-MM` into the listed prerequisites.
///
/// The rule target and the file being analyzed are dropped.
pub fn parse_depfile(output: &str, file: &Path) -> Vec<PathBuf> {
    let joined = output.replace("\\\r\n", " ").replace("\\\n", " ");
    let Some(colon) = rule_colon(&joined) else {
        return Vec::new();
    };
    let mut deps = Vec::new();
    let mut current = String::new();
    let mut chars = joined[colon + 1..].chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&' ') => {
                current.push(' ');
                chars.next();
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    deps.push(PathBuf::from(std::mem::take(&mut current)));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        deps.push(PathBuf::from(current));
    }
    let file = normalize(file);
    deps.retain(|d| normalize(d) != file);
    deps
}

/// Finds the `target:` separator, ignoring drive-letter colons.
fn rule_colon(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    (0..bytes.len()).find(|&i| {
        bytes[i] == b':' && bytes.get(i + 1).map_or(true, |b| b.is_ascii_whitespace())
    })
}

/// Lexically normalizes `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Maps an absolute path into the project tree, or `None` if it lies outside.
pub fn project_relative(root: &Path, path: &Path) -> Option<PathBuf> {
    let absolute = if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&root.join(path))
    };
    absolute
        .strip_prefix(normalize(root))
        .ok()
        .map(Path::to_path_buf)
}

/// Resolves an include token to a project-relative path.
///
/// `includer` and `search_dirs` are absolute. Quoted includes try the
/// includer's directory first. Tokens that resolve to nothing, or to a file
/// outside `root` (system headers), yield `None`.
pub fn resolve_include(
    root: &Path,
    includer: &Path,
    token: &IncludeToken,
    search_dirs: &[PathBuf],
) -> Option<PathBuf> {
    let local = match token {
        IncludeToken::Quoted(_) => includer.parent().map(Path::to_path_buf),
        IncludeToken::Angled(_) => None,
    };
    local
        .into_iter()
        .chain(search_dirs.iter().cloned())
        .map(|dir| dir.join(token.name()))
        .find(|candidate| candidate.is_file())
        .and_then(|found| project_relative(root, &found))
}
