//! Syntax validation for candidate files using native tree-sitter grammars.

use std::path::Path;

use crate::errors::{GraftError, GraftResult};

/// Extensions accepted as candidates.
pub const CANDIDATE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mts", "cts"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    /// Logic-only sources (`.ts`, `.js`, `.mts`, `.cts`).
    Script,
    /// Sources that may contain JSX (`.tsx`, `.jsx`).
    Markup,
}

pub fn detect_dialect(path: &str) -> Option<Dialect> {
    let ext = Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())?;
    match ext.as_str() {
        "tsx" | "jsx" => Some(Dialect::Markup),
        "ts" | "js" | "mts" | "cts" => Some(Dialect::Script),
        _ => None,
    }
}

/// Check that `source` parses cleanly and carries no leftover merge markers.
pub fn validate_syntax(path: &str, source: &str) -> GraftResult<Dialect> {
    let dialect = detect_dialect(path).ok_or_else(|| GraftError::Parse {
        path: path.to_string(),
        line: 0,
        column: 0,
        message: "unsupported file extension".to_string(),
    })?;

    if let Some(line) = conflict_marker_line(source) {
        return Err(GraftError::Parse {
            path: path.to_string(),
            line,
            column: 1,
            message: "unresolved version-control conflict marker".to_string(),
        });
    }

    // JavaScript is parsed with the TypeScript grammars, which accept it.
    let ts_language = match dialect {
        Dialect::Script => tree_sitter_typescript::LANGUAGE_TYPESCRIPT,
        Dialect::Markup => tree_sitter_typescript::LANGUAGE_TSX,
    };

    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&ts_language.into())
        .map_err(|e| GraftError::Parse {
            path: path.to_string(),
            line: 0,
            column: 0,
            message: format!("failed to load grammar: {e}"),
        })?;

    let tree = parser
        .parse(source.as_bytes(), None)
        .ok_or_else(|| GraftError::Parse {
            path: path.to_string(),
            line: 0,
            column: 0,
            message: "parser produced no tree".to_string(),
        })?;

    let root = tree.root_node();
    if let Some(node) = first_error(root) {
        let position = node.start_position();
        let message = if node.is_missing() {
            format!("missing `{}`", node.kind())
        } else {
            "invalid syntax".to_string()
        };
        return Err(GraftError::Parse {
            path: path.to_string(),
            line: position.row + 1,
            column: position.column + 1,
            message,
        });
    }

    Ok(dialect)
}

fn first_error(node: tree_sitter::Node<'_>) -> Option<tree_sitter::Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_error(child) {
            return Some(found);
        }
    }
    Some(node)
}

fn conflict_marker_line(source: &str) -> Option<usize> {
    source
        .lines()
        .position(|line| {
            line.starts_with("<<<<<<< ")
                || line == "<<<<<<<"
                || line.starts_with(">>>>>>> ")
                || line == "======="
        })
        .map(|idx| idx + 1)
}
