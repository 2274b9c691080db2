//! Text-level merge of a candidate module into an existing one.
//!
//! Every declaration already in the existing file is kept byte-for-byte.
//! Candidate exports that are new are appended together with the local
//! helpers and imports they reference. Exports present in both files with
//! different content become conflicts, and a conflicted merge produces no
//! output change unless an explicit resolution is supplied.

use std::collections::{BTreeMap, BTreeSet};

use crate::analyzer::symbols::{
    normalize_code, parse_module, references_identifier, signature_of, ExportedSymbol,
    ImportStatement, ModuleInfo,
};
use crate::models::{Conflict, ConflictKind, ConflictResolution, SymbolKind};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergePlan {
    pub output: String,
    /// Conflicts left unresolved; when non-empty `output` is the existing text.
    pub conflicts: Vec<Conflict>,
    pub added: Vec<String>,
    /// Local helpers copied along with added exports.
    pub helpers: Vec<String>,
    pub unchanged: Vec<String>,
    /// Existing declarations replaced by the candidate's version.
    pub replaced: Vec<String>,
    /// New exports not added because additions are disabled.
    pub dropped: Vec<String>,
    pub warnings: Vec<String>,
}

impl MergePlan {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// What a top-level name is bound to in the existing module.
#[derive(Clone, Debug)]
enum Binding {
    Import { specifier: String },
    Declaration { kind: SymbolKind, body: String, chunk: usize },
}

struct PendingConflict {
    conflict: Conflict,
    /// Existing chunk the candidate text would replace.
    replace: Option<(usize, String)>,
}

// ---------------------------------------------------------------------------
// Comparison helpers
// ---------------------------------------------------------------------------

fn strip_export(text: &str) -> &str {
    let text = text.trim_start();
    let text = text.strip_prefix("export default ").unwrap_or(text);
    let text = text.strip_prefix("export ").unwrap_or(text);
    text.strip_prefix("declare ").unwrap_or(text)
}

fn comparable(text: &str) -> String {
    strip_export(&normalize_code(text)).to_string()
}

fn family(kind: SymbolKind) -> u8 {
    match kind {
        SymbolKind::Function
        | SymbolKind::Constant
        | SymbolKind::Variable
        | SymbolKind::DefaultExpression => 0,
        SymbolKind::Class => 1,
        SymbolKind::Interface | SymbolKind::TypeAlias => 2,
        SymbolKind::Enum => 3,
        SymbolKind::Namespace => 4,
        SymbolKind::Alias => 5,
    }
}

fn kind_label(kind: SymbolKind) -> &'static str {
    match kind {
        SymbolKind::Function => "function",
        SymbolKind::Class => "class",
        SymbolKind::Interface => "interface",
        SymbolKind::TypeAlias => "type alias",
        SymbolKind::Enum => "enum",
        SymbolKind::Constant => "constant",
        SymbolKind::Variable => "variable",
        SymbolKind::Namespace => "namespace",
        SymbolKind::DefaultExpression => "default expression",
        SymbolKind::Alias => "re-export",
    }
}

/// Kind of the declaration behind an export, looking through `export { x }`.
fn effective_kind(module: &ModuleInfo, symbol: &ExportedSymbol) -> SymbolKind {
    if symbol.kind == SymbolKind::Alias && symbol.reexport_from.is_none() {
        if let Some(local) = symbol.local_name.as_deref().and_then(|n| module.local(n)) {
            return local.kind;
        }
    }
    symbol.kind
}

fn classify_difference(
    existing_kind: SymbolKind,
    existing_body: &str,
    incoming_kind: SymbolKind,
    incoming_body: &str,
) -> ConflictKind {
    if existing_kind.is_type() && incoming_kind.is_type() {
        return ConflictKind::IncompatibleSignature;
    }
    if family(existing_kind) != family(incoming_kind) {
        return ConflictKind::NamingCollision;
    }
    let existing_sig = comparable(&signature_of(existing_kind, strip_export(existing_body)));
    let incoming_sig = comparable(&signature_of(incoming_kind, strip_export(incoming_body)));
    if existing_sig != incoming_sig {
        ConflictKind::IncompatibleSignature
    } else {
        ConflictKind::DuplicateExport
    }
}

fn describe(kind: ConflictKind, name: &str, existing: SymbolKind, incoming: SymbolKind) -> String {
    match kind {
        ConflictKind::DuplicateExport => {
            format!("`{name}` is exported by both files with different implementations")
        }
        ConflictKind::IncompatibleSignature => {
            format!("`{name}` is declared with incompatible types in the two files")
        }
        ConflictKind::NamingCollision => format!(
            "`{name}` names a {} in the existing file and a {} in the candidate",
            kind_label(existing),
            kind_label(incoming)
        ),
    }
}

fn binding_index(module: &ModuleInfo) -> BTreeMap<String, Binding> {
    let mut index = BTreeMap::new();
    for import in &module.imports {
        for name in import.bindings() {
            index.insert(
                name.to_string(),
                Binding::Import {
                    specifier: import.specifier.clone(),
                },
            );
        }
    }
    for export in &module.exports {
        if export.reexport_from.is_some()
            || matches!(export.kind, SymbolKind::Alias | SymbolKind::DefaultExpression)
        {
            continue;
        }
        index.insert(
            export.binding().to_string(),
            Binding::Declaration {
                kind: export.kind,
                body: comparable(&export.body),
                chunk: export.chunk,
            },
        );
    }
    for local in &module.locals {
        index.insert(
            local.name.clone(),
            Binding::Declaration {
                kind: local.kind,
                body: comparable(&local.body),
                chunk: local.chunk,
            },
        );
    }
    index
}

/// Text that declares `symbol` in its own module, and the chunk holding it.
fn declaration_of(module: &ModuleInfo, symbol: &ExportedSymbol) -> (usize, String) {
    if symbol.kind == SymbolKind::Alias && symbol.reexport_from.is_none() {
        if let Some(local) = symbol.local_name.as_deref().and_then(|n| module.local(n)) {
            return (local.chunk, module.chunks[local.chunk].text());
        }
    }
    (symbol.chunk, module.chunks[symbol.chunk].text())
}

/// `export { … }` statement for one aliased export.
fn alias_statement(symbol: &ExportedSymbol) -> String {
    let local = symbol.local_name.as_deref().unwrap_or(&symbol.name);
    let item = if local == symbol.name {
        symbol.name.clone()
    } else {
        format!("{local} as {}", symbol.name)
    };
    match &symbol.reexport_from {
        Some(from) if symbol.name.starts_with("*:") => format!("export * from '{from}';"),
        Some(from) => format!("export {{ {item} }} from '{from}';"),
        None => format!("export {{ {item} }};"),
    }
}

fn quote_for(import: &ImportStatement) -> char {
    if import.text.contains(&format!("\"{}\"", import.specifier)) {
        '"'
    } else {
        '\''
    }
}

/// Import statement carrying only `needed` bindings of `import`.
fn render_import(import: &ImportStatement, needed: &BTreeSet<&str>) -> String {
    let q = quote_for(import);
    let spec = &import.specifier;
    if import.text.contains("require(") {
        return import.text.trim().to_string();
    }
    let keyword = if import.type_only { "import type" } else { "import" };
    let default = import
        .default_binding
        .as_deref()
        .filter(|d| needed.contains(d));
    let namespace = import.namespace.as_deref().filter(|n| needed.contains(n));
    let named: Vec<String> = import
        .named
        .iter()
        .filter(|n| needed.contains(n.local.as_str()))
        .map(|n| {
            let item = if n.imported == n.local {
                n.imported.clone()
            } else {
                format!("{} as {}", n.imported, n.local)
            };
            if n.type_only && !import.type_only {
                format!("type {item}")
            } else {
                item
            }
        })
        .collect();

    let mut clauses = Vec::new();
    if let Some(d) = default {
        clauses.push(d.to_string());
    }
    if let Some(ns) = namespace {
        clauses.push(format!("* as {ns}"));
    } else if !named.is_empty() {
        clauses.push(format!("{{ {} }}", named.join(", ")));
    }
    let mut statement = format!("{keyword} {} from {q}{spec}{q};", clauses.join(", "));
    if namespace.is_some() && !named.is_empty() {
        statement.push_str(&format!(
            "\n{keyword} {{ {} }} from {q}{spec}{q};",
            named.join(", ")
        ));
    }
    statement
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge `candidate` into `existing`.
pub fn merge_modules(
    existing: &str,
    candidate: &str,
    add_new: bool,
    resolution: Option<ConflictResolution>,
) -> MergePlan {
    let ex = parse_module(existing);
    let ca = parse_module(candidate);
    let ex_bindings = binding_index(&ex);
    let mut plan = MergePlan::default();
    let mut pending: Vec<PendingConflict> = Vec::new();
    // (candidate chunk order, name, text)
    let mut additions: Vec<(usize, String, String)> = Vec::new();

    for symbol in &ca.exports {
        let name = symbol.name.clone();
        let incoming_kind = effective_kind(&ca, symbol);
        let (_, incoming_text) = declaration_of(&ca, symbol);

        if let Some(current) = ex.export(&name) {
            let existing_kind = effective_kind(&ex, current);
            let (existing_chunk, existing_text) = declaration_of(&ex, current);
            let identical = match (&current.reexport_from, &symbol.reexport_from) {
                (Some(a), Some(b)) => a == b && current.local_name == symbol.local_name,
                (None, None) => comparable(&existing_text) == comparable(&incoming_text),
                _ => false,
            };
            if identical {
                plan.unchanged.push(name);
                continue;
            }
            let kind = if current.reexport_from.is_some() || symbol.reexport_from.is_some() {
                ConflictKind::DuplicateExport
            } else {
                classify_difference(existing_kind, &existing_text, incoming_kind, &incoming_text)
            };
            let replacement = if current.reexport_from.is_some() || symbol.reexport_from.is_some() {
                alias_statement(symbol)
            } else {
                incoming_text.clone()
            };
            pending.push(PendingConflict {
                conflict: Conflict {
                    kind,
                    description: describe(kind, &name, existing_kind, incoming_kind),
                    symbol: name,
                    existing: existing_text,
                    incoming: incoming_text,
                },
                replace: Some((existing_chunk, replacement)),
            });
            continue;
        }

        // Not exported yet; the declared name may still be taken.
        let direct = symbol.reexport_from.is_none() && symbol.kind != SymbolKind::Alias;
        if direct && symbol.kind != SymbolKind::DefaultExpression {
            if let Some(binding) = ex_bindings.get(symbol.binding()) {
                let (existing_kind, replace) = match binding {
                    Binding::Declaration { kind, chunk, .. } => {
                        (*kind, Some((*chunk, incoming_text.clone())))
                    }
                    Binding::Import { .. } => (SymbolKind::Alias, None),
                };
                let existing_text = match binding {
                    Binding::Declaration { chunk, .. } => ex.chunks[*chunk].text(),
                    Binding::Import { specifier } => format!("import … from '{specifier}'"),
                };
                pending.push(PendingConflict {
                    conflict: Conflict {
                        kind: ConflictKind::NamingCollision,
                        description: describe(
                            ConflictKind::NamingCollision,
                            symbol.binding(),
                            existing_kind,
                            incoming_kind,
                        ),
                        symbol: name,
                        existing: existing_text,
                        incoming: incoming_text,
                    },
                    replace,
                });
                continue;
            }
        }

        let text = if direct {
            ca.chunks[symbol.chunk].text()
        } else {
            alias_statement(symbol)
        };
        additions.push((symbol.chunk, name, text));
    }

    // Apply the operator's resolution, if any, to export-level conflicts.
    let mut replacements: BTreeMap<usize, String> = BTreeMap::new();
    let mut unresolved: Vec<Conflict> = Vec::new();
    for PendingConflict { conflict, replace } in pending {
        match (resolution, replace) {
            (Some(ConflictResolution::KeepExisting), _) => {
                plan.warnings.push(format!("kept existing `{}`", conflict.symbol));
            }
            (Some(ConflictResolution::TakeCandidate), Some((chunk, text))) => {
                plan.replaced.push(conflict.symbol.clone());
                replacements.insert(chunk, text);
            }
            _ => unresolved.push(conflict),
        }
    }

    if !add_new {
        plan.dropped = additions.drain(..).map(|(_, name, _)| name).collect();
    }

    // Carry local helpers referenced by anything we are about to write.
    let mut included: Vec<String> = additions
        .iter()
        .map(|(_, _, text)| text.clone())
        .chain(replacements.values().cloned())
        .collect();
    let mut helper_blocks: Vec<(usize, String, String)> = Vec::new();
    let mut visited: BTreeSet<String> = BTreeSet::new();
    loop {
        let mut changed = false;
        for local in &ca.locals {
            if visited.contains(&local.name)
                || !included.iter().any(|t| references_identifier(t, &local.name))
            {
                continue;
            }
            visited.insert(local.name.clone());
            let text = ca.chunks[local.chunk].text();
            match ex_bindings.get(&local.name) {
                None => {
                    included.push(text.clone());
                    helper_blocks.push((local.chunk, local.name.clone(), text));
                    changed = true;
                }
                Some(Binding::Declaration { body, .. }) if *body == comparable(&local.body) => {}
                Some(binding) => match (resolution, binding) {
                    (Some(ConflictResolution::KeepExisting), _) => {
                        plan.warnings.push(format!(
                            "helper `{}` uses the existing declaration",
                            local.name
                        ));
                    }
                    (
                        Some(ConflictResolution::TakeCandidate),
                        Binding::Declaration { chunk, .. },
                    ) => {
                        plan.replaced.push(local.name.clone());
                        replacements.insert(*chunk, text.clone());
                        included.push(text);
                        changed = true;
                    }
                    _ => {
                        let existing_kind = match binding {
                            Binding::Declaration { kind, .. } => *kind,
                            Binding::Import { .. } => SymbolKind::Alias,
                        };
                        unresolved.push(Conflict {
                            kind: ConflictKind::NamingCollision,
                            symbol: local.name.clone(),
                            description: describe(
                                ConflictKind::NamingCollision,
                                &local.name,
                                existing_kind,
                                local.kind,
                            ),
                            existing: match binding {
                                Binding::Declaration { chunk, .. } => ex.chunks[*chunk].text(),
                                Binding::Import { specifier } => {
                                    format!("import … from '{specifier}'")
                                }
                            },
                            incoming: text,
                        });
                    }
                },
            }
        }
        if !changed {
            break;
        }
    }

    // Imports the carried code needs.
    let mut import_lines: Vec<String> = Vec::new();
    let writing_anything = !included.is_empty();
    for import in &ca.imports {
        if import.is_side_effect() {
            let present = ex.imports.iter().any(|i| i.specifier == import.specifier);
            if writing_anything && !present {
                import_lines.push(import.text.trim().to_string());
            }
            continue;
        }
        let mut needed: BTreeSet<&str> = BTreeSet::new();
        for name in import.bindings() {
            if !included.iter().any(|t| references_identifier(t, name)) {
                continue;
            }
            match ex_bindings.get(name) {
                Some(Binding::Import { specifier }) if *specifier == import.specifier => {}
                None => {
                    needed.insert(name);
                }
                Some(binding) => {
                    if resolution == Some(ConflictResolution::KeepExisting) {
                        plan.warnings.push(format!(
                            "import `{name}` from '{}' clashes with an existing binding; existing kept",
                            import.specifier
                        ));
                        continue;
                    }
                    let existing = match binding {
                        Binding::Import { specifier } => format!("import … from '{specifier}'"),
                        Binding::Declaration { chunk, .. } => ex.chunks[*chunk].text(),
                    };
                    unresolved.push(Conflict {
                        kind: ConflictKind::NamingCollision,
                        symbol: name.to_string(),
                        description: format!(
                            "`{name}` is imported from '{}' by the candidate but already bound in the existing file",
                            import.specifier
                        ),
                        existing,
                        incoming: import.text.clone(),
                    });
                }
            }
        }
        if !needed.is_empty() {
            import_lines.push(render_import(import, &needed));
        }
    }

    if !unresolved.is_empty() {
        plan.output = existing.to_string();
        plan.conflicts = unresolved;
        plan.added.clear();
        plan.replaced.clear();
        return plan;
    }

    plan.added = additions.iter().map(|(_, name, _)| name.clone()).collect();
    plan.helpers = helper_blocks.iter().map(|(_, name, _)| name.clone()).collect();

    let mut blocks: Vec<(usize, String)> = additions
        .into_iter()
        .map(|(order, _, text)| (order, text))
        .chain(helper_blocks.into_iter().map(|(order, _, text)| (order, text)))
        .collect();
    blocks.sort_by_key(|(order, _)| *order);
    blocks.dedup();

    if blocks.is_empty() && replacements.is_empty() && import_lines.is_empty() {
        plan.output = existing.to_string();
        return plan;
    }
    plan.output = assemble(existing, &ex, &replacements, &import_lines, &blocks);
    plan
}

/// Terminate a dangling last line.
fn end_line(out: &mut String, eol: &str) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push_str(eol);
    }
}

fn push_lines<'a>(out: &mut String, lines: impl IntoIterator<Item = &'a str>, eol: &str) {
    end_line(out, eol);
    for line in lines {
        out.push_str(line);
        out.push_str(eol);
    }
}

fn ends_with_blank_line(out: &str) -> bool {
    out.is_empty() || out.ends_with("\n\n") || out.ends_with("\n\r\n")
}

/// Splice replacements, new imports and appended blocks into the existing
/// text. Untouched lines are copied with their original terminators; new
/// lines use the file's dominant line ending.
fn assemble(
    existing: &str,
    ex: &ModuleInfo,
    replacements: &BTreeMap<usize, String>,
    import_lines: &[String],
    blocks: &[(usize, String)],
) -> String {
    let eol = if existing.contains("\r\n") { "\r\n" } else { "\n" };
    let lines: Vec<&str> = existing.split_inclusive('\n').collect();
    // 0-based line index -> (last line index, replacement text)
    let replaced: BTreeMap<usize, (usize, &str)> = replacements
        .iter()
        .filter_map(|(chunk, text)| {
            let c = ex.chunks.get(*chunk)?;
            Some((c.start_line - 1, (c.end_line - 1, text.as_str())))
        })
        .collect();

    // Imports go after the last existing import, or after a leading comment block.
    let last_import = ex
        .imports
        .iter()
        .map(|i| ex.chunks[i.chunk].end_line)
        .max();
    let header_end = match ex.chunks.first() {
        Some(first) if first.comment_only => Some(first.end_line),
        _ => None,
    };
    let insert_after: Option<usize> = last_import.or(header_end);

    let import_block: Vec<&str> = import_lines.iter().flat_map(|l| l.lines()).collect();
    let mut imports_placed = import_block.is_empty();
    let mut out = String::with_capacity(existing.len() + 256);

    if insert_after.is_none() && !imports_placed {
        push_lines(&mut out, import_block.iter().copied(), eol);
        if !lines.is_empty() {
            out.push_str(eol);
        }
        imports_placed = true;
    }

    let mut i = 0;
    while i < lines.len() {
        if let Some((end, text)) = replaced.get(&i) {
            push_lines(&mut out, text.lines(), eol);
            i = end + 1;
        } else {
            out.push_str(lines[i]);
            i += 1;
        }
        if !imports_placed && insert_after == Some(i) {
            if last_import.is_none() {
                end_line(&mut out, eol);
                out.push_str(eol);
            }
            push_lines(&mut out, import_block.iter().copied(), eol);
            imports_placed = true;
        }
    }
    if !imports_placed {
        push_lines(&mut out, import_block.iter().copied(), eol);
    }

    for (_, text) in blocks {
        end_line(&mut out, eol);
        if !ends_with_blank_line(&out) {
            out.push_str(eol);
        }
        push_lines(&mut out, text.lines(), eol);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXISTING: &str = "\
import { format } from 'date-fns';

export function x() {
  return 1;
}

export function y(a: number) {
  return a + 1;
}
";

    #[test]
    fn test_identical_and_new_exports_merge() {
        let candidate = "\
export function y(a: number) {
  return a + 1;
}

export function z() {
  return 3;
}
";
        let plan = merge_modules(EXISTING, candidate, true, None);
        assert!(!plan.has_conflicts());
        assert_eq!(plan.unchanged, vec!["y"]);
        assert_eq!(plan.added, vec!["z"]);
        assert!(plan.output.starts_with(EXISTING.trim_end()));
        assert!(plan.output.contains("export function z()"));
        let merged = parse_module(&plan.output);
        let names: Vec<&str> = merged.exports.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_differing_body_is_a_conflict_and_nothing_is_written() {
        let candidate = "\
export function y(a: number) {
  return a + 2;
}

export function z() {
  return 3;
}
";
        let plan = merge_modules(EXISTING, candidate, true, None);
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].symbol, "y");
        assert_eq!(plan.conflicts[0].kind, ConflictKind::DuplicateExport);
        assert!(plan.conflicts[0].existing.contains("a + 1"));
        assert!(plan.conflicts[0].incoming.contains("a + 2"));
        assert_eq!(plan.output, EXISTING);
        assert!(plan.added.is_empty());
    }

    #[test]
    fn test_signature_and_kind_conflicts() {
        let sig = merge_modules(EXISTING, "export function y(a: string) {\n  return a;\n}\n", true, None);
        assert_eq!(sig.conflicts[0].kind, ConflictKind::IncompatibleSignature);

        let types = merge_modules(
            "export interface P { a: string }\n",
            "export interface P { a: number }\n",
            true,
            None,
        );
        assert_eq!(types.conflicts[0].kind, ConflictKind::IncompatibleSignature);

        let kinds = merge_modules(EXISTING, "export class x {}\n", true, None);
        assert_eq!(kinds.conflicts[0].kind, ConflictKind::NamingCollision);
    }

    #[test]
    fn test_new_export_colliding_with_local_declaration() {
        let existing = "const helper = 1;\nexport const a = helper;\n";
        let plan = merge_modules(existing, "export function helper() {}\n", true, None);
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].kind, ConflictKind::NamingCollision);
    }

    #[test]
    fn test_keep_existing_resolution_adds_the_rest() {
        let candidate = "export function y(a: number) {\n  return a + 2;\n}\n\nexport const w = 4;\n";
        let plan = merge_modules(EXISTING, candidate, true, Some(ConflictResolution::KeepExisting));
        assert!(!plan.has_conflicts());
        assert_eq!(plan.added, vec!["w"]);
        assert!(plan.output.contains("return a + 1;"));
        assert!(!plan.output.contains("return a + 2;"));
    }

    #[test]
    fn test_take_candidate_resolution_replaces_in_place() {
        let candidate = "export function y(a: number) {\n  return a + 2;\n}\n";
        let plan = merge_modules(EXISTING, candidate, true, Some(ConflictResolution::TakeCandidate));
        assert!(!plan.has_conflicts());
        assert_eq!(plan.replaced, vec!["y"]);
        assert!(plan.output.contains("return a + 2;"));
        assert!(!plan.output.contains("return a + 1;"));
        let x_pos = plan.output.find("function x").unwrap();
        let y_pos = plan.output.find("function y").unwrap();
        assert!(x_pos < y_pos);
    }

    #[test]
    fn test_helpers_and_imports_are_carried() {
        let candidate = "\
import { format, parseISO } from 'date-fns';
import { clamp } from '../utils/math';

function pad(n: number) {
  return String(clamp(n)).padStart(2, '0');
}

export function stamp(d: string) {
  return format(parseISO(d), 'yyyy') + pad(1);
}
";
        let plan = merge_modules(EXISTING, candidate, true, None);
        assert!(!plan.has_conflicts(), "{:?}", plan.conflicts);
        assert_eq!(plan.added, vec!["stamp"]);
        assert_eq!(plan.helpers, vec!["pad"]);
        let out = &plan.output;
        assert!(out.contains("import { parseISO } from 'date-fns';"));
        assert!(out.contains("import { clamp } from '../utils/math';"));
        assert_eq!(out.matches("import { format }").count(), 1);
        let imports_end = out.find("import { clamp }").unwrap();
        assert!(imports_end < out.find("export function x").unwrap());
        assert!(out.find("function pad").unwrap() < out.find("export function stamp").unwrap());
    }

    #[test]
    fn test_helper_name_clash_is_reported() {
        let existing = "function pad() { return ''; }\nexport const a = pad();\n";
        let candidate = "function pad(n: number) { return String(n); }\nexport const b = pad(2);\n";
        let plan = merge_modules(existing, candidate, true, None);
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].symbol, "pad");
        assert_eq!(plan.output, existing);
    }

    #[test]
    fn test_additions_disabled() {
        let plan = merge_modules(EXISTING, "export const q = 1;\n", false, None);
        assert_eq!(plan.dropped, vec!["q"]);
        assert_eq!(plan.output, EXISTING);
    }

    #[test]
    fn test_reexport_list_and_alias() {
        let existing = "export { a } from './a';\n";
        let candidate = "export { a } from './a';\nexport { b as bee } from './b';\n";
        let plan = merge_modules(existing, candidate, true, None);
        assert_eq!(plan.unchanged, vec!["a"]);
        assert_eq!(plan.added, vec!["bee"]);
        assert!(plan.output.ends_with("export { b as bee } from './b';\n"));
    }

    #[test]
    fn test_crlf_target_keeps_its_bytes_and_line_endings() {
        let existing = "import { a } from './a';\r\n\r\nexport function x() {\r\n  return a;\r\n}\r\n\r\n";
        let candidate = "import { b } from './b';\n\nexport function z() {\n  return b;\n}\n";
        let plan = merge_modules(existing, candidate, true, None);
        assert!(!plan.has_conflicts());
        assert_eq!(
            plan.output,
            "import { a } from './a';\r\nimport { b } from './b';\r\n\r\nexport function x() {\r\n  return a;\r\n}\r\n\r\nexport function z() {\r\n  return b;\r\n}\r\n"
        );
    }

    #[test]
    fn test_appending_keeps_existing_text_verbatim() {
        let existing = "export function x() {\r\n  return 1;\r\n}\r\n\r\n\r\n";
        let plan = merge_modules(existing, "export function z() {\n  return 3;\n}\n", true, None);
        assert!(plan.output.starts_with(existing));
        assert!(plan.output.ends_with("export function z() {\r\n  return 3;\r\n}\r\n"));
        assert!(!plan.output.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn test_merge_into_file_without_imports_keeps_header() {
        let existing = "// Shared helpers.\n\nexport const one = 1;\n";
        let candidate = "import { two as TWO } from './consts';\nexport const two = TWO;\n";
        let plan = merge_modules(existing, candidate, true, None);
        assert_eq!(
            plan.output,
            "// Shared helpers.\n\nimport { two as TWO } from './consts';\n\nexport const one = 1;\n\nexport const two = TWO;\n"
        );
    }
}
