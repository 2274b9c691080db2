//! Top-level statement splitting and import/export extraction.
//!
//! Sources are split into top-level chunks with a small lexer that tracks
//! bracket depth outside strings, comments and template literals. Each chunk
//! is then matched against a handful of regexes to recover import
//! statements, exported symbols and local declarations. The chunks keep their
//! original text so that merges can copy declarations verbatim.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::{ExportSummary, SymbolKind};

// ---------------------------------------------------------------------------
// Extracted types
// ---------------------------------------------------------------------------

/// A run of source lines forming one top-level statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceChunk {
    /// 1-based line of the first line (including leading comments).
    pub start_line: usize,
    pub end_line: usize,
    pub lines: Vec<String>,
    /// Number of leading comment lines attached to the statement.
    pub leading_comments: usize,
    pub comment_only: bool,
}

impl SourceChunk {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Statement text without its leading comments.
    pub fn code(&self) -> String {
        self.lines[self.leading_comments.min(self.lines.len())..].join("\n")
    }

    pub fn code_line(&self) -> usize {
        self.start_line + self.leading_comments
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportedName {
    pub imported: String,
    pub local: String,
    pub type_only: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportStatement {
    pub specifier: String,
    pub line: usize,
    pub text: String,
    pub type_only: bool,
    pub default_binding: Option<String>,
    pub namespace: Option<String>,
    pub named: Vec<ImportedName>,
    pub chunk: usize,
}

impl ImportStatement {
    /// Local names this statement introduces.
    pub fn bindings(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        if let Some(default) = &self.default_binding {
            names.push(default);
        }
        if let Some(ns) = &self.namespace {
            names.push(ns);
        }
        names.extend(self.named.iter().map(|n| n.local.as_str()));
        names
    }

    pub fn is_side_effect(&self) -> bool {
        self.default_binding.is_none() && self.namespace.is_none() && self.named.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportedSymbol {
    /// Exported name; `default` for default exports.
    pub name: String,
    /// Local binding when it differs from the exported name.
    pub local_name: Option<String>,
    pub kind: SymbolKind,
    pub line: usize,
    pub signature: String,
    /// Declaration text without leading comments.
    pub body: String,
    pub chunk: usize,
    pub reexport_from: Option<String>,
}

impl ExportedSymbol {
    pub fn binding(&self) -> &str {
        self.local_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalDeclaration {
    pub name: String,
    pub kind: SymbolKind,
    pub body: String,
    pub chunk: usize,
}

/// Everything extracted from one module.
#[derive(Clone, Debug, Default)]
pub struct ModuleInfo {
    pub chunks: Vec<SourceChunk>,
    pub imports: Vec<ImportStatement>,
    pub exports: Vec<ExportedSymbol>,
    pub locals: Vec<LocalDeclaration>,
    /// `require(...)` / `import(...)` specifiers with their line.
    pub dynamic_imports: Vec<(String, usize)>,
    pub has_markup: bool,
}

impl ModuleInfo {
    /// Every module specifier the file references, first occurrence wins.
    pub fn specifiers(&self) -> Vec<(String, usize)> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let reexports = self
            .exports
            .iter()
            .filter_map(|e| e.reexport_from.clone().map(|s| (s, e.line)));
        let all = self
            .imports
            .iter()
            .map(|i| (i.specifier.clone(), i.line))
            .chain(reexports)
            .chain(self.dynamic_imports.iter().cloned());
        for (spec, line) in all {
            if seen.insert(spec.clone()) {
                out.push((spec, line));
            }
        }
        out.sort_by_key(|(_, line)| *line);
        out
    }

    pub fn export_summaries(&self) -> Vec<ExportSummary> {
        self.exports
            .iter()
            .map(|e| ExportSummary {
                name: e.name.clone(),
                kind: e.kind,
                line: e.line,
            })
            .collect()
    }

    pub fn export(&self, name: &str) -> Option<&ExportedSymbol> {
        self.exports.iter().find(|e| e.name == name)
    }

    pub fn local(&self, name: &str) -> Option<&LocalDeclaration> {
        self.locals.iter().find(|l| l.name == name)
    }
}

// ---------------------------------------------------------------------------
// Compiled regex patterns
// ---------------------------------------------------------------------------

static IMPORT_FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^import\s+(type\s+)?(.+?)\s*from\s*['"]([^'"]+)['"]"#).unwrap()
});

static IMPORT_BARE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^import\s*['"]([^'"]+)['"]"#).unwrap());

static IMPORT_EQUALS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^import\s+([A-Za-z_$][\w$]*)\s*=\s*require\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap()
});

static EXPORT_FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^export\s+(type\s+)?(\*(?:\s+as\s+([A-Za-z_$][\w$]*))?|\{([^}]*)\})\s*from\s*['"]([^'"]+)['"]"#,
    )
    .unwrap()
});

static EXPORT_LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^export\s+(type\s+)?\{([^}]*)\}").unwrap());

static EXPORT_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^export\s+(default\s+)?(?:declare\s+)?(?:async\s+)?(function\b\s*\*?|abstract\s+class\b|class\b|interface\b|type\b|const\s+enum\b|enum\b|const\b|let\b|var\b|namespace\b|module\b)\s*([A-Za-z_$][\w$]*)?",
    )
    .unwrap()
});

static EXPORT_DEFAULT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^export\s+default\s+(.+)$").unwrap());

static LOCAL_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:declare\s+)?(?:async\s+)?(function\b\s*\*?|abstract\s+class\b|class\b|interface\b|type\b|const\s+enum\b|enum\b|const\b|let\b|var\b|namespace\b)\s*([A-Za-z_$][\w$]*)",
    )
    .unwrap()
});

static DECORATORS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:@[\w$.]+(?:\([^)]*\))?\s*)+").unwrap());

static REQUIRE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\brequire\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());

static DYNAMIC_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bimport\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());

static MARKUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</[A-Za-z][\w.]*\s*>|<[A-Za-z][\w.]*(?:\s[^<>]*)?/>|<>|</>").unwrap()
});

static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_$][\w$]*$").unwrap());

// ---------------------------------------------------------------------------
// Chunking
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Code,
    Template,
    BlockComment,
}

/// Tracks bracket depth across lines, ignoring strings and comments.
struct DepthScanner {
    modes: Vec<Mode>,
    depth: i32,
    template_depths: Vec<i32>,
}

impl DepthScanner {
    fn new() -> Self {
        Self {
            modes: vec![Mode::Code],
            depth: 0,
            template_depths: Vec::new(),
        }
    }

    fn at_top_level(&self) -> bool {
        self.depth <= 0 && self.modes.len() == 1
    }

    fn feed_line(&mut self, line: &str) {
        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();
            match self.modes.last().copied().unwrap_or(Mode::Code) {
                Mode::BlockComment => {
                    if c == '*' && next == Some('/') {
                        self.modes.pop();
                        i += 2;
                        continue;
                    }
                }
                Mode::Template => {
                    if c == '\\' {
                        i += 2;
                        continue;
                    }
                    if c == '`' {
                        self.modes.pop();
                    } else if c == '$' && next == Some('{') {
                        self.template_depths.push(self.depth);
                        self.depth += 1;
                        self.modes.push(Mode::Code);
                        i += 2;
                        continue;
                    }
                }
                Mode::Code => match c {
                    '/' if next == Some('/') => break,
                    '/' if next == Some('*') => {
                        self.modes.push(Mode::BlockComment);
                        i += 2;
                        continue;
                    }
                    '\'' | '"' => {
                        i = skip_string(&chars, i + 1, c);
                        continue;
                    }
                    '`' => self.modes.push(Mode::Template),
                    '{' | '(' | '[' => self.depth += 1,
                    '}' => {
                        self.depth -= 1;
                        if self.template_depths.last() == Some(&self.depth) {
                            self.template_depths.pop();
                            self.modes.pop();
                        }
                    }
                    ')' | ']' => self.depth -= 1,
                    _ => {}
                },
            }
            i += 1;
        }
        if self.depth < 0 && self.modes.len() == 1 {
            self.depth = 0;
        }
    }
}

/// Index just past the closing quote; unterminated strings end at end of line.
fn skip_string(chars: &[char], mut i: usize, quote: char) -> usize {
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

fn is_comment_start(trimmed: &str) -> bool {
    trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*')
}

fn starts_new_statement(line: &str) -> bool {
    match line.chars().next() {
        None => false,
        Some(c) if c.is_whitespace() => false,
        Some(c) => !matches!(
            c,
            '.' | ')' | ']' | '}' | '?' | ':' | '|' | '&' | ',' | '=' | '+' | '-' | '*' | '>'
        ),
    }
}

struct ChunkBuilder {
    start_line: usize,
    lines: Vec<String>,
    leading_comments: usize,
    comment_only: bool,
    /// Only decorators so far; the decorated declaration joins this chunk.
    decorators_only: bool,
}

impl ChunkBuilder {
    fn new(start_line: usize, comment_only: bool) -> Self {
        Self {
            start_line,
            lines: Vec::new(),
            leading_comments: 0,
            comment_only,
            decorators_only: false,
        }
    }

    fn finish(self) -> SourceChunk {
        let leading_comments = if self.comment_only {
            self.lines.len()
        } else {
            self.leading_comments
        };
        SourceChunk {
            start_line: self.start_line,
            end_line: self.start_line + self.lines.len().saturating_sub(1),
            lines: self.lines,
            leading_comments,
            comment_only: self.comment_only,
        }
    }
}

/// Split a module into top-level statements.
pub fn split_chunks(source: &str) -> Vec<SourceChunk> {
    let mut chunks = Vec::new();
    let mut scanner = DepthScanner::new();
    let mut current: Option<ChunkBuilder> = None;

    for (idx, line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim();

        if scanner.at_top_level() {
            if trimmed.is_empty() {
                if let Some(done) = current.take() {
                    chunks.push(done.finish());
                }
                continue;
            }
            if is_comment_start(trimmed) {
                if !current.as_ref().is_some_and(|c| c.comment_only) {
                    if let Some(done) = current.take() {
                        chunks.push(done.finish());
                    }
                    current = Some(ChunkBuilder::new(line_no, true));
                }
            } else if starts_new_statement(line) || current.is_none() {
                let decorator = trimmed.starts_with('@');
                match current.as_mut() {
                    Some(builder) if builder.comment_only => {
                        builder.comment_only = false;
                        builder.leading_comments = builder.lines.len();
                        builder.decorators_only = decorator;
                    }
                    Some(builder) if builder.decorators_only => {
                        builder.decorators_only = decorator;
                    }
                    _ => {
                        if let Some(done) = current.take() {
                            chunks.push(done.finish());
                        }
                        let mut builder = ChunkBuilder::new(line_no, false);
                        builder.decorators_only = decorator;
                        current = Some(builder);
                    }
                }
            }
        } else if current.is_none() {
            current = Some(ChunkBuilder::new(line_no, false));
        }

        if let Some(builder) = current.as_mut() {
            builder.lines.push(line.to_string());
        }
        scanner.feed_line(line);
    }

    if let Some(done) = current.take() {
        chunks.push(done.finish());
    }
    chunks
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Collapse whitespace runs and trim trailing semicolons for comparison.
pub fn normalize_code(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_end_matches(';').trim_end().to_string()
}

fn kind_from_keyword(keyword: &str) -> SymbolKind {
    let keyword = keyword.split_whitespace().collect::<Vec<_>>().join(" ");
    match keyword.trim_end_matches('*').trim() {
        "function" => SymbolKind::Function,
        "class" | "abstract class" => SymbolKind::Class,
        "interface" => SymbolKind::Interface,
        "type" => SymbolKind::TypeAlias,
        "enum" | "const enum" => SymbolKind::Enum,
        "const" => SymbolKind::Constant,
        "let" | "var" => SymbolKind::Variable,
        "namespace" | "module" => SymbolKind::Namespace,
        _ => SymbolKind::Variable,
    }
}

/// Byte index of the first occurrence of `pat` outside any bracket nesting.
fn find_top_level(text: &str, pat: &str, after: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if matches!(b, b'\'' | b'"' | b'`') {
            i += 1;
            while i < bytes.len() && bytes[i] != b {
                if bytes[i] == b'\\' {
                    i += 1;
                }
                i += 1;
            }
            i += 1;
            continue;
        }
        if depth == 0 && i >= after && bytes[i..].starts_with(pat.as_bytes()) {
            return Some(i);
        }
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            _ => {}
        }
        i += 1;
    }
    None
}

/// First `=` that is an assignment (not `==`, `=>`, `<=`, `>=`, `!=`).
fn find_assignment(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut from = 0;
    while let Some(pos) = find_top_level(text, "=", from) {
        let prev = if pos > 0 { bytes[pos - 1] } else { b' ' };
        let next = bytes.get(pos + 1).copied().unwrap_or(b' ');
        if next != b'=' && next != b'>' && !matches!(prev, b'=' | b'!' | b'<' | b'>') {
            return Some(pos);
        }
        from = pos + 1;
    }
    None
}

/// Declared shape of a symbol used to tell signature changes from body changes.
pub fn signature_of(kind: SymbolKind, code: &str) -> String {
    let text = normalize_code(code);
    match kind {
        SymbolKind::Function | SymbolKind::Class => {
            let params_end = if kind == SymbolKind::Function {
                find_top_level(&text, "(", 0).unwrap_or(0)
            } else {
                0
            };
            // The opening parenthesis itself is not at depth 0 after it is consumed,
            // so search for the body brace from just past the parameter list.
            let body_start = find_top_level(&text, "{", params_end.saturating_add(1));
            match body_start {
                Some(pos) => text[..pos].trim().to_string(),
                None => text,
            }
        }
        SymbolKind::Constant | SymbolKind::Variable => match find_assignment(&text) {
            Some(eq) => {
                let head = text[..eq].trim();
                let value = text[eq + 1..].trim();
                match find_top_level(value, "=>", 0) {
                    Some(arrow) => format!("{head} = {}", value[..arrow].trim()),
                    None => head.to_string(),
                }
            }
            None => text,
        },
        _ => text,
    }
}

fn parse_named_list(list: &str, statement_type_only: bool) -> Vec<ImportedName> {
    list.split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return None;
            }
            let (type_only, entry) = match entry.strip_prefix("type ") {
                Some(rest) => (true, rest.trim()),
                None => (statement_type_only, entry),
            };
            let mut parts = entry.split(" as ").map(str::trim);
            let imported = parts.next()?.to_string();
            let local = parts.next().map(str::to_string).unwrap_or_else(|| imported.clone());
            Some(ImportedName {
                imported,
                local,
                type_only,
            })
        })
        .collect()
}

fn parse_import(code: &str, line: usize, text: String, chunk: usize) -> Option<ImportStatement> {
    let flat = normalize_code(code);
    if let Some(caps) = IMPORT_FROM_RE.captures(&flat) {
        let type_only = caps.get(1).is_some();
        let clause = caps[2].trim();
        let specifier = caps[3].to_string();
        let mut default_binding = None;
        let mut namespace = None;
        let mut named = Vec::new();

        let (head, braces) = match clause.find('{') {
            Some(open) => {
                let close = clause.rfind('}').unwrap_or(clause.len());
                (&clause[..open], Some(&clause[open + 1..close.max(open + 1)]))
            }
            None => (clause, None),
        };
        for part in head.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if let Some(ns) = part.strip_prefix("* as ") {
                namespace = Some(ns.trim().to_string());
            } else if IDENT_RE.is_match(part) {
                default_binding = Some(part.to_string());
            }
        }
        if let Some(list) = braces {
            named = parse_named_list(list, type_only);
        }
        return Some(ImportStatement {
            specifier,
            line,
            text,
            type_only,
            default_binding,
            namespace,
            named,
            chunk,
        });
    }
    if let Some(caps) = IMPORT_EQUALS_RE.captures(&flat) {
        return Some(ImportStatement {
            specifier: caps[2].to_string(),
            line,
            text,
            type_only: false,
            default_binding: Some(caps[1].to_string()),
            namespace: None,
            named: Vec::new(),
            chunk,
        });
    }
    if let Some(caps) = IMPORT_BARE_RE.captures(&flat) {
        return Some(ImportStatement {
            specifier: caps[1].to_string(),
            line,
            text,
            type_only: false,
            default_binding: None,
            namespace: None,
            named: Vec::new(),
            chunk,
        });
    }
    None
}

fn parse_export(code: &str, line: usize, chunk: usize) -> Vec<ExportedSymbol> {
    let flat = normalize_code(code);
    let flat = DECORATORS_RE.replace(&flat, "").to_string();

    if let Some(caps) = EXPORT_FROM_RE.captures(&flat) {
        let specifier = caps[5].to_string();
        if let Some(list) = caps.get(4) {
            return parse_named_list(list.as_str(), caps.get(1).is_some())
                .into_iter()
                .map(|n| ExportedSymbol {
                    name: n.local.clone(),
                    local_name: (n.imported != n.local).then(|| n.imported.clone()),
                    kind: SymbolKind::Alias,
                    line,
                    signature: flat.clone(),
                    body: code.to_string(),
                    chunk,
                    reexport_from: Some(specifier.clone()),
                })
                .collect();
        }
        let name = caps
            .get(3)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| format!("*:{specifier}"));
        return vec![ExportedSymbol {
            name,
            local_name: None,
            kind: SymbolKind::Alias,
            line,
            signature: flat.clone(),
            body: code.to_string(),
            chunk,
            reexport_from: Some(specifier),
        }];
    }

    if let Some(caps) = EXPORT_LIST_RE.captures(&flat) {
        return parse_named_list(&caps[2], caps.get(1).is_some())
            .into_iter()
            .map(|n| ExportedSymbol {
                name: n.local.clone(),
                local_name: Some(n.imported.clone()),
                kind: SymbolKind::Alias,
                line,
                signature: flat.clone(),
                body: code.to_string(),
                chunk,
                reexport_from: None,
            })
            .collect();
    }

    if let Some(caps) = EXPORT_DECL_RE.captures(&flat) {
        let is_default = caps.get(1).is_some();
        let kind = kind_from_keyword(&caps[2]);
        let declared = caps
            .get(3)
            .map(|m| m.as_str().to_string())
            .filter(|name| name != "extends" && name != "implements");
        let (name, local_name) = match (is_default, declared) {
            (true, local) => ("default".to_string(), local),
            (false, Some(name)) => (name, None),
            (false, None) => return Vec::new(),
        };
        return vec![ExportedSymbol {
            name,
            local_name,
            kind,
            line,
            signature: signature_of(kind, code),
            body: code.to_string(),
            chunk,
            reexport_from: None,
        }];
    }

    if let Some(caps) = EXPORT_DEFAULT_RE.captures(&flat) {
        let expr = caps[1].trim().trim_end_matches(';').trim();
        let local_name = IDENT_RE.is_match(expr).then(|| expr.to_string());
        return vec![ExportedSymbol {
            name: "default".to_string(),
            local_name,
            kind: SymbolKind::DefaultExpression,
            line,
            signature: flat.clone(),
            body: code.to_string(),
            chunk,
            reexport_from: None,
        }];
    }

    Vec::new()
}

fn line_of_offset(source: &str, offset: usize) -> usize {
    source[..offset.min(source.len())].matches('\n').count() + 1
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Extract imports, exports and local declarations from a module.
pub fn parse_module(source: &str) -> ModuleInfo {
    let chunks = split_chunks(source);
    let mut info = ModuleInfo {
        has_markup: MARKUP_RE.is_match(source),
        ..ModuleInfo::default()
    };
    let mut import_chunks = BTreeSet::new();

    for (index, chunk) in chunks.iter().enumerate() {
        if chunk.comment_only {
            continue;
        }
        let code = chunk.code();
        let first = code.trim_start();
        let line = chunk.code_line();

        if first.starts_with("import") && !first.starts_with("import(") {
            if let Some(import) = parse_import(&code, line, chunk.text(), index) {
                info.imports.push(import);
                import_chunks.insert(index);
                continue;
            }
        }

        if first.starts_with("export") || first.starts_with('@') {
            let exports = parse_export(&code, line, index);
            if !exports.is_empty() {
                info.exports.extend(exports);
                continue;
            }
        }

        let flat = normalize_code(&code);
        let flat = DECORATORS_RE.replace(&flat, "");
        if let Some(caps) = LOCAL_DECL_RE.captures(&flat) {
            info.locals.push(LocalDeclaration {
                name: caps[2].to_string(),
                kind: kind_from_keyword(&caps[1]),
                body: code.clone(),
                chunk: index,
            });
        }
    }

    // Re-exported local bindings point at their local declaration body.
    let locals = info.locals.clone();
    for export in info.exports.iter_mut() {
        if export.kind == SymbolKind::Alias && export.reexport_from.is_none() {
            if let Some(local) = locals.iter().find(|l| Some(&l.name) == export.local_name.as_ref()) {
                export.body = local.body.clone();
                export.signature = signature_of(local.kind, &local.body);
            }
        }
    }

    for re in [&*REQUIRE_RE, &*DYNAMIC_IMPORT_RE] {
        for caps in re.captures_iter(source) {
            let line = line_of_offset(source, caps.get(0).map(|m| m.start()).unwrap_or(0));
            let in_import_chunk = import_chunks
                .iter()
                .any(|&i| (chunks[i].start_line..=chunks[i].end_line).contains(&line));
            if !in_import_chunk {
                info.dynamic_imports.push((caps[1].to_string(), line));
            }
        }
    }

    info.chunks = chunks;
    info
}

/// Whether `name` appears as an identifier in `text`.
pub fn references_identifier(text: &str, name: &str) -> bool {
    let pattern = format!(r"(^|[^\w$]){}($|[^\w$])", regex::escape(name));
    Regex::new(&pattern)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
