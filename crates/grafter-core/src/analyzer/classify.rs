//! Category inference and target-location mapping.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::analyzer::parser::Dialect;
use crate::analyzer::symbols::ModuleInfo;
use crate::config::Config;
use crate::models::{Category, ComponentArea, SymbolKind};

static HOOK_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(use[A-Z0-9_-]|hook[-_])|\.hook$").unwrap());

static SERVICE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(service|api|client|repository|gateway)").unwrap());

static NETWORK_CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bfetch\(|\baxios\b|\bhttp\.|\brequest\(").unwrap());

static FEATURE_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|/)features/([A-Za-z0-9_-]+)").unwrap());

const LAYOUT_PREFIXES: &[&str] = &["Layout", "Header", "Footer", "Sidebar", "Navbar", "Nav", "Shell"];

/// File name without any extension (`api.d.ts` → `api`).
pub fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.split('.').next().unwrap_or(name)
}

fn stem_with_suffixes(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(dot) => &name[..dot],
        None => name,
    }
}

fn starts_uppercase(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

fn is_function_like(module: &ModuleInfo, name: &str) -> bool {
    module.export(name).is_some_and(|e| match e.kind {
        SymbolKind::Function => true,
        SymbolKind::Constant | SymbolKind::Variable => {
            e.body.contains("=>") || e.body.contains("function")
        }
        _ => false,
    })
}

/// Infer the category of a parsed candidate. First match wins.
pub fn classify(path: &str, dialect: Dialect, module: &ModuleInfo) -> Category {
    let stem = stem_with_suffixes(path);
    let exports: Vec<_> = module
        .exports
        .iter()
        .filter(|e| e.reexport_from.is_none())
        .collect();

    if dialect == Dialect::Script && HOOK_NAME_RE.is_match(stem) {
        return Category::Hook;
    }

    let capitalized_ui_export = exports.iter().any(|e| {
        let name = e.local_name.as_deref().unwrap_or(&e.name);
        starts_uppercase(name)
            && matches!(
                e.kind,
                SymbolKind::Function
                    | SymbolKind::Class
                    | SymbolKind::Constant
                    | SymbolKind::DefaultExpression
                    | SymbolKind::Alias
            )
    });
    if module.has_markup && capitalized_ui_export {
        return Category::Component {
            area: component_area(path, module),
        };
    }

    let networked_functions = exports
        .iter()
        .filter(|e| is_function_like(module, &e.name) && NETWORK_CALL_RE.is_match(&e.body))
        .count();
    if SERVICE_NAME_RE.is_match(stem) || networked_functions >= 2 {
        return Category::Service;
    }

    if path.ends_with(".d.ts") || (!exports.is_empty() && exports.iter().all(|e| e.kind.is_type())) {
        return Category::TypeDefinition;
    }

    let capitalized_default = exports
        .iter()
        .any(|e| e.name == "default" && e.local_name.as_deref().is_some_and(starts_uppercase));
    let pure = exports.iter().all(|e| {
        matches!(
            e.kind,
            SymbolKind::Function | SymbolKind::Constant | SymbolKind::Variable | SymbolKind::Alias
        ) || e.kind.is_type()
    });
    if !exports.is_empty() && pure && !module.has_markup && !capitalized_default {
        return Category::Utility;
    }

    let reason = if exports.is_empty() {
        "no exports found".to_string()
    } else if module.has_markup {
        "markup without a capitalized component export".to_string()
    } else {
        "exports do not match any known category".to_string()
    };
    Category::Unknown { reason }
}

/// Secondary heuristic choosing where a component lives.
pub fn component_area(path: &str, module: &ModuleInfo) -> ComponentArea {
    let hinted = module
        .imports
        .iter()
        .map(|i| i.specifier.as_str())
        .chain(std::iter::once(path))
        .find_map(|spec| FEATURE_IMPORT_RE.captures(spec).map(|c| c[1].to_string()));
    if let Some(name) = hinted {
        return ComponentArea::Feature { name };
    }

    let in_layout_dir = path
        .split('/')
        .rev()
        .skip(1)
        .any(|segment| segment == "layout" || segment == "layouts");
    let stem = file_stem(path);
    let layout_name = LAYOUT_PREFIXES.iter().any(|p| stem.starts_with(p));
    let layout_import = module
        .imports
        .iter()
        .any(|i| i.specifier.split('/').any(|s| s == "layout" || s == "layouts"));
    if in_layout_dir || layout_name || layout_import {
        return ComponentArea::Layout;
    }
    ComponentArea::Shared
}

/// Deterministic target directory for a category.
pub fn target_dir(category: &Category, config: &Config) -> PathBuf {
    let layout = &config.layout;
    let relative: PathBuf = match category {
        Category::Hook => layout.hooks.clone(),
        Category::Service => layout.services.clone(),
        Category::Utility => layout.utilities.clone(),
        Category::TypeDefinition => layout.types.clone(),
        Category::Component { area } => match area {
            ComponentArea::Layout => layout.layout.clone(),
            ComponentArea::Feature { name } => layout.features.join(name).join("components"),
            ComponentArea::Shared => layout.components.clone(),
        },
        Category::Unknown { .. } => layout.holding.clone(),
    };
    config.target_root.join(relative)
}

/// Full target path for a candidate.
pub fn target_path(path: &str, category: &Category, config: &Config) -> PathBuf {
    let file_name = Path::new(path)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| path.into());
    target_dir(category, config).join(file_name)
}
