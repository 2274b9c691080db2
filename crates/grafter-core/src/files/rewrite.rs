//! Relative import rewriting for files that move to a new location.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::analyzer::resolve::{first_existing_file, normalize_path, lookup_paths};

static SPECIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?P<prefix>\bfrom\s*|\bimport\s*\(?\s*|\brequire\s*\(\s*)(?P<open>['"])(?P<spec>[^'"\r\n]+)(?P<close>['"])"#,
    )
    .unwrap()
});

const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mts", "cts", "mjs", "cjs"];

/// Where every moving file goes, plus import aliases that are location
/// independent.
#[derive(Clone, Debug, Default)]
pub struct RelocationMap {
    /// Normalized old absolute path → new absolute path.
    pub moves: BTreeMap<PathBuf, PathBuf>,
    pub aliases: Vec<(String, PathBuf)>,
}

impl RelocationMap {
    pub fn insert(&mut self, from: &Path, to: &Path) {
        self.moves.insert(normalize_path(from), normalize_path(to));
    }

    fn relocated(&self, base: &Path) -> Option<&PathBuf> {
        let base = base.to_string_lossy().replace('\\', "/");
        lookup_paths(&base)
            .into_iter()
            .find_map(|path| self.moves.get(&normalize_path(Path::new(&path))))
    }

    fn alias_resolves(&self, specifier: &str) -> Option<bool> {
        let (prefix, dir) = self
            .aliases
            .iter()
            .find(|(prefix, _)| specifier.starts_with(prefix.as_str()))?;
        let base = normalize_path(&dir.join(&specifier[prefix.len()..]));
        let known_target = {
            let text = base.to_string_lossy().replace('\\', "/");
            lookup_paths(&text)
                .iter()
                .any(|p| self.moves.values().any(|t| t == Path::new(p)))
        };
        Some(known_target || first_existing_file(&base).is_some())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub content: String,
    /// `(old specifier, new specifier)` pairs that were changed.
    pub rewritten: Vec<(String, String)>,
    /// Specifiers left untouched because they could not be resolved.
    pub flagged: Vec<String>,
}

/// Relative path from directory `from` to `to`; both lexically normalized.
pub fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component> = from.components().collect();
    let to: Vec<Component> = to.components().collect();
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for component in &to[common..] {
        out.push(component.as_os_str());
    }
    out
}

fn extension_of(specifier: &str) -> Option<&str> {
    let last = specifier.rsplit('/').next()?;
    let ext = last.rsplit_once('.')?.1;
    SOURCE_EXTENSIONS.contains(&ext).then_some(ext)
}

/// Build a specifier for `target` seen from `from_dir`, following the
/// conventions of the `original` specifier.
fn styled_specifier(original: &str, from_dir: &Path, target: &Path) -> String {
    let mut rel = relative_path(from_dir, target)
        .to_string_lossy()
        .replace('\\', "/");

    let original_names_index = original
        .rsplit('/')
        .next()
        .is_some_and(|last| last == "index" || last.starts_with("index."));
    let target_is_index = target
        .file_stem()
        .is_some_and(|stem| stem == "index");
    if target_is_index && !original_names_index {
        rel = match rel.rsplit_once('/') {
            Some((dir, _)) => dir.to_string(),
            None => ".".to_string(),
        };
    } else {
        match extension_of(original) {
            None => {
                if let Some((stem, ext)) = rel.rsplit_once('.') {
                    if SOURCE_EXTENSIONS.contains(&ext) && !stem.ends_with('/') {
                        rel = stem.strip_suffix(".d").unwrap_or(stem).to_string();
                    }
                }
            }
            Some(original_ext) => {
                if let Some((stem, _)) = rel.rsplit_once('.') {
                    rel = format!("{stem}.{original_ext}");
                }
            }
        }
    }

    if rel == "." || rel == ".." {
        return format!("{rel}/");
    }
    if rel.starts_with("../") {
        rel
    } else {
        format!("./{rel}")
    }
}

/// Rewrite relative imports in `content` so they resolve from `new_location`.
///
/// Imports of files that move in the same session point at their new
/// location. Alias and absolute imports are never altered; ones that do not
/// resolve are flagged.
pub fn rewrite_import_paths(
    content: &str,
    old_location: &Path,
    new_location: &Path,
    relocations: &RelocationMap,
) -> RewriteOutcome {
    let old_dir = normalize_path(old_location.parent().unwrap_or(Path::new("")));
    let new_dir = normalize_path(new_location.parent().unwrap_or(Path::new("")));
    let mut rewritten = Vec::new();
    let mut flagged = Vec::new();

    let content = SPECIFIER_RE.replace_all(content, |caps: &Captures| {
        let spec = &caps["spec"];
        let keep = caps[0].to_string();

        if !spec.starts_with('.') {
            let unresolved = match relocations.alias_resolves(spec) {
                Some(resolves) => !resolves,
                None => spec.starts_with('/') && first_existing_file(Path::new(spec)).is_none(),
            };
            if unresolved {
                flagged.push(spec.to_string());
            }
            return keep;
        }

        let base = normalize_path(&old_dir.join(spec));
        let destination = relocations
            .relocated(&base)
            .cloned()
            .or_else(|| first_existing_file(&base).map(|p| normalize_path(&p)));

        let Some(destination) = destination else {
            if first_existing_file(&normalize_path(&new_dir.join(spec))).is_none() {
                flagged.push(spec.to_string());
            }
            return keep;
        };

        let new_spec = styled_specifier(spec, &new_dir, &destination);
        if new_spec == spec {
            return keep;
        }
        rewritten.push((spec.to_string(), new_spec.clone()));
        format!(
            "{}{}{}{}",
            &caps["prefix"], &caps["open"], new_spec, &caps["close"]
        )
    });

    RewriteOutcome {
        content: content.into_owned(),
        rewritten,
        flagged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moves(pairs: &[(&str, &str)]) -> RelocationMap {
        let mut map = RelocationMap {
            aliases: vec![("@/".to_string(), PathBuf::from("/proj/src"))],
            ..RelocationMap::default()
        };
        for (from, to) in pairs {
            map.insert(Path::new(from), Path::new(to));
        }
        map
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/a/hooks"), Path::new("/a/utils/u.ts")),
            PathBuf::from("../utils/u.ts")
        );
        assert_eq!(
            relative_path(Path::new("/a/hooks"), Path::new("/a/hooks/x.ts")),
            PathBuf::from("x.ts")
        );
    }

    #[test]
    fn test_rewrites_sibling_candidates_to_their_new_home() {
        let map = moves(&[
            ("/in/util-b.ts", "/proj/src/utils/util-b.ts"),
            ("/in/hook-a.ts", "/proj/src/hooks/hook-a.ts"),
        ]);
        let src = "import { double } from './util-b';\nimport \"./util-b\";\nconst u = require('./util-b');\n";
        let out = rewrite_import_paths(
            src,
            Path::new("/in/hook-a.ts"),
            Path::new("/proj/src/hooks/hook-a.ts"),
            &map,
        );
        assert_eq!(
            out.content,
            "import { double } from '../utils/util-b';\nimport \"../utils/util-b\";\nconst u = require('../utils/util-b');\n"
        );
        assert_eq!(out.rewritten.len(), 3);
        assert!(out.flagged.is_empty());
    }

    #[test]
    fn test_preserves_extension_convention() {
        let map = moves(&[("/in/lib/fmt.ts", "/proj/src/utils/fmt.ts")]);
        let out = rewrite_import_paths(
            "export { fmt } from './lib/fmt.js';\n",
            Path::new("/in/main.ts"),
            Path::new("/proj/src/utils/main.ts"),
            &map,
        );
        assert_eq!(out.content, "export { fmt } from './fmt.js';\n");
    }

    #[test]
    fn test_rewrites_project_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize_path(dir.path());
        std::fs::create_dir_all(root.join("lib")).unwrap();
        std::fs::create_dir_all(root.join("incoming")).unwrap();
        std::fs::write(root.join("lib/db.ts"), "export const db = 1;\n").unwrap();

        let out = rewrite_import_paths(
            "import { db } from '../lib/db';\n",
            &root.join("incoming/repo.ts"),
            &root.join("app/services/repo.ts"),
            &RelocationMap::default(),
        );
        assert_eq!(out.content, "import { db } from '../../lib/db';\n");
    }

    #[test]
    fn test_import_resolving_from_a_missing_new_directory_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let root = normalize_path(dir.path());
        std::fs::create_dir_all(root.join("src/lib")).unwrap();
        std::fs::write(root.join("src/lib/db.ts"), "export const db = 1;\n").unwrap();

        // src/services does not exist yet.
        let src = "import { db } from '../lib/db';\n";
        let out = rewrite_import_paths(
            src,
            &root.join("incoming/userService.ts"),
            &root.join("src/services/userService.ts"),
            &RelocationMap::default(),
        );
        assert_eq!(out.content, src);
        assert!(out.flagged.is_empty(), "{:?}", out.flagged);
    }

    #[test]
    fn test_unresolvable_and_alias_imports_are_left_and_flagged() {
        let map = moves(&[]);
        let src = "import a from './ghost';\nimport b from '@/nowhere/b';\nimport React from 'react';\n";
        let out = rewrite_import_paths(
            src,
            Path::new("/in/x.ts"),
            Path::new("/proj/src/utils/x.ts"),
            &map,
        );
        assert_eq!(out.content, src);
        assert_eq!(out.flagged, vec!["./ghost".to_string(), "@/nowhere/b".to_string()]);
    }

    #[test]
    fn test_alias_to_moving_candidate_is_not_flagged() {
        let map = moves(&[("/in/util-b.ts", "/proj/src/utils/util-b.ts")]);
        let src = "import { b } from '@/utils/util-b';\n";
        let out = rewrite_import_paths(src, Path::new("/in/x.ts"), Path::new("/proj/src/x.ts"), &map);
        assert_eq!(out.content, src);
        assert!(out.flagged.is_empty());
    }

    #[test]
    fn test_directory_index_import() {
        let map = moves(&[("/in/widgets/index.ts", "/proj/src/components/widgets/index.ts")]);
        let out = rewrite_import_paths(
            "import { W } from './widgets';\n",
            Path::new("/in/App.tsx"),
            Path::new("/proj/src/components/layout/App.tsx"),
            &map,
        );
        assert_eq!(out.content, "import { W } from '../widgets';\n");
    }
}
