//! Import specifier resolution against sibling candidates, the project tree
//! and the package manifest.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use crate::analyzer::classify::file_stem;
use crate::models::{Dependency, DependencyTarget};

/// Suffixes tried after a bare module path, in order.
const LOOKUP_SUFFIXES: &[&str] = &[
    "",
    ".ts",
    ".tsx",
    ".js",
    ".jsx",
    ".mts",
    ".cts",
    ".d.ts",
    "/index.ts",
    "/index.tsx",
    "/index.js",
    "/index.jsx",
];

const NODE_BUILTINS: &[&str] = &[
    "assert",
    "buffer",
    "child_process",
    "crypto",
    "dns",
    "events",
    "fs",
    "http",
    "https",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "querystring",
    "readline",
    "stream",
    "timers",
    "tls",
    "url",
    "util",
    "worker_threads",
    "zlib",
];

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Collapse `.`/`..` segments in a `/`-separated relative path.
pub fn normalize_posix_path(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            _ => stack.push(part),
        }
    }
    stack.join("/")
}

/// Lexically normalize a file-system path without touching the disk.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if out.file_name().is_some() {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Candidate file paths a module path may refer to.
pub fn lookup_paths(base: &str) -> Vec<String> {
    let mut paths: Vec<String> = LOOKUP_SUFFIXES.iter().map(|s| format!("{base}{s}")).collect();
    // ESM-style `./x.js` specifiers that point at TypeScript sources.
    if let Some(stem) = base.strip_suffix(".js") {
        paths.push(format!("{stem}.ts"));
        paths.push(format!("{stem}.tsx"));
    }
    paths
}

/// First lookup path of `base` that exists as a regular file.
pub fn first_existing_file(base: &Path) -> Option<PathBuf> {
    let base = base.to_string_lossy().replace('\\', "/");
    lookup_paths(&base)
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

/// Package name of a bare specifier (`@scope/pkg/sub` → `@scope/pkg`).
pub fn package_name(specifier: &str) -> String {
    let mut parts = specifier.split('/');
    match (parts.next(), parts.next()) {
        (Some(scope), Some(name)) if scope.starts_with('@') => format!("{scope}/{name}"),
        (Some(name), _) => name.to_string(),
        _ => specifier.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Package manifest
// ---------------------------------------------------------------------------

/// Declared dependencies of the nearest `package.json`.
#[derive(Clone, Debug, Default)]
pub struct PackageManifest {
    pub root: PathBuf,
    pub dependencies: BTreeSet<String>,
}

impl PackageManifest {
    /// Search upward from `start` for a `package.json`.
    pub fn discover(start: &Path) -> Option<Self> {
        let mut dir = Some(start);
        while let Some(current) = dir {
            let candidate = current.join("package.json");
            if candidate.is_file() {
                return Self::load(&candidate);
            }
            dir = current.parent();
        }
        None
    }

    fn load(path: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        let json: serde_json::Value = serde_json::from_str(&text).ok()?;
        let mut dependencies = BTreeSet::new();
        for table in ["dependencies", "devDependencies", "peerDependencies", "optionalDependencies"] {
            if let Some(map) = json.get(table).and_then(|v| v.as_object()) {
                dependencies.extend(map.keys().cloned());
            }
        }
        Some(Self {
            root: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            dependencies,
        })
    }

    pub fn is_installed(&self, package: &str) -> bool {
        self.root.join("node_modules").join(package).exists()
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Everything a specifier can resolve against.
#[derive(Clone, Debug, Default)]
pub struct ResolveContext {
    pub source_dir: PathBuf,
    /// Candidate source path → planned target (when its analysis succeeded).
    pub candidates: BTreeMap<String, Option<PathBuf>>,
    /// Source path → target of candidates completed in earlier runs.
    pub integrated: BTreeMap<String, PathBuf>,
    pub aliases: Vec<(String, PathBuf)>,
    pub manifest: Option<PackageManifest>,
}

impl ResolveContext {
    fn candidate_for(&self, base: &str) -> Option<String> {
        lookup_paths(base)
            .into_iter()
            .map(|p| normalize_posix_path(&p))
            .find(|p| self.candidates.contains_key(p))
    }

    fn integrated_for(&self, base: &str) -> Option<PathBuf> {
        lookup_paths(base)
            .into_iter()
            .map(|p| normalize_posix_path(&p))
            .find_map(|p| self.integrated.get(&p).cloned())
    }

    /// Candidate whose planned target is addressed by `base` (an absolute module path).
    fn candidate_by_target(&self, base: &Path) -> Option<String> {
        let base = normalize_path(base).to_string_lossy().replace('\\', "/");
        let paths: BTreeSet<String> = lookup_paths(&base).into_iter().collect();
        self.candidates.iter().find_map(|(rel, target)| {
            let target = target.as_ref()?;
            let target = normalize_path(target).to_string_lossy().replace('\\', "/");
            paths.contains(&target).then(|| rel.clone())
        })
    }

    /// Last-resort match on the file stem. Alphabetically first wins.
    fn candidate_by_stem(&self, specifier: &str, from: &str) -> (Option<String>, Option<String>) {
        let wanted = file_stem(specifier);
        if wanted.is_empty() || wanted == "index" {
            return (None, None);
        }
        let matches: Vec<&String> = self
            .candidates
            .keys()
            .filter(|rel| rel.as_str() != from && file_stem(rel) == wanted)
            .collect();
        match matches.as_slice() {
            [] => (None, None),
            [only] => (
                Some((*only).clone()),
                Some(format!("'{specifier}' matched candidate {only} by file name only")),
            ),
            [first, ..] => (
                Some((*first).clone()),
                Some(format!(
                    "'{specifier}' matches {} candidates by file name; chose {first}",
                    matches.len()
                )),
            ),
        }
    }
}

/// Resolve one specifier of candidate `from` (source-relative path) whose
/// planned target directory is `target_dir`. Returns the dependency and an
/// optional warning.
pub fn resolve_specifier(
    ctx: &ResolveContext,
    from: &str,
    target_dir: &Path,
    specifier: &str,
    line: usize,
) -> (Dependency, Option<String>) {
    let (target, warning) = resolve_target(ctx, from, target_dir, specifier);
    (
        Dependency {
            specifier: specifier.to_string(),
            line,
            target,
        },
        warning,
    )
}

fn resolve_target(
    ctx: &ResolveContext,
    from: &str,
    target_dir: &Path,
    specifier: &str,
) -> (DependencyTarget, Option<String>) {
    if specifier.starts_with('.') {
        return resolve_relative(ctx, from, target_dir, specifier);
    }

    for (prefix, dir) in &ctx.aliases {
        if let Some(rest) = specifier.strip_prefix(prefix.as_str()) {
            let base = dir.join(rest);
            if let Some(path) = ctx.candidate_by_target(&base) {
                return (DependencyTarget::Candidate { path }, None);
            }
            if let Some(path) = first_existing_file(&base) {
                return (DependencyTarget::Project { path }, None);
            }
            return match ctx.candidate_by_stem(specifier, from) {
                (Some(path), warning) => (DependencyTarget::Candidate { path }, warning),
                _ => (
                    DependencyTarget::Missing {
                        looks_like_package: false,
                    },
                    None,
                ),
            };
        }
    }

    if specifier.starts_with('/') {
        return match first_existing_file(Path::new(specifier)) {
            Some(path) => (DependencyTarget::Project { path }, None),
            None => (
                DependencyTarget::Missing {
                    looks_like_package: false,
                },
                None,
            ),
        };
    }

    resolve_package(ctx, specifier)
}

fn resolve_relative(
    ctx: &ResolveContext,
    from: &str,
    target_dir: &Path,
    specifier: &str,
) -> (DependencyTarget, Option<String>) {
    let from_dir = Path::new(from).parent().unwrap_or(Path::new(""));
    let joined = from_dir.join(specifier).to_string_lossy().replace('\\', "/");
    // `..` above the source root cannot name a sibling candidate.
    let escapes_root = joined.split('/').filter(|s| *s == "..").count()
        > from_dir.components().count();

    if !escapes_root {
        let base = normalize_posix_path(&joined);
        if let Some(path) = ctx.candidate_for(&base) {
            return (DependencyTarget::Candidate { path }, None);
        }
        if let Some(target) = ctx.integrated_for(&base) {
            return (DependencyTarget::Integrated { target }, None);
        }
    }

    let on_disk = normalize_path(&ctx.source_dir.join(from_dir).join(specifier));
    if let Some(path) = first_existing_file(&on_disk) {
        return (
            DependencyTarget::Project {
                path: normalize_path(&path),
            },
            None,
        );
    }
    if let Some(path) = first_existing_file(&normalize_path(&target_dir.join(specifier))) {
        return (
            DependencyTarget::Project {
                path: normalize_path(&path),
            },
            None,
        );
    }

    match ctx.candidate_by_stem(specifier, from) {
        (Some(path), warning) => (DependencyTarget::Candidate { path }, warning),
        _ => (
            DependencyTarget::Missing {
                looks_like_package: false,
            },
            None,
        ),
    }
}

fn resolve_package(ctx: &ResolveContext, specifier: &str) -> (DependencyTarget, Option<String>) {
    if let Some(builtin) = specifier.strip_prefix("node:") {
        return (
            DependencyTarget::External {
                package: builtin.to_string(),
                installed: true,
            },
            None,
        );
    }
    let package = package_name(specifier);
    if NODE_BUILTINS.contains(&package.as_str()) {
        return (
            DependencyTarget::External {
                package,
                installed: true,
            },
            None,
        );
    }
    match &ctx.manifest {
        Some(manifest) => {
            let declared = manifest.dependencies.contains(&package);
            let installed = manifest.is_installed(&package);
            if declared || installed {
                (DependencyTarget::External { package, installed }, None)
            } else {
                (
                    DependencyTarget::Missing {
                        looks_like_package: true,
                    },
                    None,
                )
            }
        }
        None => {
            let warning = format!("no package.json found; assuming '{package}' is available");
            (
                DependencyTarget::External {
                    package,
                    installed: false,
                },
                Some(warning),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(candidates: &[(&str, &str)]) -> ResolveContext {
        ResolveContext {
            source_dir: PathBuf::from("/nonexistent/incoming"),
            candidates: candidates
                .iter()
                .map(|(rel, target)| (rel.to_string(), Some(PathBuf::from(target))))
                .collect(),
            aliases: vec![("@/".to_string(), PathBuf::from("/nonexistent/app"))],
            ..ResolveContext::default()
        }
    }

    #[test]
    fn test_normalize_posix_path() {
        assert_eq!(normalize_posix_path("a/./b/../c.ts"), "a/c.ts");
        assert_eq!(normalize_posix_path("./x"), "x");
    }

    #[test]
    fn test_normalize_path_keeps_leading_parents() {
        assert_eq!(normalize_path(Path::new("../a/./b/../c")), PathBuf::from("../a/c"));
        assert_eq!(normalize_path(Path::new("/r/a/../b")), PathBuf::from("/r/b"));
    }

    #[test]
    fn test_package_name() {
        assert_eq!(package_name("react"), "react");
        assert_eq!(package_name("lodash/fp"), "lodash");
        assert_eq!(package_name("@tanstack/react-query/devtools"), "@tanstack/react-query");
    }

    #[test]
    fn test_relative_prefers_candidate() {
        let ctx = ctx_with(&[
            ("util-b.ts", "/nonexistent/app/utils/util-b.ts"),
            ("hook-a.ts", "/nonexistent/app/hooks/hook-a.ts"),
        ]);
        let (dep, warning) =
            resolve_specifier(&ctx, "hook-a.ts", Path::new("/nonexistent/app/hooks"), "./util-b", 1);
        assert_eq!(
            dep.target,
            DependencyTarget::Candidate {
                path: "util-b.ts".to_string()
            }
        );
        assert!(warning.is_none());
    }

    #[test]
    fn test_relative_stem_fallback_is_alphabetical() {
        let ctx = ctx_with(&[
            ("b/format.ts", "/nonexistent/app/utils/format.ts"),
            ("a/format.ts", "/nonexistent/app/utils/format.ts"),
            ("main.ts", "/nonexistent/app/utils/main.ts"),
        ]);
        let (dep, warning) = resolve_specifier(
            &ctx,
            "main.ts",
            Path::new("/nonexistent/app/utils"),
            "../shared/format",
            3,
        );
        assert_eq!(dep.candidate(), Some("a/format.ts"));
        assert!(warning.unwrap().contains("2 candidates"));
    }

    #[test]
    fn test_relative_missing() {
        let ctx = ctx_with(&[("main.ts", "/nonexistent/app/utils/main.ts")]);
        let (dep, _) =
            resolve_specifier(&ctx, "main.ts", Path::new("/nonexistent/app/utils"), "./gone", 1);
        assert_eq!(
            dep.target,
            DependencyTarget::Missing {
                looks_like_package: false
            }
        );
    }

    #[test]
    fn test_alias_matches_candidate_target() {
        let ctx = ctx_with(&[
            ("util-b.ts", "/nonexistent/app/utils/util-b.ts"),
            ("main.ts", "/nonexistent/app/utils/main.ts"),
        ]);
        let (dep, _) = resolve_specifier(
            &ctx,
            "main.ts",
            Path::new("/nonexistent/app/utils"),
            "@/utils/util-b",
            1,
        );
        assert_eq!(dep.candidate(), Some("util-b.ts"));
    }

    #[test]
    fn test_packages_against_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies": {"react": "^18.0.0"}, "devDependencies": {"vitest": "1"}}"#,
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        let manifest = PackageManifest::discover(&dir.path().join("src")).unwrap();
        assert!(manifest.dependencies.contains("vitest"));

        let ctx = ResolveContext {
            manifest: Some(manifest),
            ..ResolveContext::default()
        };
        let target = |spec: &str| resolve_specifier(&ctx, "a.ts", Path::new("/x"), spec, 1).0.target;
        assert_eq!(
            target("react"),
            DependencyTarget::External {
                package: "react".to_string(),
                installed: false
            }
        );
        assert_eq!(
            target("node:fs"),
            DependencyTarget::External {
                package: "fs".to_string(),
                installed: true
            }
        );
        assert_eq!(
            target("left-pad"),
            DependencyTarget::Missing {
                looks_like_package: true
            }
        );
    }

    #[test]
    fn test_project_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("incoming");
        let lib = dir.path().join("app/lib");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::create_dir_all(&lib).unwrap();
        std::fs::write(lib.join("db.ts"), "export const db = 1;\n").unwrap();

        let ctx = ResolveContext {
            source_dir: source.clone(),
            ..ResolveContext::default()
        };
        let (dep, _) = resolve_specifier(&ctx, "repo.ts", &dir.path().join("app/services"), "../lib/db", 1);
        assert_eq!(
            dep.target,
            DependencyTarget::Project {
                path: normalize_path(&lib.join("db.ts"))
            }
        );
    }
}
