//! Candidate scanning and analysis with Rayon-based parallelism.
//!
//! Parsing and classification are independent per file and run on a thread
//! pool. Resolution needs the planned target of every sibling, so it runs as a
//! second, sequential pass over the parsed set.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::analyzer::classify::{classify, target_path};
use crate::analyzer::parser::{validate_syntax, CANDIDATE_EXTENSIONS};
use crate::analyzer::resolve::{resolve_specifier, PackageManifest, ResolveContext};
use crate::analyzer::symbols::{parse_module, ModuleInfo};
use crate::config::Config;
use crate::errors::{GraftError, GraftResult};
use crate::models::{Category, FileAnalysis};

/// A candidate that parsed and classified cleanly.
pub struct ParsedCandidate {
    pub path: String,
    pub absolute_path: PathBuf,
    pub content_hash: String,
    pub module: ModuleInfo,
    pub category: Category,
    pub target: PathBuf,
}

#[derive(Debug)]
pub struct AnalysisFailure {
    pub path: String,
    pub error: GraftError,
}

#[derive(Debug, Default)]
pub struct AnalysisReport {
    pub analyses: Vec<FileAnalysis>,
    pub failures: Vec<AnalysisFailure>,
    pub elapsed_ms: u64,
}

pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn is_candidate_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| CANDIDATE_EXTENSIONS.contains(&ext.as_str()))
}

/// Candidate files under `source_dir` as sorted `/`-separated relative paths.
/// A missing source directory yields no candidates.
pub fn scan_candidates(source_dir: &Path) -> GraftResult<Vec<String>> {
    if !source_dir.exists() {
        return Ok(Vec::new());
    }
    let walker = WalkDir::new(source_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !name.starts_with('.') && name != "node_modules"
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| source_dir.to_path_buf());
            let io = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("file system loop"));
            GraftError::fs("scan", path, io)
        })?;
        if !entry.file_type().is_file() || !is_candidate_file(entry.path()) {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(source_dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        files.push(rel);
    }
    Ok(files)
}

/// Read, validate, parse and classify one candidate.
pub fn parse_candidate(config: &Config, rel: &str) -> GraftResult<ParsedCandidate> {
    let absolute_path = config.source_dir.join(rel);
    let bytes = std::fs::read(&absolute_path).map_err(|e| GraftError::fs("read", &absolute_path, e))?;
    let source = String::from_utf8(bytes).map_err(|_| GraftError::Parse {
        path: rel.to_string(),
        line: 0,
        column: 0,
        message: "file is not valid UTF-8".to_string(),
    })?;

    let dialect = validate_syntax(rel, &source)?;
    let module = parse_module(&source);
    let category = classify(rel, dialect, &module);
    let target = target_path(rel, &category, config);

    Ok(ParsedCandidate {
        path: rel.to_string(),
        absolute_path,
        content_hash: content_hash(source.as_bytes()),
        module,
        category,
        target,
    })
}

fn parallel_parse(config: &Config, files: &[String]) -> Vec<(String, GraftResult<ParsedCandidate>)> {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build();

    let job = |rel: &String| (rel.clone(), parse_candidate(config, rel));
    match pool {
        Ok(pool) => pool.install(|| files.par_iter().map(job).collect()),
        Err(e) => {
            debug!("thread pool unavailable ({e}); analyzing sequentially");
            files.iter().map(job).collect()
        }
    }
}

/// Analyze every pending candidate under the configured source directory.
///
/// `integrated` maps source paths finished in earlier runs to their targets;
/// those files are not re-analyzed but still satisfy relative imports.
pub fn analyze_candidates(
    config: &Config,
    integrated: &BTreeMap<String, PathBuf>,
) -> GraftResult<AnalysisReport> {
    let start = Instant::now();
    let files: Vec<String> = scan_candidates(&config.source_dir)?
        .into_iter()
        .filter(|rel| !integrated.contains_key(rel))
        .collect();
    info!(
        "Analyzing {} candidate file(s) in {}",
        files.len(),
        config.source_dir.display()
    );

    let parsed = parallel_parse(config, &files);

    let ctx = ResolveContext {
        source_dir: config.source_dir.clone(),
        candidates: parsed
            .iter()
            .map(|(rel, result)| (rel.clone(), result.as_ref().ok().map(|p| p.target.clone())))
            .collect(),
        integrated: integrated.clone(),
        aliases: config.alias_dirs(),
        manifest: PackageManifest::discover(&config.target_root),
    };

    let mut report = AnalysisReport::default();
    for (rel, result) in parsed {
        match result {
            Ok(candidate) => report.analyses.push(resolve_candidate(&ctx, candidate)),
            Err(error) => {
                warn!("Skipping {rel}: {error}");
                report.failures.push(AnalysisFailure { path: rel, error });
            }
        }
    }
    report.elapsed_ms = start.elapsed().as_millis() as u64;
    info!(
        "Analysis finished: {} ok, {} failed in {}ms",
        report.analyses.len(),
        report.failures.len(),
        report.elapsed_ms
    );
    Ok(report)
}

/// Resolve the dependencies of a parsed candidate into its final analysis.
pub fn resolve_candidate(ctx: &ResolveContext, candidate: ParsedCandidate) -> FileAnalysis {
    let target_dir = candidate
        .target
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let mut warnings = Vec::new();
    let mut dependencies = Vec::new();
    let mut seen = BTreeSet::new();

    for (specifier, line) in candidate.module.specifiers() {
        if !seen.insert(specifier.clone()) {
            continue;
        }
        let (dependency, warning) =
            resolve_specifier(ctx, &candidate.path, &target_dir, &specifier, line);
        if let Some(w) = warning {
            warnings.push(w);
        }
        dependencies.push(dependency);
    }

    if let Category::Unknown { reason } = &candidate.category {
        warn!(
            "{} could not be classified ({reason}); it will go to {}",
            candidate.path,
            target_dir.display()
        );
        warnings.push(format!("unclassified: {reason}"));
    }
    debug!(
        "{} -> {} ({}, {} deps)",
        candidate.path,
        candidate.target.display(),
        candidate.category,
        dependencies.len()
    );

    FileAnalysis {
        path: candidate.path,
        absolute_path: candidate.absolute_path,
        category: candidate.category,
        target: candidate.target,
        dependencies,
        exports: candidate.module.export_summaries(),
        content_hash: candidate.content_hash,
        warnings,
    }
}
