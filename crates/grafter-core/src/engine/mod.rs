//! Integration Engine: create or merge one candidate at its target.

pub mod merge;

use tracing::{debug, info, warn};

use crate::config::MergeStrategy;
use crate::errors::{GraftError, GraftResult};
use crate::files::rewrite::{rewrite_import_paths, RelocationMap};
use crate::files::FileManager;
use crate::models::{ConflictResolution, FileAnalysis, IntegrationAction, IntegrationResult};

use self::merge::merge_modules;

/// Applies one analyzed candidate to the project through a [`FileManager`].
///
/// The engine writes the target but never deletes the candidate; removing the
/// original after a verified step is left to the caller.
pub struct IntegrationEngine<'a> {
    files: &'a mut FileManager,
    strategy: &'a MergeStrategy,
    relocations: &'a RelocationMap,
}

impl<'a> IntegrationEngine<'a> {
    pub fn new(
        files: &'a mut FileManager,
        strategy: &'a MergeStrategy,
        relocations: &'a RelocationMap,
    ) -> Self {
        Self {
            files,
            strategy,
            relocations,
        }
    }

    /// Candidate content as it should read from its target location.
    pub fn prepared_content(&self, analysis: &FileAnalysis) -> GraftResult<(String, Vec<String>)> {
        let content = self.files.read_to_string(&analysis.absolute_path)?;
        if !self.strategy.rewrite_imports {
            return Ok((content, Vec::new()));
        }
        let outcome = rewrite_import_paths(
            &content,
            &analysis.absolute_path,
            &analysis.target,
            self.relocations,
        );
        for (from, to) in &outcome.rewritten {
            debug!("{}: import '{from}' -> '{to}'", analysis.path);
        }
        let warnings = outcome
            .flagged
            .iter()
            .map(|spec| {
                warn!("{}: import '{spec}' left unchanged, it does not resolve", analysis.path);
                format!("import '{spec}' left unchanged: it does not resolve from the target")
            })
            .collect();
        Ok((outcome.content, warnings))
    }

    /// Create the target, or merge into it when it already exists.
    ///
    /// Conflicts are reported in the result with `success == false`; a
    /// conflicted merge writes nothing.
    pub fn integrate(
        &mut self,
        analysis: &FileAnalysis,
        resolution: Option<ConflictResolution>,
    ) -> GraftResult<IntegrationResult> {
        let (incoming, mut warnings) = self.prepared_content(analysis)?;
        let target = &analysis.target;

        if !target.exists() {
            self.files.write(target, incoming.as_bytes())?;
            info!("Created {} from {}", target.display(), analysis.path);
            return Ok(IntegrationResult {
                success: true,
                source: analysis.path.clone(),
                target: target.clone(),
                action: IntegrationAction::Created,
                conflicts: Vec::new(),
                error: None,
                added_symbols: analysis.exports.iter().map(|e| e.name.clone()).collect(),
                warnings,
            });
        }

        let existing = self.files.read_to_string(target)?;
        let plan = merge_modules(
            &existing,
            &incoming,
            self.strategy.add_new_non_conflicting,
            resolution,
        );
        warnings.extend(plan.warnings.iter().cloned());
        if !plan.dropped.is_empty() {
            warnings.push(format!(
                "not added (additions disabled): {}",
                plan.dropped.join(", ")
            ));
        }

        if plan.has_conflicts() {
            let error = GraftError::MergeConflict {
                path: analysis.path.clone(),
                count: plan.conflicts.len(),
            };
            warn!("{error}");
            for conflict in &plan.conflicts {
                warn!("  {}: {}", conflict.kind, conflict.description);
            }
            return Ok(IntegrationResult {
                success: false,
                source: analysis.path.clone(),
                target: target.clone(),
                action: IntegrationAction::Skipped,
                conflicts: plan.conflicts,
                error: Some(error.to_string()),
                added_symbols: Vec::new(),
                warnings,
            });
        }

        let action = if plan.output == existing {
            debug!("{} already contains everything from {}", target.display(), analysis.path);
            IntegrationAction::Skipped
        } else {
            self.files.write(target, plan.output.as_bytes())?;
            info!(
                "Merged {} into {} (+{} export(s), {} helper(s), {} replaced)",
                analysis.path,
                target.display(),
                plan.added.len(),
                plan.helpers.len(),
                plan.replaced.len()
            );
            IntegrationAction::Merged
        };

        Ok(IntegrationResult {
            success: true,
            source: analysis.path.clone(),
            target: target.clone(),
            action,
            conflicts: Vec::new(),
            error: None,
            added_symbols: plan.added.into_iter().chain(plan.replaced).collect(),
            warnings,
        })
    }
}
