//! Shared typed models used across analysis, integration and the session ledger.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Where a component lands inside the component tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "area", rename_all = "snake_case")]
pub enum ComponentArea {
    Layout,
    Feature { name: String },
    Shared,
}

/// Inferred category of a candidate file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum Category {
    Component { area: ComponentArea },
    Hook,
    Service,
    Utility,
    TypeDefinition,
    Unknown { reason: String },
}

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Category::Component { .. } => "component",
            Category::Hook => "hook",
            Category::Service => "service",
            Category::Utility => "utility",
            Category::TypeDefinition => "type-definition",
            Category::Unknown { .. } => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Component {
                area: ComponentArea::Feature { name },
            } => write!(f, "component (feature {name})"),
            Category::Component {
                area: ComponentArea::Layout,
            } => write!(f, "component (layout)"),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Class,
    Interface,
    TypeAlias,
    Enum,
    Constant,
    Variable,
    Namespace,
    /// `export default <expression>`.
    DefaultExpression,
    /// Name re-exported through an `export { … }` list.
    Alias,
}

impl SymbolKind {
    /// Purely type-level declarations.
    pub fn is_type(self) -> bool {
        matches!(self, SymbolKind::Interface | SymbolKind::TypeAlias)
    }

}

/// Exported symbol as recorded in a `FileAnalysis`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub name: String,
    pub kind: SymbolKind,
    pub line: usize,
}

/// What an import specifier resolved to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DependencyTarget {
    /// Package-ecosystem reference.
    External { package: String, installed: bool },
    /// Another candidate of the same session (relative source path).
    Candidate { path: String },
    /// A candidate integrated earlier in this session.
    Integrated { target: PathBuf },
    /// A file already present in the project tree.
    Project { path: PathBuf },
    Missing { looks_like_package: bool },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub specifier: String,
    pub line: usize,
    pub target: DependencyTarget,
}

impl Dependency {
    pub fn is_external(&self) -> bool {
        matches!(self.target, DependencyTarget::External { .. })
            || matches!(
                self.target,
                DependencyTarget::Missing {
                    looks_like_package: true
                }
            )
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self.target, DependencyTarget::Missing { .. })
    }

    /// The sibling candidate that satisfies this dependency, if any.
    pub fn candidate(&self) -> Option<&str> {
        match &self.target {
            DependencyTarget::Candidate { path } => Some(path),
            _ => None,
        }
    }
}

/// Result of analyzing one candidate file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAnalysis {
    /// Path relative to the source directory, `/`-separated.
    pub path: String,
    pub absolute_path: PathBuf,
    pub category: Category,
    pub target: PathBuf,
    pub dependencies: Vec<Dependency>,
    pub exports: Vec<ExportSummary>,
    pub content_hash: String,
    pub warnings: Vec<String>,
}

impl FileAnalysis {
    pub fn candidate_dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().filter_map(|d| d.candidate())
    }
}

// ---------------------------------------------------------------------------
// Integration
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Same name, different implementation.
    DuplicateExport,
    /// Same name, structurally different declared type.
    IncompatibleSignature,
    /// Two unrelated declarations sharing an identifier.
    NamingCollision,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictKind::DuplicateExport => "duplicate export",
            ConflictKind::IncompatibleSignature => "incompatible signature",
            ConflictKind::NamingCollision => "naming collision",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub symbol: String,
    pub description: String,
    pub existing: String,
    pub incoming: String,
}

/// Operator-supplied answer for a file whose merge reported conflicts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the existing declarations, add only the non-conflicting ones.
    KeepExisting,
    /// Replace conflicting existing declarations with the candidate's.
    TakeCandidate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationAction {
    Created,
    Merged,
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationResult {
    pub success: bool,
    pub source: String,
    pub target: PathBuf,
    pub action: IntegrationAction,
    pub conflicts: Vec<Conflict>,
    pub error: Option<String>,
    pub added_symbols: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Skipped
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
    Paused,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionStatus::NotStarted => "not started",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Paused => "paused",
        })
    }
}
