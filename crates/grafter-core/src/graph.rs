//! Candidate dependency graph and safe processing order.
//!
//! Ordering is Kahn's algorithm with an ordered ready set, so files without
//! remaining predecessors are released in ascending path order. Nodes that
//! can never be released are explained afterwards: strongly connected
//! components become cycle reports, everything else is blocked by a missing
//! import or by a blocked dependency.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::GraftError;
use crate::models::{DependencyTarget, FileAnalysis, NodeStatus};

#[derive(Clone, Debug)]
pub struct GraphNode {
    pub analysis: FileAnalysis,
    pub status: NodeStatus,
}

/// Why a file cannot be scheduled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockReason {
    /// Member of a dependency cycle; `cycle` starts and ends on the same file.
    Cycle { cycle: Vec<String> },
    MissingDependency {
        specifier: String,
        looks_like_package: bool,
    },
    /// Depends on a file that is itself blocked or failed analysis.
    DependsOnBlocked { dependency: String },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Cycle { cycle } => write!(f, "dependency cycle: {}", cycle.join(" -> ")),
            BlockReason::MissingDependency {
                specifier,
                looks_like_package: true,
            } => write!(
                f,
                "unresolved import '{specifier}' looks like an external package that is not installed"
            ),
            BlockReason::MissingDependency { specifier, .. } => {
                write!(f, "unresolved import '{specifier}': no such internal module")
            }
            BlockReason::DependsOnBlocked { dependency } => {
                write!(f, "depends on {dependency}, which cannot be integrated")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedFile {
    pub path: String,
    pub reason: BlockReason,
}

impl BlockedFile {
    pub fn to_error(&self) -> GraftError {
        GraftError::Dependency {
            path: self.path.clone(),
            message: self.reason.to_string(),
        }
    }
}

/// Result of planning: a safe order plus everything that was held back.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphPlan {
    pub order: Vec<String>,
    pub cycles: Vec<Vec<String>>,
    pub blocked: Vec<BlockedFile>,
}

impl GraphPlan {
    pub fn blocked_reason(&self, path: &str) -> Option<&BlockReason> {
        self.blocked.iter().find(|b| b.path == path).map(|b| &b.reason)
    }
}

#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, GraphNode>,
    /// source → candidate dependencies (may name candidates without a node).
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn build(analyses: impl IntoIterator<Item = FileAnalysis>) -> Self {
        let mut graph = Self::default();
        for analysis in analyses {
            let deps: BTreeSet<String> = analysis
                .candidate_dependencies()
                .map(str::to_string)
                .collect();
            graph.edges.insert(analysis.path.clone(), deps);
            graph.nodes.insert(
                analysis.path.clone(),
                GraphNode {
                    analysis,
                    status: NodeStatus::Pending,
                },
            );
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, path: &str) -> Option<&GraphNode> {
        self.nodes.get(path)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&String, &GraphNode)> {
        self.nodes.iter()
    }

    pub fn status(&self, path: &str) -> Option<NodeStatus> {
        self.nodes.get(path).map(|n| n.status)
    }

    pub fn set_status(&mut self, path: &str, status: NodeStatus) {
        if let Some(node) = self.nodes.get_mut(path) {
            node.status = status;
        }
    }

    pub fn dependencies(&self, path: &str) -> impl Iterator<Item = &String> {
        self.edges.get(path).into_iter().flatten()
    }

    fn in_graph_deps(&self, path: &str) -> impl Iterator<Item = &String> {
        self.dependencies(path).filter(|d| self.nodes.contains_key(*d))
    }

    /// Compute a deterministic processing order.
    pub fn plan(&self) -> GraphPlan {
        let mut blocked: BTreeMap<String, BlockReason> = BTreeMap::new();

        // Files that can never start regardless of order.
        for (path, node) in &self.nodes {
            let missing = node.analysis.dependencies.iter().find_map(|d| match d.target {
                DependencyTarget::Missing { looks_like_package } => Some(BlockReason::MissingDependency {
                    specifier: d.specifier.clone(),
                    looks_like_package,
                }),
                _ => None,
            });
            let orphan = || {
                self.dependencies(path)
                    .find(|d| !self.nodes.contains_key(*d))
                    .map(|d| BlockReason::DependsOnBlocked {
                        dependency: d.clone(),
                    })
            };
            if let Some(reason) = missing.or_else(orphan) {
                blocked.insert(path.clone(), reason);
            }
        }

        // Kahn's algorithm; blocked roots are never released.
        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .keys()
            .map(|p| (p.as_str(), self.in_graph_deps(p).count()))
            .collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for path in self.nodes.keys() {
            for dep in self.in_graph_deps(path) {
                dependents.entry(dep.as_str()).or_default().push(path.as_str());
            }
        }
        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(p, d)| **d == 0 && !blocked.contains_key(**p))
            .map(|(p, _)| *p)
            .collect();
        let mut order = Vec::new();
        while let Some(next) = ready.pop_first() {
            order.push(next.to_string());
            for dependent in dependents.get(next).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 && !blocked.contains_key(*dependent) {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        // Explain the leftovers.
        let placed: BTreeSet<&str> = order.iter().map(String::as_str).collect();
        let leftover: BTreeSet<&str> = self
            .nodes
            .keys()
            .map(String::as_str)
            .filter(|p| !placed.contains(p) && !blocked.contains_key(*p))
            .collect();

        let mut cycles = Vec::new();
        for component in self.strongly_connected(&leftover) {
            let self_loop = component.len() == 1
                && self
                    .dependencies(component[0])
                    .any(|d| d.as_str() == component[0]);
            if component.len() < 2 && !self_loop {
                continue;
            }
            let cycle = self.cycle_path(&component);
            for member in &component {
                blocked.insert(
                    member.to_string(),
                    BlockReason::Cycle {
                        cycle: cycle.clone(),
                    },
                );
            }
            cycles.push(cycle);
        }
        cycles.sort();

        for path in leftover {
            if blocked.contains_key(path) {
                continue;
            }
            let dependency = self
                .in_graph_deps(path)
                .find(|d| !placed.contains(d.as_str()))
                .cloned()
                .unwrap_or_default();
            blocked.insert(path.to_string(), BlockReason::DependsOnBlocked { dependency });
        }

        GraphPlan {
            order,
            cycles,
            blocked: blocked
                .into_iter()
                .map(|(path, reason)| BlockedFile { path, reason })
                .collect(),
        }
    }

    /// Tarjan's algorithm restricted to `members`. Components come out with
    /// their members sorted.
    fn strongly_connected<'a>(&'a self, members: &BTreeSet<&'a str>) -> Vec<Vec<&'a str>> {
        struct Tarjan<'a> {
            index: usize,
            indices: BTreeMap<&'a str, usize>,
            lowlink: BTreeMap<&'a str, usize>,
            stack: Vec<&'a str>,
            on_stack: BTreeSet<&'a str>,
            components: Vec<Vec<&'a str>>,
        }

        fn visit<'a>(
            graph: &'a DependencyGraph,
            members: &BTreeSet<&'a str>,
            state: &mut Tarjan<'a>,
            node: &'a str,
        ) {
            state.indices.insert(node, state.index);
            state.lowlink.insert(node, state.index);
            state.index += 1;
            state.stack.push(node);
            state.on_stack.insert(node);

            for dep in graph.dependencies(node) {
                let dep = dep.as_str();
                if !members.contains(dep) {
                    continue;
                }
                if !state.indices.contains_key(dep) {
                    visit(graph, members, state, dep);
                    let low = state.lowlink[node].min(state.lowlink[dep]);
                    state.lowlink.insert(node, low);
                } else if state.on_stack.contains(dep) {
                    let low = state.lowlink[node].min(state.indices[dep]);
                    state.lowlink.insert(node, low);
                }
            }

            if state.lowlink[node] == state.indices[node] {
                let mut component = Vec::new();
                while let Some(top) = state.stack.pop() {
                    state.on_stack.remove(top);
                    component.push(top);
                    if top == node {
                        break;
                    }
                }
                component.sort();
                state.components.push(component);
            }
        }

        let mut state = Tarjan {
            index: 0,
            indices: BTreeMap::new(),
            lowlink: BTreeMap::new(),
            stack: Vec::new(),
            on_stack: BTreeSet::new(),
            components: Vec::new(),
        };
        for &node in members {
            if !state.indices.contains_key(node) {
                visit(self, members, &mut state, node);
            }
        }
        state.components
    }

    /// Shortest cycle through the smallest member of a component, closed on itself.
    fn cycle_path(&self, component: &[&str]) -> Vec<String> {
        let members: BTreeSet<&str> = component.iter().copied().collect();
        let Some(start) = component.first().copied() else {
            return Vec::new();
        };
        let mut parent: BTreeMap<&str, &str> = BTreeMap::new();
        let mut queue = VecDeque::from([start]);
        let mut closing = None;
        'search: while let Some(current) = queue.pop_front() {
            for dep in self.dependencies(current) {
                let dep = dep.as_str();
                if !members.contains(dep) {
                    continue;
                }
                if dep == start {
                    closing = Some(current);
                    break 'search;
                }
                if !parent.contains_key(dep) {
                    parent.insert(dep, current);
                    queue.push_back(dep);
                }
            }
        }

        let mut path = vec![start.to_string()];
        let mut tail = Vec::new();
        let mut cursor = closing;
        while let Some(node) = cursor {
            if node == start {
                break;
            }
            tail.push(node.to_string());
            cursor = parent.get(node).copied();
        }
        tail.reverse();
        path.extend(tail);
        path.push(start.to_string());
        path
    }
}
