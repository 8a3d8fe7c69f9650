//! Directed "A references B" index over the registry.
//!
//! Outbound edges carry a [`ReferenceStatus`]. Edges to ids that do not exist
//! are kept as broken rather than dropped, so a dangling link is always
//! visible through [`ReferenceGraph::references`] or
//! [`ReferenceGraph::broken_references`].
//!
//! Statuses are resolved when the edge set of a source is replaced, and
//! flipped to [`BrokenReason::Deleted`] when a target is removed. Creating a
//! target later does not heal edges on its own.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FileError, FileResult};
use crate::node::NodeId;
use crate::registry::FileRegistry;

/// Why an edge does not resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokenReason {
    /// Target did not exist when the edge was recorded
    Pending,
    /// Target was deleted after the edge was recorded
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ReferenceStatus {
    Resolved,
    Broken(BrokenReason),
}

/// One outbound edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub target: NodeId,
    #[serde(flatten)]
    pub status: ReferenceStatus,
}

impl Reference {
    pub fn is_broken(&self) -> bool {
        matches!(self.status, ReferenceStatus::Broken(_))
    }
}

/// A broken edge, reported with its source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenReference {
    pub source_id: NodeId,
    pub target: NodeId,
    pub reason: BrokenReason,
}

#[derive(Debug, Default)]
pub struct ReferenceGraph {
    outbound: HashMap<NodeId, BTreeMap<NodeId, ReferenceStatus>>,
    inbound: HashMap<NodeId, BTreeSet<NodeId>>,
}

impl ReferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the outbound edge set of `source`.
    ///
    /// Returns whether any edge or status changed.
    pub fn update_references(
        &mut self,
        registry: &FileRegistry,
        source: &str,
        refs: &BTreeSet<NodeId>,
    ) -> FileResult<bool> {
        if !registry.contains(source) {
            return Err(FileError::not_found(source));
        }
        if let Some(target) = refs.iter().find(|t| t.as_str() == source) {
            return Err(FileError::InvalidReference {
                source_id: NodeId::from(source),
                target: target.clone(),
            });
        }

        let next: BTreeMap<NodeId, ReferenceStatus> = refs
            .iter()
            .map(|target| {
                let status = if registry.contains(target) {
                    ReferenceStatus::Resolved
                } else {
                    ReferenceStatus::Broken(BrokenReason::Pending)
                };
                (target.clone(), status)
            })
            .collect();

        let previous = self.outbound.get(source);
        if previous == Some(&next) || (previous.is_none() && next.is_empty()) {
            return Ok(false);
        }

        let source_id = NodeId::from(source);
        if let Some(old) = self.outbound.remove(source) {
            for target in old.keys() {
                self.unlink_inbound(target, &source_id);
            }
        }
        for target in next.keys() {
            self.inbound
                .entry(target.clone())
                .or_default()
                .insert(source_id.clone());
        }

        debug!(source = %source_id, edges = next.len(), "References updated");
        if !next.is_empty() {
            self.outbound.insert(source_id, next);
        }
        Ok(true)
    }

    /// Outbound edges of `id` in target order
    pub fn references(&self, id: &str) -> Vec<Reference> {
        self.outbound
            .get(id)
            .map(|edges| {
                edges
                    .iter()
                    .map(|(target, status)| Reference {
                        target: target.clone(),
                        status: *status,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sources that reference `id`
    pub fn backlinks(&self, id: &str) -> Vec<NodeId> {
        self.inbound
            .get(id)
            .map(|sources| sources.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn broken_references(&self) -> Vec<BrokenReference> {
        let mut broken: Vec<BrokenReference> = self
            .outbound
            .iter()
            .flat_map(|(source, edges)| {
                edges.iter().filter_map(move |(target, status)| match status {
                    ReferenceStatus::Broken(reason) => Some(BrokenReference {
                        source_id: source.clone(),
                        target: target.clone(),
                        reason: *reason,
                    }),
                    ReferenceStatus::Resolved => None,
                })
            })
            .collect();
        broken.sort_by(|a, b| (&a.source_id, &a.target).cmp(&(&b.source_id, &b.target)));
        broken
    }

    /// Retract a deleted node. Its outbound edges are dropped and edges
    /// pointing at it become `Broken(Deleted)`. Returns the dependents.
    pub fn remove_node(&mut self, id: &str) -> Vec<NodeId> {
        let node_id = NodeId::from(id);
        if let Some(old) = self.outbound.remove(id) {
            for target in old.keys() {
                self.unlink_inbound(target, &node_id);
            }
        }

        let dependents = self.backlinks(id);
        for source in &dependents {
            if let Some(status) = self
                .outbound
                .get_mut(source)
                .and_then(|edges| edges.get_mut(id))
            {
                *status = ReferenceStatus::Broken(BrokenReason::Deleted);
            }
        }
        if !dependents.is_empty() {
            debug!(id, dependents = dependents.len(), "Inbound references broken");
        }
        dependents
    }

    /// Follow an id change on both sides of every edge.
    pub fn rekey(&mut self, old: &str, new: &NodeId) {
        if let Some(mut edges) = self.outbound.remove(old) {
            if edges.remove(new).is_some() {
                self.unlink_inbound(new, &NodeId::from(old));
            }
            for target in edges.keys() {
                if let Some(sources) = self.inbound.get_mut(target) {
                    sources.remove(old);
                    sources.insert(new.clone());
                }
            }
            if !edges.is_empty() {
                self.outbound.insert(new.clone(), edges);
            }
        }

        if let Some(sources) = self.inbound.remove(old) {
            for source in &sources {
                if let Some(edges) = self.outbound.get_mut(source) {
                    if let Some(status) = edges.remove(old) {
                        edges.insert(new.clone(), status);
                    }
                }
            }
            self.inbound.entry(new.clone()).or_default().extend(sources);
        }
    }

    fn unlink_inbound(&mut self, target: &NodeId, source: &NodeId) {
        if let Some(sources) = self.inbound.get_mut(target) {
            sources.remove(source);
            if sources.is_empty() {
                self.inbound.remove(target);
            }
        }
    }
}
