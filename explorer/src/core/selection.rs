//! Selection bookkeeping for single-shot approval.
//!
//! Purely local: the workflow reads [`SelectionSet::compute`] only at the moment
//! it issues `approve`.

use serde::{Deserialize, Serialize};

use crate::core::types::Proposals;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selectable {
    pub id: String,
    pub included: bool,
}

/// Per-proposal "included" flags, kept in proposal order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelectionSet {
    pub nodes: Vec<Selectable>,
    pub edges: Vec<Selectable>,
}

/// Ids to send with `approve`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Selection {
    pub node_ids: Vec<String>,
    pub edge_ids: Vec<String>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty() && self.edge_ids.is_empty()
    }
}

impl SelectionSet {
    /// Every proposed node and edge starts out included.
    pub fn all_included(proposals: &Proposals) -> Self {
        Self {
            nodes: proposals
                .nodes
                .iter()
                .map(|node| Selectable {
                    id: node.id.clone(),
                    included: true,
                })
                .collect(),
            edges: proposals
                .edges
                .iter()
                .map(|edge| Selectable {
                    id: edge.id.clone(),
                    included: true,
                })
                .collect(),
        }
    }

    pub fn select_all(&mut self) {
        for item in self.nodes.iter_mut().chain(self.edges.iter_mut()) {
            item.included = true;
        }
    }

    /// Flip a node's flag. Returns false if the id was never proposed.
    pub fn toggle_node(&mut self, id: &str) -> bool {
        toggle(&mut self.nodes, id)
    }

    /// Flip an edge's flag. Returns false if the id was never proposed.
    pub fn toggle_edge(&mut self, id: &str) -> bool {
        toggle(&mut self.edges, id)
    }

    pub fn compute(&self) -> Selection {
        Selection {
            node_ids: included_ids(&self.nodes),
            edge_ids: included_ids(&self.edges),
        }
    }
}

fn toggle(items: &mut [Selectable], id: &str) -> bool {
    match items.iter_mut().find(|item| item.id == id) {
        Some(item) => {
            item.included = !item.included;
            true
        }
        None => false,
    }
}

fn included_ids(items: &[Selectable]) -> Vec<String> {
    items
        .iter()
        .filter(|item| item.included)
        .map(|item| item.id.clone())
        .collect()
}
