//! Label hierarchies parsed from annotation columns.
//!
//! An annotation value holds one or more label paths separated by `" $ "`;
//! each path lists its levels root first, separated by `" | "`. Every column
//! gets its own [`LabelTree`] hanging off a synthetic `Root` node.

use crate::core::record::{ALTERNATIVES_DELIMITER, HierarchyColumn, LEVEL_DELIMITER, Table};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

pub const ROOT_LABEL: &str = "Root";

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelNode {
    pub label: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Number of label paths passing through this node.
    pub count: usize,
}

/// Arena-backed label tree.
///
/// A node is identified by its parent and its label, so the same label text
/// under two different parents yields two nodes.
#[derive(Debug, Clone)]
pub struct LabelTree {
    nodes: Vec<LabelNode>,
    index: HashMap<(NodeId, String), NodeId>,
}

impl LabelTree {
    pub const ROOT: NodeId = 0;

    pub fn new() -> Self {
        Self {
            nodes: vec![LabelNode {
                label: ROOT_LABEL.to_string(),
                parent: None,
                children: Vec::new(),
                count: 0,
            }],
            index: HashMap::new(),
        }
    }

    /// Build from a column's values; absent values are ignored.
    pub fn from_values<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = Option<&'a str>>,
    {
        let mut tree = Self::new();
        for value in values.into_iter().flatten() {
            tree.insert_value(value);
        }
        tree
    }

    /// Insert every alternative label path of one annotation value.
    pub fn insert_value(&mut self, value: &str) {
        for path in value.split(ALTERNATIVES_DELIMITER) {
            if path.trim().is_empty() {
                continue;
            }
            self.insert_path(path.split(LEVEL_DELIMITER));
        }
    }

    /// Walk `segments` from the root, creating missing nodes. Returns the leaf.
    pub fn insert_path<'a, I>(&mut self, segments: I) -> NodeId
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut current = Self::ROOT;
        self.nodes[current].count += 1;
        for label in segments {
            current = match self.child(current, label) {
                Some(existing) => existing,
                None => self.add_child(current, label),
            };
            self.nodes[current].count += 1;
        }
        current
    }

    fn add_child(&mut self, parent: NodeId, label: &str) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(LabelNode {
            label: label.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            count: 0,
        });
        self.nodes[parent].children.push(id);
        self.index.insert((parent, label.to_string()), id);
        id
    }

    /// Number of nodes excluding the synthetic root.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node(&self, id: NodeId) -> &LabelNode {
        &self.nodes[id]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn child(&self, parent: NodeId, label: &str) -> Option<NodeId> {
        self.index.get(&(parent, label.to_string())).copied()
    }

    /// Follow `labels` down from the root.
    pub fn find_path(&self, labels: &[&str]) -> Option<NodeId> {
        labels
            .iter()
            .try_fold(Self::ROOT, |parent, label| self.child(parent, label))
    }

    pub fn child_labels(&self, id: NodeId) -> Vec<&str> {
        self.children(id)
            .iter()
            .map(|&c| self.nodes[c].label.as_str())
            .collect()
    }

    /// Pre-order listing drawn with box characters, one node per line.
    /// With `with_counts`, non-root lines end in `=> <count>`.
    pub fn render(&self, with_counts: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.nodes[Self::ROOT].label);
        self.render_children(Self::ROOT, "", with_counts, &mut out);
        out
    }

    fn render_children(&self, id: NodeId, prefix: &str, with_counts: bool, out: &mut String) {
        let children = self.children(id);
        for (i, &child) in children.iter().enumerate() {
            let last = i + 1 == children.len();
            let node = &self.nodes[child];
            let branch = if last { "└── " } else { "├── " };
            if with_counts {
                let _ = writeln!(out, "{}{}{} => {}", prefix, branch, node.label, node.count);
            } else {
                let _ = writeln!(out, "{}{}{}", prefix, branch, node.label);
            }
            let nested = format!("{}{}", prefix, if last { "    " } else { "│   " });
            self.render_children(child, &nested, with_counts, out);
        }
    }
}

impl Default for LabelTree {
    fn default() -> Self {
        Self::new()
    }
}

/// One tree per hierarchy column, keyed by category name.
pub fn build_trees(table: &Table) -> BTreeMap<&'static str, LabelTree> {
    HierarchyColumn::ALL
        .iter()
        .map(|column| {
            let values = table.records().iter().map(|record| column.get(record));
            (column.category(), LabelTree::from_values(values))
        })
        .collect()
}
