use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, BTreeSet};

const SEPARATOR: char = ':';

/// Hierarchical permission namespace. A node without children is a leaf.
///
/// Accepts three JSON shapes: a nested object, a list of names (each a leaf)
/// and `null` (a leaf).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PermissionTree {
    children: BTreeMap<String, PermissionTree>,
}

impl PermissionTree {
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Insert a colon-delimited path such as `idm:users:write`.
    pub fn insert(&mut self, path: &str) {
        let mut node = self;
        for segment in path.split(SEPARATOR).filter(|s| !s.is_empty()) {
            node = node.children.entry(segment.to_string()).or_default();
        }
    }

    /// Deep, additive merge of `other` into `self`.
    pub fn merge_from(&mut self, other: &Self) {
        for (segment, subtree) in &other.children {
            self.children
                .entry(segment.clone())
                .or_default()
                .merge_from(subtree);
        }
    }

    /// Expand `requested` ids. Unknown paths are kept verbatim, leaves map to
    /// themselves and inner nodes to all of their descendant leaves.
    pub fn resolve<I, S>(&self, requested: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut resolved = BTreeSet::new();
        for id in requested {
            let id = id.as_ref();
            match self.find(id) {
                Some(node) if !node.is_leaf() => node.collect_leaves(id, &mut resolved),
                _ => {
                    resolved.insert(id.to_string());
                }
            }
        }
        resolved.into_iter().collect()
    }

    fn find(&self, path: &str) -> Option<&Self> {
        if path.is_empty() {
            return None;
        }
        path.split(SEPARATOR)
            .try_fold(self, |node, segment| node.children.get(segment))
    }

    fn collect_leaves(&self, prefix: &str, out: &mut BTreeSet<String>) {
        for (segment, child) in &self.children {
            let path = format!("{prefix}{SEPARATOR}{segment}");
            if child.is_leaf() {
                out.insert(path);
            } else {
                child.collect_leaves(&path, out);
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr {
    List(Vec<String>),
    Node(BTreeMap<String, PermissionTree>),
    Leaf(()),
}

impl<'de> Deserialize<'de> for PermissionTree {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Leaf(()) => Self::default(),
            Repr::Node(children) => Self { children },
            Repr::List(names) => {
                let mut tree = Self::default();
                for name in names {
                    tree.insert(&name);
                }
                tree
            }
        })
    }
}
