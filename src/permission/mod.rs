//! Expansion of requested permission ids into concrete leaf permissions.

mod tree;

pub use self::tree::PermissionTree;

/// Resolves permission ids either through a [`PermissionTree`] or, when no
/// tree is configured, by passing them through unchanged.
#[derive(Clone, Debug, Default)]
pub enum PermissionResolver {
    Tree(PermissionTree),
    #[default]
    Flat,
}

impl PermissionResolver {
    /// Deduplicated, sorted permission set for `requested`.
    pub fn resolve<I, S>(&self, requested: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match self {
            Self::Tree(tree) => tree.resolve(requested),
            Self::Flat => {
                let mut flat: Vec<String> = requested
                    .into_iter()
                    .map(|id| id.as_ref().to_string())
                    .collect();
                flat.sort();
                flat.dedup();
                flat
            }
        }
    }
}
