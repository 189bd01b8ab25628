//! Pipeline-library tree configurations
//!
//! A tree configuration is a flat list of nodes where each node names its parent by
//! index and says how many stage subsets it receives. Configurations can be written
//! by hand, taken from [`crate::predefined`] or loaded from YAML manifests such as:
//!
//! ```yaml
//! nodes:
//!   - stages: 0
//!   - parent: 0
//!     stages: 2
//!   - parent: 0
//!     stages: 2
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of stage subsets a tree must distribute
pub const TOTAL_STAGE_COUNT: u32 = 4;

/// Largest supported node count; each node occupies four bits of the signature
pub const MAX_NODES: usize = 16;

/// A node of a tree configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Index of the parent node, `None` for the root
    #[serde(default)]
    pub parent: Option<usize>,
    /// How many stage subsets this node receives
    #[serde(rename = "stages")]
    pub stage_count: u32,
}

impl TreeNode {
    /// Creates a node
    pub fn new(parent: Option<usize>, stage_count: u32) -> Self {
        Self { parent, stage_count }
    }
}

/// Errors raised while validating a tree configuration
///
/// These are detected before anything is built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// The configuration has no nodes
    #[error("tree configuration has no nodes")]
    Empty,
    /// The configuration has more nodes than the signature can encode
    #[error("tree configuration has {count} nodes, at most {MAX_NODES} are supported")]
    TooManyNodes { count: usize },
    /// Node 0 has a parent
    #[error("node 0 must be the root but has parent {parent}")]
    RootNotFirst { parent: usize },
    /// A node other than node 0 has no parent
    #[error("node {node} has no parent but node 0 is already the root")]
    MultipleRoots { node: usize },
    /// A parent index does not precede its child
    #[error("node {node} references parent {parent}, parents must have a smaller index")]
    InvalidParent { node: usize, parent: usize },
    /// Stage counts do not add up to the number of subsets
    #[error("stage counts sum to {total}, expected {TOTAL_STAGE_COUNT}")]
    StageCountMismatch { total: u32 },
    /// A leaf node receives no subsets and would build an empty fragment
    #[error("leaf node {node} has no stages")]
    EmptyLeaf { node: usize },
}

/// Errors raised while loading a tree manifest
#[derive(Debug, Error)]
pub enum TreeLoadError {
    /// The manifest could not be read
    #[error("failed to read tree manifest: {0}")]
    Io(#[from] std::io::Error),
    /// The manifest is not valid YAML or fails validation
    #[error("failed to parse tree manifest: {0}")]
    Yaml(#[from] serde_norway::Error),
}

/// Serialized form of a tree configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TreeManifest {
    nodes: Vec<TreeNode>,
}

/// An immutable, validated pipeline-library tree
///
/// Invariant: node 0 is the only root and every other node's parent has a
/// strictly smaller index, so iterating from the last node to the first visits
/// every child before its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TreeManifest", into = "TreeManifest")]
pub struct TreeConfiguration {
    nodes: Vec<TreeNode>,
}

impl TreeConfiguration {
    /// Creates a validated configuration
    ///
    /// # Arguments
    /// * `nodes` - Nodes in build-description order
    ///
    /// # Returns
    /// The configuration, or the first validation error found
    pub fn new(nodes: Vec<TreeNode>) -> Result<Self, ConfigurationError> {
        validate(&nodes)?;
        Ok(Self { nodes })
    }

    /// Creates a validated configuration from `(parent, stage_count)` pairs
    pub fn from_pairs(pairs: &[(Option<usize>, u32)]) -> Result<Self, ConfigurationError> {
        Self::new(pairs.iter().map(|&(parent, stage_count)| TreeNode::new(parent, stage_count)).collect())
    }

    /// Parses a configuration from YAML content
    pub fn from_yaml(yaml_content: &str) -> Result<Self, serde_norway::Error> {
        serde_norway::from_str(yaml_content)
    }

    /// Parses a configuration from a YAML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, TreeLoadError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml(&content)?)
    }

    /// Returns the nodes in description order
    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    /// Returns the number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false for a validated configuration
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the root node
    pub fn root(&self) -> usize {
        0
    }

    /// Indices of the direct children of `index`, in ascending order
    pub fn children(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes.iter().enumerate().filter(move |(_, node)| node.parent == Some(index)).map(|(child, _)| child)
    }

    /// Compact name of the tree shape
    ///
    /// Stage counts are concatenated in node order and an underscore is inserted
    /// every time the parent index changes, e.g. `4`, `0_1111` or `1_1_1_1`.
    pub fn name(&self) -> String {
        let mut result = String::new();
        let mut level = self.nodes.first().and_then(|node| node.parent);

        for node in &self.nodes {
            if node.parent != level {
                result.push('_');
                level = node.parent;
            }
            result.push_str(&node.stage_count.to_string());
        }

        result
    }
}

impl TryFrom<TreeManifest> for TreeConfiguration {
    type Error = ConfigurationError;

    fn try_from(manifest: TreeManifest) -> Result<Self, Self::Error> {
        Self::new(manifest.nodes)
    }
}

impl From<TreeConfiguration> for TreeManifest {
    fn from(tree: TreeConfiguration) -> Self {
        Self { nodes: tree.nodes }
    }
}

fn validate(nodes: &[TreeNode]) -> Result<(), ConfigurationError> {
    if nodes.is_empty() {
        return Err(ConfigurationError::Empty);
    }

    if nodes.len() > MAX_NODES {
        return Err(ConfigurationError::TooManyNodes { count: nodes.len() });
    }

    if let Some(parent) = nodes[0].parent {
        return Err(ConfigurationError::RootNotFirst { parent });
    }

    for (index, node) in nodes.iter().enumerate().skip(1) {
        match node.parent {
            None => return Err(ConfigurationError::MultipleRoots { node: index }),
            Some(parent) if parent >= index => return Err(ConfigurationError::InvalidParent { node: index, parent }),
            Some(_) => {}
        }
    }

    // Saturates so that oversized counts cannot wrap around to a valid total
    let total = nodes.iter().fold(0u32, |total, node| total.saturating_add(node.stage_count));
    if total != TOTAL_STAGE_COUNT {
        return Err(ConfigurationError::StageCountMismatch { total });
    }

    // A node with no stages is only useful as a link point for its children
    for (index, node) in nodes.iter().enumerate() {
        let has_children = nodes.iter().any(|other| other.parent == Some(index));
        if node.stage_count == 0 && !has_children {
            return Err(ConfigurationError::EmptyLeaf { node: index });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        let monolithic = TreeConfiguration::from_pairs(&[(None, 4)]).unwrap();
        assert_eq!(monolithic.name(), "4");

        let flat = TreeConfiguration::from_pairs(&[(None, 0), (Some(0), 1), (Some(0), 1), (Some(0), 1), (Some(0), 1)]).unwrap();
        assert_eq!(flat.name(), "0_1111");

        let chain = TreeConfiguration::from_pairs(&[(None, 1), (Some(0), 1), (Some(1), 1), (Some(2), 1)]).unwrap();
        assert_eq!(chain.name(), "1_1_1_1");

        let nested = TreeConfiguration::from_pairs(&[(None, 0), (Some(0), 0), (Some(0), 0), (Some(1), 1), (Some(1), 1), (Some(2), 1), (Some(2), 1)]).unwrap();
        assert_eq!(nested.name(), "0_00_11_11");
    }

    #[test]
    fn test_children() {
        let tree = TreeConfiguration::from_pairs(&[(None, 1), (Some(0), 0), (Some(0), 1), (Some(1), 1), (Some(1), 1)]).unwrap();
        assert_eq!(tree.children(0).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(tree.children(1).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(tree.children(4).count(), 0);
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(TreeConfiguration::new(vec![]), Err(ConfigurationError::Empty));
        assert_eq!(TreeConfiguration::from_pairs(&[(None, 3)]), Err(ConfigurationError::StageCountMismatch { total: 3 }));
        assert_eq!(TreeConfiguration::from_pairs(&[(None, 4), (Some(0), 1)]), Err(ConfigurationError::StageCountMismatch { total: 5 }));
        assert_eq!(TreeConfiguration::from_pairs(&[(Some(0), 4)]), Err(ConfigurationError::RootNotFirst { parent: 0 }));
        assert_eq!(TreeConfiguration::from_pairs(&[(None, 2), (None, 2)]), Err(ConfigurationError::MultipleRoots { node: 1 }));
        assert_eq!(
            TreeConfiguration::from_pairs(&[(None, 2), (Some(2), 1), (Some(0), 1)]),
            Err(ConfigurationError::InvalidParent { node: 1, parent: 2 })
        );
        assert_eq!(
            TreeConfiguration::from_pairs(&[(None, 2), (Some(1), 2)]),
            Err(ConfigurationError::InvalidParent { node: 1, parent: 1 })
        );
        assert_eq!(TreeConfiguration::from_pairs(&[(None, 4), (Some(0), 0)]), Err(ConfigurationError::EmptyLeaf { node: 1 }));

        let too_many: Vec<_> = std::iter::once((None, 4)).chain((0..MAX_NODES).map(|index| (Some(index), 0))).collect();
        assert_eq!(TreeConfiguration::from_pairs(&too_many), Err(ConfigurationError::TooManyNodes { count: MAX_NODES + 1 }));
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
nodes:
  - stages: 0
  - parent: 0
    stages: 2
  - parent: 0
    stages: 2
"#;

        let tree = TreeConfiguration::from_yaml(yaml).unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.nodes()[0], TreeNode::new(None, 0));
        assert_eq!(tree.nodes()[2], TreeNode::new(Some(0), 2));
        assert_eq!(tree.name(), "0_22");
    }

    #[test]
    fn test_yaml_rejects_invalid_tree() {
        let yaml = r#"
nodes:
  - stages: 1
  - parent: 1
    stages: 3
"#;

        let error = TreeConfiguration::from_yaml(yaml).unwrap_err();
        assert!(error.to_string().contains("parents must have a smaller index"));
    }

    #[test]
    fn test_oversized_stage_counts() {
        assert_eq!(
            TreeConfiguration::from_pairs(&[(None, u32::MAX), (Some(0), 5)]),
            Err(ConfigurationError::StageCountMismatch { total: u32::MAX })
        );

        let yaml = r#"
nodes:
  - stages: 4294967295
  - parent: 0
    stages: 5
"#;

        let error = TreeConfiguration::from_yaml(yaml).unwrap_err();
        assert!(error.to_string().contains("stage counts sum to 4294967295"));
    }
}
