//! Link planning for one tree node
//!
//! Before a node is built the linker decides whether it populates state of its
//! own, links already built children, or both, and whether its own subsets must
//! be declared through library metadata.

use crate::builder::BuildError;
use crate::stage::StageSubsets;
use serde::Serialize;

/// What a node's build has to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LinkMode {
    /// Populate own state only; no children were built for this node
    OwnState,
    /// Own subsets are empty; the node only links its children
    LinkOnly,
    /// Populate own state and link the children
    OwnStateAndLink,
}

/// A built child fragment waiting to be linked into its parent
#[derive(Debug, Clone)]
pub struct LinkedLibrary<P> {
    pub pipeline: P,
    /// Subsets covered by the child and everything it linked
    pub subsets: StageSubsets,
}

/// Link descriptor for one node
#[derive(Debug, Clone)]
pub struct LinkPlan<P> {
    pub mode: LinkMode,
    /// Fragments to link, in the order the children were built
    pub libraries: Vec<P>,
    /// Union of the subsets covered by `libraries`
    pub linked: StageSubsets,
    /// Subsets declared through library metadata; only partial own sets are declared
    pub library_info: Option<StageSubsets>,
}

impl<P: Clone> LinkPlan<P> {
    /// Plans the build of a node
    ///
    /// # Arguments
    /// * `node` - Index of the node, for diagnostics
    /// * `own` - Subsets the node populates itself
    /// * `pending` - Children built so far, in push order
    ///
    /// # Returns
    /// The plan, or [`BuildError::EmptyNode`] when the node has neither state nor children
    pub fn new(node: usize, own: StageSubsets, pending: &[LinkedLibrary<P>]) -> Result<Self, BuildError> {
        let linked = pending.iter().fold(StageSubsets::empty(), |acc, library| acc | library.subsets);
        let has_children = !pending.is_empty() && !linked.is_empty();

        let mode = match (own.is_empty(), has_children) {
            (false, false) => LinkMode::OwnState,
            (true, true) => LinkMode::LinkOnly,
            (false, true) => LinkMode::OwnStateAndLink,
            (true, false) => return Err(BuildError::EmptyNode { node }),
        };

        Ok(Self {
            mode,
            libraries: pending.iter().map(|library| library.pipeline.clone()).collect(),
            linked,
            library_info: own.is_partial().then_some(own),
        })
    }
}
