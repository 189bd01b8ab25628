//! Stage assignment enumeration and deduplication
//!
//! Every permutation of the four stage subsets is mapped onto a tree by handing out
//! `stage_count` subsets per node in the tree's listed order. Permutations that only
//! reorder subsets within one node produce the same assignment and are skipped
//! using a signature that packs every node's subset bits into four bits.

use crate::stage::{StageSubset, StageSubsets};
use crate::tree::TreeConfiguration;
use serde::Serialize;
use std::collections::HashSet;

/// Number of permutations of the four stage subsets
pub const PERMUTATION_COUNT: usize = 24;

/// Rearranges `items` into the next lexicographically greater permutation
///
/// # Arguments
/// * `items` - Slice to permute in place
///
/// # Returns
/// `true` if a greater permutation exists; otherwise the slice is reset to
/// ascending order and `false` is returned
pub fn next_permutation<T: Ord>(items: &mut [T]) -> bool {
    if items.len() < 2 {
        return false;
    }

    // Find the longest non-increasing suffix
    let mut pivot = items.len() - 1;
    while pivot > 0 && items[pivot - 1] >= items[pivot] {
        pivot -= 1;
    }

    if pivot == 0 {
        items.reverse();
        return false;
    }

    // Swap the element before the suffix with its smallest successor inside the suffix
    let mut successor = items.len() - 1;
    while items[successor] <= items[pivot - 1] {
        successor -= 1;
    }
    items.swap(pivot - 1, successor);
    items[pivot..].reverse();

    true
}

/// Lexicographic permutations of the stage subsets, starting from canonical order
///
/// Yields `(permutation_index, permutation)` pairs and stops after the last one.
#[derive(Debug, Clone)]
pub struct Permutations {
    next: Option<[StageSubset; 4]>,
    index: usize,
}

impl Permutations {
    pub fn new() -> Self {
        Self { next: Some(StageSubset::ALL), index: 0 }
    }
}

impl Default for Permutations {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for Permutations {
    type Item = (usize, [StageSubset; 4]);

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;

        let mut following = current;
        self.next = next_permutation(&mut following).then_some(following);

        let index = self.index;
        self.index += 1;
        Some((index, current))
    }
}

/// Distributes a permutation over the nodes of a tree
///
/// The permutation is consumed left to right: node 0 takes the first `stage_count`
/// subsets, node 1 the next ones and so on in the configuration's listed order.
pub fn assign(tree: &TreeConfiguration, permutation: &[StageSubset]) -> Vec<StageSubsets> {
    let mut remaining = permutation.iter().copied();

    tree.nodes().iter().map(|node| remaining.by_ref().take(node.stage_count as usize).collect()).collect()
}

/// Folds per-node subsets into a configuration signature, four bits per node
pub fn signature(own: &[StageSubsets]) -> u64 {
    own.iter().fold(0u64, |acc, subsets| (acc << 4) | u64::from(subsets.bits()))
}

/// A concrete, deduplicated assignment of stage subsets to tree nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageAssignment {
    /// Lexicographic index of the permutation that first produced this assignment
    pub permutation_index: usize,
    /// Position among the unique assignments of the tree
    pub ordinal: usize,
    /// The permutation itself
    pub permutation: [StageSubset; 4],
    /// Subsets owned by each node, indexed like the tree's nodes
    pub own: Vec<StageSubsets>,
    /// Packed per-node subsets
    pub signature: u64,
}

impl StageAssignment {
    /// Builds the assignment produced by `permutation` on `tree`
    pub fn new(tree: &TreeConfiguration, permutation_index: usize, ordinal: usize, permutation: [StageSubset; 4]) -> Self {
        let own = assign(tree, &permutation);
        let signature = signature(&own);

        Self { permutation_index, ordinal, permutation, own, signature }
    }

    /// Returns true if the nodes' subsets are disjoint and cover every subset
    pub fn is_exact_partition(&self) -> bool {
        let mut union = StageSubsets::empty();

        for subsets in &self.own {
            if union.intersects(*subsets) {
                return false;
            }
            union |= *subsets;
        }

        union.is_all()
    }

    /// Renders which node received which subsets, one line per node
    pub fn dump(&self, tree: &TreeConfiguration) -> String {
        let mut result = String::new();

        for (index, (node, subsets)) in tree.nodes().iter().zip(&self.own).enumerate() {
            let parent = node.parent.map_or_else(|| "-".to_string(), |parent| parent.to_string());
            result.push_str(&format!("node {index} (parent {parent}): {{{subsets}}}\n"));
        }

        result
    }
}

/// Lazy generator of the unique stage assignments of a tree
///
/// Finite and not restartable. Callers may stop at any point without the
/// remaining permutations being generated.
#[derive(Debug)]
pub struct UniqueAssignments<'a> {
    tree: &'a TreeConfiguration,
    permutations: Permutations,
    seen: HashSet<u64>,
    ordinal: usize,
}

impl<'a> UniqueAssignments<'a> {
    pub fn new(tree: &'a TreeConfiguration) -> Self {
        Self { tree, permutations: Permutations::new(), seen: HashSet::new(), ordinal: 0 }
    }

    /// Number of permutations skipped as duplicates so far
    pub fn skipped(&self) -> usize {
        self.permutations.index - self.seen.len()
    }
}

impl Iterator for UniqueAssignments<'_> {
    type Item = StageAssignment;

    fn next(&mut self) -> Option<Self::Item> {
        for (permutation_index, permutation) in self.permutations.by_ref() {
            let assignment = StageAssignment::new(self.tree, permutation_index, self.ordinal, permutation);

            if self.seen.insert(assignment.signature) {
                self.ordinal += 1;
                return Some(assignment);
            }
        }

        None
    }
}

/// Shorthand for [`UniqueAssignments::new`]
pub fn unique_assignments(tree: &TreeConfiguration) -> UniqueAssignments<'_> {
    UniqueAssignments::new(tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factorial(n: u32) -> usize {
        (1..=n as usize).product()
    }

    fn expected_unique_count(tree: &TreeConfiguration) -> usize {
        PERMUTATION_COUNT / tree.nodes().iter().map(|node| factorial(node.stage_count)).product::<usize>()
    }

    #[test]
    fn test_next_permutation() {
        let mut items = [1, 2, 3];
        let mut seen = vec![items];
        while next_permutation(&mut items) {
            seen.push(items);
        }

        assert_eq!(seen, vec![[1, 2, 3], [1, 3, 2], [2, 1, 3], [2, 3, 1], [3, 1, 2], [3, 2, 1]]);
        assert_eq!(items, [1, 2, 3]);

        let mut single = [7];
        assert!(!next_permutation(&mut single));
    }

    #[test]
    fn test_permutations() {
        let permutations: Vec<_> = Permutations::new().collect();
        assert_eq!(permutations.len(), PERMUTATION_COUNT);
        assert_eq!(permutations[0], (0, StageSubset::ALL));

        let mut reversed = StageSubset::ALL;
        reversed.reverse();
        assert_eq!(permutations[23], (23, reversed));

        let distinct: HashSet<_> = permutations.iter().map(|(_, permutation)| *permutation).collect();
        assert_eq!(distinct.len(), PERMUTATION_COUNT);
    }

    #[test]
    fn test_assign_consumes_in_listed_order() {
        let tree = TreeConfiguration::from_pairs(&[(None, 1), (Some(0), 2), (Some(0), 1)]).unwrap();
        let permutation = [
            StageSubset::FragmentShader,
            StageSubset::VertexInput,
            StageSubset::FragmentOutputInterface,
            StageSubset::PreRasterizationShaders,
        ];

        let own = assign(&tree, &permutation);
        assert_eq!(
            own,
            vec![
                StageSubsets::FRAGMENT_SHADER,
                StageSubsets::VERTEX_INPUT | StageSubsets::FRAGMENT_OUTPUT_INTERFACE,
                StageSubsets::PRE_RASTERIZATION_SHADERS,
            ]
        );
        assert_eq!(signature(&own), (4 << 8) | (9 << 4) | 2);
    }

    #[test]
    fn test_monolithic_tree_yields_one_assignment() {
        let tree = TreeConfiguration::from_pairs(&[(None, 4)]).unwrap();
        let assignments: Vec<_> = unique_assignments(&tree).collect();

        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].permutation_index, 0);
        assert_eq!(assignments[0].own, vec![StageSubsets::all()]);
    }

    #[test]
    fn test_flat_tree_yields_every_permutation() {
        let tree = TreeConfiguration::from_pairs(&[(None, 0), (Some(0), 1), (Some(0), 1), (Some(0), 1), (Some(0), 1)]).unwrap();
        let assignments: Vec<_> = unique_assignments(&tree).collect();

        assert_eq!(assignments.len(), 24);
        for (ordinal, assignment) in assignments.iter().enumerate() {
            assert_eq!(assignment.ordinal, ordinal);
            assert_eq!(assignment.permutation_index, ordinal);
        }
    }

    #[test]
    fn test_pair_tree_collapses_to_six() {
        let tree = TreeConfiguration::from_pairs(&[(None, 2), (Some(0), 2)]).unwrap();
        let mut generator = unique_assignments(&tree);
        let assignments: Vec<_> = generator.by_ref().collect();

        assert_eq!(assignments.len(), 6);
        assert_eq!(generator.skipped(), 18);

        let indices: Vec<_> = assignments.iter().map(|assignment| assignment.permutation_index).collect();
        assert_eq!(indices, vec![0, 2, 4, 8, 10, 16]);
    }

    #[test]
    fn test_unique_counts_and_partitions() {
        let trees = [
            vec![(None, 0), (Some(0), 1), (Some(0), 1), (Some(0), 2)],
            vec![(None, 1), (Some(0), 2), (Some(0), 1)],
            vec![(None, 3), (Some(0), 1)],
            vec![(None, 1), (Some(0), 0), (Some(0), 1), (Some(1), 1), (Some(1), 1)],
        ];

        for pairs in trees {
            let tree = TreeConfiguration::from_pairs(&pairs).unwrap();
            let assignments: Vec<_> = unique_assignments(&tree).collect();

            assert_eq!(assignments.len(), expected_unique_count(&tree), "tree {}", tree.name());
            assert!(assignments.iter().all(StageAssignment::is_exact_partition));

            let signatures: HashSet<_> = assignments.iter().map(|assignment| assignment.signature).collect();
            assert_eq!(signatures.len(), assignments.len());
        }
    }

    #[test]
    fn test_generation_is_deterministic() {
        let tree = TreeConfiguration::from_pairs(&[(None, 1), (Some(0), 1), (Some(1), 2)]).unwrap();
        let first: Vec<_> = unique_assignments(&tree).map(|assignment| assignment.signature).collect();
        let second: Vec<_> = unique_assignments(&tree).map(|assignment| assignment.signature).collect();

        assert_eq!(first, second);
    }

    #[test]
    fn test_early_stop() {
        let tree = TreeConfiguration::from_pairs(&[(None, 0), (Some(0), 1), (Some(0), 1), (Some(0), 1), (Some(0), 1)]).unwrap();
        let mut generator = unique_assignments(&tree);

        assert!(generator.next().is_some());
        assert_eq!(generator.permutations.index, 1);
    }

    #[test]
    fn test_dump() {
        let tree = TreeConfiguration::from_pairs(&[(None, 2), (Some(0), 2)]).unwrap();
        let assignment = StageAssignment::new(&tree, 0, 0, StageSubset::ALL);

        assert_eq!(
            assignment.dump(&tree),
            "node 0 (parent -): {VERTEX_INPUT_INTERFACE PRE_RASTERIZATION_SHADERS}\nnode 1 (parent 0): {FRAGMENT_SHADER FRAGMENT_OUTPUT_INTERFACE}\n"
        );
    }
}
