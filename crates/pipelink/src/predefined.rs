//! Predefined tree shapes and test cases.
//!
//! The table below covers every way of splitting the four stage subsets across
//! a shallow tree that the verification binaries exercise. Each shape is run in
//! two groups: `fast` without link-time optimisation and `optimize` with it.

use crate::engine::BuildOptions;
use crate::tree::{ConfigurationError, TreeConfiguration};
use serde::Serialize;
use std::fmt;

const R: Option<usize> = None;
const P0: Option<usize> = Some(0);
const P1: Option<usize> = Some(1);
const P2: Option<usize> = Some(2);
const P3: Option<usize> = Some(3);

/// Predefined trees as `(parent, stage_count)` pairs in node order.
pub const PREDEFINED_TREES: &[&[(Option<usize>, u32)]] = &[
    // Monolithic
    &[(R, 4)],
    // Root links leaf fragments
    &[(R, 0), (P0, 1), (P0, 1), (P0, 1), (P0, 1)],
    &[(R, 0), (P0, 1), (P0, 1), (P0, 2)],
    &[(R, 0), (P0, 1), (P0, 2), (P0, 1)],
    &[(R, 0), (P0, 2), (P0, 2)],
    // Root carries state of its own
    &[(R, 1), (P0, 2), (P0, 1)],
    &[(R, 2), (P0, 1), (P0, 1)],
    &[(R, 3), (P0, 1)],
    &[(R, 1), (P0, 3)],
    // Two levels of linking
    &[(R, 0), (P0, 0), (P0, 0), (P1, 1), (P1, 1), (P2, 1), (P2, 1)],
    &[(R, 0), (P0, 0), (P0, 1), (P1, 1), (P1, 1), (P2, 1)],
    &[(R, 1), (P0, 0), (P0, 1), (P1, 1), (P1, 1)],
    &[(R, 1), (P0, 1), (P1, 1), (P1, 1)],
    // Chains
    &[(R, 1), (P0, 1), (P1, 1), (P2, 1)],
    &[(R, 0), (P0, 1), (P1, 1), (P2, 1), (P3, 1)],
];

/// Group a test case belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestGroup {
    /// No link-time optimisation
    Fast,
    /// Libraries retain link-time info and the final pipeline is optimised
    Optimize,
}

impl TestGroup {
    pub const ALL: [TestGroup; 2] = [TestGroup::Fast, TestGroup::Optimize];

    pub fn name(self) -> &'static str {
        match self {
            TestGroup::Fast => "fast",
            TestGroup::Optimize => "optimize",
        }
    }
}

impl fmt::Display for TestGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One predefined tree run with one set of options
#[derive(Debug, Clone, Serialize)]
pub struct TestCase {
    pub group: TestGroup,
    pub name: String,
    pub tree: TreeConfiguration,
    pub options: BuildOptions,
}

/// Builds every predefined tree
///
/// # Returns
/// The trees in table order, or the first configuration error
pub fn predefined_trees() -> Result<Vec<TreeConfiguration>, ConfigurationError> {
    PREDEFINED_TREES.iter().map(|pairs| TreeConfiguration::from_pairs(pairs)).collect()
}

/// Expands the predefined trees into the `fast` and `optimize` test cases
///
/// Shader modules are created up front for the first tree and passed inline for
/// every other tree. The monolithic tree is not part of the `optimize` group
/// since there is nothing to link.
pub fn test_cases() -> Result<Vec<TestCase>, ConfigurationError> {
    let trees = predefined_trees()?;
    let mut cases = Vec::with_capacity(trees.len() * TestGroup::ALL.len());

    for group in TestGroup::ALL {
        let optimize = group == TestGroup::Optimize;

        for (index, tree) in trees.iter().enumerate() {
            if optimize && tree.len() == 1 {
                continue;
            }

            cases.push(TestCase {
                group,
                name: tree.name(),
                tree: tree.clone(),
                options: BuildOptions { optimize, delayed_shader_create: index != 0 },
            });
        }
    }

    Ok(cases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::reference::{ReferenceDevice, reference_shaders};
    use crate::engine::build_and_verify_all;

    #[test]
    fn test_predefined_names() {
        let names: Vec<String> = predefined_trees().unwrap().iter().map(TreeConfiguration::name).collect();

        assert_eq!(
            names,
            vec![
                "4", "0_1111", "0_112", "0_121", "0_22", "1_21", "2_11", "3_1", "1_3", "0_00_11_11", "0_01_11_1", "1_01_11", "1_1_11", "1_1_1_1", "0_1_1_1_1"
            ]
        );
    }

    #[test]
    fn test_case_groups() {
        let cases = test_cases().unwrap();
        let fast = cases.iter().filter(|case| case.group == TestGroup::Fast).count();
        let optimize = cases.iter().filter(|case| case.group == TestGroup::Optimize).count();

        assert_eq!(fast, 15);
        assert_eq!(optimize, 14);
        assert!(!cases[0].options.delayed_shader_create);
        assert!(cases[1..].iter().all(|case| case.options.delayed_shader_create));
        assert!(cases.iter().all(|case| case.options.optimize == (case.group == TestGroup::Optimize)));
    }

    #[test]
    fn test_every_case_passes_on_reference_device() {
        let shaders = reference_shaders();

        for case in test_cases().unwrap() {
            let mut device = ReferenceDevice::new();
            let result = build_and_verify_all(&mut device, &shaders, &case.tree, case.options).unwrap();

            assert!(result.pass, "{}/{} failed: {:?}", case.group, case.name, result.failures);
            assert_eq!(result.configurations_verified, result.signatures.len());
        }
    }
}
