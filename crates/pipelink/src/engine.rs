//! Build-and-verify entry point
//!
//! [`build_and_verify_all`] drives everything for one tree: it enumerates the unique
//! stage assignments, builds and links each configuration, renders the scenario
//! with the final pipeline and collects the outcome. Build and execution errors
//! are recorded and the remaining configurations are still attempted; a rendering
//! mismatch is recorded and stops the run.

use crate::builder::PipelineTreeBuilder;
use crate::device::{PipelineDevice, ShaderProvider};
use crate::enumerate::{StageAssignment, unique_assignments};
use crate::harness::compare::CompareResult;
use crate::harness::{RenderOutput, VerificationHarness};
use crate::tree::{ConfigurationError, TreeConfiguration, TreeNode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Options shared by every configuration of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Build libraries retaining link-time optimisation info and link the final pipeline with optimisation
    #[serde(default)]
    pub optimize: bool,
    /// Pass shader binaries inline instead of creating shader modules up front
    #[serde(default)]
    pub delayed_shader_create: bool,
}

/// Errors that prevent a run from starting
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid tree configuration: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("tree '{tree}' requires pipeline library support")]
    Unsupported { tree: String },
}

/// Why a configuration failed
#[derive(Debug, Clone, Serialize)]
pub enum FailureKind {
    /// A fragment could not be built; the configuration was skipped
    Build { node: usize, message: String },
    /// The scenario could not be executed with the final pipeline
    Execution { message: String },
    /// The rendered images differ from the reference
    Mismatch { color: CompareResult, depth: CompareResult },
}

/// A configuration that did not verify
#[derive(Debug, Clone, Serialize)]
pub struct ConfigurationFailure {
    pub permutation_index: usize,
    pub ordinal: usize,
    pub signature: u64,
    pub kind: FailureKind,
    /// Which node received which subsets
    pub dump: String,
    /// Rendered images of a mismatching configuration
    #[serde(skip)]
    pub output: Option<RenderOutput>,
}

impl ConfigurationFailure {
    fn new(assignment: &StageAssignment, tree: &TreeConfiguration, kind: FailureKind, output: Option<RenderOutput>) -> Self {
        Self {
            permutation_index: assignment.permutation_index,
            ordinal: assignment.ordinal,
            signature: assignment.signature,
            kind,
            dump: assignment.dump(tree),
            output,
        }
    }
}

/// Aggregated outcome of every configuration of a tree
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    /// Compact name of the tree
    pub tree: String,
    pub pass: bool,
    /// Lexicographic permutation index of the first failing configuration
    pub failing_permutation_index: Option<usize>,
    /// Per-node subset dump of the first failing configuration
    pub diagnostic_tree_dump: Option<String>,
    /// Signatures of the configurations attempted, in order
    pub signatures: Vec<u64>,
    /// Number of configurations that rendered the reference images
    pub configurations_verified: usize,
    pub failures: Vec<ConfigurationFailure>,
}

impl TestResult {
    fn new(tree: &TreeConfiguration) -> Self {
        Self {
            tree: tree.name(),
            pass: true,
            failing_permutation_index: None,
            diagnostic_tree_dump: None,
            signatures: Vec::new(),
            configurations_verified: 0,
            failures: Vec::new(),
        }
    }

    fn finish(mut self) -> Self {
        self.pass = self.failures.is_empty();
        if let Some(first) = self.failures.first() {
            self.failing_permutation_index = Some(first.permutation_index);
            self.diagnostic_tree_dump = Some(first.dump.clone());
        }
        self
    }
}

/// Returns true if the tree can only be built with pipeline library support
pub fn requires_pipeline_libraries(tree: &TreeConfiguration, options: &BuildOptions) -> bool {
    options.delayed_shader_create || tree.len() > 1
}

/// Builds and verifies every unique configuration of a tree
///
/// # Arguments
/// * `device` - Device pipelines are created and executed on
/// * `shaders` - Provider of the `"vert"` and `"frag"` binaries
/// * `tree` - Validated tree configuration
/// * `options` - Optimisation and shader creation mode
///
/// # Returns
/// The aggregated result, or an error if the device cannot run the tree at all
pub fn build_and_verify_all<D, S>(device: &mut D, shaders: &S, tree: &TreeConfiguration, options: BuildOptions) -> Result<TestResult, EngineError>
where
    D: PipelineDevice,
    S: ShaderProvider,
{
    if requires_pipeline_libraries(tree, &options) && !device.supports_pipeline_libraries() {
        return Err(EngineError::Unsupported { tree: tree.name() });
    }

    info!(tree = %tree.name(), optimize = options.optimize, delayed_shader_create = options.delayed_shader_create, "verifying tree");

    let harness = VerificationHarness::default();
    let mut result = TestResult::new(tree);

    for assignment in unique_assignments(tree) {
        result.signatures.push(assignment.signature);

        let built = PipelineTreeBuilder::new(device, shaders, options).build(tree, &assignment);
        let linked = match built {
            Ok(linked) => linked,
            Err(error) => {
                warn!(permutation = assignment.permutation_index, %error, "configuration failed to build");
                let kind = FailureKind::Build { node: error.node(), message: error.to_string() };
                result.failures.push(ConfigurationFailure::new(&assignment, tree, kind, None));
                continue;
            }
        };

        match harness.verify(device, &linked.pipeline, &linked.layout) {
            Ok(report) if report.passed() => {
                debug!(permutation = assignment.permutation_index, signature = assignment.signature, "configuration verified");
                result.configurations_verified += 1;
            }
            Ok(report) => {
                warn!(permutation = assignment.permutation_index, color = ?report.color, depth = ?report.depth, "rendering mismatch");
                let kind = FailureKind::Mismatch { color: report.color, depth: report.depth };
                result.failures.push(ConfigurationFailure::new(&assignment, tree, kind, Some(report.output)));
                break;
            }
            Err(error) => {
                warn!(permutation = assignment.permutation_index, %error, "scenario execution failed");
                let kind = FailureKind::Execution { message: error.to_string() };
                result.failures.push(ConfigurationFailure::new(&assignment, tree, kind, None));
            }
        }
    }

    let result = result.finish();
    info!(tree = %result.tree, pass = result.pass, verified = result.configurations_verified, failures = result.failures.len(), "tree finished");

    Ok(result)
}

/// Validates raw nodes and runs [`build_and_verify_all`]
///
/// Configuration errors are returned before anything is created on the device.
pub fn build_and_verify_nodes<D, S>(device: &mut D, shaders: &S, nodes: Vec<TreeNode>, options: BuildOptions) -> Result<TestResult, EngineError>
where
    D: PipelineDevice,
    S: ShaderProvider,
{
    let tree = TreeConfiguration::new(nodes)?;
    build_and_verify_all(device, shaders, &tree, options)
}
