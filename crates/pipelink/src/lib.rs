//! Pipeline-library composition and linking
//!
//! This crate splits a graphics pipeline into the four stage subsets (vertex
//! input, pre-rasterization shaders, fragment shader and fragment output
//! interface), distributes them over the nodes of a tree, builds every node
//! bottom-up as a partial pipeline library and links the fragments into a
//! complete pipeline. Every distinct assignment of subsets to nodes is rendered
//! against a fixed scenario and compared with reference images.

pub mod builder;
pub mod device;
pub mod engine;
pub mod enumerate;
pub mod harness;
pub mod linker;
pub mod predefined;
pub mod stage;
pub mod tree;

pub use builder::{BuildError, LinkedPipeline, PipelineTreeBuilder};
pub use device::{DeviceError, PipelineDevice, ShaderCollection, ShaderProvider};
pub use engine::{BuildOptions, EngineError, TestResult, build_and_verify_all, build_and_verify_nodes};
pub use enumerate::{StageAssignment, unique_assignments};
pub use harness::{RenderScenario, VerificationHarness};
pub use predefined::{TestCase, TestGroup, predefined_trees, test_cases};
pub use stage::{StageSubset, StageSubsets};
pub use tree::{TreeConfiguration, TreeNode};
