//! Device and shader-provider boundaries
//!
//! The engine never talks to a graphics API directly. It asks a [`ShaderProvider`]
//! for shader binaries and a [`PipelineDevice`] for shader modules, layouts,
//! pipelines and scenario execution. [`reference::ReferenceDevice`] implements the
//! device on the CPU; the verification crate implements it on top of wgpu.

pub mod link;
pub mod reference;
pub mod state;

use crate::harness::{RenderOutput, RenderScenario};
use crate::stage::PipelineLayoutClass;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt::Debug;
use thiserror::Error;

pub use link::{LinkViolation, LinkedState};
pub use state::{GraphicsPipelineDesc, ShaderCode, ShaderKind, ShaderStage};

/// Errors raised by a shader provider
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShaderError {
    #[error("shader binary '{0}' not found")]
    NotFound(String),
}

/// Source of shader binaries, looked up by stage name (`"vert"`, `"frag"`)
pub trait ShaderProvider {
    fn binary(&self, name: &str) -> Result<Bytes, ShaderError>;
}

/// In-memory name to binary map
#[derive(Debug, Clone, Default)]
pub struct ShaderCollection {
    binaries: HashMap<String, Bytes>,
}

impl ShaderCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a binary, builder style
    pub fn with(mut self, name: &str, binary: impl Into<Bytes>) -> Self {
        self.insert(name, binary);
        self
    }

    pub fn insert(&mut self, name: &str, binary: impl Into<Bytes>) {
        self.binaries.insert(name.to_string(), binary.into());
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.binaries.keys().map(String::as_str)
    }
}

impl ShaderProvider for ShaderCollection {
    fn binary(&self, name: &str) -> Result<Bytes, ShaderError> {
        self.binaries.get(name).cloned().ok_or_else(|| ShaderError::NotFound(name.to_string()))
    }
}

/// Errors raised by a device
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    /// The description breaks a pipeline-library linking rule
    #[error("pipeline rejected: {0}")]
    Rejected(#[from] LinkViolation),
    /// The underlying API reported an error
    #[error("native error: {0}")]
    Native(String),
    /// The device cannot express the requested state
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Scenario submission or readback failed
    #[error("execution failed: {0}")]
    Execution(String),
}

/// Pipeline object creation and scenario execution
///
/// Calls are made from a single thread; creation is assumed non-reentrant.
pub trait PipelineDevice {
    /// Handle of a pipeline or pipeline library; dropping the last clone destroys it
    type Pipeline: Clone + Debug;
    type Layout: Clone + Debug;
    type ShaderModule: Clone + Debug;

    /// Whether separately built pipeline libraries can be linked
    fn supports_pipeline_libraries(&self) -> bool;

    /// Creates a shader module ahead of pipeline creation
    fn create_shader_module(&mut self, kind: ShaderKind, name: &str, binary: &Bytes) -> Result<Self::ShaderModule, DeviceError>;

    /// Creates the pipeline layout for a layout class
    fn create_pipeline_layout(&mut self, class: PipelineLayoutClass) -> Result<Self::Layout, DeviceError>;

    /// Creates a pipeline or pipeline library from a description
    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc<Self::Pipeline, Self::Layout, Self::ShaderModule>) -> Result<Self::Pipeline, DeviceError>;

    /// Binds `pipeline` with `layout`, renders the scenario and waits for the readback
    fn execute(&mut self, pipeline: &Self::Pipeline, layout: &Self::Layout, scenario: &RenderScenario) -> Result<RenderOutput, DeviceError>;
}

/// Pipeline description with a device's handle types
pub type PipelineDesc<D> = GraphicsPipelineDesc<<D as PipelineDevice>::Pipeline, <D as PipelineDevice>::Layout, <D as PipelineDevice>::ShaderModule>;
