//! GPU verification for pipeline-library trees
//!
//! This crate runs the build-and-verify engine against a real GPU through wgpu,
//! using WGSL versions of the scenario shaders.

pub mod wgpu_device;
pub mod wgpu_helpers;

use pipelink::ShaderCollection;
use pipelink::device::state::{FRAGMENT_SHADER_NAME, VERTEX_SHADER_NAME};

pub use wgpu_device::WgpuDevice;

/// WGSL source of the scenario vertex program
pub const SCENARIO_VERTEX_WGSL: &str = include_str!("../shaders/scenario_vert.wgsl");

/// WGSL source of the scenario fragment program
pub const SCENARIO_FRAGMENT_WGSL: &str = include_str!("../shaders/scenario_frag.wgsl");

/// Shader collection holding the WGSL scenario programs under `"vert"` and `"frag"`
pub fn wgsl_shaders() -> ShaderCollection {
    ShaderCollection::new()
        .with(VERTEX_SHADER_NAME, SCENARIO_VERTEX_WGSL.as_bytes())
        .with(FRAGMENT_SHADER_NAME, SCENARIO_FRAGMENT_WGSL.as_bytes())
}
