//! CPU reference device
//!
//! [`ReferenceDevice`] enforces the linking rules, keeps the merged state of every
//! pipeline it creates and rasterises the scenario from that state on the CPU. It
//! only understands the two scenario shaders published by [`reference_shaders`].
//! Pipelines and layouts it hands out are recorded so tests can inspect exactly
//! what the builder asked for.

use super::link::LinkedState;
use super::state::{
    ColorComponents, CullMode, DepthStencilState, FRAGMENT_SHADER_NAME, GraphicsPipelineDesc, PolygonMode, PrimitiveTopology, ScissorRect, ShaderCode,
    ShaderKind, ShaderStage, VERTEX_SHADER_NAME, VertexFormat,
};
use super::{DeviceError, PipelineDevice, ShaderCollection};
use crate::harness::{DepthImage, RenderOutput, RenderScenario, mask_color, to_rgba8};
use crate::stage::{PipelineCreateFlags, PipelineLayoutClass, StageSubsets};
use bytes::Bytes;
use image::{Luma, RgbaImage};
use std::sync::Arc;

/// Binary of the scenario vertex program
pub const REFERENCE_VERTEX_BINARY: &[u8] = b"pipelink-reference:vertex:z-from-uniform";

/// Binary of the scenario fragment program
pub const REFERENCE_FRAGMENT_BINARY: &[u8] = b"pipelink-reference:fragment:row-palette";

/// Shader collection holding the scenario programs under `"vert"` and `"frag"`
pub fn reference_shaders() -> ShaderCollection {
    ShaderCollection::new()
        .with(VERTEX_SHADER_NAME, Bytes::from_static(REFERENCE_VERTEX_BINARY))
        .with(FRAGMENT_SHADER_NAME, Bytes::from_static(REFERENCE_FRAGMENT_BINARY))
}

/// Programs the reference device can run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceProgram {
    /// Passes x/y through and takes z from the uniform by vertex index
    ScenarioVertex,
    /// Picks the top or bottom palette colour by framebuffer row
    ScenarioFragment,
}

impl ReferenceProgram {
    fn parse(kind: ShaderKind, name: &str, binary: &[u8]) -> Result<Self, DeviceError> {
        let program = match binary {
            REFERENCE_VERTEX_BINARY => Self::ScenarioVertex,
            REFERENCE_FRAGMENT_BINARY => Self::ScenarioFragment,
            _ => return Err(DeviceError::Native(format!("shader '{name}' is not a reference program"))),
        };

        let expected = match program {
            Self::ScenarioVertex => ShaderKind::Vertex,
            Self::ScenarioFragment => ShaderKind::Fragment,
        };
        if kind != expected {
            return Err(DeviceError::Native(format!("shader '{name}' is a {expected:?} program bound as {kind:?}")));
        }

        Ok(program)
    }

    fn resolve(stage: &ShaderStage<ReferenceShader>) -> Result<Self, DeviceError> {
        match &stage.code {
            ShaderCode::Module(module) => Ok(module.program),
            ShaderCode::Inline(binary) => Self::parse(stage.kind, &stage.name, binary),
        }
    }
}

/// Shader module handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceShader {
    pub id: usize,
    pub program: ReferenceProgram,
}

/// Pipeline layout handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceLayout {
    pub id: usize,
    pub class: PipelineLayoutClass,
}

/// A created pipeline or pipeline library
#[derive(Debug)]
pub struct ReferencePipeline {
    pub id: usize,
    pub label: String,
    /// Subsets declared through the library metadata
    pub library_subsets: Option<StageSubsets>,
    pub state: LinkedState<ReferenceShader>,
}

/// Failures the reference device can simulate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Reject creation of any description populating all of these subsets
    FailBuild(StageSubsets),
    /// Lose the scissor when pre-rasterization state reaches a complete pipeline through a library
    DropLinkedScissor,
}

/// Deterministic CPU implementation of [`PipelineDevice`]
#[derive(Debug)]
pub struct ReferenceDevice {
    supports_libraries: bool,
    faults: Vec<Fault>,
    next_id: usize,
    created: Vec<Arc<ReferencePipeline>>,
    shader_modules: Vec<ReferenceShader>,
    layouts: Vec<ReferenceLayout>,
    inline_shaders: usize,
    executions: usize,
}

impl Default for ReferenceDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceDevice {
    /// Creates a device with pipeline library support
    pub fn new() -> Self {
        Self {
            supports_libraries: true,
            faults: Vec::new(),
            next_id: 0,
            created: Vec::new(),
            shader_modules: Vec::new(),
            layouts: Vec::new(),
            inline_shaders: 0,
            executions: 0,
        }
    }

    /// Creates a device that only builds monolithic pipelines
    pub fn without_library_support() -> Self {
        Self { supports_libraries: false, ..Self::new() }
    }

    /// Enables a simulated failure
    pub fn inject(&mut self, fault: Fault) {
        self.faults.push(fault);
    }

    /// Every pipeline and library created so far, in creation order
    pub fn created_pipelines(&self) -> &[Arc<ReferencePipeline>] {
        &self.created
    }

    pub fn shader_modules(&self) -> &[ReferenceShader] {
        &self.shader_modules
    }

    pub fn layouts(&self) -> &[ReferenceLayout] {
        &self.layouts
    }

    /// Number of shader modules created while building pipelines
    pub fn inline_shaders(&self) -> usize {
        self.inline_shaders
    }

    pub fn executions(&self) -> usize {
        self.executions
    }

    /// Number of created pipelines still referenced outside the device
    pub fn live_pipelines(&self) -> usize {
        self.created.iter().filter(|pipeline| Arc::strong_count(pipeline) > 1).count()
    }

    fn allocate_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn count_inline(stage: Option<&ShaderStage<ReferenceShader>>) -> Result<usize, DeviceError> {
        match stage {
            Some(stage) if stage.code.is_inline() => ReferenceProgram::resolve(stage).map(|_| 1),
            _ => Ok(0),
        }
    }
}

impl PipelineDevice for ReferenceDevice {
    type Pipeline = Arc<ReferencePipeline>;
    type Layout = ReferenceLayout;
    type ShaderModule = ReferenceShader;

    fn supports_pipeline_libraries(&self) -> bool {
        self.supports_libraries
    }

    fn create_shader_module(&mut self, kind: ShaderKind, name: &str, binary: &Bytes) -> Result<Self::ShaderModule, DeviceError> {
        let program = ReferenceProgram::parse(kind, name, binary)?;
        let module = ReferenceShader { id: self.allocate_id(), program };
        self.shader_modules.push(module.clone());
        Ok(module)
    }

    fn create_pipeline_layout(&mut self, class: PipelineLayoutClass) -> Result<Self::Layout, DeviceError> {
        let layout = ReferenceLayout { id: self.allocate_id(), class };
        self.layouts.push(layout.clone());
        Ok(layout)
    }

    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc<Self::Pipeline, Self::Layout, Self::ShaderModule>) -> Result<Self::Pipeline, DeviceError> {
        let own = desc.populated_subsets();
        let is_partial_build = desc.flags.contains(PipelineCreateFlags::LIBRARY) || !desc.libraries.is_empty();
        if is_partial_build && !self.supports_libraries {
            return Err(DeviceError::Unsupported("pipeline libraries are not supported".to_string()));
        }

        if let Some(layout) = &desc.layout {
            if layout.class != desc.layout_class {
                return Err(DeviceError::Native(format!("layout {} is {:?} but the description says {:?}", layout.id, layout.class, desc.layout_class)));
            }
        }

        for fault in &self.faults {
            if let Fault::FailBuild(subsets) = fault {
                if own.contains(*subsets) && !subsets.is_empty() {
                    return Err(DeviceError::Native(format!("injected failure while building {{{own}}}")));
                }
            }
        }

        let linked: Vec<&LinkedState<ReferenceShader>> = desc.libraries.iter().map(|library| &library.state).collect();
        let mut state = LinkedState::assemble(desc, &linked)?;

        let inline = Self::count_inline(desc.pre_rasterization.as_ref().map(|state| &state.vertex_shader))?
            + Self::count_inline(desc.fragment_shader.as_ref().map(|state| &state.fragment_shader))?;
        self.inline_shaders += inline;

        if self.faults.contains(&Fault::DropLinkedScissor) && state.is_executable() && !own.contains(StageSubsets::PRE_RASTERIZATION_SHADERS) {
            if let Some(pre_rasterization) = &mut state.pre_rasterization {
                pre_rasterization.scissor = ScissorRect { x: 0, y: 0, width: u32::MAX / 2, height: u32::MAX / 2 };
            }
        }

        let pipeline = Arc::new(ReferencePipeline {
            id: self.allocate_id(),
            label: desc.label.clone(),
            library_subsets: desc.library_subsets,
            state,
        });
        self.created.push(pipeline.clone());
        Ok(pipeline)
    }

    fn execute(&mut self, pipeline: &Self::Pipeline, layout: &Self::Layout, scenario: &RenderScenario) -> Result<RenderOutput, DeviceError> {
        self.executions += 1;

        if layout.class != PipelineLayoutClass::Shared {
            return Err(DeviceError::Execution(format!("pipeline must be bound with the shared layout, got {:?}", layout.class)));
        }

        let state = &pipeline.state;
        if !state.is_executable() {
            return Err(DeviceError::Execution(format!("'{}' is a pipeline library and cannot be bound", pipeline.label)));
        }

        let missing = |subset: &str| DeviceError::Execution(format!("linked pipeline has no {subset} state"));
        let vertex_input = state.vertex_input.as_ref().ok_or_else(|| missing("vertex input"))?;
        let pre_rasterization = state.pre_rasterization.as_ref().ok_or_else(|| missing("pre-rasterization"))?;
        let fragment_shader = state.fragment_shader.as_ref().ok_or_else(|| missing("fragment shader"))?;
        let fragment_output = state.fragment_output.as_ref().ok_or_else(|| missing("fragment output"))?;

        if vertex_input.format != VertexFormat::Float32x4 || vertex_input.topology != PrimitiveTopology::TriangleList {
            return Err(DeviceError::Unsupported(format!("vertex input {:?} {:?}", vertex_input.format, vertex_input.topology)));
        }
        let rasterization = &pre_rasterization.rasterization;
        if rasterization.polygon_mode != PolygonMode::Fill || rasterization.cull_mode != CullMode::None {
            return Err(DeviceError::Unsupported(format!("rasterization {:?} with culling {:?}", rasterization.polygon_mode, rasterization.cull_mode)));
        }
        if fragment_output.blend_enable {
            return Err(DeviceError::Unsupported("blending".to_string()));
        }

        if ReferenceProgram::resolve(&pre_rasterization.vertex_shader)? != ReferenceProgram::ScenarioVertex {
            return Err(DeviceError::Execution("vertex stage does not run the scenario vertex program".to_string()));
        }
        if ReferenceProgram::resolve(&fragment_shader.fragment_shader)? != ReferenceProgram::ScenarioFragment {
            return Err(DeviceError::Execution("fragment stage does not run the scenario fragment program".to_string()));
        }

        let mut rasterizer = Rasterizer::new(scenario);
        let viewport = pre_rasterization.viewport;

        for draw in &scenario.draws {
            let vertices: Vec<[f32; 3]> = draw
                .clone()
                .map(|index| {
                    let position = scenario.vertices.get(index as usize).ok_or_else(|| DeviceError::Execution(format!("vertex {index} out of range")))?;
                    // Scenario vertex program
                    let z = if index < 3 { scenario.z_coord[0] } else { scenario.z_coord[1] };

                    Ok([
                        viewport.x + (position[0] + 1.0) * viewport.width / 2.0,
                        viewport.y + (position[1] + 1.0) * viewport.height / 2.0,
                        viewport.min_depth + z * (viewport.max_depth - viewport.min_depth),
                    ])
                })
                .collect::<Result<_, DeviceError>>()?;

            for triangle in vertices.chunks_exact(3) {
                rasterizer.draw_triangle([triangle[0], triangle[1], triangle[2]], |_, y| {
                    // Scenario fragment program
                    if y < scenario.height / 2 { scenario.palette_top } else { scenario.palette_bottom }
                }, &pre_rasterization.scissor, fragment_shader.depth_stencil, fragment_output.color_write_mask);
            }
        }

        Ok(rasterizer.finish())
    }
}

/// Edge function of `point` against the directed edge `a -> b`
fn edge(a: [f32; 3], b: [f32; 3], point: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (point[1] - a[1]) - (b[1] - a[1]) * (point[0] - a[0])
}

/// Top-left fill rule for a positively oriented triangle in y-down framebuffer space
fn is_top_left(a: [f32; 3], b: [f32; 3]) -> bool {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    dy < 0.0 || (dy == 0.0 && dx > 0.0)
}

fn covers(weight: f32, a: [f32; 3], b: [f32; 3]) -> bool {
    weight > 0.0 || (weight == 0.0 && is_top_left(a, b))
}

struct Rasterizer {
    width: u32,
    height: u32,
    color: Vec<[f32; 4]>,
    depth: Vec<f32>,
}

impl Rasterizer {
    fn new(scenario: &RenderScenario) -> Self {
        let pixel_count = (scenario.width * scenario.height) as usize;

        Self {
            width: scenario.width,
            height: scenario.height,
            color: vec![scenario.clear_color; pixel_count],
            depth: vec![scenario.clear_depth; pixel_count],
        }
    }

    fn draw_triangle(
        &mut self,
        [a, mut b, mut c]: [[f32; 3]; 3],
        shade: impl Fn(u32, u32) -> [f32; 4],
        scissor: &ScissorRect,
        depth_stencil: DepthStencilState,
        write_mask: ColorComponents,
    ) {
        let mut area = edge(a, b, [c[0], c[1]]);
        if area == 0.0 {
            return;
        }
        if area < 0.0 {
            std::mem::swap(&mut b, &mut c);
            area = -area;
        }

        for y in 0..self.height {
            for x in 0..self.width {
                if !scissor.contains(x, y) {
                    continue;
                }

                let center = [x as f32 + 0.5, y as f32 + 0.5];
                let weight_a = edge(b, c, center);
                let weight_b = edge(c, a, center);
                let weight_c = edge(a, b, center);

                if !(covers(weight_a, b, c) && covers(weight_b, c, a) && covers(weight_c, a, b)) {
                    continue;
                }

                let index = (y * self.width + x) as usize;
                let depth = (weight_a * a[2] + weight_b * b[2] + weight_c * c[2]) / area;

                if depth_stencil.depth_test && !depth_stencil.compare.test(depth, self.depth[index]) {
                    continue;
                }
                if depth_stencil.depth_write {
                    self.depth[index] = depth;
                }

                self.color[index] = mask_color(shade(x, y), self.color[index], write_mask);
            }
        }
    }

    fn finish(self) -> RenderOutput {
        let width = self.width;
        let color = RgbaImage::from_fn(self.width, self.height, |x, y| to_rgba8(self.color[(y * width + x) as usize]));
        let depth = DepthImage::from_fn(self.width, self.height, |x, y| Luma([self.depth[(y * width + x) as usize]]));

        RenderOutput { color, depth }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::state::{CompareOp, RenderPassLayout};
    use crate::harness::{VerificationHarness, quantize_depth};

    fn monolithic(device: &mut ReferenceDevice, layout: &ReferenceLayout) -> Arc<ReferencePipeline> {
        let render_pass = RenderPassLayout::new(16, 16);
        let vertex = device.create_shader_module(ShaderKind::Vertex, "vert", &Bytes::from_static(REFERENCE_VERTEX_BINARY)).unwrap();

        let desc = GraphicsPipelineDesc::new("monolithic", PipelineCreateFlags::empty())
            .with_layout(Some(layout.clone()), layout.class)
            .with_render_pass(render_pass)
            .with_vertex_input()
            .with_pre_rasterization(ShaderStage::new(ShaderKind::Vertex, "vert", ShaderCode::Module(vertex)), &render_pass)
            .with_fragment_shader(ShaderStage::new(ShaderKind::Fragment, "frag", ShaderCode::Inline(Bytes::from_static(REFERENCE_FRAGMENT_BINARY))))
            .with_fragment_output();

        device.create_graphics_pipeline(&desc).unwrap()
    }

    #[test]
    fn test_monolithic_render_matches_reference() {
        let mut device = ReferenceDevice::new();
        let layout = device.create_pipeline_layout(PipelineLayoutClass::Shared).unwrap();
        let pipeline = monolithic(&mut device, &layout);

        let harness = VerificationHarness::default();
        let report = harness.verify(&mut device, &pipeline, &layout).unwrap();

        assert!(report.passed(), "{report:?}");
        assert_eq!(quantize_depth(&report.output.depth), *harness.reference_depth());
        assert_eq!(device.inline_shaders(), 1);
        assert_eq!(device.shader_modules().len(), 1);
    }

    #[test]
    fn test_top_left_rule_assigns_diagonal_once() {
        let scenario = RenderScenario::standard();
        let mut rasterizer = Rasterizer::new(&scenario);
        let full = ScissorRect { x: 0, y: 0, width: 16, height: 16 };
        let depth = DepthStencilState { depth_test: false, depth_write: true, compare: CompareOp::Always };
        let mask = ColorComponents::all();

        rasterizer.draw_triangle([[0.0, 0.0, 0.25], [16.0, 0.0, 0.25], [0.0, 16.0, 0.25]], |_, _| [1.0, 0.0, 0.0, 1.0], &full, depth, mask);
        let first: usize = rasterizer.depth.iter().filter(|&&depth| depth == 0.25).count();

        rasterizer.draw_triangle([[0.0, 16.0, 0.75], [16.0, 0.0, 0.75], [16.0, 16.0, 0.75]], |_, _| [0.0, 1.0, 0.0, 1.0], &full, depth, mask);
        let second: usize = rasterizer.depth.iter().filter(|&&depth| depth == 0.75).count();

        // 120 pixels strictly above the diagonal, 136 on or below it
        assert_eq!(first, 120);
        assert_eq!(second, 136);
        assert_eq!(rasterizer.depth.iter().filter(|&&depth| depth == 0.25).count(), 120);
    }

    #[test]
    fn test_execute_rejects_libraries_and_partial_layouts() {
        let mut device = ReferenceDevice::new();
        let shared = device.create_pipeline_layout(PipelineLayoutClass::Shared).unwrap();
        let vertex_only = device.create_pipeline_layout(PipelineLayoutClass::VertexOnly).unwrap();
        let pipeline = monolithic(&mut device, &shared);

        let scenario = RenderScenario::standard();
        assert!(matches!(device.execute(&pipeline, &vertex_only, &scenario), Err(DeviceError::Execution(_))));

        let desc = GraphicsPipelineDesc::new("vertex input", PipelineCreateFlags::LIBRARY)
            .with_library_subsets(Some(StageSubsets::VERTEX_INPUT))
            .with_vertex_input();
        let library = device.create_graphics_pipeline(&desc).unwrap();
        assert!(matches!(device.execute(&library, &shared, &scenario), Err(DeviceError::Execution(_))));
    }

    #[test]
    fn test_library_support_toggle() {
        let mut device = ReferenceDevice::without_library_support();
        assert!(!device.supports_pipeline_libraries());

        let desc = GraphicsPipelineDesc::new("vertex input", PipelineCreateFlags::LIBRARY)
            .with_library_subsets(Some(StageSubsets::VERTEX_INPUT))
            .with_vertex_input();
        assert!(matches!(device.create_graphics_pipeline(&desc), Err(DeviceError::Unsupported(_))));
    }

    #[test]
    fn test_fault_injection() {
        let mut device = ReferenceDevice::new();
        device.inject(Fault::FailBuild(StageSubsets::VERTEX_INPUT));

        let desc = GraphicsPipelineDesc::new("vertex input", PipelineCreateFlags::LIBRARY)
            .with_library_subsets(Some(StageSubsets::VERTEX_INPUT))
            .with_vertex_input();
        assert!(matches!(device.create_graphics_pipeline(&desc), Err(DeviceError::Native(_))));
        assert!(device.created_pipelines().is_empty());
    }

    #[test]
    fn test_shader_kind_mismatch() {
        let mut device = ReferenceDevice::new();
        let result = device.create_shader_module(ShaderKind::Fragment, "vert", &Bytes::from_static(REFERENCE_VERTEX_BINARY));
        assert!(matches!(result, Err(DeviceError::Native(_))));

        let result = device.create_shader_module(ShaderKind::Vertex, "vert", &Bytes::from_static(b"garbage"));
        assert!(matches!(result, Err(DeviceError::Native(_))));
    }
}
