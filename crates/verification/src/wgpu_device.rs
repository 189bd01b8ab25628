//! wgpu implementation of the pipeline device
//!
//! wgpu has no pipeline library objects, so fragments are validated and merged
//! on the host with [`LinkedState::assemble`] and a native render pipeline is
//! only compiled once a description yields executable state. Shaders passed
//! inline are compiled at that point as well.

use crate::wgpu_helpers::{COLOR_FORMAT, DEPTH_FORMAT, create_attachment, read_color_texture, read_depth_texture};
use bytemuck::{Pod, Zeroable};
use bytes::Bytes;
use pipelink::device::state::{ColorComponents, CompareOp, CullMode, FrontFace, PolygonMode, PrimitiveTopology, ShaderCode, ShaderStage, VertexFormat};
use pipelink::device::{DeviceError, GraphicsPipelineDesc, LinkedState, PipelineDevice, ShaderKind};
use pipelink::harness::{RenderOutput, RenderScenario};
use pipelink::stage::PipelineLayoutClass;
use std::sync::Arc;
use tracing::debug;
use wgpu::util::DeviceExt;

/// Vertex shader uniform, bound at group 0
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DepthUniform {
    z: [f32; 4],
}

/// Fragment shader uniform, bound at group 1
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PaletteUniform {
    top: [f32; 4],
    bottom: [f32; 4],
    /// `x` holds the first row receiving the bottom colour
    split: [f32; 4],
}

/// Pipeline layout handle
#[derive(Debug)]
pub struct WgpuLayout {
    pub class: PipelineLayoutClass,
    pub layout: wgpu::PipelineLayout,
}

/// A created pipeline or emulated pipeline library
#[derive(Debug)]
pub struct WgpuPipeline {
    pub label: String,
    pub state: LinkedState<wgpu::ShaderModule>,
    /// Native pipeline; only present when the state is executable
    pub render_pipeline: Option<wgpu::RenderPipeline>,
}

/// Pipeline device backed by a wgpu adapter
#[derive(Debug)]
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    vertex_bind_group_layout: wgpu::BindGroupLayout,
    fragment_bind_group_layout: wgpu::BindGroupLayout,
    blank_bind_group_layout: wgpu::BindGroupLayout,
    /// Layout every native pipeline is compiled against
    shared_layout: wgpu::PipelineLayout,
}

impl WgpuDevice {
    /// Creates a device on the highest performance adapter available
    ///
    /// # Returns
    /// A new device instance or an error if initialization fails
    pub async fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None, // Rendering is offscreen only
                force_fallback_adapter: false,
            })
            .await?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Pipeline Library Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: Default::default(),
            })
            .await?;

        Ok(Self::from_device(device, queue))
    }

    /// Wraps an existing device and queue
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let uniform_entry = |visibility| wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let vertex_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Vertex bind group layout"),
            entries: &[uniform_entry(wgpu::ShaderStages::VERTEX)],
        });
        let fragment_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Fragment bind group layout"),
            entries: &[uniform_entry(wgpu::ShaderStages::FRAGMENT)],
        });
        let blank_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blank bind group layout"),
            entries: &[],
        });

        let shared_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Shared pipeline layout"),
            bind_group_layouts: &[&vertex_bind_group_layout, &fragment_bind_group_layout],
            push_constant_ranges: &[],
        });

        Self {
            device,
            queue,
            vertex_bind_group_layout,
            fragment_bind_group_layout,
            blank_bind_group_layout,
            shared_layout,
        }
    }

    /// Runs `create` inside a validation error scope
    fn validated<T>(&self, create: impl FnOnce(&wgpu::Device) -> T) -> Result<T, DeviceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let object = create(&self.device);

        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(DeviceError::Native(error.to_string())),
            None => Ok(object),
        }
    }

    fn compile_shader(&self, name: &str, source: &str) -> Result<wgpu::ShaderModule, DeviceError> {
        self.validated(|device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        })
    }

    /// Returns the module of a stage, compiling inline code on demand
    fn resolve_module(&self, stage: &ShaderStage<wgpu::ShaderModule>) -> Result<wgpu::ShaderModule, DeviceError> {
        match &stage.code {
            ShaderCode::Module(module) => Ok(module.clone()),
            ShaderCode::Inline(binary) => {
                let source = std::str::from_utf8(binary).map_err(|e| DeviceError::Native(format!("shader '{}' is not WGSL text: {e}", stage.name)))?;
                self.compile_shader(&stage.name, source)
            }
        }
    }

    /// Compiles a native render pipeline from complete merged state
    fn compile_pipeline(&self, label: &str, state: &LinkedState<wgpu::ShaderModule>) -> Result<wgpu::RenderPipeline, DeviceError> {
        let missing = |subset: &str| DeviceError::Native(format!("'{label}' has no {subset} state"));
        let vertex_input = state.vertex_input.as_ref().ok_or_else(|| missing("vertex input"))?;
        let pre_rasterization = state.pre_rasterization.as_ref().ok_or_else(|| missing("pre-rasterization"))?;
        let fragment_shader = state.fragment_shader.as_ref().ok_or_else(|| missing("fragment shader"))?;
        let fragment_output = state.fragment_output.as_ref().ok_or_else(|| missing("fragment output"))?;

        let vertex_module = self.resolve_module(&pre_rasterization.vertex_shader)?;
        let fragment_module = self.resolve_module(&fragment_shader.fragment_shader)?;

        let attributes = [wgpu::VertexAttribute {
            format: vertex_format(vertex_input.format),
            offset: vertex_input.offset,
            shader_location: vertex_input.location,
        }];
        let rasterization = &pre_rasterization.rasterization;
        let depth_stencil = &fragment_shader.depth_stencil;
        let multisample = state.fragment_output_multisample.or(state.fragment_shader_multisample).unwrap_or_default();

        self.validated(|device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&self.shared_layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: Some(pre_rasterization.vertex_shader.entry_point.as_str()),
                    compilation_options: Default::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: vertex_input.stride,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &attributes,
                    }],
                },
                primitive: wgpu::PrimitiveState {
                    topology: primitive_topology(vertex_input.topology),
                    strip_index_format: None,
                    front_face: match rasterization.front_face {
                        FrontFace::CounterClockwise => wgpu::FrontFace::Ccw,
                        FrontFace::Clockwise => wgpu::FrontFace::Cw,
                    },
                    cull_mode: match rasterization.cull_mode {
                        CullMode::None => None,
                        CullMode::Front => Some(wgpu::Face::Front),
                        CullMode::Back => Some(wgpu::Face::Back),
                    },
                    unclipped_depth: false,
                    polygon_mode: match rasterization.polygon_mode {
                        PolygonMode::Fill => wgpu::PolygonMode::Fill,
                        PolygonMode::Line => wgpu::PolygonMode::Line,
                        PolygonMode::Point => wgpu::PolygonMode::Point,
                    },
                    conservative: false,
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: depth_stencil.depth_write,
                    depth_compare: if depth_stencil.depth_test { compare_function(depth_stencil.compare) } else { wgpu::CompareFunction::Always },
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState {
                    count: multisample.sample_count,
                    mask: !0,
                    alpha_to_coverage_enabled: multisample.alpha_to_coverage,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: Some(fragment_shader.fragment_shader.entry_point.as_str()),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: fragment_output.blend_enable.then_some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: color_writes(fragment_output.color_write_mask),
                    })],
                }),
                multiview: None,
                cache: None,
            })
        })
    }

    /// Records the scenario into fresh attachments and reads them back
    fn render(&self, pipeline: &WgpuPipeline, render_pipeline: &wgpu::RenderPipeline, scenario: &RenderScenario) -> Result<RenderOutput, Box<dyn std::error::Error>> {
        let pre_rasterization = pipeline.state.pre_rasterization.as_ref().ok_or("linked pipeline has no pre-rasterization state")?;
        let (width, height) = (scenario.width, scenario.height);

        let color_texture = create_attachment(&self.device, "Color attachment", width, height, COLOR_FORMAT);
        let depth_texture = create_attachment(&self.device, "Depth attachment", width, height, DEPTH_FORMAT);
        let color_view = color_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Scenario vertex buffer"),
            usage: wgpu::BufferUsages::VERTEX,
            contents: bytemuck::cast_slice(&scenario.vertices),
        });
        let depth_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Depth uniform buffer"),
            usage: wgpu::BufferUsages::UNIFORM,
            contents: bytemuck::bytes_of(&DepthUniform { z: scenario.z_coord }),
        });
        let palette_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Palette uniform buffer"),
            usage: wgpu::BufferUsages::UNIFORM,
            contents: bytemuck::bytes_of(&PaletteUniform {
                top: scenario.palette_top,
                bottom: scenario.palette_bottom,
                split: [(height / 2) as f32, 0.0, 0.0, 0.0],
            }),
        });

        let vertex_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Vertex bind group"),
            layout: &self.vertex_bind_group_layout,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: depth_buffer.as_entire_binding() }],
        });
        let fragment_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Fragment bind group"),
            layout: &self.fragment_bind_group_layout,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: palette_buffer.as_entire_binding() }],
        });

        let [r, g, b, a] = scenario.clear_color.map(f64::from);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Scenario Encoder") });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Scenario pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(scenario.clear_depth),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let viewport = pre_rasterization.viewport;
            pass.set_viewport(viewport.x, viewport.y, viewport.width, viewport.height, viewport.min_depth, viewport.max_depth);

            // wgpu rejects scissors reaching past the attachment
            let scissor = pre_rasterization.scissor;
            let x = scissor.x.min(width);
            let y = scissor.y.min(height);
            pass.set_scissor_rect(x, y, scissor.width.min(width - x), scissor.height.min(height - y));

            pass.set_pipeline(render_pipeline);
            pass.set_bind_group(0, &vertex_bind_group, &[]);
            pass.set_bind_group(1, &fragment_bind_group, &[]);
            pass.set_vertex_buffer(0, vertex_buffer.slice(..));

            for draw in &scenario.draws {
                pass.draw(draw.clone(), 0..1);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        let color = read_color_texture(&self.device, &self.queue, &color_texture)?;
        let depth = read_depth_texture(&self.device, &self.queue, &depth_texture)?;

        Ok(RenderOutput { color, depth })
    }
}

impl PipelineDevice for WgpuDevice {
    type Pipeline = Arc<WgpuPipeline>;
    type Layout = Arc<WgpuLayout>;
    type ShaderModule = wgpu::ShaderModule;

    fn supports_pipeline_libraries(&self) -> bool {
        true
    }

    fn create_shader_module(&mut self, kind: ShaderKind, name: &str, binary: &Bytes) -> Result<Self::ShaderModule, DeviceError> {
        let source = std::str::from_utf8(binary).map_err(|e| DeviceError::Native(format!("{kind:?} shader '{name}' is not WGSL text: {e}")))?;
        self.compile_shader(name, source)
    }

    fn create_pipeline_layout(&mut self, class: PipelineLayoutClass) -> Result<Self::Layout, DeviceError> {
        let bind_group_layouts: Vec<&wgpu::BindGroupLayout> = match class {
            PipelineLayoutClass::Shared => vec![&self.vertex_bind_group_layout, &self.fragment_bind_group_layout],
            PipelineLayoutClass::VertexOnly => vec![&self.vertex_bind_group_layout, &self.blank_bind_group_layout],
            PipelineLayoutClass::FragmentOnly => vec![&self.blank_bind_group_layout, &self.fragment_bind_group_layout],
            PipelineLayoutClass::None => Vec::new(),
        };

        let label = format!("{class:?} pipeline layout");
        let layout = self.validated(|device| {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label.as_str()),
                bind_group_layouts: &bind_group_layouts,
                push_constant_ranges: &[],
            })
        })?;

        Ok(Arc::new(WgpuLayout { class, layout }))
    }

    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc<Self::Pipeline, Self::Layout, Self::ShaderModule>) -> Result<Self::Pipeline, DeviceError> {
        if let Some(layout) = &desc.layout {
            if layout.class != desc.layout_class {
                return Err(DeviceError::Native(format!("layout is {:?} but the description says {:?}", layout.class, desc.layout_class)));
            }
        }

        let linked: Vec<&LinkedState<wgpu::ShaderModule>> = desc.libraries.iter().map(|library| &library.state).collect();
        let state = LinkedState::assemble(desc, &linked)?;

        let render_pipeline = if state.is_executable() { Some(self.compile_pipeline(&desc.label, &state)?) } else { None };
        debug!(label = %desc.label, own = %state.own, covered = %state.covered, compiled = render_pipeline.is_some(), "created pipeline");

        Ok(Arc::new(WgpuPipeline { label: desc.label.clone(), state, render_pipeline }))
    }

    fn execute(&mut self, pipeline: &Self::Pipeline, layout: &Self::Layout, scenario: &RenderScenario) -> Result<RenderOutput, DeviceError> {
        if layout.class != PipelineLayoutClass::Shared {
            return Err(DeviceError::Execution(format!("pipeline must be bound with the shared layout, got {:?}", layout.class)));
        }

        let render_pipeline = pipeline
            .render_pipeline
            .as_ref()
            .ok_or_else(|| DeviceError::Execution(format!("'{}' is a pipeline library and cannot be bound", pipeline.label)))?;

        if let Some(render_pass) = pipeline.state.render_pass {
            if (render_pass.width, render_pass.height) != (scenario.width, scenario.height) {
                return Err(DeviceError::Execution(format!(
                    "pipeline was built for {}x{} attachments, scenario renders {}x{}",
                    render_pass.width, render_pass.height, scenario.width, scenario.height
                )));
            }
        }

        self.render(pipeline, render_pipeline, scenario).map_err(|e| DeviceError::Execution(e.to_string()))
    }
}

fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
    }
}

fn primitive_topology(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
        PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
        PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

fn compare_function(compare: CompareOp) -> wgpu::CompareFunction {
    match compare {
        CompareOp::Never => wgpu::CompareFunction::Never,
        CompareOp::Less => wgpu::CompareFunction::Less,
        CompareOp::Equal => wgpu::CompareFunction::Equal,
        CompareOp::LessOrEqual => wgpu::CompareFunction::LessEqual,
        CompareOp::Greater => wgpu::CompareFunction::Greater,
        CompareOp::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareOp::GreaterOrEqual => wgpu::CompareFunction::GreaterEqual,
        CompareOp::Always => wgpu::CompareFunction::Always,
    }
}

fn color_writes(mask: ColorComponents) -> wgpu::ColorWrites {
    let mut writes = wgpu::ColorWrites::empty();
    writes.set(wgpu::ColorWrites::RED, mask.contains(ColorComponents::R));
    writes.set(wgpu::ColorWrites::GREEN, mask.contains(ColorComponents::G));
    writes.set(wgpu::ColorWrites::BLUE, mask.contains(ColorComponents::B));
    writes.set(wgpu::ColorWrites::ALPHA, mask.contains(ColorComponents::A));
    writes
}
