//! Pipeline state descriptions
//!
//! Each stage subset populates one independent block of a [`GraphicsPipelineDesc`].
//! The population functions are pure: they take the description by value and
//! return it with the block filled in, so the builder can dispatch over the
//! subsets a node owns without any shared mutable state.

use crate::stage::{PipelineCreateFlags, PipelineLayoutClass, StageSubsets};
use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Stride of one vertex in the scenario's vertex buffer (a single `vec4<f32>`)
pub const VERTEX_STRIDE: u64 = 16;

/// Entry point used by every scenario shader
pub const SHADER_ENTRY_POINT: &str = "main";

/// Name of the vertex shader in the shader provider
pub const VERTEX_SHADER_NAME: &str = "vert";

/// Name of the fragment shader in the shader provider
pub const FRAGMENT_SHADER_NAME: &str = "frag";

/// Attribute formats understood by the devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    TriangleList,
    TriangleStrip,
}

/// Vertex bindings, attributes and input assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexInputState {
    pub binding: u32,
    pub stride: u64,
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u64,
    pub topology: PrimitiveTopology,
}

/// Viewport transform; depth range in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ScissorRect {
    /// Returns true if the pixel at `(x, y)` lies inside the rectangle
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolygonMode {
    Fill,
    Line,
    Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrontFace {
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterizationState {
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub line_width: f32,
}

/// Shader pipeline stage a module is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderKind {
    Vertex,
    Fragment,
}

/// Shader code attached to a stage
///
/// `Module` refers to a shader module created ahead of the pipeline. `Inline`
/// carries the binary so the device creates the module while building the
/// pipeline (delayed shader creation).
#[derive(Debug, Clone)]
pub enum ShaderCode<M> {
    Module(M),
    Inline(Bytes),
}

impl<M> ShaderCode<M> {
    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline(_))
    }
}

#[derive(Debug, Clone)]
pub struct ShaderStage<M> {
    pub kind: ShaderKind,
    /// Name the binary was fetched under
    pub name: String,
    pub entry_point: String,
    pub code: ShaderCode<M>,
}

impl<M> ShaderStage<M> {
    pub fn new(kind: ShaderKind, name: &str, code: ShaderCode<M>) -> Self {
        Self { kind, name: name.to_string(), entry_point: SHADER_ENTRY_POINT.to_string(), code }
    }
}

/// Vertex shader plus the fixed-function state up to rasterization
#[derive(Debug, Clone)]
pub struct PreRasterizationState<M> {
    pub vertex_shader: ShaderStage<M>,
    pub viewport: Viewport,
    pub scissor: ScissorRect,
    pub rasterization: RasterizationState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

impl CompareOp {
    /// Evaluates `reference <op> stored`
    pub fn test(self, reference: f32, stored: f32) -> bool {
        match self {
            Self::Never => false,
            Self::Less => reference < stored,
            Self::Equal => reference == stored,
            Self::LessOrEqual => reference <= stored,
            Self::Greater => reference > stored,
            Self::NotEqual => reference != stored,
            Self::GreaterOrEqual => reference >= stored,
            Self::Always => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub compare: CompareOp,
}

/// Fragment shader plus depth state
#[derive(Debug, Clone)]
pub struct FragmentShaderState<M> {
    pub fragment_shader: ShaderStage<M>,
    pub depth_stencil: DepthStencilState,
}

bitflags! {
    /// Colour components written to the colour attachment
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ColorComponents: u8 {
        const R = 1 << 0;
        const G = 1 << 1;
        const B = 1 << 2;
        const A = 1 << 3;
    }
}

impl ColorComponents {
    /// Write mask used by the scenario, red is never written
    pub const NO_RED: Self = Self::G.union(Self::B).union(Self::A);
}

/// Colour blend and attachment output state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentOutputState {
    pub blend_enable: bool,
    pub color_write_mask: ColorComponents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultisampleState {
    pub sample_count: u32,
    pub sample_shading: bool,
    pub alpha_to_coverage: bool,
}

impl Default for MultisampleState {
    fn default() -> Self {
        Self { sample_count: 1, sample_shading: false, alpha_to_coverage: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentFormat {
    Rgba8Unorm,
    Depth32Float,
}

/// Attachments the pipeline renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderPassLayout {
    pub width: u32,
    pub height: u32,
    pub color_format: AttachmentFormat,
    pub depth_format: AttachmentFormat,
}

impl RenderPassLayout {
    /// A single RGBA8 colour attachment with a 32-bit float depth attachment
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, color_format: AttachmentFormat::Rgba8Unorm, depth_format: AttachmentFormat::Depth32Float }
    }
}

/// Everything needed to create one pipeline or pipeline library
///
/// `P`, `L` and `M` are the device's pipeline, layout and shader module handles.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc<P, L, M> {
    /// Debug label
    pub label: String,
    pub flags: PipelineCreateFlags,
    /// Layout object, `None` when the layout class is [`PipelineLayoutClass::None`]
    pub layout: Option<L>,
    pub layout_class: PipelineLayoutClass,
    /// Attached when any of pre-rasterization, fragment shader or fragment output state is present
    pub render_pass: Option<RenderPassLayout>,
    /// Subsets declared as populated by this description, only set for partial sets
    pub library_subsets: Option<StageSubsets>,
    /// Already built fragments to link, in push order
    pub libraries: Vec<P>,
    pub vertex_input: Option<VertexInputState>,
    pub pre_rasterization: Option<PreRasterizationState<M>>,
    pub fragment_shader: Option<FragmentShaderState<M>>,
    pub fragment_output: Option<FragmentOutputState>,
    pub multisample: Option<MultisampleState>,
}

impl<P, L, M> GraphicsPipelineDesc<P, L, M> {
    /// Creates an empty description
    pub fn new(label: impl Into<String>, flags: PipelineCreateFlags) -> Self {
        Self {
            label: label.into(),
            flags,
            layout: None,
            layout_class: PipelineLayoutClass::None,
            render_pass: None,
            library_subsets: None,
            libraries: Vec::new(),
            vertex_input: None,
            pre_rasterization: None,
            fragment_shader: None,
            fragment_output: None,
            multisample: None,
        }
    }

    /// Subsets whose state blocks are present
    pub fn populated_subsets(&self) -> StageSubsets {
        let mut subsets = StageSubsets::empty();
        subsets.set(StageSubsets::VERTEX_INPUT, self.vertex_input.is_some());
        subsets.set(StageSubsets::PRE_RASTERIZATION_SHADERS, self.pre_rasterization.is_some());
        subsets.set(StageSubsets::FRAGMENT_SHADER, self.fragment_shader.is_some());
        subsets.set(StageSubsets::FRAGMENT_OUTPUT_INTERFACE, self.fragment_output.is_some());
        subsets
    }

    pub fn with_layout(mut self, layout: Option<L>, layout_class: PipelineLayoutClass) -> Self {
        self.layout = layout;
        self.layout_class = layout_class;
        self
    }

    pub fn with_render_pass(mut self, render_pass: RenderPassLayout) -> Self {
        self.render_pass = Some(render_pass);
        self
    }

    pub fn with_library_subsets(mut self, library_subsets: Option<StageSubsets>) -> Self {
        self.library_subsets = library_subsets;
        self
    }

    pub fn with_libraries(mut self, libraries: Vec<P>) -> Self {
        self.libraries = libraries;
        self
    }

    /// Binding 0 with one `vec4<f32>` attribute at location 0, triangle list
    pub fn with_vertex_input(mut self) -> Self {
        self.vertex_input = Some(VertexInputState {
            binding: 0,
            stride: VERTEX_STRIDE,
            location: 0,
            format: VertexFormat::Float32x4,
            offset: 0,
            topology: PrimitiveTopology::TriangleList,
        });
        self
    }

    /// Vertex shader, full viewport and a scissor covering the left three quarters
    pub fn with_pre_rasterization(mut self, vertex_shader: ShaderStage<M>, render_pass: &RenderPassLayout) -> Self {
        let width = render_pass.width;
        let height = render_pass.height;

        self.pre_rasterization = Some(PreRasterizationState {
            vertex_shader,
            viewport: Viewport { x: 0.0, y: 0.0, width: width as f32, height: height as f32, min_depth: 0.0, max_depth: 1.0 },
            scissor: ScissorRect { x: 0, y: 0, width: 3 * width / 4, height },
            rasterization: RasterizationState {
                polygon_mode: PolygonMode::Fill,
                cull_mode: CullMode::None,
                front_face: FrontFace::CounterClockwise,
                line_width: 1.0,
            },
        });
        self
    }

    /// Fragment shader with depth test and write enabled
    pub fn with_fragment_shader(mut self, fragment_shader: ShaderStage<M>) -> Self {
        self.fragment_shader = Some(FragmentShaderState {
            fragment_shader,
            depth_stencil: DepthStencilState { depth_test: true, depth_write: true, compare: CompareOp::LessOrEqual },
        });
        self.multisample.get_or_insert_with(MultisampleState::default);
        self
    }

    /// Blending disabled, red component masked out
    ///
    /// The multisample description is left untouched; fragment output only needs
    /// one when it is created together with, or linked against, a fragment shader.
    pub fn with_fragment_output(mut self) -> Self {
        self.fragment_output = Some(FragmentOutputState { blend_enable: false, color_write_mask: ColorComponents::NO_RED });
        self
    }

    /// Replaces the multisample description with the default single-sample one
    pub fn with_default_multisample(mut self) -> Self {
        self.multisample = Some(MultisampleState::default());
        self
    }
}
