//! Bottom-up pipeline tree builder
//!
//! The builder turns one concrete stage assignment into a fully linked pipeline.
//! Nodes are visited from the last index to the first; because every parent has a
//! smaller index than its children, each child is built and queued on its parent
//! before the parent is visited. Every node gets its creation flags, layout and
//! link plan computed from its own subsets and what its subtree covers.

use crate::device::state::{FRAGMENT_SHADER_NAME, GraphicsPipelineDesc, RenderPassLayout, ShaderCode, ShaderKind, ShaderStage, VERTEX_SHADER_NAME};
use crate::device::{DeviceError, PipelineDesc, PipelineDevice, ShaderError, ShaderProvider};
use crate::engine::BuildOptions;
use crate::enumerate::StageAssignment;
use crate::harness::RenderScenario;
use crate::linker::{LinkMode, LinkPlan, LinkedLibrary};
use crate::stage::{PipelineCreateFlags, PipelineLayoutClass, StageSubset, StageSubsets};
use crate::tree::TreeConfiguration;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Errors raised while building one configuration
///
/// Any of them aborts the configuration; nothing is retried.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The device rejected or failed to create an object for a node
    #[error("node {node} failed to build {{{subsets}}}: {source}")]
    Device {
        node: usize,
        subsets: StageSubsets,
        #[source]
        source: DeviceError,
    },
    /// A shader binary could not be fetched
    #[error("node {node} could not load shader '{name}': {source}")]
    Shader {
        node: usize,
        name: String,
        #[source]
        source: ShaderError,
    },
    /// A node has no subsets and no children to link
    #[error("node {node} has neither own state nor linked children")]
    EmptyNode { node: usize },
}

impl BuildError {
    /// Index of the node the error was raised for
    pub fn node(&self) -> usize {
        match self {
            Self::Device { node, .. } | Self::Shader { node, .. } | Self::EmptyNode { node } => *node,
        }
    }
}

/// A node of the tree being built
#[derive(Debug, Clone)]
pub struct RuntimeNode<P> {
    pub parent: Option<usize>,
    /// Subsets this node populates itself
    pub own: StageSubsets,
    /// Union of the subsets of every descendant, filled in as children finish
    pub subtree: StageSubsets,
    /// The built fragment, set once the node has been visited
    pub pipeline: Option<P>,
    /// Children built so far, waiting to be linked into this node
    pub libraries: Vec<LinkedLibrary<P>>,
}

/// Arena of runtime nodes for one configuration
///
/// Dropping it releases every fragment of the configuration.
#[derive(Debug, Clone)]
pub struct RuntimeTree<P> {
    nodes: Vec<RuntimeNode<P>>,
}

impl<P> RuntimeTree<P> {
    pub fn new(tree: &TreeConfiguration, assignment: &StageAssignment) -> Self {
        let nodes = tree
            .nodes()
            .iter()
            .zip(&assignment.own)
            .map(|(node, own)| RuntimeNode { parent: node.parent, own: *own, subtree: StageSubsets::empty(), pipeline: None, libraries: Vec::new() })
            .collect();

        Self { nodes }
    }
}

/// What was built for one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeBuildRecord {
    pub node: usize,
    pub flags: PipelineCreateFlags,
    pub own: StageSubsets,
    pub subtree: StageSubsets,
    /// Subsets covered by the children linked into this node
    pub linked: StageSubsets,
    pub layout_class: PipelineLayoutClass,
    pub library_info: Option<StageSubsets>,
    pub mode: LinkMode,
    /// Whether the multisample description was attached to keep fragment output compatible with a linked fragment shader
    pub compatibility_patch: bool,
}

/// The final pipeline of a configuration and how it was assembled
#[derive(Debug, Clone)]
pub struct LinkedPipeline<P, L> {
    pub pipeline: P,
    /// Shared layout the pipeline is bound with
    pub layout: L,
    /// One record per node, indexed like the tree's nodes
    pub records: Vec<NodeBuildRecord>,
}

/// Pipeline layouts of one configuration, created lazily once per class
#[derive(Debug)]
struct LayoutCache<L> {
    layouts: HashMap<PipelineLayoutClass, L>,
}

impl<L: Clone> LayoutCache<L> {
    fn new() -> Self {
        Self { layouts: HashMap::new() }
    }

    fn get<D: PipelineDevice<Layout = L>>(&mut self, device: &mut D, class: PipelineLayoutClass) -> Result<Option<L>, DeviceError> {
        if class == PipelineLayoutClass::None {
            return Ok(None);
        }

        if let Some(layout) = self.layouts.get(&class) {
            return Ok(Some(layout.clone()));
        }

        let layout = device.create_pipeline_layout(class)?;
        self.layouts.insert(class, layout.clone());
        Ok(Some(layout))
    }
}

/// Returns true if a node populates fragment output and links a fragment shader it does not own
///
/// Fragment output population leaves the multisample description unset, so such a
/// node would otherwise be rejected at link time.
fn needs_compatibility_patch(own: StageSubsets, linked: StageSubsets) -> bool {
    own.contains(StageSubsets::FRAGMENT_OUTPUT_INTERFACE)
        && !own.contains(StageSubsets::FRAGMENT_SHADER)
        && linked.contains(StageSubsets::FRAGMENT_SHADER)
}

/// Builds and links the fragments of one configuration
pub struct PipelineTreeBuilder<'a, D: PipelineDevice, S: ShaderProvider> {
    device: &'a mut D,
    shaders: &'a S,
    options: BuildOptions,
    render_pass: RenderPassLayout,
}

impl<'a, D: PipelineDevice, S: ShaderProvider> PipelineTreeBuilder<'a, D, S> {
    /// Creates a builder rendering into the standard scenario's attachments
    pub fn new(device: &'a mut D, shaders: &'a S, options: BuildOptions) -> Self {
        Self { device, shaders, options, render_pass: RenderScenario::standard().render_pass() }
    }

    /// Builds every node of the configuration and links them into the final pipeline
    ///
    /// # Arguments
    /// * `tree` - Validated tree configuration
    /// * `assignment` - Subsets owned by each node
    ///
    /// # Returns
    /// The final pipeline with its layout and per-node records, or the first build error
    pub fn build(&mut self, tree: &TreeConfiguration, assignment: &StageAssignment) -> Result<LinkedPipeline<D::Pipeline, D::Layout>, BuildError> {
        let mut runtime = RuntimeTree::new(tree, assignment);
        let mut layouts = LayoutCache::new();
        let mut records = Vec::with_capacity(runtime.nodes.len());
        let mut root = None;

        // Parents always precede their children
        for index in (0..runtime.nodes.len()).rev() {
            let node = &mut runtime.nodes[index];
            let (own, subtree, parent) = (node.own, node.subtree, node.parent);
            let pending = std::mem::take(&mut node.libraries);

            let plan = LinkPlan::new(index, own, &pending)?;
            let covered = own | plan.linked;

            // A fragment covering every subset must be created as a complete pipeline
            let build_library = parent.is_some() && !covered.is_all();
            let flags = PipelineCreateFlags::for_build(self.options.optimize, build_library);

            let layout_class = PipelineLayoutClass::classify(own | subtree);
            let layout = layouts.get(self.device, layout_class).map_err(|source| BuildError::Device { node: index, subsets: own, source })?;

            let mut desc = GraphicsPipelineDesc::new(format!("node {index} {{{own}}}"), flags)
                .with_layout(layout, layout_class)
                .with_library_subsets(plan.library_info)
                .with_libraries(plan.libraries.clone());

            if own.intersects(StageSubsets::PRE_RASTERIZATION_SHADERS | StageSubsets::FRAGMENT_SHADER | StageSubsets::FRAGMENT_OUTPUT_INTERFACE) {
                desc = desc.with_render_pass(self.render_pass);
            }

            for subset in own.subsets() {
                desc = self.populate(index, subset, desc)?;
            }

            let compatibility_patch = needs_compatibility_patch(own, plan.linked);
            if compatibility_patch {
                desc = desc.with_default_multisample();
            }

            let pipeline = self.device.create_graphics_pipeline(&desc).map_err(|source| BuildError::Device { node: index, subsets: own, source })?;

            debug!(node = index, flags = ?flags, own = %own, linked = %plan.linked, layout = ?layout_class, mode = ?plan.mode, "built pipeline fragment");

            records.push(NodeBuildRecord {
                node: index,
                flags,
                own,
                subtree,
                linked: plan.linked,
                layout_class,
                library_info: plan.library_info,
                mode: plan.mode,
                compatibility_patch,
            });

            runtime.nodes[index].pipeline = Some(pipeline.clone());

            match parent {
                Some(parent) => {
                    let parent_node = &mut runtime.nodes[parent];
                    parent_node.subtree |= own | subtree;
                    parent_node.libraries.push(LinkedLibrary { pipeline, subsets: covered });
                }
                None => root = Some(pipeline),
            }
        }

        records.reverse();

        let pipeline = root.ok_or(BuildError::EmptyNode { node: tree.root() })?;
        let layout = layouts
            .get(self.device, PipelineLayoutClass::Shared)
            .map_err(|source| BuildError::Device { node: tree.root(), subsets: StageSubsets::all(), source })?
            .ok_or(BuildError::EmptyNode { node: tree.root() })?;

        Ok(LinkedPipeline { pipeline, layout, records })
    }

    /// Populates the state block of one subset
    fn populate(&mut self, node: usize, subset: StageSubset, desc: PipelineDesc<D>) -> Result<PipelineDesc<D>, BuildError> {
        let desc = match subset {
            StageSubset::VertexInput => desc.with_vertex_input(),
            StageSubset::PreRasterizationShaders => {
                let vertex_shader = self.shader_stage(node, subset, ShaderKind::Vertex, VERTEX_SHADER_NAME)?;
                desc.with_pre_rasterization(vertex_shader, &self.render_pass)
            }
            StageSubset::FragmentShader => {
                let fragment_shader = self.shader_stage(node, subset, ShaderKind::Fragment, FRAGMENT_SHADER_NAME)?;
                desc.with_fragment_shader(fragment_shader)
            }
            StageSubset::FragmentOutputInterface => desc.with_fragment_output(),
        };

        Ok(desc)
    }

    /// Fetches a shader binary and attaches it either as a module or inline
    fn shader_stage(&mut self, node: usize, subset: StageSubset, kind: ShaderKind, name: &str) -> Result<ShaderStage<D::ShaderModule>, BuildError> {
        let binary = self.shaders.binary(name).map_err(|source| BuildError::Shader { node, name: name.to_string(), source })?;

        let code = if self.options.delayed_shader_create {
            ShaderCode::Inline(binary)
        } else {
            let module = self
                .device
                .create_shader_module(kind, name, &binary)
                .map_err(|source| BuildError::Device { node, subsets: subset.flag(), source })?;
            ShaderCode::Module(module)
        };

        Ok(ShaderStage::new(kind, name, code))
    }
}
