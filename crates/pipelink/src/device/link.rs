//! Pipeline-library linking rules
//!
//! [`LinkedState::assemble`] merges a description with the state of the fragments
//! it links and rejects anything the graphics-pipeline-library model forbids.
//! Every device runs it before creating native objects, so a builder bug shows up
//! the same way on the CPU reference device as on a GPU.

use super::state::{
    FragmentOutputState, FragmentShaderState, GraphicsPipelineDesc, MultisampleState, PreRasterizationState, RenderPassLayout, VertexInputState,
};
use crate::stage::{PipelineCreateFlags, PipelineLayoutClass, StageSubset, StageSubsets};
use thiserror::Error;

/// A rule broken by a pipeline description
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkViolation {
    #[error("declared library subsets {{{declared}}} do not match the populated state {{{populated}}}")]
    DeclarationMismatch { declared: StageSubsets, populated: StageSubsets },
    #[error("library populates {{{populated}}} without declaring it")]
    MissingLibraryDeclaration { populated: StageSubsets },
    #[error("description has neither state nor libraries")]
    Empty,
    #[error("a library covering every subset must be created as a complete pipeline")]
    CompleteLibrary,
    #[error("subsets {{{subsets}}} are provided more than once")]
    DuplicateSubsets { subsets: StageSubsets },
    #[error("complete pipeline is missing {{{missing}}}")]
    IncompletePipeline { missing: StageSubsets },
    #[error("{subset} state is not compatible with the {class:?} layout")]
    IncompatibleLayout { subset: StageSubset, class: PipelineLayoutClass },
    #[error("{{{subsets}}} state requires a render pass description")]
    MissingRenderPass { subsets: StageSubsets },
    #[error("link-time optimisation requires linked library {index} to retain optimisation info")]
    MissingRetainedInfo { index: usize },
    #[error("only libraries can retain link-time optimisation info")]
    RetainWithoutLibrary,
    #[error("fragment shader and fragment output multisample states differ")]
    MultisampleMismatch,
    #[error("{{{subsets}}} state requires a multisample description")]
    MissingMultisample { subsets: StageSubsets },
}

/// Merged state of a created pipeline or pipeline library
#[derive(Debug, Clone)]
pub struct LinkedState<M> {
    pub flags: PipelineCreateFlags,
    /// Subsets populated by the description itself
    pub own: StageSubsets,
    /// Own subsets united with everything linked
    pub covered: StageSubsets,
    pub layout_class: PipelineLayoutClass,
    pub render_pass: Option<RenderPassLayout>,
    pub vertex_input: Option<VertexInputState>,
    pub pre_rasterization: Option<PreRasterizationState<M>>,
    pub fragment_shader: Option<FragmentShaderState<M>>,
    pub fragment_output: Option<FragmentOutputState>,
    /// Multisample state carried by the fragment shader part
    pub fragment_shader_multisample: Option<MultisampleState>,
    /// Multisample state carried by the fragment output part
    pub fragment_output_multisample: Option<MultisampleState>,
}

impl<M: Clone> LinkedState<M> {
    /// Validates a description against the linking rules and merges linked state
    ///
    /// # Arguments
    /// * `desc` - Description being created
    /// * `linked` - State of every library in `desc.libraries`, in the same order
    ///
    /// # Returns
    /// The merged state, or the first rule the description breaks
    pub fn assemble<P, L>(desc: &GraphicsPipelineDesc<P, L, M>, linked: &[&LinkedState<M>]) -> Result<Self, LinkViolation> {
        let own = desc.populated_subsets();
        let is_library = desc.flags.contains(PipelineCreateFlags::LIBRARY);

        if desc.flags.contains(PipelineCreateFlags::RETAIN_LINK_TIME_OPTIMIZATION_INFO) && !is_library {
            return Err(LinkViolation::RetainWithoutLibrary);
        }

        if own.is_empty() && linked.is_empty() {
            return Err(LinkViolation::Empty);
        }

        match desc.library_subsets {
            Some(declared) if declared != own => return Err(LinkViolation::DeclarationMismatch { declared, populated: own }),
            None if is_library && !own.is_empty() => return Err(LinkViolation::MissingLibraryDeclaration { populated: own }),
            _ => {}
        }

        let render_pass_subsets =
            own & (StageSubsets::PRE_RASTERIZATION_SHADERS | StageSubsets::FRAGMENT_SHADER | StageSubsets::FRAGMENT_OUTPUT_INTERFACE);
        if !render_pass_subsets.is_empty() && desc.render_pass.is_none() {
            return Err(LinkViolation::MissingRenderPass { subsets: render_pass_subsets });
        }

        if own.contains(StageSubsets::PRE_RASTERIZATION_SHADERS) && !desc.layout_class.has_vertex_set() {
            return Err(LinkViolation::IncompatibleLayout { subset: StageSubset::PreRasterizationShaders, class: desc.layout_class });
        }
        if own.contains(StageSubsets::FRAGMENT_SHADER) && !desc.layout_class.has_fragment_set() {
            return Err(LinkViolation::IncompatibleLayout { subset: StageSubset::FragmentShader, class: desc.layout_class });
        }

        // Fragment output may omit multisample state unless it meets a fragment shader in this description
        let meets_fragment_shader = own.contains(StageSubsets::FRAGMENT_SHADER)
            || linked.iter().any(|library| library.covered.contains(StageSubsets::FRAGMENT_SHADER));
        let mut multisample_subsets = own & StageSubsets::FRAGMENT_SHADER;
        if meets_fragment_shader {
            multisample_subsets |= own & StageSubsets::FRAGMENT_OUTPUT_INTERFACE;
        }
        if !multisample_subsets.is_empty() && desc.multisample.is_none() {
            return Err(LinkViolation::MissingMultisample { subsets: multisample_subsets });
        }

        let mut state = Self {
            flags: desc.flags,
            own,
            covered: own,
            layout_class: desc.layout_class,
            render_pass: desc.render_pass,
            vertex_input: desc.vertex_input.clone(),
            pre_rasterization: desc.pre_rasterization.clone(),
            fragment_shader: desc.fragment_shader.clone(),
            fragment_output: desc.fragment_output,
            fragment_shader_multisample: desc.multisample.filter(|_| own.contains(StageSubsets::FRAGMENT_SHADER)),
            fragment_output_multisample: desc.multisample.filter(|_| own.contains(StageSubsets::FRAGMENT_OUTPUT_INTERFACE)),
        };

        for (index, library) in linked.iter().enumerate() {
            let overlap = state.covered & library.covered;
            if !overlap.is_empty() {
                return Err(LinkViolation::DuplicateSubsets { subsets: overlap });
            }

            // Complete pipelines linked as-is carry no retained information to lose
            let is_linked_library = library.flags.contains(PipelineCreateFlags::LIBRARY);
            if desc.flags.contains(PipelineCreateFlags::LINK_TIME_OPTIMIZATION)
                && is_linked_library
                && !library.flags.contains(PipelineCreateFlags::RETAIN_LINK_TIME_OPTIMIZATION_INFO)
            {
                return Err(LinkViolation::MissingRetainedInfo { index });
            }

            state.merge(library);
        }

        if let (Some(fragment_shader), Some(fragment_output)) = (state.fragment_shader_multisample, state.fragment_output_multisample) {
            if fragment_shader != fragment_output {
                return Err(LinkViolation::MultisampleMismatch);
            }
        }

        if is_library && state.covered.is_all() {
            return Err(LinkViolation::CompleteLibrary);
        }
        if !is_library && !state.covered.is_all() {
            return Err(LinkViolation::IncompletePipeline { missing: StageSubsets::all() - state.covered });
        }

        Ok(state)
    }

    fn merge(&mut self, library: &LinkedState<M>) {
        self.covered |= library.covered;
        self.render_pass = self.render_pass.or(library.render_pass);

        if self.vertex_input.is_none() {
            self.vertex_input = library.vertex_input.clone();
        }
        if self.pre_rasterization.is_none() {
            self.pre_rasterization = library.pre_rasterization.clone();
        }
        if self.fragment_shader.is_none() {
            self.fragment_shader = library.fragment_shader.clone();
        }
        self.fragment_output = self.fragment_output.or(library.fragment_output);
        self.fragment_shader_multisample = self.fragment_shader_multisample.or(library.fragment_shader_multisample);
        self.fragment_output_multisample = self.fragment_output_multisample.or(library.fragment_output_multisample);
    }

    /// Returns true if the state can be bound and drawn with
    pub fn is_executable(&self) -> bool {
        !self.flags.contains(PipelineCreateFlags::LIBRARY) && self.covered.is_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::state::{ShaderCode, ShaderKind, ShaderStage};

    type Desc = GraphicsPipelineDesc<(), (), ()>;

    fn render_pass() -> RenderPassLayout {
        RenderPassLayout::new(16, 16)
    }

    fn vertex_stage() -> ShaderStage<()> {
        ShaderStage::new(ShaderKind::Vertex, "vert", ShaderCode::Module(()))
    }

    fn fragment_stage() -> ShaderStage<()> {
        ShaderStage::new(ShaderKind::Fragment, "frag", ShaderCode::Module(()))
    }

    fn library(own: StageSubsets, flags: PipelineCreateFlags) -> Desc {
        let mut desc = Desc::new("library", flags).with_library_subsets(Some(own));
        let class = PipelineLayoutClass::classify(own);
        desc = desc.with_layout(None, class);

        if !(own & !StageSubsets::VERTEX_INPUT).is_empty() {
            desc = desc.with_render_pass(render_pass());
        }
        for subset in own.subsets() {
            desc = match subset {
                StageSubset::VertexInput => desc.with_vertex_input(),
                StageSubset::PreRasterizationShaders => desc.with_pre_rasterization(vertex_stage(), &render_pass()),
                StageSubset::FragmentShader => desc.with_fragment_shader(fragment_stage()),
                StageSubset::FragmentOutputInterface => desc.with_fragment_output(),
            };
        }
        desc
    }

    fn link(desc: &Desc, linked: &[&LinkedState<()>]) -> Result<LinkedState<()>, LinkViolation> {
        LinkedState::assemble(desc, linked)
    }

    #[test]
    fn test_monolithic_pipeline() {
        let desc = library(StageSubsets::all(), PipelineCreateFlags::empty()).with_library_subsets(None);
        let state = link(&desc, &[]).unwrap();

        assert!(state.is_executable());
        assert_eq!(state.fragment_shader_multisample, Some(MultisampleState::default()));
    }

    #[test]
    fn test_link_four_libraries() {
        let parts: Vec<_> = StageSubset::ALL.iter().map(|subset| link(&library(subset.flag(), PipelineCreateFlags::LIBRARY), &[]).unwrap()).collect();
        let refs: Vec<_> = parts.iter().collect();

        let final_desc = Desc::new("final", PipelineCreateFlags::empty()).with_layout(None, PipelineLayoutClass::Shared);
        let state = link(&final_desc, &refs).unwrap();

        assert!(state.is_executable());
        assert!(state.own.is_empty());
        assert!(state.pre_rasterization.is_some());
        assert!(state.fragment_output.is_some());
    }

    #[test]
    fn test_declaration_rules() {
        let desc = library(StageSubsets::VERTEX_INPUT, PipelineCreateFlags::LIBRARY).with_library_subsets(None);
        assert_eq!(link(&desc, &[]).unwrap_err(), LinkViolation::MissingLibraryDeclaration { populated: StageSubsets::VERTEX_INPUT });

        let desc = library(StageSubsets::VERTEX_INPUT, PipelineCreateFlags::LIBRARY).with_library_subsets(Some(StageSubsets::FRAGMENT_SHADER));
        assert!(matches!(link(&desc, &[]), Err(LinkViolation::DeclarationMismatch { .. })));

        let desc = library(StageSubsets::all(), PipelineCreateFlags::LIBRARY);
        assert_eq!(link(&desc, &[]).unwrap_err(), LinkViolation::CompleteLibrary);

        let desc = Desc::new("empty", PipelineCreateFlags::LIBRARY);
        assert_eq!(link(&desc, &[]).unwrap_err(), LinkViolation::Empty);
    }

    #[test]
    fn test_duplicate_and_incomplete() {
        let vertex = link(&library(StageSubsets::VERTEX_INPUT, PipelineCreateFlags::LIBRARY), &[]).unwrap();

        let desc = library(StageSubsets::VERTEX_INPUT | StageSubsets::FRAGMENT_OUTPUT_INTERFACE, PipelineCreateFlags::LIBRARY);
        assert_eq!(link(&desc, &[&vertex]).unwrap_err(), LinkViolation::DuplicateSubsets { subsets: StageSubsets::VERTEX_INPUT });

        let desc = Desc::new("final", PipelineCreateFlags::empty());
        assert_eq!(
            link(&desc, &[&vertex]).unwrap_err(),
            LinkViolation::IncompletePipeline { missing: StageSubsets::all() - StageSubsets::VERTEX_INPUT }
        );
    }

    #[test]
    fn test_layout_compatibility() {
        let desc = library(StageSubsets::PRE_RASTERIZATION_SHADERS, PipelineCreateFlags::LIBRARY).with_layout(None, PipelineLayoutClass::FragmentOnly);
        assert_eq!(
            link(&desc, &[]).unwrap_err(),
            LinkViolation::IncompatibleLayout { subset: StageSubset::PreRasterizationShaders, class: PipelineLayoutClass::FragmentOnly }
        );

        let desc = library(StageSubsets::FRAGMENT_SHADER, PipelineCreateFlags::LIBRARY).with_layout(None, PipelineLayoutClass::None);
        assert!(matches!(link(&desc, &[]), Err(LinkViolation::IncompatibleLayout { subset: StageSubset::FragmentShader, .. })));
    }

    #[test]
    fn test_render_pass_required() {
        let mut desc = library(StageSubsets::FRAGMENT_OUTPUT_INTERFACE, PipelineCreateFlags::LIBRARY);
        desc.render_pass = None;
        assert_eq!(link(&desc, &[]).unwrap_err(), LinkViolation::MissingRenderPass { subsets: StageSubsets::FRAGMENT_OUTPUT_INTERFACE });
    }

    #[test]
    fn test_link_time_optimisation_rules() {
        let retained = PipelineCreateFlags::LIBRARY | PipelineCreateFlags::RETAIN_LINK_TIME_OPTIMIZATION_INFO;
        let plain = link(&library(StageSubsets::VERTEX_INPUT, PipelineCreateFlags::LIBRARY), &[]).unwrap();
        let kept = link(&library(StageSubsets::VERTEX_INPUT, retained), &[]).unwrap();

        let rest = StageSubsets::all() - StageSubsets::VERTEX_INPUT;
        let final_desc = library(rest, PipelineCreateFlags::LINK_TIME_OPTIMIZATION).with_library_subsets(Some(rest));
        assert_eq!(link(&final_desc, &[&plain]).unwrap_err(), LinkViolation::MissingRetainedInfo { index: 0 });
        assert!(link(&final_desc, &[&kept]).is_ok());

        let desc = library(StageSubsets::all(), PipelineCreateFlags::RETAIN_LINK_TIME_OPTIMIZATION_INFO).with_library_subsets(None);
        assert_eq!(link(&desc, &[]).unwrap_err(), LinkViolation::RetainWithoutLibrary);
    }

    #[test]
    fn test_multisample_agreement() {
        let mut fragment = library(StageSubsets::FRAGMENT_SHADER, PipelineCreateFlags::LIBRARY);
        fragment.multisample = Some(MultisampleState { sample_count: 4, ..Default::default() });
        let fragment = link(&fragment, &[]).unwrap();

        let output = library(StageSubsets::FRAGMENT_OUTPUT_INTERFACE, PipelineCreateFlags::LIBRARY).with_default_multisample();
        assert_eq!(link(&output, &[&fragment]).unwrap_err(), LinkViolation::MultisampleMismatch);

        let mut shader = library(StageSubsets::FRAGMENT_SHADER, PipelineCreateFlags::LIBRARY);
        shader.multisample = None;
        assert_eq!(link(&shader, &[]).unwrap_err(), LinkViolation::MissingMultisample { subsets: StageSubsets::FRAGMENT_SHADER });
    }

    #[test]
    fn test_fragment_output_multisample() {
        // On its own, fragment output carries no multisample state
        let output = library(StageSubsets::FRAGMENT_OUTPUT_INTERFACE, PipelineCreateFlags::LIBRARY);
        let state = link(&output, &[]).unwrap();
        assert_eq!(state.fragment_output_multisample, None);

        // Linked against a fragment shader it must describe one
        let fragment = link(&library(StageSubsets::FRAGMENT_SHADER, PipelineCreateFlags::LIBRARY), &[]).unwrap();
        assert_eq!(
            link(&output, &[&fragment]).unwrap_err(),
            LinkViolation::MissingMultisample { subsets: StageSubsets::FRAGMENT_OUTPUT_INTERFACE }
        );

        let state = link(&output.with_default_multisample(), &[&fragment]).unwrap();
        assert_eq!(state.fragment_output_multisample, Some(MultisampleState::default()));
        assert_eq!(state.fragment_shader_multisample, Some(MultisampleState::default()));

        // Sibling libraries linked by a parent keep whatever they were created with
        let parts: Vec<_> = [StageSubsets::VERTEX_INPUT | StageSubsets::PRE_RASTERIZATION_SHADERS, StageSubsets::FRAGMENT_OUTPUT_INTERFACE]
            .into_iter()
            .map(|own| link(&library(own, PipelineCreateFlags::LIBRARY), &[]).unwrap())
            .collect();
        let final_desc = Desc::new("final", PipelineCreateFlags::empty()).with_layout(None, PipelineLayoutClass::Shared);
        let state = link(&final_desc, &[&parts[0], &fragment, &parts[1]]).unwrap();
        assert!(state.is_executable());
        assert_eq!(state.fragment_output_multisample, None);
    }

    #[test]
    fn test_complete_pipeline_can_be_linked() {
        let complete = link(&library(StageSubsets::all(), PipelineCreateFlags::empty()).with_library_subsets(None), &[]).unwrap();

        let final_desc = Desc::new("final", PipelineCreateFlags::empty()).with_layout(None, PipelineLayoutClass::Shared);
        let state = link(&final_desc, &[&complete]).unwrap();
        assert!(state.is_executable());
    }
}
