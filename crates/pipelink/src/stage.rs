//! Stage subsets, creation flags and layout classification
//!
//! A graphics pipeline can be split into four independently compilable subsets.
//! This module names them, provides the bit-set used to track which subsets a
//! fragment covers, and derives the per-node creation flags and layout class.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four disjoint groups of pipeline state
///
/// The declaration order is the canonical enumeration order; permutations are
/// generated lexicographically starting from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StageSubset {
    /// Vertex input bindings, attributes and input assembly
    VertexInput,
    /// Vertex shader, viewport, scissor and rasterization state
    PreRasterizationShaders,
    /// Fragment shader and depth/stencil state
    FragmentShader,
    /// Colour blend and attachment output state
    FragmentOutputInterface,
}

impl StageSubset {
    /// All subsets in canonical order
    pub const ALL: [StageSubset; 4] = [
        StageSubset::VertexInput,
        StageSubset::PreRasterizationShaders,
        StageSubset::FragmentShader,
        StageSubset::FragmentOutputInterface,
    ];

    /// Returns the single-bit set for this subset
    pub fn flag(self) -> StageSubsets {
        match self {
            Self::VertexInput => StageSubsets::VERTEX_INPUT,
            Self::PreRasterizationShaders => StageSubsets::PRE_RASTERIZATION_SHADERS,
            Self::FragmentShader => StageSubsets::FRAGMENT_SHADER,
            Self::FragmentOutputInterface => StageSubsets::FRAGMENT_OUTPUT_INTERFACE,
        }
    }

    /// Upper-case name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            Self::VertexInput => "VERTEX_INPUT_INTERFACE",
            Self::PreRasterizationShaders => "PRE_RASTERIZATION_SHADERS",
            Self::FragmentShader => "FRAGMENT_SHADER",
            Self::FragmentOutputInterface => "FRAGMENT_OUTPUT_INTERFACE",
        }
    }
}

impl fmt::Display for StageSubset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// A set of stage subsets
    ///
    /// Bit values follow the canonical order so that folding per-node sets into
    /// a configuration signature is stable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct StageSubsets: u32 {
        const VERTEX_INPUT = 1 << 0;
        const PRE_RASTERIZATION_SHADERS = 1 << 1;
        const FRAGMENT_SHADER = 1 << 2;
        const FRAGMENT_OUTPUT_INTERFACE = 1 << 3;
    }
}

impl StageSubsets {
    /// Returns true if the set is neither empty nor complete
    pub fn is_partial(self) -> bool {
        !self.is_empty() && !self.is_all()
    }

    /// Iterates over the contained subsets in canonical order
    pub fn subsets(self) -> impl Iterator<Item = StageSubset> {
        StageSubset::ALL.into_iter().filter(move |subset| self.contains(subset.flag()))
    }
}

impl From<StageSubset> for StageSubsets {
    fn from(subset: StageSubset) -> Self {
        subset.flag()
    }
}

impl FromIterator<StageSubset> for StageSubsets {
    fn from_iter<I: IntoIterator<Item = StageSubset>>(iter: I) -> Self {
        iter.into_iter().fold(StageSubsets::empty(), |acc, subset| acc | subset.flag())
    }
}

impl fmt::Display for StageSubsets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.subsets().map(StageSubset::name).collect();
        f.write_str(&names.join(" "))
    }
}

bitflags! {
    /// Creation flags attached to a pipeline or pipeline library
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct PipelineCreateFlags: u32 {
        /// The object is a reusable library, not a directly bindable pipeline
        const LIBRARY = 1 << 0;
        /// The library keeps the information needed for a link-time optimised final link
        const RETAIN_LINK_TIME_OPTIMIZATION_INFO = 1 << 1;
        /// The final link consumes retained information and optimises across libraries
        const LINK_TIME_OPTIMIZATION = 1 << 2;
    }
}

impl PipelineCreateFlags {
    /// Computes the creation flags for one node
    ///
    /// # Arguments
    /// * `optimize` - Whether link-time optimisation was requested
    /// * `build_library` - Whether the node is built as a library
    pub fn for_build(optimize: bool, build_library: bool) -> Self {
        let mut flags = Self::empty();

        if build_library {
            flags |= Self::LIBRARY;
        }

        if optimize {
            if build_library {
                flags |= Self::RETAIN_LINK_TIME_OPTIMIZATION_INFO;
            } else {
                flags |= Self::LINK_TIME_OPTIMIZATION;
            }
        }

        flags
    }
}

/// Which pipeline layout a fragment is built against
///
/// Set 0 holds the vertex shader uniform, set 1 the fragment shader uniform.
/// The partial layouts replace the missing set with a blank one so that every
/// layout stays set-compatible with the shared layout the final pipeline is
/// bound with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineLayoutClass {
    /// Vertex and fragment sets
    Shared,
    /// Vertex set plus a blank fragment set
    VertexOnly,
    /// Blank vertex set plus the fragment set
    FragmentOnly,
    /// No layout object; the fragment's state does not touch resource bindings
    None,
}

impl PipelineLayoutClass {
    /// Classifies a node from its own subsets united with its subtree's
    pub fn classify(subsets: StageSubsets) -> Self {
        let vertex = subsets.contains(StageSubsets::PRE_RASTERIZATION_SHADERS);
        let fragment = subsets.contains(StageSubsets::FRAGMENT_SHADER);

        match (vertex, fragment) {
            (true, true) => Self::Shared,
            (true, false) => Self::VertexOnly,
            (false, true) => Self::FragmentOnly,
            (false, false) => Self::None,
        }
    }

    /// Returns true if the layout carries the vertex shader set
    pub fn has_vertex_set(self) -> bool {
        matches!(self, Self::Shared | Self::VertexOnly)
    }

    /// Returns true if the layout carries the fragment shader set
    pub fn has_fragment_set(self) -> bool {
        matches!(self, Self::Shared | Self::FragmentOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order_matches_bits() {
        let bits: Vec<u32> = StageSubset::ALL.iter().map(|subset| subset.flag().bits()).collect();
        assert_eq!(bits, vec![1, 2, 4, 8]);
        assert!(StageSubset::VertexInput < StageSubset::FragmentOutputInterface);
    }

    #[test]
    fn test_partial_subsets() {
        assert!(!StageSubsets::empty().is_partial());
        assert!(!StageSubsets::all().is_partial());
        assert!(StageSubsets::FRAGMENT_SHADER.is_partial());
        assert!((StageSubsets::all() - StageSubsets::VERTEX_INPUT).is_partial());
    }

    #[test]
    fn test_display() {
        let subsets = StageSubsets::VERTEX_INPUT | StageSubsets::FRAGMENT_OUTPUT_INTERFACE;
        assert_eq!(subsets.to_string(), "VERTEX_INPUT_INTERFACE FRAGMENT_OUTPUT_INTERFACE");
        assert_eq!(StageSubsets::empty().to_string(), "");
    }

    #[test]
    fn test_create_flags() {
        assert_eq!(PipelineCreateFlags::for_build(false, false), PipelineCreateFlags::empty());
        assert_eq!(PipelineCreateFlags::for_build(false, true), PipelineCreateFlags::LIBRARY);
        assert_eq!(
            PipelineCreateFlags::for_build(true, true),
            PipelineCreateFlags::LIBRARY | PipelineCreateFlags::RETAIN_LINK_TIME_OPTIMIZATION_INFO
        );
        assert_eq!(PipelineCreateFlags::for_build(true, false), PipelineCreateFlags::LINK_TIME_OPTIMIZATION);
    }

    #[test]
    fn test_layout_classification() {
        assert_eq!(PipelineLayoutClass::classify(StageSubsets::all()), PipelineLayoutClass::Shared);
        assert_eq!(
            PipelineLayoutClass::classify(StageSubsets::VERTEX_INPUT | StageSubsets::PRE_RASTERIZATION_SHADERS),
            PipelineLayoutClass::VertexOnly
        );
        assert_eq!(
            PipelineLayoutClass::classify(StageSubsets::FRAGMENT_SHADER | StageSubsets::FRAGMENT_OUTPUT_INTERFACE),
            PipelineLayoutClass::FragmentOnly
        );
        assert_eq!(PipelineLayoutClass::classify(StageSubsets::VERTEX_INPUT), PipelineLayoutClass::None);
        assert_eq!(PipelineLayoutClass::classify(StageSubsets::FRAGMENT_OUTPUT_INTERFACE), PipelineLayoutClass::None);
    }
}
