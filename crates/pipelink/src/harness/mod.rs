//! Rendering scenario and verification
//!
//! Every fully linked pipeline renders the same fixed scenario: two triangles
//! covering the whole target at different depths, drawn in two draws. The vertex
//! shader reads each triangle's depth from a uniform, the pre-rasterization state
//! clips the right quarter with its scissor, the fragment shader picks a colour by
//! row and the output state masks out red. Because every subset leaves a visible
//! mark, the images are compared against references computed from the scenario
//! alone, independently of how the pipeline was partitioned.

pub mod compare;

use crate::device::state::{ColorComponents, RenderPassLayout};
use crate::device::{DeviceError, PipelineDevice};
use compare::{CompareResult, compare_images};
use image::{GrayImage, ImageBuffer, Luma, Rgba, RgbaImage};
use std::ops::Range;

/// Width of the render target
pub const RENDER_WIDTH: u32 = 16;

/// Height of the render target
pub const RENDER_HEIGHT: u32 = 16;

/// Depth attachment contents as read back from the device
pub type DepthImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// The fixed rendering scenario
#[derive(Debug, Clone, PartialEq)]
pub struct RenderScenario {
    pub width: u32,
    pub height: u32,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    /// Vertex buffer contents, one `vec4<f32>` per vertex
    pub vertices: Vec<[f32; 4]>,
    /// Vertex ranges recorded as separate draws
    pub draws: Vec<Range<u32>>,
    /// Vertex shader uniform; `x` is the depth of vertices 0..3, `y` of the rest
    pub z_coord: [f32; 4],
    /// Fragment shader uniform colour for the upper half
    pub palette_top: [f32; 4],
    /// Fragment shader uniform colour for the lower half
    pub palette_bottom: [f32; 4],
}

impl RenderScenario {
    /// The 16x16 two-draw scenario
    pub fn standard() -> Self {
        Self {
            width: RENDER_WIDTH,
            height: RENDER_HEIGHT,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_depth: 1.0,
            vertices: vec![
                [-1.0, -1.0, 0.0, 1.0],
                [1.0, -1.0, 0.5, 1.0],
                [-1.0, 1.0, 0.5, 1.0],
                [-1.0, 1.0, 0.5, 1.0],
                [1.0, -1.0, 0.5, 1.0],
                [1.0, 1.0, 1.0, 1.0],
            ],
            draws: vec![0..3, 3..6],
            z_coord: [0.25, 0.75, 0.0, 0.0],
            palette_top: [0.25, 1.0, 0.0, 1.0],
            palette_bottom: [0.75, 0.0, 1.0, 1.0],
        }
    }

    /// Attachments every pipeline of the scenario renders into
    pub fn render_pass(&self) -> RenderPassLayout {
        RenderPassLayout::new(self.width, self.height)
    }

    /// Expected colour image
    ///
    /// Left of the scissor edge the upper half shows the top palette colour and the
    /// lower half the bottom one, with red kept from the clear colour; right of it
    /// only the clear colour remains.
    pub fn reference_color(&self) -> RgbaImage {
        let scissor_edge = 3 * self.width / 4;
        let middle = self.height / 2;

        let top = to_rgba8(mask_color(self.palette_top, self.clear_color, ColorComponents::NO_RED));
        let bottom = to_rgba8(mask_color(self.palette_bottom, self.clear_color, ColorComponents::NO_RED));
        let clear = to_rgba8(self.clear_color);

        RgbaImage::from_fn(self.width, self.height, |x, y| {
            if x < scissor_edge {
                if y < middle { top } else { bottom }
            } else {
                clear
            }
        })
    }

    /// Expected depth image, quantised like [`quantize_depth`]
    ///
    /// The first triangle owns every pixel strictly above the shared diagonal, the
    /// second one the diagonal itself and everything below it.
    pub fn reference_depth(&self) -> GrayImage {
        let scissor_edge = 3 * self.width / 4;
        let diagonal_edge = (self.width + self.height) / 2 - 1;

        let first = quantize(self.z_coord[0]);
        let second = quantize(self.z_coord[1]);
        let clear = quantize(self.clear_depth);

        GrayImage::from_fn(self.width, self.height, |x, y| {
            if x < scissor_edge {
                if x + y < diagonal_edge { Luma([first]) } else { Luma([second]) }
            } else {
                Luma([clear])
            }
        })
    }
}

/// Applies a colour write mask, keeping `previous` in masked-out channels
pub fn mask_color(color: [f32; 4], previous: [f32; 4], mask: ColorComponents) -> [f32; 4] {
    let channels = [ColorComponents::R, ColorComponents::G, ColorComponents::B, ColorComponents::A];
    std::array::from_fn(|index| if mask.contains(channels[index]) { color[index] } else { previous[index] })
}

/// Converts a normalised colour to 8-bit unorm
pub fn to_rgba8(color: [f32; 4]) -> Rgba<u8> {
    Rgba(color.map(|channel| (channel.clamp(0.0, 1.0) * 255.0).round() as u8))
}

fn quantize(depth: f32) -> u8 {
    (255.0 * depth.clamp(0.0, 1.0)).floor() as u8
}

/// Quantises depth to 8 bits as `floor(255 * d)`
pub fn quantize_depth(depth: &DepthImage) -> GrayImage {
    GrayImage::from_fn(depth.width(), depth.height(), |x, y| Luma([quantize(depth.get_pixel(x, y)[0])]))
}

/// Images read back after executing the scenario
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub color: RgbaImage,
    pub depth: DepthImage,
}

/// Outcome of verifying one linked pipeline
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub color: CompareResult,
    pub depth: CompareResult,
    /// The rendered images, kept for dumping
    pub output: RenderOutput,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.color.is_match() && self.depth.is_match()
    }
}

/// Executes the scenario with a linked pipeline and compares the result
#[derive(Debug, Clone)]
pub struct VerificationHarness {
    scenario: RenderScenario,
    reference_color: RgbaImage,
    reference_depth: GrayImage,
}

impl VerificationHarness {
    pub fn new(scenario: RenderScenario) -> Self {
        let reference_color = scenario.reference_color();
        let reference_depth = scenario.reference_depth();

        Self { scenario, reference_color, reference_depth }
    }

    pub fn scenario(&self) -> &RenderScenario {
        &self.scenario
    }

    pub fn reference_color(&self) -> &RgbaImage {
        &self.reference_color
    }

    pub fn reference_depth(&self) -> &GrayImage {
        &self.reference_depth
    }

    /// Binds `pipeline` with `layout`, renders the scenario and compares both attachments
    ///
    /// # Returns
    /// The comparison report, or the device error raised while executing
    pub fn verify<D: PipelineDevice>(&self, device: &mut D, pipeline: &D::Pipeline, layout: &D::Layout) -> Result<VerificationReport, DeviceError> {
        let output = device.execute(pipeline, layout, &self.scenario)?;

        let color = compare_images(&self.reference_color, &output.color);
        let depth = compare_images(&self.reference_depth, &quantize_depth(&output.depth));

        Ok(VerificationReport { color, depth, output })
    }
}

impl Default for VerificationHarness {
    fn default() -> Self {
        Self::new(RenderScenario::standard())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_color() {
        let reference = RenderScenario::standard().reference_color();

        assert_eq!(*reference.get_pixel(0, 0), Rgba([0, 255, 0, 255]));
        assert_eq!(*reference.get_pixel(11, 7), Rgba([0, 255, 0, 255]));
        assert_eq!(*reference.get_pixel(11, 8), Rgba([0, 0, 255, 255]));
        assert_eq!(*reference.get_pixel(12, 0), Rgba([0, 0, 0, 255]));
        assert_eq!(*reference.get_pixel(15, 15), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn test_reference_depth() {
        let reference = RenderScenario::standard().reference_depth();

        assert_eq!(reference.get_pixel(0, 0)[0], 63);
        assert_eq!(reference.get_pixel(7, 7)[0], 63);
        assert_eq!(reference.get_pixel(8, 7)[0], 191);
        assert_eq!(reference.get_pixel(11, 15)[0], 191);
        assert_eq!(reference.get_pixel(12, 0)[0], 255);
    }

    #[test]
    fn test_quantize_depth() {
        let depth = DepthImage::from_fn(3, 1, |x, _| Luma([[0.25, 0.75, 1.0][x as usize]]));
        assert_eq!(quantize_depth(&depth).into_raw(), vec![63, 191, 255]);
    }

    #[test]
    fn test_mask_color() {
        let masked = mask_color([0.25, 1.0, 0.0, 1.0], [0.0, 0.0, 0.0, 1.0], ColorComponents::NO_RED);
        assert_eq!(masked, [0.0, 1.0, 0.0, 1.0]);
    }
}
