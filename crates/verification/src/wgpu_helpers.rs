//! wgpu utility functions for verification
//!
//! This module provides helper functions for creating render attachments and
//! reading them back into CPU images after the scenario has been executed.

use pipelink::harness::DepthImage;

/// Colour attachment format of the scenario
pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Depth attachment format of the scenario
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Texture usage flags for render attachments that are read back
pub const TEXTURE_USAGE_ATTACHMENT: wgpu::TextureUsages = wgpu::TextureUsages::RENDER_ATTACHMENT.union(wgpu::TextureUsages::COPY_SRC);

/// Rounds a row size up to the copy alignment required by wgpu
///
/// # Arguments
/// * `unpadded` - Tightly packed row size in bytes
///
/// # Returns
/// The row size padded to `wgpu::COPY_BYTES_PER_ROW_ALIGNMENT`
pub fn padded_bytes_per_row(unpadded: u32) -> u32 {
    let mask = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT - 1;
    (unpadded + mask) & !mask
}

/// Creates a 2D texture with the specified parameters
///
/// # Arguments
/// * `device` - The wgpu device to create the texture on
/// * `label` - Debug label of the texture
/// * `width` - Texture width in pixels
/// * `height` - Texture height in pixels
/// * `format` - Texture format
///
/// # Returns
/// A single-sampled attachment texture that can be copied from
pub fn create_attachment(device: &wgpu::Device, label: &str, width: u32, height: u32, format: wgpu::TextureFormat) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1, // 2D texture, single layer
        },
        mip_level_count: 1, // No mipmapping
        sample_count: 1,    // No multisampling
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: TEXTURE_USAGE_ATTACHMENT,
        view_formats: &[], // No alternative view formats needed
    })
}

/// Copies one aspect of a texture into CPU memory with the row padding removed
///
/// # Arguments
/// * `device` - The wgpu device
/// * `queue` - The wgpu command queue
/// * `texture` - The texture to read from
/// * `aspect` - Aspect to copy, `DepthOnly` for depth attachments
/// * `bytes_per_pixel` - Size of one texel of the copied aspect
///
/// # Returns
/// Tightly packed rows of texel data
fn read_texture(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture, aspect: wgpu::TextureAspect, bytes_per_pixel: u32) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let wgpu::Extent3d { width, height, .. } = texture.size();

    // Rows of the staging buffer must be aligned to 256 bytes
    let unpadded_bytes_per_row = width * bytes_per_pixel;
    let bytes_per_row = padded_bytes_per_row(unpadded_bytes_per_row);

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Buffer"),
        size: u64::from(bytes_per_row) * u64::from(height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Readback Encoder") });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    // Map the buffer for reading (async operation)
    let buffer_slice = buffer.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |v| {
        let _ = sender.send(v);
    });

    // Wait for the mapping operation to complete
    device.poll(wgpu::PollType::Wait)?;
    pollster::block_on(receiver.receive()).ok_or("Failed to map buffer for reading")??;

    let data = buffer_slice.get_mapped_range();
    let mut packed = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
    for row in data.chunks_exact(bytes_per_row as usize) {
        packed.extend_from_slice(&row[..unpadded_bytes_per_row as usize]);
    }
    drop(data);
    buffer.unmap();

    Ok(packed)
}

/// Reads an Rgba8Unorm colour attachment back to an image
///
/// # Arguments
/// * `device` - The wgpu device
/// * `queue` - The wgpu command queue
/// * `texture` - The colour attachment
///
/// # Returns
/// An RGBA8 image containing the texture data
pub fn read_color_texture(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture) -> Result<image::RgbaImage, Box<dyn std::error::Error>> {
    let format = texture.format();
    if format != COLOR_FORMAT {
        return Err(format!("Unsupported colour format for readback: {format:?}").into());
    }

    let wgpu::Extent3d { width, height, .. } = texture.size();
    let data = read_texture(device, queue, texture, wgpu::TextureAspect::All, 4)?;

    Ok(image::RgbaImage::from_raw(width, height, data).ok_or("Failed to create RGBA8 image from data")?)
}

/// Reads a Depth32Float attachment back to a single-channel float image
///
/// # Arguments
/// * `device` - The wgpu device
/// * `queue` - The wgpu command queue
/// * `texture` - The depth attachment
///
/// # Returns
/// The raw depth values
pub fn read_depth_texture(device: &wgpu::Device, queue: &wgpu::Queue, texture: &wgpu::Texture) -> Result<DepthImage, Box<dyn std::error::Error>> {
    let format = texture.format();
    if format != DEPTH_FORMAT {
        return Err(format!("Unsupported depth format for readback: {format:?}").into());
    }

    let wgpu::Extent3d { width, height, .. } = texture.size();
    let data = read_texture(device, queue, texture, wgpu::TextureAspect::DepthOnly, 4)?;
    let depths: Vec<f32> = bytemuck::pod_collect_to_vec(&data);

    Ok(DepthImage::from_raw(width, height, depths).ok_or("Failed to create depth image from data")?)
}
