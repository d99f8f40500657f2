// Blocking GPU → CPU copies with row depadding.
//
// Used by the CPU method every frame (to-cpu attachments), by screenshots and
// image comparison, and by tests.

use futures_intrusive::channel::shared::oneshot_channel;

use super::error::{RenderError, RenderResult};

/// Align to the 256-byte row pitch required for texture → buffer copies.
fn align_bpr(value: usize) -> usize {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
    value.div_ceil(align) * align
}

pub fn bytes_per_pixel(format: wgpu::TextureFormat) -> RenderResult<usize> {
    Ok(match format {
        wgpu::TextureFormat::R16Uint => 2,
        wgpu::TextureFormat::Rgba8Unorm
        | wgpu::TextureFormat::Rgba8UnormSrgb
        | wgpu::TextureFormat::Bgra8Unorm
        | wgpu::TextureFormat::Bgra8UnormSrgb => 4,
        wgpu::TextureFormat::Rgba16Float => 8,
        wgpu::TextureFormat::Rgba32Float => 16,
        other => return Err(RenderError::readback(format!("unsupported readback format {other:?}"))),
    })
}

/// Read mip 0 of a single-sampled 2D texture into a tightly packed buffer.
pub fn read_texture_tight(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    src: &wgpu::Texture,
    size: (u32, u32),
    format: wgpu::TextureFormat,
) -> RenderResult<Vec<u8>> {
    read_texture_layer(device, queue, src, 0, size, format)
}

/// Like [`read_texture_tight`] for one layer of an array texture.
pub fn read_texture_layer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    src: &wgpu::Texture,
    layer: u32,
    size: (u32, u32),
    format: wgpu::TextureFormat,
) -> RenderResult<Vec<u8>> {
    let (width, height) = size;
    if width == 0 || height == 0 {
        return Err(RenderError::readback("readback size must be positive"));
    }
    if src.sample_count() != 1 {
        return Err(RenderError::readback(format!(
            "readback requires a single-sample texture, got {} samples",
            src.sample_count()
        )));
    }
    if src.format() != format {
        return Err(RenderError::readback(format!(
            "texture format mismatch: texture={:?}, requested={:?}",
            src.format(),
            format
        )));
    }

    let tight_bpr = bytes_per_pixel(format)? * width as usize;
    let padded_bpr = align_bpr(tight_bpr);
    let buffer_size = (padded_bpr * height as usize) as wgpu::BufferAddress;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Staging Buffer"),
        size: buffer_size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture: src,
            mip_level: 0,
            origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_bpr as u32),
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

    let data = map_and_read(device, &staging)?;

    let mut tight = vec![0u8; tight_bpr * height as usize];
    for row in 0..height as usize {
        let src_offset = row * padded_bpr;
        let dst_offset = row * tight_bpr;
        tight[dst_offset..dst_offset + tight_bpr].copy_from_slice(&data[src_offset..src_offset + tight_bpr]);
    }
    Ok(tight)
}

/// Copy a whole buffer (needs `COPY_SRC`) back to the CPU.
pub fn read_buffer(device: &wgpu::Device, queue: &wgpu::Queue, src: &wgpu::Buffer) -> RenderResult<Vec<u8>> {
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Staging Buffer"),
        size: src.size(),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, src.size());
    queue.submit(std::iter::once(encoder.finish()));

    map_and_read(device, &staging)
}

fn map_and_read(device: &wgpu::Device, staging: &wgpu::Buffer) -> RenderResult<Vec<u8>> {
    let slice = staging.slice(..);
    let (sender, receiver) = oneshot_channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::Maintain::Wait);

    pollster::block_on(receiver.receive())
        .ok_or_else(|| RenderError::readback("map_async callback channel dropped"))?
        .map_err(RenderError::readback)?;

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_align_to_256() {
        assert_eq!(align_bpr(1), 256);
        assert_eq!(align_bpr(256), 256);
        assert_eq!(align_bpr(257), 512);
    }

    #[test]
    fn pixel_sizes_of_supported_formats() {
        assert_eq!(bytes_per_pixel(wgpu::TextureFormat::R16Uint).unwrap(), 2);
        assert_eq!(bytes_per_pixel(wgpu::TextureFormat::Rgba32Float).unwrap(), 16);
        assert!(bytes_per_pixel(wgpu::TextureFormat::Depth32Float).is_err());
    }
}
