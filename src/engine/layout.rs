// GPU layout for extracted Ptex faces.
//
// Each resolution bucket becomes one RGBA8 2D texture array (one layer per
// face, full mip chain). A dense `TexIndex` record per face tells the shaders
// which array and layer hold that face and how to cross into its neighbours.
//
//   ExtractedTextures → build_face_index() → TexIndex[num_faces] → storage buffer
//                     → ArrayUpload::from_bucket() → texture array per bucket

use bytemuck::Zeroable;
use wgpu::util::DeviceExt;

use super::error::{RenderError, RenderResult};
use super::extract::{ExtractedTextures, ResolutionBucket};
use super::ptex::Res;

/// Neighbour id for boundary edges in `TexIndex`.
pub const NO_NEIGHBOR: u16 = 0xFFFF;

/// Largest face count the 16-bit index can address (0xFFFF is reserved).
pub const MAX_FACES: usize = NO_NEIGHBOR as usize;

// ============================================================================
// PER-FACE INDEX
// ============================================================================

/// Per-face GPU record, 16 bytes. The shader reads it as one `vec4<u32>`:
///   x = array | layer << 16
///   y = n0 | n1 << 16
///   z = n2 | n3 << 16
///   w = transform bytes 0..3
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TexIndex {
    pub array_index:             u16,
    pub layer_index:             u16,
    pub neighbor_face_ids:       [u16; 4],
    pub neighbor_edge_transform: [u8; 4],
}

/// `(local_edge << 2) | neighbor_edge`
pub fn encode_edge_transform(local_edge: u8, neighbor_edge: u8) -> u8 {
    ((local_edge & 3) << 2) | (neighbor_edge & 3)
}

/// Inverse of [`encode_edge_transform`].
pub fn decode_edge_transform(byte: u8) -> (u8, u8) {
    ((byte >> 2) & 3, byte & 3)
}

/// One record per face id, dense and indexable by face id.
///
/// Adjacency is stored exactly as the asset reports it, per face and per
/// edge; nothing is inferred from the opposite side.
pub fn build_face_index(extracted: &ExtractedTextures) -> RenderResult<Vec<TexIndex>> {
    let total = extracted.total_faces;
    if total > MAX_FACES {
        return Err(RenderError::TooManyFaces(total));
    }

    let mut index = vec![TexIndex::zeroed(); total];
    let mut seen = vec![false; total];

    for (array, bucket) in extracted.buckets.iter().enumerate() {
        for (layer, face) in bucket.faces.iter().enumerate() {
            let mut neighbor_face_ids = [NO_NEIGHBOR; 4];
            let mut neighbor_edge_transform = [0u8; 4];
            for edge in 0..4 {
                let adj = face.adj_faces[edge];
                if adj >= 0 && (adj as usize) < total {
                    neighbor_face_ids[edge] = adj as u16;
                }
                neighbor_edge_transform[edge] = encode_edge_transform(edge as u8, face.adj_edges[edge]);
            }

            index[face.face_id] = TexIndex {
                array_index: array as u16,
                layer_index: layer as u16,
                neighbor_face_ids,
                neighbor_edge_transform,
            };
            seen[face.face_id] = true;
        }
    }

    assert!(seen.iter().all(|&s| s), "every face must land in exactly one bucket");
    Ok(index)
}

// ============================================================================
// ARRAY UPLOADS (CPU side)
// ============================================================================

/// Texel data for one texture array: every mip level with all layers packed
/// back to back.
pub struct ArrayUpload {
    pub res:    Res,
    pub layers: u32,
    pub levels: Vec<Vec<u8>>,
}

impl ArrayUpload {
    /// Consume a bucket. Each face block is dropped as soon as it has been
    /// copied into the array data.
    pub fn from_bucket(bucket: ResolutionBucket) -> Self {
        let res = bucket.res;
        let face_bytes = bucket.face_bytes();
        let layers = bucket.faces.len() as u32;

        let mut base = Vec::with_capacity(face_bytes * layers as usize);
        for face in bucket.faces.into_vec() {
            base.extend_from_slice(&face.data);
        }

        let mut levels = vec![base];
        let (mut w, mut h) = (res.u(), res.v());
        while w > 1 || h > 1 {
            let prev = levels.last().map(Vec::as_slice).unwrap_or_default();
            let (nw, nh) = ((w / 2).max(1), (h / 2).max(1));
            let mut next = Vec::with_capacity((nw * nh * 4 * layers) as usize);
            for layer in prev.chunks_exact((w * h * 4) as usize) {
                next.extend(downsample(layer, w, h));
            }
            levels.push(next);
            (w, h) = (nw, nh);
        }

        Self { res, layers, levels }
    }

    pub fn mip_level_count(&self) -> u32 {
        self.levels.len() as u32
    }

    /// Level size in texels.
    pub fn level_size(&self, level: u32) -> (u32, u32) {
        ((self.res.u() >> level).max(1), (self.res.v() >> level).max(1))
    }

    /// Texels of one layer at one mip level.
    pub fn layer(&self, level: u32, layer: u32) -> &[u8] {
        let (w, h) = self.level_size(level);
        let bytes = (w * h * 4) as usize;
        let start = layer as usize * bytes;
        &self.levels[level as usize][start..start + bytes]
    }
}

/// 2×2 box filter of an RGBA8 image; edges repeat when a side is 1.
fn downsample(src: &[u8], w: u32, h: u32) -> Vec<u8> {
    let (nw, nh) = ((w / 2).max(1), (h / 2).max(1));
    let mut out = Vec::with_capacity((nw * nh * 4) as usize);
    let at = |x: u32, y: u32, c: usize| src[((y.min(h - 1) * w + x.min(w - 1)) * 4) as usize + c] as u32;
    for y in 0..nh {
        for x in 0..nw {
            for c in 0..4 {
                let sum = at(2 * x, 2 * y, c)
                    + at(2 * x + 1, 2 * y, c)
                    + at(2 * x, 2 * y + 1, c)
                    + at(2 * x + 1, 2 * y + 1, c);
                out.push(((sum + 2) / 4) as u8);
            }
        }
    }
    out
}

// ============================================================================
// SAMPLERS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TextureFilter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerSettings {
    pub filter:     TextureFilter,
    pub anisotropy: u16,
}

impl SamplerSettings {
    /// Anisotropic filtering needs linear filtering on every axis; nearest
    /// disables it.
    pub fn effective_anisotropy(&self) -> u16 {
        match self.filter {
            TextureFilter::Nearest => 1,
            TextureFilter::Linear => self.anisotropy.clamp(1, 16),
        }
    }

    fn descriptor(&self, label: &'static str, address_mode: wgpu::AddressMode) -> wgpu::SamplerDescriptor<'static> {
        let filter = match self.filter {
            TextureFilter::Nearest => wgpu::FilterMode::Nearest,
            TextureFilter::Linear => wgpu::FilterMode::Linear,
        };
        wgpu::SamplerDescriptor {
            label: Some(label),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: filter,
            anisotropy_clamp: self.effective_anisotropy(),
            border_color: (address_mode == wgpu::AddressMode::ClampToBorder)
                .then_some(wgpu::SamplerBorderColor::TransparentBlack),
            ..Default::default()
        }
    }

    /// Reads outside a face return transparent black.
    pub fn border_sampler(&self, device: &wgpu::Device) -> wgpu::Sampler {
        device.create_sampler(&self.descriptor("Ptex Border Sampler", wgpu::AddressMode::ClampToBorder))
    }

    /// Reads outside a face repeat the edge texels.
    pub fn clamp_sampler(&self, device: &wgpu::Device) -> wgpu::Sampler {
        device.create_sampler(&self.descriptor("Ptex Clamp Sampler", wgpu::AddressMode::ClampToEdge))
    }
}

// ============================================================================
// GPU LAYOUT
// ============================================================================

pub struct ArrayTexture {
    pub res:     Res,
    pub layers:  u32,
    pub texture: wgpu::Texture,
    pub view:    wgpu::TextureView,
}

/// Texture arrays plus the face index buffer. Read-only once built.
pub struct GpuPtexLayout {
    pub arrays:            Vec<ArrayTexture>,
    pub face_index:        Vec<TexIndex>,
    pub face_index_buffer: wgpu::Buffer,
}

impl GpuPtexLayout {
    pub fn build(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        extracted: ExtractedTextures,
    ) -> RenderResult<Self> {
        let face_index = build_face_index(&extracted)?;
        let max_layers = device.limits().max_texture_array_layers;

        let mut arrays = Vec::with_capacity(extracted.buckets.len());
        for (i, bucket) in extracted.buckets.into_iter().enumerate() {
            let upload = ArrayUpload::from_bucket(bucket);
            if upload.layers > max_layers {
                return Err(RenderError::device(format!(
                    "bucket {}x{} has {} faces, device allows {} array layers",
                    upload.res.u(),
                    upload.res.v(),
                    upload.layers,
                    max_layers,
                )));
            }
            arrays.push(upload_array(device, queue, i, &upload));
        }

        let face_index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Ptex Face Index Buffer"),
            contents: bytemuck::cast_slice(&face_index),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });

        log::info!(
            "Uploaded {} texture arrays, face index {} bytes",
            arrays.len(),
            face_index.len() * std::mem::size_of::<TexIndex>(),
        );

        Ok(Self { arrays, face_index, face_index_buffer })
    }

    pub fn num_faces(&self) -> usize {
        self.face_index.len()
    }
}

fn upload_array(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    index: usize,
    upload: &ArrayUpload,
) -> ArrayTexture {
    let (w, h) = (upload.res.u(), upload.res.v());
    let label = format!("Ptex Array {index} ({w}x{h})");
    let format = wgpu::TextureFormat::Rgba8Unorm;

    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(&label),
        size: wgpu::Extent3d {
            width: w,
            height: h,
            depth_or_array_layers: upload.layers,
        },
        mip_level_count: upload.mip_level_count(),
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });

    for (level, data) in upload.levels.iter().enumerate() {
        let (lw, lh) = upload.level_size(level as u32);
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: level as u32,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(lw * 4),
                rows_per_image: Some(lh),
            },
            wgpu::Extent3d {
                width: lw,
                height: lh,
                depth_or_array_layers: upload.layers,
            },
        );
    }

    let view = texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some(&format!("{label} View")),
        format: Some(format),
        dimension: Some(wgpu::TextureViewDimension::D2Array),
        ..Default::default()
    });

    log::debug!("{label}: {} layers, {} mips", upload.layers, upload.mip_level_count());

    ArrayTexture {
        res: upload.res,
        layers: upload.layers,
        texture,
        view,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::extract::extract;
    use crate::engine::gpu;
    use crate::engine::ptex::{DataType, FaceInfo, MemoryPtex, NO_ADJACENT};
    use crate::engine::readback::read_texture_layer;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn red_blue_asset() -> MemoryPtex {
        let res = Res::new(2, 2);
        let mut asset = MemoryPtex::new(4, DataType::Uint8);
        let left = FaceInfo { res, adj_faces: [NO_ADJACENT, 1, NO_ADJACENT, NO_ADJACENT], adj_edges: [0, 3, 0, 0] };
        let right = FaceInfo { res, adj_faces: [NO_ADJACENT, NO_ADJACENT, NO_ADJACENT, 0], adj_edges: [0, 0, 0, 1] };
        asset.add_face(left, RED.repeat(16)).unwrap();
        asset.add_face(right, BLUE.repeat(16)).unwrap();
        asset
    }

    fn mixed_asset() -> MemoryPtex {
        let mut asset = MemoryPtex::new(4, DataType::Uint8);
        let resolutions = [(1, 1), (2, 0), (1, 1), (0, 2), (2, 0), (1, 1), (3, 3)];
        for (i, &(u, v)) in resolutions.iter().enumerate() {
            let info = FaceInfo {
                res: Res::new(u, v),
                adj_faces: [(i as i32 + 1) % 7, NO_ADJACENT, (i as i32 + 6) % 7, NO_ADJACENT],
                adj_edges: [2, 0, 0, 3],
            };
            let data = (0..info.res.size() * 4).map(|b| (b * 7 + i * 31) as u8).collect();
            asset.add_face(info, data).unwrap();
        }
        asset
    }

    #[test]
    fn record_is_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<TexIndex>(), 16);
    }

    #[test]
    fn edge_transform_packs_local_and_neighbor_edge() {
        assert_eq!(encode_edge_transform(1, 3), 0b0111);
        for local in 0..4 {
            for neighbor in 0..4 {
                assert_eq!(decode_edge_transform(encode_edge_transform(local, neighbor)), (local, neighbor));
            }
        }
    }

    #[test]
    fn every_face_points_at_its_own_layer_data() {
        let asset = mixed_asset();
        let extracted = extract(&asset).unwrap();
        let expected: Vec<Vec<u8>> = {
            let mut per_face = vec![Vec::new(); extracted.total_faces];
            for bucket in &extracted.buckets {
                for face in &bucket.faces {
                    per_face[face.face_id] = face.data.clone();
                }
            }
            per_face
        };

        let index = build_face_index(&extracted).unwrap();
        assert_eq!(index.len(), 7);

        let uploads: Vec<ArrayUpload> = extracted.buckets.into_iter().map(ArrayUpload::from_bucket).collect();
        for (face, record) in index.iter().enumerate() {
            let upload = &uploads[record.array_index as usize];
            assert_eq!(upload.layer(0, record.layer_index as u32), expected[face].as_slice(), "face {face}");
        }
    }

    #[test]
    fn neighbors_and_boundaries_are_recorded_per_edge() {
        let extracted = extract(&mixed_asset()).unwrap();
        let index = build_face_index(&extracted).unwrap();
        let r = index[3];
        assert_eq!(r.neighbor_face_ids, [4, NO_NEIGHBOR, 2, NO_NEIGHBOR]);
        assert_eq!(r.neighbor_edge_transform, [
            encode_edge_transform(0, 2),
            encode_edge_transform(1, 0),
            encode_edge_transform(2, 0),
            encode_edge_transform(3, 3),
        ]);
    }

    #[test]
    fn mip_chain_reaches_one_texel() {
        let extracted = extract(&mixed_asset()).unwrap();
        let bucket = extracted.buckets.into_iter().find(|b| b.res == Res::new(3, 3)).unwrap();
        let upload = ArrayUpload::from_bucket(bucket);
        assert_eq!(upload.mip_level_count(), 4);
        assert_eq!(upload.level_size(3), (1, 1));
        assert_eq!(upload.levels[3].len(), 4);

        let rect = ArrayUpload::from_bucket(extract(&mixed_asset()).unwrap().buckets.remove(1));
        assert_eq!(rect.res, Res::new(2, 0));
        assert_eq!(rect.mip_level_count(), 3);
        assert_eq!(rect.level_size(1), (2, 1));
        assert_eq!(rect.levels[1].len(), 2 * 2 * 4);
    }

    #[test]
    fn downsample_averages_quads() {
        let src = [
            0, 0, 0, 0, 4, 4, 4, 4,
            8, 8, 8, 8, 12, 12, 12, 12,
        ];
        assert_eq!(downsample(&src, 2, 2), vec![6, 6, 6, 6]);
    }

    #[test]
    fn nearest_filter_disables_anisotropy() {
        let s = SamplerSettings { filter: TextureFilter::Nearest, anisotropy: 16 };
        assert_eq!(s.effective_anisotropy(), 1);
        let s = SamplerSettings { filter: TextureFilter::Linear, anisotropy: 64 };
        assert_eq!(s.effective_anisotropy(), 16);
    }

    #[test]
    fn uploaded_layers_hold_their_faces() {
        let Some((device, queue)) = gpu::headless_device(wgpu::Features::empty()) else {
            return;
        };
        let layout = GpuPtexLayout::build(&device, &queue, extract(&red_blue_asset()).unwrap()).unwrap();
        assert_eq!(layout.num_faces(), 2);
        for (face, color) in [(0, RED), (1, BLUE)] {
            let record = layout.face_index[face];
            let array = &layout.arrays[record.array_index as usize];
            let texels = read_texture_layer(
                &device,
                &queue,
                &array.texture,
                record.layer_index as u32,
                (4, 4),
                wgpu::TextureFormat::Rgba8Unorm,
            )
            .unwrap();
            assert!(texels.chunks_exact(4).all(|t| t == color), "face {face}");
        }
    }
}
