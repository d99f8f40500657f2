// CPU face filter over a decoded copy of a Ptex asset.
//
// Texels that fall outside a face on exactly one axis are fetched from the
// adjacent face through the edge transform. Corner texels (outside on both
// axes) and boundary edges clamp to the face itself.

use glam::{Vec2, Vec4};

use super::error::PtexError;
use super::ptex::{neighbor_uv, DataType, FaceInfo, PtexSource};
use super::sampler::{sample, SamplerState, TexelSource, WrapMode};

/// Upper bound on bilinear taps along the major axis of a box footprint.
pub const MAX_BOX_TAPS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FilterKind {
    Point,
    Bilinear,
    Box,
}

/// Filtered lookup of one face, parameterised by screen-space UV derivatives.
pub trait FaceFilter {
    /// Write `num_channels` channels starting at `first_channel` into `out`.
    /// Channels the asset doesn't have read as zero.
    #[allow(clippy::too_many_arguments)]
    fn eval(
        &self,
        out: &mut [f32],
        first_channel: usize,
        num_channels: usize,
        face_id: usize,
        u: f32,
        v: f32,
        dudx: f32,
        dvdx: f32,
        dudy: f32,
        dvdy: f32,
    );
}

struct DecodedFace {
    width:  i32,
    height: i32,
    texels: Vec<Vec4>,
    info:   FaceInfo,
}

impl DecodedFace {
    fn at(&self, i: i32, j: i32) -> Vec4 {
        let i = i.clamp(0, self.width - 1);
        let j = j.clamp(0, self.height - 1);
        self.texels[(j * self.width + i) as usize]
    }
}

pub struct TexelFilter {
    kind:     FilterKind,
    channels: usize,
    faces:    Vec<DecodedFace>,
}

impl TexelFilter {
    /// Decode every face of `asset` to floats. The asset is not referenced
    /// afterwards; the decoded copy is released with the filter.
    pub fn new(asset: &dyn PtexSource, kind: FilterKind) -> Result<Self, PtexError> {
        let channels = asset.num_channels();
        let data_type = asset.data_type();
        if channels == 0 || channels > 4 {
            return Err(PtexError::UnsupportedFormat { channels, data_type });
        }

        let mut faces = Vec::with_capacity(asset.num_faces());
        let mut raw = Vec::new();
        for face in 0..asset.num_faces() {
            let info = asset.face_info(face);
            raw.resize(asset.face_data_size(face), 0);
            asset.get_data(face, &mut raw)?;

            let texels = raw
                .chunks_exact(channels * data_type.size())
                .map(|texel| decode_texel(texel, channels, data_type))
                .collect();
            faces.push(DecodedFace {
                width: info.res.u() as i32,
                height: info.res.v() as i32,
                texels,
                info,
            });
        }

        Ok(Self { kind, channels, faces })
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: FilterKind) {
        self.kind = kind;
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// Filtered RGBA of `face` at `uv`; `derivs` is `(du/dx, dv/dx, du/dy, dv/dy)`.
    pub fn sample(&self, face: usize, uv: Vec2, derivs: Vec4) -> Vec4 {
        let texels = FaceTexels { filter: self, face };
        match self.kind {
            FilterKind::Point => sample(&texels, uv, SamplerState::nearest(WrapMode::Adjacent)),
            FilterKind::Bilinear => sample(&texels, uv, SamplerState::linear(WrapMode::Adjacent)),
            FilterKind::Box => self.sample_box(&texels, uv, derivs),
        }
    }

    fn sample_box(&self, texels: &FaceTexels<'_>, uv: Vec2, derivs: Vec4) -> Vec4 {
        let state = SamplerState::linear(WrapMode::Adjacent);
        let scale = Vec2::new(texels.width() as f32, texels.height() as f32);
        let ax = Vec2::new(derivs.x, derivs.y);
        let ay = Vec2::new(derivs.z, derivs.w);
        let (len_x, len_y) = ((ax * scale).length(), (ay * scale).length());
        let (major, len) = if len_x >= len_y { (ax, len_x) } else { (ay, len_y) };

        let taps = (len.ceil() as usize).clamp(1, MAX_BOX_TAPS);
        if taps == 1 {
            return sample(texels, uv, state);
        }
        let sum: Vec4 = (0..taps)
            .map(|k| {
                let t = (k as f32 + 0.5) / taps as f32 - 0.5;
                sample(texels, uv + major * t, state)
            })
            .sum();
        sum / taps as f32
    }
}

impl FaceFilter for TexelFilter {
    fn eval(
        &self,
        out: &mut [f32],
        first_channel: usize,
        num_channels: usize,
        face_id: usize,
        u: f32,
        v: f32,
        dudx: f32,
        dvdx: f32,
        dudy: f32,
        dvdy: f32,
    ) {
        let rgba = self.sample(face_id, Vec2::new(u, v), Vec4::new(dudx, dvdx, dudy, dvdy));
        let available = self.channels.min(4);
        for (c, slot) in out.iter_mut().take(num_channels).enumerate() {
            let channel = first_channel + c;
            *slot = if channel < available { rgba[channel] } else { 0.0 };
        }
    }
}

/// One face's texel grid with neighbour-aware out-of-range fetches.
struct FaceTexels<'a> {
    filter: &'a TexelFilter,
    face:   usize,
}

impl TexelSource for FaceTexels<'_> {
    fn width(&self) -> i32 {
        self.filter.faces[self.face].width
    }

    fn height(&self) -> i32 {
        self.filter.faces[self.face].height
    }

    fn texel(&self, i: i32, j: i32) -> Vec4 {
        let face = &self.filter.faces[self.face];
        let (w, h) = (face.width, face.height);
        let in_u = (0..w).contains(&i);
        let in_v = (0..h).contains(&j);
        if in_u == in_v {
            return face.at(i, j);
        }

        let edge = if j < 0 {
            0
        } else if i >= w {
            1
        } else if j >= h {
            2
        } else {
            3
        };
        let adj = face.info.adj_faces[edge];
        let Some(neighbor) = usize::try_from(adj).ok().and_then(|n| self.filter.faces.get(n)) else {
            return face.at(i, j);
        };

        let uv = Vec2::new((i as f32 + 0.5) / w as f32, (j as f32 + 0.5) / h as f32);
        let nuv = neighbor_uv(uv, edge, face.info.adj_edges[edge] as usize);
        neighbor.at(
            (nuv.x * neighbor.width as f32).floor() as i32,
            (nuv.y * neighbor.height as f32).floor() as i32,
        )
    }
}

fn decode_texel(bytes: &[u8], channels: usize, data_type: DataType) -> Vec4 {
    let mut texel = [0.0f32; 4];
    let size = data_type.size();
    for (c, value) in texel.iter_mut().enumerate().take(channels) {
        let b = &bytes[c * size..(c + 1) * size];
        *value = match data_type {
            DataType::Uint8 => b[0] as f32 / 255.0,
            DataType::Uint16 => u16::from_le_bytes([b[0], b[1]]) as f32 / 65535.0,
            DataType::Half => half::f16::from_le_bytes([b[0], b[1]]).to_f32(),
            DataType::Float => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        };
    }
    Vec4::from_array(texel)
}

// Also used by the sampler tests to build small assets.
#[cfg(test)]
pub(crate) mod test_assets {
    use crate::engine::ptex::{DataType, FaceInfo, MemoryPtex, Res, NO_ADJACENT};

    /// Two 4×4 RGBA8 faces side by side: face 0 solid `a`, face 1 solid `b`,
    /// face 0's u=1 edge glued to face 1's u=0 edge.
    pub fn side_by_side(a: [u8; 4], b: [u8; 4]) -> MemoryPtex {
        let res = Res::new(2, 2);
        let mut asset = MemoryPtex::new(4, DataType::Uint8);
        let left = FaceInfo {
            res,
            adj_faces: [NO_ADJACENT, 1, NO_ADJACENT, NO_ADJACENT],
            adj_edges: [0, 3, 0, 0],
        };
        let right = FaceInfo {
            res,
            adj_faces: [NO_ADJACENT, NO_ADJACENT, NO_ADJACENT, 0],
            adj_edges: [0, 0, 0, 1],
        };
        asset.add_face(left, a.repeat(16)).unwrap();
        asset.add_face(right, b.repeat(16)).unwrap();
        asset
    }
}
