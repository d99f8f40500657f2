// Texel sampling on the CPU.
//
// `sample()` is the single-face bilinear/nearest lookup. `sample_face()` and
// `calculate_image_cpu()` turn the face-id/UV/derivative attachments of the
// to-cpu pass into the reference image every GPU method is compared against.

use glam::{Vec2, Vec3, Vec4};

use super::filter::FaceFilter;
use super::ptex::PtexSource;

/// Returned for face ids the asset doesn't have.
pub const ERROR_COLOR: Vec3 = Vec3::new(1.0, 0.0, 1.0);

/// Texel coordinates are clamped to this magnitude before integer
/// conversion, so neighbour offsets (`+ 1`) cannot overflow.
const COORD_LIMIT: f32 = (1 << 24) as f32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapMode {
    Clamp,
    Repeat,
    /// Pass coordinates through; the texel source resolves out-of-range
    /// texels itself (from neighbouring faces).
    Adjacent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerState {
    pub wrap: WrapMode,
    pub mag:  FilterMode,
    pub min:  FilterMode,
}

impl SamplerState {
    pub fn nearest(wrap: WrapMode) -> Self {
        Self { wrap, mag: FilterMode::Nearest, min: FilterMode::Nearest }
    }

    pub fn linear(wrap: WrapMode) -> Self {
        Self { wrap, mag: FilterMode::Linear, min: FilterMode::Linear }
    }

    fn is_nearest(&self) -> bool {
        self.mag == FilterMode::Nearest && self.min == FilterMode::Nearest
    }
}

pub fn wrap(coord: i32, size: i32, mode: WrapMode) -> i32 {
    match mode {
        WrapMode::Clamp => coord.clamp(0, size - 1),
        WrapMode::Repeat => coord.rem_euclid(size),
        WrapMode::Adjacent => coord,
    }
}

/// A grid of texels addressed by integer `(i, j)`, `i` along u.
pub trait TexelSource {
    fn width(&self) -> i32;
    fn height(&self) -> i32;
    fn texel(&self, i: i32, j: i32) -> Vec4;
}

/// Row-major texels borrowed from elsewhere. Out-of-range fetches clamp.
pub struct TexelGrid<'a> {
    pub width:  i32,
    pub height: i32,
    pub texels: &'a [Vec4],
}

impl TexelSource for TexelGrid<'_> {
    fn width(&self) -> i32 {
        self.width
    }

    fn height(&self) -> i32 {
        self.height
    }

    fn texel(&self, i: i32, j: i32) -> Vec4 {
        let i = i.clamp(0, self.width - 1);
        let j = j.clamp(0, self.height - 1);
        self.texels[(j * self.width + i) as usize]
    }
}

/// Sample `tex` at normalised `uv`. Texel centres sit at `(i + 0.5) / width`.
pub fn sample<S: TexelSource + ?Sized>(tex: &S, uv: Vec2, state: SamplerState) -> Vec4 {
    let (w, h) = (tex.width(), tex.height());
    let mode = state.wrap;

    if state.is_nearest() {
        let i = wrap(texel_coord(uv.x * w as f32).floor() as i32, w, mode);
        let j = wrap(texel_coord(uv.y * h as f32).floor() as i32, h, mode);
        return tex.texel(i, j);
    }

    let x = texel_coord(uv.x * w as f32 - 0.5);
    let y = texel_coord(uv.y * h as f32 - 0.5);
    let (x0, y0) = (x.floor(), y.floor());
    let (alpha, beta) = (x - x0, y - y0);

    let i0 = wrap(x0 as i32, w, mode);
    let j0 = wrap(y0 as i32, h, mode);
    let i1 = wrap(x0 as i32 + 1, w, mode);
    let j1 = wrap(y0 as i32 + 1, h, mode);

    let bottom = tex.texel(i0, j0).lerp(tex.texel(i1, j0), alpha);
    let top = tex.texel(i0, j1).lerp(tex.texel(i1, j1), alpha);
    bottom.lerp(top, beta)
}

fn texel_coord(x: f32) -> f32 {
    x.clamp(-COORD_LIMIT, COORD_LIMIT)
}

pub fn sample_bilinear<S: TexelSource + ?Sized>(tex: &S, uv: Vec2, wrap: WrapMode) -> Vec3 {
    sample(tex, uv, SamplerState::linear(wrap)).truncate()
}

/// Filtered colour of `face_id` at `uv`. `derivs` is
/// `(du/dx, dv/dx, du/dy, dv/dy)`. Single-channel assets are replicated to
/// grey.
pub fn sample_face(
    asset: &dyn PtexSource,
    filter: &dyn FaceFilter,
    face_id: usize,
    uv: Vec2,
    derivs: Vec4,
) -> Vec3 {
    if face_id >= asset.num_faces() {
        return ERROR_COLOR;
    }

    let channels = asset.num_channels().min(4);
    let mut out = [0.0f32; 4];
    filter.eval(
        &mut out[..channels],
        0,
        channels,
        face_id,
        uv.x,
        uv.y,
        derivs.x,
        derivs.y,
        derivs.z,
        derivs.w,
    );
    if channels == 1 {
        Vec3::splat(out[0])
    } else {
        Vec3::new(out[0], out[1], out[2])
    }
}

/// Attachments read back from the to-cpu pass, one entry per pixel.
pub struct CpuFrameInputs<'a> {
    pub width:     u32,
    pub height:    u32,
    /// Face id + 1; 0 where nothing was rasterised.
    pub face_ids:  &'a [u16],
    pub uvs:       &'a [Vec2],
    /// `(du/dx, dv/dx, du/dy, dv/dy)`
    pub uv_derivs: &'a [Vec4],
}

/// Reconstruct the frame on the CPU. With `cross_derivatives` off, the
/// off-diagonal terms (`dv/dx`, `du/dy`) are dropped before filtering.
pub fn calculate_image_cpu(
    asset: &dyn PtexSource,
    filter: &dyn FaceFilter,
    inputs: &CpuFrameInputs<'_>,
    background: Vec3,
    cross_derivatives: bool,
) -> Vec<Vec3> {
    let pixels = inputs.width as usize * inputs.height as usize;
    assert_eq!(inputs.face_ids.len(), pixels, "face id buffer size");
    assert_eq!(inputs.uvs.len(), pixels, "uv buffer size");
    assert_eq!(inputs.uv_derivs.len(), pixels, "uv derivative buffer size");

    (0..pixels)
        .map(|p| {
            let Some(face) = (inputs.face_ids[p] as usize).checked_sub(1) else {
                return background;
            };
            let mut derivs = inputs.uv_derivs[p];
            if !cross_derivatives {
                derivs.y = 0.0;
                derivs.z = 0.0;
            }
            sample_face(asset, filter, face, inputs.uvs[p], derivs)
        })
        .collect()
}

/// Float to 8-bit conversion rule for CPU images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RoundingRule {
    /// `round(f * 255)`
    #[default]
    Round,
    /// `floor(f * 255 + 0.5)`, the C cast of `f * 255 + 0.5`
    HalfUp,
    /// `trunc(f * 255)`
    Truncate,
}

impl RoundingRule {
    pub const ALL: [RoundingRule; 3] = [RoundingRule::Round, RoundingRule::HalfUp, RoundingRule::Truncate];

    pub fn to_u8(self, f: f32) -> u8 {
        let x = f.clamp(0.0, 1.0) * 255.0;
        let y = match self {
            RoundingRule::Round => x.round(),
            RoundingRule::HalfUp => (x + 0.5).floor(),
            RoundingRule::Truncate => x.trunc(),
        };
        y.min(255.0) as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            RoundingRule::Round => "round",
            RoundingRule::HalfUp => "round + 0.5",
            RoundingRule::Truncate => "truncate",
        }
    }
}

/// Opaque RGBA8 from an RGB float image.
pub fn to_rgba8(image: &[Vec3], rule: RoundingRule) -> Vec<u8> {
    let mut out = Vec::with_capacity(image.len() * 4);
    for c in image {
        out.extend([rule.to_u8(c.x), rule.to_u8(c.y), rule.to_u8(c.z), 255]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::filter::test_assets::side_by_side;
    use crate::engine::filter::{FilterKind, TexelFilter};

    #[test]
    fn repeat_wrap_is_mathematical_modulo() {
        for size in 1..7 {
            for coord in -20..20 {
                let w = wrap(coord, size, WrapMode::Repeat);
                assert!((0..size).contains(&w));
                assert_eq!((w - coord).rem_euclid(size), 0);
            }
        }
        assert_eq!(wrap(-1, 4, WrapMode::Repeat), 3);
    }

    #[test]
    fn clamp_wrap_keeps_in_range_coords() {
        for size in 1..7 {
            for coord in -20..20 {
                let w = wrap(coord, size, WrapMode::Clamp);
                assert!((0..size).contains(&w));
                if (0..size).contains(&coord) {
                    assert_eq!(w, coord);
                }
            }
        }
    }

    #[test]
    fn constant_texture_samples_exactly() {
        let color = Vec4::new(0.2, 0.4, 0.6, 1.0);
        let texels = vec![color; 12];
        let grid = TexelGrid { width: 4, height: 3, texels: &texels };
        for mode in [WrapMode::Clamp, WrapMode::Repeat] {
            for uv in [Vec2::ZERO, Vec2::new(0.13, 0.77), Vec2::ONE, Vec2::new(-0.4, 1.3)] {
                assert_eq!(sample(&grid, uv, SamplerState::linear(mode)), color);
            }
        }
    }

    #[test]
    fn texel_centres_return_stored_values() {
        let texels: Vec<Vec4> = (0..16).map(|i| Vec4::splat(i as f32 / 16.0)).collect();
        let grid = TexelGrid { width: 4, height: 4, texels: &texels };
        for j in 0..4 {
            for i in 0..4 {
                let uv = Vec2::new((i as f32 + 0.5) / 4.0, (j as f32 + 0.5) / 4.0);
                let expected = texels[(j * 4 + i) as usize];
                assert_eq!(sample(&grid, uv, SamplerState::linear(WrapMode::Clamp)), expected);
                assert_eq!(sample(&grid, uv, SamplerState::nearest(WrapMode::Repeat)), expected);
            }
        }
    }

    #[test]
    fn repeat_wrap_blends_opposite_edge() {
        let texels = [Vec4::ZERO, Vec4::ONE];
        let grid = TexelGrid { width: 2, height: 1, texels: &texels };
        // Halfway between the last texel and the wrapped first one.
        let c = sample_bilinear(&grid, Vec2::new(1.0, 0.5), WrapMode::Repeat);
        assert_eq!(c, Vec3::splat(0.5));
        let c = sample_bilinear(&grid, Vec2::new(1.0, 0.5), WrapMode::Clamp);
        assert_eq!(c, Vec3::ONE);
    }

    #[test]
    fn out_of_range_face_is_magenta() {
        let asset = side_by_side([255, 0, 0, 255], [0, 0, 255, 255]);
        let filter = TexelFilter::new(&asset, FilterKind::Box).unwrap();
        for face in [2, 3, 1000] {
            for uv in [Vec2::ZERO, Vec2::splat(0.5)] {
                let c = sample_face(&asset, &filter, face, uv, Vec4::new(0.1, 0.2, 0.3, 0.4));
                assert_eq!(c, ERROR_COLOR);
            }
        }
    }

    #[test]
    fn two_face_scene_reconstructs_red_and_blue() {
        let asset = side_by_side([255, 0, 0, 255], [0, 0, 255, 255]);
        let filter = TexelFilter::new(&asset, FilterKind::Bilinear).unwrap();

        let face_ids = [1u16, 1, 2, 2];
        let uvs = [Vec2::splat(0.5); 4];
        let derivs = [Vec4::ZERO; 4];
        let inputs = CpuFrameInputs { width: 2, height: 2, face_ids: &face_ids, uvs: &uvs, uv_derivs: &derivs };

        let image = calculate_image_cpu(&asset, &filter, &inputs, Vec3::splat(0.1), false);
        assert_eq!(image, vec![Vec3::X, Vec3::X, Vec3::Z, Vec3::Z]);
    }

    #[test]
    fn zero_face_id_is_background_and_overflow_is_error_color() {
        let asset = side_by_side([255, 0, 0, 255], [0, 0, 255, 255]);
        let filter = TexelFilter::new(&asset, FilterKind::Point).unwrap();
        let background = Vec3::new(0.1, 0.2, 0.3);

        let face_ids = [0u16, 3];
        let uvs = [Vec2::splat(0.5); 2];
        let derivs = [Vec4::ZERO; 2];
        let inputs = CpuFrameInputs { width: 2, height: 1, face_ids: &face_ids, uvs: &uvs, uv_derivs: &derivs };

        let image = calculate_image_cpu(&asset, &filter, &inputs, background, true);
        assert_eq!(image, vec![background, ERROR_COLOR]);
    }

    #[test]
    fn rounding_rules_differ_where_expected() {
        assert_eq!(RoundingRule::Round.to_u8(0.75), 191);
        assert_eq!(RoundingRule::HalfUp.to_u8(0.75), 191);
        assert_eq!(RoundingRule::HalfUp.to_u8(0.5), 128);
        assert_eq!(RoundingRule::HalfUp.to_u8(0.0), 0);
        assert_eq!(RoundingRule::HalfUp.to_u8(1.0 / 255.0), 1);
        // 100.4 and 100.6 land either side of the half.
        assert_eq!(RoundingRule::HalfUp.to_u8(100.4 / 255.0), 100);
        assert_eq!(RoundingRule::HalfUp.to_u8(100.6 / 255.0), 101);
        assert_eq!(RoundingRule::Truncate.to_u8(100.6 / 255.0), 100);
        assert_eq!(RoundingRule::Truncate.to_u8(0.75), 191);
        assert_eq!(RoundingRule::Round.to_u8(0.5), 128);
        assert_eq!(RoundingRule::Truncate.to_u8(0.5), 127);
        for rule in RoundingRule::ALL {
            assert_eq!(rule.to_u8(0.0), 0);
            assert_eq!(rule.to_u8(1.0), 255);
            assert_eq!(rule.to_u8(-3.0), 0);
        }
    }

    /// Records the derivatives it is asked to filter with.
    struct RecordingFilter(std::cell::Cell<Vec4>);

    impl FaceFilter for RecordingFilter {
        fn eval(
            &self,
            out: &mut [f32],
            _first_channel: usize,
            _num_channels: usize,
            _face_id: usize,
            _u: f32,
            _v: f32,
            dudx: f32,
            dvdx: f32,
            dudy: f32,
            dvdy: f32,
        ) {
            self.0.set(Vec4::new(dudx, dvdx, dudy, dvdy));
            out.fill(0.0);
        }
    }

    #[test]
    fn off_diagonal_derivatives_are_kept_only_with_the_flag() {
        let asset = side_by_side([255, 0, 0, 255], [0, 0, 255, 255]);
        let filter = RecordingFilter(std::cell::Cell::new(Vec4::ZERO));
        let derivs = [Vec4::new(0.1, 0.2, 0.3, 0.4)];
        let inputs = CpuFrameInputs {
            width: 1,
            height: 1,
            face_ids: &[1],
            uvs: &[Vec2::splat(0.5)],
            uv_derivs: &derivs,
        };

        calculate_image_cpu(&asset, &filter, &inputs, Vec3::ZERO, false);
        assert_eq!(filter.0.get(), Vec4::new(0.1, 0.0, 0.0, 0.4));
        calculate_image_cpu(&asset, &filter, &inputs, Vec3::ZERO, true);
        assert_eq!(filter.0.get(), derivs[0]);
    }

    #[test]
    fn huge_and_infinite_uvs_stay_in_the_grid() {
        let color = Vec4::new(0.2, 0.4, 0.6, 1.0);
        let texels = vec![color; 16];
        let grid = TexelGrid { width: 4, height: 4, texels: &texels };
        for mode in [WrapMode::Clamp, WrapMode::Repeat, WrapMode::Adjacent] {
            for uv in [Vec2::new(1.0e10, 0.5), Vec2::new(-1.0e10, 0.5), Vec2::new(0.5, 1.0e10)] {
                assert_eq!(sample(&grid, uv, SamplerState::linear(mode)), color);
                assert_eq!(sample(&grid, uv, SamplerState::nearest(mode)), color);
            }
            for uv in [Vec2::new(f32::INFINITY, 0.5), Vec2::new(0.5, f32::NEG_INFINITY), Vec2::NAN] {
                sample(&grid, uv, SamplerState::linear(mode));
                sample(&grid, uv, SamplerState::nearest(mode));
            }
        }
    }

    #[test]
    fn sample_face_survives_infinite_uv() {
        let asset = side_by_side([255, 0, 0, 255], [0, 0, 255, 255]);
        for kind in [FilterKind::Point, FilterKind::Bilinear, FilterKind::Box] {
            let filter = TexelFilter::new(&asset, kind).unwrap();
            for uv in [Vec2::new(f32::INFINITY, 0.5), Vec2::new(1.0e10, 0.5)] {
                sample_face(&asset, &filter, 0, uv, Vec4::new(0.1, 0.0, 0.0, 0.1));
            }
            sample_face(&asset, &filter, 0, Vec2::splat(0.5), Vec4::splat(f32::INFINITY));
        }
    }

    #[test]
    fn rgba8_is_opaque() {
        let bytes = to_rgba8(&[Vec3::new(1.0, 0.0, 0.5)], RoundingRule::Round);
        assert_eq!(bytes, vec![255, 0, 128, 255]);
    }
}
