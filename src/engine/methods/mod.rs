// Render method strategies.
//
// Every method draws the same mesh with the same camera into its own
// framebuffer. The four GPU methods share `PtexPass` and differ in their
// fragment shader and sampler binding; the CPU method rasterises what the
// reference sampler needs and reconstructs the frame on the host.

pub mod blit;
pub mod cpu;
pub mod hybrid;
pub mod intel;
pub mod nvidia;
pub mod ptex_pass;
pub mod reduced_traverse;

use std::sync::Arc;

use glam::Mat4;

use super::config::Settings;
use super::error::{RenderError, RenderResult};
use super::extract::extract;
use super::filter::TexelFilter;
use super::framebuffer::{Framebuffer, DEPTH_FORMAT};
use super::layout::GpuPtexLayout;
use super::mesh::PtexVertex;
use super::profiler::{PassId, Profiler};
use super::ptex::PtexSource;

// ============================================================================
// METHODS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Method {
    Cpu,
    Nvidia,
    Intel,
    Hybrid,
    ReducedTraverse,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::Cpu,
        Method::Nvidia,
        Method::Intel,
        Method::Hybrid,
        Method::ReducedTraverse,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Method::Cpu => "CPU",
            Method::Nvidia => "Nvidia",
            Method::Intel => "Intel",
            Method::Hybrid => "Hybrid",
            Method::ReducedTraverse => "Reduced Traverse",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Method> {
        Self::ALL.get(index).copied()
    }

    pub fn next(self) -> Method {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }
}

/// Profiler pass ids.
pub mod pass_id {
    use crate::engine::profiler::PassId;

    pub const FRAME: PassId = 0;
    pub const NVIDIA: PassId = 10;
    pub const INTEL: PassId = 11;
    pub const HYBRID: PassId = 12;
    pub const REDUCED_TRAVERSE: PassId = 13;
    pub const CPU: PassId = 20;
    pub const TO_CPU: PassId = 21;
    pub const READBACK: PassId = 22;
    pub const CPU_SAMPLING: PassId = 23;
    pub const UPLOAD: PassId = 24;
    pub const CPU_BLIT: PassId = 25;
    pub const COMPOSITE: PassId = 30;
    pub const OVERLAY: PassId = 31;
}

// ============================================================================
// CONTEXT
// ============================================================================

/// Everything the strategies read while drawing. Built once per asset.
pub struct RendererContext {
    pub device:   Arc<wgpu::Device>,
    pub queue:    Arc<wgpu::Queue>,
    pub ptex:     GpuPtexLayout,
    pub asset:    Box<dyn PtexSource>,
    pub filter:   TexelFilter,
    pub settings: Settings,
}

impl RendererContext {
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        asset: Box<dyn PtexSource>,
        settings: Settings,
    ) -> RenderResult<Self> {
        let filter = TexelFilter::new(asset.as_ref(), settings.cpu_filter)?;
        let extracted = extract(asset.as_ref())?;
        let ptex = GpuPtexLayout::build(&device, &queue, extracted)?;
        Ok(Self { device, queue, ptex, asset, filter, settings })
    }

    /// Apply edited settings. The CPU filter follows immediately; sampler
    /// changes need new strategies.
    pub fn update_settings(&mut self, settings: Settings) {
        if settings.cpu_filter != self.filter.kind() {
            self.filter.set_kind(settings.cpu_filter);
        }
        self.settings = settings;
    }
}

pub struct DrawInput<'a> {
    pub vertex_buffer: &'a wgpu::Buffer,
    pub vertex_count:  u32,
    pub mvp:           Mat4,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PassUniforms {
    pub mvp:   [[f32; 4]; 4],
    pub flags: [u32; 4],
}

impl PassUniforms {
    pub fn new(mvp: Mat4, visualize_heuristic: bool) -> Self {
        Self {
            mvp: mvp.to_cols_array_2d(),
            flags: [visualize_heuristic as u32, 0, 0, 0],
        }
    }
}

// ============================================================================
// STRATEGY INTERFACE
// ============================================================================

pub trait RenderStrategy {
    fn method(&self) -> Method;

    /// Draw one frame. Returns the framebuffer holding the result.
    fn render(
        &mut self,
        ctx: &RendererContext,
        input: &DrawInput<'_>,
        profiler: &mut Profiler,
    ) -> RenderResult<&Framebuffer>;

    /// Rebuild every viewport-sized attachment. Texture arrays, samplers and
    /// the face index are untouched.
    fn resize_buffers(&mut self, device: &wgpu::Device, width: u32, height: u32);

    fn output(&self) -> &Framebuffer;

    /// Toggle for tinting pixels by the blend heuristic that fired.
    fn visualize_heuristic(&mut self) -> Option<&mut bool> {
        None
    }
}

pub fn create_strategy(
    method: Method,
    ctx: &RendererContext,
    width: u32,
    height: u32,
) -> RenderResult<Box<dyn RenderStrategy>> {
    Ok(match method {
        Method::Cpu => Box::new(cpu::CpuStrategy::new(ctx, width, height)),
        Method::Nvidia => Box::new(nvidia::NvidiaStrategy::new(ctx, width, height)?),
        Method::Intel => Box::new(intel::IntelStrategy::new(ctx, width, height)?),
        Method::Hybrid => Box::new(hybrid::HybridStrategy::new(ctx, width, height)?),
        Method::ReducedTraverse => Box::new(reduced_traverse::ReducedTraverseStrategy::new(ctx, width, height)?),
    })
}

/// Every method that could be created for the current asset and device.
pub struct StrategySet {
    strategies: Vec<Box<dyn RenderStrategy>>,
}

impl StrategySet {
    /// Methods that fail to build are logged and left out; it is an error
    /// only when none can be built.
    pub fn new(ctx: &RendererContext, width: u32, height: u32) -> RenderResult<Self> {
        let mut strategies = Vec::with_capacity(Method::ALL.len());
        for method in Method::ALL {
            match create_strategy(method, ctx, width, height) {
                Ok(strategy) => strategies.push(strategy),
                Err(err) => log::error!("{} method unavailable: {err}", method.name()),
            }
        }
        if strategies.is_empty() {
            return Err(RenderError::device("no render method could be created"));
        }
        Ok(Self { strategies })
    }

    pub fn contains(&self, method: Method) -> bool {
        self.strategies.iter().any(|s| s.method() == method)
    }

    pub fn available(&self) -> Vec<Method> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    pub fn get_mut(&mut self, method: Method) -> Option<&mut (dyn RenderStrategy + 'static)> {
        self.strategies
            .iter_mut()
            .find(|s| s.method() == method)
            .map(|s| s.as_mut())
    }

    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        for strategy in &mut self.strategies {
            strategy.resize_buffers(device, width, height);
        }
    }
}

// ============================================================================
// SHARED PIPELINE PIECES
// ============================================================================

/// Group 0: pass uniforms, plus the face index for Ptex passes.
pub(crate) fn frame_bind_group_layout(device: &wgpu::Device, with_face_index: bool) -> wgpu::BindGroupLayout {
    let mut entries = vec![wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }];
    if with_face_index {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Frame Bind Group Layout"),
        entries: &entries,
    })
}

pub(crate) fn create_uniform_buffer(device: &wgpu::Device, label: &str) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: std::mem::size_of::<PassUniforms>() as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Triangle-list pipeline over `PtexVertex` with depth testing.
pub(crate) fn mesh_pipeline(
    device: &wgpu::Device,
    label: &str,
    shader: &wgpu::ShaderModule,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
    targets: &[Option<wgpu::ColorTargetState>],
    samples: u32,
) -> wgpu::RenderPipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts,
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[PtexVertex::desc()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: Some(wgpu::Face::Back),
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: samples,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
        cache: None,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use glam::{Mat4, Vec3};
    use wgpu::util::DeviceExt;

    use super::*;
    use crate::engine::filter::test_assets::side_by_side;
    use crate::engine::filter::FilterKind;
    use crate::engine::gpu;
    use crate::engine::layout::{SamplerSettings, TextureFilter};
    use crate::engine::mesh::{PolyMesh, PtexMesh};
    use crate::engine::sampler::RoundingRule;

    pub const RED: [u8; 4] = [255, 0, 0, 255];
    pub const BLUE: [u8; 4] = [0, 0, 255, 255];

    pub fn settings(method: Method) -> Settings {
        Settings {
            method,
            background: Vec3::ZERO,
            cross_derivatives: false,
            rounding: RoundingRule::Round,
            cpu_filter: FilterKind::Bilinear,
            sampler: SamplerSettings {
                filter: TextureFilter::Nearest,
                anisotropy: 1,
            },
        }
    }

    /// Red/blue side-by-side asset on a device with every Ptex feature, or
    /// `None` when the machine can't provide one.
    pub fn red_blue_context(method: Method) -> Option<RendererContext> {
        let (device, queue) = gpu::headless_device(gpu::required_features())?;
        let asset = Box::new(side_by_side(RED, BLUE));
        RendererContext::new(Arc::new(device), Arc::new(queue), asset, settings(method)).ok()
    }

    /// Two quads filling clip space, face 0 on the left.
    pub fn two_quad_buffer(device: &wgpu::Device) -> (wgpu::Buffer, u32) {
        let mut poly = PolyMesh::new();
        let corners = [(-1.0, -1.0), (0.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (0.0, 1.0), (1.0, 1.0)];
        for (x, y) in corners {
            poly.add_vertex(Vec3::new(x, y, 0.5));
        }
        poly.add_face(vec![0, 1, 4, 3]);
        poly.add_face(vec![1, 2, 5, 4]);
        let mesh = PtexMesh::from_poly(&poly).unwrap();

        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Test Vertex Buffer"),
            contents: mesh.vertex_bytes(),
            usage: wgpu::BufferUsages::VERTEX,
        });
        (buffer, mesh.vertex_count())
    }

    pub fn identity_input(buffer: &wgpu::Buffer, vertex_count: u32) -> DrawInput<'_> {
        DrawInput {
            vertex_buffer: buffer,
            vertex_count,
            mvp: Mat4::IDENTITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::engine::readback::{read_buffer, read_texture_layer, read_texture_tight};

    #[test]
    fn methods_cycle_through_all_five() {
        let mut method = Method::Cpu;
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(method);
            method = method.next();
        }
        assert_eq!(method, Method::Cpu);
        assert_eq!(seen, Method::ALL.to_vec());
        assert_eq!(Method::from_index(4), Some(Method::ReducedTraverse));
        assert_eq!(Method::from_index(5), None);
    }

    #[test]
    fn uniforms_are_eighty_bytes() {
        assert_eq!(std::mem::size_of::<PassUniforms>(), 80);
        assert_eq!(PassUniforms::new(Mat4::IDENTITY, true).flags, [1, 0, 0, 0]);
    }

    #[test]
    fn resize_keeps_textures_and_face_index() {
        for method in Method::ALL {
            let Some(ctx) = red_blue_context(method) else {
                return;
            };
            let mut strategy = create_strategy(method, &ctx, 16, 16).unwrap();
            let index_before = read_buffer(&ctx.device, &ctx.queue, &ctx.ptex.face_index_buffer).unwrap();
            let array = &ctx.ptex.arrays[0];
            let layer_before = read_texture_layer(
                &ctx.device,
                &ctx.queue,
                &array.texture,
                0,
                (4, 4),
                wgpu::TextureFormat::Rgba8Unorm,
            )
            .unwrap();

            strategy.resize_buffers(&ctx.device, 37, 23);
            let (buffer, count) = two_quad_buffer(&ctx.device);
            let mut profiler = Profiler::new(None);
            profiler.new_frame();
            let fb = strategy.render(&ctx, &identity_input(&buffer, count), &mut profiler).unwrap();
            assert_eq!(fb.size(), (37, 23), "{}", method.name());

            let index_after = read_buffer(&ctx.device, &ctx.queue, &ctx.ptex.face_index_buffer).unwrap();
            let layer_after = read_texture_layer(
                &ctx.device,
                &ctx.queue,
                &array.texture,
                0,
                (4, 4),
                wgpu::TextureFormat::Rgba8Unorm,
            )
            .unwrap();
            assert_eq!(index_before, index_after);
            assert_eq!(layer_before, layer_after);
        }
    }

    #[test]
    fn every_method_draws_red_left_and_blue_right() {
        for method in Method::ALL {
            let Some(ctx) = red_blue_context(method) else {
                return;
            };
            let mut strategy = create_strategy(method, &ctx, 16, 8).unwrap();
            let (buffer, count) = two_quad_buffer(&ctx.device);
            let mut profiler = Profiler::new(None);
            profiler.new_frame();
            let fb = strategy.render(&ctx, &identity_input(&buffer, count), &mut profiler).unwrap();

            let pixels = read_texture_tight(
                &ctx.device,
                &ctx.queue,
                fb.output_texture(0),
                (16, 8),
                wgpu::TextureFormat::Rgba8Unorm,
            )
            .unwrap();
            let at = |x: usize, y: usize| &pixels[(y * 16 + x) * 4..(y * 16 + x) * 4 + 4];
            assert_eq!(at(3, 4), &RED, "{}", method.name());
            assert_eq!(at(12, 4), &BLUE, "{}", method.name());
        }
    }

    #[test]
    fn set_skips_nothing_for_a_small_asset() {
        let Some(ctx) = red_blue_context(Method::Nvidia) else {
            return;
        };
        let mut set = StrategySet::new(&ctx, 8, 8).unwrap();
        assert_eq!(set.available(), Method::ALL.to_vec());
        assert!(set.contains(Method::Hybrid));
        assert_eq!(set.get_mut(Method::Intel).map(|s| s.method()), Some(Method::Intel));
        set.resize(&ctx.device, 20, 10);
        assert_eq!(set.get_mut(Method::Cpu).map(|s| s.output().size()), Some((20, 10)));
    }
}
