// The draw shared by every GPU Ptex method: bind the texture arrays through
// one or two samplers, draw the mesh, hand back the framebuffer.

use super::{
    create_uniform_buffer, frame_bind_group_layout, mesh_pipeline, DrawInput, Method, PassUniforms,
    RendererContext,
};
use crate::engine::error::{RenderError, RenderResult};
use crate::engine::framebuffer::{Framebuffer, FramebufferDesc};
use crate::engine::profiler::{PassId, Profiler};

pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Texture slots when every array is bound once.
pub const SINGLE_BINDING_SLOTS: u32 = 32;
/// Texture slots when every array is bound through both samplers.
pub const DUAL_BINDING_SLOTS: u32 = 24;

const COMMON_WGSL: &str = include_str!("../../shaders/ptex_common.wgsl");
const SAMPLING_WGSL: &str = include_str!("../../shaders/ptex_sampling.wgsl");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerBinding {
    /// Border-clamped sampler only.
    Border,
    /// Every array bound again behind an edge-clamped sampler.
    BorderAndClamp,
}

impl SamplerBinding {
    pub fn slot_budget(self) -> u32 {
        match self {
            SamplerBinding::Border => SINGLE_BINDING_SLOTS,
            SamplerBinding::BorderAndClamp => DUAL_BINDING_SLOTS,
        }
    }

    fn bindings_per_slot(self) -> u32 {
        match self {
            SamplerBinding::Border => 1,
            SamplerBinding::BorderAndClamp => 2,
        }
    }

    /// Group 1 declarations for a binding array of `slots` textures.
    fn declarations(self, slots: u32) -> String {
        let mut wgsl = format!(
            "@group(1) @binding(0) var border_arrays: binding_array<texture_2d_array<f32>, {slots}>;\n\
             @group(1) @binding(1) var border_sampler: sampler;\n"
        );
        if self == SamplerBinding::BorderAndClamp {
            wgsl.push_str(&format!(
                "@group(1) @binding(2) var clamp_arrays: binding_array<texture_2d_array<f32>, {slots}>;\n\
                 @group(1) @binding(3) var clamp_sampler: sampler;\n"
            ));
        }
        wgsl
    }

    fn layout_entries(self, slots: u32) -> Vec<wgpu::BindGroupLayoutEntry> {
        let textures = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2Array,
                multisampled: false,
            },
            count: std::num::NonZeroU32::new(slots),
        };
        let sampler = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        };

        let mut entries = vec![textures(0), sampler(1)];
        if self == SamplerBinding::BorderAndClamp {
            entries.extend([textures(2), sampler(3)]);
        }
        entries
    }
}

/// Common vertex stage, binding declarations, sampling helpers, then the
/// method's fragment stage.
pub fn shader_source(binding: SamplerBinding, slots: u32, fragment: &str) -> String {
    format!("{COMMON_WGSL}\n{}\n{SAMPLING_WGSL}\n{fragment}", binding.declarations(slots))
}

/// Fails when a method can't bind every resolution bucket.
pub fn check_bucket_budget(method: Method, buckets: usize, slots: u32) -> RenderResult<()> {
    if buckets > slots as usize {
        return Err(RenderError::TooManyBuckets {
            method: method.name(),
            buckets,
            limit: slots as usize,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct PtexPassDesc {
    pub method:   Method,
    pub label:    &'static str,
    pub pass_id:  PassId,
    pub fragment: &'static str,
    pub binding:  SamplerBinding,
    pub samples:  u32,
}

pub struct PtexPass {
    desc:               PtexPassDesc,
    pipeline:           wgpu::RenderPipeline,
    uniform_buffer:     wgpu::Buffer,
    frame_bind_group:   wgpu::BindGroup,
    texture_bind_group: wgpu::BindGroup,
    framebuffer:        Framebuffer,
}

impl PtexPass {
    pub fn new(ctx: &RendererContext, desc: PtexPassDesc, width: u32, height: u32) -> RenderResult<Self> {
        let device = ctx.device.as_ref();

        let stage_limit = device.limits().max_sampled_textures_per_shader_stage / desc.binding.bindings_per_slot();
        let slots = desc.binding.slot_budget().min(stage_limit);
        check_bucket_budget(desc.method, ctx.ptex.arrays.len(), slots)?;
        let first = ctx
            .ptex
            .arrays
            .first()
            .ok_or_else(|| RenderError::device("no texture arrays to bind"))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(shader_source(desc.binding, slots, desc.fragment).into()),
        });

        // ====================================================================
        // Group 0: uniforms + face index
        // ====================================================================

        let frame_layout = frame_bind_group_layout(device, true);
        let uniform_buffer = create_uniform_buffer(device, "Ptex Uniform Buffer");
        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Ptex Frame Bind Group"),
            layout: &frame_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: ctx.ptex.face_index_buffer.as_entire_binding(),
                },
            ],
        });

        // ====================================================================
        // Group 1: texture arrays + samplers
        // ====================================================================

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Ptex Texture Bind Group Layout"),
            entries: &desc.binding.layout_entries(slots),
        });

        // Unused slots repeat the first array.
        let views: Vec<&wgpu::TextureView> = (0..slots as usize)
            .map(|i| &ctx.ptex.arrays.get(i).unwrap_or(first).view)
            .collect();
        let border_sampler = ctx.settings.sampler.border_sampler(device);
        let clamp_sampler = ctx.settings.sampler.clamp_sampler(device);

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureViewArray(&views),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&border_sampler),
            },
        ];
        if desc.binding == SamplerBinding::BorderAndClamp {
            entries.push(wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureViewArray(&views),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::Sampler(&clamp_sampler),
            });
        }
        let texture_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Ptex Texture Bind Group"),
            layout: &texture_layout,
            entries: &entries,
        });

        let pipeline = mesh_pipeline(
            device,
            desc.label,
            &shader,
            &[&frame_layout, &texture_layout],
            &[Some(wgpu::ColorTargetState {
                format: COLOR_FORMAT,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            desc.samples,
        );

        let framebuffer = Framebuffer::new(
            device,
            FramebufferDesc::single(desc.label, COLOR_FORMAT, desc.samples),
            width,
            height,
        );

        log::debug!(
            "{} pass: {} of {} slots used, {}x MSAA",
            desc.method.name(),
            ctx.ptex.arrays.len(),
            slots,
            desc.samples
        );

        Ok(Self {
            desc,
            pipeline,
            uniform_buffer,
            frame_bind_group,
            texture_bind_group,
            framebuffer,
        })
    }

    pub fn draw(
        &mut self,
        ctx: &RendererContext,
        input: &DrawInput<'_>,
        visualize_heuristic: bool,
        profiler: &mut Profiler,
    ) -> &Framebuffer {
        profiler.push_span(self.desc.label, self.desc.pass_id);

        ctx.queue.write_buffer(
            &self.uniform_buffer,
            0,
            bytemuck::bytes_of(&PassUniforms::new(input.mvp, visualize_heuristic)),
        );

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(self.desc.label),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(self.desc.label),
                color_attachments: &self.framebuffer.color_attachments(&[ctx.settings.clear_color()]),
                depth_stencil_attachment: self.framebuffer.depth_attachment(),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.frame_bind_group, &[]);
            pass.set_bind_group(1, &self.texture_bind_group, &[]);
            pass.set_vertex_buffer(0, input.vertex_buffer.slice(..));
            pass.draw(0..input.vertex_count, 0..1);
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));

        profiler.pop_span(self.desc.pass_id);
        &self.framebuffer
    }

    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        self.framebuffer.recreate(device, width, height);
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    pub fn method(&self) -> Method {
        self.desc.method
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_budget_per_binding() {
        assert_eq!(SamplerBinding::Border.slot_budget(), 32);
        assert_eq!(SamplerBinding::BorderAndClamp.slot_budget(), 24);
        assert!(check_bucket_budget(Method::Intel, 24, 24).is_ok());

        let err = check_bucket_budget(Method::Intel, 25, 24).unwrap_err();
        assert!(matches!(
            err,
            RenderError::TooManyBuckets { method: "Intel", buckets: 25, limit: 24 }
        ));
    }

    #[test]
    fn single_binding_declares_one_array() {
        let source = shader_source(SamplerBinding::Border, 32, "// fragment");
        assert!(source.contains("binding_array<texture_2d_array<f32>, 32>"));
        assert!(!source.contains("var clamp_arrays"));
        assert!(source.ends_with("// fragment"));
        // Declarations come before the helpers that use them.
        let declared = source.find("var border_arrays").unwrap();
        let used = source.find("fn sample_border").unwrap();
        assert!(declared < used);
    }

    #[test]
    fn dual_binding_declares_both_arrays() {
        let source = shader_source(SamplerBinding::BorderAndClamp, 24, "");
        assert!(source.contains("var clamp_arrays: binding_array<texture_2d_array<f32>, 24>"));
        assert!(source.contains("var clamp_sampler: sampler"));
        assert_eq!(SamplerBinding::BorderAndClamp.layout_entries(24).len(), 4);
        assert_eq!(SamplerBinding::Border.layout_entries(32)[0].count.map(|c| c.get()), Some(32));
    }
}
