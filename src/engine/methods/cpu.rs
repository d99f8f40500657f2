// CPU reference method.
//
//   to-cpu pass (face id + 1, uv, uv derivatives)
//     → readback → calculate_image_cpu → RGBA8 → upload → blit
//
// Every frame waits for the GPU at the readback.

use glam::{Vec2, Vec4};

use super::blit::BlitPass;
use super::{
    create_uniform_buffer, frame_bind_group_layout, mesh_pipeline, pass_id, DrawInput, Method, PassUniforms,
    RenderStrategy, RendererContext,
};
use crate::engine::error::RenderResult;
use crate::engine::framebuffer::{ColorAttachmentDesc, Framebuffer, FramebufferDesc, DEPTH_FORMAT};
use crate::engine::profiler::Profiler;
use crate::engine::readback::read_texture_tight;
use crate::engine::sampler::{calculate_image_cpu, to_rgba8, CpuFrameInputs};

const TO_CPU_WGSL: &str = include_str!("../../shaders/to_cpu.wgsl");
const COMMON_WGSL: &str = include_str!("../../shaders/ptex_common.wgsl");

const FACE_ID_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R16Uint;
const UV_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
const IMAGE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

fn to_cpu_desc() -> FramebufferDesc {
    FramebufferDesc {
        label: "To CPU",
        color: vec![
            ColorAttachmentDesc { label: "Face Id", format: FACE_ID_FORMAT },
            ColorAttachmentDesc { label: "UV", format: UV_FORMAT },
            ColorAttachmentDesc { label: "UV Derivatives", format: UV_FORMAT },
        ],
        depth: Some(DEPTH_FORMAT),
        samples: 1,
    }
}

fn output_desc() -> FramebufferDesc {
    FramebufferDesc {
        label: "CPU Output",
        color: vec![ColorAttachmentDesc { label: "Color", format: IMAGE_FORMAT }],
        depth: None,
        samples: 1,
    }
}

struct ImageTexture {
    texture: wgpu::Texture,
    view:    wgpu::TextureView,
}

impl ImageTexture {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("CPU Image"),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: IMAGE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

/// Host copies of the to-cpu attachments.
struct Attachments {
    face_ids:  Vec<u16>,
    uvs:       Vec<Vec2>,
    uv_derivs: Vec<Vec4>,
}

pub struct CpuStrategy {
    pipeline:       wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    bind_group:     wgpu::BindGroup,
    to_cpu:         Framebuffer,
    image:          ImageTexture,
    output:         Framebuffer,
    blit:           BlitPass,
    last_image:     Vec<u8>,
}

impl CpuStrategy {
    pub fn new(ctx: &RendererContext, width: u32, height: u32) -> Self {
        let device = ctx.device.as_ref();

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("To CPU Shader"),
            source: wgpu::ShaderSource::Wgsl(format!("{COMMON_WGSL}\n{TO_CPU_WGSL}").into()),
        });

        let layout = frame_bind_group_layout(device, false);
        let uniform_buffer = create_uniform_buffer(device, "To CPU Uniform Buffer");
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("To CPU Bind Group"),
            layout: &layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let targets: Vec<Option<wgpu::ColorTargetState>> = to_cpu_desc()
            .color
            .iter()
            .map(|c| {
                Some(wgpu::ColorTargetState {
                    format: c.format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();
        let pipeline = mesh_pipeline(device, "To CPU Pipeline", &shader, &[&layout], &targets, 1);

        Self {
            pipeline,
            uniform_buffer,
            bind_group,
            to_cpu: Framebuffer::new(device, to_cpu_desc(), width, height),
            image: ImageTexture::new(device, width, height),
            output: Framebuffer::new(device, output_desc(), width, height),
            blit: BlitPass::new(device, IMAGE_FORMAT),
            last_image: Vec::new(),
        }
    }

    /// RGBA8 pixels of the last reconstructed frame, rows top to bottom.
    pub fn last_image(&self) -> &[u8] {
        &self.last_image
    }

    fn draw_to_cpu(&self, ctx: &RendererContext, input: &DrawInput<'_>) {
        ctx.queue.write_buffer(
            &self.uniform_buffer,
            0,
            bytemuck::bytes_of(&PassUniforms::new(input.mvp, false)),
        );

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("To CPU Encoder"),
        });
        {
            let clear = [wgpu::Color::TRANSPARENT; 3];
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("To CPU Pass"),
                color_attachments: &self.to_cpu.color_attachments(&clear),
                depth_stencil_attachment: self.to_cpu.depth_attachment(),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.set_vertex_buffer(0, input.vertex_buffer.slice(..));
            pass.draw(0..input.vertex_count, 0..1);
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));
    }

    fn read_attachments(&self, ctx: &RendererContext) -> RenderResult<Attachments> {
        let size = self.to_cpu.size();
        let read = |i: usize, format| read_texture_tight(&ctx.device, &ctx.queue, self.to_cpu.output_texture(i), size, format);

        let face_ids = bytemuck::pod_collect_to_vec(&read(0, FACE_ID_FORMAT)?);
        let uvs = bytemuck::pod_collect_to_vec::<u8, Vec4>(&read(1, UV_FORMAT)?)
            .into_iter()
            .map(|v| Vec2::new(v.x, v.y))
            .collect();
        let uv_derivs = bytemuck::pod_collect_to_vec(&read(2, UV_FORMAT)?);
        Ok(Attachments { face_ids, uvs, uv_derivs })
    }

    fn upload(&self, ctx: &RendererContext, rgba: &[u8]) {
        let (width, height) = self.output.size();
        ctx.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.image.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn blit(&self, ctx: &RendererContext) {
        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("CPU Blit Encoder"),
        });
        self.blit.draw(&ctx.device, &mut encoder, &self.image.view, self.output.output_view(0));
        ctx.queue.submit(std::iter::once(encoder.finish()));
    }

    fn render_stages(
        &mut self,
        ctx: &RendererContext,
        input: &DrawInput<'_>,
        profiler: &mut Profiler,
    ) -> RenderResult<()> {
        profiler.push_span("To CPU Pass", pass_id::TO_CPU);
        self.draw_to_cpu(ctx, input);
        profiler.pop_span(pass_id::TO_CPU);

        profiler.push_span("Readback", pass_id::READBACK);
        let attachments = self.read_attachments(ctx);
        profiler.pop_span(pass_id::READBACK);
        let attachments = attachments?;

        profiler.push_span("CPU Sampling", pass_id::CPU_SAMPLING);
        let (width, height) = self.to_cpu.size();
        let inputs = CpuFrameInputs {
            width,
            height,
            face_ids: &attachments.face_ids,
            uvs: &attachments.uvs,
            uv_derivs: &attachments.uv_derivs,
        };
        let image = calculate_image_cpu(
            ctx.asset.as_ref(),
            &ctx.filter,
            &inputs,
            ctx.settings.background,
            ctx.settings.cross_derivatives,
        );
        self.last_image = to_rgba8(&image, ctx.settings.rounding);
        profiler.pop_span(pass_id::CPU_SAMPLING);

        profiler.push_span("Upload", pass_id::UPLOAD);
        self.upload(ctx, &self.last_image);
        profiler.pop_span(pass_id::UPLOAD);

        profiler.push_span("CPU Blit", pass_id::CPU_BLIT);
        self.blit(ctx);
        profiler.pop_span(pass_id::CPU_BLIT);
        Ok(())
    }
}

impl RenderStrategy for CpuStrategy {
    fn method(&self) -> Method {
        Method::Cpu
    }

    fn render(
        &mut self,
        ctx: &RendererContext,
        input: &DrawInput<'_>,
        profiler: &mut Profiler,
    ) -> RenderResult<&Framebuffer> {
        profiler.push_span("CPU Method", pass_id::CPU);
        let result = self.render_stages(ctx, input, profiler);
        profiler.pop_span(pass_id::CPU);
        result?;
        Ok(&self.output)
    }

    fn resize_buffers(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        self.to_cpu.recreate(device, width, height);
        self.output.recreate(device, width, height);
        self.image = ImageTexture::new(device, width, height);
        self.last_image.clear();
    }

    fn output(&self) -> &Framebuffer {
        &self.output
    }
}
