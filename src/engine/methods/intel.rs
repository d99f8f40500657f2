// Every array bound twice: edge-clamped for footprints inside a face,
// border-clamped where the footprint reaches an edge.

use super::ptex_pass::{PtexPass, PtexPassDesc, SamplerBinding};
use super::{pass_id, DrawInput, Method, RenderStrategy, RendererContext};
use crate::engine::error::RenderResult;
use crate::engine::framebuffer::Framebuffer;
use crate::engine::profiler::Profiler;

pub struct IntelStrategy {
    pass: PtexPass,
}

impl IntelStrategy {
    pub fn new(ctx: &RendererContext, width: u32, height: u32) -> RenderResult<Self> {
        let desc = PtexPassDesc {
            method: Method::Intel,
            label: "Intel Pass",
            pass_id: pass_id::INTEL,
            fragment: include_str!("../../shaders/intel.wgsl"),
            binding: SamplerBinding::BorderAndClamp,
            samples: 1,
        };
        Ok(Self { pass: PtexPass::new(ctx, desc, width, height)? })
    }
}

impl RenderStrategy for IntelStrategy {
    fn method(&self) -> Method {
        self.pass.method()
    }

    fn render(
        &mut self,
        ctx: &RendererContext,
        input: &DrawInput<'_>,
        profiler: &mut Profiler,
    ) -> RenderResult<&Framebuffer> {
        Ok(self.pass.draw(ctx, input, false, profiler))
    }

    fn resize_buffers(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        self.pass.resize(device, width, height);
    }

    fn output(&self) -> &Framebuffer {
        self.pass.framebuffer()
    }
}
