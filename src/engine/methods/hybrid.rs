// Intel's dual binding into a 4x multisampled target, blending every
// crossed edge.

use super::ptex_pass::{PtexPass, PtexPassDesc, SamplerBinding};
use super::{pass_id, DrawInput, Method, RenderStrategy, RendererContext};
use crate::engine::error::RenderResult;
use crate::engine::framebuffer::Framebuffer;
use crate::engine::profiler::Profiler;

pub const HYBRID_SAMPLES: u32 = 4;

pub struct HybridStrategy {
    pass:      PtexPass,
    visualize: bool,
}

impl HybridStrategy {
    pub fn new(ctx: &RendererContext, width: u32, height: u32) -> RenderResult<Self> {
        let desc = PtexPassDesc {
            method: Method::Hybrid,
            label: "Hybrid Pass",
            pass_id: pass_id::HYBRID,
            fragment: include_str!("../../shaders/hybrid.wgsl"),
            binding: SamplerBinding::BorderAndClamp,
            samples: HYBRID_SAMPLES,
        };
        Ok(Self {
            pass: PtexPass::new(ctx, desc, width, height)?,
            visualize: false,
        })
    }
}

impl RenderStrategy for HybridStrategy {
    fn method(&self) -> Method {
        self.pass.method()
    }

    fn render(
        &mut self,
        ctx: &RendererContext,
        input: &DrawInput<'_>,
        profiler: &mut Profiler,
    ) -> RenderResult<&Framebuffer> {
        Ok(self.pass.draw(ctx, input, self.visualize, profiler))
    }

    fn resize_buffers(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        self.pass.resize(device, width, height);
    }

    fn output(&self) -> &Framebuffer {
        self.pass.framebuffer()
    }

    fn visualize_heuristic(&mut self) -> Option<&mut bool> {
        Some(&mut self.visualize)
    }
}
