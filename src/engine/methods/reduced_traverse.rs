// Single border-clamped sampler; the shader walks to edge and corner
// neighbours itself instead of trusting filtering at the border.

use super::ptex_pass::{PtexPass, PtexPassDesc, SamplerBinding};
use super::{pass_id, DrawInput, Method, RenderStrategy, RendererContext};
use crate::engine::error::RenderResult;
use crate::engine::framebuffer::Framebuffer;
use crate::engine::profiler::Profiler;

pub struct ReducedTraverseStrategy {
    pass:      PtexPass,
    visualize: bool,
}

impl ReducedTraverseStrategy {
    pub fn new(ctx: &RendererContext, width: u32, height: u32) -> RenderResult<Self> {
        let desc = PtexPassDesc {
            method: Method::ReducedTraverse,
            label: "Reduced Traverse Pass",
            pass_id: pass_id::REDUCED_TRAVERSE,
            fragment: include_str!("../../shaders/reduced_traverse.wgsl"),
            binding: SamplerBinding::Border,
            samples: 1,
        };
        Ok(Self {
            pass: PtexPass::new(ctx, desc, width, height)?,
            visualize: false,
        })
    }
}

impl RenderStrategy for ReducedTraverseStrategy {
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
