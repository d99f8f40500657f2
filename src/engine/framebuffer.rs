// Owned off-screen render targets, sized to the viewport.
//
// A framebuffer is described once and rebuilt from that description on
// every resize. Multisampled colour targets carry a single-sample resolve
// texture, which is what readers see as the output.

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[derive(Debug, Clone)]
pub struct ColorAttachmentDesc {
    pub label:  &'static str,
    pub format: wgpu::TextureFormat,
}

#[derive(Debug, Clone)]
pub struct FramebufferDesc {
    pub label:   &'static str,
    pub color:   Vec<ColorAttachmentDesc>,
    pub depth:   Option<wgpu::TextureFormat>,
    pub samples: u32,
}

impl FramebufferDesc {
    /// One colour target plus depth.
    pub fn single(label: &'static str, format: wgpu::TextureFormat, samples: u32) -> Self {
        Self {
            label,
            color: vec![ColorAttachmentDesc { label, format }],
            depth: Some(DEPTH_FORMAT),
            samples,
        }
    }
}

struct Target {
    texture: wgpu::Texture,
    view:    wgpu::TextureView,
}

struct ColorTarget {
    render:  Target,
    resolve: Option<Target>,
}

impl ColorTarget {
    fn output(&self) -> &Target {
        self.resolve.as_ref().unwrap_or(&self.render)
    }
}

pub struct Framebuffer {
    desc:   FramebufferDesc,
    width:  u32,
    height: u32,
    colors: Vec<ColorTarget>,
    depth:  Option<Target>,
}

impl Framebuffer {
    pub fn new(device: &wgpu::Device, desc: FramebufferDesc, width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let create = |label: String, format, samples, usage| {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label.as_str()),
                size,
                mip_level_count: 1,
                sample_count: samples,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            Target { texture, view }
        };

        let readable = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC;

        let colors = desc
            .color
            .iter()
            .map(|c| {
                if desc.samples > 1 {
                    ColorTarget {
                        render: create(
                            format!("{} {} (MSAA)", desc.label, c.label),
                            c.format,
                            desc.samples,
                            wgpu::TextureUsages::RENDER_ATTACHMENT,
                        ),
                        resolve: Some(create(format!("{} {}", desc.label, c.label), c.format, 1, readable)),
                    }
                } else {
                    ColorTarget {
                        render: create(format!("{} {}", desc.label, c.label), c.format, 1, readable),
                        resolve: None,
                    }
                }
            })
            .collect();

        let depth = desc.depth.map(|format| {
            create(
                format!("{} Depth", desc.label),
                format,
                desc.samples,
                wgpu::TextureUsages::RENDER_ATTACHMENT,
            )
        });

        Self { desc, width, height, colors, depth }
    }

    /// Drop every attachment and rebuild them at the new size.
    pub fn recreate(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        *self = Self::new(device, self.desc.clone(), width, height);
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn samples(&self) -> u32 {
        self.desc.samples
    }

    pub fn color_formats(&self) -> Vec<wgpu::TextureFormat> {
        self.desc.color.iter().map(|c| c.format).collect()
    }

    pub fn depth_format(&self) -> Option<wgpu::TextureFormat> {
        self.desc.depth
    }

    /// Attachments for a pass that clears colour target `i` to `clears[i]`.
    pub fn color_attachments(&self, clears: &[wgpu::Color]) -> Vec<Option<wgpu::RenderPassColorAttachment<'_>>> {
        self.colors
            .iter()
            .enumerate()
            .map(|(i, c)| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &c.render.view,
                    resolve_target: c.resolve.as_ref().map(|r| &r.view),
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clears.get(i).copied().unwrap_or(wgpu::Color::BLACK)),
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect()
    }

    pub fn depth_attachment(&self) -> Option<wgpu::RenderPassDepthStencilAttachment<'_>> {
        self.depth.as_ref().map(|d| wgpu::RenderPassDepthStencilAttachment {
            view: &d.view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Discard,
            }),
            stencil_ops: None,
        })
    }

    /// Single-sample texture holding colour target `i` after the pass.
    pub fn output_texture(&self, i: usize) -> &wgpu::Texture {
        &self.colors[i].output().texture
    }

    pub fn output_view(&self, i: usize) -> &wgpu::TextureView {
        &self.colors[i].output().view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::gpu;

    #[test]
    fn recreate_changes_every_attachment_size() {
        let Some((device, _queue)) = gpu::headless_device(wgpu::Features::empty()) else {
            return;
        };
        let desc = FramebufferDesc {
            label: "Test",
            color: vec![
                ColorAttachmentDesc { label: "A", format: wgpu::TextureFormat::Rgba8Unorm },
                ColorAttachmentDesc { label: "B", format: wgpu::TextureFormat::R16Uint },
            ],
            depth: Some(DEPTH_FORMAT),
            samples: 1,
        };
        let mut fb = Framebuffer::new(&device, desc, 64, 32);
        assert_eq!(fb.size(), (64, 32));

        fb.recreate(&device, 100, 50);
        assert_eq!(fb.size(), (100, 50));
        for i in 0..2 {
            let t = fb.output_texture(i);
            assert_eq!((t.width(), t.height()), (100, 50));
        }
        assert_eq!(fb.color_formats(), vec![wgpu::TextureFormat::Rgba8Unorm, wgpu::TextureFormat::R16Uint]);
    }

    #[test]
    fn multisampled_output_is_the_resolve_target() {
        let Some((device, _queue)) = gpu::headless_device(wgpu::Features::empty()) else {
            return;
        };
        let fb = Framebuffer::new(&device, FramebufferDesc::single("MS", wgpu::TextureFormat::Rgba8Unorm, 4), 8, 8);
        assert_eq!(fb.samples(), 4);
        assert_eq!(fb.output_texture(0).sample_count(), 1);
    }

    #[test]
    fn zero_size_is_clamped() {
        let Some((device, _queue)) = gpu::headless_device(wgpu::Features::empty()) else {
            return;
        };
        let fb = Framebuffer::new(&device, FramebufferDesc::single("Z", wgpu::TextureFormat::Rgba8Unorm, 1), 0, 0);
        assert_eq!(fb.size(), (1, 1));
    }
}
