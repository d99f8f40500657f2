use clap::ValueEnum;
use egui::epaint::Shadow;

use super::compare::ImageDiff;
use super::config::Settings;
use super::filter::FilterKind;
use super::methods::Method;
use super::profiler::PassRow;
use super::sampler::RoundingRule;

pub struct FrameStats {
    pub fps: u32,
    pub frame_time_avg_ms: f32,
    pub frame_time_min_ms: f32,
    pub frame_time_max_ms: f32,
    pub resolution: (u32, u32),
    pub faces: usize,
    pub buckets: usize,
    pub camera_distance: f32,
    pub viewpoints: usize,
    pub gpu_timing: bool,
}

/// Everything the F3 panel shows or edits for one frame.
pub struct OverlayPanel<'a> {
    pub stats: &'a FrameStats,
    pub available: &'a [Method],
    pub settings: &'a mut Settings,
    /// `None` when the current method has no heuristic to show.
    pub visualize_heuristic: Option<&'a mut bool>,
    pub passes: &'a [PassRow],
    pub last_diff: Option<&'a (Method, ImageDiff)>,
}

pub struct DebugOverlay {
    pub visible: bool,
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
}

impl DebugOverlay {
    pub fn new(
        window: &winit::window::Window,
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
    ) -> Self {
        let egui_ctx = egui::Context::default();

        // Dark, semi-transparent, small monospace white font
        let mut visuals = egui::Visuals::dark();
        visuals.window_fill = egui::Color32::from_rgba_premultiplied(0, 0, 0, 180);
        visuals.window_stroke = egui::Stroke::NONE;
        visuals.window_shadow = Shadow::NONE;
        visuals.override_text_color = Some(egui::Color32::WHITE);
        egui_ctx.set_visuals(visuals);

        let mut style = (*egui_ctx.style()).clone();
        style.override_font_id = Some(egui::FontId::monospace(13.0));
        egui_ctx.set_style(style);

        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );

        let egui_renderer = egui_wgpu::Renderer::new(
            device,
            surface_format,
            None,  // no depth
            1,     // msaa samples
            false, // no dithering
        );

        Self {
            visible: false,
            egui_ctx,
            egui_state,
            egui_renderer,
        }
    }

    pub fn toggle(&mut self) {
        self.visible = !self.visible;
    }

    pub fn handle_window_event(
        &mut self,
        window: &winit::window::Window,
        event: &winit::event::WindowEvent,
    ) -> egui_winit::EventResponse {
        self.egui_state.on_window_event(window, event)
    }

    /// Run one egui frame and draw it over `view`. `panel` is `None` while
    /// the overlay is hidden.
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        window: &winit::window::Window,
        view: &wgpu::TextureView,
        screen_descriptor: &egui_wgpu::ScreenDescriptor,
        mut panel: Option<OverlayPanel<'_>>,
    ) {
        let raw_input = self.egui_state.take_egui_input(window);

        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            if let Some(panel) = panel.as_mut() {
                egui::Area::new(egui::Id::new("debug_overlay"))
                    .fixed_pos(egui::pos2(10.0, 10.0))
                    .show(ctx, |ui| {
                        egui::Frame::none()
                            .fill(egui::Color32::from_rgba_premultiplied(0, 0, 0, 180))
                            .inner_margin(egui::Margin::same(8.0))
                            .rounding(4.0)
                            .show(ui, |ui: &mut egui::Ui| panel_contents(ui, panel));
                    });
            }
        });

        self.egui_state
            .handle_platform_output(window, full_output.platform_output);

        let tris = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(device, queue, *id, image_delta);
        }

        self.egui_renderer
            .update_buffers(device, queue, encoder, &tris, screen_descriptor);

        {
            let render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("egui Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            self.egui_renderer
                .render(&mut render_pass.forget_lifetime(), &tris, screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }
    }
}

fn panel_contents(ui: &mut egui::Ui, panel: &mut OverlayPanel<'_>) {
    let stats = panel.stats;
    ui.label(format!("FPS: {}", stats.fps));
    ui.label(format!(
        "Frame: {:.2} ms (min: {:.1} | max: {:.1})",
        stats.frame_time_avg_ms, stats.frame_time_min_ms, stats.frame_time_max_ms
    ));
    ui.label(format!("Resolution: {} x {}", stats.resolution.0, stats.resolution.1));
    ui.label(format!("Faces: {}  Buckets: {}", stats.faces, stats.buckets));
    ui.label(format!(
        "Camera dist {:.2}  Viewpoints: {}",
        stats.camera_distance, stats.viewpoints
    ));

    ui.separator();

    let settings = &mut *panel.settings;
    egui::ComboBox::from_label("Method")
        .selected_text(settings.method.name())
        .show_ui(ui, |ui| {
            for &method in panel.available {
                ui.selectable_value(&mut settings.method, method, method.name());
            }
        });

    if let Some(visualize) = panel.visualize_heuristic.as_deref_mut() {
        ui.checkbox(visualize, "Visualize heuristic");
    }

    ui.collapsing("CPU reference", |ui| {
        egui::ComboBox::from_label("Filter")
            .selected_text(format!("{:?}", settings.cpu_filter))
            .show_ui(ui, |ui| {
                for &kind in FilterKind::value_variants() {
                    ui.selectable_value(&mut settings.cpu_filter, kind, format!("{kind:?}"));
                }
            });
        egui::ComboBox::from_label("Rounding")
            .selected_text(settings.rounding.name())
            .show_ui(ui, |ui| {
                for rule in RoundingRule::ALL {
                    ui.selectable_value(&mut settings.rounding, rule, rule.name());
                }
            });
        ui.checkbox(&mut settings.cross_derivatives, "Cross derivatives");
    });

    ui.separator();

    if !stats.gpu_timing {
        ui.label("GPU timing unavailable");
    }
    pass_tree(ui, panel.passes);

    if let Some((method, diff)) = panel.last_diff {
        ui.separator();
        ui.label(format!("{} vs CPU:", method.name()));
        ui.label(format!(
            "  mse rgb {:.3e} ({:.1} dB)",
            diff.rgb_mse(),
            diff.psnr()
        ));
        ui.label(format!("  max deviation {}", diff.max_deviation));
        ui.label(format!(
            "  {} pixels differ ({:.2}%)",
            diff.differing_pixels,
            diff.differing_fraction() * 100.0
        ));
    }
}

fn pass_label(row: &PassRow) -> String {
    match row.gpu_ms {
        Some(gpu) => format!("{} | cpu: {:.3}ms | gpu: {:.3}ms", row.name, row.cpu_ms, gpu),
        None => format!("{} | cpu: {:.3}ms", row.name, row.cpu_ms),
    }
}

/// `rows` holds sibling subtrees in push order; a row's children are the
/// rows after it with greater depth.
fn pass_tree(ui: &mut egui::Ui, rows: &[PassRow]) {
    let mut i = 0;
    while i < rows.len() {
        let row = &rows[i];
        let end = subtree_end(rows, i);
        if end == i + 1 {
            ui.label(pass_label(row));
        } else {
            egui::CollapsingHeader::new(pass_label(row))
                .id_salt(row.name)
                .default_open(true)
                .show(ui, |ui| pass_tree(ui, &rows[i + 1..end]));
        }
        i = end;
    }
}

fn subtree_end(rows: &[PassRow], i: usize) -> usize {
    rows[i + 1..]
        .iter()
        .position(|r| r.depth <= rows[i].depth)
        .map_or(rows.len(), |p| i + 1 + p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &'static str, depth: usize) -> PassRow {
        PassRow { name, depth, cpu_ms: 1.0, gpu_ms: None }
    }

    #[test]
    fn subtrees_end_at_the_next_sibling() {
        let rows = [row("Frame", 0), row("CPU", 1), row("Readback", 2), row("Blit", 1), row("Overlay", 0)];
        assert_eq!(subtree_end(&rows, 0), 4);
        assert_eq!(subtree_end(&rows, 1), 3);
        assert_eq!(subtree_end(&rows, 3), 4);
        assert_eq!(subtree_end(&rows, 4), 5);
    }

    #[test]
    fn labels_show_gpu_time_when_known() {
        let mut r = row("Pass", 0);
        assert_eq!(pass_label(&r), "Pass | cpu: 1.000ms");
        r.gpu_ms = Some(0.25);
        assert_eq!(pass_label(&r), "Pass | cpu: 1.000ms | gpu: 0.250ms");
    }
}
