// Ptex sampling methods side by side
// Draws a per-face textured mesh with four GPU methods and a CPU reference,
// switchable at runtime, with per-pass profiling and CPU/GPU image diffs

mod engine;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context};
use clap::Parser;
use glam::Mat4;
use wgpu::util::DeviceExt;
use winit::{
    event::{ElementState, Event as WinitEvent, KeyEvent, WindowEvent},
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::Window,
};

use engine::camera::{load_viewpoints, save_viewpoints, OrbitCamera, Viewpoint};
use engine::compare::{compare_rgba8, ImageDiff};
use engine::containers::GrowableArray;
use engine::debug_overlay::{DebugOverlay, FrameStats, OverlayPanel};
use engine::gpu::request_gpu;
use engine::image_io::{save_img, save_png, ImgFormat, RawImage};
use engine::input::InputState;
use engine::mesh::{cube_sphere, load_obj, PtexMesh};
use engine::methods::blit::BlitPass;
use engine::methods::{pass_id, DrawInput, StrategySet};
use engine::procedural::generate_ptex;
use engine::profiler::{GpuTimer, Profiler};
use engine::readback::read_texture_tight;
use engine::{Args, Method, RendererContext};

// ============================================================================
// APPLICATION STATE
// ============================================================================

struct State {
    window:  Arc<Window>,
    surface: wgpu::Surface<'static>,
    config:  wgpu::SurfaceConfiguration,
    size:    winit::dpi::PhysicalSize<u32>,

    ctx:           RendererContext,
    strategies:    StrategySet,
    vertex_buffer: wgpu::Buffer,
    vertex_count:  u32,
    composite:     BlitPass,
    overlay:       DebugOverlay,
    profiler:      Profiler,

    camera: OrbitCamera,
    input:  InputState,

    viewpoints:      GrowableArray<Viewpoint>,
    next_viewpoint:  usize,
    viewpoints_path: Option<PathBuf>,
    output_dir:      PathBuf,
    capture_count:   u32,
    last_diff:       Option<(Method, ImageDiff)>,

    last_update:     Instant,
    frame_count:     u32,
    fps:             u32,
    last_fps_update: Instant,
}

impl State {
    async fn new(window: Arc<Window>, args: &Args) -> anyhow::Result<Self> {
        let size = window.inner_size();

        // ====================================================================
        // Asset
        // ====================================================================

        let poly = match &args.mesh {
            Some(path) => load_obj(path).with_context(|| format!("loading {}", path.display()))?,
            None => cube_sphere(args.subdivisions),
        };
        let mesh = PtexMesh::from_poly(&poly)?;
        let asset = generate_ptex(&poly, &args.generator_options())?;
        log::info!(
            "Mesh: {} quads, {} vertices, radius {:.2}",
            poly.face_count(),
            mesh.vertex_count(),
            mesh.radius
        );

        // ====================================================================
        // Device and surface
        // ====================================================================

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance.create_surface(window.clone())?;
        let gpu = request_gpu(&instance, Some(&surface)).await?;

        let surface_caps = surface.get_capabilities(&gpu.adapter);
        // Linear format: method outputs are stored unencoded, as the CPU
        // reference computes them.
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| anyhow!("surface reports no formats"))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoNoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&gpu.device, &config);

        let timer = gpu
            .timestamps
            .then(|| GpuTimer::new(gpu.device.clone(), gpu.queue.clone()));
        let profiler = Profiler::new(timer);

        // ====================================================================
        // Renderer
        // ====================================================================

        let ctx = RendererContext::new(gpu.device.clone(), gpu.queue.clone(), Box::new(asset), args.settings())?;
        let strategies = StrategySet::new(&ctx, config.width, config.height)?;
        if !strategies.contains(ctx.settings.method) {
            return Err(anyhow!("{} method is unavailable on this device", ctx.settings.method.name()));
        }

        let vertex_buffer = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Vertex Buffer"),
            contents: mesh.vertex_bytes(),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let composite = BlitPass::new(&gpu.device, surface_format);
        let overlay = DebugOverlay::new(&window, &gpu.device, surface_format);

        let viewpoints = match &args.viewpoints {
            Some(path) if path.exists() => {
                let list = load_viewpoints(path).with_context(|| format!("loading {}", path.display()))?;
                log::info!("Loaded {} viewpoints from {}", list.len(), path.display());
                list
            }
            _ => GrowableArray::with_capacity(16),
        };

        Ok(Self {
            window,
            surface,
            config,
            size,
            ctx,
            strategies,
            vertex_buffer,
            vertex_count: mesh.vertex_count(),
            composite,
            overlay,
            profiler,
            camera: OrbitCamera::framing(mesh.center, mesh.radius),
            input: InputState::new(),
            viewpoints,
            next_viewpoint: 0,
            viewpoints_path: args.viewpoints.clone(),
            output_dir: args.output_dir.clone(),
            capture_count: 0,
            last_diff: None,
            last_update: Instant::now(),
            frame_count: 0,
            fps: 0,
            last_fps_update: Instant::now(),
        })
    }

    fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.ctx.device, &self.config);
            self.strategies.resize(&self.ctx.device, new_size.width, new_size.height);
        }
    }

    fn mvp(&self) -> Mat4 {
        let aspect = self.config.width as f32 / self.config.height as f32;
        self.camera.view_projection(aspect)
    }

    fn update(&mut self) {
        let now = Instant::now();
        let dt = (now - self.last_update).as_secs_f32();
        self.last_update = now;
        self.camera.update(&self.input, dt);
    }

    // ========================================================================
    // KEYS
    // ========================================================================

    fn handle_key(&mut self, key: KeyCode) {
        match key {
            KeyCode::F3 => self.overlay.toggle(),
            KeyCode::Digit1 | KeyCode::Digit2 | KeyCode::Digit3 | KeyCode::Digit4 | KeyCode::Digit5 => {
                let index = match key {
                    KeyCode::Digit1 => 0,
                    KeyCode::Digit2 => 1,
                    KeyCode::Digit3 => 2,
                    KeyCode::Digit4 => 3,
                    _ => 4,
                };
                if let Some(method) = Method::from_index(index) {
                    self.select_method(method);
                }
            }
            KeyCode::Tab => {
                let mut method = self.ctx.settings.method.next();
                while !self.strategies.contains(method) {
                    method = method.next();
                }
                self.select_method(method);
            }
            KeyCode::KeyP => {
                if let Err(err) = self.screenshot() {
                    log::error!("Screenshot failed: {err:#}");
                }
            }
            KeyCode::KeyC => {
                if let Err(err) = self.compare_with_cpu() {
                    log::error!("Comparison failed: {err:#}");
                }
            }
            KeyCode::KeyV => {
                self.viewpoints.add(self.camera.viewpoint());
                log::info!("Stored viewpoint {}", self.viewpoints.len());
            }
            KeyCode::KeyN => {
                if self.viewpoints.is_empty() {
                    log::warn!("No stored viewpoints");
                } else {
                    let index = self.next_viewpoint % self.viewpoints.len();
                    self.camera.set_viewpoint(&self.viewpoints[index]);
                    self.next_viewpoint = index + 1;
                    log::info!("Viewpoint {}/{}", index + 1, self.viewpoints.len());
                }
            }
            KeyCode::KeyS => match &self.viewpoints_path {
                Some(path) => match save_viewpoints(path, &self.viewpoints) {
                    Ok(()) => log::info!("Saved {} viewpoints to {}", self.viewpoints.len(), path.display()),
                    Err(err) => log::error!("Saving viewpoints to {} failed: {err}", path.display()),
                },
                None => log::warn!("No --viewpoints file given; viewpoints not saved"),
            },
            _ => {}
        }
    }

    fn select_method(&mut self, method: Method) {
        if !self.strategies.contains(method) {
            log::warn!("{} method is unavailable", method.name());
            return;
        }
        if method != self.ctx.settings.method {
            log::info!("Method: {}", method.name());
            let mut settings = self.ctx.settings;
            settings.method = method;
            self.ctx.update_settings(settings);
        }
    }

    // ========================================================================
    // CAPTURES
    // ========================================================================

    /// Render `method` once at the current camera, outside the frame profile,
    /// and read its output back as RGBA8.
    fn capture(&mut self, method: Method) -> anyhow::Result<(u32, u32, Vec<u8>)> {
        let mvp = self.mvp();
        let strategy = self
            .strategies
            .get_mut(method)
            .ok_or_else(|| anyhow!("{} method is unavailable", method.name()))?;
        let input = DrawInput {
            vertex_buffer: &self.vertex_buffer,
            vertex_count: self.vertex_count,
            mvp,
        };

        let mut scratch = Profiler::new(None);
        let framebuffer = strategy.render(&self.ctx, &input, &mut scratch)?;
        let (width, height) = framebuffer.size();
        let pixels = read_texture_tight(
            &self.ctx.device,
            &self.ctx.queue,
            framebuffer.output_texture(0),
            (width, height),
            wgpu::TextureFormat::Rgba8Unorm,
        )?;
        Ok((width, height, pixels))
    }

    fn capture_path(&mut self, stem: &str, extension: &str) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("creating {}", self.output_dir.display()))?;
        self.capture_count += 1;
        Ok(self
            .output_dir
            .join(format!("{:04}_{stem}.{extension}", self.capture_count)))
    }

    fn screenshot(&mut self) -> anyhow::Result<()> {
        let method = self.ctx.settings.method;
        let (width, height, pixels) = self.capture(method)?;
        let path = self.capture_path(&file_stem(method), "png")?;
        save_png(&path, width, height, &pixels)?;
        Ok(())
    }

    fn compare_with_cpu(&mut self) -> anyhow::Result<()> {
        let method = self.ctx.settings.method;
        let (width, height, test) = self.capture(method)?;
        let (_, _, reference) = self.capture(Method::Cpu)?;

        let diff = compare_rgba8(&reference, &test, width, height)?;
        log::info!(
            "{} vs CPU: psnr {:.2} dB, max deviation {}",
            method.name(),
            diff.psnr(),
            diff.max_deviation
        );

        let test_path = self.capture_path(&file_stem(method), "img")?;
        save_img(&test_path, &RawImage::new(width, height, ImgFormat::Rgba8, test)?)?;
        let reference_path = self.capture_path(&file_stem(Method::Cpu), "img")?;
        save_img(&reference_path, &RawImage::new(width, height, ImgFormat::Rgba8, reference)?)?;
        log::info!("Dumped {} and {}", test_path.display(), reference_path.display());

        self.last_diff = Some((method, diff));
        Ok(())
    }

    // ========================================================================
    // FRAME
    // ========================================================================

    fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.profiler.new_frame();
        self.profiler.push_span("Frame", pass_id::FRAME);

        let mvp = self.mvp();
        let method = self.ctx.settings.method;
        let device = self.ctx.device.clone();
        let queue = self.ctx.queue.clone();

        if let Some(strategy) = self.strategies.get_mut(method) {
            let input = DrawInput {
                vertex_buffer: &self.vertex_buffer,
                vertex_count: self.vertex_count,
                mvp,
            };
            if let Err(err) = strategy.render(&self.ctx, &input, &mut self.profiler) {
                log::error!("{} render failed: {err}", method.name());
            }

            self.profiler.push_span("Composite", pass_id::COMPOSITE);
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Composite Encoder"),
            });
            self.composite
                .draw(&device, &mut encoder, strategy.output().output_view(0), &view);
            queue.submit(std::iter::once(encoder.finish()));
            self.profiler.pop_span(pass_id::COMPOSITE);
        }

        self.profiler.push_span("Overlay", pass_id::OVERLAY);
        self.draw_overlay(&view);
        self.profiler.pop_span(pass_id::OVERLAY);

        self.profiler.pop_span(pass_id::FRAME);
        output.present();
        Ok(())
    }

    fn draw_overlay(&mut self, view: &wgpu::TextureView) {
        let frame = self.profiler.cpu_time(pass_id::FRAME);
        let stats = FrameStats {
            fps: self.fps,
            frame_time_avg_ms: frame.map_or(0.0, |t| t.average()) as f32,
            frame_time_min_ms: frame.and_then(|t| t.min()).unwrap_or(0.0) as f32,
            frame_time_max_ms: frame.and_then(|t| t.max()).unwrap_or(0.0) as f32,
            resolution: (self.config.width, self.config.height),
            faces: self.ctx.ptex.num_faces(),
            buckets: self.ctx.ptex.arrays.len(),
            camera_distance: self.camera.distance(),
            viewpoints: self.viewpoints.len(),
            gpu_timing: self.profiler.has_gpu_timer(),
        };
        let available = self.strategies.available();
        let passes = self.profiler.rows();
        let mut settings = self.ctx.settings;

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: self.window.scale_factor() as f32,
        };
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Overlay Encoder"),
            });

        let panel = if self.overlay.visible {
            Some(OverlayPanel {
                stats: &stats,
                available: &available,
                settings: &mut settings,
                visualize_heuristic: self
                    .strategies
                    .get_mut(self.ctx.settings.method)
                    .and_then(|s| s.visualize_heuristic()),
                passes: &passes,
                last_diff: self.last_diff.as_ref(),
            })
        } else {
            None
        };
        self.overlay.render(
            &self.ctx.device,
            &self.ctx.queue,
            &mut encoder,
            &self.window,
            view,
            &screen_descriptor,
            panel,
        );
        self.ctx.queue.submit(std::iter::once(encoder.finish()));

        if settings != self.ctx.settings {
            if settings.method != self.ctx.settings.method {
                log::info!("Method: {}", settings.method.name());
            }
            self.ctx.update_settings(settings);
        }
    }

    fn end_frame(&mut self) {
        self.input.end_frame();

        self.frame_count += 1;
        let now = Instant::now();
        if (now - self.last_fps_update).as_secs_f32() >= 1.0 {
            self.fps = self.frame_count;
            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

fn file_stem(method: Method) -> String {
    method.name().to_lowercase().replace(' ', "_")
}

// ============================================================================
// MAIN
// ============================================================================

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let event_loop = EventLoop::new()?;

    let window_attributes = Window::default_attributes()
        .with_title("Ptex Methods")
        .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));

    let window = Arc::new(event_loop.create_window(window_attributes)?);

    let mut state = pollster::block_on(State::new(window.clone(), &args))?;

    event_loop.run(move |event, control_flow| {
        match event {
            WinitEvent::WindowEvent {
                ref event,
                window_id,
            } if window_id == window.id() => {
                let consumed = state.overlay.visible
                    && state.overlay.handle_window_event(&window, event).consumed;
                if !consumed {
                    state.input.process_event(event);
                }

                match event {
                    WindowEvent::CloseRequested
                    | WindowEvent::KeyboardInput {
                        event:
                            KeyEvent {
                                state: ElementState::Pressed,
                                physical_key: PhysicalKey::Code(KeyCode::Escape),
                                ..
                            },
                        ..
                    } => control_flow.exit(),
                    WindowEvent::KeyboardInput {
                        event:
                            KeyEvent {
                                state: ElementState::Pressed,
                                physical_key: PhysicalKey::Code(key),
                                repeat: false,
                                ..
                            },
                        ..
                    } if !consumed => state.handle_key(*key),
                    WindowEvent::Resized(physical_size) => {
                        state.resize(*physical_size);
                    }
                    WindowEvent::RedrawRequested => {
                        state.update();
                        match state.render() {
                            Ok(_) => {}
                            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => state.resize(state.size),
                            Err(wgpu::SurfaceError::OutOfMemory) => {
                                log::error!("Out of GPU memory");
                                control_flow.exit();
                            }
                            Err(e) => log::warn!("Surface error: {e:?}"),
                        }
                        state.end_frame();
                    }
                    _ => {}
                }
            }
            WinitEvent::AboutToWait => {
                window.request_redraw();
            }
            _ => {}
        }
    })?;

    Ok(())
}
