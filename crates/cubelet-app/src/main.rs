// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{Context, Result};
use clap::Parser;
use cubelet_core::init_tracing;
use cubelet_math::{aspect_ratio, spin, Camera, Mat4, Vec3};
use cubelet_platform::{
    winit::{
        application::ApplicationHandler,
        event::WindowEvent,
        event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
        window::WindowId,
    },
    WindowSurface,
};
use cubelet_render::{
    EngineConfig, LightSource, LightUniforms, Material, MeshData, ModelId, Renderer,
    SceneUniforms,
};
use cubelet_render_vk::VkRenderer;
use serde::Deserialize;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML file with an `[engine]` table. Missing file means defaults.
    #[arg(long, default_value = "cubelet.toml")]
    config: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct AppCfg {
    #[serde(default)]
    engine: EngineConfig,
}

fn parse_cfg(text: &str) -> Result<AppCfg> {
    let cfg: AppCfg = toml::from_str(text).context("parsing config")?;
    cfg.engine.validate()?;
    Ok(cfg)
}

fn load_cfg(path: &Path) -> Result<AppCfg> {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).with_context(|| format!("config {}", path.display())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("no {} found, using defaults", path.display());
            Ok(AppCfg::default())
        }
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

struct DemoScene {
    flat: ModelId,
    textured: ModelId,
    started: Instant,
}

impl DemoScene {
    fn build(renderer: &mut VkRenderer) -> Result<Self> {
        let cube = MeshData::cube(0.5);
        let flat = renderer.create_model(
            &cube,
            Material::Untextured {
                color: [0.9, 0.35, 0.2, 1.0],
            },
        )?;
        let texture = renderer.create_texture(64, 64)?;
        let textured = renderer.create_model(&cube, Material::Textured { texture })?;
        Ok(Self {
            flat,
            textured,
            started: Instant::now(),
        })
    }

    fn update(&self, renderer: &mut VkRenderer, aspect: f32) -> Result<()> {
        let t = self.started.elapsed().as_secs_f32();
        renderer.set_model_transform(self.flat, spin(Vec3::new(-0.8, 0.0, 0.0), t, t * 0.5))?;
        renderer.set_model_transform(
            self.textured,
            spin(Vec3::new(0.8, 0.0, 0.0), -t * 0.7, t * 0.3),
        )?;

        let camera = Camera::look_at(Vec3::new(0.0, 1.2, 3.5), Vec3::ZERO);
        let scene = SceneUniforms::new(camera.view_proj(aspect), Mat4::IDENTITY, camera.eye);
        let light = LightUniforms::new(Vec3::splat(0.15), Vec3::ONE, 32.0).with_light(
            0,
            LightSource::Directional {
                direction: Vec3::new(-0.4, -1.0, -0.6),
            },
            Vec3::ONE,
        );
        renderer.update_scene(&scene, &light)
    }
}

// Field order matters on drop: the renderer owns the Vulkan surface and
// must go before the window it was created from.
struct App {
    cfg: AppCfg,
    renderer: Option<VkRenderer>,
    scene: Option<DemoScene>,
    surface: Option<WindowSurface>,

    failure: Option<anyhow::Error>,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        Self {
            cfg,
            renderer: None,
            scene: None,
            surface: None,
            failure: None,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let surface = WindowSurface::create(event_loop, &self.cfg.engine)?;
        let mut renderer = VkRenderer::new(&surface, &self.cfg.engine)?;
        renderer.set_clear_color(self.cfg.engine.clear_color);
        let scene = DemoScene::build(&mut renderer).context("building demo scene")?;

        self.surface = Some(surface);
        self.renderer = Some(renderer);
        self.scene = Some(scene);
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        let (Some(renderer), Some(scene)) = (self.renderer.as_mut(), self.scene.as_ref()) else {
            return Ok(());
        };
        let aspect = aspect_ratio(self.cfg.engine.window_width, self.cfg.engine.window_height);
        scene.update(renderer, aspect)?;
        renderer.render()?;
        self.frames = self.frames.saturating_add(1);
        Ok(())
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.scene = None;
        self.renderer = None;
        self.surface = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.failure = Some(err);
        self.shutdown(event_loop);
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.surface.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        match &self.surface {
            Some(surface) if surface.id() == window_id => {}
            _ => return,
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(surface) = &self.surface else {
            return;
        };
        event_loop.set_control_flow(ControlFlow::Poll);
        surface.request_redraw();

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config)?;
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
