// app.rs
use std::sync::Arc;
use std::time::Instant;

use glam::{Quat, Vec3, Vec4};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::*,
    event_loop::ActiveEventLoop,
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::renderer::{GraphicsManager, RenderError, WgpuBackend};
use crate::scene::{primitives, Camera, Light, Material, Scene, SkyBox, Transform};
use crate::settings::RenderSettings;

const ORBIT_RADIUS: f32 = 9.0;
const ORBIT_HEIGHT: f32 = 4.0;
const ORBIT_SPEED: f32 = 0.2;

/// A small scene exercising every shadow kind: a spot, a sun and an omni
/// light over a plane with a row of spheres and a spinning cube.
pub fn demo_scene() -> Scene {
    let mut scene = Scene::new();
    scene.add_mesh("sphere", primitives::sphere(32, 16));
    scene.add_mesh("cube", primitives::cube());
    scene.add_mesh("plane", primitives::plane(20.0));

    scene.add_material(
        "floor",
        Material::new("floor")
            .with_base_color(Vec4::new(0.6, 0.6, 0.6, 1.0))
            .with_metallic_roughness(0.0, 0.9),
    );
    scene.add_material(
        "gold",
        Material::new("gold")
            .with_base_color(Vec4::new(1.0, 0.78, 0.34, 1.0))
            .with_metallic_roughness(1.0, 0.3),
    );
    scene.add_material(
        "plastic",
        Material::new("plastic")
            .with_base_color(Vec4::new(0.2, 0.4, 0.9, 1.0))
            .with_metallic_roughness(0.0, 0.5),
    );

    scene.spawn_geometry("floor", "plane", &["floor"], Transform::default());
    for i in 0..5 {
        let x = (i as f32 - 2.0) * 2.2;
        let material = if i % 2 == 0 { "gold" } else { "plastic" };
        scene.spawn_geometry(
            &format!("sphere {i}"),
            "sphere",
            &[material],
            Transform::from_translation(Vec3::new(x, 1.0, 0.0)),
        );
    }
    let cube = scene.spawn_geometry(
        "cube",
        "cube",
        &["plastic"],
        Transform::from_translation(Vec3::new(0.0, 1.0, 3.5))
            .with_rotation(Quat::from_rotation_y(0.4)),
    );
    scene.add_spin(cube, Vec3::Y, 0.8);

    scene.spawn_light(
        "sun",
        Light::infinity(Vec3::new(1.0, 0.95, 0.9), 2.0).with_shadow(),
        Transform::from_translation(Vec3::new(6.0, 10.0, 4.0)).looking_at(Vec3::ZERO),
    );
    scene.spawn_light(
        "spot",
        Light::spot(Vec3::new(0.9, 0.9, 1.0), 30.0, 0.6).with_shadow(),
        Transform::from_translation(Vec3::new(-4.0, 6.0, 4.0)).looking_at(Vec3::ZERO),
    );
    scene.spawn_light(
        "lamp",
        Light::omni(Vec3::new(1.0, 0.6, 0.3), 12.0).with_shadow(),
        Transform::from_translation(Vec3::new(2.0, 3.0, -2.0)),
    );

    scene.set_ambient(Vec3::splat(0.03));
    scene.set_skybox(SkyBox::solid(256, [90, 130, 200, 255], [40, 50, 70, 255]));
    *scene.camera_mut() = Camera::looking_at(Vec3::new(0.0, ORBIT_HEIGHT, ORBIT_RADIUS), Vec3::ZERO);
    scene
}

pub struct App {
    settings: RenderSettings,
    window: Option<Arc<Window>>,
    window_id: Option<WindowId>,
    graphics: Option<GraphicsManager<WgpuBackend>>,
    scene: Scene,
    last_frame: Instant,
    orbit_angle: f32,
}

impl App {
    pub fn new(settings: RenderSettings, scene: Scene) -> Self {
        Self {
            settings,
            window: None,
            window_id: None,
            graphics: None,
            scene,
            last_frame: Instant::now(),
            orbit_angle: 0.0,
        }
    }

    fn create_graphics(&self, window: Arc<Window>) -> Result<GraphicsManager<WgpuBackend>, RenderError> {
        let backend = pollster::block_on(WgpuBackend::new(window, &self.settings))?;
        let mut graphics = GraphicsManager::new(backend, self.settings.clone())?;
        graphics.initialize_buffers(&self.scene)?;
        Ok(graphics)
    }

    fn update(&mut self) {
        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32();
        self.last_frame = now;

        self.scene.advance(dt);
        self.orbit_angle += dt * ORBIT_SPEED;
        self.scene
            .camera_mut()
            .orbit(self.orbit_angle, ORBIT_RADIUS, ORBIT_HEIGHT);
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let (width, height) = self.settings.screen_size();
        let attributes = Window::default_attributes()
            .with_title("wgpu frame pipeline")
            .with_inner_size(PhysicalSize::new(width, height));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("Failed to create window: {}", err);
                event_loop.exit();
                return;
            }
        };

        match self.create_graphics(Arc::clone(&window)) {
            Ok(graphics) => self.graphics = Some(graphics),
            Err(err) => {
                log::error!("Failed to initialise graphics: {}", err);
                event_loop.exit();
                return;
            }
        }

        self.window_id = Some(window.id());
        window.request_redraw();
        self.window = Some(window);
        self.last_frame = Instant::now();
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if Some(id) != self.window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(graphics) = self.graphics.as_mut() {
                    graphics.resize(size.width, size.height);
                }
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                if let (Some(window), Some(graphics)) = (&self.window, self.graphics.as_mut()) {
                    let size = window.inner_size();
                    graphics.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                self.update();
                if let Some(graphics) = self.graphics.as_mut() {
                    if let Err(err) = graphics.draw(&self.scene) {
                        log::error!("Frame failed: {}", err);
                        event_loop.exit();
                        return;
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                event_loop.exit();
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(graphics) = self.graphics.as_mut() {
            graphics.finalize();
        }
    }
}
