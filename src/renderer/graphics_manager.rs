//! The frame pipeline entry point.
//!
//! [`GraphicsManager`] owns everything the pipeline allocates and records
//! one frame per [`GraphicsManager::draw`]. Compute, skybox and debug entry
//! points live next to their helpers in `brdf.rs`, `environment.rs` and
//! `debug.rs`.

use std::sync::Arc;

use glam::{Mat4, Vec4};

use crate::scene::{LightType, MaterialChannel, Scene, SceneLight};
use crate::settings::RenderSettings;

use super::backend::{
    BufferDescriptor, BufferUsage, ClearFlags, ClearValues, Command, CommandList, CullMode,
    DepthCompare, GraphicsBackend, ProgramKind, RenderTarget, Viewport,
};
use super::batch::{build_scene_batches, DrawBatch, SkyboxGeometry};
use super::brdf::BRDF_LUT_KEY;
use super::constants::{ConstantPacker, FrameConstants, FRAME_CONSTANTS_BLOCK};
use super::debug::DebugQueue;
use super::environment::upload_skybox;
use super::error::RenderError;
use super::frame::FrameRing;
use super::handles::TextureHandle;
use super::pipeline_state::{
    PipelineState, PipelineStateManager, PipelineStateProvider, ShaderValue, OMNI_SHADOW_MAP,
    PBR, SHADOW_MAP,
};
use super::resources::ResourceRegistry;
use super::shadow::{
    generate_cube_shadow_map_array, generate_shadow_map_array, ShadowLayout, ShadowMap,
    ShadowMapKind, ShadowPassController, ShadowRequest,
};
use super::texture_cache::TextureCache;

const SHADOW_MAP_KINDS: [ShadowMapKind; 3] = [
    ShadowMapKind::Array,
    ShadowMapKind::GlobalArray,
    ShadowMapKind::CubeArray,
];

pub struct GraphicsManager<B: GraphicsBackend> {
    pub(super) backend: B,
    pub(super) settings: RenderSettings,
    pub(super) screen: (u32, u32),
    pub(super) pipelines: PipelineStateManager,
    pub(super) cache: TextureCache,
    pub(super) registry: ResourceRegistry,
    pub(super) frames: FrameRing,
    pub(super) shadows: ShadowPassController,
    pub(super) shadow_layout: ShadowLayout,
    pub(super) packer: ConstantPacker,
    pub(super) skybox: Option<SkyboxGeometry>,
    pub(super) skybox_texture: Option<TextureHandle>,
    pub(super) debug: DebugQueue,
    pub(super) commands: CommandList,
    pub(super) bound: Option<String>,
    pub(super) brdf_dispatches: usize,
}

impl<B: GraphicsBackend> GraphicsManager<B> {
    /// Compiles the built-in programs and sizes the frame ring from
    /// `settings`.
    pub fn new(mut backend: B, settings: RenderSettings) -> Result<Self, RenderError> {
        let settings = settings.validate();
        let pipelines = PipelineStateManager::load_builtin(&mut backend)?;
        let screen = settings.screen_size();
        backend.resize(screen.0, screen.1);
        log::info!(
            "Graphics manager ready: {}x{}, {} frames in flight",
            screen.0,
            screen.1,
            settings.frames_in_flight
        );

        Ok(Self {
            backend,
            frames: FrameRing::new(settings.frames_in_flight),
            settings,
            screen,
            pipelines,
            cache: TextureCache::new(),
            registry: ResourceRegistry::new(),
            shadows: ShadowPassController::new(),
            shadow_layout: ShadowLayout::default(),
            packer: ConstantPacker::new(),
            skybox: None,
            skybox_texture: None,
            debug: DebugQueue::default(),
            commands: CommandList::new(),
            bound: None,
            brdf_dispatches: 0,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn screen_size(&self) -> (u32, u32) {
        self.screen
    }

    pub fn pipelines(&self) -> &PipelineStateManager {
        &self.pipelines
    }

    pub fn texture_cache(&self) -> &TextureCache {
        &self.cache
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn frames(&self) -> &FrameRing {
        &self.frames
    }

    pub fn shadow_layout(&self) -> &ShadowLayout {
        &self.shadow_layout
    }

    /// Commands recorded since the last submit.
    pub fn pending_commands(&self) -> &CommandList {
        &self.commands
    }

    pub fn debug_enabled(&self) -> bool {
        self.settings.debug_overlay || cfg!(debug_assertions)
    }

    /// Uploads `scene`, replacing whatever was uploaded before. Returns the
    /// number of draw batches.
    pub fn initialize_buffers(&mut self, scene: &Scene) -> Result<usize, RenderError> {
        self.clear_buffers();

        self.shadow_layout = ShadowLayout::assign(&scene.lights());
        let batches = build_scene_batches(
            &mut self.backend,
            scene,
            &mut self.cache,
            &mut self.registry,
        )?;
        self.skybox = Some(SkyboxGeometry::upload(&mut self.backend, &mut self.registry)?);
        self.skybox_texture = match scene.skybox() {
            Some(skybox) => {
                let texture = upload_skybox(&mut self.backend, skybox)?;
                self.registry.track_texture(texture);
                Some(texture)
            }
            None => None,
        };

        let count = batches.len();
        self.frames.publish(batches, self.skybox_texture);
        log::info!(
            "Scene uploaded: {} batches, {} cached textures",
            count,
            self.cache.len()
        );
        Ok(count)
    }

    /// Releases everything uploaded for the current scene. Safe to call
    /// repeatedly.
    pub fn clear_buffers(&mut self) {
        self.commands = CommandList::new();
        if let Some(target) = self.shadows.reset() {
            self.backend.release_render_target(target);
        }
        self.debug.clear();
        self.frames.clear(&mut self.backend);
        self.registry.release_all(&mut self.backend);
        self.cache.release_all(&mut self.backend);
        self.skybox = None;
        self.skybox_texture = None;
        self.shadow_layout = ShadowLayout::default();
        self.bound = None;
    }

    /// Releases the scene and every compiled program.
    pub fn finalize(&mut self) {
        self.clear_buffers();
        self.pipelines.release_all(&mut self.backend);
        self.packer.invalidate();
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.screen = (width, height);
        self.settings.resolution.width = width;
        self.settings.resolution.height = height;
        self.backend.resize(width, height);
    }

    /// Records and submits one frame of `scene`.
    pub fn draw(&mut self, scene: &Scene) -> Result<(), RenderError> {
        self.draw_with(scene, |_| Ok(()))
    }

    /// Like [`Self::draw`], running `overlays` after the debug pass so it can
    /// add its own overlays before the frame is submitted.
    pub fn draw_with<F>(&mut self, scene: &Scene, overlays: F) -> Result<(), RenderError>
    where
        F: FnOnce(&mut Self) -> Result<(), RenderError>,
    {
        self.frames.advance();
        if let Some(target) = self.shadows.reset() {
            self.registry.retire_render_target(target);
        }

        let had_lut = self.cache.contains(BRDF_LUT_KEY);
        let dispatches = self.brdf_dispatches;
        match self.record_frame(scene, overlays) {
            Ok(()) => self.submit(),
            Err(err) => {
                self.abandon_frame(had_lut, dispatches);
                Err(err)
            }
        }
    }

    /// Drops everything a failed frame recorded. A lookup table whose
    /// dispatch was in the dropped list is regenerated next frame.
    fn abandon_frame(&mut self, had_lut: bool, dispatches: usize) {
        log::warn!("Discarding {} recorded commands", self.commands.len());
        self.commands = CommandList::new();
        self.bound = None;
        self.debug.clear();
        if let Some(target) = self.shadows.reset() {
            self.registry.retire_render_target(target);
        }
        self.registry.release_transient(&mut self.backend);
        if !had_lut && self.cache.contains(BRDF_LUT_KEY) {
            self.brdf_dispatches = dispatches;
            self.cache.remove(&mut self.backend, BRDF_LUT_KEY);
            self.frames.current_mut().context.brdf_lut = None;
        }
    }

    fn record_frame<F>(&mut self, scene: &Scene, overlays: F) -> Result<(), RenderError>
    where
        F: FnOnce(&mut Self) -> Result<(), RenderError>,
    {
        self.integrate_brdf()?;
        self.clear_screen();

        let lights = scene.lights();
        self.ensure_frame_shadow_maps()?;
        self.render_shadow_maps(scene, &lights)?;

        let (width, height) = self.screen;
        let constants = FrameConstants::gather(
            scene,
            &lights,
            &self.shadow_layout,
            width as f32 / height.max(1) as f32,
        );
        self.use_shader_program(PBR)?;
        self.set_per_frame_constants(&constants)?;
        self.set_shadow_maps();
        self.set_skybox();

        let batches = Arc::clone(self.frames.current().batches());
        let mut drawn = 0;
        for batch in batches.iter() {
            match scene.node_transform(batch.node) {
                Some(model) => {
                    self.draw_batch(batch, model)?;
                    drawn += 1;
                }
                None => log::trace!("Batch node {:?} is gone, skipping", batch.node),
            }
        }

        self.draw_skybox()?;

        if self.debug_enabled() {
            self.render_debug_buffers()?;
            self.draw_shadow_overlays()?;
        }
        overlays(self)?;

        log::trace!(
            "Frame {}: {} of {} batches, {} commands",
            self.frames.index(),
            drawn,
            batches.len(),
            self.commands.len()
        );
        Ok(())
    }

    /// Hands the recorded commands to the backend and releases what they
    /// were the last users of.
    pub fn submit(&mut self) -> Result<(), RenderError> {
        let commands = self.commands.take();
        let result = self.backend.submit(commands);
        self.registry.release_transient(&mut self.backend);
        self.debug.clear();
        self.bound = None;
        result
    }

    fn clear_screen(&mut self) {
        let (width, height) = self.screen;
        self.commands.push(Command::SetRenderTarget(RenderTarget::Screen));
        self.commands.push(Command::SetViewport(Viewport::new(width, height)));
        self.commands.push(Command::SetDepthCompare(DepthCompare::Less));
        self.commands.push(Command::SetCullMode(CullMode::Back));
        self.commands.push(Command::Clear(ClearValues {
            flags: ClearFlags::COLOR | ClearFlags::DEPTH,
            color: self.settings.clear_color,
            depth: 1.0,
        }));
    }

    /// Binds the program registered as `name` for the following commands.
    pub fn use_shader_program(&mut self, name: &str) -> Result<(), RenderError> {
        let program = self.pipelines.require(name)?.program();
        self.commands.push(Command::BindProgram(program));
        self.bound = Some(name.to_string());
        Ok(())
    }

    pub fn bound_program(&self) -> Option<&str> {
        self.bound.as_deref()
    }

    pub(super) fn bound_state_mut(&mut self) -> Result<&mut PipelineState, RenderError> {
        let name = self
            .bound
            .as_deref()
            .ok_or_else(|| RenderError::MissingPipelineState("<none bound>".to_string()))?;
        self.pipelines.require_mut(name)
    }

    pub(super) fn bound_kind(&self) -> Option<ProgramKind> {
        self.bound
            .as_deref()
            .and_then(|name| self.pipelines.pipeline_state(name))
            .map(PipelineState::kind)
    }

    /// Sets a parameter of the bound program. Returns `false` when nothing is
    /// bound or the program does not declare `name`.
    pub fn set_parameter(&mut self, name: &str, value: impl Into<ShaderValue>) -> bool {
        match self.bound_state_mut() {
            Ok(state) => state.set_parameter(name, value),
            Err(_) => false,
        }
    }

    /// Snapshots the bound program's parameters for the following draws.
    pub(super) fn commit_parameters(&mut self) -> Result<(), RenderError> {
        let parameters = self.bound_state_mut()?.parameters().to_vec();
        if !parameters.is_empty() {
            self.commands.push(Command::SetParameters(parameters));
        }
        Ok(())
    }

    pub(super) fn bind_texture(&mut self, name: &str, texture: Option<TextureHandle>) {
        self.commands.push(Command::BindTexture {
            name: name.to_string(),
            texture,
        });
    }

    /// Writes the constants block of the bound program into the current
    /// frame's uniform buffer and binds it. Programs without the block are
    /// left alone.
    pub fn set_per_frame_constants(&mut self, constants: &FrameConstants) -> Result<(), RenderError> {
        let name = self
            .bound
            .as_deref()
            .ok_or_else(|| RenderError::MissingPipelineState("<none bound>".to_string()))?;
        let state = self.pipelines.require(name)?;
        let Some(data) = self.packer.pack(state, constants) else {
            return Ok(());
        };

        let buffer = match self.frames.current().constants {
            Some(buffer) => {
                self.commands.push(Command::WriteBuffer {
                    buffer,
                    offset: 0,
                    data,
                });
                buffer
            }
            None => {
                let buffer = self.backend.create_buffer(&BufferDescriptor {
                    label: Some(FRAME_CONSTANTS_BLOCK),
                    usage: BufferUsage::Uniform,
                    contents: &data,
                })?;
                self.frames.current_mut().constants = Some(buffer);
                buffer
            }
        };
        self.commands.push(Command::BindUniformBuffer {
            block: FRAME_CONSTANTS_BLOCK.to_string(),
            buffer,
        });
        Ok(())
    }

    fn shadow_map_size(&self, kind: ShadowMapKind) -> u32 {
        match kind {
            ShadowMapKind::Array => self.settings.shadow_map_size,
            ShadowMapKind::GlobalArray => self.settings.global_shadow_map_size,
            ShadowMapKind::CubeArray => self.settings.cube_shadow_map_size,
        }
    }

    /// Allocates the current frame's shadow maps for the scene's light
    /// counts, replacing maps of the wrong size.
    fn ensure_frame_shadow_maps(&mut self) -> Result<(), RenderError> {
        for kind in SHADOW_MAP_KINDS {
            let count = self.shadow_layout.count(kind);
            let size = self.shadow_map_size(kind);
            let current = self.frames.current().context.shadow_map(kind);
            if let Some(existing) = current {
                if existing.count == count && existing.width == size {
                    continue;
                }
                self.backend.release_texture(existing.texture);
                self.frames.current_mut().context.clear_shadow_map(kind);
            }
            if count == 0 {
                continue;
            }
            let shadow_map = match kind {
                ShadowMapKind::CubeArray => {
                    generate_cube_shadow_map_array(&mut self.backend, size, size, count)?
                }
                _ => generate_shadow_map_array(&mut self.backend, kind, size, size, count)?,
            };
            self.frames.current_mut().context.set_shadow_map(shadow_map);
        }
        Ok(())
    }

    /// One depth pass per shadow-casting light, all recorded before the main
    /// pass samples the maps.
    fn render_shadow_maps(&mut self, scene: &Scene, lights: &[SceneLight]) -> Result<(), RenderError> {
        let batches = Arc::clone(self.frames.current().batches());
        for light in lights {
            let index = self.shadow_layout.index(light.node);
            if index < 0 {
                continue;
            }
            let kind = ShadowMapKind::for_light(light.light.light_type);
            let Some(shadow_map) = self.frames.current().context.shadow_map(kind) else {
                continue;
            };

            self.begin_shadow_map(light, shadow_map, index as u32)?;
            for batch in batches.iter() {
                if let Some(model) = scene.node_transform(batch.node) {
                    self.draw_batch_depth_only(batch, model)?;
                }
            }
            self.end_shadow_map()?;
        }
        Ok(())
    }

    /// Binds layer `layer_index` of `shadow_map` (the cube at that index for
    /// omni lights) as the depth target for `light`.
    pub fn begin_shadow_map(
        &mut self,
        light: &SceneLight,
        shadow_map: ShadowMap,
        layer_index: u32,
    ) -> Result<(), RenderError> {
        let position = light.position().truncate();
        let request = ShadowRequest {
            light_type: light.light.light_type,
            position,
            view_projection: light
                .light
                .shadow_view_projection(position, light.direction().truncate()),
            shadow_map: shadow_map.texture,
            width: shadow_map.width,
            height: shadow_map.height,
            layer_index,
        };
        self.shadows.begin(
            &mut self.backend,
            &mut self.pipelines,
            &mut self.commands,
            &request,
        )?;
        let program = if light.light.light_type == LightType::Omni {
            OMNI_SHADOW_MAP
        } else {
            SHADOW_MAP
        };
        self.bound = Some(program.to_string());
        Ok(())
    }

    pub fn draw_batch_depth_only(&mut self, batch: &DrawBatch, model: Mat4) -> Result<(), RenderError> {
        self.shadows
            .draw_depth_only(&mut self.pipelines, &mut self.commands, batch, model)
    }

    pub fn end_shadow_map(&mut self) -> Result<(), RenderError> {
        if let Some(target) = self.shadows.end(&mut self.commands, self.screen)? {
            self.registry.retire_render_target(target);
        }
        Ok(())
    }

    /// Binds the current frame's shadow maps to the bound program.
    pub fn set_shadow_maps(&mut self) {
        let context = self.frames.current().context;
        self.bind_texture("shadow_map", context.shadow_map.map(|m| m.texture));
        self.bind_texture(
            "global_shadow_map",
            context.global_shadow_map.map(|m| m.texture),
        );
        self.bind_texture("cube_shadow_map", context.cube_shadow_map.map(|m| m.texture));
    }

    pub fn set_skybox(&mut self) {
        let skybox = self.frames.current().context.skybox;
        self.bind_texture("skybox", skybox);
    }

    /// Records `batch` with its material bound to the bound program.
    pub fn draw_batch(&mut self, batch: &DrawBatch, model: Mat4) -> Result<(), RenderError> {
        let material = &batch.material;
        let textures = batch.textures;
        let brdf_lut = self.frames.current().context.brdf_lut;

        let state = self.bound_state_mut()?;
        state.set_parameter("model_matrix", model);
        state.set_parameter(
            "using_diffuse_map",
            textures.get(MaterialChannel::BaseColor).is_some(),
        );
        state.set_parameter(
            "diffuse_color",
            material.base_color.value().unwrap_or(Vec4::ONE),
        );
        state.set_parameter(
            "using_normal_map",
            textures.get(MaterialChannel::Normal).is_some(),
        );
        state.set_parameter("specular_color", material.specular);
        state.set_parameter("specular_power", material.specular_power);
        state.set_parameter(
            "using_metallic_map",
            textures.get(MaterialChannel::Metallic).is_some(),
        );
        state.set_parameter("metallic", material.metallic.value().unwrap_or(0.0));
        state.set_parameter(
            "using_roughness_map",
            textures.get(MaterialChannel::Roughness).is_some(),
        );
        state.set_parameter("roughness", material.roughness.value().unwrap_or(0.5));
        state.set_parameter(
            "using_ao_map",
            textures.get(MaterialChannel::AmbientOcclusion).is_some(),
        );
        state.set_parameter("ao", material.ambient_occlusion.value().unwrap_or(1.0));
        self.commit_parameters()?;

        self.bind_texture("diffuse_map", textures.get(MaterialChannel::BaseColor));
        self.bind_texture("normal_map", textures.get(MaterialChannel::Normal));
        self.bind_texture("metallic_map", textures.get(MaterialChannel::Metallic));
        self.bind_texture("roughness_map", textures.get(MaterialChannel::Roughness));
        self.bind_texture("ao_map", textures.get(MaterialChannel::AmbientOcclusion));
        self.bind_texture("brdf_lut", brdf_lut);

        self.commands.push(Command::SetCullMode(CullMode::Back));
        self.commands.push(Command::DrawIndexed {
            vertex_array: batch.vertex_array,
            index_buffer: batch.index_buffer,
            topology: batch.topology,
            index_format: batch.index_format,
            index_count: batch.index_count,
        });
        Ok(())
    }
}
