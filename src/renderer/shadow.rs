//! Shadow map arrays, per-light layer assignment and the depth-only pass.
//!
//! A pass for one light goes `Idle -> BoundTarget -> Rendering -> Restored`.
//! [`ShadowPassController::begin`] binds a transient render target on one
//! layer of the light's array (or one whole cube of the cube array for omni
//! lights), [`ShadowPassController::draw_depth_only`] records model-matrix
//! only draws and [`ShadowPassController::end`] restores the screen state.

use std::collections::HashMap;
use std::f32::consts::FRAC_PI_2;

use glam::{Mat4, Vec3};

use crate::scene::light::SHADOW_NEAR_PLANE;
use crate::scene::{LightType, NodeRef, SceneLight};

use super::backend::{
    ClearFlags, ClearValues, Command, CommandList, CullMode, DepthAttachment, GraphicsBackend,
    PixelFormat, RenderTarget, TargetStatus, TextureDescriptor, TextureDimension, TextureUsage,
    Viewport,
};
use super::batch::DrawBatch;
use super::error::RenderError;
use super::handles::{RenderTargetHandle, TextureHandle};
use super::pipeline_state::{PipelineStateManager, OMNI_SHADOW_MAP, SHADOW_MAP};

/// Distance at which omni shadow depth saturates. Matches the PBR shader.
pub const OMNI_FAR_PLANE: f32 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShadowMapKind {
    /// Spot and area lights.
    Array,
    /// Directional lights.
    GlobalArray,
    /// Omni lights, six layers each.
    CubeArray,
}

impl ShadowMapKind {
    pub fn for_light(light_type: LightType) -> Self {
        match light_type {
            LightType::Omni => Self::CubeArray,
            LightType::Infinity => Self::GlobalArray,
            LightType::Spot | LightType::Area => Self::Array,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShadowMap {
    pub texture: TextureHandle,
    pub kind: ShadowMapKind,
    pub width: u32,
    pub height: u32,
    /// Number of lights the map holds.
    pub count: u32,
}

fn create_depth_array<B: GraphicsBackend>(
    backend: &mut B,
    label: &str,
    width: u32,
    height: u32,
    layers: u32,
    dimension: TextureDimension,
) -> Result<TextureHandle, RenderError> {
    backend.create_texture(&TextureDescriptor {
        label: Some(label),
        width,
        height,
        layers,
        mip_levels: 1,
        format: PixelFormat::Depth32Float,
        dimension,
        usage: TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED,
    })
}

/// Depth 2D array with one layer per light.
pub fn generate_shadow_map_array<B: GraphicsBackend>(
    backend: &mut B,
    kind: ShadowMapKind,
    width: u32,
    height: u32,
    count: u32,
) -> Result<ShadowMap, RenderError> {
    let label = match kind {
        ShadowMapKind::GlobalArray => "global shadow map",
        _ => "shadow map",
    };
    let texture = create_depth_array(
        backend,
        label,
        width,
        height,
        count.max(1),
        TextureDimension::D2Array,
    )?;
    log::info!("Created {} ({}x{}, {} layers)", label, width, height, count);
    Ok(ShadowMap {
        texture,
        kind,
        width,
        height,
        count,
    })
}

/// Depth cube array with six layers per light.
pub fn generate_cube_shadow_map_array<B: GraphicsBackend>(
    backend: &mut B,
    width: u32,
    height: u32,
    count: u32,
) -> Result<ShadowMap, RenderError> {
    let texture = create_depth_array(
        backend,
        "cube shadow map",
        width,
        height,
        count.max(1) * 6,
        TextureDimension::CubeArray,
    )?;
    log::info!("Created cube shadow map ({}x{}, {} cubes)", width, height, count);
    Ok(ShadowMap {
        texture,
        kind: ShadowMapKind::CubeArray,
        width,
        height,
        count,
    })
}

pub fn destroy_shadow_map<B: GraphicsBackend>(backend: &mut B, shadow_map: ShadowMap) {
    backend.release_texture(shadow_map.texture);
}

/// Layer (or cube) index of every shadow-casting light within its array.
/// Indices stay fixed until the next scene upload.
#[derive(Clone, Debug, Default)]
pub struct ShadowLayout {
    indices: HashMap<NodeRef, i32>,
    counts: HashMap<ShadowMapKind, u32>,
}

impl ShadowLayout {
    pub fn assign(lights: &[SceneLight]) -> Self {
        let mut layout = Self::default();
        for light in lights.iter().filter(|light| light.light.cast_shadow) {
            let count = layout
                .counts
                .entry(ShadowMapKind::for_light(light.light.light_type))
                .or_insert(0);
            layout.indices.insert(light.node, *count as i32);
            *count += 1;
        }
        layout
    }

    /// `-1` for lights without a shadow.
    pub fn index(&self, node: NodeRef) -> i32 {
        self.indices.get(&node).copied().unwrap_or(-1)
    }

    pub fn count(&self, kind: ShadowMapKind) -> u32 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

const CUBE_FACE_AXES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

/// View-projection for each cube face seen from `position`, in
/// +X, -X, +Y, -Y, +Z, -Z order.
pub fn cube_face_matrices(position: Vec3, aspect: f32) -> [Mat4; 6] {
    let projection = Mat4::perspective_rh(FRAC_PI_2, aspect, SHADOW_NEAR_PLANE, OMNI_FAR_PLANE);
    CUBE_FACE_AXES.map(|(direction, up)| {
        projection * Mat4::look_at_rh(position, position + direction, up)
    })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShadowState {
    #[default]
    Idle,
    BoundTarget,
    Rendering,
    Restored,
}

impl ShadowState {
    fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::BoundTarget => "BoundTarget",
            Self::Rendering => "Rendering",
            Self::Restored => "Restored",
        }
    }

    fn allows(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Restored, Self::BoundTarget)
                | (Self::BoundTarget | Self::Rendering, Self::Rendering)
                | (Self::BoundTarget | Self::Rendering, Self::Restored)
        )
    }
}

/// One light's shadow pass.
#[derive(Clone, Copy, Debug)]
pub struct ShadowRequest {
    pub light_type: LightType,
    pub position: Vec3,
    pub view_projection: Mat4,
    pub shadow_map: TextureHandle,
    pub width: u32,
    pub height: u32,
    pub layer_index: u32,
}

#[derive(Debug, Default)]
pub struct ShadowPassController {
    state: ShadowState,
    target: Option<RenderTargetHandle>,
    program: Option<&'static str>,
}

impl ShadowPassController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ShadowState {
        self.state
    }

    fn transition(&mut self, next: ShadowState) -> Result<(), RenderError> {
        if !self.state.allows(next) {
            return Err(RenderError::InvalidShadowTransition {
                from: self.state.name(),
                to: next.name(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Binds a depth target for `request` and records the pass setup.
    pub fn begin<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        pipelines: &mut PipelineStateManager,
        commands: &mut CommandList,
        request: &ShadowRequest,
    ) -> Result<(), RenderError> {
        if !self.state.allows(ShadowState::BoundTarget) {
            return self.transition(ShadowState::BoundTarget);
        }

        let omni = request.light_type == LightType::Omni;
        let name = if omni { OMNI_SHADOW_MAP } else { SHADOW_MAP };
        let state = pipelines.require_mut(name)?;

        let attachment = if omni {
            DepthAttachment::Cube {
                texture: request.shadow_map,
                cube_index: request.layer_index,
            }
        } else {
            DepthAttachment::Layer {
                texture: request.shadow_map,
                layer: request.layer_index,
            }
        };
        let target = backend.create_render_target(attachment)?;
        if let TargetStatus::Incomplete(reason) = backend.render_target_status(target) {
            backend.release_render_target(target);
            return Err(RenderError::IncompleteRenderTarget { reason });
        }

        commands.push(Command::SetRenderTarget(RenderTarget::Offscreen(target)));
        commands.push(Command::BindProgram(state.program()));
        // a cube-array clear wipes every cube, so only the first light clears
        if !omni || request.layer_index == 0 {
            commands.push(Command::Clear(ClearValues {
                flags: ClearFlags::DEPTH,
                color: [0.0; 4],
                depth: 1.0,
            }));
        }
        commands.push(Command::SetViewport(Viewport::new(request.width, request.height)));

        if omni {
            let aspect = request.width as f32 / request.height.max(1) as f32;
            for (face, matrix) in cube_face_matrices(request.position, aspect)
                .into_iter()
                .enumerate()
            {
                state.set_parameter(&format!("shadow_matrices[{face}]"), matrix);
            }
            state.set_parameter("light_pos", request.position);
            state.set_parameter("far_plane", OMNI_FAR_PLANE);
            state.set_parameter("layer_index", request.layer_index as i32);
        } else {
            state.set_parameter("depth_vp", request.view_projection);
        }
        commands.push(Command::SetCullMode(CullMode::Front));

        self.target = Some(target);
        self.program = Some(name);
        self.transition(ShadowState::BoundTarget)
    }

    /// Records `batch` with only its model matrix bound.
    pub fn draw_depth_only(
        &mut self,
        pipelines: &mut PipelineStateManager,
        commands: &mut CommandList,
        batch: &DrawBatch,
        model: Mat4,
    ) -> Result<(), RenderError> {
        self.transition(ShadowState::Rendering)?;
        let name = self.program.unwrap_or(SHADOW_MAP);
        let state = pipelines.require_mut(name)?;
        state.set_parameter("model_matrix", model);
        commands.push(Command::SetParameters(state.parameters().to_vec()));
        commands.push(Command::DrawIndexed {
            vertex_array: batch.vertex_array,
            index_buffer: batch.index_buffer,
            topology: batch.topology,
            index_format: batch.index_format,
            index_count: batch.index_count,
        });
        Ok(())
    }

    /// Restores the screen target, `screen` viewport and back-face culling.
    /// The returned target is still referenced by `commands` and must not be
    /// released before they are submitted.
    pub fn end(
        &mut self,
        commands: &mut CommandList,
        screen: (u32, u32),
    ) -> Result<Option<RenderTargetHandle>, RenderError> {
        self.transition(ShadowState::Restored)?;
        commands.push(Command::SetRenderTarget(RenderTarget::Screen));
        commands.push(Command::SetViewport(Viewport::new(screen.0, screen.1)));
        commands.push(Command::SetCullMode(CullMode::Back));
        self.program = None;
        Ok(self.target.take())
    }

    /// Back to `Idle`, handing out a target left bound by an aborted pass.
    pub fn reset(&mut self) -> Option<RenderTargetHandle> {
        self.state = ShadowState::Idle;
        self.program = None;
        self.target.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::HeadlessBackend;
    use crate::scene::{Light, Scene, Transform};
    use glam::Vec4;

    #[test]
    fn layers_are_assigned_per_kind() {
        let mut scene = Scene::new();
        scene.spawn_light("a_sun", Light::infinity(Vec3::ONE, 1.0).with_shadow(), Transform::default());
        scene.spawn_light("b_bulb", Light::omni(Vec3::ONE, 1.0).with_shadow(), Transform::default());
        scene.spawn_light("c_fill", Light::omni(Vec3::ONE, 1.0), Transform::default());
        scene.spawn_light("d_bulb", Light::omni(Vec3::ONE, 1.0).with_shadow(), Transform::default());
        let lights = scene.lights();

        let layout = ShadowLayout::assign(&lights);
        assert_eq!(layout.index(lights[0].node), 0);
        assert_eq!(layout.index(lights[1].node), 0);
        assert_eq!(layout.index(lights[2].node), -1);
        assert_eq!(layout.index(lights[3].node), 1);
        assert_eq!(layout.count(ShadowMapKind::CubeArray), 2);
        assert_eq!(layout.count(ShadowMapKind::GlobalArray), 1);
        assert_eq!(layout.count(ShadowMapKind::Array), 0);
    }

    #[test]
    fn cube_faces_look_down_each_axis() {
        let position = Vec3::new(1.0, 2.0, 3.0);
        let matrices = cube_face_matrices(position, 1.0);
        for ((direction, _), matrix) in CUBE_FACE_AXES.iter().zip(matrices) {
            let clip = matrix * (position + *direction * 5.0).extend(1.0);
            let ndc = clip.truncate() / clip.w;
            assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4, "{ndc:?}");
            assert!(ndc.z > 0.0 && ndc.z < 1.0);
        }
        // points past the far plane fall outside the depth range
        let clip = matrices[0] * Vec4::new(position.x + 20.0, position.y, position.z, 1.0);
        assert!(clip.z / clip.w > 1.0);
    }

    #[test]
    fn draws_need_a_bound_target() {
        let mut commands = CommandList::new();
        let mut controller = ShadowPassController::new();

        let err = controller.end(&mut commands, (8, 8)).unwrap_err();
        assert!(matches!(
            err,
            RenderError::InvalidShadowTransition { from: "Idle", to: "Restored" }
        ));
        assert!(commands.is_empty());
        assert_eq!(controller.state(), ShadowState::Idle);
    }

    #[test]
    fn omni_cubes_after_the_first_do_not_clear() {
        let mut backend = HeadlessBackend::new();
        let mut pipelines = PipelineStateManager::load_builtin(&mut backend).unwrap();
        let mut commands = CommandList::new();
        let mut controller = ShadowPassController::new();
        let map = generate_cube_shadow_map_array(&mut backend, 16, 16, 2).unwrap();

        for layer_index in 0..2 {
            let request = ShadowRequest {
                light_type: LightType::Omni,
                position: Vec3::ZERO,
                view_projection: Mat4::IDENTITY,
                shadow_map: map.texture,
                width: 16,
                height: 16,
                layer_index,
            };
            controller
                .begin(&mut backend, &mut pipelines, &mut commands, &request)
                .unwrap();
            controller.end(&mut commands, (64, 64)).unwrap();
        }

        let clears = commands
            .iter()
            .filter(|c| matches!(c, Command::Clear(_)))
            .count();
        assert_eq!(clears, 1);
    }

    #[test]
    fn incomplete_targets_are_released_and_fatal() {
        let mut backend = HeadlessBackend::new();
        let mut pipelines = PipelineStateManager::load_builtin(&mut backend).unwrap();
        let mut commands = CommandList::new();
        let mut controller = ShadowPassController::new();
        let map = generate_shadow_map_array(&mut backend, ShadowMapKind::Array, 16, 16, 1).unwrap();

        let request = ShadowRequest {
            light_type: LightType::Spot,
            position: Vec3::ZERO,
            view_projection: Mat4::IDENTITY,
            shadow_map: map.texture,
            width: 16,
            height: 16,
            layer_index: 3,
        };
        let err = controller
            .begin(&mut backend, &mut pipelines, &mut commands, &request)
            .unwrap_err();
        assert!(matches!(err, RenderError::IncompleteRenderTarget { .. }));
        assert_eq!(backend.live_render_targets(), 0);
        assert!(commands.is_empty());
    }
}
