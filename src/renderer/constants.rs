//! Packing of the per-frame constants block.
//!
//! Field offsets come from the bound program's reflection and are resolved
//! once per program. Fields a program does not declare are left out.

use std::collections::HashMap;

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::scene::{AttenCurve, Scene, SceneLight};

use super::handles::ProgramHandle;
use super::pipeline_state::PipelineState;
use super::reflection::{FieldInfo, ShaderReflection, UniformBlock};
use super::shadow::ShadowLayout;

pub const FRAME_CONSTANTS_BLOCK: &str = "DrawFrameConstants";

/// Upper bound on light slots probed in a light array.
const MAX_LIGHT_SLOTS: usize = 256;

#[derive(Clone, Debug, PartialEq)]
pub struct LightConstants {
    pub position: Vec4,
    pub color: Vec4,
    pub direction: Vec4,
    pub size: Vec2,
    pub intensity: f32,
    pub light_type: i32,
    pub distance_attenuation: AttenCurve,
    pub angle_attenuation: AttenCurve,
    pub shadow_map_index: i32,
    pub view_projection: Mat4,
}

impl LightConstants {
    pub fn from_scene_light(light: &SceneLight, shadow_map_index: i32) -> Self {
        let position = light.position();
        let direction = light.direction();
        Self {
            position,
            color: light.light.color,
            direction,
            size: light.light.size,
            intensity: light.light.intensity,
            light_type: light.light.light_type as i32,
            distance_attenuation: light.light.distance_attenuation,
            angle_attenuation: light.light.angle_attenuation,
            shadow_map_index,
            view_projection: light
                .light
                .shadow_view_projection(position.truncate(), direction.truncate()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FrameConstants {
    pub view: Mat4,
    pub projection: Mat4,
    pub ambient: Vec3,
    pub camera_position: Vec3,
    pub lights: Vec<LightConstants>,
}

impl FrameConstants {
    pub fn gather(scene: &Scene, lights: &[SceneLight], layout: &ShadowLayout, aspect: f32) -> Self {
        let camera = scene.camera();
        Self {
            view: camera.view(),
            projection: camera.projection(aspect),
            ambient: scene.ambient(),
            camera_position: camera.eye,
            lights: lights
                .iter()
                .map(|light| LightConstants::from_scene_light(light, layout.index(light.node)))
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Default)]
struct LightLayout {
    position: Option<FieldInfo>,
    color: Option<FieldInfo>,
    direction: Option<FieldInfo>,
    size: Option<FieldInfo>,
    intensity: Option<FieldInfo>,
    light_type: Option<FieldInfo>,
    distance_attenuation: Option<FieldInfo>,
    angle_attenuation: Option<FieldInfo>,
    shadow_map_index: Option<FieldInfo>,
    view_projection: Option<FieldInfo>,
}

impl LightLayout {
    fn resolve(reflection: &ShaderReflection, block: &UniformBlock, slot: usize) -> Self {
        let field = |name: &str| reflection.field(block, &format!("all_lights[{slot}].{name}"));
        Self {
            position: field("light_position"),
            color: field("light_color"),
            direction: field("light_direction"),
            size: field("light_size"),
            intensity: field("light_intensity"),
            light_type: field("light_type"),
            distance_attenuation: field("light_dist_atten_curve"),
            angle_attenuation: field("light_angle_atten_curve"),
            shadow_map_index: field("light_shadow_map_index"),
            view_projection: field("light_vp"),
        }
    }
}

/// Offsets of the constants block in one program.
#[derive(Clone, Debug)]
struct FrameLayout {
    size: usize,
    view: Option<FieldInfo>,
    projection: Option<FieldInfo>,
    ambient: Option<FieldInfo>,
    num_lights: Option<FieldInfo>,
    camera_position: Option<FieldInfo>,
    lights: Vec<LightLayout>,
}

impl FrameLayout {
    fn resolve(reflection: &ShaderReflection) -> Option<Self> {
        let block = reflection.uniform_block(FRAME_CONSTANTS_BLOCK)?;
        let field = |name: &str| reflection.field(block, name);
        let lights = (0..MAX_LIGHT_SLOTS)
            .take_while(|slot| reflection.field(block, &format!("all_lights[{slot}]")).is_some())
            .map(|slot| LightLayout::resolve(reflection, block, slot))
            .collect();
        Some(Self {
            size: block.size as usize,
            view: field("view_matrix"),
            projection: field("projection_matrix"),
            ambient: field("ambient_color"),
            num_lights: field("num_lights"),
            camera_position: field("cam_pos"),
            lights,
        })
    }
}

fn put(data: &mut [u8], field: Option<FieldInfo>, bytes: &[u8]) {
    let Some(field) = field else {
        return;
    };
    let range = field.range();
    let len = bytes.len().min(range.len());
    if let Some(slot) = data.get_mut(range.start..range.start + len) {
        slot.copy_from_slice(&bytes[..len]);
    }
}

fn put_mat4(data: &mut [u8], field: Option<FieldInfo>, value: &Mat4) {
    put(data, field, bytemuck::cast_slice(&value.to_cols_array()));
}

fn put_vec(data: &mut [u8], field: Option<FieldInfo>, value: &[f32]) {
    put(data, field, bytemuck::cast_slice(value));
}

/// Writes [`FrameConstants`] through per-program cached layouts.
#[derive(Debug, Default)]
pub struct ConstantPacker {
    layouts: HashMap<ProgramHandle, Option<FrameLayout>>,
}

impl ConstantPacker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of programs whose layout has been resolved.
    pub fn cached_layouts(&self) -> usize {
        self.layouts.len()
    }

    /// Forgets every cached layout, e.g. after programs were recompiled.
    pub fn invalidate(&mut self) {
        self.layouts.clear();
    }

    /// Block contents for `state`'s program, or `None` if it declares no
    /// constants block.
    pub fn pack(&mut self, state: &PipelineState, constants: &FrameConstants) -> Option<Vec<u8>> {
        let layout = self
            .layouts
            .entry(state.program())
            .or_insert_with(|| {
                let layout = FrameLayout::resolve(state.reflection());
                log::debug!(
                    "Resolved frame constants for '{}': {}",
                    state.name(),
                    layout
                        .as_ref()
                        .map_or("absent".to_string(), |l| format!("{} bytes", l.size))
                );
                layout
            })
            .as_ref()?;

        let mut data = vec![0u8; layout.size];
        put_mat4(&mut data, layout.view, &constants.view);
        put_mat4(&mut data, layout.projection, &constants.projection);
        put_vec(&mut data, layout.ambient, &constants.ambient.to_array());
        put_vec(&mut data, layout.camera_position, &constants.camera_position.to_array());

        if constants.lights.len() > layout.lights.len() {
            log::warn!(
                "{} lights in the scene, '{}' takes {}",
                constants.lights.len(),
                state.name(),
                layout.lights.len()
            );
        }
        let count = constants.lights.len().min(layout.lights.len());
        put(&mut data, layout.num_lights, &(count as i32).to_ne_bytes());

        for (light, slot) in constants.lights.iter().zip(&layout.lights) {
            put_vec(&mut data, slot.position, &light.position.to_array());
            put_vec(&mut data, slot.color, &light.color.to_array());
            put_vec(&mut data, slot.direction, &light.direction.to_array());
            put_vec(&mut data, slot.size, &light.size.to_array());
            put(&mut data, slot.intensity, &light.intensity.to_ne_bytes());
            put(&mut data, slot.light_type, &light.light_type.to_ne_bytes());
            put(&mut data, slot.distance_attenuation, &light.distance_attenuation.to_bytes());
            put(&mut data, slot.angle_attenuation, &light.angle_attenuation.to_bytes());
            put(&mut data, slot.shadow_map_index, &light.shadow_map_index.to_ne_bytes());
            put_mat4(&mut data, slot.view_projection, &light.view_projection);
        }

        Some(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::HeadlessBackend;
    use crate::renderer::pipeline_state::{PipelineStateManager, PBR, SHADOW_MAP};
    use crate::scene::{Light, Transform};

    fn read_i32(data: &[u8], field: FieldInfo) -> i32 {
        i32::from_ne_bytes(data[field.range()][..4].try_into().unwrap())
    }

    fn read_f32(data: &[u8], offset: usize) -> f32 {
        f32::from_ne_bytes(data[offset..offset + 4].try_into().unwrap())
    }

    fn lit_scene(light_count: usize) -> (Scene, Vec<SceneLight>) {
        let mut scene = Scene::new();
        for i in 0..light_count {
            let mut light = Light::omni(Vec3::new(1.0, 0.5, 0.25), 2.0).with_shadow();
            light.distance_attenuation = AttenCurve::linear(1.0, 5.0);
            scene.spawn_light(
                &format!("light{i:02}"),
                light,
                Transform::from_translation(Vec3::new(i as f32, 3.0, 0.0)),
            );
        }
        let lights = scene.lights();
        (scene, lights)
    }

    #[test]
    fn programs_without_the_block_pack_nothing() {
        let mut backend = HeadlessBackend::new();
        let pipelines = PipelineStateManager::load_builtin(&mut backend).unwrap();
        let (scene, lights) = lit_scene(1);
        let constants = FrameConstants::gather(&scene, &lights, &ShadowLayout::default(), 1.0);

        let mut packer = ConstantPacker::new();
        assert!(packer.pack(pipelines.require(SHADOW_MAP).unwrap(), &constants).is_none());
    }

    #[test]
    fn lights_land_at_reflected_offsets() {
        let mut backend = HeadlessBackend::new();
        let pipelines = PipelineStateManager::load_builtin(&mut backend).unwrap();
        let pbr = pipelines.require(PBR).unwrap();
        let (scene, lights) = lit_scene(2);
        let layout = ShadowLayout::assign(&lights);
        let constants = FrameConstants::gather(&scene, &lights, &layout, 1.5);

        let mut packer = ConstantPacker::new();
        let data = packer.pack(pbr, &constants).unwrap();
        packer.pack(pbr, &constants).unwrap();
        assert_eq!(packer.cached_layouts(), 1);

        let reflection = pbr.reflection();
        let block = reflection.uniform_block(FRAME_CONSTANTS_BLOCK).unwrap();
        assert_eq!(data.len(), block.size as usize);

        let field = |path: &str| reflection.field(block, path).unwrap();
        assert_eq!(read_i32(&data, field("num_lights")), 2);
        assert_eq!(read_i32(&data, field("all_lights[1].light_shadow_map_index")), 1);
        assert_eq!(read_i32(&data, field("all_lights[0].light_type")), 0);

        let position = field("all_lights[1].light_position").offset as usize;
        assert_eq!(read_f32(&data, position), 1.0);
        assert_eq!(read_f32(&data, position + 4), 3.0);

        let curve = field("all_lights[0].light_dist_atten_curve");
        assert_eq!(read_i32(&data, curve), 1);
        assert_eq!(read_f32(&data, curve.offset as usize + 8), 5.0);
    }

    #[test]
    fn excess_lights_are_dropped() {
        let mut backend = HeadlessBackend::new();
        let pipelines = PipelineStateManager::load_builtin(&mut backend).unwrap();
        let pbr = pipelines.require(PBR).unwrap();
        let (scene, lights) = lit_scene(20);
        let constants = FrameConstants::gather(&scene, &lights, &ShadowLayout::default(), 1.0);

        let data = ConstantPacker::new().pack(pbr, &constants).unwrap();
        let reflection = pbr.reflection();
        let block = reflection.uniform_block(FRAME_CONSTANTS_BLOCK).unwrap();
        let num_lights = reflection.field(block, "num_lights").unwrap();
        assert_eq!(read_i32(&data, num_lights), 16);
    }
}
