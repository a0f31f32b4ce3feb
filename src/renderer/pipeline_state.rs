//! Named shader programs and their loose parameters.
//!
//! Every pass looks its program up by a fixed name. A [`PipelineState`]
//! carries the program handle, its reflection and a CPU copy of the
//! program's `params` block; draws snapshot that copy into the command list.

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3, Vec4};

use super::backend::{GraphicsBackend, ProgramDescriptor, ProgramKind};
use super::error::RenderError;
use super::handles::ProgramHandle;
use super::reflection::{ShaderReflection, Stage, PARAMS_BLOCK};

pub const BRDF_INTEGRATION: &str = "BRDF Integration CS";
pub const SHADOW_MAP: &str = "Shadow Map";
pub const OMNI_SHADOW_MAP: &str = "Omni Shadow Map";
pub const PBR: &str = "PBR";
pub const SKYBOX: &str = "SkyBox";
pub const DEBUG: &str = "Debug";
pub const TEXTURE_OVERLAY: &str = "Texture Overlay";
pub const TEXTURE_ARRAY_OVERLAY: &str = "Texture Array Overlay";
pub const CUBE_MAP_ARRAY_OVERLAY: &str = "CubeMap Array Overlay";

struct BuiltinProgram {
    name: &'static str,
    kind: ProgramKind,
    source: &'static str,
}

const BUILTIN_PROGRAMS: &[BuiltinProgram] = &[
    BuiltinProgram {
        name: BRDF_INTEGRATION,
        kind: ProgramKind::Compute,
        source: include_str!("../shader/brdf_lut.wgsl"),
    },
    BuiltinProgram {
        name: SHADOW_MAP,
        kind: ProgramKind::Graphics,
        source: include_str!("../shader/shadow.wgsl"),
    },
    BuiltinProgram {
        name: OMNI_SHADOW_MAP,
        kind: ProgramKind::Graphics,
        source: include_str!("../shader/shadow_omni.wgsl"),
    },
    BuiltinProgram {
        name: PBR,
        kind: ProgramKind::Graphics,
        source: concat!(
            include_str!("../shader/frame.wgsl"),
            include_str!("../shader/pbr.wgsl")
        ),
    },
    BuiltinProgram {
        name: SKYBOX,
        kind: ProgramKind::Graphics,
        source: concat!(
            include_str!("../shader/frame.wgsl"),
            include_str!("../shader/skybox.wgsl")
        ),
    },
    BuiltinProgram {
        name: DEBUG,
        kind: ProgramKind::Graphics,
        source: concat!(
            include_str!("../shader/frame.wgsl"),
            include_str!("../shader/debug.wgsl")
        ),
    },
    BuiltinProgram {
        name: TEXTURE_OVERLAY,
        kind: ProgramKind::Graphics,
        source: include_str!("../shader/overlay.wgsl"),
    },
    BuiltinProgram {
        name: TEXTURE_ARRAY_OVERLAY,
        kind: ProgramKind::Graphics,
        source: include_str!("../shader/overlay_array.wgsl"),
    },
    BuiltinProgram {
        name: CUBE_MAP_ARRAY_OVERLAY,
        kind: ProgramKind::Graphics,
        source: include_str!("../shader/overlay_cube.wgsl"),
    },
];

/// A value for one field of a program's `params` block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ShaderValue {
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl ShaderValue {
    fn bytes(&self) -> Vec<u8> {
        match self {
            Self::Int(value) => value.to_ne_bytes().to_vec(),
            Self::Float(value) => value.to_ne_bytes().to_vec(),
            Self::Vec2(value) => bytemuck::cast_slice(&value.to_array()).to_vec(),
            Self::Vec3(value) => bytemuck::cast_slice(&value.to_array()).to_vec(),
            Self::Vec4(value) => bytemuck::cast_slice(&value.to_array()).to_vec(),
            Self::Mat4(value) => bytemuck::cast_slice(&value.to_cols_array()).to_vec(),
        }
    }
}

impl From<i32> for ShaderValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for ShaderValue {
    fn from(value: bool) -> Self {
        Self::Int(value as i32)
    }
}

impl From<f32> for ShaderValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<Vec2> for ShaderValue {
    fn from(value: Vec2) -> Self {
        Self::Vec2(value)
    }
}

impl From<Vec3> for ShaderValue {
    fn from(value: Vec3) -> Self {
        Self::Vec3(value)
    }
}

impl From<Vec4> for ShaderValue {
    fn from(value: Vec4) -> Self {
        Self::Vec4(value)
    }
}

impl From<Mat4> for ShaderValue {
    fn from(value: Mat4) -> Self {
        Self::Mat4(value)
    }
}

#[derive(Debug)]
pub struct PipelineState {
    name: String,
    program: ProgramHandle,
    kind: ProgramKind,
    reflection: Arc<ShaderReflection>,
    parameters: Vec<u8>,
}

impl PipelineState {
    pub fn new(
        name: &str,
        program: ProgramHandle,
        kind: ProgramKind,
        reflection: Arc<ShaderReflection>,
    ) -> Self {
        let size = reflection
            .uniform_block(PARAMS_BLOCK)
            .map_or(0, |block| block.size as usize);
        Self {
            name: name.to_string(),
            program,
            kind,
            reflection,
            parameters: vec![0; size],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn program(&self) -> ProgramHandle {
        self.program
    }

    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    /// Current contents of the `params` block; empty if the program has none.
    pub fn parameters(&self) -> &[u8] {
        &self.parameters
    }

    /// Writes `value` into the parameter named `name`. Returns `false` when
    /// this program does not declare it.
    pub fn set_parameter(&mut self, name: &str, value: impl Into<ShaderValue>) -> bool {
        let Some(field) = self.reflection.parameter(name) else {
            return false;
        };
        let bytes = value.into().bytes();
        let range = field.range();
        let len = bytes.len().min(range.len());
        match self.parameters.get_mut(range.start..range.start + len) {
            Some(slot) => {
                slot.copy_from_slice(&bytes[..len]);
                true
            }
            None => false,
        }
    }

    pub fn workgroup_size(&self) -> [u32; 3] {
        self.reflection
            .entry_point(Stage::Compute)
            .map_or([1, 1, 1], |entry| entry.workgroup_size)
    }
}

/// Where passes get their programs from.
pub trait PipelineStateProvider {
    fn pipeline_state(&self, name: &str) -> Option<&PipelineState>;

    fn pipeline_state_mut(&mut self, name: &str) -> Option<&mut PipelineState>;
}

#[derive(Debug, Default)]
pub struct PipelineStateManager {
    states: BTreeMap<String, PipelineState>,
}

impl PipelineStateManager {
    /// Compiles every built-in program through `backend`.
    pub fn load_builtin<B: GraphicsBackend>(backend: &mut B) -> Result<Self, RenderError> {
        let mut manager = Self::default();
        for builtin in BUILTIN_PROGRAMS {
            manager.register(backend, builtin.name, builtin.source, builtin.kind)?;
        }
        log::info!("Loaded {} pipeline states", manager.states.len());
        Ok(manager)
    }

    /// Compiles `source` and registers it under `name`, replacing and
    /// releasing any previous state of that name.
    pub fn register<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        name: &str,
        source: &str,
        kind: ProgramKind,
    ) -> Result<(), RenderError> {
        let reflection = Arc::new(ShaderReflection::from_wgsl(name, source)?);
        let program = backend.create_program(&ProgramDescriptor {
            name,
            source,
            kind,
            reflection: Arc::clone(&reflection),
        })?;
        log::debug!("Registered pipeline state '{}' ({:?})", name, kind);

        let state = PipelineState::new(name, program, kind, reflection);
        if let Some(previous) = self.states.insert(name.to_string(), state) {
            backend.release_program(previous.program);
        }
        Ok(())
    }

    pub fn require(&self, name: &str) -> Result<&PipelineState, RenderError> {
        self.states
            .get(name)
            .ok_or_else(|| RenderError::MissingPipelineState(name.to_string()))
    }

    pub fn require_mut(&mut self, name: &str) -> Result<&mut PipelineState, RenderError> {
        self.states
            .get_mut(name)
            .ok_or_else(|| RenderError::MissingPipelineState(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    pub fn release_all<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for (_, state) in std::mem::take(&mut self.states) {
            backend.release_program(state.program);
        }
    }
}

impl PipelineStateProvider for PipelineStateManager {
    fn pipeline_state(&self, name: &str) -> Option<&PipelineState> {
        self.states.get(name)
    }

    fn pipeline_state_mut(&mut self, name: &str) -> Option<&mut PipelineState> {
        self.states.get_mut(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::HeadlessBackend;

    #[test]
    fn builtin_programs_all_register() {
        let mut backend = HeadlessBackend::new();
        let manager = PipelineStateManager::load_builtin(&mut backend).unwrap();
        assert_eq!(manager.len(), BUILTIN_PROGRAMS.len());
        for name in [
            BRDF_INTEGRATION,
            SHADOW_MAP,
            OMNI_SHADOW_MAP,
            PBR,
            SKYBOX,
            DEBUG,
            TEXTURE_OVERLAY,
            TEXTURE_ARRAY_OVERLAY,
            CUBE_MAP_ARRAY_OVERLAY,
        ] {
            assert!(manager.pipeline_state(name).is_some(), "{name} missing");
        }
        assert_eq!(
            manager.require(BRDF_INTEGRATION).unwrap().workgroup_size(),
            [8, 8, 1]
        );
        assert!(matches!(
            manager.require("Terrain"),
            Err(RenderError::MissingPipelineState(_))
        ));
    }

    #[test]
    fn parameters_land_at_reflected_offsets() {
        let mut backend = HeadlessBackend::new();
        let mut manager = PipelineStateManager::load_builtin(&mut backend).unwrap();
        let state = manager.pipeline_state_mut(OMNI_SHADOW_MAP).unwrap();

        let far = state.reflection().parameter("far_plane").unwrap();
        assert!(state.set_parameter("far_plane", 25.0f32));
        assert_eq!(&state.parameters()[far.range()], &25.0f32.to_ne_bytes());

        let second = state.reflection().parameter("shadow_matrices[1]").unwrap();
        assert!(state.set_parameter("shadow_matrices[1]", Mat4::from_scale(Vec3::splat(3.0))));
        assert_eq!(
            f32::from_ne_bytes(state.parameters()[second.offset as usize..][..4].try_into().unwrap()),
            3.0
        );

        assert!(!state.set_parameter("diffuse_color", Vec4::ONE));
    }

    #[test]
    fn reregistering_releases_the_old_program() {
        let mut backend = HeadlessBackend::new();
        let mut manager = PipelineStateManager::default();
        let source = include_str!("../shader/shadow.wgsl");
        manager
            .register(&mut backend, SHADOW_MAP, source, ProgramKind::Graphics)
            .unwrap();
        manager
            .register(&mut backend, SHADOW_MAP, source, ProgramKind::Graphics)
            .unwrap();
        assert_eq!(manager.len(), 1);
        assert_eq!(backend.stats().released, 1);

        manager.release_all(&mut backend);
        assert!(manager.is_empty());
        assert_eq!(backend.stats().released, 2);
    }
}
