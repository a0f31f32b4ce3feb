//! Compute helpers and the BRDF lookup table.
//!
//! The table is produced by the "BRDF Integration CS" program the first time
//! a frame needs it and lives in the texture cache from then on, so it is
//! generated again only after the cache has been released.

use super::backend::{
    Command, GraphicsBackend, PixelFormat, ProgramKind, TextureDescriptor, TextureDimension,
    TextureUsage,
};
use super::error::RenderError;
use super::graphics_manager::GraphicsManager;
use super::handles::TextureHandle;
use super::pipeline_state::BRDF_INTEGRATION;

pub const BRDF_LUT_KEY: &str = "BRDF_LUT";
pub const BRDF_LUT_SIZE: u32 = 512;

/// Workgroups needed to cover `extent` invocations.
pub fn group_count(extent: [u32; 3], workgroup_size: [u32; 3]) -> [u32; 3] {
    [0, 1, 2].map(|axis| extent[axis].div_ceil(workgroup_size[axis].max(1)))
}

impl<B: GraphicsBackend> GraphicsManager<B> {
    /// Allocates a `width`x`height` float texture the bound compute program
    /// can write through storage slot `slot`. The texture is owned by the
    /// texture cache under `key`.
    pub fn generate_and_bind_texture_for_write(
        &mut self,
        key: &str,
        slot: u32,
        width: u32,
        height: u32,
    ) -> Result<TextureHandle, RenderError> {
        let texture = self.backend.create_texture(&TextureDescriptor {
            label: Some(key),
            width,
            height,
            layers: 1,
            mip_levels: 1,
            format: PixelFormat::Rgba16Float,
            dimension: TextureDimension::D2,
            usage: TextureUsage::STORAGE | TextureUsage::SAMPLED,
        })?;
        self.cache.insert(&mut self.backend, key, texture);
        self.commands
            .push(Command::BindStorageTexture { slot, texture });
        Ok(texture)
    }

    /// Runs the bound compute program over `x * y * z` invocations and makes
    /// its writes visible to everything recorded afterwards.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), RenderError> {
        if self.bound_kind() != Some(ProgramKind::Compute) {
            return Err(RenderError::NoComputeProgram);
        }
        let workgroup_size = self.bound_state_mut()?.workgroup_size();
        let [x, y, z] = group_count([x, y, z], workgroup_size);
        self.commands.push(Command::Dispatch { x, y, z });
        self.commands.push(Command::MemoryBarrier);
        Ok(())
    }

    /// The BRDF lookup table, generating it if the cache does not hold one.
    pub fn integrate_brdf(&mut self) -> Result<TextureHandle, RenderError> {
        if let Some(lut) = self.cache.get(BRDF_LUT_KEY) {
            self.frames.current_mut().context.brdf_lut = Some(lut);
            return Ok(lut);
        }

        match self.use_shader_program(BRDF_INTEGRATION) {
            Err(RenderError::MissingPipelineState(_)) => return Err(RenderError::NoComputeProgram),
            other => other?,
        }
        let lut =
            self.generate_and_bind_texture_for_write(BRDF_LUT_KEY, 0, BRDF_LUT_SIZE, BRDF_LUT_SIZE)?;
        self.dispatch(BRDF_LUT_SIZE, BRDF_LUT_SIZE, 1)?;
        self.brdf_dispatches += 1;
        self.frames.current_mut().context.brdf_lut = Some(lut);
        log::info!("Generated BRDF lookup table ({0}x{0})", BRDF_LUT_SIZE);
        Ok(lut)
    }

    /// How many times the lookup table has been generated.
    pub fn brdf_dispatch_count(&self) -> usize {
        self.brdf_dispatches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::HeadlessBackend;
    use crate::renderer::pipeline_state::PBR;
    use crate::settings::RenderSettings;

    #[test]
    fn group_count_rounds_up() {
        assert_eq!(group_count([512, 512, 1], [8, 8, 1]), [64, 64, 1]);
        assert_eq!(group_count([10, 1, 1], [8, 8, 1]), [2, 1, 1]);
        assert_eq!(group_count([4, 4, 4], [0, 1, 1]), [4, 4, 4]);
    }

    #[test]
    fn dispatch_needs_a_compute_program() {
        let mut manager =
            GraphicsManager::new(HeadlessBackend::new(), RenderSettings::default()).unwrap();
        assert!(matches!(
            manager.dispatch(1, 1, 1),
            Err(RenderError::NoComputeProgram)
        ));
        manager.use_shader_program(PBR).unwrap();
        assert!(matches!(
            manager.dispatch(1, 1, 1),
            Err(RenderError::NoComputeProgram)
        ));
    }

    #[test]
    fn lookup_table_is_generated_once() {
        let mut manager =
            GraphicsManager::new(HeadlessBackend::new(), RenderSettings::default()).unwrap();
        let first = manager.integrate_brdf().unwrap();
        let second = manager.integrate_brdf().unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.brdf_dispatch_count(), 1);
        assert_eq!(manager.pending_commands().dispatch_count(), 1);
        assert!(manager
            .pending_commands()
            .iter()
            .any(|c| *c == Command::Dispatch { x: 64, y: 64, z: 1 }));
    }
}
