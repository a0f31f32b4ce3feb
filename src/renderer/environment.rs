//! The skybox: its cube-array upload and its draw.

use crate::scene::skybox::{face_location, SKYBOX_CUBES, SKYBOX_MIP_LEVELS};
use crate::scene::SkyBox;

use super::backend::{
    Command, CullMode, DepthCompare, GraphicsBackend, IndexFormat, TextureDescriptor,
    TextureDimension, TextureRegion, TextureUsage, Topology,
};
use super::error::RenderError;
use super::graphics_manager::GraphicsManager;
use super::handles::TextureHandle;
use super::pipeline_state::SKYBOX;
use super::texture_cache::{infer_format, texel_rows};

/// Uploads the 66 faces of `skybox` into one cube array of two cubes: the
/// sky with its irradiance in cube 0 and the radiance mips in cube 1.
pub fn upload_skybox<B: GraphicsBackend>(
    backend: &mut B,
    skybox: &SkyBox,
) -> Result<TextureHandle, RenderError> {
    let base = skybox
        .face(0)
        .ok_or_else(|| RenderError::allocation("skybox", "no faces"))?;
    let format = infer_format(base.bitcount);
    let texture = backend.create_texture(&TextureDescriptor {
        label: Some("skybox"),
        width: base.width,
        height: base.height,
        layers: SKYBOX_CUBES * 6,
        mip_levels: SKYBOX_MIP_LEVELS,
        format,
        dimension: TextureDimension::CubeArray,
        usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST,
    })?;

    for (index, face) in skybox.faces().enumerate() {
        let (mip_level, layer) = face_location(index);
        let region = TextureRegion {
            mip_level,
            layer,
            width: face.width,
            height: face.height,
        };
        if let Err(err) = backend.write_texture(texture, region, &texel_rows(face, format)) {
            backend.release_texture(texture);
            return Err(err);
        }
    }

    log::info!(
        "Uploaded skybox ({}x{}, {} cubes, {} levels, {:?})",
        base.width,
        base.height,
        SKYBOX_CUBES,
        SKYBOX_MIP_LEVELS,
        format
    );
    Ok(texture)
}

impl<B: GraphicsBackend> GraphicsManager<B> {
    /// Draws the skybox cube behind everything already in the depth buffer.
    /// Does nothing when the scene has no skybox.
    pub fn draw_skybox(&mut self) -> Result<(), RenderError> {
        let (Some(geometry), Some(texture)) = (self.skybox, self.frames.current().context.skybox)
        else {
            return Ok(());
        };

        self.use_shader_program(SKYBOX)?;
        self.bind_texture("skybox", Some(texture));
        self.commands.push(Command::SetDepthCompare(DepthCompare::LessEqual));
        self.commands.push(Command::SetCullMode(CullMode::None));
        self.commands.push(Command::DrawIndexed {
            vertex_array: geometry.vertex_array,
            index_buffer: geometry.index_buffer,
            topology: Topology::TriangleList,
            index_format: IndexFormat::U16,
            index_count: geometry.index_count,
        });
        self.commands.push(Command::SetDepthCompare(DepthCompare::Less));
        self.commands.push(Command::SetCullMode(CullMode::Back));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::{HeadlessBackend, PixelFormat};
    use crate::scene::Image;

    #[test]
    fn every_face_is_written_once() {
        let mut backend = HeadlessBackend::new();
        let skybox = SkyBox::solid(256, [10, 20, 30, 255], [1, 2, 3, 255]);

        let texture = upload_skybox(&mut backend, &skybox).unwrap();
        let uploaded = backend.texture(texture).unwrap();
        assert_eq!(uploaded.writes, 66);
        assert_eq!(uploaded.layers, 12);
        assert_eq!(uploaded.mip_levels, 9);
        assert_eq!(uploaded.format, PixelFormat::Rgba8);
        assert_eq!(uploaded.dimension, TextureDimension::CubeArray);
    }

    #[test]
    fn truncated_faces_release_the_texture() {
        let mut backend = HeadlessBackend::new();
        let mut faces: Vec<Image> = SkyBox::solid(4, [0; 4], [0; 4]).faces().cloned().collect();
        faces[30] = Image::new(4, 4, 32, vec![0; 3]);
        let skybox = SkyBox::new(faces).unwrap();

        assert!(upload_skybox(&mut backend, &skybox).is_err());
        assert_eq!(backend.live_textures(), 0);
    }
}
