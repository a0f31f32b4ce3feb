use std::sync::Arc;

use super::image::Image;
use super::SceneError;

/// Faces 0..6 are the skybox, 6..12 the irradiance map and 12..66 the nine
/// radiance mip levels.
pub const SKYBOX_FACE_COUNT: usize = 66;
pub const SKYBOX_CUBES: u32 = 2;
pub const SKYBOX_MIP_LEVELS: u32 = 9;

#[derive(Clone, Debug)]
pub struct SkyBox {
    faces: Vec<Arc<Image>>,
}

impl SkyBox {
    pub fn new(faces: Vec<Image>) -> Result<Self, SceneError> {
        if faces.len() != SKYBOX_FACE_COUNT {
            return Err(SceneError::SkyBoxFaceCount(faces.len()));
        }
        Ok(Self {
            faces: faces.into_iter().map(Arc::new).collect(),
        })
    }

    /// Builds an environment where every face of every level is one colour.
    pub fn solid(base_size: u32, sky: [u8; 4], irradiance: [u8; 4]) -> Self {
        let faces = (0..SKYBOX_FACE_COUNT)
            .map(|face| {
                let (level, layer) = face_location(face);
                let size = (base_size >> level).max(1);
                let color = if layer < 6 && face >= 6 { irradiance } else { sky };
                Arc::new(Image::solid_rgba(size, size, color))
            })
            .collect();
        Self { faces }
    }

    pub fn face(&self, index: usize) -> Option<&Image> {
        self.faces.get(index).map(|face| face.as_ref())
    }

    pub fn faces(&self) -> impl Iterator<Item = &Image> {
        self.faces.iter().map(|face| face.as_ref())
    }
}

/// (mip level, array layer) a face lands in inside the two-cube array.
pub fn face_location(face: usize) -> (u32, u32) {
    let face = face as u32;
    if face < 12 {
        (face / 6, face % 6)
    } else {
        ((face - 12) / 6, face % 6 + 6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_locations_cover_both_cubes() {
        assert_eq!(face_location(0), (0, 0));
        assert_eq!(face_location(7), (1, 1));
        assert_eq!(face_location(12), (0, 6));
        assert_eq!(face_location(17), (0, 11));
        assert_eq!(face_location(65), (8, 11));
    }

    #[test]
    fn wrong_face_count_is_rejected() {
        let faces = vec![Image::solid_rgba(1, 1, [0; 4]); 6];
        assert!(matches!(
            SkyBox::new(faces),
            Err(SceneError::SkyBoxFaceCount(6))
        ));
    }

    #[test]
    fn solid_faces_shrink_per_level() {
        let skybox = SkyBox::solid(64, [0; 4], [1; 4]);
        assert_eq!(skybox.face(0).map(|f| f.width), Some(64));
        assert_eq!(skybox.face(65).map(|f| f.width), Some(1));
        assert_eq!(skybox.face(20).map(|f| f.width), Some(32));
    }
}
