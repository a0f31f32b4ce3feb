// scene/mod.rs

pub mod camera;
pub mod components;
pub mod image;
pub mod light;
pub mod material;
pub mod mesh;
pub mod primitives;
pub mod scene;
pub mod skybox;
pub mod transform;

pub use camera::Camera;
pub use image::Image;
pub use light::{AttenCurve, AttenCurveType, Light, LightType};
pub use material::{Material, MaterialChannel, Parameter, TextureRef};
pub use mesh::{IndexGroup, IndexType, Mesh, PrimitiveType, VertexDataType, VertexStream};
pub use scene::{NodeRef, Scene, SceneLight};
pub use skybox::SkyBox;
pub use transform::Transform;

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("a skybox needs 66 faces, got {0}")]
    SkyBoxFaceCount(usize),
    #[error(transparent)]
    Image(#[from] ::image::ImageError),
}
