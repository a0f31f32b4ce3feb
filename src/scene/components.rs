// Components stored in the scene's hecs world.

use crate::scene::{Light, Transform};

#[derive(Debug, Clone)]
pub struct Name(pub String);

#[derive(Debug, Clone, Copy)]
pub struct TransformComponent(pub Transform);

/// A node that draws a mesh. `materials[i]` is used by index groups whose
/// `material_index` is `i`.
#[derive(Debug, Clone)]
pub struct GeometryNode {
    pub mesh: String,
    pub materials: Vec<String>,
    pub visible: bool,
}

#[derive(Debug, Clone)]
pub struct LightNode(pub Light);

/// Constant spin applied by the demo driver.
#[derive(Debug, Clone, Copy)]
pub struct Spin {
    pub axis: glam::Vec3,
    pub speed: f32,
}
