use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use glam::{Mat4, Quat, Vec3, Vec4};
use hecs::{Entity, World};

use super::components::{GeometryNode, LightNode, Name, Spin, TransformComponent};
use super::{Camera, Light, Material, Mesh, SkyBox, Transform};

/// Back-reference from render data to a scene node. The entity generation
/// makes stale references detectable: lookups on a despawned node fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef(Entity);

impl NodeRef {
    pub fn entity(self) -> Entity {
        self.0
    }
}

#[derive(Clone, Debug)]
pub struct SceneLight {
    pub node: NodeRef,
    pub name: String,
    pub light: Light,
    pub transform: Mat4,
}

impl SceneLight {
    pub fn position(&self) -> Vec4 {
        self.transform * Vec4::new(0.0, 0.0, 0.0, 1.0)
    }

    pub fn direction(&self) -> Vec4 {
        self.transform * Vec4::new(0.0, 0.0, -1.0, 0.0)
    }
}

pub struct Scene {
    pub world: World,
    geometry_nodes: BTreeMap<String, Entity>,
    light_nodes: BTreeMap<String, Entity>,
    meshes: HashMap<String, Arc<Mesh>>,
    materials: HashMap<String, Arc<Material>>,
    camera: Camera,
    ambient: Vec3,
    skybox: Option<SkyBox>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            world: World::new(),
            geometry_nodes: BTreeMap::new(),
            light_nodes: BTreeMap::new(),
            meshes: HashMap::new(),
            materials: HashMap::new(),
            camera: Camera::default(),
            ambient: Vec3::splat(0.03),
            skybox: None,
        }
    }

    pub fn add_mesh(&mut self, key: &str, mesh: Mesh) {
        self.meshes.insert(key.to_string(), Arc::new(mesh));
    }

    pub fn add_material(&mut self, key: &str, material: Material) {
        self.materials.insert(key.to_string(), Arc::new(material));
    }

    pub fn mesh(&self, key: &str) -> Option<Arc<Mesh>> {
        self.meshes.get(key).cloned()
    }

    pub fn material(&self, key: &str) -> Option<Arc<Material>> {
        self.materials.get(key).cloned()
    }

    pub fn spawn_geometry(
        &mut self,
        name: &str,
        mesh: &str,
        materials: &[&str],
        transform: Transform,
    ) -> NodeRef {
        let entity = self.world.spawn((
            Name(name.to_string()),
            TransformComponent(transform),
            GeometryNode {
                mesh: mesh.to_string(),
                materials: materials.iter().map(|m| m.to_string()).collect(),
                visible: true,
            },
        ));
        if let Some(previous) = self.geometry_nodes.insert(name.to_string(), entity) {
            log::warn!("Geometry node '{}' replaced", name);
            let _ = self.world.despawn(previous);
        }
        NodeRef(entity)
    }

    pub fn spawn_light(&mut self, name: &str, light: Light, transform: Transform) -> NodeRef {
        let entity = self.world.spawn((
            Name(name.to_string()),
            TransformComponent(transform),
            LightNode(light),
        ));
        if let Some(previous) = self.light_nodes.insert(name.to_string(), entity) {
            log::warn!("Light node '{}' replaced", name);
            let _ = self.world.despawn(previous);
        }
        NodeRef(entity)
    }

    pub fn add_spin(&mut self, node: NodeRef, axis: Vec3, speed: f32) {
        let _ = self.world.insert_one(node.0, Spin { axis, speed });
    }

    /// Removes a node by name. Batches still pointing at it stop drawing.
    pub fn despawn(&mut self, name: &str) -> bool {
        let entity = self
            .geometry_nodes
            .remove(name)
            .or_else(|| self.light_nodes.remove(name));
        match entity {
            Some(entity) => self.world.despawn(entity).is_ok(),
            None => false,
        }
    }

    pub fn set_visible(&mut self, node: NodeRef, visible: bool) {
        if let Ok(mut geometry) = self.world.get::<&mut GeometryNode>(node.0) {
            geometry.visible = visible;
        }
    }

    pub fn set_transform(&mut self, node: NodeRef, transform: Transform) {
        if let Ok(mut current) = self.world.get::<&mut TransformComponent>(node.0) {
            current.0 = transform;
        }
    }

    /// World matrix of `node`, or `None` if the node no longer exists.
    pub fn node_transform(&self, node: NodeRef) -> Option<Mat4> {
        self.world
            .get::<&TransformComponent>(node.0)
            .ok()
            .map(|transform| transform.0.matrix())
    }

    /// Visible geometry nodes in name order.
    pub fn visible_geometry(&self) -> Vec<(NodeRef, GeometryNode)> {
        self.geometry_nodes
            .values()
            .filter_map(|&entity| {
                let geometry = self.world.get::<&GeometryNode>(entity).ok()?;
                geometry
                    .visible
                    .then(|| (NodeRef(entity), (*geometry).clone()))
            })
            .collect()
    }

    /// Lights in name order with their world transforms.
    pub fn lights(&self) -> Vec<SceneLight> {
        self.light_nodes
            .iter()
            .filter_map(|(name, &entity)| {
                let light = self.world.get::<&LightNode>(entity).ok()?;
                let transform = self.world.get::<&TransformComponent>(entity).ok()?;
                Some(SceneLight {
                    node: NodeRef(entity),
                    name: name.clone(),
                    light: light.0.clone(),
                    transform: transform.0.matrix(),
                })
            })
            .collect()
    }

    pub fn advance(&mut self, delta_seconds: f32) {
        for (_, (transform, spin)) in self
            .world
            .query_mut::<(&mut TransformComponent, &Spin)>()
        {
            let step = Quat::from_axis_angle(spin.axis, spin.speed * delta_seconds);
            transform.0.rotation = (step * transform.0.rotation).normalize();
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn ambient(&self) -> Vec3 {
        self.ambient
    }

    pub fn set_ambient(&mut self, ambient: Vec3) {
        self.ambient = ambient;
    }

    pub fn skybox(&self) -> Option<&SkyBox> {
        self.skybox.as_ref()
    }

    pub fn set_skybox(&mut self, skybox: SkyBox) {
        self.skybox = Some(skybox);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{LightType, PrimitiveType};

    #[test]
    fn despawned_nodes_fail_the_validity_check() {
        let mut scene = Scene::new();
        scene.add_mesh("tri", Mesh::new("tri", PrimitiveType::TriangleList));
        let node = scene.spawn_geometry("a", "tri", &[], Transform::default());
        assert!(scene.node_transform(node).is_some());

        assert!(scene.despawn("a"));
        assert!(scene.node_transform(node).is_none());

        let replacement = scene.spawn_geometry("b", "tri", &[], Transform::default());
        assert_ne!(node, replacement);
        assert!(scene.node_transform(node).is_none());
    }

    #[test]
    fn hidden_nodes_are_not_iterated() {
        let mut scene = Scene::new();
        let shown = scene.spawn_geometry("b", "m", &[], Transform::default());
        let hidden = scene.spawn_geometry("a", "m", &[], Transform::default());
        scene.set_visible(hidden, false);

        let visible: Vec<_> = scene.visible_geometry().into_iter().map(|(n, _)| n).collect();
        assert_eq!(visible, vec![shown]);
    }

    #[test]
    fn light_direction_follows_transform() {
        let mut scene = Scene::new();
        scene.spawn_light(
            "sun",
            Light::new(LightType::Infinity),
            Transform::from_translation(Vec3::new(0.0, 10.0, 0.0)).looking_at(Vec3::ZERO),
        );
        let lights = scene.lights();
        assert_eq!(lights.len(), 1);
        assert!(lights[0].direction().truncate().abs_diff_eq(Vec3::NEG_Y, 1e-5));
        assert!(lights[0].position().truncate().abs_diff_eq(Vec3::new(0.0, 10.0, 0.0), 1e-5));
    }
}
