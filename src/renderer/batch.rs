//! Draw batches: one indexed draw with everything needed to issue it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::scene::{Material, NodeRef, PrimitiveType, Scene};

use super::backend::{
    BackendCapabilities, BufferDescriptor, BufferUsage, GraphicsBackend, IndexFormat, Topology,
    VertexArrayDescriptor, VertexAttribute, VertexFormat,
};
use super::error::RenderError;
use super::geometry::{resolve_material_textures, upload_mesh, MaterialTextures, UploadedMesh};
use super::handles::{BufferHandle, VertexArrayHandle};
use super::resources::ResourceRegistry;
use super::texture_cache::TextureCache;

#[derive(Clone, Debug)]
pub struct DrawBatch {
    pub vertex_array: VertexArrayHandle,
    pub index_buffer: BufferHandle,
    pub topology: Topology,
    pub index_count: u32,
    pub index_format: IndexFormat,
    /// Checked against the scene before every draw.
    pub node: NodeRef,
    pub material: Arc<Material>,
    pub textures: MaterialTextures,
}

/// Topology a backend draws `primitive` with, if it can draw it at all.
pub fn topology_for(primitive: PrimitiveType, capabilities: BackendCapabilities) -> Option<Topology> {
    match primitive {
        PrimitiveType::PointList => Some(Topology::PointList),
        PrimitiveType::LineList => Some(Topology::LineList),
        PrimitiveType::LineStrip => Some(Topology::LineStrip),
        PrimitiveType::TriangleList => Some(Topology::TriangleList),
        PrimitiveType::TriangleStrip => Some(Topology::TriangleStrip),
        PrimitiveType::TriangleFan => capabilities.triangle_fans.then_some(Topology::TriangleFan),
        PrimitiveType::QuadList | PrimitiveType::Polygon | PrimitiveType::Patch => None,
    }
}

/// Uploads the geometry of every visible node and returns one batch per
/// drawable index group, in node order.
///
/// Meshes shared between nodes are uploaded once. Nodes whose mesh is not
/// loaded yet are skipped, as are primitive types the backend cannot draw.
pub fn build_scene_batches<B: GraphicsBackend>(
    backend: &mut B,
    scene: &Scene,
    cache: &mut TextureCache,
    registry: &mut ResourceRegistry,
) -> Result<Vec<DrawBatch>, RenderError> {
    let capabilities = backend.capabilities();
    let fallback = Arc::new(Material::default());
    let mut meshes: HashMap<String, UploadedMesh> = HashMap::new();
    let mut materials: HashMap<String, (Arc<Material>, MaterialTextures)> = HashMap::new();
    let mut batches = Vec::new();

    for (node, geometry) in scene.visible_geometry() {
        let Some(mesh) = scene.mesh(&geometry.mesh) else {
            log::debug!("Mesh '{}' is not loaded, skipping node", geometry.mesh);
            continue;
        };
        let Some(topology) = topology_for(mesh.primitive_type, capabilities) else {
            log::warn!(
                "Mesh '{}': {:?} cannot be drawn, skipping",
                mesh.name,
                mesh.primitive_type
            );
            continue;
        };

        let uploaded = match meshes.get(&geometry.mesh) {
            Some(uploaded) => uploaded.clone(),
            None => {
                let uploaded = upload_mesh(backend, &mesh, registry)?;
                meshes.insert(geometry.mesh.clone(), uploaded.clone());
                uploaded
            }
        };

        for group in &uploaded.index_groups {
            let (material, textures) = match geometry.materials.get(group.material_index) {
                Some(key) => match materials.get(key) {
                    Some(resolved) => resolved.clone(),
                    None => {
                        let material = scene.material(key).unwrap_or_else(|| {
                            log::warn!("Material '{}' is missing, using the default", key);
                            Arc::clone(&fallback)
                        });
                        let textures = resolve_material_textures(backend, cache, &material)?;
                        materials.insert(key.clone(), (Arc::clone(&material), textures));
                        (material, textures)
                    }
                },
                None => (Arc::clone(&fallback), MaterialTextures::default()),
            };

            batches.push(DrawBatch {
                vertex_array: uploaded.vertex_array,
                index_buffer: group.buffer,
                topology,
                index_count: group.count,
                index_format: group.format,
                node,
                material,
                textures,
            });
        }
    }

    log::info!(
        "Built {} draw batches from {} meshes",
        batches.len(),
        meshes.len()
    );
    Ok(batches)
}

const SKYBOX_VERTICES: [f32; 24] = [
    -1.0, 1.0, 1.0, //
    -1.0, -1.0, 1.0, //
    1.0, -1.0, 1.0, //
    1.0, 1.0, 1.0, //
    -1.0, 1.0, -1.0, //
    -1.0, -1.0, -1.0, //
    1.0, -1.0, -1.0, //
    1.0, 1.0, -1.0, //
];

const SKYBOX_INDICES: [u16; 36] = [
    4, 5, 7, 7, 5, 6, // back
    0, 3, 1, 3, 2, 1, // front
    0, 1, 4, 4, 1, 5, // left
    3, 7, 2, 7, 6, 2, // right
    0, 4, 3, 3, 4, 7, // top
    1, 2, 5, 5, 2, 6, // bottom
];

/// The unit cube the skybox is drawn with. Lives outside the frame ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SkyboxGeometry {
    pub vertex_array: VertexArrayHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
}

impl SkyboxGeometry {
    pub fn upload<B: GraphicsBackend>(
        backend: &mut B,
        registry: &mut ResourceRegistry,
    ) -> Result<Self, RenderError> {
        let vertices = backend.create_buffer(&BufferDescriptor {
            label: Some("skybox vertices"),
            usage: BufferUsage::Vertex,
            contents: bytemuck::cast_slice(&SKYBOX_VERTICES),
        })?;
        registry.track_buffer(vertices);
        let index_buffer = backend.create_buffer(&BufferDescriptor {
            label: Some("skybox indices"),
            usage: BufferUsage::Index(IndexFormat::U16),
            contents: bytemuck::cast_slice(&SKYBOX_INDICES),
        })?;
        registry.track_buffer(index_buffer);
        let vertex_array = backend.create_vertex_array(&VertexArrayDescriptor {
            label: Some("skybox"),
            attributes: &[VertexAttribute {
                location: 0,
                buffer: vertices,
                format: VertexFormat::Float32x3,
            }],
        })?;
        registry.track_vertex_array(vertex_array);

        Ok(Self {
            vertex_array,
            index_buffer,
            index_count: SKYBOX_INDICES.len() as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::HeadlessBackend;
    use crate::scene::{IndexGroup, Mesh, Transform, VertexDataType, VertexStream};

    fn quad_mesh(primitive: PrimitiveType) -> Mesh {
        Mesh::new("quad", primitive)
            .with_stream(VertexStream::from_f32(
                "position",
                VertexDataType::Float3,
                &[0.0; 12],
            ))
            .with_index_group(IndexGroup::from_u16(0, &[0, 1, 2]))
            .with_index_group(IndexGroup::from_u32(1, &[0, 2, 3]))
    }

    #[test]
    fn fans_depend_on_the_backend() {
        let mut capabilities = BackendCapabilities::default();
        assert_eq!(topology_for(PrimitiveType::TriangleFan, capabilities), None);
        capabilities.triangle_fans = true;
        assert_eq!(
            topology_for(PrimitiveType::TriangleFan, capabilities),
            Some(Topology::TriangleFan)
        );
        assert_eq!(topology_for(PrimitiveType::QuadList, capabilities), None);
    }

    #[test]
    fn shared_meshes_upload_once() {
        let mut backend = HeadlessBackend::new();
        let mut cache = TextureCache::new();
        let mut registry = ResourceRegistry::new();
        let mut scene = Scene::new();
        scene.add_mesh("quad", quad_mesh(PrimitiveType::TriangleList));
        scene.add_material("red", Material::new("red"));
        scene.spawn_geometry("a", "quad", &["red"], Transform::default());
        scene.spawn_geometry("b", "quad", &["red", "blue"], Transform::default());

        let batches = build_scene_batches(&mut backend, &scene, &mut cache, &mut registry).unwrap();
        assert_eq!(batches.len(), 4);
        assert_eq!(backend.stats().vertex_arrays_created, 1);
        assert_eq!(batches[0].vertex_array, batches[2].vertex_array);
        assert_eq!(batches[0].material.name, "red");
        // "a" has no second material, "b" names one that does not exist
        assert_eq!(batches[1].material.name, "default");
        assert_eq!(batches[3].material.name, "default");
    }

    #[test]
    fn unloaded_and_undrawable_meshes_are_skipped() {
        let mut backend = HeadlessBackend::new();
        let mut cache = TextureCache::new();
        let mut registry = ResourceRegistry::new();
        let mut scene = Scene::new();
        scene.add_mesh("quads", quad_mesh(PrimitiveType::QuadList));
        scene.add_mesh("tris", quad_mesh(PrimitiveType::TriangleStrip));
        scene.spawn_geometry("pending", "not yet loaded", &[], Transform::default());
        scene.spawn_geometry("quads", "quads", &[], Transform::default());
        scene.spawn_geometry("tris", "tris", &[], Transform::default());

        let batches = build_scene_batches(&mut backend, &scene, &mut cache, &mut registry).unwrap();
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.topology == Topology::TriangleStrip));
    }

    #[test]
    fn skybox_cube_has_thirty_six_indices() {
        let mut backend = HeadlessBackend::new();
        let mut registry = ResourceRegistry::new();
        let skybox = SkyboxGeometry::upload(&mut backend, &mut registry).unwrap();
        assert_eq!(skybox.index_count, 36);
        assert!(SKYBOX_INDICES.iter().all(|&i| i < 8));
        assert_eq!(registry.buffer_count(), 2);
    }
}
