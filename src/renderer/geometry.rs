//! Scene meshes and material maps turned into GPU objects.

use crate::scene::{IndexType, Material, MaterialChannel, Mesh, PrimitiveType, VertexDataType};

use super::backend::{
    BufferDescriptor, BufferUsage, GraphicsBackend, IndexFormat, VertexArrayDescriptor,
    VertexAttribute, VertexFormat,
};
use super::error::RenderError;
use super::handles::{BufferHandle, TextureHandle, VertexArrayHandle};
use super::resources::ResourceRegistry;
use super::texture_cache::TextureCache;

/// Shader input location reserved for a vertex stream name.
pub fn semantic_location(attribute: &str) -> Option<u32> {
    match attribute.to_ascii_lowercase().as_str() {
        "position" | "positions" => Some(0),
        "normal" | "normals" => Some(1),
        "uv" | "uvs" | "texcoord" | "texcoords" | "texcoord0" => Some(2),
        "tangent" | "tangents" => Some(3),
        _ => None,
    }
}

/// One distinct shader input location per stream, in stream order.
///
/// Named streams take their reserved slot. Other streams keep their index in
/// the mesh unless that slot is reserved or taken, in which case they move to
/// the lowest free one.
pub fn attribute_locations<'a, I>(attributes: I) -> Vec<u32>
where
    I: IntoIterator<Item = &'a str>,
{
    let wanted: Vec<Option<u32>> = attributes.into_iter().map(semantic_location).collect();
    let mut taken: Vec<u32> = Vec::with_capacity(wanted.len());
    let mut locations = vec![0; wanted.len()];
    let mut pending = Vec::new();

    for (index, slot) in wanted.iter().enumerate() {
        match slot {
            Some(slot) if !taken.contains(slot) => {
                taken.push(*slot);
                locations[index] = *slot;
            }
            _ => pending.push(index),
        }
    }
    let reserved = [0, 1, 2, 3];
    for index in pending {
        let preferred = index as u32;
        let location = if wanted[index].is_none()
            && !reserved.contains(&preferred)
            && !taken.contains(&preferred)
        {
            preferred
        } else {
            (0..)
                .find(|slot| !reserved.contains(slot) && !taken.contains(slot))
                .unwrap_or(preferred)
        };
        taken.push(location);
        locations[index] = location;
    }
    locations
}

pub fn vertex_format(data_type: VertexDataType) -> VertexFormat {
    match data_type {
        VertexDataType::Float1 => VertexFormat::Float32,
        VertexDataType::Float2 => VertexFormat::Float32x2,
        VertexDataType::Float3 => VertexFormat::Float32x3,
        VertexDataType::Float4 => VertexFormat::Float32x4,
        VertexDataType::Double1 => VertexFormat::Float64,
        VertexDataType::Double2 => VertexFormat::Float64x2,
        VertexDataType::Double3 => VertexFormat::Float64x3,
        VertexDataType::Double4 => VertexFormat::Float64x4,
    }
}

/// `None` for widths no backend can index with.
pub fn index_format(index_type: IndexType) -> Option<IndexFormat> {
    match index_type {
        IndexType::Int8 => Some(IndexFormat::U8),
        IndexType::Int16 => Some(IndexFormat::U16),
        IndexType::Int32 => Some(IndexFormat::U32),
        IndexType::Int64 => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadedIndexGroup {
    /// Position of the group inside the source mesh.
    pub group: usize,
    pub buffer: BufferHandle,
    pub format: IndexFormat,
    pub count: u32,
    pub material_index: usize,
}

#[derive(Clone, Debug)]
pub struct UploadedMesh {
    pub primitive_type: PrimitiveType,
    pub vertex_array: VertexArrayHandle,
    pub vertex_buffers: Vec<BufferHandle>,
    pub index_groups: Vec<UploadedIndexGroup>,
}

/// Uploads every vertex stream and every drawable index group of `mesh`.
///
/// 64-bit vertex data is refused up front on backends without native
/// support. Index groups of an unknown width are skipped with a warning.
pub fn upload_mesh<B: GraphicsBackend>(
    backend: &mut B,
    mesh: &Mesh,
    registry: &mut ResourceRegistry,
) -> Result<UploadedMesh, RenderError> {
    let capabilities = backend.capabilities();
    if let Some(stream) = mesh
        .vertex_streams
        .iter()
        .find(|stream| stream.data_type.is_double() && !capabilities.double_vertex_attributes)
    {
        return Err(RenderError::UnsupportedVertexType(stream.data_type));
    }

    let locations =
        attribute_locations(mesh.vertex_streams.iter().map(|stream| stream.attribute.as_str()));
    let mut vertex_buffers = Vec::with_capacity(mesh.vertex_streams.len());
    let mut attributes = Vec::with_capacity(mesh.vertex_streams.len());
    for (stream, location) in mesh.vertex_streams.iter().zip(locations) {
        if stream.data.is_empty() {
            log::warn!("Mesh '{}': stream '{}' is empty", mesh.name, stream.attribute);
            continue;
        }
        let buffer = backend.create_buffer(&BufferDescriptor {
            label: Some(&stream.attribute),
            usage: BufferUsage::Vertex,
            contents: &stream.data,
        })?;
        registry.track_buffer(buffer);
        vertex_buffers.push(buffer);
        attributes.push(VertexAttribute {
            location,
            buffer,
            format: vertex_format(stream.data_type),
        });
    }

    let vertex_array = backend.create_vertex_array(&VertexArrayDescriptor {
        label: Some(&mesh.name),
        attributes: &attributes,
    })?;
    registry.track_vertex_array(vertex_array);

    let mut index_groups = Vec::with_capacity(mesh.index_groups.len());
    for (group, indices) in mesh.index_groups.iter().enumerate() {
        let Some(format) = index_format(indices.index_type) else {
            log::warn!(
                "Mesh '{}': index group {} uses {:?} indices, skipping",
                mesh.name,
                group,
                indices.index_type
            );
            continue;
        };
        if indices.data.is_empty() {
            log::warn!("Mesh '{}': index group {} is empty", mesh.name, group);
            continue;
        }
        let buffer = backend.create_buffer(&BufferDescriptor {
            label: Some(&mesh.name),
            usage: BufferUsage::Index(format),
            contents: &indices.data,
        })?;
        registry.track_buffer(buffer);
        index_groups.push(UploadedIndexGroup {
            group,
            buffer,
            format,
            count: indices.index_count(),
            material_index: indices.material_index,
        });
    }

    log::debug!(
        "Uploaded mesh '{}': {} streams, {} index groups",
        mesh.name,
        vertex_buffers.len(),
        index_groups.len()
    );

    Ok(UploadedMesh {
        primitive_type: mesh.primitive_type,
        vertex_array,
        vertex_buffers,
        index_groups,
    })
}

/// Textures resolved for the five mappable channels, indexed like
/// [`MaterialChannel::ALL`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaterialTextures([Option<TextureHandle>; 5]);

impl MaterialTextures {
    pub fn get(&self, channel: MaterialChannel) -> Option<TextureHandle> {
        self.0[channel_slot(channel)]
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }
}

fn channel_slot(channel: MaterialChannel) -> usize {
    match channel {
        MaterialChannel::BaseColor => 0,
        MaterialChannel::Normal => 1,
        MaterialChannel::Metallic => 2,
        MaterialChannel::Roughness => 3,
        MaterialChannel::AmbientOcclusion => 4,
    }
}

/// Uploads (or reuses) the texture behind every mapped channel. Channels
/// whose image has not been resolved fall back to their constant.
pub fn resolve_material_textures<B: GraphicsBackend>(
    backend: &mut B,
    cache: &mut TextureCache,
    material: &Material,
) -> Result<MaterialTextures, RenderError> {
    let mut textures = MaterialTextures::default();
    for channel in MaterialChannel::ALL {
        let Some(reference) = material.texture(channel) else {
            continue;
        };
        let Some(image) = reference.image.as_deref() else {
            log::warn!(
                "Material '{}': {:?} map '{}' has no image",
                material.name,
                channel,
                reference.key
            );
            continue;
        };
        textures.0[channel_slot(channel)] =
            Some(cache.ensure_uploaded(backend, &reference.key, image)?);
    }
    Ok(textures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::{BackendCapabilities, HeadlessBackend};
    use crate::scene::{Image, IndexGroup, TextureRef, VertexStream};

    fn triangle() -> Mesh {
        Mesh::new("tri", PrimitiveType::TriangleList)
            .with_stream(VertexStream::from_f32(
                "position",
                VertexDataType::Float3,
                &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            ))
            .with_index_group(IndexGroup::from_u16(0, &[0, 1, 2]))
    }

    #[test]
    fn names_pick_shader_locations() {
        assert_eq!(semantic_location("Position"), Some(0));
        assert_eq!(semantic_location("normal"), Some(1));
        assert_eq!(semantic_location("texcoord"), Some(2));
        assert_eq!(semantic_location("color"), None);
        assert_eq!(
            attribute_locations(["position", "normal", "uv", "tangent", "color", "weights"]),
            vec![0, 1, 2, 3, 4, 5]
        );
    }

    #[test]
    fn unnamed_streams_never_share_a_location() {
        assert_eq!(attribute_locations(["color", "position"]), vec![4, 0]);
        assert_eq!(attribute_locations(["normal", "extra", "position"]), vec![1, 4, 0]);
        assert_eq!(attribute_locations(["position", "position"]), vec![0, 4]);

        let mut backend = HeadlessBackend::new();
        let mut registry = ResourceRegistry::new();
        let mesh = Mesh::new("tinted", PrimitiveType::TriangleList)
            .with_stream(VertexStream::from_f32("color", VertexDataType::Float3, &[1.0; 9]))
            .with_stream(VertexStream::from_f32("position", VertexDataType::Float3, &[0.0; 9]))
            .with_index_group(IndexGroup::from_u16(0, &[0, 1, 2]));

        let uploaded = upload_mesh(&mut backend, &mesh, &mut registry).unwrap();
        assert_eq!(uploaded.vertex_buffers.len(), 2);
    }

    #[test]
    fn wide_index_groups_are_skipped() {
        let mut backend = HeadlessBackend::new();
        let mut registry = ResourceRegistry::new();
        let mesh = triangle().with_index_group(IndexGroup::from_u64(0, &[0, 1, 2]));

        let uploaded = upload_mesh(&mut backend, &mesh, &mut registry).unwrap();
        assert_eq!(uploaded.index_groups.len(), 1);
        assert_eq!(uploaded.index_groups[0].format, IndexFormat::U16);
        assert_eq!(uploaded.index_groups[0].count, 3);
        // one vertex stream plus one index group
        assert_eq!(registry.buffer_count(), 2);
    }

    #[test]
    fn doubles_fail_before_anything_is_allocated() {
        let mut backend = HeadlessBackend::new();
        let mut registry = ResourceRegistry::new();
        let mesh = triangle().with_stream(VertexStream::from_f64(
            "uv",
            VertexDataType::Double2,
            &[0.0; 6],
        ));

        let err = upload_mesh(&mut backend, &mesh, &mut registry).unwrap_err();
        assert!(matches!(
            err,
            RenderError::UnsupportedVertexType(VertexDataType::Double2)
        ));
        assert_eq!(backend.stats().buffers_created, 0);
    }

    #[test]
    fn doubles_upload_when_supported() {
        let mut backend = HeadlessBackend::with_capabilities(BackendCapabilities {
            double_vertex_attributes: true,
            ..BackendCapabilities::default()
        });
        let mut registry = ResourceRegistry::new();
        let mesh = triangle().with_stream(VertexStream::from_f64(
            "uv",
            VertexDataType::Double2,
            &[0.0; 6],
        ));
        assert!(upload_mesh(&mut backend, &mesh, &mut registry).is_ok());
    }

    #[test]
    fn unresolved_maps_keep_their_constant() {
        let mut backend = HeadlessBackend::new();
        let mut cache = TextureCache::new();
        let material = Material::new("m")
            .with_map(MaterialChannel::Normal, TextureRef::unresolved("missing"))
            .with_map(
                MaterialChannel::Roughness,
                TextureRef::new("rough", Image::new(1, 1, 8, vec![200])),
            );

        let textures = resolve_material_textures(&mut backend, &mut cache, &material).unwrap();
        assert_eq!(textures.get(MaterialChannel::Normal), None);
        assert_eq!(textures.get(MaterialChannel::BaseColor), None);
        assert_eq!(textures.get(MaterialChannel::Roughness), cache.get("rough"));
        assert_eq!(cache.len(), 1);
    }
}
