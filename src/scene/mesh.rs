/// Scalar layout of one vertex attribute stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexDataType {
    Float1,
    Float2,
    Float3,
    Float4,
    Double1,
    Double2,
    Double3,
    Double4,
}

impl VertexDataType {
    pub fn components(self) -> u32 {
        match self {
            Self::Float1 | Self::Double1 => 1,
            Self::Float2 | Self::Double2 => 2,
            Self::Float3 | Self::Double3 => 3,
            Self::Float4 | Self::Double4 => 4,
        }
    }

    pub fn is_double(self) -> bool {
        matches!(
            self,
            Self::Double1 | Self::Double2 | Self::Double3 | Self::Double4
        )
    }

    pub fn stride(self) -> u32 {
        let scalar = if self.is_double() { 8 } else { 4 };
        scalar * self.components()
    }
}

#[derive(Clone, Debug)]
pub struct VertexStream {
    pub attribute: String,
    pub data_type: VertexDataType,
    pub data: Vec<u8>,
}

impl VertexStream {
    pub fn from_f32(attribute: &str, data_type: VertexDataType, values: &[f32]) -> Self {
        Self {
            attribute: attribute.to_string(),
            data_type,
            data: bytemuck::cast_slice(values).to_vec(),
        }
    }

    pub fn from_f64(attribute: &str, data_type: VertexDataType, values: &[f64]) -> Self {
        Self {
            attribute: attribute.to_string(),
            data_type,
            data: bytemuck::cast_slice(values).to_vec(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.data.len() / self.data_type.stride() as usize
    }
}

/// Element width of an index group as declared by the importer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexType {
    Int8,
    Int16,
    Int32,
    Int64,
}

impl IndexType {
    pub fn size(self) -> usize {
        match self {
            Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 => 4,
            Self::Int64 => 8,
        }
    }
}

/// A run of indices drawn with one material.
#[derive(Clone, Debug)]
pub struct IndexGroup {
    pub material_index: usize,
    pub index_type: IndexType,
    pub data: Vec<u8>,
}

impl IndexGroup {
    pub fn from_u8(material_index: usize, indices: &[u8]) -> Self {
        Self {
            material_index,
            index_type: IndexType::Int8,
            data: indices.to_vec(),
        }
    }

    pub fn from_u16(material_index: usize, indices: &[u16]) -> Self {
        Self {
            material_index,
            index_type: IndexType::Int16,
            data: bytemuck::cast_slice(indices).to_vec(),
        }
    }

    pub fn from_u32(material_index: usize, indices: &[u32]) -> Self {
        Self {
            material_index,
            index_type: IndexType::Int32,
            data: bytemuck::cast_slice(indices).to_vec(),
        }
    }

    pub fn from_u64(material_index: usize, indices: &[u64]) -> Self {
        Self {
            material_index,
            index_type: IndexType::Int64,
            data: bytemuck::cast_slice(indices).to_vec(),
        }
    }

    pub fn index_count(&self) -> u32 {
        (self.data.len() / self.index_type.size()) as u32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    TriangleFan,
    QuadList,
    Polygon,
    Patch,
}

#[derive(Clone, Debug)]
pub struct Mesh {
    pub name: String,
    pub primitive_type: PrimitiveType,
    pub vertex_streams: Vec<VertexStream>,
    pub index_groups: Vec<IndexGroup>,
}

impl Mesh {
    pub fn new(name: &str, primitive_type: PrimitiveType) -> Self {
        Self {
            name: name.to_string(),
            primitive_type,
            vertex_streams: Vec::new(),
            index_groups: Vec::new(),
        }
    }

    pub fn with_stream(mut self, stream: VertexStream) -> Self {
        self.vertex_streams.push(stream);
        self
    }

    pub fn with_index_group(mut self, group: IndexGroup) -> Self {
        self.index_groups.push(group);
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.vertex_streams
            .first()
            .map(VertexStream::vertex_count)
            .unwrap_or(0)
    }
}
