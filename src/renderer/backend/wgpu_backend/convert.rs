//! Mapping from backend-neutral descriptions to wgpu types, plus the data
//! conversions for formats wgpu cannot take directly.

use std::borrow::Cow;

use crate::renderer::backend::{
    CullMode, DepthCompare, PixelFormat, Topology, VertexFormat,
};
use crate::renderer::reflection::{InputScalar, SampleKind, TextureViewKind, VertexInput};

pub(crate) fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::R8 => wgpu::TextureFormat::R8Unorm,
        PixelFormat::R16 => wgpu::TextureFormat::R16Float,
        PixelFormat::Rgb8 | PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        PixelFormat::R32Float => wgpu::TextureFormat::R32Float,
        PixelFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

/// Bytes per texel once the data has gone through [`texel_data`].
pub(crate) fn uploaded_texel_size(format: PixelFormat) -> u32 {
    match format {
        PixelFormat::Rgb8 => 4,
        other => other.texel_size(),
    }
}

/// Rewrites texel data into the layout of [`texture_format`].
///
/// 3-channel rows gain an opaque alpha byte; 16-bit unsigned normalized
/// texels become half floats.
pub(crate) fn texel_data(format: PixelFormat, data: &[u8]) -> Cow<'_, [u8]> {
    match format {
        PixelFormat::Rgb8 => {
            let mut out = Vec::with_capacity(data.len() / 3 * 4);
            for texel in data.chunks_exact(3) {
                out.extend_from_slice(texel);
                out.push(u8::MAX);
            }
            Cow::Owned(out)
        }
        PixelFormat::R16 => {
            let mut out = Vec::with_capacity(data.len());
            for texel in data.chunks_exact(2) {
                let value = u16::from_le_bytes([texel[0], texel[1]]) as f32 / u16::MAX as f32;
                out.extend_from_slice(&half::f16::from_f32(value).to_le_bytes());
            }
            Cow::Owned(out)
        }
        _ => Cow::Borrowed(data),
    }
}

pub(crate) fn widen_u8_indices(data: &[u8]) -> Vec<u8> {
    let widened: Vec<u16> = data.iter().map(|&index| index as u16).collect();
    bytemuck::cast_slice(&widened).to_vec()
}

pub(crate) fn view_dimension(kind: TextureViewKind) -> wgpu::TextureViewDimension {
    match kind {
        TextureViewKind::D1 => wgpu::TextureViewDimension::D1,
        TextureViewKind::D2 => wgpu::TextureViewDimension::D2,
        TextureViewKind::D2Array => wgpu::TextureViewDimension::D2Array,
        TextureViewKind::D3 => wgpu::TextureViewDimension::D3,
        TextureViewKind::Cube => wgpu::TextureViewDimension::Cube,
        TextureViewKind::CubeArray => wgpu::TextureViewDimension::CubeArray,
    }
}

pub(crate) fn sample_type(sample: SampleKind, format: Option<wgpu::TextureFormat>) -> wgpu::TextureSampleType {
    match sample {
        SampleKind::Depth => wgpu::TextureSampleType::Depth,
        SampleKind::Sint => wgpu::TextureSampleType::Sint,
        SampleKind::Uint => wgpu::TextureSampleType::Uint,
        SampleKind::Float => wgpu::TextureSampleType::Float {
            filterable: format != Some(wgpu::TextureFormat::R32Float),
        },
    }
}

pub(crate) fn topology(topology: Topology) -> Option<wgpu::PrimitiveTopology> {
    match topology {
        Topology::PointList => Some(wgpu::PrimitiveTopology::PointList),
        Topology::LineList => Some(wgpu::PrimitiveTopology::LineList),
        Topology::LineStrip => Some(wgpu::PrimitiveTopology::LineStrip),
        Topology::TriangleList => Some(wgpu::PrimitiveTopology::TriangleList),
        Topology::TriangleStrip => Some(wgpu::PrimitiveTopology::TriangleStrip),
        Topology::TriangleFan => None,
    }
}

pub(crate) fn is_strip(topology: Topology) -> bool {
    matches!(topology, Topology::LineStrip | Topology::TriangleStrip)
}

pub(crate) fn cull_mode(cull: CullMode) -> Option<wgpu::Face> {
    match cull {
        CullMode::None => None,
        CullMode::Front => Some(wgpu::Face::Front),
        CullMode::Back => Some(wgpu::Face::Back),
    }
}

pub(crate) fn compare(compare: DepthCompare) -> wgpu::CompareFunction {
    match compare {
        DepthCompare::Less => wgpu::CompareFunction::Less,
        DepthCompare::LessEqual => wgpu::CompareFunction::LessEqual,
        DepthCompare::Always => wgpu::CompareFunction::Always,
    }
}

pub(crate) fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32 => wgpu::VertexFormat::Float32,
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        VertexFormat::Float64 => wgpu::VertexFormat::Float64,
        VertexFormat::Float64x2 => wgpu::VertexFormat::Float64x2,
        VertexFormat::Float64x3 => wgpu::VertexFormat::Float64x3,
        VertexFormat::Float64x4 => wgpu::VertexFormat::Float64x4,
    }
}

/// Format used to feed a shader input that the vertex array leaves unbound.
pub(crate) fn input_format(input: &VertexInput) -> wgpu::VertexFormat {
    use wgpu::VertexFormat as F;
    match (input.scalar, input.components) {
        (InputScalar::Sint, 1) => F::Sint32,
        (InputScalar::Sint, 2) => F::Sint32x2,
        (InputScalar::Sint, 3) => F::Sint32x3,
        (InputScalar::Sint, _) => F::Sint32x4,
        (InputScalar::Uint, 1) => F::Uint32,
        (InputScalar::Uint, 2) => F::Uint32x2,
        (InputScalar::Uint, 3) => F::Uint32x3,
        (InputScalar::Uint, _) => F::Uint32x4,
        (InputScalar::Double, 1) => F::Float64,
        (InputScalar::Double, 2) => F::Float64x2,
        (InputScalar::Double, 3) => F::Float64x3,
        (InputScalar::Double, _) => F::Float64x4,
        (InputScalar::Float, 1) => F::Float32,
        (InputScalar::Float, 2) => F::Float32x2,
        (InputScalar::Float, 3) => F::Float32x3,
        (InputScalar::Float, _) => F::Float32x4,
    }
}
