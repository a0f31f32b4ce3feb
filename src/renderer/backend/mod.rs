//! The graphics backend capability interface.
//!
//! Resource creation and release are immediate. Render state and draw work
//! are recorded into a [`CommandList`] and handed to [`GraphicsBackend::submit`],
//! which executes commands in recording order.

pub mod command;
pub mod headless;
pub mod wgpu_backend;

use std::sync::Arc;

use bitflags::bitflags;

use super::error::RenderError;
use super::handles::{
    BufferHandle, ProgramHandle, RenderTargetHandle, TextureHandle, VertexArrayHandle,
};
use super::reflection::ShaderReflection;

pub use command::{ClearValues, Command, CommandList, RenderTarget};
pub use headless::HeadlessBackend;
pub use wgpu_backend::WgpuBackend;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    U8,
    U16,
    U32,
}

impl IndexFormat {
    pub fn size(self) -> u32 {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index(IndexFormat),
    Uniform,
}

#[derive(Clone, Debug)]
pub struct BufferDescriptor<'a> {
    pub label: Option<&'a str>,
    pub usage: BufferUsage,
    pub contents: &'a [u8],
}

/// Texel formats the pipeline produces. Backends that lack a native
/// equivalent convert on upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8,
    R16,
    Rgb8,
    Rgba8,
    Rgba16Float,
    R32Float,
    Depth32Float,
}

impl PixelFormat {
    /// Bytes per texel of the data handed to `write_texture`.
    pub fn texel_size(self) -> u32 {
        match self {
            Self::R8 => 1,
            Self::R16 => 2,
            Self::Rgb8 => 3,
            Self::Rgba8 | Self::R32Float | Self::Depth32Float => 4,
            Self::Rgba16Float => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    D2,
    D2Array,
    Cube,
    CubeArray,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SAMPLED = 1 << 0;
        const STORAGE = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const COPY_DST = 1 << 3;
    }
}

#[derive(Clone, Debug)]
pub struct TextureDescriptor<'a> {
    pub label: Option<&'a str>,
    pub width: u32,
    pub height: u32,
    /// Array layers; six per cube for cube dimensions.
    pub layers: u32,
    pub mip_levels: u32,
    pub format: PixelFormat,
    pub dimension: TextureDimension,
    pub usage: TextureUsage,
}

/// Destination of a single-layer texture upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureRegion {
    pub mip_level: u32,
    pub layer: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Float64,
    Float64x2,
    Float64x3,
    Float64x4,
}

impl VertexFormat {
    pub fn is_double(self) -> bool {
        matches!(
            self,
            Self::Float64 | Self::Float64x2 | Self::Float64x3 | Self::Float64x4
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub buffer: BufferHandle,
    pub format: VertexFormat,
}

#[derive(Clone, Debug)]
pub struct VertexArrayDescriptor<'a> {
    pub label: Option<&'a str>,
    pub attributes: &'a [VertexAttribute],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

impl Topology {
    pub fn is_triangles(self) -> bool {
        matches!(
            self,
            Self::TriangleList | Self::TriangleStrip | Self::TriangleFan
        )
    }
}

/// Depth attachment of an offscreen target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepthAttachment {
    /// One layer of a 2D array.
    Layer { texture: TextureHandle, layer: u32 },
    /// All six faces of one cube inside a cube array.
    Cube {
        texture: TextureHandle,
        cube_index: u32,
    },
}

impl DepthAttachment {
    pub fn texture(&self) -> TextureHandle {
        match *self {
            Self::Layer { texture, .. } | Self::Cube { texture, .. } => texture,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetStatus {
    Complete,
    Incomplete(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    Graphics,
    Compute,
}

#[derive(Clone)]
pub struct ProgramDescriptor<'a> {
    pub name: &'a str,
    pub source: &'a str,
    pub kind: ProgramKind,
    pub reflection: Arc<ShaderReflection>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DepthCompare {
    #[default]
    Less,
    LessEqual,
    Always,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// What a backend can express natively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub triangle_fans: bool,
    pub double_vertex_attributes: bool,
    pub max_texture_layers: u32,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            triangle_fans: false,
            double_vertex_attributes: false,
            max_texture_layers: 256,
        }
    }
}

pub trait GraphicsBackend {
    fn capabilities(&self) -> BackendCapabilities;

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle, RenderError>;

    fn create_texture(
        &mut self,
        desc: &TextureDescriptor<'_>,
    ) -> Result<TextureHandle, RenderError>;

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        region: TextureRegion,
        data: &[u8],
    ) -> Result<(), RenderError>;

    fn create_vertex_array(
        &mut self,
        desc: &VertexArrayDescriptor<'_>,
    ) -> Result<VertexArrayHandle, RenderError>;

    fn create_render_target(
        &mut self,
        depth: DepthAttachment,
    ) -> Result<RenderTargetHandle, RenderError>;

    fn render_target_status(&self, target: RenderTargetHandle) -> TargetStatus;

    fn create_program(
        &mut self,
        desc: &ProgramDescriptor<'_>,
    ) -> Result<ProgramHandle, RenderError>;

    fn release_buffer(&mut self, buffer: BufferHandle);
    fn release_texture(&mut self, texture: TextureHandle);
    fn release_vertex_array(&mut self, vertex_array: VertexArrayHandle);
    fn release_render_target(&mut self, target: RenderTargetHandle);
    fn release_program(&mut self, program: ProgramHandle);

    /// Executes `commands` in order and presents the screen target.
    fn submit(&mut self, commands: CommandList) -> Result<(), RenderError>;

    fn resize(&mut self, width: u32, height: u32);
}
