//! Debug geometry and texture overlays.
//!
//! Everything here builds its vertex buffers on the fly and retires them
//! straight away; the registry frees them once the frame has been submitted.

use glam::{Mat4, Vec2, Vec3};

use super::backend::{
    BufferDescriptor, BufferUsage, Command, CullMode, DepthCompare, GraphicsBackend, Topology,
    VertexArrayDescriptor, VertexAttribute, VertexFormat,
};
use super::constants::FRAME_CONSTANTS_BLOCK;
use super::error::RenderError;
use super::graphics_manager::GraphicsManager;
use super::handles::{TextureHandle, VertexArrayHandle};
use super::pipeline_state::{
    CUBE_MAP_ARRAY_OVERLAY, DEBUG, TEXTURE_ARRAY_OVERLAY, TEXTURE_OVERLAY,
};
use super::shadow::ShadowMapKind;

const OVERLAY_TILE: f32 = 192.0;
const OVERLAY_MARGIN: f32 = 8.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DebugBatch {
    pub vertex_array: VertexArrayHandle,
    pub topology: Topology,
    pub vertex_count: u32,
    pub color: Vec3,
    pub transform: Mat4,
}

/// Debug geometry queued for the current frame.
#[derive(Debug, Default)]
pub struct DebugQueue {
    batches: Vec<DebugBatch>,
}

impl DebugQueue {
    pub fn push(&mut self, batch: DebugBatch) {
        self.batches.push(batch);
    }

    pub fn batches(&self) -> &[DebugBatch] {
        &self.batches
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn clear(&mut self) {
        self.batches.clear();
    }
}

/// A screen rectangle in pixels, origin at the top left.
#[derive(Clone, Copy, Debug, PartialEq)]
struct ScreenRect {
    left: f32,
    top: f32,
    width: f32,
    height: f32,
}

impl ScreenRect {
    /// Corners in normalized device coordinates: top left, bottom right.
    fn to_ndc(self, screen: (u32, u32)) -> (Vec2, Vec2) {
        let (sw, sh) = (screen.0.max(1) as f32, screen.1.max(1) as f32);
        let x0 = self.left / sw * 2.0 - 1.0;
        let x1 = (self.left + self.width) / sw * 2.0 - 1.0;
        let y0 = 1.0 - self.top / sh * 2.0;
        let y1 = 1.0 - (self.top + self.height) / sh * 2.0;
        (Vec2::new(x0, y0), Vec2::new(x1, y1))
    }

    /// Two triangles covering the rectangle, with texture coordinates whose
    /// v axis points up.
    fn quad(self, screen: (u32, u32)) -> (Vec<Vec3>, Vec<Vec2>) {
        let (min, max) = self.to_ndc(screen);
        let corners = [
            (Vec3::new(min.x, max.y, 0.0), Vec2::new(0.0, 0.0)),
            (Vec3::new(max.x, max.y, 0.0), Vec2::new(1.0, 0.0)),
            (Vec3::new(max.x, min.y, 0.0), Vec2::new(1.0, 1.0)),
            (Vec3::new(min.x, min.y, 0.0), Vec2::new(0.0, 1.0)),
        ];
        [0, 1, 2, 0, 2, 3]
            .into_iter()
            .map(|i| corners[i])
            .unzip()
    }
}

/// Sampling direction of face `face` at face coordinates `u`, `v` in
/// `-1..=1`, `v` growing downwards.
fn cube_face_direction(face: usize, u: f32, v: f32) -> Vec3 {
    match face {
        0 => Vec3::new(1.0, -v, -u),
        1 => Vec3::new(-1.0, -v, u),
        2 => Vec3::new(u, 1.0, v),
        3 => Vec3::new(u, -1.0, -v),
        4 => Vec3::new(u, -v, 1.0),
        _ => Vec3::new(-u, -v, -1.0),
    }
}

/// Positions and directions for the six faces of a cube laid out as a
/// 3x2 grid inside `rect`.
fn cube_face_grid(rect: ScreenRect, screen: (u32, u32)) -> (Vec<Vec3>, Vec<Vec3>) {
    let cell_width = rect.width / 3.0;
    let cell_height = rect.height / 2.0;
    let mut positions = Vec::with_capacity(36);
    let mut directions = Vec::with_capacity(36);

    for face in 0..6 {
        let cell = ScreenRect {
            left: rect.left + (face % 3) as f32 * cell_width,
            top: rect.top + (face / 3) as f32 * cell_height,
            width: cell_width,
            height: cell_height,
        };
        let (min, max) = cell.to_ndc(screen);
        let corners = [
            (Vec3::new(min.x, min.y, 0.0), (-1.0, -1.0)),
            (Vec3::new(max.x, min.y, 0.0), (1.0, -1.0)),
            (Vec3::new(max.x, max.y, 0.0), (1.0, 1.0)),
            (Vec3::new(min.x, max.y, 0.0), (-1.0, 1.0)),
        ];
        for i in [0, 1, 2, 0, 2, 3] {
            let (position, (u, v)) = corners[i];
            positions.push(position);
            directions.push(cube_face_direction(face, u, v));
        }
    }
    (positions, directions)
}

impl<B: GraphicsBackend> GraphicsManager<B> {
    /// Uploads one float stream per attribute location and retires the
    /// result so it lives until the frame is submitted.
    fn transient_vertex_array(
        &mut self,
        label: &str,
        streams: &[(&[u8], VertexFormat)],
    ) -> Result<VertexArrayHandle, RenderError> {
        let mut attributes = Vec::with_capacity(streams.len());
        for (location, (contents, format)) in streams.iter().enumerate() {
            let buffer = self.backend.create_buffer(&BufferDescriptor {
                label: Some(label),
                usage: BufferUsage::Vertex,
                contents: *contents,
            })?;
            self.registry.retire_buffer(buffer);
            attributes.push(VertexAttribute {
                location: location as u32,
                buffer,
                format: *format,
            });
        }
        let vertex_array = self.backend.create_vertex_array(&VertexArrayDescriptor {
            label: Some(label),
            attributes: &attributes,
        })?;
        self.registry.retire_vertex_array(vertex_array);
        Ok(vertex_array)
    }

    fn queue_debug(&mut self, points: &[Vec3], topology: Topology, color: Vec3) -> Result<(), RenderError> {
        if points.is_empty() || !self.debug_enabled() {
            return Ok(());
        }
        let vertex_array = self.transient_vertex_array(
            "debug geometry",
            &[(bytemuck::cast_slice(points), VertexFormat::Float32x3)],
        )?;
        self.debug.push(DebugBatch {
            vertex_array,
            topology,
            vertex_count: points.len() as u32,
            color,
            transform: Mat4::IDENTITY,
        });
        Ok(())
    }

    pub fn draw_point(&mut self, point: Vec3, color: Vec3) -> Result<(), RenderError> {
        self.queue_debug(&[point], Topology::PointList, color)
    }

    pub fn draw_points(&mut self, points: &[Vec3], color: Vec3) -> Result<(), RenderError> {
        self.queue_debug(points, Topology::PointList, color)
    }

    /// Like [`Self::draw_points`] for points that are not already in a slice.
    pub fn draw_point_set<I>(&mut self, points: I, color: Vec3) -> Result<(), RenderError>
    where
        I: IntoIterator<Item = Vec3>,
    {
        let points: Vec<Vec3> = points.into_iter().collect();
        self.queue_debug(&points, Topology::PointList, color)
    }

    pub fn draw_line(&mut self, from: Vec3, to: Vec3, color: Vec3) -> Result<(), RenderError> {
        self.queue_debug(&[from, to], Topology::LineList, color)
    }

    /// `points` are taken in pairs; a trailing odd point is dropped.
    pub fn draw_lines(&mut self, points: &[Vec3], color: Vec3) -> Result<(), RenderError> {
        let even = points.len() - points.len() % 2;
        self.queue_debug(&points[..even], Topology::LineList, color)
    }

    pub fn draw_triangle(&mut self, a: Vec3, b: Vec3, c: Vec3, color: Vec3) -> Result<(), RenderError> {
        self.queue_debug(&[a, b, c], Topology::TriangleList, color)
    }

    /// Strips are drawn at half of `color`.
    pub fn draw_triangle_strip(&mut self, points: &[Vec3], color: Vec3) -> Result<(), RenderError> {
        if points.len() < 3 {
            return Ok(());
        }
        self.queue_debug(points, Topology::TriangleStrip, color * 0.5)
    }

    pub fn debug_batch_count(&self) -> usize {
        self.debug.len()
    }

    /// Draws the queued debug geometry with the "Debug" program.
    pub fn render_debug_buffers(&mut self) -> Result<(), RenderError> {
        if self.debug.is_empty() {
            return Ok(());
        }
        self.use_shader_program(DEBUG)?;
        if let Some(buffer) = self.frames.current().constants {
            self.commands.push(Command::BindUniformBuffer {
                block: FRAME_CONSTANTS_BLOCK.to_string(),
                buffer,
            });
        }
        self.commands.push(Command::SetCullMode(CullMode::None));

        let batches = self.debug.batches().to_vec();
        for batch in &batches {
            let state = self.bound_state_mut()?;
            state.set_parameter("front_color", batch.color);
            state.set_parameter("model_matrix", batch.transform);
            self.commit_parameters()?;
            self.commands.push(Command::Draw {
                vertex_array: batch.vertex_array,
                topology: batch.topology,
                vertex_count: batch.vertex_count,
            });
        }
        self.commands.push(Command::SetCullMode(CullMode::Back));
        log::trace!("Rendered {} debug batches", batches.len());
        Ok(())
    }

    /// Drops the queued debug geometry. Its GPU objects are already retired.
    pub fn clear_debug_buffers(&mut self) {
        self.debug.clear();
    }

    fn draw_overlay(
        &mut self,
        program: &str,
        texture: TextureHandle,
        vertex_array: VertexArrayHandle,
        vertex_count: u32,
    ) -> Result<(), RenderError> {
        self.commit_parameters()?;
        self.bind_texture("overlay_texture", Some(texture));
        self.commands.push(Command::SetDepthCompare(DepthCompare::Always));
        self.commands.push(Command::SetCullMode(CullMode::None));
        self.commands.push(Command::Draw {
            vertex_array,
            topology: Topology::TriangleList,
            vertex_count,
        });
        self.commands.push(Command::SetDepthCompare(DepthCompare::Less));
        self.commands.push(Command::SetCullMode(CullMode::Back));
        log::trace!("Overlay {} of {:?}", program, texture);
        Ok(())
    }

    /// Shows a 2D texture in the given screen rectangle.
    pub fn draw_texture_overlay(
        &mut self,
        texture: TextureHandle,
        left: f32,
        top: f32,
        width: f32,
        height: f32,
    ) -> Result<(), RenderError> {
        let rect = ScreenRect { left, top, width, height };
        let (positions, uvs) = rect.quad(self.screen);
        let vertex_array = self.transient_vertex_array(
            "texture overlay",
            &[
                (bytemuck::cast_slice(&positions), VertexFormat::Float32x3),
                (bytemuck::cast_slice(&uvs), VertexFormat::Float32x2),
            ],
        )?;
        self.use_shader_program(TEXTURE_OVERLAY)?;
        self.draw_overlay(TEXTURE_OVERLAY, texture, vertex_array, positions.len() as u32)
    }

    /// Shows layer `layer` of a depth array texture.
    pub fn draw_texture_array_overlay(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        left: f32,
        top: f32,
        width: f32,
        height: f32,
    ) -> Result<(), RenderError> {
        let rect = ScreenRect { left, top, width, height };
        let (positions, uvs) = rect.quad(self.screen);
        let vertex_array = self.transient_vertex_array(
            "texture array overlay",
            &[
                (bytemuck::cast_slice(&positions), VertexFormat::Float32x3),
                (bytemuck::cast_slice(&uvs), VertexFormat::Float32x2),
            ],
        )?;
        self.use_shader_program(TEXTURE_ARRAY_OVERLAY)?;
        self.set_parameter("layer_index", layer as f32);
        self.set_parameter("level", 0.0);
        self.draw_overlay(TEXTURE_ARRAY_OVERLAY, texture, vertex_array, positions.len() as u32)
    }

    /// Unfolds cube `layer` of a cube array at mip `level` into a 3x2 grid.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_cube_map_array_overlay(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        level: f32,
        left: f32,
        top: f32,
        width: f32,
        height: f32,
    ) -> Result<(), RenderError> {
        let rect = ScreenRect { left, top, width, height };
        let (positions, directions) = cube_face_grid(rect, self.screen);
        let vertex_array = self.transient_vertex_array(
            "cube map array overlay",
            &[
                (bytemuck::cast_slice(&positions), VertexFormat::Float32x3),
                (bytemuck::cast_slice(&directions), VertexFormat::Float32x3),
            ],
        )?;
        self.use_shader_program(CUBE_MAP_ARRAY_OVERLAY)?;
        self.set_parameter("layer_index", layer as f32);
        self.set_parameter("level", level);
        self.draw_overlay(
            CUBE_MAP_ARRAY_OVERLAY,
            texture,
            vertex_array,
            positions.len() as u32,
        )
    }

    /// Tiles every layer of the current frame's shadow maps along the bottom
    /// of the screen and shows the skybox in the top left corner.
    pub fn draw_shadow_overlays(&mut self) -> Result<(), RenderError> {
        let context = self.frames.current().context;
        let (width, height) = (self.screen.0 as f32, self.screen.1 as f32);
        let top = height - OVERLAY_TILE - OVERLAY_MARGIN;
        let per_row = ((width - OVERLAY_MARGIN) / (OVERLAY_TILE + OVERLAY_MARGIN)).max(0.0) as u32;

        let mut tile = 0;
        for kind in [
            ShadowMapKind::Array,
            ShadowMapKind::GlobalArray,
            ShadowMapKind::CubeArray,
        ] {
            let Some(shadow_map) = context.shadow_map(kind) else {
                continue;
            };
            let layers = match kind {
                ShadowMapKind::CubeArray => shadow_map.count * 6,
                _ => shadow_map.count,
            };
            for layer in 0..layers {
                if tile >= per_row {
                    break;
                }
                let left = OVERLAY_MARGIN + tile as f32 * (OVERLAY_TILE + OVERLAY_MARGIN);
                self.draw_texture_array_overlay(
                    shadow_map.texture,
                    layer,
                    left,
                    top,
                    OVERLAY_TILE,
                    OVERLAY_TILE,
                )?;
                tile += 1;
            }
        }

        if let Some(skybox) = context.skybox {
            self.draw_cube_map_array_overlay(
                skybox,
                0,
                0.0,
                OVERLAY_MARGIN,
                OVERLAY_MARGIN,
                OVERLAY_TILE * 1.5,
                OVERLAY_TILE,
            )?;
        }
        Ok(())
    }
}
