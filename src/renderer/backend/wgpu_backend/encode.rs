//! Command buffer encoding for [`WgpuBackend::submit`].
//!
//! Each planned pass is prepared first (pipelines and bind groups created on
//! demand and cached) and then recorded with shared borrows only.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::replay::{Bindings, DispatchPlan, DrawCall, DrawPlan, Pass, Plan, RenderPassPlan};
use super::{convert, WgpuBackend, SCREEN_DEPTH_FORMAT};
use crate::renderer::backend::{
    ClearFlags, ClearValues, CullMode, DepthAttachment, DepthCompare, IndexFormat, ProgramKind,
    RenderTarget, Topology, VertexFormat, Viewport,
};
use crate::renderer::error::RenderError;
use crate::renderer::handles::{BufferHandle, ProgramHandle, TextureHandle};
use crate::renderer::reflection::{
    ResourceKind, SampleKind, ShaderReflection, Stage, TextureViewKind, PARAMS_BLOCK,
};

const SHADOW_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const CUBE_FACES: u32 = 6;
const FACE_PARAMETER: &str = "face";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(super) enum TargetKind {
    Screen,
    Depth,
    /// One face of a cube array; rasterized upside down by the shader.
    CubeFace,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(super) struct PipelineKey {
    pub(super) program: ProgramHandle,
    topology: Topology,
    strip_index: Option<wgpu::IndexFormat>,
    cull: CullMode,
    depth_compare: DepthCompare,
    target: TargetKind,
    /// Attribute format per reflected shader input; `None` reads zeros.
    inputs: Vec<Option<VertexFormat>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum EntryKey {
    Buffer(BufferHandle, u32),
    ZeroBuffer(u32),
    Parameters(u32),
    Texture(TextureHandle, TextureViewKind),
    FallbackTexture(TextureViewKind, SampleKind),
    Storage(TextureHandle, TextureViewKind),
    Sampler { comparison: bool },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(super) struct BindGroupKey {
    program: ProgramHandle,
    group: u32,
    entries: Vec<(u32, EntryKey)>,
}

/// Placeholder resources bound wherever a shader declares something the
/// command list never bound.
pub(super) struct Fallbacks {
    textures: HashMap<(TextureViewKind, SampleKind), wgpu::Texture>,
    uniforms: HashMap<u32, wgpu::Buffer>,
    zero_vertices: wgpu::Buffer,
}

impl Fallbacks {
    pub(super) fn new(device: &wgpu::Device) -> Self {
        let zero_vertices = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ZeroVertexBuffer"),
            size: 64,
            usage: wgpu::BufferUsages::VERTEX,
            mapped_at_creation: false,
        });
        Self {
            textures: HashMap::new(),
            uniforms: HashMap::new(),
            zero_vertices,
        }
    }

    fn ensure_texture(&mut self, device: &wgpu::Device, view: TextureViewKind, sample: SampleKind) {
        self.textures.entry((view, sample)).or_insert_with(|| {
            let format = match sample {
                SampleKind::Float => wgpu::TextureFormat::Rgba8Unorm,
                SampleKind::Depth => wgpu::TextureFormat::Depth32Float,
                SampleKind::Sint => wgpu::TextureFormat::R32Sint,
                SampleKind::Uint => wgpu::TextureFormat::R32Uint,
            };
            let (dimension, layers) = match view {
                TextureViewKind::D1 => (wgpu::TextureDimension::D1, 1),
                TextureViewKind::D3 => (wgpu::TextureDimension::D3, 1),
                TextureViewKind::Cube | TextureViewKind::CubeArray => {
                    (wgpu::TextureDimension::D2, CUBE_FACES)
                }
                TextureViewKind::D2 | TextureViewKind::D2Array => (wgpu::TextureDimension::D2, 1),
            };
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("FallbackTexture"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: layers,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension,
                format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            })
        });
    }

    fn ensure_uniform(&mut self, device: &wgpu::Device, size: u32) {
        self.uniforms.entry(size).or_insert_with(|| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("FallbackUniform"),
                size: (size as u64).next_multiple_of(16).max(16),
                usage: wgpu::BufferUsages::UNIFORM,
                mapped_at_creation: false,
            })
        });
    }
}

/// One dynamic uniform buffer holding every parameter snapshot of a submit.
pub(super) struct ParameterBuffer {
    buffer: wgpu::Buffer,
    capacity: u64,
}

impl ParameterBuffer {
    pub(super) fn new(device: &wgpu::Device, capacity: u64) -> Self {
        Self {
            buffer: Self::allocate(device, capacity),
            capacity,
        }
    }

    fn allocate(device: &wgpu::Device, capacity: u64) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("ParameterBuffer"),
            size: capacity,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Returns true when the buffer had to be replaced.
    fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, data: &[u8]) -> bool {
        let required = data.len() as u64;
        let grew = required > self.capacity;
        if grew {
            let new_capacity = required.max(self.capacity * 2);
            log::info!(
                "Growing parameter buffer: {} -> {}",
                self.capacity,
                new_capacity
            );
            self.buffer = Self::allocate(device, new_capacity);
            self.capacity = new_capacity;
        }
        if !data.is_empty() {
            queue.write_buffer(&self.buffer, 0, data);
        }
        grew
    }
}

/// Packs parameter blocks at dynamic-offset alignment.
#[derive(Debug)]
pub(super) struct ParameterArena {
    data: Vec<u8>,
    alignment: usize,
}

impl ParameterArena {
    pub(super) fn new(alignment: usize) -> Self {
        Self {
            data: Vec::new(),
            alignment: alignment.max(1),
        }
    }

    /// Appends `snapshot` zero-padded to `size` bytes, optionally overwriting
    /// one `i32` field, and returns the block's offset.
    pub(super) fn push(
        &mut self,
        snapshot: &[u8],
        size: usize,
        patch: Option<(Range<usize>, i32)>,
    ) -> u32 {
        let offset = self.data.len();
        let len = snapshot.len().min(size);
        self.data.extend_from_slice(&snapshot[..len]);
        self.data.resize(offset + size, 0);

        if let Some((range, value)) = patch {
            if range.len() == 4 && range.end <= size {
                self.data[offset + range.start..offset + range.end]
                    .copy_from_slice(&value.to_le_bytes());
            }
        }

        let aligned = self.data.len().next_multiple_of(self.alignment);
        self.data.resize(aligned, 0);
        offset as u32
    }

    pub(super) fn bytes(&self) -> &[u8] {
        &self.data
    }
}

struct PreparedDraw {
    pipeline: PipelineKey,
    groups: Vec<(BindGroupKey, Option<u32>)>,
    vertex_buffers: Vec<Option<BufferHandle>>,
    index: Option<(BufferHandle, wgpu::IndexFormat)>,
    count: u32,
    viewport: Option<Viewport>,
}

/// (pass, draw or dispatch, cube face) -> parameter block offset.
type ParameterOffsets = HashMap<(usize, usize, u32), u32>;

impl WgpuBackend {
    pub(super) fn execute(&mut self, plan: Plan) -> Result<(), RenderError> {
        let offsets = self.pack_parameters(&plan);

        let frame = if plan.touches_screen() {
            match self.surface.get_current_texture() {
                Ok(frame) => Some(frame),
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    log::warn!("Surface lost or outdated, reconfiguring");
                    self.reconfigure();
                    None
                }
                Err(wgpu::SurfaceError::Timeout) => {
                    log::warn!("Surface acquire timed out, skipping screen passes");
                    None
                }
                Err(err) => return Err(RenderError::Surface(err.to_string())),
            }
        } else {
            None
        };
        let screen_view = frame
            .as_ref()
            .map(|frame| frame.texture.create_view(&wgpu::TextureViewDescriptor::default()));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        for (pass_index, pass) in plan.passes.iter().enumerate() {
            match pass {
                Pass::Copy {
                    buffer,
                    offset,
                    data,
                } => self.encode_copy(&mut encoder, *buffer, *offset, data),
                Pass::Compute(dispatches) => {
                    self.encode_compute(&mut encoder, pass_index, dispatches, &offsets)?
                }
                Pass::Render(render) => self.encode_render(
                    &mut encoder,
                    pass_index,
                    render,
                    &offsets,
                    screen_view.as_ref(),
                ),
            }
        }

        self.queue.submit(Some(encoder.finish()));
        if let Some(frame) = frame {
            frame.present();
        }
        Ok(())
    }

    fn cube_faces(&self, target: Option<RenderTarget>) -> u32 {
        match target {
            Some(RenderTarget::Offscreen(handle)) => match self.render_targets.get(&handle) {
                Some(DepthAttachment::Cube { .. }) => CUBE_FACES,
                _ => 1,
            },
            _ => 1,
        }
    }

    fn pack_parameters(&mut self, plan: &Plan) -> ParameterOffsets {
        let alignment = self.device.limits().min_uniform_buffer_offset_alignment as usize;
        let mut arena = ParameterArena::new(alignment);
        let mut offsets = ParameterOffsets::new();

        for (pass_index, pass) in plan.passes.iter().enumerate() {
            match pass {
                Pass::Render(render) => {
                    let faces = self.cube_faces(render.target);
                    for (draw_index, draw) in render.draws.iter().enumerate() {
                        let Some(program) = self.programs.get(&draw.program) else {
                            continue;
                        };
                        let Some(block) = program.reflection.uniform_block(PARAMS_BLOCK) else {
                            continue;
                        };
                        let face_field = program.reflection.parameter(FACE_PARAMETER);
                        for face in 0..faces {
                            let patch = match face_field {
                                Some(field) if faces > 1 => Some((field.range(), face as i32)),
                                _ => None,
                            };
                            let offset =
                                arena.push(snapshot(plan, draw.parameters), block.size as usize, patch);
                            offsets.insert((pass_index, draw_index, face), offset);
                        }
                    }
                }
                Pass::Compute(dispatches) => {
                    for (index, dispatch) in dispatches.iter().enumerate() {
                        let Some(block) = dispatch
                            .program
                            .and_then(|program| self.programs.get(&program))
                            .and_then(|program| program.reflection.uniform_block(PARAMS_BLOCK))
                        else {
                            continue;
                        };
                        let offset =
                            arena.push(snapshot(plan, dispatch.parameters), block.size as usize, None);
                        offsets.insert((pass_index, index, 0), offset);
                    }
                }
                Pass::Copy { .. } => {}
            }
        }

        if self
            .parameters
            .upload(&self.device, &self.queue, arena.bytes())
        {
            self.invalidate_bind_groups();
        }
        offsets
    }

    fn encode_copy(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) {
        let Some(target) = self.buffers.get(&buffer) else {
            log::warn!("Write to unknown buffer {:?} skipped", buffer);
            return;
        };
        let alignment = wgpu::COPY_BUFFER_ALIGNMENT;
        if data.is_empty() || data.len() as u64 % alignment != 0 || offset % alignment != 0 {
            log::warn!(
                "Unaligned buffer write of {} bytes at {} skipped",
                data.len(),
                offset
            );
            return;
        }
        let staging = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("StagingBuffer"),
                contents: data,
                usage: wgpu::BufferUsages::COPY_SRC,
            });
        encoder.copy_buffer_to_buffer(&staging, 0, &target.buffer, offset, data.len() as u64);
    }

    fn encode_compute(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        pass_index: usize,
        dispatches: &[DispatchPlan],
        offsets: &ParameterOffsets,
    ) -> Result<(), RenderError> {
        let mut prepared = Vec::with_capacity(dispatches.len());
        for (index, dispatch) in dispatches.iter().enumerate() {
            let program = dispatch.program.ok_or(RenderError::NoComputeProgram)?;
            let reflection = match self.programs.get(&program) {
                Some(gpu) if gpu.compute.is_some() => Arc::clone(&gpu.reflection),
                _ => return Err(RenderError::NoComputeProgram),
            };
            let parameters = offsets.get(&(pass_index, index, 0)).copied();
            let Some(groups) =
                self.prepare_groups(program, &reflection, &dispatch.bindings, parameters)
            else {
                log::warn!("Dispatch is missing a storage image, skipping");
                continue;
            };
            prepared.push((program, groups, dispatch.groups));
        }

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Compute Pass"),
            timestamp_writes: None,
        });
        for (program, groups, [x, y, z]) in &prepared {
            let Some(pipeline) = self
                .programs
                .get(program)
                .and_then(|program| program.compute.as_ref())
            else {
                continue;
            };
            pass.set_pipeline(pipeline);
            for (index, (key, dynamic)) in groups.iter().enumerate() {
                if let Some(group) = self.bind_groups.get(key) {
                    match dynamic {
                        Some(offset) => pass.set_bind_group(index as u32, group, &[*offset]),
                        None => pass.set_bind_group(index as u32, group, &[]),
                    }
                }
            }
            pass.dispatch_workgroups(*x, *y, *z);
        }
        Ok(())
    }

    fn encode_render(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        pass_index: usize,
        render: &RenderPassPlan,
        offsets: &ParameterOffsets,
        screen_view: Option<&wgpu::TextureView>,
    ) {
        match render.target.unwrap_or(RenderTarget::Screen) {
            RenderTarget::Screen => {
                let Some(view) = screen_view else {
                    return;
                };
                let size = (self.config.width, self.config.height);
                let prepared =
                    self.prepare_draws(pass_index, &render.draws, TargetKind::Screen, 0, offsets);

                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Screen Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        depth_slice: None,
                        ops: wgpu::Operations {
                            load: color_load(render.clear),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                        view: &self.depth_view,
                        depth_ops: Some(wgpu::Operations {
                            load: depth_load(render.clear),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }),
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                self.record_draws(&mut pass, &prepared, size);
            }
            RenderTarget::Offscreen(handle) => {
                let Some(attachment) = self.render_targets.get(&handle).copied() else {
                    log::warn!("Pass for released render target {:?} skipped", handle);
                    return;
                };
                let Some((size, layers)) = self
                    .textures
                    .get(&attachment.texture())
                    .map(|texture| ((texture.width, texture.height), texture.layers))
                else {
                    log::warn!("Render target {:?} lost its depth texture", handle);
                    return;
                };

                match attachment {
                    DepthAttachment::Layer { texture, layer } => {
                        let prepared =
                            self.prepare_draws(pass_index, &render.draws, TargetKind::Depth, 0, offsets);
                        let Some(view) = self.layer_view(texture, layer) else {
                            return;
                        };
                        let mut pass = begin_depth_pass(encoder, &view, depth_load(render.clear));
                        self.record_draws(&mut pass, &prepared, size);
                    }
                    DepthAttachment::Cube {
                        texture,
                        cube_index,
                    } => {
                        // A cube-array clear wipes every layer, as the GL path did.
                        if render
                            .clear
                            .is_some_and(|clear| clear.flags.contains(ClearFlags::DEPTH))
                        {
                            let depth = render.clear.map_or(1.0, |clear| clear.depth);
                            for layer in 0..layers {
                                if let Some(view) = self.layer_view(texture, layer) {
                                    begin_depth_pass(encoder, &view, wgpu::LoadOp::Clear(depth));
                                }
                            }
                        }
                        for face in 0..CUBE_FACES {
                            let prepared = self.prepare_draws(
                                pass_index,
                                &render.draws,
                                TargetKind::CubeFace,
                                face,
                                offsets,
                            );
                            let Some(view) = self.layer_view(texture, cube_index * CUBE_FACES + face)
                            else {
                                return;
                            };
                            let mut pass = begin_depth_pass(encoder, &view, wgpu::LoadOp::Load);
                            self.record_draws(&mut pass, &prepared, size);
                        }
                    }
                }
            }
        }
    }

    fn layer_view(&self, texture: TextureHandle, layer: u32) -> Option<wgpu::TextureView> {
        let texture = self.textures.get(&texture)?;
        Some(texture.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("DepthLayer"),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_mip_level: 0,
            mip_level_count: Some(1),
            base_array_layer: layer,
            array_layer_count: Some(1),
            ..Default::default()
        }))
    }

    fn prepare_draws(
        &mut self,
        pass_index: usize,
        draws: &[DrawPlan],
        target: TargetKind,
        face: u32,
        offsets: &ParameterOffsets,
    ) -> Vec<PreparedDraw> {
        draws
            .iter()
            .enumerate()
            .filter_map(|(index, draw)| {
                let parameters = offsets.get(&(pass_index, index, face)).copied();
                self.prepare_draw(draw, target, parameters)
            })
            .collect()
    }

    fn prepare_draw(
        &mut self,
        draw: &DrawPlan,
        target: TargetKind,
        parameters: Option<u32>,
    ) -> Option<PreparedDraw> {
        let Some(program) = self.programs.get(&draw.program) else {
            log::warn!("Draw with released program {:?} skipped", draw.program);
            return None;
        };
        if program.kind != ProgramKind::Graphics {
            log::warn!("Program '{}' cannot draw", program.name);
            return None;
        }
        let reflection = Arc::clone(&program.reflection);

        let topology = draw.call.topology();
        if convert::topology(topology).is_none() {
            log::warn!("{:?} is not drawable on this backend", topology);
            return None;
        }
        let Some(attributes) = self.vertex_arrays.get(&draw.call.vertex_array()) else {
            log::warn!("Draw with released vertex array skipped");
            return None;
        };

        let mut inputs = Vec::with_capacity(reflection.vertex_inputs().len());
        let mut vertex_buffers = Vec::with_capacity(reflection.vertex_inputs().len());
        for input in reflection.vertex_inputs() {
            match attributes
                .iter()
                .find(|attribute| attribute.location == input.location)
            {
                Some(attribute) => {
                    inputs.push(Some(attribute.format));
                    vertex_buffers.push(Some(attribute.buffer));
                }
                None => {
                    inputs.push(None);
                    vertex_buffers.push(None);
                }
            }
        }

        let (index, count) = match draw.call {
            DrawCall::Indexed {
                index_buffer,
                index_format,
                index_count,
                ..
            } => {
                let Some(buffer) = self.buffers.get(&index_buffer) else {
                    log::warn!("Draw with released index buffer skipped");
                    return None;
                };
                let format = buffer.index_format.unwrap_or(match index_format {
                    IndexFormat::U32 => wgpu::IndexFormat::Uint32,
                    IndexFormat::U8 | IndexFormat::U16 => wgpu::IndexFormat::Uint16,
                });
                (Some((index_buffer, format)), index_count)
            }
            DrawCall::Array { vertex_count, .. } => (None, vertex_count),
        };

        let key = PipelineKey {
            program: draw.program,
            topology,
            strip_index: index
                .filter(|_| convert::is_strip(topology))
                .map(|(_, format)| format),
            cull: draw.cull,
            depth_compare: draw.depth_compare,
            target,
            inputs,
        };
        if !self.ensure_pipeline(&key) {
            return None;
        }

        let groups = self.prepare_groups(draw.program, &reflection, &draw.bindings, parameters)?;
        Some(PreparedDraw {
            pipeline: key,
            groups,
            vertex_buffers,
            index,
            count,
            viewport: draw.viewport,
        })
    }

    fn record_draws(&self, pass: &mut wgpu::RenderPass<'_>, draws: &[PreparedDraw], size: (u32, u32)) {
        let (width, height) = (size.0.max(1), size.1.max(1));
        for draw in draws {
            let Some(pipeline) = self.pipelines.get(&draw.pipeline) else {
                continue;
            };
            pass.set_pipeline(pipeline);

            let viewport = draw.viewport.unwrap_or_else(|| Viewport::new(width, height));
            let x = viewport.x.min(width - 1);
            let y = viewport.y.min(height - 1);
            pass.set_viewport(
                x as f32,
                y as f32,
                viewport.width.clamp(1, width - x) as f32,
                viewport.height.clamp(1, height - y) as f32,
                0.0,
                1.0,
            );

            for (index, (key, dynamic)) in draw.groups.iter().enumerate() {
                if let Some(group) = self.bind_groups.get(key) {
                    match dynamic {
                        Some(offset) => pass.set_bind_group(index as u32, group, &[*offset]),
                        None => pass.set_bind_group(index as u32, group, &[]),
                    }
                }
            }

            for (slot, source) in draw.vertex_buffers.iter().enumerate() {
                let buffer = match source {
                    Some(handle) => match self.buffers.get(handle) {
                        Some(buffer) => &buffer.buffer,
                        None => &self.fallbacks.zero_vertices,
                    },
                    None => &self.fallbacks.zero_vertices,
                };
                pass.set_vertex_buffer(slot as u32, buffer.slice(..));
            }

            match draw.index {
                Some((handle, format)) => {
                    if let Some(buffer) = self.buffers.get(&handle) {
                        pass.set_index_buffer(buffer.buffer.slice(..), format);
                        pass.draw_indexed(0..draw.count, 0, 0..1);
                    }
                }
                None => pass.draw(0..draw.count, 0..1),
            }
        }
    }

    fn ensure_pipeline(&mut self, key: &PipelineKey) -> bool {
        if self.pipelines.contains_key(key) {
            return true;
        }
        let Some(program) = self.programs.get(&key.program) else {
            return false;
        };
        let Some(primitive_topology) = convert::topology(key.topology) else {
            return false;
        };
        let Some(vertex_entry) = program.reflection.entry_point(Stage::Vertex) else {
            log::warn!("Program '{}' has no vertex stage", program.name);
            return false;
        };
        let fragment_entry = program.reflection.entry_point(Stage::Fragment);

        let attributes: Vec<[wgpu::VertexAttribute; 1]> = program
            .reflection
            .vertex_inputs()
            .iter()
            .zip(&key.inputs)
            .map(|(input, format)| {
                [wgpu::VertexAttribute {
                    format: format
                        .map(convert::vertex_format)
                        .unwrap_or_else(|| convert::input_format(input)),
                    offset: 0,
                    shader_location: input.location,
                }]
            })
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout> = attributes
            .iter()
            .zip(&key.inputs)
            .map(|(attributes, format)| wgpu::VertexBufferLayout {
                array_stride: if format.is_some() {
                    attributes[0].format.size()
                } else {
                    0
                },
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes,
            })
            .collect();

        let color_targets = match key.target {
            TargetKind::Screen => vec![Some(wgpu::ColorTargetState {
                format: self.config.format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            TargetKind::Depth | TargetKind::CubeFace => Vec::new(),
        };

        let (depth_format, bias) = match key.target {
            TargetKind::Screen => (SCREEN_DEPTH_FORMAT, wgpu::DepthBiasState::default()),
            TargetKind::Depth | TargetKind::CubeFace if key.topology.is_triangles() => (
                SHADOW_DEPTH_FORMAT,
                wgpu::DepthBiasState {
                    constant: 2,
                    slope_scale: 2.0,
                    clamp: 0.0,
                },
            ),
            TargetKind::Depth | TargetKind::CubeFace => {
                (SHADOW_DEPTH_FORMAT, wgpu::DepthBiasState::default())
            }
        };

        let label = format!("{} Pipeline", program.name);
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&label),
                layout: Some(&program.layout),
                vertex: wgpu::VertexState {
                    module: &program.module,
                    entry_point: Some(vertex_entry.name.as_str()),
                    buffers: &buffers,
                    compilation_options: Default::default(),
                },
                fragment: fragment_entry.map(|entry| wgpu::FragmentState {
                    module: &program.module,
                    entry_point: Some(entry.name.as_str()),
                    targets: &color_targets,
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: primitive_topology,
                    strip_index_format: key.strip_index,
                    front_face: match key.target {
                        TargetKind::CubeFace => wgpu::FrontFace::Cw,
                        _ => wgpu::FrontFace::Ccw,
                    },
                    cull_mode: convert::cull_mode(key.cull),
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: depth_format,
                    depth_write_enabled: true,
                    depth_compare: convert::compare(key.depth_compare),
                    stencil: wgpu::StencilState::default(),
                    bias,
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

        log::debug!("Created pipeline {:?}", key);
        self.pipelines.insert(key.clone(), pipeline);
        true
    }

    fn prepare_groups(
        &mut self,
        program: ProgramHandle,
        reflection: &ShaderReflection,
        bindings: &Bindings,
        parameters: Option<u32>,
    ) -> Option<Vec<(BindGroupKey, Option<u32>)>> {
        let params_group = reflection
            .uniform_block(PARAMS_BLOCK)
            .map(|block| block.group);

        let mut groups = Vec::new();
        for group in 0..reflection.group_count() {
            let key = self.bind_group_key(program, reflection, group, bindings)?;
            self.ensure_bind_group(&key)?;
            let dynamic = (params_group == Some(group)).then(|| parameters.unwrap_or(0));
            groups.push((key, dynamic));
        }
        Some(groups)
    }

    fn bind_group_key(
        &mut self,
        program: ProgramHandle,
        reflection: &ShaderReflection,
        group: u32,
        bindings: &Bindings,
    ) -> Option<BindGroupKey> {
        let mut entries = Vec::new();
        for resource in reflection
            .resources()
            .iter()
            .filter(|resource| resource.group == group)
        {
            let entry = match resource.kind {
                ResourceKind::UniformBuffer { size } if resource.name == PARAMS_BLOCK => {
                    EntryKey::Parameters(size)
                }
                ResourceKind::UniformBuffer { size } => {
                    let block_name = reflection
                        .uniform_blocks()
                        .iter()
                        .find(|block| block.variable == resource.name)
                        .map(|block| block.name.as_str())
                        .unwrap_or(resource.name.as_str());
                    let bound = bindings
                        .uniforms
                        .get(block_name)
                        .or_else(|| bindings.uniforms.get(&resource.name))
                        .copied()
                        .filter(|buffer| self.buffers.contains_key(buffer));
                    match bound {
                        Some(buffer) => EntryKey::Buffer(buffer, size),
                        None => {
                            self.fallbacks.ensure_uniform(&self.device, size);
                            EntryKey::ZeroBuffer(size)
                        }
                    }
                }
                ResourceKind::Texture { view, sample } => {
                    let bound = bindings
                        .textures
                        .get(&resource.name)
                        .copied()
                        .flatten()
                        .filter(|texture| self.textures.contains_key(texture));
                    match bound {
                        Some(texture) => EntryKey::Texture(texture, view),
                        None => {
                            self.fallbacks.ensure_texture(&self.device, view, sample);
                            EntryKey::FallbackTexture(view, sample)
                        }
                    }
                }
                ResourceKind::StorageTexture { view, .. } => {
                    let texture = bindings
                        .storage
                        .get(&resource.binding)
                        .copied()
                        .filter(|texture| self.textures.contains_key(texture))?;
                    EntryKey::Storage(texture, view)
                }
                ResourceKind::Sampler { comparison } => EntryKey::Sampler { comparison },
            };
            entries.push((resource.binding, entry));
        }
        Some(BindGroupKey {
            program,
            group,
            entries,
        })
    }

    fn ensure_bind_group(&mut self, key: &BindGroupKey) -> Option<()> {
        if self.bind_groups.contains_key(key) {
            return Some(());
        }

        enum Resource<'a> {
            Buffer(wgpu::BufferBinding<'a>),
            View(wgpu::TextureView),
            Sampler(&'a wgpu::Sampler),
        }

        let bind_group = {
            let program = self.programs.get(&key.program)?;
            let layout = program.group_layouts.get(key.group as usize)?;

            let mut resources = Vec::with_capacity(key.entries.len());
            for (binding, entry) in &key.entries {
                let resource = match *entry {
                    EntryKey::Buffer(buffer, size) => Resource::Buffer(wgpu::BufferBinding {
                        buffer: &self.buffers.get(&buffer)?.buffer,
                        offset: 0,
                        size: wgpu::BufferSize::new(size as u64),
                    }),
                    EntryKey::ZeroBuffer(size) => Resource::Buffer(wgpu::BufferBinding {
                        buffer: self.fallbacks.uniforms.get(&size)?,
                        offset: 0,
                        size: wgpu::BufferSize::new(size as u64),
                    }),
                    EntryKey::Parameters(size) => Resource::Buffer(wgpu::BufferBinding {
                        buffer: &self.parameters.buffer,
                        offset: 0,
                        size: wgpu::BufferSize::new(size as u64),
                    }),
                    EntryKey::Texture(texture, view) | EntryKey::Storage(texture, view) => {
                        let texture = &self.textures.get(&texture)?.texture;
                        Resource::View(texture.create_view(&wgpu::TextureViewDescriptor {
                            dimension: Some(convert::view_dimension(view)),
                            mip_level_count: match entry {
                                EntryKey::Storage(..) => Some(1),
                                _ => None,
                            },
                            ..Default::default()
                        }))
                    }
                    EntryKey::FallbackTexture(view, sample) => {
                        let texture = self.fallbacks.textures.get(&(view, sample))?;
                        Resource::View(texture.create_view(&wgpu::TextureViewDescriptor {
                            dimension: Some(convert::view_dimension(view)),
                            ..Default::default()
                        }))
                    }
                    EntryKey::Sampler { comparison } => Resource::Sampler(if comparison {
                        &self.samplers.comparison
                    } else {
                        &self.samplers.linear
                    }),
                };
                resources.push((*binding, resource));
            }

            let entries: Vec<wgpu::BindGroupEntry> = resources
                .iter()
                .map(|(binding, resource)| wgpu::BindGroupEntry {
                    binding: *binding,
                    resource: match resource {
                        Resource::Buffer(buffer) => wgpu::BindingResource::Buffer(buffer.clone()),
                        Resource::View(view) => wgpu::BindingResource::TextureView(view),
                        Resource::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
                    },
                })
                .collect();

            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{} Group {}", program.name, key.group)),
                layout,
                entries: &entries,
            })
        };

        self.bind_groups.insert(key.clone(), bind_group);
        Some(())
    }
}

fn snapshot(plan: &Plan, index: Option<usize>) -> &[u8] {
    index
        .and_then(|index| plan.parameters.get(index))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn begin_depth_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    view: &wgpu::TextureView,
    load: wgpu::LoadOp<f32>,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Shadow Pass"),
        color_attachments: &[],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load,
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

fn color_load(clear: Option<ClearValues>) -> wgpu::LoadOp<wgpu::Color> {
    match clear {
        Some(clear) if clear.flags.contains(ClearFlags::COLOR) => {
            let [r, g, b, a] = clear.color;
            wgpu::LoadOp::Clear(wgpu::Color {
                r: r as f64,
                g: g as f64,
                b: b as f64,
                a: a as f64,
            })
        }
        _ => wgpu::LoadOp::Load,
    }
}

fn depth_load(clear: Option<ClearValues>) -> wgpu::LoadOp<f32> {
    match clear {
        Some(clear) if clear.flags.contains(ClearFlags::DEPTH) => wgpu::LoadOp::Clear(clear.depth),
        _ => wgpu::LoadOp::Load,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_blocks_are_aligned_and_padded() {
        let mut arena = ParameterArena::new(256);
        let first = arena.push(&[1; 8], 16, None);
        let second = arena.push(&[2; 64], 32, None);
        assert_eq!(first, 0);
        assert_eq!(second, 256);
        assert_eq!(arena.bytes().len(), 512);
        assert_eq!(&arena.bytes()[8..16], &[0; 8]);
        assert_eq!(&arena.bytes()[256..288], &[2; 32]);
    }

    #[test]
    fn face_patch_overwrites_one_field() {
        let mut arena = ParameterArena::new(4);
        let offset = arena.push(&[0; 16], 16, Some((12..16, 5))) as usize;
        assert_eq!(&arena.bytes()[offset + 12..offset + 16], &5i32.to_le_bytes());
        let untouched = arena.push(&[0; 16], 16, Some((14..18, 5))) as usize;
        assert_eq!(&arena.bytes()[untouched..untouched + 16], &[0; 16]);
    }

    #[test]
    fn loads_follow_clear_flags() {
        let depth_only = ClearValues {
            flags: ClearFlags::DEPTH,
            color: [0.0; 4],
            depth: 0.5,
        };
        assert!(matches!(color_load(Some(depth_only)), wgpu::LoadOp::Load));
        assert!(matches!(depth_load(Some(depth_only)), wgpu::LoadOp::Clear(d) if d == 0.5));
        assert!(matches!(depth_load(None), wgpu::LoadOp::Load));
    }
}
