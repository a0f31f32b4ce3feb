//! A backend without a device. It hands out handles, validates their use
//! and keeps every submitted command list for inspection.

use std::collections::HashMap;

use super::{
    BackendCapabilities, BufferDescriptor, BufferUsage, CommandList, DepthAttachment,
    GraphicsBackend, PixelFormat, ProgramDescriptor, ProgramKind, TargetStatus,
    TextureDescriptor, TextureDimension, TextureRegion, VertexArrayDescriptor,
};
use crate::renderer::error::RenderError;
use crate::renderer::handles::{
    BufferHandle, HandleAllocator, ProgramHandle, RenderTargetHandle, TextureHandle,
    VertexArrayHandle,
};

#[derive(Clone, Debug)]
pub struct HeadlessTexture {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub mip_levels: u32,
    pub format: PixelFormat,
    pub dimension: TextureDimension,
    pub writes: u32,
}

/// Running totals since the backend was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocationStats {
    pub buffers_created: usize,
    pub textures_created: usize,
    pub texture_writes: usize,
    pub vertex_arrays_created: usize,
    pub render_targets_created: usize,
    pub programs_created: usize,
    pub released: usize,
}

pub struct HeadlessBackend {
    capabilities: BackendCapabilities,
    ids: HandleAllocator,
    buffers: HashMap<BufferHandle, (BufferUsage, usize)>,
    textures: HashMap<TextureHandle, HeadlessTexture>,
    vertex_arrays: HashMap<VertexArrayHandle, usize>,
    render_targets: HashMap<RenderTargetHandle, DepthAttachment>,
    programs: HashMap<ProgramHandle, (String, ProgramKind)>,
    stats: AllocationStats,
    submissions: Vec<CommandList>,
    size: (u32, u32),
    fail_render_targets: bool,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::with_capabilities(BackendCapabilities::default())
    }

    pub fn with_capabilities(capabilities: BackendCapabilities) -> Self {
        Self {
            capabilities,
            ids: HandleAllocator::default(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            vertex_arrays: HashMap::new(),
            render_targets: HashMap::new(),
            programs: HashMap::new(),
            stats: AllocationStats::default(),
            submissions: Vec::new(),
            size: (0, 0),
            fail_render_targets: false,
        }
    }

    /// Makes every render target report itself incomplete.
    pub fn fail_render_targets(&mut self, fail: bool) {
        self.fail_render_targets = fail;
    }

    pub fn stats(&self) -> AllocationStats {
        self.stats
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_vertex_arrays(&self) -> usize {
        self.vertex_arrays.len()
    }

    pub fn live_render_targets(&self) -> usize {
        self.render_targets.len()
    }

    pub fn texture(&self, texture: TextureHandle) -> Option<&HeadlessTexture> {
        self.textures.get(&texture)
    }

    pub fn buffer_usage(&self, buffer: BufferHandle) -> Option<BufferUsage> {
        self.buffers.get(&buffer).map(|(usage, _)| *usage)
    }

    pub fn program_name(&self, program: ProgramHandle) -> Option<&str> {
        self.programs.get(&program).map(|(name, _)| name.as_str())
    }

    /// Every list submitted since the last [`Self::take_submissions`].
    pub fn submissions(&self) -> &[CommandList] {
        &self.submissions
    }

    /// Drains the recorded submissions. Long runs call this once per frame
    /// to keep memory flat.
    pub fn take_submissions(&mut self) -> Vec<CommandList> {
        std::mem::take(&mut self.submissions)
    }

    pub fn last_submission(&self) -> Option<&CommandList> {
        self.submissions.last()
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    fn release<K: std::hash::Hash + Eq, V>(
        map: &mut HashMap<K, V>,
        key: &K,
        stats: &mut AllocationStats,
        kind: &str,
    ) {
        if map.remove(key).is_some() {
            stats.released += 1;
        } else {
            log::warn!("Release of unknown {} handle", kind);
        }
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle, RenderError> {
        if desc.contents.is_empty() {
            return Err(RenderError::allocation("buffer", "zero-sized buffer"));
        }
        let handle = BufferHandle::from_raw(self.ids.next());
        self.buffers.insert(handle, (desc.usage, desc.contents.len()));
        self.stats.buffers_created += 1;
        Ok(handle)
    }

    fn create_texture(
        &mut self,
        desc: &TextureDescriptor<'_>,
    ) -> Result<TextureHandle, RenderError> {
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 {
            return Err(RenderError::allocation("texture", "zero-sized texture"));
        }
        if desc.layers > self.capabilities.max_texture_layers {
            return Err(RenderError::allocation(
                "texture",
                format!("{} layers exceed the limit", desc.layers),
            ));
        }
        let handle = TextureHandle::from_raw(self.ids.next());
        self.textures.insert(
            handle,
            HeadlessTexture {
                width: desc.width,
                height: desc.height,
                layers: desc.layers,
                mip_levels: desc.mip_levels,
                format: desc.format,
                dimension: desc.dimension,
                writes: 0,
            },
        );
        self.stats.textures_created += 1;
        Ok(handle)
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        region: TextureRegion,
        data: &[u8],
    ) -> Result<(), RenderError> {
        let entry = self
            .textures
            .get_mut(&texture)
            .ok_or(RenderError::UnknownHandle {
                kind: TextureHandle::KIND,
                id: texture.raw(),
            })?;
        if region.layer >= entry.layers || region.mip_level >= entry.mip_levels {
            return Err(RenderError::LayerOutOfRange {
                texture,
                layer: region.layer,
            });
        }
        let expected = (region.width * region.height * entry.format.texel_size()) as usize;
        if data.len() < expected {
            return Err(RenderError::allocation(
                "texture upload",
                format!("{} bytes given, {} needed", data.len(), expected),
            ));
        }
        entry.writes += 1;
        self.stats.texture_writes += 1;
        Ok(())
    }

    fn create_vertex_array(
        &mut self,
        desc: &VertexArrayDescriptor<'_>,
    ) -> Result<VertexArrayHandle, RenderError> {
        for (index, attribute) in desc.attributes.iter().enumerate() {
            if desc.attributes[..index]
                .iter()
                .any(|earlier| earlier.location == attribute.location)
            {
                return Err(RenderError::allocation(
                    "vertex array",
                    format!("location {} is bound twice", attribute.location),
                ));
            }
            if !self.buffers.contains_key(&attribute.buffer) {
                return Err(RenderError::UnknownHandle {
                    kind: BufferHandle::KIND,
                    id: attribute.buffer.raw(),
                });
            }
            if attribute.format.is_double() && !self.capabilities.double_vertex_attributes {
                return Err(RenderError::allocation(
                    "vertex array",
                    "64-bit attributes are not supported",
                ));
            }
        }
        let handle = VertexArrayHandle::from_raw(self.ids.next());
        self.vertex_arrays.insert(handle, desc.attributes.len());
        self.stats.vertex_arrays_created += 1;
        Ok(handle)
    }

    fn create_render_target(
        &mut self,
        depth: DepthAttachment,
    ) -> Result<RenderTargetHandle, RenderError> {
        let handle = RenderTargetHandle::from_raw(self.ids.next());
        self.render_targets.insert(handle, depth);
        self.stats.render_targets_created += 1;
        Ok(handle)
    }

    fn render_target_status(&self, target: RenderTargetHandle) -> TargetStatus {
        if self.fail_render_targets {
            return TargetStatus::Incomplete("forced incomplete".to_string());
        }
        let Some(attachment) = self.render_targets.get(&target) else {
            return TargetStatus::Incomplete("unknown render target".to_string());
        };
        let Some(texture) = self.textures.get(&attachment.texture()) else {
            return TargetStatus::Incomplete("attachment texture was released".to_string());
        };
        if texture.format != PixelFormat::Depth32Float {
            return TargetStatus::Incomplete(format!("{:?} is not a depth format", texture.format));
        }
        let last_layer = match *attachment {
            DepthAttachment::Layer { layer, .. } => layer,
            DepthAttachment::Cube { cube_index, .. } => cube_index * 6 + 5,
        };
        if last_layer >= texture.layers {
            return TargetStatus::Incomplete(format!(
                "layer {} outside of {} layers",
                last_layer, texture.layers
            ));
        }
        TargetStatus::Complete
    }

    fn create_program(
        &mut self,
        desc: &ProgramDescriptor<'_>,
    ) -> Result<ProgramHandle, RenderError> {
        let handle = ProgramHandle::from_raw(self.ids.next());
        self.programs
            .insert(handle, (desc.name.to_string(), desc.kind));
        self.stats.programs_created += 1;
        Ok(handle)
    }

    fn release_buffer(&mut self, buffer: BufferHandle) {
        Self::release(&mut self.buffers, &buffer, &mut self.stats, BufferHandle::KIND);
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        Self::release(&mut self.textures, &texture, &mut self.stats, TextureHandle::KIND);
    }

    fn release_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        Self::release(
            &mut self.vertex_arrays,
            &vertex_array,
            &mut self.stats,
            VertexArrayHandle::KIND,
        );
    }

    fn release_render_target(&mut self, target: RenderTargetHandle) {
        Self::release(
            &mut self.render_targets,
            &target,
            &mut self.stats,
            RenderTargetHandle::KIND,
        );
    }

    fn release_program(&mut self, program: ProgramHandle) {
        Self::release(&mut self.programs, &program, &mut self.stats, ProgramHandle::KIND);
    }

    fn submit(&mut self, commands: CommandList) -> Result<(), RenderError> {
        log::trace!("Headless submit of {} commands", commands.len());
        self.submissions.push(commands);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::TextureUsage;

    fn depth_array(backend: &mut HeadlessBackend, layers: u32) -> TextureHandle {
        backend
            .create_texture(&TextureDescriptor {
                label: None,
                width: 64,
                height: 64,
                layers,
                mip_levels: 1,
                format: PixelFormat::Depth32Float,
                dimension: TextureDimension::D2Array,
                usage: TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED,
            })
            .unwrap()
    }

    #[test]
    fn taking_submissions_drains_them() {
        let mut backend = HeadlessBackend::new();
        for _ in 0..3 {
            backend.submit(CommandList::new()).unwrap();
        }

        assert_eq!(backend.take_submissions().len(), 3);
        assert!(backend.submissions().is_empty());
        assert!(backend.last_submission().is_none());

        backend.submit(CommandList::new()).unwrap();
        assert_eq!(backend.submissions().len(), 1);
    }

    #[test]
    fn cube_targets_need_six_layers() {
        let mut backend = HeadlessBackend::new();
        let texture = depth_array(&mut backend, 6);

        let first = backend
            .create_render_target(DepthAttachment::Cube { texture, cube_index: 0 })
            .unwrap();
        let second = backend
            .create_render_target(DepthAttachment::Cube { texture, cube_index: 1 })
            .unwrap();

        assert_eq!(backend.render_target_status(first), TargetStatus::Complete);
        assert!(matches!(
            backend.render_target_status(second),
            TargetStatus::Incomplete(_)
        ));
    }

    #[test]
    fn released_textures_invalidate_targets() {
        let mut backend = HeadlessBackend::new();
        let texture = depth_array(&mut backend, 2);
        let target = backend
            .create_render_target(DepthAttachment::Layer { texture, layer: 1 })
            .unwrap();
        backend.release_texture(texture);
        assert!(matches!(
            backend.render_target_status(target),
            TargetStatus::Incomplete(_)
        ));
        assert_eq!(backend.stats().released, 1);
    }

    #[test]
    fn short_uploads_are_rejected() {
        let mut backend = HeadlessBackend::new();
        let texture = depth_array(&mut backend, 1);
        let region = TextureRegion {
            mip_level: 0,
            layer: 0,
            width: 64,
            height: 64,
        };
        assert!(backend.write_texture(texture, region, &[0; 16]).is_err());
        assert!(backend.write_texture(texture, region, &vec![0; 64 * 64 * 4]).is_ok());
    }
}
