//! The ring of frames in flight.
//!
//! Uploads publish a new batch list to the ring; each frame picks it up the
//! next time it becomes current, so a frame is only ever written while it is
//! the current one and never while an older submission may still read it.

use std::sync::Arc;

use super::backend::GraphicsBackend;
use super::batch::DrawBatch;
use super::handles::{BufferHandle, TextureHandle};
use super::shadow::{destroy_shadow_map, ShadowMap, ShadowMapKind};

pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameContext {
    pub skybox: Option<TextureHandle>,
    pub brdf_lut: Option<TextureHandle>,
    pub shadow_map: Option<ShadowMap>,
    pub global_shadow_map: Option<ShadowMap>,
    pub cube_shadow_map: Option<ShadowMap>,
}

impl FrameContext {
    pub fn shadow_map(&self, kind: ShadowMapKind) -> Option<ShadowMap> {
        match kind {
            ShadowMapKind::Array => self.shadow_map,
            ShadowMapKind::GlobalArray => self.global_shadow_map,
            ShadowMapKind::CubeArray => self.cube_shadow_map,
        }
    }

    pub fn set_shadow_map(&mut self, shadow_map: ShadowMap) {
        match shadow_map.kind {
            ShadowMapKind::Array => self.shadow_map = Some(shadow_map),
            ShadowMapKind::GlobalArray => self.global_shadow_map = Some(shadow_map),
            ShadowMapKind::CubeArray => self.cube_shadow_map = Some(shadow_map),
        }
    }

    pub fn clear_shadow_map(&mut self, kind: ShadowMapKind) {
        match kind {
            ShadowMapKind::Array => self.shadow_map = None,
            ShadowMapKind::GlobalArray => self.global_shadow_map = None,
            ShadowMapKind::CubeArray => self.cube_shadow_map = None,
        }
    }
}

#[derive(Debug)]
pub struct Frame {
    batches: Arc<[DrawBatch]>,
    pub context: FrameContext,
    /// Backing buffer of the per-frame constants block.
    pub constants: Option<BufferHandle>,
    generation: u64,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            batches: Arc::from(Vec::new()),
            context: FrameContext::default(),
            constants: None,
            generation: 0,
        }
    }
}

impl Frame {
    pub fn batches(&self) -> &Arc<[DrawBatch]> {
        &self.batches
    }

    /// Upload generation the batch list was taken from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn release<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for kind in [
            ShadowMapKind::Array,
            ShadowMapKind::GlobalArray,
            ShadowMapKind::CubeArray,
        ] {
            if let Some(shadow_map) = self.context.shadow_map(kind) {
                destroy_shadow_map(backend, shadow_map);
            }
        }
        if let Some(buffer) = self.constants.take() {
            backend.release_buffer(buffer);
        }
        *self = Self::default();
    }
}

#[derive(Debug, Default)]
struct Published {
    batches: Option<Arc<[DrawBatch]>>,
    skybox: Option<TextureHandle>,
    generation: u64,
}

#[derive(Debug)]
pub struct FrameRing {
    frames: Vec<Frame>,
    index: usize,
    published: Published,
}

impl FrameRing {
    /// `count` is clamped to `1..=MAX_FRAMES_IN_FLIGHT`.
    pub fn new(count: usize) -> Self {
        let count = count.clamp(1, MAX_FRAMES_IN_FLIGHT);
        Self {
            frames: (0..count).map(|_| Frame::default()).collect(),
            index: 0,
            published: Published::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> &Frame {
        &self.frames[self.index]
    }

    pub fn current_mut(&mut self) -> &mut Frame {
        &mut self.frames[self.index]
    }

    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    /// Moves to the next frame and brings it up to date with the latest upload.
    pub fn advance(&mut self) -> usize {
        self.index = (self.index + 1) % self.frames.len();
        self.sync_current();
        self.index
    }

    /// Makes `batches` the scene's batch list. Only the current frame takes
    /// it now; the others take it when they next become current.
    pub fn publish(&mut self, batches: Vec<DrawBatch>, skybox: Option<TextureHandle>) {
        self.published.generation += 1;
        self.published.batches = Some(Arc::from(batches));
        self.published.skybox = skybox;
        self.sync_current();
    }

    fn sync_current(&mut self) {
        let published = &self.published;
        let frame = &mut self.frames[self.index];
        if frame.generation == published.generation {
            return;
        }
        frame.batches = published
            .batches
            .clone()
            .unwrap_or_else(|| Arc::from(Vec::new()));
        frame.context.skybox = published.skybox;
        frame.generation = published.generation;
        log::trace!(
            "Frame {} took batch generation {}",
            self.index,
            published.generation
        );
    }

    /// Releases what the frames own and empties every batch list. Safe to
    /// call repeatedly and before the first upload.
    pub fn clear<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for frame in &mut self.frames {
            frame.release(backend);
        }
        let generation = self.published.generation + 1;
        self.published = Published {
            generation,
            ..Published::default()
        };
        for frame in &mut self.frames {
            frame.generation = generation;
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Frame> {
        self.frames.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::HeadlessBackend;
    use crate::renderer::shadow::generate_shadow_map_array;

    #[test]
    fn frame_count_is_clamped() {
        assert_eq!(FrameRing::new(0).len(), 1);
        assert_eq!(FrameRing::new(3).len(), 3);
        assert_eq!(FrameRing::new(12).len(), MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn index_wraps() {
        let mut ring = FrameRing::new(3);
        let visited: Vec<usize> = (0..7).map(|_| ring.advance()).collect();
        assert_eq!(visited, vec![1, 2, 0, 1, 2, 0, 1]);
    }

    #[test]
    fn publish_only_touches_the_current_frame() {
        let mut ring = FrameRing::new(3);
        ring.publish(Vec::new(), None);
        assert_eq!(ring.current().generation(), 1);
        assert_eq!(ring.frame(1).map(Frame::generation), Some(0));
        assert_eq!(ring.frame(2).map(Frame::generation), Some(0));

        ring.advance();
        assert_eq!(ring.frame(1).map(Frame::generation), Some(1));
        assert_eq!(ring.frame(2).map(Frame::generation), Some(0));
    }

    #[test]
    fn clear_releases_frame_resources_twice_safely() {
        let mut backend = HeadlessBackend::new();
        let mut ring = FrameRing::new(2);
        ring.clear(&mut backend);

        let map = generate_shadow_map_array(&mut backend, ShadowMapKind::GlobalArray, 8, 8, 1)
            .unwrap();
        ring.current_mut().context.set_shadow_map(map);
        assert_eq!(
            ring.current().context.shadow_map(ShadowMapKind::GlobalArray),
            Some(map)
        );

        ring.clear(&mut backend);
        ring.clear(&mut backend);
        assert_eq!(backend.live_textures(), 0);
        assert!(ring.iter().all(|frame| frame.batches().is_empty()));
    }
}
