//! Ownership of the GPU objects the manager allocates for scene geometry.
//!
//! Long-lived objects stay until [`ResourceRegistry::release_all`]. Transient
//! objects (debug geometry, overlay quads, shadow render targets) are still
//! referenced by the command list being recorded, so they are only released
//! once that list has been submitted.

use super::backend::GraphicsBackend;
use super::handles::{BufferHandle, RenderTargetHandle, TextureHandle, VertexArrayHandle};

#[derive(Debug, Default)]
struct Transient {
    buffers: Vec<BufferHandle>,
    vertex_arrays: Vec<VertexArrayHandle>,
    render_targets: Vec<RenderTargetHandle>,
}

impl Transient {
    fn len(&self) -> usize {
        self.buffers.len() + self.vertex_arrays.len() + self.render_targets.len()
    }
}

#[derive(Debug, Default)]
pub struct ResourceRegistry {
    buffers: Vec<BufferHandle>,
    vertex_arrays: Vec<VertexArrayHandle>,
    textures: Vec<TextureHandle>,
    transient: Transient,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.push(buffer);
    }

    pub fn track_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        self.vertex_arrays.push(vertex_array);
    }

    pub fn track_texture(&mut self, texture: TextureHandle) {
        self.textures.push(texture);
    }

    /// Schedules `buffer` for release after the next submit.
    pub fn retire_buffer(&mut self, buffer: BufferHandle) {
        self.transient.buffers.push(buffer);
    }

    pub fn retire_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        self.transient.vertex_arrays.push(vertex_array);
    }

    pub fn retire_render_target(&mut self, target: RenderTargetHandle) {
        self.transient.render_targets.push(target);
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn vertex_array_count(&self) -> usize {
        self.vertex_arrays.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn transient_count(&self) -> usize {
        self.transient.len()
    }

    /// Releases everything retired since the last call. Returns how many
    /// objects were freed.
    pub fn release_transient<B: GraphicsBackend>(&mut self, backend: &mut B) -> usize {
        let transient = std::mem::take(&mut self.transient);
        let released = transient.len();
        for vertex_array in transient.vertex_arrays {
            backend.release_vertex_array(vertex_array);
        }
        for buffer in transient.buffers {
            backend.release_buffer(buffer);
        }
        for target in transient.render_targets {
            backend.release_render_target(target);
        }
        released
    }

    pub fn release_all<B: GraphicsBackend>(&mut self, backend: &mut B) {
        self.release_transient(backend);

        let total = self.buffers.len() + self.vertex_arrays.len() + self.textures.len();
        if total > 0 {
            log::info!("Releasing {} scene resources", total);
        }
        for vertex_array in self.vertex_arrays.drain(..) {
            backend.release_vertex_array(vertex_array);
        }
        for buffer in self.buffers.drain(..) {
            backend.release_buffer(buffer);
        }
        for texture in self.textures.drain(..) {
            backend.release_texture(texture);
        }
    }
}
