//! Opaque GPU object handles. A handle is only meaningful to the backend
//! that issued it.

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub const KIND: &'static str = $kind;

            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

gpu_handle!(
    /// Vertex, index or uniform memory.
    BufferHandle,
    "buffer"
);
gpu_handle!(
    /// 2D, 2D-array, cube or cube-array image.
    TextureHandle,
    "texture"
);
gpu_handle!(
    /// Vertex attribute layout plus the buffers feeding it.
    VertexArrayHandle,
    "vertex array"
);
gpu_handle!(RenderTargetHandle, "render target");
gpu_handle!(ProgramHandle, "program");

/// Monotonic id source shared by backends.
#[derive(Debug, Default)]
pub(crate) struct HandleAllocator {
    next: u64,
}

impl HandleAllocator {
    pub(crate) fn next(&mut self) -> u64 {
        self.next += 1;
        self.next
    }
}
