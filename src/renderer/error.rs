use crate::scene::VertexDataType;

use super::handles::TextureHandle;

/// Errors surfaced by the frame pipeline. Recoverable conditions (unknown
/// index widths, unresolved meshes or textures) are logged and skipped and
/// never show up here.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("vertex data type {0:?} is not supported by this backend")]
    UnsupportedVertexType(VertexDataType),

    #[error("shadow render target is incomplete: {reason}")]
    IncompleteRenderTarget { reason: String },

    #[error("dispatch issued without a bound compute program")]
    NoComputeProgram,

    #[error("pipeline state '{0}' is not registered")]
    MissingPipelineState(String),

    #[error("failed to allocate {what}: {reason}")]
    ResourceAllocation { what: &'static str, reason: String },

    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u64 },

    #[error("shadow pass cannot go from {from} to {to}")]
    InvalidShadowTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("shader '{name}' failed to parse: {message}")]
    ShaderParse { name: String, message: String },

    #[error("texture {texture:?} layer {layer} is out of range")]
    LayerOutOfRange { texture: TextureHandle, layer: u32 },

    #[error("surface error: {0}")]
    Surface(String),
}

impl RenderError {
    pub(crate) fn allocation(what: &'static str, reason: impl ToString) -> Self {
        Self::ResourceAllocation {
            what,
            reason: reason.to_string(),
        }
    }
}
