// renderer/mod.rs

pub mod backend;
pub mod batch;
pub mod brdf;
pub mod constants;
pub mod debug;
pub mod environment;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod graphics_manager;
pub mod handles;
pub mod pipeline_state;
pub mod reflection;
pub mod resources;
pub mod shadow;
pub mod texture_cache;

pub use backend::{GraphicsBackend, HeadlessBackend, WgpuBackend};
pub use batch::DrawBatch;
pub use constants::FrameConstants;
pub use error::RenderError;
pub use frame::{FrameContext, FrameRing, MAX_FRAMES_IN_FLIGHT};
pub use graphics_manager::GraphicsManager;
pub use pipeline_state::{PipelineState, PipelineStateManager, PipelineStateProvider};
pub use shadow::{ShadowLayout, ShadowMap, ShadowMapKind};
pub use texture_cache::TextureCache;
