//! GPU side of the visualizer using wgpu.
//!
//! Rows produced by the feeder are uploaded through a fence-gated staging
//! buffer into a circular R32F texture, which a fullscreen pass draws into
//! the window surface each frame.

pub mod context;
pub mod frame;
pub mod layouts;
pub mod surface;
pub mod textures;
pub mod transfer;
pub mod upload;

pub use context::{DeviceLostFlag, GpuContext, GpuError};
pub use frame::{Acquire, Extent, FrameLoop, FrameStatus, SkipReason, Swapchain};
pub use surface::{RowBindings, SurfaceRenderer};
pub use textures::{RowTexture, StagingRows, ROW_FORMAT};
pub use transfer::{RowUniform, StagingState, TransferBackend, TransferPipeline};
pub use upload::WgpuTransfer;
