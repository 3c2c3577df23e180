//! GPU side of the simulation.
//!
//! - `backend` is the seam between the orchestrator and a device: buffer,
//!   layout, pipeline and bind group creation plus one-submission frames.
//! - `context` implements it on wgpu, drawing into a window surface or an
//!   offscreen texture.
//! - `software` implements it on the CPU for tests and GPU-less hosts.
//! - `resources` allocates the geometry, grid uniform and state buffers.
//! - `pipeline` builds the shared binding layout, both pipelines and the
//!   ping-pong bind group pair.

mod backend;
mod context;
pub mod pipeline;
pub mod resources;
mod software;

pub use backend::{
    BindGroupEntry, BindingKind, BindingSlot, BufferDesc, BufferRole, ComputePass,
    ComputePipelineDesc, FrameCommands, GpuBackend, RenderPass, RenderPipelineDesc, ShaderStages,
    VertexLayout,
};
pub use context::{AdapterSummary, WgpuBackend, WgpuBuffer};
pub use software::{
    BufferId, RenderStats, SoftwareBackend, SoftwareBindGroup, SoftwareComputePipeline,
    SoftwareLayout, SoftwareProgram, SoftwareRenderPipeline, DEFAULT_MAX_BUFFER_SIZE,
};
