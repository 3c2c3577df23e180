use std::fmt;

use crate::error::EngineError;

/// What a buffer is used for. Each role maps to a fixed usage set:
///
/// | role | usages |
/// |---|---|
/// | `Vertex` | vertex, copy-dst |
/// | `Uniform` | uniform, copy-dst |
/// | `State` | storage, copy-dst, copy-src |
///
/// State buffers need copy-dst so reset can overwrite them directly and
/// copy-src so snapshots can read them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRole {
    Vertex,
    Uniform,
    State,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub size: u64,
    pub role: BufferRole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderStages {
    pub vertex: bool,
    pub fragment: bool,
    pub compute: bool,
}

impl ShaderStages {
    pub const ALL: Self = Self {
        vertex: true,
        fragment: true,
        compute: true,
    };
    pub const VERTEX_COMPUTE: Self = Self {
        vertex: true,
        fragment: false,
        compute: true,
    };
    pub const COMPUTE: Self = Self {
        vertex: false,
        fragment: false,
        compute: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Uniform,
    ReadOnlyStorage,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSlot {
    pub binding: u32,
    pub kind: BindingKind,
    pub visibility: ShaderStages,
    /// Smallest buffer, in bytes, that may be bound here.
    pub min_size: u64,
}

/// Per-vertex input: a single `float32x2` position at offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexLayout {
    pub array_stride: u64,
    pub shader_location: u32,
}

pub struct RenderPipelineDesc<'a, B: GpuBackend + ?Sized> {
    pub label: &'a str,
    pub layout: &'a B::PipelineLayout,
    pub program: &'a B::Program,
    pub vertex_entry: &'a str,
    pub fragment_entry: &'a str,
    pub vertex_layout: &'a VertexLayout,
    pub color_format: B::ColorFormat,
}

pub struct ComputePipelineDesc<'a, B: GpuBackend + ?Sized> {
    pub label: &'a str,
    pub layout: &'a B::PipelineLayout,
    pub program: &'a B::Program,
    pub entry: &'a str,
}

pub struct BindGroupEntry<'a, B: GpuBackend + ?Sized> {
    pub binding: u32,
    pub buffer: &'a B::Buffer,
}

pub struct ComputePass<'a, B: GpuBackend + ?Sized> {
    pub pipeline: &'a B::ComputePipeline,
    pub bind_group: &'a B::BindGroup,
    pub workgroups: [u32; 3],
}

pub struct RenderPass<'a, B: GpuBackend + ?Sized> {
    pub pipeline: &'a B::RenderPipeline,
    pub bind_group: &'a B::BindGroup,
    pub vertex_buffer: &'a B::Buffer,
    pub vertex_count: u32,
    pub instance_count: u32,
    pub clear_color: [f64; 4],
}

/// Everything encoded into one submission. The compute pass, when present,
/// runs before the render pass and its writes are visible to it.
pub struct FrameCommands<'a, B: GpuBackend + ?Sized> {
    pub compute: Option<ComputePass<'a, B>>,
    pub render: RenderPass<'a, B>,
}

/// Device, queue and draw target as seen by the simulation.
///
/// Handles are opaque to the engine; it only ever passes them back into the
/// same backend.
pub trait GpuBackend {
    type Buffer;
    type BindingLayout;
    type PipelineLayout;
    type BindGroup;
    type Program;
    type RenderPipeline;
    type ComputePipeline;
    type ColorFormat: Copy + fmt::Debug;

    fn name(&self) -> &str;

    fn color_format(&self) -> Self::ColorFormat;

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<Self::Buffer, EngineError>;

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    /// Copies the first `size` bytes of `buffer` back to the host. Waits for
    /// all previously submitted work.
    fn read_buffer(&self, buffer: &Self::Buffer, size: u64) -> Result<Vec<u8>, EngineError>;

    /// Compiles already preprocessed program text.
    fn compile_program(&self, label: &str, source: &str) -> Result<Self::Program, EngineError>;

    fn create_binding_layout(&self, label: &str, slots: &[BindingSlot]) -> Self::BindingLayout;

    fn create_pipeline_layout(
        &self,
        label: &str,
        layout: &Self::BindingLayout,
    ) -> Self::PipelineLayout;

    fn create_render_pipeline(
        &self,
        desc: &RenderPipelineDesc<'_, Self>,
    ) -> Result<Self::RenderPipeline, EngineError>;

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc<'_, Self>,
    ) -> Result<Self::ComputePipeline, EngineError>;

    fn create_bind_group(
        &self,
        label: &str,
        layout: &Self::BindingLayout,
        entries: &[BindGroupEntry<'_, Self>],
    ) -> Result<Self::BindGroup, EngineError>;

    /// Encodes and submits one frame. Returns once the work is queued; the
    /// device may still be executing it.
    fn submit(&self, frame: &FrameCommands<'_, Self>);
}
