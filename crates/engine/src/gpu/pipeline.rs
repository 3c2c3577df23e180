use crate::error::EngineError;
use crate::program::{COMPUTE_ENTRY, FRAGMENT_ENTRY, VERTEX_ENTRY};

use super::backend::{
    BindGroupEntry, BindingKind, BindingSlot, ComputePipelineDesc, GpuBackend, RenderPipelineDesc,
    ShaderStages, VertexLayout,
};
use super::resources::{GpuBuffer, GridUniform};

pub const GRID_BINDING: u32 = 0;
pub const STATE_IN_BINDING: u32 = 1;
pub const STATE_OUT_BINDING: u32 = 2;

/// Ping-pong index for a step counter.
pub fn parity(step: u64) -> usize {
    (step % 2) as usize
}

/// The three slots shared by the render and compute pipelines.
pub fn binding_slots(state_size: u64) -> [BindingSlot; 3] {
    [
        BindingSlot {
            binding: GRID_BINDING,
            kind: BindingKind::Uniform,
            visibility: ShaderStages::ALL,
            min_size: std::mem::size_of::<GridUniform>() as u64,
        },
        BindingSlot {
            binding: STATE_IN_BINDING,
            kind: BindingKind::ReadOnlyStorage,
            visibility: ShaderStages::VERTEX_COMPUTE,
            min_size: state_size,
        },
        BindingSlot {
            binding: STATE_OUT_BINDING,
            kind: BindingKind::Storage,
            visibility: ShaderStages::COMPUTE,
            min_size: state_size,
        },
    ]
}

pub struct BindingLayout<B: GpuBackend> {
    pub handle: B::BindingLayout,
    pub slots: [BindingSlot; 3],
}

impl<B: GpuBackend> BindingLayout<B> {
    fn min_size(&self, binding: u32) -> u64 {
        self.slots
            .iter()
            .find(|slot| slot.binding == binding)
            .map_or(0, |slot| slot.min_size)
    }
}

pub fn create_binding_layout<B: GpuBackend>(backend: &B, state_size: u64) -> BindingLayout<B> {
    let slots = binding_slots(state_size);
    let handle = backend.create_binding_layout("Cell Bind Group Layout", &slots);
    BindingLayout { handle, slots }
}

pub fn create_pipeline_layout<B: GpuBackend>(
    backend: &B,
    layout: &BindingLayout<B>,
) -> B::PipelineLayout {
    backend.create_pipeline_layout("Cell Pipeline Layout", &layout.handle)
}

pub fn create_render_pipeline<B: GpuBackend>(
    backend: &B,
    layout: &B::PipelineLayout,
    program: &B::Program,
    vertex_layout: &VertexLayout,
    color_format: B::ColorFormat,
) -> Result<B::RenderPipeline, EngineError> {
    tracing::debug!(?color_format, "building cell render pipeline");
    backend.create_render_pipeline(&RenderPipelineDesc {
        label: "Cell pipeline",
        layout,
        program,
        vertex_entry: VERTEX_ENTRY,
        fragment_entry: FRAGMENT_ENTRY,
        vertex_layout,
        color_format,
    })
}

pub fn create_compute_pipeline<B: GpuBackend>(
    backend: &B,
    layout: &B::PipelineLayout,
    program: &B::Program,
) -> Result<B::ComputePipeline, EngineError> {
    tracing::debug!("building simulation compute pipeline");
    backend.create_compute_pipeline(&ComputePipelineDesc {
        label: "Simulation pipeline",
        layout,
        program,
        entry: COMPUTE_ENTRY,
    })
}

/// One bind group of the pair plus the state buffer indices it reads from
/// and writes to.
pub struct PingPongGroup<B: GpuBackend> {
    pub group: B::BindGroup,
    pub read: usize,
    pub write: usize,
}

pub struct BindGroupPair<B: GpuBackend> {
    groups: [PingPongGroup<B>; 2],
}

impl<B: GpuBackend> BindGroupPair<B> {
    /// The group whose read side is the authoritative buffer at `step`.
    pub fn for_step(&self, step: u64) -> &PingPongGroup<B> {
        &self.groups[parity(step)]
    }

    pub fn groups(&self) -> &[PingPongGroup<B>; 2] {
        &self.groups
    }
}

/// Builds `[{grid, A -> B}, {grid, B -> A}]`.
pub fn create_bind_group_pair<B: GpuBackend>(
    backend: &B,
    layout: &BindingLayout<B>,
    uniform: &GpuBuffer<B>,
    state: &[GpuBuffer<B>; 2],
) -> Result<BindGroupPair<B>, EngineError> {
    check_size(uniform, layout.min_size(GRID_BINDING))?;
    for buffer in state {
        check_size(buffer, layout.min_size(STATE_IN_BINDING))?;
        check_size(buffer, layout.min_size(STATE_OUT_BINDING))?;
    }
    if state[0].size != state[1].size {
        return Err(EngineError::binding(
            "Cell renderer bind groups",
            format!(
                "state buffers differ in size ({} = {} bytes, {} = {} bytes)",
                state[0].label, state[0].size, state[1].label, state[1].size
            ),
        ));
    }

    let build = |label: &str, read: usize, write: usize| -> Result<PingPongGroup<B>, EngineError> {
        let entries = [
            BindGroupEntry {
                binding: GRID_BINDING,
                buffer: &uniform.handle,
            },
            BindGroupEntry {
                binding: STATE_IN_BINDING,
                buffer: &state[read].handle,
            },
            BindGroupEntry {
                binding: STATE_OUT_BINDING,
                buffer: &state[write].handle,
            },
        ];
        let group = backend.create_bind_group(label, &layout.handle, &entries)?;
        Ok(PingPongGroup { group, read, write })
    };

    Ok(BindGroupPair {
        groups: [
            build("Cell renderer bind group A", 0, 1)?,
            build("Cell renderer bind group B", 1, 0)?,
        ],
    })
}

fn check_size<B: GpuBackend>(buffer: &GpuBuffer<B>, min_size: u64) -> Result<(), EngineError> {
    if buffer.size < min_size {
        return Err(EngineError::binding(
            buffer.label,
            format!(
                "buffer holds {} bytes, binding requires at least {min_size}",
                buffer.size
            ),
        ));
    }
    Ok(())
}
