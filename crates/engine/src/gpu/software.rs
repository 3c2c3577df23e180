//! CPU stand-in for the GPU.
//!
//! Buffers live in host memory and compute dispatches run the B3/S23 rule
//! over exactly the cells the dispatch covers, so the orchestrator behaves
//! the same as it does on a device. The only compute program it executes is
//! the built-in simulation program; the edge policy comes from the program's
//! `WRAP_EDGES` substitution. Render passes draw nothing; they only record
//! what would have been drawn.

use std::cell::{Cell, RefCell};

use lifeconfig::EdgePolicy;

use crate::error::EngineError;
use crate::life::{live_neighbors, next_cell, DEAD};
use crate::program::{preprocess, simulation_defines, validate_wgsl, SIMULATION_PROGRAM_WGSL};

use super::backend::{
    BindGroupEntry, BindingKind, BindingSlot, BufferDesc, BufferRole, ComputePipelineDesc,
    FrameCommands, GpuBackend, RenderPipelineDesc,
};
use super::pipeline::{GRID_BINDING, STATE_IN_BINDING, STATE_OUT_BINDING};

/// Same default ceiling wgpu reports for `max_buffer_size`.
pub const DEFAULT_MAX_BUFFER_SIZE: u64 = 256 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(usize);

#[derive(Debug)]
struct HostBuffer {
    label: String,
    role: BufferRole,
    data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EntryPoint {
    name: String,
    stage: naga::ShaderStage,
    workgroup_size: [u32; 3],
}

#[derive(Debug, Clone)]
pub struct SoftwareProgram {
    label: String,
    entry_points: Vec<EntryPoint>,
    bindings: Vec<u32>,
    rule: Option<EdgePolicy>,
}

impl SoftwareProgram {
    fn entry(&self, name: &str, stage: naga::ShaderStage) -> Result<&EntryPoint, EngineError> {
        self.entry_points
            .iter()
            .find(|ep| ep.name == name && ep.stage == stage)
            .ok_or_else(|| {
                EngineError::program_load(
                    &self.label,
                    format!("no {stage:?} entry point named `{name}`"),
                )
            })
    }
}

#[derive(Debug, Clone)]
pub struct SoftwareLayout {
    label: String,
    slots: Vec<BindingSlot>,
}

#[derive(Debug, Clone)]
pub struct SoftwareBindGroup {
    entries: Vec<(u32, BufferId)>,
}

#[derive(Debug, Clone)]
pub struct SoftwareRenderPipeline {
    label: String,
}

#[derive(Debug, Clone)]
pub struct SoftwareComputePipeline {
    label: String,
    workgroup_size: [u32; 3],
    edges: EdgePolicy,
}

/// What the render passes submitted so far would have drawn.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderStats {
    pub frames: u64,
    pub dispatches: u64,
    pub last_instance_count: u32,
    pub last_live_cells: u64,
    pub last_clear_color: [f64; 4],
}

pub struct SoftwareBackend {
    max_buffer_size: u64,
    buffers: RefCell<Vec<HostBuffer>>,
    stats: Cell<RenderStats>,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            buffers: RefCell::new(Vec::new()),
            stats: Cell::new(RenderStats::default()),
        }
    }

    pub fn with_max_buffer_size(mut self, max: u64) -> Self {
        self.max_buffer_size = max;
        self
    }

    pub fn stats(&self) -> RenderStats {
        self.stats.get()
    }

    /// `(binding, buffer)` pairs of a bind group, in binding order.
    pub fn bind_group_buffers(&self, group: &SoftwareBindGroup) -> Vec<(u32, BufferId)> {
        group.entries.clone()
    }

    fn buffer_for(group: &SoftwareBindGroup, binding: u32) -> Option<BufferId> {
        group
            .entries
            .iter()
            .find(|(slot, _)| *slot == binding)
            .map(|(_, id)| *id)
    }

    fn words(&self, id: BufferId) -> Vec<u32> {
        let buffers = self.buffers.borrow();
        buffers
            .get(id.0)
            .map(|buffer| super::resources::decode_cells(&buffer.data))
            .unwrap_or_default()
    }

    fn grid_size(&self, id: BufferId) -> u32 {
        let words = self.words(id);
        words.first().map_or(0, |&bits| f32::from_bits(bits) as u32)
    }

    fn dispatch(
        &self,
        group: &SoftwareBindGroup,
        pipeline: &SoftwareComputePipeline,
        workgroups: [u32; 3],
    ) {
        let workgroup_size = pipeline.workgroup_size;
        let (Some(grid), Some(input), Some(output)) = (
            Self::buffer_for(group, GRID_BINDING),
            Self::buffer_for(group, STATE_IN_BINDING),
            Self::buffer_for(group, STATE_OUT_BINDING),
        ) else {
            tracing::warn!("compute dispatch with incomplete bind group skipped");
            return;
        };

        let size = self.grid_size(grid);
        let cells = self.words(input);
        let mut next = self.words(output);
        let expected = (size as usize).saturating_mul(size as usize);
        if cells.len() < expected || next.len() < expected {
            tracing::warn!(size, "state buffers smaller than grid; dispatch skipped");
            return;
        }

        let columns = size.min(workgroups[0].saturating_mul(workgroup_size[0]));
        let rows = size.min(workgroups[1].saturating_mul(workgroup_size[1]));
        for y in 0..rows {
            for x in 0..columns {
                let index = (y * size + x) as usize;
                let neighbors = live_neighbors(&cells[..expected], size, x, y, pipeline.edges);
                next[index] = next_cell(cells[index], neighbors);
            }
        }

        let mut buffers = self.buffers.borrow_mut();
        if let Some(buffer) = buffers.get_mut(output.0) {
            buffer.data = bytemuck::cast_slice::<u32, u8>(&next).to_vec();
        }
    }

    fn check_bindings(
        &self,
        program: &SoftwareProgram,
        layout: &SoftwareLayout,
    ) -> Result<(), EngineError> {
        for binding in &program.bindings {
            if !layout.slots.iter().any(|slot| slot.binding == *binding) {
                return Err(EngineError::binding(
                    &layout.label,
                    format!(
                        "{} uses binding {binding} which the layout does not declare",
                        program.label
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Edge policy of the built-in simulation program when `source` is that
/// program preprocessed for `workgroup_size`.
fn builtin_rule(source: &str, workgroup_size: [u32; 3]) -> Option<EdgePolicy> {
    [EdgePolicy::Bounded, EdgePolicy::Toroidal]
        .into_iter()
        .find(|&edges| {
            let mut defines = simulation_defines(workgroup_size[0], edges);
            defines.insert("WORKGROUP_SIZE_Y".into(), workgroup_size[1].to_string());
            preprocess(SIMULATION_PROGRAM_WGSL, &defines) == source
        })
}

impl GpuBackend for SoftwareBackend {
    type Buffer = BufferId;
    type BindingLayout = SoftwareLayout;
    type PipelineLayout = SoftwareLayout;
    type BindGroup = SoftwareBindGroup;
    type Program = SoftwareProgram;
    type RenderPipeline = SoftwareRenderPipeline;
    type ComputePipeline = SoftwareComputePipeline;
    type ColorFormat = ();

    fn name(&self) -> &str {
        "software"
    }

    fn color_format(&self) -> Self::ColorFormat {}

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<Self::Buffer, EngineError> {
        if desc.size > self.max_buffer_size {
            return Err(EngineError::allocation(
                desc.label,
                desc.size,
                format!("exceeds maximum buffer size of {} bytes", self.max_buffer_size),
            ));
        }
        let len = usize::try_from(desc.size).map_err(|_| {
            EngineError::allocation(desc.label, desc.size, "not addressable on host")
        })?;
        let mut buffers = self.buffers.borrow_mut();
        buffers.push(HostBuffer {
            label: desc.label.to_string(),
            role: desc.role,
            data: vec![0; len],
        });
        Ok(BufferId(buffers.len() - 1))
    }

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) {
        let mut buffers = self.buffers.borrow_mut();
        let Some(target) = buffers.get_mut(buffer.0) else {
            tracing::warn!(?buffer, "write to unknown buffer ignored");
            return;
        };
        let start = offset as usize;
        let end = start
            .checked_add(data.len())
            .filter(|&end| end <= target.data.len());
        let Some(end) = end else {
            tracing::warn!(
                buffer = %target.label,
                offset,
                len = data.len(),
                "out of range write ignored"
            );
            return;
        };
        target.data[start..end].copy_from_slice(data);
    }

    fn read_buffer(&self, buffer: &Self::Buffer, size: u64) -> Result<Vec<u8>, EngineError> {
        let buffers = self.buffers.borrow();
        let source = buffers
            .get(buffer.0)
            .ok_or_else(|| EngineError::readback("unknown buffer", "no such buffer"))?;
        let len = usize::try_from(size)
            .ok()
            .filter(|&len| len <= source.data.len())
            .ok_or_else(|| {
                EngineError::readback(
                    &source.label,
                    format!("requested {size} bytes from a {} byte buffer", source.data.len()),
                )
            })?;
        Ok(source.data[..len].to_vec())
    }

    fn compile_program(&self, label: &str, source: &str) -> Result<Self::Program, EngineError> {
        let module = validate_wgsl(label, source)?;
        let entry_points: Vec<EntryPoint> = module
            .entry_points
            .iter()
            .map(|ep| EntryPoint {
                name: ep.name.clone(),
                stage: ep.stage,
                workgroup_size: ep.workgroup_size,
            })
            .collect();
        let mut bindings: Vec<u32> = module
            .global_variables
            .iter()
            .filter_map(|(_, global)| global.binding.as_ref())
            .filter(|binding| binding.group == 0)
            .map(|binding| binding.binding)
            .collect();
        bindings.sort_unstable();
        bindings.dedup();
        let rule = entry_points
            .iter()
            .find(|ep| ep.stage == naga::ShaderStage::Compute)
            .and_then(|ep| builtin_rule(source, ep.workgroup_size));
        Ok(SoftwareProgram {
            label: label.to_string(),
            entry_points,
            bindings,
            rule,
        })
    }

    fn create_binding_layout(&self, label: &str, slots: &[BindingSlot]) -> Self::BindingLayout {
        SoftwareLayout {
            label: label.to_string(),
            slots: slots.to_vec(),
        }
    }

    fn create_pipeline_layout(
        &self,
        _label: &str,
        layout: &Self::BindingLayout,
    ) -> Self::PipelineLayout {
        layout.clone()
    }

    fn create_render_pipeline(
        &self,
        desc: &RenderPipelineDesc<'_, Self>,
    ) -> Result<Self::RenderPipeline, EngineError> {
        desc.program.entry(desc.vertex_entry, naga::ShaderStage::Vertex)?;
        desc.program.entry(desc.fragment_entry, naga::ShaderStage::Fragment)?;
        self.check_bindings(desc.program, desc.layout)?;
        Ok(SoftwareRenderPipeline {
            label: desc.label.to_string(),
        })
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc<'_, Self>,
    ) -> Result<Self::ComputePipeline, EngineError> {
        let entry = desc.program.entry(desc.entry, naga::ShaderStage::Compute)?;
        self.check_bindings(desc.program, desc.layout)?;
        let edges = desc.program.rule.ok_or_else(|| {
            EngineError::program_load(
                &desc.program.label,
                "the software backend only executes the built-in simulation program",
            )
        })?;
        Ok(SoftwareComputePipeline {
            label: desc.label.to_string(),
            workgroup_size: entry.workgroup_size,
            edges,
        })
    }

    fn create_bind_group(
        &self,
        label: &str,
        layout: &Self::BindingLayout,
        entries: &[BindGroupEntry<'_, Self>],
    ) -> Result<Self::BindGroup, EngineError> {
        if entries.len() != layout.slots.len() {
            return Err(EngineError::binding(
                label,
                format!("{} entries for {} layout slots", entries.len(), layout.slots.len()),
            ));
        }
        let buffers = self.buffers.borrow();
        let mut bound = Vec::with_capacity(entries.len());
        for slot in &layout.slots {
            let entry = entries
                .iter()
                .find(|entry| entry.binding == slot.binding)
                .ok_or_else(|| {
                    EngineError::binding(label, format!("binding {} is unset", slot.binding))
                })?;
            let buffer = buffers.get(entry.buffer.0).ok_or_else(|| {
                EngineError::binding(
                    label,
                    format!("binding {} names an unknown buffer", slot.binding),
                )
            })?;
            let expected = match slot.kind {
                BindingKind::Uniform => BufferRole::Uniform,
                BindingKind::ReadOnlyStorage | BindingKind::Storage => BufferRole::State,
            };
            if buffer.role != expected {
                return Err(EngineError::binding(
                    label,
                    format!(
                        "{} has role {:?}, binding {} needs {expected:?}",
                        buffer.label, buffer.role, slot.binding
                    ),
                ));
            }
            if (buffer.data.len() as u64) < slot.min_size {
                return Err(EngineError::binding(
                    label,
                    format!(
                        "{} is smaller than binding {} requires",
                        buffer.label, slot.binding
                    ),
                ));
            }
            bound.push((slot.binding, *entry.buffer));
        }
        bound.sort_unstable_by_key(|(binding, _)| *binding);
        Ok(SoftwareBindGroup { entries: bound })
    }

    fn submit(&self, frame: &FrameCommands<'_, Self>) {
        let mut stats = self.stats.get();
        if let Some(compute) = &frame.compute {
            tracing::trace!(
                pipeline = %compute.pipeline.label,
                workgroups = ?compute.workgroups,
                "dispatch"
            );
            self.dispatch(compute.bind_group, compute.pipeline, compute.workgroups);
            stats.dispatches += 1;
        }

        let render = &frame.render;
        let live = Self::buffer_for(render.bind_group, STATE_IN_BINDING)
            .map(|id| {
                self.words(id)
                    .iter()
                    .take(render.instance_count as usize)
                    .filter(|&&cell| cell != DEAD)
                    .count() as u64
            })
            .unwrap_or(0);
        tracing::trace!(
            pipeline = %render.pipeline.label,
            instances = render.instance_count,
            live,
            "draw"
        );
        stats.frames += 1;
        stats.last_instance_count = render.instance_count;
        stats.last_live_cells = live;
        stats.last_clear_color = render.clear_color;
        self.stats.set(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::pipeline::binding_slots;
    use crate::program::CELL_PROGRAM_WGSL;

    const COPY_PROGRAM_WGSL: &str = r"@group(0) @binding(0) var<uniform> grid: vec2f;
@group(0) @binding(1) var<storage> cellStateIn: array<u32>;
@group(0) @binding(2) var<storage, read_write> cellStateOut: array<u32>;

@compute @workgroup_size(8, 8)
fn computeMain(@builtin(global_invocation_id) cell: vec3u) {
    let i = cell.y * u32(grid.x) + cell.x;
    cellStateOut[i] = cellStateIn[i];
}
";

    fn compute_pipeline(
        backend: &SoftwareBackend,
        source: &str,
    ) -> Result<SoftwareComputePipeline, EngineError> {
        let program = backend.compile_program("simulation", source)?;
        let layout = backend.create_binding_layout("layout", &binding_slots(64));
        backend.create_compute_pipeline(&ComputePipelineDesc {
            label: "Simulation pipeline",
            layout: &layout,
            program: &program,
            entry: "computeMain",
        })
    }

    #[test]
    fn buffers_start_zeroed_and_accept_writes() {
        let backend = SoftwareBackend::new();
        let id = backend
            .create_buffer(&BufferDesc {
                label: "scratch",
                size: 8,
                role: BufferRole::State,
            })
            .unwrap();
        assert_eq!(backend.read_buffer(&id, 8).unwrap(), vec![0; 8]);
        backend.write_buffer(&id, 4, &[1, 2, 3, 4]);
        assert_eq!(backend.read_buffer(&id, 8).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn out_of_range_write_is_dropped() {
        let backend = SoftwareBackend::new();
        let id = backend
            .create_buffer(&BufferDesc {
                label: "scratch",
                size: 4,
                role: BufferRole::State,
            })
            .unwrap();
        backend.write_buffer(&id, 2, &[9, 9, 9, 9]);
        assert_eq!(backend.read_buffer(&id, 4).unwrap(), vec![0; 4]);
    }

    #[test]
    fn oversized_readback_fails() {
        let backend = SoftwareBackend::new();
        let id = backend
            .create_buffer(&BufferDesc {
                label: "scratch",
                size: 4,
                role: BufferRole::State,
            })
            .unwrap();
        assert!(matches!(
            backend.read_buffer(&id, 8),
            Err(EngineError::Readback { .. })
        ));
    }

    #[test]
    fn compiled_programs_expose_entry_points_and_bindings() {
        let backend = SoftwareBackend::new();
        let cell = backend.compile_program("cell", CELL_PROGRAM_WGSL).unwrap();
        assert_eq!(cell.bindings, vec![0, 1]);
        assert!(cell.entry("vertexMain", naga::ShaderStage::Vertex).is_ok());
        assert!(cell.entry("vertexMain", naga::ShaderStage::Fragment).is_err());

        let defines = simulation_defines(4, EdgePolicy::Bounded);
        let text = preprocess(SIMULATION_PROGRAM_WGSL, &defines);
        let simulation = backend.compile_program("simulation", &text).unwrap();
        assert_eq!(simulation.bindings, vec![0, 1, 2]);
        let compute = simulation.entry("computeMain", naga::ShaderStage::Compute).unwrap();
        assert_eq!(compute.workgroup_size, [4, 4, 1]);
    }

    #[test]
    fn broken_source_is_a_program_load_error() {
        let backend = SoftwareBackend::new();
        assert!(matches!(
            backend.compile_program("broken", "fn main( {"),
            Err(EngineError::ProgramLoad { .. })
        ));
    }

    #[test]
    fn edge_policy_comes_from_the_program() {
        let backend = SoftwareBackend::new();
        for edges in [EdgePolicy::Bounded, EdgePolicy::Toroidal] {
            let text = preprocess(SIMULATION_PROGRAM_WGSL, &simulation_defines(8, edges));
            let pipeline = compute_pipeline(&backend, &text).unwrap();
            assert_eq!(pipeline.edges, edges);
            assert_eq!(pipeline.workgroup_size, [8, 8, 1]);
        }
    }

    #[test]
    fn foreign_compute_program_is_refused() {
        let backend = SoftwareBackend::new();
        let program = backend.compile_program("copy", COPY_PROGRAM_WGSL).unwrap();
        assert!(program.rule.is_none());
        assert!(matches!(
            compute_pipeline(&backend, COPY_PROGRAM_WGSL),
            Err(EngineError::ProgramLoad { .. })
        ));
    }
}
