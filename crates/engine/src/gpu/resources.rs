//! Buffers created once per simulation: cell geometry, the grid uniform and
//! the two ping-pong state buffers.

use bytemuck::{Pod, Zeroable};

use crate::error::EngineError;
use crate::life::{SeedPolicy, DEAD};

use super::backend::{BufferDesc, BufferRole, GpuBackend, VertexLayout};

pub const CELL_VERTICES_LABEL: &str = "Cell vertices";
pub const GRID_UNIFORM_LABEL: &str = "Grid uniforms";
pub const STATE_BUFFER_LABELS: [&str; 2] = ["Cell state A", "Cell state B"];

pub const CELL_VERTEX_LAYOUT: VertexLayout = VertexLayout {
    array_stride: std::mem::size_of::<[f32; 2]>() as u64,
    shader_location: 0,
};

/// Grid dimensions as seen by both programs (`vec2f`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GridUniform {
    pub size: [f32; 2],
}

impl GridUniform {
    pub fn square(size: u32) -> Self {
        Self {
            size: [size as f32, size as f32],
        }
    }
}

pub struct GpuBuffer<B: GpuBackend> {
    pub handle: B::Buffer,
    pub size: u64,
    pub label: &'static str,
}

pub struct Geometry<B: GpuBackend> {
    pub buffer: GpuBuffer<B>,
    pub vertex_count: u32,
}

/// Two triangles spanning `[-scale, scale]` on both axes.
pub fn cell_vertices(scale: f32) -> [[f32; 2]; 6] {
    [
        [-scale, -scale],
        [scale, -scale],
        [scale, scale],
        [-scale, -scale],
        [scale, scale],
        [-scale, scale],
    ]
}

pub fn create_geometry<B: GpuBackend>(backend: &B, scale: f32) -> Result<Geometry<B>, EngineError> {
    let vertices = cell_vertices(scale);
    let bytes: &[u8] = bytemuck::cast_slice(&vertices);
    let buffer = allocate(backend, CELL_VERTICES_LABEL, bytes.len() as u64, BufferRole::Vertex)?;
    backend.write_buffer(&buffer.handle, 0, bytes);
    Ok(Geometry {
        buffer,
        vertex_count: vertices.len() as u32,
    })
}

pub fn create_uniform_grid<B: GpuBackend>(
    backend: &B,
    size: u32,
) -> Result<GpuBuffer<B>, EngineError> {
    let uniform = GridUniform::square(size);
    let bytes = bytemuck::bytes_of(&uniform);
    let buffer = allocate(backend, GRID_UNIFORM_LABEL, bytes.len() as u64, BufferRole::Uniform)?;
    backend.write_buffer(&buffer.handle, 0, bytes);
    Ok(buffer)
}

/// Number of cells in an `size` x `size` grid, if it fits in a `u32`.
pub fn cell_count(size: u32) -> Option<u32> {
    size.checked_mul(size)
}

/// Bytes needed for one state buffer: four per cell.
pub fn state_buffer_size(size: u32) -> Result<u64, EngineError> {
    cell_count(size)
        .and_then(|cells| u64::from(cells).checked_mul(std::mem::size_of::<u32>() as u64))
        .filter(|&bytes| bytes > 0)
        .ok_or_else(|| {
            EngineError::allocation(
                STATE_BUFFER_LABELS[0],
                0,
                format!("grid size {size} does not yield a representable state buffer"),
            )
        })
}

/// Runs a seed policy over a fresh, all-dead grid.
pub fn seed_cells(size: u32, seed: &mut dyn SeedPolicy) -> Vec<u32> {
    let cells = cell_count(size).unwrap_or(0) as usize;
    let mut scratch = vec![DEAD; cells];
    seed.fill(&mut scratch);
    scratch
}

pub fn decode_cells(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        .collect()
}

pub fn upload_cells<B: GpuBackend>(backend: &B, buffer: &GpuBuffer<B>, cells: &[u32]) {
    backend.write_buffer(&buffer.handle, 0, bytemuck::cast_slice(cells));
}

/// Allocates both state buffers and uploads the seeded pattern into the
/// first. The second is left as the backend allocated it.
pub fn create_state_buffers<B: GpuBackend>(
    backend: &B,
    size: u32,
    seed: &mut dyn SeedPolicy,
) -> Result<[GpuBuffer<B>; 2], EngineError> {
    let bytes = state_buffer_size(size)?;
    let a = allocate(backend, STATE_BUFFER_LABELS[0], bytes, BufferRole::State)?;
    let b = allocate(backend, STATE_BUFFER_LABELS[1], bytes, BufferRole::State)?;
    upload_cells(backend, &a, &seed_cells(size, seed));
    Ok([a, b])
}

fn allocate<B: GpuBackend>(
    backend: &B,
    label: &'static str,
    size: u64,
    role: BufferRole,
) -> Result<GpuBuffer<B>, EngineError> {
    let handle = backend.create_buffer(&BufferDesc { label, size, role })?;
    tracing::debug!(buffer = label, size, ?role, "allocated buffer");
    Ok(GpuBuffer {
        handle,
        size,
        label,
    })
}
