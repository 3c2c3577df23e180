//! The simulation orchestrator.
//!
//! A [`Simulation`] owns every GPU resource of one grid, the step counter and
//! the pending frame continuation. Each frame is a single submission: a
//! compute dispatch reading `buffers[step % 2]` and writing the other buffer,
//! then a render pass drawing the freshly written buffer.
//!
//! ```text
//!   Ready ──start──▶ Running ◀──start/reset── Paused
//!     │                │  ▲                     ▲
//!     └──step──────────┼──┼─────────────────────┤
//!                      └──┴──stop / step────────┘
//! ```

use std::fmt;
use std::time::Duration;

use lifeconfig::LifeConfig;
use scheduler::{FrameScheduler, FrameToken};

use crate::error::EngineError;
use crate::gpu::pipeline::{
    self, create_bind_group_pair, create_binding_layout, create_compute_pipeline,
    create_pipeline_layout, create_render_pipeline, BindGroupPair,
};
use crate::gpu::resources::{
    cell_count, create_geometry, create_state_buffers, create_uniform_grid, decode_cells,
    seed_cells, state_buffer_size, upload_cells, Geometry, GpuBuffer, CELL_VERTEX_LAYOUT,
};
use crate::gpu::{ComputePass, FrameCommands, GpuBackend, RenderPass};
use crate::life::{RandomSeed, SeedPolicy};
use crate::program::{simulation_defines, Defines, ProgramLoader, ProgramSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationState {
    /// Built, nothing drawn yet.
    Ready,
    /// A continuation is pending.
    Running,
    Paused,
}

impl fmt::Display for SimulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Paused => "paused",
        };
        f.write_str(label)
    }
}

/// Everything [`Simulation::initialize`] needs besides the backend and
/// scheduler.
pub struct SimulationOptions {
    pub config: LifeConfig,
    pub programs: ProgramSet,
    pub seed: Box<dyn SeedPolicy>,
}

impl SimulationOptions {
    /// Built-in programs and a random seed drawn from the config.
    pub fn from_config(config: LifeConfig) -> Self {
        let seed = Box::new(RandomSeed::from_config(&config.seed));
        Self {
            config,
            programs: ProgramSet::default(),
            seed,
        }
    }

    pub fn with_seed(mut self, seed: impl SeedPolicy + 'static) -> Self {
        self.seed = Box::new(seed);
        self
    }

    pub fn with_programs(mut self, programs: ProgramSet) -> Self {
        self.programs = programs;
        self
    }
}

pub struct Simulation<B: GpuBackend, S: FrameScheduler> {
    backend: B,
    scheduler: S,
    grid_size: u32,
    cell_count: u32,
    workgroups: [u32; 3],
    interval: Duration,
    background: [f64; 4],
    geometry: Geometry<B>,
    _grid_uniform: GpuBuffer<B>,
    state_buffers: [GpuBuffer<B>; 2],
    bind_groups: BindGroupPair<B>,
    render_pipeline: B::RenderPipeline,
    compute_pipeline: B::ComputePipeline,
    seed: Box<dyn SeedPolicy>,
    step: u64,
    state: SimulationState,
    pending: Option<FrameToken>,
}

impl<B: GpuBackend, S: FrameScheduler> Simulation<B, S> {
    /// Allocates resources, loads both programs and wires the pipelines.
    /// Nothing is submitted until the first frame is requested.
    pub fn initialize<L: ProgramLoader<B>>(
        backend: B,
        scheduler: S,
        loader: &L,
        options: SimulationOptions,
    ) -> Result<Self, EngineError> {
        let SimulationOptions {
            config,
            programs,
            mut seed,
        } = options;
        let size = config.grid.size;
        let workgroup = config.compute.workgroup_size.max(1);
        let state_size = state_buffer_size(size)?;
        let cells = cell_count(size).ok_or_else(|| {
            EngineError::allocation("Cell state A", state_size, "cell count exceeds u32")
        })?;

        let geometry = create_geometry(&backend, config.render.cell_scale)?;
        let grid_uniform = create_uniform_grid(&backend, size)?;
        let state_buffers = create_state_buffers(&backend, size, seed.as_mut())?;

        let binding_layout = create_binding_layout(&backend, state_size);
        let pipeline_layout = create_pipeline_layout(&backend, &binding_layout);
        let cell_program = loader.load(&backend, &programs.cell, &Defines::new())?;
        let simulation_program = loader.load(
            &backend,
            &programs.simulation,
            &simulation_defines(workgroup, config.grid.edges),
        )?;
        let render_pipeline = create_render_pipeline(
            &backend,
            &pipeline_layout,
            &cell_program,
            &CELL_VERTEX_LAYOUT,
            backend.color_format(),
        )?;
        let compute_pipeline =
            create_compute_pipeline(&backend, &pipeline_layout, &simulation_program)?;
        let bind_groups =
            create_bind_group_pair(&backend, &binding_layout, &grid_uniform, &state_buffers)?;

        let per_axis = size.div_ceil(workgroup);
        tracing::info!(
            backend = backend.name(),
            grid = size,
            workgroup,
            edges = %config.grid.edges,
            interval = ?config.timing.interval,
            "simulation initialised"
        );

        Ok(Self {
            backend,
            scheduler,
            grid_size: size,
            cell_count: cells,
            workgroups: [per_axis, per_axis, 1],
            interval: config.timing.interval,
            background: config.render.background,
            geometry,
            _grid_uniform: grid_uniform,
            state_buffers,
            bind_groups,
            render_pipeline,
            compute_pipeline,
            seed,
            step: 0,
            state: SimulationState::Ready,
            pending: None,
        })
    }

    /// Submits one frame: compute from the authoritative buffer, bump the
    /// step, then draw the buffer just written.
    pub fn advance_frame(&mut self) {
        let compute = self.bind_groups.for_step(self.step);
        self.step += 1;
        let render = self.bind_groups.for_step(self.step);
        debug_assert_eq!(compute.write, render.read);

        self.backend.submit(&FrameCommands {
            compute: Some(ComputePass {
                pipeline: &self.compute_pipeline,
                bind_group: &compute.group,
                workgroups: self.workgroups,
            }),
            render: self.render_pass(&render.group),
        });
        tracing::trace!(step = self.step, "advanced frame");
    }

    /// Starts the animation. Advances immediately, then keeps advancing once
    /// per interval. Does nothing while already running.
    pub fn start(&mut self) {
        if self.state == SimulationState::Running {
            return;
        }
        tracing::info!(step = self.step, "simulation started");
        self.state = SimulationState::Running;
        self.advance_frame();
        self.schedule_next();
    }

    /// Entry point for a fired continuation. Returns whether a frame was
    /// advanced; stale or cancelled tokens are ignored.
    pub fn on_frame_due(&mut self, token: FrameToken) -> bool {
        if self.state != SimulationState::Running || self.pending != Some(token) {
            tracing::trace!(token = token.id(), "ignoring stale frame token");
            return false;
        }
        self.pending = None;
        self.advance_frame();
        self.schedule_next();
        true
    }

    /// Cancels the pending continuation. Work already submitted still runs.
    pub fn stop(&mut self) {
        if let Some(token) = self.pending.take() {
            self.scheduler.cancel(token);
        }
        if self.state == SimulationState::Running {
            self.state = SimulationState::Paused;
            tracing::info!(step = self.step, "simulation stopped");
        }
    }

    /// Stops, zeroes the step counter, seeds buffer 0, advances once and
    /// resumes the schedule.
    pub fn reset(&mut self) {
        self.stop();
        self.step = 0;
        let cells = seed_cells(self.grid_size, self.seed.as_mut());
        upload_cells(&self.backend, &self.state_buffers[0], &cells);
        self.advance_frame();
        tracing::info!("simulation reset");
        self.resume();
    }

    /// Advances exactly one frame and leaves the simulation paused.
    pub fn step(&mut self) {
        self.stop();
        self.advance_frame();
        self.state = SimulationState::Paused;
    }

    pub fn toggle(&mut self) {
        if self.state == SimulationState::Running {
            self.stop();
        } else {
            self.start();
        }
    }

    /// Draws the authoritative buffer again without advancing.
    pub fn redraw(&self) {
        let group = self.bind_groups.for_step(self.step);
        self.backend.submit(&FrameCommands {
            compute: None,
            render: self.render_pass(&group.group),
        });
    }

    pub fn current_step(&self) -> u64 {
        self.step
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SimulationState::Running
    }

    /// Index of the authoritative state buffer.
    pub fn parity(&self) -> usize {
        pipeline::parity(self.step)
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    pub fn cell_count(&self) -> u32 {
        self.cell_count
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state_buffer_size(&self) -> u64 {
        self.state_buffers[0].size
    }

    pub fn pending_frame(&self) -> Option<FrameToken> {
        self.pending
    }

    /// Contents of the authoritative state buffer.
    pub fn snapshot(&self) -> Result<Vec<u32>, EngineError> {
        self.read_state_buffer(self.parity())
    }

    pub fn read_state_buffer(&self, index: usize) -> Result<Vec<u32>, EngineError> {
        let buffer = self.state_buffers.get(index).ok_or_else(|| {
            EngineError::readback("state buffer", format!("no state buffer {index}"))
        })?;
        let bytes = self.backend.read_buffer(&buffer.handle, buffer.size)?;
        Ok(decode_cells(&bytes))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    fn render_pass<'a>(&'a self, group: &'a B::BindGroup) -> RenderPass<'a, B> {
        RenderPass {
            pipeline: &self.render_pipeline,
            bind_group: group,
            vertex_buffer: &self.geometry.buffer.handle,
            vertex_count: self.geometry.vertex_count,
            instance_count: self.cell_count,
            clear_color: self.background,
        }
    }

    fn schedule_next(&mut self) {
        let token = self.scheduler.schedule_next(self.interval);
        tracing::trace!(token = token.id(), delay = ?self.interval, "scheduled frame");
        self.pending = Some(token);
    }

    fn resume(&mut self) {
        self.state = SimulationState::Running;
        self.schedule_next();
    }
}
