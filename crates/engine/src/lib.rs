//! Engine crate for lifegrid, a GPU Game of Life.
//!
//! The crate orchestrates a compute-then-render frame over two ping-pong
//! state buffers:
//!
//! ```text
//!   lifegrid CLI
//!        │ LifeConfig
//!        ▼
//!   Simulation::initialize ──▶ resources + pipeline (build time)
//!        │
//!        ▼
//!   start / step / reset ──▶ advance_frame() ──▶ GpuBackend::submit
//!        ▲                                          │ compute: buffers[step % 2] → other
//!        │                                          └ render:  draw buffer just written
//!   FrameScheduler (interval, then display refresh)
//! ```
//!
//! The device sits behind [`GpuBackend`]: [`WgpuBackend`] draws to a window
//! or an offscreen texture, [`SoftwareBackend`] evaluates the same rule on
//! the CPU. Programs are WGSL, preprocessed with symbolic defines and
//! validated before the backend compiles them.

mod error;
pub mod gpu;
mod headless;
pub mod life;
pub mod program;
mod simulation;
mod window;

pub use error::EngineError;
pub use gpu::{AdapterSummary, GpuBackend, RenderStats, SoftwareBackend, WgpuBackend};
pub use headless::{cross_check, run_headless, CrossCheckReport, Divergence, HeadlessReport};
pub use life::{fresh_seed, RandomSeed, SeedPolicy, UniformSeed};
pub use program::{ProgramLoader, ProgramSet, ProgramSource, WgslLoader};
pub use simulation::{Simulation, SimulationOptions, SimulationState};
pub use window::{control_for_key, run_window, window_title, Control};
pub use winit::dpi::PhysicalSize;
