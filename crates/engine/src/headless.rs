//! Running a simulation without a window.
//!
//! With no display there is no refresh to wait for, so the paced scheduler's
//! refresh request is answered immediately once the interval has elapsed.

use std::time::Instant;

use scheduler::{FrameScheduler, PacedScheduler, PollOutcome};
use serde::Serialize;

use crate::error::EngineError;
use crate::gpu::GpuBackend;
use crate::life::count_alive;
use crate::simulation::Simulation;

/// Summary printed by `lifegrid headless`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeadlessReport {
    pub backend: String,
    pub grid_size: u32,
    pub steps: u64,
    pub live_cells: u64,
    pub elapsed_ms: f64,
}

/// Starts the simulation and lets the paced scheduler drive it until
/// `frames` frames have been advanced.
pub fn run_headless<B: GpuBackend>(
    simulation: &mut Simulation<B, PacedScheduler>,
    frames: u64,
) -> Result<HeadlessReport, EngineError> {
    let started = Instant::now();
    if frames > 0 {
        simulation.start();
    }

    while simulation.current_step() < frames {
        let now = Instant::now();
        match simulation.scheduler_mut().poll(now) {
            PollOutcome::Idle => break,
            PollOutcome::Waiting(deadline) => {
                std::thread::sleep(deadline.saturating_duration_since(now));
            }
            PollOutcome::RefreshNeeded => {
                if let Some(token) = simulation.scheduler_mut().on_refresh() {
                    simulation.on_frame_due(token);
                }
            }
        }
    }
    simulation.stop();

    let cells = simulation.snapshot()?;
    let report = HeadlessReport {
        backend: simulation.backend().name().to_string(),
        grid_size: simulation.grid_size(),
        steps: simulation.current_step(),
        live_cells: count_alive(&cells),
        elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
    };
    tracing::info!(
        backend = %report.backend,
        steps = report.steps,
        live = report.live_cells,
        "headless run finished"
    );
    Ok(report)
}

/// First step at which two simulations disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Divergence {
    pub step: u64,
    pub differing_cells: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossCheckReport {
    pub left: String,
    pub right: String,
    pub frames: u64,
    pub divergence: Option<Divergence>,
}

impl CrossCheckReport {
    pub fn passed(&self) -> bool {
        self.divergence.is_none()
    }
}

/// Advances two simulations in lockstep and compares their authoritative
/// buffers after every frame, starting with the seeded state.
pub fn cross_check<A, SA, B, SB>(
    left: &mut Simulation<A, SA>,
    right: &mut Simulation<B, SB>,
    frames: u64,
) -> Result<CrossCheckReport, EngineError>
where
    A: GpuBackend,
    SA: FrameScheduler,
    B: GpuBackend,
    SB: FrameScheduler,
{
    let mut report = CrossCheckReport {
        left: left.backend().name().to_string(),
        right: right.backend().name().to_string(),
        frames: 0,
        divergence: None,
    };

    loop {
        let ours = left.snapshot()?;
        let theirs = right.snapshot()?;
        let differing_cells = ours
            .iter()
            .zip(&theirs)
            .filter(|(a, b)| a != b)
            .count()
            + ours.len().abs_diff(theirs.len());
        if differing_cells > 0 {
            let step = left.current_step();
            tracing::warn!(step, differing_cells, "backends diverged");
            report.divergence = Some(Divergence {
                step,
                differing_cells,
            });
            return Ok(report);
        }
        if report.frames == frames {
            return Ok(report);
        }
        left.step();
        right.step();
        report.frames += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lifeconfig::{EdgePolicy, LifeConfig};
    use scheduler::ManualScheduler;

    use super::*;
    use crate::gpu::SoftwareBackend;
    use crate::life::UniformSeed;
    use crate::program::WgslLoader;
    use crate::simulation::SimulationOptions;

    fn config(size: u32) -> LifeConfig {
        let mut config = LifeConfig::default();
        config.grid.size = size;
        config.timing.interval = Duration::ZERO;
        config.seed.seed = Some(5);
        config
    }

    #[test]
    fn headless_runs_requested_frames() {
        let options = SimulationOptions::from_config(config(8));
        let mut sim = Simulation::initialize(
            SoftwareBackend::new(),
            PacedScheduler::new(),
            &WgslLoader,
            options,
        )
        .unwrap();
        let report = run_headless(&mut sim, 3).unwrap();
        assert_eq!(report.steps, 3);
        assert_eq!(report.backend, "software");
        assert_eq!(report.grid_size, 8);
        assert!(!sim.is_running());
        assert!(sim.scheduler().is_idle());
    }

    #[test]
    fn zero_frames_leaves_the_seed() {
        let options = SimulationOptions::from_config(config(4)).with_seed(UniformSeed(true));
        let mut sim = Simulation::initialize(
            SoftwareBackend::new(),
            PacedScheduler::new(),
            &WgslLoader,
            options,
        )
        .unwrap();
        let report = run_headless(&mut sim, 0).unwrap();
        assert_eq!(report.steps, 0);
        assert_eq!(report.live_cells, 16);
    }

    #[test]
    fn identical_backends_agree() {
        let build = || {
            Simulation::initialize(
                SoftwareBackend::new(),
                ManualScheduler::new(),
                &WgslLoader,
                SimulationOptions::from_config(config(16)),
            )
            .unwrap()
        };
        let (mut left, mut right) = (build(), build());
        let report = cross_check(&mut left, &mut right, 10).unwrap();
        assert!(report.passed());
        assert_eq!(report.frames, 10);
        assert_eq!(left.current_step(), 10);
    }

    #[test]
    fn differing_edge_policies_diverge() {
        let build = |edges| {
            let mut config = config(4);
            config.grid.edges = edges;
            Simulation::initialize(
                SoftwareBackend::new(),
                ManualScheduler::new(),
                &WgslLoader,
                SimulationOptions::from_config(config).with_seed(UniformSeed(true)),
            )
            .unwrap()
        };
        let mut bounded = build(EdgePolicy::Bounded);
        let mut toroidal = build(EdgePolicy::Toroidal);
        let report = cross_check(&mut bounded, &mut toroidal, 5).unwrap();
        assert_eq!(
            report.divergence,
            Some(Divergence {
                step: 1,
                differing_cells: 4,
            })
        );
    }
}
