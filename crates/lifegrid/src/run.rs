use anyhow::{bail, Context, Result};
use engine::{
    cross_check, fresh_seed, CrossCheckReport, GpuBackend, HeadlessReport, PhysicalSize,
    ProgramSet, Simulation, SimulationOptions, SoftwareBackend, WgpuBackend, WgslLoader,
};
use lifeconfig::LifeConfig;
use scheduler::{FrameScheduler, ManualScheduler, PacedScheduler};
use tracing_subscriber::EnvFilter;

use crate::cli::{BackendChoice, ConfigArgs, HeadlessArgs, VerifyArgs};
use crate::paths::AppPaths;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the configuration file, then layers command-line overrides on top.
/// An explicit `--config` must exist; the default location may be absent.
pub fn resolve_config(args: &ConfigArgs) -> Result<LifeConfig> {
    let mut config = match &args.config {
        Some(path) => LifeConfig::from_path(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => {
            let paths = AppPaths::discover()?;
            let path = paths.config_file();
            tracing::debug!(config = %path.display(), "resolved lifegrid config path");
            LifeConfig::load_or_default(&path)
                .with_context(|| format!("failed to load configuration {}", path.display()))?
        }
    };
    args.apply(&mut config);
    config
        .validate()
        .context("invalid configuration after applying command-line overrides")?;
    Ok(config)
}

pub fn run_window(config: LifeConfig, programs: ProgramSet) -> Result<()> {
    tracing::info!(grid = config.grid.size, "bootstrapping lifegrid window");
    engine::run_window(config, programs)
}

pub fn run_headless(config: LifeConfig, programs: ProgramSet, args: &HeadlessArgs) -> Result<()> {
    let report = match args.backend {
        BackendChoice::Software => {
            let backend = SoftwareBackend::new();
            let mut simulation = initialise(backend, PacedScheduler::new(), config, programs)?;
            engine::run_headless(&mut simulation, args.frames)?
        }
        BackendChoice::Wgpu => {
            let backend = WgpuBackend::headless(offscreen_size(&config))?;
            log_adapter(&backend);
            let mut simulation = initialise(backend, PacedScheduler::new(), config, programs)?;
            engine::run_headless(&mut simulation, args.frames)?
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", describe_headless(&report));
    }
    Ok(())
}

/// Runs the same seeded grid on the GPU and on the CPU and fails when the
/// two ever disagree.
pub fn run_verify(mut config: LifeConfig, programs: ProgramSet, args: &VerifyArgs) -> Result<()> {
    let seed = *config.seed.seed.get_or_insert_with(fresh_seed);
    tracing::info!(seed, frames = args.frames, "verifying GPU against software backend");

    let gpu_backend = WgpuBackend::headless(offscreen_size(&config))?;
    log_adapter(&gpu_backend);
    let mut gpu = initialise(
        gpu_backend,
        ManualScheduler::new(),
        config.clone(),
        programs.clone(),
    )?;
    let mut cpu = initialise(
        SoftwareBackend::new(),
        ManualScheduler::new(),
        config,
        programs,
    )?;

    let report = cross_check(&mut gpu, &mut cpu, args.frames)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", describe_cross_check(&report, seed));
    }
    if !report.passed() {
        bail!("{} and {} backends diverged", report.left, report.right);
    }
    Ok(())
}

pub fn print_config(config: &LifeConfig) -> Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn initialise<B: GpuBackend, S: FrameScheduler>(
    backend: B,
    scheduler: S,
    config: LifeConfig,
    programs: ProgramSet,
) -> Result<Simulation<B, S>> {
    let options = SimulationOptions::from_config(config).with_programs(programs);
    Simulation::initialize(backend, scheduler, &WgslLoader, options)
        .context("failed to initialise simulation")
}

fn offscreen_size(config: &LifeConfig) -> PhysicalSize<u32> {
    let [width, height] = config.render.window;
    PhysicalSize::new(width, height)
}

fn log_adapter(backend: &WgpuBackend) {
    let adapter = backend.adapter();
    tracing::info!(
        adapter = %adapter.name,
        backend = %adapter.backend,
        device_type = %adapter.device_type,
        "using GPU adapter"
    );
}

fn describe_headless(report: &HeadlessReport) -> String {
    format!(
        "backend:    {}\ngrid:       {size}x{size}\nsteps:      {}\nlive cells: {}\nelapsed:    {:.1} ms\n",
        report.backend,
        report.steps,
        report.live_cells,
        report.elapsed_ms,
        size = report.grid_size,
    )
}

fn describe_cross_check(report: &CrossCheckReport, seed: u64) -> String {
    match report.divergence {
        None => format!(
            "{} matches {} for {} frames (seed {seed})\n",
            report.left, report.right, report.frames
        ),
        Some(divergence) => format!(
            "{} and {} diverged at step {} ({} cells differ, seed {seed})\n",
            report.left, report.right, divergence.step, divergence.differing_cells
        ),
    }
}

#[cfg(test)]
mod tests {
    use engine::Divergence;

    use super::*;

    #[test]
    fn headless_summary_lists_each_field() {
        let report = HeadlessReport {
            backend: "software".into(),
            grid_size: 32,
            steps: 10,
            live_cells: 123,
            elapsed_ms: 4.25,
        };
        let text = describe_headless(&report);
        assert!(text.contains("backend:    software"));
        assert!(text.contains("grid:       32x32"));
        assert!(text.contains("steps:      10"));
        assert!(text.contains("live cells: 123"));
        assert!(text.contains("elapsed:    4.2 ms") || text.contains("elapsed:    4.3 ms"));
    }

    #[test]
    fn cross_check_summary_reports_divergence() {
        let mut report = CrossCheckReport {
            left: "wgpu".into(),
            right: "software".into(),
            frames: 8,
            divergence: None,
        };
        assert_eq!(
            describe_cross_check(&report, 7),
            "wgpu matches software for 8 frames (seed 7)\n"
        );
        report.divergence = Some(Divergence {
            step: 3,
            differing_cells: 2,
        });
        assert_eq!(
            describe_cross_check(&report, 7),
            "wgpu and software diverged at step 3 (2 cells differ, seed 7)\n"
        );
    }

    #[test]
    fn initialise_builds_a_software_simulation() {
        let mut config = LifeConfig::default();
        config.grid.size = 8;
        let simulation = initialise(
            SoftwareBackend::new(),
            ManualScheduler::new(),
            config,
            ProgramSet::default(),
        )
        .unwrap();
        assert_eq!(simulation.grid_size(), 8);
        assert_eq!(simulation.current_step(), 0);
    }
}
