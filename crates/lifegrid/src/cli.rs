use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use engine::{ProgramSet, ProgramSource};
use lifeconfig::{EdgePolicy, LifeConfig};

pub const DEFAULT_HEADLESS_FRAMES: u64 = 100;
pub const DEFAULT_VERIFY_FRAMES: u64 = 32;

#[derive(Parser, Debug)]
#[command(
    name = "lifegrid",
    author,
    version,
    about = "GPU Game of Life",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub config: ConfigArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// Configuration file; defaults to `config.toml` in the user config directory.
    #[arg(long, global = true, env = "LIFEGRID_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Cells per side of the square grid.
    #[arg(long, global = true, value_name = "CELLS")]
    pub size: Option<u32>,

    /// Time between generations (e.g. `200ms`, `1s`).
    #[arg(long, global = true, value_name = "DURATION", value_parser = parse_interval)]
    pub interval: Option<Duration>,

    /// Compute workgroup edge length (1-16).
    #[arg(long, global = true, value_name = "CELLS")]
    pub workgroup_size: Option<u32>,

    /// Edge handling: `bounded` or `toroidal`.
    #[arg(long, global = true, value_name = "POLICY")]
    pub edges: Option<EdgePolicy>,

    /// Seed for the initial random grid.
    #[arg(long, global = true, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Probability that a seeded cell starts alive.
    #[arg(long, global = true, value_name = "P")]
    pub live_probability: Option<f64>,

    /// WGSL file replacing the built-in cell (render) program.
    #[arg(long, global = true, value_name = "PATH")]
    pub cell_program: Option<PathBuf>,

    /// WGSL file replacing the built-in simulation (compute) program.
    #[arg(long, global = true, value_name = "PATH")]
    pub simulation_program: Option<PathBuf>,
}

impl ConfigArgs {
    /// Applies command-line overrides on top of a loaded configuration.
    pub fn apply(&self, config: &mut LifeConfig) {
        if let Some(size) = self.size {
            config.grid.size = size;
        }
        if let Some(interval) = self.interval {
            config.timing.interval = interval;
        }
        if let Some(workgroup) = self.workgroup_size {
            config.compute.workgroup_size = workgroup;
        }
        if let Some(edges) = self.edges {
            config.grid.edges = edges;
        }
        if let Some(seed) = self.seed {
            config.seed.seed = Some(seed);
        }
        if let Some(probability) = self.live_probability {
            config.seed.live_probability = probability;
        }
    }

    pub fn programs(&self) -> ProgramSet {
        let mut programs = ProgramSet::default();
        if let Some(path) = &self.cell_program {
            programs.cell = ProgramSource::File(path.clone());
        }
        if let Some(path) = &self.simulation_program {
            programs.simulation = ProgramSource::File(path.clone());
        }
        programs
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open a window and animate the grid (the default).
    Run,
    /// Drive scheduled frames without a window and print a summary.
    Headless(HeadlessArgs),
    /// Compare the GPU backend against the software backend frame by frame.
    Verify(VerifyArgs),
    /// Print the effective configuration as TOML.
    Config,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct HeadlessArgs {
    /// Number of frames to advance.
    #[arg(long, default_value_t = DEFAULT_HEADLESS_FRAMES)]
    pub frames: u64,

    #[arg(long, value_enum, default_value = "wgpu")]
    pub backend: BackendChoice,

    /// Print the summary as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct VerifyArgs {
    /// Number of frames to compare.
    #[arg(long, default_value_t = DEFAULT_VERIFY_FRAMES)]
    pub frames: u64,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    Wgpu,
    Software,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_interval(value: &str) -> Result<Duration, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("interval must not be empty".to_string());
    }
    if let Ok(seconds) = trimmed.parse::<f64>() {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(format!("invalid interval '{trimmed}'"));
        }
        return Ok(Duration::from_secs_f64(seconds));
    }
    humantime::parse_duration(trimmed).map_err(|err| format!("invalid interval '{trimmed}': {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["lifegrid"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.size.is_none());
    }

    #[test]
    fn overrides_are_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "lifegrid",
            "headless",
            "--frames",
            "7",
            "--backend",
            "software",
            "--size",
            "64",
            "--edges",
            "toroidal",
            "--interval",
            "50ms",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Headless(HeadlessArgs {
                frames: 7,
                backend: BackendChoice::Software,
                json: false,
            }))
        );
        assert_eq!(cli.config.size, Some(64));
        assert_eq!(cli.config.edges, Some(EdgePolicy::Toroidal));
        assert_eq!(cli.config.interval, Some(Duration::from_millis(50)));
    }

    #[test]
    fn headless_defaults_to_gpu() {
        let cli = Cli::try_parse_from(["lifegrid", "headless"]).unwrap();
        match cli.command {
            Some(Command::Headless(args)) => {
                assert_eq!(args.backend, BackendChoice::Wgpu);
                assert_eq!(args.frames, DEFAULT_HEADLESS_FRAMES);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_edge_policy() {
        assert!(Cli::try_parse_from(["lifegrid", "--edges", "mirror"]).is_err());
    }

    #[test]
    fn interval_accepts_seconds_and_humantime() {
        assert_eq!(parse_interval("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_interval("0.5").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_interval("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_interval("150ms").unwrap(), Duration::from_millis(150));
        assert!(parse_interval("-1").is_err());
        assert!(parse_interval("soon").is_err());
        assert!(parse_interval("").is_err());
    }

    #[test]
    fn apply_overrides_only_given_values() {
        let args = ConfigArgs {
            size: Some(10),
            seed: Some(4),
            ..ConfigArgs::default()
        };
        let mut config = LifeConfig::default();
        args.apply(&mut config);
        assert_eq!(config.grid.size, 10);
        assert_eq!(config.seed.seed, Some(4));
        assert_eq!(config.timing.interval, lifeconfig::DEFAULT_INTERVAL);
        assert_eq!(config.compute.workgroup_size, lifeconfig::DEFAULT_WORKGROUP_SIZE);
    }

    #[test]
    fn program_overrides_point_at_files() {
        let args = ConfigArgs {
            simulation_program: Some(PathBuf::from("life.wgsl")),
            ..ConfigArgs::default()
        };
        let programs = args.programs();
        assert_eq!(programs.cell, ProgramSource::cell());
        assert_eq!(
            programs.simulation,
            ProgramSource::File(PathBuf::from("life.wgsl"))
        );
    }
}
