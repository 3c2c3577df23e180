use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use lifeconfig::{EdgePolicy, LifeConfig};
use tempfile::TempDir;

fn lifegrid(config_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_lifegrid"))
        .env("LIFEGRID_CONFIG_DIR", config_dir)
        .env_remove("LIFEGRID_CONFIG")
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("failed to run lifegrid")
}

#[test]
fn config_prints_defaults_when_no_file_exists() {
    let root = TempDir::new().unwrap();
    let output = lifegrid(root.path(), &["config"]);
    assert!(output.status.success());

    let printed = LifeConfig::from_toml_str(&String::from_utf8_lossy(&output.stdout)).unwrap();
    assert_eq!(printed, LifeConfig::default());
}

#[test]
fn config_merges_file_and_flags() {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join("config.toml"),
        "[grid]\nsize = 20\nedges = \"toroidal\"\n[timing]\ninterval = \"75ms\"\n",
    )
    .unwrap();

    let output = lifegrid(root.path(), &["config", "--size", "48", "--seed", "11"]);
    assert!(output.status.success());

    let printed = LifeConfig::from_toml_str(&String::from_utf8_lossy(&output.stdout)).unwrap();
    assert_eq!(printed.grid.size, 48);
    assert_eq!(printed.grid.edges, EdgePolicy::Toroidal);
    assert_eq!(printed.timing.interval.as_millis(), 75);
    assert_eq!(printed.seed.seed, Some(11));
}

#[test]
fn explicit_config_path_must_exist() {
    let root = TempDir::new().unwrap();
    let missing = root.path().join("nowhere.toml");
    let output = lifegrid(
        root.path(),
        &["--config", missing.to_str().unwrap(), "config"],
    );
    assert!(!output.status.success());
}

#[test]
fn invalid_override_is_rejected() {
    let root = TempDir::new().unwrap();
    let output = lifegrid(root.path(), &["config", "--workgroup-size", "64"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("workgroup_size"));
}

#[test]
fn headless_software_run_reports_json() {
    let root = TempDir::new().unwrap();
    let config_path = root.path().join("life.toml");
    fs::write(
        &config_path,
        "[grid]\nsize = 16\n[timing]\ninterval = 0\n[seed]\nseed = 3\n",
    )
    .unwrap();

    let output = lifegrid(
        root.path(),
        &[
            "--config",
            config_path.to_str().unwrap(),
            "headless",
            "--backend",
            "software",
            "--frames",
            "3",
            "--json",
        ],
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["backend"], "software");
    assert_eq!(report["grid_size"], 16);
    assert_eq!(report["steps"], 3);
    assert!(report["live_cells"].as_u64().unwrap() <= 256);
}

#[test]
fn headless_fails_on_missing_program_file() {
    let root = TempDir::new().unwrap();
    let missing = root.path().join("missing.wgsl");
    let output = lifegrid(
        root.path(),
        &[
            "headless",
            "--backend",
            "software",
            "--frames",
            "1",
            "--interval",
            "0",
            "--simulation-program",
            missing.to_str().unwrap(),
        ],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing.wgsl"));
}

#[test]
fn software_backend_refuses_a_custom_simulation_program() {
    let root = TempDir::new().unwrap();
    let program = root.path().join("copy.wgsl");
    fs::write(
        &program,
        r"@group(0) @binding(0) var<uniform> grid: vec2f;
@group(0) @binding(1) var<storage> cellStateIn: array<u32>;
@group(0) @binding(2) var<storage, read_write> cellStateOut: array<u32>;

@compute @workgroup_size(8, 8)
fn computeMain(@builtin(global_invocation_id) cell: vec3u) {
    let i = cell.y * u32(grid.x) + cell.x;
    cellStateOut[i] = cellStateIn[i];
}
",
    )
    .unwrap();

    let output = lifegrid(
        root.path(),
        &[
            "headless",
            "--backend",
            "software",
            "--frames",
            "1",
            "--interval",
            "0",
            "--simulation-program",
            program.to_str().unwrap(),
        ],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("built-in simulation program"));
}
