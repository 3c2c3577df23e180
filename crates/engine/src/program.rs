use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::PathBuf;

use lifeconfig::EdgePolicy;

use crate::error::EngineError;
use crate::gpu::GpuBackend;

pub const VERTEX_ENTRY: &str = "vertexMain";
pub const FRAGMENT_ENTRY: &str = "fragmentMain";
pub const COMPUTE_ENTRY: &str = "computeMain";

/// Symbolic names substituted into program text before compilation.
pub type Defines = BTreeMap<String, String>;

/// Where program text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramSource {
    Builtin {
        label: &'static str,
        text: &'static str,
    },
    File(PathBuf),
}

impl ProgramSource {
    pub fn cell() -> Self {
        Self::Builtin {
            label: "cell program",
            text: CELL_PROGRAM_WGSL,
        }
    }

    pub fn simulation() -> Self {
        Self::Builtin {
            label: "simulation program",
            text: SIMULATION_PROGRAM_WGSL,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Builtin { label, .. } => (*label).to_string(),
            Self::File(path) => path.display().to_string(),
        }
    }

    fn fetch(&self) -> Result<Cow<'static, str>, EngineError> {
        match self {
            Self::Builtin { text, .. } => Ok(Cow::Borrowed(text)),
            Self::File(path) => std::fs::read_to_string(path)
                .map(Cow::Owned)
                .map_err(|err| EngineError::program_load(&self.label(), err.to_string())),
        }
    }
}

/// The render and compute programs a simulation is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSet {
    pub cell: ProgramSource,
    pub simulation: ProgramSource,
}

impl Default for ProgramSet {
    fn default() -> Self {
        Self {
            cell: ProgramSource::cell(),
            simulation: ProgramSource::simulation(),
        }
    }
}

/// Defines consumed by the built-in simulation program.
pub fn simulation_defines(workgroup_size: u32, edges: EdgePolicy) -> Defines {
    let mut defines = Defines::new();
    defines.insert("WORKGROUP_SIZE_X".into(), workgroup_size.to_string());
    defines.insert("WORKGROUP_SIZE_Y".into(), workgroup_size.to_string());
    defines.insert("WRAP_EDGES".into(), edges.wraps().to_string());
    defines
}

/// Replaces every occurrence of each define name with its value.
///
/// Longer names are substituted first so that a name which is a prefix of
/// another (`SIZE` and `SIZE_X`) never rewrites part of the longer one.
pub fn preprocess(template: &str, defines: &Defines) -> String {
    let mut ordered: Vec<(&String, &String)> = defines.iter().collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

    let mut text = template.to_string();
    for (name, value) in ordered {
        if name.is_empty() {
            continue;
        }
        text = text.replace(name.as_str(), value);
    }
    text
}

/// Parses and validates WGSL, returning the module for inspection.
pub fn validate_wgsl(label: &str, source: &str) -> Result<naga::Module, EngineError> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|err| EngineError::program_load(label, err.emit_to_string(source)))?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::default(),
    )
    .validate(&module)
    .map_err(|err| EngineError::program_load(label, format!("{err:?}")))?;
    Ok(module)
}

/// Turns a program reference into a compiled program for a backend.
pub trait ProgramLoader<B: GpuBackend> {
    fn load(
        &self,
        backend: &B,
        source: &ProgramSource,
        defines: &Defines,
    ) -> Result<B::Program, EngineError>;
}

/// Reads WGSL, applies defines, validates it with naga and hands the result
/// to the backend compiler.
#[derive(Debug, Clone, Copy, Default)]
pub struct WgslLoader;

impl<B: GpuBackend> ProgramLoader<B> for WgslLoader {
    fn load(
        &self,
        backend: &B,
        source: &ProgramSource,
        defines: &Defines,
    ) -> Result<B::Program, EngineError> {
        let label = source.label();
        let template = source.fetch()?;
        let text = preprocess(&template, defines);
        validate_wgsl(&label, &text)?;
        tracing::debug!(program = %label, defines = defines.len(), "compiling program");
        backend.compile_program(&label, &text)
    }
}

/// Draws one instance per cell. The instance index selects the cell; dead
/// cells collapse to a zero-area quad.
pub const CELL_PROGRAM_WGSL: &str = r"struct VertexInput {
    @location(0) pos: vec2f,
    @builtin(instance_index) instance: u32,
};

struct VertexOutput {
    @builtin(position) pos: vec4f,
    @location(0) cell: vec2f,
};

@group(0) @binding(0) var<uniform> grid: vec2f;
@group(0) @binding(1) var<storage> cellState: array<u32>;

@vertex
fn vertexMain(input: VertexInput) -> VertexOutput {
    let i = f32(input.instance);
    let cell = vec2f(i % grid.x, floor(i / grid.x));
    let state = f32(cellState[input.instance]);

    let cellOffset = cell / grid * 2.0;
    let gridPos = (input.pos * state + 1.0) / grid - 1.0 + cellOffset;

    var output: VertexOutput;
    output.pos = vec4f(gridPos, 0.0, 1.0);
    output.cell = cell;
    return output;
}

@fragment
fn fragmentMain(input: VertexOutput) -> @location(0) vec4f {
    let c = input.cell / grid;
    return vec4f(c, 1.0 - c.x, 1.0);
}
";

/// B3/S23 over the Moore neighbourhood. `WRAP_EDGES` selects toroidal
/// coordinates; otherwise cells beyond the grid count as dead.
pub const SIMULATION_PROGRAM_WGSL: &str = r"const wrapEdges: bool = WRAP_EDGES;

@group(0) @binding(0) var<uniform> grid: vec2f;
@group(0) @binding(1) var<storage> cellStateIn: array<u32>;
@group(0) @binding(2) var<storage, read_write> cellStateOut: array<u32>;

fn cellIndex(x: u32, y: u32) -> u32 {
    return y * u32(grid.x) + x;
}

fn cellActive(x: i32, y: i32) -> u32 {
    let size = vec2i(grid);
    var cx = x;
    var cy = y;
    if (wrapEdges) {
        cx = (x + size.x) % size.x;
        cy = (y + size.y) % size.y;
    } else if (x < 0 || y < 0 || x >= size.x || y >= size.y) {
        return 0u;
    }
    return cellStateIn[cellIndex(u32(cx), u32(cy))];
}

@compute @workgroup_size(WORKGROUP_SIZE_X, WORKGROUP_SIZE_Y)
fn computeMain(@builtin(global_invocation_id) cell: vec3u) {
    let size = vec2u(grid);
    if (cell.x >= size.x || cell.y >= size.y) {
        return;
    }

    let x = i32(cell.x);
    let y = i32(cell.y);
    let activeNeighbors = cellActive(x + 1, y + 1) +
                          cellActive(x + 1, y) +
                          cellActive(x + 1, y - 1) +
                          cellActive(x, y - 1) +
                          cellActive(x - 1, y - 1) +
                          cellActive(x - 1, y) +
                          cellActive(x - 1, y + 1) +
                          cellActive(x, y + 1);

    let i = cellIndex(cell.x, cell.y);
    switch activeNeighbors {
        case 2u: {
            cellStateOut[i] = cellStateIn[i];
        }
        case 3u: {
            cellStateOut[i] = 1u;
        }
        default: {
            cellStateOut[i] = 0u;
        }
    }
}
";
