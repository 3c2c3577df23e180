use thiserror::Error;

/// Failures surfaced while building or inspecting a simulation.
///
/// Every variant is fatal to [`Simulation::initialize`](crate::Simulation::initialize);
/// nothing here is retried automatically.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The backend could not satisfy a buffer request.
    #[error("failed to allocate {label} ({size} bytes): {reason}")]
    Allocation {
        label: String,
        size: u64,
        reason: String,
    },
    /// A bind group does not match the layout it is built against.
    #[error("binding mismatch in {label}: {reason}")]
    Binding { label: String, reason: String },
    /// Program text could not be fetched or did not compile.
    #[error("failed to load program {label}: {reason}")]
    ProgramLoad { label: String, reason: String },
    /// Reading a state buffer back from the device failed.
    #[error("failed to read back {label}: {reason}")]
    Readback { label: String, reason: String },
}

impl EngineError {
    pub(crate) fn allocation(label: &str, size: u64, reason: impl Into<String>) -> Self {
        Self::Allocation {
            label: label.to_string(),
            size,
            reason: reason.into(),
        }
    }

    pub(crate) fn binding(label: &str, reason: impl Into<String>) -> Self {
        Self::Binding {
            label: label.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn program_load(label: &str, reason: impl Into<String>) -> Self {
        Self::ProgramLoad {
            label: label.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn readback(label: &str, reason: impl Into<String>) -> Self {
        Self::Readback {
            label: label.to_string(),
            reason: reason.into(),
        }
    }
}
