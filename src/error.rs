//! Build-phase error taxonomy.
//!
//! Every variant here is fatal to graph construction: the caller must abort
//! the build and let the partially built graph drop. Runtime faults never
//! appear here; they travel the diagnostic channel as notifications.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// The factory has no blueprint registered for the requested stage kind.
    #[error("no stage kind '{0}' is registered")]
    UnavailableKind(String),

    /// A stage rejected its configuration. Configuration is all-or-nothing:
    /// one bad option discards the whole stage.
    #[error("stage '{stage}' rejected configuration: {reason}")]
    RejectedConfig { stage: String, reason: String },

    /// Stage names are graph-wide identities and must be unique.
    #[error("stage name '{0}' is already present in the graph")]
    DuplicateStage(String),

    /// A static link between two stages could not be made.
    #[error("failed to link '{upstream}' -> '{downstream}': {reason}")]
    LinkFailed {
        upstream: String,
        downstream: String,
        reason: String,
    },

    /// A dynamic port keyed by a source handle was refused: the handle is
    /// already bound, the pool is at capacity, or the stage has no pool on
    /// that side at all.
    #[error("stage '{stage}' has no free port for source handle {handle}")]
    PortUnavailable { stage: String, handle: u32 },
}
