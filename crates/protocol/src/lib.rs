//! Wire protocol types shared by the genworker crates.
//!
//! Every type here mirrors a JSON or form shape exchanged with the job
//! backend or the generation engine. Request/response logic lives in the
//! crates that speak each protocol.

pub mod dependency;
pub mod engine;
pub mod queue;
pub mod upload;

mod lenient;

pub use dependency::{Dependency, DependencyKind, SourceKind};
pub use engine::{EngineImage, EngineResult, EngineSubmission};
pub use queue::{GetTaskResponse, Task, TaskStatus, TaskUpdate};
pub use upload::{
    FinalizeRequest, FinalizeResponse, InitUploadRequest, OffsetConflict, ResourceId, UploadAck,
    WholeUploadResponse,
};

/// Header carrying the opaque backend token on upload calls.
pub const AUTH_HEADER: &str = "X-Auth-Token";

/// Status value the backend uses for an accepted call.
pub const STATUS_OK: &str = "ok";
