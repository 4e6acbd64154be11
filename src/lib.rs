pub mod artifact;
pub mod backend;
pub mod config;
pub mod credentials;
pub mod definition;
pub mod docker;
pub mod error;
pub mod lockfile;
pub mod observability;
pub mod pipeline;
pub mod policy;
pub mod presets;
pub mod stages;
pub mod validation;

pub use artifact::{ImageArtifact, ImageReference};
pub use config::RunConfig;
pub use definition::PipelineDefinition;
pub use error::{ErrorKind, StageError};
pub use pipeline::{PipelineExecutor, PipelineRun, RunOutcome, RunStatus};
