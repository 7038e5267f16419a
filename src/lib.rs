pub mod clean;
pub mod config;
pub mod error;
pub mod gate;
pub mod locator;
pub mod observability;
pub mod package;
pub mod pipeline;
pub mod process;
pub mod remote;
pub mod report;
pub mod stage;
pub mod validation;

pub use config::DeployConfig;
pub use error::{BuildError, ConfigError, DeployError, PipelineError};
pub use pipeline::{Pipeline, PipelineResult, PipelineState, Plan, Stage};
