pub mod commands;
pub mod emergency;
pub mod error;
pub mod events;
pub mod monitor;
pub mod pipeline;
pub mod service;

pub use commands::{EngineCommand, EngineHandle, EngineStatus};
pub use error::PipelineError;
pub use events::EngineEvent;
pub use monitor::TickOutcome;
pub use pipeline::ExecutionPipeline;
pub use service::EngineService;
