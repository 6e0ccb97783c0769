pub mod config_loader;
pub mod structured_logging;

pub use config_loader::{ConfigLoader, ConfigSource};
pub use structured_logging::{
    init_structured_logging, LoggingConfig, OperationTimer, ProcessContext, RequestContext,
    RequestMetrics, StructuredLogEntry,
};
