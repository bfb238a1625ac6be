pub mod analytics;
pub mod api;
pub mod config;
pub mod error;
pub mod event_log;
pub mod extractor;
pub mod matcher;
pub mod monitor;
pub mod pipeline;
pub mod profile;
pub mod state;

pub use config::FaceServiceConfig;
pub use error::{ApiError, FaceError, FaceResult};
pub use extractor::lifecycle::ExtractorLifecycle;
pub use profile::ProfileStore;
pub use state::FaceServiceState;
