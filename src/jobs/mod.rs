pub mod monitor;
pub mod record;
pub mod registry;

pub use monitor::{JobMonitor, WARMUP_DELAY};
pub use record::{CallbackTarget, JobRecord, JobStatus, StreamId};
pub use registry::JobRegistry;
