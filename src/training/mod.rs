pub mod lifecycle;
pub mod monitor;

pub use lifecycle::BatchError;
pub use monitor::{
    spawn_monitor, BackendError, MonitorHandle, TrainingBackend, TrainingReport, TrainingSignal,
};
