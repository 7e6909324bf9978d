mod args;
mod config;
mod error;
mod flags;
mod signal;
mod worker;

pub use args::{PayloadArg, WorkArgs, WORK_ARG_SLOTS};
pub use config::WorkerConfig;
pub use error::{Result, WorkerError};
pub use flags::WorkerFlags;
pub use signal::Signal;
pub use worker::{WorkFn, Worker, WorkerHandle};
