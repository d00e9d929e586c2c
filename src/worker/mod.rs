//! Worker pool master: a fixed-size pool of long-lived child processes
//! speaking newline-delimited JSON over stdin/stdout.

pub mod master;
pub mod worker;

pub use master::{Master, MasterConfig, NullMaster, SharedMasterHandle, TaskMaster};
pub use worker::Worker;
