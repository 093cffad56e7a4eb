//! Subcommands of the `jobq` binary.

pub mod job;
pub mod job_type;
pub mod maintenance;
