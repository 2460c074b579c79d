//! Binary-side glue: settings resolution and terminal progress.

pub(crate) mod config_runtime;
pub(crate) mod progress_manager;
