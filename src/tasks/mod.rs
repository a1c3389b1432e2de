//! Background Tasks Module
//!
//! Contains background tasks that run periodically while the service is
//! started.
//!
//! # Tasks
//! - Maintenance: sweeps expired entries and persists the pattern model

mod maintenance;

pub use maintenance::{persist_model, spawn_maintenance_task};
