//! `tagflow_core`: ingestion, normalization and long-running operation
//! engine for a personal media library. See each module's doc comment
//! for the spec component it implements; `facade::Facade` is the single
//! entry point a process embedding this crate calls into.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod facade;
pub mod live;
pub mod models;
pub mod normalize;
pub mod ops;
pub mod probe;
pub mod recognizers;

pub use config::AppConfig;
pub use error::{CoreError, CoreResult};
pub use facade::{Facade, SystemHealth};
