//! qcat-core: the Configuration Registry.
//!
//! Turns declarative configuration documents into an indexed traversal
//! model, validates them once at load, and caches them per process.
//!
//! # Public API
//!
//! - [`Registry`] -- load, resolve, reload and edition lookup
//! - [`Configuration`] -- traversal handle (questiongroups, questions,
//!   categories)
//! - [`build_configuration`] -- the four-pass build pipeline
//! - [`ConfigurationError`], [`ConfigIssue`] -- error reporting

pub mod build;
pub mod error;
pub mod features;
pub mod model;
pub mod pass1_tree;
pub mod pass2_index;
pub mod pass3_references;
pub mod pass4_editions;
pub mod registry;
pub mod tables;

pub use build::{build_configuration, Built};
pub use error::{ConfigIssue, ConfigurationError};
pub use features::FeatureToggles;
pub use model::*;
pub use registry::{compare_editions, LoadReport, Registry};
pub use tables::DomainTables;
