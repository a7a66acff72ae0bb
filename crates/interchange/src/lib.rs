//! qcat-interchange: configuration document types and deserialization.
//!
//! A configuration document is the declarative JSON description of a
//! questionnaire family at one edition: sections, categories,
//! subcategories, questiongroups, questions, choice sets, conditions and
//! the edition delta against its predecessor. This crate only parses the
//! document shape; structural validation and the traversal model live in
//! `qcat-core`.

pub mod deserialize;
pub mod types;

pub use deserialize::{from_document, from_str, InterchangeError};
pub use types::*;
