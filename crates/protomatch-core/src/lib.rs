//! # protomatch-core
//!
//! A library for matching renamed ("obfuscated") Protocol Buffer types against a
//! reference schema by their structure rather than their names.
//!
//! This crate provides the core functionality for:
//! - Turning compiled descriptor sets into a name-independent [`Schema`] model
//! - Deriving structural signatures for every message and enum
//! - Scoring signature similarity, tolerant of renumbered fields
//! - Finding exact matches, unique shapes and unambiguous ("perfect") pairs
//! - Driving a human-guided session in which each confirmation narrows the rest
//!
//! ## Architecture
//!
//! Data flows one way through the modules:
//!
//! - [`schema`]: Type definitions and the descriptor-set adapter
//! - [`signature`]: Structural signatures with cycle and depth handling
//! - [`score`]: Similarity between two signatures
//! - [`index`]: Candidates, exact matches, uniques and perfect mappables
//! - [`resolve`]: Consistent assignments from confirmed and excluded pairs
//! - [`session`]: Sequential matching over an ordered worklist
//! - [`config`]: Thresholds and weights
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```
//! use protomatch_core::{FieldDef, MatchConfig, MatchIndex, ScalarType, SchemaBuilder, Session};
//!
//! let reference = SchemaBuilder::new()
//!     .message("Player", [FieldDef::scalar(1, ScalarType::String), FieldDef::named(2, "Stats")])
//!     .message("Stats", [FieldDef::scalar(1, ScalarType::Int32).repeated()])
//!     .build()?;
//! let obfuscated = SchemaBuilder::new()
//!     .message("Qx", [FieldDef::scalar(1, ScalarType::String), FieldDef::named(2, "Zk")])
//!     .message("Zk", [FieldDef::scalar(1, ScalarType::Int32).repeated()])
//!     .build()?;
//!
//! let index = MatchIndex::build(obfuscated, reference, MatchConfig::default())?;
//! assert_eq!(index.perfect_mappables().len(), 2);
//!
//! let mut session = Session::in_declaration_order(&index)?;
//! session.confirm_perfect_mappables()?;
//! assert!(session.is_exhausted());
//! # Ok::<(), protomatch_core::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod config;
pub mod error;
pub mod index;
pub mod resolve;
pub mod schema;
pub mod score;
pub mod session;
pub mod signature;

// Re-export primary types for convenience
pub use config::{MatchConfig, ScoreWeights};
pub use error::{Error, ErrorKind, Result};
pub use index::{CandidatePair, ExactMatch, MatchIndex, Side};
pub use resolve::{resolve, Assignment, Mapping, Provenance, Resolution};
pub use schema::{
    load_schema, Cardinality, FieldDef, FieldType, ScalarType, Schema, SchemaBuilder, TypeDef,
    TypeId, TypeKind,
};
pub use score::Scorer;
pub use session::{ItemState, Session};
pub use signature::{SignatureConfig, SignatureSet, TypeSignature};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
