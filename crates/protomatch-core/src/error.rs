//! Error types for the protomatch-core library.
//!
//! All failures are reported through a single [`Error`] enum built with
//! `thiserror`. Each variant belongs to one [`ErrorKind`], which lets callers
//! tell a malformed schema apart from an inconsistent assignment or a rejected
//! configuration without matching on every variant.

use crate::index::Side;
use crate::schema::TypeId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for protomatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The schema is malformed; no signatures can be derived from it
    Schema,
    /// A caller-supplied confirmed/excluded set is internally inconsistent
    Assignment,
    /// A configuration value is out of range
    Config,
    /// A session transition was requested that the session cannot honour
    Session,
    /// Reading or decoding input failed
    Io,
}

/// Comprehensive error type for all protomatch operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a FileDescriptorSet
    #[error("failed to parse FileDescriptorSet: {0}")]
    DescriptorParse(#[from] prost::DecodeError),

    /// Two type definitions share one fully qualified name
    #[error("duplicate type name '{name}'")]
    DuplicateType {
        /// The repeated name
        name: String,
    },

    /// A nested type names a parent that does not exist in the schema
    #[error("nested type '{name}' declares unknown parent '{parent}'")]
    UnknownParent {
        /// Name of the nested type
        name: String,
        /// The unresolved parent name
        parent: String,
    },

    /// A field references a type that does not exist in the schema
    #[error("field {field_number} of '{owner}' references unknown type '{target}'")]
    DanglingReference {
        /// Type declaring the field
        owner: String,
        /// Wire number of the offending field
        field_number: u32,
        /// The unresolved type name
        target: String,
    },

    /// A map entry message lacks its key or value field
    #[error("map entry '{name}' must declare key field 1 and value field 2")]
    MalformedMapEntry {
        /// Name of the map entry message
        name: String,
    },

    /// A configuration value is outside its accepted range
    #[error("invalid configuration: {parameter} = {value} ({expected})")]
    InvalidConfig {
        /// Name of the parameter
        parameter: &'static str,
        /// Offending value, rendered
        value: String,
        /// Accepted range
        expected: &'static str,
    },

    /// A type identifier does not belong to the schema on the given side
    #[error("unknown {side} type {id}")]
    UnknownType {
        /// Schema the identifier was looked up in
        side: Side,
        /// The identifier
        id: TypeId,
    },

    /// Two confirmed obfuscated types target the same reference type
    #[error("reference type {reference} is confirmed for both {first} and {second}")]
    ConflictingConfirmation {
        /// The doubly-claimed reference type
        reference: TypeId,
        /// First obfuscated claimant
        first: TypeId,
        /// Second obfuscated claimant
        second: TypeId,
    },

    /// A pair is both confirmed and excluded
    #[error("pair {obfuscated} -> {reference} is both confirmed and excluded")]
    ConfirmedExcluded {
        /// Obfuscated type
        obfuscated: TypeId,
        /// Reference type
        reference: TypeId,
    },

    /// The obfuscated type is not part of the session worklist
    #[error("obfuscated type {0} is not in the session worklist")]
    NotInWorklist(TypeId),

    /// The reference type is neither a current nor a force-added candidate
    #[error("{reference} is not a candidate for {obfuscated}")]
    NotACandidate {
        /// Obfuscated type
        obfuscated: TypeId,
        /// Reference type
        reference: TypeId,
    },

    /// The obfuscated type has no confirmed mapping to undo
    #[error("obfuscated type {0} has no confirmed mapping")]
    NotConfirmed(TypeId),

    /// The pair is confirmed and must be unconfirmed before it can be excluded
    #[error("pair {obfuscated} -> {reference} is confirmed; unconfirm it first")]
    PairConfirmed {
        /// Obfuscated type
        obfuscated: TypeId,
        /// Reference type
        reference: TypeId,
    },
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new dangling reference error
    pub fn dangling_reference(
        owner: impl Into<String>,
        field_number: u32,
        target: impl Into<String>,
    ) -> Self {
        Self::DanglingReference {
            owner: owner.into(),
            field_number,
            target: target.into(),
        }
    }

    /// Creates a new configuration error
    pub fn invalid_config(
        parameter: &'static str,
        value: impl ToString,
        expected: &'static str,
    ) -> Self {
        Self::InvalidConfig {
            parameter,
            value: value.to_string(),
            expected,
        }
    }

    /// Returns the broad category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FileRead { .. } | Self::DescriptorParse(_) => ErrorKind::Io,
            Self::DuplicateType { .. }
            | Self::UnknownParent { .. }
            | Self::DanglingReference { .. }
            | Self::MalformedMapEntry { .. } => ErrorKind::Schema,
            Self::InvalidConfig { .. } => ErrorKind::Config,
            Self::UnknownType { .. }
            | Self::ConflictingConfirmation { .. }
            | Self::ConfirmedExcluded { .. } => ErrorKind::Assignment,
            Self::NotInWorklist(_)
            | Self::NotACandidate { .. }
            | Self::NotConfirmed(_)
            | Self::PairConfirmed { .. } => ErrorKind::Session,
        }
    }
}
