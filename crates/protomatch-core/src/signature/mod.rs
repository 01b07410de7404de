//! Name-independent structural signatures.
//!
//! A [`TypeSignature`] captures everything about a type that survives
//! renaming: field numbers, labels, scalar types and, recursively, the shape of
//! every referenced message and enum. Two types with equal signatures are
//! *exact matches*.
//!
//! Message fields are kept sorted by wire number, so declaration order never
//! affects a signature. Oneof members are folded into a single [`ShapeKind::Oneof`]
//! entry keyed by the lowest member number. Map fields collapse their synthetic
//! entry message into [`ShapeKind::Map`].
//!
//! Recursive references are encoded as [`ShapeKind::Cycle`] back-references
//! (distance to the referenced ancestor), and expansion stops at a fixed depth
//! with a [`ShapeKind::Truncated`] marker. See [`SignatureSet::build`].

mod builder;

use crate::schema::{Cardinality, ScalarType};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

pub use builder::{SignatureConfig, SignatureSet, DEFAULT_MAX_DEPTH};

/// Structural signature of a message or enum
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeSignature {
    /// Signature of a message
    Message(Arc<MessageSignature>),
    /// Signature of an enum
    Enum(Arc<EnumSignature>),
}

impl TypeSignature {
    /// Returns true for message signatures
    pub fn is_message(&self) -> bool {
        matches!(self, TypeSignature::Message(_))
    }

    /// Returns true if expansion was cut at the depth bound somewhere inside
    pub fn is_truncated(&self) -> bool {
        match self {
            TypeSignature::Message(m) => m.is_truncated(),
            TypeSignature::Enum(_) => false,
        }
    }

    /// Number of top-level entries (fields or enum values)
    pub fn shallow_len(&self) -> usize {
        match self {
            TypeSignature::Message(m) => m.fields().len(),
            TypeSignature::Enum(e) => e.values().len(),
        }
    }

    /// Number of leaf entries counted through every nested shape
    pub fn deep_len(&self) -> usize {
        match self {
            TypeSignature::Message(m) => m.deep_len(),
            TypeSignature::Enum(e) => e.values().len(),
        }
    }

    /// Levels of nested messages below this one (0 for flat messages and enums)
    pub fn depth(&self) -> u32 {
        match self {
            TypeSignature::Message(m) => m.height(),
            TypeSignature::Enum(_) => 0,
        }
    }

    /// Short hex digest of the canonical text form, for display
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(self.to_string().as_bytes());
        hash.to_hex()[..9].to_string()
    }
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSignature::Message(m) => write!(f, "message {}", m),
            TypeSignature::Enum(e) => write!(f, "{}", e),
        }
    }
}

/// Signature of a message: its field shapes sorted by wire number
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageSignature {
    fields: Vec<FieldShape>,
    height: u32,
    truncated: bool,
}

impl MessageSignature {
    /// Creates a signature from field shapes in any order
    pub fn new(mut fields: Vec<FieldShape>) -> Self {
        fields.sort();
        let height = fields.iter().map(|f| f.kind.height()).max().unwrap_or(0);
        let truncated = fields.iter().any(|f| f.kind.is_truncated());
        Self {
            fields,
            height,
            truncated,
        }
    }

    /// Field shapes sorted by wire number
    pub fn fields(&self) -> &[FieldShape] {
        &self.fields
    }

    /// Levels of nested messages below this one
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns true if a [`ShapeKind::Truncated`] marker occurs anywhere inside
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    fn deep_len(&self) -> usize {
        self.fields.iter().map(|f| f.kind.deep_len()).sum()
    }
}

impl fmt::Display for MessageSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", field)?;
        }
        write!(f, "}}")
    }
}

/// Signature of an enum: the set of value numbers
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnumSignature {
    values: BTreeSet<i32>,
}

impl EnumSignature {
    /// Creates a signature from value numbers; aliases collapse
    pub fn new(values: impl IntoIterator<Item = i32>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    /// Distinct value numbers in ascending order
    pub fn values(&self) -> &BTreeSet<i32> {
        &self.values
    }
}

impl fmt::Display for EnumSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "enum[")?;
        let mut values = self.values.iter().copied().peekable();
        let mut first = true;
        while let Some(start) = values.next() {
            let mut end = start;
            while values.peek().is_some_and(|&next| Some(next) == end.checked_add(1)) {
                end = values.next().unwrap_or(end);
            }
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}-{}", start, end)?;
            }
        }
        write!(f, "]")
    }
}

/// Shape of one field: wire number, label and structural kind
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldShape {
    /// Wire number; for oneof groups, the lowest member number
    pub number: u32,
    /// Label
    pub cardinality: Cardinality,
    /// Structural kind
    pub kind: ShapeKind,
}

impl FieldShape {
    /// Creates a field shape
    pub fn new(number: u32, cardinality: Cardinality, kind: ShapeKind) -> Self {
        Self {
            number,
            cardinality,
            kind,
        }
    }

    /// Folds oneof members into a single group shape
    pub fn oneof(mut members: Vec<FieldShape>) -> Self {
        members.sort();
        let number = members.first().map_or(0, |m| m.number);
        Self::new(number, Cardinality::Optional, ShapeKind::Oneof(members))
    }
}

impl fmt::Display for FieldShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.number)?;
        let label = self.cardinality.as_str();
        if !label.is_empty() && !matches!(self.kind, ShapeKind::Map { .. }) {
            write!(f, "{} ", label)?;
        }
        write!(f, "{}", self.kind)
    }
}

/// Closed set of structural field kinds
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShapeKind {
    /// Scalar value
    Scalar(ScalarType),
    /// Embedded message
    Message(Arc<MessageSignature>),
    /// Enum value
    Enum(Arc<EnumSignature>),
    /// Map field, described by its key and value kinds
    Map {
        /// Key kind
        key: Box<ShapeKind>,
        /// Value kind
        value: Box<ShapeKind>,
    },
    /// Oneof group members, sorted by wire number
    Oneof(Vec<FieldShape>),
    /// Reference to the ancestor `depth` levels above the owning message
    /// (0 is the owning message itself)
    Cycle {
        /// Distance to the referenced ancestor
        depth: u32,
    },
    /// Message left unexpanded because it sits below the depth bound
    Truncated {
        /// Depth at which expansion stopped
        depth: u32,
    },
}

impl ShapeKind {
    fn height(&self) -> u32 {
        match self {
            ShapeKind::Message(m) => m.height + 1,
            ShapeKind::Map { key, value } => key.height().max(value.height()),
            ShapeKind::Oneof(members) => members.iter().map(|m| m.kind.height()).max().unwrap_or(0),
            _ => 0,
        }
    }

    fn is_truncated(&self) -> bool {
        match self {
            ShapeKind::Message(m) => m.truncated,
            ShapeKind::Map { key, value } => key.is_truncated() || value.is_truncated(),
            ShapeKind::Oneof(members) => members.iter().any(|m| m.kind.is_truncated()),
            ShapeKind::Truncated { .. } => true,
            _ => false,
        }
    }

    fn deep_len(&self) -> usize {
        match self {
            ShapeKind::Message(m) => m.deep_len(),
            ShapeKind::Enum(e) => e.values.len(),
            ShapeKind::Map { key, value } => key.deep_len() + value.deep_len(),
            ShapeKind::Oneof(members) => members.iter().map(|m| m.kind.deep_len()).sum(),
            _ => 1,
        }
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeKind::Scalar(s) => write!(f, "{}", s.as_str()),
            ShapeKind::Message(m) => write!(f, "{}", m),
            ShapeKind::Enum(e) => write!(f, "{}", e),
            ShapeKind::Map { key, value } => write!(f, "map<{}, {}>", key, value),
            ShapeKind::Oneof(members) => {
                write!(f, "oneof {{")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", member)?;
                }
                write!(f, "}}")
            }
            ShapeKind::Cycle { depth } => write!(f, "cycle@{}", depth),
            ShapeKind::Truncated { depth } => write!(f, "truncated@{}", depth),
        }
    }
}
