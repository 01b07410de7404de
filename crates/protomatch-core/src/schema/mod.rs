//! In-memory schema model.
//!
//! A [`Schema`] is an arena of message and enum definitions in declaration
//! order. Nested types are flattened into the arena and point at their parent
//! through [`TypeDef::parent`]; fields refer to other types by name and are
//! resolved with protobuf scoping rules when signatures are built.
//!
//! Type names are only ever used for display and lookup. Nothing in the
//! matching engine compares names.
//!
//! Schemas are usually produced from a compiled descriptor set (see
//! [`Schema::from_descriptor_set`]), but can also be declared directly with
//! [`SchemaBuilder`].

mod descriptor;

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;

pub use descriptor::load_schema;

/// Stable identifier of a type within one schema.
///
/// Identifiers are dense indices in declaration order, so comparing two
/// identifiers compares declaration positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(u32);

impl TypeId {
    /// Creates an identifier from a raw declaration index
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the declaration index
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Protobuf scalar value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarType {
    /// `double`
    Double,
    /// `float`
    Float,
    /// `int64`
    Int64,
    /// `uint64`
    Uint64,
    /// `int32`
    Int32,
    /// `fixed64`
    Fixed64,
    /// `fixed32`
    Fixed32,
    /// `bool`
    Bool,
    /// `string`
    String,
    /// `bytes`
    Bytes,
    /// `uint32`
    Uint32,
    /// `sfixed32`
    Sfixed32,
    /// `sfixed64`
    Sfixed64,
    /// `sint32`
    Sint32,
    /// `sint64`
    Sint64,
}

impl ScalarType {
    /// Returns the proto keyword for this type
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarType::Double => "double",
            ScalarType::Float => "float",
            ScalarType::Int64 => "int64",
            ScalarType::Uint64 => "uint64",
            ScalarType::Int32 => "int32",
            ScalarType::Fixed64 => "fixed64",
            ScalarType::Fixed32 => "fixed32",
            ScalarType::Bool => "bool",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
            ScalarType::Uint32 => "uint32",
            ScalarType::Sfixed32 => "sfixed32",
            ScalarType::Sfixed64 => "sfixed64",
            ScalarType::Sint32 => "sint32",
            ScalarType::Sint64 => "sint64",
        }
    }
}

/// Field label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Cardinality {
    /// Singular field (explicit or implicit presence)
    #[default]
    Optional,
    /// Proto2 `required`
    Required,
    /// `repeated`, including map fields
    Repeated,
}

impl Cardinality {
    /// Returns the label keyword, empty for plain optional fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Cardinality::Optional => "",
            Cardinality::Required => "required",
            Cardinality::Repeated => "repeated",
        }
    }
}

/// Declared type of a field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// A scalar value
    Scalar(ScalarType),
    /// A message or enum, by (possibly relative) name
    Named(String),
}

/// A single field of a message definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Wire number
    pub number: u32,
    /// Label
    pub cardinality: Cardinality,
    /// Declared type
    pub field_type: FieldType,
    /// Index of the containing oneof, if any
    pub oneof: Option<u32>,
}

impl FieldDef {
    /// Creates an optional scalar field
    pub fn scalar(number: u32, scalar: ScalarType) -> Self {
        Self {
            number,
            cardinality: Cardinality::Optional,
            field_type: FieldType::Scalar(scalar),
            oneof: None,
        }
    }

    /// Creates an optional field referencing a message or enum by name
    pub fn named(number: u32, type_name: impl Into<String>) -> Self {
        Self {
            number,
            cardinality: Cardinality::Optional,
            field_type: FieldType::Named(type_name.into()),
            oneof: None,
        }
    }

    /// Marks the field as repeated
    pub fn repeated(mut self) -> Self {
        self.cardinality = Cardinality::Repeated;
        self
    }

    /// Marks the field as required
    pub fn required(mut self) -> Self {
        self.cardinality = Cardinality::Required;
        self
    }

    /// Places the field in the oneof with the given index
    pub fn in_oneof(mut self, index: u32) -> Self {
        self.oneof = Some(index);
        self
    }
}

/// A message definition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageDef {
    /// Fields in declaration order
    pub fields: Vec<FieldDef>,
    /// Number of oneof declarations
    pub oneof_count: u32,
    /// Whether this is a synthetic map entry
    pub map_entry: bool,
}

impl MessageDef {
    /// Creates a message from its fields, counting the oneofs they reference
    pub fn new(fields: impl IntoIterator<Item = FieldDef>) -> Self {
        let fields: Vec<FieldDef> = fields.into_iter().collect();
        let oneof_count = fields
            .iter()
            .filter_map(|f| f.oneof)
            .max()
            .map_or(0, |max| max + 1);
        Self {
            fields,
            oneof_count,
            map_entry: false,
        }
    }
}

/// An enum definition; only value numbers matter for matching
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumDef {
    /// Value numbers in declaration order
    pub values: Vec<i32>,
    /// Declared with `allow_alias`; value numbers carry no shape
    pub alias: bool,
}

/// Message or enum body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    /// A message
    Message(MessageDef),
    /// An enum
    Enum(EnumDef),
}

/// A named type definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    /// Fully qualified name without a leading dot (`pkg.Outer.Inner`)
    pub name: String,
    /// Package the type was declared in
    pub package: String,
    /// Enclosing message for nested types
    pub parent: Option<TypeId>,
    /// Definition body
    pub kind: TypeKind,
}

impl TypeDef {
    /// Returns the name relative to the package
    pub fn display_name(&self) -> &str {
        if self.package.is_empty() {
            return &self.name;
        }
        self.name
            .strip_prefix(self.package.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(&self.name)
    }

    /// Returns true if this is a message
    pub fn is_message(&self) -> bool {
        matches!(self.kind, TypeKind::Message(_))
    }

    /// Returns true if this is a synthetic map entry message
    pub fn is_map_entry(&self) -> bool {
        matches!(&self.kind, TypeKind::Message(m) if m.map_entry)
    }

    /// Returns true if this is an enum declared with `allow_alias`
    pub fn is_alias_enum(&self) -> bool {
        matches!(&self.kind, TypeKind::Enum(e) if e.alias)
    }

    /// Returns true if the type is declared inside another message
    pub fn is_nested(&self) -> bool {
        self.parent.is_some()
    }
}

/// An ordered set of type definitions
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: Vec<TypeDef>,
    by_name: HashMap<String, TypeId>,
}

impl Schema {
    /// Creates a schema, rejecting duplicate names and out-of-range parents
    pub fn new(types: Vec<TypeDef>) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(types.len());
        for (i, def) in types.iter().enumerate() {
            let id = TypeId::new(i as u32);
            if by_name.insert(def.name.clone(), id).is_some() {
                return Err(Error::DuplicateType {
                    name: def.name.clone(),
                });
            }
        }
        for def in &types {
            if let Some(parent) = def.parent {
                if parent.index() >= types.len() {
                    return Err(Error::UnknownParent {
                        name: def.name.clone(),
                        parent: parent.to_string(),
                    });
                }
            }
        }
        Ok(Self { types, by_name })
    }

    /// Number of type definitions
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if the schema declares no types
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Returns true if `id` belongs to this schema
    pub fn contains(&self, id: TypeId) -> bool {
        id.index() < self.types.len()
    }

    /// Returns the definition for `id`
    pub fn get(&self, id: TypeId) -> Option<&TypeDef> {
        self.types.get(id.index())
    }

    /// Returns the display name for `id`, or `"?"` for foreign identifiers
    pub fn name(&self, id: TypeId) -> &str {
        self.get(id).map_or("?", TypeDef::display_name)
    }

    /// Iterates over all definitions in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeDef)> + '_ {
        self.types
            .iter()
            .enumerate()
            .map(|(i, def)| (TypeId::new(i as u32), def))
    }

    /// Iterates over all identifiers in declaration order
    pub fn ids(&self) -> impl Iterator<Item = TypeId> {
        (0..self.types.len() as u32).map(TypeId::new)
    }

    /// Looks up a type by fully qualified name (leading dot optional)
    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        let name = name.strip_prefix('.').unwrap_or(name);
        self.by_name.get(name).copied()
    }

    /// Looks up a type by fully qualified or display name.
    ///
    /// A trailing `.proto` is ignored, matching the naming used by ordered
    /// proto lists.
    pub fn find(&self, name: &str) -> Option<TypeId> {
        let name = name.strip_suffix(".proto").unwrap_or(name);
        self.lookup(name).or_else(|| {
            self.iter()
                .find(|(_, def)| def.display_name() == name)
                .map(|(id, _)| id)
        })
    }

    /// Resolves a type reference made from inside `owner`.
    ///
    /// Fully qualified references (leading dot) are looked up directly.
    /// Relative references are searched from the innermost scope outwards.
    pub fn resolve(&self, owner: TypeId, reference: &str) -> Option<TypeId> {
        if let Some(absolute) = reference.strip_prefix('.') {
            return self.lookup(absolute);
        }
        let mut scope = self.get(owner).map_or("", |def| def.name.as_str());
        loop {
            let candidate = if scope.is_empty() {
                reference.to_string()
            } else {
                format!("{}.{}", scope, reference)
            };
            if let Some(id) = self.lookup(&candidate) {
                return Some(id);
            }
            if scope.is_empty() {
                return None;
            }
            scope = scope.rsplit_once('.').map_or("", |(outer, _)| outer);
        }
    }

    /// Returns true if `id` takes part in matching.
    ///
    /// Map entries and aliased enums never do. Nested types only do when
    /// `include_nested` is set.
    pub fn is_matchable(&self, id: TypeId, include_nested: bool) -> bool {
        self.get(id).is_some_and(|def| {
            !def.is_map_entry() && !def.is_alias_enum() && (include_nested || !def.is_nested())
        })
    }
}

/// Fluent construction of a [`Schema`]
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    package: String,
    types: Vec<(Option<String>, TypeDef)>,
}

impl SchemaBuilder {
    /// Creates an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the package for types declared after this call
    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.package = package.into();
        self
    }

    /// Declares a top-level message
    pub fn message(self, name: &str, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.push(None, name, TypeKind::Message(MessageDef::new(fields)))
    }

    /// Declares a top-level enum
    pub fn enumeration(self, name: &str, values: impl IntoIterator<Item = i32>) -> Self {
        let values = values.into_iter().collect();
        self.push(None, name, TypeKind::Enum(EnumDef { values, alias: false }))
    }

    /// Declares a top-level enum that allows aliased value numbers
    pub fn alias_enumeration(self, name: &str, values: impl IntoIterator<Item = i32>) -> Self {
        let values = values.into_iter().collect();
        self.push(None, name, TypeKind::Enum(EnumDef { values, alias: true }))
    }

    /// Declares a message nested inside `parent` (given relative to the package)
    pub fn nested_message(
        self,
        parent: &str,
        name: &str,
        fields: impl IntoIterator<Item = FieldDef>,
    ) -> Self {
        self.push(Some(parent), name, TypeKind::Message(MessageDef::new(fields)))
    }

    /// Declares an enum nested inside `parent`
    pub fn nested_enum(
        self,
        parent: &str,
        name: &str,
        values: impl IntoIterator<Item = i32>,
    ) -> Self {
        let values = values.into_iter().collect();
        self.push(Some(parent), name, TypeKind::Enum(EnumDef { values, alias: false }))
    }

    /// Declares a synthetic map entry inside `parent`.
    ///
    /// The owning message still needs a repeated field naming the entry.
    pub fn map_entry(self, parent: &str, name: &str, key: FieldType, value: FieldType) -> Self {
        let field = |number, field_type| FieldDef {
            number,
            cardinality: Cardinality::Optional,
            field_type,
            oneof: None,
        };
        let message = MessageDef {
            fields: vec![field(1, key), field(2, value)],
            oneof_count: 0,
            map_entry: true,
        };
        self.push(Some(parent), name, TypeKind::Message(message))
    }

    fn push(mut self, parent: Option<&str>, name: &str, kind: TypeKind) -> Self {
        let qualify = |local: &str| {
            if self.package.is_empty() {
                local.to_string()
            } else {
                format!("{}.{}", self.package, local)
            }
        };
        let parent_name = parent.map(qualify);
        let full_name = match &parent_name {
            Some(parent) => format!("{}.{}", parent, name),
            None => qualify(name),
        };
        let def = TypeDef {
            name: full_name,
            package: self.package.clone(),
            parent: None,
            kind,
        };
        self.types.push((parent_name, def));
        self
    }

    /// Resolves parents and builds the schema
    pub fn build(self) -> Result<Schema> {
        let positions: HashMap<String, TypeId> = self
            .types
            .iter()
            .enumerate()
            .map(|(i, (_, def))| (def.name.clone(), TypeId::new(i as u32)))
            .collect();

        let mut types = Vec::with_capacity(self.types.len());
        for (parent, mut def) in self.types {
            if let Some(parent) = parent {
                let id = positions.get(&parent).copied().ok_or_else(|| {
                    Error::UnknownParent {
                        name: def.name.clone(),
                        parent: parent.clone(),
                    }
                })?;
                def.parent = Some(id);
            }
            types.push(def);
        }
        Schema::new(types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sample() -> Schema {
        SchemaBuilder::new()
            .package("game")
            .message(
                "Outer",
                [
                    FieldDef::named(1, "Inner"),
                    FieldDef::named(2, "Kind"),
                    FieldDef::named(3, "Outer.EntriesEntry").repeated(),
                ],
            )
            .nested_message("Outer", "Inner", [FieldDef::scalar(1, ScalarType::Int32)])
            .map_entry(
                "Outer",
                "EntriesEntry",
                FieldType::Scalar(ScalarType::String),
                FieldType::Scalar(ScalarType::Int64),
            )
            .enumeration("Kind", [0, 1, 2])
            .build()
            .unwrap()
    }

    #[test]
    fn test_display_name_strips_package() {
        let schema = sample();
        let inner = schema.lookup("game.Outer.Inner").unwrap();
        assert_eq!(schema.name(inner), "Outer.Inner");
        assert_eq!(schema.get(inner).unwrap().parent, schema.lookup(".game.Outer"));
    }

    #[test]
    fn test_find_accepts_proto_suffix() {
        let schema = sample();
        assert_eq!(schema.find("Kind.proto"), schema.lookup("game.Kind"));
        assert_eq!(schema.find("game.Kind"), schema.lookup("game.Kind"));
        assert_eq!(schema.find("Missing"), None);
    }

    #[test]
    fn test_resolve_scopes() {
        let schema = sample();
        let outer = schema.lookup("game.Outer").unwrap();
        assert_eq!(schema.resolve(outer, "Inner"), schema.lookup("game.Outer.Inner"));
        assert_eq!(schema.resolve(outer, "Kind"), schema.lookup("game.Kind"));
        assert_eq!(schema.resolve(outer, ".game.Kind"), schema.lookup("game.Kind"));
        assert_eq!(schema.resolve(outer, "Nope"), None);
    }

    #[test]
    fn test_matchable_types() {
        let schema = sample();
        let outer = schema.lookup("game.Outer").unwrap();
        let inner = schema.lookup("game.Outer.Inner").unwrap();
        let entry = schema.lookup("game.Outer.EntriesEntry").unwrap();
        assert!(schema.is_matchable(outer, false));
        assert!(!schema.is_matchable(inner, false));
        assert!(schema.is_matchable(inner, true));
        assert!(!schema.is_matchable(entry, true));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = SchemaBuilder::new()
            .message("A", [])
            .enumeration("A", [0])
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let err = SchemaBuilder::new()
            .nested_message("Ghost", "Child", [])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::UnknownParent { .. }));
    }

    #[test]
    fn test_oneof_count() {
        let message = MessageDef::new([
            FieldDef::scalar(1, ScalarType::Int32).in_oneof(0),
            FieldDef::scalar(2, ScalarType::Bool).in_oneof(1),
            FieldDef::scalar(3, ScalarType::Bool),
        ]);
        assert_eq!(message.oneof_count, 2);
    }
}
