//! Conversion from compiled descriptor sets.
//!
//! Descriptor sets are produced with `protoc --descriptor_set_out=FILE`. Every
//! file's messages and enums, including nested declarations, are flattened into
//! a [`Schema`] in declaration order.

use super::{
    Cardinality, EnumDef, FieldDef, FieldType, MessageDef, ScalarType, Schema, TypeDef, TypeId,
    TypeKind,
};
use crate::error::{Error, Result};
use prost::Message;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorSet,
};
use std::path::Path;
use tracing::{debug, trace};

impl Schema {
    /// Builds a schema from a decoded descriptor set
    pub fn from_descriptor_set(set: &FileDescriptorSet) -> Result<Self> {
        let mut collector = Collector::default();
        for file in &set.file {
            trace!("Collecting types from {}", file.name());
            let package = file.package();
            for message in &file.message_type {
                collector.message(package, package, None, message);
            }
            for enum_type in &file.enum_type {
                collector.enumeration(package, package, None, enum_type);
            }
        }
        debug!(
            "Collected {} types from {} files",
            collector.types.len(),
            set.file.len()
        );
        Schema::new(collector.types)
    }

    /// Decodes a serialized `FileDescriptorSet` into a schema
    pub fn decode(data: &[u8]) -> Result<Self> {
        let set = FileDescriptorSet::decode(data)?;
        Self::from_descriptor_set(&set)
    }
}

/// Reads and decodes a descriptor set file
pub fn load_schema(path: impl AsRef<Path>) -> Result<Schema> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
    Schema::decode(&data)
}

#[derive(Default)]
struct Collector {
    types: Vec<TypeDef>,
}

impl Collector {
    fn next_id(&self) -> TypeId {
        TypeId::new(self.types.len() as u32)
    }

    fn message(
        &mut self,
        package: &str,
        scope: &str,
        parent: Option<TypeId>,
        proto: &DescriptorProto,
    ) {
        let name = qualify(scope, proto.name());
        let id = self.next_id();
        let body = MessageDef {
            fields: proto.field.iter().map(convert_field).collect(),
            oneof_count: proto.oneof_decl.len() as u32,
            map_entry: proto
                .options
                .as_ref()
                .and_then(|o| o.map_entry)
                .unwrap_or(false),
        };
        self.types.push(TypeDef {
            name: name.clone(),
            package: package.to_string(),
            parent,
            kind: TypeKind::Message(body),
        });

        for nested in &proto.nested_type {
            self.message(package, &name, Some(id), nested);
        }
        for enum_type in &proto.enum_type {
            self.enumeration(package, &name, Some(id), enum_type);
        }
    }

    fn enumeration(
        &mut self,
        package: &str,
        scope: &str,
        parent: Option<TypeId>,
        proto: &EnumDescriptorProto,
    ) {
        self.types.push(TypeDef {
            name: qualify(scope, proto.name()),
            package: package.to_string(),
            parent,
            kind: TypeKind::Enum(EnumDef {
                values: proto.value.iter().map(|v| v.number()).collect(),
                alias: proto.options.as_ref().and_then(|o| o.allow_alias).unwrap_or(false),
            }),
        });
    }
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

fn convert_field(field: &FieldDescriptorProto) -> FieldDef {
    let cardinality = match field.label() {
        Label::Optional => Cardinality::Optional,
        Label::Required => Cardinality::Required,
        Label::Repeated => Cardinality::Repeated,
    };

    let field_type = match field.type_name.as_deref() {
        Some(type_name) if !type_name.is_empty() => FieldType::Named(type_name.to_string()),
        _ => FieldType::Scalar(scalar_type(field.r#type())),
    };

    // Proto3 `optional` fields live in a synthetic oneof of their own
    let oneof = if field.proto3_optional.unwrap_or(false) {
        None
    } else {
        field.oneof_index.and_then(|i| u32::try_from(i).ok())
    };

    FieldDef {
        number: u32::try_from(field.number()).unwrap_or(0),
        cardinality,
        field_type,
        oneof,
    }
}

fn scalar_type(ty: Type) -> ScalarType {
    match ty {
        Type::Double => ScalarType::Double,
        Type::Float => ScalarType::Float,
        Type::Int64 => ScalarType::Int64,
        Type::Uint64 => ScalarType::Uint64,
        Type::Int32 => ScalarType::Int32,
        Type::Fixed64 => ScalarType::Fixed64,
        Type::Fixed32 => ScalarType::Fixed32,
        Type::Bool => ScalarType::Bool,
        Type::String => ScalarType::String,
        Type::Uint32 => ScalarType::Uint32,
        Type::Sfixed32 => ScalarType::Sfixed32,
        Type::Sfixed64 => ScalarType::Sfixed64,
        Type::Sint32 => ScalarType::Sint32,
        Type::Sint64 => ScalarType::Sint64,
        // A message, group or enum without a type name carries no structure
        Type::Bytes | Type::Group | Type::Message | Type::Enum => ScalarType::Bytes,
    }
}
