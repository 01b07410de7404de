//! Signature construction.
//!
//! Signatures are built depth-first over the schema arena with an explicit
//! ancestor path. A reference to a message already on the path becomes a
//! [`ShapeKind::Cycle`] marker; a message that would sit deeper than
//! [`SignatureConfig::max_depth`] becomes a [`ShapeKind::Truncated`] marker.
//!
//! Signatures of messages that are not part of any reference cycle do not
//! depend on where they are reached from, so they are memoized and reused
//! whenever the remaining depth budget allows a full expansion. The result is
//! identical to a fresh expansion, so the order in which types are declared
//! never changes a signature.

use super::{EnumSignature, FieldShape, MessageSignature, ShapeKind, TypeSignature};
use crate::error::{Error, Result};
use crate::schema::{EnumDef, FieldType, ScalarType, Schema, TypeId, TypeKind};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Default bound on nested message expansion
pub const DEFAULT_MAX_DEPTH: u32 = 8;

/// Configuration for signature construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureConfig {
    /// Deepest nesting level at which a message is still expanded
    pub max_depth: u32,
    /// Shape references to field-less messages and value-less enums as `bytes`
    pub empty_as_bytes: bool,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            empty_as_bytes: true,
        }
    }
}

impl SignatureConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the expansion depth bound
    pub fn max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    /// Sets whether empty messages and enums are shaped as `bytes`
    pub fn empty_as_bytes(mut self, enabled: bool) -> Self {
        self.empty_as_bytes = enabled;
        self
    }
}

/// Signatures for every type of one schema, indexed by [`TypeId`]
#[derive(Debug, Clone, Default)]
pub struct SignatureSet {
    signatures: Vec<TypeSignature>,
}

impl SignatureSet {
    /// Builds signatures for every type in `schema`.
    ///
    /// Fails with a schema error if any field references a type that cannot
    /// be resolved, or if a map entry is malformed.
    pub fn build(schema: &Schema, config: &SignatureConfig) -> Result<Self> {
        let targets = resolve_targets(schema)?;
        let cyclic = cyclic_types(&targets);

        let mut builder = Builder {
            schema,
            config,
            targets,
            cyclic,
            path: Vec::new(),
            messages: HashMap::new(),
            enums: HashMap::new(),
        };

        let mut signatures = Vec::with_capacity(schema.len());
        for (id, def) in schema.iter() {
            let signature = match &def.kind {
                TypeKind::Message(_) => TypeSignature::Message(builder.message(id)?),
                TypeKind::Enum(body) => TypeSignature::Enum(builder.enumeration(id, body)),
            };
            signatures.push(signature);
        }

        let truncated = signatures.iter().filter(|s| s.is_truncated()).count();
        if truncated > 0 {
            debug!(
                "{} signatures truncated at depth {}",
                truncated, config.max_depth
            );
        }
        debug!(
            "Built {} signatures ({} memoized messages)",
            signatures.len(),
            builder.messages.len()
        );

        Ok(Self { signatures })
    }

    /// Returns the signature for `id`
    pub fn get(&self, id: TypeId) -> Option<&TypeSignature> {
        self.signatures.get(id.index())
    }

    /// Number of signatures
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// Returns true if the set is empty
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Iterates over signatures in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeSignature)> + '_ {
        self.signatures
            .iter()
            .enumerate()
            .map(|(i, s)| (TypeId::new(i as u32), s))
    }

    /// Number of signatures carrying a truncation marker
    pub fn truncated_count(&self) -> usize {
        self.signatures.iter().filter(|s| s.is_truncated()).count()
    }
}

struct Builder<'a> {
    schema: &'a Schema,
    config: &'a SignatureConfig,
    /// Resolved target of every field, `None` for scalars
    targets: Vec<Vec<Option<TypeId>>>,
    /// Whether each type lies on a reference cycle
    cyclic: Vec<bool>,
    path: Vec<TypeId>,
    messages: HashMap<TypeId, Arc<MessageSignature>>,
    enums: HashMap<TypeId, Arc<EnumSignature>>,
}

impl Builder<'_> {
    fn message(&mut self, id: TypeId) -> Result<Arc<MessageSignature>> {
        let depth = self.path.len() as u32;
        if let Some(cached) = self.messages.get(&id) {
            if depth + cached.height() <= self.config.max_depth {
                return Ok(Arc::clone(cached));
            }
        }

        self.path.push(id);
        let fields = self.fields(id);
        self.path.pop();

        let signature = Arc::new(MessageSignature::new(fields?));
        if !self.cyclic[id.index()] && !signature.is_truncated() {
            self.messages.insert(id, Arc::clone(&signature));
        }
        Ok(signature)
    }

    /// Aliased enums are opaque: their value numbers are dropped, so every
    /// reference to one has the same shape (`bytes` under `empty_as_bytes`).
    fn enumeration(&mut self, id: TypeId, body: &EnumDef) -> Arc<EnumSignature> {
        Arc::clone(self.enums.entry(id).or_insert_with(|| {
            let values = if body.alias { &[][..] } else { body.values.as_slice() };
            Arc::new(EnumSignature::new(values.iter().copied()))
        }))
    }

    fn fields(&mut self, owner: TypeId) -> Result<Vec<FieldShape>> {
        let schema = self.schema;
        let Some(TypeKind::Message(body)) = schema.get(owner).map(|def| &def.kind) else {
            return Ok(Vec::new());
        };

        let mut shapes = Vec::with_capacity(body.fields.len());
        let mut oneofs: Vec<Vec<FieldShape>> = vec![Vec::new(); body.oneof_count as usize];

        for (i, field) in body.fields.iter().enumerate() {
            let kind = self.kind(owner, i)?;
            let shape = FieldShape::new(field.number, field.cardinality, kind);
            match field.oneof.map(|o| o as usize) {
                Some(group) if group < oneofs.len() => oneofs[group].push(shape),
                _ => shapes.push(shape),
            }
        }

        shapes.extend(
            oneofs
                .into_iter()
                .filter(|members| !members.is_empty())
                .map(FieldShape::oneof),
        );
        Ok(shapes)
    }

    /// Shape of field `index` of message `owner`
    fn kind(&mut self, owner: TypeId, index: usize) -> Result<ShapeKind> {
        let schema = self.schema;
        let Some(TypeKind::Message(body)) = schema.get(owner).map(|def| &def.kind) else {
            return Ok(ShapeKind::Scalar(ScalarType::Bytes));
        };
        let field = &body.fields[index];
        match (&field.field_type, self.targets[owner.index()][index]) {
            (FieldType::Scalar(scalar), _) => Ok(ShapeKind::Scalar(*scalar)),
            (FieldType::Named(_), Some(target)) => self.reference(target),
            (FieldType::Named(name), None) => Err(Error::dangling_reference(
                schema.get(owner).map_or("?", |d| d.name.as_str()),
                field.number,
                name.as_str(),
            )),
        }
    }

    fn reference(&mut self, target: TypeId) -> Result<ShapeKind> {
        let schema = self.schema;
        let Some(def) = schema.get(target) else {
            return Ok(ShapeKind::Scalar(ScalarType::Bytes));
        };

        match &def.kind {
            TypeKind::Enum(body) => {
                let signature = self.enumeration(target, body);
                if self.config.empty_as_bytes && signature.values().is_empty() {
                    Ok(ShapeKind::Scalar(ScalarType::Bytes))
                } else {
                    Ok(ShapeKind::Enum(signature))
                }
            }
            TypeKind::Message(body) if body.map_entry => self.map_entry(target),
            TypeKind::Message(_) => {
                if let Some(position) = self.path.iter().rposition(|&p| p == target) {
                    let depth = (self.path.len() - 1 - position) as u32;
                    return Ok(ShapeKind::Cycle { depth });
                }
                let depth = self.path.len() as u32;
                if depth > self.config.max_depth {
                    return Ok(ShapeKind::Truncated { depth });
                }
                let signature = self.message(target)?;
                if self.config.empty_as_bytes && signature.fields().is_empty() {
                    Ok(ShapeKind::Scalar(ScalarType::Bytes))
                } else {
                    Ok(ShapeKind::Message(signature))
                }
            }
        }
    }

    /// Map entries are transparent: the map is shaped by its key and value
    fn map_entry(&mut self, entry: TypeId) -> Result<ShapeKind> {
        let schema = self.schema;
        let def = schema.get(entry);
        let malformed = || Error::MalformedMapEntry {
            name: def.map_or_else(String::new, |d| d.name.clone()),
        };
        let Some(TypeKind::Message(body)) = def.map(|d| &d.kind) else {
            return Err(malformed());
        };

        let position = |number: u32| body.fields.iter().position(|f| f.number == number);
        let (Some(key), Some(value)) = (position(1), position(2)) else {
            return Err(malformed());
        };

        let nested_entry = |index: usize| {
            self.targets[entry.index()][index]
                .and_then(|t| schema.get(t))
                .is_some_and(|d| d.is_map_entry())
        };
        if nested_entry(key) || nested_entry(value) {
            return Err(malformed());
        }

        let key = self.kind(entry, key)?;
        let value = self.kind(entry, value)?;
        Ok(ShapeKind::Map {
            key: Box::new(key),
            value: Box::new(value),
        })
    }
}

/// Resolves every named field reference, failing on the first dangling one
fn resolve_targets(schema: &Schema) -> Result<Vec<Vec<Option<TypeId>>>> {
    let mut targets = Vec::with_capacity(schema.len());
    for (id, def) in schema.iter() {
        let TypeKind::Message(body) = &def.kind else {
            targets.push(Vec::new());
            continue;
        };
        let mut resolved = Vec::with_capacity(body.fields.len());
        for field in &body.fields {
            match &field.field_type {
                FieldType::Scalar(_) => resolved.push(None),
                FieldType::Named(name) => {
                    let target = schema.resolve(id, name).ok_or_else(|| {
                        Error::dangling_reference(def.name.as_str(), field.number, name.as_str())
                    })?;
                    resolved.push(Some(target));
                }
            }
        }
        targets.push(resolved);
    }
    Ok(targets)
}

/// Marks every type that lies on a reference cycle (Tarjan's SCC algorithm)
fn cyclic_types(targets: &[Vec<Option<TypeId>>]) -> Vec<bool> {
    const UNVISITED: usize = usize::MAX;

    let edges: Vec<Vec<usize>> = targets
        .iter()
        .map(|fields| fields.iter().flatten().map(|t| t.index()).collect())
        .collect();
    let n = edges.len();

    let mut index = vec![UNVISITED; n];
    let mut low = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut cyclic = vec![false; n];
    let mut counter = 0;

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = counter;
        low[root] = counter;
        counter += 1;
        stack.push(root);
        on_stack[root] = true;
        let mut work = vec![(root, 0usize)];

        while let Some(frame) = work.last_mut() {
            let (v, next) = *frame;
            if next < edges[v].len() {
                frame.1 += 1;
                let w = edges[v][next];
                if index[w] == UNVISITED {
                    index[w] = counter;
                    low[w] = counter;
                    counter += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    work.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
                continue;
            }

            work.pop();
            if let Some(&(parent, _)) = work.last() {
                low[parent] = low[parent].min(low[v]);
            }
            if low[v] == index[v] {
                let mut members = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    members.push(w);
                    if w == v {
                        break;
                    }
                }
                if members.len() > 1 {
                    for member in members {
                        cyclic[member] = true;
                    }
                }
            }
        }
    }

    for (v, out) in edges.iter().enumerate() {
        if out.contains(&v) {
            cyclic[v] = true;
        }
    }
    cyclic
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schema::{Cardinality, FieldDef, SchemaBuilder};
    use pretty_assertions::assert_eq;

    fn signature_of(schema: &Schema, set: &SignatureSet, name: &str) -> TypeSignature {
        set.get(schema.find(name).unwrap()).unwrap().clone()
    }

    fn build(schema: &Schema) -> SignatureSet {
        SignatureSet::build(schema, &SignatureConfig::default()).unwrap()
    }

    #[test]
    fn test_names_and_order_ignored() {
        let reference = SchemaBuilder::new()
            .message(
                "Player",
                [
                    FieldDef::scalar(1, ScalarType::Int32),
                    FieldDef::scalar(2, ScalarType::String),
                    FieldDef::named(3, "Pos"),
                ],
            )
            .message("Pos", [FieldDef::scalar(1, ScalarType::Float)])
            .build()
            .unwrap();
        let obfuscated = SchemaBuilder::new()
            .message("QWERTY", [FieldDef::scalar(1, ScalarType::Float)])
            .message(
                "ABCDEF",
                [
                    FieldDef::named(3, "QWERTY"),
                    FieldDef::scalar(2, ScalarType::String),
                    FieldDef::scalar(1, ScalarType::Int32),
                ],
            )
            .build()
            .unwrap();

        let ref_sigs = build(&reference);
        let obs_sigs = build(&obfuscated);
        assert_eq!(
            signature_of(&reference, &ref_sigs, "Player"),
            signature_of(&obfuscated, &obs_sigs, "ABCDEF")
        );
        assert_eq!(
            signature_of(&reference, &ref_sigs, "Pos"),
            signature_of(&obfuscated, &obs_sigs, "QWERTY")
        );
    }

    #[test]
    fn test_self_reference() {
        let schema = SchemaBuilder::new()
            .message(
                "Node",
                [FieldDef::scalar(1, ScalarType::Int32), FieldDef::named(2, "Node")],
            )
            .message(
                "Tree",
                [FieldDef::scalar(1, ScalarType::Int32), FieldDef::named(2, "Tree")],
            )
            .build()
            .unwrap();
        let set = build(&schema);
        let node = signature_of(&schema, &set, "Node");
        assert_eq!(node, signature_of(&schema, &set, "Tree"));
        assert_eq!(node.to_string(), "message {1: int32, 2: cycle@0}");
        assert!(!node.is_truncated());
    }

    #[test]
    fn test_mutual_recursion_differs_from_self_recursion() {
        let schema = SchemaBuilder::new()
            .message(
                "Node",
                [FieldDef::scalar(1, ScalarType::Int32), FieldDef::named(2, "Node")],
            )
            .message(
                "Ping",
                [FieldDef::scalar(1, ScalarType::Int32), FieldDef::named(2, "Pong")],
            )
            .message(
                "Pong",
                [FieldDef::scalar(1, ScalarType::Int32), FieldDef::named(2, "Ping")],
            )
            .build()
            .unwrap();
        let set = build(&schema);
        let ping = signature_of(&schema, &set, "Ping");
        assert_ne!(signature_of(&schema, &set, "Node"), ping);
        assert_eq!(ping, signature_of(&schema, &set, "Pong"));
        assert_eq!(
            ping.to_string(),
            "message {1: int32, 2: {1: int32, 2: cycle@1}}"
        );
    }

    #[test]
    fn test_declaration_order_does_not_leak_through_memoization() {
        let fields = |target: &str| {
            [
                FieldDef::scalar(1, ScalarType::Bool),
                FieldDef::named(2, target),
            ]
        };
        let forward = SchemaBuilder::new()
            .message("Root", [FieldDef::named(1, "B")])
            .message("B", fields("C"))
            .message("C", fields("B"))
            .message("D", [FieldDef::named(1, "E")])
            .message("E", [FieldDef::named(1, "F")])
            .message("F", [FieldDef::scalar(1, ScalarType::Int32)])
            .build()
            .unwrap();
        let backward = SchemaBuilder::new()
            .message("F", [FieldDef::scalar(1, ScalarType::Int32)])
            .message("E", [FieldDef::named(1, "F")])
            .message("D", [FieldDef::named(1, "E")])
            .message("C", fields("B"))
            .message("B", fields("C"))
            .message("Root", [FieldDef::named(1, "B")])
            .build()
            .unwrap();

        for config in [SignatureConfig::default(), SignatureConfig::new().max_depth(1)] {
            let a = SignatureSet::build(&forward, &config).unwrap();
            let b = SignatureSet::build(&backward, &config).unwrap();
            for name in ["Root", "B", "C", "D", "E", "F"] {
                assert_eq!(
                    signature_of(&forward, &a, name),
                    signature_of(&backward, &b, name),
                    "signature of {} with max_depth {}",
                    name,
                    config.max_depth
                );
            }
        }
    }

    #[test]
    fn test_depth_bound_truncates() {
        let mut builder = SchemaBuilder::new();
        for level in 0..12 {
            let fields = if level == 11 {
                vec![FieldDef::scalar(1, ScalarType::Int32)]
            } else {
                vec![FieldDef::named(1, format!("L{}", level + 1))]
            };
            builder = builder.message(&format!("L{}", level), fields);
        }
        let schema = builder.build().unwrap();

        let set = SignatureSet::build(&schema, &SignatureConfig::new().max_depth(3)).unwrap();
        let top = signature_of(&schema, &set, "L0");
        assert!(top.is_truncated());
        assert_eq!(top.depth(), 3);
        assert!(!signature_of(&schema, &set, "L10").is_truncated());
        assert!(set.truncated_count() > 0);

        let full = build(&schema);
        assert!(!signature_of(&schema, &full, "L5").is_truncated());
    }

    #[test]
    fn test_dangling_reference() {
        let schema = SchemaBuilder::new()
            .message("A", [FieldDef::named(1, "Missing")])
            .build()
            .unwrap();
        let err = SignatureSet::build(&schema, &SignatureConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(err.to_string().contains("Missing"));
    }

    #[test]
    fn test_empty_as_bytes() {
        let schema = SchemaBuilder::new()
            .message("Empty", [])
            .enumeration("Nothing", [])
            .message(
                "Holder",
                [FieldDef::named(1, "Empty"), FieldDef::named(2, "Nothing")],
            )
            .build()
            .unwrap();

        let set = build(&schema);
        assert_eq!(
            signature_of(&schema, &set, "Holder").to_string(),
            "message {1: bytes, 2: bytes}"
        );

        let config = SignatureConfig::new().empty_as_bytes(false);
        let set = SignatureSet::build(&schema, &config).unwrap();
        assert_eq!(
            signature_of(&schema, &set, "Holder").to_string(),
            "message {1: {}, 2: enum[]}"
        );
    }

    #[test]
    fn test_alias_enums_share_one_shape() {
        let schema = SchemaBuilder::new()
            .alias_enumeration("CmdA", [0, 7, 7])
            .alias_enumeration("CmdB", [0, 900])
            .message("HoldA", [FieldDef::named(1, "CmdA")])
            .message("HoldB", [FieldDef::named(1, "CmdB")])
            .build()
            .unwrap();

        let set = build(&schema);
        assert_eq!(
            signature_of(&schema, &set, "HoldA"),
            signature_of(&schema, &set, "HoldB")
        );
        assert_eq!(signature_of(&schema, &set, "HoldA").to_string(), "message {1: bytes}");
    }

    #[test]
    fn test_map_and_oneof_shapes() {
        let schema = SchemaBuilder::new()
            .message(
                "Inventory",
                [
                    FieldDef::named(1, "Inventory.ItemsEntry").repeated(),
                    FieldDef::scalar(2, ScalarType::Int32).in_oneof(0),
                    FieldDef::scalar(3, ScalarType::String).in_oneof(0),
                ],
            )
            .map_entry(
                "Inventory",
                "ItemsEntry",
                FieldType::Scalar(ScalarType::Uint32),
                FieldType::Named("Kind".into()),
            )
            .enumeration("Kind", [0, 1])
            .build()
            .unwrap();
        let set = build(&schema);
        let TypeSignature::Message(inventory) = signature_of(&schema, &set, "Inventory") else {
            panic!("expected a message");
        };
        assert_eq!(inventory.fields().len(), 2);
        assert_eq!(inventory.fields()[0].cardinality, Cardinality::Repeated);
        assert_eq!(
            inventory.to_string(),
            "{1: map<uint32, enum[0-1]>, 2: oneof {2: int32, 3: string}}"
        );
    }

    #[test]
    fn test_malformed_map_entry() {
        let schema = SchemaBuilder::new()
            .message("Holder", [FieldDef::named(1, "Holder.BadEntry").repeated()])
            .nested_message("Holder", "BadEntry", [FieldDef::scalar(1, ScalarType::String)])
            .build()
            .unwrap();
        let mut types: Vec<_> = schema.iter().map(|(_, d)| d.clone()).collect();
        if let TypeKind::Message(body) = &mut types[1].kind {
            body.map_entry = true;
        }
        let schema = Schema::new(types).unwrap();
        let err = SignatureSet::build(&schema, &SignatureConfig::default()).unwrap_err();
        assert!(matches!(err, Error::MalformedMapEntry { .. }));
    }

    #[test]
    fn test_cyclic_types() {
        let t = |i: u32| Some(TypeId::new(i));
        // 0 -> 1 -> 2 -> 1, 3 -> 3, 4 -> 0
        let targets = vec![vec![t(1)], vec![t(2), None], vec![t(1)], vec![t(3)], vec![t(0)]];
        assert_eq!(cyclic_types(&targets), vec![false, true, true, true, false]);
    }
}
