//! Signature grouping: exact matches, uniques and perfect mappables.

use super::Side;
use crate::schema::{FieldType, Schema, TypeDef, TypeId, TypeKind};
use crate::signature::{SignatureSet, TypeSignature};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Types of both schemas sharing one signature
#[derive(Debug, Clone, PartialEq)]
pub struct ExactMatch {
    /// The shared signature
    pub signature: TypeSignature,
    /// Obfuscated members, in declaration order
    pub obfuscated: Vec<TypeId>,
    /// Reference members, in declaration order
    pub reference: Vec<TypeId>,
}

impl ExactMatch {
    /// Returns true if the group holds exactly one type per side
    pub fn is_one_to_one(&self) -> bool {
        self.obfuscated.len() == 1 && self.reference.len() == 1
    }

    /// Members on one side
    pub fn members(&self, side: Side) -> &[TypeId] {
        match side {
            Side::Obfuscated => &self.obfuscated,
            Side::Reference => &self.reference,
        }
    }
}

/// One schema together with its signatures and matchable types
#[derive(Clone, Copy)]
pub(super) struct SideView<'a> {
    schema: &'a Schema,
    signatures: &'a SignatureSet,
    matchable: &'a [TypeId],
}

impl<'a> SideView<'a> {
    pub(super) fn new(
        schema: &'a Schema,
        signatures: &'a SignatureSet,
        matchable: &'a [TypeId],
    ) -> Self {
        Self {
            schema,
            signatures,
            matchable,
        }
    }

    /// Occurrences of each signature among all types except map entries
    fn full_counts(&self) -> HashMap<&'a TypeSignature, usize> {
        let mut counts = HashMap::new();
        for (id, def) in self.schema.iter() {
            if def.is_map_entry() || def.is_alias_enum() {
                continue;
            }
            if let Some(signature) = self.signatures.get(id) {
                *counts.entry(signature).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Types referenced by the fields of `id` that carry structure.
    ///
    /// Aliased enums are opaque and never count.
    fn referenced(&self, id: TypeId, empty_as_bytes: bool) -> Vec<TypeId> {
        let Some(TypeKind::Message(body)) = self.schema.get(id).map(|def| &def.kind) else {
            return Vec::new();
        };
        body.fields
            .iter()
            .filter_map(|field| match &field.field_type {
                FieldType::Named(name) => self.schema.resolve(id, name),
                FieldType::Scalar(_) => None,
            })
            .filter(|&target| !self.schema.get(target).is_some_and(TypeDef::is_alias_enum))
            .filter(|&target| !(empty_as_bytes && self.is_empty_type(target)))
            .collect()
    }

    fn is_empty_type(&self, id: TypeId) -> bool {
        match self.schema.get(id).map(|def| &def.kind) {
            Some(TypeKind::Message(body)) => body.fields.is_empty(),
            Some(TypeKind::Enum(body)) => body.values.is_empty(),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(super) struct Groups {
    exact: Vec<ExactMatch>,
    obs_group: HashMap<TypeId, usize>,
    ref_group: HashMap<TypeId, usize>,
    obs_uniques: BTreeSet<TypeId>,
    ref_uniques: BTreeSet<TypeId>,
    perfect: Vec<(TypeId, TypeId)>,
}

impl Groups {
    pub(super) fn compute(
        obs: SideView<'_>,
        reference: SideView<'_>,
        empty_as_bytes: bool,
    ) -> Self {
        let mut by_signature: HashMap<&TypeSignature, (Vec<TypeId>, Vec<TypeId>)> = HashMap::new();
        for &id in obs.matchable {
            if let Some(signature) = obs.signatures.get(id) {
                by_signature.entry(signature).or_default().0.push(id);
            }
        }
        for &id in reference.matchable {
            if let Some(signature) = reference.signatures.get(id) {
                by_signature.entry(signature).or_default().1.push(id);
            }
        }

        let mut obs_uniques = BTreeSet::new();
        let mut ref_uniques = BTreeSet::new();
        let mut exact = Vec::new();
        for (signature, (obfuscated, refs)) in by_signature {
            if let [only] = obfuscated.as_slice() {
                obs_uniques.insert(*only);
            }
            if let [only] = refs.as_slice() {
                ref_uniques.insert(*only);
            }
            if !obfuscated.is_empty() && !refs.is_empty() {
                exact.push(ExactMatch {
                    signature: signature.clone(),
                    obfuscated,
                    reference: refs,
                });
            }
        }
        exact.sort_by_key(|group| (group.reference[0], group.obfuscated[0]));

        let mut obs_group = HashMap::new();
        let mut ref_group = HashMap::new();
        for (position, group) in exact.iter().enumerate() {
            obs_group.extend(group.obfuscated.iter().map(|&id| (id, position)));
            ref_group.extend(group.reference.iter().map(|&id| (id, position)));
        }

        let obs_counts = obs.full_counts();
        let ref_counts = reference.full_counts();
        let one_to_one = |signature: &TypeSignature| {
            obs_counts.get(signature) == Some(&1) && ref_counts.get(signature) == Some(&1)
        };
        let perfect = exact
            .iter()
            .filter(|group| group.is_one_to_one())
            .filter(|group| {
                closed(obs, group.obfuscated[0], empty_as_bytes, &one_to_one)
                    && closed(reference, group.reference[0], empty_as_bytes, &one_to_one)
            })
            .map(|group| (group.obfuscated[0], group.reference[0]))
            .collect();

        Self {
            exact,
            obs_group,
            ref_group,
            obs_uniques,
            ref_uniques,
            perfect,
        }
    }

    pub(super) fn exact(&self) -> &[ExactMatch] {
        &self.exact
    }

    pub(super) fn exact_for(&self, side: Side, id: TypeId) -> Option<&ExactMatch> {
        let positions = match side {
            Side::Obfuscated => &self.obs_group,
            Side::Reference => &self.ref_group,
        };
        positions.get(&id).map(|&position| &self.exact[position])
    }

    pub(super) fn uniques(&self, side: Side) -> &BTreeSet<TypeId> {
        match side {
            Side::Obfuscated => &self.obs_uniques,
            Side::Reference => &self.ref_uniques,
        }
    }

    pub(super) fn perfect(&self) -> &[(TypeId, TypeId)] {
        &self.perfect
    }
}

/// Returns true if every type transitively referenced from `root` has a
/// signature occurring exactly once in each schema. Map entries are looked
/// through rather than checked.
fn closed(
    view: SideView<'_>,
    root: TypeId,
    empty_as_bytes: bool,
    one_to_one: &dyn Fn(&TypeSignature) -> bool,
) -> bool {
    let mut seen = HashSet::from([root]);
    let mut stack = view.referenced(root, empty_as_bytes);
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        let Some(def) = view.schema.get(id) else {
            return false;
        };
        if !def.is_map_entry() {
            match view.signatures.get(id) {
                Some(signature) if one_to_one(signature) => {}
                _ => return false,
            }
        }
        stack.extend(view.referenced(id, empty_as_bytes));
    }
    true
}
