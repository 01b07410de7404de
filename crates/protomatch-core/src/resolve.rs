//! Assignment resolution.
//!
//! [`resolve`] extends a set of confirmed pairs with every pairing the
//! candidate scores make unambiguous. A pair `(o, r)` is inferred only when
//! it is confident from both ends:
//!
//! - `r` is the best open candidate of `o` and beats the runner-up by more
//!   than the configured score gap
//! - no other unresolved obfuscated type scores within the gap on `r`
//!
//! Claiming a reference type only ever removes competition, so confident
//! pairs stay confident as others are accepted. Resolution therefore runs in
//! rounds until no new pair qualifies, and the result does not depend on the
//! order in which pairs are visited. Anything left over is reported as
//! ambiguous or unmatched, never guessed.

use crate::error::{Error, Result};
use crate::index::{CandidatePair, MatchIndex, Side};
use crate::schema::TypeId;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// How a mapping came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// Accepted by the user
    Confirmed,
    /// Derived from unambiguous candidate scores
    Inferred,
    /// Rejected by the user
    Excluded,
}

impl Provenance {
    /// Returns the lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Confirmed => "confirmed",
            Provenance::Inferred => "inferred",
            Provenance::Excluded => "excluded",
        }
    }
}

/// Target of one obfuscated type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mapping {
    /// Reference type
    pub reference: TypeId,
    /// Similarity of the pair
    pub score: f64,
    /// Confirmed or inferred
    pub provenance: Provenance,
}

/// Resolution state of one obfuscated type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// Mapped to a reference type
    Mapped(Mapping),
    /// Several open candidates, none confident
    Ambiguous,
    /// No open candidates
    Unmatched,
}

/// Partial injective mapping from obfuscated to reference types
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    mappings: BTreeMap<TypeId, Mapping>,
    claimed: BTreeMap<TypeId, TypeId>,
    excluded: BTreeSet<(TypeId, TypeId)>,
    ambiguous: BTreeSet<TypeId>,
    unmatched_obfuscated: BTreeSet<TypeId>,
    unmatched_reference: BTreeSet<TypeId>,
}

impl Assignment {
    /// Number of mapped obfuscated types
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Returns true if nothing is mapped
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Mapping of one obfuscated type
    pub fn get(&self, obfuscated: TypeId) -> Option<&Mapping> {
        self.mappings.get(&obfuscated)
    }

    /// All mappings ordered by obfuscated type
    pub fn mappings(&self) -> impl Iterator<Item = (TypeId, &Mapping)> + '_ {
        self.mappings.iter().map(|(&obs, mapping)| (obs, mapping))
    }

    /// Mappings with the given provenance
    pub fn with_provenance(
        &self,
        provenance: Provenance,
    ) -> impl Iterator<Item = (TypeId, &Mapping)> + '_ {
        self.mappings()
            .filter(move |(_, mapping)| mapping.provenance == provenance)
    }

    /// Obfuscated type mapped onto `reference`, if any
    pub fn claimed_by(&self, reference: TypeId) -> Option<TypeId> {
        self.claimed.get(&reference).copied()
    }

    /// Excluded pairs
    pub fn excluded(&self) -> &BTreeSet<(TypeId, TypeId)> {
        &self.excluded
    }

    /// Unresolved obfuscated types that still have several open candidates
    pub fn ambiguous(&self) -> &BTreeSet<TypeId> {
        &self.ambiguous
    }

    /// Matchable types on `side` left without a counterpart
    pub fn unmatched(&self, side: Side) -> &BTreeSet<TypeId> {
        match side {
            Side::Obfuscated => &self.unmatched_obfuscated,
            Side::Reference => &self.unmatched_reference,
        }
    }

    /// Provenance tag of the pair `(obfuscated, reference)`, if it has one
    pub fn provenance(&self, obfuscated: TypeId, reference: TypeId) -> Option<Provenance> {
        if self.excluded.contains(&(obfuscated, reference)) {
            return Some(Provenance::Excluded);
        }
        self.mappings
            .get(&obfuscated)
            .filter(|mapping| mapping.reference == reference)
            .map(|mapping| mapping.provenance)
    }

    /// Resolution state of one obfuscated type
    pub fn resolution(&self, obfuscated: TypeId) -> Resolution {
        match self.mappings.get(&obfuscated) {
            Some(mapping) => Resolution::Mapped(*mapping),
            None if self.ambiguous.contains(&obfuscated) => Resolution::Ambiguous,
            None => Resolution::Unmatched,
        }
    }

    /// Candidates of `obfuscated` that are neither excluded nor claimed by another type
    pub fn open_candidates(&self, index: &MatchIndex, obfuscated: TypeId) -> Vec<CandidatePair> {
        index
            .candidates(obfuscated)
            .iter()
            .filter(|pair| self.is_open(pair.obfuscated, pair.reference))
            .copied()
            .collect()
    }

    fn is_open(&self, obfuscated: TypeId, reference: TypeId) -> bool {
        !self.excluded.contains(&(obfuscated, reference))
            && self
                .claimed
                .get(&reference)
                .map_or(true, |&owner| owner == obfuscated)
    }
}

/// Extends `confirmed` into the maximal consistent [`Assignment`].
///
/// Fails without side effects if a confirmed or excluded type is unknown,
/// two confirmed types share a reference type, or a confirmed pair is also
/// excluded.
pub fn resolve(
    index: &MatchIndex,
    confirmed: &BTreeMap<TypeId, TypeId>,
    excluded: &BTreeSet<(TypeId, TypeId)>,
) -> Result<Assignment> {
    let mut assignment = Assignment {
        excluded: excluded.clone(),
        ..Assignment::default()
    };

    for &(obs, reference) in excluded {
        index.check(Side::Obfuscated, obs)?;
        index.check(Side::Reference, reference)?;
    }
    for (&obs, &reference) in confirmed {
        let score = index.score(obs, reference)?;
        if let Some(first) = assignment.claimed_by(reference) {
            return Err(Error::ConflictingConfirmation {
                reference,
                first,
                second: obs,
            });
        }
        if excluded.contains(&(obs, reference)) {
            return Err(Error::ConfirmedExcluded {
                obfuscated: obs,
                reference,
            });
        }
        assignment.claimed.insert(reference, obs);
        assignment.mappings.insert(
            obs,
            Mapping {
                reference,
                score,
                provenance: Provenance::Confirmed,
            },
        );
    }

    let mut remaining: Vec<TypeId> = index
        .matchable(Side::Obfuscated)
        .filter(|obs| !confirmed.contains_key(obs))
        .collect();
    let gap = index.config().score_gap_tolerance;

    let mut rounds = 0;
    loop {
        let open: BTreeMap<TypeId, Vec<CandidatePair>> = remaining
            .iter()
            .map(|&obs| (obs, assignment.open_candidates(index, obs)))
            .collect();
        let confident: Vec<CandidatePair> = open
            .values()
            .filter_map(|pairs| confident_top(pairs, gap))
            .filter(|top| {
                open.iter().all(|(&other, pairs)| {
                    other == top.obfuscated
                        || pairs
                            .iter()
                            .all(|p| p.reference != top.reference || p.score < top.score - gap)
                })
            })
            .collect();
        if confident.is_empty() {
            break;
        }
        rounds += 1;
        for pair in confident {
            assignment.claimed.insert(pair.reference, pair.obfuscated);
            assignment.mappings.insert(
                pair.obfuscated,
                Mapping {
                    reference: pair.reference,
                    score: pair.score,
                    provenance: Provenance::Inferred,
                },
            );
        }
        remaining.retain(|obs| !assignment.mappings.contains_key(obs));
    }

    for obs in remaining {
        if assignment.open_candidates(index, obs).is_empty() {
            assignment.unmatched_obfuscated.insert(obs);
        } else {
            assignment.ambiguous.insert(obs);
        }
    }
    assignment.unmatched_reference = index
        .matchable(Side::Reference)
        .filter(|reference| !assignment.claimed.contains_key(reference))
        .collect();

    debug!("Resolution settled after {} rounds", rounds);
    info!(
        "Resolved {} confirmed, {} inferred, {} ambiguous, {} unmatched",
        confirmed.len(),
        assignment.len() - confirmed.len(),
        assignment.ambiguous.len(),
        assignment.unmatched_obfuscated.len()
    );
    Ok(assignment)
}

/// Best candidate if it beats the runner-up by more than `gap`
fn confident_top(pairs: &[CandidatePair], gap: f64) -> Option<CandidatePair> {
    match pairs {
        [] => None,
        [only] => Some(*only),
        [top, second, ..] => (top.score - second.score > gap).then_some(*top),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchConfig;
    use crate::error::ErrorKind;
    use crate::schema::{FieldDef, ScalarType, Schema, SchemaBuilder};
    use pretty_assertions::assert_eq;

    fn int_message(builder: SchemaBuilder, name: &str) -> SchemaBuilder {
        builder.message(name, [FieldDef::scalar(1, ScalarType::Int32)])
    }

    fn schema(build: impl FnOnce(SchemaBuilder) -> SchemaBuilder) -> Schema {
        build(SchemaBuilder::new()).build().unwrap()
    }

    fn distinct() -> MatchIndex {
        let reference = schema(|b| {
            int_message(b, "A")
                .message(
                    "B",
                    [
                        FieldDef::scalar(1, ScalarType::Int32),
                        FieldDef::scalar(2, ScalarType::String),
                    ],
                )
                .message(
                    "C",
                    [
                        FieldDef::scalar(1, ScalarType::String),
                        FieldDef::scalar(2, ScalarType::Bool),
                    ],
                )
        });
        let obfuscated = schema(|b| {
            int_message(b, "X")
                .message(
                    "Y",
                    [
                        FieldDef::scalar(1, ScalarType::Int32),
                        FieldDef::scalar(2, ScalarType::String),
                    ],
                )
                .message(
                    "W",
                    [
                        FieldDef::scalar(1, ScalarType::String),
                        FieldDef::scalar(2, ScalarType::Bool),
                    ],
                )
        });
        MatchIndex::build(obfuscated, reference, MatchConfig::default()).unwrap()
    }

    /// Two obfuscated and two reference types, all of one shape
    fn twins() -> MatchIndex {
        let reference = schema(|b| int_message(int_message(b, "A"), "A2"));
        let obfuscated = schema(|b| int_message(int_message(b, "X"), "X2"));
        MatchIndex::build(obfuscated, reference, MatchConfig::default()).unwrap()
    }

    fn id(index: &MatchIndex, side: Side, name: &str) -> TypeId {
        index.schema(side).find(name).unwrap()
    }

    #[test]
    fn test_infers_distinct_shapes() {
        let index = distinct();
        let assignment = resolve(&index, &BTreeMap::new(), &BTreeSet::new()).unwrap();

        let pairs: Vec<(&str, &str)> = assignment
            .mappings()
            .map(|(obs, m)| {
                assert_eq!(m.provenance, Provenance::Inferred);
                (
                    index.schema(Side::Obfuscated).name(obs),
                    index.schema(Side::Reference).name(m.reference),
                )
            })
            .collect();
        assert_eq!(pairs, vec![("X", "A"), ("Y", "B"), ("W", "C")]);
        assert!(assignment.ambiguous().is_empty());
        assert!(assignment.unmatched(Side::Reference).is_empty());
    }

    #[test]
    fn test_ties_stay_ambiguous() {
        let index = twins();
        let assignment = resolve(&index, &BTreeMap::new(), &BTreeSet::new()).unwrap();
        assert!(assignment.is_empty());
        assert_eq!(assignment.ambiguous().len(), 2);
        let x = id(&index, Side::Obfuscated, "X");
        assert_eq!(assignment.resolution(x), Resolution::Ambiguous);
    }

    #[test]
    fn test_confirmation_propagates() {
        let index = twins();
        let (x, x2) = (id(&index, Side::Obfuscated, "X"), id(&index, Side::Obfuscated, "X2"));
        let (a, a2) = (id(&index, Side::Reference, "A"), id(&index, Side::Reference, "A2"));

        let confirmed = BTreeMap::from([(x, a)]);
        let assignment = resolve(&index, &confirmed, &BTreeSet::new()).unwrap();
        assert_eq!(assignment.get(x).unwrap().provenance, Provenance::Confirmed);
        assert_eq!(
            assignment.get(x2),
            Some(&Mapping {
                reference: a2,
                score: 1.0,
                provenance: Provenance::Inferred,
            })
        );
        assert_eq!(assignment.claimed_by(a), Some(x));
    }

    #[test]
    fn test_confirmed_reference_leaves_other_candidates() {
        let index = distinct();
        let (x, y) = (id(&index, Side::Obfuscated, "X"), id(&index, Side::Obfuscated, "Y"));
        let b = id(&index, Side::Reference, "B");

        // Confirm against the scores: X -> B
        let confirmed = BTreeMap::from([(x, b)]);
        let assignment = resolve(&index, &confirmed, &BTreeSet::new()).unwrap();
        for obs in index.matchable(Side::Obfuscated).filter(|&obs| obs != x) {
            assert!(assignment
                .open_candidates(&index, obs)
                .iter()
                .all(|p| p.reference != b));
        }
        assert!(assignment.get(y).map_or(true, |m| m.reference != b));
    }

    #[test]
    fn test_exclusion_redirects() {
        let reference = schema(|b| int_message(int_message(b, "A"), "A2"));
        let obfuscated = schema(|b| int_message(b, "X"));
        let index = MatchIndex::build(obfuscated, reference, MatchConfig::default()).unwrap();
        let x = id(&index, Side::Obfuscated, "X");
        assert_eq!(
            resolve(&index, &BTreeMap::new(), &BTreeSet::new())
                .unwrap()
                .resolution(x),
            Resolution::Ambiguous
        );

        let (a, a2) = (id(&index, Side::Reference, "A"), id(&index, Side::Reference, "A2"));

        let excluded = BTreeSet::from([(x, a)]);
        let assignment = resolve(&index, &BTreeMap::new(), &excluded).unwrap();
        assert_eq!(assignment.get(x).map(|m| m.reference), Some(a2));
        assert_eq!(assignment.provenance(x, a), Some(Provenance::Excluded));
        assert_eq!(assignment.provenance(x, a2), Some(Provenance::Inferred));
        assert_eq!(assignment.open_candidates(&index, x).len(), 1);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let index = twins();
        let x = id(&index, Side::Obfuscated, "X");
        let a2 = id(&index, Side::Reference, "A2");
        let confirmed = BTreeMap::from([(x, a2)]);

        let first = resolve(&index, &confirmed, &BTreeSet::new()).unwrap();
        let second = resolve(&index, &confirmed, &BTreeSet::new()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_conflicting_confirmations_rejected() {
        let index = twins();
        let (x, x2) = (id(&index, Side::Obfuscated, "X"), id(&index, Side::Obfuscated, "X2"));
        let a = id(&index, Side::Reference, "A");

        let confirmed = BTreeMap::from([(x, a), (x2, a)]);
        let err = resolve(&index, &confirmed, &BTreeSet::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Assignment);
        assert!(matches!(
            err,
            Error::ConflictingConfirmation { reference, first, second }
                if reference == a && first == x && second == x2
        ));
    }

    #[test]
    fn test_confirmed_excluded_rejected() {
        let index = twins();
        let x = id(&index, Side::Obfuscated, "X");
        let a = id(&index, Side::Reference, "A");
        let confirmed = BTreeMap::from([(x, a)]);
        let err = resolve(&index, &confirmed, &BTreeSet::from([(x, a)])).unwrap_err();
        assert!(matches!(err, Error::ConfirmedExcluded { .. }));
    }

    #[test]
    fn test_unknown_types_rejected() {
        let index = twins();
        let bogus = TypeId::new(40);
        let err = resolve(&index, &BTreeMap::from([(bogus, TypeId::new(0))]), &BTreeSet::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownType {
                side: Side::Obfuscated,
                ..
            }
        ));
        let err = resolve(&index, &BTreeMap::new(), &BTreeSet::from([(TypeId::new(0), bogus)]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Assignment);
    }

    #[test]
    fn test_reference_side_ambiguity() {
        // X and X2 both prefer A; neither wins by more than the gap
        let reference = schema(|b| {
            int_message(b, "A").message("Lone", [FieldDef::scalar(7, ScalarType::Fixed64)])
        });
        let obfuscated = schema(|b| int_message(int_message(b, "X"), "X2"));
        let index = MatchIndex::build(obfuscated, reference, MatchConfig::default()).unwrap();
        let assignment = resolve(&index, &BTreeMap::new(), &BTreeSet::new()).unwrap();

        assert!(assignment.is_empty());
        assert_eq!(assignment.ambiguous().len(), 2);
        let lone = id(&index, Side::Reference, "Lone");
        assert!(assignment.unmatched(Side::Reference).contains(&lone));
    }
}
