//! Similarity scoring between signatures.
//!
//! Scores lie in `[0, 1]`, are symmetric, and every signature scores `1.0`
//! against itself. Message scores are the matched field credit divided by the
//! larger field count:
//!
//! 1. Fields with the same wire number are compared first. A pair whose
//!    similarity reaches [`ScoreWeights::field_threshold`] earns its
//!    similarity as credit.
//! 2. Fields left over on both sides are paired greedily on shape alone,
//!    earning [`ScoreWeights::renumber_weight`] times their similarity. This
//!    tolerates renumbered fields while ranking them below exact positions.
//!
//! Nested messages are scored recursively down to the depth bound, below
//! which only equal shapes count.

use crate::config::ScoreWeights;
use crate::signature::{EnumSignature, FieldShape, MessageSignature, ShapeKind, TypeSignature};
use std::cmp::Ordering;
use std::sync::Arc;

/// Structural similarity scorer
#[derive(Debug, Clone, Copy)]
pub struct Scorer {
    weights: ScoreWeights,
    max_depth: u32,
}

impl Scorer {
    /// Creates a scorer with the given weights and recursion bound
    pub fn new(weights: ScoreWeights, max_depth: u32) -> Self {
        Self { weights, max_depth }
    }

    /// Scores two signatures; messages never match enums
    pub fn score(&self, a: &TypeSignature, b: &TypeSignature) -> f64 {
        match (a, b) {
            (TypeSignature::Message(a), TypeSignature::Message(b)) => self.message(a, b, 0),
            (TypeSignature::Enum(a), TypeSignature::Enum(b)) => enum_score(a, b),
            _ => 0.0,
        }
    }

    /// Upper bound of [`Scorer::score`] that only looks at entry counts
    pub fn upper_bound(a: &TypeSignature, b: &TypeSignature) -> f64 {
        if a.is_message() != b.is_message() {
            return 0.0;
        }
        let (x, y) = (a.shallow_len(), b.shallow_len());
        match (x, y) {
            (0, 0) => 1.0,
            _ => x.min(y) as f64 / x.max(y) as f64,
        }
    }

    fn message(&self, a: &Arc<MessageSignature>, b: &Arc<MessageSignature>, depth: u32) -> f64 {
        if Arc::ptr_eq(a, b) || a == b {
            return 1.0;
        }
        if depth >= self.max_depth {
            return 0.0;
        }
        self.fields(a.fields(), b.fields(), depth + 1)
    }

    fn fields(&self, a: &[FieldShape], b: &[FieldShape], depth: u32) -> f64 {
        match (a.is_empty(), b.is_empty()) {
            (true, true) => return 1.0,
            (true, false) | (false, true) => return 0.0,
            _ => {}
        }

        let mut credits = Vec::new();
        let mut left_a = Vec::new();
        let mut left_b = Vec::new();

        // Both sides are sorted by number; merge on equal numbers
        let (mut i, mut j) = (0, 0);
        while i < a.len() && j < b.len() {
            match a[i].number.cmp(&b[j].number) {
                Ordering::Less => {
                    left_a.push(&a[i]);
                    i += 1;
                }
                Ordering::Greater => {
                    left_b.push(&b[j]);
                    j += 1;
                }
                Ordering::Equal => {
                    let similarity = self.field(&a[i], &b[j], depth);
                    if self.counts(similarity) {
                        credits.push(similarity);
                    } else {
                        left_a.push(&a[i]);
                        left_b.push(&b[j]);
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        left_a.extend(&a[i..]);
        left_b.extend(&b[j..]);

        if self.weights.renumber_weight > 0.0 && !left_a.is_empty() && !left_b.is_empty() {
            self.renumbered(&left_a, &left_b, depth, &mut credits);
        }

        // Summing in sorted order keeps the result bit-identical when the
        // arguments are swapped
        credits.sort_by(f64::total_cmp);
        let total: f64 = credits.iter().sum();
        (total / a.len().max(b.len()) as f64).min(1.0)
    }

    /// Greedy shape-only pairing of fields whose numbers did not line up
    fn renumbered(
        &self,
        a: &[&FieldShape],
        b: &[&FieldShape],
        depth: u32,
        credits: &mut Vec<f64>,
    ) {
        let mut pairs = Vec::new();
        for (i, fa) in a.iter().enumerate() {
            for (j, fb) in b.iter().enumerate() {
                let similarity = self.field(fa, fb, depth);
                if self.counts(similarity) {
                    let distance = fa.number.abs_diff(fb.number);
                    let sum = u64::from(fa.number) + u64::from(fb.number);
                    pairs.push((similarity, distance, sum, i, j));
                }
            }
        }

        // The tie-breakers are symmetric in the two numbers, so swapping the
        // arguments selects the same pairs
        pairs.sort_by(|x, y| {
            y.0.total_cmp(&x.0)
                .then(x.1.cmp(&y.1))
                .then(x.2.cmp(&y.2))
        });

        let mut used_a = vec![false; a.len()];
        let mut used_b = vec![false; b.len()];
        for (similarity, _, _, i, j) in pairs {
            if used_a[i] || used_b[j] {
                continue;
            }
            used_a[i] = true;
            used_b[j] = true;
            credits.push(self.weights.renumber_weight * similarity);
        }
    }

    fn counts(&self, similarity: f64) -> bool {
        similarity > 0.0 && similarity >= self.weights.field_threshold
    }

    fn field(&self, a: &FieldShape, b: &FieldShape, depth: u32) -> f64 {
        if a.cardinality != b.cardinality {
            return 0.0;
        }
        self.kind(&a.kind, &b.kind, depth)
    }

    fn kind(&self, a: &ShapeKind, b: &ShapeKind, depth: u32) -> f64 {
        match (a, b) {
            (ShapeKind::Scalar(x), ShapeKind::Scalar(y)) => f64::from(u8::from(x == y)),
            (ShapeKind::Message(x), ShapeKind::Message(y)) => self.message(x, y, depth),
            (ShapeKind::Enum(x), ShapeKind::Enum(y)) => enum_score(x, y),
            (
                ShapeKind::Map { key: ka, value: va },
                ShapeKind::Map { key: kb, value: vb },
            ) => (self.kind(ka, kb, depth) + self.kind(va, vb, depth)) / 2.0,
            (ShapeKind::Oneof(x), ShapeKind::Oneof(y)) => {
                if depth >= self.max_depth {
                    return f64::from(u8::from(x == y));
                }
                self.fields(x, y, depth + 1)
            }
            (ShapeKind::Cycle { depth: x }, ShapeKind::Cycle { depth: y })
            | (ShapeKind::Truncated { depth: x }, ShapeKind::Truncated { depth: y }) => {
                f64::from(u8::from(x == y))
            }
            _ => 0.0,
        }
    }
}

fn enum_score(a: &EnumSignature, b: &EnumSignature) -> f64 {
    let (x, y) = (a.values(), b.values());
    if x.is_empty() && y.is_empty() {
        return 1.0;
    }
    let shared = x.intersection(y).count();
    shared as f64 / x.len().max(y.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Cardinality, FieldDef, ScalarType, Schema, SchemaBuilder};
    use crate::signature::{SignatureConfig, SignatureSet};

    fn scorer() -> Scorer {
        Scorer::new(ScoreWeights::default(), 8)
    }

    fn scalar(number: u32, scalar: ScalarType) -> FieldShape {
        FieldShape::new(number, Cardinality::Optional, ShapeKind::Scalar(scalar))
    }

    fn message(fields: Vec<FieldShape>) -> TypeSignature {
        TypeSignature::Message(Arc::new(MessageSignature::new(fields)))
    }

    fn signatures(schema: &Schema) -> Vec<TypeSignature> {
        let set = SignatureSet::build(schema, &SignatureConfig::default()).unwrap();
        set.iter().map(|(_, s)| s.clone()).collect()
    }

    fn corpus() -> Schema {
        SchemaBuilder::new()
            .message(
                "Node",
                [FieldDef::scalar(1, ScalarType::Int32), FieldDef::named(2, "Node")],
            )
            .message(
                "Player",
                [
                    FieldDef::scalar(1, ScalarType::Uint64),
                    FieldDef::scalar(2, ScalarType::String),
                    FieldDef::named(3, "Stats"),
                    FieldDef::named(4, "Role"),
                    FieldDef::named(5, "Player.AttrsEntry").repeated(),
                ],
            )
            .map_entry(
                "Player",
                "AttrsEntry",
                crate::schema::FieldType::Scalar(ScalarType::String),
                crate::schema::FieldType::Named("Stats".into()),
            )
            .message(
                "Stats",
                [
                    FieldDef::scalar(1, ScalarType::Int32),
                    FieldDef::scalar(2, ScalarType::Int32).repeated(),
                    FieldDef::scalar(3, ScalarType::Float).in_oneof(0),
                    FieldDef::scalar(4, ScalarType::Double).in_oneof(0),
                ],
            )
            .message(
                "Shuffled",
                [
                    FieldDef::scalar(7, ScalarType::Uint64),
                    FieldDef::scalar(2, ScalarType::String),
                    FieldDef::named(3, "Stats"),
                ],
            )
            .enumeration("Role", [0, 1, 2, 3])
            .enumeration("Mode", [0, 1, 5])
            .message("Empty", [])
            .build()
            .unwrap()
    }

    #[test]
    fn test_reflexive() {
        let scorer = scorer();
        for sig in signatures(&corpus()) {
            assert_eq!(scorer.score(&sig, &sig), 1.0, "{}", sig);
        }
    }

    #[test]
    fn test_reflexive_on_structural_copies() {
        // Separate builds share no allocations, so equality is structural
        let scorer = scorer();
        for (a, b) in signatures(&corpus()).iter().zip(signatures(&corpus()).iter()) {
            assert_eq!(scorer.score(a, b), 1.0);
        }
    }

    #[test]
    fn test_symmetric() {
        let scorer = scorer();
        let sigs = signatures(&corpus());
        for a in &sigs {
            for b in &sigs {
                assert_eq!(scorer.score(a, b), scorer.score(b, a), "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_bounds() {
        let scorer = scorer();
        let sigs = signatures(&corpus());
        for a in &sigs {
            for b in &sigs {
                let score = scorer.score(a, b);
                assert!((0.0..=1.0).contains(&score));
                assert!(score <= Scorer::upper_bound(a, b));
            }
        }
    }

    #[test]
    fn test_empty_signatures() {
        let scorer = scorer();
        let empty = message(vec![]);
        let one = message(vec![scalar(1, ScalarType::Int32)]);
        assert_eq!(scorer.score(&empty, &message(vec![])), 1.0);
        assert_eq!(scorer.score(&empty, &one), 0.0);
        assert_eq!(scorer.score(&one, &empty), 0.0);
    }

    #[test]
    fn test_partial_overlap() {
        let scorer = scorer();
        let a = message(vec![scalar(1, ScalarType::Int32)]);
        let b = message(vec![scalar(1, ScalarType::Int32), scalar(2, ScalarType::String)]);
        assert_eq!(scorer.score(&a, &b), 0.5);
    }

    #[test]
    fn test_scalar_mismatch_scores_zero() {
        let scorer = scorer();
        let a = message(vec![scalar(1, ScalarType::Int32)]);
        let b = message(vec![scalar(1, ScalarType::Int64)]);
        assert_eq!(scorer.score(&a, &b), 0.0);
    }

    #[test]
    fn test_renumbered_fields_get_partial_credit() {
        let scorer = scorer();
        let a = message(vec![scalar(1, ScalarType::Int32), scalar(2, ScalarType::String)]);
        let b = message(vec![scalar(1, ScalarType::Int32), scalar(9, ScalarType::String)]);
        assert_eq!(scorer.score(&a, &b), 0.75);

        let strict = Scorer::new(ScoreWeights::default().renumber_weight(0.0), 8);
        assert_eq!(strict.score(&a, &b), 0.5);
    }

    #[test]
    fn test_renumbering_at_high_field_numbers() {
        let scorer = scorer();
        let a = message(vec![scalar(u32::MAX, ScalarType::String)]);
        let b = message(vec![scalar(u32::MAX - 1, ScalarType::String)]);
        assert_eq!(scorer.score(&a, &b), 0.5);
        assert_eq!(scorer.score(&b, &a), 0.5);
    }

    #[test]
    fn test_messages_never_match_enums() {
        let scorer = scorer();
        let sigs = signatures(&corpus());
        let node = &sigs[0];
        let role = sigs.iter().find(|s| !s.is_message()).unwrap();
        assert_eq!(scorer.score(node, role), 0.0);
        assert_eq!(Scorer::upper_bound(node, role), 0.0);
    }

    #[test]
    fn test_enum_overlap() {
        let scorer = scorer();
        let a = TypeSignature::Enum(Arc::new(EnumSignature::new([0, 1, 2, 3])));
        let b = TypeSignature::Enum(Arc::new(EnumSignature::new([0, 1, 5])));
        assert_eq!(scorer.score(&a, &b), 0.5);
    }

    #[test]
    fn test_nested_similarity_is_recursive() {
        let scorer = scorer();
        let inner_a = Arc::new(MessageSignature::new(vec![
            scalar(1, ScalarType::Int32),
            scalar(2, ScalarType::Int32),
        ]));
        let inner_b = Arc::new(MessageSignature::new(vec![
            scalar(1, ScalarType::Int32),
            scalar(2, ScalarType::Int32),
            scalar(3, ScalarType::Bool),
            scalar(4, ScalarType::Bool),
        ]));
        let wrap = |inner| {
            message(vec![
                scalar(1, ScalarType::String),
                FieldShape::new(2, Cardinality::Optional, ShapeKind::Message(inner)),
            ])
        };
        // The nested pair scores 0.5, which still clears the field threshold
        assert_eq!(scorer.score(&wrap(inner_a), &wrap(inner_b)), 0.75);
    }

    #[test]
    fn test_recursive_shapes_terminate() {
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
        let sigs = signatures(&schema);
        let shallow = Scorer::new(ScoreWeights::default(), 1);
        assert_eq!(shallow.score(&sigs[0], &sigs[0]), 1.0);
        let score = shallow.score(&sigs[0], &sigs[1]);
        assert!(score > 0.0 && score < 1.0);
    }
}
