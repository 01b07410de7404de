//! Match index over an obfuscated and a reference schema.
//!
//! The index is computed eagerly when it is built and whenever its inputs
//! change ([`MatchIndex::reconfigure`], [`MatchIndex::reload`]). Every update
//! computes a complete new state first and only swaps it in on success, so a
//! rejected configuration or a malformed schema leaves the previous index
//! intact. Queries never see a partially rebuilt index.
//!
//! ## Queries
//!
//! - [`MatchIndex::candidates`]: ranked reference candidates per obfuscated type
//! - [`MatchIndex::exact_matches`]: types of both schemas sharing one signature
//! - [`MatchIndex::uniques`]: types whose signature occurs once in their own schema
//! - [`MatchIndex::perfect_mappables`]: 1:1 exact matches whose referenced types
//!   are 1:1 as well, all the way down

mod groups;

use crate::config::MatchConfig;
use crate::error::{Error, Result};
use crate::schema::{Schema, TypeId};
use crate::score::Scorer;
use crate::signature::{SignatureSet, TypeSignature};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

pub use groups::ExactMatch;

/// Which of the two schemas a type belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Side {
    /// The schema with renamed types
    Obfuscated,
    /// The schema with known names
    Reference,
}

impl Side {
    /// Returns the other side
    pub fn opposite(self) -> Self {
        match self {
            Side::Obfuscated => Side::Reference,
            Side::Reference => Side::Obfuscated,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Obfuscated => write!(f, "obfuscated"),
            Side::Reference => write!(f, "reference"),
        }
    }
}

/// A scored (obfuscated, reference) pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidatePair {
    /// Obfuscated type
    pub obfuscated: TypeId,
    /// Reference type
    pub reference: TypeId,
    /// Similarity in `[0, 1]`
    pub score: f64,
}

/// Derived matching state for a pair of schemas
#[derive(Debug, Clone)]
pub struct MatchIndex {
    obfuscated: Schema,
    reference: Schema,
    config: MatchConfig,
    state: IndexState,
}

#[derive(Debug, Clone)]
struct IndexState {
    obs_signatures: SignatureSet,
    ref_signatures: SignatureSet,
    candidates: BTreeMap<TypeId, Vec<CandidatePair>>,
    groups: groups::Groups,
}

impl MatchIndex {
    /// Builds the index, failing on invalid configuration or malformed schemas
    pub fn build(obfuscated: Schema, reference: Schema, config: MatchConfig) -> Result<Self> {
        config.validate()?;
        let obs_signatures = SignatureSet::build(&obfuscated, &config.signature)?;
        let ref_signatures = SignatureSet::build(&reference, &config.signature)?;
        let state = IndexState::compute(
            &obfuscated,
            &reference,
            obs_signatures,
            ref_signatures,
            &config,
        );
        Ok(Self {
            obfuscated,
            reference,
            config,
            state,
        })
    }

    /// Rebuilds the index under a new configuration.
    ///
    /// Signatures are only recomputed when their settings changed. On error
    /// the current index is kept unchanged.
    pub fn reconfigure(&mut self, config: MatchConfig) -> Result<()> {
        config.validate()?;
        let (obs_signatures, ref_signatures) = if config.signature == self.config.signature {
            (
                self.state.obs_signatures.clone(),
                self.state.ref_signatures.clone(),
            )
        } else {
            (
                SignatureSet::build(&self.obfuscated, &config.signature)?,
                SignatureSet::build(&self.reference, &config.signature)?,
            )
        };
        self.state = IndexState::compute(
            &self.obfuscated,
            &self.reference,
            obs_signatures,
            ref_signatures,
            &config,
        );
        self.config = config;
        Ok(())
    }

    /// Replaces one schema and rebuilds. On error the current index is kept.
    pub fn reload(&mut self, side: Side, schema: Schema) -> Result<()> {
        let signatures = SignatureSet::build(&schema, &self.config.signature)?;
        let (obs_signatures, ref_signatures) = match side {
            Side::Obfuscated => (signatures, self.state.ref_signatures.clone()),
            Side::Reference => (self.state.obs_signatures.clone(), signatures),
        };
        let state = {
            let (obfuscated, reference) = match side {
                Side::Obfuscated => (&schema, &self.reference),
                Side::Reference => (&self.obfuscated, &schema),
            };
            IndexState::compute(
                obfuscated,
                reference,
                obs_signatures,
                ref_signatures,
                &self.config,
            )
        };
        match side {
            Side::Obfuscated => self.obfuscated = schema,
            Side::Reference => self.reference = schema,
        }
        self.state = state;
        Ok(())
    }

    /// Active configuration
    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Schema on the given side
    pub fn schema(&self, side: Side) -> &Schema {
        match side {
            Side::Obfuscated => &self.obfuscated,
            Side::Reference => &self.reference,
        }
    }

    /// All signatures on the given side
    pub fn signatures(&self, side: Side) -> &SignatureSet {
        match side {
            Side::Obfuscated => &self.state.obs_signatures,
            Side::Reference => &self.state.ref_signatures,
        }
    }

    /// Signature of one type
    pub fn signature(&self, side: Side, id: TypeId) -> Option<&TypeSignature> {
        self.signatures(side).get(id)
    }

    /// Scorer configured like the one used to rank candidates
    pub fn scorer(&self) -> Scorer {
        Scorer::new(self.config.weights, self.config.signature.max_depth)
    }

    /// Scores any obfuscated type against any reference type
    pub fn score(&self, obfuscated: TypeId, reference: TypeId) -> Result<f64> {
        let a = self.checked_signature(Side::Obfuscated, obfuscated)?;
        let b = self.checked_signature(Side::Reference, reference)?;
        Ok(self.scorer().score(a, b))
    }

    /// Returns an error unless `id` belongs to the schema on `side`
    pub fn check(&self, side: Side, id: TypeId) -> Result<()> {
        if self.schema(side).contains(id) {
            Ok(())
        } else {
            Err(Error::UnknownType { side, id })
        }
    }

    fn checked_signature(&self, side: Side, id: TypeId) -> Result<&TypeSignature> {
        self.signature(side, id)
            .ok_or(Error::UnknownType { side, id })
    }

    /// Returns true if `id` takes part in matching on `side`
    pub fn is_matchable(&self, side: Side, id: TypeId) -> bool {
        self.schema(side).is_matchable(id, self.config.include_nested)
    }

    /// Matchable types on `side`, in declaration order
    pub fn matchable(&self, side: Side) -> impl Iterator<Item = TypeId> + '_ {
        let schema = self.schema(side);
        let include_nested = self.config.include_nested;
        schema
            .ids()
            .filter(move |&id| schema.is_matchable(id, include_nested))
    }

    /// Reference candidates for `obfuscated`, best first.
    ///
    /// Ties are broken by reference declaration order. Unknown or
    /// non-matchable types have no candidates.
    pub fn candidates(&self, obfuscated: TypeId) -> &[CandidatePair] {
        self.state
            .candidates
            .get(&obfuscated)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Obfuscated candidates for `reference`, best first
    pub fn reverse_candidates(&self, reference: TypeId) -> Vec<CandidatePair> {
        let mut pairs: Vec<CandidatePair> = self
            .state
            .candidates
            .values()
            .flat_map(|list| list.iter().filter(|p| p.reference == reference).copied())
            .collect();
        pairs.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.obfuscated.cmp(&b.obfuscated))
        });
        pairs
    }

    /// Groups of types sharing one signature, with members on both sides.
    ///
    /// Ordered by the first reference member's declaration position.
    pub fn exact_matches(&self) -> &[ExactMatch] {
        self.state.groups.exact()
    }

    /// The exact match group containing `id`, if any
    pub fn exact_match_for(&self, side: Side, id: TypeId) -> Option<&ExactMatch> {
        self.state.groups.exact_for(side, id)
    }

    /// Types whose signature occurs exactly once among the matchable types of their schema
    pub fn uniques(&self, side: Side) -> &BTreeSet<TypeId> {
        self.state.groups.uniques(side)
    }

    /// Unambiguous (obfuscated, reference) pairs, in exact match order
    pub fn perfect_mappables(&self) -> &[(TypeId, TypeId)] {
        self.state.groups.perfect()
    }

    /// Returns true if `obfuscated` appears in a perfect mappable pair
    pub fn is_perfect(&self, obfuscated: TypeId) -> bool {
        self.perfect_mappables()
            .iter()
            .any(|&(obs, _)| obs == obfuscated)
    }
}

impl IndexState {
    fn compute(
        obfuscated: &Schema,
        reference: &Schema,
        obs_signatures: SignatureSet,
        ref_signatures: SignatureSet,
        config: &MatchConfig,
    ) -> Self {
        let include_nested = config.include_nested;
        let obs_ids: Vec<TypeId> = obfuscated
            .ids()
            .filter(|&id| obfuscated.is_matchable(id, include_nested))
            .collect();
        let ref_ids: Vec<TypeId> = reference
            .ids()
            .filter(|&id| reference.is_matchable(id, include_nested))
            .collect();

        let scorer = Scorer::new(config.weights, config.signature.max_depth);
        let mut candidates = BTreeMap::new();
        let mut total = 0;
        for &obs in &obs_ids {
            let Some(a) = obs_signatures.get(obs) else {
                continue;
            };
            let mut list = Vec::new();
            for &reference in &ref_ids {
                let Some(b) = ref_signatures.get(reference) else {
                    continue;
                };
                if Scorer::upper_bound(a, b) < config.threshold {
                    continue;
                }
                let score = scorer.score(a, b);
                if score >= config.threshold {
                    list.push(CandidatePair {
                        obfuscated: obs,
                        reference,
                        score,
                    });
                }
            }
            list.sort_by(|x, y| {
                y.score
                    .total_cmp(&x.score)
                    .then(x.reference.cmp(&y.reference))
            });
            total += list.len();
            candidates.insert(obs, list);
        }
        debug!(
            "Scored {} obfuscated against {} reference types: {} candidate pairs",
            obs_ids.len(),
            ref_ids.len(),
            total
        );

        let groups = groups::Groups::compute(
            groups::SideView::new(obfuscated, &obs_signatures, &obs_ids),
            groups::SideView::new(reference, &ref_signatures, &ref_ids),
            config.signature.empty_as_bytes,
        );
        info!(
            "{} exact matches, {} perfect mappables, {}/{} unique obfuscated/reference types",
            groups.exact().len(),
            groups.perfect().len(),
            groups.uniques(Side::Obfuscated).len(),
            groups.uniques(Side::Reference).len()
        );

        Self {
            obs_signatures,
            ref_signatures,
            candidates,
            groups,
        }
    }
}
