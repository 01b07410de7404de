//! Guided sequential matching.
//!
//! A [`Session`] walks an ordered worklist of obfuscated types. Each item is
//! `Pending` until the user confirms a candidate, excludes every candidate
//! or skips it. Every decision re-runs [`resolve`] over the session's
//! confirmed and excluded sets. The new assignment is computed before any
//! session state changes, so a failed transition leaves the session as it
//! was.
//!
//! No decision is final: confirmations can be withdrawn, exclusions lifted
//! and skipped items revisited.

use crate::error::{Error, Result};
use crate::index::{CandidatePair, MatchIndex, Side};
use crate::resolve::{resolve, Assignment};
use crate::schema::TypeId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Decision state of one worklist item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// Not decided yet
    Pending,
    /// Confirmed onto a reference type
    Confirmed(TypeId),
    /// Every candidate was rejected; the item is parked
    Excluded,
    /// Deferred until [`Session::revisit_skipped`]
    Skipped,
}

/// Sequential matching session over a [`MatchIndex`]
#[derive(Debug, Clone)]
pub struct Session<'a> {
    index: &'a MatchIndex,
    worklist: Vec<TypeId>,
    states: Vec<ItemState>,
    positions: HashMap<TypeId, usize>,
    cursor: usize,
    confirmed: BTreeMap<TypeId, TypeId>,
    excluded: BTreeSet<(TypeId, TypeId)>,
    forced: BTreeMap<TypeId, BTreeSet<TypeId>>,
    assignment: Assignment,
}

impl<'a> Session<'a> {
    /// Starts a session over `worklist`.
    ///
    /// Repeated entries are dropped, keeping the first occurrence. Every
    /// entry must be an obfuscated type of the index.
    pub fn new(index: &'a MatchIndex, worklist: impl IntoIterator<Item = TypeId>) -> Result<Self> {
        let mut items = Vec::new();
        let mut positions = HashMap::new();
        for id in worklist {
            index.check(Side::Obfuscated, id)?;
            if !positions.contains_key(&id) {
                positions.insert(id, items.len());
                items.push(id);
            }
        }
        let assignment = resolve(index, &BTreeMap::new(), &BTreeSet::new())?;
        debug!("Starting session over {} types", items.len());

        Ok(Self {
            index,
            states: vec![ItemState::Pending; items.len()],
            worklist: items,
            positions,
            cursor: 0,
            confirmed: BTreeMap::new(),
            excluded: BTreeSet::new(),
            forced: BTreeMap::new(),
            assignment,
        })
    }

    /// Starts a session over every matchable obfuscated type in declaration order
    pub fn in_declaration_order(index: &'a MatchIndex) -> Result<Self> {
        Self::new(index, index.matchable(Side::Obfuscated))
    }

    /// The underlying index
    pub fn index(&self) -> &'a MatchIndex {
        self.index
    }

    /// Ordered worklist
    pub fn worklist(&self) -> &[TypeId] {
        &self.worklist
    }

    /// Current resolved assignment
    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    /// Confirmed pairs
    pub fn confirmed(&self) -> &BTreeMap<TypeId, TypeId> {
        &self.confirmed
    }

    /// Excluded pairs
    pub fn excluded(&self) -> &BTreeSet<(TypeId, TypeId)> {
        &self.excluded
    }

    /// Item under the cursor, `None` once the worklist is exhausted
    pub fn current(&self) -> Option<TypeId> {
        self.worklist.get(self.cursor).copied()
    }

    /// Cursor position in the worklist
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Returns true when no pending item is left ahead of the cursor
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.worklist.len()
    }

    /// Decision state of a worklist item
    pub fn state(&self, obfuscated: TypeId) -> Option<ItemState> {
        self.positions
            .get(&obfuscated)
            .map(|&position| self.states[position])
    }

    /// Number of items in each state: (pending, confirmed, excluded, skipped)
    pub fn progress(&self) -> (usize, usize, usize, usize) {
        self.states
            .iter()
            .fold((0, 0, 0, 0), |(p, c, e, s), state| match state {
                ItemState::Pending => (p + 1, c, e, s),
                ItemState::Confirmed(_) => (p, c + 1, e, s),
                ItemState::Excluded => (p, c, e + 1, s),
                ItemState::Skipped => (p, c, e, s + 1),
            })
    }

    /// Candidates to show for `obfuscated`, best first.
    ///
    /// Index candidates and force-added references, minus excluded pairs and
    /// references confirmed for another type.
    pub fn candidates(&self, obfuscated: TypeId) -> Vec<CandidatePair> {
        let mut pairs: Vec<CandidatePair> = self.index.candidates(obfuscated).to_vec();
        if let Some(forced) = self.forced.get(&obfuscated) {
            for &reference in forced {
                if pairs.iter().any(|p| p.reference == reference) {
                    continue;
                }
                if let Ok(score) = self.index.score(obfuscated, reference) {
                    pairs.push(CandidatePair {
                        obfuscated,
                        reference,
                        score,
                    });
                }
            }
            pairs.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then(a.reference.cmp(&b.reference))
            });
        }
        let taken: BTreeSet<TypeId> = self
            .confirmed
            .iter()
            .filter(|&(&obs, _)| obs != obfuscated)
            .map(|(_, &reference)| reference)
            .collect();
        pairs.retain(|p| {
            !self.excluded.contains(&(obfuscated, p.reference)) && !taken.contains(&p.reference)
        });
        pairs
    }

    /// Adds `reference` to the candidates of `obfuscated` regardless of score
    pub fn force_candidate(&mut self, obfuscated: TypeId, reference: TypeId) -> Result<()> {
        self.position_of(obfuscated)?;
        self.index.check(Side::Reference, reference)?;
        self.forced.entry(obfuscated).or_default().insert(reference);
        Ok(())
    }

    /// Confirms `obfuscated -> reference`, replacing an earlier confirmation.
    ///
    /// `reference` must be a current candidate of `obfuscated`.
    pub fn confirm(&mut self, obfuscated: TypeId, reference: TypeId) -> Result<()> {
        let position = self.position_of(obfuscated)?;
        if !self
            .candidates(obfuscated)
            .iter()
            .any(|p| p.reference == reference)
        {
            return Err(Error::NotACandidate {
                obfuscated,
                reference,
            });
        }
        let mut confirmed = self.confirmed.clone();
        confirmed.insert(obfuscated, reference);
        self.commit(confirmed, self.excluded.clone())?;

        self.states[position] = ItemState::Confirmed(reference);
        self.settle();
        Ok(())
    }

    /// Confirms every perfect mappable pair whose item is still pending.
    ///
    /// Returns the number of pairs confirmed.
    pub fn confirm_perfect_mappables(&mut self) -> Result<usize> {
        let mut confirmed = self.confirmed.clone();
        let taken: BTreeSet<TypeId> = confirmed.values().copied().collect();
        let mut accepted = Vec::new();
        for &(obs, reference) in self.index.perfect_mappables() {
            let Some(&position) = self.positions.get(&obs) else {
                continue;
            };
            if self.states[position] != ItemState::Pending
                || taken.contains(&reference)
                || self.excluded.contains(&(obs, reference))
            {
                continue;
            }
            confirmed.insert(obs, reference);
            accepted.push((position, reference));
        }
        if accepted.is_empty() {
            return Ok(0);
        }
        self.commit(confirmed, self.excluded.clone())?;

        for &(position, reference) in &accepted {
            self.states[position] = ItemState::Confirmed(reference);
        }
        self.settle();
        debug!("Auto-confirmed {} perfect mappables", accepted.len());
        Ok(accepted.len())
    }

    /// Withdraws the confirmation of `obfuscated`, returning it to pending
    pub fn unconfirm(&mut self, obfuscated: TypeId) -> Result<()> {
        let position = self.position_of(obfuscated)?;
        let mut confirmed = self.confirmed.clone();
        if confirmed.remove(&obfuscated).is_none() {
            return Err(Error::NotConfirmed(obfuscated));
        }
        self.commit(confirmed, self.excluded.clone())?;

        self.states[position] = ItemState::Pending;
        self.rewind(position);
        Ok(())
    }

    /// Excludes the pair; the item is parked once no candidate is left
    pub fn exclude(&mut self, obfuscated: TypeId, reference: TypeId) -> Result<()> {
        self.exclude_all(obfuscated, [reference])
    }

    /// Excludes the top `shown` candidates of `obfuscated`.
    ///
    /// Pass the number of candidates actually displayed; ranks past it stay open.
    pub fn reject(&mut self, obfuscated: TypeId, shown: usize) -> Result<()> {
        let shown: Vec<TypeId> = self
            .candidates(obfuscated)
            .iter()
            .take(shown)
            .map(|p| p.reference)
            .collect();
        self.exclude_all(obfuscated, shown)
    }

    fn exclude_all(
        &mut self,
        obfuscated: TypeId,
        references: impl IntoIterator<Item = TypeId>,
    ) -> Result<()> {
        let position = self.position_of(obfuscated)?;
        let mut excluded = self.excluded.clone();
        for reference in references {
            self.index.check(Side::Reference, reference)?;
            if self.confirmed.get(&obfuscated) == Some(&reference) {
                return Err(Error::PairConfirmed {
                    obfuscated,
                    reference,
                });
            }
            excluded.insert((obfuscated, reference));
        }
        self.commit(self.confirmed.clone(), excluded)?;

        if self.states[position] != ItemState::Excluded
            && !matches!(self.states[position], ItemState::Confirmed(_))
            && self.candidates(obfuscated).is_empty()
        {
            self.states[position] = ItemState::Excluded;
            self.settle();
        }
        Ok(())
    }

    /// Lifts an exclusion; a parked item becomes pending again
    pub fn unexclude(&mut self, obfuscated: TypeId, reference: TypeId) -> Result<()> {
        let position = self.position_of(obfuscated)?;
        let mut excluded = self.excluded.clone();
        if !excluded.remove(&(obfuscated, reference)) {
            return Ok(());
        }
        self.commit(self.confirmed.clone(), excluded)?;

        if self.states[position] == ItemState::Excluded {
            self.states[position] = ItemState::Pending;
            self.rewind(position);
        }
        Ok(())
    }

    /// Defers `obfuscated` without touching the assignment
    pub fn skip(&mut self, obfuscated: TypeId) -> Result<()> {
        let position = self.position_of(obfuscated)?;
        if self.states[position] == ItemState::Pending {
            self.states[position] = ItemState::Skipped;
            self.settle();
        }
        Ok(())
    }

    /// Returns every skipped item to pending and moves the cursor to the
    /// first pending item. Returns the number of items revisited.
    pub fn revisit_skipped(&mut self) -> usize {
        let mut count = 0;
        for state in &mut self.states {
            if *state == ItemState::Skipped {
                *state = ItemState::Pending;
                count += 1;
            }
        }
        if count > 0 {
            self.cursor = 0;
            self.settle();
        }
        count
    }

    fn position_of(&self, obfuscated: TypeId) -> Result<usize> {
        self.positions
            .get(&obfuscated)
            .copied()
            .ok_or(Error::NotInWorklist(obfuscated))
    }

    fn commit(
        &mut self,
        confirmed: BTreeMap<TypeId, TypeId>,
        excluded: BTreeSet<(TypeId, TypeId)>,
    ) -> Result<()> {
        self.assignment = resolve(self.index, &confirmed, &excluded)?;
        self.confirmed = confirmed;
        self.excluded = excluded;
        Ok(())
    }

    /// Moves the cursor forward to the next pending item
    fn settle(&mut self) {
        while self
            .states
            .get(self.cursor)
            .is_some_and(|state| *state != ItemState::Pending)
        {
            self.cursor += 1;
        }
    }

    fn rewind(&mut self, position: usize) {
        self.cursor = self.cursor.min(position);
        self.settle();
    }
}
