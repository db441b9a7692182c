// tabula_core/src/optimistic.rs
use serde_json::Value;

use crate::domain::{Record, RecordId, TableId};
use crate::error::{Result, TabulaError};
use crate::repo::TableRepo;
use crate::resolve::{DeleteOutcome, DeleteResolver};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationState {
    Idle,
    Mutating,
    Committed,
    RolledBack,
}

#[derive(Debug)]
enum Before {
    Edited { key: RecordId, row: Record },
    Removed { key: RecordId },
    Inserted { row: Record },
}

/// An applied but unconfirmed mutation. Settle it exactly once.
#[must_use = "a pending mutation must be settled"]
#[derive(Debug)]
pub struct PendingMutation {
    seq: u64,
    before: Before,
    state: MutationState,
}

impl PendingMutation {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn state(&self) -> MutationState {
        self.state
    }
}

/// A row in list order. A row with a pending remove stays here, hidden by the
/// seq of that remove, so a rollback puts it back where it was.
#[derive(Debug)]
struct Slot {
    row: Record,
    hidden_by: Option<u64>,
}

pub struct OptimisticList {
    table: TableId,
    slots: Vec<Slot>,
    rows: Vec<Record>,
    key_fields: Vec<String>,
    in_flight: usize,
    next_seq: u64,
    last_outcome: Option<MutationState>,
    last_error: Option<String>,
}

impl OptimisticList {
    pub fn new(table: TableId, rows: Vec<Record>, key_fields: Vec<String>) -> Self {
        let mut list = Self {
            table,
            slots: Vec::new(),
            rows: Vec::new(),
            key_fields,
            in_flight: 0,
            next_seq: 0,
            last_outcome: None,
            last_error: None,
        };
        list.replace_rows(rows);
        list
    }

    pub fn table(&self) -> &TableId {
        &self.table
    }

    /// Visible rows, pending removes excluded.
    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    /// Replaces the list with a fresh fetch. Rows whose remove is still in
    /// flight stay hidden until that remove settles.
    pub fn replace_rows(&mut self, rows: Vec<Record>) {
        let removing: Vec<(RecordId, u64)> = self
            .slots
            .iter()
            .filter_map(|s| Some((s.row.key_value(&self.key_fields)?, s.hidden_by?)))
            .collect();
        self.slots = rows
            .into_iter()
            .map(|row| {
                let hidden_by = row.key_value(&self.key_fields).and_then(|k| {
                    removing.iter().find(|(id, _)| *id == k).map(|(_, seq)| *seq)
                });
                Slot { row, hidden_by }
            })
            .collect();
        self.sync();
    }

    fn sync(&mut self) {
        self.rows = self
            .slots
            .iter()
            .filter(|s| s.hidden_by.is_none())
            .map(|s| s.row.clone())
            .collect();
    }

    pub fn state(&self) -> MutationState {
        if self.in_flight > 0 {
            MutationState::Mutating
        } else {
            MutationState::Idle
        }
    }

    pub fn last_outcome(&self) -> Option<MutationState> {
        self.last_outcome
    }

    /// Takes the message of the most recent rollback, if not already taken.
    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    pub fn position(&self, id: &RecordId) -> Option<usize> {
        self.rows
            .iter()
            .position(|r| r.key_value(&self.key_fields).as_ref() == Some(id))
    }

    fn slot_of(&self, id: &RecordId) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.hidden_by.is_none() && s.row.key_value(&self.key_fields).as_ref() == Some(id)
        })
    }

    fn pending(&mut self, before: Before) -> PendingMutation {
        self.next_seq += 1;
        self.in_flight += 1;
        PendingMutation {
            seq: self.next_seq,
            before,
            state: MutationState::Mutating,
        }
    }

    /// Merges `patch` into the row it names; returns the full row to send.
    pub fn begin_edit(&mut self, patch: &Record) -> Result<(PendingMutation, Record)> {
        let key = patch
            .key_value(&self.key_fields)
            .ok_or(TabulaError::MissingKey)?;
        let idx = self
            .slot_of(&key)
            .ok_or_else(|| TabulaError::NotInList(key.to_string()))?;
        let before = self.slots[idx].row.clone();
        self.slots[idx].row.merge(patch);
        let outgoing = self.slots[idx].row.clone();
        self.sync();
        Ok((self.pending(Before::Edited { key, row: before }), outgoing))
    }

    /// Flips a boolean field (null/missing counts as false); returns the patch to send.
    pub fn begin_toggle(
        &mut self,
        id: &RecordId,
        field: &str,
    ) -> Result<(PendingMutation, Record)> {
        let idx = self
            .slot_of(id)
            .ok_or_else(|| TabulaError::NotInList(id.to_string()))?;
        let before = self.slots[idx].row.clone();
        let current = match before.get(field) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
            Some(Value::String(s)) => matches!(s.as_str(), "true" | "1"),
            _ => false,
        };
        self.slots[idx].row.insert(field, !current);
        self.sync();

        let key_field = before.key_field(&self.key_fields).unwrap_or("Id").to_string();
        let patch = Record::new()
            .with(key_field, id.to_value())
            .with(field, !current);
        Ok((
            self.pending(Before::Edited {
                key: id.clone(),
                row: before,
            }),
            patch,
        ))
    }

    pub fn begin_remove(&mut self, id: &RecordId) -> Result<PendingMutation> {
        let idx = self
            .slot_of(id)
            .ok_or_else(|| TabulaError::NotInList(id.to_string()))?;
        let pending = self.pending(Before::Removed { key: id.clone() });
        self.slots[idx].hidden_by = Some(pending.seq);
        self.sync();
        Ok(pending)
    }

    pub fn begin_insert(&mut self, row: Record) -> PendingMutation {
        self.slots.push(Slot {
            row: row.clone(),
            hidden_by: None,
        });
        self.sync();
        self.pending(Before::Inserted { row })
    }

    /// Applies the backend's answer. On failure the touched row is restored
    /// and the error is returned (and kept for [`take_error`](Self::take_error)).
    pub fn settle(
        &mut self,
        mut pending: PendingMutation,
        outcome: Result<Option<Record>>,
    ) -> Result<MutationState> {
        self.in_flight = self.in_flight.saturating_sub(1);
        match outcome {
            Ok(echo) => {
                self.commit(pending.seq, &pending.before, echo);
                pending.state = MutationState::Committed;
                self.last_outcome = Some(pending.state);
                Ok(pending.state)
            }
            Err(e) => Err(self.fail(pending, e)),
        }
    }

    fn fail(&mut self, pending: PendingMutation, e: TabulaError) -> TabulaError {
        tracing::warn!(table = %self.table, seq = pending.seq, error = %e, "mutation rolled back");
        self.rollback(pending.seq, pending.before);
        self.last_outcome = Some(MutationState::RolledBack);
        self.last_error = Some(e.to_string());
        e
    }

    fn commit(&mut self, seq: u64, before: &Before, echo: Option<Record>) {
        match (before, echo) {
            (Before::Edited { key, .. }, Some(echo)) => {
                if let Some(idx) = self.slot_of(key) {
                    self.slots[idx].row.merge(&echo);
                }
            }
            (Before::Inserted { row }, Some(echo)) => {
                if let Some(idx) = self.slots.iter().rposition(|s| s.row == *row) {
                    self.slots[idx].row.merge(&echo);
                }
            }
            (Before::Removed { .. }, _) => {
                self.slots.retain(|s| s.hidden_by != Some(seq));
            }
            _ => return,
        }
        self.sync();
    }

    fn rollback(&mut self, seq: u64, before: Before) {
        match before {
            Before::Edited { key, row } => {
                if let Some(idx) = self.slot_of(&key) {
                    self.slots[idx].row = row;
                }
            }
            Before::Removed { key } => {
                match self.slots.iter_mut().find(|s| s.hidden_by == Some(seq)) {
                    Some(slot) => slot.hidden_by = None,
                    // A refresh without the row landed in between; the fetch wins.
                    None => {
                        tracing::debug!(table = %self.table, %key, "removed row gone after refresh")
                    }
                }
            }
            Before::Inserted { row } => {
                if let Some(idx) = self.slots.iter().rposition(|s| s.row == row) {
                    self.slots.remove(idx);
                }
            }
        }
        self.sync();
    }

    pub async fn edit(&mut self, repo: &dyn TableRepo, patch: &Record) -> Result<MutationState> {
        let (pending, outgoing) = self.begin_edit(patch)?;
        let outcome = repo.update(&self.table, &outgoing).await.map(Some);
        self.settle(pending, outcome)
    }

    pub async fn toggle(
        &mut self,
        repo: &dyn TableRepo,
        id: &RecordId,
        field: &str,
    ) -> Result<MutationState> {
        let (pending, patch) = self.begin_toggle(id, field)?;
        let outcome = repo.update(&self.table, &patch).await.map(Some);
        self.settle(pending, outcome)
    }

    /// Removes locally, then deletes through the resolver.
    pub async fn remove(&mut self, repo: &dyn TableRepo, id: &RecordId) -> Result<DeleteOutcome> {
        let pending = self.begin_remove(id)?;
        match DeleteResolver::new(repo).delete(&self.table, id).await {
            Ok(done) => {
                self.settle(pending, Ok(None))?;
                Ok(done)
            }
            Err(e) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                Err(self.fail(pending, e))
            }
        }
    }

    pub async fn insert(&mut self, repo: &dyn TableRepo, row: Record) -> Result<MutationState> {
        let pending = self.begin_insert(row.clone());
        let outcome = repo.create(&self.table, &row).await.map(Some);
        self.settle(pending, outcome)
    }
}
