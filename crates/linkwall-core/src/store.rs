//! Canonical, deduplicated message set shared by every source.
//!
//! Records are kept sorted newest first. Ties on `date` fall back to insertion
//! order: a historical prepend or a live push lands in front of what is already
//! there, a paginated append lands behind it.

use crate::message::Message;
use std::cmp::Reverse;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    message: Message,
    seq: i64,
}

impl Entry {
    fn sort_key(&self) -> (Reverse<i64>, i64) {
        (Reverse(self.message.date), self.seq)
    }
}

/// Counts describing what a merge did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Records that were not in the store before.
    pub added: usize,
    /// Existing records whose matched terms grew.
    pub updated: usize,
    /// Inputs rejected as malformed.
    pub skipped: usize,
}

#[derive(Debug, Default)]
pub struct MergeStore {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    front_seq: i64,
    back_seq: i64,
}

impl MergeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch from a historical fetch.
    ///
    /// `append` places the batch behind existing records (pagination of older
    /// results); otherwise it goes in front. An id already present keeps its
    /// record and only gains the incoming matched terms.
    pub fn merge_historical(&mut self, messages: Vec<Message>, append: bool) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        let mut fresh: Vec<Message> = Vec::new();
        let mut fresh_index: HashMap<String, usize> = HashMap::new();

        for message in messages {
            if !message.is_well_formed() {
                debug!(id = %message.id, "Skipping malformed message");
                outcome.skipped += 1;
                continue;
            }
            if let Some(&pos) = self.index.get(&message.id) {
                let existing = &mut self.entries[pos].message;
                let before = existing.matched_terms.len();
                existing.matched_terms.extend(message.matched_terms);
                if existing.matched_terms.len() > before {
                    outcome.updated += 1;
                }
                continue;
            }
            if let Some(&pos) = fresh_index.get(&message.id) {
                fresh[pos].matched_terms.extend(message.matched_terms);
                continue;
            }
            fresh_index.insert(message.id.clone(), fresh.len());
            fresh.push(message);
        }

        if fresh.is_empty() {
            return outcome;
        }

        outcome.added = fresh.len();
        let n = fresh.len() as i64;
        let base = if append {
            let base = self.back_seq;
            self.back_seq += n;
            base
        } else {
            self.front_seq -= n;
            self.front_seq
        };

        for (i, message) in fresh.into_iter().enumerate() {
            self.entries.push(Entry {
                message,
                seq: base + i as i64,
            });
        }
        self.entries.sort_by_key(Entry::sort_key);
        self.reindex_from(0);
        outcome
    }

    /// Merge one live push. Returns `false` when the store already holds the
    /// message; a duplicate push never updates the existing record.
    pub fn merge_streaming(&mut self, message: Message) -> bool {
        if !message.is_well_formed() {
            debug!(id = %message.id, "Skipping malformed live message");
            return false;
        }
        if self.index.contains_key(&message.id) {
            return false;
        }

        self.front_seq -= 1;
        let entry = Entry {
            message,
            seq: self.front_seq,
        };
        let key = entry.sort_key();
        let pos = self.entries.partition_point(|e| e.sort_key() < key);
        self.entries.insert(pos, entry);
        self.reindex_from(pos);
        true
    }

    fn reindex_from(&mut self, start: usize) {
        for (i, entry) in self.entries.iter().enumerate().skip(start) {
            self.index.insert(entry.message.id.clone(), i);
        }
    }

    /// Messages newest first.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|e| &e.message)
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.index.get(id).map(|&pos| &self.entries[pos].message)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything (filter change or explicit refresh).
    pub fn reset(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.front_seq = 0;
        self.back_seq = 0;
    }
}
