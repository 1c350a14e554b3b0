//! Per-user message log: `users/<owner>/messages.txt`.
//!
//! Every exchanged message is written twice, once into each side's log, so
//! that each side tracks its own read status.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use terchat_shared::UserId;

use crate::error::{Result, StoreError};
use crate::files;
use crate::models::{check_text, StoredMessage};
use crate::store::Store;

impl Store {
    /// Append one unread row to `owner`'s log.
    pub fn append_message(
        &self,
        owner: UserId,
        peer: UserId,
        text: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        check_text(text)?;
        let row = StoredMessage::unread(peer, text, timestamp);
        let path = self.messages_path(owner);
        self.locks
            .with(owner, || files::append_line(&path, &row.to_line()))
    }

    /// Persist a message from `from` to `to` in both logs.
    ///
    /// Independent of whether `to` is online. The two appends take the two
    /// identity locks one after the other, never together. Either both rows
    /// are written or neither is: a missing recipient log fails before any
    /// write, and a failed recipient append retracts the sender row.
    pub fn record_exchange(
        &self,
        from: UserId,
        to: UserId,
        text: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        check_text(text)?;
        let recipient_log = self.messages_path(to);
        if !recipient_log.is_file() {
            return Err(StoreError::NotFound(recipient_log));
        }

        self.append_message(from, to, text, timestamp)?;
        if let Err(e) = self.append_message(to, from, text, timestamp) {
            let sender_row = StoredMessage::unread(to, text, timestamp).to_line();
            if let Err(undo) = self.retract_line(from, &sender_row) {
                tracing::error!(user = %from, error = %undo, "could not retract sender row");
            }
            return Err(e);
        }

        tracing::debug!(from = %from, to = %to, len = text.len(), "message stored");
        Ok(())
    }

    /// Remove the last occurrence of `line` from `owner`'s log.
    fn retract_line(&self, owner: UserId, line: &str) -> Result<bool> {
        let path = self.messages_path(owner);
        self.locks.with(owner, || {
            let mut lines = files::read_lines(&path)?;
            let Some(pos) = lines.iter().rposition(|existing| existing == line) else {
                return Ok(false);
            };
            lines.remove(pos);
            files::rewrite_lines(&path, &lines)?;
            Ok(true)
        })
    }

    /// Every readable row of `owner`'s log, oldest first.
    pub fn messages(&self, owner: UserId) -> Result<Vec<StoredMessage>> {
        let path = self.messages_path(owner);
        let lines = self.locks.with(owner, || files::read_lines(&path))?;
        Ok(parse_rows(owner, &lines))
    }

    /// Unread row count per peer. An empty map means nothing is unread.
    pub fn count_unread_by_sender(&self, owner: UserId) -> Result<BTreeMap<UserId, usize>> {
        let mut counts = BTreeMap::new();
        for row in self.messages(owner)? {
            if !row.read {
                *counts.entry(row.peer).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// Mark every row exchanged with `peer` as read and return those rows.
    ///
    /// All peer-matching rows are returned regardless of their previous
    /// status. Other rows, including unreadable ones, are written back
    /// byte-for-byte in their original order.
    pub fn mark_read(&self, owner: UserId, peer: UserId) -> Result<Vec<StoredMessage>> {
        let path = self.messages_path(owner);

        self.locks.with(owner, || {
            let lines = files::read_lines(&path)?;
            let mut affected = Vec::new();
            let mut changed = false;

            let rewritten: Vec<String> = lines
                .into_iter()
                .map(|line| match line.parse::<StoredMessage>() {
                    Ok(mut row) if row.peer == peer => {
                        changed |= !row.read;
                        row.read = true;
                        let updated = row.to_line();
                        affected.push(row);
                        updated
                    }
                    _ => line,
                })
                .collect();

            if changed {
                files::rewrite_lines(&path, &rewritten)?;
            }

            tracing::debug!(user = %owner, peer = %peer, rows = affected.len(), "marked messages read");
            Ok(affected)
        })
    }
}

fn parse_rows(owner: UserId, lines: &[String]) -> Vec<StoredMessage> {
    lines
        .iter()
        .filter_map(|line| match line.parse::<StoredMessage>() {
            Ok(row) => Some(row),
            Err(e) => {
                tracing::warn!(user = %owner, error = %e, "skipping unreadable message line");
                None
            }
        })
        .collect()
}
