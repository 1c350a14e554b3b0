//! Per-user contact list: `users/<owner>/contact_list.txt`.

use terchat_shared::UserId;

use crate::error::Result;
use crate::files;
use crate::models::Contact;
use crate::store::Store;

/// Result of [`Store::add_contact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyExists,
}

impl Store {
    /// All contacts of `owner` in insertion order.
    ///
    /// An empty list is `Ok(vec![])`; a missing file (owner never registered)
    /// is [`StoreError::NotFound`](crate::StoreError::NotFound).
    pub fn list_contacts(&self, owner: UserId) -> Result<Vec<Contact>> {
        let path = self.contacts_path(owner);
        let lines = self.locks.with(owner, || files::read_lines(&path))?;

        Ok(lines
            .iter()
            .filter_map(|line| match line.parse::<Contact>() {
                Ok(contact) => Some(contact),
                Err(e) => {
                    tracing::warn!(user = %owner, error = %e, "skipping unreadable contact line");
                    None
                }
            })
            .collect())
    }

    /// Append `contact` unless an entry with the same id already exists.
    pub fn add_contact(&self, owner: UserId, contact: &Contact) -> Result<AddOutcome> {
        contact.validate()?;
        let path = self.contacts_path(owner);

        self.locks.with(owner, || {
            let lines = files::read_lines(&path)?;
            if lines.iter().any(|line| leading_id(line) == Some(contact.id)) {
                return Ok(AddOutcome::AlreadyExists);
            }

            files::append_line(&path, &contact.to_line())?;
            tracing::debug!(user = %owner, contact = %contact.id, "contact added");
            Ok(AddOutcome::Added)
        })
    }

    /// Remove every entry for `contact_id`. Returns `true` if anything was
    /// removed; removing an absent contact is not an error.
    pub fn remove_contact(&self, owner: UserId, contact_id: UserId) -> Result<bool> {
        let path = self.contacts_path(owner);

        self.locks.with(owner, || {
            let lines = files::read_lines(&path)?;
            let before = lines.len();
            let kept: Vec<String> = lines
                .into_iter()
                .filter(|line| leading_id(line) != Some(contact_id))
                .collect();

            if kept.len() == before {
                return Ok(false);
            }

            files::rewrite_lines(&path, &kept)?;
            tracing::debug!(user = %owner, contact = %contact_id, "contact removed");
            Ok(true)
        })
    }
}

/// Id at the start of a contact line; lines that do not start with one are
/// never matched and so survive every rewrite.
fn leading_id(line: &str) -> Option<UserId> {
    line.split(',').next()?.parse().ok()
}
