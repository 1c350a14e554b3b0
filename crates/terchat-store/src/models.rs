//! Domain model structs persisted in the per-user text files.
//!
//! Each struct knows how to render itself as one line of its file and how to
//! parse that line back. The same line shape doubles as the record body for
//! contacts, so the session layer parses `AddContact` bodies with
//! [`Contact::from_str`](std::str::FromStr).

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use terchat_shared::constants::TIMESTAMP_FORMAT;
use terchat_shared::UserId;

use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// UserProfile
// ---------------------------------------------------------------------------

/// A registered user. Created once by registration and never modified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub phone: String,
    pub name: String,
    pub surname: String,
}

impl UserProfile {
    /// Build a profile from a registration body `username,phone,name,surname`.
    pub fn from_registration(id: UserId, body: &str) -> Result<Self> {
        let fields = split_fields::<4>(body.trim_end_matches(['\r', '\n']))?;
        let [username, phone, name, surname] = fields;
        let profile = Self {
            id,
            username,
            phone,
            name,
            surname,
        };
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<()> {
        check_field("username", &self.username)?;
        check_field("phone", &self.phone)?;
        check_field("name", &self.name)?;
        check_field("surname", &self.surname)
    }

    /// `id,username,phone,name,surname`
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.id, self.username, self.phone, self.name, self.surname
        )
    }
}

impl FromStr for UserProfile {
    type Err = StoreError;

    fn from_str(line: &str) -> Result<Self> {
        let fields = split_fields::<5>(line.trim_end_matches(['\r', '\n']))?;
        let [id, username, phone, name, surname] = fields;
        Ok(Self {
            id: parse_id(&id)?,
            username,
            phone,
            name,
            surname,
        })
    }
}

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// An entry in a user's contact list. A snapshot of the contact's details at
/// the time it was added; later profile changes do not propagate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub id: UserId,
    pub name: String,
    pub surname: String,
    pub phone: String,
}

impl Contact {
    pub fn validate(&self) -> Result<()> {
        check_field("name", &self.name)?;
        check_field("surname", &self.surname)?;
        check_field("phone", &self.phone)
    }

    /// `id,name,surname,phone`
    pub fn to_line(&self) -> String {
        format!("{},{},{},{}", self.id, self.name, self.surname, self.phone)
    }
}

impl FromStr for Contact {
    type Err = StoreError;

    fn from_str(line: &str) -> Result<Self> {
        let fields = split_fields::<4>(line.trim_end_matches(['\r', '\n']))?;
        let [id, name, surname, phone] = fields;
        Ok(Self {
            id: parse_id(&id)?,
            name,
            surname,
            phone,
        })
    }
}

// ---------------------------------------------------------------------------
// StoredMessage
// ---------------------------------------------------------------------------

/// One row of a user's message log. `peer` is the other side of the
/// exchange; `read` tracks whether the owner has consumed the row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMessage {
    pub timestamp: DateTime<Utc>,
    pub peer: UserId,
    pub text: String,
    pub read: bool,
}

impl StoredMessage {
    pub fn unread(peer: UserId, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            peer,
            text: text.into(),
            read: false,
        }
    }

    /// `timestamp, peer, text, read(0|1)`
    pub fn to_line(&self) -> String {
        format!(
            "{}, {}, {}, {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.peer,
            self.text,
            u8::from(self.read)
        )
    }
}

impl FromStr for StoredMessage {
    type Err = StoreError;

    // The text may itself contain ", ", so the timestamp and peer are taken
    // from the left and the read flag from the right.
    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let malformed = || StoreError::InvalidField(format!("malformed message line: {line:?}"));

        let (ts, rest) = line.split_once(", ").ok_or_else(malformed)?;
        let (peer, rest) = rest.split_once(", ").ok_or_else(malformed)?;
        let (text, read) = rest.rsplit_once(", ").ok_or_else(malformed)?;

        let naive = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
            .map_err(|e| StoreError::InvalidField(format!("bad timestamp {ts:?}: {e}")))?;
        let read = match read.trim() {
            "0" => false,
            "1" => true,
            other => {
                return Err(StoreError::InvalidField(format!(
                    "bad read flag {other:?}"
                )))
            }
        };

        Ok(Self {
            timestamp: Utc.from_utc_datetime(&naive),
            peer: parse_id(peer)?,
            text: text.to_string(),
            read,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Reject values that would break the comma / line separated files.
fn check_field(what: &str, value: &str) -> Result<()> {
    if value.contains([',', '\n', '\r']) {
        return Err(StoreError::InvalidField(format!(
            "{what} must not contain commas or line breaks"
        )));
    }
    Ok(())
}

/// Message text only has to stay on one line.
pub(crate) fn check_text(text: &str) -> Result<()> {
    if text.contains(['\n', '\r']) {
        return Err(StoreError::InvalidField(
            "message text must not contain line breaks".to_string(),
        ));
    }
    Ok(())
}

fn split_fields<const N: usize>(line: &str) -> Result<[String; N]> {
    let parts: Vec<String> = line.split(',').map(str::to_string).collect();
    parts.try_into().map_err(|parts: Vec<String>| {
        StoreError::InvalidField(format!(
            "expected {} comma separated fields, got {}",
            N,
            parts.len()
        ))
    })
}

fn parse_id(value: &str) -> Result<UserId> {
    value
        .parse::<UserId>()
        .map_err(|e| StoreError::InvalidField(format!("bad user id {value:?}: {e}")))
}
