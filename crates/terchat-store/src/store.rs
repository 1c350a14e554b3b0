//! Store handle and on-disk layout.
//!
//! The [`Store`] owns the data directory and the in-memory profile index.
//! Contact and message operations live in their own modules as further
//! `impl Store` blocks.
//!
//! Layout, relative to the data directory:
//!
//! ```text
//! users/user_list.txt
//! users/<id>/contact_list.txt
//! users/<id>/messages.txt
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use terchat_shared::constants::{CONTACT_LIST_FILE, MESSAGES_FILE, USERS_DIR, USER_LIST_FILE};
use terchat_shared::UserId;

use crate::error::Result;
use crate::files;
use crate::locks::LockTable;
use crate::models::UserProfile;

/// Handle to every persisted store. Shared between sessions behind an `Arc`.
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    pub(crate) profiles: RwLock<HashMap<UserId, UserProfile>>,
    pub(crate) locks: LockTable,
}

impl Store {
    /// Open (or create) the store rooted at `data_dir`.
    ///
    /// Creates `users/` and an empty `user_list.txt` when missing, then loads
    /// every profile into memory.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let root = data_dir.join(USERS_DIR);
        std::fs::create_dir_all(&root)?;

        let user_list = root.join(USER_LIST_FILE);
        files::touch(&user_list)?;

        tracing::info!(path = %root.display(), "opening store");

        let profiles = load_profiles(&user_list)?;
        tracing::info!(users = profiles.len(), "loaded user profiles");

        Ok(Self {
            root,
            profiles: RwLock::new(profiles),
            locks: LockTable::default(),
        })
    }

    /// The `users/` directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn user_list_path(&self) -> PathBuf {
        self.root.join(USER_LIST_FILE)
    }

    pub(crate) fn user_dir(&self, id: UserId) -> PathBuf {
        self.root.join(id.to_string())
    }

    pub(crate) fn contacts_path(&self, id: UserId) -> PathBuf {
        self.user_dir(id).join(CONTACT_LIST_FILE)
    }

    pub(crate) fn messages_path(&self, id: UserId) -> PathBuf {
        self.user_dir(id).join(MESSAGES_FILE)
    }
}

/// Parse `user_list.txt`. Unparsable lines are skipped; on duplicate ids the
/// first line wins.
fn load_profiles(path: &Path) -> Result<HashMap<UserId, UserProfile>> {
    let mut profiles = HashMap::new();
    for (lineno, line) in files::read_lines(path)?.iter().enumerate() {
        match line.parse::<UserProfile>() {
            Ok(profile) => {
                if profiles.contains_key(&profile.id) {
                    tracing::warn!(user = %profile.id, line = lineno + 1, "duplicate profile ignored");
                    continue;
                }
                profiles.insert(profile.id, profile);
            }
            Err(e) => {
                tracing::warn!(line = lineno + 1, error = %e, "skipping unreadable profile line");
            }
        }
    }
    Ok(profiles)
}
