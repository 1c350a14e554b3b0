//! User directory: profile lookup and registration.

use std::sync::PoisonError;

use terchat_shared::UserId;

use crate::error::{Result, StoreError};
use crate::files;
use crate::models::UserProfile;
use crate::store::Store;

impl Store {
    pub fn is_registered(&self, id: UserId) -> bool {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn profile(&self, id: UserId) -> Option<UserProfile> {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn registered_count(&self) -> usize {
        self.profiles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Register a new identity.
    ///
    /// The check and the write happen under the profile index write lock, so
    /// of two concurrent registrations for the same id exactly one succeeds
    /// and the other gets [`StoreError::AlreadyRegistered`].
    ///
    /// The per-user directory and its empty contact / message files are
    /// created before the profile line is appended; files left over from an
    /// earlier run are kept as they are.
    pub fn register(&self, profile: &UserProfile) -> Result<()> {
        profile.validate()?;

        let mut profiles = self
            .profiles
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if profiles.contains_key(&profile.id) {
            return Err(StoreError::AlreadyRegistered(profile.id));
        }

        std::fs::create_dir_all(self.user_dir(profile.id))?;
        files::touch(&self.contacts_path(profile.id))?;
        files::touch(&self.messages_path(profile.id))?;
        files::append_line(&self.user_list_path(), &profile.to_line())?;

        profiles.insert(profile.id, profile.clone());
        tracing::info!(user = %profile.id, username = %profile.username, "registered user");
        Ok(())
    }
}
