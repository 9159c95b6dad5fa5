//! Authenticated identity boundary.
//!
//! The sign-in flow itself lives elsewhere; this crate only needs to know
//! who the current user is so every mutation can be stamped with
//! `created_by` / `last_modified_by`.

use parking_lot::RwLock;

/// Source of the current user id.
pub trait IdentityProvider: Send + Sync {
    /// `None` when nobody is signed in. Empty ids are treated as absent.
    fn current_user_id(&self) -> Option<String>;
}

/// Mutable session state fed by the auth layer.
#[derive(Debug, Default)]
pub struct Session {
    user_id: RwLock<Option<String>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session that is already signed in.
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        let session = Self::new();
        session.sign_in(user_id);
        session
    }

    pub fn sign_in(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        tracing::debug!(user_id = %user_id, "session signed in");
        *self.user_id.write() = Some(user_id);
    }

    pub fn sign_out(&self) {
        tracing::debug!("session signed out");
        *self.user_id.write() = None;
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_user_id().is_some()
    }
}

impl IdentityProvider for Session {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.read().clone().filter(|id| !id.is_empty())
    }
}
