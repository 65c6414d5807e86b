use tracing::info;

use lms_core::model::UserId;
use storage::LocalCache;

use crate::error::IdentityError;

/// Remembers who is signed in on this device.
#[derive(Clone)]
pub struct IdentityService {
    cache: LocalCache,
}

impl IdentityService {
    #[must_use]
    pub fn new(cache: LocalCache) -> Self {
        Self { cache }
    }

    /// Sanitize and validate `input`, then remember it as the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidUserId` if the sanitized input is not a valid id.
    pub fn login(&self, input: &str) -> Result<UserId, IdentityError> {
        let user = UserId::from_login_input(input)?;
        if !self.cache.save_identity(&user) {
            info!(user = %user, "identity not persisted; signed in for this run only");
        }
        info!(user = %user, "signed in");
        Ok(user)
    }

    #[must_use]
    pub fn current(&self) -> Option<UserId> {
        self.cache.load_identity()
    }

    /// Forget the signed-in user. Cached progress stays for the next login.
    pub fn logout(&self) -> Option<UserId> {
        let user = self.current();
        self.cache.clear_identity();
        if let Some(user) = &user {
            info!(user = %user, "signed out");
        }
        user
    }
}
