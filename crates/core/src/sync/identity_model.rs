//! Identity provider contract and an in-process session holder.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Signed-in user as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    pub phone_number: Option<String>,
}

impl UserProfile {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            display_name: None,
            photo_url: None,
            phone_number: None,
        }
    }

    /// Initial shown in avatars: display name, then email, then `U`.
    pub fn initial(&self) -> char {
        self.display_name
            .as_deref()
            .or(self.email.as_deref())
            .and_then(|s| s.chars().next())
            .unwrap_or('U')
            .to_ascii_uppercase()
    }
}

/// Supplies the current user and notifies on session changes.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<UserProfile>;

    /// Receiver that observes every sign-in and sign-out.
    fn subscribe(&self) -> watch::Receiver<Option<UserProfile>>;

    fn current_user_id(&self) -> Option<String> {
        self.current_user().map(|user| user.uid)
    }
}

/// Session holder fed by whatever authenticates the user.
#[derive(Debug)]
pub struct SessionIdentity {
    user: watch::Sender<Option<UserProfile>>,
}

impl SessionIdentity {
    pub fn new() -> Self {
        let (user, _) = watch::channel(None);
        Self { user }
    }

    pub fn signed_in(user: UserProfile) -> Self {
        let (user, _) = watch::channel(Some(user));
        Self { user }
    }

    pub fn set_user(&self, user: Option<UserProfile>) {
        self.user.send_replace(user);
    }

    pub fn sign_out(&self) {
        self.set_user(None);
    }
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_user(&self) -> Option<UserProfile> {
        self.user.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<UserProfile>> {
        self.user.subscribe()
    }
}
