//! Operator identities, shared secrets and capability bits.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bitflags::bitflags;
use hickory_proto::rr::Name;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::ControlError;
use crate::metrics;

bitflags! {
    /// Administrative operations an identity may perform.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u8 {
        /// List zones.
        const LIST = 1;
        /// Load zones.
        const WRITE = 2;
        /// Drop zones.
        const DROP = 4;
        /// Manage users.
        const USER = 8;
    }
}

impl Capabilities {
    /// Parse a power name as used by `USER ADDPOWER`.
    pub fn from_power(power: &str) -> Option<Self> {
        match power.to_ascii_lowercase().as_str() {
            "list" => Some(Self::LIST),
            "write" => Some(Self::WRITE),
            "drop" => Some(Self::DROP),
            "user" => Some(Self::USER),
            "all" => Some(Self::all()),
            _ => None,
        }
    }

    /// Short name of a single capability, for errors and logs.
    pub fn label(self) -> &'static str {
        if self == Self::LIST {
            "list"
        } else if self == Self::WRITE {
            "write"
        } else if self == Self::DROP {
            "drop"
        } else if self == Self::USER {
            "user"
        } else {
            "mixed"
        }
    }
}

/// Normalize an identity to a lowercase fully-qualified name.
pub fn normalize_identity(identity: &Name) -> Name {
    let mut identity = identity.to_lowercase();
    identity.set_fqdn(true);
    identity
}

/// Thread-safe user table shared by all listeners.
#[derive(Debug, Clone)]
pub struct AuthModel {
    inner: Arc<RwLock<AuthInner>>,
}

#[derive(Debug)]
struct AuthInner {
    superuser: Name,
    rights: HashMap<Name, Capabilities>,
    secrets: HashMap<Name, String>,
}

impl AuthModel {
    /// Create a user table holding only the superuser.
    pub fn new(superuser: &Name, secret: impl Into<String>) -> Self {
        let superuser = normalize_identity(superuser);
        let mut rights = HashMap::new();
        let mut secrets = HashMap::new();
        rights.insert(superuser.clone(), Capabilities::all());
        secrets.insert(superuser.clone(), secret.into());

        Self {
            inner: Arc::new(RwLock::new(AuthInner {
                superuser,
                rights,
                secrets,
            })),
        }
    }

    /// The superuser identity.
    pub fn superuser(&self) -> Name {
        self.inner.read().superuser.clone()
    }

    /// True if `identity` is the superuser.
    pub fn is_superuser(&self, identity: &Name) -> bool {
        self.inner.read().superuser == normalize_identity(identity)
    }

    /// Base64 secret for `identity`.
    pub fn secret(&self, identity: &Name) -> Option<String> {
        self.inner
            .read()
            .secrets
            .get(&normalize_identity(identity))
            .cloned()
    }

    /// Capability bits for `identity`; empty for unknown identities.
    pub fn capabilities(&self, identity: &Name) -> Capabilities {
        self.inner
            .read()
            .rights
            .get(&normalize_identity(identity))
            .copied()
            .unwrap_or_default()
    }

    /// Check that `identity` holds every bit in `required`.
    pub fn authorize(&self, identity: &Name, required: Capabilities) -> Result<(), ControlError> {
        if self.capabilities(identity).contains(required) {
            Ok(())
        } else {
            Err(ControlError::Forbidden {
                identity: normalize_identity(identity),
                required: required.label(),
            })
        }
    }

    /// Add (or re-key) a user. New users start with no capabilities; an
    /// existing user keeps theirs.
    pub fn add_user(&self, identity: &Name, secret: &str) -> Result<(), ControlError> {
        let identity = normalize_identity(identity);
        if STANDARD.decode(secret).is_err() {
            return Err(ControlError::InvalidSecret(identity));
        }

        let mut inner = self.inner.write();
        if identity == inner.superuser {
            return Err(ControlError::ProtectedUser(identity));
        }
        inner.secrets.insert(identity.clone(), secret.to_string());
        inner.rights.entry(identity.clone()).or_default();
        debug!(%identity, users = inner.secrets.len(), "added user");
        metrics::record_user_count(inner.secrets.len());
        Ok(())
    }

    /// Remove a user's secret and capabilities.
    pub fn drop_user(&self, identity: &Name) -> Result<(), ControlError> {
        let identity = normalize_identity(identity);
        let mut inner = self.inner.write();
        if identity == inner.superuser {
            return Err(ControlError::ProtectedUser(identity));
        }
        let known = inner.secrets.remove(&identity).is_some();
        let had_rights = inner.rights.remove(&identity).is_some();
        if !known && !had_rights {
            return Err(ControlError::UnknownUser(identity));
        }
        debug!(%identity, users = inner.secrets.len(), "dropped user");
        metrics::record_user_count(inner.secrets.len());
        Ok(())
    }

    /// Add capability bits to a user.
    pub fn grant(&self, identity: &Name, caps: Capabilities) -> Result<Capabilities, ControlError> {
        let identity = normalize_identity(identity);
        let mut inner = self.inner.write();
        let rights = inner
            .rights
            .get_mut(&identity)
            .ok_or_else(|| ControlError::UnknownUser(identity.clone()))?;
        *rights |= caps;
        let now = *rights;
        debug!(%identity, rights = ?now, "granted capabilities");
        Ok(now)
    }

    /// Remove capability bits from a user. The superuser cannot be demoted.
    pub fn revoke(&self, identity: &Name, caps: Capabilities) -> Result<Capabilities, ControlError> {
        let identity = normalize_identity(identity);
        let mut inner = self.inner.write();
        if identity == inner.superuser {
            return Err(ControlError::ProtectedUser(identity));
        }
        let rights = inner
            .rights
            .get_mut(&identity)
            .ok_or_else(|| ControlError::UnknownUser(identity.clone()))?;
        rights.remove(caps);
        let now = *rights;
        debug!(%identity, rights = ?now, "revoked capabilities");
        Ok(now)
    }

    /// All identities with a secret, sorted.
    pub fn users(&self) -> Vec<Name> {
        let mut users: Vec<Name> = self.inner.read().secrets.keys().cloned().collect();
        users.sort();
        users
    }

    /// Number of identities with a secret.
    pub fn len(&self) -> usize {
        self.inner.read().secrets.len()
    }

    /// Never true in practice: the superuser is always present.
    pub fn is_empty(&self) -> bool {
        self.inner.read().secrets.is_empty()
    }
}
