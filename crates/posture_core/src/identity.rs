//! crates/posture_core/src/identity.rs
//!
//! Maps loosely-typed user identifiers (an email, or any opaque string) to a
//! stable [`UserKey`]. Email-shaped identifiers prefer the durable id of a
//! registered user; everything else falls back to a deterministic hash so the
//! same raw identifier always resolves to the same key, registry or not.

use std::sync::Arc;

use tracing::warn;

use crate::domain::UserKey;
use crate::ports::UserDirectory;

/// Stable positive hash of an identifier, fitting a 32-bit integer range.
///
/// Polynomial hash (x31) of the trimmed, lowercased string, mod 1e9 and
/// floored at 1 so zero never becomes a key.
pub fn stable_hash(raw: &str) -> i64 {
    let normalized = raw.trim().to_lowercase();
    let mut hash: i64 = 0;
    for ch in normalized.chars() {
        hash = (hash * 31 + i64::from(u32::from(ch))) % 1_000_000_000;
    }
    hash.max(1)
}

/// Resolves raw identifiers into [`UserKey`]s. Total: never fails and never
/// mutates anything.
#[derive(Clone)]
pub struct IdentityResolver {
    directory: Arc<dyn UserDirectory>,
}

impl IdentityResolver {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }

    /// Resolves a raw identifier to a stable key.
    ///
    /// Identifiers containing `@` are looked up as emails (case-insensitive
    /// exact match); a hit returns the registered user's durable id. A miss,
    /// a non-email identifier, or a directory failure all fall back to
    /// [`stable_hash`].
    pub async fn resolve(&self, raw: &str) -> UserKey {
        let normalized = raw.trim().to_lowercase();
        if normalized.contains('@') {
            match self.directory.find_user_by_email(&normalized).await {
                Ok(Some(user)) => return UserKey::registered(user.id),
                Ok(None) => {}
                Err(err) => {
                    warn!(identifier = %normalized, %err, "directory lookup failed, using hash fallback");
                }
            }
        }
        UserKey::new(stable_hash(&normalized))
    }
}
