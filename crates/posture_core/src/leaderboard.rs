//! crates/posture_core/src/leaderboard.rs
//!
//! Read-only projection joining a user's friend list with each friend's
//! current score. Friends without a score yet rank with 0; ordering is total
//! and deterministic.

use std::sync::Arc;

use tracing::warn;

use crate::domain::{LeaderboardEntry, UserKey};
use crate::identity::IdentityResolver;
use crate::ports::{FriendDirectory, SessionStore};

/// Sorts entries by descending score, ties broken by ascending name. Stable
/// and total: two entries compare equal only when both fields match.
pub fn rank(mut entries: Vec<LeaderboardEntry>) -> Vec<LeaderboardEntry> {
    entries.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
    entries
}

#[derive(Clone)]
pub struct Leaderboard {
    friends: Arc<dyn FriendDirectory>,
    store: Arc<dyn SessionStore>,
    resolver: IdentityResolver,
}

impl Leaderboard {
    pub fn new(
        friends: Arc<dyn FriendDirectory>,
        store: Arc<dyn SessionStore>,
        resolver: IdentityResolver,
    ) -> Self {
        Self {
            friends,
            store,
            resolver,
        }
    }

    /// Ranked scores for the owner's friends. Degrades to an empty list when
    /// the registry is unavailable.
    pub async fn entries(&self, owner_email: &str) -> Vec<LeaderboardEntry> {
        let owner = owner_email.trim().to_lowercase();
        let friends = match self.friends.friends_of(&owner).await {
            Ok(friends) => friends,
            Err(err) => {
                warn!(owner = %owner, %err, "friend lookup degraded to empty leaderboard");
                return Vec::new();
            }
        };

        let mut entries = Vec::with_capacity(friends.len());
        for friend in friends {
            // Resolve through the email when one is on file so a friend who
            // registered after being added still maps to their durable key.
            let key = match friend.email.as_deref().filter(|e| !e.is_empty()) {
                Some(email) => self.resolver.resolve(email).await,
                None => UserKey::new(friend.friend_key),
            };
            let score = match self.store.score(key).await {
                Ok(score) => score.unwrap_or(0),
                Err(err) => {
                    warn!(friend = %friend.display_name, %err, "score lookup degraded to zero");
                    0
                }
            };
            entries.push(LeaderboardEntry {
                name: friend.display_name,
                score,
            });
        }
        rank(entries)
    }
}
