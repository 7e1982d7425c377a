pub mod domain;
pub mod identity;
pub mod leaderboard;
pub mod ledger;
pub mod ports;
pub mod recommend;
pub mod score;
pub mod stats;

#[cfg(test)]
mod testsupport;

pub use domain::{
    CoachReply, EventKind, FriendRecord, IncidentKind, LeaderboardEntry, NewFriend,
    NewRecommendation, SessionRecord, SessionSnapshot, SessionTotals, StatsRange, StatsSummary,
    UserCredentials, UserKey, UserProfile, WeeklyRecommendation,
};
pub use identity::{stable_hash, IdentityResolver};
pub use leaderboard::Leaderboard;
pub use ledger::SessionLedger;
pub use ports::{
    AuthStore, CoachModel, FriendDirectory, PortError, PortResult, RecommendationStore,
    SessionStore, UserDirectory,
};
pub use recommend::WeeklyCoach;
pub use score::compute_score;
pub use stats::StatsAggregator;
