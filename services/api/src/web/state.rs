//! services/api/src/web/state.rs
//!
//! The shared application state, created once at startup and passed to all
//! handlers.

use std::sync::Arc;

use posture_core::identity::IdentityResolver;
use posture_core::leaderboard::Leaderboard;
use posture_core::ledger::SessionLedger;
use posture_core::ports::{AuthStore, CoachModel, FriendDirectory, SessionStore, UserDirectory};
use posture_core::recommend::WeeklyCoach;
use posture_core::stats::StatsAggregator;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<dyn AuthStore>,
    pub users: Arc<dyn UserDirectory>,
    pub friends: Arc<dyn FriendDirectory>,
    pub sessions: Arc<dyn SessionStore>,
    pub coach_model: Arc<dyn CoachModel>,
    pub resolver: IdentityResolver,
    pub ledger: Arc<SessionLedger>,
    pub stats: StatsAggregator,
    pub leaderboard: Leaderboard,
    pub coach: WeeklyCoach,
}
