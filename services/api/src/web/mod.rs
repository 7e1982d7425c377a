pub mod auth;
pub mod coach;
pub mod middleware;
pub mod rest;
pub mod state;

// Re-export the handlers the binary wires into the router.
pub use coach::{chat_handler, recommendation_handler};
pub use middleware::require_auth;
pub use rest::{
    add_friend_handler, leaderboard_handler, list_friends_handler, post_event_handler,
    profile_handler, stats_summary_handler,
};
