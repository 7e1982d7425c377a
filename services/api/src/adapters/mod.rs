pub mod coach_llm;
pub mod db;

pub use coach_llm::OpenAiCoachAdapter;
pub use db::PgStore;
