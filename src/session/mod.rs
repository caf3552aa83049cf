//! Build-session documents and their stores.
//!
//! A session document records one build attempt: its status, the current
//! step marker, the ordered step results and live training statistics.
//! Three [`SessionStore`] implementations are provided: in-memory (with
//! live subscriptions), JSON files and SQLite.

pub mod file;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod throttle;
pub mod types;

pub use file::FileSessionStore;
pub use memory::InMemorySessionStore;
pub use sqlite::SqliteSessionStore;
pub use store::SessionStore;
pub use throttle::ProgressThrottle;
pub use types::{
    session_path, BuildSession, CurrentStep, SessionStatus, SessionUpdate, Stage, StepResult,
    StepStatus, ERROR_STEP,
};
