mod message;
pub mod session;
pub mod session_manager;

pub use message::{ChatMessage, Role};
pub use session::{ChatSession, TurnState};
pub use session_manager::{ManagerOptions, SessionEvent, SessionManager};
