pub mod config;
pub mod error;
pub mod event;
pub mod state;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{ArborError, Result};
pub use event::{EventBus, TraceEvent};
pub use state::{AgentState, StateUpdate};
pub use types::*;
