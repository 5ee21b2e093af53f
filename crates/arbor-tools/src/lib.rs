pub mod builtin;
pub mod executor;
pub mod registry;
pub mod schema;

pub use executor::ToolExecutor;
pub use registry::ToolRegistry;
pub use schema::validate_input;
