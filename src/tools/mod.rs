pub mod catalog;
pub mod executor;
pub mod registry;
pub mod schema;

pub use catalog::{register_catalog, ApiNode, Project, Workspace};
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolOutput, ToolRegistry, ToolSet, ToolSummary};
pub use schema::schema_of;
