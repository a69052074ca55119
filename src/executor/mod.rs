//! Action execution: the catalog the model chooses from and the code that
//! turns a chosen action into device calls.

pub mod action;
pub mod catalog;
pub mod coordinator;
pub mod dispatcher;
pub mod input;

pub use action::{ActionCall, ActionSelection, AgentAction, ClickKind};
pub use catalog::ActionCatalog;
pub use dispatcher::{ActionExecutor, ExecutorSettings};
