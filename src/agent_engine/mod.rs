//! The task-solving control loop and the bookkeeping around it.

pub mod engine;
pub mod history;
pub mod loop_control;
pub mod state;
pub mod store;
pub mod worker;

pub use engine::{SolverSettings, TaskSolver};
pub use state::{Task, TaskStatus};
pub use store::{Channel, MemoryTaskStore, TaskStore};
pub use worker::WorkerPool;
