pub mod agent_engine;
pub mod config;
pub mod device;
pub mod errors;
pub mod executor;
pub mod grounding;
pub mod llm;
pub mod perception;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use crate::agent_engine::history::SessionHistory;
use crate::agent_engine::{MemoryTaskStore, TaskSolver, WorkerPool};
use crate::config::AppConfig;
use crate::errors::DeskZoomResult;
use crate::llm::registry::ProviderRegistry;

/// Install the fmt subscriber; `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

/// Store, solver and worker pool wired from one config.
pub struct AgentRuntime {
    pub store: Arc<MemoryTaskStore>,
    pub solver: Arc<TaskSolver>,
    pub pool: WorkerPool,
}

impl AgentRuntime {
    /// Must be called from within a tokio runtime; workers start immediately.
    pub fn from_config(config: &AppConfig) -> DeskZoomResult<Self> {
        let registry = ProviderRegistry::from_config(config)?;
        tracing::info!(providers = ?registry.list_names(), "provider registry ready");

        let store = if config.storage.journal {
            let history = SessionHistory::create(&config.storage.resolve_data_dir())?;
            Arc::new(MemoryTaskStore::with_journal(history))
        } else {
            Arc::new(MemoryTaskStore::new())
        };

        let solver = Arc::new(TaskSolver::new(Arc::new(registry), store.clone(), config)?);
        let workers = config.agent.workers.max(1);
        let pool = WorkerPool::spawn(solver.clone(), workers, workers * 4);
        tracing::info!(workers, "worker pool started");

        Ok(Self { store, solver, pool })
    }
}
