//! Fixed-size worker pool that solves queued tasks concurrently.
//!
//! Each job carries its own task and device; workers share only the solver,
//! whose per-call state lives on the stack of `solve`.
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::agent_engine::engine::TaskSolver;
use crate::agent_engine::state::Task;
use crate::device::Device;
use crate::errors::{DeskZoomError, DeskZoomResult};

pub struct Job {
    pub task: Task,
    pub device: Arc<dyn Device>,
    pub max_steps: u32,
    reply: oneshot::Sender<DeskZoomResult<Task>>,
}

pub struct WorkerPool {
    solver: Arc<TaskSolver>,
    tx: mpsc::Sender<Job>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers` workers behind a queue holding up to `queue` jobs.
    pub fn spawn(solver: Arc<TaskSolver>, workers: usize, queue: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(queue.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let solver = solver.clone();
                tokio::spawn(async move {
                    loop {
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else {
                            break;
                        };
                        tracing::info!(worker, task_id = %job.task.id, "worker picked up task");
                        let outcome = solver.solve(job.task, job.device.as_ref(), job.max_steps).await;
                        if job.reply.send(outcome).is_err() {
                            tracing::warn!(worker, "task submitter went away before completion");
                        }
                    }
                    tracing::debug!(worker, "worker stopped");
                })
            })
            .collect();
        Self { solver, tx, handles }
    }

    /// Queue a task; the receiver resolves once a worker has solved it.
    ///
    /// The task is in the store when this returns, so it can be cancelled
    /// while still queued.
    pub async fn submit(
        &self,
        task: Task,
        device: Arc<dyn Device>,
        max_steps: u32,
    ) -> DeskZoomResult<oneshot::Receiver<DeskZoomResult<Task>>> {
        let (reply, rx) = oneshot::channel();
        let task_id = task.id.clone();
        self.solver.register(&task).await?;
        self.tx
            .send(Job {
                task,
                device,
                max_steps,
                reply,
            })
            .await
            .map_err(|_| DeskZoomError::Executor("worker pool is shut down".into()))?;
        tracing::debug!(task_id = %task_id, "task queued");
        Ok(rx)
    }

    /// Stop accepting jobs, let queued ones finish, and wait for the workers.
    pub async fn shutdown(self) {
        drop(self.tx);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::state::TaskStatus;
    use crate::agent_engine::store::{MemoryTaskStore, TaskStore};
    use crate::config::AppConfig;
    use crate::llm::provider::GatewayRole;
    use crate::perception::geometry::BoundingBox;
    use crate::testing::{desktop_fixture, FakeDevice, FakeGateway};

    fn result_reply(value: &str) -> String {
        serde_json::json!({
            "observation": "done already",
            "reason": "nothing left to do",
            "action": { "name": "result", "parameters": { "value": value } },
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_pool_solves_each_task() {
        let mut cfg = AppConfig::default();
        cfg.agent.step_delay_ms = 0;
        let gateway = Arc::new(
            FakeGateway::new().script(GatewayRole::Action, [result_reply("a"), result_reply("b"), result_reply("c")]),
        );
        let store = Arc::new(MemoryTaskStore::new());
        let solver = Arc::new(TaskSolver::new(gateway, store.clone(), &cfg).unwrap());
        let pool = WorkerPool::spawn(solver, 2, 8);

        let mut pending = Vec::new();
        for i in 0..3 {
            let device: Arc<dyn Device> =
                Arc::new(FakeDevice::new(desktop_fixture(20, 20, BoundingBox::new(0, 0, 2, 2))));
            pending.push(pool.submit(Task::new(format!("task {i}")), device, 3).await.unwrap());
        }

        let mut results = Vec::new();
        for rx in pending {
            let task = rx.await.unwrap().unwrap();
            assert_eq!(task.status, TaskStatus::Review);
            assert_eq!(store.task(&task.id).await.unwrap().status, TaskStatus::Review);
            results.push(task.result.unwrap());
        }
        results.sort();
        assert_eq!(results, vec!["a", "b", "c"]);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_right_after_submit() {
        let cfg = AppConfig::default();
        let gateway = Arc::new(FakeGateway::new());
        let store = Arc::new(MemoryTaskStore::new());
        let solver = Arc::new(TaskSolver::new(gateway, store.clone(), &cfg).unwrap());
        let pool = WorkerPool::spawn(solver, 1, 4);

        let device: Arc<dyn Device> =
            Arc::new(FakeDevice::new(desktop_fixture(20, 20, BoundingBox::new(0, 0, 2, 2))));
        let task = Task::new("open settings");
        let task_id = task.id.clone();
        let rx = pool.submit(task, device, 5).await.unwrap();
        store.request_cancel(&task_id).await.unwrap();

        let task = rx.await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(store.status(&task_id).await.unwrap(), Some(TaskStatus::Cancelled));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsupported_device_reported_through_pool() {
        let cfg = AppConfig::default();
        let gateway = Arc::new(FakeGateway::new());
        let store = Arc::new(MemoryTaskStore::new());
        let solver = Arc::new(TaskSolver::new(gateway, store, &cfg).unwrap());
        let pool = WorkerPool::spawn(solver, 1, 1);

        let device: Arc<dyn Device> = Arc::new(
            FakeDevice::new(desktop_fixture(4, 4, BoundingBox::new(0, 0, 1, 1)))
                .with_capabilities(Default::default()),
        );
        let rx = pool.submit(Task::new("x"), device, 1).await.unwrap();
        assert!(matches!(rx.await.unwrap(), Err(DeskZoomError::UnsupportedDevice { .. })));
        pool.shutdown().await;
    }
}
