//! Tracking of the in-flight node executions of one propagation wave.

use futures::Stream;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};

use crate::core::error::{Error, ExecutionError};
use crate::core::graph::NodeState;
use crate::core::ids::NodeId;

static NEXT_TASK: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        TaskId(NEXT_TASK.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// How a task finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub task: TaskId,
    pub node: NodeId,
    pub state: NodeState,
}

/// One pending node execution.
pub struct PropagationTask {
    id: TaskId,
    node: NodeId,
    handle: JoinHandle<Result<TaskOutcome, Error>>,
    failed: Arc<AtomicBool>,
}

impl PropagationTask {
    /// Spawns `fut` on the current runtime.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime, like [`tokio::spawn`].
    pub fn spawn<F>(node: NodeId, fut: F) -> Self
    where
        F: Future<Output = Result<TaskOutcome, Error>> + Send + 'static,
    {
        Self::spawn_with_id(TaskId::next(), node, fut)
    }

    pub(crate) fn spawn_with_id<F>(id: TaskId, node: NodeId, fut: F) -> Self
    where
        F: Future<Output = Result<TaskOutcome, Error>> + Send + 'static,
    {
        let failed = Arc::new(AtomicBool::new(false));
        let flag = failed.clone();
        let handle = tokio::spawn(async move {
            let result = fut.await;
            if result.is_err() {
                flag.store(true, Ordering::SeqCst);
            }
            result
        });
        PropagationTask {
            id,
            node,
            handle,
            failed,
        }
    }

    pub(crate) fn reserve_id() -> TaskId {
        TaskId::next()
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.abort_handle()
    }

    fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for PropagationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropagationTask")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// All pending tasks of one propagation wave.
///
/// Handles are shared: a running task appends its downstream work to the same
/// stack it was spawned on. Completions are drained newest first.
#[derive(Clone, Default)]
pub struct PropagationStack {
    tasks: Arc<Mutex<Vec<PropagationTask>>>,
}

impl PropagationStack {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PropagationTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, task: PropagationTask) -> TaskId {
        let id = task.id;
        self.lock().push(task);
        id
    }

    /// Takes a task out of the stack without awaiting it.
    pub fn remove(&self, id: TaskId) -> Option<PropagationTask> {
        let mut tasks = self.lock();
        let pos = tasks.iter().position(|t| t.id == id)?;
        Some(tasks.remove(pos))
    }

    /// Drops tasks that already finished. Failed tasks stay until drained so
    /// their error still reaches whoever waits on the stack.
    pub fn check(&self) {
        self.lock().retain(|t| !t.is_finished() || t.failed());
    }

    /// True when nothing is pending.
    pub fn done(&self) -> bool {
        self.check();
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.lock().iter().any(|t| t.id == id)
    }

    /// True when both handles share one stack.
    pub(crate) fn same_as(&self, other: &PropagationStack) -> bool {
        Arc::ptr_eq(&self.tasks, &other.tasks)
    }

    /// Awaits the most recently appended task. Cancelled tasks are skipped.
    pub async fn next(&self) -> Option<Result<TaskOutcome, Error>> {
        loop {
            let task = self.lock().pop()?;
            match task.handle.await {
                Ok(result) => return Some(result),
                Err(e) if e.is_cancelled() => {
                    log::debug!("Skipping cancelled {} of node {}.", task.id, task.node);
                }
                Err(_) => return Some(Err(ExecutionError::Panicked(task.node).into())),
            }
        }
    }

    /// Awaits every task, including those appended while waiting.
    ///
    /// Returns at the first error; tasks still pending stay on the stack.
    pub async fn wait(&self) -> Result<Vec<TaskOutcome>, Error> {
        let mut outcomes = Vec::new();
        while let Some(result) = self.next().await {
            outcomes.push(result?);
        }
        Ok(outcomes)
    }

    pub async fn wait_timeout(&self, after: Duration) -> Result<Vec<TaskOutcome>, Error> {
        tokio::time::timeout(after, self.wait())
            .await
            .map_err(|_| ExecutionError::Timeout(after))?
    }

    /// Completions one at a time, in the same order as [`wait`](Self::wait).
    pub fn into_stream(self) -> impl Stream<Item = Result<TaskOutcome, Error>> {
        futures::stream::unfold(self, |stack| async move {
            let item = stack.next().await?;
            Some((item, stack))
        })
    }
}

impl fmt::Debug for PropagationStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropagationStack")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::GraphError;
    use futures::StreamExt;

    fn finished(node: NodeId) -> impl Future<Output = Result<TaskOutcome, Error>> + Send + 'static {
        async move {
            Ok(TaskOutcome {
                task: TaskId(0),
                node,
                state: NodeState::Done,
            })
        }
    }

    #[tokio::test]
    async fn test_drains_newest_first() {
        let stack = PropagationStack::new();
        let ids: Vec<NodeId> = (0..3).map(|_| NodeId::new()).collect();
        for id in &ids {
            stack.append(PropagationTask::spawn(*id, finished(*id)));
        }
        tokio::task::yield_now().await;

        let order: Vec<NodeId> = stack.wait().await.unwrap().into_iter().map(|o| o.node).collect();
        assert_eq!(order, vec![ids[2], ids[1], ids[0]]);
        assert!(stack.done());
    }

    #[tokio::test]
    async fn test_includes_tasks_appended_while_waiting() {
        let stack = PropagationStack::new();
        let parent = NodeId::new();
        let child = NodeId::new();
        let inner = stack.clone();
        stack.append(PropagationTask::spawn(parent, async move {
            inner.append(PropagationTask::spawn(child, finished(child)));
            finished(parent).await
        }));

        let order: Vec<NodeId> = stack.wait().await.unwrap().into_iter().map(|o| o.node).collect();
        assert_eq!(order, vec![parent, child]);
    }

    #[tokio::test]
    async fn test_first_error_is_returned() {
        let stack = PropagationStack::new();
        let ok = NodeId::new();
        let bad = NodeId::new();
        stack.append(PropagationTask::spawn(ok, finished(ok)));
        stack.append(PropagationTask::spawn(bad, async move {
            Err(GraphError::UnknownNode(bad).into())
        }));

        let err = stack.wait().await.unwrap_err();
        assert!(matches!(err, Error::Graph(GraphError::UnknownNode(id)) if id == bad));
        assert_eq!(stack.len(), 1);
    }

    #[tokio::test]
    async fn test_check_keeps_failed_tasks() {
        let stack = PropagationStack::new();
        let ok = NodeId::new();
        let bad = NodeId::new();
        stack.append(PropagationTask::spawn(ok, finished(ok)));
        stack.append(PropagationTask::spawn(bad, async move {
            Err(GraphError::UnknownNode(bad).into())
        }));
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        stack.check();
        assert_eq!(stack.len(), 1);
        assert!(!stack.done());
    }

    #[tokio::test]
    async fn test_removed_and_aborted_tasks_are_skipped() {
        let stack = PropagationStack::new();
        let slow = NodeId::new();
        let task = PropagationTask::spawn(slow, async move {
            std::future::pending::<()>().await;
            finished(slow).await
        });
        let abort = task.abort_handle();
        let id = stack.append(task);
        assert!(stack.contains(id));
        abort.abort();
        assert!(stack.wait().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_yields_in_order() {
        let stack = PropagationStack::new();
        let a = NodeId::new();
        let b = NodeId::new();
        stack.append(PropagationTask::spawn(a, finished(a)));
        stack.append(PropagationTask::spawn(b, finished(b)));

        let nodes: Vec<NodeId> = stack
            .into_stream()
            .map(|r| r.unwrap().node)
            .collect()
            .await;
        assert_eq!(nodes, vec![b, a]);
    }
}
