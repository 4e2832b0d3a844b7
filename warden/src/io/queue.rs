//! Task Queue persisted as `.warden/state/tasks.json`.
//!
//! Every mutation is written back atomically before it returns.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::fault::InvariantViolation;
use crate::core::selector::{self, Requeue};
use crate::core::types::{Task, TaskId, TaskStatus};
use crate::io::atomic::write_json_atomic;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct QueueFile {
    tasks: Vec<Task>,
}

#[derive(Debug, Clone)]
pub struct TaskQueue {
    path: PathBuf,
    tasks: Vec<Task>,
}

impl TaskQueue {
    /// Write an empty queue file.
    pub fn create(path: &Path) -> Result<Self> {
        let queue = Self {
            path: path.to_path_buf(),
            tasks: Vec::new(),
        };
        queue.save()?;
        Ok(queue)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read task queue {}", path.display()))?;
        let file: QueueFile = serde_json::from_str(&contents)
            .with_context(|| format!("parse task queue {}", path.display()))?;
        debug!(tasks = file.tasks.len(), "task queue loaded");
        Ok(Self {
            path: path.to_path_buf(),
            tasks: file.tasks,
        })
    }

    fn save(&self) -> Result<()> {
        write_json_atomic(
            &self.path,
            &QueueFile {
                tasks: self.tasks.clone(),
            },
        )
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    fn get_mut(&mut self, id: TaskId) -> Result<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or_else(|| InvariantViolation(format!("unknown task id {id}")).into())
    }

    #[instrument(skip(self, description))]
    pub fn enqueue(&mut self, description: &str, created_at: &str, remediates: Option<TaskId>) -> Result<TaskId> {
        let id = selector::next_task_id(&self.tasks);
        self.tasks.push(Task {
            id,
            description: description.trim().to_string(),
            status: TaskStatus::Pending,
            attempts: 0,
            created_at: created_at.to_string(),
            consecutive_rejections: 0,
            remediates,
        });
        self.save()?;
        info!(task = id, "task enqueued");
        Ok(id)
    }

    /// Select the oldest pending task and mark it `in_progress`.
    pub fn dequeue_oldest_pending(&mut self) -> Result<Option<Task>> {
        let Some(id) = selector::oldest_pending(&self.tasks).map(|task| task.id) else {
            return Ok(None);
        };
        let task = self.get_mut(id)?;
        task.status = TaskStatus::InProgress;
        let task = task.clone();
        self.save()?;
        debug!(task = id, "task dequeued");
        Ok(Some(task))
    }

    pub fn mark_done(&mut self, id: TaskId) -> Result<()> {
        let task = self.get_mut(id)?;
        task.status = TaskStatus::Done;
        task.consecutive_rejections = 0;
        self.save()
    }

    /// Increment attempts and return the task to `pending`, or archive it as `stuck`.
    pub fn requeue_with_backoff(&mut self, id: TaskId, attempt_cap: u32) -> Result<Requeue> {
        let outcome = selector::requeue_with_backoff(self.get_mut(id)?, attempt_cap);
        self.save()?;
        if let Requeue::Stuck { attempts } = outcome {
            warn!(task = id, attempts, "task archived as stuck");
        }
        Ok(outcome)
    }

    /// Count one more validation rejection for the task. Returns the new streak.
    pub fn record_rejection(&mut self, id: TaskId) -> Result<u32> {
        let task = self.get_mut(id)?;
        task.consecutive_rejections += 1;
        let streak = task.consecutive_rejections;
        self.save()?;
        Ok(streak)
    }

    pub fn list_stuck(&self) -> Vec<&Task> {
        selector::stuck(&self.tasks).collect()
    }

    /// Requeue tasks orphaned `in_progress` by a crashed invocation, counting
    /// one attempt each.
    pub fn reclaim_in_progress(&mut self, attempt_cap: u32) -> Result<Vec<(TaskId, Requeue)>> {
        let reclaimed = selector::reclaim_in_progress(&mut self.tasks, attempt_cap);
        if !reclaimed.is_empty() {
            warn!(?reclaimed, "reclaimed stale in-progress tasks");
            self.save()?;
        }
        Ok(reclaimed)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|task| task.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> (tempfile::TempDir, TaskQueue) {
        let temp = tempfile::tempdir().expect("tempdir");
        let queue = TaskQueue::create(&temp.path().join("tasks.json")).expect("create");
        (temp, queue)
    }

    #[test]
    fn fifo_dequeue_persists_in_progress() {
        let (temp, mut q) = queue();
        let first = q.enqueue("first", "2026-01-01T00:00:00Z", None).expect("enqueue");
        q.enqueue("second", "2026-01-01T00:00:01Z", None).expect("enqueue");

        let task = q.dequeue_oldest_pending().expect("dequeue").expect("task");
        assert_eq!(task.id, first);

        let reloaded = TaskQueue::load(&temp.path().join("tasks.json")).expect("load");
        assert_eq!(reloaded.get(first).map(|t| t.status), Some(TaskStatus::InProgress));
    }

    #[test]
    fn requeue_past_cap_excludes_task_from_dequeue() {
        let (_temp, mut q) = queue();
        let id = q.enqueue("flaky", "t", None).expect("enqueue");
        for _ in 0..3 {
            q.dequeue_oldest_pending().expect("dequeue").expect("task");
            assert!(matches!(
                q.requeue_with_backoff(id, 3).expect("requeue"),
                Requeue::Pending { .. }
            ));
        }
        q.dequeue_oldest_pending().expect("dequeue").expect("task");
        assert_eq!(
            q.requeue_with_backoff(id, 3).expect("requeue"),
            Requeue::Stuck { attempts: 4 }
        );
        assert!(q.dequeue_oldest_pending().expect("dequeue").is_none());
        assert_eq!(q.list_stuck().len(), 1);
    }

    #[test]
    fn reclaim_persists_the_counted_attempt() {
        let (temp, mut q) = queue();
        let id = q.enqueue("crashy", "t", None).expect("enqueue");
        q.dequeue_oldest_pending().expect("dequeue").expect("task");

        let reclaimed = q.reclaim_in_progress(3).expect("reclaim");
        assert_eq!(reclaimed, vec![(id, Requeue::Pending { attempts: 1 })]);
        assert!(q.reclaim_in_progress(3).expect("reclaim again").is_empty());

        let reloaded = TaskQueue::load(&temp.path().join("tasks.json")).expect("load");
        let task = reloaded.get(id).expect("task");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempts, 1);
    }

    #[test]
    fn unknown_ids_are_invariant_violations() {
        let (_temp, mut q) = queue();
        let err = q.mark_done(99).unwrap_err();
        assert!(err.downcast_ref::<InvariantViolation>().is_some());
    }

    #[test]
    fn rejections_accumulate_until_done() {
        let (_temp, mut q) = queue();
        let id = q.enqueue("x", "t", None).expect("enqueue");
        assert_eq!(q.record_rejection(id).expect("reject"), 1);
        assert_eq!(q.record_rejection(id).expect("reject"), 2);
        q.mark_done(id).expect("done");
        assert_eq!(q.get(id).map(|t| t.consecutive_rejections), Some(0));
    }
}
