//! Deterministic task selection and lifecycle transitions.

use crate::core::types::{Task, TaskId, TaskStatus};

/// Oldest pending task: earliest `created_at`, ties broken by smallest id.
pub fn oldest_pending(tasks: &[Task]) -> Option<&Task> {
    tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Pending)
        .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
}

/// Result of requeueing a task after a failed iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    Pending { attempts: u32 },
    Stuck { attempts: u32 },
}

/// Increment attempts and return the task to `pending`, or archive it as
/// `stuck` once attempts exceed `attempt_cap`.
pub fn requeue_with_backoff(task: &mut Task, attempt_cap: u32) -> Requeue {
    task.attempts += 1;
    if task.attempts > attempt_cap {
        task.status = TaskStatus::Stuck;
        Requeue::Stuck {
            attempts: task.attempts,
        }
    } else {
        task.status = TaskStatus::Pending;
        Requeue::Pending {
            attempts: task.attempts,
        }
    }
}

/// Requeue `in_progress` tasks left behind by an interrupted invocation. The
/// interruption counts as an attempt, so a task that keeps killing the
/// process ends up `stuck`.
pub fn reclaim_in_progress(tasks: &mut [Task], attempt_cap: u32) -> Vec<(TaskId, Requeue)> {
    tasks
        .iter_mut()
        .filter(|task| task.status == TaskStatus::InProgress)
        .map(|task| (task.id, requeue_with_backoff(task, attempt_cap)))
        .collect()
}

pub fn stuck(tasks: &[Task]) -> impl Iterator<Item = &Task> {
    tasks.iter().filter(|task| task.status == TaskStatus::Stuck)
}

/// Next id: one past the largest id ever issued. Ids are never reused.
pub fn next_task_id(tasks: &[Task]) -> TaskId {
    tasks.iter().map(|task| task.id).max().map_or(1, |max| max + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: TaskId, created_at: &str, status: TaskStatus) -> Task {
        Task {
            id,
            description: format!("task {id}"),
            status,
            attempts: 0,
            created_at: created_at.to_string(),
            consecutive_rejections: 0,
            remediates: None,
        }
    }

    #[test]
    fn oldest_pending_breaks_ties_by_id() {
        let tasks = vec![
            task(3, "2026-01-01T00:00:00Z", TaskStatus::Pending),
            task(2, "2026-01-01T00:00:00Z", TaskStatus::Pending),
            task(1, "2025-12-31T00:00:00Z", TaskStatus::Done),
            task(4, "2026-01-02T00:00:00Z", TaskStatus::Pending),
        ];
        assert_eq!(oldest_pending(&tasks).map(|t| t.id), Some(2));
    }

    #[test]
    fn stuck_tasks_are_never_selected() {
        let tasks = vec![task(1, "2026-01-01T00:00:00Z", TaskStatus::Stuck)];
        assert!(oldest_pending(&tasks).is_none());
        assert_eq!(stuck(&tasks).count(), 1);
    }

    #[test]
    fn requeue_past_cap_marks_stuck() {
        let mut t = task(1, "2026-01-01T00:00:00Z", TaskStatus::InProgress);
        for expected in 1..=3 {
            assert_eq!(
                requeue_with_backoff(&mut t, 3),
                Requeue::Pending { attempts: expected }
            );
        }
        assert_eq!(requeue_with_backoff(&mut t, 3), Requeue::Stuck { attempts: 4 });
        assert_eq!(t.status, TaskStatus::Stuck);
    }

    #[test]
    fn reclaim_only_touches_in_progress() {
        let mut tasks = vec![
            task(1, "a", TaskStatus::InProgress),
            task(2, "b", TaskStatus::Done),
        ];
        assert_eq!(
            reclaim_in_progress(&mut tasks, 3),
            vec![(1, Requeue::Pending { attempts: 1 })]
        );
        assert_eq!(tasks[0].status, TaskStatus::Pending);
        assert_eq!(tasks[1].status, TaskStatus::Done);
    }

    #[test]
    fn reclaim_counts_the_interruption_against_the_cap() {
        let mut tasks = vec![task(1, "a", TaskStatus::InProgress)];
        tasks[0].attempts = 3;
        assert_eq!(
            reclaim_in_progress(&mut tasks, 3),
            vec![(1, Requeue::Stuck { attempts: 4 })]
        );
        assert_eq!(tasks[0].status, TaskStatus::Stuck);
    }

    #[test]
    fn next_id_is_one_past_max() {
        assert_eq!(next_task_id(&[]), 1);
        let tasks = vec![task(7, "a", TaskStatus::Done), task(3, "b", TaskStatus::Pending)];
        assert_eq!(next_task_id(&tasks), 8);
    }
}
