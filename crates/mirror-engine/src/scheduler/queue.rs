//! Task queue: download tasks in submission order plus their status.
//!
//! Owned by the scheduler's coordinator only; nothing here is shared
//! between tasks, so no locking.

use crate::types::{DownloadTask, TaskStatus};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
pub struct TaskQueue {
    items: HashMap<usize, DownloadTask>,
    order: VecDeque<usize>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, mut task: DownloadTask) {
        task.status = TaskStatus::Queued;
        self.order.push_back(task.id);
        self.items.insert(task.id, task);
    }

    /// Take the next queued task and mark it active.
    pub fn next_pending(&mut self) -> Option<DownloadTask> {
        while let Some(id) = self.order.pop_front() {
            if let Some(item) = self.items.get_mut(&id) {
                if item.status == TaskStatus::Queued {
                    item.status = TaskStatus::Active;
                    return Some(item.clone());
                }
            }
        }
        None
    }

    /// Put an active task back at the head of the queue.
    pub fn requeue(&mut self, id: usize) {
        if let Some(item) = self.items.get_mut(&id) {
            item.status = TaskStatus::Queued;
            self.order.push_front(id);
        }
    }

    pub fn mark_done(&mut self, id: usize) {
        self.set_status(id, TaskStatus::Done);
    }

    pub fn mark_failed(&mut self, id: usize) {
        self.set_status(id, TaskStatus::Failed);
    }

    fn set_status(&mut self, id: usize, status: TaskStatus) {
        if let Some(item) = self.items.get_mut(&id) {
            item.status = status;
        }
    }

    fn count(&self, status: TaskStatus) -> usize {
        self.items.values().filter(|t| t.status == status).count()
    }

    pub fn has_pending(&self) -> bool {
        self.items.values().any(|t| t.status == TaskStatus::Queued)
    }

    pub fn active(&self) -> usize {
        self.count(TaskStatus::Active)
    }

    /// Nothing queued and nothing in flight.
    pub fn is_drained(&self) -> bool {
        !self
            .items
            .values()
            .any(|t| matches!(t.status, TaskStatus::Queued | TaskStatus::Active))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
