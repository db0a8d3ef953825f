//! Task table for registered tasks.
//!
//! Registration is liveness: a task is alive exactly as long as it has a
//! record here. Closing a task removes its record, after which every lookup
//! by its id misses.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};

use crate::runtime::flatten::Flattener;
use crate::sync::{Event, Timeout};
use crate::types::TaskId;

/// Per-task local storage.
pub(crate) type Locals = HashMap<String, Box<dyn Any>>;

/// Scheduler-side state for one task.
pub(crate) struct TaskRecord {
    pub(crate) id: TaskId,
    pub(crate) name: Option<String>,
    /// The flattened continuation. Taken out while the task is stepping.
    pub(crate) chain: Option<Flattener>,
    /// Fired timeout marker, consumed by the timeout query.
    pub(crate) timeout: Option<Timeout>,
    /// Completion notifier, created on first join or close callback.
    pub(crate) notifier: Option<Event<TaskId>>,
    /// Task locals, created on first write.
    pub(crate) locals: Option<Locals>,
    /// Number of times the chain has been taken out for a step.
    pub(crate) steps: u64,
}

impl TaskRecord {
    pub(crate) fn new(id: TaskId, name: Option<String>, chain: Flattener) -> Self {
        Self {
            id,
            name,
            chain: Some(chain),
            timeout: None,
            notifier: None,
            locals: None,
            steps: 0,
        }
    }
}

impl std::fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("stepping", &self.chain.is_none())
            .field("timed_out", &self.timeout.is_some())
            .field("has_notifier", &self.notifier.is_some())
            .field("steps", &self.steps)
            .finish()
    }
}

/// Registry of live tasks, keyed by id.
#[derive(Debug)]
pub(crate) struct TaskTable {
    tasks: BTreeMap<TaskId, TaskRecord>,
    next_id: u64,
}

impl TaskTable {
    /// Creates a new empty task table.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Allocates a fresh id and inserts the record built for it.
    pub(crate) fn insert_with<F>(&mut self, f: F) -> TaskId
    where
        F: FnOnce(TaskId) -> TaskRecord,
    {
        let id = TaskId::new(self.next_id);
        self.next_id += 1;
        let record = f(id);
        debug_assert_eq!(record.id, id);
        self.tasks.insert(id, record);
        id
    }

    /// Returns a reference to a task record by ID.
    #[inline]
    #[must_use]
    pub(crate) fn task(&self, task_id: TaskId) -> Option<&TaskRecord> {
        self.tasks.get(&task_id)
    }

    /// Returns a mutable reference to a task record by ID.
    #[inline]
    pub(crate) fn task_mut(&mut self, task_id: TaskId) -> Option<&mut TaskRecord> {
        self.tasks.get_mut(&task_id)
    }

    /// Removes a task record.
    pub(crate) fn remove(&mut self, task_id: TaskId) -> Option<TaskRecord> {
        self.tasks.remove(&task_id)
    }

    #[must_use]
    pub(crate) fn contains(&self, task_id: TaskId) -> bool {
        self.tasks.contains_key(&task_id)
    }

    /// Returns the number of live tasks.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Takes the continuation out for stepping and counts the step.
    pub(crate) fn take_chain(&mut self, task_id: TaskId) -> Option<Flattener> {
        let record = self.tasks.get_mut(&task_id)?;
        let chain = record.chain.take()?;
        record.steps += 1;
        Some(chain)
    }

    /// Puts a continuation back after a step.
    ///
    /// Returns the chain if the task closed while it was out.
    pub(crate) fn restore_chain(&mut self, task_id: TaskId, chain: Flattener) -> Option<Flattener> {
        match self.tasks.get_mut(&task_id) {
            Some(record) => {
                record.chain = Some(chain);
                None
            }
            None => Some(chain),
        }
    }
}
