//! Worker registrations and capacities.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::ulid_id;
use crate::task::TaskType;

ulid_id!(
    /// Unique identifier for a registered worker.
    WorkerId
);

/// Number of concurrent tasks of one type a worker accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub task_type: TaskType,
    pub slots: u32,
}

impl Capacity {
    pub fn new(task_type: TaskType, slots: u32) -> Self {
        Self { task_type, slots }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub capacities: Vec<Capacity>,
    pub registered_at: DateTime<Utc>,
}

impl Worker {
    pub fn new(name: impl Into<String>, capacities: Vec<Capacity>) -> Self {
        Self {
            id: WorkerId::new(),
            name: name.into(),
            capacities,
            registered_at: Utc::now(),
        }
    }

    /// Registered slots for a task type, summed over duplicate entries.
    pub fn slots_for(&self, task_type: TaskType) -> u32 {
        self.capacities
            .iter()
            .filter(|c| c.task_type == task_type)
            .map(|c| c.slots)
            .sum()
    }

    /// Capacities keyed by task type.
    pub fn capacity_map(&self) -> BTreeMap<TaskType, u32> {
        let mut map = BTreeMap::new();
        for capacity in &self.capacities {
            *map.entry(capacity.task_type).or_insert(0) += capacity.slots;
        }
        map
    }
}

/// Slots still free given the tasks of that type the worker is executing.
pub fn free_slots(registered: u32, executing: usize) -> usize {
    (registered as usize).saturating_sub(executing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_summed_per_type() {
        let worker = Worker::new(
            "w",
            vec![
                Capacity::new(TaskType::Transfer, 2),
                Capacity::new(TaskType::Hash, 4),
                Capacity::new(TaskType::Transfer, 1),
            ],
        );
        assert_eq!(worker.slots_for(TaskType::Transfer), 3);
        assert_eq!(worker.slots_for(TaskType::Delete), 0);
        assert_eq!(worker.capacity_map().len(), 2);
    }

    #[test]
    fn free_slots_never_underflow() {
        assert_eq!(free_slots(3, 1), 2);
        assert_eq!(free_slots(1, 4), 0);
    }
}
