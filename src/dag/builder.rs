//! Dependency graph validation for task manifests.
//!
//! A manifest is accepted only if every id is unique, every dependency names
//! a task in the manifest, and the dependency relation is acyclic.

use crate::state::task::Task;
use anyhow::{Result, bail};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Collects the tasks of a plan and checks them as one graph.
pub struct GraphBuilder<'a> {
    tasks: Vec<&'a Task>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        Self {
            tasks: tasks.into_iter().collect(),
        }
    }

    /// Check a delta plan against the manifest it will be appended to.
    ///
    /// The delta may depend on existing tasks but must not reuse their ids.
    pub fn for_delta(existing: &'a [Task], delta: &'a [Task]) -> Result<Self> {
        let known: HashSet<&str> = existing.iter().map(|t| t.id.as_str()).collect();
        for task in delta {
            if known.contains(task.id.as_str()) {
                bail!(
                    "Delta task '{}' reuses the id of an existing task",
                    task.id
                );
            }
        }
        Ok(Self::new(existing.iter().chain(delta.iter())))
    }

    /// Reject duplicate ids, unknown dependencies and cycles.
    pub fn validate(self) -> Result<()> {
        let mut index_map = HashMap::new();
        for (i, task) in self.tasks.iter().enumerate() {
            if index_map.insert(task.id.as_str(), i).is_some() {
                bail!("Duplicate task id: {}", task.id);
            }
        }

        // index -> tasks that depend on it
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.tasks.len()];
        let mut in_degree: Vec<usize> = vec![0; self.tasks.len()];

        for (to_idx, task) in self.tasks.iter().enumerate() {
            for dep in &task.depends_on {
                let from_idx = *index_map.get(dep.as_str()).ok_or_else(|| {
                    anyhow::anyhow!(
                        "Unknown dependency '{}' in task '{}': no task with that id exists",
                        dep,
                        task.id
                    )
                })?;
                if from_idx == to_idx {
                    bail!("Task '{}' depends on itself", task.id);
                }
                dependents[from_idx].push(to_idx);
                in_degree[to_idx] += 1;
            }
        }

        // Kahn's algorithm; whatever never reaches in-degree zero is on a cycle.
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();
        let mut ordered = HashSet::with_capacity(self.tasks.len());
        while let Some(node) = ready.pop_first() {
            ordered.insert(node);
            for &dependent in &dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if ordered.len() != self.tasks.len() {
            let cycle_tasks: Vec<&str> = self
                .tasks
                .iter()
                .enumerate()
                .filter(|(i, _)| !ordered.contains(i))
                .map(|(_, t)| t.id.as_str())
                .collect();
            bail!(
                "Cycle detected in task dependencies. Involved tasks: {:?}",
                cycle_tasks
            );
        }
        Ok(())
    }
}
