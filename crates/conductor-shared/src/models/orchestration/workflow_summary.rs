//! Task workflow summary: graph-shape view over the readiness rows.
//!
//! Answers "what is blocked, on what" plus structural measures (depth,
//! branch width) cheaply: one readiness query and one edge query.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::step_readiness::StepReadinessStatus;

/// A step that cannot run right now, with the reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedStep {
    pub workflow_step_id: i64,
    pub name: String,
    pub reason: String,
}

/// How much parallel dispatch the graph offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelismPotential {
    NoParallelism,
    /// Graph has parallel branches, but at most one step is executable now
    LimitedParallelism,
    ModerateParallelism,
    HighParallelism,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskWorkflowSummary {
    pub task_id: i64,
    pub total_steps: i64,
    pub root_step_ids: Vec<i64>,
    pub leaf_step_ids: Vec<i64>,
    pub next_executable_step_ids: Vec<i64>,
    pub blocked_steps: Vec<BlockedStep>,
    pub max_dependency_depth: i32,
    /// Widest set of steps sharing one dependency level
    pub parallel_branch_count: i64,
    /// Fraction of the graph currently unblocked (complete, running, or ready)
    pub workflow_efficiency: f64,
    pub parallelism_potential: ParallelismPotential,
}

impl TaskWorkflowSummary {
    /// Build the summary from readiness rows and the task's edge list
    /// (`(from_step_id, to_step_id)` pairs).
    pub fn build(
        task_id: i64,
        readiness: &[StepReadinessStatus],
        edges: &[(i64, i64)],
    ) -> Self {
        let step_ids: Vec<i64> = readiness.iter().map(|r| r.workflow_step_id).collect();

        let mut parents: HashMap<i64, Vec<i64>> = HashMap::new();
        let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
        for &(from, to) in edges {
            parents.entry(to).or_default().push(from);
            children.entry(from).or_default().push(to);
        }

        let root_step_ids: Vec<i64> = step_ids
            .iter()
            .copied()
            .filter(|id| !parents.contains_key(id))
            .collect();
        let leaf_step_ids: Vec<i64> = step_ids
            .iter()
            .copied()
            .filter(|id| !children.contains_key(id))
            .collect();

        let levels = dependency_levels(&step_ids, &parents);
        let max_dependency_depth = levels.values().copied().max().unwrap_or(0);

        let mut width_by_level: HashMap<i32, i64> = HashMap::new();
        for level in levels.values() {
            *width_by_level.entry(*level).or_insert(0) += 1;
        }
        let parallel_branch_count = width_by_level.values().copied().max().unwrap_or(0);

        let next_executable_step_ids: Vec<i64> = readiness
            .iter()
            .filter(|r| r.ready_for_execution)
            .map(|r| r.workflow_step_id)
            .collect();

        let blocked_steps: Vec<BlockedStep> = readiness
            .iter()
            .filter(|r| !r.ready_for_execution && !r.processed)
            .filter_map(|r| {
                r.blocking_reason().map(|reason| BlockedStep {
                    workflow_step_id: r.workflow_step_id,
                    name: r.name.clone(),
                    reason: reason.to_string(),
                })
            })
            .collect();

        let total_steps = readiness.len() as i64;
        let unblocked = readiness
            .iter()
            .filter(|r| {
                r.processed || r.current_state == "in_progress" || r.ready_for_execution
            })
            .count() as f64;
        let workflow_efficiency = if total_steps == 0 {
            0.0
        } else {
            unblocked / total_steps as f64
        };

        let executable_now = next_executable_step_ids.len() as i64;
        let parallelism_potential = match (parallel_branch_count, executable_now) {
            (0..=1, _) => ParallelismPotential::NoParallelism,
            (_, 0..=1) => ParallelismPotential::LimitedParallelism,
            (2..=3, _) => ParallelismPotential::ModerateParallelism,
            _ => ParallelismPotential::HighParallelism,
        };

        Self {
            task_id,
            total_steps,
            root_step_ids,
            leaf_step_ids,
            next_executable_step_ids,
            blocked_steps,
            max_dependency_depth,
            parallel_branch_count,
            workflow_efficiency,
            parallelism_potential,
        }
    }
}

/// Longest-path depth per step (roots are level 0). Steps on a cycle keep
/// their last assigned level; cycles are rejected at task creation so this
/// is a safety valve, not a code path.
pub fn dependency_levels(step_ids: &[i64], parents: &HashMap<i64, Vec<i64>>) -> HashMap<i64, i32> {
    let mut levels: HashMap<i64, i32> = HashMap::new();
    for &id in step_ids {
        if !parents.contains_key(&id) {
            levels.insert(id, 0);
        }
    }

    let mut changed = true;
    let mut rounds = 0;
    while changed && rounds <= step_ids.len() {
        changed = false;
        rounds += 1;
        for &id in step_ids {
            if let Some(step_parents) = parents.get(&id) {
                let max_parent = step_parents
                    .iter()
                    .filter_map(|p| levels.get(p))
                    .copied()
                    .max();
                if let Some(max_parent) = max_parent {
                    let candidate = max_parent + 1;
                    if levels.get(&id) != Some(&candidate) {
                        levels.insert(id, candidate);
                        changed = true;
                    }
                }
            }
        }
    }
    levels
}
