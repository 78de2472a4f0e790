// Instance State Machine
// Status tracking for job instances, owned by the scheduler

use crate::error::{ServiceError, ServiceResult};

use serde::Serialize;

use std::fmt;

/// Lifecycle status of a job instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Succeeded
                | InstanceStatus::Failed
                | InstanceStatus::Skipped
                | InstanceStatus::Cancelled
        )
    }

    /// Forward-only transitions; terminal states never change
    pub fn can_transition_to(&self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;

        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Pending, Cancelled)
                | (Ready, Running)
                | (Ready, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Ready => "ready",
            InstanceStatus::Running => "running",
            InstanceStatus::Succeeded => "succeeded",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Skipped => "skipped",
            InstanceStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// State map of every instance in a run.
///
/// All mutation goes through [`RunState::transition`], so an illegal
/// transition surfaces as a scheduler error instead of corrupting state.
#[derive(Debug, Clone)]
pub struct RunState {
    statuses: Vec<InstanceStatus>,
}

impl RunState {
    pub fn new(instances: usize) -> Self {
        Self {
            statuses: vec![InstanceStatus::Pending; instances],
        }
    }

    pub fn status(&self, index: usize) -> Option<InstanceStatus> {
        self.statuses.get(index).copied()
    }

    pub fn transition(&mut self, index: usize, next: InstanceStatus) -> ServiceResult<()> {
        let current = self.statuses.get_mut(index).ok_or_else(|| {
            ServiceError::SchedulerInternal(format!("unknown job instance {}", index))
        })?;

        if !current.can_transition_to(next) {
            return Err(ServiceError::SchedulerInternal(format!(
                "illegal transition for job instance {}: {} -> {}",
                index, current, next
            )));
        }

        *current = next;
        Ok(())
    }

    /// Cancel every non-terminal instance, running ones included.
    ///
    /// Only used when the run is aborted by a scheduler error; returns the
    /// indices that changed.
    pub fn force_cancel_remaining(&mut self) -> Vec<usize> {
        let mut cancelled = Vec::new();
        for (index, status) in self.statuses.iter_mut().enumerate() {
            if !status.is_terminal() {
                *status = InstanceStatus::Cancelled;
                cancelled.push(index);
            }
        }
        cancelled
    }

    pub fn all_terminal(&self) -> bool {
        self.statuses.iter().all(InstanceStatus::is_terminal)
    }

    pub fn count(&self, status: InstanceStatus) -> usize {
        self.statuses.iter().filter(|s| **s == status).count()
    }

    /// Indices with the given status, ascending
    pub fn indices_with(&self, status: InstanceStatus) -> Vec<usize> {
        self.statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == status)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}
