//! Rollout bookkeeping for a provisioning backend.
//!
//! Tracks each planned resource through `InStage(n) -> Materialized`. A
//! stage opens only once every resource of the stages before it has been
//! reported materialized.

use crate::planner::{PlacementState, ProvisioningPlan};
use indexmap::IndexMap;
use strata_core::{CoreError, CoreResult, ResourceId};
use tracing::debug;

/// Materialization progress over a plan
#[derive(Debug, Clone)]
pub struct Rollout {
    states: IndexMap<ResourceId, PlacementState>,
    pending: Vec<usize>,
    current: usize,
}

impl Rollout {
    /// Start tracking `plan`, every resource in its stage
    #[must_use]
    pub fn new(plan: &ProvisioningPlan) -> Self {
        let states = plan
            .stages
            .iter()
            .flat_map(|stage| {
                stage
                    .ids()
                    .map(move |id| (id.clone(), PlacementState::InStage(stage.index)))
            })
            .collect();
        let pending = plan.stages.iter().map(|s| s.resources.len()).collect();
        let mut rollout = Self {
            states,
            pending,
            current: 0,
        };
        rollout.advance();
        rollout
    }

    /// Stage currently open, `None` once everything is materialized
    #[must_use]
    pub fn current_stage(&self) -> Option<usize> {
        (self.current < self.pending.len()).then_some(self.current)
    }

    /// Resources of the open stage still waiting to be materialized
    #[must_use]
    pub fn ready(&self) -> Vec<&ResourceId> {
        self.states
            .iter()
            .filter(|(_, state)| **state == PlacementState::InStage(self.current))
            .map(|(id, _)| id)
            .collect()
    }

    /// State of one resource
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if `id` is not part of the plan
    pub fn state(&self, id: &str) -> CoreResult<PlacementState> {
        self.states
            .get(id)
            .copied()
            .ok_or_else(|| CoreError::unknown_resource(id, "rollout lookup"))
    }

    /// Record that the backend materialized `id`
    ///
    /// # Errors
    ///
    /// Returns `UnknownResource` if `id` is not part of the plan and
    /// `InvalidTransition` if it is already materialized or its stage is not
    /// open yet
    pub fn mark_materialized(&mut self, id: &str) -> CoreResult<()> {
        let current = self.current;
        let (_, key, state) = self
            .states
            .get_full_mut(id)
            .ok_or_else(|| CoreError::unknown_resource(id, "rollout transition"))?;
        match *state {
            PlacementState::Materialized => {
                return Err(CoreError::InvalidTransition {
                    id: key.clone(),
                    reason: "already materialized".to_string(),
                });
            }
            PlacementState::Unvisited => {
                return Err(CoreError::InvalidTransition {
                    id: key.clone(),
                    reason: "not placed in any stage".to_string(),
                });
            }
            PlacementState::InStage(stage) if stage > current => {
                return Err(CoreError::InvalidTransition {
                    id: key.clone(),
                    reason: format!("stage {stage} is not open (current stage is {current})"),
                });
            }
            PlacementState::InStage(stage) => {
                *state = PlacementState::Materialized;
                if let Some(left) = self.pending.get_mut(stage) {
                    *left = left.saturating_sub(1);
                }
            }
        }
        debug!(resource = %id, stage = current, "materialized");
        self.advance();
        Ok(())
    }

    /// Check if every resource is materialized
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.states
            .values()
            .all(|state| *state == PlacementState::Materialized)
    }

    fn advance(&mut self) {
        while self.pending.get(self.current) == Some(&0) {
            self.current += 1;
        }
    }
}
