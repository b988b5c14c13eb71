use ulid::Ulid;

use crate::model::*;

use super::conflict::{count_in_workspace, exists_overlapping};
use super::{Engine, EngineError};

/// Counts reported at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Summary {
    pub users: usize,
    pub workspaces: usize,
    pub services: usize,
    pub appointments: usize,
    /// NOT_APPROVED or APPROVED.
    pub active: usize,
}

impl Engine {
    pub fn appointment(&self, id: &Ulid) -> Result<Appointment, EngineError> {
        self.store.appointment(id).ok_or(EngineError::NotFound(*id))
    }

    /// Every appointment where `id` is the client or the staff member,
    /// ordered by start. History survives deletion of the user.
    pub fn appointments_for_participant(&self, id: &Ulid) -> Result<Vec<Appointment>, EngineError> {
        let found = self.store.history(id);
        if found.is_empty() && !self.store.contains_participant(id) {
            return Err(EngineError::NotFound(*id));
        }
        Ok(found)
    }

    pub fn appointments_for_service(&self, id: &Ulid) -> Result<Vec<Appointment>, EngineError> {
        let found = self.store.history(id);
        if found.is_empty() && self.store.workspace_of_service(id).is_none() {
            return Err(EngineError::NotFound(*id));
        }
        Ok(found)
    }

    pub async fn staff_stats(&self, id: &Ulid) -> Result<StaffStats, EngineError> {
        let lane = self.store.participant(id).ok_or(EngineError::NotFound(*id))?;
        let guard = lane.read().await;
        let profile = guard.user.staff.as_ref().ok_or(EngineError::WrongStaffRole(*id))?;
        Ok(StaffStats {
            staff_id: *id,
            profit: profile.profit,
            completed: profile.completed,
        })
    }

    pub async fn user(&self, id: &Ulid) -> Result<User, EngineError> {
        let lane = self.store.participant(id).ok_or(EngineError::NotFound(*id))?;
        let guard = lane.read().await;
        Ok(guard.user.clone())
    }

    pub async fn service(&self, id: &Ulid) -> Result<Service, EngineError> {
        let workspace_id = self
            .store
            .workspace_of_service(id)
            .ok_or(EngineError::NotFound(*id))?;
        let lane = self
            .store
            .workspace(&workspace_id)
            .ok_or(EngineError::NotFound(workspace_id))?;
        let guard = lane.read().await;
        guard.services.get(id).cloned().ok_or(EngineError::NotFound(*id))
    }

    pub async fn workspace(&self, id: &Ulid) -> Result<Workspace, EngineError> {
        let lane = self.store.workspace(id).ok_or(EngineError::NotFound(*id))?;
        let guard = lane.read().await;
        Ok(guard.workspace.clone())
    }

    /// Whether `participant` (as client or staff) has an active appointment
    /// colliding with `window`, ignoring `exclude`.
    pub async fn exists_overlapping_appointment(
        &self,
        participant: &Ulid,
        window: &Window,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let lane = self
            .store
            .participant(participant)
            .ok_or(EngineError::NotFound(*participant))?;
        let guard = lane.read().await;
        Ok(exists_overlapping(&guard.timeline, window, exclude))
    }

    /// Active appointments in `workspace` colliding with `window`.
    pub async fn count_appointments_in_workspace(
        &self,
        workspace: &Ulid,
        window: &Window,
    ) -> Result<usize, EngineError> {
        let lane = self
            .store
            .workspace(workspace)
            .ok_or(EngineError::NotFound(*workspace))?;
        let guard = lane.read().await;
        Ok(count_in_workspace(&guard.timeline, window, None))
    }

    pub async fn summary(&self) -> Summary {
        let mut active = 0;
        for lane in self.store.workspace_lanes() {
            active += lane.read().await.timeline.len();
        }
        Summary {
            users: self.store.participant_count(),
            workspaces: self.store.workspace_count(),
            services: self.store.service_count(),
            appointments: self.store.appointment_count(),
            active,
        }
    }
}
