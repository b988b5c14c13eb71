//! Cascading cancellation.
//!
//! Administrative changes that take a service or a staff member out of
//! circulation raise a [`DomainEvent`]. The handler cancels every active
//! appointment the event affects, one lifecycle transition each, inside the
//! unit of work that made the change.

use ulid::Ulid;

use crate::model::*;

use super::unit_of_work::{LanePlan, UnitOfWork};
use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainEvent {
    ServiceAvailabilityRevoked { service_id: Ulid, workspace_id: Ulid },
    StaffAvailabilityRevoked { staff_id: Ulid },
    StaffUnassigned { staff_id: Ulid, service_id: Ulid },
    ServiceDeleted { service_id: Ulid, workspace_id: Ulid },
    UserDeleted { user_id: Ulid },
}

impl DomainEvent {
    /// Only a true→false flip of a service's availability cascades.
    pub fn service_availability_change(service: &Service, available: bool) -> Option<Self> {
        (service.available && !available).then_some(DomainEvent::ServiceAvailabilityRevoked {
            service_id: service.id,
            workspace_id: service.workspace_id,
        })
    }

    /// Only a true→false flip of a staff member's availability cascades.
    pub fn staff_availability_change(staff_id: Ulid, before: bool, after: bool) -> Option<Self> {
        (before && !after).then_some(DomainEvent::StaffAvailabilityRevoked { staff_id })
    }

    pub fn label(&self) -> &'static str {
        match self {
            DomainEvent::ServiceAvailabilityRevoked { .. } => "service_availability_revoked",
            DomainEvent::StaffAvailabilityRevoked { .. } => "staff_availability_revoked",
            DomainEvent::StaffUnassigned { .. } => "staff_unassigned",
            DomainEvent::ServiceDeleted { .. } => "service_deleted",
            DomainEvent::UserDeleted { .. } => "user_deleted",
        }
    }

    /// The lane whose timeline lists every affected appointment.
    pub fn source(&self) -> LanePlan {
        match self {
            DomainEvent::ServiceAvailabilityRevoked { workspace_id, .. }
            | DomainEvent::ServiceDeleted { workspace_id, .. } => LanePlan::new().workspace(*workspace_id),
            DomainEvent::StaffAvailabilityRevoked { staff_id }
            | DomainEvent::StaffUnassigned { staff_id, .. } => LanePlan::new().participant(*staff_id),
            DomainEvent::UserDeleted { user_id } => LanePlan::new().participant(*user_id),
        }
    }

    /// Active appointments this event cancels, read from the locked source lane.
    pub fn affected(&self, uow: &UnitOfWork<'_>) -> Result<Vec<Slot>, EngineError> {
        let slots = match self {
            DomainEvent::ServiceAvailabilityRevoked {
                service_id,
                workspace_id,
            }
            | DomainEvent::ServiceDeleted {
                service_id,
                workspace_id,
            } => uow
                .workspace(workspace_id)?
                .timeline
                .iter()
                .filter(|s| s.service_id == *service_id)
                .copied()
                .collect(),
            DomainEvent::StaffAvailabilityRevoked { staff_id } => {
                uow.participant(staff_id)?.timeline.iter().copied().collect()
            }
            DomainEvent::StaffUnassigned {
                staff_id,
                service_id,
            } => uow
                .participant(staff_id)?
                .timeline
                .iter()
                .filter(|s| s.service_id == *service_id)
                .copied()
                .collect(),
            DomainEvent::UserDeleted { user_id } => {
                uow.participant(user_id)?.timeline.iter().copied().collect()
            }
        };
        Ok(slots)
    }

    /// Source lane plus every lane of every affected appointment.
    pub fn plan(&self, uow: &UnitOfWork<'_>) -> Result<LanePlan, EngineError> {
        let mut plan = self.source();
        for slot in self.affected(uow)? {
            plan = plan.slot(&slot);
        }
        Ok(plan)
    }
}

/// Stage a cancellation for every appointment `event` affects.
/// Returns how many were canceled.
pub fn handle(uow: &mut UnitOfWork<'_>, event: DomainEvent) -> Result<usize, EngineError> {
    let affected = event.affected(uow)?;
    for slot in &affected {
        let appointment = uow.appointment(&slot.id)?;
        uow.stage_transition(&appointment, AppointmentStatus::Canceled)?;
    }
    Ok(affected.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(available: bool) -> Service {
        Service {
            id: Ulid::new(),
            workspace_id: Ulid::new(),
            name: None,
            duration: 3_600_000,
            price: 0,
            available,
        }
    }

    #[test]
    fn service_revocation_only_on_true_to_false() {
        assert!(DomainEvent::service_availability_change(&service(true), false).is_some());
        assert!(DomainEvent::service_availability_change(&service(true), true).is_none());
        assert!(DomainEvent::service_availability_change(&service(false), false).is_none());
        assert!(DomainEvent::service_availability_change(&service(false), true).is_none());
    }

    #[test]
    fn staff_revocation_only_on_true_to_false() {
        let id = Ulid::new();
        assert_eq!(
            DomainEvent::staff_availability_change(id, true, false),
            Some(DomainEvent::StaffAvailabilityRevoked { staff_id: id })
        );
        assert!(DomainEvent::staff_availability_change(id, false, false).is_none());
        assert!(DomainEvent::staff_availability_change(id, false, true).is_none());
    }

    #[test]
    fn source_lane_matches_trigger() {
        let ws = Ulid::new();
        let svc = Ulid::new();
        let staff = Ulid::new();
        assert_eq!(
            DomainEvent::ServiceDeleted {
                service_id: svc,
                workspace_id: ws
            }
            .source(),
            LanePlan::new().workspace(ws)
        );
        assert_eq!(
            DomainEvent::StaffUnassigned {
                staff_id: staff,
                service_id: svc
            }
            .source(),
            LanePlan::new().participant(staff)
        );
    }
}
