//! Admission rules for a proposed booking.
//!
//! Checks run in a fixed order and the first failure wins:
//! role, working time, availability, service membership, workspace capacity,
//! participant overlap. The order only matters for which reason is reported.

use ulid::Ulid;

use crate::config::Policy;
use crate::model::*;

use super::conflict::{count_in_workspace, find_overlapping};
use super::EngineError;

/// Everything the validator looks at, read under the booking's locks.
pub struct Proposal<'a> {
    pub client: &'a ParticipantLane,
    pub staff: &'a ParticipantLane,
    pub service: &'a Service,
    pub workspace: &'a WorkspaceLane,
    pub window: Window,
    /// Set when moving an existing appointment so it does not collide with itself.
    pub exclude: Option<Ulid>,
}

pub fn validate(p: &Proposal<'_>, policy: &Policy) -> Result<(), EngineError> {
    let profile = check_roles(p, policy)?;
    check_working_time(p, profile, policy)?;
    check_availability(p, profile)?;
    check_membership(p, profile)?;
    check_capacity(p)?;
    check_overlap(p)
}

fn check_roles<'a>(p: &Proposal<'a>, policy: &Policy) -> Result<&'a StaffProfile, EngineError> {
    let client = &p.client.user;
    if client.role != Role::Client {
        return Err(EngineError::WrongClientRole(client.id));
    }
    let staff = &p.staff.user;
    let role_ok = match staff.role {
        Role::Employee => true,
        Role::Administrator => policy.role_check_includes_admin,
        Role::Client => false,
    };
    match (&staff.staff, role_ok) {
        (Some(profile), true) => Ok(profile),
        _ => Err(EngineError::WrongStaffRole(staff.id)),
    }
}

fn check_working_time(
    p: &Proposal<'_>,
    profile: &StaffProfile,
    policy: &Policy,
) -> Result<(), EngineError> {
    let staff_id = p.staff.user.id;
    let (Some(start), Some(end)) = (
        policy.time_of_day(p.window.start),
        policy.time_of_day(p.window.end),
    ) else {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    };
    if !profile.hours.admits(start, end) {
        return Err(EngineError::StaffNotAvailable(staff_id));
    }
    Ok(())
}

fn check_availability(p: &Proposal<'_>, profile: &StaffProfile) -> Result<(), EngineError> {
    if !profile.available {
        return Err(EngineError::StaffNotAvailable(p.staff.user.id));
    }
    if !p.service.available {
        return Err(EngineError::ServiceNotAvailable(p.service.id));
    }
    Ok(())
}

fn check_membership(p: &Proposal<'_>, profile: &StaffProfile) -> Result<(), EngineError> {
    if !profile.services.contains(&p.service.id) {
        return Err(EngineError::StaffNotContainingService {
            staff_id: p.staff.user.id,
            service_id: p.service.id,
        });
    }
    Ok(())
}

fn check_capacity(p: &Proposal<'_>) -> Result<(), EngineError> {
    let slots = p.workspace.workspace.available_slots;
    let running = count_in_workspace(&p.workspace.timeline, &p.window, p.exclude);
    if running >= slots as usize {
        return Err(EngineError::WorkSpaceNotAvailable {
            workspace_id: p.workspace.workspace.id,
            available_slots: slots,
        });
    }
    Ok(())
}

fn check_overlap(p: &Proposal<'_>) -> Result<(), EngineError> {
    for lane in [p.client, p.staff] {
        if let Some(slot) = find_overlapping(&lane.timeline, &p.window, p.exclude) {
            return Err(EngineError::AppointmentOverlap {
                participant_id: lane.user.id,
                conflicting: slot.id,
            });
        }
    }
    Ok(())
}
