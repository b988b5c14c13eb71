use ulid::Ulid;

use crate::model::AppointmentStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    WrongClientRole(Ulid),
    WrongStaffRole(Ulid),
    /// Outside working hours, or the staff availability flag is off.
    StaffNotAvailable(Ulid),
    ServiceNotAvailable(Ulid),
    StaffNotContainingService {
        staff_id: Ulid,
        service_id: Ulid,
    },
    WorkSpaceNotAvailable {
        workspace_id: Ulid,
        available_slots: u32,
    },
    AppointmentOverlap {
        participant_id: Ulid,
        conflicting: Ulid,
    },
    IllegalStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    /// Completed or canceled appointments cannot be rescheduled.
    AppointmentClosed(Ulid),
    InvalidEntity(&'static str),
    LimitExceeded(&'static str),
    /// The lane set kept changing while locking.
    Contention,
    WalError(String),
}

impl EngineError {
    /// Stable machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::WrongClientRole(_) => "wrong_client_role",
            EngineError::WrongStaffRole(_) => "wrong_staff_role",
            EngineError::StaffNotAvailable(_) => "staff_not_available",
            EngineError::ServiceNotAvailable(_) => "service_not_available",
            EngineError::StaffNotContainingService { .. } => "staff_not_containing_service",
            EngineError::WorkSpaceNotAvailable { .. } => "workspace_not_available",
            EngineError::AppointmentOverlap { .. } => "appointment_overlap",
            EngineError::IllegalStatusTransition { .. } => "illegal_status_transition",
            EngineError::AppointmentClosed(_) => "appointment_closed",
            EngineError::InvalidEntity(_) => "invalid_entity",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Contention => "contention",
            EngineError::WalError(_) => "wal_error",
        }
    }

    /// Only persistence-side failures are worth re-running; every other
    /// variant is deterministic for the same input and committed state.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::WalError(_) | EngineError::Contention)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::WrongClientRole(id) => write!(f, "user {id} is not a client"),
            EngineError::WrongStaffRole(id) => write!(f, "user {id} cannot act as staff"),
            EngineError::StaffNotAvailable(id) => write!(f, "staff {id} not available"),
            EngineError::ServiceNotAvailable(id) => write!(f, "service {id} not available"),
            EngineError::StaffNotContainingService {
                staff_id,
                service_id,
            } => write!(f, "staff {staff_id} does not perform service {service_id}"),
            EngineError::WorkSpaceNotAvailable {
                workspace_id,
                available_slots,
            } => write!(
                f,
                "workspace {workspace_id} full: all {available_slots} slots occupied"
            ),
            EngineError::AppointmentOverlap {
                participant_id,
                conflicting,
            } => write!(
                f,
                "participant {participant_id} already booked by appointment {conflicting}"
            ),
            EngineError::IllegalStatusTransition { from, to } => write!(
                f,
                "illegal status transition: {} -> {}",
                from.as_str(),
                to.as_str()
            ),
            EngineError::AppointmentClosed(id) => write!(f, "appointment {id} is closed"),
            EngineError::InvalidEntity(msg) => write!(f, "invalid entity: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Contention => write!(f, "lane set changed while locking"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
