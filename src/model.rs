use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Appointment interval `[start, end)`.
///
/// Collision is tested with inclusive boundaries: two windows that merely
/// touch (`a.end == b.start`) still collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Ms,
    pub end: Ms,
}

impl Window {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Window start must not be after end");
        Self { start, end }
    }

    /// `!(a.end < b.start) && !(a.start > b.end)`.
    pub fn collides(&self, other: &Window) -> bool {
        !(self.end < other.start) && !(self.start > other.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Client,
    Employee,
    Administrator,
}

impl Role {
    pub fn can_hold_staff_profile(self) -> bool {
        matches!(self, Role::Employee | Role::Administrator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    NotApproved,
    Approved,
    Completed,
    Canceled,
}

impl AppointmentStatus {
    /// Active appointments occupy a workspace slot and a participant's time.
    pub fn is_active(self) -> bool {
        matches!(self, AppointmentStatus::NotApproved | AppointmentStatus::Approved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::NotApproved => "not_approved",
            AppointmentStatus::Approved => "approved",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Canceled => "canceled",
        }
    }
}

/// Daily working window in the engine's local time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub begin: NaiveTime,
    pub end: NaiveTime,
}

impl WorkingHours {
    pub fn new(begin: NaiveTime, end: NaiveTime) -> Self {
        Self { begin, end }
    }

    /// Compares time-of-day only. A window crossing midnight is checked
    /// against the first day's hours and nothing else.
    pub fn admits(&self, start_of_day: NaiveTime, end_of_day: NaiveTime) -> bool {
        start_of_day >= self.begin && end_of_day <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffProfile {
    pub hours: WorkingHours,
    pub available: bool,
    pub services: BTreeSet<Ulid>,
    /// Accrued revenue in minor currency units.
    pub profit: u64,
    pub completed: u32,
}

impl StaffProfile {
    pub fn new(hours: WorkingHours) -> Self {
        Self {
            hours,
            available: true,
            services: BTreeSet::new(),
            profit: 0,
            completed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub name: Option<String>,
    pub role: Role,
    /// Present for employees and administrators, absent for clients.
    pub staff: Option<StaffProfile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Ulid,
    pub name: Option<String>,
    /// Max concurrently running appointments across all services here.
    pub available_slots: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub workspace_id: Ulid,
    pub name: Option<String>,
    pub duration: Ms,
    /// Price in minor currency units.
    pub price: u64,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub client_id: Ulid,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub workspace_id: Ulid,
    pub window: Window,
    pub status: AppointmentStatus,
    pub created_at: Ms,
}

/// An active appointment as seen from one lane's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub id: Ulid,
    pub window: Window,
    pub service_id: Ulid,
    pub client_id: Ulid,
    pub staff_id: Ulid,
    pub workspace_id: Ulid,
}

impl From<&Appointment> for Slot {
    fn from(a: &Appointment) -> Self {
        Self {
            id: a.id,
            window: a.window,
            service_id: a.service_id,
            client_id: a.client_id,
            staff_id: a.staff_id,
            workspace_id: a.workspace_id,
        }
    }
}

/// Active appointments of one lane, sorted by `window.start`.
///
/// Only NOT_APPROVED and APPROVED appointments live here; an appointment
/// leaves every timeline as soon as it is completed, canceled or removed.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    slots: Vec<Slot>,
}

impl Timeline {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    /// Insert slot maintaining sort order by window.start.
    pub fn insert(&mut self, slot: Slot) {
        let pos = self
            .slots
            .binary_search_by_key(&slot.window.start, |s| s.window.start)
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, slot);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Slot> {
        let pos = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(pos))
    }

    /// Slots colliding with `query` under the inclusive test.
    /// Binary search skips everything starting after `query.end`.
    pub fn colliding(&self, query: &Window) -> impl Iterator<Item = &Slot> {
        let right_bound = self.slots.partition_point(|s| s.window.start <= query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |s| s.window.end >= query.start)
    }
}

#[derive(Debug, Clone)]
pub struct ParticipantLane {
    pub user: User,
    pub timeline: Timeline,
    /// Set when the user is deleted; holders of a stale `Arc` must not use it.
    pub retired: bool,
}

impl ParticipantLane {
    pub fn new(user: User) -> Self {
        Self {
            user,
            timeline: Timeline::default(),
            retired: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceLane {
    pub workspace: Workspace,
    pub services: BTreeMap<Ulid, Service>,
    pub timeline: Timeline,
    pub retired: bool,
}

impl WorkspaceLane {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            services: BTreeMap::new(),
            timeline: Timeline::default(),
            retired: false,
        }
    }
}

/// The event types, flat, no nesting. A WAL record is the list of events
/// committed by one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    WorkspaceCreated {
        workspace: Workspace,
    },
    WorkspaceUpdated {
        id: Ulid,
        name: Option<String>,
        available_slots: u32,
    },
    ServiceCreated {
        service: Service,
    },
    ServiceUpdated {
        id: Ulid,
        workspace_id: Ulid,
        name: Option<String>,
        duration: Ms,
        price: u64,
    },
    ServiceAvailabilitySet {
        id: Ulid,
        workspace_id: Ulid,
        available: bool,
    },
    ServiceDeleted {
        id: Ulid,
        workspace_id: Ulid,
    },
    UserCreated {
        user: User,
    },
    StaffAvailabilitySet {
        id: Ulid,
        available: bool,
    },
    WorkingHoursSet {
        id: Ulid,
        hours: WorkingHours,
    },
    ServiceAssigned {
        staff_id: Ulid,
        service_id: Ulid,
    },
    ServiceUnassigned {
        staff_id: Ulid,
        service_id: Ulid,
    },
    UserDeleted {
        id: Ulid,
    },
    AppointmentBooked {
        appointment: Appointment,
    },
    AppointmentRescheduled {
        id: Ulid,
        window: Window,
    },
    AppointmentStatusChanged {
        id: Ulid,
        status: AppointmentStatus,
    },
    AppointmentRemoved {
        id: Ulid,
    },
    CompletionRecorded {
        staff_id: Ulid,
        revenue: u64,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaffStats {
    pub staff_id: Ulid,
    pub profit: u64,
    pub completed: u32,
}
