use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedParticipant = Arc<RwLock<ParticipantLane>>;
pub type SharedWorkspace = Arc<RwLock<WorkspaceLane>>;

/// Lanes and indexes. Lane contents are only mutated by a unit of work that
/// holds the lane's write lock; an appointment record is only mutated while
/// all of its lanes are held.
pub struct Store {
    participants: DashMap<Ulid, SharedParticipant>,
    workspaces: DashMap<Ulid, SharedWorkspace>,
    service_to_workspace: DashMap<Ulid, Ulid>,
    appointments: DashMap<Ulid, Appointment>,
    /// Participant or service id → every appointment ever booked for it.
    history: DashMap<Ulid, Vec<Ulid>>,
    /// User and workspace ids whose create is in flight.
    creating: DashMap<Ulid, ()>,
}

/// Holds a user or workspace id for one create. Released on drop.
pub struct Reservation<'a> {
    creating: &'a DashMap<Ulid, ()>,
    id: Ulid,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.creating.remove(&self.id);
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            participants: DashMap::new(),
            workspaces: DashMap::new(),
            service_to_workspace: DashMap::new(),
            appointments: DashMap::new(),
            history: DashMap::new(),
            creating: DashMap::new(),
        }
    }

    /// Claim `id` for a create. `None` while another create holds it.
    pub fn reserve(&self, id: Ulid) -> Option<Reservation<'_>> {
        match self.creating.entry(id) {
            dashmap::Entry::Occupied(_) => None,
            dashmap::Entry::Vacant(slot) => {
                slot.insert(());
                Some(Reservation {
                    creating: &self.creating,
                    id,
                })
            }
        }
    }

    // ── Participants ─────────────────────────────────────────

    pub fn participant(&self, id: &Ulid) -> Option<SharedParticipant> {
        self.participants.get(id).map(|e| e.value().clone())
    }

    pub fn contains_participant(&self, id: &Ulid) -> bool {
        self.participants.contains_key(id)
    }

    pub fn insert_participant(&self, id: Ulid, lane: SharedParticipant) {
        self.participants.insert(id, lane);
    }

    pub fn remove_participant(&self, id: &Ulid) {
        self.participants.remove(id);
    }

    pub fn participant_lanes(&self) -> Vec<SharedParticipant> {
        self.participants.iter().map(|e| e.value().clone()).collect()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    // ── Workspaces & services ────────────────────────────────

    pub fn workspace(&self, id: &Ulid) -> Option<SharedWorkspace> {
        self.workspaces.get(id).map(|e| e.value().clone())
    }

    pub fn contains_workspace(&self, id: &Ulid) -> bool {
        self.workspaces.contains_key(id)
    }

    pub fn insert_workspace(&self, id: Ulid, lane: SharedWorkspace) {
        self.workspaces.insert(id, lane);
    }

    pub fn workspace_lanes(&self) -> Vec<SharedWorkspace> {
        self.workspaces.iter().map(|e| e.value().clone()).collect()
    }

    pub fn workspace_count(&self) -> usize {
        self.workspaces.len()
    }

    pub fn workspace_of_service(&self, service_id: &Ulid) -> Option<Ulid> {
        self.service_to_workspace.get(service_id).map(|e| *e.value())
    }

    pub fn map_service(&self, service_id: Ulid, workspace_id: Ulid) {
        self.service_to_workspace.insert(service_id, workspace_id);
    }

    pub fn unmap_service(&self, service_id: &Ulid) {
        self.service_to_workspace.remove(service_id);
    }

    pub fn service_count(&self) -> usize {
        self.service_to_workspace.len()
    }

    // ── Appointments ─────────────────────────────────────────

    pub fn appointment(&self, id: &Ulid) -> Option<Appointment> {
        self.appointments.get(id).map(|e| e.value().clone())
    }

    pub fn put_appointment(&self, appointment: Appointment) {
        self.appointments.insert(appointment.id, appointment);
    }

    pub fn remove_appointment(&self, id: &Ulid) -> Option<Appointment> {
        self.appointments.remove(id).map(|(_, a)| a)
    }

    /// All appointments ordered by id (creation order).
    pub fn appointments(&self) -> Vec<Appointment> {
        let mut all: Vec<Appointment> = self.appointments.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|a| a.id);
        all
    }

    pub fn appointment_count(&self) -> usize {
        self.appointments.len()
    }

    // ── History index ────────────────────────────────────────

    pub fn record_history(&self, key: Ulid, appointment_id: Ulid) {
        self.history.entry(key).or_default().push(appointment_id);
    }

    pub fn forget_history(&self, key: &Ulid, appointment_id: &Ulid) {
        if let Some(mut ids) = self.history.get_mut(key) {
            ids.retain(|id| id != appointment_id);
        }
    }

    pub fn history(&self, key: &Ulid) -> Vec<Appointment> {
        let ids = self
            .history
            .get(key)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut found: Vec<Appointment> = ids.iter().filter_map(|id| self.appointment(id)).collect();
        found.sort_by_key(|a| (a.window.start, a.id));
        found
    }
}
