use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::{OwnedRwLockWriteGuard, RwLock, RwLockReadGuard};
use tracing::debug;
use ulid::Ulid;

use crate::limits::MAX_LOCK_ATTEMPTS;
use crate::model::*;
use crate::notify::{Notice, NoticeKind};

use super::lifecycle::{self, Effect, Transition};
use super::store::{SharedParticipant, SharedWorkspace, Store};
use super::{Engine, EngineError};

/// The set of lanes a unit of work must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LanePlan {
    pub participants: BTreeSet<Ulid>,
    pub workspaces: BTreeSet<Ulid>,
}

impl LanePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn participant(mut self, id: Ulid) -> Self {
        self.participants.insert(id);
        self
    }

    pub fn workspace(mut self, id: Ulid) -> Self {
        self.workspaces.insert(id);
        self
    }

    /// Every lane an appointment occupies.
    pub fn slot(self, slot: &Slot) -> Self {
        self.participant(slot.client_id)
            .participant(slot.staff_id)
            .workspace(slot.workspace_id)
    }

    pub fn merge(&mut self, other: &LanePlan) {
        self.participants.extend(other.participants.iter().copied());
        self.workspaces.extend(other.workspaces.iter().copied());
    }

    pub fn is_covered_by(&self, other: &LanePlan) -> bool {
        self.participants.is_subset(&other.participants) && self.workspaces.is_subset(&other.workspaces)
    }

    pub fn contains(&self, id: &Ulid) -> bool {
        self.participants.contains(id) || self.workspaces.contains(id)
    }

    fn forget(&mut self, id: &Ulid) {
        self.participants.remove(id);
        self.workspaces.remove(id);
    }

    /// Drop lanes that no longer exist.
    pub fn existing(mut self, store: &Store) -> Self {
        self.participants.retain(|id| store.contains_participant(id));
        self.workspaces.retain(|id| store.contains_workspace(id));
        self
    }

    /// Lanes touched by a replayed WAL record.
    pub fn for_record(store: &Store, record: &[Event]) -> Self {
        let mut plan = LanePlan::new();
        for event in record {
            plan = match event {
                Event::WorkspaceUpdated { id, .. } => plan.workspace(*id),
                Event::ServiceCreated { service } => plan.workspace(service.workspace_id),
                Event::ServiceUpdated { workspace_id, .. }
                | Event::ServiceAvailabilitySet { workspace_id, .. }
                | Event::ServiceDeleted { workspace_id, .. } => plan.workspace(*workspace_id),
                Event::StaffAvailabilitySet { id, .. }
                | Event::WorkingHoursSet { id, .. }
                | Event::UserDeleted { id } => plan.participant(*id),
                Event::ServiceAssigned { staff_id, .. }
                | Event::ServiceUnassigned { staff_id, .. }
                | Event::CompletionRecorded { staff_id, .. } => plan.participant(*staff_id),
                Event::AppointmentBooked { appointment } => plan.slot(&Slot::from(appointment)),
                Event::AppointmentRescheduled { id, .. }
                | Event::AppointmentStatusChanged { id, .. }
                | Event::AppointmentRemoved { id } => match store.appointment(id) {
                    Some(a) => plan.slot(&Slot::from(&a)),
                    None => plan,
                },
                Event::WorkspaceCreated { .. } | Event::UserCreated { .. } => plan,
            };
        }
        plan.existing(store)
    }
}

enum LaneRef {
    Participant(SharedParticipant),
    Workspace(SharedWorkspace),
}

/// Locked lanes plus the events and notices staged against them.
///
/// Nothing staged is visible until `commit`. Dropping without committing is
/// a rollback.
pub struct UnitOfWork<'e> {
    engine: &'e Engine,
    participants: BTreeMap<Ulid, OwnedRwLockWriteGuard<ParticipantLane>>,
    workspaces: BTreeMap<Ulid, OwnedRwLockWriteGuard<WorkspaceLane>>,
    staged: Vec<Event>,
    notices: Vec<Notice>,
    transitions: Vec<(AppointmentStatus, AppointmentStatus)>,
    _gate: RwLockReadGuard<'e, ()>,
}

impl Engine {
    /// Lock every lane of `plan` in ascending id order.
    pub(super) async fn lock(&self, plan: &LanePlan) -> Result<UnitOfWork<'_>, EngineError> {
        let mut order: Vec<(Ulid, LaneRef)> = Vec::new();
        for id in &plan.participants {
            let lane = self.store.participant(id).ok_or(EngineError::NotFound(*id))?;
            order.push((*id, LaneRef::Participant(lane)));
        }
        for id in &plan.workspaces {
            let lane = self.store.workspace(id).ok_or(EngineError::NotFound(*id))?;
            order.push((*id, LaneRef::Workspace(lane)));
        }
        order.sort_by_key(|(id, _)| *id);

        let gate = self.commit_gate.read().await;
        let mut uow = UnitOfWork {
            engine: self,
            participants: BTreeMap::new(),
            workspaces: BTreeMap::new(),
            staged: Vec::new(),
            notices: Vec::new(),
            transitions: Vec::new(),
            _gate: gate,
        };
        for (id, lane) in order {
            match lane {
                LaneRef::Participant(lane) => {
                    let guard = lane.write_owned().await;
                    if guard.retired {
                        return Err(EngineError::NotFound(id));
                    }
                    uow.participants.insert(id, guard);
                }
                LaneRef::Workspace(lane) => {
                    let guard = lane.write_owned().await;
                    if guard.retired {
                        return Err(EngineError::NotFound(id));
                    }
                    uow.workspaces.insert(id, guard);
                }
            }
        }
        Ok(uow)
    }

    /// Lock `base`, then ask `replan` which lanes the work really needs given
    /// what is now locked. Relock with the union until the plan is stable.
    pub(super) async fn lock_replanned<F>(
        &self,
        base: LanePlan,
        replan: F,
    ) -> Result<UnitOfWork<'_>, EngineError>
    where
        F: Fn(&UnitOfWork<'_>) -> Result<LanePlan, EngineError>,
    {
        let mut plan = base.clone();
        for _ in 0..MAX_LOCK_ATTEMPTS {
            let uow = match self.lock(&plan).await {
                Ok(uow) => uow,
                // A lane discovered by a previous pass vanished meanwhile.
                Err(EngineError::NotFound(id)) if !base.contains(&id) => {
                    plan.forget(&id);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let needed = replan(&uow)?;
            if needed.is_covered_by(&plan) {
                return Ok(uow);
            }
            drop(uow);
            plan.merge(&needed);
        }
        Err(EngineError::Contention)
    }
}

impl<'e> UnitOfWork<'e> {
    pub fn participant(&self, id: &Ulid) -> Result<&ParticipantLane, EngineError> {
        self.participants
            .get(id)
            .map(|g| &**g)
            .ok_or(EngineError::NotFound(*id))
    }

    pub fn workspace(&self, id: &Ulid) -> Result<&WorkspaceLane, EngineError> {
        self.workspaces
            .get(id)
            .map(|g| &**g)
            .ok_or(EngineError::NotFound(*id))
    }

    pub fn service(&self, workspace_id: &Ulid, service_id: &Ulid) -> Result<&Service, EngineError> {
        self.workspace(workspace_id)?
            .services
            .get(service_id)
            .ok_or(EngineError::NotFound(*service_id))
    }

    /// Staff profile of a held participant.
    pub fn staff_profile(&self, id: &Ulid) -> Result<&StaffProfile, EngineError> {
        self.participant(id)?
            .user
            .staff
            .as_ref()
            .ok_or(EngineError::WrongStaffRole(*id))
    }

    pub fn appointment(&self, id: &Ulid) -> Result<Appointment, EngineError> {
        self.engine
            .store
            .appointment(id)
            .ok_or(EngineError::NotFound(*id))
    }

    pub fn stage(&mut self, event: Event) {
        self.staged.push(event);
    }

    pub fn notify(&mut self, kind: NoticeKind, appointment: Appointment) {
        self.notices.push(Notice::new(kind, appointment));
    }

    /// Run the lifecycle state machine on `appointment` and stage the status
    /// change with its effect. Returns the appointment as it will be after
    /// commit.
    pub fn stage_transition(
        &mut self,
        appointment: &Appointment,
        to: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        let transition = lifecycle::transition(appointment.status, to)?;
        let Transition::Moved { from, to } = transition else {
            return Ok(appointment.clone());
        };
        let mut updated = appointment.clone();
        updated.status = to;

        match transition.effect() {
            Some(Effect::Notify(kind)) => self.notify(kind, updated.clone()),
            Some(Effect::RecordCompletion) => {
                let revenue = self
                    .service(&appointment.workspace_id, &appointment.service_id)?
                    .price;
                self.staff_profile(&appointment.staff_id)?;
                self.stage(Event::CompletionRecorded {
                    staff_id: appointment.staff_id,
                    revenue,
                });
            }
            None => {}
        }
        self.stage(Event::AppointmentStatusChanged {
            id: appointment.id,
            status: to,
        });
        self.transitions.push((from, to));
        Ok(updated)
    }

    /// Write all staged events as one WAL record, apply them, then fire the
    /// staged notices. Locks are released when `self` drops at the end.
    pub async fn commit(mut self) -> Result<(), EngineError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let record = std::mem::take(&mut self.staged);
        self.engine.wal_append(&record).await?;
        for event in &record {
            self.apply(event);
        }
        for (from, to) in &self.transitions {
            metrics::counter!(
                crate::observability::TRANSITIONS_TOTAL,
                "from" => from.as_str(),
                "to" => to.as_str()
            )
            .increment(1);
        }
        for notice in &self.notices {
            self.engine.notifier.dispatch(notice);
        }
        Ok(())
    }

    pub fn rollback(self) {
        debug!("rolling back unit of work with {} staged events", self.staged.len());
    }

    /// Apply a replayed record. No WAL write, no notices.
    pub(super) fn replay(&mut self, record: &[Event]) {
        for event in record {
            self.apply(event);
        }
    }

    fn apply(&mut self, event: &Event) {
        let engine = self.engine;
        let store = &engine.store;
        match event {
            Event::WorkspaceCreated { workspace } => {
                let lane = WorkspaceLane::new(workspace.clone());
                store.insert_workspace(workspace.id, Arc::new(RwLock::new(lane)));
            }
            Event::WorkspaceUpdated {
                id,
                name,
                available_slots,
            } => {
                if let Some(lane) = self.workspaces.get_mut(id) {
                    lane.workspace.name = name.clone();
                    lane.workspace.available_slots = *available_slots;
                }
            }
            Event::ServiceCreated { service } => {
                if let Some(lane) = self.workspaces.get_mut(&service.workspace_id) {
                    lane.services.insert(service.id, service.clone());
                    store.map_service(service.id, service.workspace_id);
                }
            }
            Event::ServiceUpdated {
                id,
                workspace_id,
                name,
                duration,
                price,
            } => {
                if let Some(service) = self.service_mut(workspace_id, id) {
                    service.name = name.clone();
                    service.duration = *duration;
                    service.price = *price;
                }
            }
            Event::ServiceAvailabilitySet {
                id,
                workspace_id,
                available,
            } => {
                if let Some(service) = self.service_mut(workspace_id, id) {
                    service.available = *available;
                }
            }
            Event::ServiceDeleted { id, workspace_id } => {
                if let Some(lane) = self.workspaces.get_mut(workspace_id) {
                    lane.services.remove(id);
                }
                store.unmap_service(id);
            }
            Event::UserCreated { user } => {
                let lane = ParticipantLane::new(user.clone());
                store.insert_participant(user.id, Arc::new(RwLock::new(lane)));
            }
            Event::StaffAvailabilitySet { id, available } => {
                if let Some(profile) = self.profile_mut(id) {
                    profile.available = *available;
                }
            }
            Event::WorkingHoursSet { id, hours } => {
                if let Some(profile) = self.profile_mut(id) {
                    profile.hours = *hours;
                }
            }
            Event::ServiceAssigned {
                staff_id,
                service_id,
            } => {
                if let Some(profile) = self.profile_mut(staff_id) {
                    profile.services.insert(*service_id);
                }
            }
            Event::ServiceUnassigned {
                staff_id,
                service_id,
            } => {
                if let Some(profile) = self.profile_mut(staff_id) {
                    profile.services.remove(service_id);
                }
            }
            Event::UserDeleted { id } => {
                if let Some(lane) = self.participants.get_mut(id) {
                    lane.retired = true;
                }
                store.remove_participant(id);
            }
            Event::AppointmentBooked { appointment } => {
                if appointment.status.is_active() {
                    self.enslot(appointment);
                }
                store.put_appointment(appointment.clone());
                store.record_history(appointment.client_id, appointment.id);
                store.record_history(appointment.staff_id, appointment.id);
                store.record_history(appointment.service_id, appointment.id);
            }
            Event::AppointmentRescheduled { id, window } => {
                if let Some(mut appointment) = store.appointment(id) {
                    self.unslot(&appointment);
                    appointment.window = *window;
                    if appointment.status.is_active() {
                        self.enslot(&appointment);
                    }
                    store.put_appointment(appointment);
                }
            }
            Event::AppointmentStatusChanged { id, status } => {
                if let Some(mut appointment) = store.appointment(id) {
                    appointment.status = *status;
                    if !status.is_active() {
                        self.unslot(&appointment);
                    }
                    store.put_appointment(appointment);
                }
            }
            Event::AppointmentRemoved { id } => {
                if let Some(appointment) = store.remove_appointment(id) {
                    self.unslot(&appointment);
                    for key in [appointment.client_id, appointment.staff_id, appointment.service_id] {
                        store.forget_history(&key, id);
                    }
                }
            }
            Event::CompletionRecorded { staff_id, revenue } => {
                if let Some(profile) = self.profile_mut(staff_id) {
                    profile.profit = profile.profit.saturating_add(*revenue);
                    profile.completed = profile.completed.saturating_add(1);
                }
            }
        }
    }

    fn service_mut(&mut self, workspace_id: &Ulid, id: &Ulid) -> Option<&mut Service> {
        self.workspaces.get_mut(workspace_id)?.services.get_mut(id)
    }

    fn profile_mut(&mut self, id: &Ulid) -> Option<&mut StaffProfile> {
        self.participants.get_mut(id)?.user.staff.as_mut()
    }

    fn enslot(&mut self, appointment: &Appointment) {
        let slot = Slot::from(appointment);
        if let Some(lane) = self.participants.get_mut(&appointment.client_id) {
            lane.timeline.insert(slot);
        }
        if appointment.staff_id != appointment.client_id
            && let Some(lane) = self.participants.get_mut(&appointment.staff_id)
        {
            lane.timeline.insert(slot);
        }
        if let Some(lane) = self.workspaces.get_mut(&appointment.workspace_id) {
            lane.timeline.insert(slot);
        }
    }

    fn unslot(&mut self, appointment: &Appointment) {
        for id in [appointment.client_id, appointment.staff_id] {
            if let Some(lane) = self.participants.get_mut(&id) {
                lane.timeline.remove(appointment.id);
            }
        }
        if let Some(lane) = self.workspaces.get_mut(&appointment.workspace_id) {
            lane.timeline.remove(appointment.id);
        }
    }
}
