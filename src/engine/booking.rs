use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::MAX_ACTIVE_PER_LANE;
use crate::model::*;
use crate::notify::NoticeKind;
use crate::observability::BOOKINGS_TOTAL;

use super::conflict::{now_ms, validate_window};
use super::unit_of_work::LanePlan;
use super::validator::{validate, Proposal};
use super::{Engine, EngineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingRequest {
    pub client_id: Ulid,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub start: Ms,
}

impl Engine {
    /// Admit and persist a new appointment in NOT_APPROVED state. The staff
    /// member is notified of the pending request.
    pub async fn book(&self, request: BookingRequest) -> Result<Appointment, EngineError> {
        let result = self.retrying("book", || self.try_book(&request)).await;
        match &result {
            Ok(appointment) => {
                metrics::counter!(BOOKINGS_TOTAL, "outcome" => "accepted", "reason" => "none").increment(1);
                info!(
                    "booked {} for client {} with staff {} [{}, {}]",
                    appointment.id,
                    appointment.client_id,
                    appointment.staff_id,
                    appointment.window.start,
                    appointment.window.end
                );
            }
            Err(e) => {
                metrics::counter!(BOOKINGS_TOTAL, "outcome" => "rejected", "reason" => e.reason()).increment(1);
                debug!("booking rejected: {e}");
            }
        }
        result
    }

    async fn try_book(&self, request: &BookingRequest) -> Result<Appointment, EngineError> {
        let workspace_id = self
            .store
            .workspace_of_service(&request.service_id)
            .ok_or(EngineError::NotFound(request.service_id))?;
        let plan = LanePlan::new()
            .participant(request.client_id)
            .participant(request.staff_id)
            .workspace(workspace_id);
        let mut uow = self.lock(&plan).await?;

        let service = uow.service(&workspace_id, &request.service_id)?;
        let window = Window {
            start: request.start,
            end: request.start.saturating_add(service.duration),
        };
        validate_window(&window)?;
        validate(
            &Proposal {
                client: uow.participant(&request.client_id)?,
                staff: uow.participant(&request.staff_id)?,
                service,
                workspace: uow.workspace(&workspace_id)?,
                window,
                exclude: None,
            },
            &self.policy,
        )?;
        for id in [request.client_id, request.staff_id] {
            if uow.participant(&id)?.timeline.len() >= MAX_ACTIVE_PER_LANE {
                return Err(EngineError::LimitExceeded("too many active appointments"));
            }
        }

        let appointment = Appointment {
            id: Ulid::new(),
            client_id: request.client_id,
            staff_id: request.staff_id,
            service_id: request.service_id,
            workspace_id,
            window,
            status: AppointmentStatus::NotApproved,
            created_at: now_ms(),
        };
        uow.stage(Event::AppointmentBooked {
            appointment: appointment.clone(),
        });
        uow.notify(NoticeKind::NotApproved, appointment.clone());
        uow.commit().await?;
        Ok(appointment)
    }

    /// Move an active appointment to a new start. The end is recomputed from
    /// the service's current duration and the new window is admitted as a
    /// fresh booking that ignores the appointment itself.
    pub async fn reschedule(&self, id: Ulid, start: Ms) -> Result<Appointment, EngineError> {
        let result = self.retrying("reschedule", || self.try_reschedule(id, start)).await;
        if let Ok(appointment) = &result {
            info!(
                "rescheduled {id} to [{}, {}]",
                appointment.window.start, appointment.window.end
            );
        }
        result
    }

    async fn try_reschedule(&self, id: Ulid, start: Ms) -> Result<Appointment, EngineError> {
        let mut uow = self.lock(&self.plan_for_appointment(&id)?).await?;
        let mut appointment = uow.appointment(&id)?;
        if !appointment.status.is_active() {
            return Err(EngineError::AppointmentClosed(id));
        }

        let service = uow.service(&appointment.workspace_id, &appointment.service_id)?;
        let window = Window {
            start,
            end: start.saturating_add(service.duration),
        };
        validate_window(&window)?;
        validate(
            &Proposal {
                client: uow.participant(&appointment.client_id)?,
                staff: uow.participant(&appointment.staff_id)?,
                service,
                workspace: uow.workspace(&appointment.workspace_id)?,
                window,
                exclude: Some(id),
            },
            &self.policy,
        )?;

        uow.stage(Event::AppointmentRescheduled { id, window });
        uow.commit().await?;
        appointment.window = window;
        Ok(appointment)
    }

    /// Request a status change through the lifecycle state machine.
    pub async fn change_status(
        &self,
        id: Ulid,
        status: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        let result = self.retrying("change_status", || self.try_change_status(id, status)).await;
        match &result {
            Ok(appointment) => info!("appointment {id} is {}", appointment.status.as_str()),
            Err(e) => debug!("status change of {id} to {} refused: {e}", status.as_str()),
        }
        result
    }

    async fn try_change_status(
        &self,
        id: Ulid,
        status: AppointmentStatus,
    ) -> Result<Appointment, EngineError> {
        let mut uow = self.lock(&self.plan_for_appointment(&id)?).await?;
        let appointment = uow.appointment(&id)?;
        let updated = uow.stage_transition(&appointment, status)?;
        uow.commit().await?;
        Ok(updated)
    }

    /// Hard-delete an appointment, bypassing the state machine. Removing an
    /// active appointment still notifies the client of the cancellation.
    pub async fn remove_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let result = self.retrying("remove_appointment", || self.try_remove_appointment(id)).await;
        if result.is_ok() {
            info!("removed appointment {id}");
        }
        result
    }

    async fn try_remove_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let mut uow = self.lock(&self.plan_for_appointment(&id)?).await?;
        let appointment = uow.appointment(&id)?;
        if appointment.status.is_active() {
            let mut canceled = appointment.clone();
            canceled.status = AppointmentStatus::Canceled;
            uow.notify(NoticeKind::Canceled, canceled);
        }
        uow.stage(Event::AppointmentRemoved { id });
        uow.commit().await?;
        Ok(appointment)
    }

    /// Lanes of an existing appointment. Lanes of since-deleted participants
    /// are left out; only closed appointments can reference them.
    fn plan_for_appointment(&self, id: &Ulid) -> Result<LanePlan, EngineError> {
        let appointment = self.store.appointment(id).ok_or(EngineError::NotFound(*id))?;
        Ok(LanePlan::new()
            .slot(&Slot::from(&appointment))
            .existing(&self.store))
    }
}
