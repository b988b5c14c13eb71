use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::cascade::{self, DomainEvent};
use super::conflict::validate_duration;
use super::unit_of_work::{LanePlan, UnitOfWork};
use super::{Engine, EngineError};

fn check_name(name: &Option<String>, what: &'static str) -> Result<(), EngineError> {
    if let Some(n) = name
        && n.len() > MAX_NAME_LEN
    {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn check_slots(available_slots: u32) -> Result<(), EngineError> {
    if available_slots > MAX_SLOTS_PER_WORKSPACE {
        return Err(EngineError::LimitExceeded("too many workspace slots"));
    }
    Ok(())
}

fn check_hours(hours: &WorkingHours) -> Result<(), EngineError> {
    if hours.end < hours.begin {
        return Err(EngineError::InvalidEntity("working hours end before they begin"));
    }
    Ok(())
}

/// Lanes a cascade would need, or none when `event` is absent.
fn cascade_plan(uow: &UnitOfWork<'_>, event: Option<DomainEvent>) -> Result<LanePlan, EngineError> {
    match event {
        Some(event) => event.plan(uow),
        None => Ok(LanePlan::new()),
    }
}

fn record_cascade(event: DomainEvent, canceled: usize) {
    if canceled == 0 {
        return;
    }
    metrics::counter!(crate::observability::CASCADE_CANCELLATIONS_TOTAL, "trigger" => event.label())
        .increment(canceled as u64);
    info!("{}: canceled {canceled} appointments", event.label());
}

impl Engine {
    // ── Workspaces ───────────────────────────────────────────

    pub async fn create_workspace(
        &self,
        id: Ulid,
        name: Option<String>,
        available_slots: u32,
    ) -> Result<Workspace, EngineError> {
        check_name(&name, "workspace name too long")?;
        check_slots(available_slots)?;
        let workspace = Workspace {
            id,
            name,
            available_slots,
        };
        self.retrying("create_workspace", || self.try_create_workspace(&workspace))
            .await?;
        info!("created workspace {id} with {available_slots} slots");
        Ok(workspace)
    }

    async fn try_create_workspace(&self, workspace: &Workspace) -> Result<(), EngineError> {
        let Some(_reservation) = self.store.reserve(workspace.id) else {
            return Err(EngineError::AlreadyExists(workspace.id));
        };
        let mut uow = self.lock(&LanePlan::new()).await?;
        if self.store.contains_workspace(&workspace.id) {
            return Err(EngineError::AlreadyExists(workspace.id));
        }
        uow.stage(Event::WorkspaceCreated {
            workspace: workspace.clone(),
        });
        uow.commit().await
    }

    /// Rename a workspace or change its slot capacity. Lowering the capacity
    /// never cancels what is already booked; it only limits new bookings.
    pub async fn update_workspace(
        &self,
        id: Ulid,
        name: Option<String>,
        available_slots: u32,
    ) -> Result<Workspace, EngineError> {
        check_name(&name, "workspace name too long")?;
        check_slots(available_slots)?;
        let updated = Workspace {
            id,
            name,
            available_slots,
        };
        self.retrying("update_workspace", || self.try_update_workspace(&updated))
            .await?;
        Ok(updated)
    }

    async fn try_update_workspace(&self, updated: &Workspace) -> Result<(), EngineError> {
        let mut uow = self.lock(&LanePlan::new().workspace(updated.id)).await?;
        uow.workspace(&updated.id)?;
        uow.stage(Event::WorkspaceUpdated {
            id: updated.id,
            name: updated.name.clone(),
            available_slots: updated.available_slots,
        });
        uow.commit().await
    }

    // ── Services ─────────────────────────────────────────────

    /// New services start out available.
    pub async fn create_service(
        &self,
        id: Ulid,
        workspace_id: Ulid,
        name: Option<String>,
        duration: Ms,
        price: u64,
    ) -> Result<Service, EngineError> {
        check_name(&name, "service name too long")?;
        validate_duration(duration)?;
        let service = Service {
            id,
            workspace_id,
            name,
            duration,
            price,
            available: true,
        };
        self.retrying("create_service", || self.try_create_service(&service))
            .await?;
        info!("created service {id} in workspace {workspace_id}");
        Ok(service)
    }

    async fn try_create_service(&self, service: &Service) -> Result<(), EngineError> {
        let mut uow = self
            .lock(&LanePlan::new().workspace(service.workspace_id))
            .await?;
        if self.store.workspace_of_service(&service.id).is_some() {
            return Err(EngineError::AlreadyExists(service.id));
        }
        uow.stage(Event::ServiceCreated {
            service: service.clone(),
        });
        uow.commit().await
    }

    /// Change name, duration or price. Booked appointments keep their
    /// windows; the new duration applies to future bookings and reschedules.
    pub async fn update_service(
        &self,
        id: Ulid,
        name: Option<String>,
        duration: Ms,
        price: u64,
    ) -> Result<Service, EngineError> {
        check_name(&name, "service name too long")?;
        validate_duration(duration)?;
        self.retrying("update_service", || {
            self.try_update_service(id, name.clone(), duration, price)
        })
        .await
    }

    async fn try_update_service(
        &self,
        id: Ulid,
        name: Option<String>,
        duration: Ms,
        price: u64,
    ) -> Result<Service, EngineError> {
        let workspace_id = self.workspace_of(&id)?;
        let mut uow = self.lock(&LanePlan::new().workspace(workspace_id)).await?;
        let mut service = uow.service(&workspace_id, &id)?.clone();
        service.name = name.clone();
        service.duration = duration;
        service.price = price;
        uow.stage(Event::ServiceUpdated {
            id,
            workspace_id,
            name,
            duration,
            price,
        });
        uow.commit().await?;
        Ok(service)
    }

    /// Toggle a service. Turning it off cancels every active appointment for
    /// it. Returns how many appointments were canceled.
    pub async fn set_service_availability(&self, id: Ulid, available: bool) -> Result<usize, EngineError> {
        let (event, canceled) = self
            .retrying("set_service_availability", || {
                self.try_set_service_availability(id, available)
            })
            .await?;
        if let Some(event) = event {
            record_cascade(event, canceled);
        }
        Ok(canceled)
    }

    async fn try_set_service_availability(
        &self,
        id: Ulid,
        available: bool,
    ) -> Result<(Option<DomainEvent>, usize), EngineError> {
        let workspace_id = self.workspace_of(&id)?;
        let mut uow = self
            .lock_replanned(LanePlan::new().workspace(workspace_id), |uow| {
                let service = uow.service(&workspace_id, &id)?;
                cascade_plan(uow, DomainEvent::service_availability_change(service, available))
            })
            .await?;
        let service = uow.service(&workspace_id, &id)?;
        let unchanged = service.available == available;
        let event = DomainEvent::service_availability_change(service, available);
        if unchanged {
            uow.rollback();
            return Ok((None, 0));
        }
        let canceled = match event {
            Some(event) => cascade::handle(&mut uow, event)?,
            None => 0,
        };
        uow.stage(Event::ServiceAvailabilitySet {
            id,
            workspace_id,
            available,
        });
        uow.commit().await?;
        Ok((event, canceled))
    }

    /// Delete a service and cancel its active appointments. Staff who were
    /// assigned the service keep the id in their assignment set.
    pub async fn delete_service(&self, id: Ulid) -> Result<usize, EngineError> {
        let (event, canceled) = self
            .retrying("delete_service", || self.try_delete_service(id))
            .await?;
        record_cascade(event, canceled);
        info!("deleted service {id}");
        Ok(canceled)
    }

    async fn try_delete_service(&self, id: Ulid) -> Result<(DomainEvent, usize), EngineError> {
        let workspace_id = self.workspace_of(&id)?;
        let event = DomainEvent::ServiceDeleted {
            service_id: id,
            workspace_id,
        };
        let mut uow = self.lock_replanned(event.source(), |uow| event.plan(uow)).await?;
        uow.service(&workspace_id, &id)?;
        let canceled = cascade::handle(&mut uow, event)?;
        uow.stage(Event::ServiceDeleted { id, workspace_id });
        uow.commit().await?;
        Ok((event, canceled))
    }

    // ── Users ────────────────────────────────────────────────

    /// Employees and administrators must come with working hours and get a
    /// staff profile; clients must not.
    pub async fn create_user(
        &self,
        id: Ulid,
        name: Option<String>,
        role: Role,
        hours: Option<WorkingHours>,
    ) -> Result<User, EngineError> {
        check_name(&name, "user name too long")?;
        let staff = match (role.can_hold_staff_profile(), hours) {
            (true, Some(hours)) => {
                check_hours(&hours)?;
                Some(StaffProfile::new(hours))
            }
            (true, None) => return Err(EngineError::InvalidEntity("staff require working hours")),
            (false, Some(_)) => return Err(EngineError::InvalidEntity("clients have no working hours")),
            (false, None) => None,
        };
        let user = User {
            id,
            name,
            role,
            staff,
        };
        self.retrying("create_user", || self.try_create_user(&user)).await?;
        info!("created user {id} ({role:?})");
        Ok(user)
    }

    async fn try_create_user(&self, user: &User) -> Result<(), EngineError> {
        let Some(_reservation) = self.store.reserve(user.id) else {
            return Err(EngineError::AlreadyExists(user.id));
        };
        let mut uow = self.lock(&LanePlan::new()).await?;
        if self.store.contains_participant(&user.id) {
            return Err(EngineError::AlreadyExists(user.id));
        }
        uow.stage(Event::UserCreated { user: user.clone() });
        uow.commit().await
    }

    /// Toggle a staff member. Turning them off cancels every active
    /// appointment they staff. Returns how many appointments were canceled.
    pub async fn set_staff_availability(&self, id: Ulid, available: bool) -> Result<usize, EngineError> {
        let (event, canceled) = self
            .retrying("set_staff_availability", || {
                self.try_set_staff_availability(id, available)
            })
            .await?;
        if let Some(event) = event {
            record_cascade(event, canceled);
        }
        Ok(canceled)
    }

    async fn try_set_staff_availability(
        &self,
        id: Ulid,
        available: bool,
    ) -> Result<(Option<DomainEvent>, usize), EngineError> {
        let mut uow = self
            .lock_replanned(LanePlan::new().participant(id), |uow| {
                let before = uow.staff_profile(&id)?.available;
                cascade_plan(uow, DomainEvent::staff_availability_change(id, before, available))
            })
            .await?;
        let before = uow.staff_profile(&id)?.available;
        if before == available {
            uow.rollback();
            return Ok((None, 0));
        }
        let event = DomainEvent::staff_availability_change(id, before, available);
        let canceled = match event {
            Some(event) => cascade::handle(&mut uow, event)?,
            None => 0,
        };
        uow.stage(Event::StaffAvailabilitySet { id, available });
        uow.commit().await?;
        Ok((event, canceled))
    }

    /// Replace a staff member's working hours. Existing appointments are not
    /// re-checked against the new hours.
    pub async fn set_working_hours(&self, id: Ulid, hours: WorkingHours) -> Result<(), EngineError> {
        check_hours(&hours)?;
        self.retrying("set_working_hours", || self.try_set_working_hours(id, hours))
            .await
    }

    async fn try_set_working_hours(&self, id: Ulid, hours: WorkingHours) -> Result<(), EngineError> {
        let mut uow = self.lock(&LanePlan::new().participant(id)).await?;
        uow.staff_profile(&id)?;
        uow.stage(Event::WorkingHoursSet { id, hours });
        uow.commit().await
    }

    /// Allow a staff member to perform a service. Assigning twice is a no-op.
    pub async fn assign_service(&self, staff_id: Ulid, service_id: Ulid) -> Result<(), EngineError> {
        self.retrying("assign_service", || self.try_assign_service(staff_id, service_id))
            .await
    }

    async fn try_assign_service(&self, staff_id: Ulid, service_id: Ulid) -> Result<(), EngineError> {
        let workspace_id = self.workspace_of(&service_id)?;
        let plan = LanePlan::new().participant(staff_id).workspace(workspace_id);
        let mut uow = self.lock(&plan).await?;
        uow.service(&workspace_id, &service_id)?;
        if uow.staff_profile(&staff_id)?.services.contains(&service_id) {
            uow.rollback();
            return Ok(());
        }
        uow.stage(Event::ServiceAssigned { staff_id, service_id });
        uow.commit().await
    }

    /// Take a service away from a staff member, canceling their active
    /// appointments for it. Returns how many appointments were canceled.
    pub async fn unassign_service(&self, staff_id: Ulid, service_id: Ulid) -> Result<usize, EngineError> {
        let event = DomainEvent::StaffUnassigned { staff_id, service_id };
        let canceled = self
            .retrying("unassign_service", || self.try_unassign_service(staff_id, service_id))
            .await?;
        record_cascade(event, canceled);
        Ok(canceled)
    }

    async fn try_unassign_service(&self, staff_id: Ulid, service_id: Ulid) -> Result<usize, EngineError> {
        let event = DomainEvent::StaffUnassigned { staff_id, service_id };
        let mut uow = self.lock_replanned(event.source(), |uow| event.plan(uow)).await?;
        if !uow.staff_profile(&staff_id)?.services.contains(&service_id) {
            uow.rollback();
            return Ok(0);
        }
        let canceled = cascade::handle(&mut uow, event)?;
        uow.stage(Event::ServiceUnassigned { staff_id, service_id });
        uow.commit().await?;
        Ok(canceled)
    }

    /// Delete a user, canceling every active appointment where they are the
    /// client or the staff member. Closed appointments stay queryable.
    pub async fn delete_user(&self, id: Ulid) -> Result<usize, EngineError> {
        let event = DomainEvent::UserDeleted { user_id: id };
        let canceled = self
            .retrying("delete_user", || self.try_delete_user(id))
            .await?;
        record_cascade(event, canceled);
        info!("deleted user {id}");
        Ok(canceled)
    }

    async fn try_delete_user(&self, id: Ulid) -> Result<usize, EngineError> {
        let event = DomainEvent::UserDeleted { user_id: id };
        let mut uow = self.lock_replanned(event.source(), |uow| event.plan(uow)).await?;
        let canceled = cascade::handle(&mut uow, event)?;
        uow.stage(Event::UserDeleted { id });
        uow.commit().await?;
        self.notifier.retire(id);
        Ok(canceled)
    }

    fn workspace_of(&self, service_id: &Ulid) -> Result<Ulid, EngineError> {
        self.store
            .workspace_of_service(service_id)
            .ok_or(EngineError::NotFound(*service_id))
    }
}
