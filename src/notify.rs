use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Appointment;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Approved,
    NotApproved,
    Canceled,
}

/// A lifecycle notification about one appointment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub appointment: Appointment,
}

impl Notice {
    pub fn new(kind: NoticeKind, appointment: Appointment) -> Self {
        Self { kind, appointment }
    }

    /// Approvals reach both sides, a new request reaches the staff member,
    /// a cancellation reaches the client.
    pub fn recipients(&self) -> Vec<Ulid> {
        match self.kind {
            NoticeKind::Approved => vec![self.appointment.client_id, self.appointment.staff_id],
            NoticeKind::NotApproved => vec![self.appointment.staff_id],
            NoticeKind::Canceled => vec![self.appointment.client_id],
        }
    }

    pub fn payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Delivery side of lifecycle notifications. Called while the committing
/// unit of work still holds its locks, after the WAL write succeeded.
pub trait Notifier: Send + Sync {
    fn dispatch(&self, notice: &Notice);

    /// Called once a user is deleted; no further notices will name them.
    fn retire(&self, _user_id: Ulid) {}
}

/// Broadcast hub with one channel per recipient.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notice>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notices for a user. Creates the channel if needed.
    pub fn subscribe(&self, user_id: Ulid) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, user_id: Ulid, notice: &Notice) {
        if let Some(sender) = self.channels.get(&user_id) {
            let _ = sender.send(notice.clone());
        }
    }

    /// Remove a channel (e.g. when the user is deleted).
    pub fn remove(&self, user_id: &Ulid) {
        self.channels.remove(user_id);
    }

    pub fn has_channel(&self, user_id: &Ulid) -> bool {
        self.channels.contains_key(user_id)
    }
}

impl Notifier for NotifyHub {
    fn dispatch(&self, notice: &Notice) {
        for recipient in notice.recipients() {
            self.send(recipient, notice);
        }
    }

    fn retire(&self, user_id: Ulid) {
        self.remove(&user_id);
    }
}
