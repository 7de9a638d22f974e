use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-calendar broadcast of applied events. Hosts re-run the layout when
/// their calendar changes.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
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

    pub fn subscribe(&self, calendar_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(calendar_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op when nobody listens on the calendar.
    pub fn send(&self, calendar_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&calendar_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop the channel. Open receivers see it close.
    pub fn remove(&self, calendar_id: &Ulid) {
        self.channels.remove(calendar_id);
    }

    /// Drop the channel only if it has no receivers left.
    pub fn remove_if_idle(&self, calendar_id: &Ulid) {
        self.channels
            .remove_if(calendar_id, |_, sender| sender.receiver_count() == 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
