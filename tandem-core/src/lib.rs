use crossbeam::channel::unbounded;

mod config;
mod events;
mod playback;
mod session_code;
mod store;
mod util;

#[cfg(test)]
mod testing;

pub use config::*;
pub use events::*;
pub use playback::*;
pub use session_code::*;
pub use store::*;
pub use util::*;

/// A type passed to the components of the sync engine, to access config and emit events.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub config: Config,

    event_sender: EventSender,
}

impl SyncContext {
    /// Creates a new context, returning it along with the receiving end of its events.
    pub fn new(config: Config) -> (Self, EventReceiver) {
        let (event_sender, event_receiver) = unbounded();

        let context = Self {
            config,
            event_sender,
        };

        (context, event_receiver)
    }

    /// Emits an event. Events are dropped if nobody is listening anymore.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.event_sender.send(event);
    }
}
