pub mod events;

pub use events::PresenceEvent;
