//! Data models shared by the store, scheduler, and coordinator.

/// Recovery entries and document ids.
pub mod entry;
/// Autosave settings.
pub mod settings;
/// Save status state machine.
pub mod status;
