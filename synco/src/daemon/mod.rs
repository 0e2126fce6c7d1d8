//! Process lifecycle helpers.

pub mod shutdown;

pub use shutdown::{spawn_signal_listener, wait_for_signal};
