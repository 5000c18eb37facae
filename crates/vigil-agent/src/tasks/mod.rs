//! Background tasks module

mod global_housekeeping;
mod watcher;

pub use global_housekeeping::run_global_housekeeping;
pub use watcher::run_event_watcher;
