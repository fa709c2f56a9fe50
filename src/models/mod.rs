pub mod event;
pub mod rider;
pub mod snapshot;
