pub mod controller;
pub mod projector;
pub mod resolver;
pub mod store;
