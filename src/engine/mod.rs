//! Engine facade (C8): the crate's single public entry point.

pub mod events;
pub mod facade;

pub use events::Event;
pub use facade::Engine;
