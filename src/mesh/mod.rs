//! Mesh router (C6): TTL forwarding, duplicate suppression, and the
//! store-and-forward queue.

pub mod dedup;
pub mod peer;
pub mod router;
pub mod store_and_forward;

pub use peer::{Peer, SignalQuality};
pub use router::{RouteOutcome, Router};
