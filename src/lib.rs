//! MeshDrop - a decentralized, offline, peer-to-peer file-transfer engine
//! over a short-range wireless mesh (BLE-class and WiFi-Direct-class
//! radios).
//!
//! This crate is a library: it owns no event loop beyond the worker tasks
//! [`engine::Engine::start`] spawns, and exposes everything through the
//! engine facade. Downstream integrators own `main` and supply the two
//! external capabilities this crate cannot provide itself: [`keystore`]
//! (durable key material) and [`blob`] (chunk storage).

pub mod blob;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod identity;
pub mod keystore;
pub mod logging;
pub mod mesh;
pub mod protocol;
pub mod session;
pub mod transfer;
pub mod transport;

pub use error::{Error, Result};
