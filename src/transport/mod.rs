//! Transport dispatcher (C5) and radio abstraction (C4).

pub mod dispatcher;
pub mod radio;

pub use dispatcher::{select_transport, Dispatcher, TransportStats};
pub use radio::{FaultInjectingRadio, LoopbackRadio, PowerClass, RadioBackend, RadioCapability, RadioEvent, TransportKind};
