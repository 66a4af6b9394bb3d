//! Device drivers built on the daemon client primitives.
//!
//! Each driver consumes the client's GPIO event stream and/or issues
//! primitive commands through the shared [`DaemonClient`] interface; none
//! of them care which protocol variant is underneath.
//!
//! [`DaemonClient`]: crate::core::traits::DaemonClient

pub mod button;
pub mod dht;
pub mod ledchain;
