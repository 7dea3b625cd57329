//! Provided [`Engine`](crate::Engine) implementations.

pub mod sync;
