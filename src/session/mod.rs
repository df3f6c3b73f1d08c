//! Session state persistence.
//!
//! Houses the checkpoint store that ties `Engine::run` and `Engine::resume`
//! together across suspension points.

pub mod checkpoint;
