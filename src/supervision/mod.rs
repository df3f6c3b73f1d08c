//! Transport resilience primitives shared by the LLM client.

pub mod circuit_breaker;

pub use circuit_breaker::CircuitBreaker;
