//! Core building blocks for the attestation gateway.
//!
//! The gateway itself is thin: HTTP handlers in `agw_host` compose the
//! pieces in this crate with calls into external attestation libraries.
//! What lives here is the logic that is genuinely local to the gateway:
//!
//! * [`body`] - multi-format ingestion of quote bytes from a request body.
//! * [`cache`] - a concurrent, TTL-based cache for fetched collateral.
//! * [`breaker`] - the process-health circuit breaker shared by all
//!   handlers.
//! * [`probe`] - peer-certificate acquisition and description for RA-TLS
//!   endpoints.
//! * [`verifier`] - the narrow call contract into the attestation
//!   libraries, plus a mock backend behind the `mock` feature.

pub mod body;
pub mod breaker;
pub mod cache;
pub mod hex;
pub mod probe;
pub mod verifier;
