//! Core data models for the derivative service.
//!
//! `object` maps to the SQLite metadata table of the local store; the
//! remaining modules describe what an invocation consumes and produces.

pub mod derivative;
pub mod invocation;
pub mod object;
