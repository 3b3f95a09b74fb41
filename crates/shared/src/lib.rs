//! Shared kernel for the Argus pipeline.
//!
//! Everything in this crate is plain data: identifiers, configuration DTOs,
//! channel/queue naming and the realtime wire protocol. No I/O happens here.

pub mod config;
pub mod ids;
pub mod realtime;
pub mod topics;
