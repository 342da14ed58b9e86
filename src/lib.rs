//! `grbl-rs`: a host-side driver for streaming G-Code to grbl CNC firmware
//! over a serial link.
//!
//! The crate is organized as three tightly coupled subsystems under
//! [`machines::grbl`]: the transport/IO layer, the streaming flow-control
//! engine, and the response parser / state projector, wired together by an
//! orchestrator that owns thread lifecycle and serializes event dispatch to
//! the embedder.

pub mod machines;
