//! Firmware-specific drivers. Currently only [`grbl`].

pub mod grbl;
