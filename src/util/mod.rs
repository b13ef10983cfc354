//! Utility modules: retry, timeout, clock, atomic file writes.

pub mod clock;
pub mod fs;
pub mod retry;
pub mod timeout;
