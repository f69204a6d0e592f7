//! RTA - real-time audio analyzer
//!
//! Captures mono audio on a dedicated thread and turns it, once per display
//! refresh, into a frame of RMS/peak levels, a log-frequency spectrum and a
//! harmonicity vector. Drawing the frames is left to the caller.

pub mod audio;
pub mod config;
pub mod state;
