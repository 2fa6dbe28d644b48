//! Probes for the process and socket primitives of the host: running a
//! command and capturing its output, resolving executables on the search
//! path, pushing bytes through an external TCP listener, and streaming the
//! output of a long-running command.

pub mod command;
pub mod drain;
pub mod error;
pub mod launcher;
pub mod lines;
pub mod listener;
pub mod lookup;
pub mod scenario;
pub mod signals;
pub mod stimulus;

pub use error::{ProbeError, Result};
