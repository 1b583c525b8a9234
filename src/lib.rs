//! Small utilities for gaps in std: atomic saves, permission strings, file finding,
//! copying and rotation, and format string introspection.
//!
//! # Error handling
//! Every fallible function returns a typed error defined next to it.
//! Filesystem failures carry the action and path through [`misc::PathError`],
//! and keep their [`std::io::ErrorKind`].
//!
//! # Logging
//! Lifecycle events are logged through the [`log`] facade at debug level;
//! failures that are swallowed during cleanup are logged as warnings.
//! No logger is installed by this crate.
//!
//! # Additional
//! The modules do not depend on one another beyond shared path and error helpers

pub mod bath; // Path manipulation
pub mod batom; // Atomic file save
pub mod berms; // Permission strings
pub mod bo; // File write, dummy file
pub mod bormat; // Format string introspection
pub mod bs; // Filesystem create/find/copy/rotate
pub mod misc;
