//! Forced failures for tests
//!
//! Some failure paths are hard to reach for real: a sidecar that cannot be created while the
//! dump next to it was written fine, a server id that cannot be persisted, a processed dump that
//! refuses to be unlinked. With the `fail-points` feature a test can [`arm`] any of these and
//! the matching code behaves as if the underlying operation failed.
//!
//! Code under test uses two crate-level macros:
//!
//! -   `fail_point_else!(POINT, failed, ok)` evaluates to `failed` while `POINT` is armed and to
//!     `ok` otherwise.
//! -   `fail_point!(POINT, err)` returns `Err(err.into())` while `POINT` is armed.
//!
//! Without the feature both expand to the success path and nothing here is compiled in.
//!
//! Arming hands out an [`ArmedGuard`]. Only one guard exists at a time, so tests in the same
//! binary that arm fail points run one after another, and every point is disarmed when the
//! guard drops.

#[cfg(feature = "fail-points")]
mod active;
#[cfg(feature = "fail-points")]
pub use active::*;

#[cfg(not(feature = "fail-points"))]
mod inactive;
