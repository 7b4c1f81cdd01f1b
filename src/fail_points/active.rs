use bitflags::bitflags;
use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU8, Ordering},
};

bitflags! {
    /// Operations that can be forced to fail
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FailPoints: u8 {
        /// The fault path cannot create `<dump>.txt`
        const SIDECAR_OPEN = 1 << 0;
        /// `server-id.txt` cannot be written
        const SERVER_ID_PERSIST = 1 << 1;
        /// The upload worker cannot unlink a processed dump
        const ARTIFACT_DELETE = 1 << 2;
    }
}

// Checked from signal context, so a bare atomic
static ARMED: AtomicU8 = AtomicU8::new(0);
static ARMING: Mutex<()> = Mutex::new(());

pub fn is_armed(point: FailPoints) -> bool {
    FailPoints::from_bits_retain(ARMED.load(Ordering::Acquire)).contains(point)
}

/// Arms `points` until the returned guard is dropped
///
/// Blocks while another guard is alive.
pub fn arm(points: FailPoints) -> ArmedGuard {
    // A test that panicked while armed still disarmed on drop
    let lock = ARMING.lock().unwrap_or_else(PoisonError::into_inner);
    ARMED.store(points.bits(), Ordering::Release);
    ArmedGuard { _lock: lock }
}

/// Keeps fail points armed, see [`arm`]
#[must_use = "fail points are disarmed as soon as the guard is dropped"]
pub struct ArmedGuard {
    _lock: MutexGuard<'static, ()>,
}

impl ArmedGuard {
    /// Arms `points` in addition to what is already armed
    pub fn also(&self, points: FailPoints) {
        ARMED.fetch_or(points.bits(), Ordering::AcqRel);
    }
}

impl Drop for ArmedGuard {
    fn drop(&mut self) {
        ARMED.store(0, Ordering::Release);
    }
}

#[macro_export]
macro_rules! fail_point_else(($point: ident, $failed: expr, $ok: expr $(,)?) => {{
    if $crate::fail_points::is_armed($crate::fail_points::FailPoints::$point) {
        $failed
    } else {
        $ok
    }
}});

#[macro_export]
macro_rules! fail_point(($point: ident, $err: expr $(,)?) => {{
    if $crate::fail_points::is_armed($crate::fail_points::FailPoints::$point) {
        return Err($err.into());
    }
}});
