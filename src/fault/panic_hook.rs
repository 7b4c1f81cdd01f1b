//! Keeps the most recent panic message for the sidecar
//!
//! The previous hook still runs and unwinding continues as usual, so panics the host catches are
//! unaffected. If the panic ends in an abort, the resulting `SIGABRT` (or fatal-app-exit
//! exception on Windows) is captured like any other fault and its sidecar names the panic.

use super::state::{STATE, WRITE_LOCK};
use std::{
    panic,
    sync::atomic::{AtomicBool, Ordering},
};

static INSTALLED: AtomicBool = AtomicBool::new(false);

pub fn install() {
    if INSTALLED.swap(true, Ordering::AcqRel) {
        return;
    }

    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        previous(info);
        record(&message_of(info));
    }));
}

fn message_of(info: &panic::PanicHookInfo<'_>) -> String {
    let payload = info
        .payload()
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
        .unwrap_or("Box<dyn Any>");
    let message = match info.location() {
        Some(location) => format!("{payload} at {location}"),
        None => payload.to_owned(),
    };
    message.replace(['\r', '\n'], " ")
}

fn record(message: &str) {
    // The panic may have happened while the lock was held on this thread
    if let Ok(_guard) = WRITE_LOCK.try_lock() {
        STATE.panic_message.store(message);
    }
}
