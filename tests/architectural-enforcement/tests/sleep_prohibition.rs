//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT sleep to wait for events. State
//! changes arrive as events on the controller queue, and delivery completion
//! is awaited through the pipeline.
//! **Exceptions**: Replay pacing in the daemon, test code.

use architectural_enforcement::{report, scan, PRODUCTION_DIRS};

/// Files where a deliberate pause is part of the behavior
const PACING_ALLOWED: [&str; 1] = ["replay.rs"];

#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations = scan(&PRODUCTION_DIRS, |_, _, _, code| {
        code.contains("thread::sleep")
    });

    report("No blocking sleep in production code", &violations);
}

#[test]
fn test_no_async_sleep_outside_pacing() {
    let violations = scan(&PRODUCTION_DIRS, |path, _, _, code| {
        let allowed = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| PACING_ALLOWED.contains(&name));
        !allowed && code.contains("time::sleep")
    });

    report("No sleep-based waiting in production code", &violations);
}
