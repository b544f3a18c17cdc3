//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async functions MUST NOT use blocking I/O.
//! **Required**: `tokio::fs`, `tokio::net`, `tokio::io`, async `reqwest`.
//! **Acceptable**: Blocking calls in non-async functions (e.g. reading the
//! config file before tracking starts) and test code.

use architectural_enforcement::{is_in_async_function, report, scan, PRODUCTION_DIRS};

const BLOCKING: [&str; 5] = [
    "std::fs::",
    "std::net::",
    "reqwest::blocking",
    "std::io::stdin()",
    "std::process::Command",
];

#[test]
fn test_no_blocking_io_in_async_functions() {
    let violations = scan(&PRODUCTION_DIRS, |_, lines, idx, code| {
        BLOCKING.iter().any(|pattern| code.contains(pattern)) && is_in_async_function(lines, idx)
    });

    report("All I/O in async functions must be async", &violations);
}

#[test]
fn test_no_blocking_http_client_anywhere() {
    let violations = scan(&PRODUCTION_DIRS, |_, _, _, code| {
        code.contains("reqwest::blocking")
    });

    report("Uploads use the async HTTP client", &violations);
}
