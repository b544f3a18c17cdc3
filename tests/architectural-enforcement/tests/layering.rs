//! Integration Test: Core Layering
//!
//! **Policy**: `geotrack-core` is a headless library. It logs through
//! `tracing` only, never installs a subscriber, never parses a command line,
//! and propagates errors instead of panicking.

use std::fs;

use architectural_enforcement::{report, scan, workspace_root};

const CORE_SRC: [&str; 1] = ["geotrack/core/src"];

/// Binary-only crates that must stay out of the core's dependencies
const BINARY_ONLY: [&str; 3] = ["clap", "tracing-subscriber", "anyhow"];

#[test]
fn test_core_has_no_binary_dependencies() {
    let manifest = fs::read_to_string(workspace_root().join("geotrack/core/Cargo.toml"))
        .expect("core manifest should be readable");

    let dependencies: Vec<&str> = manifest
        .lines()
        .skip_while(|line| line.trim() != "[dependencies]")
        .skip(1)
        .take_while(|line| !line.trim_start().starts_with('['))
        .filter_map(|line| line.split('=').next())
        .map(str::trim)
        .filter(|name| !name.is_empty() && !name.starts_with('#'))
        .collect();

    assert!(!dependencies.is_empty(), "core should declare dependencies");
    for crate_name in BINARY_ONLY {
        assert!(
            !dependencies.contains(&crate_name),
            "geotrack-core must not depend on {crate_name}"
        );
    }
}

#[test]
fn test_core_does_not_print() {
    let violations = scan(&CORE_SRC, |_, _, _, code| {
        code.contains("println!") || code.contains("eprintln!")
    });

    report("Core logs through tracing, never stdout/stderr", &violations);
}

#[test]
fn test_core_does_not_install_subscriber() {
    let violations = scan(&CORE_SRC, |_, _, _, code| code.contains("tracing_subscriber"));

    report("Only binaries install a tracing subscriber", &violations);
}

#[test]
fn test_no_unwrap_in_production_code() {
    let violations = scan(
        &["geotrack/core/src", "geotrack/daemon/src"],
        |_, _, _, code| code.contains(".unwrap()") || code.contains(".expect("),
    );

    report("Production code propagates errors", &violations);
}
