//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT block a runtime thread with
//! `std::thread::sleep`.
//! **Acceptable**: `tokio::time::sleep` for reconnect and retry pauses,
//! `tokio::time::timeout` for bounded waits.

use architectural_enforcement::{scan_production_code, Rule};

const THREAD_SLEEP: Rule = Rule {
    name: "Blocking sleep",
    patterns: &["std::thread::sleep", "thread::sleep("],
};

#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations = scan_production_code(&[THREAD_SLEEP]);

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Thread sleeps found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - tokio::time::sleep between reconnect attempts");
        eprintln!("  - tokio::time::sleep before retrying a queued frame");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - std::thread::sleep anywhere in async code");
        eprintln!("  - Sleep as poor man's synchronization");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}
