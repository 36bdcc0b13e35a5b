//! Integration Test: Blocking Socket Prohibition
//!
//! **Policy**: Production code in `skylink/core` and `skylink/daemon` MUST NOT
//! use the blocking socket types from `std::net`. Address types such as
//! `SocketAddr` are fine.
//! **Required**: `tokio::net::{TcpStream, TcpListener, UdpSocket}`.

use architectural_enforcement::{scan_production_code, Rule};

const BLOCKING_SOCKETS: Rule = Rule {
    name: "Blocking socket",
    patterns: &[
        "std::net::TcpStream",
        "std::net::TcpListener",
        "std::net::UdpSocket",
        "net::{TcpStream",
        "net::{TcpListener",
        "net::{UdpSocket",
    ],
};

const BLOCKING_IO_TRAITS: Rule = Rule {
    name: "Blocking I/O trait",
    patterns: &["use std::io::Read", "use std::io::Write", "std::io::{Read", "std::io::{Write"],
};

#[test]
fn test_no_blocking_sockets_in_production_code() {
    let violations = scan_production_code(&[BLOCKING_SOCKETS, BLOCKING_IO_TRAITS]);

    // tokio re-exports share the `net::{...}` shape
    let violations: Vec<_> = violations
        .into_iter()
        .filter(|v| !v.text.contains("tokio::net"))
        .collect();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::net::TcpStream::connect().await");
        eprintln!("  - tokio::net::UdpSocket::bind().await");
        eprintln!("  - tokio::io::AsyncRead, tokio::io::AsyncWrite");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}
