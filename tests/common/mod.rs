//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use ups_qproto::conformance::{Fixture, StubTransport};
use ups_qproto::protocol::DescriptorTable;

pub const Q1_NORMAL: &str = "(215.0 195.0 230.0 014 49.0 22.7 30.0 00000000\r";
pub const F_REPLY: &str = "#230.0 000 024.0 50.0\r";
pub const I_REPLY: &str = "#NOT_A_LIVE_UPS  TESTING    TESTING   \r";

pub const TIMEOUT: Duration = Duration::from_millis(200);

pub fn repo_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(relative)
}

pub fn mecer_table() -> DescriptorTable {
    DescriptorTable::load(&repo_path("profiles/mecer.yaml")).expect("mecer profile loads")
}

pub fn mecer_fixture() -> Fixture {
    Fixture::load(&repo_path("profiles/mecer.fixture.yaml")).expect("mecer fixture loads")
}

/// Stub answering the three poll queries with `q1` as the status reply.
pub fn poll_stub(q1: &str) -> StubTransport {
    let mut stub = StubTransport::new();
    stub.insert("Q1\r", q1);
    stub.insert("F\r", F_REPLY);
    stub.insert("I\r", I_REPLY);
    stub
}

/// Q1 reply with the given status bit pattern (8 characters).
pub fn q1_with_bits(bits: &str) -> String {
    assert_eq!(bits.len(), 8);
    format!("(215.0 195.0 230.0 014 49.0 22.7 30.0 {bits}\r")
}
