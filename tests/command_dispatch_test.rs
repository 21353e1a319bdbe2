//! Instant commands and setvars against the Mecer profile.

mod common;

use common::*;
use ups_qproto::conformance::StubTransport;
use ups_qproto::error::{CommandError, UpsError, ValidationError};
use ups_qproto::protocol::{CommandDispatcher, DeviceState, PollMode, Poller, SetVarValidator};

fn acking(commands: &[&str]) -> StubTransport {
    let mut stub = StubTransport::new();
    for command in commands {
        stub.insert(command, "(ACK\r");
    }
    stub
}

#[tokio::test]
async fn test_ack_and_nak() {
    let table = mecer_table();
    let state = DeviceState::new(&table);
    let dispatcher = CommandDispatcher::new(&table, TIMEOUT);

    let mut stub = acking(&["Q\r"]);
    stub.insert("T\r", "(NAK\r");

    dispatcher
        .execute(&mut stub, &state, "beeper.toggle", None)
        .await
        .unwrap();

    let err = dispatcher
        .execute(&mut stub, &state, "test.battery.start.quick", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UpsError::Command(CommandError::Rejected { ref command }) if command == "T\r"
    ));
    assert_eq!(stub.sent(), &[b"Q\r".to_vec(), b"T\r".to_vec()]);
}

#[tokio::test]
async fn test_battery_test_duration_in_minutes() {
    let table = mecer_table();
    let state = DeviceState::new(&table);
    let dispatcher = CommandDispatcher::new(&table, TIMEOUT);
    let mut stub = StubTransport::new();
    stub.insert("T04\r", "(NAK\r");

    let err = dispatcher
        .execute(&mut stub, &state, "test.battery.start", Some(240.0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UpsError::Command(CommandError::Rejected { .. })
    ));
    assert_eq!(stub.count("T04\r"), 1);

    let err = dispatcher
        .execute(&mut stub, &state, "test.battery.start", Some(30.0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UpsError::Validation(ValidationError::OutOfRange { .. })
    ));
    assert_eq!(stub.calls(), 1);
}

#[tokio::test]
async fn test_unexpected_or_missing_reply_is_no_response() {
    let table = mecer_table();
    let state = DeviceState::new(&table);
    let dispatcher = CommandDispatcher::new(&table, TIMEOUT);

    let mut stub = StubTransport::new();
    stub.insert("CT\r", "(215.0 195.0\r");
    let err = dispatcher
        .execute(&mut stub, &state, "test.battery.stop", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UpsError::Command(CommandError::NoResponse { .. })
    ));

    stub.insert("CT\r", "(ACX\r");
    let err = dispatcher
        .execute(&mut stub, &state, "test.battery.stop", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UpsError::Command(CommandError::NoResponse { .. })
    ));

    // Unknown to the stub: times out.
    let err = dispatcher
        .execute(&mut stub, &state, "test.battery.start.deep", None)
        .await
        .unwrap_err();
    match err {
        UpsError::Command(CommandError::NoResponse { command, detail }) => {
            assert_eq!(command, "TL\r");
            assert!(detail.contains("timed out"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_setvars_reach_shutdown_commands() {
    let table = mecer_table();
    let mut state = DeviceState::new(&table);
    let dispatcher = CommandDispatcher::new(&table, TIMEOUT);
    let setvars = SetVarValidator::new(&table, TIMEOUT);
    let mut stub = acking(&["S02R0005\r", "S.5R0000\r", "S03\r"]);

    // Defaults: 30 s shutdown delay.
    dispatcher
        .execute(&mut stub, &state, "shutdown.stayoff", None)
        .await
        .unwrap();

    setvars
        .set(&mut stub, &mut state, "ups.delay.shutdown", 120.0)
        .await
        .unwrap();
    setvars
        .set(&mut stub, &mut state, "ups.delay.start", 300.0)
        .await
        .unwrap();
    dispatcher
        .execute(&mut stub, &state, "shutdown.return", None)
        .await
        .unwrap();

    setvars
        .set(&mut stub, &mut state, "ups.delay.shutdown", 180.0)
        .await
        .unwrap();
    setvars
        .set(&mut stub, &mut state, "ups.delay.start", 0.0)
        .await
        .unwrap();
    dispatcher
        .execute(&mut stub, &state, "shutdown.return", None)
        .await
        .unwrap();

    assert_eq!(
        stub.sent(),
        &[
            b"S.5R0000\r".to_vec(),
            b"S02R0005\r".to_vec(),
            b"S03\r".to_vec()
        ]
    );
}

#[tokio::test]
async fn test_setvar_quantization_and_reporting() {
    let table = mecer_table();
    let mut state = DeviceState::new(&table);
    let setvars = SetVarValidator::new(&table, TIMEOUT);
    let mut stub = poll_stub(Q1_NORMAL);

    let applied = setvars
        .set(&mut stub, &mut state, "ups.delay.shutdown", 40.0)
        .await
        .unwrap();
    assert_eq!(applied, 36.0);
    let applied = setvars
        .set(&mut stub, &mut state, "ups.delay.start", 299.0)
        .await
        .unwrap();
    assert_eq!(applied, 240.0);
    assert_eq!(stub.calls(), 0);

    let cycle = Poller::new(&table, TIMEOUT)
        .poll(&mut stub, &mut state, PollMode::Full)
        .await
        .unwrap();
    assert_eq!(cycle.get("ups.delay.shutdown").unwrap().to_string(), "36");
    assert_eq!(cycle.get("ups.delay.start").unwrap().to_string(), "240");
}

#[tokio::test]
async fn test_out_of_range_setvar_sends_nothing() {
    let table = mecer_table();
    let mut state = DeviceState::new(&table);
    let setvars = SetVarValidator::new(&table, TIMEOUT);
    let mut stub = StubTransport::new();

    let err = setvars
        .set(&mut stub, &mut state, "ups.delay.start", 600_000.0)
        .await
        .unwrap_err();
    match err {
        UpsError::Validation(ValidationError::OutOfRange {
            name,
            value,
            min,
            max,
        }) => {
            assert_eq!(name, "ups.delay.start");
            assert_eq!(value, 600_000.0);
            assert_eq!((min, max), (0.0, 599_940.0));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(stub.calls(), 0);
    assert_eq!(state.setvar("ups.delay.start"), Some(180.0));

    assert!(matches!(
        setvars.validate("ups.delay.shutdown", 11.9),
        Err(ValidationError::OutOfRange { .. })
    ));
    assert_eq!(setvars.validate("ups.delay.shutdown", 12.0), Ok(12.0));
    assert_eq!(setvars.validate("ups.delay.shutdown", 600.0), Ok(600.0));
}

#[tokio::test]
async fn test_unknown_and_read_only_names() {
    let table = mecer_table();
    let state = DeviceState::new(&table);
    let dispatcher = CommandDispatcher::new(&table, TIMEOUT);
    let setvars = SetVarValidator::new(&table, TIMEOUT);
    let mut stub = StubTransport::new();

    let err = dispatcher
        .execute(&mut stub, &state, "shutdown.reboot", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UpsError::Validation(ValidationError::UnknownVariable(_))
    ));
    assert_eq!(
        setvars.validate("input.voltage", 230.0),
        Err(ValidationError::ReadOnly("input.voltage".into()))
    );
    assert_eq!(
        setvars.validate("beeper.toggle", 1.0),
        Err(ValidationError::UnknownVariable("beeper.toggle".into()))
    );
    assert_eq!(stub.calls(), 0);
}
