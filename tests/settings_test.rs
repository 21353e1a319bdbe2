//! Settings files on disk.

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;
use ups_qproto::config::Settings;
use ups_qproto::error::UpsError;
use ups_qproto::logging::OutputFormat;

fn write_settings(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_bundled_settings_load() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/ups_qproto.toml");
    let settings = Settings::load_from(&path).unwrap();
    assert!(settings.exchange.timeout_ms > 0);
}

#[test]
fn test_partial_file_keeps_defaults() {
    let file = write_settings(
        r#"
[exchange]
timeout_ms = 750
"#,
    );
    let settings = Settings::load_from(file.path()).unwrap();
    assert_eq!(settings.exchange_timeout(), Duration::from_millis(750));
    assert_eq!(settings.logging.format, OutputFormat::Compact);
}

#[test]
fn test_invalid_values_are_rejected() {
    let file = write_settings(
        r#"
[logging]
level = "chatty"
"#,
    );
    assert!(matches!(
        Settings::load_from(file.path()),
        Err(UpsError::Configuration(_))
    ));

    let file = write_settings(
        r#"
[logging]
format = "xml"
"#,
    );
    assert!(matches!(
        Settings::load_from(file.path()),
        Err(UpsError::Config(_))
    ));
}
