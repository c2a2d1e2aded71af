//! Environment overrides live in their own test binary so the variables
//! they set cannot leak into other tests.

use std::fs;
use std::path::PathBuf;

use audit_ledger::config::{LedgerConfig, WriteMode};
use tempfile::tempdir;

#[test]
fn test_environment_overrides_file_and_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger.toml");
    fs::write(
        &path,
        "ledger_id = \"from-file\"\nbatch_size = 50\nflush_interval_ms = 250\n",
    )
    .unwrap();

    std::env::set_var("AUDIT_LEDGER_BATCH_SIZE", "7");
    std::env::set_var("AUDIT_LEDGER_WRITE_MODE", "async");
    std::env::set_var("AUDIT_LEDGER_STORAGE_DIR", "/var/lib/audit-ledger");

    let config = LedgerConfig::load(Some(&path)).unwrap();
    assert_eq!(config.ledger_id, "from-file");
    assert_eq!(config.flush_interval_ms, 250);
    assert_eq!(config.batch_size, 7);
    assert_eq!(config.write_mode, WriteMode::Async);
    assert_eq!(config.storage_dir, PathBuf::from("/var/lib/audit-ledger"));

    let config = LedgerConfig::load(None).unwrap();
    assert_eq!(config.batch_size, 7);
    assert_eq!(config.queue_capacity, LedgerConfig::default().queue_capacity);
}
