use std::io::Write;

use kiln_config::{BorrowPolicy, ConfigError, DebugTrace, ExclusivityChecking, KilnConfig};

#[test]
fn empty_document_uses_defaults() {
  let config = KilnConfig::from_toml_str("").unwrap();

  assert!(!config.debug);
  assert!(config.debug_trace.is_empty());
  assert_eq!(config.lowering.exclusivity, ExclusivityChecking::Dynamic);
  assert_eq!(config.lowering.borrow_policy, BorrowPolicy::Borrow);
  assert!(config.lowering.verify);
}

#[test]
fn lowering_table_overrides_defaults() {
  let config = KilnConfig::from_toml_str(
    r#"
debug = true
debug_trace = ["ownership", "thunk"]
verbose = 2

[lowering]
exclusivity = "unchecked"
borrow_policy = "always_copy"
verify = false
"#,
  )
  .unwrap();

  assert!(config.debug);
  assert_eq!(config.debug_trace, vec![DebugTrace::Ownership, DebugTrace::Thunk]);
  assert_eq!(config.verbose, 2);
  assert_eq!(config.lowering.exclusivity, ExclusivityChecking::Unchecked);
  assert_eq!(config.lowering.borrow_policy, BorrowPolicy::AlwaysCopy);
  assert!(!config.lowering.verify);
}

#[test]
fn unknown_trace_is_rejected() {
  let err = KilnConfig::from_toml_str(r#"debug_trace = ["codegen"]"#).unwrap_err();
  assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn load_reads_file() {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  writeln!(file, "quiet = true\n[lowering]\nborrow_policy = \"always_copy\"").unwrap();

  let config = KilnConfig::load(file.path()).unwrap();
  assert!(config.quiet);
  assert_eq!(config.lowering.borrow_policy, BorrowPolicy::AlwaysCopy);
}

#[test]
fn load_missing_file_reports_path() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("missing.toml");

  let err = KilnConfig::load(&path).unwrap_err();
  assert!(matches!(err, ConfigError::Io { .. }));
  assert!(err.to_string().contains("missing.toml"));
}
