//! Tests for configuration loading and root folder resolution
//!
//! Covers graceful degradation (missing/malformed TOML never fails) and the
//! root folder priority order.
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate GALLERIA_ROOT_FOLDER are marked with #[serial].

use galleria_common::config::{
    default_root_folder, load_toml_config, write_toml_config, LoggingConfig, RootFolderInitializer,
    RootFolderResolver, TomlConfig, ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_defaults() {
    let config = TomlConfig::default();
    assert!(config.root_folder.is_none());
    assert!(config.gemini_api_key.is_none());
    assert_eq!(config.logging.level, "info");
    assert!(config.logging.file.is_none());
    assert_eq!(config.analysis.model, "gemini-1.5-flash");
    assert_eq!(config.analysis.rate_limit_ms, 1000);
    assert!(config.storage.quota_bytes.is_none());
}

#[test]
fn test_parse_partial_toml_fills_defaults() {
    let toml_str = r#"
        gemini_api_key = "abc123"

        [analysis]
        rate_limit_ms = 250
    "#;
    let config: TomlConfig = toml::from_str(toml_str).unwrap();

    assert_eq!(config.gemini_api_key.as_deref(), Some("abc123"));
    assert_eq!(config.analysis.rate_limit_ms, 250);
    // Untouched fields keep their defaults
    assert_eq!(config.analysis.model, "gemini-1.5-flash");
    assert_eq!(config.analysis.timeout_secs, 60);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_write_then_load_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("sub").join("config.toml");

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/galleria-root")),
        logging: LoggingConfig {
            level: "debug".to_string(),
            file: None,
        },
        gemini_api_key: Some("key-xyz".to_string()),
        storage: galleria_common::config::StorageConfig {
            quota_bytes: Some(5_000_000),
        },
        ..Default::default()
    };

    write_toml_config(&config, &path).unwrap();
    let loaded = load_toml_config(&path).unwrap();

    assert_eq!(loaded.root_folder, config.root_folder);
    assert_eq!(loaded.logging.level, "debug");
    assert_eq!(loaded.gemini_api_key.as_deref(), Some("key-xyz"));
    assert_eq!(loaded.storage.quota_bytes, Some(5_000_000));
}

#[test]
fn test_missing_config_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("does-not-exist.toml");

    let config = TomlConfig::load_or_default(Some(&path));
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_malformed_config_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "this is = = not toml [").unwrap();

    assert!(load_toml_config(&path).is_err());

    let config = TomlConfig::load_or_default(Some(&path));
    assert!(config.gemini_api_key.is_none());
}

#[test]
#[serial]
fn test_resolver_cli_argument_wins() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/galleria-env");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/galleria-toml")),
        ..Default::default()
    };

    let resolver = RootFolderResolver::new(Some(PathBuf::from("/tmp/galleria-cli")), &config);
    assert_eq!(resolver.resolve(), PathBuf::from("/tmp/galleria-cli"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_resolver_env_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/galleria-env");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/galleria-toml")),
        ..Default::default()
    };

    let resolver = RootFolderResolver::new(None, &config);
    assert_eq!(resolver.resolve(), PathBuf::from("/tmp/galleria-env"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_resolver_toml_then_default() {
    env::remove_var(ROOT_FOLDER_ENV);

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/galleria-toml")),
        ..Default::default()
    };
    assert_eq!(
        RootFolderResolver::new(None, &config).resolve(),
        PathBuf::from("/tmp/galleria-toml")
    );

    let resolver = RootFolderResolver::new(None, &TomlConfig::default());
    assert_eq!(resolver.resolve(), default_root_folder());
}

#[test]
fn test_initializer_creates_directory_idempotently() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("galleria");

    let initializer = RootFolderInitializer::new(root.clone());
    assert!(!initializer.database_exists());

    initializer.ensure_directory_exists().unwrap();
    initializer.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
    assert_eq!(initializer.database_path(), root.join("galleria.db"));
}
