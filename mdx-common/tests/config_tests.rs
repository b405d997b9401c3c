//! Configuration loading and root folder priority
//!
//! Tests touching MDX_ROOT_FOLDER / MDX_CONFIG are #[serial] so they never
//! race on the process environment.

use mdx_common::config::{
    load_toml_config, resolve_root_folder, TomlConfig, CONFIG_FILE_ENV, ROOT_FOLDER_ENV,
};
use mdx_common::{LayoutKind, MediaFormat};
use mdx_common::store::ResultEncoding;
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

const FULL_CONFIG: &str = r#"
root_folder = "/srv/mdx"

[storage]
layout = "simple"
result_encoding = "gzip-with-plain"
media_format = "wav"

[logging]
level = "debug"

[server]
bind = "0.0.0.0:9000"
cache_max_age = 60

[batch]
multiprocess = true
max_workers = 4
accelerator_memory_mb = 16000
memory_per_job_mb = 6000
render_backend = "pdf"

[batch.engine]
program = "/usr/local/bin/analyze"
args = ["--model", "harmonix-all"]
timeout_secs = 900
"#;

#[test]
fn tc_config_001_full_file_parses() {
    // Given: a config file with every section
    // When: parsed
    let config: TomlConfig = toml::from_str(FULL_CONFIG).unwrap();

    // Then: every field lands where expected
    assert_eq!(config.root_folder, Some(PathBuf::from("/srv/mdx")));
    assert_eq!(config.storage.layout, LayoutKind::Simple);
    assert_eq!(config.storage.result_encoding, ResultEncoding::GzipWithPlain);
    assert_eq!(config.storage.media_format, MediaFormat::Wav);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.server.cache_max_age, 60);
    assert!(config.batch.multiprocess);
    assert_eq!(config.batch.max_workers, Some(4));
    assert_eq!(config.batch.engine.args, vec!["--model", "harmonix-all"]);
    assert_eq!(config.batch.engine.timeout_secs, Some(900));
    assert!(config.batch.validate().is_ok());
}

#[test]
fn tc_config_002_unknown_encoding_rejected() {
    let result = toml::from_str::<TomlConfig>("[storage]\nresult_encoding = \"zstd\"\n");
    assert!(result.is_err());
}

#[test]
#[serial]
fn tc_config_003_cli_beats_env_and_toml() {
    // Given: all three sources set
    env::set_var(ROOT_FOLDER_ENV, "/from/env");
    let toml: TomlConfig = toml::from_str("root_folder = \"/from/toml\"").unwrap();

    // When: resolving with a CLI argument
    let root = resolve_root_folder(Some(Path::new("/from/cli")), &toml);

    // Then: CLI wins
    assert_eq!(root, PathBuf::from("/from/cli"));
    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn tc_config_004_env_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/from/env");
    let toml: TomlConfig = toml::from_str("root_folder = \"/from/toml\"").unwrap();

    assert_eq!(resolve_root_folder(None, &toml), PathBuf::from("/from/env"));
    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn tc_config_005_toml_then_default() {
    env::remove_var(ROOT_FOLDER_ENV);

    let toml: TomlConfig = toml::from_str("root_folder = \"/from/toml\"").unwrap();
    assert_eq!(resolve_root_folder(None, &toml), PathBuf::from("/from/toml"));

    let fallback = resolve_root_folder(None, &TomlConfig::default());
    assert!(!fallback.as_os_str().is_empty());
    assert!(fallback.ends_with("mdx") || fallback.ends_with("mdx_data"));
}

#[test]
#[serial]
fn tc_config_006_explicit_file_loaded_and_missing_file_fails() {
    env::remove_var(CONFIG_FILE_ENV);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mdx.toml");
    std::fs::write(&path, FULL_CONFIG).unwrap();

    let config = load_toml_config(Some(&path)).unwrap();
    assert_eq!(config.server.bind, "0.0.0.0:9000");

    let missing = dir.path().join("absent.toml");
    assert!(load_toml_config(Some(&missing)).is_err());
}

#[test]
#[serial]
fn tc_config_007_env_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("env.toml");
    std::fs::write(&path, "[server]\ncache_max_age = 5\n").unwrap();
    env::set_var(CONFIG_FILE_ENV, &path);

    let config = load_toml_config(None).unwrap();
    assert_eq!(config.server.cache_max_age, 5);
    env::remove_var(CONFIG_FILE_ENV);
}

#[test]
fn tc_config_008_storage_config_opens_layout() {
    let dir = tempfile::tempdir().unwrap();
    let config: TomlConfig = toml::from_str(FULL_CONFIG).unwrap();

    let storage = config.storage.open(dir.path());
    assert_eq!(storage.layout.kind(), LayoutKind::Simple);
    assert_eq!(storage.layout.media_format(), MediaFormat::Wav);
    assert_eq!(storage.results.encoding(), ResultEncoding::GzipWithPlain);
}
