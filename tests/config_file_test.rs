// Integration test for configuration file support

use clap::Parser;
use memmon::cli::Cli;
use memmon::config::SamplerKind;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const MB: u64 = 1024 * 1024;

fn cli_with_config(path: &Path, extra: &[&str]) -> Cli {
    let mut args = vec!["memmon", "--config", path.to_str().unwrap()];
    args.extend_from_slice(extra);
    Cli::try_parse_from(args).unwrap()
}

#[test]
fn test_toml_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("memmon.toml");

    let toml_content = r#"
        cumulative = true
        any = "1GB"
        cooldown = "5m"
        name = "web-watchdog"
        sampler = "sysinfo"

        [programs]
        web = "200MB"
        "batch:importer" = 1048576

        [groups]
        workers = "100MB"
    "#;
    fs::write(&config_path, toml_content).unwrap();

    let config = cli_with_config(&config_path, &[]).watchdog_config().unwrap();
    assert!(config.cumulative);
    assert_eq!(config.thresholds.program_limit("web"), Some(200 * MB));
    assert_eq!(config.thresholds.program_limit("batch:importer"), Some(MB));
    assert_eq!(config.thresholds.group_limit("workers"), Some(100 * MB));
    assert_eq!(config.thresholds.any_limit(), Some(1024 * MB));
    assert_eq!(config.cooldown, Duration::from_secs(300));
    assert_eq!(config.name.as_deref(), Some("web-watchdog"));
    assert_eq!(config.sampler, SamplerKind::Sysinfo);
}

#[test]
fn test_json_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("memmon.json");

    let json_content = r#"{
        "programs": {"web": "200MB"},
        "groups": {"workers": 4096},
        "cooldown": 30
    }"#;
    fs::write(&config_path, json_content).unwrap();

    let config = cli_with_config(&config_path, &[]).watchdog_config().unwrap();
    assert!(!config.cumulative);
    assert_eq!(config.thresholds.program_limit("web"), Some(200 * MB));
    assert_eq!(config.thresholds.group_limit("workers"), Some(4096));
    assert_eq!(config.thresholds.any_limit(), None);
    assert_eq!(config.cooldown, Duration::from_secs(30));
    assert_eq!(config.sampler, SamplerKind::Ps);
}

#[test]
fn test_flags_override_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("memmon.toml");

    let toml_content = r#"
        any = "1GB"
        cooldown = "1h"

        [programs]
        web = "200MB"
        api = "50MB"
    "#;
    fs::write(&config_path, toml_content).unwrap();

    let config = cli_with_config(
        &config_path,
        &["-p", "web=300MB", "-a", "2GB", "--cooldown", "0", "-c"],
    )
    .watchdog_config()
    .unwrap();

    assert!(config.cumulative);
    assert_eq!(config.thresholds.program_limit("web"), Some(300 * MB));
    assert_eq!(config.thresholds.program_limit("api"), Some(50 * MB));
    assert_eq!(config.thresholds.any_limit(), Some(2048 * MB));
    assert_eq!(config.cooldown, Duration::ZERO);
}

#[test]
fn test_unknown_key_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("memmon.toml");
    fs::write(&config_path, "any = \"1GB\"\nrestart_delay = 5\n").unwrap();

    let err = cli_with_config(&config_path, &[]).watchdog_config().unwrap_err();
    assert!(err.is_config_error());
}

#[test]
fn test_bad_size_in_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("memmon.toml");
    fs::write(&config_path, "[programs]\nweb = \"lots\"\n").unwrap();

    assert!(cli_with_config(&config_path, &[]).watchdog_config().is_err());
}

#[test]
fn test_unsupported_extension() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("memmon.yaml");
    fs::write(&config_path, "any: 1GB\n").unwrap();

    let err = cli_with_config(&config_path, &[]).watchdog_config().unwrap_err();
    assert!(err.is_config_error());
}

#[test]
fn test_missing_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("absent.toml");

    let err = cli_with_config(&config_path, &["-a", "1GB"])
        .watchdog_config()
        .unwrap_err();
    assert!(err.is_config_error());
}

#[test]
fn test_empty_config_file_needs_a_threshold() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("memmon.toml");
    fs::write(&config_path, "cumulative = true\n").unwrap();

    assert!(cli_with_config(&config_path, &[]).watchdog_config().is_err());
    assert!(cli_with_config(&config_path, &["-g", "workers=10MB"])
        .watchdog_config()
        .is_ok());
}
