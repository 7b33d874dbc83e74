use fsmonitor::Settings;
use std::env;
use tempfile::TempDir;

// Single test: environment variables are process-wide.
#[test]
fn test_env_overrides_file_and_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("settings.toml");
    std::fs::write(
        &config_path,
        r#"
[monitor]
settle_ms = 250
poll_interval_ms = 3000

[server]
hash_block_size = 4096
"#,
    )
    .unwrap();

    unsafe {
        // Double underscore separates nested levels
        env::set_var("FSM_SERVER__MAX_CONCURRENT_READS", "3");
        env::set_var("FSM_MONITOR__POLL_INTERVAL_MS", "750");
        env::set_var("FSM_FILTER__HIDDEN_PREFIX", "~");
    }

    let settings = Settings::load_from(&config_path).unwrap();

    unsafe {
        env::remove_var("FSM_SERVER__MAX_CONCURRENT_READS");
        env::remove_var("FSM_MONITOR__POLL_INTERVAL_MS");
        env::remove_var("FSM_FILTER__HIDDEN_PREFIX");
    }

    // Environment wins over the file
    assert_eq!(settings.monitor.poll_interval_ms, 750);
    assert_eq!(settings.server.max_concurrent_reads, 3);
    assert_eq!(settings.filter.hidden_prefix, "~");
    // File wins over defaults
    assert_eq!(settings.monitor.settle_ms, 250);
    assert_eq!(settings.server.hash_block_size, 4096);
    // Untouched values keep their defaults
    assert_eq!(settings.filter.transient_names, vec!["untitled folder"]);
    assert_eq!(settings.monitor.event_channel_capacity, 100);
}
