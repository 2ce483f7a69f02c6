use flowdesk::logger::{get_log_file_path, Logger};

#[test]
fn test_in_memory_log_keeps_messages() {
    let logger = Logger::new();
    assert!(logger.is_empty());

    logger.log("Test message".to_string());
    let logs = logger.get_logs();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].contains("Test message"));
}

#[test]
fn test_clones_share_the_same_log() {
    let logger = Logger::new();
    let clone = logger.clone();

    clone.log("Fell back to local cache".to_string());
    assert_eq!(logger.len(), 1);

    logger.clear();
    assert!(clone.is_empty());
}

#[test]
fn test_log_file_path_is_under_app_dir() {
    // No data directory can be resolved without a home directory
    if let Ok(path) = get_log_file_path() {
        assert!(path.ends_with("flowdesk/flowdesk.log"));
    }
}
