//! 日志系统集成测试.
//!
//! tracing 的全局订阅器在进程内只能初始化一次, 因此所有涉及 init() 的断言放在同一个测试中.

use std::fs;
use std::time::Duration;

use musique::logging::{LoggingConfig, current_log_path, init};

#[test]
fn test_logging_文件输出与重复初始化() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let log_dir = dir.path().join("logs");
    let config = LoggingConfig {
        level: "debug".to_string(),
        directory: Some(log_dir.to_string_lossy().to_string()),
        file_prefix: "musique-test".to_string(),
        console: false,
    };

    init(config.clone()).expect("日志初始化失败");
    assert!(log_dir.exists(), "日志目录应该被创建");

    // log 门面的记录经 tracing-log 桥接进入订阅器
    log::info!("来自 log 门面的日志");
    tracing::warn!("来自 tracing 的日志");
    tracing::trace!("低于级别的日志");

    // 给一点时间让非阻塞写线程落盘
    std::thread::sleep(Duration::from_millis(200));

    let today = chrono::Utc::now().date_naive();
    let path = current_log_path(&log_dir, "musique-test", today);
    let content = fs::read_to_string(&path).expect("日志文件应该存在");
    assert!(content.contains("来自 log 门面的日志"));
    assert!(content.contains("来自 tracing 的日志"));
    assert!(!content.contains("低于级别的日志"));
    assert!(content.contains("WARN"));

    assert!(init(config).is_err(), "重复初始化应该失败");
}

#[test]
fn test_logging_配置反序列化() {
    let config: LoggingConfig = serde_json::from_str(
        r#"{"level": "musique_codec=trace", "directory": "logs", "console": false}"#,
    )
    .unwrap();
    assert_eq!(config.level, "musique_codec=trace");
    assert_eq!(config.directory.as_deref(), Some("logs"));
    assert_eq!(config.file_prefix, "musique");
    assert!(!config.console);

    let default = LoggingConfig::default();
    assert_eq!(default.level, "info");
    assert!(default.directory.is_none());
}
