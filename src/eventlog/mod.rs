//! 事件日志模块
//!
//! 服务运行期间的生命周期记录写入按服务名称打开的事件日志接收端。
//! 服务模式下写入 Windows 事件日志，调试模式下写入控制台（tracing），测试中写入内存。

use crate::error::Result;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

#[cfg(windows)]
pub mod windows;

/// 默认事件ID
pub const DEFAULT_EVENT_ID: u32 = 1;

/// 事件严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// 事件日志接收端
pub trait EventSink: Send + Sync {
    /// 写入一条事件
    fn write(&self, severity: Severity, event_id: u32, message: &str) -> Result<()>;

    fn info(&self, event_id: u32, message: &str) -> Result<()> {
        self.write(Severity::Info, event_id, message)
    }

    fn warning(&self, event_id: u32, message: &str) -> Result<()> {
        self.write(Severity::Warning, event_id, message)
    }

    fn error(&self, event_id: u32, message: &str) -> Result<()> {
        self.write(Severity::Error, event_id, message)
    }
}

/// 按服务名称打开平台事件日志
#[cfg(windows)]
pub fn open_event_log(source: &str) -> Result<Arc<dyn EventSink>> {
    Ok(Arc::new(windows::EventLogSink::open(source)?))
}

/// 按服务名称打开平台事件日志（非Windows系统）
#[cfg(not(windows))]
pub fn open_event_log(source: &str) -> Result<Arc<dyn EventSink>> {
    Err(crate::error::WinsvcError::LogSink(format!(
        "无法打开事件日志 {source}: 仅Windows系统提供事件日志"
    )))
}

/// 控制台事件日志，调试模式使用
#[derive(Debug, Clone)]
pub struct ConsoleSink {
    source: String,
}

impl ConsoleSink {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl EventSink for ConsoleSink {
    fn write(&self, severity: Severity, event_id: u32, message: &str) -> Result<()> {
        match severity {
            Severity::Info => tracing::info!(source = %self.source, event_id, "{message}"),
            Severity::Warning => tracing::warn!(source = %self.source, event_id, "{message}"),
            Severity::Error => tracing::error!(source = %self.source, event_id, "{message}"),
        }
        Ok(())
    }
}

/// 一条已记录的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventEntry {
    pub severity: Severity,
    pub event_id: u32,
    pub message: String,
}

/// 内存事件日志
///
/// 克隆体共享同一份记录，可以在交给服务运行时之后继续检查内容。
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<EventEntry>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已记录的全部事件
    pub fn entries(&self) -> Vec<EventEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 指定级别的事件消息
    pub fn messages(&self, severity: Severity) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.severity == severity)
            .map(|entry| entry.message)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn write(&self, severity: Severity, event_id: u32, message: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(EventEntry {
                severity,
                event_id,
                message: message.to_string(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(not(windows))]
    use crate::error::WinsvcError;

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        let shared = sink.clone();

        sink.info(DEFAULT_EVENT_ID, "starting").unwrap();
        sink.error(7, "failed").unwrap();

        let entries = shared.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].severity, Severity::Info);
        assert_eq!(entries[1].event_id, 7);
        assert_eq!(shared.messages(Severity::Error), vec!["failed".to_string()]);
    }

    #[test]
    fn test_console_sink_accepts_all_levels() {
        let sink = ConsoleSink::new("demo");
        assert!(sink.info(1, "info").is_ok());
        assert!(sink.warning(1, "warning").is_ok());
        assert!(sink.error(1, "error").is_ok());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_event_log_unavailable_off_windows() {
        let err = open_event_log("demo").err().unwrap();
        assert!(matches!(err, WinsvcError::LogSink(_)));
    }
}
