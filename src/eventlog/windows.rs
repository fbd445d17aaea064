//! Windows事件日志
//!
//! 事件源注册在 `HKLM\SYSTEM\CurrentControlSet\Services\EventLog\Application` 下，
//! 消息文件使用系统自带的 EventCreate.exe，因此任意文本都能直接显示。

use crate::error::{Result, WinsvcError};
use crate::eventlog::{EventSink, Severity};
use windows::core::{HSTRING, PCWSTR};
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Security::PSID;
use windows::Win32::System::EventLog::{
    DeregisterEventSource, RegisterEventSourceW, ReportEventW, EVENTLOG_ERROR_TYPE,
    EVENTLOG_INFORMATION_TYPE, EVENTLOG_WARNING_TYPE, REPORT_EVENT_TYPE,
};
use windows::Win32::System::Registry::{
    RegCloseKey, RegCreateKeyExW, RegDeleteKeyW, RegSetValueExW, HKEY, HKEY_LOCAL_MACHINE,
    KEY_SET_VALUE, REG_CREATED_NEW_KEY, REG_CREATE_KEY_DISPOSITION, REG_DWORD, REG_EXPAND_SZ,
    REG_OPTION_NON_VOLATILE,
};

const EVENT_LOG_KEY: &str = r"SYSTEM\CurrentControlSet\Services\EventLog\Application";
const EVENT_CREATE_MESSAGE_FILE: &str = r"%SystemRoot%\System32\EventCreate.exe";
/// Error | Warning | Information
const TYPES_SUPPORTED: u32 = 0x0001 | 0x0002 | 0x0004;

/// Windows事件日志接收端，drop 时注销事件源句柄
pub struct EventLogSink {
    handle: HANDLE,
}

// 事件日志句柄可以在线程之间共享使用
unsafe impl Send for EventLogSink {}
unsafe impl Sync for EventLogSink {}

impl EventLogSink {
    /// 按事件源名称打开
    pub fn open(source: &str) -> Result<Self> {
        let source = HSTRING::from(source);
        let handle = unsafe { RegisterEventSourceW(PCWSTR::null(), &source) }
            .map_err(|e| WinsvcError::LogSink(format!("无法打开事件日志 {source}: {e}")))?;
        Ok(Self { handle })
    }
}

impl EventSink for EventLogSink {
    fn write(&self, severity: Severity, event_id: u32, message: &str) -> Result<()> {
        let event_type: REPORT_EVENT_TYPE = match severity {
            Severity::Info => EVENTLOG_INFORMATION_TYPE,
            Severity::Warning => EVENTLOG_WARNING_TYPE,
            Severity::Error => EVENTLOG_ERROR_TYPE,
        };
        let text = HSTRING::from(message);
        let strings = [PCWSTR(text.as_ptr())];

        unsafe {
            ReportEventW(
                self.handle,
                event_type,
                0,
                event_id,
                PSID::default(),
                strings.len() as u16,
                0,
                Some(strings.as_ptr()),
                None,
            )
        }
        .map_err(|e| WinsvcError::LogSink(format!("写入事件日志失败: {e}")))
    }
}

impl Drop for EventLogSink {
    fn drop(&mut self) {
        if let Err(e) = unsafe { DeregisterEventSource(self.handle) } {
            tracing::warn!("关闭事件日志失败: {e}");
        }
    }
}

/// 注册事件源
///
/// 事件源已存在时返回错误。
pub fn install_event_source(source: &str) -> Result<()> {
    let subkey = HSTRING::from(format!(r"{EVENT_LOG_KEY}\{source}"));
    let mut key = HKEY::default();
    let mut disposition = REG_CREATE_KEY_DISPOSITION::default();

    unsafe {
        RegCreateKeyExW(
            HKEY_LOCAL_MACHINE,
            &subkey,
            0,
            PCWSTR::null(),
            REG_OPTION_NON_VOLATILE,
            KEY_SET_VALUE,
            None,
            &mut key,
            Some(&mut disposition),
        )
    }
    .ok()
    .map_err(|e| WinsvcError::LogSink(format!("创建事件源注册表项失败: {e}")))?;

    let result = if disposition != REG_CREATED_NEW_KEY {
        Err(WinsvcError::LogSink(format!("事件日志源已存在: {source}")))
    } else {
        write_source_values(key)
    };

    unsafe {
        let _ = RegCloseKey(key);
    }

    if result.is_err() && disposition == REG_CREATED_NEW_KEY {
        if let Err(e) = unsafe { RegDeleteKeyW(HKEY_LOCAL_MACHINE, &subkey) }.ok() {
            tracing::error!("清理事件源注册表项失败: {e}");
        }
    }

    result
}

fn write_source_values(key: HKEY) -> Result<()> {
    let message_file: Vec<u8> = EVENT_CREATE_MESSAGE_FILE
        .encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect();

    unsafe {
        RegSetValueExW(
            key,
            &HSTRING::from("EventMessageFile"),
            0,
            REG_EXPAND_SZ,
            Some(&message_file),
        )
        .ok()
        .and_then(|_| {
            RegSetValueExW(
                key,
                &HSTRING::from("TypesSupported"),
                0,
                REG_DWORD,
                Some(&TYPES_SUPPORTED.to_le_bytes()),
            )
            .ok()
        })
        .and_then(|_| {
            RegSetValueExW(
                key,
                &HSTRING::from("CustomSource"),
                0,
                REG_DWORD,
                Some(&1u32.to_le_bytes()),
            )
            .ok()
        })
    }
    .map_err(|e| WinsvcError::LogSink(format!("写入事件源注册表值失败: {e}")))
}

/// 移除事件源
pub fn remove_event_source(source: &str) -> Result<()> {
    let subkey = HSTRING::from(format!(r"{EVENT_LOG_KEY}\{source}"));
    unsafe { RegDeleteKeyW(HKEY_LOCAL_MACHINE, &subkey) }
        .ok()
        .map_err(|e| WinsvcError::LogSink(format!("移除事件日志源 {source} 失败: {e}")))
}
