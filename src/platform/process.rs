//! 进程快照
//!
//! 服务进程由服务控制管理器 services.exe 创建，通过父进程判断是否以服务方式启动。

#[cfg(windows)]
use crate::error::{Result, WinsvcError};

/// 服务控制管理器的可执行文件名
pub const SERVICE_CONTROL_MANAGER_EXE: &str = "services.exe";

/// 快照中的一个进程
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub parent_pid: u32,
    pub exe_name: String,
}

impl ProcessEntry {
    pub fn is_service_control_manager(&self) -> bool {
        self.exe_name.eq_ignore_ascii_case(SERVICE_CONTROL_MANAGER_EXE)
    }
}

/// 在快照中查找 `pid` 的父进程
pub fn parent_of(entries: &[ProcessEntry], pid: u32) -> Option<&ProcessEntry> {
    let parent_pid = entries.iter().find(|entry| entry.pid == pid)?.parent_pid;
    entries.iter().find(|entry| entry.pid == parent_pid)
}

/// 当前系统的进程快照
#[cfg(windows)]
pub fn snapshot() -> Result<Vec<ProcessEntry>> {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
        TH32CS_SNAPPROCESS,
    };

    let handle = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }
        .map_err(|e| WinsvcError::Manager(format!("创建进程快照失败: {e}")))?;

    let mut entries = Vec::new();
    let mut entry = PROCESSENTRY32W {
        dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
        ..Default::default()
    };
    let mut next = unsafe { Process32FirstW(handle, &mut entry) };
    while next.is_ok() {
        let len = entry
            .szExeFile
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(entry.szExeFile.len());
        entries.push(ProcessEntry {
            pid: entry.th32ProcessID,
            parent_pid: entry.th32ParentProcessID,
            exe_name: String::from_utf16_lossy(&entry.szExeFile[..len]),
        });
        next = unsafe { Process32NextW(handle, &mut entry) };
    }

    if let Err(e) = unsafe { CloseHandle(handle) } {
        tracing::warn!("关闭进程快照失败: {e}");
    }
    Ok(entries)
}
