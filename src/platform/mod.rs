//! 进程环境模块
//!
//! 可执行文件路径解析，以及判断当前进程是否由服务管理器启动

pub mod path;
pub mod process;

pub use path::{app_path, resolve_app_path, DEFAULT_EXE_EXTENSION};

/// 当前进程是否由服务管理器启动
///
/// 需要同时满足：运行在非交互的会话 0 中，且父进程是 services.exe。
/// SSH 会话、计划任务等同样运行在会话 0，只看会话编号会误判。
#[cfg(windows)]
pub fn is_service_mode() -> bool {
    use windows::Win32::System::RemoteDesktop::ProcessIdToSessionId;
    use windows::Win32::System::Threading::GetCurrentProcessId;

    let pid = unsafe { GetCurrentProcessId() };
    let mut session_id = 0u32;
    if let Err(e) = unsafe { ProcessIdToSessionId(pid, &mut session_id) } {
        tracing::debug!("查询会话编号失败: {e}");
        return false;
    }
    if session_id != 0 {
        return false;
    }

    match process::snapshot() {
        Ok(entries) => {
            process::parent_of(&entries, pid).is_some_and(process::ProcessEntry::is_service_control_manager)
        }
        Err(e) => {
            tracing::debug!("{e}");
            false
        }
    }
}

/// 当前进程是否由服务管理器启动（非Windows系统）
#[cfg(not(windows))]
pub fn is_service_mode() -> bool {
    false
}

/// 当前进程是否运行在交互会话中
pub fn is_interactive_session() -> bool {
    !is_service_mode()
}
