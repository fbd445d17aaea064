//! Windows服务管理器
//!
//! 基于 Service Control Manager 的 [`ServiceControlManager`] 实现

use crate::error::{Result, WinsvcError};
use crate::eventlog;
use crate::manager::client::{ManagerConnection, ServiceControlManager};
use crate::manager::{RegistrationRequest, ServiceCommand, StartType};
use std::ffi::{OsStr, OsString};
use tracing::{debug, error};
use windows_service::service::{
    ServiceAccess, ServiceDependency, ServiceErrorControl, ServiceInfo, ServiceStartType,
    ServiceType,
};
use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};
use windows_service::ParseRawError;

const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;
const ERROR_SERVICE_EXISTS: i32 = 1073;

/// Windows服务管理器
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsManager;

impl WindowsManager {
    /// 创建新的Windows服务管理器
    pub fn new() -> Self {
        debug!("Windows服务管理器初始化");
        Self
    }
}

impl ServiceControlManager for WindowsManager {
    type Connection = WindowsConnection;

    fn connect(&self) -> Result<Self::Connection> {
        let manager = ServiceManager::local_computer(
            None::<&str>,
            ServiceManagerAccess::CONNECT | ServiceManagerAccess::CREATE_SERVICE,
        )
        .map_err(|e| WinsvcError::Manager(format!("无法连接到服务管理器: {e}")))?;
        Ok(WindowsConnection { manager })
    }

    fn install_event_source(&self, name: &str) -> Result<()> {
        eventlog::windows::install_event_source(name)
    }

    fn remove_event_source(&self, name: &str) -> Result<()> {
        eventlog::windows::remove_event_source(name)
    }
}

/// Service Control Manager 连接，drop 时关闭句柄
pub struct WindowsConnection {
    manager: ServiceManager,
}

impl WindowsConnection {
    fn open(&self, name: &str, access: ServiceAccess) -> Result<windows_service::service::Service> {
        self.manager
            .open_service(name, access)
            .map_err(|e| map_open_error(name, e))
    }
}

impl ManagerConnection for WindowsConnection {
    fn exists(&self, name: &str) -> Result<bool> {
        match self.manager.open_service(name, ServiceAccess::QUERY_STATUS) {
            Ok(_service) => Ok(true),
            Err(e) if os_error(&e) == Some(ERROR_SERVICE_DOES_NOT_EXIST) => Ok(false),
            Err(e) => Err(WinsvcError::Manager(format!("无法打开服务 {name}: {e}"))),
        }
    }

    fn create(&self, request: &RegistrationRequest) -> Result<()> {
        let info = ServiceInfo {
            name: OsString::from(&request.name),
            display_name: OsString::from(&request.display_name),
            service_type: ServiceType::OWN_PROCESS,
            start_type: start_type(request.start_type),
            error_control: ServiceErrorControl::Normal,
            executable_path: request.executable_path.clone(),
            launch_arguments: request.launch_arguments.iter().map(OsString::from).collect(),
            dependencies: request
                .dependencies
                .iter()
                .map(|name| ServiceDependency::Service(OsString::from(name)))
                .collect(),
            account_name: None, // LocalSystem
            account_password: None,
        };

        let service = self
            .manager
            .create_service(
                &info,
                ServiceAccess::CHANGE_CONFIG | ServiceAccess::DELETE | ServiceAccess::QUERY_STATUS,
            )
            .map_err(|e| match os_error(&e) {
                Some(ERROR_SERVICE_EXISTS) => WinsvcError::AlreadyExists {
                    name: request.name.clone(),
                },
                _ => WinsvcError::Manager(format!("创建服务失败: {e}")),
            })?;

        let configured = (|| -> windows_service::Result<()> {
            if !request.description.is_empty() {
                service.set_description(&request.description)?;
            }
            if request.delayed_auto_start {
                service.set_delayed_auto_start(true)?;
            }
            Ok(())
        })();

        if let Err(e) = configured {
            if let Err(rollback) = service.delete() {
                error!("回滚服务 {} 失败: {}", request.name, rollback);
            }
            return Err(WinsvcError::Manager(format!("配置服务失败: {e}")));
        }

        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.open(name, ServiceAccess::DELETE)?
            .delete()
            .map_err(|e| WinsvcError::Manager(format!("删除服务失败: {e}")))
    }

    fn start(&self, name: &str, arguments: &[String]) -> Result<()> {
        let arguments: Vec<&OsStr> = arguments.iter().map(OsStr::new).collect();
        self.open(name, ServiceAccess::START)?
            .start(&arguments)
            .map_err(|e| WinsvcError::StartFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    fn control(&self, name: &str, command: ServiceCommand) -> Result<u32> {
        let access = match command {
            ServiceCommand::Stop => ServiceAccess::STOP | ServiceAccess::QUERY_STATUS,
            ServiceCommand::Pause | ServiceCommand::Continue => {
                ServiceAccess::PAUSE_CONTINUE | ServiceAccess::QUERY_STATUS
            }
            ServiceCommand::Interrogate => ServiceAccess::INTERROGATE | ServiceAccess::QUERY_STATUS,
        };
        let service = self.open(name, access)?;

        let status = match command {
            ServiceCommand::Stop => service.stop(),
            ServiceCommand::Pause => service.pause(),
            ServiceCommand::Continue => service.resume(),
            ServiceCommand::Interrogate => service.query_status(),
        }
        .map_err(|e| map_status_error(name, &format!("{command:?}"), e))?;

        Ok(status.current_state as u32)
    }

    fn query(&self, name: &str) -> Result<u32> {
        let status = self
            .open(name, ServiceAccess::QUERY_STATUS)?
            .query_status()
            .map_err(|e| map_status_error(name, "query", e))?;
        Ok(status.current_state as u32)
    }
}

fn start_type(start_type: StartType) -> ServiceStartType {
    match start_type {
        StartType::Boot => ServiceStartType::BootStart,
        StartType::System => ServiceStartType::SystemStart,
        StartType::Automatic => ServiceStartType::AutoStart,
        StartType::OnDemand => ServiceStartType::OnDemand,
        StartType::Disabled => ServiceStartType::Disabled,
    }
}

fn os_error(error: &windows_service::Error) -> Option<i32> {
    match error {
        windows_service::Error::Winapi(io) => io.raw_os_error(),
        _ => None,
    }
}

fn map_open_error(name: &str, error: windows_service::Error) -> WinsvcError {
    match os_error(&error) {
        Some(ERROR_SERVICE_DOES_NOT_EXIST) => WinsvcError::service_not_found(name),
        _ => WinsvcError::Manager(format!("无法访问服务 {name}: {error}")),
    }
}

fn map_status_error(name: &str, action: &str, error: windows_service::Error) -> WinsvcError {
    match error {
        windows_service::Error::ParseValue(_, ParseRawError::InvalidInteger(raw)) => {
            WinsvcError::UnknownState { raw }
        }
        other => WinsvcError::Manager(format!("服务 {name} 执行 {action} 失败: {other}")),
    }
}
