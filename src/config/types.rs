//! 配置数据结构定义
//!
//! 所有配置段都有默认值，配置文件可以只写需要覆盖的部分

use crate::manager::{options, ServiceOption, StartPolicy, StopPolicy};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// 主配置结构
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 服务注册配置
    pub service: ServiceConfig,
    /// 示例 HTTP 服务配置
    pub http: HttpConfig,
    /// 日志配置
    pub logging: LoggingConfig,
    /// 停止等待配置
    pub stop: StopConfig,
}

/// 服务注册配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// 服务名称
    pub name: String,
    /// 显示名称
    pub display_name: String,
    /// 服务描述
    pub description: String,
    /// 启动策略
    pub start_policy: StartPolicy,
    /// 依赖的服务
    pub dependencies: Vec<String>,
    /// 启动参数
    pub arguments: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "example-service".to_string(),
            display_name: "Example Windows Service".to_string(),
            description: "An example Windows service".to_string(),
            start_policy: StartPolicy::Automatic,
            dependencies: Vec::new(),
            arguments: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// 转换为注册选项
    pub fn options(&self) -> Vec<ServiceOption> {
        let mut result = vec![
            options::display_name(&self.display_name),
            options::description(&self.description),
            self.start_policy.to_option(),
        ];
        if !self.dependencies.is_empty() {
            result.push(options::dependencies(self.dependencies.iter().cloned()));
        }
        result
    }
}

/// 示例 HTTP 服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// 监听地址，`:8080` 表示监听所有地址
    pub bind_address: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: ":8080".to_string(),
        }
    }
}

impl HttpConfig {
    /// 解析监听地址
    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        let address = self.bind_address.trim();
        let address = if address.starts_with(':') {
            format!("0.0.0.0{address}")
        } else {
            address.to_string()
        };
        address
            .parse()
            .map_err(|e| format!("无效的监听地址 '{}': {e}", self.bind_address))
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 日志文件
    pub file: Option<PathBuf>,
    /// 控制台是否输出JSON
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json: false,
        }
    }
}

/// 停止等待配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    /// 等待服务停止的超时时间（秒）
    pub timeout_seconds: u64,
    /// 状态查询间隔（毫秒）
    pub poll_interval_ms: u64,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 10,
            poll_interval_ms: 300,
        }
    }
}

impl StopConfig {
    pub fn policy(&self) -> StopPolicy {
        StopPolicy {
            timeout: Duration::from_secs(self.timeout_seconds),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

/// 配置验证函数
pub fn validate_config(config: &Config) -> Result<(), String> {
    let name = config.service.name.trim();
    if name.is_empty() {
        return Err("服务名称不能为空".to_string());
    }
    if name.contains(['/', '\\']) {
        return Err(format!("服务名称不能包含 '/' 或 '\\': {name}"));
    }

    if config.stop.poll_interval_ms == 0 {
        return Err("状态查询间隔不能为0".to_string());
    }
    if config.stop.poll_interval_ms > config.stop.timeout_seconds.saturating_mul(1000) {
        return Err("状态查询间隔不能大于停止超时时间".to_string());
    }

    config.http.socket_addr()?;

    let valid_log_levels = ["trace", "debug", "info", "warn", "error", "off"];
    if !valid_log_levels.contains(&config.logging.level.to_ascii_lowercase().as_str()) {
        return Err(format!(
            "无效的日志级别: {}，有效值: {:?}",
            config.logging.level, valid_log_levels
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{RegistrationRequest, StartType};

    #[test]
    fn test_defaults_match_example_service() {
        let config = Config::default();
        assert_eq!(config.service.name, "example-service");
        assert_eq!(config.service.display_name, "Example Windows Service");
        assert_eq!(config.http.socket_addr().unwrap(), "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.stop.policy(), StopPolicy::default());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_names() {
        let mut config = Config::default();
        config.service.name = "  ".to_string();
        assert!(validate_config(&config).is_err());

        config.service.name = "svc/one".to_string();
        assert!(validate_config(&config).is_err());

        config.service.name = r"svc\one".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_poll_interval() {
        let mut config = Config::default();
        config.stop.poll_interval_ms = 0;
        assert!(validate_config(&config).is_err());

        config.stop.poll_interval_ms = 20_000;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_rejects_bad_bind_address() {
        let mut config = Config::default();
        config.http.bind_address = "localhost".to_string();
        assert!(validate_config(&config).is_err());

        config.http.bind_address = "127.0.0.1:9090".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_service_options() {
        let mut service = ServiceConfig::default();
        service.start_policy = StartPolicy::AutomaticDelayed;
        service.dependencies = vec!["Tcpip".to_string()];

        let request = RegistrationRequest::new("app.exe", &service.name).with_options(&service.options());
        assert_eq!(request.display_name, "Example Windows Service");
        assert_eq!(request.start_type, StartType::Automatic);
        assert!(request.delayed_auto_start);
        assert_eq!(request.dependencies, vec!["Tcpip".to_string()]);
    }
}
