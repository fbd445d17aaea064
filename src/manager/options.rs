//! 服务注册选项
//!
//! 每个选项都是作用于 [`RegistrationRequest`] 的纯修改操作，按调用方给出的顺序应用。
//! 修改同一字段的选项后者覆盖前者，依赖选项则是追加。选项之间不做交叉校验，
//! 例如“引导启动 + 延迟标记”这类组合会原样交给注册客户端。

use crate::manager::{RegistrationRequest, StartType};

/// 注册选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceOption {
    /// 设置显示名称
    DisplayName(String),
    /// 设置描述
    Description(String),
    /// 设置启动类型
    StartType(StartType),
    /// 自动启动并设置延迟标记
    AutoDelayStart,
    /// 追加依赖服务
    Dependencies(Vec<String>),
}

impl ServiceOption {
    /// 将选项应用到注册请求
    pub fn apply(&self, request: &mut RegistrationRequest) {
        match self {
            Self::DisplayName(name) => request.display_name = name.clone(),
            Self::Description(description) => request.description = description.clone(),
            Self::StartType(start_type) => request.start_type = *start_type,
            Self::AutoDelayStart => {
                request.start_type = StartType::Automatic;
                request.delayed_auto_start = true;
            }
            Self::Dependencies(names) => request.dependencies.extend(names.iter().cloned()),
        }
    }
}

/// 按顺序应用一组选项
pub fn apply_options(request: &mut RegistrationRequest, options: &[ServiceOption]) {
    for option in options {
        option.apply(request);
    }
}

pub fn display_name(name: impl Into<String>) -> ServiceOption {
    ServiceOption::DisplayName(name.into())
}

pub fn description(description: impl Into<String>) -> ServiceOption {
    ServiceOption::Description(description.into())
}

pub fn on_boot_start() -> ServiceOption {
    ServiceOption::StartType(StartType::Boot)
}

pub fn on_system_start() -> ServiceOption {
    ServiceOption::StartType(StartType::System)
}

pub fn auto_start() -> ServiceOption {
    ServiceOption::StartType(StartType::Automatic)
}

pub fn auto_delay_start() -> ServiceOption {
    ServiceOption::AutoDelayStart
}

pub fn on_demand_start() -> ServiceOption {
    ServiceOption::StartType(StartType::OnDemand)
}

pub fn disabled_start() -> ServiceOption {
    ServiceOption::StartType(StartType::Disabled)
}

/// 追加依赖服务
pub fn dependencies<I, S>(names: I) -> ServiceOption
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ServiceOption::Dependencies(names.into_iter().map(Into::into).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::StartPolicy;

    fn fresh() -> RegistrationRequest {
        RegistrationRequest::new("C:\\svc\\app.exe", "demo")
    }

    #[test]
    fn test_last_start_policy_wins() {
        let request = fresh().with_options(&[auto_start(), on_demand_start()]);
        assert_eq!(request.start_policy(), StartPolicy::OnDemand);
    }

    #[test]
    fn test_dependencies_are_additive() {
        let request = fresh().with_options(&[dependencies(["a"]), dependencies(["b"])]);
        assert_eq!(request.dependencies, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_identity_options_override() {
        let request = fresh().with_options(&[
            display_name("First"),
            description("first"),
            display_name("Second"),
        ]);
        assert_eq!(request.display_name, "Second");
        assert_eq!(request.description, "first");
    }

    #[test]
    fn test_auto_delay_start_sets_both_fields() {
        let request = fresh().with_options(&[on_demand_start(), auto_delay_start()]);
        assert_eq!(request.start_type, StartType::Automatic);
        assert!(request.delayed_auto_start);
        assert_eq!(request.start_policy(), StartPolicy::AutomaticDelayed);
    }

    #[test]
    fn test_conflicting_combination_passes_through() {
        // 延迟标记在引导启动下保持原样，不做纠正
        let request = fresh().with_options(&[auto_delay_start(), on_boot_start()]);
        assert_eq!(request.start_type, StartType::Boot);
        assert!(request.delayed_auto_start);
    }

    #[test]
    fn test_start_policy_round_trips_through_option() {
        for policy in [
            StartPolicy::BootStart,
            StartPolicy::SystemStart,
            StartPolicy::Automatic,
            StartPolicy::AutomaticDelayed,
            StartPolicy::OnDemand,
            StartPolicy::Disabled,
        ] {
            let request = fresh().with_options(&[policy.to_option()]);
            assert_eq!(request.start_policy(), policy);
        }
    }
}
