use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use timer_core::schedule::{parse_offset, ScheduleExpression};
use timer_core::{DispatchMode, NodeAddress, TaskDefinition, TimerError, TimerResult};

use crate::validation::{ConfigValidator, ValidationUtils};

/// 未显式指定配置文件时依次探测的路径
const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/cluster-timer.toml",
    "cluster-timer.toml",
    "/etc/cluster-timer/config.toml",
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cluster: ClusterConfig,
    pub engine: EngineConfig,
    pub observability: ObservabilityConfig,
    pub tasks: Vec<TaskDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// 进程组名称, 同组节点之间竞选主节点
    pub group: String,
    /// 本节点地址, 缺省时由主机名加随机后缀生成
    pub node_address: Option<String>,
    /// 选举策略: lowest_address 或 priority
    pub election_policy: String,
    /// priority 策略下的节点优先级列表, 越靠前越优先
    pub priorities: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            group: "cluster-timer".to_string(),
            node_address: None,
            election_policy: "lowest_address".to_string(),
            priorities: Vec::new(),
        }
    }
}

impl ClusterConfig {
    /// 解析本节点地址; 未配置时生成 "主机名-随机串" 形式的地址
    pub fn resolve_node_address(&self) -> NodeAddress {
        match &self.node_address {
            Some(addr) if !addr.trim().is_empty() => NodeAddress::new(addr.clone()),
            _ => {
                let host = hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| "node".to_string());
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                NodeAddress::new(format!("{host}-{}", &suffix[..8]))
            }
        }
    }
}

impl ConfigValidator for ClusterConfig {
    fn validate(&self) -> TimerResult<()> {
        ValidationUtils::validate_not_empty(&self.group, "cluster.group")?;
        ValidationUtils::validate_choice(
            &self.election_policy,
            "cluster.election_policy",
            &["lowest_address", "priority"],
        )?;
        if self.election_policy == "priority" {
            if self.priorities.is_empty() {
                return Err(TimerError::Configuration(
                    "cluster.priorities 在 priority 策略下不能为空".to_string(),
                ));
            }
            for priority in &self.priorities {
                ValidationUtils::validate_not_empty(priority, "cluster.priorities")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 任务执行体并发上限
    pub worker_pool_size: usize,
    /// 停机时等待任务循环排空的期限
    pub shutdown_timeout_seconds: u64,
    /// 事件分发模式: blocking 或 spawned
    pub dispatch_mode: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            shutdown_timeout_seconds: 30,
            dispatch_mode: "blocking".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    pub fn event_dispatch_mode(&self) -> DispatchMode {
        if self.dispatch_mode == "spawned" {
            DispatchMode::Spawned
        } else {
            DispatchMode::Blocking
        }
    }
}

impl ConfigValidator for EngineConfig {
    fn validate(&self) -> TimerResult<()> {
        ValidationUtils::validate_count(self.worker_pool_size, "engine.worker_pool_size", 1000)?;
        ValidationUtils::validate_timeout_seconds(
            self.shutdown_timeout_seconds,
            "engine.shutdown_timeout_seconds",
        )?;
        ValidationUtils::validate_choice(
            &self.dispatch_mode,
            "engine.dispatch_mode",
            &["blocking", "spawned"],
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式: pretty 或 json
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> TimerResult<()> {
        ValidationUtils::validate_choice(
            &self.log_level,
            "observability.log_level",
            &["trace", "debug", "info", "warn", "error"],
        )?;
        ValidationUtils::validate_choice(
            &self.log_format,
            "observability.log_format",
            &["pretty", "json"],
        )?;
        Ok(())
    }
}

impl AppConfig {
    /// 加载配置: TOML文件(显式路径或默认探测) + TIMER_前缀环境变量覆盖
    pub fn load(config_path: Option<&str>) -> TimerResult<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(TimerError::Configuration(format!("配置文件不存在: {path}")));
            }
        } else {
            for path in DEFAULT_CONFIG_PATHS {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("TIMER")
                .separator("_")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .map_err(|e| TimerError::Configuration(format!("构建配置失败: {e}")))?
            .try_deserialize()
            .map_err(|e| TimerError::Configuration(format!("反序列化配置失败: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> TimerResult<Self> {
        let config: AppConfig = toml::from_str(toml_str)
            .map_err(|e| TimerError::Serialization(format!("解析TOML配置失败: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> TimerResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TimerError::Serialization(format!("序列化配置为TOML失败: {e}")))
    }

    fn validate_tasks(&self) -> TimerResult<()> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            ValidationUtils::validate_not_empty(&task.name, "tasks.name")?;
            ValidationUtils::validate_not_empty(&task.executor, "tasks.executor")?;
            if !seen.insert(task.name.as_str()) {
                return Err(TimerError::Configuration(format!(
                    "任务名称重复: {}",
                    task.name
                )));
            }
            ScheduleExpression::parse(&task.schedule).map_err(|e| {
                TimerError::Configuration(format!("任务 '{}' 的调度表达式无效: {e}", task.name))
            })?;
            parse_offset(&task.timezone).map_err(|e| {
                TimerError::Configuration(format!("任务 '{}' 的时区无效: {e}", task.name))
            })?;
        }
        Ok(())
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> TimerResult<()> {
        self.cluster.validate()?;
        self.engine.validate()?;
        self.observability.validate()?;
        self.validate_tasks()?;
        Ok(())
    }
}

#[cfg(test)]
mod models_tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cluster.group, "cluster-timer");
        assert_eq!(config.cluster.election_policy, "lowest_address");
        assert_eq!(config.engine.worker_pool_size, 4);
        assert_eq!(config.observability.log_format, "pretty");
        assert!(config.tasks.is_empty());
    }

    #[test]
    fn test_from_toml_full_document() {
        let toml_str = r#"
[cluster]
group = "billing"
node_address = "node-a"
election_policy = "priority"
priorities = ["node-a", "node-b"]

[engine]
worker_pool_size = 8
shutdown_timeout_seconds = 10
dispatch_mode = "spawned"

[observability]
log_level = "debug"
log_format = "json"

[[tasks]]
name = "heartbeat"
schedule = "0 * * * * ?"
executor = "shell"

[tasks.properties]
command = "echo ok"

[[tasks]]
name = "report"
schedule = "0 30 8 * * MON-FRI"
timezone = "+08:00"
executor = "http"

[tasks.properties]
url = "http://localhost:9000/report"
method = "POST"
"#;
        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.cluster.group, "billing");
        assert_eq!(config.cluster.priorities.len(), 2);
        assert_eq!(config.engine.worker_pool_size, 8);
        assert_eq!(config.engine.event_dispatch_mode(), DispatchMode::Spawned);
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.tasks.len(), 2);
        assert_eq!(config.tasks[0].name, "heartbeat");
        assert_eq!(
            config.tasks[0].properties.get("command").map(String::as_str),
            Some("echo ok")
        );
        assert_eq!(config.tasks[1].timezone, "+08:00");
        assert!(config.tasks[1].is_enabled());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml("[cluster]\ngroup = \"ops\"\n").unwrap();
        assert_eq!(config.cluster.group, "ops");
        assert_eq!(config.engine.worker_pool_size, 4);
        assert_eq!(config.engine.dispatch_mode, "blocking");
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_rejects_invalid_sections() {
        let mut config = AppConfig::default();
        config.cluster.group = "".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.cluster.election_policy = "dice_roll".to_string();
        assert!(config.validate().is_err());

        // priority 策略必须给出优先级列表
        let mut config = AppConfig::default();
        config.cluster.election_policy = "priority".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.engine.worker_pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.observability.log_format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_invalid_tasks() {
        let mut config = AppConfig::default();
        config.tasks = vec![
            TaskDefinition::new("dup", "* * * * * ?"),
            TaskDefinition::new("dup", "0 * * * * ?"),
        ];
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("重复"), "意外的错误信息: {err}");

        let mut config = AppConfig::default();
        config.tasks = vec![TaskDefinition::new("broken", "* * *")];
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("broken"));

        let mut config = AppConfig::default();
        config.tasks = vec![TaskDefinition::new("tick", "* * * * * ?").with_timezone("火星时间")];
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("tick"));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = AppConfig::default();
        config.cluster.group = "round-trip".to_string();
        config.tasks = vec![TaskDefinition::new("beat", "0 * * * * ?")
            .with_property("command", "date")];

        let rendered = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&rendered).unwrap();
        assert_eq!(parsed.cluster.group, "round-trip");
        assert_eq!(parsed.tasks.len(), 1);
        assert_eq!(parsed.tasks[0].name, "beat");
    }

    #[test]
    fn test_load_reads_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cluster]\ngroup = \"from-file\"").unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.cluster.group, "from-file");
    }

    #[test]
    fn test_load_rejects_missing_file() {
        let err = AppConfig::load(Some("/no/such/config.toml")).unwrap_err();
        assert!(err.to_string().contains("不存在"));
    }

    #[test]
    fn test_resolve_node_address() {
        let mut cluster = ClusterConfig::default();
        cluster.node_address = Some("node-42".to_string());
        assert_eq!(cluster.resolve_node_address().as_str(), "node-42");

        cluster.node_address = None;
        let first = cluster.resolve_node_address();
        let second = cluster.resolve_node_address();
        assert!(!first.as_str().is_empty());
        // 随机后缀保证两次生成的地址不同
        assert_ne!(first, second);
    }
}
