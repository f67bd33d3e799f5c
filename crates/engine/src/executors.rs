use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info};

use timer_core::{TaskDefinition, TaskExecutor, TimerError, TimerResult};

/// Shell任务执行器
///
/// 通过 `sh -c` 运行任务属性中的 `command`。可选属性:
/// `working_dir` 指定工作目录, `env.` 前缀的属性注入为环境变量。
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskExecutor for ShellExecutor {
    fn name(&self) -> &str {
        "shell"
    }

    async fn execute(&self, task: &TaskDefinition) -> TimerResult<()> {
        let command = task
            .properties
            .get("command")
            .ok_or_else(|| {
                TimerError::TaskExecution(format!("任务 '{}' 缺少 command 属性", task.name))
            })?;

        info!("执行Shell任务: task={}, command={}", task.name, command);

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(dir) = task.properties.get("working_dir") {
            cmd.current_dir(dir);
        }
        for (key, value) in &task.properties {
            if let Some(var) = key.strip_prefix("env.") {
                cmd.env(var, value);
            }
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| TimerError::TaskExecution(format!("启动Shell命令失败: {e}")))?;

        if output.status.success() {
            info!("Shell任务执行完成: task={}", task.name);
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = format!(
                "命令执行失败, 退出码: {:?}, stderr: {}",
                output.status.code(),
                stderr.trim()
            );
            error!("Shell任务执行失败: task={}, {}", task.name, message);
            Err(TimerError::TaskExecution(message))
        }
    }
}

/// HTTP任务执行器
///
/// 按任务属性发起HTTP请求: `url` 必填, `method` 默认GET,
/// `body` 可选, `header.` 前缀的属性作为请求头。非2xx视为失败。
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskExecutor for HttpExecutor {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(&self, task: &TaskDefinition) -> TimerResult<()> {
        let url = task.properties.get("url").ok_or_else(|| {
            TimerError::TaskExecution(format!("任务 '{}' 缺少 url 属性", task.name))
        })?;
        let method = task
            .properties
            .get("method")
            .map(String::as_str)
            .unwrap_or("GET");

        info!("执行HTTP任务: task={}, method={}, url={}", task.name, method, url);

        let mut request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            "PATCH" => self.client.patch(url),
            "HEAD" => self.client.head(url),
            other => {
                return Err(TimerError::TaskExecution(format!(
                    "不支持的HTTP方法: {other}"
                )));
            }
        };
        for (key, value) in &task.properties {
            if let Some(header) = key.strip_prefix("header.") {
                request = request.header(header, value);
            }
        }
        if let Some(body) = task.properties.get("body") {
            request = request.body(body.clone());
        }

        let response = request
            .send()
            .await
            .map_err(|e| TimerError::TaskExecution(format!("HTTP请求失败: {e}")))?;

        let status = response.status();
        if status.is_success() {
            info!("HTTP任务执行完成: task={}, status={}", task.name, status.as_u16());
            Ok(())
        } else {
            let message = format!("HTTP请求失败, 状态码: {}", status.as_u16());
            error!("HTTP任务执行失败: task={}, {}", task.name, message);
            Err(TimerError::TaskExecution(message))
        }
    }
}

/// 执行器注册表
///
/// 构建期注册、运行期只读。任务定义里的 executor 字段按
/// 执行器的 name() 解析。
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// 携带内置执行器(shell与http)的注册表
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ShellExecutor::new()));
        registry.register(Arc::new(HttpExecutor::new()));
        registry
    }

    /// 注册执行器, 同名覆盖旧注册
    pub fn register(&mut self, executor: Arc<dyn TaskExecutor>) {
        let name = executor.name().to_string();
        info!("注册执行器: {}", name);
        self.executors.insert(name, executor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(name).cloned()
    }

    pub fn resolve(&self, name: &str) -> TimerResult<Arc<dyn TaskExecutor>> {
        self.get(name).ok_or_else(|| TimerError::ExecutorNotFound {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.executors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
