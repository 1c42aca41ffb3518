use num_cpus;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{info, warn};
use std::{fs, io, time::Duration};

use crate::exception::Exception;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_www_root")]
    www_root: String,
    #[serde(default = "default_charset")]
    default_charset: String,
    #[serde(default)]
    max_age: u64,
    #[serde(default = "default_worker_threads")]
    worker_threads: usize,
    #[serde(default = "default_queue_capacity")]
    queue_capacity: usize,
    #[serde(default = "default_backlog")]
    backlog: u32,
    #[serde(default = "default_max_header_bytes")]
    max_header_bytes: usize,
    #[serde(default = "default_read_timeout_ms")]
    read_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    request_timeout_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    write_timeout_ms: u64,
    #[serde(default = "default_connection_timeout_ms")]
    connection_timeout_ms: u64,
    #[serde(default = "default_text_types")]
    text_types: Vec<String>,
    #[serde(default = "default_browser_types")]
    browser_types: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_www_root() -> String {
    ".".to_string()
}

fn default_charset() -> String {
    "utf-8".to_string()
}

fn default_worker_threads() -> usize {
    100
}

fn default_queue_capacity() -> usize {
    100
}

fn default_backlog() -> u32 {
    10
}

fn default_max_header_bytes() -> usize {
    16384 // 16KB
}

fn default_read_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    15000
}

fn default_write_timeout_ms() -> u64 {
    5000
}

fn default_connection_timeout_ms() -> u64 {
    60000
}

fn default_text_types() -> Vec<String> {
    vec!["text/.*".to_string(), "application/json".to_string()]
}

fn default_browser_types() -> Vec<String> {
    vec![
        "application/json".to_string(),
        "application/pdf".to_string(),
        "image/.*".to_string(),
        "video/.*".to_string(),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            www_root: default_www_root(),
            default_charset: default_charset(),
            max_age: 0,
            worker_threads: default_worker_threads(),
            queue_capacity: default_queue_capacity(),
            backlog: default_backlog(),
            max_header_bytes: default_max_header_bytes(),
            read_timeout_ms: default_read_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
            text_types: default_text_types(),
            browser_types: default_browser_types(),
        }
    }

    /// 从 TOML 文件读取配置。文件不存在时使用默认配置；文件存在但无法解析时返回错误。
    pub fn from_toml(filename: &str) -> Result<Self, Exception> {
        let str_val = match fs::read_to_string(filename) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("配置文件{}不存在，使用默认配置", filename);
                return Ok(Config::new());
            }
            Err(e) => return Err(e.into()),
        };
        let config = Self::from_toml_str(&str_val)?;
        info!("配置文件{}已载入", filename);
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, Exception> {
        let mut raw_config: Config =
            toml::from_str(s).map_err(|e| Exception::Config(e.to_string()))?;
        if raw_config.worker_threads == 0 {
            raw_config.worker_threads = num_cpus::get();
        }
        if raw_config.queue_capacity == 0 {
            warn!("queue_capacity被设置为0，将改为与worker_threads相同");
            raw_config.queue_capacity = raw_config.worker_threads;
        }
        raw_config.fix_zero_timeouts();
        Ok(raw_config)
    }

    // 套接字不接受长度为0的超时，0一律改回默认值
    fn fix_zero_timeouts(&mut self) {
        let fields: [(&str, &mut u64, fn() -> u64); 4] = [
            ("read_timeout_ms", &mut self.read_timeout_ms, default_read_timeout_ms),
            ("write_timeout_ms", &mut self.write_timeout_ms, default_write_timeout_ms),
            ("request_timeout_ms", &mut self.request_timeout_ms, default_request_timeout_ms),
            (
                "connection_timeout_ms",
                &mut self.connection_timeout_ms,
                default_connection_timeout_ms,
            ),
        ];
        for (name, value, default) in fields {
            if *value == 0 {
                let fallback = default();
                warn!("{}被设置为0，将改为默认值{}", name, fallback);
                *value = fallback;
            }
        }
    }
}

// 测试与嵌入场景下使用的构建方法
impl Config {
    pub fn with_root(mut self, root: &str) -> Self {
        self.www_root = root.to_string();
        self
    }

    pub fn with_address(mut self, host: &str, port: u16) -> Self {
        self.host = host.to_string();
        self.port = port;
        self
    }

    pub fn with_workers(mut self, worker_threads: usize, queue_capacity: usize) -> Self {
        self.worker_threads = worker_threads.max(1);
        self.queue_capacity = queue_capacity.max(1);
        self
    }

    pub fn with_max_age(mut self, max_age: u64) -> Self {
        self.max_age = max_age;
        self
    }

    /// 请求头的字节上限与等待时间。读超时不会超过 `request_timeout_ms`，两者至少为 1 毫秒。
    pub fn with_limits(mut self, max_header_bytes: usize, request_timeout_ms: u64) -> Self {
        self.max_header_bytes = max_header_bytes;
        self.request_timeout_ms = request_timeout_ms.max(1);
        self.read_timeout_ms = self.read_timeout_ms.min(self.request_timeout_ms);
        self
    }

    /// 单个连接从开始处理到写完应答的总时限，至少为 1 毫秒
    pub fn with_connection_timeout(mut self, connection_timeout_ms: u64) -> Self {
        self.connection_timeout_ms = connection_timeout_ms.max(1);
        self
    }
}

impl Config {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn www_root(&self) -> &str {
        &self.www_root
    }

    pub fn default_charset(&self) -> &str {
        &self.default_charset
    }

    pub fn max_age(&self) -> u64 {
        self.max_age
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    pub fn max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn text_types(&self) -> &[String] {
        &self.text_types
    }

    pub fn browser_types(&self) -> &[String] {
        &self.browser_types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.port(), 8080);
        assert_eq!(config.default_charset(), "utf-8");
        assert_eq!(config.worker_threads(), 100);
        assert_eq!(config.backlog(), 10);
        assert_eq!(config.max_age(), 0);
        assert_eq!(config.text_types().len(), 2);
        assert_eq!(config.browser_types().len(), 4);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml_str("port = 9000\nwww_root = \"/srv/www\"\nmax_age = 60\n").unwrap();
        assert_eq!(config.port(), 9000);
        assert_eq!(config.www_root(), "/srv/www");
        assert_eq!(config.max_age(), 60);
        assert_eq!(config.host(), "0.0.0.0");
        assert_eq!(config.request_timeout(), Duration::from_millis(15000));
    }

    #[test]
    fn test_zero_workers_means_cpu_count() {
        let config = Config::from_toml_str("worker_threads = 0\n").unwrap();
        assert_eq!(config.worker_threads(), num_cpus::get());
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let result = Config::from_toml_str("port = \"not a number\"");
        assert!(matches!(result, Err(Exception::Config(_))));
    }

    #[test]
    fn test_zero_timeouts_fall_back_to_defaults() {
        let config = Config::from_toml_str(
            "read_timeout_ms = 0\nwrite_timeout_ms = 0\nrequest_timeout_ms = 0\nconnection_timeout_ms = 0\n",
        )
        .unwrap();
        assert_eq!(config.read_timeout(), Duration::from_millis(5000));
        assert_eq!(config.write_timeout(), Duration::from_millis(5000));
        assert_eq!(config.request_timeout(), Duration::from_millis(15000));
        assert_eq!(config.connection_timeout(), Duration::from_millis(60000));

        let config = Config::from_toml_str("read_timeout_ms = 250\n").unwrap();
        assert_eq!(config.read_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_builders_never_produce_zero_timeouts() {
        let config = Config::new().with_limits(1024, 0).with_connection_timeout(0);
        assert!(!config.request_timeout().is_zero());
        assert!(!config.read_timeout().is_zero());
        assert!(!config.connection_timeout().is_zero());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::from_toml("definitely/not/here.toml").unwrap();
        assert_eq!(config.port(), 8080);
    }
}
