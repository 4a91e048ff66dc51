use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub delays: DelayConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    /// 读取配置文件，文件不存在时使用默认值；随后用环境变量覆盖密钥类配置
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = config_path.unwrap_or_else(|| Path::new("config.toml"));
        let mut cfg = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
            toml::from_str::<AppConfig>(&raw)
                .with_context(|| format!("解析配置文件失败: {}", path.display()))?
        } else {
            AppConfig::default()
        };
        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    /// 环境变量优先于配置文件
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SUPABASE_URL") {
            self.storage.supabase_url = Some(url);
        }
        if let Some(key) = lookup("SUPABASE_SERVICE_ROLE_KEY").or_else(|| lookup("SUPABASE_ANON_KEY"))
        {
            self.storage.supabase_key = Some(key);
        }
    }
}

// ============================================================================
// 站点
// ============================================================================

#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_notebooks_path")]
    pub notebooks_path: String,
}

impl SiteConfig {
    pub fn login_url(&self) -> String {
        format!("{}{}", self.base_url, self.login_path)
    }

    pub fn notebooks_url(&self) -> String {
        format!("{}{}", self.base_url, self.notebooks_path)
    }

    pub fn notebook_url(&self, notebook_id: &str) -> String {
        format!("{}/questoes/cadernos/{}/caderno", self.base_url, notebook_id)
    }

    pub fn cookie_domain(&self) -> String {
        let host = self
            .base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("www.");
        format!(".{}", host.trim_end_matches('/'))
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            login_path: default_login_path(),
            notebooks_path: default_notebooks_path(),
        }
    }
}

fn default_base_url() -> String {
    "https://www.tecconcursos.com.br".to_string()
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_notebooks_path() -> String {
    "/questoes/pastas".to_string()
}

// ============================================================================
// 浏览器
// ============================================================================

#[derive(Debug, Deserialize, Clone)]
pub struct BrowserSettings {
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub executable: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            user_agent: default_user_agent(),
            executable: None,
        }
    }
}

fn default_headless() -> bool {
    true
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

// ============================================================================
// 上限、超时与重试
// ============================================================================

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_notebook_ceiling")]
    pub notebook_ceiling: u32,
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,
    #[serde(default = "default_extraction_timeout_secs")]
    pub extraction_timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_login_attempts")]
    pub login_attempts: u32,
}

impl LimitsConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            notebook_ceiling: default_notebook_ceiling(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            extraction_timeout_secs: default_extraction_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            login_attempts: default_login_attempts(),
        }
    }
}

fn default_notebook_ceiling() -> u32 {
    30_000
}

fn default_navigation_timeout_secs() -> u64 {
    30
}

fn default_extraction_timeout_secs() -> u64 {
    15
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    2_000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_login_attempts() -> u32 {
    2
}

// ============================================================================
// 各步骤之间的等待
// ============================================================================

#[derive(Debug, Deserialize, Clone)]
pub struct DelayConfig {
    #[serde(default = "default_after_login_ms")]
    pub after_login_ms: u64,
    #[serde(default = "default_after_page_load_ms")]
    pub after_page_load_ms: u64,
    #[serde(default = "default_between_pages_ms")]
    pub between_pages_ms: u64,
    #[serde(default = "default_between_notebooks_ms")]
    pub between_notebooks_ms: u64,
}

impl DelayConfig {
    /// 测试用，所有等待为 0
    #[cfg(test)]
    pub fn none() -> Self {
        Self {
            after_login_ms: 0,
            after_page_load_ms: 0,
            between_pages_ms: 0,
            between_notebooks_ms: 0,
        }
    }
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            after_login_ms: default_after_login_ms(),
            after_page_load_ms: default_after_page_load_ms(),
            between_pages_ms: default_between_pages_ms(),
            between_notebooks_ms: default_between_notebooks_ms(),
        }
    }
}

fn default_after_login_ms() -> u64 {
    3_000
}

fn default_after_page_load_ms() -> u64 {
    2_000
}

fn default_between_pages_ms() -> u64 {
    500
}

fn default_between_notebooks_ms() -> u64 {
    5_000
}

// ============================================================================
// Worker
// ============================================================================

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_start_stagger_secs")]
    pub start_stagger_secs: u64,
    #[serde(default = "default_cookies_dir")]
    pub cookies_dir: PathBuf,
    #[serde(default = "default_cron_hours")]
    pub default_cron_hours: u32,
    #[serde(default = "default_exclude_outdated")]
    pub exclude_outdated: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            start_stagger_secs: default_start_stagger_secs(),
            cookies_dir: default_cookies_dir(),
            default_cron_hours: default_cron_hours(),
            exclude_outdated: default_exclude_outdated(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

fn default_start_stagger_secs() -> u64 {
    0
}

fn default_cookies_dir() -> PathBuf {
    PathBuf::from("cookies")
}

fn default_cron_hours() -> u32 {
    24
}

fn default_exclude_outdated() -> bool {
    true
}

// ============================================================================
// 存储 (Supabase PostgREST)
// ============================================================================

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub supabase_url: Option<String>,
    #[serde(default)]
    pub supabase_key: Option<String>,
    #[serde(default)]
    pub tables: TableNames,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TableNames {
    #[serde(default = "default_questions_table")]
    pub questions: String,
    #[serde(default = "default_commands_table")]
    pub commands: String,
    #[serde(default = "default_progress_table")]
    pub progress: String,
    #[serde(default = "default_accounts_table")]
    pub accounts: String,
    #[serde(default = "default_notebooks_table")]
    pub notebooks: String,
    #[serde(default = "default_logs_table")]
    pub logs: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            questions: default_questions_table(),
            commands: default_commands_table(),
            progress: default_progress_table(),
            accounts: default_accounts_table(),
            notebooks: default_notebooks_table(),
            logs: default_logs_table(),
        }
    }
}

fn default_questions_table() -> String {
    "questoes_concurso".to_string()
}

fn default_commands_table() -> String {
    "tec_scraper_commands".to_string()
}

fn default_progress_table() -> String {
    "tec_scraper_worker_state".to_string()
}

fn default_accounts_table() -> String {
    "tec_accounts".to_string()
}

fn default_notebooks_table() -> String {
    "tec_cadernos".to_string()
}

fn default_logs_table() -> String {
    "tec_scraping_logs".to_string()
}
