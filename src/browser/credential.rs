use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::core::models::{Account, AccountValidity, Credentials};
use crate::storage::ControlStore;
use crate::utils::text::{env_suffix, sanitize_filename};

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// 账号 id -> 登录凭据 + 专属 cookie 文件
///
/// 凭据在每次登录时重新解析：先看环境变量
/// `TEC_EMAIL_<ID>` / `TEC_PASSWORD_<ID>`，再查账号表。
#[derive(Clone)]
pub struct CredentialResolver {
    control: Arc<dyn ControlStore>,
    cookies_dir: PathBuf,
    env: EnvLookup,
}

impl CredentialResolver {
    pub fn new(control: Arc<dyn ControlStore>, cookies_dir: impl Into<PathBuf>) -> Self {
        Self {
            control,
            cookies_dir: cookies_dir.into(),
            env: Arc::new(|key: &str| std::env::var(key).ok()),
        }
    }

    #[cfg(test)]
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    pub fn account(&self, account_id: &str) -> Account {
        Account {
            id: account_id.to_string(),
            cookies_path: cookie_path(&self.cookies_dir, account_id),
            credentials: None,
            last_known_validity: AccountValidity::Unknown,
        }
    }

    pub async fn resolve(&self, account_id: &str) -> Result<Credentials> {
        let suffix = env_suffix(account_id);
        let email = (self.env)(&format!("TEC_EMAIL_{}", suffix));
        let password = (self.env)(&format!("TEC_PASSWORD_{}", suffix));
        if let (Some(email), Some(password)) = (email, password) {
            if !email.is_empty() && !password.is_empty() {
                debug!("使用环境变量中的凭据: {}", account_id);
                return Ok(Credentials { email, password });
            }
        }

        match self.control.account_credentials(account_id).await? {
            Some(creds) if !creds.email.is_empty() && !creds.password.is_empty() => {
                debug!("使用账号表中的凭据: {}", account_id);
                Ok(creds)
            }
            _ => Err(anyhow!("账号 {} 没有可用的登录凭据", account_id)),
        }
    }

    pub fn control(&self) -> &Arc<dyn ControlStore> {
        &self.control
    }
}

/// 每个账号独占的 cookie 文件
pub fn cookie_path(cookies_dir: &Path, account_id: &str) -> PathBuf {
    cookies_dir.join(format!("{}.json", sanitize_filename(account_id)))
}
