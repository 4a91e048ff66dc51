use chromiumoxide::cdp::browser_protocol::network::{Cookie, CookieParam, TimeSinceEpoch};
use chromiumoxide::{Browser, Page};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::cookies::{CookieStore, StoredCookie};
use super::credential::CredentialResolver;
use super::headless::launch_browser;
use super::scripts;
use crate::app::AppConfig;
use crate::core::ScraperError;
use crate::core::models::{Account, AccountValidity, Credentials, LogLevel};
use crate::storage::log_event;

/// 一个账号的浏览器会话，同一时间最多一个浏览器进程
pub struct BrowserSession {
    config: Arc<AppConfig>,
    account: Account,
    resolver: CredentialResolver,
    cookies: CookieStore,
    browser: Option<Browser>,
    page: Option<Page>,
    handler: Option<JoinHandle<()>>,
}

impl BrowserSession {
    pub fn new(config: Arc<AppConfig>, account_id: &str, resolver: CredentialResolver) -> Self {
        let account = resolver.account(account_id);
        let cookies = CookieStore::new(account.cookies_path.clone());
        Self {
            config,
            account,
            resolver,
            cookies,
            browser: None,
            page: None,
            handler: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.browser.is_some()
    }

    pub fn page(&self) -> Result<&Page, ScraperError> {
        self.page
            .as_ref()
            .ok_or_else(|| ScraperError::Browser("浏览器未启动".to_string()))
    }

    /// 先用 cookie，无效时再用账号密码；成功后保存 cookie
    ///
    /// 已有活动会话时直接返回 false，不会启动第二个浏览器。
    pub async fn login(&mut self) -> bool {
        if self.is_active() {
            warn!("⚠️ 已有活动会话，拒绝重复登录: {}", self.account.id);
            return false;
        }

        info!("🔐 正在登录账号 {}...", self.account.id);
        let result = self.try_login().await;

        let validity = match &result {
            Ok(()) => AccountValidity::Valid,
            Err(ScraperError::LoginFailed(_)) => AccountValidity::Invalid,
            Err(_) => AccountValidity::Unknown,
        };
        if validity != self.account.last_known_validity {
            self.account.last_known_validity = validity;
            let control = self.resolver.control();
            if let Err(e) = control.set_account_validity(&self.account.id, validity).await {
                warn!("更新账号状态失败: {}", e);
            }
            let level = match validity {
                AccountValidity::Invalid => LogLevel::Error,
                _ => LogLevel::Info,
            };
            log_event(
                &**control,
                &self.account.id,
                None,
                level,
                &format!("账号登录状态: {}", validity.as_str()),
            )
            .await;
        }

        match result {
            Ok(()) => {
                info!("✅ 登录成功: {}", self.account.id);
                true
            }
            Err(e) => {
                error!("❌ 登录失败 ({}): {}", self.account.id, e);
                self.close_browser().await;
                false
            }
        }
    }

    async fn try_login(&mut self) -> Result<(), ScraperError> {
        let (browser, page, handler) = launch_browser(&self.config.browser)
            .await
            .map_err(ScraperError::browser)?;
        self.browser = Some(browser);
        self.page = Some(page);
        self.handler = Some(handler);

        let jar = self.cookies.load().unwrap_or_else(|e| {
            warn!("读取 cookie 失败，忽略: {}", e);
            Vec::new()
        });
        if !jar.is_empty() {
            self.restore_cookies(&jar).await?;
            if self.is_authenticated().await? {
                info!("🍪 cookie 仍然有效");
                return Ok(());
            }
            info!("cookie 已失效，改用账号密码登录");
        }

        let creds = match self.resolver.resolve(&self.account.id).await {
            Ok(creds) => creds,
            Err(e) => match self.account.credentials.clone() {
                Some(cached) => {
                    warn!("⚠️ 解析凭据失败 ({})，使用上次的凭据", e);
                    cached
                }
                None => return Err(ScraperError::LoginFailed(e.to_string())),
            },
        };
        self.submit_credentials(&creds).await?;
        self.account.credentials = Some(creds);

        if let Err(e) = self.persist_cookies().await {
            warn!("保存 cookie 失败: {}", e);
        }
        Ok(())
    }

    async fn is_authenticated(&self) -> Result<bool, ScraperError> {
        self.goto(&self.config.site.notebooks_url()).await?;
        let url = self.current_url().await?;
        Ok(!url.contains("/login"))
    }

    async fn submit_credentials(&self, creds: &Credentials) -> Result<(), ScraperError> {
        self.goto(&self.config.site.login_url()).await?;
        self.wait_for_element("#email").await?;

        let page = self.page()?;
        page.find_element("#email")
            .await
            .map_err(ScraperError::browser)?
            .click()
            .await
            .map_err(ScraperError::browser)?
            .type_str(&creds.email)
            .await
            .map_err(ScraperError::browser)?;
        page.find_element("#senha")
            .await
            .map_err(ScraperError::browser)?
            .click()
            .await
            .map_err(ScraperError::browser)?
            .type_str(&creds.password)
            .await
            .map_err(ScraperError::browser)?;
        page.find_element("button[type='submit']")
            .await
            .map_err(ScraperError::browser)?
            .click()
            .await
            .map_err(ScraperError::browser)?;

        self.wait_for_navigation().await;
        sleep(Duration::from_millis(self.config.delays.after_login_ms)).await;

        let url = self.current_url().await?;
        if url.contains("/login") {
            let message: Option<String> = self
                .evaluate(scripts::LOGIN_ERROR_JS, &Value::Null)
                .await
                .unwrap_or(None);
            return Err(ScraperError::LoginFailed(
                message.unwrap_or_else(|| "提交后仍停留在登录页".to_string()),
            ));
        }
        Ok(())
    }

    async fn restore_cookies(&self, jar: &[StoredCookie]) -> Result<(), ScraperError> {
        let mut params = Vec::with_capacity(jar.len());
        for c in jar {
            let mut builder = CookieParam::builder()
                .name(c.name.clone())
                .value(c.value.clone())
                .url(self.config.site.base_url.clone())
                .domain(if c.domain.is_empty() {
                    self.config.site.cookie_domain()
                } else {
                    c.domain.clone()
                })
                .path(c.path.clone())
                .secure(c.secure)
                .http_only(c.http_only);
            if let Some(exp) = c.expires {
                builder = builder.expires(TimeSinceEpoch::new(exp));
            }
            params.push(builder.build().map_err(ScraperError::browser)?);
        }
        self.page()?
            .set_cookies(params)
            .await
            .map_err(ScraperError::browser)?;
        debug!("已恢复 {} 个 cookie", jar.len());
        Ok(())
    }

    async fn persist_cookies(&self) -> anyhow::Result<()> {
        let cookies = self.page()?.get_cookies().await?;
        let stored: Vec<StoredCookie> = cookies.iter().map(stored_cookie).collect();
        self.cookies.save(&stored)
    }

    /// 带超时的导航，成功后等待页面脚本执行
    pub async fn goto(&self, url: &str) -> Result<(), ScraperError> {
        let page = self.page()?;
        let limits = &self.config.limits;
        match timeout(limits.navigation_timeout(), page.goto(url)).await {
            Err(_) => Err(ScraperError::NavigationTimeout {
                url: url.to_string(),
                secs: limits.navigation_timeout_secs,
            }),
            Ok(Err(e)) => Err(ScraperError::browser(e)),
            Ok(Ok(_)) => {
                sleep(Duration::from_millis(self.config.delays.after_page_load_ms)).await;
                Ok(())
            }
        }
    }

    /// 点击后等待跳转，超时不算错误
    pub async fn wait_for_navigation(&self) {
        if let Ok(page) = self.page() {
            let limit = self.config.limits.navigation_timeout();
            if timeout(limit, page.wait_for_navigation()).await.is_err() {
                debug!("等待跳转超时，继续");
            }
        }
    }

    pub async fn current_url(&self) -> Result<String, ScraperError> {
        Ok(self
            .page()?
            .url()
            .await
            .map_err(ScraperError::browser)?
            .unwrap_or_default())
    }

    pub async fn content(&self) -> Result<String, ScraperError> {
        self.page()?.content().await.map_err(ScraperError::browser)
    }

    /// 执行 `(js)(args)` 并反序列化结果
    pub async fn evaluate<T: DeserializeOwned>(&self, js: &str, args: &Value) -> Result<T, ScraperError> {
        let page = self.page()?;
        let limits = &self.config.limits;
        let script = format!("({})({})", js, args);
        let result = timeout(limits.extraction_timeout(), page.evaluate(script))
            .await
            .map_err(|_| ScraperError::NavigationTimeout {
                url: "页面脚本".to_string(),
                secs: limits.extraction_timeout_secs,
            })?
            .map_err(ScraperError::browser)?;
        result.into_value::<T>().map_err(ScraperError::browser)
    }

    async fn wait_for_element(&self, selector: &str) -> Result<(), ScraperError> {
        let page = self.page()?;
        let limits = &self.config.limits;
        let deadline = Instant::now() + limits.navigation_timeout();
        loop {
            if page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ScraperError::NavigationTimeout {
                    url: format!("等待元素 {}", selector),
                    secs: limits.navigation_timeout_secs,
                });
            }
            sleep(Duration::from_millis(250)).await;
        }
    }

    pub async fn close_browser(&mut self) {
        if !self.is_active() {
            return;
        }
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("关闭页面失败: {}", e);
            }
        }
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("关闭浏览器失败: {}，但继续处理", e);
            }
            let _ = browser.wait().await;
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        info!("🔒 浏览器已关闭: {}", self.account.id);
    }
}

fn stored_cookie(c: &Cookie) -> StoredCookie {
    StoredCookie {
        name: c.name.clone(),
        value: c.value.clone(),
        domain: c.domain.clone(),
        path: c.path.clone(),
        expires: if c.session { None } else { Some(c.expires) },
        secure: c.secure,
        http_only: c.http_only,
    }
}
