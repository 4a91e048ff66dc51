use anyhow::{Result, anyhow};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::app::config::BrowserSettings;

/// 启动浏览器并打开一个空白页，返回浏览器、页面和事件处理任务
pub async fn launch_browser(settings: &BrowserSettings) -> Result<(Browser, Page, JoinHandle<()>)> {
    let viewport = Viewport {
        width: 1920,
        height: 1080,
        ..Default::default()
    };

    let mut builder = BrowserConfig::builder()
        .viewport(viewport)
        .arg(format!("--user-agent={}", settings.user_agent))
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--no-sandbox");
    if !settings.headless {
        builder = builder.with_head();
    }
    if let Some(path) = &settings.executable {
        builder = builder.chrome_executable(path);
    }
    let config = builder.build().map_err(|e| anyhow!("浏览器配置错误: {}", e))?;

    let (browser, mut handler) = Browser::launch(config).await?;

    // 后台处理 CDP 事件
    let handle = tokio::task::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    let page = browser.new_page("about:blank").await?;
    page.evaluate_on_new_document(
        "Object.defineProperty(navigator, 'webdriver', { get: () => undefined })",
    )
    .await?;
    debug!("浏览器已启动 (headless={})", settings.headless);

    Ok((browser, page, handle))
}
