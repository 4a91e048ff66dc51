use thiserror::Error;

use crate::extract::PageProblem;

/// 抓取流程的错误分类
///
/// 调用方按类别决定处理方式：瞬时错误重试，登录失败终止本轮，
/// 提取错误只影响单道题，持久化错误只影响单条记录。
#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("登录失败: {0}")]
    LoginFailed(String),

    #[error("导航超时 ({secs}s): {url}")]
    NavigationTimeout { url: String, secs: u64 },

    #[error("页面被拦截: {0}")]
    PageBlocked(PageProblem),

    #[error("题目内容为空")]
    ExtractionEmpty,

    #[error("题目模板损坏: {0}")]
    ExtractionCorrupted(String),

    #[error("题目字段不完整: {0}")]
    ExtractionIncomplete(String),

    #[error("caderno {notebook_id} 超出上限: {attempted} > {ceiling}")]
    QuotaExceeded {
        notebook_id: String,
        attempted: u32,
        ceiling: u32,
    },

    #[error("保存题目 {source_id} 失败: {reason}")]
    PersistenceFailure { source_id: String, reason: String },

    #[error("浏览器错误: {0}")]
    Browser(String),

    #[error("存储错误: {0}")]
    Storage(String),
}

impl ScraperError {
    /// 可以按退避策略重试的错误
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScraperError::NavigationTimeout { .. }
                | ScraperError::PageBlocked(_)
                | ScraperError::Browser(_)
        )
    }

    pub fn browser(err: impl std::fmt::Display) -> Self {
        ScraperError::Browser(err.to_string())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        ScraperError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_errors() {
        assert!(ScraperError::NavigationTimeout { url: "x".into(), secs: 30 }.is_transient());
        assert!(ScraperError::PageBlocked(PageProblem::Captcha).is_transient());
        assert!(!ScraperError::LoginFailed("senha".into()).is_transient());
        assert!(!ScraperError::ExtractionEmpty.is_transient());
    }
}
