use anyhow::{Result, anyhow};
use scraper::{Html, Selector};
use std::fmt;

use crate::utils::text::{collapse_whitespace, fold_diacritics};

/// 页面无法提取题目的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageProblem {
    /// 题目区域正常
    Clear,
    Cloudflare,
    Captcha,
    LoadingError,
    /// 页面可访问但找不到题目区域
    LayoutChange,
}

impl PageProblem {
    /// 拦截类问题，需要等待后重试
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            PageProblem::Cloudflare | PageProblem::Captcha | PageProblem::LoadingError
        )
    }
}

impl fmt::Display for PageProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PageProblem::Clear => "正常",
            PageProblem::Cloudflare => "Cloudflare 验证",
            PageProblem::Captcha => "验证码",
            PageProblem::LoadingError => "页面加载错误",
            PageProblem::LayoutChange => "页面结构变化",
        };
        f.write_str(label)
    }
}

const CLOUDFLARE_INDICATORS: [&str; 5] = [
    "checking your browser",
    "just a moment",
    "please wait",
    "cf-browser-verification",
    "challenge-platform",
];

const ERROR_KEYWORDS: [&str; 4] = ["erro fatal", "error 500", "error 404", "pagina nao encontrada"];

/// 检查整页 HTML 是否被拦截
pub struct PageInspector {
    question: Selector,
    body: Selector,
    captcha: Vec<Selector>,
}

impl PageInspector {
    pub fn new() -> Result<Self> {
        let parse = |css: &str| {
            Selector::parse(css).map_err(|e| anyhow!("选择器无效 {}: {:?}", css, e))
        };
        Ok(Self {
            question: parse("div.questao-enunciado-texto")?,
            body: parse("body")?,
            captcha: vec![
                parse("iframe[src*='recaptcha']")?,
                parse(".g-recaptcha")?,
                parse("#captcha")?,
            ],
        })
    }

    pub fn inspect(&self, html: &str) -> PageProblem {
        let doc = Html::parse_document(html);
        if doc.select(&self.question).next().is_some() {
            return PageProblem::Clear;
        }

        let raw = html.to_lowercase();
        let text = doc
            .select(&self.body)
            .next()
            .map(|b| collapse_whitespace(&b.text().collect::<Vec<_>>().join(" ")))
            .unwrap_or_default();

        let hits = CLOUDFLARE_INDICATORS
            .iter()
            .filter(|needle| raw.contains(*needle))
            .count();
        if (hits >= 1 && text.chars().count() < 100) || hits >= 2 {
            return PageProblem::Cloudflare;
        }

        if self.captcha.iter().any(|s| doc.select(s).next().is_some()) {
            return PageProblem::Captcha;
        }

        let folded = fold_diacritics(&text);
        if ERROR_KEYWORDS.iter().any(|k| folded.contains(k)) {
            return PageProblem::LoadingError;
        }

        PageProblem::LayoutChange
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inspect(html: &str) -> PageProblem {
        PageInspector::new().unwrap().inspect(html)
    }

    #[test]
    fn page_with_question_is_clear() {
        let html = r#"<html><body><div class="questao-enunciado-texto">x</div></body></html>"#;
        assert_eq!(inspect(html), PageProblem::Clear);
    }

    #[test]
    fn detects_cloudflare_challenge() {
        let html = "<html><body><h1>Just a moment...</h1></body></html>";
        assert_eq!(inspect(html), PageProblem::Cloudflare);
        assert!(PageProblem::Cloudflare.is_blocking());
    }

    #[test]
    fn detects_captcha_and_error_pages() {
        let captcha = r#"<html><body><div class="g-recaptcha"></div></body></html>"#;
        assert_eq!(inspect(captcha), PageProblem::Captcha);

        let not_found = "<html><body><h1>Página não encontrada</h1></body></html>";
        assert_eq!(inspect(not_found), PageProblem::LoadingError);
    }

    #[test]
    fn unknown_layout_is_not_blocking() {
        let html = "<html><body><nav>Menu</nav><main>Bem-vindo</main></body></html>";
        let problem = inspect(html);
        assert_eq!(problem, PageProblem::LayoutChange);
        assert!(!problem.is_blocking());
    }
}
