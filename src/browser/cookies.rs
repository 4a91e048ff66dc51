use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 与浏览器库无关的 cookie 记录
///
/// 同时兼容 EditThisCookie 导出的字段名 (`expirationDate`, `httpOnly`)。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    /// 为空时使用站点的默认域名
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Unix 秒，None 表示会话 cookie
    #[serde(default, alias = "expirationDate")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, alias = "httpOnly")]
    pub http_only: bool,
}

fn default_path() -> String {
    "/".to_string()
}

impl StoredCookie {
    pub fn is_expired(&self, now_secs: f64) -> bool {
        matches!(self.expires, Some(exp) if exp > 0.0 && exp <= now_secs)
    }
}

/// 每个账号一个 cookie 文件，只由该账号的进程读写
#[derive(Debug, Clone)]
pub struct CookieStore {
    path: PathBuf,
}

impl CookieStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取未过期的 cookie，文件不存在时返回空列表
    pub fn load(&self) -> Result<Vec<StoredCookie>> {
        if !self.path.exists() {
            debug!("cookie 文件不存在: {}", self.path.display());
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("读取 cookie 文件失败: {}", self.path.display()))?;
        let cookies = parse_cookie_json(&raw)
            .with_context(|| format!("解析 cookie 文件失败: {}", self.path.display()))?;
        Ok(drop_expired(cookies))
    }

    /// 先写临时文件再重命名，避免写到一半被读取
    pub fn save(&self, cookies: &[StoredCookie]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("创建目录失败: {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(cookies)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("写入 cookie 失败: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("保存 cookie 失败: {}", self.path.display()))?;
        debug!("💾 已保存 {} 个 cookie 到 {}", cookies.len(), self.path.display());
        Ok(())
    }

    /// 导入手动登录后导出的 cookie 文件，返回导入数量
    pub fn import_from(&self, source: &Path) -> Result<usize> {
        let raw = fs::read_to_string(source)
            .with_context(|| format!("读取导入文件失败: {}", source.display()))?;
        let cookies = drop_expired(parse_cookie_json(&raw)?);
        if cookies.is_empty() {
            bail!("导入文件中没有有效的 cookie: {}", source.display());
        }
        self.save(&cookies)?;
        info!("✅ 已导入 {} 个 cookie", cookies.len());
        Ok(cookies.len())
    }

    pub fn export_to(&self, target: &Path) -> Result<usize> {
        let cookies = self.load()?;
        let json = serde_json::to_string_pretty(&cookies)?;
        fs::write(target, json).with_context(|| format!("写入导出文件失败: {}", target.display()))?;
        Ok(cookies.len())
    }
}

/// 接受数组，或 `{ "cookies": [...] }` 包装
fn parse_cookie_json(raw: &str) -> Result<Vec<StoredCookie>> {
    let value: Value = serde_json::from_str(raw)?;
    let list = match value {
        Value::Array(_) => value,
        Value::Object(mut map) => match map.remove("cookies") {
            Some(list @ Value::Array(_)) => list,
            _ => bail!("cookie JSON 缺少 cookies 数组"),
        },
        _ => bail!("cookie JSON 格式不正确"),
    };
    Ok(serde_json::from_value(list)?)
}

fn drop_expired(cookies: Vec<StoredCookie>) -> Vec<StoredCookie> {
    let now = Utc::now().timestamp() as f64;
    let before = cookies.len();
    let kept: Vec<StoredCookie> = cookies.into_iter().filter(|c| !c.is_expired(now)).collect();
    if kept.len() < before {
        debug!("丢弃 {} 个过期 cookie", before - kept.len());
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, expires: Option<f64>) -> StoredCookie {
        StoredCookie {
            name: name.into(),
            value: "v".into(),
            domain: ".tecconcursos.com.br".into(),
            path: "/".into(),
            expires,
            secure: true,
            http_only: true,
        }
    }

    #[test]
    fn save_then_load_in_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = CookieStore::new(dir.path().join("jars").join("conta-1.json"));
        let future = Utc::now().timestamp() as f64 + 3600.0;
        store.save(&[cookie("sessao", Some(future)), cookie("tmp", None)]).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name, "sessao");
    }

    #[test]
    fn missing_file_is_empty_jar() {
        let dir = tempfile::tempdir().unwrap();
        let store = CookieStore::new(dir.path().join("nada.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn expired_cookies_are_dropped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CookieStore::new(dir.path().join("c.json"));
        store.save(&[cookie("velho", Some(1_000.0)), cookie("novo", None)]).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "novo");
    }

    #[test]
    fn imports_edit_this_cookie_export() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("export.json");
        let future = Utc::now().timestamp() + 86_400;
        fs::write(
            &source,
            format!(
                r#"[{{"domain":".tecconcursos.com.br","expirationDate":{},"hostOnly":false,
                     "httpOnly":true,"name":"JSESSIONID","path":"/","sameSite":"lax",
                     "secure":true,"session":false,"storeId":"0","value":"abc","id":1}}]"#,
                future
            ),
        )
        .unwrap();

        let store = CookieStore::new(dir.path().join("conta.json"));
        assert_eq!(store.import_from(&source).unwrap(), 1);
        let loaded = store.load().unwrap();
        assert!(loaded[0].http_only);
        assert_eq!(loaded[0].expires, Some(future as f64));

        let out = dir.path().join("out.json");
        assert_eq!(store.export_to(&out).unwrap(), 1);
        assert!(fs::read_to_string(out).unwrap().contains("JSESSIONID"));
    }

    #[test]
    fn accepts_wrapped_list_and_rejects_garbage() {
        let wrapped = r#"{"cookies":[{"name":"a","value":"b","domain":"x"}]}"#;
        assert_eq!(parse_cookie_json(wrapped).unwrap()[0].path, "/");
        assert!(parse_cookie_json(r#"{"outra":1}"#).is_err());
        assert!(parse_cookie_json("42").is_err());
    }

    #[test]
    fn import_with_only_expired_cookies_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("old.json");
        fs::write(&source, r#"[{"name":"a","value":"b","domain":"x","expirationDate":10}]"#).unwrap();
        let store = CookieStore::new(dir.path().join("c.json"));
        assert!(store.import_from(&source).is_err());
        assert!(!store.path().exists());
    }
}
