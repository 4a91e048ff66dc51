//! 命令行入口
//!
//! `worker` 是每个账号的常驻进程，其他子命令用于手动操作和排查。

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use super::AppConfig;
use crate::browser::credential::cookie_path;
use crate::browser::{CookieStore, TecSite};
use crate::core::models::{Area, CommandKind};
use crate::services::worker::{self, Stores};
use crate::services::{Coordinator, LoginCheck};

#[derive(Parser, Debug)]
#[command(name = "tec-scraper")]
#[command(version, about = "TecConcursos 题目抓取器", long_about = None)]
pub struct Cli {
    /// 配置文件路径，默认 ./config.toml
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// 输出 debug 日志
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// 使用内存存储，不写数据库
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct AccountArg {
    /// 账号 id
    #[arg(short, long, env = "SCRAPER_ACCOUNT_ID")]
    pub account: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 常驻进程：轮询命令表
    Worker {
        #[command(flatten)]
        account: AccountArg,
    },

    /// 前台抓取一个领域
    Run {
        #[command(flatten)]
        account: AccountArg,

        /// 领域，slug 或名称，例如 policial
        #[arg(long)]
        area: Area,
    },

    /// 查看保存的进度
    Status {
        #[command(flatten)]
        account: AccountArg,
    },

    /// 测试登录（也用于检查 cookie）
    LoginTest {
        #[command(flatten)]
        account: AccountArg,
    },

    /// 按优先级列出所有领域
    Areas,

    /// 向命令表写入一条命令
    Send {
        /// start | stop | pause | resume
        kind: CommandKind,

        #[command(flatten)]
        account: AccountArg,

        #[arg(long)]
        area: Option<Area>,

        /// 定时抓取间隔（小时），0 表示使用默认值
        #[arg(long)]
        interval_hours: Option<u32>,
    },

    /// 导入或导出账号的 cookie
    Cookies {
        #[command(subcommand)]
        action: CookieAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum CookieAction {
    /// 从浏览器导出的 JSON 导入
    Import {
        #[command(flatten)]
        account: AccountArg,

        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,
    },

    /// 导出当前 cookie
    Export {
        #[command(flatten)]
        account: AccountArg,

        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,
    },
}

pub async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    let config = Arc::new(config);
    match cli.command {
        Commands::Worker { account } => {
            let stores = Stores::open(&config, cli.dry_run)?;
            worker::run_worker(config, &account.account, stores).await
        }

        Commands::Run { account, area } => {
            let stores = Stores::open(&config, cli.dry_run)?;
            let progress = worker::run_once(config, &account.account, area, stores).await?;
            println!("{}", serde_json::to_string_pretty(&progress)?);
            Ok(())
        }

        Commands::Status { account } => {
            let stores = Stores::open(&config, cli.dry_run)?;
            match stores.control.load_progress(&account.account).await? {
                Some(progress) => println!("{}", serde_json::to_string_pretty(&progress)?),
                None => println!("账号 {} 还没有进度记录", account.account),
            }
            Ok(())
        }

        Commands::LoginTest { account } => {
            let stores = Stores::open(&config, cli.dry_run)?;
            let coordinator: Coordinator<TecSite> =
                worker::build_coordinator(config, &account.account, &stores)?;
            match coordinator.login_test().await {
                LoginCheck::Valid => {
                    println!("✅ 账号 {} 登录成功", account.account);
                    Ok(())
                }
                LoginCheck::Invalid => bail!("账号 {} 登录失败", account.account),
                LoginCheck::Busy => bail!("账号 {} 正在抓取中", account.account),
            }
        }

        Commands::Areas => {
            for area in Coordinator::<TecSite>::list_areas() {
                println!("{:>2}  {:<22} {}", area.priority(), area.slug(), area.display_name());
            }
            Ok(())
        }

        Commands::Send {
            kind,
            account,
            area,
            interval_hours,
        } => {
            if matches!(kind, CommandKind::Start | CommandKind::Resume)
                && area.is_none()
                && interval_hours.is_none()
            {
                bail!("start 需要 --area 或 --interval-hours");
            }
            let stores = Stores::open(&config, cli.dry_run)?;
            let command = stores
                .control
                .enqueue_command(&account.account, kind, area, interval_hours)
                .await?;
            println!("📨 已写入命令 {} ({:?})", command.id, command.kind);
            Ok(())
        }

        Commands::Cookies { action } => {
            let dir = &config.worker.cookies_dir;
            match action {
                CookieAction::Import { account, file } => {
                    let store = CookieStore::new(cookie_path(dir, &account.account));
                    let count = store.import_from(&file)?;
                    println!("🍪 已导入 {} 个 cookie 到 {}", count, store.path().display());
                }
                CookieAction::Export { account, file } => {
                    let store = CookieStore::new(cookie_path(dir, &account.account));
                    let count = store.export_to(&file)?;
                    println!("🍪 已导出 {} 个 cookie 到 {}", count, file.display());
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_area_name() {
        let cli = Cli::try_parse_from([
            "tec-scraper",
            "--dry-run",
            "run",
            "--account",
            "conta-01",
            "--area",
            "policial",
        ])
        .unwrap();
        assert!(cli.dry_run);
        match cli.command {
            Commands::Run { account, area } => {
                assert_eq!(account.account, "conta-01");
                assert_eq!(area, Area::Policial);
            }
            other => panic!("comando inesperado: {:?}", other),
        }
    }

    #[test]
    fn parses_send_with_interval() {
        let cli = Cli::try_parse_from([
            "tec-scraper",
            "send",
            "start",
            "--account",
            "conta-01",
            "--interval-hours",
            "12",
        ])
        .unwrap();
        match cli.command {
            Commands::Send {
                kind, interval_hours, area, ..
            } => {
                assert_eq!(kind, CommandKind::Start);
                assert_eq!(interval_hours, Some(12));
                assert_eq!(area, None);
            }
            other => panic!("comando inesperado: {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_area() {
        let parsed = Cli::try_parse_from([
            "tec-scraper",
            "run",
            "--account",
            "conta-01",
            "--area",
            "astronomia",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = Cli::try_parse_from(["tec-scraper", "areas", "--verbose"]).unwrap();
        assert!(cli.verbose);
    }

    #[tokio::test]
    async fn send_start_without_target_is_rejected() {
        let cli = Cli::try_parse_from([
            "tec-scraper",
            "--dry-run",
            "send",
            "start",
            "--account",
            "conta-01",
        ])
        .unwrap();
        assert!(run(cli, AppConfig::default()).await.is_err());
    }

    #[tokio::test]
    async fn cookie_import_writes_account_jar() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("export.json");
        std::fs::write(
            &source,
            r#"[{"name":"sid","value":"abc","domain":".tecconcursos.com.br","path":"/","expirationDate":4102444800}]"#,
        )
        .unwrap();

        let mut config = AppConfig::default();
        config.worker.cookies_dir = dir.path().join("cookies");
        let cli = Cli::try_parse_from([
            "tec-scraper",
            "cookies",
            "import",
            "--account",
            "conta-01",
            "--file",
            source.to_str().unwrap(),
        ])
        .unwrap();
        run(cli, config.clone()).await.unwrap();

        let jar = CookieStore::new(cookie_path(&config.worker.cookies_dir, "conta-01"));
        assert_eq!(jar.load().unwrap().len(), 1);
    }
}
