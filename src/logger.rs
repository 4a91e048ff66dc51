use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// 初始化日志，`RUST_LOG` 优先于 `verbose`
pub fn init(verbose: bool) {
    let default_filter = if verbose {
        "tec_scraper=debug,chromiumoxide=warn"
    } else {
        "tec_scraper=info,chromiumoxide=warn"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
