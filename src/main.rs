use ruprobe::cli::{Cli, Commands, ScanArgs, TestArgs, VerifyArgs};
use ruprobe::exporter;
use ruprobe::metrics::{spawn_reporter, Metrics, DEFAULT_HISTORY};
use ruprobe::options::{band2rate, OptionMethod, Options};
use ruprobe::prober::Prober;
use ruprobe::ratelimit::RateLimiter;
use ruprobe::relay::Relay;
use ruprobe::scanner::{self, Scanner};
use ruprobe::store::build_store;

use anyhow::Result;
use clap::Parser;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan(args) => run_scan(args).await?,
        Commands::Verify(args) => run_verify(args).await?,
        Commands::Test(args) => run_test(args).await?,
    }

    Ok(())
}

async fn run_scan(args: ScanArgs) -> Result<()> {
    let ScanArgs {
        common,
        id_len,
        charset,
        band,
        store_type,
        store,
        append,
        relay_url,
        relay_auth,
        metrics_port,
        drain_timeout,
        no_progress,
        progress_color,
    } = args;

    let rate = band2rate(&band)?;
    let mut opt = Options {
        base_url: common.base_url,
        exts: common.exts,
        workers: common.concurrency,
        timeout: common.timeout,
        id_len,
        charset,
        rate,
        method: OptionMethod::Scan,
        store_type,
        store_path: store,
        append,
        relay_url,
        relay_auth,
        metrics_port,
        drain_timeout,
        progress: !no_progress,
        progress_color,
        log_level: common.log_level,
    };
    opt.check()?;
    init_tracing(&opt.log_level);

    let (stop_tx, stop_rx) = watch::channel(false);
    let metrics = Metrics::new(DEFAULT_HISTORY);
    // 存储打不开直接终止启动
    let store = build_store(&opt).await?;

    let limiter = if opt.rate > 0 {
        info!("rate cap {} req/s", opt.rate);
        let rl = RateLimiter::new(opt.rate);
        rl.spawn_refill(stop_rx.clone());
        Some(rl)
    } else {
        None
    };
    let prober = Arc::new(Prober::new(&opt, metrics.clone(), limiter)?);

    let relay = match &opt.relay_url {
        Some(url) => Some(Relay::spawn(
            url.clone(),
            opt.relay_auth.clone(),
            opt.base_url.clone(),
            Duration::from_secs(opt.timeout),
            stop_rx.clone(),
        )?),
        None => None,
    };

    spawn_reporter(metrics.clone(), opt.progress, opt.progress_color, stop_rx.clone());
    if let Some(port) = opt.metrics_port {
        exporter::spawn_exporter(metrics.clone(), port).await?;
    }

    let mut scan = Scanner::new(
        opt,
        metrics.clone(),
        store.clone(),
        prober,
        relay,
        stop_rx.clone(),
    );
    let scan_task = tokio::spawn(async move { scan.run().await });

    wait_for_signal().await?;
    eprintln!();
    info!("shutting down gracefully...");
    let _ = stop_tx.send(true);

    match scan_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("scanner exited with error: {}", e),
        Err(e) => warn!("scanner task join error: {}", e),
    }
    store.close().await?;
    info!(
        "done: {} requests sent, {} links found",
        metrics.requests_sent(),
        metrics.links_found()
    );
    Ok(())
}

async fn run_verify(args: VerifyArgs) -> Result<()> {
    let mut ids: Vec<String> = vec![];
    if !args.ids.is_empty() {
        ids.extend(args.ids.clone());
    }
    if args.stdin {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            if let Ok(s) = line {
                ids.push(s);
            }
        }
    }
    if let Some(list) = &args.filename {
        let f = std::fs::File::open(list)?;
        for line in io::BufReader::new(f).lines() {
            if let Ok(s) = line {
                ids.push(s);
            }
        }
    }
    if ids.is_empty() {
        anyhow::bail!("verify needs ids via arguments, --stdin or --filename");
    }

    let mut opt = Options {
        base_url: args.common.base_url,
        exts: args.common.exts,
        workers: args.common.concurrency,
        timeout: args.common.timeout,
        id_len: ids.iter().map(|s| s.trim().len()).max().unwrap_or(6).max(1),
        charset: ruprobe::options::default_charset(),
        rate: 0,
        method: OptionMethod::Verify,
        store_type: args.store_type,
        store_path: args.store,
        append: args.append,
        relay_url: None,
        relay_auth: None,
        metrics_port: None,
        drain_timeout: 5,
        progress: false,
        progress_color: false,
        log_level: args.common.log_level,
    };
    opt.check()?;
    init_tracing(&opt.log_level);

    let metrics = Metrics::new(DEFAULT_HISTORY);
    let store = build_store(&opt).await?;
    scanner::verify::run(&opt, ids, metrics.clone(), store.clone()).await?;
    store.close().await?;
    info!(
        "verify done: {} requests sent, {} links found",
        metrics.requests_sent(),
        metrics.links_found()
    );
    Ok(())
}

async fn run_test(args: TestArgs) -> Result<()> {
    let TestArgs { common, band } = args;
    let rate = band2rate(&band)?;
    let mut opt = Options {
        base_url: common.base_url,
        exts: common.exts,
        workers: common.concurrency,
        timeout: common.timeout,
        id_len: ruprobe::options::default_id_len(),
        charset: ruprobe::options::default_charset(),
        rate,
        method: OptionMethod::Test,
        store_type: "sqlite".into(),
        store_path: PathBuf::from("ruprobe.db"),
        append: false,
        relay_url: None,
        relay_auth: None,
        metrics_port: None,
        drain_timeout: 5,
        progress: false,
        progress_color: false,
        log_level: common.log_level,
    };
    opt.check()?;
    init_tracing(&opt.log_level);

    let metrics = Metrics::new(DEFAULT_HISTORY);
    scanner::testmod::run(&opt, metrics).await?;
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match level {
            "silent" => tracing_subscriber::EnvFilter::new("off"),
            l => tracing_subscriber::EnvFilter::new(format!("ruprobe={}", l)),
        }
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// SIGINT/SIGTERM 触发优雅 drain
async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
