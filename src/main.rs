use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use groundwork::cache::BackendRegistry;
use groundwork::config::load_config;
use groundwork::manager::{self, SystemProfile};
use groundwork::{server, Groundwork};
use tracing::{error, info};

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "Local vector retrieval and result cache service", long_about = None)]
struct Args {
    /// YAML config file. Defaults to ./groundwork.yml when present.
    #[clap(long)]
    config: Option<PathBuf>,

    #[clap(long, default_value = "127.0.0.1:8750")]
    addr: SocketAddr,

    /// Index file, overriding `index.path` from the config
    #[clap(long)]
    index: Option<PathBuf>,

    /// Seconds between expired-entry sweeps of the cache; 0 disables
    #[clap(long, default_value = "60")]
    sweep_secs: u64,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let profile = SystemProfile::detect();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(profile.worker_threads)
        .max_blocking_threads(profile.max_blocking_threads)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async_main(args, profile))
}

async fn async_main(args: Args, profile: SystemProfile) -> ExitCode {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info,groundwork=info");
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .init();

    info!(
        cores = profile.logical_cores,
        workers = profile.worker_threads,
        "starting groundwork"
    );

    let mut config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "could not load config");
            return ExitCode::FAILURE;
        }
    };
    if let Some(index) = args.index {
        config.index.path = index;
    }

    let app = match Groundwork::from_config(&config, &BackendRegistry::new()) {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    let sweep = manager::start_sweep_task(app.cache().clone(), Duration::from_secs(args.sweep_secs));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    };

    let result = server::serve(app.app_state(), args.addr, shutdown).await;
    sweep.abort();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(addr = %args.addr, error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}
