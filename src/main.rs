use anyhow::Context;
use axum::http::{self, Method};
use clap::Parser;
use prompt_gateway::auth::{AuthLevel, KeyRing};
use prompt_gateway::config::{load_keys, load_model_registry};
use prompt_gateway::runtime::resolve_runtime_path;
use prompt_gateway::worker::{spawn_worker, CommandEngine, EchoEngine};
use prompt_gateway::{build_router, AppState, GatewayConfig, SchedulerGateway};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::log::LevelFilter;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Hostname on which to bind & listen
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// Port on which to bind & listen
    #[arg(short, long, default_value_t = 42000)]
    port: u16,

    /// Longest prompt (in characters) accepted into the queue
    #[arg(long, default_value_t = 2048)]
    context_size: usize,

    /// Endpoints at or below this level require a key
    #[arg(long, value_enum, default_value_t = AuthLevel::None)]
    auth_level: AuthLevel,

    /// File with one API key per line
    #[arg(long)]
    keys_file: Option<String>,

    /// API key (repeatable)
    #[arg(long = "key")]
    keys: Vec<String>,

    /// Path to models.yaml
    #[arg(long)]
    models_config: Option<String>,

    /// Serve the runtime introspection endpoint at this path ("random" for an obfuscated one)
    #[arg(long)]
    runtime_path: Option<String>,

    /// Program that performs inference: prompt on stdin, response on stdout
    #[arg(long)]
    engine_cmd: Option<String>,

    /// Argument passed to the engine program (repeatable)
    #[arg(long = "engine-arg")]
    engine_args: Vec<String>,

    /// Log to the console and to `--log-file` through ftail
    #[arg(long, default_value_t = false)]
    log: bool,

    #[arg(long, default_value = "prompt-gateway.log")]
    log_file: String,
}

/// Level for ftail logging from a `RUST_LOG`-style value. The last token
/// that names a level wins, so `prompt_gateway=debug` and `info` both work.
fn file_log_level(rust_log: Option<&str>) -> LevelFilter {
    rust_log
        .into_iter()
        .flat_map(|v| v.split([',', '=']))
        .filter_map(|token| token.trim().parse::<LevelFilter>().ok())
        .last()
        .unwrap_or(LevelFilter::Warn)
}

/// Console + single-file logging through ftail. Any previous log file is
/// replaced.
fn config_log(logger: ftail::Ftail, log_file: &str) -> Result<(), ftail::error::FtailError> {
    let level = file_log_level(std::env::var("RUST_LOG").ok().as_deref());
    if matches!(std::fs::exists(log_file), Ok(true)) {
        let _ = std::fs::remove_file(log_file);
    }
    logger
        .console(level)
        .single_file(log_file, true, level)
        .init()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if !args.log {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    } else {
        config_log(ftail::Ftail::new(), &args.log_file)
            .map_err(|e| anyhow::anyhow!("failed to configure logging: {e:?}"))?;
    }

    let models = load_model_registry(args.models_config.as_deref())?;

    let mut keys = args.keys.clone();
    if let Some(path) = &args.keys_file {
        keys.extend(load_keys(path)?);
    }
    let key_ring = KeyRing::new(args.auth_level, keys)?;
    if args.auth_level != AuthLevel::None {
        info!(
            "Authorization enabled at level {:?} with {} key(s)",
            args.auth_level,
            key_ring.key_count()
        );
    }

    let gateway = Arc::new(SchedulerGateway::new(GatewayConfig {
        max_context_size: args.context_size,
    }));

    let worker = match &args.engine_cmd {
        Some(cmd) => {
            let engine = CommandEngine::new(cmd, args.engine_args.clone())?;
            spawn_worker(gateway.clone(), engine)?
        }
        None => {
            warn!("No --engine-cmd given, echoing prompts back as responses");
            spawn_worker(gateway.clone(), EchoEngine)?
        }
    };

    let runtime_path = args.runtime_path.as_deref().map(resolve_runtime_path);
    if let Some(path) = &runtime_path {
        warn!("Runtime endpoint available at {path}");
    }

    let state = AppState {
        scheduler: gateway.clone(),
        auth: Arc::new(key_ring),
        models: Arc::new(models),
        runtime_path,
    };

    let cors_layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
        .allow_origin(Any);

    let app = build_router(state).layer(cors_layer);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", args.host, args.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", args.host, args.port))?;
    warn!("Listening on {}:{}", args.host, args.port);

    let worker_exit = tokio::task::spawn_blocking(move || worker.join());
    tokio::select! {
        served = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        ) => {
            gateway.close();
            served.context("HTTP server error")?;
        }
        exited = worker_exit => {
            match exited {
                Ok(Ok(Ok(()))) => warn!("Inference worker stopped"),
                Ok(Ok(Err(e))) => anyhow::bail!("inference worker aborted: {e}"),
                Ok(Err(_)) => anyhow::bail!("inference worker panicked"),
                Err(e) => anyhow::bail!("failed to join inference worker: {e}"),
            }
        }
    }

    Ok(())
}
