#![warn(
    rust_2024_compatibility,
    clippy::all,
    clippy::future_not_send,
    clippy::mod_module_files,
    clippy::needless_pass_by_ref_mut,
    clippy::unused_async
)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use artery::{
    config::Config, mirror, module::escape_path, proxy::ModuleProxy, resolver::GoCommandBackend,
};
use artery_adapter::FilesystemStorage;
use clap::{Parser, Subcommand};
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_sdk::{resource::Resource, trace as sdktrace};
use rama::{
    Layer as RamaLayer,
    graceful::Shutdown,
    http::{layer::trace::TraceLayer, server::HttpServer},
    layer::ConsumeErrLayer,
    rt::Executor,
    tcp::server::TcpListener,
};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Artery Go module mirror proxy")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the module proxy server
    Serve {
        /// Path to the configuration file
        #[arg(long, default_value = "artery.toml")]
        config: PathBuf,
    },
    /// Show which module path the mirror rules resolve a path to
    Mirror {
        /// Path to the configuration file
        #[arg(long, default_value = "artery.toml")]
        config: PathBuf,
        /// Module paths to look up
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Validate the configuration and print the resolved cache layout
    Check {
        /// Path to the configuration file
        #[arg(long, default_value = "artery.toml")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config } => run_server(config),
        Command::Mirror { config, paths } => run_mirror(config, paths),
        Command::Check { config } => run_check(config),
    }
}

fn run_server(config_path: PathBuf) -> Result<()> {
    let config = Arc::new(
        Config::load(Some(config_path.clone())).context("loading configuration")?,
    );
    config.validate().context("validating configuration")?;
    init_tracing(&config)?;
    if config.source.is_none() {
        tracing::warn!(
            path = %config_path.display(),
            "configuration file not found, using defaults"
        );
    }

    config
        .storage
        .ensure_directories()
        .context("creating GOPATH")?;
    let download_dir = config.storage.download_dir()?;
    if !download_dir.is_dir() {
        tracing::warn!(
            cache = %download_dir.display(),
            "module download cache does not exist yet, creating it"
        );
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("constructing setup runtime")?;

    let storage = Arc::new(FilesystemStorage::new(download_dir.clone()));
    rt.block_on(storage.prepare())
        .context("preparing module download cache")?;
    drop(rt);

    let backend = GoCommandBackend::from_config(&config).context("configuring resolution backend")?;
    tracing::info!(
        gopath = %config.storage.gopath()?.display(),
        cache = %download_dir.display(),
        command = %config.resolver.command,
        mirrors = config.mirrors.len(),
        link_mode = %config.storage.link_mode,
        "module proxy configured"
    );

    let proxy = ModuleProxy::new(config.clone(), storage, backend);

    let rt_server = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers)
        .enable_all()
        .build()
        .context("constructing server runtime")?;

    rt_server.block_on(async move {
        let graceful = Shutdown::default();
        let addr = config.server.listen_addr();

        tracing::info!(%addr, "starting Rama HTTP server");

        graceful.spawn_task_fn(move |guard| {
            let proxy = proxy.clone();
            let addr = addr.clone();
            async move {
                let tcp_service = match TcpListener::build().bind(addr.clone()).await {
                    Ok(listener) => listener,
                    Err(err) => {
                        tracing::error!(%addr, error = %err, "failed to bind listener");
                        return;
                    }
                };

                let exec = Executor::graceful(guard.clone());
                let http_service = HttpServer::auto(exec).service(
                    (TraceLayer::new_for_http(), ConsumeErrLayer::default()).into_layer(proxy),
                );

                tcp_service.serve_graceful(guard, http_service).await;
            }
        });

        // Wait for ctrl+c to initiate graceful shutdown
        tokio::signal::ctrl_c()
            .await
            .context("listening for shutdown signal")?;

        graceful
            .shutdown_with_limit(Duration::from_secs(30))
            .await?;

        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

fn run_mirror(config_path: PathBuf, paths: Vec<String>) -> Result<()> {
    let config = Config::load(Some(config_path.clone())).context("loading configuration")?;
    if config.source.is_none() {
        eprintln!(
            "configuration file {} not found, no mirror rules loaded",
            config_path.display()
        );
    }

    for path in paths {
        let effective = mirror::effective_path(&config.mirrors, &path);
        if effective.as_ref() == path {
            println!("{path} (no mirror)");
        } else {
            println!("{path} -> {effective}");
        }
    }

    Ok(())
}

fn run_check(config_path: PathBuf) -> Result<()> {
    let config = Config::load(Some(config_path.clone())).context("loading configuration")?;
    match &config.source {
        Some(source) => println!("Config file:     {}", source.display()),
        None => println!(
            "Config file:     {} (not found, using defaults)",
            config_path.display()
        ),
    }
    config.validate().context("validating configuration")?;

    let download_dir = config.storage.download_dir()?;
    println!("GOPATH:          {}", config.storage.gopath()?.display());
    println!(
        "Download cache:  {}{}",
        download_dir.display(),
        if download_dir.is_dir() { "" } else { " (missing)" }
    );
    println!("Listen address:  {}", config.server.listen_addr());
    println!(
        "Resolver:        {} {}",
        config.resolver.command,
        config.resolver.args.join(" ")
    );
    println!("GOPROXY:         {}", config.resolver.goproxy);
    println!("Link mode:       {}", config.storage.link_mode);

    if config.mirrors.is_empty() {
        println!("Mirrors:         none");
    } else {
        println!("Mirrors:");
        for rule in &config.mirrors {
            // Aliases are created under escaped paths; surface rules that
            // cannot produce one.
            let note = match escape_path(&rule.dest) {
                Ok(_) => "",
                Err(_) => " (dest is not a valid module path prefix)",
            };
            println!("  {} -> {}{}", rule.origin, rule.dest, note);
        }
    }

    Ok(())
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = config.logging.env_filter()?;

    let fmt_layer = if config.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).boxed()
    };

    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        use opentelemetry_otlp::WithExportConfig;

        let resource = Resource::builder_empty()
            .with_attributes([
                KeyValue::new("service.name", "artery"),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ])
            .build();

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()?;

        let provider = sdktrace::SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build();

        let tracer = provider.tracer("artery");
        global::set_tracer_provider(provider);

        registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;
    } else {
        registry.try_init()?;
    }
    Ok(())
}
