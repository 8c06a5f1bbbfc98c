mod config;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::{fmt, EnvFilter};

use ding_core::{
    AlertGroup, CompiledTemplate, DispatchConfig, Dispatcher, HttpTransport, ProfileStore,
    ProfileTable, TemplateStore,
};

/// Relay Prometheus Alertmanager notifications to DingTalk robots.
#[derive(Parser)]
#[command(name = "webhook-dingtalk", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webhook server.
    Serve {
        /// Config file with `[profiles]` and optional `[server]` settings.
        #[arg(short, long, default_value = "config.yml")]
        config: PathBuf,

        /// Listen address (e.g. 0.0.0.0:8060). Overrides config file.
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Custom message template. Overrides config file.
        #[arg(short, long)]
        template: Option<PathBuf>,

        /// Timeout for each DingTalk call in milliseconds. Overrides config file.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Log output format: pretty or json. Overrides config file.
        #[arg(long)]
        log_format: Option<String>,
    },
    /// Render an Alertmanager payload file and print the resulting message.
    Render {
        /// JSON payload as posted by Alertmanager.
        payload: PathBuf,

        /// Template to render with (default: built-in).
        #[arg(short, long)]
        template: Option<PathBuf>,
    },
    /// Validate a config file and template without starting the server.
    Check {
        #[arg(short, long, default_value = "config.yml")]
        config: PathBuf,

        #[arg(short, long)]
        template: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            listen,
            template,
            timeout_ms,
            log_format,
        } => {
            run_serve(config, listen, template, timeout_ms, log_format).await;
        }
        Commands::Render { payload, template } => {
            fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
                )
                .init();
            if let Err(e) = run_render(&payload, template.as_deref()) {
                eprintln!("{} {}", style("error:").red().bold(), e);
                std::process::exit(1);
            }
        }
        Commands::Check { config, template } => {
            if let Err(e) = run_check(&config, template.as_deref()) {
                eprintln!("{} {}", style("error:").red().bold(), e);
                std::process::exit(1);
            }
        }
    }
}

async fn run_serve(
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
    template_override: Option<PathBuf>,
    timeout_override: Option<u64>,
    log_format_override: Option<String>,
) {
    let app_config = match config::AppConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            init_tracing("pretty");
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let log_format = log_format_override.unwrap_or_else(|| app_config.server.log_format.clone());
    if let Err(e) = config::validate_log_format(&log_format) {
        init_tracing("pretty");
        tracing::error!("{}", e);
        std::process::exit(1);
    }
    init_tracing(&log_format);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting webhook-dingtalk"
    );

    let template = match template_override.or(app_config.server.template.clone()) {
        Some(path) => match CompiledTemplate::compile_file(&path) {
            Ok(t) => {
                tracing::info!(path = %path.display(), "Using customized template");
                t
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Error loading template file");
                std::process::exit(1);
            }
        },
        None => {
            tracing::info!("Using default template");
            CompiledTemplate::default_template()
        }
    };

    tracing::info!(path = %config_path.display(), "Loading configuration file");
    let profiles = match ProfileStore::from_file(&config_path) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(path = %config_path.display(), error = %e, "Error loading profiles");
            std::process::exit(1);
        }
    };
    {
        let table = profiles.snapshot().await;
        for profile in table.iter() {
            tracing::info!(
                profile = %profile.name,
                url = %profile.redacted_url(),
                signed = profile.secret.is_some(),
                "Using profile"
            );
        }
    }

    let timeout_ms = timeout_override.unwrap_or(app_config.server.timeout_ms);
    let dispatch_config = DispatchConfig::default().with_request_timeout(timeout_ms);
    let transport = match HttpTransport::new(&dispatch_config) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build HTTP client");
            std::process::exit(1);
        }
    };

    let dispatcher = Dispatcher::new(profiles, TemplateStore::new(template), Arc::new(transport));
    let state = ding_api::state::AppState::new(dispatcher);

    let listen = listen_override.unwrap_or(app_config.server.listen);
    tracing::info!(%listen, timeout_ms, "Starting DingTalk webhook server");
    if let Err(e) = ding_api::serve_with_state(listen, state, ding_api::shutdown_signal()).await {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }

    tracing::info!("Shutdown complete");
}

fn load_template(path: Option<&Path>) -> Result<CompiledTemplate, String> {
    match path {
        Some(p) => CompiledTemplate::compile_file(p).map_err(|e| e.to_string()),
        None => Ok(CompiledTemplate::default_template()),
    }
}

fn run_render(payload: &Path, template: Option<&Path>) -> Result<(), String> {
    let raw = std::fs::read_to_string(payload)
        .map_err(|e| format!("Failed to read payload {}: {}", payload.display(), e))?;
    let group: AlertGroup = serde_json::from_str(&raw)
        .map_err(|e| format!("Invalid alert payload {}: {}", payload.display(), e))?;

    let message = load_template(template)?
        .render(&group)
        .map_err(|e| e.to_string())?;

    println!("{}", style(&message.title).bold());
    println!("{}", style("─".repeat(54)).dim());
    println!("{}", message.text);
    Ok(())
}

fn run_check(config_path: &Path, template: Option<&Path>) -> Result<(), String> {
    let app_config = config::AppConfig::load(config_path)?;
    let table = ProfileTable::load_file(config_path).map_err(|e| e.to_string())?;

    let template_path = template
        .map(Path::to_path_buf)
        .or(app_config.server.template.clone());
    let compiled = load_template(template_path.as_deref())?;

    println!(
        "{} {}",
        style("config:  ").dim(),
        style(config_path.display()).bold()
    );
    println!("{} {}", style("listen:  ").dim(), app_config.server.listen);
    println!("{} {}ms", style("timeout: ").dim(), app_config.server.timeout_ms);
    println!(
        "{} {}",
        style("template:").dim(),
        match &template_path {
            Some(p) => p.display().to_string(),
            None if compiled.is_default() => "built-in".to_string(),
            None => String::new(),
        }
    );
    for profile in table.iter() {
        let signed = if profile.secret.is_some() {
            format!(" {}", style("signed").yellow())
        } else {
            String::new()
        };
        println!(
            "  {} {:<16} {}{}",
            style("•").green(),
            profile.name,
            style(profile.redacted_url()).dim(),
            signed
        );
    }
    println!("{}", style("Configuration OK").green().bold());
    Ok(())
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}
