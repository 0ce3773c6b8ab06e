use std::{path::Path, sync::Arc, time::Duration};

use burrow::{
    adapters::{FsChangeWatcher, HttpHandler, ManifestLoader, request_logger},
    config::{ServerConfig, ServerConfigValidator, load_config, load_config_or_default},
    core::{BuildReport, RebuildCoordinator, RouteBuilder},
    ports::change_watcher::ChangeWatcher,
    tracing_setup,
    utils::graceful_shutdown::GracefulShutdown,
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "burrow.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start the routing server (default)
    Serve,
    /// Build the route table once and print it
    Routes,
    /// Validate configuration file
    Validate,
    /// Initialize a new configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&args.config).await,
        Commands::Routes => routes_command(&args.config).await,
        Commands::Validate => validate_config_command(&args.config).await,
        Commands::Init => init_config_command(&args.config).await,
    }
}

async fn load_checked(config_path: &str) -> Result<ServerConfig> {
    let config = load_config_or_default(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    ServerConfigValidator::validate(&config).map_err(|e| eyre!("{}", e))?;
    Ok(config)
}

fn route_builder(config: &ServerConfig) -> RouteBuilder {
    let loader = Arc::new(ManifestLoader::new(&config.routing.middleware_dir));
    let builder = RouteBuilder::new(config.routing.clone(), loader);
    if config.routing.request_logging {
        builder.with_request_logger(request_logger())
    } else {
        builder
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let config = load_checked(config_path).await?;

    tracing_setup::init_tracing(&config.logging)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    tracing::info!("Loaded configuration from {config_path}");

    let coordinator = RebuildCoordinator::start(route_builder(&config))
        .await
        .context("Failed to build initial route table")?;

    let shutdown = GracefulShutdown::new();

    // The watcher must outlive the server, so it is held here.
    let _watcher = if config.watch.enabled {
        let watcher = FsChangeWatcher::new([
            &config.routing.routes_dir,
            &config.routing.middleware_dir,
        ])
        .context("Failed to start file watcher")?;
        let events = watcher.watch();
        let coordinator = coordinator.clone();
        let shutdown = shutdown.clone();
        let debounce = Duration::from_millis(config.watch.debounce_ms);
        tokio::spawn(async move {
            tokio::select! {
                _ = coordinator.run(events, debounce) => {}
                _ = shutdown.wait_for_shutdown() => {
                    tracing::info!("Route watcher stopped for shutdown.");
                }
            }
        });
        Some(watcher)
    } else {
        tracing::info!("Hot reload disabled; route table is fixed for this process.");
        None
    };

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move { shutdown.run_signal_handler().await }
    });

    let app = HttpHandler::new(coordinator.handle()).into_router(config.static_files.as_ref());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;
    tracing::info!(
        addr = %config.listen_addr,
        base_path = %config.routing.base_path,
        routes = %config.routing.routes_dir.display(),
        "Burrow listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
        .await
        .context("Server error")?;

    tracing::info!("Server shut down cleanly");
    Ok(())
}

/// Build the route table once and print it
async fn routes_command(config_path: &str) -> Result<()> {
    let config = load_checked(config_path).await?;
    let builder = route_builder(&config);
    let (dispatcher, report) = builder
        .build(1)
        .await
        .context("Failed to build route table")?;

    let routes = dispatcher.routes();
    println!(
        "📋 Routes under {} (base path {}):",
        config.routing.routes_dir.display(),
        dispatcher.base_path()
    );
    for route in &routes {
        println!(
            "   {:<7} {:<40} {} handler(s)",
            route.method,
            route.pattern,
            route.chain_len
        );
    }
    println!();
    print_report(&report);

    if report.failures.is_empty() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn print_report(report: &BuildReport) {
    println!(
        "   • Files loaded: {}  Global middleware: {}  Scoped middleware: {}",
        report.files_loaded, report.global_middleware, report.scoped_middleware
    );
    for duplicate in &report.duplicates {
        println!(
            "⚠️  Duplicate {} in {} (ignored)",
            duplicate.key,
            report.display_path(&duplicate.file)
        );
    }
    for warning in &report.warnings {
        println!("⚠️  {warning}");
    }
    for failure in &report.failures {
        eprintln!(
            "❌ {}: {}",
            report.display_path(&failure.file),
            failure.message
        );
    }
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    // First check if file exists and is readable
    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    // Try to parse the configuration
    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    // Validate the configuration
    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Routes Directory: {}", config.routing.routes_dir.display());
            println!(
                "   • Middleware Directory: {}",
                config.routing.middleware_dir.display()
            );
            println!("   • Base Path: {}", config.routing.base_path);
            println!("   • Hot Reload: {}", config.watch.enabled);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Verify listen address format (e.g., '127.0.0.1:3000')");
            println!("   • Start base_path and static url_prefix with '/'");
            println!("   • List extensions without the leading dot (e.g., 'toml')");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Burrow Configuration

# The address to listen on
listen_addr = "127.0.0.1:3000"

[routing]
routes_dir = "./routes"
middleware_dir = "./middleware"
base_path = "/"
extensions = ["toml", "yaml", "yml", "json"]
request_logging = true

[watch]
enabled = true
debounce_ms = 150

[logging]
level = "info"
json = false

# Serve files from ./static under /static
# [static_files]
# root = "./static"
# url_prefix = "/static"
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'burrow --config {config_path} serve' to start the server");
    Ok(())
}
