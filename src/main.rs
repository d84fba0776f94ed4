use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tankobon::config::Config;
use tankobon::db::queries::folders;
use tankobon::state::AppState;
use tankobon::{build_router, db, djvu, pdf, scanner, scheduler};

#[derive(Parser)]
#[command(name = "tankobon", version, about = "Comic, manga and book library server")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Run a one-shot import of every watched folder and exit
    #[arg(long)]
    scan: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Error loading config: {e}");
        std::process::exit(1);
    });

    // Setup tracing/logging
    let filter =
        EnvFilter::try_new(&config.server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Validate scanner schedule config
    if let Err(e) = scheduler::validate_config(&config.scanner) {
        tracing::error!("Invalid scanner config: {e}");
        std::process::exit(1);
    }

    if !pdf::pdftoppm_available() {
        tracing::warn!("`pdftoppm` is not available in PATH; PDF pages and covers are disabled");
    }
    if !pdf::pdfinfo_available() {
        tracing::warn!("`pdfinfo` is not available in PATH; PDF page counts and metadata are disabled");
    }
    if !djvu::ddjvu_available() {
        tracing::warn!("`ddjvu` is not available in PATH; DjVu pages and covers are disabled");
    }
    if !djvu::djvused_available() {
        tracing::warn!("`djvused` is not available in PATH; DjVu page counts and metadata are disabled");
    }

    // Initialize database
    let pool = db::create_pool(&config.database).await.unwrap_or_else(|e| {
        tracing::error!("Failed to initialize database: {e}");
        std::process::exit(1);
    });
    tracing::info!("Database initialized: {}", config.database.url);

    match folders::sync(&pool, &config.library.folders).await {
        Ok(rows) => tracing::info!("Watching {} folder(s)", rows.len()),
        Err(e) => {
            tracing::error!("Failed to register watched folders: {e}");
            std::process::exit(1);
        }
    }
    for folder in &config.library.folders {
        if !folder.is_dir() {
            tracing::warn!("Watched folder {} does not exist", folder.display());
        }
    }

    // Ensure covers directory exists
    if let Err(e) = std::fs::create_dir_all(&config.library.covers_path) {
        tracing::error!(
            "Failed to create covers directory {:?}: {e}",
            config.library.covers_path
        );
        std::process::exit(1);
    }

    // Validate upload configuration
    if config.upload.allow_upload {
        let upload_path = &config.upload.upload_path;
        if upload_path.as_os_str().is_empty() {
            tracing::error!("Upload enabled but 'upload_path' is not set in [upload] config");
            std::process::exit(1);
        }
        if config.library.root_for(upload_path).is_none() {
            tracing::error!(
                "upload_path '{}' is not inside any watched folder",
                upload_path.display()
            );
            std::process::exit(1);
        }
        if let Err(e) = std::fs::create_dir_all(upload_path) {
            tracing::error!(
                "Upload enabled but failed to create upload_path '{}': {e}",
                upload_path.display()
            );
            std::process::exit(1);
        }
        tracing::info!("Upload enabled, upload_path: {}", upload_path.display());
    }

    // One-shot scan mode
    if cli.scan {
        tracing::info!("Running one-shot import...");
        match scanner::run_scan(&pool, &config).await {
            Ok(stats) => {
                tracing::info!(
                    "Import finished: found={}, imported={}, unchanged={}, duplicates={}, deleted={}, errors={}",
                    stats.files_found,
                    stats.imported,
                    stats.unchanged,
                    stats.duplicates,
                    stats.archives_deleted,
                    stats.errors,
                );
            }
            Err(e) => {
                tracing::error!("Import failed: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    // Server mode
    let host = config.server.host.parse().unwrap_or_else(|_| {
        tracing::warn!(
            "Invalid host '{}', falling back to 0.0.0.0",
            config.server.host
        );
        std::net::IpAddr::from([0, 0, 0, 0])
    });
    let addr = SocketAddr::new(host, config.server.port);

    tracing::info!("tankobon v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Listening on {addr}");

    let scanner_config = config.scanner.clone();
    let state = AppState::new(config, pool);

    // Start background scan scheduler
    tokio::spawn(scheduler::run(Arc::clone(&state.scheduler), scanner_config.clone()));
    if scanner_config.scan_on_startup {
        if let Err(e) = state.scheduler.rescan_all(false, false).await {
            tracing::warn!("Startup import not started: {e}");
        }
    }

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {addr}: {e}");
            std::process::exit(1);
        });

    axum::serve(listener, app).await.unwrap_or_else(|e| {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    });
}
