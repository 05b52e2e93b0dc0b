mod cli;

use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use colony_core::kernel::constants::{DEFAULT_LOG_LEVEL, LOG_LEVEL_KEY};
use colony_core::kernel::{Application, ShutdownHandle};
use colony_core::plugin_system::logger::level_filter;
use colony_core::{ConfigStore, KernelError};

use crate::cli::{CliArgs, Command};

fn init_logger(store: &ConfigStore) {
    let filter = level_filter(&store.conf_str(LOG_LEVEL_KEY, DEFAULT_LOG_LEVEL)).unwrap_or(log::LevelFilter::Info);
    let mut builder = env_logger::Builder::new();
    builder.filter_level(filter).parse_default_env();
    if let Err(e) = builder.try_init() {
        eprintln!("Logger already initialized: {}", e);
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

fn list_plugins(app: &Application) {
    let manager = app.manager();
    let ids = manager.plugin_ids();
    if ids.is_empty() {
        println!("No plugins registered.");
        return;
    }
    println!("Registered plugins:");
    for id in ids {
        let version = manager.class_version(&id).unwrap_or_default();
        println!("  - {} {}", id, version);
    }
}

async fn run(app: Application) -> Result<(), KernelError> {
    let handle: ShutdownHandle = app.shutdown_handle();
    let signals = tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutting down plugin system...");
        handle.request();
    });

    let result = match tokio::task::spawn_blocking(move || app.run()).await {
        Ok(result) => result,
        Err(e) => Err(KernelError::Other(format!("main loop thread failed: {}", e))),
    };
    signals.abort();
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let store = match args.config_store() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logger(&store);

    let mut app = match Application::new(store) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Failed to initialize application: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Manifests may bind the built-in plugin under other ids.
    app.register_factory(core_event_log::ENTRY_POINT, core_event_log::factory);
    if let Err(e) = app.scan_plugins().await {
        error!("Plugin discovery failed: {}", e);
        return ExitCode::FAILURE;
    }
    if !app.manager().has_plugin_class(core_event_log::PLUGIN_ID) {
        if let Err(e) = app.register_class(core_event_log::class()) {
            error!("Cannot register {}: {}", core_event_log::PLUGIN_ID, e);
            return ExitCode::FAILURE;
        }
    }

    match args.command() {
        Command::List => {
            list_plugins(&app);
            ExitCode::SUCCESS
        }
        Command::Run => match run(app).await {
            Ok(()) => {
                info!("Plugin system stopped");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{}", e);
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
    }
}
