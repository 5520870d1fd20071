use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use controld::api;
use controld::auth::{FileCredentialStore, SessionGate, SessionStore};
use controld::config::{Config, ConfigStore};
use controld::lifecycle::process::{CommandBuilder, ProcessSupervisor};
use controld::lifecycle::{LifecycleController, Timeouts};
use controld::scheduler::Scheduler;
use controld::utils::cli::{Args, Commands};
use controld::utils::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("controld=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();
    let config = validate_config(&args)?;

    match args.command {
        None | Some(Commands::Serve) => serve(config).await,
        Some(Commands::AddUser { username, password }) => {
            let store = FileCredentialStore::open(&config.passwd_path).await?;
            store.add_user(&username, &password).await?;
            Ok(())
        }
        Some(Commands::RemoveUser { username }) => {
            let store = FileCredentialStore::open(&config.passwd_path).await?;
            store.remove_user(&username).await?;
            Ok(())
        }
        Some(Commands::ListUsers) => {
            let store = FileCredentialStore::open(&config.passwd_path).await?;
            for username in store.usernames().await {
                println!("{username}");
            }
            Ok(())
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(
        ConfigStore::load(&config.config_path)
            .await
            .with_context(|| format!("loading {}", config.config_path.display()))?,
    );
    let control = store.get().await;

    let credentials = Arc::new(FileCredentialStore::open(&config.passwd_path).await?);
    if control.auth.enable && credentials.is_empty().await {
        info!(
            "no operator accounts in {}; add one with `controld add-user`",
            config.passwd_path.display()
        );
    }

    let supervisor = Arc::new(ProcessSupervisor::new(
        config.service_cmd.clone(),
        config.service_workdir.clone(),
        config.version_file.clone(),
    ));
    let builder = Arc::new(CommandBuilder::new(
        config.update_cmd.clone(),
        config.service_workdir.clone(),
    ));
    let lifecycle = LifecycleController::new(
        supervisor,
        builder.clone(),
        Timeouts {
            start: config.start_timeout,
            update: config.update_timeout,
            ..Timeouts::default()
        },
    );
    let gate = SessionGate::new(credentials, Arc::new(SessionStore::new(control.session_ttl())));
    let state = Arc::new(AppState::new(store, gate, lifecycle.clone(), builder));

    let scheduler = Scheduler::spawn(
        state.registry.clone(),
        lifecycle,
        control.broadcast.into(),
    );

    let app = api::create_router(state, config.web_root.as_deref());

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.host, config.port))
        .await
        .with_context(|| format!("binding {}:{}", config.host, config.port))?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    scheduler.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down...");
}

fn validate_config(args: &Args) -> anyhow::Result<Config> {
    let mut validation_errors = Vec::new();

    let web_root = args.web_root.as_ref().map(PathBuf::from);
    if let Some(root) = &web_root {
        if !root.is_dir() {
            validation_errors.push(format!(
                "CONTROLD_WEB_ROOT `{}` is not a directory",
                root.display(),
            ));
        }
    }

    let service_workdir = PathBuf::from(&args.service_workdir);
    if !service_workdir.is_dir() {
        validation_errors.push(format!(
            "CONTROLD_SERVICE_WORKDIR `{}` is not a directory",
            args.service_workdir,
        ));
    }

    for (name, secs) in [
        ("CONTROLD_START_TIMEOUT_SECS", args.start_timeout_secs),
        ("CONTROLD_UPDATE_TIMEOUT_SECS", args.update_timeout_secs),
    ] {
        if secs == 0 {
            validation_errors.push(format!("{name} must be positive"));
        }
    }

    if !validation_errors.is_empty() {
        bail!("{}", validation_errors.join("\n"));
    }

    let version_file = PathBuf::from(&args.version_file);
    let version_file = if version_file.is_relative() {
        service_workdir.join(version_file)
    } else {
        version_file
    };

    Ok(Config {
        host: args.host.clone(),
        port: args.port,
        config_path: PathBuf::from(&args.config),
        passwd_path: PathBuf::from(&args.passwd),
        web_root,
        service_cmd: args.service_cmd.clone(),
        service_workdir,
        update_cmd: args.update_cmd.clone(),
        version_file,
        start_timeout: Duration::from_secs(args.start_timeout_secs),
        update_timeout: Duration::from_secs(args.update_timeout_secs),
    })
}
