use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tokio::net::UnixListener;
use tracing_subscriber::EnvFilter;

use idc_remote::config::{BundleIdArgs, Cli, Command, HealthArgs, ServeArgs};
use idc_remote::manager::{ManagerAgent, ManagerClient, ManagerInterface, ProcBundleResolver};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::BundleId(args) => bundle_id(args).await,
        Command::Health(args) => health(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

async fn serve(args: ServeArgs) -> Result<(), BoxError> {
    args.validate()?;
    let path = args.socket_path();
    remove_stale_socket(&path)?;

    let listener = UnixListener::bind(&path)?;
    tracing::info!(socket = %path.display(), prefix = %args.bundle_prefix, "agent listening");

    let agent = ManagerAgent::new(ProcBundleResolver::new(args.bundle_prefix.clone()))
        .with_reply_timeout(args.reply_timeout())
        .with_max_in_flight(args.max_in_flight);

    let outcome = tokio::select! {
        r = agent.serve(listener) => r.map_err(BoxError::from),
        r = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            r.map_err(BoxError::from)
        }
    };

    if let Err(e) = std::fs::remove_file(&path) {
        tracing::debug!(error = %e, "socket cleanup failed");
    }
    outcome
}

async fn bundle_id(args: BundleIdArgs) -> Result<(), BoxError> {
    args.validate()?;
    let client = ManagerClient::connect(args.socket_path()).await?;
    let reply = tokio::time::timeout(args.timeout(), client.request_bundle_id(args.pid))
        .await
        .map_err(|_| format!("no reply within {:?}", args.timeout()))??;
    println!("{reply}");
    Ok(())
}

async fn health(args: HealthArgs) -> Result<(), BoxError> {
    args.validate()?;
    let report = tokio::time::timeout(args.timeout(), async {
        let client = ManagerClient::connect(args.socket_path()).await?;
        client.health().await
    })
    .await
    .map_err(|_| format!("agent did not answer within {:?}", args.timeout()))??;

    if !report.is_ok() {
        return Err(format!("agent unhealthy: {}", report.status).into());
    }
    tracing::debug!(version = %report.version, "agent healthy");
    println!("ok");
    Ok(())
}

/// Remove a leftover socket from a previous run. Refuses to touch anything
/// that is not a socket.
fn remove_stale_socket(path: &Path) -> Result<(), BoxError> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            tracing::debug!(socket = %path.display(), "removing stale socket");
            std::fs::remove_file(path)?;
            Ok(())
        }
        Ok(_) => Err(format!("{} exists and is not a socket", path.display()).into()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
