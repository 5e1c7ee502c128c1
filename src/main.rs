//! wsmirror - continuous mirroring of local directory trees to remote hosts.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wsmirror::config::{Connection, ConfigStore, RemoteTarget, WorkspaceSpec};
use wsmirror::daemon::{self, Daemon, EXIT_WORKSPACE_GONE};
use wsmirror::ipc::{DaemonRequest, DaemonResponse, IpcClient, DEFAULT_SOCKET_PATH};
use wsmirror::sync::{RsyncTransfer, SyncTrigger};
use wsmirror::watcher::{Engine, EngineExit, NotifyBackend};

#[derive(Parser)]
#[command(
    name = "wsmirror",
    about = "Continuous one-way mirroring of directory trees to remote hosts",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path of the daemon's command socket.
    #[arg(long, global = true, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon.
    Daemon {
        /// Configuration file to use instead of the default location.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Watch one workspace (spawned by the daemon, not meant for direct
    /// use).
    #[command(hide = true)]
    Watch {
        /// Workspace description as JSON.
        spec: String,
    },
    /// Register a workspace and its first remote with the daemon.
    AddWorkspace {
        /// Absolute path of the local workspace root.
        workspace_root: PathBuf,
        #[command(flatten)]
        remote: RemoteArgs,
    },
    /// Stop mirroring a workspace and forget it.
    RemoveWorkspace {
        /// Absolute path of the local workspace root.
        workspace_root: PathBuf,
    },
    /// Add another remote to an existing workspace.
    AddRemote {
        /// Absolute path of the local workspace root.
        workspace_root: PathBuf,
        #[command(flatten)]
        remote: RemoteArgs,
    },
    /// Remove a remote from a workspace.
    RemoveRemote {
        /// Absolute path of the local workspace root.
        workspace_root: PathBuf,
        /// Remote root path identifying the destination to remove.
        #[arg(long)]
        remote_root: String,
    },
    /// Show the configured workspaces and their watcher state.
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ConnectionArg {
    /// rsync over ssh with explicit username and hostname.
    Ssh,
    /// rsync over ssh through an alias from ~/.ssh/config.
    SshHostAlias,
    /// A remote rsync daemon.
    RsyncDaemon,
}

/// Destination options shared by `add-workspace` and `add-remote`.
#[derive(Args, Debug)]
struct RemoteArgs {
    /// Absolute path of the mirror root on the remote system (module path
    /// for rsync daemons).
    #[arg(long)]
    remote_root: String,

    /// How to reach the remote system.
    #[arg(long, value_enum)]
    connection: ConnectionArg,

    /// Remote username (ssh and rsync-daemon connections; omit to connect
    /// as the invoking user or anonymously).
    #[arg(long)]
    username: Option<String>,

    /// Remote hostname (ssh and rsync-daemon connections).
    #[arg(long)]
    hostname: Option<String>,

    /// Host alias from ~/.ssh/config (ssh-host-alias connections).
    #[arg(long)]
    ssh_host_alias: Option<String>,

    /// Private key file for ssh (optional, ssh connections only).
    #[arg(long)]
    identity_file: Option<PathBuf>,

    /// Port of the remote rsync daemon (optional, rsync-daemon
    /// connections only).
    #[arg(long)]
    port: Option<u16>,
}

impl RemoteArgs {
    /// Validate the option combination and build the destination.
    fn into_target(self) -> Result<RemoteTarget, String> {
        let connection = match self.connection {
            ConnectionArg::Ssh => {
                reject_option(self.ssh_host_alias.is_some(), "--ssh-host-alias", "ssh")?;
                reject_option(self.port.is_some(), "--port", "ssh")?;
                if let Some(identity) = &self.identity_file {
                    if !identity.is_absolute() {
                        return Err(format!(
                            "identity file '{}' is not an absolute path",
                            identity.display()
                        ));
                    }
                    if !identity.is_file() {
                        return Err(format!(
                            "identity file '{}' does not exist",
                            identity.display()
                        ));
                    }
                }
                Connection::Ssh {
                    username: optional_value(self.username, "--username")?,
                    hostname: require_option(self.hostname, "--hostname", "ssh")?,
                    identity_file_path: self.identity_file,
                }
            }
            ConnectionArg::SshHostAlias => {
                reject_option(self.username.is_some(), "--username", "ssh-host-alias")?;
                reject_option(self.hostname.is_some(), "--hostname", "ssh-host-alias")?;
                reject_option(
                    self.identity_file.is_some(),
                    "--identity-file",
                    "ssh-host-alias",
                )?;
                reject_option(self.port.is_some(), "--port", "ssh-host-alias")?;
                Connection::SshHostAlias {
                    ssh_host_alias: require_option(
                        self.ssh_host_alias,
                        "--ssh-host-alias",
                        "ssh-host-alias",
                    )?,
                }
            }
            ConnectionArg::RsyncDaemon => {
                reject_option(
                    self.ssh_host_alias.is_some(),
                    "--ssh-host-alias",
                    "rsync-daemon",
                )?;
                reject_option(
                    self.identity_file.is_some(),
                    "--identity-file",
                    "rsync-daemon",
                )?;
                if self.port == Some(0) {
                    return Err("port must be a positive integer".to_string());
                }
                Connection::RsyncDaemon {
                    username: optional_value(self.username, "--username")?,
                    hostname: require_option(self.hostname, "--hostname", "rsync-daemon")?,
                    port: self.port,
                }
            }
        };
        Ok(RemoteTarget {
            root: self.remote_root,
            connection,
        })
    }
}

fn require_option(value: Option<String>, option: &str, connection: &str) -> Result<String, String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        Some(_) => Err(format!("{option} must not be blank")),
        None => Err(format!("{option} is required for {connection} connections")),
    }
}

fn optional_value(value: Option<String>, option: &str) -> Result<Option<String>, String> {
    match value {
        Some(v) if v.trim().is_empty() => Err(format!("{option} must not be blank")),
        other => Ok(other),
    }
}

fn reject_option(present: bool, option: &str, connection: &str) -> Result<(), String> {
    if present {
        Err(format!("{option} is not valid for {connection} connections"))
    } else {
        Ok(())
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Daemon { config } => run_daemon(config, cli.socket).await,
        Commands::Watch { spec } => run_watcher(&spec).await,
        Commands::AddWorkspace {
            workspace_root,
            remote,
        } => {
            if !workspace_root.is_absolute() {
                return fail("the workspace root must be an absolute path");
            }
            let remote = match remote.into_target() {
                Ok(remote) => remote,
                Err(message) => return fail(&message),
            };
            send_command(
                &cli.socket,
                &DaemonRequest::AddWorkspace {
                    workspace: WorkspaceSpec {
                        root: workspace_root,
                        remotes: vec![remote],
                    },
                },
            )
            .await
        }
        Commands::RemoveWorkspace { workspace_root } => {
            send_command(
                &cli.socket,
                &DaemonRequest::RemoveWorkspace {
                    root: workspace_root,
                },
            )
            .await
        }
        Commands::AddRemote {
            workspace_root,
            remote,
        } => {
            let remote = match remote.into_target() {
                Ok(remote) => remote,
                Err(message) => return fail(&message),
            };
            send_command(
                &cli.socket,
                &DaemonRequest::AddRemoteSystem {
                    root: workspace_root,
                    remote,
                },
            )
            .await
        }
        Commands::RemoveRemote {
            workspace_root,
            remote_root,
        } => {
            send_command(
                &cli.socket,
                &DaemonRequest::RemoveRemoteSystem {
                    root: workspace_root,
                    remote_root,
                },
            )
            .await
        }
        Commands::Status => send_command(&cli.socket, &DaemonRequest::Status).await,
    }
}

async fn run_daemon(config: Option<PathBuf>, socket: PathBuf) -> ExitCode {
    let config_path = match config.or_else(ConfigStore::default_path) {
        Some(path) => path,
        None => return fail("could not determine a configuration directory"),
    };
    let daemon = Daemon::new(ConfigStore::new(config_path), socket);
    match daemon.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "daemon failed");
            ExitCode::FAILURE
        }
    }
}

/// Watch one workspace until asked to stop or the workspace disappears.
async fn run_watcher(spec: &str) -> ExitCode {
    let workspace: WorkspaceSpec = match serde_json::from_str(spec) {
        Ok(workspace) => workspace,
        Err(e) => return fail(&format!("invalid workspace description: {e}")),
    };
    if !workspace.root.is_dir() {
        tracing::warn!(root = %workspace.root.display(), "workspace root does not exist");
        return exit_code(EXIT_WORKSPACE_GONE);
    }

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let backend = match NotifyBackend::new(tx) {
        Ok(backend) => backend,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize filesystem watcher");
            return ExitCode::FAILURE;
        }
    };
    let trigger = SyncTrigger::new(
        workspace.root.clone(),
        workspace.remotes,
        Arc::new(RsyncTransfer),
    );
    let mut engine = Engine::new(workspace.root, backend, trigger);

    let cancel = tokio_util::sync::CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if daemon::wait_for_shutdown_signal().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    match engine.run(rx, cancel).await {
        Ok(EngineExit::Shutdown) => ExitCode::SUCCESS,
        Ok(EngineExit::RootRemoved) => exit_code(EXIT_WORKSPACE_GONE),
        Err(e) => {
            tracing::error!(error = %e, "watcher failed");
            ExitCode::FAILURE
        }
    }
}

async fn send_command(socket: &PathBuf, request: &DaemonRequest) -> ExitCode {
    let client = IpcClient::with_path(socket);
    match client.send(request).await {
        Ok(DaemonResponse::Ok { message }) => {
            println!("{message}");
            ExitCode::SUCCESS
        }
        Ok(DaemonResponse::Error { message }) => fail(&message),
        Err(e) => fail(&e.to_string()),
    }
}

fn fail(message: &str) -> ExitCode {
    eprintln!("error: {message}");
    ExitCode::FAILURE
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(code as u8)
}
