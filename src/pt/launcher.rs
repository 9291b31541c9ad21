//! Pluggable transport process management
//!
//! Starts the transport executable with the managed-proxy environment and
//! owns the process until it is killed.

use crate::config::{Config, TransportConfig};
use crate::error::LaunchError;
use std::path::PathBuf;
use std::process::Stdio;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Managed transport protocol version
pub const ENV_MANAGED_TRANSPORT_VER: &str = "TOR_PT_MANAGED_TRANSPORT_VER";
/// Directory the transport keeps state in
pub const ENV_STATE_LOCATION: &str = "TOR_PT_STATE_LOCATION";
/// Whether the transport exits when stdin closes
pub const ENV_EXIT_ON_STDIN_CLOSE: &str = "TOR_PT_EXIT_ON_STDIN_CLOSE";
/// Client-role transport list
pub const ENV_CLIENT_TRANSPORTS: &str = "TOR_PT_CLIENT_TRANSPORTS";
/// Server-role transport list
pub const ENV_SERVER_TRANSPORTS: &str = "TOR_PT_SERVER_TRANSPORTS";
/// Server-role bind specification
pub const ENV_SERVER_BINDADDR: &str = "TOR_PT_SERVER_BINDADDR";
/// Server-role forwarding target
pub const ENV_ORPORT: &str = "TOR_PT_ORPORT";

const LOG_TARGET: &str = "ptproxy::pt";

/// Role the transport runs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Transport exposes a local SOCKS5 proxy
    Client,
    /// Transport listens on `bind` and forwards to `orport`
    Server {
        /// Address the transport binds to
        bind: String,
        /// Local service the transport forwards to
        orport: String,
    },
}

/// Everything needed to start a transport
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Path to the executable
    pub binary: PathBuf,
    /// Extra command line arguments
    pub args: Vec<String>,
    /// Transport name
    pub transport_name: String,
    /// Client or server role
    pub role: Role,
    /// State directory, a temporary one is created when unset
    pub state_dir: Option<PathBuf>,
    /// Keep stdin open and ask the transport to exit when it closes
    pub exit_on_stdin_close: bool,
}

impl LaunchSpec {
    /// Client-role spec from a transport configuration
    pub fn client(config: &TransportConfig) -> Self {
        Self::with_role(config, Role::Client)
    }

    /// Spec for whichever role the configuration selects
    pub fn from_config(config: &Config) -> Self {
        let role = match &config.server {
            Some(server) => Role::Server {
                bind: server.bind.clone(),
                orport: server.orport.clone(),
            },
            None => Role::Client,
        };
        Self::with_role(&config.transport, role)
    }

    fn with_role(config: &TransportConfig, role: Role) -> Self {
        LaunchSpec {
            binary: config.binary.clone(),
            args: config.args.clone(),
            transport_name: config.name.clone(),
            role,
            state_dir: config.state_dir.clone(),
            exit_on_stdin_close: config.exit_on_stdin_close,
        }
    }

    /// Environment handed to the transport
    pub fn environment(&self, state_dir: &str) -> Vec<(&'static str, String)> {
        let mut env = vec![
            (ENV_MANAGED_TRANSPORT_VER, "1".to_string()),
            (ENV_STATE_LOCATION, state_dir.to_string()),
            (
                ENV_EXIT_ON_STDIN_CLOSE,
                if self.exit_on_stdin_close { "1" } else { "0" }.to_string(),
            ),
        ];

        match &self.role {
            Role::Client => {
                env.push((ENV_CLIENT_TRANSPORTS, self.transport_name.clone()));
            }
            Role::Server { bind, orport } => {
                env.push((ENV_SERVER_TRANSPORTS, self.transport_name.clone()));
                env.push((
                    ENV_SERVER_BINDADDR,
                    format!("{}-{}", self.transport_name, bind),
                ));
                env.push((ENV_ORPORT, orport.clone()));
            }
        }

        env
    }
}

/// Running transport process
///
/// Dropping the handle kills the process.
pub struct TransportHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    transport_name: String,
    role: Role,
    state_dir: PathBuf,
    _temp_dir: Option<TempDir>,
    killed: bool,
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle")
            .field("pid", &self.child.id())
            .field("transport_name", &self.transport_name)
            .field("role", &self.role)
            .field("state_dir", &self.state_dir)
            .field("killed", &self.killed)
            .finish()
    }
}

/// Start the transport described by `spec`
pub fn launch(spec: &LaunchSpec) -> Result<TransportHandle, LaunchError> {
    let (state_dir, temp_dir) = match &spec.state_dir {
        Some(dir) => (dir.clone(), None),
        None => {
            let temp = tempfile::Builder::new()
                .prefix("ptproxy-")
                .tempdir()
                .map_err(LaunchError::StateDir)?;
            (temp.path().to_path_buf(), Some(temp))
        }
    };
    info!("Transport will keep state in {:?}", state_dir);

    let mut cmd = Command::new(&spec.binary);
    cmd.args(&spec.args)
        .envs(spec.environment(&state_dir.to_string_lossy()))
        .stdin(if spec.exit_on_stdin_close {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| LaunchError::from_spawn(spec.binary.clone(), e))?;

    let stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .ok_or(LaunchError::MissingPipe("stdout"))?;
    if let Some(stderr) = child.stderr.take() {
        drain_lines(stderr, "stderr");
    }

    info!(
        "Launched transport {} ({:?}) pid {:?}",
        spec.transport_name,
        spec.binary,
        child.id()
    );

    Ok(TransportHandle {
        child,
        stdin,
        stdout: Some(BufReader::new(stdout)),
        transport_name: spec.transport_name.clone(),
        role: spec.role.clone(),
        state_dir,
        _temp_dir: temp_dir,
        killed: false,
    })
}

impl TransportHandle {
    /// Take the buffered stdout for the handshake
    ///
    /// Returns None after the first call.
    pub fn take_stdout(&mut self) -> Option<BufReader<ChildStdout>> {
        self.stdout.take()
    }

    /// Keep logging whatever the transport prints after the handshake
    pub fn drain_stdout(reader: BufReader<ChildStdout>) {
        drain_buffered(reader, "stdout");
    }

    /// Process id, None once the process has been reaped
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Transport name the process was started with
    pub fn transport_name(&self) -> &str {
        &self.transport_name
    }

    /// Role the process was started in
    pub fn role(&self) -> &Role {
        &self.role
    }

    /// State directory handed to the process
    pub fn state_dir(&self) -> &std::path::Path {
        &self.state_dir
    }

    /// Whether `kill` has been called
    pub fn is_killed(&self) -> bool {
        self.killed
    }

    /// Terminate the process immediately
    ///
    /// Idempotent: later calls and calls on an already exited process do nothing.
    pub fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;
        self.stdin.take();

        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!("Transport already exited with {}", status);
            }
            _ => {
                if let Err(e) = self.child.start_kill() {
                    warn!("Failed to kill transport: {}", e);
                } else {
                    info!("Killed transport {}", self.transport_name);
                }
            }
        }
    }

    /// Wait for the process to exit on its own
    pub async fn wait_exit(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }

    /// Kill the process and wait for it to be reaped
    pub async fn shutdown(&mut self) {
        self.kill();
        match self.child.wait().await {
            Ok(status) => debug!("Transport exited with {}", status),
            Err(e) => debug!("Failed to reap transport: {}", e),
        }
    }
}

fn drain_lines<R>(stream: R, name: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let reader = BufReader::new(stream);
    drain_buffered(reader, name);
}

fn drain_buffered<R>(reader: R, name: &'static str)
where
    R: tokio::io::AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(target: LOG_TARGET, "[{}] {}", name, line),
                Ok(None) => break,
                Err(e) => {
                    debug!(target: LOG_TARGET, "[{}] read error: {}", name, e);
                    break;
                }
            }
        }
    });
}
