// mcp-client/src/transport/process.rs
use async_trait::async_trait;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, info_span, warn, Instrument, Span};

use super::stream::StreamTransport;
use super::Transport;
use crate::error::TransportError;

/// How long `close` waits for the server to exit after the termination signal
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// How often liveness is polled while waiting for the server to exit
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long `close` waits for the stderr drain to finish before aborting it
const STDERR_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Log target for lines the server writes to its stderr
pub const SERVER_STDERR_TARGET: &str = "ontomcp_client::server_stderr";

#[derive(Clone)]
struct ProcessConfig {
    path: PathBuf,
    interpreter: Option<OsString>,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
    shutdown_timeout: Duration,
    poll_interval: Duration,
    stderr_sink: Option<mpsc::UnboundedSender<String>>,
}

/// A launched server and everything bound to it
struct Running {
    child: Child,
    pid: Option<u32>,
    stream: StreamTransport,
    stderr_task: JoinHandle<()>,
}

#[derive(Default)]
struct ProcessState {
    running: Option<Running>,
    closed: bool,
}

/// Transport that runs the server as a child process and talks to it over its stdio.
///
/// Clones share the same child, so a caller can keep a handle for
/// [`is_alive`](Self::is_alive) after handing the transport to a client.
#[derive(Clone)]
pub struct ProcessTransport {
    config: ProcessConfig,
    state: Arc<Mutex<ProcessState>>,
    span: Span,
}

impl ProcessTransport {
    /// Create a transport for the server at `path`.
    ///
    /// Nothing is started until [`launch`](Self::launch).
    pub fn new(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(TransportError::NotFound(path));
        }

        let span = info_span!(
            "process_transport",
            server = %path.display(),
            pid = tracing::field::Empty
        );

        Ok(Self {
            config: ProcessConfig {
                path,
                interpreter: None,
                args: Vec::new(),
                env: Vec::new(),
                shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
                poll_interval: DEFAULT_POLL_INTERVAL,
                stderr_sink: None,
            },
            state: Arc::new(Mutex::new(ProcessState::default())),
            span,
        })
    }

    /// Arguments passed to the server after the path
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.config.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Run the path as a script through `program`, e.g. `python3`
    pub fn with_interpreter(mut self, program: impl Into<OsString>) -> Self {
        self.config.interpreter = Some(program.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.config.env.push((key.into(), value.into()));
        self
    }

    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.config.shutdown_timeout = shutdown_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.config.poll_interval = poll_interval;
        self
    }

    /// Also forward every stderr line of the server to `sink`
    pub fn with_stderr_sink(mut self, sink: mpsc::UnboundedSender<String>) -> Self {
        self.config.stderr_sink = Some(sink);
        self
    }

    /// Start the server process.
    ///
    /// Returns `Ok(false)` without doing anything when a server is already
    /// running under this transport.
    pub async fn launch(&self) -> Result<bool, TransportError> {
        self.launch_inner().instrument(self.span.clone()).await
    }

    /// Whether the server process currently exists
    pub async fn is_alive(&self) -> bool {
        let mut state = self.state.lock().await;
        state.running.as_mut().map_or(false, Running::is_alive)
    }

    /// OS process id of the running server
    pub async fn pid(&self) -> Option<u32> {
        let state = self.state.lock().await;
        state.running.as_ref().and_then(|running| running.pid)
    }

    /// Stop the server: sever the pipes, ask it to terminate, and kill it if it
    /// does not exit within the shutdown timeout. Never fails; safe to repeat.
    pub async fn close(&self) {
        self.close_inner().instrument(self.span.clone()).await
    }

    async fn launch_inner(&self) -> Result<bool, TransportError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(TransportError::Closed);
        }

        if let Some(running) = state.running.as_mut() {
            if running.is_alive() {
                warn!(pid = running.pid, "Server process already running; launch ignored");
                return Ok(false);
            }
            info!(pid = running.pid, "Previous server process has exited; relaunching");
            if let Some(stale) = state.running.take() {
                self.shut_down(stale).await;
            }
        }

        let mut command = match &self.config.interpreter {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(&self.config.path);
                command
            }
            None => Command::new(&self.config.path),
        };
        command
            .args(&self.config.args)
            .envs(self.config.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| TransportError::Launch {
            path: self.config.path.clone(),
            source,
        })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            if let Err(err) = child.kill().await {
                debug!("Failed to kill server process without pipes: {}", err);
            }
            return Err(TransportError::Launch {
                path: self.config.path.clone(),
                source: io::Error::new(io::ErrorKind::Other, "child stdio pipes unavailable"),
            });
        };

        let pid = child.id();
        if let Some(pid) = pid {
            self.span.record("pid", pid);
        }

        let stderr_task = tokio::spawn(
            drain_stderr(stderr, self.config.stderr_sink.clone()).instrument(self.span.clone()),
        );

        state.running = Some(Running {
            child,
            pid,
            stream: StreamTransport::owning(stdout, stdin),
            stderr_task,
        });

        info!(pid, "Launched server process");
        Ok(true)
    }

    async fn close_inner(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;

        if let Some(running) = state.running.take() {
            self.shut_down(running).await;
            info!("Server process shut down");
        }
    }

    async fn shut_down(&self, running: Running) {
        let Running {
            mut child,
            pid,
            stream,
            mut stderr_task,
        } = running;

        // A reply still in flight holds the stream lock; don't wait on it forever
        match timeout(self.config.shutdown_timeout, stream.close()).await {
            Ok(Err(err)) => debug!("Ignoring error while closing server pipes: {}", err),
            Err(_) => debug!("Server pipes busy; continuing shutdown"),
            Ok(Ok(())) => {}
        }

        match child.try_wait() {
            Ok(Some(status)) => debug!(?status, "Server process already exited"),
            Ok(None) => self.terminate(&mut child, pid).await,
            Err(err) => {
                warn!("Failed to query server process: {}", err);
                self.terminate(&mut child, pid).await;
            }
        }

        if timeout(STDERR_DRAIN_GRACE, &mut stderr_task).await.is_err() {
            debug!("Stderr drain did not finish; aborting it");
            stderr_task.abort();
        }
    }

    /// Graceful signal, bounded wait, then a forced kill
    async fn terminate(&self, child: &mut Child, pid: Option<u32>) {
        if request_termination(pid) {
            let deadline = Instant::now() + self.config.shutdown_timeout;
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        debug!(?status, "Server process exited after termination request");
                        return;
                    }
                    Ok(None) if Instant::now() >= deadline => break,
                    Ok(None) => sleep(self.config.poll_interval).await,
                    Err(err) => {
                        warn!("Failed to poll server process: {}", err);
                        break;
                    }
                }
            }
            warn!(
                timeout = ?self.config.shutdown_timeout,
                "Server process ignored termination request; killing it"
            );
        }

        match child.kill().await {
            Ok(()) => debug!("Server process killed"),
            Err(err) => warn!("Failed to kill server process: {}", err),
        }
    }

    async fn current_stream(&self) -> Result<StreamTransport, TransportError> {
        let state = self.state.lock().await;
        match &state.running {
            Some(running) => Ok(running.stream.clone()),
            None if state.closed => Err(TransportError::Closed),
            None => Err(TransportError::NotLaunched),
        }
    }
}

impl Running {
    fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(err) => {
                warn!("Failed to query server process: {}", err);
                false
            }
        }
    }
}

async fn drain_stderr(stderr: ChildStderr, sink: Option<mpsc::UnboundedSender<String>>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                info!(target: SERVER_STDERR_TARGET, "{}", line);
                if let Some(sink) = &sink {
                    let _ = sink.send(line);
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!("Failed to read server stderr: {}", err);
                break;
            }
        }
    }
    debug!("Server stderr closed");
}

#[cfg(unix)]
fn request_termination(pid: Option<u32>) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return false;
    };

    #[allow(clippy::cast_possible_wrap)]
    let target = Pid::from_raw(pid as i32);
    match kill(target, Signal::SIGTERM) {
        Ok(()) => true,
        Err(err) => {
            warn!(pid, "Failed to send SIGTERM: {}", err);
            false
        }
    }
}

#[cfg(not(unix))]
fn request_termination(_pid: Option<u32>) -> bool {
    false
}

#[async_trait]
impl Transport for ProcessTransport {
    async fn send(&self, message: &str) -> Result<(), TransportError> {
        self.current_stream().await?.send(message).await
    }

    async fn send_and_receive(&self, message: &str) -> Result<String, TransportError> {
        self.current_stream().await?.send_and_receive(message).await
    }

    async fn receive(&self) -> Result<String, TransportError> {
        self.current_stream().await?.receive().await
    }

    async fn close(&self) -> Result<(), TransportError> {
        ProcessTransport::close(self).await;
        Ok(())
    }
}
