//! Spawning plugin processes.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, info};

use crate::transport::{BoxedReader, BoxedWriter};

/// Environment variable carrying the plugin id into the plugin process.
pub const PLUGIN_ID_ENV: &str = "CHATHUB_PLUGIN_ID";

/// Environment variable carrying the per-call timeout, in milliseconds,
/// the plugin should use for its calls to the server.
pub const CALL_TIMEOUT_ENV: &str = "CHATHUB_PLUGIN_CALL_TIMEOUT_MS";

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to launch one plugin process.
#[derive(Debug, Clone)]
pub struct PluginSpec {
    /// Plugin id. Passed to the process and checked at handshake.
    pub id: String,
    /// Executable to run.
    pub executable: PathBuf,
    /// Command-line arguments.
    pub args: Vec<String>,
    /// Working directory (the plugin's bundle directory).
    pub working_dir: Option<PathBuf>,
    /// Whether stderr lines are re-emitted in the server log.
    pub forward_stderr: bool,
    /// Timeout the plugin applies to its own API calls.
    pub call_timeout: Duration,
}

impl PluginSpec {
    /// Spec with no arguments and stderr forwarding on.
    pub fn new(id: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            executable: executable.into(),
            args: Vec::new(),
            working_dir: None,
            forward_stderr: true,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// A running plugin process.
#[async_trait]
pub trait PluginProcess: Send + 'static {
    /// OS process id, if there is one.
    fn pid(&self) -> Option<u32>;

    /// Forcibly terminates the process.
    async fn kill(&mut self) -> io::Result<()>;

    /// Resolves when the process has exited.
    async fn wait(&mut self) -> io::Result<()>;
}

/// Channel halves and process handle of a freshly launched plugin.
pub struct LaunchedPlugin {
    /// Reads what the plugin writes.
    pub reader: BoxedReader,
    /// Writes to the plugin.
    pub writer: BoxedWriter,
    /// The process.
    pub process: Box<dyn PluginProcess>,
}

/// Starts plugin processes.
#[async_trait]
pub trait PluginLauncher: Send + Sync + 'static {
    /// Launches the plugin described by `spec`.
    async fn launch(&self, spec: &PluginSpec) -> io::Result<LaunchedPlugin>;
}

/// Launches plugins as child processes talking over stdin/stdout.
#[derive(Debug, Clone, Default)]
pub struct CommandLauncher;

#[async_trait]
impl PluginLauncher for CommandLauncher {
    async fn launch(&self, spec: &PluginSpec) -> io::Result<LaunchedPlugin> {
        let mut command = Command::new(&spec.executable);
        command
            .args(&spec.args)
            .env(PLUGIN_ID_ENV, &spec.id)
            .env(CALL_TIMEOUT_ENV, spec.call_timeout.as_millis().to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("plugin stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("plugin stdout was not captured"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(spec.id.clone(), stderr, spec.forward_stderr));
        }

        info!(
            plugin_id = %spec.id,
            pid = child.id(),
            executable = %spec.executable.display(),
            "Plugin process spawned"
        );

        Ok(LaunchedPlugin {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            process: Box::new(ChildProcess { child }),
        })
    }
}

/// Reads plugin stderr to completion so the pipe never fills.
async fn drain_stderr(plugin_id: String, stderr: ChildStderr, forward: bool) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match read_stderr_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => {
                if forward {
                    debug!(plugin_id = %plugin_id, target_stream = "stderr", "{line}");
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(plugin_id = %plugin_id, error = %err, "Stopped reading plugin stderr");
                break;
            }
        }
    }
}

/// Next stderr line without its terminator. Bytes that are not UTF-8 are
/// replaced rather than ending the stream.
async fn read_stderr_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Option<String>>
where
    R: AsyncBufReadExt + Unpin,
{
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

/// [`PluginProcess`] backed by a tokio child process.
struct ChildProcess {
    child: Child,
}

#[async_trait]
impl PluginProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }

    async fn wait(&mut self) -> io::Result<()> {
        self.child.wait().await.map(|_| ())
    }
}
