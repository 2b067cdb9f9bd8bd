//! Time-bounded execution of external tools.

use std::borrow::Cow;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::debug;

/// How long to wait for output pipes to drain after the child is gone. Grandchildren (the
/// emulator behind the debugger) may keep a pipe open after their parent is killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: impl AsRef<Path>, args: Vec<String>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Program followed by its arguments.
    pub fn words(&self) -> impl Iterator<Item = Cow<'_, str>> {
        std::iter::once(self.program.to_string_lossy()).chain(self.args.iter().map(Cow::from))
    }

    /// Program and arguments as one shell command line.
    pub fn command_line(&self) -> String {
        self.words()
            .map(|word| shell_quote(&word).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Quotes `word` for a POSIX shell. Words made only of characters the shell never interprets
/// are returned unchanged.
pub fn shell_quote(word: &str) -> Cow<'_, str> {
    let plain = !word.is_empty()
        && word
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"_-./=:,+@%".contains(&b));
    if plain {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', r"'\''")))
    }
}

#[derive(Debug)]
pub struct Execution {
    /// `None` when the process was killed after timing out.
    pub status: Option<ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl Execution {
    pub fn success(&self) -> bool {
        self.status.is_some_and(|status| status.success())
    }
}

/// Runs `invocation` to completion or until `timeout` elapses.
///
/// On timeout the child is killed and whatever it printed so far is returned with `timed_out`
/// set. Only failing to start the program is an error.
pub async fn run(invocation: &Invocation, timeout: Duration) -> io::Result<Execution> {
    debug!(command = %invocation.command_line(), "running");

    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = spawn(&mut cmd).await?;
    let stdout = Capture::start(child.stdout.take());
    let stderr = Capture::start(child.stderr.take());

    let (status, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => (Some(status?), false),
        Err(_) => {
            debug!(
                command = %invocation.command_line(),
                timeout_secs = timeout.as_secs_f64(),
                "timeout while executing"
            );
            let _ = child.start_kill();
            let _ = tokio::time::timeout(DRAIN_GRACE, child.wait()).await;
            (None, true)
        }
    };

    Ok(Execution {
        status,
        stdout: stdout.finish().await,
        stderr: stderr.finish().await,
        timed_out,
    })
}

async fn spawn(cmd: &mut Command) -> io::Result<Child> {
    let mut attempts = 0u32;
    loop {
        match cmd.spawn() {
            Ok(child) => return Ok(child),
            Err(err) => {
                // Freshly written scripts can briefly fail with ETXTBUSY ("Text file busy")
                // while another worker still holds them open for writing.
                #[cfg(unix)]
                let should_retry = err.raw_os_error() == Some(26);
                #[cfg(not(unix))]
                let should_retry = false;

                if should_retry && attempts < 3 {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(10 * attempts as u64)).await;
                    continue;
                }
                return Err(err);
            }
        }
    }
}

/// Background reader that keeps everything read so far, even if the pipe never closes.
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Capture {
    fn start<R>(reader: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let task = reader.map(|mut reader| {
            let buf = Arc::clone(&buf);
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match reader.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if let Ok(mut buf) = buf.lock() {
                                buf.extend_from_slice(&chunk[..n]);
                            }
                        }
                    }
                }
            })
        });
        Self { buf, task }
    }

    async fn finish(mut self) -> Vec<u8> {
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        self.buf
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }
}
