use std::ffi::OsString;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::process::Stdio;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::common::error::FrontendError;
use crate::common::placeholders::{
    GROUP_PLACEHOLDER, PARENT_PID_PLACEHOLDER, PlaceholderMap, WORK_DIR_PLACEHOLDER, resolve,
};
use crate::directory::condor::CONDOR_CONFIG_ENV;

/// Environment variables with these prefixes are not passed to group workers.
const REMOVED_ENV_PREFIXES: [&str; 2] = ["_CONDOR_", "X509_"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// `None` when the worker was terminated by a signal
    pub code: Option<i32>,
}

impl Display for WorkerExit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("a signal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Running group worker.
pub trait GroupProcess {
    fn pid(&self) -> Option<u32>;

    /// Checks whether the worker has exited, without blocking.
    fn try_wait(&mut self) -> crate::Result<Option<WorkerExit>>;

    /// Output lines produced since the last call, without blocking.
    fn drain_output(&mut self) -> Vec<OutputLine>;

    /// Asks the worker to stop. Failures are logged, a worker that is already gone is ignored.
    fn terminate(&mut self);
}

pub trait WorkerSpawner {
    fn spawn(&mut self, group: &str) -> crate::Result<Box<dyn GroupProcess>>;
}

/// Starts group workers as child processes of the frontend.
pub struct CommandSpawner {
    command: Vec<String>,
    work_dir: PathBuf,
    condor_config: Option<PathBuf>,
}

impl CommandSpawner {
    pub fn new(command: Vec<String>, work_dir: PathBuf) -> Self {
        Self {
            command,
            work_dir,
            condor_config: None,
        }
    }

    /// Configuration file exported to the workers as `CONDOR_CONFIG`.
    pub fn with_condor_config(mut self, condor_config: Option<PathBuf>) -> Self {
        self.condor_config = condor_config;
        self
    }

    fn environment(&self) -> Vec<(&'static str, OsString)> {
        self.condor_config
            .iter()
            .map(|config| (CONDOR_CONFIG_ENV, config.clone().into_os_string()))
            .collect()
    }

    fn arguments(&self, group: &str) -> Vec<String> {
        let mut placeholders = PlaceholderMap::new();
        placeholders.insert(GROUP_PLACEHOLDER, group.into());
        placeholders.insert(WORK_DIR_PLACEHOLDER, self.work_dir.to_string_lossy());
        placeholders.insert(PARENT_PID_PLACEHOLDER, std::process::id().to_string().into());
        self.command
            .iter()
            .map(|arg| resolve(&placeholders, arg))
            .collect()
    }
}

/// Names of inherited environment variables that must not reach group workers.
pub fn removed_env_vars() -> Vec<OsString> {
    std::env::vars_os()
        .map(|(key, _)| key)
        .filter(|key| {
            let upper = key.to_string_lossy().to_ascii_uppercase();
            REMOVED_ENV_PREFIXES
                .iter()
                .any(|prefix| upper.starts_with(prefix))
        })
        .collect()
}

fn forward_lines<R, F>(reader: R, sender: UnboundedSender<OutputLine>, wrap: F)
where
    R: AsyncRead + Unpin + Send + 'static,
    F: Fn(String) -> OutputLine + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if sender.send(wrap(line)).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    log::debug!("Reading worker output failed: {error}");
                    break;
                }
            }
        }
    });
}

impl WorkerSpawner for CommandSpawner {
    fn spawn(&mut self, group: &str) -> crate::Result<Box<dyn GroupProcess>> {
        let arguments = self.arguments(group);
        let (program, args) = arguments
            .split_first()
            .ok_or_else(|| FrontendError::ConfigError("Worker command is empty".to_string()))?;

        log::debug!("Running command `{}`", arguments.join(" "));
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        for key in removed_env_vars() {
            command.env_remove(key);
        }
        command.envs(self.environment());

        let mut child = command.spawn().map_err(|error| {
            FrontendError::GenericError(format!(
                "Cannot start worker for group {group} ({program}): {error}"
            ))
        })?;

        let (sender, receiver) = unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, sender.clone(), OutputLine::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, sender, OutputLine::Stderr);
        }
        log::info!(
            "Started worker for group {group} (pid {})",
            child.id().unwrap_or(0)
        );

        Ok(Box::new(ChildProcess {
            child,
            output: receiver,
        }))
    }
}

struct ChildProcess {
    child: Child,
    output: UnboundedReceiver<OutputLine>,
}

impl GroupProcess for ChildProcess {
    /// `None` once the exit status has been collected.
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_wait(&mut self) -> crate::Result<Option<WorkerExit>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| WorkerExit {
                code: status.code(),
            }))
    }

    fn drain_output(&mut self) -> Vec<OutputLine> {
        let mut lines = Vec::new();
        while let Ok(line) = self.output.try_recv() {
            lines.push(line);
        }
        lines
    }

    fn terminate(&mut self) {
        // No pid once reaped
        if let Some(pid) = self.child.id() {
            terminate_pid(pid);
        }
    }
}

/// Sends SIGTERM to `pid`, a process that no longer exists is not an error.
pub fn terminate_pid(pid: u32) {
    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(error) => log::warn!("Cannot send SIGTERM to worker {pid}: {error}"),
    }
}
