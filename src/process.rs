//! Stage runner: run one external command, forward its output, classify its exit.
//!
//! [`Cmd`] describes an invocation. A [`CommandRunner`] executes it; the
//! pipeline only ever talks to the trait, so tests can substitute a recorder.

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use crate::error::StageFailed;

/// Lines of stderr kept for [`StageFailed::diagnostic`].
pub const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// How long stderr keeps draining after the child has exited. A background
/// grandchild may hold the pipe open indefinitely.
const STDERR_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// One external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
    ok_codes: Vec<i32>,
    capture_stderr: bool,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
            ok_codes: vec![0],
            capture_stderr: true,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        let arg = path.display().to_string();
        self.arg(arg)
    }

    /// Run the command in `dir` instead of the orchestrator's directory.
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Replace the set of exit codes treated as success (default: only 0).
    pub fn ok_codes(mut self, codes: &[i32]) -> Self {
        self.ok_codes = codes.to_vec();
        self
    }

    /// Hand stderr straight to the terminal. The failure report then has no
    /// diagnostic tail.
    pub fn inherit_stderr(mut self) -> Self {
        self.capture_stderr = false;
        self
    }

    pub fn captures_stderr(&self) -> bool {
        self.capture_stderr
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    pub fn accepts(&self, code: i32) -> bool {
        self.ok_codes.contains(&code)
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Build a [`StageFailed`] for this command.
    pub fn failure(&self, exit_code: Option<i32>, diagnostic: impl Into<String>) -> StageFailed {
        StageFailed {
            program: self.program.clone(),
            args: self.args.clone(),
            exit_code,
            diagnostic: diagnostic.into(),
        }
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(OsStr::new(&self.program));
        cmd.args(&self.args);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }
}

/// Executes commands on behalf of pipeline stages.
pub trait CommandRunner {
    /// Run `cmd` to completion. Blocks until the child exits.
    fn run(&self, cmd: &Cmd) -> Result<(), StageFailed>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, cmd: &Cmd) -> Result<(), StageFailed> {
        (**self).run(cmd)
    }
}

/// Runs commands as child processes.
///
/// stdout and stdin are inherited. stderr is forwarded line by line to the
/// terminal while the last [`DIAGNOSTIC_TAIL_LINES`] lines are kept for the
/// failure report.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, cmd: &Cmd) -> Result<(), StageFailed> {
        log::debug!(
            "running `{}`{}",
            cmd.command_line(),
            cmd.get_current_dir()
                .map(|dir| format!(" in '{}'", dir.display()))
                .unwrap_or_default()
        );

        let stderr = if cmd.capture_stderr {
            Stdio::piped()
        } else {
            Stdio::inherit()
        };
        let mut child = cmd
            .to_command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(stderr)
            .spawn()
            .map_err(|err| cmd.failure(None, format!("failed to spawn '{}': {err}", cmd.program)))?;

        let forwarder = child.stderr.take().map(StderrForwarder::spawn);
        let status = child.wait();
        let tail = forwarder
            .map(|forwarder| forwarder.finish(STDERR_DRAIN_GRACE))
            .unwrap_or_default();
        let status = status
            .map_err(|err| cmd.failure(None, format!("failed waiting for '{}': {err}", cmd.program)))?;
        classify(cmd, status, tail)
    }
}

/// Copies a child's stderr to the terminal on a helper thread, keeping the tail.
struct StderrForwarder {
    tail: Arc<Mutex<VecDeque<String>>>,
    done: mpsc::Receiver<()>,
}

impl StderrForwarder {
    fn spawn(stderr: impl std::io::Read + Send + 'static) -> Self {
        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(DIAGNOSTIC_TAIL_LINES)));
        let (done_tx, done) = mpsc::channel();
        let shared = Arc::clone(&tail);
        std::thread::spawn(move || {
            let mut terminal = std::io::stderr();
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                let _ = writeln!(terminal, "{line}");
                let mut tail = shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if tail.len() == DIAGNOSTIC_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            let _ = done_tx.send(());
        });
        Self { tail, done }
    }

    /// Wait up to `grace` for end of stream, then return what was collected.
    /// A thread still blocked on the pipe is left detached.
    fn finish(self, grace: Duration) -> String {
        if self.done.recv_timeout(grace).is_err() {
            log::debug!("stderr still open after child exit; detaching forwarder");
        }
        let tail = self.tail.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let lines: Vec<&str> = tail.iter().map(String::as_str).collect();
        lines.join("\n")
    }
}

fn classify(cmd: &Cmd, status: ExitStatus, diagnostic: String) -> Result<(), StageFailed> {
    match status.code() {
        Some(code) if cmd.accepts(code) => Ok(()),
        code => Err(cmd.failure(code, diagnostic)),
    }
}
