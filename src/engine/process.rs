//! Subprocess execution behind a trait so detection, probing and encoding can
//! be driven by a fake runner in tests.

use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Set by the Ctrl-C handler; every running child is torn down when it flips.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_GRACE: Duration = Duration::from_secs(5);

/// A fully constructed external command: program, arguments, extra environment
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(&mut self, path: &Path) -> &mut Self {
        self.arg(path.to_string_lossy())
    }

    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Value following the first occurrence of `flag` (e.g. `-c:v`)
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        let mut args = self.args.iter();
        while let Some(arg) = args.next() {
            if arg == flag {
                return args.next().map(String::as_str);
            }
        }
        None
    }

    /// Last argument, which is the output target for ffmpeg invocations
    pub fn last_arg(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        match shlex::try_join(words) {
            Ok(joined) => f.write_str(&joined),
            // Arguments with NUL bytes can't be quoted; show them raw
            Err(_) => write!(f, "{} {}", self.program, self.args.join(" ")),
        }
    }
}

/// Captured result of one subprocess run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` when the process was terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub interrupted: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0) && !self.timed_out && !self.interrupted
    }

    /// Last `lines` lines of stderr, for error messages
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }

    pub fn describe_status(&self) -> String {
        if self.interrupted {
            "interrupted".to_string()
        } else if self.timed_out {
            "timed out".to_string()
        } else {
            match self.status {
                Some(code) => format!("exit code {}", code),
                None => "terminated by signal".to_string(),
            }
        }
    }
}

/// Executes external commands. `Err` means the command could not be started
/// at all (typically a missing binary).
pub trait ProcessRunner: Send + Sync {
    fn run(&self, cmd: &CommandLine) -> io::Result<ProcessOutput>;
}

/// Runs commands on the host, each in its own process group so a timeout or
/// Ctrl-C can take down ffmpeg together with anything it spawned.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    timeout: Option<Duration>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, cmd: &CommandLine) -> io::Result<ProcessOutput> {
        let mut command = cmd.to_command();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_thread = thread::spawn(move || read_pipe(stdout));
        let stderr_thread = thread::spawn(move || read_pipe(stderr));

        let started = Instant::now();
        let mut timed_out = false;
        let mut interrupted = false;

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }

            if is_interrupted() {
                interrupted = true;
            } else if self.timeout.is_some_and(|t| started.elapsed() >= t) {
                timed_out = true;
            }

            if timed_out || interrupted {
                tracing::warn!(
                    program = %cmd.program,
                    timed_out,
                    interrupted,
                    "terminating process group"
                );
                terminate(&mut child);
                break child.wait()?;
            }

            thread::sleep(POLL_INTERVAL);
        };

        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();

        Ok(ProcessOutput {
            status: status.code(),
            stdout,
            stderr,
            timed_out,
            interrupted,
        })
    }
}

fn read_pipe<R: Read>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    // The child leads its own group (process_group(0) above); ESRCH just
    // means the group is already gone
    let pgid = Pid::from_raw(child.id() as i32);
    let _ = killpg(pgid, Signal::SIGTERM);

    let deadline = Instant::now() + KILL_GRACE;
    while Instant::now() < deadline {
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        thread::sleep(POLL_INTERVAL);
    }

    let _ = killpg(pgid, Signal::SIGKILL);
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.kill();
}

/// Whether Ctrl-C was received since startup
pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Route Ctrl-C into the interrupt flag instead of killing the orchestrator,
/// so running encodes are torn down and temp files removed.
pub fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        tracing::warn!(error = %e, "could not install Ctrl-C handler");
    }
}
