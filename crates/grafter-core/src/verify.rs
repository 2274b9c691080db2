//! Build Verifier: runs the project's correctness check and normalizes its
//! output.
//!
//! Structured diagnostics are recovered from TypeScript-style
//! (`file(line,col): error TS1234: …`) and colon-style
//! (`file:line:col - error …`) lines. When none are found the exit status
//! alone decides, with the raw output attached.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::VerifyConfig;
use crate::errors::{GraftError, GraftResult};

static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap());

static TSC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<file>[^\s(][^(]*)\((?P<line>\d+),(?P<col>\d+)\):\s+(?P<sev>error|warning)(?:\s+(?P<code>[A-Za-z]+\d+))?:\s*(?P<msg>.*)$",
    )
    .unwrap()
});

static COLON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<file>[^\s:][^:]*):(?P<line>\d+):(?P<col>\d+)(?::|\s+-)\s*(?P<sev>error|warning)(?:\s+(?P<code>[A-Za-z]+\d+))?:?\s*(?P<msg>.*)$",
    )
    .unwrap()
});

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDiagnostic {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
    pub code: Option<String>,
}

impl BuildDiagnostic {
    /// Identity used to compare against the baseline; line numbers shift as
    /// files are edited, so they are left out.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.file,
            self.code.as_deref().unwrap_or(""),
            self.message
        )
    }
}

impl std::fmt::Display for BuildDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}: ", self.file, self.line, self.column)?;
        if let Some(code) = &self.code {
            write!(f, "{code}: ")?;
        }
        f.write_str(&self.message)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildWarning {
    pub file: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    pub errors: Vec<BuildDiagnostic>,
    pub warnings: Vec<BuildWarning>,
    /// Combined stdout and stderr.
    pub raw_output: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl BuildResult {
    /// Build a result from the process outcome and its captured output.
    pub fn from_output(exit_code: Option<i32>, raw_output: String) -> Self {
        let (errors, warnings) = parse_diagnostics(&raw_output);
        Self {
            success: exit_code == Some(0) && errors.is_empty(),
            errors,
            warnings,
            raw_output,
            exit_code,
            timed_out: false,
            duration_ms: 0,
        }
    }

    pub fn passed() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            ..Self::default()
        }
    }

    /// Whether the failure came with parseable diagnostics.
    pub fn is_structured(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn error_keys(&self) -> BTreeSet<String> {
        self.errors.iter().map(BuildDiagnostic::key).collect()
    }

    /// Errors not present in `baseline`.
    pub fn new_errors<'a>(&'a self, baseline: &BTreeSet<String>) -> Vec<&'a BuildDiagnostic> {
        self.errors
            .iter()
            .filter(|e| !baseline.contains(&e.key()))
            .collect()
    }

    /// Pass/fail after discounting pre-existing errors.
    pub fn passes_against(&self, baseline: Option<&BTreeSet<String>>) -> bool {
        if self.success {
            return true;
        }
        if self.timed_out || !self.is_structured() {
            return false;
        }
        baseline.is_some_and(|b| self.new_errors(b).is_empty())
    }

    /// Short human summary of why the build failed.
    pub fn summary(&self, baseline: Option<&BTreeSet<String>>) -> String {
        if self.timed_out {
            return format!("build check timed out after {}ms", self.duration_ms);
        }
        let errors: Vec<&BuildDiagnostic> = match baseline {
            Some(b) => self.new_errors(b),
            None => self.errors.iter().collect(),
        };
        match errors.first() {
            Some(first) => format!("{} new build error(s), first: {first}", errors.len()),
            None => {
                let tail: Vec<&str> = self.raw_output.lines().rev().take(5).collect();
                let tail: Vec<&str> = tail.into_iter().rev().collect();
                format!(
                    "build check exited with {:?}: {}",
                    self.exit_code,
                    tail.join(" / ")
                )
            }
        }
    }
}

/// Split checker output into errors and warnings.
pub fn parse_diagnostics(output: &str) -> (Vec<BuildDiagnostic>, Vec<BuildWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    for raw_line in output.lines() {
        let line = ANSI_RE.replace_all(raw_line, "");
        let line = line.trim();
        let Some(caps) = TSC_RE.captures(line).or_else(|| COLON_RE.captures(line)) else {
            continue;
        };
        let file = caps["file"].trim().replace('\\', "/");
        let message = caps["msg"].trim().to_string();
        if &caps["sev"] == "warning" {
            warnings.push(BuildWarning { file, message });
            continue;
        }
        errors.push(BuildDiagnostic {
            file,
            line: caps["line"].parse().unwrap_or(0),
            column: caps["col"].parse().unwrap_or(0),
            message,
            code: caps.name("code").map(|m| m.as_str().to_string()),
        });
    }
    (errors, warnings)
}

/// External correctness check. Implementations must not touch project files.
pub trait BuildVerifier {
    fn verify(&self) -> GraftResult<BuildResult>;
}

impl<V: BuildVerifier + ?Sized> BuildVerifier for Box<V> {
    fn verify(&self) -> GraftResult<BuildResult> {
        (**self).verify()
    }
}

/// Runs a command in the project root and waits for it, up to a timeout.
#[derive(Clone, Debug)]
pub struct CommandVerifier {
    command: Vec<String>,
    working_dir: PathBuf,
    timeout: Duration,
}

impl CommandVerifier {
    pub fn new(command: Vec<String>, working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command,
            working_dir: working_dir.into(),
            timeout,
        }
    }

    pub fn from_config(config: &VerifyConfig, working_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            config.command.clone(),
            working_dir,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn spawn(&self) -> GraftResult<Child> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| GraftError::Build("no verify command configured".to_string()))?;
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a timeout takes down `npx` and the node it starts.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command
            .spawn()
            .map_err(|e| GraftError::Build(format!("could not start `{program}`: {e}")))
    }
}

/// How long captured output may lag behind the process exiting.
const OUTPUT_GRACE: Duration = Duration::from_secs(2);

/// Kill the check and every process it started.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let group = Pid::from_raw(child.id() as i32);
        if let Err(e) = killpg(group, Signal::SIGKILL) {
            if e != nix::errno::Errno::ESRCH {
                warn!("Could not kill process group {group}: {e}");
            }
        }
    }
    #[cfg(windows)]
    {
        let pid = child.id().to_string();
        match Command::new("taskkill")
            .args(["/PID", pid.as_str(), "/F", "/T"])
            .output()
        {
            Ok(out) if !out.status.success() => {
                warn!("taskkill failed for {pid}: {}", String::from_utf8_lossy(&out.stderr));
            }
            Err(e) => warn!("Could not run taskkill for {pid}: {e}"),
            Ok(_) => {}
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(reader: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            let _ = reader.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

/// Output collected by a drain thread, given up on after `wait`.
fn collect(rx: &Receiver<Vec<u8>>, wait: Duration) -> Vec<u8> {
    rx.recv_timeout(wait).unwrap_or_else(|_| {
        warn!("Build check output still open after {wait:?}; continuing without the rest");
        Vec::new()
    })
}

impl BuildVerifier for CommandVerifier {
    fn verify(&self) -> GraftResult<BuildResult> {
        let start = Instant::now();
        info!(
            "Running build check: {} (in {})",
            self.command.join(" "),
            self.working_dir.display()
        );
        let mut child = self.spawn()?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let mut timed_out = false;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) if start.elapsed() >= self.timeout => {
                    warn!("Build check exceeded {:?}; killing it", self.timeout);
                    kill_tree(&mut child);
                    timed_out = true;
                    break None;
                }
                Ok(None) => thread::sleep(Duration::from_millis(50)),
                Err(e) => return Err(GraftError::Build(format!("waiting for build check: {e}"))),
            }
        };

        let wait = if timed_out {
            OUTPUT_GRACE
        } else {
            self.timeout.saturating_sub(start.elapsed()).max(OUTPUT_GRACE)
        };
        let mut raw = collect(&stdout, wait);
        raw.extend(collect(&stderr, OUTPUT_GRACE));
        let raw_output = String::from_utf8_lossy(&raw).into_owned();

        let mut result = BuildResult::from_output(status.and_then(|s| s.code()), raw_output);
        result.timed_out = timed_out;
        if timed_out {
            result.success = false;
        }
        result.duration_ms = start.elapsed().as_millis() as u64;
        debug!(
            "Build check finished in {}ms: success={}, {} error(s), {} warning(s)",
            result.duration_ms,
            result.success,
            result.errors.len(),
            result.warnings.len()
        );
        Ok(result)
    }
}
