//! Subprocess tool transport for the configuration store.
//!
//! Wraps the external `bulkloader` / `bulkdownloader` / `bulkquery` tools.
//! When a remote host is configured, payload directories are streamed as a
//! gzipped tar over ssh into a transient directory on the far side and the
//! tool runs there. Every invocation is capped at 300 seconds.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

use super::{log_duration, ConfigStore};
use crate::error::{ArchiverError, Result};

const TOOL_TIMEOUT: Duration = Duration::from_secs(300);
const SSH_OPTS: &str = "-o \"StrictHostKeyChecking=no\" -o \"UserKnownHostsFile=/dev/null\" -o \"BatchMode=yes\"";

/// Environment variables forwarded into every tool invocation.
const FORWARDED_ENV: &[&str] = &["PATH", "LD_LIBRARY_PATH"];

pub struct ToolStore {
    uri: String,
    remote_host: Option<String>,
}

impl ToolStore {
    pub fn new(uri: &str, remote_host: Option<&str>) -> Result<ToolStore> {
        if uri.trim().is_empty() {
            return Err(ArchiverError::Config(
                "configuration store URI must not be empty".into(),
            ));
        }
        Ok(ToolStore {
            uri: uri.to_string(),
            remote_host: remote_host.map(str::to_string),
        })
    }

    fn env_prelude(&self) -> String {
        let mut parts: Vec<String> = FORWARDED_ENV
            .iter()
            .filter_map(|key| {
                std::env::var(key)
                    .ok()
                    .map(|value| format!("export {key}={}", shell_quote(&value)))
            })
            .collect();
        parts.push(format!(
            "export ARTDAQ_DATABASE_URI={}",
            shell_quote(&self.uri)
        ));
        parts.join("; ")
    }

    fn run_tool(&self, op: &str, command: &str) -> Result<String> {
        debug!("Executing {op} command: {command}");
        let output = run_shell(command, TOOL_TIMEOUT).map_err(|e| {
            ArchiverError::ConfigStore(format!("{op} failed to start: {e}"))
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            warn!("{op} stderr:\n{stderr}");
        }
        if !output.status.success() {
            return Err(ArchiverError::ConfigStore(format!(
                "{op} failed with {}.\nStdout: {stdout}\nStderr: {stderr}",
                output
                    .status
                    .code()
                    .map(|c| format!("code {c}"))
                    .unwrap_or_else(|| "signal".to_string())
            )));
        }
        Ok(stdout)
    }
}

impl ConfigStore for ToolStore {
    fn list_runs(&self) -> Result<BTreeSet<u32>> {
        static RUN_RE: OnceLock<Regex> = OnceLock::new();
        let run_re = RUN_RE.get_or_init(|| Regex::new(r"^\s*(\d+)/").unwrap());

        let start = Instant::now();
        let stdout = self.run_tool("bulkquery", &self.build_query_command(QueryMode::Runs))?;
        let runs = stdout
            .lines()
            .filter_map(|line| run_re.captures(line))
            .filter_map(|caps| caps[1].parse::<u32>().ok())
            .collect();
        log_duration("ToolStore", "list_runs", start);
        Ok(runs)
    }

    fn resolve_config_name(&self, run_number: u32) -> Result<String> {
        let stdout = self.run_tool(
            "bulkquery",
            &self.build_query_command(QueryMode::ConfigName(run_number)),
        )?;
        let name = stdout.trim();
        if name.is_empty() {
            return Err(ArchiverError::ConfigStore(format!(
                "no configuration found for run {run_number}"
            )));
        }
        Ok(name.to_string())
    }

    fn insert(&self, run_number: u32, config_name: &str, source_dir: &Path) -> Result<()> {
        let start = Instant::now();
        let command = self.build_load_command(run_number, config_name, source_dir, false);
        self.run_tool("bulkloader", &command)?;
        log_duration("ToolStore", "insert", start);
        Ok(())
    }

    fn update(&self, run_number: u32, config_name: &str, source_dir: &Path) -> Result<()> {
        let start = Instant::now();
        let command = self.build_load_command(run_number, config_name, source_dir, true);
        self.run_tool("bulkloader", &command)?;
        log_duration("ToolStore", "update", start);
        Ok(())
    }

    fn export(&self, run_number: u32, destination_dir: &Path) -> Result<()> {
        let start = Instant::now();
        let full_name = self.resolve_config_name(run_number)?;
        let config_name = full_name
            .split_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&full_name);
        let command = self.build_export_command(run_number, config_name, destination_dir);
        self.run_tool("bulkdownloader", &command)?;
        log_duration("ToolStore", "export", start);
        Ok(())
    }

    fn max_concurrency(&self) -> usize {
        usize::MAX
    }
}

enum QueryMode {
    Runs,
    ConfigName(u32),
}

impl ToolStore {
    fn build_query_command(&self, mode: QueryMode) -> String {
        let query = match mode {
            QueryMode::Runs => "bulkquery --runs".to_string(),
            QueryMode::ConfigName(run) => format!("bulkquery --config-name {run}"),
        };
        let with_env = format!("{}; {query}", self.env_prelude());
        match &self.remote_host {
            Some(host) => format!("ssh {SSH_OPTS} {} {}", shell_quote(host), shell_quote(&with_env)),
            None => with_env,
        }
    }

    fn build_load_command(
        &self,
        run_number: u32,
        config_name: &str,
        data_dir: &Path,
        update: bool,
    ) -> String {
        let update_flag = if update { " -u" } else { "" };
        let threads = "$(( $(nproc)/2 ))";
        match &self.remote_host {
            Some(host) => {
                let remote_tmpdir = format!("/tmp/bulkloader_{run_number}_{}", std::process::id());
                let tool = format!(
                    "bulkloader -r {run_number} -c {} -p {} -t {threads}{update_flag}",
                    shell_quote(config_name),
                    shell_quote(&remote_tmpdir)
                );
                let remote_script = format!(
                    "mkdir -p {tmp}; cd {tmp}; tar xzf -; {env}; {tool}; status=$?; cd /; rm -rf {tmp}; exit $status",
                    tmp = shell_quote(&remote_tmpdir),
                    env = self.env_prelude()
                );
                format!(
                    "tar czf - -C {} . | ssh {SSH_OPTS} {} {}",
                    shell_quote(&data_dir.display().to_string()),
                    shell_quote(host),
                    shell_quote(&remote_script)
                )
            }
            None => format!(
                "{}; cd {dir}; bulkloader -r {run_number} -c {} -p {dir} -t {threads}{update_flag}",
                self.env_prelude(),
                shell_quote(config_name),
                dir = shell_quote(&data_dir.display().to_string())
            ),
        }
    }

    fn build_export_command(
        &self,
        run_number: u32,
        config_name: &str,
        destination_dir: &Path,
    ) -> String {
        match &self.remote_host {
            Some(host) => {
                let remote_tmpdir =
                    format!("/tmp/bulkdownloader_{run_number}_{}", std::process::id());
                let remote_script = format!(
                    "mkdir -p {tmp}; {env}; bulkdownloader -r {run_number} -c {conf} -p {tmp}; status=$?; tar czf - -C {tmp} .; rm -rf {tmp}; exit $status",
                    tmp = shell_quote(&remote_tmpdir),
                    env = self.env_prelude(),
                    conf = shell_quote(config_name)
                );
                format!(
                    "ssh {SSH_OPTS} {} {} | tar xzf - -C {}",
                    shell_quote(host),
                    shell_quote(&remote_script),
                    shell_quote(&destination_dir.display().to_string())
                )
            }
            None => format!(
                "{}; bulkdownloader -r {run_number} -c {} -p {}",
                self.env_prelude(),
                shell_quote(config_name),
                shell_quote(&destination_dir.display().to_string())
            ),
        }
    }
}

/// Quote a string for POSIX sh: wrap in single quotes, escaping embedded
/// single quotes.
fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '@'))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Run a shell command with piped output and a hard wall-clock cap. The
/// child is killed on timeout.
fn run_shell(command: &str, timeout: Duration) -> std::io::Result<std::process::Output> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");
    let stdout_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf);
        buf
    });
    let stderr_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf);
        buf
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            warn!("Tool invocation exceeded {timeout:?}; killing");
            let _ = child.kill();
            let status = child.wait()?;
            break status;
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    Ok(std::process::Output {
        status,
        stdout: stdout_reader.join().unwrap_or_default(),
        stderr: stderr_reader.join().unwrap_or_default(),
    })
}
