use std::{
    io::Write,
    process::{Child, Command, Stdio},
};

use anyhow::{Context, Result, anyhow, bail};

use crate::utils::exec_policy;

#[derive(Clone, Debug)]
pub enum StdioSpec {
    Inherit,
    Pipe,
}

impl StdioSpec {
    #[inline]
    fn to_stdio(&self) -> Stdio {
        match self {
            StdioSpec::Inherit => Stdio::inherit(),
            StdioSpec::Pipe => Stdio::piped(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CmdSpec {
    program: String,
    args: Vec<String>,
    input: Option<Vec<u8>>,
    stdout: StdioSpec,
    stderr: StdioSpec,
}

impl CmdSpec {
    #[must_use]
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            input: None,
            stdout: StdioSpec::Inherit,
            stderr: StdioSpec::Inherit,
        }
    }

    #[must_use]
    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, it: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(it.into_iter().map(Into::into));
        self
    }

    /// Bytes written to the child's stdin, which is closed afterwards.
    #[must_use]
    pub fn input(mut self, data: Vec<u8>) -> Self {
        self.input = Some(data);
        self
    }

    #[must_use]
    pub fn stdout(mut self, s: StdioSpec) -> Self {
        self.stdout = s;
        self
    }

    #[must_use]
    pub fn stderr(mut self, s: StdioSpec) -> Self {
        self.stderr = s;
        self
    }

    pub fn input_bytes(&self) -> Option<&[u8]> {
        self.input.as_deref()
    }

    pub fn render(&self) -> String {
        let mut out = sh_quote(&self.program);
        for a in &self.args {
            out.push(' ');
            out.push_str(&sh_quote(a));
        }
        if let Some(ref data) = self.input {
            out.push_str(&format!(" <stdin:{}b>", data.len()));
        }
        out
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.stdin(if self.input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stderr(self.stderr.to_stdio());
        cmd
    }
}

pub trait Runner: Send + Sync {
    /// Runs a command that changes state; skipped under dry run.
    fn run(&self, cmd: &CmdSpec) -> Result<()>;
    /// Runs a read-only command and returns its stdout.
    fn run_capture(&self, cmd: &CmdSpec) -> Result<String>;
}

#[derive(Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn spawn_and_feed(spec: &CmdSpec, mut cmd: Command) -> Result<Child> {
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn {}", spec.render()))?;
        if let Some(data) = spec.input_bytes() {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin piping not available: {}", spec.render()))?;
            stdin
                .write_all(data)
                .with_context(|| format!("write stdin of {}", spec.render()))?;
        }
        Ok(child)
    }
}

impl Runner for ProcessRunner {
    fn run(&self, spec: &CmdSpec) -> Result<()> {
        if exec_policy::is_dry_run() {
            tracing::info!("[DRY-RUN] {}", spec.render());
            return Ok(());
        }
        tracing::debug!("exec: {}", spec.render());

        let mut cmd = spec.to_command();
        cmd.stdout(spec.stdout.to_stdio());
        let mut child = Self::spawn_and_feed(spec, cmd)?;

        let status = child
            .wait()
            .with_context(|| format!("wait for {}", spec.render()))?;
        if !status.success() {
            bail!("command failed: {} with {status}", spec.render());
        }
        Ok(())
    }

    fn run_capture(&self, spec: &CmdSpec) -> Result<String> {
        tracing::debug!("exec(capture): {}", spec.render());

        let mut cmd = spec.to_command();
        cmd.stdout(Stdio::piped());
        let child = Self::spawn_and_feed(spec, cmd)?;

        let out = child
            .wait_with_output()
            .with_context(|| format!("run {}", spec.render()))?;
        if out.status.success() {
            Ok(String::from_utf8_lossy(&out.stdout).to_string())
        } else {
            bail!("command failed: {} (status {})", spec.render(), out.status);
        }
    }
}

fn sh_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".into();
    }
    if !s
        .bytes()
        .any(|b| matches!(b, b' ' | b'\'' | b'"' | b'\\' | b'{' | b'}'))
    {
        return s.to_string();
    }
    let mut out = String::from("'");
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}
