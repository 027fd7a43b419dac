use crate::{EngineError, EngineResult};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// A single external process call: program, arguments and working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            current_dir: None,
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

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Program file name without its directory, for log lines
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program_name())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Executes invocations. Implementations block until the process exits.
pub trait CommandRunner {
    fn run(&self, invocation: &Invocation) -> EngineResult<()>;
}

/// Runs invocations as child processes with inherited stdio so build and
/// compose output streams straight to the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> EngineResult<()> {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        if let Some(dir) = &invocation.current_dir {
            command.current_dir(dir);
        }

        info!(command = %invocation, "Running");
        let status = command.status().map_err(|e| EngineError::SpawnFailed {
            command: invocation.to_string(),
            source: e,
        })?;
        debug!(command = %invocation, %status, "Process exited");

        if !status.success() {
            return Err(EngineError::CommandFailed {
                command: invocation.to_string(),
                status: status.to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_display_uses_file_name() {
        let invocation = Invocation::new("/opt/homebrew/bin/docker")
            .arg("compose")
            .args(["up", "-d"]);
        assert_eq!(invocation.to_string(), "docker compose up -d");
    }

    #[test]
    fn test_invocation_current_dir() {
        let invocation = Invocation::new("podman").current_dir("/tmp/ragflow");
        assert_eq!(invocation.current_dir, Some(PathBuf::from("/tmp/ragflow")));
        assert!(invocation.args.is_empty());
    }

    #[test]
    fn test_system_runner_missing_program() {
        let invocation = Invocation::new("/nonexistent/ragstack-test-binary");
        let result = SystemRunner.run(&invocation);
        assert!(matches!(result, Err(EngineError::SpawnFailed { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_reports_exit_status() {
        assert!(SystemRunner.run(&Invocation::new("true")).is_ok());

        let result = SystemRunner.run(&Invocation::new("false"));
        assert!(matches!(result, Err(EngineError::CommandFailed { .. })));
    }
}
