//! Helper process launching
//!
//! A [`HelperLauncher`] produces a [`LaunchedHelper`]: a controllable process
//! and a single byte stream carrying its stdout with stderr merged in. The
//! merge happens at the OS level (both descriptors point at one pipe), so
//! one reader sees every line in the order the helper wrote it.
//!
//! [`CommandLauncher`] resolves the command from [`HelperConfig`] on every
//! launch: a pre-built local helper wins when the file exists, otherwise the
//! fallback build-and-run command is used.

use crate::config::HelperConfig;
use crate::error::{HrmError, Result};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

/// Control over a running helper
pub trait HelperProcess: Send {
    /// OS process id, if there is a real process
    fn id(&self) -> Option<u32>;

    /// Whether the helper has not exited yet
    fn is_alive(&mut self) -> io::Result<bool>;

    /// Ask the helper to exit (forcefully for OS processes)
    fn terminate(&mut self) -> io::Result<()>;

    /// Wait for the helper to exit, returning its exit code if it has one
    fn wait(&mut self) -> io::Result<Option<i32>>;
}

impl HelperProcess for Child {
    fn id(&self) -> Option<u32> {
        Some(Child::id(self))
    }

    fn is_alive(&mut self) -> io::Result<bool> {
        Ok(self.try_wait()?.is_none())
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.kill()
    }

    fn wait(&mut self) -> io::Result<Option<i32>> {
        Ok(Child::wait(self)?.code())
    }
}

/// A launched helper: process handle plus merged output stream
pub struct LaunchedHelper {
    /// Process control
    pub process: Box<dyn HelperProcess>,
    /// Merged stdout/stderr
    pub output: Box<dyn Read + Send>,
    /// Human-readable command line, for logs
    pub description: String,
}

impl std::fmt::Debug for LaunchedHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedHelper")
            .field("pid", &self.process.id())
            .field("description", &self.description)
            .finish()
    }
}

/// Produces helper processes for the ingestor
#[cfg_attr(test, mockall::automock)]
pub trait HelperLauncher: Send + Sync {
    /// Spawn the helper
    fn launch(&self) -> Result<LaunchedHelper>;

    /// Command line that `launch` would run
    fn describe(&self) -> String;
}

/// A fixed program + arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl HelperCommand {
    /// Command for a program with arguments
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
        }
    }

    /// Set the working directory
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Pick the local helper if it exists, otherwise the fallback command
    pub fn resolve(config: &HelperConfig) -> Self {
        let local = config.local_executable_path();
        let command = if local.is_file() {
            tracing::debug!("Using local helper {:?}", local);
            Self::new(spawnable_path(&local, config), Vec::<String>::new())
        } else {
            tracing::debug!(
                "No local helper at {:?}, falling back to {}",
                local,
                config.fallback_program
            );
            Self::new(&config.fallback_program, config.fallback_args.iter().cloned())
        };

        match &config.working_dir {
            Some(dir) => command.in_dir(dir),
            None => command,
        }
    }

    /// Program and arguments joined with spaces
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Spawn with stdout and stderr sharing one pipe
    pub fn spawn(&self) -> Result<LaunchedHelper> {
        let description = self.command_line();
        let (reader, writer) =
            io::pipe().map_err(|e| HrmError::launch(description.clone(), e))?;
        let stderr_writer = writer
            .try_clone()
            .map_err(|e| HrmError::launch(description.clone(), e))?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr_writer);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let child = command
            .spawn()
            .map_err(|e| HrmError::launch(description.clone(), e))?;
        // Our copies of the write end must close, or the reader never sees EOF
        drop(command);

        Ok(LaunchedHelper {
            process: Box::new(child),
            output: Box::new(reader),
            description,
        })
    }
}

impl HelperLauncher for HelperCommand {
    fn launch(&self) -> Result<LaunchedHelper> {
        self.spawn()
    }

    fn describe(&self) -> String {
        self.command_line()
    }
}

impl std::fmt::Display for HelperCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command_line())
    }
}

/// Launcher for the real BLE helper, resolved from config on every launch
#[derive(Debug, Clone, Default)]
pub struct CommandLauncher {
    config: HelperConfig,
}

impl CommandLauncher {
    pub fn new(config: HelperConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HelperConfig {
        &self.config
    }
}

impl HelperLauncher for CommandLauncher {
    fn launch(&self) -> Result<LaunchedHelper> {
        HelperCommand::resolve(&self.config).spawn()
    }

    fn describe(&self) -> String {
        HelperCommand::resolve(&self.config).command_line()
    }
}

/// Path to spawn the local helper with.
///
/// The child resolves a relative program path against its own working
/// directory, so when one is set the path must not be relative to ours.
fn spawnable_path(local: &Path, config: &HelperConfig) -> PathBuf {
    if config.working_dir.is_none() || local.is_absolute() {
        return explicit_path(local);
    }
    std::fs::canonicalize(local)
        .or_else(|_| std::path::absolute(local))
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to make {:?} absolute: {}", local, e);
            explicit_path(local)
        })
}

/// A bare relative file name would be looked up on PATH; anchor it to `.`
fn explicit_path(path: &Path) -> PathBuf {
    if path.is_relative() && path.parent().is_none_or(|p| p.as_os_str().is_empty()) {
        Path::new(".").join(path)
    } else {
        path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use tempfile::tempdir;

    #[test]
    fn test_resolve_falls_back_without_local_helper() {
        let dir = tempdir().unwrap();
        let config = HelperConfig {
            working_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let command = HelperCommand::resolve(&config);
        assert_eq!(command.program, PathBuf::from("dotnet"));
        assert_eq!(command.args, vec!["run", "--project", "tools/ble-windows"]);
        assert_eq!(command.working_dir.as_deref(), Some(dir.path()));
        assert_eq!(command.command_line(), "dotnet run --project tools/ble-windows");
    }

    #[test]
    fn test_resolve_prefers_local_helper() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("ble-helper.exe");
        std::fs::write(&local, b"").unwrap();

        let config = HelperConfig {
            local_executable: local.clone(),
            ..Default::default()
        };

        let command = HelperCommand::resolve(&config);
        assert_eq!(command.program, local);
        assert!(command.args.is_empty());
    }

    #[test]
    fn test_resolve_relative_working_dir_gives_absolute_program() {
        let dir = tempfile::Builder::new()
            .prefix("helper-dir")
            .tempdir_in(".")
            .unwrap();
        let relative_dir = PathBuf::from(dir.path().file_name().unwrap());
        std::fs::write(dir.path().join("ble-helper"), b"").unwrap();

        let config = HelperConfig {
            local_executable: PathBuf::from("ble-helper"),
            working_dir: Some(relative_dir.clone()),
            ..Default::default()
        };

        let command = HelperCommand::resolve(&config);
        assert!(command.program.is_absolute());
        assert!(command.program.ends_with(relative_dir.join("ble-helper")));
        assert_eq!(command.working_dir, Some(relative_dir));
    }

    #[test]
    fn test_explicit_path() {
        assert_eq!(explicit_path(Path::new("ble-helper")), Path::new("./ble-helper"));
        assert_eq!(explicit_path(Path::new("bin/ble-helper")), Path::new("bin/ble-helper"));
        assert_eq!(explicit_path(Path::new("/opt/ble-helper")), Path::new("/opt/ble-helper"));
    }

    #[test]
    fn test_spawn_missing_program_is_launch_error() {
        let command = HelperCommand::new("definitely-not-a-real-helper-binary", ["--flag"]);
        let err = command.spawn().unwrap_err();
        assert!(err.is_launch());
        assert!(err.to_string().contains("definitely-not-a-real-helper-binary --flag"));
    }

    #[cfg(unix)]
    #[test]
    fn test_spawn_merges_stderr_into_output() {
        let command = HelperCommand::new(
            "sh",
            ["-c", "echo '{\"bpm\": 70}'; echo 'adapter warning' >&2; echo '{\"bpm\": 71}'"],
        );
        let mut launched = command.spawn().unwrap();

        let lines: Vec<String> = BufReader::new(launched.output)
            .lines()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines, vec!["{\"bpm\": 70}", "adapter warning", "{\"bpm\": 71}"]);

        assert_eq!(launched.process.wait().unwrap(), Some(0));
        assert!(!launched.process.is_alive().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_closes_output() {
        let mut launched = HelperCommand::new("sh", ["-c", "exec sleep 30"]).spawn().unwrap();
        assert!(launched.process.is_alive().unwrap());

        launched.process.terminate().unwrap();
        launched.process.wait().unwrap();

        let mut rest = String::new();
        launched.output.read_to_string(&mut rest).unwrap();
        assert!(rest.is_empty());
    }
}
