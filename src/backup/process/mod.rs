//! External command invocation.
//!
//! Every tool the backup drivers depend on (virsh, rsync, gzip, gpg) is started
//! through this module so that command lines, exit statuses and durations are
//! logged in one place, and so that drivers can be tested with a fake
//! [`CommandRunner`].

pub mod filter;

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use function_name::named;
use std::ffi::{OsStr, OsString};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// A program and its arguments, kept around so it can be logged and reported.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    program: PathBuf,
    args: Vec<OsString>,
}

impl CommandLine {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Argument at `idx`, lossily converted. Handy for matching in fakes.
    pub fn arg_str(&self, idx: usize) -> Option<String> {
        self.args
            .get(idx)
            .map(|a| a.to_string_lossy().into_owned())
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl Display for CommandLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

pub trait CommandRunner {
    /// Runs the command to completion. A non-zero exit status is an error.
    fn run(&self, command: &CommandLine) -> Result<CommandOutput>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, command: &CommandLine) -> Result<CommandOutput> {
        (**self).run(command)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    #[named]
    fn run(&self, command: &CommandLine) -> Result<CommandOutput> {
        tracing::info!("Running `{}`", command);
        let start = Instant::now();
        let output = command
            .to_command()
            .stdin(Stdio::null())
            .output()
            .map_err(Error::from)
            .add_msg(format!("Failed to start `{}`", command))
            .add_fn_name(function_path!())?;
        let duration = start.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            tracing::error!(
                "`{}` failed after {:.2?} with {:?}",
                command,
                duration,
                output.status.code()
            );
            return Err(Error::CommandFailed {
                command: command.to_string(),
                status: output.status.code(),
                stderr,
            });
        }

        tracing::info!("`{}` finished in {:.2?}", command, duration);
        Ok(CommandOutput {
            stdout,
            stderr,
            duration,
        })
    }
}
