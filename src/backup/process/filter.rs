use crate::backup::finish::Finish;
use crate::backup::process::CommandLine;
use crate::backup::result_error::error::Error;
use std::io;
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Stdio};
use std::thread::JoinHandle;

/// Streams everything written to it through an external filter program
/// (stdin → stdout) into `inner`.
///
/// The filter's stdout is pumped into `inner` on a helper thread while the
/// caller writes stdin, so neither pipe can fill up and block the other.
/// [`Finish::finish`] closes stdin, waits for the program, checks its exit
/// status and hands `inner` back.
pub struct ProcessFilter<W: Write + Send + 'static> {
    command: CommandLine,
    child: Child,
    stdin: Option<ChildStdin>,
    pump: Option<JoinHandle<io::Result<W>>>,
    stderr: Option<JoinHandle<String>>,
}

impl<W: Write + Send + 'static> ProcessFilter<W> {
    pub fn spawn(command: CommandLine, inner: W) -> io::Result<Self> {
        tracing::debug!("Starting filter `{}`", command);
        let mut child = command
            .to_command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| io::Error::new(e.kind(), format!("cannot start `{command}`: {e}")))?;

        let stdin = child.stdin.take();
        let (mut stdout, mut stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(io::Error::other(format!(
                    "`{command}` started without piped stdout/stderr"
                )));
            }
        };

        let pump = std::thread::spawn(move || -> io::Result<W> {
            let mut inner = inner;
            io::copy(&mut stdout, &mut inner)?;
            inner.flush()?;
            Ok(inner)
        });
        let stderr = std::thread::spawn(move || {
            let mut msg = String::new();
            let _ = stderr.read_to_string(&mut msg);
            msg
        });

        Ok(Self {
            command,
            child,
            stdin,
            pump: Some(pump),
            stderr: Some(stderr),
        })
    }

    fn stdin(&mut self) -> io::Result<&mut ChildStdin> {
        self.stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "filter stdin closed"))
    }
}

impl<W: Write + Send + 'static> Write for ProcessFilter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stdin()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stdin()?.flush()
    }
}

impl<W: Write + Send + 'static> Finish<W> for ProcessFilter<W> {
    fn finish(mut self) -> io::Result<W> {
        drop(self.stdin.take());
        let status = self.child.wait()?;
        let pumped = self
            .pump
            .take()
            .map(|h| h.join())
            .unwrap_or_else(|| Ok(Err(io::Error::other("filter output already taken"))))
            .map_err(|_| io::Error::other(format!("output pump of `{}` panicked", self.command)))?;
        // a failing inner writer kills the filter with EPIPE, so its error comes first
        let inner = pumped.map_err(|e| {
            io::Error::new(e.kind(), format!("writing output of `{}` failed: {e}", self.command))
        })?;
        let stderr = self
            .stderr
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(io::Error::other(
                Error::CommandFailed {
                    command: self.command.to_string(),
                    status: status.code(),
                    stderr,
                }
                .to_string(),
            ));
        }

        if !stderr.trim().is_empty() {
            tracing::debug!("`{}` stderr: {}", self.command, stderr.trim());
        }

        Ok(inner)
    }
}

impl<W: Write + Send + 'static> Drop for ProcessFilter<W> {
    fn drop(&mut self) {
        if self.pump.is_some() {
            // Abandoned before finish, don't leave the filter running.
            drop(self.stdin.take());
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
