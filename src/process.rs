use log::{info, trace, warn};
use std::{
    io::{self, BufRead, BufReader, Result, Write},
    path::Path,
    process::{Child, ChildStdin, ChildStdout, Command, Stdio},
    time::{Duration, Instant},
};
use wait_timeout::ChildExt;

#[cfg(unix)]
use std::os::fd::AsRawFd;

const REAP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    Line(String),
    Timeout,
    Disconnected,
}

/// A child program spoken to one line at a time.
pub trait LineProcess {
    fn name(&self) -> &str;

    /// Writes `line` plus a newline and flushes it.
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Reads the next full line. `timeout` of `None` waits for as long as the
    /// child keeps its output open.
    fn read_line(&mut self, timeout: Option<Duration>) -> Result<ReadResult>;

    fn is_alive(&mut self) -> bool;

    /// Kills the child and releases its pipes. Calling it again is a no-op.
    fn terminate(&mut self);
}

#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    stdout: Option<BufReader<ChildStdout>>,
    read_buf: Vec<u8>,
    stdin: Option<ChildStdin>,
    name: String,
    eof: bool,
    terminated: bool,
}

impl ProcessHandle {
    pub fn spawn<P: AsRef<Path>>(path: P) -> Result<ProcessHandle> {
        let path = path.as_ref();

        let mut child = Command::new(path)
            .stdout(Stdio::piped())
            .stdin(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().map(BufReader::new);
        let stdin = child.stdin.take();
        if stdout.is_none() || stdin.is_none() {
            let _ = child.kill();
            return Err(io::Error::other("child pipes were not created"));
        }

        let name = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        info!("Started {} (pid {})", name, child.id());

        Ok(ProcessHandle {
            child,
            stdout,
            read_buf: Vec::new(),
            stdin,
            name,
            eof: false,
            terminated: false,
        })
    }

    /// Renames the handle for logging, e.g. to tag it with its match.
    pub fn named(mut self, name: impl Into<String>) -> ProcessHandle {
        self.name = name.into();
        self
    }

    fn take_buffered_line(&mut self) -> Result<Option<String>> {
        let end = match memchr::memchr(b'\n', &self.read_buf) {
            Some(i) => i + 1,
            None if self.eof && !self.read_buf.is_empty() => self.read_buf.len(),
            None => return Ok(None),
        };

        let raw: Vec<u8> = self.read_buf.drain(0..end).collect();
        let Ok(line) = std::str::from_utf8(&raw) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Received Invalid UTF-8",
            ));
        };
        let line = line.trim_end_matches(['\n', '\r']).to_string();
        trace!("{} > {}", self.name, line);
        Ok(Some(line))
    }

    /// Moves whatever the child has written into `read_buf`. Returns false
    /// once the child's output is closed.
    fn fill(&mut self) -> Result<bool> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(false);
        };
        let chunk = stdout.fill_buf()?;
        let chunk_len = chunk.len();
        if chunk_len == 0 {
            return Ok(false);
        }
        self.read_buf.extend_from_slice(chunk);
        stdout.consume(chunk_len);
        Ok(true)
    }

    #[cfg(unix)]
    fn wait_readable(&mut self, deadline: Option<Instant>) -> Result<bool> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(true);
        };

        loop {
            let timeout_ms = match deadline {
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .as_millis()
                    .clamp(0, i32::MAX as u128) as i32,
                None => -1,
            };

            let mut fds: [libc::pollfd; 1] = unsafe { std::mem::zeroed() };
            fds[0].fd = stdout.get_mut().as_raw_fd();
            fds[0].events = libc::POLLIN;

            let ready_count =
                unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
            if ready_count < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EINTR) | Some(libc::EAGAIN) => continue,
                    _ => return Err(err),
                }
            }

            // POLLHUP and POLLERR count as ready; the following read sees EOF.
            return Ok(ready_count > 0);
        }
    }

    #[cfg(not(unix))]
    fn wait_readable(&mut self, _deadline: Option<Instant>) -> Result<bool> {
        Ok(true)
    }
}

impl LineProcess for ProcessHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        trace!("{} < {line}", self.name);
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        };
        writeln!(stdin, "{line}")?;
        stdin.flush()
    }

    fn read_line(&mut self, timeout: Option<Duration>) -> Result<ReadResult> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if let Some(line) = self.take_buffered_line()? {
                return Ok(ReadResult::Line(line));
            }
            if self.eof {
                return Ok(ReadResult::Disconnected);
            }
            if !self.wait_readable(deadline)? {
                trace!("{} timed out", self.name);
                return Ok(ReadResult::Timeout);
            }
            if !self.fill()? {
                trace!("{} closed its output", self.name);
                self.eof = true;
            }
        }
    }

    fn is_alive(&mut self) -> bool {
        !self.terminated && matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.stdin = None;
        self.stdout = None;

        if let Ok(Some(status)) = self.child.try_wait() {
            trace!("{} already exited with {status}", self.name);
            return;
        }

        if let Err(err) = self.child.kill() {
            warn!("Failed to kill {}: {err}", self.name);
        }
        match self.child.wait_timeout(REAP_TIMEOUT) {
            Ok(Some(_)) => trace!("{} killed", self.name),
            Ok(None) | Err(_) => warn!("Timed out reaping {}, giving up", self.name),
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// The arbiter and both competitors of one match. Dropping it terminates
/// all three, whichever way the match ended.
pub struct MatchProcesses<P: LineProcess> {
    pub arbiter: P,
    pub a: P,
    pub b: P,
}

impl<P: LineProcess> MatchProcesses<P> {
    pub fn new(arbiter: P, a: P, b: P) -> MatchProcesses<P> {
        MatchProcesses { arbiter, a, b }
    }
}

impl<P: LineProcess> Drop for MatchProcesses<P> {
    fn drop(&mut self) {
        self.arbiter.terminate();
        self.a.terminate();
        self.b.terminate();
    }
}
