// Process spawning with merged output
//
// On Unix the child gets a single pipe as both stdout and stderr, so lines
// arrive in the order the tool wrote them. Elsewhere the two pipes are read
// concurrently into the same channel.
//
// Each tool leads its own process group, so signals reach every process it
// forked and not only the direct child.

use std::io;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::debug;

use super::command::CommandSpec;
use crate::storage::SENTINEL_EXIT_CODE;

/// A running tool and the receiving end of its output lines
#[derive(Debug)]
pub struct SpawnedProcess {
    pub child: Child,
    /// Process group led by the child; kept after the child is reaped
    pub group: Option<u32>,
    /// Closed once every writer of the output pipe has gone away
    pub lines: mpsc::Receiver<String>,
}

/// Launch `spec` with stdin closed and output captured line by line
///
/// # Arguments
///
/// * `spec` - Program and argv, passed directly without a shell
/// * `capacity` - Lines buffered between the pipe reader and the consumer
pub fn spawn(spec: &CommandSpec, capacity: usize) -> io::Result<SpawnedProcess> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let mut command = Command::new(&spec.program);
    command.args(&spec.args).stdin(Stdio::null()).kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let child = spawn_merged(command, tx)?;
    let group = child.id();
    debug!(pid = ?group, program = %spec.program, "Spawned tool process");
    Ok(SpawnedProcess {
        child,
        group,
        lines: rx,
    })
}

#[cfg(unix)]
fn spawn_merged(mut command: Command, tx: mpsc::Sender<String>) -> io::Result<Child> {
    let (read_end, write_end) = cloexec_pipe()?;
    let write_err = write_end.try_clone()?;
    command
        .stdout(Stdio::from(write_end))
        .stderr(Stdio::from(write_err));

    let child = command.spawn()?;
    // The Command still owns our copies of the write end; EOF needs them closed
    drop(command);

    let reader = tokio::net::unix::pipe::Receiver::from_owned_fd(read_end)?;
    tokio::spawn(pump_lines(reader, tx));
    Ok(child)
}

#[cfg(not(unix))]
fn spawn_merged(mut command: Command, tx: mpsc::Sender<String>) -> io::Result<Child> {
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = command.spawn()?;
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump_lines(stderr, tx));
    }
    Ok(child)
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
    target_os = "illumos"
))]
fn cloexec_pipe() -> io::Result<(std::os::fd::OwnedFd, std::os::fd::OwnedFd)> {
    Ok(nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)?)
}

// No pipe2 here; set the flag right after creation
#[cfg(all(
    unix,
    not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly",
        target_os = "illumos"
    ))
))]
fn cloexec_pipe() -> io::Result<(std::os::fd::OwnedFd, std::os::fd::OwnedFd)> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use std::os::fd::AsRawFd;

    let (read_end, write_end) = nix::unistd::pipe()?;
    for fd in [&read_end, &write_end] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((read_end, write_end))
}

/// Forward newline-delimited output as lossily decoded lines
async fn pump_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(decode_line(&buf)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Output pipe read failed: {}", e);
                break;
            }
        }
    }
}

/// Strip the line terminator (`\n` or `\r\n`) and decode lossily
pub(crate) fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Exit code of a finished process; `128 + signal` when killed by a signal
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    SENTINEL_EXIT_CODE
}

/// Ask the tool and everything it forked to stop: SIGTERM to the group
#[cfg(unix)]
pub fn terminate(_child: &mut Child, group: Option<u32>) -> io::Result<()> {
    signal_group(group, nix::sys::signal::Signal::SIGTERM)
}

/// SIGKILL the whole group
#[cfg(unix)]
pub fn kill(child: &mut Child, group: Option<u32>) -> io::Result<()> {
    match group {
        Some(_) => signal_group(group, nix::sys::signal::Signal::SIGKILL),
        None => child.start_kill(),
    }
}

/// SIGKILL whatever is left of a group whose leader has exited
#[cfg(unix)]
pub fn kill_leftovers(group: Option<u32>) -> io::Result<()> {
    signal_group(group, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(unix)]
fn signal_group(group: Option<u32>, signal: nix::sys::signal::Signal) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Some(pgid) = group else {
        return Ok(());
    };
    let pgid = i32::try_from(pgid).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    match killpg(Pid::from_raw(pgid), signal) {
        // Nobody left in the group
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Ask the process to stop; without signals this is an immediate kill
#[cfg(not(unix))]
pub fn terminate(child: &mut Child, _group: Option<u32>) -> io::Result<()> {
    child.start_kill()
}

#[cfg(not(unix))]
pub fn kill(child: &mut Child, _group: Option<u32>) -> io::Result<()> {
    child.start_kill()
}

#[cfg(not(unix))]
pub fn kill_leftovers(_group: Option<u32>) -> io::Result<()> {
    Ok(())
}
