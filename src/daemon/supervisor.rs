use super::command::CaptureCommand;
use super::error::DaemonError;
use super::time::epoch_now;
use log::{debug, info, warn};
use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::libc;
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{
    close, execvp, fork, getpid, mkfifo, pipe, read, write, ForkResult, Pid,
};
use parking_lot::Mutex;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How long the parent waits for the child to write its PID into a named
/// FIFO before declaring the handoff failed.
const FIFO_HANDOFF_TIMEOUT: Duration = Duration::from_secs(10);
const FIFO_POLL_SLICE: Duration = Duration::from_millis(50);

/// Handle to the capture child process.
///
/// The PID is unknown until the handoff read completes; it is stored once
/// by the supervisor and from then on only copied out. The trigger thread
/// and the signal dispatch thread never hold a mutable reference to it.
pub struct CaptureProcessHandle {
    pid: AtomicI32,
    spawned_at: u64,
    reaped: AtomicBool,
}

impl CaptureProcessHandle {
    pub(crate) fn new() -> CaptureProcessHandle {
        CaptureProcessHandle {
            pid: AtomicI32::new(0),
            spawned_at: epoch_now(),
            reaped: AtomicBool::new(false),
        }
    }

    /// Returns the child's PID, or `None` if the handoff has not completed.
    pub fn pid(&self) -> Option<Pid> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            raw => Some(Pid::from_raw(raw)),
        }
    }

    pub(crate) fn store_pid(&self, pid: Pid) {
        self.pid.store(pid.as_raw(), Ordering::SeqCst);
    }

    pub fn spawned_at(&self) -> u64 {
        self.spawned_at
    }

    pub fn is_reaped(&self) -> bool {
        self.reaped.load(Ordering::SeqCst)
    }

    /// Marks the child as reaped. Returns false if it already was.
    pub fn mark_reaped(&self) -> bool {
        !self.reaped.swap(true, Ordering::SeqCst)
    }
}

/// One-shot channel carrying the capture child's PID back to the parent.
///
/// Created before the fork, written exactly once by the child, read exactly
/// once by the parent, then torn down. Per-capture signalling happens via
/// OS signals, never through this channel.
pub enum HandoffChannel {
    Pipe {
        read_fd: Option<RawFd>,
        write_fd: Option<RawFd>,
    },
    Fifo {
        path: PathBuf,
    },
}

impl HandoffChannel {
    /// Creates the channel: a named FIFO when a path is configured, an
    /// anonymous pipe otherwise.
    pub fn create(fifo_path: Option<&Path>) -> Result<HandoffChannel, DaemonError> {
        match fifo_path {
            Some(path) => {
                match mkfifo(path, Mode::S_IRUSR | Mode::S_IWUSR) {
                    Ok(()) => {}
                    Err(e) if e.as_errno() == Some(Errno::EEXIST) => {}
                    Err(e) => return Err(DaemonError::HandoffSetup(e)),
                }
                Ok(HandoffChannel::Fifo {
                    path: path.to_owned(),
                })
            }
            None => {
                let (read_fd, write_fd) =
                    pipe().map_err(DaemonError::HandoffSetup)?;
                Ok(HandoffChannel::Pipe {
                    read_fd: Some(read_fd),
                    write_fd: Some(write_fd),
                })
            }
        }
    }

    /// Child side: writes the child's own PID and closes the channel.
    fn send_pid(&mut self, pid: Pid) -> nix::Result<()> {
        let bytes = pid.as_raw().to_ne_bytes();
        match self {
            HandoffChannel::Pipe { read_fd, write_fd } => {
                if let Some(fd) = read_fd.take() {
                    close(fd).ok();
                }
                let fd = match write_fd.take() {
                    Some(fd) => fd,
                    None => return Err(nix::Error::from(Errno::EBADF)),
                };
                let n = write(fd, &bytes)?;
                close(fd).ok();
                if n != bytes.len() {
                    return Err(nix::Error::from(Errno::EIO));
                }
                Ok(())
            }
            HandoffChannel::Fifo { path } => {
                let fd = open(path.as_path(), OFlag::O_WRONLY, Mode::empty())?;
                let n = write(fd, &bytes)?;
                close(fd).ok();
                if n != bytes.len() {
                    return Err(nix::Error::from(Errno::EIO));
                }
                Ok(())
            }
        }
    }

    /// Parent side: blocking read of exactly one PID, then closes its end.
    ///
    /// A short read means the child died before completing the handoff and
    /// is reported as a startup failure.
    fn recv_pid(&mut self) -> Result<Pid, DaemonError> {
        match self {
            HandoffChannel::Pipe { read_fd, write_fd } => {
                if let Some(fd) = write_fd.take() {
                    close(fd).ok();
                }
                let fd = read_fd.take().ok_or_else(|| {
                    DaemonError::Handoff("channel already consumed".to_string())
                })?;
                let result = read_pid(fd);
                close(fd).ok();
                result
            }
            HandoffChannel::Fifo { path } => {
                // Opened non-blocking: a blocking open would wait forever
                // for a child that died before opening its write end.
                let fd = open(
                    path.as_path(),
                    OFlag::O_RDONLY | OFlag::O_NONBLOCK,
                    Mode::empty(),
                )
                .map_err(|e| {
                    DaemonError::Handoff(format!(
                        "failed to open {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let result = read_pid_deadline(fd, FIFO_HANDOFF_TIMEOUT);
                close(fd).ok();
                result
            }
        }
    }

    /// Releases whatever the channel still holds. Failure to unlink a FIFO
    /// is logged and otherwise ignored.
    pub fn release(&mut self) {
        match self {
            HandoffChannel::Pipe { read_fd, write_fd } => {
                if let Some(fd) = read_fd.take() {
                    close(fd).ok();
                }
                if let Some(fd) = write_fd.take() {
                    close(fd).ok();
                }
            }
            HandoffChannel::Fifo { path } => {
                if let Err(e) = std::fs::remove_file(&path) {
                    info!(
                        "Could not remove handoff FIFO {}: {}",
                        path.display(),
                        e
                    );
                }
            }
        }
    }
}

fn read_pid(fd: RawFd) -> Result<Pid, DaemonError> {
    let mut buf = [0u8; std::mem::size_of::<libc::pid_t>()];
    let mut off = 0;
    while off < buf.len() {
        match read(fd, &mut buf[off..]) {
            Ok(0) => {
                return Err(DaemonError::Handoff(format!(
                    "channel closed after {} of {} bytes",
                    off,
                    buf.len()
                )))
            }
            Ok(n) => off += n,
            Err(e) if e.as_errno() == Some(Errno::EINTR) => continue,
            Err(e) => {
                return Err(DaemonError::Handoff(format!("read failed: {}", e)))
            }
        }
    }
    Ok(Pid::from_raw(libc::pid_t::from_ne_bytes(buf)))
}

/// Reads one PID from a non-blocking FIFO read end, giving up at the
/// deadline. A FIFO with no writer reads as immediate EOF, so "no writer
/// yet" and "writer died before writing" can only be told apart by time;
/// the child opens the write end right after the fork, so a bounded wait
/// covers it without blocking startup forever.
fn read_pid_deadline(
    fd: RawFd,
    timeout: Duration,
) -> Result<Pid, DaemonError> {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; std::mem::size_of::<libc::pid_t>()];
    let mut off = 0;
    while off < buf.len() {
        match read(fd, &mut buf[off..]) {
            Ok(0) if off > 0 => {
                return Err(DaemonError::Handoff(format!(
                    "channel closed after {} of {} bytes",
                    off,
                    buf.len()
                )))
            }
            Ok(0) => {} // no writer yet
            Ok(n) => {
                off += n;
                continue;
            }
            Err(e) if e.as_errno() == Some(Errno::EAGAIN) => {}
            Err(e) if e.as_errno() == Some(Errno::EINTR) => continue,
            Err(e) => {
                return Err(DaemonError::Handoff(format!("read failed: {}", e)))
            }
        }
        if Instant::now() >= deadline {
            return Err(DaemonError::Handoff(format!(
                "no PID written within {}s",
                timeout.as_secs()
            )));
        }
        thread::sleep(FIFO_POLL_SLICE);
    }
    Ok(Pid::from_raw(libc::pid_t::from_ne_bytes(buf)))
}

/// Owns the capture child's lifecycle: spawn with PID handoff, exposure of
/// the PID to the trigger thread, and reaping on child exit.
pub struct Supervisor {
    handle: Mutex<Option<Arc<CaptureProcessHandle>>>,
    channel: Mutex<Option<HandoffChannel>>,
}

impl Supervisor {
    pub fn new() -> Supervisor {
        Supervisor {
            handle: Mutex::new(None),
            channel: Mutex::new(None),
        }
    }

    /// Forks and execs the capture program, returning a handle holding the
    /// child's PID once the handoff read completes.
    ///
    /// The child writes its PID to the handoff channel and then replaces
    /// its image with the capture program; if the exec fails it exits
    /// immediately with a non-zero status and never reaches parent logic.
    /// All failures here are fatal to the daemon's startup.
    pub fn spawn(
        &self,
        cmd: &CaptureCommand,
        fifo_path: Option<&Path>,
    ) -> Result<Arc<CaptureProcessHandle>, DaemonError> {
        let mut slot = self.handle.lock();
        if slot.is_some() {
            return Err(DaemonError::AlreadySpawned);
        }

        // Built ahead of the fork; the child branch must not allocate.
        let argv = cmd.to_cstrings()?;
        let mut channel = HandoffChannel::create(fifo_path)?;

        info!("Starting capture process: {}", cmd);

        match unsafe { fork() } {
            Err(e) => {
                channel.release();
                Err(DaemonError::Fork(e))
            }
            Ok(ForkResult::Child) => {
                let pid = getpid();
                if channel.send_pid(pid).is_err() {
                    let _ = write(
                        libc::STDERR_FILENO,
                        b"shutterd: capture pid handoff failed\n",
                    );
                    unsafe { libc::_exit(1) };
                }
                let _ = execvp(&argv[0], &argv);
                let _ = write(
                    libc::STDERR_FILENO,
                    b"shutterd: failed to exec capture program\n",
                );
                unsafe { libc::_exit(1) }
            }
            Ok(ForkResult::Parent { child }) => {
                debug!("Forked capture child ({})", child);

                let pid = match channel.recv_pid() {
                    Ok(pid) => pid,
                    Err(e) => {
                        channel.release();
                        return Err(e);
                    }
                };

                let handle = Arc::new(CaptureProcessHandle::new());
                handle.store_pid(pid);
                info!("Got capture process PID ({}) from handoff", pid);

                *slot = Some(Arc::clone(&handle));
                *self.channel.lock() = Some(channel);
                Ok(handle)
            }
        }
    }

    pub fn handle(&self) -> Option<Arc<CaptureProcessHandle>> {
        self.handle.lock().clone()
    }

    /// Collects the exited capture child without blocking and records its
    /// exit status. Called from the signal dispatch thread on SIGCHLD.
    pub fn reap(&self) {
        let handle = match self.handle() {
            Some(handle) => handle,
            None => {
                debug!("Child-exit notification with no capture process");
                return;
            }
        };

        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, status)) => {
                warn!(
                    "Capture process ({}) exited with status {} after {}s",
                    pid,
                    status,
                    epoch_now().saturating_sub(handle.spawned_at())
                );
                if !handle.mark_reaped() {
                    debug!("Capture process was already reaped");
                }
            }
            Ok(WaitStatus::Signaled(pid, signal, _)) => {
                warn!("Capture process ({}) killed by {}", pid, signal);
                if !handle.mark_reaped() {
                    debug!("Capture process was already reaped");
                }
            }
            Ok(_) => debug!("No exited children to collect"),
            // ECHILD when the child was collected already; never escalated.
            Err(e) => debug!("Nothing to reap: {}", e),
        }
    }

    /// Closes and, for a FIFO, unlinks the handoff channel if still held.
    pub fn release_channel(&self) {
        if let Some(mut channel) = self.channel.lock().take() {
            channel.release();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn handle_has_no_pid_until_stored() {
        let handle = CaptureProcessHandle::new();
        assert_eq!(handle.pid(), None);
        handle.store_pid(Pid::from_raw(4321));
        assert_eq!(handle.pid(), Some(Pid::from_raw(4321)));
    }

    #[test]
    fn handle_reaps_exactly_once() {
        let handle = CaptureProcessHandle::new();
        assert!(!handle.is_reaped());
        assert!(handle.mark_reaped());
        assert!(!handle.mark_reaped());
        assert!(handle.is_reaped());
    }

    #[test]
    fn recv_reads_the_pid_written_to_the_pipe() {
        let (read_fd, write_fd) = pipe().unwrap();
        write(write_fd, &4321i32.to_ne_bytes()).unwrap();
        close(write_fd).unwrap();

        let mut channel = HandoffChannel::Pipe {
            read_fd: Some(read_fd),
            write_fd: None,
        };
        assert_eq!(channel.recv_pid().unwrap(), Pid::from_raw(4321));
    }

    #[test]
    fn recv_fails_when_nothing_was_written() {
        // Simulates the child dying before writing its PID.
        let (read_fd, write_fd) = pipe().unwrap();
        close(write_fd).unwrap();

        let mut channel = HandoffChannel::Pipe {
            read_fd: Some(read_fd),
            write_fd: None,
        };
        match channel.recv_pid() {
            Err(DaemonError::Handoff(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn recv_fails_on_short_write() {
        let (read_fd, write_fd) = pipe().unwrap();
        write(write_fd, &[0x01, 0x02]).unwrap();
        close(write_fd).unwrap();

        let mut channel = HandoffChannel::Pipe {
            read_fd: Some(read_fd),
            write_fd: None,
        };
        assert!(channel.recv_pid().is_err());
    }

    fn temp_fifo(tag: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "shutterd-fifo-{}-{}",
            tag,
            std::process::id()
        ));
        std::fs::remove_file(&path).ok();
        path
    }

    #[test]
    fn fifo_recv_fails_when_no_writer_appears() {
        // Simulates the child dying before opening the FIFO write end;
        // the read must give up instead of blocking startup forever.
        let path = temp_fifo("nowriter");
        let mut channel = HandoffChannel::create(Some(&path)).unwrap();

        let fd = open(
            path.as_path(),
            OFlag::O_RDONLY | OFlag::O_NONBLOCK,
            Mode::empty(),
        )
        .unwrap();
        let start = Instant::now();
        let result = read_pid_deadline(fd, Duration::from_millis(200));
        close(fd).unwrap();

        match result {
            Err(DaemonError::Handoff(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(start.elapsed() < Duration::from_secs(5));
        channel.release();
    }

    #[test]
    fn fifo_recv_reads_pid_from_late_writer() {
        let path = temp_fifo("latewriter");
        let mut channel = HandoffChannel::create(Some(&path)).unwrap();

        let writer_path = path.clone();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let fd = open(
                writer_path.as_path(),
                OFlag::O_WRONLY,
                Mode::empty(),
            )
            .unwrap();
            write(fd, &777i32.to_ne_bytes()).unwrap();
            close(fd).unwrap();
        });

        let fd = open(
            path.as_path(),
            OFlag::O_RDONLY | OFlag::O_NONBLOCK,
            Mode::empty(),
        )
        .unwrap();
        let result = read_pid_deadline(fd, Duration::from_secs(5));
        close(fd).unwrap();
        writer.join().unwrap();

        assert_eq!(result.unwrap(), Pid::from_raw(777));
        channel.release();
    }

    #[test]
    fn release_unlinks_a_fifo() {
        let mut path = std::env::temp_dir();
        path.push(format!("shutterd-fifo-test-{}", std::process::id()));
        std::fs::remove_file(&path).ok();

        let mut channel = HandoffChannel::create(Some(&path)).unwrap();
        assert!(path.exists());
        channel.release();
        assert!(!path.exists());
    }

    #[test]
    fn reap_without_a_spawned_child_is_a_noop() {
        let supervisor = Supervisor::new();
        supervisor.reap();
        supervisor.release_channel();
    }
}
