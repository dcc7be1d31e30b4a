//! Worker Processes
//!
//! Workers are forked children. Forking is how sockets reach them: the
//! listen socket (server) or the connected socket (client) is simply
//! inherited. A child runs its target and `_exit`s without returning into
//! the parent's code.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{NetframeError, Result};

/// Interval between non-blocking reap attempts while joining with a timeout
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Exit status of a worker whose target returned an error
pub const EXIT_ERROR: i32 = 1;

/// Exit status of a worker whose target panicked
pub const EXIT_PANIC: i32 = 101;

/// Handle to one forked worker process
#[derive(Debug)]
pub struct WorkerProcess {
    pid: libc::pid_t,
    exit_status: Option<i32>,
}

impl WorkerProcess {
    /// Fork a child that runs `target` and exits
    ///
    /// The child never returns from this call.
    pub fn spawn<F>(target: F) -> Result<Self>
    where
        F: FnOnce() -> Result<()>,
    {
        // SAFETY: the child only runs `target` and then `_exit`s.
        let pid = unsafe { libc::fork() };
        match pid {
            -1 => Err(io::Error::last_os_error().into()),
            0 => {
                let code = run_child(target);
                // SAFETY: terminates the child without unwinding into the parent's stack.
                unsafe { libc::_exit(code) }
            }
            pid => {
                tracing::debug!("Spawned worker process {}", pid);
                Ok(Self {
                    pid,
                    exit_status: None,
                })
            }
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid as u32
    }

    /// Exit status once reaped; signals are reported as `128 + signo`
    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.try_reap(), Ok(false))
    }

    /// Wait for the process to exit
    ///
    /// Returns false if it is still running when `timeout` elapses.
    pub fn join(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        let Some(timeout) = timeout else {
            return self.reap_blocking().map(|_| true);
        };

        let deadline = Instant::now() + timeout;
        loop {
            if self.try_reap()? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(JOIN_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// SIGKILL the process and reap it
    pub fn kill(&mut self) -> io::Result<()> {
        if self.exit_status.is_some() {
            return Ok(());
        }

        tracing::warn!("Killing worker process {}", self.pid);
        // SAFETY: plain syscall on a child we have not reaped yet.
        if unsafe { libc::kill(self.pid, libc::SIGKILL) } == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(err);
            }
        }
        self.reap_blocking()
    }

    fn try_reap(&mut self) -> io::Result<bool> {
        self.waitpid(libc::WNOHANG)
    }

    fn reap_blocking(&mut self) -> io::Result<()> {
        self.waitpid(0).map(|_| ())
    }

    fn waitpid(&mut self, flags: libc::c_int) -> io::Result<bool> {
        if self.exit_status.is_some() {
            return Ok(true);
        }

        loop {
            let mut status: libc::c_int = 0;
            // SAFETY: `status` is a valid out pointer.
            let ret = unsafe { libc::waitpid(self.pid, &mut status, flags) };
            match ret {
                0 => return Ok(false),
                -1 => {
                    let err = io::Error::last_os_error();
                    match err.raw_os_error() {
                        Some(libc::EINTR) => continue,
                        // Already reaped elsewhere
                        Some(libc::ECHILD) => {
                            self.exit_status = Some(0);
                            return Ok(true);
                        }
                        _ => return Err(err),
                    }
                }
                _ => {
                    let code = if libc::WIFEXITED(status) {
                        libc::WEXITSTATUS(status)
                    } else if libc::WIFSIGNALED(status) {
                        128 + libc::WTERMSIG(status)
                    } else {
                        continue;
                    };
                    tracing::debug!("Worker process {} exited with status {}", self.pid, code);
                    self.exit_status = Some(code);
                    return Ok(true);
                }
            }
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if self.exit_status.is_none() {
            let _ = self.kill();
        }
    }
}

/// Body of a freshly forked child; returns its exit status
fn run_child<F>(target: F) -> i32
where
    F: FnOnce() -> Result<()>,
{
    // Peer resets surface as write errors, not as a fatal signal.
    // SAFETY: changes this process's signal disposition only.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    let pid = std::process::id();
    let _span = tracing::info_span!("worker", pid).entered();
    tracing::debug!("Worker process started");

    match panic::catch_unwind(AssertUnwindSafe(target)) {
        Ok(Ok(())) => {
            tracing::debug!("Worker process finished");
            0
        }
        Ok(Err(e)) => {
            tracing::error!("Worker process failed: {}", e);
            EXIT_ERROR
        }
        Err(_) => {
            tracing::error!("Worker process panicked");
            EXIT_PANIC
        }
    }
}

/// A fixed-size pool of worker processes running the same target
#[derive(Debug)]
pub struct WorkerPool {
    worker_num: usize,
    workers: Vec<WorkerProcess>,
}

impl WorkerPool {
    pub fn new(worker_num: usize) -> Self {
        Self {
            worker_num,
            workers: Vec::with_capacity(worker_num),
        }
    }

    /// Fork `worker_num` children, each running `target`
    ///
    /// A worker whose target fails exits on its own without affecting the
    /// others. If a fork fails the workers already spawned are killed.
    pub fn start<F>(&mut self, target: F) -> Result<()>
    where
        F: Fn() -> Result<()>,
    {
        if self.is_started() {
            return Err(NetframeError::AlreadyStarted);
        }

        for _ in 0..self.worker_num {
            match WorkerProcess::spawn(&target) {
                Ok(worker) => self.workers.push(worker),
                Err(e) => {
                    tracing::error!("Failed to spawn worker: {}", e);
                    self.workers.clear();
                    return Err(e);
                }
            }
        }

        tracing::info!("Started {} worker processes", self.workers.len());
        Ok(())
    }

    /// Wait for every worker to exit
    ///
    /// All joins share one `timeout` budget; workers still alive once it is
    /// spent are killed. `None` waits indefinitely.
    pub fn stop(&mut self, timeout: Option<Duration>) -> Result<()> {
        if !self.is_started() {
            return Err(NetframeError::NotStarted);
        }

        let mut budget = timeout;
        for worker in &mut self.workers {
            let started = Instant::now();
            if let Err(e) = worker.join(budget) {
                tracing::warn!("Failed to join worker {}: {}", worker.pid(), e);
            }
            budget = budget.map(|b| b.saturating_sub(started.elapsed()));
        }

        for worker in &mut self.workers {
            if worker.is_alive() {
                if let Err(e) = worker.kill() {
                    tracing::warn!("Failed to kill worker {}: {}", worker.pid(), e);
                }
            }
        }

        tracing::info!("Stopped {} worker processes", self.workers.len());
        self.workers.clear();
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        !self.workers.is_empty()
    }

    pub fn worker_num(&self) -> usize {
        self.worker_num
    }

    pub fn pids(&self) -> Vec<u32> {
        self.workers.iter().map(WorkerProcess::pid).collect()
    }

    /// Mutable access to the worker handles, mainly to inspect exit status
    pub fn workers_mut(&mut self) -> &mut [WorkerProcess] {
        &mut self.workers
    }
}
