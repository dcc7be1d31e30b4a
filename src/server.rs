//! TCP Server
//!
//! Binds the listen socket in the calling process, then forks the worker
//! pool that serves it.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use crate::app::{CallbackResult, ServerApp};
use crate::config::Config;
use crate::error::{NetframeError, Result};
use crate::network::ServerWorker;
use crate::process::{SharedFlag, WorkerPool};

type AppFactory<A> = Box<dyn Fn() -> CallbackResult<A>>;

/// Process-pooled TCP server
///
/// Every worker builds its own application object with the factory, so
/// application state is per process.
pub struct Server<A: ServerApp> {
    config: Config,
    factory: AppFactory<A>,
    pool: WorkerPool,
    stop: Option<Arc<SharedFlag>>,
    local_addr: Option<SocketAddr>,
}

impl<A: ServerApp> Server<A> {
    /// Create a server whose workers build their application with `factory`
    ///
    /// A factory error makes that one worker exit; the others keep serving.
    pub fn new<F>(config: Config, factory: F) -> Self
    where
        F: Fn() -> CallbackResult<A> + 'static,
    {
        let pool = WorkerPool::new(config.worker_num);
        Self {
            config,
            factory: Box::new(factory),
            pool,
            stop: None,
            local_addr: None,
        }
    }

    /// Create a server whose workers each get a clone of `app`
    pub fn with_app(config: Config, app: A) -> Self
    where
        A: Clone + 'static,
    {
        Self::new(config, move || Ok(app.clone()))
    }

    /// Bind, listen and fork the workers
    ///
    /// Bind errors are returned before any worker exists. Returns the bound
    /// address, which differs from the configured one when port 0 is used.
    pub fn start(&mut self) -> Result<SocketAddr> {
        if self.pool.is_started() {
            return Err(NetframeError::AlreadyStarted);
        }
        if self.config.worker_num == 0 {
            return Err(NetframeError::Config(
                "worker_num must be at least 1".to_string(),
            ));
        }

        let listener = TcpListener::bind((self.config.listen_addr.as_str(), self.config.port))
            .map_err(|e| {
                tracing::error!(
                    "Failed to bind {}:{}: {}",
                    self.config.listen_addr,
                    self.config.port,
                    e
                );
                e
            })?;
        let local_addr = listener.local_addr()?;
        let stop = Arc::new(SharedFlag::new()?);

        tracing::info!(
            "Listening on {} with {} workers",
            local_addr,
            self.config.worker_num
        );

        let factory = &self.factory;
        let config = &self.config;
        self.pool.start(|| {
            let app = factory().map_err(|e| {
                NetframeError::Worker(format!("application construction failed: {}", e))
            })?;
            let listener = listener.try_clone()?;
            ServerWorker::new(listener, app, config.clone(), Arc::clone(&stop))?.run()
        })?;

        // Workers hold their own copies of the listen socket
        drop(listener);

        self.stop = Some(stop);
        self.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Override address, port and worker count, then `start`
    pub fn start_at(&mut self, addr: &str, port: u16, worker_num: usize) -> Result<SocketAddr> {
        if self.pool.is_started() {
            return Err(NetframeError::AlreadyStarted);
        }

        self.config.listen_addr = addr.to_string();
        self.config.port = port;
        self.config.worker_num = worker_num;
        self.pool = WorkerPool::new(worker_num);
        self.start()
    }

    /// Signal every worker to stop and wait for them
    ///
    /// Workers still alive once `timeout` is spent are killed. `None`
    /// waits indefinitely.
    pub fn stop(&mut self, timeout: Option<Duration>) -> Result<()> {
        let stop = self.stop.take().ok_or(NetframeError::NotStarted)?;

        tracing::info!("Stopping server on {:?}", self.local_addr);
        stop.set();
        self.local_addr = None;
        self.pool.stop(timeout)
    }

    pub fn is_running(&self) -> bool {
        self.stop.is_some()
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Worker process ids while running
    pub fn worker_pids(&self) -> Vec<u32> {
        self.pool.pids()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl<A: ServerApp> Drop for Server<A> {
    fn drop(&mut self) {
        if self.is_running() {
            let budget = self.config.graceful_shutdown_timeout + self.config.stop_poll_interval;
            if let Err(e) = self.stop(Some(budget)) {
                tracing::warn!("Failed to stop server on drop: {}", e);
            }
        }
    }
}
