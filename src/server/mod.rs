pub mod connection;
pub mod session;

use crate::directory::DirectoryService;
use crate::DirectoryError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info};

struct RunningListener {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// TCP transport speaking LDAPv3 on top of one directory service.
pub struct Listener<S: DirectoryService + 'static> {
    service: Arc<S>,
    bind_addr: SocketAddr,
    running: Option<RunningListener>,
}

impl<S: DirectoryService + 'static> Listener<S> {
    pub fn new(service: Arc<S>, bind_addr: SocketAddr) -> Self {
        Self {
            service,
            bind_addr,
            running: None,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// The bound address once started. Differs from `bind_addr` when port 0
    /// was requested.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Binds the socket and starts accepting connections. The directory
    /// service has to be started first.
    pub async fn start(&mut self) -> crate::Result<SocketAddr> {
        if self.running.is_some() {
            return Err(DirectoryError::AlreadyStarted);
        }
        if !self.service.is_started() {
            return Err(DirectoryError::NotStarted);
        }

        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.service),
            shutdown_rx,
        ));

        info!("LDAP server listening on {}", local_addr);
        self.running = Some(RunningListener {
            local_addr,
            shutdown_tx,
            accept_task,
        });
        Ok(local_addr)
    }

    /// Stops accepting, closes open connections and waits for them to finish.
    /// Stopping a listener that is not running does nothing.
    pub async fn stop(&mut self) -> crate::Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        let _ = running.shutdown_tx.send(true);
        running
            .accept_task
            .await
            .map_err(|e| DirectoryError::Directory(format!("listener task failed: {}", e)))?;

        info!("LDAP server on {} stopped", running.local_addr);
        Ok(())
    }

    /// Signals the accept loop to stop without waiting for it.
    pub fn signal_shutdown(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(true);
            debug!("Signalled LDAP server on {} to stop", running.local_addr);
        }
    }
}

async fn accept_loop<S: DirectoryService + 'static>(
    listener: TcpListener,
    service: Arc<S>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, addr)) => {
                    debug!("New connection from {}", addr);
                    let service = Arc::clone(&service);
                    let shutdown = shutdown.clone();
                    connections.spawn(async move {
                        if let Err(e) = connection::handle_connection(socket, service, shutdown).await {
                            error!("Connection error from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    // Open connections watch the same signal and close themselves
    while connections.join_next().await.is_some() {}
}
