// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A standalone listener for hosts without an HTTP server of their own.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};

use crate::plugin::Plugin;

/// Errors starting the debug server.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("unable to bind debug server to {addr}: {source}")]
    Bind {
        /// The requested address.
        addr: SocketAddr,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The bound socket has no local address.
    #[error("unable to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Serves a [`Plugin`] on its own TCP listener until shut down.
///
/// Dropping the server signals shutdown without waiting for it.
#[derive(Debug)]
pub struct DebugServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DebugServer {
    /// Bind `addr` and start serving `plugin` in a background task.
    ///
    /// Binding port 0 picks a free port; see [`DebugServer::addr`].
    pub async fn start(addr: SocketAddr, plugin: &Plugin) -> Result<DebugServer, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let addr = listener.local_addr().map_err(ServerError::LocalAddr)?;
        tracing::info!(%addr, entrypoint = plugin.routes().entrypoint(), "debug server listening");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let router = plugin.router();
        let handle = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(err) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::warn!(?err, "debug server stopped with an error");
            }
        });

        Ok(DebugServer {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// The address actually bound.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for open ones to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(?err, "debug server task failed");
            }
        }
        tracing::info!(addr = %self.addr, "debug server stopped");
    }
}

impl Drop for DebugServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
