// SPDX-License-Identifier: MPL-2.0

use std::{io, net::SocketAddr, sync::Arc};

use error_stack::{IntoReport as _, Result, ResultExt as _};
use tokio::{
    net::{TcpListener, TcpSocket},
    task::JoinSet,
};

use crate::{handler, Service};

/// The maximum number of pending connections the listening socket queues.
pub const LISTEN_BACKLOG: u32 = 20;

#[derive(thiserror::Error, Debug)]
pub enum BindError {
    /// The call to [`TcpSocket::new_v4`] or [`TcpSocket::new_v6`] failed.
    #[error("failed to create socket")]
    Socket,
    /// The call to [`TcpSocket::set_reuseaddr`] failed.
    #[error("failed to set SO_REUSEADDR")]
    ReuseAddr,
    /// The call to [`TcpSocket::bind`] failed.
    #[error("failed to bind socket")]
    Bind,
    /// The call to [`TcpSocket::listen`] failed.
    #[error("failed to listen on socket")]
    Listen,
}

/// Owns the listening socket and spawns one handler per accepted connection.
#[derive(Debug)]
pub struct Acceptor {
    listener: TcpListener,
}

impl Acceptor {
    /// Binds a listener to `addr`.
    ///
    /// Binding the IPv6 wildcard address also accepts IPv4 clients on systems where IPv6 sockets
    /// are dual-stack by default.
    pub fn bind(addr: SocketAddr) -> Result<Self, BindError> {
        tracing::info!("Preparing server on {addr}");

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .into_report()
        .change_context(BindError::Socket)?;
        socket.set_reuseaddr(true).into_report().change_context(BindError::ReuseAddr)?;
        socket
            .bind(addr)
            .into_report()
            .change_context(BindError::Bind)
            .attach_printable_lazy(|| format!("address: {addr}"))?;
        let listener = socket
            .listen(LISTEN_BACKLOG)
            .into_report()
            .change_context(BindError::Listen)?;

        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the service stops, then closes the listener.
    ///
    /// Handlers that are already running are allowed to finish before this returns.
    pub async fn serve(self, service: Arc<Service>) {
        let mut handlers = JoinSet::new();

        tracing::info!("Waiting for clients");
        loop {
            tokio::select! {
                biased;
                _ = service.stopped() => break,
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("connection handler failed: {e}");
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let peer = marketd_mapping::normalize(peer.ip());
                        handlers.spawn(handler::handle(Arc::clone(&service), stream, peer));
                    }
                    Err(e) => {
                        tracing::error!("Error reading from client: {e}");
                    }
                },
            }
        }

        drop(self.listener);
        tracing::info!("Listener closed; waiting for {} connection(s)", handlers.len());
        while let Some(joined) = handlers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("connection handler failed: {e}");
            }
        }
    }
}
