// SPDX-License-Identifier: MPL-2.0

//! One request, one response, per connection.
//!
//! A handler waits up to [`WAIT_TIMEOUT`] for the client to send something, reads once, writes
//! one response, and closes the connection. Only requests starting with `GET / ` are answered
//! with a market; anything else gets a bare 404 status line.

use std::{net::Ipv6Addr, sync::Arc, time::Duration};

use error_stack::{IntoReport as _, Result, ResultExt as _};
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::TcpStream,
    time,
};

use crate::Service;

/// How long a client has to start sending its request.
pub const WAIT_TIMEOUT: Duration = Duration::from_millis(1000);
/// The most request bytes read from a client.
pub const REQUEST_BUFFER_SIZE: usize = 8192;

/// The request prefix that asks for the client's market.
const LOOKUP_PREFIX: &[u8] = b"GET / ";
/// The head of every lookup response, up to the opening quote of the body.
const OK_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\n\
    Content-Type: application/json\r\n\
    Cache-Control: max-age=120\r\n\
    \r\n\
    \"";
const NOT_FOUND: &[u8] = b"HTTP/1.1 404 Not Found";

#[derive(thiserror::Error, Debug)]
enum HandleError {
    #[error("timed out waiting for request")]
    Timeout,
    #[error("failed waiting for request")]
    Wait,
    #[error("failed to read request")]
    Read,
    #[error("failed to write response")]
    Write,
}

/// Serves the client on `stream`, whose address is `peer`.
///
/// Errors stay with this connection; they are logged and the connection is closed.
#[tracing::instrument(name = "client", skip_all, fields(peer = %peer))]
pub async fn handle(service: Arc<Service>, mut stream: TcpStream, peer: Ipv6Addr) {
    tracing::debug!("New client arrives");

    if let Err(report) = respond(&service, &mut stream, peer).await {
        match report.current_context() {
            HandleError::Timeout => tracing::debug!("Timeout from client"),
            _ => tracing::warn!("{report:?}"),
        }
    }
    // `stream` is dropped, and the connection closed, on every path.
}

async fn respond(
    service: &Service,
    stream: &mut TcpStream,
    peer: Ipv6Addr,
) -> Result<(), HandleError> {
    time::timeout(WAIT_TIMEOUT, stream.readable())
        .await
        .into_report()
        .change_context(HandleError::Timeout)?
        .into_report()
        .change_context(HandleError::Wait)?;

    // Exactly one read: a request split across segments is judged on its first part.
    let mut buf = vec![0; REQUEST_BUFFER_SIZE];
    let len = stream.read(&mut buf).await.into_report().change_context(HandleError::Read)?;
    if len == 0 {
        tracing::debug!("client closed without sending a request");
        return Ok(());
    }

    let response = build_response(&buf[..len], || {
        let market = service.store().find_market(&peer);
        tracing::debug!("market: {}", String::from_utf8_lossy(&market));

        market
    });

    stream.write_all(&response).await.into_report().change_context(HandleError::Write)
}

/// Builds the response to `request`, calling `find_market` only for lookup requests.
///
/// The market bytes are quoted as-is, without escaping or any change of encoding.
pub fn build_response(request: &[u8], find_market: impl FnOnce() -> Vec<u8>) -> Vec<u8> {
    if request.starts_with(LOOKUP_PREFIX) {
        let market = find_market();
        let mut response = Vec::with_capacity(OK_HEAD.len() + market.len() + 1);
        response.extend_from_slice(OK_HEAD);
        response.extend_from_slice(&market);
        response.push(b'"');

        response
    } else {
        NOT_FOUND.to_vec()
    }
}
