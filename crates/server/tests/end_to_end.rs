// SPDX-License-Identifier: MPL-2.0

use std::{
    fs,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use marketd_server::{
    load_mapping,
    Acceptor,
    Config,
    ControlRequest,
    Controller,
    PidFile,
    ServeError,
    Service,
    StartError,
    State,
};
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::TcpStream,
    task::JoinHandle,
    time,
};

const LOOKUP: &[u8] = b"GET / HTTP/1.1\r\n\r\n";

/// One IPv4 record covering `lower..=upper` for `market`.
fn record(lower: Ipv4Addr, upper: Ipv4Addr, market: &str) -> Vec<u8> {
    let mut bytes = vec![8];
    bytes.extend_from_slice(&lower.octets());
    bytes.extend_from_slice(&upper.octets());
    bytes.extend_from_slice(market.as_bytes());
    bytes.push(0);

    bytes
}

/// One IPv6 record covering `lower..=upper` for `market`.
fn record_v6(lower: Ipv6Addr, upper: Ipv6Addr, market: &str) -> Vec<u8> {
    let mut bytes = vec![32];
    bytes.extend_from_slice(&lower.octets());
    bytes.extend_from_slice(&upper.octets());
    bytes.extend_from_slice(market.as_bytes());
    bytes.push(0);

    bytes
}

fn loopback_record(market: &str) -> Vec<u8> {
    record(Ipv4Addr::new(127, 0, 0, 0), Ipv4Addr::new(127, 255, 255, 255), market)
}

fn ok_response(market: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nCache-Control: max-age=120\r\n\r\n\"{market}\""
    )
    .into_bytes()
}

struct Harness {
    service: Arc<Service>,
    controller: Controller,
    addr: SocketAddr,
    acceptor: JoinHandle<()>,
    mapping: PathBuf,
    _dir: tempfile::TempDir,
}

impl Harness {
    async fn start(mapping: &[u8]) -> Self {
        Self::start_on((Ipv4Addr::LOCALHOST, 0).into(), mapping).await
    }

    async fn start_on(addr: SocketAddr, mapping: &[u8]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.bin");
        fs::write(&path, mapping).unwrap();

        let table = load_mapping(path.clone()).await.unwrap();
        let service = Arc::new(Service::new(&path, table));
        let acceptor = Acceptor::bind(addr).unwrap();
        let addr = acceptor.local_addr().unwrap();

        Self {
            controller: Controller::new(Arc::clone(&service)),
            acceptor: tokio::spawn(acceptor.serve(Arc::clone(&service))),
            service,
            addr,
            mapping: path,
            _dir: dir,
        }
    }

    async fn request(&self, request: &[u8]) -> Vec<u8> {
        self.request_to(self.addr, request).await
    }

    async fn request_to(&self, addr: SocketAddr, request: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        send(&mut stream, request).await
    }

    async fn join_acceptor(self) {
        time::timeout(Duration::from_secs(5), self.acceptor)
            .await
            .expect("acceptor should stop")
            .unwrap();
    }
}

async fn send(stream: &mut TcpStream, request: &[u8]) -> Vec<u8> {
    stream.write_all(request).await.unwrap();

    let mut response = Vec::new();
    time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("server should close the connection")
        .unwrap();

    response
}

#[tokio::test]
async fn lookup_answers_with_market_of_mapped_ipv4_peer() {
    let mut mapping = record(Ipv4Addr::new(1, 0, 0, 0), Ipv4Addr::new(1, 0, 0, 255), "APAC");
    mapping.extend(loopback_record("US-EAST"));
    mapping.extend(record(Ipv4Addr::new(203, 0, 113, 0), Ipv4Addr::new(203, 0, 113, 255), "EU"));
    let harness = Harness::start(&mapping).await;

    assert_eq!(harness.request(LOOKUP).await, ok_response("US-EAST"));
}

fn dual_stack_mapping() -> Vec<u8> {
    // `::1` sorts before every IPv4-mapped address.
    let mut mapping = record_v6(Ipv6Addr::LOCALHOST, Ipv6Addr::LOCALHOST, "LOCAL6");
    mapping.extend(loopback_record("US-EAST"));

    mapping
}

#[tokio::test]
async fn public_listener_serves_ipv4_clients_as_mapped_peers() {
    let harness =
        Harness::start_on(marketd_util::bind::public_addr(0), &dual_stack_mapping()).await;
    assert!(harness.addr.is_ipv6());

    let client_addr = (Ipv4Addr::LOCALHOST, harness.addr.port()).into();
    let response = harness.request_to(client_addr, LOOKUP).await;

    assert_eq!(response, ok_response("US-EAST"));
}

#[tokio::test]
async fn public_listener_serves_ipv6_clients() {
    let harness =
        Harness::start_on(marketd_util::bind::public_addr(0), &dual_stack_mapping()).await;

    let client_addr = (Ipv6Addr::LOCALHOST, harness.addr.port()).into();
    let response = harness.request_to(client_addr, LOOKUP).await;

    assert_eq!(response, ok_response("LOCAL6"));
}

#[tokio::test]
async fn unmapped_peer_gets_default_market() {
    let mapping = record(Ipv4Addr::new(203, 0, 113, 0), Ipv4Addr::new(203, 0, 113, 255), "EU");
    let harness = Harness::start(&mapping).await;

    assert_eq!(harness.request(LOOKUP).await, ok_response("default"));
}

#[tokio::test]
async fn other_paths_get_bare_not_found() {
    let harness = Harness::start(&loopback_record("US-EAST")).await;

    assert_eq!(
        harness.request(b"GET /other HTTP/1.1\r\n\r\n").await,
        b"HTTP/1.1 404 Not Found",
    );
}

#[tokio::test]
async fn silent_client_is_dropped_without_response() {
    let harness = Harness::start(&loopback_record("US-EAST")).await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();

    let started = Instant::now();
    let mut response = Vec::new();
    time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response))
        .await
        .expect("server should close the connection")
        .unwrap();

    assert!(response.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn reload_installs_new_mapping() {
    let harness = Harness::start(&loopback_record("OLD")).await;
    assert_eq!(harness.request(LOOKUP).await, ok_response("OLD"));

    fs::write(&harness.mapping, loopback_record("NEW")).unwrap();
    harness.controller.handle(ControlRequest::Reload).await;

    assert_eq!(harness.service.state(), State::Running);
    assert_eq!(harness.request(LOOKUP).await, ok_response("NEW"));
}

#[tokio::test]
async fn corrupt_reload_stops_accepting_but_finishes_open_connections() {
    let harness = Harness::start(&loopback_record("OLD")).await;

    let mut open = TcpStream::connect(harness.addr).await.unwrap();
    // Let the acceptor pick the connection up before the listener goes away.
    time::sleep(Duration::from_millis(100)).await;

    fs::write(&harness.mapping, [33u8]).unwrap();
    harness.controller.handle(ControlRequest::Reload).await;
    assert_eq!(harness.service.state(), State::Stopped);

    assert_eq!(send(&mut open, LOOKUP).await, ok_response("OLD"));

    let addr = harness.addr;
    let service = Arc::clone(&harness.service);
    harness.join_acceptor().await;

    assert!(TcpStream::connect(addr).await.is_err());
    let failure = service.take_reload_failure().expect("reload failure should be recorded");
    assert!(failure.downcast_ref::<marketd_mapping::DecodeError>().is_some());
}

#[tokio::test]
async fn terminate_closes_listener() {
    let harness = Harness::start(&loopback_record("US-EAST")).await;
    let addr = harness.addr;

    harness.controller.handle(ControlRequest::Terminate).await;
    harness.join_acceptor().await;

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn serve_refuses_to_start_twice() {
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("server.pid");
    let _running = PidFile::acquire(&pid_path).unwrap();

    let report = marketd_server::serve(Config {
        port: 0,
        mapping: dir.path().join("mapping.bin"),
        pid_file: pid_path.clone(),
    })
    .await
    .unwrap_err();

    assert!(matches!(report.current_context(), ServeError::Start));
    assert!(matches!(report.downcast_ref::<StartError>(), Some(StartError::PidFile)));
    assert!(pid_path.exists());
}

#[tokio::test]
async fn failed_startup_removes_pid_file() {
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("server.pid");

    let result = marketd_server::serve(Config {
        port: 0,
        mapping: dir.path().join("missing.bin"),
        pid_file: pid_path.clone(),
    })
    .await;

    assert!(result.is_err());
    assert!(!pid_path.exists());
}
