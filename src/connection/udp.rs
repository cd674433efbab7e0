//! UDP 위의 ack 계측 연결
//!
//! 패킷 = 16바이트 헤더 `{protocol_id, sequence, ack, ack_bits}` + 페이로드.
//! 소켓 I/O는 모두 논블로킹이며 틱 루프 안에서만 호출된다.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::reliability::{PacketHeader, ReliabilitySystem, DEFAULT_RTT_MAXIMUM};
use super::{Connection, ConnectionStats, MAX_DATAGRAM_SIZE};
use crate::{Config, Error, Result};

/// 연결 헤더 길이 (u32 × 4, bincode 고정 길이)
pub const PACKET_HEADER_LEN: usize = 16;

/// 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Listening,
    Connecting,
    ConnectFail,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    None,
    Client,
    Server,
}

/// UDP 연결
pub struct ReliableConnection {
    protocol_id: u32,
    timeout: f64,
    socket: Option<UdpSocket>,
    state: ConnectionState,
    mode: Mode,
    address: Option<SocketAddr>,
    timeout_accumulator: f64,
    reliability: ReliabilitySystem,
    recv_buf: Vec<u8>,
}

impl ReliableConnection {
    pub fn new(protocol_id: u32, timeout: f64) -> Self {
        Self {
            protocol_id,
            timeout,
            socket: None,
            state: ConnectionState::Disconnected,
            mode: Mode::None,
            address: None,
            timeout_accumulator: 0.0,
            reliability: ReliabilitySystem::new(DEFAULT_RTT_MAXIMUM),
            recv_buf: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.protocol_id, config.timeout)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// 상대 주소 (연결 중이거나 연결됨)
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.address
    }

    /// 바인드된 로컬 주소
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let socket = self.socket.as_ref().ok_or(Error::NotStarted)?;
        Ok(socket.local_addr()?)
    }

    pub fn reliability(&self) -> &ReliabilitySystem {
        &self.reliability
    }

    fn clear_data(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.address = None;
        self.timeout_accumulator = 0.0;
        self.reliability.reset();
    }

    fn encode_header(&self) -> Result<Vec<u8>> {
        let header = self.reliability.header(self.protocol_id);
        Ok(bincode::serialize(&header)?)
    }

    /// 헤더 검증 및 상대 확인. 유효한 패킷이면 헤더 반환
    fn accept_datagram(&mut self, len: usize, from: SocketAddr) -> Option<PacketHeader> {
        if len < PACKET_HEADER_LEN {
            return None;
        }

        let header: PacketHeader = bincode::deserialize(&self.recv_buf[..PACKET_HEADER_LEN]).ok()?;
        if header.protocol_id != self.protocol_id {
            return None;
        }

        if self.mode == Mode::Server && self.state == ConnectionState::Listening {
            info!("server accepts connection from client {}", from);
            self.state = ConnectionState::Connected;
            self.address = Some(from);
        }

        if self.address != Some(from) {
            debug!("ignoring packet from unknown peer {}", from);
            return None;
        }

        if self.mode == Mode::Client && self.state == ConnectionState::Connecting {
            info!("client completes connection with server {}", from);
            self.state = ConnectionState::Connected;
        }

        self.timeout_accumulator = 0.0;
        Some(header)
    }
}

impl Connection for ReliableConnection {
    /// 런타임 안에서 호출해야 한다 (tokio 리액터 등록)
    fn start(&mut self, port: u16) -> Result<()> {
        let bind_err = |source: io::Error| Error::Bind { port, source };

        let std_socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).map_err(bind_err)?;
        std_socket.set_nonblocking(true).map_err(bind_err)?;
        let socket = UdpSocket::from_std(std_socket).map_err(bind_err)?;

        info!("start connection on port {}", port);
        self.socket = Some(socket);
        Ok(())
    }

    fn connect(&mut self, address: SocketAddr) {
        info!("client connecting to {}", address);
        self.clear_data();
        self.mode = Mode::Client;
        self.state = ConnectionState::Connecting;
        self.address = Some(address);
    }

    fn listen(&mut self) {
        info!("server listening for connection");
        self.clear_data();
        self.mode = Mode::Server;
        self.state = ConnectionState::Listening;
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    fn connect_failed(&self) -> bool {
        self.state == ConnectionState::ConnectFail
    }

    fn send_packet(&mut self, payload: &[u8]) -> Result<()> {
        let Some(address) = self.address else {
            return Ok(());
        };

        let mut packet = self.encode_header()?;
        packet.extend_from_slice(payload);

        let socket = self.socket.as_ref().ok_or(Error::NotStarted)?;
        match socket.try_send_to(&packet, address) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("send buffer full, packet dropped");
            }
            Err(e) => return Err(e.into()),
        }

        self.reliability.packet_sent(payload.len());
        Ok(())
    }

    fn receive_packet(&mut self, max_size: usize) -> Option<Bytes> {
        loop {
            let (len, from) = match self.socket.as_ref()?.try_recv_from(&mut self.recv_buf) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) => {
                    debug!("receive error: {}", e);
                    return None;
                }
            };

            let Some(header) = self.accept_datagram(len, from) else {
                continue;
            };

            let payload_len = len - PACKET_HEADER_LEN;
            self.reliability.packet_received(header.sequence, payload_len);
            self.reliability.process_ack(header.ack, header.ack_bits);

            if payload_len > max_size {
                warn!("packet of {} bytes exceeds receive limit {}, dropped", payload_len, max_size);
                continue;
            }

            return Some(Bytes::copy_from_slice(&self.recv_buf[PACKET_HEADER_LEN..len]));
        }
    }

    fn update(&mut self, delta_time: f64) {
        self.reliability.update(delta_time);

        if !matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected) {
            return;
        }

        self.timeout_accumulator += delta_time;
        if self.timeout_accumulator <= self.timeout {
            return;
        }

        match (self.state, self.mode) {
            (ConnectionState::Connecting, _) => {
                warn!("connect timed out");
                self.clear_data();
                self.state = ConnectionState::ConnectFail;
            }
            (ConnectionState::Connected, Mode::Server) => {
                warn!("connection timed out, listening again");
                self.clear_data();
                self.state = ConnectionState::Listening;
            }
            _ => {
                warn!("connection timed out");
                self.clear_data();
                self.state = ConnectionState::ConnectFail;
            }
        }
    }

    fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            round_trip_time: self.reliability.round_trip_time(),
            sent_packets: self.reliability.sent_packets(),
            acked_packets: self.reliability.acked_packets(),
            lost_packets: self.reliability.lost_packets(),
            sent_bandwidth: self.reliability.sent_bandwidth(),
            acked_bandwidth: self.reliability.acked_bandwidth(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const PROTOCOL_ID: u32 = 0x1122_3344;

    fn loopback(conn: &ReliableConnection) -> SocketAddr {
        let port = conn.local_addr().unwrap().port();
        SocketAddr::from((Ipv4Addr::LOCALHOST, port))
    }

    async fn pump(conn: &mut ReliableConnection) -> Option<Bytes> {
        for _ in 0..50 {
            if let Some(packet) = conn.receive_packet(1024) {
                return Some(packet);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    #[test]
    fn header_is_sixteen_bytes() {
        let header = PacketHeader {
            protocol_id: 1,
            sequence: 2,
            ack: 3,
            ack_bits: 4,
        };
        assert_eq!(bincode::serialize(&header).unwrap().len(), PACKET_HEADER_LEN);
    }

    #[test]
    fn send_before_start_is_not_started() {
        let mut conn = ReliableConnection::new(PROTOCOL_ID, 10.0);
        conn.connect(SocketAddr::from((Ipv4Addr::LOCALHOST, 9)));
        assert!(matches!(conn.send_packet(b"x"), Err(Error::NotStarted)));
    }

    #[tokio::test]
    async fn bind_conflict_is_bind_error() {
        let mut first = ReliableConnection::new(PROTOCOL_ID, 10.0);
        first.start(0).unwrap();
        let port = first.local_addr().unwrap().port();

        let mut second = ReliableConnection::new(PROTOCOL_ID, 10.0);
        assert!(matches!(second.start(port), Err(Error::Bind { .. })));
    }

    #[tokio::test]
    async fn client_and_server_connect_and_exchange() {
        let mut server = ReliableConnection::new(PROTOCOL_ID, 10.0);
        server.start(0).unwrap();
        server.listen();

        let mut client = ReliableConnection::new(PROTOCOL_ID, 10.0);
        client.start(0).unwrap();
        client.connect(loopback(&server));
        assert_eq!(client.state(), ConnectionState::Connecting);

        tokio::time::sleep(Duration::from_millis(10)).await;
        client.send_packet(b"hello").unwrap();
        assert_eq!(pump(&mut server).await.as_deref(), Some(&b"hello"[..]));
        assert!(server.is_connected());

        server.send_packet(b"world").unwrap();
        assert_eq!(pump(&mut client).await.as_deref(), Some(&b"world"[..]));
        assert!(client.is_connected());
        assert_eq!(client.stats().acked_packets, 1);
    }

    #[tokio::test]
    async fn ignores_foreign_protocol_id() {
        let mut server = ReliableConnection::new(PROTOCOL_ID, 10.0);
        server.start(0).unwrap();
        server.listen();

        let mut stranger = ReliableConnection::new(0xDEAD_BEEF, 10.0);
        stranger.start(0).unwrap();
        stranger.connect(loopback(&server));

        tokio::time::sleep(Duration::from_millis(10)).await;
        stranger.send_packet(b"noise").unwrap();
        assert!(pump(&mut server).await.is_none());
        assert_eq!(server.state(), ConnectionState::Listening);
    }

    #[tokio::test]
    async fn connecting_times_out_to_connect_fail() {
        let mut client = ReliableConnection::new(PROTOCOL_ID, 1.0);
        client.start(0).unwrap();
        client.connect(SocketAddr::from((Ipv4Addr::LOCALHOST, 9)));

        for _ in 0..40 {
            client.update(1.0 / 30.0);
        }
        assert!(client.connect_failed());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn listener_times_out_and_accepts_next_sender() {
        let mut server = ReliableConnection::new(PROTOCOL_ID, 1.0);
        server.start(0).unwrap();
        server.listen();

        let mut first = ReliableConnection::new(PROTOCOL_ID, 1.0);
        first.start(0).unwrap();
        first.connect(loopback(&server));

        tokio::time::sleep(Duration::from_millis(10)).await;
        first.send_packet(b"a").unwrap();
        assert_eq!(pump(&mut server).await.as_deref(), Some(&b"a"[..]));
        assert_eq!(server.state(), ConnectionState::Connected);
        assert_eq!(server.peer_addr(), Some(loopback(&first)));

        server.send_packet(b"ack").unwrap();
        assert_eq!(server.reliability().local_sequence(), 1);

        for _ in 0..40 {
            server.update(1.0 / 30.0);
        }
        assert_eq!(server.state(), ConnectionState::Listening);
        assert_eq!(server.peer_addr(), None);
        assert_eq!(server.reliability().local_sequence(), 0);
        assert!(!server.connect_failed());

        let mut second = ReliableConnection::new(PROTOCOL_ID, 1.0);
        second.start(0).unwrap();
        second.connect(loopback(&server));

        tokio::time::sleep(Duration::from_millis(10)).await;
        second.send_packet(b"b").unwrap();
        assert_eq!(pump(&mut server).await.as_deref(), Some(&b"b"[..]));
        assert_eq!(server.state(), ConnectionState::Connected);
        assert_eq!(server.peer_addr(), Some(loopback(&second)));
    }

    #[tokio::test]
    async fn connected_client_times_out_to_connect_fail() {
        let mut server = ReliableConnection::new(PROTOCOL_ID, 10.0);
        server.start(0).unwrap();
        server.listen();

        let mut client = ReliableConnection::new(PROTOCOL_ID, 1.0);
        client.start(0).unwrap();
        client.connect(loopback(&server));

        tokio::time::sleep(Duration::from_millis(10)).await;
        client.send_packet(b"hello").unwrap();
        assert!(pump(&mut server).await.is_some());
        server.send_packet(b"world").unwrap();
        assert!(pump(&mut client).await.is_some());
        assert!(client.is_connected());
        assert_eq!(client.peer_addr(), Some(loopback(&server)));

        for _ in 0..40 {
            client.update(1.0 / 30.0);
        }
        assert!(client.connect_failed());
        assert!(!client.is_connected());
        assert_eq!(client.peer_addr(), None);
    }
}
