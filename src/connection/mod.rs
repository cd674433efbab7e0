//! 패킷 연결
//!
//! 비신뢰 데이터그램 연결의 기능 표면. 전달/순서/재전송을 보장하지 않고
//! ack 기반 RTT, 송신/ack/손실 수, 대역폭 통계만 제공한다.

use std::net::SocketAddr;

use bytes::Bytes;

use crate::Result;

pub mod lossy;
pub mod memory;
pub mod reliability;
pub mod udp;

pub use lossy::LossyConnection;
pub use memory::MemoryConnection;
pub use reliability::ReliabilitySystem;
pub use udp::ReliableConnection;

/// UDP 데이터그램 최대 페이로드 (IPv4)
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// 연결 헤더를 제외한 최대 페이로드
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - udp::PACKET_HEADER_LEN;

/// 연결별 전달 통계
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConnectionStats {
    /// 평활화된 RTT (초)
    pub round_trip_time: f64,

    /// 송신 패킷 수
    pub sent_packets: u32,

    /// ack 받은 패킷 수
    pub acked_packets: u32,

    /// 손실 판정된 패킷 수
    pub lost_packets: u32,

    /// 송신 대역폭 (kbps)
    pub sent_bandwidth: f64,

    /// ack 대역폭 (kbps)
    pub acked_bandwidth: f64,
}

impl ConnectionStats {
    /// RTT (밀리초)
    pub fn rtt_ms(&self) -> f64 {
        self.round_trip_time * 1000.0
    }

    /// 손실률 (%)
    pub fn loss_percent(&self) -> f64 {
        if self.sent_packets == 0 {
            return 0.0;
        }
        self.lost_packets as f64 / self.sent_packets as f64 * 100.0
    }
}

/// 드라이버가 사용하는 연결 기능
pub trait Connection {
    /// 로컬 포트에서 시작 (0이면 임의 포트)
    fn start(&mut self, port: u16) -> Result<()>;

    /// 원격 주소로 연결 시도
    fn connect(&mut self, address: SocketAddr);

    /// 첫 송신자를 기다림
    fn listen(&mut self);

    fn is_connected(&self) -> bool;

    fn connect_failed(&self) -> bool;

    /// 패킷 송신 (전달 보장 없음)
    fn send_packet(&mut self, payload: &[u8]) -> Result<()>;

    /// 대기 중인 패킷 하나 수신, 없으면 None
    fn receive_packet(&mut self, max_size: usize) -> Option<Bytes>;

    /// 내부 시간 진행 (초)
    fn update(&mut self, delta_time: f64);

    fn stats(&self) -> ConnectionStats;
}
