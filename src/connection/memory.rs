//! 프로세스 내 연결 쌍
//!
//! 소켓 없이 두 드라이버를 틱 단위로 결정적으로 돌릴 때 사용한다.
//! 손실 없음, 순서 보장. RTT와 연결 상태는 핸들로 조작한다.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::Rc;

use bytes::Bytes;

use super::{Connection, ConnectionStats};
use crate::Result;

/// 대역폭 계산 구간 (초)
const BANDWIDTH_WINDOW: f64 = 1.0;

#[derive(Debug, Default)]
struct Endpoint {
    inbox: VecDeque<Bytes>,
    connected: bool,
    connect_failed: bool,
    rtt: f64,
    sent_packets: u32,
    started_port: Option<u16>,
    /// update 로 누적된 시간
    clock: f64,
    /// (전송 시각, 바이트) 최근 구간만 유지
    recent: VecDeque<(f64, usize)>,
}

impl Endpoint {
    /// 최근 구간 동안 보낸 양 (kbps)
    fn bandwidth(&self) -> f64 {
        let bytes: usize = self.recent.iter().map(|&(_, len)| len).sum();
        bytes as f64 / BANDWIDTH_WINDOW * 8.0 / 1000.0
    }
}

/// 메모리 연결 한쪽 끝
#[derive(Debug)]
pub struct MemoryConnection {
    local: Rc<RefCell<Endpoint>>,
    remote: Rc<RefCell<Endpoint>>,
}

/// 연결 밖에서 상태를 조작하는 핸들
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    endpoint: Rc<RefCell<Endpoint>>,
}

impl MemoryConnection {
    /// 서로 연결된 두 끝 생성
    pub fn pair() -> (MemoryConnection, MemoryConnection) {
        let a = Rc::new(RefCell::new(Endpoint::default()));
        let b = Rc::new(RefCell::new(Endpoint::default()));
        (
            MemoryConnection {
                local: a.clone(),
                remote: b.clone(),
            },
            MemoryConnection { local: b, remote: a },
        )
    }

    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle {
            endpoint: self.local.clone(),
        }
    }
}

impl MemoryHandle {
    /// 보고할 RTT 설정 (밀리초)
    pub fn set_rtt_ms(&self, rtt_ms: f64) {
        self.endpoint.borrow_mut().rtt = rtt_ms / 1000.0;
    }

    pub fn set_connected(&self, connected: bool) {
        self.endpoint.borrow_mut().connected = connected;
    }

    pub fn set_connect_failed(&self, failed: bool) {
        self.endpoint.borrow_mut().connect_failed = failed;
    }

    /// 아직 읽지 않은 수신 패킷 수
    pub fn pending(&self) -> usize {
        self.endpoint.borrow().inbox.len()
    }

    /// 수신 대기열을 통째로 꺼냄 (변조/재배열 용)
    pub fn take_inbound(&self) -> Vec<Bytes> {
        self.endpoint.borrow_mut().inbox.drain(..).collect()
    }

    /// 수신 대기열 끝에 패킷 추가
    pub fn push_inbound(&self, packet: Bytes) {
        self.endpoint.borrow_mut().inbox.push_back(packet);
    }

    pub fn sent_packets(&self) -> u32 {
        self.endpoint.borrow().sent_packets
    }

    pub fn started_port(&self) -> Option<u16> {
        self.endpoint.borrow().started_port
    }
}

impl Connection for MemoryConnection {
    fn start(&mut self, port: u16) -> Result<()> {
        self.local.borrow_mut().started_port = Some(port);
        Ok(())
    }

    fn connect(&mut self, _address: SocketAddr) {
        self.local.borrow_mut().connected = true;
    }

    fn listen(&mut self) {
        self.local.borrow_mut().connected = true;
    }

    fn is_connected(&self) -> bool {
        self.local.borrow().connected
    }

    fn connect_failed(&self) -> bool {
        self.local.borrow().connect_failed
    }

    fn send_packet(&mut self, payload: &[u8]) -> Result<()> {
        let mut local = self.local.borrow_mut();
        local.sent_packets += 1;
        let now = local.clock;
        local.recent.push_back((now, payload.len()));
        self.remote
            .borrow_mut()
            .inbox
            .push_back(Bytes::copy_from_slice(payload));
        Ok(())
    }

    fn receive_packet(&mut self, max_size: usize) -> Option<Bytes> {
        let mut local = self.local.borrow_mut();
        while let Some(packet) = local.inbox.pop_front() {
            if packet.len() <= max_size {
                return Some(packet);
            }
        }
        None
    }

    fn update(&mut self, delta_time: f64) {
        let mut local = self.local.borrow_mut();
        local.clock += delta_time;
        let cutoff = local.clock - BANDWIDTH_WINDOW;
        while local.recent.front().is_some_and(|&(sent, _)| sent <= cutoff) {
            local.recent.pop_front();
        }
    }

    fn stats(&self) -> ConnectionStats {
        let local = self.local.borrow();
        let bandwidth = local.bandwidth();
        ConnectionStats {
            round_trip_time: local.rtt,
            sent_packets: local.sent_packets,
            acked_packets: local.sent_packets,
            lost_packets: 0,
            sent_bandwidth: bandwidth,
            acked_bandwidth: bandwidth,
        }
    }
}
