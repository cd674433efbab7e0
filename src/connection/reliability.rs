//! ack 기반 전달 계측
//!
//! 재전송은 하지 않는다. 시퀀스 번호, ack, ack 비트필드로
//! RTT와 송신/ack/손실 수, 대역폭만 추적한다.
//!
//! - ack: 가장 최근에 받은 원격 시퀀스
//! - ack_bits: ack 직전 32개 시퀀스의 수신 여부 (bit n = ack - 1 - n)

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// ack 비트필드가 덮는 시퀀스 수
const ACK_WINDOW: u32 = 32;

/// 중복 판정용 수신 기록 범위
const RECEIVED_WINDOW: u32 = ACK_WINDOW + 2;

/// 기본 최대 RTT (초): 이보다 오래 ack 없으면 손실
pub const DEFAULT_RTT_MAXIMUM: f64 = 1.0;

/// RTT 평활화 계수
const RTT_SMOOTHING: f64 = 0.1;

const EPSILON: f64 = 0.001;

/// 연결 헤더 (bincode 고정 길이 직렬화)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub protocol_id: u32,
    pub sequence: u32,
    pub ack: u32,
    pub ack_bits: u32,
}

/// 추적 중인 패킷
#[derive(Debug, Clone, Copy)]
struct PacketData {
    sequence: u32,
    /// 송신/수신 후 경과 시간 (초)
    time: f64,
    size: usize,
}

/// `s1` 이 `s2` 보다 최근인지 (래핑 고려)
pub fn sequence_more_recent(s1: u32, s2: u32) -> bool {
    const HALF: u32 = u32::MAX / 2;
    (s1 > s2 && s1 - s2 <= HALF) || (s2 > s1 && s2 - s1 > HALF)
}

/// `ack` 기준 `sequence` 의 비트 위치
fn bit_index_for_sequence(sequence: u32, ack: u32) -> u32 {
    ack.wrapping_sub(sequence).wrapping_sub(1)
}

/// 전달 계측기
#[derive(Debug, Clone)]
pub struct ReliabilitySystem {
    rtt_maximum: f64,
    local_sequence: u32,
    remote_sequence: u32,

    sent_packets: u32,
    recv_packets: u32,
    lost_packets: u32,
    acked_packets: u32,

    sent_bandwidth: f64,
    acked_bandwidth: f64,
    rtt: f64,

    sent_queue: VecDeque<PacketData>,
    pending_ack_queue: VecDeque<PacketData>,
    received_queue: VecDeque<PacketData>,
    acked_queue: VecDeque<PacketData>,

    /// 이번 틱에 ack 된 시퀀스
    acks: Vec<u32>,
}

impl Default for ReliabilitySystem {
    fn default() -> Self {
        Self::new(DEFAULT_RTT_MAXIMUM)
    }
}

impl ReliabilitySystem {
    pub fn new(rtt_maximum: f64) -> Self {
        Self {
            rtt_maximum,
            local_sequence: 0,
            remote_sequence: 0,
            sent_packets: 0,
            recv_packets: 0,
            lost_packets: 0,
            acked_packets: 0,
            sent_bandwidth: 0.0,
            acked_bandwidth: 0.0,
            rtt: 0.0,
            sent_queue: VecDeque::new(),
            pending_ack_queue: VecDeque::new(),
            received_queue: VecDeque::new(),
            acked_queue: VecDeque::new(),
            acks: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.rtt_maximum);
    }

    /// 다음 송신 패킷 헤더 생성
    pub fn header(&self, protocol_id: u32) -> PacketHeader {
        PacketHeader {
            protocol_id,
            sequence: self.local_sequence,
            ack: self.remote_sequence,
            ack_bits: self.generate_ack_bits(),
        }
    }

    /// 송신 기록
    pub fn packet_sent(&mut self, size: usize) {
        let packet = PacketData {
            sequence: self.local_sequence,
            time: 0.0,
            size,
        };
        self.sent_queue.push_back(packet);
        self.pending_ack_queue.push_back(packet);
        self.sent_packets = self.sent_packets.wrapping_add(1);
        self.local_sequence = self.local_sequence.wrapping_add(1);
    }

    /// 수신 기록
    pub fn packet_received(&mut self, sequence: u32, size: usize) {
        self.recv_packets = self.recv_packets.wrapping_add(1);
        if self.received_queue.iter().any(|p| p.sequence == sequence) {
            return;
        }
        self.received_queue.push_back(PacketData {
            sequence,
            time: 0.0,
            size,
        });
        if self.recv_packets == 1 || sequence_more_recent(sequence, self.remote_sequence) {
            self.remote_sequence = sequence;
        }
    }

    /// 수신 기록으로 ack 비트필드 생성
    pub fn generate_ack_bits(&self) -> u32 {
        let ack = self.remote_sequence;
        self.received_queue
            .iter()
            .filter(|p| p.sequence != ack && !sequence_more_recent(p.sequence, ack))
            .map(|p| bit_index_for_sequence(p.sequence, ack))
            .filter(|&index| index < ACK_WINDOW)
            .fold(0, |bits, index| bits | (1 << index))
    }

    /// 원격의 ack 처리
    pub fn process_ack(&mut self, ack: u32, ack_bits: u32) {
        let pending = std::mem::take(&mut self.pending_ack_queue);
        for packet in pending {
            let acked = if packet.sequence == ack {
                true
            } else if !sequence_more_recent(packet.sequence, ack) {
                let index = bit_index_for_sequence(packet.sequence, ack);
                index < ACK_WINDOW && (ack_bits >> index) & 1 == 1
            } else {
                false
            };

            if acked {
                self.rtt += (packet.time - self.rtt) * RTT_SMOOTHING;
                self.acked_queue.push_back(packet);
                self.acks.push(packet.sequence);
                self.acked_packets = self.acked_packets.wrapping_add(1);
            } else {
                self.pending_ack_queue.push_back(packet);
            }
        }
    }

    /// 시간 진행 (초)
    pub fn update(&mut self, delta_time: f64) {
        self.acks.clear();
        for queue in [
            &mut self.sent_queue,
            &mut self.pending_ack_queue,
            &mut self.received_queue,
            &mut self.acked_queue,
        ] {
            for packet in queue.iter_mut() {
                packet.time += delta_time;
            }
        }
        self.update_queues();
        self.update_stats();
    }

    fn update_queues(&mut self) {
        let rtt_maximum = self.rtt_maximum;

        while self
            .sent_queue
            .front()
            .is_some_and(|p| p.time > rtt_maximum + EPSILON)
        {
            self.sent_queue.pop_front();
        }

        let latest = self.remote_sequence;
        self.received_queue
            .retain(|p| latest.wrapping_sub(p.sequence) <= RECEIVED_WINDOW);

        while self
            .acked_queue
            .front()
            .is_some_and(|p| p.time > rtt_maximum * 2.0 - EPSILON)
        {
            self.acked_queue.pop_front();
        }

        while self
            .pending_ack_queue
            .front()
            .is_some_and(|p| p.time > rtt_maximum + EPSILON)
        {
            self.pending_ack_queue.pop_front();
            self.lost_packets = self.lost_packets.wrapping_add(1);
        }
    }

    fn update_stats(&mut self) {
        let rtt_maximum = self.rtt_maximum;
        let sent_bytes: usize = self.sent_queue.iter().map(|p| p.size).sum();
        let acked_bytes: usize = self
            .acked_queue
            .iter()
            .filter(|p| p.time >= rtt_maximum)
            .map(|p| p.size)
            .sum();

        let to_kbps = |bytes: usize| bytes as f64 / rtt_maximum * 8.0 / 1000.0;
        self.sent_bandwidth = to_kbps(sent_bytes);
        self.acked_bandwidth = to_kbps(acked_bytes);
    }

    pub fn local_sequence(&self) -> u32 {
        self.local_sequence
    }

    pub fn remote_sequence(&self) -> u32 {
        self.remote_sequence
    }

    /// 평활화된 RTT (초)
    pub fn round_trip_time(&self) -> f64 {
        self.rtt
    }

    pub fn sent_packets(&self) -> u32 {
        self.sent_packets
    }

    pub fn received_packets(&self) -> u32 {
        self.recv_packets
    }

    pub fn acked_packets(&self) -> u32 {
        self.acked_packets
    }

    pub fn lost_packets(&self) -> u32 {
        self.lost_packets
    }

    pub fn sent_bandwidth(&self) -> f64 {
        self.sent_bandwidth
    }

    pub fn acked_bandwidth(&self) -> f64 {
        self.acked_bandwidth
    }

    pub fn acks(&self) -> &[u32] {
        &self.acks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_ordering_wraps() {
        assert!(sequence_more_recent(1, 0));
        assert!(!sequence_more_recent(0, 1));
        assert!(sequence_more_recent(0, u32::MAX));
        assert!(!sequence_more_recent(u32::MAX, 0));
        assert!(!sequence_more_recent(5, 5));
    }

    #[test]
    fn bit_index_wraps() {
        assert_eq!(bit_index_for_sequence(99, 100), 0);
        assert_eq!(bit_index_for_sequence(68, 100), 31);
        assert_eq!(bit_index_for_sequence(u32::MAX, 0), 0);
        assert_eq!(bit_index_for_sequence(u32::MAX - 1, 1), 2);
    }

    #[test]
    fn ack_bits_cover_previous_sequences() {
        let mut system = ReliabilitySystem::default();
        for seq in [10, 8, 9, 5] {
            system.packet_received(seq, 100);
        }
        assert_eq!(system.remote_sequence(), 10);
        // 9 → bit 0, 8 → bit 1, 5 → bit 4
        assert_eq!(system.generate_ack_bits(), 0b10011);
    }

    #[test]
    fn duplicate_receive_is_ignored() {
        let mut system = ReliabilitySystem::default();
        system.packet_received(3, 10);
        system.packet_received(3, 10);
        assert_eq!(system.received_packets(), 2);
        assert_eq!(system.generate_ack_bits(), 0);
    }

    #[test]
    fn process_ack_marks_packets_and_updates_rtt() {
        let mut system = ReliabilitySystem::default();
        for _ in 0..4 {
            system.packet_sent(100);
        }
        system.update(0.1);

        // 3 을 ack, 2 와 0 은 비트로
        system.process_ack(3, 0b101);
        assert_eq!(system.acked_packets(), 3);
        let mut acks = system.acks().to_vec();
        acks.sort_unstable();
        assert_eq!(acks, vec![0, 2, 3]);
        assert!(system.round_trip_time() > 0.0);
        assert!(system.round_trip_time() < 0.1);
    }

    #[test]
    fn unacked_packets_become_lost_after_rtt_maximum() {
        let mut system = ReliabilitySystem::default();
        system.packet_sent(100);
        system.packet_sent(100);
        system.process_ack(1, 0);

        for _ in 0..12 {
            system.update(0.1);
        }
        assert_eq!(system.acked_packets(), 1);
        assert_eq!(system.lost_packets(), 1);
    }

    #[test]
    fn bandwidth_counts_recent_bytes() {
        let mut system = ReliabilitySystem::default();
        for _ in 0..10 {
            system.packet_sent(125);
        }
        system.update(0.01);
        // 1250 bytes / 1s = 10 kbps
        assert!((system.sent_bandwidth() - 10.0).abs() < 1e-9);

        for _ in 0..20 {
            system.update(0.1);
        }
        assert_eq!(system.sent_bandwidth(), 0.0);
    }

    #[test]
    fn header_carries_sequence_and_acks() {
        let mut system = ReliabilitySystem::default();
        system.packet_sent(1);
        system.packet_received(7, 1);
        system.packet_received(6, 1);
        let header = system.header(0xABCD);
        assert_eq!(header.protocol_id, 0xABCD);
        assert_eq!(header.sequence, 1);
        assert_eq!(header.sequence, system.local_sequence());
        assert_eq!(header.ack, 7);
        assert_eq!(header.ack_bits, 1);

        system.reset();
        assert_eq!(system.local_sequence(), 0);
        assert_eq!(system.remote_sequence(), 0);
    }
}
