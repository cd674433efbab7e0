//! 손실/변조 주입 래퍼
//!
//! 송신 패킷을 확률적으로 버리거나 한 바이트를 뒤집는다.
//! 버린 패킷은 내부 연결에 도달하지 않으므로 ack 통계에는 잡히지 않는다.

use std::net::SocketAddr;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{Connection, ConnectionStats};
use crate::{Error, Result};

pub struct LossyConnection<C> {
    inner: C,
    drop_rate: f64,
    corrupt_rate: f64,
    rng: StdRng,
    dropped: u64,
    corrupted: u64,
}

impl<C: Connection> LossyConnection<C> {
    /// `drop_rate`, `corrupt_rate` 는 0.0 ~ 1.0
    pub fn new(inner: C, drop_rate: f64, corrupt_rate: f64, seed: u64) -> Result<Self> {
        for (name, rate) in [("drop_rate", drop_rate), ("corrupt_rate", corrupt_rate)] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(Error::InvalidConfig(format!("{name} must be within 0.0..=1.0, got {rate}")));
            }
        }
        Ok(Self {
            inner,
            drop_rate,
            corrupt_rate,
            rng: StdRng::seed_from_u64(seed),
            dropped: 0,
            corrupted: 0,
        })
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn corrupted(&self) -> u64 {
        self.corrupted
    }
}

impl<C: Connection> Connection for LossyConnection<C> {
    fn start(&mut self, port: u16) -> Result<()> {
        self.inner.start(port)
    }

    fn connect(&mut self, address: SocketAddr) {
        self.inner.connect(address)
    }

    fn listen(&mut self) {
        self.inner.listen()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn connect_failed(&self) -> bool {
        self.inner.connect_failed()
    }

    fn send_packet(&mut self, payload: &[u8]) -> Result<()> {
        if self.drop_rate > 0.0 && self.rng.gen_bool(self.drop_rate) {
            self.dropped += 1;
            debug!("injected loss: {} bytes dropped", payload.len());
            return Ok(());
        }

        if !payload.is_empty() && self.corrupt_rate > 0.0 && self.rng.gen_bool(self.corrupt_rate) {
            let mut damaged = payload.to_vec();
            let index = self.rng.gen_range(0..damaged.len());
            damaged[index] ^= 0xFF;
            self.corrupted += 1;
            debug!("injected corruption at byte {}", index);
            return self.inner.send_packet(&damaged);
        }

        self.inner.send_packet(payload)
    }

    fn receive_packet(&mut self, max_size: usize) -> Option<Bytes> {
        self.inner.receive_packet(max_size)
    }

    fn update(&mut self, delta_time: f64) {
        self.inner.update(delta_time)
    }

    fn stats(&self) -> ConnectionStats {
        self.inner.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MemoryConnection;

    #[test]
    fn rejects_out_of_range_rates() {
        let (a, _b) = MemoryConnection::pair();
        assert!(matches!(LossyConnection::new(a, 1.5, 0.0, 1), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn zero_rates_pass_through() {
        let (a, mut b) = MemoryConnection::pair();
        let mut lossy = LossyConnection::new(a, 0.0, 0.0, 1).unwrap();
        for i in 0..100u8 {
            lossy.send_packet(&[i]).unwrap();
        }
        let received: Vec<u8> = std::iter::from_fn(|| b.receive_packet(8)).map(|p| p[0]).collect();
        assert_eq!(received, (0..100).collect::<Vec<u8>>());
        assert_eq!(lossy.dropped(), 0);
    }

    #[test]
    fn full_drop_rate_drops_everything() {
        let (a, mut b) = MemoryConnection::pair();
        let mut lossy = LossyConnection::new(a, 1.0, 0.0, 7).unwrap();
        for _ in 0..10 {
            lossy.send_packet(b"gone").unwrap();
        }
        assert!(b.receive_packet(8).is_none());
        assert_eq!(lossy.dropped(), 10);
        assert_eq!(lossy.inner().stats().sent_packets, 0);
        assert_eq!(lossy.stats().sent_packets, 0);
    }

    #[test]
    fn corruption_flips_one_byte() {
        let (a, mut b) = MemoryConnection::pair();
        let mut lossy = LossyConnection::new(a, 0.0, 1.0, 3).unwrap();
        lossy.send_packet(&[0u8; 16]).unwrap();
        let packet = b.receive_packet(16).unwrap();
        assert_eq!(packet.iter().filter(|&&b| b == 0xFF).count(), 1);
        assert_eq!(lossy.corrupted(), 1);
    }
}
