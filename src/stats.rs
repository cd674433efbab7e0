//! 전송 통계
//!
//! - `TelemetryReport`: 연결 통계 스냅샷 (주기 보고용)
//! - `TransferStats`: 한 번의 실행 동안의 프레임/전송 누계

use std::fmt;
use std::time::{Duration, Instant};

use tracing::info;

use crate::connection::ConnectionStats;

/// 주기 텔레메트리 보고
///
/// 필드 구성과 보고 주기는 모니터링 쪽과의 호환 계약이다.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryReport {
    pub rtt_ms: f64,
    pub sent: u32,
    pub acked: u32,
    pub lost: u32,
    pub loss_percent: f64,
    pub sent_kbps: f64,
    pub acked_kbps: f64,
}

impl TelemetryReport {
    pub fn from_stats(stats: &ConnectionStats) -> Self {
        Self {
            rtt_ms: stats.rtt_ms(),
            sent: stats.sent_packets,
            acked: stats.acked_packets,
            lost: stats.lost_packets,
            loss_percent: stats.loss_percent(),
            sent_kbps: stats.sent_bandwidth,
            acked_kbps: stats.acked_bandwidth,
        }
    }

    /// `sft::telemetry` 타깃으로 기록
    pub fn emit(&self) {
        info!(
            target: "sft::telemetry",
            rtt_ms = self.rtt_ms,
            sent = self.sent,
            acked = self.acked,
            lost = self.lost,
            loss_percent = self.loss_percent,
            sent_kbps = self.sent_kbps,
            acked_kbps = self.acked_kbps,
            "{}",
            self
        );
    }
}

impl fmt::Display for TelemetryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rtt {:.1}ms, sent {}, acked {}, lost {} ({:.1}%), sent bandwidth = {:.1}kbps, acked bandwidth = {:.1}kbps",
            self.rtt_ms, self.sent, self.acked, self.lost, self.loss_percent, self.sent_kbps, self.acked_kbps
        )
    }
}

/// 실행 누계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 송신한 프레임 수 (하트비트 포함)
    pub frames_sent: u64,

    /// 송신한 데이터 프레임 수
    pub data_frames_sent: u64,

    pub heartbeats_sent: u64,

    /// 송신한 데이터 바이트
    pub bytes_sent: u64,

    /// 수신한 프레임 수
    pub frames_received: u64,

    /// 수신한 데이터 바이트
    pub bytes_received: u64,

    /// 무결성 검사를 통과한 전송 수
    pub transfers_completed: u64,

    /// 무결성 불일치로 끝난 전송 수
    pub integrity_failures: u64,

    /// 버려진 프레임 수 (디코드 실패, 컨텍스트 없음)
    pub rejected_frames: u64,

    /// 보고된 텔레메트리 수
    pub reports: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frames_sent: 0,
            data_frames_sent: 0,
            heartbeats_sent: 0,
            bytes_sent: 0,
            frames_received: 0,
            bytes_received: 0,
            transfers_completed: 0,
            integrity_failures: 0,
            rejected_frames: 0,
            reports: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 데이터 처리율 (bytes/sec, 송신과 수신 중 큰 쪽)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_sent.max(self.bytes_received) as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Frames: {} sent ({} data, {} heartbeat), {} received | Bytes: {} sent, {} received | Throughput: {:.2} KB/s | Transfers: {} ok, {} failed | Rejected: {}",
            self.elapsed().as_secs_f64(),
            self.frames_sent,
            self.data_frames_sent,
            self.heartbeats_sent,
            self.frames_received,
            self.bytes_sent,
            self.bytes_received,
            self.throughput() / 1_000.0,
            self.transfers_completed,
            self.integrity_failures,
            self.rejected_frames,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}
