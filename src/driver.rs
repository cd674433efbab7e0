//! 고정 틱 드라이버
//!
//! 한 틱의 순서:
//! 1. 연결 중이면 RTT를 흐름 제어기에 입력
//! 2. 연결 → 끊김: 흐름 제어기 리셋
//! 3. 끊김 → 연결: 연결 표시
//! 4. 끊겼고 연결 시도가 실패했으면 종료
//! 5. 송신자: 파일을 한 번 열고, 권장 전송률 슬롯마다 프레임 송신 (없으면 하트비트)
//! 6. 수신 가능한 프레임을 모두 수신 파이프라인으로
//! 7. 연결 내부 시간 진행
//! 8. 연결 중이면 텔레메트리 주기 보고
//! 9. 다음 틱 경계까지 대기 (`run`)
//!
//! 모든 상태는 드라이버가 단독 소유하고 틱 안에서만 만진다.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::codec::{Frame, FrameCodec};
use crate::connection::Connection;
use crate::flow::FlowControl;
use crate::receiver::{FileReceiver, ReceiveEvent, TransferReport};
use crate::schedule::SendSchedule;
use crate::sender::FileSender;
use crate::stats::{TelemetryReport, TransferStats};
use crate::{Config, Error, Result};

/// 드라이버 역할
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// 파일 하나를 보내고 종료
    Sender {
        source: PathBuf,
        destination: SocketAddr,
    },

    /// 첫 송신자를 기다려 수신
    Receiver,
}

/// 루프 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// sentinel 송신 완료
    TransferSent,

    /// 전송 하나 수신 종료 (`exit_after_transfer`)
    TransferReceived,

    ConnectFailed,

    /// 외부 종료 요청
    Shutdown,
}

/// 한 틱의 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Continue,
    Stop(StopReason),
}

/// 외부 종료 요청 플래그 (틱 사이에서만 확인)
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 송신 측 상태
struct Outgoing {
    source: PathBuf,
    sender: Option<FileSender>,
}

/// 드라이버
pub struct Driver<C> {
    config: Config,
    conn: C,
    codec: FrameCodec,
    flow: FlowControl,
    schedule: SendSchedule,
    outgoing: Option<Outgoing>,
    receiver: FileReceiver,
    connected: bool,
    telemetry_accumulator: f64,
    last_report: Option<TelemetryReport>,
    last_transfer: Option<TransferReport>,
    stats: TransferStats,
    shutdown: ShutdownHandle,
}

impl<C: Connection> Driver<C> {
    /// 설정 검증, 연결 시작, 역할에 따라 connect/listen
    pub fn start(config: Config, role: Role, mut conn: C) -> Result<Self> {
        let config = config.validate()?;

        let outgoing = match role {
            Role::Sender { source, destination } => {
                conn.start(config.client_port)?;
                conn.connect(destination);
                Some(Outgoing { source, sender: None })
            }
            Role::Receiver => {
                conn.start(config.server_port)?;
                conn.listen();
                None
            }
        };

        info!(
            "driver started: {} ({:?} framing, chunk {} bytes)",
            if outgoing.is_some() { "sender" } else { "receiver" },
            config.framing,
            config.max_chunk_size
        );

        Ok(Self {
            codec: FrameCodec::from_config(&config),
            receiver: FileReceiver::from_config(&config),
            config,
            conn,
            flow: FlowControl::new(),
            schedule: SendSchedule::new(),
            outgoing,
            connected: false,
            telemetry_accumulator: 0.0,
            last_report: None,
            last_transfer: None,
            stats: TransferStats::new(),
            shutdown: ShutdownHandle::new(),
        })
    }

    /// 외부 종료 플래그 교체
    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn flow(&self) -> &FlowControl {
        &self.flow
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn receiver(&self) -> &FileReceiver {
        &self.receiver
    }

    /// 마지막 텔레메트리 보고
    pub fn last_report(&self) -> Option<&TelemetryReport> {
        self.last_report.as_ref()
    }

    /// 마지막으로 완료된 수신 전송
    pub fn last_transfer(&self) -> Option<&TransferReport> {
        self.last_transfer.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// 고정 간격으로 종료될 때까지 틱 실행
    pub async fn run(&mut self) -> Result<StopReason> {
        let mut interval = tokio::time::interval(Duration::from_secs_f64(self.config.delta_time));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if let TickStatus::Stop(reason) = self.tick()? {
                info!("driver stopped: {:?}", reason);
                return Ok(reason);
            }
        }
    }

    /// 한 틱 실행
    pub fn tick(&mut self) -> Result<TickStatus> {
        if self.shutdown.is_requested() {
            return Ok(TickStatus::Stop(StopReason::Shutdown));
        }

        let dt = self.config.delta_time;

        if self.conn.is_connected() {
            self.flow.update(dt, self.conn.stats().rtt_ms());
        }

        if self.connected && !self.conn.is_connected() {
            info!("disconnected");
            self.flow.reset();
            self.telemetry_accumulator = 0.0;
            self.connected = false;
        }

        if !self.connected && self.conn.is_connected() {
            info!("connected");
            self.connected = true;
        }

        if !self.connected && self.conn.connect_failed() {
            warn!("connection failed");
            return Ok(TickStatus::Stop(StopReason::ConnectFailed));
        }

        self.open_source()?;
        self.send_slots(dt)?;

        let mut stop = None;
        while let Some(packet) = self.conn.receive_packet(self.config.max_frame_len()) {
            if let Some(reason) = self.handle_packet(&packet)? {
                stop = Some(reason);
            }
        }

        self.conn.update(dt);
        self.report_telemetry(dt);

        if self.transfer_sent() {
            return Ok(TickStatus::Stop(StopReason::TransferSent));
        }
        Ok(stop.map_or(TickStatus::Continue, TickStatus::Stop))
    }

    /// 송신자 파일을 한 번만 연다 (프레임 송신 전 FileNotFound)
    fn open_source(&mut self) -> Result<()> {
        let Some(outgoing) = self.outgoing.as_mut() else {
            return Ok(());
        };
        if outgoing.sender.is_none() {
            outgoing.sender = Some(FileSender::open(
                &outgoing.source,
                self.config.max_chunk_size,
                self.config.max_name_len,
            )?);
        }
        Ok(())
    }

    fn transfer_sent(&self) -> bool {
        self.outgoing
            .as_ref()
            .and_then(|o| o.sender.as_ref())
            .is_some_and(FileSender::is_finished)
    }

    fn next_transfer_frame(&mut self) -> Result<Option<Frame>> {
        match self.outgoing.as_mut().and_then(|o| o.sender.as_mut()) {
            Some(sender) => sender.next_frame(),
            None => Ok(None),
        }
    }

    /// 권장 전송률로 슬롯을 나눠 프레임 송신
    ///
    /// 슬롯당 최대 `frames_per_slot` 개의 전송 프레임, 없으면 하트비트 하나.
    fn send_slots(&mut self, dt: f64) -> Result<()> {
        self.schedule.advance(dt);
        let slots = self.schedule.drain_slots(self.flow.send_rate());

        for _ in 0..slots {
            if self.transfer_sent() {
                break;
            }

            let mut transfer_frames = 0;
            while self.connected && transfer_frames < self.config.frames_per_slot {
                let Some(frame) = self.next_transfer_frame()? else {
                    break;
                };
                self.send_frame(&frame)?;
                transfer_frames += 1;
            }

            if transfer_frames == 0 {
                self.send_frame(&Frame::Heartbeat)?;
            }
        }
        Ok(())
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let packet = self.codec.encode(frame)?;
        self.conn.send_packet(&packet)?;

        self.stats.frames_sent += 1;
        match frame {
            Frame::Data(data) => {
                self.stats.data_frames_sent += 1;
                self.stats.bytes_sent += data.len() as u64;
            }
            Frame::Heartbeat => self.stats.heartbeats_sent += 1,
            Frame::Metadata(_) | Frame::Sentinel => debug!("sent {} frame", frame.kind()),
        }
        Ok(())
    }

    /// 수신 프레임 처리. 프레임 단위 에러는 기록만 하고 계속
    fn handle_packet(&mut self, packet: &[u8]) -> Result<Option<StopReason>> {
        self.stats.frames_received += 1;

        match self.receiver.handle_packet(packet) {
            Ok(ReceiveEvent::Chunk { len, .. }) => {
                self.stats.bytes_received += len as u64;
                Ok(None)
            }
            Ok(ReceiveEvent::Completed(report)) => {
                self.stats.transfers_completed += 1;
                self.last_transfer = Some(report);
                Ok(self.transfer_finished())
            }
            Ok(ReceiveEvent::Started(_)) | Ok(ReceiveEvent::Heartbeat) => Ok(None),
            Err(e @ Error::IntegrityMismatch { .. }) => {
                warn!("{}", e);
                self.stats.integrity_failures += 1;
                Ok(self.transfer_finished())
            }
            Err(e) if e.is_recoverable() => {
                warn!("frame rejected: {}", e);
                self.stats.rejected_frames += 1;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn transfer_finished(&self) -> Option<StopReason> {
        self.config
            .exit_after_transfer
            .then_some(StopReason::TransferReceived)
    }

    fn report_telemetry(&mut self, dt: f64) {
        if !self.conn.is_connected() {
            return;
        }

        self.telemetry_accumulator += dt;
        while self.telemetry_accumulator >= self.config.telemetry_interval {
            self.telemetry_accumulator -= self.config.telemetry_interval;
            let report = TelemetryReport::from_stats(&self.conn.stats());
            report.emit();
            self.stats.reports += 1;
            self.last_report = Some(report);
        }
    }
}
