//! # SFT (Steady-rate File Transfer)
//!
//! ack 계측 UDP 연결 위의 단일 파일 전송
//!
//! ## 핵심 특징
//! - **RTT 흐름 제어**: Good/Bad 히스테리시스로 권장 전송률 결정
//! - **단일 채널 프레이밍**: 메타데이터, 데이터, sentinel 을 한 패킷 채널에 태그로 구분
//! - **종단 무결성 검사**: sentinel 시점에 크기와 CRC-32 비교
//! - **고정 틱 드라이버**: 단일 스레드, 1/30초 간격
//! - **재전송 없음**: 손실은 복구하지 않고 무결성 불일치로 보고

pub mod codec;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod flow;
pub mod metadata;
pub mod receiver;
pub mod schedule;
pub mod sender;
pub mod stats;

pub use codec::{Frame, FrameCodec, Framing};
pub use config::Config;
pub use connection::{Connection, ConnectionStats, LossyConnection, MemoryConnection, ReliableConnection};
pub use driver::{Driver, Role, ShutdownHandle, StopReason, TickStatus};
pub use error::{Error, Result};
pub use flow::{FlowControl, FlowMode};
pub use metadata::TransferMetadata;
pub use receiver::{FileReceiver, ReceiveEvent, TransferReport};
pub use schedule::SendSchedule;
pub use sender::FileSender;
pub use stats::{TelemetryReport, TransferStats};

/// 프로토콜 ID (패킷 식별용)
pub const DEFAULT_PROTOCOL_ID: u32 = 0x1122_3344;

/// 수신자 기본 포트
pub const DEFAULT_SERVER_PORT: u16 = 30000;

/// 송신자 기본 포트
pub const DEFAULT_CLIENT_PORT: u16 = 30001;

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// 파일 이름 최대 길이 (바이트)
pub const MAX_NAME_LEN: usize = 255;

/// 전송 종료 표식
pub const SENTINEL: &[u8] = b"complete";
