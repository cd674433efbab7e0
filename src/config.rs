//! 프로토콜 설정
//!
//! 포트, 청크 크기, 타임아웃 등 모든 상수는 이 값 하나로 모아서
//! 드라이버 생성 시 전달한다.

use std::path::PathBuf;

use crate::codec::{Framing, FRAME_HEADER_LEN};
use crate::connection::MAX_PAYLOAD_SIZE;
use crate::metadata::MAX_RECORD_OVERHEAD;
use crate::{Error, Result};
use crate::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CLIENT_PORT, DEFAULT_PROTOCOL_ID, DEFAULT_SERVER_PORT,
    MAX_NAME_LEN,
};

/// 허용하는 파일 이름 길이 상한 (설정값 검증용)
const NAME_LEN_LIMIT: usize = 1024;

/// SFT 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 프로토콜 ID (패킷 식별용)
    pub protocol_id: u32,

    /// 수신자 포트
    pub server_port: u16,

    /// 송신자 포트
    pub client_port: u16,

    /// 틱 간격 (초)
    pub delta_time: f64,

    /// 연결 타임아웃 (초)
    pub timeout: f64,

    /// 데이터 청크 최대 크기 (바이트)
    pub max_chunk_size: usize,

    /// 파일 이름 최대 길이 (바이트)
    pub max_name_len: usize,

    /// 채널 프레임 형식
    pub framing: Framing,

    /// 전송 슬롯당 프레임 수
    pub frames_per_slot: usize,

    /// 텔레메트리 보고 주기 (초)
    pub telemetry_interval: f64,

    /// 수신 파일 저장 디렉터리
    pub output_dir: PathBuf,

    /// 수신자: 첫 전송이 끝나면 종료
    pub exit_after_transfer: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol_id: DEFAULT_PROTOCOL_ID,
            server_port: DEFAULT_SERVER_PORT,
            client_port: DEFAULT_CLIENT_PORT,
            delta_time: 1.0 / 30.0,
            timeout: 10.0,
            max_chunk_size: DEFAULT_CHUNK_SIZE,
            max_name_len: MAX_NAME_LEN,
            framing: Framing::Tagged,
            frames_per_slot: 1,
            telemetry_interval: 0.25,
            output_dir: PathBuf::from("."),
            exit_after_transfer: false,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 기존 구현과 호환되는 설정 (태그 없는 프레임)
    pub fn legacy() -> Self {
        Self {
            framing: Framing::Untagged,
            ..Self::default()
        }
    }

    /// LAN용 설정: 큰 청크, 슬롯당 여러 프레임
    pub fn lan() -> Self {
        Self {
            max_chunk_size: 1200,
            frames_per_slot: 4,
            timeout: 5.0,
            ..Self::default()
        }
    }

    /// 메타데이터 레코드 최대 길이
    pub fn max_metadata_len(&self) -> usize {
        self.max_name_len + MAX_RECORD_OVERHEAD
    }

    /// 한 프레임의 최대 길이 (수신 버퍼 크기)
    ///
    /// 메타데이터 레코드는 항상 한 프레임에 들어가야 한다.
    pub fn max_frame_len(&self) -> usize {
        FRAME_HEADER_LEN + self.max_chunk_size.max(self.max_metadata_len())
    }

    /// 설정 검증
    pub fn validate(self) -> Result<Self> {
        let durations = [
            ("delta_time", self.delta_time),
            ("timeout", self.timeout),
            ("telemetry_interval", self.telemetry_interval),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be a positive number of seconds, got {value}"
                )));
            }
        }

        if self.max_chunk_size == 0 {
            return Err(Error::InvalidConfig("max_chunk_size must be non-zero".into()));
        }
        if self.max_chunk_size > u16::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "max_chunk_size {} exceeds the frame length prefix",
                self.max_chunk_size
            )));
        }
        if self.max_name_len == 0 || self.max_name_len > NAME_LEN_LIMIT {
            return Err(Error::InvalidConfig(format!(
                "max_name_len must be within 1..={NAME_LEN_LIMIT}, got {}",
                self.max_name_len
            )));
        }
        if self.max_frame_len() > MAX_PAYLOAD_SIZE {
            return Err(Error::InvalidConfig(format!(
                "frame length {} exceeds the datagram payload limit {MAX_PAYLOAD_SIZE}",
                self.max_frame_len()
            )));
        }
        if self.frames_per_slot == 0 {
            return Err(Error::InvalidConfig("frames_per_slot must be non-zero".into()));
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_constants() {
        let config = Config::default();
        assert_eq!(config.server_port, 30000);
        assert_eq!(config.client_port, 30001);
        assert_eq!(config.protocol_id, 0x1122_3344);
        assert_eq!(config.max_chunk_size, 256);
        assert!((config.delta_time - 1.0 / 30.0).abs() < f64::EPSILON);
        assert!(config.clone().validate().is_ok());
    }

    #[test]
    fn metadata_always_fits_in_one_frame() {
        let config = Config::default();
        assert!(config.max_frame_len() >= FRAME_HEADER_LEN + config.max_metadata_len());
        assert!(config.max_frame_len() >= FRAME_HEADER_LEN + config.max_chunk_size);
    }

    #[test]
    fn rejects_bad_values() {
        let zero_chunk = Config {
            max_chunk_size: 0,
            ..Config::default()
        };
        assert!(matches!(zero_chunk.validate(), Err(Error::InvalidConfig(_))));

        let huge_chunk = Config {
            max_chunk_size: 70_000,
            ..Config::default()
        };
        assert!(matches!(huge_chunk.validate(), Err(Error::InvalidConfig(_))));

        let bad_tick = Config {
            delta_time: f64::NAN,
            ..Config::default()
        };
        assert!(matches!(bad_tick.validate(), Err(Error::InvalidConfig(_))));

        let no_burst = Config {
            frames_per_slot: 0,
            ..Config::default()
        };
        assert!(matches!(no_burst.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn presets_are_valid() {
        assert!(Config::lan().validate().is_ok());
        let legacy = Config::legacy().validate().unwrap();
        assert_eq!(legacy.framing, Framing::Untagged);
    }
}
