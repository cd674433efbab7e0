//! 에러 타입 정의

use std::path::PathBuf;

use thiserror::Error;

/// SFT 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("파일을 열 수 없음: {path}: {source}")]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("포트 {port} 바인드 실패: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("연결이 시작되지 않음")]
    NotStarted,

    #[error("연결 실패")]
    ConnectFailed,

    #[error(
        "무결성 불일치: {name}: size expected {expected_size}, got {actual_size}; \
         crc expected {expected_checksum:08X}, got {actual_checksum:08X}"
    )]
    IntegrityMismatch {
        name: String,
        expected_size: u64,
        actual_size: u64,
        expected_checksum: u32,
        actual_checksum: u32,
    },

    #[error("활성 전송 없음: 메타데이터 이전의 프레임")]
    NoActiveTransfer,

    #[error("파일 이름이 너무 김: {len} bytes (최대 {max})")]
    NameTooLong { len: usize, max: usize },

    #[error("유효하지 않은 파일 이름: {name:?}")]
    InvalidFileName { name: String },

    #[error("청크가 너무 큼: {len} bytes (최대 {max})")]
    ChunkTooLarge { len: usize, max: usize },

    #[error("잘못된 프레임: {0}")]
    MalformedFrame(String),

    #[error("알 수 없는 프레임 태그: {0}")]
    UnknownFrameTag(u8),

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// 프레임 단위로 버리고 계속 진행할 수 있는 에러인지
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NoActiveTransfer
                | Error::IntegrityMismatch { .. }
                | Error::MalformedFrame(_)
                | Error::UnknownFrameTag(_)
                | Error::ChunkTooLarge { .. }
                | Error::NameTooLong { .. }
                | Error::InvalidFileName { .. }
        )
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
