//! 전송 메타데이터
//!
//! `<name>|<size>|<checksum>` 형식의 한 줄 텍스트 레코드.
//! 송신자가 첫 청크 전에 한 번 만들고, 수신자에서는 활성 전송 컨텍스트가 된다.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::{Error, Result};

/// 레코드 필드 구분자
pub const FIELD_DELIMITER: char = '|';

/// 이름을 제외한 레코드 최대 길이: 구분자 2 + u64 자릿수 20 + u32 자릿수 10
pub const MAX_RECORD_OVERHEAD: usize = 2 + 20 + 10;

/// 체크섬 계산용 읽기 버퍼 크기
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// 전송 메타데이터
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMetadata {
    /// 파일 이름 (경로 없음)
    pub name: String,

    /// 파일 크기 (바이트)
    pub size: u64,

    /// CRC-32
    pub checksum: u32,
}

impl TransferMetadata {
    /// 검증된 메타데이터 생성
    pub fn new(name: impl Into<String>, size: u64, checksum: u32, max_name_len: usize) -> Result<Self> {
        let name = name.into();
        validate_name(&name, max_name_len)?;
        Ok(Self { name, size, checksum })
    }

    /// 파일에서 이름, 크기, CRC-32 수집
    pub fn from_path(path: &Path, max_name_len: usize) -> Result<Self> {
        let mut file = File::open(path).map_err(|source| Error::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file_name_of(path)?, &mut file, max_name_len)
    }

    /// 리더 끝까지 읽어서 크기와 CRC-32 계산
    pub fn from_reader<R: Read>(name: String, reader: &mut R, max_name_len: usize) -> Result<Self> {
        validate_name(&name, max_name_len)?;
        let (size, checksum) = checksum_reader(reader)?;
        Ok(Self { name, size, checksum })
    }

    /// 텍스트 레코드로 직렬화
    pub fn to_record(&self) -> String {
        format!(
            "{}{d}{}{d}{}",
            self.name,
            self.size,
            self.checksum,
            d = FIELD_DELIMITER
        )
    }

    /// 텍스트 레코드 파싱
    pub fn parse(record: &[u8], max_name_len: usize) -> Result<Self> {
        if record.len() > max_name_len + MAX_RECORD_OVERHEAD {
            return Err(Error::MalformedFrame(format!(
                "metadata record too long: {} bytes",
                record.len()
            )));
        }

        let text = std::str::from_utf8(record)
            .map_err(|_| Error::MalformedFrame("metadata record is not UTF-8".into()))?;

        let mut fields = text.rsplitn(3, FIELD_DELIMITER);
        let checksum = fields.next();
        let size = fields.next();
        let name = fields.next();

        let (Some(name), Some(size), Some(checksum)) = (name, size, checksum) else {
            return Err(Error::MalformedFrame(format!(
                "metadata record needs 3 fields: {text:?}"
            )));
        };

        let size = parse_decimal::<u64>(size, "size")?;
        let checksum = parse_decimal::<u32>(checksum, "checksum")?;

        Self::new(name, size, checksum, max_name_len)
    }
}

impl fmt::Display for TransferMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes, crc {:08X})", self.name, self.size, self.checksum)
    }
}

/// 경로의 마지막 구성 요소를 파일 이름으로 사용
pub fn file_name_of(path: &Path) -> Result<String> {
    let invalid = || Error::InvalidFileName {
        name: path.display().to_string(),
    };
    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;
    // 다른 플랫폼 구분자도 잘라냄
    let name = name.rsplit('\\').next().ok_or_else(invalid)?;
    Ok(name.to_string())
}

/// 파일 이름 검증: 경로 구성 요소 하나, 구분자와 제어 문자 없음
pub fn validate_name(name: &str, max_name_len: usize) -> Result<()> {
    if name.len() > max_name_len {
        return Err(Error::NameTooLong {
            len: name.len(),
            max: max_name_len,
        });
    }

    let forbidden = |c: char| c == FIELD_DELIMITER || c == '/' || c == '\\' || c.is_control();
    if name.is_empty() || name == "." || name == ".." || name.contains(forbidden) {
        return Err(Error::InvalidFileName { name: name.to_string() });
    }

    Ok(())
}

/// 리더를 끝까지 읽어서 (크기, CRC-32) 반환
pub fn checksum_reader<R: Read>(reader: &mut R) -> io::Result<(u64, u32)> {
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut size = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok((size, hasher.finalize()))
}

fn parse_decimal<T: std::str::FromStr>(field: &str, what: &str) -> Result<T> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::MalformedFrame(format!("metadata {what} is not decimal: {field:?}")));
    }
    field
        .parse()
        .map_err(|_| Error::MalformedFrame(format!("metadata {what} out of range: {field:?}")))
}
