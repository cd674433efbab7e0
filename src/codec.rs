//! 프레임 코덱
//!
//! 메타데이터, 데이터 청크, 종료 표식(sentinel), 하트비트가 같은 패킷 채널을 공유한다.
//!
//! - `Framing::Tagged`: `[tag u8][len u16 BE][payload]` 명시적 태그 + 길이
//! - `Framing::Untagged`: 기존 방식. 내용으로 종류를 추정한다.
//!   메타데이터 패턴 → sentinel 리터럴 → 데이터 순으로 판별하므로
//!   우연히 패턴과 일치하는 데이터 청크는 메타데이터로 오인된다.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::metadata::TransferMetadata;
use crate::{Config, Error, Result, SENTINEL};

/// 태그 프레임 헤더 길이: tag(1) + len(2)
pub const FRAME_HEADER_LEN: usize = 3;

const TAG_METADATA: u8 = 1;
const TAG_DATA: u8 = 2;
const TAG_SENTINEL: u8 = 3;
const TAG_HEARTBEAT: u8 = 4;

/// 채널 프레임 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// 태그 + 길이 접두사
    #[default]
    Tagged,
    /// 내용 기반 분류 (기존 피어 호환)
    Untagged,
}

/// 채널 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// 전송 메타데이터 (한 프레임에 모두 들어감)
    Metadata(TransferMetadata),

    /// 데이터 청크 (순번 없음, 도착 순서가 곧 순서)
    Data(Bytes),

    /// 전송 종료 표식
    Sentinel,

    /// 전송할 프레임이 없을 때 보내는 keep-alive
    Heartbeat,
}

impl Frame {
    /// 로그용 이름
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Metadata(_) => "metadata",
            Frame::Data(_) => "data",
            Frame::Sentinel => "sentinel",
            Frame::Heartbeat => "heartbeat",
        }
    }
}

/// 프레임 인코더/디코더
#[derive(Debug, Clone)]
pub struct FrameCodec {
    framing: Framing,
    max_chunk_size: usize,
    max_name_len: usize,
}

impl FrameCodec {
    pub fn new(framing: Framing, max_chunk_size: usize, max_name_len: usize) -> Self {
        Self {
            framing,
            max_chunk_size,
            max_name_len,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.framing, config.max_chunk_size, config.max_name_len)
    }

    /// 프레임을 패킷 페이로드로 직렬화
    pub fn encode(&self, frame: &Frame) -> Result<Bytes> {
        let (tag, payload): (u8, Bytes) = match frame {
            Frame::Metadata(meta) => {
                crate::metadata::validate_name(&meta.name, self.max_name_len)?;
                (TAG_METADATA, Bytes::from(meta.to_record()))
            }
            Frame::Data(data) => {
                self.check_chunk_len(data.len())?;
                (TAG_DATA, data.clone())
            }
            Frame::Sentinel => (TAG_SENTINEL, Bytes::from_static(SENTINEL)),
            Frame::Heartbeat => (TAG_HEARTBEAT, Bytes::new()),
        };

        match self.framing {
            Framing::Untagged => Ok(payload),
            Framing::Tagged => {
                let len = u16::try_from(payload.len()).map_err(|_| Error::ChunkTooLarge {
                    len: payload.len(),
                    max: u16::MAX as usize,
                })?;
                let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
                buf.put_u8(tag);
                buf.put_u16(len);
                buf.extend_from_slice(&payload);
                Ok(buf.freeze())
            }
        }
    }

    /// 패킷 페이로드를 프레임으로 역직렬화
    pub fn decode(&self, packet: &[u8]) -> Result<Frame> {
        match self.framing {
            Framing::Tagged => self.decode_tagged(packet),
            Framing::Untagged => self.classify_untagged(packet),
        }
    }

    fn decode_tagged(&self, packet: &[u8]) -> Result<Frame> {
        if packet.len() < FRAME_HEADER_LEN {
            return Err(Error::MalformedFrame(format!(
                "frame shorter than header: {} bytes",
                packet.len()
            )));
        }

        let mut header = &packet[..FRAME_HEADER_LEN];
        let tag = header.get_u8();
        let len = header.get_u16() as usize;
        let payload = &packet[FRAME_HEADER_LEN..];

        if payload.len() != len {
            return Err(Error::MalformedFrame(format!(
                "length prefix {len} does not match payload {} bytes",
                payload.len()
            )));
        }

        match tag {
            TAG_METADATA => Ok(Frame::Metadata(TransferMetadata::parse(payload, self.max_name_len)?)),
            TAG_DATA => {
                self.check_chunk_len(payload.len())?;
                Ok(Frame::Data(Bytes::copy_from_slice(payload)))
            }
            TAG_SENTINEL if payload == SENTINEL => Ok(Frame::Sentinel),
            TAG_SENTINEL => Err(Error::MalformedFrame("sentinel payload mismatch".into())),
            TAG_HEARTBEAT if payload.is_empty() => Ok(Frame::Heartbeat),
            TAG_HEARTBEAT => Err(Error::MalformedFrame("heartbeat carries a payload".into())),
            other => Err(Error::UnknownFrameTag(other)),
        }
    }

    /// 태그 없는 페이로드를 내용으로 분류 (순서가 중요)
    fn classify_untagged(&self, payload: &[u8]) -> Result<Frame> {
        if let Ok(meta) = TransferMetadata::parse(payload, self.max_name_len) {
            return Ok(Frame::Metadata(meta));
        }
        if payload == SENTINEL {
            return Ok(Frame::Sentinel);
        }
        if payload.is_empty() {
            return Ok(Frame::Heartbeat);
        }
        self.check_chunk_len(payload.len())?;
        Ok(Frame::Data(Bytes::copy_from_slice(payload)))
    }

    fn check_chunk_len(&self, len: usize) -> Result<()> {
        if len > self.max_chunk_size {
            return Err(Error::ChunkTooLarge {
                len,
                max: self.max_chunk_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DEFAULT_CHUNK_SIZE, MAX_NAME_LEN};

    fn tagged() -> FrameCodec {
        FrameCodec::new(Framing::Tagged, DEFAULT_CHUNK_SIZE, MAX_NAME_LEN)
    }

    fn untagged() -> FrameCodec {
        FrameCodec::new(Framing::Untagged, DEFAULT_CHUNK_SIZE, MAX_NAME_LEN)
    }

    fn meta() -> TransferMetadata {
        TransferMetadata::new("a.txt", 10, 0x1234_5678, MAX_NAME_LEN).unwrap()
    }

    #[test]
    fn metadata_round_trips_in_both_framings() {
        for codec in [tagged(), untagged()] {
            let frame = Frame::Metadata(meta());
            let bytes = codec.encode(&frame).unwrap();
            assert_eq!(codec.decode(&bytes).unwrap(), frame);
        }
    }

    #[test]
    fn tagged_layout() {
        let bytes = tagged().encode(&Frame::Data(Bytes::from_static(b"abc"))).unwrap();
        assert_eq!(&bytes[..], &[TAG_DATA, 0, 3, b'a', b'b', b'c']);

        let sentinel = tagged().encode(&Frame::Sentinel).unwrap();
        assert_eq!(sentinel[0], TAG_SENTINEL);
        assert_eq!(&sentinel[FRAME_HEADER_LEN..], SENTINEL);

        let heartbeat = tagged().encode(&Frame::Heartbeat).unwrap();
        assert_eq!(&heartbeat[..], &[TAG_HEARTBEAT, 0, 0]);
    }

    #[test]
    fn untagged_wire_format_is_plain_text() {
        let bytes = untagged().encode(&Frame::Metadata(meta())).unwrap();
        assert_eq!(&bytes[..], format!("a.txt|10|{}", 0x1234_5678u32).as_bytes());
        assert_eq!(&untagged().encode(&Frame::Sentinel).unwrap()[..], b"complete");
    }

    #[test]
    fn untagged_misclassifies_record_shaped_data() {
        let codec = untagged();

        let looks_like_meta = Frame::Data(Bytes::from_static(b"x|1|2"));
        let wire = codec.encode(&looks_like_meta).unwrap();
        assert!(matches!(codec.decode(&wire).unwrap(), Frame::Metadata(_)));

        let looks_like_end = Frame::Data(Bytes::from_static(b"complete"));
        let wire = codec.encode(&looks_like_end).unwrap();
        assert_eq!(codec.decode(&wire).unwrap(), Frame::Sentinel);
    }

    #[test]
    fn tagged_keeps_record_shaped_data_as_data() {
        let codec = tagged();
        for payload in [&b"x|1|2"[..], b"complete", b""] {
            let frame = Frame::Data(Bytes::copy_from_slice(payload));
            let wire = codec.encode(&frame).unwrap();
            assert_eq!(codec.decode(&wire).unwrap(), frame);
        }
    }

    #[test]
    fn rejects_oversized_chunks() {
        let big = Frame::Data(Bytes::from(vec![0u8; DEFAULT_CHUNK_SIZE + 1]));
        assert!(matches!(tagged().encode(&big), Err(Error::ChunkTooLarge { .. })));

        let raw = vec![7u8; DEFAULT_CHUNK_SIZE + 1];
        assert!(matches!(untagged().decode(&raw), Err(Error::ChunkTooLarge { .. })));
    }

    #[test]
    fn rejects_malformed_tagged_frames() {
        let codec = tagged();
        assert!(matches!(codec.decode(&[TAG_DATA]), Err(Error::MalformedFrame(_))));
        assert!(matches!(codec.decode(&[TAG_DATA, 0, 5, 1, 2]), Err(Error::MalformedFrame(_))));
        assert!(matches!(codec.decode(&[TAG_DATA, 0, 1, 1, 2]), Err(Error::MalformedFrame(_))));
        assert!(matches!(codec.decode(&[9, 0, 0]), Err(Error::UnknownFrameTag(9))));
        assert!(matches!(
            codec.decode(&[TAG_SENTINEL, 0, 3, b'e', b'n', b'd']),
            Err(Error::MalformedFrame(_))
        ));
        assert!(matches!(
            codec.decode(&[TAG_METADATA, 0, 3, b'a', b'|', b'1']),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn empty_untagged_payload_is_heartbeat() {
        assert_eq!(untagged().decode(&[]).unwrap(), Frame::Heartbeat);
        assert!(untagged().encode(&Frame::Heartbeat).unwrap().is_empty());
    }
}
