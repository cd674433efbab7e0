//! 송신 파이프라인
//!
//! - 메타데이터 프레임 1개
//! - 최대 청크 크기 이하의 데이터 프레임들 (파일 순서대로, 빈틈/겹침 없음)
//! - sentinel 프레임 1개
//!
//! ack 대기나 재전송은 없다.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, info};

use crate::codec::{Frame, FrameCodec};
use crate::connection::Connection;
use crate::metadata::{file_name_of, TransferMetadata};
use crate::{Error, Result};

/// 송신 진행 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Metadata,
    Data,
    Done,
}

/// 파일 송신자
pub struct FileSender {
    path: PathBuf,
    metadata: TransferMetadata,
    reader: BufReader<File>,
    max_chunk_size: usize,
    stage: Stage,
    bytes_sent: u64,
    data_frames: u64,
}

impl FileSender {
    /// 파일을 열고 메타데이터 수집
    ///
    /// 열 수 없으면 `FileNotFound`, 읽는 중 실패하면 `Io`. 둘 다 프레임 송신 전에 발생한다.
    pub fn open(path: &Path, max_chunk_size: usize, max_name_len: usize) -> Result<Self> {
        let mut file = File::open(path).map_err(|source| Error::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;

        let metadata = TransferMetadata::from_reader(file_name_of(path)?, &mut file, max_name_len)?;
        file.rewind()?;

        info!("송신 준비: {}", metadata);

        Ok(Self {
            path: path.to_path_buf(),
            metadata,
            reader: BufReader::new(file),
            max_chunk_size: max_chunk_size.max(1),
            stage: Stage::Metadata,
            bytes_sent: 0,
            data_frames: 0,
        })
    }

    pub fn metadata(&self) -> &TransferMetadata {
        &self.metadata
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// sentinel 까지 모두 내보냈는지
    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Done
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn data_frames(&self) -> u64 {
        self.data_frames
    }

    /// 다음 프레임. 끝나면 None
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.stage {
            Stage::Metadata => {
                self.stage = Stage::Data;
                Ok(Some(Frame::Metadata(self.metadata.clone())))
            }
            Stage::Data => match self.read_chunk()? {
                Some(chunk) => {
                    self.bytes_sent += chunk.len() as u64;
                    self.data_frames += 1;
                    Ok(Some(Frame::Data(chunk)))
                }
                None => {
                    self.stage = Stage::Done;
                    Ok(Some(Frame::Sentinel))
                }
            },
            Stage::Done => Ok(None),
        }
    }

    /// 선언된 크기를 넘지 않는 범위에서 청크 하나 읽기
    fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        let remaining = self.metadata.size - self.bytes_sent;
        if remaining == 0 {
            return Ok(None);
        }

        let limit = remaining.min(self.max_chunk_size as u64);
        let mut buf = Vec::with_capacity(limit as usize);
        (&mut self.reader).take(limit).read_to_end(&mut buf)?;

        if buf.is_empty() {
            // 수집 이후 파일이 줄어듦: 남은 분량은 무결성 검사에서 드러난다
            debug!("source shrank at offset {}", self.bytes_sent);
            return Ok(None);
        }

        Ok(Some(Bytes::from(buf)))
    }

    /// 모든 프레임을 즉시 송신 (속도 제어 없음). 보낸 프레임 수 반환
    pub fn send_all<C: Connection>(&mut self, conn: &mut C, codec: &FrameCodec) -> Result<usize> {
        let mut sent = 0;
        while let Some(frame) = self.next_frame()? {
            conn.send_packet(&codec.encode(&frame)?)?;
            sent += 1;
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::codec::Framing;
    use crate::connection::MemoryConnection;
    use crate::{DEFAULT_CHUNK_SIZE, MAX_NAME_LEN};

    fn write_temp(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(data).unwrap();
        path
    }

    fn collect(sender: &mut FileSender) -> Vec<Frame> {
        std::iter::from_fn(|| sender.next_frame().unwrap()).collect()
    }

    #[test]
    fn emits_metadata_chunks_then_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        let path = write_temp(dir.path(), "data.bin", &data);

        let mut sender = FileSender::open(&path, DEFAULT_CHUNK_SIZE, MAX_NAME_LEN).unwrap();
        let frames = collect(&mut sender);

        assert_eq!(frames.len(), 1 + 3 + 1);
        assert_eq!(
            frames[0],
            Frame::Metadata(TransferMetadata {
                name: "data.bin".into(),
                size: 600,
                checksum: crc32fast::hash(&data),
            })
        );

        let mut joined = Vec::new();
        for frame in &frames[1..4] {
            let Frame::Data(chunk) = frame else {
                panic!("expected data, got {}", frame.kind());
            };
            assert!(chunk.len() <= DEFAULT_CHUNK_SIZE);
            joined.extend_from_slice(chunk);
        }
        assert_eq!(joined, data);
        assert_eq!(frames[4], Frame::Sentinel);
        assert!(sender.is_finished());
        assert!(sender.next_frame().unwrap().is_none());
        assert_eq!(sender.bytes_sent(), 600);
        assert_eq!(sender.data_frames(), 3);
    }

    #[test]
    fn exact_multiple_of_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![9u8; DEFAULT_CHUNK_SIZE * 2];
        let path = write_temp(dir.path(), "even.bin", &data);

        let mut sender = FileSender::open(&path, DEFAULT_CHUNK_SIZE, MAX_NAME_LEN).unwrap();
        let frames = collect(&mut sender);
        assert_eq!(frames.len(), 4);
        assert!(matches!(&frames[2], Frame::Data(c) if c.len() == DEFAULT_CHUNK_SIZE));
        assert_eq!(frames[3], Frame::Sentinel);
    }

    #[test]
    fn empty_file_is_metadata_then_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(dir.path(), "empty.txt", b"");

        let mut sender = FileSender::open(&path, DEFAULT_CHUNK_SIZE, MAX_NAME_LEN).unwrap();
        let frames = collect(&mut sender);
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Frame::Metadata(m) if m.size == 0));
        assert_eq!(frames[1], Frame::Sentinel);
    }

    #[test]
    fn missing_file_fails_before_sending() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileSender::open(&dir.path().join("nope.bin"), DEFAULT_CHUNK_SIZE, MAX_NAME_LEN);
        assert!(matches!(result, Err(Error::FileNotFound { .. })));
    }

    #[test]
    fn overlong_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(dir.path(), &"n".repeat(40), b"x");
        let result = FileSender::open(&path, DEFAULT_CHUNK_SIZE, 16);
        assert!(matches!(result, Err(Error::NameTooLong { len: 40, max: 16 })));
    }

    #[test]
    fn send_all_pushes_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(dir.path(), "a.txt", b"0123456789");
        let codec = FrameCodec::new(Framing::Tagged, DEFAULT_CHUNK_SIZE, MAX_NAME_LEN);
        let (mut a, b) = MemoryConnection::pair();

        let mut sender = FileSender::open(&path, DEFAULT_CHUNK_SIZE, MAX_NAME_LEN).unwrap();
        assert_eq!(sender.send_all(&mut a, &codec).unwrap(), 3);
        assert_eq!(b.handle().pending(), 3);
    }
}
