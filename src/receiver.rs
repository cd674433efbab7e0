//! 수신 파이프라인
//!
//! - 메타데이터: 활성 전송 컨텍스트 교체 (저장소에는 쓰지 않음)
//! - 데이터: 활성 컨텍스트의 파일에 도착 순서대로 추가
//! - sentinel: 크기와 CRC-32를 선언값과 비교하고 컨텍스트 종료
//!
//! 재정렬, 빈틈 검출, 중복 제거는 하지 않는다.
//! 손실이나 순서 뒤바뀜은 sentinel 시점의 `IntegrityMismatch` 로만 드러난다.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::codec::{Frame, FrameCodec};
use crate::metadata::TransferMetadata;
use crate::{Config, Error, Result};

/// 완료된 전송 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub metadata: TransferMetadata,
    pub path: PathBuf,
    pub bytes_written: u64,
    pub data_frames: u64,
}

/// 프레임 처리 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveEvent {
    /// 새 활성 컨텍스트
    Started(TransferMetadata),

    /// 데이터 추가됨
    Chunk { len: usize, received: u64 },

    /// 무결성 검사 통과
    Completed(TransferReport),

    Heartbeat,
}

/// 활성 전송 컨텍스트 (단일 슬롯)
struct ActiveTransfer {
    metadata: TransferMetadata,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    hasher: crc32fast::Hasher,
    received: u64,
    data_frames: u64,
}

impl ActiveTransfer {
    fn new(metadata: TransferMetadata, output_dir: &Path) -> Self {
        let path = output_dir.join(&metadata.name);
        Self {
            metadata,
            path,
            writer: None,
            hasher: crc32fast::Hasher::new(),
            received: 0,
            data_frames: 0,
        }
    }

    /// 첫 쓰기 시점에 파일 생성 (기존 파일은 덮어씀)
    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => {
                if let Some(parent) = self.path.parent() {
                    fs::create_dir_all(parent)?;
                }
                BufWriter::new(File::create(&self.path)?)
            }
        };
        Ok(self.writer.insert(writer))
    }

    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.writer()?.write_all(data)?;
        self.hasher.update(data);
        self.received += data.len() as u64;
        self.data_frames += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<TransferReport> {
        self.writer()?.flush()?;

        let actual_checksum = self.hasher.clone().finalize();
        if self.received != self.metadata.size || actual_checksum != self.metadata.checksum {
            return Err(Error::IntegrityMismatch {
                name: self.metadata.name,
                expected_size: self.metadata.size,
                actual_size: self.received,
                expected_checksum: self.metadata.checksum,
                actual_checksum,
            });
        }

        Ok(TransferReport {
            metadata: self.metadata,
            path: self.path,
            bytes_written: self.received,
            data_frames: self.data_frames,
        })
    }
}

/// 파일 수신자
pub struct FileReceiver {
    output_dir: PathBuf,
    codec: FrameCodec,
    active: Option<ActiveTransfer>,
    completed: u64,
    failed: u64,
}

impl FileReceiver {
    pub fn new(output_dir: impl Into<PathBuf>, codec: FrameCodec) -> Self {
        Self {
            output_dir: output_dir.into(),
            codec,
            active: None,
            completed: 0,
            failed: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.output_dir.clone(), FrameCodec::from_config(config))
    }

    /// 현재 활성 컨텍스트
    pub fn active(&self) -> Option<&TransferMetadata> {
        self.active.as_ref().map(|a| &a.metadata)
    }

    /// 활성 컨텍스트에 지금까지 받은 바이트
    pub fn received_bytes(&self) -> u64 {
        self.active.as_ref().map_or(0, |a| a.received)
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// 패킷 페이로드 하나 처리
    pub fn handle_packet(&mut self, packet: &[u8]) -> Result<ReceiveEvent> {
        let frame = self.codec.decode(packet)?;
        self.handle_frame(frame)
    }

    /// 프레임 하나 처리
    pub fn handle_frame(&mut self, frame: Frame) -> Result<ReceiveEvent> {
        match frame {
            Frame::Metadata(metadata) => self.on_metadata(metadata),
            Frame::Data(data) => self.on_data(&data),
            Frame::Sentinel => self.on_sentinel(),
            Frame::Heartbeat => Ok(ReceiveEvent::Heartbeat),
        }
    }

    fn on_metadata(&mut self, metadata: TransferMetadata) -> Result<ReceiveEvent> {
        // 이전 파일 flush 가 실패해도 새 컨텍스트는 활성 상태
        let next = ActiveTransfer::new(metadata.clone(), &self.output_dir);
        let previous = self.active.replace(next);
        if let Some(previous) = &previous {
            warn!(
                "전송 중단: {} ({}/{} bytes 수신 후 새 메타데이터 도착)",
                previous.metadata.name, previous.received, previous.metadata.size
            );
        }
        info!("수신 시작: {}", metadata);

        if let Some(mut writer) = previous.and_then(|p| p.writer) {
            writer.flush()?;
        }
        Ok(ReceiveEvent::Started(metadata))
    }

    fn on_data(&mut self, data: &[u8]) -> Result<ReceiveEvent> {
        let active = self.active.as_mut().ok_or(Error::NoActiveTransfer)?;
        active.append(data)?;
        debug!("청크 수신: {} bytes ({}/{})", data.len(), active.received, active.metadata.size);
        Ok(ReceiveEvent::Chunk {
            len: data.len(),
            received: active.received,
        })
    }

    fn on_sentinel(&mut self) -> Result<ReceiveEvent> {
        let active = self.active.take().ok_or(Error::NoActiveTransfer)?;
        match active.finish() {
            Ok(report) => {
                self.completed += 1;
                info!("수신 완료: {} -> {:?}", report.metadata, report.path);
                Ok(ReceiveEvent::Completed(report))
            }
            Err(e @ Error::IntegrityMismatch { .. }) => {
                self.failed += 1;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
