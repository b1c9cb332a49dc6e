//! Firmware upgrade: prepare, chunked transfer, result.
//!
//! The image is sent with its own big-endian CRC-32 appended. Every chunk
//! frame carries `module_id(1) + total_frames(2, BE) + frame_index(2, BE)`
//! ahead of the chunk bytes, and the next chunk is only sent once the
//! previous one has been answered.

use crate::command::{Board, opcode};
use crate::config::UpgradeOptions;
use crate::constants::{
    FIRMWARE_VERSION_TAG_LEN, MAX_PAYLOAD_SIZE, MOTOR_FIRMWARE_TAG, SIGNAL_FIRMWARE_TAG, TRANSFER_HEADER_SIZE,
};
use crate::crc::Crc32;
use crate::error::{LinkError, Result};
use crate::link::{BoardVersion, Link};
use bytes::{BufMut, Bytes, BytesMut};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// A firmware file as read from disk.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    pub data: Bytes,
    /// Board named by the embedded tag, if any
    pub board: Option<Board>,
    /// Full version tag, e.g. `DroSIG_1.2.3.4`
    pub version: Option<String>,
}

impl FirmwareImage {
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let tagged = [(SIGNAL_FIRMWARE_TAG, Board::Signal), (MOTOR_FIRMWARE_TAG, Board::Motor)]
            .into_iter()
            .find_map(|(tag, board)| find(&data, tag).map(|pos| (pos, board)));

        let (board, version) = match tagged {
            Some((pos, board)) => {
                let end = (pos + FIRMWARE_VERSION_TAG_LEN).min(data.len());
                let version = std::str::from_utf8(&data[pos..end]).ok().map(str::to_string);
                (Some(board), version)
            }
            None => (None, None),
        };
        Self { data, board, version }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read(path)?;
        Ok(Self::from_bytes(data))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// One FW_TRANSFER frame worth of data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u16,
    pub total: u16,
    pub data: Bytes,
}

/// Largest chunk that still fits one FW_TRANSFER frame.
pub const MAX_CHUNK_SIZE: usize = MAX_PAYLOAD_SIZE - TRANSFER_HEADER_SIZE;

/// Device refusals become upgrade failures. Link failures keep their type.
fn refusal(err: LinkError, context: impl FnOnce() -> String) -> LinkError {
    match err {
        LinkError::Rejected { .. } => LinkError::Upgrade(format!("{}: {}", context(), err)),
        other => other,
    }
}

/// The exact sequence of transfer frames for an image.
#[derive(Debug, Clone)]
pub struct TransferPlan {
    module_id: u8,
    image_crc: u32,
    chunks: Vec<Chunk>,
}

impl TransferPlan {
    pub fn new(image: &[u8], module_id: u8, chunk_size: usize, crc: &Crc32) -> Result<Self> {
        if image.is_empty() {
            return Err(LinkError::Validation("firmware image is empty".to_string()));
        }
        if chunk_size == 0 {
            return Err(LinkError::Validation("chunk size must be at least 1 byte".to_string()));
        }
        if chunk_size > MAX_CHUNK_SIZE {
            return Err(LinkError::Validation(format!(
                "chunk size {} exceeds the {} bytes a transfer frame can carry",
                chunk_size, MAX_CHUNK_SIZE
            )));
        }

        let image_crc = crc.checksum(image);
        let mut stream = BytesMut::with_capacity(image.len() + 4);
        stream.extend_from_slice(image);
        stream.put_u32(image_crc);
        let stream = stream.freeze();

        let count = stream.len().div_ceil(chunk_size);
        let total = u16::try_from(count).map_err(|_| {
            LinkError::Validation(format!(
                "{} chunks of {} bytes exceed the 65535 frame limit",
                count, chunk_size
            ))
        })?;

        let chunks = (0..total)
            .map(|index| {
                let start = index as usize * chunk_size;
                let end = (start + chunk_size).min(stream.len());
                Chunk {
                    index,
                    total,
                    data: stream.slice(start..end),
                }
            })
            .collect();

        Ok(Self {
            module_id,
            image_crc,
            chunks,
        })
    }

    pub fn image_crc(&self) -> u32 {
        self.image_crc
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn total(&self) -> usize {
        self.chunks.len()
    }

    /// FW_TRANSFER payload for one chunk.
    pub fn payload(&self, chunk: &Chunk) -> Bytes {
        let mut buf = BytesMut::with_capacity(TRANSFER_HEADER_SIZE + chunk.data.len());
        buf.put_u8(self.module_id);
        buf.put_u16(chunk.total);
        buf.put_u16(chunk.index);
        buf.extend_from_slice(&chunk.data);
        buf.freeze()
    }
}

impl Link {
    /// Flash `image` onto `board`, then reboot it and read back its version.
    ///
    /// `progress(sent, total)` is called after each answered chunk. Any
    /// failure aborts the whole upgrade.
    pub fn upgrade_firmware(
        &self,
        board: Board,
        image: &FirmwareImage,
        options: &UpgradeOptions,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<BoardVersion> {
        self.require(board)?;
        if let Some(tagged) = image.board.filter(|tagged| *tagged != board) {
            warn!("Image is tagged for the {} board, flashing {} board anyway", tagged, board);
        }
        let plan = TransferPlan::new(&image.data, options.module_id, options.chunk_size, &Crc32::new())?;
        info!(
            "Upgrading {} board: {} bytes in {} chunks, image crc {:#010x}",
            board,
            image.len(),
            plan.total(),
            plan.image_crc()
        );

        {
            let txn = self.begin();

            let prepare = Bytes::copy_from_slice(&[options.module_id, options.upgrade_type]);
            let resp = self
                .call_in(&txn, board.command(opcode::FW_PREPARE), prepare, options.prepare_timeout)
                .map_err(|e| refusal(e, || format!("{} board refused to prepare", board)))?;
            match resp.first() {
                Some(0) => info!("{} board is ready for upgrade", board),
                Some(status) => {
                    return Err(LinkError::Upgrade(format!(
                        "{} board not ready for upgrade (status {})",
                        board, status
                    )));
                }
                None => return Err(LinkError::Upgrade("empty prepare response".to_string())),
            }

            // the result may arrive as soon as the last chunk is acknowledged
            let result_cmd = board.command(opcode::FW_RESULT);
            self.table.clear(result_cmd);

            let transfer_cmd = board.command(opcode::FW_TRANSFER);
            for chunk in plan.chunks() {
                self.call_in(&txn, transfer_cmd, plan.payload(chunk), options.chunk_timeout)
                    .map_err(|e| refusal(e, || format!("chunk {}/{} refused", chunk.index as usize + 1, plan.total())))?;
                debug!("Sent chunk {}/{}", chunk.index as usize + 1, plan.total());
                progress(chunk.index as usize + 1, plan.total());
            }

            info!("All chunks sent, waiting for upgrade result");
            let resp = self
                .await_response(result_cmd, options.result_timeout)
                .map_err(|e| refusal(e, || "upgrade result".to_string()))?;
            match resp.first() {
                Some(0) => info!("{} board firmware written", board),
                other => {
                    return Err(LinkError::Upgrade(format!(
                        "device reported upgrade failure (result {:?})",
                        other
                    )));
                }
            }
        }

        if !self.reboot(board)? {
            return Err(LinkError::Upgrade(format!("{} board did not log in after reboot", board)));
        }
        let version = self.version(board)?;
        info!("{} board now runs {}", board, version.software_version);
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_board_from_tag() {
        let mut data = vec![0u8; 64];
        data[20..34].copy_from_slice(b"DroSIG_1.2.3.4");
        let image = FirmwareImage::from_bytes(data);
        assert_eq!(image.board, Some(Board::Signal));
        assert_eq!(image.version.as_deref(), Some("DroSIG_1.2.3.4"));

        let image = FirmwareImage::from_bytes(b"....DroDri_0.9.1.0....".to_vec());
        assert_eq!(image.board, Some(Board::Motor));
        assert_eq!(image.version.as_deref(), Some("DroDri_0.9.1.0"));
    }

    #[test]
    fn test_untagged_image() {
        let image = FirmwareImage::from_bytes(vec![0xAA; 100]);
        assert_eq!(image.board, None);
        assert_eq!(image.version, None);
    }

    #[test]
    fn test_tag_at_end_is_truncated() {
        let image = FirmwareImage::from_bytes(b"xxDroSIG_1".to_vec());
        assert_eq!(image.board, Some(Board::Signal));
        assert_eq!(image.version.as_deref(), Some("DroSIG_1"));
    }

    #[test]
    fn test_plan_appends_image_crc() {
        let crc = Crc32::new();
        let image = [1u8, 2, 3, 4];
        let plan = TransferPlan::new(&image, 0, 1024, &crc).unwrap();
        assert_eq!(plan.total(), 1);
        let chunk = &plan.chunks()[0];
        assert_eq!(&chunk.data[..4], &image);
        assert_eq!(&chunk.data[4..], &crc.checksum(&image).to_be_bytes());
    }

    #[test]
    fn test_chunk_payload_layout() {
        let plan = TransferPlan::new(&[0x55; 10], 0x02, 8, &Crc32::new()).unwrap();
        assert_eq!(plan.total(), 2);
        let payload = plan.payload(&plan.chunks()[1]);
        assert_eq!(&payload[..5], &[0x02, 0x00, 0x02, 0x00, 0x01]);
        assert_eq!(payload.len(), 5 + 6);
    }

    #[test]
    fn test_plan_rejects_bad_input() {
        let crc = Crc32::new();
        assert!(matches!(TransferPlan::new(&[1], 0, 0, &crc), Err(LinkError::Validation(_))));
        assert!(matches!(TransferPlan::new(&[], 0, 16, &crc), Err(LinkError::Validation(_))));
        // 65536 chunks of one byte
        let big = vec![0u8; 65_532];
        assert!(matches!(TransferPlan::new(&big, 0, 1, &crc), Err(LinkError::Validation(_))));
        assert_eq!(TransferPlan::new(&big[..65_531], 0, 1, &crc).unwrap().total(), 65_535);
    }

    #[test]
    fn test_plan_rejects_oversized_chunks() {
        let crc = Crc32::new();
        let image = vec![0u8; 70_000];
        assert!(TransferPlan::new(&image, 0, MAX_CHUNK_SIZE, &crc).is_ok());
        assert!(matches!(
            TransferPlan::new(&image, 0, MAX_CHUNK_SIZE + 1, &crc),
            Err(LinkError::Validation(_))
        ));
    }
}
