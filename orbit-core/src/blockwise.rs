use crate::coap::{BlockEvent, BlockOption};
use crate::error::{Error, Result};

/// Drives one Block2 (download) transfer: negotiates block size on the first
/// response and keeps the byte-offset cursor consistent afterward (spec §4.E).
pub struct BlockwiseDownload {
    requested_szx: u8,
    negotiated_szx: Option<u8>,
    next_index: u32,
}

impl BlockwiseDownload {
    pub fn new(requested_block_size: u16) -> Result<Self> {
        let szx = BlockOption::szx_for_size(requested_block_size).ok_or(Error::InvalidBlockSize)?;
        Ok(BlockwiseDownload {
            requested_szx: szx,
            negotiated_szx: None,
            next_index: 0,
        })
    }

    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    pub fn is_complete(&self, after: bool) -> bool {
        after
    }

    /// The Block2 option to attach to the next GET.
    pub fn next_block_option(&self) -> BlockOption {
        BlockOption {
            num: self.next_index,
            more: false,
            szx: self.negotiated_szx.unwrap_or(self.requested_szx),
        }
    }

    /// Processes the Block2 option (if any) echoed in a response, plus its payload.
    /// Returns the event to deliver to the caller and whether another GET is needed.
    pub fn on_response(
        &mut self,
        block_opt: Option<BlockOption>,
        payload: Vec<u8>,
    ) -> Result<(BlockEvent, bool)> {
        let block = match block_opt {
            // RFC 7959: a response with no Block2 option at all is a single-block
            // response, regardless of how large the caller's requested size was.
            None => {
                let size = payload.len() as u16;
                return Ok((
                    BlockEvent {
                        index: 0,
                        block_size: size,
                        data: payload,
                        is_last: true,
                    },
                    false,
                ));
            }
            Some(block) => block,
        };

        if self.negotiated_szx.is_none() {
            if block.szx < self.requested_szx {
                let old_szx = self.requested_szx;
                let new_szx = block.szx;
                self.negotiated_szx = Some(new_szx);
                self.next_index = (block.num + 1) * (1u32 << (old_szx - new_szx));
            } else {
                self.negotiated_szx = Some(block.szx);
                self.next_index = block.num + 1;
            }
        } else {
            self.next_index = block.num + 1;
        }

        let expected_size = block.block_size() as u16;
        if block.more && payload.len() != expected_size as usize {
            return Err(Error::InvalidBlockSize);
        }

        let is_last = !block.more;
        Ok((
            BlockEvent {
                index: block.num,
                block_size: expected_size,
                data: payload,
                is_last,
            },
            block.more,
        ))
    }
}

/// Drives one Block1 (upload) transfer: pulls chunks from the caller's write
/// callback and renegotiates block size the same way a download does if the
/// server asks for a smaller one.
pub struct BlockwiseUpload {
    requested_szx: u8,
    negotiated_szx: Option<u8>,
    next_index: u32,
}

impl BlockwiseUpload {
    pub fn new(requested_block_size: u16) -> Result<Self> {
        let szx = BlockOption::szx_for_size(requested_block_size).ok_or(Error::InvalidBlockSize)?;
        Ok(BlockwiseUpload {
            requested_szx: szx,
            negotiated_szx: None,
            next_index: 0,
        })
    }

    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    pub fn block_size(&self) -> usize {
        BlockOption {
            num: 0,
            more: false,
            szx: self.negotiated_szx.unwrap_or(self.requested_szx),
        }
        .block_size()
    }

    pub fn block_option(&self, num: u32, more: bool) -> BlockOption {
        BlockOption {
            num,
            more,
            szx: self.negotiated_szx.unwrap_or(self.requested_szx),
        }
    }

    /// Applies the server's echoed Block1 option (if any) after a POST. Returns the
    /// next block index to send.
    pub fn on_response(&mut self, sent: BlockOption, echoed: Option<BlockOption>) -> u32 {
        match echoed {
            Some(echoed) if self.negotiated_szx.is_none() && echoed.szx < sent.szx => {
                let old_szx = sent.szx;
                let new_szx = echoed.szx;
                self.negotiated_szx = Some(new_szx);
                self.next_index = (sent.num + 1) * (1u32 << (old_szx - new_szx));
            }
            _ => {
                self.negotiated_szx.get_or_insert(sent.szx);
                self.next_index = sent.num + 1;
            }
        }
        self.next_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_block_response_without_block2_option_is_last() {
        let mut download = BlockwiseDownload::new(1024).unwrap();
        let (event, more) = download.on_response(None, vec![1, 2, 3]).unwrap();
        assert!(event.is_last);
        assert!(!more);
    }

    #[test]
    fn server_smaller_szx_renegotiates_and_renumbers_cursor() {
        let mut download = BlockwiseDownload::new(1024).unwrap(); // szx 6
        let server_block = BlockOption {
            num: 0,
            more: true,
            szx: 4, // 256 bytes
        };
        let payload = vec![0u8; 256];
        let (event, more) = download.on_response(Some(server_block), payload).unwrap();
        assert!(more);
        assert_eq!(event.block_size, 256);
        // next_index = (0+1) * 2^(6-4) = 4
        assert_eq!(download.next_index(), 4);
    }

    #[test]
    fn concatenated_blocks_cover_every_byte_with_no_gap_or_overlap() {
        let mut download = BlockwiseDownload::new(1024).unwrap();
        let server_block = BlockOption {
            num: 0,
            more: true,
            szx: 4, // server drops to 256-byte blocks
        };
        let mut received: Vec<u8> = Vec::new();

        let (event, _) = download
            .on_response(Some(server_block), vec![1u8; 256])
            .unwrap();
        received.extend(event.data);
        assert_eq!(download.next_index(), 4);

        for expected_index in 4..8u32 {
            let block = BlockOption {
                num: expected_index,
                more: expected_index < 7,
                szx: 4,
            };
            let (event, _) = download.on_response(Some(block), vec![2u8; 256]).unwrap();
            received.extend(event.data);
        }

        assert_eq!(received.len(), 256 * 5);
    }

    #[test]
    fn intermediate_block_with_wrong_length_is_an_error() {
        let mut download = BlockwiseDownload::new(64).unwrap(); // szx 2
        let block = BlockOption {
            num: 0,
            more: true,
            szx: 2,
        };
        let err = download.on_response(Some(block), vec![0u8; 10]).unwrap_err();
        assert!(matches!(err, Error::InvalidBlockSize));
    }

    #[test]
    fn last_block_may_be_shorter_than_negotiated_size() {
        let mut download = BlockwiseDownload::new(64).unwrap();
        let block = BlockOption {
            num: 1,
            more: false,
            szx: 2,
        };
        let (event, more) = download.on_response(Some(block), vec![0u8; 10]).unwrap();
        assert!(event.is_last);
        assert!(!more);
    }

    #[test]
    fn upload_shrinks_and_rewinds_on_smaller_echoed_szx() {
        let mut upload = BlockwiseUpload::new(1024).unwrap();
        let sent = upload.block_option(0, true);
        let echoed = BlockOption {
            num: 0,
            more: true,
            szx: 4,
        };
        let next = upload.on_response(sent, Some(echoed));
        assert_eq!(next, 4);
        assert_eq!(upload.block_size(), 256);
    }

    #[test]
    fn upload_without_renegotiation_advances_by_one() {
        let mut upload = BlockwiseUpload::new(256).unwrap();
        let sent = upload.block_option(0, true);
        let next = upload.on_response(sent, Some(BlockOption { num: 0, more: true, szx: 4 }));
        assert_eq!(next, 1);
    }
}
