//! Binary layout of the result payload the MPC nodes POST to `/callback`.
//!
//! All integers are little-endian and fields are packed back to back:
//!
//! ```text
//! mempool_id u16 | comp_def_offset u32 | tx_sig [64] | data_sig [64] | pub_key [32] | data ..
//! ```
//!
//! For orderbook finalization `data` carries the encrypted snapshot as 32 chunks of 32 bytes.

pub const MEMPOOL_ID_LEN: usize = 2;
pub const COMP_DEF_OFFSET_LEN: usize = 4;
pub const SIGNATURE_LEN: usize = 64;
pub const PUBKEY_LEN: usize = 32;

/// Fixed header size in front of `data`.
pub const HEADER_LEN: usize =
    MEMPOOL_ID_LEN + COMP_DEF_OFFSET_LEN + SIGNATURE_LEN + SIGNATURE_LEN + PUBKEY_LEN;

pub const ORDERBOOK_CHUNK_LEN: usize = 32;
pub const ORDERBOOK_CHUNK_COUNT: usize = 32;
pub const ORDERBOOK_SNAPSHOT_LEN: usize = ORDERBOOK_CHUNK_LEN * ORDERBOOK_CHUNK_COUNT;

/// Encrypted orderbook snapshot, in the order the chunks appear in `data`.
pub type OrderbookChunks = [[u8; ORDERBOOK_CHUNK_LEN]; ORDERBOOK_CHUNK_COUNT];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload truncated: {len} bytes, need at least {HEADER_LEN}")]
    TruncatedPayload { len: usize },
    #[error("unexpected data length: expected {expected} bytes, got {actual}")]
    UnexpectedLength { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackPayload {
    pub mempool_id: u16,
    pub comp_def_offset: u32,
    /// Signature of the ledger transaction that queued the computation.
    pub tx_sig: [u8; SIGNATURE_LEN],
    /// Detached Ed25519 signature over `data`.
    pub data_sig: [u8; SIGNATURE_LEN],
    /// Key that produced `data_sig`.
    pub pub_key: [u8; PUBKEY_LEN],
    pub data: Vec<u8>,
}

/// Sequential reader over the packed header. Callers check the total length first.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn rest(self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

pub fn decode(bytes: &[u8]) -> Result<CallbackPayload, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::TruncatedPayload { len: bytes.len() });
    }
    let mut cur = Cursor::new(bytes);
    let mempool_id = u16::from_le_bytes(cur.take::<MEMPOOL_ID_LEN>());
    let comp_def_offset = u32::from_le_bytes(cur.take::<COMP_DEF_OFFSET_LEN>());
    let tx_sig = cur.take::<SIGNATURE_LEN>();
    let data_sig = cur.take::<SIGNATURE_LEN>();
    let pub_key = cur.take::<PUBKEY_LEN>();
    Ok(CallbackPayload {
        mempool_id,
        comp_def_offset,
        tx_sig,
        data_sig,
        pub_key,
        data: cur.rest().to_vec(),
    })
}

pub fn encode(p: &CallbackPayload) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + p.data.len());
    out.extend_from_slice(&p.mempool_id.to_le_bytes());
    out.extend_from_slice(&p.comp_def_offset.to_le_bytes());
    out.extend_from_slice(&p.tx_sig);
    out.extend_from_slice(&p.data_sig);
    out.extend_from_slice(&p.pub_key);
    out.extend_from_slice(&p.data);
    out
}

/// Split `data` into the 32 fixed-size ciphertext chunks of an orderbook snapshot.
pub fn decode_orderbook_chunks(data: &[u8]) -> Result<OrderbookChunks, DecodeError> {
    if data.len() != ORDERBOOK_SNAPSHOT_LEN {
        return Err(DecodeError::UnexpectedLength {
            expected: ORDERBOOK_SNAPSHOT_LEN,
            actual: data.len(),
        });
    }
    let mut chunks = [[0u8; ORDERBOOK_CHUNK_LEN]; ORDERBOOK_CHUNK_COUNT];
    for (dst, src) in chunks.iter_mut().zip(data.chunks_exact(ORDERBOOK_CHUNK_LEN)) {
        dst.copy_from_slice(src);
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(data: Vec<u8>) -> CallbackPayload {
        let mut tx_sig = [0u8; 64];
        tx_sig[0] = 0xaa;
        tx_sig[63] = 0xbb;
        CallbackPayload {
            mempool_id: 0x0102,
            comp_def_offset: 0x0a0b0c0d,
            tx_sig,
            data_sig: [0x11; 64],
            pub_key: [0x22; 32],
            data,
        }
    }

    #[test]
    fn header_is_166_bytes() {
        assert_eq!(HEADER_LEN, 166);
    }

    #[test]
    fn fields_land_at_fixed_offsets() {
        let bytes = encode(&sample(vec![9, 8, 7]));
        assert_eq!(bytes.len(), HEADER_LEN + 3);
        assert_eq!(&bytes[0..2], &[0x02, 0x01]);
        assert_eq!(&bytes[2..6], &[0x0d, 0x0c, 0x0b, 0x0a]);
        assert_eq!(bytes[6], 0xaa);
        assert_eq!(bytes[69], 0xbb);
        assert_eq!(&bytes[70..134], &[0x11; 64][..]);
        assert_eq!(&bytes[134..166], &[0x22; 32][..]);
        assert_eq!(&bytes[166..], &[9, 8, 7]);
    }

    #[test]
    fn decode_restores_header_and_data() {
        let p = sample((0..=255u8).collect());
        assert_eq!(decode(&encode(&p)).unwrap(), p);
    }

    #[test]
    fn header_only_payload_has_empty_data() {
        let p = decode(&encode(&sample(vec![]))).unwrap();
        assert!(p.data.is_empty());
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let err = decode(&[0u8; 100]).unwrap_err();
        assert_eq!(err, DecodeError::TruncatedPayload { len: 100 });

        let err = decode(&[0u8; HEADER_LEN - 1]).unwrap_err();
        assert_eq!(err, DecodeError::TruncatedPayload { len: HEADER_LEN - 1 });
    }

    #[test]
    fn chunks_need_exactly_1024_bytes() {
        for len in [0, 32, 1023, 1025, 2048] {
            let err = decode_orderbook_chunks(&vec![0u8; len]).unwrap_err();
            assert_eq!(
                err,
                DecodeError::UnexpectedLength {
                    expected: 1024,
                    actual: len
                }
            );
        }
    }

    #[test]
    fn chunks_preserve_order() {
        let data: Vec<u8> = (0..ORDERBOOK_SNAPSHOT_LEN).map(|i| (i / 32) as u8).collect();
        let chunks = decode_orderbook_chunks(&data).unwrap();
        for (i, c) in chunks.iter().enumerate() {
            assert!(c.iter().all(|b| *b == i as u8), "chunk {i}");
        }
        assert_eq!(chunks.concat(), data);
    }
}
