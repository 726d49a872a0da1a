//! Plan 9 draw protocol wire encoding: opcodes, batching bound, and the
//! `Plan9Conn` capability boundary to the 9P transport.

use core_codec::TileEncoding;

/// Raw pixel tile opcode.
pub const OP_RAW_TILE: u8 = b'y';
/// Compressed pixel tile opcode.
pub const OP_COMPRESSED_TILE: u8 = b'Y';
/// Rectangle draw/copy opcode.
pub const OP_DRAW: u8 = b'd';
/// Flush marker, no operands.
pub const OP_FLUSH: u8 = b'v';

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("remote rejected draw command: {0}")]
    RemoteDraw(String),
    #[error("remote does not recognise window image id")]
    UnknownId,
    #[error("9P transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// Capability boundary to the outbound 9P draw channel: a single file
/// descriptor accepting batched writes and yielding one response per
/// pending write. Implemented over a real 9P mount in the binary crate;
/// tests substitute an in-memory fake.
pub trait Plan9Conn: Send {
    /// Maximum single I/O size the mount will accept.
    fn iounit(&self) -> u32;
    /// Negotiated 9P message size.
    fn msize(&self) -> u32;
    /// Write one batch of encoded commands.
    fn write_batch(&mut self, bytes: &[u8]) -> Result<(), WireError>;
    /// Block for one outstanding response.
    fn recv_response(&mut self) -> Result<(), WireError>;
}

/// `min(iounit, msize - 24) - 23`, the largest a single batch may be.
pub fn max_batch_len(iounit: u32, msize: u32) -> usize {
    let bound = iounit.min(msize.saturating_sub(24));
    bound.saturating_sub(23) as usize
}

fn push_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn tile_header_len() -> usize {
    1 + 4 + 4 * 4 // opcode + dst-id + (x1,y1,x2,y2)
}

fn encode_tile_header(out: &mut Vec<u8>, opcode: u8, dst_id: u32, x1: i32, y1: i32, x2: i32, y2: i32) {
    out.push(opcode);
    push_u32(out, dst_id);
    push_i32(out, x1);
    push_i32(out, y1);
    push_i32(out, x2);
    push_i32(out, y2);
}

/// Rectangle draw command: screen-id, dst-id, mask-id, dst-rect (4 values),
/// mask-point (2), src-point (2) -- eleven 32-bit little-endian values total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCommand {
    pub screen_id: u32,
    pub dst_id: u32,
    pub mask_id: u32,
    pub dst_rect: [i32; 4],
    pub mask_point: [i32; 2],
    pub src_point: [i32; 2],
}

fn draw_command_len() -> usize {
    1 + 11 * 4
}

fn encode_draw(out: &mut Vec<u8>, cmd: &DrawCommand) {
    out.push(OP_DRAW);
    push_u32(out, cmd.screen_id);
    push_u32(out, cmd.dst_id);
    push_u32(out, cmd.mask_id);
    for v in cmd.dst_rect {
        push_i32(out, v);
    }
    for v in cmd.mask_point {
        push_i32(out, v);
    }
    for v in cmd.src_point {
        push_i32(out, v);
    }
}

/// Accumulates encoded commands up to the negotiated batching bound,
/// reporting when a push would overflow so the caller can flush first.
pub struct WireBatcher {
    max_len: usize,
    buf: Vec<u8>,
}

impl WireBatcher {
    pub fn new(iounit: u32, msize: u32) -> Self {
        Self {
            max_len: max_batch_len(iounit, msize),
            buf: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn would_fit(&self, additional: usize) -> bool {
        self.buf.len() + additional <= self.max_len
    }

    /// Append one tile command (raw or compressed, per `encoding`'s variant)
    /// at `(x1,y1)..(x2,y2)` into `dst_id`. Returns `false` without mutating
    /// the buffer if it would exceed the batching bound -- flush first.
    pub fn push_tile(
        &mut self,
        dst_id: u32,
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        encoding: &TileEncoding,
    ) -> bool {
        let payload: &[u8] = match encoding {
            TileEncoding::Raw(bytes) => bytes,
            TileEncoding::Compressed { payload, .. } => payload,
        };
        let opcode = match encoding {
            TileEncoding::Raw(_) => OP_RAW_TILE,
            TileEncoding::Compressed { .. } => OP_COMPRESSED_TILE,
        };
        let len = tile_header_len() + payload.len();
        if !self.would_fit(len) {
            return false;
        }
        encode_tile_header(&mut self.buf, opcode, dst_id, x1, y1, x2, y2);
        self.buf.extend_from_slice(payload);
        true
    }

    /// Append a rectangle draw/copy command. Returns `false` if it would
    /// overflow the batch.
    pub fn push_draw(&mut self, cmd: &DrawCommand) -> bool {
        if !self.would_fit(draw_command_len()) {
            return false;
        }
        encode_draw(&mut self.buf, cmd);
        true
    }

    /// Append the trailing flush marker unconditionally -- callers only
    /// call this once they know the batch has room (the flush is tiny and
    /// always emitted last regardless of the bound check elsewhere).
    pub fn push_flush(&mut self) {
        self.buf.push(OP_FLUSH);
    }

    /// Drain and return the accumulated bytes, resetting the batch to empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_codec::TileMode;

    #[test]
    fn max_batch_len_applies_both_bounds() {
        assert_eq!(max_batch_len(8192, 8192 + 24), 8192 - 23);
        assert_eq!(max_batch_len(100_000, 1024), 1024 - 24 - 23);
    }

    #[test]
    fn push_tile_raw_has_correct_opcode_and_length() {
        let mut batcher = WireBatcher::new(65536, 65536 + 24);
        let encoding = TileEncoding::Raw(vec![0u8; 16 * 16 * 4]);
        assert!(batcher.push_tile(1, 0, 0, 16, 16, &encoding));
        let bytes = batcher.take();
        assert_eq!(bytes[0], OP_RAW_TILE);
        assert_eq!(bytes.len(), tile_header_len() + 16 * 16 * 4);
    }

    #[test]
    fn push_tile_compressed_has_correct_opcode() {
        let mut batcher = WireBatcher::new(65536, 65536 + 24);
        let encoding = TileEncoding::Compressed {
            mode: TileMode::Direct,
            payload: vec![0u8, 1, 2, 3],
        };
        assert!(batcher.push_tile(1, 0, 0, 16, 16, &encoding));
        let bytes = batcher.take();
        assert_eq!(bytes[0], OP_COMPRESSED_TILE);
    }

    #[test]
    fn push_tile_rejects_when_batch_would_overflow() {
        let mut batcher = WireBatcher::new(64, 64 + 24);
        let encoding = TileEncoding::Raw(vec![0u8; 16 * 16 * 4]);
        assert!(!batcher.push_tile(1, 0, 0, 16, 16, &encoding));
        assert!(batcher.is_empty());
    }

    #[test]
    fn push_draw_encodes_eleven_values() {
        let mut batcher = WireBatcher::new(65536, 65536 + 24);
        let cmd = DrawCommand {
            screen_id: 1,
            dst_id: 2,
            mask_id: 0,
            dst_rect: [0, 0, 640, 480],
            mask_point: [0, 0],
            src_point: [0, 0],
        };
        assert!(batcher.push_draw(&cmd));
        let bytes = batcher.take();
        assert_eq!(bytes[0], OP_DRAW);
        assert_eq!(bytes.len(), draw_command_len());
    }

    #[test]
    fn flush_is_a_single_byte() {
        let mut batcher = WireBatcher::new(65536, 65536 + 24);
        batcher.push_flush();
        assert_eq!(batcher.take(), vec![OP_FLUSH]);
    }
}
