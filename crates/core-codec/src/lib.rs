//! Per-tile compression with adaptive direct/alpha-delta selection.

use core_fb::{Framebuffer, Tile};
use flate2::write::ZlibEncoder;
use flate2::read::ZlibDecoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Fixed margin the delta payload must beat the direct payload by before
/// delta is preferred.
const DELTA_MARGIN_BYTES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileMode {
    Direct,
    Delta,
}

/// Self-delimiting tile encoding: a mode byte followed by the compressed
/// payload, or a raw fallback with no mode byte (wire opcode alone tells the
/// remote how to interpret it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileEncoding {
    Compressed { mode: TileMode, payload: Vec<u8> },
    Raw(Vec<u8>),
}

/// Extract a tile's raw pixel bytes in wire byte order (blue, green, red,
/// padding -- the little-endian bytes of the packed XRGB32 value).
pub fn tile_raw_bytes(fb: &Framebuffer, tile: &Tile) -> Vec<u8> {
    let mut out = Vec::with_capacity((tile.width() * tile.height() * 4) as usize);
    for y in tile.y0..tile.y1 {
        for x in tile.x0..tile.x1 {
            out.extend_from_slice(&fb.get(x, y).to_le_bytes());
        }
    }
    out
}

fn compress(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(bytes).expect("in-memory writer");
    encoder.finish().expect("in-memory writer")
}

fn decompress(bytes: &[u8]) -> Vec<u8> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).expect("well-formed payload");
    out
}

fn xor_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

/// Encode one tile, choosing direct or alpha-delta, falling back to raw if
/// neither compressed form fits in `scratch_bound` bytes.
pub fn encode_tile(
    fb: &Framebuffer,
    previous: &Framebuffer,
    previous_valid: bool,
    tile: &Tile,
    scratch_bound: usize,
) -> TileEncoding {
    let raw = tile_raw_bytes(fb, tile);
    let direct_compressed = compress(&raw);

    let delta = if previous_valid {
        let prev_raw = tile_raw_bytes(previous, tile);
        let delta_bytes = xor_bytes(&raw, &prev_raw);
        let delta_compressed = compress(&delta_bytes);
        Some(delta_compressed)
    } else {
        None
    };

    let (mode, payload) = match delta {
        Some(delta_compressed)
            if delta_compressed.len() + DELTA_MARGIN_BYTES < direct_compressed.len() =>
        {
            (TileMode::Delta, delta_compressed)
        }
        _ => (TileMode::Direct, direct_compressed),
    };

    if payload.len() + 1 > scratch_bound {
        tracing::trace!(
            target: "codec",
            tx = tile.tx,
            ty = tile.ty,
            payload_len = payload.len(),
            scratch_bound,
            "raw_fallback"
        );
        return TileEncoding::Raw(raw);
    }

    let mut framed = Vec::with_capacity(payload.len() + 1);
    framed.push(match mode {
        TileMode::Direct => 0u8,
        TileMode::Delta => 1u8,
    });
    framed.extend_from_slice(&payload);
    TileEncoding::Compressed { mode, payload: framed }
}

/// Decode a tile payload produced by [`encode_tile`] back into raw pixel
/// bytes, given the previous tile's raw bytes (required for `Delta`).
pub fn decode_tile(encoding: &TileEncoding, previous_raw: Option<&[u8]>) -> Vec<u8> {
    match encoding {
        TileEncoding::Raw(bytes) => bytes.clone(),
        TileEncoding::Compressed { payload, .. } => {
            let mode_byte = payload[0];
            let compressed = &payload[1..];
            let decompressed = decompress(compressed);
            match mode_byte {
                0 => decompressed,
                1 => {
                    let prev = previous_raw.expect("delta decode requires previous tile bytes");
                    xor_bytes(&decompressed, prev)
                }
                other => panic!("unknown tile mode byte {other}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tile() -> Tile {
        Tile {
            tx: 0,
            ty: 0,
            x0: 0,
            y0: 0,
            x1: 16,
            y1: 16,
        }
    }

    #[test]
    fn delta_round_trips_against_previous() {
        let mut current = Framebuffer::new(16, 16);
        let mut previous = Framebuffer::new(16, 16);
        for y in 0..16 {
            for x in 0..16 {
                previous.set(x, y, 0x0010_2030);
                current.set(x, y, 0x0010_2031); // single bit differs almost everywhere
            }
        }
        let tile = sample_tile();
        let encoded = encode_tile(&current, &previous, true, &tile, 4096);
        let prev_raw = tile_raw_bytes(&previous, &tile);
        let decoded = decode_tile(&encoded, Some(&prev_raw));
        assert_eq!(decoded, tile_raw_bytes(&current, &tile));
    }

    #[test]
    fn direct_used_when_no_previous() {
        let current = Framebuffer::new(16, 16);
        let previous = Framebuffer::new(16, 16);
        let tile = sample_tile();
        let encoded = encode_tile(&current, &previous, false, &tile, 4096);
        match encoded {
            TileEncoding::Compressed { mode: TileMode::Direct, .. } => {}
            other => panic!("expected direct encoding, got {other:?}"),
        }
    }

    #[test]
    fn falls_back_to_raw_when_scratch_too_small() {
        let mut current = Framebuffer::new(16, 16);
        for y in 0..16 {
            for x in 0..16 {
                // high-entropy content defeats compression
                current.set(x, y, (x * 97 + y * 131).wrapping_mul(2654435761));
            }
        }
        let previous = Framebuffer::new(16, 16);
        let tile = sample_tile();
        let encoded = encode_tile(&current, &previous, false, &tile, 4);
        assert!(matches!(encoded, TileEncoding::Raw(_)));
    }

    #[test]
    fn edge_tile_smaller_than_16x16_encodes_correctly() {
        let current = Framebuffer::new(20, 20);
        let previous = Framebuffer::new(20, 20);
        let tile = Tile {
            tx: 1,
            ty: 1,
            x0: 16,
            y0: 16,
            x1: 20,
            y1: 20,
        };
        assert_eq!(tile.width(), 4);
        let encoded = encode_tile(&current, &previous, false, &tile, 4096);
        let decoded = decode_tile(&encoded, None);
        assert_eq!(decoded.len(), 4 * 4 * 4);
    }
}
