//! WebSocket frame codec
//!
//! Encodes server frames and decodes client frames for the single-frame
//! text messages the relay exchanges. FIN bit and opcode are not inspected
//! on decode: control and continuation frames are treated as data.

use thiserror::Error;

/// First header byte for a final text frame (FIN + opcode 0x1)
pub const FINAL_TEXT_FRAME: u8 = 0x81;

/// Largest payload length that fits the 7-bit length field
pub const MAX_SHORT_LENGTH: usize = 125;

/// Length selector announcing a 16-bit extended length
const EXTENDED_16: u8 = 126;

/// Length selector announcing a 64-bit extended length
const EXTENDED_64: u8 = 127;

const MASK_BIT: u8 = 0x80;
const LENGTH_BITS: u8 = 0x7f;
const MASK_KEY_LEN: usize = 4;

// ============================================================================
// Error Types
// ============================================================================

/// Frame decoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame header truncated: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    #[error("frame incomplete: declared {declared} payload bytes, got {available}")]
    Incomplete { declared: u64, available: usize },
}

/// Result type for codec operations
pub type FrameResult<T> = Result<T, FrameError>;

// ============================================================================
// Encoding
// ============================================================================

/// Encode a payload as a final, unmasked text frame
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let len = payload.len();
    let mut frame = Vec::with_capacity(len + 10);
    frame.push(FINAL_TEXT_FRAME);

    if len <= MAX_SHORT_LENGTH {
        frame.push(len as u8);
    } else if len <= u16::MAX as usize {
        frame.push(EXTENDED_16);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(EXTENDED_64);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    frame.extend_from_slice(payload);
    frame
}

// ============================================================================
// Decoding
// ============================================================================

/// Layout of a frame header: where the mask key and payload begin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    declared: u64,
    mask_at: Option<usize>,
    payload_at: usize,
}

fn read_layout(frame: &[u8]) -> FrameResult<Layout> {
    require(frame, 2)?;

    let masked = frame[1] & MASK_BIT != 0;
    let selector = frame[1] & LENGTH_BITS;

    let (declared, length_end) = match selector {
        EXTENDED_16 => {
            require(frame, 4)?;
            (u16::from_be_bytes([frame[2], frame[3]]) as u64, 4)
        }
        EXTENDED_64 => {
            require(frame, 10)?;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&frame[2..10]);
            (u64::from_be_bytes(bytes), 10)
        }
        short => (short as u64, 2),
    };

    let (mask_at, payload_at) = if masked {
        (Some(length_end), length_end + MASK_KEY_LEN)
    } else {
        (None, length_end)
    };
    require(frame, payload_at)?;

    Ok(Layout {
        declared,
        mask_at,
        payload_at,
    })
}

fn require(frame: &[u8], needed: usize) -> FrameResult<()> {
    if frame.len() < needed {
        return Err(FrameError::Truncated {
            needed,
            available: frame.len(),
        });
    }
    Ok(())
}

/// Decode one frame into its payload bytes
///
/// Masked frames have the mask key at byte 2, 4 or 10 (for the short,
/// 16-bit and 64-bit length classes) and the payload right after it.
/// Every payload byte is XOR-ed with `mask[index % 4]`. Bytes beyond the
/// declared length are ignored.
pub fn decode(frame: &[u8]) -> FrameResult<Vec<u8>> {
    let layout = read_layout(frame)?;
    let available = frame.len() - layout.payload_at;

    if layout.declared > available as u64 {
        return Err(FrameError::Incomplete {
            declared: layout.declared,
            available,
        });
    }

    let end = layout.payload_at + layout.declared as usize;
    let payload = &frame[layout.payload_at..end];

    match layout.mask_at {
        Some(at) => {
            let mask = &frame[at..at + MASK_KEY_LEN];
            Ok(payload
                .iter()
                .enumerate()
                .map(|(i, byte)| byte ^ mask[i % MASK_KEY_LEN])
                .collect())
        }
        None => Ok(payload.to_vec()),
    }
}
