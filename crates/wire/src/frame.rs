//! Binary audio frames.
//!
//! Layout: `[direction: u8][sequence: u32 BE][payload: PCM16 LE ...]`.

/// Header length in bytes (direction tag + sequence).
pub const HEADER_LEN: usize = 5;

/// Input audio: 16 kHz mono PCM16.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Output audio: 24 kHz mono PCM16.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

pub const BYTES_PER_SAMPLE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    /// Client to server.
    Input = 0x01,
    /// Server to client.
    Output = 0x02,
}

impl Direction {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::Input),
            0x02 => Some(Self::Output),
            _ => None,
        }
    }

    pub fn sample_rate(self) -> u32 {
        match self {
            Self::Input => INPUT_SAMPLE_RATE,
            Self::Output => OUTPUT_SAMPLE_RATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short: {len} bytes, header needs {HEADER_LEN}")]
    TooShort { len: usize },
    #[error("unknown direction tag 0x{0:02x}")]
    UnknownDirection(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub direction: Direction,
    pub sequence: u32,
    pub payload: Vec<u8>,
}

impl AudioFrame {
    pub fn new(direction: Direction, sequence: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            direction,
            sequence,
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.push(self.direction.tag());
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::TooShort { len: bytes.len() });
        }
        let direction =
            Direction::from_tag(bytes[0]).ok_or(FrameError::UnknownDirection(bytes[0]))?;
        let sequence = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        Ok(Self {
            direction,
            sequence,
            payload: bytes[HEADER_LEN..].to_vec(),
        })
    }

    pub fn duration_ms(&self) -> u64 {
        pcm_duration_ms(self.payload.len(), self.direction.sample_rate())
    }
}

/// Playback duration of `byte_len` bytes of mono PCM16.
pub fn pcm_duration_ms(byte_len: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    let samples = (byte_len / BYTES_PER_SAMPLE) as u64;
    samples * 1000 / sample_rate as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let frame = AudioFrame::new(Direction::Output, 0x0102_0304, vec![0xaa, 0xbb]);
        assert_eq!(frame.encode(), vec![0x02, 0x01, 0x02, 0x03, 0x04, 0xaa, 0xbb]);
    }

    #[test]
    fn test_decode_input_frame() {
        let frame = AudioFrame::decode(&[0x01, 0, 0, 0, 7, 1, 2, 3, 4]).unwrap();
        assert_eq!(frame.direction, Direction::Input);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_header_only_frame_is_valid() {
        let frame = AudioFrame::decode(&[0x02, 0, 0, 0, 1]).unwrap();
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_short_frame_rejected() {
        assert_eq!(
            AudioFrame::decode(&[0x01, 0, 0, 1]),
            Err(FrameError::TooShort { len: 4 })
        );
        assert_eq!(AudioFrame::decode(&[]), Err(FrameError::TooShort { len: 0 }));
    }

    #[test]
    fn test_unknown_direction_rejected() {
        assert_eq!(
            AudioFrame::decode(&[0x07, 0, 0, 0, 1]),
            Err(FrameError::UnknownDirection(0x07))
        );
    }

    #[test]
    fn test_pcm_duration() {
        // 100ms at 16kHz = 1600 samples = 3200 bytes
        assert_eq!(pcm_duration_ms(3200, INPUT_SAMPLE_RATE), 100);
        // 100ms at 24kHz = 2400 samples = 4800 bytes
        assert_eq!(pcm_duration_ms(4800, OUTPUT_SAMPLE_RATE), 100);
        assert_eq!(pcm_duration_ms(4800, 0), 0);
    }
}
