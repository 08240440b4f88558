use thiserror::Error;

// a PRS stream can never be smaller than this. "compressing" a zero-byte input still produces
// two control bits plus the two end marker bytes
pub const PRS_MIN_COMPRESSED_SIZE: usize = 3;

const MAX_LOOKBACK_DISTANCE: isize = 0x1ff0;
const SHORT_REFERENCE_MAX_LENGTH: usize = 5;
const INLINE_REFERENCE_MAX_LENGTH: usize = 9;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum PrsError {
    #[error("Malformed PRS data: {0}")]
    MalformedInput(String),

    #[error("PRS data ended unexpectedly at offset {0}")]
    Truncated(usize),

    #[error("PRS decompression would write past the expected output size of {0}")]
    SizeOverflow(usize),
}

/// Returns the amount of space worth allocating up front when compressing an input of the
/// given length.
pub fn prs_max_compressed_size(length: usize) -> usize {
    length + (length >> 3) + 1 + 2
}

// the compressed output begins with a reserved control byte, and every token is preceded by one
// or more control bits which get right-shifted into whatever control byte was most recently
// reserved. once a control byte has all eight of its bits, the byte at the current end of the
// output is reserved as the next one
struct Encoder {
    output: Vec<u8>,
    control_at: usize,
    bitpos: u8,
}

impl Encoder {
    fn new(capacity: usize) -> Encoder {
        let mut output = Vec::with_capacity(capacity);
        output.push(0);
        Encoder {
            output,
            control_at: 0,
            bitpos: 0,
        }
    }

    fn push_control_bit_deferred(&mut self, bit: bool) {
        self.output[self.control_at] >>= 1;
        self.output[self.control_at] |= (bit as u8) << 7;
        self.bitpos += 1;
    }

    fn reserve_next_control_byte(&mut self) {
        if self.bitpos >= 8 {
            self.bitpos = 0;
            self.control_at = self.output.len();
            self.output.push(0);
        }
    }

    fn push_control_bit(&mut self, bit: bool) {
        self.push_control_bit_deferred(bit);
        self.reserve_next_control_byte();
    }

    fn push_data(&mut self, byte: u8) {
        self.output.push(byte);
    }

    fn literal(&mut self, byte: u8) {
        self.push_control_bit_deferred(true);
        self.push_data(byte);
        self.reserve_next_control_byte();
    }

    fn short_reference(&mut self, offset: isize, length: usize) {
        let length = length - 2;
        self.push_control_bit(false);
        self.push_control_bit(false);
        self.push_control_bit((length >> 1) & 1 == 1);
        self.push_control_bit_deferred(length & 1 == 1);
        self.push_data((offset & 0xff) as u8);
        self.reserve_next_control_byte();
    }

    fn long_reference(&mut self, offset: isize, length: usize) {
        if length <= INLINE_REFERENCE_MAX_LENGTH {
            self.push_control_bit(false);
            self.push_control_bit_deferred(true);
            self.push_data((((offset << 3) & 0xf8) as u8) | (((length - 2) & 0x07) as u8));
            self.push_data(((offset >> 5) & 0xff) as u8);
            self.reserve_next_control_byte();
        } else {
            self.push_control_bit(false);
            self.push_control_bit_deferred(true);
            self.push_data(((offset << 3) & 0xf8) as u8);
            self.push_data(((offset >> 5) & 0xff) as u8);
            self.push_data((length - 1) as u8);
            self.reserve_next_control_byte();
        }
    }

    fn back_reference(&mut self, offset: isize, length: usize) {
        if offset > -0x100 && length <= SHORT_REFERENCE_MAX_LENGTH {
            self.short_reference(offset, length);
        } else {
            self.long_reference(offset, length);
        }
    }

    fn finish(mut self) -> Box<[u8]> {
        self.push_control_bit(false);
        self.push_control_bit(true);
        // any partially filled control byte needs its bits moved down into the low positions
        // that the decompressor will consume them from
        if self.bitpos != 0 {
            let partial = self.output[self.control_at] as u32;
            self.output[self.control_at] = ((partial << self.bitpos) >> 8) as u8;
        }
        self.push_data(0);
        self.push_data(0);
        self.output.into_boxed_slice()
    }
}

fn region_eq(data: &[u8], first: isize, second: isize, length: usize) -> bool {
    if first < 0 || second < 0 {
        return false;
    }
    let (first, second) = (first as usize, second as usize);
    if first + length > data.len() || second + length > data.len() {
        return false;
    }
    data[first..(first + length)] == data[second..(second + length)]
}

/// Compresses the given bytes, returning the PRS-compressed result. Any input (including an
/// empty one) has a valid compressed form.
pub fn prs_compress(source: &[u8]) -> Box<[u8]> {
    let mut encoder = Encoder::new(prs_max_compressed_size(source.len()));

    let mut x: isize = 0;
    while x < source.len() as isize {
        let mut best_offset: isize = 0;
        let mut best_length: usize = 0;
        let mut candidate: usize = 0;

        // greedy search, scanning backwards through the lookback window for the longest match
        let mut y: isize = x - 3;
        while y > 0 && y > (x - MAX_LOOKBACK_DISTANCE) && candidate < 255 {
            candidate = 3;
            if region_eq(source, y, x, candidate) {
                candidate += 1;
                while candidate < 256
                    && (y + candidate as isize) < x
                    && (x + candidate as isize) <= source.len() as isize
                    && region_eq(source, y, x, candidate)
                {
                    candidate += 1;
                }
                candidate -= 1;

                if candidate > best_length {
                    best_offset = y - x;
                    best_length = candidate;
                }
            }
            y -= 1;
        }

        if best_length == 0 {
            encoder.literal(source[x as usize]);
            x += 1;
        } else {
            encoder.back_reference(best_offset, best_length);
            x += best_length as isize;
        }
    }

    encoder.finish()
}

// the decompressor and the size-only walk share all of their state transitions. the only thing
// that differs between them is whether output bytes actually get materialized
trait PrsOutput {
    fn position(&self) -> usize;
    fn literal(&mut self, byte: u8) -> Result<(), PrsError>;
    fn back_reference(&mut self, displacement: i32, length: usize) -> Result<(), PrsError>;
}

struct MaterializedOutput {
    bytes: Vec<u8>,
    expected_size: usize,
}

impl PrsOutput for MaterializedOutput {
    fn position(&self) -> usize {
        self.bytes.len()
    }

    fn literal(&mut self, byte: u8) -> Result<(), PrsError> {
        if self.bytes.len() + 1 > self.expected_size {
            return Err(PrsError::SizeOverflow(self.expected_size));
        }
        self.bytes.push(byte);
        Ok(())
    }

    fn back_reference(&mut self, displacement: i32, length: usize) -> Result<(), PrsError> {
        if self.bytes.len() + length > self.expected_size {
            return Err(PrsError::SizeOverflow(self.expected_size));
        }
        // copying byte by byte is required. the referenced region is allowed to overlap with
        // what is being written (RLE-style runs depend on it)
        for _ in 0..length {
            let index = self.bytes.len() as i64 + displacement as i64;
            if index < 0 {
                return Err(PrsError::MalformedInput(String::from(
                    "back-reference reaches before the start of the output",
                )));
            }
            self.bytes.push(self.bytes[index as usize]);
        }
        Ok(())
    }
}

struct MeasuredOutput {
    length: usize,
}

impl PrsOutput for MeasuredOutput {
    fn position(&self) -> usize {
        self.length
    }

    fn literal(&mut self, _byte: u8) -> Result<(), PrsError> {
        self.length += 1;
        Ok(())
    }

    fn back_reference(&mut self, displacement: i32, length: usize) -> Result<(), PrsError> {
        if (self.length as i64 + displacement as i64) < 0 {
            return Err(PrsError::MalformedInput(String::from(
                "back-reference reaches before the start of the output",
            )));
        }
        self.length += length;
        Ok(())
    }
}

struct SourceBytes<'a> {
    source: &'a [u8],
    offset: usize,
}

impl<'a> SourceBytes<'a> {
    fn next(&mut self) -> Result<u8, PrsError> {
        if self.offset >= self.source.len() {
            Err(PrsError::Truncated(self.offset))
        } else {
            let byte = self.source[self.offset];
            self.offset += 1;
            Ok(byte)
        }
    }
}

fn next_control_bit(
    reader: &mut SourceBytes<'_>,
    current_byte: &mut u8,
    bitpos: &mut u32,
) -> Result<bool, PrsError> {
    *bitpos -= 1;
    if *bitpos == 0 {
        *current_byte = reader.next()?;
        *bitpos = 8;
    }
    let bit = (*current_byte & 1) == 1;
    *current_byte >>= 1;
    Ok(bit)
}

fn decode<T: PrsOutput>(source: &[u8], output: &mut T) -> Result<(), PrsError> {
    let mut reader = SourceBytes { source, offset: 0 };
    let mut current_byte = reader.next()?;
    // start at 9 so that the very first decrement leaves us consuming bits out of the byte
    // that was just read
    let mut bitpos: u32 = 9;

    loop {
        if next_control_bit(&mut reader, &mut current_byte, &mut bitpos)? {
            let byte = reader.next()?;
            output.literal(byte)?;
            continue;
        }

        let (displacement, length) =
            if next_control_bit(&mut reader, &mut current_byte, &mut bitpos)? {
                // long back-reference. two bytes hold a 13-bit displacement and a 3-bit
                // length, where a zero length means the real length follows in one more byte
                let low = reader.next()? as i32;
                let high = reader.next()? as i32;
                let combined = ((high & 0xff) << 8) | (low & 0xff);
                if combined == 0 {
                    // end marker
                    return Ok(());
                }
                let displacement = (combined >> 3) | -0x2000i32;
                let length = match low & 0x07 {
                    0 => (reader.next()? as usize) + 1,
                    n => (n as usize) + 2,
                };
                (displacement, length)
            } else {
                // short back-reference. two more control bits hold the length, then one byte
                // holds an 8-bit displacement
                let mut length: usize = 0;
                for _ in 0..2 {
                    let bit = next_control_bit(&mut reader, &mut current_byte, &mut bitpos)?;
                    length = (length << 1) | (bit as usize);
                }
                let displacement = (reader.next()? as i32) | -0x100i32;
                (displacement, length + 2)
            };

        output.back_reference(displacement, length)?;
    }
}

/// Walks the given PRS-compressed bytes without materializing any output, returning the size
/// that the decompressed data would be.
pub fn prs_decompress_size(source: &[u8]) -> Result<usize, PrsError> {
    if source.len() < PRS_MIN_COMPRESSED_SIZE {
        return Err(PrsError::MalformedInput(format!(
            "compressed data length {} is smaller than the minimum possible size {}",
            source.len(),
            PRS_MIN_COMPRESSED_SIZE
        )));
    }
    let mut output = MeasuredOutput { length: 0 };
    decode(source, &mut output)?;
    Ok(output.position())
}

/// Decompresses the given PRS-compressed bytes, returning the decompressed result.
pub fn prs_decompress(source: &[u8]) -> Result<Box<[u8]>, PrsError> {
    let expected_size = prs_decompress_size(source)?;
    let mut output = MaterializedOutput {
        bytes: Vec::with_capacity(expected_size),
        expected_size,
    };
    decode(source, &mut output)?;
    Ok(output.bytes.into_boxed_slice())
}
