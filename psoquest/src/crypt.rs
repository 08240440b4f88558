use byte_slice_cast::AsMutSliceOf;
use thiserror::Error;

const PC_STREAM_LENGTH: usize = 57;

#[derive(Error, Debug, PartialEq)]
pub enum CryptError {
    #[error("Data to be crypted cannot be zero-length")]
    EmptyData,

    #[error("Error casting data slice to dwords")]
    DataCastingError(#[from] byte_slice_cast::Error),
}

pub trait Crypter {
    fn crypt(&mut self, data: &mut [u8]) -> Result<(), CryptError>;
}

/// The "PC" variant of the game's network stream cipher. Note that this variant is what
/// download quest data is encrypted with, even though the data is headed for a Gamecube.
pub struct PcCipher {
    stream: [u32; PC_STREAM_LENGTH],
    offset: usize,
}

impl PcCipher {
    pub fn new(seed: u32) -> PcCipher {
        let mut stream = [0u32; PC_STREAM_LENGTH];
        stream[56] = seed;
        stream[55] = seed;

        // subtractive lagged-fibonacci style seeding, filling the table in stride-21 order
        let mut previous: u32 = 1;
        let mut current: u32 = seed;
        let mut position: u32 = 0x15;
        while position <= 0x46e {
            let index = (position % 55) as usize;
            let next = current.wrapping_sub(previous);
            stream[index] = previous;
            current = previous;
            previous = next;
            position += 0x15;
        }

        let mut cipher = PcCipher {
            stream,
            offset: PC_STREAM_LENGTH - 1,
        };

        cipher.mix_stream();
        cipher.mix_stream();
        cipher.mix_stream();
        cipher.mix_stream();

        cipher
    }

    fn mix_stream(&mut self) {
        for i in 1..0x19 {
            self.stream[i] = self.stream[i].wrapping_sub(self.stream[i + 0x1f]);
        }
        for i in 0x19..0x38 {
            self.stream[i] = self.stream[i].wrapping_sub(self.stream[i - 0x18]);
        }
    }

    fn next_keystream_word(&mut self) -> u32 {
        // index 0 is never handed out. wrapping around the end of the table scrambles it
        // before the walk starts over
        if self.offset == PC_STREAM_LENGTH - 1 {
            self.mix_stream();
            self.offset = 1;
        }
        let word = self.stream[self.offset];
        self.offset += 1;
        word
    }
}

impl Crypter for PcCipher {
    fn crypt(&mut self, data: &mut [u8]) -> Result<(), CryptError> {
        if data.is_empty() {
            return Err(CryptError::EmptyData);
        }
        let data = data.as_mut_slice_of::<u32>()?;

        for dword in data.iter_mut() {
            *dword ^= self.next_keystream_word().to_le();
        }

        Ok(())
    }
}
