use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::bytes::*;
use crate::prs::{prs_compress, prs_decompress, PrsError};
use crate::text::{decode_text, encode_text};

pub const QUEST_BIN_NAME_LENGTH: usize = 32;
pub const QUEST_BIN_SHORT_DESCRIPTION_LENGTH: usize = 128;
pub const QUEST_BIN_LONG_DESCRIPTION_LENGTH: usize = 288;

pub const QUEST_BIN_HEADER_SIZE: usize = 20
    + QUEST_BIN_NAME_LENGTH
    + QUEST_BIN_SHORT_DESCRIPTION_LENGTH
    + QUEST_BIN_LONG_DESCRIPTION_LENGTH;

#[derive(Error, Debug)]
pub enum QuestBinError {
    #[error("I/O error while processing quest bin")]
    IoError(#[from] std::io::Error),

    #[error("PRS compression failed")]
    PrsError(#[from] PrsError),

    #[error("Bad quest bin data format: {0}")]
    DataFormatError(String),
}

bitflags! {
    /// Problems a validation pass can find in a quest .bin. Several of these show up in
    /// real-world quest files and can be cleaned up by `handle_bin_validation_issues`, so
    /// validation reports them all rather than bailing at the first one.
    pub struct QuestBinValidationFlags: u32 {
        const BAD_OBJECT_CODE_OFFSET = 0x00000001;
        const BIN_SIZE_SMALLER = 0x00000002;
        const BIN_SIZE_LARGER = 0x00000004;
        const EMPTY_NAME = 0x00000008;
        const UNEXPECTED_EPISODE = 0x00000010;
    }
}

/// The two ways the quest number bytes in a .bin header get used by quest authoring tools.
/// Sega's own quests use the first byte as a quest number and the second as an episode, while
/// a bunch of custom quests store a single 16-bit quest number there instead. There is
/// nothing in the file that says which reading is correct, so both stay available and the
/// episode value being out of range is what hints at the 16-bit reading.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum QuestNumber {
    NumberAndEpisode { number: u8, episode: u8 },
    Number(u16),
}

impl QuestNumber {
    pub fn from_raw(raw: u16) -> QuestNumber {
        QuestNumber::NumberAndEpisode {
            number: (raw & 0xff) as u8,
            episode: (raw >> 8) as u8,
        }
    }

    pub fn as_u16(&self) -> u16 {
        match *self {
            QuestNumber::NumberAndEpisode { number, episode } => {
                ((episode as u16) << 8) | number as u16
            }
            QuestNumber::Number(number) => number,
        }
    }

    pub fn number(&self) -> u8 {
        (self.as_u16() & 0xff) as u8
    }

    pub fn episode(&self) -> Option<u8> {
        match *self {
            QuestNumber::NumberAndEpisode { episode, .. } => Some(episode),
            QuestNumber::Number(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct QuestBinHeader {
    /// As declared in the file. Always expected to be 468, and anything else gets flagged by
    /// validation. Rewritten from scratch when the bin is serialized.
    pub object_code_offset: u32,
    /// As declared in the file, which real-world files sometimes get wrong. Validation
    /// compares it against the actual size. Rewritten from scratch when the bin is serialized.
    pub bin_size: u32,
    pub reserved: u32,
    pub is_download: bool,
    /// No known meaning. Carried through as-is.
    pub unknown: u8,
    pub quest_number: QuestNumber,
    pub name: String,
    pub short_description: String,
    pub long_description: String,
}

impl QuestBinHeader {
    pub fn quest_number(&self) -> u8 {
        self.quest_number.number()
    }

    pub fn quest_number_u16(&self) -> u16 {
        self.quest_number.as_u16()
    }

    pub fn episode(&self) -> u8 {
        self.quest_number.episode().unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct QuestBin {
    pub header: QuestBinHeader,
    pub object_code: Box<[u8]>,
    pub function_offset_table: Box<[u8]>,
}

fn decode_text_field(bytes: &[u8], field: &str) -> Result<String, QuestBinError> {
    match decode_text(bytes.as_unpadded_slice()) {
        Err(e) => Err(QuestBinError::DataFormatError(format!(
            "Error decoding string in quest '{}' field: {}",
            field, e
        ))),
        Ok(value) => Ok(value),
    }
}

fn encode_text_field(value: &str, field: &str) -> Result<Vec<u8>, QuestBinError> {
    match encode_text(value) {
        Err(e) => Err(QuestBinError::DataFormatError(format!(
            "Error encoding string for quest '{}' field: {}",
            field, e
        ))),
        Ok(value) => Ok(value),
    }
}

impl QuestBin {
    pub fn from_compressed_bytes(bytes: &[u8]) -> Result<QuestBin, QuestBinError> {
        let decompressed = prs_decompress(bytes)?;
        QuestBin::from_uncompressed_bytes(decompressed.as_ref())
    }

    /// Reads a quest bin out of the given decompressed file image. The actual length of the
    /// image is significant (the header's declared sizes are not always right), which is why
    /// this takes a byte slice and not a reader.
    pub fn from_uncompressed_bytes(bytes: &[u8]) -> Result<QuestBin, QuestBinError> {
        let mut reader = Cursor::new(bytes);

        let object_code_offset = reader.read_u32::<LittleEndian>()?;
        let function_offset_table_offset = reader.read_u32::<LittleEndian>()?;
        let bin_size = reader.read_u32::<LittleEndian>()?;
        let reserved = reader.read_u32::<LittleEndian>()?;
        let is_download = reader.read_u8()? != 0;
        let unknown = reader.read_u8()?;
        let quest_number_raw = reader.read_u16::<LittleEndian>()?;

        let name_bytes: [u8; QUEST_BIN_NAME_LENGTH] = reader.read_bytes()?;
        let name = decode_text_field(&name_bytes, "name")?;

        let short_description_bytes: [u8; QUEST_BIN_SHORT_DESCRIPTION_LENGTH] =
            reader.read_bytes()?;
        let short_description = decode_text_field(&short_description_bytes, "short_description")?;

        let long_description_bytes: [u8; QUEST_BIN_LONG_DESCRIPTION_LENGTH] =
            reader.read_bytes()?;
        let long_description = decode_text_field(&long_description_bytes, "long_description")?;

        // everything after the fixed-size header is split in two by the declared function
        // offset table offset. the split has to land inside the image
        let function_offset_table_offset = function_offset_table_offset as usize;
        if function_offset_table_offset < QUEST_BIN_HEADER_SIZE {
            return Err(QuestBinError::DataFormatError(format!(
                "function_offset_table_offset {} points inside the quest bin header",
                function_offset_table_offset
            )));
        }
        if function_offset_table_offset > bytes.len() {
            return Err(QuestBinError::DataFormatError(format!(
                "function_offset_table_offset {} is past the end of the data ({} bytes)",
                function_offset_table_offset,
                bytes.len()
            )));
        }

        let object_code = &bytes[QUEST_BIN_HEADER_SIZE..function_offset_table_offset];
        let function_offset_table = &bytes[function_offset_table_offset..];

        Ok(QuestBin {
            header: QuestBinHeader {
                object_code_offset,
                bin_size,
                reserved,
                is_download,
                unknown,
                quest_number: QuestNumber::from_raw(quest_number_raw),
                name,
                short_description,
                long_description,
            },
            object_code: object_code.into(),
            function_offset_table: function_offset_table.into(),
        })
    }

    pub fn from_compressed_file(path: &Path) -> Result<QuestBin, QuestBinError> {
        let mut file = File::open(path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        QuestBin::from_compressed_bytes(&buffer)
    }

    pub fn from_uncompressed_file(path: &Path) -> Result<QuestBin, QuestBinError> {
        let mut file = File::open(path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        QuestBin::from_uncompressed_bytes(&buffer)
    }

    pub fn write_uncompressed_bytes<T: WriteBytesExt>(
        &self,
        writer: &mut T,
    ) -> Result<(), QuestBinError> {
        let bin_size = self.calculate_size();
        let function_offset_table_offset = QUEST_BIN_HEADER_SIZE + self.object_code.len();

        writer.write_u32::<LittleEndian>(QUEST_BIN_HEADER_SIZE as u32)?;
        writer.write_u32::<LittleEndian>(function_offset_table_offset as u32)?;
        writer.write_u32::<LittleEndian>(bin_size as u32)?;
        writer.write_u32::<LittleEndian>(self.header.reserved)?;
        writer.write_u8(self.header.is_download as u8)?;
        writer.write_u8(self.header.unknown)?;
        writer.write_u16::<LittleEndian>(self.header.quest_number.as_u16())?;

        let name_bytes = encode_text_field(&self.header.name, "name")?;
        writer.write_all(&name_bytes.to_fixed_length(QUEST_BIN_NAME_LENGTH))?;

        let short_description_bytes =
            encode_text_field(&self.header.short_description, "short_description")?;
        writer.write_all(
            &short_description_bytes.to_fixed_length(QUEST_BIN_SHORT_DESCRIPTION_LENGTH),
        )?;

        let long_description_bytes =
            encode_text_field(&self.header.long_description, "long_description")?;
        writer
            .write_all(&long_description_bytes.to_fixed_length(QUEST_BIN_LONG_DESCRIPTION_LENGTH))?;

        writer.write_all(self.object_code.as_ref())?;
        writer.write_all(self.function_offset_table.as_ref())?;

        Ok(())
    }

    pub fn to_uncompressed_bytes(&self) -> Result<Box<[u8]>, QuestBinError> {
        let mut buffer = Cursor::new(Vec::<u8>::new());
        self.write_uncompressed_bytes(&mut buffer)?;
        Ok(buffer.into_inner().into_boxed_slice())
    }

    pub fn to_compressed_bytes(&self) -> Result<Box<[u8]>, QuestBinError> {
        let uncompressed = self.to_uncompressed_bytes()?;
        Ok(prs_compress(uncompressed.as_ref()))
    }

    pub fn to_uncompressed_file(&self, path: &Path) -> Result<(), QuestBinError> {
        let mut file = File::create(path)?;
        self.write_uncompressed_bytes(&mut file)?;
        Ok(())
    }

    pub fn to_compressed_file(&self, path: &Path) -> Result<(), QuestBinError> {
        let compressed_bytes = self.to_compressed_bytes()?;
        let mut file = File::create(path)?;
        file.write_all(compressed_bytes.as_ref())?;
        Ok(())
    }

    pub fn calculate_size(&self) -> usize {
        QUEST_BIN_HEADER_SIZE + self.object_code.len() + self.function_offset_table.len()
    }
}

/// Checks the given quest bin over and returns flags for everything questionable about it.
/// Always returns the complete set of problems found; never mutates anything.
pub fn validate_quest_bin(bin: &QuestBin) -> QuestBinValidationFlags {
    let mut flags = QuestBinValidationFlags::empty();

    if bin.header.object_code_offset != QUEST_BIN_HEADER_SIZE as u32 {
        flags |= QuestBinValidationFlags::BAD_OBJECT_CODE_OFFSET;
    }

    let actual_size = bin.calculate_size() as u32;
    if bin.header.bin_size < actual_size {
        flags |= QuestBinValidationFlags::BIN_SIZE_SMALLER;
    } else if bin.header.bin_size > actual_size {
        flags |= QuestBinValidationFlags::BIN_SIZE_LARGER;
    }

    if bin.header.name.is_empty() {
        flags |= QuestBinValidationFlags::EMPTY_NAME;
    }

    if let Some(episode) = bin.header.quest_number.episode() {
        if episode > 1 {
            flags |= QuestBinValidationFlags::UNEXPECTED_EPISODE;
        }
    }

    flags
}

/// Applies the known fix-ups for validation problems that are recoverable, returning the
/// flags that are still outstanding afterwards. These fix-ups only cover corruption patterns
/// that have actually been observed in circulating quest files.
pub fn handle_bin_validation_issues(
    bin: &mut QuestBin,
    flags: QuestBinValidationFlags,
) -> QuestBinValidationFlags {
    let mut remaining = flags;

    if flags.contains(QuestBinValidationFlags::BIN_SIZE_SMALLER) {
        // the declared size is what the game is going to believe, so trust it and drop the
        // excess bytes off the tail of the image
        let declared = bin.header.bin_size as usize;
        let mut excess = bin.calculate_size() - declared;

        let mut function_offset_table = bin.function_offset_table.to_vec();
        let from_table = excess.min(function_offset_table.len());
        function_offset_table.truncate(function_offset_table.len() - from_table);
        excess -= from_table;
        bin.function_offset_table = function_offset_table.into_boxed_slice();

        if excess > 0 {
            let mut object_code = bin.object_code.to_vec();
            let from_object_code = excess.min(object_code.len());
            object_code.truncate(object_code.len() - from_object_code);
            bin.object_code = object_code.into_boxed_slice();
        }

        remaining.remove(QuestBinValidationFlags::BIN_SIZE_SMALLER);
    }

    if flags.contains(QuestBinValidationFlags::BIN_SIZE_LARGER) {
        // exactly one missing byte at the end is a known corruption, presumably from some
        // old tool that truncated a trailing zero. anything more than that is not touched
        if bin.header.bin_size as usize == bin.calculate_size() + 1 {
            let mut function_offset_table = bin.function_offset_table.to_vec();
            function_offset_table.push(0);
            bin.function_offset_table = function_offset_table.into_boxed_slice();
            remaining.remove(QuestBinValidationFlags::BIN_SIZE_LARGER);
        }
    }

    if flags.contains(QuestBinValidationFlags::UNEXPECTED_EPISODE) {
        // an episode that large means these two bytes were almost certainly written as a
        // single 16-bit quest number. switch over to that reading
        bin.header.quest_number = QuestNumber::Number(bin.header.quest_number.as_u16());
        remaining.remove(QuestBinValidationFlags::UNEXPECTED_EPISODE);
    }

    remaining
}

#[cfg(test)]
pub mod tests {
    use claim::*;
    use tempfile::TempDir;

    use super::*;

    // builds the same small bin used by tests all over this crate: 64 bytes of object code
    // followed by a 16-byte function offset table
    pub fn sample_bin() -> QuestBin {
        let object_code: Vec<u8> = (0u8..64).map(|n| n.wrapping_mul(7)).collect();
        let function_offset_table = vec![0u8; 16];
        QuestBin {
            header: QuestBinHeader {
                object_code_offset: QUEST_BIN_HEADER_SIZE as u32,
                bin_size: (QUEST_BIN_HEADER_SIZE + 64 + 16) as u32,
                reserved: 0xffffffff,
                is_download: false,
                unknown: 0,
                quest_number: QuestNumber::NumberAndEpisode {
                    number: 58,
                    episode: 0,
                },
                name: String::from("Lost HEAT SWORD"),
                short_description: String::from("Retrieve a\nweapon from\na Dragon!"),
                long_description: String::from(
                    "Client:  Hopkins, hunter\nQuest:\n My weapon was taken\n from me.",
                ),
            },
            object_code: object_code.into_boxed_slice(),
            function_offset_table: function_offset_table.into_boxed_slice(),
        }
    }

    pub fn validate_sample_bin(bin: &QuestBin) {
        assert_eq!(64, bin.object_code.len());
        assert_eq!(16, bin.function_offset_table.len());
        assert_eq!(QUEST_BIN_HEADER_SIZE + 80, bin.calculate_size());
        assert_eq!(58, bin.header.quest_number());
        assert_eq!(0, bin.header.episode());
        assert_eq!(58, bin.header.quest_number_u16());
        assert_eq!("Lost HEAT SWORD", bin.header.name);
    }

    #[test]
    pub fn uncompressed_round_trip() -> Result<(), QuestBinError> {
        let bin = sample_bin();
        let bytes = bin.to_uncompressed_bytes()?;
        assert_eq!(bin.calculate_size(), bytes.len());
        let reread = QuestBin::from_uncompressed_bytes(bytes.as_ref())?;
        validate_sample_bin(&reread);
        assert_eq!(false, reread.header.is_download);
        assert_eq!(0xffffffff, reread.header.reserved);
        Ok(())
    }

    #[test]
    pub fn compressed_round_trip() -> Result<(), QuestBinError> {
        let bin = sample_bin();
        let compressed = bin.to_compressed_bytes()?;
        assert_lt!(compressed.len(), bin.calculate_size());
        let reread = QuestBin::from_compressed_bytes(compressed.as_ref())?;
        validate_sample_bin(&reread);
        Ok(())
    }

    #[test]
    pub fn file_round_trip() -> Result<(), QuestBinError> {
        let tmp_dir = TempDir::new()?;

        let bin = sample_bin();

        let path = tmp_dir.path().join("quest58.bin");
        bin.to_compressed_file(&path)?;
        validate_sample_bin(&QuestBin::from_compressed_file(&path)?);

        let path = tmp_dir.path().join("quest58.uncompressed.bin");
        bin.to_uncompressed_file(&path)?;
        validate_sample_bin(&QuestBin::from_uncompressed_file(&path)?);

        Ok(())
    }

    #[test]
    pub fn error_on_load_from_zero_bytes() {
        assert_matches!(
            QuestBin::from_uncompressed_bytes(&[]),
            Err(QuestBinError::IoError(..))
        );
        assert_matches!(
            QuestBin::from_compressed_bytes(&[]),
            Err(QuestBinError::PrsError(..))
        );
    }

    #[test]
    pub fn error_on_load_from_garbage_bytes() {
        let data: &[u8] = b"This is definitely not a quest";
        assert_matches!(
            QuestBin::from_uncompressed_bytes(data),
            Err(QuestBinError::IoError(..))
        );
    }

    #[test]
    pub fn error_on_function_offset_table_offset_inside_header() {
        let bin = sample_bin();
        let mut bytes = bin.to_uncompressed_bytes().unwrap().into_vec();
        bytes[4..8].copy_from_slice(&100u32.to_le_bytes());
        assert_matches!(
            QuestBin::from_uncompressed_bytes(&bytes),
            Err(QuestBinError::DataFormatError(..))
        );
    }

    #[test]
    pub fn error_on_function_offset_table_offset_past_the_end() {
        let bin = sample_bin();
        let mut bytes = bin.to_uncompressed_bytes().unwrap().into_vec();
        bytes[4..8].copy_from_slice(&1_000_000u32.to_le_bytes());
        assert_matches!(
            QuestBin::from_uncompressed_bytes(&bytes),
            Err(QuestBinError::DataFormatError(..))
        );
    }

    #[test]
    pub fn clean_bin_validates_clean() {
        let bin = sample_bin();
        assert_eq!(QuestBinValidationFlags::empty(), validate_quest_bin(&bin));
        // validation is stable. running it again changes nothing
        assert_eq!(QuestBinValidationFlags::empty(), validate_quest_bin(&bin));
    }

    #[test]
    pub fn validation_flags_bad_object_code_offset() {
        let mut bin = sample_bin();
        bin.header.object_code_offset = 400;
        assert_eq!(
            QuestBinValidationFlags::BAD_OBJECT_CODE_OFFSET,
            validate_quest_bin(&bin)
        );
        // there is no fix-up for this one
        let flags = validate_quest_bin(&bin);
        let remaining = handle_bin_validation_issues(&mut bin, flags);
        assert_eq!(QuestBinValidationFlags::BAD_OBJECT_CODE_OFFSET, remaining);
    }

    #[test]
    pub fn validation_flags_empty_name() {
        let mut bin = sample_bin();
        bin.header.name = String::new();
        assert_eq!(QuestBinValidationFlags::EMPTY_NAME, validate_quest_bin(&bin));
    }

    #[test]
    pub fn recovers_bin_size_smaller() {
        let mut bin = sample_bin();
        // declared size says the image should be 10 bytes shorter than it actually is
        bin.header.bin_size -= 10;
        let flags = validate_quest_bin(&bin);
        assert_eq!(QuestBinValidationFlags::BIN_SIZE_SMALLER, flags);

        let remaining = handle_bin_validation_issues(&mut bin, flags);
        assert_eq!(QuestBinValidationFlags::empty(), remaining);
        assert_eq!(6, bin.function_offset_table.len());
        assert_eq!(bin.header.bin_size as usize, bin.calculate_size());
        assert_eq!(QuestBinValidationFlags::empty(), validate_quest_bin(&bin));
    }

    #[test]
    pub fn recovers_bin_size_larger_by_one() {
        let mut bin = sample_bin();
        bin.header.bin_size += 1;
        let flags = validate_quest_bin(&bin);
        assert_eq!(QuestBinValidationFlags::BIN_SIZE_LARGER, flags);

        let remaining = handle_bin_validation_issues(&mut bin, flags);
        assert_eq!(QuestBinValidationFlags::empty(), remaining);
        assert_eq!(17, bin.function_offset_table.len());
        assert_eq!(0, bin.function_offset_table[16]);
        assert_eq!(QuestBinValidationFlags::empty(), validate_quest_bin(&bin));
    }

    #[test]
    pub fn does_not_recover_bin_size_larger_by_more_than_one() {
        let mut bin = sample_bin();
        bin.header.bin_size += 50;
        let flags = validate_quest_bin(&bin);
        assert_eq!(QuestBinValidationFlags::BIN_SIZE_LARGER, flags);

        let remaining = handle_bin_validation_issues(&mut bin, flags);
        assert_eq!(QuestBinValidationFlags::BIN_SIZE_LARGER, remaining);
        assert_eq!(16, bin.function_offset_table.len());
    }

    #[test]
    pub fn recovers_unexpected_episode_as_u16_quest_number() {
        let mut bin = sample_bin();
        // 0x0130 read as number + episode gives episode 1... but 0x3130 gives episode 0x31,
        // which no version of the game has
        bin.header.quest_number = QuestNumber::from_raw(0x3130);
        let flags = validate_quest_bin(&bin);
        assert_eq!(QuestBinValidationFlags::UNEXPECTED_EPISODE, flags);

        let remaining = handle_bin_validation_issues(&mut bin, flags);
        assert_eq!(QuestBinValidationFlags::empty(), remaining);
        assert_eq!(QuestNumber::Number(0x3130), bin.header.quest_number);
        assert_eq!(0x3130, bin.header.quest_number_u16());
        assert_eq!(0, bin.header.episode());
        assert_eq!(QuestBinValidationFlags::empty(), validate_quest_bin(&bin));
    }

    #[test]
    pub fn episode_one_is_not_flagged() {
        let mut bin = sample_bin();
        bin.header.quest_number = QuestNumber::NumberAndEpisode {
            number: 12,
            episode: 1,
        };
        assert_eq!(QuestBinValidationFlags::empty(), validate_quest_bin(&bin));
    }
}
