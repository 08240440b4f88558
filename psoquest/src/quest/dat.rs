use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::prs::{prs_compress, prs_decompress, PrsError};

pub const QUEST_DAT_TABLE_HEADER_SIZE: usize = 16;

pub const QUEST_DAT_OBJECT_ENTRY_SIZE: usize = 68;
pub const QUEST_DAT_NPC_ENTRY_SIZE: usize = 72;

pub const QUEST_DAT_AREAS: [[&str; 18]; 2] = [
    [
        "Pioneer 2",
        "Forest 1",
        "Forest 2",
        "Caves 1",
        "Caves 2",
        "Caves 3",
        "Mines 1",
        "Mines 2",
        "Ruins 1",
        "Ruins 2",
        "Ruins 3",
        "Under the Dome",
        "Underground Channel",
        "Monitor Room",
        "????",
        "Visual Lobby",
        "VR Spaceship Alpha",
        "VR Temple Alpha",
    ],
    [
        "Lab",
        "VR Temple Alpha",
        "VR Temple Beta",
        "VR Spaceship Alpha",
        "VR Spaceship Beta",
        "Central Control Area",
        "Jungle North",
        "Jungle East",
        "Mountain",
        "Seaside",
        "Seabed Upper",
        "Seabed Lower",
        "Cliffs of Gal Da Val",
        "Test Subject Disposal Area",
        "VR Temple Final",
        "VR Spaceship Final",
        "Seaside Night",
        "Control Tower",
    ],
];

#[derive(Error, Debug)]
pub enum QuestDatError {
    #[error("I/O error while processing quest dat")]
    IoError(#[from] std::io::Error),

    #[error("PRS compression failed")]
    PrsError(#[from] PrsError),

    #[error("Bad quest dat data format: {0}")]
    DataFormatError(String),
}

bitflags! {
    /// Problems a validation pass can find while walking a decompressed quest .dat.
    /// `EOF_EMPTY_TABLE` is purely informational: it just notes that the file ends with the
    /// usual all-zero end marker table.
    pub struct QuestDatValidationFlags: u32 {
        const BAD_TYPE = 0x00000001;
        const TABLE_BODY_SIZE_MISMATCH = 0x00000002;
        const EMPTY_TABLE_MIDFILE = 0x00000004;
        const EOF_EMPTY_TABLE = 0x00000008;
    }
}

impl QuestDatValidationFlags {
    /// Returns only the flags which represent actual problems with the data.
    pub fn errors(&self) -> QuestDatValidationFlags {
        *self - QuestDatValidationFlags::EOF_EMPTY_TABLE
    }
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum QuestDatTableType {
    Object,
    NPC,
    Wave,
    ChallengeModeSpawns,
    ChallengeModeUnknown,
    Unknown(u32),
}

impl Display for QuestDatTableType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use QuestDatTableType::*;
        match self {
            Object => write!(f, "Object"),
            NPC => write!(f, "NPC"),
            Wave => write!(f, "Wave"),
            ChallengeModeSpawns => write!(f, "Challenge Mode Spawns"),
            ChallengeModeUnknown => write!(f, "Challenge Mode Unknown"),
            Unknown(n) => write!(f, "Unknown value ({})", n),
        }
    }
}

impl From<u32> for QuestDatTableType {
    fn from(value: u32) -> Self {
        use QuestDatTableType::*;
        match value {
            1 => Object,
            2 => NPC,
            3 => Wave,
            4 => ChallengeModeSpawns,
            5 => ChallengeModeUnknown,
            n => Unknown(n),
        }
    }
}

impl From<&QuestDatTableType> for u32 {
    fn from(value: &QuestDatTableType) -> Self {
        use QuestDatTableType::*;
        match *value {
            Object => 1,
            NPC => 2,
            Wave => 3,
            ChallengeModeSpawns => 4,
            ChallengeModeUnknown => 5,
            Unknown(n) => n,
        }
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum QuestArea {
    Area(&'static str),
    InvalidArea(u32),
    InvalidEpisode(u32),
}

impl Display for QuestArea {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use QuestArea::*;
        match self {
            Area(name) => write!(f, "{}", name),
            InvalidArea(n) => write!(f, "Invalid Area ({})", n),
            InvalidEpisode(n) => write!(f, "Invalid Episode ({})", n),
        }
    }
}

#[derive(Debug)]
pub struct QuestDatTableHeader {
    pub table_type: QuestDatTableType,
    pub area: u32,
}

#[derive(Debug)]
pub struct QuestDatTable {
    pub header: QuestDatTableHeader,
    pub bytes: Box<[u8]>,
}

impl QuestDatTable {
    pub fn table_type(&self) -> QuestDatTableType {
        self.header.table_type
    }

    pub fn area_name(&self, episode: u32) -> QuestArea {
        use QuestArea::*;
        match QUEST_DAT_AREAS.get(episode as usize) {
            Some(list) => match list.get(self.header.area as usize) {
                Some(area) => Area(area),
                None => InvalidArea(self.header.area),
            },
            None => InvalidEpisode(episode),
        }
    }

    /// Number of fixed-size entries in this table's body, for the table types which hold
    /// arrays of them.
    pub fn entity_count(&self) -> Option<usize> {
        match self.table_type() {
            QuestDatTableType::Object => Some(self.body_size() / QUEST_DAT_OBJECT_ENTRY_SIZE),
            QuestDatTableType::NPC => Some(self.body_size() / QUEST_DAT_NPC_ENTRY_SIZE),
            _ => None,
        }
    }

    pub fn calculate_size(&self) -> usize {
        QUEST_DAT_TABLE_HEADER_SIZE + self.bytes.len()
    }

    pub fn body_size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug)]
pub struct QuestDat {
    pub tables: Box<[QuestDatTable]>,
}

impl QuestDat {
    pub fn from_compressed_bytes(bytes: &[u8]) -> Result<QuestDat, QuestDatError> {
        let decompressed = prs_decompress(bytes)?;
        QuestDat::from_uncompressed_bytes(decompressed.as_ref())
    }

    pub fn from_uncompressed_bytes(bytes: &[u8]) -> Result<QuestDat, QuestDatError> {
        let mut reader = Cursor::new(bytes);
        let mut tables = Vec::new();
        loop {
            let table_type = reader.read_u32::<LittleEndian>()?;
            let table_size = reader.read_u32::<LittleEndian>()?;
            let area = reader.read_u32::<LittleEndian>()?;
            let table_body_size = reader.read_u32::<LittleEndian>()?;

            // a "zero-table" always marks the end of the file
            if table_type == 0 && table_size == 0 && area == 0 && table_body_size == 0 {
                break;
            }

            let mut body_bytes = vec![0u8; table_body_size as usize];
            reader.read_exact(&mut body_bytes)?;

            tables.push(QuestDatTable {
                header: QuestDatTableHeader {
                    table_type: table_type.into(),
                    area,
                },
                bytes: body_bytes.into_boxed_slice(),
            });
        }

        Ok(QuestDat {
            tables: tables.into_boxed_slice(),
        })
    }

    pub fn from_compressed_file(path: &Path) -> Result<QuestDat, QuestDatError> {
        let mut file = File::open(path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        QuestDat::from_compressed_bytes(&buffer)
    }

    pub fn from_uncompressed_file(path: &Path) -> Result<QuestDat, QuestDatError> {
        let mut file = File::open(path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        QuestDat::from_uncompressed_bytes(&buffer)
    }

    pub fn write_uncompressed_bytes<T: WriteBytesExt>(
        &self,
        writer: &mut T,
    ) -> Result<(), QuestDatError> {
        for table in self.tables.iter() {
            writer.write_u32::<LittleEndian>((&table.header.table_type).into())?;
            writer.write_u32::<LittleEndian>(table.calculate_size() as u32)?;
            writer.write_u32::<LittleEndian>(table.header.area)?;
            writer.write_u32::<LittleEndian>(table.body_size() as u32)?;
            writer.write_all(table.bytes.as_ref())?;
        }

        // the end-of-file zero-table
        writer.write_u32::<LittleEndian>(0)?;
        writer.write_u32::<LittleEndian>(0)?;
        writer.write_u32::<LittleEndian>(0)?;
        writer.write_u32::<LittleEndian>(0)?;

        Ok(())
    }

    pub fn to_uncompressed_bytes(&self) -> Result<Box<[u8]>, QuestDatError> {
        let mut buffer = Cursor::new(Vec::new());
        self.write_uncompressed_bytes(&mut buffer)?;
        Ok(buffer.into_inner().into_boxed_slice())
    }

    pub fn to_compressed_bytes(&self) -> Result<Box<[u8]>, QuestDatError> {
        let bytes = self.to_uncompressed_bytes()?;
        Ok(prs_compress(bytes.as_ref()))
    }

    pub fn to_uncompressed_file(&self, path: &Path) -> Result<(), QuestDatError> {
        let mut file = File::create(path)?;
        self.write_uncompressed_bytes(&mut file)?;
        Ok(())
    }

    pub fn to_compressed_file(&self, path: &Path) -> Result<(), QuestDatError> {
        let compressed_bytes = self.to_compressed_bytes()?;
        let mut file = File::create(path)?;
        file.write_all(compressed_bytes.as_ref())?;
        Ok(())
    }

    pub fn calculate_size(&self) -> usize {
        self.tables
            .iter()
            .map(|table| table.calculate_size())
            .sum::<usize>()
            + QUEST_DAT_TABLE_HEADER_SIZE
    }
}

fn read_table_header_fields(image: &[u8], offset: usize) -> (u32, u32, u32, u32) {
    let field = |at: usize| {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&image[at..at + 4]);
        u32::from_le_bytes(raw)
    };
    (
        field(offset),
        field(offset + 4),
        field(offset + 8),
        field(offset + 12),
    )
}

/// Walks the table headers of the given decompressed .dat image, returning flags for
/// everything questionable found along the way. This works against the raw image rather than
/// a parsed [`QuestDat`] because some problems (like a premature end marker) are invisible
/// after parsing has discarded the bytes in question.
pub fn validate_quest_dat_image(image: &[u8]) -> QuestDatValidationFlags {
    let mut flags = QuestDatValidationFlags::empty();

    let mut offset = 0;
    while offset + QUEST_DAT_TABLE_HEADER_SIZE <= image.len() {
        let (table_type, table_size, area, table_body_size) =
            read_table_header_fields(image, offset);

        if table_type == 0 && table_size == 0 && area == 0 && table_body_size == 0 {
            if offset + QUEST_DAT_TABLE_HEADER_SIZE == image.len() {
                flags |= QuestDatValidationFlags::EOF_EMPTY_TABLE;
            } else {
                flags |= QuestDatValidationFlags::EMPTY_TABLE_MIDFILE;
            }
            break;
        }

        if table_type > 5 {
            flags |= QuestDatValidationFlags::BAD_TYPE;
        }
        if table_size as u64 != table_body_size as u64 + QUEST_DAT_TABLE_HEADER_SIZE as u64 {
            flags |= QuestDatValidationFlags::TABLE_BODY_SIZE_MISMATCH;
        }

        offset += QUEST_DAT_TABLE_HEADER_SIZE + table_body_size as usize;
    }

    flags
}

/// Applies the known fix-ups for recoverable .dat validation problems directly to the
/// decompressed image, returning the flags that are still outstanding afterwards.
pub fn handle_dat_validation_issues(
    image: &mut Vec<u8>,
    flags: QuestDatValidationFlags,
) -> QuestDatValidationFlags {
    let mut remaining = flags;

    if flags.contains(QuestDatValidationFlags::EMPTY_TABLE_MIDFILE) {
        // whatever follows a premature end marker would never be read by the game anyway,
        // so make the end marker real and drop the rest
        let mut offset = 0;
        while offset + QUEST_DAT_TABLE_HEADER_SIZE <= image.len() {
            let (table_type, table_size, area, table_body_size) =
                read_table_header_fields(image, offset);
            if table_type == 0 && table_size == 0 && area == 0 && table_body_size == 0 {
                image.truncate(offset + QUEST_DAT_TABLE_HEADER_SIZE);
                remaining.remove(QuestDatValidationFlags::EMPTY_TABLE_MIDFILE);
                break;
            }
            offset += QUEST_DAT_TABLE_HEADER_SIZE + table_body_size as usize;
        }
    }

    remaining
}

#[cfg(test)]
pub mod tests {
    use byteorder::WriteBytesExt;
    use claim::*;
    use tempfile::TempDir;

    use super::*;

    // a small dat with one object table, one NPC table and one wave table, the way a
    // minimal single-area quest would lay them out
    pub fn sample_dat() -> QuestDat {
        let tables = vec![
            QuestDatTable {
                header: QuestDatTableHeader {
                    table_type: QuestDatTableType::Object,
                    area: 0,
                },
                bytes: vec![0x11u8; QUEST_DAT_OBJECT_ENTRY_SIZE * 2].into_boxed_slice(),
            },
            QuestDatTable {
                header: QuestDatTableHeader {
                    table_type: QuestDatTableType::NPC,
                    area: 1,
                },
                bytes: vec![0x22u8; QUEST_DAT_NPC_ENTRY_SIZE].into_boxed_slice(),
            },
            QuestDatTable {
                header: QuestDatTableHeader {
                    table_type: QuestDatTableType::Wave,
                    area: 1,
                },
                bytes: vec![0x33u8; 44].into_boxed_slice(),
            },
        ];
        QuestDat {
            tables: tables.into_boxed_slice(),
        }
    }

    pub fn validate_sample_dat(dat: &QuestDat) {
        let episode = 0;

        assert_eq!(3, dat.tables.len());

        let table = &dat.tables[0];
        assert_eq!(QuestDatTableType::Object, table.table_type());
        assert_eq!(QUEST_DAT_OBJECT_ENTRY_SIZE * 2, table.body_size());
        assert_eq!(Some(2), table.entity_count());
        assert_eq!(QuestArea::Area("Pioneer 2"), table.area_name(episode));

        let table = &dat.tables[1];
        assert_eq!(QuestDatTableType::NPC, table.table_type());
        assert_eq!(QUEST_DAT_NPC_ENTRY_SIZE, table.body_size());
        assert_eq!(Some(1), table.entity_count());
        assert_eq!(QuestArea::Area("Forest 1"), table.area_name(episode));

        let table = &dat.tables[2];
        assert_eq!(QuestDatTableType::Wave, table.table_type());
        assert_eq!(44, table.body_size());
        assert_eq!(None, table.entity_count());
        assert_eq!(QuestArea::Area("Forest 1"), table.area_name(episode));
    }

    #[test]
    pub fn uncompressed_round_trip() -> Result<(), QuestDatError> {
        let dat = sample_dat();
        let bytes = dat.to_uncompressed_bytes()?;
        assert_eq!(dat.calculate_size(), bytes.len());
        let reread = QuestDat::from_uncompressed_bytes(bytes.as_ref())?;
        validate_sample_dat(&reread);
        Ok(())
    }

    #[test]
    pub fn compressed_round_trip() -> Result<(), QuestDatError> {
        let dat = sample_dat();
        let compressed = dat.to_compressed_bytes()?;
        let reread = QuestDat::from_compressed_bytes(compressed.as_ref())?;
        validate_sample_dat(&reread);
        Ok(())
    }

    #[test]
    pub fn file_round_trip() -> Result<(), QuestDatError> {
        let tmp_dir = TempDir::new()?;

        let dat = sample_dat();

        let path = tmp_dir.path().join("quest58.dat");
        dat.to_compressed_file(&path)?;
        validate_sample_dat(&QuestDat::from_compressed_file(&path)?);

        let path = tmp_dir.path().join("quest58.uncompressed.dat");
        dat.to_uncompressed_file(&path)?;
        validate_sample_dat(&QuestDat::from_uncompressed_file(&path)?);

        Ok(())
    }

    #[test]
    pub fn error_on_truncated_image() {
        let dat = sample_dat();
        let mut bytes = dat.to_uncompressed_bytes().unwrap().into_vec();
        // cut the image off in the middle of the second table's body
        bytes.truncate(QUEST_DAT_TABLE_HEADER_SIZE * 2 + QUEST_DAT_OBJECT_ENTRY_SIZE * 2 + 8);
        assert_matches!(
            QuestDat::from_uncompressed_bytes(&bytes),
            Err(QuestDatError::IoError(..))
        );
    }

    #[test]
    pub fn area_names_for_both_episodes() {
        let table = QuestDatTable {
            header: QuestDatTableHeader {
                table_type: QuestDatTableType::Wave,
                area: 17,
            },
            bytes: Box::new([]),
        };
        assert_eq!(QuestArea::Area("VR Temple Alpha"), table.area_name(0));
        assert_eq!(QuestArea::Area("Control Tower"), table.area_name(1));
        assert_eq!(QuestArea::InvalidEpisode(2), table.area_name(2));

        let table = QuestDatTable {
            header: QuestDatTableHeader {
                table_type: QuestDatTableType::Wave,
                area: 18,
            },
            bytes: Box::new([]),
        };
        assert_eq!(QuestArea::InvalidArea(18), table.area_name(0));
    }

    #[test]
    pub fn clean_image_validates_clean() {
        let image = sample_dat().to_uncompressed_bytes().unwrap().into_vec();
        assert_eq!(
            QuestDatValidationFlags::EOF_EMPTY_TABLE,
            validate_quest_dat_image(&image)
        );
        assert!(validate_quest_dat_image(&image).errors().is_empty());
        // validation is stable
        assert_eq!(
            validate_quest_dat_image(&image),
            validate_quest_dat_image(&image)
        );
    }

    #[test]
    pub fn validation_flags_bad_type() {
        let image = sample_dat().to_uncompressed_bytes().unwrap().into_vec();
        let mut bad = image.clone();
        bad[0..4].copy_from_slice(&99u32.to_le_bytes());
        let flags = validate_quest_dat_image(&bad);
        assert!(flags.contains(QuestDatValidationFlags::BAD_TYPE));
        // not recoverable
        let mut bad_image = bad.clone();
        let remaining = handle_dat_validation_issues(&mut bad_image, flags);
        assert!(remaining.contains(QuestDatValidationFlags::BAD_TYPE));
    }

    #[test]
    pub fn validation_flags_table_size_mismatch() {
        let image = sample_dat().to_uncompressed_bytes().unwrap().into_vec();
        let mut bad = image.clone();
        // table_size no longer equals table_body_size + 16
        bad[4..8].copy_from_slice(&5u32.to_le_bytes());
        let flags = validate_quest_dat_image(&bad);
        assert!(flags.contains(QuestDatValidationFlags::TABLE_BODY_SIZE_MISMATCH));
    }

    #[test]
    pub fn recovers_empty_table_midfile() {
        let dat = sample_dat();
        let mut image = Vec::new();
        dat.write_uncompressed_bytes(&mut image).unwrap();
        let clean_length = image.len();

        // stick a bunch of stray table-ish garbage after the end marker
        image.write_u32::<LittleEndian>(3).unwrap();
        image.write_u32::<LittleEndian>(60).unwrap();
        image.write_u32::<LittleEndian>(1).unwrap();
        image.write_u32::<LittleEndian>(44).unwrap();
        image.extend_from_slice(&[0xeeu8; 44]);

        let flags = validate_quest_dat_image(&image);
        assert!(flags.contains(QuestDatValidationFlags::EMPTY_TABLE_MIDFILE));
        assert!(!flags.contains(QuestDatValidationFlags::EOF_EMPTY_TABLE));

        let remaining = handle_dat_validation_issues(&mut image, flags);
        assert!(!remaining.contains(QuestDatValidationFlags::EMPTY_TABLE_MIDFILE));
        assert_eq!(clean_length, image.len());

        // the re-run only reports the (informational) end marker at eof
        let revalidated = validate_quest_dat_image(&image);
        assert_eq!(QuestDatValidationFlags::EOF_EMPTY_TABLE, revalidated);
        assert!(revalidated.errors().is_empty());
    }
}
