use std::fmt::Write;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;

use crate::prs::prs_decompress;
use crate::quest::bin::{
    handle_bin_validation_issues, validate_quest_bin, QuestBin, QuestBinError,
    QuestBinValidationFlags,
};
use crate::quest::dat::{
    handle_dat_validation_issues, validate_quest_dat_image, QuestDat, QuestDatError,
    QuestDatTableType, QuestDatValidationFlags,
};
use crate::quest::qst::{read_qst_from_bytes, QuestQst, QuestQstError};
use crate::util::crc32;

pub mod bin;
pub mod dat;
pub mod qst;

#[derive(Error, Debug)]
pub enum QuestError {
    #[error("I/O error reading quest")]
    IoError(#[from] std::io::Error),

    #[error("Error processing quest bin")]
    QuestBinError(#[from] QuestBinError),

    #[error("Error processing quest dat")]
    QuestDatError(#[from] QuestDatError),

    #[error("Error processing quest qst")]
    QuestQstError(#[from] QuestQstError),

    #[error("Quest bin validation problems could not be repaired: {0:?}")]
    BinValidationFailed(QuestBinValidationFlags),

    #[error("Quest dat validation problems could not be repaired: {0:?}")]
    DatValidationFailed(QuestDatValidationFlags),
}

/// What validation found while a quest was being loaded: the flags raised by the initial
/// validation pass, and whatever was still being flagged after the automatic repairs ran.
#[derive(Debug, Copy, Clone)]
pub struct QuestValidationSummary {
    pub bin_flags_found: QuestBinValidationFlags,
    pub bin_flags_residual: QuestBinValidationFlags,
    pub dat_flags_found: QuestDatValidationFlags,
    pub dat_flags_residual: QuestDatValidationFlags,
}

impl QuestValidationSummary {
    pub fn was_anything_repaired(&self) -> bool {
        self.bin_flags_found != self.bin_flags_residual
            || self.dat_flags_found.errors() != self.dat_flags_residual.errors()
    }

    /// Fails if any non-informational validation flag survived the repair pass.
    pub fn ensure_repaired(&self) -> Result<(), QuestError> {
        if !self.bin_flags_residual.is_empty() {
            return Err(QuestError::BinValidationFailed(self.bin_flags_residual));
        }
        if !self.dat_flags_residual.errors().is_empty() {
            return Err(QuestError::DatValidationFailed(
                self.dat_flags_residual.errors(),
            ));
        }
        Ok(())
    }
}

fn format_description_field(description: &str) -> String {
    description
        .trim()
        .replace("\n", "\n                            ")
}

// bin/dat files are almost always stored compressed, so that interpretation gets tried
// first. something that doesn't even decode as a PRS stream is taken to be an already
// decompressed file image instead
fn decompress_or_passthrough(bytes: &[u8]) -> Vec<u8> {
    match prs_decompress(bytes) {
        Ok(decompressed) => decompressed.into_vec(),
        Err(_) => bytes.to_vec(),
    }
}

fn normalize_bin_image(
    image: &[u8],
) -> Result<(QuestBin, QuestBinValidationFlags, QuestBinValidationFlags), QuestBinError> {
    let mut quest_bin = QuestBin::from_uncompressed_bytes(image)?;
    let found = validate_quest_bin(&quest_bin);
    handle_bin_validation_issues(&mut quest_bin, found);
    let residual = validate_quest_bin(&quest_bin);
    Ok((quest_bin, found, residual))
}

fn normalize_dat_image(
    mut image: Vec<u8>,
) -> Result<(QuestDat, QuestDatValidationFlags, QuestDatValidationFlags), QuestDatError> {
    let found = validate_quest_dat_image(&image);
    handle_dat_validation_issues(&mut image, found);
    let residual = validate_quest_dat_image(&image);
    let quest_dat = QuestDat::from_uncompressed_bytes(&image)?;
    Ok((quest_dat, found, residual))
}

pub struct Quest {
    pub bin: QuestBin,
    pub dat: QuestDat,
}

impl Quest {
    /// Loads a quest from .bin and .dat file data, each of which may be either PRS-compressed
    /// or already decompressed. Both files are validated and automatically repaired where
    /// possible; what happened is returned alongside the quest. Whether any unrepaired
    /// problems are acceptable is the caller's decision to make.
    pub fn from_bindat_bytes(
        bin_bytes: &[u8],
        dat_bytes: &[u8],
    ) -> Result<(Quest, QuestValidationSummary), QuestError> {
        let bin_image = decompress_or_passthrough(bin_bytes);
        let dat_image = decompress_or_passthrough(dat_bytes);

        let (quest_bin, bin_flags_found, bin_flags_residual) = normalize_bin_image(&bin_image)?;
        let (quest_dat, dat_flags_found, dat_flags_residual) = normalize_dat_image(dat_image)?;

        Ok((
            Quest {
                bin: quest_bin,
                dat: quest_dat,
            },
            QuestValidationSummary {
                bin_flags_found,
                bin_flags_residual,
                dat_flags_found,
                dat_flags_residual,
            },
        ))
    }

    pub fn from_bindat_files(
        bin_path: &Path,
        dat_path: &Path,
    ) -> Result<(Quest, QuestValidationSummary), QuestError> {
        let mut bin_bytes = Vec::new();
        File::open(bin_path)?.read_to_end(&mut bin_bytes)?;
        let mut dat_bytes = Vec::new();
        File::open(dat_path)?.read_to_end(&mut dat_bytes)?;
        Quest::from_bindat_bytes(&bin_bytes, &dat_bytes)
    }

    pub fn from_qst(qst: &QuestQst) -> Result<(Quest, QuestValidationSummary), QuestError> {
        // payloads coming out of a qst are always compressed, so no passthrough guessing here
        let compressed_bin = qst.extract_bin_bytes()?;
        let compressed_dat = qst.extract_dat_bytes()?;
        let bin_image = prs_decompress(compressed_bin.as_ref())
            .map_err(QuestBinError::PrsError)?
            .into_vec();
        let dat_image = prs_decompress(compressed_dat.as_ref())
            .map_err(QuestDatError::PrsError)?
            .into_vec();

        let (quest_bin, bin_flags_found, bin_flags_residual) = normalize_bin_image(&bin_image)?;
        let (quest_dat, dat_flags_found, dat_flags_residual) = normalize_dat_image(dat_image)?;

        Ok((
            Quest {
                bin: quest_bin,
                dat: quest_dat,
            },
            QuestValidationSummary {
                bin_flags_found,
                bin_flags_residual,
                dat_flags_found,
                dat_flags_residual,
            },
        ))
    }

    pub fn from_qst_bytes(bytes: &[u8]) -> Result<(Quest, QuestValidationSummary), QuestError> {
        let qst = read_qst_from_bytes(bytes)?;
        Quest::from_qst(&qst)
    }

    pub fn from_qst_file(path: &Path) -> Result<(Quest, QuestValidationSummary), QuestError> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        Quest::from_qst_bytes(&bytes)
    }

    pub fn as_qst(&self) -> Result<QuestQst, QuestError> {
        Ok(QuestQst::from_bindat(&self.bin, &self.dat)?)
    }

    pub fn to_qst_file(&self, path: &Path) -> Result<(), QuestError> {
        let qst = self.as_qst()?;
        Ok(qst.to_file(path)?)
    }

    pub fn to_compressed_bindat_files(
        &self,
        bin_path: &Path,
        dat_path: &Path,
    ) -> Result<(), QuestError> {
        self.bin.to_compressed_file(bin_path)?;
        self.dat.to_compressed_file(dat_path)?;
        Ok(())
    }

    pub fn to_uncompressed_bindat_files(
        &self,
        bin_path: &Path,
        dat_path: &Path,
    ) -> Result<(), QuestError> {
        self.bin.to_uncompressed_file(bin_path)?;
        self.dat.to_uncompressed_file(dat_path)?;
        Ok(())
    }

    pub fn name(&self) -> &String {
        &self.bin.header.name
    }

    pub fn is_download(&self) -> bool {
        self.bin.header.is_download
    }

    pub fn set_is_download(&mut self, value: bool) {
        self.bin.header.is_download = value
    }

    pub fn quest_number(&self) -> u8 {
        self.bin.header.quest_number()
    }

    pub fn quest_number_u16(&self) -> u16 {
        self.bin.header.quest_number_u16()
    }

    pub fn episode(&self) -> u8 {
        self.bin.header.episode()
    }

    pub fn display_bin_info(&self, summary: &QuestValidationSummary) -> String {
        let object_code_crc32 = crc32(self.bin.object_code.as_ref());
        let function_offset_table_crc32 = crc32(self.bin.function_offset_table.as_ref());

        let mut s = String::new();

        // writing into an owned string buffer. none of these can fail

        writeln!(s, "QUEST .BIN FILE").unwrap();
        writeln!(
            s,
            "======================================================================"
        )
        .unwrap();
        writeln!(
            s,
            "Decompressed Size:          {}",
            self.bin.calculate_size()
        )
        .unwrap();
        writeln!(s, "Name:                       {}", self.bin.header.name).unwrap();
        writeln!(
            s,
            "object_code:                size: {}, crc32: {:08x}",
            self.bin.object_code.len(),
            object_code_crc32
        )
        .unwrap();
        writeln!(
            s,
            "function_offset_table:      size: {}, crc32: {:08x}",
            self.bin.function_offset_table.len(),
            function_offset_table_crc32
        )
        .unwrap();
        writeln!(
            s,
            "Is Download?                {}",
            self.bin.header.is_download
        )
        .unwrap();
        writeln!(
            s,
            "Quest Number/ID:            {0} (8-bit)  {1}, 0x{1:04x} (16-bit)",
            self.bin.header.quest_number(),
            self.bin.header.quest_number_u16()
        )
        .unwrap();
        match self.bin.header.quest_number.episode() {
            Some(episode) => {
                writeln!(
                    s,
                    "Episode:                    {} (0x{:02x})",
                    episode as u32 + 1,
                    episode
                )
                .unwrap();
            }
            None => {
                writeln!(
                    s,
                    "Episode:                    n/a (16-bit quest number in use)"
                )
                .unwrap();
            }
        }
        writeln!(
            s,
            "Unknown header byte:        0x{:02x}",
            self.bin.header.unknown
        )
        .unwrap();
        writeln!(
            s,
            "Short Description:          {}\n",
            format_description_field(&self.bin.header.short_description)
        )
        .unwrap();
        writeln!(
            s,
            "Long Description:           {}\n",
            format_description_field(&self.bin.header.long_description)
        )
        .unwrap();

        if !summary.bin_flags_found.is_empty() {
            writeln!(
                s,
                "Validation problems found:  {:?}",
                summary.bin_flags_found
            )
            .unwrap();
            if summary.bin_flags_residual.is_empty() {
                writeln!(s, "                            (all repaired automatically)").unwrap();
            } else {
                writeln!(
                    s,
                    "Still present after repair: {:?}",
                    summary.bin_flags_residual
                )
                .unwrap();
            }
        }

        s
    }

    pub fn display_dat_info(&self, summary: &QuestValidationSummary) -> String {
        let mut s = String::new();

        let episode = self.bin.header.episode() as u32;

        writeln!(s, "QUEST .DAT FILE").unwrap();
        writeln!(
            s,
            "================================================================================"
        )
        .unwrap();
        writeln!(s, "Decompressed size: {}\n", self.dat.calculate_size()).unwrap();
        writeln!(
            s,
            "(Using episode {} to lookup table area names)",
            episode + 1
        )
        .unwrap();

        writeln!(
            s,
            "Idx Size  Table Type            Area                           Count   CRC32"
        )
        .unwrap();

        for (index, table) in self.dat.tables.iter().enumerate() {
            let body_size = table.body_size();
            let body_crc32 = crc32(table.bytes.as_ref());

            match table.table_type() {
                QuestDatTableType::Unknown(n) => {
                    writeln!(s, "{:3} {:5} Unknown: {}", index, body_size, n).unwrap();
                }
                table_type => {
                    let count = match table.entity_count() {
                        Some(count) => format!("{:5}", count),
                        None => String::from("     "),
                    };
                    writeln!(
                        s,
                        "{:3} {:5} {:<21} {:30} {}   {:08x}",
                        index,
                        body_size,
                        table_type.to_string(),
                        table.area_name(episode).to_string(),
                        count,
                        body_crc32
                    )
                    .unwrap();
                }
            };
        }

        if !summary.dat_flags_found.errors().is_empty() {
            writeln!(
                s,
                "\nValidation problems found:  {:?}",
                summary.dat_flags_found.errors()
            )
            .unwrap();
            if summary.dat_flags_residual.errors().is_empty() {
                writeln!(s, "                            (all repaired automatically)").unwrap();
            } else {
                writeln!(
                    s,
                    "Still present after repair: {:?}",
                    summary.dat_flags_residual.errors()
                )
                .unwrap();
            }
        }

        s
    }
}

#[cfg(test)]
mod tests {
    use claim::*;
    use tempfile::TempDir;

    use crate::quest::bin::tests::{sample_bin, validate_sample_bin};
    use crate::quest::dat::tests::{sample_dat, validate_sample_dat};

    use super::*;

    fn sample_quest() -> Quest {
        Quest {
            bin: sample_bin(),
            dat: sample_dat(),
        }
    }

    #[test]
    pub fn loads_from_compressed_bindat_bytes() -> Result<(), QuestError> {
        let quest = sample_quest();
        let bin_bytes = quest.bin.to_compressed_bytes()?;
        let dat_bytes = quest.dat.to_compressed_bytes()?;

        let (loaded, summary) = Quest::from_bindat_bytes(bin_bytes.as_ref(), dat_bytes.as_ref())?;
        assert_ok!(summary.ensure_repaired());
        assert!(!summary.was_anything_repaired());
        validate_sample_bin(&loaded.bin);
        validate_sample_dat(&loaded.dat);
        Ok(())
    }

    #[test]
    pub fn loads_from_uncompressed_bindat_bytes() -> Result<(), QuestError> {
        let quest = sample_quest();
        let bin_bytes = quest.bin.to_uncompressed_bytes()?;
        let dat_bytes = quest.dat.to_uncompressed_bytes()?;

        let (loaded, summary) = Quest::from_bindat_bytes(bin_bytes.as_ref(), dat_bytes.as_ref())?;
        assert_ok!(summary.ensure_repaired());
        validate_sample_bin(&loaded.bin);
        validate_sample_dat(&loaded.dat);
        Ok(())
    }

    #[test]
    pub fn loads_from_mixed_compression_bindat_bytes() -> Result<(), QuestError> {
        let quest = sample_quest();
        let bin_bytes = quest.bin.to_compressed_bytes()?;
        let dat_bytes = quest.dat.to_uncompressed_bytes()?;

        let (loaded, summary) = Quest::from_bindat_bytes(bin_bytes.as_ref(), dat_bytes.as_ref())?;
        assert_ok!(summary.ensure_repaired());
        validate_sample_bin(&loaded.bin);
        validate_sample_dat(&loaded.dat);
        Ok(())
    }

    #[test]
    pub fn loads_from_online_qst_bytes() -> Result<(), QuestError> {
        let quest = sample_quest();
        let qst = quest.as_qst()?;
        let bytes = qst.to_bytes()?;

        let (loaded, summary) = Quest::from_qst_bytes(bytes.as_ref())?;
        assert_ok!(summary.ensure_repaired());
        assert_eq!(false, loaded.is_download());
        validate_sample_bin(&loaded.bin);
        validate_sample_dat(&loaded.dat);
        Ok(())
    }

    #[test]
    pub fn loads_from_offline_qst_bytes() -> Result<(), QuestError> {
        let mut quest = sample_quest();
        quest.set_is_download(true);
        let qst = quest.as_qst()?;
        let bytes = qst.to_bytes()?;

        let (mut loaded, summary) = Quest::from_qst_bytes(bytes.as_ref())?;
        assert_ok!(summary.ensure_repaired());
        assert_eq!(true, loaded.is_download());
        loaded.set_is_download(false);
        validate_sample_bin(&loaded.bin);
        validate_sample_dat(&loaded.dat);
        Ok(())
    }

    #[test]
    pub fn repairs_undersized_bin_size_during_load() -> Result<(), QuestError> {
        let quest = sample_quest();
        let mut bin_bytes = quest.bin.to_uncompressed_bytes()?.into_vec();
        // declared bin_size drops 4 bytes
        let actual = quest.bin.calculate_size() as u32;
        bin_bytes[8..12].copy_from_slice(&(actual - 4).to_le_bytes());
        let dat_bytes = quest.dat.to_uncompressed_bytes()?;

        let (loaded, summary) = Quest::from_bindat_bytes(&bin_bytes, dat_bytes.as_ref())?;
        assert!(summary
            .bin_flags_found
            .contains(QuestBinValidationFlags::BIN_SIZE_SMALLER));
        assert!(summary.bin_flags_residual.is_empty());
        assert!(summary.was_anything_repaired());
        assert_ok!(summary.ensure_repaired());
        assert_eq!(12, loaded.bin.function_offset_table.len());
        Ok(())
    }

    #[test]
    pub fn repairs_off_by_one_bin_size_during_load() -> Result<(), QuestError> {
        let quest = sample_quest();
        let mut bin_bytes = quest.bin.to_uncompressed_bytes()?.into_vec();
        let actual = quest.bin.calculate_size() as u32;
        bin_bytes[8..12].copy_from_slice(&(actual + 1).to_le_bytes());
        let dat_bytes = quest.dat.to_uncompressed_bytes()?;

        let (loaded, summary) = Quest::from_bindat_bytes(&bin_bytes, dat_bytes.as_ref())?;
        assert!(summary
            .bin_flags_found
            .contains(QuestBinValidationFlags::BIN_SIZE_LARGER));
        assert_ok!(summary.ensure_repaired());
        assert_eq!(17, loaded.bin.function_offset_table.len());
        Ok(())
    }

    #[test]
    pub fn surfaces_unrepairable_bin_problems() -> Result<(), QuestError> {
        let quest = sample_quest();
        let mut bin_bytes = quest.bin.to_uncompressed_bytes()?.into_vec();
        // declared object_code_offset of zero has no repair
        bin_bytes[0..4].copy_from_slice(&0u32.to_le_bytes());
        let dat_bytes = quest.dat.to_uncompressed_bytes()?;

        let (_, summary) = Quest::from_bindat_bytes(&bin_bytes, dat_bytes.as_ref())?;
        assert_matches!(
            summary.ensure_repaired(),
            Err(QuestError::BinValidationFailed(..))
        );
        Ok(())
    }

    #[test]
    pub fn repairs_dat_with_premature_end_marker() -> Result<(), QuestError> {
        let quest = sample_quest();
        let bin_bytes = quest.bin.to_uncompressed_bytes()?;
        let mut dat_bytes = quest.dat.to_uncompressed_bytes()?.into_vec();
        dat_bytes.extend_from_slice(&[0x55u8; 64]);

        let (loaded, summary) = Quest::from_bindat_bytes(bin_bytes.as_ref(), &dat_bytes)?;
        assert!(summary
            .dat_flags_found
            .contains(QuestDatValidationFlags::EMPTY_TABLE_MIDFILE));
        assert_ok!(summary.ensure_repaired());
        validate_sample_dat(&loaded.dat);
        Ok(())
    }

    #[test]
    pub fn bindat_and_qst_file_round_trips() -> Result<(), QuestError> {
        let tmp_dir = TempDir::new()?;
        let quest = sample_quest();

        let bin_path = tmp_dir.path().join("quest58.bin");
        let dat_path = tmp_dir.path().join("quest58.dat");
        quest.to_compressed_bindat_files(&bin_path, &dat_path)?;
        let (loaded, _) = Quest::from_bindat_files(&bin_path, &dat_path)?;
        validate_sample_bin(&loaded.bin);

        let bin_path = tmp_dir.path().join("quest58.uncompressed.bin");
        let dat_path = tmp_dir.path().join("quest58.uncompressed.dat");
        quest.to_uncompressed_bindat_files(&bin_path, &dat_path)?;
        let (loaded, _) = Quest::from_bindat_files(&bin_path, &dat_path)?;
        validate_sample_dat(&loaded.dat);

        let qst_path = tmp_dir.path().join("quest58.qst");
        quest.to_qst_file(&qst_path)?;
        let (loaded, summary) = Quest::from_qst_file(&qst_path)?;
        assert_ok!(summary.ensure_repaired());
        validate_sample_bin(&loaded.bin);
        validate_sample_dat(&loaded.dat);

        Ok(())
    }

    #[test]
    pub fn display_info_includes_the_important_fields() -> Result<(), QuestError> {
        let quest = sample_quest();
        let bin_bytes = quest.bin.to_compressed_bytes()?;
        let dat_bytes = quest.dat.to_compressed_bytes()?;
        let (loaded, summary) = Quest::from_bindat_bytes(bin_bytes.as_ref(), dat_bytes.as_ref())?;

        let bin_info = loaded.display_bin_info(&summary);
        assert!(bin_info.contains("Lost HEAT SWORD"));
        assert!(bin_info.contains("58"));
        assert!(!bin_info.contains("Validation problems"));

        let dat_info = loaded.display_dat_info(&summary);
        assert!(dat_info.contains("Object"));
        assert!(dat_info.contains("NPC"));
        assert!(dat_info.contains("Wave"));
        assert!(dat_info.contains("Pioneer 2"));
        assert!(dat_info.contains("Forest 1"));

        Ok(())
    }
}
