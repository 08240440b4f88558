use std::fs::File;
use std::io::{BufReader, Cursor, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use itertools::Itertools;
use rand::random;
use thiserror::Error;

use crate::bytes::FixedLengthByteArrays;
use crate::crypt::{CryptError, Crypter, PcCipher};
use crate::packets::quest::*;
use crate::packets::{PacketError, PacketHeader};
use crate::prs::{prs_decompress_size, PrsError};
use crate::quest::bin::{QuestBin, QuestBinError};
use crate::quest::dat::{QuestDat, QuestDatError};

pub const DOWNLOAD_QUEST_WRAPPER_SIZE: usize = 8;

#[derive(Error, Debug)]
pub enum QuestQstError {
    #[error("I/O error while processing quest qst")]
    IoError(#[from] std::io::Error),

    #[error("Error reading quest qst data packet")]
    DataPacketError(#[from] PacketError),

    #[error("PRS compression failed")]
    PrsError(#[from] PrsError),

    #[error("Encryption failed")]
    CryptError(#[from] CryptError),

    #[error("Bad quest qst data format: {0}")]
    DataFormatError(String),

    #[error("Error processing quest bin")]
    QuestBinError(#[from] QuestBinError),

    #[error("Error processing quest dat")]
    QuestDatError(#[from] QuestDatError),
}

/// The payloads and naming needed to frame one quest as a qst file. The bin and dat payloads
/// here are always the PRS-compressed file data, without any download wrapper.
pub struct QstPayloads<'a> {
    pub quest_name: &'a str,
    pub bin_filename: &'a str,
    pub dat_filename: &'a str,
    pub compressed_bin: &'a [u8],
    pub compressed_dat: &'a [u8],
    pub is_online: bool,
}

#[derive(Debug)]
pub struct QuestQst {
    bin_header: QuestHeaderPacket,
    dat_header: QuestHeaderPacket,
    bin_chunks: Box<[QuestChunkPacket]>,
    dat_chunks: Box<[QuestChunkPacket]>,
}

// a download quest's payload gets encrypted (yes, with PC encryption, even though this is
// all Gamecube data) and prefixed with a small unencrypted wrapper carrying the crypt key.
// the cipher only works in whole dwords so the compressed data is first zero-padded out to
// a dword boundary
fn wrap_download_quest_data(
    compressed: &[u8],
    decompressed_size: usize,
) -> Result<Vec<u8>, QuestQstError> {
    let crypt_key = random::<u32>();

    let mut payload = compressed.to_vec();
    while payload.len() % 4 != 0 {
        payload.push(0);
    }

    let mut cipher = PcCipher::new(crypt_key);
    cipher.crypt(&mut payload)?;

    let mut result = Vec::with_capacity(DOWNLOAD_QUEST_WRAPPER_SIZE + payload.len());
    result.write_u32::<LittleEndian>((decompressed_size + DOWNLOAD_QUEST_WRAPPER_SIZE) as u32)?;
    result.write_u32::<LittleEndian>(crypt_key)?;
    result.write_all(&payload)?;
    Ok(result)
}

fn unwrap_download_quest_data(payload: &[u8]) -> Result<Vec<u8>, QuestQstError> {
    if payload.len() < DOWNLOAD_QUEST_WRAPPER_SIZE {
        return Err(QuestQstError::DataFormatError(format!(
            "Download quest data is too short ({} bytes) to contain its wrapper",
            payload.len()
        )));
    }

    let mut wrapper = &payload[0..DOWNLOAD_QUEST_WRAPPER_SIZE];
    let _decompressed_size = wrapper.read_u32::<LittleEndian>()?;
    let crypt_key = wrapper.read_u32::<LittleEndian>()?;

    let mut decrypted = payload[DOWNLOAD_QUEST_WRAPPER_SIZE..].to_vec();
    let mut cipher = PcCipher::new(crypt_key);
    cipher.crypt(&mut decrypted)?;
    Ok(decrypted)
}

fn create_quest_chunks(
    data: &[u8],
    filename: &str,
    is_online: bool,
) -> Result<Box<[QuestChunkPacket]>, QuestQstError> {
    let mut chunks = Vec::new();
    for (index, chunk_data) in data.chunks(QUEST_CHUNK_PACKET_DATA_SIZE).enumerate() {
        let mut chunk = QuestChunkPacket::new(filename, chunk_data, is_online)?;
        chunk.header.flags = index as u8;
        chunks.push(chunk);
    }
    Ok(chunks.into_boxed_slice())
}

fn collect_chunk_data(chunks: &[QuestChunkPacket], is_online: bool) -> Result<Vec<u8>, QuestQstError> {
    let mut data = Vec::new();
    for chunk in chunks.iter() {
        data.write_all(chunk.data())?;
    }

    if is_online {
        Ok(data)
    } else {
        unwrap_download_quest_data(&data)
    }
}

impl QuestQst {
    /// Frames the given compressed quest file payloads as a qst. For a download (offline)
    /// quest this is where the payloads get encrypted.
    pub fn from_compressed_bindat_bytes(payloads: QstPayloads) -> Result<QuestQst, QuestQstError> {
        let (bin_bytes, dat_bytes) = if payloads.is_online {
            (
                payloads.compressed_bin.to_vec(),
                payloads.compressed_dat.to_vec(),
            )
        } else {
            let bin_decompressed_size = prs_decompress_size(payloads.compressed_bin)?;
            let dat_decompressed_size = prs_decompress_size(payloads.compressed_dat)?;
            (
                wrap_download_quest_data(payloads.compressed_bin, bin_decompressed_size)?,
                wrap_download_quest_data(payloads.compressed_dat, dat_decompressed_size)?,
            )
        };

        let bin_header = QuestHeaderPacket::new(
            payloads.quest_name,
            payloads.bin_filename,
            bin_bytes.len(),
            payloads.is_online,
        )?;
        let dat_header = QuestHeaderPacket::new(
            payloads.quest_name,
            payloads.dat_filename,
            dat_bytes.len(),
            payloads.is_online,
        )?;

        let bin_chunks = create_quest_chunks(&bin_bytes, payloads.bin_filename, payloads.is_online)?;
        let dat_chunks = create_quest_chunks(&dat_bytes, payloads.dat_filename, payloads.is_online)?;

        Ok(QuestQst {
            bin_header,
            dat_header,
            bin_chunks,
            dat_chunks,
        })
    }

    pub fn from_bindat(bin: &QuestBin, dat: &QuestDat) -> Result<QuestQst, QuestQstError> {
        // a quest flagged for download is an offline quest, played from the memory card
        let is_online = !bin.header.is_download;
        let quest_number = bin.header.quest_number_u16();
        let bin_filename = format!("quest{}.bin", quest_number);
        let dat_filename = format!("quest{}.dat", quest_number);

        let compressed_bin = bin.to_compressed_bytes()?;
        let compressed_dat = dat.to_compressed_bytes()?;

        QuestQst::from_compressed_bindat_bytes(QstPayloads {
            quest_name: &bin.header.name,
            bin_filename: &bin_filename,
            dat_filename: &dat_filename,
            compressed_bin: compressed_bin.as_ref(),
            compressed_dat: compressed_dat.as_ref(),
            is_online,
        })
    }

    pub fn from_file(path: &Path) -> Result<QuestQst, QuestQstError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        QuestQst::from_bytes(&mut reader)
    }

    /// Reads a qst out of the given reader. The two file header packets are accepted in
    /// either order and chunk packets can be interleaved (or not) in any way, as different
    /// servers and tools out there do this differently. Reading stops once both files'
    /// announced byte counts have been fully delivered.
    pub fn from_bytes<T: ReadBytesExt>(reader: &mut T) -> Result<QuestQst, QuestQstError> {
        let mut bin_header: Option<QuestHeaderPacket> = None;
        let mut dat_header: Option<QuestHeaderPacket> = None;
        let mut bin_chunks = Vec::<QuestChunkPacket>::new();
        let mut dat_chunks = Vec::<QuestChunkPacket>::new();
        let mut bin_bytes_received: usize = 0;
        let mut dat_bytes_received: usize = 0;

        fn is_complete(header: &Option<QuestHeaderPacket>, received: usize) -> bool {
            match header {
                Some(header) => received >= header.size as usize,
                None => false,
            }
        }

        while !is_complete(&bin_header, bin_bytes_received)
            || !is_complete(&dat_header, dat_bytes_received)
        {
            let packet_header = PacketHeader::from_bytes(reader)?;
            match packet_header.id {
                PACKET_ID_QUEST_HEADER_ONLINE | PACKET_ID_QUEST_HEADER_DOWNLOAD => {
                    let header = QuestHeaderPacket::from_header_and_bytes(packet_header, reader)?;

                    if header.filename.as_unpadded_slice().is_empty() {
                        return Err(QuestQstError::DataFormatError(String::from(
                            "Encountered file header packet with blank filename",
                        )));
                    }

                    match header.file_type() {
                        QuestPacketFileType::Bin => {
                            if bin_header.is_some() {
                                return Err(QuestQstError::DataFormatError(String::from(
                                    "Encountered duplicate bin file header packet",
                                )));
                            }
                            bin_header = Some(header);
                        }
                        QuestPacketFileType::Dat => {
                            if dat_header.is_some() {
                                return Err(QuestQstError::DataFormatError(String::from(
                                    "Encountered duplicate dat file header packet",
                                )));
                            }
                            dat_header = Some(header);
                        }
                        QuestPacketFileType::Unknown => {
                            return Err(QuestQstError::DataFormatError(String::from(
                                "Unable to determine file type from filename in file header packet",
                            )));
                        }
                    }
                }
                PACKET_ID_QUEST_CHUNK_ONLINE | PACKET_ID_QUEST_CHUNK_DOWNLOAD => {
                    let chunk = QuestChunkPacket::from_header_and_bytes(packet_header, reader)?;

                    if chunk.size == 0 {
                        return Err(QuestQstError::DataFormatError(String::from(
                            "Encountered data chunk packet with zero-length data",
                        )));
                    }

                    // chunks are matched up to whichever file header packet announced their
                    // filename, which also means the header packet has to have come first
                    let (header, chunks, bytes_received) =
                        if matches!(&bin_header, Some(header) if header.filename == chunk.filename)
                        {
                            (
                                bin_header.as_ref().unwrap(),
                                &mut bin_chunks,
                                &mut bin_bytes_received,
                            )
                        } else if matches!(&dat_header, Some(header) if header.filename == chunk.filename)
                        {
                            (
                                dat_header.as_ref().unwrap(),
                                &mut dat_chunks,
                                &mut dat_bytes_received,
                            )
                        } else {
                            return Err(QuestQstError::DataFormatError(format!(
                                "Encountered data chunk packet for a filename no file header packet announced: {:?}",
                                chunk.filename.as_unpadded_slice()
                            )));
                        };

                    let expected_sequence = (chunks.len() % 256) as u8;
                    if chunk.sequence_number() != expected_sequence {
                        return Err(QuestQstError::DataFormatError(format!(
                            "Out of sequence data chunk packet: expected counter {}, found {}",
                            expected_sequence,
                            chunk.sequence_number()
                        )));
                    }

                    if *bytes_received + chunk.size as usize > header.size as usize {
                        return Err(QuestQstError::DataFormatError(format!(
                            "Data chunk packets carry more than the {} bytes announced for this file",
                            header.size
                        )));
                    }

                    *bytes_received += chunk.size as usize;
                    chunks.push(chunk);
                }
                other_id => {
                    return Err(QuestQstError::DataFormatError(format!(
                        "Unexpected packet id found in quest qst data: {:#04x}",
                        other_id
                    )));
                }
            }
        }

        let bin_header = bin_header.unwrap();
        let dat_header = dat_header.unwrap();

        // the whole qst has to be one delivery category: online (0x44 headers with 0x13
        // chunks) or download (0xa6 headers with 0xa7 chunks), never a mix
        if bin_header.header.id != dat_header.header.id {
            return Err(QuestQstError::DataFormatError(String::from(
                "Packet header ID mismatch between bin and dat file header packets",
            )));
        }
        let expected_chunk_id = if bin_header.header.id == PACKET_ID_QUEST_HEADER_ONLINE {
            PACKET_ID_QUEST_CHUNK_ONLINE
        } else {
            PACKET_ID_QUEST_CHUNK_DOWNLOAD
        };
        if bin_chunks
            .iter()
            .chain(dat_chunks.iter())
            .any(|chunk| chunk.header.id != expected_chunk_id)
        {
            return Err(QuestQstError::DataFormatError(format!(
                "One or more data chunk packets were not of the expected type: {:#04x}",
                expected_chunk_id
            )));
        }

        Ok(QuestQst {
            bin_header,
            dat_header,
            bin_chunks: bin_chunks.into_boxed_slice(),
            dat_chunks: dat_chunks.into_boxed_slice(),
        })
    }

    pub fn write_bytes<T: WriteBytesExt>(&self, writer: &mut T) -> Result<(), QuestQstError> {
        self.bin_header.write_bytes(writer)?;
        self.dat_header.write_bytes(writer)?;
        for chunk in self.bin_chunks.iter().interleave(self.dat_chunks.iter()) {
            chunk.write_bytes(writer)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Box<[u8]>, QuestQstError> {
        let mut buffer = Cursor::new(Vec::<u8>::new());
        self.write_bytes(&mut buffer)?;
        Ok(buffer.into_inner().into_boxed_slice())
    }

    pub fn to_file(&self, path: &Path) -> Result<(), QuestQstError> {
        let mut file = File::create(path)?;
        self.write_bytes(&mut file)?;
        Ok(())
    }

    pub fn is_online(&self) -> bool {
        // a QuestQst can never be created with bin/dat headers of differing packet IDs
        self.bin_header.header.id == PACKET_ID_QUEST_HEADER_ONLINE
    }

    pub fn name_str(&self) -> Result<String, QuestQstError> {
        Ok(self.bin_header.name_str()?)
    }

    pub fn bin_header(&self) -> &QuestHeaderPacket {
        &self.bin_header
    }

    pub fn dat_header(&self) -> &QuestHeaderPacket {
        &self.dat_header
    }

    pub fn bin_chunks(&self) -> &[QuestChunkPacket] {
        &self.bin_chunks
    }

    pub fn dat_chunks(&self) -> &[QuestChunkPacket] {
        &self.dat_chunks
    }

    /// Returns the quest's PRS-compressed .bin file data, reassembled from its chunks and
    /// decrypted if this is a download qst.
    pub fn extract_bin_bytes(&self) -> Result<Box<[u8]>, QuestQstError> {
        Ok(collect_chunk_data(&self.bin_chunks, self.is_online())?.into_boxed_slice())
    }

    pub fn extract_bin(&self) -> Result<QuestBin, QuestQstError> {
        let data = self.extract_bin_bytes()?;
        Ok(QuestBin::from_compressed_bytes(data.as_ref())?)
    }

    /// Returns the quest's PRS-compressed .dat file data, reassembled from its chunks and
    /// decrypted if this is a download qst.
    pub fn extract_dat_bytes(&self) -> Result<Box<[u8]>, QuestQstError> {
        Ok(collect_chunk_data(&self.dat_chunks, self.is_online())?.into_boxed_slice())
    }

    pub fn extract_dat(&self) -> Result<QuestDat, QuestQstError> {
        let data = self.extract_dat_bytes()?;
        Ok(QuestDat::from_compressed_bytes(data.as_ref())?)
    }
}

/// Reads qst bytes and additionally verifies that nothing follows the final data chunk
/// packet. Useful when the reader is consuming a whole file rather than a packet stream.
pub fn read_qst_from_bytes(bytes: &[u8]) -> Result<QuestQst, QuestQstError> {
    let mut reader = Cursor::new(bytes);
    let qst = QuestQst::from_bytes(&mut reader)?;
    if (reader.position() as usize) < bytes.len() {
        return Err(QuestQstError::DataFormatError(format!(
            "{} trailing bytes found after the final data chunk packet",
            bytes.len() - reader.position() as usize
        )));
    }
    Ok(qst)
}
