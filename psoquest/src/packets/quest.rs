use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::bytes::*;
use crate::packets::{PacketError, PacketHeader, PACKET_HEADER_SIZE};
use crate::text::{decode_text, encode_text};

pub const PACKET_ID_QUEST_HEADER_ONLINE: u8 = 0x44;
pub const PACKET_ID_QUEST_HEADER_DOWNLOAD: u8 = 0xa6;
pub const PACKET_ID_QUEST_CHUNK_ONLINE: u8 = 0x13;
pub const PACKET_ID_QUEST_CHUNK_DOWNLOAD: u8 = 0xa7;

pub const QUEST_PACKET_NAME_LENGTH: usize = 32;
pub const QUEST_PACKET_FILENAME_LENGTH: usize = 16;

pub const QUEST_HEADER_PACKET_SIZE: usize = 60;
pub const QUEST_CHUNK_PACKET_DATA_SIZE: usize = 1024;
pub const QUEST_CHUNK_PACKET_SIZE: usize = 1056;

// a chunk packet's meaningful fields stop 8 bytes short of its declared packet size. the
// remainder is zero padding which readers need to skip over
const QUEST_CHUNK_PACKET_FIELDS_SIZE: usize =
    PACKET_HEADER_SIZE + QUEST_PACKET_FILENAME_LENGTH + QUEST_CHUNK_PACKET_DATA_SIZE + 4;

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum QuestPacketFileType {
    Bin,
    Dat,
    Unknown,
}

fn file_type_from_filename(filename: &[u8]) -> QuestPacketFileType {
    let unpadded = filename.as_unpadded_slice();
    let lowercased: Vec<u8> = unpadded.iter().map(|b| b.to_ascii_lowercase()).collect();
    if lowercased.ends_with(b".bin") {
        QuestPacketFileType::Bin
    } else if lowercased.ends_with(b".dat") {
        QuestPacketFileType::Dat
    } else {
        QuestPacketFileType::Unknown
    }
}

fn filename_to_array(filename: &str) -> Result<[u8; QUEST_PACKET_FILENAME_LENGTH], PacketError> {
    let bytes = filename.as_bytes();
    if bytes.len() > QUEST_PACKET_FILENAME_LENGTH {
        return Err(PacketError::DataFormatError(format!(
            "Filename '{}' is too long to fit in a quest packet (maximum is {} bytes including extension)",
            filename, QUEST_PACKET_FILENAME_LENGTH
        )));
    }
    let mut array = [0u8; QUEST_PACKET_FILENAME_LENGTH];
    array[0..bytes.len()].copy_from_slice(bytes);
    Ok(array)
}

/// The packet which announces one of a quest's two files and its total payload size, ahead of
/// that file's data chunk packets. A qst file contains two of these, one for the .bin file and
/// one for the .dat file.
#[derive(Debug)]
pub struct QuestHeaderPacket {
    pub header: PacketHeader,
    pub name: [u8; QUEST_PACKET_NAME_LENGTH],
    pub unused: u16,
    pub flags: u16,
    pub filename: [u8; QUEST_PACKET_FILENAME_LENGTH],
    pub size: u32,
}

impl QuestHeaderPacket {
    pub fn new(
        name: &str,
        filename: &str,
        size: usize,
        is_online: bool,
    ) -> Result<QuestHeaderPacket, PacketError> {
        let name_bytes = encode_text(name)?;
        let mut name = [0u8; QUEST_PACKET_NAME_LENGTH];
        name.copy_from_slice(&name_bytes.to_fixed_length(QUEST_PACKET_NAME_LENGTH));

        Ok(QuestHeaderPacket {
            header: PacketHeader {
                id: if is_online {
                    PACKET_ID_QUEST_HEADER_ONLINE
                } else {
                    PACKET_ID_QUEST_HEADER_DOWNLOAD
                },
                flags: 0,
                size: QUEST_HEADER_PACKET_SIZE as u16,
            },
            name,
            unused: 0,
            flags: 0,
            filename: filename_to_array(filename)?,
            size: size as u32,
        })
    }

    pub fn from_header_and_bytes<T: ReadBytesExt>(
        header: PacketHeader,
        reader: &mut T,
    ) -> Result<QuestHeaderPacket, PacketError> {
        if header.id != PACKET_ID_QUEST_HEADER_ONLINE && header.id != PACKET_ID_QUEST_HEADER_DOWNLOAD
        {
            return Err(PacketError::WrongId(header.id));
        }
        if (header.size as usize) < QUEST_HEADER_PACKET_SIZE {
            return Err(PacketError::WrongSize(header.size));
        }

        let name: [u8; QUEST_PACKET_NAME_LENGTH] = reader.read_bytes()?;
        let unused = reader.read_u16::<LittleEndian>()?;
        let flags = reader.read_u16::<LittleEndian>()?;
        let filename: [u8; QUEST_PACKET_FILENAME_LENGTH] = reader.read_bytes()?;
        let size = reader.read_u32::<LittleEndian>()?;

        // skip over any extra bytes the producer claimed are part of this packet
        if header.size as usize > QUEST_HEADER_PACKET_SIZE {
            let remaining = header.size as usize - QUEST_HEADER_PACKET_SIZE;
            let mut _throw_away = vec![0u8; remaining];
            reader.read_exact(&mut _throw_away)?;
        }

        Ok(QuestHeaderPacket {
            header,
            name,
            unused,
            flags,
            filename,
            size,
        })
    }

    pub fn write_bytes<T: WriteBytesExt>(&self, writer: &mut T) -> Result<(), PacketError> {
        self.header.write_bytes(writer)?;
        writer.write_all(&self.name)?;
        writer.write_u16::<LittleEndian>(self.unused)?;
        writer.write_u16::<LittleEndian>(self.flags)?;
        writer.write_all(&self.filename)?;
        writer.write_u32::<LittleEndian>(self.size)?;
        Ok(())
    }

    pub fn name_str(&self) -> Result<String, PacketError> {
        Ok(decode_text(self.name.as_unpadded_slice())?)
    }

    pub fn filename_str(&self) -> Result<String, PacketError> {
        Ok(decode_text(self.filename.as_unpadded_slice())?)
    }

    pub fn file_type(&self) -> QuestPacketFileType {
        file_type_from_filename(&self.filename)
    }
}

/// A single chunk of one of a quest's two files. The packet header's `flags` field doubles as
/// a per-file sequence counter, counting up from zero (wrapping at 256) separately for the
/// .bin and .dat chunk sequences.
#[derive(Debug)]
pub struct QuestChunkPacket {
    pub header: PacketHeader,
    pub filename: [u8; QUEST_PACKET_FILENAME_LENGTH],
    pub data: [u8; QUEST_CHUNK_PACKET_DATA_SIZE],
    pub size: u32,
}

impl QuestChunkPacket {
    pub fn new(
        filename: &str,
        data: &[u8],
        is_online: bool,
    ) -> Result<QuestChunkPacket, PacketError> {
        if data.len() > QUEST_CHUNK_PACKET_DATA_SIZE {
            return Err(PacketError::DataFormatError(format!(
                "Chunk data length {} exceeds the maximum of {}",
                data.len(),
                QUEST_CHUNK_PACKET_DATA_SIZE
            )));
        }

        let mut chunk_data = [0u8; QUEST_CHUNK_PACKET_DATA_SIZE];
        chunk_data[0..data.len()].copy_from_slice(data);

        Ok(QuestChunkPacket {
            header: PacketHeader {
                id: if is_online {
                    PACKET_ID_QUEST_CHUNK_ONLINE
                } else {
                    PACKET_ID_QUEST_CHUNK_DOWNLOAD
                },
                flags: 0,
                size: QUEST_CHUNK_PACKET_SIZE as u16,
            },
            filename: filename_to_array(filename)?,
            data: chunk_data,
            size: data.len() as u32,
        })
    }

    pub fn from_header_and_bytes<T: ReadBytesExt>(
        header: PacketHeader,
        reader: &mut T,
    ) -> Result<QuestChunkPacket, PacketError> {
        if header.id != PACKET_ID_QUEST_CHUNK_ONLINE && header.id != PACKET_ID_QUEST_CHUNK_DOWNLOAD
        {
            return Err(PacketError::WrongId(header.id));
        }
        // some producers don't pad chunk packets out to the full record size, so only the
        // meaningful fields are required to be present
        if (header.size as usize) < QUEST_CHUNK_PACKET_FIELDS_SIZE {
            return Err(PacketError::WrongSize(header.size));
        }

        let filename: [u8; QUEST_PACKET_FILENAME_LENGTH] = reader.read_bytes()?;
        let data: [u8; QUEST_CHUNK_PACKET_DATA_SIZE] = reader.read_bytes()?;
        let size = reader.read_u32::<LittleEndian>()?;

        if size as usize > QUEST_CHUNK_PACKET_DATA_SIZE {
            return Err(PacketError::DataFormatError(format!(
                "Chunk data size {} exceeds the chunk data region size of {}",
                size, QUEST_CHUNK_PACKET_DATA_SIZE
            )));
        }

        if header.size as usize > QUEST_CHUNK_PACKET_FIELDS_SIZE {
            let remaining = header.size as usize - QUEST_CHUNK_PACKET_FIELDS_SIZE;
            let mut _throw_away = vec![0u8; remaining];
            reader.read_exact(&mut _throw_away)?;
        }

        Ok(QuestChunkPacket {
            header,
            filename,
            data,
            size,
        })
    }

    pub fn write_bytes<T: WriteBytesExt>(&self, writer: &mut T) -> Result<(), PacketError> {
        self.header.write_bytes(writer)?;
        writer.write_all(&self.filename)?;
        writer.write_all(&self.data)?;
        writer.write_u32::<LittleEndian>(self.size)?;
        let padding = [0u8; QUEST_CHUNK_PACKET_SIZE - QUEST_CHUNK_PACKET_FIELDS_SIZE];
        writer.write_all(&padding)?;
        Ok(())
    }

    pub fn data(&self) -> &[u8] {
        &self.data[0..self.size as usize]
    }

    pub fn sequence_number(&self) -> u8 {
        self.header.flags
    }

    pub fn filename_str(&self) -> Result<String, PacketError> {
        Ok(decode_text(self.filename.as_unpadded_slice())?)
    }

    pub fn file_type(&self) -> QuestPacketFileType {
        file_type_from_filename(&self.filename)
    }
}
