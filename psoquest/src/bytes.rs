use byteorder::ReadBytesExt;

pub trait FixedLengthByteArrays {
    fn as_unpadded_slice(&self) -> &[u8];
    fn to_fixed_length(&self, length: usize) -> Vec<u8>;
}

impl<T: AsRef<[u8]> + ?Sized> FixedLengthByteArrays for T {
    fn as_unpadded_slice(&self) -> &[u8] {
        let end = self.as_ref().iter().take_while(|&b| *b != 0).count();
        &self.as_ref()[0..end]
    }

    fn to_fixed_length(&self, length: usize) -> Vec<u8> {
        let mut result = self.as_ref().to_vec();
        if result.len() != length {
            result.resize(length, 0u8);
        }
        result
    }
}

pub trait ReadFixedLengthByteArray {
    fn read_bytes<const N: usize>(&mut self) -> Result<[u8; N], std::io::Error>;
}

impl<T: ReadBytesExt> ReadFixedLengthByteArray for T {
    fn read_bytes<const N: usize>(&mut self) -> Result<[u8; N], std::io::Error> {
        let mut array = [0u8; N];
        self.read_exact(&mut array)?;
        Ok(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn fixed_length_byte_arrays() {
        let bytes: &[u8] = &[
            0x51, 0x75, 0x65, 0x73, 0x74, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00,
        ];
        assert_eq!(vec![0x51, 0x75, 0x65, 0x73, 0x74], bytes.as_unpadded_slice());

        let bytes: &[u8] = &[0x51, 0x75, 0x65, 0x73, 0x74];
        assert_eq!(vec![0x51, 0x75, 0x65, 0x73, 0x74], bytes.as_unpadded_slice());

        let bytes: &[u8] = &[0x51, 0x75, 0x65, 0x73, 0x74];
        assert_eq!(
            vec![0x51, 0x75, 0x65, 0x73, 0x74, 0x00, 0x00, 0x00],
            bytes.to_fixed_length(8)
        );
        assert_eq!(vec![0x51, 0x75, 0x65], bytes.to_fixed_length(3));
        assert_eq!(
            vec![0x51, 0x75, 0x65, 0x73, 0x74],
            bytes.to_fixed_length(5)
        );
    }

    #[test]
    pub fn read_fixed_length_arrays() {
        let mut bytes: &[u8] = &[0x01, 0x02, 0x03, 0x04, 0x05];
        let array: [u8; 3] = bytes.read_bytes().unwrap();
        assert_eq!([0x01, 0x02, 0x03], array);
        let array: [u8; 2] = bytes.read_bytes().unwrap();
        assert_eq!([0x04, 0x05], array);
        let result: Result<[u8; 1], _> = bytes.read_bytes();
        assert!(result.is_err());
    }
}
