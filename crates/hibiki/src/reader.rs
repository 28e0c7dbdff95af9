//! Cursor-style reader over an in-memory byte buffer, used by the container
//! index parsers. All multi-byte reads are available in both byte orders;
//! the ISO-BMFF and EBML formats only ever use big-endian.

use std::io::Cursor;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};

use crate::{HibikiError, HibikiResult};

pub struct DataReader<'a> {
    data: &'a [u8],
    cursor: Cursor<&'a [u8]>,
}

impl<'a> DataReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            cursor: Cursor::new(data),
        }
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position()
    }

    pub fn has_more(&self) -> bool {
        self.remaining() > 0
    }

    fn require(&self, needed: usize) -> HibikiResult<()> {
        if self.remaining() < needed {
            return Err(HibikiError::ReadOutOfBounds {
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> HibikiResult<u8> {
        self.require(1)?;
        Ok(self.cursor.read_u8()?)
    }

    pub fn read_u16(&mut self) -> HibikiResult<u16> {
        self.require(2)?;
        Ok(self.cursor.read_u16::<BigEndian>()?)
    }

    pub fn read_u16_le(&mut self) -> HibikiResult<u16> {
        self.require(2)?;
        Ok(self.cursor.read_u16::<LittleEndian>()?)
    }

    pub fn read_u24(&mut self) -> HibikiResult<u32> {
        self.require(3)?;
        Ok(self.cursor.read_u24::<BigEndian>()?)
    }

    pub fn read_u32(&mut self) -> HibikiResult<u32> {
        self.require(4)?;
        Ok(self.cursor.read_u32::<BigEndian>()?)
    }

    pub fn read_u32_le(&mut self) -> HibikiResult<u32> {
        self.require(4)?;
        Ok(self.cursor.read_u32::<LittleEndian>()?)
    }

    pub fn read_u64(&mut self) -> HibikiResult<u64> {
        self.require(8)?;
        Ok(self.cursor.read_u64::<BigEndian>()?)
    }

    pub fn read_u64_le(&mut self) -> HibikiResult<u64> {
        self.require(8)?;
        Ok(self.cursor.read_u64::<LittleEndian>()?)
    }

    pub fn read_bytes(&mut self, count: usize) -> HibikiResult<&'a [u8]> {
        self.require(count)?;
        let start = self.position();
        self.cursor.set_position((start + count) as u64);
        Ok(&self.data[start..start + count])
    }

    pub fn skip(&mut self, count: usize) -> HibikiResult<()> {
        self.require(count)?;
        self.cursor.set_position((self.position() + count) as u64);
        Ok(())
    }

    pub fn seek(&mut self, position: usize) -> HibikiResult<()> {
        if position > self.data.len() {
            return Err(HibikiError::ReadOutOfBounds {
                needed: position - self.data.len(),
                remaining: 0,
            });
        }
        self.cursor.set_position(position as u64);
        Ok(())
    }

    pub fn rewind(&mut self) {
        self.cursor.set_position(0);
    }
}

/// Decode a byte blob as text. A BOM selects the encoding; without one,
/// NUL bytes in the first two code units hint at BOM-less UTF-16 of
/// ASCII-range text, otherwise the data is treated as UTF-8.
pub fn decode_string(data: &[u8]) -> HibikiResult<String> {
    if data.starts_with(&[0xef, 0xbb, 0xbf]) {
        return decode_utf8(&data[3..]);
    }
    if data.starts_with(&[0xfe, 0xff]) {
        return decode_utf16(&data[2..], false);
    }
    if data.starts_with(&[0xff, 0xfe]) {
        return decode_utf16(&data[2..], true);
    }
    if data.len() >= 4 && data[0] == 0 && data[2] == 0 {
        return decode_utf16(data, false);
    }
    if data.len() >= 4 && data[1] == 0 && data[3] == 0 {
        return decode_utf16(data, true);
    }
    decode_utf8(data)
}

fn decode_utf8(data: &[u8]) -> HibikiResult<String> {
    std::str::from_utf8(data)
        .map(str::to_string)
        .map_err(|e| HibikiError::InvalidStringData(e.to_string()))
}

fn decode_utf16(data: &[u8], little_endian: bool) -> HibikiResult<String> {
    if data.len() % 2 != 0 {
        return Err(HibikiError::InvalidStringData(
            "UTF-16 data with odd length".to_string(),
        ));
    }
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| {
            if little_endian {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16(&units).map_err(|e| HibikiError::InvalidStringData(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_reads() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut reader = DataReader::new(&data);

        assert_eq!(reader.read_u8().unwrap(), 0x01);
        assert_eq!(reader.read_u16().unwrap(), 0x0203);
        assert_eq!(reader.read_u24().unwrap(), 0x040506);
        assert_eq!(reader.read_u16_le().unwrap(), 0x0807);
        assert!(!reader.has_more());
        assert!(reader.read_u8().is_err());
    }

    #[test]
    fn test_seek_rewind_skip() {
        let data = [0u8, 1, 2, 3];
        let mut reader = DataReader::new(&data);

        reader.skip(2).unwrap();
        assert_eq!(reader.read_u8().unwrap(), 2);

        reader.rewind();
        assert_eq!(reader.read_u8().unwrap(), 0);

        reader.seek(3).unwrap();
        assert_eq!(reader.read_u8().unwrap(), 3);
        assert!(reader.seek(5).is_err());
        assert!(reader.skip(1).is_err());
    }

    #[test]
    fn test_decode_string_utf8() {
        assert_eq!(decode_string(b"hello").unwrap(), "hello");
        assert_eq!(decode_string(&[0xef, 0xbb, 0xbf, b'h', b'i']).unwrap(), "hi");
        assert!(decode_string(&[0xc3, 0x28]).is_err());
    }

    #[test]
    fn test_decode_string_utf16() {
        // BOM-tagged big endian
        assert_eq!(decode_string(&[0xfe, 0xff, 0x00, b'a', 0x00, b'b']).unwrap(), "ab");
        // BOM-tagged little endian
        assert_eq!(decode_string(&[0xff, 0xfe, b'a', 0x00, b'b', 0x00]).unwrap(), "ab");
        // heuristics for BOM-less ASCII-range text
        assert_eq!(decode_string(&[b'a', 0x00, b'b', 0x00]).unwrap(), "ab");
        assert_eq!(decode_string(&[0x00, b'a', 0x00, b'b']).unwrap(), "ab");
    }
}
