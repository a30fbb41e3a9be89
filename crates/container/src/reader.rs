use crate::error::DecodeError;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    Little,
    Big,
}

/// Bounds-checked, endian-aware view over one image.
///
/// All offsets are relative to the start of the slice, which for fat
/// containers is the start of the architecture's image.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    endian: Endian,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8], endian: Endian) -> Self {
        Self { data, endian }
    }

    pub(crate) fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8], DecodeError> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or(DecodeError::OutOfBounds { offset, len })
    }

    pub(crate) fn u32(&self, offset: usize) -> Result<u32, DecodeError> {
        let buf = self.bytes(offset, 4)?;
        Ok(match self.endian {
            Endian::Little => LittleEndian::read_u32(buf),
            Endian::Big => BigEndian::read_u32(buf),
        })
    }

    pub(crate) fn i32(&self, offset: usize) -> Result<i32, DecodeError> {
        self.u32(offset).map(|v| v as i32)
    }

    pub(crate) fn u64(&self, offset: usize) -> Result<u64, DecodeError> {
        let buf = self.bytes(offset, 8)?;
        Ok(match self.endian {
            Endian::Little => LittleEndian::read_u64(buf),
            Endian::Big => BigEndian::read_u64(buf),
        })
    }

    /// Pointer-sized field: 8 bytes in 64-bit images, 4 otherwise.
    pub(crate) fn word(&self, offset: usize, is_64: bool) -> Result<u64, DecodeError> {
        if is_64 {
            self.u64(offset)
        } else {
            self.u32(offset).map(u64::from)
        }
    }

    /// Fixed-width name field padded with NULs, such as `segname[16]`.
    pub(crate) fn fixed_name(&self, offset: usize, len: usize) -> Result<String, DecodeError> {
        let raw = self.bytes(offset, len)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// NUL-terminated string starting at `offset`, bounded by `limit`.
    pub(crate) fn c_string(&self, offset: usize, limit: usize) -> Result<String, DecodeError> {
        let limit = limit.min(self.data.len());
        let raw = self
            .data
            .get(offset..limit)
            .ok_or(DecodeError::OutOfBounds { offset, len: 1 })?;
        let end = raw
            .iter()
            .position(|&b| b == 0)
            .ok_or(DecodeError::Unterminated(offset))?;
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }
}
