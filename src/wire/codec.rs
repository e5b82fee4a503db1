//! Primitive encodings shared by every message layout.
//!
//! Integers are little-endian, strings carry a 7-bit variable-length byte
//! count, buffers an `int32` byte count, and GUIDs travel as their
//! hyphenated string form.

use bytes::{Buf, BufMut, BytesMut};
use uuid::Uuid;

use crate::contract::ContractType;
use crate::error::{WireError, WireResult};
use crate::types::FieldValue;

/// Cursor over a received payload.  Every read is bounds-checked.
pub struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Fails if anything is left unread.
    pub fn finish(self) -> WireResult<()> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }

    fn need(&self, needed: usize) -> WireResult<()> {
        if self.buf.remaining() < needed {
            return Err(WireError::Truncated {
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> WireResult<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_i8(&mut self) -> WireResult<i8> {
        self.need(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn read_bool(&mut self) -> WireResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i16(&mut self) -> WireResult<i16> {
        self.need(2)?;
        Ok(self.buf.get_i16_le())
    }

    pub fn read_u16(&mut self) -> WireResult<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_i32(&mut self) -> WireResult<i32> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_u32(&mut self) -> WireResult<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_i64(&mut self) -> WireResult<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn read_u64(&mut self) -> WireResult<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    /// An `int32` element count.  Negative counts are malformed.
    pub fn read_count(&mut self) -> WireResult<usize> {
        let count = self.read_i32()?;
        usize::try_from(count).map_err(|_| WireError::NegativeLength(count))
    }

    pub fn read_bytes(&mut self, len: usize) -> WireResult<Vec<u8>> {
        self.need(len)?;
        let bytes = self.buf[..len].to_vec();
        self.buf.advance(len);
        Ok(bytes)
    }

    fn read_7bit_len(&mut self) -> WireResult<usize> {
        let mut value: u32 = 0;
        for shift in (0..35).step_by(7) {
            let byte = self.read_u8()?;
            value |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value as usize);
            }
        }
        Err(WireError::BadStringLength)
    }

    pub fn read_string(&mut self) -> WireResult<String> {
        let len = self.read_7bit_len()?;
        let bytes = self.read_bytes(len)?;
        Ok(String::from_utf8(bytes)?)
    }

    pub fn read_buffer(&mut self) -> WireResult<Vec<u8>> {
        let len = self.read_count()?;
        self.read_bytes(len)
    }

    pub fn read_guid(&mut self) -> WireResult<Uuid> {
        let text = self.read_string()?;
        Uuid::parse_str(&text).map_err(|_| WireError::InvalidGuid(text))
    }

    pub fn read_contract_type(&mut self) -> WireResult<ContractType> {
        let tag = self.read_u8()?;
        ContractType::try_from(tag).map_err(WireError::UnknownContractType)
    }

    /// Reads one value of the declared type.  The value is consumed in full
    /// even if the caller goes on to discard it.
    pub fn read_value(&mut self, ty: ContractType) -> WireResult<FieldValue> {
        Ok(match ty {
            ContractType::Int8 => FieldValue::Int8(self.read_i8()?),
            ContractType::Int16 => FieldValue::Int16(self.read_i16()?),
            ContractType::Int32 => FieldValue::Int32(self.read_i32()?),
            ContractType::Int64 => FieldValue::Int64(self.read_i64()?),
            ContractType::UInt8 => FieldValue::UInt8(self.read_u8()?),
            ContractType::UInt16 => FieldValue::UInt16(self.read_u16()?),
            ContractType::UInt32 => FieldValue::UInt32(self.read_u32()?),
            ContractType::UInt64 => FieldValue::UInt64(self.read_u64()?),
            ContractType::String => FieldValue::String(self.read_string()?),
            ContractType::Buffer => FieldValue::Buffer(self.read_buffer()?),
            ContractType::Guid => FieldValue::Guid(self.read_guid()?),
        })
    }
}

/// Growable payload under construction.
#[derive(Default)]
pub struct PayloadWriter {
    buf: BytesMut,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> BytesMut {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64_le(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    /// Element counts are `int32` on the wire.
    pub fn write_count(&mut self, count: usize) {
        self.write_i32(i32::try_from(count).unwrap_or(i32::MAX));
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn write_string(&mut self, s: &str) {
        let mut len = s.len();
        while len >= 0x80 {
            self.buf.put_u8((len as u8 & 0x7f) | 0x80);
            len >>= 7;
        }
        self.buf.put_u8(len as u8);
        self.buf.put_slice(s.as_bytes());
    }

    pub fn write_buffer(&mut self, bytes: &[u8]) {
        self.write_count(bytes.len());
        self.buf.put_slice(bytes);
    }

    pub fn write_guid(&mut self, id: &Uuid) {
        self.write_string(&id.hyphenated().to_string());
    }

    pub fn write_value(&mut self, value: &FieldValue) {
        match value {
            FieldValue::Int8(v) => self.buf.put_i8(*v),
            FieldValue::Int16(v) => self.buf.put_i16_le(*v),
            FieldValue::Int32(v) => self.buf.put_i32_le(*v),
            FieldValue::Int64(v) => self.buf.put_i64_le(*v),
            FieldValue::UInt8(v) => self.buf.put_u8(*v),
            FieldValue::UInt16(v) => self.buf.put_u16_le(*v),
            FieldValue::UInt32(v) => self.buf.put_u32_le(*v),
            FieldValue::UInt64(v) => self.buf.put_u64_le(*v),
            FieldValue::String(s) => self.write_string(s),
            FieldValue::Buffer(b) => self.write_buffer(b),
            FieldValue::Guid(g) => self.write_guid(g),
        }
    }
}
