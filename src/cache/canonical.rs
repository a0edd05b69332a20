//! Canonical Argument Encoding
//!
//! A serde serializer that turns call arguments into a byte stream which is
//! identical for equal values, regardless of how they were represented:
//!
//! - every integer width collapses to one tagged 128-bit form
//! - map and struct entries are sorted by their encoded key
//! - struct field names encode like string map keys
//! - newtype wrappers encode as their inner value
//! - `None`, `Some(x)` and `()` each carry their own tag
//!
//! Values without a stable encoding (non-finite floats, duplicate map keys,
//! serializer errors raised by user impls) are rejected.

use std::fmt::Display;

use serde::ser::{self, Serialize};
use thiserror::Error;

use crate::error::{CacheError, Result};

// == Tags ==
const TAG_NONE: u8 = b'N';
const TAG_SOME: u8 = b'S';
const TAG_UNIT: u8 = b'u';
const TAG_TRUE: u8 = b'T';
const TAG_FALSE: u8 = b'F';
const TAG_INT: u8 = b'i';
const TAG_UINT_WIDE: u8 = b'U';
const TAG_FLOAT: u8 = b'f';
const TAG_STR: u8 = b's';
const TAG_BYTES: u8 = b'b';
const TAG_SEQ: u8 = b'L';
const TAG_MAP: u8 = b'M';
const TAG_UNIT_VARIANT: u8 = b'e';
const TAG_VARIANT: u8 = b'E';

#[derive(Debug, Error)]
#[error("{0}")]
pub(crate) struct EncodeError(String);

impl ser::Error for EncodeError {
    fn custom<T: Display>(msg: T) -> Self {
        EncodeError(msg.to_string())
    }
}

type EncodeResult = std::result::Result<(), EncodeError>;

/// Encodes a value canonically, mapping failures to `UnhashableArgument`.
pub(crate) fn encode<T: ?Sized + Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    value
        .serialize(Encoder { out: &mut out })
        .map_err(|err| CacheError::unhashable(err.0))?;
    Ok(out)
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u64).to_be_bytes());
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.push(TAG_STR);
    write_len(out, s.len());
    out.extend_from_slice(s.as_bytes());
}

fn write_int(out: &mut Vec<u8>, v: i128) {
    out.push(TAG_INT);
    out.extend_from_slice(&v.to_be_bytes());
}

fn write_variant_header(out: &mut Vec<u8>, variant: &str) {
    out.push(TAG_VARIANT);
    write_str(out, variant);
}

// == Encoder ==
struct Encoder<'a> {
    out: &'a mut Vec<u8>,
}

impl<'a> Encoder<'a> {
    fn seq(self) -> SeqEncoder<'a> {
        self.out.push(TAG_SEQ);
        SeqEncoder {
            out: self.out,
            buf: Vec::new(),
            count: 0,
        }
    }

    fn map(self) -> MapEncoder<'a> {
        self.out.push(TAG_MAP);
        MapEncoder {
            out: self.out,
            entries: Vec::new(),
            pending_key: None,
        }
    }
}

impl<'a> ser::Serializer for Encoder<'a> {
    type Ok = ();
    type Error = EncodeError;
    type SerializeSeq = SeqEncoder<'a>;
    type SerializeTuple = SeqEncoder<'a>;
    type SerializeTupleStruct = SeqEncoder<'a>;
    type SerializeTupleVariant = SeqEncoder<'a>;
    type SerializeMap = MapEncoder<'a>;
    type SerializeStruct = MapEncoder<'a>;
    type SerializeStructVariant = MapEncoder<'a>;

    fn serialize_bool(self, v: bool) -> EncodeResult {
        self.out.push(if v { TAG_TRUE } else { TAG_FALSE });
        Ok(())
    }

    fn serialize_i8(self, v: i8) -> EncodeResult {
        self.serialize_i128(v.into())
    }

    fn serialize_i16(self, v: i16) -> EncodeResult {
        self.serialize_i128(v.into())
    }

    fn serialize_i32(self, v: i32) -> EncodeResult {
        self.serialize_i128(v.into())
    }

    fn serialize_i64(self, v: i64) -> EncodeResult {
        self.serialize_i128(v.into())
    }

    fn serialize_i128(self, v: i128) -> EncodeResult {
        write_int(self.out, v);
        Ok(())
    }

    fn serialize_u8(self, v: u8) -> EncodeResult {
        self.serialize_i128(v.into())
    }

    fn serialize_u16(self, v: u16) -> EncodeResult {
        self.serialize_i128(v.into())
    }

    fn serialize_u32(self, v: u32) -> EncodeResult {
        self.serialize_i128(v.into())
    }

    fn serialize_u64(self, v: u64) -> EncodeResult {
        self.serialize_i128(v.into())
    }

    fn serialize_u128(self, v: u128) -> EncodeResult {
        match i128::try_from(v) {
            Ok(narrow) => write_int(self.out, narrow),
            Err(_) => {
                self.out.push(TAG_UINT_WIDE);
                self.out.extend_from_slice(&v.to_be_bytes());
            }
        }
        Ok(())
    }

    fn serialize_f32(self, v: f32) -> EncodeResult {
        self.serialize_f64(v.into())
    }

    fn serialize_f64(self, v: f64) -> EncodeResult {
        if !v.is_finite() {
            return Err(EncodeError(format!(
                "non-finite float {} has no stable equality",
                v
            )));
        }
        // -0.0 == 0.0, so both must share one encoding
        let v = if v == 0.0 { 0.0 } else { v };
        self.out.push(TAG_FLOAT);
        self.out.extend_from_slice(&v.to_bits().to_be_bytes());
        Ok(())
    }

    fn serialize_char(self, v: char) -> EncodeResult {
        let mut buf = [0u8; 4];
        write_str(self.out, v.encode_utf8(&mut buf));
        Ok(())
    }

    fn serialize_str(self, v: &str) -> EncodeResult {
        write_str(self.out, v);
        Ok(())
    }

    fn serialize_bytes(self, v: &[u8]) -> EncodeResult {
        self.out.push(TAG_BYTES);
        write_len(self.out, v.len());
        self.out.extend_from_slice(v);
        Ok(())
    }

    fn serialize_none(self) -> EncodeResult {
        self.out.push(TAG_NONE);
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> EncodeResult {
        self.out.push(TAG_SOME);
        value.serialize(self)
    }

    fn serialize_unit(self) -> EncodeResult {
        self.out.push(TAG_UNIT);
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> EncodeResult {
        self.serialize_unit()
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> EncodeResult {
        self.out.push(TAG_UNIT_VARIANT);
        write_str(self.out, variant);
        Ok(())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> EncodeResult {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> EncodeResult {
        write_variant_header(self.out, variant);
        value.serialize(self)
    }

    fn serialize_seq(self, _len: Option<usize>) -> std::result::Result<SeqEncoder<'a>, EncodeError> {
        Ok(self.seq())
    }

    fn serialize_tuple(self, _len: usize) -> std::result::Result<SeqEncoder<'a>, EncodeError> {
        Ok(self.seq())
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> std::result::Result<SeqEncoder<'a>, EncodeError> {
        Ok(self.seq())
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> std::result::Result<SeqEncoder<'a>, EncodeError> {
        write_variant_header(self.out, variant);
        Ok(self.seq())
    }

    fn serialize_map(self, _len: Option<usize>) -> std::result::Result<MapEncoder<'a>, EncodeError> {
        Ok(self.map())
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> std::result::Result<MapEncoder<'a>, EncodeError> {
        Ok(self.map())
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> std::result::Result<MapEncoder<'a>, EncodeError> {
        write_variant_header(self.out, variant);
        Ok(self.map())
    }
}

// == Sequences ==
struct SeqEncoder<'a> {
    out: &'a mut Vec<u8>,
    buf: Vec<u8>,
    count: usize,
}

impl SeqEncoder<'_> {
    fn push<T: ?Sized + Serialize>(&mut self, value: &T) -> EncodeResult {
        value.serialize(Encoder { out: &mut self.buf })?;
        self.count += 1;
        Ok(())
    }

    fn finish(self) -> EncodeResult {
        write_len(self.out, self.count);
        self.out.extend_from_slice(&self.buf);
        Ok(())
    }
}

impl ser::SerializeSeq for SeqEncoder<'_> {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> EncodeResult {
        self.push(value)
    }

    fn end(self) -> EncodeResult {
        self.finish()
    }
}

impl ser::SerializeTuple for SeqEncoder<'_> {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> EncodeResult {
        self.push(value)
    }

    fn end(self) -> EncodeResult {
        self.finish()
    }
}

impl ser::SerializeTupleStruct for SeqEncoder<'_> {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> EncodeResult {
        self.push(value)
    }

    fn end(self) -> EncodeResult {
        self.finish()
    }
}

impl ser::SerializeTupleVariant for SeqEncoder<'_> {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> EncodeResult {
        self.push(value)
    }

    fn end(self) -> EncodeResult {
        self.finish()
    }
}

// == Maps ==
struct MapEncoder<'a> {
    out: &'a mut Vec<u8>,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pending_key: Option<Vec<u8>>,
}

impl MapEncoder<'_> {
    fn push_entry<V: ?Sized + Serialize>(&mut self, key: Vec<u8>, value: &V) -> EncodeResult {
        let mut encoded = Vec::new();
        value.serialize(Encoder { out: &mut encoded })?;
        self.entries.push((key, encoded));
        Ok(())
    }

    fn finish(mut self) -> EncodeResult {
        self.entries.sort_by(|a, b| a.0.cmp(&b.0));
        if self.entries.windows(2).any(|pair| pair[0].0 == pair[1].0) {
            return Err(EncodeError("map contains duplicate keys".to_string()));
        }

        write_len(self.out, self.entries.len());
        for (key, value) in &self.entries {
            self.out.extend_from_slice(key);
            self.out.extend_from_slice(value);
        }
        Ok(())
    }
}

impl ser::SerializeMap for MapEncoder<'_> {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> EncodeResult {
        let mut encoded = Vec::new();
        key.serialize(Encoder { out: &mut encoded })?;
        self.pending_key = Some(encoded);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> EncodeResult {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| EncodeError("map value serialized before its key".to_string()))?;
        self.push_entry(key, value)
    }

    fn end(self) -> EncodeResult {
        self.finish()
    }
}

impl ser::SerializeStruct for MapEncoder<'_> {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> EncodeResult {
        let mut encoded = Vec::new();
        write_str(&mut encoded, key);
        self.push_entry(encoded, value)
    }

    fn end(self) -> EncodeResult {
        self.finish()
    }
}

impl ser::SerializeStructVariant for MapEncoder<'_> {
    type Ok = ();
    type Error = EncodeError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> EncodeResult {
        let mut encoded = Vec::new();
        write_str(&mut encoded, key);
        self.push_entry(encoded, value)
    }

    fn end(self) -> EncodeResult {
        self.finish()
    }
}
