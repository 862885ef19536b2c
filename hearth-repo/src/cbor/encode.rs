use super::CodecError;
use lexicon_cid::serde::CID_SERDE_PRIVATE_IDENTIFIER;
use serde::ser::{self, Serialize};

const MAJOR_UINT: u8 = 0;
const MAJOR_NINT: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_TAG: u8 = 6;

const SIMPLE_FALSE: u8 = 0xf4;
const SIMPLE_TRUE: u8 = 0xf5;
const SIMPLE_NULL: u8 = 0xf6;

fn write_head(out: &mut Vec<u8>, major: u8, value: u64) {
    let m = major << 5;
    if value < 24 {
        out.push(m | value as u8);
    } else if value <= 0xff {
        out.push(m | 24);
        out.push(value as u8);
    } else if value <= 0xffff {
        out.push(m | 25);
        out.extend_from_slice(&(value as u16).to_be_bytes());
    } else if value <= 0xffff_ffff {
        out.push(m | 26);
        out.extend_from_slice(&(value as u32).to_be_bytes());
    } else {
        out.push(m | 27);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

/// Canonical serializer writing into a byte buffer.
pub struct Encoder<'a> {
    out: &'a mut Vec<u8>,
}

impl<'a> Encoder<'a> {
    pub fn new(out: &'a mut Vec<u8>) -> Self {
        Encoder { out }
    }

    fn write_link(self, cid_bytes: &[u8]) -> Result<(), CodecError> {
        write_head(self.out, MAJOR_TAG, 42);
        write_head(self.out, MAJOR_BYTES, cid_bytes.len() as u64 + 1);
        self.out.push(0x00);
        self.out.extend_from_slice(cid_bytes);
        Ok(())
    }
}

impl<'a> ser::Serializer for Encoder<'a> {
    type Ok = ();
    type Error = CodecError;
    type SerializeSeq = SeqEncoder<'a>;
    type SerializeTuple = SeqEncoder<'a>;
    type SerializeTupleStruct = SeqEncoder<'a>;
    type SerializeTupleVariant = ser::Impossible<(), CodecError>;
    type SerializeMap = MapEncoder<'a>;
    type SerializeStruct = MapEncoder<'a>;
    type SerializeStructVariant = ser::Impossible<(), CodecError>;

    fn serialize_bool(self, v: bool) -> Result<(), CodecError> {
        self.out.push(if v { SIMPLE_TRUE } else { SIMPLE_FALSE });
        Ok(())
    }

    fn serialize_i8(self, v: i8) -> Result<(), CodecError> {
        self.serialize_i64(v as i64)
    }

    fn serialize_i16(self, v: i16) -> Result<(), CodecError> {
        self.serialize_i64(v as i64)
    }

    fn serialize_i32(self, v: i32) -> Result<(), CodecError> {
        self.serialize_i64(v as i64)
    }

    fn serialize_i64(self, v: i64) -> Result<(), CodecError> {
        if v >= 0 {
            write_head(self.out, MAJOR_UINT, v as u64);
        } else {
            write_head(self.out, MAJOR_NINT, (-1 - v) as u64);
        }
        Ok(())
    }

    fn serialize_i128(self, v: i128) -> Result<(), CodecError> {
        if (0..=u64::MAX as i128).contains(&v) {
            write_head(self.out, MAJOR_UINT, v as u64);
            Ok(())
        } else if v < 0 && -(v + 1) <= u64::MAX as i128 {
            write_head(self.out, MAJOR_NINT, (-(v + 1)) as u64);
            Ok(())
        } else {
            Err(CodecError::Unrepresentable(format!(
                "integer out of 64-bit range: {v}"
            )))
        }
    }

    fn serialize_u8(self, v: u8) -> Result<(), CodecError> {
        self.serialize_u64(v as u64)
    }

    fn serialize_u16(self, v: u16) -> Result<(), CodecError> {
        self.serialize_u64(v as u64)
    }

    fn serialize_u32(self, v: u32) -> Result<(), CodecError> {
        self.serialize_u64(v as u64)
    }

    fn serialize_u64(self, v: u64) -> Result<(), CodecError> {
        write_head(self.out, MAJOR_UINT, v);
        Ok(())
    }

    fn serialize_f32(self, _v: f32) -> Result<(), CodecError> {
        Err(CodecError::Unrepresentable("floating point".into()))
    }

    fn serialize_f64(self, _v: f64) -> Result<(), CodecError> {
        Err(CodecError::Unrepresentable("floating point".into()))
    }

    fn serialize_char(self, v: char) -> Result<(), CodecError> {
        let mut buf = [0u8; 4];
        self.serialize_str(v.encode_utf8(&mut buf))
    }

    fn serialize_str(self, v: &str) -> Result<(), CodecError> {
        write_head(self.out, MAJOR_TEXT, v.len() as u64);
        self.out.extend_from_slice(v.as_bytes());
        Ok(())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<(), CodecError> {
        write_head(self.out, MAJOR_BYTES, v.len() as u64);
        self.out.extend_from_slice(v);
        Ok(())
    }

    fn serialize_none(self) -> Result<(), CodecError> {
        self.out.push(SIMPLE_NULL);
        Ok(())
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<(), CodecError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), CodecError> {
        self.out.push(SIMPLE_NULL);
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), CodecError> {
        self.serialize_unit()
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<(), CodecError> {
        self.serialize_str(variant)
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<(), CodecError> {
        if name == CID_SERDE_PRIVATE_IDENTIFIER {
            let bytes = value.serialize(CaptureBytes)?;
            self.write_link(&bytes)
        } else {
            value.serialize(self)
        }
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _value: &T,
    ) -> Result<(), CodecError> {
        Err(CodecError::Unrepresentable(format!(
            "newtype variant {variant}"
        )))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq, CodecError> {
        let len = len.ok_or_else(|| {
            CodecError::Unrepresentable("sequence of unknown length".into())
        })?;
        write_head(self.out, MAJOR_ARRAY, len as u64);
        Ok(SeqEncoder { out: self.out })
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple, CodecError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct, CodecError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, CodecError> {
        Err(CodecError::Unrepresentable(format!(
            "tuple variant {variant}"
        )))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, CodecError> {
        Ok(MapEncoder {
            out: self.out,
            entries: Vec::new(),
            pending_key: None,
        })
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeStruct, CodecError> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, CodecError> {
        Err(CodecError::Unrepresentable(format!(
            "struct variant {variant}"
        )))
    }
}

pub struct SeqEncoder<'a> {
    out: &'a mut Vec<u8>,
}

impl<'a> ser::SerializeSeq for SeqEncoder<'a> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), CodecError> {
        value.serialize(Encoder::new(self.out))
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl<'a> ser::SerializeTuple for SeqEncoder<'a> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), CodecError> {
        value.serialize(Encoder::new(self.out))
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

impl<'a> ser::SerializeTupleStruct for SeqEncoder<'a> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), CodecError> {
        value.serialize(Encoder::new(self.out))
    }

    fn end(self) -> Result<(), CodecError> {
        Ok(())
    }
}

/// Buffers map entries so they can be emitted in canonical key order
/// regardless of the order the caller produced them in.
pub struct MapEncoder<'a> {
    out: &'a mut Vec<u8>,
    entries: Vec<(String, Vec<u8>)>,
    pending_key: Option<String>,
}

impl<'a> MapEncoder<'a> {
    fn push_entry(&mut self, key: String, value: Vec<u8>) {
        self.entries.push((key, value));
    }

    fn finish(mut self) -> Result<(), CodecError> {
        self.entries
            .sort_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        for pair in self.entries.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(CodecError::Malformed(format!(
                    "duplicate map key: {}",
                    pair[0].0
                )));
            }
        }
        write_head(self.out, MAJOR_MAP, self.entries.len() as u64);
        for (key, value) in &self.entries {
            write_head(self.out, MAJOR_TEXT, key.len() as u64);
            self.out.extend_from_slice(key.as_bytes());
            self.out.extend_from_slice(value);
        }
        Ok(())
    }
}

impl<'a> ser::SerializeMap for MapEncoder<'a> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), CodecError> {
        self.pending_key = Some(key.serialize(KeyEncoder)?);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), CodecError> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| CodecError::Malformed("map value without key".into()))?;
        let mut buf = Vec::new();
        value.serialize(Encoder::new(&mut buf))?;
        self.push_entry(key, buf);
        Ok(())
    }

    fn end(self) -> Result<(), CodecError> {
        self.finish()
    }
}

impl<'a> ser::SerializeStruct for MapEncoder<'a> {
    type Ok = ();
    type Error = CodecError;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), CodecError> {
        let mut buf = Vec::new();
        value.serialize(Encoder::new(&mut buf))?;
        self.push_entry(key.to_string(), buf);
        Ok(())
    }

    fn end(self) -> Result<(), CodecError> {
        self.finish()
    }
}

/// Map keys must be text strings; anything else is unrepresentable.
struct KeyEncoder;

macro_rules! non_string_key {
    ($($method:ident: $ty:ty,)*) => {
        $(
            fn $method(self, _v: $ty) -> Result<String, CodecError> {
                Err(CodecError::Malformed("non-string map key".into()))
            }
        )*
    };
}

impl ser::Serializer for KeyEncoder {
    type Ok = String;
    type Error = CodecError;
    type SerializeSeq = ser::Impossible<String, CodecError>;
    type SerializeTuple = ser::Impossible<String, CodecError>;
    type SerializeTupleStruct = ser::Impossible<String, CodecError>;
    type SerializeTupleVariant = ser::Impossible<String, CodecError>;
    type SerializeMap = ser::Impossible<String, CodecError>;
    type SerializeStruct = ser::Impossible<String, CodecError>;
    type SerializeStructVariant = ser::Impossible<String, CodecError>;

    non_string_key! {
        serialize_bool: bool,
        serialize_i8: i8,
        serialize_i16: i16,
        serialize_i32: i32,
        serialize_i64: i64,
        serialize_u8: u8,
        serialize_u16: u16,
        serialize_u32: u32,
        serialize_u64: u64,
        serialize_f32: f32,
        serialize_f64: f64,
        serialize_bytes: &[u8],
    }

    fn serialize_char(self, v: char) -> Result<String, CodecError> {
        Ok(v.to_string())
    }

    fn serialize_str(self, v: &str) -> Result<String, CodecError> {
        Ok(v.to_string())
    }

    fn serialize_none(self) -> Result<String, CodecError> {
        Err(CodecError::Malformed("non-string map key".into()))
    }

    fn serialize_some<T: ?Sized + Serialize>(self, _value: &T) -> Result<String, CodecError> {
        Err(CodecError::Malformed("non-string map key".into()))
    }

    fn serialize_unit(self) -> Result<String, CodecError> {
        Err(CodecError::Malformed("non-string map key".into()))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<String, CodecError> {
        Err(CodecError::Malformed("non-string map key".into()))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<String, CodecError> {
        Ok(variant.to_string())
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<String, CodecError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<String, CodecError> {
        Err(CodecError::Malformed("non-string map key".into()))
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, CodecError> {
        Err(CodecError::Malformed("non-string map key".into()))
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, CodecError> {
        Err(CodecError::Malformed("non-string map key".into()))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, CodecError> {
        Err(CodecError::Malformed("non-string map key".into()))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, CodecError> {
        Err(CodecError::Malformed("non-string map key".into()))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, CodecError> {
        Err(CodecError::Malformed("non-string map key".into()))
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, CodecError> {
        Err(CodecError::Malformed("non-string map key".into()))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, CodecError> {
        Err(CodecError::Malformed("non-string map key".into()))
    }
}

/// Extracts the raw bytes a CID serializes itself as.
struct CaptureBytes;

macro_rules! not_bytes {
    ($($method:ident: $ty:ty,)*) => {
        $(
            fn $method(self, _v: $ty) -> Result<Vec<u8>, CodecError> {
                Err(CodecError::Malformed("expected CID bytes".into()))
            }
        )*
    };
}

impl ser::Serializer for CaptureBytes {
    type Ok = Vec<u8>;
    type Error = CodecError;
    type SerializeSeq = ser::Impossible<Vec<u8>, CodecError>;
    type SerializeTuple = ser::Impossible<Vec<u8>, CodecError>;
    type SerializeTupleStruct = ser::Impossible<Vec<u8>, CodecError>;
    type SerializeTupleVariant = ser::Impossible<Vec<u8>, CodecError>;
    type SerializeMap = ser::Impossible<Vec<u8>, CodecError>;
    type SerializeStruct = ser::Impossible<Vec<u8>, CodecError>;
    type SerializeStructVariant = ser::Impossible<Vec<u8>, CodecError>;

    not_bytes! {
        serialize_bool: bool,
        serialize_i8: i8,
        serialize_i16: i16,
        serialize_i32: i32,
        serialize_i64: i64,
        serialize_u8: u8,
        serialize_u16: u16,
        serialize_u32: u32,
        serialize_u64: u64,
        serialize_f32: f32,
        serialize_f64: f64,
        serialize_char: char,
        serialize_str: &str,
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(v.to_vec())
    }

    fn serialize_none(self) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::Malformed("expected CID bytes".into()))
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Vec<u8>, CodecError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::Malformed("expected CID bytes".into()))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::Malformed("expected CID bytes".into()))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
    ) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::Malformed("expected CID bytes".into()))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Vec<u8>, CodecError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::Malformed("expected CID bytes".into()))
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, CodecError> {
        Err(CodecError::Malformed("expected CID bytes".into()))
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, CodecError> {
        Err(CodecError::Malformed("expected CID bytes".into()))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleStruct, CodecError> {
        Err(CodecError::Malformed("expected CID bytes".into()))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeTupleVariant, CodecError> {
        Err(CodecError::Malformed("expected CID bytes".into()))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, CodecError> {
        Err(CodecError::Malformed("expected CID bytes".into()))
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, CodecError> {
        Err(CodecError::Malformed("expected CID bytes".into()))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, CodecError> {
        Err(CodecError::Malformed("expected CID bytes".into()))
    }
}
