use super::CodecError;
use lexicon_cid::serde::CID_SERDE_PRIVATE_IDENTIFIER;
use serde::de::{self, IntoDeserializer, Visitor};
use serde::forward_to_deserialize_any;

/// Decoder over a byte slice. `strict` additionally enforces canonical map
/// key order and minimum-length heads; malformed input is rejected either
/// way.
pub struct Decoder<'de> {
    input: &'de [u8],
    pos: usize,
    strict: bool,
}

impl<'de> Decoder<'de> {
    pub fn new(input: &'de [u8], strict: bool) -> Self {
        Decoder {
            input,
            pos: 0,
            strict,
        }
    }

    pub fn finish(&self) -> Result<(), CodecError> {
        if self.pos != self.input.len() {
            return Err(CodecError::Malformed(format!(
                "{} trailing bytes after value",
                self.input.len() - self.pos
            )));
        }
        Ok(())
    }

    fn peek(&self) -> Result<u8, CodecError> {
        self.input
            .get(self.pos)
            .copied()
            .ok_or_else(|| CodecError::Malformed("unexpected end of input".into()))
    }

    fn next_byte(&mut self) -> Result<u8, CodecError> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'de [u8], CodecError> {
        if self.input.len() - self.pos < n {
            return Err(CodecError::Malformed("unexpected end of input".into()));
        }
        let slice = &self.input[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Reads a definite-length head; returns (major, value).
    fn read_head(&mut self) -> Result<(u8, u64), CodecError> {
        let initial = self.next_byte()?;
        let major = initial >> 5;
        let info = initial & 0x1f;
        let value = match info {
            0..=23 => info as u64,
            24 => {
                let v = self.next_byte()? as u64;
                if self.strict && v < 24 {
                    return Err(CodecError::Malformed("overlong head".into()));
                }
                v
            }
            25 => {
                let v = u16::from_be_bytes(self.take(2)?.try_into().unwrap()) as u64;
                if self.strict && v <= 0xff {
                    return Err(CodecError::Malformed("overlong head".into()));
                }
                v
            }
            26 => {
                let v = u32::from_be_bytes(self.take(4)?.try_into().unwrap()) as u64;
                if self.strict && v <= 0xffff {
                    return Err(CodecError::Malformed("overlong head".into()));
                }
                v
            }
            27 => {
                let v = u64::from_be_bytes(self.take(8)?.try_into().unwrap());
                if self.strict && v <= 0xffff_ffff {
                    return Err(CodecError::Malformed("overlong head".into()));
                }
                v
            }
            28..=30 => {
                return Err(CodecError::Malformed("reserved additional info".into()))
            }
            _ => return Err(CodecError::Malformed("indefinite-length item".into())),
        };
        Ok((major, value))
    }

    fn read_sized(&mut self, len: u64) -> Result<&'de [u8], CodecError> {
        let len = usize::try_from(len)
            .map_err(|_| CodecError::Malformed("length exceeds address space".into()))?;
        self.take(len)
    }

    fn read_text(&mut self) -> Result<&'de str, CodecError> {
        let (major, len) = self.read_head()?;
        if major != 3 {
            return Err(CodecError::Malformed("expected text string".into()));
        }
        std::str::from_utf8(self.read_sized(len)?)
            .map_err(|_| CodecError::Malformed("invalid utf-8 in text string".into()))
    }

    fn read_bytes(&mut self) -> Result<&'de [u8], CodecError> {
        let (major, len) = self.read_head()?;
        if major != 2 {
            return Err(CodecError::Malformed("expected byte string".into()));
        }
        self.read_sized(len)
    }

    fn read_link_bytes(&mut self) -> Result<&'de [u8], CodecError> {
        let bytes = self.read_bytes()?;
        match bytes.split_first() {
            Some((0x00, rest)) => Ok(rest),
            _ => Err(CodecError::Malformed(
                "tag 42 content missing identity prefix".into(),
            )),
        }
    }
}

impl<'de, 'a> de::Deserializer<'de> for &'a mut Decoder<'de> {
    type Error = CodecError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        let initial = self.peek()?;
        match initial >> 5 {
            0 => {
                let (_, v) = self.read_head()?;
                visitor.visit_u64(v)
            }
            1 => {
                let (_, n) = self.read_head()?;
                if n <= i64::MAX as u64 {
                    visitor.visit_i64(-1 - n as i64)
                } else {
                    visitor.visit_i128(-1 - n as i128)
                }
            }
            2 => {
                let bytes = self.read_bytes()?;
                visitor.visit_borrowed_bytes(bytes)
            }
            3 => {
                let s = self.read_text()?;
                visitor.visit_borrowed_str(s)
            }
            4 => {
                let (_, len) = self.read_head()?;
                visitor.visit_seq(SeqAccess {
                    de: self,
                    remaining: len,
                })
            }
            5 => {
                let (_, len) = self.read_head()?;
                visitor.visit_map(MapAccess {
                    de: self,
                    remaining: len,
                    seen: Vec::new(),
                })
            }
            6 => {
                let (_, tag) = self.read_head()?;
                if tag != 42 {
                    return Err(CodecError::Malformed(format!("unknown tag: {tag}")));
                }
                let cid_bytes = self.read_link_bytes()?;
                visitor.visit_newtype_struct(CidBytesDeserializer(cid_bytes))
            }
            _ => match self.next_byte()? {
                0xf4 => visitor.visit_bool(false),
                0xf5 => visitor.visit_bool(true),
                0xf6 => visitor.visit_none(),
                0xf9 | 0xfa | 0xfb => {
                    Err(CodecError::Malformed("floating point value".into()))
                }
                other => Err(CodecError::Malformed(format!(
                    "unsupported simple value: {other:#04x}"
                ))),
            },
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        if self.peek()? == 0xf6 {
            self.pos += 1;
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        if name == CID_SERDE_PRIVATE_IDENTIFIER {
            let (major, tag) = self.read_head()?;
            if major != 6 || tag != 42 {
                return Err(CodecError::Malformed("expected CID link (tag 42)".into()));
            }
            let cid_bytes = self.read_link_bytes()?;
            visitor.visit_newtype_struct(CidBytesDeserializer(cid_bytes))
        } else {
            visitor.visit_newtype_struct(self)
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, CodecError> {
        let s = self.read_text()?;
        visitor.visit_enum(s.into_deserializer())
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct seq tuple tuple_struct map struct
        identifier ignored_any
    }
}

struct SeqAccess<'a, 'de> {
    de: &'a mut Decoder<'de>,
    remaining: u64,
}

impl<'a, 'de> de::SeqAccess<'de> for SeqAccess<'a, 'de> {
    type Error = CodecError;

    fn next_element_seed<T: de::DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, CodecError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        seed.deserialize(&mut *self.de).map(Some)
    }

    fn size_hint(&self) -> Option<usize> {
        usize::try_from(self.remaining).ok()
    }
}

struct MapAccess<'a, 'de> {
    de: &'a mut Decoder<'de>,
    remaining: u64,
    seen: Vec<&'de str>,
}

impl<'a, 'de> de::MapAccess<'de> for MapAccess<'a, 'de> {
    type Error = CodecError;

    fn next_key_seed<K: de::DeserializeSeed<'de>>(
        &mut self,
        seed: K,
    ) -> Result<Option<K::Value>, CodecError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        if self.de.peek()? >> 5 != 3 {
            return Err(CodecError::Malformed("non-string map key".into()));
        }
        let key = self.de.read_text()?;
        if self.seen.contains(&key) {
            return Err(CodecError::Malformed(format!("duplicate map key: {key}")));
        }
        if self.de.strict {
            if let Some(prev) = self.seen.last() {
                let ordered = (prev.len(), prev.as_bytes()) < (key.len(), key.as_bytes());
                if !ordered {
                    return Err(CodecError::Malformed(format!(
                        "map keys out of canonical order: `{prev}` then `{key}`"
                    )));
                }
            }
        }
        self.seen.push(key);
        seed.deserialize(de::value::BorrowedStrDeserializer::new(key))
            .map(Some)
    }

    fn next_value_seed<V: de::DeserializeSeed<'de>>(
        &mut self,
        seed: V,
    ) -> Result<V::Value, CodecError> {
        seed.deserialize(&mut *self.de)
    }

    fn size_hint(&self) -> Option<usize> {
        usize::try_from(self.remaining).ok()
    }
}

/// Hands the raw multihash bytes of a link to the CID visitor.
struct CidBytesDeserializer<'de>(&'de [u8]);

impl<'de> de::Deserializer<'de> for CidBytesDeserializer<'de> {
    type Error = CodecError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, CodecError> {
        visitor.visit_borrowed_bytes(self.0)
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map struct enum identifier ignored_any
    }
}
