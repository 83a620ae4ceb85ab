use std::any::TypeId;

use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};
use crate::marker::{Marker, ext_marker_for_len, fixext_marker_for_len};
use crate::registry::{Entry, PackBinding, PackHandler, PackRegistry, resolve_pack_entry};
use crate::value::{HandlerOutcome, OtherValue, Value};

/// Value-driven MessagePack encoder.
///
/// Walks an in-memory [`Value`] graph and appends bytes to an owned output
/// buffer, flushing to a sink on demand. Integers are emitted in their
/// shortest valid form; `F32`/`F64` always emit binary32/binary64
/// respectively, so the wire width reflects the value's own variant rather
/// than being narrowed to fit (narrowing would make it impossible for the
/// unpacker to recover which variant was written); composite values are
/// written by recursive descent.
#[derive(Default)]
pub struct Packer {
    buf: ByteBuffer,
    registry: PackRegistry,
}

impl Packer {
    pub fn new() -> Self {
        Self::default()
    }

    #[tracing::instrument(level = "trace", skip(self, v))]
    pub fn write(&mut self, v: &Value) -> Result<()> {
        match v {
            Value::Nil => self.write_nil(),
            Value::Bool(b) => self.write_bool(*b),
            Value::Int(i) => self.write_int(*i),
            Value::UInt(u) => self.write_uint(*u),
            Value::F32(f) => self.write_f32(*f),
            Value::F64(f) => self.write_f64(*f),
            Value::Str(s) | Value::Symbol(s) => self.write_str(s),
            Value::Bin(b) => self.write_bin(b),
            Value::Array(items) => {
                self.write_array_header(items.len() as u64)?;
                for item in items {
                    self.write(item)?;
                }
                Ok(())
            }
            Value::Map(pairs) => {
                self.write_map_header(pairs.len() as u64)?;
                for (k, v) in pairs {
                    self.write(k)?;
                    self.write(v)?;
                }
                Ok(())
            }
            Value::Ext(ext) => {
                self.write_exttype_header(ext.payload.len() as u64, ext.typecode)?;
                self.buf.append(&ext.payload);
                Ok(())
            }
            Value::Other(other) => self.write_other(other),
        }
    }

    fn write_other(&mut self, other: &OtherValue) -> Result<()> {
        match resolve_pack_entry(&self.registry, other.type_id()) {
            None => other.write_fallback(self),
            Some(Entry::Refuse) => Err(Error::TypeRefused(format!("{:?}", other.type_id()))),
            Some(Entry::Bind(binding)) => {
                let outcome = (binding.handler)(other.as_any(), self)?;
                match (binding.typecode, outcome) {
                    (Some(t), HandlerOutcome::Payload(bytes)) => {
                        self.write_exttype_header(bytes.len() as u64, t)?;
                        self.buf.append(&bytes);
                        Ok(())
                    }
                    (None, HandlerOutcome::WroteDirectly) => Ok(()),
                    (Some(_), HandlerOutcome::WroteDirectly) => Err(
                        Error::HandlerProtocolViolation(
                            "high-level handler wrote directly instead of returning a payload"
                                .to_string(),
                        ),
                    ),
                    (None, HandlerOutcome::Payload(_)) => Err(Error::HandlerProtocolViolation(
                        "low-level handler returned a payload instead of writing directly"
                            .to_string(),
                    )),
                }
            }
        }
    }

    pub fn write_nil(&mut self) -> Result<()> {
        self.buf.append(&[Marker::Nil as u8]);
        Ok(())
    }

    pub fn write_bool(&mut self, b: bool) -> Result<()> {
        self.buf
            .append(&[if b { Marker::True as u8 } else { Marker::False as u8 }]);
        Ok(())
    }

    pub fn write_int(&mut self, i: i64) -> Result<()> {
        if i >= 0 {
            return self.write_uint(i as u64);
        }
        if i >= -32 {
            self.buf.append(&[i as i8 as u8]);
        } else if i >= i8::MIN as i64 {
            self.buf.append(&[Marker::Int8 as u8, i as i8 as u8]);
        } else if i >= i16::MIN as i64 {
            self.buf.append(&[Marker::Int16 as u8]);
            self.buf.append(&(i as i16).to_be_bytes());
        } else if i >= i32::MIN as i64 {
            self.buf.append(&[Marker::Int32 as u8]);
            self.buf.append(&(i as i32).to_be_bytes());
        } else {
            self.buf.append(&[Marker::Int64 as u8]);
            self.buf.append(&i.to_be_bytes());
        }
        Ok(())
    }

    pub fn write_uint(&mut self, u: u64) -> Result<()> {
        if u <= 0x7f {
            self.buf.append(&[u as u8]);
        } else if u <= u8::MAX as u64 {
            self.buf.append(&[Marker::UInt8 as u8, u as u8]);
        } else if u <= u16::MAX as u64 {
            self.buf.append(&[Marker::UInt16 as u8]);
            self.buf.append(&(u as u16).to_be_bytes());
        } else if u <= u32::MAX as u64 {
            self.buf.append(&[Marker::UInt32 as u8]);
            self.buf.append(&(u as u32).to_be_bytes());
        } else {
            self.buf.append(&[Marker::UInt64 as u8]);
            self.buf.append(&u.to_be_bytes());
        }
        Ok(())
    }

    pub fn write_f32(&mut self, f: f32) -> Result<()> {
        self.buf.append(&[Marker::F32 as u8]);
        self.buf.append(&f.to_be_bytes());
        Ok(())
    }

    pub fn write_f64(&mut self, f: f64) -> Result<()> {
        self.buf.append(&[Marker::F64 as u8]);
        self.buf.append(&f.to_be_bytes());
        Ok(())
    }

    pub fn write_str(&mut self, s: &str) -> Result<()> {
        let len = s.len() as u64;
        if len <= 31 {
            self.buf.append(&[0xa0 | len as u8]);
        } else if len <= u8::MAX as u64 {
            self.buf.append(&[Marker::Str8 as u8, len as u8]);
        } else if len <= u16::MAX as u64 {
            self.buf.append(&[Marker::Str16 as u8]);
            self.buf.append(&(len as u16).to_be_bytes());
        } else if len <= u32::MAX as u64 {
            self.buf.append(&[Marker::Str32 as u8]);
            self.buf.append(&(len as u32).to_be_bytes());
        } else {
            return Err(Error::RangeError(format!(
                "string of {len} bytes exceeds the 2^32-1 length limit"
            )));
        }
        self.buf.append(s.as_bytes());
        Ok(())
    }

    pub fn write_bin(&mut self, b: &[u8]) -> Result<()> {
        let len = b.len() as u64;
        if len <= u8::MAX as u64 {
            self.buf.append(&[Marker::Bin8 as u8, len as u8]);
        } else if len <= u16::MAX as u64 {
            self.buf.append(&[Marker::Bin16 as u8]);
            self.buf.append(&(len as u16).to_be_bytes());
        } else if len <= u32::MAX as u64 {
            self.buf.append(&[Marker::Bin32 as u8]);
            self.buf.append(&(len as u32).to_be_bytes());
        } else {
            return Err(Error::RangeError(format!(
                "binary payload of {len} bytes exceeds the 2^32-1 length limit"
            )));
        }
        self.buf.append(b);
        Ok(())
    }

    pub fn write_array_header(&mut self, n: u64) -> Result<()> {
        if n <= 15 {
            self.buf.append(&[0x90 | n as u8]);
        } else if n <= u16::MAX as u64 {
            self.buf.append(&[Marker::Array16 as u8]);
            self.buf.append(&(n as u16).to_be_bytes());
        } else if n <= u32::MAX as u64 {
            self.buf.append(&[Marker::Array32 as u8]);
            self.buf.append(&(n as u32).to_be_bytes());
        } else {
            return Err(Error::RangeError(format!(
                "array of {n} elements exceeds the 2^32-1 length limit"
            )));
        }
        Ok(())
    }

    pub fn write_map_header(&mut self, n: u64) -> Result<()> {
        if n <= 15 {
            self.buf.append(&[0x80 | n as u8]);
        } else if n <= u16::MAX as u64 {
            self.buf.append(&[Marker::Map16 as u8]);
            self.buf.append(&(n as u16).to_be_bytes());
        } else if n <= u32::MAX as u64 {
            self.buf.append(&[Marker::Map32 as u8]);
            self.buf.append(&(n as u32).to_be_bytes());
        } else {
            return Err(Error::RangeError(format!(
                "map of {n} entries exceeds the 2^32-1 length limit"
            )));
        }
        Ok(())
    }

    pub fn write_exttype_header(&mut self, len: u64, typecode: i8) -> Result<()> {
        if !(0..=127).contains(&typecode) {
            return Err(Error::RangeError(format!(
                "extension typecode {typecode} outside the 0..=127 range"
            )));
        }
        if len > u32::MAX as u64 {
            return Err(Error::RangeError(format!(
                "extension payload of {len} bytes exceeds the 2^32-1 length limit"
            )));
        }
        let len = len as u32;
        if let Some(marker) = fixext_marker_for_len(len) {
            self.buf.append(&[marker as u8, typecode as u8]);
            return Ok(());
        }
        match ext_marker_for_len(len) {
            Marker::Ext8 => self.buf.append(&[Marker::Ext8 as u8, len as u8]),
            Marker::Ext16 => {
                self.buf.append(&[Marker::Ext16 as u8]);
                self.buf.append(&(len as u16).to_be_bytes());
            }
            _ => {
                self.buf.append(&[Marker::Ext32 as u8]);
                self.buf.append(&len.to_be_bytes());
            }
        }
        self.buf.append(&[typecode as u8]);
        Ok(())
    }

    /// Registers a high-level extension handler for `type_id`: on match,
    /// the handler returns a payload and the packer frames it with an
    /// extension header using `typecode`.
    pub fn register_exttype(
        &mut self,
        type_id: TypeId,
        typecode: i8,
        handler: PackHandler,
    ) -> Result<()> {
        if !(0..=127).contains(&typecode) {
            return Err(Error::RangeError(format!(
                "extension typecode {typecode} outside the 0..=127 range"
            )));
        }
        self.registry.set(
            type_id,
            Some(Entry::Bind(PackBinding {
                typecode: Some(typecode),
                handler,
            })),
        );
        Ok(())
    }

    /// Registers a low-level extension handler: on match, the handler is
    /// responsible for writing the complete header and body itself.
    pub fn register_lowlevel(&mut self, type_id: TypeId, handler: PackHandler) {
        self.registry.set(
            type_id,
            Some(Entry::Bind(PackBinding {
                typecode: None,
                handler,
            })),
        );
    }

    pub fn refuse_type(&mut self, type_id: TypeId) {
        self.registry.set(type_id, Some(Entry::Refuse));
    }

    pub fn set_default_refuse(&mut self, refuse: bool) {
        self.registry
            .set_default(refuse.then_some(Entry::Refuse));
    }

    pub fn flush_to(&mut self, sink: &mut impl std::io::Write) -> Result<()> {
        self.buf.flush_to(sink).map_err(Error::from)
    }

    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_slice()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(v: Value) -> Vec<u8> {
        let mut p = Packer::new();
        p.write(&v).unwrap();
        p.into_vec()
    }

    #[test]
    fn scalars_match_literal_scenarios() {
        assert_eq!(encode(Value::Nil), vec![0xc0]);
        assert_eq!(encode(Value::Bool(true)), vec![0xc3]);
        assert_eq!(encode(Value::Bool(false)), vec![0xc2]);
        assert_eq!(encode(Value::Int(0)), vec![0x00]);
        assert_eq!(encode(Value::Int(127)), vec![0x7f]);
        assert_eq!(encode(Value::Int(-1)), vec![0xff]);
        assert_eq!(encode(Value::Int(-32)), vec![0xe0]);
        assert_eq!(encode(Value::Int(128)), vec![0xcc, 0x80]);
        assert_eq!(encode(Value::Int(255)), vec![0xcc, 0xff]);
        assert_eq!(encode(Value::Int(256)), vec![0xcd, 0x01, 0x00]);
        assert_eq!(encode(Value::Int(-33)), vec![0xd0, 0xdf]);
        assert_eq!(encode(Value::Int(-129)), vec![0xd1, 0xff, 0x7f]);
    }

    #[test]
    fn strings_use_fixstr_for_empty_and_short() {
        assert_eq!(encode(Value::Str("abc".into())), vec![0xa3, b'a', b'b', b'c']);
        assert_eq!(encode(Value::Str(String::new())), vec![0xa0]);
    }

    #[test]
    fn array_and_map_match_literal_scenarios() {
        assert_eq!(
            encode(Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)])),
            vec![0x93, 0x01, 0x02, 0x03]
        );
        assert_eq!(
            encode(Value::Map(vec![
                (Value::Str("a".into()), Value::Int(1)),
                (Value::Str("b".into()), Value::Int(2)),
            ])),
            vec![0x82, 0xa1, b'a', 0x01, 0xa1, b'b', 0x02]
        );
    }

    #[test]
    fn floats_keep_the_wire_width_of_their_own_variant() {
        // F64(2.0) would narrow losslessly through f32, but must still emit
        // binary64 so the unpacker can recover the F64 variant.
        assert_eq!(encode(Value::F64(2.0)), vec![0xcb, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(encode(Value::F32(2.0)), vec![0xca, 0x40, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn fixext4_matches_literal_scenario() {
        let ext = Value::Ext(crate::value::ExtValue::new(7, vec![1, 2, 3, 4]));
        assert_eq!(encode(ext), vec![0xd6, 0x07, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn packing_twice_is_deterministic() {
        let v = Value::Array(vec![Value::Int(1), Value::Str("x".into())]);
        assert_eq!(encode(v.clone()), encode(v));
    }
}
