//! Binary encoding and decoding of compiled chunks
//!
//! The `.ssasm` format is little-endian: a 4-byte magic, a u16 version, then
//! length-prefixed sections in a fixed order — constants, strings, function
//! prototypes (recursive), protocols, code, line table, optional debug info.

use crate::chunk::{
    Chunk, Constant, DebugInfo, FunctionPrototype, LocalVarInfo, ParamDefault, ProtocolDef,
    ProtocolMethodReq, ProtocolPropertyReq, UpvalueInfo,
};
use std::sync::Arc;
use thiserror::Error;

/// Magic number for SlateScript bytecode files
pub const MAGIC: [u8; 4] = *b"SSBC";

/// Current bytecode format version
pub const VERSION: u16 = 1;

/// Errors that can occur during bytecode decoding
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Unexpected end of bytecode stream
    #[error("Unexpected end of bytecode at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid UTF-8 string
    #[error("Invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),

    /// Invalid tag byte in a tagged section
    #[error("Invalid tag {0} at offset {1}")]
    InvalidTag(u8, usize),
}

/// Chunk-level encoding/decoding errors
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Decode error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected SSBC, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported bytecode version: {0} (current: {VERSION})")]
    UnsupportedVersion(u16),
}

/// Bytecode writer accumulating a little-endian binary buffer
pub struct BytecodeWriter {
    buffer: Vec<u8>,
}

impl BytecodeWriter {
    /// Create a new writer
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Current offset (length of buffer)
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// Consume the writer and return the buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 16-bit unsigned integer
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 32-bit unsigned integer
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit signed integer
    pub fn emit_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a 64-bit float
    pub fn emit_f64(&mut self, value: f64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Emit a length-prefixed UTF-8 string
    pub fn emit_string(&mut self, s: &str) {
        self.emit_u32(s.len() as u32);
        self.buffer.extend_from_slice(s.as_bytes());
    }

    /// Emit raw bytes
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }
}

impl Default for BytecodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Bytecode reader over a little-endian binary buffer
pub struct BytecodeReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BytecodeReader<'a> {
    /// Create a reader over a byte slice
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Current read offset
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.offset + len > self.data.len() {
            return Err(DecodeError::UnexpectedEnd(self.offset));
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    /// Read a raw byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Read a 16-bit unsigned integer
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a 32-bit unsigned integer
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a 64-bit signed integer
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(buf))
    }

    /// Read a 64-bit float
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(buf))
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let at = self.offset;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(at))
    }

    /// Read raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, DecodeError> {
        Ok(self.take(len)?.to_vec())
    }
}

// Constant tags
const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;

// Param-default kinds
const DEFAULT_NONE: u8 = 0;
const DEFAULT_CONST: u8 = 1;
const DEFAULT_STRING: u8 = 2;

fn encode_constant(writer: &mut BytecodeWriter, c: &Constant) {
    match c {
        Constant::Null => writer.emit_u8(TAG_NULL),
        Constant::Bool(b) => {
            writer.emit_u8(TAG_BOOL);
            writer.emit_u8(*b as u8);
        }
        Constant::Int(i) => {
            writer.emit_u8(TAG_INT);
            writer.emit_i64(*i);
        }
        Constant::Float(f) => {
            writer.emit_u8(TAG_FLOAT);
            writer.emit_f64(*f);
        }
    }
}

fn decode_constant(reader: &mut BytecodeReader<'_>) -> Result<Constant, DecodeError> {
    let at = reader.offset();
    match reader.read_u8()? {
        TAG_NULL => Ok(Constant::Null),
        TAG_BOOL => Ok(Constant::Bool(reader.read_u8()? != 0)),
        TAG_INT => Ok(Constant::Int(reader.read_i64()?)),
        TAG_FLOAT => Ok(Constant::Float(reader.read_f64()?)),
        tag => Err(DecodeError::InvalidTag(tag, at)),
    }
}

fn encode_prototype(writer: &mut BytecodeWriter, proto: &FunctionPrototype) {
    writer.emit_string(&proto.name);

    writer.emit_u32(proto.params.len() as u32);
    for p in &proto.params {
        writer.emit_string(p);
    }

    writer.emit_u32(proto.param_labels.len() as u32);
    for l in &proto.param_labels {
        writer.emit_string(l);
    }

    writer.emit_u32(proto.param_defaults.len() as u32);
    for d in &proto.param_defaults {
        writer.emit_u8(d.has_default as u8);
        if let Some(s) = &d.string_value {
            writer.emit_u8(DEFAULT_STRING);
            writer.emit_string(s);
        } else if let Some(c) = &d.value {
            writer.emit_u8(DEFAULT_CONST);
            encode_constant(writer, c);
        } else {
            writer.emit_u8(DEFAULT_NONE);
        }
    }

    encode_chunk(writer, &proto.chunk);

    writer.emit_u32(proto.upvalues.len() as u32);
    for uv in &proto.upvalues {
        writer.emit_u16(uv.index);
        writer.emit_u8(uv.is_local as u8);
    }

    writer.emit_u8(proto.is_initializer as u8);
    writer.emit_u8(proto.is_override as u8);
}

fn decode_prototype(reader: &mut BytecodeReader<'_>) -> Result<FunctionPrototype, DecodeError> {
    let name = reader.read_string()?;

    let param_count = reader.read_u32()? as usize;
    let mut params = Vec::with_capacity(param_count);
    for _ in 0..param_count {
        params.push(reader.read_string()?);
    }

    let label_count = reader.read_u32()? as usize;
    let mut param_labels = Vec::with_capacity(label_count);
    for _ in 0..label_count {
        param_labels.push(reader.read_string()?);
    }

    let default_count = reader.read_u32()? as usize;
    let mut param_defaults = Vec::with_capacity(default_count);
    for _ in 0..default_count {
        let has_default = reader.read_u8()? != 0;
        let at = reader.offset();
        let (value, string_value) = match reader.read_u8()? {
            DEFAULT_NONE => (None, None),
            DEFAULT_CONST => (Some(decode_constant(reader)?), None),
            DEFAULT_STRING => (None, Some(reader.read_string()?)),
            tag => return Err(DecodeError::InvalidTag(tag, at)),
        };
        param_defaults.push(ParamDefault {
            has_default,
            value,
            string_value,
        });
    }

    let chunk = Arc::new(decode_chunk(reader)?);

    let upvalue_count = reader.read_u32()? as usize;
    let mut upvalues = Vec::with_capacity(upvalue_count);
    for _ in 0..upvalue_count {
        let index = reader.read_u16()?;
        let is_local = reader.read_u8()? != 0;
        upvalues.push(UpvalueInfo { index, is_local });
    }

    let is_initializer = reader.read_u8()? != 0;
    let is_override = reader.read_u8()? != 0;

    Ok(FunctionPrototype {
        name,
        params,
        param_labels,
        param_defaults,
        chunk,
        upvalues,
        is_initializer,
        is_override,
    })
}

fn encode_protocol(writer: &mut BytecodeWriter, protocol: &ProtocolDef) {
    writer.emit_string(&protocol.name);

    writer.emit_u32(protocol.method_requirements.len() as u32);
    for req in &protocol.method_requirements {
        writer.emit_string(&req.name);
        writer.emit_u32(req.param_names.len() as u32);
        for p in &req.param_names {
            writer.emit_string(p);
        }
        writer.emit_u8(req.is_mutating as u8);
    }

    writer.emit_u32(protocol.property_requirements.len() as u32);
    for req in &protocol.property_requirements {
        writer.emit_string(&req.name);
        writer.emit_u8(req.has_getter as u8);
        writer.emit_u8(req.has_setter as u8);
    }

    writer.emit_u32(protocol.inherited_protocols.len() as u32);
    for p in &protocol.inherited_protocols {
        writer.emit_string(p);
    }
}

fn decode_protocol(reader: &mut BytecodeReader<'_>) -> Result<ProtocolDef, DecodeError> {
    let name = reader.read_string()?;

    let method_count = reader.read_u32()? as usize;
    let mut method_requirements = Vec::with_capacity(method_count);
    for _ in 0..method_count {
        let name = reader.read_string()?;
        let param_count = reader.read_u32()? as usize;
        let mut param_names = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            param_names.push(reader.read_string()?);
        }
        let is_mutating = reader.read_u8()? != 0;
        method_requirements.push(ProtocolMethodReq {
            name,
            param_names,
            is_mutating,
        });
    }

    let property_count = reader.read_u32()? as usize;
    let mut property_requirements = Vec::with_capacity(property_count);
    for _ in 0..property_count {
        let name = reader.read_string()?;
        let has_getter = reader.read_u8()? != 0;
        let has_setter = reader.read_u8()? != 0;
        property_requirements.push(ProtocolPropertyReq {
            name,
            has_getter,
            has_setter,
        });
    }

    let inherited_count = reader.read_u32()? as usize;
    let mut inherited_protocols = Vec::with_capacity(inherited_count);
    for _ in 0..inherited_count {
        inherited_protocols.push(reader.read_string()?);
    }

    Ok(ProtocolDef {
        name,
        method_requirements,
        property_requirements,
        inherited_protocols,
    })
}

fn encode_chunk(writer: &mut BytecodeWriter, chunk: &Chunk) {
    writer.emit_u32(chunk.constants.len() as u32);
    for c in &chunk.constants {
        encode_constant(writer, c);
    }

    writer.emit_u32(chunk.strings.len() as u32);
    for s in &chunk.strings {
        writer.emit_string(s);
    }

    writer.emit_u32(chunk.functions.len() as u32);
    for proto in &chunk.functions {
        encode_prototype(writer, proto);
    }

    writer.emit_u32(chunk.protocols.len() as u32);
    for protocol in &chunk.protocols {
        encode_protocol(writer, protocol);
    }

    writer.emit_u32(chunk.code.len() as u32);
    writer.emit_bytes(&chunk.code);

    writer.emit_u32(chunk.lines.len() as u32);
    for line in &chunk.lines {
        writer.emit_u32(*line);
    }

    match &chunk.debug_info {
        Some(debug) => {
            writer.emit_u8(1);
            writer.emit_string(&debug.source_file);
            writer.emit_u32(debug.locals.len() as u32);
            for local in &debug.locals {
                writer.emit_string(&local.name);
                writer.emit_u16(local.slot);
                writer.emit_u32(local.scope_start);
                writer.emit_u32(local.scope_end);
            }
        }
        None => writer.emit_u8(0),
    }
}

fn decode_chunk(reader: &mut BytecodeReader<'_>) -> Result<Chunk, DecodeError> {
    let constant_count = reader.read_u32()? as usize;
    let mut constants = Vec::with_capacity(constant_count);
    for _ in 0..constant_count {
        constants.push(decode_constant(reader)?);
    }

    let string_count = reader.read_u32()? as usize;
    let mut strings = Vec::with_capacity(string_count);
    for _ in 0..string_count {
        strings.push(reader.read_string()?);
    }

    let function_count = reader.read_u32()? as usize;
    let mut functions = Vec::with_capacity(function_count);
    for _ in 0..function_count {
        functions.push(decode_prototype(reader)?);
    }

    let protocol_count = reader.read_u32()? as usize;
    let mut protocols = Vec::with_capacity(protocol_count);
    for _ in 0..protocol_count {
        protocols.push(decode_protocol(reader)?);
    }

    let code_len = reader.read_u32()? as usize;
    let code = reader.read_bytes(code_len)?;

    let line_count = reader.read_u32()? as usize;
    let mut lines = Vec::with_capacity(line_count);
    for _ in 0..line_count {
        lines.push(reader.read_u32()?);
    }

    let debug_info = if reader.read_u8()? != 0 {
        let source_file = reader.read_string()?;
        let local_count = reader.read_u32()? as usize;
        let mut locals = Vec::with_capacity(local_count);
        for _ in 0..local_count {
            let name = reader.read_string()?;
            let slot = reader.read_u16()?;
            let scope_start = reader.read_u32()?;
            let scope_end = reader.read_u32()?;
            locals.push(LocalVarInfo {
                name,
                slot,
                scope_start,
                scope_end,
            });
        }
        Some(DebugInfo {
            source_file,
            locals,
        })
    } else {
        None
    };

    Ok(Chunk {
        code,
        lines,
        constants,
        strings,
        functions,
        protocols,
        debug_info,
    })
}

impl Chunk {
    /// Serialize this chunk (and everything it nests) to the `.ssasm` format
    pub fn serialize(&self) -> Vec<u8> {
        let mut writer = BytecodeWriter::new();
        writer.emit_bytes(&MAGIC);
        writer.emit_u16(VERSION);
        encode_chunk(&mut writer, self);
        writer.into_bytes()
    }

    /// Deserialize a chunk from the `.ssasm` format
    pub fn deserialize(data: &[u8]) -> Result<Self, ChunkError> {
        let mut reader = BytecodeReader::new(data);

        let magic = reader.read_bytes(4).map_err(DecodeError::from)?;
        let magic: [u8; 4] = magic.try_into().expect("read_bytes(4) returned 4 bytes");
        if magic != MAGIC {
            return Err(ChunkError::InvalidMagic(magic));
        }

        let version = reader.read_u16().map_err(DecodeError::from)?;
        if version != VERSION {
            return Err(ChunkError::UnsupportedVersion(version));
        }

        Ok(decode_chunk(&mut reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    fn sample_chunk() -> Chunk {
        let mut chunk = Chunk::new();
        let k = chunk.add_constant(Constant::Int(42)) as u8;
        let s = chunk.add_string("greeting") as u16;
        chunk.write_op(Opcode::Const, 1);
        chunk.write(k, 1);
        chunk.write_op(Opcode::Str, 2);
        chunk.write_u16(s, 2);
        chunk.write_op(Opcode::Halt, 3);
        chunk
    }

    #[test]
    fn test_empty_chunk_roundtrip() {
        let chunk = Chunk::new();
        let bytes = chunk.serialize();
        let decoded = Chunk::deserialize(&bytes).unwrap();

        assert!(decoded.code.is_empty());
        assert!(decoded.constants.is_empty());
        assert!(decoded.strings.is_empty());
        assert!(decoded.debug_info.is_none());
    }

    #[test]
    fn test_chunk_roundtrip() {
        let chunk = sample_chunk();
        let bytes = chunk.serialize();
        let decoded = Chunk::deserialize(&bytes).unwrap();

        assert_eq!(decoded.code, chunk.code);
        assert_eq!(decoded.lines, chunk.lines);
        assert_eq!(decoded.constants, chunk.constants);
        assert_eq!(decoded.strings, chunk.strings);
    }

    #[test]
    fn test_nested_prototype_roundtrip() {
        let mut body = Chunk::new();
        body.write_op(Opcode::Nil, 1);
        body.write_op(Opcode::Return, 1);

        let mut proto = FunctionPrototype::new("inner", Arc::new(body));
        proto.params = vec!["self".into(), "x".into()];
        proto.param_labels = vec![String::new(), "with".into()];
        proto.param_defaults = vec![
            ParamDefault::default(),
            ParamDefault {
                has_default: true,
                value: Some(Constant::Int(1)),
                string_value: None,
            },
        ];
        proto.upvalues = vec![UpvalueInfo {
            index: 3,
            is_local: true,
        }];
        proto.is_initializer = true;

        let mut chunk = Chunk::new();
        chunk.add_function(proto);

        let decoded = Chunk::deserialize(&chunk.serialize()).unwrap();
        let p = &decoded.functions[0];
        assert_eq!(p.name, "inner");
        assert_eq!(p.params, vec!["self".to_string(), "x".to_string()]);
        assert_eq!(p.param_labels[1], "with");
        assert!(p.param_defaults[1].has_default);
        assert_eq!(p.param_defaults[1].value, Some(Constant::Int(1)));
        assert_eq!(p.upvalues, vec![UpvalueInfo { index: 3, is_local: true }]);
        assert!(p.is_initializer);
        assert!(!p.is_override);
        assert_eq!(p.chunk.code.len(), 2);
    }

    #[test]
    fn test_protocol_roundtrip() {
        let mut chunk = Chunk::new();
        chunk.add_protocol(ProtocolDef {
            name: "Drawable".into(),
            method_requirements: vec![ProtocolMethodReq {
                name: "draw".into(),
                param_names: vec!["self".into()],
                is_mutating: false,
            }],
            property_requirements: vec![ProtocolPropertyReq {
                name: "bounds".into(),
                has_getter: true,
                has_setter: false,
            }],
            inherited_protocols: vec!["Printable".into()],
        });

        let decoded = Chunk::deserialize(&chunk.serialize()).unwrap();
        assert_eq!(decoded.protocols, chunk.protocols);
    }

    #[test]
    fn test_debug_info_roundtrip() {
        let mut chunk = sample_chunk();
        chunk.debug_info = Some(DebugInfo {
            source_file: "main.slate".into(),
            locals: vec![LocalVarInfo {
                name: "total".into(),
                slot: 2,
                scope_start: 4,
                scope_end: 0,
            }],
        });

        let decoded = Chunk::deserialize(&chunk.serialize()).unwrap();
        let debug = decoded.debug_info.unwrap();
        assert_eq!(debug.source_file, "main.slate");
        assert_eq!(debug.locals.len(), 1);
        assert_eq!(debug.locals[0].name, "total");
        assert_eq!(debug.locals[0].slot, 2);
        assert_eq!(debug.locals[0].scope_end, 0);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = sample_chunk().serialize();
        bytes[0] = b'X';
        assert!(matches!(
            Chunk::deserialize(&bytes),
            Err(ChunkError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = sample_chunk().serialize();
        bytes[4] = 0xFF;
        bytes[5] = 0xFF;
        assert!(matches!(
            Chunk::deserialize(&bytes),
            Err(ChunkError::UnsupportedVersion(0xFFFF))
        ));
    }

    #[test]
    fn test_truncated_input() {
        let bytes = sample_chunk().serialize();
        let result = Chunk::deserialize(&bytes[..bytes.len() - 3]);
        assert!(matches!(
            result,
            Err(ChunkError::Decode(DecodeError::UnexpectedEnd(_)))
        ));
    }
}
