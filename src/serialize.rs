// File: src/serialize.rs
//
// Compiled bytecode file format: a flat, versioned encoding of a compiled
// `ObjFunction` tree, so a host holding a `.lumc` file can skip
// lex/parse/compile for a program it has already built. Magic
// `0xB5 'J' 's' 'r' 'C'`, a major/minor version byte, then a recursive
// function record. Not wired into the default CLI — no `compile`/`.lumc`
// subcommand exists — but complete and round-trip tested standalone.
//
// Function record layout:
//   name            length-prefixed UTF-8, empty string for an anonymous function
//   arity           u8
//   default count   u8
//   defaults        `default count` tagged constants
//   variadic        u8 (0 or 1)
//   upvalue count   u8
//   upvalues        `upvalue count` pairs of (is_local: u8, index: u8)
//   code length     u32-le
//   code            raw bytes
//   line table len  u32-le (byte length of the run-length section)
//   line runs       (count: u16-le, line: u16-le) pairs filling the section above
//   constant count  u16-le
//   constants       `constant count` tagged constants
//
// Tagged constant: one tag byte, then payload.
//   0 = Null     (no payload)
//   1 = Bool     (1 byte, 0 or 1)
//   2 = Number   (8 bytes, f64 little-endian)
//   3 = String   (length-prefixed UTF-8, u32-le length)
//   4 = Function (nested function record, no magic/version header)

use crate::bytecode::Chunk;
use crate::heap::Heap;
use crate::object::{ObjFunction, UpvalueDesc};
use crate::value::Value;

pub const MAGIC: [u8; 5] = [0xB5, b'J', b's', b'r', b'C'];
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;

#[derive(Debug)]
pub enum SerializeError {
    BadMagic,
    UnsupportedVersion(u8, u8),
    Truncated,
    UnknownConstantTag(u8),
    InvalidUtf8,
    UnsupportedConstant(&'static str),
}

impl std::fmt::Display for SerializeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SerializeError::BadMagic => write!(f, "not a Lumen bytecode file (bad magic)"),
            SerializeError::UnsupportedVersion(maj, min) => {
                write!(f, "unsupported bytecode version {}.{}", maj, min)
            }
            SerializeError::Truncated => write!(f, "truncated bytecode file"),
            SerializeError::UnknownConstantTag(tag) => write!(f, "unknown constant tag {}", tag),
            SerializeError::InvalidUtf8 => write!(f, "invalid UTF-8 in bytecode file"),
            SerializeError::UnsupportedConstant(kind) => {
                write!(f, "cannot serialize a {} constant", kind)
            }
        }
    }
}

impl std::error::Error for SerializeError {}

/// Serializes `function` as a complete bytecode file, magic and version
/// header included.
pub fn write_bytecode_file(function: &ObjFunction) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    out.push(VERSION_MAJOR);
    out.push(VERSION_MINOR);
    write_function_record(function, &mut out);
    out
}

/// Deserializes a complete bytecode file, validating the magic and version
/// header before reading the top-level function record.
pub fn read_bytecode_file(bytes: &[u8], heap: &mut Heap) -> Result<ObjFunction, SerializeError> {
    let mut r = Reader::new(bytes);
    let magic = r.take(5)?;
    if magic != MAGIC {
        return Err(SerializeError::BadMagic);
    }
    let major = r.u8()?;
    let minor = r.u8()?;
    if major != VERSION_MAJOR {
        return Err(SerializeError::UnsupportedVersion(major, minor));
    }
    read_function_record(&mut r, heap)
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn write_constant(value: &Value, out: &mut Vec<u8>) -> Result<(), SerializeError> {
    match value {
        Value::Null => out.push(0),
        Value::Bool(b) => {
            out.push(1);
            out.push(*b as u8);
        }
        Value::Number(n) => {
            out.push(2);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Value::Obj(o) if o.as_string().is_some() => {
            out.push(3);
            write_string(&o.as_string().unwrap().bytes, out);
        }
        Value::Obj(o) if o.as_function().is_some() => {
            out.push(4);
            write_function_record(o.as_function().unwrap(), out);
        }
        Value::Handle(_) => return Err(SerializeError::UnsupportedConstant("handle")),
        Value::Obj(_) => return Err(SerializeError::UnsupportedConstant("non-literal object")),
    }
    Ok(())
}

fn write_function_record(function: &ObjFunction, out: &mut Vec<u8>) {
    let name = function.name.map(|n| n.as_string().unwrap().bytes.to_string()).unwrap_or_default();
    write_string(&name, out);
    out.push(function.arity);
    out.push(function.defaults.len() as u8);
    for d in &function.defaults {
        // Defaults are restricted to literal expressions at compile time,
        // so this never hits the `Err` path a general constant could.
        write_constant(d, out).expect("default values are always literal constants");
    }
    out.push(function.variadic as u8);
    out.push(function.upvalues.len() as u8);
    for uv in &function.upvalues {
        out.push(uv.is_local as u8);
        out.push(uv.index);
    }
    out.extend_from_slice(&(function.chunk.code.len() as u32).to_le_bytes());
    out.extend_from_slice(&function.chunk.code);
    let line_runs = function.chunk.line_runs_u16();
    out.extend_from_slice(&((line_runs.len() * 4) as u32).to_le_bytes());
    for (count, line) in &line_runs {
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&line.to_le_bytes());
    }
    out.extend_from_slice(&(function.chunk.constants.len() as u16).to_le_bytes());
    for c in &function.chunk.constants {
        write_constant(c, out).expect("chunk constants are always serializable literal kinds");
    }
}

fn read_function_record(r: &mut Reader, heap: &mut Heap) -> Result<ObjFunction, SerializeError> {
    let name = r.string()?;
    let name_obj = if name.is_empty() { None } else { Some(heap.intern(&name)) };
    let arity = r.u8()?;
    let default_count = r.u8()? as usize;
    let mut defaults = Vec::with_capacity(default_count);
    for _ in 0..default_count {
        defaults.push(read_constant(r, heap)?);
    }
    let variadic = r.u8()? != 0;
    let upvalue_count = r.u8()? as usize;
    let mut upvalues = Vec::with_capacity(upvalue_count);
    for _ in 0..upvalue_count {
        let is_local = r.u8()? != 0;
        let index = r.u8()?;
        upvalues.push(UpvalueDesc { is_local, index });
    }
    let code_len = r.u32()? as usize;
    let code = r.take(code_len)?.to_vec();
    let line_bytes_len = r.u32()? as usize;
    let line_bytes = r.take(line_bytes_len)?;
    if line_bytes_len % 4 != 0 {
        return Err(SerializeError::Truncated);
    }
    let mut line_runs = Vec::with_capacity(line_bytes_len / 4);
    for chunk4 in line_bytes.chunks_exact(4) {
        let count = u16::from_le_bytes([chunk4[0], chunk4[1]]);
        let line = u16::from_le_bytes([chunk4[2], chunk4[3]]);
        line_runs.push((count, line));
    }
    let constant_count = r.u16()? as usize;
    let mut constants = Vec::with_capacity(constant_count);
    for _ in 0..constant_count {
        constants.push(read_constant(r, heap)?);
    }
    let chunk = Chunk::from_serialized(code, constants, line_runs);
    Ok(ObjFunction { name: name_obj, arity, defaults, variadic, chunk, module: None, upvalues })
}

fn read_constant(r: &mut Reader, heap: &mut Heap) -> Result<Value, SerializeError> {
    let tag = r.u8()?;
    match tag {
        0 => Ok(Value::Null),
        1 => Ok(Value::Bool(r.u8()? != 0)),
        2 => Ok(Value::Number(f64::from_le_bytes(r.take(8)?.try_into().unwrap()))),
        3 => {
            let s = r.string()?;
            Ok(Value::Obj(heap.intern(&s)))
        }
        4 => {
            let function = read_function_record(r, heap)?;
            Ok(Value::Obj(heap.alloc_function(function)))
        }
        other => Err(SerializeError::UnknownConstantTag(other)),
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SerializeError> {
        if self.pos + n > self.bytes.len() {
            return Err(SerializeError::Truncated);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, SerializeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SerializeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, SerializeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self) -> Result<String, SerializeError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SerializeError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    fn compile(source: &str, heap: &mut Heap) -> ObjFunction {
        let tokens = crate::lexer::tokenize(source).expect("lex");
        let program = crate::parser::Parser::new(tokens).parse_program().expect("parse");
        crate::compiler::Compiler::new(heap, "__test__").compile_program(&program).expect("compile")
    }

    #[test]
    fn round_trips_a_simple_function() {
        let mut heap = Heap::new();
        let function = compile("fun add(a, b) { return a + b }", &mut heap);
        let bytes = write_bytecode_file(&function);
        let restored = read_bytecode_file(&bytes, &mut heap).expect("round trip");
        assert_eq!(restored.arity, function.arity);
        assert_eq!(restored.chunk.code, function.chunk.code);
        assert_eq!(restored.chunk.constants.len(), function.chunk.constants.len());
    }

    #[test]
    fn round_trips_defaults_and_variadics() {
        let mut heap = Heap::new();
        let function = compile("fun greet(name, greeting = \"hi\", ...rest) { return greeting }", &mut heap);
        let bytes = write_bytecode_file(&function);
        let restored = read_bytecode_file(&bytes, &mut heap).expect("round trip");
        assert_eq!(restored.variadic, function.variadic);
        assert_eq!(restored.defaults.len(), function.defaults.len());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut heap = Heap::new();
        let bytes = vec![0u8, 1, 2, 3, 4, 5, 6];
        let err = read_bytecode_file(&bytes, &mut heap).unwrap_err();
        assert!(matches!(err, SerializeError::BadMagic));
    }

    #[test]
    fn line_table_is_idempotent_under_a_second_round_trip() {
        let mut heap = Heap::new();
        let function = compile("var x = 1\nvar y = 2\nvar z = x + y", &mut heap);
        let once = write_bytecode_file(&function);
        let restored = read_bytecode_file(&once, &mut heap).expect("first round trip");
        let twice = write_bytecode_file(&restored);
        assert_eq!(once, twice);
    }
}
