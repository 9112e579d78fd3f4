// constant_pool.rs - Constant pool reading and building
//
// The reader keeps the pool as parsed and resolves symbolic references on
// demand. The builder interns entries so every distinct constant is written
// once; indices are handed out in first-use order.

use crate::bytes::{ByteReader, ByteWriter};
use crate::error::{Error, Result};
use crate::instruction::Constant;
use crate::mutf8;
use std::collections::HashMap;

const UTF8: u8 = 1;
const INTEGER: u8 = 3;
const FLOAT: u8 = 4;
const LONG: u8 = 5;
const DOUBLE: u8 = 6;
const CLASS: u8 = 7;
const STRING: u8 = 8;
const FIELDREF: u8 = 9;
const METHODREF: u8 = 10;
const INTERFACE_METHODREF: u8 = 11;
const NAME_AND_TYPE: u8 = 12;
const METHOD_HANDLE: u8 = 15;
const METHOD_TYPE: u8 = 16;
const DYNAMIC: u8 = 17;
const INVOKE_DYNAMIC: u8 = 18;
const MODULE: u8 = 19;
const PACKAGE: u8 = 20;

/// A parsed constant pool entry
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// Slot 0 and the slot after a long/double
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    Dynamic(u16, u16),
    InvokeDynamic(u16, u16),
    Module(u16),
    Package(u16),
}

/// A resolved field or method reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub interface: bool,
}

/// Constant pool of a parsed class
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Entry>,
}

impl ConstantPool {
    pub fn parse(reader: &mut ByteReader<'_>) -> Result<Self> {
        let count = reader.u16()? as usize;
        if count == 0 {
            return Err(Error::binary("constant pool count is zero"));
        }
        let mut entries = Vec::with_capacity(count);
        entries.push(Entry::Unusable);
        while entries.len() < count {
            let index = entries.len();
            let tag = reader.u8()?;
            let entry = match tag {
                UTF8 => {
                    let len = reader.u16()? as usize;
                    let raw = reader.bytes(len)?;
                    let text = mutf8::decode(raw)
                        .map_err(|e| Error::binary(format!("constant #{}: {}", index, e)))?;
                    Entry::Utf8(text)
                }
                INTEGER => Entry::Integer(reader.i32()?),
                FLOAT => Entry::Float(f32::from_bits(reader.u32()?)),
                LONG => Entry::Long(reader.u64()? as i64),
                DOUBLE => Entry::Double(f64::from_bits(reader.u64()?)),
                CLASS => Entry::Class(reader.u16()?),
                STRING => Entry::String(reader.u16()?),
                FIELDREF => Entry::FieldRef(reader.u16()?, reader.u16()?),
                METHODREF => Entry::MethodRef(reader.u16()?, reader.u16()?),
                INTERFACE_METHODREF => Entry::InterfaceMethodRef(reader.u16()?, reader.u16()?),
                NAME_AND_TYPE => Entry::NameAndType(reader.u16()?, reader.u16()?),
                METHOD_HANDLE => Entry::MethodHandle(reader.u8()?, reader.u16()?),
                METHOD_TYPE => Entry::MethodType(reader.u16()?),
                DYNAMIC => Entry::Dynamic(reader.u16()?, reader.u16()?),
                INVOKE_DYNAMIC => Entry::InvokeDynamic(reader.u16()?, reader.u16()?),
                MODULE => Entry::Module(reader.u16()?),
                PACKAGE => Entry::Package(reader.u16()?),
                other => {
                    return Err(Error::binary(format!(
                        "unknown constant pool tag {} at #{}",
                        other, index
                    )))
                }
            };
            let wide = matches!(entry, Entry::Long(_) | Entry::Double(_));
            entries.push(entry);
            if wide {
                entries.push(Entry::Unusable);
            }
        }
        if entries.len() > count {
            return Err(Error::binary("long/double constant overruns the pool"));
        }
        Ok(ConstantPool { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, index: u16) -> Result<&Entry> {
        match self.entries.get(index as usize) {
            Some(Entry::Unusable) | None => {
                Err(Error::binary(format!("invalid constant pool index #{}", index)))
            }
            Some(entry) => Ok(entry),
        }
    }

    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Entry::Utf8(s) => Ok(s),
            other => Err(unexpected(index, "Utf8", other)),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Entry::Class(name) => self.utf8(*name),
            other => Err(unexpected(index, "Class", other)),
        }
    }

    /// Class name, or `None` for index 0
    pub fn optional_class(&self, index: u16) -> Result<Option<&str>> {
        if index == 0 {
            Ok(None)
        } else {
            self.class_name(index).map(Some)
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.get(index)? {
            Entry::NameAndType(name, descriptor) => Ok((self.utf8(*name)?, self.utf8(*descriptor)?)),
            other => Err(unexpected(index, "NameAndType", other)),
        }
    }

    pub fn member_ref(&self, index: u16) -> Result<MemberRef> {
        let (class, nat, interface) = match self.get(index)? {
            Entry::FieldRef(c, n) | Entry::MethodRef(c, n) => (*c, *n, false),
            Entry::InterfaceMethodRef(c, n) => (*c, *n, true),
            other => return Err(unexpected(index, "member reference", other)),
        };
        let (name, descriptor) = self.name_and_type(nat)?;
        Ok(MemberRef {
            owner: self.class_name(class)?.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            interface,
        })
    }

    pub fn is_field_ref(&self, index: u16) -> bool {
        matches!(self.get(index), Ok(Entry::FieldRef(..)))
    }

    /// A loadable constant (`ldc` operands and `ConstantValue`)
    pub fn constant(&self, index: u16) -> Result<Constant> {
        match self.get(index)? {
            Entry::Integer(v) => Ok(Constant::Int(*v)),
            Entry::Float(v) => Ok(Constant::Float(*v)),
            Entry::Long(v) => Ok(Constant::Long(*v)),
            Entry::Double(v) => Ok(Constant::Double(*v)),
            Entry::String(s) => Ok(Constant::String(self.utf8(*s)?.to_string())),
            Entry::Class(c) => Ok(Constant::Type(self.utf8(*c)?.to_string())),
            Entry::MethodHandle(..) | Entry::MethodType(_) | Entry::Dynamic(..) => Err(Error::binary(
                format!("unsupported dynamic constant at #{}", index),
            )),
            other => Err(unexpected(index, "loadable constant", other)),
        }
    }
}

fn unexpected(index: u16, wanted: &str, found: &Entry) -> Error {
    Error::binary(format!(
        "constant #{} should be {}, found {:?}",
        index, wanted, found
    ))
}

/// Interning key; also the entry written out
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    NameAndType(u16, u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
}

/// Interning constant pool builder
#[derive(Debug)]
pub struct PoolBuilder {
    entries: Vec<Key>,
    index: HashMap<Key, u16>,
    /// Next free slot (slot 0 is never used)
    next: u32,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        PoolBuilder {
            entries: Vec::new(),
            index: HashMap::new(),
            next: 1,
        }
    }
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, key: Key) -> u16 {
        if let Some(&index) = self.index.get(&key) {
            return index;
        }
        // Overflow is reported by `write`; the truncated index is never emitted.
        let index = self.next as u16;
        self.next += if matches!(key, Key::Long(_) | Key::Double(_)) { 2 } else { 1 };
        self.index.insert(key.clone(), index);
        self.entries.push(key);
        index
    }

    pub fn utf8(&mut self, text: &str) -> u16 {
        self.intern(Key::Utf8(text.to_string()))
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name = self.utf8(name);
        self.intern(Key::Class(name))
    }

    pub fn string(&mut self, text: &str) -> u16 {
        let text = self.utf8(text);
        self.intern(Key::String(text))
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.intern(Key::NameAndType(name, descriptor))
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(owner);
        let nat = self.name_and_type(name, descriptor);
        self.intern(Key::FieldRef(class, nat))
    }

    pub fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str, interface: bool) -> u16 {
        let class = self.class(owner);
        let nat = self.name_and_type(name, descriptor);
        if interface {
            self.intern(Key::InterfaceMethodRef(class, nat))
        } else {
            self.intern(Key::MethodRef(class, nat))
        }
    }

    pub fn constant(&mut self, constant: &Constant) -> u16 {
        match constant {
            Constant::Int(v) => self.intern(Key::Integer(*v)),
            Constant::Float(v) => self.intern(Key::Float(v.to_bits())),
            Constant::Long(v) => self.intern(Key::Long(*v)),
            Constant::Double(v) => self.intern(Key::Double(v.to_bits())),
            Constant::String(s) => self.string(s),
            Constant::Type(t) => self.class(t),
        }
    }

    /// Write `constant_pool_count` and the entries
    pub fn write(&self, out: &mut ByteWriter) -> Result<()> {
        let count = u16::try_from(self.next)
            .map_err(|_| Error::tree(format!("constant pool overflow ({} slots)", self.next)))?;
        out.u16(count);
        for key in &self.entries {
            match key {
                Key::Utf8(text) => {
                    let bytes = mutf8::encode(text);
                    let len = u16::try_from(bytes.len())
                        .map_err(|_| Error::tree("string constant longer than 65535 bytes"))?;
                    out.u8(UTF8);
                    out.u16(len);
                    out.bytes(&bytes);
                }
                Key::Integer(v) => {
                    out.u8(INTEGER);
                    out.i32(*v);
                }
                Key::Float(bits) => {
                    out.u8(FLOAT);
                    out.u32(*bits);
                }
                Key::Long(v) => {
                    out.u8(LONG);
                    out.u64(*v as u64);
                }
                Key::Double(bits) => {
                    out.u8(DOUBLE);
                    out.u64(*bits);
                }
                Key::Class(name) => {
                    out.u8(CLASS);
                    out.u16(*name);
                }
                Key::String(text) => {
                    out.u8(STRING);
                    out.u16(*text);
                }
                Key::NameAndType(name, descriptor) => {
                    out.u8(NAME_AND_TYPE);
                    out.u16(*name);
                    out.u16(*descriptor);
                }
                Key::FieldRef(class, nat) => {
                    out.u8(FIELDREF);
                    out.u16(*class);
                    out.u16(*nat);
                }
                Key::MethodRef(class, nat) => {
                    out.u8(METHODREF);
                    out.u16(*class);
                    out.u16(*nat);
                }
                Key::InterfaceMethodRef(class, nat) => {
                    out.u8(INTERFACE_METHODREF);
                    out.u16(*class);
                    out.u16(*nat);
                }
            }
        }
        Ok(())
    }
}
