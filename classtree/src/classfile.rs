// classfile.rs - Class file parsing
//
// Parses the binary layout (JVMS chapter 4) into a lightly-structured
// `ClassFile`, then lowers it into a `ClassModel`. Attributes we don't carry
// into the tree are dropped with a debug log line.

use crate::bytes::ByteReader;
use crate::constant_pool::{ConstantPool, Entry};
use crate::disasm;
use crate::error::{Error, Result};
use crate::instruction::Constant;
use crate::label::LabelRegistry;
use crate::model::{Annotation, ClassModel, ElementValue, FieldModel, MethodModel};
use crate::stack_map;
use tracing::debug;

pub const MAGIC: u32 = 0xCAFE_BABE;

/// Oldest and newest supported major versions (JDK 1.1 to 21)
pub const MIN_MAJOR: u16 = 45;
pub const MAX_MAJOR: u16 = 65;

pub mod attr {
    pub const CODE: &str = "Code";
    pub const CONSTANT_VALUE: &str = "ConstantValue";
    pub const EXCEPTIONS: &str = "Exceptions";
    pub const SIGNATURE: &str = "Signature";
    pub const SOURCE_FILE: &str = "SourceFile";
    pub const STACK_MAP_TABLE: &str = "StackMapTable";
    pub const VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";
    pub const INVISIBLE_ANNOTATIONS: &str = "RuntimeInvisibleAnnotations";
}

/// A raw attribute
#[derive(Debug, Clone)]
pub struct AttributeInfo {
    pub name: String,
    pub data: Vec<u8>,
}

/// Exception table entry as stored in the binary
#[derive(Debug, Clone, Copy)]
pub struct RawHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// Class constant index, 0 for catch-all
    pub catch_type: u16,
}

/// A parsed `Code` attribute
#[derive(Debug, Clone)]
pub struct CodeInfo {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub handlers: Vec<RawHandler>,
    pub attributes: Vec<AttributeInfo>,
}

/// A field or method
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
    pub attributes: Vec<AttributeInfo>,
}

impl MemberInfo {
    pub fn attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// A parsed class file
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub pool: ConstantPool,
    pub access: u16,
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<AttributeInfo>,
}

/// Parse class file bytes
pub fn parse(data: &[u8]) -> Result<ClassFile> {
    let mut r = ByteReader::new(data);

    let magic = r.u32()?;
    if magic != MAGIC {
        return Err(Error::binary(format!(
            "not a class file (magic=0x{:08x})",
            magic
        )));
    }

    let minor_version = r.u16()?;
    let major_version = r.u16()?;
    if !(MIN_MAJOR..=MAX_MAJOR).contains(&major_version) {
        return Err(Error::binary(format!(
            "unsupported class file version {}.{}",
            major_version, minor_version
        )));
    }

    let pool = ConstantPool::parse(&mut r)?;
    let access = r.u16()?;
    let name = pool.class_name(r.u16()?)?.to_string();
    let super_name = pool.optional_class(r.u16()?)?.map(str::to_string);

    let interface_count = r.u16()?;
    let mut interfaces = Vec::with_capacity(interface_count as usize);
    for _ in 0..interface_count {
        interfaces.push(pool.class_name(r.u16()?)?.to_string());
    }

    let fields = parse_members(&mut r, &pool)?;
    let methods = parse_members(&mut r, &pool)?;
    let attributes = parse_attributes(&mut r, &pool)?;

    if r.remaining() > 0 {
        return Err(Error::binary(format!(
            "{} trailing bytes after the class file",
            r.remaining()
        )));
    }

    Ok(ClassFile {
        minor_version,
        major_version,
        pool,
        access,
        name,
        super_name,
        interfaces,
        fields,
        methods,
        attributes,
    })
}

fn parse_members(r: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Vec<MemberInfo>> {
    let count = r.u16()?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let access = r.u16()?;
        let name = pool.utf8(r.u16()?)?.to_string();
        let descriptor = pool.utf8(r.u16()?)?.to_string();
        let attributes = parse_attributes(r, pool)?;
        members.push(MemberInfo {
            access,
            name,
            descriptor,
            attributes,
        });
    }
    Ok(members)
}

fn parse_attributes(r: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Vec<AttributeInfo>> {
    let count = r.u16()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name = pool.utf8(r.u16()?)?.to_string();
        let len = r.u32()? as usize;
        let data = r.bytes(len)?.to_vec();
        attributes.push(AttributeInfo { name, data });
    }
    Ok(attributes)
}

/// Parse the body of a `Code` attribute
pub fn parse_code(data: &[u8], pool: &ConstantPool) -> Result<CodeInfo> {
    let mut r = ByteReader::new(data);
    let max_stack = r.u16()?;
    let max_locals = r.u16()?;
    let code_len = r.u32()? as usize;
    if code_len == 0 || code_len > 65535 {
        return Err(Error::binary(format!("invalid code length {}", code_len)));
    }
    let code = r.bytes(code_len)?.to_vec();
    let handler_count = r.u16()?;
    let mut handlers = Vec::with_capacity(handler_count as usize);
    for _ in 0..handler_count {
        handlers.push(RawHandler {
            start_pc: r.u16()?,
            end_pc: r.u16()?,
            handler_pc: r.u16()?,
            catch_type: r.u16()?,
        });
    }
    let attributes = parse_attributes(&mut r, pool)?;
    Ok(CodeInfo {
        max_stack,
        max_locals,
        code,
        handlers,
        attributes,
    })
}

/// Read a single `u16` constant pool reference attribute as a UTF-8 string
fn utf8_attribute<'p>(attribute: &AttributeInfo, pool: &'p ConstantPool) -> Result<&'p str> {
    let mut r = ByteReader::new(&attribute.data);
    pool.utf8(r.u16()?)
}

fn parse_annotations(data: &[u8], pool: &ConstantPool, visible: bool) -> Result<Vec<Annotation>> {
    let mut r = ByteReader::new(data);
    let count = r.u16()?;
    let mut annotations = Vec::with_capacity(count as usize);
    for _ in 0..count {
        annotations.push(parse_annotation(&mut r, pool, visible)?);
    }
    Ok(annotations)
}

fn parse_annotation(r: &mut ByteReader<'_>, pool: &ConstantPool, visible: bool) -> Result<Annotation> {
    let descriptor = pool.utf8(r.u16()?)?.to_string();
    let pairs = r.u16()?;
    let mut elements = Vec::with_capacity(pairs as usize);
    for _ in 0..pairs {
        let name = pool.utf8(r.u16()?)?.to_string();
        elements.push((name, parse_element_value(r, pool, visible)?));
    }
    Ok(Annotation {
        descriptor,
        visible,
        elements,
    })
}

fn parse_element_value(
    r: &mut ByteReader<'_>,
    pool: &ConstantPool,
    visible: bool,
) -> Result<ElementValue> {
    let tag = r.u8()? as char;
    let value = match tag {
        'B' | 'C' | 'I' | 'S' | 'Z' | 'D' | 'F' | 'J' | 's' => {
            let index = r.u16()?;
            let constant = match (tag, pool.get(index)?) {
                ('s', Entry::Utf8(s)) => Constant::String(s.clone()),
                ('D', Entry::Double(v)) => Constant::Double(*v),
                ('F', Entry::Float(v)) => Constant::Float(*v),
                ('J', Entry::Long(v)) => Constant::Long(*v),
                ('B' | 'C' | 'I' | 'S' | 'Z', Entry::Integer(v)) => Constant::Int(*v),
                (_, other) => {
                    return Err(Error::binary(format!(
                        "annotation value '{}' points at {:?}",
                        tag, other
                    )))
                }
            };
            ElementValue::Const(tag, constant)
        }
        'e' => ElementValue::Enum {
            descriptor: pool.utf8(r.u16()?)?.to_string(),
            name: pool.utf8(r.u16()?)?.to_string(),
        },
        'c' => ElementValue::Class(pool.utf8(r.u16()?)?.to_string()),
        '@' => ElementValue::Annotation(parse_annotation(r, pool, visible)?),
        '[' => {
            let count = r.u16()?;
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                values.push(parse_element_value(r, pool, visible)?);
            }
            ElementValue::Array(values)
        }
        other => {
            return Err(Error::binary(format!(
                "unknown annotation element tag '{}'",
                other
            )))
        }
    };
    Ok(value)
}

/// Collect annotations from both runtime annotation attributes
fn annotations_of(attributes: &[AttributeInfo], pool: &ConstantPool) -> Result<Vec<Annotation>> {
    let mut annotations = Vec::new();
    for attribute in attributes {
        match attribute.name.as_str() {
            attr::VISIBLE_ANNOTATIONS => {
                annotations.extend(parse_annotations(&attribute.data, pool, true)?)
            }
            attr::INVISIBLE_ANNOTATIONS => {
                annotations.extend(parse_annotations(&attribute.data, pool, false)?)
            }
            _ => {}
        }
    }
    Ok(annotations)
}

fn is_annotation(name: &str) -> bool {
    name == attr::VISIBLE_ANNOTATIONS || name == attr::INVISIBLE_ANNOTATIONS
}

impl ClassFile {
    /// Lower into the typed model, disassembling every method body
    pub fn to_model(&self) -> Result<ClassModel> {
        let pool = &self.pool;
        // One registry for the whole class; label ids are scoped per method
        let mut labels = LabelRegistry::new();

        let mut signature = None;
        let mut source_file = None;
        for attribute in &self.attributes {
            match attribute.name.as_str() {
                attr::SIGNATURE => signature = Some(utf8_attribute(attribute, pool)?.to_string()),
                attr::SOURCE_FILE => {
                    source_file = Some(utf8_attribute(attribute, pool)?.to_string())
                }
                name if is_annotation(name) => {}
                name => debug!("{}: dropping class attribute {}", self.name, name),
            }
        }

        let mut fields = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let mut model = FieldModel {
                access: field.access,
                name: field.name.clone(),
                descriptor: field.descriptor.clone(),
                signature: None,
                value: None,
                annotations: annotations_of(&field.attributes, pool)?,
            };
            for attribute in &field.attributes {
                match attribute.name.as_str() {
                    attr::SIGNATURE => {
                        model.signature = Some(utf8_attribute(attribute, pool)?.to_string())
                    }
                    attr::CONSTANT_VALUE => {
                        let mut r = ByteReader::new(&attribute.data);
                        model.value = Some(pool.constant(r.u16()?)?);
                    }
                    name if is_annotation(name) => {}
                    name => debug!("{}.{}: dropping field attribute {}", self.name, field.name, name),
                }
            }
            fields.push(model);
        }

        let mut methods = Vec::with_capacity(self.methods.len());
        for (index, method) in self.methods.iter().enumerate() {
            let mut model = MethodModel::new(method.access, &method.name, &method.descriptor);
            model.annotations = annotations_of(&method.attributes, pool)?;
            for attribute in &method.attributes {
                match attribute.name.as_str() {
                    attr::CODE => {
                        let code = parse_code(&attribute.data, pool)?;
                        for inner in &code.attributes {
                            if inner.name != attr::STACK_MAP_TABLE {
                                debug!(
                                    "{}.{}: dropping code attribute {}",
                                    self.name, method.name, inner.name
                                );
                            }
                        }
                        let scope = index.to_string();
                        let body = disasm::disassemble(&code, pool, self.major_version, &mut labels, &scope)
                            .map_err(|e| in_method(e, &self.name, &method.name))?;
                        let initial = stack_map::initial_locals(&self.name, &model);
                        let table = stack_map::read(&code, pool, &initial)
                            .map_err(|e| in_method(e, &self.name, &method.name))?;
                        model.frames = disasm::declared_frames(table, &body, &mut labels, &scope);
                        model.instructions = body.instructions;
                        model.handlers = body.handlers;
                    }
                    attr::EXCEPTIONS => {
                        let mut r = ByteReader::new(&attribute.data);
                        let count = r.u16()?;
                        for _ in 0..count {
                            model.exceptions.push(pool.class_name(r.u16()?)?.to_string());
                        }
                    }
                    attr::SIGNATURE => {
                        model.signature = Some(utf8_attribute(attribute, pool)?.to_string())
                    }
                    name if is_annotation(name) => {}
                    name => debug!(
                        "{}.{}: dropping method attribute {}",
                        self.name, method.name, name
                    ),
                }
            }
            methods.push(model);
        }

        debug!(
            "parsed {} (version {}.{}, {} fields, {} methods)",
            self.name,
            self.major_version,
            self.minor_version,
            fields.len(),
            methods.len()
        );

        Ok(ClassModel {
            minor_version: self.minor_version,
            major_version: self.major_version,
            access: self.access,
            name: self.name.clone(),
            super_name: self.super_name.clone(),
            interfaces: self.interfaces.clone(),
            signature,
            source_file,
            annotations: annotations_of(&self.attributes, pool)?,
            fields,
            methods,
        })
    }
}

/// Prefix a binary error with the method it came from
fn in_method(err: Error, class: &str, method: &str) -> Error {
    match err {
        Error::MalformedBinary { source_id, reason } => Error::MalformedBinary {
            source_id,
            reason: format!("{}.{}: {}", class, method, reason),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_magic() {
        // Invalid class file
        let bad = vec![0x00; 64];
        assert!(matches!(parse(&bad), Err(Error::MalformedBinary { .. })));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = MAGIC.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 99]);
        let err = parse(&bytes).unwrap_err();
        assert!(err.to_string().contains("unsupported class file version 99.0"));
    }

    #[test]
    fn test_truncated() {
        let mut bytes = MAGIC.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 52, 0]);
        assert!(matches!(parse(&bytes), Err(Error::MalformedBinary { .. })));
    }
}
