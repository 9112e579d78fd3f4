// stack_map.rs - StackMapTable reading
//
// Expands the compressed frame forms of a StackMapTable (JVMS 4.7.4) into
// full frames. The decoder keeps the frames at branch targets so the encoder
// can reuse the types the compiler declared; the post-encode check reads its
// own output back the same way.

use crate::bytes::ByteReader;
use crate::classfile::{attr, CodeInfo};
use crate::constant_pool::ConstantPool;
use crate::descriptor::{self, FieldType};
use crate::error::{Error, Result};
use crate::model::{FrameValue, MethodModel, CONSTRUCTOR, OBJECT};

/// First major version whose methods need a StackMapTable
pub const STACK_MAP_MAJOR: u16 = 50;

/// One expanded frame
#[derive(Debug, Clone, PartialEq)]
pub struct MapFrame {
    pub offset: u32,
    /// One entry per local, longs and doubles taking one
    pub locals: Vec<FrameValue>,
    pub stack: Vec<FrameValue>,
}

/// Locals of the implicit frame at offset 0
pub fn initial_locals(owner: &str, method: &MethodModel) -> Vec<FrameValue> {
    let mut locals = Vec::new();
    if !method.is_static() {
        locals.push(if method.name == CONSTRUCTOR && owner != OBJECT {
            FrameValue::UninitializedThis
        } else {
            FrameValue::Object(owner.to_string())
        });
    }
    if let Some(signature) = descriptor::parse_method(&method.descriptor) {
        locals.extend(signature.params.iter().map(|param| match param {
            FieldType::Long => FrameValue::Long,
            FieldType::Double => FrameValue::Double,
            FieldType::Float => FrameValue::Float,
            FieldType::Object(name) | FieldType::Array(name) => FrameValue::Object(name.clone()),
            _ => FrameValue::Integer,
        }));
    }
    locals
}

/// Read the StackMapTable of a body, if it has one
pub fn read(code: &CodeInfo, pool: &ConstantPool, initial: &[FrameValue]) -> Result<Vec<MapFrame>> {
    let Some(table) = code.attributes.iter().find(|a| a.name == attr::STACK_MAP_TABLE) else {
        return Ok(Vec::new());
    };

    let mut r = ByteReader::new(&table.data);
    let count = r.u16()?;
    let mut frames: Vec<MapFrame> = Vec::with_capacity(usize::from(count));
    let mut locals = initial.to_vec();
    for _ in 0..count {
        let kind = r.u8()?;
        let (delta, stack) = match kind {
            0..=63 => (u16::from(kind), Vec::new()),
            64..=127 => (u16::from(kind - 64), vec![value(&mut r, pool)?]),
            247 => {
                let delta = r.u16()?;
                (delta, vec![value(&mut r, pool)?])
            }
            248..=250 => {
                let delta = r.u16()?;
                let chop = usize::from(251 - kind);
                if chop > locals.len() {
                    return Err(Error::binary(format!(
                        "stack map frame chops {} of {} locals",
                        chop,
                        locals.len()
                    )));
                }
                locals.truncate(locals.len() - chop);
                (delta, Vec::new())
            }
            251 => (r.u16()?, Vec::new()),
            252..=254 => {
                let delta = r.u16()?;
                for _ in 0..(kind - 251) {
                    locals.push(value(&mut r, pool)?);
                }
                (delta, Vec::new())
            }
            255 => {
                let delta = r.u16()?;
                locals = values(&mut r, pool)?;
                (delta, values(&mut r, pool)?)
            }
            other => {
                return Err(Error::binary(format!("reserved stack map frame type {}", other)))
            }
        };
        let offset = match frames.last() {
            None => u32::from(delta),
            Some(previous) => previous.offset + u32::from(delta) + 1,
        };
        frames.push(MapFrame {
            offset,
            locals: locals.clone(),
            stack,
        });
    }
    Ok(frames)
}

fn values(r: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Vec<FrameValue>> {
    let count = r.u16()?;
    (0..count).map(|_| value(r, pool)).collect()
}

fn value(r: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<FrameValue> {
    let tag = r.u8()?;
    match tag {
        7 => Ok(FrameValue::Object(pool.class_name(r.u16()?)?.to_string())),
        8 => {
            // The NEW's offset; the analysis tracks it by itself
            r.u16()?;
            Ok(FrameValue::Uninitialized)
        }
        tag => FrameValue::from_tag(tag)
            .ok_or_else(|| Error::binary(format!("unknown verification type {}", tag))),
    }
}
