// class_builder.rs - Class file generation
//
// Converts a ClassModel into class file bytes: rebuilds the constant pool,
// assembles every method body (short forms, wide prefixes and goto_w chosen
// automatically), computes max_stack/max_locals and, from version 50 on, the
// StackMapTable.

use crate::bytes::ByteWriter;
use crate::cfg::Edge;
use crate::classfile::{attr, MAGIC};
use crate::constant_pool::PoolBuilder;
use crate::descriptor;
use crate::error::{Error, Result};
use crate::frames::{self, Analysis, Frame, VType};
use crate::instruction::{Constant, Instruction};
use crate::label::Label;
use crate::model::{Annotation, ClassModel, ElementValue, FieldModel, MethodModel};
use crate::opcode::Opcode;
use crate::stack_map::STACK_MAP_MAJOR;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

const WIDE: u8 = 196;
const LDC_W: u8 = 19;
const LDC2_W: u8 = 20;
const GOTO_W: u8 = 200;
const JSR_W: u8 = 201;

/// Build the class file for a model
pub fn build(class: &ClassModel) -> Result<Vec<u8>> {
    let mut pool = PoolBuilder::new();
    let mut body = ByteWriter::new();

    // ==========================================================================
    // Header: access, this, super, interfaces
    // ==========================================================================
    body.u16(class.access);
    body.u16(pool.class(&class.name));
    body.u16(match &class.super_name {
        Some(name) => pool.class(name),
        None => 0,
    });
    body.count(class.interfaces.len(), "interfaces")?;
    for interface in &class.interfaces {
        body.u16(pool.class(interface));
    }

    // ==========================================================================
    // Fields
    // ==========================================================================
    body.count(class.fields.len(), "fields")?;
    for field in &class.fields {
        write_field(&mut body, field, &mut pool)?;
    }

    // ==========================================================================
    // Methods
    // ==========================================================================
    body.count(class.methods.len(), "methods")?;
    for method in &class.methods {
        write_method(&mut body, class, method, &mut pool)?;
    }

    // ==========================================================================
    // Class attributes
    // ==========================================================================
    let mut attributes = Vec::new();
    if let Some(source) = &class.source_file {
        attributes.push((attr::SOURCE_FILE, u16_body(pool.utf8(source))));
    }
    if let Some(signature) = &class.signature {
        attributes.push((attr::SIGNATURE, u16_body(pool.utf8(signature))));
    }
    attributes.extend(annotation_attributes(&class.annotations, &mut pool)?);
    write_attributes(&mut body, &attributes, &mut pool)?;

    // ==========================================================================
    // Assemble: magic, version, constant pool, body
    // ==========================================================================
    let mut out = ByteWriter::new();
    out.u32(MAGIC);
    out.u16(class.minor_version);
    out.u16(class.major_version);
    pool.write(&mut out)?;
    out.bytes(body.as_slice());

    debug!(
        "built {} ({} methods, {} bytes)",
        class.name,
        class.methods.len(),
        out.len()
    );
    Ok(out.into_inner())
}

fn u16_body(index: u16) -> Vec<u8> {
    index.to_be_bytes().to_vec()
}

fn write_attributes(
    out: &mut ByteWriter,
    attributes: &[(&str, Vec<u8>)],
    pool: &mut PoolBuilder,
) -> Result<()> {
    out.count(attributes.len(), "attributes")?;
    for (name, data) in attributes {
        let name = pool.utf8(name);
        out.attribute(name, data)?;
    }
    Ok(())
}

fn write_field(out: &mut ByteWriter, field: &FieldModel, pool: &mut PoolBuilder) -> Result<()> {
    out.u16(field.access);
    out.u16(pool.utf8(&field.name));
    out.u16(pool.utf8(&field.descriptor));

    let mut attributes = Vec::new();
    if let Some(value) = &field.value {
        attributes.push((attr::CONSTANT_VALUE, u16_body(pool.constant(value))));
    }
    if let Some(signature) = &field.signature {
        attributes.push((attr::SIGNATURE, u16_body(pool.utf8(signature))));
    }
    attributes.extend(annotation_attributes(&field.annotations, pool)?);
    write_attributes(out, &attributes, pool)
}

fn write_method(
    out: &mut ByteWriter,
    class: &ClassModel,
    method: &MethodModel,
    pool: &mut PoolBuilder,
) -> Result<()> {
    out.u16(method.access);
    out.u16(pool.utf8(&method.name));
    out.u16(pool.utf8(&method.descriptor));

    let mut attributes = Vec::new();
    if method.has_code() {
        let code = assemble_code(class, method, pool)?;
        attributes.push((attr::CODE, code));
    } else if !method.instructions.is_empty() {
        return Err(Error::tree(format!(
            "abstract or native method {}{} has a body",
            method.name, method.descriptor
        )));
    }
    if !method.exceptions.is_empty() {
        let mut data = ByteWriter::new();
        data.count(method.exceptions.len(), "exceptions")?;
        for exception in &method.exceptions {
            data.u16(pool.class(exception));
        }
        attributes.push((attr::EXCEPTIONS, data.into_inner()));
    }
    if let Some(signature) = &method.signature {
        attributes.push((attr::SIGNATURE, u16_body(pool.utf8(signature))));
    }
    attributes.extend(annotation_attributes(&method.annotations, pool)?);
    write_attributes(out, &attributes, pool)
}

// ==========================================================================
// Code
// ==========================================================================

/// Assemble the body of a `Code` attribute
fn assemble_code(class: &ClassModel, method: &MethodModel, pool: &mut PoolBuilder) -> Result<Vec<u8>> {
    let where_ = || format!("{}.{}{}", class.name, method.name, method.descriptor);
    if method.instructions.is_empty() {
        return Err(Error::tree(format!("{} has an empty body", where_())));
    }

    let analysis = frames::analyze(&class.name, class.major_version, method)?;
    if !analysis.ignored.is_empty() {
        debug!(
            "{}: declared frames at positions {:?} inferred instead",
            where_(),
            analysis.ignored
        );
    }
    let insns = &method.instructions;

    // Lay the code out until every unconditional jump fits its encoding
    let mut long_jumps: HashSet<usize> = HashSet::new();
    let offsets = loop {
        let offsets = layout(insns, pool, &long_jumps)?;
        let mut grew = false;
        for (position, insn) in insns.iter().enumerate() {
            let Instruction::Jump(op, target) = insn else {
                continue;
            };
            if long_jumps.contains(&position) {
                continue;
            }
            let delta = i64::from(offsets[analysis.cfg.position(target)?])
                - i64::from(offsets[position]);
            if i16::try_from(delta).is_err() {
                if op.is_jump() {
                    long_jumps.insert(position);
                    grew = true;
                } else {
                    return Err(Error::tree(format!(
                        "{}: conditional branch at position {} spans {} bytes",
                        where_(),
                        position,
                        delta
                    )));
                }
            }
        }
        if !grew {
            break offsets;
        }
    };

    let code_len = offsets[insns.len()];
    if code_len > 65535 {
        return Err(Error::tree(format!(
            "{}: code is {} bytes, over the 65535 limit",
            where_(),
            code_len
        )));
    }

    // Emit
    let target = |label: &Label| -> Result<i64> {
        Ok(i64::from(offsets[analysis.cfg.position(label)?]))
    };
    let mut code = ByteWriter::new();
    for (position, insn) in insns.iter().enumerate() {
        encode(
            insn,
            offsets[position],
            long_jumps.contains(&position),
            pool,
            &target,
            &mut code,
        )?;
    }
    let mut code = code.into_inner();

    // Dead code becomes nop ... athrow
    let mut holes = Vec::new();
    for &(start, end) in &analysis.unreachable {
        let (from, to) = (offsets[start] as usize, offsets[end] as usize);
        if from < to {
            code[from..to - 1].fill(Opcode::NOP.byte());
            code[to - 1] = Opcode::ATHROW.byte();
            holes.push((from as u32, to as u32));
        }
    }

    let mut out = ByteWriter::new();
    out.u16(analysis.max_stack.max(u16::from(!holes.is_empty())));
    out.u16(analysis.max_locals);
    out.u32(code_len);
    out.bytes(&code);

    // Exception table, minus dead ranges
    let mut entries = Vec::new();
    for (range, tc) in analysis.cfg.handlers.iter().zip(&method.handlers) {
        if !analysis.frames.contains_key(&range.handler) {
            continue;
        }
        let catch_type = match &tc.catch_type {
            Some(name) => pool.class(name),
            None => 0,
        };
        let (start, end, handler) = (offsets[range.start], offsets[range.end], offsets[range.handler]);
        if start > end {
            return Err(Error::tree(format!(
                "{}: handler range ends before it starts",
                where_()
            )));
        }
        for (from, to) in subtract(start, end, &holes) {
            entries.push((from, to, handler, catch_type));
        }
    }
    out.count(entries.len(), "exception handlers")?;
    for (start, end, handler, catch_type) in entries {
        out.u16(start as u16);
        out.u16(end as u16);
        out.u16(handler as u16);
        out.u16(catch_type);
    }

    let mut attributes = Vec::new();
    if class.major_version >= STACK_MAP_MAJOR {
        let table = stack_map_table(&analysis, &offsets, &holes, insns.len(), pool)?;
        if let Some(table) = table {
            attributes.push((attr::STACK_MAP_TABLE, table));
        }
    }
    write_attributes(&mut out, &attributes, pool)?;
    Ok(out.into_inner())
}

/// Remove dead byte ranges from a handler range
fn subtract(start: u32, end: u32, holes: &[(u32, u32)]) -> Vec<(u32, u32)> {
    let mut pieces = vec![(start, end)];
    for &(hole_start, hole_end) in holes {
        let mut next = Vec::with_capacity(pieces.len() + 1);
        for (s, e) in pieces {
            if hole_end <= s || e <= hole_start {
                next.push((s, e));
                continue;
            }
            if s < hole_start {
                next.push((s, hole_start));
            }
            if hole_end < e {
                next.push((hole_end, e));
            }
        }
        pieces = next;
    }
    pieces
}

/// Byte offset of every position (labels share the next instruction's
/// offset); the extra last entry is the code length
fn layout(insns: &[Instruction], pool: &mut PoolBuilder, long_jumps: &HashSet<usize>) -> Result<Vec<u32>> {
    let mut offsets = Vec::with_capacity(insns.len() + 1);
    let mut offset: u32 = 0;
    let mut scratch = ByteWriter::new();
    let no_target = |_: &Label| -> Result<i64> { Ok(0) };
    for (position, insn) in insns.iter().enumerate() {
        offsets.push(offset);
        let before = scratch.len();
        // Relative offsets don't change sizes; only the switch padding does
        encode(
            insn,
            offset,
            long_jumps.contains(&position),
            pool,
            &no_target,
            &mut scratch,
        )?;
        offset += (scratch.len() - before) as u32;
    }
    offsets.push(offset);
    Ok(offsets)
}

/// Encode one instruction at `offset`
fn encode(
    insn: &Instruction,
    offset: u32,
    long_jump: bool,
    pool: &mut PoolBuilder,
    target: &dyn Fn(&Label) -> Result<i64>,
    out: &mut ByteWriter,
) -> Result<()> {
    let relative = |label: &Label| -> Result<i64> { Ok(target(label)? - i64::from(offset)) };
    let relative32 = |label: &Label| -> Result<i32> {
        let delta = relative(label)?;
        i32::try_from(delta).map_err(|_| Error::tree(format!("branch spans {} bytes", delta)))
    };

    match insn {
        Instruction::Label(_) => {}
        Instruction::Plain(op) => out.u8(op.byte()),
        Instruction::Int(op, value) => {
            out.u8(op.byte());
            if *op == Opcode::SIPUSH {
                out.u16(*value as i16 as u16);
            } else {
                out.u8(*value as u8);
            }
        }
        Instruction::Var(op, index) => {
            let byte = op.byte();
            let short_base = match op {
                Opcode::ILOAD | Opcode::LLOAD | Opcode::FLOAD | Opcode::DLOAD | Opcode::ALOAD => {
                    Some(26 + (byte - Opcode::ILOAD.byte()) * 4)
                }
                Opcode::ISTORE
                | Opcode::LSTORE
                | Opcode::FSTORE
                | Opcode::DSTORE
                | Opcode::ASTORE => Some(59 + (byte - Opcode::ISTORE.byte()) * 4),
                _ => None,
            };
            match (short_base, *index) {
                (Some(base), 0..=3) => out.u8(base + *index as u8),
                (_, 0..=255) => {
                    out.u8(byte);
                    out.u8(*index as u8);
                }
                _ => {
                    out.u8(WIDE);
                    out.u8(byte);
                    out.u16(*index);
                }
            }
        }
        Instruction::Iinc { index, delta } => {
            if *index <= 255 && i8::try_from(*delta).is_ok() {
                out.u8(Opcode::IINC.byte());
                out.u8(*index as u8);
                out.u8(*delta as i8 as u8);
            } else {
                out.u8(WIDE);
                out.u8(Opcode::IINC.byte());
                out.u16(*index);
                out.u16(*delta as u16);
            }
        }
        Instruction::Ldc(constant) => {
            let index = pool.constant(constant);
            if constant.is_wide() {
                out.u8(LDC2_W);
                out.u16(index);
            } else if index <= 255 {
                out.u8(Opcode::LDC.byte());
                out.u8(index as u8);
            } else {
                out.u8(LDC_W);
                out.u16(index);
            }
        }
        Instruction::Type(op, name) => {
            out.u8(op.byte());
            out.u16(pool.class(name));
        }
        Instruction::Field {
            opcode,
            owner,
            name,
            descriptor,
        } => {
            out.u8(opcode.byte());
            out.u16(pool.field_ref(owner, name, descriptor));
        }
        Instruction::Method {
            opcode,
            owner,
            name,
            descriptor,
            interface,
        } => {
            let index = pool.method_ref(owner, name, descriptor, *interface);
            out.u8(opcode.byte());
            out.u16(index);
            if *opcode == Opcode::INVOKEINTERFACE {
                let signature = descriptor::parse_method(descriptor).ok_or_else(|| {
                    Error::tree(format!("invalid method descriptor {}", descriptor))
                })?;
                let count = u8::try_from(signature.arg_slots() + 1)
                    .map_err(|_| Error::tree(format!("too many arguments in {}", descriptor)))?;
                out.u8(count);
                out.u8(0);
            }
        }
        Instruction::Jump(op, label) => {
            if long_jump {
                out.u8(if *op == Opcode::JSR { JSR_W } else { GOTO_W });
                out.i32(relative32(label)?);
            } else {
                let delta = relative(label)?;
                let delta = i16::try_from(delta)
                    .map_err(|_| Error::tree(format!("branch spans {} bytes", delta)))?;
                out.u8(op.byte());
                out.u16(delta as u16);
            }
        }
        Instruction::TableSwitch {
            low,
            high,
            default,
            targets,
        } => {
            if i64::from(*high) - i64::from(*low) + 1 != targets.len() as i64 {
                return Err(Error::tree("tableswitch target count doesn't match its range"));
            }
            out.u8(Opcode::TABLESWITCH.byte());
            pad(out, offset);
            out.i32(relative32(default)?);
            out.i32(*low);
            out.i32(*high);
            for label in targets {
                out.i32(relative32(label)?);
            }
        }
        Instruction::LookupSwitch { default, pairs } => {
            let mut sorted: Vec<&(i32, Label)> = pairs.iter().collect();
            sorted.sort_by_key(|(key, _)| *key);
            if sorted.windows(2).any(|w| w[0].0 == w[1].0) {
                return Err(Error::tree("lookupswitch has duplicate keys"));
            }
            out.u8(Opcode::LOOKUPSWITCH.byte());
            pad(out, offset);
            out.i32(relative32(default)?);
            out.i32(sorted.len() as i32);
            for (key, label) in sorted {
                out.i32(*key);
                out.i32(relative32(label)?);
            }
        }
        Instruction::MultiANewArray {
            descriptor,
            dimensions,
        } => {
            out.u8(Opcode::MULTIANEWARRAY.byte());
            out.u16(pool.class(descriptor));
            out.u8(*dimensions);
        }
    }
    Ok(())
}

/// Zero padding so switch operands start 4-byte aligned
fn pad(out: &mut ByteWriter, offset: u32) {
    for _ in 0..(4 - (offset + 1) % 4) % 4 {
        out.u8(0);
    }
}

// ==========================================================================
// StackMapTable
// ==========================================================================

fn stack_map_table(
    analysis: &Analysis,
    offsets: &[u32],
    holes: &[(u32, u32)],
    len: usize,
    pool: &mut PoolBuilder,
) -> Result<Option<Vec<u8>>> {
    let code_len = offsets[len];

    // Offset 0 only needs an explicit frame when something jumps back to it
    let entry_targeted = analysis
        .cfg
        .blocks
        .values()
        .any(|b| b.successors.iter().any(|e| matches!(e, Edge::Flow(0))))
        || analysis.cfg.handlers.iter().any(|h| h.handler == 0);

    let mut by_offset: BTreeMap<u32, Frame> = BTreeMap::new();
    for (&position, frame) in &analysis.frames {
        if position == 0 && !entry_targeted {
            continue;
        }
        by_offset.insert(offsets[position], frame.clone());
    }
    for &(from, _) in holes {
        by_offset.insert(
            from,
            Frame {
                locals: Vec::new(),
                stack: vec![VType::Object("java/lang/Throwable".to_string())],
            },
        );
    }
    by_offset.retain(|offset, _| *offset < code_len);
    if by_offset.is_empty() {
        return Ok(None);
    }

    let mut out = ByteWriter::new();
    out.count(by_offset.len(), "stack map frames")?;
    let mut previous_locals = compress(&analysis.initial.locals);
    let mut previous_offset: Option<u32> = None;
    for (offset, frame) in by_offset {
        let delta = match previous_offset {
            None => offset,
            Some(prev) => offset - prev - 1,
        };
        let delta = u16::try_from(delta).map_err(|_| Error::tree("stack map offset overflow"))?;
        let locals = compress(&frame.locals);
        write_frame(&mut out, delta, &previous_locals, &locals, &frame.stack, offsets, pool)?;
        previous_locals = locals;
        previous_offset = Some(offset);
    }
    Ok(Some(out.into_inner()))
}

/// Locals as verification types: one entry per long/double, trailing tops
/// dropped
fn compress(locals: &[VType]) -> Vec<VType> {
    let mut out = Vec::with_capacity(locals.len());
    let mut i = 0;
    while i < locals.len() {
        out.push(locals[i].clone());
        i += locals[i].slots();
    }
    while out.last() == Some(&VType::Top) {
        out.pop();
    }
    out
}

fn write_frame(
    out: &mut ByteWriter,
    delta: u16,
    previous: &[VType],
    locals: &[VType],
    stack: &[VType],
    offsets: &[u32],
    pool: &mut PoolBuilder,
) -> Result<()> {
    let same_locals = locals == previous;
    if same_locals && stack.is_empty() {
        if delta < 64 {
            out.u8(delta as u8);
        } else {
            out.u8(251);
            out.u16(delta);
        }
    } else if same_locals && stack.len() == 1 {
        if delta < 64 {
            out.u8(64 + delta as u8);
        } else {
            out.u8(247);
            out.u16(delta);
        }
        write_vtype(out, &stack[0], offsets, pool)?;
    } else if stack.is_empty()
        && locals.len() < previous.len()
        && previous.len() - locals.len() <= 3
        && previous.starts_with(locals)
    {
        out.u8(251 - (previous.len() - locals.len()) as u8);
        out.u16(delta);
    } else if stack.is_empty()
        && locals.len() > previous.len()
        && locals.len() - previous.len() <= 3
        && locals.starts_with(previous)
    {
        out.u8(251 + (locals.len() - previous.len()) as u8);
        out.u16(delta);
        for vtype in &locals[previous.len()..] {
            write_vtype(out, vtype, offsets, pool)?;
        }
    } else {
        out.u8(255);
        out.u16(delta);
        out.count(locals.len(), "frame locals")?;
        for vtype in locals {
            write_vtype(out, vtype, offsets, pool)?;
        }
        out.count(stack.len(), "frame stack entries")?;
        for vtype in stack {
            write_vtype(out, vtype, offsets, pool)?;
        }
    }
    Ok(())
}

fn write_vtype(out: &mut ByteWriter, vtype: &VType, offsets: &[u32], pool: &mut PoolBuilder) -> Result<()> {
    match vtype {
        VType::Top => out.u8(0),
        VType::Integer => out.u8(1),
        VType::Float => out.u8(2),
        VType::Double => out.u8(3),
        VType::Long => out.u8(4),
        VType::Null => out.u8(5),
        VType::UninitializedThis => out.u8(6),
        VType::Object(name) => {
            out.u8(7);
            out.u16(pool.class(name));
        }
        VType::Uninitialized(position) => {
            out.u8(8);
            out.u16(offsets[*position] as u16);
        }
        VType::ReturnAddress => {
            return Err(Error::tree("return address live across a stack map frame"))
        }
    }
    Ok(())
}

// ==========================================================================
// Annotations
// ==========================================================================

fn annotation_attributes(
    annotations: &[Annotation],
    pool: &mut PoolBuilder,
) -> Result<Vec<(&'static str, Vec<u8>)>> {
    let mut attributes = Vec::new();
    for (visible, name) in [
        (true, attr::VISIBLE_ANNOTATIONS),
        (false, attr::INVISIBLE_ANNOTATIONS),
    ] {
        let selected: Vec<&Annotation> =
            annotations.iter().filter(|a| a.visible == visible).collect();
        if selected.is_empty() {
            continue;
        }
        let mut data = ByteWriter::new();
        data.count(selected.len(), "annotations")?;
        for annotation in selected {
            write_annotation(&mut data, annotation, pool)?;
        }
        attributes.push((name, data.into_inner()));
    }
    Ok(attributes)
}

fn write_annotation(out: &mut ByteWriter, annotation: &Annotation, pool: &mut PoolBuilder) -> Result<()> {
    out.u16(pool.utf8(&annotation.descriptor));
    out.count(annotation.elements.len(), "annotation elements")?;
    for (name, value) in &annotation.elements {
        out.u16(pool.utf8(name));
        write_element(out, value, pool)?;
    }
    Ok(())
}

fn write_element(out: &mut ByteWriter, value: &ElementValue, pool: &mut PoolBuilder) -> Result<()> {
    match value {
        ElementValue::Const(tag, constant) => {
            let index = match (tag, constant) {
                ('s', Constant::String(s)) => pool.utf8(s),
                ('B' | 'C' | 'I' | 'S' | 'Z', Constant::Int(_))
                | ('J', Constant::Long(_))
                | ('F', Constant::Float(_))
                | ('D', Constant::Double(_)) => pool.constant(constant),
                _ => {
                    return Err(Error::tree(format!(
                        "annotation value tagged '{}' holds {:?}",
                        tag, constant
                    )))
                }
            };
            out.u8(*tag as u8);
            out.u16(index);
        }
        ElementValue::Enum { descriptor, name } => {
            out.u8(b'e');
            out.u16(pool.utf8(descriptor));
            out.u16(pool.utf8(name));
        }
        ElementValue::Class(descriptor) => {
            out.u8(b'c');
            out.u16(pool.utf8(descriptor));
        }
        ElementValue::Annotation(nested) => {
            out.u8(b'@');
            write_annotation(out, nested, pool)?;
        }
        ElementValue::Array(values) => {
            out.u8(b'[');
            out.count(values.len(), "array elements")?;
            for value in values {
                write_element(out, value, pool)?;
            }
        }
    }
    Ok(())
}
