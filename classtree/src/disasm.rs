// disasm.rs - JVM bytecode disassembler
//
// Decodes a method's `Code` array into canonical instructions. Short forms
// and `wide` are folded, branch offsets become labels, and a label is placed
// before every instruction that is a branch target or a handler boundary.

use crate::bytes::ByteReader;
use crate::classfile::CodeInfo;
use crate::constant_pool::ConstantPool;
use crate::error::{Error, Result};
use crate::instruction::{Constant, Instruction};
use crate::label::{Label, LabelRegistry};
use crate::model::{DeclaredFrame, TryCatch};
use crate::opcode::Opcode;
use crate::stack_map::MapFrame;
use std::collections::BTreeSet;

const WIDE: u8 = 196;
const INVOKEDYNAMIC: u8 = 186;
const LDC_W: u8 = 19;
const LDC2_W: u8 = 20;
const GOTO_W: u8 = 200;
const JSR_W: u8 = 201;

/// A disassembled method body
#[derive(Debug, Clone)]
pub struct Disassembly {
    /// Instructions with labels interleaved
    pub instructions: Vec<Instruction>,
    pub handlers: Vec<TryCatch>,
    /// Byte offset of every decoded instruction
    pub starts: Vec<u32>,
    /// Offsets control can arrive at other than by falling through: branch
    /// targets and handler entry points
    pub entry_points: BTreeSet<u32>,
}

/// Label id for a code offset within one method
fn label_id(scope: &str, offset: u32) -> String {
    format!("L{}_{}", scope, offset)
}

/// Disassemble a code attribute
///
/// `scope` keeps label ids unique across the methods of one class, since all
/// of them share `labels`.
pub fn disassemble(
    code: &CodeInfo,
    pool: &ConstantPool,
    major: u16,
    labels: &mut LabelRegistry,
    scope: &str,
) -> Result<Disassembly> {
    let bytes = &code.code;
    let len = bytes.len();
    let mut targets: BTreeSet<u32> = BTreeSet::new();
    let mut decoded = Vec::new();
    let mut starts = Vec::new();

    let mut pc = 0;
    while pc < len {
        let mut resolve = |target: u32| {
            targets.insert(target);
            labels.resolve(&label_id(scope, target))
        };
        let (insn, next) = decode_at(bytes, pc, pool, &mut resolve)?;
        if matches!(insn.opcode(), Some(Opcode::JSR | Opcode::RET)) && major >= 50 {
            return Err(Error::binary(format!(
                "jsr/ret at offset {} in a version {} class",
                pc, major
            )));
        }
        starts.push(pc as u32);
        decoded.push((pc as u32, insn));
        pc = next;
    }

    let boundaries: BTreeSet<u32> = starts.iter().copied().collect();
    let mut entry_points = targets.clone();
    let mut handlers = Vec::with_capacity(code.handlers.len());
    for raw in &code.handlers {
        let (start, end, handler) = (
            u32::from(raw.start_pc),
            u32::from(raw.end_pc),
            u32::from(raw.handler_pc),
        );
        let valid = start < end
            && boundaries.contains(&start)
            && (end as usize == len || boundaries.contains(&end))
            && boundaries.contains(&handler);
        if !valid {
            return Err(Error::binary(format!(
                "exception handler [{}, {}) -> {} doesn't match instruction boundaries",
                start, end, handler
            )));
        }
        targets.extend([start, end, handler]);
        entry_points.insert(handler);
        handlers.push(TryCatch {
            start: labels.resolve(&label_id(scope, start)),
            end: labels.resolve(&label_id(scope, end)),
            handler: labels.resolve(&label_id(scope, handler)),
            catch_type: pool.optional_class(raw.catch_type)?.map(str::to_string),
        });
    }

    if let Some(bad) = targets
        .iter()
        .find(|t| **t as usize != len && !boundaries.contains(*t))
    {
        return Err(Error::binary(format!(
            "branch target {} is not an instruction boundary",
            bad
        )));
    }

    let mut instructions = Vec::with_capacity(decoded.len() + targets.len());
    for (offset, insn) in decoded {
        if targets.contains(&offset) {
            instructions.push(Instruction::Label(labels.resolve(&label_id(scope, offset))));
        }
        instructions.push(insn);
    }
    if targets.contains(&(len as u32)) {
        instructions.push(Instruction::Label(labels.resolve(&label_id(scope, len as u32))));
    }

    Ok(Disassembly {
        instructions,
        handlers,
        starts,
        entry_points,
    })
}

/// Attach StackMapTable frames to the labels of a disassembled body
///
/// Only frames at entry points are kept; anywhere else there is no label to
/// hang them on, and the encoder doesn't need them.
pub fn declared_frames(
    frames: Vec<MapFrame>,
    body: &Disassembly,
    labels: &mut LabelRegistry,
    scope: &str,
) -> Vec<DeclaredFrame> {
    frames
        .into_iter()
        .filter(|frame| body.entry_points.contains(&frame.offset))
        .map(|frame| DeclaredFrame {
            label: labels.resolve(&label_id(scope, frame.offset)),
            locals: frame.locals,
            stack: frame.stack,
        })
        .collect()
}

/// Absolute branch target, checked against the code length
fn branch(pc: usize, delta: i64, len: usize) -> Result<u32> {
    let target = pc as i64 + delta;
    if target < 0 || target >= len as i64 {
        return Err(Error::binary(format!(
            "branch at offset {} jumps outside the code ({})",
            pc, target
        )));
    }
    Ok(target as u32)
}

/// Decode the instruction at `pc`, returning it and the offset of the next one
fn decode_at(
    code: &[u8],
    pc: usize,
    pool: &ConstantPool,
    resolve: &mut dyn FnMut(u32) -> Label,
) -> Result<(Instruction, usize)> {
    let mut r = ByteReader::new(code);
    r.seek(pc);
    let byte = r.u8()?;

    let insn = match byte {
        // iload_0 .. aload_3
        26..=45 => {
            let kind = (byte - 26) / 4;
            let op = Opcode::from_byte(Opcode::ILOAD.byte() + kind).ok_or_else(|| bad(byte, pc))?;
            Instruction::Var(op, u16::from((byte - 26) % 4))
        }
        // istore_0 .. astore_3
        59..=78 => {
            let kind = (byte - 59) / 4;
            let op = Opcode::from_byte(Opcode::ISTORE.byte() + kind).ok_or_else(|| bad(byte, pc))?;
            Instruction::Var(op, u16::from((byte - 59) % 4))
        }
        LDC_W | LDC2_W => Instruction::Ldc(pool.constant(r.u16()?)?),
        GOTO_W | JSR_W => {
            let op = if byte == GOTO_W { Opcode::GOTO } else { Opcode::JSR };
            let target = branch(pc, i64::from(r.i32()?), code.len())?;
            Instruction::Jump(op, resolve(target))
        }
        WIDE => {
            let inner = r.u8()?;
            let op = Opcode::from_byte(inner).ok_or_else(|| bad(inner, pc))?;
            match op {
                Opcode::IINC => Instruction::Iinc {
                    index: r.u16()?,
                    delta: r.i16()?,
                },
                Opcode::ILOAD
                | Opcode::LLOAD
                | Opcode::FLOAD
                | Opcode::DLOAD
                | Opcode::ALOAD
                | Opcode::ISTORE
                | Opcode::LSTORE
                | Opcode::FSTORE
                | Opcode::DSTORE
                | Opcode::ASTORE
                | Opcode::RET => Instruction::Var(op, r.u16()?),
                _ => {
                    return Err(Error::binary(format!(
                        "wide {} at offset {}",
                        op.mnemonic(),
                        pc
                    )))
                }
            }
        }
        INVOKEDYNAMIC => {
            return Err(Error::binary(format!(
                "invokedynamic at offset {} is not supported",
                pc
            )))
        }
        _ => {
            let op = Opcode::from_byte(byte).ok_or_else(|| bad(byte, pc))?;
            decode_operands(op, &mut r, pc, pool, resolve)?
        }
    };
    Ok((insn, r.position()))
}

fn decode_operands(
    op: Opcode,
    r: &mut ByteReader<'_>,
    pc: usize,
    pool: &ConstantPool,
    resolve: &mut dyn FnMut(u32) -> Label,
) -> Result<Instruction> {
    use crate::opcode::Shape;

    let len = r.position() + r.remaining();
    let insn = match op.shape() {
        Shape::Plain => Instruction::Plain(op),
        Shape::Int => match op {
            Opcode::BIPUSH => Instruction::Int(op, i32::from(r.i8()?)),
            Opcode::SIPUSH => Instruction::Int(op, i32::from(r.i16()?)),
            _ => Instruction::Int(op, i32::from(r.u8()?)),
        },
        Shape::Var => Instruction::Var(op, u16::from(r.u8()?)),
        Shape::Iinc => Instruction::Iinc {
            index: u16::from(r.u8()?),
            delta: i16::from(r.i8()?),
        },
        Shape::Ldc => {
            let constant = pool.constant(u16::from(r.u8()?))?;
            if matches!(constant, Constant::Long(_) | Constant::Double(_)) {
                return Err(Error::binary(format!(
                    "ldc at offset {} loads a two-slot constant",
                    pc
                )));
            }
            Instruction::Ldc(constant)
        }
        Shape::Type => Instruction::Type(op, pool.class_name(r.u16()?)?.to_string()),
        Shape::Field => {
            let index = r.u16()?;
            if !pool.is_field_ref(index) {
                return Err(Error::binary(format!(
                    "{} at offset {} doesn't reference a field",
                    op.mnemonic(),
                    pc
                )));
            }
            let member = pool.member_ref(index)?;
            Instruction::Field {
                opcode: op,
                owner: member.owner,
                name: member.name,
                descriptor: member.descriptor,
            }
        }
        Shape::Method => {
            let index = r.u16()?;
            if pool.is_field_ref(index) {
                return Err(Error::binary(format!(
                    "{} at offset {} references a field",
                    op.mnemonic(),
                    pc
                )));
            }
            let member = pool.member_ref(index)?;
            if op == Opcode::INVOKEINTERFACE {
                // count and the zero byte are recomputed on encode
                r.u8()?;
                r.u8()?;
            }
            Instruction::Method {
                opcode: op,
                owner: member.owner,
                name: member.name,
                descriptor: member.descriptor,
                interface: member.interface,
            }
        }
        Shape::Jump => {
            let target = branch(pc, i64::from(r.i16()?), len)?;
            Instruction::Jump(op, resolve(target))
        }
        Shape::TableSwitch => {
            skip_padding(r, pc)?;
            let default = branch(pc, i64::from(r.i32()?), len)?;
            let low = r.i32()?;
            let high = r.i32()?;
            if high < low {
                return Err(Error::binary(format!(
                    "tableswitch at offset {} has low {} > high {}",
                    pc, low, high
                )));
            }
            let count = (i64::from(high) - i64::from(low) + 1) as usize;
            if count * 4 > r.remaining() {
                return Err(Error::binary(format!(
                    "tableswitch at offset {} overruns the code",
                    pc
                )));
            }
            let default = resolve(default);
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                let target = branch(pc, i64::from(r.i32()?), len)?;
                targets.push(resolve(target));
            }
            Instruction::TableSwitch {
                low,
                high,
                default,
                targets,
            }
        }
        Shape::LookupSwitch => {
            skip_padding(r, pc)?;
            let default = branch(pc, i64::from(r.i32()?), len)?;
            let npairs = r.i32()?;
            if npairs < 0 || npairs as usize * 8 > r.remaining() {
                return Err(Error::binary(format!(
                    "lookupswitch at offset {} has a bad pair count {}",
                    pc, npairs
                )));
            }
            let default = resolve(default);
            let mut pairs = Vec::with_capacity(npairs as usize);
            for _ in 0..npairs {
                let key = r.i32()?;
                let target = branch(pc, i64::from(r.i32()?), len)?;
                pairs.push((key, resolve(target)));
            }
            Instruction::LookupSwitch { default, pairs }
        }
        Shape::MultiANewArray => {
            let descriptor = pool.class_name(r.u16()?)?.to_string();
            let dimensions = r.u8()?;
            Instruction::MultiANewArray {
                descriptor,
                dimensions,
            }
        }
    };
    Ok(insn)
}

/// Switch operands start on a 4-byte boundary relative to the code start
fn skip_padding(r: &mut ByteReader<'_>, pc: usize) -> Result<()> {
    let pad = (4 - (pc + 1) % 4) % 4;
    r.bytes(pad)?;
    Ok(())
}

fn bad(byte: u8, pc: usize) -> Error {
    Error::binary(format!("unknown opcode 0x{:02x} at offset {}", byte, pc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::ByteWriter;
    use crate::classfile::RawHandler;
    use crate::constant_pool::PoolBuilder;
    use crate::model::FrameValue;

    fn empty_pool() -> ConstantPool {
        let mut out = ByteWriter::new();
        PoolBuilder::new().write(&mut out).unwrap();
        let bytes = out.into_inner();
        ConstantPool::parse(&mut ByteReader::new(&bytes)).unwrap()
    }

    fn code(bytes: &[u8]) -> CodeInfo {
        CodeInfo {
            max_stack: 4,
            max_locals: 4,
            code: bytes.to_vec(),
            handlers: Vec::new(),
            attributes: Vec::new(),
        }
    }

    #[test]
    fn test_short_forms_fold() {
        // iload_1, wide iload 300, istore_2, return
        let body = code(&[0x1b, 0xc4, 0x15, 0x01, 0x2c, 0x3d, 0xb1]);
        let out = disassemble(&body, &empty_pool(), 52, &mut LabelRegistry::new(), "0").unwrap();
        assert_eq!(
            out.instructions,
            vec![
                Instruction::Var(Opcode::ILOAD, 1),
                Instruction::Var(Opcode::ILOAD, 300),
                Instruction::Var(Opcode::ISTORE, 2),
                Instruction::Plain(Opcode::RETURN),
            ]
        );
        assert_eq!(out.starts, vec![0, 1, 5, 6]);
    }

    #[test]
    fn test_branch_gets_label() {
        // 0: iconst_0, 1: ifeq +4 (-> 5), 4: nop, 5: return
        let body = code(&[0x03, 0x99, 0x00, 0x04, 0x00, 0xb1]);
        let mut labels = LabelRegistry::new();
        let out = disassemble(&body, &empty_pool(), 52, &mut labels, "0").unwrap();
        let target = labels.resolve("L0_5");
        assert_eq!(out.instructions[1], Instruction::Jump(Opcode::IFEQ, target.clone()));
        assert_eq!(out.instructions[3], Instruction::Label(target));
        assert_eq!(out.instructions.len(), 5);
    }

    #[test]
    fn test_tableswitch_padding() {
        // 0: iconst_0, 1: tableswitch (pad 2) default +19, low 0, high 0, [+19], 20: return
        let mut bytes = vec![0x03, 0xaa, 0x00, 0x00];
        bytes.extend_from_slice(&19i32.to_be_bytes());
        bytes.extend_from_slice(&0i32.to_be_bytes());
        bytes.extend_from_slice(&0i32.to_be_bytes());
        bytes.extend_from_slice(&19i32.to_be_bytes());
        bytes.push(0xb1);
        let out = disassemble(&code(&bytes), &empty_pool(), 52, &mut LabelRegistry::new(), "0")
            .unwrap();
        assert!(matches!(
            out.instructions[1],
            Instruction::TableSwitch { low: 0, high: 0, .. }
        ));
        assert_eq!(out.starts, vec![0, 1, 20]);
    }

    #[test]
    fn test_declared_frames_land_on_targets() {
        // 0: iload_0, 1: ifeq +5, 4: iconst_1, 5: ireturn, 6: iconst_0, 7: ireturn
        let body = code(&[0x1a, 0x99, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac]);
        let mut labels = LabelRegistry::new();
        let out = disassemble(&body, &empty_pool(), 52, &mut labels, "0").unwrap();
        let frame = |offset| MapFrame {
            offset,
            locals: vec![FrameValue::Integer],
            stack: Vec::new(),
        };
        let declared = declared_frames(vec![frame(4), frame(6)], &out, &mut labels, "0");
        assert_eq!(declared.len(), 1);
        assert_eq!(out.instructions[4], Instruction::Label(declared[0].label.clone()));
        assert_eq!(declared[0].locals, vec![FrameValue::Integer]);
    }

    #[test]
    fn test_rejects_bad_code() {
        let pool = empty_pool();
        // goto into the middle of itself
        let body = code(&[0xa7, 0x00, 0x01, 0xb1]);
        assert!(disassemble(&body, &pool, 52, &mut LabelRegistry::new(), "0").is_err());
        // jsr in a version 52 class
        let body = code(&[0xa8, 0x00, 0x03, 0xb1]);
        assert!(disassemble(&body, &pool, 52, &mut LabelRegistry::new(), "0").is_err());
        // unknown opcode
        assert!(disassemble(&code(&[0xfe]), &pool, 52, &mut LabelRegistry::new(), "0").is_err());
        // handler range not on a boundary
        let mut body = code(&[0x00, 0xb1]);
        body.handlers.push(RawHandler {
            start_pc: 0,
            end_pc: 0,
            handler_pc: 1,
            catch_type: 0,
        });
        assert!(disassemble(&body, &pool, 52, &mut LabelRegistry::new(), "0").is_err());
    }
}
