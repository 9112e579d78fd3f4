// verify.rs - Structural check of generated class files
//
// Re-reads encoder output the way a loader would: the bytes must parse, every
// body must pass the type inference within its declared max_stack/max_locals,
// and from version 50 on the StackMapTable must sit on the branch targets and
// handlers and agree with the inferred frames there.

use crate::classfile::{self, attr};
use crate::disasm;
use crate::error::{Error, Result};
use crate::frames;
use crate::label::LabelRegistry;
use crate::model::MethodModel;
use crate::stack_map::{self, STACK_MAP_MAJOR};
use std::collections::BTreeSet;
use tracing::debug;

/// Verify class file bytes
pub fn verify(bytes: &[u8]) -> Result<()> {
    let file = classfile::parse(bytes).map_err(|e| Error::VerificationFailed {
        class: "<unknown>".to_string(),
        reason: e.to_string(),
    })?;
    let fail = |reason: String| Error::VerificationFailed {
        class: file.name.clone(),
        reason,
    };

    for (index, method) in file.methods.iter().enumerate() {
        let Some(attribute) = method.attribute(attr::CODE) else {
            continue;
        };
        let what = format!("{}{}", method.name, method.descriptor);
        let code = classfile::parse_code(&attribute.data, &file.pool)
            .map_err(|e| fail(format!("{}: {}", what, e)))?;

        let mut model = MethodModel::new(method.access, &method.name, &method.descriptor);
        let initial = stack_map::initial_locals(&file.name, &model);
        let table = stack_map::read(&code, &file.pool, &initial)
            .map_err(|e| fail(format!("{}: {}", what, e)))?;
        let offsets: BTreeSet<u32> = table.iter().map(|frame| frame.offset).collect();

        let scope = index.to_string();
        let mut labels = LabelRegistry::new();
        let body = disasm::disassemble(&code, &file.pool, file.major_version, &mut labels, &scope)
            .map_err(|e| fail(format!("{}: {}", what, e)))?;
        model.frames = disasm::declared_frames(table, &body, &mut labels, &scope);
        model.instructions = body.instructions;
        model.handlers = body.handlers;

        let analysis = frames::analyze(&file.name, file.major_version, &model)?;
        if let Some(position) = analysis.ignored.first() {
            return Err(fail(format!(
                "{}: stack map frame at position {} doesn't match the code",
                what, position
            )));
        }
        if analysis.max_stack > code.max_stack {
            return Err(fail(format!(
                "{}: needs {} stack slots, declares {}",
                what, analysis.max_stack, code.max_stack
            )));
        }
        if analysis.max_locals > code.max_locals {
            return Err(fail(format!(
                "{}: needs {} locals, declares {}",
                what, analysis.max_locals, code.max_locals
            )));
        }

        if file.major_version >= STACK_MAP_MAJOR {
            let starts: BTreeSet<u32> = body.starts.iter().copied().collect();
            if let Some(stray) = offsets.iter().find(|o| !starts.contains(*o)) {
                return Err(fail(format!(
                    "{}: stack map frame at {} is not an instruction start",
                    what, stray
                )));
            }
            if let Some(missing) = body.entry_points.iter().find(|o| !offsets.contains(*o)) {
                return Err(fail(format!(
                    "{}: no stack map frame at branch target {}",
                    what, missing
                )));
            }
        }
    }

    debug!("verified {} ({} methods)", file.name, file.methods.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ClassBuilder;
    use crate::model::access;
    use crate::opcode::Opcode;

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            verify(&[0, 1, 2, 3]),
            Err(Error::VerificationFailed { .. })
        ));
    }

    /// `static int pick(int)` whose frame at `done` holds an int on the stack
    fn pick() -> Vec<u8> {
        ClassBuilder::new("org/x/A")
            .method(access::PUBLIC | access::STATIC, "pick", "(I)I")
            .op(Opcode::ICONST_0)
            .var(Opcode::ILOAD, 0)
            .jump(Opcode::IFEQ, "done")
            .op(Opcode::POP)
            .op(Opcode::ICONST_1)
            .label("done")
            .op(Opcode::IRETURN)
            .up()
            .bytes()
            .unwrap()
    }

    /// The bytes with one occurrence of `from` replaced by `to`
    fn patched(bytes: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
        let at = bytes
            .windows(from.len())
            .position(|w| w == from)
            .expect("pattern in class file");
        let mut out = bytes.to_vec();
        out[at..at + to.len()].copy_from_slice(to);
        out
    }

    #[test]
    fn test_table_must_match_the_code() {
        let bytes = pick();
        assert!(verify(&bytes).is_ok());
        // StackMapTable: one same_locals_1_stack_item frame at 7 holding an int
        let table = [0, 0, 0, 4, 0, 1, 71, 1];

        // a float where the code has an int
        let wrong = patched(&bytes, &table, &[0, 0, 0, 4, 0, 1, 71, 2]);
        assert!(matches!(
            verify(&wrong),
            Err(Error::VerificationFailed { reason, .. }) if reason.contains("doesn't match")
        ));
        // inside the IFEQ
        let inside = patched(&bytes, &table, &[0, 0, 0, 4, 0, 1, 67, 1]);
        assert!(matches!(
            verify(&inside),
            Err(Error::VerificationFailed { reason, .. }) if reason.contains("not an instruction start")
        ));
        // at the POP, leaving the branch target without one
        let early = patched(&bytes, &table, &[0, 0, 0, 4, 0, 1, 69, 1]);
        assert!(verify(&early).is_err());
    }
}
