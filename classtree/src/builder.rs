// builder.rs - Programmatic class construction
//
// Fluent builder over ClassModel, mostly for tests and fixtures:
//
//     let bytes = ClassBuilder::new("org/x/A")
//         .default_constructor()
//         .method(access::PUBLIC, "get", "()I")
//         .int(Opcode::BIPUSH, 42)
//         .op(Opcode::IRETURN)
//         .up()
//         .bytes()?;

use crate::class::ClassTree;
use crate::class_builder;
use crate::error::Result;
use crate::instruction::{Constant, Instruction};
use crate::label::LabelRegistry;
use crate::model::{
    access, ClassModel, DeclaredFrame, FieldModel, FrameValue, MethodModel, TryCatch, CONSTRUCTOR, OBJECT,
};
use crate::opcode::Opcode;
use crate::translate;
use crate::verify;

/// Default class file version (Java 8)
pub const DEFAULT_MAJOR: u16 = 52;

/// Builds one class
#[derive(Debug)]
pub struct ClassBuilder {
    model: ClassModel,
    labels: LabelRegistry,
}

impl ClassBuilder {
    /// A public class extending java/lang/Object
    pub fn new(name: &str) -> Self {
        ClassBuilder {
            model: ClassModel {
                minor_version: 0,
                major_version: DEFAULT_MAJOR,
                access: access::PUBLIC | access::SUPER,
                name: name.to_string(),
                super_name: Some(OBJECT.to_string()),
                interfaces: Vec::new(),
                signature: None,
                source_file: None,
                annotations: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
            },
            labels: LabelRegistry::new(),
        }
    }

    pub fn access(mut self, access: u16) -> Self {
        self.model.access = access;
        self
    }

    pub fn version(mut self, major: u16) -> Self {
        self.model.major_version = major;
        self
    }

    pub fn super_class(mut self, name: &str) -> Self {
        self.model.super_name = Some(name.to_string());
        self
    }

    pub fn interface(mut self, name: &str) -> Self {
        self.model.interfaces.push(name.to_string());
        self
    }

    pub fn source_file(mut self, name: &str) -> Self {
        self.model.source_file = Some(name.to_string());
        self
    }

    pub fn field(mut self, access: u16, name: &str, descriptor: &str) -> Self {
        self.model.fields.push(FieldModel {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            signature: None,
            value: None,
            annotations: Vec::new(),
        });
        self
    }

    /// Start a method; finish it with [`MethodBuilder::up`]
    pub fn method(self, access: u16, name: &str, descriptor: &str) -> MethodBuilder {
        MethodBuilder {
            class: self,
            method: MethodModel::new(access, name, descriptor),
        }
    }

    /// `public <init>()` calling the superclass constructor
    pub fn default_constructor(self) -> Self {
        let parent = self.model.super_name.clone().unwrap_or_else(|| OBJECT.to_string());
        self.method(access::PUBLIC, CONSTRUCTOR, "()V")
            .var(Opcode::ALOAD, 0)
            .invoke(Opcode::INVOKESPECIAL, &parent, CONSTRUCTOR, "()V")
            .op(Opcode::RETURN)
            .up()
    }

    pub fn build(self) -> ClassModel {
        self.model
    }

    pub fn tree(self) -> Result<ClassTree> {
        ClassTree::new(translate::to_tree(&self.model, None))
    }

    /// Verified class file bytes
    pub fn bytes(self) -> Result<Vec<u8>> {
        let bytes = class_builder::build(&self.model)?;
        verify::verify(&bytes)?;
        Ok(bytes)
    }
}

/// Builds one method body inside a [`ClassBuilder`]
#[derive(Debug)]
pub struct MethodBuilder {
    class: ClassBuilder,
    method: MethodModel,
}

impl MethodBuilder {
    pub fn insn(mut self, insn: Instruction) -> Self {
        self.method.instructions.push(insn);
        self
    }

    pub fn op(self, op: Opcode) -> Self {
        self.insn(Instruction::Plain(op))
    }

    pub fn int(self, op: Opcode, value: i32) -> Self {
        self.insn(Instruction::Int(op, value))
    }

    pub fn var(self, op: Opcode, index: u16) -> Self {
        self.insn(Instruction::Var(op, index))
    }

    pub fn iinc(self, index: u16, delta: i16) -> Self {
        self.insn(Instruction::Iinc { index, delta })
    }

    pub fn ldc(self, constant: Constant) -> Self {
        self.insn(Instruction::Ldc(constant))
    }

    pub fn type_insn(self, op: Opcode, name: &str) -> Self {
        self.insn(Instruction::type_insn(op, name))
    }

    pub fn field_insn(self, op: Opcode, owner: &str, name: &str, descriptor: &str) -> Self {
        self.insn(Instruction::field(op, owner, name, descriptor))
    }

    pub fn invoke(self, op: Opcode, owner: &str, name: &str, descriptor: &str) -> Self {
        self.insn(Instruction::method(op, owner, name, descriptor))
    }

    /// Branch to the label with this id
    pub fn jump(mut self, op: Opcode, label: &str) -> Self {
        let label = self.class.labels.resolve(label);
        self.insn(Instruction::Jump(op, label))
    }

    /// Place the label with this id here
    pub fn label(mut self, id: &str) -> Self {
        let label = self.class.labels.resolve(id);
        self.insn(Instruction::Label(label))
    }

    pub fn try_catch(mut self, start: &str, end: &str, handler: &str, catch_type: Option<&str>) -> Self {
        let labels = &mut self.class.labels;
        let entry = TryCatch {
            start: labels.resolve(start),
            end: labels.resolve(end),
            handler: labels.resolve(handler),
            catch_type: catch_type.map(str::to_string),
        };
        self.method.handlers.push(entry);
        self
    }

    /// Declare the frame at a label, the way a compiler would
    pub fn frame(mut self, label: &str, locals: Vec<FrameValue>, stack: Vec<FrameValue>) -> Self {
        let label = self.class.labels.resolve(label);
        self.method.frames.push(DeclaredFrame { label, locals, stack });
        self
    }

    pub fn throws(mut self, exception: &str) -> Self {
        self.method.exceptions.push(exception.to_string());
        self
    }

    /// Finish the method and return to the class
    pub fn up(self) -> ClassBuilder {
        let MethodBuilder { mut class, method } = self;
        class.model.methods.push(method);
        class
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constructor() {
        let model = ClassBuilder::new("org/x/A").default_constructor().build();
        let init = &model.methods[0];
        assert!(init.is_constructor());
        assert_eq!(init.instructions.len(), 3);
    }

    #[test]
    fn test_bytes_verify() {
        let bytes = ClassBuilder::new("org/x/A")
            .default_constructor()
            .method(access::PUBLIC | access::STATIC, "abs", "(I)I")
            .var(Opcode::ILOAD, 0)
            .jump(Opcode::IFGE, "positive")
            .var(Opcode::ILOAD, 0)
            .op(Opcode::INEG)
            .op(Opcode::IRETURN)
            .label("positive")
            .var(Opcode::ILOAD, 0)
            .op(Opcode::IRETURN)
            .up()
            .bytes()
            .unwrap();
        assert_eq!(&bytes[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
    }

    /// `Base b = flag ? new Sub1() : new Sub2(); return b.m();`
    fn pick(frame: bool) -> Result<Vec<u8>> {
        let mut method = ClassBuilder::new("org/x/A")
            .method(access::PUBLIC | access::STATIC, "pick", "(Z)I")
            .var(Opcode::ILOAD, 0)
            .jump(Opcode::IFEQ, "other");
        for (class, end) in [("org/x/Sub1", "join"), ("org/x/Sub2", "")] {
            method = method
                .type_insn(Opcode::NEW, class)
                .op(Opcode::DUP)
                .invoke(Opcode::INVOKESPECIAL, class, CONSTRUCTOR, "()V")
                .var(Opcode::ASTORE, 1);
            if !end.is_empty() {
                method = method.jump(Opcode::GOTO, end).label("other");
            }
        }
        method = method.label("join");
        if frame {
            method = method.frame(
                "join",
                vec![FrameValue::Integer, FrameValue::Object("org/x/Base".into())],
                Vec::new(),
            );
        }
        method
            .var(Opcode::ALOAD, 1)
            .invoke(Opcode::INVOKEVIRTUAL, "org/x/Base", "m", "()I")
            .op(Opcode::IRETURN)
            .up()
            .bytes()
    }

    #[test]
    fn test_declared_frame() {
        assert!(pick(true).is_ok());
        assert!(matches!(
            pick(false),
            Err(crate::error::Error::VerificationFailed { .. })
        ));
    }
}
