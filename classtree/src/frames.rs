// frames.rs - Abstract interpretation of method bodies
//
// Runs the verifier's type inference over a body: computes the entry frame of
// every reachable basic block, max_stack and max_locals, and which blocks are
// dead. The encoder turns the block frames into a StackMapTable.
//
// The class hierarchy isn't available here, so two distinct object types meet
// at java/lang/Object. A frame the class declared for a block overrides that:
// its types replace the inferred ones wherever the two fit. From version 50
// on, a member access whose receiver is only known as java/lang/Object fails,
// since the JVM would reject the frame written for it.

use crate::cfg::{self, ControlFlowGraph, Edge};
use crate::descriptor::{self, FieldType};
use crate::error::{Error, Result};
use crate::instruction::{Constant, Instruction};
use crate::model::{FrameValue, MethodModel, CONSTRUCTOR, OBJECT};
use crate::opcode::Opcode;
use crate::stack_map::STACK_MAP_MAJOR;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

const THROWABLE: &str = "java/lang/Throwable";

/// Verification type of one local or stack slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    /// `this` in a constructor before the super call
    UninitializedThis,
    /// Result of the `NEW` at this body position, before its constructor ran
    Uninitialized(usize),
    /// Internal class name or array descriptor
    Object(String),
    /// Pushed by `JSR`; never appears in a StackMapTable
    ReturnAddress,
}

impl VType {
    pub fn slots(&self) -> usize {
        match self {
            VType::Long | VType::Double => 2,
            _ => 1,
        }
    }

    fn is_reference(&self) -> bool {
        matches!(
            self,
            VType::Null | VType::UninitializedThis | VType::Uninitialized(_) | VType::Object(_)
        )
    }

    pub fn from_field(ty: &FieldType) -> VType {
        match ty {
            FieldType::Byte
            | FieldType::Char
            | FieldType::Short
            | FieldType::Boolean
            | FieldType::Int => VType::Integer,
            FieldType::Float => VType::Float,
            FieldType::Long => VType::Long,
            FieldType::Double => VType::Double,
            FieldType::Object(name) => VType::Object(name.clone()),
            FieldType::Array(desc) => VType::Object(desc.clone()),
        }
    }

    fn merge(&self, other: &VType) -> VType {
        match (self, other) {
            (a, b) if a == b => a.clone(),
            (VType::Null, VType::Object(x)) | (VType::Object(x), VType::Null) => {
                VType::Object(x.clone())
            }
            (VType::Object(_), VType::Object(_)) => VType::Object(OBJECT.to_string()),
            _ => VType::Top,
        }
    }

    /// The declared type of a slot holding `self`, or `None` if they don't fit
    fn declared_as(&self, declared: &FrameValue) -> Option<VType> {
        match (declared, self) {
            (FrameValue::Top, _) => Some(VType::Top),
            (FrameValue::Integer, VType::Integer)
            | (FrameValue::Float, VType::Float)
            | (FrameValue::Long, VType::Long)
            | (FrameValue::Double, VType::Double)
            | (FrameValue::Null, VType::Null)
            | (FrameValue::UninitializedThis, VType::UninitializedThis)
            | (FrameValue::Uninitialized, VType::Uninitialized(_)) => Some(self.clone()),
            (FrameValue::Object(name), VType::Object(_) | VType::Null) => {
                Some(VType::Object(name.clone()))
            }
            _ => None,
        }
    }
}

/// Locals and operand stack at one point of a body
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    /// One entry per slot; the slot after a long or double is `Top`
    pub locals: Vec<VType>,
    /// One entry per value
    pub stack: Vec<VType>,
}

impl Frame {
    pub fn stack_size(&self) -> usize {
        self.stack.iter().map(VType::slots).sum()
    }

    fn push(&mut self, value: VType) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> std::result::Result<VType, String> {
        self.stack.pop().ok_or_else(|| "operand stack underflow".to_string())
    }

    /// Pop a value taking one slot
    fn pop_single(&mut self) -> std::result::Result<VType, String> {
        let value = self.pop()?;
        if value.slots() != 1 {
            return Err(format!("{:?} where a one-slot value is needed", value));
        }
        Ok(value)
    }

    /// Pop a primitive of exactly this type
    fn pop_kind(&mut self, expected: &VType) -> std::result::Result<(), String> {
        let found = self.pop()?;
        if found != *expected {
            return Err(format!("expected {:?} on the stack, found {:?}", expected, found));
        }
        Ok(())
    }

    /// Pop an initialized reference or null
    fn pop_object(&mut self) -> std::result::Result<VType, String> {
        match self.pop()? {
            value @ (VType::Null | VType::Object(_)) => Ok(value),
            other => Err(format!("expected an object on the stack, found {:?}", other)),
        }
    }

    /// Pop a value that can be stored in a field, parameter or return slot of
    /// type `ty`
    fn pop_as(&mut self, ty: &VType) -> std::result::Result<(), String> {
        match ty {
            VType::Object(_) => self.pop_object().map(drop),
            other => self.pop_kind(other),
        }
    }

    fn local(&self, index: usize) -> VType {
        self.locals.get(index).cloned().unwrap_or(VType::Top)
    }

    fn set_local(&mut self, index: usize, value: VType) {
        let size = value.slots();
        if self.locals.len() < index + size {
            self.locals.resize(index + size, VType::Top);
        }
        if index > 0 && self.locals[index - 1].slots() == 2 {
            self.locals[index - 1] = VType::Top;
        }
        self.locals[index] = value;
        if size == 2 {
            self.locals[index + 1] = VType::Top;
        }
    }

    /// Replace every occurrence of an uninitialized value after its
    /// constructor ran
    fn initialize(&mut self, from: &VType, to: &VType) {
        for slot in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if slot == from {
                *slot = to.clone();
            }
        }
    }

    /// Merge `other` into this frame
    fn merge(&mut self, other: &Frame) -> std::result::Result<(), String> {
        if self.stack.len() != other.stack.len() {
            return Err(format!(
                "stack heights differ at a join ({} vs {})",
                self.stack.len(),
                other.stack.len()
            ));
        }
        for (mine, theirs) in self.stack.iter_mut().zip(&other.stack) {
            let merged = mine.merge(theirs);
            if merged == VType::Top {
                return Err(format!(
                    "incompatible stack values {:?} and {:?} at a join",
                    mine, theirs
                ));
            }
            *mine = merged;
        }
        let len = self.locals.len().max(other.locals.len());
        self.locals = (0..len).map(|i| self.local(i).merge(&other.local(i))).collect();
        Ok(())
    }

    /// This frame with the declared types put in, or `None` when the
    /// declaration doesn't fit it
    fn declared(&self, declared: &Declared) -> Option<Frame> {
        if self.stack.len() != declared.stack.len() {
            return None;
        }
        let stack = self
            .stack
            .iter()
            .zip(&declared.stack)
            .map(|(value, ty)| value.declared_as(ty))
            .collect::<Option<Vec<_>>>()?;
        let len = self.locals.len().max(declared.locals.len());
        let locals = (0..len)
            .map(|i| match declared.locals.get(i) {
                Some(ty) => self.local(i).declared_as(ty),
                None => Some(VType::Top),
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Frame { locals, stack })
    }
}

/// A declared frame with its locals spread over slots
#[derive(Debug)]
struct Declared {
    locals: Vec<FrameValue>,
    stack: Vec<FrameValue>,
}

impl Declared {
    fn new(locals: &[FrameValue], stack: &[FrameValue]) -> Self {
        let mut slots = Vec::with_capacity(locals.len());
        for value in locals {
            slots.push(value.clone());
            if value.slots() == 2 {
                slots.push(FrameValue::Top);
            }
        }
        Declared {
            locals: slots,
            stack: stack.to_vec(),
        }
    }
}

/// Result of analyzing one method body
#[derive(Debug)]
pub struct Analysis {
    pub cfg: ControlFlowGraph,
    /// Entry frame of every reachable block, by start position
    pub frames: BTreeMap<usize, Frame>,
    /// Initial frame built from the descriptor
    pub initial: Frame,
    /// Position ranges of blocks no path reaches
    pub unreachable: Vec<(usize, usize)>,
    /// Block starts whose declared frame didn't fit and was inferred instead
    pub ignored: Vec<usize>,
    pub max_stack: u16,
    pub max_locals: u16,
}

/// Analyze a method of class `owner`, from a class file of version `major`
pub fn analyze(owner: &str, major: u16, method: &MethodModel) -> Result<Analysis> {
    let fail = |reason: String| Error::VerificationFailed {
        class: owner.to_string(),
        reason: format!("{}{}: {}", method.name, method.descriptor, reason),
    };

    let cfg = cfg::build(&method.instructions, &method.handlers)?;
    let initial = initial_frame(owner, method).map_err(&fail)?;
    let ret = descriptor::parse_method(&method.descriptor)
        .and_then(|signature| signature.ret)
        .map(|ty| VType::from_field(&ty));

    let mut declared = HashMap::new();
    for frame in &method.frames {
        match cfg.labels.get(&frame.label) {
            Some(&position) => {
                declared.insert(position, Declared::new(&frame.locals, &frame.stack));
            }
            None => debug!(
                "{}.{}: frame declared at missing label {}",
                owner,
                method.name,
                frame.label.id()
            ),
        }
    }

    let mut analyzer = Analyzer {
        owner,
        insns: &method.instructions,
        cfg: &cfg,
        strict: major >= STACK_MAP_MAJOR,
        constructor: method.is_constructor() && owner != OBJECT,
        ret,
        declared,
        ignored: Vec::new(),
        frames: BTreeMap::new(),
        worklist: Vec::new(),
        max_stack: 0,
        max_locals: initial.locals.len(),
    };
    if !method.instructions.is_empty() {
        analyzer.merge_into(0, &initial).map_err(&fail)?;
    }
    analyzer.run().map_err(&fail)?;

    let Analyzer {
        frames,
        mut ignored,
        max_stack,
        max_locals,
        ..
    } = analyzer;
    ignored.sort_unstable();

    let mut unreachable: Vec<(usize, usize)> = Vec::new();
    for (start, block) in &cfg.blocks {
        if frames.contains_key(start) {
            continue;
        }
        match unreachable.last_mut() {
            Some(last) if last.1 == *start => last.1 = block.end,
            _ => unreachable.push((*start, block.end)),
        }
    }

    let max_stack = u16::try_from(max_stack).map_err(|_| fail("stack deeper than 65535".into()))?;
    let max_locals =
        u16::try_from(max_locals).map_err(|_| fail("more than 65535 locals".into()))?;

    Ok(Analysis {
        cfg,
        frames,
        initial,
        unreachable,
        ignored,
        max_stack,
        max_locals,
    })
}

fn initial_frame(owner: &str, method: &MethodModel) -> std::result::Result<Frame, String> {
    let signature = descriptor::parse_method(&method.descriptor)
        .ok_or_else(|| format!("invalid method descriptor {}", method.descriptor))?;
    let mut frame = Frame::default();
    if !method.is_static() {
        let this = if method.name == CONSTRUCTOR && owner != OBJECT {
            VType::UninitializedThis
        } else {
            VType::Object(owner.to_string())
        };
        frame.locals.push(this);
    }
    for param in &signature.params {
        let value = VType::from_field(param);
        let index = frame.locals.len();
        frame.set_local(index, value);
    }
    Ok(frame)
}

struct Analyzer<'a> {
    owner: &'a str,
    insns: &'a [Instruction],
    cfg: &'a ControlFlowGraph,
    /// Receivers only known as java/lang/Object are errors
    strict: bool,
    /// `this` must be initialized before returning
    constructor: bool,
    ret: Option<VType>,
    declared: HashMap<usize, Declared>,
    ignored: Vec<usize>,
    frames: BTreeMap<usize, Frame>,
    worklist: Vec<usize>,
    max_stack: usize,
    max_locals: usize,
}

type Step = std::result::Result<(), String>;

impl<'a> Analyzer<'a> {
    fn merge_into(&mut self, target: usize, incoming: &Frame) -> Step {
        let mut merged = match self.frames.get(&target) {
            None => incoming.clone(),
            Some(existing) => {
                let mut merged = existing.clone();
                merged
                    .merge(incoming)
                    .map_err(|e| format!("at position {}: {}", target, e))?;
                merged
            }
        };
        if let Some(declared) = self.declared.get(&target) {
            match merged.declared(declared) {
                Some(frame) => merged = frame,
                None => {
                    debug!(
                        "{}: declared frame at position {} doesn't fit, inferring it",
                        self.owner, target
                    );
                    self.declared.remove(&target);
                    self.ignored.push(target);
                }
            }
        }
        if self.frames.get(&target) != Some(&merged) {
            self.frames.insert(target, merged);
            self.worklist.push(target);
        }
        Ok(())
    }

    fn run(&mut self) -> Step {
        let cfg = self.cfg;
        let insns = self.insns;
        while let Some(start) = self.worklist.pop() {
            let (Some(block), Some(entry)) = (cfg.blocks.get(&start), self.frames.get(&start))
            else {
                continue;
            };
            let mut frame = entry.clone();
            self.max_stack = self.max_stack.max(frame.stack_size());

            for position in block.start..block.end {
                let insn = &insns[position];
                if !matches!(insn, Instruction::Label(_)) {
                    for range in cfg.handlers.iter().filter(|h| h.covers(position)) {
                        let caught = range.catch_type.as_deref().unwrap_or(THROWABLE);
                        let handler_frame = Frame {
                            locals: frame.locals.clone(),
                            stack: vec![VType::Object(caught.to_string())],
                        };
                        self.merge_into(range.handler, &handler_frame)?;
                    }
                }
                self.execute(&mut frame, position).map_err(|e| {
                    let what = insn.opcode().map_or("label", Opcode::mnemonic);
                    format!("at position {} ({}): {}", position, what, e)
                })?;
                self.max_stack = self.max_stack.max(frame.stack_size());
                self.max_locals = self.max_locals.max(frame.locals.len());
            }

            if block.falls_off {
                return Err("execution falls off the end of the code".to_string());
            }
            for edge in &block.successors {
                match *edge {
                    Edge::Flow(target) => self.merge_into(target, &frame)?,
                    Edge::AfterJsr(target) => {
                        let mut returned = frame.clone();
                        returned.stack.pop();
                        self.merge_into(target, &returned)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn touch_local(&mut self, index: usize, size: usize) {
        self.max_locals = self.max_locals.max(index + size);
    }

    fn execute(&mut self, frame: &mut Frame, position: usize) -> Step {
        let insns = self.insns;
        match &insns[position] {
            Instruction::Label(_) => {}
            Instruction::Plain(op) if op.is_return() => self.check_return(frame, *op)?,
            Instruction::Plain(op) => self.plain(frame, *op)?,
            Instruction::Int(op, value) => {
                if *op == Opcode::NEWARRAY {
                    frame.pop_kind(&VType::Integer)?;
                    frame.push(VType::Object(primitive_array(*value)?.to_string()));
                } else {
                    frame.push(VType::Integer);
                }
            }
            Instruction::Var(op, index) => {
                let index = usize::from(*index);
                self.var(frame, *op, index)?;
            }
            Instruction::Iinc { index, .. } => {
                let index = usize::from(*index);
                if frame.local(index) != VType::Integer {
                    return Err(format!("IINC of non-int local {}", index));
                }
                self.touch_local(index, 1);
            }
            Instruction::Ldc(constant) => frame.push(match constant {
                Constant::Int(_) => VType::Integer,
                Constant::Float(_) => VType::Float,
                Constant::Long(_) => VType::Long,
                Constant::Double(_) => VType::Double,
                Constant::String(_) => VType::Object("java/lang/String".to_string()),
                Constant::Type(_) => VType::Object("java/lang/Class".to_string()),
            }),
            Instruction::Type(op, name) => match op {
                Opcode::NEW => frame.push(VType::Uninitialized(position)),
                Opcode::ANEWARRAY => {
                    frame.pop_kind(&VType::Integer)?;
                    let array = if name.starts_with('[') {
                        format!("[{}", name)
                    } else {
                        format!("[L{};", name)
                    };
                    frame.push(VType::Object(array));
                }
                Opcode::CHECKCAST => {
                    frame.pop_object()?;
                    frame.push(VType::Object(name.clone()));
                }
                _ => {
                    frame.pop_object()?;
                    frame.push(VType::Integer);
                }
            },
            Instruction::Field {
                opcode,
                owner,
                descriptor,
                ..
            } => {
                let ty = descriptor::parse_field(descriptor)
                    .ok_or_else(|| format!("invalid field descriptor {}", descriptor))?;
                let value = VType::from_field(&ty);
                match opcode {
                    Opcode::GETSTATIC => frame.push(value),
                    Opcode::PUTSTATIC => frame.pop_as(&value)?,
                    Opcode::GETFIELD => {
                        self.pop_receiver(frame, owner)?;
                        frame.push(value);
                    }
                    _ => {
                        frame.pop_as(&value)?;
                        // A constructor may set its own fields before the super call
                        if frame.stack.last() == Some(&VType::UninitializedThis) && owner == self.owner {
                            frame.pop()?;
                        } else {
                            self.pop_receiver(frame, owner)?;
                        }
                    }
                }
            }
            Instruction::Method {
                opcode,
                owner,
                name,
                descriptor,
                ..
            } => self.invoke(frame, *opcode, owner, name, descriptor)?,
            Instruction::Jump(op, _) => match op {
                Opcode::GOTO => {}
                Opcode::JSR => frame.push(VType::ReturnAddress),
                Opcode::IFEQ
                | Opcode::IFNE
                | Opcode::IFLT
                | Opcode::IFGE
                | Opcode::IFGT
                | Opcode::IFLE => frame.pop_kind(&VType::Integer)?,
                Opcode::IFNULL | Opcode::IFNONNULL => {
                    pop_reference(frame)?;
                }
                Opcode::IF_ACMPEQ | Opcode::IF_ACMPNE => {
                    pop_reference(frame)?;
                    pop_reference(frame)?;
                }
                _ => {
                    frame.pop_kind(&VType::Integer)?;
                    frame.pop_kind(&VType::Integer)?;
                }
            },
            Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } => {
                frame.pop_kind(&VType::Integer)?;
            }
            Instruction::MultiANewArray {
                descriptor,
                dimensions,
            } => {
                for _ in 0..*dimensions {
                    frame.pop_kind(&VType::Integer)?;
                }
                frame.push(VType::Object(descriptor.clone()));
            }
        }
        Ok(())
    }

    fn var(&mut self, frame: &mut Frame, op: Opcode, index: usize) -> Step {
        let load = |frame: &mut Frame, expected: VType| -> Step {
            let found = frame.local(index);
            if found != expected {
                return Err(format!("local {} holds {:?}", index, found));
            }
            frame.push(expected);
            Ok(())
        };
        match op {
            Opcode::ILOAD => load(frame, VType::Integer)?,
            Opcode::LLOAD => load(frame, VType::Long)?,
            Opcode::FLOAD => load(frame, VType::Float)?,
            Opcode::DLOAD => load(frame, VType::Double)?,
            Opcode::ALOAD => {
                let value = frame.local(index);
                if !value.is_reference() {
                    return Err(format!("local {} holds {:?}", index, value));
                }
                frame.push(value);
            }
            Opcode::ISTORE | Opcode::FSTORE | Opcode::LSTORE | Opcode::DSTORE => {
                let value = match op {
                    Opcode::ISTORE => VType::Integer,
                    Opcode::FSTORE => VType::Float,
                    Opcode::LSTORE => VType::Long,
                    _ => VType::Double,
                };
                frame.pop_kind(&value)?;
                frame.set_local(index, value);
            }
            Opcode::ASTORE => {
                let value = frame.pop()?;
                if !value.is_reference() && value != VType::ReturnAddress {
                    return Err(format!("storing {:?}", value));
                }
                frame.set_local(index, value);
            }
            // RET
            _ => {}
        }
        let size = match op {
            Opcode::LLOAD | Opcode::DLOAD | Opcode::LSTORE | Opcode::DSTORE => 2,
            _ => 1,
        };
        self.touch_local(index, size);
        Ok(())
    }

    /// Pop the receiver of a field or method of `owner`
    fn pop_receiver(&self, frame: &mut Frame, owner: &str) -> std::result::Result<VType, String> {
        let receiver = frame.pop_object()?;
        if self.strict
            && owner != OBJECT
            && !owner.starts_with('[')
            && receiver == VType::Object(OBJECT.to_string())
        {
            return Err(format!("receiver for {} is only known as {}", owner, OBJECT));
        }
        Ok(receiver)
    }

    /// Pop an array reference
    fn pop_array(&self, frame: &mut Frame) -> std::result::Result<VType, String> {
        let array = frame.pop_object()?;
        match &array {
            VType::Object(desc) if !desc.starts_with('[') && (self.strict || desc != OBJECT) => {
                Err(format!("{} is not an array", desc))
            }
            _ => Ok(array),
        }
    }

    fn invoke(
        &mut self,
        frame: &mut Frame,
        op: Opcode,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Step {
        let signature = descriptor::parse_method(descriptor)
            .ok_or_else(|| format!("invalid method descriptor {}", descriptor))?;
        for (n, param) in signature.params.iter().enumerate().rev() {
            frame
                .pop_as(&VType::from_field(param))
                .map_err(|e| format!("argument {} of {}.{}: {}", n, owner, name, e))?;
        }
        if op != Opcode::INVOKESTATIC {
            if name == CONSTRUCTOR {
                if op != Opcode::INVOKESPECIAL {
                    return Err(format!("{} of a constructor", op.mnemonic()));
                }
                let receiver = frame.pop()?;
                let initialized = match &receiver {
                    VType::UninitializedThis => VType::Object(self.owner.to_string()),
                    VType::Uninitialized(at) => match &self.insns[*at] {
                        Instruction::Type(Opcode::NEW, class) => VType::Object(class.clone()),
                        _ => return Err(format!("uninitialized value from position {}", at)),
                    },
                    other => {
                        return Err(format!(
                            "constructor {}.<init> called on {:?}",
                            owner, other
                        ))
                    }
                };
                frame.initialize(&receiver, &initialized);
            } else if op == Opcode::INVOKEINTERFACE {
                frame.pop_object()?;
            } else {
                self.pop_receiver(frame, owner)?;
            }
        }
        if let Some(ret) = &signature.ret {
            frame.push(VType::from_field(ret));
        }
        Ok(())
    }

    fn check_return(&self, frame: &mut Frame, op: Opcode) -> Step {
        let Some(expected) = &self.ret else {
            if op != Opcode::RETURN {
                return Err("returning a value from a void method".to_string());
            }
            if self.constructor && frame.local(0) == VType::UninitializedThis {
                return Err("constructor returns before calling super() or this()".to_string());
            }
            return Ok(());
        };
        let fits = match op {
            Opcode::IRETURN => *expected == VType::Integer,
            Opcode::LRETURN => *expected == VType::Long,
            Opcode::FRETURN => *expected == VType::Float,
            Opcode::DRETURN => *expected == VType::Double,
            Opcode::ARETURN => matches!(expected, VType::Object(_)),
            _ => false,
        };
        if !fits {
            return Err(format!("method returns {:?}", expected));
        }
        frame.pop_as(expected)
    }

    /// Stack effect of an operand-free instruction other than a return
    fn plain(&self, frame: &mut Frame, op: Opcode) -> Step {
        const KINDS: [VType; 4] = [VType::Integer, VType::Long, VType::Float, VType::Double];
        let byte = op.byte();
        match byte {
            0 => {}
            1 => frame.push(VType::Null),
            2..=8 => frame.push(VType::Integer),
            9 | 10 => frame.push(VType::Long),
            11..=13 => frame.push(VType::Float),
            14 | 15 => frame.push(VType::Double),
            // xALOAD
            46..=53 => {
                frame.pop_kind(&VType::Integer)?;
                let array = self.pop_array(frame)?;
                frame.push(match byte {
                    47 => VType::Long,
                    48 => VType::Float,
                    49 => VType::Double,
                    50 => component(&array),
                    _ => VType::Integer,
                });
            }
            // xASTORE
            79..=86 => {
                match byte {
                    80 => frame.pop_kind(&VType::Long)?,
                    81 => frame.pop_kind(&VType::Float)?,
                    82 => frame.pop_kind(&VType::Double)?,
                    83 => frame.pop_object().map(drop)?,
                    _ => frame.pop_kind(&VType::Integer)?,
                }
                frame.pop_kind(&VType::Integer)?;
                self.pop_array(frame)?;
            }
            87 => {
                frame.pop_single()?;
            }
            88 => {
                if frame.pop()?.slots() == 1 {
                    frame.pop_single()?;
                }
            }
            89..=95 => stack_op(frame, op)?,
            // add, sub, mul, div, rem
            96..=115 => {
                let kind = &KINDS[usize::from((byte - 96) % 4)];
                frame.pop_kind(kind)?;
                frame.pop_kind(kind)?;
                frame.push(kind.clone());
            }
            // neg
            116..=119 => {
                let kind = &KINDS[usize::from((byte - 116) % 4)];
                frame.pop_kind(kind)?;
                frame.push(kind.clone());
            }
            // shifts take an int count; shifts and bitwise ops alternate int/long
            120..=131 => {
                let kind = &KINDS[usize::from((byte - 120) % 2)];
                if byte <= 125 {
                    frame.pop_kind(&VType::Integer)?;
                } else {
                    frame.pop_kind(kind)?;
                }
                frame.pop_kind(kind)?;
                frame.push(kind.clone());
            }
            133..=147 => {
                let from = match byte {
                    136..=138 => VType::Long,
                    139..=141 => VType::Float,
                    142..=144 => VType::Double,
                    _ => VType::Integer,
                };
                frame.pop_kind(&from)?;
                frame.push(match op {
                    Opcode::I2L | Opcode::F2L | Opcode::D2L => VType::Long,
                    Opcode::I2F | Opcode::L2F | Opcode::D2F => VType::Float,
                    Opcode::I2D | Opcode::L2D | Opcode::F2D => VType::Double,
                    _ => VType::Integer,
                });
            }
            148..=152 => {
                let kind = match byte {
                    148 => VType::Long,
                    149 | 150 => VType::Float,
                    _ => VType::Double,
                };
                frame.pop_kind(&kind)?;
                frame.pop_kind(&kind)?;
                frame.push(VType::Integer);
            }
            190 => {
                self.pop_array(frame)?;
                frame.push(VType::Integer);
            }
            191 => {
                self.pop_receiver(frame, THROWABLE)?;
            }
            194 | 195 => {
                frame.pop_object()?;
            }
            _ => return Err(format!("{} is not an operand-free instruction", op.mnemonic())),
        }
        Ok(())
    }
}

/// Pop any reference, initialized or not
fn pop_reference(frame: &mut Frame) -> std::result::Result<VType, String> {
    let value = frame.pop()?;
    if !value.is_reference() {
        return Err(format!("expected a reference on the stack, found {:?}", value));
    }
    Ok(value)
}

fn primitive_array(atype: i32) -> std::result::Result<&'static str, String> {
    Ok(match atype {
        4 => "[Z",
        5 => "[C",
        6 => "[F",
        7 => "[D",
        8 => "[B",
        9 => "[S",
        10 => "[I",
        11 => "[J",
        other => return Err(format!("NEWARRAY of unknown type {}", other)),
    })
}

fn component(array: &VType) -> VType {
    match array {
        VType::Null => VType::Null,
        VType::Object(desc) if desc.starts_with('[') => descriptor::parse_field(&desc[1..])
            .map(|ty| VType::from_field(&ty))
            .unwrap_or_else(|| VType::Object(OBJECT.to_string())),
        _ => VType::Object(OBJECT.to_string()),
    }
}

/// DUP family and SWAP, honoring value categories
fn stack_op(frame: &mut Frame, op: Opcode) -> Step {
    let one = |v: &VType| v.slots() == 1;
    match op {
        Opcode::DUP => {
            let v1 = frame.pop_single()?;
            frame.push(v1.clone());
            frame.push(v1);
        }
        Opcode::DUP_X1 => {
            let v1 = frame.pop_single()?;
            let v2 = frame.pop_single()?;
            frame.stack.extend([v1.clone(), v2, v1]);
        }
        Opcode::DUP_X2 => {
            let v1 = frame.pop_single()?;
            let v2 = frame.pop()?;
            if one(&v2) {
                let v3 = frame.pop_single()?;
                frame.stack.extend([v1.clone(), v3, v2, v1]);
            } else {
                frame.stack.extend([v1.clone(), v2, v1]);
            }
        }
        Opcode::DUP2 => {
            let v1 = frame.pop()?;
            if one(&v1) {
                let v2 = frame.pop_single()?;
                frame.stack.extend([v2.clone(), v1.clone(), v2, v1]);
            } else {
                frame.stack.extend([v1.clone(), v1]);
            }
        }
        Opcode::DUP2_X1 => {
            let v1 = frame.pop()?;
            if one(&v1) {
                let v2 = frame.pop_single()?;
                let v3 = frame.pop_single()?;
                frame.stack.extend([v2.clone(), v1.clone(), v3, v2, v1]);
            } else {
                let v2 = frame.pop_single()?;
                frame.stack.extend([v1.clone(), v2, v1]);
            }
        }
        Opcode::DUP2_X2 => {
            let v1 = frame.pop()?;
            if one(&v1) {
                let v2 = frame.pop_single()?;
                let v3 = frame.pop()?;
                if one(&v3) {
                    let v4 = frame.pop_single()?;
                    frame.stack.extend([v2.clone(), v1.clone(), v4, v3, v2, v1]);
                } else {
                    frame.stack.extend([v2.clone(), v1.clone(), v3, v2, v1]);
                }
            } else {
                let v2 = frame.pop()?;
                if one(&v2) {
                    let v3 = frame.pop_single()?;
                    frame.stack.extend([v1.clone(), v3, v2, v1]);
                } else {
                    frame.stack.extend([v1.clone(), v2, v1]);
                }
            }
        }
        _ => {
            let v1 = frame.pop_single()?;
            let v2 = frame.pop_single()?;
            frame.stack.extend([v1, v2]);
        }
    }
    Ok(())
}
