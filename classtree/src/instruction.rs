// instruction.rs - Typed instructions and their tree nodes
//
// `Instruction` is the closed set of operations with typed operands. It
// converts to an `opcode` node (operands as leaf children) and back; label
// references go through the registry of the surrounding decode.

use crate::error::{Error, Result};
use crate::label::{Label, LabelRegistry};
use crate::opcode::{Opcode, Shape};
use crate::tree::{mnemonic_of, Node, OPCODE};
use crate::value::{Kind, Value};

/// A loadable constant
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// Class literal, internal name or array descriptor
    Type(String),
}

impl Constant {
    pub fn to_value(&self) -> Value {
        match self {
            Constant::Int(v) => Value::Int(i64::from(*v)),
            Constant::Long(v) => Value::Long(*v),
            Constant::Float(v) => Value::Float(*v),
            Constant::Double(v) => Value::Double(*v),
            Constant::String(s) => Value::Str(s.clone()),
            Constant::Type(t) => Value::Type(t.clone()),
        }
    }

    pub fn from_value(value: Value) -> Result<Constant> {
        match value {
            Value::Int(v) => Ok(Constant::Int(narrow(v, "int constant")?)),
            Value::Long(v) => Ok(Constant::Long(v)),
            Value::Float(v) => Ok(Constant::Float(v)),
            Value::Double(v) => Ok(Constant::Double(v)),
            Value::Str(s) => Ok(Constant::String(s)),
            Value::Type(t) => Ok(Constant::Type(t)),
            other => Err(Error::tree(format!("{} is not a loadable constant", other.kind()))),
        }
    }

    /// Takes two stack/pool slots
    pub fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }
}

/// One element of a method body
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Branch target marker (no bytecode of its own)
    Label(Label),
    Plain(Opcode),
    Int(Opcode, i32),
    Var(Opcode, u16),
    Iinc { index: u16, delta: i16 },
    Ldc(Constant),
    Type(Opcode, String),
    Field {
        opcode: Opcode,
        owner: String,
        name: String,
        descriptor: String,
    },
    Method {
        opcode: Opcode,
        owner: String,
        name: String,
        descriptor: String,
        interface: bool,
    },
    Jump(Opcode, Label),
    TableSwitch {
        low: i32,
        high: i32,
        default: Label,
        targets: Vec<Label>,
    },
    LookupSwitch {
        default: Label,
        pairs: Vec<(i32, Label)>,
    },
    MultiANewArray { descriptor: String, dimensions: u8 },
}

impl Instruction {
    pub fn field(opcode: Opcode, owner: &str, name: &str, descriptor: &str) -> Self {
        Instruction::Field {
            opcode,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }

    pub fn method(opcode: Opcode, owner: &str, name: &str, descriptor: &str) -> Self {
        Instruction::Method {
            opcode,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            interface: opcode == Opcode::INVOKEINTERFACE,
        }
    }

    pub fn type_insn(opcode: Opcode, name: &str) -> Self {
        Instruction::Type(opcode, name.to_string())
    }

    /// Operation of this instruction; `None` for labels
    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            Instruction::Label(_) => None,
            Instruction::Plain(op)
            | Instruction::Int(op, _)
            | Instruction::Var(op, _)
            | Instruction::Type(op, _)
            | Instruction::Jump(op, _) => Some(*op),
            Instruction::Iinc { .. } => Some(Opcode::IINC),
            Instruction::Ldc(_) => Some(Opcode::LDC),
            Instruction::Field { opcode, .. } | Instruction::Method { opcode, .. } => Some(*opcode),
            Instruction::TableSwitch { .. } => Some(Opcode::TABLESWITCH),
            Instruction::LookupSwitch { .. } => Some(Opcode::LOOKUPSWITCH),
            Instruction::MultiANewArray { .. } => Some(Opcode::MULTIANEWARRAY),
        }
    }

    /// Labels this instruction can transfer control to
    pub fn targets(&self) -> Vec<&Label> {
        match self {
            Instruction::Jump(_, label) => vec![label],
            Instruction::TableSwitch { default, targets, .. } => {
                std::iter::once(default).chain(targets.iter()).collect()
            }
            Instruction::LookupSwitch { default, pairs } => std::iter::once(default)
                .chain(pairs.iter().map(|(_, label)| label))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Convert to an `opcode` (or `label`) node without a positional suffix
    pub fn to_node(&self) -> Node {
        let op_node = |op: Opcode| Node::named(OPCODE, format!("{}-{}", op.mnemonic(), op.byte()));
        let int = |v: i64| Node::leaf(&Value::Int(v));
        let string = |s: &str| Node::leaf(&Value::Str(s.to_string()));
        let label = |l: &Label| Node::leaf(&Value::Label(l.id().to_string()));

        match self {
            Instruction::Label(l) => label(l),
            Instruction::Plain(op) => op_node(*op),
            Instruction::Int(op, v) => op_node(*op).with_child(int(i64::from(*v))),
            Instruction::Var(op, index) => op_node(*op).with_child(int(i64::from(*index))),
            Instruction::Iinc { index, delta } => op_node(Opcode::IINC)
                .with_child(int(i64::from(*index)))
                .with_child(int(i64::from(*delta))),
            Instruction::Ldc(constant) => {
                op_node(Opcode::LDC).with_child(Node::leaf(&constant.to_value()))
            }
            Instruction::Type(op, name) => op_node(*op).with_child(string(name)),
            Instruction::Field {
                opcode,
                owner,
                name,
                descriptor,
            } => op_node(*opcode)
                .with_child(string(owner))
                .with_child(string(name))
                .with_child(string(descriptor)),
            Instruction::Method {
                opcode,
                owner,
                name,
                descriptor,
                interface,
            } => op_node(*opcode)
                .with_child(string(owner))
                .with_child(string(name))
                .with_child(string(descriptor))
                .with_child(Node::leaf(&Value::Bool(*interface))),
            Instruction::Jump(op, target) => op_node(*op).with_child(label(target)),
            Instruction::TableSwitch {
                low,
                high,
                default,
                targets,
            } => op_node(Opcode::TABLESWITCH)
                .with_child(int(i64::from(*low)))
                .with_child(int(i64::from(*high)))
                .with_child(label(default))
                .with_children(targets.iter().map(label)),
            Instruction::LookupSwitch { default, pairs } => {
                let mut node = op_node(Opcode::LOOKUPSWITCH).with_child(label(default));
                for (key, target) in pairs {
                    node = node.with_child(int(i64::from(*key))).with_child(label(target));
                }
                node
            }
            Instruction::MultiANewArray {
                descriptor,
                dimensions,
            } => op_node(Opcode::MULTIANEWARRAY)
                .with_child(string(descriptor))
                .with_child(int(i64::from(*dimensions))),
        }
    }

    /// Rebuild an instruction from its node, resolving labels via `labels`
    pub fn from_node(node: &Node, labels: &mut LabelRegistry) -> Result<Instruction> {
        match node.base() {
            "label" => match node.value()? {
                Value::Label(id) => Ok(Instruction::Label(labels.resolve(&id))),
                _ => Err(Error::tree("label node without a label payload")),
            },
            OPCODE => {
                let tag = node.name().unwrap_or("");
                let op = Opcode::from_mnemonic(mnemonic_of(tag)).ok_or_else(|| {
                    Error::UnknownOperation {
                        tag: tag.to_string(),
                    }
                })?;
                decode_operands(op, node.children(), labels)
            }
            other => Err(Error::UnknownOperation {
                tag: other.to_string(),
            }),
        }
    }
}

/// Operands of one instruction node, checked against its shape
struct Operands<'a> {
    op: Opcode,
    values: Vec<Value>,
    expected: &'static str,
    nodes: &'a [Node],
}

impl<'a> Operands<'a> {
    fn new(op: Opcode, nodes: &'a [Node], expected: &'static str) -> Result<Self> {
        let mut values = Vec::with_capacity(nodes.len());
        for node in nodes {
            if !node.is_leaf() {
                return Err(mismatch(op, expected, nodes));
            }
            values.push(node.value()?);
        }
        Ok(Operands {
            op,
            values,
            expected,
            nodes,
        })
    }

    fn fail(&self) -> Error {
        mismatch(self.op, self.expected, self.nodes)
    }

    fn count(&self, allowed: &[usize]) -> Result<()> {
        if allowed.contains(&self.values.len()) {
            Ok(())
        } else {
            Err(self.fail())
        }
    }

    fn int(&self, i: usize) -> Result<i64> {
        match self.values.get(i) {
            Some(Value::Int(v)) => Ok(*v),
            _ => Err(self.fail()),
        }
    }

    fn string(&self, i: usize) -> Result<String> {
        match self.values.get(i) {
            Some(Value::Str(s)) => Ok(s.clone()),
            _ => Err(self.fail()),
        }
    }

    fn label(&self, i: usize, labels: &mut LabelRegistry) -> Result<Label> {
        match self.values.get(i) {
            Some(Value::Label(id)) => Ok(labels.resolve(id)),
            _ => Err(self.fail()),
        }
    }
}

fn mismatch(op: Opcode, expected: &str, nodes: &[Node]) -> Error {
    let found: Vec<&str> = nodes.iter().map(Node::base).collect();
    Error::OperandArityMismatch {
        operation: op.mnemonic().to_string(),
        expected: expected.to_string(),
        found: format!("[{}]", found.join(", ")),
    }
}

/// Narrow an 8-byte int payload to the operand's real width
fn narrow<T: TryFrom<i64>>(value: i64, what: &str) -> Result<T> {
    T::try_from(value).map_err(|_| Error::payload(value.to_string(), format!("{} out of range", what)))
}

fn decode_operands(op: Opcode, nodes: &[Node], labels: &mut LabelRegistry) -> Result<Instruction> {
    match op.shape() {
        Shape::Plain => {
            Operands::new(op, nodes, "no operands")?.count(&[0])?;
            Ok(Instruction::Plain(op))
        }
        Shape::Int => {
            let ops = Operands::new(op, nodes, "[int]")?;
            ops.count(&[1])?;
            let v = ops.int(0)?;
            let value = match op {
                Opcode::BIPUSH => i32::from(narrow::<i8>(v, "BIPUSH operand")?),
                Opcode::SIPUSH => i32::from(narrow::<i16>(v, "SIPUSH operand")?),
                _ => {
                    if !(4..=11).contains(&v) {
                        return Err(Error::payload(v.to_string(), "NEWARRAY element type"));
                    }
                    v as i32
                }
            };
            Ok(Instruction::Int(op, value))
        }
        Shape::Var => {
            let ops = Operands::new(op, nodes, "[int]")?;
            ops.count(&[1])?;
            Ok(Instruction::Var(op, narrow(ops.int(0)?, "local index")?))
        }
        Shape::Iinc => {
            let ops = Operands::new(op, nodes, "[int, int]")?;
            ops.count(&[2])?;
            Ok(Instruction::Iinc {
                index: narrow(ops.int(0)?, "local index")?,
                delta: narrow(ops.int(1)?, "increment")?,
            })
        }
        Shape::Ldc => {
            let ops = Operands::new(op, nodes, "[int|long|float|double|string|type]")?;
            ops.count(&[1])?;
            let value = ops.values[0].clone();
            if matches!(value.kind(), Kind::Bool | Kind::Bytes | Kind::Label) {
                return Err(ops.fail());
            }
            Ok(Instruction::Ldc(Constant::from_value(value)?))
        }
        Shape::Type => {
            let ops = Operands::new(op, nodes, "[string]")?;
            ops.count(&[1])?;
            Ok(Instruction::Type(op, ops.string(0)?))
        }
        Shape::Field => {
            let ops = Operands::new(op, nodes, "[string, string, string]")?;
            ops.count(&[3])?;
            Ok(Instruction::Field {
                opcode: op,
                owner: ops.string(0)?,
                name: ops.string(1)?,
                descriptor: ops.string(2)?,
            })
        }
        Shape::Method => {
            let ops = Operands::new(op, nodes, "[string, string, string, bool?]")?;
            ops.count(&[3, 4])?;
            let interface = match ops.values.get(3) {
                None => op == Opcode::INVOKEINTERFACE,
                Some(Value::Bool(flag)) => *flag,
                Some(_) => return Err(ops.fail()),
            };
            Ok(Instruction::Method {
                opcode: op,
                owner: ops.string(0)?,
                name: ops.string(1)?,
                descriptor: ops.string(2)?,
                interface,
            })
        }
        Shape::Jump => {
            let ops = Operands::new(op, nodes, "[label]")?;
            ops.count(&[1])?;
            Ok(Instruction::Jump(op, ops.label(0, labels)?))
        }
        Shape::TableSwitch => {
            let ops = Operands::new(op, nodes, "[int, int, label, label...]")?;
            let low: i32 = narrow(ops.int(0)?, "switch bound")?;
            let high: i32 = narrow(ops.int(1)?, "switch bound")?;
            if high < low {
                return Err(ops.fail());
            }
            let count = (i64::from(high) - i64::from(low) + 1) as usize;
            ops.count(&[count + 3])?;
            let default = ops.label(2, labels)?;
            let targets = (0..count)
                .map(|i| ops.label(3 + i, labels))
                .collect::<Result<Vec<_>>>()?;
            Ok(Instruction::TableSwitch {
                low,
                high,
                default,
                targets,
            })
        }
        Shape::LookupSwitch => {
            let ops = Operands::new(op, nodes, "[label, (int, label)...]")?;
            if ops.values.is_empty() || ops.values.len() % 2 == 0 {
                return Err(ops.fail());
            }
            let default = ops.label(0, labels)?;
            let mut pairs = Vec::with_capacity(ops.values.len() / 2);
            for i in (1..ops.values.len()).step_by(2) {
                let key = narrow(ops.int(i)?, "switch key")?;
                pairs.push((key, ops.label(i + 1, labels)?));
            }
            Ok(Instruction::LookupSwitch { default, pairs })
        }
        Shape::MultiANewArray => {
            let ops = Operands::new(op, nodes, "[string, int]")?;
            ops.count(&[2])?;
            let dimensions: u8 = narrow(ops.int(1)?, "dimensions")?;
            if dimensions == 0 {
                return Err(Error::payload("0", "MULTIANEWARRAY needs at least one dimension"));
            }
            Ok(Instruction::MultiANewArray {
                descriptor: ops.string(0)?,
                dimensions,
            })
        }
    }
}

/// Convert a body to nodes, tagging operations with their position
pub fn to_nodes(instructions: &[Instruction]) -> Vec<Node> {
    let mut ordinal = 0usize;
    instructions
        .iter()
        .map(|insn| {
            let mut node = insn.to_node();
            if insn.opcode().is_some() {
                ordinal += 1;
                if let Some(name) = node.name().map(|n| format!("{}-{}", n, ordinal)) {
                    node.set_name(name);
                }
            }
            node
        })
        .collect()
}

/// Rebuild a body from nodes
pub fn from_nodes(nodes: &[Node], labels: &mut LabelRegistry) -> Result<Vec<Instruction>> {
    nodes.iter().map(|n| Instruction::from_node(n, labels)).collect()
}

/// Operation named by an instruction node, if it is one
pub fn opcode_of(node: &Node) -> Option<Opcode> {
    if node.base() != OPCODE {
        return None;
    }
    node.name().and_then(|tag| Opcode::from_mnemonic(mnemonic_of(tag)))
}

/// String operand `index` of an instruction node
pub fn string_operand(node: &Node, index: usize) -> Option<String> {
    match node.children().get(index)?.value().ok()? {
        Value::Str(s) => Some(s),
        _ => None,
    }
}

/// Int operand `index` of an instruction node
pub fn int_operand(node: &Node, index: usize) -> Option<i64> {
    node.children().get(index)?.value().ok()?.as_int()
}
