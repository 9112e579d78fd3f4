// translate.rs - Class model <-> class tree translation
//
// The tree side of the binary codec. `disassemble` runs bytes through the
// class file reader into a tree; `assemble` goes the other way and checks the
// generated bytes before handing them out.
//
// Tree layout, every element an `<o>`:
//
//   program(name)
//     string time?
//     class(name)
//       int version, int access, string supername?, tuple interfaces,
//       string signature?, string source?, annotation*,
//       field(name)*  : int access, string descriptor, string signature?,
//                       <kind> value?, annotation*
//       method(name)* : int access, string descriptor, string signature?,
//                       tuple exceptions, seq, handlers, frames?, annotation*
//
// A frame holds a label `at` and the tuples `locals` and `stack`. Object
// entries are `string` leaves with the class name, every other entry an `int`
// leaf with its verification type tag.

use crate::class::{ClassTree, CLASS, FIELD, FRAMES, METHOD, PROGRAM, SEQ, TIME};
use crate::class_builder;
use crate::classfile;
use crate::error::{Error, Result};
use crate::instruction::{self, Constant};
use crate::label::LabelRegistry;
use crate::model::{
    Annotation, ClassModel, DeclaredFrame, ElementValue, FieldModel, FrameValue, MethodModel, TryCatch,
};
use crate::tree::Node;
use crate::value::Value;
use crate::verify;
use tracing::debug;

const ANNOTATION: &str = "annotation";
const ELEMENT: &str = "element";
const FRAME: &str = "frame";
const HANDLERS: &str = "handlers";
const HANDLER: &str = "handler";
const TUPLE: &str = "tuple";

/// Decode class file bytes into a tree
pub fn disassemble(bytes: &[u8]) -> Result<ClassTree> {
    let model = classfile::parse(bytes)?.to_model()?;
    ClassTree::new(to_tree(&model, None))
}

/// Encode a tree into verified class file bytes
pub fn assemble(tree: &ClassTree) -> Result<Vec<u8>> {
    let model = from_tree(tree)?;
    let bytes = class_builder::build(&model)?;
    verify::verify(&bytes)?;
    debug!("assembled {} ({} bytes)", model.name, bytes.len());
    Ok(bytes)
}

// ==========================================================================
// Model -> tree
// ==========================================================================

fn string(name: &str, text: &str) -> Node {
    Node::attr(name, &Value::Str(text.to_string()))
}

fn int(name: &str, value: i64) -> Node {
    Node::attr(name, &Value::Int(value))
}

/// Build the tree for a class model
pub fn to_tree(model: &ClassModel, time: Option<&str>) -> Node {
    let mut class = Node::named(CLASS, &model.name)
        .with_child(int("version", i64::from(model.version())))
        .with_child(int("access", i64::from(model.access)));
    if let Some(super_name) = &model.super_name {
        class = class.with_child(string("supername", super_name));
    }
    class = class.with_child(
        Node::named(TUPLE, "interfaces")
            .with_children(model.interfaces.iter().map(|i| Node::leaf(&Value::Str(i.clone())))),
    );
    if let Some(signature) = &model.signature {
        class = class.with_child(string("signature", signature));
    }
    if let Some(source) = &model.source_file {
        class = class.with_child(string("source", source));
    }
    class = class
        .with_children(model.annotations.iter().map(annotation_node))
        .with_children(model.fields.iter().map(field_node))
        .with_children(model.methods.iter().map(method_node));

    let mut program = Node::named(PROGRAM, &model.name);
    if let Some(time) = time {
        program = program.with_child(string(TIME, time));
    }
    program.with_child(class)
}

fn field_node(field: &FieldModel) -> Node {
    let mut node = Node::named(FIELD, &field.name)
        .with_child(int("access", i64::from(field.access)))
        .with_child(string("descriptor", &field.descriptor));
    if let Some(signature) = &field.signature {
        node = node.with_child(string("signature", signature));
    }
    if let Some(value) = &field.value {
        node = node.with_child(Node::attr("value", &value.to_value()));
    }
    node.with_children(field.annotations.iter().map(annotation_node))
}

fn method_node(method: &MethodModel) -> Node {
    let mut node = Node::named(METHOD, &method.name)
        .with_child(int("access", i64::from(method.access)))
        .with_child(string("descriptor", &method.descriptor));
    if let Some(signature) = &method.signature {
        node = node.with_child(string("signature", signature));
    }
    let handlers = method.handlers.iter().map(|tc| {
        let label = |name: &str, l: &crate::label::Label| {
            Node::attr(name, &Value::Label(l.id().to_string()))
        };
        let mut handler = Node::new(HANDLER)
            .with_child(label("start", &tc.start))
            .with_child(label("end", &tc.end))
            .with_child(label("handler", &tc.handler));
        if let Some(catch_type) = &tc.catch_type {
            handler = handler.with_child(string("type", catch_type));
        }
        handler
    });
    node.with_child(
        Node::named(TUPLE, "exceptions")
            .with_children(method.exceptions.iter().map(|e| Node::leaf(&Value::Str(e.clone())))),
    )
    .with_child(Node::named(SEQ, SEQ).with_children(instruction::to_nodes(&method.instructions)))
    .with_child(Node::named(HANDLERS, HANDLERS).with_children(handlers))
    .with_children((!method.frames.is_empty()).then(|| frames_node(&method.frames)))
    .with_children(method.annotations.iter().map(annotation_node))
}

fn frames_node(frames: &[DeclaredFrame]) -> Node {
    let values = |name: &str, values: &[FrameValue]| {
        Node::named(TUPLE, name).with_children(values.iter().map(|v| match v {
            FrameValue::Object(class) => Node::leaf(&Value::Str(class.clone())),
            other => Node::leaf(&Value::Int(i64::from(other.tag()))),
        }))
    };
    Node::named(FRAMES, FRAMES).with_children(frames.iter().map(|frame| {
        Node::new(FRAME)
            .with_child(Node::attr("at", &Value::Label(frame.label.id().to_string())))
            .with_child(values("locals", &frame.locals))
            .with_child(values("stack", &frame.stack))
    }))
}

fn annotation_node(annotation: &Annotation) -> Node {
    Node::named(ANNOTATION, &annotation.descriptor)
        .with_child(Node::attr("visible", &Value::Bool(annotation.visible)))
        .with_children(
            annotation
                .elements
                .iter()
                .map(|(name, value)| Node::named(ELEMENT, name).with_child(element_node(value, annotation.visible))),
        )
}

fn element_node(value: &ElementValue, visible: bool) -> Node {
    match value {
        ElementValue::Const(tag, constant) => {
            Node::named("const", tag.to_string()).with_child(Node::leaf(&constant.to_value()))
        }
        ElementValue::Enum { descriptor, name } => Node::new("enum")
            .with_child(string("descriptor", descriptor))
            .with_child(string("name", name)),
        ElementValue::Class(descriptor) => Node::new("classinfo").with_child(string("descriptor", descriptor)),
        ElementValue::Annotation(nested) => {
            let nested = Annotation {
                visible,
                ..nested.clone()
            };
            annotation_node(&nested)
        }
        ElementValue::Array(values) => {
            Node::new("array").with_children(values.iter().map(|v| element_node(v, visible)))
        }
    }
}

// ==========================================================================
// Tree -> model
// ==========================================================================

fn u16_of(node: &Node, name: &str) -> Result<u16> {
    let value = node.required_int(name)?;
    u16::try_from(value).map_err(|_| {
        Error::tree(format!("'{}' of {} is out of range: {}", name, node.describe(), value))
    })
}

fn optional_str(node: &Node, name: &str) -> Result<Option<String>> {
    match node.child(name) {
        Some(_) => node.required_str(name).map(Some),
        None => Ok(None),
    }
}

fn strings_of(node: &Node, name: &str) -> Result<Vec<String>> {
    let Some(tuple) = node.child(name) else {
        return Ok(Vec::new());
    };
    tuple
        .children()
        .iter()
        .map(|c| match c.value()? {
            Value::Str(s) => Ok(s),
            other => Err(Error::tree(format!(
                "{} of {} holds a {}",
                name,
                node.describe(),
                other.kind()
            ))),
        })
        .collect()
}

/// Rebuild the class model from a tree
///
/// Labels resolve through a registry scoped to this call.
pub fn from_tree(tree: &ClassTree) -> Result<ClassModel> {
    let class = tree.class();
    let mut labels = LabelRegistry::new();

    let version = class.required_int("version")?;
    let version = u32::try_from(version)
        .map_err(|_| Error::tree(format!("class version out of range: {}", version)))?;

    let mut fields = Vec::new();
    for node in class.children_with_base(FIELD) {
        fields.push(field_model(node)?);
    }
    let mut methods = Vec::new();
    for node in class.children_with_base(METHOD) {
        methods.push(method_model(node, &mut labels)?);
    }

    Ok(ClassModel {
        minor_version: (version & 0xFFFF) as u16,
        major_version: (version >> 16) as u16,
        access: u16_of(class, "access")?,
        name: tree.name().to_string(),
        super_name: optional_str(class, "supername")?,
        interfaces: strings_of(class, "interfaces")?,
        signature: optional_str(class, "signature")?,
        source_file: optional_str(class, "source")?,
        annotations: annotations_of(class)?,
        fields,
        methods,
    })
}

fn field_model(node: &Node) -> Result<FieldModel> {
    let value = match node.child("value") {
        Some(leaf) => Some(Constant::from_value(leaf.value()?)?),
        None => None,
    };
    Ok(FieldModel {
        access: u16_of(node, "access")?,
        name: node.name().unwrap_or_default().to_string(),
        descriptor: node.required_str("descriptor")?,
        signature: optional_str(node, "signature")?,
        value,
        annotations: annotations_of(node)?,
    })
}

fn method_model(node: &Node, labels: &mut LabelRegistry) -> Result<MethodModel> {
    let name = node.name().unwrap_or_default();
    let mut method = MethodModel::new(u16_of(node, "access")?, name, &node.required_str("descriptor")?);
    method.signature = optional_str(node, "signature")?;
    method.exceptions = strings_of(node, "exceptions")?;
    method.annotations = annotations_of(node)?;
    if let Some(seq) = node.child(SEQ) {
        method.instructions = instruction::from_nodes(seq.children(), labels)?;
    }
    if let Some(handlers) = node.child(HANDLERS) {
        for handler in handlers.children() {
            let label = |name: &str| match handler.child_value(name)? {
                Some(Value::Label(id)) => Ok(id),
                _ => Err(Error::tree(format!("handler of {} has no '{}' label", node.describe(), name))),
            };
            let (start, end, target) = (label("start")?, label("end")?, label("handler")?);
            method.handlers.push(TryCatch {
                start: labels.resolve(&start),
                end: labels.resolve(&end),
                handler: labels.resolve(&target),
                catch_type: optional_str(handler, "type")?,
            });
        }
    }
    if let Some(frames) = node.child(FRAMES) {
        for frame in frames.children() {
            let label = match frame.child_value("at")? {
                Some(Value::Label(id)) => labels.resolve(&id),
                _ => return Err(Error::tree(format!("frame of {} has no 'at' label", node.describe()))),
            };
            method.frames.push(DeclaredFrame {
                label,
                locals: frame_values(frame, "locals")?,
                stack: frame_values(frame, "stack")?,
            });
        }
    }
    Ok(method)
}

fn frame_values(frame: &Node, name: &str) -> Result<Vec<FrameValue>> {
    let Some(tuple) = frame.child(name) else {
        return Ok(Vec::new());
    };
    tuple
        .children()
        .iter()
        .map(|leaf| match leaf.value()? {
            Value::Str(class) => Ok(FrameValue::Object(class)),
            Value::Int(tag) => u8::try_from(tag)
                .ok()
                .and_then(FrameValue::from_tag)
                .ok_or_else(|| Error::tree(format!("unknown verification type {} in a frame", tag))),
            other => Err(Error::tree(format!("frame {} holds a {}", name, other.kind()))),
        })
        .collect()
}

fn annotations_of(node: &Node) -> Result<Vec<Annotation>> {
    node.children_with_base(ANNOTATION).map(annotation_model).collect()
}

fn annotation_model(node: &Node) -> Result<Annotation> {
    let visible = match node.child_value("visible")? {
        Some(Value::Bool(visible)) => visible,
        _ => true,
    };
    let mut elements = Vec::new();
    for element in node.children_with_base(ELEMENT) {
        let value = element
            .children()
            .first()
            .ok_or_else(|| Error::tree(format!("{} has no value", element.describe())))?;
        elements.push((element.name().unwrap_or_default().to_string(), element_model(value)?));
    }
    Ok(Annotation {
        descriptor: node.name().unwrap_or_default().to_string(),
        visible,
        elements,
    })
}

fn element_model(node: &Node) -> Result<ElementValue> {
    match node.base() {
        "const" => {
            let tag = node
                .name()
                .and_then(|n| n.chars().next())
                .ok_or_else(|| Error::tree("annotation constant without a tag"))?;
            let value = node
                .children()
                .first()
                .ok_or_else(|| Error::tree("annotation constant without a value"))?;
            Ok(ElementValue::Const(tag, Constant::from_value(value.value()?)?))
        }
        "enum" => Ok(ElementValue::Enum {
            descriptor: node.required_str("descriptor")?,
            name: node.required_str("name")?,
        }),
        "classinfo" => Ok(ElementValue::Class(node.required_str("descriptor")?)),
        ANNOTATION => Ok(ElementValue::Annotation(annotation_model(node)?)),
        "array" => Ok(ElementValue::Array(
            node.children().iter().map(element_model).collect::<Result<_>>()?,
        )),
        other => Err(Error::tree(format!("unknown annotation value '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;
    use crate::model::access;
    use crate::opcode::Opcode;
    use pretty_assertions::assert_eq;

    fn sample() -> ClassModel {
        let mut labels = LabelRegistry::new();
        let (start, end, handler) = (labels.resolve("a"), labels.resolve("b"), labels.resolve("c"));
        let mut run = MethodModel::new(access::PUBLIC, "run", "()V");
        run.instructions = vec![
            Instruction::Label(start.clone()),
            Instruction::Plain(Opcode::NOP),
            Instruction::Label(end.clone()),
            Instruction::Plain(Opcode::RETURN),
            Instruction::Label(handler.clone()),
            Instruction::Plain(Opcode::POP),
            Instruction::Plain(Opcode::RETURN),
        ];
        run.handlers.push(TryCatch {
            start,
            end,
            handler: handler.clone(),
            catch_type: Some("java/lang/Exception".into()),
        });
        run.frames.push(DeclaredFrame {
            label: handler.clone(),
            locals: vec![FrameValue::Object("org/x/A".into())],
            stack: vec![FrameValue::Object("java/lang/Exception".into())],
        });
        run.annotations.push(Annotation {
            descriptor: "Lorg/x/Marker;".into(),
            visible: true,
            elements: vec![
                ("flag".into(), ElementValue::Const('Z', Constant::Int(1))),
                (
                    "names".into(),
                    ElementValue::Array(vec![ElementValue::Const('s', Constant::String("n".into()))]),
                ),
            ],
        });

        ClassModel {
            minor_version: 0,
            major_version: 52,
            access: access::PUBLIC | access::SUPER,
            name: "org/x/A".into(),
            super_name: Some("java/lang/Object".into()),
            interfaces: vec!["java/lang/Runnable".into()],
            signature: None,
            source_file: Some("A.java".into()),
            annotations: Vec::new(),
            fields: vec![FieldModel {
                access: access::STATIC | access::FINAL,
                name: "LIMIT".into(),
                descriptor: "J".into(),
                signature: None,
                value: Some(Constant::Long(7)),
                annotations: Vec::new(),
            }],
            methods: vec![run],
        }
    }

    #[test]
    fn test_model_tree_roundtrip() {
        let model = sample();
        let tree = ClassTree::new(to_tree(&model, Some("t0"))).unwrap();
        assert_eq!(tree.time().as_deref(), Some("t0"));
        let back = from_tree(&tree).unwrap();
        // Labels are fresh identities, so compare through the tree again
        assert_eq!(to_tree(&back, Some("t0")), *tree.root());
        assert_eq!(back.fields, model.fields);
        assert_eq!(back.methods[0].annotations, model.methods[0].annotations);
        assert_eq!(back.version(), 52 << 16);
    }

    #[test]
    fn test_object_has_no_supername() {
        let mut model = sample();
        model.name = "java/lang/Object".into();
        model.super_name = None;
        let tree = ClassTree::new(to_tree(&model, None)).unwrap();
        assert!(tree.class().child("supername").is_none());
        assert_eq!(from_tree(&tree).unwrap().super_name, None);
    }

    #[test]
    fn test_assemble_disassemble() {
        let tree = ClassTree::new(to_tree(&sample(), None)).unwrap();
        let bytes = assemble(&tree).unwrap();
        let again = disassemble(&bytes).unwrap();
        let model = from_tree(&again).unwrap();
        assert_eq!(model.name, "org/x/A");
        assert_eq!(model.fields[0].value, Some(Constant::Long(7)));
        assert_eq!(model.methods[0].handlers.len(), 1);
        assert_eq!(model.methods[0].annotations, sample().methods[0].annotations);
        assert_eq!(model.methods[0].frames.len(), 1);
        assert_eq!(
            model.methods[0].frames[0].stack,
            vec![FrameValue::Object("java/lang/Exception".into())]
        );
    }

    #[test]
    fn test_frame_values() {
        let mut labels = LabelRegistry::new();
        let mut model = sample();
        model.methods[0].frames[0].locals = vec![
            FrameValue::Top,
            FrameValue::Integer,
            FrameValue::Long,
            FrameValue::UninitializedThis,
            FrameValue::Uninitialized,
            FrameValue::Null,
        ];
        let tree = ClassTree::new(to_tree(&model, None)).unwrap();
        let node = tree.method("run", "()V").unwrap().node();
        let method = method_model(node, &mut labels).unwrap();
        assert_eq!(method.frames[0].locals, model.methods[0].frames[0].locals);

        let bad = Node::new(FRAME).with_child(
            Node::named(TUPLE, "locals").with_child(Node::leaf(&Value::Int(9))),
        );
        assert!(matches!(frame_values(&bad, "locals"), Err(Error::MalformedTree { .. })));
    }
}
