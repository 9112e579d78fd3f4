// Binary round trips: bytes -> tree -> bytes -> tree must be stable.

use classtree::classfile::{self, attr};
use classtree::model::{access, Annotation, ElementValue, FrameValue, MethodModel};
use classtree::stack_map::{self, MapFrame};
use classtree::{class_builder, decode, encode, ClassBuilder, Constant, Instruction, Opcode, Representation};
use pretty_assertions::assert_eq;

/// Decode, encode and decode again; both trees must be equal
fn assert_stable(bytes: Vec<u8>) -> Representation {
    let first = decode(bytes).unwrap();
    let encoded = encode(&first).unwrap();
    let second = decode(encoded).unwrap();
    assert_eq!(second.tree().unwrap(), first.tree().unwrap());
    second
}

fn method_body(repr: &Representation, name: &str, descriptor: &str) -> Vec<Instruction> {
    let model = classtree::translate::from_tree(repr.tree().unwrap()).unwrap();
    model
        .methods
        .into_iter()
        .find(|m| m.name == name && m.descriptor == descriptor)
        .map(|m| m.instructions)
        .unwrap()
}

#[test]
fn test_simple_class() {
    let bytes = ClassBuilder::new("org/x/Point")
        .field(access::PRIVATE, "x", "I")
        .default_constructor()
        .method(access::PUBLIC, "getX", "()I")
        .var(Opcode::ALOAD, 0)
        .field_insn(Opcode::GETFIELD, "org/x/Point", "x", "I")
        .op(Opcode::IRETURN)
        .up()
        .bytes()
        .unwrap();
    let repr = assert_stable(bytes);
    assert_eq!(repr.name().unwrap(), "org/x/Point");
    let body = method_body(&repr, "getX", "()I");
    assert_eq!(
        body,
        vec![
            Instruction::Var(Opcode::ALOAD, 0),
            Instruction::field(Opcode::GETFIELD, "org/x/Point", "x", "I"),
            Instruction::Plain(Opcode::IRETURN),
        ]
    );
}

#[test]
fn test_switches() {
    // Switch labels have to share one registry, so the body is set by hand
    let mut model = ClassBuilder::new("org/x/Switch")
        .default_constructor()
        .method(access::PUBLIC | access::STATIC, "table", "(I)I")
        .up()
        .build();
    let mut labels = classtree::LabelRegistry::new();
    let (one, two, other) = (labels.resolve("one"), labels.resolve("two"), labels.resolve("other"));
    model.methods[1].instructions = vec![
        Instruction::Var(Opcode::ILOAD, 0),
        Instruction::TableSwitch {
            low: 1,
            high: 3,
            default: other.clone(),
            targets: vec![one.clone(), two.clone(), one.clone()],
        },
        Instruction::Label(one.clone()),
        Instruction::Var(Opcode::ILOAD, 0),
        Instruction::LookupSwitch {
            default: other.clone(),
            pairs: vec![(1000, two.clone()), (-5, other.clone())],
        },
        Instruction::Label(two),
        Instruction::Plain(Opcode::ICONST_1),
        Instruction::Plain(Opcode::IRETURN),
        Instruction::Label(other),
        Instruction::Plain(Opcode::ICONST_0),
        Instruction::Plain(Opcode::IRETURN),
    ];
    let bytes = class_builder::build(&model).unwrap();
    let repr = assert_stable(bytes);
    let body = method_body(&repr, "table", "(I)I");
    let switches: Vec<_> = body
        .iter()
        .filter_map(|insn| insn.opcode())
        .filter(|op| op.is_switch())
        .collect();
    assert_eq!(switches, vec![Opcode::TABLESWITCH, Opcode::LOOKUPSWITCH]);
    // Lookup keys come back sorted
    let keys: Vec<i32> = body
        .iter()
        .find_map(|insn| match insn {
            Instruction::LookupSwitch { pairs, .. } => Some(pairs.iter().map(|(k, _)| *k).collect()),
            _ => None,
        })
        .unwrap();
    assert_eq!(keys, vec![-5, 1000]);
}

#[test]
fn test_wide_locals_and_iinc() {
    let bytes = ClassBuilder::new("org/x/Wide")
        .default_constructor()
        .method(access::PUBLIC | access::STATIC, "run", "()I")
        .int(Opcode::SIPUSH, 1234)
        .var(Opcode::ISTORE, 300)
        .iinc(300, 1000)
        .iinc(2, -1)
        .var(Opcode::ILOAD, 300)
        .op(Opcode::IRETURN)
        .up()
        .bytes();
    // Local 2 is never stored, IINC on it fails verification
    assert!(bytes.is_err());

    let bytes = ClassBuilder::new("org/x/Wide")
        .default_constructor()
        .method(access::PUBLIC | access::STATIC, "run", "()I")
        .int(Opcode::SIPUSH, 1234)
        .var(Opcode::ISTORE, 300)
        .iinc(300, 1000)
        .var(Opcode::ILOAD, 300)
        .op(Opcode::IRETURN)
        .up()
        .bytes()
        .unwrap();
    let repr = assert_stable(bytes);
    let body = method_body(&repr, "run", "()I");
    assert_eq!(body[1], Instruction::Var(Opcode::ISTORE, 300));
    assert_eq!(body[2], Instruction::Iinc { index: 300, delta: 1000 });
}

#[test]
fn test_long_backward_jump() {
    let mut method = ClassBuilder::new("org/x/Far")
        .default_constructor()
        .method(access::PUBLIC | access::STATIC, "run", "()V")
        .jump(Opcode::GOTO, "body")
        .label("back")
        .op(Opcode::RETURN)
        .label("body");
    for _ in 0..33_000 {
        method = method.op(Opcode::NOP);
    }
    let bytes = method.jump(Opcode::GOTO, "back").up().bytes().unwrap();
    let repr = assert_stable(bytes);
    let body = method_body(&repr, "run", "()V");
    let gotos = body
        .iter()
        .filter(|insn| insn.opcode() == Some(Opcode::GOTO))
        .count();
    // goto_w folds back into GOTO
    assert_eq!(gotos, 2);
}

#[test]
fn test_try_catch_and_stack_map() {
    let bytes = ClassBuilder::new("org/x/Guard")
        .default_constructor()
        .method(access::PUBLIC | access::STATIC, "parse", "(Ljava/lang/String;)I")
        .label("start")
        .var(Opcode::ALOAD, 0)
        .invoke(Opcode::INVOKESTATIC, "java/lang/Integer", "parseInt", "(Ljava/lang/String;)I")
        .label("end")
        .op(Opcode::IRETURN)
        .label("handler")
        .var(Opcode::ASTORE, 1)
        .op(Opcode::ICONST_M1)
        .op(Opcode::IRETURN)
        .try_catch("start", "end", "handler", Some("java/lang/NumberFormatException"))
        .up()
        .bytes()
        .unwrap();

    let file = classfile::parse(&bytes).unwrap();
    let parse = file.methods.iter().find(|m| m.name == "parse").unwrap();
    let code = classfile::parse_code(&parse.attribute(attr::CODE).unwrap().data, &file.pool).unwrap();
    assert_eq!(code.handlers.len(), 1);
    assert!(code.attributes.iter().any(|a| a.name == attr::STACK_MAP_TABLE));
    assert_eq!(code.max_locals, 2);
    assert_eq!(code.max_stack, 1);

    let repr = assert_stable(bytes);
    let model = classtree::translate::from_tree(repr.tree().unwrap()).unwrap();
    let parse = model.methods.iter().find(|m| m.name == "parse").unwrap();
    assert_eq!(
        parse.handlers[0].catch_type.as_deref(),
        Some("java/lang/NumberFormatException")
    );
}

/// The StackMapTable of one method, expanded
fn stack_map_of(bytes: &[u8], name: &str) -> Vec<MapFrame> {
    let file = classfile::parse(bytes).unwrap();
    let method = file.methods.iter().find(|m| m.name == name).unwrap();
    let code = classfile::parse_code(&method.attribute(attr::CODE).unwrap().data, &file.pool).unwrap();
    let model = MethodModel::new(method.access, &method.name, &method.descriptor);
    let initial = stack_map::initial_locals(&file.name, &model);
    stack_map::read(&code, &file.pool, &initial).unwrap()
}

#[test]
fn test_sibling_types_keep_common_frame() {
    // Base b = flag ? new Sub1() : new Sub2(); return b.m();
    let bytes = ClassBuilder::new("org/x/Picker")
        .default_constructor()
        .method(access::PUBLIC | access::STATIC, "pick", "(Z)I")
        .var(Opcode::ILOAD, 0)
        .jump(Opcode::IFEQ, "other")
        .type_insn(Opcode::NEW, "org/x/Sub1")
        .op(Opcode::DUP)
        .invoke(Opcode::INVOKESPECIAL, "org/x/Sub1", "<init>", "()V")
        .var(Opcode::ASTORE, 1)
        .jump(Opcode::GOTO, "join")
        .label("other")
        .type_insn(Opcode::NEW, "org/x/Sub2")
        .op(Opcode::DUP)
        .invoke(Opcode::INVOKESPECIAL, "org/x/Sub2", "<init>", "()V")
        .var(Opcode::ASTORE, 1)
        .label("join")
        .frame(
            "join",
            vec![FrameValue::Integer, FrameValue::Object("org/x/Base".into())],
            Vec::new(),
        )
        .var(Opcode::ALOAD, 1)
        .invoke(Opcode::INVOKEVIRTUAL, "org/x/Base", "m", "()I")
        .op(Opcode::IRETURN)
        .up()
        .bytes()
        .unwrap();
    let base = FrameValue::Object("org/x/Base".into());
    let join = stack_map_of(&bytes, "pick").last().cloned().unwrap();
    assert_eq!(join.locals, vec![FrameValue::Integer, base.clone()]);

    // The decoded tree carries the frame and the encoder writes it back
    let repr = assert_stable(bytes);
    let model = classtree::translate::from_tree(repr.tree().unwrap()).unwrap();
    let pick = model.methods.iter().find(|m| m.name == "pick").unwrap();
    assert!(pick.frames.iter().any(|f| f.locals.contains(&base)));
    let again = encode(&repr).unwrap();
    assert_eq!(stack_map_of(&again, "pick").last().cloned().unwrap(), join);
}

#[test]
fn test_multi_catch_handler_keeps_declared_type() {
    // try { risky(); } catch (IOException | SQLException e) { return e.getMessage(); }
    let exception = FrameValue::Object("java/lang/Exception".into());
    let bytes = ClassBuilder::new("org/x/Guard")
        .default_constructor()
        .method(access::PUBLIC | access::STATIC, "describe", "()Ljava/lang/String;")
        .label("start")
        .invoke(Opcode::INVOKESTATIC, "org/x/Guard", "risky", "()V")
        .label("end")
        .op(Opcode::ACONST_NULL)
        .op(Opcode::ARETURN)
        .label("handler")
        .frame("handler", Vec::new(), vec![exception.clone()])
        .var(Opcode::ASTORE, 0)
        .var(Opcode::ALOAD, 0)
        .invoke(Opcode::INVOKEVIRTUAL, "java/lang/Exception", "getMessage", "()Ljava/lang/String;")
        .op(Opcode::ARETURN)
        .try_catch("start", "end", "handler", Some("java/io/IOException"))
        .try_catch("start", "end", "handler", Some("java/sql/SQLException"))
        .up()
        .bytes()
        .unwrap();
    let handler = stack_map_of(&bytes, "describe").last().cloned().unwrap();
    assert_eq!(handler.stack, vec![exception.clone()]);

    let repr = assert_stable(bytes);
    let again = encode(&repr).unwrap();
    let frames = stack_map_of(&again, "describe");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].stack, vec![exception]);
}

#[test]
fn test_old_version_has_no_stack_map() {
    let bytes = ClassBuilder::new("org/x/Old")
        .version(49)
        .default_constructor()
        .method(access::PUBLIC | access::STATIC, "sign", "(I)I")
        .var(Opcode::ILOAD, 0)
        .jump(Opcode::IFLT, "negative")
        .op(Opcode::ICONST_1)
        .op(Opcode::IRETURN)
        .label("negative")
        .op(Opcode::ICONST_M1)
        .op(Opcode::IRETURN)
        .up()
        .bytes()
        .unwrap();
    let file = classfile::parse(&bytes).unwrap();
    assert_eq!(file.major_version, 49);
    let sign = file.methods.iter().find(|m| m.name == "sign").unwrap();
    let code = classfile::parse_code(&sign.attribute(attr::CODE).unwrap().data, &file.pool).unwrap();
    assert!(code.attributes.is_empty());
    assert_stable(bytes);
}

#[test]
fn test_constants_and_annotations() {
    let mut model = ClassBuilder::new("org/x/Consts")
        .default_constructor()
        .method(access::PUBLIC | access::STATIC, "values", "()V")
        .ldc(Constant::Long(1 << 40))
        .op(Opcode::POP2)
        .ldc(Constant::Double(2.5))
        .op(Opcode::POP2)
        .ldc(Constant::String("hello".into()))
        .op(Opcode::POP)
        .ldc(Constant::Type("org/x/Consts".into()))
        .op(Opcode::POP)
        .ldc(Constant::Int(100_000))
        .op(Opcode::POP)
        .op(Opcode::RETURN)
        .up()
        .build();
    model.annotations.push(Annotation {
        descriptor: "Lorg/x/Tag;".into(),
        visible: false,
        elements: vec![
            ("name".into(), ElementValue::Const('s', Constant::String("c".into()))),
            (
                "kind".into(),
                ElementValue::Enum {
                    descriptor: "Lorg/x/Kind;".into(),
                    name: "FAST".into(),
                },
            ),
            ("type".into(), ElementValue::Class("Ljava/lang/String;".into())),
        ],
    });

    let bytes = class_builder::build(&model).unwrap();
    let repr = assert_stable(bytes);
    let back = classtree::translate::from_tree(repr.tree().unwrap()).unwrap();
    assert_eq!(back.annotations, model.annotations);
    assert_eq!(
        method_body(&repr, "values", "()V")[0],
        Instruction::Ldc(Constant::Long(1 << 40))
    );
}

#[test]
fn test_dead_code_is_replaced() {
    let bytes = ClassBuilder::new("org/x/Dead")
        .default_constructor()
        .method(access::PUBLIC | access::STATIC, "run", "()V")
        .op(Opcode::RETURN)
        .op(Opcode::ICONST_1)
        .op(Opcode::POP)
        .op(Opcode::RETURN)
        .up()
        .bytes()
        .unwrap();
    let repr = decode(bytes).unwrap();
    let body = method_body(&repr, "run", "()V");
    assert_eq!(
        body,
        vec![
            Instruction::Plain(Opcode::RETURN),
            Instruction::Plain(Opcode::NOP),
            Instruction::Plain(Opcode::NOP),
            Instruction::Plain(Opcode::ATHROW),
        ]
    );
    assert_stable(encode(&repr).unwrap());
}

#[test]
fn test_malformed_binary() {
    let err = decode(vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0]).unwrap_err();
    assert!(matches!(err, classtree::Error::MalformedBinary { .. }));
}
