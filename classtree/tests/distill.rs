// Decorator distillation over small class sets built in memory.

use classtree::builder::MethodBuilder;
use classtree::distill::{self, Pattern};
use classtree::model::access;
use classtree::{
    decode, encode, CallSiteMatch, ClassBuilder, ClassTree, DistillOptions, Distiller, Event, Instruction, Node,
    Opcode, Representation, Value,
};
use pretty_assertions::assert_eq;

fn super_init(builder: MethodBuilder) -> MethodBuilder {
    builder
        .var(Opcode::ALOAD, 0)
        .invoke(Opcode::INVOKESPECIAL, "java/lang/Object", "<init>", "()V")
}

/// `A` holds an int
fn decorated() -> Representation {
    let builder = ClassBuilder::new("org/x/A").field(access::PRIVATE, "x", "I");
    let bytes = super_init(builder.method(access::PUBLIC, "<init>", "(I)V"))
        .var(Opcode::ALOAD, 0)
        .var(Opcode::ILOAD, 1)
        .field_insn(Opcode::PUTFIELD, "org/x/A", "x", "I")
        .op(Opcode::RETURN)
        .up()
        .method(access::PUBLIC, "get", "()I")
        .var(Opcode::ALOAD, 0)
        .field_insn(Opcode::GETFIELD, "org/x/A", "x", "I")
        .op(Opcode::IRETURN)
        .up()
        .bytes()
        .unwrap();
    decode(bytes).unwrap().with_source("A.class")
}

/// `B` wraps an `A` and forwards to it
fn decorator() -> Representation {
    let builder = ClassBuilder::new("org/x/B").field(access::PRIVATE, "origin", "Lorg/x/A;");
    let bytes = super_init(builder.method(access::PUBLIC, "<init>", "(Lorg/x/A;)V"))
        .var(Opcode::ALOAD, 0)
        .var(Opcode::ALOAD, 1)
        .field_insn(Opcode::PUTFIELD, "org/x/B", "origin", "Lorg/x/A;")
        .op(Opcode::RETURN)
        .up()
        .method(access::PUBLIC, "get", "()I")
        .var(Opcode::ALOAD, 0)
        .field_insn(Opcode::GETFIELD, "org/x/B", "origin", "Lorg/x/A;")
        .invoke(Opcode::INVOKEVIRTUAL, "org/x/A", "get", "()I")
        .op(Opcode::IRETURN)
        .up()
        .method(access::PUBLIC, "mixed", "()I")
        .var(Opcode::ALOAD, 0)
        .field_insn(Opcode::GETFIELD, "org/x/B", "origin", "Lorg/x/A;")
        .invoke(Opcode::INVOKEVIRTUAL, "org/x/A", "get", "()I")
        .var(Opcode::ALOAD, 0)
        .invoke(Opcode::INVOKEVIRTUAL, "java/lang/Object", "hashCode", "()I")
        .op(Opcode::IADD)
        .op(Opcode::IRETURN)
        .up()
        .bytes()
        .unwrap();
    decode(bytes).unwrap().with_source("B.class")
}

/// `Main` builds `new B(new A(5))` and calls `get`
fn main_class() -> Representation {
    let bytes = ClassBuilder::new("org/x/Main")
        .default_constructor()
        .method(access::PUBLIC | access::STATIC, "main", "([Ljava/lang/String;)V")
        .type_insn(Opcode::NEW, "org/x/B")
        .op(Opcode::DUP)
        .type_insn(Opcode::NEW, "org/x/A")
        .op(Opcode::DUP)
        .op(Opcode::ICONST_5)
        .invoke(Opcode::INVOKESPECIAL, "org/x/A", "<init>", "(I)V")
        .invoke(Opcode::INVOKESPECIAL, "org/x/B", "<init>", "(Lorg/x/A;)V")
        .invoke(Opcode::INVOKEVIRTUAL, "org/x/B", "get", "()I")
        .op(Opcode::POP)
        .op(Opcode::RETURN)
        .up()
        .bytes()
        .unwrap();
    decode(bytes).unwrap().with_source("Main.class")
}

fn nodes(instructions: &[Instruction]) -> Vec<Node> {
    instructions.iter().map(Instruction::to_node).collect()
}

fn body(tree: &ClassTree, name: &str, descriptor: &str) -> Vec<Node> {
    tree.method(name, descriptor).unwrap().instructions().to_vec()
}

/// Every name-like leaf anywhere under `node`
fn strings(node: &Node, out: &mut Vec<String>) {
    if let Some(text) = node.value().ok().as_ref().and_then(Value::as_str) {
        out.push(text.to_string());
    }
    for child in node.children() {
        strings(child, out);
    }
}

#[test]
fn test_decorator_is_distilled() {
    let inputs = vec![main_class(), decorated(), decorator()];
    let distilled = Distiller::new(DistillOptions::default()).apply(inputs).unwrap();

    let names: Vec<&str> = distilled
        .representations
        .iter()
        .map(|r| r.name().unwrap())
        .collect();
    assert_eq!(names, vec!["org/x/Main", "org/x/A", "org/x/B", "org/x/AB"]);
    assert_eq!(
        distilled.events[0],
        Event::Combined {
            decorated: "org/x/A".into(),
            decorator: "org/x/B".into(),
            combined: "org/x/AB".into(),
        }
    );

    let main = distilled.representations[0].tree().unwrap();
    assert_eq!(
        body(main, "main", "([Ljava/lang/String;)V"),
        nodes(&[
            Instruction::type_insn(Opcode::NEW, "org/x/AB"),
            Instruction::Plain(Opcode::DUP),
            Instruction::Plain(Opcode::ICONST_5),
            Instruction::method(Opcode::INVOKESPECIAL, "org/x/AB", "<init>", "(I)V"),
            Instruction::method(Opcode::INVOKEVIRTUAL, "org/x/AB", "get", "()I"),
            Instruction::Plain(Opcode::POP),
            Instruction::Plain(Opcode::RETURN),
        ])
    );
    assert!(distilled.events.contains(&Event::Spliced {
        class: "org/x/Main".into(),
        method: "main".into(),
        pattern: Pattern::Construction,
        position: 0,
    }));

    let combined = distilled.representations[3].tree().unwrap();
    assert_eq!(combined.fields().map(|f| f.name()).collect::<Vec<_>>(), vec!["x"]);
    assert!(combined.method("<init>", "(I)V").is_some());
    assert!(combined.method("<init>", "(Lorg/x/A;)V").is_none());
    assert_eq!(
        body(combined, "get", "()I"),
        nodes(&[
            Instruction::Var(Opcode::ALOAD, 0),
            Instruction::field(Opcode::GETFIELD, "org/x/AB", "x", "I"),
            Instruction::Plain(Opcode::IRETURN),
        ])
    );
    // Only the call to A.get is inlined
    assert_eq!(
        body(combined, "mixed", "()I"),
        nodes(&[
            Instruction::Var(Opcode::ALOAD, 0),
            Instruction::field(Opcode::GETFIELD, "org/x/AB", "x", "I"),
            Instruction::Var(Opcode::ALOAD, 0),
            Instruction::method(Opcode::INVOKEVIRTUAL, "java/lang/Object", "hashCode", "()I"),
            Instruction::Plain(Opcode::IADD),
            Instruction::Plain(Opcode::IRETURN),
        ])
    );
    assert!(distilled.events.iter().any(|e| matches!(
        e,
        Event::Inlined { method, calls: 1, .. } if method == "get"
    )));

    for repr in &distilled.representations {
        let bytes = encode(repr).unwrap();
        assert_eq!(&bytes[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
    }
}

#[test]
fn test_no_operand_names_the_decorator() {
    let inputs = vec![decorated(), decorator(), main_class()];
    let outputs = classtree::distill(inputs).unwrap();
    assert_eq!(outputs.len(), 4);
    for repr in &outputs {
        let tree = repr.tree().unwrap();
        for method in tree.methods() {
            let mut found = Vec::new();
            for insn in method.instructions() {
                strings(insn, &mut found);
            }
            assert!(
                !found.iter().any(|s| s == "org/x/B"),
                "{}.{} still names org/x/B",
                tree.name(),
                method.name()
            );
        }
    }
}

#[test]
fn test_any_virtual_inlines_every_call() {
    let options = DistillOptions {
        call_sites: CallSiteMatch::AnyVirtual,
        timestamp: Some("2026-10-19T00:00:00Z".into()),
    };
    let distilled = Distiller::new(options)
        .apply(vec![decorated(), decorator()])
        .unwrap();
    let combined = distilled.representations[2].tree().unwrap();
    assert_eq!(combined.time().as_deref(), Some("2026-10-19T00:00:00Z"));
    assert_eq!(
        body(combined, "mixed", "()I"),
        nodes(&[
            Instruction::Var(Opcode::ALOAD, 0),
            Instruction::field(Opcode::GETFIELD, "org/x/AB", "x", "I"),
            Instruction::Var(Opcode::ALOAD, 0),
            Instruction::field(Opcode::GETFIELD, "org/x/AB", "x", "I"),
            Instruction::Plain(Opcode::IADD),
            Instruction::Plain(Opcode::IRETURN),
        ])
    );
}

#[test]
fn test_constructor_pattern_in_decorator() {
    let decorated = ClassBuilder::new("Decorated")
        .method(access::PUBLIC, "<init>", "(I)V")
        .var(Opcode::ALOAD, 0)
        .invoke(Opcode::INVOKESPECIAL, "java/lang/Object", "<init>", "()V")
        .op(Opcode::RETURN)
        .up()
        .tree()
        .unwrap();
    let decorator = ClassBuilder::new("Decorator")
        .method(access::PUBLIC, "<init>", "(LDecorated;)V")
        .type_insn(Opcode::NEW, "Decorator")
        .op(Opcode::DUP)
        .type_insn(Opcode::NEW, "Decorated")
        .op(Opcode::DUP)
        .invoke(Opcode::INVOKESPECIAL, "Decorated", "<init>", "(I)V")
        .invoke(Opcode::INVOKESPECIAL, "Decorator", "<init>", "(LDecorated;)V")
        .up()
        .tree()
        .unwrap();

    let outputs = classtree::distill(vec![
        Representation::from_tree(decorator),
        Representation::from_tree(decorated),
    ])
    .unwrap();
    let names: Vec<&str> = outputs.iter().map(|r| r.name().unwrap()).collect();
    assert_eq!(names, vec!["Decorator", "Decorated", "DecoratedDecorator"]);

    let edited = outputs[0].tree().unwrap();
    assert_eq!(
        body(edited, "<init>", "(LDecorated;)V"),
        nodes(&[
            Instruction::type_insn(Opcode::NEW, "DecoratedDecorator"),
            Instruction::Plain(Opcode::DUP),
            Instruction::method(Opcode::INVOKESPECIAL, "DecoratedDecorator", "<init>", "(I)V"),
        ])
    );
    let combined = outputs[2].tree().unwrap();
    assert!(combined.method("<init>", "(I)V").is_some());
}

#[test]
fn test_single_input_is_untouched() {
    let distilled = Distiller::new(DistillOptions::default())
        .apply(vec![main_class()])
        .unwrap();
    assert!(distilled.events.is_empty());
    assert_eq!(distilled.representations.len(), 1);
    assert_eq!(
        distilled.representations[0].tree().unwrap(),
        main_class().tree().unwrap()
    );
    assert!(classtree::distill(Vec::new()).unwrap().is_empty());
}

#[test]
fn test_replace_without_match_is_identity() {
    let main = main_class();
    let seq = body(main.tree().unwrap(), "main", "([Ljava/lang/String;)V");
    let pattern = nodes(&[
        Instruction::Plain(Opcode::DUP),
        Instruction::Plain(Opcode::POP),
    ]);
    let replacement = nodes(&[Instruction::Plain(Opcode::NOP)]);
    let (out, spans) = distill::replace(&seq, &pattern, &replacement);
    assert!(spans.is_empty());
    assert_eq!(out, seq);
}
