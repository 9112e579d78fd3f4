// XML text form: parse/print round trips and the errors bad trees raise.

use classtree::model::access;
use classtree::{decode_text, encode, encode_text, ClassBuilder, ClassTree, Error, Hex, Kind, Opcode, Value};
use indoc::{formatdoc, indoc};
use pretty_assertions::assert_eq;

fn sample() -> ClassTree {
    ClassBuilder::new("org/x/Counter")
        .field(access::PRIVATE, "count", "I")
        .default_constructor()
        .method(access::PUBLIC, "next", "()I")
        .var(Opcode::ALOAD, 0)
        .op(Opcode::DUP)
        .field_insn(Opcode::GETFIELD, "org/x/Counter", "count", "I")
        .op(Opcode::ICONST_1)
        .op(Opcode::IADD)
        .field_insn(Opcode::PUTFIELD, "org/x/Counter", "count", "I")
        .var(Opcode::ALOAD, 0)
        .field_insn(Opcode::GETFIELD, "org/x/Counter", "count", "I")
        .op(Opcode::IRETURN)
        .up()
        .tree()
        .unwrap()
}

#[test]
fn test_text_roundtrip() {
    let tree = sample();
    let xml = tree.to_xml().unwrap();
    assert_eq!(ClassTree::from_xml(&xml).unwrap(), tree);

    let repr = decode_text(&xml).unwrap();
    assert_eq!(repr.name().unwrap(), "org/x/Counter");
    assert_eq!(encode_text(&repr).unwrap(), xml);
    // and it assembles
    let bytes = encode(&repr).unwrap();
    assert_eq!(&bytes[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
}

#[test]
fn test_instruction_tags() {
    let xml = sample().to_xml().unwrap();
    assert!(xml.contains(r#"name="GETFIELD-180-3""#), "{}", xml);
    assert!(xml.contains(r#"base="seq""#));
}

#[test]
fn test_handwritten_tree_assembles() {
    let xml = indoc! {r#"
        <?xml version="1.0" encoding="UTF-8"?>
        <o base="program" name="Answer">
          <o base="class" name="Answer">
            <o base="int" name="version">00 00 00 00 00 34 00 00</o>
            <o base="int" name="access">00 00 00 00 00 00 00 21</o>
            <o base="string" name="supername">6A 61 76 61 2F 6C 61 6E 67 2F 4F 62 6A 65 63 74</o>
            <o base="tuple" name="interfaces"/>
            <o base="method" name="answer">
              <o base="int" name="access">00 00 00 00 00 00 00 09</o>
              <o base="string" name="descriptor">28 29 49</o>
              <o base="tuple" name="exceptions"/>
              <o base="seq" name="seq">
                <o base="opcode" name="BIPUSH-16-1">
                  <o base="int">00 00 00 00 00 00 00 2A</o>
                </o>
                <o base="opcode" name="IRETURN-172-2"/>
              </o>
              <o base="handlers" name="handlers"/>
            </o>
          </o>
        </o>
    "#};
    let repr = decode_text(xml).unwrap();
    assert_eq!(repr.name().unwrap(), "Answer");
    let bytes = encode(&repr).unwrap();
    let again = classtree::decode(bytes).unwrap();
    let answer = again.tree().unwrap().method("answer", "()I").unwrap();
    assert_eq!(answer.instructions().len(), 2);
}

fn with_body(body: &str) -> String {
    formatdoc! {
        r#"
            <o base="program" name="A">
              <o base="class" name="A">
                <o base="int" name="version">00 00 00 00 00 34 00 00</o>
                <o base="int" name="access">00 00 00 00 00 00 00 21</o>
                <o base="method" name="m">
                  <o base="int" name="access">00 00 00 00 00 00 00 09</o>
                  <o base="string" name="descriptor">28 29 56</o>
                  <o base="seq" name="seq">{}</o>
                </o>
              </o>
            </o>
        "#,
        body
    }
}

#[test]
fn test_unknown_operation() {
    let repr = decode_text(&with_body(r#"<o base="opcode" name="FROB-999-1"/>"#)).unwrap();
    assert!(matches!(
        encode(&repr),
        Err(Error::UnknownOperation { tag }) if tag == "FROB-999-1"
    ));
}

#[test]
fn test_operand_arity() {
    let repr = decode_text(&with_body(r#"<o base="opcode" name="BIPUSH-16-1"/>"#)).unwrap();
    assert!(matches!(
        encode(&repr),
        Err(Error::OperandArityMismatch { .. })
    ));
}

#[test]
fn test_malformed_payload() {
    // Odd digit count fails while parsing the text
    let body = r#"<o base="opcode" name="BIPUSH-16-1"><o base="int">00 2</o></o>"#;
    assert!(matches!(
        decode_text(&with_body(body)),
        Err(Error::MalformedPayload { .. })
    ));

    // A two-byte int parses as hex but not as an operand
    let body = r#"<o base="opcode" name="BIPUSH-16-1"><o base="int">00 2A</o></o>"#;
    let repr = decode_text(&with_body(body)).unwrap();
    assert!(matches!(encode(&repr), Err(Error::MalformedPayload { .. })));
}

#[test]
fn test_not_a_program() {
    let err = decode_text(r#"<o base="class" name="A"/>"#).unwrap_err();
    assert!(matches!(err, Error::MalformedTree { .. }));
}

#[test]
fn test_operand_codec() {
    for value in [
        Value::Int(-42),
        Value::Long(i64::MIN),
        Value::Double(0.1),
        Value::Bool(true),
        Value::Str("org/x/ä".into()),
    ] {
        let text = value.encode().to_string();
        assert_eq!(Value::parse(&text, value.kind()).unwrap(), value);
    }
    assert_eq!(Value::Int(42).encode().to_string(), "00 00 00 00 00 00 00 2A");
    assert!(matches!(Hex::parse("ABC"), Err(Error::MalformedPayload { .. })));
    assert!(matches!(Hex::parse("zz"), Err(Error::MalformedPayload { .. })));
    assert!(matches!(
        Value::parse("00 01", Kind::Int),
        Err(Error::MalformedPayload { .. })
    ));
}
