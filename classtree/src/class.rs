// class.rs - Typed view over one class tree
//
// A ClassTree owns a `program` node holding exactly one `class` node.
// Navigation and the edits distillation needs (field and method surgery,
// renaming, operand rewriting) go through here instead of raw node access.

use crate::error::{Error, Result};
use crate::hex::Hex;
use crate::model::CONSTRUCTOR;
use crate::tree::{Node, OPCODE};
use crate::value::Value;

pub const PROGRAM: &str = "program";
pub const CLASS: &str = "class";
pub const FIELD: &str = "field";
pub const METHOD: &str = "method";
pub const SEQ: &str = "seq";
pub const FRAMES: &str = "frames";
pub const TIME: &str = "time";

/// A class in tree form
#[derive(Debug, Clone, PartialEq)]
pub struct ClassTree {
    root: Node,
}

impl ClassTree {
    /// Wrap a `program` node, checking it holds exactly one named class
    pub fn new(root: Node) -> Result<Self> {
        if root.base() != PROGRAM {
            return Err(Error::tree(format!(
                "root must be a program node, found {}",
                root.describe()
            )));
        }
        let classes = root.children_with_base(CLASS).count();
        if classes != 1 {
            return Err(Error::tree(format!(
                "program must hold exactly one class, found {}",
                classes
            )));
        }
        let tree = ClassTree { root };
        if tree.class().name().map_or(true, str::is_empty) {
            return Err(Error::tree("class node has no name"));
        }
        Ok(tree)
    }

    pub fn from_xml(text: &str) -> Result<Self> {
        ClassTree::new(Node::from_xml(text)?)
    }

    pub fn to_xml(&self) -> Result<String> {
        self.root.to_xml()
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn into_root(self) -> Node {
        self.root
    }

    /// The `class` node
    pub fn class(&self) -> &Node {
        // Checked in new()
        self.root
            .children()
            .iter()
            .find(|c| c.base() == CLASS)
            .unwrap_or(&self.root)
    }

    fn class_mut(&mut self) -> &mut Node {
        let index = self
            .root
            .children()
            .iter()
            .position(|c| c.base() == CLASS)
            .unwrap_or(0);
        &mut self.root.children_mut()[index]
    }

    /// Qualified internal name, e.g. `org/example/Foo`
    pub fn name(&self) -> &str {
        self.class().name().unwrap_or_default()
    }

    /// Timestamp recorded on the program node
    pub fn time(&self) -> Option<String> {
        match self.root.child_value(TIME) {
            Ok(Some(Value::Str(time))) => Some(time),
            _ => None,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = Field<'_>> {
        self.class().children_with_base(FIELD).map(|node| Field { node })
    }

    pub fn methods(&self) -> impl Iterator<Item = Method<'_>> {
        self.class().children_with_base(METHOD).map(|node| Method { node })
    }

    pub fn methods_mut(&mut self) -> impl Iterator<Item = MethodMut<'_>> {
        self.class_mut()
            .children_mut()
            .iter_mut()
            .filter(|c| c.base() == METHOD)
            .map(|node| MethodMut { node })
    }

    /// Method by name and descriptor
    pub fn method(&self, name: &str, descriptor: &str) -> Option<Method<'_>> {
        self.methods()
            .find(|m| m.name() == name && m.descriptor().as_deref() == Some(descriptor))
    }

    /// Insert a field node after the last field (or before the first method)
    pub fn add_field(&mut self, field: Node) {
        let children = self.class_mut().children_mut();
        let at = match children.iter().rposition(|c| c.base() == FIELD) {
            Some(last) => last + 1,
            None => children
                .iter()
                .position(|c| c.base() == METHOD)
                .unwrap_or(children.len()),
        };
        children.insert(at, field);
    }

    /// Append a method node after the last method
    pub fn add_method(&mut self, method: Node) {
        let children = self.class_mut().children_mut();
        let at = children
            .iter()
            .rposition(|c| c.base() == METHOD)
            .map_or(children.len(), |last| last + 1);
        children.insert(at, method);
    }

    /// Remove every field node
    pub fn remove_fields(&mut self) -> Vec<Node> {
        let children = self.class_mut().children_mut();
        let (fields, rest): (Vec<Node>, Vec<Node>) =
            std::mem::take(children).into_iter().partition(|c| c.base() == FIELD);
        *children = rest;
        fields
    }

    /// Remove the methods matching `predicate`, returning how many went
    pub fn remove_methods_where(&mut self, predicate: impl Fn(&Method<'_>) -> bool) -> usize {
        let children = self.class_mut().children_mut();
        let before = children.len();
        children.retain(|node| node.base() != METHOD || !predicate(&Method { node }));
        before - children.len()
    }

    /// Set the qualified name on both the program and class nodes
    pub fn rename(&mut self, name: &str) {
        self.root.set_name(name);
        self.class_mut().set_name(name);
    }

    /// Deep copy under a new name, optionally with a new timestamp
    pub fn copy_as(&self, name: &str, time: Option<&str>) -> ClassTree {
        let mut copy = self.clone();
        copy.rename(name);
        if let Some(time) = time {
            let stamp = Node::attr(TIME, &Value::Str(time.to_string()));
            let children = copy.root.children_mut();
            match children.iter_mut().find(|c| c.name() == Some(TIME)) {
                Some(existing) => *existing = stamp,
                None => children.insert(0, stamp),
            }
        }
        copy
    }

    /// Replace every instruction operand and frame entry whose payload is
    /// exactly `old`
    pub fn rewrite_operands(&mut self, old: &Hex, new: &Hex) -> usize {
        self.methods_mut()
            .map(|method| rewrite_method(method.node, old, new))
            .sum()
    }
}

/// `rewrite_operands` for one method node
pub fn rewrite_method(method: &mut Node, old: &Hex, new: &Hex) -> usize {
    let mut count = 0;
    if let Some(seq) = method.child_mut(SEQ) {
        count += rewrite_operands_in(seq.children_mut(), old, new);
    }
    if let Some(frames) = method.child_mut(FRAMES) {
        for frame in frames.children_mut() {
            for tuple in frame.children_mut().iter_mut().filter(|c| !c.is_leaf()) {
                for entry in tuple.children_mut() {
                    if entry.data() == Some(old) {
                        entry.set_data(new.clone());
                        count += 1;
                    }
                }
            }
        }
    }
    count
}

/// Replace operands whose payload is exactly `old` in a list of instruction nodes
pub fn rewrite_operands_in(instructions: &mut [Node], old: &Hex, new: &Hex) -> usize {
    let mut count = 0;
    for insn in instructions.iter_mut().filter(|n| n.base() == OPCODE) {
        for operand in insn.children_mut() {
            if operand.data() == Some(old) {
                operand.set_data(new.clone());
                count += 1;
            }
        }
    }
    count
}

/// Read-only view of a field node
#[derive(Debug, Clone, Copy)]
pub struct Field<'a> {
    node: &'a Node,
}

impl<'a> Field<'a> {
    pub fn name(&self) -> &'a str {
        self.node.name().unwrap_or_default()
    }

    pub fn descriptor(&self) -> Option<String> {
        self.node.required_str("descriptor").ok()
    }

    pub fn node(&self) -> &'a Node {
        self.node
    }
}

/// Read-only view of a method node
#[derive(Debug, Clone, Copy)]
pub struct Method<'a> {
    node: &'a Node,
}

impl<'a> Method<'a> {
    pub fn name(&self) -> &'a str {
        self.node.name().unwrap_or_default()
    }

    pub fn descriptor(&self) -> Option<String> {
        self.node.required_str("descriptor").ok()
    }

    pub fn is_constructor(&self) -> bool {
        self.name() == CONSTRUCTOR
    }

    /// Instruction and label nodes; empty when the method has no body
    pub fn instructions(&self) -> &'a [Node] {
        self.node.child(SEQ).map_or(&[], Node::children)
    }

    pub fn node(&self) -> &'a Node {
        self.node
    }
}

/// Mutable view of a method node
#[derive(Debug)]
pub struct MethodMut<'a> {
    node: &'a mut Node,
}

impl MethodMut<'_> {
    pub fn name(&self) -> &str {
        self.node.name().unwrap_or_default()
    }

    pub fn as_method(&self) -> Method<'_> {
        Method { node: self.node }
    }

    /// Replace the whole instruction sequence
    pub fn set_instructions(&mut self, instructions: Vec<Node>) -> Result<()> {
        let method = self.name().to_string();
        let seq = self
            .node
            .child_mut(SEQ)
            .ok_or(Error::NoInstructionSequence { method })?;
        *seq.children_mut() = instructions;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;
    use crate::opcode::Opcode;
    use pretty_assertions::assert_eq;

    fn method(name: &str, body: Vec<Node>) -> Node {
        Node::named(METHOD, name)
            .with_child(Node::attr("access", &Value::Int(1)))
            .with_child(Node::attr("descriptor", &Value::Str("()V".into())))
            .with_child(Node::named(SEQ, SEQ).with_children(body))
    }

    fn sample() -> ClassTree {
        let class = Node::named(CLASS, "org/x/A")
            .with_child(Node::named(FIELD, "x"))
            .with_child(method(
                "<init>",
                vec![Instruction::Plain(Opcode::RETURN).to_node()],
            ))
            .with_child(method(
                "make",
                vec![
                    Instruction::type_insn(Opcode::NEW, "org/x/B").to_node(),
                    Instruction::Plain(Opcode::RETURN).to_node(),
                ],
            ));
        ClassTree::new(Node::named(PROGRAM, "org/x/A").with_child(class)).unwrap()
    }

    #[test]
    fn test_rejects_non_program_root() {
        assert!(ClassTree::new(Node::named(CLASS, "A")).is_err());
        assert!(ClassTree::new(Node::named(PROGRAM, "A")).is_err());
    }

    #[test]
    fn test_navigation() {
        let tree = sample();
        assert_eq!(tree.name(), "org/x/A");
        assert_eq!(tree.fields().map(|f| f.name()).collect::<Vec<_>>(), vec!["x"]);
        assert_eq!(
            tree.methods().map(|m| m.name()).collect::<Vec<_>>(),
            vec!["<init>", "make"]
        );
        assert!(tree.method("make", "()V").is_some());
        assert!(tree.method("make", "()I").is_none());
    }

    #[test]
    fn test_field_and_method_surgery() {
        let mut tree = sample();
        let removed = tree.remove_fields();
        assert_eq!(removed.len(), 1);
        tree.add_field(Node::named(FIELD, "y"));
        assert_eq!(tree.class().children()[0].name(), Some("y"));

        assert_eq!(tree.remove_methods_where(|m| m.is_constructor()), 1);
        tree.add_method(method("other", Vec::new()));
        assert_eq!(
            tree.methods().map(|m| m.name()).collect::<Vec<_>>(),
            vec!["make", "other"]
        );
    }

    #[test]
    fn test_set_instructions_needs_seq() {
        let mut tree = sample();
        tree.add_method(Node::named(METHOD, "bare"));
        let mut methods: Vec<_> = tree.methods_mut().collect();
        assert!(methods[0].set_instructions(Vec::new()).is_ok());
        assert_eq!(
            methods[2].set_instructions(Vec::new()),
            Err(Error::NoInstructionSequence {
                method: "bare".into()
            })
        );
    }

    #[test]
    fn test_copy_and_rewrite() {
        let tree = sample();
        let mut copy = tree.copy_as("org/x/C", Some("now"));
        assert_eq!(copy.name(), "org/x/C");
        assert_eq!(copy.time().as_deref(), Some("now"));
        assert_eq!(tree.name(), "org/x/A");

        let old = Value::Str("org/x/B".into()).encode();
        let new = Value::Str("org/x/D".into()).encode();
        assert_eq!(copy.rewrite_operands(&old, &new), 1);
        let make = copy.method("make", "()V").unwrap();
        assert_eq!(
            make.instructions()[0],
            Instruction::type_insn(Opcode::NEW, "org/x/D").to_node()
        );
    }

    #[test]
    fn test_rewrite_reaches_frames() {
        let local = |name: &str| Node::leaf(&Value::Str(name.into()));
        let frames = Node::named(FRAMES, FRAMES).with_child(
            Node::new("frame")
                .with_child(Node::attr("at", &Value::Label("L0".into())))
                .with_child(Node::named("tuple", "locals").with_child(local("org/x/B")))
                .with_child(Node::named("tuple", "stack").with_child(local("org/x/C"))),
        );
        let mut tree = sample();
        tree.add_method(method("loop", Vec::new()).with_child(frames));

        let old = Value::Str("org/x/B".into()).encode();
        let new = Value::Str("org/x/D".into()).encode();
        assert_eq!(tree.rewrite_operands(&old, &new), 2);
        let frame = &tree.method("loop", "()V").unwrap().node().child(FRAMES).unwrap().children()[0];
        assert_eq!(frame.child("locals").unwrap().children()[0], local("org/x/D"));
        assert_eq!(frame.child("stack").unwrap().children()[0], local("org/x/C"));
    }
}
