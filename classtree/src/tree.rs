// tree.rs - Generic class tree nodes and their XML text form
//
// A class tree is a tree of `<o>` elements. Each node has a base tag, an
// optional name and either children or a hex payload. The XML form is
// written with quick-xml and parsed back into an equal tree.

use crate::error::{Error, Result};
use crate::hex::Hex;
use crate::value::{Kind, Value};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

/// Element name used for every node
const ELEMENT: &str = "o";

/// Base tag of instruction nodes; their names carry a positional suffix
pub const OPCODE: &str = "opcode";

/// A node of the class tree
#[derive(Debug, Clone, Default)]
pub struct Node {
    base: String,
    name: Option<String>,
    children: Vec<Node>,
    data: Option<Hex>,
}

impl Node {
    pub fn new(base: impl Into<String>) -> Self {
        Node {
            base: base.into(),
            ..Default::default()
        }
    }

    pub fn named(base: impl Into<String>, name: impl Into<String>) -> Self {
        Node::new(base).with_name(name)
    }

    /// A leaf holding `value`, tagged with its kind
    pub fn leaf(value: &Value) -> Self {
        Node::new(value.kind().tag()).with_data(value.encode())
    }

    /// A named leaf holding `value`
    pub fn attr(name: &str, value: &Value) -> Self {
        Node::leaf(value).with_name(name)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn with_data(mut self, data: Hex) -> Self {
        self.data = Some(data);
        self
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Node> {
        &mut self.children
    }

    pub fn data(&self) -> Option<&Hex> {
        self.data.as_ref()
    }

    pub fn set_data(&mut self, data: Hex) {
        self.data = Some(data);
    }

    /// Is this a typed leaf (`int`, `string`, ...)?
    pub fn is_leaf(&self) -> bool {
        Kind::from_tag(&self.base).is_some()
    }

    /// First child with the given name
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name() == Some(name))
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children.iter_mut().find(|c| c.name() == Some(name))
    }

    /// Children with the given base tag
    pub fn children_with_base<'a>(&'a self, base: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children.iter().filter(move |c| c.base == base)
    }

    /// Decode this leaf's payload according to its base tag
    pub fn value(&self) -> Result<Value> {
        let kind = Kind::from_tag(&self.base)
            .ok_or_else(|| Error::tree(format!("'{}' node is not a value leaf", self.base)))?;
        let empty = Hex::default();
        Value::decode(self.data.as_ref().unwrap_or(&empty), kind)
    }

    /// Decode a named child leaf
    pub fn child_value(&self, name: &str) -> Result<Option<Value>> {
        self.child(name).map(Node::value).transpose()
    }

    /// Decode a required named string leaf
    pub fn required_str(&self, name: &str) -> Result<String> {
        match self.child_value(name)? {
            Some(Value::Str(s)) => Ok(s),
            Some(other) => Err(Error::tree(format!(
                "'{}' of {} must be a string, found {}",
                name,
                self.describe(),
                other.kind()
            ))),
            None => Err(Error::tree(format!("{} has no '{}'", self.describe(), name))),
        }
    }

    /// Decode a required named int leaf
    pub fn required_int(&self, name: &str) -> Result<i64> {
        match self.child_value(name)? {
            Some(Value::Int(v)) => Ok(v),
            Some(other) => Err(Error::tree(format!(
                "'{}' of {} must be an int, found {}",
                name,
                self.describe(),
                other.kind()
            ))),
            None => Err(Error::tree(format!("{} has no '{}'", self.describe(), name))),
        }
    }

    /// Short human-readable identity for error messages
    pub fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("{} '{}'", self.base, name),
            None => self.base.clone(),
        }
    }

    /// Render the tree as an XML document
    pub fn to_xml(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(|e| Error::tree(e.to_string()))?;
        self.write(&mut writer)?;
        let mut bytes = writer.into_inner();
        bytes.push(b'\n');
        String::from_utf8(bytes).map_err(|e| Error::tree(e.to_string()))
    }

    fn write(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        let mut start = BytesStart::new(ELEMENT);
        start.push_attribute(("base", self.base.as_str()));
        if let Some(name) = &self.name {
            start.push_attribute(("name", name.as_str()));
        }
        let text = self.data.as_ref().map(Hex::to_string).unwrap_or_default();
        if self.children.is_empty() && text.is_empty() {
            return writer
                .write_event(Event::Empty(start))
                .map_err(|e| Error::tree(e.to_string()));
        }
        writer
            .write_event(Event::Start(start))
            .map_err(|e| Error::tree(e.to_string()))?;
        if !text.is_empty() {
            writer
                .write_event(Event::Text(BytesText::new(&text)))
                .map_err(|e| Error::tree(e.to_string()))?;
        }
        for child in &self.children {
            child.write(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(ELEMENT)))
            .map_err(|e| Error::tree(e.to_string()))
    }

    /// Parse an XML document back into a tree
    pub fn from_xml(text: &str) -> Result<Node> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        // Open elements with the text collected for each
        let mut stack: Vec<(Node, String)> = Vec::new();
        let mut root: Option<Node> = None;

        loop {
            let event = reader.read_event().map_err(|e| {
                Error::tree(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                ))
            })?;
            match event {
                Event::Start(e) => stack.push((open(&e)?, String::new())),
                Event::Empty(e) => {
                    let node = finish(open(&e)?, "")?;
                    attach(node, &mut stack, &mut root)?;
                }
                Event::Text(e) => {
                    let content = e.unescape().map_err(|e| Error::tree(e.to_string()))?;
                    match stack.last_mut() {
                        Some((_, text)) => text.push_str(&content),
                        None => return Err(Error::tree("text outside of the root element")),
                    }
                }
                Event::CData(e) => {
                    let raw = e.into_inner();
                    let content =
                        std::str::from_utf8(&raw).map_err(|e| Error::tree(e.to_string()))?;
                    match stack.last_mut() {
                        Some((_, text)) => text.push_str(content),
                        None => return Err(Error::tree("text outside of the root element")),
                    }
                }
                Event::End(_) => {
                    let (node, text) = stack
                        .pop()
                        .ok_or_else(|| Error::tree("unbalanced closing tag"))?;
                    let node = finish(node, &text)?;
                    attach(node, &mut stack, &mut root)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(Error::tree("unexpected end of document"));
        }
        root.ok_or_else(|| Error::tree("document has no root element"))
    }
}

fn open(start: &BytesStart<'_>) -> Result<Node> {
    if start.name().as_ref() != ELEMENT.as_bytes() {
        return Err(Error::tree(format!(
            "unexpected element <{}>",
            String::from_utf8_lossy(start.name().as_ref())
        )));
    }
    let mut base = None;
    let mut name = None;
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::tree(e.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|e| Error::tree(e.to_string()))?
            .into_owned();
        match attr.key.as_ref() {
            b"base" => base = Some(value),
            b"name" => name = Some(value),
            _ => {}
        }
    }
    let base = base.ok_or_else(|| Error::tree("element without a 'base' attribute"))?;
    Ok(Node {
        base,
        name,
        children: Vec::new(),
        data: None,
    })
}

fn finish(mut node: Node, text: &str) -> Result<Node> {
    if node.is_leaf() {
        node.data = Some(Hex::parse(text)?);
    } else if !text.trim().is_empty() {
        if !node.children.is_empty() {
            return Err(Error::tree(format!(
                "{} mixes text and children",
                node.describe()
            )));
        }
        node.data = Some(Hex::parse(text)?);
    }
    Ok(node)
}

fn attach(node: Node, stack: &mut [(Node, String)], root: &mut Option<Node>) -> Result<()> {
    match stack.last_mut() {
        Some((parent, _)) => {
            parent.children.push(node);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(node);
            Ok(())
        }
        None => Err(Error::tree("document has more than one root element")),
    }
}

/// Mnemonic part of an instruction tag (`"NEW-187-4"` gives `"NEW"`)
pub fn mnemonic_of(tag: &str) -> &str {
    tag.split('-').next().unwrap_or(tag)
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        if self.base != other.base {
            return false;
        }
        let names_match = if self.base == OPCODE {
            self.name.as_deref().map(mnemonic_of) == other.name.as_deref().map(mnemonic_of)
        } else {
            self.name == other.name
        };
        names_match && self.data_eq(other) && self.children == other.children
    }
}

impl Node {
    // An empty payload and a missing one compare equal.
    fn data_eq(&self, other: &Node) -> bool {
        let empty = Hex::default();
        self.data.as_ref().unwrap_or(&empty) == other.data.as_ref().unwrap_or(&empty)
    }
}
