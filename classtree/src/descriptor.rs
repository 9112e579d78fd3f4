// descriptor.rs - Field and method descriptor parsing

/// A parsed field type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    /// Internal class name (`java/lang/String`)
    Object(String),
    /// Whole array descriptor (`[I`, `[Ljava/lang/String;`)
    Array(String),
}

impl FieldType {
    /// Number of local/stack slots a value of this type occupies
    pub fn slots(&self) -> u16 {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }
}

/// A parsed method descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodType {
    pub params: Vec<FieldType>,
    /// `None` for `V`
    pub ret: Option<FieldType>,
}

impl MethodType {
    /// Slots taken by the arguments (without the receiver)
    pub fn arg_slots(&self) -> u16 {
        self.params.iter().map(FieldType::slots).sum()
    }
}

/// Parse a complete field descriptor
pub fn parse_field(descriptor: &str) -> Option<FieldType> {
    let (ty, end) = parse_one(descriptor.as_bytes(), 0)?;
    (end == descriptor.len()).then_some(ty)
}

/// Parse a complete method descriptor
pub fn parse_method(descriptor: &str) -> Option<MethodType> {
    let bytes = descriptor.as_bytes();
    if bytes.first() != Some(&b'(') {
        return None;
    }
    let mut pos = 1;
    let mut params = Vec::new();
    while *bytes.get(pos)? != b')' {
        let (ty, next) = parse_one(bytes, pos)?;
        params.push(ty);
        pos = next;
    }
    pos += 1;
    let ret = if bytes.get(pos) == Some(&b'V') {
        pos += 1;
        None
    } else {
        let (ty, next) = parse_one(bytes, pos)?;
        pos = next;
        Some(ty)
    };
    (pos == bytes.len()).then_some(MethodType { params, ret })
}

fn parse_one(bytes: &[u8], start: usize) -> Option<(FieldType, usize)> {
    let ty = match *bytes.get(start)? {
        b'B' => FieldType::Byte,
        b'C' => FieldType::Char,
        b'D' => FieldType::Double,
        b'F' => FieldType::Float,
        b'I' => FieldType::Int,
        b'J' => FieldType::Long,
        b'S' => FieldType::Short,
        b'Z' => FieldType::Boolean,
        b'L' => {
            let end = start + bytes[start..].iter().position(|&b| b == b';')?;
            if end == start + 1 {
                return None;
            }
            let name = std::str::from_utf8(&bytes[start + 1..end]).ok()?;
            return Some((FieldType::Object(name.to_string()), end + 1));
        }
        b'[' => {
            let mut pos = start;
            while bytes.get(pos) == Some(&b'[') {
                pos += 1;
            }
            if pos - start > 255 {
                return None;
            }
            let (_, end) = parse_one(bytes, pos)?;
            let desc = std::str::from_utf8(&bytes[start..end]).ok()?;
            return Some((FieldType::Array(desc.to_string()), end));
        }
        _ => return None,
    };
    Some((ty, start + 1))
}
