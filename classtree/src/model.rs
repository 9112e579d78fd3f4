// model.rs - Typed class model shared by the binary and tree codecs
//
// The binary side parses into this model and assembles from it; the tree
// side translates it to and from nodes. Nothing here knows about bytes or XML.

use crate::instruction::{Constant, Instruction};
use crate::label::Label;

/// Access flags (JVMS 4.1, 4.5, 4.6)
pub mod access {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SUPER: u16 = 0x0020;
    pub const SYNCHRONIZED: u16 = 0x0020;
    pub const VOLATILE: u16 = 0x0040;
    pub const BRIDGE: u16 = 0x0040;
    pub const TRANSIENT: u16 = 0x0080;
    pub const VARARGS: u16 = 0x0080;
    pub const NATIVE: u16 = 0x0100;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
    pub const STRICT: u16 = 0x0800;
    pub const SYNTHETIC: u16 = 0x1000;
    pub const ANNOTATION: u16 = 0x2000;
    pub const ENUM: u16 = 0x4000;
}

/// Constructor method name
pub const CONSTRUCTOR: &str = "<init>";

/// Root of every class hierarchy
pub const OBJECT: &str = "java/lang/Object";

/// A whole class
#[derive(Debug, Clone, PartialEq)]
pub struct ClassModel {
    pub minor_version: u16,
    pub major_version: u16,
    pub access: u16,
    /// Internal name (`org/x/A`)
    pub name: String,
    /// `None` only for `java/lang/Object`
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub signature: Option<String>,
    pub source_file: Option<String>,
    pub annotations: Vec<Annotation>,
    pub fields: Vec<FieldModel>,
    pub methods: Vec<MethodModel>,
}

impl ClassModel {
    /// Packed version as stored in the tree (`major << 16 | minor`)
    pub fn version(&self) -> u32 {
        u32::from(self.major_version) << 16 | u32::from(self.minor_version)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldModel {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    /// `ConstantValue` attribute
    pub value: Option<Constant>,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodModel {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    pub exceptions: Vec<String>,
    pub instructions: Vec<Instruction>,
    pub handlers: Vec<TryCatch>,
    /// Stack map frames carried over from a decoded class, by target label
    pub frames: Vec<DeclaredFrame>,
    pub annotations: Vec<Annotation>,
}

impl MethodModel {
    pub fn new(access: u16, name: &str, descriptor: &str) -> Self {
        MethodModel {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            signature: None,
            exceptions: Vec::new(),
            instructions: Vec::new(),
            handlers: Vec::new(),
            frames: Vec::new(),
            annotations: Vec::new(),
        }
    }

    pub fn is_static(&self) -> bool {
        self.access & access::STATIC != 0
    }

    /// Abstract and native methods carry no `Code` attribute
    pub fn has_code(&self) -> bool {
        self.access & (access::ABSTRACT | access::NATIVE) == 0
    }

    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR
    }
}

/// One exception table entry, bounded by labels
#[derive(Debug, Clone, PartialEq)]
pub struct TryCatch {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    /// `None` catches everything (`finally`)
    pub catch_type: Option<String>,
}

/// A stack map frame as the class declared it (JVMS 4.7.4)
///
/// The encoder takes the declared types over the ones it infers, which keeps
/// the common supertype at a join where two object types meet.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredFrame {
    pub label: Label,
    /// One entry per local; a long or double takes a single entry
    pub locals: Vec<FrameValue>,
    pub stack: Vec<FrameValue>,
}

/// Verification type of a declared frame entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameValue {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    /// Result of a `NEW` whose constructor hasn't run; the encoder tracks
    /// which one
    Uninitialized,
    /// Internal class name or array descriptor
    Object(String),
}

impl FrameValue {
    /// Verification type tag (JVMS 4.7.4); objects are 7
    pub fn tag(&self) -> u8 {
        match self {
            FrameValue::Top => 0,
            FrameValue::Integer => 1,
            FrameValue::Float => 2,
            FrameValue::Double => 3,
            FrameValue::Long => 4,
            FrameValue::Null => 5,
            FrameValue::UninitializedThis => 6,
            FrameValue::Object(_) => 7,
            FrameValue::Uninitialized => 8,
        }
    }

    /// Value for a tag other than 7
    pub fn from_tag(tag: u8) -> Option<FrameValue> {
        Some(match tag {
            0 => FrameValue::Top,
            1 => FrameValue::Integer,
            2 => FrameValue::Float,
            3 => FrameValue::Double,
            4 => FrameValue::Long,
            5 => FrameValue::Null,
            6 => FrameValue::UninitializedThis,
            8 => FrameValue::Uninitialized,
            _ => return None,
        })
    }

    pub fn slots(&self) -> usize {
        match self {
            FrameValue::Long | FrameValue::Double => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub descriptor: String,
    /// Runtime-visible or runtime-invisible
    pub visible: bool,
    pub elements: Vec<(String, ElementValue)>,
}

/// Annotation element value (JVMS 4.7.16.1)
#[derive(Debug, Clone, PartialEq)]
pub enum ElementValue {
    /// Primitive or string constant with its tag (`I`, `Z`, `s`, ...)
    Const(char, Constant),
    Enum { descriptor: String, name: String },
    Class(String),
    Annotation(Annotation),
    Array(Vec<ElementValue>),
}
