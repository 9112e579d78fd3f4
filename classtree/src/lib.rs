// classtree - JVM class files as XML class trees
//
// This library decodes class files into a tree-structured intermediate form
// (serializable as XML), encodes trees back into verified class files, and
// runs a decorator distillation pass over sets of classes.
//
// # Architecture
//
// Decoding goes through several phases:
//
// 1. **Class file parsing** (`classfile.rs`, `constant_pool.rs`): header,
//    constant pool, members and attributes
// 2. **Disassembly** (`disasm.rs`, `stack_map.rs`): method bodies to
//    canonical instructions with labels at every branch target, plus the
//    stack map frames declared there
// 3. **Translation** (`translate.rs`): typed model to class tree
//
// Encoding runs them backwards:
//
// 1. **Translation** (`translate.rs`): class tree to typed model
// 2. **CFG construction** (`cfg.rs`) and **frame analysis** (`frames.rs`):
//    basic blocks, max_stack/max_locals, stack map frames
// 3. **Class file generation** (`class_builder.rs`): constant pool, code
//    layout, StackMapTable
// 4. **Verification** (`verify.rs`): re-read and check the produced bytes
//
// # Tree form
//
// Every node is an `<o>` element with a `base` tag, an optional `name` and
// either children or a hex payload. Operands are typed leaves (`int`,
// `string`, `label`, ...); see `value.rs` for their encodings.
//
// # Distillation
//
// `distill.rs` merges a decorator and the class it decorates into one
// combined class and rewrites every construction site to use it.

pub mod builder;
pub mod bytes;
pub mod cfg;
pub mod class;
pub mod class_builder;
pub mod classfile;
pub mod constant_pool;
pub mod descriptor;
pub mod disasm;
pub mod distill;
pub mod error;
pub mod frames;
pub mod hex;
pub mod instruction;
pub mod label;
pub mod model;
pub mod mutf8;
pub mod opcode;
pub mod representation;
pub mod stack_map;
pub mod translate;
pub mod tree;
pub mod value;
pub mod verify;

pub use builder::ClassBuilder;
pub use class::ClassTree;
pub use distill::{CallSiteMatch, DistillOptions, Distilled, Distiller, Event, FirstTwoByName, PairSelector};
pub use error::{Error, Result};
pub use hex::Hex;
pub use instruction::{Constant, Instruction};
pub use label::{Label, LabelRegistry};
pub use opcode::Opcode;
pub use representation::Representation;
pub use tree::Node;
pub use value::{Kind, Value};

/// Decode class file bytes
///
/// The bytes are parsed right away so malformed input fails here rather
/// than on first use.
pub fn decode(bytes: Vec<u8>) -> Result<Representation> {
    let repr = Representation::from_bytes(bytes);
    repr.tree()?;
    Ok(repr)
}

/// Decode an XML class tree
pub fn decode_text(text: &str) -> Result<Representation> {
    Representation::from_text(text)
}

/// Encode to verified class file bytes
pub fn encode(repr: &Representation) -> Result<Vec<u8>> {
    repr.bytes().map(<[u8]>::to_vec)
}

/// Encode to XML text
pub fn encode_text(repr: &Representation) -> Result<String> {
    repr.to_xml()
}

/// Run distillation with default options
pub fn distill(representations: Vec<Representation>) -> Result<Vec<Representation>> {
    Distiller::new(DistillOptions::default())
        .apply(representations)
        .map(|distilled| distilled.representations)
}
