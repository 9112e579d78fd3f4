// representation.rs - One class in binary or tree form
//
// A Representation starts from whichever form it was given and converts to
// the other on first request. Both forms are cached in `OnceCell`s, so a
// Representation can be shared across threads and each conversion runs once.

use crate::class::ClassTree;
use crate::error::{Error, Result, UNKNOWN_SOURCE};
use crate::translate;
use once_cell::sync::OnceCell;
use std::path::Path;
use tracing::debug;

/// A class, identified by its qualified internal name
#[derive(Debug, Clone)]
pub struct Representation {
    /// File path or caller-supplied tag, used in error messages
    source: String,
    binary: OnceCell<Vec<u8>>,
    tree: OnceCell<ClassTree>,
}

impl Representation {
    /// Class file bytes; decoded on first use
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Representation {
            source: UNKNOWN_SOURCE.to_string(),
            binary: OnceCell::with_value(bytes),
            tree: OnceCell::new(),
        }
    }

    pub fn from_tree(tree: ClassTree) -> Self {
        Representation {
            source: UNKNOWN_SOURCE.to_string(),
            binary: OnceCell::new(),
            tree: OnceCell::with_value(tree),
        }
    }

    /// Parse an XML class tree
    pub fn from_text(text: &str) -> Result<Self> {
        Ok(Representation::from_tree(ClassTree::from_xml(text)?))
    }

    /// Load a `.class` or `.xml` file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = path.display().to_string();
        if !path.exists() {
            return Err(Error::SourceNotFound(source));
        }
        let unreadable = |reason: String| Error::SourceUnreadable {
            source_id: source.clone(),
            reason,
        };
        let is_xml = path.extension().is_some_and(|ext| ext == "xml");
        let repr = if is_xml {
            let text = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
            Representation::from_text(&text).map_err(|e| e.in_source(&source))?
        } else {
            let bytes = std::fs::read(path).map_err(|e| unreadable(e.to_string()))?;
            Representation::from_bytes(bytes)
        };
        debug!("opened {}", source);
        Ok(repr.with_source(&source))
    }

    /// Attach a source identifier for error messages
    pub fn with_source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Qualified internal name (`org/example/Foo`)
    pub fn name(&self) -> Result<&str> {
        Ok(self.tree()?.name())
    }

    /// Tree form, decoding the class file if needed
    pub fn tree(&self) -> Result<&ClassTree> {
        self.tree.get_or_try_init(|| {
            let bytes = self.binary.get().ok_or_else(|| Error::SourceUnreadable {
                source_id: self.source.clone(),
                reason: "representation holds neither bytes nor a tree".to_string(),
            })?;
            translate::disassemble(bytes).map_err(|e| e.in_source(&self.source))
        })
    }

    /// Class file form, assembling and verifying the tree if needed
    pub fn bytes(&self) -> Result<&[u8]> {
        self.binary
            .get_or_try_init(|| {
                let tree = self.tree()?;
                translate::assemble(tree).map_err(|e| e.in_source(&self.source))
            })
            .map(Vec::as_slice)
    }

    /// XML text of the tree form
    pub fn to_xml(&self) -> Result<String> {
        self.tree()?.to_xml()
    }

    /// Take the tree out, decoding first if needed
    pub fn into_tree(self) -> Result<ClassTree> {
        self.tree()?;
        self.tree
            .into_inner()
            .ok_or_else(|| Error::tree("tree form vanished after decoding"))
    }
}
