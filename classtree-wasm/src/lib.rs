// classtree-wasm: class tree codec for the browser
//
// This crate wraps the classtree library for use inside a WebAssembly
// environment. It compiles to wasm32-unknown-unknown via wasm-bindgen so a
// page can turn class file bytes into XML class trees and back.

use anyhow::Context;
use wasm_bindgen::prelude::*;

/// Disassemble class file bytes into an XML class tree.
#[wasm_bindgen]
pub fn disassemble(bytes: &[u8]) -> Result<String, JsValue> {
    disassemble_inner(bytes).map_err(|e| JsValue::from_str(&format!("{:#}", e)))
}

fn disassemble_inner(bytes: &[u8]) -> anyhow::Result<String> {
    let repr = classtree::decode(bytes.to_vec()).context("Failed to decode class file")?;
    Ok(repr.to_xml()?)
}

/// Assemble an XML class tree into verified class file bytes.
#[wasm_bindgen]
pub fn assemble(text: &str) -> Result<Vec<u8>, JsValue> {
    assemble_inner(text).map_err(|e| JsValue::from_str(&format!("{:#}", e)))
}

fn assemble_inner(text: &str) -> anyhow::Result<Vec<u8>> {
    let repr = classtree::decode_text(text).context("Failed to parse class tree")?;
    Ok(classtree::encode(&repr).context("Failed to assemble class")?)
}

/// Get version string
#[wasm_bindgen]
pub fn version() -> String {
    format!("classtree-wasm {}", env!("CARGO_PKG_VERSION"))
}


#[cfg(all(test, target_arch = "wasm32"))]
mod web_tests {
    use super::*;
    use wasm_bindgen_test::wasm_bindgen_test;

    #[wasm_bindgen_test]
    fn test_assemble_rejects_garbage() {
        assert!(assemble("<o base=\"class\"/>").is_err());
    }

    #[wasm_bindgen_test]
    fn test_disassemble_rejects_garbage() {
        assert!(disassemble(&[0xCA, 0xFE]).is_err());
    }
}
