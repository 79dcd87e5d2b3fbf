//! JSON test vector loader shared by envelope tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(dead_code)]

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TestVector {
    pub description: String,
    /// The envelope exactly as it would arrive on the wire.
    pub frame: serde_json::Value,
    #[serde(default)]
    pub expect: Option<serde_json::Value>,
    #[serde(default)]
    pub expect_error: Option<ExpectError>,
}

#[derive(Debug, Deserialize)]
pub struct ExpectError {
    pub class: String,
}

impl TestVector {
    pub fn wire(&self) -> String {
        match &self.frame {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

pub fn load(name: &str) -> TestVector {
    let s = std::fs::read_to_string(format!("tests/vectors/{name}")).unwrap();
    serde_json::from_str(&s).unwrap()
}
