//! In-memory mirror with no sync. Used for offline dry runs
//! (`store.backend = "memory"`) and as the fake in tests.

use anyhow::{bail, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::{Fields, RemoteStore};

#[derive(Debug)]
pub struct MemoryStore {
    values: BTreeMap<String, Value>,
    next_child: u64,
    /// Reported by [`RemoteStore::ready`].
    pub is_ready: bool,
    /// Reject every read with a backend-style reason.
    pub fail_reads: bool,
    /// Reject every write with a backend-style reason.
    pub fail_writes: bool,
    /// Paths of every attempted write, successful or not, in call order.
    pub writes: Vec<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
            next_child: 0,
            is_ready: true,
            fail_reads: false,
            fail_writes: false,
            writes: Vec::new(),
        }
    }

    /// Raw value stored at `path`, if any.
    pub fn value(&self, path: &str) -> Option<&Value> {
        self.values.get(path)
    }

    /// Children appended under `path`, oldest first.
    pub fn log(&self, path: &str) -> Vec<&Value> {
        match self.values.get(path) {
            Some(Value::Object(children)) => children.values().collect(),
            _ => Vec::new(),
        }
    }

    /// Seed a value without counting it as a write.
    pub fn seed(&mut self, path: &str, value: Value) {
        self.values.insert(path.to_string(), value);
    }

    fn write(&mut self, path: &str, value: Value) -> Result<()> {
        self.writes.push(path.to_string());
        if self.fail_writes {
            bail!("permission denied");
        }
        self.values.insert(path.to_string(), value);
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStore for MemoryStore {
    async fn ready(&mut self) -> bool {
        self.is_ready
    }

    async fn get_bool(&mut self, path: &str) -> Result<bool> {
        if self.fail_reads {
            bail!("connection lost");
        }
        match self.values.get(path) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => bail!("type mismatch at {path}: expected boolean, found {other}"),
            None => bail!("path not exist"),
        }
    }

    async fn set_bool(&mut self, path: &str, value: bool) -> Result<()> {
        self.write(path, Value::Bool(value))
    }

    async fn set_int(&mut self, path: &str, value: i64) -> Result<()> {
        self.write(path, Value::from(value))
    }

    async fn set_object(&mut self, path: &str, fields: Fields) -> Result<()> {
        self.write(path, Value::Object(fields))
    }

    async fn append(&mut self, path: &str, fields: Fields) -> Result<()> {
        self.writes.push(path.to_string());
        if self.fail_writes {
            bail!("permission denied");
        }

        // Zero-padded sequence keys sort in push order, like RTDB push ids.
        let key = format!("-{:019}", self.next_child);
        self.next_child += 1;

        let entry = self
            .values
            .entry(path.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(children) = entry {
            children.insert(key, Value::Object(fields));
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
