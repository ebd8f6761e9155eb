//! Remote state mirror: a key-path store offering per-path reads and writes
//! plus ordered appends. Local state is authoritative; the mirror is
//! best-effort and every call reports its own failure.

pub mod firebase;
pub mod memory;

use anyhow::Result;
use serde_json::{Map, Value};

pub use firebase::FirebaseStore;
pub use memory::MemoryStore;

// ---------------------------------------------------------------------------
// Paths shared with the dashboard
// ---------------------------------------------------------------------------

pub const MOTOR_IS_ON: &str = "App/motor/isOn";
pub const MOTOR_MANUAL_MODE: &str = "App/motor/manualMode";
pub const MOISTURE_CURRENT: &str = "App/soilMoisture/currentValue";
pub const MOISTURE_LOG: &str = "App/soilMoisture/wholeData";
pub const ENVIRONMENT: &str = "App/environment";

/// Ordered name → value mapping written as a single JSON object.
pub type Fields = Map<String, Value>;

/// Build a [`Fields`] map, keeping the given order.
pub fn fields<const N: usize>(pairs: [(&str, Value); N]) -> Fields {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Capability set of a remote mirror backend.
///
/// Writes are fire-and-forget: the backend never retries or queues, it
/// only reports the outcome.
pub trait RemoteStore {
    /// Whether the session is authenticated and usable right now.
    async fn ready(&mut self) -> bool;
    async fn get_bool(&mut self, path: &str) -> Result<bool>;
    async fn set_bool(&mut self, path: &str, value: bool) -> Result<()>;
    async fn set_int(&mut self, path: &str, value: i64) -> Result<()>;
    async fn set_object(&mut self, path: &str, fields: Fields) -> Result<()>;
    /// Push `fields` as a new, uniquely keyed child of `path`.
    async fn append(&mut self, path: &str, fields: Fields) -> Result<()>;
}

/// Backend chosen at runtime from `store.backend`.
pub enum AnyStore {
    Memory(MemoryStore),
    Firebase(FirebaseStore),
}

impl RemoteStore for AnyStore {
    async fn ready(&mut self) -> bool {
        match self {
            Self::Memory(s) => s.ready().await,
            Self::Firebase(s) => s.ready().await,
        }
    }

    async fn get_bool(&mut self, path: &str) -> Result<bool> {
        match self {
            Self::Memory(s) => s.get_bool(path).await,
            Self::Firebase(s) => s.get_bool(path).await,
        }
    }

    async fn set_bool(&mut self, path: &str, value: bool) -> Result<()> {
        match self {
            Self::Memory(s) => s.set_bool(path, value).await,
            Self::Firebase(s) => s.set_bool(path, value).await,
        }
    }

    async fn set_int(&mut self, path: &str, value: i64) -> Result<()> {
        match self {
            Self::Memory(s) => s.set_int(path, value).await,
            Self::Firebase(s) => s.set_int(path, value).await,
        }
    }

    async fn set_object(&mut self, path: &str, fields: Fields) -> Result<()> {
        match self {
            Self::Memory(s) => s.set_object(path, fields).await,
            Self::Firebase(s) => s.set_object(path, fields).await,
        }
    }

    async fn append(&mut self, path: &str, fields: Fields) -> Result<()> {
        match self {
            Self::Memory(s) => s.append(path, fields).await,
            Self::Firebase(s) => s.append(path, fields).await,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
