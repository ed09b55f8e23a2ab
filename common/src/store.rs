use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Typed key-value persistence, one instance per namespace.
///
/// Mirrors the narrow surface of an NVS-style preferences store: missing
/// keys and type mismatches read back as `None`, never as errors.
pub trait KeyValueStore {
    fn get_str(&self, key: &str) -> StoreResult<Option<String>>;
    fn put_str(&mut self, key: &str, value: &str) -> StoreResult<()>;

    fn get_i64(&self, key: &str) -> StoreResult<Option<i64>>;
    fn put_i64(&mut self, key: &str, value: i64) -> StoreResult<()>;

    fn get_bool(&self, key: &str) -> StoreResult<Option<bool>>;
    fn put_bool(&mut self, key: &str, value: bool) -> StoreResult<()>;

    fn get_f32(&self, key: &str) -> StoreResult<Option<f32>>;
    fn put_f32(&mut self, key: &str, value: f32) -> StoreResult<()>;
}

#[derive(Debug, Clone, PartialEq)]
enum StoredValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Float(f32),
}

/// In-memory store, used by the test suites of both crates.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: HashMap<String, StoredValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_str(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(match self.values.get(key) {
            Some(StoredValue::Str(value)) => Some(value.clone()),
            _ => None,
        })
    }

    fn put_str(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.values
            .insert(key.to_string(), StoredValue::Str(value.to_string()));
        Ok(())
    }

    fn get_i64(&self, key: &str) -> StoreResult<Option<i64>> {
        Ok(match self.values.get(key) {
            Some(StoredValue::Int(value)) => Some(*value),
            _ => None,
        })
    }

    fn put_i64(&mut self, key: &str, value: i64) -> StoreResult<()> {
        self.values.insert(key.to_string(), StoredValue::Int(value));
        Ok(())
    }

    fn get_bool(&self, key: &str) -> StoreResult<Option<bool>> {
        Ok(match self.values.get(key) {
            Some(StoredValue::Bool(value)) => Some(*value),
            _ => None,
        })
    }

    fn put_bool(&mut self, key: &str, value: bool) -> StoreResult<()> {
        self.values.insert(key.to_string(), StoredValue::Bool(value));
        Ok(())
    }

    fn get_f32(&self, key: &str) -> StoreResult<Option<f32>> {
        Ok(match self.values.get(key) {
            Some(StoredValue::Float(value)) => Some(*value),
            _ => None,
        })
    }

    fn put_f32(&mut self, key: &str, value: f32) -> StoreResult<()> {
        self.values
            .insert(key.to_string(), StoredValue::Float(value));
        Ok(())
    }
}
