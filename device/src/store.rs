use std::{fs, io::ErrorKind, path::PathBuf};

use serde_json::{Map, Number, Value};

use aquanode_common::store::{KeyValueStore, StoreError, StoreResult};

pub const DATA_DIR_ENV: &str = "AQUANODE_DATA_DIR";
const DEFAULT_DATA_DIR: &str = "./.aquanode";

pub fn data_dir() -> PathBuf {
    std::env::var(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR))
}

/// Key-value persistence backed by one JSON object file per namespace,
/// standing where the device's non-volatile storage stands.
pub struct FileKvStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl FileKvStore {
    pub fn open(namespace: &str) -> StoreResult<Self> {
        Self::open_in(data_dir(), namespace)
    }

    pub fn open_in(dir: PathBuf, namespace: &str) -> StoreResult<Self> {
        let path = dir.join(format!("{namespace}.json"));
        let values = match fs::read(&path) {
            Ok(raw) => serde_json::from_slice::<Map<String, Value>>(&raw).map_err(backend)?,
            Err(err) if err.kind() == ErrorKind::NotFound => Map::new(),
            Err(err) => return Err(backend(err)),
        };

        Ok(Self { path, values })
    }

    fn persist(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(backend)?;
        }
        let payload = serde_json::to_vec_pretty(&self.values).map_err(backend)?;
        fs::write(&self.path, payload).map_err(backend)
    }
}

fn backend(err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl KeyValueStore for FileKvStore {
    fn get_str(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self
            .values
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn put_str(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.values
            .insert(key.to_string(), Value::String(value.to_string()));
        self.persist()
    }

    fn get_i64(&self, key: &str) -> StoreResult<Option<i64>> {
        Ok(self.values.get(key).and_then(Value::as_i64))
    }

    fn put_i64(&mut self, key: &str, value: i64) -> StoreResult<()> {
        self.values
            .insert(key.to_string(), Value::Number(Number::from(value)));
        self.persist()
    }

    fn get_bool(&self, key: &str) -> StoreResult<Option<bool>> {
        Ok(self.values.get(key).and_then(Value::as_bool))
    }

    fn put_bool(&mut self, key: &str, value: bool) -> StoreResult<()> {
        self.values.insert(key.to_string(), Value::Bool(value));
        self.persist()
    }

    fn get_f32(&self, key: &str) -> StoreResult<Option<f32>> {
        Ok(self
            .values
            .get(key)
            .and_then(Value::as_f64)
            .map(|value| value as f32))
    }

    fn put_f32(&mut self, key: &str, value: f32) -> StoreResult<()> {
        let number = Number::from_f64(f64::from(value))
            .ok_or_else(|| StoreError::Backend(format!("non-finite float for key `{key}`")))?;
        self.values.insert(key.to_string(), Value::Number(number));
        self.persist()
    }
}
