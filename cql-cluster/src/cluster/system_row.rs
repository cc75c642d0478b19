use fxhash::FxHashMap;
use std::net::IpAddr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A decoded column value of a system table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SystemValue {
    Null,
    Text(String),
    Inet(IpAddr),
    Uuid(Uuid),
    Int(i32),
    TextSet(Vec<String>),
}

impl From<&str> for SystemValue {
    fn from(value: &str) -> Self {
        SystemValue::Text(value.to_string())
    }
}

impl From<String> for SystemValue {
    fn from(value: String) -> Self {
        SystemValue::Text(value)
    }
}

impl From<IpAddr> for SystemValue {
    fn from(value: IpAddr) -> Self {
        SystemValue::Inet(value)
    }
}

impl From<Uuid> for SystemValue {
    fn from(value: Uuid) -> Self {
        SystemValue::Uuid(value)
    }
}

impl From<i32> for SystemValue {
    fn from(value: i32) -> Self {
        SystemValue::Int(value)
    }
}

impl From<Vec<String>> for SystemValue {
    fn from(value: Vec<String>) -> Self {
        SystemValue::TextSet(value)
    }
}

/// Single row of a system table, keyed by column name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SystemRow {
    columns: FxHashMap<String, SystemValue>,
}

impl<K: Into<String>, V: Into<SystemValue>> FromIterator<(K, V)> for SystemRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        SystemRow {
            columns: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

impl SystemRow {
    #[inline]
    pub fn contains_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Checks if a column is absent, null or holds an empty value.
    pub fn is_empty_by_name(&self, name: &str) -> bool {
        match self.columns.get(name) {
            None | Some(SystemValue::Null) => true,
            Some(SystemValue::Text(value)) => value.is_empty(),
            Some(SystemValue::TextSet(value)) => value.is_empty(),
            Some(SystemValue::Uuid(value)) => value.is_nil(),
            Some(_) => false,
        }
    }

    pub fn text(&self, name: &str) -> Result<Option<&str>> {
        match self.columns.get(name) {
            None | Some(SystemValue::Null) => Ok(None),
            Some(SystemValue::Text(value)) => Ok(Some(value)),
            Some(value) => Err(Self::type_error(name, "text", value)),
        }
    }

    pub fn inet(&self, name: &str) -> Result<Option<IpAddr>> {
        match self.columns.get(name) {
            None | Some(SystemValue::Null) => Ok(None),
            Some(SystemValue::Inet(value)) => Ok(Some(*value)),
            Some(value) => Err(Self::type_error(name, "inet", value)),
        }
    }

    pub fn uuid(&self, name: &str) -> Result<Option<Uuid>> {
        match self.columns.get(name) {
            None | Some(SystemValue::Null) => Ok(None),
            Some(SystemValue::Uuid(value)) => Ok(Some(*value)),
            Some(value) => Err(Self::type_error(name, "uuid", value)),
        }
    }

    pub fn int(&self, name: &str) -> Result<Option<i32>> {
        match self.columns.get(name) {
            None | Some(SystemValue::Null) => Ok(None),
            Some(SystemValue::Int(value)) => Ok(Some(*value)),
            Some(value) => Err(Self::type_error(name, "int", value)),
        }
    }

    pub fn text_set(&self, name: &str) -> Result<&[String]> {
        match self.columns.get(name) {
            None | Some(SystemValue::Null) => Ok(&[]),
            Some(SystemValue::TextSet(value)) => Ok(value),
            Some(value) => Err(Self::type_error(name, "set<text>", value)),
        }
    }

    fn type_error(name: &str, expected: &str, value: &SystemValue) -> Error {
        Error::General(format!(
            "Column '{name}' has unexpected type - expected {expected}, got {value:?}"
        ))
    }
}
