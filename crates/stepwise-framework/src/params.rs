//! Parameter bag carried between the steps of a flow.
//!
//! A [`Params`] is a JSON object. The step that registers a continuation
//! decides its shape and the next step reads it back by key; both sides agree
//! by convention, so reads are fallible and report which key was wrong.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stepwise_core::{Event, EventKind};

use crate::error::ParamError;

/// An explicit, serializable key-value bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, builder style.
    ///
    /// ```rust
    /// use stepwise_framework::Params;
    ///
    /// let params = Params::new().with("step", "phone").with("attempt", 2);
    /// assert_eq!(params.get_str("step"), Some("phone"));
    /// ```
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Serializes `value` and stores it under `key`, replacing any previous value.
    pub fn insert<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> Result<(), ParamError> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|source| ParamError::Invalid {
            key: key.clone(),
            source,
        })?;
        self.0.insert(key, value);
        Ok(())
    }

    /// Reads `key` as `T`. A missing key is `Ok(None)`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ParamError> {
        self.0
            .get(key)
            .map(|value| {
                T::deserialize(value).map_err(|source| ParamError::Invalid {
                    key: key.to_owned(),
                    source,
                })
            })
            .transpose()
    }

    /// Reads `key` as `T`, failing if it is missing.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T, ParamError> {
        self.get(key)?
            .ok_or_else(|| ParamError::Missing(key.to_owned()))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builds the parameters a stateless route receives for `event`.
    ///
    /// Interactions carry their parsed button arguments, commands carry their
    /// argument string under `"args"`, plain messages carry nothing.
    pub fn from_event(event: &dyn Event) -> Self {
        match event.kind() {
            EventKind::Interaction => event
                .interaction()
                .map(|data| {
                    data.args
                        .into_iter()
                        .fold(Self::new(), |params, (k, v)| params.with(k, v))
                })
                .unwrap_or_default(),
            EventKind::Command => event
                .command()
                .map(|cmd| Self::new().with("args", cmd.args))
                .unwrap_or_default(),
            EventKind::Message => Self::new(),
        }
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::Update;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Draft {
        name: String,
        age: u8,
    }

    #[test]
    fn test_typed_access() {
        let mut params = Params::new();
        params
            .insert(
                "draft",
                Draft {
                    name: "Alice".into(),
                    age: 30,
                },
            )
            .unwrap();

        let draft: Draft = params.require("draft").unwrap();
        assert_eq!(draft.name, "Alice");
        assert_eq!(params.get::<Draft>("other").unwrap(), None);
    }

    #[test]
    fn test_missing_and_invalid_name_the_key() {
        let params = Params::new().with("age", "thirty");

        let err = params.require::<u8>("age").unwrap_err();
        assert!(matches!(err, ParamError::Invalid { ref key, .. } if key == "age"));

        let err = params.require::<String>("name").unwrap_err();
        assert!(matches!(err, ParamError::Missing(ref key) if key == "name"));
    }

    #[test]
    fn test_from_event() {
        let press = Update::interaction(1, 1, 1, 5, "item?id=42&page=2");
        let params = Params::from_event(&press);
        assert_eq!(params.get_str("id"), Some("42"));
        assert_eq!(params.len(), 2);

        let cmd = Update::message(2, 1, 1, "/order 3 apples");
        assert_eq!(Params::from_event(&cmd).get_str("args"), Some("3 apples"));

        let plain = Update::message(3, 1, 1, "hello");
        assert!(Params::from_event(&plain).is_empty());
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let params = Params::new().with("step", "name");
        assert_eq!(serde_json::to_string(&params).unwrap(), r#"{"step":"name"}"#);
    }
}
