use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use spdb_types::NodeKey;

use crate::error::{ExecError, ExecResult, FunctorError};
use crate::functor::QueryFunctor;

/// What a functor message runs against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", content = "key", rename_all = "snake_case")]
pub enum MessageTarget {
    /// One root document or observation.
    Node(NodeKey),
    Programs,
    NightlyRecords,
    Observations,
}

/// A functor request: a behavior tag and the data to build it from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctorMessage {
    pub tag: String,
    #[serde(default)]
    pub payload: Value,
}

impl FunctorMessage {
    pub fn new(tag: impl Into<String>, payload: Value) -> Self {
        Self {
            tag: tag.into(),
            payload,
        }
    }
}

/// The result of running a [`FunctorMessage`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctorReply {
    pub tag: String,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FunctorError>,
}

impl FunctorReply {
    pub fn from_functor<S: ?Sized, N>(tag: impl Into<String>, functor: &dyn RemoteFunctor<S, N>) -> Self {
        Self {
            tag: tag.into(),
            payload: functor.reply(),
            error: functor.error().cloned(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// A functor that can be built from a message and report its result as
/// data.
pub trait RemoteFunctor<S: ?Sized, N>: QueryFunctor<S, N> {
    fn reply(&self) -> Value;
}

/// Builds a functor from a message payload.
pub type FunctorFactory<S, N> =
    Arc<dyn Fn(&Value) -> anyhow::Result<Box<dyn RemoteFunctor<S, N>>> + Send + Sync>;

/// Functor behaviors known to this process, by tag.
pub struct FunctorRegistry<S: ?Sized, N> {
    factories: RwLock<HashMap<String, FunctorFactory<S, N>>>,
}

impl<S: ?Sized, N> Default for FunctorRegistry<S, N> {
    fn default() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }
}

impl<S: ?Sized, N> FunctorRegistry<S, N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. Returns `true` if it replaced one with the same
    /// tag.
    pub fn register<F>(&self, tag: impl Into<String>, factory: F) -> bool
    where
        F: Fn(&Value) -> anyhow::Result<Box<dyn RemoteFunctor<S, N>>> + Send + Sync + 'static,
    {
        let tag = tag.into();
        debug!(tag = %tag, "registered functor");
        self.factories
            .write()
            .expect("functor registry lock poisoned")
            .insert(tag, Arc::new(factory))
            .is_some()
    }

    pub fn unregister(&self, tag: &str) -> bool {
        self.factories
            .write()
            .expect("functor registry lock poisoned")
            .remove(tag)
            .is_some()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories
            .read()
            .expect("functor registry lock poisoned")
            .contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .factories
            .read()
            .expect("functor registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        tags.sort();
        tags
    }

    /// Build the functor a message names.
    pub fn build(&self, message: &FunctorMessage) -> ExecResult<Box<dyn RemoteFunctor<S, N>>> {
        let factory = self
            .factories
            .read()
            .expect("functor registry lock poisoned")
            .get(&message.tag)
            .cloned()
            .ok_or_else(|| ExecError::UnknownFunctor(message.tag.clone()))?;

        factory(&message.payload).map_err(|e| ExecError::BadPayload {
            tag: message.tag.clone(),
            message: format!("{e:#}"),
        })
    }
}

impl<S: ?Sized, N> fmt::Debug for FunctorRegistry<S, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctorRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecConfig;
    use crate::executor::Executor;
    use crate::functor::{Functor, Principals};

    struct Words;

    /// Counts nodes longer than a minimum length.
    struct CountLonger {
        min: usize,
        count: u64,
        error: Option<FunctorError>,
    }

    impl Functor<Words, String> for CountLonger {
        fn execute(&mut self, _: &Words, node: Option<&String>, _: &Principals) -> anyhow::Result<()> {
            if node.is_some_and(|w| w.len() > self.min) {
                self.count += 1;
            }
            Ok(())
        }
        fn set_error(&mut self, error: FunctorError) {
            self.error = Some(error);
        }
        fn error(&self) -> Option<&FunctorError> {
            self.error.as_ref()
        }
    }

    impl QueryFunctor<Words, String> for CountLonger {}

    impl RemoteFunctor<Words, String> for CountLonger {
        fn reply(&self) -> Value {
            Value::from(self.count)
        }
    }

    fn registry() -> FunctorRegistry<Words, String> {
        let registry = FunctorRegistry::new();
        registry.register("count-longer", |payload: &Value| {
            let min = payload
                .get("min")
                .and_then(Value::as_u64)
                .ok_or_else(|| anyhow::anyhow!("missing min"))? as usize;
            Ok(Box::new(CountLonger { min, count: 0, error: None }) as Box<dyn RemoteFunctor<Words, String>>)
        });
        registry
    }

    #[test]
    fn message_builds_and_runs_registered_functor() {
        let registry = registry();
        let message = FunctorMessage::new("count-longer", serde_json::json!({ "min": 3 }));
        let mut functor = registry.build(&message).unwrap();

        let words = ["sky", "galaxy", "nebula", "sun"].map(String::from);
        Executor::new(&ExecConfig::default())
            .unwrap()
            .query(&mut *functor, &Words, words, &Principals::new());

        let reply = FunctorReply::from_functor(&message.tag, &*functor);
        assert!(reply.is_ok());
        assert_eq!(reply.payload, Value::from(2));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = registry()
            .build(&FunctorMessage::new("nope", Value::Null))
            .err()
            .unwrap();
        assert!(matches!(err, ExecError::UnknownFunctor(tag) if tag == "nope"));
    }

    #[test]
    fn bad_payload_is_reported() {
        let err = registry()
            .build(&FunctorMessage::new("count-longer", Value::Null))
            .err()
            .unwrap();
        assert!(matches!(err, ExecError::BadPayload { .. }));
    }

    #[test]
    fn register_and_unregister() {
        let registry = registry();
        assert_eq!(registry.tags(), vec!["count-longer".to_string()]);
        assert!(registry.unregister("count-longer"));
        assert!(!registry.contains("count-longer"));
    }

    #[test]
    fn messages_travel_as_json() {
        let message: FunctorMessage = serde_json::from_str(r#"{"tag":"spdb.list-ids"}"#).unwrap();
        assert_eq!(message.payload, Value::Null);

        let reply = FunctorReply {
            tag: "t".into(),
            payload: Value::from(1),
            error: Some(FunctorError::Failed {
                stage: crate::error::Stage::Execute,
                message: "boom".into(),
            }),
        };
        let back: FunctorReply = serde_json::from_str(&serde_json::to_string(&reply).unwrap()).unwrap();
        assert_eq!(back, reply);

        let target = serde_json::to_value(MessageTarget::Programs).unwrap();
        assert_eq!(target, serde_json::json!({ "target": "programs" }));
    }
}
