//! Functors every database can build from a message.

use std::marker::PhantomData;

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;

use spdb_exec::{Functor, FunctorError, Principals, QueryFunctor, RemoteFunctor};
use spdb_types::RootDocument;

use crate::database::LocalDatabase;
use crate::node::Node;

/// Tag of [`ListIds`].
pub const LIST_IDS_TAG: &str = "spdb.list-ids";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ListIdsPayload {
    limit: Option<usize>,
}

/// Collects the program ids of the root documents it visits. Documents
/// without an id are skipped.
///
/// Payload: `null` or `{ "limit": n }`. Reply: a JSON array of ids.
pub struct ListIds<D> {
    limit: Option<usize>,
    ids: Vec<String>,
    error: Option<FunctorError>,
    _doc: PhantomData<fn() -> D>,
}

impl<D> ListIds<D> {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            ids: Vec::new(),
            error: None,
            _doc: PhantomData,
        }
    }

    pub fn from_payload(payload: &Value) -> anyhow::Result<Self> {
        let payload = if payload.is_null() {
            ListIdsPayload::default()
        } else {
            ListIdsPayload::deserialize(payload).context("invalid list-ids payload")?
        };
        Ok(Self::new(payload.limit))
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

impl<D: RootDocument> Functor<LocalDatabase<D>, Node<D>> for ListIds<D> {
    fn execute(&mut self, _db: &LocalDatabase<D>, node: Option<&Node<D>>, _: &Principals) -> anyhow::Result<()> {
        let node = node.context("list-ids needs a node")?;
        if let Some(id) = node.root_document().program_id() {
            self.ids.push(id.to_string());
        }
        Ok(())
    }

    fn set_error(&mut self, error: FunctorError) {
        self.error = Some(error);
    }

    fn error(&self) -> Option<&FunctorError> {
        self.error.as_ref()
    }

    fn name(&self) -> &str {
        LIST_IDS_TAG
    }
}

impl<D: RootDocument> QueryFunctor<LocalDatabase<D>, Node<D>> for ListIds<D> {
    fn is_done(&self) -> bool {
        self.limit.is_some_and(|limit| self.ids.len() >= limit)
    }
}

impl<D: RootDocument> RemoteFunctor<LocalDatabase<D>, Node<D>> for ListIds<D> {
    fn reply(&self) -> Value {
        Value::from(self.ids.clone())
    }
}
