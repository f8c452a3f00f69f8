use crate::connection::{normalize_reference, Connection};
use crate::{Error, Result};
use fauna_core::{Envelope, Payload};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Resource cache bound to one connection for the span of a context
///
/// Every call goes to the server; responses are cohered into the memo table
/// so inline `references` stay available for cross-referenced lookups.
#[derive(Debug)]
pub struct CachingContext {
    cache: HashMap<String, Payload>,
    connection: Connection,
}

impl CachingContext {
    pub fn new(connection: Connection) -> Self {
        Self {
            cache: HashMap::new(),
            connection,
        }
    }

    pub fn get(&mut self, reference: &str) -> Result<Payload> {
        let response = self.connection.get::<&str>(reference, &[])?;
        self.cohere(response)
    }

    pub fn post<T: Serialize + ?Sized>(&mut self, reference: &str, data: &T) -> Result<Payload> {
        let response = self.connection.post(reference, data)?;
        self.cohere(response)
    }

    pub fn put<T: Serialize + ?Sized>(&mut self, reference: &str, data: &T) -> Result<Payload> {
        let response = self.connection.put(reference, data)?;
        self.cohere(response)
    }

    pub fn patch<T: Serialize + ?Sized>(&mut self, reference: &str, data: &T) -> Result<Payload> {
        let response = self.connection.patch(reference, data)?;
        self.cohere(response)
    }

    pub fn delete(&mut self, reference: &str, data: Option<&Value>) -> Result<()> {
        self.connection.delete(reference, data)?;
        self.cache.remove(normalize_reference(reference));
        Ok(())
    }

    /// Last payload seen for `reference` in this context.
    pub fn cached(&self, reference: &str) -> Option<&Payload> {
        self.cache.get(normalize_reference(reference))
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Merge a response envelope into the memo table and return its primary resource.
    ///
    /// The envelope is fully decoded before the table is touched. Inline
    /// references are merged first so the primary resource always wins.
    fn cohere(&mut self, response: Value) -> Result<Payload> {
        let envelope: Envelope = serde_json::from_value(response)
            .map_err(|e| Error::InvalidResponse(format!("malformed resource envelope: {}", e)))?;
        let reference = envelope
            .reference()
            .ok_or_else(|| Error::InvalidResponse("resource has no ref".to_string()))?
            .to_string();

        let Envelope {
            resource,
            references,
        } = envelope;

        if let Some(references) = references {
            tracing::debug!(reference = %reference, count = references.len(), "Cohering references");
            self.cache.extend(references);
        }
        self.cache.insert(reference, resource.clone());

        Ok(resource)
    }
}
