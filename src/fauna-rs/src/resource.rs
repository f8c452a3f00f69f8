//! Resource model
//!
//! A [`Resource`] is a field map with typed accessors for the fields every
//! resource carries (`ref`, `ts`, `class`, `deleted`) and open access to the
//! rest. Persistence goes through the current [`Client`] context.

use crate::client::Client;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use fauna_core::models::{
    time_from_usecs, usecs_from_time, CLASS_FIELD, CONSTRAINTS_FIELD, DATA_FIELD, DELETED_FIELD,
    REFERENCES_FIELD, REF_FIELD, TS_FIELD,
};
use fauna_core::Payload;
use serde_json::Value;

/// Fields callers may not assign directly
const UNASSIGNABLE_FIELDS: [&str; 3] = [TS_FIELD, DELETED_FIELD, CLASS_FIELD];

#[derive(Debug, Clone)]
pub struct Resource {
    fields: Payload,
    frozen: bool,
}

impl Resource {
    /// A new, unsaved resource of `class`.
    pub fn new(class: impl Into<String>) -> Self {
        let mut fields = Payload::new();
        fields.insert(REF_FIELD.to_string(), Value::Null);
        fields.insert(TS_FIELD.to_string(), Value::Null);
        fields.insert(DELETED_FIELD.to_string(), Value::Bool(false));
        fields.insert(CLASS_FIELD.to_string(), Value::String(class.into()));
        Self {
            fields,
            frozen: false,
        }
    }

    /// A new, unsaved resource with `fields` assigned.
    pub fn with_fields(class: impl Into<String>, fields: Payload) -> Self {
        let mut resource = Self::new(class);
        resource.assign(fields);
        resource
    }

    /// Wrap a payload returned by the server.
    pub fn from_payload(fields: Payload) -> Self {
        Self {
            fields,
            frozen: false,
        }
    }

    pub fn find(reference: &str) -> Result<Self> {
        Ok(Self::from_payload(Client::get(reference)?))
    }

    /// Look up an instance of `class` through a unique constraint.
    pub fn find_by_constraint(class: &str, path: &str, term: &str) -> Result<Self> {
        let reference = format!(
            "{}/constraints/{}/{}",
            class,
            urlencoding::encode(path),
            urlencoding::encode(term)
        );
        Self::find(&reference)
    }

    pub fn create(class: impl Into<String>, fields: Payload) -> Result<Self> {
        let mut resource = Self::with_fields(class, fields);
        resource.save()?;
        Ok(resource)
    }

    pub fn reference(&self) -> Option<&str> {
        self.fields.get(REF_FIELD).and_then(Value::as_str)
    }

    pub fn class(&self) -> Option<&str> {
        self.fields.get(CLASS_FIELD).and_then(Value::as_str)
    }

    pub fn ts(&self) -> Option<DateTime<Utc>> {
        self.fields
            .get(TS_FIELD)
            .and_then(Value::as_i64)
            .and_then(time_from_usecs)
    }

    pub fn set_ts(&mut self, time: DateTime<Utc>) -> Result<()> {
        self.ensure_mutable()?;
        self.fields
            .insert(TS_FIELD.to_string(), Value::from(usecs_from_time(time)));
        Ok(())
    }

    pub fn deleted(&self) -> bool {
        self.fields
            .get(DELETED_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn data(&self) -> Option<&Payload> {
        self.fields.get(DATA_FIELD).and_then(Value::as_object)
    }

    pub fn constraints(&self) -> Option<&Payload> {
        self.fields.get(CONSTRAINTS_FIELD).and_then(Value::as_object)
    }

    pub fn references(&self) -> Option<&Payload> {
        self.fields.get(REFERENCES_FIELD).and_then(Value::as_object)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        self.ensure_mutable()?;
        self.fields.insert(field.into(), value.into());
        Ok(())
    }

    pub fn fields(&self) -> &Payload {
        &self.fields
    }

    pub fn into_payload(self) -> Payload {
        self.fields
    }

    pub fn is_new_record(&self) -> bool {
        self.reference().is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted()
    }

    pub fn is_persisted(&self) -> bool {
        !(self.is_new_record() || self.is_deleted())
    }

    /// POST to the class when new, PUT to the ref otherwise.
    pub fn save(&mut self) -> Result<()> {
        self.ensure_mutable()?;
        let saved = match self.reference() {
            Some(reference) => Client::put(reference, &self.fields)?,
            None => {
                let class = self
                    .class()
                    .ok_or_else(|| Error::InvalidResource("neither ref nor class is set".to_string()))?;
                Client::post(class, &self.fields)?
            }
        };
        self.fields = saved;
        Ok(())
    }

    pub fn update(&mut self, fields: Payload) -> Result<()> {
        self.ensure_mutable()?;
        self.assign(fields);
        self.save()
    }

    /// Delete remotely when persisted, then mark deleted and freeze.
    pub fn delete(&mut self) -> Result<()> {
        if self.is_persisted() {
            if let Some(reference) = self.reference() {
                Client::delete(reference, None)?;
            }
        }
        self.fields
            .insert(DELETED_FIELD.to_string(), Value::Bool(true));
        self.frozen = true;
        Ok(())
    }

    fn assign(&mut self, fields: Payload) {
        for (name, value) in fields {
            if !UNASSIGNABLE_FIELDS.contains(&name.as_str()) {
                self.fields.insert(name, value);
            }
        }
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.frozen {
            return Err(Error::Frozen(
                self.reference().unwrap_or("(unsaved)").to_string(),
            ));
        }
        Ok(())
    }
}

/// Same class and same, non-null ref
impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.class() == other.class()
            && self.reference().is_some()
            && self.reference() == other.reference()
    }
}
