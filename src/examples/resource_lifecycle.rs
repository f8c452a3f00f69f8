//! Resource Lifecycle Example
//!
//! Creates, updates, looks up and deletes an instance through the
//! `Resource` model.
//!
//! Run with: FAUNA_TOKEN=... cargo run --example resource_lifecycle

use fauna_rs::{Client, Config, Connection, Error, Resource};
use serde_json::json;

fn main() -> anyhow::Result<()> {
    let connection = Connection::new(&Config::from_env())?;

    Client::context(connection, || -> anyhow::Result<()> {
        let fields = json!({"data": {"name": "Babe", "visited": false}});
        let mut pig = Resource::create("classes/pigs", fields.as_object().cloned().unwrap_or_default())?;
        println!("📝 Created {} at {:?}", pig.reference().unwrap_or("?"), pig.ts());

        let changes = json!({"data": {"name": "Babe", "visited": true}});
        pig.update(changes.as_object().cloned().unwrap_or_default())?;
        println!("✏️  Updated: {:?}", pig.data());

        let reference = pig.reference().unwrap_or_default().to_string();
        let found = Resource::find(&reference)?;
        println!("🔍 Found same resource: {}", found == pig);

        pig.delete()?;
        match Resource::find(&reference) {
            Err(Error::NotFound(body)) => println!("🗑️  Deleted ({})", body),
            other => println!("Unexpected lookup result: {:?}", other.map(|r| r.into_payload())),
        }
        Ok(())
    })
}
