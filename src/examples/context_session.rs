//! Context Session Example
//!
//! Shows the caching context stack of fauna-rs:
//! - Building a connection from `FAUNA_*` environment variables
//! - Running requests inside `Client::context`
//! - Nesting a second context with different credentials
//!
//! Run with: FAUNA_TOKEN=... cargo run --example context_session

use fauna_rs::telemetry::{self, LogFormat};
use fauna_rs::{Client, Config, Connection};
use serde_json::json;

fn main() -> anyhow::Result<()> {
    telemetry::init_diagnostics(LogFormat::Text)?;

    let config = Config::from_env();
    let connection = Connection::new(&config)?;
    println!("Connected to {} as {:?}\n", config.origin(), connection.credentials());

    Client::context(connection.clone(), || -> anyhow::Result<()> {
        let email = format!("{}@example.com", uuid::Uuid::new_v4());
        let user = Client::post("users", &json!({"email": email, "password": "secret"}))?;
        let reference = user["ref"].as_str().unwrap_or_default().to_string();
        println!("Created user: {}", reference);

        let fetched = Client::get(&reference)?;
        println!("Fetched user: {:?}", fetched.get("email"));
        println!("Cached entries: {}", Client::with_current(|ctx| ctx.len())?);

        // A nested context has its own cache
        Client::context(connection.clone(), || {
            println!("Inner context depth: {}", Client::depth());
            println!("Inner cache has user: {}", Client::cached(&reference).map(|c| c.is_some()).unwrap_or(false));
        });

        Client::delete(&reference, None)?;
        println!("Deleted user: {}", reference);
        Ok(())
    })?;

    println!("\nContexts left open: {}", Client::depth());
    Ok(())
}
