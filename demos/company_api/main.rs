//! Company API demo server
//!
//! ```text
//! cargo run --example company_api -- demos/company_api/config.yaml
//!
//! curl -i localhost:3000/api/companies
//! curl -i -H 'api-version: 2.0' localhost:3000/api/companies
//! curl -i -H 'If-None-Match: "<etag>"' localhost:3000/api/companies
//! ```

use company_api::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,company_api=debug,tower_http=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::from_yaml_file(&path)?,
        None => AppConfig::default(),
    };

    let store = InMemoryEntityStore::new();
    seed(&store, config.storage.deadline()).await?;

    let addr = config.server.address();
    println!("🚀 Company API on http://{}", addr);
    println!("   GET  /api/companies            (api-version: 1.0 | 2.0)");
    println!("   GET  /api/companies/{{id}}/employees?min_age=&max_age=&search=&page=&limit=");
    println!("   GET  /health");

    ServerBuilder::new()
        .with_config(config)
        .with_store(store)
        .serve(&addr)
        .await
}

/// A couple of companies so that the listings are not empty
async fn seed(store: &InMemoryEntityStore, deadline: std::time::Duration) -> Result<()> {
    let repos = RepositoryManager::new(std::sync::Arc::new(store.clone()), deadline);

    let it = Company::new("IT_Solutions Ltd", "583 Wall Dr. Gwynn Oak, MD 21207", Some("USA"));
    let admin = Company::new("Admin_Solutions Ltd", "312 Forest Avenue, BF 923", Some("USA"));
    repos.company().create(&it)?;
    repos.company().create(&admin)?;

    for employee in [
        Employee::new(it.id, "Sam Raiden", 26, "Software developer"),
        Employee::new(it.id, "Jana McLeaf", 30, "Software developer"),
        Employee::new(admin.id, "Kane Miller", 35, "Administrator"),
    ] {
        repos.employee().create(&employee)?;
    }

    let written = repos.save().await?;
    tracing::info!(written, "demo data seeded");
    Ok(())
}
