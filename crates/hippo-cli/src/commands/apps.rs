//! Application commands.

use anyhow::Result;
use serde_json::json;

use super::{get_json, post_json, print_json};

pub async fn create(api_url: &str, name: &str, hostname: Option<String>) -> Result<()> {
    let body = json!({ "name": name, "hostname": hostname });
    let app = post_json(&format!("{api_url}/apps/new/"), &body).await?;
    print_json(&app)
}

pub async fn list(api_url: &str) -> Result<()> {
    let apps = get_json(&format!("{api_url}/apps/")).await?;
    print_json(&apps)
}

pub async fn show(api_url: &str, id: &str) -> Result<()> {
    let app = get_json(&format!("{api_url}/apps/{id}/")).await?;
    print_json(&app)
}
