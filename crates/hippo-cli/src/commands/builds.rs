//! Build commands.

use anyhow::{Result, bail};
use serde_json::{Value, json};

use super::{get_json, post_json, print_json};

#[allow(clippy::too_many_arguments)]
pub async fn new(
    api_url: &str,
    app: &str,
    git: Option<String>,
    archive: Option<String>,
    reference: Option<String>,
    commit: Option<String>,
    checksum: Option<String>,
) -> Result<()> {
    let source = match (git, archive) {
        (Some(url), None) => json!({
            "type": "git",
            "url": url,
            "reference": reference,
            "commit": commit,
        }),
        (None, Some(url)) => json!({
            "type": "archive",
            "url": url,
            "checksum": checksum,
        }),
        _ => bail!("exactly one of --git or --archive is required"),
    };

    let body = json!({ "app_id": app, "source": source });
    let build = post_json(&format!("{api_url}/builds/new/"), &body).await?;
    print_json(&build)
}

pub async fn show(api_url: &str, id: &str) -> Result<()> {
    let build = get_json(&format!("{api_url}/builds/{id}/")).await?;
    print_json(&build)
}

pub async fn list(api_url: &str, app: &str) -> Result<()> {
    let builds = get_json(&format!("{api_url}/builds/?app={app}")).await?;
    print_json(&builds)
}

pub async fn cancel(api_url: &str, id: &str) -> Result<()> {
    let body = json!({ "action": "cancel" });
    let build = post_json(&format!("{api_url}/builds/{id}/edit/"), &body).await?;
    print_json(&build)
}

pub async fn delete(api_url: &str, id: &str) -> Result<()> {
    let build = post_json(&format!("{api_url}/builds/{id}/delete/"), &json!({})).await?;
    print_json(&build)
}

pub async fn logs(api_url: &str, id: &str, offset: u64, limit: u64) -> Result<()> {
    let detail = get_json(&format!(
        "{api_url}/builds/{id}/?log_offset={offset}&log_limit={limit}"
    ))
    .await?;

    let Some(entries) = detail.get("log").and_then(Value::as_array) else {
        bail!("malformed response: missing log");
    };
    for entry in entries {
        let step = entry.get("step").and_then(Value::as_str).unwrap_or("?");
        let line = entry.get("line").and_then(Value::as_str).unwrap_or("");
        println!("[{step}] {line}");
    }
    Ok(())
}
