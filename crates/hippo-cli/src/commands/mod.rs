//! CLI commands.

pub mod apps;
pub mod builds;

use anyhow::{Context, Result, bail};
use serde_json::Value;

pub(crate) async fn get_json(url: &str) -> Result<Value> {
    let response = reqwest::get(url).await.context("request failed")?;
    parse(response).await
}

pub(crate) async fn post_json(url: &str, body: &Value) -> Result<Value> {
    let client = reqwest::Client::new();
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .context("request failed")?;
    parse(response).await
}

async fn parse(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("{status}: {message}");
    }
    Ok(body)
}

pub(crate) fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
