//! Raw API access through the authenticated transport.

use super::AppContext;
use crate::output::{self, OutputFormat};
use anyhow::{bail, Result};
use serde_json::Value;

/// GET `path` with the stored session and print the JSON response.
pub async fn get(ctx: &AppContext, path: &str, format: &OutputFormat) -> Result<()> {
    ctx.session.restore_session().await?;
    let transport = ctx.transport()?;

    match transport.get_json::<Value>(path).await {
        Ok(body) => {
            match format {
                OutputFormat::Text => println!("{}", serde_json::to_string_pretty(&body)?),
                OutputFormat::Json => output::print_json(&body),
            }
            Ok(())
        }
        Err(e) if e.requires_login() => {
            bail!("Not logged in or session expired. Run 'gallery login' first")
        }
        Err(e) => Err(e.into()),
    }
}
