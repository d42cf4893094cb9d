//! Session status and keep-alive commands.

use super::AppContext;
use crate::output::{self, OutputFormat};
use anyhow::{bail, Result};
use gallery_auth::{SessionEvent, SessionSnapshot};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

/// Restore the stored session and report it.
pub async fn status(ctx: &AppContext, format: &OutputFormat) -> Result<()> {
    ctx.session.restore_session().await?;
    print_snapshot(&ctx.session.snapshot(), format);
    Ok(())
}

/// Keep the session alive, printing events until Ctrl-C or expiry.
pub async fn watch(ctx: &AppContext, format: &OutputFormat) -> Result<()> {
    let mut events = ctx.session.subscribe();

    if !ctx.session.restore_session().await? {
        bail!("Not logged in. Run 'gallery login' first");
    }
    print_snapshot(&ctx.session.snapshot(), format);
    info!("Watching session");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted, stopping watch");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Expired) => {
                    print_event(&SessionEvent::Expired, format);
                    bail!("Session expired. Run 'gallery login' to sign in again");
                }
                Ok(event) => {
                    print_event(&event, format);
                    if let SessionEvent::StateChanged { to, .. } = event {
                        if to.is_authenticated() {
                            debug!(expires_at = ?ctx.session.snapshot().access_expires_at, "Session kept alive");
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Session event receiver lagged");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

fn print_snapshot(snapshot: &SessionSnapshot, format: &OutputFormat) {
    match format {
        OutputFormat::Text => {
            if snapshot.authenticated {
                output::print_row("Auth", "logged in");
                output::print_row("User", snapshot.username.as_deref().unwrap_or("unknown"));
                let expires = snapshot
                    .access_expires_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_else(|| "unknown".to_string());
                output::print_row("Token expires", &expires);
            } else {
                output::print_row("Auth", "not logged in");
            }
            output::print_row("State", snapshot.state.as_str());
        }
        OutputFormat::Json => output::print_json(snapshot),
    }
}

fn print_event(event: &SessionEvent, format: &OutputFormat) {
    match format {
        OutputFormat::Text => match event {
            SessionEvent::StateChanged { from, to } => {
                println!("[{}] {} -> {}", chrono::Local::now().format("%H:%M:%S"), from, to)
            }
            SessionEvent::Expired => {
                println!("[{}] session expired", chrono::Local::now().format("%H:%M:%S"))
            }
        },
        OutputFormat::Json => output::print_json(event),
    }
}
