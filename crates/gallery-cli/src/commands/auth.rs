//! Authentication commands.

use super::AppContext;
use crate::output::{self, OutputFormat};
use anyhow::{bail, Result};
use gallery_auth::{AuthError, LoginCredential};
use std::io::{self, Write};

/// Login with a username (or email) and password.
pub async fn login(
    ctx: &AppContext,
    username: Option<String>,
    password: Option<String>,
    format: &OutputFormat,
) -> Result<()> {
    let username = match username {
        Some(username) => username,
        None => {
            print!("Username or email: ");
            io::stdout().flush()?;
            let mut input = String::new();
            io::stdin().read_line(&mut input)?;
            input.trim().to_string()
        }
    };
    if username.is_empty() {
        bail!("Username is required");
    }

    let password = match password {
        Some(password) => password,
        None => rpassword::prompt_password("Password: ")?,
    };
    if password.is_empty() {
        bail!("Password is required");
    }

    let credential = LoginCredential::password(username, password);
    match ctx.session.login(credential).await {
        Ok(identity) => {
            output::print_success(&format!("Logged in as {}", identity), format);
            Ok(())
        }
        Err(e) => bail!("Login failed: {}", login_failure_message(&e)),
    }
}

/// Login with a Google OAuth access token.
pub async fn login_google(ctx: &AppContext, access_token: String, format: &OutputFormat) -> Result<()> {
    match ctx.session.login(LoginCredential::oauth(access_token)).await {
        Ok(identity) => {
            output::print_success(&format!("Logged in as {}", identity), format);
            Ok(())
        }
        Err(e) => bail!("Google login failed: {}", login_failure_message(&e)),
    }
}

/// Logout and clear stored credentials. Never contacts the server.
pub async fn logout(ctx: &AppContext, format: &OutputFormat) -> Result<()> {
    ctx.session.logout()?;
    output::print_success("Logged out successfully", format);
    Ok(())
}

fn login_failure_message(error: &AuthError) -> String {
    match error {
        AuthError::InvalidCredentials(_) => "invalid username or password".to_string(),
        AuthError::UnconfirmedAccount(detail) | AuthError::RateLimited(detail) => detail.clone(),
        e if e.is_transient() => format!("server unreachable ({})", e),
        e => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_failure_messages() {
        assert_eq!(
            login_failure_message(&AuthError::InvalidCredentials("No active account".into())),
            "invalid username or password"
        );
        assert_eq!(
            login_failure_message(&AuthError::UnconfirmedAccount(
                "Please confirm your email before logging in.".into()
            )),
            "Please confirm your email before logging in."
        );
        assert!(login_failure_message(&AuthError::Timeout).starts_with("server unreachable"));
    }
}
