//! Account pages: pool configuration, login, logout, registration, verification.

use crate::portal::backend::{BackendRequest, PortalConfig};
use crate::portal::error::{IdentityError, PortalError};
use crate::portal::identity::{attribute, AuthOutcome, UserAttribute};
use crate::portal::session::{self, SessionContext};
use crate::portal::{Navigation, Notice, PageFailure, PageOutcome, PageResult, Portal};

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub username: String,
    pub code: String,
}

fn cached_config(ctx: &SessionContext) -> Option<PortalConfig> {
    Some(PortalConfig {
        user_pool_id: ctx.local.get(session::USER_POOL_ID)?,
        client_id: ctx.local.get(session::CLIENT_ID)?,
        region: ctx.local.get(session::REGION)?,
    })
}

/// Identity pool coordinates, fetched once and cached in local storage.
pub async fn load_config(portal: &Portal, ctx: &SessionContext) -> Result<PortalConfig, PortalError> {
    if let Some(config) = cached_config(ctx) {
        return Ok(config);
    }
    let config: PortalConfig = portal
        .backend
        .send(BackendRequest::get("/config"))
        .await?
        .ensure_ok()?
        .json()?;
    ctx.local.set(session::USER_POOL_ID, &config.user_pool_id);
    ctx.local.set(session::CLIENT_ID, &config.client_id);
    ctx.local.set(session::REGION, &config.region);
    let pool_data = serde_json::json!({
        "UserPoolId": config.user_pool_id,
        "ClientId": config.client_id,
    });
    ctx.local.set(session::POOL_DATA, &pool_data.to_string());
    tracing::debug!(region = %config.region, "portal config cached");
    Ok(config)
}

fn remember_user(ctx: &SessionContext, username: &str) {
    let user = serde_json::json!({ "username": username });
    ctx.session.set(session::COGNITO_USER, &user.to_string());
}

pub async fn login(portal: &Portal, ctx: &SessionContext, form: &Credentials) -> PageResult {
    let outcome = portal
        .identity
        .authenticate(&form.username, &form.password)
        .await?;
    let tokens = match outcome {
        AuthOutcome::Authenticated(tokens) => tokens,
        AuthOutcome::NewPasswordRequired { .. } => {
            return Ok(PageOutcome::to(Navigation::redirect("/new-password"))
                .with(Notice::info("Please set a new password.")));
        }
    };
    ctx.session.set(session::ACCESS_TOKEN, &tokens.access_token);
    ctx.session.set(session::USERNAME, &form.username);
    remember_user(ctx, &form.username);

    let attributes = portal.identity.user_attributes(&tokens.access_token).await?;
    for key in [session::EMAIL, session::SUB] {
        if let Some(value) = attribute(&attributes, key) {
            ctx.session.set(key, value);
        }
    }
    tracing::info!(username = %form.username, "logged in");
    let message = format!("Logged in as: {}", form.username);
    Ok(PageOutcome::stay().with(Notice::info(&message)))
}

pub async fn logout(portal: &Portal, ctx: &SessionContext) -> PageResult {
    match portal.backend.send(BackendRequest::get("/logout/")).await {
        Ok(response) if !response.is_ok() => {
            tracing::error!(status = response.status, "logout request failed");
            return Err(PageFailure::new(
                PortalError::Status {
                    status: response.status,
                },
                "Logout failed, please try again.",
                Navigation::Stay,
            ));
        }
        Ok(_) => {}
        // Unreachable server still ends the local session
        Err(e) => tracing::error!(error = %e, "logout request error"),
    }
    if let Ok(token) = ctx.access_token() {
        if let Err(e) = portal.identity.sign_out(&token).await {
            tracing::warn!(error = %e, "sign-out failed");
        }
    }
    ctx.clear_session();
    Ok(PageOutcome::to(Navigation::redirect("/")).with(Notice::success("Logout successful.")))
}

async fn sign_up(portal: &Portal, ctx: &SessionContext, form: &Registration) -> Result<(), IdentityError> {
    let attributes = [UserAttribute::new("email", &form.email)];
    portal
        .identity
        .sign_up(&form.username, &form.password, &attributes)
        .await?;
    remember_user(ctx, &form.username);
    Ok(())
}

/// Plain account sign-up.
pub async fn register(portal: &Portal, ctx: &SessionContext, form: &Registration) -> PageResult {
    sign_up(portal, ctx, form).await?;
    tracing::info!(username = %form.username, "registered");
    Ok(PageOutcome::stay())
}

/// Restaurant sign-up: create the identity, then the restaurant record.
pub async fn register_restaurant(
    portal: &Portal,
    ctx: &SessionContext,
    form: &Registration,
) -> PageResult {
    sign_up(portal, ctx, form).await?;
    let request = BackendRequest::post_form("/register-restaurant", &[("username", form.username.as_str())]);
    match portal.backend.send(request).await.and_then(|r| r.ensure_ok()) {
        Ok(_) => tracing::info!(username = %form.username, "restaurant registered"),
        Err(e) => tracing::error!(error = %e, "restaurant record not created"),
    }
    Ok(PageOutcome::to(Navigation::redirect("/verify")).with(Notice::success(
        "Registered successfully, please verify your account, and check your email.",
    )))
}

pub async fn verify(portal: &Portal, form: &Verification) -> PageResult {
    match portal
        .identity
        .confirm_registration(&form.username, &form.code)
        .await
    {
        Ok(()) => Ok(PageOutcome::to(Navigation::redirect("/"))
            .with(Notice::success("Verification successful."))),
        Err(e @ IdentityError::InvalidParameter(_)) => Err(PageFailure::new(
            e.into(),
            "Invalid verification code, please check your details and try again.",
            Navigation::redirect("/verify"),
        )),
        Err(e) => Err(PageFailure::new(
            e.into(),
            "Verification error, please check your details and try again.",
            Navigation::redirect("/verify"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::pages::fixtures::{harness, PASSWORD};
    use crate::portal::{Category, ErrorPresentation};

    fn creds(username: &str, password: &str) -> Credentials {
        Credentials {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn registration(username: &str) -> Registration {
        Registration {
            username: username.to_string(),
            password: PASSWORD.to_string(),
            email: format!("{}@example.com", username),
        }
    }

    #[tokio::test]
    async fn test_account_config_fetched_once() {
        let h = harness();
        h.backend.respond(
            "/config",
            200,
            r#"{"user_pool_id":"eu-west-2_abc","client_id":"cid","region":"eu-west-2"}"#,
        );
        let first = load_config(&h.portal, &h.ctx).await.unwrap();
        let second = load_config(&h.portal, &h.ctx).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(h.backend.requests_to("/config").len(), 1);
        assert_eq!(h.ctx.local.get(session::REGION).as_deref(), Some("eu-west-2"));
        let pool: serde_json::Value =
            serde_json::from_str(&h.ctx.local.get(session::POOL_DATA).unwrap()).unwrap();
        assert_eq!(pool["UserPoolId"], "eu-west-2_abc");
    }

    #[tokio::test]
    async fn test_account_config_server_error() {
        let h = harness();
        h.backend.respond("/config", 503, "");
        assert!(matches!(
            load_config(&h.portal, &h.ctx).await,
            Err(PortalError::Status { status: 503 })
        ));
        assert!(!h.ctx.local.contains(session::USER_POOL_ID));
    }

    #[tokio::test]
    async fn test_account_login_stores_session() {
        let h = harness();
        h.pool.add_user("cafe", PASSWORD, "cafe@example.com");
        let outcome = login(&h.portal, &h.ctx, &creds("cafe", PASSWORD)).await.unwrap();
        assert_eq!(outcome.navigation, Navigation::Stay);
        assert_eq!(outcome.notice.unwrap().message, "Logged in as: cafe");
        assert!(h.ctx.is_logged_in());
        assert_eq!(h.ctx.username().unwrap(), "cafe");
        assert_eq!(h.ctx.session.get(session::EMAIL).as_deref(), Some("cafe@example.com"));
        assert!(h.ctx.session.contains(session::SUB));
        assert!(h.ctx.session.contains(session::COGNITO_USER));
    }

    #[tokio::test]
    async fn test_account_login_failure_alerts() {
        let mut h = harness();
        h.pool.add_user("cafe", PASSWORD, "cafe@example.com");
        let result = login(&h.portal, &h.ctx, &creds("cafe", "wrong")).await;
        let presenter = h.portal.presenter(ErrorPresentation::Alert);
        let nav = presenter.settle(&mut h.ctx, result).await;
        assert_eq!(nav, Navigation::Stay);
        assert_eq!(h.ctx.alerts.len(), 1);
        assert!(h.ctx.alerts[0].contains("Incorrect username or password"));
        assert!(!h.ctx.is_logged_in());
    }

    #[tokio::test]
    async fn test_account_login_with_temporary_password() {
        let h = harness();
        h.pool.add_user_with_temporary_password("staff", "Temp0rary!", "s@example.com");
        let outcome = login(&h.portal, &h.ctx, &creds("staff", "Temp0rary!")).await.unwrap();
        assert_eq!(outcome.navigation, Navigation::redirect("/new-password"));
        assert!(!h.ctx.is_logged_in());
    }

    #[tokio::test]
    async fn test_account_logout_clears_session() {
        let h = harness();
        h.pool.add_user("cafe", PASSWORD, "cafe@example.com");
        login(&h.portal, &h.ctx, &creds("cafe", PASSWORD)).await.unwrap();
        h.ctx.local.set(session::REGION, "eu-west-2");

        let outcome = logout(&h.portal, &h.ctx).await.unwrap();
        assert_eq!(outcome.navigation, Navigation::redirect("/"));
        assert_eq!(outcome.notice.unwrap().message, "Logout successful.");
        assert!(!h.ctx.is_logged_in());
        assert_eq!(h.pool.active_tokens(), 0);
        assert!(h.ctx.local.contains(session::REGION));
    }

    #[tokio::test]
    async fn test_account_logout_rejected_keeps_session() {
        let h = harness();
        h.ctx.session.set(session::ACCESS_TOKEN, "tok");
        h.backend.respond("/logout/", 500, "");
        let failure = logout(&h.portal, &h.ctx).await.unwrap_err();
        assert!(matches!(failure.error, PortalError::Status { status: 500 }));
        assert!(h.ctx.is_logged_in());
    }

    #[tokio::test]
    async fn test_account_register_restaurant() {
        let h = harness();
        let outcome = register_restaurant(&h.portal, &h.ctx, &registration("cafe")).await.unwrap();
        assert_eq!(outcome.navigation, Navigation::redirect("/verify"));
        let notice = outcome.notice.unwrap();
        assert_eq!(notice.category, Category::Success);
        assert!(notice.message.starts_with("Registered successfully"));

        let posts = h.backend.requests_to("/register-restaurant");
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].field("username"), Some("cafe"));
        assert!(h.pool.confirmation_code("cafe").is_some());
    }

    #[tokio::test]
    async fn test_account_register_duplicate_skips_backend() {
        let mut h = harness();
        h.pool.add_user("cafe", PASSWORD, "cafe@example.com");
        let result = register_restaurant(&h.portal, &h.ctx, &registration("cafe")).await;
        assert!(result.as_ref().is_err_and(|f| f.error.is_identity()));
        assert!(h.backend.requests_to("/register-restaurant").is_empty());

        let presenter = h.portal.presenter(ErrorPresentation::Flash);
        assert_eq!(presenter.settle(&mut h.ctx, result).await, Navigation::Stay);
        assert_eq!(h.backend.requests_to("/flash").len(), 1);
    }

    #[tokio::test]
    async fn test_account_register_plain() {
        let h = harness();
        let outcome = register(&h.portal, &h.ctx, &registration("amy")).await.unwrap();
        assert_eq!(outcome, PageOutcome::stay());
        assert!(h.ctx.session.contains(session::COGNITO_USER));
    }

    #[tokio::test]
    async fn test_account_verify_paths() {
        let h = harness();
        register(&h.portal, &h.ctx, &registration("cafe")).await.unwrap();
        let code = h.pool.confirmation_code("cafe").unwrap();

        let empty = Verification { username: "cafe".into(), code: String::new() };
        let failure = verify(&h.portal, &empty).await.unwrap_err();
        assert!(failure.message.starts_with("Invalid verification code"));
        assert_eq!(failure.retreat, Navigation::redirect("/verify"));

        let wrong = Verification { username: "cafe".into(), code: "000000".into() };
        let failure = verify(&h.portal, &wrong).await.unwrap_err();
        assert!(failure.message.starts_with("Verification error"));

        let right = Verification { username: "cafe".into(), code };
        let outcome = verify(&h.portal, &right).await.unwrap();
        assert_eq!(outcome.navigation, Navigation::redirect("/"));
        assert_eq!(outcome.notice.unwrap().message, "Verification successful.");
    }
}
