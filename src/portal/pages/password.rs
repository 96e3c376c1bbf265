//! Password pages: first-login password change and forgotten password reset.

use crate::portal::error::{IdentityError, PortalError};
use crate::portal::identity::AuthOutcome;
use crate::portal::session::{self, SessionContext};
use crate::portal::{Category, Navigation, Notice, PageFailure, PageOutcome, PageResult, Portal};

/// Section of the forgot-password page holding the code and new password inputs.
pub const RESET_SECTION: &str = "resetPassword";
pub const CODE_ERROR: &str = "codeError";
pub const PASSWORD_ERROR: &str = "passwordError";

#[derive(Debug, Clone)]
pub struct PasswordChange {
    pub username: String,
    pub password: String,
    pub new_password: String,
}

#[derive(Debug, Clone)]
pub struct PasswordReset {
    pub code: String,
    pub new_password: String,
}

/// Replace a temporary password at first sign-in.
pub async fn new_password(portal: &Portal, form: &PasswordChange) -> PageResult {
    let failed = |e: IdentityError| {
        PageFailure::new(
            e.into(),
            "An error occurred setting your new password, please check your details are correct.",
            Navigation::redirect("/new-password"),
        )
    };
    let outcome = portal
        .identity
        .authenticate(&form.username, &form.password)
        .await
        .map_err(failed)?;
    match outcome {
        // Password already permanent
        AuthOutcome::Authenticated(_) => Ok(PageOutcome::stay()),
        AuthOutcome::NewPasswordRequired { session } => {
            portal
                .identity
                .complete_new_password(&form.username, &session, &form.new_password)
                .await
                .map_err(failed)?;
            tracing::info!(username = %form.username, "temporary password replaced");
            Ok(PageOutcome::to(Navigation::redirect("/"))
                .with(Notice::success("Password updated successfully, please login.")))
        }
    }
}

/// Send a reset code and reveal the code entry section.
pub async fn request_reset(portal: &Portal, ctx: &SessionContext, username: &str) -> PageResult {
    let delivery = portal.identity.forgot_password(username).await?;
    ctx.session.set(session::RESET_USERNAME, username);
    tracing::info!(username, destination = ?delivery.destination, "reset code sent");
    Ok(PageOutcome::to(Navigation::Reveal {
        section: RESET_SECTION.to_string(),
    }))
}

/// Set the new password with the emailed code.
pub async fn confirm_reset(portal: &Portal, ctx: &SessionContext, form: &PasswordReset) -> PageResult {
    let username = ctx
        .session
        .get(session::RESET_USERNAME)
        .ok_or(PortalError::Missing(session::RESET_USERNAME))?;
    match portal
        .identity
        .confirm_password(&username, &form.code, &form.new_password)
        .await
    {
        Ok(()) => {
            ctx.session.remove(session::RESET_USERNAME);
            Ok(PageOutcome::to(Navigation::redirect("/"))
                .with(Notice::success("New password has been set.")))
        }
        Err(e) => Err(reset_failure(e)),
    }
}

fn reset_failure(e: IdentityError) -> PageFailure {
    let (message, field) = match &e {
        IdentityError::CodeMismatch => ("The code provided is not valid.", CODE_ERROR),
        IdentityError::InvalidParameter(_) | IdentityError::InvalidPassword(_) => (
            "Password must have at least: 8 Characters, 1 number, 1 special character, 1 uppercase, and 1 lowercase",
            PASSWORD_ERROR,
        ),
        _ => ("Something went wrong! Please try again.", CODE_ERROR),
    };
    PageFailure::new(e.into(), message, Navigation::Stay)
        .in_field(field)
        .category(Category::Danger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::identity::IdentityProvider;
    use crate::portal::pages::fixtures::{harness, PASSWORD};
    use crate::portal::ErrorPresentation;

    #[tokio::test]
    async fn test_password_new_password_challenge() {
        let h = harness();
        h.pool.add_user_with_temporary_password("staff", "Temp0rary!", "s@example.com");
        let form = PasswordChange {
            username: "staff".into(),
            password: "Temp0rary!".into(),
            new_password: PASSWORD.into(),
        };
        let outcome = new_password(&h.portal, &form).await.unwrap();
        assert_eq!(outcome.navigation, Navigation::redirect("/"));
        assert!(matches!(
            h.pool.authenticate("staff", PASSWORD).await.unwrap(),
            AuthOutcome::Authenticated(_)
        ));
    }

    #[tokio::test]
    async fn test_password_new_password_weak_redirects_back() {
        let h = harness();
        h.pool.add_user_with_temporary_password("staff", "Temp0rary!", "s@example.com");
        let form = PasswordChange {
            username: "staff".into(),
            password: "Temp0rary!".into(),
            new_password: "weak".into(),
        };
        let failure = new_password(&h.portal, &form).await.unwrap_err();
        assert_eq!(failure.retreat, Navigation::redirect("/new-password"));
        assert!(failure.message.starts_with("An error occurred"));
    }

    #[tokio::test]
    async fn test_password_new_password_already_permanent() {
        let h = harness();
        h.pool.add_user("cafe", PASSWORD, "cafe@example.com");
        let form = PasswordChange {
            username: "cafe".into(),
            password: PASSWORD.into(),
            new_password: "N3wPassw0rd!".into(),
        };
        assert_eq!(new_password(&h.portal, &form).await.unwrap(), PageOutcome::stay());
    }

    #[tokio::test]
    async fn test_password_reset_flow() {
        let h = harness();
        h.pool.add_user("cafe", PASSWORD, "cafe@example.com");
        let outcome = request_reset(&h.portal, &h.ctx, "cafe").await.unwrap();
        assert_eq!(
            outcome.navigation,
            Navigation::Reveal { section: RESET_SECTION.to_string() }
        );

        let code = h.pool.reset_code("cafe").unwrap();
        let form = PasswordReset { code, new_password: "N3wPassw0rd!".into() };
        let outcome = confirm_reset(&h.portal, &h.ctx, &form).await.unwrap();
        assert_eq!(outcome.navigation, Navigation::redirect("/"));
        assert_eq!(outcome.notice.unwrap().message, "New password has been set.");
        assert!(!h.ctx.session.contains(session::RESET_USERNAME));
    }

    #[tokio::test]
    async fn test_password_reset_unknown_user_alerts() {
        let mut h = harness();
        let result = request_reset(&h.portal, &h.ctx, "ghost").await;
        let nav = h
            .portal
            .presenter(ErrorPresentation::Alert)
            .settle(&mut h.ctx, result)
            .await;
        assert_eq!(nav, Navigation::Stay);
        assert_eq!(h.ctx.alerts.len(), 1);
    }

    #[tokio::test]
    async fn test_password_reset_field_errors() {
        let mut h = harness();
        h.pool.add_user("cafe", PASSWORD, "cafe@example.com");
        request_reset(&h.portal, &h.ctx, "cafe").await.unwrap();
        let presenter = h.portal.presenter(ErrorPresentation::Alert);

        let wrong_code = PasswordReset { code: "nope".into(), new_password: "N3wPassw0rd!".into() };
        let result = confirm_reset(&h.portal, &h.ctx, &wrong_code).await;
        presenter.settle(&mut h.ctx, result).await;
        assert_eq!(h.ctx.field_errors[CODE_ERROR], "The code provided is not valid.");

        let code = h.pool.reset_code("cafe").unwrap();
        let weak = PasswordReset { code, new_password: "weak".into() };
        let result = confirm_reset(&h.portal, &h.ctx, &weak).await;
        presenter.settle(&mut h.ctx, result).await;
        assert!(h.ctx.field_errors[PASSWORD_ERROR].starts_with("Password must have at least"));
        assert!(h.ctx.alerts.is_empty());
    }

    #[tokio::test]
    async fn test_password_reset_without_request() {
        let h = harness();
        let form = PasswordReset { code: "1".into(), new_password: PASSWORD.into() };
        let failure = confirm_reset(&h.portal, &h.ctx, &form).await.unwrap_err();
        assert!(matches!(failure.error, PortalError::Missing(session::RESET_USERNAME)));
    }

    #[test]
    fn test_password_reset_failure_fallback() {
        let failure = reset_failure(IdentityError::Service("throttled".into()));
        assert_eq!(failure.field, Some(CODE_ERROR));
        assert_eq!(failure.message, "Something went wrong! Please try again.");
    }
}
