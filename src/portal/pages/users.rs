//! Staff user pages: create, remove, edit role.

use crate::portal::backend::BackendRequest;
use crate::portal::error::PortalError;
use crate::portal::session::SessionContext;
use crate::portal::{Navigation, Notice, PageFailure, PageOutcome, PageResult, Portal};
use regex::Regex;
use reqwest::Url;
use std::sync::OnceLock;

const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,4}$";

static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();

pub fn is_valid_email(email: &str) -> bool {
    EMAIL
        .get_or_init(|| Regex::new(EMAIL_PATTERN).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(email))
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub role: String,
}

fn validate(form: &NewUser) -> Result<(), PortalError> {
    if form.role.trim().is_empty() {
        return Err(PortalError::Invalid("Please select a job role.".to_string()));
    }
    if !is_valid_email(&form.email) {
        return Err(PortalError::Invalid(
            "Email field must be a valid email address.".to_string(),
        ));
    }
    Ok(())
}

/// Create a staff account under the signed-in restaurant.
pub async fn create_user(portal: &Portal, ctx: &SessionContext, form: &NewUser) -> PageResult {
    validate(form)?;
    let restaurant = ctx.username()?;
    let token = ctx.access_token()?;
    let request = BackendRequest::post_form(
        "/register-user",
        &[
            ("username", form.username.as_str()),
            ("email", form.email.as_str()),
            ("role", form.role.as_str()),
            ("restaurant_id", restaurant.as_str()),
            ("accessToken", token.as_str()),
        ],
    );
    portal
        .backend
        .send(request)
        .await
        .and_then(|r| r.ensure_ok())
        .map_err(|e| {
            PageFailure::new(
                e,
                "User was not created, please ensure that the entered values are correct.",
                Navigation::Stay,
            )
        })?;
    tracing::info!(username = %form.username, role = %form.role, "user created");
    Ok(PageOutcome::to(Navigation::redirect("/users")).with(Notice::success("User created successfully.")))
}

pub async fn remove_user(portal: &Portal, ctx: &SessionContext, username: &str) -> PageResult {
    let token = ctx.access_token()?;
    let request = BackendRequest::delete_form(
        "/remove-user",
        &[("usernameToDelete", username), ("accessToken", token.as_str())],
    );
    portal
        .backend
        .send(request)
        .await
        .and_then(|r| r.ensure_ok())
        .map_err(|e| {
            PageFailure::new(
                e,
                "User was not removed correctly, please try again later.",
                Navigation::Stay,
            )
        })?;
    tracing::info!(username, "user removed");
    Ok(PageOutcome::to(Navigation::redirect("/users")).with(Notice::success("User removed successfully.")))
}

/// Navigation to the edit page, carrying the user's current values.
pub fn edit_user_location(username: &str, email: &str, role: &str) -> Result<Navigation, PortalError> {
    let mut url = Url::parse("http://portal.local/edit-user").map_err(|e| PortalError::Url(e.to_string()))?;
    url.query_pairs_mut()
        .append_pair("username", username)
        .append_pair("email", email)
        .append_pair("jobRole", role);
    let query = url.query().unwrap_or_default();
    Ok(Navigation::Redirect(format!("{}?{}", url.path(), query)))
}

pub async fn update_role(portal: &Portal, ctx: &SessionContext, username: &str, new_role: &str) -> PageResult {
    let token = ctx.access_token()?;
    let request = BackendRequest::post_form(
        "/edit-user",
        &[
            ("username", username),
            ("newRole", new_role),
            ("accessToken", token.as_str()),
        ],
    );
    portal
        .backend
        .send(request)
        .await
        .and_then(|r| r.ensure_ok())
        .map_err(|e| PageFailure::new(e, "User was not updated.", Navigation::Stay))?;
    tracing::info!(username, new_role, "user role updated");
    Ok(PageOutcome::to(Navigation::redirect("/users")).with(Notice::success("User updated successfully.")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::backend::Method;
    use crate::portal::pages::fixtures::{harness, signed_in};
    use crate::portal::ErrorPresentation;
    use proptest::prelude::*;

    fn new_user(email: &str, role: &str) -> NewUser {
        NewUser {
            username: "amy".into(),
            email: email.into(),
            role: role.into(),
        }
    }

    #[test]
    fn test_users_email_validation() {
        assert!(is_valid_email("amy.b@ff-smart.co.uk"));
        assert!(is_valid_email("x_y@z.io"));
        assert!(!is_valid_email("amy@"));
        assert!(!is_valid_email("amy@example.technology"));
        assert!(!is_valid_email("amy+tag@example.com"));
        assert!(!is_valid_email(""));
    }

    #[tokio::test]
    async fn test_users_create_posts_form() {
        let h = signed_in();
        let outcome = create_user(&h.portal, &h.ctx, &new_user("amy@example.com", "chef"))
            .await
            .unwrap();
        assert_eq!(outcome.navigation, Navigation::redirect("/users"));

        let posts = h.backend.requests_to("/register-user");
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].field("restaurant_id"), Some("cafe"));
        assert_eq!(posts[0].field("accessToken"), Some("tok-1"));
        assert_eq!(posts[0].field("role"), Some("chef"));
    }

    #[tokio::test]
    async fn test_users_create_validation_before_request() {
        let mut h = signed_in();
        let presenter = h.portal.presenter(ErrorPresentation::Alert);

        let result = create_user(&h.portal, &h.ctx, &new_user("amy@example.com", "")).await;
        presenter.settle(&mut h.ctx, result).await;
        let result = create_user(&h.portal, &h.ctx, &new_user("not-an-email", "chef")).await;
        presenter.settle(&mut h.ctx, result).await;

        assert_eq!(
            h.ctx.alerts,
            vec![
                "Please select a job role.".to_string(),
                "Email field must be a valid email address.".to_string(),
            ]
        );
        assert!(h.backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_users_create_rejected() {
        let h = signed_in();
        h.backend.respond("/register-user", 400, "");
        let failure = create_user(&h.portal, &h.ctx, &new_user("amy@example.com", "chef"))
            .await
            .unwrap_err();
        assert!(failure.message.starts_with("User was not created"));
        assert_eq!(failure.retreat, Navigation::Stay);
    }

    #[tokio::test]
    async fn test_users_create_requires_login() {
        let h = harness();
        let failure = create_user(&h.portal, &h.ctx, &new_user("amy@example.com", "chef"))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, PortalError::Missing(_)));
    }

    #[tokio::test]
    async fn test_users_remove() {
        let h = signed_in();
        let outcome = remove_user(&h.portal, &h.ctx, "amy").await.unwrap();
        assert_eq!(outcome.notice.unwrap().message, "User removed successfully.");
        let req = &h.backend.requests_to("/remove-user")[0];
        assert_eq!(req.method, Method::Delete);
        assert_eq!(req.field("usernameToDelete"), Some("amy"));

        h.backend.respond("/remove-user", 500, "");
        let failure = remove_user(&h.portal, &h.ctx, "amy").await.unwrap_err();
        assert!(failure.message.starts_with("User was not removed correctly"));
    }

    #[tokio::test]
    async fn test_users_update_role() {
        let h = signed_in();
        let outcome = update_role(&h.portal, &h.ctx, "amy", "manager").await.unwrap();
        assert_eq!(outcome.navigation, Navigation::redirect("/users"));
        assert_eq!(h.backend.requests_to("/edit-user")[0].field("newRole"), Some("manager"));

        h.backend.respond("/edit-user", 403, "");
        let failure = update_role(&h.portal, &h.ctx, "amy", "manager").await.unwrap_err();
        assert_eq!(failure.message, "User was not updated.");
    }

    #[test]
    fn test_users_edit_location_encodes() {
        let nav = edit_user_location("amy b", "amy@example.com", "head chef").unwrap();
        assert_eq!(
            nav,
            Navigation::redirect("/edit-user?username=amy+b&email=amy%40example.com&jobRole=head+chef")
        );
    }

    proptest! {
        #[test]
        fn test_users_edit_location_roundtrips(
            username in "[a-zA-Z0-9 &=?%+]{1,20}",
            role in "[a-zA-Z &]{1,20}",
        ) {
            let Navigation::Redirect(location) = edit_user_location(&username, "a@b.co", &role).unwrap() else {
                panic!("expected redirect");
            };
            let url = Url::parse(&format!("http://portal.local{}", location)).unwrap();
            let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
            prop_assert_eq!(&pairs[0], &("username".to_string(), username));
            prop_assert_eq!(&pairs[2], &("jobRole".to_string(), role));
        }
    }
}
