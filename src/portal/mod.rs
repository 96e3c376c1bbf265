//! Portal: page controllers of the restaurant web front-end.
//!
//! Each controller is an async function over a [`Portal`] (identity provider
//! and backend) and a [`SessionContext`]. Controllers return a
//! [`PageOutcome`] or a [`PageFailure`]; [`Presenter::settle`] turns either
//! into the [`Navigation`] the page performs, showing the notice through the
//! configured [`ErrorPresentation`].

pub mod backend;
#[cfg(feature = "cognito")]
pub mod cognito;
pub mod error;
pub mod identity;
pub mod pages;
pub mod session;
pub mod storage;

use backend::{Backend, BackendRequest};
use error::PortalError;
use identity::IdentityProvider;
use serde::{Deserialize, Serialize};
use session::SessionContext;
use std::sync::Arc;

/// What the browser does once a controller has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Stay,
    Reload,
    Redirect(String),
    /// Unhide a page section.
    Reveal { section: String },
}

impl Navigation {
    pub fn redirect(path: &str) -> Self {
        Navigation::Redirect(path.to_string())
    }
}

/// Flash message category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Success,
    Danger,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    pub category: Category,
}

impl Notice {
    pub fn success(message: &str) -> Self {
        Self {
            message: message.to_string(),
            category: Category::Success,
        }
    }

    pub fn danger(message: &str) -> Self {
        Self {
            message: message.to_string(),
            category: Category::Danger,
        }
    }

    pub fn info(message: &str) -> Self {
        Self {
            message: message.to_string(),
            category: Category::Info,
        }
    }
}

/// A controller's successful result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOutcome {
    pub navigation: Navigation,
    pub notice: Option<Notice>,
}

impl PageOutcome {
    pub fn stay() -> Self {
        Self {
            navigation: Navigation::Stay,
            notice: None,
        }
    }

    pub fn to(navigation: Navigation) -> Self {
        Self {
            navigation,
            notice: None,
        }
    }

    pub fn with(mut self, notice: Notice) -> Self {
        self.notice = Some(notice);
        self
    }
}

/// A controller's failure: the cause, what the user is told, where they go.
#[derive(Debug)]
pub struct PageFailure {
    pub error: PortalError,
    pub message: String,
    pub category: Category,
    pub retreat: Navigation,
    /// Inline field the message belongs to, bypassing the presenter
    pub field: Option<&'static str>,
}

impl PageFailure {
    pub fn new(error: PortalError, message: &str, retreat: Navigation) -> Self {
        Self {
            error,
            message: message.to_string(),
            category: Category::Danger,
            retreat,
            field: None,
        }
    }

    /// Fail with the error's own text as the user message.
    pub fn plain(error: PortalError) -> Self {
        let message = error.to_string();
        Self::new(error, &message, Navigation::Stay)
    }

    pub fn in_field(mut self, field: &'static str) -> Self {
        self.field = Some(field);
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }
}

impl From<PortalError> for PageFailure {
    fn from(error: PortalError) -> Self {
        PageFailure::plain(error)
    }
}

impl From<error::IdentityError> for PageFailure {
    fn from(error: error::IdentityError) -> Self {
        PageFailure::plain(error.into())
    }
}

pub type PageResult = Result<PageOutcome, PageFailure>;

/// How notices reach the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPresentation {
    /// Log only.
    Console,
    /// Modal alert on the current page.
    Alert,
    /// Server-side flash shown on the next page.
    #[default]
    Flash,
}

/// Presents notices according to one [`ErrorPresentation`] policy.
#[derive(Clone)]
pub struct Presenter {
    pub policy: ErrorPresentation,
    backend: Arc<dyn Backend>,
}

impl Presenter {
    pub fn new(policy: ErrorPresentation, backend: Arc<dyn Backend>) -> Self {
        Self { policy, backend }
    }

    pub async fn present(&self, ctx: &mut SessionContext, notice: &Notice) {
        match self.policy {
            ErrorPresentation::Console => match notice.category {
                Category::Danger => tracing::error!(notice = %notice.message, "portal notice"),
                _ => tracing::info!(notice = %notice.message, "portal notice"),
            },
            ErrorPresentation::Alert => ctx.alerts.push(notice.message.clone()),
            ErrorPresentation::Flash => {
                if let Err(e) = flash(self.backend.as_ref(), notice).await {
                    tracing::warn!(error = %e, "flash failed");
                }
            }
        }
    }

    /// Present a controller's notice and return where the page goes next.
    pub async fn settle(&self, ctx: &mut SessionContext, result: PageResult) -> Navigation {
        match result {
            Ok(outcome) => {
                if let Some(notice) = &outcome.notice {
                    self.present(ctx, notice).await;
                }
                outcome.navigation
            }
            Err(failure) => {
                tracing::warn!(error = %failure.error, "page action failed");
                match failure.field {
                    Some(field) => {
                        ctx.field_errors.insert(field.to_string(), failure.message);
                    }
                    None => {
                        let notice = Notice {
                            message: failure.message,
                            category: failure.category,
                        };
                        self.present(ctx, &notice).await;
                    }
                }
                failure.retreat
            }
        }
    }
}

/// Record a flash message for the next rendered page.
pub async fn flash(backend: &dyn Backend, notice: &Notice) -> Result<(), PortalError> {
    let body = serde_json::json!({
        "message": notice.message,
        "category": notice.category,
    });
    backend
        .send(BackendRequest::post_json("/flash", body))
        .await?
        .ensure_ok()?;
    Ok(())
}

/// Services the page controllers run against.
#[derive(Clone)]
pub struct Portal {
    pub identity: Arc<dyn IdentityProvider>,
    pub backend: Arc<dyn Backend>,
}

impl Portal {
    pub fn new(identity: Arc<dyn IdentityProvider>, backend: Arc<dyn Backend>) -> Self {
        Self { identity, backend }
    }

    pub fn presenter(&self, policy: ErrorPresentation) -> Presenter {
        Presenter::new(policy, self.backend.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::backend::testing::ScriptedBackend;
    use super::backend::Body;
    use super::*;

    fn presenter(policy: ErrorPresentation) -> (Arc<ScriptedBackend>, Presenter) {
        let backend = Arc::new(ScriptedBackend::new());
        (backend.clone(), Presenter::new(policy, backend))
    }

    #[tokio::test]
    async fn test_portal_settle_success_flashes() {
        let (backend, p) = presenter(ErrorPresentation::Flash);
        let mut ctx = SessionContext::in_memory();
        let nav = p
            .settle(
                &mut ctx,
                Ok(PageOutcome::to(Navigation::redirect("/")).with(Notice::success("done"))),
            )
            .await;
        assert_eq!(nav, Navigation::redirect("/"));
        let flashes = backend.requests_to("/flash");
        assert_eq!(flashes.len(), 1);
        assert_eq!(
            flashes[0].body,
            Body::Json(serde_json::json!({ "message": "done", "category": "success" }))
        );
    }

    #[tokio::test]
    async fn test_portal_settle_failure_alerts() {
        let (backend, p) = presenter(ErrorPresentation::Alert);
        let mut ctx = SessionContext::in_memory();
        let failure = PageFailure::new(
            PortalError::Status { status: 500 },
            "User was not updated.",
            Navigation::Stay,
        );
        let nav = p.settle(&mut ctx, Err(failure)).await;
        assert_eq!(nav, Navigation::Stay);
        assert_eq!(ctx.alerts, vec!["User was not updated.".to_string()]);
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_portal_settle_field_error_bypasses_policy() {
        let (backend, p) = presenter(ErrorPresentation::Flash);
        let mut ctx = SessionContext::in_memory();
        let failure = PageFailure::plain(PortalError::Invalid("bad".into())).in_field("codeError");
        p.settle(&mut ctx, Err(failure)).await;
        assert_eq!(ctx.field_errors.get("codeError").map(String::as_str), Some("bad"));
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_portal_console_policy_is_silent() {
        let (backend, p) = presenter(ErrorPresentation::Console);
        let mut ctx = SessionContext::in_memory();
        p.present(&mut ctx, &Notice::danger("boom")).await;
        assert!(ctx.alerts.is_empty());
        assert!(backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_portal_flash_failure_still_navigates() {
        let (backend, p) = presenter(ErrorPresentation::Flash);
        backend.respond("/flash", 500, "");
        let mut ctx = SessionContext::in_memory();
        let failure = PageFailure::new(
            PortalError::Rejected("nope".into()),
            "Operation failed!",
            Navigation::redirect("/verify"),
        );
        assert_eq!(p.settle(&mut ctx, Err(failure)).await, Navigation::redirect("/verify"));
    }
}
