//! Delivery page: back door control, order completion, retry queue.
//!
//! A completed order the backend could not fully record comes back with
//! `retry_items`. Those are kept in local storage and re-sent once through
//! the retry route before the page moves on, whether or not the retry lands.

use crate::portal::backend::{ApiResponse, BackendRequest};
use crate::portal::error::PortalError;
use crate::portal::session::{self, SessionContext};
use crate::portal::{Navigation, Notice, PageFailure, PageOutcome, PageResult, Portal};
use serde::{Deserialize, Serialize};

/// A delivery session for one restaurant, authorised by its delivery token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPage {
    pub restaurant_id: String,
    pub token: String,
    pub back_door_open: bool,
}

/// One delivered line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredItem {
    pub item_name: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
}

impl DeliveryPage {
    pub fn new(restaurant_id: &str, token: &str, back_door_open: bool) -> Self {
        Self {
            restaurant_id: restaurant_id.to_string(),
            token: token.to_string(),
            back_door_open,
        }
    }

    fn route(&self, action: &str) -> String {
        format!("/delivery/{}/{}/{}/", action, self.restaurant_id, self.token)
    }

    /// The delivery landing page itself.
    pub fn location(&self) -> String {
        format!("/delivery/{}/{}/", self.restaurant_id, self.token)
    }
}

async fn post_api(portal: &Portal, path: &str, body: serde_json::Value) -> Result<ApiResponse, PortalError> {
    let response = portal
        .backend
        .send(BackendRequest::post_json(path, body))
        .await?;
    // Failure envelopes arrive with 4xx statuses; read them anyway
    response.json()
}

/// Open a closed back door, close an open one.
pub async fn toggle_door(portal: &Portal, page: &DeliveryPage) -> PageResult {
    let action = if page.back_door_open { "close_door" } else { "open_door" };
    let response = post_api(portal, &page.route(action), serde_json::json!({}))
        .await
        .map_err(|e| {
            let message = format!("Error: {}", e);
            PageFailure::new(e, &message, Navigation::Stay)
        })?;
    if !response.success {
        let detail = response.message_text().unwrap_or_default();
        return Err(PageFailure::new(
            PortalError::Rejected(detail),
            "Operation failed!",
            Navigation::Stay,
        ));
    }
    tracing::info!(restaurant = %page.restaurant_id, action, "door toggled");
    Ok(PageOutcome::to(Navigation::Reload))
}

/// Submit the delivered items; queue and retry whatever the backend bounces.
pub async fn complete_order(
    portal: &Portal,
    ctx: &SessionContext,
    page: &DeliveryPage,
    items: &[DeliveredItem],
) -> PageResult {
    let body = serde_json::json!({ "items": items });
    let response = post_api(portal, &page.route("complete_order"), body).await?;

    if response.success {
        ctx.local.remove(session::RETRY_ITEMS);
        let message = response
            .message_text()
            .unwrap_or_else(|| "Order completed successfully".to_string());
        let next = response
            .redirect
            .clone()
            .map(Navigation::Redirect)
            .unwrap_or(Navigation::Reload);
        return Ok(PageOutcome::to(next).with(Notice::success(&message)));
    }

    let message = response
        .message_text()
        .unwrap_or_else(|| "Order could not be completed.".to_string());
    let Some(pending) = response.pending_retry() else {
        return Err(PageFailure::new(
            PortalError::Rejected(message.clone()),
            &message,
            Navigation::Stay,
        ));
    };

    ctx.local.set(session::RETRY_ITEMS, &pending.to_string());
    tracing::warn!(restaurant = %page.restaurant_id, "order incomplete, retrying queued items");
    if let Err(failure) = retry_items(portal, ctx, page).await {
        tracing::error!(error = %failure.error, "retry of queued items failed");
    }
    Err(PageFailure::new(
        PortalError::Rejected(message.clone()),
        &message,
        Navigation::Redirect(page.location()),
    ))
}

/// Re-send the queued items, if any.
pub async fn retry_items(portal: &Portal, ctx: &SessionContext, page: &DeliveryPage) -> PageResult {
    let Some(stored) = ctx.local.get(session::RETRY_ITEMS) else {
        return Ok(PageOutcome::stay());
    };
    let queued: serde_json::Value = serde_json::from_str(&stored).map_err(PortalError::from)?;
    let body = serde_json::json!({ "retry_items": queued });
    portal
        .backend
        .send(BackendRequest::post_json(&page.route("update_retry_items"), body))
        .await
        .and_then(|r| r.ensure_ok())?;
    Ok(PageOutcome::to(Navigation::Reload).with(Notice::success("Retry items updated.")))
}

/// Finish the delivery session; the backend decides where to land.
pub async fn end_delivery(portal: &Portal, page: &DeliveryPage) -> PageResult {
    let response = portal
        .backend
        .send(BackendRequest::post_json(&page.route("end_delivery"), serde_json::json!({})))
        .await
        .and_then(|r| r.ensure_ok())
        .map_err(|e| PageFailure::new(e, "Failed to end delivery.", Navigation::Stay))?;
    tracing::info!(restaurant = %page.restaurant_id, "delivery ended");
    Ok(PageOutcome::to(Navigation::Redirect(response.path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::backend::Body;
    use crate::portal::pages::fixtures::harness;
    use crate::portal::ErrorPresentation;
    use proptest::prelude::*;

    fn page(open: bool) -> DeliveryPage {
        DeliveryPage::new("7", "tok", open)
    }

    fn items() -> Vec<DeliveredItem> {
        vec![
            DeliveredItem { item_name: "Milk".into(), quantity: 4, expiry_date: Some("2026-11-01".into()) },
            DeliveredItem { item_name: "Eggs".into(), quantity: 12, expiry_date: None },
        ]
    }

    #[tokio::test]
    async fn test_delivery_toggle_door_routes() {
        let h = harness();
        h.backend.respond("/delivery/close_door/7/tok/", 200, r#"{"success":true}"#);
        h.backend.respond("/delivery/open_door/7/tok/", 200, r#"{"success":true}"#);
        assert_eq!(toggle_door(&h.portal, &page(true)).await.unwrap().navigation, Navigation::Reload);
        assert_eq!(toggle_door(&h.portal, &page(false)).await.unwrap().navigation, Navigation::Reload);
        assert_eq!(h.backend.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_delivery_toggle_door_failure_flashes() {
        let mut h = harness();
        h.backend.respond("/delivery/open_door/7/tok/", 400, r#"{"success":false}"#);
        let result = toggle_door(&h.portal, &page(false)).await;
        let nav = h.portal.presenter(ErrorPresentation::Flash).settle(&mut h.ctx, result).await;
        assert_eq!(nav, Navigation::Stay);
        let flash = &h.backend.requests_to("/flash")[0];
        assert_eq!(
            flash.body,
            Body::Json(serde_json::json!({ "message": "Operation failed!", "category": "danger" }))
        );
    }

    #[tokio::test]
    async fn test_delivery_toggle_door_bad_body() {
        let h = harness();
        h.backend.respond("/delivery/open_door/7/tok/", 502, "<html>bad gateway</html>");
        let failure = toggle_door(&h.portal, &page(false)).await.unwrap_err();
        assert!(failure.message.starts_with("Error: serialization error"));
    }

    #[tokio::test]
    async fn test_delivery_complete_order_success_clears_queue() {
        let h = harness();
        h.ctx.local.set(session::RETRY_ITEMS, "[]");
        h.backend.respond(
            "/delivery/complete_order/7/tok/",
            200,
            r#"{"success":true,"message":"Order completed successfully","redirect":"/delivery/7/tok/"}"#,
        );
        let outcome = complete_order(&h.portal, &h.ctx, &page(true), &items()).await.unwrap();
        assert_eq!(outcome.navigation, Navigation::redirect("/delivery/7/tok/"));
        assert!(!h.ctx.local.contains(session::RETRY_ITEMS));

        let sent = &h.backend.requests_to("/delivery/complete_order/7/tok/")[0];
        let Body::Json(body) = &sent.body else { panic!("expected json") };
        assert_eq!(body["items"][0]["item_name"], "Milk");
        assert!(body["items"][1].get("expiry_date").is_none());
    }

    #[tokio::test]
    async fn test_delivery_complete_order_discrepancy_without_retry() {
        let h = harness();
        h.backend.respond(
            "/delivery/complete_order/7/tok/",
            400,
            r#"{"success":false,"message":["Milk: ordered 5, delivered 4"]}"#,
        );
        let failure = complete_order(&h.portal, &h.ctx, &page(true), &items()).await.unwrap_err();
        assert_eq!(failure.message, "Milk: ordered 5, delivered 4");
        assert_eq!(failure.retreat, Navigation::Stay);
        assert!(h.backend.requests_to("/delivery/update_retry_items/7/tok/").is_empty());
    }

    #[tokio::test]
    async fn test_delivery_retry_items_empty_queue() {
        let h = harness();
        assert_eq!(retry_items(&h.portal, &h.ctx, &page(true)).await.unwrap(), PageOutcome::stay());
        assert!(h.backend.requests().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_end_delivery_follows_backend() {
        let h = harness();
        h.backend.respond("/delivery/end_delivery/7/tok/", 200, "");
        let outcome = end_delivery(&h.portal, &page(false)).await.unwrap();
        assert_eq!(outcome.navigation, Navigation::redirect("/delivery/end_delivery/7/tok/"));

        h.backend.respond("/delivery/end_delivery/7/tok/", 500, "");
        let failure = end_delivery(&h.portal, &page(false)).await.unwrap_err();
        assert_eq!(failure.message, "Failed to end delivery.");
    }

    fn run<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }

    proptest! {
        #[test]
        fn test_delivery_retry_queue_sent_once(
            names in proptest::collection::vec("[A-Za-z]{1,10}", 1..6),
            retry_status in prop_oneof![Just(200u16), Just(500u16)],
        ) {
            let h = harness();
            let queued: Vec<serde_json::Value> = names
                .iter()
                .map(|n| serde_json::json!({ "item_name": n, "quantity": 1 }))
                .collect();
            let reply = serde_json::json!({
                "success": false,
                "message": "Some items could not be recorded",
                "retry_items": queued,
            });
            h.backend.respond("/delivery/complete_order/7/tok/", 400, &reply.to_string());
            h.backend.respond("/delivery/update_retry_items/7/tok/", retry_status, "{}");

            let failure = run(complete_order(&h.portal, &h.ctx, &page(true), &items())).unwrap_err();

            prop_assert_eq!(failure.retreat, Navigation::redirect("/delivery/7/tok/"));
            let stored: serde_json::Value =
                serde_json::from_str(&h.ctx.local.get(session::RETRY_ITEMS).unwrap()).unwrap();
            prop_assert_eq!(&stored, &serde_json::Value::Array(queued.clone()));
            let retries = h.backend.requests_to("/delivery/update_retry_items/7/tok/");
            prop_assert_eq!(retries.len(), 1);
            prop_assert_eq!(
                &retries[0].body,
                &Body::Json(serde_json::json!({ "retry_items": queued }))
            );
        }
    }
}
