use axum::http::HeaderValue;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

pub mod attachments;
pub mod comments;
pub mod health;
pub mod intake;
pub mod links;
pub mod relations;
pub mod work_items;

/// Identity resolved by the enclosing application and forwarded as a
/// header. Authentication itself lives outside the core.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value).ok())
            .ok_or_else(AppError::forbidden)?;
        Ok(AuthenticatedUser { user_id })
    }
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let project_routes = Router::new()
        .route(
            "/work-items",
            get(work_items::list).post(work_items::create),
        )
        .route("/work-items/bulk-dates", post(work_items::bulk_dates))
        .route(
            "/work-items/by-sequence/:sequence",
            get(work_items::get_by_sequence),
        )
        .route(
            "/work-items/:id",
            get(work_items::get)
                .patch(work_items::update)
                .delete(work_items::remove),
        )
        .route("/work-items/:id/activities", get(work_items::list_activities))
        .route(
            "/work-items/:id/subscribe",
            post(work_items::subscribe).delete(work_items::unsubscribe),
        )
        .route("/work-items/:id/links", get(links::list).post(links::create))
        .route(
            "/work-items/:id/links/:link_id",
            patch(links::update).delete(links::remove),
        )
        .route(
            "/work-items/:id/attachments",
            get(attachments::list).post(attachments::create),
        )
        .route(
            "/work-items/:id/attachments/:asset_id",
            delete(attachments::remove),
        )
        .route(
            "/work-items/:id/comments",
            get(comments::list).post(comments::create),
        )
        .route(
            "/work-items/:id/comments/:comment_id",
            patch(comments::update).delete(comments::remove),
        )
        .route(
            "/work-items/:id/reactions",
            post(comments::add_item_reaction),
        )
        .route(
            "/work-items/:id/reactions/:code",
            delete(comments::remove_item_reaction),
        )
        .route(
            "/work-items/:id/comments/:comment_id/reactions",
            post(comments::add_comment_reaction),
        )
        .route(
            "/work-items/:id/comments/:comment_id/reactions/:code",
            delete(comments::remove_comment_reaction),
        )
        .route("/work-items/:id/relations", post(relations::create))
        .route(
            "/work-items/:id/relations/:related_id",
            delete(relations::remove),
        )
        .route("/intake", post(intake::submit))
        .route("/intake/:intake_id", patch(intake::transition));

    Router::new()
        .nest("/api/projects/:project_id", project_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
}
