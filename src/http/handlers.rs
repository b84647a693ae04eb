use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::AUTHORIZATION, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::error::AppError;
use crate::feature::Feature;
use crate::identity::{
    require_user, resolve_identity, AnonId, ANON_COOKIE, ANON_COOKIE_MAX_AGE_DAYS,
};
use crate::pipeline::Submission;
use crate::stats::{summarize, UsageStats};
use crate::store::OperationRecord;

const X_CACHE: &str = "x-cache";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    #[serde(default)]
    input_image: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

#[derive(Serialize)]
struct OutputBody {
    output: String,
}

#[derive(Serialize)]
struct RestorationDto {
    id: Uuid,
    original_url: String,
    restored_url: String,
    created_at: DateTime<Utc>,
}

impl From<OperationRecord> for RestorationDto {
    fn from(record: OperationRecord) -> Self {
        Self {
            id: record.id,
            original_url: record.input,
            restored_url: record.output,
            created_at: record.created_at,
        }
    }
}

#[derive(Serialize)]
struct EditDto {
    id: Uuid,
    original_url: String,
    edited_url: String,
    prompt: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<OperationRecord> for EditDto {
    fn from(record: OperationRecord) -> Self {
        Self {
            id: record.id,
            original_url: record.input,
            edited_url: record.output,
            prompt: record.prompt,
            created_at: record.created_at,
        }
    }
}

#[derive(Serialize)]
struct RestorationList {
    restorations: Vec<RestorationDto>,
}

#[derive(Serialize)]
struct EditList {
    edits: Vec<EditDto>,
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn submission(body: Result<Json<CreateRequest>, JsonRejection>) -> Result<Submission, AppError> {
    let Json(body) = body.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let input_image = body
        .input_image
        .filter(|image| !image.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("inputImage is required".to_owned()))?;
    Ok(Submission {
        input_image,
        prompt: body.prompt,
    })
}

fn anon_cookie(token: &AnonId, secure: bool) -> Cookie<'static> {
    Cookie::build((ANON_COOKIE, token.as_str().to_owned()))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(ANON_COOKIE_MAX_AGE_DAYS))
        .build()
}

async fn create(
    state: &AppState,
    feature: Feature,
    headers: &HeaderMap,
    jar: CookieJar,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let cookie = jar.get(ANON_COOKIE).map(|c| c.value().to_owned());
    let resolved =
        resolve_identity(state.sessions.as_ref(), bearer(headers), cookie.as_deref()).await;

    let processed = state
        .pipeline
        .process(feature, &resolved.identity, submission(body))
        .await?;

    // The cookie only goes out once the request has succeeded.
    let jar = match resolved.minted_token() {
        Some(token) => jar.add(anon_cookie(token, state.cookie_secure)),
        None => jar,
    };
    Ok((
        jar,
        [(X_CACHE, processed.cache.as_str())],
        Json(OutputBody {
            output: processed.output,
        }),
    )
        .into_response())
}

pub async fn create_restore(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    create(&state, Feature::Restore, &headers, jar, body).await
}

pub async fn create_edit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    create(&state, Feature::Edit, &headers, jar, body).await
}

async fn history_for(
    state: &AppState,
    feature: Feature,
    headers: &HeaderMap,
) -> Result<Vec<OperationRecord>, AppError> {
    let user = require_user(state.sessions.as_ref(), bearer(headers)).await?;
    Ok(state.history.list_for_user(feature, &user).await?)
}

pub async fn list_restorations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let records = history_for(&state, Feature::Restore, &headers).await?;
    Ok(Json(RestorationList {
        restorations: records.into_iter().map(RestorationDto::from).collect(),
    }))
}

pub async fn list_edits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let records = history_for(&state, Feature::Edit, &headers).await?;
    Ok(Json(EditList {
        edits: records.into_iter().map(EditDto::from).collect(),
    }))
}

pub async fn usage_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UsageStats>, AppError> {
    let user = require_user(state.sessions.as_ref(), bearer(&headers)).await?;
    let now = Utc::now();
    let restorations = state.history.list_for_user(Feature::Restore, &user).await?;
    let edits = state.history.list_for_user(Feature::Edit, &user).await?;
    Ok(Json(UsageStats {
        restorations: summarize(&restorations, now),
        edits: summarize(&edits, now),
    }))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_bearer_tokens() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok123"));
        assert_eq!(bearer(&headers), Some("tok123"));
    }

    #[test]
    fn anonymous_cookie_is_http_only_for_thirty_days() {
        let cookie = anon_cookie(&AnonId::new("abc"), false);
        assert_eq!(cookie.name(), ANON_COOKIE);
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::days(30)));
    }

    #[test]
    fn missing_image_is_a_bad_request() {
        let body = Ok(Json(CreateRequest {
            input_image: Some("  ".into()),
            prompt: None,
        }));
        assert!(matches!(submission(body), Err(AppError::BadRequest(ref m)) if m == "inputImage is required"));
    }
}
