//! Request handlers
//!
//! `POST /ask` enqueues and returns at once; `GET /result/{id}` only reads.

use crate::error::ApiError;
use crate::server::AppState;
use axum::async_trait;
use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::{Form, Json};
use relay_common::{RelayError, METRICS};
use relay_proto::{
    AskForm, AskResponse, HealthResponse, TaskStatusResponse, PROMPT_REQUIRED, PROMPT_TOO_LONG,
};
use std::convert::Infallible;
use tracing::{debug, info};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// `GET /`
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// The `prompt` field of a url-encoded or `multipart/form-data` body.
/// Any other body, or a body without the field, yields `None`.
#[derive(Debug)]
pub struct SubmittedPrompt(pub Option<String>);

fn is_multipart(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map_or(false, |value| {
            value
                .to_ascii_lowercase()
                .starts_with("multipart/form-data")
        })
}

async fn multipart_prompt(mut multipart: Multipart) -> Option<String> {
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("prompt") => {
                return match field.text().await {
                    Ok(text) => Some(text),
                    Err(e) => {
                        debug!("Unreadable prompt field: {}", e);
                        None
                    }
                };
            }
            Ok(Some(_)) => continue,
            Ok(None) => return None,
            Err(e) => {
                debug!("Malformed multipart body: {}", e);
                return None;
            }
        }
    }
}

#[async_trait]
impl<S> FromRequest<S> for SubmittedPrompt
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if is_multipart(&req) {
            let prompt = match Multipart::from_request(req, state).await {
                Ok(multipart) => multipart_prompt(multipart).await,
                Err(e) => {
                    debug!("Rejected multipart body: {}", e);
                    None
                }
            };
            return Ok(SubmittedPrompt(prompt));
        }

        let prompt = match Form::<AskForm>::from_request(req, state).await {
            Ok(Form(form)) => form.prompt,
            Err(_) => None,
        };
        Ok(SubmittedPrompt(prompt))
    }
}

/// Check a submitted prompt and return it
pub fn validate_prompt(prompt: Option<String>, max_chars: usize) -> Result<String, RelayError> {
    let prompt = prompt
        .filter(|p| !p.is_empty())
        .ok_or_else(|| RelayError::validation(PROMPT_REQUIRED))?;

    if prompt.chars().count() > max_chars {
        return Err(RelayError::validation(PROMPT_TOO_LONG));
    }

    Ok(prompt)
}

/// `POST /ask`
///
/// A body that is not a form counts as a missing prompt.
pub async fn ask(
    State(state): State<AppState>,
    SubmittedPrompt(prompt): SubmittedPrompt,
) -> Result<(StatusCode, Json<AskResponse>), ApiError> {
    let prompt = match validate_prompt(prompt, state.config.gateway.max_prompt_chars) {
        Ok(prompt) => prompt,
        Err(e) => {
            METRICS.gateway.jobs_rejected.inc();
            return Err(e.into());
        }
    };

    let job = state.backend.submit(prompt).await?;
    METRICS.gateway.jobs_submitted.inc();
    info!("Accepted job {}", job.id);

    Ok((StatusCode::ACCEPTED, Json(AskResponse { task_id: job.id })))
}

/// `GET /result/{task_id}`
pub async fn result(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    METRICS.gateway.status_polls.inc();

    let response = match state.backend.status(&task_id).await? {
        Some(record) => Json(record.to_status()).into_response(),
        None if state.config.gateway.report_unknown_jobs => {
            debug!("Unknown job {}", task_id);
            (StatusCode::NOT_FOUND, Json(TaskStatusResponse::not_found())).into_response()
        }
        // Unknown ids look like jobs no worker has picked up yet
        None => Json(TaskStatusResponse::pending()).into_response(),
    };

    Ok(response)
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    state.backend.store().ping().await?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
    }))
}
