use axum::{
    extract::{FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use super::auth::{cleared_cookie, session_cookie, AdminUser, CurrentUser};
use super::error::ApiError;
use super::extract::{Json, Path, Query};
use super::AppState;
use crate::models::*;
use crate::severity::Severity;

fn issue_not_found() -> ApiError {
    ApiError::NotFound("Issue not found")
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Auth
// ============================================================

pub async fn signup(
    State(state): State<AppState>,
    Json(input): Json<SignupInput>,
) -> Result<Response, ApiError> {
    let user = state.db.create_user(input)?;
    let token = state.db.create_session(user.id, state.session_ttl)?;
    let cookie = session_cookie(&token, state.session_ttl.num_seconds());

    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(AuthResponse { token, user }),
    )
        .into_response())
}

pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginInput>,
) -> Result<Response, ApiError> {
    let Some(user) = state.db.verify_credentials(&input.email, &input.password)? else {
        tracing::warn!("Failed login attempt");
        return Err(ApiError::BadRequest("Invalid credentials".to_string()));
    };

    let token = state.db.create_session(user.id, state.session_ttl)?;
    let cookie = session_cookie(&token, state.session_ttl.num_seconds());
    tracing::info!("User {} logged in", user.id);

    Ok(([(header::SET_COOKIE, cookie)], Json(AuthResponse { token, user })).into_response())
}

pub async fn logout(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Response, ApiError> {
    state.db.delete_session(&current.token)?;
    Ok((StatusCode::NO_CONTENT, [(header::SET_COOKIE, cleared_cookie())]).into_response())
}

pub async fn profile(current: CurrentUser) -> Json<User> {
    Json(current.user)
}

// ============================================================
// Issues
// ============================================================

/// Report a new issue. Accepts `multipart/form-data` with text fields
/// `title`, `description`, `location` and an optional `image` file, or a
/// JSON [`CreateIssueInput`].
pub async fn create_issue(
    State(state): State<AppState>,
    current: CurrentUser,
    request: Request,
) -> Result<(StatusCode, Json<Issue>), ApiError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    let (input, saved) = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        read_issue_form(&state, multipart).await?
    } else {
        let Json(input) = Json::<CreateIssueInput>::from_request(request, &state).await?;
        (input, None)
    };

    match state.db.create_issue(current.user.id, input, &state.rules) {
        Ok(issue) => Ok((StatusCode::CREATED, Json(issue))),
        Err(e) => {
            if let Some(path) = saved {
                state.uploads.discard(&path);
            }
            Err(e.into())
        }
    }
}

/// Read the form fields and store the photo, if any. Returns the input
/// together with the public path of the file saved by this request.
async fn read_issue_form(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<(CreateIssueInput, Option<String>), ApiError> {
    let mut input = CreateIssueInput::default();
    let mut photo: Option<(Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let file_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                if !bytes.is_empty() {
                    photo = Some((file_name, bytes.to_vec()));
                }
            }
            "title" | "description" | "location" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(e.body_text()))?;
                match name.as_str() {
                    "title" => input.title = text,
                    "description" => input.description = text,
                    _ => input.location = text,
                }
            }
            other => tracing::debug!("Ignoring form field {:?}", other),
        }
    }

    if let Some((file_name, bytes)) = photo {
        input.image = Some(state.uploads.save(file_name.as_deref(), &bytes)?);
    }
    let saved = input.image.clone();
    Ok((input, saved))
}

/// List issues, newest first, optionally filtered by `severity` and `status`.
pub async fn list_issues(
    State(state): State<AppState>,
    Query(filter): Query<IssueFilter>,
) -> Result<Json<Vec<Issue>>, ApiError> {
    Ok(Json(state.db.list_issues(&filter)?))
}

pub async fn list_my_issues(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<Vec<Issue>>, ApiError> {
    let filter = IssueFilter {
        user_id: Some(current.user.id),
        ..Default::default()
    };
    Ok(Json(state.db.list_issues(&filter)?))
}

pub async fn list_high_severity_issues(
    State(state): State<AppState>,
) -> Result<Json<Vec<Issue>>, ApiError> {
    let filter = IssueFilter {
        severity: Some(Severity::High),
        ..Default::default()
    };
    Ok(Json(state.db.list_issues(&filter)?))
}

pub async fn list_resolved_issues(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<Issue>>, ApiError> {
    let filter = IssueFilter {
        status: Some(IssueStatus::Resolved),
        ..Default::default()
    };
    Ok(Json(state.db.list_issues(&filter)?))
}

pub async fn get_issue(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Issue>, ApiError> {
    state.db.get_issue(id)?.map(Json).ok_or_else(issue_not_found)
}

/// Edit an issue's text. Only the reporter or an administrator may edit,
/// and the severity is re-derived from the new text.
pub async fn update_issue(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateIssueInput>,
) -> Result<Json<Issue>, ApiError> {
    let issue = state.db.get_issue(id)?.ok_or_else(issue_not_found)?;
    if issue.user.id != current.user.id && !current.user.is_admin {
        tracing::warn!("User {} attempted to edit issue {}", current.user.id, id);
        return Err(ApiError::Forbidden("Not authorized to edit this issue"));
    }

    state
        .db
        .update_issue(id, input, &state.rules)?
        .map(Json)
        .ok_or_else(issue_not_found)
}

pub async fn upvote_issue(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Issue>, ApiError> {
    state
        .db
        .upvote_issue(id, current.user.id)?
        .map(Json)
        .ok_or_else(issue_not_found)
}

pub async fn add_comment(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
    Json(input): Json<AddCommentInput>,
) -> Result<Json<Issue>, ApiError> {
    state
        .db
        .add_comment(id, current.user.id, input)?
        .map(Json)
        .ok_or_else(issue_not_found)
}

pub async fn update_issue_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateStatusInput>,
) -> Result<Json<Issue>, ApiError> {
    state
        .db
        .update_issue_status(id, input.status)?
        .map(Json)
        .ok_or_else(issue_not_found)
}
