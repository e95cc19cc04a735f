//! Demo endpoints that go through the raw parameterized query path.

use anyhow::anyhow;
use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::db::raw::{execute_raw, NamedParams, RawRow};
use crate::errors::AppError;
use crate::extract::AppPath;
use crate::state::AppState;

/// GET /query/:id
/// Every row matching `id`; an empty array when there is none.
pub async fn handle_select_query(
    State(state): State<AppState>,
    AppPath(user_id): AppPath<i32>,
) -> Result<Json<Vec<RawRow>>, AppError> {
    let mut session = state.db.session().await?;
    let rows = execute_raw(
        &mut session,
        "SELECT * FROM users WHERE id = :user_id",
        &NamedParams::new().bind("user_id", user_id),
    )
    .await?;
    Ok(Json(rows))
}

/// GET /test
/// The lowest-id user, or 404 when the table is empty.
pub async fn handle_first_user(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let mut session = state.db.session().await?;
    let rows = execute_raw(
        &mut session,
        "SELECT * FROM users ORDER BY id LIMIT 1",
        &NamedParams::new(),
    )
    .await?;

    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound("No users found".to_string()))?;
    Ok(Json(user_fields(&row)?))
}

fn user_fields(row: &RawRow) -> Result<Value, AppError> {
    let field = |name: &str| {
        row.get(name)
            .cloned()
            .ok_or_else(|| AppError::Internal(anyhow!("users row has no '{name}' column")))
    };
    Ok(json!({
        "id": field("id")?,
        "name": field("name")?,
        "email": field("email")?,
    }))
}
