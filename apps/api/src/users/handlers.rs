use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::info;
use validator::Validate;

use crate::errors::{AppError, EMAIL_TAKEN};
use crate::extract::{AppJson, AppPath};
use crate::models::user::{SimilarUserRow, UserRow};
use crate::state::AppState;
use crate::users::embedding::Embedding;
use crate::users::payloads::{checked_embedding, SimilarityQuery, UserCreate, UserUpdate};
use crate::users::queries::{self, UserChanges};

fn user_not_found() -> AppError {
    AppError::NotFound("User not found".to_string())
}

/// POST /users/
pub async fn handle_create_user(
    State(state): State<AppState>,
    AppJson(req): AppJson<UserCreate>,
) -> Result<(StatusCode, Json<UserRow>), AppError> {
    req.validate()?;
    let embedding = checked_embedding(req.embedding, state.config.embeddings_enabled)?;

    let mut session = state.db.session().await?;

    if queries::find_by_email(session.conn(), &req.email)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(EMAIL_TAKEN.to_string()));
    }

    let user = queries::insert(session.conn(), &req.name, &req.email, embedding.as_ref()).await?;
    session.commit().await?;

    info!(user_id = user.id, "Created user");
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /users/:id
pub async fn handle_get_user(
    State(state): State<AppState>,
    AppPath(id): AppPath<i32>,
) -> Result<Json<UserRow>, AppError> {
    let mut session = state.db.session().await?;
    let user = queries::find_by_id(session.conn(), id)
        .await?
        .ok_or_else(user_not_found)?;
    Ok(Json(user))
}

/// PUT /users/:id
pub async fn handle_update_user(
    State(state): State<AppState>,
    AppPath(id): AppPath<i32>,
    AppJson(req): AppJson<UserUpdate>,
) -> Result<Json<UserRow>, AppError> {
    req.validate()?;
    let unchanged = req.is_empty();
    let embedding = checked_embedding(req.embedding, state.config.embeddings_enabled)?;

    let mut session = state.db.session().await?;

    if unchanged {
        let user = queries::find_by_id(session.conn(), id)
            .await?
            .ok_or_else(user_not_found)?;
        return Ok(Json(user));
    }

    let changes = UserChanges {
        name: req.name.as_deref(),
        email: req.email.as_deref(),
        embedding: embedding.as_ref(),
    };
    let user = queries::update(session.conn(), id, &changes)
        .await?
        .ok_or_else(user_not_found)?;
    session.commit().await?;

    info!(user_id = user.id, "Updated user");
    Ok(Json(user))
}

/// DELETE /users/:id
pub async fn handle_delete_user(
    State(state): State<AppState>,
    AppPath(id): AppPath<i32>,
) -> Result<Json<Value>, AppError> {
    let mut session = state.db.session().await?;
    if !queries::delete(session.conn(), id).await? {
        return Err(user_not_found());
    }
    session.commit().await?;

    info!(user_id = id, "Deleted user");
    Ok(Json(json!({ "detail": format!("User with id {id} deleted") })))
}

/// POST /users/search
pub async fn handle_search_similar(
    State(state): State<AppState>,
    AppJson(req): AppJson<SimilarityQuery>,
) -> Result<Json<Vec<SimilarUserRow>>, AppError> {
    if !state.config.embeddings_enabled {
        return Err(AppError::Validation(
            "embeddings are not enabled on this server".to_string(),
        ));
    }
    req.validate()?;
    let embedding = Embedding::try_from(req.embedding).map_err(AppError::Validation)?;

    let mut session = state.db.session().await?;
    let users = queries::find_similar(session.conn(), &embedding, req.limit).await?;
    Ok(Json(users))
}

/// End-to-end checks against a live PostgreSQL.
///
/// Reads the usual `DB_*` variables, creates a throwaway database and runs the
/// router against it: `cargo test -- --ignored`.
#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::config::Config;
    use crate::db::raw::{execute_raw, NamedParams, RawRow};
    use crate::db::{bootstrap, Database};
    use crate::routes::build_router;
    use crate::state::AppState;
    use crate::users::embedding::EMBEDDING_DIM;

    struct LiveApp {
        app: Router,
        db: Database,
        config: Config,
    }

    impl LiveApp {
        async fn start(embeddings_enabled: bool) -> Self {
            let mut config = Config::from_env().expect("DB_USER and DB_PASSWORD must be set");
            config.database.name = format!("users_api_test_{}", Uuid::new_v4().simple());
            config.embeddings_enabled = embeddings_enabled;
            bootstrap::run(&config.database, embeddings_enabled)
                .await
                .unwrap();
            let db = Database::connect(&config.database).await.unwrap();
            let app = build_router(AppState {
                db: db.clone(),
                config: config.clone(),
            });
            LiveApp { app, db, config }
        }

        async fn raw(&self, query: &str) -> Vec<RawRow> {
            let mut session = self.db.session().await.unwrap();
            execute_raw(&mut session, query, &NamedParams::new())
                .await
                .unwrap()
        }

        async fn teardown(self) {
            drop(self.app);
            self.db.close().await;
            bootstrap::drop_database(&self.config.database)
                .await
                .unwrap();
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Unit vector along axis `axis`.
    fn basis(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[axis] = 1.0;
        v
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL"]
    async fn test_user_lifecycle() {
        let live = LiveApp::start(false).await;
        let app = &live.app;

        let (status, created) = send(
            app,
            "POST",
            "/users/",
            Some(json!({"name": "A", "email": "a@x.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created, json!({"id": 1, "name": "A", "email": "a@x.com"}));

        let (status, body) = send(
            app,
            "POST",
            "/users/",
            Some(json!({"name": "Other", "email": "a@x.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "Email already registered");

        // The rejected create left nothing behind and did not burn an id.
        let counted = live.raw("SELECT count(*) AS n FROM users").await;
        assert_eq!(counted[0]["n"], 1);

        let (status, fetched) = send(app, "GET", "/users/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched, created);

        let (status, updated) = send(app, "PUT", "/users/1", Some(json!({"name": "B"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated, json!({"id": 1, "name": "B", "email": "a@x.com"}));

        let (status, unchanged) = send(app, "PUT", "/users/1", Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(unchanged, updated);

        let (status, second) = send(
            app,
            "POST",
            "/users/",
            Some(json!({"name": "C", "email": "c@x.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(second["id"], 2);

        let (status, rows) = send(app, "GET", "/query/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rows.as_array().map(Vec::len), Some(1));
        assert_eq!(rows[0]["email"], "a@x.com");

        let (status, first) = send(app, "GET", "/test", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first, updated);

        for id in [1, 2] {
            let uri = format!("/users/{id}");
            let (status, deleted) = send(app, "DELETE", &uri, None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(deleted["detail"], format!("User with id {id} deleted"));
        }

        let (status, _) = send(app, "GET", "/users/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(app, "DELETE", "/users/1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, rows) = send(app, "GET", "/query/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(rows, json!([]));

        let (status, _) = send(app, "GET", "/test", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        live.teardown().await;
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL"]
    async fn test_ids_unique_and_update_email_conflict() {
        let live = LiveApp::start(false).await;
        let app = &live.app;

        let (_, a) = send(app, "POST", "/users/", Some(json!({"name": "A", "email": "a@x.com"}))).await;
        let (_, b) = send(app, "POST", "/users/", Some(json!({"name": "B", "email": "b@x.com"}))).await;
        assert_ne!(a["id"], b["id"]);

        let uri = format!("/users/{}", b["id"]);
        let (status, body) = send(app, "PUT", &uri, Some(json!({"email": "a@x.com"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "EMAIL_ALREADY_REGISTERED");

        let (_, still) = send(app, "GET", &uri, None).await;
        assert_eq!(still["email"], "b@x.com");

        let (status, _) = send(app, "PUT", "/users/9999", Some(json!({"name": "Z"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        live.teardown().await;
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL"]
    async fn test_columns_match_validation_limits() {
        let live = LiveApp::start(false).await;

        let columns = live
            .raw(
                "SELECT column_name::text AS name, character_maximum_length::int AS max_len \
                 FROM information_schema.columns \
                 WHERE table_name = 'users' AND column_name IN ('name', 'email') \
                 ORDER BY column_name",
            )
            .await;
        assert_eq!(columns.len(), 2);
        for column in &columns {
            assert_eq!(column["max_len"], 255, "column {}", column["name"]);
        }

        let mut session = live.db.session().await.unwrap();
        let empty_name = super::queries::insert(session.conn(), "", "empty@x.com", None).await;
        assert!(empty_name.is_err());
        drop(session);

        live.teardown().await;
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL with pgvector"]
    async fn test_embedding_lifecycle() {
        let live = LiveApp::start(true).await;
        let app = &live.app;

        let (status, near) = send(
            app,
            "POST",
            "/users/",
            Some(json!({"name": "Near", "email": "near@x.com", "embedding": basis(0)})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = send(
            app,
            "POST",
            "/users/",
            Some(json!({"name": "Far", "email": "far@x.com", "embedding": basis(1)})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, rows) = send(app, "GET", &format!("/query/{}", near["id"]), None).await;
        assert_eq!(status, StatusCode::OK);
        let stored = rows[0]["embedding"].as_array().unwrap();
        assert_eq!(stored.len(), EMBEDDING_DIM);
        assert_eq!(stored[0], 1.0);

        let (status, found) = send(
            app,
            "POST",
            "/users/search",
            Some(json!({"embedding": basis(0), "limit": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found[0]["id"], near["id"]);
        let similarity = found[0]["similarity"].as_f64().unwrap();
        assert!((similarity - 1.0).abs() < 1e-6, "similarity {similarity}");

        let uri = format!("/users/{}", near["id"]);
        let (status, updated) = send(app, "PUT", &uri, Some(json!({"embedding": basis(2)}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["name"], "Near");
        assert_eq!(updated["email"], "near@x.com");

        let (_, rows) = send(app, "GET", &format!("/query/{}", near["id"]), None).await;
        assert_eq!(rows[0]["name"], "Near");
        assert_eq!(rows[0]["embedding"][0], 0.0);
        assert_eq!(rows[0]["embedding"][2], 1.0);

        live.teardown().await;
    }

    #[tokio::test]
    #[ignore = "requires a running PostgreSQL"]
    async fn test_uncommitted_session_rolls_back() {
        let live = LiveApp::start(false).await;

        {
            let mut session = live.db.session().await.unwrap();
            super::queries::insert(session.conn(), "Gone", "gone@x.com", None)
                .await
                .unwrap();
        }

        let mut session = live.db.session().await.unwrap();
        assert!(super::queries::find_by_email(session.conn(), "gone@x.com")
            .await
            .unwrap()
            .is_none());
        session.rollback().await.unwrap();

        live.teardown().await;
    }
}
