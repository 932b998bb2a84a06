use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use civic_report::api::{create_router, AppState};
use civic_report::db::Database;
use civic_report::models::*;
use civic_report::severity::{Severity, SeverityRules};
use civic_report::uploads::UploadStore;
use serde_json::{json, Value};
use tempfile::TempDir;
use uuid::Uuid;

struct TestApp {
    server: TestServer,
    db: Database,
    uploads: TempDir,
}

fn setup() -> TestApp {
    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");
    let uploads = tempfile::tempdir().expect("Failed to create upload dir");

    let state = AppState::new(
        db.clone(),
        SeverityRules::default(),
        UploadStore::new(uploads.path()),
    );
    let server = TestServer::new(create_router(state)).expect("Failed to create test server");

    TestApp {
        server,
        db,
        uploads,
    }
}

async fn signup(server: &TestServer, email: &str) -> AuthResponse {
    server
        .post("/api/auth/signup")
        .json(&SignupInput {
            name: email.split('@').next().unwrap_or("user").to_string(),
            email: email.to_string(),
            password: "hunter22".to_string(),
        })
        .await
        .json::<AuthResponse>()
}

async fn signup_admin(app: &TestApp, email: &str) -> AuthResponse {
    let auth = signup(&app.server, email).await;
    app.db.set_admin(email, true).expect("Failed to promote");
    auth
}

async fn report(server: &TestServer, auth: &AuthResponse, title: &str, description: &str) -> Issue {
    server
        .post("/api/issues")
        .authorization_bearer(&auth.token)
        .json(&CreateIssueInput {
            title: title.to_string(),
            description: description.to_string(),
            location: "Oak St".to_string(),
            image: None,
        })
        .await
        .json::<Issue>()
}

fn msg(response: &axum_test::TestResponse) -> String {
    response.json::<Value>()["msg"].as_str().unwrap_or_default().to_string()
}

mod health {
    use super::*;

    #[tokio::test]
    async fn reports_ok() {
        let app = setup();
        let response = app.server.get("/api/health").await;
        response.assert_status_ok();
        response.assert_json(&json!({ "status": "ok" }));
    }
}

mod auth {
    use super::*;

    #[tokio::test]
    async fn signup_returns_token_and_sets_cookie() {
        let app = setup();

        let response = app
            .server
            .post("/api/auth/signup")
            .json(&SignupInput {
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
                password: "secret".to_string(),
            })
            .await;

        response.assert_status(StatusCode::CREATED);
        let body: AuthResponse = response.json();
        assert_eq!(body.user.email, "ada@example.com");
        assert!(!body.user.is_admin);

        let cookie = response.cookie("token");
        assert_eq!(cookie.value(), body.token);

        let profile = app.server.get("/api/auth/profile").add_cookie(cookie).await;
        profile.assert_status_ok();
        assert_eq!(profile.json::<User>().id, body.user.id);
    }

    #[tokio::test]
    async fn duplicate_signup_conflicts() {
        let app = setup();
        signup(&app.server, "dup@example.com").await;

        let response = app
            .server
            .post("/api/auth/signup")
            .json(&SignupInput {
                name: "Again".to_string(),
                email: "dup@example.com".to_string(),
                password: "secret".to_string(),
            })
            .await;

        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(msg(&response), "User already exists");
    }

    #[tokio::test]
    async fn login_with_valid_credentials() {
        let app = setup();
        let registered = signup(&app.server, "login@example.com").await;

        let response = app
            .server
            .post("/api/auth/login")
            .json(&LoginInput {
                email: "login@example.com".to_string(),
                password: "hunter22".to_string(),
            })
            .await;

        response.assert_status_ok();
        let body: AuthResponse = response.json();
        assert_eq!(body.user.id, registered.user.id);
        assert_ne!(body.token, registered.token);
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_rejected() {
        let app = setup();
        signup(&app.server, "login@example.com").await;

        let response = app
            .server
            .post("/api/auth/login")
            .json(&LoginInput {
                email: "login@example.com".to_string(),
                password: "nope".to_string(),
            })
            .await;

        response.assert_status_bad_request();
        assert_eq!(msg(&response), "Invalid credentials");
    }

    #[tokio::test]
    async fn login_with_non_json_body_is_a_json_error() {
        let app = setup();

        let response = app
            .server
            .post("/api/auth/login")
            .text("email=login@example.com&password=nope")
            .await;

        response.assert_status_bad_request();
        assert!(!msg(&response).is_empty());
    }

    #[tokio::test]
    async fn signup_with_malformed_json_is_a_json_error() {
        let app = setup();

        let response = app
            .server
            .post("/api/auth/signup")
            .json(&json!({ "name": "Ada", "email": 42 }))
            .await;

        response.assert_status_bad_request();
        assert!(!msg(&response).is_empty());
    }

    #[tokio::test]
    async fn profile_requires_a_token() {
        let app = setup();

        let response = app.server.get("/api/auth/profile").await;
        response.assert_status_unauthorized();
        assert_eq!(msg(&response), "No token");

        let response = app
            .server
            .get("/api/auth/profile")
            .authorization_bearer("not-a-real-token")
            .await;
        response.assert_status_unauthorized();
        assert_eq!(msg(&response), "Token invalid");
    }

    #[tokio::test]
    async fn profile_accepts_post() {
        let app = setup();
        let auth = signup(&app.server, "p@example.com").await;

        let response = app
            .server
            .post("/api/auth/profile")
            .authorization_bearer(&auth.token)
            .await;
        response.assert_status_ok();
    }

    #[tokio::test]
    async fn logout_invalidates_the_token() {
        let app = setup();
        let auth = signup(&app.server, "out@example.com").await;

        app.server
            .post("/api/auth/logout")
            .authorization_bearer(&auth.token)
            .await
            .assert_status(StatusCode::NO_CONTENT);

        app.server
            .get("/api/auth/profile")
            .authorization_bearer(&auth.token)
            .await
            .assert_status_unauthorized();
    }
}

mod create_issue {
    use super::*;

    #[tokio::test]
    async fn requires_authentication() {
        let app = setup();

        let response = app
            .server
            .post("/api/issues")
            .json(&CreateIssueInput {
                title: "Pothole".to_string(),
                description: "Deep".to_string(),
                location: "Oak St".to_string(),
                image: None,
            })
            .await;

        response.assert_status_unauthorized();
    }

    #[tokio::test]
    async fn tags_severity_from_text() {
        let app = setup();
        let auth = signup(&app.server, "r@example.com").await;

        let response = app
            .server
            .post("/api/issues")
            .authorization_bearer(&auth.token)
            .json(&CreateIssueInput {
                title: "Urgent broken pipe".to_string(),
                description: "Water everywhere".to_string(),
                location: "Oak St".to_string(),
                image: None,
            })
            .await;

        response.assert_status(StatusCode::CREATED);
        let issue: Issue = response.json();
        assert_eq!(issue.severity, Severity::High);
        assert_eq!(issue.status, IssueStatus::Open);
        assert_eq!(issue.user.id, auth.user.id);
    }

    #[tokio::test]
    async fn ignores_client_supplied_severity() {
        let app = setup();
        let auth = signup(&app.server, "r@example.com").await;

        let response = app
            .server
            .post("/api/issues")
            .authorization_bearer(&auth.token)
            .json(&json!({
                "title": "Faded paint",
                "description": "On the crosswalk",
                "location": "Oak St",
                "severity": "High"
            }))
            .await;

        response.assert_status(StatusCode::CREATED);
        assert_eq!(response.json::<Issue>().severity, Severity::Low);
    }

    #[tokio::test]
    async fn accepts_multipart_with_photo() {
        let app = setup();
        let auth = signup(&app.server, "r@example.com").await;

        let form = MultipartForm::new()
            .add_text("title", "Gas leak")
            .add_text("description", "Strong smell near the school")
            .add_text("location", "Elm St")
            .add_part(
                "image",
                Part::bytes(b"fake png bytes".to_vec())
                    .file_name("leak.png")
                    .mime_type("image/png"),
            );

        let response = app
            .server
            .post("/api/issues")
            .authorization_bearer(&auth.token)
            .multipart(form)
            .await;

        response.assert_status(StatusCode::CREATED);
        let issue: Issue = response.json();
        assert_eq!(issue.severity, Severity::High);
        assert_eq!(issue.location, "Elm St");

        let image = issue.image.expect("image path missing");
        assert!(image.starts_with("/uploads/"));
        assert!(image.ends_with(".png"));

        let served = app.server.get(&image).await;
        served.assert_status_ok();
        assert_eq!(served.as_bytes().as_ref(), b"fake png bytes");
    }

    #[tokio::test]
    async fn failed_create_keeps_other_issues_photos() {
        let app = setup();
        let auth = signup(&app.server, "r@example.com").await;

        let form = MultipartForm::new()
            .add_text("title", "Fallen tree")
            .add_text("description", "Blocking the sidewalk")
            .add_text("location", "Birch Ave")
            .add_part(
                "image",
                Part::bytes(b"tree photo".to_vec())
                    .file_name("tree.jpg")
                    .mime_type("image/jpeg"),
            );
        let created = app
            .server
            .post("/api/issues")
            .authorization_bearer(&auth.token)
            .multipart(form)
            .await;
        created.assert_status(StatusCode::CREATED);
        let image = created.json::<Issue>().image.expect("image path missing");
        let file_name = image.trim_start_matches("/uploads/");
        let stored = app.uploads.path().join(file_name);
        assert!(stored.exists());

        let response = app
            .server
            .post("/api/issues")
            .authorization_bearer(&auth.token)
            .json(&json!({
                "title": "",
                "description": "x",
                "location": "y",
                "image": image,
            }))
            .await;

        response.assert_status_bad_request();
        assert_eq!(msg(&response), "title is required");
        assert!(stored.exists());
        app.server.get(&image).await.assert_status_ok();
    }

    #[tokio::test]
    async fn json_body_cannot_set_image() {
        let app = setup();
        let auth = signup(&app.server, "r@example.com").await;

        let response = app
            .server
            .post("/api/issues")
            .authorization_bearer(&auth.token)
            .json(&json!({
                "title": "Pothole",
                "description": "Deep",
                "location": "Oak St",
                "image": "/uploads/someone-else.png",
            }))
            .await;

        response.assert_status(StatusCode::CREATED);
        assert!(response.json::<Issue>().image.is_none());
    }

    #[tokio::test]
    async fn multipart_without_photo_has_no_image() {
        let app = setup();
        let auth = signup(&app.server, "r@example.com").await;

        let form = MultipartForm::new()
            .add_text("title", "Broken swing")
            .add_text("description", "Chain snapped")
            .add_text("location", "Central Park");

        let response = app
            .server
            .post("/api/issues")
            .authorization_bearer(&auth.token)
            .multipart(form)
            .await;

        response.assert_status(StatusCode::CREATED);
        let issue: Issue = response.json();
        assert_eq!(issue.severity, Severity::Medium);
        assert!(issue.image.is_none());
    }

    #[tokio::test]
    async fn rejects_missing_location() {
        let app = setup();
        let auth = signup(&app.server, "r@example.com").await;

        let response = app
            .server
            .post("/api/issues")
            .authorization_bearer(&auth.token)
            .json(&CreateIssueInput {
                title: "Pothole".to_string(),
                description: "Deep".to_string(),
                location: "".to_string(),
                image: None,
            })
            .await;

        response.assert_status_bad_request();
        assert_eq!(msg(&response), "location is required");
    }
}

mod list_issues {
    use super::*;

    #[tokio::test]
    async fn returns_all_issues_newest_first() {
        let app = setup();
        let auth = signup(&app.server, "r@example.com").await;
        report(&app.server, &auth, "First", "plain").await;
        report(&app.server, &auth, "Second", "plain").await;

        let response = app.server.get("/api/issues").await;
        response.assert_status_ok();
        let issues: Vec<Issue> = response.json();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].title, "Second");
        assert_eq!(issues[1].title, "First");
    }

    #[tokio::test]
    async fn high_lists_only_high_severity() {
        let app = setup();
        let auth = signup(&app.server, "r@example.com").await;
        report(&app.server, &auth, "Fire hydrant leaking", "").await;
        report(&app.server, &auth, "Broken bench", "wobbly").await;
        report(&app.server, &auth, "Graffiti", "on the wall").await;

        let issues: Vec<Issue> = app.server.get("/api/issues/high").await.json();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn filters_by_query_parameters() {
        let app = setup();
        let auth = signup(&app.server, "r@example.com").await;
        report(&app.server, &auth, "Broken bench", "wobbly").await;
        report(&app.server, &auth, "Graffiti", "on the wall").await;

        let issues: Vec<Issue> = app.server.get("/api/issues?severity=Medium").await.json();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].title, "Broken bench");

        let issues: Vec<Issue> = app.server.get("/api/issues?status=Open&limit=1").await.json();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].title, "Graffiti");
    }

    #[tokio::test]
    async fn invalid_query_parameter_is_a_json_error() {
        let app = setup();

        let response = app.server.get("/api/issues?limit=lots").await;
        response.assert_status_bad_request();
        assert!(!msg(&response).is_empty());
    }

    #[tokio::test]
    async fn mine_lists_only_my_issues() {
        let app = setup();
        let alice = signup(&app.server, "alice@example.com").await;
        let bob = signup(&app.server, "bob@example.com").await;
        report(&app.server, &alice, "Alice's pothole", "deep").await;
        report(&app.server, &bob, "Bob's pothole", "deeper").await;

        let response = app
            .server
            .get("/api/issues/mine")
            .authorization_bearer(&alice.token)
            .await;
        response.assert_status_ok();
        let issues: Vec<Issue> = response.json();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].user.id, alice.user.id);
    }

    #[tokio::test]
    async fn resolved_requires_admin() {
        let app = setup();
        let citizen = signup(&app.server, "c@example.com").await;
        let admin = signup_admin(&app, "admin@example.com").await;
        let issue = report(&app.server, &citizen, "Pothole", "deep").await;
        report(&app.server, &citizen, "Graffiti", "wall").await;

        app.server
            .patch(&format!("/api/issues/{}/status", issue.id))
            .authorization_bearer(&admin.token)
            .json(&json!({ "status": "Resolved" }))
            .await
            .assert_status_ok();

        let response = app
            .server
            .get("/api/issues/resolved")
            .authorization_bearer(&citizen.token)
            .await;
        response.assert_status_forbidden();
        assert_eq!(msg(&response), "Not admin");

        for path in ["/api/issues/resolved", "/api/issues/success"] {
            let issues: Vec<Issue> = app
                .server
                .get(path)
                .authorization_bearer(&admin.token)
                .await
                .json();
            assert_eq!(issues.len(), 1);
            assert_eq!(issues[0].id, issue.id);
        }
    }
}

mod get_issue {
    use super::*;

    #[tokio::test]
    async fn returns_issue_by_id() {
        let app = setup();
        let auth = signup(&app.server, "r@example.com").await;
        let issue = report(&app.server, &auth, "Pothole", "deep").await;

        let response = app.server.get(&format!("/api/issues/{}", issue.id)).await;
        response.assert_status_ok();
        assert_eq!(response.json::<Issue>().title, "Pothole");
    }

    #[tokio::test]
    async fn returns_404_for_unknown_issue() {
        let app = setup();

        let response = app.server.get(&format!("/api/issues/{}", Uuid::new_v4())).await;
        response.assert_status_not_found();
        assert_eq!(msg(&response), "Issue not found");
    }

    #[tokio::test]
    async fn malformed_id_is_a_json_bad_request() {
        let app = setup();

        let response = app.server.get("/api/issues/not-a-uuid").await;
        response.assert_status_bad_request();
        assert!(!msg(&response).is_empty());
    }
}

mod update_issue {
    use super::*;

    #[tokio::test]
    async fn owner_edit_reclassifies() {
        let app = setup();
        let auth = signup(&app.server, "r@example.com").await;
        let issue = report(&app.server, &auth, "Streetlight out", "Dark corner").await;
        assert_eq!(issue.severity, Severity::Low);

        let response = app
            .server
            .put(&format!("/api/issues/{}", issue.id))
            .authorization_bearer(&auth.token)
            .json(&UpdateIssueInput {
                description: Some("Dark corner, emergency crews can't see".to_string()),
                ..Default::default()
            })
            .await;

        response.assert_status_ok();
        assert_eq!(response.json::<Issue>().severity, Severity::High);
    }

    #[tokio::test]
    async fn other_users_cannot_edit() {
        let app = setup();
        let owner = signup(&app.server, "owner@example.com").await;
        let other = signup(&app.server, "other@example.com").await;
        let issue = report(&app.server, &owner, "Pothole", "deep").await;

        let response = app
            .server
            .put(&format!("/api/issues/{}", issue.id))
            .authorization_bearer(&other.token)
            .json(&UpdateIssueInput {
                title: Some("Hijacked".to_string()),
                ..Default::default()
            })
            .await;

        response.assert_status_forbidden();
    }

    #[tokio::test]
    async fn admins_can_edit_any_issue() {
        let app = setup();
        let owner = signup(&app.server, "owner@example.com").await;
        let admin = signup_admin(&app, "admin@example.com").await;
        let issue = report(&app.server, &owner, "Pothole", "deep").await;

        let response = app
            .server
            .put(&format!("/api/issues/{}", issue.id))
            .authorization_bearer(&admin.token)
            .json(&UpdateIssueInput {
                title: Some("Hazardous pothole".to_string()),
                ..Default::default()
            })
            .await;

        response.assert_status_ok();
        let updated: Issue = response.json();
        assert_eq!(updated.title, "Hazardous pothole");
        assert_eq!(updated.severity, Severity::High);
    }
}

mod upvotes_and_comments {
    use super::*;

    #[tokio::test]
    async fn upvoting_twice_is_rejected() {
        let app = setup();
        let reporter = signup(&app.server, "r@example.com").await;
        let voter = signup(&app.server, "v@example.com").await;
        let issue = report(&app.server, &reporter, "Pothole", "deep").await;
        let path = format!("/api/issues/{}/upvote", issue.id);

        let response = app.server.patch(&path).authorization_bearer(&voter.token).await;
        response.assert_status_ok();
        assert_eq!(response.json::<Issue>().upvotes, vec![voter.user.id]);

        let response = app.server.patch(&path).authorization_bearer(&voter.token).await;
        response.assert_status_bad_request();
        assert_eq!(msg(&response), "Already upvoted");
    }

    #[tokio::test]
    async fn upvoting_unknown_issue_is_404() {
        let app = setup();
        let voter = signup(&app.server, "v@example.com").await;

        app.server
            .patch(&format!("/api/issues/{}/upvote", Uuid::new_v4()))
            .authorization_bearer(&voter.token)
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn comments_are_appended_with_author() {
        let app = setup();
        let reporter = signup(&app.server, "r@example.com").await;
        let neighbour = signup(&app.server, "neighbour@example.com").await;
        let issue = report(&app.server, &reporter, "Pothole", "deep").await;

        let response = app
            .server
            .post(&format!("/api/issues/{}/comments", issue.id))
            .authorization_bearer(&neighbour.token)
            .json(&AddCommentInput {
                message: "Nearly lost a tyre here".to_string(),
            })
            .await;

        response.assert_status_ok();
        let updated: Issue = response.json();
        assert_eq!(updated.comments.len(), 1);
        assert_eq!(updated.comments[0].message, "Nearly lost a tyre here");
        assert_eq!(updated.comments[0].user.name, "neighbour");
    }
}

mod status {
    use super::*;

    #[tokio::test]
    async fn citizens_cannot_change_status() {
        let app = setup();
        let citizen = signup(&app.server, "c@example.com").await;
        let issue = report(&app.server, &citizen, "Pothole", "deep").await;

        let response = app
            .server
            .patch(&format!("/api/issues/{}/status", issue.id))
            .authorization_bearer(&citizen.token)
            .json(&json!({ "status": "Resolved" }))
            .await;

        response.assert_status_forbidden();
        assert_eq!(msg(&response), "Not admin");
    }

    #[tokio::test]
    async fn admin_moves_issue_in_progress() {
        let app = setup();
        let citizen = signup(&app.server, "c@example.com").await;
        let admin = signup_admin(&app, "admin@example.com").await;
        let issue = report(&app.server, &citizen, "Pothole", "deep").await;

        let response = app
            .server
            .patch(&format!("/api/issues/{}/status", issue.id))
            .authorization_bearer(&admin.token)
            .json(&json!({ "status": "In Progress" }))
            .await;

        response.assert_status_ok();
        assert_eq!(response.json::<Issue>().status, IssueStatus::InProgress);
    }
}

mod cors {
    use super::*;
    use axum::http::{header, HeaderValue, Method};

    #[tokio::test]
    async fn preflight_allows_only_routed_methods() {
        let db = Database::open_memory().expect("Failed to create database");
        db.migrate().expect("Failed to migrate");
        let uploads = tempfile::tempdir().expect("Failed to create upload dir");
        let state = AppState {
            cors_origins: Some(vec!["http://localhost:3000".to_string()]),
            ..AppState::new(db, SeverityRules::default(), UploadStore::new(uploads.path()))
        };
        let server = TestServer::new(create_router(state)).expect("Failed to create test server");

        let response = server
            .method(Method::OPTIONS, "/api/issues")
            .add_header(header::ORIGIN, HeaderValue::from_static("http://localhost:3000"))
            .add_header(
                header::ACCESS_CONTROL_REQUEST_METHOD,
                HeaderValue::from_static("PATCH"),
            )
            .await;

        response.assert_status_ok();
        let allowed = response.header(header::ACCESS_CONTROL_ALLOW_METHODS);
        let allowed = allowed.to_str().expect("header is not ASCII");
        assert!(allowed.contains("PATCH"));
        assert!(!allowed.contains("DELETE"));
        assert_eq!(
            response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            "http://localhost:3000"
        );
    }
}
