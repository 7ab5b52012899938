//! Drives the full router over an in-memory store, so no database is needed.

#![allow(clippy::unwrap_used, clippy::panic)]

use async_trait::async_trait;
use axum::{body::Bytes, http::StatusCode};
use axum_test::TestServer;
use matricula::{
    auth::{TokenDigest, generate_access_token, hash_password},
    data::{UserStore, memory::MemoryStore, user::{AddUserForm, Role}},
    error::{MatriculaError, MatriculaResult},
    notify::{LogSink, NotificationSink, Notifier, StatusChange},
    router,
    state::MatriculaState,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use std::sync::Arc;

const PASSWORD: &str = "password";

struct TestApp {
    server: TestServer,
    store: Arc<MemoryStore>,
}

impl TestApp {
    fn new(notifier: Notifier) -> Self {
        let store = Arc::new(MemoryStore::default());
        let state = MatriculaState::new(store.clone(), notifier);
        Self {
            server: TestServer::new(router(state)).unwrap(),
            store,
        }
    }

    async fn user(&self, email: &str, role: Role) -> String {
        let user = self
            .store
            .insert_user(AddUserForm {
                name: role.to_string(),
                email: email.parse().unwrap(),
                bcrypt_hashed_password: hash_password(SecretString::from(PASSWORD), 4)
                    .await
                    .unwrap(),
                role,
            })
            .await
            .unwrap();

        let token = generate_access_token();
        self.store
            .set_access_token(user.id, Some(&TokenDigest::of(&token)))
            .await
            .unwrap();
        token.expose_secret().to_string()
    }

    async fn gestor(&self) -> String {
        self.user("gestor@test.com", Role::Gestor).await
    }

    async fn funcionario(&self) -> String {
        self.user("funcionario@test.com", Role::Funcionario).await
    }

    async fn create(&self, token: &str, body: &Value) -> Value {
        let response = self
            .server
            .post("/api/alunos")
            .authorization_bearer(token)
            .json(body)
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json::<Value>()["data"].clone()
    }
}

fn app() -> TestApp {
    TestApp::new(Notifier::spawn(LogSink))
}

fn student(nome: &str, cpf: &str, status: &str) -> Value {
    json!({
        "nome": nome,
        "cpf": cpf,
        "data_nascimento": "1995-05-15",
        "turma": "Turma A",
        "email": "aluno@test.com",
        "status": status,
    })
}

fn error_fields(body: &Value) -> Vec<&str> {
    body["errors"]
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect()
}

#[tokio::test]
async fn requests_without_a_valid_token_are_unauthenticated() {
    let app = app();

    app.server
        .get("/api/alunos")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    app.server
        .get("/api/alunos")
        .authorization_bearer("not-a-real-token")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    app.server
        .get("/api/user")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let response = app
        .server
        .post("/api/alunos")
        .json(&student("Ana Costa", "55566677788", "Pendente"))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["message"], "Unauthenticated.");
}

#[tokio::test]
async fn login_issues_a_token_that_logout_revokes() {
    let app = app();
    app.gestor().await;

    let response = app
        .server
        .post("/api/login")
        .json(&json!({"email": "gestor@test.com", "password": "wrong"}))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    let response = app
        .server
        .post("/api/login")
        .json(&json!({"email": "gestor@test.com", "password": PASSWORD}))
        .await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["user"]["perfil"], "Gestor");
    assert!(body["user"].get("bcrypt_hashed_password").is_none());
    let token = body["access_token"].as_str().unwrap().to_string();

    let stored = app
        .store
        .get_by_email(&"gestor@test.com".parse().unwrap())
        .await
        .unwrap()
        .unwrap();
    let digest = stored.access_token.unwrap();
    assert_eq!(digest, TokenDigest::of(&SecretString::from(token.as_str())));
    assert_ne!(digest.as_str(), token);

    let me = app.server.get("/api/user").authorization_bearer(&token).await;
    me.assert_status_ok();
    assert_eq!(me.json::<Value>()["data"]["email"], "gestor@test.com");

    app.server
        .post("/api/logout")
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::NO_CONTENT);
    app.server
        .get("/api/user")
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_validates_its_fields() {
    let app = app();

    let response = app.server.post("/api/login").json(&json!({})).await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body = response.json::<Value>();
    assert_eq!(error_fields(&body), ["email", "password"]);

    app.gestor().await;
    let unknown = app
        .server
        .post("/api/login")
        .json(&json!({"email": "nobody@test.com", "password": PASSWORD}))
        .await;
    unknown.assert_status(StatusCode::UNAUTHORIZED);
    let wrong_password = app
        .server
        .post("/api/login")
        .json(&json!({"email": "gestor@test.com", "password": "wrong"}))
        .await;
    assert_eq!(
        unknown.json::<Value>()["message"],
        wrong_password.json::<Value>()["message"]
    );
}

#[tokio::test]
async fn students_round_trip_through_the_api() {
    let app = app();
    let token = app.gestor().await;

    let created = app
        .create(&token, &student("Ana Costa", "55566677788", "Pendente"))
        .await;
    assert_eq!(created["nome"], "Ana Costa");
    assert_eq!(created["data_nascimento"], "1995-05-15");
    assert_eq!(created["status"], "Pendente");
    assert_eq!(created["telefone"], Value::Null);
    let id = created["id"].as_str().unwrap().to_string();

    let response = app
        .server
        .get(&format!("/api/alunos/{id}"))
        .authorization_bearer(&token)
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["data"], created);

    let response = app
        .server
        .put(&format!("/api/alunos/{id}"))
        .authorization_bearer(&token)
        .json(&json!({"turma": "Turma B", "telefone": "11999999999"}))
        .await;
    response.assert_status_ok();
    let updated = response.json::<Value>();
    assert_eq!(updated["data"]["turma"], "Turma B");
    assert_eq!(updated["data"]["telefone"], "11999999999");
    assert_eq!(updated["data"]["nome"], "Ana Costa");
}

#[tokio::test]
async fn list_filters_by_name_and_cpf() {
    let app = app();
    let token = app.funcionario().await;
    app.create(&token, &student("Ana Costa", "55566677788", "Pendente"))
        .await;
    app.create(&token, &student("João Silva", "12345678901", "Aprovado"))
        .await;

    let all = app
        .server
        .get("/api/alunos")
        .authorization_bearer(&token)
        .await;
    all.assert_status_ok();
    assert_eq!(all.json::<Value>()["data"].as_array().unwrap().len(), 2);

    let by_name = app
        .server
        .get("/api/alunos")
        .add_query_param("nome", "ana")
        .authorization_bearer(&token)
        .await;
    let by_name = by_name.json::<Value>();
    let by_name = by_name["data"].as_array().unwrap();
    assert_eq!(by_name.len(), 1);
    assert_eq!(by_name[0]["nome"], "Ana Costa");

    let by_cpf = app
        .server
        .get("/api/alunos")
        .add_query_param("cpf", "12345678901")
        .authorization_bearer(&token)
        .await;
    let by_cpf = by_cpf.json::<Value>();
    let by_cpf = by_cpf["data"].as_array().unwrap();
    assert_eq!(by_cpf.len(), 1);
    assert_eq!(by_cpf[0]["nome"], "João Silva");
}

#[tokio::test]
async fn updates_keep_cpf_unique_except_for_the_student_itself() {
    let app = app();
    let token = app.funcionario().await;
    app.create(&token, &student("Ana Costa", "11111111111", "Pendente"))
        .await;
    let joao = app
        .create(&token, &student("João Silva", "22222222222", "Pendente"))
        .await;
    let path = format!("/api/alunos/{}", joao["id"].as_str().unwrap());

    let response = app
        .server
        .put(&path)
        .authorization_bearer(&token)
        .json(&json!({"cpf": "11111111111"}))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_fields(&response.json::<Value>()), ["cpf"]);

    let response = app
        .server
        .put(&path)
        .authorization_bearer(&token)
        .json(&json!({"cpf": "22222222222", "turma": "Turma C"}))
        .await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["data"]["cpf"], "22222222222");
    assert_eq!(body["data"]["turma"], "Turma C");
}

#[tokio::test]
async fn duplicate_cpf_is_rejected() {
    let app = app();
    let token = app.gestor().await;
    app.create(&token, &student("Ana Costa", "55566677788", "Pendente"))
        .await;

    let response = app
        .server
        .post("/api/alunos")
        .authorization_bearer(&token)
        .json(&student("Outra Pessoa", "55566677788", "Pendente"))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body = response.json::<Value>();
    assert_eq!(error_fields(&body), ["cpf"]);
    assert_eq!(body["errors"]["cpf"][0], "The cpf has already been taken.");
}

#[tokio::test]
async fn missing_fields_are_all_named() {
    let app = app();
    let token = app.gestor().await;

    let response = app
        .server
        .post("/api/alunos")
        .authorization_bearer(&token)
        .json(&json!({"email": "aluno@test.com"}))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body = response.json::<Value>();
    assert_eq!(
        error_fields(&body),
        ["cpf", "data_nascimento", "nome", "status", "turma"]
    );
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .ends_with("(and 4 more errors)")
    );
}

#[tokio::test]
async fn approved_students_cannot_be_cancelled() {
    let app = app();
    let token = app.gestor().await;
    let created = app
        .create(&token, &student("Ana Costa", "55566677788", "Pendente"))
        .await;
    let status_path = format!("/api/alunos/{}/status", created["id"].as_str().unwrap());

    for _ in 0..2 {
        let response = app
            .server
            .patch(&status_path)
            .authorization_bearer(&token)
            .json(&json!({"status": "Aprovado"}))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["data"]["status"], "Aprovado");
    }

    let response = app
        .server
        .patch(&status_path)
        .authorization_bearer(&token)
        .json(&json!({"status": "Cancelado"}))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        response.json::<Value>()["message"],
        "Cannot cancel an already-approved student."
    );

    let response = app
        .server
        .get(&format!("/api/alunos/{}", created["id"].as_str().unwrap()))
        .authorization_bearer(&token)
        .await;
    assert_eq!(response.json::<Value>()["data"]["status"], "Aprovado");
}

#[tokio::test]
async fn status_changes_only_accept_targets() {
    let app = app();
    let token = app.gestor().await;
    let created = app
        .create(&token, &student("Ana Costa", "55566677788", "Pendente"))
        .await;
    let status_path = format!("/api/alunos/{}/status", created["id"].as_str().unwrap());

    for status in [json!("Pendente"), json!("Arquivado"), Value::Null] {
        let response = app
            .server
            .patch(&status_path)
            .authorization_bearer(&token)
            .json(&json!({ "status": status }))
            .await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error_fields(&response.json::<Value>()), ["status"]);
    }
}

#[tokio::test]
async fn deleted_students_are_gone() {
    let app = app();
    let token = app.gestor().await;
    let created = app
        .create(&token, &student("Ana Costa", "55566677788", "Pendente"))
        .await;
    let path = format!("/api/alunos/{}", created["id"].as_str().unwrap());

    app.server
        .delete(&path)
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::NO_CONTENT);
    app.server
        .get(&path)
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::NOT_FOUND);
    app.server
        .delete(&path)
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::NOT_FOUND);
    app.server
        .get("/api/alunos/not-a-uuid")
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn funcionario_cannot_delete_or_change_status() {
    let app = app();
    let token = app.funcionario().await;
    let created = app
        .create(&token, &student("Ana Costa", "55566677788", "Pendente"))
        .await;
    let path = format!("/api/alunos/{}", created["id"].as_str().unwrap());

    let response = app.server.delete(&path).authorization_bearer(&token).await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(
        response.json::<Value>()["message"],
        "This action is unauthorized."
    );

    app.server
        .patch(&format!("{path}/status"))
        .authorization_bearer(&token)
        .json(&json!({"status": "Aprovado"}))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    app.server
        .put(&path)
        .authorization_bearer(&token)
        .json(&json!({"curso": "Engenharia"}))
        .await
        .assert_status_ok();

    let response = app.server.get(&path).authorization_bearer(&token).await;
    let body = response.json::<Value>();
    assert_eq!(body["data"]["status"], "Pendente");
    assert_eq!(body["data"]["curso"], "Engenharia");
}

#[tokio::test]
async fn updates_cannot_sneak_a_status_change() {
    let app = app();
    let token = app.gestor().await;
    let created = app
        .create(&token, &student("Ana Costa", "55566677788", "Aprovado"))
        .await;
    let path = format!("/api/alunos/{}", created["id"].as_str().unwrap());

    let response = app
        .server
        .put(&path)
        .authorization_bearer(&token)
        .json(&json!({"status": "Cancelado"}))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_fields(&response.json::<Value>()), ["status"]);
}

#[tokio::test]
async fn malformed_bodies_are_rejected() {
    let app = app();
    let token = app.gestor().await;

    let response = app
        .server
        .post("/api/alunos")
        .authorization_bearer(&token)
        .content_type("application/json")
        .bytes(Bytes::from_static(b"{not json"))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.json::<Value>()["message"].is_string());
}

#[tokio::test]
async fn unknown_routes_answer_with_json() {
    let app = app();

    let response = app.server.get("/api/turmas").await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["message"], "Not Found");
}

struct FailingSink;

#[async_trait]
impl NotificationSink for FailingSink {
    async fn deliver(&self, _change: &StatusChange) -> MatriculaResult<()> {
        Err(MatriculaError::NotificationDelivery {
            message: "mail server down".into(),
        })
    }
}

#[tokio::test]
async fn failing_notifications_do_not_affect_status_updates() {
    let app = TestApp::new(Notifier::spawn(FailingSink));
    let token = app.gestor().await;
    let created = app
        .create(&token, &student("Ana Costa", "55566677788", "Pendente"))
        .await;

    let response = app
        .server
        .patch(&format!(
            "/api/alunos/{}/status",
            created["id"].as_str().unwrap()
        ))
        .authorization_bearer(&token)
        .json(&json!({"status": "Aprovado"}))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["data"]["status"], "Aprovado");
}
