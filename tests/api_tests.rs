mod common;

use clinic_portal::{
    AppState,
    auth::{TokenKind, TokenSigner},
    config::{DEFAULT_REMEMBER_ME_KEY, DEFAULT_REMEMBER_ME_VALIDITY_SECS},
    create_router,
    models::DoctorListing,
};
use common::{
    ATENDENTE_ID, CSRF, InMemoryRepo, MEDICO_ID, PACIENTE_ID, PASSWORD, create_test_state,
    csrf_only_cookie, remember_me_cookie, remember_me_header, seeded_repo, session_cookie,
};
use reqwest::{StatusCode, header};
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct TestApp {
    pub address: String,
    pub state: AppState,
    pub repo: Arc<InMemoryRepo>,
    pub client: reqwest::Client,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    fn cookie_for(&self, user_id: i64) -> String {
        session_cookie(&self.state, user_id)
    }
}

/// Serves the full router (security filter included) on a random local port, backed by
/// the in-memory repository. Redirects are not followed so tests can assert on them.
async fn spawn_app() -> TestApp {
    let repo = seeded_repo();
    let state = create_test_state(repo.clone());
    let router = create_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("Failed to build client");

    TestApp {
        address,
        state,
        repo,
        client,
    }
}

fn location(response: &reqwest::Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

fn set_cookies(response: &reqwest::Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect()
}

// --- Public surface ---

#[tokio::test]
async fn test_static_assets_are_public() {
    let app = spawn_app().await;

    let response = app.client.get(app.url("/css/app.css")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_login_page_is_public_and_issues_csrf_cookie() {
    let app = spawn_app().await;

    let response = app.client.get(app.url("/login?error")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-view-name"], "autenticacao/login");
    assert!(set_cookies(&response).iter().any(|c| c.starts_with("XSRF-TOKEN=")));

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["model"]["error"], true);
    assert_eq!(body["model"]["logout"], false);
    assert!(body["model"]["_csrf"].is_string());
}

#[tokio::test]
async fn test_anonymous_requests_redirect_to_login() {
    let app = spawn_app().await;

    for path in ["/", "/medicos", "/medicos/formulario", "/medicos/CARDIOLOGIA", "/nada"] {
        let response = app.client.get(app.url(path)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "path {path}");
        assert_eq!(location(&response), "/login", "path {path}");
    }
}

// --- Role decisions ---

#[tokio::test]
async fn test_paciente_can_list_but_not_mutate() {
    let app = spawn_app().await;
    let cookie = app.cookie_for(PACIENTE_ID);

    let list = app
        .client
        .get(app.url("/medicos"))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(list.status(), StatusCode::OK);
    assert_eq!(list.headers()["x-view-name"], "medico/listagem-medicos");

    let create = app
        .client
        .post(app.url("/medicos"))
        .header(header::COOKIE, &cookie)
        .form(&[
            ("_csrf", CSRF),
            ("nome", "Gina Gineco"),
            ("email", "gina@voll.med"),
            ("telefone", "61977776666"),
            ("crm", "778899"),
            ("especialidade", "GINECOLOGIA"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(create.status(), StatusCode::FORBIDDEN);

    let delete = app
        .client
        .delete(app.url("/medicos?id=42"))
        .header(header::COOKIE, &cookie)
        .header("x-xsrf-token", CSRF)
        .send()
        .await
        .unwrap();
    assert_eq!(delete.status(), StatusCode::FORBIDDEN);

    let form = app
        .client
        .get(app.url("/medicos/formulario"))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(form.status(), StatusCode::FORBIDDEN);

    assert_eq!(app.repo.write_count(), 0);
    assert_eq!(app.repo.doctors().len(), 3);
}

#[tokio::test]
async fn test_medico_is_denied_the_listing_but_not_the_specialty_lookup() {
    let app = spawn_app().await;
    let cookie = app.cookie_for(MEDICO_ID);

    let list = app
        .client
        .get(app.url("/medicos"))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(list.status(), StatusCode::FORBIDDEN);

    let lookup = app
        .client
        .get(app.url("/medicos/ORTOPEDIA"))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(lookup.status(), StatusCode::OK);
    let medicos: Vec<DoctorListing> = lookup.json().await.unwrap();
    assert_eq!(medicos.len(), 1);
    assert_eq!(medicos[0].nome, "Otto Orto");
}

#[tokio::test]
async fn test_head_requests_follow_the_get_rules() {
    let app = spawn_app().await;

    let medico = app
        .client
        .head(app.url("/medicos"))
        .header(header::COOKIE, app.cookie_for(MEDICO_ID))
        .send()
        .await
        .unwrap();
    assert_eq!(medico.status(), StatusCode::FORBIDDEN);
    assert!(medico.headers().get("x-view-name").is_none());

    let paciente = app
        .client
        .head(app.url("/medicos"))
        .header(header::COOKIE, app.cookie_for(PACIENTE_ID))
        .send()
        .await
        .unwrap();
    assert_eq!(paciente.status(), StatusCode::OK);

    let anonymous = app.client.head(app.url("/medicos/formulario")).send().await.unwrap();
    assert_eq!(anonymous.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&anonymous), "/login");
}

// --- ATENDENTE lifecycle ---

#[tokio::test]
async fn test_atendente_creates_a_doctor() {
    let app = spawn_app().await;

    let response = app
        .client
        .post(app.url("/medicos"))
        .header(header::COOKIE, app.cookie_for(ATENDENTE_ID))
        .form(&[
            ("_csrf", CSRF),
            ("id", ""),
            ("nome", "Gina Gineco"),
            ("email", "gina@voll.med"),
            ("telefone", "61977776666"),
            ("crm", "778899"),
            ("especialidade", "GINECOLOGIA"),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/medicos?sucesso");
    assert!(app.repo.doctors().iter().any(|d| d.crm == "778899"));
}

#[tokio::test]
async fn test_atendente_deletes_a_doctor_and_listing_omits_it() {
    let app = spawn_app().await;
    let cookie = app.cookie_for(ATENDENTE_ID);

    let delete = app
        .client
        .delete(app.url("/medicos?id=42"))
        .header(header::COOKIE, &cookie)
        .header("x-xsrf-token", CSRF)
        .send()
        .await
        .unwrap();
    assert_eq!(delete.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&delete), "/medicos?sucesso");

    let list = app
        .client
        .get(app.url("/medicos?sucesso"))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(list.status(), StatusCode::OK);

    let body: serde_json::Value = list.json().await.unwrap();
    assert_eq!(body["model"]["sucesso"], true);
    let ids: Vec<i64> = body["model"]["medicos"]["content"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![10, 11]);
    assert_eq!(body["model"]["usuario"]["role"], "ATENDENTE");
}

#[tokio::test]
async fn test_over_length_field_redisplays_the_form() {
    let app = spawn_app().await;
    let nome = "a".repeat(101);
    let telefone = "619".repeat(7);

    let response = app
        .client
        .post(app.url("/medicos"))
        .header(header::COOKIE, app.cookie_for(ATENDENTE_ID))
        .form(&[
            ("_csrf", CSRF),
            ("nome", nome.as_str()),
            ("email", "longo@voll.med"),
            ("telefone", telefone.as_str()),
            ("crm", "889900"),
            ("especialidade", "ORTOPEDIA"),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-view-name"], "medico/formulario-medico");
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["model"]["erros"]["nome"].is_array());
    assert!(body["model"]["erros"]["telefone"].is_array());
    assert_eq!(body["model"]["dados"]["nome"], nome);
    assert_eq!(app.repo.write_count(), 0);
}

#[tokio::test]
async fn test_delete_of_unknown_id_is_not_found() {
    let app = spawn_app().await;

    let response = app
        .client
        .delete(app.url("/medicos?id=999"))
        .header(header::COOKIE, app.cookie_for(ATENDENTE_ID))
        .header("x-xsrf-token", CSRF)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_specialty_lookup_rejects_unknown_values() {
    let app = spawn_app().await;
    let cookie = app.cookie_for(ATENDENTE_ID);

    let ok = app
        .client
        .get(app.url("/medicos/CARDIOLOGIA"))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    let medicos: Vec<DoctorListing> = ok.json().await.unwrap();
    assert_eq!(medicos.len(), 2);

    let bad = app
        .client
        .get(app.url("/medicos/NAOEXISTE"))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}

// --- CSRF ---

#[tokio::test]
async fn test_state_changing_request_without_csrf_token_is_forbidden() {
    let app = spawn_app().await;
    let cookie = app.cookie_for(ATENDENTE_ID);

    let missing = app
        .client
        .delete(app.url("/medicos?id=42"))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::FORBIDDEN);

    let wrong = app
        .client
        .delete(app.url("/medicos?id=42"))
        .header(header::COOKIE, &cookie)
        .header("x-xsrf-token", "forged")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::FORBIDDEN);

    assert!(app.repo.doctors().iter().any(|d| d.id == 42));
}

#[tokio::test]
async fn test_csrf_token_accepted_as_query_parameter() {
    let app = spawn_app().await;

    let response = app
        .client
        .delete(app.url(&format!("/medicos?id=11&_csrf={CSRF}")))
        .header(header::COOKIE, app.cookie_for(ATENDENTE_ID))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(app.repo.doctors().iter().all(|d| d.id != 11));
}

// --- Login / remember-me / logout ---

#[tokio::test]
async fn test_login_success_sets_session_and_redirects_home() {
    let app = spawn_app().await;

    let response = app
        .client
        .post(app.url("/login"))
        .header(header::COOKIE, csrf_only_cookie())
        .form(&[
            ("_csrf", CSRF),
            ("username", "ana@voll.med"),
            ("password", PASSWORD),
            ("remember-me", "on"),
        ])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
    let cookies = set_cookies(&response);
    assert!(cookies.iter().any(|c| c.starts_with("SESSION=") && c.contains("HttpOnly")));
    assert!(cookies.iter().any(|c| c.starts_with("remember-me=") && c.contains("Max-Age=604800")));
    assert!(cookies.iter().any(|c| c.starts_with("XSRF-TOKEN=")));
}

#[tokio::test]
async fn test_login_failure_redirects_with_error_flag() {
    let app = spawn_app().await;

    for (username, password) in [("ana@voll.med", "errada"), ("ninguem@voll.med", PASSWORD)] {
        let response = app
            .client
            .post(app.url("/login"))
            .header(header::COOKIE, csrf_only_cookie())
            .form(&[("_csrf", CSRF), ("username", username), ("password", password)])
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/login?error");
        assert!(set_cookies(&response).iter().all(|c| !c.starts_with("SESSION=")));
    }
}

#[tokio::test]
async fn test_remember_me_cookie_restores_the_session() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(app.url("/medicos"))
        .header(header::COOKIE, remember_me_cookie(&app.state, PACIENTE_ID).await)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).iter().any(|c| c.starts_with("SESSION=")));
}

#[tokio::test]
async fn test_remember_me_token_without_credential_binding_is_rejected() {
    let app = spawn_app().await;
    // Signed with the right key but not bound to the user's password hash.
    let signer = TokenSigner::new(
        DEFAULT_REMEMBER_ME_KEY,
        TokenKind::RememberMe,
        DEFAULT_REMEMBER_ME_VALIDITY_SECS,
    );
    let token = signer.issue(ATENDENTE_ID).unwrap();

    let response = app
        .client
        .get(app.url("/medicos/formulario"))
        .header(header::COOKIE, remember_me_header(&token))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
    let cookies = set_cookies(&response);
    assert!(cookies.iter().all(|c| !c.starts_with("SESSION=")));
    assert!(cookies.iter().any(|c| c.starts_with("remember-me=;") && c.contains("Max-Age=0")));
}

#[tokio::test]
async fn test_remember_me_token_is_revoked_by_a_password_change() {
    let app = spawn_app().await;
    let mut user = app.state.repo.find_user(ATENDENTE_ID).await.unwrap().unwrap();
    user.senha = "$2b$04$hash.from.before.the.password.was.changed".to_string();
    let token = app.state.policy.remember_me.issue_bound(&user).unwrap();

    let response = app
        .client
        .get(app.url("/medicos"))
        .header(header::COOKIE, remember_me_header(&token))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn test_tampered_remember_me_cookie_is_cleared() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(app.url("/medicos"))
        .header(header::COOKIE, "remember-me=not.a.token")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
    assert!(set_cookies(&response).iter().any(|c| c.starts_with("remember-me=;") && c.contains("Max-Age=0")));
}

#[tokio::test]
async fn test_logout_clears_cookies() {
    let app = spawn_app().await;

    let response = app
        .client
        .post(app.url("/logout"))
        .header(header::COOKIE, app.cookie_for(ATENDENTE_ID))
        .header("x-xsrf-token", CSRF)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login?logout");
    let cookies = set_cookies(&response);
    for name in ["SESSION=;", "remember-me=;", "XSRF-TOKEN=;"] {
        assert!(cookies.iter().any(|c| c.starts_with(name) && c.contains("Max-Age=0")), "{name}");
    }
}
