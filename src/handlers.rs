use crate::{
    AppState,
    auth::{AuthUser, CSRF_COOKIE, CsrfToken, REMEMBER_ME_COOKIE, SESSION_COOKIE, expire_cookie},
    error::AppError,
    models::{DoctorForm, DoctorListing, PageParams, PageRequest, Specialty},
    security::CSRF_PARAM,
    service::ServiceError,
    views::{PAGINA_CADASTRO, PAGINA_INICIAL, PAGINA_LISTAGEM, PAGINA_LOGIN, REDIRECT_LISTAGEM, View},
};
use axum::{
    Form, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;

// --- Query / Form Structs ---

/// ListParams
///
/// Query parameters of the listing page: paging plus the `sucesso` flag set by the
/// post-mutation redirect (`/medicos?sucesso`).
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub size: Option<u32>,
    pub sucesso: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FormParams {
    pub id: Option<i64>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DeleteParams {
    /// Id of the doctor to delete.
    pub id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginParams {
    pub error: Option<String>,
    pub logout: Option<String>,
}

/// LoginForm
///
/// The login form fields. The password is only handed to the password encoder; it is
/// never logged.
#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(rename = "remember-me")]
    pub remember_me: Option<String>,
}

/// Every doctor view carries the specialty list and the CSRF token.
fn medico_view(name: &'static str, csrf: &CsrfToken) -> View {
    View::new(name)
        .with("especialidades", Specialty::ALL)
        .with(CSRF_PARAM, csrf.as_str())
}

// --- Doctor Handlers ---

/// carregar_pagina_listagem
///
/// [ATENDENTE, PACIENTE] Paged doctor listing.
pub async fn carregar_pagina_listagem(
    usuario: AuthUser,
    csrf: CsrfToken,
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<View, AppError> {
    let page = PageRequest::from(PageParams {
        page: params.page,
        size: params.size,
    });
    let medicos = state.doctors.listar(page).await?;

    let mut view = medico_view(PAGINA_LISTAGEM, &csrf)
        .with("medicos", &medicos)
        .with("usuario", &usuario);
    if params.sucesso.is_some() {
        view = view.with("sucesso", true);
    }
    Ok(view)
}

/// carregar_pagina_cadastro
///
/// [ATENDENTE] Create/edit form. With `?id=` the existing record is loaded (404 when
/// unknown); without it the form starts empty with no id.
pub async fn carregar_pagina_cadastro(
    csrf: CsrfToken,
    State(state): State<AppState>,
    Query(params): Query<FormParams>,
) -> Result<View, AppError> {
    let dados = match params.id {
        Some(id) => DoctorForm::from(state.doctors.carregar_por_id(id).await?),
        None => DoctorForm::default(),
    };
    Ok(medico_view(PAGINA_CADASTRO, &csrf).with("dados", &dados))
}

/// cadastrar
///
/// [ATENDENTE] Create or update. Validation runs first and short-circuits without
/// touching the service; a business-rule rejection re-renders the form with `erro`.
/// Both paths echo the submitted values back as `dados`.
pub async fn cadastrar(
    csrf: CsrfToken,
    State(state): State<AppState>,
    Form(dados): Form<DoctorForm>,
) -> Result<Response, AppError> {
    let registration = match dados.validate() {
        Ok(registration) => registration,
        Err(erros) => {
            return Ok(medico_view(PAGINA_CADASTRO, &csrf)
                .with("dados", &dados)
                .with("erros", &erros)
                .into_response());
        }
    };

    match state.doctors.cadastrar(&registration).await {
        Ok(()) => Ok(Redirect::to(REDIRECT_LISTAGEM).into_response()),
        Err(ServiceError::BusinessRule(erro)) => {
            tracing::info!(reason = %erro, "doctor registration rejected");
            Ok(medico_view(PAGINA_CADASTRO, &csrf)
                .with("erro", &erro)
                .with("dados", &dados)
                .into_response())
        }
        Err(e) => Err(e.into()),
    }
}

/// excluir
///
/// [ATENDENTE] Deletes a doctor and returns to the listing.
#[utoipa::path(
    delete,
    path = "/medicos",
    params(DeleteParams),
    responses(
        (status = 303, description = "Deleted, redirect to the listing"),
        (status = 403, description = "Role not allowed or missing CSRF token"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn excluir(
    State(state): State<AppState>,
    Query(params): Query<DeleteParams>,
) -> Result<Redirect, AppError> {
    state.doctors.excluir(params.id).await?;
    Ok(Redirect::to(REDIRECT_LISTAGEM))
}

/// listar_medicos_por_especialidade
///
/// [Authenticated] JSON list of doctors with the given specialty. The path value is
/// matched case-sensitively; an unknown value is a 400.
#[utoipa::path(
    get,
    path = "/medicos/{especialidade}",
    params(("especialidade" = String, Path, description = "Specialty, e.g. CARDIOLOGIA")),
    responses(
        (status = 200, description = "Doctors with this specialty", body = [DoctorListing]),
        (status = 400, description = "Unrecognized especialidade")
    )
)]
pub async fn listar_medicos_por_especialidade(
    State(state): State<AppState>,
    Path(especialidade): Path<String>,
) -> Result<Json<Vec<DoctorListing>>, AppError> {
    let especialidade = especialidade.parse::<Specialty>()?;
    let medicos = state.doctors.listar_por_especialidade(especialidade).await?;
    Ok(Json(medicos))
}

// --- Authentication Handlers ---

/// [Public] Login page. `?error` and `?logout` become flags in the model.
pub async fn carregar_pagina_login(
    csrf: CsrfToken,
    Query(params): Query<LoginParams>,
) -> View {
    View::new(PAGINA_LOGIN)
        .with(CSRF_PARAM, csrf.as_str())
        .with("error", params.error.is_some())
        .with("logout", params.logout.is_some())
}

/// Runs CPU-bound work (bcrypt) off the async workers. A task that panics or is
/// cancelled is an internal error, never a silent `false`.
pub async fn run_blocking<T, F>(task: F) -> Result<T, AppError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| AppError::Internal(format!("blocking task failed: {e}")))
}

/// efetuar_login
///
/// [Public] Form login. On success issues the session cookie (and the remember-me cookie
/// when `remember-me` is ticked), rotates the CSRF token and redirects home. Any failure
/// redirects to `/login?error` without saying which credential was wrong.
pub async fn efetuar_login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let policy = &state.policy;
    let user = state.repo.find_user_by_email(form.username.trim()).await?;

    let authenticated = match user {
        Some(user) => {
            let encoder = policy.password_encoder;
            let hash = user.senha.clone();
            let password = form.password;
            let matched = run_blocking(move || encoder.matches(&password, &hash)).await?;
            matched.then_some(user)
        }
        None => None,
    };

    let Some(user) = authenticated else {
        tracing::warn!(username = %form.username, "login failed");
        return Ok(Redirect::to(&policy.login_failure_url).into_response());
    };

    let session = policy
        .session
        .issue(user.id)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let mut headers = HeaderMap::new();
    if let Some(cookie) = policy.session_cookie(&session) {
        headers.append(header::SET_COOKIE, cookie);
    }

    let remember = form
        .remember_me
        .as_deref()
        .is_some_and(|value| matches!(value, "on" | "true" | "yes" | "1"));
    if remember {
        let token = policy
            .remember_me
            .issue_bound(&user)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        if let Some(cookie) = policy.remember_me_cookie(&token) {
            headers.append(header::SET_COOKIE, cookie);
        }
    }

    if let Some(cookie) = policy.csrf_cookie(&CsrfToken::generate()) {
        headers.append(header::SET_COOKIE, cookie);
    }

    tracing::info!(user_id = user.id, role = %user.perfil, remember, "login succeeded");
    Ok((headers, Redirect::to(&policy.default_success_url)).into_response())
}

/// [Public] Clears the session, remember-me and CSRF cookies and returns to the login page.
pub async fn efetuar_logout(State(state): State<AppState>) -> Response {
    let policy = &state.policy;
    let mut headers = HeaderMap::new();
    for name in [SESSION_COOKIE, REMEMBER_ME_COOKIE, CSRF_COOKIE] {
        if let Some(cookie) = expire_cookie(name, policy.secure_cookies) {
            headers.append(header::SET_COOKIE, cookie);
        }
    }
    tracing::debug!("logout");
    (headers, Redirect::to(&policy.logout_success_url)).into_response()
}

/// [Authenticated] Home page.
pub async fn carregar_pagina_inicial(usuario: AuthUser, csrf: CsrfToken) -> View {
    View::new(PAGINA_INICIAL)
        .with("usuario", &usuario)
        .with(CSRF_PARAM, csrf.as_str())
}
