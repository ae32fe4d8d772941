use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Authenticated Router Module
///
/// Routes that require a session. Which roles may call each one is decided by the
/// security filter before the handler runs:
///
/// | Route                          | Roles                 |
/// |--------------------------------|-----------------------|
/// | `GET /medicos`                 | ATENDENTE, PACIENTE   |
/// | `POST`, `DELETE /medicos`      | ATENDENTE             |
/// | `GET /medicos/formulario`      | ATENDENTE             |
/// | `GET /medicos/{especialidade}` | any authenticated     |
/// | `GET /`                        | any authenticated     |
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /
        .route("/", get(handlers::carregar_pagina_inicial))
        // GET /medicos?page=&size=
        // POST /medicos (create or update, urlencoded form)
        // DELETE /medicos?id=
        .route(
            "/medicos",
            get(handlers::carregar_pagina_listagem)
                .post(handlers::cadastrar)
                .delete(handlers::excluir),
        )
        // GET /medicos/formulario[?id=]
        // Static segment; takes precedence over the `{especialidade}` capture below.
        .route("/medicos/formulario", get(handlers::carregar_pagina_cadastro))
        // GET /medicos/{especialidade}
        // JSON list, e.g. /medicos/CARDIOLOGIA.
        .route(
            "/medicos/{especialidade}",
            get(handlers::listar_medicos_por_especialidade),
        )
}
