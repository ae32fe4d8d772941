use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Map, Value};

pub const PAGINA_LISTAGEM: &str = "medico/listagem-medicos";
pub const PAGINA_CADASTRO: &str = "medico/formulario-medico";
pub const PAGINA_LOGIN: &str = "autenticacao/login";
pub const PAGINA_INICIAL: &str = "index";
pub const REDIRECT_LISTAGEM: &str = "/medicos?sucesso";

/// View
///
/// A server-side page: a template name plus the model the template is rendered with.
/// Rendering itself belongs to the template layer in front of this service, so the
/// response is the JSON envelope `{ "view": ..., "model": {...} }` with the template
/// name repeated in the `x-view-name` header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct View {
    pub view: &'static str,
    pub model: Map<String, Value>,
}

impl View {
    pub fn new(view: &'static str) -> Self {
        Self {
            view,
            model: Map::new(),
        }
    }

    /// Adds a model attribute. Values that fail to serialize are stored as `null`.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or_else(|e| {
            tracing::error!(error = %e, attribute = key, "model attribute is not serializable");
            Value::Null
        });
        self.model.insert(key.to_string(), value);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.model.get(key)
    }
}

impl IntoResponse for View {
    fn into_response(self) -> Response {
        let name = HeaderValue::from_static(self.view);
        let mut response = (StatusCode::OK, Json(self)).into_response();
        response.headers_mut().insert("x-view-name", name);
        response
    }
}
