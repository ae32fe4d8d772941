use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};
use ts_rs::TS;
use utoipa::ToSchema;

// --- Enumerations ---

/// Role
///
/// The single authorization attribute carried by every principal (`perfil` column).
/// Serialized with the upper-case labels used in the database and the views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum Role {
    /// Front-desk staff. The only role allowed to manage doctor records.
    Atendente,
    Medico,
    /// Patients may browse the doctor listing but never mutate it.
    Paciente,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Atendente => "ATENDENTE",
            Role::Medico => "MEDICO",
            Role::Paciente => "PACIENTE",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ATENDENTE" => Ok(Role::Atendente),
            "MEDICO" => Ok(Role::Medico),
            "PACIENTE" => Ok(Role::Paciente),
            other => Err(UnknownVariant {
                kind: "perfil",
                value: other.to_string(),
            }),
        }
    }
}

/// Specialty
///
/// The fixed set of medical specialties (`Especialidade`). Every doctor view exposes
/// the full list under `especialidades` so forms can populate their select box.
///
/// Parsing is **case-sensitive**: `"CARDIOLOGIA"` is accepted, `"cardiologia"` is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum Specialty {
    Ortopedia,
    Cardiologia,
    Ginecologia,
    Dermatologia,
}

impl Specialty {
    pub const ALL: [Specialty; 4] = [
        Specialty::Ortopedia,
        Specialty::Cardiologia,
        Specialty::Ginecologia,
        Specialty::Dermatologia,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Specialty::Ortopedia => "ORTOPEDIA",
            Specialty::Cardiologia => "CARDIOLOGIA",
            Specialty::Ginecologia => "GINECOLOGIA",
            Specialty::Dermatologia => "DERMATOLOGIA",
        }
    }
}

impl fmt::Display for Specialty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Specialty {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Specialty::ALL
            .into_iter()
            .find(|specialty| specialty.as_str() == value)
            .ok_or_else(|| UnknownVariant {
                kind: "especialidade",
                value: value.to_string(),
            })
    }
}

/// Raised when a string does not name any variant of one of the enumerations above.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

// --- Principal ---

/// User
///
/// A row of the `usuarios` table. `senha` holds the bcrypt hash and is never serialized;
/// the `Debug` output redacts it as well.
#[derive(Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub nome: String,
    pub email: String,
    pub senha: String,
    pub perfil: Role,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("nome", &self.nome)
            .field("email", &self.email)
            .field("senha", &"<redacted>")
            .field("perfil", &self.perfil)
            .finish()
    }
}

// --- Doctor payloads ---

/// DoctorForm
///
/// The raw create/edit form exactly as the browser submitted it. Every field is kept as
/// text so that invalid input can be echoed back to the form untouched. Unknown form
/// fields (such as `_csrf`) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct DoctorForm {
    pub id: String,
    pub nome: String,
    pub email: String,
    pub telefone: String,
    pub crm: String,
    pub especialidade: String,
}

/// DoctorRegistration
///
/// Validated input for `cadastrar`. `id` is `None` when creating and `Some` when editing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DoctorRegistration {
    pub id: Option<i64>,
    pub nome: String,
    pub email: String,
    pub telefone: String,
    pub crm: String,
    pub especialidade: Specialty,
}

impl From<DoctorRegistration> for DoctorForm {
    fn from(data: DoctorRegistration) -> Self {
        Self {
            id: data.id.map(|id| id.to_string()).unwrap_or_default(),
            nome: data.nome,
            email: data.email,
            telefone: data.telefone,
            crm: data.crm,
            especialidade: data.especialidade.to_string(),
        }
    }
}

const MSG_NOT_BLANK: &str = "não deve estar em branco";
const MSG_NOT_NULL: &str = "não deve ser nulo";
const MSG_EMAIL: &str = "deve ser um endereço de e-mail bem formado";
const MSG_CRM: &str = "deve conter de 4 a 6 dígitos";
const MSG_INVALID: &str = "valor inválido";

// Column widths of the `medicos` table.
pub const MAX_NOME_LEN: usize = 100;
pub const MAX_EMAIL_LEN: usize = 100;
pub const MAX_TELEFONE_LEN: usize = 20;

impl DoctorForm {
    /// Applies the declarative constraints of the registration payload.
    ///
    /// Returns the typed registration when every field passes, or the full set of field
    /// errors otherwise. No partial result is produced.
    pub fn validate(&self) -> Result<DoctorRegistration, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let id = match self.id.trim() {
            "" => None,
            raw => match raw.parse::<i64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    errors.add("id", MSG_INVALID);
                    None
                }
            },
        };

        if self.nome.trim().is_empty() {
            errors.add("nome", MSG_NOT_BLANK);
        } else {
            errors.check_max_len("nome", self.nome.trim(), MAX_NOME_LEN);
        }

        if self.email.trim().is_empty() {
            errors.add("email", MSG_NOT_BLANK);
        } else if !is_well_formed_email(self.email.trim()) {
            errors.add("email", MSG_EMAIL);
        } else {
            errors.check_max_len("email", self.email.trim(), MAX_EMAIL_LEN);
        }

        if self.telefone.trim().is_empty() {
            errors.add("telefone", MSG_NOT_BLANK);
        } else {
            errors.check_max_len("telefone", self.telefone.trim(), MAX_TELEFONE_LEN);
        }

        let crm = self.crm.trim();
        if crm.is_empty() {
            errors.add("crm", MSG_NOT_BLANK);
        } else if !(4..=6).contains(&crm.len()) || !crm.bytes().all(|b| b.is_ascii_digit()) {
            errors.add("crm", MSG_CRM);
        }

        let especialidade = match self.especialidade.trim() {
            "" => {
                errors.add("especialidade", MSG_NOT_NULL);
                None
            }
            raw => match raw.parse::<Specialty>() {
                Ok(specialty) => Some(specialty),
                Err(_) => {
                    errors.add("especialidade", MSG_INVALID);
                    None
                }
            },
        };

        match especialidade {
            Some(especialidade) if errors.is_empty() => Ok(DoctorRegistration {
                id,
                nome: self.nome.trim().to_string(),
                email: self.email.trim().to_string(),
                telefone: self.telefone.trim().to_string(),
                crm: crm.to_string(),
                especialidade,
            }),
            _ => Err(errors),
        }
    }
}

/// Minimal structural check: one `@`, non-empty local part, a dotted domain, no spaces.
fn is_well_formed_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Field name -> messages. Ordered so views render errors deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn add(&mut self, field: &str, message: &str) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    /// Lengths are counted in characters, as the `VARCHAR(n)` columns count them.
    fn check_max_len(&mut self, field: &str, value: &str, max: usize) {
        if value.chars().count() > max {
            self.add(field, &format!("o tamanho deve ser entre 1 e {max}"));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn field(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }
}

/// DoctorListing
///
/// Read-only projection used by the listing page and the specialty JSON endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct DoctorListing {
    pub id: i64,
    pub nome: String,
    pub email: String,
    pub telefone: String,
    pub crm: String,
    pub especialidade: Specialty,
}

// --- Pagination ---

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 2000;

/// Query parameters accepted by paged endpoints (`?page=&size=`).
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    /// Zero-based page number.
    pub page: Option<u32>,
    /// Page size, clamped to 1..=2000. Defaults to 10.
    pub size: Option<u32>,
}

/// A normalized page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl From<PageParams> for PageRequest {
    fn from(params: PageParams) -> Self {
        Self {
            page: params.page.unwrap_or(0),
            size: params
                .size
                .unwrap_or(DEFAULT_PAGE_SIZE)
                .clamp(1, MAX_PAGE_SIZE),
        }
    }
}

impl PageRequest {
    pub fn offset(&self) -> i64 {
        i64::from(self.page) * i64::from(self.size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.size)
    }
}

/// One page of results plus the totals the listing view needs for its pager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub number: u32,
    pub size: u32,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: PageRequest, total_elements: u64) -> Self {
        let size = u64::from(request.size);
        Self {
            content,
            number: request.page,
            size: request.size,
            total_elements,
            total_pages: total_elements.div_ceil(size),
        }
    }
}
