use crate::models::{
    DoctorListing, DoctorRegistration, Page, PageRequest, Role, Specialty, UnknownVariant, User,
};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;

/// RepositoryError
///
/// Failures surfaced by the persistence layer. Database details are logged by the HTTP
/// boundary and never returned to the client.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A stored enumeration value no longer matches any known variant.
    #[error("corrupt row: {0}")]
    CorruptRow(#[from] UnknownVariant),
    /// A write hit a unique constraint (named here) that another writer filled first.
    #[error("unique constraint violated: {0}")]
    Conflict(String),
}

/// Maps unique violations to `RepositoryError::Conflict`; every other error stays a
/// database error.
fn conflict_or_database(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return RepositoryError::Conflict(db.constraint().unwrap_or("unique").to_string());
        }
    }
    RepositoryError::Database(err)
}

/// Repository Trait
///
/// The persistence contract consumed by the doctor service and the security filter.
/// Handlers never talk to it directly; the service is the only writer of doctor rows.
///
/// **Send + Sync + async_trait** make `Arc<dyn Repository>` usable across Axum's
/// asynchronous task boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Doctors ---
    async fn list_doctors(&self, page: PageRequest) -> Result<Page<DoctorListing>, RepositoryError>;
    async fn find_doctor(&self, id: i64) -> Result<Option<DoctorRegistration>, RepositoryError>;
    async fn list_doctors_by_specialty(
        &self,
        specialty: Specialty,
    ) -> Result<Vec<DoctorListing>, RepositoryError>;
    /// True when another doctor (any id other than `excluding`) already uses the email or CRM.
    async fn doctor_conflicts(
        &self,
        email: &str,
        crm: &str,
        excluding: Option<i64>,
    ) -> Result<bool, RepositoryError>;
    /// Inserts a new doctor and returns its generated id. `data.id` is ignored.
    /// A duplicate email or CRM fails with `RepositoryError::Conflict`.
    async fn insert_doctor(&self, data: &DoctorRegistration) -> Result<i64, RepositoryError>;
    /// Overwrites the doctor `id`. Returns false when no such row exists; a duplicate email
    /// or CRM fails with `RepositoryError::Conflict`.
    async fn update_doctor(&self, id: i64, data: &DoctorRegistration) -> Result<bool, RepositoryError>;
    /// Returns false when no such row exists.
    async fn delete_doctor(&self, id: i64) -> Result<bool, RepositoryError>;

    // --- Users ---
    async fn find_user(&self, id: i64) -> Result<Option<User>, RepositoryError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;
}

/// RepositoryState
///
/// The concrete type used to share persistence access across the application state.
pub type RepositoryState = Arc<dyn Repository>;

// --- Raw rows ---

// Enumerations are stored as text and converted after fetching, so a bad value
// surfaces as `RepositoryError::CorruptRow` instead of a decode panic.

#[derive(Debug, FromRow)]
struct DoctorRow {
    id: i64,
    nome: String,
    email: String,
    telefone: String,
    crm: String,
    especialidade: String,
}

impl TryFrom<DoctorRow> for DoctorListing {
    type Error = UnknownVariant;

    fn try_from(row: DoctorRow) -> Result<Self, Self::Error> {
        Ok(Self {
            especialidade: row.especialidade.parse()?,
            id: row.id,
            nome: row.nome,
            email: row.email,
            telefone: row.telefone,
            crm: row.crm,
        })
    }
}

impl TryFrom<DoctorRow> for DoctorRegistration {
    type Error = UnknownVariant;

    fn try_from(row: DoctorRow) -> Result<Self, Self::Error> {
        Ok(Self {
            especialidade: row.especialidade.parse()?,
            id: Some(row.id),
            nome: row.nome,
            email: row.email,
            telefone: row.telefone,
            crm: row.crm,
        })
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    nome: String,
    email: String,
    senha: String,
    perfil: String,
}

impl TryFrom<UserRow> for User {
    type Error = UnknownVariant;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            perfil: row.perfil.parse::<Role>()?,
            id: row.id,
            nome: row.nome,
            email: row.email,
            senha: row.senha,
        })
    }
}

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by PostgreSQL.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    /// list_doctors
    ///
    /// One page ordered by name, plus the total count for the pager.
    async fn list_doctors(&self, page: PageRequest) -> Result<Page<DoctorListing>, RepositoryError> {
        let rows = sqlx::query_as::<_, DoctorRow>(
            r#"SELECT id, nome, email, telefone, crm, especialidade
               FROM medicos
               ORDER BY nome ASC, id ASC
               LIMIT $1 OFFSET $2"#,
        )
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM medicos")
            .fetch_one(&self.pool)
            .await?;

        let content = rows
            .into_iter()
            .map(DoctorListing::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(content, page, u64::try_from(total).unwrap_or(0)))
    }

    async fn find_doctor(&self, id: i64) -> Result<Option<DoctorRegistration>, RepositoryError> {
        let row = sqlx::query_as::<_, DoctorRow>(
            "SELECT id, nome, email, telefone, crm, especialidade FROM medicos WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(DoctorRegistration::try_from).transpose()?)
    }

    async fn list_doctors_by_specialty(
        &self,
        specialty: Specialty,
    ) -> Result<Vec<DoctorListing>, RepositoryError> {
        let rows = sqlx::query_as::<_, DoctorRow>(
            r#"SELECT id, nome, email, telefone, crm, especialidade
               FROM medicos
               WHERE especialidade = $1
               ORDER BY nome ASC"#,
        )
        .bind(specialty.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(DoctorListing::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// doctor_conflicts
    ///
    /// `IS DISTINCT FROM` keeps the check correct when `excluding` is NULL (create).
    async fn doctor_conflicts(
        &self,
        email: &str,
        crm: &str,
        excluding: Option<i64>,
    ) -> Result<bool, RepositoryError> {
        let exists: bool = sqlx::query_scalar(
            r#"SELECT EXISTS(
                   SELECT 1 FROM medicos
                   WHERE (email = $1 OR crm = $2) AND id IS DISTINCT FROM $3
               )"#,
        )
        .bind(email)
        .bind(crm)
        .bind(excluding)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn insert_doctor(&self, data: &DoctorRegistration) -> Result<i64, RepositoryError> {
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO medicos (nome, email, telefone, crm, especialidade)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING id"#,
        )
        .bind(&data.nome)
        .bind(&data.email)
        .bind(&data.telefone)
        .bind(&data.crm)
        .bind(data.especialidade.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(conflict_or_database)?;

        Ok(id)
    }

    async fn update_doctor(&self, id: i64, data: &DoctorRegistration) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE medicos
               SET nome = $1, email = $2, telefone = $3, crm = $4, especialidade = $5
               WHERE id = $6"#,
        )
        .bind(&data.nome)
        .bind(&data.email)
        .bind(&data.telefone)
        .bind(&data.crm)
        .bind(data.especialidade.as_str())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(conflict_or_database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_doctor(&self, id: i64) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM medicos WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, nome, email, senha, perfil FROM usuarios WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::try_from).transpose()?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, nome, email, senha, perfil FROM usuarios WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::try_from).transpose()?)
    }
}
