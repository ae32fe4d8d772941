use crate::{
    models::{DoctorListing, DoctorRegistration, Page, PageRequest, Specialty},
    repository::{RepositoryError, RepositoryState},
};

/// Message shown on the form when the email or CRM already belongs to another doctor.
pub const DUPLICATE_DOCTOR_MESSAGE: &str = "E-mail ou CRM já cadastrado para outro médico!";

/// ServiceError
///
/// Outcomes of the doctor service that the HTTP layer must tell apart.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// A domain rule rejected the operation. The message is user-facing.
    #[error("{0}")]
    BusinessRule(String),
    #[error("doctor {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// DoctorService
///
/// The collaborator behind every `/medicos` handler (`listar`, `carregarPorId`,
/// `cadastrar`, `excluir`, `listarPorEspecialidade`). It owns the business rules;
/// the repository only stores rows.
#[derive(Clone)]
pub struct DoctorService {
    repo: RepositoryState,
}

impl DoctorService {
    pub fn new(repo: RepositoryState) -> Self {
        Self { repo }
    }

    pub async fn listar(&self, page: PageRequest) -> Result<Page<DoctorListing>, ServiceError> {
        Ok(self.repo.list_doctors(page).await?)
    }

    /// Loads the registration data of an existing doctor for the edit form.
    pub async fn carregar_por_id(&self, id: i64) -> Result<DoctorRegistration, ServiceError> {
        self.repo
            .find_doctor(id)
            .await?
            .ok_or(ServiceError::NotFound(id))
    }

    /// cadastrar
    ///
    /// Creates the doctor when `data.id` is `None`, otherwise updates the existing one.
    /// Rejects the operation with `ServiceError::BusinessRule` when the email or CRM
    /// is already used by a different doctor.
    pub async fn cadastrar(&self, data: &DoctorRegistration) -> Result<(), ServiceError> {
        if self
            .repo
            .doctor_conflicts(&data.email, &data.crm, data.id)
            .await?
        {
            return Err(ServiceError::BusinessRule(
                DUPLICATE_DOCTOR_MESSAGE.to_string(),
            ));
        }

        match data.id {
            None => {
                let id = self
                    .repo
                    .insert_doctor(data)
                    .await
                    .map_err(duplicate_as_business_rule)?;
                tracing::info!(doctor_id = id, "doctor created");
            }
            Some(id) => {
                let updated = self
                    .repo
                    .update_doctor(id, data)
                    .await
                    .map_err(duplicate_as_business_rule)?;
                if !updated {
                    return Err(ServiceError::NotFound(id));
                }
                tracing::info!(doctor_id = id, "doctor updated");
            }
        }
        Ok(())
    }

    pub async fn excluir(&self, id: i64) -> Result<(), ServiceError> {
        if !self.repo.delete_doctor(id).await? {
            return Err(ServiceError::NotFound(id));
        }
        tracing::info!(doctor_id = id, "doctor deleted");
        Ok(())
    }

    pub async fn listar_por_especialidade(
        &self,
        especialidade: Specialty,
    ) -> Result<Vec<DoctorListing>, ServiceError> {
        Ok(self.repo.list_doctors_by_specialty(especialidade).await?)
    }
}

/// A concurrent writer can claim the email or CRM between the conflict check and the
/// write; the database constraint then reports it and it surfaces as the same rule.
fn duplicate_as_business_rule(err: RepositoryError) -> ServiceError {
    match err {
        RepositoryError::Conflict(constraint) => {
            tracing::info!(%constraint, "doctor write rejected by unique constraint");
            ServiceError::BusinessRule(DUPLICATE_DOCTOR_MESSAGE.to_string())
        }
        other => other.into(),
    }
}
