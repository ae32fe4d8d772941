#![allow(dead_code)]

use async_trait::async_trait;
use clinic_portal::{
    AppConfig, AppState,
    auth::{CSRF_COOKIE, PasswordEncoder, REMEMBER_ME_COOKIE, SESSION_COOKIE},
    models::{DoctorListing, DoctorRegistration, Page, PageRequest, Role, Specialty, User},
    repository::{Repository, RepositoryError},
};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

pub const ATENDENTE_ID: i64 = 1;
pub const PACIENTE_ID: i64 = 2;
pub const MEDICO_ID: i64 = 3;
pub const PASSWORD: &str = "s3nh4-forte";
pub const CSRF: &str = "test-csrf-token";

// --- In-memory repository ---

/// InMemoryRepo
///
/// Repository double backed by vectors. Counts every write so tests can assert that
/// the service was (or was not) asked to mutate anything. Inserts and updates enforce
/// email/CRM uniqueness the way the table constraints do.
#[derive(Default)]
pub struct InMemoryRepo {
    doctors: Mutex<Vec<DoctorListing>>,
    users: Mutex<Vec<User>>,
    next_id: Mutex<i64>,
    pub writes: AtomicUsize,
    stale_conflict_check: AtomicBool,
}

impl InMemoryRepo {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(100),
            ..Self::default()
        }
    }

    /// Seeds one user per role, all sharing `PASSWORD` (low bcrypt cost to keep tests fast).
    pub fn with_users(self) -> Self {
        let encoder = PasswordEncoder::with_cost(4);
        let hash = encoder.encode(PASSWORD).expect("hash test password");
        {
            let mut users = self.users.lock().unwrap();
            users.push(user(ATENDENTE_ID, "Ana Atendente", "ana@voll.med", &hash, Role::Atendente));
            users.push(user(PACIENTE_ID, "Paulo Paciente", "paulo@voll.med", &hash, Role::Paciente));
            users.push(user(MEDICO_ID, "Marta Medica", "marta@voll.med", &hash, Role::Medico));
        }
        self
    }

    pub fn with_doctor(self, doctor: DoctorListing) -> Self {
        self.doctors.lock().unwrap().push(doctor);
        self
    }

    /// Makes `doctor_conflicts` always answer "no conflict", as if another writer took
    /// the email or CRM right after the check ran.
    pub fn with_stale_conflict_check(self) -> Self {
        self.stale_conflict_check.store(true, Ordering::SeqCst);
        self
    }

    pub fn doctors(&self) -> Vec<DoctorListing> {
        self.doctors.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

fn user(id: i64, nome: &str, email: &str, hash: &str, perfil: Role) -> User {
    User {
        id,
        nome: nome.to_string(),
        email: email.to_string(),
        senha: hash.to_string(),
        perfil,
    }
}

pub fn doctor(id: i64, nome: &str, crm: &str, especialidade: Specialty) -> DoctorListing {
    DoctorListing {
        id,
        nome: nome.to_string(),
        email: format!("{}@voll.med", crm),
        telefone: "61999998888".to_string(),
        crm: crm.to_string(),
        especialidade,
    }
}

fn violates_unique(doctors: &[DoctorListing], data: &DoctorRegistration, id: Option<i64>) -> bool {
    doctors
        .iter()
        .any(|d| (d.email == data.email || d.crm == data.crm) && Some(d.id) != id)
}

fn to_listing(id: i64, data: &DoctorRegistration) -> DoctorListing {
    DoctorListing {
        id,
        nome: data.nome.clone(),
        email: data.email.clone(),
        telefone: data.telefone.clone(),
        crm: data.crm.clone(),
        especialidade: data.especialidade,
    }
}

#[async_trait]
impl Repository for InMemoryRepo {
    async fn list_doctors(&self, page: PageRequest) -> Result<Page<DoctorListing>, RepositoryError> {
        let doctors = self.doctors.lock().unwrap();
        let content = doctors
            .iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .cloned()
            .collect();
        Ok(Page::new(content, page, doctors.len() as u64))
    }

    async fn find_doctor(&self, id: i64) -> Result<Option<DoctorRegistration>, RepositoryError> {
        Ok(self
            .doctors
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == id)
            .map(|d| DoctorRegistration {
                id: Some(d.id),
                nome: d.nome.clone(),
                email: d.email.clone(),
                telefone: d.telefone.clone(),
                crm: d.crm.clone(),
                especialidade: d.especialidade,
            }))
    }

    async fn list_doctors_by_specialty(
        &self,
        specialty: Specialty,
    ) -> Result<Vec<DoctorListing>, RepositoryError> {
        Ok(self
            .doctors
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.especialidade == specialty)
            .cloned()
            .collect())
    }

    async fn doctor_conflicts(
        &self,
        email: &str,
        crm: &str,
        excluding: Option<i64>,
    ) -> Result<bool, RepositoryError> {
        if self.stale_conflict_check.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(self
            .doctors
            .lock()
            .unwrap()
            .iter()
            .any(|d| (d.email == email || d.crm == crm) && Some(d.id) != excluding))
    }

    async fn insert_doctor(&self, data: &DoctorRegistration) -> Result<i64, RepositoryError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if violates_unique(&self.doctors.lock().unwrap(), data, None) {
            return Err(RepositoryError::Conflict("medicos_crm_key".to_string()));
        }
        let id = {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            *next
        };
        self.doctors.lock().unwrap().push(to_listing(id, data));
        Ok(id)
    }

    async fn update_doctor(&self, id: i64, data: &DoctorRegistration) -> Result<bool, RepositoryError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut doctors = self.doctors.lock().unwrap();
        if violates_unique(&doctors, data, Some(id)) {
            return Err(RepositoryError::Conflict("medicos_crm_key".to_string()));
        }
        match doctors.iter_mut().find(|d| d.id == id) {
            Some(existing) => {
                *existing = to_listing(id, data);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_doctor(&self, id: i64) -> Result<bool, RepositoryError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut doctors = self.doctors.lock().unwrap();
        let before = doctors.len();
        doctors.retain(|d| d.id != id);
        Ok(doctors.len() < before)
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.lock().unwrap().iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email == email)
            .cloned())
    }
}

// --- State and cookie helpers ---

pub fn create_test_state(repo: Arc<InMemoryRepo>) -> AppState {
    AppState::new(repo, AppConfig::default())
}

pub fn seeded_repo() -> Arc<InMemoryRepo> {
    Arc::new(
        InMemoryRepo::new()
            .with_users()
            .with_doctor(doctor(10, "Carla Cardio", "123456", Specialty::Cardiologia))
            .with_doctor(doctor(11, "Otto Orto", "234567", Specialty::Ortopedia))
            .with_doctor(doctor(42, "Caio Cardio", "345678", Specialty::Cardiologia)),
    )
}

/// `Cookie` header carrying a valid session for `user_id` plus the test CSRF cookie.
pub fn session_cookie(state: &AppState, user_id: i64) -> String {
    let token = state.policy.session.issue(user_id).expect("issue session");
    format!("{SESSION_COOKIE}={token}; {CSRF_COOKIE}={CSRF}")
}

/// `Cookie` header carrying a remember-me token bound to the user's stored password hash.
pub async fn remember_me_cookie(state: &AppState, user_id: i64) -> String {
    let user = state
        .repo
        .find_user(user_id)
        .await
        .expect("look up user")
        .expect("seeded user");
    let token = state.policy.remember_me.issue_bound(&user).expect("issue remember-me");
    remember_me_header(&token)
}

pub fn remember_me_header(token: &str) -> String {
    format!("{REMEMBER_ME_COOKIE}={token}; {CSRF_COOKIE}={CSRF}")
}

pub fn csrf_only_cookie() -> String {
    format!("{CSRF_COOKIE}={CSRF}")
}
