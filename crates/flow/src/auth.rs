// Archivo: auth.rs
// Propósito: identidad explícita del operador. El inicio de sesión produce un
// `Principal` tipado que se pasa a cada operación mutante; no existe sesión
// global.
use crate::errors::{FlowError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Editor,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }
}

impl FromStr for Role {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(Role::Admin),
            "editor" => Ok(Role::Editor),
            "viewer" => Ok(Role::Viewer),
            other => Err(FlowError::Storage(format!("rol desconocido: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Identidad autenticada que ejecuta una operación.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

impl From<&User> for Principal {
    fn from(u: &User) -> Self {
        Principal { user_id: u.id,
                    email: u.email.clone(),
                    role: u.role }
    }
}

/// Exige un principal autenticado en la frontera (CLI / HTTP).
pub fn require_principal(principal: Option<&Principal>) -> Result<&Principal> {
    principal.ok_or_else(|| FlowError::AuthRequired("You must be signed in to perform this action".into()))
}

/// Política de emails permitidos (`ALLOWED_EMAILS`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInPolicy {
    /// `ANY`: cualquier email.
    Any,
    /// Lista explícita en minúsculas. Vacía = nadie.
    List(Vec<String>),
}

impl SignInPolicy {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("ANY") {
            return SignInPolicy::Any;
        }
        SignInPolicy::List(raw.split(',')
                              .map(|e| e.trim().to_lowercase())
                              .filter(|e| !e.is_empty())
                              .collect())
    }

    pub fn allows(&self, email: &str) -> bool {
        match self {
            SignInPolicy::Any => true,
            SignInPolicy::List(list) => {
                let email = email.trim().to_lowercase();
                list.iter().any(|e| *e == email)
            }
        }
    }
}

/// Directorio de usuarios que respalda el inicio de sesión.
pub trait UserDirectory: Send + Sync {
    fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    fn create_user(&self, user: &User) -> Result<()>;
    fn update_username(&self, user_id: &Uuid, username: &str) -> Result<User>;
    fn count_users(&self) -> Result<i64>;
}

/// Resuelve un email (ya verificado por el proveedor de identidad) a un
/// `Principal`, creando el usuario la primera vez.
pub struct Authenticator<D> where D: UserDirectory
{
    directory: std::sync::Arc<D>,
    policy: SignInPolicy,
}

impl<D> Authenticator<D> where D: UserDirectory
{
    pub fn new(directory: std::sync::Arc<D>, policy: SignInPolicy) -> Self {
        Self { directory, policy }
    }

    /// Inicia sesión. `display_name` actualiza el username si difiere.
    pub fn sign_in(&self, email: &str, display_name: Option<&str>) -> Result<Principal> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || !self.policy.allows(&email) {
            log::warn!("sign-in rejected for {}", email);
            return Err(FlowError::Unauthorized("Email not allowed to sign in".into()));
        }
        let display_name = display_name.map(str::trim).filter(|n| !n.is_empty());
        match self.directory.find_by_email(&email)? {
            Some(user) => {
                if let Some(name) = display_name {
                    if name != user.username {
                        let updated = self.directory.update_username(&user.id, name)?;
                        return Ok(Principal::from(&updated));
                    }
                }
                Ok(Principal::from(&user))
            }
            None => {
                let username = display_name.map(str::to_string)
                                           .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
                let user = User { id: Uuid::new_v4(),
                                  email,
                                  username,
                                  role: Role::default(),
                                  created_at: Utc::now() };
                self.directory.create_user(&user)?;
                log::info!("created user {} ({})", user.email, user.id);
                Ok(Principal::from(&user))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_any_is_case_insensitive() {
        assert_eq!(SignInPolicy::parse("any"), SignInPolicy::Any);
        assert!(SignInPolicy::parse("ANY").allows("someone@clinic.org"));
    }

    #[test]
    fn policy_list_trims_and_lowercases() {
        let p = SignInPolicy::parse(" Nurse@Clinic.org , doc@clinic.org,");
        assert!(p.allows("nurse@clinic.org"));
        assert!(p.allows("DOC@clinic.org "));
        assert!(!p.allows("other@clinic.org"));
        assert!(!SignInPolicy::parse("").allows("nurse@clinic.org"));
    }

    #[test]
    fn missing_principal_is_auth_required() {
        assert!(matches!(require_principal(None), Err(FlowError::AuthRequired(_))));
    }
}
