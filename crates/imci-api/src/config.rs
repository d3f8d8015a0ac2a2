use crate::api_key::ApiKeyCipher;
use crate::errors::ApiError;
use flow::SignInPolicy;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Configuración del proceso leída del entorno (tras cargar `.env`).
///
/// La URL de la base de datos la resuelve `imci_persistence::Database::from_env`.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminConfig {
    pub api_base_url: String,
    pub encryption_key: Option<String>,
    pub sign_in_policy: SignInPolicy,
    pub bind_address: String,
    pub operator_email: Option<String>,
}

impl AdminConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Construye la configuración con una función de búsqueda arbitraria.
    pub fn from_lookup<F>(get: F) -> Self
        where F: Fn(&str) -> Option<String>
    {
        let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self { api_base_url: non_empty("API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
               encryption_key: non_empty("API_ENCRYPTION_KEY"),
               sign_in_policy: SignInPolicy::parse(&get("ALLOWED_EMAILS").unwrap_or_default()),
               bind_address: non_empty("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
               operator_email: non_empty("IMCI_OPERATOR_EMAIL") }
    }

    /// Cifrador de la API key. Falla si `API_ENCRYPTION_KEY` no está definida.
    pub fn cipher(&self) -> Result<ApiKeyCipher, ApiError> {
        match &self.encryption_key {
            Some(secret) => ApiKeyCipher::new(secret),
            None => Err(ApiError::Config("API_ENCRYPTION_KEY is not set".to_string())),
        }
    }
}
