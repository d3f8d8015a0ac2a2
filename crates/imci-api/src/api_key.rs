//! Protección de la API key del endpoint de exportación.
//!
//! La key se guarda cifrada con AES-256-GCM. Cada cifrado usa una sal
//! aleatoria de 64 bytes y un IV de 16 bytes; la clave es
//! `SHA-256(master ‖ hex(sal))`. El texto almacenado tiene la forma
//! `hex(sal):hex(iv):hex(tag):hex(cifrado)`, el mismo que ya existe en las
//! bases de datos desplegadas. Al descifrar también se aceptan IVs de 12 bytes.
use crate::errors::ApiError;
use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::{Aead, KeyInit, Nonce};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use flow::{FlowError, Principal};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use subtle::ConstantTimeEq;

type Aes256Gcm16 = AesGcm<Aes256, U16>;
type Aes256Gcm12 = AesGcm<Aes256, U12>;

const SALT_LEN: usize = 64;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

pub const MISSING_AUTH_HEADER: &str = "Missing or invalid authorization header";
pub const KEY_NOT_CONFIGURED: &str = "API key not configured";
pub const INVALID_KEY: &str = "Invalid API key";

#[derive(Clone)]
pub struct ApiKeyCipher {
    master: String,
    rng: SystemRandom,
}

fn cipher_for<C: KeyInit>(key: &[u8]) -> Result<C, ApiError> {
    C::new_from_slice(key).map_err(|_| ApiError::Crypto("clave derivada inválida".to_string()))
}

fn open<C: Aead + KeyInit>(key: &[u8], iv: &[u8], sealed: &[u8]) -> Result<Vec<u8>, ApiError> {
    cipher_for::<C>(key)?.decrypt(Nonce::<C>::from_slice(iv), sealed)
                         .map_err(|_| ApiError::Crypto("autenticación fallida".to_string()))
}

impl ApiKeyCipher {
    pub fn new(master: &str) -> Result<Self, ApiError> {
        if master.is_empty() {
            return Err(ApiError::Config("API_ENCRYPTION_KEY is not set".to_string()));
        }
        Ok(Self { master: master.to_string(), rng: SystemRandom::new() })
    }

    fn derive_key(&self, salt: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(self.master.as_bytes());
        hasher.update(hex::encode(salt).as_bytes());
        hasher.finalize().to_vec()
    }

    fn random<const N: usize>(&self) -> Result<[u8; N], ApiError> {
        let mut buf = [0u8; N];
        self.rng
            .fill(&mut buf)
            .map_err(|_| ApiError::Crypto("generador aleatorio no disponible".to_string()))?;
        Ok(buf)
    }

    pub fn encrypt(&self, plain: &str) -> Result<String, ApiError> {
        let salt = self.random::<SALT_LEN>()?;
        let iv = self.random::<IV_LEN>()?;
        let key = self.derive_key(&salt);
        let mut sealed = cipher_for::<Aes256Gcm16>(&key)?
            .encrypt(Nonce::<Aes256Gcm16>::from_slice(&iv), plain.as_bytes())
            .map_err(|_| ApiError::Crypto("no se pudo cifrar".to_string()))?;
        // aes-gcm devuelve cifrado ‖ tag
        let tag = sealed.split_off(sealed.len() - TAG_LEN);
        Ok([hex::encode(salt), hex::encode(iv), hex::encode(tag), hex::encode(&sealed)].join(":"))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, ApiError> {
        let parts: Vec<&str> = stored.split(':').collect();
        if parts.len() != 4 {
            return Err(ApiError::Crypto("Invalid encrypted API key format".to_string()));
        }
        let decode = |part: &str| hex::decode(part).map_err(|e| ApiError::Crypto(format!("hex inválido: {}", e)));
        let salt = decode(parts[0])?;
        let iv = decode(parts[1])?;
        let tag = decode(parts[2])?;
        let mut sealed = decode(parts[3])?;
        if tag.len() != TAG_LEN {
            return Err(ApiError::Crypto(format!("tag de {} bytes", tag.len())));
        }
        sealed.extend_from_slice(&tag);
        let key = self.derive_key(&salt);
        let plain = match iv.len() {
            16 => open::<Aes256Gcm16>(&key, &iv, &sealed)?,
            12 => open::<Aes256Gcm12>(&key, &iv, &sealed)?,
            n => return Err(ApiError::Crypto(format!("IV de {} bytes no soportado", n))),
        };
        String::from_utf8(plain).map_err(|e| ApiError::Crypto(e.to_string()))
    }

    /// Compara en tiempo constante la key presentada con la almacenada.
    /// Cualquier error de descifrado cuenta como no válida.
    pub fn validate(&self, provided: &str, stored: &str) -> bool {
        match self.decrypt(stored) {
            Ok(key) => provided.as_bytes().ct_eq(key.as_bytes()).into(),
            Err(e) => {
                log::warn!("stored api key could not be decrypted: {}", e);
                false
            }
        }
    }
}

/// Almacén del texto cifrado de la API key.
pub trait ApiKeyStore: Send + Sync {
    fn load_encrypted(&self) -> Result<Option<String>, ApiError>;
    fn store_encrypted(&self, encrypted: &str) -> Result<(), ApiError>;
}

#[derive(Default)]
pub struct InMemoryApiKeyStore {
    slot: Mutex<Option<String>>,
}

impl InMemoryApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ApiKeyStore for InMemoryApiKeyStore {
    fn load_encrypted(&self) -> Result<Option<String>, ApiError> {
        let slot = self.slot.lock().map_err(|_| ApiError::Internal("Mutex 'api_key' poisoned".into()))?;
        Ok(slot.clone())
    }

    fn store_encrypted(&self, encrypted: &str) -> Result<(), ApiError> {
        let mut slot = self.slot.lock().map_err(|_| ApiError::Internal("Mutex 'api_key' poisoned".into()))?;
        *slot = Some(encrypted.to_string());
        Ok(())
    }
}

/// Vista de la configuración de integración para el administrador.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfigView {
    pub api_key: Option<String>,
    pub api_base_url: String,
}

pub struct ApiKeyManager {
    store: Arc<dyn ApiKeyStore>,
    cipher: ApiKeyCipher,
    base_url: String,
}

impl ApiKeyManager {
    pub fn new(store: Arc<dyn ApiKeyStore>, cipher: ApiKeyCipher, base_url: impl Into<String>) -> Self {
        Self { store, cipher, base_url: base_url.into() }
    }

    /// Cifra y guarda una nueva key, sustituyendo la anterior.
    pub fn set_api_key(&self, plain: &str, principal: &Principal) -> Result<(), ApiError> {
        let plain = plain.trim();
        if plain.is_empty() {
            return Err(FlowError::Validation("API key is required".to_string()).into());
        }
        let encrypted = self.cipher.encrypt(plain)?;
        self.store.store_encrypted(&encrypted)?;
        log::info!("api key replaced by {}", principal.email);
        Ok(())
    }

    /// Key descifrada (o `None` si no hay o no se puede descifrar) y la URL
    /// base publicada para los clientes.
    pub fn get_api_config(&self) -> Result<ApiConfigView, ApiError> {
        let api_key = match self.store.load_encrypted()? {
            Some(stored) => match self.cipher.decrypt(&stored) {
                Ok(k) => Some(k),
                Err(e) => {
                    log::warn!("stored api key could not be decrypted: {}", e);
                    None
                }
            },
            None => None,
        };
        Ok(ApiConfigView { api_key, api_base_url: self.base_url.clone() })
    }

    /// Verifica un header `Authorization: Bearer <key>`.
    pub fn authorize(&self, authorization: Option<&str>) -> Result<(), ApiError> {
        let provided = authorization.and_then(|h| h.strip_prefix("Bearer "))
                                    .ok_or_else(|| ApiError::Unauthorized(MISSING_AUTH_HEADER.to_string()))?;
        let stored = match self.store.load_encrypted() {
            Ok(Some(s)) => s,
            Ok(None) => return Err(ApiError::Config(KEY_NOT_CONFIGURED.to_string())),
            Err(e) => {
                log::error!("api key store read failed: {}", e);
                return Err(ApiError::Config(KEY_NOT_CONFIGURED.to_string()));
            }
        };
        // Una key almacenada que no se descifra equivale a no configurada.
        let expected = match self.cipher.decrypt(&stored) {
            Ok(k) => k,
            Err(e) => {
                log::error!("stored api key could not be decrypted: {}", e);
                return Err(ApiError::Config(KEY_NOT_CONFIGURED.to_string()));
            }
        };
        if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
            Ok(())
        } else {
            Err(ApiError::Unauthorized(INVALID_KEY.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow::Role;
    use uuid::Uuid;

    fn admin() -> Principal {
        Principal { user_id: Uuid::new_v4(), email: "admin@clinic.org".into(), role: Role::Admin }
    }

    #[test]
    fn encrypted_format_and_fresh_randomness() {
        let cipher = ApiKeyCipher::new("master-secret").unwrap();
        let a = cipher.encrypt("abc123").unwrap();
        let b = cipher.encrypt("abc123").unwrap();
        assert_ne!(a, b);
        let parts: Vec<&str> = a.split(':').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0].len(), SALT_LEN * 2);
        assert_eq!(parts[1].len(), IV_LEN * 2);
        assert_eq!(parts[2].len(), TAG_LEN * 2);
        assert_eq!(parts[3].len(), "abc123".len() * 2);
        assert_eq!(cipher.decrypt(&a).unwrap(), "abc123");
        assert!(cipher.validate("abc123", &b));
        assert!(!cipher.validate("abc124", &b));
    }

    #[test]
    fn tampering_and_wrong_master_fail() {
        let cipher = ApiKeyCipher::new("master-secret").unwrap();
        let stored = cipher.encrypt("abc123").unwrap();
        let other = ApiKeyCipher::new("another-secret").unwrap();
        assert!(other.decrypt(&stored).is_err());
        assert!(!other.validate("abc123", &stored));

        let mut parts: Vec<String> = stored.split(':').map(str::to_string).collect();
        let flipped = u8::from_str_radix(&parts[2][..2], 16).unwrap() ^ 0x01;
        parts[2] = format!("{:02x}{}", flipped, &parts[2][2..]);
        assert!(cipher.decrypt(&parts.join(":")).is_err());
        assert!(cipher.decrypt("not-a-key").is_err());
        assert!(cipher.decrypt("zz:00:00:00").is_err());
    }

    // Cifrado con el formato ya desplegado (sal de 64 bytes, IV de 16) bajo
    // la master "fixture-master".
    const DEPLOYED_KEY: &str = "5652dc63172bc1d84e6c90c1600112bf2198d0db5127fa5af8913742e1f02f70\
a641e19461e06f62be9fccfff8dd61479735bfd49ba3f2dab544ba4d65fce6db:\
bd98f4ab5bab6bc09c8ed22e70fe1f5e:3999884f7ea26bd51137d9e9eff966e1:07824e5c090e";

    #[test]
    fn keys_stored_by_the_deployed_system_decrypt() {
        let cipher = ApiKeyCipher::new("fixture-master").unwrap();
        assert_eq!(cipher.decrypt(DEPLOYED_KEY).unwrap(), "abc123");
        assert!(cipher.validate("abc123", DEPLOYED_KEY));
        assert!(!cipher.validate("abc12", DEPLOYED_KEY));
        assert!(ApiKeyCipher::new("other").unwrap().decrypt(DEPLOYED_KEY).is_err());
    }

    #[test]
    fn twelve_byte_iv_opens_and_other_sizes_fail() {
        let cipher = ApiKeyCipher::new("master-secret").unwrap();
        let salt = [7u8; SALT_LEN];
        let iv = [9u8; 12];
        let gcm = cipher_for::<Aes256Gcm12>(&cipher.derive_key(&salt)).unwrap();
        let mut sealed = gcm.encrypt(Nonce::<Aes256Gcm12>::from_slice(&iv), b"k-12".as_slice()).unwrap();
        let tag = sealed.split_off(sealed.len() - TAG_LEN);
        let stored = [hex::encode(salt), hex::encode(iv), hex::encode(tag), hex::encode(&sealed)].join(":");
        assert_eq!(cipher.decrypt(&stored).unwrap(), "k-12");

        let odd = format!("{}:{}:{}:{}", "ab".repeat(64), "cd".repeat(8), "ef".repeat(16), "0102");
        assert!(matches!(cipher.decrypt(&odd), Err(ApiError::Crypto(_))));
    }

    #[test]
    fn manager_authorizes_bearer_tokens() {
        let store = Arc::new(InMemoryApiKeyStore::new());
        let manager = ApiKeyManager::new(store, ApiKeyCipher::new("master").unwrap(), "http://localhost:3000");
        match manager.authorize(Some("Bearer abc")) {
            Err(ApiError::Config(m)) => assert_eq!(m, KEY_NOT_CONFIGURED),
            other => panic!("expected not configured, got {:?}", other),
        }
        manager.set_api_key(" abc ", &admin()).unwrap();
        assert!(manager.authorize(Some("Bearer abc")).is_ok());
        assert!(matches!(manager.authorize(Some("Bearer abd")), Err(ApiError::Unauthorized(m)) if m == INVALID_KEY));
        assert!(matches!(manager.authorize(Some("Basic abc")), Err(ApiError::Unauthorized(m)) if m == MISSING_AUTH_HEADER));
        assert!(matches!(manager.authorize(None), Err(ApiError::Unauthorized(_))));
        assert!(matches!(manager.set_api_key("  ", &admin()), Err(ApiError::Flow(FlowError::Validation(_)))));

        let view = manager.get_api_config().unwrap();
        assert_eq!(view.api_key.as_deref(), Some("abc"));
        assert_eq!(view.api_base_url, "http://localhost:3000");
    }

    #[test]
    fn undecryptable_key_reads_as_unset() {
        let store = Arc::new(InMemoryApiKeyStore::new());
        store.store_encrypted("garbage").unwrap();
        let manager = ApiKeyManager::new(store, ApiKeyCipher::new("master").unwrap(), "http://localhost:3000");
        assert_eq!(manager.get_api_config().unwrap().api_key, None);
        assert!(matches!(manager.authorize(Some("Bearer x")), Err(ApiError::Config(_))));
    }
}
