use crate::api_key::ApiKeyStore;
use crate::errors::ApiError;
use imci_persistence::DieselApiConfigRepository;

/// La fila `api_config` como almacén de la key cifrada.
///
/// El repositorio Diesel sólo conoce el texto opaco; cifrar y descifrar es
/// responsabilidad de `ApiKeyManager`.
impl ApiKeyStore for DieselApiConfigRepository {
    fn load_encrypted(&self) -> Result<Option<String>, ApiError> {
        Ok(self.load_api_key()?)
    }

    fn store_encrypted(&self, encrypted: &str) -> Result<(), ApiError> {
        Ok(self.store_api_key(encrypted)?)
    }
}
