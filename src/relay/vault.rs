use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use rand::Rng;

use crate::relay::error::CredentialError;

const NONCE_LEN: usize = 12;
const MASTER_KEY_LEN: usize = 32;

/// 服务商凭证的静态加密保险库
///
/// 所有记录共用一个进程级主密钥（AES-256-GCM），不保存任何逐条记录的密钥材料。
/// 主密钥不匹配时由认证标签检测出来，解密返回 `DecryptionFailed`，而不是错误的明文。
/// 轮换主密钥需要重新加密所有已存储凭证，不在请求热路径上。
#[derive(Clone)]
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// 使用32字节主密钥创建保险库
    pub fn new(master_key: &[u8; MASTER_KEY_LEN]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(master_key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// 从 Base64 编码（标准或 URL-safe）的主密钥创建保险库
    pub fn from_base64(encoded: &str) -> anyhow::Result<Self> {
        let encoded = encoded.trim();
        let bytes = general_purpose::STANDARD
            .decode(encoded)
            .or_else(|_| general_purpose::URL_SAFE.decode(encoded))
            .map_err(|e| anyhow::anyhow!("Master key is not valid base64: {}", e))?;

        let key: [u8; MASTER_KEY_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            anyhow::anyhow!("Master key must be {} bytes, got {}", MASTER_KEY_LEN, b.len())
        })?;
        Ok(Self::new(&key))
    }

    /// 生成新的随机主密钥（Base64 编码）
    pub fn generate_master_key() -> String {
        let mut key = [0u8; MASTER_KEY_LEN];
        rand::thread_rng().fill(&mut key);
        general_purpose::STANDARD.encode(key)
    }

    /// 加密凭证，返回 Base64(nonce || ciphertext || tag)
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CredentialError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CredentialError::EncryptionFailed(e.to_string()))?;

        let mut encrypted = nonce_bytes.to_vec();
        encrypted.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(&encrypted))
    }

    /// 解密凭证
    pub fn decrypt(&self, encrypted: &str) -> Result<String, CredentialError> {
        let bytes = general_purpose::STANDARD
            .decode(encrypted)
            .map_err(|e| CredentialError::DecryptionFailed(format!("base64 decode failed: {}", e)))?;

        if bytes.len() < NONCE_LEN {
            return Err(CredentialError::DecryptionFailed("ciphertext too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CredentialError::DecryptionFailed("authentication tag mismatch".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| CredentialError::DecryptionFailed(format!("invalid utf-8: {}", e)))
    }
}
