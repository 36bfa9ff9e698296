use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{
    db,
    error::{AppError, AppResult},
    models::User,
    server::AppState,
};

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_COOKIE: &str = "token";
/** \brief 会话有效期：24 小时。 */
pub const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

pub fn hash_password(password: &str) -> AppResult<String> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("salt encoding failed: {}", e)))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

/**
 * \brief 用存储的 PHC 哈希校验 `password`；格式错误的哈希一律校验失败。
 */
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    id: i64,
    exp: i64,
}

/**
 * \brief 签发并校验 HMAC-SHA256 签名的会话令牌。
 * \details 令牌格式：`base64url(json claims) "." base64url(mac)`。
 */
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self) -> AppResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid signing key: {}", e)))
    }

    /**
     * \param now 签发时刻的 unix 秒数
     */
    pub fn sign(&self, user_id: i64, now: i64) -> AppResult<String> {
        let claims = Claims {
            id: user_id,
            exp: now + TOKEN_TTL_SECS,
        };
        let payload = serde_json::to_vec(&claims)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("token encoding failed: {}", e)))?;
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", payload, sig))
    }

    /**
     * \brief 返回有效且未过期令牌中携带的用户 ID。
     */
    pub fn verify(&self, token: &str, now: i64) -> AppResult<i64> {
        let invalid = || AppError::Auth("Not authorized, invalid token".to_string());
        let (payload, sig) = token.split_once('.').ok_or_else(invalid)?;
        let sig = URL_SAFE_NO_PAD.decode(sig).map_err(|_| invalid())?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig).map_err(|_| invalid())?;

        let raw = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid())?;
        let claims: Claims = serde_json::from_slice(&raw).map_err(|_| invalid())?;
        if claims.exp <= now {
            return Err(AppError::Auth("Not authorized, token expired".to_string()));
        }
        Ok(claims.id)
    }
}

pub fn now_secs() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

pub fn session_cookie(token: &str) -> String {
    format!(
        "{}={}; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age={}",
        TOKEN_COOKIE, token, TOKEN_TTL_SECS
    )
}

pub fn clear_session_cookie() -> String {
    format!(
        "{}=; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age=0",
        TOKEN_COOKIE
    )
}

/**
 * \brief 从请求的 `Cookie` 头中查找指定 cookie 值。
 */
pub fn cookie_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
        .filter(|v| !v.is_empty())
}

/**
 * \brief 受保护路由的提取器：校验会话 cookie 并重新加载用户。
 */
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> AppResult<Self> {
        let token = cookie_value(parts, TOKEN_COOKIE)
            .ok_or_else(|| AppError::Auth("Not authorized, token missing".to_string()))?;
        let user_id = state.signer.verify(&token, now_secs())?;

        let user = state
            .store
            .call(move |conn| Ok(db::get_user_by_id(conn, user_id)?))
            .await?
            .ok_or_else(|| AppError::Auth("User not found".to_string()))?;
        Ok(AuthUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("kisan@123").expect("hash");
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("kisan@123", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("kisan@123", "not-a-hash"));
    }

    #[test]
    fn test_token_sign_and_verify() {
        let signer = TokenSigner::new("secret");
        let token = signer.sign(7, 1_000).expect("sign");
        assert_eq!(signer.verify(&token, 1_001).unwrap(), 7);
        assert_eq!(signer.verify(&token, 1_000 + TOKEN_TTL_SECS - 1).unwrap(), 7);
    }

    #[test]
    fn test_token_expiry() {
        let signer = TokenSigner::new("secret");
        let token = signer.sign(7, 1_000).expect("sign");
        let err = signer.verify(&token, 1_000 + TOKEN_TTL_SECS).unwrap_err();
        assert!(matches!(err, AppError::Auth(msg) if msg.contains("expired")));
    }

    #[test]
    fn test_token_tampering_rejected() {
        let signer = TokenSigner::new("secret");
        let token = signer.sign(7, 1_000).expect("sign");

        let other = TokenSigner::new("other-secret");
        assert!(matches!(other.verify(&token, 1_001), Err(AppError::Auth(_))));

        let forged_payload = URL_SAFE_NO_PAD.encode(br#"{"id":1,"exp":99999999999}"#);
        let (_, sig) = token.split_once('.').unwrap();
        let forged = format!("{}.{}", forged_payload, sig);
        assert!(matches!(signer.verify(&forged, 1_001), Err(AppError::Auth(_))));

        assert!(signer.verify("garbage", 1_001).is_err());
        assert!(signer.verify("a.b", 1_001).is_err());
    }

    #[test]
    fn test_cookie_helpers() {
        let set = session_cookie("abc");
        assert!(set.starts_with("token=abc;"));
        assert!(set.contains("HttpOnly"));
        assert!(set.contains("SameSite=Strict"));
        assert!(set.contains("Max-Age=86400"));
        assert!(clear_session_cookie().contains("Max-Age=0"));

        let (parts, _) = Request::builder()
            .header(header::COOKIE, "theme=dark; token=xyz.123")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(cookie_value(&parts, "token").as_deref(), Some("xyz.123"));
        assert_eq!(cookie_value(&parts, "missing"), None);

        let (parts, _) = Request::builder()
            .header(header::COOKIE, "token=")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(cookie_value(&parts, "token"), None);
    }
}
