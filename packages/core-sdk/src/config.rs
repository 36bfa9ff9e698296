use std::path::PathBuf;

use crate::error::AppError;

pub const DEFAULT_INFERENCE_ENDPOINT: &str = "https://models.github.ai/inference";
pub const DEFAULT_GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

/**
 * \brief 进程配置，启动时从环境变量一次性解析。
 */
#[derive(Debug, Clone)]
pub struct Config {
    /** \brief SQLite 数据库文件路径。 */
    pub database_path: PathBuf,
    /** \brief 会话令牌签名密钥。 */
    pub jwt_secret: String,
    /** \brief 按槽位顺序排列的推理凭据；空槽位保留为 `None`。 */
    pub inference_tokens: Vec<Option<String>>,
    pub inference_endpoint: String,
    /** \brief 搜索增强价格模型的密钥（可选）。 */
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: String,
    pub cors_origins: Vec<String>,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub telemetry_enabled: bool,
}

impl Config {
    /**
     * \brief 从进程环境变量读取配置。
     */
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /**
     * \brief 通过任意键查询函数构建配置。
     * \param lookup 返回键对应的原始值，未设置时为 `None`
     */
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = non_empty("JWT_SECRET")
            .ok_or_else(|| AppError::Configuration("JWT_SECRET is not set".to_string()))?;

        let inference_tokens = ["GITHUB_TOKEN_1", "GITHUB_TOKEN_2", "GITHUB_TOKEN_3"]
            .iter()
            .map(|key| lookup(*key))
            .collect();

        let port = match non_empty("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| AppError::Configuration(format!("invalid PORT value: {}", raw)))?,
            None => 5000,
        };

        let cors_origins = non_empty("CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|| vec![DEFAULT_CORS_ORIGIN.to_string()]);
        // 携带凭据的 CORS 不能使用通配来源。
        if cors_origins.iter().any(|o| o == "*") {
            return Err(AppError::Configuration(
                "CORS_ORIGINS must list explicit origins, `*` is not allowed with credentials"
                    .to_string(),
            ));
        }

        let telemetry_enabled = non_empty("TELEMETRY_ENABLED")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            database_path: PathBuf::from(
                non_empty("DATABASE_URL").unwrap_or_else(|| "agrisaathi.db".to_string()),
            ),
            jwt_secret,
            inference_tokens,
            inference_endpoint: non_empty("INFERENCE_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_INFERENCE_ENDPOINT.to_string()),
            gemini_api_key: non_empty("GEMINI_API_KEY"),
            gemini_api_base: non_empty("GEMINI_API_BASE")
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE.to_string()),
            cors_origins,
            port,
            upload_dir: PathBuf::from(
                non_empty("UPLOAD_DIR").unwrap_or_else(|| "media/photos".to_string()),
            ),
            telemetry_enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = Config::from_lookup(lookup_from(&[("JWT_SECRET", "s3cret")])).expect("config");
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.database_path, PathBuf::from("agrisaathi.db"));
        assert_eq!(cfg.inference_endpoint, DEFAULT_INFERENCE_ENDPOINT);
        assert_eq!(cfg.cors_origins, vec!["http://localhost:5173".to_string()]);
        assert_eq!(cfg.inference_tokens, vec![None, None, None]);
        assert!(cfg.gemini_api_key.is_none());
        assert!(!cfg.telemetry_enabled);
    }

    #[test]
    fn test_tokens_keep_slot_order() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("JWT_SECRET", "s"),
            ("GITHUB_TOKEN_1", "a"),
            ("GITHUB_TOKEN_3", "c"),
            ("CORS_ORIGINS", "http://a.test, http://b.test"),
            ("PORT", "8080"),
            ("TELEMETRY_ENABLED", "true"),
        ]))
        .expect("config");
        assert_eq!(
            cfg.inference_tokens,
            vec![Some("a".to_string()), None, Some("c".to_string())]
        );
        assert_eq!(cfg.cors_origins.len(), 2);
        assert_eq!(cfg.port, 8080);
        assert!(cfg.telemetry_enabled);
    }

    #[test]
    fn test_missing_secret_is_configuration_error() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn test_wildcard_cors_origin_rejected() {
        for raw in ["*", "http://a.test, *"] {
            let err = Config::from_lookup(lookup_from(&[("JWT_SECRET", "s"), ("CORS_ORIGINS", raw)]))
                .unwrap_err();
            assert!(matches!(err, AppError::Configuration(msg) if msg.contains("CORS_ORIGINS")));
        }
    }

    #[test]
    fn test_bad_port_rejected() {
        let err = Config::from_lookup(lookup_from(&[("JWT_SECRET", "s"), ("PORT", "http")]))
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }
}
