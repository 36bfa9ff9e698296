//! 请求体校验规则。
//!
//! 请求体以原始 JSON 到达，进入流水线前按声明式字段规则逐项检查，
//! 第一个违规项以 `Validation` 错误返回。

use axum::{
    extract::{FromRequest, Request},
    Json,
};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::models::{MessagePatch, NewMessage};

/**
 * \brief JSON 请求体提取器，拒绝时转为 400 校验错误。
 */
#[derive(Debug, Clone)]
pub struct JsonBody(pub Value);

impl<S> FromRequest<S> for JsonBody
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<Value>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(AppError::Validation(rejection.body_text())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct StringField {
    name: &'static str,
    required: bool,
    allow_empty: bool,
    max: usize,
}

const MESSAGE_TEXT: StringField = StringField {
    name: "text",
    required: true,
    allow_empty: false,
    max: 5000,
};

const MESSAGE_SENDER: StringField = StringField {
    name: "sender",
    required: false,
    allow_empty: true,
    max: 120,
};

const CHAT_TEXT: StringField = StringField {
    name: "text",
    required: true,
    allow_empty: false,
    max: 2000,
};

fn invalid(msg: String) -> AppError {
    AppError::Validation(msg)
}

fn as_object(body: &Value) -> AppResult<&Map<String, Value>> {
    body.as_object()
        .ok_or_else(|| invalid("\"value\" must be of type object".to_string()))
}

fn reject_unknown(obj: &Map<String, Value>, allowed: &[StringField]) -> AppResult<()> {
    match obj.keys().find(|k| !allowed.iter().any(|f| f.name == k.as_str())) {
        Some(key) => Err(invalid(format!("\"{}\" is not allowed", key))),
        None => Ok(()),
    }
}

/**
 * \brief 校验单个字符串字段。
 * \return 缺失时为 `Ok(None)`；显式 null 为 `Ok(Some(None))`；否则为去除首尾空白后的值
 */
fn check(obj: &Map<String, Value>, field: StringField) -> AppResult<Option<Option<String>>> {
    let name = field.name;
    match obj.get(name) {
        None if field.required => Err(invalid(format!("\"{}\" is required", name))),
        None => Ok(None),
        Some(Value::Null) if field.allow_empty => Ok(Some(None)),
        Some(Value::String(raw)) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                if field.allow_empty {
                    return Ok(Some(Some(String::new())));
                }
                return Err(invalid(format!("\"{}\" is not allowed to be empty", name)));
            }
            if trimmed.chars().count() > field.max {
                return Err(invalid(format!(
                    "\"{}\" length must be less than or equal to {} characters long",
                    name, field.max
                )));
            }
            Ok(Some(Some(trimmed.to_string())))
        }
        Some(_) => Err(invalid(format!("\"{}\" must be a string", name))),
    }
}

/**
 * \brief `text` 必填（1..=5000），`sender` 可选（允许 null 或空串，最长 120）。
 */
pub fn validate_message(body: &Value) -> AppResult<NewMessage> {
    let obj = as_object(body)?;
    let text = check(obj, MESSAGE_TEXT)?.flatten().unwrap_or_default();
    let sender = check(obj, MESSAGE_SENDER)?.flatten();
    reject_unknown(obj, &[MESSAGE_TEXT, MESSAGE_SENDER])?;
    Ok(NewMessage { text, sender })
}

/**
 * \brief 字段规则同新建消息，均为可选，但至少提供一个键。
 */
pub fn validate_message_update(body: &Value) -> AppResult<MessagePatch> {
    let obj = as_object(body)?;
    let text_field = StringField {
        required: false,
        ..MESSAGE_TEXT
    };
    let text = check(obj, text_field)?.flatten();
    let sender = check(obj, MESSAGE_SENDER)?;
    reject_unknown(obj, &[text_field, MESSAGE_SENDER])?;
    if obj.is_empty() {
        return Err(invalid("\"value\" must have at least 1 key".to_string()));
    }
    Ok(MessagePatch { text, sender })
}

/**
 * \brief 返回去除首尾空白的聊天文本（1..=2000 个字符）。
 */
pub fn validate_chat(body: &Value) -> AppResult<String> {
    let obj = as_object(body)?;
    let text = check(obj, CHAT_TEXT)?.flatten().unwrap_or_default();
    reject_unknown(obj, &[CHAT_TEXT])?;
    Ok(text)
}

/**
 * \brief 读取宽松类型字段：字符串去空白，数字转字符串，空白视为缺失。
 */
fn loose_string(body: &Value, key: &str) -> Option<String> {
    match body.get(key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterInput {
    pub name: String,
    pub location: String,
    pub land_size: String,
    pub main_crop: String,
    pub phone: String,
    pub email: String,
    pub password: String,
}

pub fn validate_register(body: &Value) -> AppResult<RegisterInput> {
    let get = |key: &str| {
        loose_string(body, key).ok_or_else(|| invalid("All fields are required".to_string()))
    };
    Ok(RegisterInput {
        name: get("name")?,
        location: get("location")?,
        land_size: get("land_size")?,
        main_crop: get("main_crop")?,
        phone: get("phone")?,
        email: get("email")?,
        password: get("password")?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

pub fn validate_login(body: &Value) -> AppResult<LoginInput> {
    let get = |key: &str| {
        loose_string(body, key).ok_or_else(|| invalid("All fields are required".to_string()))
    };
    Ok(LoginInput {
        email: get("email")?,
        password: get("password")?,
    })
}

/**
 * \brief 需覆盖的资料字段；空白或缺失字段保持原值。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub location: Option<String>,
    pub land_size: Option<String>,
    pub main_crop: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

pub fn profile_patch(body: &Value) -> ProfilePatch {
    ProfilePatch {
        name: loose_string(body, "name"),
        location: loose_string(body, "location"),
        land_size: loose_string(body, "land_size"),
        main_crop: loose_string(body, "main_crop"),
        phone: loose_string(body, "phone"),
        email: loose_string(body, "email"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn err_msg(result: AppResult<impl std::fmt::Debug>) -> String {
        match result {
            Err(AppError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_message_schema() {
        let ok = validate_message(&json!({"text": "  hello  ", "sender": "Farmer"})).unwrap();
        assert_eq!(
            ok,
            NewMessage {
                text: "hello".to_string(),
                sender: Some("Farmer".to_string())
            }
        );

        let no_sender = validate_message(&json!({"text": "hi", "sender": null})).unwrap();
        assert_eq!(no_sender.sender, None);

        assert_eq!(err_msg(validate_message(&json!({}))), "\"text\" is required");
        assert_eq!(
            err_msg(validate_message(&json!({"text": "   "}))),
            "\"text\" is not allowed to be empty"
        );
        assert_eq!(
            err_msg(validate_message(&json!({"text": 5}))),
            "\"text\" must be a string"
        );
        assert_eq!(
            err_msg(validate_message(&json!({"text": "a".repeat(5001)}))),
            "\"text\" length must be less than or equal to 5000 characters long"
        );
        assert_eq!(
            err_msg(validate_message(&json!({"text": "a", "sender": "s".repeat(121)}))),
            "\"sender\" length must be less than or equal to 120 characters long"
        );
        assert_eq!(
            err_msg(validate_message(&json!({"text": "a", "extra": 1}))),
            "\"extra\" is not allowed"
        );
        assert_eq!(
            err_msg(validate_message(&json!(["text"]))),
            "\"value\" must be of type object"
        );
    }

    #[test]
    fn test_message_update_schema() {
        let patch = validate_message_update(&json!({"sender": null})).unwrap();
        assert_eq!(
            patch,
            MessagePatch {
                text: None,
                sender: Some(None)
            }
        );

        let patch = validate_message_update(&json!({"text": "new"})).unwrap();
        assert_eq!(patch.text.as_deref(), Some("new"));
        assert_eq!(patch.sender, None);

        assert_eq!(
            err_msg(validate_message_update(&json!({}))),
            "\"value\" must have at least 1 key"
        );
        assert_eq!(
            err_msg(validate_message_update(&json!({"text": ""}))),
            "\"text\" is not allowed to be empty"
        );
    }

    #[test]
    fn test_chat_schema() {
        assert_eq!(
            validate_chat(&json!({"text": " mausam kaisa hai "})).unwrap(),
            "mausam kaisa hai"
        );
        assert_eq!(err_msg(validate_chat(&json!({"msg": "x"}))), "\"text\" is required");
        assert!(validate_chat(&json!({"text": "a".repeat(2000)})).is_ok());
        assert!(validate_chat(&json!({"text": "a".repeat(2001)})).is_err());
        assert_eq!(
            err_msg(validate_chat(&json!({"text": "x", "sender": "me"}))),
            "\"sender\" is not allowed"
        );
    }

    #[test]
    fn test_register_requires_every_field() {
        let body = json!({
            "name": "Ramesh",
            "location": "Indore",
            "land_size": 4.5,
            "main_crop": "Soybean",
            "phone": "9876543210",
            "email": "ramesh@example.com",
            "password": "secret"
        });
        let input = validate_register(&body).unwrap();
        assert_eq!(input.land_size, "4.5");
        assert_eq!(input.email, "ramesh@example.com");

        let mut missing = body.clone();
        missing["phone"] = json!("");
        assert_eq!(err_msg(validate_register(&missing)), "All fields are required");
    }

    #[test]
    fn test_login_and_profile_patch() {
        assert!(validate_login(&json!({"email": "a@b.c"})).is_err());
        let login = validate_login(&json!({"email": "a@b.c", "password": "p"})).unwrap();
        assert_eq!(login.password, "p");

        let patch = profile_patch(&json!({"location": "Ujjain", "name": "", "phone": null}));
        assert_eq!(patch.location.as_deref(), Some("Ujjain"));
        assert_eq!(patch.name, None);
        assert_eq!(patch.phone, None);
    }
}
