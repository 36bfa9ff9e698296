use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/**
 * \brief OpenAI 聊天格式的消息。
 */
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /** \brief 角色：system/user/assistant */
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/**
 * \brief 已入库的聊天记录，来自用户提交或助手回复。
 */
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRecord {
    #[serde(rename = "_id")]
    pub id: i64,
    pub text: String,
    pub sender: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/**
 * \brief 从诊断回复中提取的结构化字段，每个字段都可能缺失。
 */
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParsedDiagnosis {
    pub plant_name: Option<String>,
    pub disease: Option<String>,
    pub severity: Option<String>,
    pub treatment: Option<String>,
}

/**
 * \brief 单次叶片图片分析的入库结果，写入后不再修改。
 */
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisRecord {
    #[serde(rename = "_id")]
    pub id: i64,
    pub plant_name: Option<String>,
    pub disease: Option<String>,
    pub severity: Option<String>,
    pub treatment: Option<String>,
    pub full_analysis: String,
    #[serde(with = "time::serde::rfc3339")]
    pub analyzed_at: OffsetDateTime,
    pub user_role: Option<String>,
}

/**
 * \brief 诊断记录的按角色汇总。
 */
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleStats {
    pub role: Option<String>,
    pub total: i64,
    pub healthy: i64,
    pub diseased: i64,
}

/**
 * \brief 存储的用户行，含密码哈希。
 */
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub location: String,
    pub land_size: String,
    pub main_crop: String,
    pub phone: String,
    pub email: String,
    pub password_hash: String,
}

/**
 * \brief 用户的公开视图，即认证接口的返回内容。
 */
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub id: i64,
    pub name: String,
    pub location: String,
    pub land_size: String,
    pub main_crop: String,
    pub phone: String,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            location: user.location.clone(),
            land_size: user.land_size.clone(),
            main_crop: user.main_crop.clone(),
            phone: user.phone.clone(),
            email: user.email.clone(),
        }
    }
}

/**
 * \brief 已校验的新建消息请求体。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub text: String,
    pub sender: Option<String>,
}

/**
 * \brief 已校验的部分更新；`sender: Some(None)` 表示清空发送者。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePatch {
    pub text: Option<String>,
    pub sender: Option<Option<String>>,
}
