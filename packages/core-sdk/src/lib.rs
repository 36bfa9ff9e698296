pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod diagnosis;
pub mod error;
pub mod llm;
pub mod models;
pub mod parser;
pub mod prompts;
pub mod rotator;
pub mod server;
pub mod telemetry;
pub mod upload;
pub mod validation;

#[cfg(test)]
mod testing;

/**
 * \brief 常用模块与类型，供 CLI 及嵌入方使用。
 */
pub mod prelude {
    pub use crate::chat::ChatPipeline;
    pub use crate::config::Config;
    pub use crate::db;
    pub use crate::diagnosis::DiagnosisPipeline;
    pub use crate::error::{AppError, AppResult};
    pub use crate::models;
    pub use crate::server::{self, AppState};
    pub use crate::telemetry;
    pub use crate::upload::StagedFile;
}
