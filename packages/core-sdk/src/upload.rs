use std::path::{Path, PathBuf};

use anyhow::Context;
use axum::extract::Multipart;
use rand::Rng;

use crate::db::now_millis;
use crate::error::{AppError, AppResult};

/** \brief 上传图片的单文件大小上限。 */
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

const ALLOWED_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png"];

/**
 * \brief 暂存在磁盘上的图片；值被丢弃时删除文件。
 */
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
}

impl StagedFile {
    /**
     * \brief 接管一个已存在的文件。
     */
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to remove staged file");
            }
        }
    }
}

/**
 * \brief 接收上传表单的结果。
 */
#[derive(Debug)]
pub struct StagedUpload {
    pub image: StagedFile,
    pub role: Option<String>,
}

/**
 * \brief 读取 multipart 表单：暂存 `image` 文件并读取可选的 `role` 字段。
 */
pub async fn stage_image(mut multipart: Multipart, upload_dir: &Path) -> AppResult<StagedUpload> {
    let mut image: Option<StagedFile> = None;
    let mut role: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" if image.is_none() => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let ext = check_image_type(&file_name, &content_type)?;

                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(e.body_text()))?;
                if bytes.len() > MAX_IMAGE_BYTES {
                    return Err(AppError::Validation("File too large".to_string()));
                }

                let path = upload_dir.join(staged_name(&ext));
                tokio::fs::write(&path, &bytes)
                    .await
                    .with_context(|| format!("stage upload to {} failed", path.display()))?;
                image = Some(StagedFile::new(path));
            }
            "role" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(e.body_text()))?;
                role = Some(text.trim().to_string()).filter(|r| !r.is_empty());
            }
            _ => {}
        }
    }

    let image = image.ok_or_else(|| AppError::Validation("No image file provided".to_string()))?;
    Ok(StagedUpload { image, role })
}

/**
 * \brief 扩展名与声明的内容类型都必须是 jpeg/jpg/png。
 * \return 含前导点的小写扩展名
 */
fn check_image_type(file_name: &str, content_type: &str) -> AppResult<String> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let content_type = content_type.to_ascii_lowercase();

    let ext_ok = ALLOWED_EXTENSIONS.contains(&ext.as_str());
    let mime_ok = content_type.starts_with("image/")
        && ALLOWED_EXTENSIONS.iter().any(|a| content_type.contains(a));
    if ext_ok && mime_ok {
        Ok(format!(".{}", ext))
    } else {
        Err(AppError::Validation(
            "Only image files (jpeg, jpg, png) are allowed".to_string(),
        ))
    }
}

fn staged_name(ext: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000_000);
    format!("{}-{}{}", now_millis(), suffix, ext)
}
