use std::{path::Path, sync::Arc};

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::{
    db::{self, Store},
    error::{AppError, AppResult},
    llm::CompletionBackend,
    models::DiagnosisRecord,
    parser, prompts, telemetry,
    upload::StagedFile,
};

/**
 * \brief 输入叶片图片，输出已入库的诊断记录。
 * \details 暂存图片归 `run` 所有，任何退出路径都会删除。
 */
#[derive(Clone)]
pub struct DiagnosisPipeline {
    backend: Arc<dyn CompletionBackend>,
    store: Store,
}

impl DiagnosisPipeline {
    pub fn new(backend: Arc<dyn CompletionBackend>, store: Store) -> Self {
        Self { backend, store }
    }

    pub async fn run(
        &self,
        image: StagedFile,
        user_role: Option<&str>,
    ) -> AppResult<DiagnosisRecord> {
        let data_url = image_data_url(image.path()).await?;

        let full_analysis = match self
            .backend
            .complete_vision(
                &data_url,
                prompts::DIAGNOSIS_USER_PROMPT,
                prompts::DIAGNOSIS_SYSTEM_PROMPT,
            )
            .await
        {
            Ok(text) => text,
            Err(err) => {
                telemetry::log_error("diagnosis", &format!("vision call failed: {}", err));
                return Err(err);
            }
        };
        if full_analysis.is_empty() {
            return Err(AppError::Upstream(
                "Vision analysis failed: empty response".to_string(),
            ));
        }

        let parsed = parser::parse(&full_analysis);
        let role = user_role.map(str::to_string);
        let record = self
            .store
            .call(move |conn| {
                Ok(db::insert_analysis(conn, &parsed, &full_analysis, role.as_deref())?)
            })
            .await?;
        telemetry::log_event(
            "diagnosis",
            &format!(
                "analysis id={} plant={:?} disease={:?} role={:?}",
                record.id, record.plant_name, record.disease, record.user_role
            ),
        );
        drop(image);
        Ok(record)
    }
}

/**
 * \brief `.png` 标记为 `image/png`，其余扩展名一律按 `image/jpeg` 发送。
 */
pub fn mime_for(path: &Path) -> &'static str {
    let is_png = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("png"))
        .unwrap_or(false);
    if is_png {
        "image/png"
    } else {
        "image/jpeg"
    }
}

pub async fn image_data_url(path: &Path) -> AppResult<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("read image {} failed", path.display()))?;
    Ok(format!(
        "data:{};base64,{}",
        mime_for(path),
        STANDARD.encode(bytes)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, StubBackend};

    fn setup() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::new(dir.path().join("test.db")).expect("store");
        (dir, store)
    }

    fn stage(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).expect("write image");
        path
    }

    fn count_analyses(store: &Store) -> usize {
        let conn = store.open().unwrap();
        db::list_analyses(&conn, 200, 0, None).unwrap().len()
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for(Path::new("a.png")), "image/png");
        assert_eq!(mime_for(Path::new("a.PNG")), "image/png");
        assert_eq!(mime_for(Path::new("a.jpg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("a.webp")), "image/jpeg");
        assert_eq!(mime_for(Path::new("noext")), "image/jpeg");
    }

    #[tokio::test]
    async fn test_image_data_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = stage(&dir, "leaf.png", b"abc");
        assert_eq!(
            image_data_url(&path).await.unwrap(),
            "data:image/png;base64,YWJj"
        );
    }

    #[tokio::test]
    async fn test_run_persists_one_record_and_removes_file() {
        let (dir, store) = setup();
        let path = stage(&dir, "leaf.jpg", b"jpeg-bytes");
        let backend = Arc::new(StubBackend::ok(
            "Plant: Tomato leaf\nDisease: Early Blight\nSeverity: moderate\nTreatment: apply copper fungicide weekly",
        ));
        let pipeline = DiagnosisPipeline::new(backend.clone(), store.clone());

        let record = pipeline
            .run(StagedFile::new(&path), Some("farmer"))
            .await
            .expect("run");

        assert_eq!(record.plant_name.as_deref(), Some("Tomato leaf"));
        assert_eq!(record.disease.as_deref(), Some("Early Blight"));
        assert_eq!(record.severity.as_deref(), Some("moderate"));
        assert_eq!(record.user_role.as_deref(), Some("farmer"));
        assert!(record.full_analysis.starts_with("Plant: Tomato leaf"));
        assert_eq!(count_analyses(&store), 1);
        assert!(!path.exists());

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            Call::Vision { data_url } => {
                assert!(data_url.starts_with("data:image/jpeg;base64,"))
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_unparseable_text_still_persists() {
        let (dir, store) = setup();
        let path = stage(&dir, "leaf.png", b"png-bytes");
        let pipeline = DiagnosisPipeline::new(
            Arc::new(StubBackend::ok("Kuch samajh nahi aaya")),
            store.clone(),
        );

        let record = pipeline.run(StagedFile::new(&path), None).await.expect("run");
        assert_eq!(record.plant_name, None);
        assert_eq!(record.disease, None);
        assert_eq!(record.full_analysis, "Kuch samajh nahi aaya");
        assert_eq!(count_analyses(&store), 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_upstream_failure_cleans_up_and_persists_nothing() {
        let (dir, store) = setup();
        let path = stage(&dir, "leaf.png", b"png-bytes");
        let pipeline =
            DiagnosisPipeline::new(Arc::new(StubBackend::failing("quota exceeded")), store.clone());

        let err = pipeline
            .run(StagedFile::new(&path), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Upstream(msg) if msg == "quota exceeded"));
        assert_eq!(count_analyses(&store), 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_image_is_internal_error() {
        let (dir, store) = setup();
        let backend = Arc::new(StubBackend::ok("unused"));
        let pipeline = DiagnosisPipeline::new(backend.clone(), store.clone());

        let err = pipeline
            .run(StagedFile::new(dir.path().join("gone.jpg")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(backend.calls().is_empty());
        assert_eq!(count_analyses(&store), 0);
    }
}
