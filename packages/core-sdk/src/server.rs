use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth::{self, AuthUser, TokenSigner},
    chat::ChatPipeline,
    config::Config,
    db::{self, NewUser, Store},
    diagnosis::DiagnosisPipeline,
    error::{parse_id, AppError, AppResult},
    llm::{CompletionBackend, GeminiClient, GroundedSearch, OpenAiClient},
    models::UserSummary,
    prompts,
    rotator::CredentialRotator,
    telemetry, upload,
    validation::{self, JsonBody},
};

/** \brief 上传路由的请求体上限；单文件检查更严格。 */
const UPLOAD_BODY_LIMIT: usize = 6 * 1024 * 1024;

const MESSAGES_DEFAULT_LIMIT: i64 = 100;
const MESSAGES_MAX_LIMIT: i64 = 500;
const ANALYSES_DEFAULT_LIMIT: i64 = 50;
const ANALYSES_MAX_LIMIT: i64 = 200;

/**
 * \brief 处理函数所需的全部依赖，启动时构建，按请求克隆。
 */
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
    pub signer: TokenSigner,
    pub chat: ChatPipeline,
    pub diagnosis: DiagnosisPipeline,
    pub search: Option<Arc<dyn GroundedSearch>>,
    pub upload_dir: PathBuf,
}

impl AppState {
    /**
     * \brief 根据配置构建真实的上游客户端。
     * \details 未设置任何推理凭据时返回配置错误。
     */
    pub fn from_config(config: Config) -> AppResult<Self> {
        let rotator = CredentialRotator::initialize(config.inference_tokens.clone())?;
        let completion = OpenAiClient::new(rotator, &config.inference_endpoint)?;
        tracing::info!(
            credentials = completion.credential_count(),
            endpoint = %config.inference_endpoint,
            "inference client ready"
        );

        let search: Option<Arc<dyn GroundedSearch>> = match &config.gemini_api_key {
            Some(key) => Some(Arc::new(GeminiClient::new(key, &config.gemini_api_base)?)),
            None => {
                tracing::warn!("GEMINI_API_KEY is not set, price lookup is disabled");
                None
            }
        };

        Self::with_backends(config, Arc::new(completion), search)
    }

    /**
     * \brief 围绕调用方提供的后端组装存储与流水线。
     */
    pub fn with_backends(
        config: Config,
        completion: Arc<dyn CompletionBackend>,
        search: Option<Arc<dyn GroundedSearch>>,
    ) -> AppResult<Self> {
        std::fs::create_dir_all(&config.upload_dir).with_context(|| {
            format!("create upload dir {} failed", config.upload_dir.display())
        })?;
        let store = Store::new(&config.database_path)?;

        Ok(Self {
            signer: TokenSigner::new(&config.jwt_secret),
            chat: ChatPipeline::new(completion.clone(), store.clone()),
            diagnosis: DiagnosisPipeline::new(completion, store.clone()),
            upload_dir: config.upload_dir.clone(),
            config: Arc::new(config),
            store,
            search,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    let auth_routes = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/profile", get(profile))
        .route("/updateProfile", put(update_profile))
        .route("/priceThroughAi", post(price_through_ai));

    Router::new()
        .nest("/auth/v1", auth_routes)
        .route("/api/messages", get(list_messages).post(create_message))
        .route(
            "/api/messages/{id}",
            get(get_message).put(update_message).delete(delete_message),
        )
        .route("/api/chatgpt", post(chat))
        .route(
            "/uploads/photos",
            post(upload_photo)
                .get(list_photos)
                .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/uploads/photos/stats", get(photo_stats))
        .route("/uploads/photos/{id}", get(get_photo))
        .route("/health", get(health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) if value != "*" => Some(value),
            _ => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/**
 * \brief 绑定 `addr` 并持续服务直至进程退出。
 * \param addr 监听地址，例如 "0.0.0.0:5000"
 */
pub async fn run(state: AppState, addr: &str) -> Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {} failed", addr))?;
    tracing::info!("server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<String>,
    skip: Option<String>,
    role: Option<String>,
}

impl PageQuery {
    /**
     * \return `(limit, skip)`；非法或非正的 limit 回退为 `default`，负的 skip 归零
     */
    fn window(&self, default: i64, max: i64) -> (i64, i64) {
        let parse = |raw: &Option<String>| raw.as_deref().and_then(|v| v.trim().parse::<i64>().ok());
        let limit = parse(&self.limit)
            .filter(|l| *l > 0)
            .map(|l| l.min(max))
            .unwrap_or(default);
        let skip = parse(&self.skip).unwrap_or(0).max(0);
        (limit, skip)
    }

    fn role(&self) -> Option<&str> {
        self.role.as_deref().map(str::trim).filter(|r| !r.is_empty())
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

// ---- 认证 ----

async fn register(State(state): State<AppState>, JsonBody(body): JsonBody) -> AppResult<Response> {
    let input = validation::validate_register(&body)?;
    // 哈希计算与插入一起在阻塞线程池中执行。
    let user = state
        .store
        .call(move |conn| {
            if db::get_user_by_email(conn, &input.email)?.is_some() {
                return Err(AppError::Validation("User already exists".to_string()));
            }
            let password_hash = auth::hash_password(&input.password)?;
            let id = db::insert_user(
                conn,
                &NewUser {
                    name: &input.name,
                    location: &input.location,
                    land_size: &input.land_size,
                    main_crop: &input.main_crop,
                    phone: &input.phone,
                    email: &input.email,
                    password_hash: &password_hash,
                },
            )?;
            db::get_user_by_id(conn, id)?.ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!("user {} vanished after insert", id))
            })
        })
        .await?;

    let token = state.signer.sign(user.id, auth::now_secs())?;
    telemetry::log_event("auth", &format!("register id={}", user.id));
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, auth::session_cookie(&token))],
        Json(json!({
            "success": true,
            "message": "User registered successfully",
            "user": UserSummary::from(&user),
        })),
    )
        .into_response())
}

async fn login(State(state): State<AppState>, JsonBody(body): JsonBody) -> AppResult<Response> {
    let input = validation::validate_login(&body)?;
    let user = state
        .store
        .call(move |conn| {
            db::get_user_by_email(conn, &input.email)?
                .filter(|u| auth::verify_password(&input.password, &u.password_hash))
                .ok_or_else(|| AppError::Auth("Invalid email or password".to_string()))
        })
        .await?;

    let token = state.signer.sign(user.id, auth::now_secs())?;
    telemetry::log_event("auth", &format!("login id={}", user.id));
    Ok((
        [(header::SET_COOKIE, auth::session_cookie(&token))],
        Json(json!({
            "success": true,
            "message": "Login successful",
            "user": UserSummary::from(&user),
        })),
    )
        .into_response())
}

async fn logout(AuthUser(user): AuthUser) -> Response {
    telemetry::log_event("auth", &format!("logout id={}", user.id));
    (
        [(header::SET_COOKIE, auth::clear_session_cookie())],
        Json(json!({ "success": true, "message": "Logged out successfully" })),
    )
        .into_response()
}

async fn profile(AuthUser(user): AuthUser) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "user": UserSummary::from(&user) }))
}

async fn update_profile(
    State(state): State<AppState>,
    AuthUser(mut user): AuthUser,
    JsonBody(body): JsonBody,
) -> AppResult<Json<serde_json::Value>> {
    let patch = validation::profile_patch(&body);
    let user = state
        .store
        .call(move |conn| {
            if let Some(email) = &patch.email {
                let taken = db::get_user_by_email(conn, email)?
                    .map(|other| other.id != user.id)
                    .unwrap_or(false);
                if taken {
                    return Err(AppError::Validation("Email already in use".to_string()));
                }
            }

            let fields = [
                (&mut user.name, patch.name),
                (&mut user.location, patch.location),
                (&mut user.land_size, patch.land_size),
                (&mut user.main_crop, patch.main_crop),
                (&mut user.phone, patch.phone),
                (&mut user.email, patch.email),
            ];
            for (slot, value) in fields {
                if let Some(value) = value {
                    *slot = value;
                }
            }
            db::update_user(conn, &user)?;
            Ok(user)
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Profile updated successfully",
        "user": UserSummary::from(&user),
    })))
}

async fn price_through_ai(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<serde_json::Value>> {
    let crop = user.main_crop.trim();
    let city = user.location.trim();
    if crop.is_empty() || city.is_empty() {
        return Err(AppError::Validation(
            "Crop or city missing in user profile".to_string(),
        ));
    }
    let search = state
        .search
        .as_ref()
        .ok_or_else(|| AppError::Upstream("Price lookup is not configured".to_string()))?;

    let price_info = match search
        .search_grounded(prompts::MANDI_PRICE_INSTRUCTION, &format!("{} {}", crop, city))
        .await
    {
        Ok(text) => text,
        Err(err) => {
            telemetry::log_error("price", &format!("search failed: {}", err));
            return Err(err);
        }
    };

    Ok(Json(json!({
        "success": true,
        "data": { "crop": crop, "city": city, "priceInfo": price_info },
    })))
}

// ---- 消息 ----

async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    let (limit, skip) = query.window(MESSAGES_DEFAULT_LIMIT, MESSAGES_MAX_LIMIT);
    let messages = state
        .store
        .call(move |conn| Ok(db::list_messages(conn, limit, skip)?))
        .await?;
    Ok(Json(messages).into_response())
}

async fn get_message(State(state): State<AppState>, Path(raw): Path<String>) -> AppResult<Response> {
    let id = parse_id(&raw, "message")?;
    let message = state
        .store
        .call(move |conn| Ok(db::get_message(conn, id)?))
        .await?
        .ok_or_else(|| AppError::NotFound("Message not found".to_string()))?;
    Ok(Json(message).into_response())
}

async fn create_message(
    State(state): State<AppState>,
    JsonBody(body): JsonBody,
) -> AppResult<Response> {
    let message = validation::validate_message(&body)?;
    let record = state
        .store
        .call(move |conn| Ok(db::insert_message(conn, &message)?))
        .await?;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

async fn update_message(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    JsonBody(body): JsonBody,
) -> AppResult<Response> {
    let id = parse_id(&raw, "message")?;
    let patch = validation::validate_message_update(&body)?;
    let record = state
        .store
        .call(move |conn| Ok(db::update_message(conn, id, &patch)?))
        .await?
        .ok_or_else(|| AppError::NotFound("Message not found".to_string()))?;
    Ok(Json(record).into_response())
}

async fn delete_message(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> AppResult<StatusCode> {
    let id = parse_id(&raw, "message")?;
    let deleted = state
        .store
        .call(move |conn| Ok(db::delete_message(conn, id)?))
        .await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("Message not found".to_string()))
    }
}

async fn chat(State(state): State<AppState>, JsonBody(body): JsonBody) -> AppResult<Response> {
    let text = validation::validate_chat(&body)?;
    let record = state.chat.run(&text).await?;
    Ok(Json(record).into_response())
}

// ---- 图片 ----

async fn upload_photo(State(state): State<AppState>, multipart: Multipart) -> AppResult<Response> {
    let staged = upload::stage_image(multipart, &state.upload_dir).await?;
    let record = state
        .diagnosis
        .run(staged.image, staged.role.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

async fn list_photos(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> AppResult<Response> {
    let (limit, skip) = query.window(ANALYSES_DEFAULT_LIMIT, ANALYSES_MAX_LIMIT);
    let role = query.role().map(str::to_string);
    let records = state
        .store
        .call(move |conn| Ok(db::list_analyses(conn, limit, skip, role.as_deref())?))
        .await?;
    Ok(Json(records).into_response())
}

async fn photo_stats(State(state): State<AppState>) -> AppResult<Response> {
    let stats = state
        .store
        .call(|conn| Ok(db::analysis_stats(conn)?))
        .await?;
    Ok(Json(stats).into_response())
}

async fn get_photo(State(state): State<AppState>, Path(raw): Path<String>) -> AppResult<Response> {
    let id = parse_id(&raw, "analysis")?;
    let record = state
        .store
        .call(move |conn| Ok(db::get_analysis(conn, id)?))
        .await?
        .ok_or_else(|| AppError::NotFound("Analysis not found".to_string()))?;
    Ok(Json(record).into_response())
}
