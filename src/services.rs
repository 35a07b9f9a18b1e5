//! Request builders and response parsers for the backend: edge functions
//! for the AI stages, REST for persistence, storage for photo uploads.
//! Everything here is pure; the requests are executed by the shell via
//! the http capability.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::capabilities::http::{HttpRequest, HttpResponse};
use crate::model::{AnalysisResult, RecommendationItem, TryOnImage, UserProfile};
use crate::{
    AppError, AppResult, ErrorKind, ANALYZE_TIMEOUT_MS, MAX_RATING, MAX_RECOMMENDATIONS,
    MIN_RATING, PERSIST_TIMEOUT_MS, SEARCH_TIMEOUT_MS, TRY_ON_TIMEOUT_MS, UPLOAD_TIMEOUT_MS,
    VIDEO_TIMEOUT_MS,
};

pub const OUTFIT_PHOTOS_BUCKET: &str = "outfit-photos";
pub const TRY_ON_RESULTS_BUCKET: &str = "try-on-results";

/// Shells hand photos over as base64; storage wants the raw bytes back.
pub fn decode_photo(base64_data: &str) -> AppResult<Vec<u8>> {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD
        .decode(base64_data)
        .map_err(|e| {
            AppError::new(ErrorKind::Validation, "The captured photo could not be read.")
                .with_internal(format!("base64 decode: {e}"))
        })
}

/// Injected at startup and validated once. No credential ever lives in a
/// module-level constant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub access_token: String,
    pub user_id: String,
}

impl ApiConfig {
    pub fn validate(&self) -> AppResult<()> {
        let parsed = url::Url::parse(&self.base_url).map_err(|e| {
            AppError::new(ErrorKind::Config, "Invalid backend URL")
                .with_internal(format!("base_url parse: {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(AppError::new(ErrorKind::Config, "Invalid backend URL")
                .with_internal(format!("unsupported base_url: {}", self.base_url)));
        }
        for (field, value) in [
            ("api_key", &self.api_key),
            ("access_token", &self.access_token),
            ("user_id", &self.user_id),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::new(ErrorKind::Config, "Missing credentials")
                    .with_context("missing_field", field));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteRecord {
    pub id: String,
    pub item: RecommendationItem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceClient {
    config: ApiConfig,
}

impl ServiceClient {
    /// Fails fast on a bad config so nothing downstream has to re-check.
    pub fn new(config: ApiConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.config.user_id
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn authorized(&self, request: HttpRequest) -> AppResult<HttpRequest> {
        request
            .with_header("apikey", &self.config.api_key)
            .and_then(|r| {
                r.with_header("Authorization", format!("Bearer {}", self.config.access_token))
            })
            .map_err(|e| {
                AppError::new(ErrorKind::Config, "Invalid credentials")
                    .with_internal(e.to_string())
            })
    }

    fn edge_function(&self, name: &str, body: &serde_json::Value) -> AppResult<HttpRequest> {
        let request = HttpRequest::post(format!("{}/functions/v1/{name}", self.base()))
            .and_then(|r| r.with_json(body))
            .map_err(|e| {
                AppError::new(ErrorKind::Config, "Could not build service request")
                    .with_internal(e.to_string())
            })?;
        self.authorized(request)
    }

    // --- AI stages -------------------------------------------------------

    pub fn analyze(
        &self,
        photo_base64: &str,
        profile: Option<&UserProfile>,
    ) -> AppResult<HttpRequest> {
        let body = json!({
            "imageBase64": photo_base64,
            "profile": profile,
        });
        Ok(self
            .edge_function("analyze-outfit", &body)?
            .with_timeout_ms(ANALYZE_TIMEOUT_MS))
    }

    pub fn search(
        &self,
        analysis: &AnalysisResult,
        profile: Option<&UserProfile>,
    ) -> AppResult<HttpRequest> {
        let body = json!({
            "outfitName": analysis.outfit_name,
            "description": analysis.short_description,
            "rating": analysis.rating,
            "profile": profile,
        });
        Ok(self
            .edge_function("search-products", &body)?
            .with_timeout_ms(SEARCH_TIMEOUT_MS))
    }

    pub fn try_on(&self, user_photo_base64: &str, garment_url: &str) -> AppResult<HttpRequest> {
        let body = json!({
            "userPhotoBase64": user_photo_base64,
            "clothingImageUrl": garment_url,
        });
        Ok(self
            .edge_function("virtual-try-on", &body)?
            .with_timeout_ms(TRY_ON_TIMEOUT_MS))
    }

    pub fn generate_video(&self, image_path: &str) -> AppResult<HttpRequest> {
        let body = json!({ "imagePath": image_path });
        Ok(self
            .edge_function("generate-video", &body)?
            .with_timeout_ms(VIDEO_TIMEOUT_MS))
    }

    // --- Storage ---------------------------------------------------------

    /// Fresh object path under the user's folder.
    #[must_use]
    pub fn new_object_path(&self) -> String {
        format!("{}/{}.jpg", self.config.user_id, uuid::Uuid::new_v4())
    }

    pub fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> AppResult<HttpRequest> {
        let request = HttpRequest::post(format!(
            "{}/storage/v1/object/{bucket}/{path}",
            self.base()
        ))
        .and_then(|r| r.with_body(bytes, "image/jpeg"))
        .map_err(|e| {
            AppError::new(ErrorKind::Config, "Could not build upload request")
                .with_internal(e.to_string())
        })?;
        Ok(self.authorized(request)?.with_timeout_ms(UPLOAD_TIMEOUT_MS))
    }

    #[must_use]
    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{bucket}/{path}", self.base())
    }

    // --- Persistence (REST) ----------------------------------------------

    fn rest(&self, table: &str) -> AppResult<HttpRequest> {
        let request = HttpRequest::post(format!("{}/rest/v1/{table}", self.base()))
            .and_then(|r| r.with_header("Prefer", "return=representation"))
            .map_err(|e| {
                AppError::new(ErrorKind::Config, "Could not build persistence request")
                    .with_internal(e.to_string())
            })?;
        Ok(self.authorized(request)?.with_timeout_ms(PERSIST_TIMEOUT_MS))
    }

    fn rest_json(&self, table: &str, body: &serde_json::Value) -> AppResult<HttpRequest> {
        self.rest(table)?.with_json(body).map_err(|e| {
            AppError::new(ErrorKind::Config, "Could not build persistence request")
                .with_internal(e.to_string())
        })
    }

    pub fn insert_analysis(
        &self,
        photo_url: &str,
        analysis: &AnalysisResult,
    ) -> AppResult<HttpRequest> {
        let body = json!({
            "user_id": self.config.user_id,
            "photo_url": photo_url,
            "outfit_name": analysis.outfit_name,
            "rating": analysis.rating,
            "short_description": analysis.short_description,
        });
        self.rest_json("outfit_analyses", &body)
    }

    pub fn insert_recommendations(
        &self,
        analysis_id: &str,
        items: &[RecommendationItem],
    ) -> AppResult<HttpRequest> {
        let rows: Vec<_> = items
            .iter()
            .map(|item| {
                json!({
                    "user_id": self.config.user_id,
                    "analysis_id": analysis_id,
                    "name": item.name,
                    "brand": item.brand,
                    "description": item.description,
                    "price": item.price,
                    "image_url": item.image_url,
                    "purchase_url": item.purchase_url,
                    "category": item.category,
                })
            })
            .collect();
        self.rest_json("recommendations", &json!(rows))
    }

    pub fn rename_analysis(&self, analysis_id: &str, name: &str) -> AppResult<HttpRequest> {
        let request = HttpRequest::patch(format!(
            "{}/rest/v1/outfit_analyses?id=eq.{analysis_id}",
            self.base()
        ))
        .and_then(|r| r.with_json(&json!({ "outfit_name": name })))
        .map_err(|e| {
            AppError::new(ErrorKind::Config, "Could not build rename request")
                .with_internal(e.to_string())
        })?;
        Ok(self.authorized(request)?.with_timeout_ms(PERSIST_TIMEOUT_MS))
    }

    pub fn add_favorite(&self, item: &RecommendationItem) -> AppResult<HttpRequest> {
        let body = json!({
            "user_id": self.config.user_id,
            "name": item.name,
            "brand": item.brand,
            "description": item.description,
            "price": item.price,
            "image_url": item.image_url,
            "purchase_url": item.purchase_url,
            "category": item.category,
        });
        self.rest_json("favorites", &body)
    }

    pub fn remove_favorite(&self, favorite_id: &str) -> AppResult<HttpRequest> {
        let request = HttpRequest::delete(format!(
            "{}/rest/v1/favorites?id=eq.{favorite_id}",
            self.base()
        ))
        .map_err(|e| {
            AppError::new(ErrorKind::Config, "Could not build delete request")
                .with_internal(e.to_string())
        })?;
        Ok(self.authorized(request)?.with_timeout_ms(PERSIST_TIMEOUT_MS))
    }

    pub fn list_favorites(&self) -> AppResult<HttpRequest> {
        let request = HttpRequest::get(format!(
            "{}/rest/v1/favorites?user_id=eq.{}&order=created_at.desc",
            self.base(),
            self.config.user_id
        ))
        .map_err(|e| {
            AppError::new(ErrorKind::Config, "Could not build favorites request")
                .with_internal(e.to_string())
        })?;
        Ok(self.authorized(request)?.with_timeout_ms(PERSIST_TIMEOUT_MS))
    }

    pub fn save_try_on(&self, result_path: &str, garment_url: &str) -> AppResult<HttpRequest> {
        let body = json!({
            "user_id": self.config.user_id,
            "result_path": result_path,
            "result_url": self.public_url(TRY_ON_RESULTS_BUCKET, result_path),
            "clothing_image_url": garment_url,
        });
        self.rest_json("try_on_results", &body)
    }

    pub fn fetch_profile(&self) -> AppResult<HttpRequest> {
        let request = HttpRequest::get(format!(
            "{}/rest/v1/profiles?id=eq.{}&limit=1",
            self.base(),
            self.config.user_id
        ))
        .map_err(|e| {
            AppError::new(ErrorKind::Config, "Could not build profile request")
                .with_internal(e.to_string())
        })?;
        Ok(self.authorized(request)?.with_timeout_ms(PERSIST_TIMEOUT_MS))
    }
}

// --- Response parsing -----------------------------------------------------

/// What the analyze stage decided about the photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    /// No outfit found in frame; the session resets without a result.
    InvalidPhoto,
    Valid(AnalysisResult),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisWire {
    outfit_name: String,
    short_description: String,
    is_valid_photo: bool,
    // Kept loose on purpose: the contract demands an integer 1..=10 and
    // we reject rather than coerce anything else.
    #[serde(default)]
    rating: serde_json::Value,
}

fn validation_error(detail: impl Into<String>) -> AppError {
    AppError::new(
        ErrorKind::Validation,
        "The styling service returned an unexpected response. Please try again.",
    )
    .with_internal(detail)
}

pub fn parse_analysis(response: &HttpResponse) -> AppResult<AnalysisOutcome> {
    let wire: AnalysisWire = response
        .json()
        .map_err(|e| validation_error(format!("analysis body: {e}")))?;

    if !wire.is_valid_photo {
        return Ok(AnalysisOutcome::InvalidPhoto);
    }

    let rating = wire
        .rating
        .as_i64()
        .filter(|r| (MIN_RATING..=MAX_RATING).contains(r))
        .ok_or_else(|| validation_error(format!("rating out of contract: {}", wire.rating)))?;

    if wire.outfit_name.trim().is_empty() || wire.short_description.trim().is_empty() {
        return Err(validation_error("empty outfit_name or short_description"));
    }

    // Range-checked above, so the conversion cannot fail.
    let rating = u8::try_from(rating)
        .map_err(|_| validation_error(format!("rating out of contract: {rating}")))?;

    Ok(AnalysisOutcome::Valid(AnalysisResult {
        outfit_name: wire.outfit_name,
        rating,
        short_description: wire.short_description,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendationWire {
    name: String,
    brand: String,
    description: String,
    price: String,
    image_url: String,
    purchase_url: String,
    #[serde(default)]
    category: Option<String>,
}

const DEFAULT_CATEGORY: &str = "other";

fn normalize_category(category: Option<String>) -> String {
    match category {
        Some(c) if !c.is_empty() => c,
        _ => DEFAULT_CATEGORY.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct RecommendationsEnvelope {
    recommendations: Vec<RecommendationWire>,
}

pub fn parse_recommendations(response: &HttpResponse) -> AppResult<Vec<RecommendationItem>> {
    let envelope: RecommendationsEnvelope = response
        .json()
        .map_err(|e| validation_error(format!("recommendations body: {e}")))?;

    let count = envelope.recommendations.len();
    if count == 0 || count > MAX_RECOMMENDATIONS {
        return Err(validation_error(format!(
            "recommendation count {count} outside 1..={MAX_RECOMMENDATIONS}"
        )));
    }

    Ok(envelope
        .recommendations
        .into_iter()
        .map(|w| RecommendationItem {
            name: w.name,
            brand: w.brand,
            description: w.description,
            price: w.price,
            image_url: w.image_url,
            purchase_url: w.purchase_url,
            category: normalize_category(w.category),
        })
        .collect())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TryOnWire {
    base64: String,
    #[serde(default)]
    data_uri: Option<String>,
}

pub fn parse_try_on(response: &HttpResponse) -> AppResult<TryOnImage> {
    let wire: TryOnWire = response
        .json()
        .map_err(|e| validation_error(format!("try-on body: {e}")))?;
    if wire.base64.is_empty() {
        return Err(validation_error("empty try-on composite"));
    }
    let data_uri = wire
        .data_uri
        .unwrap_or_else(|| format!("data:image/jpeg;base64,{}", wire.base64));
    Ok(TryOnImage {
        base64: wire.base64,
        data_uri,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoWire {
    video_url: String,
}

pub fn parse_video(response: &HttpResponse) -> AppResult<String> {
    let wire: VideoWire = response
        .json()
        .map_err(|e| validation_error(format!("video body: {e}")))?;
    if wire.video_url.is_empty() {
        return Err(validation_error("empty video url"));
    }
    Ok(wire.video_url)
}

#[derive(Debug, Deserialize)]
struct InsertedRow {
    id: serde_json::Value,
}

/// First inserted row id from a `return=representation` insert. Ids may
/// come back as strings or numbers depending on the column type.
pub fn parse_inserted_id(response: &HttpResponse) -> AppResult<String> {
    let rows: Vec<InsertedRow> = response
        .json()
        .map_err(|e| validation_error(format!("insert body: {e}")))?;
    let row = rows
        .first()
        .ok_or_else(|| validation_error("insert returned no rows"))?;
    match &row.id {
        serde_json::Value::String(s) if !s.is_empty() => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(validation_error(format!("unusable row id: {other}"))),
    }
}

#[derive(Debug, Deserialize)]
struct FavoriteRowWire {
    id: serde_json::Value,
    name: String,
    brand: String,
    description: String,
    price: String,
    image_url: String,
    purchase_url: String,
    #[serde(default)]
    category: Option<String>,
}

pub fn parse_favorites_list(response: &HttpResponse) -> AppResult<Vec<FavoriteRecord>> {
    let rows: Vec<FavoriteRowWire> = response
        .json()
        .map_err(|e| validation_error(format!("favorites body: {e}")))?;
    rows.into_iter()
        .map(|row| {
            let id = match row.id {
                serde_json::Value::String(s) if !s.is_empty() => s,
                serde_json::Value::Number(n) => n.to_string(),
                other => return Err(validation_error(format!("unusable favorite id: {other}"))),
            };
            Ok(FavoriteRecord {
                id,
                item: RecommendationItem {
                    name: row.name,
                    brand: row.brand,
                    description: row.description,
                    price: row.price,
                    image_url: row.image_url,
                    purchase_url: row.purchase_url,
                    category: normalize_category(row.category),
                },
            })
        })
        .collect()
}

pub fn parse_profile(response: &HttpResponse) -> AppResult<Option<UserProfile>> {
    let rows: Vec<UserProfile> = response
        .json()
        .map_err(|e| validation_error(format!("profile body: {e}")))?;
    Ok(rows.into_iter().next())
}
