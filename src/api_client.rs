use crate::types::{
    AdminStats,
    AdminUser,
    AuthAction,
    Case,
    CaseDraft,
    CaseId,
    CaseItem,
    ItemDraft,
    ItemId,
    MarketId,
    MarketListing,
    Outcome,
    PromoId,
    Promocode,
    Purchase,
    Rarity,
    SaleReceipt,
    Session,
    UserId,
};
use reqwest::StatusCode;
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};
use serde_json::json;
use std::{
    fmt,
    path::Path,
    time::Duration,
};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_AUTH_URL: &str =
    "https://functions.poehali.dev/2683cf66-ae47-4961-a937-86b9459ed44d";
pub const DEFAULT_CASES_URL: &str =
    "https://functions.poehali.dev/a6cc4837-3e34-4908-895c-15f350d4bf82";
pub const DEFAULT_OPEN_CASE_URL: &str =
    "https://functions.poehali.dev/5cfb3c0a-db96-4cd3-af03-bbd6fca3f334";
pub const DEFAULT_PROMOCODES_URL: &str =
    "https://functions.poehali.dev/25402768-5a7d-4294-b821-840ad2c01266";
pub const DEFAULT_ADMIN_URL: &str =
    "https://functions.poehali.dev/95f066f2-b22c-4926-97d8-63e7dbfcf506";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_ID_HEADER: &str = "X-User-Id";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("connection failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server responded with {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("{0}")]
    Rejected(String),
    #[error("invalid response payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("{0} endpoint is not configured")]
    NotConfigured(&'static str),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Clone, Debug, PartialEq)]
pub struct AuthGrant {
    pub session: Session,
    pub token: String,
}

/// Everything the client asks of the remote storefront. Each call is a
/// single attempt; failures come back to the caller untouched.
pub trait CasesApi {
    fn authenticate(
        &self,
        action: AuthAction,
        username: &str,
        password: &str,
    ) -> impl Future<Output = ApiResult<AuthGrant>>;

    fn list_cases(&self) -> impl Future<Output = ApiResult<Vec<Case>>>;

    fn list_case_items(
        &self,
        case_id: CaseId,
    ) -> impl Future<Output = ApiResult<Vec<CaseItem>>>;

    fn open_case(
        &self,
        user_id: UserId,
        case_id: CaseId,
    ) -> impl Future<Output = ApiResult<Outcome>>;

    fn list_promocodes(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = ApiResult<Vec<Promocode>>>;

    fn sell_promocode(
        &self,
        promo_id: PromoId,
        user_id: UserId,
    ) -> impl Future<Output = ApiResult<SaleReceipt>>;

    fn list_market(&self) -> impl Future<Output = ApiResult<Vec<MarketListing>>>;

    fn list_on_market(
        &self,
        promo_id: PromoId,
        user_id: UserId,
        price: f64,
    ) -> impl Future<Output = ApiResult<Option<MarketId>>>;

    fn buy_from_market(
        &self,
        market_id: MarketId,
        user_id: UserId,
    ) -> impl Future<Output = ApiResult<Purchase>>;

    fn admin_stats(
        &self,
        admin_id: UserId,
    ) -> impl Future<Output = ApiResult<AdminStats>>;

    fn admin_users(
        &self,
        admin_id: UserId,
    ) -> impl Future<Output = ApiResult<Vec<AdminUser>>>;

    fn admin_update_balance(
        &self,
        admin_id: UserId,
        user_id: UserId,
        balance: f64,
    ) -> impl Future<Output = ApiResult<()>>;

    fn admin_create_case(
        &self,
        admin_id: UserId,
        draft: &CaseDraft,
    ) -> impl Future<Output = ApiResult<CaseId>>;

    fn admin_update_case(
        &self,
        admin_id: UserId,
        case_id: CaseId,
        draft: &CaseDraft,
    ) -> impl Future<Output = ApiResult<()>>;

    fn admin_create_item(
        &self,
        admin_id: UserId,
        case_id: CaseId,
        draft: &ItemDraft,
    ) -> impl Future<Output = ApiResult<ItemId>>;

    fn admin_update_item(
        &self,
        admin_id: UserId,
        item_id: ItemId,
        draft: &ItemDraft,
    ) -> impl Future<Output = ApiResult<()>>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub auth: String,
    pub cases: String,
    pub open_case: String,
    pub promocodes: String,
    pub market: Option<String>,
    pub admin: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            auth: DEFAULT_AUTH_URL.to_string(),
            cases: DEFAULT_CASES_URL.to_string(),
            open_case: DEFAULT_OPEN_CASE_URL.to_string(),
            promocodes: DEFAULT_PROMOCODES_URL.to_string(),
            market: None,
            admin: DEFAULT_ADMIN_URL.to_string(),
        }
    }
}

impl Endpoints {
    /// Reads a JSON file; keys that are missing keep their defaults.
    pub fn from_file(path: &Path) -> color_eyre::eyre::Result<Self> {
        use color_eyre::eyre::WrapErr;
        let raw = std::fs::read(path)
            .wrap_err_with(|| format!("Failed to read endpoints file {}", path.display()))?;
        serde_json::from_slice(&raw).wrap_err("Failed to parse endpoints file")
    }
}

#[derive(Clone)]
pub struct HttpApi {
    endpoints: Endpoints,
    http: reqwest::Client,
}

impl HttpApi {
    pub fn new(endpoints: Endpoints) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { endpoints, http })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn market_url(&self) -> ApiResult<&str> {
        self.endpoints
            .market
            .as_deref()
            .ok_or(ApiError::NotConfigured("marketplace"))
    }

    async fn admin_post<T: DeserializeOwned>(
        &self,
        what: &'static str,
        admin_id: UserId,
        body: &serde_json::Value,
    ) -> ApiResult<T> {
        self.finish(
            what,
            self.http
                .post(&self.endpoints.admin)
                .header(USER_ID_HEADER, admin_id.to_string())
                .json(body),
        )
        .await
    }

    async fn finish<T: DeserializeOwned>(
        &self,
        what: &'static str,
        request: reqwest::RequestBuilder,
    ) -> ApiResult<T> {
        let res = request.send().await?;
        let status = res.status();
        let bytes = res.bytes().await?;
        debug!(endpoint = what, %status, len = bytes.len(), "response received");
        decode_response(status, &bytes)
    }
}

impl CasesApi for HttpApi {
    async fn authenticate(
        &self,
        action: AuthAction,
        username: &str,
        password: &str,
    ) -> ApiResult<AuthGrant> {
        let body = json!({ "action": action, "username": username, "password": password });
        let dto: AuthDto = self
            .finish("auth", self.http.post(&self.endpoints.auth).json(&body))
            .await?;
        Ok(AuthGrant {
            session: dto.user,
            token: dto.token,
        })
    }

    async fn list_cases(&self) -> ApiResult<Vec<Case>> {
        self.finish("cases", self.http.get(&self.endpoints.cases))
            .await
    }

    async fn list_case_items(&self, case_id: CaseId) -> ApiResult<Vec<CaseItem>> {
        let dto: CaseDetailDto = self
            .finish(
                "case items",
                self.http
                    .get(&self.endpoints.cases)
                    .query(&[("case_id", case_id)]),
            )
            .await?;
        Ok(dto.into_items())
    }

    async fn open_case(&self, user_id: UserId, case_id: CaseId) -> ApiResult<Outcome> {
        let body = json!({ "user_id": user_id, "case_id": case_id });
        let dto: OpenCaseDto = self
            .finish(
                "open case",
                self.http.post(&self.endpoints.open_case).json(&body),
            )
            .await?;
        Ok(dto.into())
    }

    async fn list_promocodes(&self, user_id: UserId) -> ApiResult<Vec<Promocode>> {
        self.finish(
            "promocodes",
            self.http
                .get(&self.endpoints.promocodes)
                .query(&[("user_id", user_id)]),
        )
        .await
    }

    async fn sell_promocode(
        &self,
        promo_id: PromoId,
        user_id: UserId,
    ) -> ApiResult<SaleReceipt> {
        let body = json!({ "promo_id": promo_id, "user_id": user_id });
        let dto: SaleDto = self
            .finish(
                "sell promocode",
                self.http.post(&self.endpoints.promocodes).json(&body),
            )
            .await?;
        Ok(SaleReceipt {
            sold_for: dto.sold_for,
            new_balance: dto.new_balance,
        })
    }

    async fn list_market(&self) -> ApiResult<Vec<MarketListing>> {
        let url = self.market_url()?;
        self.finish("market", self.http.get(url)).await
    }

    async fn list_on_market(
        &self,
        promo_id: PromoId,
        user_id: UserId,
        price: f64,
    ) -> ApiResult<Option<MarketId>> {
        let url = self.market_url()?;
        let body = json!({
            "action": "list",
            "promo_id": promo_id,
            "user_id": user_id,
            "price": price,
        });
        let dto: ListingDto = self
            .finish("market listing", self.http.post(url).json(&body))
            .await?;
        Ok(dto.market_id)
    }

    async fn buy_from_market(
        &self,
        market_id: MarketId,
        user_id: UserId,
    ) -> ApiResult<Purchase> {
        let url = self.market_url()?;
        let body = json!({ "action": "buy", "market_id": market_id, "user_id": user_id });
        let dto: PurchaseDto = self
            .finish("market purchase", self.http.post(url).json(&body))
            .await?;
        Ok(Purchase {
            new_balance: dto.new_balance,
            promo_code: dto.promo_code,
        })
    }

    async fn admin_stats(&self, admin_id: UserId) -> ApiResult<AdminStats> {
        self.finish(
            "admin stats",
            self.http
                .get(&self.endpoints.admin)
                .query(&[("action", "stats")])
                .header(USER_ID_HEADER, admin_id.to_string()),
        )
        .await
    }

    async fn admin_users(&self, admin_id: UserId) -> ApiResult<Vec<AdminUser>> {
        self.finish(
            "admin users",
            self.http
                .get(&self.endpoints.admin)
                .query(&[("action", "users")])
                .header(USER_ID_HEADER, admin_id.to_string()),
        )
        .await
    }

    async fn admin_update_balance(
        &self,
        admin_id: UserId,
        user_id: UserId,
        balance: f64,
    ) -> ApiResult<()> {
        let body = json!({
            "action": "update_balance",
            "user_id": user_id,
            "balance": balance,
        });
        let _: Acknowledged = self.admin_post("admin balance", admin_id, &body).await?;
        Ok(())
    }

    async fn admin_create_case(&self, admin_id: UserId, draft: &CaseDraft) -> ApiResult<CaseId> {
        let body = case_body("create_case", None, draft);
        let dto: CreatedCaseDto = self.admin_post("admin create case", admin_id, &body).await?;
        Ok(dto.case_id)
    }

    async fn admin_update_case(
        &self,
        admin_id: UserId,
        case_id: CaseId,
        draft: &CaseDraft,
    ) -> ApiResult<()> {
        let body = case_body("update_case", Some(case_id), draft);
        let _: Acknowledged = self.admin_post("admin update case", admin_id, &body).await?;
        Ok(())
    }

    async fn admin_create_item(
        &self,
        admin_id: UserId,
        case_id: CaseId,
        draft: &ItemDraft,
    ) -> ApiResult<ItemId> {
        let body = item_body("create_item", ("case_id", case_id), draft);
        let dto: CreatedItemDto = self.admin_post("admin create item", admin_id, &body).await?;
        Ok(dto.item_id)
    }

    async fn admin_update_item(
        &self,
        admin_id: UserId,
        item_id: ItemId,
        draft: &ItemDraft,
    ) -> ApiResult<()> {
        let body = item_body("update_item", ("item_id", item_id), draft);
        let _: Acknowledged = self.admin_post("admin update item", admin_id, &body).await?;
        Ok(())
    }
}

fn case_body(action: &str, case_id: Option<CaseId>, draft: &CaseDraft) -> serde_json::Value {
    let mut body = json!({
        "action": action,
        "name": draft.name,
        "description": draft.description,
        "price": draft.price,
        "rarity": draft.rarity,
    });
    if let Some(id) = case_id {
        body["case_id"] = json!(id);
    }
    body
}

fn item_body(action: &str, target: (&str, i64), draft: &ItemDraft) -> serde_json::Value {
    let mut body = json!({
        "action": action,
        "name": draft.name,
        "description": draft.description,
        "rarity": draft.rarity,
        "drop_chance": draft.drop_chance,
    });
    body[target.0] = json!(target.1);
    body
}

impl fmt::Display for HttpApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.endpoints.cases)
    }
}

/// Turns a status and raw body into a payload, a domain rejection or a
/// transport-level error.
///
/// The storefront answers failures with `{"error": "..."}` (often with a
/// 4xx status) or `{"success": false, ...}`. Both count as rejections.
pub fn decode_response<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> ApiResult<T> {
    if let Ok(rejection) = serde_json::from_slice::<RejectionDto>(body)
        && let Some(message) = rejection.into_message()
    {
        return Err(ApiError::Rejected(message));
    }
    if !status.is_success() {
        return Err(ApiError::Status {
            status,
            body: String::from_utf8_lossy(body).into_owned(),
        });
    }
    Ok(serde_json::from_slice(body)?)
}

#[derive(Deserialize)]
struct RejectionDto {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

impl RejectionDto {
    fn into_message(self) -> Option<String> {
        match (self.success, self.error) {
            (Some(true), _) => None,
            (_, Some(error)) => Some(error),
            (Some(false), None) => Some("Request was rejected".to_string()),
            (None, None) => None,
        }
    }
}

#[derive(Deserialize)]
struct Acknowledged {}

#[derive(Deserialize)]
struct AuthDto {
    user: Session,
    token: String,
}

#[derive(Deserialize)]
struct OpenCaseDto {
    item: CaseItem,
    promo_code: String,
    new_balance: f64,
}

impl From<OpenCaseDto> for Outcome {
    fn from(dto: OpenCaseDto) -> Self {
        Outcome {
            item: dto.item,
            promo_code: dto.promo_code,
            new_balance: dto.new_balance,
        }
    }
}

#[derive(Deserialize)]
struct CaseDetailDto {
    #[serde(default)]
    items: Vec<CaseItemRowDto>,
}

/// A row of the server's left join. Cases without items come back as a
/// single row of nulls.
#[derive(Deserialize)]
struct CaseItemRowDto {
    id: Option<ItemId>,
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    rarity: Option<Rarity>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    drop_chance: Option<f64>,
}

impl CaseDetailDto {
    fn into_items(self) -> Vec<CaseItem> {
        self.items
            .into_iter()
            .filter_map(|row| {
                Some(CaseItem {
                    id: row.id?,
                    name: row.name?,
                    description: row.description,
                    rarity: row.rarity.unwrap_or_default(),
                    image_url: row.image_url,
                    drop_chance: row.drop_chance,
                })
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct SaleDto {
    sold_for: f64,
    new_balance: f64,
}

#[derive(Deserialize)]
struct ListingDto {
    #[serde(default)]
    market_id: Option<MarketId>,
}

#[derive(Deserialize)]
struct CreatedCaseDto {
    case_id: CaseId,
}

#[derive(Deserialize)]
struct CreatedItemDto {
    item_id: ItemId,
}

#[derive(Deserialize)]
struct PurchaseDto {
    new_balance: f64,
    #[serde(default)]
    promo_code: Option<String>,
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn decode_response__error_body_is_rejection_at_any_status() {
        // given
        let body = br#"{"error": "Insufficient balance"}"#;

        // when
        let bad_request = decode_response::<OpenCaseDto>(StatusCode::BAD_REQUEST, body);
        let ok = decode_response::<OpenCaseDto>(StatusCode::OK, body);

        // then
        assert!(matches!(bad_request, Err(ApiError::Rejected(m)) if m == "Insufficient balance"));
        assert!(matches!(ok, Err(ApiError::Rejected(_))));
    }

    #[test]
    fn decode_response__success_false_without_message_is_rejection() {
        let result = decode_response::<Acknowledged>(StatusCode::OK, br#"{"success": false}"#);
        assert!(matches!(result, Err(ApiError::Rejected(_))));
    }

    #[test]
    fn decode_response__non_json_failure_is_status_error() {
        // when
        let result =
            decode_response::<Vec<Case>>(StatusCode::BAD_GATEWAY, b"<html>upstream</html>");

        // then
        match result {
            Err(ApiError::Status { status, body }) => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert!(body.contains("upstream"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn decode_response__open_case_payload_becomes_outcome() {
        // given
        let body = br#"{
            "success": true,
            "item": {"id": 3, "name": "Oppressor", "description": "Flying bike",
                     "rarity": "legendary", "image_url": null},
            "promo_code": "Q7W8E9R0T1Y2",
            "new_balance": 750.0
        }"#;

        // when
        let outcome: Outcome = decode_response::<OpenCaseDto>(StatusCode::OK, body)
            .unwrap()
            .into();

        // then
        assert_eq!(outcome.item.rarity, Rarity::Legendary);
        assert_eq!(outcome.promo_code, "Q7W8E9R0T1Y2");
        assert_eq!(outcome.new_balance, 750.0);
    }

    #[test]
    fn decode_response__malformed_success_payload_is_decode_error() {
        let result = decode_response::<SaleDto>(StatusCode::OK, br#"{"success": true}"#);
        assert!(matches!(result, Err(ApiError::Decode(_))));
    }

    #[test]
    fn case_detail__drops_null_rows_from_empty_case() {
        // given
        let body = br#"{"id": 1, "name": "Starter", "price": 100.0, "items": [
            {"id": null, "name": null, "description": null, "rarity": null,
             "drop_chance": null, "image_url": null}
        ]}"#;

        // when
        let items = decode_response::<CaseDetailDto>(StatusCode::OK, body)
            .unwrap()
            .into_items();

        // then
        assert!(items.is_empty());
    }

    #[test]
    fn case_detail__keeps_populated_rows() {
        let body = br#"{"id": 1, "items": [
            {"id": 10, "name": "Pistol", "rarity": "common", "drop_chance": 60.0},
            {"id": 11, "name": "Sultan", "rarity": "epic", "drop_chance": 5.0}
        ]}"#;
        let items = decode_response::<CaseDetailDto>(StatusCode::OK, body)
            .unwrap()
            .into_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].name, "Sultan");
        assert_eq!(items[1].rarity, Rarity::Epic);
    }

    #[test]
    fn endpoints__partial_override_keeps_defaults() {
        // given
        let raw = r#"{"market": "https://market.example.test"}"#;

        // when
        let endpoints: Endpoints = serde_json::from_str(raw).unwrap();

        // then
        assert_eq!(endpoints.auth, DEFAULT_AUTH_URL);
        assert_eq!(endpoints.market.as_deref(), Some("https://market.example.test"));
    }

    #[test]
    fn case_body__update_carries_case_id_and_lowercase_rarity() {
        // given
        let draft = CaseDraft {
            name: "Night Market".to_string(),
            description: None,
            price: 250.0,
            rarity: Rarity::Epic,
        };

        // when
        let created = case_body("create_case", None, &draft);
        let updated = case_body("update_case", Some(4), &draft);

        // then
        assert_eq!(created["action"], "create_case");
        assert!(created.get("case_id").is_none());
        assert_eq!(updated["case_id"], 4);
        assert_eq!(updated["rarity"], "epic");
        assert_eq!(updated["price"], 250.0);
        assert!(updated["description"].is_null());
    }

    #[test]
    fn item_body__names_the_target_key() {
        // given
        let draft = ItemDraft {
            name: "Sultan".to_string(),
            description: Some("Sports sedan".to_string()),
            rarity: Rarity::Rare,
            drop_chance: 12.5,
        };

        // when
        let created = item_body("create_item", ("case_id", 2), &draft);
        let updated = item_body("update_item", ("item_id", 31), &draft);

        // then
        assert_eq!(created["case_id"], 2);
        assert_eq!(updated["item_id"], 31);
        assert!(updated.get("case_id").is_none());
        assert_eq!(updated["drop_chance"], 12.5);
    }

    #[test]
    fn decode_response__created_case_returns_new_id() {
        let body = br#"{"success": true, "case_id": 17}"#;
        let dto = decode_response::<CreatedCaseDto>(StatusCode::OK, body).unwrap();
        assert_eq!(dto.case_id, 17);
    }

}
