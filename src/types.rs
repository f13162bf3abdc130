use chrono::{
    NaiveDate,
    NaiveDateTime,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

pub type UserId = i64;
pub type CaseId = i64;
pub type ItemId = i64;
pub type PromoId = i64;
pub type MarketId = i64;

const SALE_RATIO: f64 = 0.5;
const MARKET_RATIO: f64 = 0.7;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Rarity {
    /// Ordinal used for sorting. `Unknown` ranks below `Common`.
    pub fn rank(self) -> u8 {
        match self {
            Rarity::Unknown => 0,
            Rarity::Common => 1,
            Rarity::Rare => 2,
            Rarity::Epic => 3,
            Rarity::Legendary => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Rarity::Unknown => "unknown",
            Rarity::Common => "common",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
            Rarity::Legendary => "legendary",
        }
    }

    /// Parses a label as typed by an admin. Case and surrounding space are ignored.
    pub fn from_label(raw: &str) -> Option<Rarity> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "common" => Some(Rarity::Common),
            "rare" => Some(Rarity::Rare),
            "epic" => Some(Rarity::Epic),
            "legendary" => Some(Rarity::Legendary),
            _ => None,
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Rarity::Unknown => "❔",
            Rarity::Common => "🎁",
            Rarity::Rare => "💎",
            Rarity::Epic => "⭐",
            Rarity::Legendary => "👑",
        }
    }
}

impl Ord for Rarity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Rarity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaseItem {
    pub id: ItemId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rarity: Rarity,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub drop_chance: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub rarity: Rarity,
}

/// What the open-case endpoint decided. Never constructed locally from
/// anything but a successful response.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub item: CaseItem,
    pub promo_code: String,
    pub new_balance: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "id")]
    pub user_id: UserId,
    pub username: String,
    pub balance: f64,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Promocode {
    pub id: PromoId,
    pub promo_code: String,
    pub item_name: String,
    #[serde(default)]
    pub is_used: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub rarity: Option<Rarity>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub case_name: Option<String>,
    #[serde(default)]
    pub case_price: f64,
}

impl Promocode {
    pub fn created_date(&self) -> Option<NaiveDate> {
        let raw = self.created_at.as_deref()?.trim();
        if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(raw) {
            return Some(ts.date_naive());
        }
        ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|ts| ts.date())
            .or_else(|| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
    }

    pub fn sale_price_hint(&self) -> f64 {
        sale_price_hint(self.case_price)
    }

    pub fn market_price_hint(&self) -> f64 {
        market_price_hint(self.case_price)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MarketListing {
    pub id: MarketId,
    pub promo_id: PromoId,
    pub seller_id: UserId,
    #[serde(default)]
    pub seller_username: Option<String>,
    pub item_name: String,
    #[serde(default)]
    pub rarity: Option<Rarity>,
    #[serde(default)]
    pub case_name: Option<String>,
    pub price: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct AdminStats {
    pub total_users: u64,
    pub total_cases: u64,
    pub total_promocodes: u64,
    pub total_balance: f64,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AdminUser {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub balance: f64,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Fields an admin submits when creating or editing a case.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CaseDraft {
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub rarity: Rarity,
}

/// Fields an admin submits when creating or editing a case item.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ItemDraft {
    pub name: String,
    pub description: Option<String>,
    pub rarity: Rarity,
    pub drop_chance: f64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthAction {
    Login,
    Register,
}

impl fmt::Display for AuthAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthAction::Login => f.write_str("login"),
            AuthAction::Register => f.write_str("register"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SaleReceipt {
    pub sold_for: f64,
    pub new_balance: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Purchase {
    pub new_balance: f64,
    pub promo_code: Option<String>,
}

/// Buy-back price shown next to a promo code. The server decides the real one.
pub fn sale_price_hint(case_price: f64) -> f64 {
    case_price * SALE_RATIO
}

/// Suggested listing price on the marketplace.
pub fn market_price_hint(case_price: f64) -> f64 {
    case_price * MARKET_RATIO
}

pub fn format_money(amount: f64) -> String {
    format!("{amount:.2} ₽")
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn rarity__orders_common_below_legendary() {
        assert!(Rarity::Common < Rarity::Rare);
        assert!(Rarity::Rare < Rarity::Epic);
        assert!(Rarity::Epic < Rarity::Legendary);
        assert!(Rarity::Unknown < Rarity::Common);
    }

    #[test]
    fn rarity__sorting_puts_unknown_lowest() {
        // given
        let mut rarities = vec![
            Rarity::Legendary,
            Rarity::Unknown,
            Rarity::Epic,
            Rarity::Common,
        ];

        // when
        rarities.sort();

        // then
        assert_eq!(
            rarities,
            vec![Rarity::Unknown, Rarity::Common, Rarity::Epic, Rarity::Legendary]
        );
        assert_eq!(serde_json::to_string(&Rarity::Rare).unwrap(), "\"rare\"");
    }

    #[test]
    fn rarity__from_label_accepts_known_labels_only() {
        assert_eq!(Rarity::from_label(" Epic "), Some(Rarity::Epic));
        assert_eq!(Rarity::from_label("legendary"), Some(Rarity::Legendary));
        assert_eq!(Rarity::from_label("unknown"), None);
        assert_eq!(Rarity::from_label(""), None);
    }

    #[test]
    fn rarity__unknown_strings_deserialize_as_unknown() {
        // when
        let known: Rarity = serde_json::from_str("\"epic\"").unwrap();
        let unknown: Rarity = serde_json::from_str("\"mythic\"").unwrap();

        // then
        assert_eq!(known, Rarity::Epic);
        assert_eq!(unknown, Rarity::Unknown);
    }

    #[test]
    fn session__round_trips_server_user_shape() {
        // given
        let raw = r#"{"id": 7, "username": "vinewood", "balance": 1000.0, "is_admin": false}"#;

        // when
        let session: Session = serde_json::from_str(raw).unwrap();

        // then
        assert_eq!(session.user_id, 7);
        assert_eq!(session.username, "vinewood");
        let back = serde_json::to_value(&session).unwrap();
        assert_eq!(back["id"], 7);
    }

    #[test]
    fn promocode__created_date_accepts_server_timestamp_formats() {
        let mut promo = Promocode {
            id: 1,
            promo_code: "ABCDEF123456".to_string(),
            item_name: "Zentorno".to_string(),
            is_used: false,
            created_at: Some("2024-03-05 17:21:09.123456".to_string()),
            rarity: Some(Rarity::Legendary),
            description: None,
            case_name: None,
            case_price: 500.0,
        };
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5);
        assert_eq!(promo.created_date(), expected);

        promo.created_at = Some("2024-03-05T17:21:09+03:00".to_string());
        assert_eq!(promo.created_date(), expected);

        promo.created_at = Some("garbage".to_string());
        assert_eq!(promo.created_date(), None);
    }

    #[test]
    fn price_hints__are_fixed_fractions_of_case_price() {
        assert_eq!(sale_price_hint(500.0), 250.0);
        assert!((market_price_hint(500.0) - 350.0).abs() < 1e-9);
    }
}
