use crate::{
    api_client::{
        ApiError,
        ApiResult,
        AuthGrant,
        CasesApi,
    },
    types::{
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
    },
};
use std::{
    cell::RefCell,
    collections::{
        HashMap,
        VecDeque,
    },
};

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Authenticate(AuthAction, String),
    ListCases,
    ListCaseItems(CaseId),
    OpenCase(UserId, CaseId),
    ListPromocodes(UserId),
    SellPromocode(PromoId, UserId),
    ListMarket,
    ListOnMarket(PromoId, UserId, f64),
    BuyFromMarket(MarketId, UserId),
    AdminStats(UserId),
    AdminUsers(UserId),
    AdminUpdateBalance(UserId, UserId, f64),
    AdminCreateCase(UserId, CaseDraft),
    AdminUpdateCase(UserId, CaseId, CaseDraft),
    AdminCreateItem(UserId, CaseId, ItemDraft),
    AdminUpdateItem(UserId, ItemId, ItemDraft),
}

/// In-memory storefront. Responses are queued per operation; an empty queue
/// answers with a rejection so tests notice unexpected calls.
#[derive(Default)]
pub struct FakeApi {
    calls: RefCell<Vec<Call>>,
    auth: RefCell<VecDeque<ApiResult<AuthGrant>>>,
    cases: RefCell<Vec<Case>>,
    items: RefCell<HashMap<CaseId, ApiResult<Vec<CaseItem>>>>,
    open: RefCell<VecDeque<ApiResult<Outcome>>>,
    promocodes: RefCell<Vec<Promocode>>,
    sales: RefCell<VecDeque<ApiResult<SaleReceipt>>>,
    market: RefCell<Vec<MarketListing>>,
    listings: RefCell<VecDeque<ApiResult<Option<MarketId>>>>,
    purchases: RefCell<VecDeque<ApiResult<Purchase>>>,
    admin_stats: RefCell<Option<AdminStats>>,
    admin_users: RefCell<Vec<AdminUser>>,
    next_id: RefCell<i64>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.borrow().iter().filter(|c| pred(c)).count()
    }

    pub fn with_cases(self, cases: Vec<Case>) -> Self {
        *self.cases.borrow_mut() = cases;
        self
    }

    pub fn with_items(self, case_id: CaseId, items: ApiResult<Vec<CaseItem>>) -> Self {
        self.items.borrow_mut().insert(case_id, items);
        self
    }

    pub fn with_promocodes(self, promos: Vec<Promocode>) -> Self {
        *self.promocodes.borrow_mut() = promos;
        self
    }

    pub fn with_market(self, listings: Vec<MarketListing>) -> Self {
        *self.market.borrow_mut() = listings;
        self
    }

    pub fn with_admin(self, stats: AdminStats, users: Vec<AdminUser>) -> Self {
        *self.admin_stats.borrow_mut() = Some(stats);
        *self.admin_users.borrow_mut() = users;
        self
    }

    pub fn push_auth(&self, result: ApiResult<AuthGrant>) {
        self.auth.borrow_mut().push_back(result);
    }

    pub fn push_open(&self, result: ApiResult<Outcome>) {
        self.open.borrow_mut().push_back(result);
    }

    pub fn push_sale(&self, result: ApiResult<SaleReceipt>) {
        self.sales.borrow_mut().push_back(result);
    }

    pub fn push_listing(&self, result: ApiResult<Option<MarketId>>) {
        self.listings.borrow_mut().push_back(result);
    }

    pub fn push_purchase(&self, result: ApiResult<Purchase>) {
        self.purchases.borrow_mut().push_back(result);
    }

    fn allocate_id(&self) -> i64 {
        let mut next = self.next_id.borrow_mut();
        *next += 1;
        1000 + *next
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn next<T>(queue: &RefCell<VecDeque<ApiResult<T>>>, what: &str) -> ApiResult<T> {
        queue
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Rejected(format!("no scripted {what}"))))
    }
}

impl CasesApi for FakeApi {
    async fn authenticate(
        &self,
        action: AuthAction,
        username: &str,
        _password: &str,
    ) -> ApiResult<AuthGrant> {
        self.record(Call::Authenticate(action, username.to_string()));
        Self::next(&self.auth, "auth")
    }

    async fn list_cases(&self) -> ApiResult<Vec<Case>> {
        self.record(Call::ListCases);
        Ok(self.cases.borrow().clone())
    }

    async fn list_case_items(&self, case_id: CaseId) -> ApiResult<Vec<CaseItem>> {
        self.record(Call::ListCaseItems(case_id));
        match self.items.borrow().get(&case_id) {
            Some(Ok(items)) => Ok(items.clone()),
            Some(Err(err)) => Err(ApiError::Rejected(err.to_string())),
            None => Ok(Vec::new()),
        }
    }

    async fn open_case(&self, user_id: UserId, case_id: CaseId) -> ApiResult<Outcome> {
        self.record(Call::OpenCase(user_id, case_id));
        Self::next(&self.open, "open case")
    }

    async fn list_promocodes(&self, user_id: UserId) -> ApiResult<Vec<Promocode>> {
        self.record(Call::ListPromocodes(user_id));
        Ok(self.promocodes.borrow().clone())
    }

    async fn sell_promocode(
        &self,
        promo_id: PromoId,
        user_id: UserId,
    ) -> ApiResult<SaleReceipt> {
        self.record(Call::SellPromocode(promo_id, user_id));
        Self::next(&self.sales, "sale")
    }

    async fn list_market(&self) -> ApiResult<Vec<MarketListing>> {
        self.record(Call::ListMarket);
        Ok(self.market.borrow().clone())
    }

    async fn list_on_market(
        &self,
        promo_id: PromoId,
        user_id: UserId,
        price: f64,
    ) -> ApiResult<Option<MarketId>> {
        self.record(Call::ListOnMarket(promo_id, user_id, price));
        Self::next(&self.listings, "listing")
    }

    async fn buy_from_market(
        &self,
        market_id: MarketId,
        user_id: UserId,
    ) -> ApiResult<Purchase> {
        self.record(Call::BuyFromMarket(market_id, user_id));
        Self::next(&self.purchases, "purchase")
    }

    async fn admin_stats(&self, admin_id: UserId) -> ApiResult<AdminStats> {
        self.record(Call::AdminStats(admin_id));
        self.admin_stats
            .borrow()
            .clone()
            .ok_or_else(|| ApiError::Rejected("Access denied".to_string()))
    }

    async fn admin_users(&self, admin_id: UserId) -> ApiResult<Vec<AdminUser>> {
        self.record(Call::AdminUsers(admin_id));
        Ok(self.admin_users.borrow().clone())
    }

    async fn admin_update_balance(
        &self,
        admin_id: UserId,
        user_id: UserId,
        balance: f64,
    ) -> ApiResult<()> {
        self.record(Call::AdminUpdateBalance(admin_id, user_id, balance));
        if let Some(user) = self
            .admin_users
            .borrow_mut()
            .iter_mut()
            .find(|u| u.id == user_id)
        {
            user.balance = balance;
        }
        Ok(())
    }

    async fn admin_create_case(&self, admin_id: UserId, draft: &CaseDraft) -> ApiResult<CaseId> {
        self.record(Call::AdminCreateCase(admin_id, draft.clone()));
        let id = self.allocate_id();
        self.cases.borrow_mut().push(Case {
            id,
            name: draft.name.clone(),
            description: draft.description.clone(),
            price: draft.price,
            image_url: None,
            rarity: draft.rarity,
        });
        Ok(id)
    }

    async fn admin_update_case(
        &self,
        admin_id: UserId,
        case_id: CaseId,
        draft: &CaseDraft,
    ) -> ApiResult<()> {
        self.record(Call::AdminUpdateCase(admin_id, case_id, draft.clone()));
        let mut cases = self.cases.borrow_mut();
        let case = cases
            .iter_mut()
            .find(|c| c.id == case_id)
            .ok_or_else(|| ApiError::Rejected("Case not found".to_string()))?;
        case.name = draft.name.clone();
        case.description = draft.description.clone();
        case.price = draft.price;
        case.rarity = draft.rarity;
        Ok(())
    }

    async fn admin_create_item(
        &self,
        admin_id: UserId,
        case_id: CaseId,
        draft: &ItemDraft,
    ) -> ApiResult<ItemId> {
        self.record(Call::AdminCreateItem(admin_id, case_id, draft.clone()));
        let id = self.allocate_id();
        let item = CaseItem {
            id,
            name: draft.name.clone(),
            description: draft.description.clone(),
            rarity: draft.rarity,
            image_url: None,
            drop_chance: Some(draft.drop_chance),
        };
        let mut items = self.items.borrow_mut();
        match items.entry(case_id).or_insert_with(|| Ok(Vec::new())) {
            Ok(list) => list.push(item),
            Err(_) => return Err(ApiError::Rejected("Case not found".to_string())),
        }
        Ok(id)
    }

    async fn admin_update_item(
        &self,
        admin_id: UserId,
        item_id: ItemId,
        draft: &ItemDraft,
    ) -> ApiResult<()> {
        self.record(Call::AdminUpdateItem(admin_id, item_id, draft.clone()));
        let mut items = self.items.borrow_mut();
        let item = items
            .values_mut()
            .filter_map(|list| list.as_mut().ok())
            .flatten()
            .find(|i| i.id == item_id)
            .ok_or_else(|| ApiError::Rejected("Item not found".to_string()))?;
        item.name = draft.name.clone();
        item.description = draft.description.clone();
        item.rarity = draft.rarity;
        item.drop_chance = Some(draft.drop_chance);
        Ok(())
    }
}

pub fn session(user_id: UserId, balance: f64) -> Session {
    Session {
        user_id,
        username: format!("player{user_id}"),
        balance,
        is_admin: false,
    }
}

pub fn grant(session: Session) -> AuthGrant {
    AuthGrant {
        token: format!("{}:token", session.user_id),
        session,
    }
}

pub fn item(id: i64, name: &str, rarity: Rarity) -> CaseItem {
    CaseItem {
        id,
        name: name.to_string(),
        description: Some(format!("{name} description")),
        rarity,
        image_url: None,
        drop_chance: None,
    }
}

pub fn case(id: CaseId, name: &str, price: f64) -> Case {
    Case {
        id,
        name: name.to_string(),
        description: None,
        price,
        image_url: None,
        rarity: Rarity::Common,
    }
}

pub fn admin(user_id: UserId, balance: f64) -> Session {
    Session {
        is_admin: true,
        ..session(user_id, balance)
    }
}

pub fn case_draft(name: &str, price: f64, rarity: Rarity) -> CaseDraft {
    CaseDraft {
        name: name.to_string(),
        description: None,
        price,
        rarity,
    }
}

pub fn item_draft(name: &str, rarity: Rarity, drop_chance: f64) -> ItemDraft {
    ItemDraft {
        name: name.to_string(),
        description: None,
        rarity,
        drop_chance,
    }
}

pub fn outcome(item: CaseItem, promo_code: &str, new_balance: f64) -> Outcome {
    Outcome {
        item,
        promo_code: promo_code.to_string(),
        new_balance,
    }
}

pub fn promocode(id: PromoId, code: &str, case_price: f64) -> Promocode {
    Promocode {
        id,
        promo_code: code.to_string(),
        item_name: format!("item {id}"),
        is_used: false,
        created_at: Some("2024-05-01 10:00:00".to_string()),
        rarity: Some(Rarity::Rare),
        description: None,
        case_name: Some("Starter".to_string()),
        case_price,
    }
}

pub fn listing(id: MarketId, promo_id: PromoId, seller_id: UserId, price: f64) -> MarketListing {
    MarketListing {
        id,
        promo_id,
        seller_id,
        seller_username: Some(format!("player{seller_id}")),
        item_name: format!("item {promo_id}"),
        rarity: Some(Rarity::Epic),
        case_name: None,
        price,
    }
}
