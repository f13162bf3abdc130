use crate::{
    api_client::{
        ApiError,
        CasesApi,
        Endpoints,
        HttpApi,
    },
    roulette::{
        self,
        RevealError,
        RevealPhase,
        RevealSequencer,
        RouletteStrip,
    },
    session::{
        SessionContext,
        SessionError,
        SessionStore,
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
        SaleReceipt,
        Session,
        UserId,
        format_money,
    },
    ui,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use rand::seq::SliceRandom;
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};
use thiserror::Error;
use tokio::time::{
    self,
    MissedTickBehavior,
};
use tracing::{
    error,
    info,
    warn,
};

const MAX_ERRORS: usize = 50;
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub endpoints: Endpoints,
    pub session_dir: PathBuf,
    pub reveal_delay: Duration,
}

/// Local checks that stop an action before any request goes out.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum Precondition {
    #[error("sign in to continue")]
    NotAuthenticated,
    #[error("a case is already being opened")]
    RevealInProgress,
    #[error("insufficient balance: case costs {}, you have {}", format_money(*price), format_money(*balance))]
    InsufficientBalance { price: f64, balance: f64 },
    #[error("price must be a positive amount")]
    InvalidPrice,
    #[error("balance must be zero or more")]
    InvalidBalance,
    #[error("you cannot buy your own listing")]
    OwnListing,
    #[error("admin access required")]
    NotAdmin,
    #[error("{0}")]
    InvalidDraft(&'static str),
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Precondition(#[from] Precondition),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Reveal(#[from] RevealError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ActionError {
    pub fn needs_auth(&self) -> bool {
        matches!(
            self,
            ActionError::Precondition(Precondition::NotAuthenticated)
                | ActionError::Session(SessionError::NoSession)
        )
    }
}

/// Everything the reveal overlay needs, held by the sequencer until dismissed.
#[derive(Clone, Debug)]
pub struct Reveal {
    pub case_name: String,
    pub outcome: Outcome,
    pub strip: Arc<RouletteStrip<CaseItem>>,
}

#[derive(Clone, Debug)]
pub struct RevealView {
    pub phase: RevealPhase,
    pub progress: f64,
    pub case_name: String,
    pub outcome: Outcome,
    pub strip: Arc<RouletteStrip<CaseItem>>,
}

#[derive(Clone, Debug, Default)]
pub struct AdminPanel {
    pub stats: AdminStats,
    pub users: Vec<AdminUser>,
}

#[derive(Clone, Debug, Default)]
pub struct AppSnapshot {
    pub session: Option<Session>,
    pub cases: Vec<Case>,
    pub case_items: HashMap<CaseId, Vec<CaseItem>>,
    pub promocodes: Vec<Promocode>,
    pub market: Vec<MarketListing>,
    pub admin: Option<AdminPanel>,
    pub reveal: Option<RevealView>,
    pub status: String,
    pub errors: Vec<String>,
}

pub struct AppController<A: CasesApi> {
    api: A,
    session: SessionContext,
    store: SessionStore,
    reveal: RevealSequencer<Reveal>,
    cases: Vec<Case>,
    case_items: HashMap<CaseId, Vec<CaseItem>>,
    promocodes: Vec<Promocode>,
    market: Vec<MarketListing>,
    admin: Option<AdminPanel>,
    pub status: String,
    pub errors: Vec<String>,
}

impl AppController<HttpApi> {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api = HttpApi::new(config.endpoints.clone())
            .wrap_err("Failed to build HTTP client")?;
        info!(%api, "configured storefront endpoints");
        Ok(Self::new(
            api,
            SessionStore::new(&config.session_dir),
            config.reveal_delay,
        ))
    }
}

impl<A: CasesApi> AppController<A> {
    pub fn new(api: A, store: SessionStore, reveal_delay: Duration) -> Self {
        Self {
            api,
            session: SessionContext::new(),
            store,
            reveal: RevealSequencer::new(reveal_delay),
            cases: Vec::new(),
            case_items: HashMap::new(),
            promocodes: Vec::new(),
            market: Vec::new(),
            admin: None,
            status: String::new(),
            errors: Vec::new(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.current()
    }

    pub fn reveal_phase(&self) -> RevealPhase {
        self.reveal.phase()
    }

    pub fn reveal_deadline(&self) -> Option<Instant> {
        self.reveal.deadline()
    }

    pub fn cases(&self) -> &[Case] {
        &self.cases
    }

    pub fn promocodes(&self) -> &[Promocode] {
        &self.promocodes
    }

    pub fn market(&self) -> &[MarketListing] {
        &self.market
    }

    pub fn admin(&self) -> Option<&AdminPanel> {
        self.admin.as_ref()
    }

    pub(crate) fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
        self.errors.clear();
    }

    pub(crate) fn push_errors(&mut self, mut items: Vec<String>) {
        if items.is_empty() {
            return;
        }
        for item in &items {
            error!("{}", item);
        }
        self.errors.append(&mut items);
        if self.errors.len() > MAX_ERRORS {
            let drain = self.errors.len() - MAX_ERRORS;
            self.errors.drain(0..drain);
        }
    }

    /// Restores the session saved by a previous run. Returns whether one was found.
    pub fn rehydrate(&mut self) -> Result<bool> {
        match self.store.load()? {
            Some((session, token)) => {
                info!(user_id = session.user_id, username = %session.username, "restored session");
                self.set_status(format!("Welcome back, {}", session.username));
                self.session.replace_session(session, token);
                Ok(true)
            }
            None => {
                self.set_status("Not signed in. Press a to sign in");
                Ok(false)
            }
        }
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), ActionError> {
        self.authenticate(AuthAction::Login, username, password).await
    }

    pub async fn register(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<(), ActionError> {
        self.authenticate(AuthAction::Register, username, password)
            .await
    }

    pub async fn authenticate(
        &mut self,
        action: AuthAction,
        username: &str,
        password: &str,
    ) -> Result<(), ActionError> {
        if !self.reveal.is_idle() {
            return Err(Precondition::RevealInProgress.into());
        }
        let grant = self.api.authenticate(action, username, password).await?;
        info!(%action, user_id = grant.session.user_id, "signed in");
        let greeting = format!("Signed in as {}", grant.session.username);
        self.session.replace_session(grant.session, grant.token);
        self.drop_user_caches();
        self.set_status(greeting);
        self.persist_session();
        if let Err(err) = self.load_promocodes().await {
            self.push_errors(vec![format!("Loading promo codes failed: {err}")]);
        }
        Ok(())
    }

    pub fn logout(&mut self) -> Result<(), ActionError> {
        if !self.reveal.is_idle() {
            return Err(Precondition::RevealInProgress.into());
        }
        self.session.clear_session();
        self.drop_user_caches();
        if let Err(err) = self.store.clear() {
            self.push_errors(vec![format!("Failed to remove saved session: {err}")]);
            return Ok(());
        }
        info!("signed out");
        self.set_status("Signed out");
        Ok(())
    }

    /// Cases and, when signed in, promo codes, fetched side by side.
    pub async fn load_initial(&mut self) {
        let user_id = self.session.current().map(|s| s.user_id);
        let api = &self.api;
        let (cases, promos) = futures::join!(api.list_cases(), async {
            match user_id {
                Some(id) => Some(api.list_promocodes(id).await),
                None => None,
            }
        });
        match cases {
            Ok(cases) => self.cases = cases,
            Err(err) => self.push_errors(vec![format!("Loading cases failed: {err}")]),
        }
        match promos {
            Some(Ok(promos)) => self.promocodes = promos,
            Some(Err(err)) => {
                self.push_errors(vec![format!("Loading promo codes failed: {err}")])
            }
            None => {}
        }
    }

    pub async fn load_cases(&mut self) -> Result<(), ActionError> {
        self.cases = self.api.list_cases().await?;
        Ok(())
    }

    /// Item catalog for one case, fetched once and then served from cache.
    pub async fn load_case_items(
        &mut self,
        case_id: CaseId,
    ) -> Result<Vec<CaseItem>, ActionError> {
        if let Some(items) = self.case_items.get(&case_id) {
            return Ok(items.clone());
        }
        let items = self.api.list_case_items(case_id).await?;
        self.case_items.insert(case_id, items.clone());
        Ok(items)
    }

    /// Buys and opens a case. The reveal starts only after the server has
    /// decided the outcome and charged the balance.
    pub async fn open_case(&mut self, case_id: CaseId, now: Instant) -> Result<(), ActionError> {
        let session = self
            .session
            .current()
            .cloned()
            .ok_or(Precondition::NotAuthenticated)?;
        if !self.reveal.is_idle() {
            return Err(Precondition::RevealInProgress.into());
        }
        let case = self.cases.iter().find(|c| c.id == case_id).cloned();
        if let Some(case) = &case
            && case.price > session.balance
        {
            return Err(Precondition::InsufficientBalance {
                price: case.price,
                balance: session.balance,
            }
            .into());
        }

        let outcome = self.api.open_case(session.user_id, case_id).await?;
        info!(
            case_id,
            item = %outcome.item.name,
            rarity = %outcome.item.rarity,
            new_balance = outcome.new_balance,
            "case opened"
        );

        let mut catalog = match self.load_case_items(case_id).await {
            Ok(items) => items,
            Err(err) => {
                warn!(case_id, %err, "case catalog unavailable, revealing without decoys");
                Vec::new()
            }
        };
        catalog.shuffle(&mut rand::rng());
        let strip = roulette::build_strip(&catalog, outcome.item.clone());

        self.session.apply_balance(outcome.new_balance)?;

        let case_name = case
            .map(|c| c.name)
            .unwrap_or_else(|| format!("case #{case_id}"));
        self.set_status(format!("Opening {case_name}..."));
        self.persist_session();
        self.reveal.begin(
            Reveal {
                case_name,
                outcome,
                strip: Arc::new(strip),
            },
            now,
        )?;
        Ok(())
    }

    /// Advances the reveal clock. Returns true when the result just became visible.
    pub async fn tick(&mut self, now: Instant) -> bool {
        if !self.reveal.poll(now) {
            return false;
        }
        let announcement = self.reveal.payload().map(|r| {
            format!(
                "{} {} ({}) from {}",
                r.outcome.item.rarity.emoji(),
                r.outcome.item.name,
                r.outcome.item.rarity,
                r.case_name
            )
        });
        if let Some(message) = announcement {
            self.set_status(message);
        }
        if let Err(err) = self.load_promocodes().await {
            self.push_errors(vec![format!("Refreshing promo codes failed: {err}")]);
        }
        true
    }

    pub fn dismiss_reveal(&mut self) -> Result<Reveal, ActionError> {
        Ok(self.reveal.dismiss()?)
    }

    pub async fn load_promocodes(&mut self) -> Result<(), ActionError> {
        let session = self.require_session()?;
        self.promocodes = self.api.list_promocodes(session.user_id).await?;
        Ok(())
    }

    pub async fn sell_promocode(
        &mut self,
        promo_id: PromoId,
    ) -> Result<SaleReceipt, ActionError> {
        let session = self.require_session()?;
        let receipt = self
            .api
            .sell_promocode(promo_id, session.user_id)
            .await?;
        info!(promo_id, sold_for = receipt.sold_for, "promo code sold");
        self.session.apply_balance(receipt.new_balance)?;
        self.promocodes.retain(|p| p.id != promo_id);
        self.set_status(format!("Sold for {}", format_money(receipt.sold_for)));
        self.persist_session();
        Ok(receipt)
    }

    pub async fn load_market(&mut self) -> Result<(), ActionError> {
        self.market = self.api.list_market().await?;
        Ok(())
    }

    pub async fn list_on_market(
        &mut self,
        promo_id: PromoId,
        price: f64,
    ) -> Result<Option<MarketId>, ActionError> {
        let session = self.require_session()?;
        if !price.is_finite() || price <= 0.0 {
            return Err(Precondition::InvalidPrice.into());
        }
        let listing = self
            .api
            .list_on_market(promo_id, session.user_id, price)
            .await?;
        info!(promo_id, price, ?listing, "promo code listed");
        self.promocodes.retain(|p| p.id != promo_id);
        self.set_status(format!("Listed for {}", format_money(price)));
        if let Err(err) = self.load_market().await {
            self.push_errors(vec![format!("Refreshing market failed: {err}")]);
        }
        Ok(listing)
    }

    pub async fn buy_from_market(
        &mut self,
        market_id: MarketId,
    ) -> Result<Purchase, ActionError> {
        let session = self.require_session()?;
        if self
            .market
            .iter()
            .any(|l| l.id == market_id && l.seller_id == session.user_id)
        {
            return Err(Precondition::OwnListing.into());
        }
        let purchase = self
            .api
            .buy_from_market(market_id, session.user_id)
            .await?;
        info!(market_id, new_balance = purchase.new_balance, "listing bought");
        self.session.apply_balance(purchase.new_balance)?;
        self.market.retain(|l| l.id != market_id);
        let message = match &purchase.promo_code {
            Some(code) => format!("Bought! Your code: {code}"),
            None => "Bought!".to_string(),
        };
        self.set_status(message);
        self.persist_session();
        if let Err(err) = self.load_promocodes().await {
            self.push_errors(vec![format!("Refreshing promo codes failed: {err}")]);
        }
        Ok(purchase)
    }

    pub async fn load_admin(&mut self) -> Result<(), ActionError> {
        let admin = self.require_admin()?;
        let (stats, users) = futures::try_join!(
            self.api.admin_stats(admin.user_id),
            self.api.admin_users(admin.user_id)
        )?;
        self.admin = Some(AdminPanel { stats, users });
        Ok(())
    }

    /// Sets another user's balance. The signed-in admin's own balance is left
    /// alone locally even when they edit themselves.
    pub async fn admin_update_balance(
        &mut self,
        user_id: UserId,
        balance: f64,
    ) -> Result<(), ActionError> {
        let admin = self.require_admin()?;
        if !balance.is_finite() || balance < 0.0 {
            return Err(Precondition::InvalidBalance.into());
        }
        self.api
            .admin_update_balance(admin.user_id, user_id, balance)
            .await?;
        info!(admin_id = admin.user_id, user_id, balance, "balance updated");
        if let Some(user) = self
            .admin
            .as_mut()
            .and_then(|panel| panel.users.iter_mut().find(|u| u.id == user_id))
        {
            user.balance = balance;
        }
        self.set_status(format!(
            "Balance of user {user_id} set to {}",
            format_money(balance)
        ));
        Ok(())
    }

    pub async fn admin_create_case(&mut self, draft: CaseDraft) -> Result<CaseId, ActionError> {
        let admin = self.require_admin()?;
        check_case_draft(&draft)?;
        let case_id = self.api.admin_create_case(admin.user_id, &draft).await?;
        info!(admin_id = admin.user_id, case_id, name = %draft.name, "case created");
        self.set_status(format!("Created case {}", draft.name));
        self.refresh_cases_after_edit().await;
        Ok(case_id)
    }

    pub async fn admin_update_case(
        &mut self,
        case_id: CaseId,
        draft: CaseDraft,
    ) -> Result<(), ActionError> {
        let admin = self.require_admin()?;
        check_case_draft(&draft)?;
        self.api
            .admin_update_case(admin.user_id, case_id, &draft)
            .await?;
        info!(admin_id = admin.user_id, case_id, "case updated");
        self.set_status(format!("Saved case {}", draft.name));
        self.refresh_cases_after_edit().await;
        Ok(())
    }

    pub async fn admin_create_item(
        &mut self,
        case_id: CaseId,
        draft: ItemDraft,
    ) -> Result<ItemId, ActionError> {
        let admin = self.require_admin()?;
        check_item_draft(&draft)?;
        let item_id = self
            .api
            .admin_create_item(admin.user_id, case_id, &draft)
            .await?;
        info!(admin_id = admin.user_id, case_id, item_id, "case item created");
        self.case_items.remove(&case_id);
        self.set_status(format!("Added {} to case #{case_id}", draft.name));
        self.refresh_case_items_after_edit(case_id).await;
        Ok(item_id)
    }

    /// `case_id` names the catalog to refresh; the server keys the edit on `item_id` alone.
    pub async fn admin_update_item(
        &mut self,
        case_id: CaseId,
        item_id: ItemId,
        draft: ItemDraft,
    ) -> Result<(), ActionError> {
        let admin = self.require_admin()?;
        check_item_draft(&draft)?;
        self.api
            .admin_update_item(admin.user_id, item_id, &draft)
            .await?;
        info!(admin_id = admin.user_id, item_id, "case item updated");
        self.case_items.remove(&case_id);
        self.set_status(format!("Saved item {}", draft.name));
        self.refresh_case_items_after_edit(case_id).await;
        Ok(())
    }

    async fn refresh_cases_after_edit(&mut self) {
        if let Err(err) = self.load_cases().await {
            self.push_errors(vec![format!("Refreshing cases failed: {err}")]);
        }
    }

    async fn refresh_case_items_after_edit(&mut self, case_id: CaseId) {
        if let Err(err) = self.load_case_items(case_id).await {
            self.push_errors(vec![format!("Refreshing case items failed: {err}")]);
        }
    }

    pub fn snapshot(&self, now: Instant) -> AppSnapshot {
        let reveal = self.reveal.payload().map(|r| RevealView {
            phase: self.reveal.phase(),
            progress: self.reveal.progress(now),
            case_name: r.case_name.clone(),
            outcome: r.outcome.clone(),
            strip: Arc::clone(&r.strip),
        });
        AppSnapshot {
            session: self.session.current().cloned(),
            cases: self.cases.clone(),
            case_items: self.case_items.clone(),
            promocodes: self.promocodes.clone(),
            market: self.market.clone(),
            admin: self.admin.clone(),
            reveal,
            status: self.status.clone(),
            errors: self.errors.clone(),
        }
    }

    fn require_session(&self) -> Result<Session, Precondition> {
        self.session
            .current()
            .cloned()
            .ok_or(Precondition::NotAuthenticated)
    }

    fn require_admin(&self) -> Result<Session, Precondition> {
        let session = self.require_session()?;
        if !session.is_admin {
            return Err(Precondition::NotAdmin);
        }
        Ok(session)
    }

    fn drop_user_caches(&mut self) {
        self.promocodes.clear();
        self.admin = None;
    }

    /// Call after `set_status`, which would otherwise clear the failure notice.
    fn persist_session(&mut self) {
        let (Some(session), Some(token)) = (self.session.current(), self.session.token())
        else {
            return;
        };
        if let Err(err) = self.store.save(session, token) {
            warn!(%err, "failed to persist session");
            self.push_errors(vec![format!("Failed to save session: {err}")]);
        }
    }
}

fn check_case_draft(draft: &CaseDraft) -> Result<(), Precondition> {
    if draft.name.trim().is_empty() {
        return Err(Precondition::InvalidDraft("case name is required"));
    }
    if !draft.price.is_finite() || draft.price <= 0.0 {
        return Err(Precondition::InvalidPrice);
    }
    Ok(())
}

fn check_item_draft(draft: &ItemDraft) -> Result<(), Precondition> {
    if draft.name.trim().is_empty() {
        return Err(Precondition::InvalidDraft("item name is required"));
    }
    if !(draft.drop_chance.is_finite() && draft.drop_chance > 0.0 && draft.drop_chance <= 100.0) {
        return Err(Precondition::InvalidDraft("drop chance must be above 0 and at most 100"));
    }
    Ok(())
}

pub async fn run_app<A: CasesApi>(controller: AppController<A>) -> Result<()> {
    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();

    info!("Starting UI");
    ui::terminal_enter(&mut ui_state)?;
    info!("UI ready");
    let res = run_loop(controller, &mut ui_state, &mut input_events).await;
    ui::terminal_exit()?;
    res
}

/// Shows a failed action to the user. Missing sign-in opens the sign-in modal.
pub fn report_error<A: CasesApi>(
    controller: &mut AppController<A>,
    ui_state: &mut ui::UiState,
    context: &str,
    err: ActionError,
) {
    if err.needs_auth() {
        ui_state.open_auth(AuthAction::Login);
    }
    controller.push_errors(vec![format!("{context}: {err}")]);
}

fn show_processing_status<A: CasesApi>(
    controller: &mut AppController<A>,
    ui_state: &mut ui::UiState,
    message: impl Into<String>,
    context: &'static str,
) -> Result<()> {
    controller.set_status(message);
    let snapshot = controller.snapshot(Instant::now());
    ui::draw(ui_state, &snapshot).wrap_err(context)
}

async fn until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

async fn load_tab<A: CasesApi>(
    controller: &mut AppController<A>,
    ui_state: &mut ui::UiState,
    tab: ui::Tab,
) -> Result<()> {
    let (message, context) = match tab {
        ui::Tab::Cases => ("Loading cases...", "Loading cases failed"),
        ui::Tab::Promocodes => ("Loading promo codes...", "Loading promo codes failed"),
        ui::Tab::Market => ("Loading market...", "Loading market failed"),
        ui::Tab::Admin => ("Loading admin panel...", "Loading admin panel failed"),
    };
    show_processing_status(controller, ui_state, message, "draw while loading tab failed")?;
    let result = match tab {
        ui::Tab::Cases => controller.load_cases().await,
        ui::Tab::Promocodes => controller.load_promocodes().await,
        ui::Tab::Market => controller.load_market().await,
        ui::Tab::Admin => controller.load_admin().await,
    };
    match result {
        Ok(()) => controller.set_status("Ready"),
        Err(err) => report_error(controller, ui_state, context, err),
    }
    Ok(())
}

async fn run_loop<A: CasesApi>(
    mut controller: AppController<A>,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
) -> Result<()> {
    info!("Running app loop");
    show_processing_status(
        &mut controller,
        ui_state,
        "Loading cases...",
        "initial draw failed",
    )?;
    controller.load_initial().await;
    if controller.errors.is_empty() {
        controller.set_status("Ready");
    }

    let mut frames = time::interval(FRAME_INTERVAL);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let snapshot = controller.snapshot(Instant::now());
        ui::draw(ui_state, &snapshot).wrap_err("draw failed")?;

        let deadline = controller.reveal_deadline();
        tokio::select! {
            // SIGINT sent from outside; in raw mode a typed Ctrl-C arrives as a key
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = until_deadline(deadline) => {
                controller.tick(Instant::now()).await;
            }
            _ = frames.tick(), if deadline.is_some() => {}
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(ui_state, event) else {
                    continue;
                };
                match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Redraw => {}
                    ui::UserEvent::TabChanged(tab) | ui::UserEvent::Refresh(tab) => {
                        load_tab(&mut controller, ui_state, tab).await?;
                    }
                    ui::UserEvent::CaseSelected(case_id) => {
                        if let Err(err) = controller.load_case_items(case_id).await {
                            report_error(&mut controller, ui_state, "Loading case items failed", err);
                        }
                    }
                    ui::UserEvent::OpenCase(case_id) => {
                        show_processing_status(
                            &mut controller,
                            ui_state,
                            "Opening case...",
                            "draw while opening case failed",
                        )?;
                        if let Err(err) = controller.open_case(case_id, Instant::now()).await {
                            report_error(&mut controller, ui_state, "Case opening failed", err);
                        }
                    }
                    ui::UserEvent::DismissReveal => {
                        if let Err(err) = controller.dismiss_reveal() {
                            report_error(&mut controller, ui_state, "Dismiss failed", err);
                        }
                    }
                    ui::UserEvent::SubmitAuth { action, username, password } => {
                        show_processing_status(
                            &mut controller,
                            ui_state,
                            format!("Signing in as {username}..."),
                            "draw while signing in failed",
                        )?;
                        if let Err(err) = controller.authenticate(action, &username, &password).await {
                            let context = match action {
                                AuthAction::Login => "Sign in failed",
                                AuthAction::Register => "Registration failed",
                            };
                            report_error(&mut controller, ui_state, context, err);
                            ui_state.open_auth(action);
                        }
                    }
                    ui::UserEvent::Logout => {
                        if let Err(err) = controller.logout() {
                            report_error(&mut controller, ui_state, "Sign out failed", err);
                        }
                    }
                    ui::UserEvent::SellPromocode(promo_id) => {
                        show_processing_status(
                            &mut controller,
                            ui_state,
                            "Selling promo code...",
                            "draw while selling failed",
                        )?;
                        if let Err(err) = controller.sell_promocode(promo_id).await {
                            report_error(&mut controller, ui_state, "Sale failed", err);
                        }
                    }
                    ui::UserEvent::ListOnMarket { promo_id, price } => {
                        show_processing_status(
                            &mut controller,
                            ui_state,
                            "Listing on market...",
                            "draw while listing failed",
                        )?;
                        if let Err(err) = controller.list_on_market(promo_id, price).await {
                            report_error(&mut controller, ui_state, "Listing failed", err);
                        }
                    }
                    ui::UserEvent::BuyListing(market_id) => {
                        show_processing_status(
                            &mut controller,
                            ui_state,
                            "Buying...",
                            "draw while buying failed",
                        )?;
                        if let Err(err) = controller.buy_from_market(market_id).await {
                            report_error(&mut controller, ui_state, "Purchase failed", err);
                        }
                    }
                    ui::UserEvent::SetUserBalance { user_id, balance } => {
                        show_processing_status(
                            &mut controller,
                            ui_state,
                            "Updating balance...",
                            "draw while updating balance failed",
                        )?;
                        if let Err(err) = controller.admin_update_balance(user_id, balance).await {
                            report_error(&mut controller, ui_state, "Balance update failed", err);
                        }
                    }
                    ui::UserEvent::SaveCase { case_id, draft } => {
                        show_processing_status(
                            &mut controller,
                            ui_state,
                            "Saving case...",
                            "draw while saving case failed",
                        )?;
                        let result = match case_id {
                            Some(id) => controller.admin_update_case(id, draft).await,
                            None => controller.admin_create_case(draft).await.map(|_| ()),
                        };
                        if let Err(err) = result {
                            report_error(&mut controller, ui_state, "Saving case failed", err);
                        }
                    }
                    ui::UserEvent::SaveItem { case_id, item_id, draft } => {
                        show_processing_status(
                            &mut controller,
                            ui_state,
                            "Saving item...",
                            "draw while saving item failed",
                        )?;
                        let result = match item_id {
                            Some(id) => controller.admin_update_item(case_id, id, draft).await,
                            None => controller.admin_create_item(case_id, draft).await.map(|_| ()),
                        };
                        if let Err(err) = result {
                            report_error(&mut controller, ui_state, "Saving item failed", err);
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        test_helpers::{
            self,
            Call,
            FakeApi,
        },
        types::Rarity,
    };
    use tempdir::TempDir;

    const DELAY: Duration = Duration::from_millis(3000);

    fn controller(api: FakeApi) -> (AppController<FakeApi>, TempDir) {
        let tmp = TempDir::new("case-portal-client").unwrap();
        let store = SessionStore::new(tmp.path());
        (AppController::new(api, store, DELAY), tmp)
    }

    fn signed_in(api: FakeApi, balance: f64) -> (AppController<FakeApi>, TempDir) {
        let (mut ctrl, tmp) = controller(api);
        ctrl.session
            .replace_session(test_helpers::session(7, balance), "7:token");
        (ctrl, tmp)
    }

    fn catalog() -> Vec<CaseItem> {
        (1..=5)
            .map(|i| test_helpers::item(i, &format!("decoy {i}"), Rarity::Common))
            .collect()
    }

    fn jackpot() -> CaseItem {
        test_helpers::item(99, "Golden Ticket", Rarity::Legendary)
    }

    #[tokio::test]
    async fn open_case__success_charges_balance_and_starts_reveal() {
        // given
        let api = FakeApi::new()
            .with_cases(vec![test_helpers::case(3, "Starter", 100.0)])
            .with_items(3, Ok(catalog()));
        api.push_open(Ok(test_helpers::outcome(jackpot(), "ABC123", 900.0)));
        let (mut ctrl, _tmp) = signed_in(api, 1000.0);
        ctrl.load_cases().await.unwrap();
        let t0 = Instant::now();

        // when
        ctrl.open_case(3, t0).await.unwrap();

        // then
        assert_eq!(ctrl.session().map(|s| s.balance), Some(900.0));
        assert_eq!(ctrl.reveal_phase(), RevealPhase::Suspense);
        let snap = ctrl.snapshot(t0);
        let reveal = snap.reveal.expect("reveal view");
        assert_eq!(reveal.strip.len(), 21);
        assert_eq!(reveal.strip.pointer_index(), 10);
        assert_eq!(reveal.strip.winner(), Some(&jackpot()));
        assert_eq!(reveal.outcome.promo_code, "ABC123");
        assert_eq!(reveal.case_name, "Starter");
    }

    #[tokio::test]
    async fn open_case__insufficient_balance_is_rejected_locally() {
        // given
        let api = FakeApi::new().with_cases(vec![test_helpers::case(3, "Premium", 500.0)]);
        let (mut ctrl, _tmp) = signed_in(api, 100.0);
        ctrl.load_cases().await.unwrap();

        // when
        let result = ctrl.open_case(3, Instant::now()).await;

        // then
        assert!(matches!(
            result,
            Err(ActionError::Precondition(Precondition::InsufficientBalance { .. }))
        ));
        assert_eq!(ctrl.session().map(|s| s.balance), Some(100.0));
        assert_eq!(ctrl.reveal_phase(), RevealPhase::Idle);
        assert_eq!(ctrl.api().count(|c| matches!(c, Call::OpenCase(..))), 0);
    }

    #[tokio::test]
    async fn open_case__server_rejection_leaves_state_untouched() {
        // given
        let api = FakeApi::new();
        api.push_open(Err(ApiError::Rejected("Insufficient balance".to_string())));
        let (mut ctrl, _tmp) = signed_in(api, 100.0);

        // when
        let result = ctrl.open_case(3, Instant::now()).await;

        // then
        match result {
            Err(ActionError::Api(ApiError::Rejected(msg))) => {
                assert_eq!(msg, "Insufficient balance")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ctrl.session().map(|s| s.balance), Some(100.0));
        assert_eq!(ctrl.reveal_phase(), RevealPhase::Idle);
    }

    #[tokio::test]
    async fn open_case__without_session_needs_auth_and_skips_remote_call() {
        // given
        let (mut ctrl, _tmp) = controller(FakeApi::new());

        // when
        let err = ctrl.open_case(3, Instant::now()).await.unwrap_err();

        // then
        assert!(err.needs_auth());
        assert!(ctrl.api().calls().is_empty());
        assert_eq!(ctrl.reveal_phase(), RevealPhase::Idle);
    }

    #[tokio::test]
    async fn open_case__during_reveal_is_rejected_not_queued() {
        // given
        let api = FakeApi::new();
        api.push_open(Ok(test_helpers::outcome(jackpot(), "FIRST", 900.0)));
        api.push_open(Ok(test_helpers::outcome(jackpot(), "SECOND", 800.0)));
        let (mut ctrl, _tmp) = signed_in(api, 1000.0);
        let t0 = Instant::now();
        ctrl.open_case(3, t0).await.unwrap();
        let deadline = ctrl.reveal_deadline();

        // when
        let result = ctrl.open_case(3, t0 + Duration::from_millis(500)).await;

        // then
        assert!(matches!(
            result,
            Err(ActionError::Precondition(Precondition::RevealInProgress))
        ));
        assert_eq!(ctrl.reveal_deadline(), deadline);
        assert_eq!(ctrl.session().map(|s| s.balance), Some(900.0));
        assert_eq!(ctrl.api().count(|c| matches!(c, Call::OpenCase(..))), 1);
    }

    #[tokio::test]
    async fn open_case__unavailable_catalog_reveals_outcome_alone() {
        // given
        let api = FakeApi::new().with_items(
            3,
            Err(ApiError::Rejected("Case not found".to_string())),
        );
        api.push_open(Ok(test_helpers::outcome(jackpot(), "ONLY", 50.0)));
        let (mut ctrl, _tmp) = signed_in(api, 100.0);
        let t0 = Instant::now();

        // when
        ctrl.open_case(3, t0).await.unwrap();

        // then
        let reveal = ctrl.snapshot(t0).reveal.unwrap();
        assert_eq!(reveal.strip.len(), 1);
        assert_eq!(reveal.strip.pointer_index(), 0);
        assert_eq!(reveal.strip.winner(), Some(&jackpot()));
    }

    #[tokio::test]
    async fn tick__reveals_after_delay_and_refreshes_promocodes() {
        // given
        let api = FakeApi::new()
            .with_promocodes(vec![test_helpers::promocode(1, "ABC123", 100.0)]);
        api.push_open(Ok(test_helpers::outcome(jackpot(), "ABC123", 900.0)));
        let (mut ctrl, _tmp) = signed_in(api, 1000.0);
        let t0 = Instant::now();
        ctrl.open_case(3, t0).await.unwrap();

        // when
        let early = ctrl.tick(t0 + Duration::from_millis(2999)).await;

        // then
        assert!(!early);
        assert_eq!(ctrl.reveal_phase(), RevealPhase::Suspense);
        assert!(ctrl.promocodes().is_empty());

        // when
        let revealed = ctrl.tick(t0 + DELAY).await;

        // then
        assert!(revealed);
        assert_eq!(ctrl.reveal_phase(), RevealPhase::Result);
        assert_eq!(ctrl.promocodes().len(), 1);
        assert!(ctrl.status.contains("Golden Ticket"));
    }

    #[tokio::test]
    async fn dismiss_reveal__returns_to_idle_and_allows_next_opening() {
        // given
        let api = FakeApi::new();
        api.push_open(Ok(test_helpers::outcome(jackpot(), "ONE", 900.0)));
        api.push_open(Ok(test_helpers::outcome(jackpot(), "TWO", 800.0)));
        let (mut ctrl, _tmp) = signed_in(api, 1000.0);
        let t0 = Instant::now();
        ctrl.open_case(3, t0).await.unwrap();
        assert!(ctrl.dismiss_reveal().is_err());
        ctrl.tick(t0 + DELAY).await;

        // when
        let reveal = ctrl.dismiss_reveal().unwrap();

        // then
        assert_eq!(reveal.outcome.promo_code, "ONE");
        assert_eq!(ctrl.reveal_phase(), RevealPhase::Idle);
        assert!(ctrl.snapshot(t0).reveal.is_none());
        ctrl.open_case(3, t0 + DELAY).await.unwrap();
        assert_eq!(ctrl.session().map(|s| s.balance), Some(800.0));
    }

    #[tokio::test]
    async fn login__persists_session_for_rehydrate() {
        // given
        let api = FakeApi::new();
        api.push_auth(Ok(test_helpers::grant(test_helpers::session(7, 1000.0))));
        let (mut ctrl, tmp) = controller(api);

        // when
        ctrl.login("player7", "hunter2").await.unwrap();

        // then
        assert_eq!(ctrl.session().map(|s| s.user_id), Some(7));
        let mut restored =
            AppController::new(FakeApi::new(), SessionStore::new(tmp.path()), DELAY);
        assert!(restored.rehydrate().unwrap());
        assert_eq!(restored.session(), ctrl.session());
    }

    #[tokio::test]
    async fn login__rejection_keeps_previous_state() {
        // given
        let api = FakeApi::new();
        api.push_auth(Err(ApiError::Rejected("Invalid credentials".to_string())));
        let (mut ctrl, _tmp) = controller(api);

        // when
        let result = ctrl.login("player7", "wrong").await;

        // then
        assert!(matches!(result, Err(ActionError::Api(ApiError::Rejected(_)))));
        assert!(ctrl.session().is_none());
    }

    #[tokio::test]
    async fn logout__clears_session_and_saved_files() {
        // given
        let (mut ctrl, tmp) = signed_in(FakeApi::new(), 10.0);
        ctrl.persist_session();

        // when
        ctrl.logout().unwrap();

        // then
        assert!(ctrl.session().is_none());
        assert!(SessionStore::new(tmp.path()).load().unwrap().is_none());
    }

    #[tokio::test]
    async fn sell_promocode__applies_server_balance() {
        // given
        let api = FakeApi::new()
            .with_promocodes(vec![test_helpers::promocode(4, "SELLME", 200.0)]);
        api.push_sale(Ok(SaleReceipt {
            sold_for: 100.0,
            new_balance: 150.0,
        }));
        let (mut ctrl, _tmp) = signed_in(api, 50.0);
        ctrl.load_promocodes().await.unwrap();

        // when
        let receipt = ctrl.sell_promocode(4).await.unwrap();

        // then
        assert_eq!(receipt.sold_for, 100.0);
        assert_eq!(ctrl.session().map(|s| s.balance), Some(150.0));
        assert!(ctrl.promocodes().is_empty());
    }

    #[tokio::test]
    async fn list_on_market__rejects_non_positive_prices() {
        let (mut ctrl, _tmp) = signed_in(FakeApi::new(), 50.0);
        for price in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let result = ctrl.list_on_market(4, price).await;
            assert!(matches!(
                result,
                Err(ActionError::Precondition(Precondition::InvalidPrice))
            ));
        }
        assert!(ctrl.api().calls().is_empty());
    }

    #[tokio::test]
    async fn buy_from_market__own_listing_is_rejected_locally() {
        // given
        let api = FakeApi::new().with_market(vec![test_helpers::listing(11, 4, 7, 70.0)]);
        let (mut ctrl, _tmp) = signed_in(api, 500.0);
        ctrl.load_market().await.unwrap();

        // when
        let result = ctrl.buy_from_market(11).await;

        // then
        assert!(matches!(
            result,
            Err(ActionError::Precondition(Precondition::OwnListing))
        ));
        assert_eq!(
            ctrl.api().count(|c| matches!(c, Call::BuyFromMarket(..))),
            0
        );
    }

    #[tokio::test]
    async fn buy_from_market__applies_server_balance_and_drops_listing() {
        // given
        let api = FakeApi::new().with_market(vec![test_helpers::listing(11, 4, 8, 70.0)]);
        api.push_purchase(Ok(Purchase {
            new_balance: 430.0,
            promo_code: Some("BOUGHT01".to_string()),
        }));
        let (mut ctrl, _tmp) = signed_in(api, 500.0);
        ctrl.load_market().await.unwrap();

        // when
        ctrl.buy_from_market(11).await.unwrap();

        // then
        assert_eq!(ctrl.session().map(|s| s.balance), Some(430.0));
        assert!(ctrl.market().is_empty());
        assert!(ctrl.status.contains("BOUGHT01"));
    }

    #[tokio::test]
    async fn admin_update_balance__requires_admin_and_leaves_own_session_alone() {
        // given
        let users = vec![AdminUser {
            id: 7,
            username: "player7".to_string(),
            email: None,
            balance: 10.0,
            is_admin: true,
            created_at: None,
        }];
        let api = FakeApi::new().with_admin(AdminStats::default(), users);
        let (mut ctrl, _tmp) = signed_in(api, 10.0);
        assert!(matches!(
            ctrl.load_admin().await,
            Err(ActionError::Precondition(Precondition::NotAdmin))
        ));
        let mut admin = test_helpers::session(7, 10.0);
        admin.is_admin = true;
        ctrl.session.replace_session(admin, "7:token");
        ctrl.load_admin().await.unwrap();

        // when
        ctrl.admin_update_balance(7, 5000.0).await.unwrap();

        // then
        assert_eq!(ctrl.session().map(|s| s.balance), Some(10.0));
        let panel = ctrl.admin().unwrap();
        assert_eq!(panel.users[0].balance, 5000.0);
        assert!(matches!(
            ctrl.admin_update_balance(7, -1.0).await,
            Err(ActionError::Precondition(Precondition::InvalidBalance))
        ));
    }

    #[test]
    fn push_errors__keeps_most_recent_fifty() {
        let (mut ctrl, _tmp) = controller(FakeApi::new());
        ctrl.push_errors((0..60).map(|i| format!("error {i}")).collect());
        assert_eq!(ctrl.errors.len(), 50);
        assert_eq!(ctrl.errors[0], "error 10");
        ctrl.set_status("ok");
        assert!(ctrl.errors.is_empty());
    }

    #[tokio::test]
    async fn open_case__save_failure_stays_visible_after_status_update() {
        // given
        let api = FakeApi::new();
        api.push_open(Ok(test_helpers::outcome(jackpot(), "KEEP", 900.0)));
        let tmp = TempDir::new("case-portal-client").unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let mut ctrl = AppController::new(api, SessionStore::new(&blocker), DELAY);
        ctrl.session
            .replace_session(test_helpers::session(7, 1000.0), "7:token");

        // when
        ctrl.open_case(3, Instant::now()).await.unwrap();

        // then
        assert_eq!(ctrl.session().map(|s| s.balance), Some(900.0));
        assert!(ctrl.status.starts_with("Opening"));
        let snap = ctrl.snapshot(Instant::now());
        assert_eq!(snap.errors.len(), 1);
        assert!(snap.errors[0].starts_with("Failed to save session"));
    }

    #[tokio::test]
    async fn sell_promocode__save_failure_stays_visible() {
        // given
        let api = FakeApi::new();
        api.push_sale(Ok(SaleReceipt {
            sold_for: 50.0,
            new_balance: 150.0,
        }));
        let tmp = TempDir::new("case-portal-client").unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let mut ctrl = AppController::new(api, SessionStore::new(&blocker), DELAY);
        ctrl.session
            .replace_session(test_helpers::session(7, 100.0), "7:token");

        // when
        ctrl.sell_promocode(4).await.unwrap();

        // then
        assert!(ctrl.status.starts_with("Sold for"));
        assert_eq!(ctrl.errors.len(), 1);
    }

    #[tokio::test]
    async fn report_error__missing_session_opens_sign_in() {
        // given
        let (mut ctrl, _tmp) = controller(FakeApi::new());
        let mut ui_state = ui::UiState::default();
        let err = ctrl.open_case(3, Instant::now()).await.unwrap_err();

        // when
        report_error(&mut ctrl, &mut ui_state, "Case opening failed", err);

        // then
        assert_eq!(ui_state.auth_prompt(), Some(AuthAction::Login));
        assert_eq!(ctrl.errors, vec!["Case opening failed: sign in to continue"]);
    }

    #[tokio::test]
    async fn report_error__other_failures_leave_the_ui_alone() {
        // given
        let (mut ctrl, _tmp) = signed_in(FakeApi::new(), 10.0);
        let mut ui_state = ui::UiState::default();
        let err = ctrl.list_on_market(4, 0.0).await.unwrap_err();

        // when
        report_error(&mut ctrl, &mut ui_state, "Listing failed", err);

        // then
        assert!(!ui_state.is_modal_open());
        assert_eq!(ctrl.errors.len(), 1);
    }

    #[tokio::test]
    async fn admin_create_case__requires_admin_and_refreshes_cases() {
        // given
        let api = FakeApi::new().with_cases(vec![test_helpers::case(1, "Starter", 100.0)]);
        let (mut ctrl, _tmp) = signed_in(api, 10.0);
        let draft = test_helpers::case_draft("Night Market", 250.0, Rarity::Epic);
        assert!(matches!(
            ctrl.admin_create_case(draft.clone()).await,
            Err(ActionError::Precondition(Precondition::NotAdmin))
        ));
        ctrl.session
            .replace_session(test_helpers::admin(7, 10.0), "7:token");

        // when
        let case_id = ctrl.admin_create_case(draft.clone()).await.unwrap();

        // then
        assert!(ctrl.api().calls().contains(&Call::AdminCreateCase(7, draft)));
        let created = ctrl.cases().iter().find(|c| c.id == case_id).unwrap();
        assert_eq!(created.name, "Night Market");
        assert_eq!(created.rarity, Rarity::Epic);
        assert_eq!(ctrl.cases().len(), 2);
    }

    #[tokio::test]
    async fn admin_update_case__rejects_bad_drafts_before_calling() {
        // given
        let api = FakeApi::new().with_cases(vec![test_helpers::case(1, "Starter", 100.0)]);
        let (mut ctrl, _tmp) = controller(api);
        ctrl.session
            .replace_session(test_helpers::admin(7, 10.0), "7:token");

        // when
        let blank = ctrl
            .admin_update_case(1, test_helpers::case_draft("  ", 100.0, Rarity::Common))
            .await;
        let free = ctrl
            .admin_update_case(1, test_helpers::case_draft("Starter", 0.0, Rarity::Common))
            .await;
        ctrl.admin_update_case(1, test_helpers::case_draft("Starter+", 120.0, Rarity::Rare))
            .await
            .unwrap();

        // then
        assert!(matches!(
            blank,
            Err(ActionError::Precondition(Precondition::InvalidDraft(_)))
        ));
        assert!(matches!(
            free,
            Err(ActionError::Precondition(Precondition::InvalidPrice))
        ));
        assert_eq!(ctrl.api().count(|c| matches!(c, Call::AdminUpdateCase(..))), 1);
        assert_eq!(ctrl.cases()[0].name, "Starter+");
        assert_eq!(ctrl.cases()[0].price, 120.0);
    }

    #[tokio::test]
    async fn admin_create_item__invalidates_cached_catalog() {
        // given
        let api = FakeApi::new().with_items(3, Ok(catalog()));
        let (mut ctrl, _tmp) = controller(api);
        ctrl.session
            .replace_session(test_helpers::admin(7, 10.0), "7:token");
        assert_eq!(ctrl.load_case_items(3).await.unwrap().len(), 5);

        // when
        let item_id = ctrl
            .admin_create_item(3, test_helpers::item_draft("Oppressor", Rarity::Legendary, 0.5))
            .await
            .unwrap();

        // then
        let items = ctrl.load_case_items(3).await.unwrap();
        assert_eq!(items.len(), 6);
        let added = items.iter().find(|i| i.id == item_id).unwrap();
        assert_eq!(added.drop_chance, Some(0.5));
        assert!(matches!(
            ctrl.admin_create_item(3, test_helpers::item_draft("Dud", Rarity::Common, 0.0))
                .await,
            Err(ActionError::Precondition(Precondition::InvalidDraft(_)))
        ));
    }

    #[tokio::test]
    async fn admin_update_item__sends_item_id_and_reloads_catalog() {
        // given
        let api = FakeApi::new().with_items(3, Ok(catalog()));
        let (mut ctrl, _tmp) = controller(api);
        ctrl.session
            .replace_session(test_helpers::admin(7, 10.0), "7:token");
        ctrl.load_case_items(3).await.unwrap();
        let draft = test_helpers::item_draft("decoy 2 (signed)", Rarity::Rare, 15.0);

        // when
        ctrl.admin_update_item(3, 2, draft.clone()).await.unwrap();

        // then
        assert!(ctrl.api().calls().contains(&Call::AdminUpdateItem(7, 2, draft)));
        let items = ctrl.load_case_items(3).await.unwrap();
        let edited = items.iter().find(|i| i.id == 2).unwrap();
        assert_eq!(edited.name, "decoy 2 (signed)");
        assert_eq!(edited.rarity, Rarity::Rare);
        assert_eq!(
            ctrl.api().count(|c| matches!(c, Call::ListCaseItems(3))),
            2
        );
    }

}
