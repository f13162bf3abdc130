use crate::{
    client::{
        AppSnapshot,
        RevealView,
    },
    roulette::{
        self,
        RevealPhase,
    },
    types::{
        AuthAction,
        Case,
        CaseDraft,
        CaseId,
        CaseItem,
        ItemDraft,
        ItemId,
        MarketId,
        PromoId,
        Rarity,
        UserId,
        format_money,
    },
};
use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::{
    event::{
        self,
        Event,
        KeyCode,
        KeyEvent,
        KeyEventKind,
        KeyModifiers,
    },
    terminal::{
        disable_raw_mode,
        enable_raw_mode,
    },
};
use itertools::Itertools;
use ratatui::{
    prelude::*,
    widgets::*,
};
use std::io::{
    Stdout,
    stdout,
};
use tokio::sync::mpsc;
use unicode_width::UnicodeWidthChar;

const CELL_WIDTH: usize = 16;

#[derive(Clone, Debug, PartialEq)]
pub enum UserEvent {
    Quit,
    Redraw,
    TabChanged(Tab),
    Refresh(Tab),
    CaseSelected(CaseId),
    OpenCase(CaseId),
    DismissReveal,
    SubmitAuth {
        action: AuthAction,
        username: String,
        password: String,
    },
    Logout,
    SellPromocode(PromoId),
    ListOnMarket {
        promo_id: PromoId,
        price: f64,
    },
    BuyListing(MarketId),
    SetUserBalance {
        user_id: UserId,
        balance: f64,
    },
    SaveCase {
        case_id: Option<CaseId>,
        draft: CaseDraft,
    },
    SaveItem {
        case_id: CaseId,
        item_id: Option<ItemId>,
        draft: ItemDraft,
    },
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Tab {
    #[default]
    Cases,
    Promocodes,
    Market,
    Admin,
}

impl Tab {
    fn title(self) -> &'static str {
        match self {
            Tab::Cases => "Cases",
            Tab::Promocodes => "Promo codes",
            Tab::Market => "Market",
            Tab::Admin => "Admin",
        }
    }
}

fn visible_tabs(is_admin: bool) -> &'static [Tab] {
    if is_admin {
        &[Tab::Cases, Tab::Promocodes, Tab::Market, Tab::Admin]
    } else {
        &[Tab::Cases, Tab::Promocodes, Tab::Market]
    }
}

#[derive(Debug, Default)]
pub struct UiState {
    mode: Mode,
    tab: Tab,
    cursor: Cursor,
    view: ViewCache,
    terminal: Option<Terminal<CrosstermBackend<Stdout>>>,
}

#[derive(Clone, Debug, Default)]
struct Cursor {
    case: usize,
    item: usize,
    promo: usize,
    listing: usize,
    user: usize,
}

/// Rows of the last drawn snapshot, so key handling can resolve ids.
#[derive(Clone, Debug, Default)]
struct ViewCache {
    signed_in: bool,
    is_admin: bool,
    reveal: Option<RevealPhase>,
    cases: Vec<Case>,
    /// Catalog of the selected case, in display order.
    items: Vec<CaseItem>,
    promos: Vec<PromoRow>,
    listings: Vec<MarketId>,
    users: Vec<(UserId, String, f64)>,
}

#[derive(Clone, Debug)]
struct PromoRow {
    id: PromoId,
    code: String,
    sale_hint: f64,
    market_hint: f64,
}

#[derive(Clone, Debug, Default)]
enum Mode {
    #[default]
    Normal,
    Auth(AuthForm),
    SellConfirm(PromoRow),
    ListPrice(AmountInput),
    EditBalance(AmountInput),
    Draft(DraftForm),
    QuitModal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DraftTarget {
    NewCase,
    EditCase(CaseId),
    NewItem(CaseId),
    EditItem(CaseId, ItemId),
}

/// Admin form for a case or an item. Fields are edited as text and parsed on submit.
#[derive(Clone, Debug)]
struct DraftForm {
    target: DraftTarget,
    fields: Vec<(&'static str, String)>,
    focus: usize,
    problem: Option<&'static str>,
}

const CASE_FIELDS: [&str; 4] = ["Name", "Description", "Price", "Rarity"];
const ITEM_FIELDS: [&str; 4] = ["Name", "Description", "Rarity", "Drop chance %"];

impl DraftForm {
    fn new(target: DraftTarget, values: [String; 4]) -> Self {
        let labels = match target {
            DraftTarget::NewCase | DraftTarget::EditCase(_) => CASE_FIELDS,
            DraftTarget::NewItem(_) | DraftTarget::EditItem(..) => ITEM_FIELDS,
        };
        DraftForm {
            target,
            fields: labels.into_iter().zip(values).collect(),
            focus: 0,
            problem: None,
        }
    }

    fn new_case() -> Self {
        Self::new(
            DraftTarget::NewCase,
            [String::new(), String::new(), String::new(), "common".to_string()],
        )
    }

    fn edit_case(case: &Case) -> Self {
        Self::new(
            DraftTarget::EditCase(case.id),
            [
                case.name.clone(),
                case.description.clone().unwrap_or_default(),
                format!("{:.2}", case.price),
                case.rarity.label().to_string(),
            ],
        )
    }

    fn new_item(case_id: CaseId) -> Self {
        Self::new(
            DraftTarget::NewItem(case_id),
            [String::new(), String::new(), "common".to_string(), String::new()],
        )
    }

    fn edit_item(case_id: CaseId, item: &CaseItem) -> Self {
        Self::new(
            DraftTarget::EditItem(case_id, item.id),
            [
                item.name.clone(),
                item.description.clone().unwrap_or_default(),
                item.rarity.label().to_string(),
                item.drop_chance.map(|d| d.to_string()).unwrap_or_default(),
            ],
        )
    }

    fn title(&self) -> &'static str {
        match self.target {
            DraftTarget::NewCase => "New case",
            DraftTarget::EditCase(_) => "Edit case",
            DraftTarget::NewItem(_) => "New item",
            DraftTarget::EditItem(..) => "Edit item",
        }
    }

    fn value(&self, idx: usize) -> &str {
        self.fields[idx].1.trim()
    }

    fn description(&self) -> Option<String> {
        Some(self.value(1).to_string()).filter(|d| !d.is_empty())
    }

    fn rarity(&self, idx: usize) -> Result<Rarity, &'static str> {
        Rarity::from_label(self.value(idx)).ok_or("rarity must be common, rare, epic or legendary")
    }

    fn number(&self, idx: usize, problem: &'static str) -> Result<f64, &'static str> {
        self.value(idx).parse::<f64>().map_err(|_| problem)
    }

    /// Parses the fields into the event that saves them.
    fn submit(&self) -> Result<UserEvent, &'static str> {
        let name = self.value(0).to_string();
        if name.is_empty() {
            return Err("name is required");
        }
        match self.target {
            DraftTarget::NewCase | DraftTarget::EditCase(_) => {
                let draft = CaseDraft {
                    name,
                    description: self.description(),
                    price: self.number(2, "price must be a number")?,
                    rarity: self.rarity(3)?,
                };
                let case_id = match self.target {
                    DraftTarget::EditCase(id) => Some(id),
                    _ => None,
                };
                Ok(UserEvent::SaveCase { case_id, draft })
            }
            DraftTarget::NewItem(case_id) | DraftTarget::EditItem(case_id, _) => {
                let draft = ItemDraft {
                    name,
                    description: self.description(),
                    rarity: self.rarity(2)?,
                    drop_chance: self.number(3, "drop chance must be a number")?,
                };
                let item_id = match self.target {
                    DraftTarget::EditItem(_, id) => Some(id),
                    _ => None,
                };
                Ok(UserEvent::SaveItem {
                    case_id,
                    item_id,
                    draft,
                })
            }
        }
    }
}

#[derive(Clone, Debug)]
struct AuthForm {
    action: AuthAction,
    username: String,
    password: String,
    focus: AuthField,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum AuthField {
    #[default]
    Username,
    Password,
}

#[derive(Clone, Debug)]
struct AmountInput {
    target: i64,
    label: String,
    buffer: String,
    invalid: bool,
}

impl AmountInput {
    fn new(target: i64, label: String, initial: f64) -> Self {
        AmountInput {
            target,
            label,
            buffer: format!("{initial:.2}"),
            invalid: false,
        }
    }

    fn parse(&self) -> Option<f64> {
        self.buffer.trim().parse::<f64>().ok()
    }
}

impl UiState {
    pub fn tab(&self) -> Tab {
        self.tab
    }

    pub fn open_auth(&mut self, action: AuthAction) {
        self.mode = Mode::Auth(AuthForm {
            action,
            username: String::new(),
            password: String::new(),
            focus: AuthField::default(),
        });
    }

    pub fn is_modal_open(&self) -> bool {
        !matches!(self.mode, Mode::Normal)
    }

    /// The action the sign-in modal is set to, when that modal is showing.
    pub fn auth_prompt(&self) -> Option<AuthAction> {
        match &self.mode {
            Mode::Auth(form) => Some(form.action),
            _ => None,
        }
    }

    /// Takes in the rows of a fresh snapshot and keeps cursors in range.
    pub fn observe(&mut self, snap: &AppSnapshot) {
        let view = &mut self.view;
        view.signed_in = snap.session.is_some();
        view.is_admin = snap.session.as_ref().is_some_and(|s| s.is_admin);
        view.reveal = snap.reveal.as_ref().map(|r| r.phase);
        view.cases = snap.cases.clone();
        view.items = snap
            .cases
            .get(self.cursor.case.min(snap.cases.len().saturating_sub(1)))
            .and_then(|c| snap.case_items.get(&c.id))
            .map(|items| catalog_order(items).into_iter().cloned().collect())
            .unwrap_or_default();
        view.promos = snap
            .promocodes
            .iter()
            .filter(|p| !p.is_used)
            .map(|p| PromoRow {
                id: p.id,
                code: p.promo_code.clone(),
                sale_hint: p.sale_price_hint(),
                market_hint: p.market_price_hint(),
            })
            .collect();
        view.listings = snap.market.iter().map(|l| l.id).collect();
        view.users = snap
            .admin
            .as_ref()
            .map(|a| {
                a.users
                    .iter()
                    .map(|u| (u.id, u.username.clone(), u.balance))
                    .collect()
            })
            .unwrap_or_default();

        let clamp = |idx: &mut usize, len: usize| *idx = (*idx).min(len.saturating_sub(1));
        clamp(&mut self.cursor.case, view.cases.len());
        clamp(&mut self.cursor.item, view.items.len());
        clamp(&mut self.cursor.promo, view.promos.len());
        clamp(&mut self.cursor.listing, view.listings.len());
        clamp(&mut self.cursor.user, view.users.len());
        if !visible_tabs(view.is_admin).contains(&self.tab) {
            self.tab = Tab::Cases;
        }
    }

    fn switch_tab(&mut self, forward: bool) -> Tab {
        let tabs = visible_tabs(self.view.is_admin);
        let pos = tabs.iter().position(|t| *t == self.tab).unwrap_or(0);
        let next = if forward {
            (pos + 1) % tabs.len()
        } else {
            (pos + tabs.len() - 1) % tabs.len()
        };
        self.tab = tabs[next];
        self.tab
    }

    fn move_cursor(&mut self, down: bool) -> Option<UserEvent> {
        let (idx, len) = match self.tab {
            Tab::Cases => (&mut self.cursor.case, self.view.cases.len()),
            Tab::Promocodes => (&mut self.cursor.promo, self.view.promos.len()),
            Tab::Market => (&mut self.cursor.listing, self.view.listings.len()),
            Tab::Admin => (&mut self.cursor.user, self.view.users.len()),
        };
        if down {
            if *idx + 1 < len {
                *idx += 1;
            }
        } else {
            *idx = idx.saturating_sub(1);
        }
        if self.tab == Tab::Cases
            && let Some(case) = self.view.cases.get(self.cursor.case)
        {
            self.cursor.item = 0;
            return Some(UserEvent::CaseSelected(case.id));
        }
        Some(UserEvent::Redraw)
    }

    fn move_item_cursor(&mut self, down: bool) -> Option<UserEvent> {
        let len = self.view.items.len();
        if down {
            if self.cursor.item + 1 < len {
                self.cursor.item += 1;
            }
        } else {
            self.cursor.item = self.cursor.item.saturating_sub(1);
        }
        Some(UserEvent::Redraw)
    }

    fn selected_case(&self) -> Option<&Case> {
        self.view.cases.get(self.cursor.case)
    }

    fn selected_promo(&self) -> Option<&PromoRow> {
        self.view.promos.get(self.cursor.promo)
    }
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::terminal::EnterAlternateScreen,
        crossterm::event::EnableMouseCapture
    )?;
    // single persistent Terminal so buffers survive between draws
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(
        std::io::stdout(),
        crossterm::event::DisableMouseCapture,
        crossterm::terminal::LeaveAlternateScreen
    )?;
    Ok(())
}

pub fn draw(state: &mut UiState, snap: &AppSnapshot) -> Result<()> {
    state.observe(snap);
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, state, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

pub type InputEventReceiver = mpsc::UnboundedReceiver<std::io::Result<Event>>;

/// Blocking terminal reads happen on their own thread and arrive here.
pub fn input_event_stream() -> InputEventReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        loop {
            let ev = event::read();
            let failed = ev.is_err();
            if tx.send(ev).is_err() || failed {
                break;
            }
        }
    });
    rx
}

pub async fn next_raw_event(events: &mut InputEventReceiver) -> Result<Event> {
    match events.recv().await {
        Some(ev) => Ok(ev?),
        None => Err(eyre!("terminal input closed")),
    }
}

pub fn interpret_event(state: &mut UiState, event: Event) -> Option<UserEvent> {
    match event {
        Event::Resize(..) => Some(UserEvent::Redraw),
        Event::Key(key) if key.kind == KeyEventKind::Press => interpret_key(state, key),
        _ => None,
    }
}

fn interpret_key(state: &mut UiState, key: KeyEvent) -> Option<UserEvent> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(UserEvent::Quit);
    }
    // the reveal overlay owns the keyboard until dismissed
    match state.view.reveal {
        Some(RevealPhase::Result) => {
            return match key.code {
                KeyCode::Enter | KeyCode::Esc => Some(UserEvent::DismissReveal),
                _ => None,
            };
        }
        Some(RevealPhase::Suspense) => return None,
        Some(RevealPhase::Idle) | None => {}
    }

    if matches!(state.mode, Mode::Normal) {
        return interpret_normal(state, key);
    }
    match &mut state.mode {
        Mode::Normal => None,
        Mode::QuitModal => match key.code {
            KeyCode::Char('y') | KeyCode::Char('q') | KeyCode::Enter => Some(UserEvent::Quit),
            KeyCode::Char('n') | KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
        Mode::Auth(form) => match key.code {
            KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            KeyCode::Tab | KeyCode::BackTab => {
                form.action = match form.action {
                    AuthAction::Login => AuthAction::Register,
                    AuthAction::Register => AuthAction::Login,
                };
                Some(UserEvent::Redraw)
            }
            KeyCode::Up => {
                form.focus = AuthField::Username;
                Some(UserEvent::Redraw)
            }
            KeyCode::Down => {
                form.focus = AuthField::Password;
                Some(UserEvent::Redraw)
            }
            KeyCode::Enter => {
                if form.focus == AuthField::Username {
                    form.focus = AuthField::Password;
                    return Some(UserEvent::Redraw);
                }
                if form.username.trim().is_empty() || form.password.is_empty() {
                    return Some(UserEvent::Redraw);
                }
                let event = UserEvent::SubmitAuth {
                    action: form.action,
                    username: form.username.trim().to_string(),
                    password: std::mem::take(&mut form.password),
                };
                state.mode = Mode::Normal;
                Some(event)
            }
            KeyCode::Backspace => {
                match form.focus {
                    AuthField::Username => form.username.pop(),
                    AuthField::Password => form.password.pop(),
                };
                Some(UserEvent::Redraw)
            }
            KeyCode::Char(c) => {
                match form.focus {
                    AuthField::Username => form.username.push(c),
                    AuthField::Password => form.password.push(c),
                }
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
        Mode::SellConfirm(row) => match key.code {
            KeyCode::Char('y') | KeyCode::Enter => {
                let promo_id = row.id;
                state.mode = Mode::Normal;
                Some(UserEvent::SellPromocode(promo_id))
            }
            KeyCode::Char('n') | KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
        Mode::Draft(form) => match key.code {
            KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            KeyCode::Up | KeyCode::BackTab => {
                form.focus = form.focus.saturating_sub(1);
                Some(UserEvent::Redraw)
            }
            KeyCode::Down | KeyCode::Tab => {
                form.focus = (form.focus + 1).min(form.fields.len() - 1);
                Some(UserEvent::Redraw)
            }
            KeyCode::Backspace => {
                form.fields[form.focus].1.pop();
                form.problem = None;
                Some(UserEvent::Redraw)
            }
            KeyCode::Char(c) => {
                form.fields[form.focus].1.push(c);
                form.problem = None;
                Some(UserEvent::Redraw)
            }
            KeyCode::Enter if form.focus + 1 < form.fields.len() => {
                form.focus += 1;
                Some(UserEvent::Redraw)
            }
            KeyCode::Enter => match form.submit() {
                Ok(event) => {
                    state.mode = Mode::Normal;
                    Some(event)
                }
                Err(problem) => {
                    form.problem = Some(problem);
                    Some(UserEvent::Redraw)
                }
            },
            _ => None,
        },
        Mode::ListPrice(input) | Mode::EditBalance(input) => match key.code {
            KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::Redraw)
            }
            KeyCode::Backspace => {
                input.buffer.pop();
                input.invalid = false;
                Some(UserEvent::Redraw)
            }
            KeyCode::Char(c) if c.is_ascii_digit() || c == '.' => {
                input.buffer.push(c);
                input.invalid = false;
                Some(UserEvent::Redraw)
            }
            KeyCode::Enter => {
                let Some(amount) = input.parse() else {
                    input.invalid = true;
                    return Some(UserEvent::Redraw);
                };
                let target = input.target;
                let event = match state.mode {
                    Mode::ListPrice(_) => UserEvent::ListOnMarket {
                        promo_id: target,
                        price: amount,
                    },
                    _ => UserEvent::SetUserBalance {
                        user_id: target,
                        balance: amount,
                    },
                };
                state.mode = Mode::Normal;
                Some(event)
            }
            _ => None,
        },
    }
}

fn interpret_normal(state: &mut UiState, key: KeyEvent) -> Option<UserEvent> {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => {
            state.mode = Mode::QuitModal;
            Some(UserEvent::Redraw)
        }
        KeyCode::Tab | KeyCode::Right | KeyCode::Char('l') => {
            Some(UserEvent::TabChanged(state.switch_tab(true)))
        }
        KeyCode::BackTab | KeyCode::Left | KeyCode::Char('h') => {
            Some(UserEvent::TabChanged(state.switch_tab(false)))
        }
        KeyCode::Up | KeyCode::Char('k') => state.move_cursor(false),
        KeyCode::Down | KeyCode::Char('j') => state.move_cursor(true),
        KeyCode::Char('r') => Some(UserEvent::Refresh(state.tab)),
        KeyCode::Char('a') => {
            state.open_auth(AuthAction::Login);
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('o') if state.view.signed_in => Some(UserEvent::Logout),
        KeyCode::Char('s') if state.tab == Tab::Promocodes => {
            let row = state.selected_promo()?.clone();
            state.mode = Mode::SellConfirm(row);
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('m') if state.tab == Tab::Promocodes => {
            let row = state.selected_promo()?;
            let input = AmountInput::new(row.id, row.code.clone(), row.market_hint);
            state.mode = Mode::ListPrice(input);
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('[') if state.tab == Tab::Cases && state.view.is_admin => {
            state.move_item_cursor(false)
        }
        KeyCode::Char(']') if state.tab == Tab::Cases && state.view.is_admin => {
            state.move_item_cursor(true)
        }
        KeyCode::Char('n') if state.tab == Tab::Cases && state.view.is_admin => {
            state.mode = Mode::Draft(DraftForm::new_case());
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('e') if state.tab == Tab::Cases && state.view.is_admin => {
            let form = DraftForm::edit_case(state.selected_case()?);
            state.mode = Mode::Draft(form);
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('i') if state.tab == Tab::Cases && state.view.is_admin => {
            let form = DraftForm::new_item(state.selected_case()?.id);
            state.mode = Mode::Draft(form);
            Some(UserEvent::Redraw)
        }
        KeyCode::Char('u') if state.tab == Tab::Cases && state.view.is_admin => {
            let case_id = state.selected_case()?.id;
            let item = state.view.items.get(state.cursor.item)?;
            state.mode = Mode::Draft(DraftForm::edit_item(case_id, item));
            Some(UserEvent::Redraw)
        }
        KeyCode::Enter => match state.tab {
            Tab::Cases => state.selected_case().map(|c| UserEvent::OpenCase(c.id)),
            Tab::Promocodes => {
                let row = state.selected_promo()?.clone();
                state.mode = Mode::SellConfirm(row);
                Some(UserEvent::Redraw)
            }
            Tab::Market => state
                .view
                .listings
                .get(state.cursor.listing)
                .map(|id| UserEvent::BuyListing(*id)),
            Tab::Admin => {
                let (id, name, balance) = state.view.users.get(state.cursor.user)?.clone();
                state.mode = Mode::EditBalance(AmountInput::new(id, name, balance));
                Some(UserEvent::Redraw)
            }
        },
        _ => None,
    }
}

fn ui(f: &mut Frame, state: &UiState, snap: &AppSnapshot) {
    f.render_widget(Clear, f.area());
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(6),
            Constraint::Length(3),
        ])
        .split(f.area());

    draw_header(f, chunks[0], snap);
    draw_tabs(f, state, chunks[1]);
    match state.tab {
        Tab::Cases => draw_cases(f, state, chunks[2], snap),
        Tab::Promocodes => draw_promocodes(f, state, chunks[2], snap),
        Tab::Market => draw_market(f, state, chunks[2], snap),
        Tab::Admin => draw_admin(f, state, chunks[2], snap),
    }
    draw_status(f, chunks[3], snap);
    draw_help(f, state, chunks[4]);
    if let Some(reveal) = &snap.reveal {
        draw_reveal(f, reveal);
    }
    draw_modals(f, state);
}

fn draw_header(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let text = match &snap.session {
        Some(s) => {
            let badge = if s.is_admin { " [admin]" } else { "" };
            format!(
                "👤 {}{} | Balance: {}",
                s.username,
                badge,
                format_money(s.balance)
            )
        }
        None => "Not signed in | press a to sign in".to_string(),
    };
    let widget = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("Case Portal"));
    f.render_widget(widget, area);
}

fn draw_tabs(f: &mut Frame, state: &UiState, area: Rect) {
    let tabs = visible_tabs(state.view.is_admin);
    let selected = tabs.iter().position(|t| *t == state.tab).unwrap_or(0);
    let widget = Tabs::new(tabs.iter().map(|t| t.title()).collect_vec())
        .select(selected)
        .block(Block::default().borders(Borders::ALL))
        .highlight_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));
    f.render_widget(widget, area);
}

fn selectable_list<'a>(items: Vec<ListItem<'a>>, title: &'a str) -> List<'a> {
    List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("> ")
}

fn draw_cases(f: &mut Frame, state: &UiState, area: Rect, snap: &AppSnapshot) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(area);

    let items = snap
        .cases
        .iter()
        .map(|c| {
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{} {}", c.rarity.emoji(), c.name),
                    Style::default().fg(rarity_color(c.rarity)),
                ),
                Span::raw(format!("  {}", format_money(c.price))),
            ]))
        })
        .collect_vec();
    let mut list_state = ListState::default().with_selected(Some(state.cursor.case));
    f.render_stateful_widget(selectable_list(items, "Cases"), cols[0], &mut list_state);

    let selected = snap.cases.get(state.cursor.case);
    let catalog = selected.and_then(|c| snap.case_items.get(&c.id));
    let lines = match (selected, catalog) {
        (None, _) => vec![Line::from("No cases available")],
        (Some(case), None) => vec![
            Line::from(case.description.clone().unwrap_or_default()),
            Line::from(""),
            Line::from("Enter to open"),
        ],
        (Some(case), Some(items)) => {
            let mut lines = vec![
                Line::from(case.description.clone().unwrap_or_default()),
                Line::from(""),
            ];
            let admin = state.view.is_admin;
            lines.extend(catalog_order(items).into_iter().enumerate().map(|(idx, item)| {
                let marker = if admin && idx == state.cursor.item {
                    "> "
                } else {
                    ""
                };
                let chance = match (admin, item.drop_chance) {
                    (true, Some(chance)) => format!(" {chance}%"),
                    _ => String::new(),
                };
                Line::styled(
                    format!(
                        "{marker}{} {} ({}){chance}",
                        item.rarity.emoji(),
                        item.name,
                        item.rarity
                    ),
                    Style::default().fg(rarity_color(item.rarity)),
                )
            }));
            lines
        }
    };
    let title = selected.map(|c| c.name.as_str()).unwrap_or("Contents");
    let widget = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(widget, cols[1]);
}

/// Rarest first; ties keep server order.
fn catalog_order(items: &[CaseItem]) -> Vec<&CaseItem> {
    items
        .iter()
        .sorted_by(|a, b| b.rarity.cmp(&a.rarity))
        .collect()
}

fn draw_promocodes(f: &mut Frame, state: &UiState, area: Rect, snap: &AppSnapshot) {
    if snap.session.is_none() {
        let widget = Paragraph::new("Sign in (a) to see your promo codes")
            .block(Block::default().borders(Borders::ALL).title("Promo codes"));
        f.render_widget(widget, area);
        return;
    }
    let items = snap
        .promocodes
        .iter()
        .filter(|p| !p.is_used)
        .map(|p| {
            let rarity = p.rarity.unwrap_or_default();
            let date = p
                .created_date()
                .map(|d| d.format("%d.%m.%Y").to_string())
                .unwrap_or_default();
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{} {}", rarity.emoji(), p.item_name),
                    Style::default().fg(rarity_color(rarity)),
                ),
                Span::raw(format!(
                    "  {}  {}  {}  sell ~{}",
                    p.promo_code,
                    p.case_name.as_deref().unwrap_or("-"),
                    date,
                    format_money(p.sale_price_hint())
                )),
            ]))
        })
        .collect_vec();
    let mut list_state = ListState::default().with_selected(Some(state.cursor.promo));
    f.render_stateful_widget(selectable_list(items, "Promo codes"), area, &mut list_state);
}

fn draw_market(f: &mut Frame, state: &UiState, area: Rect, snap: &AppSnapshot) {
    let items = snap
        .market
        .iter()
        .map(|l| {
            let rarity = l.rarity.unwrap_or_default();
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{} {}", rarity.emoji(), l.item_name),
                    Style::default().fg(rarity_color(rarity)),
                ),
                Span::raw(format!(
                    "  {}  by {}",
                    format_money(l.price),
                    l.seller_username.as_deref().unwrap_or("unknown")
                )),
            ]))
        })
        .collect_vec();
    let mut list_state = ListState::default().with_selected(Some(state.cursor.listing));
    f.render_stateful_widget(selectable_list(items, "Market"), area, &mut list_state);
}

fn draw_admin(f: &mut Frame, state: &UiState, area: Rect, snap: &AppSnapshot) {
    let Some(panel) = &snap.admin else {
        let widget = Paragraph::new("Press r to load the admin panel")
            .block(Block::default().borders(Borders::ALL).title("Admin"));
        f.render_widget(widget, area);
        return;
    };
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(3)])
        .split(area);
    let stats = &panel.stats;
    let summary = Paragraph::new(format!(
        "Users: {} | Cases: {} | Promo codes: {} | Total balance: {}",
        stats.total_users,
        stats.total_cases,
        stats.total_promocodes,
        format_money(stats.total_balance)
    ))
    .block(Block::default().borders(Borders::ALL).title("Stats"));
    f.render_widget(summary, rows[0]);

    let items = panel
        .users
        .iter()
        .map(|u| {
            let badge = if u.is_admin { " [admin]" } else { "" };
            ListItem::new(format!(
                "#{} {}{}  {}",
                u.id,
                u.username,
                badge,
                format_money(u.balance)
            ))
        })
        .collect_vec();
    let mut list_state = ListState::default().with_selected(Some(state.cursor.user));
    f.render_stateful_widget(selectable_list(items, "Users"), rows[1], &mut list_state);
}

fn draw_status(f: &mut Frame, area: Rect, snap: &AppSnapshot) {
    let widget = if snap.errors.is_empty() {
        let text = if snap.status.trim().is_empty() {
            "Ready".to_string()
        } else {
            snap.status.clone()
        };
        Paragraph::new(text)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Status"))
            .style(Style::default().fg(Color::Green))
    } else {
        let lines = snap
            .errors
            .iter()
            .rev()
            .map(|e| Line::from(e.clone()))
            .collect_vec();
        Paragraph::new(lines)
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Errors"))
            .style(Style::default().fg(Color::Red))
    };
    f.render_widget(widget, area);
}

fn draw_help(f: &mut Frame, state: &UiState, area: Rect) {
    let tab_keys = match state.tab {
        Tab::Cases if state.view.is_admin => {
            "Enter open | n new case | e edit case | [/] item | i new item | u edit item"
        }
        Tab::Cases => "Enter open case",
        Tab::Promocodes => "s/Enter sell | m list on market",
        Tab::Market => "Enter buy",
        Tab::Admin => "Enter edit balance",
    };
    let account = if state.view.signed_in {
        "o sign out"
    } else {
        "a sign in"
    };
    let help = Paragraph::new(format!(
        "←/→ tabs | ↑/↓ select | {tab_keys} | r refresh | {account} | q quit"
    ))
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(help, area);
}

fn draw_reveal(f: &mut Frame, reveal: &RevealView) {
    let area = centered_rect(80, 50, f.area());
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!("Opening {}", reveal.case_name));
    let inner = block.inner(area);
    f.render_widget(Clear, area);
    f.render_widget(block, area);

    match reveal.phase {
        RevealPhase::Result => {
            let item = &reveal.outcome.item;
            let style = Style::default()
                .fg(rarity_color(item.rarity))
                .add_modifier(Modifier::BOLD);
            let lines = vec![
                Line::from(""),
                Line::styled(format!("{} {}", item.rarity.emoji(), item.name), style),
                Line::from(item.rarity.label().to_uppercase()),
                Line::from(item.description.clone().unwrap_or_default()),
                Line::from(""),
                Line::from(vec![
                    Span::raw("Promo code: "),
                    Span::styled(
                        reveal.outcome.promo_code.clone(),
                        Style::default().add_modifier(Modifier::BOLD),
                    ),
                ]),
                Line::from(format!(
                    "Balance: {}",
                    format_money(reveal.outcome.new_balance)
                )),
                Line::from(""),
                Line::from("Enter/Esc to close"),
            ];
            let widget = Paragraph::new(lines)
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true });
            f.render_widget(widget, inner);
        }
        RevealPhase::Suspense | RevealPhase::Idle => {
            let rows = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(1),
                    Constraint::Length(1),
                    Constraint::Length(1),
                    Constraint::Length(1),
                    Constraint::Min(0),
                ])
                .split(inner);
            let visible = visible_cells(inner.width);
            let (pointer_down, pointer_up) = pointer_lines(visible);
            f.render_widget(Paragraph::new(pointer_down), rows[0]);
            f.render_widget(Paragraph::new(strip_line(reveal, visible)), rows[1]);
            f.render_widget(Paragraph::new(pointer_up), rows[2]);
            let gauge = Gauge::default()
                .gauge_style(Style::default().fg(Color::Yellow))
                .ratio(reveal.progress.clamp(0.0, 1.0))
                .label("");
            f.render_widget(gauge, rows[3]);
        }
    }
}

/// Markers above and below the strip, both over the centre cell.
fn pointer_lines(visible: usize) -> (String, String) {
    let pad = " ".repeat((visible / 2) * CELL_WIDTH + (CELL_WIDTH - 1) / 2);
    (format!("{pad}▼"), format!("{pad}▲"))
}

fn visible_cells(width: u16) -> usize {
    (width as usize / CELL_WIDTH).max(1)
}

/// One row of strip cells for the current scroll position. Slots outside the
/// strip render blank.
fn strip_line(reveal: &RevealView, visible: usize) -> Line<'static> {
    let cells = reveal.strip.cells();
    let start = roulette::scroll_position(cells.len(), visible, reveal.progress).round() as i64;
    let centre = visible / 2;
    let spans = (0..visible)
        .flat_map(|slot| {
            let cell = usize::try_from(start + slot as i64)
                .ok()
                .and_then(|idx| cells.get(idx));
            let (text, mut style) = match cell {
                Some(item) => (
                    fit_width(&format!("{} {}", item.rarity.emoji(), item.name), CELL_WIDTH - 1),
                    Style::default().fg(rarity_color(item.rarity)),
                ),
                None => (" ".repeat(CELL_WIDTH - 1), Style::default()),
            };
            if slot == centre {
                style = style.add_modifier(Modifier::REVERSED | Modifier::BOLD);
            }
            [Span::styled(text, style), Span::raw("│")]
        })
        .collect_vec();
    Line::from(spans)
}

/// Truncates or pads `text` to exactly `width` terminal columns.
fn fit_width(text: &str, width: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push_str(&" ".repeat(width - used));
    out
}

fn draw_modals(f: &mut Frame, state: &UiState) {
    let (title, lines, w, h) = match &state.mode {
        Mode::Normal => return,
        Mode::QuitModal => ("Quit", vec![Line::from("Quit Case Portal? (y/n)")], 30, 20),
        Mode::Auth(form) => {
            let marker = |field: AuthField| if form.focus == field { "> " } else { "  " };
            let title = match form.action {
                AuthAction::Login => "Sign in",
                AuthAction::Register => "Register",
            };
            let lines = vec![
                Line::from(format!("Mode: {title} (Tab to switch)")),
                Line::from(""),
                Line::from(format!(
                    "{}Username: {}",
                    marker(AuthField::Username),
                    form.username
                )),
                Line::from(format!(
                    "{}Password: {}",
                    marker(AuthField::Password),
                    "*".repeat(form.password.chars().count())
                )),
                Line::from(""),
                Line::from("↑/↓ field | Enter next/submit | Esc cancel"),
            ];
            (title, lines, 50, 40)
        }
        Mode::SellConfirm(row) => {
            let lines = vec![
                Line::from(format!("Sell {}?", row.code)),
                Line::from(format!("You will get about {}", format_money(row.sale_hint))),
                Line::from(""),
                Line::from("y/Enter confirm | n/Esc cancel"),
            ];
            ("Sell promo code", lines, 50, 30)
        }
        Mode::Draft(form) => {
            let mut lines = form
                .fields
                .iter()
                .enumerate()
                .map(|(idx, (label, value))| {
                    let marker = if idx == form.focus { "> " } else { "  " };
                    Line::from(format!("{marker}{label}: {value}"))
                })
                .collect_vec();
            lines.push(Line::from(""));
            lines.push(Line::from("↑/↓ field | Enter next/save | Esc cancel"));
            if let Some(problem) = form.problem {
                lines.push(Line::styled(problem, Style::default().fg(Color::Red)));
            }
            (form.title(), lines, 60, 45)
        }
        Mode::ListPrice(input) | Mode::EditBalance(input) => {
            let (title, prompt) = match state.mode {
                Mode::ListPrice(_) => ("List on market", format!("Price for {}", input.label)),
                _ => ("Edit balance", format!("New balance for {}", input.label)),
            };
            let mut lines = vec![
                Line::from(prompt),
                Line::from(format!("{} ₽", input.buffer)),
                Line::from(""),
                Line::from("Enter confirm | Esc cancel | digits to edit"),
            ];
            if input.invalid {
                lines.push(Line::styled(
                    "Enter a number",
                    Style::default().fg(Color::Red),
                ));
            }
            (title, lines, 50, 35)
        }
    };
    let area = centered_rect(w, h, f.area());
    let block = Block::default().borders(Borders::ALL).title(title);
    let p = Paragraph::new(lines).wrap(Wrap { trim: false });
    f.render_widget(Clear, area);
    f.render_widget(block.clone(), area);
    f.render_widget(p, block.inner(area));
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    let vertical = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1]);

    vertical[1]
}

fn rarity_color(rarity: Rarity) -> Color {
    match rarity {
        Rarity::Unknown => Color::Gray,
        Rarity::Common => Color::White,
        Rarity::Rare => Color::LightBlue,
        Rarity::Epic => Color::Magenta,
        Rarity::Legendary => Color::Yellow,
    }
}
