use crate::analytics::{budget_status, day_progress, week_progress, BudgetStatus};
use crate::dates::{today, MonthKey};
use crate::dispatch::{CommandQueue, CommandSender, DrainReport};
use crate::errors::{AppError, AppResult};
use crate::models::{ExpenseRecord, MonthAggregates};
use crate::settings::{keys, SettingsStore};
use crate::store::RecordStore;
use crate::tray::TraySignal;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const MAX_NOTIFICATIONS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    System,
    Fixed(NaiveDate),
}

impl Clock {
    pub fn today(self) -> NaiveDate {
        match self {
            Self::System => today(),
            Self::Fixed(date) => date,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Page {
    Dashboard,
    ExpenseList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuickAddDraft {
    pub description: Option<String>,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardView {
    pub month: MonthKey,
    pub title: String,
    pub archive: bool,
    pub as_of: NaiveDate,
    pub aggregates: MonthAggregates,
    pub day_progress: (u32, u32),
    pub week_progress: (Decimal, u32),
    pub budget: BudgetStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpenseRow {
    pub id: String,
    #[serde(flatten)]
    pub record: ExpenseRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderSnapshot {
    pub sequence: u64,
    pub page: Page,
    pub window_visible: bool,
    pub dashboard: DashboardView,
    pub rows: usize,
}

#[derive(Debug)]
pub struct ExpenseApp {
    records: RecordStore,
    settings: Arc<SettingsStore>,
    clock: Clock,
    current_month: MonthKey,
    viewed_month: MonthKey,
    page: Page,
    window_visible: bool,
    quick_add: Option<QuickAddDraft>,
    notifications: VecDeque<Notification>,
    last_render: Option<RenderSnapshot>,
    renders: u64,
    quit_requested: bool,
}

impl ExpenseApp {
    pub fn new(records: RecordStore, settings: Arc<SettingsStore>, clock: Clock) -> Self {
        let current_month = MonthKey::of(clock.today());
        let window_visible = !settings.get(keys::UI, keys::START_HIDDEN, false);
        Self {
            records,
            settings,
            clock,
            current_month,
            viewed_month: current_month,
            page: Page::Dashboard,
            window_visible,
            quick_add: None,
            notifications: VecDeque::new(),
            last_render: None,
            renders: 0,
            quit_requested: false,
        }
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut RecordStore {
        &mut self.records
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn set_clock(&mut self, clock: Clock) {
        self.clock = clock;
        self.refresh_clock();
    }

    pub fn current_month(&self) -> MonthKey {
        self.current_month
    }

    pub fn viewed_month(&self) -> MonthKey {
        self.viewed_month
    }

    pub fn is_archive_mode(&self) -> bool {
        self.viewed_month != self.current_month
    }

    pub fn context_date(&self) -> NaiveDate {
        if self.is_archive_mode() {
            self.viewed_month.last_day()
        } else {
            self.today()
        }
    }

    pub fn page(&self) -> Page {
        self.page
    }

    pub fn is_window_visible(&self) -> bool {
        self.window_visible
    }

    pub fn quick_add(&self) -> Option<&QuickAddDraft> {
        self.quick_add.as_ref()
    }

    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.notifications.iter()
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    pub fn last_render(&self) -> Option<&RenderSnapshot> {
        self.last_render.as_ref()
    }

    pub fn should_quit(&self) -> bool {
        self.quit_requested
    }

    pub fn add_expense(&mut self, amount: Decimal, description: &str, date: NaiveDate) -> AppResult<String> {
        self.ensure_writable("add")?;
        let record = ExpenseRecord::new(amount, description, date)?;
        let id = self
            .records
            .mutate(self.viewed_month, |partition| partition.insert_new(record))?;
        tracing::info!(month = %self.viewed_month, id = %id, amount = %amount, "expense added");
        Ok(id)
    }

    pub fn edit_expense(&mut self, id: &str, amount: Decimal, description: &str, date: NaiveDate) -> AppResult<()> {
        self.ensure_writable("edit")?;
        let record = ExpenseRecord::new(amount, description, date)?;
        self.records
            .mutate(self.viewed_month, |partition| partition.replace(id, record).map(|_| ()))?;
        tracing::info!(month = %self.viewed_month, id = %id, "expense edited");
        Ok(())
    }

    pub fn delete_expense(&mut self, id: &str) -> AppResult<ExpenseRecord> {
        self.ensure_writable("delete")?;
        let removed = self
            .records
            .mutate(self.viewed_month, |partition| partition.remove(id))?;
        tracing::info!(month = %self.viewed_month, id = %id, "expense deleted");
        Ok(removed)
    }

    pub fn switch_month(&mut self, month: MonthKey) -> AppResult<()> {
        if month > self.current_month {
            return Err(AppError::InvalidInput(format!(
                "cannot view {} after the current month {}",
                month, self.current_month
            )));
        }
        self.records.load(month)?;
        if month != self.viewed_month {
            tracing::debug!(from = %self.viewed_month, to = %month, "switching month");
        }
        self.viewed_month = month;
        if self.is_archive_mode() {
            self.quick_add = None;
        }
        Ok(())
    }

    pub fn previous_month(&mut self) -> AppResult<()> {
        self.switch_month(self.viewed_month.previous())
    }

    pub fn next_month(&mut self) -> AppResult<()> {
        self.switch_month(self.viewed_month.next())
    }

    pub fn return_to_current_month(&mut self) -> AppResult<()> {
        self.switch_month(self.current_month)
    }

    pub fn show_page(&mut self, page: Page) {
        self.page = page;
    }

    pub fn show_window(&mut self) {
        self.window_visible = true;
    }

    pub fn hide_window(&mut self) {
        self.window_visible = false;
        self.quick_add = None;
    }

    pub fn toggle_window(&mut self) {
        if self.window_visible {
            self.hide_window();
        } else {
            self.show_window();
        }
    }

    pub fn begin_quick_add(&mut self, description: Option<String>) -> AppResult<()> {
        if self.is_archive_mode() {
            self.return_to_current_month()?;
        }
        let description = description
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        self.window_visible = true;
        self.quick_add = Some(QuickAddDraft {
            description,
            opened_at: Utc::now(),
        });
        Ok(())
    }

    pub fn submit_quick_add(&mut self, amount: Decimal, description: Option<&str>) -> AppResult<String> {
        let Some(draft) = self.quick_add.as_ref() else {
            return Err(AppError::InvalidInput("no quick add in progress".to_string()));
        };
        let description = description
            .map(str::to_string)
            .or_else(|| draft.description.clone())
            .unwrap_or_default();
        let id = self.add_expense(amount, &description, self.today())?;
        self.quick_add = None;
        Ok(id)
    }

    pub fn cancel_quick_add(&mut self) {
        self.quick_add = None;
    }

    pub fn budget_threshold(&self) -> Decimal {
        self.settings
            .get(keys::BUDGET, keys::MONTHLY_THRESHOLD, Decimal::ZERO)
    }

    pub fn set_budget(&mut self, threshold: Decimal) -> AppResult<()> {
        if threshold < Decimal::ZERO {
            return Err(AppError::InvalidInput(format!(
                "budget threshold must not be negative: {}",
                threshold
            )));
        }
        self.settings
            .set(keys::BUDGET, keys::MONTHLY_THRESHOLD, threshold)
    }

    pub fn request_quit(&mut self) {
        tracing::info!("quit requested");
        self.quit_requested = true;
    }

    pub fn dashboard(&mut self) -> AppResult<DashboardView> {
        let month = self.viewed_month;
        let as_of = self.context_date();
        let aggregates = self.records.aggregates(month, as_of)?;
        let budget = budget_status(aggregates.total, self.budget_threshold());
        Ok(DashboardView {
            month,
            title: month.display_name(),
            archive: self.is_archive_mode(),
            as_of,
            aggregates,
            day_progress: day_progress(as_of),
            week_progress: week_progress(as_of),
            budget,
        })
    }

    pub fn expenses_for_view(&mut self) -> AppResult<Vec<ExpenseRow>> {
        let partition = self.records.load(self.viewed_month)?;
        let mut rows: Vec<ExpenseRow> = partition
            .iter()
            .map(|(id, record)| ExpenseRow {
                id: id.clone(),
                record: record.clone(),
            })
            .collect();
        rows.sort_by(|a, b| b.record.date.cmp(&a.record.date).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    pub fn notify(&mut self, level: NotificationLevel, message: impl Into<String>) {
        if self.notifications.len() == MAX_NOTIFICATIONS {
            self.notifications.pop_front();
        }
        self.notifications.push_back(Notification {
            level,
            message: message.into(),
        });
    }

    pub fn refresh_clock(&mut self) {
        let month = MonthKey::of(self.today());
        if month == self.current_month {
            return;
        }
        tracing::info!(from = %self.current_month, to = %month, "calendar month changed");
        let was_current = self.viewed_month == self.current_month;
        self.current_month = month;
        if was_current || self.viewed_month > month {
            self.viewed_month = month;
        }
    }

    pub fn render(&mut self) -> AppResult<&RenderSnapshot> {
        let dashboard = self.dashboard()?;
        let rows = self.records.load(self.viewed_month)?.len();
        self.renders += 1;
        Ok(self.last_render.insert(RenderSnapshot {
            sequence: self.renders,
            page: self.page,
            window_visible: self.window_visible,
            dashboard,
            rows,
        }))
    }

    fn ensure_writable(&self, operation: &str) -> AppResult<()> {
        if self.is_archive_mode() {
            return Err(AppError::InvalidInput(format!(
                "cannot {} expenses while viewing archived month {}",
                operation, self.viewed_month
            )));
        }
        Ok(())
    }
}

pub struct EventLoop {
    app: ExpenseApp,
    queue: CommandQueue<ExpenseApp>,
    render_failure: Option<(MonthKey, String)>,
}

impl EventLoop {
    pub fn new(app: ExpenseApp) -> Self {
        Self {
            app,
            queue: CommandQueue::new(),
            render_failure: None,
        }
    }

    pub fn sender(&self) -> CommandSender<ExpenseApp> {
        self.queue.sender()
    }

    pub fn tray(&self) -> TraySignal {
        TraySignal::new(self.sender())
    }

    pub fn app(&self) -> &ExpenseApp {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut ExpenseApp {
        &mut self.app
    }

    pub fn tick(&mut self) -> DrainReport {
        let report = self.queue.run_pending(&mut self.app);
        for failure in &report.failures {
            self.app.notify(
                NotificationLevel::Error,
                format!("{} failed: {}", failure.label, failure.message),
            );
        }
        self.app.refresh_clock();
        self.render();
        report
    }

    fn render(&mut self) {
        let month = self.app.viewed_month();
        match self.app.render() {
            Ok(_) => {
                if let Some((failed_month, _)) = self.render_failure.take() {
                    tracing::info!(month = %failed_month, "view renders again");
                }
            }
            Err(error) => {
                let failure = (month, error.to_string());
                if self.render_failure.as_ref() == Some(&failure) {
                    return;
                }
                tracing::warn!(month = %month, error = %error, "render failed");
                self.app
                    .notify(NotificationLevel::Error, format!("could not refresh view: {}", error));
                self.render_failure = Some(failure);
            }
        }
    }

    pub fn run(&mut self) -> AppResult<()> {
        let interval = self
            .app
            .settings
            .get(keys::UI, keys::POLL_INTERVAL_MS, keys::DEFAULT_POLL_INTERVAL_MS)
            .max(1);
        tracing::info!(poll_interval_ms = interval, "event loop started");
        loop {
            self.tick();
            if self.app.should_quit() {
                break;
            }
            thread::sleep(Duration::from_millis(interval));
        }
        tracing::info!("event loop stopped");
        self.app.settings.flush()
    }
}
