use crate::app::{ExpenseApp, Page};
use crate::dispatch::CommandSender;
use crate::errors::{AppError, AppResult};
use std::io::BufRead;
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrayAction {
    Show,
    Hide,
    Toggle,
    QuickAdd(Option<String>),
    Dashboard,
    ExpenseList,
    CurrentMonth,
    Quit,
}

impl TrayAction {
    pub const NAMES: [&'static str; 8] = [
        "show",
        "hide",
        "toggle",
        "quick_add",
        "dashboard",
        "expense_list",
        "current_month",
        "quit",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Show => "show",
            Self::Hide => "hide",
            Self::Toggle => "toggle",
            Self::QuickAdd(_) => "quick_add",
            Self::Dashboard => "dashboard",
            Self::ExpenseList => "expense_list",
            Self::CurrentMonth => "current_month",
            Self::Quit => "quit",
        }
    }

    pub fn parse(name: &str, payload: Option<String>) -> AppResult<Self> {
        let action = match name.trim().to_ascii_lowercase().as_str() {
            "show" => Self::Show,
            "hide" => Self::Hide,
            "toggle" => Self::Toggle,
            "quick_add" => {
                let description = payload
                    .as_deref()
                    .map(str::trim)
                    .filter(|text| !text.is_empty())
                    .map(str::to_string);
                return Ok(Self::QuickAdd(description));
            }
            "dashboard" => Self::Dashboard,
            "expense_list" => Self::ExpenseList,
            "current_month" => Self::CurrentMonth,
            "quit" => Self::Quit,
            other => {
                return Err(AppError::InvalidInput(format!(
                    "unknown tray action '{}'; expected one of {}",
                    other,
                    Self::NAMES.join(", ")
                )))
            }
        };
        if payload.is_some() {
            tracing::debug!(action = action.name(), "ignoring payload for tray action");
        }
        Ok(action)
    }

    fn apply(self, app: &mut ExpenseApp) -> AppResult<()> {
        match self {
            Self::Show => app.show_window(),
            Self::Hide => app.hide_window(),
            Self::Toggle => app.toggle_window(),
            Self::QuickAdd(description) => app.begin_quick_add(description)?,
            Self::Dashboard => {
                app.show_page(Page::Dashboard);
                app.show_window();
            }
            Self::ExpenseList => {
                app.show_page(Page::ExpenseList);
                app.show_window();
            }
            Self::CurrentMonth => {
                app.return_to_current_month()?;
                app.show_window();
            }
            Self::Quit => app.request_quit(),
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TraySignal {
    sender: CommandSender<ExpenseApp>,
}

impl TraySignal {
    pub fn new(sender: CommandSender<ExpenseApp>) -> Self {
        Self { sender }
    }

    pub fn request(&self, action: TrayAction) {
        let label = format!("tray:{}", action.name());
        self.sender.enqueue(label, move |app: &mut ExpenseApp| action.apply(app));
    }

    pub fn request_named(&self, name: &str, payload: Option<String>) -> AppResult<()> {
        let action = TrayAction::parse(name, payload)?;
        self.request(action);
        Ok(())
    }
}

pub fn spawn_line_host<R>(signal: TraySignal, input: R) -> AppResult<JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("tray-host".to_string())
        .spawn(move || {
            for line in input.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(error) => {
                        tracing::warn!(error = %error, "tray input unreadable; stopping host");
                        break;
                    }
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let (name, payload) = match line.split_once(char::is_whitespace) {
                    Some((name, rest)) => (name, Some(rest.to_string())),
                    None => (line, None),
                };
                if let Err(error) = signal.request_named(name, payload) {
                    tracing::warn!(action = %name, error = %error, "rejected tray request");
                }
            }
            signal.request(TrayAction::Quit);
        })
        .map_err(|error| AppError::Internal(format!("failed to spawn tray host: {}", error)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{Clock, EventLoop};
    use crate::dates::parse_date;
    use crate::settings::SettingsStore;
    use crate::store::RecordStore;
    use std::io::Cursor;
    use std::sync::Arc;

    fn event_loop(dir: &tempfile::TempDir) -> EventLoop {
        let settings = Arc::new(SettingsStore::open(&dir.path().join("settings.json")).expect("settings"));
        let clock = Clock::Fixed(parse_date("2025-11-12").expect("date"));
        EventLoop::new(ExpenseApp::new(RecordStore::open(dir.path()), settings, clock))
    }

    #[test]
    fn parses_every_documented_name() {
        for name in TrayAction::NAMES {
            let action = TrayAction::parse(name, None).expect("known action");
            assert_eq!(action.name(), name);
        }
        assert_eq!(
            TrayAction::parse("quick_add", Some("  taxi ".to_string())).expect("quick add"),
            TrayAction::QuickAdd(Some("taxi".to_string()))
        );
        assert_eq!(
            TrayAction::parse("quick_add", Some("   ".to_string())).expect("quick add"),
            TrayAction::QuickAdd(None)
        );
    }

    #[test]
    fn unknown_name_is_rejected_without_enqueue() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut event_loop = event_loop(&dir);
        let error = event_loop
            .tray()
            .request_named("explode", None)
            .expect_err("unknown");
        assert!(matches!(error, AppError::InvalidInput(_)));
        assert_eq!(event_loop.tick().executed, 0);
    }

    #[test]
    fn requests_take_effect_only_when_drained() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut event_loop = event_loop(&dir);
        let tray = event_loop.tray();
        tray.request(TrayAction::Hide);
        tray.request_named("expense_list", None).expect("known");
        assert!(event_loop.app().is_window_visible());
        assert_eq!(event_loop.app().page(), Page::Dashboard);

        event_loop.tick();
        assert!(event_loop.app().is_window_visible());
        assert_eq!(event_loop.app().page(), Page::ExpenseList);
    }

    #[test]
    fn quick_add_from_archive_returns_to_current_month() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut event_loop = event_loop(&dir);
        event_loop.app_mut().previous_month().expect("previous");
        assert!(event_loop.app().is_archive_mode());

        event_loop.tray().request_named("quick_add", Some("coffee".to_string())).expect("known");
        event_loop.tick();
        let app = event_loop.app();
        assert!(!app.is_archive_mode());
        assert_eq!(
            app.quick_add().and_then(|draft| draft.description.as_deref()),
            Some("coffee")
        );
    }

    #[test]
    fn line_host_forwards_requests_and_quits_at_end_of_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut event_loop = event_loop(&dir);
        let input = Cursor::new("hide\nbogus\n\nquick_add morning bus\n");
        spawn_line_host(event_loop.tray(), input)
            .expect("spawn")
            .join()
            .expect("host thread");

        let report = event_loop.tick();
        assert_eq!(report.executed, 3);
        let app = event_loop.app();
        assert!(app.should_quit());
        assert!(app.is_window_visible());
        assert_eq!(
            app.quick_add().and_then(|draft| draft.description.as_deref()),
            Some("morning bus")
        );
    }
}
