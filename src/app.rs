use anyhow::Result;
use tokio::sync::mpsc;

use crate::events::AppEvent;
use crate::session::SessionController;
use crate::tui::{self, EventHandler, Tui};
use crate::ui::conversation::get_help_text;
use crate::ui::{ChatAction, ChatScreen};

/// Interactive chat: the session plus its screen. Every state change
/// happens in `handle_event`; provider work runs on spawned tasks that
/// report back through `tx`.
pub struct App {
    pub controller: SessionController,
    pub screen: ChatScreen,
    tx: mpsc::UnboundedSender<AppEvent>,
    pub should_quit: bool,
}

impl App {
    pub fn new(controller: SessionController, tx: mpsc::UnboundedSender<AppEvent>) -> Self {
        let screen = ChatScreen::new(controller.controls());
        Self {
            controller,
            screen,
            tx,
            should_quit: false,
        }
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Key(key) => {
                let action = self.screen.handle_key(key);
                self.perform(action);
            }
            AppEvent::Paste(text) => self.screen.paste(&text),
            AppEvent::Resize(_, _) => {}
            AppEvent::Tick => self.screen.tick(),
            AppEvent::LoadProgress(progress) => self.controller.on_load_progress(&progress),
            AppEvent::LoadFinished(result) => {
                self.controller.finish_load(result);
            }
            AppEvent::GenerationFinished(result) => {
                self.controller.finish_send(result);
            }
        }

        self.screen.sync(self.controller.controls());
    }

    fn perform(&mut self, action: ChatAction) {
        match action {
            ChatAction::None => {}
            ChatAction::Send(message) => self.start_send(&message),
            ChatAction::Load => self.start_load(),
            ChatAction::StepTokens(steps) => {
                let value = self.controller.step_max_new_tokens(steps);
                self.controller.set_status(format!("Max new tokens: {value}"));
            }
            ChatAction::SetTokens(requested) => {
                let applied = self.controller.set_max_new_tokens(requested);
                if applied != requested {
                    self.controller
                        .notice(format!("Max new tokens clamped to {applied}"));
                }
                self.controller.set_status(format!("Max new tokens: {applied}"));
            }
            ChatAction::Help => self.controller.notice(get_help_text()),
            ChatAction::Notice(text) => self.controller.notice(text),
            ChatAction::Quit => self.should_quit = true,
        }
    }

    fn start_load(&mut self) {
        let Some(job) = self.controller.begin_load() else {
            return;
        };
        tracing::info!(model = %job.model_id(), "loading model");

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

        let tx = self.tx.clone();
        tokio::spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                if tx.send(AppEvent::LoadProgress(progress)).is_err() {
                    break;
                }
            }
        });

        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = job.run(progress_tx).await;
            let _ = tx.send(AppEvent::LoadFinished(result));
        });
    }

    fn start_send(&mut self, message: &str) {
        let Some(job) = self.controller.begin_send(message) else {
            return;
        };
        self.screen.clear_input();

        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = job.run().await;
            let _ = tx.send(AppEvent::GenerationFinished(result));
        });
    }
}

/// Run the interactive chat until the user quits.
pub async fn run(controller: SessionController) -> Result<()> {
    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();
    let mut app = App::new(controller, events.sender());

    let result = event_loop(&mut terminal, &mut events, &mut app).await;

    tui::restore()?;
    result
}

async fn event_loop(terminal: &mut Tui, events: &mut EventHandler, app: &mut App) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| app.screen.render(frame, &app.controller))?;

        match events.next().await {
            Some(event) => app.handle_event(event),
            None => break,
        }
    }
    Ok(())
}
