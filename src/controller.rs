use crate::{
    cleaning::{CleaningController, CleaningOutput, CleaningPhase},
    console::{self, CommandChannel, KioskCommand, KioskStatus},
    error::{KioskError, Result, StorageError},
    pricing::{resolve, PortionTable},
    service::Sampler,
    session::{DosingRun, PinChallenge, PinGate, PinOutcome, ScreenSession},
    system::{
        keys, ApiSettings, Branding, EventLog, InterfaceSettings, KioskConfig, LogCategory,
        LogEntry, PaymentSettings, SettingsStore,
    },
    timers::{TimerKind, TimerSlots, TimerToken},
    types::{
        Language, PaymentContext, PortionSize, Screen, DOSING_DEADLINE, DOSING_TICK,
        PIN_ERROR_FLASH, PIN_EXPIRY, PIN_LENGTH, SAMPLER_POUR_TIME, THANK_YOU_DELAY,
    },
};
use embassy_futures::select::{select, Either};
use embassy_time::{Duration, Instant, Timer};
use log::{debug, error, info, warn};
use serde::Serialize;

// How long the control loop sleeps when no timer is armed
const IDLE_WAKE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Nav {
    Push,
    Replace,
    Back,
}

/// Settings captured when Selection is entered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionView {
    pub branding: Branding,
    pub portions: PortionTable,
    pub no_payment_mode: bool,
    pub maintenance_mode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PaymentView {
    pub context: PaymentContext,
    pub nfc_enabled: bool,
    pub qr_enabled: bool,
}

impl PaymentView {
    pub fn title(&self) -> String {
        format!("Payment - ${:.2}", self.context.price.unwrap_or_default())
    }
}

pub struct KioskController<S: SettingsStore> {
    store: S,
    session: ScreenSession,
    timers: TimerSlots,
    log: EventLog,
    pin_gate: PinGate,
    cleaning: CleaningController,
    sampler: Sampler,

    // Selection -> Payment -> Dosing hand-off
    carried: Option<PaymentContext>,

    selection: Option<SelectionView>,
    payment: Option<PaymentView>,
    dosing: Option<DosingRun>,
}

impl<S: SettingsStore> KioskController<S> {
    pub fn new(store: S) -> Self {
        let log = EventLog::load(&store);
        info!("Kiosk controller ready ({} log entries restored)", log.len());

        Self {
            store,
            session: ScreenSession::new(),
            timers: TimerSlots::new(),
            log,
            pin_gate: PinGate::new(),
            cleaning: CleaningController::new(),
            sampler: Sampler::default(),
            carried: None,
            selection: None,
            payment: None,
            dosing: None,
        }
    }

    // ---- Accessors ----

    pub fn screen(&self) -> Screen {
        self.session.current()
    }

    pub fn previous_screen(&self) -> Option<Screen> {
        self.session.previous()
    }

    /// Always read fresh from the store.
    pub fn config(&self) -> KioskConfig {
        KioskConfig::load(&self.store)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn selection(&self) -> Option<&SelectionView> {
        self.selection.as_ref()
    }

    pub fn payment(&self) -> Option<&PaymentView> {
        self.payment.as_ref()
    }

    pub fn dosing(&self) -> Option<&DosingRun> {
        self.dosing.as_ref()
    }

    pub fn pin_challenge(&self) -> Option<&PinChallenge> {
        self.pin_gate.challenge()
    }

    pub fn cleaning_phase(&self) -> CleaningPhase {
        self.cleaning.phase()
    }

    pub fn cleaning_paused(&self) -> bool {
        self.cleaning.is_paused()
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub fn is_timer_armed(&self, kind: TimerKind) -> bool {
        self.timers.is_armed(kind)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Newest first.
    pub fn logs(&self, filter: Option<LogCategory>) -> Vec<&LogEntry> {
        self.log.filtered(filter)
    }

    pub fn latest_log(&self) -> Option<&LogEntry> {
        self.log.latest()
    }

    pub fn status(&self, message: Option<String>) -> KioskStatus {
        KioskStatus::capture(self, message)
    }

    // ---- Customer flow ----

    /// Any tap on Home starts a new customer session.
    pub fn tap(&mut self, now: Instant) -> Screen {
        if self.session.current() == Screen::Home {
            self.transition(Screen::Selection, Nav::Replace, now)
        } else {
            self.session.current()
        }
    }

    pub fn select_portion(&mut self, portion: PortionSize, now: Instant) -> Result<Screen> {
        self.require(Screen::Selection)?;
        if self.pin_gate.is_open() {
            debug!("Portion selection ignored while the PIN challenge is open");
            return Ok(Screen::Selection);
        }

        let Some(view) = self.selection.as_ref() else {
            return Err(KioskError::WrongScreen(Screen::Selection));
        };
        if view.maintenance_mode {
            info!("Maintenance mode active - {} selection ignored", portion);
            return Ok(Screen::Selection);
        }
        if !view.portions.get(portion).enabled {
            warn!("{} portion is disabled", portion);
            return Err(KioskError::PortionUnavailable(portion));
        }

        let resolution = resolve(portion, &view.portions, view.no_payment_mode);
        info!(
            "Selected {} ({}ml) - {}",
            portion,
            resolution.volume_ml,
            if resolution.needs_payment { "payment required" } else { "free" }
        );
        self.carried = Some(PaymentContext {
            portion,
            price: resolution.needs_payment.then_some(resolution.price),
            volume_ml: resolution.volume_ml,
        });

        let target = if resolution.needs_payment {
            Screen::Payment
        } else {
            Screen::Dosing
        };
        Ok(self.transition(target, Nav::Replace, now))
    }

    /// The payment terminal's "continue" action.
    pub fn payment_completed(&mut self, now: Instant) -> Result<Screen> {
        self.require(Screen::Payment)?;
        if let Some(view) = self.payment {
            let price = view.context.price.unwrap_or_default();
            self.record(
                LogCategory::Transaction,
                format!(
                    "Payment received: {} portion, ${:.2}",
                    view.context.portion, price
                ),
            );
        }
        Ok(self.transition(Screen::Dosing, Nav::Replace, now))
    }

    // ---- PIN gate ----

    pub fn open_pin(&mut self, now: Instant) -> Result<()> {
        self.require(Screen::Selection)?;
        self.pin_gate.open(now + PIN_EXPIRY);
        self.timers.cancel(TimerKind::PinErrorFlash);
        self.timers.arm(TimerKind::PinExpiry, now, PIN_EXPIRY);
        Ok(())
    }

    pub fn pin_digit(&mut self, digit: char) -> bool {
        let accepted = self.pin_gate.append_digit(digit);
        if accepted {
            self.timers.cancel(TimerKind::PinErrorFlash);
        }
        accepted
    }

    pub fn pin_delete(&mut self) -> bool {
        let removed = self.pin_gate.delete_digit();
        if removed {
            self.timers.cancel(TimerKind::PinErrorFlash);
        }
        removed
    }

    pub fn pin_submit(&mut self, now: Instant) -> PinOutcome {
        let stored_pin = self.config().admin_pin;
        let outcome = self.pin_gate.submit(&stored_pin);
        match outcome {
            PinOutcome::Granted => {
                self.timers.cancel(TimerKind::PinExpiry);
                self.timers.cancel(TimerKind::PinErrorFlash);
                self.transition(Screen::ServiceMenu, Nav::Replace, now);
            }
            PinOutcome::Rejected => {
                warn!("Incorrect PIN entered");
                self.timers.arm(TimerKind::PinErrorFlash, now, PIN_ERROR_FLASH);
            }
            PinOutcome::Incomplete | PinOutcome::Closed => {}
        }
        outcome
    }

    pub fn pin_cancel(&mut self, now: Instant) -> Screen {
        if !self.pin_gate.is_open() {
            return self.session.current();
        }
        self.close_pin_challenge();
        info!("PIN challenge cancelled");
        self.transition(Screen::Home, Nav::Replace, now)
    }

    // ---- Navigation ----

    pub fn go_back(&mut self, now: Instant) -> Screen {
        let target = self.session.back_target();
        self.transition(target, Nav::Back, now)
    }

    /// Operator menu navigation. The settings sub-screens remember the
    /// settings menu so "back" returns there.
    pub fn open_screen(&mut self, target: Screen, now: Instant) -> Result<Screen> {
        let current = self.session.current();
        let nav = match (current, target) {
            (Screen::ServiceMenu, Screen::Sampler | Screen::SettingsMenu | Screen::Cleaning) => {
                Nav::Replace
            }
            (
                Screen::SettingsMenu,
                Screen::ChangePin
                | Screen::Language
                | Screen::ApiSettings
                | Screen::ArduinoSettings
                | Screen::InterfaceSettings
                | Screen::PaymentSettings
                | Screen::LogFile,
            ) => Nav::Push,
            _ => return Err(KioskError::WrongScreen(current)),
        };
        Ok(self.transition(target, nav, now))
    }

    // ---- Service menu ----

    pub fn toggle_maintenance(&mut self) -> Result<bool> {
        self.require(Screen::ServiceMenu)?;
        let enabled = !self.config().stop_work_mode;
        if let Err(e) = self.store.set(keys::STOP_WORK_MODE, &enabled.to_string()) {
            return Err(self.save_failed("maintenance mode", e));
        }
        self.record(
            LogCategory::Settings,
            if enabled {
                "Maintenance mode enabled"
            } else {
                "Maintenance mode disabled"
            },
        );
        Ok(enabled)
    }

    pub fn sampler_increase(&mut self) -> Result<u32> {
        self.require(Screen::Sampler)?;
        Ok(self.sampler.increase())
    }

    pub fn sampler_decrease(&mut self) -> Result<u32> {
        self.require(Screen::Sampler)?;
        Ok(self.sampler.decrease())
    }

    /// Returns the poured volume, or `None` while the previous pour is running.
    pub fn sampler_pour(&mut self, now: Instant) -> Result<Option<u32>> {
        self.require(Screen::Sampler)?;
        let Some(volume_ml) = self.sampler.begin_pour() else {
            return Ok(None);
        };
        self.record(LogCategory::Pouring, format!("Sampler poured {}ml", volume_ml));
        self.timers.arm(TimerKind::SamplerPour, now, SAMPLER_POUR_TIME);
        Ok(Some(volume_ml))
    }

    // ---- Cleaning ----

    pub fn start_cleaning(&mut self, now: Instant) -> Result<CleaningPhase> {
        self.require(Screen::Cleaning)?;
        let outputs = self.cleaning.start();
        self.apply_cleaning_outputs(&outputs, now);
        Ok(self.cleaning.phase())
    }

    pub fn pause_cleaning(&mut self, now: Instant) -> Result<CleaningPhase> {
        self.require(Screen::Cleaning)?;
        let outputs = self.cleaning.pause();
        self.apply_cleaning_outputs(&outputs, now);
        Ok(self.cleaning.phase())
    }

    pub fn resume_cleaning(&mut self, now: Instant) -> Result<CleaningPhase> {
        self.require(Screen::Cleaning)?;
        let outputs = self.cleaning.resume();
        self.apply_cleaning_outputs(&outputs, now);
        Ok(self.cleaning.phase())
    }

    pub fn stop_cleaning(&mut self, now: Instant) -> Result<CleaningPhase> {
        self.require(Screen::Cleaning)?;
        let outputs = self.cleaning.stop();
        self.apply_cleaning_outputs(&outputs, now);
        Ok(self.cleaning.phase())
    }

    /// Acknowledges a finished run and lands on the idle cleaning screen.
    pub fn complete_cleaning(&mut self, now: Instant) -> Result<Screen> {
        let current = self.session.current();
        if !current.is_service() {
            return Err(KioskError::WrongScreen(current));
        }
        let outputs = self.cleaning.complete();
        self.apply_cleaning_outputs(&outputs, now);
        Ok(self.transition(Screen::Cleaning, Nav::Replace, now))
    }

    // ---- Settings ----

    pub fn change_pin(
        &mut self,
        current_pin: &str,
        new_pin: &str,
        confirm_pin: &str,
        now: Instant,
    ) -> Result<()> {
        self.require(Screen::ChangePin)?;
        if current_pin != self.config().admin_pin {
            return Err(KioskError::CurrentPinIncorrect);
        }
        if new_pin.len() != PIN_LENGTH || !new_pin.chars().all(|c| c.is_ascii_digit()) {
            return Err(KioskError::PinFormat);
        }
        if new_pin != confirm_pin {
            return Err(KioskError::PinMismatch);
        }

        if let Err(e) = self.store.set(keys::ADMIN_PIN, new_pin) {
            return Err(self.save_failed("admin PIN", e));
        }
        self.record(LogCategory::Settings, "Admin PIN changed");
        self.transition(Screen::SettingsMenu, Nav::Replace, now);
        Ok(())
    }

    pub fn set_language(&mut self, language: Language) -> Result<()> {
        self.require(Screen::Language)?;
        if let Err(e) = self.store.set(keys::LANGUAGE, language.code()) {
            return Err(self.save_failed("language", e));
        }
        self.record(
            LogCategory::Settings,
            format!("Language changed to {}", language.display_name()),
        );
        Ok(())
    }

    pub fn save_api_settings(&mut self, settings: &ApiSettings, now: Instant) -> Result<()> {
        self.require(Screen::ApiSettings)?;
        if let Err(e) = settings.save(&mut self.store) {
            return Err(self.save_failed("API settings", e));
        }
        self.record(LogCategory::Settings, "API settings updated");
        self.transition(Screen::SettingsMenu, Nav::Replace, now);
        Ok(())
    }

    pub fn save_interface_settings(
        &mut self,
        settings: &InterfaceSettings,
        now: Instant,
    ) -> Result<()> {
        self.require(Screen::InterfaceSettings)?;
        settings.validate()?;
        if let Err(e) = settings.save(&mut self.store) {
            return Err(self.save_failed("interface settings", e));
        }
        self.record(LogCategory::Settings, "Interface settings updated");
        self.transition(Screen::SettingsMenu, Nav::Replace, now);
        Ok(())
    }

    pub fn save_payment_settings(&mut self, settings: &PaymentSettings, now: Instant) -> Result<()> {
        self.require(Screen::PaymentSettings)?;
        if let Err(e) = settings.save(&mut self.store) {
            return Err(self.save_failed("payment settings", e));
        }
        self.record(LogCategory::Settings, "Payment settings updated");
        self.transition(Screen::SettingsMenu, Nav::Replace, now);
        Ok(())
    }

    // ---- Timers ----

    /// Fires every timer due at `now`, earliest first. A timer cancelled or
    /// re-armed by an earlier one in the same pass is skipped.
    pub fn advance(&mut self, now: Instant) -> Screen {
        'scan: loop {
            let batch = self.timers.due(now);
            if batch.is_empty() {
                break;
            }

            for (i, &(token, due_at)) in batch.iter().enumerate() {
                if !self.timers.take(token, due_at) {
                    debug!("Skipping stale {:?} timer", token.kind);
                    continue;
                }
                self.fire(token, due_at);

                // Firing may have armed something due before the rest of the batch
                let earliest = self.timers.due(now).first().map(|(t, at)| (*at, t.kind));
                let next = batch.get(i + 1).map(|(t, at)| (*at, t.kind));
                if earliest.is_some_and(|earliest| next.map_or(true, |next| earliest < next)) {
                    continue 'scan;
                }
            }
        }
        self.session.current()
    }

    fn fire(&mut self, token: TimerToken, at: Instant) {
        debug!("Timer {:?} fired at {}ms", token.kind, at.as_millis());

        match token.kind {
            TimerKind::DosingTick => match self.dosing.as_mut() {
                Some(run) => {
                    let finished = run.tick();
                    debug!("Dosing progress {}%", run.progress());
                    if finished {
                        self.timers.cancel(TimerKind::DosingTick);
                    }
                }
                None => {
                    self.timers.cancel(TimerKind::DosingTick);
                }
            },
            TimerKind::DosingDeadline => {
                if self.session.current() == Screen::Dosing {
                    self.transition(Screen::ThankYou, Nav::Replace, at);
                }
            }
            TimerKind::ThankYouReturn => {
                if self.session.current() == Screen::ThankYou {
                    self.transition(Screen::Home, Nav::Replace, at);
                }
            }
            TimerKind::PinExpiry => {
                if self.pin_gate.close() {
                    info!("PIN challenge expired");
                    self.timers.cancel(TimerKind::PinErrorFlash);
                    self.transition(Screen::Home, Nav::Replace, at);
                }
            }
            TimerKind::PinErrorFlash => self.pin_gate.clear_error(),
            TimerKind::CleaningPhase => {
                let outputs = self.cleaning.phase_elapsed();
                self.apply_cleaning_outputs(&outputs, at);
            }
            TimerKind::SamplerPour => {
                self.sampler.finish_pour();
                debug!("Sampler ready");
            }
        }
    }

    // ---- Commands ----

    pub fn handle_command(&mut self, command: KioskCommand, now: Instant) -> Result<()> {
        debug!("Handling command: {:?}", command);

        match command {
            KioskCommand::Tap => {
                self.tap(now);
            }
            KioskCommand::SelectPortion { portion } => {
                self.select_portion(portion, now)?;
            }
            KioskCommand::PaymentCompleted => {
                self.payment_completed(now)?;
            }
            KioskCommand::OpenPin => self.open_pin(now)?,
            KioskCommand::PinDigit { digit } => {
                self.pin_digit(digit);
            }
            KioskCommand::PinDelete => {
                self.pin_delete();
            }
            KioskCommand::PinSubmit => {
                self.pin_submit(now);
            }
            KioskCommand::PinCancel => {
                self.pin_cancel(now);
            }
            KioskCommand::Back => {
                self.go_back(now);
            }
            KioskCommand::Open { screen } => {
                self.open_screen(screen, now)?;
            }
            KioskCommand::ToggleMaintenance => {
                self.toggle_maintenance()?;
            }
            KioskCommand::SamplerIncrease => {
                self.sampler_increase()?;
            }
            KioskCommand::SamplerDecrease => {
                self.sampler_decrease()?;
            }
            KioskCommand::SamplerPour => {
                self.sampler_pour(now)?;
            }
            KioskCommand::CleaningStart => {
                self.start_cleaning(now)?;
            }
            KioskCommand::CleaningPause => {
                self.pause_cleaning(now)?;
            }
            KioskCommand::CleaningResume => {
                self.resume_cleaning(now)?;
            }
            KioskCommand::CleaningStop => {
                self.stop_cleaning(now)?;
            }
            KioskCommand::CleaningComplete => {
                self.complete_cleaning(now)?;
            }
            KioskCommand::ChangePin {
                current,
                new,
                confirm,
            } => self.change_pin(&current, &new, &confirm, now)?,
            KioskCommand::SetLanguage { language } => self.set_language(language)?,
            KioskCommand::SaveApiSettings { url, key } => {
                self.save_api_settings(&ApiSettings { url, key }, now)?
            }
            KioskCommand::SaveInterfaceSettings { branding, portions } => {
                let mut settings = self.config().interface_settings();
                if let Some(branding) = branding {
                    settings.branding = branding;
                }
                for option in portions {
                    settings.portions.set_option(option);
                }
                self.save_interface_settings(&settings, now)?
            }
            KioskCommand::SavePaymentSettings {
                nfc_enabled,
                qr_enabled,
                no_payment_mode,
                merchant_id,
            } => self.save_payment_settings(
                &PaymentSettings {
                    nfc_enabled,
                    qr_enabled,
                    no_payment_mode,
                    merchant_id,
                },
                now,
            )?,
            KioskCommand::Shutdown => {
                info!("Shutdown is handled by the control loop");
            }
            KioskCommand::ShowLogs { filter } => {
                for entry in self.logs(filter) {
                    info!(
                        "[{}] {:?}: {}",
                        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        entry.category,
                        entry.message
                    );
                }
            }
        }
        Ok(())
    }

    /// Main loop: waits for a console command or the next armed timer. Returns
    /// once a `Shutdown` command arrives.
    pub async fn run(&mut self, commands: &CommandChannel) {
        info!("Starting kiosk control loop");
        console::publish(&self.status(None));

        loop {
            let wake_at = self
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + IDLE_WAKE);

            let message = match select(commands.receive(), Timer::at(wake_at)).await {
                Either::First(KioskCommand::Shutdown) => {
                    info!("Console closed - stopping kiosk control loop");
                    break;
                }
                Either::First(command) => {
                    let now = Instant::now();
                    // Overdue timers go first so the command sees current state
                    self.advance(now);
                    match self.handle_command(command, now) {
                        Ok(()) => None,
                        Err(e) if e.is_validation() => {
                            info!("Input refused: {}", e);
                            Some(e.to_string())
                        }
                        Err(e) => {
                            warn!("Command rejected: {}", e);
                            Some(e.to_string())
                        }
                    }
                }
                Either::Second(()) => {
                    self.advance(Instant::now());
                    None
                }
            };

            console::publish(&self.status(message));
        }
    }

    // ---- Internals ----

    fn require(&self, screen: Screen) -> Result<()> {
        let current = self.session.current();
        if current == screen {
            Ok(())
        } else {
            Err(KioskError::WrongScreen(current))
        }
    }

    fn transition(&mut self, target: Screen, nav: Nav, now: Instant) -> Screen {
        let from = self.session.current();
        if target == from {
            return from;
        }

        self.exit_screen(from, target, now);
        match nav {
            Nav::Push => self.session.navigate(target, true),
            Nav::Replace => self.session.navigate(target, false),
            Nav::Back => self.session.go_back(),
        };
        if from.is_service() && !target.is_service() {
            self.session.forget_previous();
        }
        self.enter_screen(target, now);

        self.session.current()
    }

    fn exit_screen(&mut self, from: Screen, to: Screen, now: Instant) {
        match from {
            Screen::Selection => {
                self.close_pin_challenge();
                self.selection = None;
                if !matches!(to, Screen::Payment | Screen::Dosing) {
                    self.carried = None;
                }
            }
            Screen::Payment => {
                self.payment = None;
                if to != Screen::Dosing {
                    self.carried = None;
                }
            }
            Screen::Dosing => {
                self.timers.cancel(TimerKind::DosingTick);
                self.timers.cancel(TimerKind::DosingDeadline);
                if let Some(run) = self.dosing.take() {
                    if run.progress() < 100 {
                        info!("Dosing left at {}%", run.progress());
                    }
                }
            }
            Screen::ThankYou => {
                self.timers.cancel(TimerKind::ThankYouReturn);
            }
            Screen::Sampler => {
                self.timers.cancel(TimerKind::SamplerPour);
                self.sampler.finish_pour();
            }
            _ => {}
        }

        if from.is_service() && !to.is_service() {
            self.abort_cleaning(now);
            self.sampler = Sampler::default();
        }
    }

    fn enter_screen(&mut self, target: Screen, now: Instant) {
        match target {
            Screen::Selection => {
                let config = self.config();
                self.selection = Some(SelectionView {
                    branding: config.branding,
                    portions: config.portions,
                    no_payment_mode: config.payment.no_payment_mode,
                    maintenance_mode: config.stop_work_mode,
                });
            }
            Screen::Payment => self.enter_payment(now),
            Screen::Dosing => self.enter_dosing(now),
            Screen::ThankYou => {
                self.timers.arm(TimerKind::ThankYouReturn, now, THANK_YOU_DELAY);
            }
            _ => {}
        }
    }

    // One-time check: settings may have changed since the portion was picked.
    fn enter_payment(&mut self, now: Instant) {
        let Some(context) = self.carried else {
            warn!("Payment entered without a selected portion");
            self.transition(Screen::Home, Nav::Replace, now);
            return;
        };

        let config = self.config();
        let resolution = resolve(context.portion, &config.portions, config.payment.no_payment_mode);
        if !resolution.needs_payment {
            info!("{} no longer needs payment - continuing to dosing", context.portion);
            self.carried = Some(PaymentContext {
                price: None,
                ..context
            });
            self.transition(Screen::Dosing, Nav::Replace, now);
            return;
        }

        self.payment = Some(PaymentView {
            context,
            nfc_enabled: config.payment.nfc_enabled,
            qr_enabled: config.payment.qr_enabled,
        });
    }

    fn enter_dosing(&mut self, now: Instant) {
        let Some(context) = self.carried.take() else {
            warn!("Dosing entered without a selected portion");
            self.transition(Screen::Home, Nav::Replace, now);
            return;
        };

        self.dosing = Some(DosingRun::new(context.portion, context.volume_ml));
        self.timers.arm_periodic(TimerKind::DosingTick, now, DOSING_TICK);
        self.timers.arm(TimerKind::DosingDeadline, now, DOSING_DEADLINE);
        self.record(
            LogCategory::Pouring,
            format!(
                "Dispensing {} portion ({}ml)",
                context.portion, context.volume_ml
            ),
        );
    }

    fn close_pin_challenge(&mut self) {
        self.pin_gate.close();
        self.timers.cancel(TimerKind::PinExpiry);
        self.timers.cancel(TimerKind::PinErrorFlash);
    }

    fn abort_cleaning(&mut self, now: Instant) {
        let outputs = match self.cleaning.phase() {
            CleaningPhase::None => return,
            CleaningPhase::Completed => self.cleaning.complete(),
            _ => {
                info!("Leaving the service menu - aborting cleaning");
                self.cleaning.stop()
            }
        };
        self.apply_cleaning_outputs(&outputs, now);
    }

    fn apply_cleaning_outputs(&mut self, outputs: &[CleaningOutput], now: Instant) {
        for output in outputs {
            match *output {
                CleaningOutput::Started => {
                    self.record(LogCategory::Cleaning, "Cleaning process started")
                }
                CleaningOutput::PhaseEntered(CleaningPhase::Completed) => self.record(
                    LogCategory::Cleaning,
                    "Cleaning sequence finished - awaiting confirmation",
                ),
                CleaningOutput::PhaseEntered(phase) => self.record(
                    LogCategory::Cleaning,
                    format!("Cleaning phase started: {}", phase.label()),
                ),
                CleaningOutput::Paused(phase) => self.record(
                    LogCategory::Cleaning,
                    format!("Cleaning process paused during {}", phase.label()),
                ),
                CleaningOutput::Resumed(phase) => self.record(
                    LogCategory::Cleaning,
                    format!("Cleaning process resumed: {} restarted", phase.label()),
                ),
                CleaningOutput::Stopped(phase) => self.record(
                    LogCategory::Cleaning,
                    format!("Cleaning process stopped during {}", phase.label()),
                ),
                CleaningOutput::Acknowledged => self.record(
                    LogCategory::Cleaning,
                    "Cleaning process completed successfully",
                ),
                CleaningOutput::ArmPhaseTimer(duration) => {
                    self.timers.arm(TimerKind::CleaningPhase, now, duration);
                }
                CleaningOutput::CancelPhaseTimer => {
                    self.timers.cancel(TimerKind::CleaningPhase);
                }
            }
        }
    }

    fn record(&mut self, category: LogCategory, message: impl Into<String>) {
        self.log.append(category, message);
        if let Err(e) = self.log.persist(&mut self.store) {
            warn!("Failed to persist system log: {}", e);
            self.log
                .append(LogCategory::Error, format!("Failed to save system log: {}", e));
        }
    }

    fn save_failed(&mut self, what: &str, err: StorageError) -> KioskError {
        error!("Failed to save {}: {}", what, err);
        self.record(LogCategory::Error, format!("Failed to save {}: {}", what, err));
        KioskError::Storage(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::MemoryStore;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn kiosk() -> KioskController<MemoryStore> {
        KioskController::new(MemoryStore::new())
    }

    fn kiosk_with(values: &[(&str, &str)]) -> KioskController<MemoryStore> {
        KioskController::new(MemoryStore::with_values(values.iter().copied()))
    }

    fn enter_service(kiosk: &mut KioskController<MemoryStore>, now: Instant) {
        kiosk.tap(now);
        kiosk.open_pin(now).unwrap();
        for c in "1111".chars() {
            kiosk.pin_digit(c);
        }
        assert_eq!(kiosk.pin_submit(now), PinOutcome::Granted);
        assert_eq!(kiosk.screen(), Screen::ServiceMenu);
    }

    #[test]
    fn test_tap_opens_selection() {
        let mut kiosk = kiosk();
        assert_eq!(kiosk.tap(at(0)), Screen::Selection);
        assert!(kiosk.selection().is_some());
        // Tapping elsewhere does nothing.
        assert_eq!(kiosk.tap(at(10)), Screen::Selection);
    }

    #[test]
    fn test_disabled_portion_rejected() {
        let mut kiosk = kiosk_with(&[("enableSmall", "false")]);
        kiosk.tap(at(0));
        assert!(matches!(
            kiosk.select_portion(PortionSize::Small, at(0)),
            Err(KioskError::PortionUnavailable(PortionSize::Small))
        ));
        assert_eq!(kiosk.screen(), Screen::Selection);
    }

    #[test]
    fn test_free_portion_skips_payment() {
        let mut kiosk = kiosk_with(&[("priceMedium", "0")]);
        kiosk.tap(at(0));
        assert_eq!(kiosk.select_portion(PortionSize::Medium, at(0)).unwrap(), Screen::Dosing);
        assert_eq!(kiosk.dosing().unwrap().volume_ml, 50);
    }

    #[test]
    fn test_maintenance_blocks_selection_but_not_pin() {
        let mut kiosk = kiosk_with(&[("stopWorkMode", "true")]);
        kiosk.tap(at(0));
        assert_eq!(kiosk.select_portion(PortionSize::Small, at(0)).unwrap(), Screen::Selection);
        assert!(kiosk.open_pin(at(0)).is_ok());
        assert!(kiosk.pin_challenge().is_some());
    }

    #[test]
    fn test_payment_redirects_when_price_dropped() {
        let mut kiosk = kiosk();
        kiosk.tap(at(0));
        // Settings change between selection snapshot and payment entry.
        kiosk.store.set("noPaymentMode", "true").unwrap();
        assert_eq!(kiosk.select_portion(PortionSize::Small, at(0)).unwrap(), Screen::Dosing);
        assert!(kiosk.payment().is_none());
        assert_eq!(kiosk.previous_screen(), None);
    }

    #[test]
    fn test_payment_logs_transaction() {
        let mut kiosk = kiosk();
        kiosk.tap(at(0));
        kiosk.select_portion(PortionSize::Large, at(0)).unwrap();
        assert_eq!(kiosk.payment().unwrap().title(), "Payment - $3.50");

        assert_eq!(kiosk.payment_completed(at(100)).unwrap(), Screen::Dosing);
        let transactions = kiosk.logs(Some(LogCategory::Transaction));
        assert_eq!(transactions.len(), 1);
        assert!(transactions[0].message.contains("$3.50"));
        assert_eq!(kiosk.logs(Some(LogCategory::Pouring)).len(), 1);
    }

    #[test]
    fn test_wrong_pin_flashes_error() {
        let mut kiosk = kiosk();
        kiosk.tap(at(0));
        kiosk.open_pin(at(0)).unwrap();
        for c in "0000".chars() {
            kiosk.pin_digit(c);
        }
        assert_eq!(kiosk.pin_submit(at(500)), PinOutcome::Rejected);
        assert!(kiosk.pin_challenge().unwrap().attempt_failed);

        kiosk.advance(at(2500));
        assert!(!kiosk.pin_challenge().unwrap().attempt_failed);
        assert_eq!(kiosk.screen(), Screen::Selection);
    }

    #[test]
    fn test_pin_expiry_goes_home_once() {
        let mut kiosk = kiosk();
        kiosk.tap(at(0));
        kiosk.open_pin(at(1000)).unwrap();
        kiosk.pin_digit('1');

        assert_eq!(kiosk.advance(at(5999)), Screen::Selection);
        assert_eq!(kiosk.advance(at(6000)), Screen::Home);
        assert!(kiosk.pin_challenge().is_none());
        assert!(!kiosk.is_timer_armed(TimerKind::PinExpiry));

        kiosk.tap(at(7000));
        assert_eq!(kiosk.advance(at(20_000)), Screen::Selection);
    }

    #[test]
    fn test_reopening_pin_replaces_expiry() {
        let mut kiosk = kiosk();
        kiosk.tap(at(0));
        kiosk.open_pin(at(0)).unwrap();
        kiosk.open_pin(at(3000)).unwrap();
        assert_eq!(kiosk.advance(at(5000)), Screen::Selection);
        assert_eq!(kiosk.advance(at(8000)), Screen::Home);
    }

    #[test]
    fn test_pin_cancel_returns_home() {
        let mut kiosk = kiosk();
        kiosk.tap(at(0));
        kiosk.open_pin(at(0)).unwrap();
        assert_eq!(kiosk.pin_cancel(at(100)), Screen::Home);
        assert_eq!(kiosk.next_deadline(), None);
    }

    #[test]
    fn test_settings_navigation_remembers_menu() {
        let mut kiosk = kiosk();
        enter_service(&mut kiosk, at(0));
        kiosk.open_screen(Screen::SettingsMenu, at(0)).unwrap();
        kiosk.open_screen(Screen::Language, at(0)).unwrap();
        assert_eq!(kiosk.previous_screen(), Some(Screen::SettingsMenu));

        assert_eq!(kiosk.go_back(at(0)), Screen::SettingsMenu);
        assert_eq!(kiosk.go_back(at(0)), Screen::ServiceMenu);
        assert_eq!(kiosk.go_back(at(0)), Screen::Home);

        assert!(matches!(
            kiosk.open_screen(Screen::ServiceMenu, at(0)),
            Err(KioskError::WrongScreen(Screen::Home))
        ));
    }

    #[test]
    fn test_change_pin_error_order() {
        let mut kiosk = kiosk();
        enter_service(&mut kiosk, at(0));
        kiosk.open_screen(Screen::SettingsMenu, at(0)).unwrap();
        kiosk.open_screen(Screen::ChangePin, at(0)).unwrap();

        assert!(matches!(
            kiosk.change_pin("0000", "12", "34", at(0)),
            Err(KioskError::CurrentPinIncorrect)
        ));
        assert!(matches!(
            kiosk.change_pin("1111", "12a4", "12a4", at(0)),
            Err(KioskError::PinFormat)
        ));
        assert!(matches!(
            kiosk.change_pin("1111", "1234", "1235", at(0)),
            Err(KioskError::PinMismatch)
        ));
        assert_eq!(kiosk.screen(), Screen::ChangePin);

        kiosk.change_pin("1111", "1234", "1234", at(0)).unwrap();
        assert_eq!(kiosk.screen(), Screen::SettingsMenu);
        assert_eq!(kiosk.config().admin_pin, "1234");
        assert_eq!(kiosk.latest_log().unwrap().message, "Admin PIN changed");
    }

    #[test]
    fn test_interface_settings_keep_one_portion() {
        let mut kiosk = kiosk();
        enter_service(&mut kiosk, at(0));
        kiosk.open_screen(Screen::SettingsMenu, at(0)).unwrap();
        kiosk.open_screen(Screen::InterfaceSettings, at(0)).unwrap();

        let mut settings = kiosk.config().interface_settings();
        for size in PortionSize::ALL {
            settings.portions.set_option(crate::types::PortionOption {
                enabled: false,
                ..*settings.portions.get(size)
            });
        }
        assert!(matches!(
            kiosk.save_interface_settings(&settings, at(0)),
            Err(KioskError::LastPortionDisabled)
        ));
        assert_eq!(kiosk.screen(), Screen::InterfaceSettings);
        assert_eq!(kiosk.config().portions.enabled_count(), 3);
    }

    #[test]
    fn test_maintenance_toggle_logged() {
        let mut kiosk = kiosk();
        enter_service(&mut kiosk, at(0));
        assert!(kiosk.toggle_maintenance().unwrap());
        assert_eq!(kiosk.latest_log().unwrap().message, "Maintenance mode enabled");
        assert!(!kiosk.toggle_maintenance().unwrap());
        assert_eq!(kiosk.latest_log().unwrap().message, "Maintenance mode disabled");
    }

    #[test]
    fn test_sampler_busy_window() {
        let mut kiosk = kiosk();
        enter_service(&mut kiosk, at(0));
        kiosk.open_screen(Screen::Sampler, at(0)).unwrap();
        kiosk.sampler_increase().unwrap();

        assert_eq!(kiosk.sampler_pour(at(0)).unwrap(), Some(25));
        assert_eq!(kiosk.sampler_pour(at(1000)).unwrap(), None);
        assert_eq!(kiosk.latest_log().unwrap().message, "Sampler poured 25ml");

        kiosk.advance(at(2000));
        assert!(!kiosk.sampler().is_pouring());
    }

    #[test]
    fn test_cleaning_runs_to_completion() {
        let mut kiosk = kiosk();
        enter_service(&mut kiosk, at(0));
        kiosk.open_screen(Screen::Cleaning, at(0)).unwrap();

        kiosk.start_cleaning(at(0)).unwrap();
        kiosk.advance(at(5000));
        assert_eq!(kiosk.cleaning_phase(), CleaningPhase::Waiting);
        kiosk.advance(at(13_000));
        assert_eq!(kiosk.cleaning_phase(), CleaningPhase::Completed);
        assert_eq!(kiosk.next_deadline(), None);

        assert_eq!(kiosk.complete_cleaning(at(14_000)).unwrap(), Screen::Cleaning);
        assert_eq!(kiosk.cleaning_phase(), CleaningPhase::None);

        let messages: Vec<_> = kiosk
            .logs(Some(LogCategory::Cleaning))
            .into_iter()
            .map(|e| e.message.clone())
            .collect();
        assert_eq!(messages.first().map(String::as_str), Some("Cleaning process completed successfully"));
        assert_eq!(messages.last().map(String::as_str), Some("Cleaning process started"));
        assert_eq!(messages.len(), 6);
    }

    #[test]
    fn test_leaving_service_aborts_cleaning() {
        let mut kiosk = kiosk();
        enter_service(&mut kiosk, at(0));
        kiosk.open_screen(Screen::Cleaning, at(0)).unwrap();
        kiosk.start_cleaning(at(0)).unwrap();

        assert_eq!(kiosk.go_back(at(1000)), Screen::ServiceMenu);
        assert_eq!(kiosk.cleaning_phase(), CleaningPhase::Chemical);
        assert_eq!(kiosk.go_back(at(2000)), Screen::Home);

        assert_eq!(kiosk.cleaning_phase(), CleaningPhase::None);
        assert!(!kiosk.is_timer_armed(TimerKind::CleaningPhase));
        assert!(kiosk.latest_log().unwrap().message.starts_with("Cleaning process stopped"));
    }

    #[test]
    fn test_wrong_screen_commands_rejected() {
        let mut kiosk = kiosk();
        assert!(matches!(
            kiosk.start_cleaning(at(0)),
            Err(KioskError::WrongScreen(Screen::Home))
        ));
        assert!(matches!(
            kiosk.payment_completed(at(0)),
            Err(KioskError::WrongScreen(Screen::Home))
        ));
        assert!(kiosk.handle_command(KioskCommand::ToggleMaintenance, at(0)).is_err());
    }

    #[test]
    fn test_pin_expiry_skips_cancelled_flash() {
        let mut kiosk = kiosk();
        kiosk.tap(at(0));
        kiosk.open_pin(at(0)).unwrap();
        for c in "0000".chars() {
            kiosk.pin_digit(c);
        }
        // The error flash ends exactly when the challenge expires.
        assert_eq!(kiosk.pin_submit(at(3000)), PinOutcome::Rejected);

        assert_eq!(kiosk.advance(at(5000)), Screen::Home);
        assert!(kiosk.pin_challenge().is_none());
        assert_eq!(kiosk.next_deadline(), None);
    }

    #[test]
    fn test_late_wake_catches_up_dosing() {
        let mut kiosk = kiosk_with(&[("noPaymentMode", "true")]);
        kiosk.tap(at(0));
        kiosk.select_portion(PortionSize::Small, at(0)).unwrap();

        assert_eq!(kiosk.advance(at(4500)), Screen::Dosing);
        assert_eq!(kiosk.dosing().unwrap().progress(), 80);
        // Deadline at 5000 and ThankYou's return at 8000 both pass in one wake.
        assert_eq!(kiosk.advance(at(9000)), Screen::Home);
        assert_eq!(kiosk.next_deadline(), None);
    }

    #[test]
    fn test_failed_save_changes_nothing() {
        use crate::system::FileStore;

        let path = std::env::temp_dir()
            .join(format!("kiosk-controller-missing-{}", std::process::id()))
            .join("settings.json");
        let mut kiosk = KioskController::new(FileStore::open(&path).unwrap());
        kiosk.tap(at(0));
        kiosk.open_pin(at(0)).unwrap();
        for c in "1111".chars() {
            kiosk.pin_digit(c);
        }
        assert_eq!(kiosk.pin_submit(at(0)), PinOutcome::Granted);

        let err = kiosk.toggle_maintenance().unwrap_err();
        assert!(matches!(err, KioskError::Storage(_)));
        assert!(!err.is_validation());
        assert!(!kiosk.config().stop_work_mode);
        assert_eq!(kiosk.latest_log().unwrap().category, LogCategory::Error);

        assert_eq!(kiosk.go_back(at(0)), Screen::Home);
        kiosk.tap(at(0));
        assert_eq!(kiosk.select_portion(PortionSize::Medium, at(0)).unwrap(), Screen::Payment);
    }
}
