//! JSON-lines console: commands in on stdin, status snapshots out on stdout.

use crate::{
    cleaning::CleaningPhase,
    controller::KioskController,
    service::Sampler,
    system::{Branding, LogCategory, LogEntry, SettingsStore},
    types::{format_price, Language, PortionOption, PortionSize, Screen},
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::thread;

pub type CommandChannel = Channel<CriticalSectionRawMutex, KioskCommand, 10>;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum KioskCommand {
    #[serde(rename = "tap")]
    Tap,
    #[serde(rename = "select_portion")]
    SelectPortion { portion: PortionSize },
    #[serde(rename = "payment_completed")]
    PaymentCompleted,
    #[serde(rename = "open_pin")]
    OpenPin,
    #[serde(rename = "pin_digit")]
    PinDigit { digit: char },
    #[serde(rename = "pin_delete")]
    PinDelete,
    #[serde(rename = "pin_submit")]
    PinSubmit,
    #[serde(rename = "pin_cancel")]
    PinCancel,
    #[serde(rename = "back")]
    Back,
    #[serde(rename = "open")]
    Open { screen: Screen },
    #[serde(rename = "toggle_maintenance")]
    ToggleMaintenance,
    #[serde(rename = "sampler_increase")]
    SamplerIncrease,
    #[serde(rename = "sampler_decrease")]
    SamplerDecrease,
    #[serde(rename = "sampler_pour")]
    SamplerPour,
    #[serde(rename = "cleaning_start")]
    CleaningStart,
    #[serde(rename = "cleaning_pause")]
    CleaningPause,
    #[serde(rename = "cleaning_resume")]
    CleaningResume,
    #[serde(rename = "cleaning_stop")]
    CleaningStop,
    #[serde(rename = "cleaning_complete")]
    CleaningComplete,
    #[serde(rename = "change_pin")]
    ChangePin {
        current: String,
        new: String,
        confirm: String,
    },
    #[serde(rename = "set_language")]
    SetLanguage { language: Language },
    #[serde(rename = "save_api_settings")]
    SaveApiSettings { url: String, key: String },
    /// Only the given portions and branding are changed.
    #[serde(rename = "save_interface_settings")]
    SaveInterfaceSettings {
        #[serde(default)]
        branding: Option<Branding>,
        #[serde(default)]
        portions: Vec<PortionOption>,
    },
    #[serde(rename = "save_payment_settings")]
    SavePaymentSettings {
        nfc_enabled: bool,
        qr_enabled: bool,
        no_payment_mode: bool,
        #[serde(default)]
        merchant_id: String,
    },
    #[serde(rename = "show_logs")]
    ShowLogs {
        #[serde(default)]
        filter: Option<LogCategory>,
    },
    /// Sent by the reader when stdin closes.
    #[serde(rename = "shutdown")]
    Shutdown,
}

pub fn parse_command(line: &str) -> Result<KioskCommand, serde_json::Error> {
    serde_json::from_str(line.trim())
}

#[derive(Debug, Serialize)]
pub struct PortionLabel {
    pub size: PortionSize,
    pub price: String,
    pub volume_ml: u32,
}

#[derive(Debug, Serialize)]
pub struct PinStatus {
    pub digits_entered: usize,
    pub attempt_failed: bool,
    pub can_submit: bool,
}

#[derive(Debug, Serialize)]
pub struct PaymentStatus {
    pub title: String,
    pub portion: PortionSize,
    pub volume_ml: u32,
    pub nfc_enabled: bool,
    pub qr_enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct DosingStatus {
    pub portion: PortionSize,
    pub volume_ml: u32,
    pub progress: u8,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CleaningStatus {
    pub phase: CleaningPhase,
    pub paused: bool,
}

/// What a front end needs to draw the current screen.
#[derive(Debug, Serialize)]
pub struct KioskStatus {
    pub screen: Screen,
    pub previous: Option<Screen>,
    pub branding: Option<Branding>,
    pub portions: Vec<PortionLabel>,
    pub maintenance_mode: bool,
    pub pin: Option<PinStatus>,
    pub payment: Option<PaymentStatus>,
    pub dosing: Option<DosingStatus>,
    pub cleaning: CleaningStatus,
    pub sampler: Option<Sampler>,
    pub last_log: Option<LogEntry>,
    pub error: Option<String>,
}

impl KioskStatus {
    pub fn capture<S: SettingsStore>(kiosk: &KioskController<S>, error: Option<String>) -> Self {
        let screen = kiosk.screen();

        let (branding, portions, maintenance_mode) = match (screen, kiosk.selection()) {
            (Screen::Selection, Some(view)) => (
                Some(view.branding.clone()),
                view.portions
                    .enabled()
                    .map(|option| PortionLabel {
                        size: option.size,
                        price: format_price(option.price),
                        volume_ml: option.volume_ml,
                    })
                    .collect(),
                view.maintenance_mode,
            ),
            (Screen::Home, _) => (Some(kiosk.config().branding), Vec::new(), false),
            _ => (None, Vec::new(), false),
        };

        Self {
            screen,
            previous: kiosk.previous_screen(),
            branding,
            portions,
            maintenance_mode,
            pin: kiosk.pin_challenge().map(|challenge| PinStatus {
                digits_entered: challenge.entered_len(),
                attempt_failed: challenge.attempt_failed,
                can_submit: challenge.can_submit(),
            }),
            payment: kiosk.payment().map(|view| PaymentStatus {
                title: view.title(),
                portion: view.context.portion,
                volume_ml: view.context.volume_ml,
                nfc_enabled: view.nfc_enabled,
                qr_enabled: view.qr_enabled,
            }),
            dosing: kiosk.dosing().map(|run| DosingStatus {
                portion: run.portion,
                volume_ml: run.volume_ml,
                progress: run.progress(),
                message: run.status_message(),
            }),
            cleaning: CleaningStatus {
                phase: kiosk.cleaning_phase(),
                paused: kiosk.cleaning_paused(),
            },
            sampler: (screen == Screen::Sampler).then(|| *kiosk.sampler()),
            last_log: kiosk.latest_log().cloned(),
            error,
        }
    }
}

pub fn publish(status: &KioskStatus) {
    match serde_json::to_string(status) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!("Failed to serialize status: {}", e),
    }
}

/// Reads one command per line from stdin on a plain thread and forwards it
/// into the control loop's channel. Queues `Shutdown` when stdin closes.
pub fn spawn_stdin_reader(commands: &'static CommandChannel) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("console-stdin".into())
        .spawn(move || {
            info!("Console ready - one JSON command per line");
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Console read failed: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                match parse_command(&line) {
                    Ok(command) => {
                        debug!("Console command: {:?}", command);
                        if commands.try_send(command).is_err() {
                            warn!("Command queue full - dropping command");
                        }
                    }
                    Err(e) => warn!("Invalid command {:?}: {}", line, e),
                }
            }
            info!("Console input closed");
            embassy_futures::block_on(commands.send(KioskCommand::Shutdown));
        })
}
