use embassy_time::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    Home,
    Selection,
    Payment,
    Dosing,
    ThankYou,
    ServiceMenu,
    Sampler,
    Cleaning,
    SettingsMenu,
    ChangePin,
    Language,
    ApiSettings,
    ArduinoSettings,
    InterfaceSettings,
    PaymentSettings,
    LogFile,
}

impl Screen {
    /// Operator screens reachable only through the PIN gate.
    pub fn is_service(&self) -> bool {
        !matches!(
            self,
            Screen::Home | Screen::Selection | Screen::Payment | Screen::Dosing | Screen::ThankYou
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortionSize {
    Small,
    Medium,
    Large,
}

impl PortionSize {
    pub const ALL: [PortionSize; 3] = [PortionSize::Small, PortionSize::Medium, PortionSize::Large];

    pub fn index(&self) -> usize {
        match self {
            PortionSize::Small => 0,
            PortionSize::Medium => 1,
            PortionSize::Large => 2,
        }
    }
}

impl fmt::Display for PortionSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortionSize::Small => write!(f, "Small"),
            PortionSize::Medium => write!(f, "Medium"),
            PortionSize::Large => write!(f, "Large"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortionOption {
    pub size: PortionSize,
    pub enabled: bool,
    pub price: f64,
    pub volume_ml: u32,
}

/// Carried from Selection into Payment or Dosing. `price` is `None` when the
/// customer skipped payment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PaymentContext {
    pub portion: PortionSize,
    pub price: Option<f64>,
    pub volume_ml: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Uk,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Uk => "uk",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "en" => Some(Language::En),
            "uk" => Some(Language::Uk),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Uk => "Ukrainian",
        }
    }
}

/// `$3.00`, or `FREE` for a zero price.
pub fn format_price(price: f64) -> String {
    if price == 0.0 {
        "FREE".to_string()
    } else {
        format!("${:.2}", price)
    }
}

pub const DOSING_TICK: Duration = Duration::from_secs(1);
pub const DOSING_TICKS: u8 = 5;
pub const DOSING_PROGRESS_STEP: u8 = 20;
pub const DOSING_DEADLINE: Duration = Duration::from_secs(5);
pub const THANK_YOU_DELAY: Duration = Duration::from_secs(3);
pub const PIN_EXPIRY: Duration = Duration::from_secs(5);
pub const PIN_ERROR_FLASH: Duration = Duration::from_secs(2);
pub const PIN_LENGTH: usize = 4;
pub const DEFAULT_ADMIN_PIN: &str = "1111";
pub const SAMPLER_POUR_TIME: Duration = Duration::from_secs(2);
pub const SAMPLER_MIN_ML: u32 = 10;
pub const SAMPLER_MAX_ML: u32 = 50;
pub const SAMPLER_STEP_ML: u32 = 5;
pub const SAMPLER_DEFAULT_ML: u32 = 20;
pub const LOG_CAPACITY: usize = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_formatting() {
        assert_eq!(format_price(3.0), "$3.00");
        assert_eq!(format_price(2.5), "$2.50");
        assert_eq!(format_price(0.0), "FREE");
    }

    #[test]
    fn test_service_screens() {
        assert!(!Screen::Home.is_service());
        assert!(!Screen::Dosing.is_service());
        assert!(Screen::ServiceMenu.is_service());
        assert!(Screen::LogFile.is_service());
    }
}
