//! Typed kiosk configuration on top of the key/value settings store.
//! Raw store keys are only spelled out in this module.

use crate::error::{KioskError, StorageError};
use crate::pricing::PortionTable;
use crate::system::storage::SettingsStore;
use crate::types::{Language, PortionOption, PortionSize, DEFAULT_ADMIN_PIN};
use log::warn;
use serde::{Deserialize, Serialize};

pub mod keys {
    pub const COFFEE_NAME: &str = "coffeeName";
    pub const COFFEE_DESCRIPTION: &str = "coffeeDescription";
    pub const COFFEE_IMAGE: &str = "coffeeImage";
    pub const NO_PAYMENT_MODE: &str = "noPaymentMode";
    pub const NFC_ENABLED: &str = "nfcEnabled";
    pub const QR_ENABLED: &str = "qrEnabled";
    pub const MERCHANT_ID: &str = "merchantId";
    pub const ADMIN_PIN: &str = "adminPin";
    pub const STOP_WORK_MODE: &str = "stopWorkMode";
    pub const LANGUAGE: &str = "language";
    pub const API_URL: &str = "apiUrl";
    pub const API_KEY: &str = "apiKey";
    pub const SYSTEM_LOGS: &str = "systemLogs";

    use crate::types::PortionSize;

    pub fn price(size: PortionSize) -> &'static str {
        match size {
            PortionSize::Small => "priceSmall",
            PortionSize::Medium => "priceMedium",
            PortionSize::Large => "priceLarge",
        }
    }

    pub fn amount(size: PortionSize) -> &'static str {
        match size {
            PortionSize::Small => "amountSmall",
            PortionSize::Medium => "amountMedium",
            PortionSize::Large => "amountLarge",
        }
    }

    pub fn enable(size: PortionSize) -> &'static str {
        match size {
            PortionSize::Small => "enableSmall",
            PortionSize::Medium => "enableMedium",
            PortionSize::Large => "enableLarge",
        }
    }
}

pub const DEFAULT_COFFEE_NAME: &str = "Premium Espresso";
pub const DEFAULT_COFFEE_DESCRIPTION: &str = "Rich, aromatic espresso";
pub const DEFAULT_COFFEE_IMAGE: &str =
    "https://images.unsplash.com/photo-1510591509098-f4fdc6d0ff04?w=1200&h=800&fit=crop";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branding {
    pub name: String,
    pub description: String,
    pub image_url: String,
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            name: DEFAULT_COFFEE_NAME.to_string(),
            description: DEFAULT_COFFEE_DESCRIPTION.to_string(),
            image_url: DEFAULT_COFFEE_IMAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentSettings {
    pub nfc_enabled: bool,
    pub qr_enabled: bool,
    pub no_payment_mode: bool,
    pub merchant_id: String,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            nfc_enabled: true,
            qr_enabled: true,
            no_payment_mode: false,
            merchant_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApiSettings {
    pub url: String,
    pub key: String,
}

/// Everything the operator can edit on the interface settings screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InterfaceSettings {
    pub branding: Branding,
    pub portions: PortionTable,
}

/// Snapshot of every tunable, taken fresh whenever a screen is entered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KioskConfig {
    pub branding: Branding,
    pub portions: PortionTable,
    pub payment: PaymentSettings,
    pub admin_pin: String,
    pub stop_work_mode: bool,
    pub language: Language,
    pub api: ApiSettings,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            branding: Branding::default(),
            portions: PortionTable::default(),
            payment: PaymentSettings::default(),
            admin_pin: DEFAULT_ADMIN_PIN.to_string(),
            stop_work_mode: false,
            language: Language::En,
            api: ApiSettings::default(),
        }
    }
}

impl KioskConfig {
    /// Missing or unparseable keys fall back to their defaults.
    pub fn load(store: &dyn SettingsStore) -> Self {
        let defaults = Self::default();

        let mut portions = defaults.portions.clone();
        for size in PortionSize::ALL {
            let fallback = defaults.portions.get(size);
            portions.set_option(PortionOption {
                size,
                enabled: default_true(store, keys::enable(size)),
                price: store
                    .get(keys::price(size))
                    .and_then(|v| v.trim().parse::<f64>().ok())
                    .filter(|p| p.is_finite() && *p >= 0.0)
                    .unwrap_or(fallback.price),
                volume_ml: store
                    .get(keys::amount(size))
                    .and_then(|v| v.trim().parse::<u32>().ok())
                    .filter(|v| *v > 0)
                    .unwrap_or(fallback.volume_ml),
            });
        }
        if portions.repair() {
            warn!("Stored settings disabled every portion - re-enabling all");
        }

        Self {
            branding: Branding {
                name: non_empty(store, keys::COFFEE_NAME).unwrap_or(defaults.branding.name),
                description: non_empty(store, keys::COFFEE_DESCRIPTION)
                    .unwrap_or(defaults.branding.description),
                image_url: non_empty(store, keys::COFFEE_IMAGE)
                    .unwrap_or(defaults.branding.image_url),
            },
            portions,
            payment: PaymentSettings {
                nfc_enabled: default_true(store, keys::NFC_ENABLED),
                qr_enabled: default_true(store, keys::QR_ENABLED),
                no_payment_mode: default_false(store, keys::NO_PAYMENT_MODE),
                merchant_id: store.get(keys::MERCHANT_ID).unwrap_or_default(),
            },
            admin_pin: non_empty(store, keys::ADMIN_PIN).unwrap_or(defaults.admin_pin),
            stop_work_mode: default_false(store, keys::STOP_WORK_MODE),
            language: store
                .get(keys::LANGUAGE)
                .and_then(|code| Language::from_code(&code))
                .unwrap_or(defaults.language),
            api: ApiSettings {
                url: store.get(keys::API_URL).unwrap_or_default(),
                key: store.get(keys::API_KEY).unwrap_or_default(),
            },
        }
    }

    pub fn interface_settings(&self) -> InterfaceSettings {
        InterfaceSettings {
            branding: self.branding.clone(),
            portions: self.portions.clone(),
        }
    }
}

impl InterfaceSettings {
    pub fn validate(&self) -> Result<(), KioskError> {
        self.portions.validate()
    }

    pub fn save(&self, store: &mut dyn SettingsStore) -> Result<(), StorageError> {
        let mut entries = vec![
            (keys::COFFEE_NAME, self.branding.name.clone()),
            (keys::COFFEE_DESCRIPTION, self.branding.description.clone()),
            (keys::COFFEE_IMAGE, self.branding.image_url.clone()),
        ];
        for option in self.portions.options() {
            entries.push((keys::price(option.size), option.price.to_string()));
            entries.push((keys::amount(option.size), option.volume_ml.to_string()));
            entries.push((keys::enable(option.size), option.enabled.to_string()));
        }
        store.set_many(&entries)
    }
}

impl PaymentSettings {
    pub fn save(&self, store: &mut dyn SettingsStore) -> Result<(), StorageError> {
        store.set_many(&[
            (keys::NFC_ENABLED, self.nfc_enabled.to_string()),
            (keys::QR_ENABLED, self.qr_enabled.to_string()),
            (keys::NO_PAYMENT_MODE, self.no_payment_mode.to_string()),
            (keys::MERCHANT_ID, self.merchant_id.clone()),
        ])
    }
}

impl ApiSettings {
    pub fn save(&self, store: &mut dyn SettingsStore) -> Result<(), StorageError> {
        store.set_many(&[
            (keys::API_URL, self.url.clone()),
            (keys::API_KEY, self.key.clone()),
        ])
    }
}

fn non_empty(store: &dyn SettingsStore, key: &str) -> Option<String> {
    store.get(key).filter(|v| !v.is_empty())
}

// Opt-out flags: anything but the literal "false" counts as enabled.
fn default_true(store: &dyn SettingsStore, key: &str) -> bool {
    store.get(key).as_deref() != Some("false")
}

fn default_false(store: &dyn SettingsStore, key: &str) -> bool {
    store.get(key).as_deref() == Some("true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::storage::{FileStore, MemoryStore};

    #[test]
    fn test_defaults_from_empty_store() {
        let config = KioskConfig::load(&MemoryStore::new());
        assert_eq!(config, KioskConfig::default());
        assert_eq!(config.branding.name, "Premium Espresso");
        assert_eq!(config.portions.get(PortionSize::Medium).price, 3.0);
        assert_eq!(config.portions.get(PortionSize::Large).volume_ml, 70);
        assert_eq!(config.admin_pin, "1111");
        assert!(config.payment.nfc_enabled);
        assert!(!config.payment.no_payment_mode);
    }

    #[test]
    fn test_flag_parsing() {
        let store = MemoryStore::with_values([
            ("enableSmall", "false"),
            ("enableMedium", "yes"),
            ("noPaymentMode", "true"),
            ("stopWorkMode", "TRUE"),
        ]);
        let config = KioskConfig::load(&store);
        assert!(!config.portions.get(PortionSize::Small).enabled);
        assert!(config.portions.get(PortionSize::Medium).enabled);
        assert!(config.payment.no_payment_mode);
        assert!(!config.stop_work_mode);
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let store = MemoryStore::with_values([
            ("priceSmall", "abc"),
            ("priceMedium", "-1"),
            ("priceLarge", "0"),
            ("amountSmall", "0"),
            ("language", "fr"),
        ]);
        let config = KioskConfig::load(&store);
        assert_eq!(config.portions.get(PortionSize::Small).price, 2.5);
        assert_eq!(config.portions.get(PortionSize::Medium).price, 3.0);
        assert_eq!(config.portions.get(PortionSize::Large).price, 0.0);
        assert_eq!(config.portions.get(PortionSize::Small).volume_ml, 30);
        assert_eq!(config.language, Language::En);
    }

    #[test]
    fn test_all_disabled_in_store_is_repaired() {
        let store = MemoryStore::with_values([
            ("enableSmall", "false"),
            ("enableMedium", "false"),
            ("enableLarge", "false"),
        ]);
        let config = KioskConfig::load(&store);
        assert_eq!(config.portions.enabled_count(), 3);
    }

    #[test]
    fn test_interface_settings_save_and_reload() {
        let mut store = MemoryStore::new();
        let mut settings = KioskConfig::default().interface_settings();
        settings.branding.name = "House Blend".to_string();
        settings.portions.set_price(PortionSize::Large, 4.25).unwrap();
        settings.portions.set_enabled(PortionSize::Small, false).unwrap();
        settings.save(&mut store).unwrap();

        let config = KioskConfig::load(&store);
        assert_eq!(config.branding.name, "House Blend");
        assert_eq!(config.portions.get(PortionSize::Large).price, 4.25);
        assert!(!config.portions.get(PortionSize::Small).enabled);
    }

    #[test]
    fn test_failed_save_applies_nothing() {
        let path = std::env::temp_dir()
            .join(format!("kiosk-config-missing-{}", std::process::id()))
            .join("settings.json");
        let mut store = FileStore::open(&path).unwrap();
        let mut settings = KioskConfig::default().interface_settings();
        settings.branding.name = "House Blend".to_string();
        settings.portions.set_price(PortionSize::Medium, 9.0).unwrap();

        assert!(settings.save(&mut store).is_err());
        assert_eq!(KioskConfig::load(&store), KioskConfig::default());
    }
}
