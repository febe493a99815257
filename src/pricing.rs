//! Portion table and the pay-or-pour decision.

use crate::error::KioskError;
use crate::types::{PortionOption, PortionSize};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortionTable {
    options: [PortionOption; 3],
}

impl Default for PortionTable {
    fn default() -> Self {
        Self {
            options: [
                PortionOption {
                    size: PortionSize::Small,
                    enabled: true,
                    price: 2.50,
                    volume_ml: 30,
                },
                PortionOption {
                    size: PortionSize::Medium,
                    enabled: true,
                    price: 3.00,
                    volume_ml: 50,
                },
                PortionOption {
                    size: PortionSize::Large,
                    enabled: true,
                    price: 3.50,
                    volume_ml: 70,
                },
            ],
        }
    }
}

impl PortionTable {
    pub fn get(&self, size: PortionSize) -> &PortionOption {
        &self.options[size.index()]
    }

    pub fn options(&self) -> &[PortionOption] {
        &self.options
    }

    pub fn enabled(&self) -> impl Iterator<Item = &PortionOption> {
        self.options.iter().filter(|o| o.enabled)
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled().count()
    }

    /// Replaces an option wholesale. Used when loading, so it does not enforce
    /// the enabled invariant; call `repair` afterwards.
    pub(crate) fn set_option(&mut self, option: PortionOption) {
        self.options[option.size.index()] = option;
    }

    /// Rejects disabling the last enabled portion; the table is left untouched.
    pub fn set_enabled(&mut self, size: PortionSize, enabled: bool) -> Result<(), KioskError> {
        let option = &self.options[size.index()];
        if !enabled && option.enabled && self.enabled_count() == 1 {
            return Err(KioskError::LastPortionDisabled);
        }
        self.options[size.index()].enabled = enabled;
        Ok(())
    }

    pub fn set_price(&mut self, size: PortionSize, price: f64) -> Result<(), KioskError> {
        if !price.is_finite() || price < 0.0 {
            return Err(KioskError::InvalidPrice(size));
        }
        self.options[size.index()].price = price;
        Ok(())
    }

    pub fn set_volume(&mut self, size: PortionSize, volume_ml: u32) -> Result<(), KioskError> {
        if volume_ml == 0 {
            return Err(KioskError::InvalidVolume(size));
        }
        self.options[size.index()].volume_ml = volume_ml;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), KioskError> {
        for option in &self.options {
            if !option.price.is_finite() || option.price < 0.0 {
                return Err(KioskError::InvalidPrice(option.size));
            }
            if option.volume_ml == 0 {
                return Err(KioskError::InvalidVolume(option.size));
            }
        }
        if self.enabled_count() == 0 {
            return Err(KioskError::LastPortionDisabled);
        }
        Ok(())
    }

    /// Re-enables every portion if a hand-edited store disabled all of them.
    /// Returns true when a repair was needed.
    pub fn repair(&mut self) -> bool {
        if self.enabled_count() > 0 {
            return false;
        }
        for option in self.options.iter_mut() {
            option.enabled = true;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Resolution {
    pub needs_payment: bool,
    pub price: f64,
    pub volume_ml: u32,
}

/// A price of exactly zero is free whatever the payment mode.
pub fn resolve(portion: PortionSize, table: &PortionTable, no_payment_mode: bool) -> Resolution {
    let option = table.get(portion);
    Resolution {
        needs_payment: option.price > 0.0 && !no_payment_mode,
        price: option.price,
        volume_ml: option.volume_ml,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_price(size: PortionSize, price: f64) -> PortionTable {
        let mut table = PortionTable::default();
        table.set_price(size, price).unwrap();
        table
    }

    #[test]
    fn test_resolve_truth_table() {
        let free = table_with_price(PortionSize::Medium, 0.0);
        assert!(!resolve(PortionSize::Medium, &free, false).needs_payment);
        assert!(!resolve(PortionSize::Medium, &free, true).needs_payment);

        let paid = table_with_price(PortionSize::Medium, 3.0);
        assert!(!resolve(PortionSize::Medium, &paid, true).needs_payment);

        let resolution = resolve(PortionSize::Medium, &paid, false);
        assert!(resolution.needs_payment);
        assert_eq!(resolution.price, 3.0);
        assert_eq!(resolution.volume_ml, 50);
    }

    #[test]
    fn test_last_enabled_portion_cannot_be_disabled() {
        for keep in PortionSize::ALL {
            let mut table = PortionTable::default();
            for size in PortionSize::ALL.into_iter().filter(|s| *s != keep) {
                table.set_enabled(size, false).unwrap();
            }
            let before = table.clone();

            let result = table.set_enabled(keep, false);
            assert!(matches!(result, Err(KioskError::LastPortionDisabled)));
            assert_eq!(table, before);
            assert_eq!(table.enabled_count(), 1);
        }
    }

    #[test]
    fn test_disabling_already_disabled_portion_is_allowed() {
        let mut table = PortionTable::default();
        table.set_enabled(PortionSize::Small, false).unwrap();
        table.set_enabled(PortionSize::Medium, false).unwrap();
        assert!(table.set_enabled(PortionSize::Small, false).is_ok());
        assert_eq!(table.enabled_count(), 1);
    }

    #[test]
    fn test_rejects_negative_price_and_zero_volume() {
        let mut table = PortionTable::default();
        assert!(matches!(
            table.set_price(PortionSize::Small, -0.5),
            Err(KioskError::InvalidPrice(PortionSize::Small))
        ));
        assert!(matches!(
            table.set_price(PortionSize::Small, f64::NAN),
            Err(KioskError::InvalidPrice(_))
        ));
        assert!(matches!(
            table.set_volume(PortionSize::Large, 0),
            Err(KioskError::InvalidVolume(PortionSize::Large))
        ));
        assert_eq!(table, PortionTable::default());
    }

    #[test]
    fn test_repair_when_all_disabled() {
        let mut table = PortionTable::default();
        for size in PortionSize::ALL {
            table.set_option(PortionOption {
                enabled: false,
                ..*table.get(size)
            });
        }
        assert!(table.validate().is_err());
        assert!(table.repair());
        assert_eq!(table.enabled_count(), 3);
        assert!(!table.repair());
    }
}
