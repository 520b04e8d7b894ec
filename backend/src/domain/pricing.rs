//! Storage pricing.
//!
//! Cost is `size × months × tier price`, rounded up to the next micro-credit.
//! The calculator is advisory only; it never touches the ledger.

use super::ports::{ContentStore, ContentStoreError};
use super::{ContentHash, Credits, Tier};

/// Bytes in one GiB, the unit prices are quoted against.
pub const BYTES_PER_GIB: u64 = 1 << 30;

/// Price per GiB-month for each tier, in micro-credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceTable {
    pub free: Credits,
    pub partner: Credits,
    pub light: Credits,
    pub plus: Credits,
}

impl PriceTable {
    /// Price per GiB-month for `tier`.
    pub fn price_for(&self, tier: Tier) -> Credits {
        match tier {
            Tier::Free => self.free,
            Tier::Partner => self.partner,
            Tier::Light => self.light,
            Tier::Plus => self.plus,
        }
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        Self {
            free: Credits::from_small_micros(100_000),
            partner: Credits::from_small_micros(50_000),
            light: Credits::from_small_micros(75_000),
            plus: Credits::from_small_micros(75_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PricingError {
    #[error("hold time must be between 1 and {max} months, got {requested}")]
    InvalidDuration { requested: u32, max: u32 },
    #[error("content size could not be determined: {0}")]
    SizeLookup(#[from] ContentStoreError),
    #[error("cost exceeds the ledger range")]
    Overflow,
}

/// Pure cost function parameterised by a price table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostCalculator {
    prices: PriceTable,
    max_total_months: u32,
}

/// A price together with the size it was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub size_bytes: u64,
    pub cost: Credits,
}

impl CostCalculator {
    /// Create a calculator; `max_total_months` bounds the billable hold.
    pub fn new(prices: PriceTable, max_total_months: u32) -> Self {
        Self {
            prices,
            max_total_months,
        }
    }

    /// Cost of holding `size_bytes` for `months` at `tier` prices.
    ///
    /// # Examples
    /// ```
    /// use pinledger::domain::{CostCalculator, Credits, PriceTable, Tier, BYTES_PER_GIB};
    ///
    /// let calculator = CostCalculator::new(PriceTable::default(), 24);
    /// let cost = calculator.cost(Tier::Light, BYTES_PER_GIB, 2).expect("valid input");
    /// assert_eq!(cost, Credits::from_micros(150_000).expect("non-negative"));
    /// ```
    pub fn cost(&self, tier: Tier, size_bytes: u64, months: u32) -> Result<Credits, PricingError> {
        if months == 0 || months > self.max_total_months {
            return Err(PricingError::InvalidDuration {
                requested: months,
                max: self.max_total_months,
            });
        }

        let price = u128::try_from(self.prices.price_for(tier).as_micros())
            .map_err(|_| PricingError::Overflow)?;
        let numerator = u128::from(size_bytes)
            .checked_mul(u128::from(months))
            .and_then(|value| value.checked_mul(price))
            .ok_or(PricingError::Overflow)?;
        let micros = numerator.div_ceil(u128::from(BYTES_PER_GIB));
        let micros = i64::try_from(micros).map_err(|_| PricingError::Overflow)?;
        Credits::from_micros(micros).map_err(|_| PricingError::Overflow)
    }

    /// Stat `hash` through the storage engine and price the reported size.
    pub async fn quote_content(
        &self,
        store: &dyn ContentStore,
        tier: Tier,
        hash: &ContentHash,
        months: u32,
    ) -> Result<Quote, PricingError> {
        let stat = store.stat(hash).await?;
        let cost = self.cost(tier, stat.cumulative_size, months)?;
        Ok(Quote {
            size_bytes: stat.cumulative_size,
            cost,
        })
    }
}
