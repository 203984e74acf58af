//! Advisory buy/sell quotes. The escrow contract does its own accounting;
//! these figures are what the user is shown before submitting.

use crate::config::ExchangeSettings;
use crate::errors::ClientError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "UGX")]
    Ugx,
    #[serde(rename = "KES")]
    Kes,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::Usd, Currency::Ugx, Currency::Kes];

    /// The `currencyType` code the escrow contract uses.
    pub fn code(&self) -> u8 {
        match self {
            Currency::Usd => 0,
            Currency::Ugx => 1,
            Currency::Kes => 2,
        }
    }

    /// Unknown codes render as KES, matching how the contract's UI labels them.
    pub fn from_code(code: u64) -> Currency {
        match code {
            0 => Currency::Usd,
            1 => Currency::Ugx,
            _ => Currency::Kes,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Ugx => "UGX",
            Currency::Kes => "KES",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Currency {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "UGX" => Ok(Currency::Ugx),
            "KES" => Ok(Currency::Kes),
            other => Err(ClientError::Validation(format!("Unsupported currency: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyQuote {
    pub fiat_amount: Decimal,
    pub currency: Currency,
    pub usd_equivalent: Decimal,
    pub token_amount: Decimal,
    pub fee: Decimal,
    pub tokens_received: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellQuote {
    pub token_amount: Decimal,
    pub currency: Currency,
    pub usd_equivalent: Decimal,
    /// Fee in USD.
    pub fee: Decimal,
    pub fiat_received: Decimal,
}

#[derive(Debug, Clone)]
pub struct QuoteEngine {
    settings: ExchangeSettings,
}

impl QuoteEngine {
    pub fn new(settings: ExchangeSettings) -> Self {
        Self { settings }
    }

    pub fn rate(&self, currency: Currency) -> Result<Decimal, ClientError> {
        self.settings
            .rates
            .get(&currency)
            .copied()
            .filter(|r| !r.is_zero())
            .ok_or_else(|| ClientError::Validation(format!("No exchange rate configured for {}", currency)))
    }

    fn fee_fraction(&self) -> Decimal {
        self.settings.fee_percent / Decimal::ONE_HUNDRED
    }

    /// Fiat in, tokens out. Returns `None` for non-positive amounts.
    pub fn buy(&self, fiat_amount: Decimal, currency: Currency) -> Result<Option<BuyQuote>, ClientError> {
        if fiat_amount <= Decimal::ZERO {
            return Ok(None);
        }
        if self.settings.token_price_usd.is_zero() {
            return Err(ClientError::Validation("Token price must be positive".to_string()));
        }
        let usd_equivalent = fiat_amount / self.rate(currency)?;
        let token_amount = usd_equivalent / self.settings.token_price_usd;
        let fee = token_amount * self.fee_fraction();
        Ok(Some(BuyQuote {
            fiat_amount,
            currency,
            usd_equivalent,
            token_amount,
            fee,
            tokens_received: token_amount - fee,
        }))
    }

    /// Tokens in, fiat out. Returns `None` for non-positive amounts.
    pub fn sell(&self, token_amount: Decimal, currency: Currency) -> Result<Option<SellQuote>, ClientError> {
        if token_amount <= Decimal::ZERO {
            return Ok(None);
        }
        let usd_equivalent = token_amount * self.settings.token_price_usd;
        let fee = usd_equivalent * self.fee_fraction();
        let fiat_received = (usd_equivalent - fee) * self.rate(currency)?;
        Ok(Some(SellQuote {
            token_amount,
            currency,
            usd_equivalent,
            fee,
            fiat_received,
        }))
    }
}
