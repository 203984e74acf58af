//! Fiat on/off-ramp through the Buy/Sell escrow contract.

pub mod admin;
pub mod feed;
pub mod panel;
pub mod quote;
pub mod requests;

pub use admin::AdminPanel;
pub use feed::{RequestFeed, RequestList, RequestSource};
pub use panel::{ExchangePanel, SubmittedRequest};
pub use quote::{BuyQuote, Currency, QuoteEngine, SellQuote};
pub use requests::{ExchangeRequest, RequestKind, RequestStatus};
