//! # Binance Integration Module
//!
//! - **`apicall`**: `BinanceApi`, a `RemoteApi` over the public spot REST
//!   endpoints. Batched fetches hit the all-symbols ticker endpoints, itemized
//!   ones add `?symbol=`, and the weight policy comes from `exchangeInfo`.

/// REST adapter implementing `RemoteApi`.
pub mod apicall;

pub use apicall::BinanceApi;
