//! `ExchangeAdapter` implementations consumed by `grid-bins`.

mod coinbase;
mod mock;

pub use coinbase::{stream_ticker, CoinbaseAdapter};
pub use mock::MockAdapter;
