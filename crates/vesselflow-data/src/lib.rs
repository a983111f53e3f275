pub mod loader;
pub mod schema;

pub use loader::{DataLoadError, ExchangeData, load_exchange_data};
