pub mod history_fetcher;
pub mod order_fetcher;
pub mod price_augmenter;

pub use history_fetcher::HistoryFetcher;
pub use order_fetcher::{FetchTelemetry, OrderFetcher};
pub use price_augmenter::PriceAugmenter;
