//! Virtual portfolio: price book, trade ledger and reports.

pub mod ledger;
pub mod prices;
pub mod report;

pub use ledger::{BatchReport, PortfolioState, Valuation, VirtualPortfolio};
pub use prices::{PriceBook, PriceLookup, PriceMark};
pub use report::{DailyReport, PortfolioSummary};
