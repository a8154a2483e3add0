pub mod trading_loop;

pub use trading_loop::TradingLoop;
