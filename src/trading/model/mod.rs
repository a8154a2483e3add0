pub mod bot_state;
pub mod equity;
pub mod order;
pub mod position;
pub mod store;
pub mod trade_record;

pub use equity::EquitySnapshot;
pub use order::{FillEntity, OrderEntity, OrderStatus};
pub use position::{cost_basis, PositionEntity, PositionStatus};
pub use store::Store;
pub use trade_record::{TradeRecord, TradeStatistics};
