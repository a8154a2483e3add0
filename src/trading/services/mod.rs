pub mod convert_service;
pub mod order_service;
pub mod position_monitor;
pub mod reconciler;
pub mod risk_service;
pub mod scanner;

pub use order_service::{EntryOutcome, ExitReason, OrderService};
pub use position_monitor::PositionMonitor;
pub use reconciler::Reconciler;
pub use risk_service::{DrawdownState, PositionExposure, RiskService};
pub use scanner::{Opportunity, Scanner};
