//! Query translation: filter model, view planning and in-process reconciliation.

pub mod filter;
pub mod planner;
pub mod reconcile;
mod value;

pub use filter::{Condition, Direction, Filter, Order, OrderTerm, Where};
pub use planner::{plan, Plan, ViewPlan};
pub use reconcile::reconcile;
pub use value::{compare_values, is_truthy, values_equal};
