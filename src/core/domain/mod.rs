//! Pure domain types.
//!
//! This is the leaf data module: nothing here reaches outward to adapters or
//! services, so the calculator, the replication engine and the adapters can
//! all depend on it without cycles.
//!
//! - [`Symbol`] - canonical `BASE/QUOTE` trading symbol
//! - [`Position`] / [`PositionSide`] - standardized position snapshot
//! - [`Order`] / [`OrderSide`] / [`OrderType`] / [`OrderStatus`] - standardized order
//! - [`Command`] / [`CommandDetails`] / [`MarginMode`] - leader command schema
//! - [`AccountDescriptor`] / [`ApiCredentials`] - account identity
//! - [`LeaderEvent`] - replication handoff sum type

mod account;
mod command;
mod event;
mod order;
mod position;
mod symbol;

pub use account::{AccountDescriptor, ApiCredentials, LEADER_USER_ID};
pub use command::{Command, CommandDetails, MarginMode, OpenArgs, ScaleInArgs, ScaleOutArgs};
pub use event::LeaderEvent;
pub use order::{Order, OrderSide, OrderStatus, OrderType};
pub use position::{Position, PositionSide};
pub use symbol::Symbol;
