pub mod relay;

pub use relay::OutboxRelay;
