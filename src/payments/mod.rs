//! Payment domain: the state machine, gateway port and the Chapa adapter.

pub mod error;
pub mod provider;
pub mod providers;
pub mod reference;
pub mod state;
pub mod types;
pub mod utils;

pub use error::{GatewayError, GatewayResult};
pub use provider::PaymentGateway;
pub use providers::chapa::{ChapaConfig, ChapaGateway};
pub use state::{decide, PaymentSignal, PaymentStatus, SignalOutcome, SignalSource, Transition};
