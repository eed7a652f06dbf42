//! Payment initiation against the M-Pesa STK Push gateway
//!
//! - **gateway**: the [`PaymentGateway`] seam and the Daraja HTTP client
//! - **initiator**: order-side initiation flow (validation, correlation,
//!   `unpaid -> pending` transition, ledger entry)

pub mod gateway;
pub mod initiator;

pub use gateway::{
    DarajaClient, GatewayError, MpesaConfig, MpesaEnvironment, PaymentGateway, StkPushAcceptance,
    StkPushRequest,
};
pub use initiator::PaymentInitiator;
