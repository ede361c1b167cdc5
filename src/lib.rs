//! Payment-gated HTTP service speaking the x402 protocol.
//!
//! `tollgate` puts HTTP routes behind stablecoin micropayments. An unpaid
//! request to a gated route gets HTTP 402 with a machine-readable challenge:
//! how much USDC to send, to which address, on which chains. The client pays
//! on-chain, retries with the transaction hash in a header, and is admitted
//! once the transaction's receipt shows a qualifying transfer. Every
//! transaction buys exactly one admission; replays are tracked and refused.
//!
//! The crate splits along those seams:
//!
//! - [`chains`]: which networks are payable and which the auditor recognizes
//! - [`verifier`]: receipt-based on-chain verification over JSON-RPC
//! - [`replay`]: at-most-once consumption of payment proofs
//! - [`gate`]: the tower layer tying the above into a 402 state machine
//! - [`auditor`]: compliance grading of third-party x402 endpoints
//! - [`handlers`], [`config`], [`sig_down`]: the service shell

pub mod activity;
pub mod auditor;
pub mod chains;
pub mod config;
pub mod gate;
pub mod handlers;
pub mod replay;
pub mod sig_down;
pub mod types;
pub mod verifier;
