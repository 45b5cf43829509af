//! Secure two-party computation of the maximum of two private integers, using Yao's garbled
//! circuits and oblivious transfer based on the discrete logarithm problem.
//!
//! Two parties, the *garbler* and the *evaluator*, each hold a list of integers. Together they
//! compute the maximum of both lists without revealing anything else about their inputs: the
//! garbler garbles a boolean circuit for the maximum and sends it to the evaluator together with
//! the keys of its own input bits, the evaluator obtains the keys of its own input bits through
//! 1-out-of-2 oblivious transfers and evaluates the circuit. The disclosed result is then verified
//! against both local maxima.
//!
//! ## Main Components
//!
//! * [`protocol`]: The [`protocol::Garbler`] and [`protocol::Evaluator`] roles.
//! * [`ot`]: The oblivious transfer engine, built on the groups in [`group`].
//! * [`circuit`] and [`garble`]: Boolean circuits and their garbling.
//! * [`channel`]: Communication abstractions for exchanging data between the parties.
//! * [`data`], [`verification`] and [`presentation`]: Preparing inputs, checking the result and
//!   rendering circuits.
//!
//! ## Example
//!
//! For simulated environments (testing/development), both roles can be run within one process:
//!
//! ```
//! use yao_max::{
//!     circuit::Circuit,
//!     data::PrivateData,
//!     protocol::{EvaluatorOpts, GarblerOpts, simulate_exchange},
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let circuits = [Circuit::maximum(4)?];
//! let (garbler, evaluator) = simulate_exchange(
//!     &circuits,
//!     PrivateData::parse("5")?,
//!     PrivateData::parse("3 9 2")?,
//!     GarblerOpts::default(),
//!     EvaluatorOpts::default(),
//! )?;
//! let report = garbler[0].as_ref().map_err(|e| e.to_string())?;
//! assert_eq!(report.result, 9);
//! assert!(report.verified);
//! assert_eq!(evaluator[0].result, 9);
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Properties
//!
//! The protocol is secure against semi-honest adversaries only. Oblivious transfer can be
//! disabled for debugging, in which case the evaluator learns both keys of its input wires.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod channel;
pub mod circuit;
pub mod data;
pub mod data_types;
pub mod garble;
pub mod group;
pub mod ot;
pub mod presentation;
pub mod protocol;
pub mod verification;

pub use protocol::Error;
