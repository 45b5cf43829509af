//! Yao's protocol between a garbler and an evaluator, with communication via channels.
//!
//! The garbler drives every exchange: it garbles a circuit, sends it to the evaluator together
//! with the keys for its own input bits and then serves the evaluator's key requests for the
//! evaluator's input wires through oblivious transfer. The evaluator evaluates the circuit,
//! discloses the result and finally checks it against both parties' local maxima.

use std::{collections::BTreeSet, future::Future, mem, ops::ControlFlow, pin::pin};

use rand::{CryptoRng, Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use tokio::runtime::Builder;
use tracing::{debug, info, warn};

use crate::{
    channel::{self, Channel, SimpleChannel},
    circuit::{self, Circuit},
    data::{self, PrivateData},
    data_types::{InputAssignment, OutputBits, Party, WireId, WireInput, from_bits},
    garble::{self, GarbledCircuit, GarbledTables},
    group::{DEFAULT_MAX_PRIME_BITS, DEFAULT_PRIME_BITS},
    ot::{self, ObliviousTransfer, OtMode},
    presentation::{self, PresentationMode},
    verification::{self, Verification, VerificationRecord},
};

/// A custom error type for the computation and communication of both roles.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A message could not be sent or received.
    #[error(transparent)]
    Channel(#[from] channel::Error),
    /// An oblivious transfer failed.
    #[error("oblivious transfer failed: {0}")]
    Ot(#[from] ot::Error),
    /// The circuit is malformed.
    #[error("invalid circuit: {0}")]
    Circuit(#[from] circuit::Error),
    /// The circuit could not be garbled or evaluated.
    #[error("garbling failed: {0}")]
    Garbling(#[from] garble::Error),
    /// The private data could not be used.
    #[error("invalid private data: {0}")]
    Data(#[from] data::Error),
    /// A wire input could not be (de-)serialized for an oblivious transfer.
    #[error("could not serialize wire input: {0}")]
    Serialization(String),
    /// The other party sent a message of the wrong kind.
    #[error("expected {expected}, but received {found}")]
    UnexpectedMessage {
        /// The message expected at this point of the protocol.
        expected: &'static str,
        /// The message that arrived instead.
        found: &'static str,
    },
    /// The evaluator asked for a wire that is not one of its inputs or that was already served.
    #[error("invalid key request for wire {0}")]
    InvalidKeyRequest(WireId),
    /// The evaluation result lacks an output wire.
    #[error("evaluation result lacks output wire {0}")]
    MissingOutput(WireId),
    /// The garbler's input wires do not match the configured bit width.
    #[error("circuit has {wires} garbler input wires, but the bit width is {bit_width}")]
    BitWidthMismatch {
        /// The configured bit width.
        bit_width: u32,
        /// The number of garbler input wires.
        wires: usize,
    },
    /// The evaluator rejected the exchange.
    #[error("exchange aborted by the evaluator: {0}")]
    Aborted(String),
    /// The async runtime could not be started.
    #[error("could not start the async runtime: {0}")]
    Runtime(String),
}

impl Error {
    /// Whether the channel is out of sync after the error, so that no further exchange is
    /// possible.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::Circuit(_)
                | Error::Garbling(_)
                | Error::Data(_)
                | Error::BitWidthMismatch { .. }
                | Error::Aborted(_)
        )
    }
}

/// Everything the evaluator needs to evaluate a garbled circuit, sent once per circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBundle {
    /// The plaintext circuit.
    pub circuit: Circuit,
    /// The garbled tables by gate.
    pub garbled_tables: GarbledTables,
    /// The permutation bits of the output wires.
    pub output_pbits: OutputBits,
    /// How the garbler presents the circuit.
    pub presentation: PresentationMode,
    /// The bit width of both parties' inputs.
    pub bit_width: u32,
    /// Whether the garbler runs oblivious transfers.
    pub oblivious_transfer: OtMode,
}

/// The messages exchanged between garbler and evaluator. Oblivious transfers use their own
/// [`ot::OtMsg`]s in between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Msg {
    /// Acknowledges a message that the evaluator received while waiting for the next one.
    Ack,
    /// A new circuit to evaluate.
    CircuitOffer(Box<CircuitBundle>),
    /// The keys of the garbler's input bits.
    GarblerInputs(InputAssignment),
    /// The evaluator requests the key of one of its input wires.
    KeyRequest(WireId),
    /// The clear output bits of the evaluation.
    EvaluationResult(OutputBits),
    /// The garbler's data for verification.
    VerificationRequest(VerificationRecord),
    /// Whether the disclosed result is correct.
    VerificationOutcome(bool),
    /// The evaluator rejects the current exchange.
    Abort(String),
    /// The garbler has no more circuits.
    Shutdown,
}

impl Msg {
    fn kind(&self) -> &'static str {
        match self {
            Msg::Ack => "acknowledgment",
            Msg::CircuitOffer(_) => "circuit offer",
            Msg::GarblerInputs(_) => "garbler inputs",
            Msg::KeyRequest(_) => "key request",
            Msg::EvaluationResult(_) => "evaluation result",
            Msg::VerificationRequest(_) => "verification request",
            Msg::VerificationOutcome(_) => "verification outcome",
            Msg::Abort(_) => "abort",
            Msg::Shutdown => "shutdown",
        }
    }
}

fn unexpected(expected: &'static str, found: &Msg) -> Error {
    Error::UnexpectedMessage {
        expected,
        found: found.kind(),
    }
}

fn expect_ack(msg: Msg) -> Result<(), Error> {
    match msg {
        Msg::Ack => Ok(()),
        Msg::Abort(reason) => Err(Error::Aborted(reason)),
        other => Err(unexpected("acknowledgment", &other)),
    }
}

/// Configuration of the garbler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GarblerOpts {
    /// The bit width of both parties' inputs.
    pub bit_width: u32,
    /// Whether wire keys are transferred obliviously.
    pub oblivious_transfer: OtMode,
    /// The size of the primes of the oblivious transfer groups.
    pub prime_bits: u64,
    /// How circuits are presented.
    pub presentation: PresentationMode,
}

impl Default for GarblerOpts {
    fn default() -> Self {
        Self {
            bit_width: 4,
            oblivious_transfer: OtMode::Enabled,
            prime_bits: DEFAULT_PRIME_BITS,
            presentation: PresentationMode::None,
        }
    }
}

/// Configuration of the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatorOpts {
    /// Whether wire keys are transferred obliviously; must match the garbler.
    pub oblivious_transfer: OtMode,
    /// The largest prime accepted in a garbler's oblivious transfer group, in bits.
    pub max_prime_bits: u64,
}

impl Default for EvaluatorOpts {
    fn default() -> Self {
        Self {
            oblivious_transfer: OtMode::Enabled,
            max_prime_bits: DEFAULT_MAX_PRIME_BITS,
        }
    }
}

/// The garbler's view of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeReport {
    /// The circuit that was run.
    pub circuit_id: String,
    /// The garbler's local maximum.
    pub local_max: u64,
    /// The disclosed result.
    pub result: u64,
    /// Whether the evaluator verified the result.
    pub verified: bool,
    /// The circuit rendered according to the presentation mode.
    pub presentation: String,
}

/// The evaluator's view of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatorReport {
    /// The circuit that was run.
    pub circuit_id: String,
    /// The evaluator's local maximum.
    pub local_max: u64,
    /// The disclosed result.
    pub result: u64,
    /// The outcome of the verification, if the garbler asked for one.
    pub verification: Option<Verification>,
}

/// The garbler role, driving the exchanges.
pub struct Garbler<C, R> {
    channel: C,
    rng: R,
    data: PrivateData,
    opts: GarblerOpts,
    ot: ObliviousTransfer,
}

impl<C: Channel, R: CryptoRng + Rng> Garbler<C, R> {
    /// Creates a garbler talking to the evaluator over `channel`.
    pub fn new(channel: C, rng: R, data: PrivateData, opts: GarblerOpts) -> Self {
        let ot = ObliviousTransfer::new(opts.oblivious_transfer, opts.prime_bits);
        Self {
            channel,
            rng,
            data,
            opts,
            ot,
        }
    }

    /// Returns the channel, e.g. to hand it to another garbler.
    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Runs all circuits strictly one after the other.
    ///
    /// An exchange that fails without breaking the channel (for example because the evaluator
    /// aborted it) is reported and the next circuit is run; any other error stops the run.
    pub async fn run_all(
        &mut self,
        circuits: &[Circuit],
    ) -> Result<Vec<Result<ExchangeReport, Error>>, Error> {
        let mut reports = Vec::with_capacity(circuits.len());
        for circuit in circuits {
            match self.run_exchange(circuit).await {
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(circuit = %circuit.id, "exchange failed: {e}");
                    reports.push(Err(e));
                }
                Ok(report) => reports.push(Ok(report)),
            }
        }
        Ok(reports)
    }

    /// Runs a single circuit: sends it, transfers the input keys, receives the result and has
    /// it verified.
    pub async fn run_exchange(&mut self, circuit: &Circuit) -> Result<ExchangeReport, Error> {
        let bit_width = self.opts.bit_width;
        if circuit.garbler_inputs.len() != bit_width as usize {
            return Err(Error::BitWidthMismatch {
                bit_width,
                wires: circuit.garbler_inputs.len(),
            });
        }
        let own_bits = self.data.max_bits(bit_width)?;
        let local_max = from_bits(own_bits.iter().copied());
        let garbled = GarbledCircuit::garble(circuit.clone(), &mut self.rng)?;
        let presentation = self.opts.presentation.render(&garbled)?;
        let own_inputs = garbled.assign(&circuit.garbler_inputs, &own_bits)?;

        debug!(circuit = %circuit.id, "sending circuit");
        let bundle = CircuitBundle {
            circuit: circuit.clone(),
            garbled_tables: garbled.tables().clone(),
            output_pbits: garbled.output_pbits(),
            presentation: self.opts.presentation,
            bit_width,
            oblivious_transfer: self.ot.mode(),
        };
        let offer = Msg::CircuitOffer(Box::new(bundle));
        expect_ack(channel::send_and_wait(&mut self.channel, "circuit offer", &offer).await?)?;
        channel::send(&mut self.channel, "garbler inputs", &Msg::GarblerInputs(own_inputs)).await?;

        let mut served = BTreeSet::new();
        let output_bits = loop {
            let msg: Msg = channel::recv(&mut self.channel, "key request").await?;
            match msg {
                Msg::KeyRequest(w) => {
                    if circuit.party_of(w) != Party::Evaluator || !served.insert(w) {
                        return Err(Error::InvalidKeyRequest(w));
                    }
                    let (zero, one) = garbled.input_pair(w).ok_or(Error::InvalidKeyRequest(w))?;
                    let m0 = serialize_input(&zero)?;
                    let m1 = serialize_input(&one)?;
                    debug!(wire = w, "transferring key");
                    self.ot.offer(&mut self.channel, &mut self.rng, &m0, &m1).await?;
                }
                Msg::EvaluationResult(bits) if served.len() == circuit.evaluator_inputs.len() => {
                    break bits;
                }
                Msg::Abort(reason) => return Err(Error::Aborted(reason)),
                other => return Err(unexpected("key request or evaluation result", &other)),
            }
        };
        let result = decode_output(circuit, &output_bits)?;
        info!(circuit = %circuit.id, result, "received result of the evaluation");

        let record = VerificationRecord {
            local_max,
            disclosed_result: result,
        };
        let request = Msg::VerificationRequest(record);
        expect_ack(channel::send_and_wait(&mut self.channel, "verification", &request).await?)?;
        let msg: Msg = channel::recv(&mut self.channel, "verification outcome").await?;
        let verified = match msg {
            Msg::VerificationOutcome(verified) => verified,
            Msg::Abort(reason) => return Err(Error::Aborted(reason)),
            other => return Err(unexpected("verification outcome", &other)),
        };
        if verified {
            info!(circuit = %circuit.id, "result verified by the evaluator");
        } else {
            warn!(circuit = %circuit.id, result, "evaluator could not verify the result");
        }
        Ok(ExchangeReport {
            circuit_id: circuit.id.clone(),
            local_max,
            result,
            verified,
            presentation,
        })
    }

    /// Tells the evaluator that no more circuits will follow and returns the channel.
    pub async fn shutdown(mut self) -> Result<C, Error> {
        expect_ack(channel::send_and_wait(&mut self.channel, "shutdown", &Msg::Shutdown).await?)?;
        Ok(self.channel)
    }
}

fn serialize_input(input: &WireInput) -> Result<Vec<u8>, Error> {
    bincode::serialize(input).map_err(|e| Error::Serialization(format!("{e:?}")))
}

fn decode_output(circuit: &Circuit, bits: &OutputBits) -> Result<u64, Error> {
    let bits = circuit
        .outputs
        .iter()
        .map(|w| bits.get(w).copied().ok_or(Error::MissingOutput(*w)))
        .collect::<Result<Vec<bool>, Error>>()?;
    Ok(from_bits(bits))
}

/// The evaluator role, serving the garbler's exchanges until it shuts down.
pub struct Evaluator<C, R> {
    channel: C,
    rng: R,
    data: PrivateData,
    opts: EvaluatorOpts,
    ot: ObliviousTransfer,
    reports: Vec<EvaluatorReport>,
}

impl<C: Channel, R: CryptoRng + Rng> Evaluator<C, R> {
    /// Creates an evaluator answering the garbler over `channel`.
    pub fn new(channel: C, rng: R, data: PrivateData, opts: EvaluatorOpts) -> Self {
        let ot = ObliviousTransfer::new(opts.oblivious_transfer, DEFAULT_PRIME_BITS)
            .with_max_prime_bits(opts.max_prime_bits);
        Self {
            channel,
            rng,
            data,
            opts,
            ot,
            reports: vec![],
        }
    }

    /// Returns the channel.
    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Serves messages until the garbler shuts down or `shutdown` completes, and returns the
    /// reports of all exchanges since the last call.
    ///
    /// Every message is acknowledged before it is handled. `shutdown` is only checked while
    /// waiting for the next message, never in the middle of an exchange.
    pub async fn serve(
        &mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<Vec<EvaluatorReport>, Error> {
        let mut shutdown = pin!(shutdown);
        info!("waiting for circuits");
        loop {
            let msg: Msg = tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("stopped listening");
                    break;
                }
                msg = channel::recv::<_, Msg>(&mut self.channel, "next message") => msg?,
            };
            channel::send(&mut self.channel, "acknowledgment", &Msg::Ack).await?;
            match self.handle_msg(msg).await? {
                ControlFlow::Continue(()) => {}
                ControlFlow::Break(()) => {
                    info!("garbler finished, stopped listening");
                    break;
                }
            }
        }
        Ok(mem::take(&mut self.reports))
    }

    async fn handle_msg(&mut self, msg: Msg) -> Result<ControlFlow<()>, Error> {
        match msg {
            Msg::CircuitOffer(bundle) => self.evaluate_offer(*bundle).await?,
            Msg::VerificationRequest(record) => self.verify(record).await?,
            Msg::Shutdown => return Ok(ControlFlow::Break(())),
            other => return Err(unexpected("circuit offer, verification or shutdown", &other)),
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Checks a bundle against the own configuration and returns the bits of the own local
    /// maximum.
    fn check_offer(
        &self,
        bundle: &CircuitBundle,
        garbler_inputs: &InputAssignment,
    ) -> Result<Vec<bool>, String> {
        let circuit = &bundle.circuit;
        if bundle.oblivious_transfer != self.opts.oblivious_transfer {
            return Err(format!(
                "oblivious transfer mode {:?} does not match the evaluator's mode {:?}",
                bundle.oblivious_transfer, self.opts.oblivious_transfer
            ));
        }
        circuit.validate().map_err(|e| e.to_string())?;
        let bit_width = bundle.bit_width;
        if circuit.evaluator_inputs.len() != bit_width as usize {
            return Err(format!(
                "circuit has {} evaluator input wires, but the bit width is {bit_width}",
                circuit.evaluator_inputs.len()
            ));
        }
        if !garbler_inputs.keys().eq(circuit.garbler_inputs.iter().collect::<BTreeSet<_>>()) {
            return Err("garbler inputs do not match the circuit's garbler wires".to_string());
        }
        self.data.max_bits(bit_width).map_err(|e| e.to_string())
    }

    async fn evaluate_offer(&mut self, bundle: CircuitBundle) -> Result<(), Error> {
        let circuit = &bundle.circuit;
        if bundle.presentation != PresentationMode::None {
            info!(
                "received {}",
                presentation::summary(
                    &circuit.id,
                    (&circuit.garbler_inputs, &circuit.evaluator_inputs),
                    circuit.gates.len()
                )
            );
        }
        let msg: Msg = channel::recv(&mut self.channel, "garbler inputs").await?;
        let garbler_inputs = match msg {
            Msg::GarblerInputs(inputs) => inputs,
            other => return Err(unexpected("garbler inputs", &other)),
        };
        let bits = match self.check_offer(&bundle, &garbler_inputs) {
            Ok(bits) => bits,
            Err(reason) => {
                warn!(circuit = %circuit.id, "aborting exchange: {reason}");
                return self.abort(reason).await;
            }
        };

        let local_max = from_bits(bits.iter().copied());
        let mut own_inputs = InputAssignment::new();
        for (&w, &bit) in circuit.evaluator_inputs.iter().zip(&bits) {
            channel::send(&mut self.channel, "key request", &Msg::KeyRequest(w)).await?;
            let bytes = self.ot.choose(&mut self.channel, &mut self.rng, bit).await?;
            let input = bincode::deserialize(&bytes)
                .map_err(|e| Error::Serialization(format!("{e:?}")))?;
            own_inputs.insert(w, input);
        }

        let evaluated = garble::evaluate(
            circuit,
            &bundle.garbled_tables,
            &bundle.output_pbits,
            &garbler_inputs,
            &own_inputs,
        )
        .map_err(Error::from)
        .and_then(|bits| Ok((decode_output(circuit, &bits)?, bits)));
        let (result, output_bits) = match evaluated {
            Ok(evaluated) => evaluated,
            Err(e) => {
                warn!(circuit = %circuit.id, "evaluation failed: {e}");
                return self.abort(e.to_string()).await;
            }
        };
        info!(circuit = %circuit.id, result, "evaluated circuit");
        channel::send(
            &mut self.channel,
            "evaluation result",
            &Msg::EvaluationResult(output_bits),
        )
        .await?;
        self.reports.push(EvaluatorReport {
            circuit_id: circuit.id.clone(),
            local_max,
            result,
            verification: None,
        });
        Ok(())
    }

    async fn verify(&mut self, record: VerificationRecord) -> Result<(), Error> {
        let Some(report) = self.reports.last_mut() else {
            return self.abort("no exchange to verify".to_string()).await;
        };
        let verification = verification::verify(&record, report.local_max);
        report.verification = Some(verification);
        let outcome = Msg::VerificationOutcome(verification.matches);
        channel::send(&mut self.channel, "verification outcome", &outcome).await?;
        Ok(())
    }

    async fn abort(&mut self, reason: String) -> Result<(), Error> {
        channel::send(&mut self.channel, "abort", &Msg::Abort(reason)).await?;
        Ok(())
    }
}

/// Simulates both roles within a single process, connected by in-memory channels.
///
/// Returns the garbler's result per circuit and the evaluator's reports.
pub fn simulate_exchange(
    circuits: &[Circuit],
    garbler_data: PrivateData,
    evaluator_data: PrivateData,
    garbler_opts: GarblerOpts,
    evaluator_opts: EvaluatorOpts,
) -> Result<(Vec<Result<ExchangeReport, Error>>, Vec<EvaluatorReport>), Error> {
    let tokio = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Runtime(e.to_string()))?;
    let (garbler_channel, evaluator_channel) = SimpleChannel::pair();
    tokio.block_on(async {
        let mut garbler = Garbler::new(
            garbler_channel,
            ChaCha20Rng::from_rng(&mut rand::rng()),
            garbler_data,
            garbler_opts,
        );
        let mut evaluator = Evaluator::new(
            evaluator_channel,
            ChaCha20Rng::from_rng(&mut rand::rng()),
            evaluator_data,
            evaluator_opts,
        );
        let garble = async {
            let reports = garbler.run_all(circuits).await?;
            garbler.shutdown().await?;
            Ok::<_, Error>(reports)
        };
        let evaluate = evaluator.serve(futures::future::pending());
        futures::future::try_join(garble, evaluate).await
    })
}
