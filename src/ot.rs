//! 1-out-of-2 oblivious transfer based on the discrete logarithm problem (cf. Nigel Smart,
//! "Cryptography Made Simple", section on oblivious transfer).
//!
//! The sender holds two messages `(m0, m1)` of equal length, the receiver a choice bit `b`. After
//! the transfer the receiver knows `m_b` and nothing about `m_(1-b)`, while the sender learns
//! nothing about `b`:
//!
//! 1. The sender generates a fresh [`Group`] and waits for the receiver to acknowledge it.
//! 2. The sender sends `c = g^x`; the receiver picks `x'`, computes `h = (g^x', c / g^x')` and
//!    answers with `h_b`. Both components are uniformly distributed group elements.
//! 3. The sender sets `h0 = h_b`, `h1 = c / h0`, picks `k` and sends `c1 = g^k` together with
//!    `e0 = m0 ^ KDF(h0^k)` and `e1 = m1 ^ KDF(h1^k)`.
//! 4. The receiver knows the discrete log of exactly one of `h0`, `h1` and unmasks
//!    `m_b = e_b ^ KDF(c1^x')`.
//!
//! A fresh group is generated for every single transfer. In [`OtMode::Bypass`] the messages are
//! sent in the clear instead, which is only meant for debugging circuits.

use num_bigint::BigUint;
use rand::{CryptoRng, Rng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    channel::{self, Channel},
    group::{self, DEFAULT_MAX_PRIME_BITS, DEFAULT_PRIME_BITS, Group},
};

/// Whether wire keys are transferred obliviously or in the clear.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OtMode {
    /// Run the oblivious transfer protocol.
    #[default]
    Enabled,
    /// Send both messages in the clear and let the receiver select locally. Insecure!
    Bypass,
}

/// Errors raised during an oblivious transfer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The two messages offered by the sender differ in length.
    #[error("messages must have equal length, got {0} and {1} bytes")]
    LengthMismatch(usize, usize),
    /// A message could not be sent or received.
    #[error(transparent)]
    Channel(#[from] channel::Error),
    /// The group parameters are invalid.
    #[error("invalid group: {0}")]
    InvalidGroup(#[from] group::Error),
    /// The sender's group prime is larger than the receiver accepts.
    #[error("group prime has {bits} bits, at most {max} are accepted")]
    GroupTooLarge {
        /// The size of the received prime.
        bits: u64,
        /// The configured maximum.
        max: u64,
    },
    /// A received value is not an element of the group.
    #[error("received value is not an element of the group")]
    InvalidElement,
    /// The other party sent a message of the wrong kind.
    #[error("expected {expected}, but received {found}")]
    UnexpectedMessage {
        /// The message expected at this point of the protocol.
        expected: &'static str,
        /// The message that arrived instead.
        found: &'static str,
    },
}

/// The messages exchanged during a single transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OtMsg {
    /// The fresh group, sent by the sender.
    Group(Group),
    /// The receiver accepted the group.
    GroupAck,
    /// `c = g^x`, sent by the sender.
    Challenge(BigUint),
    /// `h_b`, sent by the receiver.
    Selection(BigUint),
    /// The masked messages, sent by the sender.
    Ciphertexts {
        /// `g^k`
        c1: BigUint,
        /// `m0 ^ KDF(h0^k)`
        e0: Vec<u8>,
        /// `m1 ^ KDF(h1^k)`
        e1: Vec<u8>,
    },
    /// Both messages in the clear ([`OtMode::Bypass`] only).
    Clear {
        /// The message for choice 0.
        m0: Vec<u8>,
        /// The message for choice 1.
        m1: Vec<u8>,
    },
}

impl OtMsg {
    fn kind(&self) -> &'static str {
        match self {
            OtMsg::Group(_) => "group",
            OtMsg::GroupAck => "group acknowledgment",
            OtMsg::Challenge(_) => "challenge",
            OtMsg::Selection(_) => "selection",
            OtMsg::Ciphertexts { .. } => "ciphertexts",
            OtMsg::Clear { .. } => "clear messages",
        }
    }
}

fn unexpected(expected: &'static str, found: &OtMsg) -> Error {
    Error::UnexpectedMessage {
        expected,
        found: found.kind(),
    }
}

/// Derives exactly `len` pseudorandom bytes from a group element, using BLAKE3 as an extendable
/// output function over the element's big-endian encoding.
pub fn kdf(element: &BigUint, len: usize) -> Vec<u8> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&element.to_bytes_be());
    let mut bytes = vec![0; len];
    hasher.finalize_xof().fill(&mut bytes);
    bytes
}

fn xor(msg: &[u8], pad: &[u8]) -> Vec<u8> {
    msg.iter().zip(pad).map(|(m, p)| m ^ p).collect()
}

/// Sender state of a single transfer.
pub(crate) struct SenderSession {
    group: Group,
    c: BigUint,
}

impl SenderSession {
    pub(crate) fn new<R: CryptoRng + Rng>(group: Group, rng: &mut R) -> Self {
        let x = group.random_exponent(rng);
        let c = group.generator_power(&x);
        Self { group, c }
    }

    /// Masks both messages given the receiver's selection `h0`, returns `(c1, e0, e1)`.
    pub(crate) fn encrypt<R: CryptoRng + Rng>(
        &self,
        h0: &BigUint,
        m0: &[u8],
        m1: &[u8],
        rng: &mut R,
    ) -> Result<(BigUint, Vec<u8>, Vec<u8>), Error> {
        let group = &self.group;
        if !group.contains(h0) {
            return Err(Error::InvalidElement);
        }
        let h1 = group.multiply(&self.c, &group.inverse(h0));
        let k = group.random_exponent(rng);
        let c1 = group.generator_power(&k);
        let e0 = xor(m0, &kdf(&group.power(h0, &k), m0.len()));
        let e1 = xor(m1, &kdf(&group.power(&h1, &k), m1.len()));
        Ok((c1, e0, e1))
    }
}

/// Receiver state of a single transfer.
pub(crate) struct ReceiverSession {
    group: Group,
    x: BigUint,
    choice: bool,
}

impl ReceiverSession {
    /// Answers the sender's challenge `c`, returns the session and the selection `h_b`.
    pub(crate) fn new<R: CryptoRng + Rng>(
        group: Group,
        c: &BigUint,
        choice: bool,
        rng: &mut R,
    ) -> Result<(Self, BigUint), Error> {
        if !group.contains(c) {
            return Err(Error::InvalidElement);
        }
        let x = group.random_exponent(rng);
        let x_pow = group.generator_power(&x);
        let selection = if choice {
            group.multiply(c, &group.inverse(&x_pow))
        } else {
            x_pow
        };
        Ok((Self { group, x, choice }, selection))
    }

    /// Unmasks the chosen message.
    pub(crate) fn decrypt(&self, c1: &BigUint, e0: &[u8], e1: &[u8]) -> Result<Vec<u8>, Error> {
        if !self.group.contains(c1) {
            return Err(Error::InvalidElement);
        }
        if e0.len() != e1.len() {
            return Err(Error::LengthMismatch(e0.len(), e1.len()));
        }
        let e = if self.choice { e1 } else { e0 };
        Ok(xor(e, &kdf(&self.group.power(c1, &self.x), e.len())))
    }
}

/// The oblivious transfer engine. The same engine plays the sender ([`ObliviousTransfer::offer`])
/// and the receiver ([`ObliviousTransfer::choose`]) role.
#[derive(Debug, Clone)]
pub struct ObliviousTransfer {
    mode: OtMode,
    prime_bits: u64,
    max_prime_bits: u64,
}

impl Default for ObliviousTransfer {
    fn default() -> Self {
        Self::new(OtMode::Enabled, DEFAULT_PRIME_BITS)
    }
}

impl ObliviousTransfer {
    /// Creates an engine; `prime_bits` is the size of the groups generated as a sender.
    ///
    /// As a receiver, the engine accepts primes of up to [`DEFAULT_MAX_PRIME_BITS`] bits.
    pub fn new(mode: OtMode, prime_bits: u64) -> Self {
        if mode == OtMode::Bypass {
            warn!("oblivious transfer is disabled, wire keys will be sent in the clear");
        }
        Self {
            mode,
            prime_bits,
            max_prime_bits: DEFAULT_MAX_PRIME_BITS,
        }
    }

    /// Sets the size of the largest prime accepted from a sender.
    pub fn with_max_prime_bits(mut self, max_prime_bits: u64) -> Self {
        self.max_prime_bits = max_prime_bits;
        self
    }

    /// Whether the engine runs the real protocol.
    pub fn mode(&self) -> OtMode {
        self.mode
    }

    /// Sender role: offers `m0` and `m1`, exactly one of which the receiver will learn.
    pub async fn offer<C: Channel, R: CryptoRng + Rng>(
        &self,
        channel: &mut C,
        rng: &mut R,
        m0: &[u8],
        m1: &[u8],
    ) -> Result<(), Error> {
        if m0.len() != m1.len() {
            return Err(Error::LengthMismatch(m0.len(), m1.len()));
        }
        if self.mode == OtMode::Bypass {
            let msg = OtMsg::Clear {
                m0: m0.to_vec(),
                m1: m1.to_vec(),
            };
            channel::send(channel, "OT clear messages", &msg).await?;
            return Ok(());
        }

        debug!("OT sender started");
        let group = Group::generate(self.prime_bits, rng)?;
        let reply: OtMsg =
            channel::send_and_wait(channel, "OT group", &OtMsg::Group(group.clone())).await?;
        match reply {
            OtMsg::GroupAck => {}
            other => return Err(unexpected("group acknowledgment", &other)),
        }

        let session = SenderSession::new(group, rng);
        let challenge = OtMsg::Challenge(session.c.clone());
        let reply: OtMsg = channel::send_and_wait(channel, "OT challenge", &challenge).await?;
        let h0 = match reply {
            OtMsg::Selection(h0) => h0,
            other => return Err(unexpected("selection", &other)),
        };
        let (c1, e0, e1) = session.encrypt(&h0, m0, m1, rng)?;
        channel::send(channel, "OT ciphertexts", &OtMsg::Ciphertexts { c1, e0, e1 }).await?;
        debug!("OT sender finished");
        Ok(())
    }

    /// Receiver role: obtains the message selected by `choice` without revealing `choice`.
    pub async fn choose<C: Channel, R: CryptoRng + Rng>(
        &self,
        channel: &mut C,
        rng: &mut R,
        choice: bool,
    ) -> Result<Vec<u8>, Error> {
        if self.mode == OtMode::Bypass {
            let msg: OtMsg = channel::recv(channel, "OT clear messages").await?;
            return match msg {
                OtMsg::Clear { m0, m1 } if m0.len() == m1.len() => {
                    Ok(if choice { m1 } else { m0 })
                }
                OtMsg::Clear { m0, m1 } => Err(Error::LengthMismatch(m0.len(), m1.len())),
                other => Err(unexpected("clear messages", &other)),
            };
        }

        debug!("OT receiver started");
        let msg: OtMsg = channel::recv(channel, "OT group").await?;
        let group = match msg {
            OtMsg::Group(group) => group,
            other => return Err(unexpected("group", &other)),
        };
        let bits = group.prime().bits();
        if bits > self.max_prime_bits {
            return Err(Error::GroupTooLarge {
                bits,
                max: self.max_prime_bits,
            });
        }
        group.validate(rng)?;
        channel::send(channel, "OT group", &OtMsg::GroupAck).await?;

        let msg: OtMsg = channel::recv(channel, "OT challenge").await?;
        let c = match msg {
            OtMsg::Challenge(c) => c,
            other => return Err(unexpected("challenge", &other)),
        };
        let (session, selection) = ReceiverSession::new(group, &c, choice, rng)?;
        let reply: OtMsg =
            channel::send_and_wait(channel, "OT selection", &OtMsg::Selection(selection)).await?;
        let message = match reply {
            OtMsg::Ciphertexts { c1, e0, e1 } => session.decrypt(&c1, &e0, &e1)?,
            other => return Err(unexpected("ciphertexts", &other)),
        };
        debug!("OT receiver finished");
        Ok(message)
    }
}
