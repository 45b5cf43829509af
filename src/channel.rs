//! A communication channel used to send/receive messages to/from the other party.
//!
//! The protocol only ever talks to exactly one peer, so a [`Channel`] is a point-to-point,
//! ordered and reliable byte pipe. [`send`], [`recv`] and [`send_and_wait`] take care of
//! (de-)serializing the typed protocol messages on top of it.

use std::{fmt, future::Future, io, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::mpsc::{Receiver, Sender, channel, error::SendError},
    time::timeout,
};
use tracing::trace;

/// Errors related to sending / receiving / (de-)serializing messages.
#[derive(Debug, thiserror::Error)]
#[error("channel error while {phase}: {reason}")]
pub struct Error {
    /// The protocol phase during which the error occurred.
    pub phase: String,
    /// The specific error that was raised.
    pub reason: ErrorKind,
}

/// The specific error that occurred when trying to send / receive a message.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// The (serialized) message could not be received over the channel.
    #[error("receive failed: {0}")]
    RecvError(String),
    /// The (serialized) message could not be sent over the channel.
    #[error("send failed: {0}")]
    SendError(String),
    /// The message could not be (de-)serialized.
    #[error("malformed message: {0}")]
    SerdeError(String),
}

/// A communication channel used to send/receive messages to/from the other party.
pub trait Channel {
    /// The error that can occur sending messages over the channel.
    type SendError: fmt::Debug;
    /// The error that can occur receiving messages over the channel.
    type RecvError: fmt::Debug;

    /// Sends a message to the other party.
    fn send_bytes(
        &mut self,
        msg: Vec<u8>,
    ) -> impl Future<Output = Result<(), Self::SendError>> + Send;

    /// Awaits the next message from the other party.
    fn recv_bytes(&mut self) -> impl Future<Output = Result<Vec<u8>, Self::RecvError>> + Send;
}

/// Serializes and sends a message to the other party.
pub async fn send<C: Channel>(
    channel: &mut C,
    phase: &str,
    msg: &impl Serialize,
) -> Result<(), Error> {
    let msg = bincode::serialize(msg).map_err(|e| Error {
        phase: format!("sending {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })?;
    trace!(phase, bytes = msg.len(), "sending message");
    channel.send_bytes(msg).await.map_err(|e| Error {
        phase: format!("sending {phase}"),
        reason: ErrorKind::SendError(format!("{e:?}")),
    })
}

/// Receives and deserializes a message from the other party.
pub async fn recv<C: Channel, T: DeserializeOwned>(
    channel: &mut C,
    phase: &str,
) -> Result<T, Error> {
    let msg = channel.recv_bytes().await.map_err(|e| Error {
        phase: format!("receiving {phase}"),
        reason: ErrorKind::RecvError(format!("{e:?}")),
    })?;
    trace!(phase, bytes = msg.len(), "received message");
    bincode::deserialize(&msg).map_err(|e| Error {
        phase: format!("receiving {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })
}

/// Sends a message and blocks until exactly one reply has arrived.
pub async fn send_and_wait<C: Channel, T: DeserializeOwned>(
    channel: &mut C,
    phase: &str,
    msg: &impl Serialize,
) -> Result<T, Error> {
    send(channel, phase, msg).await?;
    recv(channel, phase).await
}

/// Receive timeout of a [`SimpleChannel`] unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// An in-memory channel using [`Sender`] and [`Receiver`], mostly useful for tests and
/// simulations within a single process.
#[derive(Debug)]
pub struct SimpleChannel {
    s: Sender<Vec<u8>>,
    r: Receiver<Vec<u8>>,
    timeout: Duration,
}

impl SimpleChannel {
    /// Creates two connected channel ends.
    pub fn pair() -> (Self, Self) {
        Self::pair_with_timeout(DEFAULT_TIMEOUT)
    }

    /// Creates two connected channel ends whose receives give up after `timeout`.
    pub fn pair_with_timeout(timeout: Duration) -> (Self, Self) {
        let buffer_capacity = 1024;
        let (send_a_to_b, recv_a_to_b) = channel(buffer_capacity);
        let (send_b_to_a, recv_b_to_a) = channel(buffer_capacity);
        (
            SimpleChannel {
                s: send_a_to_b,
                r: recv_b_to_a,
                timeout,
            },
            SimpleChannel {
                s: send_b_to_a,
                r: recv_a_to_b,
                timeout,
            },
        )
    }
}

#[derive(Debug)]
/// The error raised by `recv` calls of a [`SimpleChannel`].
pub enum AsyncRecvError {
    /// The channel has been closed.
    Closed,
    /// No message was received before the timeout.
    TimeoutElapsed,
}

impl Channel for SimpleChannel {
    type SendError = SendError<Vec<u8>>;
    type RecvError = AsyncRecvError;

    async fn send_bytes(&mut self, msg: Vec<u8>) -> Result<(), SendError<Vec<u8>>> {
        self.s.send(msg).await
    }

    async fn recv_bytes(&mut self) -> Result<Vec<u8>, AsyncRecvError> {
        match timeout(self.timeout, self.r.recv()).await {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => Err(AsyncRecvError::Closed),
            Err(_) => Err(AsyncRecvError::TimeoutElapsed),
        }
    }
}

/// Upper bound for a single frame of a [`TcpChannel`].
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// A channel over a TCP connection. Every message is framed as a 4 byte big-endian length
/// followed by the payload.
#[derive(Debug)]
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    /// Connects to a listening party (the client side, used by the garbler).
    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream))
    }

    /// Binds to `addr` and waits for a single incoming connection (the server side, used by the
    /// evaluator).
    pub async fn accept(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Self::accept_from(&listener).await
    }

    /// Waits for the next connection on an already bound listener.
    pub async fn accept_from(listener: &TcpListener) -> io::Result<Self> {
        let (stream, peer) = listener.accept().await?;
        trace!(%peer, "accepted connection");
        Ok(Self::from_stream(stream))
    }

    /// Wraps an established connection.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }
}

fn frame_too_large(len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("frame of {len} bytes exceeds the limit of {MAX_FRAME_LEN} bytes"),
    )
}

impl Channel for TcpChannel {
    type SendError = io::Error;
    type RecvError = io::Error;

    async fn send_bytes(&mut self, msg: Vec<u8>) -> Result<(), io::Error> {
        if msg.len() > MAX_FRAME_LEN {
            return Err(frame_too_large(msg.len()));
        }
        let len = msg.len() as u32;
        self.stream.write_all(&len.to_be_bytes()).await?;
        self.stream.write_all(&msg).await?;
        self.stream.flush().await
    }

    async fn recv_bytes(&mut self) -> Result<Vec<u8>, io::Error> {
        let mut header = [0; 4];
        self.stream.read_exact(&mut header).await?;
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME_LEN {
            return Err(frame_too_large(len));
        }
        let mut msg = vec![0; len];
        self.stream.read_exact(&mut msg).await?;
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simple_channel_delivers_in_order() -> Result<(), Error> {
        let (mut a, mut b) = SimpleChannel::pair();
        send(&mut a, "first", &1u32).await?;
        send(&mut a, "second", &"two".to_string()).await?;
        let first: u32 = recv(&mut b, "first").await?;
        let second: String = recv(&mut b, "second").await?;
        assert_eq!((first, second.as_str()), (1, "two"));
        Ok(())
    }

    #[tokio::test]
    async fn simple_channel_reports_timeout_and_closure() {
        let (mut a, b) = SimpleChannel::pair_with_timeout(Duration::from_millis(10));
        assert!(matches!(
            a.recv_bytes().await,
            Err(AsyncRecvError::TimeoutElapsed)
        ));
        drop(b);
        assert!(matches!(a.recv_bytes().await, Err(AsyncRecvError::Closed)));
        let err = recv::<_, u32>(&mut a, "closed").await.unwrap_err();
        assert!(matches!(err.reason, ErrorKind::RecvError(_)));
        assert_eq!(err.phase, "receiving closed");
    }

    #[tokio::test]
    async fn malformed_messages_are_rejected() {
        let (mut a, mut b) = SimpleChannel::pair();
        a.send_bytes(vec![1]).await.unwrap();
        let err = recv::<_, u64>(&mut b, "number").await.unwrap_err();
        assert!(matches!(err.reason, ErrorKind::SerdeError(_)));
    }

    #[tokio::test]
    async fn tcp_channel_frames_messages() -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            let mut channel = TcpChannel::accept_from(&listener).await?;
            let msg: Vec<u64> = recv(&mut channel, "numbers")
                .await
                .map_err(io::Error::other)?;
            send(&mut channel, "sum", &msg.iter().sum::<u64>())
                .await
                .map_err(io::Error::other)?;
            let empty = channel.recv_bytes().await?;
            Ok::<_, io::Error>(empty)
        });
        let mut client = TcpChannel::connect(addr).await?;
        let sum: u64 = send_and_wait(&mut client, "numbers", &vec![1u64, 2, 3, 4]).await?;
        client.send_bytes(vec![]).await?;
        assert_eq!(sum, 10);
        assert!(server.await??.is_empty());
        Ok(())
    }
}
