//! One proxy connection: a framed writer half plus a background reader task.
//!
//! The writer half serializes outbound frames with a single `write_all` per
//! frame, so frames are never interleaved on the wire. The reader task
//! incrementally decodes inbound frames and forwards them over a channel; any
//! read or decode failure produces exactly one terminal error event, after
//! which the task exits.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use peridot_wire::OperationalMessage;

use crate::endpoint::ServiceEndpoint;
use crate::error::{ClientError, ClientResult};
use crate::security::SecurityContext;

/// Event emitted by the reader task: a decoded response, or one terminal
/// error after which no further events arrive.
pub(crate) type ReaderResponse = ClientResult<OperationalMessage>;

const READ_BUF_SIZE: usize = 64 * 1024;

/// Capacity of the reader event channel.
const READER_CHANNEL_CAPACITY: usize = 256;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An established proxy session.
pub(crate) struct Connection {
    writer: FrameWriter,
    /// Decoded responses from the reader task.
    pub(crate) responses: mpsc::Receiver<ReaderResponse>,
    reader_task: JoinHandle<()>,
}

impl Connection {
    /// Establishes the transport (TCP, wrapped in TLS when the endpoint asks
    /// for it) and spawns the reader task.
    ///
    /// The caller bounds this with its connect timeout.
    pub(crate) async fn connect(
        endpoint: &ServiceEndpoint,
        security: Option<&SecurityContext>,
    ) -> ClientResult<Self> {
        let tcp = TcpStream::connect(&endpoint.addr)
            .await
            .map_err(|e| ClientError::ConnectFailed {
                addr: endpoint.addr.clone(),
                reason: e.to_string(),
            })?;
        tcp.set_nodelay(true).map_err(ClientError::io)?;

        let (reader, writer): (BoxedReader, BoxedWriter) = if endpoint.ssl_enabled {
            let Some(security) = security else {
                return Err(ClientError::Security(
                    "TLS requested but no security context is initialized".to_string(),
                ));
            };

            let name = security
                .server_name()
                .unwrap_or(endpoint.host())
                .to_string();
            let server_name = rustls::pki_types::ServerName::try_from(name)
                .map_err(|e| ClientError::Security(format!("invalid TLS server name: {e}")))?;

            let stream = security
                .connector()
                .connect(server_name, tcp)
                .await
                .map_err(|e| ClientError::ConnectFailed {
                    addr: endpoint.addr.clone(),
                    reason: format!("TLS handshake: {e}"),
                })?;
            let (r, w) = tokio::io::split(stream);
            (Box::new(r), Box::new(w))
        } else {
            let (r, w) = tcp.into_split();
            (Box::new(r), Box::new(w))
        };

        let (events_tx, events_rx) = mpsc::channel(READER_CHANNEL_CAPACITY);
        let reader_task = tokio::spawn(read_loop(reader, events_tx));

        Ok(Self {
            writer: FrameWriter::new(writer),
            responses: events_rx,
            reader_task,
        })
    }

    /// Writes one message as a single frame.
    pub(crate) async fn send(&mut self, msg: &OperationalMessage) -> ClientResult<()> {
        self.writer.send(msg).await
    }

    /// Tears the session down, stopping the reader task.
    pub(crate) fn shutdown(self) {
        self.reader_task.abort();
    }
}

/// Write half of a connection. Owning the encode buffer here keeps frame
/// bytes contiguous so one `write_all` emits one frame.
struct FrameWriter {
    io: BoxedWriter,
    buf: BytesMut,
}

impl FrameWriter {
    fn new(io: BoxedWriter) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(READ_BUF_SIZE),
        }
    }

    async fn send(&mut self, msg: &OperationalMessage) -> ClientResult<()> {
        self.buf.clear();
        msg.encode(&mut self.buf)?;
        self.io.write_all(&self.buf).await.map_err(ClientError::io)?;
        self.io.flush().await.map_err(ClientError::io)?;
        trace!(sequence = msg.opaque, opcode = %msg.opcode, "frame written");
        Ok(())
    }
}

async fn read_loop(mut io: BoxedReader, events: mpsc::Sender<ReaderResponse>) {
    let mut buf = BytesMut::with_capacity(READ_BUF_SIZE);

    loop {
        // Drain every complete frame before reading more bytes.
        loop {
            match OperationalMessage::decode(&mut buf) {
                Ok(Some(msg)) => {
                    if events.send(Ok(msg)).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = events.send(Err(ClientError::Wire(e))).await;
                    return;
                }
            }
        }

        match io.read_buf(&mut buf).await {
            Ok(0) => {
                let _ = events.send(Err(ClientError::ReaderClosed)).await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                let _ = events.send(Err(ClientError::io(e))).await;
                return;
            }
        }
    }
}
