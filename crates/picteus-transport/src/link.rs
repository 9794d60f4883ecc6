use picteus_protocol::{
    best_effort_context_id, classify_wire_frame_parse_error, encode_wire_frame, parse_wire_frame,
    TransportError, WireFrame,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc,
};

#[derive(Debug)]
pub(crate) enum LinkEvent {
    Frame(WireFrame),
    Malformed {
        context_id: Option<String>,
        error: TransportError,
    },
    Closed,
}

/// Outbound half of a link; cheap to clone.
#[derive(Debug, Clone)]
pub struct FrameSender {
    sender: mpsc::UnboundedSender<LinkEvent>,
}

impl FrameSender {
    pub fn send(&self, frame: WireFrame) -> Result<(), TransportError> {
        self.sender
            .send(LinkEvent::Frame(frame))
            .map_err(|_| TransportError::ChannelClosed)
    }

    pub(crate) fn send_closed(&self) {
        let _ = self.sender.send(LinkEvent::Closed);
    }
}

/// A bidirectional frame pipe consumed by one [`crate::TransportChannel`].
#[derive(Debug)]
pub struct TransportLink {
    pub(crate) outbound: FrameSender,
    pub(crate) inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Returns two links wired to each other, for in-process extensions and tests.
pub fn memory_link_pair() -> (TransportLink, TransportLink) {
    let (left_sender, left_receiver) = mpsc::unbounded_channel();
    let (right_sender, right_receiver) = mpsc::unbounded_channel();
    let left = TransportLink {
        outbound: FrameSender {
            sender: right_sender,
        },
        inbound: left_receiver,
    };
    let right = TransportLink {
        outbound: FrameSender {
            sender: left_sender,
        },
        inbound: right_receiver,
    };
    (left, right)
}

/// Builds a link exchanging newline-delimited JSON frames over a byte stream pair.
///
/// Spawns one reader and one writer task on the current tokio runtime. Lines
/// that fail to parse are surfaced to the channel as malformed frames, carrying
/// the `contextId` when it can be recovered.
pub fn ndjson_link<R, W>(label: &str, reader: R, writer: W) -> TransportLink
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel();
    let (inbound_sender, inbound_receiver) = mpsc::unbounded_channel();
    tokio::spawn(run_ndjson_writer(
        label.to_string(),
        writer,
        outbound_receiver,
    ));
    tokio::spawn(run_ndjson_reader(label.to_string(), reader, inbound_sender));
    TransportLink {
        outbound: FrameSender {
            sender: outbound_sender,
        },
        inbound: inbound_receiver,
    }
}

async fn run_ndjson_writer<W>(
    label: String,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<LinkEvent>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(event) = outbound.recv().await {
        let frame = match event {
            LinkEvent::Frame(frame) => frame,
            LinkEvent::Closed => break,
            LinkEvent::Malformed { .. } => continue,
        };
        let mut line = match encode_wire_frame(&frame) {
            Ok(line) => line,
            Err(error) => {
                tracing::warn!(link = %label, %error, "dropping unencodable frame");
                continue;
            }
        };
        line.push('\n');
        if let Err(error) = writer.write_all(line.as_bytes()).await {
            tracing::warn!(link = %label, %error, "ndjson link write failed");
            break;
        }
        if let Err(error) = writer.flush().await {
            tracing::warn!(link = %label, %error, "ndjson link flush failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
    tracing::debug!(link = %label, "ndjson writer stopped");
}

async fn run_ndjson_reader<R>(
    label: String,
    reader: R,
    inbound: mpsc::UnboundedSender<LinkEvent>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(error) => {
                tracing::warn!(link = %label, %error, "ndjson link read failed");
                break;
            }
        };
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }
        let event = match parse_wire_frame(raw) {
            Ok(frame) => LinkEvent::Frame(frame),
            Err(error) => {
                tracing::warn!(
                    link = %label,
                    code = classify_wire_frame_parse_error(&error),
                    %error,
                    "skipping malformed ndjson frame"
                );
                LinkEvent::Malformed {
                    context_id: best_effort_context_id(raw),
                    error,
                }
            }
        };
        if inbound.send(event).is_err() {
            return;
        }
    }
    let _ = inbound.send(LinkEvent::Closed);
    tracing::debug!(link = %label, "ndjson reader reached end of stream");
}
