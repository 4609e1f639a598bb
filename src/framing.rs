//! Record framings: the byte-level rules that turn a reader/writer pair
//! into the `send_record`/`recv_record` duplex every server and client
//! builds on top of.
//!
//! Generalizes a `send(String)`/`receive() -> Stream<String>` transport
//! pair over a concrete medium two ways: records are raw bytes rather
//! than JSON-already strings (the codec lives one layer up, in
//! [`crate::batch`]), and the read/write halves are split so a client's
//! decode loop and its outbound sender can run concurrently without
//! fighting over one `&mut self`, the same shape LSP transports split
//! their halves.
//!
//! Six framings are provided: [`decimal`], [`varint`], [`header`] (with
//! an [`lsp`] convenience constructor), [`line`], [`delimiter`], and
//! [`json`] (self-delimited). [`direct`] provides an in-memory pair for
//! tests and same-process client/server pairings, generalizing the
//! teacher's `FakeTransport`/`FakeTransportHandle` to a symmetric duplex
//! usable by both ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::error::{JrpcError, Result};

/// The read half of a framed duplex: yields exactly one complete record
/// per call, or `Err(JrpcError::Closed)` once the peer has cleanly closed
/// its side.
#[async_trait]
pub trait FramedReader: Send {
    /// Reads and returns the next complete record.
    ///
    /// Returns `Err(JrpcError::Closed)` on a clean end-of-stream. Any
    /// other `Err` is a framing violation or I/O failure; callers should
    /// generally treat it as non-recoverable for the connection.
    async fn recv_record(&mut self) -> Result<Bytes>;
}

/// The write half of a framed duplex: transmits exactly one record per
/// call.
#[async_trait]
pub trait FramedWriter: Send {
    /// Writes `payload` as a single record.
    async fn send_record(&mut self, payload: &[u8]) -> Result<()>;
}

/// A framing that can be split into independent read and write halves.
///
/// Splitting is the mechanism by which a client's decode loop (which owns
/// the read half and may block in `recv_record` indefinitely) runs
/// concurrently with callers sending new requests (which only need the
/// write half, serialized through a mutex by [`crate::client::Client`]).
pub trait Framed: Send {
    /// Splits this framing into independently ownable halves.
    fn into_halves(self: Box<Self>) -> (Box<dyn FramedReader>, Box<dyn FramedWriter>);
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

// ---------------------------------------------------------------------------
// Length-prefixed, decimal
// ---------------------------------------------------------------------------

/// `<n>\n<n-byte payload>` where `<n>` is ASCII decimal.
pub struct DecimalFraming {
    reader: BufReader<BoxedReader>,
    writer: BoxedWriter,
}

impl DecimalFraming {
    /// Wraps a reader/writer pair in decimal length-prefixed framing.
    pub fn new(reader: BoxedReader, writer: BoxedWriter) -> Self {
        DecimalFraming {
            reader: BufReader::new(reader),
            writer,
        }
    }
}

struct DecimalReader(BufReader<BoxedReader>);
struct DecimalWriter(BoxedWriter);

#[async_trait]
impl FramedReader for DecimalReader {
    async fn recv_record(&mut self) -> Result<Bytes> {
        let mut header = Vec::new();
        read_until_newline(&mut self.0, &mut header).await?;
        let header = std::str::from_utf8(&header)
            .map_err(|e| JrpcError::Framing(format!("non-UTF8 length prefix: {e}")))?
            .trim();
        let len: usize = header
            .parse()
            .map_err(|e| JrpcError::Framing(format!("invalid decimal length {header:?}: {e}")))?;
        let mut payload = vec![0u8; len];
        self.0.read_exact(&mut payload).await.map_err(map_eof)?;
        Ok(Bytes::from(payload))
    }
}

#[async_trait]
impl FramedWriter for DecimalWriter {
    async fn send_record(&mut self, payload: &[u8]) -> Result<()> {
        self.0
            .write_all(format!("{}\n", payload.len()).as_bytes())
            .await?;
        self.0.write_all(payload).await?;
        self.0.flush().await?;
        Ok(())
    }
}

impl Framed for DecimalFraming {
    fn into_halves(self: Box<Self>) -> (Box<dyn FramedReader>, Box<dyn FramedWriter>) {
        (Box::new(DecimalReader(self.reader)), Box::new(DecimalWriter(self.writer)))
    }
}

// ---------------------------------------------------------------------------
// Length-prefixed, varint
// ---------------------------------------------------------------------------

/// `<varint(n)><n-byte payload>` using unsigned LEB128 (little-endian
/// base-128, 7 payload bits per byte, high bit set on all but the last).
pub struct VarintFraming {
    reader: BufReader<BoxedReader>,
    writer: BoxedWriter,
}

impl VarintFraming {
    /// Wraps a reader/writer pair in varint length-prefixed framing.
    pub fn new(reader: BoxedReader, writer: BoxedWriter) -> Self {
        VarintFraming {
            reader: BufReader::new(reader),
            writer,
        }
    }
}

struct VarintReader(BufReader<BoxedReader>);
struct VarintWriter(BoxedWriter);

async fn read_varint<R: AsyncRead + Unpin + Send>(reader: &mut R) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        if shift >= 64 {
            return Err(JrpcError::Framing("varint length overflowed u64".into()));
        }
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).await.map_err(map_eof)?;
        value |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

#[async_trait]
impl FramedReader for VarintReader {
    async fn recv_record(&mut self) -> Result<Bytes> {
        let len = read_varint(&mut self.0).await?;
        let mut payload = vec![0u8; len as usize];
        self.0.read_exact(&mut payload).await.map_err(map_eof)?;
        Ok(Bytes::from(payload))
    }
}

#[async_trait]
impl FramedWriter for VarintWriter {
    async fn send_record(&mut self, payload: &[u8]) -> Result<()> {
        let mut header = Vec::new();
        write_varint(payload.len() as u64, &mut header);
        self.0.write_all(&header).await?;
        self.0.write_all(payload).await?;
        self.0.flush().await?;
        Ok(())
    }
}

impl Framed for VarintFraming {
    fn into_halves(self: Box<Self>) -> (Box<dyn FramedReader>, Box<dyn FramedWriter>) {
        (Box::new(VarintReader(self.reader)), Box::new(VarintWriter(self.writer)))
    }
}

// ---------------------------------------------------------------------------
// Header-framed (HTTP-like, LSP included)
// ---------------------------------------------------------------------------

/// HTTP-like header block terminated by `\r\n\r\n`, with a mandatory
/// `Content-Length` and optional `Content-Type`.
///
/// When `required_content_type` is set (the strict variant, which [`lsp`]
/// uses), an inbound record whose `Content-Type` doesn't match exactly is
/// rejected; otherwise any content type (or none) is accepted.
pub struct HeaderFraming {
    reader: BufReader<BoxedReader>,
    writer: BoxedWriter,
    send_content_type: Option<String>,
    required_content_type: Option<String>,
}

impl HeaderFraming {
    /// Non-strict header framing: accepts any (or no) `Content-Type`.
    pub fn new(reader: BoxedReader, writer: BoxedWriter) -> Self {
        HeaderFraming {
            reader: BufReader::new(reader),
            writer,
            send_content_type: None,
            required_content_type: None,
        }
    }

    /// Strict header framing that rejects replies whose `Content-Type`
    /// doesn't equal `content_type`, and sends that type on every record.
    pub fn strict(reader: BoxedReader, writer: BoxedWriter, content_type: impl Into<String>) -> Self {
        let content_type = content_type.into();
        HeaderFraming {
            reader: BufReader::new(reader),
            writer,
            send_content_type: Some(content_type.clone()),
            required_content_type: Some(content_type),
        }
    }
}

/// The LSP wire framing: header-framed, strict, `Content-Type:
/// application/vscode-jsonrpc; charset=utf-8`.
pub fn lsp(reader: BoxedReader, writer: BoxedWriter) -> HeaderFraming {
    HeaderFraming::strict(reader, writer, "application/vscode-jsonrpc; charset=utf-8")
}

struct HeaderReader {
    reader: BufReader<BoxedReader>,
    required_content_type: Option<String>,
}
struct HeaderWriter {
    writer: BoxedWriter,
    send_content_type: Option<String>,
}

#[async_trait]
impl FramedReader for HeaderReader {
    async fn recv_record(&mut self) -> Result<Bytes> {
        let mut content_length: Option<usize> = None;
        let mut content_type: Option<String> = None;
        loop {
            let mut line = Vec::new();
            read_until_newline(&mut self.reader, &mut line).await?;
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                match name.trim().to_ascii_lowercase().as_str() {
                    "content-length" => {
                        let value = value.trim();
                        let len: i64 = value.parse().map_err(|e| {
                            JrpcError::Framing(format!("invalid Content-Length {value:?}: {e}"))
                        })?;
                        if len < 0 {
                            return Err(JrpcError::Framing("negative Content-Length".into()));
                        }
                        content_length = Some(len as usize);
                    }
                    "content-type" => content_type = Some(value.trim().to_string()),
                    _ => {}
                }
            }
        }
        let len = content_length
            .ok_or_else(|| JrpcError::Framing("missing Content-Length header".into()))?;
        if let Some(required) = &self.required_content_type {
            if content_type.as_deref() != Some(required.as_str()) {
                return Err(JrpcError::Framing(format!(
                    "Content-Type {content_type:?} does not match required {required:?}"
                )));
            }
        }
        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).await.map_err(map_eof)?;
        Ok(Bytes::from(payload))
    }
}

#[async_trait]
impl FramedWriter for HeaderWriter {
    async fn send_record(&mut self, payload: &[u8]) -> Result<()> {
        let mut header = format!("Content-Length: {}\r\n", payload.len());
        if let Some(ct) = &self.send_content_type {
            header.push_str(&format!("Content-Type: {ct}\r\n"));
        }
        header.push_str("\r\n");
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(payload).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

impl Framed for HeaderFraming {
    fn into_halves(self: Box<Self>) -> (Box<dyn FramedReader>, Box<dyn FramedWriter>) {
        (
            Box::new(HeaderReader {
                reader: self.reader,
                required_content_type: self.required_content_type,
            }),
            Box::new(HeaderWriter {
                writer: self.writer,
                send_content_type: self.send_content_type,
            }),
        )
    }
}

// ---------------------------------------------------------------------------
// Line-framed
// ---------------------------------------------------------------------------

/// Records terminated by `\n`. Outbound records may not contain a `\n`.
pub struct LineFraming {
    reader: BufReader<BoxedReader>,
    writer: BoxedWriter,
}

impl LineFraming {
    /// Wraps a reader/writer pair in newline-terminated framing.
    pub fn new(reader: BoxedReader, writer: BoxedWriter) -> Self {
        LineFraming {
            reader: BufReader::new(reader),
            writer,
        }
    }
}

struct LineReader(BufReader<BoxedReader>);
struct LineWriter(BoxedWriter);

#[async_trait]
impl FramedReader for LineReader {
    async fn recv_record(&mut self) -> Result<Bytes> {
        let mut line = Vec::new();
        read_until_newline(&mut self.0, &mut line).await?;
        Ok(Bytes::from(line))
    }
}

#[async_trait]
impl FramedWriter for LineWriter {
    async fn send_record(&mut self, payload: &[u8]) -> Result<()> {
        if payload.contains(&b'\n') {
            return Err(JrpcError::Framing(
                "line framing forbids embedded newlines in a record".into(),
            ));
        }
        self.0.write_all(payload).await?;
        self.0.write_all(b"\n").await?;
        self.0.flush().await?;
        Ok(())
    }
}

impl Framed for LineFraming {
    fn into_halves(self: Box<Self>) -> (Box<dyn FramedReader>, Box<dyn FramedWriter>) {
        (Box::new(LineReader(self.reader)), Box::new(LineWriter(self.writer)))
    }
}

// ---------------------------------------------------------------------------
// Delimiter-split
// ---------------------------------------------------------------------------

/// Records separated by a single configured byte (e.g. `0x1e` for RS,
/// `0x00` for NUL).
pub struct DelimiterFraming {
    reader: BufReader<BoxedReader>,
    writer: BoxedWriter,
    delimiter: u8,
}

impl DelimiterFraming {
    /// Wraps a reader/writer pair in delimiter-split framing using the
    /// given separator byte.
    pub fn new(reader: BoxedReader, writer: BoxedWriter, delimiter: u8) -> Self {
        DelimiterFraming {
            reader: BufReader::new(reader),
            writer,
            delimiter,
        }
    }
}

struct DelimiterReader {
    reader: BufReader<BoxedReader>,
    delimiter: u8,
}
struct DelimiterWriter {
    writer: BoxedWriter,
    delimiter: u8,
}

#[async_trait]
impl FramedReader for DelimiterReader {
    async fn recv_record(&mut self) -> Result<Bytes> {
        let mut record = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            let n = self.reader.read(&mut byte).await?;
            if n == 0 {
                if record.is_empty() {
                    return Err(JrpcError::Closed);
                }
                return Err(JrpcError::Framing(
                    "stream closed mid-record (no trailing delimiter)".into(),
                ));
            }
            if byte[0] == self.delimiter {
                return Ok(Bytes::from(record));
            }
            record.push(byte[0]);
        }
    }
}

#[async_trait]
impl FramedWriter for DelimiterWriter {
    async fn send_record(&mut self, payload: &[u8]) -> Result<()> {
        if payload.contains(&self.delimiter) {
            return Err(JrpcError::Framing(
                "delimiter framing forbids an embedded delimiter byte in a record".into(),
            ));
        }
        self.writer.write_all(payload).await?;
        self.writer.write_all(&[self.delimiter]).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

impl Framed for DelimiterFraming {
    fn into_halves(self: Box<Self>) -> (Box<dyn FramedReader>, Box<dyn FramedWriter>) {
        (
            Box::new(DelimiterReader {
                reader: self.reader,
                delimiter: self.delimiter,
            }),
            Box::new(DelimiterWriter {
                writer: self.writer,
                delimiter: self.delimiter,
            }),
        )
    }
}

// ---------------------------------------------------------------------------
// Self-delimited JSON
// ---------------------------------------------------------------------------

/// One record is one complete top-level JSON value (object or array);
/// the receiver tracks brace/bracket depth and string/escape state to
/// find the end of each value with no extra framing at all. Empty
/// records are disallowed -- there is no way to represent one.
pub struct JsonFraming {
    reader: BoxedReader,
    writer: BoxedWriter,
}

impl JsonFraming {
    /// Wraps a reader/writer pair in self-delimited JSON framing.
    pub fn new(reader: BoxedReader, writer: BoxedWriter) -> Self {
        JsonFraming { reader, writer }
    }
}

struct JsonReader(BoxedReader);
struct JsonWriter(BoxedWriter);

#[async_trait]
impl FramedReader for JsonReader {
    async fn recv_record(&mut self) -> Result<Bytes> {
        let mut buf = Vec::new();
        let mut depth: i64 = 0;
        let mut in_string = false;
        let mut escape = false;
        let mut started = false;

        loop {
            let mut byte = [0u8; 1];
            let n = self.0.read(&mut byte).await?;
            if n == 0 {
                if !started {
                    return Err(JrpcError::Closed);
                }
                return Err(JrpcError::Framing(
                    "stream closed mid-value in self-delimited JSON framing".into(),
                ));
            }
            let b = byte[0];

            if !started {
                if b.is_ascii_whitespace() {
                    continue;
                }
                if b != b'{' && b != b'[' {
                    return Err(JrpcError::Framing(
                        "self-delimited JSON framing requires a top-level object or array".into(),
                    ));
                }
                started = true;
            }

            buf.push(b);

            if in_string {
                if escape {
                    escape = false;
                } else if b == b'\\' {
                    escape = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }

            match b {
                b'"' => in_string = true,
                b'{' | b'[' => depth += 1,
                b'}' | b']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(Bytes::from(buf));
                    }
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl FramedWriter for JsonWriter {
    async fn send_record(&mut self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(JrpcError::Framing(
                "self-delimited JSON framing cannot send an empty record".into(),
            ));
        }
        self.0.write_all(payload).await?;
        self.0.flush().await?;
        Ok(())
    }
}

impl Framed for JsonFraming {
    fn into_halves(self: Box<Self>) -> (Box<dyn FramedReader>, Box<dyn FramedWriter>) {
        (Box::new(JsonReader(self.reader)), Box::new(JsonWriter(self.writer)))
    }
}

// ---------------------------------------------------------------------------
// Direct (in-memory)
// ---------------------------------------------------------------------------

struct DirectReader(mpsc::UnboundedReceiver<Bytes>);
struct DirectWriter(mpsc::UnboundedSender<Bytes>);

#[async_trait]
impl FramedReader for DirectReader {
    async fn recv_record(&mut self) -> Result<Bytes> {
        self.0.recv().await.ok_or(JrpcError::Closed)
    }
}

#[async_trait]
impl FramedWriter for DirectWriter {
    async fn send_record(&mut self, payload: &[u8]) -> Result<()> {
        self.0
            .send(Bytes::copy_from_slice(payload))
            .map_err(|_| JrpcError::Closed)
    }
}

/// Builds two connected in-memory framed halves: whatever end A sends,
/// end B receives, and vice versa. A single symmetric type usable by
/// both a server and a client in the same process, with no
/// serialization -- buffers are passed by copy.
pub fn direct_pair() -> (
    (Box<dyn FramedReader>, Box<dyn FramedWriter>),
    (Box<dyn FramedReader>, Box<dyn FramedWriter>),
) {
    let (a_to_b_tx, a_to_b_rx) = mpsc::unbounded_channel::<Bytes>();
    let (b_to_a_tx, b_to_a_rx) = mpsc::unbounded_channel::<Bytes>();

    let a = (
        Box::new(DirectReader(b_to_a_rx)) as Box<dyn FramedReader>,
        Box::new(DirectWriter(a_to_b_tx)) as Box<dyn FramedWriter>,
    );
    let b = (
        Box::new(DirectReader(a_to_b_rx)) as Box<dyn FramedReader>,
        Box::new(DirectWriter(b_to_a_tx)) as Box<dyn FramedWriter>,
    );
    (a, b)
}

/// Test-support helpers for wiring an already-split halves pair (as
/// [`direct_pair`] returns) back into something [`crate::server::Server::start`]
/// and [`crate::client::Client::connect`] can take, without a real
/// transport in the loop.
pub mod testing {
    use super::{Framed, FramedReader, FramedWriter};

    /// Re-packages one half of a [`super::direct_pair`] (or any other
    /// pre-split reader/writer pair) as a [`Framed`], so it can be handed
    /// to APIs that only accept a `Box<dyn Framed>`.
    pub struct PairFraming {
        reader: Box<dyn FramedReader>,
        writer: Box<dyn FramedWriter>,
    }

    impl PairFraming {
        /// Wraps an already-split reader/writer pair.
        pub fn new(pair: (Box<dyn FramedReader>, Box<dyn FramedWriter>)) -> Self {
            PairFraming {
                reader: pair.0,
                writer: pair.1,
            }
        }
    }

    impl Framed for PairFraming {
        fn into_halves(self: Box<Self>) -> (Box<dyn FramedReader>, Box<dyn FramedWriter>) {
            (self.reader, self.writer)
        }
    }
}

// ---------------------------------------------------------------------------
// Trigger wrapper
// ---------------------------------------------------------------------------

/// Wraps a [`FramedReader`], invoking a callback the first time
/// `recv_record` returns end-of-stream (`JrpcError::Closed`) or any other
/// error. Used by [`crate::client::Client`] to cancel its root context
/// the moment the peer disconnects.
pub struct TriggerReader {
    inner: Box<dyn FramedReader>,
    fired: AtomicBool,
    on_close: Arc<dyn Fn() + Send + Sync>,
}

impl TriggerReader {
    /// Wraps `inner`, calling `on_close` exactly once, the first time a
    /// `recv_record` call on the wrapped reader fails for any reason.
    pub fn new(inner: Box<dyn FramedReader>, on_close: impl Fn() + Send + Sync + 'static) -> Self {
        TriggerReader {
            inner,
            fired: AtomicBool::new(false),
            on_close: Arc::new(on_close),
        }
    }
}

#[async_trait]
impl FramedReader for TriggerReader {
    async fn recv_record(&mut self) -> Result<Bytes> {
        match self.inner.recv_record().await {
            Ok(record) => Ok(record),
            Err(e) => {
                if !self.fired.swap(true, Ordering::SeqCst) {
                    (self.on_close)();
                }
                Err(e)
            }
        }
    }
}

/// Adapts a [`FramedReader`] into a `futures::Stream`, ending the stream
/// (rather than yielding a final item) on `Err(JrpcError::Closed)` and
/// yielding one `Err` item before ending on any other failure.
///
/// Generalizes a `Transport::receive() -> Stream<String>` shape for
/// callers that would rather `while let Some(record) =
/// stream.next().await` than call `recv_record()` in a loop by hand.
pub fn record_stream(reader: Box<dyn FramedReader>) -> impl Stream<Item = Result<Bytes>> + Send {
    futures::stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        match reader.recv_record().await {
            Ok(record) => Some((Ok(record), Some(reader))),
            Err(JrpcError::Closed) => None,
            Err(e) => Some((Err(e), None)),
        }
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Reads up to and including the next `\n`, appending everything read
/// (minus the trailing `\r\n`/`\n`) to `out`. Returns `Err(Closed)` if
/// the stream ends before any byte is read, and a framing error if it
/// ends mid-line.
async fn read_until_newline<R: AsyncRead + Unpin + Send>(reader: &mut R, out: &mut Vec<u8>) -> Result<()> {
    let mut saw_any = false;
    loop {
        let mut byte = [0u8; 1];
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            if !saw_any {
                return Err(JrpcError::Closed);
            }
            return Err(JrpcError::Framing("stream closed mid-line".into()));
        }
        saw_any = true;
        if byte[0] == b'\n' {
            if out.last() == Some(&b'\r') {
                out.pop();
            }
            return Ok(());
        }
        out.push(byte[0]);
    }
}

fn map_eof(e: std::io::Error) -> JrpcError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        JrpcError::Closed
    } else {
        JrpcError::Io(e)
    }
}

/// Constructs a framing by its advertised name (§6): `decimal`, `varint`,
/// `line`, `raw` (self-delimited JSON), `lsp`, or `header:<mime-type>`
/// (non-strict header framing that still *sends* the given type).
pub fn by_name(name: &str, reader: BoxedReader, writer: BoxedWriter) -> Result<Box<dyn Framed>> {
    match name {
        "decimal" => Ok(Box::new(DecimalFraming::new(reader, writer))),
        "varint" => Ok(Box::new(VarintFraming::new(reader, writer))),
        "line" => Ok(Box::new(LineFraming::new(reader, writer))),
        "raw" => Ok(Box::new(JsonFraming::new(reader, writer))),
        "lsp" => Ok(Box::new(lsp(reader, writer))),
        other => {
            if let Some(mime) = other.strip_prefix("header:") {
                Ok(Box::new(HeaderFraming::strict(reader, writer, mime)))
            } else {
                Err(JrpcError::Framing(format!("unknown framing name {other:?}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn boxed_cursor(data: Vec<u8>) -> BoxedReader {
        Box::new(Cursor::new(data))
    }

    #[tokio::test]
    async fn test_decimal_recv_parses_length_prefix() {
        let data = b"5\nhello".to_vec();
        let framing = DecimalFraming::new(boxed_cursor(data), Box::new(Vec::new()));
        let (mut reader, _writer) = Box::new(framing).into_halves();
        let record = reader.recv_record().await.unwrap();
        assert_eq!(&record[..], b"hello");
    }

    #[tokio::test]
    async fn test_decimal_recv_empty_record() {
        let data = b"0\n".to_vec();
        let framing = DecimalFraming::new(boxed_cursor(data), Box::new(Vec::new()));
        let (mut reader, _writer) = Box::new(framing).into_halves();
        let record = reader.recv_record().await.unwrap();
        assert!(record.is_empty());
    }

    #[tokio::test]
    async fn test_decimal_recv_eof_is_closed() {
        let framing = DecimalFraming::new(boxed_cursor(Vec::new()), Box::new(Vec::new()));
        let (mut reader, _writer) = Box::new(framing).into_halves();
        let err = reader.recv_record().await.unwrap_err();
        assert!(matches!(err, JrpcError::Closed));
    }

    #[tokio::test]
    async fn test_varint_round_trip_encoding() {
        let mut out = Vec::new();
        write_varint(300, &mut out);
        // 300 = 0b1_0010_1100 -> low 7 bits 0x2c with continuation, then 0x02
        assert_eq!(out, vec![0xac, 0x02]);
        let mut cursor = Cursor::new(out);
        let value = read_varint(&mut cursor).await.unwrap();
        assert_eq!(value, 300);
    }

    #[tokio::test]
    async fn test_varint_framing_recv() {
        let mut data = Vec::new();
        write_varint(3, &mut data);
        data.extend_from_slice(b"abc");
        let framing = VarintFraming::new(boxed_cursor(data), Box::new(Vec::new()));
        let (mut reader, _writer) = Box::new(framing).into_halves();
        let record = reader.recv_record().await.unwrap();
        assert_eq!(&record[..], b"abc");
    }

    #[tokio::test]
    async fn test_line_framing_rejects_embedded_newline() {
        let framing = LineFraming::new(boxed_cursor(Vec::new()), Box::new(Vec::new()));
        let (_reader, mut writer) = Box::new(framing).into_halves();
        let err = writer.send_record(b"one\ntwo").await.unwrap_err();
        assert!(matches!(err, JrpcError::Framing(_)));
    }

    #[tokio::test]
    async fn test_line_framing_recv_strips_newline() {
        let data = b"hello\n".to_vec();
        let framing = LineFraming::new(boxed_cursor(data), Box::new(Vec::new()));
        let (mut reader, _writer) = Box::new(framing).into_halves();
        let record = reader.recv_record().await.unwrap();
        assert_eq!(&record[..], b"hello");
    }

    #[tokio::test]
    async fn test_delimiter_framing_recv() {
        let data = vec![b'a', b'b', 0x1e, b'c', b'd', 0x1e];
        let framing = DelimiterFraming::new(boxed_cursor(data), Box::new(Vec::new()), 0x1e);
        let (mut reader, _writer) = Box::new(framing).into_halves();
        assert_eq!(&reader.recv_record().await.unwrap()[..], b"ab");
        assert_eq!(&reader.recv_record().await.unwrap()[..], b"cd");
        assert!(matches!(
            reader.recv_record().await.unwrap_err(),
            JrpcError::Closed
        ));
    }

    #[tokio::test]
    async fn test_header_framing_recv_requires_matching_content_type() {
        let data = b"Content-Length: 2\r\nContent-Type: text/plain\r\n\r\nhi".to_vec();
        let framing = HeaderFraming::strict(boxed_cursor(data), Box::new(Vec::new()), "application/json");
        let (mut reader, _writer) = Box::new(framing).into_halves();
        let err = reader.recv_record().await.unwrap_err();
        assert!(matches!(err, JrpcError::Framing(_)));
    }

    #[tokio::test]
    async fn test_header_framing_non_strict_accepts_any_type() {
        let data = b"Content-Length: 2\r\n\r\nhi".to_vec();
        let framing = HeaderFraming::new(boxed_cursor(data), Box::new(Vec::new()));
        let (mut reader, _writer) = Box::new(framing).into_halves();
        let record = reader.recv_record().await.unwrap();
        assert_eq!(&record[..], b"hi");
    }

    #[tokio::test]
    async fn test_header_framing_negative_length_is_error() {
        let data = b"Content-Length: -1\r\n\r\n".to_vec();
        let framing = HeaderFraming::new(boxed_cursor(data), Box::new(Vec::new()));
        let (mut reader, _writer) = Box::new(framing).into_halves();
        assert!(reader.recv_record().await.is_err());
    }

    #[tokio::test]
    async fn test_header_framing_send_includes_length_and_type() {
        let framing = lsp(boxed_cursor(Vec::new()), Box::new(Vec::new()));
        let (_reader, mut writer) = Box::new(framing).into_halves();
        writer.send_record(b"{}").await.unwrap();
    }

    #[tokio::test]
    async fn test_json_framing_recv_one_object() {
        let data = br#"{"a":1}{"b":2}"#.to_vec();
        let framing = JsonFraming::new(boxed_cursor(data), Box::new(Vec::new()));
        let (mut reader, _writer) = Box::new(framing).into_halves();
        let first = reader.recv_record().await.unwrap();
        assert_eq!(&first[..], br#"{"a":1}"#);
        let second = reader.recv_record().await.unwrap();
        assert_eq!(&second[..], br#"{"b":2}"#);
    }

    #[tokio::test]
    async fn test_json_framing_recv_array_and_nested_braces() {
        let data = br#"[{"a":"}"},1]"#.to_vec();
        let framing = JsonFraming::new(boxed_cursor(data), Box::new(Vec::new()));
        let (mut reader, _writer) = Box::new(framing).into_halves();
        let record = reader.recv_record().await.unwrap();
        assert_eq!(&record[..], data.as_slice());
    }

    #[tokio::test]
    async fn test_json_framing_rejects_bare_scalar() {
        let data = b"42".to_vec();
        let framing = JsonFraming::new(boxed_cursor(data), Box::new(Vec::new()));
        let (mut reader, _writer) = Box::new(framing).into_halves();
        assert!(reader.recv_record().await.is_err());
    }

    #[tokio::test]
    async fn test_json_framing_rejects_empty_send() {
        let framing = JsonFraming::new(boxed_cursor(Vec::new()), Box::new(Vec::new()));
        let (_reader, mut writer) = Box::new(framing).into_halves();
        assert!(writer.send_record(b"").await.is_err());
    }

    #[tokio::test]
    async fn test_direct_pair_round_trip_both_directions() {
        let (a, b) = direct_pair();
        let (mut a_reader, mut a_writer) = a;
        let (mut b_reader, mut b_writer) = b;

        a_writer.send_record(b"ping").await.unwrap();
        assert_eq!(&b_reader.recv_record().await.unwrap()[..], b"ping");

        b_writer.send_record(b"pong").await.unwrap();
        assert_eq!(&a_reader.recv_record().await.unwrap()[..], b"pong");
    }

    #[tokio::test]
    async fn test_direct_pair_empty_record() {
        let (a, b) = direct_pair();
        let (_a_reader, mut a_writer) = a;
        let (mut b_reader, _b_writer) = b;
        a_writer.send_record(b"").await.unwrap();
        assert_eq!(&b_reader.recv_record().await.unwrap()[..], b"");
    }

    #[tokio::test]
    async fn test_direct_pair_closed_on_drop() {
        let (a, b) = direct_pair();
        let (mut a_reader, _a_writer) = a;
        drop(b);
        assert!(matches!(a_reader.recv_record().await, Err(JrpcError::Closed)));
    }

    #[tokio::test]
    async fn test_trigger_fires_once_on_close() {
        let (a, b) = direct_pair();
        let (a_reader, _a_writer) = a;
        let (_b_reader, b_writer) = b;
        drop(b_writer);

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        let mut triggered = TriggerReader::new(a_reader, move || {
            fired_clone.store(true, Ordering::SeqCst);
        });

        assert!(!fired.load(Ordering::SeqCst));
        let _ = triggered.recv_record().await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_by_name_unknown() {
        let err = by_name("bogus", boxed_cursor(Vec::new()), Box::new(Vec::new())).unwrap_err();
        assert!(matches!(err, JrpcError::Framing(_)));
    }

    #[tokio::test]
    async fn test_record_stream_ends_cleanly_on_close() {
        use futures::StreamExt;

        let (a, b) = direct_pair();
        let (a_reader, _a_writer) = a;
        let (_b_reader, mut b_writer) = b;

        b_writer.send_record(b"one").await.unwrap();
        b_writer.send_record(b"two").await.unwrap();
        drop(b_writer);

        let mut stream = record_stream(a_reader);
        assert_eq!(&stream.next().await.unwrap().unwrap()[..], b"one");
        assert_eq!(&stream.next().await.unwrap().unwrap()[..], b"two");
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_by_name_header_mime() {
        let framed = by_name("header:text/plain", boxed_cursor(Vec::new()), Box::new(Vec::new())).unwrap();
        let (_r, _w) = framed.into_halves();
    }
}
