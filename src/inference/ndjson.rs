//! Newline-delimited JSON decoding for Ollama's streaming replies.
//!
//! Ollama writes one JSON object per line. Network chunks do not respect
//! line boundaries, so bytes are buffered until a full line is available.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;

use crate::inference::client::BackendError;

/// Decode one NDJSON line. Returns `None` for blank lines.
pub fn parse_line<T: DeserializeOwned>(line: &[u8]) -> Option<Result<T, BackendError>> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return None;
    }
    Some(serde_json::from_slice(trimmed).map_err(|e| {
        BackendError::Decode(format!(
            "{e} in line {:?}",
            String::from_utf8_lossy(trimmed)
        ))
    }))
}

/// Longest line accepted from the engine before the stream is failed.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

struct DecoderState<S> {
    stream: S,
    buf: BytesMut,
    /// Prefix of `buf` already known to hold no newline.
    scanned: usize,
    max_line: usize,
    idle_timeout: Duration,
    /// Upstream returned `None`; only buffered bytes remain.
    exhausted: bool,
    /// An error was yielded; nothing more is produced.
    terminated: bool,
}

/// Turn a byte stream into a stream of decoded values.
///
/// Waiting longer than `idle_timeout` for the next chunk yields
/// [`BackendError::Timeout`]. A line longer than [`MAX_LINE_BYTES`] yields
/// [`BackendError::Decode`]. The stream ends after the first error.
pub fn decode<S, E, T>(bytes: S, idle_timeout: Duration) -> BoxStream<'static, Result<T, BackendError>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BackendError> + 'static,
    T: DeserializeOwned + Send + 'static,
{
    decode_bounded(bytes, idle_timeout, MAX_LINE_BYTES)
}

fn decode_bounded<S, E, T>(
    bytes: S,
    idle_timeout: Duration,
    max_line: usize,
) -> BoxStream<'static, Result<T, BackendError>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<BackendError> + 'static,
    T: DeserializeOwned + Send + 'static,
{
    let state = DecoderState {
        stream: bytes.boxed(),
        buf: BytesMut::new(),
        scanned: 0,
        max_line,
        idle_timeout,
        exhausted: false,
        terminated: false,
    };

    stream::unfold(state, |mut st| async move {
        if st.terminated {
            return None;
        }

        loop {
            if let Some(offset) = st.buf[st.scanned..].iter().position(|b| *b == b'\n') {
                let line = st.buf.split_to(st.scanned + offset + 1);
                st.scanned = 0;
                match parse_line::<T>(&line) {
                    None => continue,
                    Some(Ok(value)) => return Some((Ok(value), st)),
                    Some(Err(e)) => {
                        st.terminated = true;
                        return Some((Err(e), st));
                    }
                }
            }
            st.scanned = st.buf.len();

            if st.buf.len() > st.max_line {
                st.terminated = true;
                let err = BackendError::Decode(format!(
                    "line exceeds {} bytes without a newline",
                    st.max_line
                ));
                return Some((Err(err), st));
            }

            if st.exhausted {
                // Final line without a trailing newline.
                let rest = st.buf.split();
                let item = parse_line::<T>(&rest)?;
                st.terminated = true;
                return Some((item, st));
            }

            match tokio::time::timeout(st.idle_timeout, st.stream.next()).await {
                Ok(Some(Ok(chunk))) => st.buf.extend_from_slice(&chunk),
                Ok(Some(Err(e))) => {
                    st.terminated = true;
                    return Some((Err(e.into()), st));
                }
                Ok(None) => st.exhausted = true,
                Err(_) => {
                    st.terminated = true;
                    return Some((
                        Err(BackendError::Timeout {
                            operation: "chat_stream",
                            after: st.idle_timeout,
                        }),
                        st,
                    ));
                }
            }
        }
    })
    .boxed()
}
