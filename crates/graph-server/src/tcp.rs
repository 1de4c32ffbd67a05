//! The TCP transport (SPEC_FULL.md §4.9.1): a loopback-only listener, one
//! task per connection, `read_frame` → decode → dispatch → encode → write.
//! Grounded on `moire_web::tcp::{run_tcp_acceptor, handle_conn}`'s
//! accept-loop-plus-writer-task shape; this port's framing comes from
//! `graph_wire::framing` (ASCII-decimal-length, not 4-byte big-endian) and
//! there is no handshake magic to read first — the handshake is just
//! another envelope (SPEC_FULL.md §4.7).

use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use graph_wire::framing::{encode_frame, read_frame, FrameCodecError};

use crate::dispatch::{dispatch, Dispatcher};
use crate::state::AppState;

pub async fn run_tcp_acceptor(listener: TcpListener, dispatcher: Arc<Dispatcher>, state: AppState) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!(%addr, "TCP connection accepted");
                let dispatcher = dispatcher.clone();
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_conn(stream, dispatcher, state).await {
                        warn!(%addr, %e, "connection error");
                    }
                });
            }
            Err(e) => error!(%e, "TCP accept failed"),
        }
    }
}

async fn handle_conn(stream: TcpStream, dispatcher: Arc<Dispatcher>, state: AppState) -> Result<(), String> {
    let max_frame_bytes = state.config().max_message_bytes;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(32);

    let writer_handle = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let result = read_loop(&mut reader, max_frame_bytes, &dispatcher, &state, &tx).await;
    drop(tx);
    writer_handle.abort();
    result
}

async fn read_loop(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    max_frame_bytes: usize,
    dispatcher: &Dispatcher,
    state: &AppState,
    tx: &mpsc::Sender<Vec<u8>>,
) -> Result<(), String> {
    loop {
        let payload = match read_frame(reader, max_frame_bytes).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!("connection closed (EOF)");
                return Ok(());
            }
            Err(FrameCodecError::PayloadTooLarge { len, max }) => {
                return Err(format!("frame too large: {len} > {max}"));
            }
            Err(e) => return Err(format!("frame read error: {e}")),
        };

        let request = match graph_wire::decode(&payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(%e, "failed to decode request, ignoring frame");
                continue;
            }
        };

        let response = dispatch(dispatcher, state, &request).await;
        let encoded = graph_wire::encode(&response);
        let framed = encode_frame(&encoded, max_frame_bytes).map_err(|e| e.to_string())?;
        if tx.send(framed).await.is_err() {
            return Ok(());
        }
    }
}
