// scorewatch/src/api.rs
//
// Query API: the transport the dashboard front end talks to.
//
// One TCP connection is one dashboard session. Frames on a connection are
// handled strictly in order by the connection's task, so a session's graph
// is never touched concurrently. Sessions share only the DatasetSource and
// the AnnotationStore.
//
// Frame format (both directions):
//   [4 bytes little-endian length] [JSON payload]
//
// Request:  {"op": "select_account", "account": "Abernathy"}
// Response: {"ok": true, "data": ..., "error": null}

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::annotate::AnnotationStore;
use crate::model::{DateRange, Label, MetricKind};
use crate::selection::SelectionState;
use crate::session::Session;

pub const MAX_FRAME: usize = 1_048_576;

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    SelectAccount  { account: String },
    SetDates       { start: NaiveDate, end: NaiveDate },
    SetSample      { size: usize },
    SetMetric      { metric: MetricKind },
    SelectRow      { row: usize },
    ClearSelection,
    Resample,
    Annotate       { label: Label },
    View,
    Status,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok:    bool,
    pub data:  Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Response {
    fn success(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(v)  => Self { ok: true, data: Some(v), error: None },
            Err(e) => Self::failure(e),
        }
    }

    fn done() -> Self {
        Self { ok: true, data: None, error: None }
    }

    fn failure(e: impl std::fmt::Display) -> Self {
        Self { ok: false, data: None, error: Some(e.to_string()) }
    }
}

/// Apply one request to a session.
pub fn dispatch(session: &mut Session, req: Request) -> Response {
    match req {
        Request::SelectAccount { account } => match session.set_account(&account) {
            Ok(())  => Response::done(),
            Err(e)  => Response::failure(e),
        },
        Request::SetDates { start, end } => match DateRange::new(start, end) {
            Some(r) => { session.set_date_range(r); Response::done() }
            None    => Response::failure(format!("start {} is after end {}", start, end)),
        },
        Request::SetSample { size } => match session.set_sample_size(size) {
            Ok(())  => Response::done(),
            Err(e)  => Response::failure(e),
        },
        Request::SetMetric { metric } => { session.set_metric(metric); Response::done() }
        Request::SelectRow { row } => match session.select_row(row) {
            Ok(id)  => Response::success(serde_json::json!({ "id": id })),
            Err(e)  => Response::failure(e),
        },
        Request::ClearSelection => { session.clear_selection(); Response::done() }
        Request::Resample       => { session.resample(); Response::done() }
        Request::Annotate { label } => match session.annotate_selected(label) {
            Ok(out) => Response::success(out),
            Err(e)  => Response::failure(e),
        },
        Request::View => match session.view() {
            Ok(v)   => Response::success(v),
            Err(e)  => Response::failure(e),
        },
        Request::Status => Response::success(session.status()),
    }
}

// ── Framing ───────────────────────────────────────────────────────────────────

/// Read one frame. Ok(None) on a clean close between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME { anyhow::bail!("frame too large: {} bytes", len); }

    let mut body = vec![0u8; len];
    r.read_exact(&mut body).await?;
    Ok(Some(body))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME { anyhow::bail!("frame too large: {} bytes", payload.len()); }
    w.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    w.write_all(payload).await?;
    w.flush().await?;
    Ok(())
}

// ── Server ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub peer:      String,
    pub opened_at: DateTime<Utc>,
    pub requests:  u64,
}

pub struct QueryServer {
    store:    Arc<AnnotationStore>,
    addr:     SocketAddr,
    seed:     Option<u64>,
    defaults: SelectionState,
    next_id:  AtomicU64,
    pub sessions: DashMap<u64, SessionInfo>,
}

impl QueryServer {
    /// `defaults` is the selection every new session starts from.
    pub fn new(store: Arc<AnnotationStore>, addr: SocketAddr, seed: Option<u64>, defaults: SelectionState) -> Self {
        Self {
            store, addr, seed, defaults,
            next_id:  AtomicU64::new(1),
            sessions: DashMap::new(),
        }
    }

    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Query API listening on {}", listener.local_addr()?);
        self.accept_loop(listener).await
    }

    pub async fn accept_loop(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let srv = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = srv.handle_connection(stream, peer).await {
                    warn!("Query API connection error from {}: {}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Session::new(id, Arc::clone(&self.store), self.seed)
            .with_selection(self.defaults.clone());
        self.sessions.insert(id, SessionInfo {
            peer:      peer.to_string(),
            opened_at: Utc::now(),
            requests:  0,
        });
        info!("Session {} opened from {}", id, peer);

        let result = self.session_loop(session, &mut stream).await;

        self.sessions.remove(&id);
        info!("Session {} closed", id);
        result
    }

    /// Requests run on the blocking pool: annotation does file IO under the
    /// writer lock and large samples are CPU bound. The session moves into
    /// the task and back out, so it is still touched by one request at a time.
    async fn session_loop(&self, mut session: Session, stream: &mut TcpStream) -> Result<()> {
        let id = session.id;
        while let Some(body) = read_frame(stream).await? {
            let (back, resp) = tokio::task::spawn_blocking(move || {
                let resp = match serde_json::from_slice::<Request>(&body) {
                    Ok(req) => dispatch(&mut session, req),
                    Err(e)  => Response::failure(format!("bad request: {}", e)),
                };
                (session, resp)
            }).await?;
            session = back;

            if let Some(mut info) = self.sessions.get_mut(&id) {
                info.requests += 1;
            }
            write_frame(stream, &serde_json::to_vec(&resp)?).await?;
        }
        Ok(())
    }

    pub fn n_sessions(&self) -> usize { self.sessions.len() }
}
