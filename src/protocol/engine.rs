//! Protocol engine
//!
//! Writes the handshake, then reads requests on a dedicated thread and
//! handles each one in its own task. Responses go out in completion order,
//! one line per response, under a single writer lock. When the input ends,
//! a `close` arrives, the shutdown token fires, or the stream breaks, the
//! engine stops reading, waits for in-flight requests and pending uploads,
//! and logs the counters.

use super::framing::FrameReader;
use super::wire::{Command, Request, Response};
use crate::coordinator::{Coordinator, GetOutcome};
use crate::error::{ProxyError, ProxyResult};
use std::io::{Cursor, Read};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Requests buffered between the reader thread and the dispatcher
const FRAME_BUFFER: usize = 64;

pub struct Engine {
    coordinator: Arc<Coordinator>,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(coordinator: Coordinator, shutdown: CancellationToken) -> Self {
        Self {
            coordinator: Arc::new(coordinator),
            shutdown,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Serve the protocol on the process's stdin and stdout
    pub async fn serve_stdio(&self) -> ProxyResult<()> {
        let stdout = tokio::io::BufWriter::new(tokio::io::stdout());
        self.serve(std::io::stdin(), stdout).await.map(|_| ())
    }

    /// Serve one session over `input` and `output`.
    ///
    /// Returns the writer once every response is written and every upload has
    /// settled. A broken input stream is reported as an error, but only after
    /// the same drain.
    pub async fn serve<R, W>(&self, input: R, output: W) -> ProxyResult<W>
    where
        R: Read + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer = Arc::new(Mutex::new(output));
        write_frame(&writer, &Response::handshake()).await?;

        let (tx, mut frames) = mpsc::channel(FRAME_BUFFER);
        std::thread::Builder::new()
            .name("cacheprog-stdin".to_string())
            .spawn(move || read_frames(input, tx))
            .map_err(|e| ProxyError::io("spawning request reader", e))?;

        let mut tasks = JoinSet::new();
        let outcome = loop {
            let frame = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested, draining");
                    break Ok(());
                }
                frame = frames.recv() => frame,
            };

            match frame {
                None => {
                    debug!("End of input");
                    break Ok(());
                }
                Some(Ok(req)) => {
                    let closing = req.command == Command::Close;
                    self.spawn_request(&mut tasks, req, &writer);
                    if closing {
                        debug!("Close received");
                        break Ok(());
                    }
                }
                Some(Err(e)) => {
                    if e.is_fatal() {
                        error!("Input stream desynchronized: {}", e);
                    } else {
                        error!("Undecodable request: {}", e);
                    }
                    break Err(e);
                }
            }

            while let Some(joined) = tasks.try_join_next() {
                log_join(joined);
            }
        };
        drop(frames);

        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
        self.coordinator.drain_uploads().await;
        info!("{}", self.coordinator.metrics().snapshot());

        let output = Arc::try_unwrap(writer)
            .map_err(|_| ProxyError::Internal("response writer still shared".to_string()))?
            .into_inner();
        outcome.map(|()| output)
    }

    fn spawn_request<W>(&self, tasks: &mut JoinSet<()>, req: Request, writer: &Arc<Mutex<W>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let coordinator = Arc::clone(&self.coordinator);
        let writer = Arc::clone(writer);
        let cancel = self.shutdown.child_token();

        tasks.spawn(async move {
            let res = handle_request(&coordinator, req, &cancel).await;
            if let Err(e) = write_frame(&writer, &res).await {
                error!("Writing response {}: {}", res.id, e);
            }
        });
    }
}

/// Produce the response for one request; never fails
async fn handle_request(
    coordinator: &Coordinator,
    req: Request,
    cancel: &CancellationToken,
) -> Response {
    let mut res = Response::for_request(req.id);
    let command = req.command.clone();
    if let Err(e) = dispatch(coordinator, req, &mut res, cancel).await {
        warn!("{} {}: {}", command, res.id, e);
        res.err = Some(e.to_string());
    }
    res
}

async fn dispatch(
    coordinator: &Coordinator,
    req: Request,
    res: &mut Response,
    cancel: &CancellationToken,
) -> ProxyResult<()> {
    match req.command {
        Command::Close => Ok(()),
        Command::Get => match coordinator.get(&req.action_id, cancel).await {
            Ok(GetOutcome::Hit(hit)) => {
                res.output_id = hit.output_id;
                res.size = hit.size as i64;
                res.time_nanos = hit.mod_time_nanos;
                res.disk_path = hit.path.to_string_lossy().into_owned();
                Ok(())
            }
            Ok(GetOutcome::Miss) => {
                res.miss = true;
                Ok(())
            }
            Err(e) => {
                res.miss = true;
                Err(e)
            }
        },
        Command::Put => {
            if req.body_size < 0 {
                return Err(ProxyError::InvalidBodySize(req.body_size));
            }
            let body = Cursor::new(req.body.unwrap_or_default());
            let path = coordinator
                .put(&req.action_id, &req.object_id, req.body_size as u64, body)
                .await?;
            res.size = req.body_size;
            res.disk_path = path.to_string_lossy().into_owned();
            Ok(())
        }
        Command::Unknown(name) => Err(ProxyError::UnknownCommand(name)),
    }
}

/// Reader thread: forward decoded requests until end of input or the first
/// error. Blocking stdin reads stay off the runtime so shutdown never waits
/// on them.
fn read_frames<R: Read>(input: R, tx: mpsc::Sender<ProxyResult<Request>>) {
    let mut frames = FrameReader::new(input);
    loop {
        match frames.next_request() {
            Ok(Some(req)) => {
                if tx.blocking_send(Ok(req)).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        }
    }
}

async fn write_frame<W>(writer: &Mutex<W>, res: &Response) -> ProxyResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(res)?;
    line.push(b'\n');

    let mut out = writer.lock().await;
    out.write_all(&line)
        .await
        .map_err(|e| ProxyError::io("writing response", e))?;
    out.flush()
        .await
        .map_err(|e| ProxyError::io("flushing response", e))
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!("Request task failed: {}", e);
    }
}
