//! HTTP server that stores encrypted files and decrypts byte ranges on download.
//!
//! The server never sees plaintext at rest: a download request carries the token
//! that unlocks one file, and decryption happens while the response is streamed.

mod download;
pub mod error;
pub mod keys;
pub mod signal;
pub mod storage;
mod upload;

use {
    crate::{error::ServeError, keys::UploadKeys, storage::Storage},
    anyhow::{Context as _, Result},
    byte_unit::Byte,
    bytes::Bytes,
    derivative::Derivative,
    filecrypt_protocol::{UploadKey, util::deserialize_byte_size},
    http_body_util::combinators::BoxBody,
    hyper::{Method, Request, Response, body::Incoming, server::conn::http1, service::service_fn},
    hyper_util::{rt::TokioIo, server::graceful::GracefulShutdown},
    percent_encoding::percent_decode_str,
    serde::{Deserialize, Serialize},
    std::{
        borrow::Cow,
        convert::Infallible,
        error::Error as _,
        future::Future,
        io,
        net::SocketAddr,
        path::{Path, PathBuf},
        pin::pin,
        sync::Arc,
        time::Duration,
    },
    tokio::{net::TcpListener, time::timeout},
    tracing::{Instrument, debug, info, info_span, warn},
};

pub type Body = BoxBody<Bytes, Infallible>;

#[derive(Derivative, Clone, Serialize, Deserialize)]
#[derivative(Debug)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub storage_path: PathBuf,
    #[serde(
        default = "default_max_upload_size",
        deserialize_with = "deserialize_byte_size"
    )]
    pub max_upload_size: Byte,
    #[serde(
        default = "default_max_chunk_size",
        deserialize_with = "deserialize_byte_size"
    )]
    pub max_chunk_size: Byte,
    #[derivative(Debug = "ignore")]
    #[serde(default)]
    pub upload_keys: Vec<UploadKey>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// How long open connections may take to finish after a shutdown signal.
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

fn default_max_upload_size() -> Byte {
    Byte::from_u64(10_000_000_000)
}

fn default_max_chunk_size() -> Byte {
    Byte::from_u64(64_000_000)
}

fn default_log_filter() -> String {
    "info".into()
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Config {
    pub fn parse(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        json5::from_str(&fs_err::read_to_string(path)?)
            .with_context(|| format!("invalid config file {path:?}"))
    }
}

#[derive(Debug, Clone)]
struct Context {
    storage: Arc<Storage>,
    keys: Arc<UploadKeys>,
    max_upload_size: u64,
    max_chunk_size: u64,
}

/// Binds `config.bind_addr` and serves until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    serve(config, listener, signal::shutdown_requested()).await
}

/// Serves requests on `listener` until `shutdown` completes.
///
/// Connections that are still open at that point get `config.shutdown_timeout`
/// to finish.
pub async fn serve(
    config: Config,
    listener: TcpListener,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let ctx = Context {
        storage: Arc::new(Storage::new(config.storage_path.clone())?),
        keys: Arc::new(UploadKeys::new(config.upload_keys.iter().cloned())?),
        max_upload_size: config.max_upload_size.as_u64(),
        max_chunk_size: config.max_chunk_size.as_u64(),
    };
    if ctx.keys.is_empty() {
        warn!("no upload keys configured, uploads are disabled");
    }
    info!(addr = %listener.local_addr()?, "listening");

    let graceful = GracefulShutdown::new();
    let mut shutdown = pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let ctx = ctx.clone();
                    let connection = http1::Builder::new().keep_alive(true).serve_connection(
                        TokioIo::new(stream),
                        service_fn(move |request| handle_request(ctx.clone(), request)),
                    );
                    let connection = graceful.watch(connection);
                    tokio::spawn(
                        async move {
                            if let Err(err) = connection.await {
                                log_connection_error(&err);
                            }
                        }
                        .instrument(info_span!("connection", %remote)),
                    );
                }
                Err(err) => warn!(?err, "failed to accept"),
            },
            () = &mut shutdown => break,
        }
    }

    drop(listener);
    if timeout(config.shutdown_timeout, graceful.shutdown())
        .await
        .is_err()
    {
        warn!("some connections were still open at shutdown");
    }
    info!("server stopped");
    Ok(())
}

fn log_connection_error(err: &hyper::Error) {
    if let Some(io_err) = err.source().and_then(|err| err.downcast_ref::<io::Error>()) {
        match io_err.kind() {
            io::ErrorKind::NotConnected | io::ErrorKind::ConnectionReset => {
                debug!(error = ?io_err, "canceled request");
            }
            _ => warn!(error = ?io_err, "error while serving"),
        }
    } else if err.is_incomplete_message() {
        debug!(error = ?err, "interrupted request");
    } else {
        warn!(error = ?err, "failed to serve HTTP");
    }
}

async fn handle_request(
    ctx: Context,
    request: Request<Incoming>,
) -> Result<Response<Body>, Infallible> {
    Ok(try_handle_request(&ctx, request)
        .await
        .unwrap_or_else(ServeError::into_response))
}

fn decode_segment(segment: &str) -> Result<Cow<'_, str>, ServeError> {
    percent_decode_str(segment).decode_utf8().map_err(|err| {
        warn!(%err, "path segment is not valid UTF-8");
        ServeError::MalformedIdentifier
    })
}

async fn try_handle_request(
    ctx: &Context,
    request: Request<Incoming>,
) -> Result<Response<Body>, ServeError> {
    let path = request.uri().path().to_owned();
    let segments = path
        .strip_prefix('/')
        .unwrap_or(&path)
        .split('/')
        .map(decode_segment)
        .collect::<Result<Vec<_>, _>>()?;

    let method = request.method().clone();
    match (&method, segments.as_slice()) {
        (&Method::GET, [file_id, token, filename]) => {
            download::download(ctx, request.headers(), file_id, token, filename).await
        }
        (&Method::POST, [key_id, file_id, mac, chunk_hash]) => {
            upload::upload(ctx, request, key_id, file_id, mac, chunk_hash).await
        }
        _ => {
            debug!(%method, "no route");
            Err(ServeError::NotFound)
        }
    }
}
