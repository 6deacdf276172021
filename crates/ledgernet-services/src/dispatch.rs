//! Routes inbound sessions to request handlers.
//!
//! Each accepted connection gets its own task. The task reads the 2-byte
//! session tag, looks up the handler for it and lets the handler drive the
//! rest of the exchange. Unknown tags, decode failures and handler errors
//! all end the same way: the connection is closed without a response.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use ledgernet_core::crypto::CryptoError;
use ledgernet_core::message::{PrivateDataRequest, PrivateFileRequest, SubNodeDataRequest};
use ledgernet_core::wire::{read_raw_type_tag, send_message, MAX_FRAME_LEN};
use ledgernet_core::{RequestType, WireError, WireMessage};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::block_collection::BlockCollectionHandler;
use crate::context::NodeContext;
use crate::control::{ConfirmationHandler, StopNetworkHandler};
use crate::disseminator::{FullNodesHandler, NotFullNodesHandler};
use crate::max_block::MaxBlockHandler;
use crate::relay::RelayHandler;
use crate::storage::StorageError;
use crate::voting::{CandidateVotingHandler, NodeConnectionBroadcastHandler};

/// Anything a session can run over: a TCP stream in production, an
/// in-memory duplex pipe in tests.
pub trait PeerStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> PeerStream for T {}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Drives one session after its tag has been read.
pub trait RequestHandler: Send + Sync {
    fn handle<'a>(&'a self, stream: &'a mut dyn PeerStream)
        -> BoxFuture<'a, Result<(), HandlerError>>;
}

/// A handler with exactly one request and at most one response.
pub trait UnaryHandler: Send + Sync {
    type Request: WireMessage + Send;
    type Response: WireMessage + Send + Sync;

    /// `Ok(None)` closes the session without writing anything.
    fn respond(&self, request: Self::Request) -> Result<Option<Self::Response>, HandlerError>;

    /// Cap on the request's variable-length payload.
    fn max_request_len(&self) -> usize {
        MAX_FRAME_LEN
    }
}

/// Adapts a `UnaryHandler` to the session-driving `RequestHandler`.
pub struct Unary<H>(pub H);

impl<H: UnaryHandler> RequestHandler for Unary<H> {
    fn handle<'a>(
        &'a self,
        stream: &'a mut dyn PeerStream,
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            let max = self.0.max_request_len();
            let Some(request) = within_limit(H::Request::decode_with_max(&mut *stream, max).await)?
            else {
                return Ok(());
            };
            if let Some(response) = self.0.respond(request)? {
                send_message(&mut *stream, &response).await?;
            }
            Ok(())
        })
    }
}

/// `Ok(None)` for a size-limit violation, which is logged and otherwise
/// treated as an empty read.
pub(crate) fn within_limit<T>(read: Result<T, WireError>) -> Result<Option<T>, HandlerError> {
    match read {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_size_exceeded() => {
            tracing::warn!(error = %e, "request payload over limit, ignoring");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Maps session tags to handlers.
#[derive(Default)]
pub struct RequestDispatcher {
    routes: HashMap<RequestType, Arc<dyn RequestHandler>>,
}

impl RequestDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request type wired to this node's handlers.
    pub fn for_node(ctx: Arc<NodeContext>) -> Self {
        let mut d = Self::new();
        let c = || ctx.clone();
        d.register(RequestType::FullNodes, Arc::new(FullNodesHandler::new(c())));
        d.register(RequestType::NotFullNodes, Arc::new(NotFullNodesHandler::new(c())));
        d.register(RequestType::StopNetwork, Arc::new(Unary(StopNetworkHandler::new(c()))));
        d.register(RequestType::Confirmation, Arc::new(Unary(ConfirmationHandler::new(c()))));
        d.register(RequestType::BlockCollection, Arc::new(BlockCollectionHandler::new(c())));
        d.register(RequestType::MaxBlock, Arc::new(Unary(MaxBlockHandler::new(c()))));
        d.register(
            RequestType::PrivateData,
            Arc::new(Unary(RelayHandler::<PrivateDataRequest>::new(c()))),
        );
        d.register(
            RequestType::PrivateFile,
            Arc::new(Unary(RelayHandler::<PrivateFileRequest>::new(c()))),
        );
        d.register(
            RequestType::SubNodeData,
            Arc::new(Unary(RelayHandler::<SubNodeDataRequest>::new(c()))),
        );
        d.register(
            RequestType::CandidateVoting,
            Arc::new(Unary(CandidateVotingHandler::new(c()))),
        );
        d.register(
            RequestType::NodeConnectionBroadcast,
            Arc::new(Unary(NodeConnectionBroadcastHandler::new(c()))),
        );
        d
    }

    pub fn register(&mut self, request_type: RequestType, handler: Arc<dyn RequestHandler>) {
        self.routes.insert(request_type, handler);
    }

    pub fn handles(&self, request_type: RequestType) -> bool {
        self.routes.contains_key(&request_type)
    }

    /// Request types with no registered handler.
    pub fn unrouted(&self) -> Vec<RequestType> {
        RequestType::ALL
            .into_iter()
            .filter(|t| !self.handles(*t))
            .collect()
    }

    /// Run one session: tag, route, handle.
    pub async fn dispatch(&self, stream: &mut dyn PeerStream) -> Result<RequestType, HandlerError> {
        let raw = read_raw_type_tag(&mut *stream).await?;
        let request_type = RequestType::try_from(raw)?;
        let handler = self
            .routes
            .get(&request_type)
            .ok_or(WireError::UnknownRequestType(raw))?;
        handler.handle(stream).await?;
        Ok(request_type)
    }
}

/// Accept loop bound to a TCP listener.
pub struct Server {
    listener: TcpListener,
    dispatcher: Arc<RequestDispatcher>,
    session_timeout: Duration,
}

impl Server {
    pub async fn bind(
        addr: &str,
        dispatcher: Arc<RequestDispatcher>,
        session_timeout: Duration,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            dispatcher,
            session_timeout,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until shutdown. One task per connection; in-flight sessions
    /// finish on their own deadline.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "request dispatcher listening");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("request dispatcher shutting down");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let Some((stream, peer)) = accepted_or_pause(accepted).await else {
                        continue;
                    };
                    let dispatcher = self.dispatcher.clone();
                    let deadline = self.session_timeout;
                    tokio::spawn(serve_connection(dispatcher, stream, peer, deadline));
                }
            }
        }
    }
}

/// Pause after a failed accept; errors like EMFILE persist until sessions
/// close.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

async fn accepted_or_pause<T>(accepted: std::io::Result<T>) -> Option<T> {
    match accepted {
        Ok(a) => Some(a),
        Err(e) => {
            tracing::warn!(error = %e, "accept failed");
            tokio::time::sleep(ACCEPT_BACKOFF).await;
            None
        }
    }
}

async fn serve_connection(
    dispatcher: Arc<RequestDispatcher>,
    mut stream: TcpStream,
    peer: SocketAddr,
    deadline: Duration,
) {
    match timeout(deadline, dispatcher.dispatch(&mut stream)).await {
        Ok(Ok(request_type)) => {
            tracing::trace!(%peer, %request_type, "session complete");
        }
        Ok(Err(HandlerError::Wire(WireError::UnknownRequestType(tag)))) => {
            tracing::warn!(%peer, tag, "unknown request type, closing");
        }
        Ok(Err(e)) => {
            tracing::debug!(%peer, error = %e, "session closed without response");
        }
        Err(_) => {
            tracing::debug!(%peer, "session deadline exceeded");
        }
    }
}
