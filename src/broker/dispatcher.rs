// ABOUTME: Command dispatcher routing decoded requests to registry, executors and retry
//
// Every request produces at least one reply frame except `kill`. Unknown
// handle ids always come back as an explicit `not_found` failure.

use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use super::codec::{chunk_data, CreateRequest, Options, Reply, Request};
use super::error::{BrokerError, BrokerResult};
use super::executor::Session;
use super::registry::{Handle, HandleId, HandleState};
use super::retry::Attempt;
use super::state::BrokerState;

/// What the server should do after a request
#[derive(Debug)]
pub enum Outcome {
    /// Send these frames, then close the connection
    Reply(Vec<Reply>),
    /// Stop the worker without replying
    Kill,
}

impl Outcome {
    fn single(reply: Reply) -> Self {
        Self::Reply(vec![reply])
    }
}

/// Handle one decoded request against the worker state
pub async fn dispatch(state: &Arc<BrokerState>, request: Request) -> Outcome {
    let command = request.command();
    debug!(command = %command, "Dispatching");

    match request {
        Request::Create(create) => Outcome::single(create_handles(state, &create).await),
        Request::SetOptions { id, options } => {
            Outcome::single(reply_or_fail(&id, set_options(state, &id, options).await))
        }
        Request::Read { id } => Outcome::single(reply_or_fail(&id, start_read(state, &id).await)),
        Request::Write { id, data } => {
            Outcome::single(reply_or_fail(&id, write(state, &id, &data).await))
        }
        Request::FetchData { id } => match fetch_data(state, &id).await {
            Ok(frames) => Outcome::Reply(frames),
            Err(err) => Outcome::single(failure(Some(&id), &err)),
        },
        Request::Close { id } => {
            let reply = if state.registry.remove(&id).await {
                Reply::Accepted { id }
            } else {
                failure(Some(&id), &BrokerError::HandleNotFound(id.clone()))
            };
            Outcome::single(reply)
        }
        Request::List => Outcome::single(Reply::Listing(state.registry.list_all().await)),
        Request::Log => Outcome::single(Reply::Log {
            msg: state.log.pop(),
        }),
        Request::Kill => Outcome::Kill,
    }
}

/// Failure reply carrying the error's wire classification
pub fn failure(id: Option<&HandleId>, err: &BrokerError) -> Reply {
    Reply::failed(id.cloned(), err.kind(), err.to_string())
}

fn reply_or_fail(id: &HandleId, result: BrokerResult<Reply>) -> Reply {
    result.unwrap_or_else(|err| failure(Some(id), &err))
}

// === create ===

async fn create_handles(state: &Arc<BrokerState>, request: &CreateRequest) -> Reply {
    let first = match open_handle(state, request).await {
        Ok(id) => id,
        Err(err) => return create_failed(state, request, &err),
    };

    let second = if request.dual_link {
        match open_handle(state, request).await {
            Ok(id) => Some(id),
            Err(err) => {
                state.registry.remove(&first).await;
                return create_failed(state, request, &err);
            }
        }
    } else {
        None
    };

    info!(
        id = %first,
        id2 = ?second.as_ref().map(HandleId::as_str),
        protocol = %request.protocol,
        host = %request.host,
        "Handle created"
    );
    Reply::Created {
        id: first,
        id2: second,
    }
}

async fn open_handle(state: &BrokerState, request: &CreateRequest) -> BrokerResult<HandleId> {
    let (session, initial) = Session::open(request, state.limits).await?;

    let mut handle = Handle::new(HandleId::generate(), session);
    if initial.is_some() {
        handle.data = initial;
        handle.state = HandleState::DataReady;
    }
    state.registry.insert(handle).await
}

fn create_failed(state: &BrokerState, request: &CreateRequest, err: &BrokerError) -> Reply {
    warn!(
        protocol = %request.protocol,
        host = %request.host,
        port = request.port,
        error = %err,
        "Create failed"
    );
    state
        .log
        .push(format!("create {} {} failed: {err}", request.protocol, request.host));
    failure(None, err)
}

// === set-options / write ===

async fn set_options(state: &BrokerState, id: &HandleId, options: Options) -> BrokerResult<Reply> {
    let handle = state.registry.get(id).await?;
    let mut handle = handle.lock().await;
    let merged = handle.set_options(options, &state.chains)?;
    Ok(Reply::Options {
        id: id.clone(),
        options: merged,
    })
}

async fn write(state: &BrokerState, id: &HandleId, data: &[u8]) -> BrokerResult<Reply> {
    let handle = state.registry.get(id).await?;
    let mut handle = handle.lock().await;
    handle.session.write(data).await?;
    debug!(id = %id, bytes = data.len(), "Write forwarded");
    Ok(Reply::Accepted { id: id.clone() })
}

// === read ===

/// Take the handle lock, acknowledge, and finish the read in the background.
///
/// The lock is held until the read completes, so a following `fetch-data`
/// sees its result.
async fn start_read(state: &Arc<BrokerState>, id: &HandleId) -> BrokerResult<Reply> {
    let handle = state.registry.get(id).await?;
    let guard = handle.lock_owned().await;

    tokio::spawn(run_read(Arc::clone(state), guard));
    Ok(Reply::Accepted { id: id.clone() })
}

/// Chain-driven read loop for one handle; stops early when the worker is killed
pub async fn run_read(state: Arc<BrokerState>, mut handle: OwnedMutexGuard<Handle>) {
    let id = handle.id.clone();
    tokio::select! {
        () = read_rounds(&state, &mut handle) => {}
        () = state.stopped() => {
            debug!(id = %id, "Read cancelled by shutdown");
        }
    }
}

async fn read_rounds(state: &BrokerState, handle: &mut Handle) {
    let url = handle.session.target();
    let max_attempts = state.config.max_attempts;
    handle.state = HandleState::Reading;

    let mut rounds = 0u32;
    loop {
        if let Some(chain) = handle.chain.as_mut() {
            chain.next(&mut handle.options);
        }

        let outcome = state
            .retry
            .attempt(&url, max_attempts, &mut *handle, |h| Box::pin(h.read_once()))
            .await;

        if let Attempt::Success(bytes) = outcome {
            state.sink.save(&handle.id, &handle.meta(), &bytes);
            handle.data = Some(bytes);
            handle.state = HandleState::DataReady;
        } else {
            fail_read(state, handle, &url, outcome).await;
            return;
        }

        rounds += 1;
        let more = handle
            .chain
            .as_ref()
            .is_some_and(|chain| chain.order() < chain.turn());
        if !more {
            break;
        }
        if rounds >= state.config.max_chain_rounds {
            warn!(id = %handle.id, rounds, "Chain round cap reached");
            break;
        }
    }

    info!(id = %handle.id, url = %url, rounds, "Read complete");
}

async fn fail_read(state: &BrokerState, handle: &mut Handle, url: &str, outcome: Attempt) {
    let reason = match &outcome {
        Attempt::Exhausted { url, attempts, .. } => BrokerError::RetryExhausted {
            url: url.clone(),
            attempts: *attempts,
        }
        .to_string(),
        Attempt::Fatal(err) => err.to_string(),
        Attempt::Success(_) => String::new(),
    };
    let payload = outcome.into_payload();

    handle.state = HandleState::Failed;
    state.sink.save(&handle.id, &handle.meta(), &payload);
    handle.data = Some(payload);
    handle.close().await;

    warn!(id = %handle.id, url = %url, reason = %reason, "Read failed");
    state.log.push(format!("read {} {url} failed: {reason}", handle.id));
}

// === fetch-data ===

async fn fetch_data(state: &BrokerState, id: &HandleId) -> BrokerResult<Vec<Reply>> {
    let handle = state.registry.get(id).await?;
    let handle = handle.lock().await;
    Ok(
        chunk_data(id, handle.data.as_deref(), state.config.chunk_size)
            .into_iter()
            .map(Reply::Data)
            .collect(),
    )
}
