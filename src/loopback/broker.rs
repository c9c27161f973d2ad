//! Broker task owning the stream, subscriptions and waiting pulls.

use std::{
    collections::{HashMap, VecDeque},
    future,
};

use tokio::{
    sync::mpsc,
    time::{self, Duration, Instant},
};
use tracing::{debug, trace, warn};

use super::{BrokerStats, Command, LoopbackConfig};
use crate::{
    frame::{Frame, Headers, Message, Status},
    pull::PullRequest,
    status::{
        BAD_REQUEST_CODE,
        BAD_REQUEST_TEXT,
        BATCH_COMPLETED_TEXT,
        CONFLICT_CODE,
        EXCEEDED_MAX_REQUEST_BATCH_TEXT,
        EXCEEDED_MAX_REQUEST_EXPIRES_TEXT,
        EXCEEDED_MAX_REQUEST_MAX_BYTES_TEXT,
        EXCEEDED_MAX_WAITING_TEXT,
        HEARTBEAT_CODE,
        IDLE_HEARTBEAT_TEXT,
        MESSAGE_SIZE_EXCEEDS_MAX_BYTES_TEXT,
        NO_MESSAGES_TEXT,
        NOT_FOUND_CODE,
        PENDING_BYTES_HEADER,
        PENDING_MESSAGES_HEADER,
        REQUEST_TIMEOUT_CODE,
        REQUEST_TIMEOUT_TEXT,
    },
};

/// A pull request waiting for messages.
#[derive(Debug)]
struct WaitingPull {
    inbox: String,
    remaining_messages: u64,
    /// `None` when the request carries no byte budget.
    remaining_bytes: Option<u64>,
    delivered_any: bool,
    expires_at: Option<Instant>,
    heartbeat: Option<Duration>,
    next_heartbeat: Option<Instant>,
}

impl WaitingPull {
    fn new(inbox: String, request: &PullRequest, now: Instant, heartbeats: bool) -> Self {
        let heartbeat = request.idle_heartbeat().filter(|_| heartbeats);
        Self {
            inbox,
            remaining_messages: request.batch_size() as u64,
            remaining_bytes: (request.max_bytes() > 0).then_some(request.max_bytes()),
            delivered_any: false,
            expires_at: request.expires_in().map(|expires| now + expires),
            heartbeat,
            next_heartbeat: heartbeat.map(|hb| now + hb),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.expires_at, self.next_heartbeat) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Status ending this pull, carrying its unfulfilled counts.
    fn terminus(&self, code: u16, text: &str) -> Status {
        Status::new(code, text).with_headers(
            Headers::new()
                .with(PENDING_MESSAGES_HEADER, self.remaining_messages.to_string())
                .with(
                    PENDING_BYTES_HEADER,
                    self.remaining_bytes.unwrap_or(0).to_string(),
                ),
        )
    }
}

/// Status refusing `request` outright, returning its full demand.
fn refusal(request: &PullRequest, code: u16, text: String) -> Status {
    Status::new(code, text).with_headers(
        Headers::new()
            .with(PENDING_MESSAGES_HEADER, request.batch_size().to_string())
            .with(PENDING_BYTES_HEADER, request.max_bytes().to_string()),
    )
}

#[derive(Debug)]
struct BrokerState {
    config: LoopbackConfig,
    stream: Vec<Message>,
    cursor: usize,
    feeds: HashMap<String, mpsc::Sender<Frame>>,
    waiting: VecDeque<WaitingPull>,
    pull_log: Vec<PullRequest>,
    delivered: u64,
}

impl BrokerState {
    fn new(config: LoopbackConfig) -> Self {
        Self {
            config,
            stream: Vec::new(),
            cursor: 0,
            feeds: HashMap::new(),
            waiting: VecDeque::new(),
            pull_log: Vec::new(),
            delivered: 0,
        }
    }

    fn stats(&self) -> BrokerStats {
        BrokerStats {
            published: self.stream.len() as u64,
            delivered: self.delivered,
            pull_requests: self.pull_log.len() as u64,
            waiting: self.waiting.len(),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.waiting.iter().filter_map(WaitingPull::next_deadline).min()
    }

    /// Send `frame` to `inbox`, forgetting the subscription once its feed is
    /// gone.
    async fn send(&mut self, inbox: &str, frame: Frame) {
        let Some(feed) = self.feeds.get(inbox) else {
            trace!(inbox, "frame for unknown inbox dropped");
            return;
        };
        if feed.send(frame).await.is_err() {
            debug!(inbox, "feed closed; dropping subscription");
            self.forget(inbox);
        }
    }

    fn forget(&mut self, inbox: &str) {
        self.feeds.remove(inbox);
        self.waiting.retain(|pull| pull.inbox != inbox);
    }

    async fn apply(&mut self, command: Command) {
        match command {
            Command::Publish(message) => {
                trace!(subject = message.subject(), "message published");
                self.stream.push(message);
                self.deliver().await;
            }
            Command::Register { inbox, feed } => {
                debug!(inbox = %inbox, "subscription registered");
                self.feeds.insert(inbox, feed);
            }
            Command::Pull { inbox, body } => match PullRequest::from_json(&body) {
                Ok(request) => self.pull(inbox, request).await,
                Err(e) => {
                    warn!(inbox = %inbox, error = %e, "undecodable pull request");
                    self.send(&inbox, Status::new(BAD_REQUEST_CODE, BAD_REQUEST_TEXT).into())
                        .await;
                }
            },
            Command::Unsubscribe { inbox } => {
                debug!(inbox = %inbox, "subscription removed");
                self.forget(&inbox);
            }
            Command::Inject { inbox, frame } => self.send(&inbox, frame).await,
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            Command::PullLog(reply) => {
                let _ = reply.send(self.pull_log.clone());
            }
        }
    }

    /// Reason `request` must be refused, if any.
    fn check_limits(&self, request: &PullRequest) -> Option<Status> {
        if request.is_no_wait() && request.idle_heartbeat().is_some() {
            return Some(refusal(
                request,
                BAD_REQUEST_CODE,
                BAD_REQUEST_TEXT.to_owned(),
            ));
        }
        let config = &self.config;
        if let Some(max) = config.max_batch
            && request.batch_size() > max
        {
            return Some(refusal(
                request,
                CONFLICT_CODE,
                format!("{EXCEEDED_MAX_REQUEST_BATCH_TEXT} of {max}"),
            ));
        }
        if let Some(max) = config.max_bytes
            && request.max_bytes() > max
        {
            return Some(refusal(
                request,
                CONFLICT_CODE,
                format!("{EXCEEDED_MAX_REQUEST_MAX_BYTES_TEXT} of {max}"),
            ));
        }
        if let (Some(max), Some(expires)) = (config.max_expires, request.expires_in())
            && expires > max
        {
            return Some(refusal(
                request,
                CONFLICT_CODE,
                format!("{EXCEEDED_MAX_REQUEST_EXPIRES_TEXT} of {max:?}"),
            ));
        }
        if let Some(max) = config.max_waiting
            && !request.is_no_wait()
            && self.waiting.len() >= max
        {
            return Some(refusal(
                request,
                CONFLICT_CODE,
                EXCEEDED_MAX_WAITING_TEXT.to_owned(),
            ));
        }
        None
    }

    async fn pull(&mut self, inbox: String, request: PullRequest) {
        self.pull_log.push(request.clone());
        if !self.feeds.contains_key(&inbox) {
            debug!(inbox = %inbox, "pull for unknown inbox ignored");
            return;
        }
        if let Some(status) = self.check_limits(&request) {
            debug!(inbox = %inbox, code = status.code(), text = status.text(), "pull refused");
            self.send(&inbox, status.into()).await;
            return;
        }
        let no_wait = request.is_no_wait();
        self.waiting.push_back(WaitingPull::new(
            inbox.clone(),
            &request,
            Instant::now(),
            self.config.heartbeats,
        ));
        self.deliver().await;
        if no_wait {
            self.end_no_wait(&inbox).await;
        }
    }

    /// End the no-wait pull for `inbox` if messages ran out before its batch
    /// was filled.
    async fn end_no_wait(&mut self, inbox: &str) {
        let Some(index) = self.waiting.iter().rposition(|pull| pull.inbox == inbox) else {
            return;
        };
        if let Some(pull) = self.waiting.remove(index) {
            let status = pull.terminus(NOT_FOUND_CODE, NO_MESSAGES_TEXT);
            self.send(inbox, status.into()).await;
        }
    }

    /// Hand stream messages to waiting pulls in arrival order.
    async fn deliver(&mut self) {
        while self.cursor < self.stream.len() {
            let Some(pull) = self.waiting.front_mut() else {
                return;
            };
            let message = self.stream[self.cursor].clone();
            let size = message.estimated_size() as u64;

            if let Some(remaining) = pull.remaining_bytes
                && size > remaining
            {
                let text = if pull.delivered_any {
                    BATCH_COMPLETED_TEXT
                } else {
                    MESSAGE_SIZE_EXCEEDS_MAX_BYTES_TEXT
                };
                let status = pull.terminus(CONFLICT_CODE, text);
                let inbox = pull.inbox.clone();
                self.waiting.pop_front();
                self.send(&inbox, status.into()).await;
                continue;
            }

            pull.remaining_messages -= 1;
            pull.delivered_any = true;
            if let Some(remaining) = pull.remaining_bytes.as_mut() {
                *remaining -= size;
            }
            if let Some(hb) = pull.heartbeat {
                pull.next_heartbeat = Some(Instant::now() + hb);
            }
            let inbox = pull.inbox.clone();
            let filled = pull.remaining_messages == 0;
            let budget_spent = pull.remaining_bytes == Some(0);
            let completed = budget_spent.then(|| pull.terminus(CONFLICT_CODE, BATCH_COMPLETED_TEXT));
            if filled || budget_spent {
                self.waiting.pop_front();
            }

            self.cursor += 1;
            self.delivered += 1;
            self.send(&inbox, message.into()).await;
            if let Some(status) = completed.filter(|_| !filled) {
                self.send(&inbox, status.into()).await;
            }
        }
    }

    /// Expire pulls and emit heartbeats that are due at `now`.
    async fn fire_timers(&mut self, now: Instant) {
        let mut frames = Vec::new();
        self.waiting.retain_mut(|pull| {
            if pull.expires_at.is_some_and(|at| at <= now) {
                frames.push((
                    pull.inbox.clone(),
                    Frame::from(pull.terminus(REQUEST_TIMEOUT_CODE, REQUEST_TIMEOUT_TEXT)),
                ));
                return false;
            }
            if let (Some(at), Some(hb)) = (pull.next_heartbeat, pull.heartbeat)
                && at <= now
            {
                frames.push((
                    pull.inbox.clone(),
                    Frame::from(Status::new(HEARTBEAT_CODE, IDLE_HEARTBEAT_TEXT)),
                ));
                pull.next_heartbeat = Some(now + hb);
            }
            true
        });
        for (inbox, frame) in frames {
            self.send(&inbox, frame).await;
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

/// Serve commands until every broker handle is dropped.
pub(super) async fn run(config: LoopbackConfig, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut state = BrokerState::new(config);
    loop {
        let deadline = state.next_deadline();
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => state.apply(command).await,
                None => break,
            },
            () = sleep_until(deadline) => state.fire_timers(Instant::now()).await,
        }
    }
    debug!(stats = ?state.stats(), "loopback broker stopped");
}
