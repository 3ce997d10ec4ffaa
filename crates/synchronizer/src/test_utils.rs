use crate::decoder::supernets2_abi;
use crate::{
    CommitteeMember, ContentKey, Error, EventStream, L1Client, MemberClient, OffChainData,
    RawEvent, Result,
};
use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, H256, U256};
use futures::stream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

pub fn member(i: u8) -> CommitteeMember {
    CommitteeMember {
        address: Address::repeat_byte(i),
        url: format!("http://member-{i}:8444"),
    }
}

pub fn raw_event(block_number: u64, call_data: &[u8]) -> RawEvent {
    RawEvent {
        block_number,
        tx_hash: H256::from_low_u64_be(block_number),
        call_data: call_data.to_vec().into(),
    }
}

/// Input of a `sequenceBatches` call sequencing one batch per key.
pub fn sequence_batches_call_data(keys: &[ContentKey]) -> Vec<u8> {
    let batches = keys
        .iter()
        .enumerate()
        .map(|(i, key)| {
            Token::Tuple(vec![
                Token::FixedBytes(key.as_bytes().to_vec()),
                Token::FixedBytes(H256::zero().as_bytes().to_vec()),
                Token::Uint(U256::from(1_700_000_000u64 + i as u64)),
                Token::Uint(U256::zero()),
            ])
        })
        .collect();

    supernets2_abi()
        .unwrap()
        .function("sequenceBatches")
        .and_then(|function| {
            function.encode_input(&[
                Token::Array(batches),
                Token::Address(Address::repeat_byte(0xcb)),
                Token::Bytes(vec![]),
            ])
        })
        .unwrap()
}

/// `SequenceBatches` event announcing `data` in block `block_number`.
pub fn sequence_batches_event(block_number: u64, data: &[&OffChainData]) -> RawEvent {
    let keys: Vec<_> = data.iter().map(|item| item.key).collect();
    raw_event(block_number, &sequence_batches_call_data(&keys))
}

type EventSender = mpsc::UnboundedSender<Result<RawEvent>>;

/// Scripted L1. Events pushed with `push_history` are replayed on every
/// subscription whose start block is at or before them; `emit` feeds the
/// current subscription directly.
#[derive(Default)]
pub struct MockL1Client {
    committee: Mutex<Vec<CommitteeMember>>,
    fail_committee: AtomicBool,
    committee_calls: AtomicUsize,
    failing_subscriptions: AtomicUsize,
    hang_subscriptions: AtomicBool,
    subscription_starts: Mutex<Vec<u64>>,
    history: Mutex<Vec<RawEvent>>,
    live: Mutex<Option<EventSender>>,
}

impl MockL1Client {
    pub fn new(committee: Vec<CommitteeMember>) -> Self {
        Self {
            committee: Mutex::new(committee),
            ..Default::default()
        }
    }

    pub fn set_committee(&self, committee: Vec<CommitteeMember>) {
        *self.committee.lock().unwrap() = committee;
    }

    pub fn fail_committee(&self, fail: bool) {
        self.fail_committee.store(fail, Ordering::SeqCst);
    }

    pub fn committee_calls(&self) -> usize {
        self.committee_calls.load(Ordering::SeqCst)
    }

    /// Fail the next `n` subscription attempts. `usize::MAX` fails forever.
    pub fn fail_next_subscriptions(&self, n: usize) {
        self.failing_subscriptions.store(n, Ordering::SeqCst);
    }

    /// Leave subscription attempts pending forever, like an L1 node that
    /// accepts the socket but never answers.
    pub fn hang_subscriptions(&self, hang: bool) {
        self.hang_subscriptions.store(hang, Ordering::SeqCst);
    }

    /// Start block of every subscription attempt, failed ones included.
    pub fn subscription_starts(&self) -> Vec<u64> {
        self.subscription_starts.lock().unwrap().clone()
    }

    pub fn push_history(&self, event: RawEvent) {
        self.history.lock().unwrap().push(event);
    }

    pub fn emit(&self, item: Result<RawEvent>) {
        if let Some(sender) = self.live.lock().unwrap().as_ref() {
            let _ = sender.send(item);
        }
    }
}

#[async_trait]
impl L1Client for MockL1Client {
    async fn current_committee(&self) -> Result<Vec<CommitteeMember>> {
        self.committee_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_committee.load(Ordering::SeqCst) {
            return Err(Error::Committee("getAmountOfMembers reverted".into()));
        }
        Ok(self.committee.lock().unwrap().clone())
    }

    async fn watch_sequence_batches(&self, start_block: u64) -> Result<EventStream> {
        self.subscription_starts.lock().unwrap().push(start_block);
        if self.hang_subscriptions.load(Ordering::SeqCst) {
            return futures::future::pending().await;
        }

        let remaining = self.failing_subscriptions.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != usize::MAX {
                self.failing_subscriptions.store(remaining - 1, Ordering::SeqCst);
            }
            return Err(Error::Subscription("websocket closed".into()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        for event in self.history.lock().unwrap().iter() {
            if event.block_number >= start_block {
                let _ = sender.send(Ok(event.clone()));
            }
        }
        *self.live.lock().unwrap() = Some(sender);

        Ok(Box::pin(stream::unfold(receiver, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Value(Bytes),
    Empty,
    Fail,
    Hang,
}

/// Committee members keyed by url. A member answers with its scripted
/// `Reply` if it has one, otherwise with whatever it `serve`s for the key,
/// otherwise with an empty payload.
#[derive(Default)]
pub struct MockMemberClient {
    replies: Mutex<HashMap<String, Reply>>,
    served: Mutex<HashMap<(String, ContentKey), Bytes>>,
    calls: Mutex<Vec<(String, ContentKey)>>,
}

impl MockMemberClient {
    pub fn reply(&self, url: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(url.to_string(), reply);
    }

    pub fn serve(&self, url: &str, data: &OffChainData) {
        self.served
            .lock()
            .unwrap()
            .insert((url.to_string(), data.key), data.value.clone());
    }

    pub fn calls(&self) -> Vec<(String, ContentKey)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, key: ContentKey) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(_, k)| *k == key)
            .map(|(url, _)| url)
            .collect()
    }
}

#[async_trait]
impl MemberClient for MockMemberClient {
    async fn fetch_payload(&self, url: &str, key: ContentKey) -> Result<Bytes> {
        self.calls.lock().unwrap().push((url.to_string(), key));

        let reply = self.replies.lock().unwrap().get(url).cloned();
        match reply {
            Some(Reply::Value(value)) => Ok(value),
            Some(Reply::Empty) => Ok(Bytes::default()),
            Some(Reply::Fail) => Err(Error::Member {
                endpoint: url.to_string(),
                reason: "connection refused".into(),
            }),
            Some(Reply::Hang) => futures::future::pending().await,
            None => Ok(self
                .served
                .lock()
                .unwrap()
                .get(&(url.to_string(), key))
                .cloned()
                .unwrap_or_default()),
        }
    }
}
