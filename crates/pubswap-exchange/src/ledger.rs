//! Per-partner ledgers
//!
//! A ledger records the exchange relationship with one remote peer: byte
//! accounting, exchange timestamps and the topics the peer has announced.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::SystemTime;

use parking_lot::Mutex;

use pubswap_core::{Block, ContentKey, Delta, Entry, PeerId, Publication, Topic};
use pubswap_wire::{WireEntry, WireMessage};

use crate::engine::DecisionEngine;
use crate::registry::Registry;

/// Sent-block records kept per partner; the oldest are forgotten first
pub const MAX_SENT_RECORDS: usize = 4096;

/// Bytes exchanged with a partner
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DebtRatio {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

impl DebtRatio {
    /// Sent over received, never dividing by zero
    pub fn value(&self) -> f64 {
        self.bytes_sent as f64 / (self.bytes_recv + 1) as f64
    }
}

/// Exchange relationship with one remote peer
#[derive(Clone, Debug)]
pub struct Ledger {
    pub partner: PeerId,
    pub accounting: DebtRatio,
    pub first_exchange: Option<SystemTime>,
    pub last_exchange: Option<SystemTime>,
    pub exchange_count: u64,
    /// Topics the partner subscribed to
    sublist: Registry<Topic>,
    /// Content the partner published
    publist: Registry<Publication>,
    /// Blocks already sent, to avoid duplicates. Bounded by
    /// `MAX_SENT_RECORDS`; a forgotten block may be sent again.
    sent_to_peer: HashSet<ContentKey>,
    sent_order: VecDeque<ContentKey>,
}

impl Ledger {
    pub fn new(partner: PeerId) -> Self {
        Ledger {
            partner,
            accounting: DebtRatio::default(),
            first_exchange: None,
            last_exchange: None,
            exchange_count: 0,
            sublist: Registry::default(),
            publist: Registry::default(),
            sent_to_peer: HashSet::new(),
            sent_order: VecDeque::new(),
        }
    }

    fn touch(&mut self) {
        let now = SystemTime::now();
        self.first_exchange.get_or_insert(now);
        self.last_exchange = Some(now);
        self.exchange_count += 1;
    }

    pub fn sent_bytes(&mut self, n: usize) {
        self.touch();
        self.accounting.bytes_sent += n as u64;
    }

    pub fn received_bytes(&mut self, n: usize) {
        self.touch();
        self.accounting.bytes_recv += n as u64;
    }

    /// Fold an incoming message into the partner's announced state.
    ///
    /// A full message replaces each section it carries entries for; a
    /// section it does not mention is left alone.
    pub fn apply(&mut self, msg: &WireMessage) {
        apply_section(&mut self.sublist, msg);
        apply_section(&mut self.publist, msg);
    }

    pub fn subscribes(&mut self, topic: Topic, priority: i32) {
        tracing::debug!(peer = %self.partner, %topic, "peer subscribes");
        self.sublist.add(topic, priority);
    }

    pub fn cancel_subscribe(&mut self, topic: &Topic) {
        self.sublist.remove(topic);
    }

    pub fn sublist_contains(&self, topic: &Topic) -> Option<Entry<Topic>> {
        self.sublist.contains(topic)
    }

    pub fn publishes(&mut self, publication: Publication, priority: i32) {
        tracing::debug!(peer = %self.partner, %publication, "peer publishes");
        self.publist.add(publication, priority);
    }

    pub fn cancel_publish(&mut self, publication: &Publication) {
        self.publist.remove(publication);
    }

    pub fn publist_contains(&self, publication: &Publication) -> Option<Entry<Publication>> {
        self.publist.contains(publication)
    }

    pub fn subscriptions(&self) -> Vec<Entry<Topic>> {
        self.sublist.sorted_entries()
    }

    pub fn publications(&self) -> Vec<Entry<Publication>> {
        self.publist.sorted_entries()
    }

    pub fn record_block_sent(&mut self, key: ContentKey) {
        if !self.sent_to_peer.insert(key) {
            return;
        }
        self.sent_order.push_back(key);
        while self.sent_order.len() > MAX_SENT_RECORDS {
            if let Some(oldest) = self.sent_order.pop_front() {
                self.sent_to_peer.remove(&oldest);
            }
        }
    }

    pub fn already_sent(&self, key: &ContentKey) -> bool {
        self.sent_to_peer.contains(key)
    }
}

fn apply_section<K: WireEntry>(registry: &mut Registry<K>, msg: &WireMessage) {
    let deltas: Vec<Delta<K>> = msg.entries();
    if msg.is_full() && !deltas.is_empty() {
        registry.clear();
    }
    for delta in &deltas {
        registry.apply(delta);
    }
}

/// All ledgers of a node, keyed by partner
#[derive(Debug, Default)]
pub struct LedgerBook {
    ledgers: Mutex<HashMap<PeerId, Ledger>>,
}

impl LedgerBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one partner's ledger
    pub fn ledger(&self, peer: PeerId) -> Option<Ledger> {
        self.ledgers.lock().get(&peer).cloned()
    }

    pub fn partners(&self) -> Vec<PeerId> {
        let mut peers: Vec<_> = self.ledgers.lock().keys().copied().collect();
        peers.sort();
        peers
    }

    /// Partners currently subscribed to `topic`
    pub fn subscribers(&self, topic: &Topic) -> HashSet<PeerId> {
        self.ledgers
            .lock()
            .values()
            .filter(|l| l.sublist_contains(topic).is_some())
            .map(|l| l.partner)
            .collect()
    }

    fn with_ledger<R>(&self, peer: PeerId, f: impl FnOnce(&mut Ledger) -> R) -> R {
        let mut ledgers = self.ledgers.lock();
        let ledger = ledgers.entry(peer).or_insert_with(|| Ledger::new(peer));
        f(ledger)
    }
}

impl DecisionEngine for LedgerBook {
    fn block_sent(&self, peer: PeerId, block: &Block) {
        self.with_ledger(peer, |l| l.record_block_sent(block.key()));
    }

    fn bytes_sent(&self, peer: PeerId, n: usize) {
        self.with_ledger(peer, |l| l.sent_bytes(n));
    }

    fn bytes_received(&self, peer: PeerId, n: usize) {
        self.with_ledger(peer, |l| l.received_bytes(n));
    }

    fn message_received(&self, peer: PeerId, msg: &WireMessage) {
        self.with_ledger(peer, |l| l.apply(msg));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> ContentKey {
        ContentKey::new([b; 32])
    }

    #[test]
    fn test_debt_ratio() {
        let mut ledger = Ledger::new(PeerId::new(1));
        assert_eq!(ledger.accounting.value(), 0.0);

        ledger.sent_bytes(100);
        ledger.received_bytes(49);
        assert_eq!(ledger.accounting.value(), 2.0);
        assert_eq!(ledger.exchange_count, 2);
        assert!(ledger.first_exchange.is_some());
        assert!(ledger.first_exchange <= ledger.last_exchange);
    }

    #[test]
    fn test_sent_records_are_bounded() {
        let mut ledger = Ledger::new(PeerId::new(4));
        let keys: Vec<_> = (0..MAX_SENT_RECORDS + 10)
            .map(|i| ContentKey::for_data(&(i as u64).to_le_bytes()))
            .collect();
        for key in &keys {
            ledger.record_block_sent(*key);
        }
        ledger.record_block_sent(keys[MAX_SENT_RECORDS + 9]);

        assert_eq!(ledger.sent_to_peer.len(), MAX_SENT_RECORDS);
        assert_eq!(ledger.sent_order.len(), MAX_SENT_RECORDS);
        assert!(!ledger.already_sent(&keys[0]));
        assert!(!ledger.already_sent(&keys[9]));
        assert!(ledger.already_sent(&keys[10]));
        assert!(ledger.already_sent(&keys[MAX_SENT_RECORDS + 9]));
    }

    #[test]
    fn test_incremental_messages_add_and_remove() {
        let mut ledger = Ledger::new(PeerId::new(1));

        let mut msg = WireMessage::new(false);
        msg.add_subscribe(Topic::from("a"), 10);
        msg.add_publish(Topic::from("a"), key(1), 5);
        ledger.apply(&msg);
        assert!(ledger.sublist_contains(&Topic::from("a")).is_some());
        assert!(ledger
            .publist_contains(&Publication::new("a", key(1)))
            .is_some());

        let mut msg = WireMessage::new(false);
        msg.cancel_subscribe(Topic::from("a"));
        ledger.apply(&msg);
        assert!(ledger.sublist_contains(&Topic::from("a")).is_none());
        assert_eq!(ledger.publications().len(), 1);
    }

    #[test]
    fn test_full_message_replaces_carried_sections() {
        let mut ledger = Ledger::new(PeerId::new(1));
        ledger.subscribes(Topic::from("old"), 1);
        ledger.publishes(Publication::new("p", key(2)), 1);

        let mut msg = WireMessage::new(true);
        msg.add_subscribe(Topic::from("new"), 1);
        ledger.apply(&msg);

        let subs: Vec<_> = ledger.subscriptions().into_iter().map(|e| e.key).collect();
        assert_eq!(subs, vec![Topic::from("new")]);
        assert_eq!(ledger.publications().len(), 1);
    }

    #[test]
    fn test_book_tracks_blocks_and_subscribers() {
        let book = LedgerBook::new();
        let block = Block::new(&b"data"[..]);

        book.block_sent(PeerId::new(3), &block);
        book.bytes_sent(PeerId::new(3), block.len());
        assert!(book.ledger(PeerId::new(3)).unwrap().already_sent(&block.key()));

        let mut msg = WireMessage::new(false);
        msg.add_subscribe(Topic::from("t"), 1);
        book.message_received(PeerId::new(4), &msg);

        assert_eq!(book.partners(), vec![PeerId::new(3), PeerId::new(4)]);
        let subs = book.subscribers(&Topic::from("t"));
        assert!(subs.contains(&PeerId::new(4)));
        assert!(!subs.contains(&PeerId::new(3)));
    }
}
