//! Where events come from and go to.

use std::cell::{Ref, RefCell};
use std::path::Path;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bech32::FromBase32;
use secp256k1::{All, Keypair, Message, Secp256k1};
use sha2::{Digest, Sha256};

use crate::error::HnError;
use crate::event::{Event, Tag, UnsignedEvent};
use crate::filter::Filter;

/// Access to relays (or anything else holding events). Callers await
/// one operation at a time; implementations are not required to be
/// `Send`.
#[async_trait(?Send)]
pub trait EventStore {
    /// The first matching event. Must not wait forever: end of stream
    /// without a match is `Ok(None)`.
    async fn fetch_one(&self, filter: &Filter) -> Result<Option<Event>>;

    /// All matching events up to the filter's limit, in no particular
    /// order.
    async fn fetch_many(&self, filter: &Filter) -> Result<Vec<Event>>;

    /// Fails if no signer is available.
    async fn sign(&self, event: UnsignedEvent) -> Result<Event>;

    async fn publish(&self, event: &Event) -> Result<()>;
}

/// Run `filter` against `store`, via `fetch_one` when at most one
/// event is wanted. An empty outcome is `NotFound`.
pub async fn fetch_events<S>(store: &S, filter: &Filter) -> Result<Vec<Event>, HnError>
where S: EventStore + ?Sized
{
    let events: Vec<Event> = if filter.wants_one() {
        store.fetch_one(filter).await.map_err(HnError::adapter)?.into_iter().collect()
    } else {
        store.fetch_many(filter).await.map_err(HnError::adapter)?
    };
    if events.is_empty() {
        Err(HnError::NotFound(filter.to_string()))
    } else {
        Ok(events)
    }
}

/// The NIP-01 event hash, i.e. the raw event id.
pub fn event_hash(
    pubkey: &str, created_at: u64, kind: u32, tags: &[Tag], content: &str
) -> Result<[u8; 32]> {
    let arr = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    let data = serde_json::to_vec(&arr)?;
    let hash = Sha256::digest(&data);
    Ok(hash.into())
}

/// Signs events with a fixed secret key.
pub struct KeySigner {
    secp: Secp256k1<All>,
    keypair: Keypair,
}

impl KeySigner {
    /// From a secret key given as hex or in `nsec` form.
    pub fn from_secret(s: &str) -> Result<KeySigner> {
        let s = s.trim();
        let sk = if s.starts_with("nsec1") {
            let (_hrp, data, _variant) = bech32::decode(s)
                .map_err(|e| anyhow!("invalid nsec key: {e}"))?;
            Vec::<u8>::from_base32(&data).map_err(|e| anyhow!("invalid nsec key: {e}"))?
        } else {
            hex::decode(s).context("secret key is neither nsec nor hex")?
        };
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, &sk)
            .context("invalid secret key")?;
        Ok(KeySigner { secp, keypair })
    }

    pub fn pubkey_hex(&self) -> String {
        hex::encode(self.keypair.x_only_public_key().0.serialize())
    }

    pub fn sign(&self, ev: UnsignedEvent) -> Result<Event> {
        let pubkey = self.pubkey_hex();
        let hash = event_hash(&pubkey, ev.created_at, ev.kind, &ev.tags, &ev.content)?;
        let msg = Message::from_digest_slice(&hash)?;
        let sig = self.secp.sign_schnorr_no_aux_rand(&msg, &self.keypair);
        Ok(Event {
            id: hex::encode(hash),
            pubkey,
            kind: ev.kind,
            created_at: ev.created_at,
            tags: ev.tags,
            content: ev.content,
            sig: hex::encode(sig.as_ref()),
        })
    }
}

/// An in-process event store: serves fetches from a list of events
/// and appends published ones.
pub struct MemoryStore {
    events: RefCell<Vec<Event>>,
    requests: RefCell<Vec<Filter>>,
    signer: Option<KeySigner>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::with_events(Vec::new())
    }

    pub fn with_events(events: Vec<Event>) -> MemoryStore {
        MemoryStore {
            events: RefCell::new(events),
            requests: RefCell::new(Vec::new()),
            signer: None,
        }
    }

    /// Load a JSON array of events.
    pub fn from_json_file(path: &Path) -> Result<MemoryStore> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading events file {path:?}"))?;
        let events: Vec<Event> = serde_json::from_str(&s)
            .with_context(|| format!("parsing events file {path:?}"))?;
        Ok(MemoryStore::with_events(events))
    }

    pub fn with_signer(mut self, signer: KeySigner) -> MemoryStore {
        self.signer = Some(signer);
        self
    }

    pub fn add(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }

    pub fn events(&self) -> Ref<Vec<Event>> {
        self.events.borrow()
    }

    /// The filters served so far, in order.
    pub fn requests(&self) -> Ref<Vec<Filter>> {
        self.requests.borrow()
    }

    /// Matching events, newest first, only the newest of each
    /// addressable (pubkey, kind, d) group, at most `filter.limit`.
    fn matching(&self, filter: &Filter) -> Vec<Event> {
        self.requests.borrow_mut().push(filter.clone());
        let events = self.events.borrow();
        // Later insertions win ties.
        let mut found: Vec<&Event> = events.iter().rev().filter(|e| filter.matches(e)).collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let mut seen = Vec::new();
        let mut res = Vec::new();
        for ev in found {
            if ev.is_addressable() {
                let key = (ev.pubkey.as_str(), ev.kind, ev.d_tag().unwrap_or(""));
                if seen.contains(&key) {
                    continue
                }
                seen.push(key);
            }
            res.push(ev.clone());
        }
        if let Some(limit) = filter.limit {
            res.truncate(limit);
        }
        res
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

#[async_trait(?Send)]
impl EventStore for MemoryStore {
    async fn fetch_one(&self, filter: &Filter) -> Result<Option<Event>> {
        Ok(self.matching(filter).into_iter().next())
    }

    async fn fetch_many(&self, filter: &Filter) -> Result<Vec<Event>> {
        Ok(self.matching(filter))
    }

    async fn sign(&self, event: UnsignedEvent) -> Result<Event> {
        match &self.signer {
            Some(signer) => signer.sign(event),
            None => bail!("no signer available")
        }
    }

    async fn publish(&self, event: &Event) -> Result<()> {
        if event.sig.is_empty() {
            bail!("refusing to publish unsigned event {:?}", event.id)
        }
        self.add(event.clone());
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use secp256k1::{schnorr::Signature, XOnlyPublicKey};
    use std::io::Write;

    fn ev(id: &str, kind: u32, created_at: u64, d: Option<&str>) -> Event {
        Event {
            id: id.into(),
            pubkey: "pk".into(),
            kind,
            created_at,
            tags: d.map(|d| vec![Tag::new(["d", d])]).unwrap_or_default(),
            content: String::new(),
            sig: String::new(),
        }
    }

    fn kinds(kind: u32, limit: usize) -> Filter {
        Filter { kinds: Some(vec![kind]), limit: Some(limit), ..Filter::default() }
    }

    #[test]
    fn t_newest_first_and_collapsed() {
        let store = MemoryStore::with_events(vec![
            ev("a", 1, 10, None),
            ev("b", 1, 30, None),
            ev("c", 1, 20, None),
            ev("t1", 32616, 5, Some("x")),
            ev("t2", 32616, 6, Some("x")),
            ev("t3", 32616, 1, Some("y")),
        ]);
        let ids = |v: Vec<Event>| v.into_iter().map(|e| e.id).collect::<Vec<_>>();
        assert_eq!(ids(block_on(store.fetch_many(&kinds(1, 2))).unwrap()), vec!["b", "c"]);
        assert_eq!(ids(block_on(store.fetch_many(&kinds(32616, 10))).unwrap()), vec!["t2", "t3"]);
        assert_eq!(block_on(store.fetch_one(&kinds(1, 1))).unwrap().unwrap().id, "b");
        assert_eq!(store.requests().len(), 3);
    }

    #[test]
    fn t_fetch_events() {
        let store = MemoryStore::with_events(vec![ev("a", 1, 10, None)]);
        assert_eq!(block_on(fetch_events(&store, &kinds(1, 1))).unwrap().len(), 1);
        assert!(matches!(block_on(fetch_events(&store, &kinds(2, 5))),
                         Err(HnError::NotFound(_))));
    }

    #[test]
    fn t_sign_and_publish() {
        let store = MemoryStore::new();
        let unsigned = UnsignedEvent {
            kind: 1, created_at: 1, tags: vec![Tag::new(["p", "x"])], content: "hi".into()
        };
        assert!(block_on(store.sign(unsigned.clone())).is_err());

        let store = store.with_signer(KeySigner::from_secret(&"01".repeat(32)).unwrap());
        let signed = block_on(store.sign(unsigned)).unwrap();
        let hash = event_hash(&signed.pubkey, 1, 1, &signed.tags, "hi").unwrap();
        assert_eq!(signed.id, hex::encode(hash));
        let sig = Signature::from_slice(&hex::decode(&signed.sig).unwrap()).unwrap();
        let pk = XOnlyPublicKey::from_slice(&hex::decode(&signed.pubkey).unwrap()).unwrap();
        let msg = Message::from_digest_slice(&hash).unwrap();
        Secp256k1::verification_only().verify_schnorr(&sig, &msg, &pk).unwrap();

        block_on(store.publish(&signed)).unwrap();
        assert_eq!(store.events().len(), 1);
    }

    #[test]
    fn t_from_json_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"[{{"id":"a","pubkey":"p","kind":1,"created_at":3,"content":"x"}}]"#)
            .unwrap();
        let store = MemoryStore::from_json_file(f.path()).unwrap();
        assert_eq!(store.events()[0].content, "x");
    }
}
