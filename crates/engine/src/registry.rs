//! Registry of bidder kinds.
//!
//! Parties are opaque `(kind, id)` references to the engine. The host
//! registers each kind once at process startup together with the lookup
//! functions the engine needs; the built registry is immutable afterwards.

use {
    model::{Kind, PartyRef},
    std::{collections::HashMap, sync::Arc},
};

type PermitsBidding = Arc<dyn Fn(&PartyRef) -> bool + Send + Sync>;
type Enumerate = Arc<dyn Fn() -> Vec<i64> + Send + Sync>;

#[derive(Clone)]
pub struct KindEntry {
    pub label: String,
    /// Capability check consulted when an unregistered party attempts to
    /// bid.
    pub permits_bidding: PermitsBidding,
    /// Lists all current instance ids of this kind. Required for kinds that
    /// are pre-registered at auction creation.
    pub enumerate: Option<Enumerate>,
}

#[derive(Default)]
pub struct KindRegistryBuilder {
    entries: HashMap<Kind, KindEntry>,
}

impl KindRegistryBuilder {
    pub fn register(
        mut self,
        kind: impl Into<Kind>,
        label: impl Into<String>,
        permits_bidding: impl Fn(&PartyRef) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.entries.insert(
            kind.into(),
            KindEntry {
                label: label.into(),
                permits_bidding: Arc::new(permits_bidding),
                enumerate: None,
            },
        );
        self
    }

    /// Adds an instance enumerator to an already registered kind.
    pub fn with_enumerator(
        mut self,
        kind: impl Into<Kind>,
        enumerate: impl Fn() -> Vec<i64> + Send + Sync + 'static,
    ) -> Self {
        if let Some(entry) = self.entries.get_mut(&kind.into()) {
            entry.enumerate = Some(Arc::new(enumerate));
        }
        self
    }

    pub fn build(self) -> KindRegistry {
        KindRegistry {
            entries: Arc::new(self.entries),
        }
    }
}

/// Immutable lookup table from kind tags to the host-provided functions.
#[derive(Clone, Default)]
pub struct KindRegistry {
    entries: Arc<HashMap<Kind, KindEntry>>,
}

impl KindRegistry {
    pub fn builder() -> KindRegistryBuilder {
        KindRegistryBuilder::default()
    }

    pub fn contains(&self, kind: &Kind) -> bool {
        self.entries.contains_key(kind)
    }

    /// Whether the host permits this party to bid without an existing
    /// registration. Unknown kinds never may.
    pub fn permits_bidding(&self, party: &PartyRef) -> bool {
        self.entries
            .get(&party.kind)
            .is_some_and(|entry| (entry.permits_bidding)(party))
    }

    /// All current instances of `kind`, when the host provided an
    /// enumerator.
    pub fn instances_of(&self, kind: &Kind) -> Vec<PartyRef> {
        self.entries
            .get(kind)
            .and_then(|entry| entry.enumerate.as_ref())
            .map(|enumerate| {
                enumerate()
                    .into_iter()
                    .map(|id| PartyRef::new(kind.clone(), id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn kinds(&self) -> impl Iterator<Item = (&Kind, &str)> {
        self.entries
            .iter()
            .map(|(kind, entry)| (kind, entry.label.as_str()))
    }
}

impl std::fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("KindRegistry")
            .field("kinds", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
