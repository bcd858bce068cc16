//! Engine configuration: parsed from TOML, validated once at load time.
//! Malformed configuration aborts startup; it is never deferred to the
//! bidding path.

use {
    model::{
        auction::Auction,
        ladder::IncrementLadder,
        money::Money,
        Kind,
    },
    serde::Deserialize,
    std::{
        collections::{BTreeMap, HashMap, HashSet},
        time::Duration,
    },
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("ladder threshold {0:?} is not a number")]
    NonNumericThreshold(String),
    #[error("duplicate ladder threshold {0}")]
    DuplicateThreshold(Money),
    #[error("ladder increment at threshold {0} must be positive")]
    NonPositiveIncrement(Money),
    #[error("rounding unit must be positive, got {0}")]
    NonPositiveRoundingUnit(i64),
}

/// Raw on-disk configuration. Ladder thresholds are table keys and arrive
/// as strings; [`Config::validate`] turns them into the typed [`Settings`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// All prices must be multiples of this unit of minor currency.
    pub rounding_unit: i64,
    /// Global anti-snipe window: a bid arriving this close to the deadline
    /// pushes the deadline to the bid time plus this window.
    #[serde(with = "humantime_serde")]
    pub prolonging_window: Duration,
    /// How long before the original deadline the "closing soon" hook fires.
    #[serde(with = "humantime_serde")]
    pub close_to_end_notify_lead: Duration,
    /// Sparse `threshold -> increment` pairs of the default ladder.
    pub ladder: BTreeMap<String, i64>,
    /// Per-pack overrides, keyed by pack name.
    pub packs: HashMap<String, PackConfig>,
    /// Bidder kinds whose instances are pre-registered as approved when an
    /// auction is offered.
    pub autoregister_kinds: Vec<String>,
    /// Whether an unknown bidder may be registered on their first bid.
    pub autoregister_on_first_bid: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackConfig {
    #[serde(default, with = "humantime_serde")]
    pub prolonging_window: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rounding_unit: 1,
            prolonging_window: Duration::from_secs(2 * 60),
            close_to_end_notify_lead: Duration::from_secs(30 * 60),
            ladder: BTreeMap::new(),
            packs: HashMap::new(),
            autoregister_kinds: Vec::new(),
            autoregister_on_first_bid: false,
        }
    }
}

impl Config {
    pub fn from_toml(raw: &str) -> Result<Self, ConfigurationError> {
        Ok(toml::from_str(raw)?)
    }

    /// Checks the raw values and builds the typed settings the engine runs
    /// with.
    pub fn validate(self) -> Result<Settings, ConfigurationError> {
        if self.rounding_unit <= 0 {
            return Err(ConfigurationError::NonPositiveRoundingUnit(
                self.rounding_unit,
            ));
        }

        let mut pairs = Vec::with_capacity(self.ladder.len());
        let mut seen = HashSet::new();
        for (threshold, increment) in &self.ladder {
            let threshold_value: i64 = threshold
                .trim()
                .parse()
                .map_err(|_| ConfigurationError::NonNumericThreshold(threshold.clone()))?;
            if !seen.insert(threshold_value) {
                return Err(ConfigurationError::DuplicateThreshold(Money(
                    threshold_value,
                )));
            }
            if *increment <= 0 {
                return Err(ConfigurationError::NonPositiveIncrement(Money(
                    threshold_value,
                )));
            }
            pairs.push((Money(threshold_value), Money(*increment)));
        }

        Ok(Settings {
            rounding_unit: Money(self.rounding_unit),
            default_ladder: IncrementLadder::from_thresholds(pairs),
            prolonging_window: self.prolonging_window,
            close_to_end_notify_lead: self.close_to_end_notify_lead,
            pack_prolonging_windows: self
                .packs
                .into_iter()
                .filter_map(|(pack, config)| {
                    config.prolonging_window.map(|window| (pack, window))
                })
                .collect(),
            autoregister_kinds: self.autoregister_kinds.into_iter().map(Kind).collect(),
            autoregister_on_first_bid: self.autoregister_on_first_bid,
        })
    }
}

/// Validated configuration.
#[derive(Clone, Debug)]
pub struct Settings {
    pub rounding_unit: Money,
    pub default_ladder: IncrementLadder,
    pub prolonging_window: Duration,
    pub close_to_end_notify_lead: Duration,
    pub pack_prolonging_windows: HashMap<String, Duration>,
    pub autoregister_kinds: HashSet<Kind>,
    pub autoregister_on_first_bid: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Config::default()
            .validate()
            .expect("default configuration is valid")
    }
}

impl Settings {
    /// The ladder governing one auction: its own when configured, otherwise
    /// the engine default.
    pub fn ladder_for<'a>(&'a self, auction: &'a Auction) -> &'a IncrementLadder {
        if auction.increment_ladder.is_empty() {
            &self.default_ladder
        } else {
            &auction.increment_ladder
        }
    }

    /// Anti-snipe window resolution: explicit per-auction override, then the
    /// auction's pack, then the global default.
    pub fn prolonging_window_for(&self, auction: &Auction) -> Duration {
        auction
            .prolonging_window
            .or_else(|| {
                auction
                    .pack
                    .as_ref()
                    .and_then(|pack| self.pack_prolonging_windows.get(pack))
                    .copied()
            })
            .unwrap_or(self.prolonging_window)
    }
}
