use lazy_static::lazy_static;
use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Histogram, IntCounter,
    IntCounterVec, IntGauge, Registry,
};

// Create a new registry named `dac`
lazy_static! {
    pub static ref SYNCHRONIZER_REGISTRY: Registry =
        Registry::new_custom(Some("dac".to_string()), None).unwrap();
}

// Register metrics with the `dac` registry
lazy_static! {
    pub static ref L1_SUBSCRIPTION_ATTEMPTS: IntCounterVec =
        register_int_counter_vec_with_registry!(
            "l1_subscription_attempts_total",
            "Attempts to subscribe to sequence batch events, labeled by status",
            &["status"],
            SYNCHRONIZER_REGISTRY
        )
        .unwrap();
    pub static ref L1_SUBSCRIPTION_TIMEOUTS: IntCounter = register_int_counter_with_registry!(
        "l1_subscription_timeouts_total",
        "Number of times no event arrived within the subscription timeout",
        SYNCHRONIZER_REGISTRY
    )
    .unwrap();
    pub static ref SYNC_RESUBSCRIPTIONS: IntCounterVec = register_int_counter_vec_with_registry!(
        "sync_resubscriptions_total",
        "Number of times the subscription was torn down and re-established, labeled by reason",
        &["reason"],
        SYNCHRONIZER_REGISTRY
    )
    .unwrap();
    pub static ref SYNC_EVENTS: IntCounterVec = register_int_counter_vec_with_registry!(
        "sync_events_total",
        "Sequence batch events handled, labeled by outcome",
        &["status"],
        SYNCHRONIZER_REGISTRY
    )
    .unwrap();
    pub static ref SYNC_KEYS: IntCounterVec = register_int_counter_vec_with_registry!(
        "sync_keys_total",
        "Batch keys seen in events, labeled by whether they were already stored",
        &["kind"],
        SYNCHRONIZER_REGISTRY
    )
    .unwrap();
    pub static ref SYNC_STATE: IntGauge = register_int_gauge_with_registry!(
        "sync_state",
        "Current state of the batch synchronizer",
        SYNCHRONIZER_REGISTRY
    )
    .unwrap();
    pub static ref COMMITTEE_REFRESHES: IntCounterVec = register_int_counter_vec_with_registry!(
        "committee_refreshes_total",
        "Data committee refreshes from L1, labeled by status",
        &["status"],
        SYNCHRONIZER_REGISTRY
    )
    .unwrap();
    pub static ref COMMITTEE_EVICTIONS: IntCounter = register_int_counter_with_registry!(
        "committee_evictions_total",
        "Members removed from the local committee cache after failing a request",
        SYNCHRONIZER_REGISTRY
    )
    .unwrap();
    pub static ref COMMITTEE_SIZE: IntGauge = register_int_gauge_with_registry!(
        "committee_size",
        "Members currently in the local committee cache",
        SYNCHRONIZER_REGISTRY
    )
    .unwrap();
    pub static ref MEMBER_FETCHES: IntCounterVec = register_int_counter_vec_with_registry!(
        "member_fetches_total",
        "Data requests sent to committee members, labeled by outcome",
        &["status"],
        SYNCHRONIZER_REGISTRY
    )
    .unwrap();
    pub static ref RESOLUTION_DURATION: Histogram = register_histogram_with_registry!(
        "resolution_duration_seconds",
        "Time taken to resolve one key from the committee",
        SYNCHRONIZER_REGISTRY
    )
    .unwrap();
    pub static ref STORE_COMMITS: IntCounterVec = register_int_counter_vec_with_registry!(
        "store_commits_total",
        "Storage transactions, labeled by status",
        &["status"],
        SYNCHRONIZER_REGISTRY
    )
    .unwrap();
    pub static ref LAST_PROCESSED_BLOCK: IntGauge = register_int_gauge_with_registry!(
        "last_processed_block",
        "Last L1 block whose batch data is fully stored",
        SYNCHRONIZER_REGISTRY
    )
    .unwrap();
}
