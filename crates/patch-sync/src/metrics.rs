use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn counter_vec(name: &str, help: &str) -> IntCounterVec {
    let c = IntCounterVec::new(Opts::new(name, help), &["endpoint"])
        .expect("static metric definition");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
}

pub static FRAMES_RECEIVED: Lazy<IntCounterVec> =
    Lazy::new(|| counter_vec("patch_sync_frames_total", "Wire frames received"));

pub static OPERATIONS_APPLIED: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "patch_sync_operations_applied_total",
        "Patch operations applied to a document",
    )
});

pub static SNAPSHOTS: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "patch_sync_snapshots_total",
        "Root snapshots that replaced a document",
    )
});

pub static DECODE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "patch_sync_decode_errors_total",
        "Frames dropped because they could not be decoded",
    )
});

pub static APPLY_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "patch_sync_apply_errors_total",
        "Operations skipped because their path did not resolve",
    )
});

pub static STALE_FRAMES: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "patch_sync_stale_frames_total",
        "Frames discarded because their connection was superseded",
    )
});

pub static NOOP_REMOVES: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "patch_sync_noop_removes_total",
        "Remove operations whose target was already absent",
    )
});

pub static RECONNECTS: Lazy<IntCounterVec> =
    Lazy::new(|| counter_vec("patch_sync_reconnects_total", "Reconnects scheduled"));

pub static ACTIVE_SUBSCRIPTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new(
        "patch_sync_active_subscriptions",
        "Subscriptions enabled with a resolved endpoint",
    )
    .expect("static metric definition");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

pub fn render() -> String {
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    TextEncoder::new().encode(&metric_families, &mut buf).ok();
    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_exposes_labeled_counters() {
        FRAMES_RECEIVED
            .with_label_values(&["/metrics-test/ws"])
            .inc_by(3);
        ACTIVE_SUBSCRIPTIONS.get();
        let text = render();
        assert!(text.contains("patch_sync_frames_total"));
        assert!(text.contains("endpoint=\"/metrics-test/ws\""));
        assert!(text.contains(
            "# HELP patch_sync_active_subscriptions Subscriptions enabled with a resolved endpoint"
        ));
    }
}
