//! Property-Based Tests — Routing and Normalizer Invariants
//!
//! Uses `proptest` to verify that the routing predicate and the change
//! normalizers hold their contracts across random inputs.

use proptest::prelude::*;
use serde_json::{json, Map, Value};

use portfolio_realtime_hub::domain::{
    should_notify, ChangeEventType, ChannelKey, EventKind, RawChange, Row,
};
use portfolio_realtime_hub::usecases::normalizer;

// ── Strategies ──────────────────────────────────────────────

fn json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        (-1.0e9f64..1.0e9).prop_map(|f| json!(f)),
        "[a-z0-9 ._-]{0,12}".prop_map(Value::String),
    ]
}

fn json_value() -> impl Strategy<Value = Value> {
    json_leaf().prop_recursive(2, 8, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::hash_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// Rows mixing the columns normalizers read with random noise.
fn row() -> impl Strategy<Value = Row> {
    let known = prop::sample::select(vec![
        "id",
        "user_id",
        "status",
        "current_price",
        "total_value",
        "day_change",
        "daily_change",
        "executed_at",
        "metadata",
        "symbol",
    ]);
    prop::collection::vec(
        (prop_oneof![known.prop_map(str::to_string), "[a-z_]{1,10}"], json_value()),
        0..8,
    )
    .prop_map(|pairs| pairs.into_iter().collect::<Map<String, Value>>())
}

fn event_type() -> impl Strategy<Value = ChangeEventType> {
    prop_oneof![
        Just(ChangeEventType::Insert),
        Just(ChangeEventType::Update),
        Just(ChangeEventType::Delete),
    ]
}

fn raw_change() -> impl Strategy<Value = RawChange> {
    (event_type(), prop::option::of(row()), prop::option::of(row()))
        .prop_map(|(t, old, new)| RawChange::new(t, "any", old, new))
}

fn user_id() -> impl Strategy<Value = String> {
    "[a-z0-9-]{1,12}"
}

// ── Routing Properties ──────────────────────────────────────

proptest! {
    /// Per-user events reach a per-user channel iff the ids match.
    #[test]
    fn owner_channels_match_only_their_user(owner in user_id(), sender in user_id()) {
        let cases = [
            (ChannelKey::transactions(&owner), EventKind::TransactionCreated),
            (ChannelKey::transactions(&owner), EventKind::TransactionCompleted),
            (ChannelKey::notifications(&owner), EventKind::NotificationCreated),
            (ChannelKey::achievements(&owner), EventKind::AchievementUnlocked),
        ];
        for (key, kind) in &cases {
            prop_assert_eq!(should_notify(key, *kind, Some(&sender)), owner == sender);
            prop_assert!(should_notify(key, *kind, Some(&owner)));
        }
    }

    /// Price updates only ever reach asset channels.
    #[test]
    fn price_updates_only_reach_asset_channels(id in user_id(), sender in prop::option::of(user_id())) {
        let asset = ChannelKey::assets(&[id.as_str()]);
        prop_assert!(should_notify(&asset, EventKind::AssetPriceUpdate, sender.as_deref()));
        for key in [
            ChannelKey::portfolio(&id),
            ChannelKey::transactions(&id),
            ChannelKey::notifications(&id),
            ChannelKey::achievements(&id),
        ] {
            prop_assert!(!should_notify(&key, EventKind::AssetPriceUpdate, sender.as_deref()));
        }
    }

    /// Market status changes are never routed.
    #[test]
    fn market_status_is_never_routed(raw in "[a-z]{1,12}(:[a-z0-9,]{0,12})?", sender in prop::option::of(user_id())) {
        let key = ChannelKey::parse(&raw).unwrap();
        prop_assert!(!should_notify(&key, EventKind::MarketStatusChange, sender.as_deref()));
    }
}

// ── Normalizer Properties ───────────────────────────────────

proptest! {
    /// No normalizer panics on arbitrary rows.
    #[test]
    fn normalizers_never_panic(change in raw_change(), pid in user_id()) {
        let _ = normalizer::portfolio(&pid, &change);
        let _ = normalizer::holding(&pid, &change);
        let _ = normalizer::asset_price(&change);
        let _ = normalizer::transaction(&change);
        let _ = normalizer::notification(&change);
        let _ = normalizer::achievement(&change);
    }

    /// Without any snapshot, nothing is emitted.
    #[test]
    fn rowless_change_emits_nothing(t in event_type(), pid in user_id()) {
        let change = RawChange::new(t, "any", None, None);
        prop_assert!(normalizer::portfolio(&pid, &change).is_none());
        prop_assert!(normalizer::holding(&pid, &change).is_none());
        prop_assert!(normalizer::asset_price(&change).is_none());
        prop_assert!(normalizer::transaction(&change).is_none());
        prop_assert!(normalizer::notification(&change).is_none());
        prop_assert!(normalizer::achievement(&change).is_none());
    }

    /// A price event needs both snapshots.
    #[test]
    fn price_needs_both_snapshots(side in row(), t in event_type()) {
        prop_assert!(normalizer::asset_price(&RawChange::new(t, "assets", Some(side.clone()), None)).is_none());
        prop_assert!(normalizer::asset_price(&RawChange::new(t, "assets", None, Some(side))).is_none());
    }

    /// Delta and percentage follow the two prices.
    #[test]
    fn price_delta_is_consistent(old in 0.01f64..1.0e6, new in 0.0f64..1.0e6) {
        let change = RawChange::update(
            "assets",
            json!({"id": "a1", "current_price": old}).as_object().cloned().unwrap(),
            json!({"id": "a1", "current_price": new}).as_object().cloned().unwrap(),
        );
        let event = normalizer::asset_price(&change).unwrap();
        let portfolio_realtime_hub::domain::EventPayload::Price(price) = event.payload else {
            panic!("expected a price payload");
        };
        prop_assert!((price.change - (new - old)).abs() < 1e-6);
        prop_assert!((price.change_percentage - (new - old) / old * 100.0).abs() < 1e-6 * (1.0 + price.change_percentage.abs()));
    }

    /// Transaction kind depends only on the change type.
    #[test]
    fn transaction_kind_follows_event_type(t in event_type(), r in row()) {
        prop_assume!(!r.is_empty());
        let change = RawChange::new(t, "transactions", Some(r.clone()), Some(r));
        let event = normalizer::transaction(&change).unwrap();
        let expected = if t == ChangeEventType::Insert {
            EventKind::TransactionCreated
        } else {
            EventKind::TransactionCompleted
        };
        prop_assert_eq!(event.kind, expected);
    }
}
