use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Weekday};

use super::*;
use crate::notify::ALL_CHANNEL;

// ── Fixtures ─────────────────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("covers_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn at(d: &str, h: u32, m: u32, s: u32) -> NaiveDateTime {
    date(d).and_hms_opt(h, m, s).unwrap()
}

const ALL_DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn weekly(day: Weekday, name: &str, start: NaiveTime, end: NaiveTime) -> Period {
    Period {
        id: Ulid::new(),
        recurrence: Recurrence::Weekly(day),
        name: name.into(),
        start_time: start,
        end_time: end,
        active: true,
        capacity_override: None,
    }
}

fn rules() -> BookingRules {
    let mut period_capacity = std::collections::BTreeMap::new();
    period_capacity.insert("Dinner".to_string(), 4);
    BookingRules {
        min_party_size: 2,
        max_party_size: 20,
        same_day_cutoff: t(18, 0),
        closed_weekdays: [Weekday::Mon].into_iter().collect(),
        period_capacity,
    }
}

/// Engine on a fresh WAL with the clock at Friday 2024-12-20 12:00.
fn bare_engine(name: &str) -> (Engine, Arc<ManualClock>) {
    let path = test_wal_path(name);
    let clock = Arc::new(ManualClock::new(at("2024-12-20", 12, 0, 0)));
    let engine = Engine::new("acme", path, Arc::new(NotifyHub::new()), clock.clone()).unwrap();
    (engine, clock)
}

/// Lunch (unlimited) and Dinner (4 guests) every day, Mondays closed.
async fn configure(engine: &Engine) {
    for day in ALL_DAYS {
        engine.upsert_period(weekly(day, "Lunch", t(12, 0), t(15, 0))).await.unwrap();
        engine.upsert_period(weekly(day, "Dinner", t(19, 0), t(23, 0))).await.unwrap();
    }
    engine.set_rules(rules()).await.unwrap();
}

async fn engine(name: &str) -> (Engine, Arc<ManualClock>) {
    let (engine, clock) = bare_engine(name);
    configure(&engine).await;
    (engine, clock)
}

fn details(d: &str, period: &str, adults: u32, children: u32) -> BookingDetails {
    BookingDetails {
        party_name: "Ana Souza".into(),
        date: date(d),
        period: period.into(),
        adults,
        children,
        notes: None,
        is_birthday: false,
    }
}

fn candidate(client: Option<&str>, d: &str, period: &str, adults: u32, children: u32) -> Candidate {
    Candidate {
        client_id: client.map(str::to_string),
        source: if client.is_some() { Source::Link } else { Source::Manual },
        status: None,
        idempotency_key: None,
        details: details(d, period, adults, children),
    }
}

async fn booked(engine: &Engine, d: &str, period: &str) -> u32 {
    engine.booked(&SlotKey::new(date(d), period)).await
}

async fn create_ok(engine: &Engine, c: Candidate) -> Reservation {
    match engine.create(c).await.unwrap() {
        Outcome::Done(r) => r,
        Outcome::Rejected(reason) => panic!("unexpected rejection: {reason:?}"),
    }
}

// ── Scenarios ────────────────────────────────────────────

#[tokio::test]
async fn capacity_is_released_on_cancel() {
    let (engine, _) = engine("cancel_releases.wal").await;

    let a = create_ok(&engine, candidate(Some("a"), "2024-12-25", "Dinner", 3, 0)).await;
    assert_eq!(a.status, Status::Pending);

    let b = candidate(Some("b"), "2024-12-25", "Dinner", 2, 0);
    let out = engine.create(b.clone()).await.unwrap();
    assert_eq!(out, Outcome::Rejected(RejectReason::CapacityExceeded));

    engine.cancel(a.id).await.unwrap();
    assert_eq!(booked(&engine, "2024-12-25", "Dinner").await, 0);

    let b = create_ok(&engine, b).await;
    assert_eq!(booked(&engine, "2024-12-25", "Dinner").await, 2);
    assert_eq!(engine.get(b.id).unwrap().status, Status::Pending);
}

#[tokio::test]
async fn closed_monday_opened_by_special_date() {
    let (engine, _) = engine("special_date.wal").await;
    let monday = "2024-12-23";

    let out = engine.create(candidate(None, monday, "Dinner", 2, 0)).await.unwrap();
    assert_eq!(out, Outcome::Rejected(RejectReason::DayClosed));

    engine
        .upsert_period(Period {
            id: Ulid::new(),
            recurrence: Recurrence::On(date(monday)),
            name: "Dinner".into(),
            start_time: t(19, 0),
            end_time: t(23, 30),
            active: true,
            capacity_override: Some(40),
        })
        .await
        .unwrap();

    let r = create_ok(&engine, candidate(None, monday, "Dinner", 12, 0)).await;
    assert_eq!(r.status, Status::Confirmed);
    assert_eq!(engine.remaining(date(monday), "Dinner").await, Some(28));

    let open = engine.open_periods(date(monday)).await.unwrap();
    let names: Vec<_> = open.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Lunch", "Dinner"]);
}

#[tokio::test]
async fn party_size_outside_bounds() {
    let (engine, _) = engine("party_bounds.wal").await;
    let out = engine.create(candidate(None, "2024-12-25", "Lunch", 1, 0)).await.unwrap();
    assert_eq!(out, Outcome::Rejected(RejectReason::PartySizeOutOfBounds));
    let out = engine.create(candidate(None, "2024-12-25", "Lunch", 15, 6)).await.unwrap();
    assert_eq!(out, Outcome::Rejected(RejectReason::PartySizeOutOfBounds));
    assert!(engine.list(&ReservationFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn same_day_cutoff() {
    let (engine, clock) = engine("cutoff.wal").await;
    clock.set(at("2024-12-20", 18, 1, 0));

    let out = engine.create(candidate(None, "2024-12-20", "Dinner", 2, 0)).await.unwrap();
    assert_eq!(out, Outcome::Rejected(RejectReason::PastCutoff));
    create_ok(&engine, candidate(None, "2024-12-21", "Dinner", 2, 0)).await;

    clock.set(at("2024-12-20", 18, 0, 0));
    assert_eq!(
        engine.check(date("2024-12-20"), "Dinner", 2).await,
        Decision::Reject(RejectReason::PastCutoff)
    );
    clock.set(at("2024-12-20", 17, 59, 59));
    assert_eq!(engine.check(date("2024-12-20"), "Dinner", 2).await, Decision::Accept);
}

#[tokio::test]
async fn duplicate_active_then_replace() {
    let (engine, _) = engine("duplicate_replace.wal").await;

    let first = create_ok(&engine, candidate(Some("c1"), "2024-12-25", "Dinner", 3, 0)).await;
    engine.change_status(first.id, Status::Confirmed).await.unwrap();

    let again = engine
        .create(candidate(Some("c1"), "2024-12-26", "Lunch", 2, 0))
        .await
        .unwrap();
    assert_eq!(again, Outcome::Rejected(RejectReason::DuplicateActiveReservation));

    let moved = engine
        .replace(first.id, details("2024-12-26", "Dinner", 4, 0))
        .await
        .unwrap()
        .done()
        .unwrap();
    assert_eq!(moved.id, first.id);
    assert_eq!(moved.status, Status::Confirmed);
    assert_eq!(moved.client_id.as_deref(), Some("c1"));
    assert_eq!(moved.created_at, first.created_at);
    assert_eq!(booked(&engine, "2024-12-25", "Dinner").await, 0);
    assert_eq!(booked(&engine, "2024-12-26", "Dinner").await, 4);

    // The old slot is free again
    create_ok(&engine, candidate(Some("c2"), "2024-12-25", "Dinner", 4, 0)).await;
}

// ── Concurrency ──────────────────────────────────────────

async fn create_retrying(engine: &Engine, c: Candidate) -> Outcome<Reservation> {
    loop {
        match engine.create(c.clone()).await {
            Err(e) if e.is_transient() => tokio::task::yield_now().await,
            other => return other.unwrap(),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_never_exceed_capacity() {
    let (engine, _) = engine("concurrent_capacity.wal").await;
    engine.set_period_capacity("Dinner", Some(10)).await.unwrap();
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for _ in 0..40 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            create_retrying(&engine, candidate(None, "2024-12-25", "Dinner", 2, 0)).await
        }));
    }
    let mut accepted = 0;
    for h in handles {
        match h.await.unwrap() {
            Outcome::Done(_) => accepted += 1,
            Outcome::Rejected(reason) => assert_eq!(reason, RejectReason::CapacityExceeded),
        }
    }

    assert_eq!(accepted, 5);
    assert_eq!(booked(&engine, "2024-12-25", "Dinner").await, 10);
    let held: u32 = engine
        .list(&ReservationFilter::on(date("2024-12-25")))
        .await
        .unwrap()
        .iter()
        .filter(|r| r.status.is_active())
        .map(Reservation::party_size)
        .sum();
    assert_eq!(held, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_for_one_client_keep_one_active() {
    let (engine, _) = engine("concurrent_client.wal").await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = engine.clone();
        // Different slots, so only the client claim serializes them
        let d = format!("2024-12-{:02}", 24 + (i % 4));
        handles.push(tokio::spawn(async move {
            create_retrying(&engine, candidate(Some("c1"), &d, "Lunch", 2, 0)).await
        }));
    }
    let mut accepted = 0;
    for h in handles {
        match h.await.unwrap() {
            Outcome::Done(_) => accepted += 1,
            Outcome::Rejected(reason) => {
                assert_eq!(reason, RejectReason::DuplicateActiveReservation)
            }
        }
    }
    assert_eq!(accepted, 1);
    let active = engine
        .list(&ReservationFilter {
            client_id: Some("c1".into()),
            ..ReservationFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(engine.active_for_client("c1").unwrap().id, active[0].id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_replaces_into_one_slot() {
    let (engine, _) = engine("concurrent_replace.wal").await;
    let engine = Arc::new(engine);

    let mut ids = Vec::new();
    for i in 0..6 {
        let r = create_ok(&engine, candidate(Some(&format!("c{i}")), "2024-12-26", "Lunch", 2, 0)).await;
        ids.push(r.id);
    }

    let mut handles = Vec::new();
    for id in ids {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            loop {
                match engine.replace(id, details("2024-12-25", "Dinner", 2, 0)).await {
                    Err(e) if e.is_transient() => tokio::task::yield_now().await,
                    other => return other.unwrap(),
                }
            }
        }));
    }
    let mut moved = 0;
    for h in handles {
        if h.await.unwrap().done().is_some() {
            moved += 1;
        }
    }
    assert_eq!(moved, 2);
    assert_eq!(booked(&engine, "2024-12-25", "Dinner").await, 4);
    assert_eq!(booked(&engine, "2024-12-26", "Lunch").await, 8);
}

// ── Replace ──────────────────────────────────────────────

#[tokio::test]
async fn rejected_replace_changes_nothing() {
    let (engine, _) = engine("replace_atomic.wal").await;
    create_ok(&engine, candidate(Some("a"), "2024-12-25", "Dinner", 2, 0)).await;
    let b = create_ok(&engine, candidate(Some("b"), "2024-12-26", "Dinner", 2, 0)).await;

    let before = engine.get(b.id).unwrap();
    let out = engine
        .replace(b.id, details("2024-12-25", "Dinner", 3, 0))
        .await
        .unwrap();
    assert_eq!(out, Outcome::Rejected(RejectReason::CapacityExceeded));

    assert_eq!(engine.get(b.id).unwrap(), before);
    assert_eq!(booked(&engine, "2024-12-25", "Dinner").await, 2);
    assert_eq!(booked(&engine, "2024-12-26", "Dinner").await, 2);
}

#[tokio::test]
async fn replace_in_same_slot_discounts_own_guests() {
    let (engine, _) = engine("replace_same_slot.wal").await;
    let r = create_ok(&engine, candidate(Some("a"), "2024-12-25", "Dinner", 4, 0)).await;

    let mut edited = r.details.clone();
    edited.adults = 2;
    edited.children = 2;
    edited.is_birthday = true;
    edited.notes = Some("window seat".into());
    let updated = engine.replace(r.id, edited).await.unwrap().done().unwrap();
    assert!(updated.details.is_birthday);
    assert_eq!(booked(&engine, "2024-12-25", "Dinner").await, 4);

    let mut grown = updated.details.clone();
    grown.adults = 3;
    let out = engine.replace(r.id, grown).await.unwrap();
    assert_eq!(out, Outcome::Rejected(RejectReason::CapacityExceeded));
}

#[tokio::test]
async fn replace_canceled_is_an_error() {
    let (engine, _) = engine("replace_canceled.wal").await;
    let r = create_ok(&engine, candidate(Some("a"), "2024-12-25", "Dinner", 2, 0)).await;
    engine.cancel(r.id).await.unwrap();
    let err = engine
        .replace(r.id, details("2024-12-26", "Dinner", 2, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ReservationCanceled(id) if id == r.id));
}

#[tokio::test]
async fn concurrent_partial_edits_keep_each_others_fields() {
    let (engine, _) = engine("edit_concurrent.wal").await;
    let r = create_ok(&engine, candidate(Some("a"), "2024-12-25", "Dinner", 2, 0)).await;

    let notes = DetailsEdit {
        notes: Some(Some("window seat".into())),
        ..Default::default()
    };
    let party = DetailsEdit {
        adults: Some(3),
        ..Default::default()
    };
    let (a, b) = tokio::join!(engine.edit(r.id, notes), engine.edit(r.id, party));
    assert!(a.unwrap().done().is_some());
    assert!(b.unwrap().done().is_some());

    let stored = engine.get(r.id).unwrap();
    assert_eq!(stored.details.notes.as_deref(), Some("window seat"));
    assert_eq!(stored.details.adults, 3);
    assert_eq!(booked(&engine, "2024-12-25", "Dinner").await, 3);
}

#[tokio::test]
async fn partial_edit_moves_and_keeps_the_rest() {
    let (engine, _) = engine("edit_move.wal").await;
    let mut c = candidate(Some("a"), "2024-12-25", "Dinner", 2, 1);
    c.details.notes = Some("high chair".into());
    let r = create_ok(&engine, c).await;

    let moved = engine
        .edit(
            r.id,
            DetailsEdit {
                date: Some(date("2024-12-26")),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .done()
        .unwrap();
    assert_eq!(moved.details.date, date("2024-12-26"));
    assert_eq!(moved.details.children, 1);
    assert_eq!(moved.details.notes.as_deref(), Some("high chair"));
    assert_eq!(booked(&engine, "2024-12-25", "Dinner").await, 0);
    assert_eq!(booked(&engine, "2024-12-26", "Dinner").await, 3);

    let missing = Ulid::new();
    let err = engine.edit(missing, DetailsEdit::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(id) if id == missing));
}

// ── Status transitions ───────────────────────────────────

#[tokio::test]
async fn reactivation_rechecks_capacity() {
    let (engine, _) = engine("reactivate_capacity.wal").await;
    let a = create_ok(&engine, candidate(Some("a"), "2024-12-25", "Dinner", 4, 0)).await;
    engine.cancel(a.id).await.unwrap();
    create_ok(&engine, candidate(Some("b"), "2024-12-25", "Dinner", 4, 0)).await;

    let out = engine.change_status(a.id, Status::Confirmed).await.unwrap();
    assert_eq!(out, Outcome::Rejected(RejectReason::CapacityExceeded));
    assert_eq!(engine.get(a.id).unwrap().status, Status::Canceled);
    assert!(engine.active_for_client("a").is_none());
    assert_eq!(booked(&engine, "2024-12-25", "Dinner").await, 4);
}

#[tokio::test]
async fn reactivation_respects_one_active_per_client() {
    let (engine, _) = engine("reactivate_client.wal").await;
    let old = create_ok(&engine, candidate(Some("a"), "2024-12-25", "Lunch", 2, 0)).await;
    engine.cancel(old.id).await.unwrap();
    let new = create_ok(&engine, candidate(Some("a"), "2024-12-26", "Lunch", 2, 0)).await;

    let out = engine.change_status(old.id, Status::Pending).await.unwrap();
    assert_eq!(out, Outcome::Rejected(RejectReason::DuplicateActiveReservation));

    engine.cancel(new.id).await.unwrap();
    let back = engine
        .change_status(old.id, Status::Confirmed)
        .await
        .unwrap()
        .done()
        .unwrap();
    assert_eq!(back.status, Status::Confirmed);
    assert_eq!(engine.active_for_client("a").unwrap().id, old.id);
}

#[tokio::test]
async fn invalid_transitions_are_errors() {
    let (engine, _) = engine("transitions.wal").await;
    let r = create_ok(&engine, candidate(Some("a"), "2024-12-25", "Lunch", 2, 0)).await;

    let err = engine.change_status(r.id, Status::Pending).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition {
            from: Status::Pending,
            to: Status::Pending,
            ..
        }
    ));

    engine.change_status(r.id, Status::Confirmed).await.unwrap();
    let err = engine.change_status(r.id, Status::Pending).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    engine.cancel(r.id).await.unwrap();
    assert!(matches!(
        engine.cancel(r.id).await.unwrap_err(),
        EngineError::InvalidTransition { .. }
    ));

    let missing = Ulid::new();
    assert!(matches!(
        engine.cancel(missing).await.unwrap_err(),
        EngineError::NotFound(id) if id == missing
    ));
}

#[tokio::test]
async fn confirm_does_not_recheck_capacity() {
    let (engine, clock) = engine("confirm_no_check.wal").await;
    let r = create_ok(&engine, candidate(Some("a"), "2024-12-20", "Dinner", 4, 0)).await;
    // Past the cutoff and the slot is full, confirming still works
    clock.set(at("2024-12-20", 20, 0, 0));
    let out = engine.change_status(r.id, Status::Confirmed).await.unwrap();
    assert_eq!(out.done().unwrap().status, Status::Confirmed);
}

// ── Tables ───────────────────────────────────────────────

#[tokio::test]
async fn assign_table_on_live_reservations_only() {
    let (engine, _) = engine("assign_table.wal").await;
    let r = create_ok(&engine, candidate(Some("a"), "2024-12-25", "Dinner", 4, 0)).await;

    let seated = engine.assign_table(r.id, Some("T12".into())).await.unwrap();
    assert_eq!(seated.table.as_deref(), Some("T12"));
    assert_eq!(booked(&engine, "2024-12-25", "Dinner").await, 4);

    let cleared = engine.assign_table(r.id, None).await.unwrap();
    assert_eq!(cleared.table, None);

    engine.cancel(r.id).await.unwrap();
    let err = engine.assign_table(r.id, Some("T1".into())).await.unwrap_err();
    assert!(matches!(err, EngineError::ReservationCanceled(_)));
}

// ── Create edge cases ────────────────────────────────────

#[tokio::test]
async fn idempotency_key_returns_first_result() {
    let (engine, _) = engine("idempotency.wal").await;
    let mut c = candidate(Some("a"), "2024-12-25", "Dinner", 2, 0);
    c.idempotency_key = Some("req-1".into());

    let first = create_ok(&engine, c.clone()).await;
    let second = create_ok(&engine, c).await;
    assert_eq!(first, second);
    assert_eq!(booked(&engine, "2024-12-25", "Dinner").await, 2);
}

#[tokio::test]
async fn unconfigured_tenant_rejects() {
    let (engine, _) = bare_engine("unconfigured.wal");
    let out = engine.create(candidate(None, "2024-12-25", "Dinner", 2, 0)).await.unwrap();
    assert_eq!(out, Outcome::Rejected(RejectReason::TenantNotConfigured));
    assert!(matches!(
        engine.open_periods(date("2024-12-25")).await.unwrap_err(),
        EngineError::TenantNotConfigured
    ));
}

#[tokio::test]
async fn malformed_candidates_are_errors() {
    let (engine, _) = engine("malformed.wal").await;
    let mut c = candidate(None, "2024-12-25", "Dinner", 2, 0);
    c.details.party_name = "  ".into();
    assert!(matches!(
        engine.create(c).await.unwrap_err(),
        EngineError::InvalidReservation(_)
    ));

    let mut c = candidate(None, "2024-12-25", "Dinner", 2, 0);
    c.status = Some(Status::Canceled);
    assert!(matches!(
        engine.create(c).await.unwrap_err(),
        EngineError::InvalidReservation(_)
    ));
}

#[tokio::test]
async fn explicit_initial_status_wins() {
    let (engine, _) = engine("initial_status.wal").await;
    let mut c = candidate(Some("a"), "2024-12-25", "Lunch", 2, 0);
    c.status = Some(Status::Confirmed);
    assert_eq!(create_ok(&engine, c).await.status, Status::Confirmed);
}

#[tokio::test]
async fn check_does_not_mutate() {
    let (engine, _) = engine("check_pure.wal").await;
    create_ok(&engine, candidate(None, "2024-12-25", "Dinner", 3, 0)).await;
    let d = date("2024-12-25");
    let first = engine.check(d, "Dinner", 2).await;
    let second = engine.check(d, "Dinner", 2).await;
    assert_eq!(first, Decision::Reject(RejectReason::CapacityExceeded));
    assert_eq!(first, second);
    assert_eq!(engine.check(d, "Dinner", 1).await, Decision::Reject(RejectReason::PartySizeOutOfBounds));
    assert_eq!(booked(&engine, "2024-12-25", "Dinner").await, 3);
}

// ── Configuration ────────────────────────────────────────

#[tokio::test]
async fn rules_reject_unknown_capacity_keys() {
    let (engine, _) = engine("rules_keys.wal").await;
    let mut bad = rules();
    bad.period_capacity.insert("Brunch".into(), 10);
    assert!(matches!(
        engine.set_rules(bad).await.unwrap_err(),
        EngineError::UnknownPeriod(name) if name == "Brunch"
    ));
    assert!(matches!(
        engine.set_period_capacity("Brunch", Some(3)).await.unwrap_err(),
        EngineError::UnknownPeriod(_)
    ));

    let updated = engine.set_period_capacity("Lunch", Some(30)).await.unwrap();
    assert_eq!(updated.period_capacity.get("Lunch"), Some(&30));
    assert_eq!(engine.remaining(date("2024-12-25"), "Lunch").await, Some(30));

    engine.set_period_capacity("Lunch", None).await.unwrap();
    assert_eq!(engine.remaining(date("2024-12-25"), "Lunch").await, None);
}

#[tokio::test]
async fn rules_update_keeps_capacity() {
    let (engine, _) = engine("rules_keep_caps.wal").await;
    let mut update = rules();
    update.min_party_size = 1;
    update.period_capacity.clear();
    let saved = engine.set_rules_keeping_capacity(update).await.unwrap();
    assert_eq!(saved.min_party_size, 1);
    assert_eq!(saved.period_capacity.get("Dinner"), Some(&4));
    assert_eq!(engine.rules().await, Some(saved));

    let (fresh, _) = bare_engine("rules_keep_caps_fresh.wal");
    let first = fresh.set_rules_keeping_capacity(rules()).await.unwrap();
    assert!(first.period_capacity.is_empty());
}

#[tokio::test]
async fn period_removal_guards_capacity() {
    let (engine, _) = bare_engine("period_removal.wal");
    let dinner = weekly(Weekday::Wed, "Dinner", t(19, 0), t(23, 0));
    engine.upsert_period(dinner.clone()).await.unwrap();
    engine.set_rules(rules()).await.unwrap();

    assert!(matches!(
        engine.remove_period(dinner.id).await.unwrap_err(),
        EngineError::InvalidPeriod(_)
    ));
    engine.set_period_capacity("Dinner", None).await.unwrap();
    let removed = engine.remove_period(dinner.id).await.unwrap();
    assert_eq!(removed.id, dinner.id);
    assert!(engine.periods().await.is_empty());
}

#[tokio::test]
async fn duplicate_period_names_per_day_rejected() {
    let (engine, _) = engine("period_dupes.wal").await;
    let err = engine
        .upsert_period(weekly(Weekday::Wed, "Dinner", t(18, 0), t(22, 0)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicatePeriodName(_)));
}

// ── Read models ──────────────────────────────────────────

#[tokio::test]
async fn summaries_follow_commits() {
    let (engine, _) = engine("summaries.wal").await;
    let a = create_ok(&engine, candidate(Some("a"), "2024-12-25", "Dinner", 2, 1)).await;
    create_ok(&engine, candidate(Some("b"), "2024-12-25", "Lunch", 4, 0)).await;
    create_ok(&engine, candidate(Some("c"), "2024-12-24", "Dinner", 2, 0)).await;

    let rows = engine.summaries(date("2024-12-24"), date("2024-12-25")).await.unwrap();
    let view: Vec<_> = rows
        .iter()
        .map(|s| (s.date, s.period.as_str(), s.reservation_count, s.guest_count))
        .collect();
    assert_eq!(
        view,
        vec![
            (date("2024-12-24"), "Dinner", 1, 2),
            (date("2024-12-25"), "Lunch", 1, 4),
            (date("2024-12-25"), "Dinner", 1, 3),
        ]
    );

    engine.cancel(a.id).await.unwrap();
    let rows = engine.summaries(date("2024-12-25"), date("2024-12-25")).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].period, "Lunch");

    assert!(matches!(
        engine.summaries(date("2024-12-25"), date("2024-12-24")).await.unwrap_err(),
        EngineError::InvalidReservation(_)
    ));
    assert!(matches!(
        engine.summaries(date("2024-01-01"), date("2025-06-01")).await.unwrap_err(),
        EngineError::LimitExceeded(_)
    ));
}

#[tokio::test]
async fn list_filters() {
    let (engine, _) = engine("list_filters.wal").await;
    let a = create_ok(&engine, candidate(Some("a"), "2024-12-25", "Dinner", 2, 0)).await;
    let b = create_ok(&engine, candidate(Some("b"), "2024-12-25", "Lunch", 2, 0)).await;
    create_ok(&engine, candidate(Some("c"), "2024-12-27", "Lunch", 2, 0)).await;
    engine.cancel(a.id).await.unwrap();

    let day = engine.list(&ReservationFilter::on(date("2024-12-25"))).await.unwrap();
    assert_eq!(day.iter().map(|r| r.id).collect::<Vec<_>>(), vec![b.id, a.id]);

    let canceled = engine
        .list(&ReservationFilter {
            status: Some(Status::Canceled),
            ..ReservationFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(canceled.len(), 1);
    assert_eq!(canceled[0].id, a.id);

    let lunch = engine
        .list(&ReservationFilter {
            period: Some("Lunch".into()),
            ..ReservationFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(lunch.len(), 2);
}

#[tokio::test]
async fn notifications_fire_after_commit() {
    let (engine, _) = engine("notify.wal").await;
    let mut rx = engine.notify.subscribe(ALL_CHANNEL);
    let mut day = engine.notify.subscribe(&crate::notify::date_channel(date("2024-12-25")));

    let r = create_ok(&engine, candidate(Some("a"), "2024-12-25", "Dinner", 2, 0)).await;
    let notice = rx.recv().await.unwrap();
    assert_eq!(notice.reservation_id, r.id);
    assert_eq!(notice.kind, crate::notify::NoticeKind::Created);
    assert_eq!(notice.tenant_id, "acme");
    assert_eq!(day.recv().await.unwrap().reservation_id, r.id);

    engine.change_status(r.id, Status::Confirmed).await.unwrap();
    let notice = rx.recv().await.unwrap();
    assert_eq!(notice.status, Status::Confirmed);

    // Rejections publish nothing
    engine.create(candidate(Some("b"), "2024-12-25", "Dinner", 4, 0)).await.unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn move_between_dates_notifies_the_old_day() {
    let (engine, _) = engine("notify_move.wal").await;
    let r = create_ok(&engine, candidate(Some("a"), "2024-12-24", "Dinner", 2, 0)).await;

    let mut old_day = engine.notify.subscribe(&crate::notify::date_channel(date("2024-12-24")));
    let mut new_day = engine.notify.subscribe(&crate::notify::date_channel(date("2024-12-25")));

    let out = engine.replace(r.id, details("2024-12-25", "Dinner", 2, 0)).await.unwrap();
    assert!(out.done().is_some());

    let left = old_day.try_recv().unwrap();
    assert_eq!(left.reservation_id, r.id);
    assert_eq!(left.kind, crate::notify::NoticeKind::Replaced);
    assert_eq!(left.date, date("2024-12-25"));
    assert_eq!(left.previous_date, Some(date("2024-12-24")));
    assert_eq!(new_day.try_recv().unwrap(), left);

    // Edits within the day only reach that day
    engine.replace(r.id, details("2024-12-25", "Dinner", 3, 0)).await.unwrap();
    assert_eq!(new_day.try_recv().unwrap().previous_date, None);
    assert!(old_day.try_recv().is_err());
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("restart.wal");
    let clock = Arc::new(ManualClock::new(at("2024-12-20", 12, 0, 0)));
    let a;
    let b;
    let c;
    {
        let engine = Engine::new("acme", path.clone(), Arc::new(NotifyHub::new()), clock.clone()).unwrap();
        configure(&engine).await;
        a = create_ok(&engine, candidate(Some("a"), "2024-12-25", "Dinner", 3, 0)).await;
        b = create_ok(&engine, candidate(Some("b"), "2024-12-26", "Dinner", 2, 0)).await;
        c = create_ok(&engine, candidate(Some("c"), "2024-12-26", "Lunch", 2, 0)).await;
        engine.cancel(a.id).await.unwrap();
        engine.replace(b.id, details("2024-12-25", "Dinner", 4, 0)).await.unwrap();
        engine.assign_table(c.id, Some("T3".into())).await.unwrap();
    }

    let engine = Engine::new("acme", path, Arc::new(NotifyHub::new()), clock).unwrap();
    assert_eq!(engine.rules().await, Some(rules()));
    assert_eq!(engine.periods().await.len(), 14);
    assert_eq!(engine.get(a.id).unwrap().status, Status::Canceled);
    assert_eq!(engine.get(b.id).unwrap().details.date, date("2024-12-25"));
    assert_eq!(engine.get(c.id).unwrap().table.as_deref(), Some("T3"));
    assert_eq!(booked(&engine, "2024-12-25", "Dinner").await, 4);
    assert_eq!(booked(&engine, "2024-12-26", "Dinner").await, 0);
    assert!(engine.active_for_client("a").is_none());
    assert_eq!(engine.active_for_client("b").unwrap().id, b.id);

    // Ledger rebuilt from the WAL still enforces capacity
    let out = engine.create(candidate(Some("d"), "2024-12-25", "Dinner", 2, 0)).await.unwrap();
    assert_eq!(out, Outcome::Rejected(RejectReason::CapacityExceeded));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let clock = Arc::new(ManualClock::new(at("2024-12-20", 12, 0, 0)));
    let kept;
    {
        let engine = Engine::new("acme", path.clone(), Arc::new(NotifyHub::new()), clock.clone()).unwrap();
        configure(&engine).await;
        for i in 0..5 {
            let r = create_ok(&engine, candidate(Some(&format!("c{i}")), "2024-12-26", "Lunch", 2, 0)).await;
            engine.cancel(r.id).await.unwrap();
        }
        kept = create_ok(&engine, candidate(Some("k"), "2024-12-25", "Dinner", 3, 0)).await;
        assert!(engine.wal_appends_since_compact().await > 0);

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // Appends after compaction land in the new file
        engine.change_status(kept.id, Status::Confirmed).await.unwrap();
    }

    let engine = Engine::new("acme", path, Arc::new(NotifyHub::new()), clock).unwrap();
    assert_eq!(engine.get(kept.id).unwrap().status, Status::Confirmed);
    assert_eq!(booked(&engine, "2024-12-25", "Dinner").await, 3);
    assert_eq!(booked(&engine, "2024-12-26", "Lunch").await, 0);
    assert_eq!(engine.list(&ReservationFilter::default()).await.unwrap().len(), 6);
    assert_eq!(engine.active_for_client("k").unwrap().id, kept.id);
}
