#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use std::{collections::HashMap, time::Duration};

use courier_common::RecipientRecord;
use courier_delivery::{
    Composer, DispatchConfig, DispatchError, DispatchEvent, DispatchState, DispatchSummary,
    Dispatcher, Silent, SourceError,
};
use courier_ledger::{DeliveryOutcome, Ledger};
use pretty_assertions::assert_eq;
use support::{StubTransport, recorder, write_csv};

const SENDER: &str = "sender@example.com";

const PEOPLE: &[(&str, &str, &str)] = &[
    ("Ada", "Lovelace", "ada@example.com"),
    ("Grace", "Hopper", "grace@example.com"),
    ("Alan", "Turing", "alan@example.com"),
    ("Edsger", "Dijkstra", "edsger@example.com"),
    ("Barbara", "Liskov", "barbara@example.com"),
];

fn unpaced() -> DispatchConfig {
    DispatchConfig {
        batch_size: 0,
        ..DispatchConfig::default()
    }
}

fn dispatcher(
    transport: &StubTransport,
    config: DispatchConfig,
    ledger: &std::path::Path,
) -> Dispatcher<StubTransport> {
    Dispatcher::new(transport.clone(), Composer::default(), SENDER, config, ledger)
}

#[tokio::test]
async fn test_second_run_sends_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_csv(dir.path(), &PEOPLE[..3]);
    let ledger = dir.path().join("send_progress.json");
    let transport = StubTransport::new();

    let first = dispatcher(&transport, unpaced(), &ledger)
        .run(&csv, &mut Silent)
        .await
        .unwrap();
    let second = dispatcher(&transport, unpaced(), &ledger)
        .run(&csv, &mut Silent)
        .await
        .unwrap();

    assert_eq!(first.succeeded, 3);
    assert_eq!(second, DispatchSummary::default());
    assert_eq!(transport.sent().len(), 3);
}

#[tokio::test]
async fn test_columns_named_like_ledger_keys_survive_a_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("recipients.csv");
    std::fs::write(
        &csv,
        "email,delivered,email_sent,attempted_at,error\n\
         ada@example.com,yes,True,yesterday,bounced once\n\
         grace@example.com,no,False,never,\n",
    )
    .unwrap();
    let ledger = dir.path().join("send_progress.json");
    let transport = StubTransport::new().rejecting("grace@example.com");

    let first = dispatcher(&transport, unpaced(), &ledger)
        .run(&csv, &mut Silent)
        .await
        .unwrap();
    let second = dispatcher(&transport, unpaced(), &ledger)
        .run(&csv, &mut Silent)
        .await
        .unwrap();

    assert_eq!((first.attempted, first.succeeded), (2, 1));
    assert_eq!((second.attempted, second.succeeded), (1, 0));
    assert_eq!(transport.recipients(), vec![
        "ada@example.com",
        "grace@example.com",
        "grace@example.com",
    ]);

    let reloaded = Ledger::load(&ledger).await.unwrap();
    let ada = &reloaded.entries()[0];
    assert!(ada.delivered);
    assert_eq!(ada.error, None);
    assert_eq!(ada.fields.get("error").map(String::as_str), Some("bounced once"));
    assert_eq!(ada.fields.get("delivered").map(String::as_str), Some("yes"));
    assert_eq!(reloaded.failures("grace@example.com"), 2);
}

#[tokio::test]
async fn test_at_most_one_success_per_address() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_csv(dir.path(), &PEOPLE[..3]);
    let ledger = dir.path().join("send_progress.json");
    let transport = StubTransport::new()
        .flaky("grace@example.com")
        .rejecting("alan@example.com");

    let mut runs = Vec::new();
    for _ in 0..3 {
        let summary = dispatcher(&transport, unpaced(), &ledger)
            .run(&csv, &mut Silent)
            .await
            .unwrap();
        runs.push((summary.attempted, summary.succeeded));
    }

    assert_eq!(runs, vec![(3, 1), (2, 1), (1, 0)]);

    let ledger = Ledger::load(&ledger).await.unwrap();
    let mut successes: HashMap<&str, usize> = HashMap::new();
    for outcome in ledger.entries().iter().filter(|outcome| outcome.delivered) {
        *successes.entry(outcome.email.as_str()).or_default() += 1;
    }

    assert!(successes.values().all(|count| *count == 1), "{successes:?}");
    assert_eq!(successes.len(), 2);
    assert_eq!(ledger.failures("alan@example.com"), 3);
    assert_eq!(
        transport.recipients(),
        vec![
            "ada@example.com",
            "grace@example.com",
            "alan@example.com",
            "grace@example.com",
            "alan@example.com",
            "alan@example.com",
        ]
    );
}

#[tokio::test]
async fn test_ledger_is_on_disk_before_the_next_send() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_csv(dir.path(), PEOPLE);
    let ledger = dir.path().join("send_progress.json");
    let transport = StubTransport::new()
        .rejecting("alan@example.com")
        .watching_ledger(&ledger);

    dispatcher(&transport, unpaced(), &ledger)
        .run(&csv, &mut Silent)
        .await
        .unwrap();

    let seen: Vec<_> = transport
        .sent()
        .iter()
        .map(|sent| sent.ledger_entries.unwrap())
        .collect();
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);

    let on_disk = Ledger::load(&ledger).await.unwrap();
    let order: Vec<_> = on_disk
        .entries()
        .iter()
        .map(|outcome| (outcome.email.as_str(), outcome.delivered))
        .collect();
    assert_eq!(
        order,
        vec![
            ("ada@example.com", true),
            ("grace@example.com", true),
            ("alan@example.com", false),
            ("edsger@example.com", true),
            ("barbara@example.com", true),
        ]
    );
    assert!(
        on_disk.entries()[2]
            .error
            .as_deref()
            .unwrap()
            .contains("550 No such user")
    );
    assert_eq!(on_disk.entries()[0].fields["forename"], "Ada");
}

#[tokio::test(start_paused = true)]
async fn test_batches_of_two_cool_down_twice() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_csv(dir.path(), PEOPLE);
    let ledger = dir.path().join("send_progress.json");
    let transport = StubTransport::new();
    let config = DispatchConfig {
        batch_size: 2,
        cooldown_secs: 600,
        countdown_tick_secs: 60,
        max_attempts: None,
    };
    let (events, mut observer) = recorder();

    let summary = dispatcher(&transport, config, &ledger)
        .run(&csv, &mut observer)
        .await
        .unwrap();

    assert_eq!(summary.cooldowns, 2);
    assert_eq!(summary.succeeded, 5);

    let sent = transport.sent();
    let gaps: Vec<_> = sent
        .windows(2)
        .map(|pair| (pair[1].at - pair[0].at).as_secs())
        .collect();
    assert_eq!(gaps, vec![0, 600, 0, 600]);

    let events = events.lock().unwrap();
    let states: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            DispatchEvent::State(state) => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            DispatchState::ComputingPending,
            DispatchState::Sending,
            DispatchState::CoolingDown,
            DispatchState::Sending,
            DispatchState::CoolingDown,
            DispatchState::Sending,
            DispatchState::Done,
        ]
    );

    let countdown: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            DispatchEvent::Countdown { remaining } => Some(remaining.as_secs()),
            _ => None,
        })
        .take(10)
        .collect();
    assert_eq!(countdown, vec![600, 540, 480, 420, 360, 300, 240, 180, 120, 60]);

    assert_eq!(
        events.last(),
        Some(&DispatchEvent::Finished(summary)),
        "summary comes last"
    );
}

#[tokio::test]
async fn test_mixed_history_sends_to_failed_and_new() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_csv(dir.path(), &PEOPLE[..3]);
    let path = dir.path().join("send_progress.json");

    let record = |email: &str| RecipientRecord::new(email);
    let mut ledger = Ledger::empty(&path);
    ledger.record(DeliveryOutcome::delivered(&record("ada@example.com")));
    ledger.record(DeliveryOutcome::failed(&record("grace@example.com"), "421"));
    ledger.persist().await.unwrap();

    let transport = StubTransport::new();
    let (events, mut observer) = recorder();
    let summary = dispatcher(&transport, unpaced(), &path)
        .run(&csv, &mut observer)
        .await
        .unwrap();

    assert_eq!(transport.recipients(), vec!["grace@example.com", "alan@example.com"]);
    assert_eq!(summary.total_pending, 2);
    assert!(events.lock().unwrap().contains(&DispatchEvent::Pending {
        total: 2,
        already_delivered: 1,
        exhausted: 0,
    }));
}

#[tokio::test]
async fn test_missing_email_column_leaves_ledger_alone() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("recipients.csv");
    std::fs::write(&csv, "forename,surname\nAda,Lovelace\n").unwrap();
    let ledger = dir.path().join("send_progress.json");
    let transport = StubTransport::new();

    let err = dispatcher(&transport, unpaced(), &ledger)
        .run(&csv, &mut Silent)
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Input(SourceError::Malformed { .. })), "{err}");
    assert!(!ledger.exists());
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_input_error_keeps_existing_ledger_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = dir.path().join("send_progress.json");
    let before = "[\n    {\n        \"email\": \"ada@example.com\",\n        \"delivered\": true\n    }\n]\n";
    std::fs::write(&ledger, before).unwrap();

    let err = dispatcher(&StubTransport::new(), unpaced(), &ledger)
        .run(dir.path().join("nowhere.csv"), &mut Silent)
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Input(SourceError::NotFound(_))));
    assert_eq!(std::fs::read_to_string(&ledger).unwrap(), before);
}

#[tokio::test]
async fn test_corrupt_ledger_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_csv(dir.path(), &PEOPLE[..2]);
    let ledger = dir.path().join("send_progress.json");
    std::fs::write(&ledger, "not json").unwrap();
    let transport = StubTransport::new();

    let err = dispatcher(&transport, unpaced(), &ledger)
        .run(&csv, &mut Silent)
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Ledger(ref e) if e.is_corrupt()));
    assert!(transport.sent().is_empty());
    assert_eq!(std::fs::read_to_string(&ledger).unwrap(), "not json");
}

#[tokio::test]
async fn test_persist_failure_does_not_stop_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_csv(dir.path(), &PEOPLE[..3]);
    let ledger = dir.path().join("missing").join("send_progress.json");
    let transport = StubTransport::new();
    let (events, mut observer) = recorder();

    let mut dispatcher = dispatcher(&transport, unpaced(), &ledger);
    let summary = dispatcher.run(&csv, &mut observer).await.unwrap();

    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.persist_failures, 3);
    assert_eq!(dispatcher.ledger().len(), 3, "snapshot still holds every attempt");

    let failures = events
        .lock()
        .unwrap()
        .iter()
        .filter(|event| matches!(event, DispatchEvent::PersistFailed { .. }))
        .count();
    assert_eq!(failures, 3);
}

#[tokio::test]
async fn test_dispatcher_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_csv(dir.path(), &PEOPLE[..1]);
    let ledger = dir.path().join("send_progress.json");
    let transport = StubTransport::new();

    let mut dispatcher = dispatcher(&transport, unpaced(), &ledger);
    dispatcher.run(&csv, &mut Silent).await.unwrap();

    assert_eq!(dispatcher.state(), DispatchState::Done);
    assert!(matches!(
        dispatcher.run(&csv, &mut Silent).await,
        Err(DispatchError::AlreadyRun)
    ));
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test]
async fn test_nothing_pending_goes_straight_to_done() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_csv(dir.path(), &[]);
    let ledger = dir.path().join("send_progress.json");
    let (events, mut observer) = recorder();

    let summary = dispatcher(&StubTransport::new(), DispatchConfig::default(), &ledger)
        .run(&csv, &mut observer)
        .await
        .unwrap();

    assert_eq!(summary, DispatchSummary::default());
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            DispatchEvent::State(DispatchState::ComputingPending),
            DispatchEvent::Pending {
                total: 0,
                already_delivered: 0,
                exhausted: 0,
            },
            DispatchEvent::State(DispatchState::Done),
            DispatchEvent::Finished(DispatchSummary::default()),
        ]
    );
    assert!(!ledger.exists());
}

#[tokio::test]
async fn test_exhausted_addresses_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_csv(dir.path(), &PEOPLE[..2]);
    let ledger = dir.path().join("send_progress.json");
    let transport = StubTransport::new().rejecting("grace@example.com");
    let config = DispatchConfig {
        max_attempts: Some(2),
        ..unpaced()
    };

    for _ in 0..2 {
        dispatcher(&transport, config.clone(), &ledger)
            .run(&csv, &mut Silent)
            .await
            .unwrap();
    }
    let third = dispatcher(&transport, config, &ledger)
        .run(&csv, &mut Silent)
        .await
        .unwrap();

    assert_eq!(third.attempted, 0);
    assert_eq!(third.exhausted, 1);
    assert_eq!(
        transport.recipients(),
        vec!["ada@example.com", "grace@example.com", "grace@example.com"]
    );
}

#[tokio::test]
async fn test_send_failures_are_reported_as_they_happen() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_csv(dir.path(), &PEOPLE[..3]);
    let ledger = dir.path().join("send_progress.json");
    let transport = StubTransport::new().rejecting("grace@example.com");
    let (events, mut observer) = recorder();

    dispatcher(&transport, unpaced(), &ledger)
        .run(&csv, &mut observer)
        .await
        .unwrap();

    let events = events.lock().unwrap();
    let failed_at = events
        .iter()
        .position(|event| matches!(event, DispatchEvent::SendFailed { email, .. } if email == "grace@example.com"))
        .unwrap();
    assert_eq!(
        events[failed_at + 1],
        DispatchEvent::Progress {
            attempted: 2,
            succeeded: 1,
            total: 3,
        }
    );
}

#[tokio::test]
async fn test_messages_are_personalised() {
    let dir = tempfile::tempdir().unwrap();
    let csv = write_csv(dir.path(), &PEOPLE[..2]);
    let ledger = dir.path().join("send_progress.json");
    let transport = StubTransport::new();

    dispatcher(&transport, unpaced(), &ledger)
        .run(&csv, &mut Silent)
        .await
        .unwrap();

    let subjects: Vec<_> = transport.sent().into_iter().map(|sent| sent.subject).collect();
    assert_eq!(subjects, vec!["Hello Ada", "Hello Grace"]);
}

#[test]
fn test_cooldown_defaults_match_relay_limits() {
    let config = DispatchConfig::default();
    assert_eq!(config.batch_size, 80);
    assert_eq!(config.cooldown(), Duration::from_secs(600));
}
