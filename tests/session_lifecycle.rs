//! Timed sessions: deadline, interrupt, early unblock, and crash recovery.

use hostblock::ledger::{LedgerEntry, SessionLedger};
use hostblock::session::{Cause, Completion, Outcome, Recovery, SessionController, Status};
use hostblock::store::BlockStore;
use hostblock::{targets, AppError};
use std::fs;
use std::future;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time;

const HOSTS: &str = "##\n# Host Database\n##\n127.0.0.1 localhost\n::1 localhost\n";

struct Fixture {
    dir: TempDir,
    hosts: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let hosts = dir.path().join("hosts");
        fs::write(&hosts, HOSTS).unwrap();
        Self { dir, hosts }
    }

    fn controller(&self) -> SessionController {
        SessionController::new(BlockStore::new(&self.hosts))
    }

    fn ledger(&self) -> SessionLedger {
        SessionLedger::new(self.dir.path().join("session.json"))
    }

    fn content(&self) -> String {
        fs::read_to_string(&self.hosts).unwrap()
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn basic_cycle_unblocks_at_deadline() {
    let fx = Fixture::new();
    let list = fx.dir.path().join("block-list.txt");
    fs::write(&list, "example.com\nexample.org").unwrap();

    let ctl = fx.controller();
    let duration = targets::parse_duration("1").unwrap();
    let session = ctl
        .start_timed_block(targets::read_source_list(&list).unwrap(), Some(duration))
        .unwrap();

    assert_eq!(ctl.list_blocked().unwrap(), vec!["example.com", "example.org"]);

    let started = time::Instant::now();
    let completion = ctl
        .run_until_complete(&session, future::pending::<()>())
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_secs(60));
    assert_eq!(
        completion,
        Completion {
            cause: Cause::Deadline,
            outcome: Outcome::Unblocked,
        }
    );
    assert!(ctl.list_blocked().unwrap().is_empty());
    assert_eq!(fx.content(), HOSTS);
}

#[tokio::test(start_paused = true)]
async fn interrupt_during_session_unblocks() {
    let fx = Fixture::new();
    let ctl = fx.controller();

    let completion = ctl
        .run_timed_block(
            names(&["a.com"]),
            Some(Duration::from_secs(3600)),
            time::sleep(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    assert_eq!(completion.cause, Cause::Cancelled);
    assert_eq!(completion.outcome, Outcome::Unblocked);
    assert_eq!(fx.content(), HOSTS);
}

#[tokio::test(start_paused = true)]
async fn interrupt_before_start_never_touches_the_file() {
    let fx = Fixture::new();
    let ctl = fx.controller();

    let completion = ctl
        .run_timed_block(names(&["a.com"]), Some(Duration::from_secs(60)), future::ready(()))
        .await
        .unwrap();

    assert_eq!(
        completion,
        Completion {
            cause: Cause::Cancelled,
            outcome: Outcome::NeverActivated,
        }
    );
    assert_eq!(fx.content(), HOSTS);
}

#[tokio::test(start_paused = true)]
async fn early_unblock_from_another_task() {
    let fx = Fixture::new();
    let ctl = fx.controller();
    let session = ctl
        .start_timed_block(names(&["a.com", "b.com"]), Some(Duration::from_secs(600)))
        .unwrap();

    let (early_ctl, early_session) = (ctl.clone(), session.clone());
    let early = tokio::spawn(async move {
        time::sleep(Duration::from_secs(30)).await;
        early_ctl.request_early_unblock(&early_session).unwrap()
    });

    let completion = ctl
        .run_until_complete(&session, future::pending::<()>())
        .await
        .unwrap();

    assert!(early.await.unwrap());
    assert_eq!(completion.cause, Cause::EarlyUnblock);
    assert!(ctl.list_blocked().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn deadline_and_interrupt_together_unblock_once() {
    let fx = Fixture::new();
    let ctl = fx.controller();
    let session = ctl
        .start_timed_block(names(&["a.com"]), Some(Duration::from_secs(10)))
        .unwrap();

    // Both causes are ready by the time the session is driven.
    time::advance(Duration::from_secs(20)).await;
    let completion = ctl
        .run_until_complete(&session, future::ready(()))
        .await
        .unwrap();
    assert_eq!(completion.outcome, Outcome::Unblocked);

    // Re-block by hand; a second unblock from either cause would remove it.
    ctl.block_now(&["a.com"]).unwrap();
    assert!(!ctl.on_deadline_elapsed(&session).unwrap());
    assert!(!ctl.on_cancellation_received(&session).unwrap());
    assert!(!ctl.request_early_unblock(&session).unwrap());
    assert_eq!(ctl.list_blocked().unwrap(), vec!["a.com"]);
}

#[test]
fn racing_causes_from_many_threads_have_one_winner() {
    let fx = Fixture::new();
    let ctl = fx.controller();
    let session = ctl
        .start_timed_block(names(&["a.com"]), Some(Duration::from_secs(60)))
        .unwrap();

    let wins: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..12)
            .map(|i| {
                let (ctl, session) = (&ctl, &session);
                scope.spawn(move || match i % 3 {
                    0 => ctl.on_deadline_elapsed(session),
                    1 => ctl.on_cancellation_received(session),
                    _ => ctl.request_early_unblock(session),
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| usize::from(h.join().unwrap().unwrap()))
            .sum()
    });

    assert_eq!(wins, 1);
    assert!(matches!(session.status(), Status::Completed(_)));
    assert!(ctl.list_blocked().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_unblock_is_reported_and_keeps_the_ledger() {
    let fx = Fixture::new();
    let ledger = fx.ledger();
    let ctl = fx.controller().with_ledger(ledger.clone());
    let session = ctl
        .start_timed_block(names(&["a.com"]), Some(Duration::from_secs(60)))
        .unwrap();

    fs::remove_file(&fx.hosts).unwrap();

    let err = ctl
        .run_until_complete(&session, future::pending::<()>())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::UnblockFailed { ref targets, .. } if targets == &["a.com"]));
    assert!(matches!(
        session.status(),
        Status::Completed(Completion {
            outcome: Outcome::UnblockFailed(_),
            ..
        })
    ));
    assert!(ledger.exists());
}

#[tokio::test(start_paused = true)]
async fn ledger_tracks_the_active_session() {
    let fx = Fixture::new();
    let ledger = fx.ledger();
    let ctl = fx.controller().with_ledger(ledger.clone());

    let session = ctl
        .start_timed_block(names(&["a.com"]), Some(Duration::from_secs(60)))
        .unwrap();
    let record = ledger.load().unwrap().unwrap();
    assert_eq!(record.targets, vec!["a.com"]);
    assert_eq!(record.deadline, Some(record.started_at + 60));

    assert!(matches!(
        ctl.prepare(names(&["b.com"]), None),
        Err(AppError::SessionInProgress(_))
    ));

    ctl.run_until_complete(&session, future::ready(()))
        .await
        .unwrap();
    assert!(!ledger.exists());
}

#[test]
fn recover_unblocks_an_expired_session() {
    let fx = Fixture::new();
    let ledger = fx.ledger();
    let ctl = fx.controller().with_ledger(ledger.clone());
    ctl.block_now(&["a.com", "keep.com"]).unwrap();

    let mut record = LedgerEntry::new(names(&["a.com"]), Some(Duration::from_secs(60)));
    record.deadline = Some(record.started_at - 1);
    ledger.record(&record).unwrap();

    match ctl.recover().unwrap() {
        Recovery::Expired { targets } => assert_eq!(targets, vec!["a.com"]),
        other => panic!("unexpected recovery: {other:?}"),
    }
    assert_eq!(ctl.list_blocked().unwrap(), vec!["keep.com"]);
    assert!(!ledger.exists());
}

#[tokio::test(start_paused = true)]
async fn recover_resumes_a_live_session() {
    let fx = Fixture::new();
    let ledger = fx.ledger();
    let ctl = fx.controller().with_ledger(ledger.clone());

    let mut record = LedgerEntry::new(names(&["a.com"]), Some(Duration::from_secs(600)));
    record.pid = 0;
    ledger.record(&record).unwrap();

    let session = match ctl.recover().unwrap() {
        Recovery::Resumed(session) => session,
        other => panic!("unexpected recovery: {other:?}"),
    };
    assert_eq!(session.status(), Status::Active);
    assert_eq!(ctl.list_blocked().unwrap(), vec!["a.com"]);
    assert_eq!(ledger.load().unwrap().unwrap().pid, std::process::id());

    let completion = ctl
        .run_until_complete(&session, future::pending::<()>())
        .await
        .unwrap();
    assert_eq!(completion.cause, Cause::Deadline);
    assert!(ctl.list_blocked().unwrap().is_empty());
    assert!(!ledger.exists());
}

#[cfg(unix)]
#[test]
fn recover_leaves_a_session_owned_by_a_running_process() {
    let fx = Fixture::new();
    let ledger = fx.ledger();
    let ctl = fx.controller().with_ledger(ledger.clone());
    ctl.block_now(&["a.com"]).unwrap();

    let mut record = LedgerEntry::new(names(&["a.com"]), Some(Duration::from_secs(600)));
    record.pid = std::os::unix::process::parent_id();
    ledger.record(&record).unwrap();
    let before = fx.content();

    assert!(matches!(ctl.recover(), Err(AppError::SessionInProgress(_))));
    assert_eq!(fx.content(), before);
    assert_eq!(ledger.load().unwrap(), Some(record));
}

#[test]
fn recover_rejects_an_unrepresentable_deadline() {
    let fx = Fixture::new();
    let ledger = fx.ledger();
    let ctl = fx.controller().with_ledger(ledger.clone());

    let mut record = LedgerEntry::new(names(&["a.com"]), Some(Duration::from_secs(600)));
    record.pid = 0;
    record.deadline = Some(u64::MAX);
    ledger.record(&record).unwrap();

    assert!(matches!(ctl.recover(), Err(AppError::InvalidDuration(_))));
    assert_eq!(fx.content(), HOSTS);
}

#[test]
fn huge_session_length_fails_before_the_file_is_touched() {
    let fx = Fixture::new();
    let ctl = fx.controller();

    assert!(matches!(
        targets::parse_duration("18446744073709551615s"),
        Err(AppError::InvalidDuration(_))
    ));
    assert!(matches!(
        ctl.start_timed_block(names(&["a.com"]), Some(Duration::from_secs(u64::MAX))),
        Err(AppError::InvalidDuration(_))
    ));
    assert_eq!(fx.content(), HOSTS);
}

#[test]
fn recover_without_ledger_does_nothing() {
    let fx = Fixture::new();
    assert!(matches!(fx.controller().recover().unwrap(), Recovery::Nothing));
    let ctl = fx.controller().with_ledger(fx.ledger());
    assert!(matches!(ctl.recover().unwrap(), Recovery::Nothing));
}
