use std::sync::{Arc, Mutex};

use ackpub_core::{PublishFlags, PublishRequest, ResultCode};
use ackpub_node::{BinderConfig, BinderState, CompletionTable, OverlapPolicy, PublishCallback};
use ackpub_transport::{CompletionRoute, CompletionTicket, MemoryCloud, RejectReason, SendPrimitive};
use bytes::Bytes;

type Log = Arc<Mutex<Vec<(ResultCode, Option<Bytes>)>>>;

fn recording(
    config: BinderConfig,
) -> (PublishCallback<Arc<MemoryCloud>>, Arc<MemoryCloud>, Log) {
    let cloud = Arc::new(MemoryCloud::default());
    let log: Log = Arc::default();
    let sink = Arc::clone(&log);
    let binder = PublishCallback::new(CompletionTable::shared(), Arc::clone(&cloud), config)
        .with_handler(move |code, payload| sink.lock().unwrap().push((code, payload)));
    (binder, cloud, log)
}

fn deliveries(log: &Log) -> Vec<ResultCode> {
    log.lock().unwrap().iter().map(|(code, _)| *code).collect()
}

#[test]
fn name_only_publish_uses_defaults_and_reports_success() {
    let (binder, cloud, log) = recording(BinderConfig::default());
    binder.publish("ping", None);

    let sent = cloud.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].data, None);
    assert_eq!(sent[0].ttl, 60);
    assert_eq!(sent[0].flags, PublishFlags::PRIVATE | PublishFlags::WITH_ACK);

    cloud.ack_next();
    assert_eq!(log.lock().unwrap().as_slice(), &[(ResultCode::NONE, None)]);
}

#[test]
fn acknowledged_publish_completes_and_clears_in_progress() {
    let (binder, cloud, log) = recording(BinderConfig::default());
    binder.publish_with_data(
        "testEvent",
        "counter=9",
        PublishFlags::PRIVATE | PublishFlags::WITH_ACK,
    );

    let sent = cloud.take_sent();
    assert_eq!(sent[0].event_name, "testEvent");
    assert_eq!(sent[0].data.as_deref(), Some(&b"counter=9"[..]));
    assert!(binder.is_in_progress());
    assert!(log.lock().unwrap().is_empty(), "handler must wait for the ticket");

    cloud.ack_next();
    assert_eq!(deliveries(&log), vec![ResultCode::NONE]);
    assert!(!binder.is_in_progress());
}

#[test]
fn missing_acknowledgement_reports_timeout() {
    let (binder, cloud, log) = recording(BinderConfig::default());
    binder.publish_with_data(
        "testEvent",
        "counter=9",
        PublishFlags::PRIVATE | PublishFlags::WITH_ACK,
    );
    cloud.time_out_next();

    assert_eq!(log.lock().unwrap().as_slice(), &[(ResultCode::TIMEOUT, None)]);
    assert_eq!(binder.last_result(), Some(ResultCode(-160)));
    assert!(!binder.is_in_progress());
}

#[test]
fn refused_send_completes_before_publish_returns() {
    let (binder, cloud, log) = recording(BinderConfig::default());
    cloud.set_connected(false);

    binder.publish_with_data("testEvent", "counter=1", None);

    assert_eq!(log.lock().unwrap().as_slice(), &[(ResultCode::UNKNOWN, None)]);
    assert!(!binder.is_in_progress());
    assert_eq!(binder.state(), BinderState::Completed);
    assert_eq!(cloud.pending_len(), 0);
    assert_eq!(cloud.ack_next(), None);
    assert_eq!(deliveries(&log).len(), 1);
}

#[test]
fn oversized_payload_is_refused_like_any_other_send_failure() {
    let (binder, _, log) = recording(BinderConfig::default());
    binder.publish_with_data("testEvent", vec![0u8; 2048], None);
    assert_eq!(deliveries(&log), vec![ResultCode::UNKNOWN]);
}

#[test]
fn every_publish_separated_by_completion_is_delivered_once() {
    let (binder, cloud, log) = recording(BinderConfig::default());
    let outcomes = [
        ResultCode::NONE,
        ResultCode::TIMEOUT,
        ResultCode(-230),
        ResultCode::NONE,
    ];
    for (n, code) in outcomes.iter().enumerate() {
        binder.publish_with_ttl("testEvent", format!("counter={n}"), 30, None);
        assert!(binder.is_in_progress());
        cloud.fail_next(*code);
        assert!(!binder.is_in_progress());
    }
    cloud.set_connected(false);
    binder.publish("testEvent", None);

    let mut expected = outcomes.to_vec();
    expected.push(ResultCode::UNKNOWN);
    assert_eq!(deliveries(&log), expected);
}

#[test]
fn duplicate_completion_for_a_token_is_ignored() {
    let cloud = Arc::new(MemoryCloud::default());
    let table = CompletionTable::shared();
    let log: Log = Arc::default();
    let sink = Arc::clone(&log);
    let binder = PublishCallback::new(Arc::clone(&table), Arc::clone(&cloud), BinderConfig::default())
        .with_handler(move |code, payload| sink.lock().unwrap().push((code, payload)));
    binder.publish("e", None);

    let (_, ticket) = cloud.take_next_ticket().expect("request should be pending");
    let token = ticket.token();
    assert!(ticket.complete(ResultCode::NONE, None));
    assert!(!table.route(token, ResultCode::TIMEOUT, None));
    assert_eq!(deliveries(&log), vec![ResultCode::NONE]);
}

#[test]
fn handler_set_after_completion_is_not_replayed() {
    let cloud = Arc::new(MemoryCloud::default());
    let binder = PublishCallback::new(
        CompletionTable::shared(),
        Arc::clone(&cloud),
        BinderConfig::default(),
    );
    binder.publish("e", None);
    cloud.ack_next();
    assert_eq!(binder.last_result(), Some(ResultCode::NONE));

    let log: Log = Arc::default();
    let sink = Arc::clone(&log);
    binder.set_handler(move |code, payload| sink.lock().unwrap().push((code, payload)));
    assert!(log.lock().unwrap().is_empty());

    binder.publish("e", None);
    cloud.ack_next();
    assert_eq!(deliveries(&log), vec![ResultCode::NONE]);
}

#[test]
fn handler_replaced_mid_flight_receives_the_completion() {
    let (binder, cloud, first) = recording(BinderConfig::default());
    binder.publish("e", None);

    let second: Log = Arc::default();
    let sink = Arc::clone(&second);
    binder.set_handler(move |code, payload| sink.lock().unwrap().push((code, payload)));
    cloud.ack_next();

    assert!(first.lock().unwrap().is_empty());
    assert_eq!(deliveries(&second), vec![ResultCode::NONE]);
}

#[test]
fn reject_policy_answers_busy_without_sending() {
    let (binder, cloud, log) = recording(BinderConfig::default());
    binder.publish("first", None);
    binder.publish("second", None);

    assert_eq!(deliveries(&log), vec![ResultCode::BUSY]);
    assert_eq!(cloud.pending_len(), 1);
    cloud.ack_next();
    assert_eq!(deliveries(&log), vec![ResultCode::BUSY, ResultCode::NONE]);
}

#[test]
fn overwrite_policy_completes_both_publishes_exactly_once() {
    let (binder, cloud, log) = recording(BinderConfig {
        overlap_policy: OverlapPolicy::Overwrite,
        ..BinderConfig::default()
    });
    binder.publish("first", None);
    binder.publish("second", None);
    assert_eq!(cloud.pending_len(), 2);

    cloud.time_out_next();
    assert!(binder.is_in_progress());
    cloud.ack_next();
    assert!(!binder.is_in_progress());
    assert_eq!(binder.last_result(), Some(ResultCode::NONE));
    assert_eq!(deliveries(&log), vec![ResultCode::TIMEOUT, ResultCode::NONE]);
}

#[test]
fn completion_after_binder_drop_is_discarded() {
    let cloud = Arc::new(MemoryCloud::default());
    let table = CompletionTable::shared();
    let log: Log = Arc::default();
    {
        let sink = Arc::clone(&log);
        let binder = PublishCallback::new(Arc::clone(&table), Arc::clone(&cloud), BinderConfig::default())
            .with_handler(move |code, payload| sink.lock().unwrap().push((code, payload)));
        binder.publish("e", None);
    }

    assert_eq!(cloud.ack_next().map(|_| ()), Some(()));
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(table.outstanding(), 0);
}

#[test]
fn binders_sharing_a_table_stay_independent() {
    let cloud = Arc::new(MemoryCloud::default());
    let table = CompletionTable::shared();
    let logs: Vec<Log> = vec![Arc::default(), Arc::default()];
    let binders: Vec<_> = logs
        .iter()
        .map(|log| {
            let sink = Arc::clone(log);
            PublishCallback::new(Arc::clone(&table), Arc::clone(&cloud), BinderConfig::default())
                .with_handler(move |code, payload| sink.lock().unwrap().push((code, payload)))
        })
        .collect();

    binders[0].publish("a", None);
    binders[1].publish("b", None);
    assert_eq!(table.outstanding(), 2);

    cloud.time_out_next();
    cloud.ack_next();
    assert_eq!(deliveries(&logs[0]), vec![ResultCode::TIMEOUT]);
    assert_eq!(deliveries(&logs[1]), vec![ResultCode::NONE]);
    assert_eq!(cloud.health_snapshot().acknowledged, 1);
}

#[test]
fn completions_from_another_thread_reach_the_handler() {
    let (binder, cloud, log) = recording(BinderConfig::default());
    binder.publish("e", None);

    let worker = {
        let cloud = Arc::clone(&cloud);
        std::thread::spawn(move || cloud.ack_next())
    };
    assert!(worker.join().expect("worker should not panic").is_some());
    assert_eq!(deliveries(&log), vec![ResultCode::NONE]);
    assert!(!binder.is_in_progress());
}

/// Completes the ticket inline and then refuses the send anyway.
struct CompleteThenRefuse;

impl SendPrimitive for CompleteThenRefuse {
    fn attempt_send(
        &self,
        _request: PublishRequest,
        ticket: CompletionTicket,
    ) -> Result<(), RejectReason> {
        ticket.complete(ResultCode::NONE, None);
        Err(RejectReason::QueueFull)
    }
}

/// Accepts every request and loses the ticket.
struct AcceptAndForget;

impl SendPrimitive for AcceptAndForget {
    fn attempt_send(
        &self,
        _request: PublishRequest,
        ticket: CompletionTicket,
    ) -> Result<(), RejectReason> {
        drop(ticket);
        Ok(())
    }
}

#[test]
fn refusal_after_inline_completion_delivers_only_the_completion() {
    let table = CompletionTable::shared();
    let log: Log = Arc::default();
    let sink = Arc::clone(&log);
    let binder = PublishCallback::new(Arc::clone(&table), CompleteThenRefuse, BinderConfig::default())
        .with_handler(move |code, payload| sink.lock().unwrap().push((code, payload)));

    binder.publish_with_data("testEvent", "counter=1", None);

    assert_eq!(deliveries(&log), vec![ResultCode::NONE]);
    assert!(!binder.is_in_progress());
    assert_eq!(binder.last_result(), Some(ResultCode::NONE));
    assert_eq!(table.outstanding(), 0);
}

#[test]
fn accepted_ticket_dropped_by_the_cloud_completes_as_cancelled() {
    let cloud = Arc::new(MemoryCloud::default());
    let table = CompletionTable::shared();
    let log: Log = Arc::default();
    let sink = Arc::clone(&log);
    let binder = PublishCallback::new(Arc::clone(&table), Arc::clone(&cloud), BinderConfig::default())
        .with_handler(move |code, payload| sink.lock().unwrap().push((code, payload)));
    binder.publish("e", None);

    let (_, ticket) = cloud.take_next_ticket().expect("request should be pending");
    assert!(log.lock().unwrap().is_empty());
    drop(ticket);

    assert_eq!(deliveries(&log), vec![ResultCode::CANCELLED]);
    assert!(!binder.is_in_progress());
    assert_eq!(table.outstanding(), 0);
}

#[test]
fn ticket_lost_inside_an_accepting_send_completes_as_cancelled() {
    let table = CompletionTable::shared();
    let log: Log = Arc::default();
    let sink = Arc::clone(&log);
    let binder = PublishCallback::new(Arc::clone(&table), AcceptAndForget, BinderConfig::default())
        .with_handler(move |code, payload| sink.lock().unwrap().push((code, payload)));

    binder.publish("e", None);

    assert_eq!(deliveries(&log), vec![ResultCode::CANCELLED]);
    assert!(!binder.is_in_progress());
    assert_eq!(table.outstanding(), 0);
}

#[test]
fn raw_request_keeps_wire_flags_while_named_publish_uses_binder_defaults() {
    let (binder, cloud, _log) = recording(BinderConfig::default());

    binder.publish_request(PublishRequest::new("raw"));
    cloud.ack_next();
    binder.publish("named", None);

    let sent = cloud.take_sent();
    assert_eq!(sent[0].flags, PublishFlags::PUBLIC);
    assert_eq!(sent[1].flags, PublishFlags::PRIVATE | PublishFlags::WITH_ACK);
}
