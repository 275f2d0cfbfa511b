use chrono::{Duration as ChronoDuration, Utc};
use maritime_sim::protocol::{AivdmMessage, ControlCommand, Outbound, ServerEvent};
use maritime_sim::scheduler::*;
use maritime_sim::{BroadcastHub, Mmsi, Port, PortCatalog};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

fn seeded_scheduler(hub: BroadcastHub) -> BroadcastScheduler {
    let config = SchedulerConfig {
        seed: Some(7),
        ..SchedulerConfig::default()
    };
    BroadcastScheduler::new(config, PortCatalog::default(), hub)
}

fn decode(line: &str) -> Outbound {
    serde_json::from_str(line).unwrap()
}

#[test]
fn test_tick_publishes_one_report_per_vessel() {
    let hub = BroadcastHub::new(64);
    let mut rx = hub.subscribe();
    let mut scheduler = seeded_scheduler(hub);

    scheduler.add_vessel("123456789", 15.0).unwrap();
    scheduler.add_vessel("123456790", 17.0).unwrap();

    let summary = scheduler.tick(Utc::now());
    assert_eq!(summary.reports, 2);
    assert_eq!(summary.published, 2);

    let mut seen = Vec::new();
    while let Ok(line) = rx.try_recv() {
        match decode(&line) {
            Outbound::Position(AivdmMessage { mmsi, message, decoded, .. }) => {
                assert_eq!(message, "AIVDM");
                assert_eq!(decoded.message_count, 1);
                seen.push(mmsi);
            }
            other => panic!("unexpected broadcast {:?}", other),
        }
    }
    seen.sort();
    assert_eq!(seen, vec!["123456789", "123456790"]);
}

#[test]
fn test_tick_without_subscribers_still_advances_voyages() {
    let mut scheduler = seeded_scheduler(BroadcastHub::new(16));
    scheduler.add_vessel("123456789", 15.0).unwrap();

    let summary = scheduler.tick(Utc::now());
    assert_eq!(summary.reports, 1);
    assert_eq!(summary.published, 0);

    let stats = scheduler.get_stats();
    assert_eq!(stats.messages_sent, 0);
    assert_eq!(stats.reports_generated, 1);
    assert_eq!(stats.ticks, 1);
}

#[test]
fn test_empty_scheduler_tick_is_noop() {
    let hub = BroadcastHub::new(16);
    let mut rx = hub.subscribe();
    let mut scheduler = seeded_scheduler(hub);

    let summary = scheduler.tick(Utc::now());
    assert_eq!(summary, TickSummary { reports: 0, published: 0 });
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_add_vessel_command_broadcasts_event() {
    let hub = BroadcastHub::new(16);
    let mut rx = hub.subscribe();
    let mut scheduler = seeded_scheduler(hub);

    let event = scheduler
        .handle_command(ControlCommand::AddVessel {
            mmsi: "987654321".to_string(),
            speed: 12.0,
        })
        .unwrap();

    match &event {
        ServerEvent::VesselAdded {
            mmsi,
            start_port,
            end_port,
            distance_nm,
        } => {
            assert_eq!(mmsi, "987654321");
            assert_ne!(start_port, end_port);
            assert!(*distance_nm > 0.0);
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert_eq!(decode(&rx.try_recv().unwrap()), Outbound::Event(event));
    assert_eq!(scheduler.active_vessels(), 1);
}

#[test]
fn test_invalid_vessel_command_is_not_broadcast() {
    let hub = BroadcastHub::new(16);
    let mut rx = hub.subscribe();
    let mut scheduler = seeded_scheduler(hub);

    let result = scheduler.handle_command(ControlCommand::AddVessel {
        mmsi: "123".to_string(),
        speed: 12.0,
    });

    assert!(result.is_err());
    assert!(rx.try_recv().is_err());
    assert_eq!(scheduler.active_vessels(), 0);
}

#[test]
fn test_readding_vessel_restarts_voyage() {
    let mut scheduler = seeded_scheduler(BroadcastHub::new(16));
    let catalog = PortCatalog::default();
    let rotterdam = catalog.find("Rotterdam").cloned().unwrap();
    let hamburg = catalog.find("Hamburg").cloned().unwrap();
    let sydney: Port = catalog.find("Sydney").cloned().unwrap();

    scheduler
        .add_vessel_between("123456789", 15.0, rotterdam.clone(), hamburg)
        .unwrap();
    scheduler.tick(Utc::now() + ChronoDuration::minutes(30));

    let added = scheduler
        .add_vessel_between("123456789", 15.0, rotterdam, sydney)
        .unwrap();
    assert_eq!(added.end_port.name, "Sydney");
    assert_eq!(scheduler.active_vessels(), 1);

    let mmsi: Mmsi = "123456789".parse().unwrap();
    let voyage = scheduler.vessel(&mmsi).unwrap().voyage().unwrap();
    assert_eq!(voyage.message_count, 0);
    assert_eq!(scheduler.route_of(&mmsi).map(|(_, end)| end.name.as_str()), Some("Sydney"));
}

#[test]
fn test_added_vessel_sampled_every_five_minutes_for_an_hour() {
    let mut scheduler = seeded_scheduler(BroadcastHub::new(16));
    scheduler.add_vessel("123456789", 15.0).unwrap();

    let mmsi: Mmsi = "123456789".parse().unwrap();
    let voyage = scheduler.vessel(&mmsi).unwrap().voyage().unwrap();
    let (start, total) = (voyage.start_time, voyage.total_distance);

    let mut last_distance = -1.0;
    let mut last_progress = -1.0;
    for step in 0..=12 {
        let reports = scheduler.generate_reports(start + ChronoDuration::minutes(step * 5));
        assert_eq!(reports.len(), 1);
        let report = &reports[0];

        assert_eq!(report.mmsi, mmsi);
        assert!(report.distance_covered > last_distance);
        assert!(report.progress >= last_progress);
        last_distance = report.distance_covered;
        last_progress = report.progress;
    }

    assert_eq!(last_distance, 15.0);
    assert_eq!(last_progress == 1.0, 15.0 >= total);
}

#[test]
fn test_set_speed_command() {
    let hub = BroadcastHub::new(16);
    let mut rx = hub.subscribe();
    let mut scheduler = seeded_scheduler(hub);

    let event = scheduler
        .handle_command(ControlCommand::SetSpeed { speed_factor: 10.0 })
        .unwrap();
    assert_eq!(event, ServerEvent::SpeedUpdated { speed_factor: 10.0 });
    assert_eq!(scheduler.sleep_duration(), Some(Duration::from_millis(500)));
    assert!(rx.try_recv().is_ok());
}

#[test]
fn test_messages_sent_counts_events_and_positions() {
    let hub = BroadcastHub::new(64);
    let _rx = hub.subscribe();
    let mut scheduler = seeded_scheduler(hub);

    scheduler
        .handle_command(ControlCommand::AddVessel {
            mmsi: "123456789".to_string(),
            speed: 15.0,
        })
        .unwrap();
    scheduler.tick(Utc::now());
    scheduler.tick(Utc::now());

    let stats = scheduler.get_stats();
    assert_eq!(stats.messages_sent, 3);
    assert_eq!(stats.vessels_added, 1);
    assert_eq!(stats.active_vessels, 1);
}

#[tokio::test]
async fn test_run_loop_applies_commands_between_ticks() {
    let hub = BroadcastHub::new(256);
    let mut rx = hub.subscribe();
    let config = SchedulerConfig {
        tick_interval: Duration::from_millis(50),
        speed_factor: 1.0,
        seed: Some(1),
        ..SchedulerConfig::default()
    };
    let scheduler = BroadcastScheduler::new(config, PortCatalog::default(), hub);

    let (tx, commands) = mpsc::channel(8);
    let handle = tokio::spawn(scheduler.run(commands));

    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(ControlRequest {
        command: ControlCommand::AddVessel {
            mmsi: "123456789".to_string(),
            speed: 15.0,
        },
        reply: Some(reply_tx),
    })
    .await
    .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(2), reply_rx)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(reply, ServerEvent::VesselAdded { .. }));

    // Next tick after the command carries the new vessel's position
    let position = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let line = rx.recv().await.unwrap();
            if let Outbound::Position(position) = decode(&line) {
                return position;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(position.mmsi, "123456789");

    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(ControlRequest {
        command: ControlCommand::AddVessel {
            mmsi: "bogus".to_string(),
            speed: 15.0,
        },
        reply: Some(reply_tx),
    })
    .await
    .unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(2), reply_rx)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(reply, ServerEvent::Error { .. }));

    handle.abort();
}

#[tokio::test]
async fn test_fast_forward_mode_keeps_serving_commands() {
    let hub = BroadcastHub::new(4096);
    let config = SchedulerConfig {
        speed_factor: 0.0,
        seed: Some(3),
        ..SchedulerConfig::default()
    };
    let mut scheduler = BroadcastScheduler::new(config, PortCatalog::default(), hub);
    scheduler.add_vessel("123456789", 15.0).unwrap();

    let (tx, commands) = mpsc::channel(8);
    let handle = tokio::spawn(scheduler.run(commands));

    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(ControlRequest {
        command: ControlCommand::SetSpeed { speed_factor: 2.0 },
        reply: Some(reply_tx),
    })
    .await
    .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(2), reply_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, ServerEvent::SpeedUpdated { speed_factor: 2.0 });

    handle.abort();
}
