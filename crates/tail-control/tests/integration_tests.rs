//! Integration tests for tail gear control
//!
//! These tests verify end-to-end behavior of the control core including:
//! - Group exclusivity and the fail-safe release of the availability tracker
//! - Queue dispatch ordering, pauses and failure handling
//! - Connection manager fan-out, fake-tail mode and adapter state
//! - The async actor driving everything on a paused clock

use std::time::Duration;

use tail_control::{
    spawn_manager, CommandQueue, CommandTracker, ConnectionManager, DispatchLink, ManagerEvent,
    TrackerEvent,
};
use tail_protocol::{
    CommandInfo, CommandRecord, DeviceId, DeviceInfo, HostMode, LinkEvent, TransportError,
    HOME_COMMAND,
};
use tail_sim::{
    AdapterHandle, DiscoveryHandle, SimulatedAdapter, SimulatedDiscovery, SimulatedTransport,
    TransportHandle,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    /// Two ear commands sharing a group, one tail command on its own, and home
    pub fn catalog() -> Vec<CommandRecord> {
        vec![
            record("Ears A", "EARA", "ears", 500, 200),
            record("Ears B", "EARB", "ears", 500, 200),
            record("Slow wag", "TAILS1", "tail", 1000, 500),
            record("Home", HOME_COMMAND, "tail", 0, 0),
        ]
    }

    pub fn record(
        name: &str,
        command: &str,
        group: &str,
        duration: u64,
        minimum_cooldown: u64,
    ) -> CommandRecord {
        CommandRecord {
            name: name.to_string(),
            command: command.to_string(),
            category: group.to_string(),
            group: group.to_string(),
            duration,
            minimum_cooldown,
        }
    }

    pub fn tracker() -> CommandTracker {
        let mut tracker = CommandTracker::new();
        for record in catalog() {
            tracker.add_command(record.into());
        }
        tracker.drain_events();
        tracker
    }

    pub fn id(s: &str) -> DeviceId {
        DeviceId::new(s)
    }

    /// A manager wired to simulated collaborators
    pub struct Rig {
        pub manager: ConnectionManager,
        pub links: mpsc::UnboundedReceiver<LinkEvent>,
        pub transport: TransportHandle,
        pub discovery: DiscoveryHandle,
        pub adapter: AdapterHandle,
    }

    impl Rig {
        pub fn new(devices: &[&str]) -> Self {
            Self::with_adapter(devices, true, HostMode::Connectable)
        }

        pub fn with_adapter(devices: &[&str], valid: bool, host_mode: HostMode) -> Self {
            let (tx, links) = mpsc::unbounded_channel();
            let infos = devices
                .iter()
                .map(|d| DeviceInfo::new(*d, format!("Tail {}", d), format!("AA:{}", d)))
                .collect();
            let (transport, transport_handle) = SimulatedTransport::new(tx.clone());
            let (discovery, discovery_handle) = SimulatedDiscovery::new(infos, tx.clone());
            let (adapter, adapter_handle) = SimulatedAdapter::with_state(valid, host_mode, tx);

            let mut manager = ConnectionManager::new(
                Box::new(transport),
                Box::new(discovery),
                Box::new(adapter),
            );
            manager.load_catalog(catalog());
            manager.drain_events();

            Self {
                manager,
                links,
                transport: transport_handle,
                discovery: discovery_handle,
                adapter: adapter_handle,
            }
        }

        pub fn pump(&mut self) {
            while let Ok(event) = self.links.try_recv() {
                self.manager.handle_link_event(event);
            }
        }

        pub fn connect(&mut self, devices: &[&str]) {
            self.manager.start_discovery();
            self.pump();
            for d in devices {
                self.manager.connect_to_device(Some(&id(d)));
                self.pump();
            }
        }
    }

    /// Link stub for driving the queue directly
    #[derive(Default)]
    pub struct StubLink {
        pub connected: Vec<DeviceId>,
        pub sent: Vec<(DeviceId, String)>,
        pub fail_next: Option<TransportError>,
    }

    impl DispatchLink for StubLink {
        fn connected_devices(&self) -> Vec<DeviceId> {
            self.connected.clone()
        }

        fn send(&mut self, id: &DeviceId, token: &str) -> Result<(), TransportError> {
            if let Some(err) = self.fail_next.take() {
                return Err(err);
            }
            self.sent.push((id.clone(), token.to_string()));
            Ok(())
        }
    }
}

use helpers::{id, Rig};

// ============================================================================
// Availability Tracker Tests
// ============================================================================

mod tracker_tests {
    use super::*;

    #[test]
    fn running_command_blocks_its_group_only() {
        let mut tracker = helpers::tracker();
        tracker.set_running("EARA", true);

        for cmd in tracker.all_commands() {
            let expected = cmd.group != "ears";
            assert_eq!(tracker.is_available(&cmd.key()), expected, "{}", cmd.command);
        }
    }

    #[test]
    fn stop_restores_whole_group() {
        let mut tracker = helpers::tracker();
        tracker.set_running("EARA", true);
        tracker.set_running("EARA", false);

        assert!(tracker.all_commands().iter().all(|c| tracker.is_available(&c.key())));
    }

    #[test]
    fn home_is_available_while_group_runs() {
        let mut tracker = helpers::tracker();
        tracker.set_running("TAILS1", true);

        let home = tracker.get_command(HOME_COMMAND).unwrap().key();
        assert!(tracker.is_available(&home));
    }

    #[test]
    fn fail_safe_after_duration_plus_cooldown() {
        let mut tracker = helpers::tracker();
        let start = Instant::now();
        let a = tracker.get_command("EARA").unwrap().key();
        let b = tracker.get_command("EARB").unwrap().key();

        tracker.set_running_at("EARA", true, start);
        assert!(!tracker.is_available(&b));

        tracker.expire_due(start + Duration::from_millis(699));
        assert!(tracker.is_running(&a));

        tracker.expire_due(start + Duration::from_millis(700));
        assert!(!tracker.is_running(&a));
        assert!(tracker.is_available(&b));
    }

    #[test]
    fn repeated_set_running_notifies_once() {
        let mut tracker = helpers::tracker();
        tracker.set_running("EARA", true);
        let first = tracker.drain_events();
        tracker.set_running("EARA", true);
        let second = tracker.drain_events();

        let changed_a = |events: &[TrackerEvent]| {
            events
                .iter()
                .filter(|e| matches!(e, TrackerEvent::CommandStateChanged { key, .. } if key.command == "EARA"))
                .count()
        };
        assert_eq!(changed_a(&first), 1);
        assert_eq!(changed_a(&second), 0);
        assert_eq!(tracker.armed_fail_safes(), 1);
    }

    #[test]
    fn remove_missing_command_is_noop() {
        let mut tracker = helpers::tracker();
        let before = tracker.len();
        tracker.remove_command(&CommandInfo::new("Nope", "NOPE", "x", "x", 1, 1));
        assert_eq!(tracker.len(), before);
        assert!(tracker.drain_events().is_empty());
    }
}

// ============================================================================
// Command Queue Tests
// ============================================================================

mod queue_tests {
    use super::*;
    use helpers::StubLink;

    #[test]
    fn waits_for_connection_then_dispatches() {
        let mut tracker = helpers::tracker();
        let mut queue = CommandQueue::new();
        let mut link = StubLink::default();
        let now = Instant::now();
        let wag = tracker.get_command("TAILS1").unwrap().descriptor();

        queue.enqueue_at(wag.clone(), vec![id("t1")], now);
        queue.dispatch(&mut tracker, &mut link, now);
        assert_eq!(queue.len(), 1);

        link.connected.push(id("t1"));
        queue.dispatch(&mut tracker, &mut link, now);
        assert!(queue.is_empty());
        assert!(tracker.is_running(&wag.key()));
    }

    #[test]
    fn each_target_gets_the_command_once_connected() {
        let mut tracker = helpers::tracker();
        let mut queue = CommandQueue::new();
        let mut link = StubLink {
            connected: vec![id("t1")],
            ..Default::default()
        };
        let now = Instant::now();

        queue.enqueue_at(
            tracker.get_command("TAILS1").unwrap().descriptor(),
            vec![id("t1"), id("t2")],
            now,
        );
        queue.dispatch(&mut tracker, &mut link, now);
        assert_eq!(queue.len(), 1);

        tracker.set_running_at("TAILS1", false, now);
        link.connected.push(id("t2"));
        queue.dispatch(&mut tracker, &mut link, now);

        assert_eq!(
            link.sent,
            vec![
                (id("t1"), "TAILS1".to_string()),
                (id("t2"), "TAILS1".to_string()),
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn broadcast_reaches_every_connected_device() {
        let mut tracker = helpers::tracker();
        let mut queue = CommandQueue::new();
        let mut link = StubLink {
            connected: vec![id("t1"), id("t2")],
            ..Default::default()
        };
        let now = Instant::now();

        queue.enqueue_at(tracker.get_command("EARA").unwrap().descriptor(), vec![], now);
        queue.dispatch(&mut tracker, &mut link, now);

        let targets: Vec<_> = link.sent.iter().map(|(d, _)| d.clone()).collect();
        assert_eq!(targets, vec![id("t1"), id("t2")]);
    }

    #[test]
    fn failed_send_is_never_marked_running() {
        let mut tracker = helpers::tracker();
        let mut queue = CommandQueue::new();
        let mut link = StubLink {
            connected: vec![id("t1")],
            fail_next: Some(TransportError::Permanent("gatt error".into())),
            ..Default::default()
        };
        let now = Instant::now();
        let a = tracker.get_command("EARA").unwrap().descriptor();

        queue.enqueue_at(a.clone(), vec![], now);
        queue.dispatch(&mut tracker, &mut link, now);

        assert!(!tracker.is_running(&a.key()));
        assert!(queue.is_empty());
    }

    #[test]
    fn later_entry_for_same_device_waits_its_turn() {
        let mut tracker = helpers::tracker();
        let mut queue = CommandQueue::new();
        let mut link = StubLink {
            connected: vec![id("t1")],
            ..Default::default()
        };
        let now = Instant::now();

        queue.enqueue_at(tracker.get_command("EARA").unwrap().descriptor(), vec![], now);
        queue.enqueue_at(tracker.get_command("EARB").unwrap().descriptor(), vec![], now);
        queue.enqueue_at(tracker.get_command("TAILS1").unwrap().descriptor(), vec![], now);
        queue.dispatch(&mut tracker, &mut link, now);

        // EARB is blocked by EARA, and the wag may not overtake it
        let tokens: Vec<_> = link.sent.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(tokens, vec!["EARA"]);
        assert_eq!(queue.len(), 2);
    }
}

// ============================================================================
// Connection Manager Tests
// ============================================================================

mod manager_tests {
    use super::*;

    #[test]
    fn disconnect_everything() {
        let mut rig = Rig::new(&["t1", "t2"]);
        rig.connect(&["t1", "t2"]);
        rig.manager.enqueue("EARA", vec![]);
        rig.manager.enqueue("EARB", vec![id("t2")]);
        rig.manager.enqueue("EARB", vec![]);
        assert_eq!(rig.manager.queue().len(), 2);
        rig.manager.drain_events();

        rig.manager.disconnect_device(Some(&id("")));
        rig.pump();

        assert!(!rig.manager.is_connected());
        assert!(rig.manager.queue().is_empty());
        assert!(rig
            .manager
            .drain_events()
            .contains(&ManagerEvent::QueueCountChanged(0)));
    }

    #[test]
    fn fake_tail_mode_without_devices() {
        let mut rig = Rig::new(&["t1"]);
        rig.discovery.set_auto_finish(false);
        rig.manager.start_discovery();
        rig.pump();
        assert!(!rig.manager.is_connected());

        rig.manager.set_fake_tail_mode(true);
        assert!(rig.manager.is_connected());
        assert!(!rig.manager.discovery_running());
        assert_eq!(rig.discovery.stops(), 1);

        rig.manager.set_fake_tail_mode(false);
        assert!(!rig.manager.is_connected());
        assert_eq!(rig.manager.device_count(), 1);
    }

    #[test]
    fn disabling_fake_mode_reverts_to_real_aggregate() {
        let mut rig = Rig::new(&["t1"]);
        rig.connect(&["t1"]);
        rig.manager.set_fake_tail_mode(true);
        rig.manager.set_fake_tail_mode(false);
        assert!(rig.manager.is_connected());
    }

    #[test]
    fn disconnect_in_fake_mode_leaves_it() {
        let mut rig = Rig::new(&[]);
        rig.manager.set_fake_tail_mode(true);
        rig.manager.disconnect_device(None);

        assert!(!rig.manager.fake_tail_mode());
        assert!(!rig.manager.is_connected());
        assert_eq!(rig.manager.device_count(), 0);
    }

    #[test]
    fn invalid_adapter_is_no_adapter_in_any_mode() {
        for mode in [
            HostMode::PoweredOff,
            HostMode::Connectable,
            HostMode::Discoverable,
        ] {
            let rig = Rig::with_adapter(&[], false, mode);
            assert_eq!(rig.manager.adapter_state().code(), 2);
        }
    }

    #[test]
    fn adapter_change_is_reported_once() {
        let mut rig = Rig::new(&[]);
        rig.adapter.set_host_mode(HostMode::Discoverable);
        rig.pump();
        assert!(rig.manager.drain_events().is_empty());

        rig.adapter.set_host_mode(HostMode::PoweredOff);
        rig.pump();
        let events = rig.manager.drain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(rig.manager.adapter_state().code(), 1);
    }

    #[test]
    fn pause_descriptor_ignores_catalog() {
        let rig = Rig::new(&[]);
        let pause = rig.manager.get_command("pause:3").unwrap();
        assert_eq!(pause.duration_ms, 3000);
        assert_eq!(pause.minimum_cooldown_ms, 0);
        assert!(pause.category.is_empty());
    }

    #[test]
    fn late_device_receives_its_queued_command() {
        let mut rig = Rig::new(&["t1", "t2"]);
        rig.connect(&["t1"]);

        rig.manager.enqueue("EARA", vec![id("t1"), id("t2")]);
        rig.pump();
        assert_eq!(rig.transport.sent_to(&id("t1")), vec!["EARA".to_string()]);
        assert_eq!(rig.manager.queue().len(), 1);

        rig.transport.reply(&id("t1"), "END EARA");
        rig.pump();
        rig.manager.connect_to_device(Some(&id("t2")));
        rig.pump();

        assert_eq!(rig.transport.sent_to(&id("t2")), vec!["EARA".to_string()]);
        assert!(rig.manager.queue().is_empty());
    }

    #[test]
    fn acknowledged_run_releases_group_early() {
        let mut rig = Rig::new(&["t1"]);
        rig.connect(&["t1"]);
        rig.transport.set_auto_ack(id("t1"), true);

        rig.manager.enqueue("EARA", vec![]);
        rig.manager.enqueue("EARB", vec![]);
        rig.pump();
        assert_eq!(rig.manager.queue().len(), 1);

        rig.transport.reply(&id("t1"), "END EARA");
        rig.pump();
        assert!(rig.manager.queue().is_empty());
        assert_eq!(
            rig.transport.sent_to(&id("t1")),
            vec!["EARA".to_string(), "EARB".to_string()]
        );
    }
}

// ============================================================================
// Actor Tests
// ============================================================================

mod actor_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ears_scenario_on_paused_clock() {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (transport, transport_handle) = SimulatedTransport::new(link_tx.clone());
        let (discovery, _) =
            SimulatedDiscovery::new(vec![DeviceInfo::new("t1", "Tail", "AA")], link_tx.clone());
        let (adapter, _) = SimulatedAdapter::new(link_tx);
        let manager =
            ConnectionManager::new(Box::new(transport), Box::new(discovery), Box::new(adapter));
        let (handle, mut events, task) = spawn_manager(manager, link_rx);

        handle.load_catalog(helpers::catalog()).await.unwrap();
        handle.start_discovery().await.unwrap();
        handle.connect_to_device(None).await.unwrap();
        handle.enqueue("EARA", vec![]).await.unwrap();
        handle.enqueue("EARB", vec![]).await.unwrap();

        let commands = handle.commands().await.unwrap();
        let b = commands.iter().find(|c| c.command == "EARB").unwrap();
        assert!(!b.is_available);

        tokio::time::sleep(Duration::from_millis(701)).await;
        let commands = handle.commands().await.unwrap();
        let a = commands.iter().find(|c| c.command == "EARA").unwrap();
        assert!(!a.is_running);
        assert_eq!(
            transport_handle.sent_to(&id("t1")),
            vec!["EARA".to_string(), "EARB".to_string()]
        );

        handle.shutdown().await.unwrap();
        task.await.unwrap();

        let mut fail_safes = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ManagerEvent::FailSafeTriggered { .. }) {
                fail_safes += 1;
            }
        }
        assert_eq!(fail_safes, 1);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

mod proptest_tests {
    use super::*;
    use helpers::StubLink;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue(usize),
        Finish(usize),
        Advance(u64),
    }

    const TOKENS: [&str; 3] = ["EARA", "EARB", "TAILS1"];

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..TOKENS.len()).prop_map(Op::Enqueue),
            (0..TOKENS.len()).prop_map(Op::Finish),
            (0u64..1500).prop_map(Op::Advance),
        ]
    }

    proptest! {
        #[test]
        fn queue_never_runs_two_of_a_group(ops in prop::collection::vec(op(), 1..40)) {
            let mut tracker = helpers::tracker();
            let mut queue = CommandQueue::new();
            let mut link = StubLink {
                connected: vec![id("t1")],
                ..Default::default()
            };
            let mut now = Instant::now();

            for op in ops {
                match op {
                    Op::Enqueue(i) => {
                        let descriptor = tracker.get_command(TOKENS[i]).unwrap().descriptor();
                        queue.enqueue_at(descriptor, vec![], now);
                    }
                    Op::Finish(i) => tracker.set_running_at(TOKENS[i], false, now),
                    Op::Advance(ms) => {
                        now += Duration::from_millis(ms);
                        tracker.expire_due(now);
                    }
                }
                queue.dispatch(&mut tracker, &mut link, now);

                let running_ears = tracker
                    .all_commands()
                    .iter()
                    .filter(|c| c.group == "ears" && c.is_running)
                    .count();
                prop_assert!(running_ears <= 1);

                for cmd in tracker.all_commands().iter().filter(|c| !c.is_home()) {
                    let group_busy = tracker
                        .all_commands()
                        .iter()
                        .any(|o| o.is_running && o.shares_group_with(cmd));
                    prop_assert_eq!(tracker.is_available(&cmd.key()), !group_busy);
                }
            }
        }

        #[test]
        fn clearing_a_device_drops_its_entries(count in 0usize..20, other in 0usize..20) {
            let mut tracker = helpers::tracker();
            let mut queue = CommandQueue::new();
            let now = Instant::now();
            let wag = tracker.get_command("TAILS1").unwrap().descriptor();

            for _ in 0..count {
                queue.enqueue_at(wag.clone(), vec![id("t1")], now);
            }
            for _ in 0..other {
                queue.enqueue_at(wag.clone(), vec![id("t2")], now);
            }
            prop_assert_eq!(queue.len(), count + other);

            queue.clear(&id("t1"), &mut tracker, now);
            prop_assert_eq!(queue.len(), other);
        }

        #[test]
        fn fail_safe_always_releases(duration in 1u64..5000, cooldown in 0u64..2000) {
            let mut tracker = CommandTracker::new();
            tracker.add_command(CommandInfo::new("A", "A", "g", "g", duration, cooldown));
            tracker.add_command(CommandInfo::new("B", "B", "g", "g", duration, cooldown));
            let start = Instant::now();
            let b = tracker.get_command("B").unwrap().key();

            tracker.set_running_at("A", true, start);
            prop_assert!(!tracker.is_available(&b));
            tracker.expire_due(start + Duration::from_millis(duration + cooldown));
            prop_assert!(tracker.is_available(&b));
        }
    }
}
