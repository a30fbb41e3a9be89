#![forbid(unsafe_code)]

use orchestrator::channel::{ChannelState, Dispatcher, EventChannel, MemoryFeed, MemorySource};
use orchestrator::domain::{MonitoredProcessSet, SharedProcessSet, lock_set};
use orchestrator::error::Error;
use orchestrator::supervisor::ProcessControl;
use proptest::prelude::*;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

#[derive(Debug, Default)]
struct StubControl {
    dead: Vec<u32>,
    names: Vec<(u32, &'static str)>,
    traced: Mutex<Vec<u32>>,
}

impl ProcessControl for StubControl {
    fn is_alive(&self, pid: u32) -> bool {
        !self.dead.contains(&pid)
    }

    fn terminate(&self, _pid: u32) -> bool {
        true
    }

    fn resume(&self, _pid: u32) -> bool {
        true
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        self.names
            .iter()
            .find(|(p, _)| *p == pid)
            .map(|(_, name)| name.to_string())
    }

    fn start_trace(&self, pid: u32) -> Result<(), Error> {
        self.traced.lock().unwrap().push(pid);
        Ok(())
    }
}

fn settings() -> config::Channel {
    config::Channel {
        max_readers: 4,
        drain_deadline: Duration::from_secs(5),
        idle_sleep: Duration::from_millis(5),
        drain_poll: Duration::from_millis(10),
    }
}

fn start(
    logs: &Path,
    control: Arc<StubControl>,
) -> (EventChannel, MemoryFeed, SharedProcessSet) {
    let processes = MonitoredProcessSet::shared();
    let dispatcher = Dispatcher::new(
        logs,
        processes.clone(),
        control,
        vec!["kernel_task".into(), "sleep".into()],
    );
    let (source, feed) = MemorySource::pair();
    let mut channel = EventChannel::new(settings());
    channel.start_with(Box::new(source), dispatcher).unwrap();
    (channel, feed, processes)
}

#[test]
fn split_record_is_dispatched_once() {
    let dir = tempdir().unwrap();
    let (mut channel, feed, _) = start(dir.path(), Arc::default());
    assert_eq!(channel.state(), ChannelState::Listening);

    feed.push(b"FILE_CRE");
    std::thread::sleep(Duration::from_millis(50));
    feed.push(b"ATE:/tmp/x\n");
    channel.stop();

    assert_eq!(channel.state(), ChannelState::Closed);
    let log = std::fs::read_to_string(dir.path().join("file_creation.log")).unwrap();
    assert_eq!(log, "/tmp/x\n");
}

#[test]
fn records_are_routed_by_prefix() {
    let dir = tempdir().unwrap();
    let (mut channel, feed, _) = start(dir.path(), Arc::default());

    feed.push(b"FILE_WRITE:12:00: /tmp/a\nFILE_DELETE:12:01: /tmp/b\n");
    feed.push(b"FILE_ACTIVITY:open /etc/hosts\nBOGUS:1\n");
    channel.stop();

    let read = |name: &str| std::fs::read_to_string(dir.path().join(name)).unwrap();
    assert_eq!(read("file_writes.log"), "12:00: /tmp/a\n");
    assert_eq!(read("file_deletion.log"), "12:01: /tmp/b\n");
    assert_eq!(read("file_activity.log"), "open /etc/hosts\n");
}

#[test]
fn announced_processes_join_the_set_once() {
    let dir = tempdir().unwrap();
    let control = Arc::new(StubControl {
        dead: vec![13],
        names: vec![(11, "Installer"), (12, "sleep")],
        ..Default::default()
    });
    let (mut channel, feed, processes) = start(dir.path(), control.clone());

    feed.push(b"PROCESS:11\nPROCESS:11\nPROCESS:12\nPROCESS:13\nPROCESS:abc\n");
    channel.stop();

    assert_eq!(lock_set(&processes).pids(), &[11, 12]);
    // Protected processes are monitored but not traced.
    assert_eq!(*control.traced.lock().unwrap(), vec![11]);
}

#[test]
fn dropping_a_listening_channel_closes_it() {
    let dir = tempdir().unwrap();
    let (channel, feed, _) = start(dir.path(), Arc::default());
    feed.push(b"FILE_CREATE:/tmp/late\n");
    drop(channel);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn reassembles_any_split(cut in 1usize..24) {
        let record = b"FILE_CREATE:/tmp/sample\n";
        let dir = tempdir().unwrap();
        let (mut channel, feed, _) = start(dir.path(), Arc::default());

        feed.push(&record[..cut]);
        std::thread::sleep(Duration::from_millis(10));
        feed.push(&record[cut..]);
        channel.stop();

        let log = std::fs::read_to_string(dir.path().join("file_creation.log")).unwrap();
        prop_assert_eq!(log, "/tmp/sample\n");
    }
}
